use std::{
    error::Error,
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use clap::Parser;
use log::info;
use paged_quadtree::{
    events::run_events,
    stations::{load_addresses, read_count},
    AddressBook, QuadTree, Rectangle, Strategy, RECORD_SIZE,
};
use region::{MemoryRegion, RegionConfig};

/// Area covered by the station index.
const BOUNDARY: Rectangle = Rectangle::new((150000.0, 7500000.0), (7500000.0, 10000000.0));

#[derive(Parser, Debug)]
#[command(name = "paged_quadtree")]
#[command(about = "Nearest charging stations over a demand-paged quadtree")]
struct Args {
    /// Base file: a count line, then `;`-separated station records
    #[arg(short, long)]
    base: PathBuf,

    /// Events file: a count line, then `C x y n`, `A id` or `D id` lines
    #[arg(short, long)]
    events: PathBuf,

    /// Print INITIALIZED and FINISHED around the event output
    #[arg(short, long)]
    test: bool,

    /// Fraction of pages allowed to stay resident
    #[arg(long)]
    ratio: Option<f64>,

    /// Pages in the region (default: enough for the whole base)
    #[arg(long)]
    pages: Option<usize>,

    /// Directory holding the swap file
    #[arg(long)]
    swap_dir: Option<PathBuf>,

    /// Use the best-first search instead of the exhaustive scan
    #[arg(long)]
    heuristic: bool,
}

fn lines_of(path: &Path) -> io::Result<impl Iterator<Item = io::Result<String>>> {
    Ok(BufReader::new(File::open(path)?).lines())
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut base = lines_of(&args.base)?;
    let count = read_count(&mut base)?;

    let mut config = RegionConfig::default();
    // The root holds the first station and each later one adds at most a node.
    let needed = (count.max(1) * RECORD_SIZE).div_ceil(config.page_size);
    config.num_pages = args.pages.unwrap_or(needed.max(config.num_pages));
    if let Some(swap_dir) = args.swap_dir {
        config.swap_dir = swap_dir;
    }
    let mut region = MemoryRegion::new(config);
    if let Some(ratio) = args.ratio {
        if !region.set_ratio(ratio) {
            return Err(format!("invalid memory-to-swap ratio {}", ratio).into());
        }
    }

    let mut tree = QuadTree::new(&mut region, count, BOUNDARY)?;
    let mut book = AddressBook::with_capacity(count);
    load_addresses(base, &mut tree, &mut book)?;

    let mut events = lines_of(&args.events)?;
    let expected = read_count(&mut events)?;
    let strategy = if args.heuristic {
        Strategy::BestFirst
    } else {
        Strategy::Exhaustive
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.test {
        writeln!(out, "INITIALIZED")?;
    }
    let executed = run_events(events, strategy, &mut tree, &mut book, &mut out)?;
    if args.test {
        writeln!(out, "FINISHED")?;
    }
    out.flush()?;
    info!("Ran {} of {} events", executed, expected);

    drop(tree);
    region.release()?;
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
