use std::{io, io::Write, str::FromStr};

use log::warn;

use crate::{
    geometry::Point,
    quadtree::{QuadTree, Strategy},
    stations::{AddressBook, LoadError},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `C x y n`: the `n` active stations nearest to `(x, y)`.
    Query { x: f64, y: f64, n: usize },
    /// `A id`
    Activate(String),
    /// `D id`
    Deactivate(String),
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let tag = parts.next().ok_or("empty command")?;
        let mut arg = |name: &str| parts.next().ok_or(format!("missing {}", name));
        match tag {
            "C" => {
                let x = arg("x")?;
                let y = arg("y")?;
                let n = arg("n")?;
                Ok(Command::Query {
                    x: x.parse().map_err(|_| format!("invalid x {:?}", x))?,
                    y: y.parse().map_err(|_| format!("invalid y {:?}", y))?,
                    n: n.parse().map_err(|_| format!("invalid n {:?}", n))?,
                })
            }
            "A" => Ok(Command::Activate(arg("id")?.to_string())),
            "D" => Ok(Command::Deactivate(arg("id")?.to_string())),
            other => Err(format!("unknown command {:?}", other)),
        }
    }
}

/// Changes the activity of station `id` in both the address book and the
/// index, and reports the outcome on `out`.
fn toggle(
    id: &str,
    active: bool,
    tree: &mut QuadTree,
    book: &mut AddressBook,
    out: &mut impl Write,
) -> io::Result<()> {
    let Some(address) = book.find(id).and_then(|handle| book.get_mut(handle)) else {
        return writeln!(out, "Charging station {} not found.", id);
    };
    if address.active == active {
        let state = if active { "active" } else { "inactive" };
        return writeln!(out, "Charging station {} was already {}.", id, state);
    }
    address.active = active;
    if !tree.set_active(&address.location, active) {
        warn!("Station {} is not in the index", id);
    }
    let verb = if active { "activated" } else { "deactivated" };
    writeln!(out, "Charging station {} {}.", id, verb)
}

fn query(
    at: Point,
    n: usize,
    strategy: Strategy,
    tree: &QuadTree,
    book: &AddressBook,
    out: &mut impl Write,
) -> io::Result<()> {
    for neighbor in tree.nearest(&at, n, strategy) {
        if let Some(address) = book.get(neighbor.point.id) {
            writeln!(out, "{} ({:.3})", address, neighbor.distance)?;
        }
    }
    Ok(())
}

/// Runs every event line of `lines` (after the count line), echoing each line
/// before its output.
pub fn run_events<I, W>(
    lines: I,
    strategy: Strategy,
    tree: &mut QuadTree,
    book: &mut AddressBook,
    out: &mut W,
) -> Result<usize, LoadError>
where
    I: Iterator<Item = io::Result<String>>,
    W: Write,
{
    let mut executed = 0;
    for (i, line) in lines.enumerate() {
        let line = line?;
        writeln!(out, "{}", line)?;
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(reason) => {
                warn!("Ignoring event on line {}: {}", i + 2, reason);
                continue;
            }
        };
        match command {
            Command::Query { x, y, n } => query(Point::new(x, y), n, strategy, tree, book, out)?,
            Command::Activate(id) => toggle(&id, true, tree, book, out)?,
            Command::Deactivate(id) => toggle(&id, false, tree, book, out)?,
        }
        executed += 1;
    }
    Ok(executed)
}
