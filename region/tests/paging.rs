use std::{fs, path::Path};

use rand::Rng;
use region::{Allocation, MemoryRegion, PageStatus, RegionConfig, RegionError};
use serial_test::serial;

fn region_in(dir: &Path, ratio: f64) -> MemoryRegion {
    let _ = env_logger::builder().is_test(true).try_init();
    MemoryRegion::new(RegionConfig {
        swap_dir: dir.to_path_buf(),
        ratio,
        ..RegionConfig::default()
    })
}

fn read(allocation: &Allocation, offset: usize) -> u8 {
    assert!(offset < allocation.bytes);
    unsafe { allocation.base.as_ptr().add(offset).read_volatile() }
}

fn write(allocation: &Allocation, offset: usize, value: u8) {
    assert!(offset < allocation.bytes);
    unsafe { allocation.base.as_ptr().add(offset).write_volatile(value) }
}

#[test]
#[serial]
fn acquire_starts_on_secondary() {
    let dir = tempfile::tempdir().unwrap();
    let mut region = region_in(dir.path(), 0.5);
    let allocation = region.acquire().unwrap();
    let config = region.config().clone();

    assert_eq!(allocation.bytes, config.page_size * config.num_pages);
    assert_eq!(allocation.base.as_ptr() as usize % config.page_size, 0);
    assert_eq!(region.allocation(), Some(allocation));
    assert_eq!(region.resident_pages(), 0);
    assert_eq!(region.fault_count(), 0);
    assert!(region
        .page_stats()
        .iter()
        .all(|entry| entry.status == PageStatus::OnSecondary));
    assert!(swap::make_name(dir.path(), std::process::id()).exists());
}

#[test]
#[serial]
fn first_write_climbs_the_staircase() {
    let dir = tempfile::tempdir().unwrap();
    let mut region = region_in(dir.path(), 0.5);
    let allocation = region.acquire().unwrap();

    write(&allocation, 10, 0xab);
    assert_eq!(region.fault_count(), 4);
    assert_eq!(region.page_stats()[0].status, PageStatus::Dirty);

    // Still writable: no further fault.
    assert_eq!(read(&allocation, 10), 0xab);
    assert_eq!(region.fault_count(), 4);
    assert_eq!(region.resident_pages(), 1);
}

#[test]
#[serial]
fn data_survives_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let mut region = region_in(dir.path(), 0.5);
    let allocation = region.acquire().unwrap();
    let page_size = region.config().page_size;
    let num_pages = region.config().num_pages;
    let mut rng = rand::thread_rng();

    let mut written = Vec::new();
    for page in 0..num_pages {
        for _ in 0..8 {
            let offset = page * page_size + rng.gen_range(0..page_size);
            let value: u8 = rng.gen();
            write(&allocation, offset, value);
            written.push((offset, value));
        }
    }
    assert!(region.page_stats()[0].disk_count >= 1);

    // Later writes to the same offset win.
    let mut expected = std::collections::HashMap::new();
    for (offset, value) in &written {
        expected.insert(*offset, *value);
    }
    for (offset, value) in expected {
        assert_eq!(read(&allocation, offset), value, "offset {}", offset);
    }
}

#[test]
#[serial]
fn resident_pages_stay_under_ratio() {
    let dir = tempfile::tempdir().unwrap();
    let mut region = region_in(dir.path(), 0.5);
    let allocation = region.acquire().unwrap();
    let page_size = region.config().page_size;
    let num_pages = region.config().num_pages;
    let limit = ((num_pages as f64 * 0.5).floor() as usize).max(1);
    let mut rng = rand::thread_rng();

    for _ in 0..200 {
        let page = rng.gen_range(0..num_pages);
        if rng.gen_bool(0.5) {
            read(&allocation, page * page_size);
        } else {
            write(&allocation, page * page_size + 1, page as u8);
        }
        assert!(region.resident_pages() <= limit);
    }
}

#[test]
#[serial]
fn evicts_least_recently_used_page() {
    let dir = tempfile::tempdir().unwrap();
    let mut region = region_in(dir.path(), 0.2);
    let allocation = region.acquire().unwrap();
    let page_size = region.config().page_size;
    if region.config().num_pages < 3 {
        return;
    }

    read(&allocation, 0);
    read(&allocation, page_size);
    read(&allocation, 0);
    read(&allocation, 2 * page_size);

    let stats = region.page_stats();
    assert!(stats[0].status.is_resident());
    assert_eq!(stats[1].status, PageStatus::OnSecondary);
    assert!(stats[2].status.is_resident());
    assert_eq!(stats[1].disk_count, 1);
}

#[test]
#[serial]
fn ratio_is_frozen_after_acquire() {
    let dir = tempfile::tempdir().unwrap();
    let mut region = region_in(dir.path(), 0.5);
    assert!(region.set_ratio(0.3));
    assert_eq!(region.ratio(), 0.3);
    assert!(!region.set_ratio(1.5));
    assert_eq!(region.ratio(), 0.3);

    region.acquire().unwrap();
    assert!(!region.set_ratio(0.8));
    assert_eq!(region.ratio(), 0.3);

    region.release().unwrap();
    assert!(!region.set_ratio(0.8));
    assert_eq!(region.ratio(), 0.3);
}

#[test]
#[serial]
fn release_writes_pages_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut region = MemoryRegion::new(RegionConfig {
        swap_dir: dir.path().to_path_buf(),
        retain_swap: true,
        ..RegionConfig::default()
    });
    let allocation = region.acquire().unwrap();
    let page_size = region.config().page_size;
    let path = swap::make_name(dir.path(), std::process::id());

    write(&allocation, 2 * page_size + 7, 0x42);
    write(&allocation, 5, 0x17);
    let stats = region.release().unwrap();
    assert!(stats.iter().all(|entry| entry.status == PageStatus::OnSecondary));
    assert!(stats[2].disk_count >= 1);
    assert!(!region.is_acquired());

    let content = fs::read(&path).unwrap();
    assert_eq!(content[2 * page_size + 7], 0x42);
    assert_eq!(content[5], 0x17);
    assert_eq!(content[6], 0);

    assert!(region.release().unwrap().is_empty());
}

#[test]
#[serial]
fn release_removes_swap_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut region = region_in(dir.path(), 0.5);
    region.acquire().unwrap();
    let path = swap::make_name(dir.path(), std::process::id());
    assert!(path.exists());
    region.release().unwrap();
    assert!(!path.exists());
}

#[test]
#[serial]
fn one_region_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let other_dir = tempfile::tempdir().unwrap();
    let mut region = region_in(dir.path(), 0.5);
    region.acquire().unwrap();
    assert!(matches!(
        region.acquire(),
        Err(RegionError::AlreadyAcquired)
    ));

    let mut other = region_in(other_dir.path(), 0.5);
    assert!(matches!(other.acquire(), Err(RegionError::TrapBusy)));

    region.release().unwrap();
    let mut third = region_in(other_dir.path(), 0.5);
    assert!(third.acquire().is_ok());
}

#[test]
#[serial]
fn missing_swap_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut region = region_in(&dir.path().join("missing"), 0.5);
    assert!(matches!(region.acquire(), Err(RegionError::Swap(_))));
    assert!(!region.is_acquired());
}
