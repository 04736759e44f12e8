use std::path::PathBuf;

use crate::{platform, RegionError};

pub const PAGE_SIZE: usize = 4096;
pub const NUM_PAGES: usize = 10;
pub const DEFAULT_RATIO: f64 = 0.5;
pub const SWAP_DIR: &str = "./smvdat";

// Build-time overrides, e.g. `SMV_MEMTOSWAPRATIO=0.3 cargo build`.
const PAGE_SIZE_OVERRIDE: Option<&str> = option_env!("SMV_PAGESIZE");
const NUM_PAGES_OVERRIDE: Option<&str> = option_env!("SMV_NUMPAGE");
const RATIO_OVERRIDE: Option<&str> = option_env!("SMV_MEMTOSWAPRATIO");

#[derive(Debug, Clone, PartialEq)]
pub struct RegionConfig {
    pub page_size: usize,
    pub num_pages: usize,
    /// Fraction of `num_pages` allowed to be resident at once.
    pub ratio: f64,
    /// Directory of the `smvswap.<pid>` file. Must exist.
    pub swap_dir: PathBuf,
    /// Leave the swap file on disk after release.
    pub retain_swap: bool,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE_OVERRIDE
                .and_then(|s| s.parse().ok())
                .unwrap_or(PAGE_SIZE),
            num_pages: NUM_PAGES_OVERRIDE
                .and_then(|s| s.parse().ok())
                .unwrap_or(NUM_PAGES),
            ratio: RATIO_OVERRIDE
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RATIO),
            swap_dir: PathBuf::from(SWAP_DIR),
            retain_swap: false,
        }
    }
}

pub fn valid_ratio(ratio: f64) -> bool {
    ratio > 0.0 && ratio <= 1.0
}

impl RegionConfig {
    pub fn region_size(&self) -> usize {
        self.page_size * self.num_pages
    }

    /// Number of pages allowed to stay resident before a page-in evicts.
    pub fn resident_limit(&self) -> f64 {
        self.num_pages as f64 * self.ratio
    }

    pub fn validate(&self) -> Result<(), RegionError> {
        let os_page = platform::os_page_size();
        if self.page_size == 0 || self.page_size % os_page != 0 {
            return Err(RegionError::InvalidConfig(format!(
                "page size {} is not a multiple of the system page size {}",
                self.page_size, os_page
            )));
        }
        if self.num_pages == 0 {
            return Err(RegionError::InvalidConfig(String::from(
                "region needs at least one page",
            )));
        }
        if !valid_ratio(self.ratio) {
            return Err(RegionError::InvalidConfig(format!(
                "memory-to-swap ratio {} is outside (0, 1]",
                self.ratio
            )));
        }
        Ok(())
    }
}
