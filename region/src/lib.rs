//! User-space emulation of demand paging.
//!
//! A [`MemoryRegion`] hands out a flat, page-aligned logical buffer whose
//! pages live either in a small physical buffer or in a per-process swap file.
//! Residency is resolved transparently: every access the current protection
//! forbids traps into the [`fault`] state machine, which pages data in and out
//! and loosens protection one step at a time.

use std::io;

use swap::SwapError;
use thiserror::Error;

pub mod config;
pub mod fault;
mod memory;
pub mod page_table;
pub mod platform;
mod region;
mod trap;

pub use config::{RegionConfig, DEFAULT_RATIO, NUM_PAGES, PAGE_SIZE};
pub use fault::{FaultError, FaultHandler, PageIo};
pub use page_table::{PageStatus, PageTable, PageTableEntry};
pub use platform::Protection;
pub use region::{Allocation, MemoryRegion};

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("invalid region configuration: {0}")]
    InvalidConfig(String),
    #[error("allocation failed: {0}")]
    Allocation(String),
    #[error("changing page protection failed: {0}")]
    Protection(io::Error),
    #[error(transparent)]
    Swap(#[from] SwapError),
    #[error(transparent)]
    Fault(#[from] FaultError),
    #[error("region was already acquired")]
    AlreadyAcquired,
    #[error("another region already owns the fault trap")]
    TrapBusy,
    #[error("installing the fault trap failed: {0}")]
    Trap(io::Error),
}
