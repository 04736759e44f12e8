use std::{cell::UnsafeCell, ptr, ptr::NonNull};

use log::{error, info, warn};
use swap::SwapStore;

use crate::{
    config::{valid_ratio, RegionConfig},
    fault::{FaultError, FaultHandler, PageIo},
    memory::PhysicalMemory,
    page_table::{PageTable, PageTableEntry},
    platform::{LogicalMapping, Protection},
    trap::Trap,
    RegionError,
};

/// Base address and size of an acquired logical region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub base: NonNull<u8>,
    pub bytes: usize,
}

struct Backing {
    page_size: usize,
    logical: LogicalMapping,
    physical: PhysicalMemory,
    swap: SwapStore,
}

impl PageIo for Backing {
    fn flush_to_physical(&mut self, page: usize) -> Result<(), FaultError> {
        // Dirty pages are still writable, hence readable.
        let src = self.logical.ptr_at(page * self.page_size);
        let dst = self.physical.page_mut(page);
        unsafe { ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }

    fn load_logical(&mut self, page: usize) -> Result<(), FaultError> {
        let offset = page * self.page_size;
        self.logical
            .protect(offset, self.page_size, Protection::ReadWrite)?;
        let src = self.physical.page(page);
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.logical.ptr_at(offset), src.len()) };
        self.logical.protect(offset, self.page_size, Protection::None)?;
        Ok(())
    }

    fn swap_out(&mut self, page: usize) -> Result<(), FaultError> {
        self.swap.write_page(page, self.physical.page(page))?;
        Ok(())
    }

    fn swap_in(&mut self, page: usize) -> Result<(), FaultError> {
        self.swap.read_page(page, self.physical.page_mut(page))?;
        Ok(())
    }

    fn protect_all(&mut self, protection: Protection) -> Result<(), FaultError> {
        self.logical.protect_all(protection)?;
        Ok(())
    }

    fn protect(&mut self, page: usize, protection: Protection) -> Result<(), FaultError> {
        self.logical
            .protect(page * self.page_size, self.page_size, protection)?;
        Ok(())
    }
}

/// Everything the fault trap needs to resolve a fault.
pub(crate) struct Pager {
    table: PageTable,
    handler: FaultHandler,
    backing: Backing,
}

impl Pager {
    pub(crate) fn page_of(&self, addr: usize) -> Option<usize> {
        let offset = self.backing.logical.offset_of(addr)?;
        Some(offset / self.backing.page_size)
    }

    pub(crate) fn resolve(&mut self, page: usize) -> Result<Protection, FaultError> {
        self.handler
            .handle_fault(&mut self.table, &mut self.backing, page)
    }
}

struct Active {
    // Declared first so the trap is gone before the pager is freed.
    trap: Trap,
    pager: Box<UnsafeCell<Pager>>,
}

/// A demand-paged region of `num_pages * page_size` bytes whose residency is
/// driven entirely by protection faults on ordinary memory accesses.
pub struct MemoryRegion {
    config: RegionConfig,
    acquired: bool,
    active: Option<Active>,
}

impl MemoryRegion {
    pub fn new(config: RegionConfig) -> Self {
        info!("Memory-to-swap ratio: {}", config.ratio);
        Self {
            config,
            acquired: false,
            active: None,
        }
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub fn ratio(&self) -> f64 {
        self.config.ratio
    }

    /// Changes the memory-to-swap ratio. Only honoured before the first
    /// [`acquire`](Self::acquire); returns whether the value was taken.
    pub fn set_ratio(&mut self, ratio: f64) -> bool {
        if self.acquired {
            warn!("Memory-to-swap ratio must be set before the region is initialized");
            return false;
        }
        if !valid_ratio(ratio) {
            warn!("Ignoring memory-to-swap ratio {}: must be in (0, 1]", ratio);
            return false;
        }
        self.config.ratio = ratio;
        true
    }

    pub fn is_acquired(&self) -> bool {
        self.active.is_some()
    }

    /// Reserves the logical and physical buffers, creates the swap file and
    /// installs the fault trap. Every page starts on secondary storage and the
    /// whole logical region denies access.
    pub fn acquire(&mut self) -> Result<Allocation, RegionError> {
        if self.acquired {
            return Err(RegionError::AlreadyAcquired);
        }
        self.config.validate()?;
        let config = &self.config;
        info!(
            "Initializing region: {} pages of {} bytes",
            config.num_pages, config.page_size
        );

        let logical = LogicalMapping::map(config.region_size())
            .map_err(|e| RegionError::Allocation(e.to_string()))?;
        let physical = PhysicalMemory::create(config.page_size, config.num_pages)?;
        let mut swap = SwapStore::create(&config.swap_dir, config.page_size, config.num_pages)?;
        swap.retain_on_close(config.retain_swap);

        let pager = Box::new(UnsafeCell::new(Pager {
            table: PageTable::init(config.num_pages, config.page_size),
            handler: FaultHandler::new(config.resident_limit()),
            backing: Backing {
                page_size: config.page_size,
                logical,
                physical,
                swap,
            },
        }));
        let trap = Trap::install(pager.get())?;

        let logical = unsafe { &(*pager.get()).backing.logical };
        logical
            .protect_all(Protection::None)
            .map_err(RegionError::Protection)?;
        let allocation = Allocation {
            base: logical.base(),
            bytes: logical.len(),
        };

        self.acquired = true;
        self.active = Some(Active { trap, pager });
        info!("Region initialized: {} bytes", allocation.bytes);
        Ok(allocation)
    }

    fn pager(&self) -> Option<&Pager> {
        // No fault can be in progress while the owner is running this.
        self.active
            .as_ref()
            .map(|active| unsafe { &*active.pager.get() })
    }

    pub fn allocation(&self) -> Option<Allocation> {
        let logical = &self.pager()?.backing.logical;
        Some(Allocation {
            base: logical.base(),
            bytes: logical.len(),
        })
    }

    /// Copy of the page table, indexed by page number.
    pub fn page_stats(&self) -> Vec<PageTableEntry> {
        self.pager()
            .map(|pager| pager.table.snapshot())
            .unwrap_or_default()
    }

    pub fn resident_pages(&self) -> usize {
        self.pager().map_or(0, |pager| pager.table.resident_count())
    }

    pub fn fault_count(&self) -> u64 {
        self.pager().map_or(0, |pager| pager.handler.faults())
    }

    /// Writes every resident page back to swap, closes the swap file and frees
    /// both buffers. Returns the final page table; later calls do nothing and
    /// return an empty table.
    pub fn release(&mut self) -> Result<Vec<PageTableEntry>, RegionError> {
        let Some(Active { trap, pager }) = self.active.take() else {
            return Ok(Vec::new());
        };
        drop(trap);
        let Pager {
            mut table,
            mut handler,
            mut backing,
        } = UnsafeCell::into_inner(*pager);

        handler.flush_all(&mut table, &mut backing)?;
        for (page, entry) in table.iter().enumerate() {
            if entry.access_count > 0 {
                info!(
                    "Page {}: acc {} val {} drt {} ava {} rd {} dsk {}",
                    page,
                    entry.access_count,
                    entry.valid_count,
                    entry.dirty_count,
                    entry.avail_count,
                    entry.read_count,
                    entry.disk_count
                );
            }
        }
        backing.swap.close()?;
        info!("Region released after {} faults", handler.faults());
        Ok(table.snapshot())
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!("Releasing memory region failed: {}", e);
        }
    }
}
