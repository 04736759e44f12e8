use std::ptr::NonNull;

use log::{debug, info, warn};
use region::{MemoryRegion, RegionError};
use thiserror::Error;

use crate::node::{NodeAddr, NodeRecord, RECORD_SIZE};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("requested {requested} node records but the region only backs {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },
    #[error("records of {record_size} bytes do not tile pages of {page_size} bytes")]
    RecordStraddlesPage { record_size: usize, page_size: usize },
    #[error(transparent)]
    Region(#[from] RegionError),
}

/// Fixed-capacity array of node records laid over the logical region.
///
/// Slots are read and written with plain memory accesses; residency is
/// handled by the region's fault trap.
pub struct NodePool<'a> {
    region: &'a mut MemoryRegion,
    base: NonNull<u8>,
    capacity: usize,
    len: usize,
}

impl<'a> NodePool<'a> {
    /// Acquires `region` and fills every slot it can back with a default
    /// record. Fails when `capacity_hint` is more than the region can hold.
    pub fn init(region: &'a mut MemoryRegion, capacity_hint: usize) -> Result<Self, PoolError> {
        let page_size = region.config().page_size;
        if page_size % RECORD_SIZE != 0 {
            return Err(PoolError::RecordStraddlesPage {
                record_size: RECORD_SIZE,
                page_size,
            });
        }
        let capacity = region.config().region_size() / RECORD_SIZE;
        if capacity_hint > capacity {
            return Err(PoolError::CapacityExceeded {
                requested: capacity_hint,
                capacity,
            });
        }

        let allocation = region.acquire()?;
        let mut pool = NodePool {
            region,
            base: allocation.base,
            capacity: allocation.bytes / RECORD_SIZE,
            len: 0,
        };
        let empty = NodeRecord::default().to_bytes();
        for addr in 0..pool.capacity {
            pool.write_slot(addr, &empty);
        }
        info!("Node pool initialized with capacity {}", pool.capacity);
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn region(&self) -> &MemoryRegion {
        self.region
    }

    fn slot(&self, addr: usize) -> *mut u8 {
        debug_assert!(addr < self.capacity);
        unsafe { self.base.as_ptr().add(addr * RECORD_SIZE) }
    }

    // Byte-wise volatile access: every byte may fault and be retried.
    fn read_slot(&self, addr: usize) -> [u8; RECORD_SIZE] {
        let src = self.slot(addr);
        let mut bytes = [0; RECORD_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = unsafe { src.add(i).read_volatile() };
        }
        bytes
    }

    fn write_slot(&mut self, addr: usize, bytes: &[u8; RECORD_SIZE]) {
        let dst = self.slot(addr);
        for (i, byte) in bytes.iter().enumerate() {
            unsafe { dst.add(i).write_volatile(*byte) };
        }
    }

    fn in_range(&self, addr: NodeAddr) -> bool {
        (addr as usize) < self.len
    }

    /// Appends `record` at the next free slot.
    pub fn create_node(&mut self, record: &NodeRecord) -> Result<NodeAddr, PoolError> {
        if self.len >= self.capacity {
            return Err(PoolError::CapacityExceeded {
                requested: self.len + 1,
                capacity: self.capacity,
            });
        }
        let addr = self.len;
        self.write_slot(addr, &record.to_bytes());
        self.len += 1;
        debug!("Node {} created", addr);
        Ok(addr as NodeAddr)
    }

    /// Record at `addr`, or a default record when `addr` was never created.
    pub fn get_node(&self, addr: NodeAddr) -> NodeRecord {
        if !self.in_range(addr) {
            warn!("Node address {} out of range (size {})", addr, self.len);
            return NodeRecord::default();
        }
        NodeRecord::from_bytes(&self.read_slot(addr as usize))
    }

    pub fn put_node(&mut self, addr: NodeAddr, record: &NodeRecord) {
        if !self.in_range(addr) {
            warn!("Node address {} out of range (size {})", addr, self.len);
            return;
        }
        self.write_slot(addr as usize, &record.to_bytes());
    }

    /// Clears the occupant and children of `addr`. The slot stays allocated.
    pub fn delete_node(&mut self, addr: NodeAddr) {
        if !self.in_range(addr) {
            warn!("Node address {} out of range (size {})", addr, self.len);
            return;
        }
        let boundary = self.get_node(addr).boundary;
        self.write_slot(addr as usize, &NodeRecord::with_boundary(boundary).to_bytes());
    }
}
