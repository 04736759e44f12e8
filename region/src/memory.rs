use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    ptr::NonNull,
    slice,
};

use crate::RegionError;

/// Page-aligned buffer holding the bytes of resident pages.
#[derive(Debug)]
pub struct PhysicalMemory {
    buffer: NonNull<u8>,
    layout: Layout,
    page_size: usize,
    num_pages: usize,
}

impl PhysicalMemory {
    pub fn create(page_size: usize, num_pages: usize) -> Result<Self, RegionError> {
        let layout = Layout::from_size_align(page_size * num_pages, page_size)
            .map_err(|e| RegionError::Allocation(e.to_string()))?;
        let buffer = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or_else(|| {
            RegionError::Allocation(format!(
                "cannot allocate {} bytes of physical memory",
                layout.size()
            ))
        })?;
        Ok(Self {
            buffer,
            layout,
            page_size,
            num_pages,
        })
    }

    pub fn page(&self, page_number: usize) -> &[u8] {
        assert!(page_number < self.num_pages, "Physical page out of range");
        unsafe {
            slice::from_raw_parts(
                self.buffer.as_ptr().add(page_number * self.page_size),
                self.page_size,
            )
        }
    }

    pub fn page_mut(&mut self, page_number: usize) -> &mut [u8] {
        assert!(page_number < self.num_pages, "Physical page out of range");
        unsafe {
            slice::from_raw_parts_mut(
                self.buffer.as_ptr().add(page_number * self.page_size),
                self.page_size,
            )
        }
    }
}

impl Drop for PhysicalMemory {
    fn drop(&mut self) {
        unsafe { dealloc(self.buffer.as_ptr(), self.layout) }
    }
}
