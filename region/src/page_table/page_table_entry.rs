use crate::platform::Protection;

/// Where the bytes of a page currently live and how far up the staircase it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// Data only in the swap file.
    OnSecondary,
    /// Data in the physical buffer, logical copy stale.
    Valid,
    /// Logical copy materialised but still protected.
    Available,
    /// Logical copy readable.
    Readable,
    /// Logical copy writable, newer than the physical buffer.
    Dirty,
}

impl PageStatus {
    pub fn is_resident(&self) -> bool {
        !matches!(self, PageStatus::OnSecondary)
    }

    /// Next step of the staircase and the access it grants on the logical page.
    /// `Dirty` has no successor: the write-back sweep turns it back into `Valid`
    /// before any page is advanced.
    pub fn advance(&self) -> Option<(PageStatus, Protection)> {
        match self {
            PageStatus::OnSecondary => Some((PageStatus::Valid, Protection::None)),
            PageStatus::Valid => Some((PageStatus::Available, Protection::None)),
            PageStatus::Available => Some((PageStatus::Readable, Protection::Read)),
            PageStatus::Readable => Some((PageStatus::Dirty, Protection::ReadWrite)),
            PageStatus::Dirty => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub status: PageStatus,
    /// Byte offset of the page inside the logical region.
    pub logical_offset: usize,
    /// Byte offset of the page inside the physical buffer.
    pub physical_offset: usize,
    pub access_count: u64,
    pub valid_count: u64,
    pub dirty_count: u64,
    pub avail_count: u64,
    pub read_count: u64,
    pub disk_count: u64,
    /// Fault tick of the most recent access.
    pub last_access: u64,
}

impl PageTableEntry {
    pub(super) fn on_secondary(page_number: usize, page_size: usize) -> Self {
        let offset = page_number * page_size;
        PageTableEntry {
            status: PageStatus::OnSecondary,
            logical_offset: offset,
            physical_offset: offset,
            access_count: 0,
            valid_count: 0,
            dirty_count: 0,
            avail_count: 0,
            read_count: 0,
            disk_count: 0,
            last_access: 0,
        }
    }

    pub(crate) fn touch(&mut self, tick: u64) {
        self.access_count += 1;
        self.last_access = tick;
    }

    /// Moves to `status`, bumping the counter that tracks entries into it.
    pub(crate) fn set_status(&mut self, status: PageStatus) {
        match status {
            PageStatus::OnSecondary => self.disk_count += 1,
            PageStatus::Valid => self.valid_count += 1,
            PageStatus::Available => self.avail_count += 1,
            PageStatus::Readable => self.read_count += 1,
            PageStatus::Dirty => self.dirty_count += 1,
        }
        self.status = status;
    }
}
