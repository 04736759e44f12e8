mod page_table_entry;

pub use page_table_entry::{PageStatus, PageTableEntry};

/// Fixed set of per-page metadata, one entry per page of the region.
#[derive(Debug, Clone)]
pub struct PageTable {
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    /// Every page starts on secondary storage.
    pub fn init(num_pages: usize, page_size: usize) -> Self {
        let entries = (0..num_pages)
            .map(|page_number| PageTableEntry::on_secondary(page_number, page_size))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_entry(&self, page_number: usize) -> Option<&PageTableEntry> {
        self.entries.get(page_number)
    }

    pub(crate) fn get_entry_mut(&mut self, page_number: usize) -> Option<&mut PageTableEntry> {
        self.entries.get_mut(page_number)
    }

    pub fn status(&self, page_number: usize) -> Option<PageStatus> {
        Some(self.get_entry(page_number)?.status)
    }

    pub fn resident_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status.is_resident())
            .count()
    }

    /// Pages currently in `status`, in page order.
    pub fn pages_in(&self, status: PageStatus) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, entry)| entry.status == status)
            .map(|(page_number, _)| page_number)
    }

    /// Resident page with the oldest access tick; the lowest page number wins ties.
    pub fn least_recently_used(&self) -> Option<usize> {
        let mut oldest_page = None;
        let mut oldest_access = u64::MAX;
        for (page_number, entry) in self.entries.iter().enumerate() {
            if !entry.status.is_resident() {
                continue;
            }
            if oldest_page.is_none() || entry.last_access < oldest_access {
                oldest_access = entry.last_access;
                oldest_page = Some(page_number);
            }
        }
        oldest_page
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PageTableEntry> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<PageTableEntry> {
        self.entries.clone()
    }
}
