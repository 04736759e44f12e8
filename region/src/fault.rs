//! The page-state machine driven by protection faults.
//!
//! Every fault first writes back all dirty pages and revokes access to the whole
//! region, then moves the faulting page exactly one step along
//! `OnSecondary -> Valid -> Available -> Readable -> Dirty`. Only a page-in can
//! evict, and it evicts the least recently used resident page.
//!
//! The handler never touches memory itself: all copying, swapping and protection
//! changes go through [`PageIo`], so the machine runs the same against the real
//! mapping and against a recording double in tests.

use std::io;

use log::{debug, trace};
use swap::SwapError;
use thiserror::Error;

use crate::{
    page_table::{PageStatus, PageTable},
    platform::Protection,
};

#[derive(Debug, Error)]
pub enum FaultError {
    #[error("page {0} is outside the page table")]
    PageOutOfRange(usize),
    #[error("page {0} is still dirty after the write-back sweep")]
    Inconsistent(usize),
    #[error("changing page protection failed: {0}")]
    Protection(#[from] io::Error),
    #[error(transparent)]
    Swap(#[from] SwapError),
}

pub trait PageIo {
    /// Copy the logical bytes of `page` into its physical slot.
    fn flush_to_physical(&mut self, page: usize) -> Result<(), FaultError>;
    /// Copy the physical bytes of `page` into the logical region. The page is
    /// left without access.
    fn load_logical(&mut self, page: usize) -> Result<(), FaultError>;
    fn swap_out(&mut self, page: usize) -> Result<(), FaultError>;
    fn swap_in(&mut self, page: usize) -> Result<(), FaultError>;
    fn protect_all(&mut self, protection: Protection) -> Result<(), FaultError>;
    fn protect(&mut self, page: usize, protection: Protection) -> Result<(), FaultError>;
}

#[derive(Debug)]
pub struct FaultHandler {
    resident_limit: f64,
    resident: usize,
    clock: u64,
}

impl FaultHandler {
    pub fn new(resident_limit: f64) -> Self {
        Self {
            resident_limit,
            resident: 0,
            clock: 0,
        }
    }

    pub fn resident(&self) -> usize {
        self.resident
    }

    /// Number of faults handled so far; also the last access tick handed out.
    pub fn faults(&self) -> u64 {
        self.clock
    }

    /// Resolves one fault on `page` and returns the access now granted on it.
    pub fn handle_fault<I: PageIo>(
        &mut self,
        table: &mut PageTable,
        io: &mut I,
        page: usize,
    ) -> Result<Protection, FaultError> {
        self.clock += 1;
        table
            .get_entry_mut(page)
            .ok_or(FaultError::PageOutOfRange(page))?
            .touch(self.clock);

        self.write_back(table, io)?;
        io.protect_all(Protection::None)?;

        let status = table.status(page).ok_or(FaultError::PageOutOfRange(page))?;
        let Some((next, protection)) = status.advance() else {
            return Err(FaultError::Inconsistent(page));
        };
        match status {
            PageStatus::OnSecondary => self.page_in(table, io, page)?,
            PageStatus::Valid => io.load_logical(page)?,
            _ => io.protect(page, protection)?,
        }
        if let Some(entry) = table.get_entry_mut(page) {
            entry.set_status(next);
        }
        trace!(
            "Fault #{} on page {}: {:?} -> {:?}",
            self.clock,
            page,
            status,
            next
        );
        Ok(protection)
    }

    /// Writes back every dirty page and evicts every resident one.
    pub fn flush_all<I: PageIo>(
        &mut self,
        table: &mut PageTable,
        io: &mut I,
    ) -> Result<(), FaultError> {
        self.write_back(table, io)?;
        io.protect_all(Protection::None)?;
        for page in 0..table.len() {
            let resident = table.status(page).map_or(false, |s| s.is_resident());
            if resident {
                self.evict(table, io, page)?;
            }
        }
        Ok(())
    }

    fn write_back<I: PageIo>(&mut self, table: &mut PageTable, io: &mut I) -> Result<(), FaultError> {
        for page in 0..table.len() {
            if table.status(page) != Some(PageStatus::Dirty) {
                continue;
            }
            io.flush_to_physical(page)?;
            if let Some(entry) = table.get_entry_mut(page) {
                entry.set_status(PageStatus::Valid);
            }
        }
        Ok(())
    }

    fn page_in<I: PageIo>(
        &mut self,
        table: &mut PageTable,
        io: &mut I,
        page: usize,
    ) -> Result<(), FaultError> {
        if (self.resident + 1) as f64 > self.resident_limit {
            if let Some(victim) = table.least_recently_used() {
                self.evict(table, io, victim)?;
                debug!("Page {} swapped out", victim);
            }
        }
        io.swap_in(page)?;
        self.resident += 1;
        Ok(())
    }

    fn evict<I: PageIo>(
        &mut self,
        table: &mut PageTable,
        io: &mut I,
        page: usize,
    ) -> Result<(), FaultError> {
        io.swap_out(page)?;
        if let Some(entry) = table.get_entry_mut(page) {
            entry.set_status(PageStatus::OnSecondary);
        }
        self.resident = self.resident.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Op {
        Flush(usize),
        Load(usize),
        Out(usize),
        In(usize),
        ProtectAll(Protection),
        Protect(usize, Protection),
    }

    #[derive(Default)]
    struct Recorder {
        ops: Vec<Op>,
        /// Page whose swap-in fails.
        broken: Option<usize>,
    }

    impl Recorder {
        fn take(&mut self) -> Vec<Op> {
            std::mem::take(&mut self.ops)
        }
    }

    impl PageIo for Recorder {
        fn flush_to_physical(&mut self, page: usize) -> Result<(), FaultError> {
            self.ops.push(Op::Flush(page));
            Ok(())
        }
        fn load_logical(&mut self, page: usize) -> Result<(), FaultError> {
            self.ops.push(Op::Load(page));
            Ok(())
        }
        fn swap_out(&mut self, page: usize) -> Result<(), FaultError> {
            self.ops.push(Op::Out(page));
            Ok(())
        }
        fn swap_in(&mut self, page: usize) -> Result<(), FaultError> {
            if self.broken == Some(page) {
                return Err(FaultError::Swap(SwapError::OverCapacity(page)));
            }
            self.ops.push(Op::In(page));
            Ok(())
        }
        fn protect_all(&mut self, protection: Protection) -> Result<(), FaultError> {
            self.ops.push(Op::ProtectAll(protection));
            Ok(())
        }
        fn protect(&mut self, page: usize, protection: Protection) -> Result<(), FaultError> {
            self.ops.push(Op::Protect(page, protection));
            Ok(())
        }
    }

    fn setup(num_pages: usize, ratio: f64) -> (FaultHandler, PageTable, Recorder) {
        (
            FaultHandler::new(num_pages as f64 * ratio),
            PageTable::init(num_pages, 512),
            Recorder::default(),
        )
    }

    #[test]
    fn staircase_needs_four_faults() {
        let (mut handler, mut table, mut io) = setup(4, 0.5);
        let granted: Vec<_> = (0..4)
            .map(|_| handler.handle_fault(&mut table, &mut io, 0).unwrap())
            .collect();
        assert_eq!(
            granted,
            vec![
                Protection::None,
                Protection::None,
                Protection::Read,
                Protection::ReadWrite
            ]
        );
        assert_eq!(table.status(0), Some(PageStatus::Dirty));
        assert_eq!(
            io.take(),
            vec![
                Op::ProtectAll(Protection::None),
                Op::In(0),
                Op::ProtectAll(Protection::None),
                Op::Load(0),
                Op::ProtectAll(Protection::None),
                Op::Protect(0, Protection::Read),
                Op::ProtectAll(Protection::None),
                Op::Protect(0, Protection::ReadWrite),
            ]
        );
        let entry = table.get_entry(0).unwrap();
        assert_eq!(entry.access_count, 4);
        assert_eq!(entry.last_access, 4);
        assert_eq!(handler.faults(), 4);
        assert_eq!(handler.resident(), 1);
    }

    #[test]
    fn every_fault_writes_back_dirty_pages() {
        let (mut handler, mut table, mut io) = setup(4, 1.0);
        for _ in 0..4 {
            handler.handle_fault(&mut table, &mut io, 0).unwrap();
        }
        io.take();
        handler.handle_fault(&mut table, &mut io, 1).unwrap();
        assert_eq!(
            io.take(),
            vec![
                Op::Flush(0),
                Op::ProtectAll(Protection::None),
                Op::In(1)
            ]
        );
        assert_eq!(table.status(0), Some(PageStatus::Valid));
        assert_eq!(table.get_entry(0).unwrap().valid_count, 2);
    }

    #[test]
    fn dirty_page_refault_restarts_at_valid() {
        let (mut handler, mut table, mut io) = setup(2, 1.0);
        for _ in 0..4 {
            handler.handle_fault(&mut table, &mut io, 0).unwrap();
        }
        io.take();
        let granted = handler.handle_fault(&mut table, &mut io, 0).unwrap();
        assert_eq!(granted, Protection::None);
        assert_eq!(table.status(0), Some(PageStatus::Available));
        assert_eq!(
            io.take(),
            vec![
                Op::Flush(0),
                Op::ProtectAll(Protection::None),
                Op::Load(0)
            ]
        );
    }

    #[test]
    fn page_in_evicts_least_recently_used() {
        let (mut handler, mut table, mut io) = setup(4, 0.5);
        handler.handle_fault(&mut table, &mut io, 0).unwrap();
        handler.handle_fault(&mut table, &mut io, 1).unwrap();
        // Page 0 becomes the most recently used.
        handler.handle_fault(&mut table, &mut io, 0).unwrap();
        io.take();

        handler.handle_fault(&mut table, &mut io, 2).unwrap();
        assert_eq!(
            io.take(),
            vec![
                Op::ProtectAll(Protection::None),
                Op::Out(1),
                Op::In(2)
            ]
        );
        assert_eq!(table.status(1), Some(PageStatus::OnSecondary));
        assert_eq!(table.get_entry(1).unwrap().disk_count, 1);
        assert_eq!(table.status(0), Some(PageStatus::Available));
        assert_eq!(handler.resident(), 2);
    }

    #[test]
    fn older_readable_page_goes_before_newer_valid_page() {
        let (mut handler, mut table, mut io) = setup(4, 0.5);
        for _ in 0..3 {
            handler.handle_fault(&mut table, &mut io, 0).unwrap();
        }
        handler.handle_fault(&mut table, &mut io, 1).unwrap();
        assert_eq!(table.status(0), Some(PageStatus::Readable));
        assert_eq!(table.status(1), Some(PageStatus::Valid));
        io.take();

        handler.handle_fault(&mut table, &mut io, 2).unwrap();
        assert_eq!(
            io.take(),
            vec![
                Op::ProtectAll(Protection::None),
                Op::Out(0),
                Op::In(2)
            ]
        );
        assert_eq!(table.status(0), Some(PageStatus::OnSecondary));
        assert_eq!(table.status(1), Some(PageStatus::Valid));
        assert_eq!(table.status(2), Some(PageStatus::Valid));
    }

    #[test]
    fn failed_swap_in_leaves_page_on_secondary() {
        let (mut handler, mut table, mut io) = setup(4, 0.5);
        handler.handle_fault(&mut table, &mut io, 0).unwrap();
        handler.handle_fault(&mut table, &mut io, 1).unwrap();
        io.broken = Some(2);
        io.take();

        assert!(matches!(
            handler.handle_fault(&mut table, &mut io, 2),
            Err(FaultError::Swap(SwapError::OverCapacity(2)))
        ));
        // The victim was already written out before the read failed.
        assert_eq!(io.take(), vec![Op::ProtectAll(Protection::None), Op::Out(0)]);
        assert_eq!(table.status(2), Some(PageStatus::OnSecondary));
        assert_eq!(table.status(0), Some(PageStatus::OnSecondary));
        assert_eq!(table.get_entry(2).unwrap().valid_count, 0);
        assert_eq!(handler.resident(), 1);
        assert_eq!(table.resident_count(), handler.resident());

        io.broken = None;
        handler.handle_fault(&mut table, &mut io, 2).unwrap();
        assert_eq!(table.status(2), Some(PageStatus::Valid));
        assert_eq!(handler.resident(), 2);
        assert_eq!(table.resident_count(), handler.resident());
    }

    #[test]
    fn no_eviction_below_limit() {
        let (mut handler, mut table, mut io) = setup(4, 1.0);
        for page in 0..4 {
            handler.handle_fault(&mut table, &mut io, page).unwrap();
        }
        assert!(!io.take().iter().any(|op| matches!(op, Op::Out(_))));
        assert_eq!(table.resident_count(), 4);
    }

    #[test]
    fn random_faults_keep_invariants() {
        let num_pages = 10;
        let ratio = 0.5;
        let limit = (num_pages as f64 * ratio).floor() as usize;
        let (mut handler, mut table, mut io) = setup(num_pages, ratio);
        let mut rng = rand::thread_rng();

        for _ in 0..2000 {
            let before = table.snapshot();
            let page = rng.gen_range(0..num_pages);
            let victim = table.least_recently_used();
            handler.handle_fault(&mut table, &mut io, page).unwrap();
            let ops = io.take();

            assert!(table.resident_count() <= limit);
            assert_eq!(table.resident_count(), handler.resident());

            for op in &ops {
                if let Op::Out(evicted) = op {
                    assert_eq!(Some(*evicted), victim);
                }
            }

            for (p, (old, new)) in before.iter().zip(table.iter()).enumerate() {
                use PageStatus::*;
                let allowed = match (old.status, new.status) {
                    (a, b) if a == b => true,
                    (OnSecondary, Valid) => p == page,
                    (Valid, Available) | (Available, Readable) | (Readable, Dirty) => p == page,
                    // Write-back of a dirty page, possibly followed by its own step.
                    (Dirty, Valid) => true,
                    (Dirty, Available) => p == page,
                    (_, OnSecondary) => p != page,
                    _ => false,
                };
                assert!(allowed, "page {}: {:?} -> {:?}", p, old.status, new.status);
            }
        }
    }

    #[test]
    fn fault_outside_table() {
        let (mut handler, mut table, mut io) = setup(2, 1.0);
        assert!(matches!(
            handler.handle_fault(&mut table, &mut io, 2),
            Err(FaultError::PageOutOfRange(2))
        ));
    }

    #[test]
    fn flush_all_evicts_everything() {
        let (mut handler, mut table, mut io) = setup(4, 1.0);
        for _ in 0..4 {
            handler.handle_fault(&mut table, &mut io, 0).unwrap();
        }
        handler.handle_fault(&mut table, &mut io, 2).unwrap();
        handler.handle_fault(&mut table, &mut io, 2).unwrap();
        io.take();

        handler.flush_all(&mut table, &mut io).unwrap();
        assert_eq!(
            io.take(),
            vec![
                Op::ProtectAll(Protection::None),
                Op::Out(0),
                Op::Out(2)
            ]
        );
        assert_eq!(table.resident_count(), 0);
        assert_eq!(handler.resident(), 0);
    }
}
