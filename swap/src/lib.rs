use std::{
    fs::{remove_file, File},
    io,
    os::unix::fs::{FileExt, OpenOptionsExt},
    path::{Path, PathBuf},
};

use log::{info, trace, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("cannot create swap file {path:?}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("page {0} is beyond the swap capacity")]
    OverCapacity(usize),
    #[error("expected a buffer of {expected} bytes, got {actual}")]
    IncorrectPageSize { expected: usize, actual: usize },
    #[error("swap I/O on page {page} failed: {source}")]
    Io { page: usize, source: io::Error },
}

/// Backing file for pages that are not resident.
/// Slot `n` lives at byte offset `n * page_size`; there is no header.
#[derive(Debug)]
pub struct SwapStore {
    path: PathBuf,
    file: Option<File>,
    page_size: usize,
    num_pages: usize,
    retain: bool,
}

pub fn make_name(dir: &Path, pid: u32) -> PathBuf {
    dir.join(format!("smvswap.{}", pid))
}

impl SwapStore {
    /// Creates (or truncates) the swap file of the current process inside `dir`.
    /// The directory must already exist.
    pub fn create(dir: &Path, page_size: usize, num_pages: usize) -> Result<Self, SwapError> {
        let path = make_name(dir, std::process::id());
        let file = File::options()
            .truncate(true)
            .write(true)
            .read(true)
            .create(true)
            .mode(0o600)
            .open(&path)
            .map_err(|source| SwapError::Create {
                path: path.clone(),
                source,
            })?;
        file.set_len((page_size * num_pages) as u64)
            .map_err(|source| SwapError::Create {
                path: path.clone(),
                source,
            })?;
        info!(
            "Swap file {:?} created with {} pages of {} bytes",
            path, num_pages, page_size
        );
        Ok(Self {
            path,
            file: Some(file),
            page_size,
            num_pages,
            retain: false,
        })
    }

    /// Keep the file on disk when the store is closed.
    pub fn retain_on_close(&mut self, retain: bool) {
        self.retain = retain;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    fn check(&self, page: usize, len: usize) -> Result<&File, SwapError> {
        if page >= self.num_pages {
            return Err(SwapError::OverCapacity(page));
        }
        if len != self.page_size {
            return Err(SwapError::IncorrectPageSize {
                expected: self.page_size,
                actual: len,
            });
        }
        self.file.as_ref().ok_or_else(|| SwapError::Io {
            page,
            source: io::Error::new(io::ErrorKind::Other, "swap file is closed"),
        })
    }

    /// Fills `buf` with the content of slot `page`. Never allocates, so it is
    /// usable from the fault trap.
    pub fn read_page(&self, page: usize, buf: &mut [u8]) -> Result<(), SwapError> {
        let file = self.check(page, buf.len())?;
        trace!("Reading swap page[{}]", page);
        file.read_exact_at(buf, (page * self.page_size) as u64)
            .map_err(|source| SwapError::Io { page, source })
    }

    pub fn write_page(&self, page: usize, buf: &[u8]) -> Result<(), SwapError> {
        let file = self.check(page, buf.len())?;
        trace!("Writing swap page[{}]", page);
        file.write_all_at(buf, (page * self.page_size) as u64)
            .map_err(|source| SwapError::Io { page, source })
    }

    /// Syncs and closes the file, removing it unless it is retained.
    /// Calling it again does nothing.
    pub fn close(&mut self) -> Result<(), SwapError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        file.sync_all()
            .map_err(|source| SwapError::Io { page: 0, source })?;
        drop(file);
        if !self.retain {
            if let Err(e) = remove_file(&self.path) {
                warn!("Cannot remove swap file {:?}: {}", self.path, e);
            }
        }
        info!("Swap file {:?} closed", self.path);
        Ok(())
    }
}

impl Drop for SwapStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing swap store failed: {}", e);
        }
    }
}
