//! Scoped, blocking, whole-file advisory locking.
//!
//! Cache and data files may live on a shared filesystem, so every read or
//! write of one goes through a [`LockedFile`]: the advisory lock is acquired
//! (blocking) when the handle is opened and released deterministically when it
//! is dropped, even on error paths.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// A file handle holding a whole-file advisory lock for its lifetime.
pub struct LockedFile {
    file: File,
}

impl LockedFile {
    /// Open `path` for reading under a shared lock.
    ///
    /// Blocks until the lock is available.
    pub fn open_read(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    /// Open or create `path` for writing under an exclusive lock.
    ///
    /// Blocks until the lock is available. The file is truncated only after
    /// the lock is held, so a concurrent reader is never clobbered mid-read.
    pub fn create_write(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.lock()?;
        file.set_len(0)?;
        Ok(Self { file })
    }

    /// Access the underlying file handle.
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Read for LockedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }
}

impl Write for LockedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&self.file).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&self.file).flush()
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/storage/locked.rs"]
mod tests;
