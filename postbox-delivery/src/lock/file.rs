use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use postbox_common::internal;

use super::{LockGuard, ProcessLock};
use crate::LockError;

/// An advisory `flock(2)` on a file, effective across processes
///
/// The file is created if missing and never removed. The lock belongs to
/// the open file, so it is dropped by the kernel if the holder dies, and two
/// `FileLock`s on the same path exclude each other even within one process.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    // SAFETY: the descriptor is owned by `file`, which outlives this call
    let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

impl ProcessLock for FileLock {
    fn try_acquire(&self) -> Result<Option<LockGuard>, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| LockError::Open {
                path: self.path.clone(),
                source,
            })?;

        match flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(source) => {
                return Err(LockError::Lock {
                    path: self.path.clone(),
                    source,
                });
            }
        }

        let path = self.path.clone();
        Ok(Some(LockGuard::new(move || {
            if let Err(err) = flock(&file, libc::LOCK_UN) {
                internal!(level = WARN, "Failed to unlock {}: {err}", path.display());
            }
            drop(file);
        })))
    }
}
