//! Advisory single-writer lock.
//!
//! One writer process per database path: `LockFile::acquire` takes an
//! exclusive, non-blocking `flock` on `<db>.lock`. Contention fails fast with
//! [`TernaError::Locked`]; writers never queue. The lock is released when the
//! guard drops (or the process dies, since the kernel releases `flock` with
//! the descriptor).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::types::{Result, TernaError};

/// Guard holding the exclusive writer lock for one database path.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Acquires the advisory lock, failing fast if another writer holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(TernaError::from)?;
        try_lock_exclusive(&file)?;
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<()> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Err(TernaError::Locked)
    } else {
        Err(TernaError::Io(err))
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> Result<()> {
    // Without flock the open-with-create itself is the best-effort guard.
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_fast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.lock");
        let held = LockFile::acquire(&path).unwrap();
        match LockFile::acquire(&path) {
            Err(TernaError::Locked) => {}
            other => panic!("expected Locked, got {other:?}"),
        }
        drop(held);
        LockFile::acquire(&path).unwrap();
    }
}
