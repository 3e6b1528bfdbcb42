//! Cache slot locks
//!
//! Exclusive `flock`-style locks that serialise processes sharing a cache
//! directory. Lock files are left in place after release: unlinking a lock
//! file another process is blocked on would let a third process lock a
//! fresh inode and run concurrently with it. The OS drops the lock when the
//! holder exits, so a crashed build never leaves a slot stuck.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::CacheError;

fn open_lock_file(lock_path: &Path) -> Result<File, CacheError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CacheError::new("lock", parent, e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| CacheError::new("lock", lock_path, e))
}

/// Block until the lock at `lock_path` is held.
/// Returns a guard that releases the lock when dropped.
pub fn acquire_slot_lock(lock_path: &Path) -> Result<SlotLock, CacheError> {
    let file = open_lock_file(lock_path)?;
    file.lock_exclusive()
        .map_err(|e| CacheError::new("lock", lock_path, e))?;
    Ok(SlotLock { file })
}

/// RAII guard for a slot lock
#[derive(Debug)]
pub struct SlotLock {
    file: File,
}

impl Drop for SlotLock {
    fn drop(&mut self) {
        // Closing the file would release it too; unlock explicitly so the
        // slot frees up even if the handle lingers.
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lock_acquired_successfully() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("nested/widget.jar.lock");

        let _lock = acquire_slot_lock(&lock_path).unwrap();
        assert!(lock_path.exists());
    }

    #[test]
    fn test_lock_file_kept_after_drop() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("widget.jar.lock");

        {
            let _lock = acquire_slot_lock(&lock_path).unwrap();
        }
        assert!(lock_path.exists());
        // and it can be taken again
        let other = File::open(&lock_path).unwrap();
        assert!(other.try_lock_exclusive().is_ok());
    }

    #[test]
    fn test_concurrent_lock_contended() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("widget.jar.lock");

        let _lock1 = acquire_slot_lock(&lock_path).unwrap();
        let other = File::open(&lock_path).unwrap();
        assert!(other.try_lock_exclusive().is_err());
    }

    #[test]
    fn test_blocking_lock_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("widget.jar.lock");
        let first = acquire_slot_lock(&lock_path).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let acquired = Arc::clone(&acquired);
            let lock_path = lock_path.clone();
            std::thread::spawn(move || {
                let _lock = acquire_slot_lock(&lock_path).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(first);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
