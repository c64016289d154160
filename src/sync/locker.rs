use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::warn;

use crate::consts::LOCK_TIMEOUT;
use crate::error::{DbError, DbResult};

use super::shared_lock::RwLockable;

struct LockerCounts {
    scoped: u32,
    sharable: u32,
}

/// The reentrant locker over a named shared lock.
///
/// Reentrancy is tracked per process (the counters are shared by every
/// session of this process on the same table): an exclusive holder may
/// re-acquire exclusively, and a sharable request by an exclusive holder
/// degrades to another exclusive hold. True sharable-into-exclusive
/// upgrades are refused. The underlying primitive is hit only on the first
/// acquisition and the last release.
pub struct Locker {
    name: String,
    lock: Arc<dyn RwLockable>,
    counts: Mutex<LockerCounts>,
}

impl Locker {
    pub fn new(name: &str, lock: Arc<dyn RwLockable>) -> Self {
        Locker {
            name: name.to_string(),
            lock,
            counts: Mutex::new(LockerCounts {
                scoped: 0,
                sharable: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scoped_count(&self) -> u32 {
        self.counts.lock().unwrap().scoped
    }

    pub fn sharable_count(&self) -> u32 {
        self.counts.lock().unwrap().sharable
    }

    pub fn lock(&self) -> DbResult {
        self.lock_timed(LOCK_TIMEOUT)
    }

    pub fn lock_timed(&self, timeout: Duration) -> DbResult {
        let mut counts = self.counts.lock().unwrap();
        if counts.scoped > 0 {
            counts.scoped += 1;
            return Ok(());
        }
        if counts.sharable > 0 {
            return Err(DbError::lock(&format!(
                "{}: upgrade from a sharable lock is not supported",
                self.name
            )));
        }
        if !self.lock.timed_lock(timeout) {
            return Err(DbError::lock(&format!(
                "{}: exclusive lock timeout",
                self.name
            )));
        }
        counts.scoped = 1;
        Ok(())
    }

    pub fn unlock(&self) -> DbResult {
        let mut counts = self.counts.lock().unwrap();
        if counts.scoped == 0 {
            return Err(DbError::bug(&format!(
                "{}: unlock without the exclusive lock",
                self.name
            )));
        }
        counts.scoped -= 1;
        if counts.scoped == 0 {
            self.lock.unlock();
        }
        Ok(())
    }

    pub fn lock_sharable(&self) -> DbResult {
        self.lock_sharable_timed(LOCK_TIMEOUT)
    }

    pub fn lock_sharable_timed(&self, timeout: Duration) -> DbResult {
        let mut counts = self.counts.lock().unwrap();
        if counts.scoped > 0 {
            // degrade: the exclusive holder keeps its exclusive hold
            counts.scoped += 1;
            return Ok(());
        }
        if counts.sharable > 0 {
            counts.sharable += 1;
            return Ok(());
        }
        if !self.lock.timed_lock_sharable(timeout) {
            return Err(DbError::lock(&format!(
                "{}: sharable lock timeout",
                self.name
            )));
        }
        counts.sharable = 1;
        Ok(())
    }

    pub fn unlock_sharable(&self) -> DbResult {
        let mut counts = self.counts.lock().unwrap();
        if counts.scoped > 0 {
            // the matching lock_sharable was degraded to an exclusive hold
            counts.scoped -= 1;
            if counts.scoped == 0 {
                self.lock.unlock();
            }
            return Ok(());
        }
        if counts.sharable == 0 {
            return Err(DbError::bug(&format!(
                "{}: unlock_sharable without a lock",
                self.name
            )));
        }
        counts.sharable -= 1;
        if counts.sharable == 0 {
            self.lock.unlock_sharable();
        }
        Ok(())
    }

    pub fn scoped_guard(self: &Arc<Self>) -> DbResult<ScopedGuard> {
        self.lock()?;
        Ok(ScopedGuard {
            locker: Arc::clone(self),
        })
    }

    pub fn sharable_guard(self: &Arc<Self>) -> DbResult<SharableGuard> {
        self.lock_sharable()?;
        Ok(SharableGuard {
            locker: Arc::clone(self),
        })
    }
}

/// Owns one exclusive hold of a locker.
pub struct ScopedGuard {
    locker: Arc<Locker>,
}

impl Drop for ScopedGuard {
    fn drop(&mut self) {
        if let Err(e) = self.locker.unlock() {
            warn!("{}", e);
        }
    }
}

/// Owns one sharable hold of a locker.
pub struct SharableGuard {
    locker: Arc<Locker>,
}

impl Drop for SharableGuard {
    fn drop(&mut self) {
        if let Err(e) = self.locker.unlock_sharable() {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sync::shared_lock::OrderedSharedLock;

    fn locker() -> Locker {
        Locker::new("test", Arc::new(OrderedSharedLock::new()))
    }

    #[test]
    fn test_exclusive_reentry() {
        let locker = locker();
        locker.lock().unwrap();
        locker.lock().unwrap();
        assert_eq!(locker.scoped_count(), 2);
        locker.unlock().unwrap();
        assert_eq!(locker.scoped_count(), 1);
        locker.unlock().unwrap();
        assert_eq!(locker.scoped_count(), 0);
        assert_eq!(locker.unlock().unwrap_err().kind(), ErrorKind::Bug);
    }

    #[test]
    fn test_sharable_degrades_under_exclusive() {
        let locker = locker();
        locker.lock().unwrap();
        // granted immediately, but as an exclusive hold
        locker.lock_sharable().unwrap();
        assert_eq!(locker.scoped_count(), 2);
        assert_eq!(locker.sharable_count(), 0);
        locker.unlock_sharable().unwrap();
        locker.unlock().unwrap();
        assert_eq!(locker.scoped_count(), 0);
    }

    #[test]
    fn test_sharable_reentry_and_upgrade_refusal() {
        let locker = locker();
        locker.lock_sharable().unwrap();
        locker.lock_sharable().unwrap();
        assert_eq!(locker.sharable_count(), 2);

        let err = locker.lock_timed(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lock);

        locker.unlock_sharable().unwrap();
        locker.unlock_sharable().unwrap();
        locker.lock().unwrap();
        locker.unlock().unwrap();
    }

    #[test]
    fn test_guards_release_on_drop() {
        let locker = Arc::new(locker());
        {
            let _guard = locker.scoped_guard().unwrap();
            assert_eq!(locker.scoped_count(), 1);
        }
        assert_eq!(locker.scoped_count(), 0);
        {
            let _guard = locker.sharable_guard().unwrap();
            assert_eq!(locker.sharable_count(), 1);
        }
        assert_eq!(locker.sharable_count(), 0);
    }
}
