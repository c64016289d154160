use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use log::warn;

use crate::error::DbResult;
use crate::sync::gateway::GatewayPass;
use crate::utils::HandyRwLock;

use super::{DatasetCore, TableEntry, TableKind};

/// A sharable session: borrows one data table for reading.
///
/// The session holds the dataset cooperative lock and the table sharable
/// lock, and dwells in the gateway's middle room for its whole window, so
/// a committing writer orders itself against it. Only the read family of
/// table operations belongs in a read session; `get_mut` exists because
/// tree range reads go through the node store, not to allow mutation.
pub struct SessionRead<T: TableKind> {
    core: Arc<DatasetCore<T>>,
    entry: TableEntry<T>,
    key: u64,
    pass: Option<GatewayPass>,
    done: bool,
}

impl<T: TableKind> std::fmt::Debug for SessionRead<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRead")
            .field("key", &self.key)
            .field("done", &self.done)
            .finish()
    }
}

impl<T: TableKind> SessionRead<T> {
    pub(crate) fn open(core: Arc<DatasetCore<T>>, key: u64) -> DbResult<Self> {
        let entry = core.table_entry(key)?;
        core.locker.lock_sharable()?;
        if let Err(e) = entry.locker.lock_sharable() {
            let _ = core.locker.unlock_sharable();
            return Err(e);
        }
        // reconcile with writers of other processes before reading
        if let Err(e) = entry.table.wl().refresh() {
            let _ = entry.locker.unlock_sharable();
            let _ = core.locker.unlock_sharable();
            return Err(e);
        }
        // locks first, then the gateway: an occupant of the middle room
        // never waits on a lock
        let mut pass = core.gateway.go_first_room();
        pass.go_middle_room();
        Ok(SessionRead {
            core,
            entry,
            key,
            pass: Some(pass),
            done: false,
        })
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn get(&self) -> RwLockReadGuard<'_, T> {
        self.entry.table.rl()
    }

    /// Mutable access for read operations that traverse the embedded
    /// tree; a read session must not call mutating table operations.
    pub fn get_mut(&self) -> RwLockWriteGuard<'_, T> {
        self.entry.table.wl()
    }

    pub fn stop(mut self) -> DbResult {
        self.finish()
    }

    pub fn cancel(mut self) -> DbResult {
        self.finish()
    }

    fn finish(&mut self) -> DbResult {
        if self.done {
            return Ok(());
        }
        self.done = true;
        if let Some(mut pass) = self.pass.take() {
            pass.go_last_room();
            pass.leave_last_room();
        }
        self.entry.locker.unlock_sharable()?;
        self.core.locker.unlock_sharable()?;
        Ok(())
    }
}

impl<T: TableKind> Drop for SessionRead<T> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("read session drop: {}", e);
        }
    }
}

/// A scoped session: borrows one data table for writing.
///
/// Construction takes the dataset cooperative lock, then the per-table
/// exclusive lock, and joins the depth-counted file transaction. `stop`
/// (or drop-as-cancel) settles the table key and leaves the transaction;
/// under an active lazy transaction the table lock is donated to it
/// instead of released, so all batched writes unlock together.
pub struct SessionWrite<T: TableKind> {
    core: Arc<DatasetCore<T>>,
    entry: TableEntry<T>,
    key: u64,
    deferred: bool,
    done: bool,
}

impl<T: TableKind> std::fmt::Debug for SessionWrite<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWrite")
            .field("key", &self.key)
            .field("deferred", &self.deferred)
            .field("done", &self.done)
            .finish()
    }
}

impl<T: TableKind> SessionWrite<T> {
    pub(crate) fn open(core: Arc<DatasetCore<T>>, key: u64) -> DbResult<Self> {
        let entry = core.table_entry(key)?;
        let deferred = core.lazy_active();
        core.locker.lock_sharable()?;
        if let Err(e) = entry.locker.lock() {
            let _ = core.locker.unlock_sharable();
            return Err(e);
        }
        if let Err(e) = core.tx_start() {
            let _ = entry.locker.unlock();
            let _ = core.locker.unlock_sharable();
            return Err(e);
        }
        let prepared = {
            let mut table = entry.table.wl();
            table.refresh().map(|_| table.start())
        };
        if let Err(e) = prepared {
            let _ = core.tx_cancel();
            let _ = entry.locker.unlock();
            let _ = core.locker.unlock_sharable();
            return Err(e);
        }
        Ok(SessionWrite {
            core,
            entry,
            key,
            deferred,
            done: false,
        })
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn get(&self) -> RwLockReadGuard<'_, T> {
        self.entry.table.rl()
    }

    pub fn get_mut(&self) -> RwLockWriteGuard<'_, T> {
        self.entry.table.wl()
    }

    /// Close the session early: its changes join the in-flight commit.
    /// Under a lazy transaction the table lock stays held until the
    /// transaction terminates.
    pub fn close(&mut self) -> DbResult {
        if self.done {
            return Ok(());
        }
        self.done = true;
        // a session that outlived its lazy transaction settles on its own
        let deferred = self.deferred && self.core.lazy_active();
        let update_result = self.entry.table.wl().update();
        match update_result {
            Ok(()) => {
                if deferred {
                    self.core.donate(&self.entry);
                }
                let result = self.core.tx_stop();
                self.release(deferred);
                result
            }
            Err(e) => {
                let _ = self.do_rollback(deferred);
                Err(e)
            }
        }
    }

    pub fn stop(mut self) -> DbResult {
        self.close()
    }

    pub fn cancel(mut self) -> DbResult {
        if self.done {
            return Ok(());
        }
        self.done = true;
        self.rollback()
    }

    /// Leave the transaction rolling back, then restore the table's
    /// derived state from the (possibly already restored) bytes.
    fn rollback(&mut self) -> DbResult {
        let deferred = self.deferred && self.core.lazy_active();
        self.do_rollback(deferred)
    }

    fn do_rollback(&mut self, deferred: bool) -> DbResult {
        if deferred {
            self.core.donate(&self.entry);
        }
        let canceled = self.core.tx_cancel();
        let recovered = self.entry.table.wl().recovery();
        self.release(deferred);
        canceled.and(recovered)
    }

    fn release(&mut self, deferred: bool) {
        if !deferred {
            if let Err(e) = self.entry.locker.unlock() {
                warn!("write session release: {}", e);
            }
        }
        if let Err(e) = self.core.locker.unlock_sharable() {
            warn!("write session release: {}", e);
        }
    }
}

impl<T: TableKind> Drop for SessionWrite<T> {
    fn drop(&mut self) {
        if !self.done {
            self.done = true;
            if let Err(e) = self.rollback() {
                warn!("write session drop: {}", e);
            }
        }
    }
}
