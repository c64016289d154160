use std::sync::Arc;

use log::warn;

use crate::error::{DbError, DbResult};

use super::session::SessionWrite;
use super::{DatasetCore, TableKind};

/// The uniform transaction surface: what a global transaction drives on
/// each of its children.
pub trait Transact {
    fn start(&mut self) -> DbResult;
    fn stop(&mut self) -> DbResult;
    fn cancel(&mut self) -> DbResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Active,
    Done,
}

/// A dataset-wide transaction: the exclusive dataset lock plus the file
/// transaction. Nested transactions are observed by the depth counter;
/// only the outermost one drives the file. Dropping an active transaction
/// cancels it.
pub struct DatasetTransaction<T: TableKind> {
    core: Arc<DatasetCore<T>>,
    phase: Phase,
}

impl<T: TableKind> DatasetTransaction<T> {
    /// An idle transaction for attaching to a global one.
    pub(crate) fn idle(core: Arc<DatasetCore<T>>) -> Self {
        DatasetTransaction { core, phase: Phase::Idle }
    }

    /// A started transaction.
    pub(crate) fn begin(core: Arc<DatasetCore<T>>) -> DbResult<Self> {
        let mut transaction = Self::idle(core);
        Transact::start(&mut transaction)?;
        Ok(transaction)
    }

    pub fn stop(mut self) -> DbResult {
        Transact::stop(&mut self)
    }

    pub fn cancel(mut self) -> DbResult {
        Transact::cancel(&mut self)
    }
}

impl<T: TableKind> Transact for DatasetTransaction<T> {
    fn start(&mut self) -> DbResult {
        if self.phase != Phase::Idle {
            return Err(DbError::bug("transaction is already started"));
        }
        self.core.locker.lock()?;
        if let Err(e) = self.core.tx_start() {
            let _ = self.core.locker.unlock();
            return Err(e);
        }
        self.phase = Phase::Active;
        Ok(())
    }

    fn stop(&mut self) -> DbResult {
        if self.phase != Phase::Active {
            return Err(DbError::bug("transaction stop without a start"));
        }
        self.phase = Phase::Done;
        let result = self.core.tx_stop();
        if let Err(e) = self.core.locker.unlock() {
            warn!("transaction stop: {}", e);
        }
        result
    }

    fn cancel(&mut self) -> DbResult {
        if self.phase != Phase::Active {
            return Err(DbError::bug("transaction cancel without a start"));
        }
        self.phase = Phase::Done;
        let result = self.core.tx_cancel();
        if let Err(e) = self.core.locker.unlock() {
            warn!("transaction cancel: {}", e);
        }
        result
    }
}

impl<T: TableKind> Drop for DatasetTransaction<T> {
    fn drop(&mut self) {
        if self.phase == Phase::Active {
            if let Err(e) = Transact::cancel(self) {
                warn!("transaction drop: {}", e);
            }
        }
    }
}

/// The lazy transaction: a cooperative (sharable) dataset lock, so other
/// processes may keep reading. Write sessions opened under it are
/// retained (their table locks release only when the transaction
/// terminates) and all their writes commit as one file transaction at
/// `stop`. Dropping an active lazy transaction cancels everything.
pub struct LazyTransaction<T: TableKind> {
    core: Arc<DatasetCore<T>>,
    phase: Phase,
}

impl<T: TableKind> LazyTransaction<T> {
    pub(crate) fn idle(core: Arc<DatasetCore<T>>) -> Self {
        LazyTransaction { core, phase: Phase::Idle }
    }

    pub(crate) fn begin(core: Arc<DatasetCore<T>>) -> DbResult<Self> {
        let mut transaction = Self::idle(core);
        Transact::start(&mut transaction)?;
        Ok(transaction)
    }

    /// A write session inside this transaction. Closing it early flushes
    /// its changes into the batched commit; the table lock stays held.
    pub fn session_wr(&mut self, key: u64) -> DbResult<SessionWrite<T>> {
        if self.phase != Phase::Active {
            return Err(DbError::bug("session under a terminated lazy transaction"));
        }
        SessionWrite::open(Arc::clone(&self.core), key)
    }

    pub fn stop(mut self) -> DbResult {
        Transact::stop(&mut self)
    }

    pub fn cancel(mut self) -> DbResult {
        Transact::cancel(&mut self)
    }
}

impl<T: TableKind> Transact for LazyTransaction<T> {
    fn start(&mut self) -> DbResult {
        if self.phase != Phase::Idle {
            return Err(DbError::bug("lazy transaction is already started"));
        }
        self.core.lazy_start()?;
        self.phase = Phase::Active;
        Ok(())
    }

    fn stop(&mut self) -> DbResult {
        if self.phase != Phase::Active {
            return Err(DbError::bug("lazy stop without a start"));
        }
        self.phase = Phase::Done;
        self.core.lazy_finish(false)
    }

    fn cancel(&mut self) -> DbResult {
        if self.phase != Phase::Active {
            return Err(DbError::bug("lazy cancel without a start"));
        }
        self.phase = Phase::Done;
        self.core.lazy_finish(true)
    }
}

impl<T: TableKind> Drop for LazyTransaction<T> {
    fn drop(&mut self) {
        if self.phase == Phase::Active {
            if let Err(e) = Transact::cancel(self) {
                warn!("lazy transaction drop: {}", e);
            }
        }
    }
}

/// A transaction over several datasets: children attach while idle and
/// then start, stop and cancel as one. A failing child stop cancels the
/// remainder so the group never half-commits silently.
pub struct GlobalTransaction {
    children: Vec<Box<dyn Transact>>,
    phase: Phase,
}

impl GlobalTransaction {
    pub fn new() -> Self {
        GlobalTransaction {
            children: Vec::new(),
            phase: Phase::Idle,
        }
    }

    pub fn attach(&mut self, child: Box<dyn Transact>) -> DbResult {
        if self.phase != Phase::Idle {
            return Err(DbError::bug("attach to a started global transaction"));
        }
        self.children.push(child);
        Ok(())
    }

    pub fn stop(mut self) -> DbResult {
        Transact::stop(&mut self)
    }

    pub fn cancel(mut self) -> DbResult {
        Transact::cancel(&mut self)
    }

    fn cancel_from(&mut self, from: usize) {
        for child in self.children.iter_mut().skip(from) {
            if let Err(e) = child.cancel() {
                warn!("global cancel: {}", e);
            }
        }
    }
}

impl Default for GlobalTransaction {
    fn default() -> Self {
        GlobalTransaction::new()
    }
}

impl Transact for GlobalTransaction {
    fn start(&mut self) -> DbResult {
        if self.phase != Phase::Idle {
            return Err(DbError::bug("global transaction is already started"));
        }
        for at in 0..self.children.len() {
            if let Err(e) = self.children[at].start() {
                // roll the started prefix back
                for child in self.children.iter_mut().take(at) {
                    if let Err(e) = child.cancel() {
                        warn!("global start unwind: {}", e);
                    }
                }
                self.phase = Phase::Done;
                return Err(e);
            }
        }
        self.phase = Phase::Active;
        Ok(())
    }

    fn stop(&mut self) -> DbResult {
        if self.phase != Phase::Active {
            return Err(DbError::bug("global stop without a start"));
        }
        self.phase = Phase::Done;
        for at in 0..self.children.len() {
            if let Err(e) = self.children[at].stop() {
                self.cancel_from(at + 1);
                return Err(e);
            }
        }
        Ok(())
    }

    fn cancel(&mut self) -> DbResult {
        if self.phase != Phase::Active {
            return Err(DbError::bug("global cancel without a start"));
        }
        self.phase = Phase::Done;
        let mut result = Ok(());
        for child in self.children.iter_mut() {
            if let Err(e) = child.cancel() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

impl Drop for GlobalTransaction {
    fn drop(&mut self) {
        if self.phase == Phase::Active {
            if let Err(e) = Transact::cancel(self) {
                warn!("global transaction drop: {}", e);
            }
        }
    }
}

/// The lazy-lock counterpart: attach the datasets' lazy transactions.
pub type GlobalLazyTransaction = GlobalTransaction;
