pub mod info;
pub mod key;
pub mod session;
pub mod transaction;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info as log_info, warn};

use crate::consts::{PAGE_COUNT, PAGE_SIZE};
use crate::error::{DbError, DbResult};
use crate::record::{IndexField, Record};
use crate::storage::backup_file::BackupFile;
use crate::storage::cached_file::CachedFile;
use crate::storage::journal_file::JournalFile;
use crate::storage::page::{PageLayout, JOURNAL_STATUS_SIZE};
use crate::storage::region::FileRegion;
use crate::storage::TxState;
use crate::sync::gateway::Gateway;
use crate::sync::locker::Locker;
use crate::sync::shm::{self, SkeyMap};
use crate::table::indexed::IndexedTable;
use crate::table::simple::Table;
use crate::table::source::{FilePod, Source};
use crate::table::tree::TreeTable;
use crate::tree::node::TreeRecord;
use crate::types::{pod, Pod};
use crate::utils::HandyRwLock;

use self::info::Info;
use self::key::{SimpleKey, TableKey, TreeKey};
use self::session::{SessionRead, SessionWrite};
use self::transaction::{DatasetTransaction, LazyTransaction};

/// One of the three table flavors a dataset can host. The dataset only
/// needs a uniform way to construct the table over its slot and to drive
/// its metadata lifecycle; everything else is the flavor's own surface.
pub trait TableKind: Sized + Send + Sync {
    /// The record the caller works with.
    type Record: Record;
    /// The record actually stored in the slots (the tree flavor appends
    /// its node fields).
    type StorageRecord: Record;
    type Key: TableKey;

    fn open(table: Table<Self::StorageRecord, Self::Key>) -> DbResult<Self>;
    fn refresh(&mut self) -> DbResult<bool>;
    fn start(&mut self);
    fn update(&mut self) -> DbResult;
    fn recovery(&mut self) -> DbResult;
    fn count(&self) -> u32;
}

impl<R: Record + Send + Sync> TableKind for Table<R, SimpleKey> {
    type Record = R;
    type StorageRecord = R;
    type Key = SimpleKey;

    fn open(table: Table<R, SimpleKey>) -> DbResult<Self> {
        Ok(table)
    }

    fn refresh(&mut self) -> DbResult<bool> {
        Table::refresh(self)
    }

    fn start(&mut self) {
        Table::start(self)
    }

    fn update(&mut self) -> DbResult {
        Table::update(self)
    }

    fn recovery(&mut self) -> DbResult {
        Table::recovery(self)
    }

    fn count(&self) -> u32 {
        Table::count(self)
    }
}

impl<R, I> TableKind for IndexedTable<R, I>
where
    R: Record + Send + Sync,
    I: IndexField<R> + Send + Sync,
    I::Field: Send + Sync,
{
    type Record = R;
    type StorageRecord = R;
    type Key = SimpleKey;

    fn open(table: Table<R, SimpleKey>) -> DbResult<Self> {
        IndexedTable::new(table)
    }

    fn refresh(&mut self) -> DbResult<bool> {
        IndexedTable::refresh(self)
    }

    fn start(&mut self) {
        IndexedTable::start(self)
    }

    fn update(&mut self) -> DbResult {
        IndexedTable::update(self)
    }

    fn recovery(&mut self) -> DbResult {
        IndexedTable::recovery(self)
    }

    fn count(&self) -> u32 {
        IndexedTable::count(self)
    }
}

impl<R, I> TableKind for TreeTable<R, I>
where
    R: Record + Send + Sync,
    I: IndexField<R> + Send + Sync,
    I::Field: Send + Sync,
{
    type Record = R;
    type StorageRecord = TreeRecord<R>;
    type Key = TreeKey;

    fn open(table: Table<TreeRecord<R>, TreeKey>) -> DbResult<Self> {
        TreeTable::new(table)
    }

    fn refresh(&mut self) -> DbResult<bool> {
        TreeTable::refresh(self)
    }

    fn start(&mut self) {
        TreeTable::start(self)
    }

    fn update(&mut self) -> DbResult {
        TreeTable::update(self)
    }

    fn recovery(&mut self) -> DbResult {
        TreeTable::recovery(self)
    }

    fn count(&self) -> u32 {
        TreeTable::count(self)
    }
}

/// Which transactional tier backs the dataset file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileVariant {
    /// Plain cached file: flush-on-commit, no rollback of evicted pages.
    Cached,
    /// Cached plus a pre-image backup: full rollback, no crash recovery.
    Backup,
    /// Cached, backup and per-page journal: crash-recoverable.
    Journal,
}

/// One attached data table plus its named lock.
pub(crate) struct TableEntry<T: TableKind> {
    pub(crate) table: Pod<T>,
    pub(crate) locker: Arc<Locker>,
}

impl<T: TableKind> Clone for TableEntry<T> {
    fn clone(&self) -> Self {
        TableEntry {
            table: Arc::clone(&self.table),
            locker: Arc::clone(&self.locker),
        }
    }
}

struct TxnState<T: TableKind> {
    depth: u32,
    poisoned: bool,
    lazy_depth: u32,
    donated: Vec<TableEntry<T>>,
}

/// Everything a dataset, its sessions and its transactions share: the
/// transactional file, the geometry sources, the named locks, the gateway
/// and the skey shadow. Built by `Dataset::open`, dropped with the last
/// handle; no process-wide state beyond the named objects themselves.
pub(crate) struct DatasetCore<T: TableKind> {
    name: String,
    file: FilePod,
    data_source: Source,
    key_source: Source,
    info: RwLock<Info>,
    tables: RwLock<HashMap<u64, TableEntry<T>>>,
    pub(crate) skeys: SkeyMap,
    pub(crate) locker: Arc<Locker>,
    key_locker: Arc<Locker>,
    pub(crate) gateway: Arc<Gateway>,
    txn: Mutex<TxnState<T>>,
}

impl<T: TableKind> DatasetCore<T> {
    /// Join the file-level transaction; only the first joiner starts the
    /// file.
    pub(crate) fn tx_start(&self) -> DbResult {
        let mut txn = self.txn.lock().unwrap();
        if txn.depth == 0 {
            self.file.wl().start()?;
            txn.poisoned = false;
        }
        txn.depth += 1;
        Ok(())
    }

    /// Leave the transaction; the last one out commits, inside the
    /// gateway writer window.
    pub(crate) fn tx_stop(&self) -> DbResult {
        let mut txn = self.txn.lock().unwrap();
        if txn.depth == 0 {
            return Err(DbError::bug("transaction stop without a start"));
        }
        txn.depth -= 1;
        if txn.depth > 0 {
            return Ok(());
        }
        if txn.poisoned {
            self.file.wl().cancel()?;
            drop(txn);
            self.resync_tables()?;
            return Err(DbError::lock(
                "transaction was canceled by a nested cancel",
            ));
        }
        let mut pass = self.gateway.go_first_room();
        pass.go_last_room();
        let result = self.file.wl().stop();
        pass.leave_last_room();
        result
    }

    /// Leave the transaction rolling back; a nested cancel poisons the
    /// outermost one instead.
    pub(crate) fn tx_cancel(&self) -> DbResult {
        let mut txn = self.txn.lock().unwrap();
        if txn.depth == 0 {
            return Err(DbError::bug("transaction cancel without a start"));
        }
        txn.depth -= 1;
        if txn.depth > 0 {
            txn.poisoned = true;
            return Ok(());
        }
        self.file.wl().cancel()?;
        drop(txn);
        self.resync_tables()
    }

    /// After a rollback the disk is authoritative again: rebuild the skey
    /// shadow from the restored key records and refresh every attached
    /// table so derived state follows.
    fn resync_tables(&self) -> DbResult {
        {
            let tbl_count = self.info.rl().tbl_count;
            let mut shadow = self.skeys.wl();
            shadow.clear();
            for slot in 0..tbl_count {
                let skey = self.read_key_slot(slot)?;
                if !skey.removed() {
                    let mut buf = vec![0u8; T::Key::static_size()];
                    skey.pack(&mut buf);
                    shadow.insert(skey.key(), buf);
                }
            }
        }
        let entries: Vec<TableEntry<T>> = self.tables.rl().values().cloned().collect();
        for entry in entries {
            entry.table.wl().refresh()?;
        }
        Ok(())
    }

    pub(crate) fn state(&self) -> TxState {
        self.file.rl().state()
    }

    pub(crate) fn lazy_active(&self) -> bool {
        self.txn.lock().unwrap().lazy_depth > 0
    }

    pub(crate) fn lazy_start(&self) -> DbResult {
        self.locker.lock_sharable()?;
        if let Err(e) = self.tx_start() {
            let _ = self.locker.unlock_sharable();
            return Err(e);
        }
        self.txn.lock().unwrap().lazy_depth += 1;
        Ok(())
    }

    /// Terminate a lazy transaction: the donated write sessions commit or
    /// roll back together and their table locks finally release.
    pub(crate) fn lazy_finish(&self, cancel: bool) -> DbResult {
        let donated = {
            let mut txn = self.txn.lock().unwrap();
            if txn.lazy_depth == 0 {
                return Err(DbError::bug("lazy stop without a lazy start"));
            }
            txn.lazy_depth -= 1;
            if txn.lazy_depth == 0 {
                std::mem::replace(&mut txn.donated, Vec::new())
            } else {
                Vec::new()
            }
        };

        let mut result = if cancel { self.tx_cancel() } else { self.tx_stop() };
        if cancel {
            for entry in donated.iter() {
                if let Err(e) = entry.table.wl().recovery() {
                    warn!("lazy cancel: table recovery failed: {}", e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        for entry in donated.iter() {
            if let Err(e) = entry.locker.unlock() {
                warn!("lazy finish: {}", e);
            }
        }
        if let Err(e) = self.locker.unlock_sharable() {
            warn!("lazy finish: {}", e);
        }
        result
    }

    /// A deferred write session hands its table entry over: the lazy
    /// transaction unlocks it (and recovers it on cancel) at its end.
    pub(crate) fn donate(&self, entry: &TableEntry<T>) {
        let mut txn = self.txn.lock().unwrap();
        txn.donated.push(entry.clone());
    }

    /// Get or construct the table of a key.
    pub(crate) fn table_entry(&self, key: u64) -> DbResult<TableEntry<T>> {
        if let Some(entry) = self.tables.rl().get(&key) {
            return Ok(entry.clone());
        }
        let mut tables = self.tables.wl();
        if let Some(entry) = tables.get(&key) {
            return Ok(entry.clone());
        }

        let skey = match self.skeys.rl().get(&key) {
            Some(buf) => T::Key::unpack_new(buf),
            None => {
                return Err(DbError::range(&format!(
                    "table {} does not exist in {}",
                    key, self.name
                )));
            }
        };
        if skey.removed() {
            return Err(DbError::range(&format!(
                "table {} was removed from {}",
                key, self.name
            )));
        }
        let slot = skey.pos() as u32;
        let table = Table::new(
            self.data_source.clone(),
            self.key_source.clone(),
            slot,
            skey,
            Some(Arc::clone(&self.skeys)),
        );
        let kind = T::open(table)?;
        let segment = shm::segment_name(&self.name);
        let lock_name = format!("{}/tbl{}", segment, slot);
        let locker = Arc::new(Locker::new(&lock_name, shm::named_lock(&lock_name)));
        let entry = TableEntry {
            table: pod(kind),
            locker,
        };
        tables.insert(key, entry.clone());
        debug!("table {} attached at slot {}", key, slot);
        Ok(entry)
    }

    fn drop_table(&self, key: u64) {
        self.tables.wl().remove(&key);
    }

    fn read_key_slot(&self, slot: u32) -> DbResult<T::Key> {
        let mut buf = vec![0u8; T::Key::static_size()];
        self.key_source
            .read(&mut buf, self.key_source.rec_offset(0, slot))?;
        Ok(T::Key::unpack_new(&buf))
    }

    fn write_key_slot(&self, slot: u32, skey: &T::Key) -> DbResult {
        let mut buf = vec![0u8; T::Key::static_size()];
        skey.pack(&mut buf);
        self.key_source
            .write(&buf, self.key_source.rec_offset(0, slot))
    }
}

/// The dataset: an info header, a key region and `tbl_count` data tables
/// of `rec_count` records each, in one region-mapped transactional file.
pub struct Dataset<T: TableKind> {
    core: Arc<DatasetCore<T>>,
}

impl<T: TableKind> std::fmt::Debug for Dataset<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset").field("name", &self.core.name).finish()
    }
}

/// The conventional file name of a dataset.
pub fn make_dbname(name: &str) -> String {
    format!("{}.dat", name)
}

fn build_region(layout: PageLayout, tbl_count: u32, key_size: u64, table_size: u64) -> FileRegion {
    let pair = FileRegion::group(
        layout,
        tbl_count,
        vec![
            FileRegion::leaf(layout, 1, key_size),
            FileRegion::leaf(layout, 1, table_size),
        ],
    );
    FileRegion::group(
        layout,
        1,
        vec![
            FileRegion::leaf(layout, 1, Info::static_size() as u64),
            pair,
        ],
    )
}

impl<T: TableKind> Dataset<T> {
    /// Attach to an existing dataset.
    pub fn open(name: &str, version: u32) -> DbResult<Self> {
        Self::do_open(name, None, version, FileVariant::Journal)
    }

    /// Attach to a dataset, creating it when missing.
    pub fn open_or_create(
        name: &str,
        tbl_count: u32,
        rec_count: u32,
        version: u32,
    ) -> DbResult<Self> {
        Self::do_open(name, Some((tbl_count, rec_count)), version, FileVariant::Journal)
    }

    /// Same, with an explicit transactional tier.
    pub fn open_or_create_with(
        name: &str,
        tbl_count: u32,
        rec_count: u32,
        version: u32,
        variant: FileVariant,
    ) -> DbResult<Self> {
        Self::do_open(name, Some((tbl_count, rec_count)), version, variant)
    }

    fn do_open(
        name: &str,
        shape: Option<(u32, u32)>,
        version: u32,
        variant: FileVariant,
    ) -> DbResult<Self> {
        let path = make_dbname(name);
        // a zero-sized file is a leftover of a crashed create
        let existed = std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let layout = match variant {
            FileVariant::Journal => PageLayout::new(PAGE_SIZE, JOURNAL_STATUS_SIZE),
            _ => PageLayout::plain(PAGE_SIZE),
        };
        let file: FilePod = match variant {
            FileVariant::Cached => pod(CachedFile::open(&path, layout, PAGE_COUNT)?),
            FileVariant::Backup => pod(BackupFile::open(&path, layout, PAGE_COUNT)?),
            FileVariant::Journal => pod(JournalFile::open(&path, layout, PAGE_COUNT)?),
        };

        // exclusive while the file shape settles and recovery runs;
        // steady-state ordering is the shm locks' business
        file.rl().base().lock_exclusive()?;
        let result = Self::do_init(name, &path, existed, shape, version, layout, &file);
        let _ = file.rl().base().unlock();
        result.map(|core| Dataset {
            core: Arc::new(core),
        })
    }

    fn do_init(
        name: &str,
        path: &str,
        existed: bool,
        shape: Option<(u32, u32)>,
        version: u32,
        layout: PageLayout,
        file: &FilePod,
    ) -> DbResult<DatasetCore<T>> {
        if existed {
            let repaired = file.wl().init()?;
            if repaired {
                log_info!("dataset {}: journal recovery repaired the file", name);
            }
        }

        // the info header sits at the start of the file, readable before
        // the region geometry is known
        let info = if existed {
            let mut buf = vec![0u8; Info::static_size()];
            file.wl().read(&mut buf, 0)?;
            let info = Info::unpack_new(&buf);
            if info.version != version {
                return Err(DbError::version(&format!(
                    "dataset {}: version {} expected, found {}",
                    name, version, info.version
                )));
            }
            if let Some((tbl_count, rec_count)) = shape {
                if tbl_count != info.tbl_count || rec_count != info.rec_count {
                    warn!(
                        "dataset {}: shape {}x{} requested, file has {}x{}",
                        name, tbl_count, rec_count, info.tbl_count, info.rec_count
                    );
                }
            }
            info
        } else {
            let (tbl_count, rec_count) = shape.ok_or_else(|| {
                DbError::range(&format!("dataset {} does not exist", name))
            })?;
            Info::new(version, tbl_count, rec_count)
        };

        let key_size = T::Key::static_size() as u64;
        let rec_size = T::StorageRecord::static_size();
        let table_size = info.rec_count as u64 * rec_size as u64;
        let region = Arc::new(build_region(layout, info.tbl_count, key_size, table_size));

        let data_source = Source::new(
            Arc::clone(file),
            Arc::clone(&region),
            Info::static_size() as u64 + key_size,
            rec_size,
            0,
            key_size,
            info.tbl_count,
            info.rec_count,
        );
        let key_source = Source::new(
            Arc::clone(file),
            Arc::clone(&region),
            Info::static_size() as u64,
            T::Key::static_size(),
            table_size,
            0,
            1,
            info.tbl_count,
        );

        if !existed {
            // initialize: the only writer of the info header, plus a
            // tombstoned key for every slot
            file.wl().resize(region.full_size())?;
            file.wl().start()?;
            let mut buf = vec![0u8; Info::static_size()];
            info.pack(&mut buf);
            file.wl().write(&buf, 0)?;
            for slot in 0..info.tbl_count {
                let skey = T::Key::default();
                let mut buf = vec![0u8; T::Key::static_size()];
                skey.pack(&mut buf);
                key_source.write(&buf, key_source.rec_offset(0, slot))?;
            }
            file.wl().stop()?;
            log_info!(
                "dataset {} created: {} tables of {} records",
                name,
                info.tbl_count,
                info.rec_count
            );
        }

        let segment = shm::segment_name(name);
        let skeys = shm::named_skey_map(&format!("{}/skeys", segment));
        let lock_name = format!("{}/lock", segment);
        let locker = Arc::new(Locker::new(&lock_name, shm::named_lock(&lock_name)));
        let key_lock_name = format!("{}/keys", segment);
        let key_locker = Arc::new(Locker::new(&key_lock_name, shm::named_lock(&key_lock_name)));
        let gateway = shm::named_gateway(&format!("{}/gateway", segment));

        let core = DatasetCore {
            name: name.to_string(),
            file: Arc::clone(file),
            data_source,
            key_source,
            info: RwLock::new(info),
            tables: RwLock::new(HashMap::new()),
            skeys,
            locker,
            key_locker,
            gateway,
            txn: Mutex::new(TxnState {
                depth: 0,
                poisoned: false,
                lazy_depth: 0,
                donated: Vec::new(),
            }),
        };

        // the on-disk keys are authoritative after recovery
        {
            let _guard = core.key_locker.scoped_guard()?;
            let mut shadow = core.skeys.wl();
            for slot in 0..core.info.rl().tbl_count {
                let skey: T::Key = core.read_key_slot(slot)?;
                if !skey.removed() {
                    let mut buf = vec![0u8; T::Key::static_size()];
                    skey.pack(&mut buf);
                    shadow.insert(skey.key(), buf);
                }
            }
        }
        debug!("dataset {} opened at {}", name, path);
        Ok(core)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn table_count(&self) -> u32 {
        self.core.info.rl().tbl_count
    }

    pub fn rec_count(&self) -> u32 {
        self.core.info.rl().rec_count
    }

    pub fn version(&self) -> u32 {
        self.core.info.rl().version
    }

    /// The count of live (not removed) tables.
    pub fn key_count(&self) -> u32 {
        self.core.skeys.rl().len() as u32
    }

    pub fn table_exists(&self, key: u64) -> bool {
        self.core.skeys.rl().contains_key(&key)
    }

    pub fn key_list(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self.core.skeys.rl().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    pub fn get_user_data(&self, buffer: &mut [u8]) -> usize {
        self.core.info.rl().get_data(buffer)
    }

    /// Store application bytes in the header's user area, transactionally.
    pub fn set_user_data(&self, buffer: &[u8]) -> DbResult<usize> {
        let _guard = self.core.locker.scoped_guard()?;
        self.core.tx_start()?;
        let result = (|| {
            let mut info = self.core.info.wl();
            let stored = info.set_data(buffer);
            let mut buf = vec![0u8; Info::static_size()];
            info.pack(&mut buf);
            self.core.file.wl().write(&buf, 0)?;
            Ok(stored)
        })();
        match result {
            Ok(stored) => {
                self.core.tx_stop()?;
                Ok(stored)
            }
            Err(e) => {
                let _ = self.core.tx_cancel();
                Err(e)
            }
        }
    }

    /// Add a table under a new key, reusing the lowest tombstoned slot.
    pub fn add_table(&self, key: u64) -> DbResult<u32> {
        let _guard = self.core.key_locker.scoped_guard()?;
        if self.table_exists(key) {
            return Err(DbError::range(&format!(
                "table {} already exists in {}",
                key, self.core.name
            )));
        }

        let tbl_count = self.core.info.rl().tbl_count;
        let mut slot = None;
        for candidate in 0..tbl_count {
            if self.core.read_key_slot(candidate)?.removed() {
                slot = Some(candidate);
                break;
            }
        }
        let slot = slot.ok_or_else(|| {
            DbError::range(&format!("dataset {} has no free table slot", self.core.name))
        })?;

        self.core.tx_start()?;
        let result = (|| {
            let mut skey = T::Key::default();
            skey.set_key(key);
            skey.set_pos(slot as i32);
            self.core.write_key_slot(slot, &skey)?;
            let mut buf = vec![0u8; T::Key::static_size()];
            skey.pack(&mut buf);
            self.core.skeys.wl().insert(key, buf);
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.core.tx_stop()?;
                debug!("table {} added to {} at slot {}", key, self.core.name, slot);
                Ok(slot)
            }
            Err(e) => {
                self.core.skeys.wl().remove(&key);
                let _ = self.core.tx_cancel();
                Err(e)
            }
        }
    }

    /// Tombstone a table; the data region stays until the slot is reused.
    /// Returns the count of remaining live tables.
    pub fn remove_table(&self, key: u64) -> DbResult<u32> {
        let _guard = self.core.key_locker.scoped_guard()?;
        let slot = {
            let shadow = self.core.skeys.rl();
            let buf = shadow.get(&key).ok_or_else(|| {
                DbError::range(&format!(
                    "table {} does not exist in {}",
                    key, self.core.name
                ))
            })?;
            T::Key::unpack_new(buf).pos() as u32
        };

        self.core.tx_start()?;
        let result = (|| {
            let mut skey = self.core.read_key_slot(slot)?;
            skey.set_pos(-1);
            self.core.write_key_slot(slot, &skey)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.core.tx_stop()?;
                self.core.skeys.wl().remove(&key);
                self.core.drop_table(key);
                debug!("table {} removed from {}", key, self.core.name);
                Ok(self.key_count())
            }
            Err(e) => {
                let _ = self.core.tx_cancel();
                Err(e)
            }
        }
    }

    /// Open a sharable session for reading the table.
    pub fn session_rd(&self, key: u64) -> DbResult<SessionRead<T>> {
        SessionRead::open(Arc::clone(&self.core), key)
    }

    /// Open an exclusive session for writing the table. Under an active
    /// lazy transaction the session is retained by it.
    pub fn session_wr(&self, key: u64) -> DbResult<SessionWrite<T>> {
        SessionWrite::open(Arc::clone(&self.core), key)
    }

    /// A dataset-wide transaction under the exclusive lock.
    pub fn transaction(&self) -> DbResult<DatasetTransaction<T>> {
        DatasetTransaction::begin(Arc::clone(&self.core))
    }

    /// A cooperative transaction batching write sessions into one commit.
    pub fn lazy_transaction(&self) -> DbResult<LazyTransaction<T>> {
        LazyTransaction::begin(Arc::clone(&self.core))
    }

    /// An idle transaction, for attaching to a global transaction.
    pub fn make_transaction(&self) -> DatasetTransaction<T> {
        DatasetTransaction::idle(Arc::clone(&self.core))
    }

    /// An idle lazy transaction, for attaching to a global one.
    pub fn make_lazy_transaction(&self) -> LazyTransaction<T> {
        LazyTransaction::idle(Arc::clone(&self.core))
    }

    /// Manual counterpart of `transaction`; pair with `stop`/`cancel`.
    pub fn start(&self) -> DbResult {
        self.core.locker.lock()?;
        if let Err(e) = self.core.tx_start() {
            let _ = self.core.locker.unlock();
            return Err(e);
        }
        Ok(())
    }

    pub fn stop(&self) -> DbResult {
        let result = self.core.tx_stop();
        if let Err(e) = self.core.locker.unlock() {
            warn!("dataset stop: {}", e);
        }
        result
    }

    pub fn cancel(&self) -> DbResult {
        let result = self.core.tx_cancel();
        if let Err(e) = self.core.locker.unlock() {
            warn!("dataset cancel: {}", e);
        }
        result
    }

    /// Manual counterpart of `lazy_transaction`; pair with
    /// `lazy_stop`/`lazy_cancel`.
    pub fn lazy_start(&self) -> DbResult {
        self.core.lazy_start()
    }

    pub fn lazy_stop(&self) -> DbResult {
        self.core.lazy_finish(false)
    }

    pub fn lazy_cancel(&self) -> DbResult {
        self.core.lazy_finish(true)
    }

    pub fn lazy_transaction_exists(&self) -> bool {
        self.core.lazy_active()
    }

    pub fn state(&self) -> TxState {
        self.core.state()
    }

    /// Remove a dataset: its file, its backup and its named objects.
    pub fn remove(name: &str) -> DbResult {
        shm::purge(&shm::segment_name(name));
        JournalFile::remove(&make_dbname(name))
    }
}
