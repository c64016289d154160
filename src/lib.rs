mod consts;
mod error;
mod record;
mod types;
mod utils;

mod dataset;
mod storage;
mod sync;
mod table;
mod tree;

pub use crate::consts::{IO_ATTEMPTS, LOCK_TIMEOUT, NODE_CACHE_SIZE, PAGE_COUNT, PAGE_SIZE};
pub use crate::error::{DbError, DbResult, ErrorKind};
pub use crate::record::{CounterRecord, DataRecord, Index1, Index2, IndexField, Record};
pub use crate::types::{Pos, Rev, SPos, NIL};

pub use crate::dataset::info::Info;
pub use crate::dataset::key::{SimpleKey, TableKey, TreeKey};
pub use crate::dataset::session::{SessionRead, SessionWrite};
pub use crate::dataset::transaction::{
    DatasetTransaction, GlobalLazyTransaction, GlobalTransaction, LazyTransaction, Transact,
};
pub use crate::dataset::{make_dbname, Dataset, FileVariant, TableKind};

pub use crate::storage::backup_file::BackupFile;
pub use crate::storage::cache::{PageCache, PageState};
pub use crate::storage::cached_file::CachedFile;
pub use crate::storage::file::BaseFile;
pub use crate::storage::journal_file::JournalFile;
pub use crate::storage::page::{JournalState, JournalStatus, PageLayout, JOURNAL_STATUS_SIZE};
pub use crate::storage::region::FileRegion;
pub use crate::storage::{TransactionalFile, TxState};

pub use crate::sync::gateway::{Gateway, GatewayPass};
pub use crate::sync::locker::{Locker, ScopedGuard, SharableGuard};
pub use crate::sync::shared_lock::{OrderedSharedLock, RwLockable, SharedLock};
pub use crate::sync::shm;

pub use crate::table::indexed::IndexedTable;
pub use crate::table::simple::Table;
pub use crate::table::source::{FilePod, Source};
pub use crate::table::tree::TreeTable;
pub use crate::table::{NullMover, RecordMover};

pub use crate::tree::node::{Node, NodeColor, NodeStore, TreeRecord};
pub use crate::tree::node_cache::NodeCache;
pub use crate::tree::rbtree;

pub use crate::utils::HandyRwLock;

/// A dataset of plain circular tables.
pub type SimpleDataset<R> = Dataset<Table<R, SimpleKey>>;

/// A dataset of tables with a secondary in-memory index.
pub type IndexedDataset<R, I> = Dataset<IndexedTable<R, I>>;

/// A dataset of tables indexed by an embedded red-black tree.
pub type TreeDataset<R, I> = Dataset<TreeTable<R, I>>;
