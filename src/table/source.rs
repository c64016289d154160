use std::sync::{Arc, RwLock};

use crate::error::DbResult;
use crate::storage::region::FileRegion;
use crate::storage::{TransactionalFile, TxState};
use crate::utils::HandyRwLock;

/// The shared transactional file of a dataset, chosen at construction.
pub type FilePod = Arc<RwLock<dyn TransactionalFile>>;

/// The geometry of one family of equally-shaped tables inside a
/// region-mapped file, plus the shared file itself.
///
/// Offsets handed out by a source are logical (unpadded); the region tree
/// turns them into physical page-aligned offsets on the way to the file.
/// `rec_space` and `tbl_space` are the logical separators that let the key
/// records interleave with the data tables in one coordinate space.
#[derive(Clone)]
pub struct Source {
    file: FilePod,
    region: Arc<FileRegion>,
    offset: u64,
    rec_size: usize,
    rec_space: u64,
    tbl_space: u64,
    tbl_count: u32,
    rec_count: u32,
}

impl Source {
    pub fn new(
        file: FilePod,
        region: Arc<FileRegion>,
        offset: u64,
        rec_size: usize,
        rec_space: u64,
        tbl_space: u64,
        tbl_count: u32,
        rec_count: u32,
    ) -> Self {
        Source {
            file,
            region,
            offset,
            rec_size,
            rec_space,
            tbl_space,
            tbl_count,
            rec_count,
        }
    }

    pub fn rec_size(&self) -> usize {
        self.rec_size
    }

    pub fn rec_count(&self) -> u32 {
        self.rec_count
    }

    pub fn tbl_count(&self) -> u32 {
        self.tbl_count
    }

    /// The logical size of one table of this source.
    pub fn table_size(&self) -> u64 {
        self.rec_count as u64 * (self.rec_size as u64 + self.rec_space)
    }

    /// The logical offset of a table.
    pub fn table_offset(&self, index: u32) -> u64 {
        debug_assert!(index < self.tbl_count, "table index out of the source");
        self.offset + index as u64 * (self.table_size() + self.tbl_space)
    }

    /// The logical offset of a record inside a table.
    pub fn rec_offset(&self, index: u32, pos: u32) -> u64 {
        debug_assert!(pos < self.rec_count, "record position out of the table");
        self.table_offset(index) + pos as u64 * (self.rec_size as u64 + self.rec_space)
    }

    pub fn read(&self, buf: &mut [u8], logical: u64) -> DbResult {
        let phys = self.region.convert_offset(logical);
        self.file.wl().read(buf, phys)
    }

    pub fn write(&self, buf: &[u8], logical: u64) -> DbResult {
        let phys = self.region.convert_offset(logical);
        self.file.wl().write(buf, phys)
    }

    /// Drop the cached pages of one table so the next read refetches them.
    pub fn refresh_table(&self, index: u32) -> DbResult {
        let start = self.region.convert_offset(self.table_offset(index));
        let last = self
            .region
            .convert_offset(self.table_offset(index) + self.table_size() - 1);
        self.file.wl().refresh(last - start + 1, start)
    }

    pub fn start(&self) -> DbResult {
        self.file.wl().start()
    }

    pub fn stop(&self) -> DbResult {
        self.file.wl().stop()
    }

    pub fn cancel(&self) -> DbResult {
        self.file.wl().cancel()
    }

    pub fn state(&self) -> TxState {
        self.file.rl().state()
    }

    pub fn file(&self) -> &FilePod {
        &self.file
    }
}
