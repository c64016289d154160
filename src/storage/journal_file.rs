use std::collections::BTreeSet;
use std::path::Path;

use log::{debug, info};

use crate::error::{DbError, DbResult};

use super::backup_file::copy_page;
use super::cache::PageCache;
use super::file::BaseFile;
use super::page::{JournalState, JournalStatus, PageLayout, JOURNAL_STATUS_SIZE};
use super::{
    backup_name, cached_read, cached_write, check_finish, check_start, refresh_pages, TxState,
    TransactionalFile,
};

/// The cached file with backup rollback and a per-page journal.
///
/// Every page reserves its last bytes for a `JournalStatus`. A page saved
/// while a transaction is in flight carries `{tx, Dirty}`; at commit all
/// touched pages flip to `{tx, Fixed}` page by page and finally back to
/// `{tx, Clean}` once the backup is dropped. `init` inspects the statuses
/// left by a previous run and either completes or rolls back whatever it
/// finds; transaction ids stay in the Clean statuses, so epochs keep
/// growing across restarts.
pub struct JournalFile {
    file: BaseFile,
    backup: BaseFile,
    cache: PageCache,
    layout: PageLayout,
    state: TxState,
    indexes: BTreeSet<u32>,
    transaction_id: u32,
}

impl JournalFile {
    pub fn open<P: AsRef<Path>>(path: P, layout: PageLayout, page_count: usize) -> DbResult<Self> {
        if layout.service() < JOURNAL_STATUS_SIZE {
            return Err(DbError::bug(&format!(
                "journal needs {} service bytes per page, layout has {}",
                JOURNAL_STATUS_SIZE,
                layout.service()
            )));
        }
        let file = BaseFile::open(&path)?;
        let backup = BaseFile::open(backup_name(file.name()))?;
        Ok(JournalFile {
            file,
            backup,
            cache: PageCache::new(layout.total(), page_count),
            layout,
            state: TxState::Unknown,
            indexes: BTreeSet::new(),
            transaction_id: 0,
        })
    }

    /// Remove a data file together with its backup.
    pub fn remove(name: &str) -> DbResult {
        BaseFile::remove(name)?;
        BaseFile::remove(backup_name(name))
    }

    /// The id of the transaction currently in flight (or the last one).
    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    fn saver<'a>(
        file: &'a BaseFile,
        backup: &'a BaseFile,
        indexes: &'a mut BTreeSet<u32>,
        layout: PageLayout,
        status: JournalStatus,
        capture: bool,
    ) -> impl FnMut(u32, &mut [u8]) -> DbResult + 'a {
        move |index, data| {
            if capture && !indexes.contains(&index) {
                copy_page(file, backup, layout, index)?;
                indexes.insert(index);
                debug!("page {} captured in the backup", index);
            }
            status.pack(&mut data[layout.data()..layout.data() + JOURNAL_STATUS_SIZE]);
            file.write(data, layout.page_offset(index))
        }
    }

    fn save_status(&self, index: u32, status: JournalStatus) -> DbResult {
        let mut buf = [0u8; JOURNAL_STATUS_SIZE];
        status.pack(&mut buf);
        self.file.write(&buf, self.layout.service_offset(index))
    }

    fn load_status(&self, index: u32) -> DbResult<JournalStatus> {
        let mut buf = [0u8; JOURNAL_STATUS_SIZE];
        self.file.read(&mut buf, self.layout.service_offset(index))?;
        JournalStatus::unpack(&buf)
    }

    fn restore_page(&self, index: u32) -> DbResult {
        let needed = self.layout.page_offset(index) + self.layout.total() as u64;
        if self.backup.size()? < needed {
            return Err(DbError::io(&format!(
                "backup {} misses the pre-image of page {}",
                self.backup.name(),
                index
            )));
        }
        copy_page(&self.backup, &self.file, self.layout, index)
    }

    /// The status every page save carries in the current state.
    fn page_status(&self) -> JournalStatus {
        if self.state == TxState::Started {
            JournalStatus::new(self.transaction_id, JournalState::Dirty)
        } else {
            JournalStatus::clean(self.transaction_id)
        }
    }
}

impl TransactionalFile for JournalFile {
    fn name(&self) -> &str {
        self.file.name()
    }

    fn layout(&self) -> PageLayout {
        self.layout
    }

    fn read(&mut self, buf: &mut [u8], pos: u64) -> DbResult {
        let status = self.page_status();
        let capture = self.state == TxState::Started;
        let mut saver = Self::saver(
            &self.file,
            &self.backup,
            &mut self.indexes,
            self.layout,
            status,
            capture,
        );
        cached_read(&mut self.cache, &self.file, self.layout, buf, pos, &mut saver)
    }

    fn write(&mut self, buf: &[u8], pos: u64) -> DbResult {
        let status = self.page_status();
        let capture = self.state == TxState::Started;
        let mut saver = Self::saver(
            &self.file,
            &self.backup,
            &mut self.indexes,
            self.layout,
            status,
            capture,
        );
        cached_write(&mut self.cache, &self.file, self.layout, buf, pos, &mut saver)
    }

    fn resize(&mut self, size: u64) -> DbResult<u64> {
        let result = self.file.resize(size)?;
        if self.state == TxState::Started {
            self.backup.sizeup(size)?;
        }
        Ok(result)
    }

    fn sizeup(&mut self, size: u64) -> DbResult<u64> {
        let result = self.file.sizeup(size)?;
        if self.state == TxState::Started {
            self.backup.sizeup(size)?;
        }
        Ok(result)
    }

    fn size(&self) -> DbResult<u64> {
        self.file.size()
    }

    fn refresh(&mut self, size: u64, pos: u64) -> DbResult {
        refresh_pages(&mut self.cache, self.layout, size, pos)?;
        self.file.refresh(size, pos)
    }

    fn flush(&self) -> DbResult {
        self.file.flush()
    }

    fn start(&mut self) -> DbResult {
        self.state = check_start(self.state)?;
        self.transaction_id += 1;
        self.indexes.clear();
        debug!(
            "transaction {} started on {}",
            self.transaction_id,
            self.file.name()
        );
        Ok(())
    }

    fn stop(&mut self) -> DbResult {
        check_finish(self.state)?;

        // step 1: every dirty page reaches the disk as {tx, Dirty}
        let status = self.page_status();
        let mut saver = Self::saver(
            &self.file,
            &self.backup,
            &mut self.indexes,
            self.layout,
            status,
            true,
        );
        self.cache.clean(&mut saver)?;
        drop(saver);
        self.file.flush()?;

        // step 2: flip the touched pages to Fixed, page by page
        let fixed = JournalStatus::new(self.transaction_id, JournalState::Fixed);
        for index in self.indexes.iter().cloned() {
            self.save_status(index, fixed)?;
        }
        self.file.flush()?;

        // step 3: the commit is durable, drop the pre-images and settle
        // the statuses back to Clean
        self.backup.resize(0)?;
        let clean = JournalStatus::clean(self.transaction_id);
        let indexes: Vec<u32> = self.indexes.iter().cloned().collect();
        for index in indexes {
            self.save_status(index, clean)?;
        }
        self.indexes.clear();
        self.state = TxState::Stopped;
        self.file.flush()
    }

    fn cancel(&mut self) -> DbResult {
        check_finish(self.state)?;
        debug!(
            "cancel of transaction {} on {}: restoring {} pages",
            self.transaction_id,
            self.file.name(),
            self.indexes.len()
        );
        let indexes: Vec<u32> = self.indexes.iter().cloned().collect();
        for index in indexes {
            self.restore_page(index)?;
        }
        self.indexes.clear();
        self.cache.reset();
        self.state = TxState::Canceled;
        self.file.flush()
    }

    fn state(&self) -> TxState {
        self.state
    }

    /// Scan the journal statuses left by a previous run.
    ///
    /// A Fixed page is committed iff its transaction id equals the maximum
    /// Fixed id observed during the scan; lower Fixed ids and all Dirty
    /// pages are rolled back from the backup. The transaction id counter
    /// restarts from the maximum id observed anywhere.
    fn init(&mut self) -> DbResult<bool> {
        self.cache.reset();
        let page_count = (self.file.size()? / self.layout.total() as u64) as u32;

        let mut statuses = Vec::with_capacity(page_count as usize);
        let mut max_id = 0u32;
        let mut fixed_max = 0u32;
        for index in 0..page_count {
            let status = self.load_status(index)?;
            max_id = max_id.max(status.transaction_id);
            if status.state == JournalState::Fixed {
                fixed_max = fixed_max.max(status.transaction_id);
            }
            statuses.push(status);
        }

        let mut restored = Vec::new();
        for (index, status) in statuses.iter().enumerate() {
            let rollback = match status.state {
                JournalState::Clean => false,
                JournalState::Dirty => true,
                JournalState::Fixed => status.transaction_id < fixed_max,
            };
            if rollback {
                self.restore_page(index as u32)?;
                restored.push(index as u32);
            }
        }

        // settle every non-clean status, the restored pages included
        let clean = JournalStatus::clean(max_id);
        for (index, status) in statuses.iter().enumerate() {
            if status.state != JournalState::Clean {
                self.save_status(index as u32, clean)?;
            } else {
                // a restored pre-image may carry any old status
                if restored.contains(&(index as u32)) {
                    self.save_status(index as u32, clean)?;
                }
            }
        }

        self.backup.resize(0)?;
        self.transaction_id = max_id;
        self.state = TxState::Unknown;
        if !restored.is_empty() {
            info!(
                "journal recovery on {}: rolled back pages {:?}",
                self.file.name(),
                restored
            );
            self.file.flush()?;
        }
        Ok(!restored.is_empty())
    }

    fn reset(&mut self) {
        self.cache.reset();
    }

    fn base(&self) -> &BaseFile {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOTAL: usize = 256;
    const DATA: usize = TOTAL - JOURNAL_STATUS_SIZE;

    fn open_journal(dir: &tempfile::TempDir, pages: usize) -> JournalFile {
        let layout = PageLayout::new(TOTAL, JOURNAL_STATUS_SIZE);
        JournalFile::open(dir.path().join("journal.dat"), layout, pages).unwrap()
    }

    fn data_of_page(dir: &tempfile::TempDir, index: u32) -> Vec<u8> {
        let raw = BaseFile::open(dir.path().join("journal.dat")).unwrap();
        let mut buf = vec![0u8; DATA];
        raw.read(&mut buf, index as u64 * TOTAL as u64).unwrap();
        buf
    }

    fn seed(file: &mut JournalFile, pages: u32, value: u8) {
        file.start().unwrap();
        for i in 0..pages {
            let layout = file.layout();
            file.write(&vec![value; DATA], layout.convert(i as u64 * DATA as u64))
                .unwrap();
        }
        file.stop().unwrap();
    }

    #[test]
    fn test_commit_settles_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_journal(&dir, 2);
        seed(&mut file, 3, 0x11);

        for i in 0..3 {
            let status = file.load_status(i).unwrap();
            assert_eq!(status.state, JournalState::Clean);
            assert_eq!(status.transaction_id, 1);
            assert_eq!(data_of_page(&dir, i), vec![0x11u8; DATA]);
        }
        // the backup was dropped at commit
        assert_eq!(file.backup.size().unwrap(), 0);
    }

    #[test]
    fn test_crash_before_stop_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_journal(&dir, 2);
        seed(&mut file, 4, 0x11);

        // a transaction overwrites everything and vanishes before stop;
        // the small pool guarantees real evictions
        file.start().unwrap();
        for i in 0..4u32 {
            let layout = file.layout();
            file.write(&vec![0xee; DATA], layout.convert(i as u64 * DATA as u64))
                .unwrap();
        }
        drop(file);

        let mut file = open_journal(&dir, 2);
        assert!(file.init().unwrap());
        for i in 0..4 {
            assert_eq!(data_of_page(&dir, i), vec![0x11u8; DATA], "page {}", i);
            assert_eq!(file.load_status(i).unwrap().state, JournalState::Clean);
        }
    }

    #[test]
    fn test_crash_after_fix_commits_forward() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_journal(&dir, 2);
        seed(&mut file, 2, 0x11);
        seed(&mut file, 2, 0x22);

        // fake a crash between the Fixed flip and the Clean settle: the
        // committed data is on disk, the statuses still say Fixed
        let fixed = JournalStatus::new(2, JournalState::Fixed);
        file.save_status(0, fixed).unwrap();
        file.save_status(1, fixed).unwrap();
        drop(file);

        let mut file = open_journal(&dir, 2);
        file.init().unwrap();
        assert_eq!(file.transaction_id(), 2);
        for i in 0..2 {
            assert_eq!(data_of_page(&dir, i), vec![0x22u8; DATA]);
            assert_eq!(file.load_status(i).unwrap().state, JournalState::Clean);
        }

        // the next transaction continues the epoch
        file.start().unwrap();
        assert_eq!(file.transaction_id(), 3);
        file.stop().unwrap();
    }

    #[test]
    fn test_cancel_restores_and_discards() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_journal(&dir, 2);
        seed(&mut file, 4, 0x33);

        file.start().unwrap();
        for i in 0..4u32 {
            let layout = file.layout();
            file.write(&vec![0x44; DATA], layout.convert(i as u64 * DATA as u64))
                .unwrap();
        }
        file.cancel().unwrap();

        for i in 0..4 {
            assert_eq!(data_of_page(&dir, i), vec![0x33u8; DATA], "page {}", i);
        }
    }

    #[test]
    fn test_empty_transaction_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_journal(&dir, 2);
        seed(&mut file, 2, 0x55);
        let before: Vec<Vec<u8>> = (0..2).map(|i| data_of_page(&dir, i)).collect();

        file.start().unwrap();
        file.stop().unwrap();

        let after: Vec<Vec<u8>> = (0..2).map(|i| data_of_page(&dir, i)).collect();
        assert_eq!(before, after);
        for i in 0..2 {
            assert_eq!(file.load_status(i).unwrap().state, JournalState::Clean);
        }
    }
}
