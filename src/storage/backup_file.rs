use std::collections::BTreeSet;
use std::path::Path;

use log::debug;

use crate::error::DbResult;

use super::cache::PageCache;
use super::file::BaseFile;
use super::page::PageLayout;
use super::{
    backup_name, cached_read, cached_write, check_finish, check_start, refresh_pages, TxState,
    TransactionalFile,
};

/// The cached file with full rollback support.
///
/// Before a dirty page first reaches the data file during a transaction,
/// its pre-image is copied to the backup file (a sparse mirror: the
/// pre-image of page `i` sits at offset `i * page_size`) and its index is
/// recorded. `cancel` restores every recorded page, so the data file comes
/// back byte-identical to the pre-start state.
pub struct BackupFile {
    file: BaseFile,
    backup: BaseFile,
    cache: PageCache,
    layout: PageLayout,
    state: TxState,
    indexes: BTreeSet<u32>,
}

impl BackupFile {
    pub fn open<P: AsRef<Path>>(path: P, layout: PageLayout, page_count: usize) -> DbResult<Self> {
        let file = BaseFile::open(&path)?;
        let backup = BaseFile::open(backup_name(file.name()))?;
        Ok(BackupFile {
            file,
            backup,
            cache: PageCache::new(layout.total(), page_count),
            layout,
            state: TxState::Unknown,
            indexes: BTreeSet::new(),
        })
    }

    /// Remove a data file together with its backup.
    pub fn remove(name: &str) -> DbResult {
        BaseFile::remove(name)?;
        BaseFile::remove(backup_name(name))
    }

    /// The saver: captures the pre-image of a page on its first save in
    /// the current transaction, then writes the page through.
    fn saver<'a>(
        file: &'a BaseFile,
        backup: &'a BaseFile,
        indexes: &'a mut BTreeSet<u32>,
        layout: PageLayout,
        in_transaction: bool,
    ) -> impl FnMut(u32, &mut [u8]) -> DbResult + 'a {
        move |index, data| {
            if in_transaction && !indexes.contains(&index) {
                copy_page(file, backup, layout, index)?;
                indexes.insert(index);
                debug!("page {} captured in the backup", index);
            }
            file.write(data, layout.page_offset(index))
        }
    }
}

/// Copy one page between a file and its backup. A page past the source end
/// is stored as zeros.
pub(crate) fn copy_page(
    from: &BaseFile,
    to: &BaseFile,
    layout: PageLayout,
    index: u32,
) -> DbResult {
    let offset = layout.page_offset(index);
    let mut buf = vec![0u8; layout.total()];
    let size = from.size()?;
    if offset < size {
        let available = ((size - offset) as usize).min(layout.total());
        from.read(&mut buf[..available], offset)?;
    }
    to.write(&buf, offset)
}

impl TransactionalFile for BackupFile {
    fn name(&self) -> &str {
        self.file.name()
    }

    fn layout(&self) -> PageLayout {
        self.layout
    }

    fn read(&mut self, buf: &mut [u8], pos: u64) -> DbResult {
        let in_tx = self.state == TxState::Started;
        let mut saver = Self::saver(
            &self.file,
            &self.backup,
            &mut self.indexes,
            self.layout,
            in_tx,
        );
        cached_read(&mut self.cache, &self.file, self.layout, buf, pos, &mut saver)
    }

    fn write(&mut self, buf: &[u8], pos: u64) -> DbResult {
        let in_tx = self.state == TxState::Started;
        let mut saver = Self::saver(
            &self.file,
            &self.backup,
            &mut self.indexes,
            self.layout,
            in_tx,
        );
        cached_write(&mut self.cache, &self.file, self.layout, buf, pos, &mut saver)
    }

    fn resize(&mut self, size: u64) -> DbResult<u64> {
        let result = self.file.resize(size)?;
        if self.state == TxState::Started {
            // keep the backup large enough for the high-water mark
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
        self.indexes.clear();
        Ok(())
    }

    fn stop(&mut self) -> DbResult {
        check_finish(self.state)?;
        let mut saver = Self::saver(
            &self.file,
            &self.backup,
            &mut self.indexes,
            self.layout,
            true,
        );
        self.cache.clean(&mut saver)?;
        drop(saver);
        self.indexes.clear();
        self.state = TxState::Stopped;
        self.file.flush()
    }

    fn cancel(&mut self) -> DbResult {
        check_finish(self.state)?;
        debug!(
            "cancel on {}: restoring {} pages from the backup",
            self.file.name(),
            self.indexes.len()
        );
        for index in self.indexes.iter().cloned() {
            copy_page(&self.backup, &self.file, self.layout, index)?;
        }
        self.indexes.clear();
        self.cache.reset();
        self.state = TxState::Canceled;
        self.file.flush()
    }

    fn state(&self) -> TxState {
        self.state
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

    fn open_backup(dir: &tempfile::TempDir, pages: usize) -> BackupFile {
        let layout = PageLayout::plain(256);
        BackupFile::open(dir.path().join("data.dat"), layout, pages).unwrap()
    }

    fn file_bytes(dir: &tempfile::TempDir) -> Vec<u8> {
        let raw = BaseFile::open(dir.path().join("data.dat")).unwrap();
        let size = raw.size().unwrap() as usize;
        let mut buf = vec![0u8; size];
        raw.read(&mut buf, 0).unwrap();
        buf
    }

    #[test]
    fn test_cancel_restores_evicted_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_backup(&dir, 2);

        // seed two pages outside of any transaction
        file.start().unwrap();
        file.write(&[1u8; 256], 0).unwrap();
        file.write(&[2u8; 256], 256).unwrap();
        file.stop().unwrap();
        let before = file_bytes(&dir);

        // overwrite them in a transaction and force evictions by touching
        // more pages than the pool holds
        file.start().unwrap();
        for i in 0..4u32 {
            file.write(&[0xeeu8; 256], i as u64 * 256).unwrap();
        }
        file.cancel().unwrap();

        assert_eq!(file_bytes(&dir), before);
    }

    #[test]
    fn test_stop_commits_and_forgets_preimages() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_backup(&dir, 2);

        file.start().unwrap();
        file.write(&[3u8; 256], 0).unwrap();
        file.stop().unwrap();

        let bytes = file_bytes(&dir);
        assert_eq!(&bytes[..256], &[3u8; 256][..]);

        // a later cancel has nothing to restore
        file.start().unwrap();
        file.cancel().unwrap();
        assert_eq!(file_bytes(&dir), bytes);
    }

    #[test]
    fn test_remove_deletes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.dat");
        {
            let mut file = open_backup(&dir, 2);
            file.start().unwrap();
            for i in 0..4u32 {
                file.write(&[9u8; 256], i as u64 * 256).unwrap();
            }
            file.stop().unwrap();
        }
        assert!(path.exists());
        BackupFile::remove(path.to_str().unwrap()).unwrap();
        assert!(!path.exists());
        assert!(!dir.path().join("data.bak").exists());
    }
}
