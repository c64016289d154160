use std::path::Path;

use log::debug;

use crate::error::DbResult;

use super::cache::PageCache;
use super::file::BaseFile;
use super::page::PageLayout;
use super::{
    cached_read, cached_write, check_finish, check_start, refresh_pages, TxState,
    TransactionalFile,
};

/// The file with a write-back page cache and partial transaction support.
///
/// Writes land in local cache pages; when the pool overflows, the oldest
/// page is stored back to the file. `stop` flushes every dirty page,
/// `cancel` just drops the cache, so a canceled transaction can still leave
/// evicted pages behind; full rollback needs the backup tier.
pub struct CachedFile {
    file: BaseFile,
    cache: PageCache,
    layout: PageLayout,
    state: TxState,
}

impl CachedFile {
    pub fn open<P: AsRef<Path>>(path: P, layout: PageLayout, page_count: usize) -> DbResult<Self> {
        let file = BaseFile::open(path)?;
        Ok(CachedFile {
            file,
            cache: PageCache::new(layout.total(), page_count),
            layout,
            state: TxState::Unknown,
        })
    }

    /// Save one page straight to the underlying file.
    fn saver<'a>(file: &'a BaseFile, layout: PageLayout) -> impl FnMut(u32, &mut [u8]) -> DbResult + 'a {
        move |index, data| file.write(data, layout.page_offset(index))
    }
}

impl TransactionalFile for CachedFile {
    fn name(&self) -> &str {
        self.file.name()
    }

    fn layout(&self) -> PageLayout {
        self.layout
    }

    fn read(&mut self, buf: &mut [u8], pos: u64) -> DbResult {
        let mut saver = Self::saver(&self.file, self.layout);
        cached_read(&mut self.cache, &self.file, self.layout, buf, pos, &mut saver)
    }

    fn write(&mut self, buf: &[u8], pos: u64) -> DbResult {
        let mut saver = Self::saver(&self.file, self.layout);
        cached_write(&mut self.cache, &self.file, self.layout, buf, pos, &mut saver)
    }

    fn resize(&mut self, size: u64) -> DbResult<u64> {
        self.file.resize(size)
    }

    fn sizeup(&mut self, size: u64) -> DbResult<u64> {
        self.file.sizeup(size)
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
        Ok(())
    }

    fn stop(&mut self) -> DbResult {
        check_finish(self.state)?;
        let mut saver = Self::saver(&self.file, self.layout);
        self.cache.clean(&mut saver)?;
        self.state = TxState::Stopped;
        self.file.flush()
    }

    fn cancel(&mut self) -> DbResult {
        check_finish(self.state)?;
        debug!("cancel on {}: dropping the cache", self.file.name());
        self.cache.reset();
        self.state = TxState::Canceled;
        Ok(())
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
    use crate::error::ErrorKind;

    fn open_cached(dir: &tempfile::TempDir, pages: usize) -> CachedFile {
        let layout = PageLayout::plain(1024);
        CachedFile::open(dir.path().join("cached.dat"), layout, pages).unwrap()
    }

    #[test]
    fn test_eviction_writes_through() {
        // page size 1024, pool capacity 8: writing 16 pages of unique
        // bytes must spill the first half to the file and keep the rest
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_cached(&dir, 8);
        file.start().unwrap();

        for i in 0..16u32 {
            let buf = vec![i as u8 + 1; 1024];
            file.write(&buf, i as u64 * 1024).unwrap();
            if i == 8 {
                // page 0 was evicted and saved when page 8 came in
                let raw = BaseFile::open(dir.path().join("cached.dat")).unwrap();
                let mut got = vec![0u8; 1024];
                raw.read(&mut got, 0).unwrap();
                assert_eq!(got, vec![1u8; 1024]);
            }
        }

        // pages 8..16 hit the cache, pages 0..7 refetch from the file;
        // both must return what was written
        for i in 0..16u32 {
            let mut got = vec![0u8; 1024];
            file.read(&mut got, i as u64 * 1024).unwrap();
            assert_eq!(got, vec![i as u8 + 1; 1024], "page {}", i);
        }
        file.stop().unwrap();
    }

    #[test]
    fn test_write_spanning_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_cached(&dir, 4);
        file.start().unwrap();

        let data: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
        file.write(&data, 500).unwrap();
        let mut got = vec![0u8; 3000];
        file.read(&mut got, 500).unwrap();
        assert_eq!(got, data);

        file.stop().unwrap();

        // after the flush the bytes are on disk verbatim
        let raw = BaseFile::open(dir.path().join("cached.dat")).unwrap();
        let mut got = vec![0u8; 3000];
        raw.read(&mut got, 500).unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn test_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_cached(&dir, 4);
        assert_eq!(file.state(), TxState::Unknown);

        file.start().unwrap();
        assert_eq!(file.state(), TxState::Started);
        let err = file.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bug);

        file.stop().unwrap();
        assert_eq!(file.state(), TxState::Stopped);
        assert_eq!(file.stop().unwrap_err().kind(), ErrorKind::Bug);

        file.start().unwrap();
        file.cancel().unwrap();
        assert_eq!(file.state(), TxState::Canceled);
    }

    #[test]
    fn test_cancel_discards_unevicted_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_cached(&dir, 8);
        file.start().unwrap();
        file.write(&[7u8; 100], 0).unwrap();
        file.cancel().unwrap();

        // the page never reached the file
        assert_eq!(file.size().unwrap(), 0);
        let mut got = vec![0u8; 100];
        file.read(&mut got, 0).unwrap();
        assert_eq!(got, vec![0u8; 100]);
    }
}
