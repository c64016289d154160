pub mod backup_file;
pub mod cache;
pub mod cached_file;
pub mod file;
pub mod journal_file;
pub mod page;
pub mod region;

use crate::error::{DbError, DbResult};

use self::cache::{PageCache, PageSaver, PageState};
use self::file::BaseFile;
use self::page::PageLayout;

/// The state of a transaction on a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Started,
    Stopped,
    Canceled,
    Unknown,
}

/// The capability set of a transactional file.
///
/// Offsets are physical (already page-aligned by the region mapper); the
/// caller never addresses the service area of a page. The three
/// implementors are the plain cached file, the backup-augmented file and
/// the journal-augmented file; a dataset picks one at construction.
pub trait TransactionalFile: Send + Sync {
    fn name(&self) -> &str;
    fn layout(&self) -> PageLayout;

    fn read(&mut self, buf: &mut [u8], pos: u64) -> DbResult;
    fn write(&mut self, buf: &[u8], pos: u64) -> DbResult;
    fn resize(&mut self, size: u64) -> DbResult<u64>;
    fn sizeup(&mut self, size: u64) -> DbResult<u64>;
    fn size(&self) -> DbResult<u64>;
    fn refresh(&mut self, size: u64, pos: u64) -> DbResult;
    fn flush(&self) -> DbResult;

    fn start(&mut self) -> DbResult;
    fn stop(&mut self) -> DbResult;
    fn cancel(&mut self) -> DbResult;
    fn state(&self) -> TxState;

    /// Open-time hook: reconstruct or roll back a pending transaction.
    /// Returns true when recovery had to repair anything.
    fn init(&mut self) -> DbResult<bool> {
        Ok(false)
    }

    /// Drop all cached pages without saving them.
    fn reset(&mut self);

    /// The underlying base file (advisory locks, raw size).
    fn base(&self) -> &BaseFile;
}

/// Check that a transaction may start and return the started state.
pub(crate) fn check_start(state: TxState) -> DbResult<TxState> {
    match state {
        TxState::Started => Err(DbError::bug("transaction is already started")),
        _ => Ok(TxState::Started),
    }
}

/// Check that a transaction may stop or cancel.
pub(crate) fn check_finish(state: TxState) -> DbResult {
    match state {
        TxState::Started => Ok(()),
        _ => Err(DbError::bug("transaction is not started")),
    }
}

/// Load the on-disk content of a freshly faulted page. A page past the end
/// of the file stays zero-filled.
pub(crate) fn load_page(file: &BaseFile, layout: PageLayout, index: u32, buf: &mut [u8]) -> DbResult {
    let offset = layout.page_offset(index);
    let size = file.size()?;
    if offset >= size {
        return Ok(());
    }
    let available = ((size - offset) as usize).min(layout.total());
    file.read(&mut buf[..available], offset)?;
    log::debug!(
        "page {} faulted in: {}...",
        index,
        crate::utils::dump_memory(&buf[..16.min(available)])
    );
    Ok(())
}

/// Assemble a read across one or more cache pages.
pub(crate) fn cached_read(
    cache: &mut PageCache,
    file: &BaseFile,
    layout: PageLayout,
    buf: &mut [u8],
    pos: u64,
    saver: PageSaver,
) -> DbResult {
    let mut pos = pos;
    let mut done = 0;
    while done < buf.len() {
        let index = layout.page_index(pos);
        let in_page = (pos - layout.page_offset(index)) as usize;
        debug_assert!(in_page < layout.data(), "read addresses the service area");
        let chunk = (layout.data() - in_page).min(buf.len() - done);

        let (page, faulted) = cache.get_page(index, saver)?;
        if faulted {
            load_page(file, layout, index, page)?;
        }
        buf[done..done + chunk].copy_from_slice(&page[in_page..in_page + chunk]);

        done += chunk;
        pos = layout.page_offset(index + 1);
    }
    Ok(())
}

/// Spread a write across one or more cache pages, marking each one dirty.
pub(crate) fn cached_write(
    cache: &mut PageCache,
    file: &BaseFile,
    layout: PageLayout,
    buf: &[u8],
    pos: u64,
    saver: PageSaver,
) -> DbResult {
    let mut pos = pos;
    let mut done = 0;
    while done < buf.len() {
        let index = layout.page_index(pos);
        let in_page = (pos - layout.page_offset(index)) as usize;
        debug_assert!(in_page < layout.data(), "write addresses the service area");
        let chunk = (layout.data() - in_page).min(buf.len() - done);

        let (page, faulted) = cache.get_page(index, saver)?;
        if faulted {
            load_page(file, layout, index, page)?;
        }
        page[in_page..in_page + chunk].copy_from_slice(&buf[done..done + chunk]);
        cache.dirty(index)?;

        done += chunk;
        pos = layout.page_offset(index + 1);
    }
    Ok(())
}

/// Drop the cached pages covering a range so the next read refetches them.
/// A dirty page in the range means a refresh raced a write, which is a bug.
pub(crate) fn refresh_pages(
    cache: &mut PageCache,
    layout: PageLayout,
    size: u64,
    pos: u64,
) -> DbResult {
    if size == 0 {
        return Ok(());
    }
    let first = layout.page_index(pos);
    let last = layout.page_index(pos + size - 1);
    for index in first..=last {
        match cache.page_state(index) {
            PageState::Dirty => {
                return Err(DbError::bug(&format!(
                    "refresh of a dirty page: {}",
                    index
                )));
            }
            PageState::Attached => cache.free_page(index),
            PageState::Detached => {}
        }
    }
    Ok(())
}

/// The name of the backup file next to a data file.
pub(crate) fn backup_name(name: &str) -> String {
    if let Some(stem) = name.strip_suffix(".dat") {
        format!("{}.bak", stem)
    } else {
        format!("{}.bak", name)
    }
}
