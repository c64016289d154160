use std::marker::PhantomData;

use log::debug;

use crate::dataset::key::TableKey;
use crate::error::{DbError, DbResult};
use crate::record::Record;
use crate::sync::shm::SkeyMap;
use crate::types::{Pos, Rev, NIL};
use crate::utils::HandyRwLock;

use super::source::Source;
use super::{NullMover, RecordMover};

/// A bounded circular table of fixed-size records.
///
/// The table is a ring over `limit()` slots; `beg` is the first live
/// record, `end` the one-past-last write position, and `add` on a full
/// table overwrites the oldest record. The table keeps its key record (the
/// metadata `{beg, end, count, rev}`) in an in-memory shadow, writes it
/// through on every mutation and publishes it to the cross-process shadow
/// map, so `refresh` can detect another process moving the table forward.
///
/// The table itself performs no locking; sessions own that.
pub struct Table<R: Record, K: TableKey> {
    source: Source,
    key_source: Source,
    index: u32,
    skey: K,
    cast: K,
    shadow: Option<SkeyMap>,
    _record: PhantomData<R>,
}

impl<R: Record, K: TableKey> Table<R, K> {
    pub fn new(
        source: Source,
        key_source: Source,
        index: u32,
        skey: K,
        shadow: Option<SkeyMap>,
    ) -> Self {
        debug_assert_eq!(source.rec_size(), R::static_size());
        let cast = skey.clone();
        Table {
            source,
            key_source,
            index,
            skey,
            cast,
            shadow,
            _record: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn skey(&self) -> &K {
        &self.skey
    }

    pub fn limit(&self) -> u32 {
        self.source.rec_count()
    }

    pub fn count(&self) -> u32 {
        self.skey.count()
    }

    pub fn empty(&self) -> bool {
        self.count() == 0
    }

    pub fn beg_pos(&self) -> Pos {
        self.skey.beg()
    }

    pub fn end_pos(&self) -> Pos {
        self.skey.end()
    }

    /// The position of the first record, NIL when the table is empty.
    pub fn front_pos(&self) -> Pos {
        if self.empty() {
            NIL
        } else {
            self.beg_pos()
        }
    }

    /// The position of the last record, NIL when the table is empty.
    pub fn back_pos(&self) -> Pos {
        if self.empty() {
            NIL
        } else {
            self.dec_pos(self.end_pos(), 1)
        }
    }

    pub fn revision(&self) -> Rev {
        self.skey.rev()
    }

    pub fn inc_pos(&self, pos: Pos, count: u32) -> Pos {
        (pos + count) % self.limit()
    }

    pub fn dec_pos(&self, pos: Pos, count: u32) -> Pos {
        (pos + self.limit() - count % self.limit()) % self.limit()
    }

    /// The count of records in the range [beg, end) of the ring.
    pub fn distance(&self, beg: Pos, end: Pos) -> u32 {
        if beg == end {
            if self.count() == self.limit() {
                self.limit()
            } else {
                0
            }
        } else {
            (end + self.limit() - beg) % self.limit()
        }
    }

    /// How far a position is from `beg` along the ring.
    fn window_offset(&self, pos: Pos) -> u32 {
        (pos + self.limit() - self.beg_pos()) % self.limit()
    }

    fn check_pos(&self, pos: Pos) -> DbResult {
        if pos >= self.limit() || self.window_offset(pos) >= self.count() {
            return Err(DbError::range(&format!(
                "position {} out of the window [beg {}, count {}]",
                pos,
                self.beg_pos(),
                self.count()
            )));
        }
        Ok(())
    }

    fn check_range(&self, pos: Pos, count: u32) -> DbResult {
        if count == 0 {
            return Ok(());
        }
        if pos >= self.limit() || self.window_offset(pos) + count > self.count() {
            return Err(DbError::range(&format!(
                "range [{}; {}) out of the window [beg {}, count {}]",
                pos,
                count,
                self.beg_pos(),
                self.count()
            )));
        }
        Ok(())
    }

    /// Read the record of a slot without any window check.
    pub(crate) fn read_at(&self, pos: Pos) -> DbResult<R> {
        let mut buf = vec![0u8; R::static_size()];
        self.source.read(&mut buf, self.source.rec_offset(self.index, pos))?;
        Ok(R::unpack_new(&buf))
    }

    /// Write the record of a slot without any window check or key update.
    pub(crate) fn write_at(&self, pos: Pos, record: &R) -> DbResult {
        let mut buf = vec![0u8; R::static_size()];
        record.pack(&mut buf);
        self.source.write(&buf, self.source.rec_offset(self.index, pos))
    }

    pub fn read(&self, pos: Pos) -> DbResult<R> {
        self.check_pos(pos)?;
        self.read_at(pos)
    }

    /// Reverse read: same record, validated for backward iteration.
    pub fn rread(&self, pos: Pos) -> DbResult<R> {
        self.check_pos(pos)?;
        self.read_at(pos)
    }

    /// Read `count` records starting at `pos`, following the ring.
    pub fn read_list(&self, pos: Pos, count: u32) -> DbResult<Vec<R>> {
        self.check_range(pos, count)?;
        let mut records = Vec::with_capacity(count as usize);
        let mut p = pos;
        for _ in 0..count {
            records.push(self.read_at(p)?);
            p = self.inc_pos(p, 1);
        }
        Ok(records)
    }

    pub fn write(&mut self, record: &R, pos: Pos) -> DbResult {
        self.check_pos(pos)?;
        self.write_at(pos, record)?;
        self.bump()
    }

    /// Reverse write: same slot, validated for backward iteration.
    pub fn rwrite(&mut self, record: &R, pos: Pos) -> DbResult {
        self.write(record, pos)
    }

    pub fn write_list(&mut self, records: &[R], pos: Pos) -> DbResult {
        self.check_range(pos, records.len() as u32)?;
        let mut p = pos;
        for record in records {
            self.write_at(p, record)?;
            p = self.inc_pos(p, 1);
        }
        self.bump()
    }

    pub fn add(&mut self, record: &R) -> DbResult<Pos> {
        self.add_with(record, &mut NullMover)
    }

    /// Append a record; on a full table the oldest one is overwritten and
    /// the mover hears about its removal first.
    pub fn add_with(&mut self, record: &R, mover: &mut dyn RecordMover<R>) -> DbResult<Pos> {
        let pos = self.end_pos();
        if self.count() == self.limit() {
            let oldest = self.read_at(pos)?;
            mover.on_remove(&oldest, pos)?;
            self.write_at(pos, record)?;
            let beg = self.inc_pos(self.beg_pos(), 1);
            let end = self.inc_pos(self.end_pos(), 1);
            self.skey.set_beg(beg);
            self.skey.set_end(end);
        } else {
            self.write_at(pos, record)?;
            let end = self.inc_pos(self.end_pos(), 1);
            self.skey.set_end(end);
            let count = self.count() + 1;
            self.skey.set_count(count);
        }
        self.bump()?;
        Ok(pos)
    }

    pub fn add_list(&mut self, records: &[R]) -> DbResult<Pos> {
        let mut last = self.end_pos();
        for record in records {
            last = self.add(record)?;
        }
        Ok(last)
    }

    pub fn remove(&mut self, pos: Pos) -> DbResult {
        self.remove_with(pos, &mut NullMover)
    }

    pub fn remove_with(&mut self, pos: Pos, mover: &mut dyn RecordMover<R>) -> DbResult {
        self.remove_range_with(pos, 1, mover)
    }

    pub fn remove_range(&mut self, pos: Pos, count: u32) -> DbResult {
        self.remove_range_with(pos, count, &mut NullMover)
    }

    /// Remove `count` records starting at `pos`, closing the gap by moving
    /// the later records toward the hole. The mover hears about every
    /// removed record and about every physical move before it happens.
    pub fn remove_range_with(
        &mut self,
        pos: Pos,
        count: u32,
        mover: &mut dyn RecordMover<R>,
    ) -> DbResult {
        if count == 0 {
            return Ok(());
        }
        self.check_range(pos, count)?;

        let mut p = pos;
        for _ in 0..count {
            let record = self.read_at(p)?;
            mover.on_remove(&record, p)?;
            p = self.inc_pos(p, 1);
        }

        // shift the tail of the window back over the hole
        let tail = self.count() - self.window_offset(pos) - count;
        let mut dst = pos;
        let mut src = self.inc_pos(pos, count);
        for _ in 0..tail {
            let record = self.read_at(src)?;
            mover.on_move(&record, src, dst)?;
            self.write_at(dst, &record)?;
            dst = self.inc_pos(dst, 1);
            src = self.inc_pos(src, 1);
        }

        let end = self.dec_pos(self.end_pos(), count);
        self.skey.set_end(end);
        let left = self.count() - count;
        self.skey.set_count(left);
        self.bump()
    }

    pub fn remove_back(&mut self, count: u32) -> DbResult<u32> {
        self.remove_back_with(count, &mut NullMover)
    }

    /// Remove up to `count` records from the back; no compaction needed.
    pub fn remove_back_with(
        &mut self,
        count: u32,
        mover: &mut dyn RecordMover<R>,
    ) -> DbResult<u32> {
        let removed = count.min(self.count());
        for _ in 0..removed {
            let pos = self.back_pos();
            let record = self.read_at(pos)?;
            mover.on_remove(&record, pos)?;
            self.skey.set_end(pos);
            let left = self.count() - 1;
            self.skey.set_count(left);
        }
        if removed > 0 {
            self.bump()?;
        }
        Ok(removed)
    }

    pub fn read_front(&self) -> DbResult<Option<R>> {
        if self.empty() {
            return Ok(None);
        }
        Ok(Some(self.read_at(self.beg_pos())?))
    }

    pub fn read_front_list(&self, count: u32) -> DbResult<Vec<R>> {
        self.read_list(self.beg_pos(), count)
    }

    pub fn read_back(&self) -> DbResult<Option<R>> {
        if self.empty() {
            return Ok(None);
        }
        Ok(Some(self.read_at(self.back_pos())?))
    }

    pub fn read_back_list(&self, count: u32) -> DbResult<Vec<R>> {
        if count > self.count() {
            return Err(DbError::range(&format!(
                "read_back of {} records from a table of {}",
                count,
                self.count()
            )));
        }
        self.read_list(self.dec_pos(self.end_pos(), count), count)
    }

    /// Scan [pos, pos + count) forward; the first match wins, NIL when
    /// nothing matches. An empty range never invokes the predicate.
    pub fn find(
        &self,
        pred: &mut dyn FnMut(&R) -> bool,
        pos: Pos,
        count: u32,
    ) -> DbResult<Pos> {
        self.check_range(pos, count)?;
        let mut p = pos;
        for _ in 0..count {
            let record = self.read_at(p)?;
            if pred(&record) {
                return Ok(p);
            }
            p = self.inc_pos(p, 1);
        }
        Ok(NIL)
    }

    /// Scan [end - count, end) backward; the first match wins.
    pub fn rfind(
        &self,
        pred: &mut dyn FnMut(&R) -> bool,
        end: Pos,
        count: u32,
    ) -> DbResult<Pos> {
        if count > 0 {
            self.check_range(self.dec_pos(end, count), count)?;
        }
        let mut p = end;
        for _ in 0..count {
            p = self.dec_pos(p, 1);
            let record = self.read_at(p)?;
            if pred(&record) {
                return Ok(p);
            }
        }
        Ok(NIL)
    }

    /// Collect matching records going forward, up to `cap` of them
    /// (0 means no cap).
    pub fn find_all(
        &self,
        pred: &mut dyn FnMut(&R) -> bool,
        pos: Pos,
        count: u32,
        cap: u32,
    ) -> DbResult<Vec<(Pos, R)>> {
        self.check_range(pos, count)?;
        let mut found = Vec::new();
        let mut p = pos;
        for _ in 0..count {
            let record = self.read_at(p)?;
            if pred(&record) {
                found.push((p, record));
                if cap != 0 && found.len() as u32 >= cap {
                    break;
                }
            }
            p = self.inc_pos(p, 1);
        }
        Ok(found)
    }

    /// Collect matching records going backward from `end`, up to `cap`.
    pub fn rfind_all(
        &self,
        pred: &mut dyn FnMut(&R) -> bool,
        end: Pos,
        count: u32,
        cap: u32,
    ) -> DbResult<Vec<(Pos, R)>> {
        if count > 0 {
            self.check_range(self.dec_pos(end, count), count)?;
        }
        let mut found = Vec::new();
        let mut p = end;
        for _ in 0..count {
            p = self.dec_pos(p, 1);
            let record = self.read_at(p)?;
            if pred(&record) {
                found.push((p, record));
                if cap != 0 && found.len() as u32 >= cap {
                    break;
                }
            }
        }
        Ok(found)
    }

    pub fn clear(&mut self) -> DbResult {
        self.skey.set_beg(0);
        self.skey.set_end(0);
        self.skey.set_count(0);
        self.bump()
    }

    /// Bump the revision and write the key through.
    fn bump(&mut self) -> DbResult {
        let rev = self.skey.rev().wrapping_add(1);
        self.skey.set_rev(rev);
        self.update()
    }

    /// Write the in-memory key to the key region and the shadow map.
    pub fn update(&mut self) -> DbResult {
        let mut buf = vec![0u8; K::static_size()];
        self.skey.pack(&mut buf);
        self.key_source
            .write(&buf, self.key_source.rec_offset(0, self.index))?;
        if let Some(shadow) = &self.shadow {
            shadow.wl().insert(self.skey.key(), buf);
        }
        Ok(())
    }

    /// Check the shadow map for a newer revision; when another process
    /// moved the table forward, drop the stale pages, adopt the new key
    /// and report `false` so the caller can rebuild derived state.
    pub fn refresh(&mut self) -> DbResult<bool> {
        let fresh: Option<K> = match &self.shadow {
            Some(shadow) => shadow
                .rl()
                .get(&self.skey.key())
                .map(|buf| K::unpack_new(buf)),
            None => None,
        };
        if let Some(fresh) = fresh {
            if fresh.rev() != self.skey.rev() {
                debug!(
                    "table {} is stale: rev {} behind {}",
                    self.index,
                    self.skey.rev(),
                    fresh.rev()
                );
                self.source.refresh_table(self.index)?;
                self.skey = fresh;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Snapshot the key at transaction start.
    pub fn start(&mut self) {
        self.cast = self.skey.clone();
    }

    /// Restore the key from the snapshot after a canceled transaction.
    pub fn recovery(&mut self) -> DbResult {
        self.skey = self.cast.clone();
        // the on-disk key was already restored by the backup; only the
        // shadow map has to follow
        if let Some(shadow) = &self.shadow {
            let mut buf = vec![0u8; K::static_size()];
            self.skey.pack(&mut buf);
            shadow.wl().insert(self.skey.key(), buf);
        }
        Ok(())
    }

    pub(crate) fn source(&self) -> &Source {
        &self.source
    }

    /// Mutable access to the key shadow for wrappers that keep extra
    /// metadata (the tree root) in it; pair with `touch`.
    pub(crate) fn skey_mut(&mut self) -> &mut K {
        &mut self.skey
    }

    /// Bump the revision and persist the key after out-of-band metadata
    /// changes.
    pub(crate) fn touch(&mut self) -> DbResult {
        self.bump()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::dataset::info::Info;
    use crate::dataset::key::SimpleKey;
    use crate::record::Record;
    use crate::storage::cached_file::CachedFile;
    use crate::storage::page::PageLayout;
    use crate::storage::region::FileRegion;
    use crate::storage::TransactionalFile;
    use crate::table::source::{FilePod, Source};
    use crate::types::pod;

    use super::*;

    /// A data table over a real cached file in a scratch directory, laid
    /// out exactly like a one-table dataset.
    pub(crate) fn make_table<R: Record>(
        dir: &tempfile::TempDir,
        rec_count: u32,
    ) -> Table<R, SimpleKey> {
        let layout = PageLayout::plain(256);
        let info_size = Info::static_size() as u64;
        let key_size = SimpleKey::static_size() as u64;
        let table_size = rec_count as u64 * R::static_size() as u64;

        let region = Arc::new(FileRegion::group(
            layout,
            1,
            vec![
                FileRegion::leaf(layout, 1, info_size),
                FileRegion::group(
                    layout,
                    1,
                    vec![
                        FileRegion::leaf(layout, 1, key_size),
                        FileRegion::leaf(layout, 1, table_size),
                    ],
                ),
            ],
        ));

        let mut file = CachedFile::open(dir.path().join("table.dat"), layout, 8).unwrap();
        file.resize(region.full_size()).unwrap();
        file.start().unwrap();
        let file: FilePod = pod(file);

        let source = Source::new(
            Arc::clone(&file),
            Arc::clone(&region),
            info_size + key_size,
            R::static_size(),
            0,
            key_size,
            1,
            rec_count,
        );
        let key_source = Source::new(
            file,
            region,
            info_size,
            SimpleKey::static_size(),
            table_size,
            0,
            1,
            1,
        );
        Table::new(source, key_source, 0, SimpleKey::new(1, 0), None)
    }
}
