use std::marker::PhantomData;

use crate::dataset::key::{TableKey, TreeKey};
use crate::error::DbResult;
use crate::record::{IndexField, Record};
use crate::tree::node::{Node, NodeStore, TreeRecord};
use crate::tree::node_cache::NodeCache;
use crate::tree::rbtree;
use crate::types::{Pos, NIL};

use super::simple::Table;

/// The table whose records embed a red-black tree keyed by one payload
/// field.
///
/// The tree structure is persistent: the node fields travel with the
/// records and the root with the table key, so an open reconstructs
/// nothing but the cached min/max endpoints. The node cache is opened
/// around each structural operation and its buffered writes drain when
/// the operation ends. Physical compaction on erase slides records back
/// one slot at a time, repointing the neighbours as it goes.
pub struct TreeTable<R: Record, I: IndexField<R>> {
    table: Table<TreeRecord<R>, TreeKey>,
    min: Pos,
    max: Pos,
    cache: NodeCache<R>,
    _index: PhantomData<I>,
}

impl<R: Record, I: IndexField<R>> NodeStore for TreeTable<R, I> {
    type Key = I::Field;

    fn load(&mut self, pos: Pos) -> DbResult<Node> {
        if let Some(record) = self.cache.read(pos) {
            return Ok(record.node);
        }
        let record = self.table.read_at(pos)?;
        self.cache.keep(pos, &record);
        Ok(record.node)
    }

    fn store(&mut self, pos: Pos, node: &Node) -> DbResult {
        let mut record = match self.cache.read(pos) {
            Some(record) => record.clone(),
            None => self.table.read_at(pos)?,
        };
        record.node = *node;
        if !self.cache.write(pos, &record) {
            self.table.write_at(pos, &record)?;
        }
        Ok(())
    }

    fn key_of(&mut self, pos: Pos) -> DbResult<I::Field> {
        if let Some(record) = self.cache.read(pos) {
            return Ok(I::value(&record.body));
        }
        let record = self.table.read_at(pos)?;
        self.cache.keep(pos, &record);
        Ok(I::value(&record.body))
    }

    fn root(&self) -> Pos {
        self.table.skey().root()
    }

    fn set_root(&mut self, root: Pos) -> DbResult {
        self.table.skey_mut().set_root(root);
        Ok(())
    }
}

impl<R: Record, I: IndexField<R>> TreeTable<R, I> {
    pub fn new(table: Table<TreeRecord<R>, TreeKey>) -> DbResult<Self> {
        let mut tree = TreeTable {
            table,
            min: NIL,
            max: NIL,
            cache: NodeCache::new(),
            _index: PhantomData,
        };
        tree.fix_minmax()?;
        Ok(tree)
    }

    fn flush_cache(&mut self) -> DbResult {
        let writes = self.cache.take_writes();
        for (pos, record) in writes {
            self.table.write_at(pos, &record)?;
        }
        Ok(())
    }

    /// Recompute the cached range endpoints from the tree.
    fn fix_minmax(&mut self) -> DbResult {
        let root = self.table.skey().root();
        self.min = rbtree::minimum(self, root)?;
        self.max = rbtree::maximum(self, root)?;
        Ok(())
    }

    pub fn table(&self) -> &Table<TreeRecord<R>, TreeKey> {
        &self.table
    }

    pub fn count(&self) -> u32 {
        self.table.count()
    }

    pub fn limit(&self) -> u32 {
        self.table.limit()
    }

    pub fn empty(&self) -> bool {
        self.table.empty()
    }

    pub fn beg_pos(&self) -> Pos {
        self.table.beg_pos()
    }

    pub fn end_pos(&self) -> Pos {
        self.table.end_pos()
    }

    pub fn root_pos(&self) -> Pos {
        self.table.skey().root()
    }

    /// The position with the minimum key; the begin of in-order walks.
    pub fn first(&self) -> Pos {
        self.min
    }

    /// The position with the maximum key; the begin of reverse walks.
    pub fn last(&self) -> Pos {
        self.max
    }

    pub fn next(&mut self, pos: Pos) -> DbResult<Pos> {
        rbtree::successor(self, pos)
    }

    pub fn prev(&mut self, pos: Pos) -> DbResult<Pos> {
        rbtree::predecessor(self, pos)
    }

    pub fn lower_bound(&mut self, key: &I::Field) -> DbResult<Pos> {
        rbtree::lower_bound(self, key)
    }

    pub fn upper_bound(&mut self, key: &I::Field) -> DbResult<Pos> {
        rbtree::upper_bound(self, key)
    }

    pub fn find_key(&mut self, key: &I::Field) -> DbResult<Pos> {
        rbtree::find(self, key)
    }

    pub fn read(&self, pos: Pos) -> DbResult<R> {
        Ok(self.table.read(pos)?.body)
    }

    pub fn rread(&self, pos: Pos) -> DbResult<R> {
        Ok(self.table.rread(pos)?.body)
    }

    pub fn read_list(&self, pos: Pos, count: u32) -> DbResult<Vec<R>> {
        let records = self.table.read_list(pos, count)?;
        Ok(records.into_iter().map(|r| r.body).collect())
    }

    pub fn read_front(&self) -> DbResult<Option<R>> {
        Ok(self.table.read_front()?.map(|r| r.body))
    }

    pub fn read_back(&self) -> DbResult<Option<R>> {
        Ok(self.table.read_back()?.map(|r| r.body))
    }

    pub fn find(
        &self,
        pred: &mut dyn FnMut(&R) -> bool,
        pos: Pos,
        count: u32,
    ) -> DbResult<Pos> {
        self.table.find(&mut |r: &TreeRecord<R>| pred(&r.body), pos, count)
    }

    pub fn rfind(
        &self,
        pred: &mut dyn FnMut(&R) -> bool,
        end: Pos,
        count: u32,
    ) -> DbResult<Pos> {
        self.table.rfind(&mut |r: &TreeRecord<R>| pred(&r.body), end, count)
    }

    /// Append a record and hook it into the tree. A full table first
    /// unlinks the oldest record, whose slot the ring reuses.
    pub fn add(&mut self, record: &R) -> DbResult<Pos> {
        if self.table.count() == self.table.limit() {
            let oldest = self.table.beg_pos();
            self.cache.begin();
            rbtree::unlink(self, oldest)?;
            self.flush_cache()?;
        }
        let pos = self.table.add(&TreeRecord::new(record.clone()))?;
        self.cache.begin();
        rbtree::insert(self, pos)?;
        self.flush_cache()?;
        self.fix_minmax()?;
        self.table.touch()?;
        Ok(pos)
    }

    pub fn add_list(&mut self, records: &[R]) -> DbResult<Pos> {
        let mut last = self.table.end_pos();
        for record in records {
            last = self.add(record)?;
        }
        Ok(last)
    }

    /// Erase the first record holding `key`; false when absent.
    pub fn erase(&mut self, key: &I::Field) -> DbResult<bool> {
        let pos = rbtree::find(self, key)?;
        if pos == NIL {
            return Ok(false);
        }
        self.erase_at(pos)?;
        Ok(true)
    }

    /// Erase the record at a known position.
    pub fn erase_at(&mut self, pos: Pos) -> DbResult {
        // validates the position
        self.table.read(pos)?;
        self.cache.begin();
        rbtree::unlink(self, pos)?;
        self.flush_cache()?;
        self.remove_record(pos)?;
        self.fix_minmax()?;
        self.table.touch()
    }

    /// Replace the record at `pos`: detach its node, rewrite the body and
    /// hook it back in under the new key.
    pub fn replace(&mut self, pos: Pos, record: &R) -> DbResult {
        self.table.read(pos)?;
        self.cache.begin();
        rbtree::unlink(self, pos)?;
        self.flush_cache()?;
        self.table.write(&TreeRecord::new(record.clone()), pos)?;
        self.cache.begin();
        rbtree::insert(self, pos)?;
        self.flush_cache()?;
        self.fix_minmax()?;
        self.table.touch()
    }

    /// Physically remove an already-unlinked record, sliding the tail of
    /// the window back and repointing the neighbours of every moved node.
    fn remove_record(&mut self, pos: Pos) -> DbResult {
        let count = self.table.count();
        let limit = self.table.limit();
        let offset = (pos + limit - self.table.beg_pos()) % limit;
        let tail = count - offset - 1;

        let mut dst = pos;
        let mut src = self.table.inc_pos(pos, 1);
        for _ in 0..tail {
            let record = self.table.read_at(src)?;
            rbtree::on_move(self, &record.node, src, dst)?;
            self.table.write_at(dst, &record)?;
            dst = src;
            src = self.table.inc_pos(src, 1);
        }

        let end = self.table.dec_pos(self.table.end_pos(), 1);
        self.table.skey_mut().set_end(end);
        self.table.skey_mut().set_count(count - 1);
        self.table.touch()
    }

    /// Positions of the records whose key falls into [beg, end), in key
    /// order; `cap` clips from the respective end (0 means no cap).
    pub fn read_index(&mut self, beg: &I::Field, end: &I::Field, cap: u32) -> DbResult<Vec<Pos>> {
        let mut out = Vec::new();
        if beg >= end {
            return Ok(out);
        }
        let mut pos = rbtree::lower_bound(self, beg)?;
        while pos != NIL && &self.key_of(pos)? < end {
            out.push(pos);
            if cap != 0 && out.len() as u32 >= cap {
                break;
            }
            pos = rbtree::successor(self, pos)?;
        }
        Ok(out)
    }

    /// Same range in descending key order.
    pub fn rread_index(&mut self, beg: &I::Field, end: &I::Field, cap: u32) -> DbResult<Vec<Pos>> {
        let mut out = self.read_index(beg, end, 0)?;
        out.reverse();
        if cap != 0 {
            out.truncate(cap as usize);
        }
        Ok(out)
    }

    pub fn read_by_index(
        &mut self,
        beg: &I::Field,
        end: &I::Field,
        cap: u32,
    ) -> DbResult<Vec<R>> {
        let positions = self.read_index(beg, end, cap)?;
        let mut out = Vec::with_capacity(positions.len());
        for pos in positions {
            out.push(self.table.read_at(pos)?.body);
        }
        Ok(out)
    }

    pub fn rread_by_index(
        &mut self,
        beg: &I::Field,
        end: &I::Field,
        cap: u32,
    ) -> DbResult<Vec<R>> {
        let positions = self.rread_index(beg, end, cap)?;
        let mut out = Vec::with_capacity(positions.len());
        for pos in positions {
            out.push(self.table.read_at(pos)?.body);
        }
        Ok(out)
    }

    pub fn read_front_by_index(
        &mut self,
        beg: &I::Field,
        end: &I::Field,
    ) -> DbResult<Option<(Pos, R)>> {
        let positions = self.read_index(beg, end, 1)?;
        match positions.first() {
            Some(&pos) => Ok(Some((pos, self.table.read_at(pos)?.body))),
            None => Ok(None),
        }
    }

    pub fn read_back_by_index(
        &mut self,
        beg: &I::Field,
        end: &I::Field,
    ) -> DbResult<Option<(Pos, R)>> {
        let positions = self.rread_index(beg, end, 1)?;
        match positions.first() {
            Some(&pos) => Ok(Some((pos, self.table.read_at(pos)?.body))),
            None => Ok(None),
        }
    }

    /// The first record holding exactly this key.
    pub fn get(&mut self, key: &I::Field) -> DbResult<Option<(Pos, R)>> {
        let pos = rbtree::find(self, key)?;
        if pos == NIL {
            return Ok(None);
        }
        Ok(Some((pos, self.table.read_at(pos)?.body)))
    }

    /// The count of records with keys in [beg, end).
    pub fn get_range_size(&mut self, beg: &I::Field, end: &I::Field) -> DbResult<u32> {
        Ok(self.read_index(beg, end, 0)?.len() as u32)
    }

    /// Scan the key range in order for the first record matching the
    /// predicate.
    pub fn find_by_index(
        &mut self,
        pred: &mut dyn FnMut(&R) -> bool,
        beg: &I::Field,
        end: &I::Field,
    ) -> DbResult<Pos> {
        for pos in self.read_index(beg, end, 0)? {
            let record = self.table.read_at(pos)?;
            if pred(&record.body) {
                return Ok(pos);
            }
        }
        Ok(NIL)
    }

    pub fn rfind_by_index(
        &mut self,
        pred: &mut dyn FnMut(&R) -> bool,
        beg: &I::Field,
        end: &I::Field,
    ) -> DbResult<Pos> {
        for pos in self.rread_index(beg, end, 0)? {
            let record = self.table.read_at(pos)?;
            if pred(&record.body) {
                return Ok(pos);
            }
        }
        Ok(NIL)
    }

    /// Erase every record whose key falls into [beg, end); returns the
    /// removed count. Lookups rerun after each erase because compaction
    /// renumbers positions.
    pub fn remove_by_index(&mut self, beg: &I::Field, end: &I::Field) -> DbResult<u32> {
        let mut removed = 0;
        loop {
            if beg >= end {
                break;
            }
            let pos = rbtree::lower_bound(self, beg)?;
            if pos == NIL || &self.key_of(pos)? >= end {
                break;
            }
            self.erase_at(pos)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn clear(&mut self) -> DbResult {
        self.table.clear()?;
        self.table.skey_mut().set_root(NIL);
        self.min = NIL;
        self.max = NIL;
        self.table.touch()
    }

    pub fn update(&mut self) -> DbResult {
        self.table.update()
    }

    /// Refresh against the shadow key; a stale table re-reads its range
    /// endpoints from the (persistent) tree.
    pub fn refresh(&mut self) -> DbResult<bool> {
        let relevant = self.table.refresh()?;
        if !relevant {
            self.fix_minmax()?;
        }
        Ok(relevant)
    }

    pub fn start(&mut self) {
        self.table.start()
    }

    pub fn recovery(&mut self) -> DbResult {
        self.table.recovery()?;
        self.fix_minmax()
    }

    /// Structural self-check used by tests and the tools' verification
    /// mode; returns the node count.
    pub fn verify(&mut self) -> DbResult<u32> {
        rbtree::verify(self)
    }
}
