use bytes::{Buf, BufMut};

use crate::record::Record;
use crate::types::{Pos, Rev, SPos, NIL};

/// The per-table metadata record stored in the key region.
///
/// `pos` is the physical table slot; a negative value marks a removed
/// table whose slot may be reused. `rev` strictly increases on every
/// mutating commit, which is how other processes notice staleness.
pub trait TableKey: Record {
    fn key(&self) -> u64;
    fn set_key(&mut self, key: u64);
    fn pos(&self) -> SPos;
    fn set_pos(&mut self, pos: SPos);
    fn beg(&self) -> Pos;
    fn set_beg(&mut self, beg: Pos);
    fn end(&self) -> Pos;
    fn set_end(&mut self, end: Pos);
    fn count(&self) -> u32;
    fn set_count(&mut self, count: u32);
    fn rev(&self) -> Rev;
    fn set_rev(&mut self, rev: Rev);

    /// The root of the embedded tree; NIL for keys of plain tables.
    fn root(&self) -> Pos {
        NIL
    }
    fn set_root(&mut self, _root: Pos) {}

    fn removed(&self) -> bool {
        self.pos() < 0
    }
}

/// The simple key of a table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleKey {
    pub key: u64,
    pub pos: SPos,
    pub beg: Pos,
    pub end: Pos,
    pub count: u32,
    pub rev: Rev,
}

impl SimpleKey {
    pub fn new(key: u64, pos: SPos) -> Self {
        SimpleKey {
            key,
            pos,
            beg: 0,
            end: 0,
            count: 0,
            rev: 0,
        }
    }
}

impl Default for SimpleKey {
    fn default() -> Self {
        // a default key is a tombstone
        SimpleKey::new(0, -1)
    }
}

impl Record for SimpleKey {
    fn static_size() -> usize {
        8 + 4 + 4 + 4 + 4 + 4
    }

    fn pack(&self, out: &mut [u8]) {
        let mut buf = out;
        buf.put_u64_le(self.key);
        buf.put_i32_le(self.pos);
        buf.put_u32_le(self.beg);
        buf.put_u32_le(self.end);
        buf.put_u32_le(self.count);
        buf.put_u32_le(self.rev);
    }

    fn unpack(&mut self, data: &[u8]) {
        let mut buf = data;
        self.key = buf.get_u64_le();
        self.pos = buf.get_i32_le();
        self.beg = buf.get_u32_le();
        self.end = buf.get_u32_le();
        self.count = buf.get_u32_le();
        self.rev = buf.get_u32_le();
    }
}

impl TableKey for SimpleKey {
    fn key(&self) -> u64 {
        self.key
    }
    fn set_key(&mut self, key: u64) {
        self.key = key;
    }
    fn pos(&self) -> SPos {
        self.pos
    }
    fn set_pos(&mut self, pos: SPos) {
        self.pos = pos;
    }
    fn beg(&self) -> Pos {
        self.beg
    }
    fn set_beg(&mut self, beg: Pos) {
        self.beg = beg;
    }
    fn end(&self) -> Pos {
        self.end
    }
    fn set_end(&mut self, end: Pos) {
        self.end = end;
    }
    fn count(&self) -> u32 {
        self.count
    }
    fn set_count(&mut self, count: u32) {
        self.count = count;
    }
    fn rev(&self) -> Rev {
        self.rev
    }
    fn set_rev(&mut self, rev: Rev) {
        self.rev = rev;
    }
}

/// The key of a tree table: the simple key plus the root position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeKey {
    pub base: SimpleKey,
    pub root: Pos,
}

impl TreeKey {
    pub fn new(key: u64, pos: SPos) -> Self {
        TreeKey {
            base: SimpleKey::new(key, pos),
            root: NIL,
        }
    }
}

impl Default for TreeKey {
    fn default() -> Self {
        TreeKey::new(0, -1)
    }
}

impl Record for TreeKey {
    fn static_size() -> usize {
        SimpleKey::static_size() + 4
    }

    fn pack(&self, out: &mut [u8]) {
        self.base.pack(&mut out[..SimpleKey::static_size()]);
        let mut buf = &mut out[SimpleKey::static_size()..];
        buf.put_u32_le(self.root);
    }

    fn unpack(&mut self, data: &[u8]) {
        self.base.unpack(&data[..SimpleKey::static_size()]);
        let mut buf = &data[SimpleKey::static_size()..];
        self.root = buf.get_u32_le();
    }
}

impl TableKey for TreeKey {
    fn key(&self) -> u64 {
        self.base.key
    }
    fn set_key(&mut self, key: u64) {
        self.base.key = key;
    }
    fn pos(&self) -> SPos {
        self.base.pos
    }
    fn set_pos(&mut self, pos: SPos) {
        self.base.pos = pos;
    }
    fn beg(&self) -> Pos {
        self.base.beg
    }
    fn set_beg(&mut self, beg: Pos) {
        self.base.beg = beg;
    }
    fn end(&self) -> Pos {
        self.base.end
    }
    fn set_end(&mut self, end: Pos) {
        self.base.end = end;
    }
    fn count(&self) -> u32 {
        self.base.count
    }
    fn set_count(&mut self, count: u32) {
        self.base.count = count;
    }
    fn rev(&self) -> Rev {
        self.base.rev
    }
    fn set_rev(&mut self, rev: Rev) {
        self.base.rev = rev;
    }
    fn root(&self) -> Pos {
        self.root
    }
    fn set_root(&mut self, root: Pos) {
        self.root = root;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_key_roundtrip() {
        let mut key = SimpleKey::new(0xdead_beef_u64, 3);
        key.beg = 1;
        key.end = 2;
        key.count = 1;
        key.rev = 9;
        let mut buf = vec![0u8; SimpleKey::static_size()];
        key.pack(&mut buf);
        assert_eq!(SimpleKey::unpack_new(&buf), key);
        assert_eq!(buf.len(), 28);
    }

    #[test]
    fn test_tree_key_roundtrip() {
        let mut key = TreeKey::new(5, 0);
        key.root = 17;
        let mut buf = vec![0u8; TreeKey::static_size()];
        key.pack(&mut buf);
        assert_eq!(TreeKey::unpack_new(&buf), key);
        assert_eq!(buf.len(), 32);
    }

    #[test]
    fn test_tombstone() {
        assert!(SimpleKey::default().removed());
        assert!(TreeKey::default().removed());
        assert_eq!(TreeKey::default().root(), NIL);
        let live = SimpleKey::new(1, 0);
        assert!(!live.removed());
    }
}
