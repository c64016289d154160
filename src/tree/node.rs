use bytes::{Buf, BufMut};

use crate::error::DbResult;
use crate::record::Record;
use crate::types::{Pos, NIL};

/// The size of the node fields embedded in a tree record.
pub const NODE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeColor {
    Red,
    Black,
}

/// The red-black node fields a tree record embeds: three positions into
/// the same table and the color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub parent: Pos,
    pub left: Pos,
    pub right: Pos,
    pub color: NodeColor,
}

impl Node {
    /// A fresh unlinked node, ready for insertion.
    pub fn leaf() -> Self {
        Node {
            parent: NIL,
            left: NIL,
            right: NIL,
            color: NodeColor::Red,
        }
    }

    pub fn pack(&self, out: &mut [u8]) {
        let mut buf = out;
        buf.put_u32_le(self.parent);
        buf.put_u32_le(self.left);
        buf.put_u32_le(self.right);
        buf.put_u32_le(match self.color {
            NodeColor::Red => 0,
            NodeColor::Black => 1,
        });
    }

    pub fn unpack(&mut self, data: &[u8]) {
        let mut buf = data;
        self.parent = buf.get_u32_le();
        self.left = buf.get_u32_le();
        self.right = buf.get_u32_le();
        self.color = if buf.get_u32_le() == 0 {
            NodeColor::Red
        } else {
            NodeColor::Black
        };
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::leaf()
    }
}

/// A record of a tree table: the payload followed by the node fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeRecord<R: Record> {
    pub body: R,
    pub node: Node,
}

impl<R: Record> TreeRecord<R> {
    pub fn new(body: R) -> Self {
        TreeRecord {
            body,
            node: Node::leaf(),
        }
    }
}

impl<R: Record> Default for TreeRecord<R> {
    fn default() -> Self {
        TreeRecord::new(R::default())
    }
}

impl<R: Record> Record for TreeRecord<R> {
    fn static_size() -> usize {
        R::static_size() + NODE_SIZE
    }

    fn pack(&self, out: &mut [u8]) {
        self.body.pack(&mut out[..R::static_size()]);
        self.node.pack(&mut out[R::static_size()..]);
    }

    fn unpack(&mut self, data: &[u8]) {
        self.body.unpack(&data[..R::static_size()]);
        self.node.unpack(&data[R::static_size()..]);
    }
}

/// What the tree algorithm needs from its storage: node access by
/// position plus the root slot kept in the table key. One implementor per
/// tree table; the node cache sits behind `load`/`store`.
pub trait NodeStore {
    type Key: Ord + Clone;

    fn load(&mut self, pos: Pos) -> DbResult<Node>;
    fn store(&mut self, pos: Pos, node: &Node) -> DbResult;
    fn key_of(&mut self, pos: Pos) -> DbResult<Self::Key>;
    fn root(&self) -> Pos;
    fn set_root(&mut self, root: Pos) -> DbResult;
}
