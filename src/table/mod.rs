pub mod indexed;
pub mod simple;
pub mod source;
pub mod tree;

use crate::error::DbResult;
use crate::types::Pos;

/// The capability a table uses to tell a derived structure about physical
/// record movement, so secondary maps and embedded trees can follow
/// compaction.
pub trait RecordMover<R> {
    /// Called before the record moves from `source` to `dest`.
    fn on_move(&mut self, record: &R, source: Pos, dest: Pos) -> DbResult;

    /// Called before the record at `pos` is dropped from the table.
    fn on_remove(&mut self, record: &R, pos: Pos) -> DbResult;
}

/// The mover of a plain table: nobody to notify.
pub struct NullMover;

impl<R> RecordMover<R> for NullMover {
    fn on_move(&mut self, _record: &R, _source: Pos, _dest: Pos) -> DbResult {
        Ok(())
    }

    fn on_remove(&mut self, _record: &R, _pos: Pos) -> DbResult {
        Ok(())
    }
}
