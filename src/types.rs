use std::sync::{Arc, RwLock};

/// Position of a record inside a table (a slot index, not a byte offset).
pub type Pos = u32;

/// Signed position, used by keys where a negative value marks a removed
/// table.
pub type SPos = i32;

/// Revision counter of a table, bumped by every mutating commit.
pub type Rev = u32;

/// The sentinel position meaning "no such record".
pub const NIL: Pos = u32::MAX;

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub fn pod<T>(value: T) -> Pod<T> {
    Arc::new(RwLock::new(value))
}
