use std::time::Duration;

/// Total size of a cache page in bytes, service area included.
pub const PAGE_SIZE: usize = 512;

/// Count of pages kept resident by the cache of a dataset file.
pub const PAGE_COUNT: usize = 16;

/// How long a lock acquisition waits before reporting a lock failure.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

/// How many times a blocking read/write is retried on a transient error
/// before an io failure is raised.
pub const IO_ATTEMPTS: usize = 8;

/// Capacity of the per-operation cache of tree nodes.
pub const NODE_CACHE_SIZE: usize = 32;

/// Nap between polls of a contended lock or gateway door.
pub const LOCK_DELAY: Duration = Duration::from_micros(10);
