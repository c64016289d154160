pub mod gateway;
pub mod locker;
pub mod shared_lock;
pub mod shm;
