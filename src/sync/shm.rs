use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use lazy_static::lazy_static;

use super::gateway::Gateway;
use super::shared_lock::{OrderedSharedLock, RwLockable};

/// The shadow of the key records, keyed by table key, holding packed key
/// bytes. It lives next to the named locks so every process sees the same
/// metadata without touching the file.
pub type SkeyMap = Arc<RwLock<HashMap<u64, Vec<u8>>>>;

lazy_static! {
    static ref LOCKS: Mutex<HashMap<String, Arc<OrderedSharedLock>>> = Mutex::new(HashMap::new());
    static ref GATEWAYS: Mutex<HashMap<String, Arc<Gateway>>> = Mutex::new(HashMap::new());
    static ref SKEY_MAPS: Mutex<HashMap<String, SkeyMap>> = Mutex::new(HashMap::new());
}

// The named-object registry: the engine's stand-in for the shared-memory
// segment hosting the lock objects, the gateway counters and the skey
// shadow. Construction is by name, `/ouroboros<dataset>` plus a suffix, so
// every attach of the same dataset in this process gets the same objects.
// A real segment manager implements the same three constructors over
// placement allocation; nothing else in the engine would change.

/// The conventional name of the shared segment of a dataset.
pub fn segment_name(dataset: &str) -> String {
    format!("/ouroboros{}", dataset)
}

pub fn named_lock(name: &str) -> Arc<dyn RwLockable> {
    let mut locks = LOCKS.lock().unwrap();
    let lock = locks
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(OrderedSharedLock::new()));
    Arc::clone(lock) as Arc<dyn RwLockable>
}

pub fn named_gateway(name: &str) -> Arc<Gateway> {
    let mut gateways = GATEWAYS.lock().unwrap();
    let gateway = gateways
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(Gateway::new()));
    Arc::clone(gateway)
}

pub fn named_skey_map(name: &str) -> SkeyMap {
    let mut maps = SKEY_MAPS.lock().unwrap();
    let map = maps
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(RwLock::new(HashMap::new())));
    Arc::clone(map)
}

/// Drop every named object under a prefix; used when a dataset is removed.
pub fn purge(prefix: &str) {
    LOCKS.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
    GATEWAYS.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
    SKEY_MAPS.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_same_object() {
        let a = named_skey_map("/ouroboros_shm_test/skeys");
        let b = named_skey_map("/ouroboros_shm_test/skeys");
        a.write().unwrap().insert(7, vec![1, 2, 3]);
        assert_eq!(b.read().unwrap()[&7], vec![1, 2, 3]);

        let l1 = named_lock("/ouroboros_shm_test/lock");
        let l2 = named_lock("/ouroboros_shm_test/lock");
        assert!(l1.timed_lock(std::time::Duration::from_millis(50)));
        assert!(!l2.timed_lock(std::time::Duration::from_millis(50)));
        l1.unlock();

        purge("/ouroboros_shm_test");
        let c = named_skey_map("/ouroboros_shm_test/skeys");
        assert!(c.read().unwrap().is_empty());
    }
}
