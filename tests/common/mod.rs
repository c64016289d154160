use std::io::Write;
use std::sync::Once;

use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize logging once for the whole test binary; RUST_LOG drives the
/// verbosity as usual.
pub fn setup() {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .is_test(true)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .try_init()
            .ok();
    });
}

/// A scratch dataset name inside its own directory; the directory cleans
/// itself up, the name keeps the named shm objects of parallel tests
/// apart.
pub fn scratch(tag: &str) -> (TempDir, String) {
    setup();
    let dir = tempfile::tempdir().unwrap();
    let name = dir
        .path()
        .join(tag)
        .to_string_lossy()
        .to_string();
    (dir, name)
}

/// The raw bytes of a dataset file, for byte-identity checks.
pub fn file_bytes(name: &str) -> Vec<u8> {
    std::fs::read(ouroboros_db::make_dbname(name)).unwrap()
}
