use std::{
    fs::{File, OpenOptions},
    io::ErrorKind as IoErrorKind,
    os::unix::fs::FileExt,
    path::Path,
};

use fs2::FileExt as LockExt;
use log::debug;

use crate::{
    consts::IO_ATTEMPTS,
    error::{DbError, DbResult},
};

/// The base file: a named random-access byte array.
///
/// All reads and writes are positioned, so the file keeps no cursor state
/// and can be shared behind a lock without seek races. Writes past the
/// current size extend the file.
pub struct BaseFile {
    name: String,
    file: File,
}

impl BaseFile {
    /// Open an existing file, or create it when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let name = path.as_ref().to_string_lossy().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| DbError::io(&format!("open {}: {}", name, e)))?;
        debug!("file opened, name: {}", name);
        Ok(BaseFile { name, file })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> DbResult<u64> {
        let meta = self
            .file
            .metadata()
            .map_err(|e| DbError::io(&format!("metadata {}: {}", self.name, e)))?;
        Ok(meta.len())
    }

    /// Change the size of the file.
    pub fn resize(&self, size: u64) -> DbResult<u64> {
        self.file
            .set_len(size)
            .map_err(|e| DbError::io(&format!("resize {}: {}", self.name, e)))?;
        Ok(size)
    }

    /// Grow the file to at least `size`, never shrink it.
    pub fn sizeup(&self, size: u64) -> DbResult<u64> {
        let current = self.size()?;
        if current < size {
            return self.resize(size);
        }
        Ok(current)
    }

    pub fn read(&self, buf: &mut [u8], pos: u64) -> DbResult {
        let mut attempt = 0;
        loop {
            match self.file.read_exact_at(buf, pos) {
                Ok(()) => return Ok(()),
                Err(ref e) if e.kind() == IoErrorKind::Interrupted && attempt < IO_ATTEMPTS => {
                    attempt += 1;
                }
                Err(e) => {
                    return Err(DbError::io(&format!(
                        "read {} bytes at {} from {}: {}",
                        buf.len(),
                        pos,
                        self.name,
                        e
                    )));
                }
            }
        }
    }

    pub fn write(&self, buf: &[u8], pos: u64) -> DbResult {
        let mut attempt = 0;
        loop {
            match self.file.write_all_at(buf, pos) {
                Ok(()) => return Ok(()),
                Err(ref e) if e.kind() == IoErrorKind::Interrupted && attempt < IO_ATTEMPTS => {
                    attempt += 1;
                }
                Err(e) => {
                    return Err(DbError::io(&format!(
                        "write {} bytes at {} to {}: {}",
                        buf.len(),
                        pos,
                        self.name,
                        e
                    )));
                }
            }
        }
    }

    /// Drop any stale view of the given range.
    ///
    /// A plain file always reads from the kernel cache, so there is nothing
    /// to do here; the hook exists for mapped backends.
    pub fn refresh(&self, _size: u64, _pos: u64) -> DbResult {
        Ok(())
    }

    /// Forced synchronization of file data to the device.
    pub fn flush(&self) -> DbResult {
        self.file
            .sync_data()
            .map_err(|e| DbError::io(&format!("flush {}: {}", self.name, e)))
    }

    pub fn lock_shared(&self) -> DbResult {
        self.file
            .lock_shared()
            .map_err(|e| DbError::io(&format!("lock_shared {}: {}", self.name, e)))
    }

    pub fn lock_exclusive(&self) -> DbResult {
        self.file
            .lock_exclusive()
            .map_err(|e| DbError::io(&format!("lock_exclusive {}: {}", self.name, e)))
    }

    pub fn unlock(&self) -> DbResult {
        self.file
            .unlock()
            .map_err(|e| DbError::io(&format!("unlock {}: {}", self.name, e)))
    }

    /// Remove a file by name. Missing files are not an error.
    pub fn remove<P: AsRef<Path>>(path: P) -> DbResult {
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::io(&format!(
                "remove {}: {}",
                path.as_ref().to_string_lossy(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_resize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base_file.dat");
        let file = BaseFile::open(&path).unwrap();
        assert_eq!(file.size().unwrap(), 0);

        // a write past the end extends the file
        file.write(b"hello", 100).unwrap();
        assert_eq!(file.size().unwrap(), 105);

        let mut buf = [0u8; 5];
        file.read(&mut buf, 100).unwrap();
        assert_eq!(&buf, b"hello");

        file.sizeup(50).unwrap();
        assert_eq!(file.size().unwrap(), 105);
        file.sizeup(200).unwrap();
        assert_eq!(file.size().unwrap(), 200);

        file.resize(10).unwrap();
        assert_eq!(file.size().unwrap(), 10);
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = BaseFile::open(dir.path().join("short.dat")).unwrap();
        file.write(&[1, 2, 3], 0).unwrap();
        let mut buf = [0u8; 8];
        assert!(file.read(&mut buf, 0).is_err());
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        BaseFile::remove(dir.path().join("nothing.dat")).unwrap();
    }
}
