use bytes::{Buf, BufMut};

use crate::record::Record;

/// The size of the reserved region of the header.
pub const RESERVE_SIZE: usize = 512;

/// The size of the user data region of the header.
pub const DATA_SIZE: usize = 256;

/// The header of a dataset.
///
/// Written once at init; `tbl_count` and `rec_count` are fixed for the
/// lifetime of the file. The user data region belongs to the application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Info {
    pub version: u32,
    pub tbl_count: u32,
    pub rec_count: u32,
    pub key_count: u32,
    reserve: [u8; RESERVE_SIZE],
    data: [u8; DATA_SIZE],
}

impl Info {
    pub fn new(version: u32, tbl_count: u32, rec_count: u32) -> Self {
        Info {
            version,
            tbl_count,
            rec_count,
            key_count: 0,
            reserve: [0u8; RESERVE_SIZE],
            data: [0u8; DATA_SIZE],
        }
    }

    /// Copy out the user data region; returns the copied size.
    pub fn get_data(&self, buffer: &mut [u8]) -> usize {
        let size = buffer.len().min(DATA_SIZE);
        buffer[..size].copy_from_slice(&self.data[..size]);
        size
    }

    /// Fill the user data region; returns the stored size.
    pub fn set_data(&mut self, buffer: &[u8]) -> usize {
        let size = buffer.len().min(DATA_SIZE);
        self.data = [0u8; DATA_SIZE];
        self.data[..size].copy_from_slice(&buffer[..size]);
        size
    }
}

impl Default for Info {
    fn default() -> Self {
        Info::new(0, 0, 0)
    }
}

impl Record for Info {
    fn static_size() -> usize {
        4 * 4 + RESERVE_SIZE + DATA_SIZE
    }

    fn pack(&self, out: &mut [u8]) {
        let mut buf = out;
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.tbl_count);
        buf.put_u32_le(self.rec_count);
        buf.put_u32_le(self.key_count);
        buf.put_slice(&self.reserve);
        buf.put_slice(&self.data);
    }

    fn unpack(&mut self, data: &[u8]) {
        let mut buf = data;
        self.version = buf.get_u32_le();
        self.tbl_count = buf.get_u32_le();
        self.rec_count = buf.get_u32_le();
        self.key_count = buf.get_u32_le();
        buf.copy_to_slice(&mut self.reserve);
        buf.copy_to_slice(&mut self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_roundtrip() {
        let mut info = Info::new(2, 10, 1000);
        info.key_count = 3;
        info.set_data(b"user payload");
        let mut buf = vec![0u8; Info::static_size()];
        info.pack(&mut buf);
        assert_eq!(buf.len(), 784);
        assert_eq!(Info::unpack_new(&buf), info);
    }

    #[test]
    fn test_user_data_clipping() {
        let mut info = Info::default();
        let big = vec![7u8; DATA_SIZE + 100];
        assert_eq!(info.set_data(&big), DATA_SIZE);
        let mut out = vec![0u8; 16];
        assert_eq!(info.get_data(&mut out), 16);
        assert_eq!(out, vec![7u8; 16]);
    }
}
