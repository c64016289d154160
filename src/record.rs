use std::fmt::Debug;

use bytes::{Buf, BufMut};

/// A fixed-width record of a table.
///
/// The field toolkit that generates record types is outside this crate;
/// the engine only relies on this contract: a compile-time constant size
/// and byte-oriented pack/unpack. Multi-byte integers are little-endian,
/// floats are IEEE-754, strings are zero-padded to their field width.
pub trait Record: Clone + Default + PartialEq + Debug {
    fn static_size() -> usize;
    fn pack(&self, out: &mut [u8]);
    fn unpack(&mut self, data: &[u8]);

    fn unpack_new(data: &[u8]) -> Self {
        let mut record = Self::default();
        record.unpack(data);
        record
    }
}

/// The extractor of the indexed field of a record.
pub trait IndexField<R: Record> {
    type Field: Ord + Clone + Debug;
    fn value(record: &R) -> Self::Field;
}

/// The index over field number 1.
pub struct Index1;

/// The index over field number 2.
pub struct Index2;

/// The stock three-field data record `(u32, f64, u32)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DataRecord {
    pub field1: u32,
    pub field2: f64,
    pub field3: u32,
}

impl DataRecord {
    pub fn new(field1: u32, field2: f64, field3: u32) -> Self {
        DataRecord {
            field1,
            field2,
            field3,
        }
    }
}

impl Record for DataRecord {
    fn static_size() -> usize {
        4 + 8 + 4
    }

    fn pack(&self, out: &mut [u8]) {
        let mut buf = out;
        buf.put_u32_le(self.field1);
        buf.put_f64_le(self.field2);
        buf.put_u32_le(self.field3);
    }

    fn unpack(&mut self, data: &[u8]) {
        let mut buf = data;
        self.field1 = buf.get_u32_le();
        self.field2 = buf.get_f64_le();
        self.field3 = buf.get_u32_le();
    }
}

impl IndexField<DataRecord> for Index1 {
    type Field = u32;

    fn value(record: &DataRecord) -> u32 {
        record.field1
    }
}

/// The stock four-field counter record `(i32, i32, f32, i32)` used by the
/// worker tools: field2 carries the monotone counter under test.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterRecord {
    pub field1: i32,
    pub field2: i32,
    pub field3: f32,
    pub field4: i32,
}

impl CounterRecord {
    pub fn new(field1: i32, field2: i32, field3: f32, field4: i32) -> Self {
        CounterRecord {
            field1,
            field2,
            field3,
            field4,
        }
    }
}

impl Record for CounterRecord {
    fn static_size() -> usize {
        4 + 4 + 4 + 4
    }

    fn pack(&self, out: &mut [u8]) {
        let mut buf = out;
        buf.put_i32_le(self.field1);
        buf.put_i32_le(self.field2);
        buf.put_f32_le(self.field3);
        buf.put_i32_le(self.field4);
    }

    fn unpack(&mut self, data: &[u8]) {
        let mut buf = data;
        self.field1 = buf.get_i32_le();
        self.field2 = buf.get_i32_le();
        self.field3 = buf.get_f32_le();
        self.field4 = buf.get_i32_le();
    }
}

impl IndexField<CounterRecord> for Index1 {
    type Field = i32;

    fn value(record: &CounterRecord) -> i32 {
        record.field1
    }
}

impl IndexField<CounterRecord> for Index2 {
    type Field = i32;

    fn value(record: &CounterRecord) -> i32 {
        record.field2
    }
}
