//! Fixed-capacity row storage shared by the records of one table.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::archive::Persistable;
use crate::field::Element;
use crate::record::RecordId;

/// One contiguous allocation of rows.
///
/// The word buffer is sized once at creation and never reallocated, so row
/// offsets stay valid for the life of the block. Rows start zeroed.
pub(crate) struct Block {
    words: Vec<u64>,
    record_size: usize,
    capacity: usize,
    len: usize,
    ids: Vec<RecordId>,
    /// Variable-length array payloads keyed by (row, field offset), in
    /// native byte order.
    var_data: HashMap<(usize, usize), Vec<u8>>,
    objects: HashMap<(usize, usize), Rc<dyn Persistable>>,
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("record_size", &self.record_size)
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .field("var_arrays", &self.var_data.len())
            .field("objects", &self.objects.len())
            .finish()
    }
}

impl Block {
    /// `record_size` must be a multiple of 8.
    pub(crate) fn new(record_size: usize, capacity: usize) -> Self {
        debug_assert_eq!(record_size % 8, 0);
        Block {
            words: vec![0u64; capacity * record_size / 8],
            record_size,
            capacity,
            len: 0,
            ids: Vec::with_capacity(capacity),
            var_data: HashMap::new(),
            objects: HashMap::new(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    pub(crate) fn record_size(&self) -> usize {
        self.record_size
    }

    /// Claim the next row, or `None` if the block is full.
    pub(crate) fn allocate(&mut self, id: RecordId) -> Option<usize> {
        if self.len == self.capacity {
            return None;
        }
        let row = self.len;
        self.len += 1;
        self.ids.push(id);
        Some(row)
    }

    pub(crate) fn id(&self, row: usize) -> RecordId {
        self.ids[row]
    }

    pub(crate) fn set_id(&mut self, row: usize, id: RecordId) {
        self.ids[row] = id;
    }

    pub(crate) fn words(&self) -> &[u64] {
        &self.words
    }

    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    pub(crate) fn row(&self, row: usize) -> &[u8] {
        let start = row * self.record_size;
        &self.bytes()[start..start + self.record_size]
    }

    pub(crate) fn row_mut(&mut self, row: usize) -> &mut [u8] {
        let size = self.record_size;
        let start = row * size;
        &mut self.bytes_mut()[start..start + size]
    }

    pub(crate) fn read<T: Element>(&self, row: usize, offset: usize) -> T {
        let size = std::mem::size_of::<T>();
        bytemuck::pod_read_unaligned(&self.row(row)[offset..offset + size])
    }

    pub(crate) fn write<T: Element>(&mut self, row: usize, offset: usize, value: T) {
        let size = std::mem::size_of::<T>();
        self.row_mut(row)[offset..offset + size].copy_from_slice(bytemuck::bytes_of(&value));
    }

    pub(crate) fn read_slice<T: Element>(&self, row: usize, offset: usize, n: usize) -> Vec<T> {
        let size = std::mem::size_of::<T>();
        self.row(row)[offset..offset + n * size]
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    pub(crate) fn write_slice<T: Element>(&mut self, row: usize, offset: usize, values: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.row_mut(row)[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn read_bytes(&self, row: usize, offset: usize, n: usize) -> &[u8] {
        &self.row(row)[offset..offset + n]
    }

    pub(crate) fn write_bytes(&mut self, row: usize, offset: usize, bytes: &[u8]) {
        self.row_mut(row)[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn get_flag(&self, row: usize, offset: usize, bit: u32) -> bool {
        self.read::<u64>(row, offset) & (1u64 << bit) != 0
    }

    pub(crate) fn set_flag(&mut self, row: usize, offset: usize, bit: u32, value: bool) {
        let word = self.read::<u64>(row, offset);
        let word = if value {
            word | (1u64 << bit)
        } else {
            word & !(1u64 << bit)
        };
        self.write(row, offset, word);
    }

    /// Native-order payload of a variable-length array; empty when unset.
    pub(crate) fn var_bytes(&self, row: usize, offset: usize) -> &[u8] {
        self.var_data
            .get(&(row, offset))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn set_var_bytes(&mut self, row: usize, offset: usize, elements: usize, bytes: Vec<u8>) {
        self.write(row, offset, elements as u64);
        if bytes.is_empty() {
            self.var_data.remove(&(row, offset));
        } else {
            self.var_data.insert((row, offset), bytes);
        }
    }

    pub(crate) fn object(&self, row: usize, offset: usize) -> Option<Rc<dyn Persistable>> {
        self.objects.get(&(row, offset)).cloned()
    }

    pub(crate) fn set_object(&mut self, row: usize, offset: usize, object: Option<Rc<dyn Persistable>>) {
        match object {
            Some(obj) => {
                self.objects.insert((row, offset), obj);
            }
            None => {
                self.objects.remove(&(row, offset));
            }
        }
    }

    /// Copy the row bytes and auxiliary slots of `src_row` in `src` into
    /// `dst_row` here. Both blocks must share a layout.
    pub(crate) fn copy_row_from(&mut self, dst_row: usize, src: &Block, src_row: usize) {
        self.row_mut(dst_row).copy_from_slice(src.row(src_row));
        for ((row, offset), bytes) in &src.var_data {
            if *row == src_row {
                self.var_data.insert((dst_row, *offset), bytes.clone());
            }
        }
        for ((row, offset), obj) in &src.objects {
            if *row == src_row {
                self.objects.insert((dst_row, *offset), Rc::clone(obj));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_start_zeroed() {
        let mut b = Block::new(16, 4);
        let row = b.allocate(1).unwrap();
        assert!(b.row(row).iter().all(|&x| x == 0));
        assert_eq!(b.read::<f64>(row, 8), 0.0);
    }

    #[test]
    fn capacity_is_fixed() {
        let mut b = Block::new(8, 2);
        assert_eq!(b.allocate(1), Some(0));
        assert_eq!(b.allocate(2), Some(1));
        assert_eq!(b.allocate(3), None);
        assert_eq!(b.remaining(), 0);
        assert_eq!(b.id(1), 2);
    }

    #[test]
    fn scalar_and_slice_access() {
        let mut b = Block::new(24, 2);
        b.allocate(1);
        b.allocate(2);
        b.write(1, 0, -7i32);
        b.write_slice(1, 8, &[1.5f32, 2.5]);
        assert_eq!(b.read::<i32>(1, 0), -7);
        assert_eq!(b.read_slice::<f32>(1, 8, 2), vec![1.5, 2.5]);
        assert_eq!(b.read::<i32>(0, 0), 0);
    }

    #[test]
    fn flag_bits() {
        let mut b = Block::new(8, 1);
        b.allocate(1);
        b.set_flag(0, 0, 63, true);
        b.set_flag(0, 0, 2, true);
        assert!(b.get_flag(0, 0, 63));
        b.set_flag(0, 0, 63, false);
        assert!(!b.get_flag(0, 0, 63));
        assert_eq!(b.read::<u64>(0, 0), 4);
    }

    #[test]
    fn var_payload_and_row_copy() {
        let mut src = Block::new(8, 1);
        src.allocate(1);
        src.set_var_bytes(0, 0, 2, bytemuck::cast_slice(&[3i16, 4]).to_vec());
        let mut dst = Block::new(8, 2);
        dst.allocate(5);
        dst.allocate(6);
        dst.copy_row_from(1, &src, 0);
        assert_eq!(dst.read::<u64>(1, 0), 2);
        assert_eq!(dst.var_bytes(1, 0), src.var_bytes(0, 0));
        assert!(dst.var_bytes(0, 0).is_empty());
    }
}
