//! Strided column views over a catalog's contiguous rows.

use std::cell::{Ref, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::field::Element;
use crate::key::{Array, Flag, Key};
use crate::record::Record;
use crate::schema::Schema;
use crate::storage::Block;

/// Column access over records that occupy consecutive rows of one block.
#[derive(Debug, Clone)]
pub struct ColumnView {
    schema: Schema,
    block: Option<Rc<RefCell<Block>>>,
    first_row: usize,
    len: usize,
}

impl ColumnView {
    /// Fails with `Runtime` unless the records sit in consecutive rows of a
    /// single block, in order.
    pub fn from_records(schema: &Schema, records: &[Record]) -> Result<Self> {
        let Some(first) = records.first() else {
            return Ok(ColumnView {
                schema: schema.clone(),
                block: None,
                first_row: 0,
                len: 0,
            });
        };
        let contiguous = records.iter().enumerate().all(|(i, r)| {
            Rc::ptr_eq(r.block(), first.block()) && r.row() == first.row() + i
        });
        if !contiguous {
            return Err(Error::Runtime(String::from(
                "non-contiguous: records do not occupy consecutive rows of one block",
            )));
        }
        Ok(ColumnView {
            schema: schema.clone(),
            block: Some(Rc::clone(first.block())),
            first_row: first.row(),
            len: records.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// A scalar column. Holds a shared borrow of the block while alive.
    pub fn column<T: Element>(&self, key: &Key<T>) -> Column<'_, T> {
        Column {
            block: self.block.as_ref().map(|b| b.borrow()),
            start: self.first_row * self.schema.record_size() + key.offset(),
            stride: self.schema.record_size(),
            len: self.len,
            width: 1,
            _elem: PhantomData,
        }
    }

    /// A fixed-array column: `len` rows of `key.element_count()` elements.
    pub fn array_column<T: Element>(&self, key: &Key<Array<T>>) -> Column<'_, T> {
        Column {
            block: self.block.as_ref().map(|b| b.borrow()),
            start: self.first_row * self.schema.record_size() + key.offset(),
            stride: self.schema.record_size(),
            len: self.len,
            width: key.element_count(),
            _elem: PhantomData,
        }
    }

    /// Flag values, unpacked into individual booleans.
    pub fn flags(&self, key: &Key<Flag>) -> Vec<bool> {
        let Some(block) = &self.block else {
            return Vec::new();
        };
        let block = block.borrow();
        (self.first_row..self.first_row + self.len)
            .map(|row| block.get_flag(row, key.offset(), key.bit()))
            .collect()
    }
}

/// A strided run of elements, one `width`-element group per row.
pub struct Column<'a, T> {
    block: Option<Ref<'a, Block>>,
    /// Byte offset of the first element in the block.
    start: usize,
    /// Bytes between consecutive rows.
    stride: usize,
    len: usize,
    width: usize,
    _elem: PhantomData<T>,
}

impl<T: Element> Column<'_, T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements per row; 1 for scalar columns.
    pub fn width(&self) -> usize {
        self.width
    }

    fn elements(&self) -> &[T] {
        match &self.block {
            Some(block) => bytemuck::cast_slice(block.words()),
            None => &[],
        }
    }

    fn elem_stride(&self) -> usize {
        self.stride / std::mem::size_of::<T>()
    }

    fn elem_start(&self) -> usize {
        self.start / std::mem::size_of::<T>()
    }

    /// Element `j` of row `i`; `None` when out of range.
    pub fn get_element(&self, i: usize, j: usize) -> Option<T> {
        if i >= self.len || j >= self.width {
            return None;
        }
        self.elements()
            .get(self.elem_start() + i * self.elem_stride() + j)
            .copied()
    }

    /// First element of row `i`.
    pub fn get(&self, i: usize) -> Option<T> {
        self.get_element(i, 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// Scalar column as a strided one-dimensional array view.
    #[cfg(feature = "array")]
    pub fn as_array(&self) -> Result<ndarray::ArrayView1<'_, T>> {
        use ndarray::ShapeBuilder;

        let data = self.elements().get(self.elem_start()..).unwrap_or(&[]);
        ndarray::ArrayView1::from_shape(self.len.strides(self.elem_stride()), data)
            .map_err(|e| Error::Runtime(e.to_string()))
    }

    /// Array column as a `(rows, width)` view.
    #[cfg(feature = "array")]
    pub fn as_array2(&self) -> Result<ndarray::ArrayView2<'_, T>> {
        use ndarray::ShapeBuilder;

        let data = self.elements().get(self.elem_start()..).unwrap_or(&[]);
        ndarray::ArrayView2::from_shape(
            (self.len, self.width).strides((self.elem_stride(), 1)),
            data,
        )
        .map_err(|e| Error::Runtime(e.to_string()))
    }
}
