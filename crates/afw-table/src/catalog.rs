//! Ordered record containers sharing one table.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::path::Path;

use crate::column::ColumnView;
use crate::error::{Error, Result};
use crate::field::Element;
use crate::fits::file::{write_hdus, FitsFile, WriteMode};
use crate::io::{self, ReadOptions};
use crate::key::Key;
use crate::record::{Record, RecordId};
use crate::schema::Schema;
use crate::table::Table;

/// An ordered, mutable sequence of records whose schema matches its table.
pub struct Catalog {
    table: Table,
    records: Vec<Record>,
    view: RefCell<Option<ColumnView>>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("table", &self.table)
            .field("len", &self.records.len())
            .finish()
    }
}

impl Clone for Catalog {
    /// Shallow: shares the table and every record.
    fn clone(&self) -> Self {
        Catalog {
            table: self.table.clone(),
            records: self.records.clone(),
            view: RefCell::new(None),
        }
    }
}

impl Catalog {
    /// An empty catalog over `table`.
    pub fn new(table: Table) -> Self {
        Catalog {
            table,
            records: Vec::new(),
            view: RefCell::new(None),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn schema(&self) -> &Schema {
        self.table.schema()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, i: usize) -> Result<&Record> {
        self.records.get(i).ok_or(Error::Index {
            index: i,
            len: self.records.len(),
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    fn invalidate(&self) {
        self.view.borrow_mut().take();
    }

    fn check_schema(&self, record: &Record) -> Result<()> {
        if record.schema() != self.schema() {
            return Err(Error::SchemaMismatch(String::from(
                "record schema differs from the catalog's table schema",
            )));
        }
        Ok(())
    }

    /// Create a record in the table and append it.
    pub fn add_new(&mut self) -> Result<Record> {
        let record = self.table.add_record(None)?;
        self.invalidate();
        self.records.push(record.clone());
        Ok(record)
    }

    /// Append an existing record handle. Fails with `SchemaMismatch` unless
    /// its schema equals the table's.
    pub fn append(&mut self, record: Record) -> Result<()> {
        self.check_schema(&record)?;
        self.invalidate();
        self.records.push(record);
        Ok(())
    }

    /// Insert at `i`, where `0 <= i <= len`.
    pub fn insert(&mut self, i: usize, record: Record) -> Result<()> {
        if i > self.records.len() {
            return Err(Error::Index {
                index: i,
                len: self.records.len(),
            });
        }
        self.check_schema(&record)?;
        self.invalidate();
        self.records.insert(i, record);
        Ok(())
    }

    /// Remove and return the record at `i`, where `i < len`.
    pub fn erase(&mut self, i: usize) -> Result<Record> {
        if i >= self.records.len() {
            return Err(Error::Index {
                index: i,
                len: self.records.len(),
            });
        }
        self.invalidate();
        Ok(self.records.remove(i))
    }

    pub fn erase_range(&mut self, range: Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.records.len() {
            return Err(Error::Index {
                index: range.end.max(range.start),
                len: self.records.len(),
            });
        }
        self.invalidate();
        self.records.drain(range);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.invalidate();
        self.records.clear();
    }

    pub fn pop(&mut self) -> Option<Record> {
        self.invalidate();
        self.records.pop()
    }

    /// Append the records of `other`. Shallow mode shares the handles (and
    /// requires equal schemas); deep mode copies each row into this table.
    pub fn extend(&mut self, other: &Catalog, deep: bool) -> Result<()> {
        if deep {
            self.table.preallocate(other.len());
            let copies = other
                .iter()
                .map(|r| self.table.copy_record(r))
                .collect::<Result<Vec<_>>>()?;
            self.invalidate();
            self.records.extend(copies);
        } else {
            if other.schema() != self.schema() {
                return Err(Error::SchemaMismatch(String::from(
                    "cannot share records between catalogs with different schemas",
                )));
            }
            self.invalidate();
            self.records.extend(other.records.iter().cloned());
        }
        Ok(())
    }

    /// Shallow copies share the table and records. Deep copies get a fresh
    /// table of the same kind over a copy of the schema, with every row
    /// copied and ids kept.
    pub fn copy(&self, deep: bool) -> Result<Catalog> {
        if !deep {
            return Ok(self.clone());
        }
        let table = Table::make_kind(&self.schema().copy(), self.table.kind())?;
        table.set_metadata(self.table.metadata().clone());
        table.preallocate(self.len());
        let mut catalog = Catalog::new(table);
        for record in &self.records {
            let copy = catalog.table.copy_record_with_id(record, Some(record.id()))?;
            catalog.records.push(copy);
        }
        catalog.table.set_id_factory_start(self.table.next_id());
        Ok(catalog)
    }

    /// Shallow slice `start..stop` taking every `step`-th record. `stop` is
    /// clamped to the length.
    pub fn subset(&self, start: usize, stop: usize, step: usize) -> Result<Catalog> {
        if step == 0 {
            return Err(Error::logic("subset step must be at least 1"));
        }
        if start > self.records.len() {
            return Err(Error::Index {
                index: start,
                len: self.records.len(),
            });
        }
        let stop = stop.clamp(start, self.records.len());
        Ok(Catalog {
            table: self.table.clone(),
            records: self.records[start..stop].iter().step_by(step).cloned().collect(),
            view: RefCell::new(None),
        })
    }

    /// Make room for `n` records in total without splitting blocks.
    pub fn reserve(&mut self, n: usize) {
        if n > self.records.len() {
            self.table.preallocate(n - self.records.len());
        }
    }

    /// Column access over the records; fails with `Runtime` unless they occupy
    /// consecutive rows of one block in order.
    pub fn get_column_view(&self) -> Result<ColumnView> {
        if let Some(view) = self.view.borrow().as_ref() {
            return Ok(view.clone());
        }
        let view = ColumnView::from_records(self.schema(), &self.records)?;
        *self.view.borrow_mut() = Some(view.clone());
        Ok(view)
    }

    /// Whether ids are non-decreasing.
    pub fn is_sorted(&self) -> bool {
        self.records.windows(2).all(|w| w[0].id() <= w[1].id())
    }

    /// Stable sort by id.
    pub fn sort(&mut self) {
        self.invalidate();
        self.records.sort_by_key(Record::id);
    }

    /// Binary search for `id` in a catalog sorted by id.
    pub fn find(&self, id: RecordId) -> Result<&Record> {
        self.records
            .binary_search_by_key(&id, Record::id)
            .map(|i| &self.records[i])
            .map_err(|_| Error::not_found(format!("record id {id}")))
    }

    pub fn is_sorted_by_key<T: Element>(&self, key: &Key<T>) -> bool {
        self.records
            .windows(2)
            .all(|w| w[0].get(key).total_cmp(&w[1].get(key)) != Ordering::Greater)
    }

    /// Stable sort by the value of a scalar field.
    pub fn sort_by_key<T: Element>(&mut self, key: &Key<T>) {
        self.invalidate();
        self.records.sort_by(|a, b| a.get(key).total_cmp(&b.get(key)));
    }

    /// Write as a new FITS file (`Write`) or add HDUs to one (`Append`).
    pub fn write_fits(&self, path: impl AsRef<Path>, mode: WriteMode) -> Result<()> {
        let path = path.as_ref();
        let first_hdu = match mode {
            WriteMode::Write => 2,
            WriteMode::Append => crate::fits::file::existing_extension_count(path)? + 2,
        };
        let hdus = io::writer::catalog_hdus(self, first_hdu)?;
        write_hdus(path, mode, &hdus)
    }

    /// A complete FITS file image holding this catalog.
    pub fn write_fits_bytes(&self) -> Result<Vec<u8>> {
        io::writer::catalog_file_bytes(self)
    }

    /// Read the catalog in HDU `hdu` (1-based, so 2 is the first extension).
    pub fn read_fits(path: impl AsRef<Path>, hdu: usize) -> Result<Catalog> {
        Self::read_fits_with(
            path,
            &ReadOptions {
                hdu,
                ..ReadOptions::default()
            },
        )
    }

    pub fn read_fits_with(path: impl AsRef<Path>, options: &ReadOptions) -> Result<Catalog> {
        let fits = FitsFile::open(path)?;
        io::read_catalog(&fits, options)
    }

    pub fn read_fits_bytes(bytes: Vec<u8>, options: &ReadOptions) -> Result<Catalog> {
        let fits = FitsFile::from_bytes(bytes)?;
        io::read_catalog(&fits, options)
    }
}

impl std::ops::Index<usize> for Catalog {
    type Output = Record;

    fn index(&self, i: usize) -> &Record {
        &self.records[i]
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
