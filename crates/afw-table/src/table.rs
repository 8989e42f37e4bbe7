//! Tables own record storage, the frozen schema and the id allocator.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::alias::AliasMap;
use crate::error::{Error, Result};
use crate::field::{FieldType, ScalarType};
use crate::key::AnyKey;
use crate::metadata::Metadata;
use crate::record::{copy_fields, field_mapping, Record, RecordId};
use crate::schema::Schema;
use crate::storage::Block;

/// Minimum number of rows in a newly allocated block.
pub const DEFAULT_BLOCK_ROWS: usize = 16;

/// Name of the id field required by SIMPLE tables.
pub const ID_FIELD: &str = "id";

/// Behavior family of a table, persisted as the `AFW_TYPE` header keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// Plain rows; ids live outside the row and objects are not archived.
    Base,
    /// Rows carry an `id` field and object slots go through the archive.
    Simple,
    /// A kind provided by an externally registered reader. Behaves like
    /// `Base` for ids and archives objects.
    Custom(&'static str),
}

impl TableKind {
    /// The `AFW_TYPE` tag.
    pub fn tag(&self) -> &'static str {
        match self {
            TableKind::Base => "BASE",
            TableKind::Simple => "SIMPLE",
            TableKind::Custom(tag) => tag,
        }
    }

    /// Whether writing this kind of table stores objects in an archive.
    pub fn uses_archive(&self) -> bool {
        !matches!(self, TableKind::Base)
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Monotonic id source plus the set of ids already issued.
#[derive(Debug)]
struct IdFactory {
    next: RecordId,
    in_use: HashSet<RecordId>,
}

impl IdFactory {
    fn new() -> Self {
        IdFactory {
            next: 1,
            in_use: HashSet::new(),
        }
    }

    fn claim(&mut self, id: Option<RecordId>) -> Result<RecordId> {
        match id {
            None => loop {
                let id = self.next;
                self.next = self.next.saturating_add(1);
                if self.in_use.insert(id) {
                    return Ok(id);
                }
            },
            Some(id) => {
                if !self.in_use.insert(id) {
                    return Err(Error::DuplicateKey(format!("record id {id}")));
                }
                if id >= self.next {
                    self.next = id.saturating_add(1);
                }
                Ok(id)
            }
        }
    }
}

#[derive(Debug)]
struct Storage {
    block: Option<Rc<RefCell<Block>>>,
    last_capacity: usize,
    ids: IdFactory,
}

pub(crate) struct TableInner {
    schema: Schema,
    kind: TableKind,
    id_key: Option<AnyKey>,
    metadata: RefCell<Metadata>,
    storage: RefCell<Storage>,
}

/// Shared handle to a table.
///
/// Every record and catalog drawn from a table holds a handle to the blocks
/// it uses; the table itself holds only the block currently being filled.
#[derive(Clone)]
pub struct Table {
    inner: Rc<TableInner>,
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("kind", &self.inner.kind)
            .field("fields", &self.inner.schema.len())
            .field("record_size", &self.inner.schema.record_size())
            .finish()
    }
}

impl Table {
    /// A BASE table bound to a frozen copy of `schema`.
    pub fn make(schema: &Schema) -> Table {
        Self::build(schema, TableKind::Base, None)
    }

    /// A SIMPLE table. Fails with `Logic` unless `schema` has an `id` field
    /// of type I64 or U64.
    ///
    /// The `id` field is the record id: change it with
    /// [`Record::set_id`] to have the table reject ids it already issued.
    pub fn make_simple(schema: &Schema) -> Result<Table> {
        Self::make_kind(schema, TableKind::Simple)
    }

    pub fn make_kind(schema: &Schema, kind: TableKind) -> Result<Table> {
        let id_key = match kind {
            TableKind::Simple => {
                let item = schema.find(ID_FIELD).map_err(|_| {
                    Error::logic("SIMPLE tables require an 'id' field")
                })?;
                match item.field.field_type {
                    FieldType::Scalar(ScalarType::I64 | ScalarType::U64) => Some(item.key),
                    other => {
                        return Err(Error::logic(format!(
                            "'id' field must be I64 or U64, not {other}"
                        )));
                    }
                }
            }
            _ => None,
        };
        Ok(Self::build(schema, kind, id_key))
    }

    fn build(schema: &Schema, kind: TableKind, id_key: Option<AnyKey>) -> Table {
        Table {
            inner: Rc::new(TableInner {
                schema: schema.frozen(),
                kind,
                id_key,
                metadata: RefCell::new(Metadata::new()),
                storage: RefCell::new(Storage {
                    block: None,
                    last_capacity: 0,
                    ids: IdFactory::new(),
                }),
            }),
        }
    }

    /// A schema holding only the `id` field of SIMPLE tables.
    pub fn make_minimal_simple_schema() -> Schema {
        let mut schema = Schema::new();
        // A fresh schema cannot reject its first field.
        if let Err(e) = schema.add_field::<u64>(ID_FIELD, "unique id", "") {
            unreachable!("{e}");
        }
        schema
    }

    pub(crate) fn from_inner(inner: Rc<TableInner>) -> Table {
        Table { inner }
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn kind(&self) -> TableKind {
        self.inner.kind
    }

    pub fn aliases(&self) -> &AliasMap {
        self.inner.schema.aliases()
    }

    pub fn metadata(&self) -> Ref<'_, Metadata> {
        self.inner.metadata.borrow()
    }

    pub fn metadata_mut(&self) -> RefMut<'_, Metadata> {
        self.inner.metadata.borrow_mut()
    }

    pub fn set_metadata(&self, metadata: Metadata) {
        *self.inner.metadata.borrow_mut() = metadata;
    }

    /// The `id` field key of SIMPLE tables.
    pub fn id_key(&self) -> Option<AnyKey> {
        self.inner.id_key
    }

    /// The id the factory will hand out next.
    pub fn next_id(&self) -> RecordId {
        self.inner.storage.borrow().ids.next
    }

    /// Seed the id factory. Ids already issued are still skipped.
    pub fn set_id_factory_start(&self, next: RecordId) {
        self.inner.storage.borrow_mut().ids.next = next;
    }

    pub fn ptr_eq(&self, other: &Table) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Rows left in the current block before a new one is allocated.
    pub fn buffer_capacity(&self) -> usize {
        self.inner
            .storage
            .borrow()
            .block
            .as_ref()
            .map_or(0, |b| b.borrow().remaining())
    }

    /// Make sure the next `n` records land in consecutive rows of one block.
    pub fn preallocate(&self, n: usize) {
        let mut storage = self.inner.storage.borrow_mut();
        let remaining = storage
            .block
            .as_ref()
            .map_or(0, |b| b.borrow().remaining());
        if remaining < n {
            self.grow(&mut storage, n);
        }
    }

    fn grow(&self, storage: &mut Storage, requested: usize) {
        let capacity = requested
            .max(storage.last_capacity.saturating_mul(2))
            .max(DEFAULT_BLOCK_ROWS);
        debug!(
            capacity,
            record_size = self.inner.schema.record_size(),
            "allocating record block"
        );
        storage.block = Some(Rc::new(RefCell::new(Block::new(
            self.inner.schema.record_size(),
            capacity,
        ))));
        storage.last_capacity = capacity;
    }

    /// Allocate a row for a claimed id.
    fn allocate(&self, id: RecordId) -> Record {
        let mut storage = self.inner.storage.borrow_mut();
        let remaining = storage
            .block
            .as_ref()
            .map_or(0, |b| b.borrow().remaining());
        if remaining == 0 {
            self.grow(&mut storage, 1);
        }
        let Some(block) = storage.block.clone() else {
            unreachable!("a block was just allocated");
        };
        let row = match block.borrow_mut().allocate(id) {
            Some(row) => row,
            None => unreachable!("fresh block has room"),
        };
        drop(storage);

        let record = Record::new(
            self.inner.schema.clone(),
            block,
            row,
            Rc::downgrade(&self.inner),
            self.inner.id_key,
        );
        self.mirror_id(&record, id);
        record
    }

    fn mirror_id(&self, record: &Record, id: RecordId) {
        if let Some(key) = self.inner.id_key {
            let mut block = record.block().borrow_mut();
            match key.field_type {
                FieldType::Scalar(ScalarType::I64) => block.write(record.row(), key.offset, id as i64),
                _ => block.write(record.row(), key.offset, id),
            }
        }
    }

    /// Move an issued id from `old` to `new` without checking `new`.
    pub(crate) fn move_id(&self, old: RecordId, new: RecordId) {
        let mut storage = self.inner.storage.borrow_mut();
        let ids = &mut storage.ids;
        ids.in_use.remove(&old);
        ids.in_use.insert(new);
        if new >= ids.next {
            ids.next = new.saturating_add(1);
        }
    }

    /// Like [`move_id`](Self::move_id), but fails with `DuplicateKey` and
    /// changes nothing when `new` was already issued.
    pub(crate) fn reissue_id(&self, old: RecordId, new: RecordId) -> Result<()> {
        if self.inner.storage.borrow().ids.in_use.contains(&new) {
            return Err(Error::DuplicateKey(format!("record id {new}")));
        }
        self.move_id(old, new);
        Ok(())
    }

    /// Create a record. `None` takes the next id from the factory; an
    /// explicit id that was already issued fails with `DuplicateKey`.
    pub fn add_record(&self, id: Option<RecordId>) -> Result<Record> {
        let id = self.inner.storage.borrow_mut().ids.claim(id)?;
        Ok(self.allocate(id))
    }

    /// Create a record holding the values of `source`, matched by field name.
    ///
    /// Fails with `SchemaMismatch` before allocating if a shared field name
    /// has different types. SIMPLE tables keep the source's id.
    pub fn copy_record(&self, source: &Record) -> Result<Record> {
        let id = match self.inner.kind {
            TableKind::Simple => Some(source.id()),
            _ => None,
        };
        self.copy_record_with_id(source, id)
    }

    pub(crate) fn copy_record_with_id(&self, source: &Record, id: Option<RecordId>) -> Result<Record> {
        let plan = field_mapping(&self.inner.schema, source.schema())?;
        let id = self.inner.storage.borrow_mut().ids.claim(id)?;
        let record = self.allocate(id);
        copy_fields(&record, source, &plan);
        self.mirror_id(&record, id);
        Ok(record)
    }
}
