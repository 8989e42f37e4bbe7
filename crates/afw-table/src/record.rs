use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::archive::Persistable;
use crate::error::{Error, Result};
use crate::field::{Element, FieldType, ScalarType};
use crate::key::{AnyKey, Array, Flag, Key, Object, Str, VarArray};
use crate::schema::Schema;
use crate::storage::Block;
use crate::table::{Table, TableInner};

/// Unique identifier of a record within its table.
pub type RecordId = u64;

/// Handle to one row of a table.
///
/// Cloning is cheap and yields another handle to the same row. Values are
/// mutated through `&self`; a record must not be written while a
/// [`Column`](crate::Column) borrowed from the same block is alive.
#[derive(Clone)]
pub struct Record {
    schema: Schema,
    block: Rc<RefCell<Block>>,
    row: usize,
    table: Weak<TableInner>,
    /// The `id` field of SIMPLE tables.
    id_key: Option<AnyKey>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id())
            .field("row", &self.row)
            .finish()
    }
}

/// A field value lifted out of a row so it can be written into another.
enum Slot {
    Bytes(Vec<u8>),
    Flag(bool),
    Var(usize, Vec<u8>),
    Object(Option<Rc<dyn Persistable>>),
}

impl Record {
    pub(crate) fn new(
        schema: Schema,
        block: Rc<RefCell<Block>>,
        row: usize,
        table: Weak<TableInner>,
        id_key: Option<AnyKey>,
    ) -> Self {
        Record {
            schema,
            block,
            row,
            table,
            id_key,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The owning table, if it is still alive.
    pub fn table(&self) -> Option<Table> {
        self.table.upgrade().map(Table::from_inner)
    }

    /// Change the id through the table's id factory. Fails with
    /// `DuplicateKey` if `id` was already issued by the table.
    pub fn set_id(&self, id: RecordId) -> Result<()> {
        let old = self.id();
        if id == old {
            return Ok(());
        }
        if let Some(table) = self.table() {
            table.reissue_id(old, id)?;
        }
        self.write_id(id);
        Ok(())
    }

    fn write_id(&self, id: RecordId) {
        let mut block = self.block.borrow_mut();
        match self.id_key {
            Some(k) if k.field_type == FieldType::Scalar(ScalarType::I64) => {
                block.write(self.row, k.offset, id as i64)
            }
            Some(k) => block.write(self.row, k.offset, id),
            None => block.set_id(self.row, id),
        }
    }

    fn is_id_field(&self, offset: usize) -> bool {
        self.id_key.is_some_and(|k| k.offset == offset)
    }

    pub fn id(&self) -> RecordId {
        let block = self.block.borrow();
        match self.id_key {
            Some(k) if k.field_type == FieldType::Scalar(ScalarType::I64) => {
                block.read::<i64>(self.row, k.offset) as RecordId
            }
            Some(k) => block.read::<u64>(self.row, k.offset),
            None => block.id(self.row),
        }
    }

    pub fn get<T: Element>(&self, key: &Key<T>) -> T {
        self.block.borrow().read(self.row, key.offset())
    }

    /// Writing the `id` field of a SIMPLE table moves the id in the table's
    /// factory but does not check it for collisions; use
    /// [`set_id`](Self::set_id) for that.
    pub fn set<T: Element>(&self, key: &Key<T>, value: T) {
        let old = self.is_id_field(key.offset()).then(|| self.id());
        self.block.borrow_mut().write(self.row, key.offset(), value);
        if let Some(old) = old {
            let new = self.id();
            if new != old {
                if let Some(table) = self.table() {
                    table.move_id(old, new);
                }
            }
        }
    }

    pub fn get_array<T: Element>(&self, key: &Key<Array<T>>) -> Vec<T> {
        self.block
            .borrow()
            .read_slice(self.row, key.offset(), key.element_count())
    }

    /// Fails with `Logic` unless `values` has exactly the field's length.
    pub fn set_array<T: Element>(&self, key: &Key<Array<T>>, values: &[T]) -> Result<()> {
        if values.len() != key.element_count() {
            return Err(Error::logic(format!(
                "array field holds {} elements, got {}",
                key.element_count(),
                values.len()
            )));
        }
        self.block
            .borrow_mut()
            .write_slice(self.row, key.offset(), values);
        Ok(())
    }

    /// Contents up to the first NUL byte.
    pub fn get_str(&self, key: &Key<Str>) -> String {
        let block = self.block.borrow();
        let bytes = block.read_bytes(self.row, key.offset(), key.element_count());
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// Fails with `Logic` if `value` is longer than the field.
    pub fn set_str(&self, key: &Key<Str>, value: &str) -> Result<()> {
        let width = key.element_count();
        if value.len() > width {
            return Err(Error::logic(format!(
                "string of {} bytes does not fit in a {width}-byte field",
                value.len()
            )));
        }
        let mut padded = vec![0u8; width];
        padded[..value.len()].copy_from_slice(value.as_bytes());
        self.block
            .borrow_mut()
            .write_bytes(self.row, key.offset(), &padded);
        Ok(())
    }

    pub fn get_flag(&self, key: &Key<Flag>) -> bool {
        self.block
            .borrow()
            .get_flag(self.row, key.offset(), key.bit())
    }

    pub fn set_flag(&self, key: &Key<Flag>, value: bool) {
        self.block
            .borrow_mut()
            .set_flag(self.row, key.offset(), key.bit(), value);
    }

    pub fn get_var_array<T: Element>(&self, key: &Key<VarArray<T>>) -> Vec<T> {
        self.block
            .borrow()
            .var_bytes(self.row, key.offset())
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    pub fn set_var_array<T: Element>(&self, key: &Key<VarArray<T>>, values: &[T]) {
        let bytes: Vec<u8> = bytemuck::cast_slice::<T, u8>(values).to_vec();
        self.block
            .borrow_mut()
            .set_var_bytes(self.row, key.offset(), values.len(), bytes);
    }

    /// Number of elements currently stored in a variable-length array field.
    pub fn var_array_len<T: Element>(&self, key: &Key<VarArray<T>>) -> usize {
        self.block.borrow().read::<u64>(self.row, key.offset()) as usize
    }

    pub fn get_object(&self, key: &Key<Object>) -> Option<Rc<dyn Persistable>> {
        self.block.borrow().object(self.row, key.offset())
    }

    pub fn set_object(&self, key: &Key<Object>, object: Option<Rc<dyn Persistable>>) {
        self.block
            .borrow_mut()
            .set_object(self.row, key.offset(), object);
    }

    /// Copy every field of `other` whose name also exists here. The record
    /// keeps its own id.
    ///
    /// Fails with `SchemaMismatch`, leaving this record untouched, if a
    /// shared name has different types.
    pub fn assign(&self, other: &Record) -> Result<()> {
        let plan = field_mapping(&self.schema, &other.schema)?;
        let id = self.id();
        copy_fields(self, other, &plan);
        self.write_id(id);
        Ok(())
    }

    /// Whether both handles refer to the same row of the same block.
    pub fn same_storage(&self, other: &Record) -> bool {
        Rc::ptr_eq(&self.block, &other.block) && self.row == other.row
    }

    pub(crate) fn block(&self) -> &Rc<RefCell<Block>> {
        &self.block
    }

    pub(crate) fn row(&self) -> usize {
        self.row
    }

    pub(crate) fn belongs_to(&self, table: &Rc<TableInner>) -> bool {
        std::ptr::eq(self.table.as_ptr(), Rc::as_ptr(table))
    }

    fn read_slot(&self, key: &AnyKey) -> Slot {
        let block = self.block.borrow();
        match key.field_type {
            FieldType::Flag => Slot::Flag(block.get_flag(self.row, key.offset, key.bit)),
            FieldType::VarArray(_) => Slot::Var(
                block.read::<u64>(self.row, key.offset) as usize,
                block.var_bytes(self.row, key.offset).to_vec(),
            ),
            FieldType::Object => Slot::Object(block.object(self.row, key.offset)),
            ty => Slot::Bytes(
                block
                    .read_bytes(self.row, key.offset, ty.slot_size())
                    .to_vec(),
            ),
        }
    }

    fn write_slot(&self, key: &AnyKey, slot: Slot) {
        let mut block = self.block.borrow_mut();
        match slot {
            Slot::Bytes(bytes) => block.write_bytes(self.row, key.offset, &bytes),
            Slot::Flag(v) => block.set_flag(self.row, key.offset, key.bit, v),
            Slot::Var(n, bytes) => block.set_var_bytes(self.row, key.offset, n, bytes),
            Slot::Object(obj) => block.set_object(self.row, key.offset, obj),
        }
    }
}

/// Pairs of (destination, source) keys for fields present in both schemas.
///
/// Fails with `SchemaMismatch` if a shared name has different types.
pub(crate) fn field_mapping(dst: &Schema, src: &Schema) -> Result<Vec<(AnyKey, AnyKey)>> {
    let mut plan = Vec::new();
    for item in src.iter() {
        let Ok(target) = dst.find(&item.field.name) else {
            continue;
        };
        if target.field.field_type != item.field.field_type {
            return Err(Error::SchemaMismatch(format!(
                "field '{}' is {} in the source but {} in the destination",
                item.field.name, item.field.field_type, target.field.field_type
            )));
        }
        plan.push((target.key, item.key));
    }
    Ok(plan)
}

/// Copy values along a plan from [`field_mapping`]. The source is read in
/// full before the destination is written, so both may share a block.
pub(crate) fn copy_fields(dst: &Record, src: &Record, plan: &[(AnyKey, AnyKey)]) {
    let slots: Vec<Slot> = plan.iter().map(|(_, s)| src.read_slot(s)).collect();
    for ((d, _), slot) in plan.iter().zip(slots) {
        dst.write_slot(d, slot);
    }
}

#[cfg(test)]
mod tests {
    use crate::key::{Array, Flag, Object, Str, VarArray};
    use crate::schema::Schema;
    use crate::table::Table;
    use crate::Error;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.add_field::<f64>("flux", "", "").unwrap();
        s.add_sized_field::<Array<f32>>("pos", "", "", 2).unwrap();
        s.add_sized_field::<Str>("name", "", "", 6).unwrap();
        s.add_field::<Flag>("bad", "", "").unwrap();
        s.add_field::<VarArray<i32>>("hist", "", "").unwrap();
        s.add_field::<Object>("psf", "", "").unwrap();
        s
    }

    #[test]
    fn values_round_trip() {
        let s = schema();
        let table = Table::make(&s);
        let r = table.add_record(None).unwrap();
        let flux = s.find_key::<f64>("flux").unwrap();
        let pos = s.find_key::<Array<f32>>("pos").unwrap();
        let name = s.find_key::<Str>("name").unwrap();
        let bad = s.find_key::<Flag>("bad").unwrap();
        let hist = s.find_key::<VarArray<i32>>("hist").unwrap();

        r.set(&flux, 2.5);
        r.set_array(&pos, &[1.0, -1.0]).unwrap();
        r.set_str(&name, "star").unwrap();
        r.set_flag(&bad, true);
        r.set_var_array(&hist, &[1, 2, 3]);

        assert_eq!(r.get(&flux), 2.5);
        assert_eq!(r.get_array(&pos), vec![1.0, -1.0]);
        assert_eq!(r.get_str(&name), "star");
        assert!(r.get_flag(&bad));
        assert_eq!(r.get_var_array(&hist), vec![1, 2, 3]);
        assert_eq!(r.var_array_len(&hist), 3);
    }

    #[test]
    fn size_checks() {
        let s = schema();
        let table = Table::make(&s);
        let r = table.add_record(None).unwrap();
        let pos = s.find_key::<Array<f32>>("pos").unwrap();
        let name = s.find_key::<Str>("name").unwrap();
        assert!(matches!(r.set_array(&pos, &[1.0]), Err(Error::Logic(_))));
        assert!(matches!(r.set_str(&name, "too long"), Err(Error::Logic(_))));
        r.set_str(&name, "abcdef").unwrap();
        assert_eq!(r.get_str(&name), "abcdef");
    }

    #[test]
    fn defaults_are_zero() {
        let s = schema();
        let table = Table::make(&s);
        let r = table.add_record(None).unwrap();
        assert_eq!(r.get(&s.find_key::<f64>("flux").unwrap()), 0.0);
        assert!(!r.get_flag(&s.find_key::<Flag>("bad").unwrap()));
        assert!(r.get_object(&s.find_key::<Object>("psf").unwrap()).is_none());
        assert_eq!(r.get_str(&s.find_key::<Str>("name").unwrap()), "");
    }

    #[test]
    fn assign_within_one_block() {
        let s = schema();
        let table = Table::make(&s);
        let a = table.add_record(None).unwrap();
        let b = table.add_record(None).unwrap();
        let flux = s.find_key::<f64>("flux").unwrap();
        a.set(&flux, 9.0);
        b.assign(&a).unwrap();
        assert_eq!(b.get(&flux), 9.0);
        assert!(!a.same_storage(&b));
        assert!(a.same_storage(&a.clone()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn assign_rejects_type_conflict() {
        let mut other = Schema::new();
        other.add_field::<f32>("flux", "", "").unwrap();
        let src = Table::make(&other).add_record(None).unwrap();
        let dst = Table::make(&schema()).add_record(None).unwrap();
        assert!(matches!(dst.assign(&src), Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn table_handle_is_weak() {
        let s = schema();
        let table = Table::make(&s);
        let r = table.add_record(None).unwrap();
        assert!(r.table().unwrap().ptr_eq(&table));
        drop(table);
        assert!(r.table().is_none());
    }
}
