//! Typed handles to a field's position in a row.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::field::{Element, FieldType};

/// Compile-time description of what a [`Key`] points at.
pub trait FieldKind: 'static {
    /// Whether a field of `field_type` can be accessed through this kind.
    fn matches(field_type: &FieldType) -> bool;

    /// Human-readable name used in type mismatch errors.
    fn describe() -> String;

    /// The field type to create for this kind, given an optional size.
    fn field_type(size: Option<usize>) -> Result<FieldType>;
}

macro_rules! impl_scalar_kind {
    ($($t:ty),* $(,)?) => {
        $(
            impl FieldKind for $t {
                fn matches(field_type: &FieldType) -> bool {
                    *field_type == FieldType::Scalar(<$t as Element>::SCALAR)
                }

                fn describe() -> String {
                    <$t as Element>::SCALAR.tag().to_string()
                }

                fn field_type(size: Option<usize>) -> Result<FieldType> {
                    match size {
                        None => Ok(FieldType::Scalar(<$t as Element>::SCALAR)),
                        Some(_) => Err(Error::logic("scalar fields cannot be sized")),
                    }
                }
            }
        )*
    };
}

impl_scalar_kind!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

/// Fixed-length array of `T`.
pub struct Array<T>(PhantomData<T>);

/// Fixed-width byte string.
pub struct Str;

/// Single bit in a shared flag word.
pub struct Flag;

/// Variable-length array of `T`.
pub struct VarArray<T>(PhantomData<T>);

/// Optional shared polymorphic object.
pub struct Object;

fn required_size(size: Option<usize>, what: &str) -> Result<usize> {
    match size {
        Some(n) if n > 0 => Ok(n),
        Some(_) => Err(Error::logic(format!("{what} fields need a size of at least 1"))),
        None => Err(Error::logic(format!("{what} fields must be sized"))),
    }
}

fn unsized_kind(size: Option<usize>, what: &str, ty: FieldType) -> Result<FieldType> {
    match size {
        None => Ok(ty),
        Some(_) => Err(Error::logic(format!("{what} fields cannot be sized"))),
    }
}

impl<T: Element> FieldKind for Array<T> {
    fn matches(field_type: &FieldType) -> bool {
        matches!(*field_type, FieldType::Array(t, _) if t == T::SCALAR)
    }

    fn describe() -> String {
        format!("Array{}", T::SCALAR)
    }

    fn field_type(size: Option<usize>) -> Result<FieldType> {
        Ok(FieldType::Array(T::SCALAR, required_size(size, "array")?))
    }
}

impl FieldKind for Str {
    fn matches(field_type: &FieldType) -> bool {
        matches!(field_type, FieldType::String(_))
    }

    fn describe() -> String {
        String::from("String")
    }

    fn field_type(size: Option<usize>) -> Result<FieldType> {
        Ok(FieldType::String(required_size(size, "string")?))
    }
}

impl FieldKind for Flag {
    fn matches(field_type: &FieldType) -> bool {
        *field_type == FieldType::Flag
    }

    fn describe() -> String {
        String::from("Flag")
    }

    fn field_type(size: Option<usize>) -> Result<FieldType> {
        unsized_kind(size, "flag", FieldType::Flag)
    }
}

impl<T: Element> FieldKind for VarArray<T> {
    fn matches(field_type: &FieldType) -> bool {
        *field_type == FieldType::VarArray(T::SCALAR)
    }

    fn describe() -> String {
        format!("VarArray{}", T::SCALAR)
    }

    fn field_type(size: Option<usize>) -> Result<FieldType> {
        unsized_kind(size, "variable-length array", FieldType::VarArray(T::SCALAR))
    }
}

impl FieldKind for Object {
    fn matches(field_type: &FieldType) -> bool {
        *field_type == FieldType::Object
    }

    fn describe() -> String {
        String::from("Object")
    }

    fn field_type(size: Option<usize>) -> Result<FieldType> {
        unsized_kind(size, "object", FieldType::Object)
    }
}

/// Untyped key, as produced by schema layout and name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnyKey {
    pub(crate) offset: usize,
    pub(crate) bit: u32,
    pub(crate) field_type: FieldType,
}

impl AnyKey {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Bit index within the flag word; 0 for non-flag fields.
    pub fn bit(&self) -> u32 {
        self.bit
    }

    /// Convert into a typed key, failing with `TypeMismatch` if the field is
    /// not of kind `K`.
    pub fn typed<K: FieldKind>(&self) -> Result<Key<K>> {
        if !K::matches(&self.field_type) {
            return Err(Error::TypeMismatch {
                name: format!("@{}", self.offset),
                expected: K::describe(),
                found: self.field_type.type_tag(),
            });
        }
        Ok(Key {
            inner: *self,
            _kind: PhantomData,
        })
    }
}

/// Typed handle to a field: byte offset, element count and field type.
///
/// A key carries no reference to its schema. Using it on a record whose
/// schema does not contain the field is a caller error; offsets past the end
/// of the row panic.
pub struct Key<K> {
    inner: AnyKey,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Key<K> {
    pub fn offset(&self) -> usize {
        self.inner.offset
    }

    pub fn element_count(&self) -> usize {
        self.inner.field_type.element_count()
    }

    pub fn field_type(&self) -> FieldType {
        self.inner.field_type
    }

    pub fn untyped(&self) -> AnyKey {
        self.inner
    }
}

impl Key<Flag> {
    pub fn bit(&self) -> u32 {
        self.inner.bit
    }
}

impl<K> Clone for Key<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Key<K> {}

impl<K> PartialEq for Key<K> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<K> Eq for Key<K> {}

impl<K> Hash for Key<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl<K> fmt::Debug for Key<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("offset", &self.inner.offset)
            .field("bit", &self.inner.bit)
            .field("type", &self.inner.field_type)
            .finish()
    }
}
