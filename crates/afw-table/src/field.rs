//! Field descriptions and the scalar element types a field can hold.

use std::cmp::Ordering;
use std::fmt;

/// Numeric element type of a scalar, array or variable-length array field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            ScalarType::I8 => "I8",
            ScalarType::U8 => "U8",
            ScalarType::I16 => "I16",
            ScalarType::U16 => "U16",
            ScalarType::I32 => "I32",
            ScalarType::U32 => "U32",
            ScalarType::I64 => "I64",
            ScalarType::U64 => "U64",
            ScalarType::F32 => "F32",
            ScalarType::F64 => "F64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The shape and element type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Scalar(ScalarType),
    /// Fixed-length array of `n >= 1` elements stored inline.
    Array(ScalarType, usize),
    /// Variable-length array; the row holds only the element count.
    VarArray(ScalarType),
    /// Fixed-width byte string of `n >= 1` bytes.
    String(usize),
    /// One bit of a shared 64-bit flag word.
    Flag,
    /// Optional shared polymorphic object, persisted through the archive.
    Object,
}

/// Bytes reserved in a row for a variable-length array's element count.
pub(crate) const VAR_ARRAY_SLOT: usize = 8;

/// Bytes reserved in a row for an object slot.
pub(crate) const OBJECT_SLOT: usize = 4;

impl FieldType {
    /// 1 for scalars, flags and objects; `n` for arrays and strings; 0 for
    /// variable-length arrays.
    pub fn element_count(&self) -> usize {
        match *self {
            FieldType::Scalar(_) | FieldType::Flag | FieldType::Object => 1,
            FieldType::Array(_, n) | FieldType::String(n) => n,
            FieldType::VarArray(_) => 0,
        }
    }

    /// Stable textual tag, e.g. `F64`, `ArrayF32`, `String`, `Flag`.
    pub fn type_tag(&self) -> String {
        match self {
            FieldType::Scalar(t) => t.tag().to_string(),
            FieldType::Array(t, _) => format!("Array{t}"),
            FieldType::VarArray(t) => format!("VarArray{t}"),
            FieldType::String(_) => String::from("String"),
            FieldType::Flag => String::from("Flag"),
            FieldType::Object => String::from("Object"),
        }
    }

    /// Element type for numeric fields.
    pub fn scalar(&self) -> Option<ScalarType> {
        match *self {
            FieldType::Scalar(t) | FieldType::Array(t, _) | FieldType::VarArray(t) => Some(t),
            _ => None,
        }
    }

    /// Alignment of the field's slot within a row. Flags report 8 for the
    /// word they live in.
    pub(crate) fn alignment(&self) -> usize {
        match *self {
            FieldType::Scalar(t) | FieldType::Array(t, _) => t.size(),
            FieldType::String(_) => 1,
            FieldType::VarArray(_) | FieldType::Flag => 8,
            FieldType::Object => OBJECT_SLOT,
        }
    }

    /// Bytes the field occupies in a row. Flags share words and report 0.
    pub(crate) fn slot_size(&self) -> usize {
        match *self {
            FieldType::Scalar(t) => t.size(),
            FieldType::Array(t, n) => t.size() * n,
            FieldType::String(n) => n,
            FieldType::VarArray(_) => VAR_ARRAY_SLOT,
            FieldType::Flag => 0,
            FieldType::Object => OBJECT_SLOT,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Array(_, n) | FieldType::String(n) => write!(f, "{}[{n}]", self.type_tag()),
            _ => f.write_str(&self.type_tag()),
        }
    }
}

/// A named, documented column of a schema. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub doc: String,
    pub units: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Field {
            name: name.into(),
            doc: String::new(),
            units: String::new(),
            field_type,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }
}

/// A plain numeric type that can be stored in a row.
pub trait Element: bytemuck::Pod + Default + PartialEq + fmt::Debug + 'static {
    const SCALAR: ScalarType;

    /// Total order used for sorting; floats order as `f64::total_cmp`.
    fn total_cmp(&self, other: &Self) -> Ordering;
}

macro_rules! impl_element_int {
    ($($t:ty => $s:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const SCALAR: ScalarType = ScalarType::$s;

                fn total_cmp(&self, other: &Self) -> Ordering {
                    self.cmp(other)
                }
            }
        )*
    };
}

macro_rules! impl_element_float {
    ($($t:ty => $s:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const SCALAR: ScalarType = ScalarType::$s;

                fn total_cmp(&self, other: &Self) -> Ordering {
                    <$t>::total_cmp(self, other)
                }
            }
        )*
    };
}

impl_element_int!(
    i8 => I8, u8 => U8, i16 => I16, u16 => U16,
    i32 => I32, u32 => U32, i64 => I64, u64 => U64,
);
impl_element_float!(f32 => F32, f64 => F64);
