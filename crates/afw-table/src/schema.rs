//! Ordered, named field collections and their packed row layout.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::alias::AliasMap;
use crate::error::{Error, Result};
use crate::field::{Field, FieldType};
use crate::key::{AnyKey, FieldKind, Key};

/// Bits in one flag word.
const FLAG_WORD_BITS: u32 = 64;

/// A field together with its position in the row.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaItem {
    pub field: Field,
    pub key: AnyKey,
}

impl SchemaItem {
    /// The item's key as kind `K`, failing with `TypeMismatch` otherwise.
    pub fn key<K: FieldKind>(&self) -> Result<Key<K>> {
        self.key.typed::<K>().map_err(|e| match e {
            Error::TypeMismatch {
                expected, found, ..
            } => Error::TypeMismatch {
                name: self.field.name.clone(),
                expected,
                found,
            },
            other => other,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Layout {
    items: Vec<SchemaItem>,
    names: HashMap<String, usize>,
    /// One past the last byte used by any field.
    end: usize,
    /// Offset and bits used of the flag word currently being filled.
    flag_word: Option<(usize, u32)>,
}

const fn align_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

impl Layout {
    fn place(&mut self, field_type: &FieldType) -> AnyKey {
        if *field_type == FieldType::Flag {
            let (offset, bit) = match self.flag_word {
                Some((offset, used)) if used < FLAG_WORD_BITS => (offset, used),
                _ => {
                    let offset = align_up(self.end, 8);
                    self.end = offset + 8;
                    (offset, 0)
                }
            };
            self.flag_word = Some((offset, bit + 1));
            return AnyKey {
                offset,
                bit,
                field_type: *field_type,
            };
        }
        let offset = align_up(self.end, field_type.alignment());
        self.end = offset + field_type.slot_size();
        AnyKey {
            offset,
            bit: 0,
            field_type: *field_type,
        }
    }
}

/// An ordered collection of fields with a computed row layout.
///
/// Cloning is cheap and shares the alias map. A schema is frozen once a
/// table binds to it; frozen schemas reject new fields, and [`Schema::copy`]
/// forks an independent mutable schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    layout: Rc<Layout>,
    aliases: AliasMap,
    frozen: bool,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field and return its item.
    pub fn add(&mut self, field: Field) -> Result<SchemaItem> {
        if self.frozen {
            return Err(Error::logic(format!(
                "cannot add field '{}' to a frozen schema",
                field.name
            )));
        }
        if self.layout.names.contains_key(&field.name) {
            return Err(Error::DuplicateKey(format!("field '{}'", field.name)));
        }
        match field.field_type {
            FieldType::Array(_, 0) | FieldType::String(0) => {
                return Err(Error::logic(format!(
                    "field '{}' must have at least one element",
                    field.name
                )));
            }
            _ => {}
        }

        let layout = Rc::make_mut(&mut self.layout);
        let key = layout.place(&field.field_type);
        let index = layout.items.len();
        layout.names.insert(field.name.clone(), index);
        let item = SchemaItem { field, key };
        layout.items.push(item.clone());
        Ok(item)
    }

    /// Append an unsized field of kind `K`.
    pub fn add_field<K: FieldKind>(&mut self, name: &str, doc: &str, units: &str) -> Result<Key<K>> {
        let ty = K::field_type(None)?;
        self.add(Field::new(name, ty).with_doc(doc).with_units(units))?.key::<K>()
    }

    /// Append an array or string field of kind `K` with `size` elements.
    pub fn add_sized_field<K: FieldKind>(
        &mut self,
        name: &str,
        doc: &str,
        units: &str,
        size: usize,
    ) -> Result<Key<K>> {
        let ty = K::field_type(Some(size))?;
        self.add(Field::new(name, ty).with_doc(doc).with_units(units))?.key::<K>()
    }

    /// Look up a field by name, applying aliases first.
    pub fn find(&self, name: &str) -> Result<SchemaItem> {
        let resolved = self.aliases.resolve(name)?;
        self.layout
            .names
            .get(&resolved)
            .map(|&i| self.layout.items[i].clone())
            .ok_or_else(|| Error::not_found(format!("field '{name}'")))
    }

    /// Typed lookup.
    pub fn find_key<K: FieldKind>(&self, name: &str) -> Result<Key<K>> {
        self.find(name)?.key::<K>()
    }

    /// Whether every field of `other` exists here with the same name and type.
    pub fn contains(&self, other: &Schema) -> bool {
        other.layout.items.iter().all(|item| {
            self.layout
                .names
                .get(&item.field.name)
                .is_some_and(|&i| self.layout.items[i].field.field_type == item.field.field_type)
        })
    }

    /// Row width in bytes, rounded up to a multiple of 8.
    pub fn record_size(&self) -> usize {
        align_up(self.layout.end, 8)
    }

    pub fn len(&self) -> usize {
        self.layout.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.items.is_empty()
    }

    pub fn items(&self) -> &[SchemaItem] {
        &self.layout.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SchemaItem> {
        self.layout.items.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layout.items.iter().map(|i| i.field.name.as_str())
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    /// Replace the alias map handle.
    pub fn set_aliases(&mut self, aliases: AliasMap) {
        self.aliases = aliases;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Independent mutable deep copy with its own alias map.
    pub fn copy(&self) -> Schema {
        Schema {
            layout: Rc::new((*self.layout).clone()),
            aliases: self.aliases.deep_copy(),
            frozen: false,
        }
    }

    /// A frozen handle sharing this schema's layout and aliases.
    pub(crate) fn frozen(&self) -> Schema {
        Schema {
            frozen: true,
            ..self.clone()
        }
    }

    /// Same field types, sizes and offsets in the same order; names ignored.
    pub fn is_layout_compatible(&self, other: &Schema) -> bool {
        self.record_size() == other.record_size()
            && self.len() == other.len()
            && self.iter().zip(other.iter()).all(|(a, b)| a.key == b.key)
    }

    /// Whether two handles share the same layout storage.
    pub(crate) fn shares_layout(&self, other: &Schema) -> bool {
        Rc::ptr_eq(&self.layout, &other.layout)
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        if self.shares_layout(other) {
            return true;
        }
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.field.name == b.field.name && a.key == b.key)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Schema ({} fields, {} bytes per row)", self.len(), self.record_size())?;
        for item in self.iter() {
            write!(f, "  {:<24} {:<16} @{}", item.field.name, item.field.field_type, item.key.offset)?;
            if item.field.field_type == FieldType::Flag {
                write!(f, ".{}", item.key.bit)?;
            }
            if !item.field.units.is_empty() {
                write!(f, "  [{}]", item.field.units)?;
            }
            if !item.field.doc.is_empty() {
                write!(f, "  {}", item.field.doc)?;
            }
            writeln!(f)?;
        }
        for (alias, target) in self.aliases.iter() {
            writeln!(f, "  alias {alias} -> {target}")?;
        }
        Ok(())
    }
}
