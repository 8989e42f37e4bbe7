//! Mapping of binary table columns onto schema fields, and row decoding.

use tracing::{trace, warn};

use crate::archive::InputArchive;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::field::{Field, FieldType, ScalarType};
use crate::fits::bintable::{fits_to_native, get_bit, BinTableLayout, ColumnDescriptor, Descriptor, TypeCode};
use crate::fits::header::{card_str, Card};
use crate::key::AnyKey;
use crate::record::{Record, RecordId};
use crate::schema::Schema;

/// TZERO offsets that mark a column as holding the other-signedness variant
/// of its storage type.
const I8_ZERO: f64 = -128.0;
const U16_ZERO: f64 = 32_768.0;
const U32_ZERO: f64 = 2_147_483_648.0;
const U64_ZERO: f64 = 9_223_372_036_854_775_808.0;

/// Scalar type a column decodes to, and whether the TZERO sign flip applies.
pub(crate) fn scalar_for(code: TypeCode, tzero: Option<f64>) -> Option<(ScalarType, bool)> {
    Some(match (code, tzero) {
        (TypeCode::Byte, Some(z)) if z == I8_ZERO => (ScalarType::I8, true),
        (TypeCode::Byte, _) => (ScalarType::U8, false),
        (TypeCode::Short, Some(z)) if z == U16_ZERO => (ScalarType::U16, true),
        (TypeCode::Short, _) => (ScalarType::I16, false),
        (TypeCode::Int, Some(z)) if z == U32_ZERO => (ScalarType::U32, true),
        (TypeCode::Int, _) => (ScalarType::I32, false),
        (TypeCode::Long, Some(z)) if z == U64_ZERO => (ScalarType::U64, true),
        (TypeCode::Long, _) => (ScalarType::I64, false),
        (TypeCode::Float, _) => (ScalarType::F32, false),
        (TypeCode::Double, _) => (ScalarType::F64, false),
        _ => return None,
    })
}

/// TFORM code and TZERO for storing a scalar type.
pub(crate) fn storage_for(ty: ScalarType) -> (TypeCode, Option<f64>) {
    match ty {
        ScalarType::U8 => (TypeCode::Byte, None),
        ScalarType::I8 => (TypeCode::Byte, Some(I8_ZERO)),
        ScalarType::I16 => (TypeCode::Short, None),
        ScalarType::U16 => (TypeCode::Short, Some(U16_ZERO)),
        ScalarType::I32 => (TypeCode::Int, None),
        ScalarType::U32 => (TypeCode::Int, Some(U32_ZERO)),
        ScalarType::I64 => (TypeCode::Long, None),
        ScalarType::U64 => (TypeCode::Long, Some(U64_ZERO)),
        ScalarType::F32 => (TypeCode::Float, None),
        ScalarType::F64 => (TypeCode::Double, None),
    }
}

/// Whether a scalar type is stored with its sign bit flipped.
pub(crate) fn flips_sign(ty: ScalarType) -> bool {
    storage_for(ty).1.is_some()
}

#[derive(Debug, Clone)]
enum ColumnReader {
    Numeric {
        src: usize,
        key: AnyKey,
        ty: ScalarType,
        count: usize,
        flip: bool,
    },
    Str {
        src: usize,
        key: AnyKey,
        width: usize,
    },
    /// `X` columns; bit `i` feeds `keys[i]`.
    Bits { src: usize, keys: Vec<AnyKey> },
    /// `L` columns; byte `i` feeds `keys[i]`.
    Logical { src: usize, keys: Vec<AnyKey> },
    VarArray {
        src: usize,
        key: AnyKey,
        ty: ScalarType,
        descriptor: Descriptor,
        flip: bool,
    },
    Object { src: usize, key: AnyKey },
}

/// Builds a schema from binary table column keywords and decodes rows into
/// records of a table over that schema.
///
/// Readers may add fields through [`schema_mut`](Self::schema_mut) before the
/// table is made; mapped columns keep their keys.
#[derive(Debug, Clone)]
pub struct SchemaInputMapper {
    schema: Schema,
    layout: BinTableLayout,
    cards: Vec<Card>,
    readers: Vec<ColumnReader>,
}

/// Names of the bits of a packed flag column, from `TFLAGn` cards.
fn packed_flag_names(cards: &[Card], repeat: usize) -> Option<Vec<String>> {
    let names: Vec<String> = (1..=repeat)
        .map_while(|i| card_str(cards, &format!("TFLAG{i}")).map(|s| s.trim().to_string()))
        .collect();
    (names.len() == repeat).then_some(names)
}

fn add_flags(schema: &mut Schema, names: &[String], col: &ColumnDescriptor) -> Result<Vec<AnyKey>> {
    names
        .iter()
        .map(|name| {
            let mut field = Field::new(name.as_str(), FieldType::Flag);
            if let Some(doc) = &col.doc {
                field = field.with_doc(doc.as_str());
            }
            Ok(schema.add(field)?.key)
        })
        .collect()
}

fn indexed_names(base: &str, n: usize) -> Vec<String> {
    if n == 1 {
        vec![base.to_string()]
    } else {
        (0..n).map(|i| format!("{base}_{i}")).collect()
    }
}

impl SchemaInputMapper {
    /// Map the columns described by a BINTABLE header.
    pub fn new(cards: &[Card]) -> Result<Self> {
        let layout = BinTableLayout::from_cards(cards)?;
        let mut schema = Schema::new();
        let mut readers = Vec::with_capacity(layout.columns.len());

        for col in &layout.columns {
            let name = col
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("col{}", col.number));
            let src = col.offset;
            let tform = col.tform;
            let field_of = |ty: FieldType| {
                let mut f = Field::new(name.as_str(), ty);
                if let Some(doc) = &col.doc {
                    f = f.with_doc(doc.as_str());
                }
                if let Some(unit) = &col.unit {
                    f = f.with_units(unit.as_str());
                }
                f
            };

            if tform.repeat == 0 {
                warn!(column = %name, "skipping zero-width column");
                continue;
            }

            let reader = match (tform.descriptor, tform.code) {
                (Some(descriptor), code) => match scalar_for(code, col.tzero) {
                    Some((ty, flip)) => {
                        let key = schema.add(field_of(FieldType::VarArray(ty)))?.key;
                        ColumnReader::VarArray {
                            src,
                            key,
                            ty,
                            descriptor,
                            flip,
                        }
                    }
                    None => {
                        warn!(column = %name, tform = %tform, "skipping unsupported variable-length column");
                        continue;
                    }
                },
                (None, TypeCode::ComplexFloat | TypeCode::ComplexDouble) => {
                    warn!(column = %name, tform = %tform, "skipping complex column");
                    continue;
                }
                (None, TypeCode::Ascii) => {
                    let key = schema.add(field_of(FieldType::String(tform.repeat)))?.key;
                    ColumnReader::Str {
                        src,
                        key,
                        width: tform.repeat,
                    }
                }
                (None, TypeCode::Bit) => {
                    let names = packed_flag_names(cards, tform.repeat)
                        .filter(|_| tform.repeat > 1)
                        .unwrap_or_else(|| indexed_names(&name, tform.repeat));
                    ColumnReader::Bits {
                        src,
                        keys: add_flags(&mut schema, &names, col)?,
                    }
                }
                (None, TypeCode::Logical) => {
                    let names = indexed_names(&name, tform.repeat);
                    ColumnReader::Logical {
                        src,
                        keys: add_flags(&mut schema, &names, col)?,
                    }
                }
                (None, TypeCode::Int)
                    if tform.repeat == 1 && col.class.as_deref() == Some("Object") =>
                {
                    let key = schema.add(field_of(FieldType::Object))?.key;
                    ColumnReader::Object { src, key }
                }
                (None, code) => {
                    let Some((scalar, flip)) = scalar_for(code, col.tzero) else {
                        warn!(column = %name, tform = %tform, "skipping unsupported column");
                        continue;
                    };
                    if let Some(z) = col.tzero.filter(|_| !flip) {
                        warn!(column = %name, tzero = z, "ignoring non-standard TZERO");
                    }
                    let is_array = tform.repeat > 1 || col.class.as_deref() == Some("Array");
                    let ty = if is_array {
                        FieldType::Array(scalar, tform.repeat)
                    } else {
                        FieldType::Scalar(scalar)
                    };
                    let key = schema.add(field_of(ty))?.key;
                    ColumnReader::Numeric {
                        src,
                        key,
                        ty: scalar,
                        count: tform.repeat,
                        flip,
                    }
                }
            };
            trace!(column = %name, tform = %tform, "mapped column");
            readers.push(reader);
        }

        for card in cards.iter().filter(|c| c.keyword_str() == "ALIAS") {
            let Some(text) = card.value.as_ref().and_then(|v| v.as_str()) else {
                continue;
            };
            match text.split_once(':') {
                Some((alias, target)) => schema.aliases().set(alias.trim(), target.trim()),
                None => warn!(alias = text, "ignoring malformed ALIAS card"),
            }
        }

        Ok(SchemaInputMapper {
            schema,
            layout,
            cards: cards.to_vec(),
            readers,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    /// The schema to bind a table to.
    pub fn finalize(&self) -> Schema {
        self.schema.clone()
    }

    pub fn layout(&self) -> &BinTableLayout {
        &self.layout
    }

    /// The full header the mapper was built from.
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn nrows(&self) -> usize {
        self.layout.naxis2
    }

    /// The id stored in a SIMPLE row, read from the column mapped to `id_key`.
    fn row_id(&self, row: &[u8], id_key: &AnyKey) -> Option<RecordId> {
        self.readers.iter().find_map(|r| match r {
            ColumnReader::Numeric {
                src, key, ty, flip, ..
            } if key.offset == id_key.offset => {
                let mut buf = [0u8; 8];
                fits_to_native(&row[*src..*src + 8], &mut buf, 8, *flip);
                match ty {
                    ScalarType::I64 => Some(i64::from_ne_bytes(buf) as RecordId),
                    ScalarType::U64 => Some(u64::from_ne_bytes(buf)),
                    _ => None,
                }
            }
            _ => None,
        })
    }

    /// Decode every row of `data` into new records appended to `catalog`.
    ///
    /// Object columns are resolved through `archive` when given and left
    /// empty otherwise.
    pub fn read_rows(&self, data: &[u8], catalog: &mut Catalog, archive: Option<&InputArchive>) -> Result<()> {
        let naxis1 = self.layout.naxis1;
        let nrows = self.layout.naxis2;
        let rows_len = naxis1
            .checked_mul(nrows)
            .ok_or_else(|| Error::format(format!("table of {nrows} rows of {naxis1} bytes overflows")))?;
        if data.len() < rows_len {
            return Err(Error::format(format!(
                "table data holds {} bytes, expected at least {rows_len}",
                data.len()
            )));
        }
        let heap = data.get(self.layout.theap..).unwrap_or(&[]);
        let table = catalog.table().clone();
        table.preallocate(nrows);

        for i in 0..nrows {
            let row = &data[i * naxis1..(i + 1) * naxis1];
            let id = match table.id_key() {
                Some(k) => Some(self.row_id(row, &k).ok_or_else(|| {
                    Error::format("id column is missing or not a 64-bit integer")
                })?),
                None => None,
            };
            let record = table.add_record(id)?;
            self.decode_row(row, heap, &record, archive)?;
            catalog.append(record)?;
        }
        Ok(())
    }

    fn decode_row(&self, row: &[u8], heap: &[u8], record: &Record, archive: Option<&InputArchive>) -> Result<()> {
        for reader in &self.readers {
            match reader {
                ColumnReader::Numeric {
                    src,
                    key,
                    ty,
                    count,
                    flip,
                } => {
                    let size = ty.size();
                    let mut buf = vec![0u8; size * count];
                    fits_to_native(&row[*src..*src + buf.len()], &mut buf, size, *flip);
                    record
                        .block()
                        .borrow_mut()
                        .write_bytes(record.row(), key.offset, &buf);
                }
                ColumnReader::Str { src, key, width } => {
                    let raw = &row[*src..*src + width];
                    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                    let text = &raw[..end];
                    let text_end = text.iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
                    let mut buf = vec![0u8; *width];
                    buf[..text_end].copy_from_slice(&text[..text_end]);
                    record
                        .block()
                        .borrow_mut()
                        .write_bytes(record.row(), key.offset, &buf);
                }
                ColumnReader::Bits { src, keys } => {
                    let bytes = &row[*src..*src + keys.len().div_ceil(8)];
                    let mut block = record.block().borrow_mut();
                    for (i, key) in keys.iter().enumerate() {
                        block.set_flag(record.row(), key.offset, key.bit, get_bit(bytes, i));
                    }
                }
                ColumnReader::Logical { src, keys } => {
                    let mut block = record.block().borrow_mut();
                    for (i, key) in keys.iter().enumerate() {
                        block.set_flag(record.row(), key.offset, key.bit, row[src + i] == b'T');
                    }
                }
                ColumnReader::VarArray {
                    src,
                    key,
                    ty,
                    descriptor,
                    flip,
                } => {
                    let (count, offset) = read_descriptor(&row[*src..], *descriptor)?;
                    let size = ty.size();
                    let len = count
                        .checked_mul(size)
                        .ok_or_else(|| Error::format("variable-length array size overflow"))?;
                    let bytes = offset
                        .checked_add(len)
                        .and_then(|end| heap.get(offset..end))
                        .ok_or_else(|| Error::format("variable-length array runs past the heap"))?;
                    let mut buf = vec![0u8; len];
                    fits_to_native(bytes, &mut buf, size, *flip);
                    record
                        .block()
                        .borrow_mut()
                        .set_var_bytes(record.row(), key.offset, count, buf);
                }
                ColumnReader::Object { src, key } => {
                    let id = i32::from_be_bytes([row[*src], row[src + 1], row[src + 2], row[src + 3]]);
                    if let Some(archive) = archive {
                        let object = archive.get(id)?;
                        record
                            .block()
                            .borrow_mut()
                            .set_object(record.row(), key.offset, object);
                    }
                }
            }
        }
        Ok(())
    }
}

fn read_descriptor(bytes: &[u8], descriptor: Descriptor) -> Result<(usize, usize)> {
    let bad = || Error::format("negative variable-length array descriptor");
    match descriptor {
        Descriptor::P => {
            let count = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let offset = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            Ok((
                usize::try_from(count).map_err(|_| bad())?,
                usize::try_from(offset).map_err(|_| bad())?,
            ))
        }
        Descriptor::Q => {
            let mut count = [0u8; 8];
            let mut offset = [0u8; 8];
            count.copy_from_slice(&bytes[..8]);
            offset.copy_from_slice(&bytes[8..16]);
            Ok((
                usize::try_from(i64::from_be_bytes(count)).map_err(|_| bad())?,
                usize::try_from(i64::from_be_bytes(offset)).map_err(|_| bad())?,
            ))
        }
    }
}
