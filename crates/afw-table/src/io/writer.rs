//! Encoding of catalogs into binary table HDUs.

use tracing::{debug, trace};

use crate::archive::OutputArchive;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::field::{FieldType, ScalarType};
use crate::fits::bintable::{native_to_fits, set_bit, BinTableLayout, ColumnDescriptor, TForm, TypeCode};
use crate::fits::file::{empty_primary_hdu, serialize_hdu};
use crate::fits::header::{check_card_text, Card};
use crate::io::mapper::{flips_sign, storage_for};
use crate::io::{ARCHIVE_HDU_KEYWORD, TYPE_KEYWORD};
use crate::key::AnyKey;
use crate::record::Record;
use crate::schema::Schema;

/// EXTNAME of the HDU holding the catalog rows.
pub const CATALOG_EXTNAME: &str = "CATALOG";

#[derive(Debug, Clone)]
enum ColumnWriter {
    Numeric { key: AnyKey, ty: ScalarType, count: usize },
    Str { key: AnyKey, width: usize },
    Flag { key: AnyKey },
    VarArray { key: AnyKey, ty: ScalarType },
    /// `index` is the position of this column among the object columns.
    Object { index: usize },
}

/// Maps schema fields onto binary table columns and encodes records as rows.
#[derive(Debug, Clone)]
pub struct SchemaOutputMapper {
    columns: Vec<ColumnDescriptor>,
    writers: Vec<ColumnWriter>,
    object_keys: Vec<AnyKey>,
}

impl SchemaOutputMapper {
    /// One column per field. Variable-length columns record the longest
    /// array among `records` in their TFORM.
    pub fn new(schema: &Schema, records: &[Record]) -> Self {
        let mut columns = Vec::with_capacity(schema.len());
        let mut writers = Vec::with_capacity(schema.len());
        let mut object_keys = Vec::new();

        for item in schema.iter() {
            let field = &item.field;
            let key = item.key;
            let (tform, tzero, class, writer) = match field.field_type {
                FieldType::Scalar(ty) => {
                    let (code, tzero) = storage_for(ty);
                    (TForm::fixed(1, code), tzero, None, ColumnWriter::Numeric { key, ty, count: 1 })
                }
                FieldType::Array(ty, n) => {
                    let (code, tzero) = storage_for(ty);
                    (
                        TForm::fixed(n, code),
                        tzero,
                        Some("Array"),
                        ColumnWriter::Numeric { key, ty, count: n },
                    )
                }
                FieldType::String(width) => (
                    TForm::fixed(width, TypeCode::Ascii),
                    None,
                    None,
                    ColumnWriter::Str { key, width },
                ),
                FieldType::Flag => (TForm::fixed(1, TypeCode::Bit), None, None, ColumnWriter::Flag { key }),
                FieldType::VarArray(ty) => {
                    let (code, tzero) = storage_for(ty);
                    let max_len = records
                        .iter()
                        .map(|r| r.block().borrow().read::<u64>(r.row(), key.offset) as usize)
                        .max()
                        .unwrap_or(0);
                    (TForm::variable(code, max_len), tzero, None, ColumnWriter::VarArray { key, ty })
                }
                FieldType::Object => {
                    object_keys.push(key);
                    (
                        TForm::fixed(1, TypeCode::Int),
                        None,
                        Some("Object"),
                        ColumnWriter::Object {
                            index: object_keys.len() - 1,
                        },
                    )
                }
            };
            let mut col = ColumnDescriptor::new(&field.name, tform);
            col.tzero = tzero;
            col.class = class.map(str::to_string);
            col.doc = Some(field.doc.clone()).filter(|d| !d.is_empty());
            col.unit = Some(field.units.clone()).filter(|u| !u.is_empty());
            trace!(column = %field.name, tform = %tform, "mapped field");
            columns.push(col);
            writers.push(writer);
        }

        SchemaOutputMapper {
            columns,
            writers,
            object_keys,
        }
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Keys of the object fields, in column order.
    pub fn object_keys(&self) -> &[AnyKey] {
        &self.object_keys
    }

    /// Encode `records` into the row and heap bytes of a data segment.
    ///
    /// `object_ids[i][k]` is the archive id for record `i`'s `k`-th object
    /// field; without it every object column is written as 0.
    pub fn encode(&self, records: &[Record], object_ids: Option<&[Vec<i32>]>) -> Result<(BinTableLayout, Vec<u8>)> {
        if let Some(ids) = object_ids {
            if ids.len() != records.len() {
                return Err(Error::logic(format!(
                    "{} object id rows for {} records",
                    ids.len(),
                    records.len()
                )));
            }
        }
        let probe = BinTableLayout::from_columns(self.columns.clone(), records.len(), 0);
        let naxis1 = probe.naxis1;
        let mut rows = vec![0u8; naxis1 * records.len()];
        let mut heap = Vec::new();

        for (i, record) in records.iter().enumerate() {
            let block = record.block().borrow();
            let src = block.row(record.row());
            let row = &mut rows[i * naxis1..(i + 1) * naxis1];
            for (col, writer) in probe.columns.iter().zip(&self.writers) {
                let dst = &mut row[col.offset..col.offset + col.tform.byte_width()];
                match writer {
                    ColumnWriter::Numeric { key, ty, count } => {
                        let len = ty.size() * count;
                        native_to_fits(&src[key.offset..key.offset + len], dst, ty.size(), flips_sign(*ty));
                    }
                    ColumnWriter::Str { key, width } => {
                        dst.copy_from_slice(&src[key.offset..key.offset + width]);
                    }
                    ColumnWriter::Flag { key } => {
                        set_bit(dst, 0, block.get_flag(record.row(), key.offset, key.bit));
                    }
                    ColumnWriter::VarArray { key, ty } => {
                        let payload = block.var_bytes(record.row(), key.offset);
                        let count = payload.len() / ty.size();
                        let offset = heap.len();
                        heap.resize(offset + payload.len(), 0);
                        native_to_fits(payload, &mut heap[offset..], ty.size(), flips_sign(*ty));
                        let to_i32 =
                            |n: usize| i32::try_from(n).map_err(|_| Error::logic("heap exceeds 32-bit descriptor range"));
                        dst[..4].copy_from_slice(&to_i32(count)?.to_be_bytes());
                        dst[4..8].copy_from_slice(&to_i32(offset)?.to_be_bytes());
                    }
                    ColumnWriter::Object { index } => {
                        let id = object_ids.map_or(0, |ids| ids[i].get(*index).copied().unwrap_or(0));
                        dst.copy_from_slice(&id.to_be_bytes());
                    }
                }
            }
        }

        let layout = BinTableLayout::from_columns(self.columns.clone(), records.len(), heap.len());
        rows.extend_from_slice(&heap);
        Ok((layout, rows))
    }
}

/// Serialize one catalog as a BINTABLE HDU, with `extra_cards` after the
/// column keywords.
pub(crate) fn table_hdu(catalog: &Catalog, object_ids: Option<&[Vec<i32>]>, extra_cards: &[Card]) -> Result<Vec<u8>> {
    let mapper = SchemaOutputMapper::new(catalog.schema(), catalog.records());
    let (layout, data) = mapper.encode(catalog.records(), object_ids)?;
    let mut cards = layout.to_cards();
    cards.extend_from_slice(extra_cards);
    let cards = checked_header(cards)?;
    debug!(
        rows = layout.naxis2,
        columns = layout.columns.len(),
        heap = layout.pcount,
        "encoded table HDU"
    );
    Ok(serialize_hdu(&cards, &data))
}

/// Rejects header text FITS cannot store, before any bytes are produced.
fn checked_header(cards: Vec<Card>) -> Result<Vec<Card>> {
    for card in &cards {
        check_card_text(card)?;
    }
    Ok(cards)
}

/// The catalog HDU followed by its archive HDUs, for a catalog landing at
/// extension HDU `first_hdu` (1-based).
pub(crate) fn catalog_hdus(catalog: &Catalog, first_hdu: usize) -> Result<Vec<Vec<u8>>> {
    let kind = catalog.table().kind();
    let mapper = SchemaOutputMapper::new(catalog.schema(), catalog.records());
    if !kind.uses_archive() && !mapper.object_keys().is_empty() {
        return Err(Error::logic(format!(
            "a {kind} table cannot persist object fields"
        )));
    }

    let mut archive = OutputArchive::new();
    let object_ids = if kind.uses_archive() {
        let mut ids = Vec::with_capacity(catalog.len());
        for record in catalog {
            let mut row = Vec::with_capacity(mapper.object_keys().len());
            for key in mapper.object_keys() {
                let object = record.block().borrow().object(record.row(), key.offset);
                row.push(archive.put(object.as_ref())?);
            }
            ids.push(row);
        }
        Some(ids)
    } else {
        None
    };

    let mut cards = vec![
        Card::new("EXTNAME", CATALOG_EXTNAME),
        Card::new(TYPE_KEYWORD, kind.tag()).with_comment("table kind used to read this HDU"),
    ];
    if kind.uses_archive() {
        cards.push(
            Card::new(ARCHIVE_HDU_KEYWORD, (first_hdu + 1) as i64).with_comment("HDU of the archive index"),
        );
    }
    for (alias, target) in catalog.schema().aliases().iter() {
        cards.push(Card::new("ALIAS", format!("{alias}:{target}")));
    }
    let mut metadata = catalog.table().metadata().clone();
    metadata.strip_structural();
    cards.extend(metadata.to_cards());

    let (layout, data) = mapper.encode(catalog.records(), object_ids.as_deref())?;
    let mut header = layout.to_cards();
    header.extend(cards);
    let header = checked_header(header)?;
    let mut hdus = vec![serialize_hdu(&header, &data)];
    if kind.uses_archive() {
        hdus.extend(archive.to_hdus()?);
    }
    debug!(
        kind = %kind,
        rows = catalog.len(),
        objects = archive.len(),
        hdus = hdus.len(),
        "encoded catalog"
    );
    Ok(hdus)
}

/// A complete file image: an empty primary HDU followed by the catalog.
pub(crate) fn catalog_file_bytes(catalog: &Catalog) -> Result<Vec<u8>> {
    let mut bytes = empty_primary_hdu();
    for hdu in catalog_hdus(catalog, 2)? {
        bytes.extend(hdu);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::file::FitsFile;
    use crate::fits::header::card_str;
    use crate::key::{Array, Flag, Str, VarArray};
    use crate::table::Table;

    fn sample() -> Catalog {
        let mut schema = Schema::new();
        let x = schema.add_field::<i32>("x", "an integer", "").unwrap();
        let u = schema.add_field::<u16>("u", "", "").unwrap();
        schema.add_sized_field::<Array<f64>>("pos", "", "deg", 2).unwrap();
        let name = schema.add_sized_field::<Str>("name", "", "", 4).unwrap();
        let ok = schema.add_field::<Flag>("ok", "", "").unwrap();
        let v = schema.add_field::<VarArray<i16>>("v", "", "").unwrap();
        let mut cat = Catalog::new(Table::make(&schema));
        let r = cat.add_new().unwrap();
        r.set(&x, -7);
        r.set(&u, 40_000);
        r.set_str(&name, "ab").unwrap();
        r.set_flag(&ok, true);
        r.set_var_array(&v, &[1, 2, 3]);
        cat
    }

    #[test]
    fn columns_follow_field_types() {
        let cat = sample();
        let mapper = SchemaOutputMapper::new(cat.schema(), cat.records());
        let tforms: Vec<_> = mapper.columns().iter().map(|c| c.tform.to_string()).collect();
        assert_eq!(tforms, ["1J", "1I", "2D", "4A", "1X", "1PI(3)"]);
        assert_eq!(mapper.columns()[1].tzero, Some(32768.0));
        assert_eq!(mapper.columns()[2].class.as_deref(), Some("Array"));
        assert_eq!(mapper.columns()[2].unit.as_deref(), Some("deg"));
        assert_eq!(mapper.columns()[0].doc.as_deref(), Some("an integer"));
    }

    #[test]
    fn encodes_big_endian_rows_and_heap() {
        let cat = sample();
        let mapper = SchemaOutputMapper::new(cat.schema(), cat.records());
        let (layout, data) = mapper.encode(cat.records(), None).unwrap();
        assert_eq!(layout.naxis1, 4 + 2 + 16 + 4 + 1 + 8);
        assert_eq!(layout.pcount, 6);
        assert_eq!(&data[0..4], &(-7i32).to_be_bytes());
        // 40000 - 32768
        assert_eq!(&data[4..6], &7232i16.to_be_bytes());
        assert_eq!(&data[22..26], b"ab\0\0");
        assert_eq!(data[26], 0x80);
        assert_eq!(&data[27..31], &3i32.to_be_bytes());
        assert_eq!(&data[layout.theap..], &[0, 1, 0, 2, 0, 3]);
    }

    #[test]
    fn base_catalog_header() {
        let cat = sample();
        cat.schema().aliases().set("p", "pos");
        cat.table().metadata_mut().set("OBSERVER", "me").unwrap();
        let fits = FitsFile::from_bytes(catalog_file_bytes(&cat).unwrap()).unwrap();
        assert_eq!(fits.len(), 2);
        let cards = &fits.hdu(2).unwrap().cards;
        assert_eq!(card_str(cards, "EXTNAME"), Some(CATALOG_EXTNAME));
        assert_eq!(card_str(cards, TYPE_KEYWORD), Some("BASE"));
        assert_eq!(card_str(cards, "ALIAS"), Some("p:pos"));
        assert_eq!(card_str(cards, "OBSERVER"), Some("me"));
        assert!(card_str(cards, ARCHIVE_HDU_KEYWORD).is_none());
    }

    #[test]
    fn simple_catalog_writes_archive() {
        let cat = Catalog::new(Table::make_simple(&Table::make_minimal_simple_schema()).unwrap());
        let hdus = catalog_hdus(&cat, 2).unwrap();
        assert_eq!(hdus.len(), 2);
    }

    #[test]
    fn base_table_rejects_objects() {
        let mut schema = Schema::new();
        schema.add_field::<crate::key::Object>("psf", "", "").unwrap();
        let cat = Catalog::new(Table::make(&schema));
        assert!(matches!(catalog_hdus(&cat, 2), Err(Error::Logic(_))));
    }
}
