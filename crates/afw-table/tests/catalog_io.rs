//! Catalog write/read round trips through in-memory FITS images and files.

use afw_table::fits::FitsFile;
use afw_table::io::{read_catalog, TYPE_KEYWORD};
use afw_table::{
    Array, Catalog, Error, FieldType, Flag, IoFlags, ReadOptions, ScalarType, Schema, Str, Table,
    TableKind, VarArray, WriteMode,
};

fn read_back(cat: &Catalog) -> Catalog {
    let bytes = cat.write_fits_bytes().unwrap();
    Catalog::read_fits_bytes(bytes, &ReadOptions::default()).unwrap()
}

fn type_card_offset(bytes: &[u8]) -> usize {
    bytes
        .chunks_exact(80)
        .position(|card| card.starts_with(TYPE_KEYWORD.as_bytes()))
        .unwrap()
        * 80
}

#[test]
fn id_flux_flag_through_file() {
    let mut schema = Schema::new();
    schema.add_field::<i64>("id", "unique id", "").unwrap();
    let flux = schema.add_field::<f64>("flux", "", "count").unwrap();
    let flag = schema.add_field::<Flag>("flag", "", "").unwrap();
    let mut cat = Catalog::new(Table::make_simple(&schema).unwrap());
    for v in [1.5, -2.25, 0.0] {
        cat.add_new().unwrap().set(&flux, v);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sources.fits");
    cat.write_fits(&path, WriteMode::Write).unwrap();
    let back = Catalog::read_fits(&path, 2).unwrap();

    assert_eq!(back.table().kind(), TableKind::Simple);
    assert_eq!(back.len(), 3);
    let names: Vec<_> = back.schema().names().collect();
    assert_eq!(names, ["id", "flux", "flag"]);
    let flux = back.schema().find_key::<f64>("flux").unwrap();
    let flag = back.schema().find_key::<Flag>("flag").unwrap();
    let id = back.schema().find_key::<i64>("id").unwrap();
    let fluxes: Vec<f64> = back.iter().map(|r| r.get(&flux)).collect();
    assert_eq!(fluxes, [1.5, -2.25, 0.0]);
    assert!(back.iter().all(|r| !r.get_flag(&flag)));
    let ids: Vec<i64> = back.iter().map(|r| r.get(&id)).collect();
    assert_eq!(ids, [1, 2, 3]);
    assert_eq!(back[2].id(), 3);
    assert_eq!(back.schema().find("flux").unwrap().field.units, "count");
}

#[test]
fn every_field_type_round_trips() {
    let mut schema = Schema::new();
    let i8k = schema.add_field::<i8>("a_i8", "", "").unwrap();
    let u8k = schema.add_field::<u8>("a_u8", "", "").unwrap();
    let i16k = schema.add_field::<i16>("a_i16", "", "").unwrap();
    let u16k = schema.add_field::<u16>("a_u16", "", "").unwrap();
    let i32k = schema.add_field::<i32>("a_i32", "", "").unwrap();
    let u32k = schema.add_field::<u32>("a_u32", "", "").unwrap();
    let i64k = schema.add_field::<i64>("a_i64", "", "").unwrap();
    let u64k = schema.add_field::<u64>("a_u64", "", "").unwrap();
    let f32k = schema.add_field::<f32>("a_f32", "", "").unwrap();
    let f64k = schema.add_field::<f64>("a_f64", "", "").unwrap();
    let arr = schema.add_sized_field::<Array<f32>>("arr", "", "", 3).unwrap();
    let single = schema.add_sized_field::<Array<i16>>("single", "", "", 1).unwrap();
    let name = schema.add_sized_field::<Str>("name", "", "", 10).unwrap();
    let flags: Vec<_> = (0..70)
        .map(|i| schema.add_field::<Flag>(&format!("f{i}"), "", "").unwrap())
        .collect();
    let var = schema.add_field::<VarArray<u32>>("var", "", "").unwrap();
    let dvar = schema.add_field::<VarArray<f64>>("dvar", "", "").unwrap();

    let mut cat = Catalog::new(Table::make(&schema));
    let r = cat.add_new().unwrap();
    r.set(&i8k, -100);
    r.set(&u8k, 250);
    r.set(&i16k, -30_000);
    r.set(&u16k, 65_000);
    r.set(&i32k, i32::MIN);
    r.set(&u32k, u32::MAX);
    r.set(&i64k, i64::MIN + 1);
    r.set(&u64k, u64::MAX - 3);
    r.set(&f32k, 3.25);
    r.set(&f64k, -1.0e300);
    r.set_array(&arr, &[1.0, f32::INFINITY, -0.5]).unwrap();
    r.set_array(&single, &[7]).unwrap();
    r.set_str(&name, "NGC 1234").unwrap();
    for (i, f) in flags.iter().enumerate() {
        r.set_flag(f, i % 3 == 0);
    }
    r.set_var_array(&var, &[4, 5, 6, 7]);
    r.set_var_array(&dvar, &[]);
    let r2 = cat.add_new().unwrap();
    r2.set_var_array(&dvar, &[0.5]);

    let back = read_back(&cat);
    assert_eq!(back.len(), 2);
    let types: Vec<FieldType> = back.schema().iter().map(|i| i.field.field_type).collect();
    let expected: Vec<FieldType> = cat.schema().iter().map(|i| i.field.field_type).collect();
    assert_eq!(types, expected);
    assert_eq!(
        back.schema().find("single").unwrap().field.field_type,
        FieldType::Array(ScalarType::I16, 1)
    );

    let s = back.schema();
    let b = &back[0];
    assert_eq!(b.get(&s.find_key::<i8>("a_i8").unwrap()), -100);
    assert_eq!(b.get(&s.find_key::<u8>("a_u8").unwrap()), 250);
    assert_eq!(b.get(&s.find_key::<i16>("a_i16").unwrap()), -30_000);
    assert_eq!(b.get(&s.find_key::<u16>("a_u16").unwrap()), 65_000);
    assert_eq!(b.get(&s.find_key::<i32>("a_i32").unwrap()), i32::MIN);
    assert_eq!(b.get(&s.find_key::<u32>("a_u32").unwrap()), u32::MAX);
    assert_eq!(b.get(&s.find_key::<i64>("a_i64").unwrap()), i64::MIN + 1);
    assert_eq!(b.get(&s.find_key::<u64>("a_u64").unwrap()), u64::MAX - 3);
    assert_eq!(b.get(&s.find_key::<f32>("a_f32").unwrap()), 3.25);
    assert_eq!(b.get(&s.find_key::<f64>("a_f64").unwrap()), -1.0e300);
    assert_eq!(
        b.get_array(&s.find_key::<Array<f32>>("arr").unwrap()),
        [1.0, f32::INFINITY, -0.5]
    );
    assert_eq!(b.get_array(&s.find_key::<Array<i16>>("single").unwrap()), [7]);
    assert_eq!(b.get_str(&s.find_key::<Str>("name").unwrap()), "NGC 1234");
    for i in 0..70 {
        let f = s.find_key::<Flag>(&format!("f{i}")).unwrap();
        assert_eq!(b.get_flag(&f), i % 3 == 0, "flag f{i}");
    }
    assert_eq!(b.get_var_array(&s.find_key::<VarArray<u32>>("var").unwrap()), [4, 5, 6, 7]);
    let dvar = s.find_key::<VarArray<f64>>("dvar").unwrap();
    assert!(b.get_var_array(&dvar).is_empty());
    assert_eq!(back[1].get_var_array(&dvar), [0.5]);
}

#[test]
fn empty_catalog_keeps_schema() {
    let mut schema = Schema::new();
    schema.add_field::<f32>("x", "position", "pixel").unwrap();
    schema.add_sized_field::<Str>("label", "", "", 4).unwrap();
    let cat = Catalog::new(Table::make(&schema));
    let back = read_back(&cat);
    assert!(back.is_empty());
    assert_eq!(back.schema(), cat.schema());
    assert_eq!(back.schema().find("x").unwrap().field.doc, "position");
}

#[test]
fn aliases_and_metadata_survive() {
    let mut schema = Schema::new();
    schema.add_field::<f64>("base_PsfFlux_flux", "", "").unwrap();
    schema.aliases().set("psfFlux", "base_PsfFlux_flux");
    let cat = Catalog::new(Table::make(&schema));
    cat.table().metadata_mut().set("EXPTIME", 30.0).unwrap();
    cat.table()
        .metadata_mut()
        .set_with_comment("FILTER", "r", Some("band"))
        .unwrap();

    let back = read_back(&cat);
    assert_eq!(back.schema().aliases().get("psfFlux").as_deref(), Some("base_PsfFlux_flux"));
    assert_eq!(back.schema().find("psfFlux").unwrap().field.name, "base_PsfFlux_flux");
    let md = back.table().metadata();
    assert_eq!(md.get_float("EXPTIME"), Some(30.0));
    assert_eq!(md.get_str("FILTER"), Some("r"));
    assert!(!md.contains("NAXIS1"));
    assert!(!md.contains(TYPE_KEYWORD));
}

#[test]
fn structural_keywords_kept_without_strip() {
    let mut schema = Schema::new();
    schema.add_field::<i32>("n", "", "").unwrap();
    let cat = Catalog::new(Table::make(&schema));
    let options = ReadOptions {
        strip_metadata: false,
        ..ReadOptions::default()
    };
    let back = Catalog::read_fits_bytes(cat.write_fits_bytes().unwrap(), &options).unwrap();
    let md = back.table().metadata();
    assert_eq!(md.get_str(TYPE_KEYWORD), Some("BASE"));
    assert_eq!(md.get_int("TFIELDS"), Some(1));
}

#[test]
fn base_ids_are_reassigned_on_read() {
    let mut schema = Schema::new();
    let x = schema.add_field::<i32>("x", "", "").unwrap();
    let table = Table::make(&schema);
    table.set_id_factory_start(100);
    let mut cat = Catalog::new(table);
    cat.add_new().unwrap().set(&x, 1);
    cat.add_new().unwrap().set(&x, 2);
    assert_eq!(cat[0].id(), 100);

    let back = read_back(&cat);
    assert_eq!(back[0].id(), 1);
    assert_eq!(back[1].id(), 2);
}

#[test]
fn missing_type_keyword_reads_as_base() {
    let mut schema = Schema::new();
    let x = schema.add_field::<i16>("x", "", "").unwrap();
    let mut cat = Catalog::new(Table::make(&schema));
    cat.add_new().unwrap().set(&x, 9);
    let mut bytes = cat.write_fits_bytes().unwrap();
    // Blank out the AFW_TYPE card in the table header.
    let pos = type_card_offset(&bytes);
    bytes[pos..pos + 80].copy_from_slice(&[b' '; 80]);

    let back = Catalog::read_fits_bytes(bytes, &ReadOptions::default()).unwrap();
    assert_eq!(back.table().kind(), TableKind::Base);
    assert_eq!(back[0].get(&back.schema().find_key::<i16>("x").unwrap()), 9);
}

#[test]
fn unknown_type_keyword_is_not_found() {
    let mut schema = Schema::new();
    schema.add_field::<i16>("x", "", "").unwrap();
    let cat = Catalog::new(Table::make(&schema));
    let mut bytes = cat.write_fits_bytes().unwrap();
    let pos = type_card_offset(&bytes);
    let card = format!("{:<80}", "AFW_TYPE= 'UNKNOWN_TAG'");
    bytes[pos..pos + 80].copy_from_slice(card.as_bytes());

    let err = Catalog::read_fits_bytes(bytes, &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}

#[test]
fn append_mode_adds_catalogs() {
    let mut schema = Schema::new();
    let x = schema.add_field::<i32>("x", "", "").unwrap();
    let mut first = Catalog::new(Table::make(&schema));
    first.add_new().unwrap().set(&x, 1);
    let simple_schema = Table::make_minimal_simple_schema();
    let mut second = Catalog::new(Table::make_simple(&simple_schema).unwrap());
    second.add_new().unwrap();
    second.add_new().unwrap();
    let mut third = Catalog::new(Table::make(&schema));
    third.add_new().unwrap().set(&x, 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("multi.fits");
    first.write_fits(&path, WriteMode::Write).unwrap();
    second.write_fits(&path, "a".parse().unwrap()).unwrap();
    third.write_fits(&path, WriteMode::Append).unwrap();

    let fits = FitsFile::open(&path).unwrap();
    // primary, first, second + its archive index, third
    assert_eq!(fits.len(), 5);
    let a = Catalog::read_fits(&path, 2).unwrap();
    let b = Catalog::read_fits(&path, 3).unwrap();
    let c = Catalog::read_fits(&path, 5).unwrap();
    assert_eq!(a[0].get(&a.schema().find_key::<i32>("x").unwrap()), 1);
    assert_eq!(b.len(), 2);
    assert_eq!(b.table().kind(), TableKind::Simple);
    assert_eq!(c[0].get(&c.schema().find_key::<i32>("x").unwrap()), 3);

    first.write_fits(&path, WriteMode::Write).unwrap();
    assert_eq!(FitsFile::open(&path).unwrap().len(), 2);
}

#[test]
fn gzip_input_is_inflated() {
    let mut schema = Schema::new();
    let x = schema.add_field::<f64>("x", "", "").unwrap();
    let mut cat = Catalog::new(Table::make(&schema));
    for i in 0..40 {
        cat.add_new().unwrap().set(&x, f64::from(i) * 0.5);
    }
    let raw = cat.write_fits_bytes().unwrap();

    let mut gz = vec![0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 0xff];
    gz.extend(miniz_oxide::deflate::compress_to_vec(&raw, 6));
    // CRC32 is not checked; ISIZE is the inflated length.
    gz.extend([0, 0, 0, 0]);
    gz.extend((raw.len() as u32).to_le_bytes());

    let back = Catalog::read_fits_bytes(gz, &ReadOptions::default()).unwrap();
    assert_eq!(back.len(), 40);
    let x = back.schema().find_key::<f64>("x").unwrap();
    assert_eq!(back[39].get(&x), 19.5);
}

#[test]
fn read_catalog_reports_bad_hdu() {
    let cat = Catalog::new(Table::make(&Table::make_minimal_simple_schema()));
    let fits = FitsFile::from_bytes(cat.write_fits_bytes().unwrap()).unwrap();
    let options = ReadOptions {
        hdu: 7,
        io_flags: IoFlags::NONE,
        ..ReadOptions::default()
    };
    assert!(matches!(read_catalog(&fits, &options), Err(Error::Index { .. })));
}

#[test]
fn long_header_strings_round_trip() {
    let long_name = "a".repeat(70);
    let long_doc = format!("{} isn't short", "flux measured in a circular aperture ".repeat(4));
    let mut schema = Schema::new();
    let wide = schema.add_field::<f64>(&long_name, &long_doc, "count").unwrap();
    schema.add_field::<i32>("flux_uJy", "", "uJy").unwrap();
    let mut cat = Catalog::new(Table::make(&schema));
    cat.add_new().unwrap().set(&wide, 4.5);
    cat.schema().aliases().set("wide", long_name.as_str());
    let note = "n".repeat(150);
    cat.table().metadata_mut().set("NOTE", note.as_str()).unwrap();

    let back = read_back(&cat);
    let names: Vec<_> = back.schema().names().collect();
    assert_eq!(names, [long_name.as_str(), "flux_uJy"]);
    let item = back.schema().find("wide").unwrap();
    assert_eq!(item.field.name, long_name);
    assert_eq!(item.field.doc, long_doc);
    assert_eq!(back[0].get(&item.key::<f64>().unwrap()), 4.5);
    assert_eq!(back.table().metadata().get_str("NOTE"), Some(note.as_str()));
}

#[test]
fn non_ascii_header_text_fails_write() {
    let mut schema = Schema::new();
    schema.add_field::<f64>("flux", "", "µJy").unwrap();
    let cat = Catalog::new(Table::make(&schema));
    assert!(matches!(cat.write_fits_bytes(), Err(Error::Logic(_))));

    let mut schema = Schema::new();
    schema.add_field::<f64>("flux_µ", "", "").unwrap();
    let cat = Catalog::new(Table::make(&schema));
    assert!(matches!(cat.write_fits_bytes(), Err(Error::Logic(_))));

    let cat = Catalog::new(Table::make(&Schema::new()));
    cat.table().metadata_mut().set("OBSERVER", "Zoë").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rejected.fits");
    assert!(matches!(cat.write_fits(&path, WriteMode::Write), Err(Error::Logic(_))));
    assert!(!path.exists());
}

#[test]
fn oversized_tform_is_format_error() {
    use afw_table::fits::file::empty_primary_hdu;
    use afw_table::fits::header::{serialize_header, Card};

    let cards = vec![
        Card::new("XTENSION", "BINTABLE"),
        Card::new("BITPIX", 8i64),
        Card::new("NAXIS", 2i64),
        Card::new("NAXIS1", 8i64),
        Card::new("NAXIS2", 0i64),
        Card::new("PCOUNT", 0i64),
        Card::new("GCOUNT", 1i64),
        Card::new("TFIELDS", 1i64),
        Card::new("TTYPE1", "x"),
        Card::new("TFORM1", "4000000000000000000D"),
    ];
    let mut bytes = empty_primary_hdu();
    bytes.extend(serialize_header(&cards));
    let err = Catalog::read_fits_bytes(bytes, &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Format(_)), "{err}");
}
