use std::fmt::Display;
use std::path::PathBuf;
use std::process;

use afw_table::fits::FitsFile;
use afw_table::io::{read_catalog, registered_readers, TYPE_KEYWORD};
use afw_table::{Array, Catalog, Element, FieldType, IoFlags, ReadOptions, Record, Result, ScalarType, SchemaItem, Str, VarArray};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Print the schema and rows of a FITS catalog")]
struct Args {
    /// Catalog file (plain or gzip-compressed FITS)
    file: PathBuf,
    /// 1-based HDU holding the catalog
    #[arg(long, default_value_t = 2)]
    hdu: usize,
    /// Maximum number of rows to print
    #[arg(long, default_value_t = 10)]
    rows: usize,
    /// Do not load the object archive
    #[arg(long)]
    no_archive: bool,
    /// List the HDUs of the file instead of reading a catalog
    #[arg(long)]
    list: bool,
}

fn scalar<T: Element + Display>(record: &Record, item: &SchemaItem) -> Result<String> {
    Ok(record.get(&item.key::<T>()?).to_string())
}

fn array<T: Element + Display>(record: &Record, item: &SchemaItem) -> Result<String> {
    let values = record.get_array(&item.key::<Array<T>>()?);
    Ok(join(&values))
}

fn var_array<T: Element + Display>(record: &Record, item: &SchemaItem) -> Result<String> {
    let values = record.get_var_array(&item.key::<VarArray<T>>()?);
    Ok(join(&values))
}

fn join<T: Display>(values: &[T]) -> String {
    let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

macro_rules! dispatch {
    ($f:ident, $ty:expr, $record:expr, $item:expr) => {
        match $ty {
            ScalarType::I8 => $f::<i8>($record, $item),
            ScalarType::U8 => $f::<u8>($record, $item),
            ScalarType::I16 => $f::<i16>($record, $item),
            ScalarType::U16 => $f::<u16>($record, $item),
            ScalarType::I32 => $f::<i32>($record, $item),
            ScalarType::U32 => $f::<u32>($record, $item),
            ScalarType::I64 => $f::<i64>($record, $item),
            ScalarType::U64 => $f::<u64>($record, $item),
            ScalarType::F32 => $f::<f32>($record, $item),
            ScalarType::F64 => $f::<f64>($record, $item),
        }
    };
}

fn format_value(record: &Record, item: &SchemaItem) -> Result<String> {
    match item.field.field_type {
        FieldType::Scalar(ty) => dispatch!(scalar, ty, record, item),
        FieldType::Array(ty, _) => dispatch!(array, ty, record, item),
        FieldType::VarArray(ty) => dispatch!(var_array, ty, record, item),
        FieldType::String(_) => Ok(format!("{:?}", record.get_str(&item.key::<Str>()?))),
        FieldType::Flag => Ok(record.get_flag(&item.key()?).to_string()),
        FieldType::Object => Ok(match record.get_object(&item.key()?) {
            Some(obj) => format!("<{}>", obj.persistence_name()),
            None => String::from("-"),
        }),
    }
}

fn format_catalog(catalog: &Catalog, max_rows: usize) -> Result<String> {
    let schema = catalog.schema();
    let mut out = String::new();
    out.push_str(&format!("Kind: {}\n", catalog.table().kind()));
    out.push_str(&format!("Rows: {}\n", catalog.len()));
    out.push_str(&format!("Record size: {} bytes\n", schema.record_size()));
    out.push_str("Fields:\n");
    for item in schema.iter() {
        let field = &item.field;
        out.push_str(&format!("  {}: {}", field.name, field.field_type));
        if !field.units.is_empty() {
            out.push_str(&format!(" [{}]", field.units));
        }
        if !field.doc.is_empty() {
            out.push_str(&format!("  {}", field.doc));
        }
        out.push('\n');
    }
    let aliases: Vec<_> = schema.aliases().iter().collect();
    if !aliases.is_empty() {
        out.push_str("Aliases:\n");
        for (alias, target) in aliases {
            out.push_str(&format!("  {alias} -> {target}\n"));
        }
    }
    if !catalog.is_empty() && max_rows > 0 {
        out.push_str("Records:\n");
        for record in catalog.iter().take(max_rows) {
            let values = schema
                .iter()
                .map(|item| Ok(format!("{}={}", item.field.name, format_value(record, item)?)))
                .collect::<Result<Vec<_>>>()?;
            out.push_str(&format!("  {}\n", values.join(" ")));
        }
        if catalog.len() > max_rows {
            out.push_str(&format!("  ... {} more\n", catalog.len() - max_rows));
        }
    }
    Ok(out)
}

fn format_hdus(fits: &FitsFile) -> String {
    let mut out = String::new();
    for (i, hdu) in fits.iter().enumerate() {
        let name = hdu.extname().unwrap_or(if i == 0 { "PRIMARY" } else { "" });
        out.push_str(&format!("HDU {}: {} ({} data bytes)", i + 1, name, hdu.data_len));
        if let Some(tag) = afw_table::fits::header::card_str(&hdu.cards, TYPE_KEYWORD) {
            out.push_str(&format!(" {TYPE_KEYWORD}={}", tag.trim()));
        }
        out.push('\n');
    }
    out
}

fn run(args: &Args) -> Result<String> {
    let fits = FitsFile::open(&args.file)?;
    if args.list {
        return Ok(format_hdus(&fits));
    }
    let options = ReadOptions {
        hdu: args.hdu,
        io_flags: if args.no_archive {
            IoFlags::NO_ARCHIVE
        } else {
            IoFlags::NONE
        },
        ..ReadOptions::default()
    };
    let catalog = read_catalog(&fits, &options)?;
    format_catalog(&catalog, args.rows)
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("tblinfo: {}: {e}", args.file.display());
            if matches!(e, afw_table::Error::NotFound(_)) {
                eprintln!("known readers: {}", registered_readers().join(", "));
            }
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afw_table::{Flag, Table, WriteMode};

    fn args(file: PathBuf) -> Args {
        Args {
            file,
            hdu: 2,
            rows: 10,
            no_archive: false,
            list: false,
        }
    }

    fn sample_file(dir: &tempfile::TempDir) -> PathBuf {
        let mut schema = Table::make_minimal_simple_schema();
        let flux = schema.add_field::<f64>("flux", "measured flux", "count").unwrap();
        let bad = schema.add_field::<Flag>("bad", "", "").unwrap();
        let name = schema.add_sized_field::<Str>("name", "", "", 8).unwrap();
        schema.aliases().set("f", "flux");
        let mut cat = Catalog::new(Table::make_simple(&schema).unwrap());
        for (i, v) in [1.5, -2.25].into_iter().enumerate() {
            let r = cat.add_new().unwrap();
            r.set(&flux, v);
            r.set_flag(&bad, i == 1);
            r.set_str(&name, "star").unwrap();
        }
        let path = dir.path().join("cat.fits");
        cat.write_fits(&path, WriteMode::Write).unwrap();
        path
    }

    #[test]
    fn prints_schema_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(&args(sample_file(&dir))).unwrap();
        assert!(out.contains("Kind: SIMPLE"));
        assert!(out.contains("Rows: 2"));
        assert!(out.contains("flux: F64 [count]  measured flux"));
        assert!(out.contains("f -> flux"));
        assert!(out.contains("id=1 flux=1.5 bad=false name=\"star\""));
        assert!(out.contains("id=2 flux=-2.25 bad=true"));
    }

    #[test]
    fn truncates_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = args(sample_file(&dir));
        a.rows = 1;
        let out = run(&a).unwrap();
        assert!(out.contains("... 1 more"));
        assert!(!out.contains("id=2"));
    }

    #[test]
    fn lists_hdus() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = args(sample_file(&dir));
        a.list = true;
        let out = run(&a).unwrap();
        assert!(out.starts_with("HDU 1: PRIMARY"));
        assert!(out.contains("HDU 2: CATALOG"));
        assert!(out.contains("AFW_TYPE=SIMPLE"));
        assert!(out.contains("HDU 3: ARCHIVE_INDEX"));
    }

    #[test]
    fn missing_file_is_error() {
        assert!(run(&args(PathBuf::from("/nonexistent/cat.fits"))).is_err());
    }
}
