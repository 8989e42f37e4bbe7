//! Pluggable catalog readers, selected by the `AFW_TYPE` header keyword.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::archive::InputArchive;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::fits::file::{FitsFile, Hdu};
use crate::fits::header::card_int;
use crate::io::{IoFlags, ReadOptions, SchemaInputMapper, ARCHIVE_HDU_KEYWORD, TYPE_KEYWORD};
use crate::metadata::Metadata;
use crate::table::{Table, TableKind};

/// Rebuilds a catalog of one table kind from a binary table HDU.
///
/// Readers are registered process-wide with
/// `inventory::submit! { &MyReader as &'static dyn FitsReader }` and looked up
/// by [`FitsReader::name`], which matches the `AFW_TYPE` keyword.
pub trait FitsReader: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Bind a table to the mapper's schema. The default makes a BASE table.
    fn make_table(
        &self,
        mapper: &mut SchemaInputMapper,
        metadata: Metadata,
        io_flags: IoFlags,
        strip_metadata: bool,
    ) -> Result<Table> {
        let _ = io_flags;
        let table = Table::make(&mapper.finalize());
        table.set_metadata(prepare_metadata(metadata, strip_metadata));
        Ok(table)
    }

    fn uses_archive(&self, io_flags: IoFlags) -> bool {
        let _ = io_flags;
        false
    }

    /// Provide the archive used to resolve object columns: the supplied one,
    /// or the one named by `AR_HDU`.
    fn setup_archive(
        &self,
        fits: &FitsFile,
        mapper: &SchemaInputMapper,
        archive: Option<Rc<InputArchive>>,
        io_flags: IoFlags,
    ) -> Result<Option<Rc<InputArchive>>> {
        if !self.uses_archive(io_flags) {
            return Ok(None);
        }
        if archive.is_some() {
            return Ok(archive);
        }
        match card_int(mapper.cards(), ARCHIVE_HDU_KEYWORD) {
            Some(n) => {
                let hdu = usize::try_from(n)
                    .map_err(|_| Error::format(format!("invalid {ARCHIVE_HDU_KEYWORD} {n}")))?;
                Ok(Some(Rc::new(InputArchive::read(fits, hdu)?)))
            }
            None => Ok(None),
        }
    }

    /// Header, archive, table, rows.
    fn read(&self, fits: &FitsFile, hdu: &Hdu, metadata: Metadata, options: &ReadOptions) -> Result<Catalog> {
        let mut mapper = SchemaInputMapper::new(&hdu.cards)?;
        let archive = self.setup_archive(fits, &mapper, options.archive.clone(), options.io_flags)?;
        let table = self.make_table(&mut mapper, metadata, options.io_flags, options.strip_metadata)?;
        let mut catalog = Catalog::new(table);
        mapper.read_rows(fits.data(hdu), &mut catalog, archive.as_deref())?;
        debug!(reader = self.name(), rows = catalog.len(), "read catalog rows");
        Ok(catalog)
    }
}

/// Header metadata as it should be attached to a table.
pub fn prepare_metadata(mut metadata: Metadata, strip: bool) -> Metadata {
    if strip {
        metadata.strip_structural();
    }
    metadata
}

/// Reader for `AFW_TYPE = 'BASE'`, also used when the keyword is absent.
#[derive(Debug, Default)]
pub struct BaseFitsReader;

impl FitsReader for BaseFitsReader {
    fn name(&self) -> &'static str {
        TableKind::Base.tag()
    }
}

/// Reader for `AFW_TYPE = 'SIMPLE'`.
#[derive(Debug, Default)]
pub struct SimpleFitsReader;

impl FitsReader for SimpleFitsReader {
    fn name(&self) -> &'static str {
        TableKind::Simple.tag()
    }

    fn make_table(
        &self,
        mapper: &mut SchemaInputMapper,
        metadata: Metadata,
        _io_flags: IoFlags,
        strip_metadata: bool,
    ) -> Result<Table> {
        let table = Table::make_simple(&mapper.finalize())?;
        table.set_metadata(prepare_metadata(metadata, strip_metadata));
        Ok(table)
    }

    fn uses_archive(&self, io_flags: IoFlags) -> bool {
        !io_flags.contains(IoFlags::NO_ARCHIVE)
    }
}

inventory::collect!(&'static dyn FitsReader);

inventory::submit! { &BaseFitsReader as &'static dyn FitsReader }
inventory::submit! { &SimpleFitsReader as &'static dyn FitsReader }

fn registry() -> &'static HashMap<&'static str, &'static dyn FitsReader> {
    static READERS: OnceLock<HashMap<&'static str, &'static dyn FitsReader>> = OnceLock::new();
    READERS.get_or_init(|| {
        let mut map = HashMap::new();
        for reader in inventory::iter::<&'static dyn FitsReader>() {
            if map.contains_key(reader.name()) {
                warn!(name = reader.name(), "duplicate FITS reader registration ignored");
                continue;
            }
            map.insert(reader.name(), *reader);
        }
        debug!(readers = map.len(), "initialized FITS reader registry");
        map
    })
}

/// The reader registered under `name`.
pub fn lookup_reader(name: &str) -> Result<&'static dyn FitsReader> {
    registry().get(name).copied().ok_or_else(|| {
        Error::not_found(format!(
            "no FITS reader named '{name}'; check the {TYPE_KEYWORD} keyword"
        ))
    })
}

/// The reader named by a header's `AFW_TYPE`, defaulting to `BASE`.
pub fn lookup(metadata: &Metadata) -> Result<&'static dyn FitsReader> {
    let name = metadata
        .get_str(TYPE_KEYWORD)
        .map(str::trim)
        .unwrap_or(TableKind::Base.tag());
    lookup_reader(name)
}

/// Names of every registered reader, sorted.
pub fn registered_readers() -> Vec<&'static str> {
    let mut names: Vec<_> = registry().keys().copied().collect();
    names.sort_unstable();
    names
}

/// Read HDU `hdu` as a BASE catalog without an archive, ignoring `AFW_TYPE`.
pub(crate) fn read_plain_catalog(fits: &FitsFile, hdu: usize) -> Result<Catalog> {
    let hdu = fits.hdu(hdu)?;
    let metadata = Metadata::from_cards(&hdu.cards);
    BaseFitsReader.read(
        fits,
        hdu,
        metadata,
        &ReadOptions {
            io_flags: IoFlags::NO_ARCHIVE,
            ..ReadOptions::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_readers_registered() {
        let names = registered_readers();
        assert!(names.contains(&"BASE"));
        assert!(names.contains(&"SIMPLE"));
    }

    #[test]
    fn lookup_defaults_to_base() {
        assert_eq!(lookup(&Metadata::new()).unwrap().name(), "BASE");
        let mut md = Metadata::new();
        md.set(TYPE_KEYWORD, "SIMPLE").unwrap();
        assert_eq!(lookup(&md).unwrap().name(), "SIMPLE");
        md.set(TYPE_KEYWORD, "UNKNOWN_TAG").unwrap();
        assert!(matches!(lookup(&md), Err(Error::NotFound(_))));
    }

    #[test]
    fn simple_reader_archive_flag() {
        assert!(SimpleFitsReader.uses_archive(IoFlags::NONE));
        assert!(!SimpleFitsReader.uses_archive(IoFlags::NO_ARCHIVE));
        assert!(!BaseFitsReader.uses_archive(IoFlags::NONE));
    }
}
