//! Catalog persistence to FITS binary tables.

pub mod mapper;
pub mod reader;
pub mod writer;

use std::ops::BitOr;
use std::rc::Rc;

use tracing::debug;

use crate::archive::InputArchive;
use crate::catalog::Catalog;
use crate::error::Result;
use crate::fits::file::FitsFile;
use crate::metadata::Metadata;

pub use mapper::SchemaInputMapper;
pub use reader::{lookup, lookup_reader, registered_readers, BaseFitsReader, FitsReader, SimpleFitsReader};
pub use writer::SchemaOutputMapper;

/// Header keyword naming the reader that rebuilds a catalog.
pub const TYPE_KEYWORD: &str = "AFW_TYPE";

/// Header keyword holding the 1-based number of the archive index HDU.
pub const ARCHIVE_HDU_KEYWORD: &str = "AR_HDU";

/// Reader behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IoFlags(u32);

impl IoFlags {
    pub const NONE: IoFlags = IoFlags(0);
    /// Skip loading the object archive; object slots stay empty.
    pub const NO_ARCHIVE: IoFlags = IoFlags(1);

    pub fn contains(self, other: IoFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for IoFlags {
    type Output = IoFlags;

    fn bitor(self, rhs: IoFlags) -> IoFlags {
        IoFlags(self.0 | rhs.0)
    }
}

/// Options for reading a catalog.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// 1-based HDU number; 2 is the first extension.
    pub hdu: usize,
    pub io_flags: IoFlags,
    /// Remove structural keywords from the table metadata.
    pub strip_metadata: bool,
    /// Use this archive instead of reading one from the file.
    pub archive: Option<Rc<InputArchive>>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            hdu: 2,
            io_flags: IoFlags::NONE,
            strip_metadata: true,
            archive: None,
        }
    }
}

/// Read a catalog from an already parsed file, dispatching on `AFW_TYPE`.
pub fn read_catalog(fits: &FitsFile, options: &ReadOptions) -> Result<Catalog> {
    let hdu = fits.hdu(options.hdu)?;
    let metadata = Metadata::from_cards(&hdu.cards);
    let reader = lookup(&metadata)?;
    debug!(reader = reader.name(), hdu = options.hdu, "reading catalog");
    reader.read(fits, hdu, metadata, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = IoFlags::NONE | IoFlags::NO_ARCHIVE;
        assert!(flags.contains(IoFlags::NO_ARCHIVE));
        assert!(!IoFlags::NONE.contains(IoFlags::NO_ARCHIVE));
        assert!(IoFlags::NONE.contains(IoFlags::NONE));
    }

    #[test]
    fn read_options_defaults() {
        let opts = ReadOptions::default();
        assert_eq!(opts.hdu, 2);
        assert!(opts.strip_metadata);
        assert!(opts.archive.is_none());
    }
}
