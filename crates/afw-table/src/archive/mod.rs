//! Object archives: polymorphic objects referenced by records, stored as
//! extra catalogs in the same FITS file.

pub mod input;
pub mod output;
pub mod persistable;

pub use input::InputArchive;
pub use output::{OutputArchive, OutputArchiveHandle};
pub use persistable::{lookup_factory, registered_factories, Persistable, PersistableFactory};

use crate::key::{Key, Str};
use crate::schema::Schema;

/// EXTNAME of the archive index HDU.
pub const INDEX_EXTNAME: &str = "ARCHIVE_INDEX";

/// EXTNAME of each archive data HDU.
pub const DATA_EXTNAME: &str = "ARCHIVE_DATA";

/// Archive id meaning "no object".
pub const NULL_ID: i32 = 0;

/// Width of the persistence name column in the index catalog.
const NAME_WIDTH: usize = 64;

/// Keys of the archive index catalog: one row per catalog saved by an object.
pub(crate) struct IndexKeys {
    pub id: Key<i32>,
    /// Position of the data catalog holding the rows, or -1 when the object
    /// saved no catalogs.
    pub cat_archive: Key<i32>,
    /// Order of this catalog among those saved by the object.
    pub cat_persistable: Key<i32>,
    pub row0: Key<i32>,
    pub nrows: Key<i32>,
    pub name: Key<Str>,
}

impl IndexKeys {
    pub(crate) fn schema() -> crate::Result<(Schema, IndexKeys)> {
        let mut s = Schema::new();
        let keys = IndexKeys {
            id: s.add_field("id", "archive id of the object", "")?,
            cat_archive: s.add_field("cat_archive", "data catalog holding the rows", "")?,
            cat_persistable: s.add_field("cat_persistable", "catalog order within the object", "")?,
            row0: s.add_field("row0", "first row in the data catalog", "")?,
            nrows: s.add_field("nrows", "number of rows", "")?,
            name: s.add_sized_field("name", "persistence name", "", NAME_WIDTH)?,
        };
        Ok((s, keys))
    }

    /// Look the keys up by name in a schema read back from a file.
    pub(crate) fn find(schema: &Schema) -> crate::Result<IndexKeys> {
        Ok(IndexKeys {
            id: schema.find_key("id")?,
            cat_archive: schema.find_key("cat_archive")?,
            cat_persistable: schema.find_key("cat_persistable")?,
            row0: schema.find_key("row0")?,
            nrows: schema.find_key("nrows")?,
            name: schema.find_key("name")?,
        })
    }
}
