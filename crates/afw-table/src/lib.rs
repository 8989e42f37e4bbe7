//! Typed columnar record catalogs with FITS binary-table persistence.
//!
//! A [`Schema`] lays out named, typed fields in a packed row; [`Table`]s own
//! row storage for one schema and mint [`Record`]s; a [`Catalog`] is an
//! ordered list of records that can be viewed column-wise and written to or
//! read from FITS files. Polymorphic objects referenced from records travel
//! through an object archive stored in extra HDUs of the same file.
//!
//! ```
//! use afw_table::{Catalog, Flag, Schema, Table};
//!
//! let mut schema = Schema::new();
//! let flux = schema.add_field::<f64>("flux", "instrumental flux", "count").unwrap();
//! let bad = schema.add_field::<Flag>("bad", "unusable measurement", "").unwrap();
//!
//! let mut catalog = Catalog::new(Table::make(&schema));
//! let r = catalog.add_new().unwrap();
//! r.set(&flux, 1.5);
//! r.set_flag(&bad, true);
//! assert_eq!(catalog[0].get(&flux), 1.5);
//! ```

pub mod alias;
pub mod archive;
pub mod catalog;
pub mod column;
pub mod error;
pub mod field;
pub mod fits;
pub mod io;
pub mod key;
pub mod metadata;
pub mod record;
pub mod schema;
mod storage;
pub mod table;

pub use alias::AliasMap;
pub use archive::{
    InputArchive, OutputArchive, OutputArchiveHandle, Persistable, PersistableFactory,
};
pub use catalog::Catalog;
pub use column::{Column, ColumnView};
pub use error::{Error, Result};
pub use field::{Element, Field, FieldType, ScalarType};
pub use fits::WriteMode;
pub use io::{FitsReader, IoFlags, ReadOptions};
pub use key::{AnyKey, Array, FieldKind, Flag, Key, Object, Str, VarArray};
pub use metadata::Metadata;
pub use record::{Record, RecordId};
pub use schema::{Schema, SchemaItem};
pub use table::{Table, TableKind, DEFAULT_BLOCK_ROWS};
