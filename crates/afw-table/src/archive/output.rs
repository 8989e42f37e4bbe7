use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::archive::{IndexKeys, Persistable, DATA_EXTNAME, INDEX_EXTNAME, NULL_ID};
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::fits::header::Card;
use crate::io::writer::table_hdu;
use crate::schema::Schema;
use crate::table::Table;

struct IndexRow {
    id: i32,
    cat_archive: i32,
    cat_persistable: i32,
    row0: i32,
    nrows: i32,
    name: String,
}

struct DataCatalog {
    name: String,
    catalog: Catalog,
}

/// Collects objects during one write, assigning each distinct object an id.
///
/// Identity is the object's `Rc` allocation: putting two clones of one `Rc`
/// yields the same id and stores the object once.
#[derive(Default)]
pub struct OutputArchive {
    ids: HashMap<*const (), i32>,
    /// Keeps every stored object alive so its address is not reused.
    objects: Vec<Rc<dyn Persistable>>,
    index: Vec<IndexRow>,
    data: Vec<DataCatalog>,
}

impl OutputArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object and return its id; `None` maps to 0.
    ///
    /// Fails with `Logic` for objects that report they are not persistable.
    pub fn put(&mut self, object: Option<&Rc<dyn Persistable>>) -> Result<i32> {
        let Some(object) = object else {
            return Ok(NULL_ID);
        };
        let ptr = Rc::as_ptr(object) as *const ();
        if let Some(&id) = self.ids.get(&ptr) {
            return Ok(id);
        }
        if !object.is_persistable() {
            return Err(Error::logic(format!(
                "object '{}' is not persistable",
                object.persistence_name()
            )));
        }
        let id = i32::try_from(self.objects.len() + 1)
            .map_err(|_| Error::logic("too many archived objects"))?;
        self.ids.insert(ptr, id);
        self.objects.push(Rc::clone(object));

        let name = object.persistence_name().to_string();
        let mut handle = OutputArchiveHandle {
            archive: self,
            id,
            name: name.clone(),
            saved: 0,
        };
        object.write(&mut handle)?;
        if handle.saved == 0 {
            self.index.push(IndexRow {
                id,
                cat_archive: -1,
                cat_persistable: 0,
                row0: 0,
                nrows: 0,
                name: name.clone(),
            });
        }
        debug!(id, name = %name, "archived object");
        Ok(id)
    }

    /// Number of distinct objects stored.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of merged data catalogs.
    pub fn catalog_count(&self) -> usize {
        self.data.len()
    }

    fn index_catalog(&self) -> Result<Catalog> {
        let (schema, keys) = IndexKeys::schema()?;
        let table = Table::make(&schema);
        table.preallocate(self.index.len());
        let mut catalog = Catalog::new(table);
        for row in &self.index {
            let r = catalog.add_new()?;
            r.set(&keys.id, row.id);
            r.set(&keys.cat_archive, row.cat_archive);
            r.set(&keys.cat_persistable, row.cat_persistable);
            r.set(&keys.row0, row.row0);
            r.set(&keys.nrows, row.nrows);
            r.set_str(&keys.name, &row.name)?;
        }
        Ok(catalog)
    }

    /// Serialize the index HDU followed by every data HDU.
    pub fn to_hdus(&self) -> Result<Vec<Vec<u8>>> {
        let mut hdus = Vec::with_capacity(self.data.len() + 1);
        let index_cards = vec![
            Card::new("EXTNAME", INDEX_EXTNAME),
            Card::new("AR_NCAT", self.data.len() as i64).with_comment("number of data catalogs"),
        ];
        hdus.push(table_hdu(&self.index_catalog()?, None, &index_cards)?);
        for (n, data) in self.data.iter().enumerate() {
            let cards = vec![
                Card::new("EXTNAME", DATA_EXTNAME),
                Card::new("AR_CATN", n as i64).with_comment("data catalog number"),
                Card::new("AR_NAME", data.name.as_str()),
            ];
            hdus.push(table_hdu(&data.catalog, None, &cards)?);
        }
        debug!(
            objects = self.objects.len(),
            catalogs = self.data.len(),
            "serialized archive"
        );
        Ok(hdus)
    }
}

/// Write access handed to [`Persistable::write`] for one object.
pub struct OutputArchiveHandle<'a> {
    archive: &'a mut OutputArchive,
    id: i32,
    name: String,
    saved: i32,
}

impl OutputArchiveHandle<'_> {
    /// Id of the object being written.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// An empty catalog to fill and pass to [`save_catalog`](Self::save_catalog).
    pub fn make_catalog(&self, schema: &Schema) -> Catalog {
        Catalog::new(Table::make(schema))
    }

    /// Append a catalog's rows to the archive under this object.
    ///
    /// Rows are merged into one data catalog per (persistence name, schema).
    pub fn save_catalog(&mut self, catalog: &Catalog) -> Result<()> {
        let archive = &mut *self.archive;
        let position = archive
            .data
            .iter()
            .position(|d| d.name == self.name && d.catalog.schema() == catalog.schema());
        let position = match position {
            Some(p) => p,
            None => {
                archive.data.push(DataCatalog {
                    name: self.name.clone(),
                    catalog: Catalog::new(Table::make(&catalog.schema().copy())),
                });
                archive.data.len() - 1
            }
        };
        let data = &mut archive.data[position].catalog;
        let row0 = data.len();
        data.extend(catalog, true)?;
        let to_i32 = |n: usize| i32::try_from(n).map_err(|_| Error::logic("archive catalog too large"));
        archive.index.push(IndexRow {
            id: self.id,
            cat_archive: to_i32(position)?,
            cat_persistable: self.saved,
            row0: to_i32(row0)?,
            nrows: to_i32(catalog.len())?,
            name: self.name.clone(),
        });
        self.saved += 1;
        Ok(())
    }

    /// Store a nested object and return its id.
    pub fn put(&mut self, object: Option<&Rc<dyn Persistable>>) -> Result<i32> {
        self.archive.put(object)
    }
}
