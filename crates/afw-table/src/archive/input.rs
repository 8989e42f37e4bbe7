use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::archive::{lookup_factory, IndexKeys, Persistable, DATA_EXTNAME, INDEX_EXTNAME, NULL_ID};
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::fits::file::{hdu_int, FitsFile};
use crate::io::reader::read_plain_catalog;

#[derive(Debug, Clone)]
struct IndexRow {
    cat_archive: i32,
    cat_persistable: i32,
    row0: usize,
    nrows: usize,
    name: String,
}

/// Objects loaded from archive HDUs, rebuilt on demand by id.
#[derive(Default)]
pub struct InputArchive {
    index: HashMap<i32, Vec<IndexRow>>,
    data: Vec<Catalog>,
    cache: RefCell<HashMap<i32, Rc<dyn Persistable>>>,
}

impl fmt::Debug for InputArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputArchive")
            .field("objects", &self.index.len())
            .field("catalogs", &self.data.len())
            .field("loaded", &self.cache.borrow().len())
            .finish()
    }
}

impl InputArchive {
    /// An archive holding no objects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the archive whose index is HDU `hdu` (1-based); the data HDUs
    /// follow it directly.
    pub fn read(fits: &FitsFile, hdu: usize) -> Result<Self> {
        let index_hdu = fits.hdu(hdu)?;
        if index_hdu.extname() != Some(INDEX_EXTNAME) {
            return Err(Error::format(format!(
                "HDU {hdu} is not an archive index (EXTNAME {:?})",
                index_hdu.extname()
            )));
        }
        let ncat = hdu_int(index_hdu, "AR_NCAT")
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| Error::format("archive index is missing AR_NCAT"))?;

        let index_catalog = read_plain_catalog(fits, hdu)?;
        let keys = IndexKeys::find(index_catalog.schema())
            .map_err(|e| Error::format(format!("malformed archive index: {e}")))?;
        let mut index: HashMap<i32, Vec<IndexRow>> = HashMap::new();
        for r in &index_catalog {
            let count = |v: i32| {
                usize::try_from(v).map_err(|_| Error::format("negative row count in archive index"))
            };
            index.entry(r.get(&keys.id)).or_default().push(IndexRow {
                cat_archive: r.get(&keys.cat_archive),
                cat_persistable: r.get(&keys.cat_persistable),
                row0: count(r.get(&keys.row0))?,
                nrows: count(r.get(&keys.nrows))?,
                name: r.get_str(&keys.name).trim_end().to_string(),
            });
        }
        for rows in index.values_mut() {
            rows.sort_by_key(|r| r.cat_persistable);
        }

        let mut data = Vec::with_capacity(ncat);
        for n in 0..ncat {
            let number = hdu + 1 + n;
            let data_hdu = fits.hdu(number)?;
            if data_hdu.extname() != Some(DATA_EXTNAME) || hdu_int(data_hdu, "AR_CATN") != Some(n as i64) {
                return Err(Error::format(format!(
                    "HDU {number} is not archive data catalog {n}"
                )));
            }
            data.push(read_plain_catalog(fits, number)?);
        }
        debug!(hdu, objects = index.len(), catalogs = ncat, "read archive");
        Ok(InputArchive {
            index,
            data,
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// Number of objects listed in the index.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Ids of every archived object, sorted.
    pub fn ids(&self) -> Vec<i32> {
        let mut ids: Vec<_> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Rebuild the object with `id`. Id 0 is `None`; unknown ids and
    /// unregistered factories fail with `NotFound`. Repeated calls return the
    /// same `Rc`.
    pub fn get(&self, id: i32) -> Result<Option<Rc<dyn Persistable>>> {
        if id == NULL_ID {
            return Ok(None);
        }
        if let Some(obj) = self.cache.borrow().get(&id) {
            return Ok(Some(Rc::clone(obj)));
        }
        let rows = self
            .index
            .get(&id)
            .ok_or_else(|| Error::not_found(format!("archive id {id}")))?;
        let Some(first) = rows.first() else {
            return Err(Error::not_found(format!("archive id {id}")));
        };
        let factory = lookup_factory(&first.name)?;

        let mut catalogs = Vec::with_capacity(rows.len());
        for row in rows.iter().filter(|r| r.cat_archive >= 0) {
            let source = usize::try_from(row.cat_archive)
                .ok()
                .and_then(|i| self.data.get(i))
                .ok_or_else(|| {
                    Error::format(format!("archive id {id} refers to missing catalog {}", row.cat_archive))
                })?;
            if row.row0 + row.nrows > source.len() {
                return Err(Error::format(format!(
                    "archive id {id} rows {}..{} exceed data catalog length {}",
                    row.row0,
                    row.row0 + row.nrows,
                    source.len()
                )));
            }
            catalogs.push(source.subset(row.row0, row.row0 + row.nrows, 1)?);
        }

        // Nested gets may fill the cache while the factory runs.
        let object = factory.read(self, &catalogs)?;
        debug!(id, name = %first.name, "loaded archived object");
        let object = Rc::clone(
            self.cache
                .borrow_mut()
                .entry(id)
                .or_insert(object),
        );
        Ok(Some(object))
    }
}
