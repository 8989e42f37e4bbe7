//! Object columns persisted through the archive HDUs.

use std::any::Any;
use std::rc::Rc;

use afw_table::archive::{InputArchive, OutputArchive, OutputArchiveHandle, INDEX_EXTNAME};
use afw_table::fits::FitsFile;
use afw_table::{
    Catalog, Error, IoFlags, Object, Persistable, PersistableFactory, ReadOptions, Result, Schema,
    Table,
};

/// Gaussian PSF model stored as one row of one catalog.
#[derive(Debug, PartialEq)]
struct GaussianPsf {
    sigma: f64,
    order: i32,
}

impl Persistable for GaussianPsf {
    fn persistence_name(&self) -> &str {
        "GaussianPsf"
    }

    fn write(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<()> {
        let mut schema = Schema::new();
        let sigma = schema.add_field::<f64>("sigma", "width", "pixel")?;
        let order = schema.add_field::<i32>("order", "", "")?;
        let mut catalog = handle.make_catalog(&schema);
        let r = catalog.add_new()?;
        r.set(&sigma, self.sigma);
        r.set(&order, self.order);
        handle.save_catalog(&catalog)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct GaussianPsfFactory;

impl PersistableFactory for GaussianPsfFactory {
    fn name(&self) -> &'static str {
        "GaussianPsf"
    }

    fn read(&self, _archive: &InputArchive, catalogs: &[Catalog]) -> Result<Rc<dyn Persistable>> {
        let catalog = catalogs
            .first()
            .ok_or_else(|| Error::Runtime(String::from("GaussianPsf saved no catalog")))?;
        let row = catalog.get(0)?;
        let schema = catalog.schema();
        Ok(Rc::new(GaussianPsf {
            sigma: row.get(&schema.find_key::<f64>("sigma")?),
            order: row.get(&schema.find_key::<i32>("order")?),
        }))
    }
}

inventory::submit! { &GaussianPsfFactory as &'static dyn PersistableFactory }

/// An object that saves nothing.
struct Marker;

impl Persistable for Marker {
    fn persistence_name(&self) -> &str {
        "Marker"
    }

    fn write(&self, _handle: &mut OutputArchiveHandle<'_>) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MarkerFactory;

impl PersistableFactory for MarkerFactory {
    fn name(&self) -> &'static str {
        "Marker"
    }

    fn read(&self, _archive: &InputArchive, catalogs: &[Catalog]) -> Result<Rc<dyn Persistable>> {
        assert!(catalogs.is_empty());
        Ok(Rc::new(Marker))
    }
}

inventory::submit! { &MarkerFactory as &'static dyn PersistableFactory }

/// Not registered with any factory.
struct Orphan;

impl Persistable for Orphan {
    fn persistence_name(&self) -> &str {
        "Orphan"
    }

    fn write(&self, _handle: &mut OutputArchiveHandle<'_>) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Transient;

impl Persistable for Transient {
    fn persistence_name(&self) -> &str {
        "Transient"
    }

    fn is_persistable(&self) -> bool {
        false
    }

    fn write(&self, _handle: &mut OutputArchiveHandle<'_>) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn psf_of(object: &Rc<dyn Persistable>) -> &GaussianPsf {
    object.as_any().downcast_ref::<GaussianPsf>().unwrap()
}

fn psf_catalog() -> (Catalog, afw_table::Key<Object>) {
    let mut schema = Table::make_minimal_simple_schema();
    let psf = schema.add_field::<Object>("psf", "point-spread function", "").unwrap();
    (Catalog::new(Table::make_simple(&schema).unwrap()), psf)
}

#[test]
fn shared_object_is_archived_once() {
    let (mut cat, psf) = psf_catalog();
    let shared: Rc<dyn Persistable> = Rc::new(GaussianPsf { sigma: 1.25, order: 2 });
    let other: Rc<dyn Persistable> = Rc::new(GaussianPsf { sigma: 3.0, order: 0 });
    cat.add_new().unwrap().set_object(&psf, Some(Rc::clone(&shared)));
    cat.add_new().unwrap().set_object(&psf, Some(Rc::clone(&shared)));
    cat.add_new().unwrap().set_object(&psf, None);
    cat.add_new().unwrap().set_object(&psf, Some(other));

    let bytes = cat.write_fits_bytes().unwrap();
    let fits = FitsFile::from_bytes(bytes.clone()).unwrap();
    // primary, catalog, archive index, one merged data catalog
    assert_eq!(fits.len(), 4);
    assert_eq!(fits.hdu(3).unwrap().extname(), Some(INDEX_EXTNAME));
    let data_options = ReadOptions {
        hdu: 4,
        ..ReadOptions::default()
    };
    let data = Catalog::read_fits_bytes(bytes.clone(), &data_options).unwrap();
    assert_eq!(data.len(), 2);

    let back = Catalog::read_fits_bytes(bytes, &ReadOptions::default()).unwrap();
    let psf = back.schema().find_key::<Object>("psf").unwrap();
    let a = back[0].get_object(&psf).unwrap();
    let b = back[1].get_object(&psf).unwrap();
    assert!(Rc::ptr_eq(&a, &b));
    assert_eq!(psf_of(&a), &GaussianPsf { sigma: 1.25, order: 2 });
    assert!(back[2].get_object(&psf).is_none());
    assert_eq!(psf_of(&back[3].get_object(&psf).unwrap()).sigma, 3.0);
}

#[test]
fn no_archive_flag_leaves_objects_empty() {
    let (mut cat, psf) = psf_catalog();
    let obj: Rc<dyn Persistable> = Rc::new(GaussianPsf { sigma: 2.0, order: 1 });
    cat.add_new().unwrap().set_object(&psf, Some(obj));
    let options = ReadOptions {
        io_flags: IoFlags::NO_ARCHIVE,
        ..ReadOptions::default()
    };
    let back = Catalog::read_fits_bytes(cat.write_fits_bytes().unwrap(), &options).unwrap();
    let psf = back.schema().find_key::<Object>("psf").unwrap();
    assert!(back[0].get_object(&psf).is_none());
}

#[test]
fn supplied_archive_is_used() {
    let (mut cat, psf) = psf_catalog();
    cat.add_new().unwrap().set_object(&psf, None);
    let options = ReadOptions {
        archive: Some(Rc::new(InputArchive::new())),
        ..ReadOptions::default()
    };
    let back = Catalog::read_fits_bytes(cat.write_fits_bytes().unwrap(), &options).unwrap();
    assert_eq!(back.len(), 1);
}

#[test]
fn object_without_catalogs_round_trips() {
    let (mut cat, psf) = psf_catalog();
    cat.add_new().unwrap().set_object(&psf, Some(Rc::new(Marker)));
    let back = Catalog::read_fits_bytes(cat.write_fits_bytes().unwrap(), &ReadOptions::default()).unwrap();
    let psf = back.schema().find_key::<Object>("psf").unwrap();
    let obj = back[0].get_object(&psf).unwrap();
    assert_eq!(obj.persistence_name(), "Marker");
}

#[test]
fn unregistered_factory_is_not_found() {
    let (mut cat, psf) = psf_catalog();
    cat.add_new().unwrap().set_object(&psf, Some(Rc::new(Orphan)));
    let bytes = cat.write_fits_bytes().unwrap();
    let err = Catalog::read_fits_bytes(bytes, &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}

#[test]
fn non_persistable_object_fails_write() {
    let (mut cat, psf) = psf_catalog();
    cat.add_new().unwrap().set_object(&psf, Some(Rc::new(Transient)));
    assert!(matches!(cat.write_fits_bytes(), Err(Error::Logic(_))));
}

#[test]
fn output_archive_dedups_by_allocation() {
    let mut archive = OutputArchive::new();
    let a: Rc<dyn Persistable> = Rc::new(GaussianPsf { sigma: 1.0, order: 0 });
    let b: Rc<dyn Persistable> = Rc::new(GaussianPsf { sigma: 1.0, order: 0 });
    assert_eq!(archive.put(None).unwrap(), 0);
    let id_a = archive.put(Some(&a)).unwrap();
    assert_eq!(archive.put(Some(&Rc::clone(&a))).unwrap(), id_a);
    let id_b = archive.put(Some(&b)).unwrap();
    assert_ne!(id_a, id_b);
    assert_eq!(archive.len(), 2);
    // equal schemas under one name share a data catalog
    assert_eq!(archive.catalog_count(), 1);
    assert_eq!(archive.to_hdus().unwrap().len(), 2);
}

#[test]
fn input_archive_memoizes_objects() {
    let (mut cat, psf) = psf_catalog();
    cat.add_new()
        .unwrap()
        .set_object(&psf, Some(Rc::new(GaussianPsf { sigma: 0.5, order: 4 })));
    let fits = FitsFile::from_bytes(cat.write_fits_bytes().unwrap()).unwrap();
    let archive = InputArchive::read(&fits, 3).unwrap();
    assert_eq!(archive.ids(), [1]);
    let first = archive.get(1).unwrap().unwrap();
    let again = archive.get(1).unwrap().unwrap();
    assert!(Rc::ptr_eq(&first, &again));
    assert!(archive.get(0).unwrap().is_none());
    assert!(matches!(archive.get(9), Err(Error::NotFound(_))));
    assert!(matches!(InputArchive::read(&fits, 2), Err(Error::Format(_))));
}
