use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;

use tracing::warn;

use crate::archive::{InputArchive, OutputArchiveHandle};
use crate::catalog::Catalog;
use crate::error::{Error, Result};

/// An object that can be stored in an archive.
///
/// Implementations write themselves as one or more catalogs through the
/// handle passed to [`Persistable::write`]; a [`PersistableFactory`]
/// registered under the same name rebuilds them on read.
pub trait Persistable: Any {
    /// Name of the factory that reads this object back.
    fn persistence_name(&self) -> &str;

    fn is_persistable(&self) -> bool {
        true
    }

    /// Save this object's state. Nested objects are stored with
    /// [`OutputArchiveHandle::put`] and referenced by the returned id.
    fn write(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Rebuilds persisted objects of one persistence name.
///
/// Register implementations with
/// `inventory::submit! { &MyFactory as &'static dyn PersistableFactory }`.
pub trait PersistableFactory: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Rebuild an object from the catalogs it saved, in save order.
    fn read(&self, archive: &InputArchive, catalogs: &[Catalog]) -> Result<Rc<dyn Persistable>>;
}

inventory::collect!(&'static dyn PersistableFactory);

fn factories() -> &'static HashMap<&'static str, &'static dyn PersistableFactory> {
    static FACTORIES: OnceLock<HashMap<&'static str, &'static dyn PersistableFactory>> =
        OnceLock::new();
    FACTORIES.get_or_init(|| {
        let mut map = HashMap::new();
        for factory in inventory::iter::<&'static dyn PersistableFactory>() {
            if map.contains_key(factory.name()) {
                warn!(name = factory.name(), "duplicate persistable factory ignored");
                continue;
            }
            map.insert(factory.name(), *factory);
        }
        map
    })
}

/// The factory registered under `name`.
pub fn lookup_factory(name: &str) -> Result<&'static dyn PersistableFactory> {
    factories()
        .get(name)
        .copied()
        .ok_or_else(|| Error::not_found(format!("no persistable factory named '{name}'")))
}

/// Names of every registered factory, sorted.
pub fn registered_factories() -> Vec<&'static str> {
    let mut names: Vec<_> = factories().keys().copied().collect();
    names.sort_unstable();
    names
}
