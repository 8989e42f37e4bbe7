use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use crate::error::{Error, Result};

/// Shared alias-to-target name overlay.
///
/// Clones share the same underlying map, so an alias added through one
/// schema handle is visible through every other handle of that schema.
/// [`AliasMap::deep_copy`] produces an independent map.
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    inner: Rc<RefCell<BTreeMap<String, String>>>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `alias` to `target`, replacing any previous target.
    pub fn set(&self, alias: impl Into<String>, target: impl Into<String>) {
        self.inner.borrow_mut().insert(alias.into(), target.into());
    }

    pub fn get(&self, alias: &str) -> Option<String> {
        self.inner.borrow().get(alias).cloned()
    }

    /// Remove an alias. Returns `true` if it was present.
    pub fn erase(&self, alias: &str) -> bool {
        self.inner.borrow_mut().remove(alias).is_some()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// Snapshot of all `(alias, target)` pairs, sorted by alias.
    pub fn iter(&self) -> impl Iterator<Item = (String, String)> {
        let pairs: Vec<_> = self
            .inner
            .borrow()
            .iter()
            .map(|(a, t)| (a.clone(), t.clone()))
            .collect();
        pairs.into_iter()
    }

    /// Follow aliases from `name` until a name that is not an alias.
    ///
    /// Names that are not aliases resolve to themselves.
    pub fn resolve(&self, name: &str) -> Result<String> {
        let map = self.inner.borrow();
        let mut current = name;
        let mut seen = HashSet::new();
        while let Some(target) = map.get(current) {
            if !seen.insert(current) {
                return Err(Error::logic(format!("alias cycle through '{current}'")));
            }
            current = target;
        }
        Ok(current.to_string())
    }

    /// An independent copy of the current contents.
    pub fn deep_copy(&self) -> Self {
        AliasMap {
            inner: Rc::new(RefCell::new(self.inner.borrow().clone())),
        }
    }

    /// Whether two handles share the same map.
    pub fn ptr_eq(&self, other: &AliasMap) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for AliasMap {
    fn eq(&self, other: &Self) -> bool {
        *self.inner.borrow() == *other.inner.borrow()
    }
}
