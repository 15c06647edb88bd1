//! Dead property storage.
//!
//! Dead properties are kept per resource path as complete elements
//! (name, `xsi:type`, `xml:lang` and content), so that PROPFIND can
//! return them the way they were set.
use std::collections::BTreeMap;
use std::fmt::Debug;

use parking_lot::Mutex;

use crate::condition::ConditionCode;
use crate::davpath::{is_ancestor_or_self, DavPath};
use crate::xmldom::{Element, QName};

/// The dead properties of one resource.
pub type PropMap = BTreeMap<QName, Element>;

/// Storage for dead properties.
///
/// `patch_props` is a read-modify-write under the store's lock: the
/// closure gets a copy of the current map and the copy is only stored
/// if the closure returns `true`.
pub trait DavPropStore: Debug + Send + Sync {
    fn get_props(&self, path: &DavPath) -> Result<PropMap, ConditionCode>;

    fn patch_props(
        &self,
        path: &DavPath,
        patch: &mut dyn FnMut(&mut PropMap) -> bool,
    ) -> Result<(), ConditionCode>;

    /// Forget the properties of `path` and everything below it.
    fn remove_props(&self, path: &DavPath) -> Result<(), ConditionCode>;

    /// Copy the properties of `from` (and with `deep` its descendants) to `to`.
    fn copy_props(&self, from: &DavPath, to: &DavPath, deep: bool) -> Result<(), ConditionCode>;

    fn move_props(&self, from: &DavPath, to: &DavPath) -> Result<(), ConditionCode>;
}

/// In-memory property store.
#[derive(Debug, Default)]
pub struct MemPropStore {
    props: Mutex<BTreeMap<String, PropMap>>,
}

impl MemPropStore {
    pub fn new() -> MemPropStore {
        MemPropStore::default()
    }
}

// (key, properties) of `from` and, if `deep`, its descendants, rebased onto `to`.
fn subtree(
    props: &BTreeMap<String, PropMap>,
    from: &DavPath,
    to: &DavPath,
    deep: bool,
) -> Vec<(String, PropMap)> {
    props
        .iter()
        .filter(|(k, _)| {
            if deep {
                is_ancestor_or_self(from.key(), k)
            } else {
                k.as_str() == from.key()
            }
        })
        .filter_map(|(k, v)| {
            let p = DavPath::new(k).rebase(from, to)?;
            Some((p.key().to_string(), v.clone()))
        })
        .collect()
}

impl DavPropStore for MemPropStore {
    fn get_props(&self, path: &DavPath) -> Result<PropMap, ConditionCode> {
        let props = self.props.lock();
        Ok(props.get(path.key()).cloned().unwrap_or_default())
    }

    fn patch_props(
        &self,
        path: &DavPath,
        patch: &mut dyn FnMut(&mut PropMap) -> bool,
    ) -> Result<(), ConditionCode> {
        let mut props = self.props.lock();
        let mut map = props.get(path.key()).cloned().unwrap_or_default();
        if patch(&mut map) {
            trace!("memprops: {} now has {} properties", path, map.len());
            if map.is_empty() {
                props.remove(path.key());
            } else {
                props.insert(path.key().to_string(), map);
            }
        }
        Ok(())
    }

    fn remove_props(&self, path: &DavPath) -> Result<(), ConditionCode> {
        let mut props = self.props.lock();
        props.retain(|k, _| !is_ancestor_or_self(path.key(), k));
        Ok(())
    }

    fn copy_props(&self, from: &DavPath, to: &DavPath, deep: bool) -> Result<(), ConditionCode> {
        let mut props = self.props.lock();
        let copied = subtree(&props, from, to, deep);
        props.retain(|k, _| !is_ancestor_or_self(to.key(), k));
        props.extend(copied);
        Ok(())
    }

    fn move_props(&self, from: &DavPath, to: &DavPath) -> Result<(), ConditionCode> {
        let mut props = self.props.lock();
        let moved = subtree(&props, from, to, true);
        props.retain(|k, _| !is_ancestor_or_self(from.key(), k) && !is_ancestor_or_self(to.key(), k));
        props.extend(moved);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(store: &MemPropStore, path: &str, name: &str, value: &str) {
        let qname = QName::new("TEST:", name);
        let elem = Element::new(qname.clone()).with_text(value);
        store
            .patch_props(&DavPath::new(path), &mut |m| {
                m.insert(qname.clone(), elem.clone());
                true
            })
            .unwrap();
    }

    fn get(store: &MemPropStore, path: &str, name: &str) -> Option<String> {
        let props = store.get_props(&DavPath::new(path)).unwrap();
        props.get(&QName::new("TEST:", name)).map(|e| e.text())
    }

    #[test]
    fn patch_commits_only_on_true() {
        let store = MemPropStore::new();
        set(&store, "/a", "x", "1");
        store
            .patch_props(&DavPath::new("/a/"), &mut |m| {
                m.clear();
                false
            })
            .unwrap();
        assert_eq!(get(&store, "/a", "x").as_deref(), Some("1"));
    }

    #[test]
    fn copy_move_remove() {
        let store = MemPropStore::new();
        set(&store, "/a/", "x", "1");
        set(&store, "/a/b", "y", "2");
        set(&store, "/ab", "z", "3");

        store.copy_props(&DavPath::new("/a/"), &DavPath::new("/c/"), false).unwrap();
        assert_eq!(get(&store, "/c", "x").as_deref(), Some("1"));
        assert_eq!(get(&store, "/c/b", "y"), None);

        store.move_props(&DavPath::new("/a"), &DavPath::new("/d")).unwrap();
        assert_eq!(get(&store, "/d/b", "y").as_deref(), Some("2"));
        assert_eq!(get(&store, "/a", "x"), None);
        assert_eq!(get(&store, "/ab", "z").as_deref(), Some("3"));

        store.remove_props(&DavPath::new("/d")).unwrap();
        assert_eq!(get(&store, "/d", "x"), None);
        assert_eq!(get(&store, "/d/b", "y"), None);
        assert_eq!(get(&store, "/ab", "z").as_deref(), Some("3"));
    }
}
