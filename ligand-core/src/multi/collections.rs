use super::{Factory, Instances, Rules};
use crate::collection::{Collection, CollectionDef};
use crate::container::Path;
use crate::encoding::Encoding;
use crate::error::{Error, Result, sentinel};
use crate::iter::Page;
use crate::maintainer::Maintainer;
use crate::store::Tx;

impl<'t, T, K, V> Factory<'t, T> for CollectionDef<K, V>
where
    T: Tx + 't,
    K: Encoding + 't,
    V: Encoding + 't,
{
    type Key = K;
    type Instance = Collection<'t, T, K, V>;

    const CONFLICT: fn(&'static str) -> Error = Error::KeyExists;

    fn key_encoding(&self) -> &K {
        CollectionDef::key_encoding(self)
    }

    fn exists_label(&self) -> &'static str {
        self.key_exists_label()
    }

    fn not_found_label(&self) -> &'static str {
        CollectionDef::not_found_label(self)
    }

    fn build(
        &'t self,
        tx: &'t T,
        root: Path,
        maintainer: Box<dyn Maintainer + 't>,
    ) -> Self::Instance {
        Collection::with_maintainer(self, tx, root, maintainer)
    }
}

/// Declares a set of collections selected by an outer key.
#[derive(Debug, Clone)]
pub struct CollectionsDef<O, K, V> {
    name: String,
    outer: O,
    inner: CollectionDef<K, V>,
    unique: bool,
    exists: Option<&'static str>,
    not_found: &'static str,
}

impl<O: Encoding, K: Encoding, V: Encoding> CollectionsDef<O, K, V> {
    pub fn new(name: impl Into<String>, outer: O, inner: CollectionDef<K, V>) -> Self {
        CollectionsDef {
            name: name.into(),
            outer,
            inner,
            unique: false,
            exists: None,
            not_found: sentinel::COLLECTION,
        }
    }

    /// When set, a key may live in at most one collection.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Label of the error raised when a unique key is already held by
    /// another collection. Defaults to the inner definition's key-exists
    /// label.
    pub fn exists(mut self, label: &'static str) -> Self {
        self.exists = Some(label);
        self
    }

    /// Label of the error raised when an outer key has no collection.
    pub fn not_found(mut self, label: &'static str) -> Self {
        self.not_found = label;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bind<'t, T: Tx + 't>(&'t self, tx: &'t T, path: &Path) -> Collections<'t, T, O, K, V> {
        let rules = Rules {
            name: &self.name,
            unique: self.unique,
            exists: self.exists,
            not_found: self.not_found,
        };
        let root = path.join(format!("collections/{}", self.name));
        Collections {
            instances: Instances::new(tx, root, &self.outer, &self.inner, rules),
        }
    }
}

/// Collections bound to one transaction.
pub struct Collections<'t, T: Tx, O, K, V> {
    instances: Instances<'t, T, O, CollectionDef<K, V>>,
}

impl<'t, T, O, K, V> Collections<'t, T, O, K, V>
where
    T: Tx + 't,
    O: Encoding,
    K: Encoding + 't,
    V: Encoding + 't,
{
    /// The collection under `outer`, and whether it already exists.
    pub fn collection(&self, outer: &O::Value) -> Result<(Collection<'t, T, K, V>, bool)> {
        self.instances.get(outer)
    }

    pub fn has_collection(&self, outer: &O::Value) -> Result<bool> {
        self.instances.has(outer)
    }

    /// Whether any collection holds `key`.
    pub fn has_key(&self, key: &K::Value) -> Result<bool> {
        self.instances.has_inner(key)
    }

    pub fn delete_collection(&self, outer: &O::Value, ensure: bool) -> Result<()> {
        self.instances.delete(outer, ensure)
    }

    /// Deletes `key` from every collection holding it.
    pub fn delete_key(&self, key: &K::Value, ensure: bool) -> Result<()> {
        self.instances.delete_inner(key, ensure)
    }

    pub fn iterate_collections(
        &self,
        start: Option<&O::Value>,
        reverse: bool,
        visit: impl FnMut(O::Value, Collection<'t, T, K, V>) -> bool,
    ) -> Result<Option<O::Value>> {
        self.instances.iterate(start, reverse, visit)
    }

    pub fn iterate_collections_with_key(
        &self,
        key: &K::Value,
        start: Option<&O::Value>,
        reverse: bool,
        visit: impl FnMut(O::Value, Collection<'t, T, K, V>) -> bool,
    ) -> Result<Option<O::Value>> {
        self.instances.iterate_with(key, start, reverse, visit)
    }

    /// Walks every key held by at least one collection.
    pub fn iterate_keys(
        &self,
        start: Option<&K::Value>,
        reverse: bool,
        visit: impl FnMut(K::Value) -> bool,
    ) -> Result<Option<K::Value>> {
        self.instances.iterate_inner(start, reverse, visit)
    }

    pub fn page_collections(
        &self,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(O::Value, Collection<'t, T, K, V>)>> {
        self.instances.page(number, limit, reverse)
    }

    pub fn page_collections_with_key(
        &self,
        key: &K::Value,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(O::Value, Collection<'t, T, K, V>)>> {
        self.instances.page_with(key, number, limit, reverse)
    }

    pub fn page_keys(&self, number: i64, limit: i64, reverse: bool) -> Result<Page<K::Value>> {
        self.instances.page_inner(number, limit, reverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{BigEndian, Raw};
    use crate::store::{MemoryStore, Store};

    type Tags = CollectionsDef<BigEndian, Raw, Raw>;

    fn tags() -> Tags {
        CollectionsDef::new("tags", BigEndian, CollectionDef::new("tag", Raw, Raw))
    }

    fn s(v: &str) -> String {
        v.to_owned()
    }

    fn keys<T: Tx>(tags: &Collections<'_, T, BigEndian, Raw, Raw>) -> Vec<String> {
        let mut out = Vec::new();
        tags.iterate_keys(None, false, |k| {
            out.push(k);
            true
        })
        .unwrap();
        out
    }

    #[test]
    fn instances_are_created_on_first_write() {
        let store = MemoryStore::new();
        let def = tags();
        let tx = store.begin(true).unwrap();
        let tags = def.bind(&tx, &Path::root());

        let (first, exists) = tags.collection(&1).unwrap();
        assert!(!exists);
        assert!(!tags.has_collection(&1).unwrap());

        first.save(&s("red"), &s("#f00"), false).unwrap();
        assert!(tags.has_collection(&1).unwrap());
        assert!(tags.collection(&1).unwrap().1);
        assert!(tags.has_key(&s("red")).unwrap());
        assert!(!tags.has_key(&s("blue")).unwrap());
    }

    #[test]
    fn containment_tracks_every_owner() {
        let store = MemoryStore::new();
        let def = tags();
        let tx = store.begin(true).unwrap();
        let tags = def.bind(&tx, &Path::root());

        for outer in [1, 2, 3] {
            let (c, _) = tags.collection(&outer).unwrap();
            c.save(&s("red"), &s("x"), false).unwrap();
        }
        tags.collection(&2).unwrap().0.save(&s("blue"), &s("y"), false).unwrap();

        let mut owners = Vec::new();
        tags.iterate_collections_with_key(&s("red"), None, false, |outer, c| {
            assert!(c.has(&s("red")).unwrap());
            owners.push(outer);
            true
        })
        .unwrap();
        assert_eq!(owners, [1, 2, 3]);
        assert_eq!(keys(&tags), ["blue", "red"]);

        let page = tags.page_collections_with_key(&s("red"), 1, 2, true).unwrap();
        let outers: Vec<u64> = page.items.iter().map(|(o, _)| *o).collect();
        assert_eq!(outers, [3, 2]);
        assert_eq!(page.total_elements, 3);

        // Deleting the key from one instance keeps the others' entries.
        tags.collection(&1).unwrap().0.delete(&s("red"), true).unwrap();
        let page = tags.page_collections_with_key(&s("red"), 1, 10, false).unwrap();
        assert_eq!(page.total_elements, 2);
    }

    #[test]
    fn removing_the_last_owner_prunes_the_index() {
        let store = MemoryStore::new();
        let def = tags();
        let tx = store.begin(true).unwrap();
        let tags = def.bind(&tx, &Path::root());

        let (c, _) = tags.collection(&1).unwrap();
        c.save(&s("red"), &s("x"), false).unwrap();
        c.delete(&s("red"), true).unwrap();

        assert!(!tags.has_key(&s("red")).unwrap());
        assert!(keys(&tags).is_empty());
        // The emptied collection itself stays until deleted.
        assert!(tags.has_collection(&1).unwrap());
    }

    #[test]
    fn delete_collection_cascades_into_the_index() {
        let store = MemoryStore::new();
        let def = tags();
        let tx = store.begin(true).unwrap();
        let tags = def.bind(&tx, &Path::root());

        let (one, _) = tags.collection(&1).unwrap();
        one.save(&s("red"), &s("x"), false).unwrap();
        one.save(&s("green"), &s("x"), false).unwrap();
        let (two, _) = tags.collection(&2).unwrap();
        two.save(&s("red"), &s("x"), false).unwrap();

        tags.delete_collection(&1, true).unwrap();

        assert!(!tags.has_collection(&1).unwrap());
        assert!(!tags.has_key(&s("green")).unwrap());
        assert_eq!(keys(&tags), ["red"]);
        let page = tags.page_collections_with_key(&s("red"), 1, 10, false).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].0, 2);

        tags.delete_collection(&1, false).unwrap();
        assert!(matches!(
            tags.delete_collection(&1, true),
            Err(Error::NotFound("collection"))
        ));
    }

    #[test]
    fn delete_key_removes_it_everywhere() {
        let store = MemoryStore::new();
        let def = tags();
        let tx = store.begin(true).unwrap();
        let tags = def.bind(&tx, &Path::root());

        for outer in [1, 2] {
            let (c, _) = tags.collection(&outer).unwrap();
            c.save(&s("red"), &s("x"), false).unwrap();
            c.save(&s("blue"), &s("y"), false).unwrap();
        }

        tags.delete_key(&s("red"), true).unwrap();

        assert!(!tags.has_key(&s("red")).unwrap());
        for outer in [1, 2] {
            let (c, _) = tags.collection(&outer).unwrap();
            assert!(!c.has(&s("red")).unwrap());
            assert!(c.has(&s("blue")).unwrap());
        }
        assert!(matches!(tags.delete_key(&s("red"), true), Err(Error::NotFound("key"))));
        tags.delete_key(&s("red"), false).unwrap();
    }

    #[test]
    fn unique_keys_belong_to_one_collection() {
        let store = MemoryStore::new();
        let def = tags().unique(true).exists("tag");
        let tx = store.begin(true).unwrap();
        let tags = def.bind(&tx, &Path::root());

        let (one, _) = tags.collection(&1).unwrap();
        one.save(&s("red"), &s("x"), false).unwrap();
        one.save(&s("red"), &s("y"), true).unwrap();

        let (two, _) = tags.collection(&2).unwrap();
        assert!(matches!(
            two.save(&s("red"), &s("x"), false),
            Err(Error::KeyExists("tag"))
        ));
        assert!(!two.has(&s("red")).unwrap());
        assert!(!tags.has_collection(&2).unwrap());
        assert_eq!(tags.page_collections(1, 10, false).unwrap().total_elements, 1);
        assert_eq!(
            tags.page_collections_with_key(&s("red"), 1, 10, false)
                .unwrap()
                .total_elements,
            1
        );

        // Freed once the first owner lets go.
        one.delete(&s("red"), true).unwrap();
        two.save(&s("red"), &s("x"), false).unwrap();
    }

    #[test]
    fn pages_of_collections_and_keys() {
        let store = MemoryStore::new();
        let def = tags();
        let tx = store.begin(true).unwrap();
        let tags = def.bind(&tx, &Path::root());

        for outer in [5, 3, 9] {
            let (c, _) = tags.collection(&outer).unwrap();
            c.save(&format!("k{outer}"), &s("v"), false).unwrap();
        }

        let page = tags.page_collections(1, 2, false).unwrap();
        let outers: Vec<u64> = page.items.iter().map(|(o, _)| *o).collect();
        assert_eq!(outers, [3, 5]);
        assert_eq!(page.total_elements, 3);
        assert_eq!(page.total_pages, 2);

        let page = tags.page_keys(2, 2, false).unwrap();
        assert_eq!(page.items, ["k9"]);

        let mut seen = Vec::new();
        let next = tags
            .iterate_collections(None, true, |outer, _| {
                seen.push(outer);
                false
            })
            .unwrap();
        assert_eq!(seen, [9]);
        assert_eq!(next, Some(5));
    }
}
