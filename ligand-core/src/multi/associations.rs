use super::{Factory, Instances, Rules};
use crate::association::{Association, AssociationDef};
use crate::container::Path;
use crate::encoding::Encoding;
use crate::error::{Error, Result, sentinel};
use crate::iter::Page;
use crate::maintainer::Maintainer;
use crate::store::Tx;

// Left keys are the inner keys of an association.
impl<'t, T, L, R> Factory<'t, T> for AssociationDef<L, R>
where
    T: Tx + 't,
    L: Encoding + 't,
    R: Encoding + 't,
{
    type Key = L;
    type Instance = Association<'t, T, L, R>;

    const CONFLICT: fn(&'static str) -> Error = Error::LeftExists;

    fn key_encoding(&self) -> &L {
        self.left_encoding()
    }

    fn exists_label(&self) -> &'static str {
        self.left_exists_label()
    }

    fn not_found_label(&self) -> &'static str {
        AssociationDef::not_found_label(self)
    }

    fn build(
        &'t self,
        tx: &'t T,
        root: Path,
        maintainer: Box<dyn Maintainer + 't>,
    ) -> Self::Instance {
        Association::with_maintainer(self, tx, root, maintainer)
    }
}

/// Declares a set of associations selected by an outer key.
#[derive(Debug, Clone)]
pub struct AssociationsDef<O, L, R> {
    name: String,
    outer: O,
    inner: AssociationDef<L, R>,
    unique: bool,
    exists: Option<&'static str>,
    not_found: &'static str,
}

impl<O: Encoding, L: Encoding, R: Encoding> AssociationsDef<O, L, R> {
    pub fn new(name: impl Into<String>, outer: O, inner: AssociationDef<L, R>) -> Self {
        AssociationsDef {
            name: name.into(),
            outer,
            inner,
            unique: false,
            exists: None,
            not_found: sentinel::ASSOCIATION,
        }
    }

    /// When set, a left key may live in at most one association.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Label of the left-exists error raised for a left key held by another
    /// association.
    pub fn exists(mut self, label: &'static str) -> Self {
        self.exists = Some(label);
        self
    }

    pub fn not_found(mut self, label: &'static str) -> Self {
        self.not_found = label;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bind<'t, T: Tx + 't>(&'t self, tx: &'t T, path: &Path) -> Associations<'t, T, O, L, R> {
        let rules = Rules {
            name: &self.name,
            unique: self.unique,
            exists: self.exists,
            not_found: self.not_found,
        };
        let root = path.join(format!("associations/{}", self.name));
        Associations {
            instances: Instances::new(tx, root, &self.outer, &self.inner, rules),
        }
    }
}

/// Associations bound to one transaction.
pub struct Associations<'t, T: Tx, O, L, R> {
    instances: Instances<'t, T, O, AssociationDef<L, R>>,
}

impl<'t, T, O, L, R> Associations<'t, T, O, L, R>
where
    T: Tx + 't,
    O: Encoding,
    L: Encoding + 't,
    R: Encoding + 't,
{
    pub fn association(&self, outer: &O::Value) -> Result<(Association<'t, T, L, R>, bool)> {
        self.instances.get(outer)
    }

    pub fn has_association(&self, outer: &O::Value) -> Result<bool> {
        self.instances.has(outer)
    }

    pub fn has_left(&self, left: &L::Value) -> Result<bool> {
        self.instances.has_inner(left)
    }

    pub fn delete_association(&self, outer: &O::Value, ensure: bool) -> Result<()> {
        self.instances.delete(outer, ensure)
    }

    /// Unpairs `left` in every association holding it.
    pub fn delete_left(&self, left: &L::Value, ensure: bool) -> Result<()> {
        self.instances.delete_inner(left, ensure)
    }

    pub fn iterate_associations(
        &self,
        start: Option<&O::Value>,
        reverse: bool,
        visit: impl FnMut(O::Value, Association<'t, T, L, R>) -> bool,
    ) -> Result<Option<O::Value>> {
        self.instances.iterate(start, reverse, visit)
    }

    pub fn iterate_associations_with_left(
        &self,
        left: &L::Value,
        start: Option<&O::Value>,
        reverse: bool,
        visit: impl FnMut(O::Value, Association<'t, T, L, R>) -> bool,
    ) -> Result<Option<O::Value>> {
        self.instances.iterate_with(left, start, reverse, visit)
    }

    pub fn iterate_lefts(
        &self,
        start: Option<&L::Value>,
        reverse: bool,
        visit: impl FnMut(L::Value) -> bool,
    ) -> Result<Option<L::Value>> {
        self.instances.iterate_inner(start, reverse, visit)
    }

    pub fn page_associations(
        &self,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(O::Value, Association<'t, T, L, R>)>> {
        self.instances.page(number, limit, reverse)
    }

    pub fn page_associations_with_left(
        &self,
        left: &L::Value,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(O::Value, Association<'t, T, L, R>)>> {
        self.instances.page_with(left, number, limit, reverse)
    }

    pub fn page_lefts(&self, number: i64, limit: i64, reverse: bool) -> Result<Page<L::Value>> {
        self.instances.page_inner(number, limit, reverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{BigEndian, Raw};
    use crate::store::{MemoryStore, Store};

    fn handles() -> AssociationsDef<Raw, Raw, BigEndian> {
        AssociationsDef::new(
            "handles",
            Raw,
            AssociationDef::new("handle", Raw, BigEndian).left_exists("handle"),
        )
    }

    fn s(v: &str) -> String {
        v.to_owned()
    }

    #[test]
    fn unique_rejects_a_left_under_a_second_outer_key() {
        let store = MemoryStore::new();
        let def = handles().unique(true);
        let tx = store.begin(true).unwrap();
        let handles = def.bind(&tx, &Path::root());

        let (github, _) = handles.association(&s("github")).unwrap();
        github.set(&s("ada"), &1).unwrap();
        // The same pair again is fine.
        github.set(&s("ada"), &1).unwrap();

        let (gitlab, _) = handles.association(&s("gitlab")).unwrap();
        assert!(matches!(
            gitlab.set(&s("ada"), &2),
            Err(Error::LeftExists("handle"))
        ));
        assert!(!gitlab.has_left(&s("ada")).unwrap());
        assert!(!gitlab.has_right(&2).unwrap());
        assert!(!handles.has_association(&s("gitlab")).unwrap());
        assert_eq!(handles.page_associations(1, 10, false).unwrap().total_elements, 1);
    }

    #[test]
    fn exists_label_overrides_the_inner_one() {
        let store = MemoryStore::new();
        let def = handles().unique(true).exists("account");
        let tx = store.begin(true).unwrap();
        let handles = def.bind(&tx, &Path::root());

        handles.association(&s("a")).unwrap().0.set(&s("x"), &1).unwrap();
        let (b, _) = handles.association(&s("b")).unwrap();
        assert!(matches!(b.set(&s("x"), &1), Err(Error::LeftExists("account"))));
    }

    #[test]
    fn delete_left_unpairs_everywhere() {
        let store = MemoryStore::new();
        let def = handles();
        let tx = store.begin(true).unwrap();
        let handles = def.bind(&tx, &Path::root());

        for (outer, n) in [("a", 1), ("b", 2)] {
            let (assoc, _) = handles.association(&s(outer)).unwrap();
            assoc.set(&s("ada"), &n).unwrap();
            assoc.set(&s("bob"), &(n + 10)).unwrap();
        }

        handles.delete_left(&s("ada"), true).unwrap();

        assert!(!handles.has_left(&s("ada")).unwrap());
        for (outer, n) in [("a", 1), ("b", 2)] {
            let (assoc, _) = handles.association(&s(outer)).unwrap();
            assert!(!assoc.has_left(&s("ada")).unwrap());
            assert!(!assoc.has_right(&n).unwrap());
            assert_eq!(assoc.right(&s("bob")).unwrap(), n + 10);
        }
        assert!(matches!(
            handles.delete_left(&s("ada"), true),
            Err(Error::NotFound("association"))
        ));
    }

    #[test]
    fn deleting_by_right_updates_containment() {
        let store = MemoryStore::new();
        let def = handles();
        let tx = store.begin(true).unwrap();
        let handles = def.bind(&tx, &Path::root());

        let (assoc, _) = handles.association(&s("a")).unwrap();
        assoc.set(&s("ada"), &1).unwrap();
        assoc.delete_by_right(&1, true).unwrap();

        assert!(!handles.has_left(&s("ada")).unwrap());
    }

    #[test]
    fn delete_association_prunes_sole_owners() {
        let store = MemoryStore::new();
        let def = handles();
        let tx = store.begin(true).unwrap();
        let handles = def.bind(&tx, &Path::root());

        let (a, _) = handles.association(&s("a")).unwrap();
        a.set(&s("ada"), &1).unwrap();
        a.set(&s("bob"), &2).unwrap();
        let (b, _) = handles.association(&s("b")).unwrap();
        b.set(&s("bob"), &3).unwrap();

        handles.delete_association(&s("a"), true).unwrap();

        assert!(!handles.has_association(&s("a")).unwrap());
        let mut lefts = Vec::new();
        handles
            .iterate_lefts(None, false, |l| {
                lefts.push(l);
                true
            })
            .unwrap();
        assert_eq!(lefts, ["bob"]);

        let mut owners = Vec::new();
        handles
            .iterate_associations_with_left(&s("bob"), None, false, |outer, assoc| {
                assert_eq!(assoc.right(&s("bob")).unwrap(), 3);
                owners.push(outer);
                true
            })
            .unwrap();
        assert_eq!(owners, ["b"]);
    }

    #[test]
    fn pages() {
        let store = MemoryStore::new();
        let def = handles();
        let tx = store.begin(true).unwrap();
        let handles = def.bind(&tx, &Path::root());

        for (outer, left) in [("x", "p"), ("y", "q"), ("z", "p")] {
            handles.association(&s(outer)).unwrap().0.set(&s(left), &1).unwrap();
        }

        let page = handles.page_associations(1, 10, true).unwrap();
        let outers: Vec<&str> = page.items.iter().map(|(o, _)| o.as_str()).collect();
        assert_eq!(outers, ["z", "y", "x"]);

        let page = handles.page_associations_with_left(&s("p"), 1, 1, false).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].0, "x");
        assert_eq!(page.total_pages, 2);

        let page = handles.page_lefts(1, 10, false).unwrap();
        assert_eq!(page.items, ["p", "q"]);
        assert_eq!(page.total_elements, 2);

        let mut seen = Vec::new();
        handles
            .iterate_associations(Some(&s("y")), false, |outer, _| {
                seen.push(outer);
                true
            })
            .unwrap();
        assert_eq!(seen, ["y", "z"]);
    }
}
