use super::{Factory, Instances, Rules};
use crate::container::Path;
use crate::encoding::Encoding;
use crate::error::{Error, Result, sentinel};
use crate::iter::Page;
use crate::list::{List, ListDef};
use crate::maintainer::Maintainer;
use crate::store::Tx;

impl<'t, T, V, O> Factory<'t, T> for ListDef<V, O>
where
    T: Tx + 't,
    V: Encoding + 't,
    O: Encoding + 't,
{
    type Key = V;
    type Instance = List<'t, T, V, O>;

    const CONFLICT: fn(&'static str) -> Error = Error::ValueExists;

    fn key_encoding(&self) -> &V {
        self.value_encoding()
    }

    fn exists_label(&self) -> &'static str {
        self.value_exists_label()
    }

    fn not_found_label(&self) -> &'static str {
        ListDef::not_found_label(self)
    }

    fn build(
        &'t self,
        tx: &'t T,
        root: Path,
        maintainer: Box<dyn Maintainer + 't>,
    ) -> Self::Instance {
        List::with_maintainer(self, tx, root, maintainer)
    }
}

/// Declares a set of lists selected by an outer key.
#[derive(Debug, Clone)]
pub struct ListsDef<K, V, O> {
    name: String,
    outer: K,
    inner: ListDef<V, O>,
    unique: bool,
    exists: Option<&'static str>,
    not_found: &'static str,
}

impl<K: Encoding, V: Encoding, O: Encoding> ListsDef<K, V, O> {
    pub fn new(name: impl Into<String>, outer: K, inner: ListDef<V, O>) -> Self {
        ListsDef {
            name: name.into(),
            outer,
            inner,
            unique: false,
            exists: None,
            not_found: sentinel::LIST,
        }
    }

    /// When set, a value may live in at most one list.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

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

    pub fn bind<'t, T: Tx + 't>(&'t self, tx: &'t T, path: &Path) -> Lists<'t, T, K, V, O> {
        let rules = Rules {
            name: &self.name,
            unique: self.unique,
            exists: self.exists,
            not_found: self.not_found,
        };
        let root = path.join(format!("lists/{}", self.name));
        Lists {
            instances: Instances::new(tx, root, &self.outer, &self.inner, rules),
        }
    }
}

/// Lists bound to one transaction. `K` encodes the outer key, `V` the
/// values and `O` their order keys.
pub struct Lists<'t, T: Tx, K, V, O> {
    instances: Instances<'t, T, K, ListDef<V, O>>,
}

impl<'t, T, K, V, O> Lists<'t, T, K, V, O>
where
    T: Tx + 't,
    K: Encoding,
    V: Encoding + 't,
    O: Encoding + 't,
{
    pub fn list(&self, outer: &K::Value) -> Result<(List<'t, T, V, O>, bool)> {
        self.instances.get(outer)
    }

    pub fn has_list(&self, outer: &K::Value) -> Result<bool> {
        self.instances.has(outer)
    }

    pub fn has_value(&self, value: &V::Value) -> Result<bool> {
        self.instances.has_inner(value)
    }

    pub fn delete_list(&self, outer: &K::Value, ensure: bool) -> Result<()> {
        self.instances.delete(outer, ensure)
    }

    /// Removes `value` from every list holding it.
    pub fn delete_value(&self, value: &V::Value, ensure: bool) -> Result<()> {
        self.instances.delete_inner(value, ensure)
    }

    pub fn iterate_lists(
        &self,
        start: Option<&K::Value>,
        reverse: bool,
        visit: impl FnMut(K::Value, List<'t, T, V, O>) -> bool,
    ) -> Result<Option<K::Value>> {
        self.instances.iterate(start, reverse, visit)
    }

    pub fn iterate_lists_with_value(
        &self,
        value: &V::Value,
        start: Option<&K::Value>,
        reverse: bool,
        visit: impl FnMut(K::Value, List<'t, T, V, O>) -> bool,
    ) -> Result<Option<K::Value>> {
        self.instances.iterate_with(value, start, reverse, visit)
    }

    /// Walks every value held by at least one list, in value order.
    pub fn iterate_values(
        &self,
        start: Option<&V::Value>,
        reverse: bool,
        visit: impl FnMut(V::Value) -> bool,
    ) -> Result<Option<V::Value>> {
        self.instances.iterate_inner(start, reverse, visit)
    }

    pub fn page_lists(
        &self,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(K::Value, List<'t, T, V, O>)>> {
        self.instances.page(number, limit, reverse)
    }

    pub fn page_lists_with_value(
        &self,
        value: &V::Value,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(K::Value, List<'t, T, V, O>)>> {
        self.instances.page_with(value, number, limit, reverse)
    }

    pub fn page_values(&self, number: i64, limit: i64, reverse: bool) -> Result<Page<V::Value>> {
        self.instances.page_inner(number, limit, reverse)
    }
}
