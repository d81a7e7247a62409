//! Values kept in order of a mutable sort key.
//!
//! A list stores two containers: `order` maps `order ‖ value` to `value`
//! and is what iteration walks, `index` maps `value` back to its order key.
//! A value appears at most once.

use crate::container::{Anchor, Path};
use crate::encoding::{Encoding, decode, encode};
use crate::error::{Error, Result, sentinel};
use crate::iter::{self, Holds, Page};
use crate::maintainer::{Maintainer, Unindexed};
use crate::store::{Entry, Tx};

const ORDER: &str = "order";
const INDEX: &str = "index";

#[derive(Debug, Clone)]
pub struct ListDef<V, O> {
    name: String,
    values: V,
    orders: O,
    not_found: &'static str,
    value_exists: &'static str,
}

impl<V: Encoding, O: Encoding> ListDef<V, O> {
    pub fn new(name: impl Into<String>, values: V, orders: O) -> Self {
        ListDef {
            name: name.into(),
            values,
            orders,
            not_found: sentinel::VALUE,
            value_exists: sentinel::VALUE,
        }
    }

    pub fn not_found(mut self, label: &'static str) -> Self {
        self.not_found = label;
        self
    }

    /// Label used when a value is claimed by another owner of a unique
    /// [`Lists`](crate::Lists).
    pub fn value_exists(mut self, label: &'static str) -> Self {
        self.value_exists = label;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn value_encoding(&self) -> &V {
        &self.values
    }

    pub(crate) fn not_found_label(&self) -> &'static str {
        self.not_found
    }

    pub(crate) fn value_exists_label(&self) -> &'static str {
        self.value_exists
    }

    pub fn bind<'t, T: Tx>(&'t self, tx: &'t T, path: &Path) -> List<'t, T, V, O> {
        let root = path.join(format!("list/{}", self.name));
        List::with_maintainer(self, tx, root, Box::new(Unindexed))
    }
}

/// A list bound to one transaction.
pub struct List<'t, T: Tx, V, O> {
    def: &'t ListDef<V, O>,
    primary: Anchor<'t, T>,
    index: Anchor<'t, T>,
    maintainer: Box<dyn Maintainer + 't>,
}

fn composite(order: &[u8], value: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(order.len() + value.len());
    key.extend_from_slice(order);
    key.extend_from_slice(value);
    key
}

impl<'t, T: Tx, V: Encoding, O: Encoding> List<'t, T, V, O> {
    pub(crate) fn with_maintainer(
        def: &'t ListDef<V, O>,
        tx: &'t T,
        root: Path,
        maintainer: Box<dyn Maintainer + 't>,
    ) -> Self {
        List {
            def,
            primary: Anchor::new(tx, root.join(ORDER)),
            index: Anchor::new(tx, root.join(INDEX)),
            maintainer,
        }
    }

    fn order_bytes(&self, value: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.index.open()? {
            Some(index) => index.get(value),
            None => Ok(None),
        }
    }

    pub fn has(&self, value: &V::Value) -> Result<bool> {
        let value = encode(&self.def.values, value, "encode value")?;
        Ok(self.order_bytes(&value)?.is_some())
    }

    /// The order key `value` is currently sorted by.
    pub fn order_of(&self, value: &V::Value) -> Result<O::Value> {
        let value = encode(&self.def.values, value, "encode value")?;
        let order = self
            .order_bytes(&value)?
            .ok_or(Error::NotFound(self.def.not_found))?;
        decode(&self.def.orders, &order, "decode order")
    }

    /// Inserts `value` at `order`, or moves it there if already present.
    pub fn add(&self, value: &V::Value, order: &O::Value) -> Result<()> {
        let value = encode(&self.def.values, value, "encode value")?;
        let order = encode(&self.def.orders, order, "encode order")?;
        let stale = match self.order_bytes(&value)? {
            Some(previous) => {
                let stale = composite(&previous, &value);
                match self.primary.open()? {
                    Some(primary) if primary.contains(&stale)? => Some(stale),
                    _ => {
                        return Err(Error::corrupted(format!(
                            "list {}: indexed value has no ordered entry",
                            self.def.name
                        )));
                    }
                }
            }
            None => None,
        };
        self.maintainer.admit(&value)?;

        let primary = self.primary.create()?;
        if let Some(stale) = stale {
            primary.delete(&stale)?;
        }
        primary.put(&composite(&order, &value), &value)?;
        self.index.create()?.put(&value, &order)?;
        self.maintainer.inserted(&value)?;
        log::debug!(
            "list {}: added {}-byte value at {}-byte order",
            self.def.name,
            value.len(),
            order.len()
        );
        Ok(())
    }

    pub fn remove(&self, value: &V::Value, ensure: bool) -> Result<()> {
        let value = encode(&self.def.values, value, "encode value")?;
        if !self.delete_raw(&value)? && ensure {
            return Err(Error::NotFound(self.def.not_found));
        }
        Ok(())
    }

    pub(crate) fn delete_raw(&self, value: &[u8]) -> Result<bool> {
        let Some(order) = self.order_bytes(value)? else {
            return Ok(false);
        };
        let key = composite(&order, value);
        let primary = match self.primary.open()? {
            Some(primary) if primary.contains(&key)? => primary,
            _ => {
                return Err(Error::corrupted(format!(
                    "list {}: indexed value has no ordered entry",
                    self.def.name
                )));
            }
        };
        primary.delete(&key)?;
        if let Some(index) = self.index.open()? {
            index.delete(value)?;
        }
        self.maintainer.removed(value)?;
        log::debug!("list {}: removed {}-byte value", self.def.name, value.len());
        Ok(true)
    }

    /// Encoded values currently held, in value order.
    pub(crate) fn raw_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        if let Some(index) = self.index.open()? {
            iter::iterate(&index, None, false, |entry| {
                keys.push(entry.key);
                Ok(true)
            })?;
        }
        Ok(keys)
    }

    /// Number of values.
    pub fn size(&self) -> Result<usize> {
        match self.index.open()? {
            Some(index) => Ok(index.stats()?.key_n),
            None => Ok(0),
        }
    }

    /// Splits a primary entry into its order and value bytes.
    fn split(&self, entry: Entry) -> Result<(Vec<u8>, Vec<u8>)> {
        let value = entry.value.ok_or_else(|| {
            Error::corrupted(format!("list {} holds a nested container", self.def.name))
        })?;
        let order = entry
            .key
            .strip_suffix(value.as_slice())
            .ok_or_else(|| {
                Error::corrupted(format!(
                    "list {}: ordered key does not end with its value",
                    self.def.name
                ))
            })?
            .to_vec();
        Ok((order, value))
    }

    fn decode_pair(&self, order: &[u8], value: &[u8]) -> Result<(O::Value, V::Value)> {
        Ok((
            decode(&self.def.orders, order, "decode order")?,
            decode(&self.def.values, value, "decode value")?,
        ))
    }

    /// Walks the primary container from the composite key `start`, passing
    /// raw order and value bytes. Returns the split entry to resume from.
    fn walk(
        &self,
        start: Option<&[u8]>,
        reverse: bool,
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<bool>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(primary) = self.primary.open()? else {
            return Ok(None);
        };
        let next = iter::iterate(&primary, start, reverse, |entry| {
            let (order, value) = self.split(entry)?;
            visit(&order, &value)
        })?;
        next.map(|entry| self.split(entry)).transpose()
    }

    /// Visits `(order, value)` pairs by ascending order key (descending when
    /// `reverse`), starting at the pair `start`. Returns the pair to resume
    /// from when `visit` stops early.
    pub fn iterate(
        &self,
        start: Option<(&O::Value, &V::Value)>,
        reverse: bool,
        mut visit: impl FnMut(O::Value, V::Value) -> bool,
    ) -> Result<Option<(O::Value, V::Value)>> {
        let start = match start {
            Some((order, value)) => Some(composite(
                &encode(&self.def.orders, order, "encode order")?,
                &encode(&self.def.values, value, "encode value")?,
            )),
            None => None,
        };
        let next = self.walk(start.as_deref(), reverse, |order, value| {
            let (order, value) = self.decode_pair(order, value)?;
            Ok(visit(order, value))
        })?;
        next.map(|(order, value)| self.decode_pair(&order, &value))
            .transpose()
    }

    /// Visits values by order key, starting at the value `start`, which
    /// must be in the list. Returns the value to resume from.
    pub fn iterate_values(
        &self,
        start: Option<&V::Value>,
        reverse: bool,
        mut visit: impl FnMut(V::Value) -> bool,
    ) -> Result<Option<V::Value>> {
        let start = match start {
            Some(value) => {
                let value = encode(&self.def.values, value, "encode value")?;
                let order = self
                    .order_bytes(&value)?
                    .ok_or(Error::NotFound(self.def.not_found))?;
                Some(composite(&order, &value))
            }
            None => None,
        };
        let next = self.walk(start.as_deref(), reverse, |_, value| {
            Ok(visit(decode(&self.def.values, value, "decode value")?))
        })?;
        next.map(|(_, value)| decode(&self.def.values, &value, "decode value"))
            .transpose()
    }

    pub fn page(
        &self,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(O::Value, V::Value)>> {
        let primary = self.primary.open()?;
        iter::page(primary.as_ref(), number, limit, reverse, Holds::Values, |entry| {
            let (order, value) = self.split(entry)?;
            self.decode_pair(&order, &value)
        })
    }

    pub fn page_values(&self, number: i64, limit: i64, reverse: bool) -> Result<Page<V::Value>> {
        let primary = self.primary.open()?;
        iter::page(primary.as_ref(), number, limit, reverse, Holds::Values, |entry| {
            let (_, value) = self.split(entry)?;
            decode(&self.def.values, &value, "decode value")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::encoding::{BigEndian, Raw};
    use crate::store::{MemoryStore, Store};

    fn queue() -> ListDef<Raw, BigEndian> {
        ListDef::new("queue", Raw, BigEndian)
    }

    fn s(v: &str) -> String {
        v.to_owned()
    }

    fn values<T: Tx>(list: &List<'_, T, Raw, BigEndian>) -> Vec<String> {
        let mut out = Vec::new();
        list.iterate_values(None, false, |v| {
            out.push(v);
            true
        })
        .unwrap();
        out
    }

    #[test]
    fn add_orders_by_order_key() {
        let store = MemoryStore::new();
        let def = queue();
        let tx = store.begin(true).unwrap();
        let queue = def.bind(&tx, &Path::root());

        queue.add(&s("late"), &30).unwrap();
        queue.add(&s("early"), &10).unwrap();
        queue.add(&s("middle"), &20).unwrap();

        assert_eq!(values(&queue), ["early", "middle", "late"]);
        assert_eq!(queue.size().unwrap(), 3);
        assert_eq!(queue.order_of(&s("middle")).unwrap(), 20);
        assert!(queue.has(&s("late")).unwrap());
    }

    #[test]
    fn re_adding_moves_the_value() {
        let store = MemoryStore::new();
        let def = queue();
        let tx = store.begin(true).unwrap();
        let queue = def.bind(&tx, &Path::root());

        queue.add(&s("a"), &1).unwrap();
        queue.add(&s("b"), &2).unwrap();
        queue.add(&s("a"), &3).unwrap();

        assert_eq!(values(&queue), ["b", "a"]);
        assert_eq!(queue.size().unwrap(), 2);
        assert_eq!(queue.page(1, 10, false).unwrap().total_elements, 2);
    }

    #[test]
    fn equal_order_keys_fall_back_to_value_order() {
        let store = MemoryStore::new();
        let def = queue();
        let tx = store.begin(true).unwrap();
        let queue = def.bind(&tx, &Path::root());

        for v in ["c", "a", "b"] {
            queue.add(&s(v), &7).unwrap();
        }
        assert_eq!(values(&queue), ["a", "b", "c"]);
    }

    #[test]
    fn remove_and_missing_values() {
        let store = MemoryStore::new();
        let def = queue().not_found("job");
        let tx = store.begin(true).unwrap();
        let queue = def.bind(&tx, &Path::root());
        queue.add(&s("a"), &1).unwrap();

        queue.remove(&s("a"), true).unwrap();
        assert!(!queue.has(&s("a")).unwrap());
        assert_eq!(queue.size().unwrap(), 0);
        assert!(queue.page_values(1, 10, false).unwrap().items.is_empty());

        queue.remove(&s("a"), false).unwrap();
        assert!(matches!(queue.remove(&s("a"), true), Err(Error::NotFound("job"))));
        assert!(matches!(queue.order_of(&s("a")), Err(Error::NotFound("job"))));
    }

    #[test]
    fn missing_ordered_entry_is_corruption() {
        let store = MemoryStore::new();
        let def = queue();
        let tx = store.begin(true).unwrap();
        let queue = def.bind(&tx, &Path::root());
        queue.add(&s("a"), &1).unwrap();

        let primary = Container::resolve(&tx, &Path::root().join("list/queue").join("order"), false)
            .unwrap()
            .unwrap();
        primary.delete(&composite(&1u64.to_be_bytes(), b"a")).unwrap();

        assert!(matches!(queue.add(&s("a"), &2), Err(Error::Corrupted(_))));
        assert!(matches!(queue.remove(&s("a"), true), Err(Error::Corrupted(_))));
    }

    #[test]
    fn iterate_resumes_from_pairs_and_values() {
        let store = MemoryStore::new();
        let def = queue();
        let tx = store.begin(true).unwrap();
        let queue = def.bind(&tx, &Path::root());
        for (v, o) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            queue.add(&s(v), &o).unwrap();
        }

        let mut seen = Vec::new();
        let next = queue
            .iterate(None, false, |o, v| {
                seen.push((o, v));
                seen.len() < 2
            })
            .unwrap();
        assert_eq!(seen, vec![(1, s("a")), (2, s("b"))]);
        let (order, value) = next.unwrap();
        assert_eq!((order, value.as_str()), (3, "c"));

        let mut rest = Vec::new();
        queue
            .iterate(Some((&order, &value)), false, |_, v| {
                rest.push(v);
                true
            })
            .unwrap();
        assert_eq!(rest, ["c", "d"]);

        let mut backwards = Vec::new();
        let next = queue
            .iterate_values(Some(&s("c")), true, |v| {
                backwards.push(v);
                backwards.len() < 2
            })
            .unwrap();
        assert_eq!(backwards, ["c", "b"]);
        assert_eq!(next.as_deref(), Some("a"));

        assert!(matches!(
            queue.iterate_values(Some(&s("zz")), false, |_| true),
            Err(Error::NotFound("value"))
        ));
    }

    #[test]
    fn pages_follow_order() {
        let store = MemoryStore::new();
        let def = queue();
        let tx = store.begin(true).unwrap();
        let queue = def.bind(&tx, &Path::root());
        for (v, o) in [("x", 3), ("y", 1), ("z", 2)] {
            queue.add(&s(v), &o).unwrap();
        }

        let page = queue.page(1, 2, false).unwrap();
        assert_eq!(page.items, vec![(1, s("y")), (2, s("z"))]);
        assert_eq!(page.total_pages, 2);

        let page = queue.page_values(1, 2, true).unwrap();
        assert_eq!(page.items, ["x", "z"]);
    }
}
