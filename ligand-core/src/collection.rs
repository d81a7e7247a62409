use crate::container::{Anchor, Path};
use crate::encoding::{Encoding, decode, encode};
use crate::error::{Error, Result, sentinel};
use crate::iter::{self, Holds, Page};
use crate::maintainer::{Maintainer, Unindexed};
use crate::store::Tx;

/// Declares a key → value collection.
#[derive(Debug, Clone)]
pub struct CollectionDef<K, V> {
    name: String,
    keys: K,
    values: V,
    not_found: &'static str,
    key_exists: &'static str,
}

impl<K: Encoding, V: Encoding> CollectionDef<K, V> {
    pub fn new(name: impl Into<String>, keys: K, values: V) -> Self {
        CollectionDef {
            name: name.into(),
            keys,
            values,
            not_found: sentinel::KEY,
            key_exists: sentinel::KEY,
        }
    }

    /// Label of the error returned when a key is missing.
    pub fn not_found(mut self, label: &'static str) -> Self {
        self.not_found = label;
        self
    }

    /// Label of the error returned when a save would overwrite a key.
    pub fn key_exists(mut self, label: &'static str) -> Self {
        self.key_exists = label;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn key_encoding(&self) -> &K {
        &self.keys
    }

    pub(crate) fn not_found_label(&self) -> &'static str {
        self.not_found
    }

    pub(crate) fn key_exists_label(&self) -> &'static str {
        self.key_exists
    }

    /// The collection stored under `path` in this transaction.
    pub fn bind<'t, T: Tx>(&'t self, tx: &'t T, path: &Path) -> Collection<'t, T, K, V> {
        let root = path.join(format!("collection/{}", self.name));
        Collection::with_maintainer(self, tx, root, Box::new(Unindexed))
    }
}

/// A key → value collection bound to one transaction.
pub struct Collection<'t, T: Tx, K, V> {
    def: &'t CollectionDef<K, V>,
    entries: Anchor<'t, T>,
    maintainer: Box<dyn Maintainer + 't>,
}

impl<'t, T: Tx, K: Encoding, V: Encoding> Collection<'t, T, K, V> {
    pub(crate) fn with_maintainer(
        def: &'t CollectionDef<K, V>,
        tx: &'t T,
        root: Path,
        maintainer: Box<dyn Maintainer + 't>,
    ) -> Self {
        Collection {
            def,
            entries: Anchor::new(tx, root),
            maintainer,
        }
    }

    pub fn has(&self, key: &K::Value) -> Result<bool> {
        let key = encode(&self.def.keys, key, "encode key")?;
        match self.entries.open()? {
            Some(entries) => entries.contains(&key),
            None => Ok(false),
        }
    }

    pub fn get(&self, key: &K::Value) -> Result<V::Value> {
        let key = encode(&self.def.keys, key, "encode key")?;
        let found = match self.entries.open()? {
            Some(entries) => entries.get(&key)?,
            None => None,
        };
        let bytes = found.ok_or(Error::NotFound(self.def.not_found))?;
        decode(&self.def.values, &bytes, "decode value")
    }

    /// Stores `value` under `key` and reports whether a different value was
    /// replaced.
    ///
    /// When a different value exists and `overwrite` is false, nothing is
    /// written and the key-exists error is returned. Saving the value a key
    /// already holds succeeds and reports `false`.
    pub fn save(&self, key: &K::Value, value: &V::Value, overwrite: bool) -> Result<bool> {
        let key = encode(&self.def.keys, key, "encode key")?;
        let value = encode(&self.def.values, value, "encode value")?;

        let existing = match self.entries.open()? {
            Some(entries) => entries.get(&key)?,
            None => None,
        };
        let overwritten = existing.is_some_and(|existing| existing != value);
        if overwritten && !overwrite {
            return Err(Error::KeyExists(self.def.key_exists));
        }
        self.maintainer.admit(&key)?;

        self.entries.create()?.put(&key, &value)?;
        self.maintainer.inserted(&key)?;
        log::debug!(
            "collection {}: saved {}-byte key (overwritten: {overwritten})",
            self.def.name,
            key.len()
        );
        Ok(overwritten)
    }

    /// Removes `key`. A missing key is an error only when `ensure` is set.
    pub fn delete(&self, key: &K::Value, ensure: bool) -> Result<()> {
        let key = encode(&self.def.keys, key, "encode key")?;
        if !self.delete_raw(&key)? && ensure {
            return Err(Error::NotFound(self.def.not_found));
        }
        Ok(())
    }

    pub(crate) fn delete_raw(&self, key: &[u8]) -> Result<bool> {
        let Some(entries) = self.entries.open()? else {
            return Ok(false);
        };
        if !entries.contains(key)? {
            return Ok(false);
        }
        entries.delete(key)?;
        self.maintainer.removed(key)?;
        log::debug!(
            "collection {}: deleted {}-byte key",
            self.def.name,
            key.len()
        );
        Ok(true)
    }

    /// Encoded keys currently held, in order.
    pub(crate) fn raw_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        if let Some(entries) = self.entries.open()? {
            iter::iterate(&entries, None, false, |entry| {
                keys.push(entry.key);
                Ok(true)
            })?;
        }
        Ok(keys)
    }

    pub fn len(&self) -> Result<usize> {
        match self.entries.open()? {
            Some(entries) => Ok(entries.stats()?.key_n),
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Visits entries in key order (descending when `reverse`), starting at
    /// `start` if given. Returns the key to resume from when `visit` stops
    /// early.
    pub fn iterate(
        &self,
        start: Option<&K::Value>,
        reverse: bool,
        mut visit: impl FnMut(K::Value, V::Value) -> bool,
    ) -> Result<Option<K::Value>> {
        let Some(entries) = self.entries.open()? else {
            return Ok(None);
        };
        let start = start
            .map(|key| encode(&self.def.keys, key, "encode key"))
            .transpose()?;
        let next = iter::iterate(&entries, start.as_deref(), reverse, |entry| {
            let (key, value) = self.decode_entry(&entry.key, entry.value.as_deref())?;
            Ok(visit(key, value))
        })?;
        next.map(|entry| decode(&self.def.keys, &entry.key, "decode key"))
            .transpose()
    }

    pub fn page(
        &self,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(K::Value, V::Value)>> {
        let entries = self.entries.open()?;
        iter::page(entries.as_ref(), number, limit, reverse, Holds::Values, |entry| {
            self.decode_entry(&entry.key, entry.value.as_deref())
        })
    }

    fn decode_entry(&self, key: &[u8], value: Option<&[u8]>) -> Result<(K::Value, V::Value)> {
        let value = value.ok_or_else(|| {
            Error::corrupted(format!("collection {} holds a nested container", self.def.name))
        })?;
        Ok((
            decode(&self.def.keys, key, "decode key")?,
            decode(&self.def.values, value, "decode value")?,
        ))
    }
}
