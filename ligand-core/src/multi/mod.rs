//! Sets of independently keyed structures sharing one namespace.
//!
//! Each outer key selects an inner [`Collection`], [`Association`] or
//! [`List`] stored under `instances/<outer>`. A containment index under
//! `containment/<inner>/<outer>` records which instances hold each inner
//! key, so an inner key can be found, kept unique across instances, or
//! deleted everywhere at once.
//!
//! The inner structure is built with a [`Membership`] maintainer and knows
//! nothing else about its owner.

mod associations;
mod collections;
mod lists;

pub use associations::{Associations, AssociationsDef};
pub use collections::{Collections, CollectionsDef};
pub use lists::{Lists, ListsDef};

use crate::association::Association;
use crate::collection::Collection;
use crate::container::{Anchor, Container, Path};
use crate::encoding::{Encoding, decode, encode};
use crate::error::{Error, Result};
use crate::iter::{self, Holds, Page};
use crate::list::List;
use crate::maintainer::{Maintainer, Unindexed};
use crate::store::Tx;

const INSTANCES: &str = "instances";
const CONTAINMENT: &str = "containment";

/// Raw access an owner needs to the keys of an inner structure.
pub(crate) trait Members {
    /// Encoded inner keys, in order.
    fn member_keys(&self) -> Result<Vec<Vec<u8>>>;

    /// Removes one encoded inner key, reporting whether it was present.
    fn remove_member(&self, key: &[u8]) -> Result<bool>;
}

impl<T: Tx, K: Encoding, V: Encoding> Members for Collection<'_, T, K, V> {
    fn member_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.raw_keys()
    }

    fn remove_member(&self, key: &[u8]) -> Result<bool> {
        self.delete_raw(key)
    }
}

impl<T: Tx, L: Encoding, R: Encoding> Members for Association<'_, T, L, R> {
    fn member_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.raw_keys()
    }

    fn remove_member(&self, key: &[u8]) -> Result<bool> {
        self.delete_raw(key)
    }
}

impl<T: Tx, V: Encoding, O: Encoding> Members for List<'_, T, V, O> {
    fn member_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.raw_keys()
    }

    fn remove_member(&self, key: &[u8]) -> Result<bool> {
        self.delete_raw(key)
    }
}

/// A structure definition that can be instantiated under an outer key.
pub(crate) trait Factory<'t, T: Tx> {
    /// Encoding of the inner keys tracked by the containment index.
    type Key: Encoding;
    type Instance: Members;

    /// Error for an inner key already owned by another instance.
    const CONFLICT: fn(&'static str) -> Error;

    fn key_encoding(&self) -> &Self::Key;

    fn exists_label(&self) -> &'static str;

    fn not_found_label(&self) -> &'static str;

    fn build(
        &'t self,
        tx: &'t T,
        root: Path,
        maintainer: Box<dyn Maintainer + 't>,
    ) -> Self::Instance;
}

type InnerKey<'t, T, D> = <<D as Factory<'t, T>>::Key as Encoding>::Value;

/// Settings shared by every inner instance of one definition.
#[derive(Clone, Copy)]
pub(crate) struct Rules<'t> {
    pub(crate) name: &'t str,
    pub(crate) unique: bool,
    pub(crate) exists: Option<&'static str>,
    pub(crate) not_found: &'static str,
}

#[derive(Clone, Copy)]
struct Conflict {
    make: fn(&'static str) -> Error,
    label: &'static str,
}

impl Conflict {
    fn error(self) -> Error {
        (self.make)(self.label)
    }
}

/// Keeps the containment index in step with one inner instance.
pub(crate) struct Membership<'t, T: Tx> {
    name: &'t str,
    containment: Anchor<'t, T>,
    outer: Vec<u8>,
    unique: Option<Conflict>,
}

impl<T: Tx> Maintainer for Membership<'_, T> {
    fn admit(&self, key: &[u8]) -> Result<()> {
        let Some(conflict) = self.unique else {
            return Ok(());
        };
        if let Some(owners) = owners_of(&self.containment, key)? {
            let held = owners.stats()?.key_n;
            if held > 1 || (held == 1 && !owners.contains(&self.outer)?) {
                return Err(conflict.error());
            }
        }
        Ok(())
    }

    fn inserted(&self, key: &[u8]) -> Result<()> {
        let owners = self.containment.create()?.create_child(key)?;
        owners.put(&self.outer, b"")
    }

    fn removed(&self, key: &[u8]) -> Result<()> {
        let root = self.containment.open()?.ok_or_else(|| {
            Error::corrupted(format!("{}: containment index is missing", self.name))
        })?;
        release(&root, key, &self.outer, self.name)
    }
}

fn owners_of<'t, T: Tx>(
    containment: &Anchor<'t, T>,
    inner: &[u8],
) -> Result<Option<Container<'t, T>>> {
    match containment.open()? {
        Some(root) => root.child(inner),
        None => Ok(None),
    }
}

/// Drops `outer` from the owners of `inner`, removing the whole node when
/// `outer` was the last owner.
fn release<T: Tx>(root: &Container<'_, T>, inner: &[u8], outer: &[u8], name: &str) -> Result<()> {
    let owners = root.child(inner)?.ok_or_else(|| {
        Error::corrupted(format!("{name}: inner key is not in the containment index"))
    })?;
    if !owners.contains(outer)? {
        return Err(Error::corrupted(format!(
            "{name}: containment index does not list the owning instance"
        )));
    }
    // Count before deleting.
    if owners.stats()?.key_n <= 1 {
        root.delete_child(inner)
    } else {
        owners.delete(outer)
    }
}

/// The shared engine behind [`Collections`], [`Associations`] and [`Lists`].
pub(crate) struct Instances<'t, T: Tx, O, D> {
    tx: &'t T,
    outer: &'t O,
    inner: &'t D,
    rules: Rules<'t>,
    root: Path,
    instances: Anchor<'t, T>,
    containment: Anchor<'t, T>,
}

impl<'t, T, O, D> Instances<'t, T, O, D>
where
    T: Tx + 't,
    O: Encoding,
    D: Factory<'t, T>,
{
    pub(crate) fn new(tx: &'t T, root: Path, outer: &'t O, inner: &'t D, rules: Rules<'t>) -> Self {
        Instances {
            tx,
            outer,
            inner,
            rules,
            instances: Anchor::new(tx, root.join(INSTANCES)),
            containment: Anchor::new(tx, root.join(CONTAINMENT)),
            root,
        }
    }

    fn conflict(&self) -> Conflict {
        Conflict {
            make: D::CONFLICT,
            label: self.rules.exists.unwrap_or_else(|| self.inner.exists_label()),
        }
    }

    fn instance_path(&self, outer: &[u8]) -> Path {
        self.root.join(INSTANCES).join(outer)
    }

    /// An inner instance that keeps the containment index up to date.
    fn open(&self, outer: Vec<u8>) -> D::Instance {
        let path = self.instance_path(&outer);
        let membership = Membership {
            name: self.rules.name,
            containment: Anchor::new(self.tx, self.root.join(CONTAINMENT)),
            outer,
            unique: self.rules.unique.then(|| self.conflict()),
        };
        self.inner.build(self.tx, path, Box::new(membership))
    }

    fn encode_outer(&self, outer: &O::Value) -> Result<Vec<u8>> {
        encode(self.outer, outer, "encode outer key")
    }

    fn decode_outer(&self, outer: &[u8]) -> Result<O::Value> {
        decode(self.outer, outer, "decode outer key")
    }

    fn encode_inner(&self, inner: &InnerKey<'t, T, D>) -> Result<Vec<u8>> {
        encode(self.inner.key_encoding(), inner, "encode inner key")
    }

    fn decode_inner(&self, inner: &[u8]) -> Result<InnerKey<'t, T, D>> {
        decode(self.inner.key_encoding(), inner, "decode inner key")
    }

    fn has_raw(&self, outer: &[u8]) -> Result<bool> {
        match self.instances.open()? {
            Some(instances) => Ok(instances.child(outer)?.is_some()),
            None => Ok(false),
        }
    }

    /// The instance under `outer` and whether it already exists. The
    /// instance's storage is created by its first write.
    pub(crate) fn get(&self, outer: &O::Value) -> Result<(D::Instance, bool)> {
        let outer = self.encode_outer(outer)?;
        let exists = self.has_raw(&outer)?;
        Ok((self.open(outer), exists))
    }

    pub(crate) fn has(&self, outer: &O::Value) -> Result<bool> {
        self.has_raw(&self.encode_outer(outer)?)
    }

    /// Whether any instance holds `inner`.
    pub(crate) fn has_inner(&self, inner: &InnerKey<'t, T, D>) -> Result<bool> {
        let inner = self.encode_inner(inner)?;
        Ok(owners_of(&self.containment, &inner)?.is_some())
    }

    /// Deletes the instance under `outer` and its entries in the
    /// containment index.
    pub(crate) fn delete(&self, outer: &O::Value, ensure: bool) -> Result<()> {
        let outer = self.encode_outer(outer)?;
        let instances = match self.instances.open()? {
            Some(instances) if instances.child(&outer)?.is_some() => instances,
            _ if ensure => return Err(Error::NotFound(self.rules.not_found)),
            _ => return Ok(()),
        };

        let instance = self
            .inner
            .build(self.tx, self.instance_path(&outer), Box::new(Unindexed));
        let keys = instance.member_keys()?;
        if !keys.is_empty() {
            let root = self.containment.open()?.ok_or_else(|| {
                Error::corrupted(format!("{}: containment index is missing", self.rules.name))
            })?;
            for key in &keys {
                release(&root, key, &outer, self.rules.name)?;
            }
        }
        instances.delete_child(&outer)?;
        log::debug!(
            "{}: deleted instance with {} inner keys",
            self.rules.name,
            keys.len()
        );
        Ok(())
    }

    /// Removes `inner` from every instance holding it.
    pub(crate) fn delete_inner(&self, inner: &InnerKey<'t, T, D>, ensure: bool) -> Result<()> {
        let inner = self.encode_inner(inner)?;
        let Some(owners) = owners_of(&self.containment, &inner)? else {
            if ensure {
                return Err(Error::NotFound(self.inner.not_found_label()));
            }
            return Ok(());
        };

        let mut outers = Vec::new();
        iter::iterate(&owners, None, false, |entry| {
            outers.push(entry.key);
            Ok(true)
        })?;
        for outer in &outers {
            let instance = self
                .inner
                .build(self.tx, self.instance_path(outer), Box::new(Unindexed));
            if !instance.remove_member(&inner)? {
                return Err(Error::corrupted(format!(
                    "{}: containment index lists an instance that lacks the key",
                    self.rules.name
                )));
            }
        }
        if let Some(root) = self.containment.open()? {
            root.delete_child(&inner)?;
        }
        log::debug!(
            "{}: removed {}-byte inner key from {} instances",
            self.rules.name,
            inner.len(),
            outers.len()
        );
        Ok(())
    }

    /// Walks a container whose keys are encoded outer keys.
    fn walk_outers(
        &self,
        container: Option<Container<'t, T>>,
        start: Option<&O::Value>,
        reverse: bool,
        mut visit: impl FnMut(O::Value, D::Instance) -> bool,
    ) -> Result<Option<O::Value>> {
        let Some(container) = container else {
            return Ok(None);
        };
        let start = start.map(|outer| self.encode_outer(outer)).transpose()?;
        let next = iter::iterate(&container, start.as_deref(), reverse, |entry| {
            let outer = self.decode_outer(&entry.key)?;
            Ok(visit(outer, self.open(entry.key)))
        })?;
        next.map(|entry| self.decode_outer(&entry.key)).transpose()
    }

    pub(crate) fn iterate(
        &self,
        start: Option<&O::Value>,
        reverse: bool,
        visit: impl FnMut(O::Value, D::Instance) -> bool,
    ) -> Result<Option<O::Value>> {
        self.walk_outers(self.instances.open()?, start, reverse, visit)
    }

    /// Walks the instances holding `inner`.
    pub(crate) fn iterate_with(
        &self,
        inner: &InnerKey<'t, T, D>,
        start: Option<&O::Value>,
        reverse: bool,
        visit: impl FnMut(O::Value, D::Instance) -> bool,
    ) -> Result<Option<O::Value>> {
        let inner = self.encode_inner(inner)?;
        self.walk_outers(owners_of(&self.containment, &inner)?, start, reverse, visit)
    }

    /// Walks every inner key held by at least one instance.
    pub(crate) fn iterate_inner(
        &self,
        start: Option<&InnerKey<'t, T, D>>,
        reverse: bool,
        mut visit: impl FnMut(InnerKey<'t, T, D>) -> bool,
    ) -> Result<Option<InnerKey<'t, T, D>>> {
        let Some(root) = self.containment.open()? else {
            return Ok(None);
        };
        let start = start.map(|inner| self.encode_inner(inner)).transpose()?;
        let next = iter::iterate(&root, start.as_deref(), reverse, |entry| {
            Ok(visit(self.decode_inner(&entry.key)?))
        })?;
        next.map(|entry| self.decode_inner(&entry.key)).transpose()
    }

    pub(crate) fn page(
        &self,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(O::Value, D::Instance)>> {
        let instances = self.instances.open()?;
        iter::page(instances.as_ref(), number, limit, reverse, Holds::Containers, |entry| {
            Ok((self.decode_outer(&entry.key)?, self.open(entry.key)))
        })
    }

    pub(crate) fn page_with(
        &self,
        inner: &InnerKey<'t, T, D>,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(O::Value, D::Instance)>> {
        let inner = self.encode_inner(inner)?;
        let owners = owners_of(&self.containment, &inner)?;
        iter::page(owners.as_ref(), number, limit, reverse, Holds::Values, |entry| {
            Ok((self.decode_outer(&entry.key)?, self.open(entry.key)))
        })
    }

    pub(crate) fn page_inner(
        &self,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<InnerKey<'t, T, D>>> {
        let root = self.containment.open()?;
        iter::page(root.as_ref(), number, limit, reverse, Holds::Containers, |entry| {
            self.decode_inner(&entry.key)
        })
    }
}
