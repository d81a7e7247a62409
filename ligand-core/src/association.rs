//! One-to-one mapping kept in two mirrored containers.
//!
//! `left` maps each left key to its right key and `right` maps it back.
//! Every mutation writes both sides, so after any call either both
//! directions hold a pair or neither does.

use crate::container::{Anchor, Container, Path};
use crate::encoding::{Encoding, decode, encode};
use crate::error::{Error, Result, sentinel};
use crate::iter::{self, Holds, Page};
use crate::maintainer::{Maintainer, Unindexed};
use crate::store::Tx;

const FORWARD: &str = "left";
const REVERSE: &str = "right";

#[derive(Debug, Clone)]
pub struct AssociationDef<L, R> {
    name: String,
    lefts: L,
    rights: R,
    not_found: &'static str,
    left_exists: &'static str,
    right_exists: &'static str,
}

impl<L: Encoding, R: Encoding> AssociationDef<L, R> {
    pub fn new(name: impl Into<String>, lefts: L, rights: R) -> Self {
        AssociationDef {
            name: name.into(),
            lefts,
            rights,
            not_found: sentinel::ASSOCIATION,
            left_exists: sentinel::LEFT,
            right_exists: sentinel::RIGHT,
        }
    }

    pub fn not_found(mut self, label: &'static str) -> Self {
        self.not_found = label;
        self
    }

    pub fn left_exists(mut self, label: &'static str) -> Self {
        self.left_exists = label;
        self
    }

    pub fn right_exists(mut self, label: &'static str) -> Self {
        self.right_exists = label;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn left_encoding(&self) -> &L {
        &self.lefts
    }

    pub(crate) fn not_found_label(&self) -> &'static str {
        self.not_found
    }

    pub(crate) fn left_exists_label(&self) -> &'static str {
        self.left_exists
    }

    pub fn bind<'t, T: Tx>(&'t self, tx: &'t T, path: &Path) -> Association<'t, T, L, R> {
        let root = path.join(format!("association/{}", self.name));
        Association::with_maintainer(self, tx, root, Box::new(Unindexed))
    }
}

/// An association bound to one transaction.
pub struct Association<'t, T: Tx, L, R> {
    def: &'t AssociationDef<L, R>,
    forward: Anchor<'t, T>,
    reverse: Anchor<'t, T>,
    maintainer: Box<dyn Maintainer + 't>,
}

impl<'t, T: Tx, L: Encoding, R: Encoding> Association<'t, T, L, R> {
    pub(crate) fn with_maintainer(
        def: &'t AssociationDef<L, R>,
        tx: &'t T,
        root: Path,
        maintainer: Box<dyn Maintainer + 't>,
    ) -> Self {
        Association {
            def,
            forward: Anchor::new(tx, root.join(FORWARD)),
            reverse: Anchor::new(tx, root.join(REVERSE)),
            maintainer,
        }
    }

    fn lookup(anchor: &Anchor<'t, T>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match anchor.open()? {
            Some(container) => container.get(key),
            None => Ok(None),
        }
    }

    pub fn has_left(&self, left: &L::Value) -> Result<bool> {
        let left = encode(&self.def.lefts, left, "encode left")?;
        Ok(Self::lookup(&self.forward, &left)?.is_some())
    }

    pub fn has_right(&self, right: &R::Value) -> Result<bool> {
        let right = encode(&self.def.rights, right, "encode right")?;
        Ok(Self::lookup(&self.reverse, &right)?.is_some())
    }

    /// The left key paired with `right`.
    pub fn left(&self, right: &R::Value) -> Result<L::Value> {
        let right = encode(&self.def.rights, right, "encode right")?;
        let left = Self::lookup(&self.reverse, &right)?.ok_or(Error::NotFound(self.def.not_found))?;
        decode(&self.def.lefts, &left, "decode left")
    }

    /// The right key paired with `left`.
    pub fn right(&self, left: &L::Value) -> Result<R::Value> {
        let left = encode(&self.def.lefts, left, "encode left")?;
        let right = Self::lookup(&self.forward, &left)?.ok_or(Error::NotFound(self.def.not_found))?;
        decode(&self.def.rights, &right, "decode right")
    }

    /// Pairs `left` with `right`.
    ///
    /// Setting a pair that already exists is a no-op. Otherwise the right
    /// side is checked first: a right key paired elsewhere fails with the
    /// right-exists error, then a left key paired elsewhere fails with the
    /// left-exists error.
    pub fn set(&self, left: &L::Value, right: &R::Value) -> Result<()> {
        let left = encode(&self.def.lefts, left, "encode left")?;
        let right = encode(&self.def.rights, right, "encode right")?;
        let current_right = Self::lookup(&self.forward, &left)?;
        let current_left = Self::lookup(&self.reverse, &right)?;
        if current_right.as_ref() == Some(&right) && current_left.as_ref() == Some(&left) {
            return Ok(());
        }
        if current_left.is_some() {
            return Err(Error::RightExists(self.def.right_exists));
        }
        if current_right.is_some() {
            return Err(Error::LeftExists(self.def.left_exists));
        }

        self.maintainer.admit(&left)?;

        self.forward.create()?.put(&left, &right)?;
        self.reverse.create()?.put(&right, &left)?;
        self.maintainer.inserted(&left)?;
        log::debug!(
            "association {}: set {}-byte left to {}-byte right",
            self.def.name,
            left.len(),
            right.len()
        );
        Ok(())
    }

    pub fn delete_by_left(&self, left: &L::Value, ensure: bool) -> Result<()> {
        let left = encode(&self.def.lefts, left, "encode left")?;
        if !self.delete_raw(&left)? && ensure {
            return Err(Error::NotFound(self.def.not_found));
        }
        Ok(())
    }

    pub fn delete_by_right(&self, right: &R::Value, ensure: bool) -> Result<()> {
        let right = encode(&self.def.rights, right, "encode right")?;
        match Self::lookup(&self.reverse, &right)? {
            Some(left) => {
                if !self.delete_raw(&left)? {
                    return Err(Error::corrupted(format!(
                        "association {}: right key has no forward entry",
                        self.def.name
                    )));
                }
                Ok(())
            }
            None if ensure => Err(Error::NotFound(self.def.not_found)),
            None => Ok(()),
        }
    }

    /// Removes the pair whose encoded left key is `left`, reporting whether
    /// one existed.
    pub(crate) fn delete_raw(&self, left: &[u8]) -> Result<bool> {
        let Some(forward) = self.forward.open()? else {
            return Ok(false);
        };
        let Some(right) = forward.get(left)? else {
            return Ok(false);
        };
        let reverse = self.reverse.open()?.ok_or_else(|| {
            Error::corrupted(format!("association {}: reverse side is missing", self.def.name))
        })?;
        if reverse.get(&right)?.as_deref() != Some(left) {
            return Err(Error::corrupted(format!(
                "association {}: forward entry has no matching reverse entry",
                self.def.name
            )));
        }

        forward.delete(left)?;
        reverse.delete(&right)?;
        self.maintainer.removed(left)?;
        log::debug!(
            "association {}: deleted {}-byte left",
            self.def.name,
            left.len()
        );
        Ok(true)
    }

    /// Encoded left keys currently held, in order.
    pub(crate) fn raw_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        if let Some(forward) = self.forward.open()? {
            iter::iterate(&forward, None, false, |entry| {
                keys.push(entry.key);
                Ok(true)
            })?;
        }
        Ok(keys)
    }

    /// Number of pairs.
    pub fn len(&self) -> Result<usize> {
        match self.forward.open()? {
            Some(forward) => Ok(forward.stats()?.key_n),
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Visits pairs ordered by left key. Returns the left key to resume from
    /// when `visit` stops early.
    pub fn iterate_left(
        &self,
        start: Option<&L::Value>,
        reverse: bool,
        mut visit: impl FnMut(L::Value, R::Value) -> bool,
    ) -> Result<Option<L::Value>> {
        let start = start
            .map(|left| encode(&self.def.lefts, left, "encode left"))
            .transpose()?;
        let next = walk(self.forward.open()?, start.as_deref(), reverse, |key, value| {
            Ok(visit(
                decode(&self.def.lefts, key, "decode left")?,
                decode(&self.def.rights, value, "decode right")?,
            ))
        })?;
        next.map(|key| decode(&self.def.lefts, &key, "decode left"))
            .transpose()
    }

    /// Visits pairs ordered by right key, passing `(right, left)`.
    pub fn iterate_right(
        &self,
        start: Option<&R::Value>,
        reverse: bool,
        mut visit: impl FnMut(R::Value, L::Value) -> bool,
    ) -> Result<Option<R::Value>> {
        let start = start
            .map(|right| encode(&self.def.rights, right, "encode right"))
            .transpose()?;
        let next = walk(self.reverse.open()?, start.as_deref(), reverse, |key, value| {
            Ok(visit(
                decode(&self.def.rights, key, "decode right")?,
                decode(&self.def.lefts, value, "decode left")?,
            ))
        })?;
        next.map(|key| decode(&self.def.rights, &key, "decode right"))
            .transpose()
    }

    pub fn page_left(
        &self,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(L::Value, R::Value)>> {
        let forward = self.forward.open()?;
        iter::page(forward.as_ref(), number, limit, reverse, Holds::Values, |entry| {
            let right = entry.value.ok_or_else(|| self.nested())?;
            Ok((
                decode(&self.def.lefts, &entry.key, "decode left")?,
                decode(&self.def.rights, &right, "decode right")?,
            ))
        })
    }

    pub fn page_right(
        &self,
        number: i64,
        limit: i64,
        reverse: bool,
    ) -> Result<Page<(R::Value, L::Value)>> {
        let backward = self.reverse.open()?;
        iter::page(backward.as_ref(), number, limit, reverse, Holds::Values, |entry| {
            let left = entry.value.ok_or_else(|| self.nested())?;
            Ok((
                decode(&self.def.rights, &entry.key, "decode right")?,
                decode(&self.def.lefts, &left, "decode left")?,
            ))
        })
    }

    fn nested(&self) -> Error {
        Error::corrupted(format!("association {} holds a nested container", self.def.name))
    }
}

/// Walks one side, handing key and value bytes to `visit`. Returns the key
/// to resume from.
fn walk<T: Tx>(
    side: Option<Container<'_, T>>,
    start: Option<&[u8]>,
    reverse: bool,
    mut visit: impl FnMut(&[u8], &[u8]) -> Result<bool>,
) -> Result<Option<Vec<u8>>> {
    let Some(side) = side else {
        return Ok(None);
    };
    let next = iter::iterate(&side, start, reverse, |entry| match &entry.value {
        Some(value) => visit(&entry.key, value),
        None => Err(Error::corrupted("association side holds a nested container")),
    })?;
    Ok(next.map(|entry| entry.key))
}
