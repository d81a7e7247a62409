//! Locating nested containers and walking them.

use std::cell::RefCell;
use std::fmt;

use crate::error::{Error, Result};
use crate::store::{BucketStats, Entry, Tx};

/// A sequence of container names, outermost first.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(Vec<Vec<u8>>);

impl Path {
    /// The top level of the store.
    pub fn root() -> Self {
        Self::default()
    }

    /// A new path with `segment` appended.
    pub fn join(&self, segment: impl AsRef<[u8]>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.as_ref().to_vec());
        Path(segments)
    }

    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(Vec::as_slice)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<[u8]>> FromIterator<S> for Path {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Path(iter.into_iter().map(|s| s.as_ref().to_vec()).collect())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|s| String::from_utf8_lossy(s)))
            .finish()
    }
}

/// A resolved container within one transaction.
pub struct Container<'t, T: Tx> {
    tx: &'t T,
    bucket: T::Bucket,
}

impl<T: Tx> Clone for Container<'_, T> {
    fn clone(&self) -> Self {
        Container {
            tx: self.tx,
            bucket: self.bucket.clone(),
        }
    }
}

impl<T: Tx> fmt::Debug for Container<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Container").field(&self.bucket).finish()
    }
}

impl<'t, T: Tx> Container<'t, T> {
    pub fn root(tx: &'t T) -> Self {
        Container {
            tx,
            bucket: tx.root(),
        }
    }

    /// Walks `path` one level at a time. A missing level is created when
    /// `create` is set and reported as `None` otherwise.
    pub fn resolve(tx: &'t T, path: &Path, create: bool) -> Result<Option<Self>> {
        let mut current = Self::root(tx);
        for segment in path.segments() {
            current = if create {
                current.create_child(segment)?
            } else {
                match current.child(segment)? {
                    Some(child) => child,
                    None => return Ok(None),
                }
            };
        }
        Ok(Some(current))
    }

    pub fn child(&self, name: &[u8]) -> Result<Option<Self>> {
        let bucket = self.tx.bucket(&self.bucket, name).map_err(Error::store)?;
        Ok(bucket.map(|bucket| Container {
            tx: self.tx,
            bucket,
        }))
    }

    pub fn create_child(&self, name: &[u8]) -> Result<Self> {
        let bucket = self
            .tx
            .create_bucket(&self.bucket, name)
            .map_err(Error::store)?;
        Ok(Container {
            tx: self.tx,
            bucket,
        })
    }

    pub fn delete_child(&self, name: &[u8]) -> Result<()> {
        log::trace!("deleting nested container ({} byte name)", name.len());
        self.tx
            .delete_bucket(&self.bucket, name)
            .map_err(Error::store)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tx.get(&self.bucket, key).map_err(Error::store)
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tx.put(&self.bucket, key, value).map_err(Error::store)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.tx.delete(&self.bucket, key).map_err(Error::store)
    }

    pub fn stats(&self) -> Result<BucketStats> {
        self.tx.stats(&self.bucket).map_err(Error::store)
    }

    pub fn cursor(&self) -> Cursor<'_, 't, T> {
        Cursor {
            container: self,
            position: Position::Unset,
        }
    }
}

enum Position {
    Unset,
    At(Vec<u8>),
    BeforeFirst,
    AfterLast,
}

/// A stateful ordered cursor over one container.
///
/// Moving past either end parks the cursor there; stepping back from the
/// end lands on the last entry, stepping forward from the start on the
/// first.
pub struct Cursor<'c, 't, T: Tx> {
    container: &'c Container<'t, T>,
    position: Position,
}

impl<T: Tx> Cursor<'_, '_, T> {
    fn settle(&mut self, found: Option<Entry>, off_end: Position) -> Option<Entry> {
        self.position = match &found {
            Some(entry) => Position::At(entry.key.clone()),
            None => off_end,
        };
        found
    }

    pub fn first(&mut self) -> Result<Option<Entry>> {
        let c = self.container;
        let found = c.tx.first(&c.bucket).map_err(Error::store)?;
        Ok(self.settle(found, Position::AfterLast))
    }

    pub fn last(&mut self) -> Result<Option<Entry>> {
        let c = self.container;
        let found = c.tx.last(&c.bucket).map_err(Error::store)?;
        Ok(self.settle(found, Position::BeforeFirst))
    }

    /// Positions on the smallest key >= `key`.
    pub fn seek(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        let c = self.container;
        let found = c.tx.seek(&c.bucket, key).map_err(Error::store)?;
        Ok(self.settle(found, Position::AfterLast))
    }

    pub fn next(&mut self) -> Result<Option<Entry>> {
        let c = self.container;
        match &self.position {
            Position::At(key) => {
                let found = c.tx.next(&c.bucket, key).map_err(Error::store)?;
                Ok(self.settle(found, Position::AfterLast))
            }
            Position::Unset | Position::BeforeFirst => self.first(),
            Position::AfterLast => Ok(None),
        }
    }

    pub fn prev(&mut self) -> Result<Option<Entry>> {
        let c = self.container;
        match &self.position {
            Position::At(key) => {
                let found = c.tx.prev(&c.bucket, key).map_err(Error::store)?;
                Ok(self.settle(found, Position::BeforeFirst))
            }
            Position::Unset | Position::AfterLast => self.last(),
            Position::BeforeFirst => Ok(None),
        }
    }
}

/// A path plus the container it resolved to, cached for the lifetime of
/// the structure that owns it. Only present containers are cached.
pub(crate) struct Anchor<'t, T: Tx> {
    tx: &'t T,
    path: Path,
    cached: RefCell<Option<Container<'t, T>>>,
}

impl<'t, T: Tx> Anchor<'t, T> {
    pub(crate) fn new(tx: &'t T, path: Path) -> Self {
        Anchor {
            tx,
            path,
            cached: RefCell::new(None),
        }
    }

    /// The container if it exists, without creating anything.
    pub(crate) fn open(&self) -> Result<Option<Container<'t, T>>> {
        if let Some(container) = self.cached.borrow().as_ref() {
            return Ok(Some(container.clone()));
        }
        let found = Container::resolve(self.tx, &self.path, false)?;
        self.cached.replace(found.clone());
        Ok(found)
    }

    /// The container, creating the whole path if needed.
    pub(crate) fn create(&self) -> Result<Container<'t, T>> {
        if let Some(container) = self.cached.borrow().as_ref() {
            return Ok(container.clone());
        }
        let container = Container::resolve(self.tx, &self.path, true)?.ok_or_else(|| {
            Error::corrupted(format!("created path {:?} did not resolve", self.path))
        })?;
        log::trace!("resolved container {:?}", self.path);
        self.cached.replace(Some(container.clone()));
        Ok(container)
    }
}
