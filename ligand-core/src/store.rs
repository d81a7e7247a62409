use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use crate::error::{Error, Result};

/// One position of an ordered container: a plain value, or a nested
/// container when `value` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl Entry {
    pub fn is_bucket(&self) -> bool {
        self.value.is_none()
    }
}

/// Container introspection.
///
/// `key_n` counts plain values held directly by the container. `bucket_n`
/// counts the container itself plus its direct nested containers, so a
/// container holding nothing but nested containers has `bucket_n - 1`
/// children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketStats {
    pub key_n: usize,
    pub bucket_n: usize,
}

/// The capabilities a storage engine transaction offers to this crate.
///
/// Containers ("buckets") are ordered maps from byte keys to byte values or
/// nested buckets. Stores operate on raw bytes; encodings and structure are
/// handled by higher layers. All methods take `&self` so a transaction can
/// be shared by every structure bound to it.
pub trait Tx {
    type Error: std::error::Error + Send + Sync + 'static;
    type Bucket: Clone + fmt::Debug;

    fn writable(&self) -> bool;

    /// The top level, which holds the named top-level buckets.
    fn root(&self) -> Self::Bucket;

    /// Opens a nested bucket, or `None` if it does not exist.
    fn bucket(
        &self,
        parent: &Self::Bucket,
        name: &[u8],
    ) -> Result<Option<Self::Bucket>, Self::Error>;

    /// Opens a nested bucket, creating it first if needed.
    fn create_bucket(
        &self,
        parent: &Self::Bucket,
        name: &[u8],
    ) -> Result<Self::Bucket, Self::Error>;

    /// Deletes a nested bucket and everything below it. Deleting a missing
    /// bucket does nothing.
    fn delete_bucket(&self, parent: &Self::Bucket, name: &[u8]) -> Result<(), Self::Error>;

    fn get(&self, bucket: &Self::Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, Self::Error>;

    fn put(&self, bucket: &Self::Bucket, key: &[u8], value: &[u8]) -> Result<(), Self::Error>;

    fn delete(&self, bucket: &Self::Bucket, key: &[u8]) -> Result<(), Self::Error>;

    fn first(&self, bucket: &Self::Bucket) -> Result<Option<Entry>, Self::Error>;

    fn last(&self, bucket: &Self::Bucket) -> Result<Option<Entry>, Self::Error>;

    /// The smallest entry whose key is >= `key`.
    fn seek(&self, bucket: &Self::Bucket, key: &[u8]) -> Result<Option<Entry>, Self::Error>;

    /// The smallest entry whose key is > `key`.
    fn next(&self, bucket: &Self::Bucket, key: &[u8]) -> Result<Option<Entry>, Self::Error>;

    /// The largest entry whose key is < `key`.
    fn prev(&self, bucket: &Self::Bucket, key: &[u8]) -> Result<Option<Entry>, Self::Error>;

    fn stats(&self, bucket: &Self::Bucket) -> Result<BucketStats, Self::Error>;

    fn commit(self) -> Result<(), Self::Error>
    where
        Self: Sized;

    fn rollback(self) -> Result<(), Self::Error>
    where
        Self: Sized;
}

/// A storage engine that hands out transactions.
pub trait Store {
    type Error: std::error::Error + Send + Sync + 'static;
    type Tx<'s>: Tx<Error = Self::Error>
    where
        Self: 's;

    fn begin(&self, writable: bool) -> Result<Self::Tx<'_>, Self::Error>;

    /// Runs `f` in a read-write transaction, committing if it returns `Ok`
    /// and rolling back otherwise.
    fn update<'s, R>(&'s self, f: impl FnOnce(&Self::Tx<'s>) -> Result<R>) -> Result<R> {
        let tx = self.begin(true).map_err(Error::store)?;
        match f(&tx) {
            Ok(out) => {
                tx.commit().map_err(Error::store)?;
                Ok(out)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    log::warn!("rollback after failed update: {rollback}");
                }
                Err(err)
            }
        }
    }

    /// Runs `f` in a read-only transaction.
    fn view<'s, R>(&'s self, f: impl FnOnce(&Self::Tx<'s>) -> Result<R>) -> Result<R> {
        let tx = self.begin(false).map_err(Error::store)?;
        let out = f(&tx);
        tx.rollback().map_err(Error::store)?;
        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("transaction is read-only")]
    NotWritable,
    #[error("key holds a bucket where a value was expected, or the reverse")]
    IncompatibleValue,
    #[error("bucket no longer exists")]
    BucketNotFound,
}

type Tree = BTreeMap<Vec<u8>, Node>;

#[derive(Debug, Clone)]
enum Node {
    Value(Vec<u8>),
    Bucket(Tree),
}

fn entry((key, node): (&Vec<u8>, &Node)) -> Entry {
    Entry {
        key: key.clone(),
        value: match node {
            Node::Value(value) => Some(value.clone()),
            Node::Bucket(_) => None,
        },
    }
}

/// An in-memory store backed by nested BTreeMaps.
///
/// Useful for testing and as a reference implementation. Each transaction
/// works on its own snapshot; a read-write transaction holds the single
/// writer lock until it ends and publishes its snapshot on commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Tree>,
    writer: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    type Error = MemoryError;
    type Tx<'s> = MemoryTx<'s>;

    fn begin(&self, writable: bool) -> Result<MemoryTx<'_>, MemoryError> {
        let writer = writable.then(|| self.writer.lock().unwrap_or_else(PoisonError::into_inner));
        let tree = self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(MemoryTx {
            store: self,
            tree: RefCell::new(tree),
            writer,
        })
    }
}

/// A transaction over a [`MemoryStore`] snapshot.
pub struct MemoryTx<'s> {
    store: &'s MemoryStore,
    tree: RefCell<Tree>,
    writer: Option<MutexGuard<'s, ()>>,
}

impl fmt::Debug for MemoryTx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTx")
            .field("writable", &self.writer.is_some())
            .finish()
    }
}

fn subtree<'a>(tree: &'a Tree, path: &[Vec<u8>]) -> Result<&'a Tree, MemoryError> {
    path.iter().try_fold(tree, |tree, name| match tree.get(name) {
        Some(Node::Bucket(child)) => Ok(child),
        _ => Err(MemoryError::BucketNotFound),
    })
}

fn subtree_mut<'a>(tree: &'a mut Tree, path: &[Vec<u8>]) -> Result<&'a mut Tree, MemoryError> {
    let mut tree = tree;
    for name in path {
        tree = match tree.get_mut(name) {
            Some(Node::Bucket(child)) => child,
            _ => return Err(MemoryError::BucketNotFound),
        };
    }
    Ok(tree)
}

impl MemoryTx<'_> {
    fn ensure_writable(&self) -> Result<(), MemoryError> {
        if self.writer.is_some() {
            Ok(())
        } else {
            Err(MemoryError::NotWritable)
        }
    }

    fn read<R>(
        &self,
        bucket: &[Vec<u8>],
        f: impl FnOnce(&Tree) -> R,
    ) -> Result<R, MemoryError> {
        let tree = self.tree.borrow();
        Ok(f(subtree(&tree, bucket)?))
    }

    fn write<R>(
        &self,
        bucket: &[Vec<u8>],
        f: impl FnOnce(&mut Tree) -> Result<R, MemoryError>,
    ) -> Result<R, MemoryError> {
        self.ensure_writable()?;
        let mut tree = self.tree.borrow_mut();
        f(subtree_mut(&mut tree, bucket)?)
    }
}

fn child_path(parent: &[Vec<u8>], name: &[u8]) -> Vec<Vec<u8>> {
    let mut path = parent.to_vec();
    path.push(name.to_vec());
    path
}

impl Tx for MemoryTx<'_> {
    type Error = MemoryError;
    type Bucket = Vec<Vec<u8>>;

    fn writable(&self) -> bool {
        self.writer.is_some()
    }

    fn root(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn bucket(
        &self,
        parent: &Vec<Vec<u8>>,
        name: &[u8],
    ) -> Result<Option<Vec<Vec<u8>>>, MemoryError> {
        let exists = self.read(parent, |tree| matches!(tree.get(name), Some(Node::Bucket(_))))?;
        Ok(exists.then(|| child_path(parent, name)))
    }

    fn create_bucket(
        &self,
        parent: &Vec<Vec<u8>>,
        name: &[u8],
    ) -> Result<Vec<Vec<u8>>, MemoryError> {
        self.write(parent, |tree| {
            match tree
                .entry(name.to_vec())
                .or_insert_with(|| Node::Bucket(Tree::new()))
            {
                Node::Bucket(_) => Ok(()),
                Node::Value(_) => Err(MemoryError::IncompatibleValue),
            }
        })?;
        Ok(child_path(parent, name))
    }

    fn delete_bucket(&self, parent: &Vec<Vec<u8>>, name: &[u8]) -> Result<(), MemoryError> {
        self.write(parent, |tree| match tree.get(name) {
            Some(Node::Bucket(_)) => {
                tree.remove(name);
                Ok(())
            }
            Some(Node::Value(_)) => Err(MemoryError::IncompatibleValue),
            None => Ok(()),
        })
    }

    fn get(&self, bucket: &Vec<Vec<u8>>, key: &[u8]) -> Result<Option<Vec<u8>>, MemoryError> {
        self.read(bucket, |tree| match tree.get(key) {
            Some(Node::Value(value)) => Some(value.clone()),
            _ => None,
        })
    }

    fn put(&self, bucket: &Vec<Vec<u8>>, key: &[u8], value: &[u8]) -> Result<(), MemoryError> {
        self.write(bucket, |tree| {
            if let Some(Node::Bucket(_)) = tree.get(key) {
                return Err(MemoryError::IncompatibleValue);
            }
            tree.insert(key.to_vec(), Node::Value(value.to_vec()));
            Ok(())
        })
    }

    fn delete(&self, bucket: &Vec<Vec<u8>>, key: &[u8]) -> Result<(), MemoryError> {
        self.write(bucket, |tree| match tree.get(key) {
            Some(Node::Bucket(_)) => Err(MemoryError::IncompatibleValue),
            _ => {
                tree.remove(key);
                Ok(())
            }
        })
    }

    fn first(&self, bucket: &Vec<Vec<u8>>) -> Result<Option<Entry>, MemoryError> {
        self.read(bucket, |tree| tree.iter().next().map(entry))
    }

    fn last(&self, bucket: &Vec<Vec<u8>>) -> Result<Option<Entry>, MemoryError> {
        self.read(bucket, |tree| tree.iter().next_back().map(entry))
    }

    fn seek(&self, bucket: &Vec<Vec<u8>>, key: &[u8]) -> Result<Option<Entry>, MemoryError> {
        self.read(bucket, |tree| {
            tree.range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                .next()
                .map(entry)
        })
    }

    fn next(&self, bucket: &Vec<Vec<u8>>, key: &[u8]) -> Result<Option<Entry>, MemoryError> {
        self.read(bucket, |tree| {
            tree.range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
                .next()
                .map(entry)
        })
    }

    fn prev(&self, bucket: &Vec<Vec<u8>>, key: &[u8]) -> Result<Option<Entry>, MemoryError> {
        self.read(bucket, |tree| {
            tree.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
                .next_back()
                .map(entry)
        })
    }

    fn stats(&self, bucket: &Vec<Vec<u8>>) -> Result<BucketStats, MemoryError> {
        self.read(bucket, |tree| {
            let buckets = tree
                .values()
                .filter(|node| matches!(node, Node::Bucket(_)))
                .count();
            BucketStats {
                key_n: tree.len() - buckets,
                bucket_n: buckets + 1,
            }
        })
    }

    fn commit(self) -> Result<(), MemoryError> {
        self.ensure_writable()?;
        *self
            .store
            .data
            .write()
            .unwrap_or_else(PoisonError::into_inner) = self.tree.into_inner();
        Ok(())
    }

    fn rollback(self) -> Result<(), MemoryError> {
        Ok(())
    }
}
