//! RocksDB-backed store for Ligand.
//!
//! RocksDB has one flat keyspace, so nested buckets are given numeric ids.
//! Every record is stored under `id (8 bytes, big-endian) ‖ key` and its
//! value starts with a tag byte: `TAG_VALUE` followed by the value, or
//! `TAG_BUCKET` followed by the nested bucket's id. The root bucket has id
//! 0 and new ids come from a counter stored past every bucket prefix.
//!
//! Transactions read through a snapshot taken when they begin, and at most
//! one read-write transaction is open at a time.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ligand_core::{BucketStats, Entry, Store, Tx};
use rocksdb::{
    DBRawIteratorWithThreadMode, Options, ReadOptions, Transaction, TransactionDB,
    TransactionDBOptions, TransactionOptions, WriteOptions,
};
use thiserror::Error;

const TAG_VALUE: u8 = 0;
const TAG_BUCKET: u8 = 1;

/// Holds the last bucket id handed out. Bucket ids never reach
/// `u64::MAX`, so no bucket prefix collides with it.
const SEQUENCE: &[u8] = b"\xff\xff\xff\xff\xff\xff\xff\xffsequence";

#[derive(Debug, Error)]
pub enum RocksError {
    #[error("RocksDB error: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("transaction is read-only")]
    NotWritable,
    #[error("key holds a bucket where a value was expected, or the reverse")]
    IncompatibleValue,
    #[error("corrupted record: {0}")]
    Corrupted(&'static str),
}

/// A persistent store backed by a RocksDB transaction database.
pub struct RocksStore {
    db: TransactionDB,
    writer: Mutex<()>,
}

impl RocksStore {
    /// Opens a RocksDB store at the given path.
    ///
    /// Creates the database if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RocksError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        Self::open_with(path, &opts)
    }

    /// Opens a RocksDB store with caller-supplied options.
    pub fn open_with(path: impl AsRef<Path>, opts: &Options) -> Result<Self, RocksError> {
        let db = TransactionDB::open(opts, &TransactionDBOptions::default(), path.as_ref())?;
        log::debug!("opened rocksdb store at {}", path.as_ref().display());
        Ok(Self {
            db,
            writer: Mutex::new(()),
        })
    }
}

impl Store for RocksStore {
    type Error = RocksError;
    type Tx<'s> = RocksTx<'s>;

    fn begin(&self, writable: bool) -> Result<RocksTx<'_>, RocksError> {
        // Take the writer lock before the snapshot so a writer sees every
        // earlier commit.
        let writer = writable.then(|| self.writer.lock().unwrap_or_else(PoisonError::into_inner));
        let mut opts = TransactionOptions::default();
        opts.set_snapshot(true);
        Ok(RocksTx {
            txn: self.db.transaction_opt(&WriteOptions::default(), &opts),
            writer,
        })
    }
}

/// Identifies a bucket within a [`RocksTx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RocksBucket(u64);

impl RocksBucket {
    const ROOT: RocksBucket = RocksBucket(0);

    fn prefix(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    fn key(self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(8 + key.len());
        full.extend_from_slice(&self.prefix());
        full.extend_from_slice(key);
        full
    }
}

enum Record {
    Value(Vec<u8>),
    Bucket(RocksBucket),
}

fn record(raw: &[u8]) -> Result<Record, RocksError> {
    match raw.split_first() {
        Some((&TAG_VALUE, value)) => Ok(Record::Value(value.to_vec())),
        Some((&TAG_BUCKET, id)) => {
            let id = <[u8; 8]>::try_from(id)
                .map_err(|_| RocksError::Corrupted("bucket id is not 8 bytes"))?;
            Ok(Record::Bucket(RocksBucket(u64::from_be_bytes(id))))
        }
        _ => Err(RocksError::Corrupted("unknown record tag")),
    }
}

fn tagged(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(1 + payload.len());
    raw.push(tag);
    raw.extend_from_slice(payload);
    raw
}

type RawIter<'a, 's> = DBRawIteratorWithThreadMode<'a, Transaction<'s, TransactionDB>>;

/// A transaction over a [`RocksStore`].
///
/// Read-only transactions refuse writes and cannot be committed. A
/// read-write transaction holds the store's writer lock until it ends.
pub struct RocksTx<'s> {
    txn: Transaction<'s, TransactionDB>,
    // Declared after `txn` so the lock outlives an implicit rollback.
    writer: Option<MutexGuard<'s, ()>>,
}

impl RocksTx<'_> {
    fn ensure_writable(&self) -> Result<(), RocksError> {
        if self.writer.is_some() {
            Ok(())
        } else {
            Err(RocksError::NotWritable)
        }
    }

    /// Runs `read` with options pinned to the transaction's snapshot.
    /// Reads still see the transaction's own writes.
    fn pinned<R>(&self, read: impl FnOnce(ReadOptions) -> R) -> R {
        let snapshot = self.txn.snapshot();
        let mut opts = ReadOptions::default();
        opts.set_snapshot(&snapshot);
        read(opts)
    }

    fn lookup(&self, bucket: RocksBucket, key: &[u8]) -> Result<Option<Record>, RocksError> {
        self.pinned(|opts| self.txn.get_opt(bucket.key(key), &opts))?
            .map(|raw| record(&raw))
            .transpose()
    }

    fn allocate(&self) -> Result<RocksBucket, RocksError> {
        let last = match self.txn.get_for_update(SEQUENCE, true)? {
            Some(raw) => u64::from_be_bytes(
                <[u8; 8]>::try_from(raw.as_slice())
                    .map_err(|_| RocksError::Corrupted("bucket sequence is not 8 bytes"))?,
            ),
            None => 0,
        };
        let id = last + 1;
        self.txn.put(SEQUENCE, id.to_be_bytes())?;
        Ok(RocksBucket(id))
    }

    /// The entry under the iterator if it belongs to `bucket`.
    fn entry_at(iter: &RawIter<'_, '_>, bucket: RocksBucket) -> Result<Option<Entry>, RocksError> {
        iter.status()?;
        if !iter.valid() {
            return Ok(None);
        }
        let (Some(key), Some(raw)) = (iter.key(), iter.value()) else {
            return Ok(None);
        };
        let Some(key) = key.strip_prefix(&bucket.prefix()[..]) else {
            return Ok(None);
        };
        let value = match record(raw)? {
            Record::Value(value) => Some(value),
            Record::Bucket(_) => None,
        };
        Ok(Some(Entry {
            key: key.to_vec(),
            value,
        }))
    }

    /// Every record directly inside `bucket`.
    fn scan(&self, bucket: RocksBucket) -> Result<Vec<(Vec<u8>, Record)>, RocksError> {
        let prefix = bucket.prefix();
        self.pinned(|opts| -> Result<_, RocksError> {
            let mut iter = self.txn.raw_iterator_opt(opts);
            iter.seek(prefix);
            let mut records = Vec::new();
            while iter.valid() {
                let (Some(key), Some(raw)) = (iter.key(), iter.value()) else {
                    break;
                };
                let Some(key) = key.strip_prefix(&prefix[..]) else {
                    break;
                };
                records.push((key.to_vec(), record(raw)?));
                iter.next();
            }
            iter.status()?;
            Ok(records)
        })
    }

    /// Deletes everything inside `bucket`, depth first.
    fn purge(&self, bucket: RocksBucket) -> Result<(), RocksError> {
        for (key, record) in self.scan(bucket)? {
            if let Record::Bucket(child) = record {
                self.purge(child)?;
            }
            self.txn.delete(bucket.key(&key))?;
        }
        Ok(())
    }
}

impl Tx for RocksTx<'_> {
    type Error = RocksError;
    type Bucket = RocksBucket;

    fn writable(&self) -> bool {
        self.writer.is_some()
    }

    fn root(&self) -> RocksBucket {
        RocksBucket::ROOT
    }

    fn bucket(&self, parent: &RocksBucket, name: &[u8]) -> Result<Option<RocksBucket>, RocksError> {
        match self.lookup(*parent, name)? {
            Some(Record::Bucket(bucket)) => Ok(Some(bucket)),
            Some(Record::Value(_)) | None => Ok(None),
        }
    }

    fn create_bucket(&self, parent: &RocksBucket, name: &[u8]) -> Result<RocksBucket, RocksError> {
        self.ensure_writable()?;
        match self.lookup(*parent, name)? {
            Some(Record::Bucket(bucket)) => Ok(bucket),
            Some(Record::Value(_)) => Err(RocksError::IncompatibleValue),
            None => {
                let bucket = self.allocate()?;
                self.txn
                    .put(parent.key(name), tagged(TAG_BUCKET, &bucket.prefix()))?;
                log::trace!("allocated bucket {}", bucket.0);
                Ok(bucket)
            }
        }
    }

    fn delete_bucket(&self, parent: &RocksBucket, name: &[u8]) -> Result<(), RocksError> {
        self.ensure_writable()?;
        match self.lookup(*parent, name)? {
            Some(Record::Bucket(bucket)) => {
                self.purge(bucket)?;
                self.txn.delete(parent.key(name))?;
                log::trace!("purged bucket {}", bucket.0);
                Ok(())
            }
            Some(Record::Value(_)) => Err(RocksError::IncompatibleValue),
            None => Ok(()),
        }
    }

    fn get(&self, bucket: &RocksBucket, key: &[u8]) -> Result<Option<Vec<u8>>, RocksError> {
        match self.lookup(*bucket, key)? {
            Some(Record::Value(value)) => Ok(Some(value)),
            Some(Record::Bucket(_)) | None => Ok(None),
        }
    }

    fn put(&self, bucket: &RocksBucket, key: &[u8], value: &[u8]) -> Result<(), RocksError> {
        self.ensure_writable()?;
        if let Some(Record::Bucket(_)) = self.lookup(*bucket, key)? {
            return Err(RocksError::IncompatibleValue);
        }
        self.txn.put(bucket.key(key), tagged(TAG_VALUE, value))?;
        Ok(())
    }

    fn delete(&self, bucket: &RocksBucket, key: &[u8]) -> Result<(), RocksError> {
        self.ensure_writable()?;
        if let Some(Record::Bucket(_)) = self.lookup(*bucket, key)? {
            return Err(RocksError::IncompatibleValue);
        }
        self.txn.delete(bucket.key(key))?;
        Ok(())
    }

    fn first(&self, bucket: &RocksBucket) -> Result<Option<Entry>, RocksError> {
        self.pinned(|opts| {
            let mut iter = self.txn.raw_iterator_opt(opts);
            iter.seek(bucket.prefix());
            Self::entry_at(&iter, *bucket)
        })
    }

    fn last(&self, bucket: &RocksBucket) -> Result<Option<Entry>, RocksError> {
        // The largest key below the next bucket's prefix.
        let bound = (bucket.0 + 1).to_be_bytes();
        self.pinned(|opts| {
            let mut iter = self.txn.raw_iterator_opt(opts);
            iter.seek_for_prev(bound);
            if iter.valid() && iter.key() == Some(&bound[..]) {
                iter.prev();
            }
            Self::entry_at(&iter, *bucket)
        })
    }

    fn seek(&self, bucket: &RocksBucket, key: &[u8]) -> Result<Option<Entry>, RocksError> {
        self.pinned(|opts| {
            let mut iter = self.txn.raw_iterator_opt(opts);
            iter.seek(bucket.key(key));
            Self::entry_at(&iter, *bucket)
        })
    }

    fn next(&self, bucket: &RocksBucket, key: &[u8]) -> Result<Option<Entry>, RocksError> {
        let target = bucket.key(key);
        self.pinned(|opts| {
            let mut iter = self.txn.raw_iterator_opt(opts);
            iter.seek(&target);
            if iter.valid() && iter.key() == Some(target.as_slice()) {
                iter.next();
            }
            Self::entry_at(&iter, *bucket)
        })
    }

    fn prev(&self, bucket: &RocksBucket, key: &[u8]) -> Result<Option<Entry>, RocksError> {
        let target = bucket.key(key);
        self.pinned(|opts| {
            let mut iter = self.txn.raw_iterator_opt(opts);
            iter.seek_for_prev(&target);
            if iter.valid() && iter.key() == Some(target.as_slice()) {
                iter.prev();
            }
            Self::entry_at(&iter, *bucket)
        })
    }

    fn stats(&self, bucket: &RocksBucket) -> Result<BucketStats, RocksError> {
        let mut stats = BucketStats {
            key_n: 0,
            bucket_n: 1,
        };
        for (_, record) in self.scan(*bucket)? {
            match record {
                Record::Value(_) => stats.key_n += 1,
                Record::Bucket(_) => stats.bucket_n += 1,
            }
        }
        Ok(stats)
    }

    fn commit(self) -> Result<(), RocksError> {
        self.ensure_writable()?;
        self.txn.commit()?;
        Ok(())
    }

    fn rollback(self) -> Result<(), RocksError> {
        self.txn.rollback()?;
        Ok(())
    }
}
