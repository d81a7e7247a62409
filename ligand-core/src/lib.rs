//! Ligand is a typed data-modeling layer over an ordered, bucketed
//! key-value store.
//!
//! Core concepts:
//! - **Encoding**: turns a typed value into bytes whose order is the order
//!   the structure iterates in
//! - **Collection**: key → value
//! - **Association**: a one-to-one mapping readable from either side
//! - **List**: unique values sorted by a mutable order key
//! - **Collections / Associations / Lists**: many of the above selected by
//!   an outer key, with an index from each inner key to the instances that
//!   hold it
//!
//! Structures are declared once as definitions and bound to a transaction
//! and a path whenever they are used. Every change made through a bound
//! structure commits or rolls back with its transaction.
//!
//! # Example
//!
//! ```
//! use ligand_core::encoding::{BigEndian, Raw};
//! use ligand_core::{AssociationDef, MemoryStore, Path, Store};
//!
//! let store = MemoryStore::new();
//! let emails = AssociationDef::new("emails", Raw, BigEndian).left_exists("email");
//!
//! store
//!     .update(|tx| {
//!         let emails = emails.bind(tx, &Path::root());
//!         emails.set(&"ada@example.com".to_string(), &1)?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let owner = store
//!     .view(|tx| emails.bind(tx, &Path::root()).left(&1))
//!     .unwrap();
//! assert_eq!(owner, "ada@example.com");
//! ```

mod association;
mod collection;
mod container;
pub mod encoding;
mod error;
mod iter;
mod list;
mod maintainer;
mod multi;
mod store;

pub use association::{Association, AssociationDef};
pub use collection::{Collection, CollectionDef};
pub use container::{Container, Cursor, Path};
pub use error::{Error, Result, sentinel};
pub use iter::{DEFAULT_PAGE_LIMIT, Page};
pub use list::{List, ListDef};
pub use multi::{Associations, AssociationsDef, Collections, CollectionsDef, Lists, ListsDef};
pub use store::{BucketStats, Entry, MemoryError, MemoryStore, MemoryTx, Store, Tx};
