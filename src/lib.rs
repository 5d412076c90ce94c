#![forbid(unsafe_code)]

//! revlite: an embedded, file-backed revision store.
//!
//! Write transactions are staged in per-transaction scratch directories,
//! materialised into a prototype revision file, indexed both ways
//! (log-to-phys and phys-to-log), and atomically promoted to immutable,
//! numbered revisions. One writer at a time, any number of readers,
//! coordinated through lock files and a handful of in-process caches.

pub mod commit;
pub mod config;
pub mod errors;
pub mod hashdump;
pub mod index;
pub mod logger;
pub mod node;
pub mod packed;
pub mod repo;
pub mod txn;
pub mod verify;

pub use commit::{CommitOptions, PathLockChecker};
pub use config::FsConfig;
pub use errors::{FsError, Result};
pub use node::{ChangeKind, ChangeRecord, NodeKind, NodeRevId, Revision, TxnId};
pub use repo::Repository;
pub use txn::Transaction;
