//! In-memory model of node-revisions, representations, directory entries
//! and change records, plus their pinned textual forms.

pub mod change;
pub mod dirent;
pub mod id;
pub mod noderev;
pub mod rep;

pub use change::{ChangeKind, ChangeRecord};
pub use dirent::DirEntry;
pub use id::{IdPart, NodeRevId, Revision, Token, TxnId};
pub use noderev::{NodeKind, NodeRevision};
pub use rep::Representation;
