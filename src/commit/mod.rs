//! The commit pipeline and its supporting pieces: change folding, the
//! skip-delta machinery, rep writing/sharing, and the persistent rep
//! cache.

pub mod deltify;
pub mod fold;
pub mod pipeline;
pub mod rep_write;
pub mod repcache;

pub use pipeline::{CommitOptions, PathLockChecker};
