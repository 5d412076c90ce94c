use thiserror::Error;

/// Crate-wide error type.
///
/// Every variant maps to a stable numeric code via [`FsError::code`]; the
/// CLI prints errors as `revlite: E<code>: <message>`.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt filesystem: {0}")]
    Corrupt(String),

    #[error("corrupt index: {0}")]
    IndexCorruption(String),

    #[error("item index {item_index} too large in revision {revision}")]
    ItemIndexOverflow { revision: u64, item_index: u64 },

    #[error("revision {revision} not covered by item index")]
    ItemIndexRevision { revision: u64 },

    #[error("transaction out of date: based on r{base_rev}, youngest is r{youngest}")]
    TxnOutOfDate { base_rev: u64, youngest: u64 },

    #[error("rep already being written in transaction {0}")]
    RepBeingWritten(String),

    #[error("no transaction named {0}")]
    NoSuchTransaction(String),

    #[error("unexpected end of index data: {0}")]
    UnexpectedEof(String),

    #[error("path not present: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("not a file: {0}")]
    NotFile(String),

    #[error("path already exists: {0}")]
    AlreadyExists(String),

    #[error("path is locked: {0}")]
    PathLocked(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("rep cache: {0}")]
    RepCache(#[from] rusqlite::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<FsError>,
    },
}

impl FsError {
    /// Stable error number, printed on the CLI surface.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            FsError::Io { .. } => 720_001,
            FsError::Corrupt(_) => 160_004,
            FsError::NoSuchTransaction(_) => 160_007,
            FsError::NotFound(_) => 160_013,
            FsError::NotDirectory(_) => 160_016,
            FsError::NotFile(_) => 160_017,
            FsError::AlreadyExists(_) => 160_020,
            FsError::TxnOutOfDate { .. } => 160_028,
            FsError::PathLocked(_) => 160_035,
            FsError::RepBeingWritten(_) => 160_045,
            FsError::IndexCorruption(_) => 160_053,
            FsError::ItemIndexOverflow { .. } => 160_054,
            FsError::ItemIndexRevision { .. } => 160_055,
            FsError::UnexpectedEof(_) => 160_056,
            FsError::Config(_) => 160_059,
            FsError::RepCache(_) => 160_060,
            FsError::Cancelled => 200_015,
            FsError::Wrapped { source, .. } => source.code(),
        }
    }

    /// Wrap this error with an outer context line, preserving the chain.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> FsError {
        FsError::Wrapped { context: context.into(), source: Box::new(self) }
    }

    /// Attach a path/operation context to an I/O error.
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> FsError {
        let context = context.into();
        move |source| FsError::Io { context, source }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
