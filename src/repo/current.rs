use crate::errors::{FsError, Result};
use crate::node::id::Revision;
use crate::repo::layout::{self, Layout};

/// Read the youngest-revision pointer from `current`.
///
/// # Errors
/// `Corrupt` on malformed contents, I/O errors otherwise.
pub fn read_current(layout: &Layout) -> Result<Revision> {
    let path = layout.current_path();
    let text = std::fs::read_to_string(&path)
        .map_err(FsError::io(format!("reading '{}'", path.display())))?;
    text.trim_end_matches('\n')
        .parse::<u64>()
        .map_err(|_| FsError::Corrupt(format!("malformed 'current' file: {text:?}")))
}

/// Atomically update the youngest-revision pointer.
///
/// # Errors
/// I/O errors from the temp-file write or the rename.
pub fn write_current(layout: &Layout, revision: Revision) -> Result<()> {
    layout::write_file_atomic(&layout.current_path(), format!("{revision}\n").as_bytes())
}
