use camino::{Utf8Path, Utf8PathBuf};
use tether_core::{SyncMark, MARK_FILE_NAME};

/// Persists one replica's Sync Mark.
pub trait MarkStore: Send + Sync {
    /// The stored mark, or [`SyncMark::NEVER`] when none was ever written.
    fn read(&self, root: &Utf8Path) -> Result<SyncMark, crate::StorageError>;

    /// Replace the stored mark. Either the old or the new mark is on disk afterwards,
    /// never a partial write.
    fn write(&self, root: &Utf8Path, mark: SyncMark) -> Result<(), crate::StorageError>;
}

pub fn mark_path(root: &Utf8Path) -> Utf8PathBuf {
    root.join(MARK_FILE_NAME)
}
