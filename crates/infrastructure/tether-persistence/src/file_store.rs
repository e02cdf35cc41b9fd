use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tether_core::SyncMark;
use tracing::debug;

use crate::api::mark_path;
use crate::maintenance::quarantine_corrupt_file;
use crate::{MarkStore, StorageError};

/// Plain-text mark at `<root>/.tether-mark`.
#[derive(Debug, Default, Clone)]
pub struct FileMarkStore;

impl FileMarkStore {
    pub fn new() -> Self {
        Self
    }

    /// Read a mark without touching the file, even when it is unparseable.
    pub fn peek(&self, root: &Utf8Path) -> Result<SyncMark, StorageError> {
        let path = mark_path(root);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No mark at {}, treating as never synced", path);
                return Ok(SyncMark::NEVER);
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(StorageError::Corrupt { path });
            }
            Err(e) => return Err(e.into()),
        };
        SyncMark::parse(&text).ok_or(StorageError::Corrupt { path })
    }
}

impl MarkStore for FileMarkStore {
    /// Like `peek`, but an unparseable mark is moved aside before the error returns.
    fn read(&self, root: &Utf8Path) -> Result<SyncMark, StorageError> {
        match self.peek(root) {
            Err(StorageError::Corrupt { path }) => {
                let _ = quarantine_corrupt_file(&path);
                Err(StorageError::Corrupt { path })
            }
            other => other,
        }
    }

    fn write(&self, root: &Utf8Path, mark: SyncMark) -> Result<(), StorageError> {
        if !root.is_dir() {
            return Err(StorageError::MissingRoot(root.to_owned()));
        }
        let path = mark_path(root);
        atomic_write(&path, mark.to_file_contents().as_bytes())?;
        debug!("Wrote mark {} to {}", mark, path);
        Ok(())
    }
}

fn atomic_write(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let tmp_path = Utf8PathBuf::from(format!("{path}.tmp"));

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
