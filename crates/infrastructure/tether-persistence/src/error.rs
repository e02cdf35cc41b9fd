use camino::Utf8PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("mark file {path} is corrupt")]
    Corrupt { path: Utf8PathBuf },
    #[error("a round is already running for {root}")]
    Busy { root: Utf8PathBuf },
    #[error("replica root {0} does not exist")]
    MissingRoot(Utf8PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Corrupt,
    Busy,
    MissingRoot,
    Io,
}

impl StorageError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::Corrupt { .. } => StorageErrorKind::Corrupt,
            StorageError::Busy { .. } => StorageErrorKind::Busy,
            StorageError::MissingRoot(_) => StorageErrorKind::MissingRoot,
            StorageError::Io(_) => StorageErrorKind::Io,
        }
    }
}
