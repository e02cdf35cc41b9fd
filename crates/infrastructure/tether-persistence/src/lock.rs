use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::sync::{Mutex, OnceLock};

use camino::{Utf8Path, Utf8PathBuf};
use tether_core::LOCK_FILE_NAME;
use tracing::{debug, warn};

use crate::StorageError;

/// Single-flight guard for one local root, released on drop.
///
/// The in-process registry catches concurrent rounds inside one process; the lock file
/// catches a second `tether` process. A lock file left by a crashed process has to be
/// removed by hand.
#[derive(Debug)]
pub struct RoundLock {
    root: Utf8PathBuf,
    file: Utf8PathBuf,
}

impl RoundLock {
    fn registry() -> &'static Mutex<HashSet<Utf8PathBuf>> {
        static HELD: OnceLock<Mutex<HashSet<Utf8PathBuf>>> = OnceLock::new();
        HELD.get_or_init(|| Mutex::new(HashSet::new()))
    }

    pub fn acquire(root: &Utf8Path) -> Result<Self, StorageError> {
        if !root.is_dir() {
            return Err(StorageError::MissingRoot(root.to_owned()));
        }
        let key = root
            .canonicalize_utf8()
            .unwrap_or_else(|_| root.to_owned());

        {
            let mut held = Self::registry().lock().expect("round lock registry poisoned");
            if !held.insert(key.clone()) {
                return Err(StorageError::Busy { root: key });
            }
        }

        let file = root.join(LOCK_FILE_NAME);
        match OpenOptions::new().write(true).create_new(true).open(&file) {
            Ok(mut f) => {
                let _ = writeln!(f, "{}", std::process::id());
            }
            Err(e) => {
                Self::release_key(&key);
                if e.kind() == io::ErrorKind::AlreadyExists {
                    warn!("Lock file {} exists; another round may be running", file);
                    return Err(StorageError::Busy { root: key });
                }
                return Err(e.into());
            }
        }

        debug!("Acquired round lock {}", file);
        Ok(Self { root: key, file })
    }

    fn release_key(key: &Utf8Path) {
        if let Ok(mut held) = Self::registry().lock() {
            held.remove(key);
        }
    }
}

impl Drop for RoundLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.file) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove lock file {}: {}", self.file, e);
            }
        }
        Self::release_key(&self.root);
    }
}
