use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tether_core::conflict::conflict_copy_name;
use tether_core::{ChangeSet, ConflictCopy, ConflictSet};
use tracing::{debug, info};

use crate::io_utils::{resolve_under_root, robust_rename};
use crate::sync::SyncError;

pub const CONFLICT_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

pub fn conflict_stamp(round_start: DateTime<Utc>) -> String {
    round_start.format(CONFLICT_STAMP_FORMAT).to_string()
}

/// First free name among `base`, `base_2`, `base_3`, ...
fn free_name(root: &Utf8Path, base: &str) -> Result<String, SyncError> {
    let mut candidate = base.to_string();
    let mut n = 2u32;
    loop {
        let path = resolve_under_root(root, &candidate).map_err(SyncError::Transfer)?;
        if std::fs::symlink_metadata(&path).is_err() {
            return Ok(candidate);
        }
        candidate = format!("{base}_{n}");
        n += 1;
    }
}

/// Drop directories that both replicas report from both change sets. A directory entry
/// only says that something inside it changed; the files themselves are listed on their
/// own, so a shared directory is neither a conflict nor something to transfer.
pub fn drop_shared_directories(
    local_root: &Utf8Path,
    local: &mut ChangeSet,
    remote: &mut ChangeSet,
) -> Vec<String> {
    let shared: Vec<String> = local
        .paths()
        .filter(|p| remote.contains(p))
        .filter(|p| resolve_under_root(local_root, p).is_ok_and(|path| path.is_dir()))
        .map(str::to_string)
        .collect();
    for path in &shared {
        local.remove(path);
        remote.remove(path);
        debug!("Directory {} changed on both replicas, contents compared instead", path);
    }
    shared
}

/// Move each conflicting local file aside so the remote version can be pulled into its
/// place. A conflicting file that vanished since the scan fails the round; the next round
/// sees it as a plain remote change.
pub async fn rename_conflicts(
    local_root: &Utf8Path,
    conflicts: &ConflictSet,
    host: &str,
    stamp: &str,
) -> Result<Vec<ConflictCopy>, SyncError> {
    let mut copies = Vec::with_capacity(conflicts.len());
    for original in conflicts.iter() {
        let from = resolve_under_root(local_root, original).map_err(SyncError::Transfer)?;
        match std::fs::symlink_metadata(&from) {
            Err(_) => {
                return Err(SyncError::Transfer(format!(
                    "conflicting path {original} vanished before it could be renamed"
                )))
            }
            Ok(meta) if meta.is_dir() => {
                return Err(SyncError::Internal(format!(
                    "conflicting path {original} is a directory"
                )))
            }
            Ok(_) => {}
        }

        let renamed = free_name(local_root, &conflict_copy_name(original, host, stamp))?;
        let to = resolve_under_root(local_root, &renamed).map_err(SyncError::Transfer)?;
        robust_rename(&from, &to)
            .await
            .map_err(|e| SyncError::Transfer(format!("rename {original} -> {renamed}: {e}")))?;
        info!("Renamed conflicting {} -> {}", original, renamed);
        copies.push(ConflictCopy {
            original: original.to_string(),
            renamed,
        });
    }
    Ok(copies)
}
