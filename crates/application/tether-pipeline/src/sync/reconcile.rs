use std::sync::Arc;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tether_core::path_utils::TetherPath;
use tether_core::{ConflictSet, DeletionSet, Side};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::io_utils::remove_under_root;
use crate::sync::transport::{Transport, TransportError};
use crate::sync::SyncError;

/// Decisions the engine cannot make on its own.
///
/// Called from a blocking thread, so an implementation may prompt on a terminal.
pub trait Confirm: Send + Sync {
    /// Paths changed on both sides. `auto_rename` says whether the round will rename them
    /// aside or stop.
    fn conflicts_found(&self, _conflicts: &ConflictSet, _auto_rename: bool) {}

    /// Whether the paths in `set` may be deleted from `set.destination`.
    fn approve_deletions(&self, set: &DeletionSet) -> bool;
}

/// Fixed answers per side, for non-interactive runs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresetConfirm {
    pub delete_local: bool,
    pub delete_remote: bool,
}

impl PresetConfirm {
    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn approve_all() -> Self {
        Self {
            delete_local: true,
            delete_remote: true,
        }
    }
}

impl Confirm for PresetConfirm {
    fn approve_deletions(&self, set: &DeletionSet) -> bool {
        match set.destination {
            Side::Local => self.delete_local,
            Side::Remote => self.delete_remote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionOutcome {
    pub side: Side,
    pub planned: Vec<String>,
    pub approved: bool,
    pub deleted: usize,
}

impl DeletionOutcome {
    /// Planned but not approved; they will be proposed again next round.
    pub fn retained(&self) -> &[String] {
        if self.approved {
            &[]
        } else {
            &self.planned
        }
    }
}

pub struct DeletionReconciler<'a> {
    transport: &'a dyn Transport,
    confirm: Arc<dyn Confirm>,
    local_root: &'a Utf8Path,
}

impl<'a> DeletionReconciler<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        confirm: Arc<dyn Confirm>,
        local_root: &'a Utf8Path,
    ) -> Self {
        Self {
            transport,
            confirm,
            local_root,
        }
    }

    /// Dry run, ask, and delete on approval. Nothing is removed from `destination`
    /// without a yes for that side.
    pub async fn reconcile(
        &self,
        destination: Side,
        cancel: &CancellationToken,
    ) -> Result<DeletionOutcome, SyncError> {
        let mut set = self
            .transport
            .plan_deletions(self.local_root, destination, cancel)
            .await
            .map_err(deletion_error)?;
        set.retain(|p| !TetherPath::is_reserved(p));

        let mut outcome = DeletionOutcome {
            side: destination,
            planned: set.to_vec(),
            approved: false,
            deleted: 0,
        };
        if set.is_empty() {
            return Ok(outcome);
        }

        info!("{} path(s) would be deleted from {}", set.len(), destination);
        let confirm = self.confirm.clone();
        let asked = set.clone();
        outcome.approved = tokio::task::spawn_blocking(move || confirm.approve_deletions(&asked))
            .await
            .map_err(|e| SyncError::Internal(format!("confirmation task failed: {e}")))?;

        if !outcome.approved {
            warn!(
                "Deletion from {} not approved; {} path(s) retained",
                destination,
                set.len()
            );
            return Ok(outcome);
        }
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        outcome.deleted = match destination {
            Side::Local => {
                let root = self.local_root.to_owned();
                let paths = set.to_vec();
                tokio::task::spawn_blocking(move || {
                    remove_under_root(&root, paths.iter().map(String::as_str))
                })
                .await
                .map_err(|e| SyncError::Internal(format!("deletion task failed: {e}")))?
                .map_err(|e| SyncError::Deletion(e.to_string()))?
            }
            Side::Remote => self
                .transport
                .delete_remote(&set, cancel)
                .await
                .map_err(deletion_error)?,
        };
        info!("Deleted {} path(s) from {}", outcome.deleted, destination);
        Ok(outcome)
    }
}

fn deletion_error(e: TransportError) -> SyncError {
    if e.is_cancelled() {
        SyncError::Cancelled
    } else {
        SyncError::Deletion(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_answers_per_side() {
        let confirm = PresetConfirm {
            delete_local: true,
            delete_remote: false,
        };
        assert!(confirm.approve_deletions(&DeletionSet::new(Side::Local)));
        assert!(!confirm.approve_deletions(&DeletionSet::new(Side::Remote)));
        assert!(!PresetConfirm::deny_all().approve_deletions(&DeletionSet::new(Side::Local)));
    }

    #[test]
    fn rejected_outcome_retains_everything() {
        let outcome = DeletionOutcome {
            side: Side::Local,
            planned: vec!["c.txt".into()],
            approved: false,
            deleted: 0,
        };
        assert_eq!(outcome.retained(), ["c.txt".to_string()]);
    }
}
