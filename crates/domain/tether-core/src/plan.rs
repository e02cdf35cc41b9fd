use crate::path_utils::TetherPath;
use crate::{ChangeSet, ConflictSet, TransferPlan};

/// PullSet = remote - conflicts, PushSet = local - conflicts.
///
/// A path changed on both sides but missing from `conflicts` is still held back as a
/// conflict: no path is ever scheduled in both directions.
pub fn plan(local: &ChangeSet, remote: &ChangeSet, conflicts: &ConflictSet) -> TransferPlan {
    let mut out = TransferPlan {
        conflicts: conflicts.clone(),
        ..TransferPlan::default()
    };

    for path in local.paths() {
        if TetherPath::is_reserved(path) {
            continue;
        }
        if conflicts.contains(path) || remote.contains(path) {
            out.conflicts.insert(path);
            continue;
        }
        out.push.insert(path.to_string());
    }

    for path in remote.paths() {
        if TetherPath::is_reserved(path) {
            continue;
        }
        if out.conflicts.contains(path) || local.contains(path) {
            continue;
        }
        out.pull.insert(path.to_string());
    }

    out
}
