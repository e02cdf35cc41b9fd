//! Conflict detection and conflict-copy naming.
//!
//! Conflicts are never settled by comparing instants across replicas: the two clocks are
//! not assumed to agree. A path that changed on both sides either blocks the round or has
//! its local copy renamed aside.

use crate::path_utils::TetherPath;
use crate::{ChangeSet, ConflictSet};

/// Infix of every conflict copy name.
pub const CONFLICT_MARKER: &str = "_SYNC_CONFLICT_";

/// A path is a conflict iff it appears in both change sets.
pub fn detect(local: &ChangeSet, remote: &ChangeSet) -> ConflictSet {
    let (small, large) = if local.len() <= remote.len() {
        (local, remote)
    } else {
        (remote, local)
    };

    small
        .paths()
        .filter(|p| !TetherPath::is_reserved(p))
        .filter(|p| large.contains(p))
        .map(str::to_string)
        .collect()
}

/// Host identity as it appears inside a file name.
pub fn sanitize_host(host: &str) -> String {
    let cleaned: String = host
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '-'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// `<path>_SYNC_CONFLICT_<host>_<stamp>`, kept in the same directory as the original.
pub fn conflict_copy_name(rel_path: &str, host: &str, stamp: &str) -> String {
    format!("{rel_path}{CONFLICT_MARKER}{}_{stamp}", sanitize_host(host))
}
