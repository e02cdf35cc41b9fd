use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub mod conflict;
pub mod deletions;
pub mod path_utils;
pub mod plan;

pub use conflict::{conflict_copy_name, detect};
pub use plan::plan;

/// Per-replica mark file, relative to the replica root.
pub const MARK_FILE_NAME: &str = ".tether-mark";
/// Held at the local root while a round is running.
pub const LOCK_FILE_NAME: &str = ".tether.lock";
/// Never discovered, planned for transfer, or offered for deletion.
pub const RESERVED_NAMES: &[&str] = &[MARK_FILE_NAME, LOCK_FILE_NAME];

/// Seconds since the epoch of the last fully successful round with a counterpart.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SyncMark(pub u64);

impl SyncMark {
    /// "Never synced". Every file with a real mtime is newer than this.
    pub const NEVER: SyncMark = SyncMark(0);

    pub fn secs(self) -> u64 {
        self.0
    }

    pub fn is_never(self) -> bool {
        self.0 == 0
    }

    /// Parse the on-disk form: a single decimal integer, surrounding whitespace allowed.
    pub fn parse(text: &str) -> Option<Self> {
        text.trim().parse::<u64>().ok().map(SyncMark)
    }

    pub fn to_file_contents(self) -> String {
        format!("{}\n", self.0)
    }

    /// Reference instant for change discovery: the lower of the two marks, so a change
    /// newer than either side's last round is never missed.
    pub fn common_reference(local: SyncMark, remote: SyncMark) -> SyncMark {
        local.min(remote)
    }

    /// Mark to commit at the end of a round. Never lower than either previous mark.
    pub fn advance(self, now_secs: u64, counterpart: SyncMark) -> SyncMark {
        SyncMark(now_secs.max(self.0).max(counterpart.0))
    }
}

impl fmt::Display for SyncMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Remote => "remote",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative paths modified after a reference instant, with their mtime (seconds).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    entries: BTreeMap<String, u64>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a change. A duplicate path keeps the newer instant.
    pub fn insert(&mut self, path: impl Into<String>, mtime: u64) {
        let slot = self.entries.entry(path.into()).or_insert(mtime);
        if *slot < mtime {
            *slot = mtime;
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<u64> {
        self.entries.remove(path)
    }

    pub fn mtime(&self, path: &str) -> Option<u64> {
        self.entries.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(p, m)| (p.as_str(), *m))
    }
}

impl FromIterator<(String, u64)> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut set = ChangeSet::new();
        for (path, mtime) in iter {
            set.insert(path, mtime);
        }
        set
    }
}

/// Paths changed independently on both replicas during the current round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSet {
    paths: BTreeSet<String>,
}

impl ConflictSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>) {
        self.paths.insert(path.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }
}

impl FromIterator<String> for ConflictSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

/// A conflicting local file moved aside so the remote version can take its place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictCopy {
    pub original: String,
    pub renamed: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    /// remote -> local
    pub pull: BTreeSet<String>,
    /// local -> remote
    pub push: BTreeSet<String>,
    /// Excluded from both directions until resolved.
    pub conflicts: ConflictSet,
}

impl TransferPlan {
    pub fn is_empty(&self) -> bool {
        self.pull.is_empty() && self.push.is_empty()
    }

    /// First path scheduled in both directions, if any.
    pub fn overlapping(&self) -> Option<&str> {
        self.pull
            .intersection(&self.push)
            .next()
            .map(String::as_str)
    }

    /// Fold resolved conflicts back in: the remote version of each original is pulled and
    /// the renamed local copy is pushed.
    pub fn apply_resolution(&mut self, copies: &[ConflictCopy]) {
        for copy in copies {
            if !self.conflicts.paths.remove(&copy.original) {
                continue;
            }
            self.push.remove(&copy.original);
            self.pull.insert(copy.original.clone());
            self.pull.remove(&copy.renamed);
            self.push.insert(copy.renamed.clone());
        }
    }

    pub fn pull_list(&self) -> Vec<String> {
        self.pull.iter().cloned().collect()
    }

    pub fn push_list(&self) -> Vec<String> {
        self.push.iter().cloned().collect()
    }
}

/// Paths present in `destination` but absent from its counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionSet {
    pub destination: Side,
    paths: BTreeSet<String>,
}

impl DeletionSet {
    pub fn new(destination: Side) -> Self {
        Self {
            destination,
            paths: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, path: impl Into<String>) {
        self.paths.insert(path.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.paths.retain(|p| keep(p));
    }
}
