use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tether_core::path_utils::TetherPath;
use tether_core::{ChangeSet, SyncMark};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Scan cancelled")]
    Cancelled,
    #[error("replica root is not a directory: {0}")]
    NotADirectory(Utf8PathBuf),
}

/// How symbolic links take part in change discovery.
///
/// A link's own mtime is whatever the last writer of the link left behind, and most
/// transfers cannot restore it, so treating it as a regular file makes the link look
/// changed on every round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    /// Links are never candidates and never traversed.
    #[default]
    Exclude,
    /// A link to a regular file is judged by its target's mtime. Dangling links and links
    /// to directories are skipped.
    Resolve,
}

impl SymlinkPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SymlinkPolicy::Exclude => "exclude",
            SymlinkPolicy::Resolve => "resolve",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exclude" => Some(SymlinkPolicy::Exclude),
            "resolve" => Some(SymlinkPolicy::Resolve),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    #[serde(default)]
    pub symlinks: SymlinkPolicy,
    /// Report directories as changes too. Off by default: a directory is created by the
    /// transfer of its files, and its mtime moves whenever an entry is added or removed.
    #[serde(default)]
    pub include_dirs: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub entries_seen: u64,
    pub candidates: u64,
    pub changed: u64,
    pub symlinks_skipped: u64,
    pub unrepresentable_skipped: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub changes: ChangeSet,
    pub stats: ScanStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug)]
struct Candidate {
    abs: Utf8PathBuf,
    rel: String,
    kind: EntryKind,
}

pub struct Scanner;

impl Scanner {
    pub fn mtime(meta: &fs::Metadata) -> u64 {
        meta.modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Every candidate under `root` whose modification instant is strictly greater than
    /// `since`.
    pub fn scan_changes(
        root: &Utf8Path,
        since: SyncMark,
        opts: &ScanOptions,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<ScanOutput, ScannerError> {
        info!("Scanning {} for changes since {} ({:?})", root, since, opts);

        let mut stats = ScanStats::default();
        let candidates = Self::collect_candidates(root, opts, cancel.as_deref(), &mut stats)?;

        let results: Vec<Result<Option<(String, u64)>, ScannerError>> = candidates
            .par_iter()
            .map(|c| {
                if is_cancelled(cancel.as_deref()) {
                    return Err(ScannerError::Cancelled);
                }
                Ok(Self::resolve_mtime(c)?
                    .filter(|mtime| *mtime > since.secs())
                    .map(|mtime| (c.rel.clone(), mtime)))
            })
            .collect();

        let mut changes = ChangeSet::new();
        for res in results {
            if let Some((rel, mtime)) = res? {
                changes.insert(rel, mtime);
            }
        }
        stats.changed = changes.len() as u64;

        debug!(
            "Scan of {} done: {} candidates, {} changed",
            root, stats.candidates, stats.changed
        );
        Ok(ScanOutput { changes, stats })
    }

    /// Every candidate path under `root`, regardless of mtime.
    pub fn list_tree(root: &Utf8Path, opts: &ScanOptions) -> Result<BTreeSet<String>, ScannerError> {
        let mut stats = ScanStats::default();
        let candidates = Self::collect_candidates(root, opts, None, &mut stats)?;

        let resolved: Vec<Result<Option<String>, ScannerError>> = candidates
            .par_iter()
            .map(|c| Ok(Self::resolve_mtime(c)?.map(|_| c.rel.clone())))
            .collect();

        let mut out = BTreeSet::new();
        for res in resolved {
            if let Some(rel) = res? {
                out.insert(rel);
            }
        }
        Ok(out)
    }

    fn collect_candidates(
        root: &Utf8Path,
        opts: &ScanOptions,
        cancel: Option<&AtomicBool>,
        stats: &mut ScanStats,
    ) -> Result<Vec<Candidate>, ScannerError> {
        let root_meta = fs::metadata(root)?;
        if !root_meta.is_dir() {
            return Err(ScannerError::NotADirectory(root.to_owned()));
        }

        let mut candidates = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
            if is_cancelled(cancel) {
                return Err(ScannerError::Cancelled);
            }
            let entry = entry?;
            stats.entries_seen += 1;

            let Ok(abs) = Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) else {
                warn!("Skipping non UTF-8 path {}", entry.path().display());
                stats.unrepresentable_skipped += 1;
                continue;
            };
            let Ok(rel) = abs.strip_prefix(root) else {
                continue;
            };
            let rel = TetherPath::normalize(rel.as_str());

            if TetherPath::is_reserved(&rel) {
                continue;
            }
            if !TetherPath::is_line_safe(&rel) {
                warn!("Skipping path with a line break: {:?}", rel);
                stats.unrepresentable_skipped += 1;
                continue;
            }

            let ft = entry.file_type();
            let kind = if ft.is_symlink() {
                EntryKind::Symlink
            } else if ft.is_dir() {
                EntryKind::Dir
            } else if ft.is_file() {
                EntryKind::File
            } else {
                // sockets, fifos, devices
                continue;
            };

            match kind {
                EntryKind::Symlink if opts.symlinks == SymlinkPolicy::Exclude => {
                    stats.symlinks_skipped += 1;
                    continue;
                }
                EntryKind::Dir if !opts.include_dirs => continue,
                _ => {}
            }

            candidates.push(Candidate { abs, rel, kind });
        }

        stats.candidates = candidates.len() as u64;
        Ok(candidates)
    }

    /// mtime of a candidate, or `None` when it vanished mid-scan or is a link the policy
    /// cannot judge.
    fn resolve_mtime(c: &Candidate) -> Result<Option<u64>, ScannerError> {
        let meta = match c.kind {
            EntryKind::Symlink => fs::metadata(&c.abs),
            EntryKind::File | EntryKind::Dir => fs::symlink_metadata(&c.abs),
        };
        let meta = match meta {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if c.kind == EntryKind::Symlink {
                    debug!("Skipping dangling link {}", c.rel);
                }
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if c.kind == EntryKind::Symlink && !meta.is_file() {
            debug!("Skipping link to non-file {}", c.rel);
            return Ok(None);
        }
        Ok(Some(Self::mtime(&meta)))
    }
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|c| c.load(Ordering::Relaxed))
}
