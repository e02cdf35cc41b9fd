use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use filetime::FileTime;
use tether_core::path_utils::TetherPath;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub async fn robust_rename<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> io::Result<()> {
    let mut attempt = 0u32;
    let max_attempts = 8u32;
    let mut backoff = Duration::from_millis(50);

    loop {
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(e);
                }
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, Duration::from_millis(2000));
            }
        }
    }
}

/// Mirror `token` into a flag that blocking code can poll. Abort the returned task once
/// the blocking work is done.
pub fn cancel_flag(token: &CancellationToken) -> (Arc<AtomicBool>, JoinHandle<()>) {
    let flag = Arc::new(AtomicBool::new(token.is_cancelled()));
    let setter = flag.clone();
    let token = token.clone();
    let task = tokio::spawn(async move {
        token.cancelled().await;
        setter.store(true, Ordering::Relaxed);
    });
    (flag, task)
}

/// `root/rel`, refusing anything that would land outside `root`.
pub fn resolve_under_root(root: &Utf8Path, rel: &str) -> Result<Utf8PathBuf, String> {
    if !TetherPath::verify_safe(rel) {
        return Err(format!("Security: path escapes replica root: {rel}"));
    }
    let path = root.join(rel);
    if !path.starts_with(root) {
        return Err(format!("Security: path escapes replica root: {path}"));
    }
    Ok(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    /// Destination is newer and `update` was requested.
    KeptNewer,
    /// Source disappeared, or is a link the caller asked to skip.
    Skipped,
}

/// Copy one file, carrying its mtime over so the copy is not seen as a fresh change.
pub fn copy_preserving_mtime(
    src: &Utf8Path,
    dst: &Utf8Path,
    update: bool,
    follow_links: bool,
) -> io::Result<CopyOutcome> {
    let link_meta = match fs::symlink_metadata(src) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CopyOutcome::Skipped),
        Err(e) => return Err(e),
    };
    if link_meta.file_type().is_symlink() && !follow_links {
        return Ok(CopyOutcome::Skipped);
    }
    let src_meta = match fs::metadata(src) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Ok(CopyOutcome::Skipped),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CopyOutcome::Skipped),
        Err(e) => return Err(e),
    };
    let src_mtime = FileTime::from_last_modification_time(&src_meta);

    if update {
        if let Ok(dst_meta) = fs::metadata(dst) {
            if FileTime::from_last_modification_time(&dst_meta) > src_mtime {
                debug!("Keeping newer {}", dst);
                return Ok(CopyOutcome::KeptNewer);
            }
        }
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    // Replace a destination link rather than writing through it.
    if fs::symlink_metadata(dst).is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(dst)?;
    }
    fs::copy(src, dst)?;
    filetime::set_file_mtime(dst, src_mtime)?;
    Ok(CopyOutcome::Copied)
}

/// Remove each relative path under `root`, then any parent directory the removals left
/// empty. Paths already gone are not an error. Returns how many entries were removed.
pub fn remove_under_root<'a, I>(root: &Utf8Path, paths: I) -> io::Result<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut removed = 0;
    for rel in paths {
        let path = resolve_under_root(root, rel)
            .map_err(|msg| io::Error::new(io::ErrorKind::InvalidInput, msg))?;
        let meta = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
        debug!("Removed {}", path);
        prune_empty_parents(root, &path);
    }
    Ok(removed)
}

fn prune_empty_parents(root: &Utf8Path, removed: &Utf8Path) {
    let mut dir = removed.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) {
            break;
        }
        // Fails on a non-empty directory, which ends the walk.
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}
