use camino::{Utf8Path, Utf8PathBuf};
use tether_core::deletions::destination_only;
use tether_core::{ChangeSet, DeletionSet, Side, SyncMark, MARK_FILE_NAME};
use tether_persistence::FileMarkStore;
use tether_scanner::{ScanOptions, Scanner, SymlinkPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::io_utils::{
    cancel_flag, copy_preserving_mtime, remove_under_root, resolve_under_root, CopyOutcome,
};
use crate::sync::transport::{Transport, TransportError};

/// A replica that is a directory on this machine (a mount, a second disk, a test
/// fixture). Does in-process what `SshTransport` does with ssh and rsync.
#[derive(Debug, Clone)]
pub struct DirTransport {
    root: Utf8PathBuf,
    scan: ScanOptions,
}

impl DirTransport {
    pub fn new(root: Utf8PathBuf, scan: ScanOptions) -> Self {
        Self { root, scan }
    }

    fn follow_links(&self) -> bool {
        self.scan.symlinks == SymlinkPolicy::Resolve
    }

    async fn copy_files(
        &self,
        from_root: Utf8PathBuf,
        to_root: Utf8PathBuf,
        files: Vec<String>,
        update: bool,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let follow = self.follow_links();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || -> Result<(), TransportError> {
            let mut copied = 0usize;
            for rel in &files {
                if cancel.is_cancelled() {
                    return Err(TransportError::Cancelled);
                }
                let src = resolve_under_root(&from_root, rel).map_err(TransportError::Unsafe)?;
                let dst = resolve_under_root(&to_root, rel).map_err(TransportError::Unsafe)?;
                match copy_preserving_mtime(&src, &dst, update, follow)? {
                    CopyOutcome::Copied => copied += 1,
                    CopyOutcome::KeptNewer => debug!("Destination newer, kept {}", dst),
                    CopyOutcome::Skipped => debug!("Skipped {}", src),
                }
            }
            info!("Copied {}/{} files {} -> {}", copied, files.len(), from_root, to_root);
            Ok(())
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))?
    }
}

#[async_trait::async_trait]
impl Transport for DirTransport {
    fn describe(&self) -> String {
        self.root.to_string()
    }

    async fn read_mark(&self, _cancel: &CancellationToken) -> Result<SyncMark, TransportError> {
        FileMarkStore
            .peek(&self.root)
            .map_err(|e| TransportError::Mark(e.to_string()))
    }

    async fn list_changes(
        &self,
        since: SyncMark,
        cancel: &CancellationToken,
    ) -> Result<ChangeSet, TransportError> {
        let root = self.root.clone();
        let opts = self.scan;
        let (flag, bridge) = cancel_flag(cancel);
        let out = tokio::task::spawn_blocking(move || {
            Scanner::scan_changes(&root, since, &opts, Some(flag))
        })
        .await;
        bridge.abort();
        let out = out.map_err(|e| TransportError::Io(std::io::Error::other(e)))??;
        Ok(out.changes)
    }

    async fn pull(
        &self,
        local_root: &Utf8Path,
        files: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        self.copy_files(
            self.root.clone(),
            local_root.to_owned(),
            files.to_vec(),
            true,
            cancel,
        )
        .await
    }

    async fn push(
        &self,
        local_root: &Utf8Path,
        files: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        self.copy_files(
            local_root.to_owned(),
            self.root.clone(),
            files.to_vec(),
            true,
            cancel,
        )
        .await
    }

    async fn push_mark(
        &self,
        local_root: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        self.copy_files(
            local_root.to_owned(),
            self.root.clone(),
            vec![MARK_FILE_NAME.to_string()],
            false,
            cancel,
        )
        .await
    }

    async fn plan_deletions(
        &self,
        local_root: &Utf8Path,
        destination: Side,
        cancel: &CancellationToken,
    ) -> Result<DeletionSet, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let local_root = local_root.to_owned();
        let remote_root = self.root.clone();
        let opts = self.scan;
        tokio::task::spawn_blocking(move || -> Result<DeletionSet, TransportError> {
            let local = Scanner::list_tree(&local_root, &opts)?;
            let remote = Scanner::list_tree(&remote_root, &opts)?;
            Ok(match destination {
                Side::Local => destination_only(&remote, &local, Side::Local),
                Side::Remote => destination_only(&local, &remote, Side::Remote),
            })
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))?
    }

    async fn delete_remote(
        &self,
        set: &DeletionSet,
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let root = self.root.clone();
        let paths = set.to_vec();
        tokio::task::spawn_blocking(move || remove_under_root(&root, paths.iter().map(String::as_str)))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?
            .map_err(TransportError::from)
    }
}
