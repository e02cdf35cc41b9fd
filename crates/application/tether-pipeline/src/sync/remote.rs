use camino::Utf8Path;
use tether_core::path_utils::TetherPath;
use tether_core::{ChangeSet, DeletionSet, Side, SyncMark, MARK_FILE_NAME};
use tether_infra::process::{run, CommandSpec};
use tether_infra::rsync::{parse_itemized_deletions, LinkMode, RsyncEndpoint, RsyncInvocation};
use tether_infra::ssh::{quote_words, SshTarget};
use tether_scanner::{ScanOptions, SymlinkPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::sync::transport::{parse_change_lines, Transport, TransportError};
use crate::sync::RemoteSpec;

/// A replica on another host: discovery through `tether changes` over ssh, bytes through
/// rsync, deletions through `rm` over ssh.
#[derive(Debug, Clone)]
pub struct SshTransport {
    spec: RemoteSpec,
    scan: ScanOptions,
}

impl SshTransport {
    pub fn new(spec: RemoteSpec, scan: ScanOptions) -> Self {
        Self { spec, scan }
    }

    fn target(&self) -> SshTarget {
        SshTarget {
            host: self.spec.host.clone().unwrap_or_default(),
            user: self.spec.user.clone(),
            port: self.spec.port,
            identity_file: self.spec.identity_file.clone(),
        }
    }

    fn links(&self) -> LinkMode {
        match self.scan.symlinks {
            SymlinkPolicy::Exclude => LinkMode::Skip,
            SymlinkPolicy::Resolve => LinkMode::Copy,
        }
    }

    fn remote_endpoint(&self) -> RsyncEndpoint {
        RsyncEndpoint::Remote {
            target: self.target(),
            root: self.spec.root.clone(),
        }
    }

    fn pull_invocation(&self, local_root: &Utf8Path) -> RsyncInvocation {
        RsyncInvocation::new(
            self.remote_endpoint(),
            RsyncEndpoint::Local(local_root.to_owned()),
            self.links(),
        )
    }

    fn push_invocation(&self, local_root: &Utf8Path) -> RsyncInvocation {
        RsyncInvocation::new(
            RsyncEndpoint::Local(local_root.to_owned()),
            self.remote_endpoint(),
            self.links(),
        )
    }

    /// `tether changes` command line as run on the remote host.
    pub fn changes_command(&self, since: SyncMark) -> Result<CommandSpec, TransportError> {
        let since = since.secs().to_string();
        let mut words = vec![
            self.spec.remote_bin.as_str(),
            "changes",
            "--root",
            self.spec.root.as_str(),
            "--since",
            since.as_str(),
            "--symlinks",
            self.scan.symlinks.as_str(),
        ];
        if self.scan.include_dirs {
            words.push("--include-dirs");
        }
        Ok(self.target().command(&words)?)
    }

    /// `cd <root> && rm -rf -- <paths>`, every word quoted.
    pub fn delete_command(&self, set: &DeletionSet) -> Result<CommandSpec, TransportError> {
        for path in set.iter() {
            if !TetherPath::verify_safe(path) || TetherPath::is_reserved(path) {
                return Err(TransportError::Unsafe(format!(
                    "refusing to delete remote path {path:?}"
                )));
            }
        }
        let cd = quote_words(&["cd", self.spec.root.as_str()])?;
        let mut rm = vec!["rm", "-rf", "--"];
        rm.extend(set.iter());
        let rm = quote_words(&rm)?;
        Ok(self.target().shell(format!("{cd} && {rm}")))
    }
}

#[async_trait::async_trait]
impl Transport for SshTransport {
    fn describe(&self) -> String {
        self.spec.display()
    }

    async fn read_mark(&self, cancel: &CancellationToken) -> Result<SyncMark, TransportError> {
        let words = [
            self.spec.remote_bin.as_str(),
            "mark",
            self.spec.root.as_str(),
        ];
        let out = run(&self.target().command(&words)?, cancel).await?;
        SyncMark::parse(&out.stdout)
            .ok_or_else(|| TransportError::Mark(format!("unparseable remote mark {:?}", out.stdout)))
    }

    async fn list_changes(
        &self,
        since: SyncMark,
        cancel: &CancellationToken,
    ) -> Result<ChangeSet, TransportError> {
        let out = run(&self.changes_command(since)?, cancel).await?;
        let set = parse_change_lines(&out.stdout)?;
        info!("{} reported {} changes since {}", self.describe(), set.len(), since);
        Ok(set)
    }

    async fn pull(
        &self,
        local_root: &Utf8Path,
        files: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if files.is_empty() {
            return Ok(());
        }
        let spec = self.pull_invocation(local_root).transfer(files, true)?;
        run(&spec, cancel).await?;
        Ok(())
    }

    async fn push(
        &self,
        local_root: &Utf8Path,
        files: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        if files.is_empty() {
            return Ok(());
        }
        let spec = self.push_invocation(local_root).transfer(files, true)?;
        run(&spec, cancel).await?;
        Ok(())
    }

    async fn push_mark(
        &self,
        local_root: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let spec = self
            .push_invocation(local_root)
            .transfer(&[MARK_FILE_NAME], false)?;
        run(&spec, cancel).await?;
        Ok(())
    }

    async fn plan_deletions(
        &self,
        local_root: &Utf8Path,
        destination: Side,
        cancel: &CancellationToken,
    ) -> Result<DeletionSet, TransportError> {
        let invocation = match destination {
            Side::Local => self.pull_invocation(local_root),
            Side::Remote => self.push_invocation(local_root),
        };
        let out = run(&invocation.deletion_dry_run()?, cancel).await?;

        let mut set = DeletionSet::new(destination);
        for path in parse_itemized_deletions(&out.stdout) {
            let path = TetherPath::normalize(&path);
            if TetherPath::is_reserved(&path) || !TetherPath::verify_safe(&path) {
                continue;
            }
            set.insert(path);
        }
        debug!("Dry run found {} {} deletions", set.len(), destination);
        Ok(set)
    }

    async fn delete_remote(
        &self,
        set: &DeletionSet,
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError> {
        if set.is_empty() {
            return Ok(0);
        }
        run(&self.delete_command(set)?, cancel).await?;
        Ok(set.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> SshTransport {
        SshTransport::new(
            RemoteSpec {
                host: Some("nas".into()),
                user: Some("ann".into()),
                port: None,
                identity_file: None,
                root: "/srv/shared docs".into(),
                remote_bin: "tether".into(),
            },
            ScanOptions::default(),
        )
    }

    #[test]
    fn changes_command_quotes_the_remote_root() {
        let spec = transport().changes_command(SyncMark(100)).unwrap();
        assert_eq!(spec.program, "ssh");
        assert_eq!(
            spec.args.last().unwrap(),
            "tether changes --root '/srv/shared docs' --since 100 --symlinks exclude"
        );
    }

    #[test]
    fn delete_command_quotes_every_path() {
        let mut set = DeletionSet::new(Side::Remote);
        set.insert("c.txt");
        set.insert("it's here.txt");
        let spec = transport().delete_command(&set).unwrap();
        let script = spec.args.last().unwrap();
        assert!(script.starts_with("cd '/srv/shared docs' && rm -rf -- "));
        assert!(script.contains("c.txt"));
        assert!(!script.contains(" it's here.txt"), "unquoted path in {script}");
    }

    #[test]
    fn delete_command_refuses_escaping_paths() {
        let mut set = DeletionSet::new(Side::Remote);
        set.insert("../outside");
        assert!(matches!(
            transport().delete_command(&set),
            Err(TransportError::Unsafe(_))
        ));
    }
}
