//! rsync command lines and output parsing.
//!
//! Transfers always name their files explicitly through `--files-from`; rsync is only
//! asked to move bytes, never to decide what changed.

use camino::Utf8PathBuf;
use tether_core::RESERVED_NAMES;

use crate::process::CommandSpec;
use crate::ssh::{QuoteError, SshTarget};

/// "Some files vanished before they could be transferred".
pub const RSYNC_VANISHED: i32 = 24;

/// How rsync treats symbolic links it meets in the file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// `--no-links`
    Skip,
    /// `--copy-links`: transfer the target's contents.
    Copy,
}

impl LinkMode {
    fn flag(self) -> &'static str {
        match self {
            LinkMode::Skip => "--no-links",
            LinkMode::Copy => "--copy-links",
        }
    }
}

/// One side of an rsync invocation: a replica root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RsyncEndpoint {
    Local(Utf8PathBuf),
    Remote { target: SshTarget, root: String },
}

impl RsyncEndpoint {
    /// Root with a trailing slash, so rsync copies contents rather than the directory.
    fn path_arg(&self) -> String {
        match self {
            RsyncEndpoint::Local(root) => with_slash(root.as_str()),
            RsyncEndpoint::Remote { target, root } => target.rsync_path(&with_slash(root)),
        }
    }

    fn target(&self) -> Option<&SshTarget> {
        match self {
            RsyncEndpoint::Local(_) => None,
            RsyncEndpoint::Remote { target, .. } => Some(target),
        }
    }
}

fn with_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

#[derive(Debug, Clone)]
pub struct RsyncInvocation {
    pub program: String,
    pub source: RsyncEndpoint,
    pub destination: RsyncEndpoint,
    pub links: LinkMode,
}

impl RsyncInvocation {
    pub fn new(source: RsyncEndpoint, destination: RsyncEndpoint, links: LinkMode) -> Self {
        Self {
            program: "rsync".to_string(),
            source,
            destination,
            links,
        }
    }

    fn base(&self) -> Result<CommandSpec, QuoteError> {
        let mut spec = CommandSpec::new(self.program.clone())
            .arg("-a")
            .arg("--protect-args")
            .arg(self.links.flag());
        if let Some(target) = self.source.target().or(self.destination.target()) {
            spec = spec.arg("-e").arg(target.rsh()?);
        }
        Ok(spec)
    }

    /// Copy exactly `files` (relative paths) from source to destination. With `update`,
    /// a destination file newer than the source is left alone.
    pub fn transfer<S: AsRef<str>>(&self, files: &[S], update: bool) -> Result<CommandSpec, QuoteError> {
        let mut list = Vec::new();
        for f in files {
            list.extend_from_slice(f.as_ref().as_bytes());
            list.push(0);
        }

        let mut spec = self.base()?;
        if update {
            spec = spec.arg("--update");
        }
        Ok(spec
            .arg("--from0")
            .arg("--files-from=-")
            .arg(self.source.path_arg())
            .arg(self.destination.path_arg())
            .stdin(list)
            .accept_code(RSYNC_VANISHED))
    }

    /// Non-destructive listing of what `--delete` would remove from the destination.
    pub fn deletion_dry_run(&self) -> Result<CommandSpec, QuoteError> {
        let mut spec = self
            .base()?
            .arg("--dry-run")
            .arg("--delete")
            .arg("--itemize-changes");
        for name in RESERVED_NAMES {
            spec = spec.arg(format!("--exclude=/{name}"));
        }
        Ok(spec
            .arg(self.source.path_arg())
            .arg(self.destination.path_arg())
            .accept_code(RSYNC_VANISHED))
    }
}

/// Relative paths from the `*deleting` lines of `--itemize-changes` output.
/// Directory entries lose their trailing slash.
pub fn parse_itemized_deletions(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("*deleting"))
        .map(|rest| rest.trim_start_matches(' '))
        .map(|path| path.trim_end_matches('/'))
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> RsyncEndpoint {
        RsyncEndpoint::Remote {
            target: SshTarget {
                user: Some("bob".into()),
                ..SshTarget::new("nas")
            },
            root: "/data/docs".into(),
        }
    }

    #[test]
    fn pull_lists_files_nul_separated_on_stdin() {
        let inv = RsyncInvocation::new(
            remote(),
            RsyncEndpoint::Local(Utf8PathBuf::from("/home/bob/docs")),
            LinkMode::Skip,
        );
        let spec = inv.transfer(&["a.txt", "dir/b c.txt"], true).unwrap();

        assert_eq!(spec.program, "rsync");
        assert_eq!(
            spec.args,
            vec![
                "-a",
                "--protect-args",
                "--no-links",
                "-e",
                "ssh -l bob",
                "--update",
                "--from0",
                "--files-from=-",
                "nas:/data/docs/",
                "/home/bob/docs/",
            ]
        );
        assert_eq!(spec.stdin.as_deref(), Some(&b"a.txt\0dir/b c.txt\0"[..]));
        assert!(spec.ok_codes.contains(&RSYNC_VANISHED));
    }

    #[test]
    fn local_only_invocation_has_no_remote_shell() {
        let inv = RsyncInvocation::new(
            RsyncEndpoint::Local("/a".into()),
            RsyncEndpoint::Local("/b/".into()),
            LinkMode::Copy,
        );
        let spec = inv.transfer(&["x"], false).unwrap();
        assert!(!spec.args.iter().any(|a| a == "-e"));
        assert!(!spec.args.iter().any(|a| a == "--update"));
        assert!(spec.args.iter().any(|a| a == "--copy-links"));
        assert_eq!(spec.args[spec.args.len() - 2..], ["/a/", "/b/"]);
    }

    #[test]
    fn dry_run_excludes_reserved_names_at_root() {
        let inv = RsyncInvocation::new(
            RsyncEndpoint::Local("/src".into()),
            remote(),
            LinkMode::Skip,
        );
        let spec = inv.deletion_dry_run().unwrap();
        assert!(spec.args.contains(&"--dry-run".to_string()));
        assert!(spec.args.contains(&"--delete".to_string()));
        assert!(spec.args.contains(&"--exclude=/.tether-mark".to_string()));
        assert!(spec.args.contains(&"--exclude=/.tether.lock".to_string()));
        assert!(spec.stdin.is_none());
    }

    #[test]
    fn parses_deleting_lines_only() {
        let out = "\
*deleting   c.txt
*deleting   old dir/
*deleting   old dir/nested file.md
>f+++++++++ new.txt
cd+++++++++ fresh/
";
        assert_eq!(
            parse_itemized_deletions(out),
            vec!["c.txt", "old dir", "old dir/nested file.md"]
        );
    }
}
