use camino::Utf8Path;
use tether_core::path_utils::TetherPath;
use tether_core::{ChangeSet, DeletionSet, Side, SyncMark};
use tether_infra::process::ProcessError;
use tether_infra::ssh::QuoteError;
use tether_scanner::ScannerError;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Quote(#[from] QuoteError),
    #[error("malformed discovery output at line {line}: {content:?}")]
    Protocol { line: usize, content: String },
    #[error("scan error: {0}")]
    Scan(#[from] ScannerError),
    #[error("mark error: {0}")]
    Mark(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Security: {0}")]
    Unsafe(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TransportError::Cancelled
                | TransportError::Process(ProcessError::Cancelled { .. })
                | TransportError::Scan(ScannerError::Cancelled)
        )
    }
}

/// Reaches the remote replica: discovery, transfer in either direction, deletion.
///
/// Local-side paths are always relative to the `local_root` passed in; remote-side
/// paths are relative to the root the transport was built for.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable remote location, for logs.
    fn describe(&self) -> String;

    /// The remote replica's Sync Mark.
    async fn read_mark(&self, cancel: &CancellationToken) -> Result<SyncMark, TransportError>;

    /// Remote paths modified strictly after `since`.
    async fn list_changes(
        &self,
        since: SyncMark,
        cancel: &CancellationToken,
    ) -> Result<ChangeSet, TransportError>;

    /// remote -> local. A local file newer than the remote one is kept.
    async fn pull(
        &self,
        local_root: &Utf8Path,
        files: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    /// local -> remote. A remote file newer than the local one is kept.
    async fn push(
        &self,
        local_root: &Utf8Path,
        files: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    /// Copy the local mark file over the remote one, unconditionally.
    async fn push_mark(
        &self,
        local_root: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    /// Dry run: paths present on `destination` but absent from the other side, across the
    /// whole tree. Reserved names are never included.
    async fn plan_deletions(
        &self,
        local_root: &Utf8Path,
        destination: Side,
        cancel: &CancellationToken,
    ) -> Result<DeletionSet, TransportError>;

    /// Remove remote paths. Returns how many were removed.
    async fn delete_remote(
        &self,
        set: &DeletionSet,
        cancel: &CancellationToken,
    ) -> Result<usize, TransportError>;
}

/// One line of `tether changes` output.
pub fn format_change_line(path: &str, mtime: u64) -> String {
    format!("{mtime}\t{path}")
}

/// Parse `tether changes` output: `<mtime>\t<path>` per line. Blank lines are ignored;
/// anything else that does not parse fails the whole listing.
pub fn parse_change_lines(output: &str) -> Result<ChangeSet, TransportError> {
    let mut set = ChangeSet::new();
    for (idx, line) in output.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let malformed = || TransportError::Protocol {
            line: idx + 1,
            content: line.to_string(),
        };

        let (mtime, path) = line.split_once('\t').ok_or_else(malformed)?;
        let mtime: u64 = mtime.parse().map_err(|_| malformed())?;
        let path = TetherPath::normalize(path);
        if !TetherPath::verify_safe(&path) {
            return Err(malformed());
        }
        if TetherPath::is_reserved(&path) {
            continue;
        }
        set.insert(path, mtime);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        let out = "150\ta.txt\n\n1700000000\tdir/with space.md\n";
        let set = parse_change_lines(out).unwrap();
        assert_eq!(set.mtime("a.txt"), Some(150));
        assert_eq!(set.mtime("dir/with space.md"), Some(1_700_000_000));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn path_may_contain_tabs() {
        let set = parse_change_lines("5\tweird\tname").unwrap();
        assert!(set.contains("weird\tname"));
    }

    #[test]
    fn malformed_line_fails_discovery() {
        for bad in ["no-tab-here", "abc\tpath", "-1\tpath", "10\t../escape", "10\t/abs"] {
            let err = parse_change_lines(&format!("1\tok\n{bad}\n")).unwrap_err();
            match err {
                TransportError::Protocol { line, .. } => assert_eq!(line, 2, "{bad}"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn reserved_names_are_dropped() {
        let set = parse_change_lines("9\t.tether-mark\n9\tb").unwrap();
        assert_eq!(set.paths().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn format_round_trips_through_parse() {
        let line = format_change_line("x/y.txt", 42);
        assert_eq!(line, "42\tx/y.txt");
        assert_eq!(parse_change_lines(&line).unwrap().mtime("x/y.txt"), Some(42));
    }
}
