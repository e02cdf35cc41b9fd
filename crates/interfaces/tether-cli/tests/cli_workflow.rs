use camino::{Utf8Path, Utf8PathBuf};
use filetime::FileTime;
use tether_cli::commands::{self, write_changes, RemoteArgs};
use tether_cli::confirm::ConfirmPolicy;
use tether_cli::{EXIT_ALREADY_RUNNING, EXIT_CONFLICT};
use tether_core::SyncMark;
use tether_pipeline::{ScanOptions, SyncConfig};
use tether_pipeline::sync::transport::parse_change_lines;
use tokio_util::sync::CancellationToken;

fn utf8(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
}

fn put(root: &Utf8Path, rel: &str, body: &str, mtime: i64) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, body).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
}

fn config(local: &Utf8Path, remote: &Utf8Path) -> SyncConfig {
    let remote = RemoteArgs {
        root: remote.to_string(),
        ..Default::default()
    };
    SyncConfig::new(local.to_owned(), remote.into_spec())
}

const NO_PROMPTS: ConfirmPolicy = ConfirmPolicy {
    delete_local: false,
    delete_remote: false,
    interactive: false,
};

#[test]
fn changes_output_parses_back_on_the_other_side() {
    let dir = tempfile::tempdir().unwrap();
    let root = utf8(&dir);
    put(&root, "old.txt", "o", 50);
    put(&root, "docs/new file.md", "n", 200);
    std::fs::write(root.join(".tether-mark"), "100\n").unwrap();

    let mut out = Vec::new();
    let n = write_changes(&root, SyncMark(100), &ScanOptions::default(), &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert_eq!(n, 1);
    assert_eq!(text, "200\tdocs/new file.md\n");
    let parsed = parse_change_lines(&text).unwrap();
    assert_eq!(parsed.mtime("docs/new file.md"), Some(200));
}

#[tokio::test]
async fn conflict_exit_code_then_rename_succeeds() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let (local, remote) = (utf8(&local_dir), utf8(&remote_dir));
    put(&local, "b.txt", "mine", 150);
    put(&remote, "b.txt", "theirs", 160);

    let cfg = config(&local, &remote);
    let code = commands::cmd_sync(cfg.clone(), false, NO_PROMPTS, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(code, EXIT_CONFLICT);

    let status = commands::cmd_sync(cfg.clone(), true, NO_PROMPTS, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, 0);

    let mut renaming = cfg;
    renaming.auto_rename = true;
    let code = commands::cmd_sync(renaming, false, NO_PROMPTS, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(code, 0);
    assert_eq!(std::fs::read_to_string(local.join("b.txt")).unwrap(), "theirs");
}

#[tokio::test]
async fn locked_root_exits_with_already_running() {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    let (local, remote) = (utf8(&local_dir), utf8(&remote_dir));
    let _lock = tether_persistence::RoundLock::acquire(&local).unwrap();

    let code = commands::cmd_sync(
        config(&local, &remote),
        false,
        NO_PROMPTS,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(code, EXIT_ALREADY_RUNNING);
}
