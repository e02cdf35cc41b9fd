use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use filetime::FileTime;
use tempfile::TempDir;
use tether_core::{DeletionSet, Side, SyncMark, MARK_FILE_NAME};
use tether_persistence::{FileMarkStore, MarkStore, RoundLock};
use tether_pipeline::{
    Confirm, PresetConfirm, RemoteSpec, RoundState, SyncConfig, SyncEngine, SyncError,
};
use tokio_util::sync::CancellationToken;

struct Replicas {
    _local: TempDir,
    _remote: TempDir,
    local: Utf8PathBuf,
    remote: Utf8PathBuf,
}

fn replicas() -> Replicas {
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();
    Replicas {
        local: Utf8PathBuf::from_path_buf(local_dir.path().to_path_buf()).unwrap(),
        remote: Utf8PathBuf::from_path_buf(remote_dir.path().to_path_buf()).unwrap(),
        _local: local_dir,
        _remote: remote_dir,
    }
}

impl Replicas {
    fn config(&self) -> SyncConfig {
        let mut cfg = SyncConfig::new(self.local.clone(), RemoteSpec::directory(self.remote.as_str()));
        cfg.host_id = "testhost".into();
        cfg
    }

    fn marks(&self, local: u64, remote: u64) {
        FileMarkStore.write(&self.local, SyncMark(local)).unwrap();
        FileMarkStore.write(&self.remote, SyncMark(remote)).unwrap();
    }

    fn local_mark(&self) -> SyncMark {
        FileMarkStore.read(&self.local).unwrap()
    }

    fn remote_mark(&self) -> SyncMark {
        FileMarkStore.read(&self.remote).unwrap()
    }
}

fn put(root: &Utf8Path, rel: &str, body: &str, mtime: i64) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, body).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
}

fn read(root: &Utf8Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn now() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

/// Answers deletions from a preset and remembers every set it was asked about.
#[derive(Default)]
struct RecordingConfirm {
    answers: PresetConfirm,
    asked: Mutex<Vec<DeletionSet>>,
}

impl RecordingConfirm {
    fn new(answers: PresetConfirm) -> Arc<Self> {
        Arc::new(Self {
            answers,
            asked: Mutex::new(Vec::new()),
        })
    }

    fn asked(&self) -> Vec<DeletionSet> {
        self.asked.lock().unwrap().clone()
    }
}

impl Confirm for RecordingConfirm {
    fn approve_deletions(&self, set: &DeletionSet) -> bool {
        self.asked.lock().unwrap().push(set.clone());
        self.answers.approve_deletions(set)
    }
}

#[tokio::test]
async fn local_edit_is_pushed_and_marks_advance() {
    init_tracing();
    let r = replicas();
    put(&r.local, "base.txt", "same", 50);
    put(&r.remote, "base.txt", "same", 50);
    put(&r.local, "a.txt", "edited", 150);
    r.marks(100, 100);

    let before = now();
    let engine = SyncEngine::new(&r.config(), Arc::new(PresetConfirm::deny_all()));
    let report = engine
        .run_round(&r.config(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.since, SyncMark(100));
    assert_eq!(report.plan.push_list(), vec!["a.txt".to_string()]);
    assert!(report.plan.pull.is_empty());
    assert_eq!(read(&r.remote, "a.txt"), "edited");
    assert!(report.new_mark.secs() >= before);
    assert_eq!(r.local_mark(), report.new_mark);
    assert_eq!(r.remote_mark(), report.new_mark);
    assert_eq!(report.history.last(), Some(&RoundState::Done));
    assert!(!r.local.join(".tether.lock").exists());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["plan"]["push"][0], "a.txt");
    assert_eq!(json["new_mark"], report.new_mark.secs());
}

#[tokio::test]
async fn second_round_without_edits_is_quiet() {
    let r = replicas();
    put(&r.local, "a.txt", "one", 150);
    put(&r.remote, "docs/b.txt", "two", 160);
    r.marks(100, 100);

    let confirm = RecordingConfirm::new(PresetConfirm::deny_all());
    let engine = SyncEngine::new(&r.config(), confirm.clone());
    let cancel = CancellationToken::new();
    let first = engine.run_round(&r.config(), &cancel).await.unwrap();
    assert_eq!(first.plan.pull_list(), vec!["docs/b.txt".to_string()]);
    assert_eq!(read(&r.local, "docs/b.txt"), "two");

    let second = engine.run_round(&r.config(), &cancel).await.unwrap();
    assert!(second.is_quiet(), "unexpected work: {:?}", second.plan);
    assert!(second.new_mark >= first.new_mark);
    assert!(confirm.asked().is_empty());
}

#[tokio::test]
async fn both_sides_edited_blocks_without_auto_rename() {
    let r = replicas();
    put(&r.local, "b.txt", "mine", 150);
    put(&r.remote, "b.txt", "theirs", 160);
    r.marks(100, 100);

    let engine = SyncEngine::new(&r.config(), Arc::new(PresetConfirm::deny_all()));
    let failure = engine
        .run_round(&r.config(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.phase, RoundState::Blocked);
    match &failure.error {
        SyncError::ConflictBlocked { paths } => assert_eq!(paths, &vec!["b.txt".to_string()]),
        other => panic!("expected ConflictBlocked, got {other:?}"),
    }
    assert_eq!(failure.history.last(), Some(&RoundState::Aborted));
    assert_eq!(read(&r.local, "b.txt"), "mine");
    assert_eq!(read(&r.remote, "b.txt"), "theirs");
    assert_eq!(r.local_mark(), SyncMark(100));
    assert_eq!(r.remote_mark(), SyncMark(100));
}

#[tokio::test]
async fn auto_rename_keeps_both_versions() {
    let r = replicas();
    put(&r.local, "b.txt", "mine", 150);
    put(&r.remote, "b.txt", "theirs", 160);
    r.marks(100, 100);

    let mut cfg = r.config();
    cfg.auto_rename = true;
    let engine = SyncEngine::new(&cfg, Arc::new(PresetConfirm::deny_all()));
    let report = engine
        .run_round(&cfg, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.conflict_copies.len(), 1);
    let copy = &report.conflict_copies[0];
    assert_eq!(copy.original, "b.txt");
    assert!(
        copy.renamed.starts_with("b.txt_SYNC_CONFLICT_testhost_"),
        "{}",
        copy.renamed
    );
    assert!(report.plan.pull.contains("b.txt"));
    assert!(report.plan.push.contains(&copy.renamed));
    assert!(report.plan.conflicts.is_empty());

    assert_eq!(read(&r.local, "b.txt"), "theirs");
    assert_eq!(read(&r.local, &copy.renamed), "mine");
    assert_eq!(read(&r.remote, &copy.renamed), "mine");
    assert_eq!(r.local_mark(), report.new_mark);
}

#[tokio::test]
async fn rejected_deletion_is_retained_and_offered_again() {
    let r = replicas();
    put(&r.local, "keep.txt", "k", 50);
    put(&r.remote, "keep.txt", "k", 50);
    put(&r.local, "c.txt", "gone remotely", 50);
    r.marks(100, 100);

    let confirm = RecordingConfirm::new(PresetConfirm::deny_all());
    let engine = SyncEngine::new(&r.config(), confirm.clone());
    let cancel = CancellationToken::new();

    let first = engine.run_round(&r.config(), &cancel).await.unwrap();
    assert_eq!(first.local_deletions.planned, vec!["c.txt".to_string()]);
    assert!(!first.local_deletions.approved);
    assert_eq!(first.local_deletions.retained(), ["c.txt".to_string()]);
    assert!(r.local.join("c.txt").exists());

    let second = engine.run_round(&r.config(), &cancel).await.unwrap();
    assert_eq!(second.local_deletions.planned, vec!["c.txt".to_string()]);

    let asked = confirm.asked();
    assert_eq!(asked.len(), 2);
    assert!(asked.iter().all(|s| s.destination == Side::Local && s.contains("c.txt")));
}

#[tokio::test]
async fn approved_deletion_removes_local_file() {
    let r = replicas();
    put(&r.local, "keep.txt", "k", 50);
    put(&r.remote, "keep.txt", "k", 50);
    put(&r.local, "old/c.txt", "gone remotely", 50);
    r.marks(100, 100);

    let confirm = PresetConfirm {
        delete_local: true,
        delete_remote: false,
    };
    let engine = SyncEngine::new(&r.config(), Arc::new(confirm));
    let report = engine
        .run_round(&r.config(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.local_deletions.deleted, 1);
    assert!(!r.local.join("old/c.txt").exists());
    assert!(!r.local.join("old").exists());
    assert!(r.local.join("keep.txt").exists());
    assert!(r.local.join(MARK_FILE_NAME).exists());
}

#[tokio::test]
async fn remote_only_file_is_not_deleted_without_approval() {
    let r = replicas();
    put(&r.remote, "extra.txt", "remote only", 50);
    r.marks(100, 100);

    let engine = SyncEngine::new(&r.config(), Arc::new(PresetConfirm::deny_all()));
    let report = engine
        .run_round(&r.config(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.remote_deletions.planned, vec!["extra.txt".to_string()]);
    assert_eq!(report.remote_deletions.deleted, 0);
    assert_eq!(read(&r.remote, "extra.txt"), "remote only");
}

#[tokio::test]
async fn marks_never_move_backwards() {
    let r = replicas();
    let future = now() + 10_000;
    r.marks(100, future);

    let engine = SyncEngine::new(&r.config(), Arc::new(PresetConfirm::deny_all()));
    let report = engine
        .run_round(&r.config(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.since, SyncMark(100));
    assert_eq!(report.new_mark, SyncMark(future));
    assert_eq!(r.local_mark(), SyncMark(future));
}

#[tokio::test]
async fn cancelled_round_leaves_marks_alone() {
    let r = replicas();
    put(&r.local, "a.txt", "edited", 150);
    r.marks(100, 100);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let engine = SyncEngine::new(&r.config(), Arc::new(PresetConfirm::approve_all()));
    let failure = engine.run_round(&r.config(), &cancel).await.unwrap_err();

    assert!(matches!(failure.error, SyncError::Cancelled));
    assert_eq!(failure.phase, RoundState::Scanning);
    assert!(!r.remote.join("a.txt").exists());
    assert_eq!(r.local_mark(), SyncMark(100));
    assert_eq!(r.remote_mark(), SyncMark(100));
}

#[tokio::test]
async fn held_lock_refuses_a_second_round() {
    let r = replicas();
    let _held = RoundLock::acquire(&r.local).unwrap();

    let engine = SyncEngine::new(&r.config(), Arc::new(PresetConfirm::deny_all()));
    let failure = engine
        .run_round(&r.config(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, SyncError::AlreadyRunning(_)));
    assert_eq!(failure.phase, RoundState::Idle);
}

#[tokio::test]
async fn status_changes_nothing() {
    let r = replicas();
    put(&r.local, "b.txt", "mine", 150);
    put(&r.remote, "b.txt", "theirs", 160);
    put(&r.local, "a.txt", "new", 150);
    r.marks(100, 100);

    let mut cfg = r.config();
    cfg.auto_rename = true;
    let engine = SyncEngine::new(&cfg, Arc::new(PresetConfirm::approve_all()));
    let status = engine
        .status(&cfg, &CancellationToken::new())
        .await
        .unwrap();

    assert!(status.conflicts.contains("b.txt"));
    assert!(status.plan.push.contains("a.txt"));
    assert!(!r.remote.join("a.txt").exists());
    assert_eq!(read(&r.local, "b.txt"), "mine");
    assert_eq!(r.local_mark(), SyncMark(100));
    assert_eq!(r.remote_mark(), SyncMark(100));
    assert_eq!(std::fs::read_dir(&r.local).unwrap().count(), 3);
}

#[tokio::test]
async fn status_leaves_a_corrupt_remote_mark_in_place() {
    let r = replicas();
    FileMarkStore.write(&r.local, SyncMark(100)).unwrap();
    std::fs::write(r.remote.join(MARK_FILE_NAME), "not a mark").unwrap();

    let engine = SyncEngine::new(&r.config(), Arc::new(PresetConfirm::deny_all()));
    let status = engine
        .status(&r.config(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status.remote_mark, SyncMark::NEVER);
    assert_eq!(read(&r.remote, MARK_FILE_NAME), "not a mark");
    assert_eq!(std::fs::read_dir(&r.remote).unwrap().count(), 1);
}

#[tokio::test]
async fn directories_changed_on_both_sides_merge_their_contents() {
    let r = replicas();
    put(&r.local, "d/x.txt", "local", 150);
    put(&r.remote, "d/y.txt", "remote", 160);
    r.marks(100, 100);

    let mut cfg = r.config();
    cfg.scan.include_dirs = true;
    let confirm = RecordingConfirm::new(PresetConfirm::deny_all());
    let engine = SyncEngine::new(&cfg, confirm.clone());
    let cancel = CancellationToken::new();

    let status = engine.status(&cfg, &cancel).await.unwrap();
    assert!(status.conflicts.is_empty());

    let report = engine.run_round(&cfg, &cancel).await.unwrap();
    assert!(report.conflict_copies.is_empty());
    assert_eq!(report.plan.push_list(), vec!["d/x.txt".to_string()]);
    assert_eq!(report.plan.pull_list(), vec!["d/y.txt".to_string()]);
    assert_eq!(read(&r.remote, "d/x.txt"), "local");
    assert_eq!(read(&r.local, "d/y.txt"), "remote");
    assert!(report.local_deletions.planned.is_empty());
    assert!(report.remote_deletions.planned.is_empty());

    let second = engine.run_round(&cfg, &cancel).await.unwrap();
    assert!(second.plan.push.iter().all(|p| p == "d"), "{:?}", second.plan);
    assert!(second.plan.pull.iter().all(|p| p == "d"), "{:?}", second.plan);
    assert!(confirm.asked().is_empty());
}

#[tokio::test]
async fn missing_local_root_is_a_config_error() {
    let r = replicas();
    let mut cfg = r.config();
    cfg.local_root = r.local.join("nope");

    let engine = SyncEngine::new(&cfg, Arc::new(PresetConfirm::deny_all()));
    let failure = engine
        .run_round(&cfg, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, SyncError::Config(_)));
}

#[cfg(unix)]
mod symlinks {
    use super::*;
    use tether_pipeline::SymlinkPolicy;

    #[tokio::test]
    async fn excluded_links_stay_local() {
        let r = replicas();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("target.txt");
        std::fs::write(&target, "outside").unwrap();
        std::os::unix::fs::symlink(&target, r.local.join("link.txt")).unwrap();
        put(&r.local, "plain.txt", "plain", 150);

        let engine = SyncEngine::new(&r.config(), Arc::new(PresetConfirm::deny_all()));
        let report = engine
            .run_round(&r.config(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.plan.push_list(), vec!["plain.txt".to_string()]);
        assert_eq!(report.local_scan.symlinks_skipped, 1);
        assert!(!r.remote.join("link.txt").exists());
    }

    #[tokio::test]
    async fn resolved_links_arrive_as_files() {
        let r = replicas();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("target.txt");
        std::fs::write(&target, "outside").unwrap();
        std::os::unix::fs::symlink(&target, r.local.join("link.txt")).unwrap();

        let mut cfg = r.config();
        cfg.scan.symlinks = SymlinkPolicy::Resolve;
        let engine = SyncEngine::new(&cfg, Arc::new(PresetConfirm::deny_all()));
        engine
            .run_round(&cfg, &CancellationToken::new())
            .await
            .unwrap();

        let pushed = r.remote.join("link.txt");
        assert!(!std::fs::symlink_metadata(&pushed).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&pushed).unwrap(), "outside");
    }
}
