use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tether_core::{
    detect, plan, ChangeSet, ConflictCopy, ConflictSet, Side, SyncMark, TransferPlan,
};
use tether_persistence::{FileMarkStore, MarkStore, RoundLock, StorageErrorKind};
use tether_scanner::{ScanStats, Scanner, ScannerError};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::io_utils::cancel_flag;
use crate::sync::reconcile::{Confirm, DeletionOutcome, DeletionReconciler};
use crate::sync::resolve::{conflict_stamp, drop_shared_directories, rename_conflicts};
use crate::sync::state::{RoundMachine, RoundState};
use crate::sync::transport::{Transport, TransportError};
use crate::sync::{transport_for, SyncConfig, SyncError};

/// Progress notifications for a UI. Dropped when the receiver lags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    Phase(RoundState),
    Discovered {
        since: SyncMark,
        local: usize,
        remote: usize,
    },
    ConflictsFound(Vec<String>),
    ConflictRenamed(ConflictCopy),
    Transferred {
        to: Side,
        files: usize,
    },
    DeletionsPlanned {
        side: Side,
        count: usize,
    },
    Deleted {
        side: Side,
        count: usize,
    },
    MarkCommitted(SyncMark),
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub local_mark: SyncMark,
    pub remote_mark: SyncMark,
    pub since: SyncMark,
    pub local_changes: ChangeSet,
    pub remote_changes: ChangeSet,
    pub local_scan: ScanStats,
    pub plan: TransferPlan,
    pub conflict_copies: Vec<ConflictCopy>,
    pub local_deletions: DeletionOutcome,
    pub remote_deletions: DeletionOutcome,
    pub new_mark: SyncMark,
    pub history: Vec<RoundState>,
}

impl RoundReport {
    /// Nothing transferred and nothing proposed for deletion.
    pub fn is_quiet(&self) -> bool {
        self.plan.is_empty()
            && self.local_deletions.planned.is_empty()
            && self.remote_deletions.planned.is_empty()
    }
}

/// Why a round stopped, and where.
#[derive(Debug, Clone, thiserror::Error)]
#[error("round aborted during {phase}: {error}")]
pub struct RoundFailure {
    pub phase: RoundState,
    pub error: SyncError,
    pub history: Vec<RoundState>,
}

/// What a round would do, without doing any of it.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub local_mark: SyncMark,
    pub remote_mark: SyncMark,
    pub since: SyncMark,
    pub local_changes: ChangeSet,
    pub remote_changes: ChangeSet,
    pub conflicts: ConflictSet,
    pub plan: TransferPlan,
}

struct Discovery {
    local_mark: SyncMark,
    remote_mark: SyncMark,
    since: SyncMark,
    local_changes: ChangeSet,
    local_scan: ScanStats,
    remote_changes: ChangeSet,
}

pub struct SyncEngine {
    transport: Arc<dyn Transport>,
    marks: Arc<dyn MarkStore>,
    confirm: Arc<dyn Confirm>,
    events: Option<Sender<RoundEvent>>,
}

impl SyncEngine {
    /// Engine for `config`'s remote, with marks in `.tether-mark` files.
    pub fn new(config: &SyncConfig, confirm: Arc<dyn Confirm>) -> Self {
        Self::with_components(transport_for(config), Arc::new(FileMarkStore::new()), confirm)
    }

    pub fn with_components(
        transport: Arc<dyn Transport>,
        marks: Arc<dyn MarkStore>,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        Self {
            transport,
            marks,
            confirm,
            events: None,
        }
    }

    pub fn with_events(mut self, tx: Sender<RoundEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, event: RoundEvent) {
        if let Some(tx) = &self.events {
            if tx.try_send(event).is_err() {
                debug!("Round event dropped");
            }
        }
    }

    fn advance(&self, machine: &mut RoundMachine, next: RoundState) -> Result<(), SyncError> {
        machine.advance(next)?;
        self.emit(RoundEvent::Phase(next));
        Ok(())
    }

    /// Run one full round. Marks move only if every phase succeeds.
    pub async fn run_round(
        &self,
        config: &SyncConfig,
        cancel: &CancellationToken,
    ) -> Result<RoundReport, RoundFailure> {
        let mut machine = RoundMachine::new();
        match self.drive(config, cancel, &mut machine).await {
            Ok(report) => Ok(report),
            Err(error) => {
                let phase = machine.abort();
                self.emit(RoundEvent::Phase(RoundState::Aborted));
                warn!("Round aborted during {}: {}", phase, error);
                Err(RoundFailure {
                    phase,
                    error,
                    history: machine.history().to_vec(),
                })
            }
        }
    }

    async fn drive(
        &self,
        config: &SyncConfig,
        cancel: &CancellationToken,
        machine: &mut RoundMachine,
    ) -> Result<RoundReport, SyncError> {
        config.validate()?;
        let root = config.local_root.as_path();
        let _lock = RoundLock::acquire(root).map_err(|e| match e.kind() {
            StorageErrorKind::Busy => SyncError::AlreadyRunning(root.to_owned()),
            StorageErrorKind::MissingRoot => SyncError::Config(e.to_string()),
            _ => SyncError::Io(e.to_string()),
        })?;
        let round_start = Utc::now();
        info!(
            "Round started: {} <-> {}",
            root,
            self.transport.describe()
        );

        self.advance(machine, RoundState::Scanning)?;
        let found = self.discover(config, cancel).await?;

        self.advance(machine, RoundState::ConflictCheck)?;
        let conflicts = detect(&found.local_changes, &found.remote_changes);
        if !conflicts.is_empty() {
            self.emit(RoundEvent::ConflictsFound(conflicts.to_vec()));
            self.notify_conflicts(&conflicts, config.auto_rename).await?;
            if !config.auto_rename {
                self.advance(machine, RoundState::Blocked)?;
                return Err(SyncError::ConflictBlocked {
                    paths: conflicts.to_vec(),
                });
            }
        }

        self.advance(machine, RoundState::Planning)?;
        let mut plan = plan(&found.local_changes, &found.remote_changes, &conflicts);
        let mut conflict_copies = Vec::new();
        if !plan.conflicts.is_empty() {
            check_cancel(cancel)?;
            let stamp = conflict_stamp(round_start);
            conflict_copies =
                rename_conflicts(root, &plan.conflicts, &config.host_id, &stamp).await?;
            plan.apply_resolution(&conflict_copies);
            for copy in &conflict_copies {
                self.emit(RoundEvent::ConflictRenamed(copy.clone()));
            }
        }
        if let Some(path) = plan.overlapping() {
            return Err(SyncError::Internal(format!(
                "{path} scheduled in both directions"
            )));
        }
        check_cancel(cancel)?;

        self.advance(machine, RoundState::Transferring)?;
        let pull = plan.pull_list();
        let push = plan.push_list();
        self.transport
            .pull(root, &pull, cancel)
            .await
            .map_err(transfer_error)?;
        self.emit(RoundEvent::Transferred {
            to: Side::Local,
            files: pull.len(),
        });
        self.transport
            .push(root, &push, cancel)
            .await
            .map_err(transfer_error)?;
        self.emit(RoundEvent::Transferred {
            to: Side::Remote,
            files: push.len(),
        });
        info!("Pulled {} and pushed {} path(s)", pull.len(), push.len());

        self.advance(machine, RoundState::DeletionCheck)?;
        let reconciler =
            DeletionReconciler::new(self.transport.as_ref(), self.confirm.clone(), root);
        let local_deletions = self.reconcile(&reconciler, Side::Local, cancel).await?;
        let remote_deletions = self.reconcile(&reconciler, Side::Remote, cancel).await?;
        check_cancel(cancel)?;

        self.advance(machine, RoundState::Committing)?;
        // Files written while the round ran are newer than this and show up next round.
        let started = round_start.timestamp().max(0) as u64;
        let new_mark = found.local_mark.advance(started, found.remote_mark);
        self.marks
            .write(root, new_mark)
            .map_err(|e| SyncError::Io(e.to_string()))?;
        self.transport
            .push_mark(root, cancel)
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    SyncError::Cancelled
                } else {
                    SyncError::Io(format!("pushing mark to remote: {e}"))
                }
            })?;
        self.emit(RoundEvent::MarkCommitted(new_mark));

        self.advance(machine, RoundState::Done)?;
        info!("Round done, new mark {}", new_mark);

        Ok(RoundReport {
            local_mark: found.local_mark,
            remote_mark: found.remote_mark,
            since: found.since,
            local_changes: found.local_changes,
            remote_changes: found.remote_changes,
            local_scan: found.local_scan,
            plan,
            conflict_copies,
            local_deletions,
            remote_deletions,
            new_mark,
            history: machine.history().to_vec(),
        })
    }

    /// Read marks, scan, discover and detect conflicts. Transfers, deletes, renames and
    /// mark writes never happen here.
    pub async fn status(
        &self,
        config: &SyncConfig,
        cancel: &CancellationToken,
    ) -> Result<StatusReport, SyncError> {
        config.validate()?;
        let found = self.discover(config, cancel).await?;
        let conflicts = detect(&found.local_changes, &found.remote_changes);
        let plan = plan(&found.local_changes, &found.remote_changes, &conflicts);
        Ok(StatusReport {
            local_mark: found.local_mark,
            remote_mark: found.remote_mark,
            since: found.since,
            local_changes: found.local_changes,
            remote_changes: found.remote_changes,
            conflicts,
            plan,
        })
    }

    async fn discover(
        &self,
        config: &SyncConfig,
        cancel: &CancellationToken,
    ) -> Result<Discovery, SyncError> {
        let root = config.local_root.clone();
        let local_mark = self
            .marks
            .read(&root)
            .map_err(|e| SyncError::Io(e.to_string()))?;
        let remote_mark = match self.transport.read_mark(cancel).await {
            Ok(mark) => mark,
            Err(e) if e.is_cancelled() => return Err(SyncError::Cancelled),
            Err(e) => {
                warn!(
                    "Could not read remote mark from {} ({}); treating as never synced",
                    self.transport.describe(),
                    e
                );
                SyncMark::NEVER
            }
        };
        let since = SyncMark::common_reference(local_mark, remote_mark);
        debug!(
            "Marks local={} remote={}, discovering changes since {}",
            local_mark, remote_mark, since
        );

        let opts = config.scan;
        let (flag, bridge) = cancel_flag(cancel);
        let local_scan = tokio::task::spawn_blocking(move || {
            Scanner::scan_changes(&root, since, &opts, Some(flag))
        });
        let remote_scan = self.transport.list_changes(since, cancel);
        let (local_res, remote_res) = tokio::join!(local_scan, remote_scan);
        bridge.abort();

        let local = match local_res {
            Ok(Ok(out)) => out,
            Ok(Err(ScannerError::Cancelled)) => return Err(SyncError::Cancelled),
            Ok(Err(e)) => return Err(SyncError::Discovery(format!("local scan: {e}"))),
            Err(e) => return Err(SyncError::Internal(format!("scan task failed: {e}"))),
        };
        let mut remote_changes = remote_res.map_err(|e| {
            if e.is_cancelled() {
                SyncError::Cancelled
            } else {
                SyncError::Discovery(format!("{}: {e}", self.transport.describe()))
            }
        })?;
        let mut local_changes = local.changes;
        if opts.include_dirs {
            drop_shared_directories(&config.local_root, &mut local_changes, &mut remote_changes);
        }

        self.emit(RoundEvent::Discovered {
            since,
            local: local_changes.len(),
            remote: remote_changes.len(),
        });
        info!(
            "{} local and {} remote change(s) since {}",
            local_changes.len(),
            remote_changes.len(),
            since
        );

        Ok(Discovery {
            local_mark,
            remote_mark,
            since,
            local_changes,
            local_scan: local.stats,
            remote_changes,
        })
    }

    async fn notify_conflicts(&self, conflicts: &ConflictSet, auto_rename: bool) -> Result<(), SyncError> {
        let confirm = self.confirm.clone();
        let conflicts = conflicts.clone();
        tokio::task::spawn_blocking(move || confirm.conflicts_found(&conflicts, auto_rename))
            .await
            .map_err(|e| SyncError::Internal(format!("confirmation task failed: {e}")))
    }

    async fn reconcile(
        &self,
        reconciler: &DeletionReconciler<'_>,
        side: Side,
        cancel: &CancellationToken,
    ) -> Result<DeletionOutcome, SyncError> {
        let outcome = reconciler.reconcile(side, cancel).await?;
        if !outcome.planned.is_empty() {
            self.emit(RoundEvent::DeletionsPlanned {
                side,
                count: outcome.planned.len(),
            });
        }
        if outcome.deleted > 0 {
            self.emit(RoundEvent::Deleted {
                side,
                count: outcome.deleted,
            });
        }
        Ok(outcome)
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::Cancelled)
    } else {
        Ok(())
    }
}

fn transfer_error(e: TransportError) -> SyncError {
    if e.is_cancelled() {
        SyncError::Cancelled
    } else {
        SyncError::Transfer(e.to_string())
    }
}
