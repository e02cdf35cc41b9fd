use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indicatif::{ProgressBar, ProgressStyle};
use tether_core::{Side, SyncMark};
use tether_persistence::FileMarkStore;
use tether_pipeline::sync::transport::format_change_line;
use tether_pipeline::{
    RemoteSpec, RoundEvent, RoundReport, ScanOptions, StatusReport, SyncConfig, SyncEngine,
};
use tether_scanner::Scanner;
use tokio_util::sync::CancellationToken;

use crate::confirm::{ConfirmPolicy, TerminalConfirm};
use crate::exit_code;

/// Connection flags for an ssh replica. No host means `root` is a local directory.
#[derive(Debug, Clone, Default)]
pub struct RemoteArgs {
    pub root: String,
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<Utf8PathBuf>,
    pub remote_bin: Option<String>,
}

impl RemoteArgs {
    pub fn into_spec(self) -> RemoteSpec {
        let mut spec = RemoteSpec::directory(self.root);
        spec.host = self.host;
        spec.user = self.user;
        spec.port = self.port;
        spec.identity_file = self.identity_file;
        if let Some(bin) = self.remote_bin {
            spec.remote_bin = bin;
        }
        spec
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Run one round, or only report what it would do. Returns the process exit code.
pub async fn cmd_sync(
    config: SyncConfig,
    status_only: bool,
    policy: ConfirmPolicy,
    cancel: CancellationToken,
) -> Result<i32> {
    println!(":: Synchronizing...");
    println!("   Local:  {}", config.local_root);
    println!("   Remote: {}", config.remote.display());

    let pb = spinner();
    let confirm = Arc::new(TerminalConfirm::new(policy).with_progress(pb.clone()));

    if status_only {
        pb.set_message("Discovering changes...");
        let engine = SyncEngine::new(&config, confirm);
        let res = engine.status(&config, &cancel).await;
        pb.finish_and_clear();
        return Ok(match res {
            Ok(status) => {
                print_status(&status);
                0
            }
            Err(e) => {
                eprintln!(":: Status failed: {}", e);
                exit_code(&e)
            }
        });
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel(100);
    let engine = SyncEngine::new(&config, confirm).with_events(tx);
    let round = {
        let config = config.clone();
        tokio::spawn(async move { engine.run_round(&config, &cancel).await })
    };

    while let Some(ev) = rx.recv().await {
        match ev {
            RoundEvent::Phase(state) => pb.set_message(format!("{}...", state)),
            RoundEvent::Discovered {
                since,
                local,
                remote,
            } => pb.println(format!(
                "   {} local / {} remote change(s) since {}",
                local, remote, since
            )),
            RoundEvent::ConflictRenamed(copy) => {
                pb.println(format!("   Renamed {} -> {}", copy.original, copy.renamed))
            }
            RoundEvent::Transferred { to, files } if files > 0 => {
                let verb = match to {
                    Side::Local => "Pulled",
                    Side::Remote => "Pushed",
                };
                pb.println(format!("   {} {} file(s)", verb, files));
            }
            RoundEvent::Deleted { side, count } => {
                pb.println(format!("   Deleted {} path(s) from {}", count, side))
            }
            _ => {}
        }
    }

    let result = round.await.context("Sync task failed")?;
    pb.finish_and_clear();

    Ok(match result {
        Ok(report) => {
            print_report(&report);
            0
        }
        Err(failure) => {
            eprintln!(":: Round aborted during {}", failure.phase);
            eprintln!("   {}", failure.error);
            exit_code(&failure.error)
        }
    })
}

fn print_report(report: &RoundReport) {
    println!("\n:: Round Complete");
    println!("   Pulled:          {}", report.plan.pull.len());
    println!("   Pushed:          {}", report.plan.push.len());
    println!("   Conflict copies: {}", report.conflict_copies.len());
    for outcome in [&report.local_deletions, &report.remote_deletions] {
        if outcome.planned.is_empty() {
            continue;
        }
        if outcome.approved {
            println!("   Deleted ({}):    {}", outcome.side, outcome.deleted);
        } else {
            println!(
                "   Kept ({}):       {} (not approved, offered again next round)",
                outcome.side,
                outcome.retained().len()
            );
        }
    }
    println!("   New mark:        {}", report.new_mark);
}

fn print_status(status: &StatusReport) {
    println!("\n:: Status");
    println!("   Local mark:  {}", status.local_mark);
    println!("   Remote mark: {}", status.remote_mark);
    println!("   Since:       {}", status.since);
    for path in &status.plan.pull {
        println!("   <- {}", path);
    }
    for path in &status.plan.push {
        println!("   -> {}", path);
    }
    for path in status.conflicts.iter() {
        println!("   !! {}", path);
    }
    if status.plan.is_empty() {
        println!("   Status:      Up to date");
    } else {
        println!(
            "   Status:      {} to pull, {} to push, {} conflict(s) (run `sync`)",
            status.plan.pull.len(),
            status.plan.push.len(),
            status.conflicts.len()
        );
    }
}

/// `<mtime>\t<path>` for every path under `root` changed after `since`. This is what the
/// ssh transport runs on the remote host.
pub fn write_changes<W: Write>(
    root: &Utf8Path,
    since: SyncMark,
    opts: &ScanOptions,
    out: &mut W,
) -> Result<usize> {
    let scanned = Scanner::scan_changes(root, since, opts, None)
        .with_context(|| format!("Failed to scan {}", root))?;
    for (path, mtime) in scanned.changes.iter() {
        writeln!(out, "{}", format_change_line(path, mtime))?;
    }
    out.flush()?;
    Ok(scanned.changes.len())
}

pub fn cmd_changes(root: Utf8PathBuf, since: u64, opts: ScanOptions) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    write_changes(&root, SyncMark(since), &opts, &mut out)?;
    Ok(())
}

/// Print a root's mark in seconds; `0` when it has never synced.
pub fn cmd_mark(root: Utf8PathBuf) -> Result<()> {
    let mark = FileMarkStore::new()
        .peek(&root)
        .with_context(|| format!("Failed to read mark of {}", root))?;
    println!("{}", mark.secs());
    Ok(())
}
