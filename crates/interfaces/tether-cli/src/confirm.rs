use std::io::{self, BufRead, IsTerminal, Write};

use indicatif::ProgressBar;
use tether_core::{ConflictSet, DeletionSet};
use tether_pipeline::Confirm;

/// Paths listed before a deletion prompt; the rest are summarized.
const PROMPT_PREVIEW: usize = 20;

/// Which deletions are approved up front. Anything else is asked on the terminal, or
/// refused when there is no terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmPolicy {
    pub delete_local: bool,
    pub delete_remote: bool,
    pub interactive: bool,
}

impl ConfirmPolicy {
    pub fn from_flags(delete_local: bool, delete_remote: bool, yes: bool) -> Self {
        Self {
            delete_local: delete_local || yes,
            delete_remote: delete_remote || yes,
            interactive: io::stdin().is_terminal(),
        }
    }
}

pub struct TerminalConfirm {
    policy: ConfirmPolicy,
    progress: Option<ProgressBar>,
}

impl TerminalConfirm {
    pub fn new(policy: ConfirmPolicy) -> Self {
        Self {
            policy,
            progress: None,
        }
    }

    /// Hide `pb` while prompting so the spinner does not draw over the question.
    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    fn suspended<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.progress {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }
}

impl Confirm for TerminalConfirm {
    fn conflicts_found(&self, conflicts: &ConflictSet, auto_rename: bool) {
        self.suspended(|| {
            eprintln!(":: {} path(s) changed on both replicas:", conflicts.len());
            for path in conflicts.iter() {
                eprintln!("   !! {}", path);
            }
            if auto_rename {
                eprintln!("   Local versions will be renamed aside.");
            } else {
                eprintln!("   Rerun with --rename to keep both versions.");
            }
        })
    }

    fn approve_deletions(&self, set: &DeletionSet) -> bool {
        let preset = match set.destination {
            tether_core::Side::Local => self.policy.delete_local,
            tether_core::Side::Remote => self.policy.delete_remote,
        };
        if preset {
            return true;
        }
        if !self.policy.interactive {
            eprintln!(
                ":: {} path(s) would be deleted from the {} replica; pass --delete-{} to allow",
                set.len(),
                set.destination,
                set.destination
            );
            return false;
        }
        self.suspended(|| {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut out = io::stderr();
            ask(set, &mut input, &mut out).unwrap_or(false)
        })
    }
}

/// Print the deletion set and read a yes/no answer. Anything but `y`/`yes` is a no.
pub fn ask<R: BufRead, W: Write>(set: &DeletionSet, input: &mut R, out: &mut W) -> io::Result<bool> {
    writeln!(
        out,
        ":: {} path(s) exist only on the {} replica:",
        set.len(),
        set.destination
    )?;
    for path in set.iter().take(PROMPT_PREVIEW) {
        writeln!(out, "   - {}", path)?;
    }
    if set.len() > PROMPT_PREVIEW {
        writeln!(out, "   ... and {} more", set.len() - PROMPT_PREVIEW)?;
    }
    write!(out, "Delete them from the {} replica? [y/N] ", set.destination)?;
    out.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
