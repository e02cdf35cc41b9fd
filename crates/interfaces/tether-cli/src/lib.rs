pub mod commands;
pub mod confirm;
pub mod profiles;

use clap::ValueEnum;
use tether_pipeline::{SymlinkPolicy, SyncError};

pub const EXIT_OTHER: i32 = 1;
pub const EXIT_DISCOVERY: i32 = 2;
pub const EXIT_CONFLICT: i32 = 3;
pub const EXIT_TRANSFER: i32 = 4;
pub const EXIT_DELETION: i32 = 5;
pub const EXIT_MARK_IO: i32 = 6;
pub const EXIT_ALREADY_RUNNING: i32 = 7;
pub const EXIT_CANCELLED: i32 = 130;

/// Process exit status for a failed round.
pub fn exit_code(err: &SyncError) -> i32 {
    match err {
        SyncError::Discovery(_) => EXIT_DISCOVERY,
        SyncError::ConflictBlocked { .. } => EXIT_CONFLICT,
        SyncError::Transfer(_) => EXIT_TRANSFER,
        SyncError::Deletion(_) => EXIT_DELETION,
        SyncError::Io(_) => EXIT_MARK_IO,
        SyncError::AlreadyRunning(_) => EXIT_ALREADY_RUNNING,
        SyncError::Cancelled => EXIT_CANCELLED,
        SyncError::Config(_) | SyncError::Internal(_) => EXIT_OTHER,
    }
}

#[derive(ValueEnum, Clone, Debug, Copy, PartialEq, Eq)]
pub enum CliSymlinks {
    Exclude,
    Resolve,
}

impl From<CliSymlinks> for SymlinkPolicy {
    fn from(s: CliSymlinks) -> Self {
        match s {
            CliSymlinks::Exclude => SymlinkPolicy::Exclude,
            CliSymlinks::Resolve => SymlinkPolicy::Resolve,
        }
    }
}
