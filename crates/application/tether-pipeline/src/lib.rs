mod io_utils;
pub mod sync;

// Re-export core engine components
pub use sync::engine::{RoundEvent, RoundFailure, RoundReport, StatusReport, SyncEngine};
pub use sync::reconcile::{Confirm, DeletionOutcome, DeletionReconciler, PresetConfirm};
pub use sync::state::{RoundMachine, RoundState};
pub use sync::transport::{Transport, TransportError};
pub use sync::{default_host_id, RemoteSpec, SyncConfig, SyncError};

// Re-export scanner types often needed by consumers
pub use tether_scanner::{ScanOptions, ScanStats, SymlinkPolicy};
