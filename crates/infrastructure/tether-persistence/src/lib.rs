mod api;
mod error;
mod file_store;
mod lock;
mod maintenance;

pub use api::*;
pub use error::*;
pub use file_store::FileMarkStore;
pub use lock::RoundLock;
pub use maintenance::quarantine_corrupt_file;
