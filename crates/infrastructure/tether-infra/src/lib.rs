pub mod process;
pub mod rsync;
pub mod ssh;

// Re-exports for convenience
pub use process::{run, CommandSpec, ProcessError, ProcessOutput};
pub use rsync::{parse_itemized_deletions, LinkMode, RsyncEndpoint, RsyncInvocation};
pub use ssh::SshTarget;
