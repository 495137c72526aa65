//! Privilege-separated package operations.
//!
//! The daemon starts as root, spawns this worker as a separate process,
//! then drops its own privileges. Build steps never run privileged; the
//! worker only accepts three narrow commands (refresh the package index,
//! install an artifact, remove a package) and never parses plugin input.

pub mod child;
pub mod exec;
pub mod handle;
pub mod protocol;

pub use exec::exec_and_log;
pub use handle::{RootOps, RootWorker};
pub use protocol::{WorkerCommand, WorkerReply};
