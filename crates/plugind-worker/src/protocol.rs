//! Wire protocol between the daemon and the root worker.
//!
//! Commands and replies travel as line-delimited JSON over the child's
//! stdin/stdout. Exchanges are strictly request/response, serialized by
//! the parent-side lock.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A command sent to the root worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Refresh the native package index.
    Update { uuid: String },
    /// Install a packaged artifact with automatic dependency resolution.
    Install { uuid: String, deb: PathBuf },
    /// Remove a native package by name.
    Uninstall { uuid: String, package: String },
    /// Stop the worker loop; only the daemon sends this at shutdown.
    Shutdown,
}

/// The worker's answer to one command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trip() {
        let command = WorkerCommand::Install {
            uuid: "8e3310a4-9cd6-4b5e-b23f-3e1a9c2a6b4b".to_string(),
            deb: PathBuf::from("/var/lib/wazo-plugind/tmp/x/_pkg.deb"),
        };
        let line = serde_json::to_string(&command).unwrap();
        let parsed: WorkerCommand = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, command);
    }

    #[test]
    fn test_command_wire_shape() {
        let line = serde_json::to_string(&WorkerCommand::Update {
            uuid: "u".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["op"], "update");
        assert_eq!(value["uuid"], "u");
    }
}
