//! Parent-side handle over the root worker process.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use plugind_core::{PlugindError, Result};

use crate::protocol::{WorkerCommand, WorkerReply};

/// The privileged operations pipelines are allowed to request.
#[async_trait]
pub trait RootOps: Send + Sync {
    /// Refresh the native package index. Returns the worker's verdict.
    async fn update(&self, uuid: &str) -> Result<bool>;

    /// Install a packaged artifact.
    async fn install(&self, uuid: &str, deb: &Path) -> Result<bool>;

    /// Remove a native package by name.
    async fn uninstall(&self, uuid: &str, package: &str) -> Result<bool>;
}

type DeathHandler = Box<dyn Fn() + Send + Sync>;

struct WorkerChannel {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

/// Handle over the root worker process.
///
/// One command/reply exchange is in flight at a time: the channel lock is
/// held for the whole round trip so every caller receives its own reply.
pub struct RootWorker {
    inner: Mutex<WorkerChannel>,
    on_death: DeathHandler,
}

impl RootWorker {
    /// Re-execute the current binary as the root worker. Must be called
    /// before the daemon drops its privileges so the child keeps root.
    pub fn spawn() -> Result<Self> {
        let exe = std::env::current_exe()?;
        tracing::info!("starting root worker");
        let mut command = Command::new(exe);
        command.arg("root-worker");
        Self::spawn_command(
            command,
            Box::new(|| {
                // the daemon cannot continue without its privileged helper
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::this(),
                    nix::sys::signal::Signal::SIGTERM,
                );
            }),
        )
    }

    fn spawn_command(mut command: Command, on_death: DeathHandler) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PlugindError::Internal("root worker has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PlugindError::Internal("root worker has no stdout".to_string()))?;

        Ok(Self {
            inner: Mutex::new(WorkerChannel {
                child,
                stdin: Some(stdin),
                stdout: BufReader::new(stdout),
            }),
            on_death,
        })
    }

    async fn exchange(&self, command: WorkerCommand) -> Result<WorkerReply> {
        let mut channel = self.inner.lock().await;

        if let Ok(Some(status)) = channel.child.try_wait() {
            tracing::error!("root worker process is dead ({status}), stopping the daemon");
            (self.on_death)();
            return Err(PlugindError::WorkerUnavailable);
        }

        let stdin = channel
            .stdin
            .as_mut()
            .ok_or(PlugindError::WorkerUnavailable)?;
        let mut line = serde_json::to_string(&command)?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;

        let mut reply = String::new();
        let read = channel.stdout.read_line(&mut reply).await?;
        if read == 0 {
            tracing::error!("root worker closed its reply channel, stopping the daemon");
            (self.on_death)();
            return Err(PlugindError::WorkerUnavailable);
        }

        Ok(serde_json::from_str(reply.trim())?)
    }

    /// Ask the worker to stop and wait for it to exit.
    pub async fn stop(&self) {
        tracing::info!("stopping root worker");
        let mut channel = self.inner.lock().await;

        if let Some(mut stdin) = channel.stdin.take() {
            if let Ok(line) = serde_json::to_string(&WorkerCommand::Shutdown) {
                let _ = stdin.write_all(format!("{line}\n").as_bytes()).await;
            }
            let _ = stdin.shutdown().await;
        }

        match channel.child.wait().await {
            Ok(status) => tracing::info!("root worker stopped ({status})"),
            Err(e) => tracing::warn!("failed to reap the root worker: {e}"),
        }
    }
}

#[async_trait]
impl RootOps for RootWorker {
    async fn update(&self, uuid: &str) -> Result<bool> {
        let reply = self
            .exchange(WorkerCommand::Update {
                uuid: uuid.to_string(),
            })
            .await?;
        Ok(reply.success)
    }

    async fn install(&self, uuid: &str, deb: &Path) -> Result<bool> {
        let reply = self
            .exchange(WorkerCommand::Install {
                uuid: uuid.to_string(),
                deb: deb.to_path_buf(),
            })
            .await?;
        Ok(reply.success)
    }

    async fn uninstall(&self, uuid: &str, package: &str) -> Result<bool> {
        let reply = self
            .exchange(WorkerCommand::Uninstall {
                uuid: uuid.to_string(),
                package: package.to_string(),
            })
            .await?;
        Ok(reply.success)
    }
}
