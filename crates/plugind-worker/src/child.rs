//! The root worker process.
//!
//! Spawned by the daemon binary through the `root-worker` subcommand while
//! it still runs as root. The worker detaches into its own session,
//! ignores SIGTERM (only the daemon may stop it, through the shutdown
//! command or by closing its stdin) and answers commands one by one.
//!
//! stdout is the reply channel; all logging goes to stderr.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use plugind_core::Result;

use crate::exec::exec_and_log;
use crate::protocol::{WorkerCommand, WorkerReply};

/// Run the worker loop until shutdown or until the daemon goes away.
pub async fn run() -> Result<()> {
    tracing::info!("root worker started");

    detach();

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let command: WorkerCommand = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(e) => {
                tracing::info!("root worker received an unknown command: {e}");
                continue;
            }
        };

        if command == WorkerCommand::Shutdown {
            break;
        }

        let reply = WorkerReply {
            success: execute(&command).await,
        };
        let mut encoded = serde_json::to_string(&reply)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    tracing::info!("root worker done");
    Ok(())
}

async fn execute(command: &WorkerCommand) -> bool {
    let result = match command {
        WorkerCommand::Update { uuid } => {
            tracing::debug!(request = %uuid, "updating apt cache");
            let mut cmd = Command::new("apt-get");
            cmd.arg("update").arg("--quiet");
            exec_and_log(uuid, cmd).await
        }
        WorkerCommand::Install { uuid, deb } => {
            tracing::debug!(request = %uuid, "installing {}...", deb.display());
            let mut cmd = Command::new("gdebi");
            cmd.arg("--quiet").arg("--non-interactive").arg(deb);
            exec_and_log(uuid, cmd).await
        }
        WorkerCommand::Uninstall { uuid, package } => {
            tracing::debug!(request = %uuid, "uninstalling {package}");
            let mut cmd = Command::new("apt-get");
            cmd.arg("remove").arg("--yes").arg(package);
            exec_and_log(uuid, cmd).await
        }
        WorkerCommand::Shutdown => return true,
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("root worker command failed: {e}");
            false
        }
    }
}

/// Become a session leader and ignore SIGTERM so a daemon-wide signal does
/// not take the worker down before the daemon finished draining.
fn detach() {
    if let Err(e) = nix::unistd::setsid() {
        tracing::debug!("setsid failed: {e}");
    }

    // SAFETY: installing the ignore disposition for SIGTERM is async-signal
    // safe and there is no handler to race with at this point.
    unsafe {
        if let Err(e) = nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGTERM,
            nix::sys::signal::SigHandler::SigIgn,
        ) {
            tracing::warn!("failed to ignore SIGTERM: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_reports_command_failure() {
        // apt-get is either absent or refuses to remove a package that
        // does not exist; both surface as a false verdict
        let command = WorkerCommand::Uninstall {
            uuid: "test".to_string(),
            package: "wazo-plugind-does-not-exist-x".to_string(),
        };
        assert!(!execute(&command).await);
    }
}
