//! Subprocess execution with captured output.

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::Command;

use plugind_core::{PlugindError, Result};

/// Run a command to completion, logging its output tagged with the request
/// uuid. A non-zero exit raises [`PlugindError::CommandExecutionFailed`].
pub async fn exec_and_log(uuid: &str, mut command: Command) -> Result<()> {
    let rendered = render(&command);
    tracing::debug!(request = uuid, "running {rendered}");

    let output = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.stdout.is_empty() {
        tracing::debug!(
            request = uuid,
            "{rendered}\n==== STDOUT ====\n{}==== END ====",
            String::from_utf8_lossy(&output.stdout)
        );
    }
    if !output.stderr.is_empty() {
        tracing::debug!(
            request = uuid,
            "{rendered}\n==== STDERR ====\n{}==== END ====",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        tracing::error!(request = uuid, "{rendered} returned {code}");
        return Err(PlugindError::CommandExecutionFailed {
            command: rendered,
            code,
        });
    }
    Ok(())
}

fn render(command: &Command) -> String {
    let std = command.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}
