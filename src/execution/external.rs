//! EXTERNAL execution: the unit of work is an external executable whose
//! exit code and output streams become the result payload.

use crate::error::{BusResult, DispatchError};
use crate::event::Event;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Command description carried in the event payload.
#[derive(Debug, Deserialize)]
struct ExternalSpec {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
}

/// Run the command named by the payload under the event's timeout.
///
/// Zero exit is a success carrying `{exit_code, stdout, stderr}`; non-zero
/// exit and launch failures are `ExternalCommandFailed` attempt failures.
pub(crate) async fn execute(event: &Event) -> BusResult<Value> {
    let spec: ExternalSpec =
        serde_json::from_value(event.payload.clone()).map_err(|e| {
            DispatchError::ExternalCommandFailed {
                event_id: event.id,
                exit_code: None,
                stderr: format!("invalid command payload: {e}"),
            }
        })?;

    debug!(
        event_id = %event.id,
        command = %spec.command,
        args = ?spec.args,
        "Launching external command"
    );

    let mut command = Command::new(&spec.command);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    match tokio::time::timeout(event.timeout, command.output()).await {
        Err(_) => Err(DispatchError::AttemptTimeout {
            event_id: event.id,
            timeout: event.timeout,
        }),
        Ok(Err(e)) => Err(DispatchError::ExternalCommandFailed {
            event_id: event.id,
            exit_code: None,
            stderr: format!("failed to launch '{}': {e}", spec.command),
        }),
        Ok(Ok(output)) if output.status.success() => Ok(json!({
            "exit_code": 0,
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        })),
        Ok(Ok(output)) => Err(DispatchError::ExternalCommandFailed {
            event_id: event.id,
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
    }
}
