//! # Isolated Execution
//!
//! ISOLATED strategy: each attempt runs inside a separate worker process so
//! a crash, runaway allocation, or hard timeout never takes down the
//! dispatcher.
//!
//! The parent and worker speak a line-delimited JSON protocol over the
//! worker's stdin/stdout: one [`WireRequest`] line in, one [`WireResponse`]
//! line out. Workers are pooled and reused across events; a worker that
//! times out, exits, or breaks protocol is killed and replaced lazily.
//!
//! A worker binary calls [`worker_main`] with its own handler registry to
//! serve the other side of the protocol (see `src/bin/eventbus_worker.rs`
//! for the reference worker used by the integration tests).

use crate::config::IsolatedPoolConfig;
use crate::error::{BusResult, DispatchError};
use crate::event::Event;
use crate::handler::{DispatcherHandle, ExecutionContext};
use crate::registry::HandlerRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// One attempt, serialized across the process boundary.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireRequest {
    pub event: Event,
    pub attempt: u32,
}

/// Worker-side outcome of one attempt.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireResponse {
    pub event_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

fn fault(event_id: Uuid, reason: impl Into<String>) -> DispatchError {
    DispatchError::IsolationFault {
        event_id,
        reason: reason.into(),
    }
}

/// A live worker process with its protocol streams.
struct IsolatedWorker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl IsolatedWorker {
    async fn spawn(command: &[String], event_id: Uuid) -> BusResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| fault(event_id, "no worker command configured"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fault(event_id, format!("failed to launch worker '{program}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| fault(event_id, "worker stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| fault(event_id, "worker stdout unavailable"))?;

        debug!(pid = child.id(), "Isolated worker spawned");
        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    /// Send one request and read one response line. Protocol errors and a
    /// dead child both come back as isolation faults.
    async fn round_trip(&mut self, request: &WireRequest) -> BusResult<WireResponse> {
        let event_id = request.event.id;
        let mut line = serde_json::to_string(request)
            .map_err(|e| fault(event_id, format!("failed to encode request: {e}")))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| fault(event_id, format!("failed to write to worker: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| fault(event_id, format!("failed to flush worker pipe: {e}")))?;

        let mut response_line = String::new();
        let read = self
            .stdout
            .read_line(&mut response_line)
            .await
            .map_err(|e| fault(event_id, format!("failed to read from worker: {e}")))?;
        if read == 0 {
            return Err(fault(event_id, "worker closed its output stream"));
        }

        serde_json::from_str(&response_line)
            .map_err(|e| fault(event_id, format!("malformed worker response: {e}")))
    }

    async fn kill(mut self) {
        let _ = self.child.kill().await;
    }
}

/// Bounded pool of worker processes, owned by the dispatcher.
pub(crate) struct IsolatedPool {
    command: Vec<String>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IsolatedWorker>>,
}

impl IsolatedPool {
    pub(crate) fn new(config: &IsolatedPoolConfig) -> Self {
        Self {
            command: config.worker_command.clone(),
            permits: Arc::new(Semaphore::new(config.size)),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Capacity gate; the dispatch loop holds one permit per running attempt.
    pub(crate) fn permits(&self) -> Arc<Semaphore> {
        self.permits.clone()
    }

    /// Run one attempt in a worker process. The caller must hold a pool
    /// permit. Timeout, crash, and protocol breakage kill the worker and
    /// surface as error values; healthy workers return to the idle list.
    pub(crate) async fn execute(&self, event: &Event, attempt: u32) -> BusResult<Value> {
        if self.command.is_empty() {
            return Err(fault(event.id, "no worker command configured"));
        }

        let mut worker = match self.idle.lock().await.pop() {
            Some(worker) => worker,
            None => IsolatedWorker::spawn(&self.command, event.id).await?,
        };

        let request = WireRequest {
            event: event.clone(),
            attempt,
        };

        match tokio::time::timeout(event.timeout, worker.round_trip(&request)).await {
            Ok(Ok(response)) => {
                self.idle.lock().await.push(worker);
                if response.success {
                    Ok(response.data.unwrap_or(Value::Null))
                } else {
                    Err(response_error(event, response))
                }
            }
            Ok(Err(err)) => {
                warn!(event_id = %event.id, error = %err, "Isolated worker discarded");
                worker.kill().await;
                Err(err)
            }
            Err(_) => {
                warn!(event_id = %event.id, "Isolated attempt timed out, killing worker");
                worker.kill().await;
                Err(DispatchError::AttemptTimeout {
                    event_id: event.id,
                    timeout: event.timeout,
                })
            }
        }
    }

    /// Kill every idle worker. Running workers die with their attempt
    /// futures via kill-on-drop.
    pub(crate) async fn shutdown(&self) {
        let workers: Vec<IsolatedWorker> = self.idle.lock().await.drain(..).collect();
        for worker in workers {
            worker.kill().await;
        }
    }
}

/// Rehydrate a worker-side failure into the matching error variant, so the
/// retry policy sees the kind the worker actually reported instead of
/// treating every worker failure as a retryable handler error.
fn response_error(event: &Event, response: WireResponse) -> DispatchError {
    let reason = response
        .error_message
        .unwrap_or_else(|| "handler failed in isolated worker".to_string());
    match response.error_kind.as_deref() {
        Some("UnknownTypeError") => DispatchError::UnknownType {
            event_type: event.event_type.clone(),
        },
        Some("InvalidEventError") => DispatchError::InvalidEvent { reason },
        Some("TimeoutError") => DispatchError::AttemptTimeout {
            event_id: event.id,
            timeout: event.timeout,
        },
        Some("IsolationFaultError") => DispatchError::IsolationFault {
            event_id: event.id,
            reason,
        },
        Some("ExternalCommandError") => DispatchError::ExternalCommandFailed {
            event_id: event.id,
            exit_code: None,
            stderr: reason,
        },
        Some("Cancelled") => DispatchError::Cancelled { event_id: event.id },
        Some("ShutdownError") => DispatchError::ShuttingDown,
        Some("ConfigurationError") => DispatchError::Configuration { reason },
        _ => DispatchError::HandlerFailed {
            event_id: event.id,
            reason,
        },
    }
}

/// Serve the worker side of the isolated-execution protocol on this
/// process's stdin/stdout until the parent closes the pipe.
///
/// Stdout is reserved for protocol lines; worker binaries should route
/// their logging to stderr.
pub async fn worker_main(registry: HandlerRegistry) -> std::io::Result<()> {
    let registry = Arc::new(registry);
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = serve_request(&registry, &line).await;
        let mut out = serde_json::to_string(&response).unwrap_or_else(|_| {
            format!(
                "{{\"event_id\":\"{}\",\"success\":false,\"error_kind\":\"IsolationFaultError\",\"error_message\":\"response serialization failed\"}}",
                response.event_id
            )
        });
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn serve_request(registry: &Arc<HandlerRegistry>, line: &str) -> WireResponse {
    let request: WireRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return WireResponse {
                event_id: Uuid::nil(),
                success: false,
                data: None,
                error_kind: Some("IsolationFaultError".to_string()),
                error_message: Some(format!("malformed request: {e}")),
            }
        }
    };

    let event = request.event;
    let ctx = ExecutionContext {
        event_id: event.id,
        attempt: request.attempt,
        cancellation: CancellationToken::new(),
        dispatcher: DispatcherHandle::detached(),
        correlation: HashMap::new(),
    };

    let outcome = match registry.resolve(&event.event_type).await {
        Ok(handler) => handler.call(&ctx, &event).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(data) => WireResponse {
            event_id: event.id,
            success: true,
            data: Some(data),
            error_kind: None,
            error_message: None,
        },
        Err(err) => WireResponse {
            event_id: event.id,
            success: false,
            data: None,
            error_kind: Some(err.kind().to_string()),
            error_message: Some(err.to_string()),
        },
    }
}
