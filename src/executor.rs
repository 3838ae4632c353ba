//! Reference check agent
//!
//! Runs the command of every [`CheckRequest`] through the shell and hands a
//! [`CheckResult`] back to the connector. Status codes follow the Sensu
//! convention: the command's exit code, 2 when the check timed out and 3 when
//! it could not be run at all.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use crate::protocol::{AgentMessage, CheckRequest, CheckResult, ExecutionResult};

/// Status reported when a check exceeds its timeout
pub const STATUS_CRITICAL: i32 = 2;

/// Status reported when a check could not be executed
pub const STATUS_UNKNOWN: i32 = 3;

/// Executes check commands on behalf of one client
#[derive(Debug, Clone)]
pub struct CheckExecutor {
    client: String,
    shell: String,
    timeout: Duration,
}

impl CheckExecutor {
    pub fn new(client: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: client.into(),
            shell: "sh".to_string(),
            timeout,
        }
    }

    /// Use a different shell (invoked as `<shell> -c <command>`)
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run one check and build its result
    #[instrument(skip(self, request), fields(check = %request.name))]
    pub async fn execute(&self, request: &CheckRequest) -> CheckResult {
        let executed = Utc::now().timestamp();
        let start = Instant::now();

        let (status, output) = self.run_command(&request.command).await;
        let duration = start.elapsed().as_secs_f64();

        trace!(status, duration, "check finished");

        CheckResult {
            client: self.client.clone(),
            result: ExecutionResult {
                command: request.command.clone(),
                name: request.name.clone(),
                issued: request.issued,
                executed,
                duration,
                output,
                status,
            },
        }
    }

    async fn run_command(&self, command: &str) -> (i32, String) {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "failed to spawn check command");
                return (STATUS_UNKNOWN, format!("Unable to run check: {e}"));
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                // killed by a signal: no exit code
                let status = output.status.code().unwrap_or(STATUS_UNKNOWN);
                (status, text)
            }
            Ok(Err(e)) => (STATUS_UNKNOWN, format!("Unable to read check output: {e}")),
            Err(_) => (STATUS_CRITICAL, "Execution timed out".to_string()),
        }
    }

    /// Execute every incoming request concurrently and send back the results
    ///
    /// Returns when `requests` is closed or nobody listens for results anymore.
    pub async fn serve(
        self,
        mut requests: mpsc::Receiver<CheckRequest>,
        results: mpsc::Sender<AgentMessage>,
    ) {
        let executor = Arc::new(self);
        debug!(client = %executor.client, "check executor started");

        while let Some(request) = requests.recv().await {
            if results.is_closed() {
                break;
            }

            let executor = executor.clone();
            let results = results.clone();
            tokio::spawn(async move {
                let result = executor.execute(&request).await;
                if results.send(result.into()).await.is_err() {
                    debug!("result channel closed, dropping check result");
                }
            });
        }

        debug!("check executor stopped");
    }
}
