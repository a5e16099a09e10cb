//! Subprocess executor: one child process per attempt.
//!
//! Protocol:
//! - the task is written as JSON to the child's stdin;
//! - `PROPHET_*` environment variables carry the attempt parameters;
//! - on success the child prints an [`ExecutionReport`] as JSON on stdout
//!   (the last non-empty line is used when stdout carries other output);
//! - on failure it exits non-zero, optionally printing
//!   `{"error": {"kind", "message", "retry_after"}, "cost_spent"}` on stdout.
//!   Otherwise the failure is classified from stderr.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use prophet_core::CostBreakdown;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::executor::{ExecutionReport, ExecutionRequest, TaskExecutor};
use crate::rate_limit::MAX_BACKOFF;
use crate::retry::{ExecutionError, ExecutionFailure};

/// Executes each attempt by spawning an external program.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
    #[serde(default)]
    cost_spent: f64,
    #[serde(default)]
    cost: Option<CostBreakdown>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    retry_after: Option<f64>,
}

impl CommandExecutor {
    /// Create an executor for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    /// Append arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self, request: &ExecutionRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        cmd.env("PROPHET_TASK_ID", request.task.task_id.as_str());
        cmd.env("PROPHET_ATTEMPT", request.attempt.to_string());
        cmd.env("PROPHET_OUTPUT_DIR", &request.output_dir);
        if let Some(cap) = request.cost_cap {
            cmd.env("PROPHET_COST_CAP", cap.to_string());
        }
        // Without an explicit bound, search stops at the task's deadline.
        let before = request
            .runtime
            .search_date_before
            .as_ref()
            .or(request.task.predict_by.as_ref());
        if let Some(before) = before {
            cmd.env("PROPHET_SEARCH_DATE_BEFORE", before);
        }
        if let Some(after) = &request.runtime.search_date_after {
            cmd.env("PROPHET_SEARCH_DATE_AFTER", after);
        }

        // Own process group: a terminal Ctrl-C must not reach running attempts.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReport, ExecutionFailure> {
        if self.program.is_empty() {
            return Err(failed("spawn_error", "executor program is empty"));
        }

        tokio::fs::create_dir_all(&request.output_dir).await.map_err(|e| {
            failed("io_error", format!("create {}: {}", request.output_dir.display(), e))
        })?;

        let payload = serde_json::to_vec(request.task.as_ref())
            .map_err(|e| failed("serialize_error", e.to_string()))?;

        trace!(program = %self.program, args = ?self.args, task_id = %request.task.task_id, "spawn");
        let mut child = self
            .command(&request)
            .spawn()
            .map_err(|e| failed("spawn_error", format!("spawn {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(error = %e, "child closed stdin early");
                }
            });
        }

        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.map_err(|e| failed("wait_error", e.to_string()))?
            }
            _ = request.cancel.cancelled() => {
                debug!(task_id = %request.task.task_id, "cancelled; child killed on drop");
                return Err(failed("cancelled", "attempt cancelled"));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            return parse_json::<ExecutionReport>(&stdout).ok_or_else(|| {
                failed("invalid_report", "executor did not print a JSON report on stdout")
            });
        }

        if let Some(envelope) = parse_json::<ErrorEnvelope>(&stdout) {
            let retry_after = envelope
                .error
                .retry_after
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .map(|d| d.min(MAX_BACKOFF));
            let error = match envelope.error.kind.as_deref() {
                Some(kind) => ExecutionError::from_kind(kind, envelope.error.message, retry_after),
                None => ExecutionError::classify(envelope.error.message),
            };
            return Err(ExecutionFailure { error, cost_spent: envelope.cost_spent, cost: envelope.cost });
        }

        let message = match stderr.trim() {
            "" => match output.status.code() {
                Some(code) => format!("exit code: {}", code),
                None => "terminated by signal".to_string(),
            },
            text => text.to_string(),
        };
        warn!(task_id = %request.task.task_id, status = ?output.status.code(), "executor exited with failure");
        Err(ExecutionFailure::new(ExecutionError::classify(message)))
    }
}

fn failed(kind: &str, message: impl Into<String>) -> ExecutionFailure {
    ExecutionFailure::new(ExecutionError::Failed { kind: kind.to_string(), message: message.into() })
}

/// Parse the whole output, falling back to its last non-empty line.
fn parse_json<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok().or_else(|| {
        trimmed
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .and_then(|l| serde_json::from_str(l).ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use prophet_core::{RunStatus, Task};
    use tokio_util::sync::CancellationToken;

    fn request(dir: &std::path::Path) -> ExecutionRequest {
        ExecutionRequest {
            task: Arc::new(Task::new("t1", "Q", vec!["Y".into(), "N".into()])),
            attempt: 1,
            cost_cap: Some(0.5),
            deadline: None,
            output_dir: dir.join("runs").join("t1"),
            runtime: Default::default(),
            cancel: CancellationToken::new(),
        }
    }

    fn sh(script: &str) -> CommandExecutor {
        CommandExecutor::new("sh").with_args(["-c", script])
    }

    #[test]
    fn test_parse_json_takes_last_line() {
        let text = "log line\n{\"status\": \"submitted\", \"cost_spent\": 0.1}\n";
        let report: ExecutionReport = parse_json(text).unwrap();
        assert_eq!(report.status, RunStatus::Submitted);
        assert!(parse_json::<ExecutionReport>("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_report() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh(r#"cat > /dev/null; echo "{\"cost_spent\": 0.25, \"submission\": {\"id\": \"$PROPHET_TASK_ID\"}}""#);

        let report = executor.execute(request(dir.path())).await.unwrap();
        assert_eq!(report.status, RunStatus::Submitted);
        assert_eq!(report.cost_spent, 0.25);
        assert_eq!(report.submission, Some(serde_json::json!({"id": "t1"})));
        assert!(dir.path().join("runs").join("t1").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_task_json_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh(r#"grep -q '"task_id":"t1"' && echo '{}'"#);
        assert!(executor.execute(request(dir.path())).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_structured_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh(
            r#"cat > /dev/null; echo '{"error": {"kind": "rate_limit", "message": "slow", "retry_after": 3}, "cost_spent": 0.1}'; exit 1"#,
        );

        let failure = executor.execute(request(dir.path())).await.unwrap_err();
        assert_eq!(
            failure.error,
            ExecutionError::RateLimited { message: "slow".into(), retry_after: Some(Duration::from_secs(3)) }
        );
        assert_eq!(failure.cost_spent, 0.1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_classification() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh("cat > /dev/null; echo 'HTTP 401 Unauthorized' >&2; exit 2");
        let failure = executor.execute(request(dir.path())).await.unwrap_err();
        assert!(matches!(failure.error, ExecutionError::Auth { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh("sleep 30");
        let req = request(dir.path());
        let cancel = req.cancel.clone();

        let handle = tokio::spawn(async move { executor.execute(req).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let failure = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(failure.error, ExecutionError::Failed { ref kind, .. } if kind == "cancelled"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_search_date_before_falls_back_to_predict_by() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh(r#"cat > /dev/null; echo "{\"submission\": \"$PROPHET_SEARCH_DATE_BEFORE\"}""#);

        let mut req = request(dir.path());
        let mut task = Task::new("t1", "Q", vec!["Y".into(), "N".into()]);
        task.predict_by = Some("03/04/2025".into());
        req.task = Arc::new(task);
        let report = executor.execute(req.clone()).await.unwrap();
        assert_eq!(report.submission, Some(serde_json::json!("03/04/2025")));

        req.runtime.search_date_before = Some("01/01/2025".into());
        let report = executor.execute(req).await.unwrap();
        assert_eq!(report.submission, Some(serde_json::json!("01/01/2025")));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_child_leads_its_own_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh(
            r#"cat > /dev/null; pgrp=$(cut -d' ' -f5 /proc/$$/stat); [ "$pgrp" = "$$" ] && echo '{}' || exit 3"#,
        );
        assert!(executor.execute(request(dir.path())).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_huge_retry_after_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh(
            r#"cat > /dev/null; echo '{"error": {"kind": "rate_limit", "message": "slow", "retry_after": 1e20}}'; exit 1"#,
        );
        let failure = executor.execute(request(dir.path())).await.unwrap_err();
        assert_eq!(failure.error.retry_after(), Some(MAX_BACKOFF));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new("/nonexistent/prophet-agent");
        let failure = executor.execute(request(dir.path())).await.unwrap_err();
        assert!(matches!(failure.error, ExecutionError::Failed { ref kind, .. } if kind == "spawn_error"));
    }
}
