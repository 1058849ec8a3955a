//! Python execution sandbox
//!
//! Runs one generated script per call in a fresh `python3` subprocess:
//! source is piped over stdin, stdout/stderr are captured with a size cap,
//! and a wall-clock timeout tears the interpreter down. Rendered charts are
//! returned as opaque base64 payloads extracted from delimited stdout
//! markers; the sandbox itself never interprets them.
//!
//! Variable bindings do NOT persist between calls. Every call starts a new
//! interpreter in isolated mode; multi-step analyses thread intermediate
//! values through the agent's data context or regenerated code instead.

use crate::models::ToolErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Stdout markers the generated code uses to emit base64 chart payloads.
pub const ARTIFACT_START: &str = "[VISUALIZATION_BASE64_START]";
pub const ARTIFACT_END: &str = "[VISUALIZATION_BASE64_END]";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Bound on draining captured output after the interpreter exits. A script
/// may have spawned a background process that inherited the pipes; without
/// this bound that process would keep the capture open indefinitely.
const READ_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub python_bin: String,
    pub timeout: Duration,
    /// Captured stdout/stderr are truncated beyond this; the pipes are still
    /// drained so the child never blocks on a full buffer.
    pub max_output_bytes: usize,
    /// Process-wide cap on concurrent executions across invocations.
    pub max_concurrent: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl SandboxConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let python_bin =
            std::env::var("SANDBOX_PYTHON_BIN").unwrap_or(defaults.python_bin);
        let timeout = std::env::var("SANDBOX_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);
        let max_concurrent = std::env::var("SANDBOX_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_concurrent);

        Self {
            python_bin,
            timeout,
            max_output_bytes: defaults.max_output_bytes,
            max_concurrent,
        }
    }
}

/// Result of a single script execution.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Success {
        stdout: String,
        artifacts: Vec<String>,
    },
    Failure {
        kind: ToolErrorKind,
        message: String,
        partial_stdout: String,
    },
}

/// Subprocess executor for untrusted generated Python.
pub struct Sandbox {
    config: SandboxConfig,
    permits: Arc<Semaphore>,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute one script in a fresh interpreter.
    ///
    /// Never returns an `Err`: every failure mode (spawn, runtime
    /// exception, timeout) is a classified `ExecutionResult::Failure` so the
    /// correction policy can decide what to do with it.
    pub async fn execute(&self, code: &str) -> ExecutionResult {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return ExecutionResult::Failure {
                    kind: ToolErrorKind::ExecutionFailed,
                    message: "sandbox worker pool is closed".to_string(),
                    partial_stdout: String::new(),
                }
            }
        };

        debug!(code_len = code.len(), "Sandbox: starting execution");

        let mut cmd = Command::new(&self.config.python_bin);
        // -I: isolated mode. Fresh interpreter state, no user site-packages,
        // no environment hooks. Reading "-" takes the script from stdin.
        cmd.arg("-I")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::Failure {
                    kind: ToolErrorKind::ExecutionFailed,
                    message: format!("failed to start {}: {}", self.config.python_bin, e),
                    partial_stdout: String::new(),
                }
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(code.as_bytes()).await {
                warn!(error = %e, "Sandbox: failed to write script to stdin");
            }
            // Dropping stdin closes the pipe; the interpreter sees EOF.
        }

        let cap = self.config.max_output_bytes;
        let stdout_task = read_capped(child.stdout.take(), cap);
        let stderr_task = read_capped(child.stderr.take(), cap);

        match tokio::time::timeout(self.config.timeout, child.wait()).await {
            // Timed out: tear the interpreter down, then reap it so no
            // process outlives the bound.
            Err(_elapsed) => {
                let _ = child.start_kill();
                let _ = child.wait().await;

                let stdout = join_captured(stdout_task).await;
                let _ = join_captured(stderr_task).await;
                let (partial_stdout, _) = extract_artifacts(&stdout);

                warn!(timeout = ?self.config.timeout, "Sandbox: execution timed out");

                ExecutionResult::Failure {
                    kind: ToolErrorKind::Timeout,
                    message: format!(
                        "execution exceeded the {}s time limit",
                        self.config.timeout.as_secs()
                    ),
                    partial_stdout,
                }
            }
            Ok(Err(e)) => ExecutionResult::Failure {
                kind: ToolErrorKind::ExecutionFailed,
                message: format!("failed to wait on interpreter: {}", e),
                partial_stdout: String::new(),
            },
            Ok(Ok(status)) => {
                let stdout = join_captured(stdout_task).await;
                let stderr = join_captured(stderr_task).await;

                if status.success() {
                    let (clean_stdout, artifacts) = extract_artifacts(&stdout);
                    debug!(
                        stdout_len = clean_stdout.len(),
                        artifact_count = artifacts.len(),
                        "Sandbox: execution succeeded"
                    );
                    ExecutionResult::Success {
                        stdout: clean_stdout,
                        artifacts,
                    }
                } else {
                    let (partial_stdout, _) = extract_artifacts(&stdout);
                    let message = if stderr.trim().is_empty() {
                        format!("interpreter exited with {}", status)
                    } else {
                        stderr.trim().to_string()
                    };

                    warn!(status = %status, "Sandbox: execution failed");

                    ExecutionResult::Failure {
                        kind: ToolErrorKind::ExecutionFailed,
                        message,
                        partial_stdout,
                    }
                }
            }
        }
    }
}

/// Drain a child pipe to completion, keeping at most `cap` bytes.
///
/// Draining past the cap matters: stopping the read would eventually fill
/// the pipe and block the child, which would then hit the timeout instead of
/// finishing.
fn read_capped<R>(reader: Option<R>, cap: usize) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return String::new();
        };

        let mut captured = Vec::new();
        let mut chunk = [0u8; 8192];

        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if captured.len() < cap {
                        let take = n.min(cap - captured.len());
                        captured.extend_from_slice(&chunk[..take]);
                    }
                }
                Err(_) => break,
            }
        }

        String::from_utf8_lossy(&captured).into_owned()
    })
}

async fn join_captured(task: JoinHandle<String>) -> String {
    match tokio::time::timeout(READ_GRACE, task).await {
        Ok(Ok(captured)) => captured,
        _ => String::new(),
    }
}

/// Split delimited base64 chart payloads out of captured stdout.
///
/// Returns the user-visible stdout (markers removed) and the payloads in
/// the order they appeared.
pub fn extract_artifacts(stdout: &str) -> (String, Vec<String>) {
    let mut visible = String::with_capacity(stdout.len());
    let mut artifacts = Vec::new();
    let mut rest = stdout;

    loop {
        let Some(start) = rest.find(ARTIFACT_START) else {
            visible.push_str(rest);
            break;
        };

        visible.push_str(&rest[..start]);
        let after_start = &rest[start + ARTIFACT_START.len()..];

        let Some(end) = after_start.find(ARTIFACT_END) else {
            // Unterminated marker: drop the fragment rather than leak a
            // partial payload into the visible output.
            break;
        };

        let payload = after_start[..end].trim();
        if !payload.is_empty() {
            artifacts.push(payload.to_string());
        }

        rest = &after_start[end + ARTIFACT_END.len()..];
    }

    (visible.trim().to_string(), artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok()
    }

    fn test_sandbox(timeout: Duration) -> Sandbox {
        Sandbox::new(SandboxConfig {
            timeout,
            ..SandboxConfig::default()
        })
    }

    #[test]
    fn test_artifact_extraction() {
        let stdout = format!(
            "volatility: 2.3%\n{}\nYWJjMTIz\n{}\ndone",
            ARTIFACT_START, ARTIFACT_END
        );

        let (visible, artifacts) = extract_artifacts(&stdout);
        assert_eq!(artifacts, vec!["YWJjMTIz".to_string()]);
        assert!(visible.contains("volatility: 2.3%"));
        assert!(visible.contains("done"));
        assert!(!visible.contains(ARTIFACT_START));
    }

    #[test]
    fn test_artifact_extraction_unterminated_marker() {
        let stdout = format!("partial output\n{}\nYWJj", ARTIFACT_START);

        let (visible, artifacts) = extract_artifacts(&stdout);
        assert!(artifacts.is_empty());
        assert_eq!(visible, "partial output");
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }

        let sandbox = test_sandbox(Duration::from_secs(10));
        match sandbox.execute("print(2+2)").await {
            ExecutionResult::Success { stdout, artifacts } => {
                assert_eq!(stdout, "4");
                assert!(artifacts.is_empty());
            }
            ExecutionResult::Failure { message, .. } => {
                panic!("expected success, got failure: {}", message)
            }
        }
    }

    #[tokio::test]
    async fn test_no_state_leaks_between_calls() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }

        let sandbox = test_sandbox(Duration::from_secs(10));

        match sandbox.execute("shared_value = 42\nprint('set')").await {
            ExecutionResult::Success { stdout, .. } => assert_eq!(stdout, "set"),
            ExecutionResult::Failure { message, .. } => {
                panic!("first call failed: {}", message)
            }
        }

        // A fresh interpreter must not see the previous call's bindings.
        match sandbox.execute("print(shared_value)").await {
            ExecutionResult::Failure { kind, message, .. } => {
                assert_eq!(kind, ToolErrorKind::ExecutionFailed);
                assert!(message.contains("NameError"), "message: {}", message);
            }
            ExecutionResult::Success { stdout, .. } => {
                panic!("bindings leaked across calls: {}", stdout)
            }
        }
    }

    #[tokio::test]
    async fn test_timeout_enforced() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }

        let timeout = Duration::from_secs(1);
        let sandbox = test_sandbox(timeout);

        let start = Instant::now();
        let result = sandbox.execute("while True:\n    pass").await;
        let elapsed = start.elapsed();

        match result {
            ExecutionResult::Failure { kind, .. } => {
                assert_eq!(kind, ToolErrorKind::Timeout)
            }
            ExecutionResult::Success { .. } => panic!("expected timeout"),
        }

        // Timeout plus a small teardown epsilon; the child is reaped before
        // execute returns, so nothing is left running here.
        assert!(
            elapsed < timeout + Duration::from_secs(2),
            "teardown took {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_stdout() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }

        let sandbox = test_sandbox(Duration::from_secs(10));
        let code = "print('step 1 done')\nraise ValueError('bad input')";

        match sandbox.execute(code).await {
            ExecutionResult::Failure {
                kind,
                message,
                partial_stdout,
            } => {
                assert_eq!(kind, ToolErrorKind::ExecutionFailed);
                assert!(message.contains("ValueError"));
                assert_eq!(partial_stdout, "step 1 done");
            }
            ExecutionResult::Success { .. } => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_collects_chart_artifacts() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }

        let sandbox = test_sandbox(Duration::from_secs(10));
        let code = format!(
            "print('{}')\nprint('aGVsbG8=')\nprint('{}')\nprint('chart rendered')",
            ARTIFACT_START, ARTIFACT_END
        );

        match sandbox.execute(&code).await {
            ExecutionResult::Success { stdout, artifacts } => {
                assert_eq!(artifacts, vec!["aGVsbG8=".to_string()]);
                assert_eq!(stdout, "chart rendered");
            }
            ExecutionResult::Failure { message, .. } => {
                panic!("expected success, got: {}", message)
            }
        }
    }
}
