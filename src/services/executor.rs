//! External tool execution with a wall-clock timeout.
//!
//! A run only counts as successful when the process exits with status 0 and
//! the expected output exists afterwards.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

/// One invocation of an external converter.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    /// File or directory that must exist after a successful run.
    pub expected_output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub output_path: PathBuf,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

pub async fn run_tool(invocation: &ToolInvocation) -> Result<ToolOutput, ConversionError> {
    let start = Instant::now();

    tracing::info!(
        tool = %invocation.program,
        args = ?invocation.args,
        timeout_secs = invocation.timeout.as_secs(),
        "Running conversion tool"
    );

    let mut cmd = Command::new(program_path(&invocation.program));
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &invocation.working_dir {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConversionError::ToolUnavailable(invocation.program.clone())
        } else {
            ConversionError::Io(e)
        }
    })?;

    let output = match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            // The child future was dropped, kill_on_drop terminates the process.
            tracing::error!(
                tool = %invocation.program,
                timeout_secs = invocation.timeout.as_secs(),
                "Conversion tool timed out"
            );
            metrics::counter!("conversion_tool_runs_total", "tool" => invocation.program.clone(), "outcome" => "timeout")
                .increment(1);
            return Err(ConversionError::Timeout {
                tool: invocation.program.clone(),
                secs: invocation.timeout.as_secs(),
            });
        }
    };

    let duration = start.elapsed();
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        tracing::error!(
            tool = %invocation.program,
            exit_code = code,
            stderr = %truncate(&stderr, 500),
            "Conversion tool failed"
        );
        metrics::counter!("conversion_tool_runs_total", "tool" => invocation.program.clone(), "outcome" => "failed")
            .increment(1);
        return Err(ConversionError::ProcessFailed {
            tool: invocation.program.clone(),
            code,
            stderr: truncate(&stderr, 2000),
        });
    }

    if !tokio::fs::try_exists(&invocation.expected_output).await.unwrap_or(false) {
        tracing::warn!(
            tool = %invocation.program,
            expected = %invocation.expected_output.display(),
            "Conversion tool exited cleanly but produced no output"
        );
        metrics::counter!("conversion_tool_runs_total", "tool" => invocation.program.clone(), "outcome" => "no_output")
            .increment(1);
        return Err(ConversionError::OutputMissing(invocation.expected_output.clone()));
    }

    tracing::info!(
        tool = %invocation.program,
        duration_ms = duration.as_millis() as u64,
        output = %invocation.expected_output.display(),
        "Conversion tool completed"
    );
    metrics::counter!("conversion_tool_runs_total", "tool" => invocation.program.clone(), "outcome" => "ok")
        .increment(1);

    Ok(ToolOutput {
        output_path: invocation.expected_output.clone(),
        stdout,
        stderr,
        duration,
    })
}

/// Whether `program` can be found on `PATH` (or is an existing path).
pub async fn is_available(program: &str) -> bool {
    if Path::new(program).components().count() > 1 {
        return tokio::fs::try_exists(program).await.unwrap_or(false);
    }

    let finder = if cfg!(target_os = "windows") { "where" } else { "which" };
    Command::new(finder)
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// A program given as a relative path would otherwise be looked up from the
/// tool's working directory.
fn program_path(program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.components().count() > 1 && path.is_relative() {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    } else {
        path.to_path_buf()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Conversion tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: String, secs: u64 },

    #[error("{tool} failed with exit code {code}: {stderr}")]
    ProcessFailed { tool: String, code: i32, stderr: String },

    #[error("Expected conversion output not created: {0}")]
    OutputMissing(PathBuf),

    #[error("No converter configured for {0}")]
    NotConfigured(String),

    #[error("IO error during conversion: {0}")]
    Io(#[from] std::io::Error),
}
