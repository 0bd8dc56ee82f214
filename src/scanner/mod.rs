//! Scanner adapter contract and the shared tool-process runner.
//!
//! Every concrete tool plugs into the pipeline through [`ScannerAdapter`]:
//! availability probe, version, execution against a prepared workspace, and
//! parsing of the tool's native output into raw findings. New tools are added
//! by implementing the trait, not by branching on tool name.

pub mod checkov;
pub mod gitleaks;
pub mod nuclei;
pub mod opengrep;
pub mod osv;
pub mod trivy;

use crate::errors::{Result, ScanError};
use crate::types::finding::{Confidence, ScanCategory, Severity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Native output format an adapter's tool emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    /// One JSON object per line
    Jsonl,
    Sarif,
}

/// Per-invocation input handed to an adapter. Constructed fresh per call;
/// never shared across tenants.
#[derive(Debug, Clone)]
pub struct ScanContext {
    /// The scan's dedicated workspace; adapters must not write outside it
    pub work_dir: PathBuf,
    /// When non-empty, restrict scanning to these paths (workspace-relative)
    pub target_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    /// Languages detected in the workspace, as a hint for tools that take one
    pub languages: Vec<String>,
    /// Hard wall-clock budget for the tool process
    pub timeout_secs: u64,
    /// Tool-specific knobs (rules dir, image name, target url)
    pub tool_config: HashMap<String, serde_json::Value>,
}

impl ScanContext {
    pub fn new(work_dir: PathBuf, timeout_secs: u64) -> Self {
        Self {
            work_dir,
            target_paths: Vec::new(),
            exclude_paths: Vec::new(),
            languages: Vec::new(),
            timeout_secs,
            tool_config: HashMap::new(),
        }
    }

    /// String knob from `tool_config`.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.tool_config.get(key).and_then(|v| v.as_str())
    }
}

/// Raw adapter result. Exit code and captured streams are data, not control
/// flow; immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_file: Option<PathBuf>,
    pub duration_secs: f64,
    pub timed_out: bool,
}

/// Tool-native finding before normalization. Severity and confidence are the
/// tool's own strings; the adapter supplies the mapping into the canonical
/// scale.
#[derive(Debug, Clone, Default)]
pub struct RawFinding {
    pub rule_id: String,
    pub severity: String,
    pub confidence: Option<String>,
    pub title: String,
    pub description: String,
    pub file_path: PathBuf,
    pub line: usize,
    pub end_line: usize,
    pub column: usize,
    pub snippet: Option<String>,
    pub fix: Option<String>,
    pub cwe_ids: Vec<String>,
    pub cve_ids: Vec<String>,
    pub owasp_ids: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Uniform wrapper around one concrete scanning tool.
#[async_trait]
pub trait ScannerAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> ScanCategory;

    fn supported_languages(&self) -> &[&'static str] {
        &[]
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::Json
    }

    /// Probe whether the underlying tool can be invoked. Never errors.
    async fn is_available(&self) -> bool {
        self.version().await.is_ok()
    }

    /// The tool's reported version string.
    async fn version(&self) -> Result<String>;

    /// Execute the tool against `context.work_dir`, bounded by
    /// `context.timeout_secs`. Returns a [`ScanOutput`] even on non-zero
    /// exit; the timeout is a hard bound that kills the process.
    async fn scan(&self, context: &ScanContext) -> Result<ScanOutput>;

    /// Deserialize the tool's native output into raw findings. A non-zero
    /// exit code with valid output parses normally; tools commonly exit
    /// non-zero on "findings present".
    fn parse_output(&self, output: &ScanOutput) -> Result<Vec<RawFinding>>;

    /// Total map from the tool's severity scale to the canonical one.
    /// Unrecognized values map to `low`, never dropped.
    fn map_severity(&self, raw: &str) -> Severity;

    /// Total map for confidence; unrecognized values map to `low`.
    fn map_confidence(&self, raw: &str) -> Confidence {
        match raw.to_lowercase().as_str() {
            "high" | "certain" | "confirmed" => Confidence::High,
            "medium" | "firm" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// Run `bin --version` and return the first line of output.
pub async fn probe_version(bin: &str) -> Result<String> {
    let output = Command::new(bin)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ScanError::ToolUnavailable {
            tool: bin.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ScanError::ToolUnavailable {
            tool: bin.to_string(),
            reason: format!("--version exited with {:?}", output.status.code()),
        });
    }

    let version = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("unknown")
        .trim()
        .to_string();
    Ok(version)
}

/// Run a tool process with captured streams and a hard timeout.
///
/// On timeout the child is killed; output flushed before the kill is kept and
/// `timed_out` is set. A spawn failure is the only error path — everything
/// the process itself does is returned as data.
pub async fn run_tool(
    bin: &str,
    args: &[String],
    cwd: &std::path::Path,
    timeout_secs: u64,
) -> Result<ScanOutput> {
    let start = Instant::now();
    log::debug!("running {bin} {} (cwd {})", args.join(" "), cwd.display());

    let mut child = Command::new(bin)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ScanError::ToolUnavailable {
            tool: bin.to_string(),
            reason: e.to_string(),
        })?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");

    // Drain the pipes concurrently so a chatty tool cannot deadlock on a
    // full pipe buffer, and so flushed output survives a timeout kill.
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let mut timed_out = false;
    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|e| ScanError::Io(format!("waiting for {bin}"), e))?
        }
        _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
            timed_out = true;
            log::warn!("{bin} exceeded its {timeout_secs}s budget, killing");
            let _ = child.start_kill();
            child
                .wait()
                .await
                .map_err(|e| ScanError::Io(format!("reaping {bin}"), e))?
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(ScanOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        output_file: None,
        duration_secs: start.elapsed().as_secs_f64(),
        timed_out,
    })
}
