//! End-to-end pipeline tests against mock scanners and sinks.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use scanforge::config::AppConfig;
use scanforge::errors::{Result, ScanError};
use scanforge::interfaces::{FindingSink, NotificationSink};
use scanforge::pipeline::{cancellation, Orchestrator, ScanState};
use scanforge::scanner::{OutputFormat, RawFinding, ScanContext, ScanOutput, ScannerAdapter};
use scanforge::target_scan::{TargetAuth, TargetScanConfig, TargetScanJobData};
use scanforge::types::finding::{NormalizedFinding, ScanCategory, ScanStatus, Severity};
use scanforge::types::job::{NotifyJobData, ScanConfig, ScanJobData};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Scanner stub with scripted availability, findings, and latency.
struct MockAdapter {
    name: &'static str,
    category: ScanCategory,
    available: bool,
    findings: Vec<RawFinding>,
    delay: Duration,
    report_timed_out: bool,
    captured_context: Mutex<Option<ScanContext>>,
}

impl MockAdapter {
    fn new(name: &'static str, category: ScanCategory) -> Self {
        Self {
            name,
            category,
            available: true,
            findings: Vec::new(),
            delay: Duration::ZERO,
            report_timed_out: false,
            captured_context: Mutex::new(None),
        }
    }

    fn with_finding(mut self, raw: RawFinding) -> Self {
        self.findings.push(raw);
        self
    }

    fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn reporting_timeout(mut self) -> Self {
        self.report_timed_out = true;
        self
    }
}

#[async_trait]
impl ScannerAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn category(&self) -> ScanCategory {
        self.category
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::Json
    }

    async fn version(&self) -> Result<String> {
        if self.available {
            Ok("mock 1.0.0".to_string())
        } else {
            Err(ScanError::ToolUnavailable {
                tool: self.name.to_string(),
                reason: "not installed".to_string(),
            })
        }
    }

    async fn scan(&self, context: &ScanContext) -> Result<ScanOutput> {
        *self.captured_context.lock() = Some(context.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(ScanOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            output_file: None,
            duration_secs: 0.0,
            timed_out: self.report_timed_out,
        })
    }

    fn parse_output(&self, _output: &ScanOutput) -> Result<Vec<RawFinding>> {
        Ok(self.findings.clone())
    }

    fn map_severity(&self, raw: &str) -> Severity {
        raw.parse().unwrap_or(Severity::Low)
    }
}

#[derive(Default)]
struct CaptureSink {
    stored: Mutex<Vec<NormalizedFinding>>,
}

#[async_trait]
impl FindingSink for CaptureSink {
    async fn store(&self, _scan_id: &str, findings: &[NormalizedFinding]) -> Result<()> {
        self.stored.lock().extend_from_slice(findings);
        Ok(())
    }
}

#[derive(Default)]
struct CaptureNotifications {
    payloads: Mutex<Vec<NotifyJobData>>,
}

#[async_trait]
impl NotificationSink for CaptureNotifications {
    async fn deliver(&self, payload: &NotifyJobData) -> Result<()> {
        self.payloads.lock().push(payload.clone());
        Ok(())
    }
}

fn raw_finding(rule: &str, path: &str, line: usize, severity: &str) -> RawFinding {
    RawFinding {
        rule_id: rule.to_string(),
        severity: severity.to_string(),
        title: format!("{rule} triggered"),
        description: "mock finding".to_string(),
        file_path: PathBuf::from(path),
        line,
        end_line: line,
        snippet: Some("let x = 1;".to_string()),
        ..Default::default()
    }
}

/// Tiny local git repository to clone from.
fn seed_repo(dir: &Path) {
    let run = |args: &[&str]| {
        let st = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(st.success(), "git {args:?} failed");
    };
    run(&["init", "-q"]);
    run(&["config", "user.email", "t@example.com"]);
    run(&["config", "user.name", "t"]);
    std::fs::write(dir.join("lib.rs"), "fn main() {}\n").unwrap();
    run(&["add", "."]);
    run(&["commit", "-q", "-m", "init"]);
}

fn job(repo_url: &str, config: ScanConfig) -> ScanJobData {
    ScanJobData {
        scan_id: "scan-1".to_string(),
        tenant_id: "acme".to_string(),
        repository_id: "repo-1".to_string(),
        repo_url: repo_url.to_string(),
        branch: None,
        commit_sha: None,
        config,
        created_at: Utc::now(),
    }
}

fn sast_only() -> ScanConfig {
    ScanConfig {
        enable_sast: true,
        enable_sca: false,
        enable_secrets: false,
        clone_depth: Some(0), // file-path clones do not support shallow
        ..Default::default()
    }
}

fn test_orchestrator(workspace_root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.orchestrator.workspace_root = workspace_root.to_path_buf();
    config
}

#[tokio::test]
async fn test_scan_with_findings_reports_failure_and_cleans_up() {
    let repo = tempfile::tempdir().unwrap();
    seed_repo(repo.path());
    let workspaces = tempfile::tempdir().unwrap();

    let sink = Arc::new(CaptureSink::default());
    let notifications = Arc::new(CaptureNotifications::default());
    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_adapter(Arc::new(
            MockAdapter::new("mock-sast", ScanCategory::Sast)
                .with_finding(raw_finding("sql-injection", "lib.rs", 1, "high")),
        ))
        .with_finding_sink(sink.clone())
        .with_notification_sink(notifications.clone());

    let (_tx, rx) = cancellation();
    let report = orchestrator
        .run_scan(job(&repo.path().display().to_string(), sast_only()), rx)
        .await
        .unwrap();

    assert_eq!(report.state, ScanState::Done);
    assert_eq!(report.status, ScanStatus::Failure);
    assert_eq!(report.findings_count.high, 1);

    let stored = sink.stored.lock();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].rule_id, "sql-injection");
    assert!(!stored[0].fingerprint.is_empty());

    let payloads = notifications.payloads.lock();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].status, ScanStatus::Failure);
    assert_eq!(payloads[0].findings_count.high, 1);

    // Cleanup ran: no per-scan directories left behind
    assert_eq!(std::fs::read_dir(workspaces.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_clean_scan_is_success() {
    let repo = tempfile::tempdir().unwrap();
    seed_repo(repo.path());
    let workspaces = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_adapter(Arc::new(MockAdapter::new("mock-sast", ScanCategory::Sast)));

    let (_tx, rx) = cancellation();
    let report = orchestrator
        .run_scan(job(&repo.path().display().to_string(), sast_only()), rx)
        .await
        .unwrap();

    assert_eq!(report.status, ScanStatus::Success);
    assert_eq!(report.findings_count.total(), 0);
}

#[tokio::test]
async fn test_one_failed_category_does_not_abort_siblings() {
    let repo = tempfile::tempdir().unwrap();
    seed_repo(repo.path());
    let workspaces = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_adapter(Arc::new(
            MockAdapter::new("mock-sast", ScanCategory::Sast).unavailable(),
        ))
        .with_adapter(Arc::new(
            MockAdapter::new("mock-secrets", ScanCategory::Secrets)
                .with_finding(raw_finding("aws-key", "lib.rs", 1, "critical")),
        ));

    let config = ScanConfig {
        enable_sast: true,
        enable_sca: false,
        enable_secrets: true,
        clone_depth: Some(0),
        ..Default::default()
    };
    let (_tx, rx) = cancellation();
    let report = orchestrator
        .run_scan(job(&repo.path().display().to_string(), config), rx)
        .await
        .unwrap();

    assert_eq!(report.status, ScanStatus::Failure);
    assert_eq!(report.findings_count.critical, 1);
    assert!(report.outcomes[&ScanCategory::Sast].is_failed());
    assert!(!report.outcomes[&ScanCategory::Secrets].is_failed());
}

#[tokio::test]
async fn test_all_categories_failed_is_neutral_not_success() {
    let repo = tempfile::tempdir().unwrap();
    seed_repo(repo.path());
    let workspaces = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_adapter(Arc::new(
            MockAdapter::new("mock-sast", ScanCategory::Sast).unavailable(),
        ));

    let (_tx, rx) = cancellation();
    let report = orchestrator
        .run_scan(job(&repo.path().display().to_string(), sast_only()), rx)
        .await
        .unwrap();

    assert_eq!(report.status, ScanStatus::Neutral);
}

#[tokio::test]
async fn test_clone_failure_notifies_and_cleans_up() {
    let workspaces = tempfile::tempdir().unwrap();
    let notifications = Arc::new(CaptureNotifications::default());
    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_notification_sink(notifications.clone());

    let (_tx, rx) = cancellation();
    let report = orchestrator
        .run_scan(job("/nonexistent/repo.git", sast_only()), rx)
        .await
        .unwrap();

    assert_eq!(report.state, ScanState::Failed);
    assert_eq!(report.status, ScanStatus::Failure);

    let payloads = notifications.payloads.lock();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].reason.as_deref(), Some("clone_failure"));

    assert_eq!(std::fs::read_dir(workspaces.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_cancellation_stops_stages_and_cleans_up() {
    let repo = tempfile::tempdir().unwrap();
    seed_repo(repo.path());
    let workspaces = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_adapter(Arc::new(
            MockAdapter::new("mock-sast", ScanCategory::Sast)
                .with_delay(Duration::from_secs(30)),
        ));

    let (tx, rx) = cancellation();
    tx.send(true).unwrap();

    let started = std::time::Instant::now();
    let report = orchestrator
        .run_scan(job(&repo.path().display().to_string(), sast_only()), rx)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(20), "cancel must not wait the scan out");
    assert_eq!(report.state, ScanState::Failed);
    assert!(report.warnings.iter().any(|w| w == "cancelled"));
    assert_eq!(std::fs::read_dir(workspaces.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_pr_diff_only_keeps_changed_lines() {
    let repo = tempfile::tempdir().unwrap();
    seed_repo(repo.path());
    let workspaces = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_adapter(Arc::new(
            MockAdapter::new("mock-sast", ScanCategory::Sast)
                .with_finding(raw_finding("in-diff", "lib.rs", 12, "medium"))
                .with_finding(raw_finding("out-of-diff", "lib.rs", 40, "medium")),
        ));

    let config = ScanConfig {
        pr_diff_only: true,
        pr_diff: Some(
            "--- a/lib.rs\n+++ b/lib.rs\n@@ -10,6 +10,6 @@\n context\n".to_string(),
        ),
        ..sast_only()
    };
    let (_tx, rx) = cancellation();
    let report = orchestrator
        .run_scan(job(&repo.path().display().to_string(), config), rx)
        .await
        .unwrap();

    let findings = report.outcomes[&ScanCategory::Sast].findings();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].rule_id, "in-diff");
}

#[tokio::test]
async fn test_fingerprints_are_deterministic_across_runs() {
    let repo = tempfile::tempdir().unwrap();
    seed_repo(repo.path());
    let workspaces = tempfile::tempdir().unwrap();

    let adapter = || {
        Arc::new(
            MockAdapter::new("mock-sast", ScanCategory::Sast)
                .with_finding(raw_finding("sql-injection", "lib.rs", 12, "high")),
        )
    };

    let mut fingerprints = Vec::new();
    for scan_id in ["scan-a", "scan-b"] {
        let sink = Arc::new(CaptureSink::default());
        let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
            .with_adapter(adapter())
            .with_finding_sink(sink.clone());
        let mut j = job(&repo.path().display().to_string(), sast_only());
        j.scan_id = scan_id.to_string();
        let (_tx, rx) = cancellation();
        orchestrator.run_scan(j, rx).await.unwrap();
        let stored = sink.stored.lock();
        fingerprints.push(stored[0].fingerprint.clone());
    }

    assert_eq!(fingerprints[0], fingerprints[1]);
}

fn target_job(config: TargetScanConfig) -> TargetScanJobData {
    TargetScanJobData {
        scan_id: "target-1".to_string(),
        tenant_id: "acme".to_string(),
        target_id: "web-1".to_string(),
        target_url: "https://app.example.com".to_string(),
        target_name: None,
        config,
    }
}

fn bare_target_config() -> TargetScanConfig {
    TargetScanConfig {
        scan_mode: None,
        scanners: Vec::new(),
        scan_phase: None,
        technologies: Vec::new(),
        auth: None,
        headers: HashMap::new(),
        rate_limit_preset: None,
        rate_limit_rps: None,
        exclude_paths: Vec::new(),
        timeout_secs: None,
    }
}

#[tokio::test]
async fn test_target_scan_forwards_headers_and_auth_to_adapter() {
    let workspaces = tempfile::tempdir().unwrap();
    let adapter = Arc::new(MockAdapter::new("mock-dast", ScanCategory::Dast));
    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_adapter(adapter.clone());

    let mut config = bare_target_config();
    config.headers.insert("X-Api-Key".to_string(), "k1".to_string());
    config.auth = Some(TargetAuth {
        auth_type: "bearer".to_string(),
        username: None,
        secret: Some("tok123".to_string()),
    });

    let (_tx, rx) = cancellation();
    orchestrator
        .run_target_scan(target_job(config), rx)
        .await
        .unwrap();

    let captured = adapter.captured_context.lock();
    let context = captured.as_ref().expect("adapter was invoked");
    let headers = context.tool_config["headers"].as_array().unwrap();
    assert!(headers.contains(&serde_json::json!(["X-Api-Key", "k1"])));
    assert!(headers.contains(&serde_json::json!(["Authorization", "Bearer tok123"])));
}

#[tokio::test]
async fn test_timed_out_category_recorded_in_summary() {
    let repo = tempfile::tempdir().unwrap();
    seed_repo(repo.path());
    let workspaces = tempfile::tempdir().unwrap();

    let notifications = Arc::new(CaptureNotifications::default());
    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_adapter(Arc::new(
            MockAdapter::new("mock-sast", ScanCategory::Sast)
                .with_finding(raw_finding("slow-rule", "lib.rs", 1, "high"))
                .reporting_timeout(),
        ))
        .with_notification_sink(notifications.clone());

    let (_tx, rx) = cancellation();
    let report = orchestrator
        .run_scan(job(&repo.path().display().to_string(), sast_only()), rx)
        .await
        .unwrap();

    // Flushed findings survive the kill and are still counted
    assert_eq!(report.findings_count.high, 1);
    assert_eq!(report.timed_out, vec![ScanCategory::Sast]);

    let payloads = notifications.payloads.lock();
    assert!(payloads[0].category_summary[&ScanCategory::Sast].contains("timed out"));
}

#[tokio::test]
async fn test_target_scan_cancellation_fails_scan_and_cleans_up() {
    let workspaces = tempfile::tempdir().unwrap();
    let notifications = Arc::new(CaptureNotifications::default());
    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_adapter(Arc::new(
            MockAdapter::new("mock-dast", ScanCategory::Dast)
                .with_delay(Duration::from_secs(30)),
        ))
        .with_notification_sink(notifications.clone());

    let (tx, rx) = cancellation();
    tx.send(true).unwrap();

    let started = std::time::Instant::now();
    let report = orchestrator
        .run_target_scan(target_job(bare_target_config()), rx)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(report.state, ScanState::Failed);
    assert!(report.warnings.iter().any(|w| w == "cancelled"));
    assert!(notifications.payloads.lock().is_empty(), "no summary for a cancelled scan");
    assert_eq!(std::fs::read_dir(workspaces.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_inactive_tenant_rejected_before_clone() {
    struct SuspendAll;

    #[async_trait]
    impl scanforge::interfaces::TenantGate for SuspendAll {
        async fn is_active(&self, _tenant_id: &str) -> Result<bool> {
            Ok(false)
        }
    }

    let workspaces = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(test_orchestrator(workspaces.path()))
        .with_tenant_gate(Arc::new(SuspendAll));

    let (_tx, rx) = cancellation();
    let err = orchestrator
        .run_scan(job("/unused", sast_only()), rx)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::TenantInactive { .. }));
    assert_eq!(std::fs::read_dir(workspaces.path()).unwrap().count(), 0);
}
