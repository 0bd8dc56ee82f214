//! Job pipeline orchestration.
//!
//! One scan moves through `queued → cloning → scanning → collecting →
//! notifying → cleaning → done`, with `failed` reachable from any non-terminal
//! state. Category stages fan out concurrently after Clone and are joined as
//! tagged outcomes; a single category's failure never aborts its siblings.
//! Cleanup releases the workspace on every exit path.

pub mod admission;
pub mod clone;
pub mod notify;
pub mod workspace;

use crate::config::AppConfig;
use crate::errors::{Result, ScanError};
use crate::interfaces::{
    AllowAllTenants, DiscardFindings, FindingSink, NotificationSink, NoToken, TenantGate,
    TokenProvider,
};
use crate::normalizer::{self, DiffCoverage};
use crate::scanner::{
    checkov::CheckovAdapter, gitleaks::GitleaksAdapter, nuclei::NucleiAdapter,
    opengrep::OpenGrepAdapter, osv::OsvScannerAdapter, trivy::TrivyAdapter, ScanContext,
    ScannerAdapter,
};
use crate::target_scan::{self, TargetScanJobData};
use crate::types::finding::{
    CategoryOutcome, FindingsCount, NormalizedFinding, ScanCategory, ScanStatus, Severity,
};
use crate::types::job::{CloneJobData, NotifyJobData, ScanJobData};
use admission::{ConcurrencyBudget, SubmissionThrottle};
use notify::Notifier;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use workspace::Workspace;

/// Pipeline state for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Queued,
    Cloning,
    Scanning,
    Collecting,
    Notifying,
    Cleaning,
    Done,
    Failed,
}

/// Final report for one scan run.
#[derive(Debug)]
pub struct ScanReport {
    pub scan_id: String,
    pub state: ScanState,
    pub status: ScanStatus,
    pub findings_count: FindingsCount,
    pub outcomes: HashMap<ScanCategory, CategoryOutcome>,
    /// Categories whose tool hit the hard timeout; their flushed output is
    /// still collected, but the budget overrun is recorded
    pub timed_out: Vec<ScanCategory>,
    pub duration_secs: f64,
    /// Non-fatal problems (delivery failure, cancellation)
    pub warnings: Vec<String>,
}

/// Joined result of the staged part of one scan (clone through collection).
struct StageOutput {
    state: ScanState,
    status: ScanStatus,
    findings_count: FindingsCount,
    outcomes: HashMap<ScanCategory, CategoryOutcome>,
    timed_out: Vec<ScanCategory>,
    warnings: Vec<String>,
}

/// Cancellation handle for an in-flight scan.
pub fn cancellation() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

pub struct Orchestrator {
    config: AppConfig,
    adapters: HashMap<ScanCategory, Arc<dyn ScannerAdapter>>,
    tenant_gate: Arc<dyn TenantGate>,
    token_provider: Arc<dyn TokenProvider>,
    finding_sink: Arc<dyn FindingSink>,
    notification_sink: Option<Arc<dyn NotificationSink>>,
    budget: ConcurrencyBudget,
    throttle: SubmissionThrottle,
}

impl Orchestrator {
    /// Orchestrator with the built-in adapter per category.
    pub fn new(config: AppConfig) -> Self {
        let tools = &config.tools;
        let mut adapters: HashMap<ScanCategory, Arc<dyn ScannerAdapter>> = HashMap::new();
        adapters.insert(ScanCategory::Sast, Arc::new(OpenGrepAdapter::from_config(tools)));
        adapters.insert(ScanCategory::Sca, Arc::new(OsvScannerAdapter::from_config(tools)));
        adapters.insert(ScanCategory::Secrets, Arc::new(GitleaksAdapter::from_config(tools)));
        adapters.insert(ScanCategory::Iac, Arc::new(CheckovAdapter::from_config(tools)));
        adapters.insert(ScanCategory::Dast, Arc::new(NucleiAdapter::from_config(tools)));
        adapters.insert(ScanCategory::Container, Arc::new(TrivyAdapter::from_config(tools)));

        let notification_sink: Option<Arc<dyn NotificationSink>> =
            config.notify.webhook_url.as_ref().map(|url| {
                Arc::new(notify::WebhookSink::new(
                    url.clone(),
                    config.notify.request_timeout_secs,
                )) as Arc<dyn NotificationSink>
            });

        let budget = ConcurrencyBudget::new(config.admission.max_concurrent_scans_per_tenant);
        let throttle = SubmissionThrottle::new(&config.admission);

        Self {
            config,
            adapters,
            tenant_gate: Arc::new(AllowAllTenants),
            token_provider: Arc::new(NoToken),
            finding_sink: Arc::new(DiscardFindings),
            notification_sink,
            budget,
            throttle,
        }
    }

    /// Replace the adapter for one category (tests, alternative tools).
    pub fn with_adapter(mut self, adapter: Arc<dyn ScannerAdapter>) -> Self {
        self.adapters.insert(adapter.category(), adapter);
        self
    }

    pub fn with_tenant_gate(mut self, gate: Arc<dyn TenantGate>) -> Self {
        self.tenant_gate = gate;
        self
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = provider;
        self
    }

    pub fn with_finding_sink(mut self, sink: Arc<dyn FindingSink>) -> Self {
        self.finding_sink = sink;
        self
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notification_sink = Some(sink);
        self
    }

    /// Admission check for a new submission. Gates submissions only, never
    /// in-flight work.
    pub fn admit(&self, tenant_id: Option<&str>, remote_addr: &str) -> Result<()> {
        let key = SubmissionThrottle::key(tenant_id, remote_addr);
        self.throttle.check(&key)
    }

    /// Run one repository scan end to end.
    pub async fn run_scan(
        &self,
        job: ScanJobData,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ScanReport> {
        let start = Instant::now();
        log::info!("scan {}: queued for tenant {}", job.scan_id, job.tenant_id);

        if !self.tenant_gate.is_active(&job.tenant_id).await? {
            return Err(ScanError::TenantInactive {
                tenant_id: job.tenant_id.clone(),
            });
        }
        let _permit = self.budget.try_admit(&job.tenant_id)?;

        let workspace = Workspace::create(&self.config.orchestrator.workspace_root, &job.scan_id)?;

        // Everything after workspace acquisition funnels through the cleanup
        // path below, whatever the stage outcome.
        let mut staged = self.run_stages(&job, &workspace, &mut cancel).await;

        log::debug!("scan {}: cleaning", job.scan_id);
        if let Err(e) = workspace.release() {
            log::warn!("scan {}: cleanup failed: {e}", job.scan_id);
            staged.warnings.push(format!("cleanup failed: {e}"));
        }

        let duration_secs = start.elapsed().as_secs_f64();
        if let Some(sink) = &self.notification_sink {
            if staged.state != ScanState::Failed || staged.status == ScanStatus::Failure {
                let payload = NotifyJobData {
                    scan_id: job.scan_id.clone(),
                    tenant_id: job.tenant_id.clone(),
                    findings_count: staged.findings_count,
                    status: staged.status,
                    duration_secs,
                    category_summary: summarize(&staged.outcomes, &staged.timed_out),
                    reason: staged.warnings.first().cloned(),
                };
                let notifier = Notifier::new(sink.as_ref(), &self.config.notify);
                if let Err(e) = notifier.deliver(&payload).await {
                    staged.warnings.push(e.to_string());
                }
            }
        }

        log::info!(
            "scan {}: finished in {duration_secs:.1}s with status {}",
            job.scan_id,
            staged.status
        );

        Ok(ScanReport {
            scan_id: job.scan_id,
            state: if staged.state == ScanState::Failed {
                ScanState::Failed
            } else {
                ScanState::Done
            },
            status: staged.status,
            findings_count: staged.findings_count,
            outcomes: staged.outcomes,
            timed_out: staged.timed_out,
            duration_secs,
            warnings: staged.warnings,
        })
    }

    async fn run_stages(
        &self,
        job: &ScanJobData,
        workspace: &Workspace,
        cancel: &mut watch::Receiver<bool>,
    ) -> StageOutput {
        let mut warnings = Vec::new();

        // Clone
        log::debug!("scan {}: cloning {}", job.scan_id, job.repo_url);
        let token = match self
            .token_provider
            .clone_token(&job.tenant_id, &job.repository_id)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warnings.push(format!("token provider failed: {e}"));
                None
            }
        };

        let clone_job = CloneJobData {
            scan_id: job.scan_id.clone(),
            tenant_id: job.tenant_id.clone(),
            repo_url: job.repo_url.clone(),
            branch: job.branch.clone(),
            commit_sha: job.commit_sha.clone(),
            depth: job.config.clone_depth,
        };
        if let Err(e) = clone::run_clone(
            &self.config.tools.git_bin,
            &clone_job,
            token.as_deref(),
            &workspace.repo_dir(),
            self.config.orchestrator.clone_timeout_secs,
        )
        .await
        {
            log::error!("scan {}: {e}", job.scan_id);
            warnings.push("clone_failure".to_string());
            return StageOutput {
                state: ScanState::Failed,
                status: ScanStatus::Failure,
                findings_count: FindingsCount::default(),
                outcomes: HashMap::new(),
                timed_out: Vec::new(),
                warnings,
            };
        }

        // Category fan-out
        log::debug!("scan {}: scanning", job.scan_id);
        let scheduled = job.config.enabled_categories();
        let mut join_set: JoinSet<(ScanCategory, CategoryOutcome, bool)> = JoinSet::new();
        for category in &scheduled {
            let category = *category;
            let Some(adapter) = self.adapters.get(&category).cloned() else {
                continue;
            };
            let context = self.category_context(job, workspace, category);
            let mut cancel_rx = cancel.clone();
            join_set.spawn(async move {
                tokio::select! {
                    (outcome, timed_out) = run_category(adapter, context) => {
                        (category, outcome, timed_out)
                    }
                    _ = cancel_rx.wait_for(|c| *c) => {
                        (category, CategoryOutcome::Failed { reason: "cancelled".to_string() }, false)
                    }
                }
            });
        }

        // Collect: join over the fixed scheduled set, a barrier not a race
        let mut outcomes: HashMap<ScanCategory, CategoryOutcome> = HashMap::new();
        let mut timed_out: Vec<ScanCategory> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((category, outcome, category_timed_out)) => {
                    outcomes.insert(category, outcome);
                    if category_timed_out {
                        timed_out.push(category);
                    }
                }
                Err(e) => {
                    log::error!("scan {}: category task panicked: {e}", job.scan_id);
                }
            }
        }
        for category in &scheduled {
            outcomes
                .entry(*category)
                .or_insert(CategoryOutcome::Failed {
                    reason: "stage did not report".to_string(),
                });
        }

        let cancelled = *cancel.borrow();
        if cancelled {
            warnings.push("cancelled".to_string());
            return StageOutput {
                state: ScanState::Failed,
                status: ScanStatus::Neutral,
                findings_count: FindingsCount::default(),
                outcomes,
                timed_out,
                warnings,
            };
        }

        // PR-diff filtering happens after normalization so tools kept full
        // repository context during the run.
        if job.config.pr_diff_only {
            if let Some(diff) = &job.config.pr_diff {
                let coverage = DiffCoverage::parse(diff);
                for (category, outcome) in outcomes.iter_mut() {
                    if matches!(category, ScanCategory::Dast | ScanCategory::Container) {
                        continue;
                    }
                    if let CategoryOutcome::CompletedWithFindings(findings) = outcome {
                        let kept = normalizer::filter_to_diff(std::mem::take(findings), &coverage);
                        *outcome = if kept.is_empty() {
                            CategoryOutcome::CompletedClean
                        } else {
                            CategoryOutcome::CompletedWithFindings(kept)
                        };
                    }
                }
            } else {
                warnings.push("pr_diff_only set without a diff; filter skipped".to_string());
            }
        }

        let (status, findings_count) =
            collect_results(&outcomes, job.config.severity_floor, &scheduled);

        let all: Vec<NormalizedFinding> = outcomes
            .values()
            .flat_map(|o| o.findings().iter().cloned())
            .collect();
        if let Err(e) = self.finding_sink.store(&job.scan_id, &all).await {
            warnings.push(format!("finding sink failed: {e}"));
        }

        StageOutput {
            state: ScanState::Done,
            status,
            findings_count,
            outcomes,
            timed_out,
            warnings,
        }
    }

    fn category_context(
        &self,
        job: &ScanJobData,
        workspace: &Workspace,
        category: ScanCategory,
    ) -> ScanContext {
        let mut context = ScanContext::new(
            workspace.repo_dir(),
            self.config.orchestrator.stage_timeout_secs,
        );
        context.exclude_paths = job.config.skip_paths.clone();
        match category {
            ScanCategory::Dast => {
                if let Some(url) = job.config.target_urls.first() {
                    context
                        .tool_config
                        .insert("target_url".to_string(), serde_json::json!(url));
                }
            }
            ScanCategory::Container => {
                if let Some(image) = job.config.container_images.first() {
                    context
                        .tool_config
                        .insert("image".to_string(), serde_json::json!(image));
                }
            }
            _ => {}
        }
        context
    }

    /// Run one dynamic (web-target) scan.
    pub async fn run_target_scan(
        &self,
        job: TargetScanJobData,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ScanReport> {
        let start = Instant::now();

        if !self.tenant_gate.is_active(&job.tenant_id).await? {
            return Err(ScanError::TenantInactive {
                tenant_id: job.tenant_id.clone(),
            });
        }
        let _permit = self.budget.try_admit(&job.tenant_id)?;

        // Mode, rate and timeout are fixed here, once, for the scan lifetime.
        let plan = target_scan::resolve(&job.config);
        log::info!(
            "target scan {}: {} in {:?} mode at {} rps",
            job.scan_id,
            job.target_url,
            plan.mode,
            plan.requests_per_second
        );

        let workspace = Workspace::create(&self.config.orchestrator.workspace_root, &job.scan_id)?;

        let adapter = self
            .adapters
            .get(&ScanCategory::Dast)
            .cloned()
            .ok_or_else(|| ScanError::Other("no dast adapter registered".to_string()))?;

        let mut context = ScanContext::new(workspace.path().to_path_buf(), plan.timeout_secs);
        context.exclude_paths = job.config.exclude_paths.clone();
        context
            .tool_config
            .insert("target_url".to_string(), serde_json::json!(job.target_url));
        context.tool_config.insert(
            "rate_limit_rps".to_string(),
            serde_json::json!(plan.requests_per_second),
        );
        context
            .tool_config
            .insert("mode".to_string(), serde_json::json!(plan.mode));
        if !plan.headers.is_empty() {
            context
                .tool_config
                .insert("headers".to_string(), serde_json::json!(plan.headers));
        }
        if !job.config.technologies.is_empty() {
            context.tool_config.insert(
                "technologies".to_string(),
                serde_json::json!(job.config.technologies.join(",")),
            );
        }

        let (outcome, category_timed_out) = tokio::select! {
            result = run_category(adapter, context) => result,
            _ = cancel.wait_for(|c| *c) => {
                (CategoryOutcome::Failed { reason: "cancelled".to_string() }, false)
            }
        };

        let mut warnings = Vec::new();
        if let Err(e) = workspace.release() {
            log::warn!("target scan {}: cleanup failed: {e}", job.scan_id);
            warnings.push(format!("cleanup failed: {e}"));
        }

        let cancelled = *cancel.borrow();
        if cancelled {
            warnings.push("cancelled".to_string());
        }

        let scheduled = vec![ScanCategory::Dast];
        let mut outcomes = HashMap::new();
        outcomes.insert(ScanCategory::Dast, outcome);
        let timed_out = if category_timed_out {
            vec![ScanCategory::Dast]
        } else {
            Vec::new()
        };
        let (status, findings_count) = if cancelled {
            (ScanStatus::Neutral, FindingsCount::default())
        } else {
            collect_results(
                &outcomes,
                self.config.orchestrator.severity_floor,
                &scheduled,
            )
        };

        let all: Vec<NormalizedFinding> = outcomes
            .values()
            .flat_map(|o| o.findings().iter().cloned())
            .collect();
        if !cancelled {
            if let Err(e) = self.finding_sink.store(&job.scan_id, &all).await {
                warnings.push(format!("finding sink failed: {e}"));
            }
        }

        let duration_secs = start.elapsed().as_secs_f64();
        if let Some(sink) = &self.notification_sink {
            if !cancelled {
                let payload = NotifyJobData {
                    scan_id: job.scan_id.clone(),
                    tenant_id: job.tenant_id.clone(),
                    findings_count,
                    status,
                    duration_secs,
                    category_summary: summarize(&outcomes, &timed_out),
                    reason: warnings.first().cloned(),
                };
                let notifier = Notifier::new(sink.as_ref(), &self.config.notify);
                if let Err(e) = notifier.deliver(&payload).await {
                    warnings.push(e.to_string());
                }
            }
        }

        Ok(ScanReport {
            scan_id: job.scan_id,
            state: if cancelled {
                ScanState::Failed
            } else {
                ScanState::Done
            },
            status,
            findings_count,
            outcomes,
            timed_out,
            duration_secs,
            warnings,
        })
    }

    /// Pre-flight availability/version probe across all registered adapters.
    pub async fn doctor(&self) -> Vec<(ScanCategory, &'static str, Option<String>)> {
        let mut report = Vec::new();
        for (category, adapter) in &self.adapters {
            let version = adapter.version().await.ok();
            report.push((*category, adapter.name(), version));
        }
        report.sort_by_key(|(c, _, _)| format!("{c}"));
        report
    }
}

/// Execute one category stage. Every failure mode is folded into the tagged
/// outcome; nothing escapes as an error across the stage boundary. The bool
/// marks a tool that hit its hard timeout, whatever its flushed output
/// yielded.
async fn run_category(
    adapter: Arc<dyn ScannerAdapter>,
    context: ScanContext,
) -> (CategoryOutcome, bool) {
    let name = adapter.name();

    if !adapter.is_available().await {
        log::warn!("{name}: tool unavailable, marking stage failed");
        return (
            CategoryOutcome::Failed {
                reason: format!("{name} unavailable"),
            },
            false,
        );
    }

    let output = match adapter.scan(&context).await {
        Ok(output) => output,
        Err(e) => {
            log::warn!("{name}: scan invocation failed: {e}");
            return (
                CategoryOutcome::Failed {
                    reason: format!("{name} invocation failed"),
                },
                false,
            );
        }
    };

    if output.timed_out {
        log::warn!(
            "{name}: timed out after {}s; parsing flushed output",
            context.timeout_secs
        );
    }

    // Flushed output survives a timeout kill, so parse it either way.
    let outcome = match adapter.parse_output(&output) {
        Ok(raw) => {
            let findings = normalizer::normalize(adapter.as_ref(), raw);
            if findings.is_empty() {
                if output.timed_out {
                    CategoryOutcome::Failed {
                        reason: format!("{name} timed out after {}s", context.timeout_secs),
                    }
                } else {
                    CategoryOutcome::CompletedClean
                }
            } else {
                CategoryOutcome::CompletedWithFindings(findings)
            }
        }
        Err(e) => {
            log::warn!("{name}: output parse failed: {e}");
            CategoryOutcome::Failed {
                reason: if output.timed_out {
                    format!("{name} timed out after {}s", context.timeout_secs)
                } else {
                    format!("{name} output unparseable")
                },
            }
        }
    };
    (outcome, output.timed_out)
}

/// Join the fixed set of stage outcomes into the aggregate count and status.
fn collect_results(
    outcomes: &HashMap<ScanCategory, CategoryOutcome>,
    severity_floor: Severity,
    scheduled: &[ScanCategory],
) -> (ScanStatus, FindingsCount) {
    let mut count = FindingsCount::default();
    for outcome in outcomes.values() {
        for finding in outcome.findings() {
            count.record(finding.severity);
        }
    }

    let all_failed = !scheduled.is_empty()
        && scheduled
            .iter()
            .all(|c| outcomes.get(c).map(|o| o.is_failed()).unwrap_or(true));

    let status = if all_failed {
        ScanStatus::Neutral
    } else if count.at_or_above(severity_floor) > 0 {
        ScanStatus::Failure
    } else {
        ScanStatus::Success
    };

    (status, count)
}

/// Per-category summary tags for the notification payload. Counts and tags
/// only, never tool output; a budget overrun is recorded even when flushed
/// findings were collected.
fn summarize(
    outcomes: &HashMap<ScanCategory, CategoryOutcome>,
    timed_out: &[ScanCategory],
) -> HashMap<ScanCategory, String> {
    outcomes
        .iter()
        .map(|(category, outcome)| {
            let mut tag = match outcome {
                CategoryOutcome::CompletedWithFindings(f) => format!("completed ({})", f.len()),
                CategoryOutcome::CompletedClean => "completed (clean)".to_string(),
                CategoryOutcome::Failed { reason } => format!("failed: {reason}"),
                CategoryOutcome::Skipped => "skipped".to_string(),
            };
            if timed_out.contains(category) && !tag.contains("timed out") {
                tag.push_str(", timed out");
            }
            (*category, tag)
        })
        .collect()
}
