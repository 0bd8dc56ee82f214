//! Job envelopes exchanged between the API-facing collaborator and the
//! orchestrator. These are the wire contract; field names and deprecated
//! fields must stay backward-compatible.

use crate::types::finding::{CategoryOutcome, FindingsCount, ScanCategory, ScanStatus, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Request envelope for one repository scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJobData {
    pub scan_id: String,
    pub tenant_id: String,
    pub repository_id: String,
    pub repo_url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub commit_sha: Option<String>,
    pub config: ScanConfig,
    pub created_at: DateTime<Utc>,
}

/// Immutable per-scan toggle set. Read-only once the scan starts; determines
/// which category stages are scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_true")]
    pub enable_sast: bool,
    #[serde(default = "default_true")]
    pub enable_sca: bool,
    #[serde(default = "default_true")]
    pub enable_secrets: bool,
    #[serde(default)]
    pub enable_iac: bool,
    #[serde(default)]
    pub enable_dast: bool,
    #[serde(default)]
    pub enable_container_scan: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub target_urls: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub container_images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skip_paths: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub branch_filters: Vec<String>,
    /// When set, findings outside the diff's changed lines are dropped after
    /// normalization. Tools still see the full repository.
    #[serde(default)]
    pub pr_diff_only: bool,
    /// Unified diff text for `pr_diff_only` filtering
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pr_diff: Option<String>,
    /// Findings at or above this severity flip the scan status to failure
    #[serde(default = "default_severity_floor")]
    pub severity_floor: Severity,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub clone_depth: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_severity_floor() -> Severity {
    Severity::Low
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enable_sast: true,
            enable_sca: true,
            enable_secrets: true,
            enable_iac: false,
            enable_dast: false,
            enable_container_scan: false,
            target_urls: Vec::new(),
            container_images: Vec::new(),
            skip_paths: Vec::new(),
            branch_filters: Vec::new(),
            pr_diff_only: false,
            pr_diff: None,
            severity_floor: Severity::Low,
            clone_depth: None,
        }
    }
}

impl ScanConfig {
    /// Category stages this config schedules, in declaration order.
    pub fn enabled_categories(&self) -> Vec<ScanCategory> {
        let mut out = Vec::new();
        if self.enable_sast {
            out.push(ScanCategory::Sast);
        }
        if self.enable_sca {
            out.push(ScanCategory::Sca);
        }
        if self.enable_secrets {
            out.push(ScanCategory::Secrets);
        }
        if self.enable_iac {
            out.push(ScanCategory::Iac);
        }
        if self.enable_dast {
            out.push(ScanCategory::Dast);
        }
        if self.enable_container_scan {
            out.push(ScanCategory::Container);
        }
        out
    }
}

/// Clone stage envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneJobData {
    pub scan_id: String,
    pub tenant_id: String,
    pub repo_url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub commit_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub depth: Option<u32>,
}

/// Category stage envelope (one per enabled category).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryJobData {
    pub scan_id: String,
    pub tenant_id: String,
    pub category: ScanCategory,
    pub work_dir: PathBuf,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub exclude_paths: Vec<String>,
    pub timeout_secs: u64,
}

/// Results collection envelope: the joined outcomes of all scheduled stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsJobData {
    pub scan_id: String,
    pub tenant_id: String,
    pub outcomes: HashMap<ScanCategory, CategoryOutcome>,
}

/// Notify stage envelope delivered to the external sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyJobData {
    pub scan_id: String,
    pub tenant_id: String,
    pub findings_count: FindingsCount,
    pub status: ScanStatus,
    pub duration_secs: f64,
    /// Per-category outcome summary: completed / failed / skipped. Counts and
    /// tags only, never tool output.
    pub category_summary: HashMap<ScanCategory, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

/// Cleanup stage envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupJobData {
    pub scan_id: String,
    pub work_dir: PathBuf,
}

// Re-exported here so all job envelopes are reachable from one module.
pub use crate::target_scan::TargetScanJobData;
