use crate::errors::ConfigError;
use crate::types::finding::Severity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "scanforge.toml";

/// Top-level application configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

/// Pipeline-level limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root under which per-scan workspaces are created
    pub workspace_root: PathBuf,
    /// Wall-clock budget per adapter invocation
    pub stage_timeout_secs: u64,
    /// Budget for the clone stage
    pub clone_timeout_secs: u64,
    /// Findings at or above this severity fail a scan when the job envelope
    /// carries no floor of its own (target scans)
    pub severity_floor: Severity,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("scanforge"),
            stage_timeout_secs: 900,
            clone_timeout_secs: 300,
            severity_floor: Severity::Low,
        }
    }
}

/// Binary names/paths for the wrapped tools. Overridable so deployments can
/// pin absolute paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub opengrep_bin: String,
    pub osv_scanner_bin: String,
    pub gitleaks_bin: String,
    pub checkov_bin: String,
    pub nuclei_bin: String,
    pub trivy_bin: String,
    pub git_bin: String,
    /// Rules directory passed to the SAST tool, when present
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sast_rules_dir: Option<PathBuf>,
    /// Parallel jobs hint for tools that take one; 0 means tool default
    pub jobs: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            opengrep_bin: "opengrep".to_string(),
            osv_scanner_bin: "osv-scanner".to_string(),
            gitleaks_bin: "gitleaks".to_string(),
            checkov_bin: "checkov".to_string(),
            nuclei_bin: "nuclei".to_string(),
            trivy_bin: "trivy".to_string(),
            git_bin: "git".to_string(),
            sast_rules_dir: None,
            jobs: 0,
        }
    }
}

/// Notification sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub webhook_url: Option<String>,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_attempts: 3,
            backoff_base_ms: 250,
            request_timeout_secs: 10,
        }
    }
}

/// Admission gating: concurrency budget and submission throttle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Concurrent scans allowed per tenant
    pub max_concurrent_scans_per_tenant: usize,
    /// Submissions allowed per window per key
    pub submissions_per_window: u32,
    pub window_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans_per_tenant: 2,
            submissions_per_window: 10,
            window_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.display().to_string(), e))?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::TomlParse(path.display().to_string(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.stage_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "orchestrator.stage_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.notify.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "notify.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.admission.max_concurrent_scans_per_tenant == 0 {
            return Err(ConfigError::InvalidValue {
                field: "admission.max_concurrent_scans_per_tenant".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.notify.max_attempts, 3);
        assert_eq!(config.admission.max_concurrent_scans_per_tenant, 2);
    }

    #[test]
    fn test_load_partial_toml_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"
[orchestrator]
workspace_root = "/var/lib/scanforge"
stage_timeout_secs = 120
clone_timeout_secs = 60
severity_floor = "medium"

[tools]
opengrep_bin = "/usr/local/bin/opengrep"
osv_scanner_bin = "osv-scanner"
gitleaks_bin = "gitleaks"
checkov_bin = "checkov"
nuclei_bin = "nuclei"
trivy_bin = "trivy"
git_bin = "git"
jobs = 4
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.orchestrator.stage_timeout_secs, 120);
        assert_eq!(config.orchestrator.severity_floor, Severity::Medium);
        assert_eq!(config.tools.opengrep_bin, "/usr/local/bin/opengrep");
        // Missing sections fall back to defaults
        assert_eq!(config.notify.max_attempts, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.notify.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
