//! Container image adapter wrapping trivy.

use crate::config::ToolsConfig;
use crate::errors::{Result, ScanError};
use crate::scanner::{
    probe_version, run_tool, RawFinding, ScanContext, ScanOutput, ScannerAdapter,
};
use crate::types::finding::{ScanCategory, Severity};
use async_trait::async_trait;
use std::path::PathBuf;

pub struct TrivyAdapter {
    bin: String,
}

impl TrivyAdapter {
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            bin: tools.trivy_bin.clone(),
        }
    }
}

#[async_trait]
impl ScannerAdapter for TrivyAdapter {
    fn name(&self) -> &'static str {
        "trivy"
    }

    fn category(&self) -> ScanCategory {
        ScanCategory::Container
    }

    async fn version(&self) -> Result<String> {
        probe_version(&self.bin).await
    }

    async fn scan(&self, context: &ScanContext) -> Result<ScanOutput> {
        let image = context.config_str("image").ok_or_else(|| {
            ScanError::Other("container scan context is missing 'image'".to_string())
        })?;

        let args = vec![
            "image".to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--quiet".to_string(),
            image.to_string(),
        ];

        run_tool(&self.bin, &args, &context.work_dir, context.timeout_secs).await
    }

    fn parse_output(&self, output: &ScanOutput) -> Result<Vec<RawFinding>> {
        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let v: serde_json::Value =
            serde_json::from_str(&output.stdout).map_err(|e| ScanError::Parse {
                tool: self.name().to_string(),
                source: e,
            })?;

        let results = v.get("Results").and_then(|r| r.as_array());
        let results = match results {
            Some(r) => r,
            // No matched targets in the image is a clean run
            None => return Ok(Vec::new()),
        };

        let mut findings = Vec::new();
        for result in results {
            let target = result["Target"].as_str().unwrap_or("");
            let vulns = result["Vulnerabilities"].as_array().cloned().unwrap_or_default();
            for vuln in &vulns {
                let id = vuln["VulnerabilityID"].as_str().unwrap_or("unknown");
                let pkg = vuln["PkgName"].as_str().unwrap_or("unknown");
                let installed = vuln["InstalledVersion"].as_str().unwrap_or("?");
                let title = vuln["Title"]
                    .as_str()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| format!("{id} in {pkg}"));

                let mut cve_ids = Vec::new();
                if id.starts_with("CVE-") {
                    cve_ids.push(id.to_string());
                }

                findings.push(RawFinding {
                    rule_id: id.to_string(),
                    severity: vuln["Severity"].as_str().unwrap_or("").to_string(),
                    confidence: None,
                    title: format!("{pkg} {installed}: {title}"),
                    description: vuln["Description"].as_str().unwrap_or(&title).to_string(),
                    file_path: PathBuf::from(target),
                    line: 0,
                    end_line: 0,
                    column: 0,
                    snippet: None,
                    fix: vuln["FixedVersion"]
                        .as_str()
                        .map(|fx| format!("upgrade {pkg} to {fx}")),
                    cwe_ids: vuln["CweIDs"]
                        .as_array()
                        .map(|a| {
                            a.iter()
                                .filter_map(|s| s.as_str().map(|x| x.to_string()))
                                .collect()
                        })
                        .unwrap_or_default(),
                    cve_ids,
                    owasp_ids: Vec::new(),
                    metadata: [(
                        "package".to_string(),
                        serde_json::json!({ "name": pkg, "installed": installed }),
                    )]
                    .into_iter()
                    .collect(),
                });
            }
        }

        Ok(findings)
    }

    fn map_severity(&self, raw: &str) -> Severity {
        match raw.to_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            "LOW" => Severity::Low,
            "UNKNOWN" => Severity::Info,
            _ => Severity::Low,
        }
    }
}
