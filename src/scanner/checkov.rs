//! Infrastructure-as-code adapter wrapping checkov.

use crate::config::ToolsConfig;
use crate::errors::{Result, ScanError};
use crate::scanner::{
    probe_version, run_tool, RawFinding, ScanContext, ScanOutput, ScannerAdapter,
};
use crate::types::finding::{ScanCategory, Severity};
use async_trait::async_trait;
use std::path::PathBuf;

pub struct CheckovAdapter {
    bin: String,
}

impl CheckovAdapter {
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            bin: tools.checkov_bin.clone(),
        }
    }

    fn collect_failed_checks(doc: &serde_json::Value, findings: &mut Vec<RawFinding>) {
        let failed = doc["results"]["failed_checks"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for check in &failed {
            let range = check["file_line_range"].as_array();
            let line = range
                .and_then(|r| r.first())
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            let end_line = range
                .and_then(|r| r.get(1))
                .and_then(|v| v.as_u64())
                .unwrap_or(line as u64) as usize;

            let check_name = check["check_name"]
                .as_str()
                .unwrap_or("Misconfigured resource");

            findings.push(RawFinding {
                rule_id: check["check_id"].as_str().unwrap_or("unknown").to_string(),
                severity: check["severity"].as_str().unwrap_or("").to_string(),
                confidence: None,
                title: check_name.to_string(),
                description: check["guideline"]
                    .as_str()
                    .map(|g| format!("{check_name} ({g})"))
                    .unwrap_or_else(|| check_name.to_string()),
                file_path: PathBuf::from(
                    check["file_path"]
                        .as_str()
                        .unwrap_or("")
                        .trim_start_matches('/'),
                ),
                line,
                end_line,
                column: 0,
                snippet: None,
                fix: None,
                cwe_ids: Vec::new(),
                cve_ids: Vec::new(),
                owasp_ids: Vec::new(),
                metadata: check["resource"]
                    .as_str()
                    .map(|r| {
                        [("resource".to_string(), serde_json::json!(r))]
                            .into_iter()
                            .collect()
                    })
                    .unwrap_or_default(),
            });
        }
    }
}

#[async_trait]
impl ScannerAdapter for CheckovAdapter {
    fn name(&self) -> &'static str {
        "checkov"
    }

    fn category(&self) -> ScanCategory {
        ScanCategory::Iac
    }

    async fn version(&self) -> Result<String> {
        probe_version(&self.bin).await
    }

    async fn scan(&self, context: &ScanContext) -> Result<ScanOutput> {
        let mut args = vec![
            "--directory".to_string(),
            ".".to_string(),
            "--output".to_string(),
            "json".to_string(),
            "--quiet".to_string(),
        ];
        for p in &context.exclude_paths {
            args.push("--skip-path".to_string());
            args.push(p.clone());
        }

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

        // One document per framework when several apply, else a single object.
        let mut findings = Vec::new();
        match &v {
            serde_json::Value::Array(docs) => {
                for doc in docs {
                    Self::collect_failed_checks(doc, &mut findings);
                }
            }
            serde_json::Value::Object(_) => Self::collect_failed_checks(&v, &mut findings),
            _ => {
                return Err(ScanError::MalformedOutput {
                    tool: self.name().to_string(),
                    reason: "expected object or array at top level".to_string(),
                })
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
            "INFO" => Severity::Info,
            // severity is null without a platform key
            _ => Severity::Low,
        }
    }
}
