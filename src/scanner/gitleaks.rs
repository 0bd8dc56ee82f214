//! Secret-detection adapter wrapping gitleaks.

use crate::config::ToolsConfig;
use crate::errors::{Result, ScanError};
use crate::scanner::{
    probe_version, run_tool, RawFinding, ScanContext, ScanOutput, ScannerAdapter,
};
use crate::types::finding::{Confidence, ScanCategory, Severity};
use async_trait::async_trait;
use std::path::PathBuf;

/// Report file written inside the workspace; gitleaks does not emit JSON on
/// stdout.
const REPORT_FILE: &str = ".scanforge-gitleaks.json";

pub struct GitleaksAdapter {
    bin: String,
}

impl GitleaksAdapter {
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            bin: tools.gitleaks_bin.clone(),
        }
    }
}

#[async_trait]
impl ScannerAdapter for GitleaksAdapter {
    fn name(&self) -> &'static str {
        "gitleaks"
    }

    fn category(&self) -> ScanCategory {
        ScanCategory::Secrets
    }

    async fn version(&self) -> Result<String> {
        probe_version(&self.bin).await
    }

    async fn scan(&self, context: &ScanContext) -> Result<ScanOutput> {
        let report_path = context.work_dir.join(REPORT_FILE);
        let args = vec![
            "detect".to_string(),
            "--source".to_string(),
            ".".to_string(),
            "--no-banner".to_string(),
            "--report-format".to_string(),
            "json".to_string(),
            "--report-path".to_string(),
            report_path.display().to_string(),
        ];

        let mut output =
            run_tool(&self.bin, &args, &context.work_dir, context.timeout_secs).await?;
        output.output_file = Some(report_path);
        Ok(output)
    }

    fn parse_output(&self, output: &ScanOutput) -> Result<Vec<RawFinding>> {
        let content = match &output.output_file {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| ScanError::Io(format!("reading {}", path.display()), e))?,
            None => output.stdout.clone(),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let leaks: Vec<serde_json::Value> =
            serde_json::from_str(&content).map_err(|e| ScanError::Parse {
                tool: self.name().to_string(),
                source: e,
            })?;

        let findings = leaks
            .iter()
            .map(|leak| {
                let rule_id = leak["RuleID"].as_str().unwrap_or("unknown").to_string();
                let description = leak["Description"]
                    .as_str()
                    .unwrap_or("Secret detected")
                    .to_string();
                let line = leak["StartLine"].as_u64().unwrap_or(0) as usize;

                RawFinding {
                    rule_id,
                    severity: "secret".to_string(),
                    confidence: None,
                    title: description.clone(),
                    description,
                    file_path: PathBuf::from(leak["File"].as_str().unwrap_or("")),
                    line,
                    end_line: leak["EndLine"].as_u64().unwrap_or(line as u64) as usize,
                    column: leak["StartColumn"].as_u64().unwrap_or(0) as usize,
                    // The matched line, never the secret value itself
                    snippet: leak["Match"].as_str().map(|s| s.to_string()),
                    fix: None,
                    cwe_ids: vec!["CWE-798".to_string()],
                    cve_ids: Vec::new(),
                    owasp_ids: Vec::new(),
                    metadata: Default::default(),
                }
            })
            .collect();

        Ok(findings)
    }

    fn map_severity(&self, raw: &str) -> Severity {
        // Any confirmed leak is high; gitleaks carries no severity scale of
        // its own.
        match raw {
            "secret" => Severity::High,
            _ => Severity::Low,
        }
    }

    fn map_confidence(&self, _raw: &str) -> Confidence {
        Confidence::High
    }
}
