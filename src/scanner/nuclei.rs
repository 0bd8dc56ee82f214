//! DAST adapter wrapping nuclei for dynamic web-target scans.
//!
//! Unlike the repository adapters this one runs against a live URL taken from
//! the scan context, with the rate budget resolved by the target-scan state
//! machine.

use crate::config::ToolsConfig;
use crate::errors::{Result, ScanError};
use crate::scanner::{
    probe_version, run_tool, OutputFormat, RawFinding, ScanContext, ScanOutput, ScannerAdapter,
};
use crate::target_scan::ScanMode;
use crate::types::finding::{ScanCategory, Severity};
use async_trait::async_trait;
use std::path::PathBuf;

pub struct NucleiAdapter {
    bin: String,
}

impl NucleiAdapter {
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            bin: tools.nuclei_bin.clone(),
        }
    }
}

#[async_trait]
impl ScannerAdapter for NucleiAdapter {
    fn name(&self) -> &'static str {
        "nuclei"
    }

    fn category(&self) -> ScanCategory {
        ScanCategory::Dast
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::Jsonl
    }

    async fn version(&self) -> Result<String> {
        probe_version(&self.bin).await
    }

    async fn scan(&self, context: &ScanContext) -> Result<ScanOutput> {
        let args = build_args(context)?;
        run_tool(&self.bin, &args, &context.work_dir, context.timeout_secs).await
    }

    fn parse_output(&self, output: &ScanOutput) -> Result<Vec<RawFinding>> {
        let mut findings = Vec::new();
        for line in output.stdout.lines() {
            let line = line.trim();
            if line.is_empty() || !line.starts_with('{') {
                continue;
            }
            let v: serde_json::Value =
                serde_json::from_str(line).map_err(|e| ScanError::Parse {
                    tool: self.name().to_string(),
                    source: e,
                })?;

            let info = &v["info"];
            let name = info["name"].as_str().unwrap_or("Unnamed template");
            let matched = v["matched-at"]
                .as_str()
                .or_else(|| v["host"].as_str())
                .unwrap_or("");

            let classification = &info["classification"];
            let cwe_ids = id_list(&classification["cwe-id"]);
            let cve_ids = id_list(&classification["cve-id"])
                .into_iter()
                .map(|s| s.to_uppercase())
                .collect();

            findings.push(RawFinding {
                rule_id: v["template-id"].as_str().unwrap_or("unknown").to_string(),
                severity: info["severity"].as_str().unwrap_or("").to_string(),
                confidence: None,
                title: name.to_string(),
                description: info["description"].as_str().unwrap_or(name).to_string(),
                // For a web target the matched URL plays the role of the path
                file_path: PathBuf::from(matched),
                line: 0,
                end_line: 0,
                column: 0,
                snippet: v["extracted-results"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .filter(|s| !s.is_empty()),
                fix: info["remediation"].as_str().map(|s| s.to_string()),
                cwe_ids,
                cve_ids,
                owasp_ids: Vec::new(),
                metadata: Default::default(),
            });
        }
        Ok(findings)
    }

    fn map_severity(&self, raw: &str) -> Severity {
        match raw.to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            "low" => Severity::Low,
            "info" | "unknown" => Severity::Info,
            _ => Severity::Low,
        }
    }
}

/// Assemble the nuclei invocation from the scan context.
fn build_args(context: &ScanContext) -> Result<Vec<String>> {
    let target_url = context.config_str("target_url").ok_or_else(|| {
        ScanError::Other("dast scan context is missing 'target_url'".to_string())
    })?;

    let mut args = vec![
        "-u".to_string(),
        target_url.to_string(),
        "-jsonl".to_string(),
        "-silent".to_string(),
        "-no-color".to_string(),
    ];

    if let Some(rps) = context
        .tool_config
        .get("rate_limit_rps")
        .and_then(|v| v.as_u64())
    {
        args.push("-rate-limit".to_string());
        args.push(rps.to_string());
    }

    // Request headers, auth credential included
    if let Some(headers) = context.tool_config.get("headers").and_then(|v| v.as_array()) {
        for pair in headers {
            let (Some(name), Some(value)) = (pair[0].as_str(), pair[1].as_str()) else {
                continue;
            };
            args.push("-H".to_string());
            args.push(format!("{name}: {value}"));
        }
    }

    // Depth per mode: quick fingerprints, standard scopes to detected
    // technologies, comprehensive runs the full template set.
    match context.config_str("mode").and_then(|m| m.parse().ok()) {
        Some(ScanMode::Quick) => {
            args.push("-tags".to_string());
            args.push("tech".to_string());
        }
        Some(ScanMode::Standard) => {
            let techs = context
                .config_str("technologies")
                .unwrap_or("")
                .trim()
                .to_string();
            if !techs.is_empty() {
                args.push("-tags".to_string());
                args.push(techs);
            }
        }
        Some(ScanMode::Comprehensive) | None => {}
    }

    for path in &context.exclude_paths {
        args.push("-exclude-matchers".to_string());
        args.push(path.clone());
    }

    Ok(args)
}

fn id_list(v: &serde_json::Value) -> Vec<String> {
    match v {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|s| s.as_str().map(|x| x.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}
