//! SAST adapter wrapping OpenGrep (Semgrep-compatible CLI and JSON output).

use crate::config::ToolsConfig;
use crate::errors::{Result, ScanError};
use crate::scanner::{
    probe_version, run_tool, OutputFormat, RawFinding, ScanContext, ScanOutput, ScannerAdapter,
};
use crate::types::finding::{ScanCategory, Severity};
use async_trait::async_trait;
use std::path::PathBuf;

pub struct OpenGrepAdapter {
    bin: String,
    rules_dir: Option<PathBuf>,
    jobs: usize,
}

impl OpenGrepAdapter {
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            bin: tools.opengrep_bin.clone(),
            rules_dir: tools.sast_rules_dir.clone(),
            jobs: tools.jobs,
        }
    }
}

#[async_trait]
impl ScannerAdapter for OpenGrepAdapter {
    fn name(&self) -> &'static str {
        "opengrep"
    }

    fn category(&self) -> ScanCategory {
        ScanCategory::Sast
    }

    fn supported_languages(&self) -> &[&'static str] {
        &[
            "rust", "python", "javascript", "typescript", "java", "go", "c", "cpp", "ruby", "php",
        ]
    }

    async fn version(&self) -> Result<String> {
        probe_version(&self.bin).await
    }

    async fn scan(&self, context: &ScanContext) -> Result<ScanOutput> {
        let mut args = vec![
            "--json".to_string(),
            "--quiet".to_string(),
            format!("--timeout={}", context.timeout_secs),
        ];
        if self.jobs > 0 {
            args.push(format!("--jobs={}", self.jobs));
        }
        if !context.exclude_paths.is_empty() {
            args.push(format!("--exclude={}", context.exclude_paths.join(",")));
        }
        match &self.rules_dir {
            Some(dir) => args.push(format!("--config={}", dir.display())),
            None => {
                args.push("--config".to_string());
                args.push("auto".to_string());
            }
        }
        if context.target_paths.is_empty() {
            args.push(".".to_string());
        } else {
            args.extend(context.target_paths.iter().cloned());
        }

        run_tool(&self.bin, &args, &context.work_dir, context.timeout_secs).await
    }

    fn parse_output(&self, output: &ScanOutput) -> Result<Vec<RawFinding>> {
        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        // Tools sometimes prefix the JSON document with progress noise.
        let json_part = match output.stdout.find('{') {
            Some(pos) => &output.stdout[pos..],
            None => return Ok(Vec::new()),
        };

        let v: serde_json::Value =
            serde_json::from_str(json_part).map_err(|e| ScanError::Parse {
                tool: self.name().to_string(),
                source: e,
            })?;

        let results = v
            .get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| ScanError::MalformedOutput {
                tool: self.name().to_string(),
                reason: "missing 'results' array".to_string(),
            })?;

        let mut findings = Vec::with_capacity(results.len());
        for item in results {
            let extra = &item["extra"];
            let metadata = &extra["metadata"];

            let message = extra["message"].as_str().unwrap_or("Unknown issue");
            let start_line = item["start"]["line"].as_u64().unwrap_or(0) as usize;
            let end_line = item["end"]["line"].as_u64().unwrap_or(start_line as u64) as usize;

            let cwe_ids = string_list(&metadata["cwe"]);
            let owasp_ids = string_list(&metadata["owasp"]);

            findings.push(RawFinding {
                rule_id: item["check_id"].as_str().unwrap_or("unknown").to_string(),
                severity: extra["severity"].as_str().unwrap_or("").to_string(),
                confidence: metadata["confidence"].as_str().map(|s| s.to_string()),
                title: message.to_string(),
                description: message.to_string(),
                file_path: PathBuf::from(item["path"].as_str().unwrap_or("")),
                line: start_line,
                end_line,
                column: item["start"]["col"].as_u64().unwrap_or(0) as usize,
                snippet: extra["lines"].as_str().map(|s| s.to_string()),
                fix: extra["fix"].as_str().map(|s| s.to_string()),
                cwe_ids,
                cve_ids: Vec::new(),
                owasp_ids,
                metadata: Default::default(),
            });
        }

        Ok(findings)
    }

    fn map_severity(&self, raw: &str) -> Severity {
        match raw.to_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "ERROR" | "HIGH" => Severity::High,
            "WARNING" | "MEDIUM" => Severity::Medium,
            "INFO" => Severity::Info,
            "LOW" => Severity::Low,
            _ => Severity::Low,
        }
    }
}

/// Metadata fields arrive as either a string or an array of strings.
fn string_list(v: &serde_json::Value) -> Vec<String> {
    match v {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|s| s.as_str().map(|x| x.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> OpenGrepAdapter {
        OpenGrepAdapter::from_config(&ToolsConfig::default())
    }

    fn output_with(stdout: &str, exit_code: i32) -> ScanOutput {
        ScanOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            output_file: None,
            duration_secs: 0.1,
            timed_out: false,
        }
    }

    fn sample_json() -> String {
        serde_json::json!({
            "results": [
                {
                    "check_id": "rust.lang.security.hardcoded-secret",
                    "path": "src/auth.rs",
                    "start": { "line": 12, "col": 5 },
                    "end": { "line": 12, "col": 40 },
                    "extra": {
                        "message": "Hardcoded credential",
                        "severity": "ERROR",
                        "lines": "let token = \"abc\";",
                        "fix": "read from env",
                        "metadata": { "cwe": ["CWE-798"], "owasp": "A07:2021", "confidence": "HIGH" }
                    }
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn test_parse_valid_results() {
        let findings = adapter().parse_output(&output_with(&sample_json(), 0)).unwrap();
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.rule_id, "rust.lang.security.hardcoded-secret");
        assert_eq!(f.line, 12);
        assert_eq!(f.cwe_ids, vec!["CWE-798"]);
        assert_eq!(f.owasp_ids, vec!["A07:2021"]);
        assert_eq!(f.fix.as_deref(), Some("read from env"));
    }

    #[test]
    fn test_nonzero_exit_with_valid_output_parses() {
        // Findings-present exit codes are data, not failures
        let findings = adapter().parse_output(&output_with(&sample_json(), 1)).unwrap();
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_noise_before_json_tolerated() {
        let noisy = format!("scanning...\n{}", sample_json());
        let findings = adapter().parse_output(&output_with(&noisy, 0)).unwrap();
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_missing_results_is_malformed() {
        let err = adapter()
            .parse_output(&output_with(r#"{"errors": []}"#, 0))
            .unwrap_err();
        assert!(matches!(err, ScanError::MalformedOutput { .. }));
    }

    #[test]
    fn test_empty_output_is_empty_findings() {
        assert!(adapter().parse_output(&output_with("", 0)).unwrap().is_empty());
    }

    #[test]
    fn test_severity_map_is_total() {
        let a = adapter();
        assert_eq!(a.map_severity("ERROR"), Severity::High);
        assert_eq!(a.map_severity("warning"), Severity::Medium);
        assert_eq!(a.map_severity("INFO"), Severity::Info);
        assert_eq!(a.map_severity("made-up-value"), Severity::Low);
    }
}
