//! SCA adapter wrapping osv-scanner (dependency vulnerability audit).

use crate::config::ToolsConfig;
use crate::errors::{Result, ScanError};
use crate::scanner::{
    probe_version, run_tool, RawFinding, ScanContext, ScanOutput, ScannerAdapter,
};
use crate::types::finding::{ScanCategory, Severity};
use async_trait::async_trait;
use std::path::PathBuf;

pub struct OsvScannerAdapter {
    bin: String,
}

impl OsvScannerAdapter {
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            bin: tools.osv_scanner_bin.clone(),
        }
    }
}

#[async_trait]
impl ScannerAdapter for OsvScannerAdapter {
    fn name(&self) -> &'static str {
        "osv-scanner"
    }

    fn category(&self) -> ScanCategory {
        ScanCategory::Sca
    }

    async fn version(&self) -> Result<String> {
        probe_version(&self.bin).await
    }

    async fn scan(&self, context: &ScanContext) -> Result<ScanOutput> {
        let mut args = vec![
            "--format".to_string(),
            "json".to_string(),
            "--recursive".to_string(),
        ];
        for p in &context.exclude_paths {
            args.push(format!("--exclude={p}"));
        }
        args.push(".".to_string());

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

        // "results" is absent when no lockfiles matched; that is a clean run.
        let results = match v.get("results").and_then(|r| r.as_array()) {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };

        let mut findings = Vec::new();
        for result in results {
            let source_path = result["source"]["path"].as_str().unwrap_or("");
            let packages = result["packages"].as_array().cloned().unwrap_or_default();
            for pkg in &packages {
                let pkg_name = pkg["package"]["name"].as_str().unwrap_or("unknown");
                let pkg_version = pkg["package"]["version"].as_str().unwrap_or("?");
                let vulns = pkg["vulnerabilities"].as_array().cloned().unwrap_or_default();
                for vuln in &vulns {
                    let id = vuln["id"].as_str().unwrap_or("unknown");
                    let summary = vuln["summary"]
                        .as_str()
                        .unwrap_or("Vulnerable dependency")
                        .to_string();

                    let mut cve_ids: Vec<String> = vuln["aliases"]
                        .as_array()
                        .map(|a| {
                            a.iter()
                                .filter_map(|s| s.as_str())
                                .filter(|s| s.starts_with("CVE-"))
                                .map(|s| s.to_string())
                                .collect()
                        })
                        .unwrap_or_default();
                    if id.starts_with("CVE-") && !cve_ids.iter().any(|c| c == id) {
                        cve_ids.insert(0, id.to_string());
                    }

                    let severity = vuln["database_specific"]["severity"]
                        .as_str()
                        .unwrap_or("")
                        .to_string();

                    findings.push(RawFinding {
                        rule_id: id.to_string(),
                        severity,
                        confidence: None,
                        title: format!("{pkg_name} {pkg_version}: {summary}"),
                        description: vuln["details"].as_str().unwrap_or(&summary).to_string(),
                        file_path: PathBuf::from(source_path),
                        line: 0,
                        end_line: 0,
                        column: 0,
                        snippet: None,
                        fix: None,
                        cwe_ids: Vec::new(),
                        cve_ids,
                        owasp_ids: Vec::new(),
                        metadata: [(
                            "package".to_string(),
                            serde_json::json!({ "name": pkg_name, "version": pkg_version }),
                        )]
                        .into_iter()
                        .collect(),
                    });
                }
            }
        }

        Ok(findings)
    }

    fn map_severity(&self, raw: &str) -> Severity {
        match raw.to_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MODERATE" | "MEDIUM" => Severity::Medium,
            "LOW" => Severity::Low,
            _ => Severity::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> OsvScannerAdapter {
        OsvScannerAdapter::from_config(&ToolsConfig::default())
    }

    fn output_with(stdout: &str) -> ScanOutput {
        ScanOutput {
            exit_code: 1, // osv-scanner exits 1 when vulnerabilities are found
            stdout: stdout.to_string(),
            stderr: String::new(),
            output_file: None,
            duration_secs: 0.2,
            timed_out: false,
        }
    }

    #[test]
    fn test_parse_vulnerabilities() {
        let json = serde_json::json!({
            "results": [{
                "source": { "path": "Cargo.lock", "type": "lockfile" },
                "packages": [{
                    "package": { "name": "openssl", "version": "0.10.1", "ecosystem": "crates.io" },
                    "vulnerabilities": [{
                        "id": "GHSA-xxxx-yyyy",
                        "aliases": ["CVE-2023-1234"],
                        "summary": "Use after free",
                        "details": "A use-after-free in ...",
                        "database_specific": { "severity": "HIGH" }
                    }]
                }]
            }]
        })
        .to_string();

        let findings = adapter().parse_output(&output_with(&json)).unwrap();
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.rule_id, "GHSA-xxxx-yyyy");
        assert_eq!(f.cve_ids, vec!["CVE-2023-1234"]);
        assert_eq!(f.file_path, PathBuf::from("Cargo.lock"));
        assert_eq!(adapter().map_severity(&f.severity), Severity::High);
    }

    #[test]
    fn test_no_results_means_clean() {
        let findings = adapter().parse_output(&output_with("{}")).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = adapter().parse_output(&output_with("not json")).unwrap_err();
        assert!(matches!(err, ScanError::Parse { .. }));
    }

    #[test]
    fn test_severity_map_default_is_low() {
        assert_eq!(adapter().map_severity(""), Severity::Low);
        assert_eq!(adapter().map_severity("MODERATE"), Severity::Medium);
    }
}
