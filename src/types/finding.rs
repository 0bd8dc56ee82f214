use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Canonical severity scale every tool-specific scale maps into.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" => Ok(Severity::Info),
            _ => Err(format!("Invalid severity: {s}")),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        };
        write!(f, "{s}")
    }
}

/// Confidence the originating tool has in a finding.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Finding class a category stage is responsible for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScanCategory {
    Sast,
    Sca,
    Secrets,
    Iac,
    Dast,
    Container,
}

impl std::fmt::Display for ScanCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanCategory::Sast => "sast",
            ScanCategory::Sca => "sca",
            ScanCategory::Secrets => "secrets",
            ScanCategory::Iac => "iac",
            ScanCategory::Dast => "dast",
            ScanCategory::Container => "container",
        };
        write!(f, "{s}")
    }
}

/// One normalized report of a potential security issue.
///
/// Immutable once produced by the normalizer. Lifecycle state
/// (open/resolved/dismissed) lives in the persistence collaborator, keyed by
/// `fingerprint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedFinding {
    /// Name of the originating scanner
    pub scanner: String,
    /// Tool rule identifier
    pub rule_id: String,
    pub severity: Severity,
    pub confidence: Confidence,
    pub title: String,
    pub description: String,
    /// Path relative to the scan workspace
    pub file_path: PathBuf,
    pub line: usize,
    pub end_line: usize,
    pub column: usize,
    /// Flagged code region, if the tool reported one
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub snippet: Option<String>,
    /// Suggested fix or replacement diff
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fix: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cwe_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cve_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub owasp_ids: Vec<String>,
    /// Stable identity hash, deterministic across re-scans
    pub fingerprint: String,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NormalizedFinding {
    /// Primary classification id used as a fingerprint component:
    /// first CWE, else first CVE, else first OWASP id.
    pub fn primary_classification(&self) -> Option<&str> {
        self.cwe_ids
            .first()
            .or_else(|| self.cve_ids.first())
            .or_else(|| self.owasp_ids.first())
            .map(|s| s.as_str())
    }
}

/// Per-severity tally aggregated over one scan.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FindingsCount {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl FindingsCount {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.info
    }

    /// Count of findings at or above the given severity.
    pub fn at_or_above(&self, floor: Severity) -> usize {
        let mut n = 0;
        if Severity::Critical >= floor {
            n += self.critical;
        }
        if Severity::High >= floor {
            n += self.high;
        }
        if Severity::Medium >= floor {
            n += self.medium;
        }
        if Severity::Low >= floor {
            n += self.low;
        }
        if Severity::Info >= floor {
            n += self.info;
        }
        n
    }
}

/// Final status reported for one scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// No enabled category produced findings at or above the severity floor
    Success,
    /// At least one category produced findings at or above the floor
    Failure,
    /// Every enabled category failed to run; "couldn't tell", not "clean"
    Neutral,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanStatus::Success => "success",
            ScanStatus::Failure => "failure",
            ScanStatus::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

/// Terminal outcome of one category stage, joined by results collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CategoryOutcome {
    /// Stage ran and produced at least one finding
    CompletedWithFindings(Vec<NormalizedFinding>),
    /// Stage ran and produced nothing
    CompletedClean,
    /// Stage could not run or could not be parsed; reason is a summary,
    /// never raw tool output
    Failed { reason: String },
    /// Stage was not enabled in the scan config
    Skipped,
}

impl CategoryOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, CategoryOutcome::Failed { .. })
    }

    pub fn findings(&self) -> &[NormalizedFinding] {
        match self {
            CategoryOutcome::CompletedWithFindings(f) => f,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn test_severity_round_trip() {
        for s in ["critical", "high", "medium", "low", "info"] {
            let sev: Severity = s.parse().unwrap();
            assert_eq!(sev.to_string(), s);
        }
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn test_findings_count_floor() {
        let mut count = FindingsCount::default();
        count.record(Severity::Critical);
        count.record(Severity::Medium);
        count.record(Severity::Info);
        assert_eq!(count.total(), 3);
        assert_eq!(count.at_or_above(Severity::Medium), 2);
        assert_eq!(count.at_or_above(Severity::Info), 3);
        assert_eq!(count.at_or_above(Severity::Critical), 1);
    }
}
