//! Finding normalization: canonical severity/confidence mapping, stable
//! fingerprints, within-run deduplication, and PR-diff filtering.
//!
//! Deduplication is scoped to one scanner's output within one run. Cross-tool
//! correlation is deliberately not done here; fingerprints are namespaced by
//! scanner name so the downstream persistence layer cannot collide them by
//! accident.

use crate::scanner::{RawFinding, ScannerAdapter};
use crate::types::finding::NormalizedFinding;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Line bucket used in the fingerprint so a finding keeps its identity when
/// surrounding code shifts a few lines between scans.
const LINE_WINDOW: usize = 20;

/// Convert one adapter's raw output into canonical findings and deduplicate
/// within the run.
pub fn normalize(adapter: &dyn ScannerAdapter, raw: Vec<RawFinding>) -> Vec<NormalizedFinding> {
    let findings = raw
        .into_iter()
        .map(|r| {
            let severity = adapter.map_severity(&r.severity);
            let confidence = adapter.map_confidence(r.confidence.as_deref().unwrap_or(""));
            let file_path = normalize_path(&r.file_path);
            let fingerprint = fingerprint(
                adapter.name(),
                &r.rule_id,
                &file_path,
                r.line,
                r.snippet.as_deref(),
                r.cwe_ids
                    .first()
                    .or_else(|| r.cve_ids.first())
                    .or_else(|| r.owasp_ids.first())
                    .map(|s| s.as_str()),
            );
            NormalizedFinding {
                scanner: adapter.name().to_string(),
                rule_id: r.rule_id,
                severity,
                confidence,
                title: r.title,
                description: r.description,
                file_path,
                line: r.line,
                end_line: r.end_line.max(r.line),
                column: r.column,
                snippet: r.snippet,
                fix: r.fix,
                cwe_ids: r.cwe_ids,
                cve_ids: r.cve_ids,
                owasp_ids: r.owasp_ids,
                fingerprint,
                metadata: r.metadata,
            }
        })
        .collect();

    dedup(findings)
}

/// Stable identity hash for a finding.
///
/// Components: scanner name, rule id, normalized path, line bucket, content
/// hash of the flagged region, and the primary classification id when present.
pub fn fingerprint(
    scanner: &str,
    rule_id: &str,
    file_path: &Path,
    line: usize,
    snippet: Option<&str>,
    classification: Option<&str>,
) -> String {
    let content_hash = match snippet {
        Some(s) => {
            // Whitespace-insensitive so reformatting does not change identity
            let squashed: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
            format!("{:x}", md5::compute(squashed.as_bytes()))
        }
        None => String::new(),
    };

    let material = format!(
        "{scanner}\x1f{rule_id}\x1f{}\x1f{}\x1f{content_hash}\x1f{}",
        file_path.display(),
        line / LINE_WINDOW,
        classification.unwrap_or(""),
    );
    format!("{:x}", md5::compute(material.as_bytes()))
}

/// Keep exactly one finding per fingerprint: highest severity wins, a present
/// fix breaks ties, then richer metadata.
fn dedup(findings: Vec<NormalizedFinding>) -> Vec<NormalizedFinding> {
    let mut by_fingerprint: HashMap<String, NormalizedFinding> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for finding in findings {
        match by_fingerprint.get_mut(&finding.fingerprint) {
            None => {
                order.push(finding.fingerprint.clone());
                by_fingerprint.insert(finding.fingerprint.clone(), finding);
            }
            Some(existing) => {
                if richer(&finding, existing) {
                    *existing = finding;
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|fp| by_fingerprint.remove(&fp))
        .collect()
}

fn richer(candidate: &NormalizedFinding, incumbent: &NormalizedFinding) -> bool {
    if candidate.severity != incumbent.severity {
        return candidate.severity > incumbent.severity;
    }
    if candidate.fix.is_some() != incumbent.fix.is_some() {
        return candidate.fix.is_some();
    }
    metadata_weight(candidate) > metadata_weight(incumbent)
}

fn metadata_weight(f: &NormalizedFinding) -> usize {
    f.cwe_ids.len()
        + f.cve_ids.len()
        + f.owasp_ids.len()
        + f.metadata.len()
        + usize::from(f.snippet.is_some())
}

fn normalize_path(path: &Path) -> PathBuf {
    let s = path.to_string_lossy().replace('\\', "/");
    PathBuf::from(s.trim_start_matches("./"))
}

/// Changed-line ranges of a pull-request diff, per new-file path.
#[derive(Debug, Clone, Default)]
pub struct DiffCoverage {
    ranges: HashMap<PathBuf, Vec<(usize, usize)>>,
}

impl DiffCoverage {
    /// Parse a unified diff, collecting the post-image line ranges of every
    /// hunk.
    pub fn parse(diff: &str) -> Self {
        let mut ranges: HashMap<PathBuf, Vec<(usize, usize)>> = HashMap::new();
        let mut current: Option<PathBuf> = None;

        for line in diff.lines() {
            if let Some(rest) = line.strip_prefix("+++ ") {
                let path = rest.trim();
                current = if path == "/dev/null" {
                    None
                } else {
                    Some(normalize_path(Path::new(
                        path.strip_prefix("b/").unwrap_or(path),
                    )))
                };
            } else if let Some(hunk) = line.strip_prefix("@@ ") {
                let Some(path) = current.clone() else { continue };
                // "@@ -a,b +c,d @@" — we want the +c,d side
                if let Some(plus) = hunk.split_whitespace().find(|t| t.starts_with('+')) {
                    let spec = &plus[1..];
                    let (start, len) = match spec.split_once(',') {
                        Some((s, l)) => (
                            s.parse::<usize>().unwrap_or(0),
                            l.parse::<usize>().unwrap_or(0),
                        ),
                        None => (spec.parse::<usize>().unwrap_or(0), 1),
                    };
                    if len > 0 {
                        ranges.entry(path).or_default().push((start, start + len - 1));
                    }
                }
            }
        }

        Self { ranges }
    }

    pub fn touches_file(&self, path: &Path) -> bool {
        self.ranges.contains_key(&normalize_path(path))
    }

    /// Whether any line of `[line, end_line]` falls inside a changed range of
    /// the file.
    pub fn covers(&self, path: &Path, line: usize, end_line: usize) -> bool {
        let Some(ranges) = self.ranges.get(&normalize_path(path)) else {
            return false;
        };
        let end_line = end_line.max(line);
        ranges.iter().any(|&(lo, hi)| line <= hi && end_line >= lo)
    }
}

/// Drop findings outside the diff. Applied after normalization, never before
/// tool invocation, so tools keep full-repository context.
///
/// Findings without a line position (dependency findings against a lockfile)
/// are kept when the file itself is touched by the diff.
pub fn filter_to_diff(
    findings: Vec<NormalizedFinding>,
    coverage: &DiffCoverage,
) -> Vec<NormalizedFinding> {
    findings
        .into_iter()
        .filter(|f| {
            if f.line == 0 {
                coverage.touches_file(&f.file_path)
            } else {
                coverage.covers(&f.file_path, f.line, f.end_line)
            }
        })
        .collect()
}
