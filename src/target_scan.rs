//! Target (dynamic web) scan mode resolution.
//!
//! Legacy envelopes carried `scanners` + `scan_phase`; current ones carry
//! `scan_mode` and `rate_limit_preset`. Both are accepted on the wire, but
//! resolution happens exactly once at ingestion and produces a
//! [`ResolvedTargetScan`] — nothing past that point branches on legacy fields.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Escalation tier controlling depth and rate budget of a target scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Technology fingerprinting and lightweight checks only
    Quick,
    /// Targeted checks against detected technologies
    Standard,
    /// Full active probing, highest timeout and rate budget
    Comprehensive,
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quick" => Ok(ScanMode::Quick),
            "standard" => Ok(ScanMode::Standard),
            "comprehensive" => Ok(ScanMode::Comprehensive),
            _ => Err(format!("Invalid scan mode: {s}")),
        }
    }
}

/// Deprecated phase-based mode, kept for wire compatibility only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Discovery,
    Focused,
    Single,
    Full,
}

impl ScanPhase {
    /// One-shot translation applied at ingestion when no `scan_mode` is given.
    fn into_mode(self) -> ScanMode {
        match self {
            ScanPhase::Discovery => ScanMode::Quick,
            ScanPhase::Focused => ScanMode::Standard,
            ScanPhase::Single | ScanPhase::Full => ScanMode::Comprehensive,
        }
    }
}

/// Requests-per-second band applied to the target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitPreset {
    Low,
    Medium,
    High,
}

impl RateLimitPreset {
    pub fn requests_per_second(self) -> u32 {
        match self {
            RateLimitPreset::Low => 5,
            RateLimitPreset::Medium => 20,
            RateLimitPreset::High => 50,
        }
    }
}

/// Authentication material forwarded to the dynamic tester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetAuth {
    /// "basic", "bearer", "cookie", "header"
    pub auth_type: String,
    /// For "header" auth this is the header name; unused otherwise
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub secret: Option<String>,
}

impl TargetAuth {
    /// Materialize the credential as a request header pair. For "basic" the
    /// secret carries the already-encoded credential pair.
    pub fn header(&self) -> Option<(String, String)> {
        let secret = self.secret.as_deref()?;
        match self.auth_type.to_lowercase().as_str() {
            "bearer" => Some(("Authorization".to_string(), format!("Bearer {secret}"))),
            "basic" => Some(("Authorization".to_string(), format!("Basic {secret}"))),
            "cookie" => Some(("Cookie".to_string(), secret.to_string())),
            "header" => Some((
                self.username
                    .clone()
                    .unwrap_or_else(|| "Authorization".to_string()),
                secret.to_string(),
            )),
            _ => None,
        }
    }
}

/// Wire config for a target scan, modern and deprecated fields side by side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetScanConfig {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scan_mode: Option<ScanMode>,
    /// Deprecated: tool list from the phase-based protocol. Advisory only.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub scanners: Vec<String>,
    /// Deprecated: superseded by `scan_mode`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scan_phase: Option<ScanPhase>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub technologies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auth: Option<TargetAuth>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rate_limit_preset: Option<RateLimitPreset>,
    /// Deprecated: raw rps, honored only when no preset is given
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rate_limit_rps: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub exclude_paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout_secs: Option<u64>,
}

/// Request envelope for one dynamic scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetScanJobData {
    pub scan_id: String,
    pub tenant_id: String,
    pub target_id: String,
    pub target_url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_name: Option<String>,
    pub config: TargetScanConfig,
}

/// Canonical internal target-scan plan. Selected once at scan creation and
/// fixed for the scan's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTargetScan {
    pub mode: ScanMode,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
    /// Request headers for every probe: custom headers first (name-sorted),
    /// then the auth credential materialized as a header
    pub headers: Vec<(String, String)>,
    /// Legacy scanner list carried through as advisory metadata
    pub legacy_scanners: Vec<String>,
}

impl ScanMode {
    /// Default wall-clock budget for the whole target scan.
    pub fn default_timeout_secs(self) -> u64 {
        match self {
            ScanMode::Quick => 300,
            ScanMode::Standard => 1800,
            ScanMode::Comprehensive => 7200,
        }
    }

    fn default_rate(self) -> RateLimitPreset {
        match self {
            ScanMode::Quick => RateLimitPreset::Low,
            ScanMode::Standard => RateLimitPreset::Medium,
            ScanMode::Comprehensive => RateLimitPreset::High,
        }
    }
}

/// Resolve the wire config into the canonical plan.
///
/// Precedence: `scan_mode` wins over `scan_phase`; `rate_limit_preset` wins
/// over `rate_limit_rps`. With neither mode field present the scan defaults
/// to `standard`.
pub fn resolve(config: &TargetScanConfig) -> ResolvedTargetScan {
    let mode = config
        .scan_mode
        .or_else(|| config.scan_phase.map(ScanPhase::into_mode))
        .unwrap_or(ScanMode::Standard);

    let requests_per_second = match config.rate_limit_preset {
        Some(preset) => preset.requests_per_second(),
        None => config
            .rate_limit_rps
            .unwrap_or_else(|| mode.default_rate().requests_per_second()),
    };

    let timeout_secs = config
        .timeout_secs
        .unwrap_or_else(|| mode.default_timeout_secs());

    // Sorted for deterministic tool invocations
    let mut headers: Vec<(String, String)> = config
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    headers.sort();
    if let Some(auth_header) = config.auth.as_ref().and_then(TargetAuth::header) {
        headers.push(auth_header);
    }

    ResolvedTargetScan {
        mode,
        requests_per_second,
        timeout_secs,
        headers,
        legacy_scanners: config.scanners.clone(),
    }
}
