use thiserror::Error;

/// Error taxonomy for the scan engine.
///
/// Containment semantics: adapter-level failures (`ToolUnavailable`, `Parse`,
/// `Timeout`) are recorded against their category stage and never abort
/// sibling stages. `CloneFailure` is fatal to the scan; Cleanup still runs.
/// `Delivery` is retried with backoff and then downgraded to a scan-level
/// warning. `BudgetExceeded` and `TenantInactive` are admission-time
/// rejections, not pipeline failures.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan tool '{tool}' is not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("failed to parse {tool} output: {source}")]
    Parse {
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{tool} output is structurally invalid: {reason}")]
    MalformedOutput { tool: String, reason: String },

    #[error("clone of '{repo}' failed: {reason}")]
    CloneFailure { repo: String, reason: String },

    #[error("scan tool '{tool}' exceeded its {timeout_secs}s budget")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("notification delivery failed after {attempts} attempts: {reason}")]
    Delivery { attempts: u32, reason: String },

    #[error("tenant '{tenant_id}' exceeded its concurrency budget")]
    BudgetExceeded { tenant_id: String },

    #[error("submission rate limit exceeded for '{key}'")]
    RateLimited { key: String },

    #[error("tenant '{tenant_id}' is inactive")]
    TenantInactive { tenant_id: String },

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error while {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from file '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Required configuration field '{0}' is missing or invalid")]
    FieldMissing(String),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, ScanError>;
