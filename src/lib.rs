pub mod config;
pub mod errors;
pub mod interfaces;
pub mod normalizer;
pub mod pipeline;
pub mod scanner;
pub mod target_scan;
pub mod types;

// Re-export commonly used items for convenience
pub use config::AppConfig;
pub use errors::{Result, ScanError};
pub use pipeline::{Orchestrator, ScanReport, ScanState};
pub use types::finding::{NormalizedFinding, ScanCategory, ScanStatus, Severity};
pub use types::job::{ScanJobData, TargetScanJobData};
