pub mod finding;
pub mod job;

// Re-export commonly used types
pub use finding::{
    CategoryOutcome, Confidence, FindingsCount, NormalizedFinding, ScanCategory, ScanStatus,
    Severity,
};
pub use job::{
    CategoryJobData, CleanupJobData, CloneJobData, NotifyJobData, ResultsJobData, ScanConfig,
    ScanJobData,
};
