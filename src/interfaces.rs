//! Narrow interfaces to external collaborators.
//!
//! The engine consumes tenant status, clone tokens, a write-only persistence
//! sink for findings, and a notification sink. Everything behind these traits
//! (API surface, dashboard, persistence schema, audit logging) is out of
//! scope here.

use crate::errors::Result;
use crate::types::finding::NormalizedFinding;
use crate::types::job::NotifyJobData;
use async_trait::async_trait;

/// Tenant identity and active/suspended status. Inactive tenants' scans are
/// rejected before Clone.
#[async_trait]
pub trait TenantGate: Send + Sync {
    async fn is_active(&self, tenant_id: &str) -> Result<bool>;
}

/// Short-lived source-control access token, one per Clone.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn clone_token(&self, tenant_id: &str, repository_id: &str) -> Result<Option<String>>;
}

/// Write-only persistence sink for normalized findings. Status transitions
/// (dismiss/resolve) are managed outside this core.
#[async_trait]
pub trait FindingSink: Send + Sync {
    async fn store(&self, scan_id: &str, findings: &[NormalizedFinding]) -> Result<()>;
}

/// Delivery target for the scan summary (PR check, webhook).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, payload: &NotifyJobData) -> Result<()>;
}

/// Gate that admits every tenant; for deployments without a tenant service.
pub struct AllowAllTenants;

#[async_trait]
impl TenantGate for AllowAllTenants {
    async fn is_active(&self, _tenant_id: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Token provider for public repositories.
pub struct NoToken;

#[async_trait]
impl TokenProvider for NoToken {
    async fn clone_token(&self, _tenant_id: &str, _repository_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Finding sink that logs counts and drops the findings; used when no
/// persistence collaborator is wired in.
pub struct DiscardFindings;

#[async_trait]
impl FindingSink for DiscardFindings {
    async fn store(&self, scan_id: &str, findings: &[NormalizedFinding]) -> Result<()> {
        log::info!("scan {scan_id}: discarding {} findings (no sink configured)", findings.len());
        Ok(())
    }
}
