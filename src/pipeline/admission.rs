//! Admission gating: per-tenant concurrency budgets and a time-windowed
//! submission throttle.
//!
//! Both gate *new* scan submissions only; in-flight pipeline execution is
//! never throttled here.

use crate::config::AdmissionConfig;
use crate::errors::{Result, ScanError};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Concurrency budget: at most N scans in flight per tenant, so one tenant
/// cannot starve the others.
pub struct ConcurrencyBudget {
    per_tenant: usize,
    semaphores: DashMap<String, Arc<Semaphore>>,
}

impl ConcurrencyBudget {
    pub fn new(per_tenant: usize) -> Self {
        Self {
            per_tenant,
            semaphores: DashMap::new(),
        }
    }

    /// Try to admit a scan for `tenant_id`. The returned permit is held for
    /// the scan's lifetime; dropping it frees the slot.
    pub fn try_admit(&self, tenant_id: &str) -> Result<OwnedSemaphorePermit> {
        // Idle tenants would otherwise accumulate one entry each for the
        // process lifetime. Outstanding permits hold an Arc clone, so a
        // strong count of one means no scan is in flight.
        self.semaphores
            .retain(|_, semaphore| Arc::strong_count(semaphore) > 1);

        let semaphore = self
            .semaphores
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_tenant)))
            .clone();

        semaphore
            .try_acquire_owned()
            .map_err(|_| ScanError::BudgetExceeded {
                tenant_id: tenant_id.to_string(),
            })
    }

    #[cfg(test)]
    pub fn tracked_tenants(&self) -> usize {
        self.semaphores.len()
    }
}

/// Fixed-window submission counter keyed by tenant id when known, else by
/// network address.
pub struct SubmissionThrottle {
    limit: u32,
    window: Duration,
    windows: DashMap<String, (Instant, u32)>,
}

impl SubmissionThrottle {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            limit: config.submissions_per_window,
            window: Duration::from_secs(config.window_secs),
            windows: DashMap::new(),
        }
    }

    /// Key for a submission: tenant id wins over the caller's address.
    pub fn key(tenant_id: Option<&str>, remote_addr: &str) -> String {
        match tenant_id {
            Some(t) if !t.is_empty() => format!("tenant:{t}"),
            _ => format!("addr:{remote_addr}"),
        }
    }

    pub fn check(&self, key: &str) -> Result<()> {
        let now = Instant::now();

        // Windows are short-lived; drop every expired one so the map stays
        // bounded by the set of keys seen within the current window.
        self.windows
            .retain(|_, (start, _)| now.duration_since(*start) < self.window);

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert((now, 0));
        let (start, count) = *entry;

        if now.duration_since(start) >= self.window {
            *entry = (now, 1);
            return Ok(());
        }
        if count >= self.limit {
            return Err(ScanError::RateLimited {
                key: key.to_string(),
            });
        }
        *entry = (start, count + 1);
        Ok(())
    }

    #[cfg(test)]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
