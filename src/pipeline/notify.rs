//! Notify stage: deliver the scan summary exactly once.
//!
//! Transient transport failures are retried with bounded exponential backoff
//! and jitter. A delivery-recorded flag guarantees the sink is never invoked
//! again after a confirmed delivery, even if the stage is re-entered.

use crate::config::NotifyConfig;
use crate::errors::{Result, ScanError};
use crate::interfaces::NotificationSink;
use crate::types::job::NotifyJobData;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Webhook sink posting the summary as JSON.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String, request_timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, payload: &NotifyJobData) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ScanError::Delivery {
                attempts: 1,
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ScanError::Delivery {
                attempts: 1,
                reason: format!("sink responded with {}", response.status()),
            });
        }
        Ok(())
    }
}

/// At-most-once wrapper around a sink.
pub struct Notifier<'a> {
    sink: &'a dyn NotificationSink,
    config: &'a NotifyConfig,
    delivered: AtomicBool,
}

impl<'a> Notifier<'a> {
    pub fn new(sink: &'a dyn NotificationSink, config: &'a NotifyConfig) -> Self {
        Self {
            sink,
            config,
            delivered: AtomicBool::new(false),
        }
    }

    /// Deliver with retries. Once a delivery is confirmed the payload is
    /// never sent again; idempotency comes from this flag, not from the sink
    /// re-deriving content.
    pub async fn deliver(&self, payload: &NotifyJobData) -> Result<()> {
        if self.delivered.load(Ordering::SeqCst) {
            log::debug!("scan {}: delivery already recorded, skipping", payload.scan_id);
            return Ok(());
        }

        let mut last_reason = String::new();
        for attempt in 1..=self.config.max_attempts {
            match self.sink.deliver(payload).await {
                Ok(()) => {
                    self.delivered.store(true, Ordering::SeqCst);
                    log::info!(
                        "scan {}: summary delivered (status {})",
                        payload.scan_id,
                        payload.status
                    );
                    return Ok(());
                }
                Err(e) => {
                    last_reason = e.to_string();
                    log::warn!(
                        "scan {}: delivery attempt {attempt}/{} failed: {last_reason}",
                        payload.scan_id,
                        self.config.max_attempts
                    );
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(backoff(self.config.backoff_base_ms, attempt)).await;
                    }
                }
            }
        }

        Err(ScanError::Delivery {
            attempts: self.config.max_attempts,
            reason: last_reason,
        })
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered.load(Ordering::SeqCst)
    }
}

/// Exponential backoff with up to 50% jitter.
fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt - 1).min(10));
    let jitter = rand::thread_rng().gen_range(0..=exp / 2);
    Duration::from_millis(exp + jitter)
}
