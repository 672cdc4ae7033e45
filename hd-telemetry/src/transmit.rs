//! Event transmission to the analytics backend.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use hd_core::error::{HdError, HdResult};

use crate::event::AnalyticsEvent;

/// Ships batches of validated events to the backend.
#[async_trait]
pub trait EventTransmitter: Send + Sync {
    /// Send one batch. A `Validation` error means the backend rejected
    /// the batch as malformed and it must never be retried.
    async fn send_batch(&self, events: &[AnalyticsEvent]) -> HdResult<()>;
}

/// HTTP transmitter posting to the analytics batch endpoint.
pub struct HttpTransmitter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransmitter {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            endpoint: format!("{}/api/v1/analytics/batch", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl EventTransmitter for HttpTransmitter {
    async fn send_batch(&self, events: &[AnalyticsEvent]) -> HdResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "events": events }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HdError::Timeout(e.to_string())
                } else {
                    HdError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("transmitted {} event(s)", events.len());
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        // A 4xx (other than rate limiting) means the batch itself is bad
        if status.is_client_error() && status.as_u16() != 429 {
            return Err(HdError::Validation(format!(
                "batch rejected ({status}): {body}"
            )));
        }
        Err(HdError::Http {
            status: status.as_u16(),
            message: body,
        })
    }
}

/// Recording transmitter for tests, with scriptable failures.
#[derive(Default)]
pub struct MemoryTransmitter {
    /// Every successfully accepted batch, in order.
    pub batches: Mutex<Vec<Vec<AnalyticsEvent>>>,
    /// Errors to return, consumed one per call.
    failures: Mutex<VecDeque<HdError>>,
}

impl MemoryTransmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next call to fail with the given error.
    pub fn fail_next(&self, error: HdError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    /// All transmitted events flattened, in order.
    pub fn sent_events(&self) -> Vec<AnalyticsEvent> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl EventTransmitter for MemoryTransmitter {
    async fn send_batch(&self, events: &[AnalyticsEvent]) -> HdResult<()> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.batches.lock().unwrap().push(events.to_vec());
        Ok(())
    }
}
