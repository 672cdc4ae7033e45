//! The analytics event queue.
//!
//! Fire-and-forget tracking with batching, a durable mirror for offline
//! recovery, corruption detection at load and before the first flush, and
//! order-preserving requeue on transient transmission failures. Telemetry
//! failures never propagate to callers; everything is logged and swallowed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hd_core::config::TelemetryConfig;
use hd_core::constants::storage_keys;
use hd_core::error::HdError;
use hd_core::observe::TelemetryHook;
use hd_core::storage::KeyValueStore;

use crate::event::AnalyticsEvent;
use crate::funnel::{FunnelSummary, FunnelTracker};
use crate::transmit::EventTransmitter;

struct Inner {
    config: TelemetryConfig,
    store: Arc<dyn KeyValueStore>,
    transmitter: Arc<dyn EventTransmitter>,
    /// Stamped into every event's metadata.
    session_id: String,
    queue: Mutex<VecDeque<AnalyticsEvent>>,
    funnels: Mutex<FunnelTracker>,
    /// Single-flight gate: a flush that finds this held simply returns.
    flush_gate: Mutex<()>,
    /// The corruption safeguard runs once, before the first flush.
    first_flush_done: AtomicBool,
    interval_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Analytics event queue handle. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Analytics {
    inner: Arc<Inner>,
}

impl Analytics {
    pub fn new(
        config: TelemetryConfig,
        store: Arc<dyn KeyValueStore>,
        transmitter: Arc<dyn EventTransmitter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                transmitter,
                session_id: Uuid::new_v4().to_string(),
                queue: Mutex::new(VecDeque::new()),
                funnels: Mutex::new(FunnelTracker::new()),
                flush_gate: Mutex::new(()),
                first_flush_done: AtomicBool::new(false),
                interval_task: Mutex::new(None),
            }),
        }
    }

    /// Recover queued events from the durable mirror.
    ///
    /// Applies the validation gate per entry. If more than the configured
    /// fraction of entries fail it, the whole mirror is discarded: that
    /// much corruption means the blob itself is not trustworthy.
    pub async fn load_persisted(&self) {
        let raw = match self.inner.store.get(storage_keys::ANALYTICS_QUEUE).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!("could not read analytics mirror: {e}");
                return;
            }
        };

        let values: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(values) => values,
            Err(e) => {
                warn!("analytics mirror is not valid JSON, discarding: {e}");
                self.clear_mirror().await;
                return;
            }
        };
        let total = values.len();
        if total == 0 {
            return;
        }

        let mut kept = Vec::new();
        let mut invalid = 0usize;
        for value in values {
            match AnalyticsEvent::from_value(value) {
                Some(event) if event.is_valid() => kept.push(event),
                _ => invalid += 1,
            }
        }

        let fraction = invalid as f64 / total as f64;
        if fraction > self.inner.config.load_discard_fraction {
            warn!(
                "discarding analytics mirror: {invalid}/{total} entries invalid ({:.0}%)",
                fraction * 100.0
            );
            self.clear_mirror().await;
            return;
        }

        if invalid > 0 {
            warn!("dropped {invalid} invalid entries from analytics mirror");
        }
        info!("recovered {} queued analytics event(s)", kept.len());
        let snapshot: Vec<AnalyticsEvent> = {
            let mut queue = self.inner.queue.lock().await;
            queue.extend(kept);
            while queue.len() > self.inner.config.max_queue_size {
                queue.pop_front();
                warn!("analytics queue full, evicted oldest recovered event");
            }
            queue.iter().cloned().collect()
        };
        self.persist(&snapshot).await;
    }

    /// Whether the persisted consent flag permits tracking. Only an
    /// explicit "false" disables; absence means allowed.
    async fn consent_allowed(&self) -> bool {
        match self.inner.store.get(storage_keys::ANALYTICS_CONSENT).await {
            Ok(Some(value)) => value != "false",
            Ok(None) => true,
            Err(e) => {
                warn!("could not read consent flag: {e}");
                true
            }
        }
    }

    /// Record an event. Fire-and-forget: invalid events are dropped, the
    /// durable mirror is updated, and a flush kicks in once the queue
    /// reaches the batch size.
    pub async fn track(&self, event_type: &str, event_data: Value) {
        if !self.inner.config.enabled {
            return;
        }
        if !self.consent_allowed().await {
            debug!("tracking disabled by consent, dropping {event_type}");
            return;
        }

        let event = AnalyticsEvent::new(event_type, event_data, &self.inner.session_id);
        if !event.is_valid() {
            warn!("dropping analytics event with blank type");
            return;
        }

        let (snapshot, len) = {
            let mut queue = self.inner.queue.lock().await;
            queue.push_back(event);
            while queue.len() > self.inner.config.max_queue_size {
                queue.pop_front();
                warn!("analytics queue full, evicted oldest event");
            }
            (queue.iter().cloned().collect::<Vec<_>>(), queue.len())
        };
        self.persist(&snapshot).await;

        if len >= self.inner.config.batch_size {
            self.flush().await;
        }
    }

    /// Push queued events to the backend in sub-batches.
    ///
    /// Single-flight: a concurrent flush returns immediately. A
    /// validation-class rejection drops everything (retrying malformed
    /// data loops forever); any other failure puts the unsent remainder
    /// back at the front of the queue, ahead of newly accumulated events.
    pub async fn flush(&self) {
        let Ok(_guard) = self.inner.flush_gate.try_lock() else {
            debug!("flush already in progress");
            return;
        };

        let drained: Vec<AnalyticsEvent> = {
            let mut queue = self.inner.queue.lock().await;
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }

        if !self.inner.first_flush_done.swap(true, Ordering::SeqCst) {
            let invalid = drained.iter().filter(|e| !e.is_valid()).count();
            let fraction = invalid as f64 / drained.len() as f64;
            if fraction > self.inner.config.flush_discard_fraction {
                warn!(
                    "discarding {} queued event(s): {invalid} invalid before first flush",
                    drained.len()
                );
                self.clear_mirror().await;
                return;
            }
        }

        // Re-apply the gate: storage and concurrent mutation can both
        // reintroduce invalid entries
        let valid: Vec<AnalyticsEvent> =
            drained.into_iter().filter(AnalyticsEvent::is_valid).collect();
        let chunk_size = self.inner.config.batch_size.max(1);

        for (index, chunk) in valid.chunks(chunk_size).enumerate() {
            match self.inner.transmitter.send_batch(chunk).await {
                Ok(()) => {}
                Err(HdError::Validation(message)) => {
                    warn!("backend rejected analytics batch, dropping queue: {message}");
                    self.inner.queue.lock().await.clear();
                    self.clear_mirror().await;
                    return;
                }
                Err(e) => {
                    warn!("analytics flush failed, requeueing: {e}");
                    let unsent: Vec<AnalyticsEvent> = valid[index * chunk_size..]
                        .iter()
                        .filter(|e| e.is_valid())
                        .cloned()
                        .collect();
                    let snapshot: Vec<AnalyticsEvent> = {
                        let mut queue = self.inner.queue.lock().await;
                        for event in unsent.into_iter().rev() {
                            queue.push_front(event);
                        }
                        queue.iter().cloned().collect()
                    };
                    self.persist(&snapshot).await;
                    return;
                }
            }
        }

        info!("flushed {} analytics event(s)", valid.len());
        self.clear_mirror().await;
        // Mirror whatever accumulated while the flush was in flight
        let snapshot: Vec<AnalyticsEvent> =
            self.inner.queue.lock().await.iter().cloned().collect();
        if !snapshot.is_empty() {
            self.persist(&snapshot).await;
        }
    }

    /// Record a step in a named funnel, creating it on first use.
    pub async fn track_funnel_step(&self, funnel: &str, step: &str, data: Value) {
        if !self.inner.config.enabled || !self.consent_allowed().await {
            return;
        }
        self.inner.funnels.lock().await.record_step(funnel, step, data);
    }

    /// Terminate a funnel as completed and emit its summary event.
    pub async fn track_funnel_completion(&self, funnel: &str) {
        let summary = self.inner.funnels.lock().await.finish(funnel);
        if let Some(summary) = summary {
            self.track("funnel_completed", Self::summary_payload(&summary)).await;
        }
    }

    /// Terminate a funnel as abandoned and emit its summary event.
    pub async fn track_funnel_dropoff(&self, funnel: &str) {
        let summary = self.inner.funnels.lock().await.finish(funnel);
        if let Some(summary) = summary {
            self.track("funnel_dropoff", Self::summary_payload(&summary)).await;
        }
    }

    fn summary_payload(summary: &FunnelSummary) -> Value {
        json!({
            "funnel": summary.funnel,
            "stepCount": summary.step_count,
            "durationMs": summary.duration_ms,
            "lastStep": summary.last_step,
        })
    }

    /// Start the periodic flush timer.
    pub async fn start(&self) {
        let mut task = self.inner.interval_task.lock().await;
        if task.is_some() {
            return;
        }
        let analytics = self.clone();
        let interval = Duration::from_millis(self.inner.config.batch_interval_ms.max(1));
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if analytics.queue_len().await > 0 {
                    analytics.flush().await;
                }
            }
        }));
    }

    /// Stop the periodic timer and push out whatever is queued.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.interval_task.lock().await.take() {
            handle.abort();
        }
        self.flush().await;
    }

    /// Number of events currently queued.
    pub async fn queue_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Current queue contents, in order.
    pub async fn snapshot(&self) -> Vec<AnalyticsEvent> {
        self.inner.queue.lock().await.iter().cloned().collect()
    }

    async fn persist(&self, snapshot: &[AnalyticsEvent]) {
        match serde_json::to_string(snapshot) {
            Ok(raw) => {
                if let Err(e) = self.inner.store.set(storage_keys::ANALYTICS_QUEUE, &raw).await {
                    warn!("could not persist analytics queue: {e}");
                }
            }
            Err(e) => warn!("could not serialize analytics queue: {e}"),
        }
    }

    async fn clear_mirror(&self) {
        if let Err(e) = self.inner.store.remove(storage_keys::ANALYTICS_QUEUE).await {
            warn!("could not clear analytics mirror: {e}");
        }
    }
}

impl TelemetryHook for Analytics {
    fn track(&self, event_type: &str, data: Value) {
        let analytics = self.clone();
        let event_type = event_type.to_string();
        tokio::spawn(async move {
            analytics.track(&event_type, data).await;
        });
    }
}
