//! Per-funnel step tracking.
//!
//! A funnel lives from its first recorded step until a completion or
//! dropoff report, which produces a derived summary and discards the step
//! log. Pure bookkeeping; the queue turns summaries into events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// One recorded step in a funnel.
#[derive(Debug, Clone)]
pub struct FunnelStep {
    pub step: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// Derived summary emitted when a funnel terminates.
#[derive(Debug, Clone, PartialEq)]
pub struct FunnelSummary {
    pub funnel: String,
    pub step_count: usize,
    pub duration_ms: i64,
    pub last_step: String,
}

/// Mapping from funnel name to its ordered step log.
#[derive(Debug, Default)]
pub struct FunnelTracker {
    funnels: HashMap<String, Vec<FunnelStep>>,
}

impl FunnelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step, creating the funnel on first use.
    pub fn record_step(&mut self, funnel: &str, step: &str, data: Value) {
        self.funnels.entry(funnel.to_string()).or_default().push(FunnelStep {
            step: step.to_string(),
            timestamp: Utc::now(),
            data,
        });
    }

    /// Terminate the funnel and summarize it. Returns None for an unknown
    /// or empty funnel.
    pub fn finish(&mut self, funnel: &str) -> Option<FunnelSummary> {
        let steps = self.funnels.remove(funnel)?;
        let first = steps.first()?;
        let last = steps.last()?;
        Some(FunnelSummary {
            funnel: funnel.to_string(),
            step_count: steps.len(),
            duration_ms: (last.timestamp - first.timestamp).num_milliseconds(),
            last_step: last.step.clone(),
        })
    }

    /// Number of funnels currently in flight.
    pub fn active_count(&self) -> usize {
        self.funnels.len()
    }
}
