//! Service metrics: request counters and cumulative latency.
//!
//! All counters sit behind one lock, so every update is atomic with respect
//! to the others and a snapshot never observes a half-applied update.
//! Counters only grow; they reset when the process restarts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::types::round2;

#[derive(Debug, Default)]
struct Counters {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_latency_ms: f64,
    requests_per_model: BTreeMap<String, u64>,
}

/// Process-lifetime request metrics.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    counters: Mutex<Counters>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Counters) -> R) -> R {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut counters)
    }

    /// Count an accepted request before it runs.
    pub fn record_accepted(&self, model_key: &str) {
        self.with(|c| {
            c.total_requests += 1;
            *c.requests_per_model.entry(model_key.to_string()).or_insert(0) += 1;
        });
    }

    /// Record how an accepted request ended.
    pub fn record_completed(&self, success: bool, latency_ms: f64) {
        self.with(|c| {
            if success {
                c.successful_requests += 1;
            } else {
                c.failed_requests += 1;
            }
            c.total_latency_ms += latency_ms;
        });
    }

    /// Record a whole request in one step.
    pub fn record(&self, success: bool, latency_ms: f64, model_key: &str) {
        self.with(|c| {
            c.total_requests += 1;
            *c.requests_per_model.entry(model_key.to_string()).or_insert(0) += 1;
            if success {
                c.successful_requests += 1;
            } else {
                c.failed_requests += 1;
            }
            c.total_latency_ms += latency_ms;
        });
    }

    /// Get a consistent snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.with(|c| {
            let average = if c.total_requests == 0 {
                0.0
            } else {
                c.total_latency_ms / c.total_requests as f64
            };
            MetricsSnapshot {
                total_requests: c.total_requests,
                successful_requests: c.successful_requests,
                failed_requests: c.failed_requests,
                average_latency_ms: round2(average),
                requests_per_model: c.requests_per_model.clone(),
            }
        })
    }
}

/// Immutable snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub requests_per_model: BTreeMap<String, u64>,
}
