//! Lightweight in-memory metrics
//!
//! Counters and timing histograms for provider queries, command dispatch and
//! provider failures. Stored in-memory with lock-free atomics for the
//! high-frequency counters and a DashMap for the low-contention histograms;
//! consumers log the summary periodically or on shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

/// Global metrics registry (singleton)
static METRICS: once_cell::sync::Lazy<Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(Metrics::new()));

/// Get the global metrics instance
pub fn metrics() -> &'static Arc<Metrics> {
    &METRICS
}

/// Client operation metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Queries started, by feature name.
    query_counts: DashMap<&'static str, AtomicU64>,
    /// Command executions, by command id.
    command_counts: DashMap<String, AtomicU64>,
    /// Provider invocations that failed and were isolated.
    provider_failures: AtomicU64,
    /// Operation timings in microseconds, by operation name.
    operation_timings: DashMap<String, Vec<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self, feature: &'static str) {
        self.query_counts
            .entry(feature)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self, command: &str) {
        self.command_counts
            .entry(command.to_owned())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_operation(&self, operation: impl Into<String>, elapsed: Duration) {
        self.operation_timings
            .entry(operation.into())
            .or_default()
            .push(elapsed.as_micros() as u64);
    }

    pub fn query_count(&self, feature: &str) -> u64 {
        self.query_counts
            .get(feature)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn command_count(&self, command: &str) -> u64 {
        self.command_counts
            .get(command)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn provider_failure_count(&self) -> u64 {
        self.provider_failures.load(Ordering::Relaxed)
    }

    /// Logs a one-line summary of everything recorded so far.
    pub fn log_summary(&self) {
        let queries: u64 = self
            .query_counts
            .iter()
            .map(|entry| entry.value().load(Ordering::Relaxed))
            .sum();
        let commands: u64 = self
            .command_counts
            .iter()
            .map(|entry| entry.value().load(Ordering::Relaxed))
            .sum();
        tracing::info!(
            queries,
            commands,
            provider_failures = self.provider_failure_count(),
            "metrics summary"
        );
    }
}
