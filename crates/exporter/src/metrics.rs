// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Lightweight exporter counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// A relaxed atomic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increment by one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Increment by `n`.
    pub fn add(&self, n: u64) {
        _ = self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters kept by the exporter; snapshot with [`ExporterMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct ExporterMetrics {
    /// Requests handed to a stream writer.
    pub requests: Counter,
    /// Telemetry items (spans, log records, data points) sent.
    pub items: Counter,
    /// OK statuses received.
    pub statuses_ok: Counter,
    /// Error statuses received.
    pub statuses_error: Counter,
    /// Stream teardown/restart cycles.
    pub stream_restarts: Counter,
    /// Downgrade votes observed.
    pub downgrade_votes: Counter,
}

/// A point-in-time copy of [`ExporterMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests handed to a stream writer.
    pub requests: u64,
    /// Telemetry items sent.
    pub items: u64,
    /// OK statuses received.
    pub statuses_ok: u64,
    /// Error statuses received.
    pub statuses_error: u64,
    /// Stream teardown/restart cycles.
    pub stream_restarts: u64,
    /// Downgrade votes observed.
    pub downgrade_votes: u64,
}

impl ExporterMetrics {
    /// Copy out the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.get(),
            items: self.items.get(),
            statuses_ok: self.statuses_ok.get(),
            statuses_error: self.statuses_error.get(),
            stream_restarts: self.stream_restarts.get(),
            downgrade_votes: self.downgrade_votes.get(),
        }
    }
}
