// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Lightweight receiver counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn inc(&self) {
        self.add(1);
    }

    pub(crate) fn add(&self, n: u64) {
        _ = self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters kept by the receiver.
#[derive(Debug, Default)]
pub struct ReceiverMetrics {
    pub(crate) batches: Counter,
    pub(crate) items: Counter,
    pub(crate) admitted_bytes: Counter,
    pub(crate) size_hint_mismatches: Counter,
    pub(crate) statuses_ok: Counter,
    pub(crate) statuses_error: Counter,
}

/// A point-in-time copy of [`ReceiverMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Batches decoded and dispatched.
    pub batches: u64,
    /// Telemetry items (spans, log records, data points) decoded.
    pub items: u64,
    /// Total bytes reserved against the admission budget.
    pub admitted_bytes: u64,
    /// Batches whose `otlp-pdata-size` hint disagreed with the decoded size.
    pub size_hint_mismatches: u64,
    /// OK statuses sent.
    pub statuses_ok: u64,
    /// Error statuses sent.
    pub statuses_error: u64,
}

impl ReceiverMetrics {
    /// Copy out the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches: self.batches.get(),
            items: self.items.get(),
            admitted_bytes: self.admitted_bytes.get(),
            size_hint_mismatches: self.size_hint_mismatches.get(),
            statuses_ok: self.statuses_ok.get(),
            statuses_error: self.statuses_error.get(),
        }
    }
}
