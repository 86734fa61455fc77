// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Receiver configuration.

use otap_link_protocol::compression::CompressionMethod;
use serde::Deserialize;
use std::net::SocketAddr;

/// Configuration for the streaming Arrow receiver.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiverConfig {
    /// Address the gRPC server listens on.
    pub listening_addr: SocketAddr,

    /// Admission capacity in MiB for in-flight decoded data; `0` disables
    /// the limit.
    #[serde(default = "default_memory_limit_mib")]
    pub memory_limit_mib: u64,

    /// Overrides `memory_limit_mib` when set; kept for configs written
    /// against the older knob name.
    #[serde(default)]
    pub admission_limit_mib: Option<u64>,

    /// Callers parked on admission beyond this count are rejected
    /// immediately instead of blocking.
    #[serde(default = "default_waiter_limit")]
    pub waiter_limit: usize,

    /// Drop the three per-signal streaming services from the surface.
    #[serde(default)]
    pub disable_separate_signals: bool,

    /// Drop the legacy mixed `ArrowStream` service from the surface.
    #[serde(default)]
    pub disable_mixed_signals: bool,

    /// Forward merged batch/stream metadata to the pipeline.
    #[serde(default)]
    pub include_metadata: bool,

    /// gRPC transport compression.
    #[serde(default)]
    pub compression_method: Option<CompressionMethod>,

    /// Size of the per-stream pending-response channel (default: available
    /// parallelism).
    #[serde(default = "default_response_channel_size")]
    pub response_stream_channel_size: usize,
}

impl ReceiverConfig {
    /// A config with defaults for everything but the listening address.
    #[must_use]
    pub fn new(listening_addr: SocketAddr) -> Self {
        Self {
            listening_addr,
            memory_limit_mib: default_memory_limit_mib(),
            admission_limit_mib: None,
            waiter_limit: default_waiter_limit(),
            disable_separate_signals: false,
            disable_mixed_signals: false,
            include_metadata: false,
            compression_method: None,
            response_stream_channel_size: default_response_channel_size(),
        }
    }

    /// Effective admission capacity in bytes; `None` means unlimited.
    #[must_use]
    pub fn admission_capacity_bytes(&self) -> Option<u64> {
        let mib = self.admission_limit_mib.unwrap_or(self.memory_limit_mib);
        (mib > 0).then(|| mib * 1024 * 1024)
    }
}

const fn default_memory_limit_mib() -> u64 {
    128
}

const fn default_waiter_limit() -> usize {
    1000
}

fn default_response_channel_size() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
