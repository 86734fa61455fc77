// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Exporter configuration.

use otap_link_codec::PayloadCompression;
use otap_link_protocol::StreamMethod;
use otap_link_protocol::compression::CompressionMethod;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Configuration for the streaming Arrow exporter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    /// Endpoint of the Arrow receiver, e.g. `http://127.0.0.1:4317`.
    pub grpc_endpoint: String,

    /// Which of the four streaming methods to use (default: the legacy
    /// mixed stream, which accepts every signal).
    #[serde(default = "default_method")]
    pub method: StreamMethod,

    /// Number of concurrent streams (default: available parallelism).
    #[serde(default = "default_num_streams")]
    pub num_streams: usize,

    /// Streams are gracefully closed and restarted after this long.
    /// Format: humantime (e.g. "30s", "5m", "1h").
    #[serde(default, with = "humantime_serde")]
    pub max_stream_lifetime: Option<Duration>,

    /// How outbound batches are dispatched to streams.
    #[serde(default)]
    pub prioritizer: PrioritizerKind,

    /// Sample size of the `best_of_n` prioritizer (default 2; `1`
    /// degenerates to round-robin).
    #[serde(default = "default_load_sample")]
    pub load_sample: usize,

    /// Arrow-internal IPC buffer compression; `none` relies on the gRPC
    /// transport compression alone.
    #[serde(default)]
    pub payload_compression: PayloadCompression,

    /// gRPC transport compression.
    #[serde(default)]
    pub compression_method: Option<CompressionMethod>,

    /// Static headers attached to every batch (HPACK-encoded alongside the
    /// per-request credentials).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ExporterConfig {
    /// A config with defaults for everything but the endpoint.
    #[must_use]
    pub fn new(grpc_endpoint: impl Into<String>) -> Self {
        Self {
            grpc_endpoint: grpc_endpoint.into(),
            method: default_method(),
            num_streams: default_num_streams(),
            max_stream_lifetime: None,
            prioritizer: PrioritizerKind::default(),
            load_sample: default_load_sample(),
            payload_compression: PayloadCompression::default(),
            compression_method: None,
            headers: BTreeMap::new(),
        }
    }
}

const fn default_method() -> StreamMethod {
    StreamMethod::Mixed
}

fn default_num_streams() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

const fn default_load_sample() -> usize {
    2
}

/// Dispatch policy over the stream pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrioritizerKind {
    /// First available stream carries the next batch.
    #[default]
    Fifo,
    /// Sample two streams, pick the less loaded.
    BestOfTwo,
    /// Sample `load_sample` streams, pick the least loaded.
    BestOfN,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in() {
        let config: ExporterConfig = serde_json::from_value(serde_json::json!({
            "grpc_endpoint": "http://127.0.0.1:4317",
        }))
        .expect("valid config");
        assert_eq!(config.method, StreamMethod::Mixed);
        assert!(config.num_streams >= 1);
        assert_eq!(config.prioritizer, PrioritizerKind::Fifo);
        assert_eq!(config.load_sample, 2);
        assert_eq!(config.payload_compression, PayloadCompression::None);
        assert!(config.max_stream_lifetime.is_none());
        assert!(config.headers.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let config: ExporterConfig = serde_json::from_value(serde_json::json!({
            "grpc_endpoint": "http://collector:4317",
            "method": "traces",
            "num_streams": 4,
            "max_stream_lifetime": "90s",
            "prioritizer": "best_of_n",
            "load_sample": 3,
            "payload_compression": "zstd",
            "compression_method": "zstd",
            "headers": {"x-tenant": "edge-7"},
        }))
        .expect("valid config");
        assert_eq!(config.method, StreamMethod::Traces);
        assert_eq!(config.num_streams, 4);
        assert_eq!(config.max_stream_lifetime, Some(Duration::from_secs(90)));
        assert_eq!(config.prioritizer, PrioritizerKind::BestOfN);
        assert_eq!(config.load_sample, 3);
        assert_eq!(config.payload_compression, PayloadCompression::Zstd);
        assert_eq!(config.headers["x-tenant"], "edge-7");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_value::<ExporterConfig>(serde_json::json!({
            "grpc_endpoint": "http://collector:4317",
            "n_streams": 4,
        }));
        assert!(result.is_err());
    }
}
