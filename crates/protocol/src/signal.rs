// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Signal identification and stream-method selection.
//!
//! A [`BatchArrowRecords`] carries payloads of a single top-level signal,
//! deduced from the type of its first payload. [`StreamMethod`] names the
//! four bidirectional streaming RPCs the transport speaks: one per signal
//! plus the legacy mixed stream.

use crate::proto::opentelemetry::experimental::arrow::v1::{
    ArrowPayloadType, BatchArrowRecords,
};
use serde::{Deserialize, Serialize};

/// The three top-level telemetry signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Trace spans.
    Traces,
    /// Log records.
    Logs,
    /// Metric data points.
    Metrics,
}

impl SignalType {
    /// Lowercase name, used in log fields and error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalType::Traces => "traces",
            SignalType::Logs => "logs",
            SignalType::Metrics => "metrics",
        }
    }

    /// The signal a payload type belongs to, `None` for `Unknown`.
    #[must_use]
    pub const fn of_payload(payload_type: ArrowPayloadType) -> Option<SignalType> {
        match payload_type {
            ArrowPayloadType::Spans
            | ArrowPayloadType::SpanAttrs
            | ArrowPayloadType::SpanEvents
            | ArrowPayloadType::SpanLinks
            | ArrowPayloadType::SpanEventAttrs
            | ArrowPayloadType::SpanLinkAttrs => Some(SignalType::Traces),
            ArrowPayloadType::Logs | ArrowPayloadType::LogAttrs => Some(SignalType::Logs),
            ArrowPayloadType::UnivariateMetrics
            | ArrowPayloadType::NumberDataPoints
            | ArrowPayloadType::NumberDpAttrs => Some(SignalType::Metrics),
            // Resource and scope attributes appear in every signal; they never
            // lead a batch.
            ArrowPayloadType::ResourceAttrs
            | ArrowPayloadType::ScopeAttrs
            | ArrowPayloadType::Unknown => None,
        }
    }

    /// The signal a batch carries, deduced from its first payload.
    #[must_use]
    pub fn of_batch(batch: &BatchArrowRecords) -> Option<SignalType> {
        let first = batch.arrow_payloads.first()?;
        SignalType::of_payload(ArrowPayloadType::try_from(first.r#type).ok()?)
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the four bidirectional streaming RPCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMethod {
    /// `ArrowTracesService/ArrowTraces`
    Traces,
    /// `ArrowLogsService/ArrowLogs`
    Logs,
    /// `ArrowMetricsService/ArrowMetrics`
    Metrics,
    /// `ArrowStreamService/ArrowStream`, the legacy mixed stream.
    Mixed,
}

/// Fully-qualified gRPC service name of the traces stream.
pub const TRACES_SERVICE_NAME: &str =
    "opentelemetry.proto.experimental.arrow.v1.ArrowTracesService";
/// Fully-qualified gRPC service name of the logs stream.
pub const LOGS_SERVICE_NAME: &str = "opentelemetry.proto.experimental.arrow.v1.ArrowLogsService";
/// Fully-qualified gRPC service name of the metrics stream.
pub const METRICS_SERVICE_NAME: &str =
    "opentelemetry.proto.experimental.arrow.v1.ArrowMetricsService";
/// Fully-qualified gRPC service name of the legacy mixed stream.
pub const MIXED_SERVICE_NAME: &str =
    "opentelemetry.proto.experimental.arrow.v1.ArrowStreamService";

impl StreamMethod {
    /// The method to use for a given signal when separate-signal streams are
    /// in use.
    #[must_use]
    pub const fn for_signal(signal: SignalType) -> StreamMethod {
        match signal {
            SignalType::Traces => StreamMethod::Traces,
            SignalType::Logs => StreamMethod::Logs,
            SignalType::Metrics => StreamMethod::Metrics,
        }
    }

    /// The signal this method is restricted to, `None` for the mixed stream.
    #[must_use]
    pub const fn expected_signal(&self) -> Option<SignalType> {
        match self {
            StreamMethod::Traces => Some(SignalType::Traces),
            StreamMethod::Logs => Some(SignalType::Logs),
            StreamMethod::Metrics => Some(SignalType::Metrics),
            StreamMethod::Mixed => None,
        }
    }

    /// Fully-qualified gRPC service name.
    #[must_use]
    pub const fn service_name(&self) -> &'static str {
        match self {
            StreamMethod::Traces => TRACES_SERVICE_NAME,
            StreamMethod::Logs => LOGS_SERVICE_NAME,
            StreamMethod::Metrics => METRICS_SERVICE_NAME,
            StreamMethod::Mixed => MIXED_SERVICE_NAME,
        }
    }

    /// Bare method name.
    #[must_use]
    pub const fn method_name(&self) -> &'static str {
        match self {
            StreamMethod::Traces => "ArrowTraces",
            StreamMethod::Logs => "ArrowLogs",
            StreamMethod::Metrics => "ArrowMetrics",
            StreamMethod::Mixed => "ArrowStream",
        }
    }

    /// HTTP/2 request path of the method.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        match self {
            StreamMethod::Traces => {
                "/opentelemetry.proto.experimental.arrow.v1.ArrowTracesService/ArrowTraces"
            }
            StreamMethod::Logs => {
                "/opentelemetry.proto.experimental.arrow.v1.ArrowLogsService/ArrowLogs"
            }
            StreamMethod::Metrics => {
                "/opentelemetry.proto.experimental.arrow.v1.ArrowMetricsService/ArrowMetrics"
            }
            StreamMethod::Mixed => {
                "/opentelemetry.proto.experimental.arrow.v1.ArrowStreamService/ArrowStream"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::opentelemetry::experimental::arrow::v1::ArrowPayload;

    #[test]
    fn signal_of_batch_follows_first_payload() {
        let batch = BatchArrowRecords {
            batch_id: 0,
            arrow_payloads: vec![
                ArrowPayload {
                    schema_id: "spans".into(),
                    r#type: ArrowPayloadType::Spans as i32,
                    record: vec![],
                },
                ArrowPayload {
                    schema_id: "resource-attrs".into(),
                    r#type: ArrowPayloadType::ResourceAttrs as i32,
                    record: vec![],
                },
            ],
            headers: vec![],
        };
        assert_eq!(SignalType::of_batch(&batch), Some(SignalType::Traces));
    }

    #[test]
    fn signal_of_empty_or_unknown_batch_is_none() {
        let empty = BatchArrowRecords::default();
        assert_eq!(SignalType::of_batch(&empty), None);

        let unknown = BatchArrowRecords {
            batch_id: 0,
            arrow_payloads: vec![ArrowPayload {
                schema_id: String::new(),
                r#type: ArrowPayloadType::Unknown as i32,
                record: vec![],
            }],
            headers: vec![],
        };
        assert_eq!(SignalType::of_batch(&unknown), None);
    }

    #[test]
    fn method_paths_are_consistent_with_service_names() {
        for method in [
            StreamMethod::Traces,
            StreamMethod::Logs,
            StreamMethod::Metrics,
            StreamMethod::Mixed,
        ] {
            let expected = format!("/{}/{}", method.service_name(), method.method_name());
            assert_eq!(method.path(), expected);
        }
    }
}
