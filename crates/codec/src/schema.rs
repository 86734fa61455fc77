// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Column layout of the Arrow payloads.
//!
//! Each signal is encoded as one main record (spans, log records, metric
//! descriptors plus their data points) with resource/scope identity
//! denormalized onto every row, and one attribute record per attribute scope
//! keyed by a 16-bit parent id. Nested attribute values (arrays, kvlists)
//! travel CBOR-serialized in the `ser` column.

use serde::{Deserialize, Serialize};

/// Column names shared by the encoder and decoder.
pub mod consts {
    /// Row id within the payload, parent key for child payloads.
    pub const ID: &str = "id";
    /// Child-to-parent reference in attribute and child payloads.
    pub const PARENT_ID: &str = "parent_id";

    /// Resource identity, denormalized per row.
    pub const RESOURCE_ID: &str = "resource_id";
    /// Resource schema URL.
    pub const RESOURCE_SCHEMA_URL: &str = "resource_schema_url";
    /// Dropped attribute count of the resource.
    pub const RESOURCE_DROPPED_ATTRS: &str = "resource_dropped_attributes_count";

    /// Scope identity, denormalized per row.
    pub const SCOPE_ID: &str = "scope_id";
    /// Instrumentation scope name.
    pub const SCOPE_NAME: &str = "scope_name";
    /// Instrumentation scope version.
    pub const SCOPE_VERSION: &str = "scope_version";
    /// Dropped attribute count of the scope.
    pub const SCOPE_DROPPED_ATTRS: &str = "scope_dropped_attributes_count";
    /// Scope schema URL.
    pub const SCOPE_SCHEMA_URL: &str = "scope_schema_url";

    /// W3C trace id, 16 bytes.
    pub const TRACE_ID: &str = "trace_id";
    /// W3C span id, 8 bytes.
    pub const SPAN_ID: &str = "span_id";
    /// Parent span id, 8 bytes.
    pub const PARENT_SPAN_ID: &str = "parent_span_id";
    /// W3C trace state.
    pub const TRACE_STATE: &str = "trace_state";
    /// Span or event name.
    pub const NAME: &str = "name";
    /// Span kind.
    pub const KIND: &str = "kind";
    /// Start timestamp, nanoseconds.
    pub const START_TIME_UNIX_NANO: &str = "start_time_unix_nano";
    /// End timestamp, nanoseconds.
    pub const END_TIME_UNIX_NANO: &str = "end_time_unix_nano";
    /// Event / point timestamp, nanoseconds.
    pub const TIME_UNIX_NANO: &str = "time_unix_nano";
    /// Observed timestamp, nanoseconds.
    pub const OBSERVED_TIME_UNIX_NANO: &str = "observed_time_unix_nano";
    /// OTLP flags.
    pub const FLAGS: &str = "flags";
    /// Dropped attribute count.
    pub const DROPPED_ATTRS: &str = "dropped_attributes_count";
    /// Dropped span event count.
    pub const DROPPED_EVENTS: &str = "dropped_events_count";
    /// Dropped span link count.
    pub const DROPPED_LINKS: &str = "dropped_links_count";
    /// Span status code.
    pub const STATUS_CODE: &str = "status_code";
    /// Span status message.
    pub const STATUS_MESSAGE: &str = "status_message";

    /// Log severity number.
    pub const SEVERITY_NUMBER: &str = "severity_number";
    /// Log severity text.
    pub const SEVERITY_TEXT: &str = "severity_text";
    /// Log event name.
    pub const EVENT_NAME: &str = "event_name";
    /// Log body discriminator, see [`super::ValueType`].
    pub const BODY_TYPE: &str = "body_type";
    /// Log body, string variant.
    pub const BODY_STR: &str = "body_str";
    /// Log body, integer variant.
    pub const BODY_INT: &str = "body_int";
    /// Log body, double variant.
    pub const BODY_DOUBLE: &str = "body_double";
    /// Log body, bool variant.
    pub const BODY_BOOL: &str = "body_bool";
    /// Log body, bytes variant.
    pub const BODY_BYTES: &str = "body_bytes";
    /// Log body, serialized variant.
    pub const BODY_SER: &str = "body_ser";

    /// Metric name.
    pub const METRIC_NAME: &str = "name";
    /// Metric description.
    pub const DESCRIPTION: &str = "description";
    /// Metric unit.
    pub const UNIT: &str = "unit";
    /// Metric kind discriminator, see [`super::MetricKind`].
    pub const METRIC_TYPE: &str = "metric_type";
    /// Sum aggregation temporality.
    pub const AGGREGATION_TEMPORALITY: &str = "aggregation_temporality";
    /// Sum monotonicity.
    pub const IS_MONOTONIC: &str = "is_monotonic";
    /// Number data point discriminator, see [`super::ValueType`].
    pub const VALUE_TYPE: &str = "value_type";
    /// Number data point, integer variant.
    pub const INT_VALUE: &str = "int_value";
    /// Number data point, double variant.
    pub const DOUBLE_VALUE: &str = "double_value";

    /// Attribute key.
    pub const ATTR_KEY: &str = "key";
    /// Attribute value, string variant.
    pub const ATTR_STR: &str = "str";
    /// Attribute value, integer variant.
    pub const ATTR_INT: &str = "int";
    /// Attribute value, double variant.
    pub const ATTR_DOUBLE: &str = "double";
    /// Attribute value, bool variant.
    pub const ATTR_BOOL: &str = "bool";
    /// Attribute value, bytes variant.
    pub const ATTR_BYTES: &str = "bytes";
    /// Attribute value, CBOR-serialized variant (arrays, kvlists).
    pub const ATTR_SER: &str = "ser";
}

/// Discriminator for typed value columns (attributes, log bodies, number
/// data points).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    /// No value set.
    Empty = 0,
    /// String value.
    Str = 1,
    /// Integer value.
    Int = 2,
    /// Double value.
    Double = 3,
    /// Bool value.
    Bool = 4,
    /// Bytes value.
    Bytes = 5,
    /// CBOR-serialized nested value.
    Ser = 6,
}

impl ValueType {
    /// Decode the discriminator, mapping unknown values to `Empty`.
    #[must_use]
    pub const fn from_u8(v: u8) -> ValueType {
        match v {
            1 => ValueType::Str,
            2 => ValueType::Int,
            3 => ValueType::Double,
            4 => ValueType::Bool,
            5 => ValueType::Bytes,
            6 => ValueType::Ser,
            _ => ValueType::Empty,
        }
    }
}

/// Discriminator for the metric descriptor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetricKind {
    /// Gauge metric.
    Gauge = 1,
    /// Sum metric.
    Sum = 2,
}

/// Arrow-internal (IPC buffer) compression of the payload records.
///
/// `None` relies on gRPC transport compression alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadCompression {
    /// No Arrow-internal compression.
    #[default]
    None,
    /// Zstd-compressed IPC buffers.
    Zstd,
    /// LZ4-compressed IPC buffers.
    Lz4,
}

impl PayloadCompression {
    pub(crate) fn to_ipc(self) -> Option<arrow_ipc::CompressionType> {
        match self {
            PayloadCompression::None => None,
            PayloadCompression::Zstd => Some(arrow_ipc::CompressionType::ZSTD),
            PayloadCompression::Lz4 => Some(arrow_ipc::CompressionType::LZ4_FRAME),
        }
    }
}

/// Stable schema id carried in each payload; bumped when the layout changes.
#[must_use]
pub const fn schema_id(
    payload_type: otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::ArrowPayloadType,
) -> &'static str {
    use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::ArrowPayloadType;
    match payload_type {
        ArrowPayloadType::ResourceAttrs => "resource_attrs:1",
        ArrowPayloadType::ScopeAttrs => "scope_attrs:1",
        ArrowPayloadType::UnivariateMetrics => "univariate_metrics:1",
        ArrowPayloadType::NumberDataPoints => "number_data_points:1",
        ArrowPayloadType::NumberDpAttrs => "number_dp_attrs:1",
        ArrowPayloadType::Logs => "logs:1",
        ArrowPayloadType::LogAttrs => "log_attrs:1",
        ArrowPayloadType::Spans => "spans:1",
        ArrowPayloadType::SpanAttrs => "span_attrs:1",
        ArrowPayloadType::SpanEvents => "span_events:1",
        ArrowPayloadType::SpanLinks => "span_links:1",
        ArrowPayloadType::SpanEventAttrs => "span_event_attrs:1",
        ArrowPayloadType::SpanLinkAttrs => "span_link_attrs:1",
        ArrowPayloadType::Unknown => "unknown:1",
    }
}
