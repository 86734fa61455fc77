// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! The tagged pdata container moved through the transport.
//!
//! The exporter's public boundary accepts one of the three OTLP top-level
//! messages; tagging them in an enum replaces the runtime type dispatch a
//! dynamically-typed pipeline would do.

use opentelemetry_proto::tonic::logs::v1::LogsData;
use opentelemetry_proto::tonic::metrics::v1::{MetricsData, metric};
use opentelemetry_proto::tonic::trace::v1::TracesData;
use otap_link_protocol::SignalType;
use prost::Message;

/// One request worth of telemetry, tagged by signal.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalData {
    /// Trace spans.
    Traces(TracesData),
    /// Log records.
    Logs(LogsData),
    /// Metric data points.
    Metrics(MetricsData),
}

impl SignalData {
    /// The signal this request carries.
    #[must_use]
    pub const fn signal_type(&self) -> SignalType {
        match self {
            SignalData::Traces(_) => SignalType::Traces,
            SignalData::Logs(_) => SignalType::Logs,
            SignalData::Metrics(_) => SignalType::Metrics,
        }
    }

    /// Number of telemetry items: spans, log records, or data points.
    #[must_use]
    pub fn item_count(&self) -> usize {
        match self {
            SignalData::Traces(td) => td
                .resource_spans
                .iter()
                .flat_map(|rs| &rs.scope_spans)
                .map(|ss| ss.spans.len())
                .sum(),
            SignalData::Logs(ld) => ld
                .resource_logs
                .iter()
                .flat_map(|rl| &rl.scope_logs)
                .map(|sl| sl.log_records.len())
                .sum(),
            SignalData::Metrics(md) => md
                .resource_metrics
                .iter()
                .flat_map(|rm| &rm.scope_metrics)
                .flat_map(|sm| &sm.metrics)
                .map(|m| match &m.data {
                    Some(metric::Data::Gauge(g)) => g.data_points.len(),
                    Some(metric::Data::Sum(s)) => s.data_points.len(),
                    Some(metric::Data::Histogram(h)) => h.data_points.len(),
                    Some(metric::Data::ExponentialHistogram(h)) => h.data_points.len(),
                    Some(metric::Data::Summary(s)) => s.data_points.len(),
                    None => 0,
                })
                .sum(),
        }
    }

    /// Canonical uncompressed size: the protobuf encoding length.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            SignalData::Traces(td) => td.encoded_len(),
            SignalData::Logs(ld) => ld.encoded_len(),
            SignalData::Metrics(md) => md.encoded_len(),
        }
    }
}

impl From<TracesData> for SignalData {
    fn from(value: TracesData) -> Self {
        SignalData::Traces(value)
    }
}

impl From<LogsData> for SignalData {
    fn from(value: LogsData) -> Self {
        SignalData::Logs(value)
    }
}

impl From<MetricsData> for SignalData {
    fn from(value: MetricsData) -> Self {
        SignalData::Metrics(value)
    }
}
