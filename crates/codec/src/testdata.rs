// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic pdata generators for tests and benchmarks.

use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{
    AnyValue, ArrayValue, InstrumentationScope, KeyValue,
};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, LogsData, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::{
    Gauge, Metric, MetricsData, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum, metric,
    number_data_point,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::span::{Event, Link};
use opentelemetry_proto::tonic::trace::v1::{
    ResourceSpans, ScopeSpans, Span, Status, TracesData,
};

fn str_attr(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_owned(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.to_owned())),
        }),
    }
}

fn int_attr(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_owned(),
        value: Some(AnyValue {
            value: Some(Value::IntValue(value)),
        }),
    }
}

fn test_resource() -> Resource {
    Resource {
        attributes: vec![
            str_attr("service.name", "otap-link-test"),
            KeyValue {
                key: "host.tags".to_owned(),
                value: Some(AnyValue {
                    value: Some(Value::ArrayValue(ArrayValue {
                        values: vec![
                            AnyValue {
                                value: Some(Value::StringValue("edge".to_owned())),
                            },
                            AnyValue {
                                value: Some(Value::StringValue("canary".to_owned())),
                            },
                        ],
                    })),
                }),
            },
        ],
        dropped_attributes_count: 0,
        ..Default::default()
    }
}

fn test_scope(name: &str) -> InstrumentationScope {
    InstrumentationScope {
        name: name.to_owned(),
        version: "0.1.0".to_owned(),
        attributes: vec![str_attr("scope.kind", "test")],
        dropped_attributes_count: 0,
    }
}

/// A traces request with `num_spans` spans under one resource and scope;
/// every span carries attributes, one event, and one link.
#[must_use]
pub fn generate_traces(num_spans: usize) -> TracesData {
    let spans = (0..num_spans)
        .map(|i| {
            let n = i as u8;
            Span {
                trace_id: vec![n.wrapping_add(1); 16],
                span_id: vec![n.wrapping_add(2); 8],
                trace_state: String::new(),
                parent_span_id: if i == 0 {
                    Vec::new()
                } else {
                    vec![n.wrapping_add(1); 8]
                },
                flags: 0,
                name: format!("operation-{i}"),
                kind: 2,
                start_time_unix_nano: 1_000_000_000 + i as u64,
                end_time_unix_nano: 2_000_000_000 + i as u64,
                attributes: vec![str_attr("peer.service", "backend"), int_attr("attempt", i as i64)],
                dropped_attributes_count: 0,
                events: vec![Event {
                    time_unix_nano: 1_500_000_000 + i as u64,
                    name: "acquired".to_owned(),
                    attributes: vec![int_attr("lock.id", i as i64)],
                    dropped_attributes_count: 0,
                }],
                dropped_events_count: 0,
                links: vec![Link {
                    trace_id: vec![n.wrapping_add(3); 16],
                    span_id: vec![n.wrapping_add(4); 8],
                    trace_state: String::new(),
                    attributes: vec![str_attr("link.kind", "follows-from")],
                    dropped_attributes_count: 0,
                    flags: 0,
                }],
                dropped_links_count: 0,
                status: Some(Status {
                    message: String::new(),
                    code: 1,
                }),
            }
        })
        .collect();

    TracesData {
        resource_spans: vec![ResourceSpans {
            resource: Some(test_resource()),
            scope_spans: vec![ScopeSpans {
                scope: Some(test_scope("tracer")),
                spans,
                schema_url: "https://opentelemetry.io/schemas/1.4.0".to_owned(),
            }],
            schema_url: "https://opentelemetry.io/schemas/1.4.0".to_owned(),
        }],
    }
}

/// A logs request with `num_records` log records under one resource/scope.
#[must_use]
pub fn generate_logs(num_records: usize) -> LogsData {
    let log_records = (0..num_records)
        .map(|i| LogRecord {
            time_unix_nano: 3_000_000_000 + i as u64,
            observed_time_unix_nano: 3_000_000_100 + i as u64,
            severity_number: 9,
            severity_text: "INFO".to_owned(),
            body: Some(AnyValue {
                value: Some(Value::StringValue(format!("log body {i}"))),
            }),
            attributes: vec![str_attr("app", "server"), int_attr("instance_num", i as i64)],
            dropped_attributes_count: 0,
            flags: 0,
            trace_id: vec![(i as u8).wrapping_add(1); 16],
            span_id: vec![(i as u8).wrapping_add(2); 8],
            ..Default::default()
        })
        .collect();

    LogsData {
        resource_logs: vec![ResourceLogs {
            resource: Some(test_resource()),
            scope_logs: vec![ScopeLogs {
                scope: Some(test_scope("logger")),
                log_records,
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    }
}

/// A metrics request with one gauge and one sum, `num_points` data points
/// each.
#[must_use]
pub fn generate_metrics(num_points: usize) -> MetricsData {
    let gauge_points = (0..num_points)
        .map(|i| NumberDataPoint {
            attributes: vec![str_attr("state", "used")],
            start_time_unix_nano: 0,
            time_unix_nano: 4_000_000_000 + i as u64,
            value: Some(number_data_point::Value::AsDouble(0.25 * i as f64)),
            flags: 0,
            ..Default::default()
        })
        .collect();
    let sum_points = (0..num_points)
        .map(|i| NumberDataPoint {
            attributes: vec![str_attr("method", "GET")],
            start_time_unix_nano: 4_000_000_000,
            time_unix_nano: 4_000_000_000 + i as u64,
            value: Some(number_data_point::Value::AsInt(i as i64)),
            flags: 0,
            ..Default::default()
        })
        .collect();

    MetricsData {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(test_resource()),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(test_scope("meter")),
                metrics: vec![
                    Metric {
                        name: "system.memory.utilization".to_owned(),
                        description: "Memory utilization".to_owned(),
                        unit: "1".to_owned(),
                        data: Some(metric::Data::Gauge(Gauge {
                            data_points: gauge_points,
                        })),
                        ..Default::default()
                    },
                    Metric {
                        name: "http.server.request.count".to_owned(),
                        description: String::new(),
                        unit: "{request}".to_owned(),
                        data: Some(metric::Data::Sum(Sum {
                            data_points: sum_points,
                            aggregation_temporality: 2,
                            is_monotonic: true,
                        })),
                        ..Default::default()
                    },
                ],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    }
}
