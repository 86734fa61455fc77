// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Decoding of Arrow IPC payload records back into pdata.
//!
//! Decoding canonicalizes: rows are regrouped under resources and scopes in
//! first-appearance order, so structurally-identical inputs decode to the
//! same shape regardless of how the encoder interleaved them.

use crate::arrays::{
    bin_col, bool_col, f64_col, fsb_col, i32_col, i64_col, opt_bytes, opt_string, str_col, ts_col,
    u8_col, u16_col, u32_col,
};
use crate::attrs::{ValueColumns, collect_attrs};
use crate::error::Error;
use crate::pdata::SignalData;
use crate::schema::{MetricKind, ValueType, consts};
use arrow::array::{Array, RecordBatch};
use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
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
use otap_link_protocol::SignalType;
use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::{
    ArrowPayloadType, BatchArrowRecords,
};
use std::collections::HashMap;
use std::io::Cursor;

/// Decodes [`BatchArrowRecords`] back into pdata; one per receiver stream.
#[derive(Default)]
pub struct Consumer {}

impl Consumer {
    /// A fresh consumer for one inbound stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one batch, taking ownership of its payloads.
    ///
    /// The signal is deduced from the first payload; a batch mixing signals
    /// is rejected.
    pub fn consume(&mut self, bar: &mut BatchArrowRecords) -> Result<SignalData, Error> {
        let payloads = std::mem::take(&mut bar.arrow_payloads);
        let first = payloads.first().ok_or(Error::EmptyBatch)?;
        let first_type = ArrowPayloadType::try_from(first.r#type)
            .map_err(|_| Error::UnsupportedPayloadType(first.r#type))?;
        let signal =
            SignalType::of_payload(first_type).ok_or(Error::UnsupportedPayloadType(first.r#type))?;

        let mut records: HashMap<ArrowPayloadType, RecordBatch> = HashMap::new();
        for payload in payloads {
            let payload_type = ArrowPayloadType::try_from(payload.r#type)
                .map_err(|_| Error::UnsupportedPayloadType(payload.r#type))?;
            if let Some(payload_signal) = SignalType::of_payload(payload_type) {
                if payload_signal != signal {
                    return Err(Error::MixedSignalBatch);
                }
            }
            let batch = read_ipc(&payload.record, payload_type)?;
            _ = records.insert(payload_type, batch);
        }

        match signal {
            SignalType::Traces => decode_traces(&records).map(SignalData::Traces),
            SignalType::Logs => decode_logs(&records).map(SignalData::Logs),
            SignalType::Metrics => decode_metrics(&records).map(SignalData::Metrics),
        }
    }
}

fn read_ipc(bytes: &[u8], payload_type: ArrowPayloadType) -> Result<RecordBatch, Error> {
    let mut reader = arrow_ipc::reader::StreamReader::try_new(Cursor::new(bytes), None)?;
    reader
        .next()
        .ok_or(Error::MissingRecordBatch(payload_type))?
        .map_err(Error::from)
}

/// Reads the denormalized resource/scope identity columns of a main record.
struct EntityReader<'a> {
    resource_id: &'a arrow::array::UInt16Array,
    resource_schema_url: &'a arrow::array::StringArray,
    resource_dropped: &'a arrow::array::UInt32Array,
    scope_id: &'a arrow::array::UInt16Array,
    scope_name: &'a arrow::array::StringArray,
    scope_version: &'a arrow::array::StringArray,
    scope_dropped: &'a arrow::array::UInt32Array,
    scope_schema_url: &'a arrow::array::StringArray,
}

impl<'a> EntityReader<'a> {
    fn new(batch: &'a RecordBatch, payload: ArrowPayloadType) -> Result<Self, Error> {
        Ok(Self {
            resource_id: u16_col(batch, payload, consts::RESOURCE_ID)?,
            resource_schema_url: str_col(batch, payload, consts::RESOURCE_SCHEMA_URL)?,
            resource_dropped: u32_col(batch, payload, consts::RESOURCE_DROPPED_ATTRS)?,
            scope_id: u16_col(batch, payload, consts::SCOPE_ID)?,
            scope_name: str_col(batch, payload, consts::SCOPE_NAME)?,
            scope_version: str_col(batch, payload, consts::SCOPE_VERSION)?,
            scope_dropped: u32_col(batch, payload, consts::SCOPE_DROPPED_ATTRS)?,
            scope_schema_url: str_col(batch, payload, consts::SCOPE_SCHEMA_URL)?,
        })
    }

    fn resource(&self, row: usize, attrs: &HashMap<u16, Vec<opentelemetry_proto::tonic::common::v1::KeyValue>>) -> (Resource, String) {
        let resource_id = self.resource_id.value(row);
        (
            Resource {
                attributes: attrs.get(&resource_id).cloned().unwrap_or_default(),
                dropped_attributes_count: self.resource_dropped.value(row),
                ..Default::default()
            },
            self.resource_schema_url.value(row).to_owned(),
        )
    }

    fn scope(&self, row: usize, attrs: &HashMap<u16, Vec<opentelemetry_proto::tonic::common::v1::KeyValue>>) -> (InstrumentationScope, String) {
        let scope_id = self.scope_id.value(row);
        (
            InstrumentationScope {
                name: self.scope_name.value(row).to_owned(),
                version: self.scope_version.value(row).to_owned(),
                attributes: attrs.get(&scope_id).cloned().unwrap_or_default(),
                dropped_attributes_count: self.scope_dropped.value(row),
            },
            self.scope_schema_url.value(row).to_owned(),
        )
    }
}

/// First-appearance-order grouping of rows into resource/scope subtrees.
struct EntityGrouper {
    resource_index: HashMap<u16, usize>,
    scope_index: HashMap<u16, (usize, usize)>,
}

impl EntityGrouper {
    fn new() -> Self {
        Self {
            resource_index: HashMap::new(),
            scope_index: HashMap::new(),
        }
    }

    fn resource_slot(
        &mut self,
        resource_id: u16,
        len: usize,
    ) -> (usize, bool) {
        match self.resource_index.get(&resource_id) {
            Some(&idx) => (idx, false),
            None => {
                _ = self.resource_index.insert(resource_id, len);
                (len, true)
            }
        }
    }

    fn scope_slot(&mut self, scope_id: u16, resource_idx: usize, len: usize) -> (usize, bool) {
        match self.scope_index.get(&scope_id) {
            Some(&(_, idx)) => (idx, false),
            None => {
                _ = self.scope_index.insert(scope_id, (resource_idx, len));
                (len, true)
            }
        }
    }
}

fn decode_traces(records: &HashMap<ArrowPayloadType, RecordBatch>) -> Result<TracesData, Error> {
    let payload = ArrowPayloadType::Spans;
    let spans = records
        .get(&payload)
        .ok_or(Error::MissingRecordBatch(payload))?;

    let resource_attrs = collect_attrs(
        records.get(&ArrowPayloadType::ResourceAttrs),
        ArrowPayloadType::ResourceAttrs,
    )?;
    let scope_attrs = collect_attrs(
        records.get(&ArrowPayloadType::ScopeAttrs),
        ArrowPayloadType::ScopeAttrs,
    )?;
    let mut span_attrs = collect_attrs(
        records.get(&ArrowPayloadType::SpanAttrs),
        ArrowPayloadType::SpanAttrs,
    )?;
    let mut event_attrs = collect_attrs(
        records.get(&ArrowPayloadType::SpanEventAttrs),
        ArrowPayloadType::SpanEventAttrs,
    )?;
    let mut link_attrs = collect_attrs(
        records.get(&ArrowPayloadType::SpanLinkAttrs),
        ArrowPayloadType::SpanLinkAttrs,
    )?;

    let mut events_by_span: HashMap<u16, Vec<Event>> = HashMap::new();
    if let Some(batch) = records.get(&ArrowPayloadType::SpanEvents) {
        let p = ArrowPayloadType::SpanEvents;
        let ids = u16_col(batch, p, consts::ID)?;
        let parents = u16_col(batch, p, consts::PARENT_ID)?;
        let times = ts_col(batch, p, consts::TIME_UNIX_NANO)?;
        let names = str_col(batch, p, consts::NAME)?;
        let dropped = u32_col(batch, p, consts::DROPPED_ATTRS)?;
        for row in 0..batch.num_rows() {
            let event = Event {
                time_unix_nano: times.value(row) as u64,
                name: names.value(row).to_owned(),
                attributes: event_attrs.remove(&ids.value(row)).unwrap_or_default(),
                dropped_attributes_count: dropped.value(row),
            };
            events_by_span.entry(parents.value(row)).or_default().push(event);
        }
    }

    let mut links_by_span: HashMap<u16, Vec<Link>> = HashMap::new();
    if let Some(batch) = records.get(&ArrowPayloadType::SpanLinks) {
        let p = ArrowPayloadType::SpanLinks;
        let ids = u16_col(batch, p, consts::ID)?;
        let parents = u16_col(batch, p, consts::PARENT_ID)?;
        let trace_ids = fsb_col(batch, p, consts::TRACE_ID)?;
        let span_ids = fsb_col(batch, p, consts::SPAN_ID)?;
        let trace_states = str_col(batch, p, consts::TRACE_STATE)?;
        let flags = u32_col(batch, p, consts::FLAGS)?;
        let dropped = u32_col(batch, p, consts::DROPPED_ATTRS)?;
        for row in 0..batch.num_rows() {
            let link = Link {
                trace_id: trace_ids.value(row).to_vec(),
                span_id: span_ids.value(row).to_vec(),
                trace_state: trace_states.value(row).to_owned(),
                attributes: link_attrs.remove(&ids.value(row)).unwrap_or_default(),
                dropped_attributes_count: dropped.value(row),
                flags: flags.value(row),
            };
            links_by_span.entry(parents.value(row)).or_default().push(link);
        }
    }

    let entities = EntityReader::new(spans, payload)?;
    let ids = u16_col(spans, payload, consts::ID)?;
    let trace_ids = fsb_col(spans, payload, consts::TRACE_ID)?;
    let span_ids = fsb_col(spans, payload, consts::SPAN_ID)?;
    let parent_span_ids = fsb_col(spans, payload, consts::PARENT_SPAN_ID)?;
    let trace_states = str_col(spans, payload, consts::TRACE_STATE)?;
    let names = str_col(spans, payload, consts::NAME)?;
    let kinds = i32_col(spans, payload, consts::KIND)?;
    let starts = ts_col(spans, payload, consts::START_TIME_UNIX_NANO)?;
    let ends = ts_col(spans, payload, consts::END_TIME_UNIX_NANO)?;
    let flags = u32_col(spans, payload, consts::FLAGS)?;
    let dropped_attrs = u32_col(spans, payload, consts::DROPPED_ATTRS)?;
    let dropped_events = u32_col(spans, payload, consts::DROPPED_EVENTS)?;
    let dropped_links = u32_col(spans, payload, consts::DROPPED_LINKS)?;
    let status_codes = i32_col(spans, payload, consts::STATUS_CODE)?;
    let status_messages = str_col(spans, payload, consts::STATUS_MESSAGE)?;

    let mut traces = TracesData::default();
    let mut grouper = EntityGrouper::new();

    for row in 0..spans.num_rows() {
        let (resource_idx, new_resource) = grouper.resource_slot(
            entities.resource_id.value(row),
            traces.resource_spans.len(),
        );
        if new_resource {
            let (resource, schema_url) = entities.resource(row, &resource_attrs);
            traces.resource_spans.push(ResourceSpans {
                resource: Some(resource),
                scope_spans: Vec::new(),
                schema_url,
            });
        }
        let (scope_idx, new_scope) = grouper.scope_slot(
            entities.scope_id.value(row),
            resource_idx,
            traces.resource_spans[resource_idx].scope_spans.len(),
        );
        if new_scope {
            let (scope, schema_url) = entities.scope(row, &scope_attrs);
            traces.resource_spans[resource_idx]
                .scope_spans
                .push(ScopeSpans {
                    scope: Some(scope),
                    spans: Vec::new(),
                    schema_url,
                });
        }

        let id = ids.value(row);
        let status = if status_codes.is_null(row) {
            None
        } else {
            Some(Status {
                message: opt_string(status_messages, row),
                code: status_codes.value(row),
            })
        };
        let span = Span {
            trace_id: trace_ids.value(row).to_vec(),
            span_id: span_ids.value(row).to_vec(),
            trace_state: trace_states.value(row).to_owned(),
            parent_span_id: opt_bytes(parent_span_ids, row),
            flags: flags.value(row),
            name: names.value(row).to_owned(),
            kind: kinds.value(row),
            start_time_unix_nano: starts.value(row) as u64,
            end_time_unix_nano: ends.value(row) as u64,
            attributes: span_attrs.remove(&id).unwrap_or_default(),
            dropped_attributes_count: dropped_attrs.value(row),
            events: events_by_span.remove(&id).unwrap_or_default(),
            dropped_events_count: dropped_events.value(row),
            links: links_by_span.remove(&id).unwrap_or_default(),
            dropped_links_count: dropped_links.value(row),
            status,
        };
        traces.resource_spans[resource_idx].scope_spans[scope_idx]
            .spans
            .push(span);
    }

    Ok(traces)
}

fn decode_logs(records: &HashMap<ArrowPayloadType, RecordBatch>) -> Result<LogsData, Error> {
    let payload = ArrowPayloadType::Logs;
    let logs = records
        .get(&payload)
        .ok_or(Error::MissingRecordBatch(payload))?;

    let resource_attrs = collect_attrs(
        records.get(&ArrowPayloadType::ResourceAttrs),
        ArrowPayloadType::ResourceAttrs,
    )?;
    let scope_attrs = collect_attrs(
        records.get(&ArrowPayloadType::ScopeAttrs),
        ArrowPayloadType::ScopeAttrs,
    )?;
    let mut log_attrs = collect_attrs(
        records.get(&ArrowPayloadType::LogAttrs),
        ArrowPayloadType::LogAttrs,
    )?;

    let entities = EntityReader::new(logs, payload)?;
    let ids = u16_col(logs, payload, consts::ID)?;
    let times = ts_col(logs, payload, consts::TIME_UNIX_NANO)?;
    let observed = ts_col(logs, payload, consts::OBSERVED_TIME_UNIX_NANO)?;
    let severity_numbers = i32_col(logs, payload, consts::SEVERITY_NUMBER)?;
    let severity_texts = str_col(logs, payload, consts::SEVERITY_TEXT)?;
    let event_names = str_col(logs, payload, consts::EVENT_NAME)?;
    let body_types = u8_col(logs, payload, consts::BODY_TYPE)?;
    let body_strs = str_col(logs, payload, consts::BODY_STR)?;
    let body_ints = i64_col(logs, payload, consts::BODY_INT)?;
    let body_doubles = f64_col(logs, payload, consts::BODY_DOUBLE)?;
    let body_bools = bool_col(logs, payload, consts::BODY_BOOL)?;
    let body_bytes = bin_col(logs, payload, consts::BODY_BYTES)?;
    let body_sers = bin_col(logs, payload, consts::BODY_SER)?;
    let dropped_attrs = u32_col(logs, payload, consts::DROPPED_ATTRS)?;
    let flags = u32_col(logs, payload, consts::FLAGS)?;
    let trace_ids = fsb_col(logs, payload, consts::TRACE_ID)?;
    let span_ids = fsb_col(logs, payload, consts::SPAN_ID)?;

    let mut logs_data = LogsData::default();
    let mut grouper = EntityGrouper::new();

    for row in 0..logs.num_rows() {
        let (resource_idx, new_resource) = grouper.resource_slot(
            entities.resource_id.value(row),
            logs_data.resource_logs.len(),
        );
        if new_resource {
            let (resource, schema_url) = entities.resource(row, &resource_attrs);
            logs_data.resource_logs.push(ResourceLogs {
                resource: Some(resource),
                scope_logs: Vec::new(),
                schema_url,
            });
        }
        let (scope_idx, new_scope) = grouper.scope_slot(
            entities.scope_id.value(row),
            resource_idx,
            logs_data.resource_logs[resource_idx].scope_logs.len(),
        );
        if new_scope {
            let (scope, schema_url) = entities.scope(row, &scope_attrs);
            logs_data.resource_logs[resource_idx]
                .scope_logs
                .push(ScopeLogs {
                    scope: Some(scope),
                    log_records: Vec::new(),
                    schema_url,
                });
        }

        let id = ids.value(row);
        let body = ValueColumns {
            value_type: ValueType::from_u8(body_types.value(row)),
            str: (!body_strs.is_null(row)).then(|| body_strs.value(row).to_owned()),
            int: (!body_ints.is_null(row)).then(|| body_ints.value(row)),
            double: (!body_doubles.is_null(row)).then(|| body_doubles.value(row)),
            bool: (!body_bools.is_null(row)).then(|| body_bools.value(row)),
            bytes: (!body_bytes.is_null(row)).then(|| body_bytes.value(row).to_vec()),
            ser: (!body_sers.is_null(row)).then(|| body_sers.value(row).to_vec()),
        }
        .join()?;

        let record = LogRecord {
            time_unix_nano: times.value(row) as u64,
            observed_time_unix_nano: observed.value(row) as u64,
            severity_number: severity_numbers.value(row),
            severity_text: severity_texts.value(row).to_owned(),
            body,
            attributes: log_attrs.remove(&id).unwrap_or_default(),
            dropped_attributes_count: dropped_attrs.value(row),
            flags: flags.value(row),
            trace_id: opt_bytes(trace_ids, row),
            span_id: opt_bytes(span_ids, row),
            event_name: event_names.value(row).to_owned(),
            ..Default::default()
        };
        logs_data.resource_logs[resource_idx].scope_logs[scope_idx]
            .log_records
            .push(record);
    }

    Ok(logs_data)
}

fn decode_metrics(records: &HashMap<ArrowPayloadType, RecordBatch>) -> Result<MetricsData, Error> {
    let payload = ArrowPayloadType::UnivariateMetrics;
    let metrics = records
        .get(&payload)
        .ok_or(Error::MissingRecordBatch(payload))?;

    let resource_attrs = collect_attrs(
        records.get(&ArrowPayloadType::ResourceAttrs),
        ArrowPayloadType::ResourceAttrs,
    )?;
    let scope_attrs = collect_attrs(
        records.get(&ArrowPayloadType::ScopeAttrs),
        ArrowPayloadType::ScopeAttrs,
    )?;
    let mut dp_attrs = collect_attrs(
        records.get(&ArrowPayloadType::NumberDpAttrs),
        ArrowPayloadType::NumberDpAttrs,
    )?;

    // Data points grouped under their metric, in row order.
    let mut points_by_metric: HashMap<u16, Vec<NumberDataPoint>> = HashMap::new();
    if let Some(batch) = records.get(&ArrowPayloadType::NumberDataPoints) {
        let p = ArrowPayloadType::NumberDataPoints;
        let ids = u16_col(batch, p, consts::ID)?;
        let parents = u16_col(batch, p, consts::PARENT_ID)?;
        let starts = ts_col(batch, p, consts::START_TIME_UNIX_NANO)?;
        let times = ts_col(batch, p, consts::TIME_UNIX_NANO)?;
        let value_types = u8_col(batch, p, consts::VALUE_TYPE)?;
        let ints = i64_col(batch, p, consts::INT_VALUE)?;
        let doubles = f64_col(batch, p, consts::DOUBLE_VALUE)?;
        let flags = u32_col(batch, p, consts::FLAGS)?;
        for row in 0..batch.num_rows() {
            let value = match ValueType::from_u8(value_types.value(row)) {
                ValueType::Int => Some(number_data_point::Value::AsInt(ints.value(row))),
                ValueType::Double => Some(number_data_point::Value::AsDouble(doubles.value(row))),
                _ => None,
            };
            let point = NumberDataPoint {
                attributes: dp_attrs.remove(&ids.value(row)).unwrap_or_default(),
                start_time_unix_nano: starts.value(row) as u64,
                time_unix_nano: times.value(row) as u64,
                flags: flags.value(row),
                value,
                ..Default::default()
            };
            points_by_metric.entry(parents.value(row)).or_default().push(point);
        }
    }

    let entities = EntityReader::new(metrics, payload)?;
    let ids = u16_col(metrics, payload, consts::ID)?;
    let names = str_col(metrics, payload, consts::METRIC_NAME)?;
    let descriptions = str_col(metrics, payload, consts::DESCRIPTION)?;
    let units = str_col(metrics, payload, consts::UNIT)?;
    let metric_types = u8_col(metrics, payload, consts::METRIC_TYPE)?;
    let temporalities = i32_col(metrics, payload, consts::AGGREGATION_TEMPORALITY)?;
    let monotonics = bool_col(metrics, payload, consts::IS_MONOTONIC)?;

    let mut metrics_data = MetricsData::default();
    let mut grouper = EntityGrouper::new();

    for row in 0..metrics.num_rows() {
        let (resource_idx, new_resource) = grouper.resource_slot(
            entities.resource_id.value(row),
            metrics_data.resource_metrics.len(),
        );
        if new_resource {
            let (resource, schema_url) = entities.resource(row, &resource_attrs);
            metrics_data.resource_metrics.push(ResourceMetrics {
                resource: Some(resource),
                scope_metrics: Vec::new(),
                schema_url,
            });
        }
        let (scope_idx, new_scope) = grouper.scope_slot(
            entities.scope_id.value(row),
            resource_idx,
            metrics_data.resource_metrics[resource_idx]
                .scope_metrics
                .len(),
        );
        if new_scope {
            let (scope, schema_url) = entities.scope(row, &scope_attrs);
            metrics_data.resource_metrics[resource_idx]
                .scope_metrics
                .push(ScopeMetrics {
                    scope: Some(scope),
                    metrics: Vec::new(),
                    schema_url,
                });
        }

        let id = ids.value(row);
        let data_points = points_by_metric.remove(&id).unwrap_or_default();
        let data = match metric_types.value(row) {
            k if k == MetricKind::Gauge as u8 => Some(metric::Data::Gauge(Gauge { data_points })),
            k if k == MetricKind::Sum as u8 => Some(metric::Data::Sum(Sum {
                data_points,
                aggregation_temporality: temporalities.value(row),
                is_monotonic: monotonics.value(row),
            })),
            _ => None,
        };
        let m = Metric {
            name: names.value(row).to_owned(),
            description: descriptions.value(row).to_owned(),
            unit: units.value(row).to_owned(),
            data,
            ..Default::default()
        };
        metrics_data.resource_metrics[resource_idx].scope_metrics[scope_idx]
            .metrics
            .push(m);
    }

    Ok(metrics_data)
}
