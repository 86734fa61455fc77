// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Encoding of pdata into Arrow IPC payload records.
//!
//! The [`Producer`] is single-owner per exporter stream: it assigns batch
//! ids from a monotonic counter, so ids are unique for the stream's
//! lifetime, and the Arrow IPC streams it emits restart with every gRPC
//! stream.

use crate::attrs::{AttrsBuilder, ValueColumns};
use crate::error::Error;
use crate::pdata::SignalData;
use crate::schema::{MetricKind, PayloadCompression, consts, schema_id};
use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, FixedSizeBinaryBuilder, Float64Builder, Int32Builder,
    Int64Builder, RecordBatch, StringBuilder, TimestampNanosecondBuilder, UInt8Builder,
    UInt16Builder, UInt32Builder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow_ipc::writer::{IpcWriteOptions, StreamWriter};
use opentelemetry_proto::tonic::logs::v1::LogsData;
use opentelemetry_proto::tonic::metrics::v1::{MetricsData, metric};
use opentelemetry_proto::tonic::trace::v1::TracesData;
use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::{
    ArrowPayload, ArrowPayloadType, BatchArrowRecords,
};
use std::sync::Arc;

/// Encodes pdata into [`BatchArrowRecords`]; one per exporter stream.
pub struct Producer {
    next_batch_id: i64,
    compression: PayloadCompression,
}

impl Default for Producer {
    fn default() -> Self {
        Self::new()
    }
}

impl Producer {
    /// A producer without Arrow-internal compression (gRPC compression is
    /// negotiated separately).
    #[must_use]
    pub fn new() -> Self {
        Self::with_compression(PayloadCompression::None)
    }

    /// A producer compressing IPC buffers with the given codec.
    #[must_use]
    pub fn with_compression(compression: PayloadCompression) -> Self {
        Self {
            next_batch_id: 0,
            compression,
        }
    }

    /// Encode one request. The main payload always leads so receivers can
    /// deduce the signal from the first payload.
    pub fn produce(&mut self, data: &SignalData) -> Result<BatchArrowRecords, Error> {
        let records = match data {
            SignalData::Traces(td) => encode_traces(td)?,
            SignalData::Logs(ld) => encode_logs(ld)?,
            SignalData::Metrics(md) => encode_metrics(md)?,
        };

        let mut arrow_payloads = Vec::with_capacity(records.len());
        for (payload_type, batch) in records {
            arrow_payloads.push(ArrowPayload {
                schema_id: schema_id(payload_type).to_owned(),
                r#type: payload_type as i32,
                record: write_ipc(&batch, self.compression)?,
            });
        }

        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        Ok(BatchArrowRecords {
            batch_id,
            arrow_payloads,
            headers: Vec::new(),
        })
    }
}

fn write_ipc(batch: &RecordBatch, compression: PayloadCompression) -> Result<Vec<u8>, Error> {
    let options = IpcWriteOptions::default().try_with_compression(compression.to_ipc())?;
    let schema = batch.schema();
    let mut writer = StreamWriter::try_new_with_options(Vec::new(), &schema, options)?;
    writer.write(batch)?;
    writer.finish()?;
    Ok(writer.into_inner()?)
}

fn id16(index: usize) -> Result<u16, Error> {
    u16::try_from(index).map_err(|_| Error::TooManyRows(index))
}

fn ts_field(name: &'static str, nullable: bool) -> Field {
    Field::new(
        name,
        DataType::Timestamp(TimeUnit::Nanosecond, None),
        nullable,
    )
}

/// Resource/scope identity columns, denormalized onto every main-record row.
struct EntityColumns {
    resource_id: UInt16Builder,
    resource_schema_url: StringBuilder,
    resource_dropped: UInt32Builder,
    scope_id: UInt16Builder,
    scope_name: StringBuilder,
    scope_version: StringBuilder,
    scope_dropped: UInt32Builder,
    scope_schema_url: StringBuilder,
}

struct EntityRow<'a> {
    resource_id: u16,
    resource_schema_url: &'a str,
    resource_dropped: u32,
    scope_id: u16,
    scope_name: &'a str,
    scope_version: &'a str,
    scope_dropped: u32,
    scope_schema_url: &'a str,
}

impl EntityColumns {
    fn new() -> Self {
        Self {
            resource_id: UInt16Builder::new(),
            resource_schema_url: StringBuilder::new(),
            resource_dropped: UInt32Builder::new(),
            scope_id: UInt16Builder::new(),
            scope_name: StringBuilder::new(),
            scope_version: StringBuilder::new(),
            scope_dropped: UInt32Builder::new(),
            scope_schema_url: StringBuilder::new(),
        }
    }

    fn append(&mut self, row: &EntityRow<'_>) {
        self.resource_id.append_value(row.resource_id);
        self.resource_schema_url.append_value(row.resource_schema_url);
        self.resource_dropped.append_value(row.resource_dropped);
        self.scope_id.append_value(row.scope_id);
        self.scope_name.append_value(row.scope_name);
        self.scope_version.append_value(row.scope_version);
        self.scope_dropped.append_value(row.scope_dropped);
        self.scope_schema_url.append_value(row.scope_schema_url);
    }

    fn fields() -> Vec<Field> {
        vec![
            Field::new(consts::RESOURCE_ID, DataType::UInt16, false),
            Field::new(consts::RESOURCE_SCHEMA_URL, DataType::Utf8, false),
            Field::new(consts::RESOURCE_DROPPED_ATTRS, DataType::UInt32, false),
            Field::new(consts::SCOPE_ID, DataType::UInt16, false),
            Field::new(consts::SCOPE_NAME, DataType::Utf8, false),
            Field::new(consts::SCOPE_VERSION, DataType::Utf8, false),
            Field::new(consts::SCOPE_DROPPED_ATTRS, DataType::UInt32, false),
            Field::new(consts::SCOPE_SCHEMA_URL, DataType::Utf8, false),
        ]
    }

    fn finish(mut self) -> Vec<ArrayRef> {
        vec![
            Arc::new(self.resource_id.finish()),
            Arc::new(self.resource_schema_url.finish()),
            Arc::new(self.resource_dropped.finish()),
            Arc::new(self.scope_id.finish()),
            Arc::new(self.scope_name.finish()),
            Arc::new(self.scope_version.finish()),
            Arc::new(self.scope_dropped.finish()),
            Arc::new(self.scope_schema_url.finish()),
        ]
    }
}

type Payloads = Vec<(ArrowPayloadType, RecordBatch)>;

fn push_attrs(
    payloads: &mut Payloads,
    payload_type: ArrowPayloadType,
    builder: AttrsBuilder,
) -> Result<(), Error> {
    if let Some(batch) = builder.finish()? {
        payloads.push((payload_type, batch));
    }
    Ok(())
}

fn encode_traces(td: &TracesData) -> Result<Payloads, Error> {
    let mut id = UInt16Builder::new();
    let mut entities = EntityColumns::new();
    let mut trace_id = FixedSizeBinaryBuilder::new(16);
    let mut span_id = FixedSizeBinaryBuilder::new(8);
    let mut parent_span_id = FixedSizeBinaryBuilder::new(8);
    let mut trace_state = StringBuilder::new();
    let mut name = StringBuilder::new();
    let mut kind = Int32Builder::new();
    let mut start_time = TimestampNanosecondBuilder::new();
    let mut end_time = TimestampNanosecondBuilder::new();
    let mut flags = UInt32Builder::new();
    let mut dropped_attrs = UInt32Builder::new();
    let mut dropped_events = UInt32Builder::new();
    let mut dropped_links = UInt32Builder::new();
    let mut status_code = Int32Builder::new();
    let mut status_message = StringBuilder::new();

    let mut ev_id = UInt16Builder::new();
    let mut ev_parent = UInt16Builder::new();
    let mut ev_time = TimestampNanosecondBuilder::new();
    let mut ev_name = StringBuilder::new();
    let mut ev_dropped = UInt32Builder::new();

    let mut ln_id = UInt16Builder::new();
    let mut ln_parent = UInt16Builder::new();
    let mut ln_trace_id = FixedSizeBinaryBuilder::new(16);
    let mut ln_span_id = FixedSizeBinaryBuilder::new(8);
    let mut ln_trace_state = StringBuilder::new();
    let mut ln_flags = UInt32Builder::new();
    let mut ln_dropped = UInt32Builder::new();

    let mut resource_attrs = AttrsBuilder::new();
    let mut scope_attrs = AttrsBuilder::new();
    let mut span_attrs = AttrsBuilder::new();
    let mut event_attrs = AttrsBuilder::new();
    let mut link_attrs = AttrsBuilder::new();

    let mut span_rows = 0usize;
    let mut event_rows = 0usize;
    let mut link_rows = 0usize;
    let mut scope_rows = 0usize;

    for (resource_idx, rs) in td.resource_spans.iter().enumerate() {
        let resource_id = id16(resource_idx)?;
        let (resource_dropped, attributes) = match &rs.resource {
            Some(resource) => (resource.dropped_attributes_count, resource.attributes.as_slice()),
            None => (0, [].as_slice()),
        };
        resource_attrs.append_all(resource_id, attributes)?;

        for ss in &rs.scope_spans {
            let scope_id = id16(scope_rows)?;
            scope_rows += 1;
            let scope = ss.scope.clone().unwrap_or_default();
            scope_attrs.append_all(scope_id, &scope.attributes)?;

            for span in &ss.spans {
                let row = id16(span_rows)?;
                span_rows += 1;

                id.append_value(row);
                entities.append(&EntityRow {
                    resource_id,
                    resource_schema_url: &rs.schema_url,
                    resource_dropped,
                    scope_id,
                    scope_name: &scope.name,
                    scope_version: &scope.version,
                    scope_dropped: scope.dropped_attributes_count,
                    scope_schema_url: &ss.schema_url,
                });
                trace_id.append_value(&span.trace_id)?;
                span_id.append_value(&span.span_id)?;
                if span.parent_span_id.is_empty() {
                    parent_span_id.append_null();
                } else {
                    parent_span_id.append_value(&span.parent_span_id)?;
                }
                trace_state.append_value(&span.trace_state);
                name.append_value(&span.name);
                kind.append_value(span.kind);
                start_time.append_value(span.start_time_unix_nano as i64);
                end_time.append_value(span.end_time_unix_nano as i64);
                flags.append_value(span.flags);
                dropped_attrs.append_value(span.dropped_attributes_count);
                dropped_events.append_value(span.dropped_events_count);
                dropped_links.append_value(span.dropped_links_count);
                match &span.status {
                    Some(status) => {
                        status_code.append_value(status.code);
                        status_message.append_value(&status.message);
                    }
                    None => {
                        status_code.append_null();
                        status_message.append_null();
                    }
                }
                span_attrs.append_all(row, &span.attributes)?;

                for event in &span.events {
                    let ev_row = id16(event_rows)?;
                    event_rows += 1;
                    ev_id.append_value(ev_row);
                    ev_parent.append_value(row);
                    ev_time.append_value(event.time_unix_nano as i64);
                    ev_name.append_value(&event.name);
                    ev_dropped.append_value(event.dropped_attributes_count);
                    event_attrs.append_all(ev_row, &event.attributes)?;
                }

                for link in &span.links {
                    let ln_row = id16(link_rows)?;
                    link_rows += 1;
                    ln_id.append_value(ln_row);
                    ln_parent.append_value(row);
                    ln_trace_id.append_value(&link.trace_id)?;
                    ln_span_id.append_value(&link.span_id)?;
                    ln_trace_state.append_value(&link.trace_state);
                    ln_flags.append_value(link.flags);
                    ln_dropped.append_value(link.dropped_attributes_count);
                    link_attrs.append_all(ln_row, &link.attributes)?;
                }
            }
        }
    }

    let mut fields = vec![Field::new(consts::ID, DataType::UInt16, false)];
    fields.extend(EntityColumns::fields());
    fields.extend([
        Field::new(consts::TRACE_ID, DataType::FixedSizeBinary(16), false),
        Field::new(consts::SPAN_ID, DataType::FixedSizeBinary(8), false),
        Field::new(consts::PARENT_SPAN_ID, DataType::FixedSizeBinary(8), true),
        Field::new(consts::TRACE_STATE, DataType::Utf8, false),
        Field::new(consts::NAME, DataType::Utf8, false),
        Field::new(consts::KIND, DataType::Int32, false),
        ts_field(consts::START_TIME_UNIX_NANO, false),
        ts_field(consts::END_TIME_UNIX_NANO, false),
        Field::new(consts::FLAGS, DataType::UInt32, false),
        Field::new(consts::DROPPED_ATTRS, DataType::UInt32, false),
        Field::new(consts::DROPPED_EVENTS, DataType::UInt32, false),
        Field::new(consts::DROPPED_LINKS, DataType::UInt32, false),
        Field::new(consts::STATUS_CODE, DataType::Int32, true),
        Field::new(consts::STATUS_MESSAGE, DataType::Utf8, true),
    ]);
    let mut columns: Vec<ArrayRef> = vec![Arc::new(id.finish())];
    columns.extend(entities.finish());
    columns.extend([
        Arc::new(trace_id.finish()) as ArrayRef,
        Arc::new(span_id.finish()),
        Arc::new(parent_span_id.finish()),
        Arc::new(trace_state.finish()),
        Arc::new(name.finish()),
        Arc::new(kind.finish()),
        Arc::new(start_time.finish()),
        Arc::new(end_time.finish()),
        Arc::new(flags.finish()),
        Arc::new(dropped_attrs.finish()),
        Arc::new(dropped_events.finish()),
        Arc::new(dropped_links.finish()),
        Arc::new(status_code.finish()),
        Arc::new(status_message.finish()),
    ]);
    let spans_batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

    let mut payloads: Payloads = vec![(ArrowPayloadType::Spans, spans_batch)];
    push_attrs(&mut payloads, ArrowPayloadType::ResourceAttrs, resource_attrs)?;
    push_attrs(&mut payloads, ArrowPayloadType::ScopeAttrs, scope_attrs)?;
    push_attrs(&mut payloads, ArrowPayloadType::SpanAttrs, span_attrs)?;

    if event_rows > 0 {
        let schema = Arc::new(Schema::new(vec![
            Field::new(consts::ID, DataType::UInt16, false),
            Field::new(consts::PARENT_ID, DataType::UInt16, false),
            ts_field(consts::TIME_UNIX_NANO, false),
            Field::new(consts::NAME, DataType::Utf8, false),
            Field::new(consts::DROPPED_ATTRS, DataType::UInt32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(ev_id.finish()),
                Arc::new(ev_parent.finish()),
                Arc::new(ev_time.finish()),
                Arc::new(ev_name.finish()),
                Arc::new(ev_dropped.finish()),
            ],
        )?;
        payloads.push((ArrowPayloadType::SpanEvents, batch));
        push_attrs(&mut payloads, ArrowPayloadType::SpanEventAttrs, event_attrs)?;
    }

    if link_rows > 0 {
        let schema = Arc::new(Schema::new(vec![
            Field::new(consts::ID, DataType::UInt16, false),
            Field::new(consts::PARENT_ID, DataType::UInt16, false),
            Field::new(consts::TRACE_ID, DataType::FixedSizeBinary(16), false),
            Field::new(consts::SPAN_ID, DataType::FixedSizeBinary(8), false),
            Field::new(consts::TRACE_STATE, DataType::Utf8, false),
            Field::new(consts::FLAGS, DataType::UInt32, false),
            Field::new(consts::DROPPED_ATTRS, DataType::UInt32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(ln_id.finish()),
                Arc::new(ln_parent.finish()),
                Arc::new(ln_trace_id.finish()),
                Arc::new(ln_span_id.finish()),
                Arc::new(ln_trace_state.finish()),
                Arc::new(ln_flags.finish()),
                Arc::new(ln_dropped.finish()),
            ],
        )?;
        payloads.push((ArrowPayloadType::SpanLinks, batch));
        push_attrs(&mut payloads, ArrowPayloadType::SpanLinkAttrs, link_attrs)?;
    }

    Ok(payloads)
}

fn encode_logs(ld: &LogsData) -> Result<Payloads, Error> {
    let mut id = UInt16Builder::new();
    let mut entities = EntityColumns::new();
    let mut time = TimestampNanosecondBuilder::new();
    let mut observed_time = TimestampNanosecondBuilder::new();
    let mut severity_number = Int32Builder::new();
    let mut severity_text = StringBuilder::new();
    let mut event_name = StringBuilder::new();
    let mut body_type = UInt8Builder::new();
    let mut body_str = StringBuilder::new();
    let mut body_int = Int64Builder::new();
    let mut body_double = Float64Builder::new();
    let mut body_bool = BooleanBuilder::new();
    let mut body_bytes = BinaryBuilder::new();
    let mut body_ser = BinaryBuilder::new();
    let mut dropped_attrs = UInt32Builder::new();
    let mut flags = UInt32Builder::new();
    let mut trace_id = FixedSizeBinaryBuilder::new(16);
    let mut span_id = FixedSizeBinaryBuilder::new(8);

    let mut resource_attrs = AttrsBuilder::new();
    let mut scope_attrs = AttrsBuilder::new();
    let mut log_attrs = AttrsBuilder::new();

    let mut log_rows = 0usize;
    let mut scope_rows = 0usize;

    for (resource_idx, rl) in ld.resource_logs.iter().enumerate() {
        let resource_id = id16(resource_idx)?;
        let (resource_dropped, attributes) = match &rl.resource {
            Some(resource) => (resource.dropped_attributes_count, resource.attributes.as_slice()),
            None => (0, [].as_slice()),
        };
        resource_attrs.append_all(resource_id, attributes)?;

        for sl in &rl.scope_logs {
            let scope_id = id16(scope_rows)?;
            scope_rows += 1;
            let scope = sl.scope.clone().unwrap_or_default();
            scope_attrs.append_all(scope_id, &scope.attributes)?;

            for record in &sl.log_records {
                let row = id16(log_rows)?;
                log_rows += 1;

                id.append_value(row);
                entities.append(&EntityRow {
                    resource_id,
                    resource_schema_url: &rl.schema_url,
                    resource_dropped,
                    scope_id,
                    scope_name: &scope.name,
                    scope_version: &scope.version,
                    scope_dropped: scope.dropped_attributes_count,
                    scope_schema_url: &sl.schema_url,
                });
                time.append_value(record.time_unix_nano as i64);
                observed_time.append_value(record.observed_time_unix_nano as i64);
                severity_number.append_value(record.severity_number);
                severity_text.append_value(&record.severity_text);
                event_name.append_value(&record.event_name);

                let body = ValueColumns::split(record.body.as_ref())?;
                body_type.append_value(body.value_type as u8);
                body_str.append_option(body.str.as_deref());
                body_int.append_option(body.int);
                body_double.append_option(body.double);
                body_bool.append_option(body.bool);
                body_bytes.append_option(body.bytes.as_deref());
                body_ser.append_option(body.ser.as_deref());

                dropped_attrs.append_value(record.dropped_attributes_count);
                flags.append_value(record.flags);
                if record.trace_id.is_empty() {
                    trace_id.append_null();
                } else {
                    trace_id.append_value(&record.trace_id)?;
                }
                if record.span_id.is_empty() {
                    span_id.append_null();
                } else {
                    span_id.append_value(&record.span_id)?;
                }
                log_attrs.append_all(row, &record.attributes)?;
            }
        }
    }

    let mut fields = vec![Field::new(consts::ID, DataType::UInt16, false)];
    fields.extend(EntityColumns::fields());
    fields.extend([
        ts_field(consts::TIME_UNIX_NANO, false),
        ts_field(consts::OBSERVED_TIME_UNIX_NANO, false),
        Field::new(consts::SEVERITY_NUMBER, DataType::Int32, false),
        Field::new(consts::SEVERITY_TEXT, DataType::Utf8, false),
        Field::new(consts::EVENT_NAME, DataType::Utf8, false),
        Field::new(consts::BODY_TYPE, DataType::UInt8, false),
        Field::new(consts::BODY_STR, DataType::Utf8, true),
        Field::new(consts::BODY_INT, DataType::Int64, true),
        Field::new(consts::BODY_DOUBLE, DataType::Float64, true),
        Field::new(consts::BODY_BOOL, DataType::Boolean, true),
        Field::new(consts::BODY_BYTES, DataType::Binary, true),
        Field::new(consts::BODY_SER, DataType::Binary, true),
        Field::new(consts::DROPPED_ATTRS, DataType::UInt32, false),
        Field::new(consts::FLAGS, DataType::UInt32, false),
        Field::new(consts::TRACE_ID, DataType::FixedSizeBinary(16), true),
        Field::new(consts::SPAN_ID, DataType::FixedSizeBinary(8), true),
    ]);
    let mut columns: Vec<ArrayRef> = vec![Arc::new(id.finish())];
    columns.extend(entities.finish());
    columns.extend([
        Arc::new(time.finish()) as ArrayRef,
        Arc::new(observed_time.finish()),
        Arc::new(severity_number.finish()),
        Arc::new(severity_text.finish()),
        Arc::new(event_name.finish()),
        Arc::new(body_type.finish()),
        Arc::new(body_str.finish()),
        Arc::new(body_int.finish()),
        Arc::new(body_double.finish()),
        Arc::new(body_bool.finish()),
        Arc::new(body_bytes.finish()),
        Arc::new(body_ser.finish()),
        Arc::new(dropped_attrs.finish()),
        Arc::new(flags.finish()),
        Arc::new(trace_id.finish()),
        Arc::new(span_id.finish()),
    ]);
    let logs_batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

    let mut payloads: Payloads = vec![(ArrowPayloadType::Logs, logs_batch)];
    push_attrs(&mut payloads, ArrowPayloadType::ResourceAttrs, resource_attrs)?;
    push_attrs(&mut payloads, ArrowPayloadType::ScopeAttrs, scope_attrs)?;
    push_attrs(&mut payloads, ArrowPayloadType::LogAttrs, log_attrs)?;
    Ok(payloads)
}

fn encode_metrics(md: &MetricsData) -> Result<Payloads, Error> {
    let mut id = UInt16Builder::new();
    let mut entities = EntityColumns::new();
    let mut name = StringBuilder::new();
    let mut description = StringBuilder::new();
    let mut unit = StringBuilder::new();
    let mut metric_type = UInt8Builder::new();
    let mut temporality = Int32Builder::new();
    let mut monotonic = BooleanBuilder::new();

    let mut dp_id = UInt16Builder::new();
    let mut dp_parent = UInt16Builder::new();
    let mut dp_start = TimestampNanosecondBuilder::new();
    let mut dp_time = TimestampNanosecondBuilder::new();
    let mut dp_value_type = UInt8Builder::new();
    let mut dp_int = Int64Builder::new();
    let mut dp_double = Float64Builder::new();
    let mut dp_flags = UInt32Builder::new();

    let mut resource_attrs = AttrsBuilder::new();
    let mut scope_attrs = AttrsBuilder::new();
    let mut dp_attrs = AttrsBuilder::new();

    let mut metric_rows = 0usize;
    let mut dp_rows = 0usize;
    let mut scope_rows = 0usize;

    for (resource_idx, rm) in md.resource_metrics.iter().enumerate() {
        let resource_id = id16(resource_idx)?;
        let (resource_dropped, attributes) = match &rm.resource {
            Some(resource) => (resource.dropped_attributes_count, resource.attributes.as_slice()),
            None => (0, [].as_slice()),
        };
        resource_attrs.append_all(resource_id, attributes)?;

        for sm in &rm.scope_metrics {
            let scope_id = id16(scope_rows)?;
            scope_rows += 1;
            let scope = sm.scope.clone().unwrap_or_default();
            scope_attrs.append_all(scope_id, &scope.attributes)?;

            for m in &sm.metrics {
                let row = id16(metric_rows)?;
                metric_rows += 1;

                static NO_POINTS: Vec<opentelemetry_proto::tonic::metrics::v1::NumberDataPoint> =
                    Vec::new();
                let (kind, agg_temporality, is_monotonic, points) = match &m.data {
                    Some(metric::Data::Gauge(g)) => {
                        (MetricKind::Gauge as u8, 0, false, &g.data_points)
                    }
                    Some(metric::Data::Sum(s)) => (
                        MetricKind::Sum as u8,
                        s.aggregation_temporality,
                        s.is_monotonic,
                        &s.data_points,
                    ),
                    Some(metric::Data::Histogram(_)) => {
                        return Err(Error::UnsupportedMetricData("histogram"));
                    }
                    Some(metric::Data::ExponentialHistogram(_)) => {
                        return Err(Error::UnsupportedMetricData("exponential histogram"));
                    }
                    Some(metric::Data::Summary(_)) => {
                        return Err(Error::UnsupportedMetricData("summary"));
                    }
                    None => (0u8, 0, false, &NO_POINTS),
                };

                id.append_value(row);
                entities.append(&EntityRow {
                    resource_id,
                    resource_schema_url: &rm.schema_url,
                    resource_dropped,
                    scope_id,
                    scope_name: &scope.name,
                    scope_version: &scope.version,
                    scope_dropped: scope.dropped_attributes_count,
                    scope_schema_url: &sm.schema_url,
                });
                name.append_value(&m.name);
                description.append_value(&m.description);
                unit.append_value(&m.unit);
                metric_type.append_value(kind);
                temporality.append_value(agg_temporality);
                monotonic.append_value(is_monotonic);

                for dp in points {
                    let dp_row = id16(dp_rows)?;
                    dp_rows += 1;
                    dp_id.append_value(dp_row);
                    dp_parent.append_value(row);
                    dp_start.append_value(dp.start_time_unix_nano as i64);
                    dp_time.append_value(dp.time_unix_nano as i64);
                    use opentelemetry_proto::tonic::metrics::v1::number_data_point::Value;
                    match dp.value {
                        Some(Value::AsInt(v)) => {
                            dp_value_type.append_value(crate::schema::ValueType::Int as u8);
                            dp_int.append_value(v);
                            dp_double.append_null();
                        }
                        Some(Value::AsDouble(v)) => {
                            dp_value_type.append_value(crate::schema::ValueType::Double as u8);
                            dp_int.append_null();
                            dp_double.append_value(v);
                        }
                        None => {
                            dp_value_type.append_value(crate::schema::ValueType::Empty as u8);
                            dp_int.append_null();
                            dp_double.append_null();
                        }
                    }
                    dp_flags.append_value(dp.flags);
                    dp_attrs.append_all(dp_row, &dp.attributes)?;
                }
            }
        }
    }

    let mut fields = vec![Field::new(consts::ID, DataType::UInt16, false)];
    fields.extend(EntityColumns::fields());
    fields.extend([
        Field::new(consts::METRIC_NAME, DataType::Utf8, false),
        Field::new(consts::DESCRIPTION, DataType::Utf8, false),
        Field::new(consts::UNIT, DataType::Utf8, false),
        Field::new(consts::METRIC_TYPE, DataType::UInt8, false),
        Field::new(consts::AGGREGATION_TEMPORALITY, DataType::Int32, false),
        Field::new(consts::IS_MONOTONIC, DataType::Boolean, false),
    ]);
    let mut columns: Vec<ArrayRef> = vec![Arc::new(id.finish())];
    columns.extend(entities.finish());
    columns.extend([
        Arc::new(name.finish()) as ArrayRef,
        Arc::new(description.finish()),
        Arc::new(unit.finish()),
        Arc::new(metric_type.finish()),
        Arc::new(temporality.finish()),
        Arc::new(monotonic.finish()),
    ]);
    let metrics_batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

    let mut payloads: Payloads = vec![(ArrowPayloadType::UnivariateMetrics, metrics_batch)];

    if dp_rows > 0 {
        let schema = Arc::new(Schema::new(vec![
            Field::new(consts::ID, DataType::UInt16, false),
            Field::new(consts::PARENT_ID, DataType::UInt16, false),
            ts_field(consts::START_TIME_UNIX_NANO, false),
            ts_field(consts::TIME_UNIX_NANO, false),
            Field::new(consts::VALUE_TYPE, DataType::UInt8, false),
            Field::new(consts::INT_VALUE, DataType::Int64, true),
            Field::new(consts::DOUBLE_VALUE, DataType::Float64, true),
            Field::new(consts::FLAGS, DataType::UInt32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(dp_id.finish()),
                Arc::new(dp_parent.finish()),
                Arc::new(dp_start.finish()),
                Arc::new(dp_time.finish()),
                Arc::new(dp_value_type.finish()),
                Arc::new(dp_int.finish()),
                Arc::new(dp_double.finish()),
                Arc::new(dp_flags.finish()),
            ],
        )?;
        payloads.push((ArrowPayloadType::NumberDataPoints, batch));
        push_attrs(&mut payloads, ArrowPayloadType::NumberDpAttrs, dp_attrs)?;
    }

    push_attrs(&mut payloads, ArrowPayloadType::ResourceAttrs, resource_attrs)?;
    push_attrs(&mut payloads, ArrowPayloadType::ScopeAttrs, scope_attrs)?;
    Ok(payloads)
}
