// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Arrow IPC encoding of OTLP telemetry for the otap-link transport.
//!
//! The transport moves [`SignalData`] (the three OTLP top-level messages,
//! tagged) as [`BatchArrowRecords`]: one columnar main record per signal plus
//! flat attribute records keyed by 16-bit parent ids. The [`Producer`] and
//! [`Consumer`] are the codec boundary the exporter and receiver program
//! against; each is single-owner per stream.
//!
//! The layout is a simplified cousin of the OTel-Arrow schema: resource and
//! scope identity is denormalized onto main-record rows instead of living in
//! struct columns, and metrics cover the univariate (gauge/sum) shapes.
//! Decoding canonicalizes by regrouping rows in first-appearance order;
//! encode-then-decode is semantically lossless up to that regrouping and
//! attribute order.
//!
//! [`BatchArrowRecords`]: otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::BatchArrowRecords

mod arrays;
mod attrs;
mod decode;
mod encode;
mod error;
mod pdata;
mod schema;
pub mod testdata;

pub use decode::Consumer;
pub use encode::Producer;
pub use error::Error;
pub use pdata::SignalData;
pub use schema::{PayloadCompression, consts, schema_id};

#[cfg(test)]
mod tests {
    use super::*;
    use otap_link_protocol::SignalType;
    use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::ArrowPayloadType;
    use pretty_assertions::assert_eq;

    fn roundtrip(data: SignalData) -> SignalData {
        let mut producer = Producer::new();
        let mut consumer = Consumer::new();
        let mut bar = producer.produce(&data).expect("encode");
        consumer.consume(&mut bar).expect("decode")
    }

    #[test]
    fn traces_roundtrip() {
        let data = SignalData::Traces(testdata::generate_traces(5));
        assert_eq!(roundtrip(data.clone()), data);
    }

    #[test]
    fn logs_roundtrip() {
        let data = SignalData::Logs(testdata::generate_logs(4));
        assert_eq!(roundtrip(data.clone()), data);
    }

    #[test]
    fn metrics_roundtrip() {
        let data = SignalData::Metrics(testdata::generate_metrics(3));
        assert_eq!(roundtrip(data.clone()), data);
    }

    #[test]
    fn batch_ids_are_monotonic_per_producer() {
        let mut producer = Producer::new();
        let data = SignalData::Logs(testdata::generate_logs(1));
        for expected in 0..5 {
            let bar = producer.produce(&data).expect("encode");
            assert_eq!(bar.batch_id, expected);
        }
    }

    #[test]
    fn main_payload_leads_the_batch() {
        let mut producer = Producer::new();
        let bar = producer
            .produce(&SignalData::Traces(testdata::generate_traces(2)))
            .expect("encode");
        assert_eq!(bar.arrow_payloads[0].r#type, ArrowPayloadType::Spans as i32);
        assert_eq!(
            SignalType::of_batch(&bar),
            Some(SignalType::Traces)
        );
        // Attribute payloads follow the main record.
        assert!(bar.arrow_payloads.len() > 1);
    }

    #[test]
    fn compressed_payloads_roundtrip() {
        let data = SignalData::Traces(testdata::generate_traces(8));
        for compression in [PayloadCompression::Zstd, PayloadCompression::Lz4] {
            let mut producer = Producer::with_compression(compression);
            let mut consumer = Consumer::new();
            let mut bar = producer.produce(&data).expect("encode");
            assert_eq!(consumer.consume(&mut bar).expect("decode"), data);
        }
    }

    #[test]
    fn item_counts_match() {
        assert_eq!(
            SignalData::Traces(testdata::generate_traces(7)).item_count(),
            7
        );
        assert_eq!(SignalData::Logs(testdata::generate_logs(7)).item_count(), 7);
        // Two metrics with seven points each.
        assert_eq!(
            SignalData::Metrics(testdata::generate_metrics(7)).item_count(),
            14
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::BatchArrowRecords;
        let mut consumer = Consumer::new();
        let mut bar = BatchArrowRecords::default();
        assert!(matches!(
            consumer.consume(&mut bar),
            Err(Error::EmptyBatch)
        ));
    }

    #[test]
    fn mixed_signal_batch_is_rejected() {
        let mut producer = Producer::new();
        let traces = producer
            .produce(&SignalData::Traces(testdata::generate_traces(1)))
            .expect("encode traces");
        let logs = producer
            .produce(&SignalData::Logs(testdata::generate_logs(1)))
            .expect("encode logs");

        let mut mixed = traces;
        mixed
            .arrow_payloads
            .extend(logs.arrow_payloads.into_iter().filter(|p| {
                p.r#type == ArrowPayloadType::Logs as i32
            }));
        let mut consumer = Consumer::new();
        assert!(matches!(
            consumer.consume(&mut mixed),
            Err(Error::MixedSignalBatch)
        ));
    }

    #[test]
    fn histogram_metrics_are_unsupported() {
        use opentelemetry_proto::tonic::metrics::v1::{
            Histogram, Metric, MetricsData, ResourceMetrics, ScopeMetrics, metric,
        };
        let md = MetricsData {
            resource_metrics: vec![ResourceMetrics {
                resource: None,
                scope_metrics: vec![ScopeMetrics {
                    scope: None,
                    metrics: vec![Metric {
                        name: "latency".into(),
                        data: Some(metric::Data::Histogram(Histogram::default())),
                        ..Default::default()
                    }],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };
        let mut producer = Producer::new();
        assert!(matches!(
            producer.produce(&SignalData::Metrics(md)),
            Err(Error::UnsupportedMetricData("histogram"))
        ));
    }

    #[test]
    fn replayed_batch_decodes_twice() {
        let data = SignalData::Logs(testdata::generate_logs(2));
        let mut producer = Producer::new();
        let mut consumer = Consumer::new();
        let bar = producer.produce(&data).expect("encode");
        let mut first = bar.clone();
        let mut second = bar;
        assert_eq!(consumer.consume(&mut first).expect("decode"), data);
        assert_eq!(consumer.consume(&mut second).expect("decode"), data);
    }
}
