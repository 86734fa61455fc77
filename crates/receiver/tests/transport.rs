// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end transport tests: a real exporter (or a raw stream client)
//! against a real receiver over loopback gRPC.

use async_trait::async_trait;
use opentelemetry_proto::tonic::common::v1::AnyValue;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::logs::v1::{LogRecord, LogsData, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::MetricsData;
use opentelemetry_proto::tonic::trace::v1::TracesData;
use otap_link_codec::{Producer, SignalData, testdata};
use otap_link_exporter::{ArrowExporter, ExporterConfig, SendOutcome};
use otap_link_protocol::StreamMethod;
use otap_link_protocol::client::ArrowStreamClient;
use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::{
    BatchStatus, ErrorCode, StatusCode,
};
use otap_link_receiver::{
    ArrowReceiver, ConsumeError, PipelineConsumer, ReceiverConfig, RequestContext,
};
use pretty_assertions::assert_eq;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Streaming;

const DEADLINE: Duration = Duration::from_secs(5);

/// Records everything it consumes; optionally gated on a semaphore so tests
/// can hold batches in flight.
struct TestPipeline {
    seen: mpsc::Sender<(RequestContext, SignalData)>,
    gate: Option<Arc<Semaphore>>,
    fail_with: Option<ConsumeError>,
}

impl TestPipeline {
    fn recording(seen: mpsc::Sender<(RequestContext, SignalData)>) -> Arc<Self> {
        Arc::new(Self {
            seen,
            gate: None,
            fail_with: None,
        })
    }

    fn gated(
        seen: mpsc::Sender<(RequestContext, SignalData)>,
        gate: Arc<Semaphore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            seen,
            gate: Some(gate),
            fail_with: None,
        })
    }

    fn failing(error: ConsumeError) -> Arc<Self> {
        let (seen, _) = mpsc::channel(1);
        Arc::new(Self {
            seen,
            gate: None,
            fail_with: Some(error),
        })
    }

    async fn consume(
        &self,
        context: RequestContext,
        data: SignalData,
    ) -> Result<(), ConsumeError> {
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.map_err(|_| {
                ConsumeError::Transient("gate closed".to_owned())
            })?;
            permit.forget();
        }
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        _ = self.seen.send((context, data)).await;
        Ok(())
    }
}

#[async_trait]
impl PipelineConsumer for TestPipeline {
    async fn consume_traces(
        &self,
        context: RequestContext,
        traces: TracesData,
    ) -> Result<(), ConsumeError> {
        self.consume(context, SignalData::Traces(traces)).await
    }

    async fn consume_logs(
        &self,
        context: RequestContext,
        logs: LogsData,
    ) -> Result<(), ConsumeError> {
        self.consume(context, SignalData::Logs(logs)).await
    }

    async fn consume_metrics(
        &self,
        context: RequestContext,
        metrics: MetricsData,
    ) -> Result<(), ConsumeError> {
        self.consume(context, SignalData::Metrics(metrics)).await
    }
}

struct RunningReceiver {
    receiver: Arc<ArrowReceiver>,
    endpoint: String,
    serve_task: JoinHandle<()>,
}

async fn start_receiver(
    mut config: ReceiverConfig,
    pipeline: Arc<dyn PipelineConsumer>,
) -> RunningReceiver {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("addr");
    config.listening_addr = addr;
    let receiver = Arc::new(ArrowReceiver::new(config, pipeline));
    let serve_receiver = receiver.clone();
    let serve_task = tokio::spawn(async move {
        serve_receiver
            .serve_with_listener(listener)
            .await
            .expect("serve");
    });
    RunningReceiver {
        receiver,
        endpoint: format!("http://{addr}"),
        serve_task,
    }
}

impl RunningReceiver {
    async fn stop(self) {
        self.receiver.shutdown_handle().cancel();
        _ = self.serve_task.await;
    }
}

fn receiver_config() -> ReceiverConfig {
    ReceiverConfig::new("127.0.0.1:0".parse().expect("addr"))
}

fn exporter_config(endpoint: &str) -> ExporterConfig {
    let mut config = ExporterConfig::new(endpoint);
    config.num_streams = 1;
    config
}

/// A raw stream: an outbound batch channel plus the inbound status stream.
async fn open_raw_stream(
    endpoint: &str,
    method: StreamMethod,
) -> (
    mpsc::Sender<otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::BatchArrowRecords>,
    Streaming<BatchStatus>,
) {
    let mut client = ArrowStreamClient::connect(endpoint.to_owned(), method)
        .await
        .expect("connect");
    let (tx, rx) = mpsc::channel(8);
    let inbound = client
        .open(ReceiverStream::new(rx))
        .await
        .expect("open")
        .into_inner();
    (tx, inbound)
}

async fn next_status(inbound: &mut Streaming<BatchStatus>) -> BatchStatus {
    timeout(DEADLINE, inbound.message())
        .await
        .expect("deadline")
        .expect("status")
        .expect("stream open")
}

fn logs_with_body(bytes: usize) -> LogsData {
    LogsData {
        resource_logs: vec![ResourceLogs {
            resource: None,
            scope_logs: vec![ScopeLogs {
                scope: None,
                log_records: vec![LogRecord {
                    body: Some(AnyValue {
                        value: Some(Value::StringValue("x".repeat(bytes))),
                    }),
                    ..Default::default()
                }],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    }
}

#[tokio::test]
async fn end_to_end_all_signals() {
    let (seen_tx, mut seen_rx) = mpsc::channel(32);
    let server = start_receiver(receiver_config(), TestPipeline::recording(seen_tx)).await;

    let exporter = ArrowExporter::new(exporter_config(&server.endpoint)).expect("exporter");
    exporter.start();

    let requests = vec![
        SignalData::Traces(testdata::generate_traces(2)),
        SignalData::Logs(testdata::generate_logs(3)),
        SignalData::Metrics(testdata::generate_metrics(2)),
    ];
    for request in &requests {
        let outcome = timeout(DEADLINE, exporter.send_and_wait(request.clone()))
            .await
            .expect("deadline")
            .expect("sent");
        assert_eq!(outcome, SendOutcome::SentArrow);
    }

    for request in &requests {
        let (_context, received) = timeout(DEADLINE, seen_rx.recv())
            .await
            .expect("deadline")
            .expect("pipeline fed");
        assert_eq!(&received, request);
    }

    let metrics = server.receiver.metrics();
    assert_eq!(metrics.batches, 3);
    assert_eq!(metrics.items, 2 + 3 + 4);
    assert_eq!(metrics.statuses_ok, 3);
    assert_eq!(metrics.statuses_error, 0);
    assert_eq!(metrics.size_hint_mismatches, 0);

    exporter.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn pipeline_errors_map_to_wire_statuses() {
    let cases = vec![
        (
            ConsumeError::Transient("backend flapping".to_owned()),
            ErrorCode::Unavailable,
        ),
        (
            ConsumeError::Permanent("schema rejected".to_owned()),
            ErrorCode::InvalidArgument,
        ),
        (
            ConsumeError::ResourceExhausted("queue full".to_owned()),
            ErrorCode::ResourceExhausted,
        ),
    ];

    for (error, expected_code) in cases {
        let server = start_receiver(receiver_config(), TestPipeline::failing(error)).await;
        let (tx, mut inbound) = open_raw_stream(&server.endpoint, StreamMethod::Mixed).await;

        let mut producer = Producer::new();
        let bar = producer
            .produce(&SignalData::Logs(testdata::generate_logs(1)))
            .expect("encode");
        tx.send(bar).await.expect("send");

        let status = next_status(&mut inbound).await;
        let message = &status.statuses[0];
        assert_eq!(message.status_code, StatusCode::Error as i32);
        assert_eq!(message.error_code, expected_code as i32);
        assert!(!message.error_message.is_empty());

        drop(tx);
        server.stop().await;
    }
}

#[tokio::test]
async fn exporter_observes_receiver_errors() {
    let server = start_receiver(
        receiver_config(),
        TestPipeline::failing(ConsumeError::Transient("draining".to_owned())),
    )
    .await;

    let exporter = ArrowExporter::new(exporter_config(&server.endpoint)).expect("exporter");
    exporter.start();

    let error = timeout(
        DEADLINE,
        exporter.send_and_wait(SignalData::Traces(testdata::generate_traces(1))),
    )
    .await
    .expect("deadline")
    .expect_err("must fail");
    assert!(error.is_retryable());
    assert!(error.to_string().contains("draining"));

    exporter.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn separate_signals_can_be_disabled() {
    let (seen_tx, mut seen_rx) = mpsc::channel(8);
    let mut config = receiver_config();
    config.disable_separate_signals = true;
    let server = start_receiver(config, TestPipeline::recording(seen_tx)).await;

    // The per-signal surface is gone: an exporter pinned to it downgrades.
    let mut traces_config = exporter_config(&server.endpoint);
    traces_config.method = StreamMethod::Traces;
    traces_config.num_streams = 2;
    let pinned = ArrowExporter::new(traces_config).expect("exporter");
    pinned.start();
    let outcome = timeout(
        DEADLINE,
        pinned.send_and_wait(SignalData::Traces(testdata::generate_traces(1))),
    )
    .await
    .expect("deadline")
    .expect("outcome");
    assert_eq!(outcome, SendOutcome::Downgraded);
    pinned.shutdown().await;

    // The mixed stream still works.
    let mixed = ArrowExporter::new(exporter_config(&server.endpoint)).expect("exporter");
    mixed.start();
    assert_eq!(
        timeout(
            DEADLINE,
            mixed.send_and_wait(SignalData::Traces(testdata::generate_traces(1)))
        )
        .await
        .expect("deadline")
        .expect("sent"),
        SendOutcome::SentArrow
    );
    _ = timeout(DEADLINE, seen_rx.recv()).await.expect("deadline");
    mixed.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn per_signal_stream_rejects_foreign_signal() {
    let (seen_tx, _seen_rx) = mpsc::channel(8);
    let server = start_receiver(receiver_config(), TestPipeline::recording(seen_tx)).await;

    let mut config = exporter_config(&server.endpoint);
    config.method = StreamMethod::Traces;
    let exporter = ArrowExporter::new(config).expect("exporter");
    exporter.start();

    let error = timeout(
        DEADLINE,
        exporter.send_and_wait(SignalData::Logs(testdata::generate_logs(1))),
    )
    .await
    .expect("deadline")
    .expect_err("wrong signal");
    assert!(error.is_permanent());
    assert!(error.to_string().contains("logs batch on the traces stream"));

    exporter.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn metadata_and_propagation_reach_the_pipeline() {
    let (seen_tx, mut seen_rx) = mpsc::channel(8);
    let mut config = receiver_config();
    config.include_metadata = true;
    let server = start_receiver(config, TestPipeline::recording(seen_tx)).await;

    let mut exporter_cfg = exporter_config(&server.endpoint);
    _ = exporter_cfg
        .headers
        .insert("x-tenant".to_owned(), "edge-7".to_owned());
    _ = exporter_cfg.headers.insert(
        "traceparent".to_owned(),
        "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_owned(),
    );
    let exporter = ArrowExporter::new(exporter_cfg).expect("exporter");
    exporter.start();

    assert_eq!(
        timeout(
            DEADLINE,
            exporter.send_and_wait(SignalData::Logs(testdata::generate_logs(1)))
        )
        .await
        .expect("deadline")
        .expect("sent"),
        SendOutcome::SentArrow
    );

    let (context, _data) = timeout(DEADLINE, seen_rx.recv())
        .await
        .expect("deadline")
        .expect("pipeline fed");
    assert_eq!(context.metadata["x-tenant"], vec!["edge-7".to_owned()]);
    // Propagation fields are extracted, not forwarded as metadata.
    assert!(!context.metadata.contains_key("traceparent"));
    let trace = context.trace_context.expect("traceparent parsed");
    assert_eq!(trace.trace_id[0], 0x0a);
    assert_eq!(trace.flags, 1);

    exporter.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn size_hint_mismatch_keeps_reservation() {
    let (seen_tx, mut seen_rx) = mpsc::channel(8);
    let server = start_receiver(receiver_config(), TestPipeline::recording(seen_tx)).await;
    let (tx, mut inbound) = open_raw_stream(&server.endpoint, StreamMethod::Mixed).await;

    let mut producer = Producer::new();
    let mut bar = producer
        .produce(&SignalData::Logs(testdata::generate_logs(2)))
        .expect("encode");
    // Claim a size that disagrees with the decoded pdata.
    let mut hpack = fluke_hpack::Encoder::new();
    bar.headers = hpack.encode([("otlp-pdata-size".as_bytes(), "1000".as_bytes())]);
    tx.send(bar).await.expect("send");

    let status = next_status(&mut inbound).await;
    assert_eq!(status.statuses[0].status_code, StatusCode::Ok as i32);
    _ = timeout(DEADLINE, seen_rx.recv()).await.expect("deadline");

    let metrics = server.receiver.metrics();
    assert_eq!(metrics.size_hint_mismatches, 1);

    drop(tx);
    server.stop().await;
}

#[tokio::test]
async fn admission_fast_fails_past_waiter_cap() {
    let (seen_tx, mut seen_rx) = mpsc::channel(8);
    let gate = Arc::new(Semaphore::new(0));
    let mut config = receiver_config();
    config.memory_limit_mib = 1;
    config.waiter_limit = 0;
    let server = start_receiver(config, TestPipeline::gated(seen_tx, gate.clone())).await;
    let (tx, mut inbound) = open_raw_stream(&server.endpoint, StreamMethod::Mixed).await;

    // Each batch is ~0.7 MiB uncompressed, so the second cannot fit while
    // the first is held by the pipeline, and with no waiter budget it is
    // rejected instead of parking.
    let mut producer = Producer::new();
    let big = SignalData::Logs(logs_with_body(700 * 1024));
    tx.send(producer.produce(&big).expect("encode"))
        .await
        .expect("send first");
    tx.send(producer.produce(&big).expect("encode"))
        .await
        .expect("send second");

    let rejected = next_status(&mut inbound).await;
    assert_eq!(rejected.statuses[0].batch_id, 1);
    assert_eq!(
        rejected.statuses[0].status_code,
        StatusCode::Error as i32
    );
    assert_eq!(
        rejected.statuses[0].error_code,
        ErrorCode::ResourceExhausted as i32
    );

    // Release the pipeline; the first batch completes normally.
    gate.add_permits(1);
    let accepted = next_status(&mut inbound).await;
    assert_eq!(accepted.statuses[0].batch_id, 0);
    assert_eq!(accepted.statuses[0].status_code, StatusCode::Ok as i32);
    _ = timeout(DEADLINE, seen_rx.recv()).await.expect("deadline");

    drop(tx);
    server.stop().await;
}

#[tokio::test]
async fn shutdown_flushes_pending_statuses() {
    let (seen_tx, _seen_rx) = mpsc::channel(8);
    let gate = Arc::new(Semaphore::new(0));
    let server = start_receiver(receiver_config(), TestPipeline::gated(seen_tx, gate.clone()))
        .await;
    let (tx, mut inbound) = open_raw_stream(&server.endpoint, StreamMethod::Mixed).await;

    let mut producer = Producer::new();
    for _ in 0..3 {
        tx.send(
            producer
                .produce(&SignalData::Logs(testdata::generate_logs(1)))
                .expect("encode"),
        )
        .await
        .expect("send");
    }
    // Wait for all three to be admitted and dispatched.
    timeout(DEADLINE, async {
        while server.receiver.metrics().batches < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("batches dispatched");

    // Cancel the receiver with the batches still in flight, then let the
    // pipeline finish them.
    let shutdown = server.receiver.shutdown_handle();
    shutdown.cancel();
    gate.add_permits(3);

    // All three statuses arrive before the stream closes with Cancelled.
    let mut seen_ids = Vec::new();
    for _ in 0..3 {
        let status = next_status(&mut inbound).await;
        assert_eq!(status.statuses[0].status_code, StatusCode::Ok as i32);
        seen_ids.push(status.statuses[0].batch_id);
    }
    seen_ids.sort_unstable();
    assert_eq!(seen_ids, vec![0, 1, 2]);

    let end = timeout(DEADLINE, inbound.message()).await.expect("deadline");
    match end {
        Err(status) => assert_eq!(status.code(), tonic::Code::Cancelled),
        Ok(None) => {}
        Ok(Some(extra)) => panic!("unexpected extra status: {extra:?}"),
    }

    drop(tx);
    _ = server.serve_task.await;
}

#[tokio::test]
async fn replayed_batch_is_processed_twice() {
    let (seen_tx, mut seen_rx) = mpsc::channel(8);
    let server = start_receiver(receiver_config(), TestPipeline::recording(seen_tx)).await;
    let (tx, mut inbound) = open_raw_stream(&server.endpoint, StreamMethod::Mixed).await;

    let mut producer = Producer::new();
    let bar = producer
        .produce(&SignalData::Logs(testdata::generate_logs(1)))
        .expect("encode");
    tx.send(bar.clone()).await.expect("send");
    let first = next_status(&mut inbound).await;
    assert_eq!(first.statuses[0].status_code, StatusCode::Ok as i32);

    // Replaying the same accepted batch yields an independent invocation.
    tx.send(bar).await.expect("send again");
    let second = next_status(&mut inbound).await;
    assert_eq!(second.statuses[0].status_code, StatusCode::Ok as i32);

    for _ in 0..2 {
        _ = timeout(DEADLINE, seen_rx.recv())
            .await
            .expect("deadline")
            .expect("pipeline fed");
    }
    assert_eq!(server.receiver.metrics().batches, 2);

    drop(tx);
    server.stop().await;
}
