// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Streaming Arrow exporter of the otap-link transport.
//!
//! [`ArrowExporter`] owns a pool of bidirectional gRPC streams. Outbound
//! requests are dispatched to one stream by a configurable prioritizer
//! (first-ready or best-of-N-load), encoded to Arrow by a per-stream
//! producer, and correlated back to the caller by batch id when the
//! destination's status arrives. Streams restart individually on failure;
//! if the destination refuses the Arrow service on every stream, the whole
//! exporter downgrades and callers are told to fall back to unary OTLP.

mod config;
mod creds;
mod error;
mod exporter;
mod metrics;
pub mod mock;
mod prioritizer;
mod stream;

pub use config::{ExporterConfig, PrioritizerKind};
pub use creds::{HeaderProvider, StaticHeaders};
pub use error::ExportError;
pub use exporter::{ArrowExporter, SendOutcome};
pub use metrics::{Counter, ExporterMetrics, MetricsSnapshot};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockArrowService, MockBehavior, MockServer};
    use otap_link_codec::{SignalData, testdata};
    use otap_link_protocol::StreamMethod;
    use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::ErrorCode;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::timeout;

    fn config_for(endpoint: &str) -> ExporterConfig {
        let mut config = ExporterConfig::new(endpoint);
        config.num_streams = 1;
        config
    }

    #[tokio::test]
    async fn healthy_single_stream_traces() {
        let (forward_tx, mut forward_rx) = tokio::sync::mpsc::channel(64);
        let server = MockServer::start(MockArrowService::new(
            MockBehavior::AckAll,
            Some(forward_tx),
        ))
        .await
        .expect("server");

        let exporter = ArrowExporter::new(config_for(&server.endpoint)).expect("exporter");
        exporter.start();

        let sent = SignalData::Traces(testdata::generate_traces(2));
        for _ in 0..10 {
            let outcome = timeout(Duration::from_secs(5), exporter.send_and_wait(sent.clone()))
                .await
                .expect("deadline")
                .expect("sent");
            assert_eq!(outcome, SendOutcome::SentArrow);
        }

        for _ in 0..10 {
            let received = timeout(Duration::from_secs(5), forward_rx.recv())
                .await
                .expect("deadline")
                .expect("forwarded");
            assert_eq!(received, sent);
        }

        let metrics = exporter.metrics();
        assert_eq!(metrics.requests, 10);
        assert_eq!(metrics.items, 20);
        assert_eq!(metrics.statuses_ok, 10);
        assert_eq!(metrics.statuses_error, 0);

        exporter.shutdown().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn missing_service_downgrades() {
        let server =
            MockServer::start_without_arrow(MockArrowService::new(MockBehavior::AckAll, None))
                .await
                .expect("server");

        let mut config = config_for(&server.endpoint);
        config.num_streams = 3;
        config.method = StreamMethod::Traces;
        let exporter = ArrowExporter::new(config).expect("exporter");
        exporter.start();

        let outcome = timeout(
            Duration::from_secs(5),
            exporter.send_and_wait(SignalData::Traces(testdata::generate_traces(1))),
        )
        .await
        .expect("deadline")
        .expect("outcome");
        assert_eq!(outcome, SendOutcome::Downgraded);
        assert!(exporter.is_downgraded());

        // Subsequent calls resolve immediately without extra RPCs.
        let outcome = exporter
            .send_and_wait(SignalData::Logs(testdata::generate_logs(1)))
            .await
            .expect("outcome");
        assert_eq!(outcome, SendOutcome::Downgraded);
        assert_eq!(exporter.metrics().downgrade_votes, 3);

        exporter.shutdown().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn unimplemented_streams_downgrade() {
        let server = MockServer::start(MockArrowService::new(
            MockBehavior::RejectUnimplemented,
            None,
        ))
        .await
        .expect("server");

        let mut config = config_for(&server.endpoint);
        config.num_streams = 2;
        let exporter = ArrowExporter::new(config).expect("exporter");
        exporter.start();

        let outcome = timeout(
            Duration::from_secs(5),
            exporter.send_and_wait(SignalData::Metrics(testdata::generate_metrics(1))),
        )
        .await
        .expect("deadline")
        .expect("outcome");
        assert_eq!(outcome, SendOutcome::Downgraded);

        exporter.shutdown().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn permanent_server_error_keeps_stream_open() {
        let (forward_tx, mut forward_rx) = tokio::sync::mpsc::channel(16);
        // The single stream's producer numbers batches 0, 1, 2...; fail the
        // second one.
        let server = MockServer::start(MockArrowService::new(
            MockBehavior::FailBatch {
                batch_id: 1,
                error_code: ErrorCode::InvalidArgument,
                message: "test failed".to_owned(),
            },
            Some(forward_tx),
        ))
        .await
        .expect("server");

        let exporter = ArrowExporter::new(config_for(&server.endpoint)).expect("exporter");
        exporter.start();

        let logs = SignalData::Logs(testdata::generate_logs(1));
        assert_eq!(
            exporter.send_and_wait(logs.clone()).await.expect("first"),
            SendOutcome::SentArrow
        );
        let error = exporter
            .send_and_wait(logs.clone())
            .await
            .expect_err("second must fail");
        assert!(error.is_permanent());
        assert!(error.to_string().contains("test failed"));

        // The stream survived the permanent per-batch error.
        assert_eq!(
            exporter.send_and_wait(logs.clone()).await.expect("third"),
            SendOutcome::SentArrow
        );
        assert_eq!(exporter.metrics().stream_restarts, 0);

        _ = timeout(Duration::from_secs(5), forward_rx.recv())
            .await
            .expect("deadline")
            .expect("forwarded");
        exporter.shutdown().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn resource_exhausted_is_retryable() {
        let server = MockServer::start(MockArrowService::new(
            MockBehavior::FailWith {
                error_code: ErrorCode::ResourceExhausted,
                message: "slow down".to_owned(),
            },
            None,
        ))
        .await
        .expect("server");

        let exporter = ArrowExporter::new(config_for(&server.endpoint)).expect("exporter");
        exporter.start();

        let error = exporter
            .send_and_wait(SignalData::Logs(testdata::generate_logs(1)))
            .await
            .expect_err("failure expected");
        assert!(error.is_retryable());
        assert!(matches!(error, ExportError::ResourceExhausted { .. }));

        exporter.shutdown().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn eof_streams_restart_until_caller_gives_up() {
        let server =
            MockServer::start(MockArrowService::new(MockBehavior::ImmediateEof, None))
                .await
                .expect("server");

        let mut config = config_for(&server.endpoint);
        config.num_streams = 4;
        let exporter = ArrowExporter::new(config).expect("exporter");
        exporter.start();

        let result = timeout(
            Duration::from_millis(500),
            exporter.send_and_wait(SignalData::Traces(testdata::generate_traces(1))),
        )
        .await;
        assert!(result.is_err(), "EOF streams can never deliver");
        assert!(exporter.metrics().stream_restarts >= 1);

        // Shutdown completes cleanly despite the restart churn.
        timeout(Duration::from_secs(5), exporter.shutdown())
            .await
            .expect("clean shutdown");
        server.stop().await;
    }

    #[tokio::test]
    async fn best_of_n_pool_delivers() {
        let (forward_tx, mut forward_rx) = tokio::sync::mpsc::channel(64);
        let server = MockServer::start(MockArrowService::new(
            MockBehavior::AckAll,
            Some(forward_tx),
        ))
        .await
        .expect("server");

        let mut config = config_for(&server.endpoint);
        config.num_streams = 4;
        config.prioritizer = PrioritizerKind::BestOfTwo;
        let exporter = ArrowExporter::new(config).expect("exporter");
        exporter.start();

        for i in 0..12 {
            let data = SignalData::Logs(testdata::generate_logs(i % 3 + 1));
            let outcome = timeout(Duration::from_secs(5), exporter.send_and_wait(data))
                .await
                .expect("deadline")
                .expect("sent");
            assert_eq!(outcome, SendOutcome::SentArrow);
        }
        for _ in 0..12 {
            _ = timeout(Duration::from_secs(5), forward_rx.recv())
                .await
                .expect("deadline")
                .expect("forwarded");
        }

        exporter.shutdown().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn lifetime_rotates_streams() {
        let server = MockServer::start(MockArrowService::new(MockBehavior::AckAll, None))
            .await
            .expect("server");

        let mut config = config_for(&server.endpoint);
        config.max_stream_lifetime = Some(Duration::from_millis(100));
        let exporter = ArrowExporter::new(config).expect("exporter");
        exporter.start();

        let logs = SignalData::Logs(testdata::generate_logs(1));
        assert_eq!(
            exporter.send_and_wait(logs.clone()).await.expect("first"),
            SendOutcome::SentArrow
        );
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            timeout(Duration::from_secs(5), exporter.send_and_wait(logs))
                .await
                .expect("deadline")
                .expect("second"),
            SendOutcome::SentArrow
        );
        assert!(exporter.metrics().stream_restarts >= 1);

        exporter.shutdown().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn destination_starting_late_is_reached() {
        use std::sync::Arc;
        // Reserve an address, then release it so the exporter comes up
        // against nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let exporter =
            Arc::new(ArrowExporter::new(config_for(&format!("http://{addr}"))).expect("exporter"));
        exporter.start();

        let sender = exporter.clone();
        let send = tokio::spawn(async move {
            sender
                .send_and_wait(SignalData::Logs(testdata::generate_logs(1)))
                .await
        });

        // Let a few open attempts fail and back off before the destination
        // appears.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let server = MockServer::start_on(addr, MockArrowService::new(MockBehavior::AckAll, None))
            .await
            .expect("server");

        let outcome = timeout(Duration::from_secs(10), send)
            .await
            .expect("deadline")
            .expect("join")
            .expect("sent");
        assert_eq!(outcome, SendOutcome::SentArrow);
        assert!(!exporter.is_downgraded());

        exporter.shutdown().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let server = MockServer::start(MockArrowService::new(MockBehavior::AckAll, None))
            .await
            .expect("server");
        let exporter = ArrowExporter::new(config_for(&server.endpoint)).expect("exporter");
        exporter.start();
        exporter.shutdown().await;

        let error = exporter
            .send_and_wait(SignalData::Logs(testdata::generate_logs(1)))
            .await
            .expect_err("closed");
        assert_eq!(error, ExportError::Shutdown);
        server.stop().await;
    }

    #[tokio::test]
    async fn per_request_headers_are_collected() {
        use std::sync::Arc;
        let server = MockServer::start(MockArrowService::new(MockBehavior::AckAll, None))
            .await
            .expect("server");

        let mut config = config_for(&server.endpoint);
        _ = config
            .headers
            .insert("x-tenant".to_owned(), "edge-7".to_owned());
        let exporter = ArrowExporter::new(config)
            .expect("exporter")
            .with_header_provider(Arc::new(StaticHeaders(vec![(
                "authorization".to_owned(),
                "Bearer t0k3n".to_owned(),
            )])));
        exporter.start();

        assert_eq!(
            exporter
                .send_and_wait(SignalData::Logs(testdata::generate_logs(1)))
                .await
                .expect("sent"),
            SendOutcome::SentArrow
        );

        exporter.shutdown().await;
        server.stop().await;
    }
}
