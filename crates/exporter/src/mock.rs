// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Scriptable in-process Arrow services for tests.
//!
//! The mock decodes batches with a real [`Consumer`], forwards the pdata to
//! an optional channel, and answers per a [`MockBehavior`] script, so
//! exporter tests exercise the full wire path.

use otap_link_codec::{Consumer, SignalData};
use otap_link_protocol::StreamMethod;
use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::{
    BatchArrowRecords, BatchStatus, ErrorCode, StatusCode, StatusMessage,
};
use otap_link_protocol::server::{
    ArrowLogsServer, ArrowMetricsServer, ArrowStreamHandler, ArrowStreamServer,
    ArrowTracesServer, BoxStatusStream,
};
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tonic::codegen::tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

/// An OK status for one batch.
#[must_use]
pub fn ok_status(batch_id: i64) -> StatusMessage {
    StatusMessage {
        batch_id,
        status_code: StatusCode::Ok as i32,
        error_code: ErrorCode::Unavailable as i32,
        error_message: String::new(),
    }
}

/// An error status for one batch.
#[must_use]
pub fn error_status(batch_id: i64, error_code: ErrorCode, message: String) -> StatusMessage {
    StatusMessage {
        batch_id,
        status_code: StatusCode::Error as i32,
        error_code: error_code as i32,
        error_message: message,
    }
}

/// How the mock answers inbound batches.
#[derive(Clone)]
pub enum MockBehavior {
    /// Decode and acknowledge every batch.
    AckAll,
    /// Close the response stream immediately after accepting the call.
    ImmediateEof,
    /// Reject the call itself with `Unimplemented`.
    RejectUnimplemented,
    /// Answer every batch with this error.
    FailWith {
        /// Error code of every answer.
        error_code: ErrorCode,
        /// Message of every answer.
        message: String,
    },
    /// Fail one batch id, acknowledge the rest.
    FailBatch {
        /// The batch to fail.
        batch_id: i64,
        /// Error code of the failing answer.
        error_code: ErrorCode,
        /// Message of the failing answer.
        message: String,
    },
}

/// A scriptable Arrow service usable for all four streaming methods.
#[derive(Clone)]
pub struct MockArrowService {
    behavior: MockBehavior,
    forward: Option<mpsc::Sender<SignalData>>,
}

impl MockArrowService {
    /// A service with the given script, optionally forwarding decoded pdata.
    #[must_use]
    pub fn new(behavior: MockBehavior, forward: Option<mpsc::Sender<SignalData>>) -> Self {
        Self { behavior, forward }
    }
}

impl ArrowStreamHandler for MockArrowService {
    fn handle(
        &self,
        request: Request<Streaming<BatchArrowRecords>>,
        _method: StreamMethod,
    ) -> BoxFuture<'static, Result<Response<BoxStatusStream>, Status>> {
        let behavior = self.behavior.clone();
        let forward = self.forward.clone();
        Box::pin(async move {
            if matches!(behavior, MockBehavior::RejectUnimplemented) {
                return Err(Status::unimplemented("arrow is disabled here"));
            }

            let mut inbound = request.into_inner();
            let (tx, rx) = mpsc::channel(100);
            _ = tokio::spawn(async move {
                if matches!(behavior, MockBehavior::ImmediateEof) {
                    // Dropping the sender ends the response stream at once.
                    return;
                }
                let mut consumer = Consumer::new();
                while let Ok(Some(mut batch)) = inbound.message().await {
                    let status = answer(&behavior, &mut consumer, &forward, &mut batch).await;
                    if tx
                        .send(Ok(BatchStatus {
                            statuses: vec![status],
                        }))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
            Ok(Response::new(
                Box::pin(ReceiverStream::new(rx)) as BoxStatusStream
            ))
        })
    }
}

async fn answer(
    behavior: &MockBehavior,
    consumer: &mut Consumer,
    forward: &Option<mpsc::Sender<SignalData>>,
    batch: &mut BatchArrowRecords,
) -> StatusMessage {
    let batch_id = batch.batch_id;
    match behavior {
        MockBehavior::FailWith {
            error_code,
            message,
        } => error_status(batch_id, *error_code, message.clone()),
        MockBehavior::FailBatch {
            batch_id: target,
            error_code,
            message,
        } if *target == batch_id => error_status(batch_id, *error_code, message.clone()),
        _ => match consumer.consume(batch) {
            Ok(data) => {
                if let Some(forward) = forward {
                    _ = forward.send(data).await;
                }
                ok_status(batch_id)
            }
            Err(error) => error_status(batch_id, ErrorCode::InvalidArgument, error.to_string()),
        },
    }
}

/// A mock server bound to an OS-assigned port.
pub struct MockServer {
    /// Endpoint to hand to the exporter config.
    pub endpoint: String,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Serve the mock behind all four streaming methods.
    pub async fn start(service: MockArrowService) -> std::io::Result<MockServer> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        Self::serve_all(listener, service)
    }

    /// Serve the mock on a specific address, for tests where the exporter
    /// starts before the destination exists.
    pub async fn start_on(
        addr: std::net::SocketAddr,
        service: MockArrowService,
    ) -> std::io::Result<MockServer> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Self::serve_all(listener, service)
    }

    fn serve_all(
        listener: tokio::net::TcpListener,
        service: MockArrowService,
    ) -> std::io::Result<MockServer> {
        let router = Server::builder()
            .add_service(ArrowTracesServer::new(service.clone()))
            .add_service(ArrowLogsServer::new(service.clone()))
            .add_service(ArrowMetricsServer::new(service.clone()))
            .add_service(ArrowStreamServer::new(service));
        Self::spawn(listener, router)
    }

    /// Serve a gRPC server that does NOT expose the method under test, so
    /// every stream-open answers `Unimplemented`. (Only the logs service is
    /// registered; point the exporter at any other method.)
    pub async fn start_without_arrow(
        service: MockArrowService,
    ) -> std::io::Result<MockServer> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let router = Server::builder().add_service(ArrowLogsServer::new(service));
        Self::spawn(listener, router)
    }

    fn spawn(
        listener: tokio::net::TcpListener,
        router: tonic::transport::server::Router,
    ) -> std::io::Result<MockServer> {
        let endpoint = format!("http://{}", listener.local_addr()?);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            _ = router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    _ = shutdown_rx.await;
                })
                .await;
        });
        Ok(MockServer {
            endpoint,
            shutdown,
            handle,
        })
    }

    /// Stop the server and wait for it to exit.
    pub async fn stop(self) {
        _ = self.shutdown.send(());
        _ = self.handle.await;
    }
}
