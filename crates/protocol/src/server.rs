// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Hand-written server plumbing for the four Arrow streaming services.
//!
//! Each service routes its single method to a caller-supplied
//! [`ArrowStreamHandler`]; everything else (codec, compression negotiation,
//! unknown-path handling) matches what tonic's generated servers do. Built
//! directly on [`tonic::server::Grpc`] so no protoc step is required.

use crate::proto::opentelemetry::experimental::arrow::v1::{BatchArrowRecords, BatchStatus};
use crate::signal::StreamMethod;
use futures::Stream;
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::Poll;
use tonic::body::Body;
use tonic::codec::{CompressionEncoding, EnabledCompressionEncodings};
use tonic::server::{Grpc, NamedService, StreamingService};
use tonic::{Request, Response, Status, Streaming};
use tonic_prost::ProstCodec;

/// Response stream handed back by a stream handler.
pub type BoxStatusStream =
    Pin<Box<dyn Stream<Item = Result<BatchStatus, Status>> + Send + 'static>>;

/// Accepts one inbound bidirectional stream and produces its status stream.
///
/// The handler is cloned per accepted stream; per-stream state (decoders,
/// admission reservations) belongs in the future it returns, not in the
/// handler itself.
pub trait ArrowStreamHandler: Clone + Send + Sync + 'static {
    /// Handle one accepted stream. The request exposes the stream-level
    /// metadata and the remote address alongside the inbound messages.
    fn handle(
        &self,
        request: Request<Streaming<BatchArrowRecords>>,
        method: StreamMethod,
    ) -> BoxFuture<'static, Result<Response<BoxStatusStream>, Status>>;
}

struct HandlerStreamingService<H> {
    handler: H,
    method: StreamMethod,
}

impl<H> StreamingService<BatchArrowRecords> for HandlerStreamingService<H>
where
    H: ArrowStreamHandler,
{
    type Response = BatchStatus;
    type ResponseStream = BoxStatusStream;
    type Future = BoxFuture<'static, Result<Response<Self::ResponseStream>, Status>>;

    fn call(&mut self, request: Request<Streaming<BatchArrowRecords>>) -> Self::Future {
        self.handler.handle(request, self.method)
    }
}

/// Handle one gRPC request for `method`, decoding with the plain prost codec.
async fn route_streaming<H>(
    req: http::Request<Body>,
    handler: H,
    method: StreamMethod,
    accept_compression_encodings: EnabledCompressionEncodings,
    send_compression_encodings: EnabledCompressionEncodings,
) -> http::Response<Body>
where
    H: ArrowStreamHandler,
{
    let codec: ProstCodec<BatchStatus, BatchArrowRecords> = ProstCodec::default();
    let mut grpc = Grpc::new(codec)
        .apply_compression_config(accept_compression_encodings, send_compression_encodings);
    grpc.streaming(HandlerStreamingService { handler, method }, req)
        .await
}

/// Generate a response for a path the grpc server does not know about.
fn unimplemented_resp() -> http::Response<Body> {
    let mut response = http::Response::new(Body::default());
    let headers = response.headers_mut();
    _ = headers.insert(
        Status::GRPC_STATUS,
        (tonic::Code::Unimplemented as i32).into(),
    );
    _ = headers.insert(
        http::header::CONTENT_TYPE,
        tonic::metadata::GRPC_CONTENT_TYPE,
    );
    response
}

macro_rules! arrow_service_server {
    ($(#[$docs:meta])* $name:ident, $method:expr) => {
        $(#[$docs])*
        #[derive(Clone)]
        pub struct $name<H> {
            handler: H,
            accept_compression_encodings: EnabledCompressionEncodings,
            send_compression_encodings: EnabledCompressionEncodings,
        }

        impl<H> $name<H>
        where
            H: ArrowStreamHandler,
        {
            /// Create a server delegating accepted streams to `handler`.
            #[must_use]
            pub fn new(handler: H) -> Self {
                Self {
                    handler,
                    accept_compression_encodings: Default::default(),
                    send_compression_encodings: Default::default(),
                }
            }

            /// Enable decompressing requests with the given encoding.
            #[must_use]
            pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
                self.accept_compression_encodings.enable(encoding);
                self
            }

            /// Compress responses with the given encoding if the client supports it.
            #[must_use]
            pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
                self.send_compression_encodings.enable(encoding);
                self
            }
        }

        impl<H> tower_service::Service<http::Request<Body>> for $name<H>
        where
            H: ArrowStreamHandler,
        {
            type Response = http::Response<Body>;
            type Error = Infallible;
            type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

            fn poll_ready(
                &mut self,
                _cx: &mut std::task::Context<'_>,
            ) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, req: http::Request<Body>) -> Self::Future {
                const METHOD: StreamMethod = $method;
                if req.uri().path() == METHOD.path() {
                    let handler = self.handler.clone();
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    Box::pin(async move {
                        Ok(route_streaming(
                            req,
                            handler,
                            METHOD,
                            accept_compression_encodings,
                            send_compression_encodings,
                        )
                        .await)
                    })
                } else {
                    Box::pin(async move { Ok(unimplemented_resp()) })
                }
            }
        }

        impl<H> NamedService for $name<H> {
            const NAME: &'static str = $method.service_name();
        }
    };
}

arrow_service_server!(
    /// Server for `ArrowTracesService/ArrowTraces`.
    ArrowTracesServer,
    StreamMethod::Traces
);
arrow_service_server!(
    /// Server for `ArrowLogsService/ArrowLogs`.
    ArrowLogsServer,
    StreamMethod::Logs
);
arrow_service_server!(
    /// Server for `ArrowMetricsService/ArrowMetrics`.
    ArrowMetricsServer,
    StreamMethod::Metrics
);
arrow_service_server!(
    /// Server for the legacy mixed stream `ArrowStreamService/ArrowStream`.
    ArrowStreamServer,
    StreamMethod::Mixed
);
