// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Hand-written client for the four Arrow streaming services.
//!
//! A single generic implementation replaces the four nearly-identical
//! generated clients: the [`StreamMethod`] selects the request path at call
//! time, the codec is the plain prost codec. Built directly on
//! [`tonic::client::Grpc`] so no protoc step is required.

use crate::proto::opentelemetry::experimental::arrow::v1::{BatchArrowRecords, BatchStatus};
use crate::signal::StreamMethod;
use http::uri::PathAndQuery;
use tonic::body::Body;
use tonic::client::{Grpc, GrpcService};
use tonic::codec::CompressionEncoding;
use tonic::transport::{Channel, Endpoint};
use tonic::{GrpcMethod, IntoStreamingRequest, Response, Status, Streaming};
use tonic_prost::ProstCodec;

/// Client for one of the Arrow bidirectional streaming methods.
///
/// The same client type serves all four methods; which RPC is invoked is
/// fixed at construction by the [`StreamMethod`].
pub struct ArrowStreamClient<T = Channel> {
    inner: Grpc<T>,
    method: StreamMethod,
}

impl ArrowStreamClient<Channel> {
    /// Attempt to create a new client by connecting to a given endpoint.
    pub async fn connect<D>(dst: D, method: StreamMethod) -> Result<Self, tonic::transport::Error>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let conn = Endpoint::new(dst)?.connect().await?;
        Ok(Self::new(conn, method))
    }

    /// Create a client over a lazily-established connection. The connection
    /// is attempted when the first stream is opened, and stream-open errors
    /// surface there.
    pub fn connect_lazy<D>(dst: D, method: StreamMethod) -> Result<Self, tonic::transport::Error>
    where
        D: TryInto<Endpoint>,
        D::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let conn = Endpoint::new(dst)?.connect_lazy();
        Ok(Self::new(conn, method))
    }
}

impl<T> ArrowStreamClient<T>
where
    T: GrpcService<Body>,
    T::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    T::ResponseBody: Send + 'static,
    <T::ResponseBody as tonic::transport::Body>::Error:
        Into<Box<dyn std::error::Error + Send + Sync>> + Send,
{
    /// Create a new client over an established service.
    pub fn new(inner: T, method: StreamMethod) -> Self {
        Self {
            inner: Grpc::new(inner),
            method,
        }
    }

    /// Compress requests with the given encoding.
    ///
    /// This requires the server to support it otherwise it might respond with an
    /// error.
    #[must_use]
    pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.inner = self.inner.send_compressed(encoding);
        self
    }

    /// Enable decompressing responses.
    #[must_use]
    pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.inner = self.inner.accept_compressed(encoding);
        self
    }

    /// The method this client invokes.
    #[must_use]
    pub fn method(&self) -> StreamMethod {
        self.method
    }

    /// Open the bidirectional stream.
    ///
    /// Resolves once the server has accepted the call; a server that does not
    /// expose the Arrow service answers with `Unimplemented` here or on the
    /// first message of the returned stream.
    pub async fn open(
        &mut self,
        request: impl IntoStreamingRequest<Message = BatchArrowRecords>,
    ) -> Result<Response<Streaming<BatchStatus>>, Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {}", e.into())))?;

        let codec: ProstCodec<BatchArrowRecords, BatchStatus> = ProstCodec::default();
        let path = PathAndQuery::from_static(self.method.path());
        let mut req = request.into_streaming_request();
        _ = req.extensions_mut().insert(GrpcMethod::new(
            self.method.service_name(),
            self.method.method_name(),
        ));

        self.inner.streaming(req, path, codec).await
    }
}
