// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! The receiver core: service assembly and the serve loop.

use crate::config::ReceiverConfig;
use crate::handler::{HandlerSettings, StreamHandler};
use crate::metrics::{MetricsSnapshot, ReceiverMetrics};
use crate::pipeline::{AuthServer, PipelineConsumer};
use otap_link_admission::BoundedQueue;
use otap_link_protocol::server::{
    ArrowLogsServer, ArrowMetricsServer, ArrowStreamServer, ArrowTracesServer,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::codegen::tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

/// Errors surfaced by [`ArrowReceiver::serve`].
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    /// Binding the listener failed.
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
    /// The gRPC server failed.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// The configuration leaves no protocol surface enabled.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// The streaming Arrow receiver.
///
/// Registers the per-signal streaming services and the legacy mixed stream
/// (subject to the config toggles) and hands every accepted stream to its
/// own handler.
pub struct ArrowReceiver {
    config: ReceiverConfig,
    pipeline: Arc<dyn PipelineConsumer>,
    auth: Option<Arc<dyn AuthServer>>,
    admission: BoundedQueue,
    metrics: Arc<ReceiverMetrics>,
    shutdown: CancellationToken,
}

impl ArrowReceiver {
    /// Build a receiver feeding the given pipeline.
    #[must_use]
    pub fn new(config: ReceiverConfig, pipeline: Arc<dyn PipelineConsumer>) -> Self {
        let admission = match config.admission_capacity_bytes() {
            Some(capacity) => BoundedQueue::new(capacity, config.waiter_limit),
            None => BoundedQueue::unbounded(),
        };
        Self {
            config,
            pipeline,
            auth: None,
            admission,
            metrics: Arc::new(ReceiverMetrics::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Attach an authentication plugin consulted per batch.
    #[must_use]
    pub fn with_auth_server(mut self, auth: Arc<dyn AuthServer>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Token that stops the serve loop; cancellation triggers
    /// flush-on-shutdown on every open stream.
    #[must_use]
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Current counter values.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn serve(&self) -> Result<(), ReceiverError> {
        let listener = TcpListener::bind(self.config.listening_addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an existing listener until shutdown.
    pub async fn serve_with_listener(&self, listener: TcpListener) -> Result<(), ReceiverError> {
        if self.config.disable_separate_signals && self.config.disable_mixed_signals {
            return Err(ReceiverError::Config(
                "every protocol surface is disabled".to_owned(),
            ));
        }

        tracing::info!(listening_addr = %self.config.listening_addr, "arrow receiver listening");

        let handler = StreamHandler {
            pipeline: self.pipeline.clone(),
            auth: self.auth.clone(),
            admission: self.admission.clone(),
            settings: Arc::new(HandlerSettings {
                include_metadata: self.config.include_metadata,
                response_channel_size: self.config.response_stream_channel_size,
            }),
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.clone(),
        };

        let encoding = self
            .config
            .compression_method
            .as_ref()
            .map(|method| method.map_to_compression_encoding());

        let mut traces = ArrowTracesServer::new(handler.clone());
        let mut logs = ArrowLogsServer::new(handler.clone());
        let mut metrics = ArrowMetricsServer::new(handler.clone());
        let mut mixed = ArrowStreamServer::new(handler);
        if let Some(encoding) = encoding {
            traces = traces.send_compressed(encoding).accept_compressed(encoding);
            logs = logs.send_compressed(encoding).accept_compressed(encoding);
            metrics = metrics.send_compressed(encoding).accept_compressed(encoding);
            mixed = mixed.send_compressed(encoding).accept_compressed(encoding);
        }

        let mut server = Server::builder();
        let router = if self.config.disable_separate_signals {
            server.add_service(mixed)
        } else {
            let router = server
                .add_service(traces)
                .add_service(logs)
                .add_service(metrics);
            if self.config.disable_mixed_signals {
                router
            } else {
                router.add_service(mixed)
            }
        };

        let shutdown = self.shutdown.clone();
        router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await;
            })
            .await?;
        Ok(())
    }
}
