// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! The downstream boundary: where decoded telemetry leaves the transport.

use crate::headers::RequestContext;
use async_trait::async_trait;
use opentelemetry_proto::tonic::logs::v1::LogsData;
use opentelemetry_proto::tonic::metrics::v1::MetricsData;
use opentelemetry_proto::tonic::trace::v1::TracesData;

/// How a pipeline failure maps onto the wire status.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConsumeError {
    /// Transient failure; answered `ERROR/UNAVAILABLE`, the exporter may
    /// retry.
    #[error("pipeline unavailable: {0}")]
    Transient(String),
    /// Permanent rejection; answered `ERROR/INVALID_ARGUMENT`, never
    /// retried.
    #[error("pipeline rejected data: {0}")]
    Permanent(String),
    /// Pipeline over capacity; answered `ERROR/RESOURCE_EXHAUSTED`, the
    /// exporter may retry with backoff.
    #[error("pipeline over capacity: {0}")]
    ResourceExhausted(String),
}

/// Consumes decoded telemetry, one call per accepted batch.
///
/// Calls run on their own tasks: a slow consumer delays only its own
/// batch's status, never the stream's receive loop.
#[async_trait]
pub trait PipelineConsumer: Send + Sync {
    /// Consume one traces request.
    async fn consume_traces(
        &self,
        context: RequestContext,
        traces: TracesData,
    ) -> Result<(), ConsumeError>;

    /// Consume one logs request.
    async fn consume_logs(
        &self,
        context: RequestContext,
        logs: LogsData,
    ) -> Result<(), ConsumeError>;

    /// Consume one metrics request.
    async fn consume_metrics(
        &self,
        context: RequestContext,
        metrics: MetricsData,
    ) -> Result<(), ConsumeError>;
}

/// Authenticates a batch from its merged headers before it is decoded into
/// the pipeline. A failure is fatal for the whole stream.
#[async_trait]
pub trait AuthServer: Send + Sync {
    /// Authenticate one batch's merged headers.
    async fn authenticate(&self, context: &RequestContext) -> Result<(), AuthError>;
}

/// Why authentication failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("authentication failed: {0}")]
pub struct AuthError(pub String);
