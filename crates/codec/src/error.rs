// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Codec error type.

use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::ArrowPayloadType;

/// Errors produced while encoding or decoding Arrow payloads.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Arrow-level failure (builder, IPC serialization, invalid layout).
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// A batch mixed payloads of more than one top-level signal.
    #[error("batch mixes payloads of different signals")]
    MixedSignalBatch,

    /// A batch carried no payloads at all.
    #[error("batch carries no payloads")]
    EmptyBatch,

    /// Payload type unknown to this decoder.
    #[error("unsupported payload type {0}")]
    UnsupportedPayloadType(i32),

    /// The encoder only supports gauge and sum metrics.
    #[error("unsupported metric data kind: {0}")]
    UnsupportedMetricData(&'static str),

    /// An Arrow IPC payload decoded to no record batch.
    #[error("payload {0:?} contains no record batch")]
    MissingRecordBatch(ArrowPayloadType),

    /// A required column is absent or mistyped.
    #[error("payload {payload:?}: invalid column {column}")]
    InvalidColumn {
        /// Payload the column belongs to.
        payload: ArrowPayloadType,
        /// Column name.
        column: &'static str,
    },

    /// Row ids are 16-bit; larger batches must be split upstream.
    #[error("too many rows for one batch: {0} exceeds u16 id space")]
    TooManyRows(usize),

    /// A serialized attribute value could not be decoded.
    #[error("malformed serialized attribute value: {0}")]
    MalformedSerializedValue(String),
}
