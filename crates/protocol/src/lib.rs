// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Wire protocol of the otap-link Arrow streaming transport.
//!
//! This crate holds everything both halves of the transport agree on:
//!
//! - the protobuf messages ([`proto`]): [`BatchArrowRecords`] carrying Arrow
//!   IPC payloads plus HPACK-encoded per-batch headers, answered by
//!   [`BatchStatus`] correlated on `batch_id`;
//! - signal and method identification ([`signal`]);
//! - hand-written gRPC plumbing for the four bidirectional streaming
//!   services ([`client`], [`server`]), vendored so no protoc step is needed;
//! - transport compression selection and the process-wide zstd codec
//!   registry with per-level MRU context pools ([`compression`]).
//!
//! [`BatchArrowRecords`]: proto::opentelemetry::experimental::arrow::v1::BatchArrowRecords
//! [`BatchStatus`]: proto::opentelemetry::experimental::arrow::v1::BatchStatus

pub mod client;
pub mod compression;
pub mod headers;
pub mod proto;
pub mod server;
pub mod signal;

pub use signal::{SignalType, StreamMethod};
