// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Streaming Arrow receiver of the otap-link transport.
//!
//! [`ArrowReceiver`] serves the four bidirectional streaming methods. Each
//! accepted stream runs a receive loop (stateful header decoding, byte-budget
//! admission, Arrow decoding, pipeline dispatch on per-batch tasks) and a
//! send loop emitting one `BatchStatus` per batch as its pipeline call
//! completes, out of order and without head-of-line blocking. Shutdown
//! drains the statuses of every already-accepted batch before streams close.

mod config;
mod handler;
mod headers;
mod metrics;
mod pipeline;
mod receiver;

pub use config::ReceiverConfig;
pub use headers::{HeaderError, RequestContext, TraceParent, parse_traceparent};
pub use metrics::{MetricsSnapshot, ReceiverMetrics};
pub use pipeline::{AuthError, AuthServer, ConsumeError, PipelineConsumer};
pub use receiver::{ArrowReceiver, ReceiverError};
