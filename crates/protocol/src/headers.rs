// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Well-known per-batch header keys.
//!
//! Batch headers are HPACK-encoded and case-insensitive; receivers lowercase
//! every name before matching.

/// Uncompressed-size hint in bytes, used by the receiver for admission.
pub const OTLP_PDATA_SIZE: &str = "otlp-pdata-size";

/// W3C trace-context propagation field.
pub const TRACEPARENT: &str = "traceparent";

/// W3C trace-state propagation field.
pub const TRACESTATE: &str = "tracestate";

/// W3C baggage propagation field.
pub const BAGGAGE: &str = "baggage";

/// The propagation fields extracted into the request context rather than
/// forwarded as plain metadata.
pub const PROPAGATION_FIELDS: [&str; 3] = [TRACEPARENT, TRACESTATE, BAGGAGE];
