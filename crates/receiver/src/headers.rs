// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-stream header state: the stateful HPACK decoder and the merge of
//! per-batch headers with stream-level metadata.
//!
//! HPACK shares a dynamic table across all batches of one stream, so blocks
//! must be decoded in arrival order and a decoder error poisons the stream:
//! the client is rejected rather than risking silently corrupted headers.

use fluke_hpack::Decoder;
use otap_link_protocol::headers as wellknown;
use std::collections::HashMap;
use std::net::SocketAddr;

/// The decoded request context handed to auth and the pipeline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Merged headers: per-batch values first, stream-level metadata for
    /// keys the batch did not provide. Names are lowercased. Cleared before
    /// pipeline dispatch unless `include_metadata` is set.
    pub metadata: HashMap<String, Vec<String>>,
    /// Trace-propagation fields (`traceparent`, `tracestate`, `baggage`)
    /// moved out of the metadata into this carrier.
    pub propagation: HashMap<String, String>,
    /// Parsed W3C trace context, when `traceparent` was present and valid.
    pub trace_context: Option<TraceParent>,
    /// Peer address of the carrying connection.
    pub remote_addr: Option<SocketAddr>,
}

/// A parsed W3C `traceparent` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceParent {
    /// Version field (currently 0).
    pub version: u8,
    /// 16-byte trace id.
    pub trace_id: [u8; 16],
    /// 8-byte parent span id.
    pub span_id: [u8; 8],
    /// Trace flags (bit 0: sampled).
    pub flags: u8,
}

/// Decode failure; fatal for the carrying stream.
#[derive(Debug, thiserror::Error)]
#[error("malformed batch headers: {0}")]
pub struct HeaderError(pub String);

/// One per inbound stream; owns the HPACK decoder state and the cached
/// stream-level metadata.
pub(crate) struct HeaderReceiver {
    decoder: Decoder<'static>,
    stream_metadata: HashMap<String, Vec<String>>,
    remote_addr: Option<SocketAddr>,
}

impl HeaderReceiver {
    pub(crate) fn new(
        metadata: &tonic::metadata::MetadataMap,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let mut stream_metadata: HashMap<String, Vec<String>> = HashMap::new();
        for entry in metadata.iter() {
            if let tonic::metadata::KeyAndValueRef::Ascii(key, value) = entry {
                if let Ok(value) = value.to_str() {
                    stream_metadata
                        .entry(key.as_str().to_lowercase())
                        .or_default()
                        .push(value.to_owned());
                }
            }
        }
        Self {
            decoder: Decoder::new(),
            stream_metadata,
            remote_addr,
        }
    }

    /// Merge one batch's header block with the cached stream metadata.
    pub(crate) fn combine(&mut self, header_block: &[u8]) -> Result<RequestContext, HeaderError> {
        let mut metadata: HashMap<String, Vec<String>> = HashMap::new();
        if !header_block.is_empty() {
            self.decoder
                .decode_with_cb(header_block, |name, value| {
                    let name = String::from_utf8_lossy(&name).to_lowercase();
                    let value = String::from_utf8_lossy(&value).into_owned();
                    metadata.entry(name).or_default().push(value);
                })
                .map_err(|error| HeaderError(format!("{error:?}")))?;
        }

        // Propagation fields travel in their own carrier, not as metadata.
        let mut propagation = HashMap::new();
        for field in wellknown::PROPAGATION_FIELDS {
            if let Some(mut values) = metadata.remove(field) {
                if let Some(first) = values.drain(..).next() {
                    _ = propagation.insert(field.to_owned(), first);
                }
            }
        }

        // Stream-level metadata fills in keys the batch did not carry.
        for (key, values) in &self.stream_metadata {
            _ = metadata
                .entry(key.clone())
                .or_insert_with(|| values.clone());
        }

        let trace_context = propagation
            .get(wellknown::TRACEPARENT)
            .and_then(|value| parse_traceparent(value));

        Ok(RequestContext {
            metadata,
            propagation,
            trace_context,
            remote_addr: self.remote_addr,
        })
    }
}

fn hex_bytes<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != 2 * N || !hex.is_ascii() {
        return None;
    }
    let mut out = [0u8; N];
    for (i, chunk) in hex.as_bytes().chunks_exact(2).enumerate() {
        let pair = std::str::from_utf8(chunk).ok()?;
        out[i] = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(out)
}

/// Parse a W3C `traceparent` header (`00-<trace-id>-<parent-id>-<flags>`).
#[must_use]
pub fn parse_traceparent(value: &str) -> Option<TraceParent> {
    let mut parts = value.trim().split('-');
    let version: [u8; 1] = hex_bytes(parts.next()?)?;
    let trace_id: [u8; 16] = hex_bytes(parts.next()?)?;
    let span_id: [u8; 8] = hex_bytes(parts.next()?)?;
    let flags: [u8; 1] = hex_bytes(parts.next()?)?;
    if trace_id == [0u8; 16] || span_id == [0u8; 8] {
        return None;
    }
    Some(TraceParent {
        version: version[0],
        trace_id,
        span_id,
        flags: flags[0],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataMap;

    fn encode(headers: &[(&str, &str)]) -> Vec<u8> {
        let mut encoder = fluke_hpack::Encoder::new();
        encoder.encode(
            headers
                .iter()
                .map(|(name, value)| (name.as_bytes(), value.as_bytes())),
        )
    }

    #[test]
    fn empty_blob_publishes_stream_metadata() {
        let mut metadata = MetadataMap::new();
        _ = metadata.insert("x-tenant", "edge-7".parse().expect("value"));
        let mut receiver = HeaderReceiver::new(&metadata, None);

        let ctx = receiver.combine(&[]).expect("combine");
        assert_eq!(ctx.metadata["x-tenant"], vec!["edge-7".to_owned()]);
        assert!(ctx.propagation.is_empty());
    }

    #[test]
    fn batch_headers_override_stream_metadata() {
        let mut metadata = MetadataMap::new();
        _ = metadata.insert("x-tenant", "stream-level".parse().expect("value"));
        _ = metadata.insert("user-agent", "test-agent".parse().expect("value"));
        let mut receiver = HeaderReceiver::new(&metadata, None);

        let blob = encode(&[("X-Tenant", "batch-level")]);
        let ctx = receiver.combine(&blob).expect("combine");
        // Names are lowercased, the per-batch value wins, the untouched
        // stream key is overlaid.
        assert_eq!(ctx.metadata["x-tenant"], vec!["batch-level".to_owned()]);
        assert_eq!(ctx.metadata["user-agent"], vec!["test-agent".to_owned()]);
    }

    #[test]
    fn propagation_fields_move_to_the_carrier() {
        let mut receiver = HeaderReceiver::new(&MetadataMap::new(), None);
        let blob = encode(&[
            (
                "traceparent",
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            ),
            ("baggage", "tenant=edge-7"),
            ("otlp-pdata-size", "1234"),
        ]);
        let ctx = receiver.combine(&blob).expect("combine");
        assert!(!ctx.metadata.contains_key("traceparent"));
        assert_eq!(ctx.propagation["baggage"], "tenant=edge-7");
        assert_eq!(ctx.metadata["otlp-pdata-size"], vec!["1234".to_owned()]);

        let trace = ctx.trace_context.expect("parsed");
        assert_eq!(trace.version, 0);
        assert_eq!(trace.flags, 1);
        assert_eq!(trace.span_id[0], 0xb7);
    }

    #[test]
    fn hpack_state_spans_batches() {
        let mut receiver = HeaderReceiver::new(&MetadataMap::new(), None);
        let mut encoder = fluke_hpack::Encoder::new();

        // The second block may reference the first block's dynamic table;
        // decoding them in order must keep working.
        let first = encoder.encode([("x-tenant".as_bytes(), "edge-7".as_bytes())]);
        let second = encoder.encode([("x-tenant".as_bytes(), "edge-7".as_bytes())]);

        let ctx = receiver.combine(&first).expect("first");
        assert_eq!(ctx.metadata["x-tenant"], vec!["edge-7".to_owned()]);
        let ctx = receiver.combine(&second).expect("second");
        assert_eq!(ctx.metadata["x-tenant"], vec!["edge-7".to_owned()]);
    }

    #[test]
    fn out_of_order_blocks_fail() {
        // An indexed header field pointing into a dynamic table this stream
        // never built: the decoder must reject it rather than guess.
        let dangling_index = [0xbeu8];
        let mut receiver = HeaderReceiver::new(&MetadataMap::new(), None);
        assert!(receiver.combine(&dangling_index).is_err());
    }

    #[test]
    fn traceparent_rejects_malformed_values() {
        assert!(parse_traceparent("not-a-traceparent").is_none());
        assert!(
            parse_traceparent("00-00000000000000000000000000000000-b7ad6b7169203331-01").is_none()
        );
        assert!(
            parse_traceparent("00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01").is_none()
        );
    }
}
