// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-request credentials.

use crate::error::ExportError;
use async_trait::async_trait;

/// Supplies per-request metadata (for example, a freshly minted bearer
/// token). Collected on every [`crate::ArrowExporter::send_and_wait`] call
/// and HPACK-encoded into the batch headers.
#[async_trait]
pub trait HeaderProvider: Send + Sync {
    /// Metadata to attach to the next batch.
    async fn request_metadata(&self) -> Result<Vec<(String, String)>, ExportError>;
}

/// A fixed set of headers, useful for static tokens and in tests.
#[derive(Debug, Clone)]
pub struct StaticHeaders(pub Vec<(String, String)>);

#[async_trait]
impl HeaderProvider for StaticHeaders {
    async fn request_metadata(&self) -> Result<Vec<(String, String)>, ExportError> {
        Ok(self.0.clone())
    }
}
