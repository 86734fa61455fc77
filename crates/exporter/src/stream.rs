// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! One bidirectional Arrow stream: writer loop, reader loop, and the waiter
//! correlation between them.
//!
//! The writer owns the Arrow producer and the HPACK encoder (both stateful
//! per stream); the reader owns the inbound status stream. They meet at the
//! work state's waiter map: the writer registers the batch's error channel
//! under its batch id before the batch reaches the wire, the reader resolves
//! it when the matching status arrives. A status for an id with no waiter
//! means correlation is broken and the stream restarts.

use crate::error::ExportError;
use crate::exporter::ExporterShared;
use crate::prioritizer::{StreamWorkState, WriteItem};
use otap_link_codec::Producer;
use otap_link_protocol::client::ArrowStreamClient;
use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::{
    BatchArrowRecords, BatchStatus, ErrorCode, StatusCode, StatusMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Streaming};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Why a worker returned to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerOutcome {
    /// The stream ran and terminated; respawn a replacement.
    Restart,
    /// The destination does not serve the Arrow method; one vote toward
    /// downgrading the whole exporter.
    DowngradeVote,
    /// The background context was canceled.
    Shutdown,
}

enum AttemptOutcome {
    Streamed,
    OpenFailed,
    Unsupported,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
enum StreamError {
    #[error("transport error: {0}")]
    Transport(Box<tonic::Status>),
    #[error("status for unknown batch id {0}")]
    UnknownBatchId(i64),
    #[error("unexpected status for batch {0}")]
    UnexpectedStatus(i64),
    #[error("arrow service unimplemented")]
    Unsupported,
}

/// Drive one stream slot until shutdown or a downgrade vote.
///
/// Connection-level open failures are retried here with exponential backoff
/// (a not-yet-listening destination is not a downgrade vote); a stream that
/// ran and then failed returns to the controller for a fresh worker.
pub(crate) async fn stream_worker(
    shared: Arc<ExporterShared>,
    work: Arc<StreamWorkState>,
) -> WorkerOutcome {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if shared.bg.is_cancelled() {
            return WorkerOutcome::Shutdown;
        }
        match run_stream_once(&shared, &work).await {
            AttemptOutcome::Streamed => {
                shared.metrics.stream_restarts.inc();
                return WorkerOutcome::Restart;
            }
            AttemptOutcome::Unsupported => return WorkerOutcome::DowngradeVote,
            AttemptOutcome::Shutdown => return WorkerOutcome::Shutdown,
            AttemptOutcome::OpenFailed => {
                tokio::select! {
                    _ = shared.bg.cancelled() => return WorkerOutcome::Shutdown,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn run_stream_once(
    shared: &Arc<ExporterShared>,
    work: &Arc<StreamWorkState>,
) -> AttemptOutcome {
    let mut client = ArrowStreamClient::new(shared.channel.clone(), shared.config.method);
    if let Some(compression) = &shared.config.compression_method {
        let encoding = compression.map_to_compression_encoding();
        client = client.send_compressed(encoding).accept_compressed(encoding);
    }

    let (batch_tx, batch_rx) = mpsc::channel::<BatchArrowRecords>(1);
    let outbound = ReceiverStream::new(batch_rx);

    let mut inbound = tokio::select! {
        _ = shared.bg.cancelled() => return AttemptOutcome::Shutdown,
        opened = client.open(outbound) => match opened {
            Ok(response) => response.into_inner(),
            Err(status) if status.code() == Code::Unimplemented => {
                tracing::debug!(stream = work.index, "arrow stream rejected as unimplemented");
                return AttemptOutcome::Unsupported;
            }
            Err(status) => {
                tracing::debug!(stream = work.index, error = %status, "arrow stream failed to open");
                return AttemptOutcome::OpenFailed;
            }
        }
    };

    let local = shared.bg.child_token();
    let writer = tokio::spawn(write_loop(
        shared.clone(),
        work.clone(),
        batch_tx,
        local.clone(),
    ));

    let read_result = read_loop(&mut inbound, shared, work, &local).await;
    local.cancel();
    let published = writer.await.unwrap_or(false);

    // Teardown: every still-registered waiter learns the stream is gone,
    // and the write slot is emptied so no item stays parked behind it.
    let failed = work.fail_waiters();
    if failed > 0 {
        tracing::debug!(
            stream = work.index,
            waiters = failed,
            "completed outstanding waiters after stream terminated"
        );
    }
    if published {
        shared.prioritizer.unset_ready(work, &shared.bg).await;
    }
    work.drain_queue();

    if shared.bg.is_cancelled() {
        return AttemptOutcome::Shutdown;
    }
    match read_result {
        Ok(()) => AttemptOutcome::Streamed,
        Err(StreamError::Unsupported) => {
            tracing::debug!(stream = work.index, "arrow stream reported unimplemented");
            AttemptOutcome::Unsupported
        }
        Err(error) => {
            tracing::debug!(stream = work.index, error = %error, "arrow stream terminated");
            AttemptOutcome::Streamed
        }
    }
}

async fn maybe_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Returns whether the stream is still published to the ready set, which
/// decides if teardown must withdraw it.
async fn write_loop(
    shared: Arc<ExporterShared>,
    work: Arc<StreamWorkState>,
    batch_tx: mpsc::Sender<BatchArrowRecords>,
    local: CancellationToken,
) -> bool {
    let mut producer = Producer::with_compression(shared.config.payload_compression);
    let mut hpack = fluke_hpack::Encoder::new();
    let deadline = shared
        .config
        .max_stream_lifetime
        .map(|ttl| tokio::time::Instant::now() + ttl);

    loop {
        let published = shared.prioritizer.set_ready(&work, &shared.bg).await;
        if local.is_cancelled() {
            return published;
        }

        let item = tokio::select! {
            _ = local.cancelled() => return published,
            _ = maybe_deadline(deadline) => {
                tracing::debug!(stream = work.index, "max stream lifetime reached, closing send side");
                return published;
            }
            item = work.to_write_rx.recv_async() => match item {
                Ok(item) => item,
                Err(_) => return published,
            },
        };
        let WriteItem {
            records,
            headers,
            err_tx,
        } = item;

        // An encoder panic must not escape the stream boundary; it fails
        // this one batch permanently.
        let encoded = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            producer.produce(&records)
        }));
        let mut bar = match encoded {
            Ok(Ok(bar)) => bar,
            Ok(Err(error)) => {
                tracing::error!(stream = work.index, error = %error, "failed to encode records");
                _ = err_tx.send(Err(ExportError::Encode(error.to_string())));
                continue;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(stream = work.index, error = %message, "encoder panicked");
                _ = err_tx.send(Err(ExportError::Encode(message)));
                continue;
            }
        };

        if !headers.is_empty() {
            let pairs: Vec<(&[u8], &[u8])> = headers
                .iter()
                .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
                .collect();
            bar.headers = hpack.encode(pairs);
        }

        // Register the waiter before the batch can reach the wire, so a
        // fast status never races an absent entry.
        {
            let mut waiters = work.waiters.lock();
            if waiters.contains_key(&bar.batch_id) {
                drop(waiters);
                tracing::error!(
                    stream = work.index,
                    batch_id = bar.batch_id,
                    "batch id already in flight, restarting stream"
                );
                _ = err_tx.send(Err(ExportError::StreamRestarting));
                // Correlation is broken locally; the server may never close
                // its side, so force the reader down too.
                local.cancel();
                return false;
            }
            _ = waiters.insert(bar.batch_id, err_tx);
        }
        _ = work.load.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        shared.metrics.requests.inc();
        shared.metrics.items.add(records.item_count() as u64);

        if batch_tx.send(bar).await.is_err() {
            // The transport dropped the request stream; make sure the reader
            // follows so teardown completes the registered waiter.
            local.cancel();
            return false;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "encoder panicked".to_owned()
    }
}

async fn read_loop(
    inbound: &mut Streaming<BatchStatus>,
    shared: &ExporterShared,
    work: &StreamWorkState,
    local: &CancellationToken,
) -> Result<(), StreamError> {
    loop {
        let message = tokio::select! {
            _ = local.cancelled() => return Ok(()),
            message = inbound.message() => message,
        };
        match message {
            Ok(Some(batch_status)) => process_batch_status(shared, work, batch_status)?,
            Ok(None) => return Ok(()),
            Err(status) if status.code() == Code::Unimplemented => {
                return Err(StreamError::Unsupported);
            }
            Err(status) if status.code() == Code::Cancelled => return Ok(()),
            Err(status) => return Err(StreamError::Transport(Box::new(status))),
        }
    }
}

fn process_batch_status(
    shared: &ExporterShared,
    work: &StreamWorkState,
    batch_status: BatchStatus,
) -> Result<(), StreamError> {
    for status in batch_status.statuses {
        let waiter = work.waiters.lock().remove(&status.batch_id);
        let Some(tx) = waiter else {
            // Correlation is broken; nothing on this stream can be trusted.
            return Err(StreamError::UnknownBatchId(status.batch_id));
        };
        _ = work.load.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

        let translated = translate_status(&status);
        if translated.is_ok() {
            shared.metrics.statuses_ok.inc();
        } else {
            shared.metrics.statuses_error.inc();
        }
        let fatal = matches!(translated, Err(ExportError::Unexpected { .. }));
        _ = tx.send(translated);
        if fatal {
            return Err(StreamError::UnexpectedStatus(status.batch_id));
        }
    }
    Ok(())
}

fn translate_status(status: &StatusMessage) -> Result<(), ExportError> {
    let batch_id = status.batch_id;
    let message = status.error_message.clone();
    match StatusCode::try_from(status.status_code) {
        Ok(StatusCode::Ok) => Ok(()),
        Ok(StatusCode::Error) => match ErrorCode::try_from(status.error_code) {
            Ok(ErrorCode::Unavailable) => Err(ExportError::Unavailable { batch_id, message }),
            Ok(ErrorCode::InvalidArgument) => {
                Err(ExportError::InvalidArgument { batch_id, message })
            }
            Ok(ErrorCode::ResourceExhausted) => {
                Err(ExportError::ResourceExhausted { batch_id, message })
            }
            Ok(ErrorCode::Canceled) | Ok(ErrorCode::Unknown) | Err(_) => {
                Err(ExportError::Unexpected { batch_id, message })
            }
        },
        Err(_) => Err(ExportError::Unexpected { batch_id, message }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: StatusCode, error: ErrorCode, batch_id: i64) -> StatusMessage {
        StatusMessage {
            batch_id,
            status_code: code as i32,
            error_code: error as i32,
            error_message: "test failed".to_owned(),
        }
    }

    #[test]
    fn status_translation_follows_error_codes() {
        assert!(translate_status(&status(StatusCode::Ok, ErrorCode::Unavailable, 1)).is_ok());

        let unavailable =
            translate_status(&status(StatusCode::Error, ErrorCode::Unavailable, 2)).expect_err("err");
        assert!(unavailable.is_retryable());
        assert_eq!(
            unavailable.to_string(),
            "destination unavailable: 2: test failed"
        );

        let invalid =
            translate_status(&status(StatusCode::Error, ErrorCode::InvalidArgument, 3))
                .expect_err("err");
        assert!(invalid.is_permanent());

        let exhausted =
            translate_status(&status(StatusCode::Error, ErrorCode::ResourceExhausted, 4))
                .expect_err("err");
        assert!(exhausted.is_retryable());

        let unexpected =
            translate_status(&status(StatusCode::Error, ErrorCode::Unknown, 5)).expect_err("err");
        assert!(unexpected.is_permanent());
        assert!(matches!(unexpected, ExportError::Unexpected { .. }));
    }

    #[test]
    fn unrecognized_codes_are_unexpected() {
        let raw = StatusMessage {
            batch_id: 9,
            status_code: 42,
            error_code: 0,
            error_message: String::new(),
        };
        assert!(matches!(
            translate_status(&raw),
            Err(ExportError::Unexpected { batch_id: 9, .. })
        ));
    }
}
