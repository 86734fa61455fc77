// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Drives one inbound bidirectional stream to completion.
//!
//! A receive loop decodes and admits batches and hands them to the pipeline
//! on their own tasks; a send loop turns completions into `BatchStatus`
//! responses, so one slow batch never blocks the statuses of the others.
//! On shutdown the send loop drains every already-accepted batch before the
//! stream closes, then surfaces `Cancelled`.

use crate::headers::{HeaderReceiver, RequestContext};
use crate::metrics::ReceiverMetrics;
use crate::pipeline::{AuthServer, ConsumeError, PipelineConsumer};
use futures::FutureExt;
use futures::future::BoxFuture;
use otap_link_admission::{AdmissionError, BoundedQueue};
use otap_link_codec::{Consumer, SignalData};
use otap_link_protocol::StreamMethod;
use otap_link_protocol::headers as wellknown;
use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::{
    BatchArrowRecords, BatchStatus, ErrorCode, StatusCode, StatusMessage,
};
use otap_link_protocol::server::{ArrowStreamHandler, BoxStatusStream};
use prost::Message;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

pub(crate) struct HandlerSettings {
    pub include_metadata: bool,
    pub response_channel_size: usize,
}

/// Shared per-receiver state; cloned per accepted stream.
#[derive(Clone)]
pub(crate) struct StreamHandler {
    pub pipeline: Arc<dyn PipelineConsumer>,
    pub auth: Option<Arc<dyn AuthServer>>,
    pub admission: BoundedQueue,
    pub settings: Arc<HandlerSettings>,
    pub metrics: Arc<ReceiverMetrics>,
    pub shutdown: CancellationToken,
}

struct BatchResp {
    batch_id: i64,
    result: Result<(), ConsumeError>,
}

impl ArrowStreamHandler for StreamHandler {
    fn handle(
        &self,
        request: Request<Streaming<BatchArrowRecords>>,
        method: StreamMethod,
    ) -> BoxFuture<'static, Result<Response<BoxStatusStream>, Status>> {
        let handler = self.clone();
        Box::pin(async move {
            let remote_addr = request.remote_addr();
            let header_rx = HeaderReceiver::new(request.metadata(), remote_addr);
            let inbound = request.into_inner();

            let size = handler.settings.response_channel_size.max(1);
            let (pending_tx, pending_rx) = mpsc::channel::<BatchResp>(size);
            let (resp_tx, resp_rx) = mpsc::channel::<Result<BatchStatus, Status>>(size);
            let in_flight = Arc::new(AtomicUsize::new(0));
            let stream_token = handler.shutdown.child_token();

            let recv_task = tokio::spawn(recv_loop(
                handler.clone(),
                stream_token.clone(),
                inbound,
                header_rx,
                method,
                pending_tx,
                in_flight.clone(),
            ));
            _ = tokio::spawn(send_loop(
                handler,
                stream_token,
                resp_tx,
                pending_rx,
                in_flight,
                recv_task,
            ));

            Ok(Response::new(
                Box::pin(ReceiverStream::new(resp_rx)) as BoxStatusStream
            ))
        })
    }
}

async fn recv_loop(
    handler: StreamHandler,
    stream_token: CancellationToken,
    mut inbound: Streaming<BatchArrowRecords>,
    mut header_rx: HeaderReceiver,
    method: StreamMethod,
    pending_tx: mpsc::Sender<BatchResp>,
    in_flight: Arc<AtomicUsize>,
) -> Result<(), Status> {
    let mut consumer = Consumer::new();
    let mut hint_mismatch_logged = false;
    loop {
        let message = tokio::select! {
            _ = stream_token.cancelled() => {
                return Err(Status::cancelled("receiver shutting down"));
            }
            message = inbound.message() => message,
        };
        let mut batch = match message {
            Ok(Some(batch)) => batch,
            Ok(None) => return Ok(()),
            Err(status) if status.code() == tonic::Code::Cancelled => return Ok(()),
            Err(status) => return Err(status),
        };
        recv_one(
            &handler,
            &stream_token,
            &mut header_rx,
            &mut consumer,
            method,
            &mut batch,
            &pending_tx,
            &in_flight,
            &mut hint_mismatch_logged,
        )
        .await?;
    }
}

/// Process one inbound batch. `Err` rejects the whole stream; per-batch
/// failures go out as error statuses instead.
async fn recv_one(
    handler: &StreamHandler,
    stream_token: &CancellationToken,
    header_rx: &mut HeaderReceiver,
    consumer: &mut Consumer,
    method: StreamMethod,
    batch: &mut BatchArrowRecords,
    pending_tx: &mpsc::Sender<BatchResp>,
    in_flight: &Arc<AtomicUsize>,
    hint_mismatch_logged: &mut bool,
) -> Result<(), Status> {
    let batch_id = batch.batch_id;
    let compressed_size = batch.encoded_len() as u64;

    // Header state is stream-wide; a decode failure poisons correlation and
    // rejects the client.
    let mut context = header_rx
        .combine(&batch.headers)
        .map_err(|error| Status::invalid_argument(error.to_string()))?;

    // Admission sizing: the exporter's uncompressed-size hint when present,
    // the compressed request size otherwise.
    let hint = context
        .metadata
        .get(wellknown::OTLP_PDATA_SIZE)
        .and_then(|values| values.first())
        .and_then(|value| value.parse::<u64>().ok());
    let provisional = hint.unwrap_or(compressed_size);

    let mut guard = tokio::select! {
        _ = stream_token.cancelled() => {
            return Err(Status::cancelled("receiver shutting down"));
        }
        admitted = handler.admission.acquire(provisional) => match admitted {
            Ok(guard) => guard,
            Err(error @ (AdmissionError::AtCapacity | AdmissionError::TooLarge { .. })) => {
                enqueue(stream_token, pending_tx, BatchResp {
                    batch_id,
                    result: Err(ConsumeError::ResourceExhausted(error.to_string())),
                })
                .await?;
                return Ok(());
            }
            Err(error) => return Err(Status::internal(error.to_string())),
        },
    };

    if let Some(auth) = &handler.auth {
        auth.authenticate(&context)
            .await
            .map_err(|error| Status::unauthenticated(error.to_string()))?;
    }

    let data = match consumer.consume(batch) {
        Ok(data) => data,
        Err(error) => {
            tracing::error!(batch_id, error = %error, "failed to decode batch, closing stream");
            return Err(Status::invalid_argument(format!("decode failed: {error}")));
        }
    };

    // Per-signal methods only carry their own signal.
    if let Some(expected) = method.expected_signal() {
        if data.signal_type() != expected {
            enqueue(stream_token, pending_tx, BatchResp {
                batch_id,
                result: Err(ConsumeError::Permanent(format!(
                    "{} batch on the {} stream",
                    data.signal_type(),
                    expected
                ))),
            })
            .await?;
            return Ok(());
        }
    }

    let true_size = data.encoded_len() as u64;
    handler.metrics.batches.inc();
    handler.metrics.items.add(data.item_count() as u64);
    handler.metrics.admitted_bytes.add(guard.bytes());

    if let Some(hint) = hint {
        if hint != true_size {
            // Keep the hinted reservation: the exporter computes hints the
            // same way for every batch, so staying consistent with it beats
            // re-admitting here.
            handler.metrics.size_hint_mismatches.inc();
            if !*hint_mismatch_logged {
                tracing::warn!(
                    batch_id,
                    hint,
                    true_size,
                    "size hint disagrees with decoded size, keeping the hinted reservation"
                );
                *hint_mismatch_logged = true;
            }
        }
    } else if true_size > provisional {
        // The compressed-size fallback undershot; grow the reservation.
        let extra = tokio::select! {
            _ = stream_token.cancelled() => {
                return Err(Status::cancelled("receiver shutting down"));
            }
            extra = handler.admission.acquire(true_size - provisional) => extra,
        };
        match extra {
            Ok(extra) => {
                handler.metrics.admitted_bytes.add(extra.bytes());
                guard.merge(extra);
            }
            Err(error @ (AdmissionError::AtCapacity | AdmissionError::TooLarge { .. })) => {
                enqueue(stream_token, pending_tx, BatchResp {
                    batch_id,
                    result: Err(ConsumeError::ResourceExhausted(error.to_string())),
                })
                .await?;
                return Ok(());
            }
            Err(error) => return Err(Status::internal(error.to_string())),
        }
    }
    // A smaller true size keeps the larger reservation rather than paying a
    // release/re-acquire cycle.

    if !handler.settings.include_metadata {
        context.metadata.clear();
    }

    _ = in_flight.fetch_add(1, Ordering::AcqRel);
    let pipeline = handler.pipeline.clone();
    let pending_tx = pending_tx.clone();
    let in_flight = in_flight.clone();
    _ = tokio::spawn(async move {
        let result = std::panic::AssertUnwindSafe(dispatch(pipeline, context, data))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ConsumeError::Permanent("pipeline panicked".to_owned())));
        drop(guard);
        _ = pending_tx.send(BatchResp { batch_id, result }).await;
        _ = in_flight.fetch_sub(1, Ordering::AcqRel);
    });
    Ok(())
}

/// Queue an immediate per-batch response. Watches the stream token so a
/// full pending channel cannot wedge the receive loop against a send loop
/// that already stopped draining.
async fn enqueue(
    stream_token: &CancellationToken,
    pending_tx: &mpsc::Sender<BatchResp>,
    resp: BatchResp,
) -> Result<(), Status> {
    tokio::select! {
        _ = stream_token.cancelled() => Err(Status::cancelled("receiver shutting down")),
        sent = pending_tx.send(resp) => {
            sent.map_err(|_| Status::cancelled("response path closed"))
        }
    }
}

async fn dispatch(
    pipeline: Arc<dyn PipelineConsumer>,
    context: RequestContext,
    data: SignalData,
) -> Result<(), ConsumeError> {
    match data {
        SignalData::Traces(traces) => pipeline.consume_traces(context, traces).await,
        SignalData::Logs(logs) => pipeline.consume_logs(context, logs).await,
        SignalData::Metrics(metrics) => pipeline.consume_metrics(context, metrics).await,
    }
}

fn batch_status(metrics: &ReceiverMetrics, resp: BatchResp) -> BatchStatus {
    let status = match resp.result {
        Ok(()) => {
            metrics.statuses_ok.inc();
            StatusMessage {
                batch_id: resp.batch_id,
                status_code: StatusCode::Ok as i32,
                error_code: 0,
                error_message: String::new(),
            }
        }
        Err(error) => {
            metrics.statuses_error.inc();
            let error_code = match &error {
                ConsumeError::Transient(_) => ErrorCode::Unavailable,
                ConsumeError::Permanent(_) => ErrorCode::InvalidArgument,
                ConsumeError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            };
            StatusMessage {
                batch_id: resp.batch_id,
                status_code: StatusCode::Error as i32,
                error_code: error_code as i32,
                error_message: error.to_string(),
            }
        }
    };
    BatchStatus {
        statuses: vec![status],
    }
}

async fn send_loop(
    handler: StreamHandler,
    stream_token: CancellationToken,
    resp_tx: mpsc::Sender<Result<BatchStatus, Status>>,
    mut pending_rx: mpsc::Receiver<BatchResp>,
    in_flight: Arc<AtomicUsize>,
    recv_task: JoinHandle<Result<(), Status>>,
) {
    let mut cancelled = false;
    let mut client_gone = false;
    loop {
        tokio::select! {
            _ = stream_token.cancelled() => {
                cancelled = true;
                break;
            }
            resp = pending_rx.recv() => match resp {
                Some(resp) => {
                    if resp_tx
                        .send(Ok(batch_status(&handler.metrics, resp)))
                        .await
                        .is_err()
                    {
                        client_gone = true;
                        break;
                    }
                }
                None => break,
            }
        }
    }

    // Stop the receive loop (it shares this token) and wait it out so no
    // new work appears behind our back.
    stream_token.cancel();
    let recv_result = recv_task.await;

    if !client_gone {
        // Flush-on-shutdown: batches the server already accepted still get
        // their statuses before the stream closes.
        loop {
            if in_flight.load(Ordering::Acquire) == 0 {
                while let Ok(resp) = pending_rx.try_recv() {
                    if resp_tx
                        .send(Ok(batch_status(&handler.metrics, resp)))
                        .await
                        .is_err()
                    {
                        client_gone = true;
                        break;
                    }
                }
                break;
            }
            match pending_rx.recv().await {
                Some(resp) => {
                    if resp_tx
                        .send(Ok(batch_status(&handler.metrics, resp)))
                        .await
                        .is_err()
                    {
                        client_gone = true;
                        break;
                    }
                }
                None => break,
            }
        }
    }
    if client_gone {
        return;
    }

    match recv_result {
        Ok(Ok(())) => {
            if cancelled {
                _ = resp_tx.send(Err(Status::cancelled("stream canceled"))).await;
            }
        }
        Ok(Err(status)) => {
            _ = resp_tx.send(Err(status)).await;
        }
        Err(join_error) => {
            tracing::error!(error = %join_error, "receive loop panicked");
            _ = resp_tx
                .send(Err(Status::internal("receive loop failed")))
                .await;
        }
    }
}
