// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! The exporter core: stream pool lifecycle and the `send_and_wait` entry
//! point.
//!
//! The controller owns `num_streams` worker tasks. A worker whose stream
//! terminated is replaced; a worker voting "Arrow unsupported" shrinks the
//! pool, and when the vote carries unanimously the exporter downgrades:
//! every subsequent [`ArrowExporter::send_and_wait`] resolves immediately
//! with [`SendOutcome::Downgraded`] so the caller can fall back to unary
//! OTLP.

use crate::config::{ExporterConfig, PrioritizerKind};
use crate::creds::HeaderProvider;
use crate::error::ExportError;
use crate::metrics::{ExporterMetrics, MetricsSnapshot};
use crate::prioritizer::{Prioritizer, StreamWorkState, WriteItem, pending_load};
use crate::stream::{WorkerOutcome, stream_worker};
use otap_link_codec::SignalData;
use otap_link_protocol::headers;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

/// What a successful `send_and_wait` means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered over an Arrow stream and acknowledged by the destination.
    SentArrow,
    /// The Arrow path is downgraded; nothing was sent. Fall back to unary
    /// OTLP.
    Downgraded,
}

pub(crate) struct ExporterShared {
    pub config: ExporterConfig,
    pub channel: Channel,
    pub prioritizer: Prioritizer,
    pub streams: Vec<Arc<StreamWorkState>>,
    pub bg: CancellationToken,
    pub downgrade_token: CancellationToken,
    pub downgraded: AtomicBool,
    pub metrics: ExporterMetrics,
    pub creds: Option<Arc<dyn HeaderProvider>>,
}

/// The streaming Arrow exporter.
pub struct ArrowExporter {
    shared: Arc<ExporterShared>,
    controller: Mutex<Option<JoinHandle<()>>>,
}

impl ArrowExporter {
    /// Build an exporter over a lazily-connected channel. No stream is
    /// opened until [`ArrowExporter::start`].
    pub fn new(config: ExporterConfig) -> Result<Self, ExportError> {
        let endpoint = Endpoint::new(config.grpc_endpoint.clone())
            .map_err(|e| ExportError::InvalidEndpoint(e.to_string()))?;
        let channel = endpoint.connect_lazy();

        let num_streams = config.num_streams.max(1);
        let streams: Vec<_> = (0..num_streams).map(StreamWorkState::new).collect();
        let prioritizer = match config.prioritizer {
            PrioritizerKind::Fifo => Prioritizer::fifo(num_streams),
            PrioritizerKind::BestOfTwo => Prioritizer::best_of_n(streams.clone(), 2, pending_load),
            PrioritizerKind::BestOfN => {
                Prioritizer::best_of_n(streams.clone(), config.load_sample, pending_load)
            }
        };

        Ok(Self {
            shared: Arc::new(ExporterShared {
                config,
                channel,
                prioritizer,
                streams,
                bg: CancellationToken::new(),
                downgrade_token: CancellationToken::new(),
                downgraded: AtomicBool::new(false),
                metrics: ExporterMetrics::default(),
                creds: None,
            }),
            controller: Mutex::new(None),
        })
    }

    /// Attach a per-request credentials plugin. Only effective before
    /// [`ArrowExporter::start`].
    #[must_use]
    pub fn with_header_provider(mut self, provider: Arc<dyn HeaderProvider>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.creds = Some(provider);
        }
        self
    }

    /// Spawn the stream workers and the controller. Non-blocking; returns
    /// once everything is scheduled.
    pub fn start(&self) {
        let mut controller = self.controller.lock();
        if controller.is_some() {
            return;
        }

        let shared = self.shared.clone();
        let mut workers = JoinSet::new();
        for work in &shared.streams {
            let worker_shared = shared.clone();
            let work = work.clone();
            let index = work.index;
            _ = workers.spawn(async move { (index, stream_worker(worker_shared, work).await) });
        }

        let mut dispatchers = Vec::new();
        if matches!(shared.prioritizer, Prioritizer::BestOfN(_)) {
            for _ in 0..shared.streams.len() {
                let dispatcher_shared = shared.clone();
                dispatchers.push(tokio::spawn(async move {
                    if let Prioritizer::BestOfN(best) = &dispatcher_shared.prioritizer {
                        best.dispatch_loop(
                            dispatcher_shared.bg.clone(),
                            dispatcher_shared.downgrade_token.clone(),
                        )
                        .await;
                    }
                }));
            }
        }

        *controller = Some(tokio::spawn(controller_loop(shared, workers, dispatchers)));
    }

    /// Send one request over the stream pool and wait for its status.
    ///
    /// Retries transparently while streams restart; any other status is
    /// surfaced. Resolves with [`SendOutcome::Downgraded`] once the
    /// destination unanimously refused the Arrow service. Deadlines are the
    /// caller's: wrap in `tokio::time::timeout` and drop to cancel (the
    /// batch may still complete server-side).
    pub async fn send_and_wait(
        &self,
        records: impl Into<SignalData>,
    ) -> Result<SendOutcome, ExportError> {
        let records = Arc::new(records.into());
        loop {
            if self.shared.downgraded.load(Ordering::Acquire) {
                return Ok(SendOutcome::Downgraded);
            }
            if self.shared.bg.is_cancelled() {
                return Err(ExportError::Shutdown);
            }

            let headers = self.collect_headers(&records).await?;
            let (err_tx, mut err_rx) = oneshot::channel();
            let item = WriteItem {
                records: records.clone(),
                headers,
                err_tx,
            };
            self.shared
                .prioritizer
                .dispatch(item, &self.shared.bg, &self.shared.downgrade_token)
                .await;

            let result = tokio::select! {
                _ = self.shared.bg.cancelled() => return Err(ExportError::Canceled),
                // A downgrade can strand an already-dispatched item; the
                // loop head resolves to `Downgraded` without waiting on it.
                _ = self.shared.downgrade_token.cancelled() => continue,
                result = &mut err_rx => result,
            };
            match result {
                Ok(Ok(())) => return Ok(SendOutcome::SentArrow),
                Ok(Err(ExportError::StreamRestarting)) => continue,
                Ok(Err(error)) => return Err(error),
                // The error channel was dropped mid-teardown; the loop head
                // resolves against the current downgrade/shutdown state.
                Err(_) => continue,
            }
        }
    }

    async fn collect_headers(
        &self,
        records: &SignalData,
    ) -> Result<Vec<(String, String)>, ExportError> {
        let config = &self.shared.config;
        let mut out = Vec::with_capacity(config.headers.len() + 4);
        out.push((
            headers::OTLP_PDATA_SIZE.to_owned(),
            records.encoded_len().to_string(),
        ));
        for (name, value) in &config.headers {
            out.push((name.clone(), value.clone()));
        }
        if let Some(creds) = &self.shared.creds {
            out.extend(creds.request_metadata().await?);
        }
        Ok(out)
    }

    /// Whether the exporter has downgraded to the unary-OTLP fallback.
    #[must_use]
    pub fn is_downgraded(&self) -> bool {
        self.shared.downgraded.load(Ordering::Acquire)
    }

    /// Current counter values.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Cancel the background context and wait for every worker to join.
    pub async fn shutdown(&self) {
        self.shared.bg.cancel();
        let handle = self.controller.lock().take();
        if let Some(handle) = handle {
            _ = handle.await;
        }
    }
}

async fn controller_loop(
    shared: Arc<ExporterShared>,
    mut workers: JoinSet<(usize, WorkerOutcome)>,
    dispatchers: Vec<JoinHandle<()>>,
) {
    let mut running = shared.streams.len();
    let mut vote_logged = false;

    while let Some(joined) = workers.join_next().await {
        let (index, outcome) = match joined {
            Ok(pair) => pair,
            Err(join_error) => {
                // A worker panic costs its slot; the pool keeps going.
                tracing::error!(error = %join_error, "stream worker aborted");
                running = running.saturating_sub(1);
                continue;
            }
        };
        match outcome {
            WorkerOutcome::Shutdown => {}
            WorkerOutcome::Restart => {
                if !shared.bg.is_cancelled() {
                    let worker_shared = shared.clone();
                    let work = shared.streams[index].clone();
                    _ = workers
                        .spawn(async move { (index, stream_worker(worker_shared, work).await) });
                }
            }
            WorkerOutcome::DowngradeVote => {
                shared.metrics.downgrade_votes.inc();
                running = running.saturating_sub(1);
                if !vote_logged {
                    tracing::warn!(stream = index, "arrow is not supported by the destination");
                    vote_logged = true;
                }
                if running == 0 && !shared.bg.is_cancelled() {
                    tracing::warn!("downgrading to standard OTLP export");
                    shared.downgraded.store(true, Ordering::Release);
                    shared.prioritizer.downgrade(&shared.streams);
                    shared.downgrade_token.cancel();
                }
            }
        }
    }

    for handle in dispatchers {
        _ = handle.await;
    }
    // Final sweep: nothing queued may keep a caller parked after the pool
    // is gone.
    shared.prioritizer.downgrade(&shared.streams);
    for work in &shared.streams {
        _ = work.fail_waiters();
    }
}
