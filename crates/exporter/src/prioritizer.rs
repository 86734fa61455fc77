// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Dispatch of outbound batches onto the stream pool.
//!
//! Two interchangeable policies behind one interface: *FIFO* hands the next
//! batch to the first stream that published readiness, *best-of-N* samples
//! streams and picks the least loaded. Either way, a batch ends up in one
//! stream's single-slot write queue, and ownership of the item's error
//! channel moves with it.

use crate::error::ExportError;
use otap_link_codec::SignalData;
use parking_lot::Mutex;
use rand::RngExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// One batch in flight from the caller toward a stream writer.
///
/// Created by `send_and_wait`, moved into a stream's write slot, consumed by
/// the writer loop; the error channel is retained in the stream's waiter map
/// until the matching status arrives or the stream dies.
pub(crate) struct WriteItem {
    pub records: Arc<SignalData>,
    pub headers: Vec<(String, String)>,
    pub err_tx: oneshot::Sender<Result<(), ExportError>>,
}

impl WriteItem {
    /// Complete the item's error channel without sending it.
    pub(crate) fn reject(self, err: ExportError) {
        _ = self.err_tx.send(Err(err));
    }
}

/// Per-stream dispatch state, shared between the prioritizer and the
/// stream's writer/reader tasks. Outlives individual stream incarnations:
/// a restarted stream reuses its slot's work state.
pub(crate) struct StreamWorkState {
    pub index: usize,
    to_write_tx: flume::Sender<WriteItem>,
    pub to_write_rx: flume::Receiver<WriteItem>,
    pub waiters: Mutex<HashMap<i64, oneshot::Sender<Result<(), ExportError>>>>,
    pub load: AtomicU64,
}

impl StreamWorkState {
    pub(crate) fn new(index: usize) -> Arc<Self> {
        let (to_write_tx, to_write_rx) = flume::bounded(1);
        Arc::new(Self {
            index,
            to_write_tx,
            to_write_rx,
            waiters: Mutex::new(HashMap::new()),
            load: AtomicU64::new(0),
        })
    }

    /// In-flight plus queued batches, the default load metric.
    pub(crate) fn pending(&self) -> u64 {
        self.load.load(Ordering::Relaxed) + self.to_write_rx.len() as u64
    }

    /// Complete every outstanding waiter with `StreamRestarting`.
    pub(crate) fn fail_waiters(&self) -> usize {
        let waiters: Vec<_> = {
            let mut guard = self.waiters.lock();
            guard.drain().collect()
        };
        let failed = waiters.len();
        for (_, tx) in waiters {
            _ = tx.send(Err(ExportError::StreamRestarting));
        }
        self.load.store(0, Ordering::Relaxed);
        failed
    }

    /// Reject anything sitting in the write slot.
    pub(crate) fn drain_queue(&self) {
        while let Ok(item) = self.to_write_rx.try_recv() {
            item.reject(ExportError::StreamRestarting);
        }
    }
}

/// Load metric for best-of-N sampling.
pub(crate) type LoadFn = fn(&StreamWorkState) -> f64;

/// Default load metric: in-flight plus queued batches.
pub(crate) fn pending_load(ws: &StreamWorkState) -> f64 {
    ws.pending() as f64
}

pub(crate) enum Prioritizer {
    Fifo(Box<FifoPrioritizer>),
    BestOfN(Box<BestOfNPrioritizer>),
}

pub(crate) struct FifoPrioritizer {
    ready_tx: flume::Sender<Arc<StreamWorkState>>,
    ready_rx: flume::Receiver<Arc<StreamWorkState>>,
}

pub(crate) struct BestOfNPrioritizer {
    input_tx: flume::Sender<WriteItem>,
    input_rx: flume::Receiver<WriteItem>,
    streams: Vec<Arc<StreamWorkState>>,
    sample: usize,
    load_fn: LoadFn,
    rr: AtomicUsize,
}

impl Prioritizer {
    pub(crate) fn fifo(num_streams: usize) -> Self {
        let (ready_tx, ready_rx) = flume::bounded(num_streams.max(1));
        Prioritizer::Fifo(Box::new(FifoPrioritizer { ready_tx, ready_rx }))
    }

    pub(crate) fn best_of_n(
        streams: Vec<Arc<StreamWorkState>>,
        sample: usize,
        load_fn: LoadFn,
    ) -> Self {
        // Rendezvous input: senders park until a dispatcher takes the item.
        let (input_tx, input_rx) = flume::bounded(0);
        Prioritizer::BestOfN(Box::new(BestOfNPrioritizer {
            input_tx,
            input_rx,
            streams,
            sample: sample.max(1),
            load_fn,
            rr: AtomicUsize::new(0),
        }))
    }

    /// Move one item toward a stream writer. Dropping the item (and with it
    /// the error channel) on shutdown/downgrade is deliberate: the caller
    /// re-checks those states when the channel closes.
    pub(crate) async fn dispatch(
        &self,
        item: WriteItem,
        bg: &CancellationToken,
        downgrade: &CancellationToken,
    ) {
        match self {
            Prioritizer::Fifo(fifo) => {
                tokio::select! {
                    _ = bg.cancelled() => {}
                    _ = downgrade.cancelled() => {}
                    ready = fifo.ready_rx.recv_async() => {
                        if let Ok(ws) = ready {
                            if let Err(returned) = ws.to_write_tx.send_async(item).await {
                                returned.into_inner().reject(ExportError::StreamRestarting);
                            }
                        }
                    }
                }
            }
            Prioritizer::BestOfN(best) => {
                let send = best.input_tx.send_async(item);
                tokio::select! {
                    _ = bg.cancelled() => {}
                    _ = downgrade.cancelled() => {}
                    sent = send => {
                        if let Err(returned) = sent {
                            returned.into_inner().reject(ExportError::StreamRestarting);
                        }
                    }
                }
            }
        }
    }

    /// Publish an idle stream to the ready set (FIFO only). Returns whether
    /// the stream is now published, which decides if teardown must call
    /// [`Prioritizer::unset_ready`].
    pub(crate) async fn set_ready(
        &self,
        ws: &Arc<StreamWorkState>,
        bg: &CancellationToken,
    ) -> bool {
        match self {
            Prioritizer::Fifo(fifo) => {
                tokio::select! {
                    _ = bg.cancelled() => false,
                    sent = fifo.ready_tx.send_async(ws.clone()) => sent.is_ok(),
                }
            }
            Prioritizer::BestOfN(_) => false,
        }
    }

    /// Atomically withdraw a terminating stream from the ready set.
    ///
    /// Either the stream's handle is still in the ready channel (pull it
    /// out, re-queueing any other handles met on the way), or a racing
    /// sender already took it and its item lands in our write slot, where it
    /// is rejected with `StreamRestarting` so the exporter retries.
    pub(crate) async fn unset_ready(&self, ws: &Arc<StreamWorkState>, bg: &CancellationToken) {
        let Prioritizer::Fifo(fifo) = self else {
            return;
        };
        loop {
            tokio::select! {
                _ = bg.cancelled() => return,
                ready = fifo.ready_rx.recv_async() => match ready {
                    Ok(got) => {
                        if Arc::ptr_eq(&got, ws) {
                            return;
                        }
                        if fifo.ready_tx.send_async(got).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                },
                item = ws.to_write_rx.recv_async() => {
                    if let Ok(item) = item {
                        item.reject(ExportError::StreamRestarting);
                    }
                    return;
                }
            }
        }
    }

    /// Tear down dispatch: empty the ready set and reject queued work so no
    /// caller stays parked behind a dead Arrow path.
    pub(crate) fn downgrade(&self, streams: &[Arc<StreamWorkState>]) {
        match self {
            Prioritizer::Fifo(fifo) => while fifo.ready_rx.try_recv().is_ok() {},
            Prioritizer::BestOfN(best) => {
                while let Ok(item) = best.input_rx.try_recv() {
                    item.reject(ExportError::StreamRestarting);
                }
            }
        }
        for ws in streams {
            ws.drain_queue();
        }
    }
}

impl BestOfNPrioritizer {
    /// Sample-and-pick. A sample of one degenerates to round-robin so a
    /// single-stream setup still rotates deterministically.
    fn pick(&self) -> &Arc<StreamWorkState> {
        let len = self.streams.len();
        if self.sample <= 1 || len == 1 {
            let i = self.rr.fetch_add(1, Ordering::Relaxed) % len;
            return &self.streams[i];
        }

        let mut chosen: Vec<usize> = Vec::with_capacity(self.sample.min(len));
        if self.sample >= len {
            chosen.extend(0..len);
        } else {
            let mut rng = rand::rng();
            while chosen.len() < self.sample {
                let i = rng.random_range(0..len);
                if !chosen.contains(&i) {
                    chosen.push(i);
                }
            }
            // Ties break toward the lowest stream index.
            chosen.sort_unstable();
        }

        let mut best = chosen[0];
        let mut best_load = (self.load_fn)(&self.streams[best]);
        for &i in &chosen[1..] {
            let load = (self.load_fn)(&self.streams[i]);
            if load < best_load {
                best = i;
                best_load = load;
            }
        }
        &self.streams[best]
    }

    /// One dispatcher worker; the pool runs as many of these as there are
    /// stream slots.
    pub(crate) async fn dispatch_loop(&self, bg: CancellationToken, downgrade: CancellationToken) {
        loop {
            let item = tokio::select! {
                _ = bg.cancelled() => break,
                _ = downgrade.cancelled() => break,
                item = self.input_rx.recv_async() => match item {
                    Ok(item) => item,
                    Err(_) => break,
                },
            };
            let target = self.pick();
            let send = target.to_write_tx.send_async(item);
            tokio::select! {
                _ = bg.cancelled() => break,
                // Never complete a hand-off into a slot nobody will drain
                // again; dropping the item sends its caller back around.
                _ = downgrade.cancelled() => break,
                sent = send => {
                    if let Err(returned) = sent {
                        returned.into_inner().reject(ExportError::StreamRestarting);
                    }
                }
            }
        }
        while let Ok(item) = self.input_rx.try_recv() {
            item.reject(ExportError::StreamRestarting);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otap_link_codec::testdata;

    fn test_item() -> (WriteItem, oneshot::Receiver<Result<(), ExportError>>) {
        let (err_tx, err_rx) = oneshot::channel();
        (
            WriteItem {
                records: Arc::new(SignalData::Logs(testdata::generate_logs(1))),
                headers: Vec::new(),
                err_tx,
            },
            err_rx,
        )
    }

    #[tokio::test]
    async fn fifo_hands_item_to_ready_stream() {
        let ws = StreamWorkState::new(0);
        let prioritizer = Prioritizer::fifo(1);
        let bg = CancellationToken::new();
        let downgrade = CancellationToken::new();

        assert!(prioritizer.set_ready(&ws, &bg).await);
        let (item, _err_rx) = test_item();
        prioritizer.dispatch(item, &bg, &downgrade).await;
        assert!(ws.to_write_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unset_ready_recovers_unclaimed_stream() {
        let ws = StreamWorkState::new(0);
        let prioritizer = Prioritizer::fifo(1);
        let bg = CancellationToken::new();

        assert!(prioritizer.set_ready(&ws, &bg).await);
        prioritizer.unset_ready(&ws, &bg).await;
        // The handle is gone: a dispatch now parks until downgrade.
        let (item, mut err_rx) = test_item();
        let downgrade = CancellationToken::new();
        downgrade.cancel();
        prioritizer.dispatch(item, &bg, &downgrade).await;
        assert!(err_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unset_ready_rejects_racing_sender() {
        let ws = StreamWorkState::new(0);
        let prioritizer = Prioritizer::fifo(1);
        let bg = CancellationToken::new();
        let downgrade = CancellationToken::new();

        assert!(prioritizer.set_ready(&ws, &bg).await);
        // The racing sender grabs the handle and fills the write slot.
        let (item, mut err_rx) = test_item();
        prioritizer.dispatch(item, &bg, &downgrade).await;
        // Teardown must find the racing item and fail it for retry.
        prioritizer.unset_ready(&ws, &bg).await;
        assert_eq!(
            err_rx.try_recv().expect("rejected"),
            Err(ExportError::StreamRestarting)
        );
    }

    #[tokio::test]
    async fn best_of_one_round_robins() {
        let streams: Vec<_> = (0..3).map(StreamWorkState::new).collect();
        let Prioritizer::BestOfN(best) = Prioritizer::best_of_n(streams, 1, pending_load) else {
            panic!("expected best-of-n");
        };
        let picked: Vec<usize> = (0..6).map(|_| best.pick().index).collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn best_of_n_prefers_least_loaded() {
        let streams: Vec<_> = (0..2).map(StreamWorkState::new).collect();
        streams[0].load.store(10, Ordering::Relaxed);
        let Prioritizer::BestOfN(best) = Prioritizer::best_of_n(streams, 2, pending_load) else {
            panic!("expected best-of-n");
        };
        for _ in 0..8 {
            assert_eq!(best.pick().index, 1);
        }
    }

    #[tokio::test]
    async fn downgrade_rejects_queued_items() {
        let ws = StreamWorkState::new(0);
        let prioritizer = Prioritizer::fifo(1);
        let bg = CancellationToken::new();
        let downgrade = CancellationToken::new();

        assert!(prioritizer.set_ready(&ws, &bg).await);
        let (item, mut err_rx) = test_item();
        prioritizer.dispatch(item, &bg, &downgrade).await;

        prioritizer.downgrade(std::slice::from_ref(&ws));
        assert_eq!(
            err_rx.try_recv().expect("rejected"),
            Err(ExportError::StreamRestarting)
        );
    }
}
