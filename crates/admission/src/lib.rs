// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Byte-budget admission control.
//!
//! [`BoundedQueue`] is a counting semaphore denominated in bytes, with a cap
//! on the number of parked waiters and full cancellation awareness. The
//! receiver sizes reservations from the exporter's uncompressed-size hint
//! (or, lacking one, the compressed request size) and releases them when the
//! downstream pipeline is done with the decoded data.
//!
//! Invariants:
//!
//! - `in_flight <= capacity` at every quiescent point;
//! - an [`acquire`](BoundedQueue::acquire) that returned `Ok` pairs with
//!   exactly one release (the [`AdmissionGuard`] enforces this on drop);
//! - waiters are woken in FIFO order, and a cancelled waiter is never
//!   counted against the budget nor left parked.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Rejections surfaced by [`BoundedQueue::acquire`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// A single request larger than the whole budget can never be admitted.
    #[error("rejecting request: {requested} bytes exceeds the {capacity} byte admission capacity")]
    TooLarge {
        /// Bytes requested.
        requested: u64,
        /// Configured capacity.
        capacity: u64,
    },
    /// The budget is exhausted and the waiter cap is reached; the caller
    /// should shed load rather than park.
    #[error("rejecting request: too much pending data, waiter limit reached")]
    AtCapacity,
    /// The queue was torn down while the caller was parked. Not reachable
    /// through the public API in practice.
    #[error("admission queue closed")]
    Closed,
}

struct Waiter {
    id: u64,
    n: u64,
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
struct State {
    in_flight: u64,
    next_waiter_id: u64,
    waiters: VecDeque<Waiter>,
    // Waiter ids whose grant was undone because the receiver half was gone
    // at wake time; reconciled against the waiter's own cleanup.
    aborted: HashSet<u64>,
}

struct Shared {
    capacity: Option<u64>,
    waiter_cap: usize,
    state: Mutex<State>,
}

impl Shared {
    fn release_locked(&self, st: &mut State, n: u64) {
        st.in_flight = st.in_flight.saturating_sub(n);
        let Some(capacity) = self.capacity else {
            return;
        };
        loop {
            let fits = match st.waiters.front() {
                Some(w) => st.in_flight + w.n <= capacity,
                None => break,
            };
            if !fits {
                // Strict FIFO: never let a smaller later waiter overtake.
                break;
            }
            let Some(w) = st.waiters.pop_front() else {
                break;
            };
            st.in_flight += w.n;
            if w.tx.send(()).is_err() {
                st.in_flight = st.in_flight.saturating_sub(w.n);
                _ = st.aborted.insert(w.id);
            }
        }
    }
}

/// A byte-denominated semaphore with a waiter cap.
///
/// Cheap to clone; all clones share the same budget.
#[derive(Clone)]
pub struct BoundedQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BoundedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.shared.capacity)
            .field("waiter_cap", &self.shared.waiter_cap)
            .finish()
    }
}

impl BoundedQueue {
    /// A queue admitting up to `capacity_bytes` in-flight bytes, parking at
    /// most `waiter_cap` callers beyond that.
    #[must_use]
    pub fn new(capacity_bytes: u64, waiter_cap: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: Some(capacity_bytes),
                waiter_cap,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// A queue that admits everything while still accounting in-flight bytes.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: None,
                waiter_cap: 0,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Reserve `n` bytes, parking until they fit.
    ///
    /// Fails fast with [`AdmissionError::AtCapacity`] when the waiter cap is
    /// reached and with [`AdmissionError::TooLarge`] when `n` exceeds the
    /// whole budget. Cancellation-safe: dropping the returned future while
    /// parked unparks cleanly and returns any already-granted bytes.
    pub async fn acquire(&self, n: u64) -> Result<AdmissionGuard, AdmissionError> {
        let (id, rx) = {
            let mut st = self.shared.state.lock();
            match self.shared.capacity {
                None => {
                    st.in_flight += n;
                    return Ok(AdmissionGuard::new(self.clone(), n));
                }
                Some(capacity) => {
                    if n > capacity {
                        return Err(AdmissionError::TooLarge {
                            requested: n,
                            capacity,
                        });
                    }
                    if st.waiters.is_empty() && st.in_flight + n <= capacity {
                        st.in_flight += n;
                        return Ok(AdmissionGuard::new(self.clone(), n));
                    }
                    if st.waiters.len() >= self.shared.waiter_cap {
                        return Err(AdmissionError::AtCapacity);
                    }
                    let id = st.next_waiter_id;
                    st.next_waiter_id += 1;
                    let (tx, rx) = oneshot::channel();
                    st.waiters.push_back(Waiter { id, n, tx });
                    (id, rx)
                }
            }
        };

        let mut pending = PendingWaiter {
            shared: &self.shared,
            id,
            n,
            armed: true,
        };
        match rx.await {
            Ok(()) => {
                pending.armed = false;
                Ok(AdmissionGuard::new(self.clone(), n))
            }
            Err(_) => {
                pending.armed = false;
                Err(AdmissionError::Closed)
            }
        }
    }

    /// Return `n` bytes to the budget, waking every waiter that now fits.
    fn release(&self, n: u64) {
        let mut st = self.shared.state.lock();
        self.shared.release_locked(&mut st, n);
    }

    /// Bytes currently admitted.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.shared.state.lock().in_flight
    }

    /// Callers currently parked.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Configured capacity, `None` when unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<u64> {
        self.shared.capacity
    }
}

/// Removes a parked waiter when its acquire future is dropped mid-wait.
struct PendingWaiter<'a> {
    shared: &'a Shared,
    id: u64,
    n: u64,
    armed: bool,
}

impl Drop for PendingWaiter<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut st = self.shared.state.lock();
        if let Some(pos) = st.waiters.iter().position(|w| w.id == self.id) {
            _ = st.waiters.remove(pos);
        } else if !st.aborted.remove(&self.id) {
            // The grant raced our cancellation; hand the bytes back.
            self.shared.release_locked(&mut st, self.n);
        }
    }
}

/// An admitted reservation. Dropping it releases the bytes.
#[must_use]
#[derive(Debug)]
pub struct AdmissionGuard {
    queue: BoundedQueue,
    n: u64,
}

impl AdmissionGuard {
    fn new(queue: BoundedQueue, n: u64) -> Self {
        Self { queue, n }
    }

    /// Bytes held by this reservation.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.n
    }

    /// Fold another reservation from the same queue into this one.
    pub fn merge(&mut self, other: AdmissionGuard) {
        self.n += other.defuse();
    }

    /// Take over the byte count, leaving the guard inert.
    fn defuse(mut self) -> u64 {
        std::mem::take(&mut self.n)
    }

    /// Release explicitly; equivalent to dropping the guard.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if self.n > 0 {
            self.queue.release(self.n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn admits_within_capacity() {
        let q = BoundedQueue::new(100, 4);
        let a = q.acquire(60).await.expect("fits");
        let b = q.acquire(40).await.expect("fits exactly");
        assert_eq!(q.in_flight(), 100);
        drop(a);
        assert_eq!(q.in_flight(), 40);
        drop(b);
        assert_eq!(q.in_flight(), 0);
    }

    #[tokio::test]
    async fn oversized_request_rejected_immediately() {
        let q = BoundedQueue::new(100, 4);
        let err = q.acquire(101).await.expect_err("too large");
        assert_eq!(
            err,
            AdmissionError::TooLarge {
                requested: 101,
                capacity: 100
            }
        );
    }

    #[tokio::test]
    async fn blocks_until_release() {
        let q = BoundedQueue::new(100, 4);
        let held = q.acquire(80).await.expect("fits");

        let q2 = q.clone();
        let parked = tokio::spawn(async move { q2.acquire(50).await });
        tokio::task::yield_now().await;
        assert_eq!(q.waiters(), 1);

        drop(held);
        let guard = timeout(Duration::from_secs(1), parked)
            .await
            .expect("woken")
            .expect("join")
            .expect("admitted");
        assert_eq!(guard.bytes(), 50);
        assert_eq!(q.in_flight(), 50);
    }

    #[tokio::test]
    async fn waiter_cap_fails_fast() {
        let q = BoundedQueue::new(100, 1);
        let _held = q.acquire(100).await.expect("fits");

        let q2 = q.clone();
        let _parked = tokio::spawn(async move {
            let g = q2.acquire(10).await;
            // keep the reservation alive until the test ends
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(g);
        });
        tokio::task::yield_now().await;
        assert_eq!(q.waiters(), 1);

        let err = q.acquire(10).await.expect_err("waiter cap reached");
        assert_eq!(err, AdmissionError::AtCapacity);
    }

    #[tokio::test]
    async fn wakeups_are_fifo() {
        let q = BoundedQueue::new(100, 8);
        let held = q.acquire(100).await.expect("fits");

        let (first_tx, first_rx) = oneshot::channel();
        let q1 = q.clone();
        let _first = tokio::spawn(async move {
            let g = q1.acquire(30).await.expect("admitted");
            _ = first_tx.send(());
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(g);
        });
        tokio::task::yield_now().await;

        let (second_tx, second_rx) = oneshot::channel();
        let q2 = q.clone();
        let _second = tokio::spawn(async move {
            let g = q2.acquire(10).await.expect("admitted");
            _ = second_tx.send(());
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(g);
        });
        tokio::task::yield_now().await;
        assert_eq!(q.waiters(), 2);

        drop(held);
        // The head waiter (30 bytes) wins even though the later 10-byte
        // request also fits.
        timeout(Duration::from_secs(1), first_rx)
            .await
            .expect("first woken")
            .expect("sent");
        timeout(Duration::from_secs(1), second_rx)
            .await
            .expect("second woken")
            .expect("sent");
        assert_eq!(q.in_flight(), 40);
    }

    #[tokio::test]
    async fn head_of_line_blocks_smaller_waiters() {
        let q = BoundedQueue::new(100, 8);
        let held = q.acquire(90).await.expect("fits");

        let q1 = q.clone();
        let big = tokio::spawn(async move { q1.acquire(100).await });
        tokio::task::yield_now().await;

        // 10 bytes are free, but the queue is non-empty: FIFO order wins.
        let q2 = q.clone();
        let small = tokio::spawn(async move { q2.acquire(10).await });
        tokio::task::yield_now().await;
        assert_eq!(q.waiters(), 2);

        drop(held);
        let big_guard = timeout(Duration::from_secs(1), big)
            .await
            .expect("big woken")
            .expect("join")
            .expect("admitted");
        assert_eq!(q.waiters(), 1);
        drop(big_guard);
        _ = timeout(Duration::from_secs(1), small)
            .await
            .expect("small woken")
            .expect("join")
            .expect("admitted");
    }

    #[tokio::test]
    async fn cancelled_waiter_leaks_nothing() {
        let q = BoundedQueue::new(100, 8);
        let held = q.acquire(100).await.expect("fits");

        let q1 = q.clone();
        let cancelled = tokio::spawn(async move {
            let _ = q1.acquire(50).await;
        });
        tokio::task::yield_now().await;
        assert_eq!(q.waiters(), 1);
        cancelled.abort();
        _ = cancelled.await;
        assert_eq!(q.waiters(), 0);

        drop(held);
        assert_eq!(q.in_flight(), 0);
        // Budget fully available again.
        let g = q.acquire(100).await.expect("fits");
        drop(g);
    }

    #[tokio::test]
    async fn merge_folds_reservations() {
        let q = BoundedQueue::new(100, 4);
        let mut a = q.acquire(30).await.expect("fits");
        let b = q.acquire(20).await.expect("fits");
        a.merge(b);
        assert_eq!(a.bytes(), 50);
        assert_eq!(q.in_flight(), 50);
        drop(a);
        assert_eq!(q.in_flight(), 0);
    }

    #[tokio::test]
    async fn unbounded_admits_everything() {
        let q = BoundedQueue::unbounded();
        let a = q.acquire(u64::MAX / 2).await.expect("admitted");
        assert_eq!(q.in_flight(), u64::MAX / 2);
        drop(a);
        assert_eq!(q.in_flight(), 0);
    }
}
