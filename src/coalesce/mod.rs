//! Call Coalescer
//!
//! Collapses concurrent calls for the same key into one execution. The
//! first caller for a key becomes the leader and runs the work; callers that
//! arrive while it is in flight wait on a per-key `watch` channel and receive
//! a clone of the leader's outcome.
//!
//! ```text
//!   caller A ──▶ [no record] ──▶ lead ──▶ work() ──▶ remove record ──▶ publish
//!   caller B ──▶ [record]    ──▶ wait ─────────────────────────────────▲
//!   caller C ──▶ [record]    ──▶ wait ─────────────────────────────────┘
//! ```
//!
//! The record is removed as soon as the leader finishes, success or failure,
//! so nothing is cached here: the next call after completion runs the work
//! again.
//!
//! Cancellation:
//! - A waiter whose token fires returns [`Cancelled`] on its own; the flight
//!   and the other waiters are unaffected.
//! - If the leader is cancelled (or its future dropped), the record is
//!   removed without publishing. Waiters observe the closed channel and
//!   re-enter the coalescer, where one of them leads a fresh execution.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The caller's cancellation token fired
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("call cancelled")]
pub struct Cancelled;

type Slot<T, E> = watch::Receiver<Option<Result<T, E>>>;
type Publisher<T, E> = watch::Sender<Option<Result<T, E>>>;

enum Role<T, E> {
    Lead(Publisher<T, E>),
    Wait(Slot<T, E>),
}

/// Per-key deduplication of in-flight calls
pub struct Coalescer<K, T, E> {
    calls: Mutex<HashMap<K, Slot<T, E>>>,
    executions: AtomicU64,
    waits: AtomicU64,
}

impl<K, T, E> Coalescer<K, T, E>
where
    K: Eq + Hash + Clone,
    T: Clone,
    E: Clone + From<Cancelled>,
{
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            executions: AtomicU64::new(0),
            waits: AtomicU64::new(0),
        }
    }

    /// Run `work` for `key` unless a call for `key` is already in flight, in
    /// which case wait for that call's outcome instead.
    pub async fn execute<F, Fut>(&self, key: K, cancel: &CancellationToken, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            let role = {
                let mut calls = self.calls.lock();
                match calls.get(&key).cloned() {
                    Some(slot) => Role::Wait(slot),
                    None => {
                        let (publisher, slot) = watch::channel(None);
                        calls.insert(key.clone(), slot);
                        Role::Lead(publisher)
                    }
                }
            };

            match role {
                Role::Lead(publisher) => return self.lead(key, publisher, cancel, work).await,
                Role::Wait(slot) => {
                    if let Some(outcome) = self.wait(slot, cancel).await {
                        return outcome;
                    }
                    // Leader abandoned the flight; contend for a new one
                }
            }
        }
    }

    /// Number of calls that ran their work
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    /// Number of calls that joined an in-flight call
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    /// Number of keys currently in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    async fn lead<F, Fut>(
        &self,
        key: K,
        publisher: Publisher<T, E>,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.executions.fetch_add(1, Ordering::Relaxed);
        let flight = FlightGuard {
            calls: &self.calls,
            key,
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(E::from(Cancelled)),
            outcome = work() => outcome,
        };

        // Remove the record before publishing so later callers start afresh
        drop(flight);
        publisher.send_replace(Some(outcome.clone()));
        outcome
    }

    /// `None` means the leader went away without publishing.
    async fn wait(&self, mut slot: Slot<T, E>, cancel: &CancellationToken) -> Option<Result<T, E>> {
        self.waits.fetch_add(1, Ordering::Relaxed);
        tokio::select! {
            _ = cancel.cancelled() => Some(Err(E::from(Cancelled))),
            outcome = published(&mut slot) => outcome,
        }
    }
}

async fn published<T: Clone, E: Clone>(slot: &mut Slot<T, E>) -> Option<Result<T, E>> {
    match slot.wait_for(|outcome| outcome.is_some()).await {
        Ok(outcome) => (*outcome).clone(),
        Err(_) => None,
    }
}

impl<K, T, E> Default for Coalescer<K, T, E>
where
    K: Eq + Hash + Clone,
    T: Clone,
    E: Clone + From<Cancelled>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T, E> std::fmt::Debug for Coalescer<K, T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("in_flight", &self.calls.lock().len())
            .field("executions", &self.executions.load(Ordering::Relaxed))
            .field("waits", &self.waits.load(Ordering::Relaxed))
            .finish()
    }
}

/// Removes the in-flight record when the leader finishes, is cancelled or
/// unwinds.
struct FlightGuard<'a, K: Eq + Hash, T, E> {
    calls: &'a Mutex<HashMap<K, Slot<T, E>>>,
    key: K,
}

impl<'a, K: Eq + Hash, T, E> Drop for FlightGuard<'a, K, T, E> {
    fn drop(&mut self) {
        self.calls.lock().remove(&self.key);
    }
}

// =============================================================================
// Tests
// =============================================================================
