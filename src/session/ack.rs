//! Acknowledgment tracking
//!
//! Allocates packet identifiers and correlates PUBACK/SUBACK arrivals with
//! the caller suspended on them. Acks for unknown identifiers (never issued,
//! already completed, or already timed out) are dropped without touching any
//! pending entry.
//!
//! Dropping an [`AckHandle`] before it resolves releases its identifier, so a
//! cancelled publish never keeps one reserved.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::codec::SubscribeReturnCode;

/// Packet type a pending entry waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// PUBACK for a QoS 1 publish.
    PubAck,
    /// SUBACK for a subscribe.
    SubAck,
}

/// A resolved acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// PUBACK arrived.
    PubAck,
    /// SUBACK arrived with one code per requested filter.
    SubAck(Vec<SubscribeReturnCode>),
}

/// Why a wait ended without an ack.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AckError {
    /// No ack within the budget. The packet was transmitted and may still be
    /// processed by the broker.
    #[error("no acknowledgment for packet {packet_id} within the timeout")]
    Timeout {
        /// Identifier of the unacknowledged packet.
        packet_id: u16,
    },

    /// The connection was closed while waiting.
    #[error("wait cancelled by disconnect")]
    Cancelled,
}

type Completion = oneshot::Sender<Result<Ack, AckError>>;
type Waiter = oneshot::Receiver<Result<Ack, AckError>>;

#[derive(Debug)]
struct PendingAck {
    kind: AckKind,
    /// Registration number, telling a reused identifier from its predecessor.
    seq: u64,
    created_at: Instant,
    sender: Completion,
}

/// Handle a caller awaits for one outstanding packet identifier.
///
/// Dropping it unresolved removes the pending entry.
#[derive(Debug)]
pub struct AckHandle {
    packet_id: u16,
    seq: u64,
    receiver: Waiter,
    tracker: Weak<Mutex<Inner>>,
}

impl AckHandle {
    /// Identifier this handle waits on.
    pub fn packet_id(&self) -> u16 {
        self.packet_id
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        let Some(inner) = self.tracker.upgrade() else {
            return;
        };
        if inner.lock().remove_current(self.packet_id, self.seq) {
            tracing::trace!(packet_id = self.packet_id, "abandoned wait released its packet id");
        }
    }
}

#[derive(Debug)]
struct Inner {
    /// Last identifier handed out; 0 before the first allocation.
    last_id: u16,
    next_seq: u64,
    pending: HashMap<u16, PendingAck>,
}

impl Inner {
    /// Remove the entry for `packet_id` if it is still registration `seq`.
    fn remove_current(&mut self, packet_id: u16, seq: u64) -> bool {
        let current = self
            .pending
            .get(&packet_id)
            .is_some_and(|entry| entry.seq == seq);
        if current {
            self.pending.remove(&packet_id);
        }
        current
    }

    fn insert(&mut self, packet_id: u16, kind: AckKind) -> (u64, Waiter) {
        let (sender, receiver) = oneshot::channel();
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = PendingAck {
            kind,
            seq,
            created_at: Instant::now(),
            sender,
        };
        if let Some(previous) = self.pending.insert(packet_id, entry) {
            let _ = previous.sender.send(Err(AckError::Cancelled));
        }
        (seq, receiver)
    }
}

/// Per-connection packet identifier allocator and ack correlator.
#[derive(Debug)]
pub struct AckTracker {
    inner: Arc<Mutex<Inner>>,
}

impl AckTracker {
    /// Create an empty tracker. The first identifier handed out is 1.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                last_id: 0,
                next_seq: 0,
                pending: HashMap::new(),
            })),
        }
    }

    fn handle(&self, packet_id: u16, seq: u64, receiver: Waiter) -> AckHandle {
        AckHandle {
            packet_id,
            seq,
            receiver,
            tracker: Arc::downgrade(&self.inner),
        }
    }

    /// Next free identifier in `1..=65535`, wrapping after 65535.
    ///
    /// Identifiers still outstanding are skipped so that an ack can never be
    /// attributed to the wrong caller. Returns `None` when all 65535 are in
    /// flight.
    pub fn allocate_packet_id(&self) -> Option<u16> {
        let mut inner = self.inner.lock();
        Self::allocate_locked(&mut inner)
    }

    fn allocate_locked(inner: &mut Inner) -> Option<u16> {
        let mut candidate = inner.last_id;
        for _ in 0..u16::MAX {
            candidate = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if !inner.pending.contains_key(&candidate) {
                inner.last_id = candidate;
                return Some(candidate);
            }
        }
        None
    }

    /// Register a wait for `packet_id`.
    ///
    /// A previous wait on the same identifier is resolved as cancelled.
    pub fn register_wait(&self, packet_id: u16, kind: AckKind) -> AckHandle {
        let (seq, receiver) = self.inner.lock().insert(packet_id, kind);
        self.handle(packet_id, seq, receiver)
    }

    /// Allocate an identifier and register a wait on it in one step.
    pub fn allocate_and_register(&self, kind: AckKind) -> Option<AckHandle> {
        let (packet_id, seq, receiver) = {
            let mut inner = self.inner.lock();
            let packet_id = Self::allocate_locked(&mut inner)?;
            let (seq, receiver) = inner.insert(packet_id, kind);
            (packet_id, seq, receiver)
        };
        Some(self.handle(packet_id, seq, receiver))
    }

    /// Resolve the publish waiting on `packet_id`.
    ///
    /// Returns the time the entry was pending, or `None` when no publish is
    /// waiting on that identifier.
    pub fn on_puback(&self, packet_id: u16) -> Option<Duration> {
        self.resolve(packet_id, AckKind::PubAck, Ack::PubAck)
    }

    /// Resolve the subscribe waiting on `packet_id`.
    pub fn on_suback(&self, packet_id: u16, codes: Vec<SubscribeReturnCode>) -> Option<Duration> {
        self.resolve(packet_id, AckKind::SubAck, Ack::SubAck(codes))
    }

    fn resolve(&self, packet_id: u16, kind: AckKind, ack: Ack) -> Option<Duration> {
        let entry = {
            let mut inner = self.inner.lock();
            let waiting = inner
                .pending
                .get(&packet_id)
                .is_some_and(|entry| entry.kind == kind);
            if !waiting {
                tracing::debug!(packet_id, ?kind, "dropping ack for unknown packet id");
                return None;
            }
            inner.pending.remove(&packet_id)?
        };

        let latency = entry.created_at.elapsed();
        // The waiter may have given up already; the entry is gone either way
        let _ = entry.sender.send(Ok(ack));
        Some(latency)
    }

    /// Resolve every pending entry with [`AckError::Cancelled`].
    ///
    /// Returns how many waits were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingAck> = {
            let mut inner = self.inner.lock();
            inner.pending.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.sender.send(Err(AckError::Cancelled));
        }
        count
    }

    /// Number of outstanding identifiers.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether `packet_id` is outstanding.
    pub fn is_pending(&self, packet_id: u16) -> bool {
        self.inner.lock().pending.contains_key(&packet_id)
    }

    /// Suspend until the ack for `handle` arrives or `timeout` elapses.
    ///
    /// On timeout the entry is removed, so a late ack is dropped instead of
    /// reviving the failed wait.
    pub async fn await_with_timeout(
        &self,
        mut handle: AckHandle,
        timeout: Duration,
    ) -> Result<Ack, AckError> {
        let packet_id = handle.packet_id;

        match tokio::time::timeout(timeout, &mut handle.receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AckError::Cancelled),
            Err(_) => {
                if self.inner.lock().remove_current(packet_id, handle.seq) {
                    tracing::warn!(packet_id, ?timeout, "acknowledgment timed out");
                    return Err(AckError::Timeout { packet_id });
                }
                // Resolved between the deadline and the removal
                match handle.receiver.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AckError::Timeout { packet_id }),
                }
            }
        }
    }
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::codec::QoS;

    const BUDGET: Duration = Duration::from_secs(5);

    #[test]
    fn test_ids_start_at_one_and_wrap() {
        let tracker = AckTracker::new();
        assert_eq!(tracker.allocate_packet_id(), Some(1));
        assert_eq!(tracker.allocate_packet_id(), Some(2));

        tracker.inner.lock().last_id = u16::MAX - 1;
        assert_eq!(tracker.allocate_packet_id(), Some(u16::MAX));
        assert_eq!(tracker.allocate_packet_id(), Some(1));
    }

    #[test]
    fn test_allocation_skips_outstanding_ids() {
        let tracker = AckTracker::new();
        let _h1 = tracker.register_wait(1, AckKind::PubAck);
        let _h3 = tracker.register_wait(3, AckKind::PubAck);

        assert_eq!(tracker.allocate_packet_id(), Some(2));
        assert_eq!(tracker.allocate_packet_id(), Some(4));
    }

    #[test]
    fn test_exhaustion() {
        let tracker = AckTracker::new();
        let handles: Vec<_> = (0..u16::MAX)
            .map(|_| tracker.allocate_and_register(AckKind::PubAck).unwrap())
            .collect();
        assert_eq!(tracker.pending_count(), 65535);
        assert_eq!(tracker.allocate_packet_id(), None);

        tracker.on_puback(handles[100].packet_id());
        assert_eq!(tracker.allocate_packet_id(), Some(101));
    }

    #[test]
    fn test_unknown_ack_is_noop() {
        let tracker = AckTracker::new();
        let _handle = tracker.register_wait(7, AckKind::PubAck);

        assert_eq!(tracker.on_puback(8), None);
        // A SUBACK does not complete a publish wait
        assert_eq!(tracker.on_suback(7, vec![]), None);
        assert!(tracker.is_pending(7));
        assert_eq!(tracker.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_scrambled_acks_resolve_each_once() {
        let tracker = Arc::new(AckTracker::new());
        let handles: Vec<_> = (0..16)
            .map(|_| tracker.allocate_and_register(AckKind::PubAck).unwrap())
            .collect();
        let ids: Vec<u16> = handles.iter().map(AckHandle::packet_id).collect();

        let waits: Vec<_> = handles
            .into_iter()
            .map(|handle| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.await_with_timeout(handle, BUDGET).await })
            })
            .collect();

        for &id in ids.iter().rev().step_by(2).chain(ids.iter().step_by(2)) {
            assert!(tracker.on_puback(id).is_some());
        }
        // Duplicates are dropped
        assert_eq!(tracker.on_puback(ids[0]), None);

        for wait in waits {
            assert_eq!(wait.await.unwrap(), Ok(Ack::PubAck));
        }
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_ack() {
        let tracker = AckTracker::new();
        let handle = tracker.allocate_and_register(AckKind::PubAck).unwrap();
        let id = handle.packet_id();

        let result = tracker.await_with_timeout(handle, BUDGET).await;
        assert_eq!(result, Err(AckError::Timeout { packet_id: id }));
        assert!(!tracker.is_pending(id));

        assert_eq!(tracker.on_puback(id), None);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_before_deadline() {
        let tracker = Arc::new(AckTracker::new());
        let handle = tracker.allocate_and_register(AckKind::SubAck).unwrap();
        let id = handle.packet_id();

        let acker = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            acker.on_suback(id, vec![SubscribeReturnCode::Granted(QoS::AtLeastOnce)]);
        });

        let result = tracker.await_with_timeout(handle, BUDGET).await;
        assert_eq!(
            result,
            Ok(Ack::SubAck(vec![SubscribeReturnCode::Granted(QoS::AtLeastOnce)]))
        );
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let tracker = AckTracker::new();
        let a = tracker.allocate_and_register(AckKind::PubAck).unwrap();
        let b = tracker.allocate_and_register(AckKind::SubAck).unwrap();

        assert_eq!(tracker.cancel_all(), 2);
        assert_eq!(tracker.await_with_timeout(a, BUDGET).await, Err(AckError::Cancelled));
        assert_eq!(tracker.await_with_timeout(b, BUDGET).await, Err(AckError::Cancelled));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_dropped_handle_releases_id() {
        let tracker = AckTracker::new();
        let handle = tracker.allocate_and_register(AckKind::PubAck).unwrap();
        let id = handle.packet_id();
        assert!(tracker.is_pending(id));

        drop(handle);
        assert!(!tracker.is_pending(id));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_stale_handle_leaves_newer_wait() {
        let tracker = AckTracker::new();
        let stale = tracker.register_wait(5, AckKind::PubAck);
        let _current = tracker.register_wait(5, AckKind::PubAck);

        drop(stale);
        assert!(tracker.is_pending(5));
        assert!(tracker.on_puback(5).is_some());
    }

    #[tokio::test]
    async fn test_cancelled_wait_releases_id() {
        let tracker = AckTracker::new();
        let handle = tracker.allocate_and_register(AckKind::SubAck).unwrap();

        let wait = tracker.await_with_timeout(handle, BUDGET);
        assert!(
            tokio::time::timeout(Duration::from_millis(10), wait)
                .await
                .is_err()
        );
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_handle_outliving_tracker() {
        let tracker = AckTracker::new();
        let handle = tracker.allocate_and_register(AckKind::PubAck).unwrap();
        drop(tracker);
        drop(handle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_reported() {
        let tracker = AckTracker::new();
        let _handle = tracker.register_wait(1, AckKind::PubAck);
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(tracker.on_puback(1), Some(Duration::from_millis(250)));
    }
}
