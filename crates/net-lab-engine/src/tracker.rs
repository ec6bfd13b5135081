//! Bookkeeping for packets that are on the wire and not yet settled.
//!
//! The send path registers packets, the receive path and the per-packet
//! timeout timers race to resolve them. Whoever resolves first wins; every
//! later attempt for the same sequence number is a no-op.

use chrono::{DateTime, Utc};
use net_lab_abstract::{PacketOutcome, PacketStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Everything the engine's tasks report back to the task driving a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    /// A packet left the socket. Progress only.
    Sent(PacketOutcome),
    /// A packet reached its terminal state. Emitted exactly once per sequence.
    Settled(PacketOutcome),
    /// Transport problem that does not end the run.
    Warning(String),
}

#[derive(Debug)]
struct PendingPacket {
    sent_at: Instant,
    sent_wall: DateTime<Utc>,
    timeout: JoinHandle<()>,
}

pub struct PendingTracker {
    pending: Mutex<HashMap<u32, PendingPacket>>,
    events: mpsc::UnboundedSender<ProbeEvent>,
}

impl PendingTracker {
    pub fn new(events: mpsc::UnboundedSender<ProbeEvent>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Start tracking `seq` and arm its loss timer.
    ///
    /// `sent_at` is the local monotonic send time used for the round trip,
    /// `sent_wall` the wall-clock stamp reported with the outcome. Must be
    /// called from within a tokio runtime.
    pub fn register(
        self: &Arc<Self>,
        seq: u32,
        sent_at: Instant,
        sent_wall: DateTime<Utc>,
        timeout: Duration,
    ) {
        let tracker: Weak<Self> = Arc::downgrade(self);
        let mut pending = self.pending.lock();
        // The map lock is held until the entry is in place, so the timer can
        // never observe the sequence as unknown.
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tracker) = tracker.upgrade() {
                tracker.resolve(seq, PacketStatus::Lost);
            }
        });
        let replaced = pending.insert(
            seq,
            PendingPacket {
                sent_at,
                sent_wall,
                timeout: timer,
            },
        );
        if let Some(old) = replaced {
            old.timeout.abort();
        }
    }

    /// Settle `seq` as `Received` or `Lost`.
    ///
    /// Returns `true` only for the call that actually removed the packet; that
    /// call also publishes the outcome. Unknown or already settled sequences
    /// and non-terminal statuses return `false` and change nothing.
    pub fn resolve(&self, seq: u32, status: PacketStatus) -> bool {
        if !status.is_terminal() {
            return false;
        }
        let Some(packet) = self.pending.lock().remove(&seq) else {
            debug!("seq {} already settled or unknown, ignoring {:?}", seq, status);
            return false;
        };
        let settled_at = Instant::now();
        // Aborting from inside the firing timer is harmless: the timer task
        // has no suspension point left after calling resolve.
        packet.timeout.abort();

        let outcome = match status {
            PacketStatus::Received => {
                let rtt = settled_at.saturating_duration_since(packet.sent_at);
                PacketOutcome::received(seq, packet.sent_wall, rtt.as_secs_f64() * 1000.0)
            }
            _ => PacketOutcome::lost(seq, packet.sent_wall),
        };
        debug!("seq {} settled as {:?}", seq, outcome.status);
        // The receiver only goes away once the run is over.
        let _ = self.events.send(ProbeEvent::Settled(outcome));
        true
    }

    /// Forget every pending packet without publishing anything.
    pub fn cancel_all(&self) {
        let drained: Vec<PendingPacket> = self.pending.lock().drain().map(|(_, p)| p).collect();
        for packet in drained {
            packet.timeout.abort();
        }
    }

    pub fn is_pending(&self, seq: u32) -> bool {
        self.pending.lock().contains_key(&seq)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for PendingTracker {
    fn drop(&mut self) {
        for (_, packet) in self.pending.get_mut().drain() {
            packet.timeout.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (Arc<PendingTracker>, mpsc::UnboundedReceiver<ProbeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PendingTracker::new(tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_is_exactly_once() {
        let (tracker, mut rx) = tracker();
        tracker.register(1, Instant::now(), Utc::now(), Duration::from_secs(2));

        tokio::time::advance(Duration::from_millis(15)).await;
        assert!(tracker.resolve(1, PacketStatus::Received));
        assert!(!tracker.resolve(1, PacketStatus::Received));
        assert!(!tracker.resolve(1, PacketStatus::Lost));

        match rx.recv().await.unwrap() {
            ProbeEvent::Settled(outcome) => {
                assert_eq!(outcome.seq, 1);
                assert_eq!(outcome.status, PacketStatus::Received);
                assert!(outcome.rtt_ms.unwrap() >= 15.0);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // The cancelled timer must not produce a second outcome.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_lost() {
        let (tracker, mut rx) = tracker();
        tracker.register(4, Instant::now(), Utc::now(), Duration::from_millis(2000));
        assert!(tracker.is_pending(4));

        match rx.recv().await.unwrap() {
            ProbeEvent::Settled(outcome) => {
                assert_eq!(outcome.seq, 4);
                assert_eq!(outcome.status, PacketStatus::Lost);
                assert!(outcome.rtt_ms.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!tracker.is_pending(4));

        // A reply that shows up after the timeout is ignored.
        assert!(!tracker.resolve(4, PacketStatus::Received));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_sent_are_ignored() {
        let (tracker, mut rx) = tracker();
        assert!(!tracker.resolve(99, PacketStatus::Received));

        tracker.register(1, Instant::now(), Utc::now(), Duration::from_secs(1));
        assert!(!tracker.resolve(1, PacketStatus::Sent));
        assert!(tracker.is_pending(1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_is_silent() {
        let (tracker, mut rx) = tracker();
        for seq in 1..=3 {
            tracker.register(seq, Instant::now(), Utc::now(), Duration::from_millis(500));
        }
        assert_eq!(tracker.pending_count(), 3);

        tracker.cancel_all();
        assert_eq!(tracker.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolvers_single_winner() {
        let (tracker, mut rx) = tracker();
        for seq in 1..=50 {
            tracker.register(seq, Instant::now(), Utc::now(), Duration::from_millis(1));
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                (1..=50)
                    .filter(|seq| tracker.resolve(*seq, PacketStatus::Received))
                    .count()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            wins += handle.await.unwrap();
        }

        // Let any timer that won a race publish before counting.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut settled = 0;
        let mut received = 0;
        while let Ok(event) = rx.try_recv() {
            let ProbeEvent::Settled(outcome) = event else {
                panic!("unexpected event");
            };
            settled += 1;
            if outcome.status == PacketStatus::Received {
                received += 1;
            }
        }
        assert_eq!(settled, 50);
        assert_eq!(wins, received);
        assert_eq!(tracker.pending_count(), 0);
    }
}
