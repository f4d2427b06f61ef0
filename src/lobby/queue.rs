//! Matchmaking queue: FIFO pairing with timeout and solo fallback

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::ws::protocol::Identity;

/// Entries waiting longer than this are dropped with a timeout status
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(300);

/// Player waiting in the queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub identity: Identity,
    pub display_name: String,
    pub queued_at: Instant,
}

/// Room to start for queued players
#[derive(Debug, Clone, PartialEq)]
pub enum QueueDecision {
    Pair(QueueEntry, QueueEntry),
    Solo(QueueEntry),
}

impl QueueDecision {
    pub fn members(&self) -> Vec<&QueueEntry> {
        match self {
            QueueDecision::Pair(a, b) => vec![a, b],
            QueueDecision::Solo(a) => vec![a],
        }
    }
}

/// Result of one processing round
#[derive(Debug, Default)]
pub struct QueueRound {
    pub timed_out: Vec<Identity>,
    pub decisions: Vec<QueueDecision>,
}

pub struct MatchmakingQueue {
    entries: VecDeque<QueueEntry>,
    timeout: Duration,
}

impl MatchmakingQueue {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            timeout,
        }
    }

    /// Add a player; re-entering replaces the old entry and restarts the wait
    pub fn enqueue(&mut self, identity: Identity, display_name: String, now: Instant) {
        self.entries.retain(|e| e.identity != identity);
        self.entries.push_back(QueueEntry {
            identity,
            display_name,
            queued_at: now,
        });
    }

    pub fn dequeue(&mut self, identity: &Identity) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.identity != identity);
        self.entries.len() != before
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.iter().any(|e| &e.identity == identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop timed-out entries, pair the oldest two repeatedly, and promote
    /// a lone entry that has waited more than half the timeout
    pub fn process(&mut self, now: Instant) -> QueueRound {
        let mut round = QueueRound::default();

        let timeout = self.timeout;
        self.entries.retain(|e| {
            let expired = now.saturating_duration_since(e.queued_at) > timeout;
            if expired {
                round.timed_out.push(e.identity.clone());
            }
            !expired
        });

        while self.entries.len() >= 2 {
            if let (Some(a), Some(b)) = (self.entries.pop_front(), self.entries.pop_front()) {
                round.decisions.push(QueueDecision::Pair(a, b));
            }
        }

        let lone_waited_long = self
            .entries
            .front()
            .is_some_and(|e| now.saturating_duration_since(e.queued_at) > timeout / 2);
        if lone_waited_long {
            if let Some(entry) = self.entries.pop_front() {
                round.decisions.push(QueueDecision::Solo(entry));
            }
        }

        round
    }
}

impl Default for MatchmakingQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_TIMEOUT)
    }
}
