//! Matchmaking Queue
//!
//! Players waiting for an opponent, in arrival order. Matching is
//! first-fit: the earliest waiter within the trophy range wins, even if a
//! later waiter is closer.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::network::connection::{ConnectionHandle, PlayerIdentity};

/// Matchmaking queue entry.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Waiting player.
    pub identity: PlayerIdentity,
    /// The player's connection.
    pub handle: ConnectionHandle,
    /// When the player joined the queue.
    pub queued_at: Instant,
}

impl QueueEntry {
    /// Create an entry stamped with the current time.
    pub fn new(identity: PlayerIdentity, handle: ConnectionHandle) -> Self {
        Self {
            identity,
            handle,
            queued_at: Instant::now(),
        }
    }

    /// Time spent in the queue so far.
    pub fn waited(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// Insertion-ordered queue of waiting players.
pub struct MatchmakingQueue {
    trophy_range: i32,
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl MatchmakingQueue {
    /// Create a queue matching players at most `trophy_range` apart.
    pub fn new(trophy_range: i32) -> Self {
        Self {
            trophy_range,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an entry. A handle that is already queued is not added twice.
    pub async fn add(&self, entry: QueueEntry) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.handle == entry.handle) {
            return false;
        }
        entries.push_back(entry);
        true
    }

    /// Remove the entry for `handle`. Removing an absent entry is a no-op.
    pub async fn remove(&self, handle: &ConnectionHandle) -> bool {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.handle != *handle);
        entries.len() != before
    }

    /// Remove and return the first waiter within range of `seeker`.
    ///
    /// Entries with the seeker's own id are skipped. Entries whose
    /// connection is already gone are dropped from the queue. The whole
    /// scan runs under the queue lock, so a waiter is handed out at most once.
    pub async fn find_and_remove_opponent(&self, seeker: &PlayerIdentity) -> Option<QueueEntry> {
        let mut entries = self.entries.lock().await;

        // Evicted or failed connections whose supervisor has not cleaned up yet
        entries.retain(|e| !e.handle.is_closed());

        let index = entries.iter().position(|candidate| {
            candidate.identity.id != seeker.id
                && within_range(seeker.trophies, candidate.identity.trophies, self.trophy_range)
        })?;

        entries.remove(index)
    }

    /// Number of waiting players.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether nobody is waiting.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

fn within_range(a: i32, b: i32, range: i32) -> bool {
    (i64::from(a) - i64::from(b)).abs() <= i64::from(range)
}
