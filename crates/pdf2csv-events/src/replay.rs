// Per-collection replay buffer
//
// Bounded ring of recent serialized frames so a reconnecting client can
// catch up without a persistent queue. Entries age out by count and TTL.

use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

/// Maximum retained frames per collection.
pub const REPLAY_CAPACITY: usize = 64;

/// Entries older than this are pruned on access.
pub const REPLAY_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct ReplayEntry {
    frame: String,
    at: Instant,
}

/// Bounded ring of recent frames for one collection.
#[derive(Debug, Default)]
pub struct ReplayBuffer {
    entries: VecDeque<ReplayEntry>,
}

impl ReplayBuffer {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(REPLAY_CAPACITY),
        }
    }

    pub fn push(&mut self, frame: String) {
        self.prune();
        if self.entries.len() == REPLAY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(ReplayEntry {
            frame,
            at: Instant::now(),
        });
    }

    /// Recent frames, oldest first, with expired entries pruned.
    pub fn recent(&mut self) -> Vec<String> {
        self.prune();
        self.entries.iter().map(|e| e.frame.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self) {
        let cutoff = Instant::now();
        while let Some(front) = self.entries.front() {
            if cutoff.duration_since(front.at) >= REPLAY_TTL {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}
