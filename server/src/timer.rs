//! Idle-timeout manager: a min-heap of per-connection deadlines, ticked
//! periodically to evict connections that have gone quiet. `remove` is a
//! linear search followed by a full re-heapify, which is unremarkable at
//! the connection-pool sizes this server expects.

use std::time::{Duration, Instant};

use mio::Token;

#[derive(Debug, Clone, Copy)]
struct Entry {
    expires_at: Instant,
    token: Token,
}

/// Min-heap of connection idle deadlines, ordered by `expires_at`.
#[derive(Debug, Default)]
pub struct IdleHeap {
    entries: Vec<Entry>,
}

impl IdleHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new deadline for `token`.
    pub fn add(&mut self, token: Token, expires_at: Instant) {
        self.entries.push(Entry { expires_at, token });
        self.sift_up(self.entries.len() - 1);
    }

    /// Removes `token`'s deadline, if present. A connection may be torn
    /// down by a path other than its own timer firing (peer close, parse
    /// error); this must be called on every such path or the heap would
    /// hold a dangling entry.
    pub fn remove(&mut self, token: Token) {
        if let Some(pos) = self.entries.iter().position(|e| e.token == token) {
            self.entries.remove(pos);
            self.rebuild();
        }
    }

    /// Extends `token`'s deadline, used whenever a connection sees I/O
    /// activity. Implemented as remove-then-reinsert.
    pub fn adjust(&mut self, token: Token, new_expires_at: Instant) {
        self.remove(token);
        self.add(token, new_expires_at);
    }

    /// Pops every entry whose deadline has passed `now`, returning their
    /// tokens so the caller can tear down those connections. Must be
    /// called only between event batches, never from within a connection's
    /// own handler, so a still-processing connection's timer cannot race
    /// its owning worker (see the open design note on timer double-fire).
    pub fn tick(&mut self, now: Instant) -> Vec<Token> {
        let mut expired = Vec::new();
        while let Some(top) = self.entries.first() {
            if top.expires_at <= now {
                expired.push(self.pop());
            } else {
                break;
            }
        }
        expired
    }

    /// Whether `token` currently has a live deadline.
    pub fn contains(&self, token: Token) -> bool {
        self.entries.iter().any(|e| e.token == token)
    }

    fn pop(&mut self) -> Token {
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let entry = self.entries.pop().expect("heap was non-empty");
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        entry.token
    }

    fn rebuild(&mut self) {
        for i in (0..self.entries.len() / 2).rev() {
            self.sift_down(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.entries[i].expires_at < self.entries[parent].expires_at {
                self.entries.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.entries.len();
        loop {
            let l = 2 * i + 1;
            let r = 2 * i + 2;
            let mut smallest = i;
            if l < len && self.entries[l].expires_at < self.entries[smallest].expires_at {
                smallest = l;
            }
            if r < len && self.entries[r].expires_at < self.entries[smallest].expires_at {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.entries.swap(i, smallest);
            i = smallest;
        }
    }
}

/// Idle-timer resolution. The idle deadline is always three of these.
pub const TIMESLOT: Duration = Duration::from_secs(5);
