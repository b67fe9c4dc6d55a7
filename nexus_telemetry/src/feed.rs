//! Synthetic status feed. Lines are drawn at random from a small catalog to
//! keep the dashboard looking alive; they do not reflect real system events.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use rand::Rng;

use crate::types::EventLine;

pub const CATALOG: [&str; 5] = [
    "KERNEL: OK",
    "NET: Filtered",
    "AUTH: OK",
    "DISK: Sync",
    "FW: Blocked",
];

// a draw from 0..10 above this emits a line (20%)
const EMIT_ABOVE: u32 = 7;

#[derive(Debug, Clone)]
pub struct EventFeed {
    lines: VecDeque<EventLine>,
    cap: usize,
}

impl EventFeed {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            lines: VecDeque::with_capacity(cap + 1),
            cap,
        }
    }

    /// One draw per tick; on a hit, a catalog line is pushed at the head.
    pub fn maybe_append<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        now: DateTime<Local>,
    ) -> Option<EventLine> {
        if rng.random_range(0..10u32) <= EMIT_ABOVE {
            return None;
        }
        let text = CATALOG[rng.random_range(0..CATALOG.len())];
        let line = EventLine {
            timestamp: now,
            text: text.to_string(),
        };
        self.lines.push_front(line.clone());
        if self.lines.len() > self.cap {
            self.lines.pop_back();
        }
        Some(line)
    }

    /// Most recent first.
    pub fn lines(&self) -> impl Iterator<Item = &EventLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
