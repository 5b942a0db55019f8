use crate::event::TelemetryEvent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Bounded FIFO of the most recent readings for one device.
///
/// Length never exceeds the configured capacity; once full, the oldest
/// entry is evicted before a new one is inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRing {
    capacity: usize,
    entries: VecDeque<TelemetryEvent>,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: TelemetryEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetryEvent> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<TelemetryEvent> {
        self.entries.iter().cloned().collect()
    }
}
