//! Bounded newest-first event history.

use std::collections::VecDeque;

use super::event::SoundEvent;

/// Default number of retained events.
pub const HISTORY_CAPACITY: usize = 50;

/// Newest-first ring of recent events.
///
/// Entries are only evicted by capacity, never by age.
#[derive(Debug, Clone)]
pub struct EventHistory {
    events: VecDeque<SoundEvent>,
    capacity: usize,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert at the front, evicting the oldest entry when full.
    pub fn push(&mut self, event: SoundEvent) -> Option<SoundEvent> {
        self.events.push_front(event);
        if self.events.len() > self.capacity {
            self.events.pop_back()
        } else {
            None
        }
    }

    pub fn latest(&self) -> Option<&SoundEvent> {
        self.events.front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &SoundEvent> {
        self.events.iter()
    }

    /// Owned copy, newest first.
    pub fn snapshot(&self) -> Vec<SoundEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}
