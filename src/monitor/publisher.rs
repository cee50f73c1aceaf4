//! Single writer for everything a monitor publishes.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::managers::MonitorChannels;
use crate::telemetry::{LifecyclePhase, TelemetryCollector};

use super::alert::AlertSink;
use super::event::SoundEvent;
use super::history::EventHistory;

/// Scanning changes waiting for the sink, in the order they happened.
#[derive(Default)]
struct ScanningQueue {
    pending: VecDeque<bool>,
    delivering: bool,
}

/// Owns the history and fans each event out to channels, sink and telemetry.
///
/// Scanning changes are staged and delivered in two steps so callers can
/// stage under their own locks and call the sink with none held. A sink may
/// call back into its monitor from `on_scanning_changed`.
pub struct MonitorPublisher {
    history: Mutex<EventHistory>,
    channels: MonitorChannels,
    scanning_queue: Mutex<ScanningQueue>,
    sink: Arc<dyn AlertSink>,
    telemetry: Arc<TelemetryCollector>,
}

impl MonitorPublisher {
    pub fn new(
        history_capacity: usize,
        event_channel_capacity: usize,
        sink: Arc<dyn AlertSink>,
        telemetry: Arc<TelemetryCollector>,
    ) -> Self {
        Self {
            history: Mutex::new(EventHistory::new(history_capacity)),
            channels: MonitorChannels::new(event_channel_capacity),
            scanning_queue: Mutex::new(ScanningQueue::default()),
            sink,
            telemetry,
        }
    }

    /// Record and publish one event.
    ///
    /// Order: history, then the event channels, then the alert sink. The
    /// history lock is held until both watches carry this event, so
    /// concurrent emitters leave them agreeing with each other.
    pub fn publish_event(&self, event: SoundEvent) {
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(evicted) = history.push(event.clone()) {
                tracing::trace!("[Monitor] History full, evicted {}", evicted.id);
            }
            self.channels.publish_history(history.snapshot());
            self.channels.publish_event(&event);
        }
        self.telemetry.record_detection(&event);
        tracing::info!(
            "[Monitor] Detected {} ({}, confidence {:.2})",
            event.name,
            event.category.as_str(),
            event.confidence
        );
        self.sink.on_event(&event);
    }

    /// Stage and deliver the scanning flag; the sink hears only real changes.
    pub fn publish_scanning(&self, scanning: bool) {
        self.stage_scanning(scanning);
        self.deliver_scanning();
    }

    /// Update the scanning watch and queue the change for the sink.
    ///
    /// Never calls the sink, so it is safe under the caller's state lock.
    /// Returns whether the value changed.
    pub fn stage_scanning(&self, scanning: bool) -> bool {
        if !self.channels.publish_scanning(scanning) {
            return false;
        }
        self.telemetry.record_phase(if scanning {
            LifecyclePhase::ScanningStarted
        } else {
            LifecyclePhase::ScanningStopped
        });
        lock(&self.scanning_queue).pending.push_back(scanning);
        true
    }

    /// Hand staged scanning changes to the sink, oldest first.
    ///
    /// Call with no monitor locks held. If another thread is already
    /// delivering, or the sink re-enters from its callback, the pending
    /// changes are left to that delivery loop.
    pub fn deliver_scanning(&self) {
        let mut queue = lock(&self.scanning_queue);
        if queue.delivering {
            return;
        }
        queue.delivering = true;
        while let Some(scanning) = queue.pending.pop_front() {
            drop(queue);
            let delivered =
                panic::catch_unwind(AssertUnwindSafe(|| self.sink.on_scanning_changed(scanning)));
            if delivered.is_err() {
                tracing::error!("[Monitor] Alert sink panicked on scanning change");
            }
            queue = lock(&self.scanning_queue);
        }
        queue.delivering = false;
    }

    pub fn clear_history(&self) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.clear();
        self.channels.publish_history(Vec::new());
    }

    pub fn channels(&self) -> &MonitorChannels {
        &self.channels
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        &self.telemetry
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
