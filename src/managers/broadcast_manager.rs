// MonitorChannels: Centralized tokio channel management for monitor output
// Single Responsibility: publish pipeline state to any number of observers

use futures::Stream;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::monitor::SoundEvent;

/// Owns every channel the pipeline publishes on
///
/// The pipeline is the only writer; readers never see torn values.
///
/// # Channel Types
/// - Events: every emitted `SoundEvent`, once, in order (broadcast)
/// - Scanning: whether the capture loop is active (watch)
/// - Last detection: most recent event, for the "fresh" banner (watch)
/// - History: newest-first snapshot of retained events (watch)
pub struct MonitorChannels {
    events: broadcast::Sender<SoundEvent>,
    scanning: watch::Sender<bool>,
    last_detection: watch::Sender<Option<SoundEvent>>,
    history: watch::Sender<Vec<SoundEvent>>,
}

impl MonitorChannels {
    /// Create all channels; `event_capacity` bounds lagging event subscribers.
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let (scanning, _) = watch::channel(false);
        let (last_detection, _) = watch::channel(None);
        let (history, _) = watch::channel(Vec::new());
        Self {
            events,
            scanning,
            last_detection,
            history,
        }
    }

    // ========================================================================
    // PUBLISHING (pipeline only)
    // ========================================================================

    /// Publish one event to subscribers and the last-detection watch.
    pub fn publish_event(&self, event: &SoundEvent) {
        // No subscribers is fine
        let _ = self.events.send(event.clone());
        self.last_detection.send_replace(Some(event.clone()));
    }

    /// Publish the scanning flag. Returns true when the value changed.
    pub fn publish_scanning(&self, scanning: bool) -> bool {
        self.scanning.send_if_modified(|current| {
            if *current == scanning {
                false
            } else {
                *current = scanning;
                true
            }
        })
    }

    pub fn publish_history(&self, history: Vec<SoundEvent>) {
        self.history.send_replace(history);
    }

    // ========================================================================
    // OBSERVING
    // ========================================================================

    /// Subscribe to emitted events
    ///
    /// # Notes
    /// - Each subscriber gets an independent receiver
    /// - Subscribers that fall more than `event_capacity` behind lag and
    ///   skip the oldest events
    pub fn subscribe_events(&self) -> broadcast::Receiver<SoundEvent> {
        self.events.subscribe()
    }

    /// Emitted events as an async stream; lagged gaps are logged and skipped.
    pub fn event_stream(&self) -> impl Stream<Item = SoundEvent> + Send + Unpin + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!("[MonitorChannels] Event stream lagged, {} events skipped", skipped);
                None
            }
        })
    }

    pub fn watch_scanning(&self) -> watch::Receiver<bool> {
        self.scanning.subscribe()
    }

    pub fn watch_last_detection(&self) -> watch::Receiver<Option<SoundEvent>> {
        self.last_detection.subscribe()
    }

    pub fn watch_history(&self) -> watch::Receiver<Vec<SoundEvent>> {
        self.history.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        *self.scanning.borrow()
    }

    pub fn last_detection(&self) -> Option<SoundEvent> {
        self.last_detection.borrow().clone()
    }

    pub fn history(&self) -> Vec<SoundEvent> {
        self.history.borrow().clone()
    }
}

impl Default for MonitorChannels {
    fn default() -> Self {
        Self::new(64)
    }
}
