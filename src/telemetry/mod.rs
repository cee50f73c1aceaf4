//! Monitoring telemetry collector and helpers.
//!
//! Each pipeline owns one collector. It multiplexes gating, inference
//! latency, detection and lifecycle events into a bounded history plus a
//! broadcast stream, and keeps running counters for quick reporting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;

use crate::error::ErrorCode;
use crate::monitor::SoundEvent;

pub mod events;

pub use events::{LifecyclePhase, MetricEvent};

/// Snapshot of collector state for CLI/host reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
    pub frames_gated: u64,
    pub inferences: u64,
    pub detections: u64,
    pub errors: u64,
    pub avg_inference_ms: f32,
    pub max_inference_ms: f32,
}

/// Latency tracker maintains a rolling window to compute avg/max latency.
struct LatencyTracker {
    samples: VecDeque<f32>,
    max_samples: usize,
}

impl LatencyTracker {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    fn observe(&mut self, value: f32) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value.abs());
    }

    fn stats(&self) -> (f32, f32) {
        let count = self.samples.len();
        if count == 0 {
            return (0.0, 0.0);
        }
        let sum: f32 = self.samples.iter().copied().sum();
        let max = self
            .samples
            .iter()
            .copied()
            .fold(0.0_f32, |acc, next| acc.max(next));
        (sum / count as f32, max)
    }
}

#[derive(Default)]
struct Counters {
    frames_gated: AtomicU64,
    inferences: AtomicU64,
    detections: AtomicU64,
    errors: AtomicU64,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
    counters: Counters,
    latency: Mutex<LatencyTracker>,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
            counters: Counters::default(),
            latency: Mutex::new(LatencyTracker::new(32)),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut history) = self.history.lock() {
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn record_gated(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.counters.frames_gated.fetch_add(count, Ordering::Relaxed);
        self.publish(MetricEvent::FrameGated { count });
    }

    pub fn record_inference(&self, latency_ms: f32, results: usize) {
        self.counters.inferences.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.latency.lock() {
            tracker.observe(latency_ms);
        }
        self.publish(MetricEvent::Inference {
            latency_ms,
            results,
        });
    }

    pub fn record_detection(&self, event: &SoundEvent) {
        self.counters.detections.fetch_add(1, Ordering::Relaxed);
        self.publish(MetricEvent::Detection {
            name: event.name.clone(),
            category: event.category,
            confidence: event.confidence,
        });
    }

    pub fn record_phase(&self, phase: LifecyclePhase) {
        self.publish(MetricEvent::Lifecycle {
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_error(&self, err: &dyn ErrorCode, context: impl Into<String>) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.publish(MetricEvent::Error {
            code: err.code(),
            context: context.into(),
        });
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let recent = self
            .history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default();
        let (avg_inference_ms, max_inference_ms) = self
            .latency
            .lock()
            .map(|tracker| tracker.stats())
            .unwrap_or((0.0, 0.0));

        TelemetrySnapshot {
            recent,
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
            frames_gated: self.counters.frames_gated.load(Ordering::Relaxed),
            inferences: self.counters.inferences.load(Ordering::Relaxed),
            detections: self.counters.detections.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            avg_inference_ms,
            max_inference_ms,
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

pub(crate) fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SoundCategory;
    use crate::error::AudioError;

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.record_inference(1.0, 0);
        collector.record_gated(2);
        collector.record_phase(LifecyclePhase::SessionStarted);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert!(
            matches!(snapshot.recent[0], MetricEvent::Inference { latency_ms, .. } if (latency_ms - 1.0).abs() < f32::EPSILON)
        );
        assert!(matches!(
            snapshot.recent[2],
            MetricEvent::Lifecycle {
                phase: LifecyclePhase::SessionStarted,
                ..
            }
        ));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        collector.record_inference(1.0, 0);
        collector.record_inference(3.0, 1);
        collector.record_inference(5.0, 2);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert_eq!(snapshot.inferences, 3);
        assert!((snapshot.avg_inference_ms - 3.0).abs() < 1e-6);
        assert!((snapshot.max_inference_ms - 5.0).abs() < 1e-6);
    }

    #[test]
    fn zero_gated_frames_are_not_published() {
        let collector = TelemetryCollector::new(8, 8);
        collector.record_gated(0);
        assert_eq!(collector.snapshot().total_events, 0);
    }

    #[test]
    fn counters_track_detections_and_errors() {
        let collector = TelemetryCollector::new(8, 8);
        let mut rx = collector.subscribe();
        let event = SoundEvent::new("Fire alarm", SoundCategory::Critical, 0.9);

        collector.record_detection(&event);
        collector.record_error(&AudioError::PermissionDenied, "start");

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.detections, 1);
        assert_eq!(snapshot.errors, 1);
        assert!(matches!(rx.try_recv(), Ok(MetricEvent::Detection { .. })));
        assert!(matches!(
            rx.try_recv(),
            Ok(MetricEvent::Error { code: 1005, .. })
        ));
    }
}
