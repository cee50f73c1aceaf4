//! Scripted monitor for UI development and demos.
//!
//! Emits a random event from a fixed demo set at random intervals while
//! scanning, through the same publishing path as [`super::DetectionPipeline`].
//! No microphone or model is touched.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::analysis::SoundCategory;
use crate::config::PipelineConfig;
use crate::error::AudioError;
use crate::managers::MonitorChannels;
use crate::telemetry::TelemetryCollector;

use super::alert::AlertSink;
use super::event::SoundEvent;
use super::publisher::MonitorPublisher;
use super::{EventEmitter, Monitor};

const DEMO_EVENTS: &[(&str, SoundCategory, f32)] = &[
    ("Fire alarm", SoundCategory::Critical, 0.95),
    ("Police siren", SoundCategory::Critical, 0.88),
    ("Doorbell", SoundCategory::Warning, 0.75),
    ("Knock", SoundCategory::Warning, 0.65),
];

struct Running {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct SimulatedMonitor {
    publisher: Arc<MonitorPublisher>,
    min_interval: Duration,
    max_interval: Duration,
    running: Mutex<Option<Running>>,
}

impl SimulatedMonitor {
    pub fn new(
        config: &PipelineConfig,
        sink: Arc<dyn AlertSink>,
        telemetry: Arc<TelemetryCollector>,
    ) -> Self {
        Self {
            publisher: Arc::new(MonitorPublisher::new(
                config.history_capacity,
                config.event_channel_capacity,
                sink,
                telemetry,
            )),
            min_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(15),
            running: Mutex::new(None),
        }
    }

    /// Override the 5-15 s spacing between demo events.
    pub fn with_interval(mut self, min: Duration, max: Duration) -> Self {
        self.min_interval = min.min(max);
        self.max_interval = max.max(min);
        self
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        self.publisher.telemetry()
    }

    fn start(&self, running: &mut Option<Running>) -> Result<(), AudioError> {
        if running.is_some() {
            return Ok(());
        }

        let (stop, stop_rx) = mpsc::channel();
        let publisher = Arc::clone(&self.publisher);
        let (min_ms, max_ms) = (
            self.min_interval.as_millis() as u64,
            self.max_interval.as_millis() as u64,
        );
        let handle = thread::Builder::new()
            .name("sense-simulated".to_string())
            .spawn(move || {
                let mut rng = rand::thread_rng();
                loop {
                    let wait = Duration::from_millis(rng.gen_range(min_ms..=max_ms));
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Some(event) = demo_event(&mut rng) {
                                publisher.publish_event(event);
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|err| AudioError::StreamFailure {
                reason: format!("failed to spawn simulated monitor: {}", err),
            })?;

        *running = Some(Running { stop, handle });
        tracing::info!("[SimulatedMonitor] Scanning started");
        self.publisher.stage_scanning(true);
        Ok(())
    }

    fn stop(&self, running: &mut Option<Running>) {
        let Some(Running { stop, handle }) = running.take() else {
            return;
        };
        // The thread may already be gone; join either way.
        let _ = stop.send(());
        if handle.join().is_err() {
            tracing::error!("[SimulatedMonitor] Simulation thread panicked");
        }
        tracing::info!("[SimulatedMonitor] Scanning stopped");
        self.publisher.stage_scanning(false);
    }
}

fn demo_event(rng: &mut impl Rng) -> Option<SoundEvent> {
    DEMO_EVENTS
        .choose(rng)
        .map(|&(name, category, confidence)| SoundEvent::new(name, category, confidence))
}

impl EventEmitter for SimulatedMonitor {
    fn emit_event(&self, event: SoundEvent) {
        self.publisher.publish_event(event);
    }
}

impl Monitor for SimulatedMonitor {
    fn set_scanning(&self, scanning: bool) -> Result<(), AudioError> {
        let result = {
            let mut running = self.running.lock().map_err(|_| AudioError::LockPoisoned {
                component: "SimulatedMonitor".to_string(),
            })?;
            if scanning {
                self.start(&mut running)
            } else {
                self.stop(&mut running);
                Ok(())
            }
        };
        self.publisher.deliver_scanning();
        result
    }

    fn channels(&self) -> &MonitorChannels {
        self.publisher.channels()
    }
}

impl Drop for SimulatedMonitor {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            self.stop(&mut running);
        }
        self.publisher.deliver_scanning();
    }
}
