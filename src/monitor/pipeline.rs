// DetectionPipeline - Idle/Active state machine over the monitor worker
//
// Threads:
// - "sense-monitor": runs one MonitorWorker session per Active period
// - "sense-settings": watches the settings source and restarts the active
//   session when an audio-path setting changes
//
// Locking:
// - `transition` serializes whole start/stop/restart operations, including
//   the join of the old worker, so two sessions never overlap
// - `control` is held only briefly to swap the session handle and stage
//   the scanning flag; the worker takes it when it finishes on its own
// - the alert sink hears scanning changes only after both locks are
//   released, so it may call `set_scanning` from its callback

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{broadcast, watch};

use crate::analysis::SoundClassifier;
use crate::audio::{AudioCapture, MicrophoneDevice};
use crate::config::{AppConfig, PipelineConfig};
use crate::error::{log_audio_error, AudioError};
use crate::managers::MonitorChannels;
use crate::settings::{MonitorSettings, SettingsSource};
use crate::telemetry::{now_timestamp_ms, LifecyclePhase, TelemetryCollector};

use super::alert::AlertSink;
use super::event::SoundEvent;
use super::publisher::MonitorPublisher;
use super::worker::{MonitorWorker, WorkResult};
use super::{EventEmitter, Monitor};

/// Handle to a running capture/classify loop.
struct ActiveSession {
    generation: u64,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Control {
    generation: u64,
    session: Option<ActiveSession>,
}

struct Inner {
    config: PipelineConfig,
    worker: MonitorWorker,
    publisher: MonitorPublisher,
    transition: Mutex<()>,
    control: Mutex<Control>,
    last_outcome: Mutex<Option<WorkResult>>,
    shutdown: watch::Sender<bool>,
}

/// Owns scanning on/off, the worker thread and everything it publishes.
///
/// Scanning is true exactly while a worker session is running. A session
/// that ends on its own (device failure or end of source) drops the
/// pipeline back to Idle and stores its [`WorkResult`].
pub struct DetectionPipeline {
    inner: Arc<Inner>,
}

impl DetectionPipeline {
    pub fn new(
        config: PipelineConfig,
        capture: Arc<AudioCapture>,
        classifier: Arc<SoundClassifier>,
        settings: Arc<dyn SettingsSource>,
        sink: Arc<dyn AlertSink>,
        telemetry: Arc<TelemetryCollector>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let publisher = MonitorPublisher::new(
            config.history_capacity,
            config.event_channel_capacity,
            sink,
            Arc::clone(&telemetry),
        );
        let worker = MonitorWorker::new(capture, classifier, Arc::clone(&settings), telemetry);
        let inner = Arc::new(Inner {
            config,
            worker,
            publisher,
            transition: Mutex::new(()),
            control: Mutex::new(Control::default()),
            last_outcome: Mutex::new(None),
            shutdown,
        });
        spawn_settings_watcher(&inner, settings.as_ref());
        Self { inner }
    }

    /// Build a pipeline over `device`, loading the classifier named by
    /// `config`. A model that fails to load leaves the classifier closed.
    pub fn from_config(
        config: &AppConfig,
        device: Arc<dyn MicrophoneDevice>,
        settings: Arc<dyn SettingsSource>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self::new(
            config.pipeline.clone(),
            Arc::new(AudioCapture::new(device, &config.capture)),
            Arc::new(SoundClassifier::load(&config.classifier)),
            settings,
            sink,
            Arc::new(TelemetryCollector::default()),
        )
    }

    /// Result of the most recent session, once it has ended.
    pub fn last_outcome(&self) -> Option<WorkResult> {
        lock(&self.inner.last_outcome).clone()
    }

    pub fn capture(&self) -> &Arc<AudioCapture> {
        self.inner.worker.capture()
    }

    pub fn classifier(&self) -> &Arc<SoundClassifier> {
        self.inner.worker.classifier()
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        self.inner.publisher.telemetry()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SoundEvent> {
        self.inner.publisher.channels().subscribe_events()
    }

    pub fn event_stream(&self) -> impl Stream<Item = SoundEvent> + Send + Unpin + 'static {
        self.inner.publisher.channels().event_stream()
    }

    /// Last detection while it is inside the configured freshness window.
    pub fn active_detection(&self) -> Option<SoundEvent> {
        let window = Duration::from_millis(self.inner.config.fresh_window_ms);
        self.inner
            .publisher
            .channels()
            .last_detection()
            .filter(|event| event.is_fresh_at(now_timestamp_ms(), window))
    }

    pub fn clear_history(&self) {
        self.inner.publisher.clear_history();
    }

    /// Stop and restart the active session so new audio settings apply.
    ///
    /// Does nothing while Idle. History is kept.
    pub fn restart(&self) {
        self.inner.restart();
    }
}

impl EventEmitter for DetectionPipeline {
    fn emit_event(&self, event: SoundEvent) {
        self.inner.publisher.publish_event(event);
    }
}

impl Monitor for DetectionPipeline {
    fn set_scanning(&self, scanning: bool) -> Result<(), AudioError> {
        let result = {
            let _transition = lock(&self.inner.transition);
            if scanning {
                Inner::start(&self.inner)
            } else {
                if self.inner.halt() {
                    self.inner.publisher.stage_scanning(false);
                }
                Ok(())
            }
        };
        self.inner.publisher.deliver_scanning();
        result
    }

    fn channels(&self) -> &MonitorChannels {
        self.inner.publisher.channels()
    }
}

impl Drop for DetectionPipeline {
    fn drop(&mut self) {
        if let Err(err) = self.set_scanning(false) {
            log_audio_error(&err, "DetectionPipeline::drop");
        }
        self.inner.shutdown.send_replace(true);
    }
}

impl EventEmitter for Inner {
    fn emit_event(&self, event: SoundEvent) {
        self.publisher.publish_event(event);
    }
}

impl Inner {
    /// Idle -> Active. Caller holds `transition`.
    fn start(this: &Arc<Self>) -> Result<(), AudioError> {
        let mut control = lock(&this.control);
        if control.session.is_some() {
            tracing::debug!("[DetectionPipeline] Already scanning");
            return Ok(());
        }

        control.generation += 1;
        let generation = control.generation;
        let cancel = Arc::new(AtomicBool::new(false));

        let inner = Arc::clone(this);
        let token = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("sense-monitor".to_string())
            .spawn(move || inner.run_session(generation, &token))
            .map_err(|err| AudioError::StreamFailure {
                reason: format!("failed to spawn monitor thread: {}", err),
            })?;

        control.session = Some(ActiveSession {
            generation,
            cancel,
            handle,
        });
        tracing::info!("[DetectionPipeline] Scanning started (session {})", generation);
        // Staged under `control` so a session that fails immediately
        // cannot stage `false` ahead of this `true`.
        this.publisher.stage_scanning(true);
        Ok(())
    }

    /// Cancel and join the running session. Caller holds `transition`.
    ///
    /// Returns whether a session was running. The device is released by the
    /// time this returns.
    fn halt(&self) -> bool {
        let session = lock(&self.control).session.take();
        let Some(session) = session else {
            return false;
        };

        session.cancel.store(true, Ordering::SeqCst);
        self.worker.capture().stop();
        if session.handle.join().is_err() {
            tracing::error!("[DetectionPipeline] Monitor thread could not be joined");
        }
        tracing::info!(
            "[DetectionPipeline] Scanning stopped (session {})",
            session.generation
        );
        true
    }

    fn restart(self: &Arc<Self>) {
        {
            let _transition = lock(&self.transition);
            if !self.halt() {
                return;
            }
            self.publisher.telemetry().record_phase(LifecyclePhase::Restarting);
            tracing::info!(
                "[DetectionPipeline] Restarting in {} ms to apply new settings",
                self.config.restart_delay_ms
            );
            thread::sleep(Duration::from_millis(self.config.restart_delay_ms));

            if let Err(err) = Inner::start(self) {
                log_audio_error(&err, "DetectionPipeline::restart");
                self.publisher.stage_scanning(false);
            }
        }
        self.publisher.deliver_scanning();
    }

    fn run_session(&self, generation: u64, cancel: &AtomicBool) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.worker.run(self, cancel)))
            .unwrap_or_else(|_| {
                let err = AudioError::WorkerPanicked;
                log_audio_error(&err, "DetectionPipeline::run_session");
                self.publisher.telemetry().record_error(&err, "monitor thread");
                WorkResult::Failure(err)
            });
        self.session_finished(generation, outcome);
    }

    /// Record the outcome; a session that ended on its own returns to Idle.
    fn session_finished(&self, generation: u64, outcome: WorkResult) {
        *lock(&self.last_outcome) = Some(outcome.clone());

        {
            let mut control = lock(&self.control);
            let self_ended = control
                .session
                .as_ref()
                .is_some_and(|session| session.generation == generation);
            if !self_ended {
                return;
            }

            // Detach our own handle; nobody will join it.
            control.session = None;
            match &outcome {
                WorkResult::Success => {
                    tracing::info!("[DetectionPipeline] Audio source ended, scanning stopped")
                }
                WorkResult::Failure(err) => {
                    tracing::error!("[DetectionPipeline] Scanning stopped unexpectedly: {}", err)
                }
            }
            self.publisher.stage_scanning(false);
        }
        // Detached above, so no `halt` is joining this thread while the sink
        // runs and possibly calls back into the pipeline.
        self.publisher.deliver_scanning();
    }

    fn is_active(&self) -> bool {
        lock(&self.control).session.is_some()
    }
}

/// Watch the settings source and restart the active session whenever an
/// audio-path setting changes.
fn spawn_settings_watcher(inner: &Arc<Inner>, settings: &dyn SettingsSource) {
    let weak = Arc::downgrade(inner);
    let settings_rx = settings.subscribe();
    let shutdown_rx = inner.shutdown.subscribe();

    let spawned = thread::Builder::new()
        .name("sense-settings".to_string())
        .spawn(move || {
            futures::executor::block_on(watch_settings(weak, settings_rx, shutdown_rx));
        });
    if let Err(err) = spawned {
        tracing::error!(
            "[DetectionPipeline] Settings watcher not started, settings apply on next start only: {}",
            err
        );
    }
}

async fn watch_settings(
    pipeline: Weak<Inner>,
    mut settings_rx: watch::Receiver<MonitorSettings>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut applied = settings_rx.borrow_and_update().clone();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,
            changed = settings_rx.changed() => {
                if changed.is_err() {
                    tracing::debug!("[DetectionPipeline] Settings source closed");
                    break;
                }
                let next = settings_rx.borrow_and_update().clone();
                let Some(inner) = pipeline.upgrade() else {
                    break;
                };
                if applied.requires_restart(&next) && inner.is_active() {
                    inner.restart();
                } else {
                    tracing::debug!("[DetectionPipeline] Settings changed, no restart needed");
                }
                applied = next;
            }
        }
    }
    tracing::debug!("[DetectionPipeline] Settings watcher exiting");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
