// MonitorWorker - one capture/classify/emit session
//
// The worker snapshots the settings, opens a capture session and then runs
// in lockstep: read one frame, classify it, emit an event when the top
// result clears the detection threshold. Inference errors skip the frame;
// capture errors end the session and are returned as a failure so the host
// decides about retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::analysis::SoundClassifier;
use crate::audio::{AudioCapture, AudioFrame, CaptureParams};
use crate::error::{log_audio_error, log_classifier_error, AudioError};
use crate::settings::{MonitorSettings, SettingsSource};
use crate::telemetry::{LifecyclePhase, TelemetryCollector};

use super::event::SoundEvent;
use super::EventEmitter;

/// Outcome of one monitoring session, as reported to the background host.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkResult {
    /// Cancelled cooperatively or the source ended
    Success,
    /// The microphone could not be opened or read
    Failure(AudioError),
}

impl WorkResult {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkResult::Success)
    }
}

pub struct MonitorWorker {
    capture: Arc<AudioCapture>,
    classifier: Arc<SoundClassifier>,
    settings: Arc<dyn SettingsSource>,
    telemetry: Arc<TelemetryCollector>,
    floor_warned: AtomicBool,
}

impl MonitorWorker {
    pub fn new(
        capture: Arc<AudioCapture>,
        classifier: Arc<SoundClassifier>,
        settings: Arc<dyn SettingsSource>,
        telemetry: Arc<TelemetryCollector>,
    ) -> Self {
        Self {
            capture,
            classifier,
            settings,
            telemetry,
            floor_warned: AtomicBool::new(false),
        }
    }

    pub fn capture(&self) -> &Arc<AudioCapture> {
        &self.capture
    }

    pub fn classifier(&self) -> &Arc<SoundClassifier> {
        &self.classifier
    }

    /// Run one session until `cancel` is raised, the source ends or the
    /// device fails.
    ///
    /// The caller cancels by raising `cancel` and then calling
    /// [`AudioCapture::stop`]; a cancel that lands before the session opens
    /// is honored as soon as it does.
    pub fn run(&self, emitter: &dyn EventEmitter, cancel: &AtomicBool) -> WorkResult {
        let settings = self.settings.current();
        let threshold = settings.detection_threshold();
        self.warn_if_below_floor(threshold);

        self.telemetry.record_phase(LifecyclePhase::SessionStarted);
        let mut session = self.capture.start(capture_params(&settings));
        if cancel.load(Ordering::SeqCst) {
            self.capture.stop();
        }
        let mut gated_seen = 0;

        while let Some(frame) = session.next() {
            let gated = session.frames_gated();
            self.telemetry.record_gated(gated - gated_seen);
            gated_seen = gated;

            self.process_frame(&frame, threshold, emitter);
        }
        self.telemetry.record_gated(session.frames_gated() - gated_seen);

        let error = session.take_error();
        // Release the device before reporting the outcome.
        drop(session);

        match error {
            Some(err) if err.is_session_fatal() => {
                log_audio_error(&err, "MonitorWorker::run");
                self.telemetry.record_error(&err, "capture");
                self.telemetry.record_phase(LifecyclePhase::SessionFailed);
                WorkResult::Failure(err)
            }
            Some(err) => {
                tracing::warn!("[MonitorWorker] Session did not run: {}", err);
                self.telemetry.record_phase(LifecyclePhase::SessionEnded);
                WorkResult::Success
            }
            None => {
                self.telemetry.record_phase(LifecyclePhase::SessionEnded);
                WorkResult::Success
            }
        }
    }

    fn process_frame(&self, frame: &AudioFrame, threshold: f32, emitter: &dyn EventEmitter) {
        let started = Instant::now();
        let results = match self.classifier.try_classify(frame.samples()) {
            Ok(results) => results,
            Err(err) => {
                log_classifier_error(&err, "MonitorWorker::process_frame");
                self.telemetry.record_error(&err, "inference");
                return;
            }
        };
        self.telemetry
            .record_inference(started.elapsed().as_secs_f32() * 1000.0, results.len());

        let Some(top) = results.first() else {
            return;
        };
        if top.score > threshold {
            emitter.emit_event(SoundEvent::from_result(top));
        } else {
            tracing::trace!(
                "[MonitorWorker] {} at {:.2} below threshold {:.2}",
                top.label,
                top.score,
                threshold
            );
        }
    }

    fn warn_if_below_floor(&self, threshold: f32) {
        let floor = self.classifier.score_floor();
        if threshold < floor && !self.floor_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "[MonitorWorker] Detection threshold {:.2} is below the classifier floor {:.2}; scores under the floor are never reported",
                threshold,
                floor
            );
        }
    }
}

fn capture_params(settings: &MonitorSettings) -> CaptureParams {
    CaptureParams {
        gain: settings.microphone_gain,
        silence_floor: settings.silence_floor,
        noise_reduction: settings.noise_reduction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{score_vector, ScriptedModel};
    use crate::audio::fixture::FixtureMicrophone;
    use crate::config::{CaptureConfig, ClassifierConfig};
    use crate::error::ClassifierError;
    use crate::settings::{SensitivityLevel, SettingsStore};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collected(Mutex<Vec<SoundEvent>>);

    impl EventEmitter for Collected {
        fn emit_event(&self, event: SoundEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn capture_config() -> CaptureConfig {
        CaptureConfig {
            sample_rate: 16_000,
            frame_len: 15_600,
            read_timeout_ms: 10,
        }
    }

    fn worker(
        mic: Arc<FixtureMicrophone>,
        model: ScriptedModel,
        sensitivity: SensitivityLevel,
    ) -> MonitorWorker {
        let store = SettingsStore::default();
        store.update(|s| {
            s.sensitivity = sensitivity;
            s.silence_floor = 0;
        });
        MonitorWorker::new(
            Arc::new(AudioCapture::new(mic, &capture_config())),
            Arc::new(SoundClassifier::new(Box::new(model), &ClassifierConfig::default())),
            Arc::new(store),
            Arc::new(TelemetryCollector::default()),
        )
    }

    fn three_frames() -> Arc<FixtureMicrophone> {
        Arc::new(FixtureMicrophone::from_pcm(vec![1_000; 15_600 * 3]).with_chunk_size(4_000))
    }

    #[test]
    fn test_threshold_is_strict() {
        // Medium sensitivity: threshold 0.4
        let model = ScriptedModel::sequence(
            15_600,
            vec![
                Ok(score_vector(521, &[(394, 0.39)])),
                Ok(score_vector(521, &[(394, 0.41)])),
                Ok(score_vector(521, &[(349, 0.40)])),
            ],
        );
        let worker = worker(three_frames(), model, SensitivityLevel::Medium);
        let collected = Collected::default();

        assert_eq!(worker.run(&collected, &AtomicBool::new(false)), WorkResult::Success);
        let events = collected.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Fire alarm");
        assert_eq!(events[0].category, crate::analysis::SoundCategory::Critical);
        assert!((events[0].confidence - 0.41).abs() < 1e-6);
    }

    #[test]
    fn test_only_top_result_is_emitted() {
        let model = ScriptedModel::constant(15_600, score_vector(521, &[(394, 0.9), (349, 0.8)]));
        let mic = Arc::new(FixtureMicrophone::from_pcm(vec![1_000; 15_600]));
        let worker = worker(mic, model, SensitivityLevel::Medium);
        let collected = Collected::default();

        worker.run(&collected, &AtomicBool::new(false));
        let events = collected.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Fire alarm");
    }

    #[test]
    fn test_inference_error_skips_frame_only() {
        let model = ScriptedModel::sequence(
            15_600,
            vec![
                Err(ClassifierError::Inference {
                    reason: "transient".to_string(),
                }),
                Ok(score_vector(521, &[(20, 0.7)])),
            ],
        );
        let worker = worker(three_frames(), model, SensitivityLevel::Medium);
        let collected = Collected::default();

        assert_eq!(worker.run(&collected, &AtomicBool::new(false)), WorkResult::Success);
        assert_eq!(collected.0.lock().unwrap().len(), 2);
        assert_eq!(worker.telemetry.snapshot().errors, 1);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let mic = Arc::new(FixtureMicrophone::failing_open(AudioError::DeviceInitFailed {
            reason: "busy".to_string(),
        }));
        let model = ScriptedModel::constant(15_600, score_vector(521, &[]));
        let worker = worker(mic, model, SensitivityLevel::Medium);

        let outcome = worker.run(&Collected::default(), &AtomicBool::new(false));
        assert!(matches!(outcome, WorkResult::Failure(AudioError::DeviceInitFailed { .. })));
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_read_failure_is_reported_after_release() {
        let mic = Arc::new(
            FixtureMicrophone::from_pcm(vec![1_000; 15_600 * 4])
                .with_chunk_size(15_600)
                .fail_read_after(2),
        );
        let stats = mic.stats();
        let model = ScriptedModel::constant(15_600, score_vector(521, &[(390, 0.9)]));
        let worker = worker(mic, model, SensitivityLevel::Medium);
        let collected = Collected::default();

        let outcome = worker.run(&collected, &AtomicBool::new(false));
        assert!(matches!(outcome, WorkResult::Failure(AudioError::ReadFailed { .. })));
        assert_eq!(collected.0.lock().unwrap().len(), 2);
        assert_eq!(stats.closes(), 1);
        assert_eq!(worker.capture().release_count(), 1);
    }

    #[test]
    fn test_closed_classifier_degrades_to_no_detections() {
        let store = SettingsStore::default();
        store.update(|s| s.silence_floor = 0);
        let worker = MonitorWorker::new(
            Arc::new(AudioCapture::new(three_frames(), &capture_config())),
            Arc::new(SoundClassifier::closed(&ClassifierConfig::default())),
            Arc::new(store),
            Arc::new(TelemetryCollector::default()),
        );
        let collected = Collected::default();

        assert_eq!(worker.run(&collected, &AtomicBool::new(false)), WorkResult::Success);
        assert!(collected.0.lock().unwrap().is_empty());
        assert_eq!(worker.telemetry.snapshot().inferences, 3);
    }

    #[test]
    fn test_cancel_before_start_ends_session() {
        let mic = Arc::new(FixtureMicrophone::endless_tone(440.0, 0.5));
        let stats = mic.stats();
        let model = ScriptedModel::constant(15_600, score_vector(521, &[(394, 0.9)]));
        let worker = worker(mic, model, SensitivityLevel::Medium);
        let collected = Collected::default();

        assert_eq!(worker.run(&collected, &AtomicBool::new(true)), WorkResult::Success);
        assert!(collected.0.lock().unwrap().is_empty());
        assert_eq!(stats.open_streams(), 0);
        assert!(!worker.capture().is_active());
    }

    #[test]
    fn test_gated_frames_are_counted() {
        let mut pcm = vec![10i16; 15_600];
        pcm.extend(vec![5_000i16; 15_600]);
        let mic = Arc::new(FixtureMicrophone::from_pcm(pcm));
        let store = SettingsStore::default();
        let worker = MonitorWorker::new(
            Arc::new(AudioCapture::new(mic, &capture_config())),
            Arc::new(SoundClassifier::closed(&ClassifierConfig::default())),
            Arc::new(store),
            Arc::new(TelemetryCollector::default()),
        );

        worker.run(&Collected::default(), &AtomicBool::new(false));
        let snapshot = worker.telemetry.snapshot();
        assert_eq!(snapshot.frames_gated, 1);
        assert_eq!(snapshot.inferences, 1);
    }
}
