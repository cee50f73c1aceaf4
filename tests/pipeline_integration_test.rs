//! Integration tests for the detection pipeline
//!
//! These tests drive the full Idle/Active lifecycle with fixture
//! microphones and scripted models, covering:
//! - Strict detection threshold and top-result selection
//! - Bounded history across many detections
//! - Exclusive microphone use across rapid start/stop
//! - Restart on settings change, failure handling and degraded operation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use sense_core::analysis::{score_vector, ScriptedModel, SoundCategory, SoundClassifier};
use sense_core::audio::fixture::FixtureMicrophone;
use sense_core::audio::AudioCapture;
use sense_core::config::{CaptureConfig, ClassifierConfig, PipelineConfig};
use sense_core::error::{AudioError, ClassifierError};
use sense_core::monitor::{AlertSink, DetectionPipeline, Monitor, SoundEvent, WorkResult};
use sense_core::settings::{SensitivityLevel, SettingsStore};
use sense_core::telemetry::TelemetryCollector;

const FRAME: usize = 15_600;
const CLASSES: usize = 521;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<SoundEvent>>,
    scanning: Mutex<Vec<bool>>,
}

impl AlertSink for RecordingSink {
    fn on_event(&self, event: &SoundEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_scanning_changed(&self, scanning: bool) {
        self.scanning.lock().unwrap().push(scanning);
    }
}

struct Harness {
    pipeline: DetectionPipeline,
    store: Arc<SettingsStore>,
    sink: Arc<RecordingSink>,
}

fn harness(mic: Arc<FixtureMicrophone>, classifier: SoundClassifier) -> Harness {
    let store = Arc::new(SettingsStore::default());
    let sink = Arc::new(RecordingSink::default());
    let capture_config = CaptureConfig {
        read_timeout_ms: 10,
        ..CaptureConfig::default()
    };
    let pipeline = DetectionPipeline::new(
        PipelineConfig {
            restart_delay_ms: 20,
            ..PipelineConfig::default()
        },
        Arc::new(AudioCapture::new(mic, &capture_config)),
        Arc::new(classifier),
        store.clone(),
        sink.clone(),
        Arc::new(TelemetryCollector::default()),
    );
    Harness {
        pipeline,
        store,
        sink,
    }
}

fn scripted(model: ScriptedModel) -> SoundClassifier {
    SoundClassifier::new(Box::new(model), &ClassifierConfig::default())
}

fn loud_frames(count: usize) -> Arc<FixtureMicrophone> {
    Arc::new(FixtureMicrophone::from_pcm(vec![3_000; FRAME * count]).with_chunk_size(FRAME))
}

fn paced_tone() -> Arc<FixtureMicrophone> {
    Arc::new(FixtureMicrophone::endless_tone(440.0, 0.5).with_pace(Duration::from_millis(2)))
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn run_to_completion(harness: &Harness) -> WorkResult {
    harness.pipeline.set_scanning(true).unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || harness.pipeline.last_outcome().is_some()
            && !harness.pipeline.is_scanning()),
        "pipeline did not return to idle"
    );
    harness.pipeline.last_outcome().unwrap()
}

#[test]
fn test_medium_sensitivity_threshold_boundary() {
    let model = ScriptedModel::sequence(
        FRAME,
        vec![
            Ok(score_vector(CLASSES, &[(390, 0.39)])),
            Ok(score_vector(CLASSES, &[(390, 0.41)])),
        ],
    );
    let harness = harness(loud_frames(2), scripted(model));
    harness
        .store
        .update(|s| s.sensitivity = SensitivityLevel::Medium);

    assert_eq!(run_to_completion(&harness), WorkResult::Success);

    let events = harness.sink.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "Siren");
    assert_eq!(events[0].category, SoundCategory::Critical);
    assert!((events[0].confidence - 0.41).abs() < 1e-6);
}

#[test]
fn test_unmapped_top_class_never_emits() {
    // Speech (index 0) scores highest but has no category
    let model = ScriptedModel::constant(FRAME, score_vector(CLASSES, &[(0, 0.99), (353, 0.2)]));
    let harness = harness(loud_frames(2), scripted(model));

    run_to_completion(&harness);
    assert!(harness.sink.events.lock().unwrap().is_empty());
    assert!(harness.pipeline.history().is_empty());
}

#[test]
fn test_history_keeps_fifty_newest() {
    let model = ScriptedModel::constant(FRAME, score_vector(CLASSES, &[(349, 0.9)]));
    let harness = harness(loud_frames(51), scripted(model));
    let mut events = harness.pipeline.subscribe_events();

    run_to_completion(&harness);

    let mut ids = Vec::new();
    while let Ok(event) = events.try_recv() {
        ids.push(event.id);
    }
    assert_eq!(ids.len(), 51);

    let history = harness.pipeline.history();
    assert_eq!(history.len(), 50);
    assert_eq!(history[0].id, ids[50]);
    assert!(history.iter().all(|event| event.id != ids[0]));
    assert_eq!(
        harness.pipeline.channels().last_detection().map(|e| e.id),
        Some(ids[50].clone())
    );
}

#[test]
fn test_rapid_toggling_never_double_acquires() {
    let mic = paced_tone();
    let stats = mic.stats();
    let model = ScriptedModel::constant(FRAME, score_vector(CLASSES, &[]));
    let harness = harness(mic, scripted(model));

    for _ in 0..10 {
        harness.pipeline.set_scanning(true).unwrap();
        harness.pipeline.set_scanning(false).unwrap();
        harness.pipeline.set_scanning(true).unwrap();
    }
    harness.pipeline.set_scanning(false).unwrap();

    assert_eq!(stats.max_concurrent(), 1);
    assert_eq!(stats.open_streams(), 0);
    assert!(!harness.pipeline.capture().is_active());
}

#[test]
fn test_stop_is_idempotent() {
    let mic = paced_tone();
    let stats = mic.stats();
    let model = ScriptedModel::constant(FRAME, score_vector(CLASSES, &[]));
    let harness = harness(mic, scripted(model));

    harness.pipeline.set_scanning(true).unwrap();
    assert!(wait_until(Duration::from_secs(5), || stats.opens() == 1));
    harness.pipeline.set_scanning(false).unwrap();
    harness.pipeline.set_scanning(false).unwrap();

    assert_eq!(stats.closes(), 1);
    assert_eq!(harness.pipeline.capture().release_count(), 1);
    assert_eq!(*harness.sink.scanning.lock().unwrap(), vec![true, false]);
}

#[test]
fn test_settings_restart_preserves_history() {
    let mic = Arc::new(
        FixtureMicrophone::endless_tone(440.0, 0.5).with_pace(Duration::from_millis(10)),
    );
    let stats = mic.stats();
    let model = ScriptedModel::constant(FRAME, score_vector(CLASSES, &[(20, 0.7)]));
    let harness = harness(mic, scripted(model));

    harness.pipeline.set_scanning(true).unwrap();
    assert!(wait_until(Duration::from_secs(5), || !harness
        .pipeline
        .history()
        .is_empty()));
    let first = harness.pipeline.history().last().cloned().unwrap();

    harness
        .store
        .update(|s| s.sensitivity = SensitivityLevel::High);
    assert!(wait_until(Duration::from_secs(5), || stats.opens() == 2));
    assert!(harness.pipeline.is_scanning());

    harness.pipeline.set_scanning(false).unwrap();
    let history = harness.pipeline.history();
    assert_eq!(history.last().map(|e| e.id.clone()), Some(first.id));
    assert_eq!(stats.max_concurrent(), 1);
    // Restart keeps scanning on; the sink saw one start and one stop
    assert_eq!(*harness.sink.scanning.lock().unwrap(), vec![true, false]);
}

#[test]
fn test_device_failure_returns_to_idle() {
    let mic = Arc::new(FixtureMicrophone::failing_open(AudioError::PermissionDenied));
    let model = ScriptedModel::constant(FRAME, score_vector(CLASSES, &[]));
    let harness = harness(mic, scripted(model));

    let outcome = run_to_completion(&harness);
    assert_eq!(outcome, WorkResult::Failure(AudioError::PermissionDenied));
    assert!(!harness.pipeline.is_scanning());
    assert!(wait_until(Duration::from_secs(1), || {
        *harness.sink.scanning.lock().unwrap() == vec![true, false]
    }));
    assert_eq!(harness.pipeline.capture().sessions_started(), 0);
    assert!(!harness.pipeline.capture().is_active());
}

#[test]
fn test_read_failure_is_reported() {
    let mic = Arc::new(
        FixtureMicrophone::from_pcm(vec![3_000; FRAME * 5])
            .with_chunk_size(FRAME)
            .fail_read_after(3),
    );
    let stats = mic.stats();
    let model = ScriptedModel::constant(FRAME, score_vector(CLASSES, &[(393, 0.8)]));
    let harness = harness(mic, scripted(model));

    let outcome = run_to_completion(&harness);
    assert!(matches!(outcome, WorkResult::Failure(AudioError::ReadFailed { .. })));
    assert_eq!(harness.pipeline.history().len(), 3);
    assert_eq!(stats.open_streams(), 0);
}

#[test]
fn test_inference_error_does_not_stop_scanning() {
    let model = ScriptedModel::sequence(
        FRAME,
        vec![
            Ok(score_vector(CLASSES, &[(394, 0.9)])),
            Err(ClassifierError::Inference {
                reason: "interpreter hiccup".to_string(),
            }),
            Ok(score_vector(CLASSES, &[(394, 0.9)])),
        ],
    );
    let harness = harness(loud_frames(3), scripted(model));

    assert_eq!(run_to_completion(&harness), WorkResult::Success);
    assert_eq!(harness.pipeline.history().len(), 2);
    assert_eq!(harness.pipeline.telemetry().snapshot().errors, 1);
}

#[test]
fn test_closed_classifier_keeps_capturing() {
    let classifier = SoundClassifier::closed(&ClassifierConfig::default());
    let harness = harness(loud_frames(4), classifier);

    assert_eq!(run_to_completion(&harness), WorkResult::Success);
    assert!(harness.pipeline.history().is_empty());
    assert_eq!(harness.pipeline.telemetry().snapshot().inferences, 4);
}

#[test]
fn test_silent_frames_are_never_classified() {
    let mut pcm = vec![50i16; FRAME * 2];
    pcm.extend(vec![3_000i16; FRAME]);
    let mic = Arc::new(FixtureMicrophone::from_pcm(pcm));
    let model = ScriptedModel::constant(FRAME, score_vector(CLASSES, &[(353, 0.9)]));
    let probe = model.probe();
    let harness = harness(mic, scripted(model));

    run_to_completion(&harness);
    assert_eq!(probe.lock().unwrap().calls(), 1);
    assert_eq!(harness.pipeline.history().len(), 1);
    assert_eq!(harness.pipeline.telemetry().snapshot().frames_gated, 2);
}

/// Host-side retry policy: on the first "scanning stopped" it asks the
/// pipeline to start again from inside the callback.
#[derive(Default)]
struct RetryOnStopSink {
    pipeline: Mutex<Weak<DetectionPipeline>>,
    retries: AtomicUsize,
    retry_results: Mutex<Vec<bool>>,
    scanning: Mutex<Vec<bool>>,
}

impl AlertSink for RetryOnStopSink {
    fn on_event(&self, _event: &SoundEvent) {}

    fn on_scanning_changed(&self, scanning: bool) {
        self.scanning.lock().unwrap().push(scanning);
        if scanning || self.retries.fetch_add(1, Ordering::SeqCst) > 0 {
            return;
        }
        let pipeline = self.pipeline.lock().unwrap().upgrade();
        if let Some(pipeline) = pipeline {
            let retried = pipeline.set_scanning(true).is_ok();
            self.retry_results.lock().unwrap().push(retried);
        }
    }
}

#[test]
fn test_sink_can_restart_scanning_from_callback() {
    let mic = Arc::new(FixtureMicrophone::failing_open(AudioError::PermissionDenied));
    let model = ScriptedModel::constant(FRAME, score_vector(CLASSES, &[]));
    let sink = Arc::new(RetryOnStopSink::default());
    let capture_config = CaptureConfig {
        read_timeout_ms: 10,
        ..CaptureConfig::default()
    };
    let pipeline = Arc::new(DetectionPipeline::new(
        PipelineConfig {
            restart_delay_ms: 20,
            ..PipelineConfig::default()
        },
        Arc::new(AudioCapture::new(mic, &capture_config)),
        Arc::new(scripted(model)),
        Arc::new(SettingsStore::default()),
        sink.clone(),
        Arc::new(TelemetryCollector::default()),
    ));
    *sink.pipeline.lock().unwrap() = Arc::downgrade(&pipeline);

    pipeline.set_scanning(true).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            sink.retry_results.lock().unwrap().len() == 1
                && sink.scanning.lock().unwrap().len() == 4
        }),
        "retry from the sink never completed"
    );
    assert_eq!(*sink.retry_results.lock().unwrap(), vec![true]);
    assert_eq!(*sink.scanning.lock().unwrap(), vec![true, false, true, false]);
    assert!(!pipeline.is_scanning());

    // The pipeline still answers the host afterwards
    let (done_tx, done_rx) = mpsc::channel();
    let host = Arc::clone(&pipeline);
    thread::spawn(move || {
        let _ = done_tx.send(host.set_scanning(false).is_ok());
    });
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)), Ok(true));
    assert_eq!(
        pipeline.last_outcome(),
        Some(WorkResult::Failure(AudioError::PermissionDenied))
    );
}

#[test]
fn test_clear_history() {
    let model = ScriptedModel::constant(FRAME, score_vector(CLASSES, &[(350, 0.9)]));
    let harness = harness(loud_frames(2), scripted(model));

    run_to_completion(&harness);
    assert_eq!(harness.pipeline.history().len(), 2);
    harness.pipeline.clear_history();
    assert!(harness.pipeline.history().is_empty());
}
