// Alert sinks - consumers of detections and scanning changes
//
// The pipeline only calls `on_event` and `on_scanning_changed`; how a sink
// turns that into a notification, a vibration or a UI update is its own
// business. Sinks run on the pipeline's threads and must return quickly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::SoundCategory;
use crate::settings::{MonitorSettings, SettingsSource, VibrationIntensity, VibrationPattern};

use super::event::SoundEvent;

/// Consumer of pipeline output.
pub trait AlertSink: Send + Sync {
    fn on_event(&self, event: &SoundEvent);

    fn on_scanning_changed(&self, scanning: bool);
}

/// Waveform handed to the host vibrator.
///
/// `timings_ms` alternates off/on durations starting with an off delay;
/// `amplitudes` holds the matching 0-255 strength for each segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VibrationPlan {
    pub timings_ms: Vec<u64>,
    pub amplitudes: Vec<u8>,
    pub repeat: bool,
}

impl VibrationPlan {
    /// Full-strength plan for a category.
    pub fn for_category(category: SoundCategory) -> Self {
        let (timings_ms, amplitudes) = match category {
            SoundCategory::Critical => (
                vec![0, 500, 100, 500, 100, 1000],
                vec![0, 255, 0, 255, 0, 255],
            ),
            SoundCategory::Warning => (vec![0, 200, 100, 200], vec![0, 200, 0, 200]),
            SoundCategory::Info => (vec![0, 50], vec![0, 50]),
        };
        Self {
            timings_ms,
            amplitudes,
            repeat: false,
        }
    }

    /// Plan for a category shaped by the user's vibration settings.
    pub fn for_settings(category: SoundCategory, settings: &MonitorSettings) -> Self {
        Self::for_category(category)
            .with_pattern(settings.vibration_pattern)
            .with_intensity(settings.vibration_intensity)
    }

    /// Scale every non-zero amplitude, keeping it within 1..=255.
    pub fn with_intensity(mut self, intensity: VibrationIntensity) -> Self {
        let scale = intensity.scale();
        for amplitude in self.amplitudes.iter_mut().filter(|a| **a > 0) {
            *amplitude = (*amplitude as f32 * scale).round().clamp(1.0, 255.0) as u8;
        }
        self
    }

    pub fn with_pattern(mut self, pattern: VibrationPattern) -> Self {
        match pattern {
            VibrationPattern::Default => {}
            VibrationPattern::Short => {
                self.timings_ms.truncate(2);
                self.amplitudes.truncate(2);
            }
            VibrationPattern::Long => {
                for (timing, amplitude) in self.timings_ms.iter_mut().zip(&self.amplitudes) {
                    if *amplitude > 0 {
                        *timing *= 2;
                    }
                }
            }
        }
        self
    }

    /// Total duration of the plan.
    pub fn total_ms(&self) -> u64 {
        self.timings_ms.iter().sum()
    }
}

/// Logs every callback; the default sink of the CLI.
#[derive(Debug, Default)]
pub struct LoggingAlertSink;

impl AlertSink for LoggingAlertSink {
    fn on_event(&self, event: &SoundEvent) {
        tracing::info!(
            "[Alert] {} ({}, {:.0}%)",
            event.name,
            event.category.as_str(),
            event.confidence * 100.0
        );
    }

    fn on_scanning_changed(&self, scanning: bool) {
        tracing::info!("[Alert] Scanning {}", if scanning { "started" } else { "stopped" });
    }
}

/// Forwards every callback to each inner sink in order.
#[derive(Default)]
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutAlertSink {
    fn on_event(&self, event: &SoundEvent) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }

    fn on_scanning_changed(&self, scanning: bool) {
        for sink in &self.sinks {
            sink.on_scanning_changed(scanning);
        }
    }
}

/// Builds a vibration plan from the current settings and hands it to the
/// host vibrator callback.
pub struct VibrationAlertSink<F> {
    settings: Arc<dyn SettingsSource>,
    vibrate: F,
}

impl<F> VibrationAlertSink<F>
where
    F: Fn(&VibrationPlan) + Send + Sync,
{
    pub fn new(settings: Arc<dyn SettingsSource>, vibrate: F) -> Self {
        Self { settings, vibrate }
    }
}

impl<F> AlertSink for VibrationAlertSink<F>
where
    F: Fn(&VibrationPlan) + Send + Sync,
{
    fn on_event(&self, event: &SoundEvent) {
        let settings = self.settings.current();
        if !settings.vibration_enabled {
            return;
        }
        let plan = VibrationPlan::for_settings(event.category, &settings);
        tracing::debug!(
            "[Alert] Vibrating {} ms for {}",
            plan.total_ms(),
            event.category.as_str()
        );
        (self.vibrate)(&plan);
    }

    fn on_scanning_changed(&self, _scanning: bool) {}
}
