//! User-facing monitor settings and the settings source seam
//!
//! The settings store itself belongs to the host application; the core only
//! reads snapshots and watches for changes. [`SettingsStore`] is an in-memory
//! implementation used by the CLI, the tests and hosts that push settings
//! over FFI.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::analysis::categories::CategoryMapper;

/// Five-point sensitivity scale shown to the user.
///
/// Higher sensitivity means a lower detection threshold and therefore more
/// detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityLevel {
    VeryLow,
    Low,
    #[default]
    Medium,
    High,
    VeryHigh,
}

impl SensitivityLevel {
    /// All levels in ascending sensitivity order.
    pub const ALL: [SensitivityLevel; 5] = [
        SensitivityLevel::VeryLow,
        SensitivityLevel::Low,
        SensitivityLevel::Medium,
        SensitivityLevel::High,
        SensitivityLevel::VeryHigh,
    ];

    /// Minimum top-class score required to emit an event at this level.
    pub fn detection_threshold(self) -> f32 {
        CategoryMapper::detection_threshold(self)
    }

    /// Parse the CLI/FFI spelling (`very_low`, `medium`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "very_low" => Some(SensitivityLevel::VeryLow),
            "low" => Some(SensitivityLevel::Low),
            "medium" => Some(SensitivityLevel::Medium),
            "high" => Some(SensitivityLevel::High),
            "very_high" => Some(SensitivityLevel::VeryHigh),
            _ => None,
        }
    }
}

/// Shape of the vibration played for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VibrationPattern {
    #[default]
    Default,
    Short,
    Long,
}

/// Strength of the vibration played for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VibrationIntensity {
    Low,
    Medium,
    #[default]
    High,
}

impl VibrationIntensity {
    /// Multiplier applied to the full-strength amplitudes.
    pub fn scale(self) -> f32 {
        match self {
            VibrationIntensity::Low => 0.4,
            VibrationIntensity::Medium => 0.7,
            VibrationIntensity::High => 1.0,
        }
    }
}

/// Notification preferences, interpreted by alert sinks only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPrefs {
    pub enabled: bool,
    pub show_confidence: bool,
    pub play_sound: bool,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            enabled: true,
            show_confidence: true,
            play_sound: false,
        }
    }
}

/// Background execution constraints handed to the host scheduler.
///
/// The core never evaluates these; a change only forces a restart so the
/// host can re-enqueue the work with the new constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryConstraints {
    pub requires_charging: bool,
    pub requires_battery_not_low: bool,
}

/// Snapshot of every setting the monitor cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub sensitivity: SensitivityLevel,
    /// Multiplier applied to normalized samples (can clip above 1.0)
    pub microphone_gain: f32,
    /// Frames whose raw peak amplitude is below this are dropped
    pub silence_floor: u32,
    /// Remove the DC offset of each frame before gain is applied
    pub noise_reduction: bool,
    pub vibration_enabled: bool,
    pub vibration_pattern: VibrationPattern,
    pub vibration_intensity: VibrationIntensity,
    pub notifications: NotificationPrefs,
    pub battery: BatteryConstraints,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sensitivity: SensitivityLevel::Medium,
            microphone_gain: 1.0,
            silence_floor: 100,
            noise_reduction: false,
            vibration_enabled: true,
            vibration_pattern: VibrationPattern::Default,
            vibration_intensity: VibrationIntensity::High,
            notifications: NotificationPrefs::default(),
            battery: BatteryConstraints::default(),
        }
    }
}

impl MonitorSettings {
    pub fn detection_threshold(&self) -> f32 {
        self.sensitivity.detection_threshold()
    }

    /// Whether moving from `self` to `next` changes the audio path.
    ///
    /// Only these fields are read at session start, so only they force the
    /// capture/classify loop to restart. Vibration and notification changes
    /// are picked up by the alert sinks on the next event.
    pub fn requires_restart(&self, next: &MonitorSettings) -> bool {
        self.sensitivity != next.sensitivity
            || self.microphone_gain.to_bits() != next.microphone_gain.to_bits()
            || self.silence_floor != next.silence_floor
            || self.noise_reduction != next.noise_reduction
            || self.battery != next.battery
    }
}

/// Source of settings snapshots consumed by the pipeline.
pub trait SettingsSource: Send + Sync {
    /// Current snapshot.
    fn current(&self) -> MonitorSettings;

    /// Receiver notified on every change.
    fn subscribe(&self) -> watch::Receiver<MonitorSettings>;
}

/// In-memory settings store backed by a `watch` channel.
pub struct SettingsStore {
    tx: watch::Sender<MonitorSettings>,
}

impl SettingsStore {
    pub fn new(initial: MonitorSettings) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the snapshot and notify watchers.
    pub fn set(&self, settings: MonitorSettings) {
        self.tx.send_replace(settings);
    }

    /// Apply an in-place edit and notify watchers.
    pub fn update<F>(&self, edit: F)
    where
        F: FnOnce(&mut MonitorSettings),
    {
        self.tx.send_modify(edit);
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(MonitorSettings::default())
    }
}

impl SettingsSource for SettingsStore {
    fn current(&self) -> MonitorSettings {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<MonitorSettings> {
        self.tx.subscribe()
    }
}
