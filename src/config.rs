//! Configuration management for the monitoring engine
//!
//! This module provides runtime configuration loading from JSON files,
//! covering the fixed engine parameters (frame geometry, model location,
//! pipeline limits). User-facing knobs such as sensitivity and gain live in
//! [`crate::settings::MonitorSettings`] instead, because they change while
//! the pipeline runs.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::{FRAME_LEN, SAMPLE_RATE};

/// Config file read by [`AppConfig::load`] on desktop platforms
pub const DEFAULT_CONFIG_PATH: &str = "assets/sense_config.json";

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Microphone capture parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Sample rate requested from the device in Hz
    pub sample_rate: u32,
    /// Samples per frame handed to the classifier
    pub frame_len: usize,
    /// Upper bound for one blocking read before the stop flag is re-checked
    pub read_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_len: FRAME_LEN,
            read_timeout_ms: 250,
        }
    }
}

/// Sound-event model parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Path of the bundled model asset
    pub model_path: PathBuf,
    /// Number of per-class scores per output row
    pub num_classes: usize,
    /// Scores at or below this floor are never reported
    pub score_floor: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("assets/yamnet.onnx"),
            num_classes: 521,
            score_floor: 0.3,
        }
    }
}

/// Detection pipeline parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of events retained in history
    pub history_capacity: usize,
    /// Pause between tearing down and reacquiring the microphone on restart
    pub restart_delay_ms: u64,
    /// Buffer size of the event broadcast channel
    pub event_channel_capacity: usize,
    /// How long a published event counts as fresh for display purposes
    pub fresh_window_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            restart_delay_ms: 500,
            event_channel_capacity: 64,
            fresh_window_ms: 5_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// Loaded configuration, or the defaults when the file is missing or the
    /// JSON is invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    tracing::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration on Android
    ///
    /// Assets are packed inside the APK and only reachable through the
    /// AssetManager; the host passes the extracted model path separately, so
    /// the defaults are used here.
    #[cfg(target_os = "android")]
    pub fn load() -> Self {
        tracing::info!("[Config] Using default configuration on Android");
        Self::default()
    }

    /// Load configuration for non-Android platforms from [`DEFAULT_CONFIG_PATH`]
    #[cfg(not(target_os = "android"))]
    pub fn load() -> Self {
        Self::load_from_file(DEFAULT_CONFIG_PATH)
    }
}
