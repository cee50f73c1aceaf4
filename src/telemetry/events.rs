//! Metric event types describing what the monitoring loop is doing,
//! exposed to the CLI and to hosts through the collector's stream.

use serde::{Deserialize, Serialize};

use crate::analysis::SoundCategory;

/// Lifecycle stages of the monitor and of each capture session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    ScanningStarted,
    ScanningStopped,
    SessionStarted,
    SessionEnded,
    SessionFailed,
    Restarting,
}

/// Metric events covering gating, inference latency, detections and errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    /// Frames dropped by the silence gate since the last accepted frame
    FrameGated {
        count: u64,
    },
    Inference {
        latency_ms: f32,
        results: usize,
    },
    Detection {
        name: String,
        category: SoundCategory,
        confidence: f32,
    },
    Lifecycle {
        phase: LifecyclePhase,
        timestamp_ms: u64,
    },
    Error {
        code: i32,
        context: String,
    },
}
