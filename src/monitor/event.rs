//! Detected sound events.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::ClassificationResult;
use crate::telemetry::now_timestamp_ms;

pub use crate::analysis::SoundCategory;

/// Window during which a published event counts as "active" for display.
pub const FRESH_WINDOW: Duration = Duration::from_secs(5);

/// An immutable record of one detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundEvent {
    /// Random UUID v4 string
    pub id: String,
    pub name: String,
    pub category: SoundCategory,
    pub confidence: f32,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl SoundEvent {
    /// New event stamped with a fresh id and the current time.
    pub fn new(name: impl Into<String>, category: SoundCategory, confidence: f32) -> Self {
        Self::at(name, category, confidence, now_timestamp_ms())
    }

    /// New event with an explicit timestamp.
    pub fn at(
        name: impl Into<String>,
        category: SoundCategory,
        confidence: f32,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: new_event_id(),
            name: name.into(),
            category,
            confidence,
            timestamp_ms,
        }
    }

    pub fn from_result(result: &ClassificationResult) -> Self {
        Self::new(result.label.clone(), result.category, result.score)
    }

    /// Whether the event is still inside `window` at `now_ms`.
    ///
    /// Events stamped in the future (clock adjustments) count as fresh.
    pub fn is_fresh_at(&self, now_ms: u64, window: Duration) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) < window.as_millis() as u64
    }

    /// Whether the event is inside the default 5 s window right now.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(now_timestamp_ms(), FRESH_WINDOW)
    }
}

/// Random RFC 4122 version 4 identifier.
fn new_event_id() -> String {
    let bits: u128 = rand::random();
    // version nibble, then variant bits
    let bits = (bits & !(0xF000u128 << 64)) | (0x4000u128 << 64);
    let bits = (bits & !(0xC000u128 << 48)) | (0x8000u128 << 48);
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        (bits >> 96) as u32,
        (bits >> 80) as u16,
        (bits >> 64) as u16,
        (bits >> 48) as u16,
        bits & 0xFFFF_FFFF_FFFF
    )
}
