// Monitor module - detection state machine and its outputs
//
// Architecture:
// - MonitorWorker: one capture -> classify -> threshold -> emit session
// - DetectionPipeline: Idle/Active state machine, restarts on settings change
// - SimulatedMonitor: scripted detections through the same publishing path
// - MonitorPublisher: history, channels, alert sink and telemetry fan-out
//
// Hosts talk to either monitor through the `Monitor` trait.

pub mod alert;
pub mod event;
pub mod history;
pub mod pipeline;
pub mod publisher;
pub mod simulated;
pub mod worker;

pub use alert::{AlertSink, FanoutAlertSink, LoggingAlertSink, VibrationAlertSink, VibrationPlan};
pub use event::{SoundCategory, SoundEvent, FRESH_WINDOW};
pub use history::{EventHistory, HISTORY_CAPACITY};
pub use pipeline::DetectionPipeline;
pub use publisher::MonitorPublisher;
pub use simulated::SimulatedMonitor;
pub use worker::{MonitorWorker, WorkResult};

use crate::error::AudioError;
use crate::managers::MonitorChannels;

/// Receiver of detections produced by a monitoring loop.
pub trait EventEmitter: Send + Sync {
    fn emit_event(&self, event: SoundEvent);
}

/// Host-facing monitor interface.
pub trait Monitor: EventEmitter {
    /// Turn the capture loop on or off.
    ///
    /// Turning on while active and turning off while idle are no-ops.
    fn set_scanning(&self, scanning: bool) -> Result<(), AudioError>;

    /// Observable output of this monitor.
    fn channels(&self) -> &MonitorChannels;

    fn is_scanning(&self) -> bool {
        self.channels().is_scanning()
    }

    /// Retained events, newest first.
    fn history(&self) -> Vec<SoundEvent> {
        self.channels().history()
    }
}
