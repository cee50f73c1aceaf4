// Audio error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Single source of truth for the codes reported to the host application
/// when a capture session fails.
///
/// Error code range: 1001-1010
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Microphone device could not be opened or initialized
    pub const DEVICE_INIT_FAILED: i32 = 1001;

    /// Blocking read from the microphone failed
    pub const READ_FAILED: i32 = 1002;

    /// A capture session is already active
    pub const ALREADY_RUNNING: i32 = 1003;

    /// No capture session is active
    pub const NOT_RUNNING: i32 = 1004;

    /// Microphone permission denied
    pub const PERMISSION_DENIED: i32 = 1005;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1006;

    /// Android context was not initialized before the microphone was opened
    pub const CONTEXT_NOT_INITIALIZED: i32 = 1007;

    /// Audio stream disconnected or channel closed unexpectedly
    pub const STREAM_FAILURE: i32 = 1008;

    /// Device only offers a sample format the capture path cannot convert
    pub const UNSUPPORTED_FORMAT: i32 = 1009;

    /// The monitoring worker thread panicked
    pub const WORKER_PANICKED: i32 = 1010;
}

/// Log an audio error with structured context
///
/// This function logs audio errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=AudioCapture, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover microphone acquisition, blocking reads and capture
/// session management. Device and read failures are the only errors that
/// end a monitoring session with a failure result.
///
/// Error code ranges: 1001-1010
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Microphone failed to open
    DeviceInitFailed { reason: String },

    /// Read from the microphone failed
    ReadFailed { reason: String },

    /// Capture session already active
    AlreadyRunning,

    /// Capture session not active
    NotRunning,

    /// Microphone permission denied
    PermissionDenied,

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Android context was not initialized before capture start
    ContextNotInitialized,

    /// Stream channel disconnected unexpectedly
    StreamFailure { reason: String },

    /// Device sample format cannot be converted to 16-bit PCM
    UnsupportedFormat { format: String },

    /// Worker thread panicked
    WorkerPanicked,
}

impl AudioError {
    /// Whether this error ends a capture session (as opposed to a usage error)
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            AudioError::DeviceInitFailed { .. }
                | AudioError::ReadFailed { .. }
                | AudioError::PermissionDenied
                | AudioError::ContextNotInitialized
                | AudioError::StreamFailure { .. }
                | AudioError::UnsupportedFormat { .. }
                | AudioError::WorkerPanicked
        )
    }
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::DeviceInitFailed { .. } => AudioErrorCodes::DEVICE_INIT_FAILED,
            AudioError::ReadFailed { .. } => AudioErrorCodes::READ_FAILED,
            AudioError::AlreadyRunning => AudioErrorCodes::ALREADY_RUNNING,
            AudioError::NotRunning => AudioErrorCodes::NOT_RUNNING,
            AudioError::PermissionDenied => AudioErrorCodes::PERMISSION_DENIED,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::ContextNotInitialized => AudioErrorCodes::CONTEXT_NOT_INITIALIZED,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
            AudioError::UnsupportedFormat { .. } => AudioErrorCodes::UNSUPPORTED_FORMAT,
            AudioError::WorkerPanicked => AudioErrorCodes::WORKER_PANICKED,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::DeviceInitFailed { reason } => {
                format!("Failed to open microphone: {}", reason)
            }
            AudioError::ReadFailed { reason } => {
                format!("Microphone read failed: {}", reason)
            }
            AudioError::AlreadyRunning => {
                "Capture already running. Call stop() first.".to_string()
            }
            AudioError::NotRunning => "Capture not running. Call start() first.".to_string(),
            AudioError::PermissionDenied => {
                "Microphone permission denied. Please grant microphone access.".to_string()
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::ContextNotInitialized => {
                "Android context not initialized. Load the native library first.".to_string()
            }
            AudioError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
            AudioError::UnsupportedFormat { format } => {
                format!("Unsupported sample format: {}", format)
            }
            AudioError::WorkerPanicked => "Monitoring worker panicked".to_string(),
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => AudioError::PermissionDenied,
            _ => AudioError::ReadFailed {
                reason: err.to_string(),
            },
        }
    }
}
