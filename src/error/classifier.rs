// Classifier error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Classifier error code constants
///
/// Error code range: 2001-2004
pub struct ClassifierErrorCodes {}

impl ClassifierErrorCodes {
    /// Model asset missing or in an unreadable format
    pub const MODEL_LOAD: i32 = 2001;

    /// Inference failed for a single frame
    pub const INFERENCE: i32 = 2002;

    /// Model produced an output tensor of unexpected size
    pub const OUTPUT_SHAPE: i32 = 2003;

    /// Classifier has been closed
    pub const CLOSED: i32 = 2004;
}

/// Log a classifier error with structured context
///
/// Mirrors [`crate::error::log_audio_error`] for the inference path.
pub fn log_classifier_error(err: &ClassifierError, context: &str) {
    error!(
        "Classifier error in {}: code={}, component=SoundClassifier, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Classification-related errors
///
/// None of these abort monitoring: a failed model load leaves the classifier
/// closed, and a failed inference only skips the current frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierError {
    /// Model could not be loaded
    ModelLoad { reason: String },

    /// Inference failed
    Inference { reason: String },

    /// Output tensor is not a whole number of score rows
    OutputShape { expected: usize, actual: usize },

    /// Classifier closed or never loaded
    Closed,
}

impl ErrorCode for ClassifierError {
    fn code(&self) -> i32 {
        match self {
            ClassifierError::ModelLoad { .. } => ClassifierErrorCodes::MODEL_LOAD,
            ClassifierError::Inference { .. } => ClassifierErrorCodes::INFERENCE,
            ClassifierError::OutputShape { .. } => ClassifierErrorCodes::OUTPUT_SHAPE,
            ClassifierError::Closed => ClassifierErrorCodes::CLOSED,
        }
    }

    fn message(&self) -> String {
        match self {
            ClassifierError::ModelLoad { reason } => {
                format!("Failed to load sound model: {}", reason)
            }
            ClassifierError::Inference { reason } => {
                format!("Inference failed: {}", reason)
            }
            ClassifierError::OutputShape { expected, actual } => {
                format!(
                    "Output of {} scores is not a multiple of {} classes",
                    actual, expected
                )
            }
            ClassifierError::Closed => "Classifier is closed".to_string(),
        }
    }
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClassifierError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ClassifierError {}
