// Audio module - microphone acquisition and frame production
//
// Capture reads fixed 0.975 s windows of 16 kHz mono PCM from an exclusive
// microphone device, gates near-silence and hands normalized frames to the
// classifier one at a time (no frame queue).

pub mod capture;
pub mod device;
pub mod fixture;
pub mod frame;

#[cfg(not(target_os = "android"))]
pub mod backend_cpal;
#[cfg(target_os = "android")]
pub mod backend_oboe;

// Re-export commonly used types for convenience
pub use capture::{AudioCapture, CaptureParams, CaptureSession};
pub use device::{device_buffer_size, InputStream, MicrophoneDevice, ReadOutcome, StreamConfig};
pub use frame::{AudioFrame, FRAME_LEN, SAMPLE_RATE};

#[cfg(not(target_os = "android"))]
pub use backend_cpal::CpalMicrophone;
#[cfg(target_os = "android")]
pub use backend_oboe::OboeMicrophone;

use std::sync::Arc;

/// Microphone for the current platform (Oboe on Android, CPAL elsewhere).
#[cfg(target_os = "android")]
pub fn platform_microphone() -> Arc<dyn MicrophoneDevice> {
    Arc::new(OboeMicrophone::new())
}

/// Microphone for the current platform (Oboe on Android, CPAL elsewhere).
#[cfg(not(target_os = "android"))]
pub fn platform_microphone() -> Arc<dyn MicrophoneDevice> {
    Arc::new(CpalMicrophone::new(None))
}
