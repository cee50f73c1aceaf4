//! Microphone device abstractions.
//!
//! Backends expose a blocking, pull-style read over 16-bit mono PCM so the
//! capture loop can read one frame at a time in lockstep with inference.

use std::time::Duration;

use crate::error::AudioError;

/// Parameters used to open an input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub sample_rate: u32,
    /// Samples per classifier frame
    pub frame_len: usize,
}

impl StreamConfig {
    pub fn new(sample_rate: u32, frame_len: usize) -> Self {
        Self {
            sample_rate,
            frame_len,
        }
    }

    /// Device-side buffer size for a given platform minimum.
    pub fn buffer_size(&self, platform_min: usize) -> usize {
        device_buffer_size(platform_min, self.frame_len)
    }
}

/// Device buffer size: at least two frames so a slow inference does not
/// immediately overrun the device.
pub fn device_buffer_size(platform_min: usize, frame_len: usize) -> usize {
    platform_min.max(frame_len * 2)
}

/// Result of a single blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` samples were written to the front of the buffer
    Data(usize),
    /// No samples arrived before the timeout elapsed
    Timeout,
    /// The source is exhausted (fixtures, files)
    EndOfStream,
}

/// A physical or simulated microphone.
///
/// Implementations must allow reopening after a stream has been closed;
/// the capture layer guarantees at most one open stream per capture.
pub trait MicrophoneDevice: Send + Sync {
    /// Human-readable device name for logs.
    fn name(&self) -> String;

    /// Acquire the device and start recording.
    fn open(&self, config: &StreamConfig) -> Result<Box<dyn InputStream>, AudioError>;
}

/// An open recording stream.
///
/// Streams are used on the thread that opened them; platform handles such
/// as `cpal::Stream` are not `Send`.
pub trait InputStream {
    /// Block until some samples are available or `timeout` elapses.
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<ReadOutcome, AudioError>;

    /// Stop recording and release the device.
    ///
    /// Called exactly once by the capture layer.
    fn close(&mut self) -> Result<(), AudioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size_is_at_least_two_frames() {
        assert_eq!(device_buffer_size(0, 15_600), 31_200);
        assert_eq!(device_buffer_size(1_280, 15_600), 31_200);
        assert_eq!(device_buffer_size(64_000, 15_600), 64_000);
    }

    #[test]
    fn test_stream_config_buffer_size() {
        let config = StreamConfig::new(16_000, 15_600);
        assert_eq!(config.buffer_size(4_096), 31_200);
    }
}
