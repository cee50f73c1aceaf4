// Oboe microphone backend for Android
//
// Opens a shared, power-saving 16 kHz mono i16 input stream and reads it
// synchronously from the capture thread. RECORD_AUDIO must be granted by the
// host before the stream is opened; Oboe reports a denied permission as an
// open failure.

use std::time::Duration;

use oboe::{
    AudioInputStreamSync, AudioStream, AudioStreamBuilder, AudioStreamSync, Input, InputPreset,
    Mono, PerformanceMode, SharingMode,
};

use crate::error::AudioError;

use super::device::{InputStream, MicrophoneDevice, ReadOutcome, StreamConfig};

type MonoInput = AudioStreamSync<Input, (i16, Mono)>;

/// Default Android microphone.
#[derive(Debug, Default)]
pub struct OboeMicrophone;

impl OboeMicrophone {
    pub fn new() -> Self {
        Self
    }
}

impl MicrophoneDevice for OboeMicrophone {
    fn name(&self) -> String {
        "default input (oboe)".to_string()
    }

    fn open(&self, config: &StreamConfig) -> Result<Box<dyn InputStream>, AudioError> {
        let mut stream: MonoInput = AudioStreamBuilder::default()
            .set_performance_mode(PerformanceMode::PowerSaving)
            .set_sharing_mode(SharingMode::Shared)
            .set_input_preset(InputPreset::Unprocessed)
            .set_direction::<Input>()
            .set_sample_rate(config.sample_rate as i32)
            .set_channel_count::<Mono>()
            .set_format::<i16>()
            .set_buffer_capacity_in_frames(config.buffer_size(0) as i32)
            .open_stream()
            .map_err(|e| AudioError::DeviceInitFailed {
                reason: format!("Input stream: {:?}", e),
            })?;

        stream
            .request_start()
            .map_err(|e| AudioError::DeviceInitFailed {
                reason: format!("Failed to start input stream: {:?}", e),
            })?;

        tracing::info!(
            "[OboeMicrophone] Recording at {} Hz, buffer {} frames",
            config.sample_rate,
            config.buffer_size(0)
        );

        Ok(Box::new(OboeInputStream {
            stream: Some(stream),
        }))
    }
}

struct OboeInputStream {
    stream: Option<MonoInput>,
}

impl InputStream for OboeInputStream {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<ReadOutcome, AudioError> {
        let stream = self.stream.as_mut().ok_or(AudioError::NotRunning)?;
        let read = stream
            .read(buf, timeout.as_nanos() as i64)
            .map_err(|e| AudioError::ReadFailed {
                reason: format!("{:?}", e),
            })?;

        if read <= 0 {
            Ok(ReadOutcome::Timeout)
        } else {
            Ok(ReadOutcome::Data(read as usize))
        }
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if let Some(mut stream) = self.stream.take() {
            stream.stop().map_err(|e| AudioError::StreamFailure {
                reason: format!("Failed to stop input stream: {:?}", e),
            })?;
        }
        Ok(())
    }
}
