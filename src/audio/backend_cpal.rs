// CPAL microphone backend for desktop hosts
//
// The CPAL callback pushes mono 16-bit samples into a lock-free rtrb ring;
// `read` drains the ring from the capture thread with a bounded wait. The
// ring holds at least two frames so one slow inference does not overrun it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::AudioError;

use super::device::{InputStream, MicrophoneDevice, ReadOutcome, StreamConfig};
use super::frame::PCM_FULL_SCALE;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Desktop microphone opened through the default CPAL host.
pub struct CpalMicrophone {
    preferred_device: Option<String>,
}

impl CpalMicrophone {
    /// Use the named input device, or the host default when `None`.
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }

    fn select_device(&self) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        match &self.preferred_device {
            Some(wanted) => host
                .input_devices()
                .map_err(|e| AudioError::DeviceInitFailed {
                    reason: format!("Failed to enumerate input devices: {:?}", e),
                })?
                .find(|device| device.name().map(|n| &n == wanted).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceInitFailed {
                    reason: format!("Input device '{}' not found", wanted),
                }),
            None => host
                .default_input_device()
                .ok_or_else(|| AudioError::DeviceInitFailed {
                    reason: "No default input device found".to_string(),
                }),
        }
    }
}

impl MicrophoneDevice for CpalMicrophone {
    fn name(&self) -> String {
        self.preferred_device
            .clone()
            .unwrap_or_else(|| "default input (cpal)".to_string())
    }

    fn open(&self, config: &StreamConfig) -> Result<Box<dyn InputStream>, AudioError> {
        let device = self.select_device()?;
        let supported = choose_config(&device, config.sample_rate)?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let step = resample_step(config.sample_rate, device_rate)?;

        let platform_min = match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, .. } => *min as usize,
            cpal::SupportedBufferSize::Unknown => 0,
        };
        let (producer, consumer) = RingBuffer::<i16>::new(config.buffer_size(platform_min));

        let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let overruns = Arc::new(AtomicU64::new(0));
        let writer = RingWriter {
            producer,
            channels,
            step,
            phase: 0.0,
            overruns: Arc::clone(&overruns),
        };

        if device_rate != config.sample_rate {
            tracing::warn!(
                "[CpalMicrophone] Device does not offer {} Hz, decimating from {} Hz",
                config.sample_rate,
                device_rate
            );
        }

        let stream_config: cpal::StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, writer, &failure, |s| s)
            }
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, writer, &failure, f32_to_pcm)
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, writer, &failure, |s| {
                    (s as i32 - 32_768) as i16
                })
            }
            other => Err(AudioError::UnsupportedFormat {
                format: format!("{:?}", other),
            }),
        }?;

        stream.play().map_err(|e| AudioError::DeviceInitFailed {
            reason: format!("Failed to start input stream: {:?}", e),
        })?;

        tracing::info!(
            "[CpalMicrophone] Recording at {} Hz, {} channel(s)",
            device_rate,
            channels
        );

        Ok(Box::new(CpalInputStream {
            stream: Some(stream),
            consumer,
            failure,
            overruns,
        }))
    }
}

/// Prefer a config that natively supports the requested rate.
fn choose_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let wanted = cpal::SampleRate(sample_rate);
    let native = device
        .supported_input_configs()
        .map_err(|e| AudioError::DeviceInitFailed {
            reason: format!("Failed to query input configs: {:?}", e),
        })?
        .filter(|range| range.min_sample_rate() <= wanted && wanted <= range.max_sample_rate())
        .min_by_key(|range| (range.channels(), range.sample_format() != cpal::SampleFormat::I16));

    match native {
        Some(range) => Ok(range.with_sample_rate(wanted)),
        None => device
            .default_input_config()
            .map_err(|e| AudioError::DeviceInitFailed {
                reason: format!("Failed to get default input config: {:?}", e),
            }),
    }
}

/// Fraction of device samples kept when decimating to `target_rate`.
///
/// Only downsampling is supported; a device slower than the model rate
/// would hand the classifier stretched audio.
fn resample_step(target_rate: u32, device_rate: u32) -> Result<f32, AudioError> {
    if device_rate < target_rate {
        return Err(AudioError::UnsupportedFormat {
            format: format!(
                "{} Hz input, at least {} Hz required",
                device_rate, target_rate
            ),
        });
    }
    Ok(target_rate as f32 / device_rate as f32)
}

/// Scale a float sample with the same full scale frames are normalized by.
fn f32_to_pcm(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM_FULL_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Callback-side state: downmix, decimate and push into the ring.
struct RingWriter {
    producer: Producer<i16>,
    channels: usize,
    step: f32,
    phase: f32,
    overruns: Arc<AtomicU64>,
}

impl RingWriter {
    fn push_frame(&mut self, sample: i16) {
        self.phase += self.step;
        if self.phase < 1.0 {
            return;
        }
        self.phase -= 1.0;
        if self.producer.push(sample).is_err() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut writer: RingWriter,
    failure: &Arc<Mutex<Option<String>>>,
    convert: fn(T) -> i16,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + 'static,
{
    let failure = Arc::clone(failure);
    let channels = writer.channels.max(1);
    device
        .build_input_stream::<T, _, _>(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let mixed = frame.iter().map(|&s| convert(s) as i32).sum::<i32>()
                        / frame.len() as i32;
                    writer.push_frame(mixed as i16);
                }
            },
            move |err| {
                tracing::error!("[CpalMicrophone] Input stream error: {}", err);
                if let Ok(mut slot) = failure.lock() {
                    *slot = Some(err.to_string());
                }
            },
            None,
        )
        .map_err(|e| AudioError::DeviceInitFailed {
            reason: format!("{:?}", e),
        })
}

struct CpalInputStream {
    stream: Option<cpal::Stream>,
    consumer: Consumer<i16>,
    failure: Arc<Mutex<Option<String>>>,
    overruns: Arc<AtomicU64>,
}

impl CpalInputStream {
    fn check_failure(&self) -> Result<(), AudioError> {
        let failure = self.failure.lock().map_err(|_| AudioError::LockPoisoned {
            component: "CpalInputStream".to_string(),
        })?;
        match failure.as_ref() {
            Some(reason) => Err(AudioError::ReadFailed {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl InputStream for CpalInputStream {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<ReadOutcome, AudioError> {
        if self.stream.is_none() {
            return Err(AudioError::NotRunning);
        }
        let deadline = Instant::now() + timeout;

        loop {
            self.check_failure()?;

            let available = self.consumer.slots().min(buf.len());
            if available > 0 {
                let chunk = self
                    .consumer
                    .read_chunk(available)
                    .map_err(|e| AudioError::ReadFailed {
                        reason: format!("{:?}", e),
                    })?;
                let (first, second) = chunk.as_slices();
                buf[..first.len()].copy_from_slice(first);
                buf[first.len()..first.len() + second.len()].copy_from_slice(second);
                chunk.commit_all();
                return Ok(ReadOutcome::Data(available));
            }

            if Instant::now() >= deadline {
                return Ok(ReadOutcome::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause();
            drop(stream);
            let overruns = self.overruns.load(Ordering::Relaxed);
            if overruns > 0 {
                tracing::warn!("[CpalMicrophone] {} samples dropped on ring overrun", overruns);
            }
            paused.map_err(|e| AudioError::StreamFailure {
                reason: format!("Failed to pause input stream: {:?}", e),
            })?;
        }
        Ok(())
    }
}
