//! Deterministic microphone fixtures.
//!
//! Fixture microphones stand in for live hardware in tests and in the CLI's
//! offline modes. They feed 16-bit PCM from a WAV file, an in-memory buffer
//! or a synthetic generator, and can be told to fail on open or after a
//! number of reads. Every fixture counts its opens and closes so callers can
//! verify that the device is released exactly once.

use std::f32::consts::PI;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::AudioError;

use super::device::{InputStream, MicrophoneDevice, ReadOutcome, StreamConfig};
use super::frame::SAMPLE_RATE;

/// Supported deterministic waveform patterns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticPattern {
    Sine,
    Square,
    WhiteNoise,
    Silence,
}

/// Configuration for an endless synthetic source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SyntheticSpec {
    pub pattern: SyntheticPattern,
    pub frequency_hz: f32,
    /// Peak amplitude in [0, 1] of full scale
    pub amplitude: f32,
}

#[derive(Debug, Clone)]
enum FixtureSource {
    Pcm(Arc<Vec<i16>>),
    Synthetic(SyntheticSpec),
}

/// Open/close bookkeeping shared by a fixture and its streams.
#[derive(Debug, Default)]
pub struct DeviceStats {
    opens: AtomicUsize,
    closes: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl DeviceStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open streams observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Streams currently open.
    pub fn open_streams(&self) -> usize {
        self.opens().saturating_sub(self.closes())
    }

    fn record_open(&self) {
        let opens = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let live = opens.saturating_sub(self.closes());
        self.max_concurrent.fetch_max(live, Ordering::SeqCst);
    }

    fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scriptable microphone backed by PCM data or a generator.
pub struct FixtureMicrophone {
    source: FixtureSource,
    chunk_size: usize,
    pace: Option<Duration>,
    fail_open: Mutex<Option<AudioError>>,
    fail_read_after: Option<usize>,
    stats: Arc<DeviceStats>,
}

impl FixtureMicrophone {
    fn with_source(source: FixtureSource) -> Self {
        Self {
            source,
            chunk_size: 1_600,
            pace: None,
            fail_open: Mutex::new(None),
            fail_read_after: None,
            stats: Arc::new(DeviceStats::default()),
        }
    }

    /// Finite source that ends after the given samples.
    pub fn from_pcm(samples: Vec<i16>) -> Self {
        Self::with_source(FixtureSource::Pcm(Arc::new(samples)))
    }

    /// Finite source loaded from a WAV file (mixed to mono, resampled to 16 kHz).
    pub fn from_wav<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        Ok(Self::from_pcm(read_wav_pcm(path.as_ref())?))
    }

    /// Endless generator.
    pub fn synthetic(spec: SyntheticSpec) -> Self {
        Self::with_source(FixtureSource::Synthetic(spec))
    }

    /// Endless sine tone.
    pub fn endless_tone(frequency_hz: f32, amplitude: f32) -> Self {
        Self::synthetic(SyntheticSpec {
            pattern: SyntheticPattern::Sine,
            frequency_hz,
            amplitude,
        })
    }

    /// Microphone whose every open attempt fails with `err`.
    pub fn failing_open(err: AudioError) -> Self {
        let mic = Self::synthetic(SyntheticSpec {
            pattern: SyntheticPattern::Silence,
            frequency_hz: 0.0,
            amplitude: 0.0,
        });
        mic.set_open_failure(Some(err));
        mic
    }

    /// Samples delivered per read call.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sleep this long per read to emulate a real-time device.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Fail every read after the first `reads` successful ones.
    pub fn fail_read_after(mut self, reads: usize) -> Self {
        self.fail_read_after = Some(reads);
        self
    }

    /// Change open behaviour at runtime (e.g. permission granted later).
    pub fn set_open_failure(&self, err: Option<AudioError>) {
        if let Ok(mut slot) = self.fail_open.lock() {
            *slot = err;
        }
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        Arc::clone(&self.stats)
    }
}

impl MicrophoneDevice for FixtureMicrophone {
    fn name(&self) -> String {
        match &self.source {
            FixtureSource::Pcm(samples) => format!("fixture pcm ({} samples)", samples.len()),
            FixtureSource::Synthetic(spec) => format!("fixture {:?}", spec.pattern),
        }
    }

    fn open(&self, _config: &StreamConfig) -> Result<Box<dyn InputStream>, AudioError> {
        let failure = self
            .fail_open
            .lock()
            .map_err(|_| AudioError::LockPoisoned {
                component: "FixtureMicrophone".to_string(),
            })?
            .clone();
        if let Some(err) = failure {
            return Err(err);
        }

        self.stats.record_open();
        Ok(Box::new(FixtureStream {
            generator: Generator::new(&self.source),
            chunk_size: self.chunk_size,
            pace: self.pace,
            reads: 0,
            fail_read_after: self.fail_read_after,
            stats: Arc::clone(&self.stats),
            closed: false,
        }))
    }
}

enum Generator {
    Pcm { samples: Arc<Vec<i16>>, cursor: usize },
    Synthetic { spec: SyntheticSpec, phase: f32, rng: StdRng },
}

impl Generator {
    fn new(source: &FixtureSource) -> Self {
        match source {
            FixtureSource::Pcm(samples) => Generator::Pcm {
                samples: Arc::clone(samples),
                cursor: 0,
            },
            FixtureSource::Synthetic(spec) => Generator::Synthetic {
                spec: *spec,
                phase: 0.0,
                rng: StdRng::seed_from_u64(0x5A5A_FFF0),
            },
        }
    }

    fn fill(&mut self, buf: &mut [i16]) -> ReadOutcome {
        match self {
            Generator::Pcm { samples, cursor } => {
                if *cursor >= samples.len() {
                    return ReadOutcome::EndOfStream;
                }
                let n = buf.len().min(samples.len() - *cursor);
                buf[..n].copy_from_slice(&samples[*cursor..*cursor + n]);
                *cursor += n;
                ReadOutcome::Data(n)
            }
            Generator::Synthetic { spec, phase, rng } => {
                let step = spec.frequency_hz / SAMPLE_RATE as f32;
                let amplitude = spec.amplitude.clamp(0.0, 1.0);
                for sample in buf.iter_mut() {
                    let value = match spec.pattern {
                        SyntheticPattern::Sine => (2.0 * PI * *phase).sin() * amplitude,
                        SyntheticPattern::Square => {
                            if *phase < 0.5 {
                                amplitude
                            } else {
                                -amplitude
                            }
                        }
                        SyntheticPattern::WhiteNoise if amplitude > 0.0 => {
                            rng.gen_range(-amplitude..amplitude)
                        }
                        SyntheticPattern::WhiteNoise | SyntheticPattern::Silence => 0.0,
                    };
                    *phase += step;
                    if *phase >= 1.0 {
                        *phase -= 1.0;
                    }
                    *sample = (value * i16::MAX as f32) as i16;
                }
                ReadOutcome::Data(buf.len())
            }
        }
    }
}

struct FixtureStream {
    generator: Generator,
    chunk_size: usize,
    pace: Option<Duration>,
    reads: usize,
    fail_read_after: Option<usize>,
    stats: Arc<DeviceStats>,
    closed: bool,
}

impl InputStream for FixtureStream {
    fn read(&mut self, buf: &mut [i16], _timeout: Duration) -> Result<ReadOutcome, AudioError> {
        if self.closed {
            return Err(AudioError::NotRunning);
        }
        if let Some(limit) = self.fail_read_after {
            if self.reads >= limit {
                return Err(AudioError::ReadFailed {
                    reason: format!("fixture read failure after {} reads", limit),
                });
            }
        }
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        self.reads += 1;

        let n = buf.len().min(self.chunk_size);
        Ok(self.generator.fill(&mut buf[..n]))
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if !self.closed {
            self.closed = true;
            self.stats.record_close();
        }
        Ok(())
    }
}

impl Drop for FixtureStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Read a WAV file as 16 kHz mono 16-bit PCM.
pub fn read_wav_pcm(path: &Path) -> Result<Vec<i16>, AudioError> {
    let mut reader = hound::WavReader::open(path).map_err(|err| AudioError::StreamFailure {
        reason: format!("failed to open {}: {err}", path.display()),
    })?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(AudioError::UnsupportedFormat {
            format: format!("{} has zero channels", path.display()),
        });
    }

    let read_err = |err: hound::Error| AudioError::StreamFailure {
        reason: format!("error reading {}: {err}", path.display()),
    };
    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(read_err)?,
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32_768.0))
            .collect::<Result<_, _>>()
            .map_err(read_err)?,
        (hound::SampleFormat::Int, bits @ (24 | 32)) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(read_err)?
        }
        (_, bits) => {
            return Err(AudioError::UnsupportedFormat {
                format: format!("{}-bit integer PCM in {}", bits, path.display()),
            })
        }
    };

    let channels = spec.channels as usize;
    let mono: Vec<f32> = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    let resampled = resample_linear(&mono, spec.sample_rate, SAMPLE_RATE);
    if spec.sample_rate != SAMPLE_RATE {
        tracing::debug!(
            "[Fixture] Resampled {} from {} Hz to {} Hz",
            path.display(),
            spec.sample_rate,
            SAMPLE_RATE
        );
    }

    Ok(resampled
        .into_iter()
        .map(|s| (s.clamp(-1.0, 1.0) * 32_767.0).round() as i16)
        .collect())
}

fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx.min(input.len() - 1)];
            let b = input[(idx + 1).min(input.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}
