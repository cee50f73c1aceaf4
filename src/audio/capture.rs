// AudioCapture - exclusive microphone acquisition with scoped release
//
// A capture session is a lazy, pull-based sequence of frames. Each pull
// performs one blocking read cycle of exactly one frame of raw samples, so
// capture runs in lockstep with the consumer and no frame queue builds up.
// The device handle lives inside the session and is released exactly once on
// every exit path (normal end, stop request, read failure, consumer drop).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CaptureConfig;
use crate::error::{log_audio_error, AudioError};

use super::device::{InputStream, MicrophoneDevice, ReadOutcome, StreamConfig};
use super::frame::{passes_silence_gate, peak_amplitude, AudioFrame};

/// Per-session audio parameters, read once when the session starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureParams {
    pub gain: f32,
    pub silence_floor: u32,
    pub noise_reduction: bool,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            gain: 1.0,
            silence_floor: 100,
            noise_reduction: false,
        }
    }
}

/// State shared between a capture handle and its live session.
struct CaptureShared {
    active: AtomicBool,
    stop_requested: AtomicBool,
    sessions_started: AtomicU64,
    releases: AtomicU64,
}

/// Microphone acquisition front-end.
///
/// At most one session is active at a time. `stop()` may be called from any
/// thread; the session notices it before its next device read.
pub struct AudioCapture {
    device: Arc<dyn MicrophoneDevice>,
    stream_config: StreamConfig,
    read_timeout: Duration,
    shared: Arc<CaptureShared>,
}

impl AudioCapture {
    pub fn new(device: Arc<dyn MicrophoneDevice>, config: &CaptureConfig) -> Self {
        Self {
            device,
            stream_config: StreamConfig::new(config.sample_rate, config.frame_len),
            read_timeout: Duration::from_millis(config.read_timeout_ms.max(1)),
            shared: Arc::new(CaptureShared {
                active: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                sessions_started: AtomicU64::new(0),
                releases: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire the microphone and begin a capture session.
    ///
    /// Never fails: a second start while a session is active is logged and
    /// yields an empty session, and a device that cannot be opened yields an
    /// empty session carrying the error (see [`CaptureSession::error`]).
    pub fn start(&self, params: CaptureParams) -> CaptureSession {
        if self
            .shared
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("[AudioCapture] start() ignored: capture already active");
            return CaptureSession::rejected(AudioError::AlreadyRunning);
        }
        self.shared.stop_requested.store(false, Ordering::SeqCst);

        tracing::info!(
            "[AudioCapture] Opening {} ({} Hz, {} samples/frame, gain {:.2}, floor {})",
            self.device.name(),
            self.stream_config.sample_rate,
            self.stream_config.frame_len,
            params.gain,
            params.silence_floor
        );

        match self.device.open(&self.stream_config) {
            Ok(stream) => {
                self.shared.sessions_started.fetch_add(1, Ordering::SeqCst);
                CaptureSession {
                    stream: Some(stream),
                    shared: Some(Arc::clone(&self.shared)),
                    params,
                    raw: vec![0; self.stream_config.frame_len],
                    read_timeout: self.read_timeout,
                    error: None,
                    frames_gated: 0,
                    frames_emitted: 0,
                }
            }
            Err(err) => {
                log_audio_error(&err, "AudioCapture::start");
                self.shared.active.store(false, Ordering::SeqCst);
                CaptureSession::rejected(err)
            }
        }
    }

    /// Request the active session to end. Idempotent.
    pub fn stop(&self) {
        if !self.shared.stop_requested.swap(true, Ordering::SeqCst) {
            tracing::debug!("[AudioCapture] Stop requested");
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Number of sessions that successfully opened the device.
    pub fn sessions_started(&self) -> u64 {
        self.shared.sessions_started.load(Ordering::SeqCst)
    }

    /// Number of times an opened device has been released.
    pub fn release_count(&self) -> u64 {
        self.shared.releases.load(Ordering::SeqCst)
    }
}

/// A running capture session.
///
/// Iterating yields gated, normalized frames until the capture is stopped,
/// the device fails or the source ends. Dropping the session releases the
/// device.
pub struct CaptureSession {
    stream: Option<Box<dyn InputStream>>,
    shared: Option<Arc<CaptureShared>>,
    params: CaptureParams,
    raw: Vec<i16>,
    read_timeout: Duration,
    error: Option<AudioError>,
    frames_gated: u64,
    frames_emitted: u64,
}

impl CaptureSession {
    fn rejected(err: AudioError) -> Self {
        Self {
            stream: None,
            shared: None,
            params: CaptureParams::default(),
            raw: Vec::new(),
            read_timeout: Duration::ZERO,
            error: Some(err),
            frames_gated: 0,
            frames_emitted: 0,
        }
    }

    /// Error that ended (or prevented) this session, if any.
    pub fn error(&self) -> Option<&AudioError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<AudioError> {
        self.error.take()
    }

    /// Frames dropped by the silence gate so far.
    pub fn frames_gated(&self) -> u64 {
        self.frames_gated
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn params(&self) -> CaptureParams {
        self.params
    }

    fn stop_requested(&self) -> bool {
        self.shared
            .as_ref()
            .map_or(true, |shared| shared.stop_requested.load(Ordering::SeqCst))
    }

    /// Fill the raw buffer with exactly one frame.
    ///
    /// Returns `Ok(false)` when the session should end quietly.
    fn read_frame(&mut self) -> Result<bool, AudioError> {
        let len = self.raw.len();
        let mut filled = 0;

        while filled < len {
            if self.stop_requested() {
                return Ok(false);
            }
            let Some(stream) = self.stream.as_mut() else {
                return Ok(false);
            };
            match stream.read(&mut self.raw[filled..], self.read_timeout)? {
                ReadOutcome::Data(n) => filled += n.min(len - filled),
                ReadOutcome::Timeout => continue,
                ReadOutcome::EndOfStream => {
                    if filled > 0 {
                        tracing::debug!(
                            "[AudioCapture] Discarding partial frame of {} samples at end of stream",
                            filled
                        );
                    }
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Release the device. Safe to call repeatedly.
    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.close() {
                log_audio_error(&err, "CaptureSession::release");
            }
            if let Some(shared) = &self.shared {
                shared.releases.fetch_add(1, Ordering::SeqCst);
            }
            tracing::info!(
                "[AudioCapture] Microphone released ({} frames, {} gated)",
                self.frames_emitted,
                self.frames_gated
            );
        }
        if let Some(shared) = self.shared.take() {
            shared.active.store(false, Ordering::SeqCst);
        }
    }
}

impl Iterator for CaptureSession {
    type Item = AudioFrame;

    fn next(&mut self) -> Option<AudioFrame> {
        loop {
            if self.stream.is_none() {
                return None;
            }

            match self.read_frame() {
                Ok(true) => {}
                Ok(false) => {
                    self.release();
                    return None;
                }
                Err(err) => {
                    log_audio_error(&err, "CaptureSession::next");
                    self.error = Some(err);
                    self.release();
                    return None;
                }
            }

            let peak = peak_amplitude(&self.raw);
            if !passes_silence_gate(peak, self.params.silence_floor) {
                self.frames_gated += 1;
                tracing::trace!(
                    "[AudioCapture] Frame gated (peak {} < floor {})",
                    peak,
                    self.params.silence_floor
                );
                continue;
            }

            self.frames_emitted += 1;
            return Some(AudioFrame::from_pcm(
                &self.raw,
                self.params.gain,
                self.params.noise_reduction,
            ));
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fixture::FixtureMicrophone;

    fn config() -> CaptureConfig {
        CaptureConfig {
            sample_rate: 16_000,
            frame_len: 100,
            read_timeout_ms: 10,
        }
    }

    fn params(floor: u32) -> CaptureParams {
        CaptureParams {
            gain: 1.0,
            silence_floor: floor,
            noise_reduction: false,
        }
    }

    #[test]
    fn test_frames_have_exact_length_and_partial_tail_is_dropped() {
        let mic = Arc::new(FixtureMicrophone::from_pcm(vec![500; 250]).with_chunk_size(33));
        let capture = AudioCapture::new(mic.clone(), &config());

        let frames: Vec<AudioFrame> = capture.start(params(0)).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 100));
        assert_eq!(capture.release_count(), 1);
        assert_eq!(mic.stats().closes(), 1);
        assert!(!capture.is_active());
    }

    #[test]
    fn test_silence_gate_drops_quiet_frames() {
        let mut pcm = vec![50i16; 100];
        pcm.extend(vec![100i16; 100]);
        pcm.extend(vec![-99i16; 100]);
        let mic = Arc::new(FixtureMicrophone::from_pcm(pcm));
        let capture = AudioCapture::new(mic, &config());

        let mut session = capture.start(params(100));
        let frames: Vec<AudioFrame> = session.by_ref().collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].peak_amplitude(), 100);
        assert_eq!(session.frames_gated(), 2);
        assert!(session.error().is_none());
    }

    #[test]
    fn test_gain_is_applied_and_clipped() {
        let mic = Arc::new(FixtureMicrophone::from_pcm(vec![i16::MIN; 100]));
        let capture = AudioCapture::new(mic, &config());
        let mut session = capture.start(CaptureParams {
            gain: 2.0,
            silence_floor: 0,
            noise_reduction: false,
        });
        let frame = session.next().unwrap();
        assert!(frame.samples().iter().all(|&s| s == -1.0));
    }

    #[test]
    fn test_open_failure_yields_empty_session() {
        let mic = Arc::new(FixtureMicrophone::failing_open(AudioError::PermissionDenied));
        let capture = AudioCapture::new(mic.clone(), &config());

        let mut session = capture.start(params(0));
        assert!(session.next().is_none());
        assert_eq!(session.error(), Some(&AudioError::PermissionDenied));
        assert_eq!(capture.release_count(), 0);
        assert!(!capture.is_active());
        assert_eq!(mic.stats().opens(), 0);
    }

    #[test]
    fn test_read_failure_ends_session_and_releases() {
        let mic = Arc::new(
            FixtureMicrophone::from_pcm(vec![1000; 1000])
                .with_chunk_size(100)
                .fail_read_after(3),
        );
        let capture = AudioCapture::new(mic.clone(), &config());

        let mut session = capture.start(params(0));
        let frames: Vec<AudioFrame> = session.by_ref().collect();
        assert_eq!(frames.len(), 3);
        assert!(matches!(session.error(), Some(AudioError::ReadFailed { .. })));
        assert_eq!(capture.release_count(), 1);
        assert_eq!(mic.stats().closes(), 1);
    }

    #[test]
    fn test_double_start_is_rejected_without_second_open() {
        let mic = Arc::new(FixtureMicrophone::endless_tone(440.0, 0.5));
        let capture = AudioCapture::new(mic.clone(), &config());

        let mut first = capture.start(params(0));
        assert!(first.next().is_some());

        let mut second = capture.start(params(0));
        assert!(second.next().is_none());
        assert_eq!(second.error(), Some(&AudioError::AlreadyRunning));
        drop(second);
        assert!(capture.is_active());
        assert_eq!(mic.stats().opens(), 1);

        drop(first);
        assert!(!capture.is_active());
        assert_eq!(mic.stats().closes(), 1);
    }

    #[test]
    fn test_stop_ends_session_and_is_idempotent() {
        let mic = Arc::new(FixtureMicrophone::endless_tone(440.0, 0.5));
        let capture = AudioCapture::new(mic.clone(), &config());

        let mut session = capture.start(params(0));
        assert!(session.next().is_some());
        capture.stop();
        capture.stop();
        assert!(session.next().is_none());
        assert!(session.next().is_none());
        assert_eq!(capture.release_count(), 1);

        // A stop with nothing running changes nothing.
        capture.stop();
        assert_eq!(capture.release_count(), 1);
    }

    #[test]
    fn test_consumer_drop_releases_once() {
        let mic = Arc::new(FixtureMicrophone::endless_tone(440.0, 0.5));
        let capture = AudioCapture::new(mic.clone(), &config());

        let frames: Vec<AudioFrame> = capture.start(params(0)).take(3).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(capture.release_count(), 1);
        assert_eq!(mic.stats().max_concurrent(), 1);

        let again: Vec<AudioFrame> = capture.start(params(0)).take(1).collect();
        assert_eq!(again.len(), 1);
        assert_eq!(capture.release_count(), 2);
        assert_eq!(mic.stats().opens(), 2);
    }
}
