use std::io::Cursor;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::error::DomainError;

/// Capture adapter state.
///
/// State transitions:
/// - Idle -> Capturing (begin)
/// - Capturing -> Idle (end, device released)
/// - Capturing -> DeviceLost (stream error, automatic)
/// - DeviceLost -> Idle (end, device released)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CaptureState {
    /// No capture open.
    Idle = 0,
    /// Microphone acquired and streaming.
    Capturing = 1,
    /// The stream failed while a capture was open.
    DeviceLost = 2,
}

impl CaptureState {
    #[must_use]
    pub fn can_begin(&self) -> bool {
        matches!(self, CaptureState::Idle)
    }
}

impl From<u8> for CaptureState {
    fn from(value: u8) -> Self {
        match value {
            0 => CaptureState::Idle,
            1 => CaptureState::Capturing,
            _ => CaptureState::DeviceLost,
        }
    }
}

impl From<CaptureState> for u8 {
    fn from(state: CaptureState) -> Self {
        state as u8
    }
}

/// Atomic wrapper for CaptureState for lock-free reads from the stream callbacks.
#[derive(Debug)]
pub struct AtomicCaptureState(AtomicU8);

impl AtomicCaptureState {
    pub fn new(state: CaptureState) -> Self {
        Self(AtomicU8::new(state.into()))
    }

    pub fn load(&self) -> CaptureState {
        self.0.load(Ordering::Acquire).into()
    }

    pub fn store(&self, state: CaptureState) {
        self.0.store(state.into(), Ordering::Release);
    }

    /// Compare and swap, returns true if successful.
    pub fn compare_exchange(&self, current: CaptureState, new: CaptureState) -> bool {
        self.0
            .compare_exchange(current.into(), new.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicCaptureState {
    fn default() -> Self {
        Self::new(CaptureState::Idle)
    }
}

/// Sample rate of every uploaded payload (16 kHz mono).
pub const SPEECH_SAMPLE_RATE: u32 = 16_000;

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz of the uploaded payload. Must be [`SPEECH_SAMPLE_RATE`].
    pub sample_rate: u32,
    /// Maximum recording duration in seconds (ring buffer size).
    pub max_duration_secs: u32,
    /// Preferred input device name, system default if None.
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SPEECH_SAMPLE_RATE,
            max_duration_secs: 60,
            input_device: None,
        }
    }
}

impl AudioConfig {
    /// Ring buffer capacity in samples.
    pub fn buffer_capacity(&self) -> usize {
        self.max_duration_secs as usize * self.sample_rate as usize
    }
}

/// Events emitted by the capture adapter.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum CaptureEvent {
    /// The ring buffer is full; the capture should be finalized.
    BufferFull { capture_id: u64 },
    /// The input stream failed.
    DeviceLost { capture_id: u64, message: String },
}

/// Ownership token for an open microphone stream.
///
/// Deliberately not `Clone`: it is consumed by `AudioCapture::end`.
#[derive(Debug, PartialEq, Eq)]
pub struct CaptureHandle {
    id: u64,
}

impl CaptureHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// PCM sample buffer that is securely zeroed on drop.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct AudioBuffer {
    /// PCM audio samples (16-bit mono).
    samples: Vec<i16>,
    /// Sample rate in Hz.
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
        }
    }

    pub fn with_capacity(sample_rate: u32, capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            sample_rate,
        }
    }

    pub fn push_samples(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Encode as a 16-bit mono WAV payload.
    ///
    /// Fails with `EmptyCapture` when there are no samples.
    pub fn to_payload(&self) -> Result<AudioPayload, DomainError> {
        if self.samples.is_empty() {
            return Err(DomainError::EmptyCapture);
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut bytes = Vec::with_capacity(44 + self.samples.len() * 2);
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }

        Ok(AudioPayload {
            bytes,
            sample_rate: self.sample_rate,
            duration_secs: self.duration_secs(),
        })
    }
}

/// Encoded audio ready for upload (WAV container), zeroed on drop.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct AudioPayload {
    bytes: Vec<u8>,
    sample_rate: u32,
    duration_secs: f32,
}

impl AudioPayload {
    /// MIME type of the encoded payload.
    pub const CONTENT_TYPE: &'static str = "audio/wav";

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f32 {
        self.duration_secs
    }
}
