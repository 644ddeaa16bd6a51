use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::domain::{
    AtomicCaptureState, AudioBuffer, AudioConfig, AudioPayload, CaptureEvent, CaptureHandle,
    CaptureState, DomainError, SPEECH_SAMPLE_RATE,
};
use crate::ports::AudioCapture;

/// Lock-free ring buffer for audio samples.
type RingProducer = ringbuf::HeapProd<i16>;
type RingConsumer = ringbuf::HeapCons<i16>;

/// Commands sent to the audio thread.
enum AudioCommand {
    Begin {
        capture_id: u64,
        reply: oneshot::Sender<Result<(), DomainError>>,
    },
    End {
        capture_id: u64,
        reply: oneshot::Sender<Result<Vec<i16>, DomainError>>,
    },
    Shutdown,
}

/// Everything the input callbacks need, moved into the stream.
struct StreamContext {
    capture_id: u64,
    channels: usize,
    device_sample_rate: u32,
    target_sample_rate: u32,
    producer: RingProducer,
    state: Arc<AtomicCaptureState>,
    event_sender: broadcast::Sender<CaptureEvent>,
}

mod audio_processing {
    use super::*;

    pub fn get_device(preferred: Option<&str>) -> Result<Device, DomainError> {
        let host = cpal::default_host();

        if let Some(name) = preferred {
            let devices = host
                .input_devices()
                .map_err(|e| DomainError::device(format!("Failed to enumerate devices: {}", e)))?;

            for device in devices {
                if device.name().map(|n| n == name).unwrap_or(false) {
                    return Ok(device);
                }
            }
            warn!(device = %name, "Configured input device not found, falling back to default");
        }

        host.default_input_device()
            .ok_or_else(|| DomainError::device("No default input device available"))
    }

    pub fn build_stream(device: &Device, ctx: StreamContext) -> Result<Stream, DomainError> {
        let supported = device
            .default_input_config()
            .map_err(|e| DomainError::device(format!("Failed to get default config: {}", e)))?;
        let sample_format = supported.sample_format();
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        debug!(
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?sample_format,
            "Device default config"
        );

        let ctx = StreamContext {
            channels: config.channels as usize,
            device_sample_rate: config.sample_rate.0,
            ..ctx
        };
        let capture_id = ctx.capture_id;
        let state_err = Arc::clone(&ctx.state);
        let sender_err = ctx.event_sender.clone();
        let on_error = move |err: cpal::StreamError| {
            error!(?err, capture_id, "Input stream error");
            handle_stream_error(capture_id, &err.to_string(), &state_err, &sender_err);
        };

        let mut sink = CaptureSink::new(ctx);
        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| sink.push(data),
                on_error,
                None,
            ),
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                        .collect();
                    sink.push(&converted);
                },
                on_error,
                None,
            ),
            other => {
                return Err(DomainError::device(format!(
                    "Unsupported sample format: {:?}",
                    other
                )));
            }
        }
        .map_err(|e| DomainError::device(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }

    /// Callback-side writer: mono conversion, resampling, ring buffer.
    struct CaptureSink {
        ctx: StreamContext,
        overflow_reported: bool,
    }

    impl CaptureSink {
        fn new(ctx: StreamContext) -> Self {
            Self {
                ctx,
                overflow_reported: false,
            }
        }

        fn push(&mut self, data: &[i16]) {
            let mono = to_mono(data, self.ctx.channels);
            let resampled = resample(&mono, self.ctx.device_sample_rate, self.ctx.target_sample_rate);

            let written = self.ctx.producer.push_slice(&resampled);
            if written < resampled.len() && !self.overflow_reported {
                self.overflow_reported = true;
                warn!(capture_id = self.ctx.capture_id, "Capture buffer full");
                let _ = self.ctx.event_sender.send(CaptureEvent::BufferFull {
                    capture_id: self.ctx.capture_id,
                });
            }
        }
    }

    pub fn to_mono(data: &[i16], channels: usize) -> Vec<i16> {
        if channels <= 1 {
            return data.to_vec();
        }
        data.chunks(channels)
            .map(|chunk| {
                let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
                (sum / chunk.len() as i32) as i16
            })
            .collect()
    }

    pub fn calculate_rms(samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
        let rms = (sum_squares / samples.len() as f64).sqrt();
        (rms / 32767.0).min(1.0) as f32
    }

    pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
        if from_rate == to_rate || samples.is_empty() {
            return samples.to_vec();
        }

        let ratio = from_rate as f64 / to_rate as f64;
        let output_len = (samples.len() as f64 / ratio).ceil() as usize;
        let mut output = Vec::with_capacity(output_len);

        for i in 0..output_len {
            let src_pos = i as f64 * ratio;
            let src_idx = src_pos.floor() as usize;
            let frac = src_pos.fract();

            let sample = if src_idx + 1 < samples.len() {
                let s0 = samples[src_idx] as f64;
                let s1 = samples[src_idx + 1] as f64;
                (s0 + (s1 - s0) * frac) as i16
            } else if src_idx < samples.len() {
                samples[src_idx]
            } else {
                0
            };
            output.push(sample);
        }
        output
    }

    fn handle_stream_error(
        capture_id: u64,
        message: &str,
        state: &AtomicCaptureState,
        event_sender: &broadcast::Sender<CaptureEvent>,
    ) {
        // Report only the first failure of an open capture
        if state.compare_exchange(CaptureState::Capturing, CaptureState::DeviceLost) {
            let _ = event_sender.send(CaptureEvent::DeviceLost {
                capture_id,
                message: message.to_string(),
            });
        }
    }
}

/// Capture currently owned by the audio thread.
struct OpenCapture {
    id: u64,
    stream: Option<Stream>,
    consumer: RingConsumer,
    started: Instant,
}

fn begin_capture(
    capture_id: u64,
    config: &AudioConfig,
    state: &Arc<AtomicCaptureState>,
    event_sender: &broadcast::Sender<CaptureEvent>,
) -> Result<OpenCapture, DomainError> {
    if !state.load().can_begin() {
        return Err(DomainError::CaptureAlreadyOpen);
    }

    let device = audio_processing::get_device(config.input_device.as_deref())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let ring = HeapRb::<i16>::new(config.buffer_capacity().max(1));
    let (producer, consumer) = ring.split();

    let stream = audio_processing::build_stream(
        &device,
        StreamContext {
            capture_id,
            channels: 1,
            device_sample_rate: config.sample_rate,
            target_sample_rate: SPEECH_SAMPLE_RATE,
            producer,
            state: Arc::clone(state),
            event_sender: event_sender.clone(),
        },
    )?;

    // Mark open before the first callback can report an error
    state.store(CaptureState::Capturing);
    if let Err(e) = stream.play() {
        state.store(CaptureState::Idle);
        return Err(DomainError::device(format!("Failed to start stream: {}", e)));
    }

    info!(device = %device_name, capture_id, "Capture started");
    Ok(OpenCapture {
        id: capture_id,
        stream: Some(stream),
        consumer,
        started: Instant::now(),
    })
}

fn end_capture(mut open: OpenCapture, state: &AtomicCaptureState) -> Vec<i16> {
    // Release the device before anything else can fail
    drop(open.stream.take());
    state.store(CaptureState::Idle);

    let available = open.consumer.occupied_len();
    let mut samples = vec![0i16; available];
    let read = open.consumer.pop_slice(&mut samples);
    samples.truncate(read);

    info!(
        capture_id = open.id,
        samples = samples.len(),
        elapsed_secs = open.started.elapsed().as_secs_f32(),
        rms = audio_processing::calculate_rms(&samples),
        "Capture ended"
    );
    samples
}

/// Audio thread runner. The cpal `Stream` is not `Send`, so it lives here.
fn audio_thread_main(
    config: AudioConfig,
    state: Arc<AtomicCaptureState>,
    event_sender: broadcast::Sender<CaptureEvent>,
    mut cmd_rx: mpsc::Receiver<AudioCommand>,
) {
    let mut open: Option<OpenCapture> = None;

    while let Some(cmd) = cmd_rx.blocking_recv() {
        match cmd {
            AudioCommand::Begin { capture_id, reply } => {
                let result = if open.is_some() {
                    Err(DomainError::CaptureAlreadyOpen)
                } else {
                    begin_capture(capture_id, &config, &state, &event_sender).map(|capture| {
                        open = Some(capture);
                    })
                };
                let _ = reply.send(result);
            }
            AudioCommand::End { capture_id, reply } => {
                let result = match open.take() {
                    Some(capture) if capture.id == capture_id => Ok(end_capture(capture, &state)),
                    other => {
                        open = other;
                        Err(DomainError::CaptureNotOpen)
                    }
                };
                let _ = reply.send(result);
            }
            AudioCommand::Shutdown => break,
        }
    }

    if let Some(capture) = open.take() {
        end_capture(capture, &state);
    }
    debug!("Audio thread shutting down");
}

/// cpal-based microphone capture.
///
/// Uses a dedicated audio thread to own the non-Send stream. Captured audio
/// is downmixed to mono and resampled to 16 kHz in the input
/// callback, then handed over through a lock-free ring buffer.
pub struct CpalAudioCapture {
    state: Arc<AtomicCaptureState>,
    event_sender: broadcast::Sender<CaptureEvent>,
    next_id: AtomicU64,
    cmd_tx: mpsc::Sender<AudioCommand>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CpalAudioCapture {
    pub fn new(config: AudioConfig) -> Result<Self, DomainError> {
        let state = Arc::new(AtomicCaptureState::default());
        let (event_sender, _) = broadcast::channel(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        info!(
            sample_rate = config.sample_rate,
            max_duration_secs = config.max_duration_secs,
            device = ?config.input_device,
            "CpalAudioCapture initialized"
        );

        let thread_state = Arc::clone(&state);
        let thread_event_sender = event_sender.clone();

        let thread_handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                audio_thread_main(config, thread_state, thread_event_sender, cmd_rx)
            })
            .map_err(|e| DomainError::device(format!("Failed to spawn audio thread: {}", e)))?;

        Ok(Self {
            state,
            event_sender,
            next_id: AtomicU64::new(1),
            cmd_tx,
            thread_handle: Mutex::new(Some(thread_handle)),
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, DomainError>>) -> AudioCommand,
    ) -> Result<T, DomainError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| DomainError::device("Audio thread not running"))?;

        reply_rx
            .await
            .map_err(|_| DomainError::device("Audio thread did not respond"))?
    }
}

impl Drop for CpalAudioCapture {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(AudioCommand::Shutdown);
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

#[async_trait]
impl AudioCapture for CpalAudioCapture {
    async fn begin(&self) -> Result<CaptureHandle, DomainError> {
        if !self.state.load().can_begin() {
            return Err(DomainError::CaptureAlreadyOpen);
        }

        let capture_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.request(|reply| AudioCommand::Begin { capture_id, reply })
            .await?;
        Ok(CaptureHandle::new(capture_id))
    }

    async fn end(&self, handle: CaptureHandle) -> Result<AudioPayload, DomainError> {
        let capture_id = handle.id();
        let samples = self
            .request(|reply| AudioCommand::End { capture_id, reply })
            .await?;

        let mut buffer = AudioBuffer::with_capacity(SPEECH_SAMPLE_RATE, samples.len());
        buffer.push_samples(&samples);
        buffer.to_payload()
    }

    fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.event_sender.subscribe()
    }
}
