use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::DomainError;
use crate::ports::AudioSink;

/// How often the playback thread checks for completion or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Speaker output on the default cpal output device.
///
/// The stream is not `Send`, so each playback builds and owns its stream on
/// a blocking thread and drops it before returning.
#[derive(Debug, Default)]
pub struct CpalAudioSink;

impl CpalAudioSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioSink for CpalAudioSink {
    async fn play(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        cancel: CancellationToken,
    ) -> Result<(), DomainError> {
        if samples.is_empty() {
            return Ok(());
        }

        tokio::task::spawn_blocking(move || play_blocking(samples, sample_rate, &cancel))
            .await
            .map_err(|e| DomainError::Synthesis(format!("Playback task failed: {}", e)))?
    }
}

fn play_blocking(
    samples: Vec<f32>,
    sample_rate: u32,
    cancel: &CancellationToken,
) -> Result<(), DomainError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| DomainError::device("No default output device available"))?;

    let supported = device
        .default_output_config()
        .map_err(|e| DomainError::device(format!("Failed to get output config: {}", e)))?;

    if supported.sample_format() != SampleFormat::F32 {
        return Err(DomainError::device(format!(
            "Unsupported output sample format: {:?}",
            supported.sample_format()
        )));
    }

    let config: StreamConfig = supported.config();
    let channels = config.channels as usize;
    let device_rate = config.sample_rate.0;
    let samples = Arc::new(resample(&samples, sample_rate, device_rate)?);

    debug!(
        device = device.name().unwrap_or_default(),
        device_rate,
        channels,
        frames = samples.len(),
        "Starting playback"
    );

    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        let failed = Arc::clone(&failed);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        pos += 1;
                    }
                    position.store(pos, Ordering::Relaxed);
                    if pos >= samples.len() {
                        finished.store(true, Ordering::Release);
                    }
                },
                move |err| {
                    error!(?err, "Playback stream error");
                    failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| DomainError::device(format!("Failed to build output stream: {}", e)))?
    };

    stream
        .play()
        .map_err(|e| DomainError::device(format!("Failed to start playback: {}", e)))?;

    let result = loop {
        if cancel.is_cancelled() {
            info!("Playback cancelled");
            break Err(DomainError::Cancelled);
        }
        if failed.load(Ordering::Acquire) {
            break Err(DomainError::device("Output device failed during playback"));
        }
        if finished.load(Ordering::Acquire) {
            break Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    // Release the device before reporting
    drop(stream);
    result
}

/// Requested frames per resampler chunk.
const RESAMPLE_CHUNK: usize = 1024;

/// Convert mono samples to the output device rate.
///
/// The last chunk is padded with its final sample and the output trimmed
/// back to the expected length.
#[allow(clippy::cast_possible_truncation)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, DomainError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| DomainError::Synthesis(format!("Resampler init failed: {}", e)))?;

    // The resampler may round the chunk size to fit its FFT length
    let chunk_len = resampler.input_frames_next();
    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64).ceil() as usize;
    let mut output = Vec::with_capacity(expected + resampler.output_frames_max());
    let mut chunk = vec![0.0f64; chunk_len];

    for input in samples.chunks(chunk_len) {
        let pad = input.last().copied().unwrap_or(0.0) as f64;
        chunk.fill(pad);
        for (slot, &s) in chunk.iter_mut().zip(input) {
            *slot = f64::from(s);
        }
        let result = resampler
            .process(std::slice::from_ref(&chunk), None)
            .map_err(|e| DomainError::Synthesis(format!("Resample failed: {}", e)))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    let last = output.last().copied().unwrap_or(0.0);
    output.resize(expected, last);
    Ok(output)
}
