use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::http::{build_client, describe_failure};
use crate::app::TokenCache;
use crate::domain::config::CloudSpeechConfig;
use crate::domain::DomainError;
use crate::ports::{AudioSink, SpeechBackend};

/// Cloud synthesis: REST call with a cached bearer token, played on the sink.
pub struct CloudSpeechBackend {
    client: Client,
    tokens: Arc<TokenCache>,
    config: CloudSpeechConfig,
    sink: Arc<dyn AudioSink>,
}

impl CloudSpeechBackend {
    pub fn new(
        config: CloudSpeechConfig,
        tokens: Arc<TokenCache>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self, DomainError> {
        Ok(Self::with_client(build_client()?, config, tokens, sink))
    }

    pub fn with_client(
        client: Client,
        config: CloudSpeechConfig,
        tokens: Arc<TokenCache>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        info!(
            voice = %config.voice_name,
            format = %config.output_format,
            token_ttl_secs = tokens.ttl().as_secs(),
            "CloudSpeechBackend created"
        );
        Self {
            client,
            tokens,
            config,
            sink,
        }
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, DomainError> {
        let token = self.tokens.get_token().await?;
        let url = self.config.endpoint_for(token.region());
        let ssml = build_ssml(&self.config.voice_name, text);

        debug!(url = %url, chars = text.len(), "Requesting synthesis");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.value())
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", &self.config.output_format)
            .body(ssml)
            .send()
            .await
            .map_err(|e| DomainError::Synthesis(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(status = %status, "Synthesis credential rejected");
            return Err(DomainError::TokenUnavailable(
                describe_failure(response, &url).await,
            ));
        }
        if !status.is_success() {
            return Err(DomainError::Synthesis(describe_failure(response, &url).await));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| DomainError::Synthesis(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechBackend for CloudSpeechBackend {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn render(&self, text: &str, cancel: CancellationToken) -> Result<(), DomainError> {
        let audio = tokio::select! {
            _ = cancel.cancelled() => return Err(DomainError::Cancelled),
            audio = self.synthesize(text) => audio?,
        };

        let (samples, sample_rate) = decode_wav(&audio)?;
        debug!(samples = samples.len(), sample_rate, "Synthesized audio decoded");

        self.sink.play(samples, sample_rate, cancel).await
    }
}

/// Wrap text in a single-voice SSML document.
fn build_ssml(voice_name: &str, text: &str) -> String {
    let lang = voice_name
        .splitn(3, '-')
        .take(2)
        .collect::<Vec<_>>()
        .join("-");
    format!(
        "<speak version='1.0' xml:lang='{lang}'><voice name='{voice}'>{text}</voice></speak>",
        lang = escape_xml(&lang),
        voice = escape_xml(voice_name),
        text = escape_xml(text),
    )
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode a 16-bit PCM RIFF payload into mono f32 samples.
fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32), DomainError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| DomainError::Synthesis(format!("Invalid synthesized audio: {}", e)))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(DomainError::Synthesis(format!(
            "Unsupported synthesized audio: {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let interleaved = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DomainError::Synthesis(format!("Invalid synthesized audio: {}", e)))?;

    let channels = spec.channels.max(1) as usize;
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().map(|&s| s as f32 / 32768.0).sum::<f32>() / channels as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}
