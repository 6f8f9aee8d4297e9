//! Transcription and summarisation capabilities and their HTTP-backed
//! implementations.
//!
//! Providers are tried in a configured order; a failing provider downgrades
//! to the next one in the chain and the extractive summariser terminates
//! every summarisation chain, so a summary is always produced.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::extractive;
use crate::config::{PipelineConfig, SummaryProvider};

/// Shared HTTP client; provider calls are bounded so a hung provider can
/// never hold up process shutdown indefinitely.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .expect("failed to build HTTP client")
});

/// `<audio>.transcript.json` artifact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_summary: Option<String>,
}

/// `<audio>.summary.json` artifact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSummary {
    pub summary: String,
    pub key_points: Vec<String>,
    pub action_items: Vec<String>,
    pub decisions: Vec<String>,
    pub topics: Vec<String>,
    pub source: String,
}

/// Context carried into summariser selection, notably the short summary a
/// transcript provider may have returned alongside the text.
#[derive(Debug, Clone, Default)]
pub struct SummaryHints {
    pub provider_summary: Option<String>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &'static str;
    async fn transcribe(&self, path: &Path, language: &str) -> Result<Transcription>;
}

#[async_trait]
pub trait Summariser: Send + Sync {
    fn name(&self) -> &'static str;
    /// Whether this provider can run for the given language and hints.
    fn available(&self, _language: &str, _hints: &SummaryHints) -> bool {
        true
    }
    async fn summarise(
        &self,
        text: &str,
        language: &str,
        hints: &SummaryHints,
    ) -> Result<MeetingSummary>;
}

// ---------------------------------------------------------------------------
// OpenAI

pub struct OpenAiTranscriber {
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    language: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    no_speech_prob: Option<f64>,
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn transcribe(&self, path: &Path, language: &str) -> Result<Transcription> {
        let file_bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read audio file {:?}", path))?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        let file_part = Part::bytes(file_bytes)
            .file_name(filename)
            .mime_str("audio/wav")
            .context("failed to build multipart body")?;

        let form = Form::new()
            .part("file", file_part)
            .text("model", "whisper-1")
            .text("response_format", "verbose_json")
            .text("language", language.to_string())
            .text("temperature", "0");

        let response = HTTP_CLIENT
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("openai transcription error ({}): {}", status, body);
        }

        let whisper: WhisperResponse = response
            .json()
            .await
            .context("failed to parse transcription response")?;

        let worst_no_speech = whisper
            .segments
            .iter()
            .filter_map(|s| s.no_speech_prob)
            .fold(None::<f64>, |acc, p| Some(acc.map_or(p, |a| a.max(p))));

        Ok(Transcription {
            text: whisper.text,
            confidence: worst_no_speech.map(|p| 1.0 - p),
            duration: whisper.duration,
            language: whisper.language.unwrap_or_else(|| language.to_string()),
            provider_summary: None,
        })
    }
}

pub struct OpenAiSummariser {
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuredSummary {
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    action_items: Vec<String>,
    #[serde(default)]
    decisions: Vec<String>,
    #[serde(default)]
    topics: Vec<String>,
}

#[async_trait]
impl Summariser for OpenAiSummariser {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn summarise(
        &self,
        text: &str,
        language: &str,
        _hints: &SummaryHints,
    ) -> Result<MeetingSummary> {
        let prompt = format!(
            "Summarise the following meeting transcript in language '{}'. \
             Respond with a JSON object with keys: summary (string), keyPoints, \
             actionItems, decisions, topics (arrays of strings).\n\n{}",
            language, text
        );

        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.2,
        };

        let response = HTTP_CLIENT
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("summarisation request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("openai summarisation error ({}): {}", status, body);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("failed to parse summarisation response")?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        // The model usually honours the JSON instruction; when it does not,
        // keep its prose as the summary and fill the lists extractively.
        match serde_json::from_str::<StructuredSummary>(content.trim()) {
            Ok(structured) => Ok(MeetingSummary {
                summary: structured.summary,
                key_points: structured.key_points,
                action_items: structured.action_items,
                decisions: structured.decisions,
                topics: structured.topics,
                source: "openai".to_string(),
            }),
            Err(_) => {
                let fallback = extractive::summarise(text, language);
                Ok(MeetingSummary {
                    summary: content,
                    source: "openai".to_string(),
                    ..fallback
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Deepgram

pub struct DeepgramTranscriber {
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    results: Option<DeepgramResults>,
    metadata: Option<DeepgramMetadata>,
}

#[derive(Debug, Deserialize)]
struct DeepgramMetadata {
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DeepgramResults {
    #[serde(default)]
    channels: Vec<DeepgramChannel>,
    summary: Option<DeepgramSummary>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    #[serde(default)]
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DeepgramSummary {
    short: Option<String>,
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    fn name(&self) -> &'static str {
        "deepgram"
    }

    async fn transcribe(&self, path: &Path, language: &str) -> Result<Transcription> {
        let file_bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read audio file {:?}", path))?;

        let response = HTTP_CLIENT
            .post("https://api.deepgram.com/v1/listen")
            .query(&[
                ("model", "nova-2"),
                ("smart_format", "true"),
                ("summarize", "v2"),
                ("language", language),
            ])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(file_bytes)
            .send()
            .await
            .context("transcription request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("deepgram transcription error ({}): {}", status, body);
        }

        let parsed: DeepgramResponse = response
            .json()
            .await
            .context("failed to parse transcription response")?;

        let results = parsed
            .results
            .context("deepgram response carried no results")?;
        let alternative = results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .context("deepgram response carried no transcript")?;

        Ok(Transcription {
            text: alternative.transcript,
            confidence: alternative.confidence,
            duration: parsed.metadata.and_then(|m| m.duration),
            language: language.to_string(),
            provider_summary: results.summary.and_then(|s| s.short),
        })
    }
}

/// Deepgram summarisation rides on the short summary the transcript call
/// already returned; there is no second HTTP round-trip.
pub struct DeepgramSummariser;

#[async_trait]
impl Summariser for DeepgramSummariser {
    fn name(&self) -> &'static str {
        "deepgram"
    }

    fn available(&self, language: &str, hints: &SummaryHints) -> bool {
        hints.provider_summary.is_some() && language.to_ascii_lowercase().starts_with("en")
    }

    async fn summarise(
        &self,
        text: &str,
        language: &str,
        hints: &SummaryHints,
    ) -> Result<MeetingSummary> {
        let Some(short) = hints.provider_summary.clone() else {
            bail!("no provider summary available from the transcript");
        };

        let lists = extractive::summarise(text, language);
        Ok(MeetingSummary {
            summary: short,
            source: "deepgram".to_string(),
            ..lists
        })
    }
}

// ---------------------------------------------------------------------------
// PhoWhisper (self-hosted)

pub struct PhoWhisperTranscriber {
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct PhoWhisperResponse {
    text: String,
    confidence: Option<f64>,
    duration: Option<f64>,
}

#[async_trait]
impl Transcriber for PhoWhisperTranscriber {
    fn name(&self) -> &'static str {
        "pho-whisper"
    }

    async fn transcribe(&self, path: &Path, language: &str) -> Result<Transcription> {
        let file_bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read audio file {:?}", path))?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        let file_part = Part::bytes(file_bytes)
            .file_name(filename)
            .mime_str("audio/wav")
            .context("failed to build multipart body")?;

        let form = Form::new()
            .part("file", file_part)
            .text("language", language.to_string());

        let response = HTTP_CLIENT
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("pho-whisper transcription error ({}): {}", status, body);
        }

        let parsed: PhoWhisperResponse = response
            .json()
            .await
            .context("failed to parse transcription response")?;

        Ok(Transcription {
            text: parsed.text,
            confidence: parsed.confidence,
            duration: parsed.duration,
            language: language.to_string(),
            provider_summary: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Extractive fallback

pub struct ExtractiveSummariser;

#[async_trait]
impl Summariser for ExtractiveSummariser {
    fn name(&self) -> &'static str {
        "custom"
    }

    async fn summarise(
        &self,
        text: &str,
        language: &str,
        _hints: &SummaryHints,
    ) -> Result<MeetingSummary> {
        Ok(extractive::summarise(text, language))
    }
}

// ---------------------------------------------------------------------------
// Chains

/// Transcribers in fallback order for the configured provider.
pub fn transcriber_chain(config: &PipelineConfig) -> Vec<Box<dyn Transcriber>> {
    let mut chain: Vec<Box<dyn Transcriber>> = Vec::new();

    let openai = config.transcription_api_key.clone().map(|api_key| {
        Box::new(OpenAiTranscriber { api_key }) as Box<dyn Transcriber>
    });
    let deepgram = config.transcription_api_key.clone().map(|api_key| {
        Box::new(DeepgramTranscriber { api_key }) as Box<dyn Transcriber>
    });
    let pho_whisper = config.pho_whisper_url.clone().map(|endpoint| {
        Box::new(PhoWhisperTranscriber { endpoint }) as Box<dyn Transcriber>
    });

    match config.provider {
        SummaryProvider::PhoWhisper => {
            chain.extend(pho_whisper);
            chain.extend(openai);
        }
        SummaryProvider::Deepgram => {
            chain.extend(deepgram);
            chain.extend(pho_whisper);
        }
        SummaryProvider::OpenAi | SummaryProvider::Auto | SummaryProvider::Custom => {
            chain.extend(openai);
            chain.extend(pho_whisper);
        }
    }
    chain
}

/// Summarisers in fallback order; the extractive fallback always
/// terminates the chain.
pub fn summariser_chain(config: &PipelineConfig) -> Vec<Box<dyn Summariser>> {
    let mut chain: Vec<Box<dyn Summariser>> = Vec::new();

    let openai = config.summarisation_api_key.clone().map(|api_key| {
        Box::new(OpenAiSummariser { api_key }) as Box<dyn Summariser>
    });

    match config.provider {
        SummaryProvider::OpenAi => chain.extend(openai),
        SummaryProvider::Deepgram => chain.push(Box::new(DeepgramSummariser)),
        SummaryProvider::Auto => {
            chain.extend(openai);
            chain.push(Box::new(DeepgramSummariser));
        }
        SummaryProvider::PhoWhisper | SummaryProvider::Custom => {}
    }

    chain.push(Box::new(ExtractiveSummariser));
    chain
}

/// Try each transcriber in order; `None` when every provider failed or
/// none is configured.
pub async fn transcribe_with_fallback(
    chain: &[Box<dyn Transcriber>],
    path: &Path,
    language: &str,
) -> Option<Transcription> {
    for transcriber in chain {
        match transcriber.transcribe(path, language).await {
            Ok(transcription) => {
                debug!(
                    provider = transcriber.name(),
                    file = %path.display(),
                    chars = transcription.text.len(),
                    "transcription complete"
                );
                return Some(transcription);
            }
            Err(e) => {
                warn!(
                    provider = transcriber.name(),
                    file = %path.display(),
                    "transcription failed, trying next provider: {:#}",
                    e
                );
            }
        }
    }
    None
}

/// Try each summariser in order; a summary is always produced.
pub async fn summarise_with_fallback(
    chain: &[Box<dyn Summariser>],
    text: &str,
    language: &str,
    hints: &SummaryHints,
) -> MeetingSummary {
    for summariser in chain {
        if !summariser.available(language, hints) {
            debug!(provider = summariser.name(), "summariser not applicable, skipping");
            continue;
        }
        match summariser.summarise(text, language, hints).await {
            Ok(summary) => return summary,
            Err(e) => {
                warn!(
                    provider = summariser.name(),
                    "summarisation failed, trying next provider: {:#}",
                    e
                );
            }
        }
    }
    extractive::summarise(text, language)
}
