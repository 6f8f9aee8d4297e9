use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Deployment environment; affects defaults only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Test,
}

/// Summarisation provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SummaryProvider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "deepgram")]
    Deepgram,
    #[serde(rename = "pho-whisper")]
    PhoWhisper,
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "custom")]
    Custom,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub env: Environment,
    pub server: ServerConfig,
    pub recording: RecordingConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Parent directory for `live/` and `completed/`.
    pub root: PathBuf,
    pub enable_mixed_audio: bool,
    pub enable_per_participant_audio: bool,
    /// Reserved; video frames are counted and discarded regardless.
    pub enable_video_capture: bool,
    /// Session is closed after this long without an inbound frame.
    pub inactivity_timeout_secs: u64,
    /// Upper bound on audio buffered before the format descriptor arrives,
    /// in seconds of worst-case float PCM.
    pub pending_audio_max_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub provider: SummaryProvider,
    /// Language tag passed to providers (e.g. "en", "vi").
    pub language: String,
    pub transcription_api_key: Option<String>,
    pub summarisation_api_key: Option<String>,
    /// Self-hosted PhoWhisper HTTP endpoint, if deployed.
    pub pho_whisper_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: Environment::Development,
            server: ServerConfig::default(),
            recording: RecordingConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("recordings"),
            enable_mixed_audio: true,
            enable_per_participant_audio: true,
            enable_video_capture: false,
            inactivity_timeout_secs: 300,
            pending_audio_max_secs: 30,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider: SummaryProvider::Auto,
            language: "en".to_string(),
            transcription_api_key: None,
            summarisation_api_key: None,
            pho_whisper_url: None,
        }
    }
}

impl RecordingConfig {
    pub fn live_dir(&self) -> PathBuf {
        self.root.join("live")
    }

    pub fn completed_dir(&self) -> PathBuf {
        self.root.join("completed")
    }
}

impl Config {
    /// Load configuration from an optional TOML file layered with
    /// `MEETING_INGEST_`-prefixed environment variables
    /// (e.g. `MEETING_INGEST_SERVER__PORT=9000`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MEETING_INGEST")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if self.recording.inactivity_timeout_secs == 0 {
            bail!("recording.inactivity_timeout_secs must be non-zero");
        }
        Ok(())
    }
}
