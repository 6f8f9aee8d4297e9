use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::audio::AudioFormat;
use crate::session::participants::ParticipantInfo;

/// Per-session frame counters. Every frame whose 4-byte header could be
/// read bumps exactly one of these.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub json_messages: u64,
    pub mixed_audio_frames: u64,
    pub participant_audio_frames: u64,
    pub video_frames: u64,
    pub encoded_video_chunks: u64,
    pub unknown_frames: u64,
    /// Audio blocks evicted from the pending queues before a format arrived.
    pub pending_dropped_blocks: u64,
}

impl SessionStats {
    pub fn total_accepted(&self) -> u64 {
        self.json_messages
            + self.mixed_audio_frames
            + self.participant_audio_frames
            + self.video_frames
            + self.encoded_video_chunks
            + self.unknown_frames
    }
}

/// Relative paths of the audio artifacts a session produced.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFiles {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mixed: Option<String>,
    /// Participant label to relative file path.
    pub participants: BTreeMap<String, String>,
}

/// Metadata accumulated over the life of a session and frozen at close.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<AudioFormat>,
    pub audio_files: AudioFiles,
    /// Roster keyed by device id.
    pub participants: BTreeMap<String, ParticipantInfo>,
}

/// `session-summary.json`: written once at close, then rewritten with the
/// archive paths after promotion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub idle_ms_before_close: u64,
    pub stats: SessionStats,
    pub metadata: SessionMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
}
