//! Inbound JSON events from the browser agent.
//!
//! The wire protocol carries an open-ended `type` discriminator; the
//! recognised values are modelled as variants and everything else falls
//! through to [`AgentEvent::Other`], which is persisted to telemetry only.
//! Unknown fields inside recognised variants are ignored.

use serde::Deserialize;
use serde_json::Value;

use crate::audio::AudioFormat;
use crate::session::participants::ParticipantInfo;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    SessionStarted {
        #[serde(rename = "meetingUrl")]
        meeting_url: Option<String>,
        #[serde(rename = "botName")]
        bot_name: Option<String>,
    },
    AudioFormatUpdate {
        #[serde(default)]
        format: Option<RawAudioFormat>,
    },
    UsersUpdate {
        #[serde(rename = "newUsers", default)]
        new_users: Vec<Value>,
        #[serde(rename = "updatedUsers", default)]
        updated_users: Vec<Value>,
        #[serde(rename = "removedUsers", default)]
        removed_users: Vec<Value>,
    },
    MeetingStatusChange {
        #[serde(default)]
        change: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Format descriptor as it appears on the wire. Numbers arrive as JSON
/// numbers and may be fractional; normalisation truncates them.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAudioFormat {
    #[serde(rename = "sampleRate")]
    pub sample_rate: Option<f64>,
    #[serde(rename = "numberOfChannels")]
    pub number_of_channels: Option<f64>,
    #[serde(rename = "numberOfFrames")]
    pub number_of_frames: Option<f64>,
    pub format: Option<String>,
}

impl RawAudioFormat {
    /// A format is valid iff its sample rate is a positive number.
    /// Channel count defaults to 1 when absent.
    pub fn normalise(&self) -> Option<AudioFormat> {
        let sample_rate = self.sample_rate.filter(|r| *r > 0.0)? as u32;
        let number_of_channels = match self.number_of_channels {
            Some(c) if c >= 1.0 => c as u16,
            _ => 1,
        };
        Some(AudioFormat {
            sample_rate,
            number_of_channels,
            number_of_frames: self.number_of_frames.map(|f| f as u32),
            format: self.format.clone(),
        })
    }
}

/// Extract participant upserts from a `UsersUpdate` payload. Elements that
/// are not objects with a string `deviceId` are skipped; `removedUsers` is
/// deliberately ignored so participants can leave and rejoin without
/// disturbing session-scoped writers.
pub fn participant_upserts(new_users: &[Value], updated_users: &[Value]) -> Vec<ParticipantInfo> {
    new_users
        .iter()
        .chain(updated_users.iter())
        .filter_map(|v| serde_json::from_value::<ParticipantInfo>(v.clone()).ok())
        .collect()
}
