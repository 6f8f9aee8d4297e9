//! Binary envelope parsing for the browser-agent wire protocol.
//!
//! Every inbound WebSocket binary message starts with a 4-byte little-endian
//! signed frame type, followed by a type-specific payload:
//!
//! - `1` Json: UTF-8 JSON event
//! - `2` Video: opaque, counted and discarded
//! - `3` MixedAudio: 32-bit little-endian float PCM, mono
//! - `4` EncodedVideo: opaque, counted and discarded
//! - `5` ParticipantAudio: `id_len (u8)`, `id_len` UTF-8 bytes, then float PCM

use std::fmt;

pub const HEADER_LEN: usize = 4;

pub const FRAME_TYPE_JSON: i32 = 1;
pub const FRAME_TYPE_VIDEO: i32 = 2;
pub const FRAME_TYPE_MIXED_AUDIO: i32 = 3;
pub const FRAME_TYPE_ENCODED_VIDEO: i32 = 4;
pub const FRAME_TYPE_PARTICIPANT_AUDIO: i32 = 5;

/// A decoded inbound frame, borrowing its payload from the raw message.
#[derive(Debug, PartialEq)]
pub enum Frame<'a> {
    Json(&'a [u8]),
    Video { len: usize },
    MixedAudio(&'a [u8]),
    EncodedVideo { len: usize },
    ParticipantAudio {
        participant_id: String,
        payload: &'a [u8],
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Message shorter than the 4-byte type header.
    Truncated,
    /// Frame type outside the known set.
    UnknownType(i32),
    /// ParticipantAudio payload too short for its id, or id not UTF-8.
    BadParticipantEnvelope,
    /// Float PCM payload length not a multiple of 4.
    PartialSample,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "frame shorter than 4-byte header"),
            FrameError::UnknownType(t) => write!(f, "unknown frame type {}", t),
            FrameError::BadParticipantEnvelope => {
                write!(f, "invalid participant audio envelope")
            }
            FrameError::PartialSample => {
                write!(f, "float PCM payload not a multiple of 4 bytes")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Parse one raw WebSocket binary message into a [`Frame`].
pub fn parse(data: &[u8]) -> Result<Frame<'_>, FrameError> {
    if data.len() < HEADER_LEN {
        return Err(FrameError::Truncated);
    }

    let frame_type = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let payload = &data[HEADER_LEN..];

    match frame_type {
        FRAME_TYPE_JSON => Ok(Frame::Json(payload)),
        FRAME_TYPE_VIDEO => Ok(Frame::Video { len: payload.len() }),
        FRAME_TYPE_MIXED_AUDIO => {
            if payload.len() % 4 != 0 {
                return Err(FrameError::PartialSample);
            }
            Ok(Frame::MixedAudio(payload))
        }
        FRAME_TYPE_ENCODED_VIDEO => Ok(Frame::EncodedVideo { len: payload.len() }),
        FRAME_TYPE_PARTICIPANT_AUDIO => parse_participant_audio(payload),
        other => Err(FrameError::UnknownType(other)),
    }
}

fn parse_participant_audio(payload: &[u8]) -> Result<Frame<'_>, FrameError> {
    let id_len = *payload.first().ok_or(FrameError::BadParticipantEnvelope)? as usize;
    if payload.len() < 1 + id_len {
        return Err(FrameError::BadParticipantEnvelope);
    }

    let participant_id = std::str::from_utf8(&payload[1..1 + id_len])
        .map_err(|_| FrameError::BadParticipantEnvelope)?
        .to_string();

    let audio = &payload[1 + id_len..];
    if audio.len() % 4 != 0 {
        return Err(FrameError::PartialSample);
    }

    Ok(Frame::ParticipantAudio {
        participant_id,
        payload: audio,
    })
}

/// Convert little-endian 32-bit float PCM to signed 16-bit samples.
///
/// Non-finite floats become 0; everything else is clamped to [-1, 1] and
/// scaled to the i16 range. The payload length must be a multiple of 4
/// (enforced at parse time).
pub fn f32_le_to_i16(payload: &[u8]) -> Vec<i16> {
    payload
        .chunks_exact(4)
        .map(|chunk| {
            let f = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let f = if f.is_finite() { f.clamp(-1.0, 1.0) } else { 0.0 };
            (f * 32767.0).round() as i16
        })
        .collect()
}
