pub mod wav;

pub use wav::WavFileWriter;

use serde::Serialize;

/// Normalised audio format for a session, taken from the first valid
/// `AudioFormatUpdate` event. Later updates overwrite it but writers in
/// flight are not rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub number_of_channels: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_frames: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl AudioFormat {
    /// Bytes of 16-bit PCM per second this format produces.
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate.max(1) as u64 * self.number_of_channels.max(1) as u64 * 2
    }
}
