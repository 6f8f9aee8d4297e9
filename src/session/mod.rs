//! Recording session management
//!
//! One `Session` exists per accepted WebSocket connection. It owns the
//! live directory, the telemetry log, the audio writers and the pending
//! buffers, and is mutated only by the connection's task:
//! - frame dispatch (JSON events, mixed and per-participant audio, video counting)
//! - format-gated writer creation with buffering until the format arrives
//! - finalisation: summary, archive promotion, post-archive pipeline hand-off

mod events;
mod participants;
mod session;
mod stats;

pub use events::{participant_upserts, AgentEvent, RawAudioFormat};
pub use participants::{compose_label, device_suffix, sanitize_name, ParticipantInfo};
pub use session::{CloseReason, Session, MIXED_AUDIO_FILE, SUMMARY_FILE, TELEMETRY_FILE};
pub use stats::{AudioFiles, SessionMetadata, SessionStats, SessionSummary};
