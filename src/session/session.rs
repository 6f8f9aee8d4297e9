use super::events::{participant_upserts, AgentEvent, RawAudioFormat};
use super::participants::compose_label;
use super::stats::{SessionStats, SessionMetadata, SessionSummary};
use crate::archive;
use crate::audio::{AudioFormat, WavFileWriter};
use crate::config::Config;
use crate::pipeline;
use crate::protocol::{self, Frame, FrameError};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const MIXED_AUDIO_FILE: &str = "mixed_audio.wav";
pub const TELEMETRY_FILE: &str = "telemetry.ndjson";
pub const SUMMARY_FILE: &str = "session-summary.json";

/// Why a session was closed. The first reason wins; later close calls are
/// no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClose,
    SocketError,
    InactivityTimeout,
    RemovedFromMeeting,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClose => "client_close",
            CloseReason::SocketError => "socket_error",
            CloseReason::InactivityTimeout => "inactivity_timeout",
            CloseReason::RemovedFromMeeting => "removed_from_meeting",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ParticipantWriter {
    label: String,
    writer: WavFileWriter,
}

/// Audio buffered for one participant before the format descriptor arrived.
struct PendingQueue {
    participant_id: String,
    blocks: VecDeque<Vec<u8>>,
    bytes: usize,
}

/// One recording session, owned by the WebSocket task that accepted the
/// connection. All mutation happens on that single task; frames are
/// processed strictly in arrival order.
pub struct Session {
    id: Uuid,
    dir: PathBuf,
    config: Arc<Config>,

    started_at: DateTime<Utc>,
    started_mono: Instant,
    last_frame_mono: Instant,
    inactivity_window: Duration,

    stats: SessionStats,
    metadata: SessionMetadata,
    format: Option<AudioFormat>,

    /// participant id -> cached label; labels never change mid-session.
    labels: HashMap<String, String>,
    mixed_writer: Option<WavFileWriter>,
    participant_writers: HashMap<String, ParticipantWriter>,

    pending_mixed: VecDeque<Vec<u8>>,
    pending_mixed_bytes: usize,
    pending_participants: Vec<PendingQueue>,
    pending_cap_bytes: usize,

    telemetry: Option<BufWriter<File>>,
    closed: bool,

    warned_audio_before_format: bool,
    warned_pending_overflow: bool,
    warned_bad_participant: bool,
    warned_truncated: bool,
    warned_telemetry_write: bool,
    seen_unknown_types: HashSet<i32>,
}

impl Session {
    /// Create the live directory and telemetry log for a fresh connection.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let id = Uuid::new_v4();
        let dir = config.recording.live_dir().join(format!("session_{}", id));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create session directory {:?}", dir))?;

        let telemetry = File::create(dir.join(TELEMETRY_FILE))
            .with_context(|| format!("failed to create telemetry log in {:?}", dir))?;

        // Worst case the agent streams 48 kHz float32; cap each pending
        // queue at the configured number of seconds of that.
        let pending_cap_bytes =
            (config.recording.pending_audio_max_secs.max(1) * 48_000 * 4) as usize;
        let inactivity_window = Duration::from_secs(config.recording.inactivity_timeout_secs);

        info!(session = %id, dir = %dir.display(), "session started");

        let now = Instant::now();
        Ok(Self {
            id,
            dir,
            config,
            started_at: Utc::now(),
            started_mono: now,
            last_frame_mono: now,
            inactivity_window,
            stats: SessionStats::default(),
            metadata: SessionMetadata::default(),
            format: None,
            labels: HashMap::new(),
            mixed_writer: None,
            participant_writers: HashMap::new(),
            pending_mixed: VecDeque::new(),
            pending_mixed_bytes: 0,
            pending_participants: Vec::new(),
            pending_cap_bytes,
            telemetry: Some(BufWriter::new(telemetry)),
            closed: false,
            warned_audio_before_format: false,
            warned_pending_overflow: false,
            warned_bad_participant: false,
            warned_truncated: false,
            warned_telemetry_write: false,
            seen_unknown_types: HashSet::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// When the inactivity timer would fire if no further frame arrives.
    pub fn idle_deadline(&self) -> Instant {
        self.last_frame_mono + self.inactivity_window
    }

    /// Entry point for every inbound binary message. Returns a close
    /// reason when the frame demands session termination.
    pub fn handle_message(&mut self, data: &[u8]) -> Option<CloseReason> {
        self.last_frame_mono = Instant::now();

        match protocol::parse(data) {
            Ok(Frame::Json(raw)) => return self.on_json(raw),
            Ok(Frame::MixedAudio(payload)) => self.on_mixed_audio(payload),
            Ok(Frame::ParticipantAudio {
                participant_id,
                payload,
            }) => self.on_participant_audio(&participant_id, payload),
            Ok(Frame::Video { .. }) => self.stats.video_frames += 1,
            Ok(Frame::EncodedVideo { .. }) => self.stats.encoded_video_chunks += 1,
            Err(e) => self.on_frame_error(e),
        }
        None
    }

    fn on_frame_error(&mut self, error: FrameError) {
        self.stats.unknown_frames += 1;
        match error {
            FrameError::Truncated => {
                if !self.warned_truncated {
                    self.warned_truncated = true;
                    warn!(session = %self.id, "dropping frames shorter than the 4-byte header");
                }
            }
            FrameError::UnknownType(t) => {
                if self.seen_unknown_types.insert(t) {
                    warn!(session = %self.id, frame_type = t, "dropping frames of unknown type");
                }
            }
            FrameError::BadParticipantEnvelope => {
                if !self.warned_bad_participant {
                    self.warned_bad_participant = true;
                    warn!(session = %self.id, "dropping malformed participant audio frames");
                }
            }
            FrameError::PartialSample => {
                debug!(session = %self.id, "dropping audio frame with trailing partial sample");
            }
        }
    }

    fn on_json(&mut self, raw: &[u8]) -> Option<CloseReason> {
        self.stats.json_messages += 1;
        self.append_telemetry(raw);

        let value: Value = match serde_json::from_slice(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(session = %self.id, "unparseable JSON event: {}", e);
                return None;
            }
        };

        // Any event may carry the meeting URL before SessionStarted does.
        if self.metadata.meeting_url.is_none() {
            if let Some(url) = value.get("meetingUrl").and_then(Value::as_str) {
                self.metadata.meeting_url = Some(url.to_string());
            }
        }

        let event = match serde_json::from_value::<AgentEvent>(value) {
            Ok(event) => event,
            Err(_) => return None,
        };

        match event {
            AgentEvent::SessionStarted { bot_name, .. } => {
                if bot_name.is_some() {
                    self.metadata.bot_name = bot_name;
                }
            }
            AgentEvent::AudioFormatUpdate { format } => self.on_format_update(format),
            AgentEvent::UsersUpdate {
                new_users,
                updated_users,
                removed_users,
            } => {
                for info in participant_upserts(&new_users, &updated_users) {
                    self.metadata
                        .participants
                        .insert(info.device_id.clone(), info);
                }
                if !removed_users.is_empty() {
                    // Writers stay open across leave/rejoin; removal only
                    // matters to the roster shown in the summary.
                    debug!(session = %self.id, removed = removed_users.len(), "participants left");
                }
            }
            AgentEvent::MeetingStatusChange { change } => {
                if change.as_deref() == Some("removed_from_meeting") {
                    info!(session = %self.id, "agent was removed from the meeting");
                    return Some(CloseReason::RemovedFromMeeting);
                }
            }
            AgentEvent::Other => {}
        }
        None
    }

    fn on_format_update(&mut self, raw: Option<RawAudioFormat>) {
        let Some(format) = raw.as_ref().and_then(RawAudioFormat::normalise) else {
            warn!(session = %self.id, "ignoring AudioFormatUpdate without a positive sample rate");
            return;
        };

        match &self.format {
            None => {
                info!(
                    session = %self.id,
                    sample_rate = format.sample_rate,
                    channels = format.number_of_channels,
                    "audio format received"
                );
                self.format = Some(format.clone());
                self.metadata.audio_format = Some(format);
                self.drain_pending();
            }
            Some(current) if *current != format => {
                // Writers in flight are not rebuilt; the container header
                // will declare the last format seen.
                warn!(
                    session = %self.id,
                    old_rate = current.sample_rate,
                    new_rate = format.sample_rate,
                    "audio format changed mid-session"
                );
                self.format = Some(format.clone());
                self.metadata.audio_format = Some(format);
            }
            Some(_) => {}
        }
    }

    fn on_mixed_audio(&mut self, payload: &[u8]) {
        self.stats.mixed_audio_frames += 1;
        if !self.config.recording.enable_mixed_audio {
            return;
        }
        if self.format.is_none() {
            self.enqueue_mixed(payload);
            return;
        }
        self.write_mixed(payload);
    }

    fn on_participant_audio(&mut self, participant_id: &str, payload: &[u8]) {
        self.stats.participant_audio_frames += 1;
        if !self.config.recording.enable_per_participant_audio {
            return;
        }
        if payload.is_empty() {
            return;
        }
        if self.format.is_none() {
            self.enqueue_participant(participant_id, payload);
            return;
        }
        self.write_participant(participant_id, payload);
    }

    fn write_mixed(&mut self, payload: &[u8]) {
        if self.mixed_writer.is_none() {
            let Some(format) = self.format.clone() else { return };
            match WavFileWriter::create(self.dir.join(MIXED_AUDIO_FILE), &format) {
                Ok(writer) => {
                    self.metadata.audio_files.mixed = Some(MIXED_AUDIO_FILE.to_string());
                    self.mixed_writer = Some(writer);
                }
                Err(e) => {
                    error!(session = %self.id, "failed to create mixed audio writer: {:#}", e);
                    return;
                }
            }
        }

        let samples = protocol::f32_le_to_i16(payload);
        if let Some(writer) = &mut self.mixed_writer {
            if let Err(e) = writer.write_samples(&samples) {
                error!(file = %writer.path().display(), "mixed audio write failed: {:#}", e);
            }
        }
    }

    fn write_participant(&mut self, participant_id: &str, payload: &[u8]) {
        if !self.participant_writers.contains_key(participant_id) {
            let Some(format) = self.format.clone() else { return };
            let label = self.label_for(participant_id);
            let relative = format!("participants/{}/combined_{}.wav", label, label);
            match WavFileWriter::create(self.dir.join(&relative), &format) {
                Ok(writer) => {
                    info!(
                        session = %self.id,
                        participant = participant_id,
                        label = %label,
                        "participant audio writer created"
                    );
                    self.metadata
                        .audio_files
                        .participants
                        .insert(label.clone(), relative);
                    self.participant_writers
                        .insert(participant_id.to_string(), ParticipantWriter { label, writer });
                }
                Err(e) => {
                    error!(
                        session = %self.id,
                        participant = participant_id,
                        "failed to create participant audio writer: {:#}",
                        e
                    );
                    return;
                }
            }
        }

        let samples = protocol::f32_le_to_i16(payload);
        if let Some(pw) = self.participant_writers.get_mut(participant_id) {
            if let Err(e) = pw.writer.write_samples(&samples) {
                error!(file = %pw.writer.path().display(), "participant audio write failed: {:#}", e);
            }
        }
    }

    /// Resolve (and cache) the directory label for a participant. A label
    /// that would land on an existing directory gets a fresh random suffix.
    fn label_for(&mut self, participant_id: &str) -> String {
        if let Some(label) = self.labels.get(participant_id) {
            return label.clone();
        }

        let info = self.metadata.participants.get(participant_id);
        let mut label = compose_label(info, participant_id);
        while self.dir.join("participants").join(&label).exists() {
            label = compose_label(info, participant_id);
        }

        self.labels
            .insert(participant_id.to_string(), label.clone());
        label
    }

    fn enqueue_mixed(&mut self, payload: &[u8]) {
        self.warn_audio_before_format();
        self.pending_mixed.push_back(payload.to_vec());
        self.pending_mixed_bytes += payload.len();

        while self.pending_mixed_bytes > self.pending_cap_bytes {
            let Some(oldest) = self.pending_mixed.pop_front() else { break };
            self.pending_mixed_bytes -= oldest.len();
            self.note_pending_overflow();
        }
    }

    fn enqueue_participant(&mut self, participant_id: &str, payload: &[u8]) {
        self.warn_audio_before_format();

        let queue = match self
            .pending_participants
            .iter_mut()
            .find(|q| q.participant_id == participant_id)
        {
            Some(queue) => queue,
            None => {
                self.pending_participants.push(PendingQueue {
                    participant_id: participant_id.to_string(),
                    blocks: VecDeque::new(),
                    bytes: 0,
                });
                self.pending_participants.last_mut().unwrap()
            }
        };

        queue.blocks.push_back(payload.to_vec());
        queue.bytes += payload.len();

        let cap = self.pending_cap_bytes;
        let mut dropped = 0;
        while queue.bytes > cap {
            let Some(oldest) = queue.blocks.pop_front() else { break };
            queue.bytes -= oldest.len();
            dropped += 1;
        }
        for _ in 0..dropped {
            self.note_pending_overflow();
        }
    }

    fn warn_audio_before_format(&mut self) {
        if !self.warned_audio_before_format {
            self.warned_audio_before_format = true;
            warn!(
                session = %self.id,
                "audio arriving before the format descriptor; buffering until AudioFormatUpdate"
            );
        }
    }

    fn note_pending_overflow(&mut self) {
        self.stats.pending_dropped_blocks += 1;
        if !self.warned_pending_overflow {
            self.warned_pending_overflow = true;
            warn!(
                session = %self.id,
                "pending audio buffer overflowed; dropping oldest blocks"
            );
        }
    }

    /// Drain buffered audio exactly once, in insertion order: mixed first,
    /// then each participant in observed order.
    fn drain_pending(&mut self) {
        let mixed_blocks = self.pending_mixed.len();
        let participant_blocks: usize =
            self.pending_participants.iter().map(|q| q.blocks.len()).sum();
        if mixed_blocks + participant_blocks == 0 {
            return;
        }

        info!(
            session = %self.id,
            mixed_blocks,
            participant_blocks,
            "draining audio buffered before the format descriptor"
        );

        let blocks: Vec<Vec<u8>> = self.pending_mixed.drain(..).collect();
        self.pending_mixed_bytes = 0;
        for block in blocks {
            self.write_mixed(&block);
        }

        let queues = std::mem::take(&mut self.pending_participants);
        for queue in queues {
            for block in queue.blocks {
                self.write_participant(&queue.participant_id, &block);
            }
        }
    }

    fn append_telemetry(&mut self, raw: &[u8]) {
        let Some(telemetry) = &mut self.telemetry else { return };
        let result = telemetry
            .write_all(raw)
            .and_then(|_| telemetry.write_all(b"\n"));
        if let Err(e) = result {
            if !self.warned_telemetry_write {
                self.warned_telemetry_write = true;
                error!(session = %self.id, "telemetry write failed: {}", e);
            }
        }
    }

    /// Finalise the session: flush and close every artifact, write the
    /// summary, promote the directory to `completed/` and hand the archive
    /// to the post-archive pipeline. Idempotent; the first reason wins.
    pub fn close(&mut self, reason: CloseReason, error: Option<String>) {
        if self.closed {
            debug!(session = %self.id, second_reason = %reason, "close called twice; ignoring");
            return;
        }
        self.closed = true;

        let ended_at = Utc::now();
        let duration_ms = self.started_mono.elapsed().as_millis() as u64;
        let idle_ms_before_close = self.last_frame_mono.elapsed().as_millis() as u64;

        info!(
            session = %self.id,
            reason = %reason,
            duration_ms,
            frames = self.stats.total_accepted(),
            "closing session"
        );

        let buffered = self.pending_mixed.len()
            + self
                .pending_participants
                .iter()
                .map(|q| q.blocks.len())
                .sum::<usize>();
        if buffered > 0 {
            warn!(
                session = %self.id,
                blocks = buffered,
                "discarding buffered audio: no format descriptor ever arrived"
            );
            self.pending_mixed.clear();
            self.pending_mixed_bytes = 0;
            self.pending_participants.clear();
        }

        if let Some(mut telemetry) = self.telemetry.take() {
            if let Err(e) = telemetry.flush() {
                error!(session = %self.id, "failed to flush telemetry log: {}", e);
            }
        }

        if let Some(mut writer) = self.mixed_writer.take() {
            if let Err(e) = writer.finish() {
                error!(file = %writer.path().display(), "failed to finalize mixed audio: {:#}", e);
            }
        }
        for (_, mut pw) in self.participant_writers.drain() {
            if let Err(e) = pw.writer.finish() {
                error!(
                    file = %pw.writer.path().display(),
                    label = %pw.label,
                    "failed to finalize participant audio: {:#}",
                    e
                );
            }
        }

        let mut summary = SessionSummary {
            session_id: self.id.to_string(),
            reason: reason.as_str().to_string(),
            error,
            started_at: self.started_at,
            ended_at,
            duration_ms,
            idle_ms_before_close,
            stats: self.stats.clone(),
            metadata: self.metadata.clone(),
            archive_path: None,
            manifest_path: None,
        };

        if let Err(e) = write_summary_with_retry(&self.dir, &summary) {
            error!(
                session = %self.id,
                "failed to write session summary; leaving live directory for offline recovery: {:#}",
                e
            );
            return;
        }

        match archive::promote(&self.dir, &self.config.recording.completed_dir(), &summary) {
            Ok(outcome) => {
                summary.archive_path = Some(outcome.archive_dir.display().to_string());
                summary.manifest_path = Some(outcome.manifest_path.display().to_string());
                if let Err(e) = write_summary_with_retry(&outcome.archive_dir, &summary) {
                    error!(session = %self.id, "failed to enrich archived summary: {:#}", e);
                }
                info!(
                    session = %self.id,
                    archive = %outcome.archive_dir.display(),
                    "session archived"
                );

                let pipeline_config = self.config.pipeline.clone();
                let archive_dir = outcome.archive_dir;
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(e) =
                            pipeline::process_archive(&archive_dir, &pipeline_config).await
                        {
                            error!(
                                archive = %archive_dir.display(),
                                "post-archive pipeline failed: {:#}",
                                e
                            );
                        }
                    });
                } else {
                    warn!(
                        archive = %archive_dir.display(),
                        "no async runtime; post-archive pipeline skipped"
                    );
                }
            }
            Err(e) => {
                // No partial move: the live directory stays intact with its
                // summary for offline recovery.
                error!(session = %self.id, "failed to archive session: {:#}", e);
            }
        }
    }
}

fn write_summary(dir: &Path, summary: &SessionSummary) -> Result<()> {
    let path = dir.join(SUMMARY_FILE);
    let json = serde_json::to_vec_pretty(summary).context("failed to serialise summary")?;
    fs::write(&path, json).with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

fn write_summary_with_retry(dir: &Path, summary: &SessionSummary) -> Result<()> {
    if let Err(e) = write_summary(dir, summary) {
        warn!("summary write failed, retrying once: {:#}", e);
        return write_summary(dir, summary);
    }
    Ok(())
}
