// Integration tests for whole-session flows: frame dispatch, buffering,
// finalisation and archive promotion, all against a real filesystem.

use anyhow::Result;
use meeting_ingest::config::{Config, RecordingConfig};
use meeting_ingest::session::{CloseReason, Session};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(root: &Path) -> Arc<Config> {
    Arc::new(Config {
        recording: RecordingConfig {
            root: root.to_path_buf(),
            ..Default::default()
        },
        ..Default::default()
    })
}

fn frame(frame_type: i32, payload: &[u8]) -> Vec<u8> {
    let mut data = frame_type.to_le_bytes().to_vec();
    data.extend_from_slice(payload);
    data
}

fn json_frame(json: &str) -> Vec<u8> {
    frame(1, json.as_bytes())
}

fn mixed_frame(floats: &[f32]) -> Vec<u8> {
    let payload: Vec<u8> = floats.iter().flat_map(|f| f.to_le_bytes()).collect();
    frame(3, &payload)
}

fn participant_frame(participant_id: &str, floats: &[f32]) -> Vec<u8> {
    let mut payload = vec![participant_id.len() as u8];
    payload.extend_from_slice(participant_id.as_bytes());
    payload.extend(floats.iter().flat_map(|f| f.to_le_bytes()));
    frame(5, &payload)
}

fn completed_dirs(root: &Path) -> Vec<PathBuf> {
    let completed = root.join("completed");
    if !completed.exists() {
        return Vec::new();
    }
    let mut dirs: Vec<PathBuf> = fs::read_dir(completed)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    dirs.sort();
    dirs
}

#[tokio::test]
async fn happy_path_mixed_only() -> Result<()> {
    let temp = TempDir::new()?;
    let config = test_config(temp.path());

    let mut session = Session::new(config)?;
    let live_dir = session.dir().to_path_buf();

    session.handle_message(&json_frame(
        r#"{"type":"SessionStarted","meetingUrl":"https://meet.example/xyz"}"#,
    ));
    session.handle_message(&json_frame(
        r#"{"type":"AudioFormatUpdate","format":{"sampleRate":48000,"numberOfChannels":1}}"#,
    ));
    for _ in 0..10 {
        session.handle_message(&mixed_frame(&[0.0; 480]));
    }

    assert_eq!(session.stats().json_messages, 2);
    assert_eq!(session.stats().mixed_audio_frames, 10);

    session.close(CloseReason::ClientClose, None);

    // The live directory was promoted wholesale.
    assert!(!live_dir.exists());

    let archives = completed_dirs(temp.path());
    assert_eq!(archives.len(), 1);
    let archive = &archives[0];
    let name = archive.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("meeting_xyz_"), "unexpected name {}", name);

    // 10 frames x 480 samples x 2 bytes, plus the 44-byte header.
    let wav = fs::read(archive.join("mixed_audio.wav"))?;
    assert_eq!(wav.len(), 9644);
    let data_len = u32::from_le_bytes(wav[40..44].try_into().unwrap());
    assert_eq!(data_len, 9600);

    let telemetry = fs::read_to_string(archive.join("telemetry.ndjson"))?;
    assert_eq!(telemetry.lines().count(), 2);

    let summary: serde_json::Value =
        serde_json::from_slice(&fs::read(archive.join("session-summary.json"))?)?;
    assert_eq!(summary["reason"], "client_close");
    assert_eq!(summary["stats"]["mixedAudioFrames"], 10);
    assert_eq!(summary["metadata"]["meetingUrl"], "https://meet.example/xyz");
    assert_eq!(summary["metadata"]["audioFiles"]["mixed"], "mixed_audio.wav");
    assert!(summary["archivePath"].is_string());

    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(archive.join("archive.json"))?)?;
    let files = manifest["files"].as_array().unwrap();
    assert!(files
        .iter()
        .any(|f| f["path"] == "mixed_audio.wav" && f["size"] == 9644));

    Ok(())
}

#[tokio::test]
async fn participant_audio_before_format_is_buffered_then_drained() -> Result<()> {
    let temp = TempDir::new()?;
    let config = test_config(temp.path());

    let mut session = Session::new(config)?;

    // Audio first, format second: the frames must be buffered and written
    // once the descriptor arrives.
    session.handle_message(&participant_frame("abc123", &[1.0; 20]));
    session.handle_message(&json_frame(
        r#"{"type":"AudioFormatUpdate","format":{"sampleRate":16000,"numberOfChannels":1}}"#,
    ));
    session.close(CloseReason::ClientClose, None);

    let archives = completed_dirs(temp.path());
    assert_eq!(archives.len(), 1);
    let participants = archives[0].join("participants");

    let labels: Vec<String> = fs::read_dir(&participants)?
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(labels.len(), 1);
    // No UsersUpdate ever arrived: fallback label with the trailing digits
    // of the device id.
    assert!(labels[0].starts_with("participant_123_"), "label {}", labels[0]);

    let wav_path = participants
        .join(&labels[0])
        .join(format!("combined_{}.wav", labels[0]));
    let wav = fs::read(&wav_path)?;
    assert_eq!(wav.len(), 84);

    // 1.0 clamps to 32767 = 0xFF 0x7F little-endian.
    for sample in wav[44..].chunks_exact(2) {
        assert_eq!(sample, &[0xFF, 0x7F]);
    }

    Ok(())
}

#[tokio::test]
async fn audio_then_format_equals_format_then_audio() -> Result<()> {
    let temp_a = TempDir::new()?;
    let temp_b = TempDir::new()?;
    let format_json =
        r#"{"type":"AudioFormatUpdate","format":{"sampleRate":48000,"numberOfChannels":1}}"#;
    let audio: Vec<f32> = (0..480).map(|i| (i as f32 / 480.0) - 0.5).collect();

    let mut early_format = Session::new(test_config(temp_a.path()))?;
    early_format.handle_message(&json_frame(format_json));
    early_format.handle_message(&mixed_frame(&audio));
    early_format.close(CloseReason::ClientClose, None);

    let mut late_format = Session::new(test_config(temp_b.path()))?;
    late_format.handle_message(&mixed_frame(&audio));
    late_format.handle_message(&json_frame(format_json));
    late_format.close(CloseReason::ClientClose, None);

    let wav_a = fs::read(completed_dirs(temp_a.path())[0].join("mixed_audio.wav"))?;
    let wav_b = fs::read(completed_dirs(temp_b.path())[0].join("mixed_audio.wav"))?;
    assert_eq!(wav_a, wav_b);

    Ok(())
}

#[tokio::test]
async fn close_is_idempotent_and_first_reason_wins() -> Result<()> {
    let temp = TempDir::new()?;
    let mut session = Session::new(test_config(temp.path()))?;
    session.handle_message(&json_frame(r#"{"type":"SessionStarted"}"#));

    session.close(CloseReason::RemovedFromMeeting, None);
    assert!(session.is_closed());

    let archives = completed_dirs(temp.path());
    let summary_path = archives[0].join("session-summary.json");
    let before = fs::read(&summary_path)?;

    session.close(CloseReason::SocketError, Some("late error".into()));

    let after = fs::read(&summary_path)?;
    assert_eq!(before, after);
    let summary: serde_json::Value = serde_json::from_slice(&after)?;
    assert_eq!(summary["reason"], "removed_from_meeting");
    assert_eq!(completed_dirs(temp.path()).len(), 1);

    Ok(())
}

#[tokio::test]
async fn json_only_session_produces_no_audio_files() -> Result<()> {
    let temp = TempDir::new()?;
    let mut session = Session::new(test_config(temp.path()))?;

    session.handle_message(&json_frame(r#"{"type":"SessionStarted"}"#));
    session.handle_message(&json_frame(r#"{"type":"Heartbeat","seq":1}"#));
    session.close(CloseReason::ClientClose, None);

    let archive = &completed_dirs(temp.path())[0];
    assert!(!archive.join("mixed_audio.wav").exists());
    assert!(!archive.join("participants").exists());

    let summary: serde_json::Value =
        serde_json::from_slice(&fs::read(archive.join("session-summary.json"))?)?;
    assert!(summary["metadata"]["audioFiles"].get("mixed").is_none());
    assert_eq!(summary["stats"]["jsonMessages"], 2);

    Ok(())
}

#[tokio::test]
async fn empty_participant_id_is_a_distinct_participant() -> Result<()> {
    let temp = TempDir::new()?;
    let mut session = Session::new(test_config(temp.path()))?;

    session.handle_message(&json_frame(
        r#"{"type":"AudioFormatUpdate","format":{"sampleRate":16000}}"#,
    ));
    session.handle_message(&participant_frame("", &[0.25; 4]));
    session.close(CloseReason::ClientClose, None);

    let participants = completed_dirs(temp.path())[0].join("participants");
    let labels: Vec<String> = fs::read_dir(&participants)?
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(labels.len(), 1);
    // An id with no digits at all gets the "id" device suffix.
    assert!(labels[0].starts_with("participant_id_"), "label {}", labels[0]);

    Ok(())
}

#[tokio::test]
async fn labels_are_stable_across_rejoin() -> Result<()> {
    let temp = TempDir::new()?;
    let mut session = Session::new(test_config(temp.path()))?;

    session.handle_message(&json_frame(
        r#"{"type":"UsersUpdate","newUsers":[{"deviceId":"dev7","fullName":"Alice Jones"}]}"#,
    ));
    session.handle_message(&json_frame(
        r#"{"type":"AudioFormatUpdate","format":{"sampleRate":16000,"numberOfChannels":1}}"#,
    ));
    session.handle_message(&participant_frame("dev7", &[0.1; 8]));
    session.handle_message(&json_frame(
        r#"{"type":"UsersUpdate","removedUsers":[{"deviceId":"dev7"}]}"#,
    ));
    session.handle_message(&participant_frame("dev7", &[0.1; 8]));
    session.close(CloseReason::ClientClose, None);

    let participants = completed_dirs(temp.path())[0].join("participants");
    let labels: Vec<String> = fs::read_dir(&participants)?
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(labels.len(), 1, "rejoin must not create a second directory");
    assert!(labels[0].starts_with("alicejones_7_"), "label {}", labels[0]);

    // Both frames landed in the same container: 16 samples = 32 bytes.
    let wav = fs::read(
        participants
            .join(&labels[0])
            .join(format!("combined_{}.wav", labels[0])),
    )?;
    assert_eq!(wav.len(), 44 + 32);

    Ok(())
}

#[tokio::test]
async fn malformed_frames_are_counted_and_survived() -> Result<()> {
    let temp = TempDir::new()?;
    let mut session = Session::new(test_config(temp.path()))?;

    session.handle_message(&[1, 0]); // shorter than the header
    session.handle_message(&frame(99, b"mystery")); // unknown type
    session.handle_message(&frame(5, &[10, b'a'])); // id longer than payload
    session.handle_message(&frame(3, &[0, 0, 0, 0, 1])); // partial sample
    session.handle_message(&frame(2, b"video")); // video, counted only
    session.handle_message(&json_frame("this is not json"));

    let stats = session.stats();
    assert_eq!(stats.unknown_frames, 4);
    assert_eq!(stats.video_frames, 1);
    assert_eq!(stats.json_messages, 1);
    assert_eq!(stats.total_accepted(), 6);

    session.close(CloseReason::ClientClose, None);

    // The raw unparseable line still reached telemetry.
    let telemetry =
        fs::read_to_string(completed_dirs(temp.path())[0].join("telemetry.ndjson"))?;
    assert_eq!(telemetry.lines().count(), 1);
    assert!(telemetry.contains("this is not json"));

    Ok(())
}

#[tokio::test]
async fn removed_from_meeting_requests_close() -> Result<()> {
    let temp = TempDir::new()?;
    let mut session = Session::new(test_config(temp.path()))?;

    let request = session.handle_message(&json_frame(
        r#"{"type":"MeetingStatusChange","change":"removed_from_meeting"}"#,
    ));
    assert_eq!(request, Some(CloseReason::RemovedFromMeeting));

    let benign = session.handle_message(&json_frame(
        r#"{"type":"MeetingStatusChange","change":"joined"}"#,
    ));
    assert_eq!(benign, None);

    Ok(())
}

#[tokio::test]
async fn buffered_audio_without_format_is_discarded_at_close() -> Result<()> {
    let temp = TempDir::new()?;
    let mut session = Session::new(test_config(temp.path()))?;

    session.handle_message(&mixed_frame(&[0.5; 100]));
    session.handle_message(&participant_frame("p9", &[0.5; 100]));
    session.close(CloseReason::ClientClose, None);

    let archive = &completed_dirs(temp.path())[0];
    assert!(!archive.join("mixed_audio.wav").exists());
    assert!(!archive.join("participants").exists());

    // The frames still counted even though their audio was dropped.
    let summary: serde_json::Value =
        serde_json::from_slice(&fs::read(archive.join("session-summary.json"))?)?;
    assert_eq!(summary["stats"]["mixedAudioFrames"], 1);
    assert_eq!(summary["stats"]["participantAudioFrames"], 1);

    Ok(())
}

#[tokio::test]
async fn idle_deadline_tracks_last_frame() -> Result<()> {
    let temp = TempDir::new()?;
    let mut session = Session::new(test_config(temp.path()))?;

    let before = session.idle_deadline();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    session.handle_message(&json_frame(r#"{"type":"SessionStarted"}"#));
    let after = session.idle_deadline();

    assert!(after > before, "a frame must push the deadline out");
    Ok(())
}
