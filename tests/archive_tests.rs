// Integration tests for live -> completed directory promotion, archive
// naming collisions and the manifest.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use meeting_ingest::archive;
use meeting_ingest::session::{SessionMetadata, SessionStats, SessionSummary};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn summary_for(session_id: &str, meeting_url: Option<&str>) -> SessionSummary {
    SessionSummary {
        session_id: session_id.to_string(),
        reason: "client_close".to_string(),
        error: None,
        started_at: Utc.with_ymd_and_hms(2024, 6, 7, 14, 30, 5).unwrap(),
        ended_at: Utc::now(),
        duration_ms: 60_000,
        idle_ms_before_close: 100,
        stats: SessionStats::default(),
        metadata: SessionMetadata {
            meeting_url: meeting_url.map(str::to_string),
            ..Default::default()
        },
        archive_path: None,
        manifest_path: None,
    }
}

fn make_live_dir(root: &Path, name: &str) -> Result<std::path::PathBuf> {
    let live = root.join("live").join(name);
    fs::create_dir_all(live.join("participants/alice_1_234"))?;
    fs::write(live.join("telemetry.ndjson"), b"{\"type\":\"SessionStarted\"}\n")?;
    fs::write(live.join("mixed_audio.wav"), vec![0u8; 44])?;
    fs::write(
        live.join("participants/alice_1_234/combined_alice_1_234.wav"),
        vec![0u8; 44],
    )?;
    Ok(live)
}

#[test]
fn promote_moves_directory_and_writes_manifest() -> Result<()> {
    let temp = TempDir::new()?;
    let live = make_live_dir(temp.path(), "session_x")?;
    let completed = temp.path().join("completed");

    let summary = summary_for(
        "0d9f26b2-1111-2222-3333-444444444444",
        Some("https://meet.example/standup"),
    );
    let outcome = archive::promote(&live, &completed, &summary)?;

    assert!(!live.exists());
    assert_eq!(
        outcome.archive_dir.file_name().unwrap().to_string_lossy(),
        "meeting_standup_20240607T143005Z_0d9f26b2"
    );

    let manifest: serde_json::Value = serde_json::from_slice(&fs::read(&outcome.manifest_path)?)?;
    assert_eq!(manifest["sessionId"], "0d9f26b2-1111-2222-3333-444444444444");
    assert_eq!(manifest["meetingUrl"], "https://meet.example/standup");

    let paths: Vec<&str> = manifest["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["path"].as_str().unwrap())
        .collect();
    assert_eq!(
        paths,
        vec![
            "mixed_audio.wav",
            "participants/alice_1_234/combined_alice_1_234.wav",
            "telemetry.ndjson",
        ]
    );

    Ok(())
}

#[test]
fn promote_suffixes_archive_name_on_collision() -> Result<()> {
    let temp = TempDir::new()?;
    let completed = temp.path().join("completed");
    let summary = summary_for("0d9f26b2-1111-2222-3333-444444444444", None);

    // Occupy the natural name before promoting.
    fs::create_dir_all(completed.join("meeting_unknown_20240607T143005Z_0d9f26b2"))?;

    let live = make_live_dir(temp.path(), "session_y")?;
    let outcome = archive::promote(&live, &completed, &summary)?;

    assert_eq!(
        outcome.archive_dir.file_name().unwrap().to_string_lossy(),
        "meeting_unknown_20240607T143005Z_0d9f26b2_01"
    );

    // Everything in the manifest is relative to the suffixed directory.
    let manifest: serde_json::Value = serde_json::from_slice(&fs::read(&outcome.manifest_path)?)?;
    for entry in manifest["files"].as_array().unwrap() {
        let path = entry["path"].as_str().unwrap();
        assert!(outcome.archive_dir.join(path).exists(), "missing {}", path);
    }

    Ok(())
}

#[test]
fn promote_fails_cleanly_when_live_dir_is_missing() {
    let temp = TempDir::new().unwrap();
    let summary = summary_for("abc", None);
    let result = archive::promote(
        &temp.path().join("live/does-not-exist"),
        &temp.path().join("completed"),
        &summary,
    );
    assert!(result.is_err());
}
