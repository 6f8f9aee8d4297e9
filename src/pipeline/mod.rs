//! Post-archive pipeline: walks a sealed archive, transcribes every audio
//! file and writes summary artifacts next to them.
//!
//! This runs detached from the session that produced the archive; failures
//! are logged and never reach the session or block shutdown.

pub mod extractive;
pub mod providers;

pub use providers::{
    summariser_chain, summarise_with_fallback, transcribe_with_fallback, transcriber_chain,
    MeetingSummary, SummaryHints, Transcriber, Transcription,
};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::session::MIXED_AUDIO_FILE;

const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "flac", "ogg"];

/// Filename patterns that attribute an audio file to a participant, tried
/// in order; the first capture group is the participant id.
static PARTICIPANT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?:participant|user)_(\w+)").unwrap(),
        Regex::new(r"combined_([^_]+_\d+_\d+)").unwrap(),
    ]
});

pub fn participant_id_from_filename(filename: &str) -> Option<String> {
    PARTICIPANT_PATTERNS
        .iter()
        .find_map(|p| p.captures(filename))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Transcribe and summarise everything in a sealed archive directory.
pub async fn process_archive(archive_dir: &Path, config: &PipelineConfig) -> Result<()> {
    let audio_files = find_audio_files(archive_dir)?;
    if audio_files.is_empty() {
        debug!(archive = %archive_dir.display(), "no audio files to process");
        return Ok(());
    }

    info!(
        archive = %archive_dir.display(),
        files = audio_files.len(),
        "post-archive pipeline started"
    );

    let transcribers = transcriber_chain(config);
    let summarisers = summariser_chain(config);

    // Transcribe every audio file, remembering which ones belong to a
    // participant, in discovery order.
    let mut mixed: Option<Transcription> = None;
    let mut participants: Vec<(PathBuf, Transcription)> = Vec::new();

    for path in &audio_files {
        let Some(transcription) =
            transcribe_with_fallback(&transcribers, path, &config.language).await
        else {
            continue;
        };

        write_artifact(path, ".transcript.json", &transcription)?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if filename == MIXED_AUDIO_FILE {
            mixed = Some(transcription);
        } else if participant_id_from_filename(&filename).is_some() {
            participants.push((path.clone(), transcription));
        }
    }

    // Meeting text: the mixed transcript when present, else the
    // participants' transcripts concatenated in discovery order.
    let meeting_text = match &mixed {
        Some(t) => t.text.clone(),
        None => participants
            .iter()
            .map(|(_, t)| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    };

    let meeting_hints = SummaryHints {
        provider_summary: mixed
            .as_ref()
            .and_then(|t| t.provider_summary.clone())
            .or_else(|| {
                participants
                    .iter()
                    .find_map(|(_, t)| t.provider_summary.clone())
            }),
    };

    let meeting_summary =
        summarise_with_fallback(&summarisers, &meeting_text, &config.language, &meeting_hints)
            .await;
    // The meeting-level summary lives beside the mixed container (at the
    // archive root when the session produced no mixed audio).
    let mixed_path = archive_dir.join(MIXED_AUDIO_FILE);
    write_artifact(&mixed_path, ".summary.json", &meeting_summary)?;

    for (path, transcription) in &participants {
        let hints = SummaryHints {
            provider_summary: transcription.provider_summary.clone(),
        };
        let summary =
            summarise_with_fallback(&summarisers, &transcription.text, &config.language, &hints)
                .await;
        write_artifact(path, ".summary.json", &summary)?;
    }

    info!(
        archive = %archive_dir.display(),
        transcribed = participants.len() + usize::from(mixed.is_some()),
        "post-archive pipeline finished"
    );

    Ok(())
}

/// Audio files under `dir`, recursively, sorted by path.
pub fn find_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_audio_files(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_audio_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {:?}", dir))? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_audio_files(&path, out)?;
        } else if is_audio_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Write `<audio file name><suffix>` next to the audio file.
fn write_artifact<T: serde::Serialize>(audio_path: &Path, suffix: &str, value: &T) -> Result<()> {
    let mut name = audio_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    let path = audio_path.with_file_name(name);

    let json = serde_json::to_vec_pretty(value).context("failed to serialise artifact")?;
    fs::write(&path, json).with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}
