//! Directory promotion from `live/` to `completed/` and the archive
//! manifest.
//!
//! Promotion is a single `rename`; there is no partial move. On failure
//! the live directory is left untouched for offline recovery.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::session::SessionSummary;

pub const MANIFEST_FILE: &str = "archive.json";

/// `archive.json`: every file in the sealed directory with its size.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveManifest {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
}

pub struct ArchiveOutcome {
    pub archive_dir: PathBuf,
    pub manifest_path: PathBuf,
}

/// Move the live session directory into `completed/` under its archive
/// name and write the manifest. Name collisions get a `_NN` suffix.
pub fn promote(
    live_dir: &Path,
    completed_root: &Path,
    summary: &SessionSummary,
) -> Result<ArchiveOutcome> {
    fs::create_dir_all(completed_root)
        .with_context(|| format!("failed to create {:?}", completed_root))?;

    let base_name = archive_folder_name(
        summary.metadata.meeting_url.as_deref(),
        summary.started_at,
        &summary.session_id,
    );

    let archive_dir = reserve_archive_dir(completed_root, &base_name)?;

    fs::rename(live_dir, &archive_dir).with_context(|| {
        format!("failed to move {:?} to {:?}", live_dir, archive_dir)
    })?;

    let manifest_path = write_manifest(&archive_dir, summary)?;

    Ok(ArchiveOutcome {
        archive_dir,
        manifest_path,
    })
}

fn reserve_archive_dir(completed_root: &Path, base_name: &str) -> Result<PathBuf> {
    let candidate = completed_root.join(base_name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    for n in 1..100 {
        let candidate = completed_root.join(format!("{}_{:02}", base_name, n));
        if !candidate.exists() {
            debug!(name = %candidate.display(), "archive name collision, using suffix");
            return Ok(candidate);
        }
    }

    bail!("no free archive directory name for {}", base_name)
}

fn write_manifest(archive_dir: &Path, summary: &SessionSummary) -> Result<PathBuf> {
    let mut files = Vec::new();
    collect_files(archive_dir, archive_dir, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let manifest = ArchiveManifest {
        session_id: summary.session_id.clone(),
        meeting_url: summary.metadata.meeting_url.clone(),
        bot_name: summary.metadata.bot_name.clone(),
        started_at: summary.started_at,
        archived_at: Utc::now(),
        files,
    };

    let manifest_path = archive_dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(&manifest).context("failed to serialise manifest")?;
    fs::write(&manifest_path, json)
        .with_context(|| format!("failed to write {:?}", manifest_path))?;

    Ok(manifest_path)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<ManifestEntry>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {:?}", dir))? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.push(ManifestEntry {
                path: relative,
                size: entry.metadata()?.len(),
            });
        }
    }
    Ok(())
}

/// `meeting_<slug>_<timestamp>_<shortid>`.
pub fn archive_folder_name(
    meeting_url: Option<&str>,
    started_at: DateTime<Utc>,
    session_id: &str,
) -> String {
    let slug = meeting_slug(meeting_url);
    let timestamp = started_at
        .to_rfc3339_opts(SecondsFormat::Secs, true)
        .replace(['-', ':'], "");
    let short_id = &session_id[..session_id.len().min(8)];
    format!("meeting_{}_{}_{}", slug, timestamp, short_id)
}

/// Slug from the meeting URL: the last non-empty path segment, else the
/// host, else `"unknown"`.
pub fn meeting_slug(meeting_url: Option<&str>) -> String {
    let Some(url) = meeting_url else {
        return "unknown".to_string();
    };

    let without_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => url,
    };
    let without_query = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);

    let mut parts = without_query.split('/');
    let host = parts.next().unwrap_or("");
    let last_segment = parts.rev().find(|s| !s.is_empty());

    let source = last_segment.unwrap_or(host);
    let slug = sanitize_slug(source);
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

/// NFKD, strip combining marks, collapse non-alphanumeric runs to `-`,
/// trim and lowercase.
fn sanitize_slug(raw: &str) -> String {
    let mut slug = String::new();
    let mut last_was_dash = false;

    for c in raw.nfkd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }

    slug.trim_matches('-').to_string()
}
