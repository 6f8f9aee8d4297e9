//! Participant identity and human-facing labels.
//!
//! The `deviceId` string is the only stable key for a participant; the
//! label used for directory and file names is derived data, cached for the
//! whole session so a participant is never relabelled mid-meeting.

use rand::Rng;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const MAX_NAME_LEN: usize = 48;
const FALLBACK_NAME: &str = "participant";

/// Roster entry, written on `UsersUpdate` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_current_user: Option<bool>,
}

/// Collapse a display name to a filesystem-safe slug: NFKD, combining
/// marks stripped, non-alphanumerics dropped, lowercased, truncated.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_NAME_LEN)
        .collect();

    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

/// Device suffix: the trailing run of decimal digits of the id; if none,
/// the last 3 digits appearing anywhere in it; else `"id"`.
pub fn device_suffix(participant_id: &str) -> String {
    let trailing: String = participant_id
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if !trailing.is_empty() {
        return trailing;
    }

    let digits: Vec<char> = participant_id.chars().filter(|c| c.is_ascii_digit()).collect();
    if !digits.is_empty() {
        let start = digits.len().saturating_sub(3);
        return digits[start..].iter().collect();
    }

    "id".to_string()
}

/// Compose the label `name_suffix_rand` for a participant. The name comes
/// from `fullName`, else `displayName`, else a literal fallback; the
/// trailing three random digits keep concurrent same-named participants
/// apart.
pub fn compose_label(info: Option<&ParticipantInfo>, participant_id: &str) -> String {
    let name_source = info
        .and_then(|i| i.full_name.as_deref().or(i.display_name.as_deref()))
        .unwrap_or(FALLBACK_NAME);

    let name = sanitize_name(name_source);
    let suffix = device_suffix(participant_id);
    let rand3 = rand::thread_rng().gen_range(0..1000u32);

    format!("{}_{}_{:03}", name, suffix, rand3)
}
