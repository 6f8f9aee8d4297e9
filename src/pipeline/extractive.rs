//! Keyword-based extractive summarisation, the final fallback when no
//! external provider is configured or every configured one failed.

use once_cell::sync::Lazy;
use regex::Regex;

use super::providers::MeetingSummary;

const MAX_KEY_POINTS: usize = 5;
const MAX_ACTION_ITEMS: usize = 3;
const MAX_DECISIONS: usize = 3;
const MAX_TOPICS: usize = 5;

static SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").unwrap());

/// Split on sentence punctuation, keeping sentences longer than 10
/// characters.
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|s| s.chars().count() > 10)
        .map(str::to_string)
        .collect()
}

struct KeywordSets {
    important: Regex,
    action: Regex,
    decision: Regex,
    topic: Regex,
    question: Regex,
}

static ENGLISH: Lazy<KeywordSets> = Lazy::new(|| KeywordSets {
    important: Regex::new(r"(?i)\b(important|key|critical|essential|main|priority|highlight)\b")
        .unwrap(),
    action: Regex::new(
        r"(?i)\b(action|task|todo|assign(?:ed)?|follow[ -]?up|need(?:s)? to|must|deadline|will take)\b",
    )
    .unwrap(),
    decision: Regex::new(
        r"(?i)\b(decide(?:d)?|decision|agree(?:d)?|approve(?:d)?|conclude(?:d)?|resolved|final)\b",
    )
    .unwrap(),
    topic: Regex::new(r"(?i)\b(discuss(?:ed)?|topic|regarding|agenda|talk(?:ed)? about)\b")
        .unwrap(),
    question: Regex::new(r"(?i)(\?|\b(question|why|how|what|when|who)\b)").unwrap(),
});

static VIETNAMESE: Lazy<KeywordSets> = Lazy::new(|| KeywordSets {
    important: Regex::new(r"(?i)(quan trọng|chính|cốt lõi|ưu tiên|đáng chú ý)").unwrap(),
    action: Regex::new(r"(?i)(hành động|nhiệm vụ|cần phải|cần làm|giao cho|theo dõi|hạn chót)")
        .unwrap(),
    decision: Regex::new(r"(?i)(quyết định|thống nhất|đồng ý|phê duyệt|chốt|kết luận)").unwrap(),
    topic: Regex::new(r"(?i)(thảo luận|chủ đề|về việc|nội dung|chương trình)").unwrap(),
    question: Regex::new(r"(?i)(\?|câu hỏi|tại sao|như thế nào|khi nào)").unwrap(),
});

fn sets_for(language: &str) -> &'static KeywordSets {
    if language.to_ascii_lowercase().starts_with("vi") {
        &VIETNAMESE
    } else {
        &ENGLISH
    }
}

fn matching(sentences: &[String], pattern: &Regex, cap: usize) -> Vec<String> {
    sentences
        .iter()
        .filter(|s| pattern.is_match(s))
        .take(cap)
        .cloned()
        .collect()
}

/// Summary = roughly the leading and trailing 30% of the sentences; the
/// categorised lists come from the keyword sets for the language.
pub fn summarise(text: &str, language: &str) -> MeetingSummary {
    let sentences = split_sentences(text);
    let n = sentences.len();

    let take = ((n as f64) * 0.3).ceil() as usize;
    let head = (take + 1) / 2;
    let tail = take / 2;
    let tail_start = n.saturating_sub(tail).max(head);

    let mut picked: Vec<&str> = sentences.iter().take(head).map(String::as_str).collect();
    picked.extend(sentences[tail_start..].iter().map(String::as_str));
    let summary = picked.join(". ");

    let sets = sets_for(language);
    let mut key_points = matching(&sentences, &sets.important, MAX_KEY_POINTS);
    if key_points.len() < MAX_KEY_POINTS {
        for s in matching(&sentences, &sets.question, MAX_KEY_POINTS - key_points.len()) {
            if !key_points.contains(&s) {
                key_points.push(s);
            }
        }
    }

    MeetingSummary {
        summary,
        key_points,
        action_items: matching(&sentences, &sets.action, MAX_ACTION_ITEMS),
        decisions: matching(&sentences, &sets.decision, MAX_DECISIONS),
        topics: matching(&sentences, &sets.topic, MAX_TOPICS),
        source: "custom".to_string(),
    }
}
