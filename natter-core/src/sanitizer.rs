// ABOUTME: Turns a raw model completion into clean, deduplicated reply strings
// ABOUTME: Strips speaker markers, timestamps, stop markers, and echoed usernames

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Dangling `name:` turn marker at the very end of the text
static TRAILING_TURN_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n?\s*@?\w+:\s?\n?$").expect("static regex"));

/// ISO-8601 timestamps the model copies out of the prompt
static ISO_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z\n*").expect("static regex")
});

/// Lines made only of punctuation, symbols, or CJK ideographs
static NOISE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\W\x{4E00}-\x{9FAF}]+$").expect("static regex"));

/// Inputs that vary per generation call
#[derive(Debug, Clone, Default)]
pub struct SanitizeOptions {
    /// Persona name, stripped when the model prefixes its own turn
    pub bot_name: String,
    /// Participant names; a reply that is only a name is dropped
    pub usernames: Vec<String>,
    /// Stop markers trimmed from reply ends
    pub stop_markers: Vec<String>,
    /// Split the completion into one reply per line
    pub split_lines: bool,
}

impl SanitizeOptions {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            ..Self::default()
        }
    }

    pub fn usernames(mut self, usernames: Vec<String>) -> Self {
        self.usernames = usernames;
        self
    }

    pub fn stop_markers(mut self, stop_markers: Vec<String>) -> Self {
        self.stop_markers = stop_markers;
        self
    }

    pub fn split_lines(mut self, split_lines: bool) -> Self {
        self.split_lines = split_lines;
        self
    }
}

/// Apply `step` until the text stops changing
fn until_stable(mut text: String, step: impl Fn(&str) -> String) -> String {
    loop {
        let next = step(&text);
        if next == text {
            return text;
        }
        text = next;
    }
}

/// Clean the whole completion before it is split into candidates
fn clean_completion(raw: &str, bot_name: &str) -> String {
    let leading_bot = Regex::new(&format!(r"^\s*@?{}:\s?", regex::escape(bot_name))).ok();

    let text = match (&leading_bot, bot_name.is_empty()) {
        (Some(re), false) => until_stable(raw.to_string(), |t| re.replace(t, "").into_owned()),
        _ => raw.to_string(),
    };
    let text = until_stable(text, |t| TRAILING_TURN_MARKER.replace(t, "").into_owned());
    let text = ISO_TIMESTAMP.replace_all(&text, "");

    text.replace(['¿', '¡'], "")
}

/// Strip every stop marker found at the end of the candidate
fn strip_stop_markers<'a>(mut candidate: &'a str, stop_markers: &[String]) -> &'a str {
    loop {
        let before = candidate.len();
        for marker in stop_markers.iter().filter(|m| !m.is_empty()) {
            if let Some(stripped) = candidate.trim_end().strip_suffix(marker.as_str()) {
                candidate = stripped;
            }
        }
        candidate = candidate.trim_end();
        if candidate.len() == before {
            return candidate;
        }
    }
}

/// Clean one candidate, or `None` if it should be dropped
fn clean_candidate(candidate: &str, opts: &SanitizeOptions) -> Option<String> {
    if NOISE_LINE.is_match(candidate) {
        return None;
    }

    let trimmed = candidate.trim();
    let without_at = trimmed.trim_start_matches('@');
    let cleaned = strip_stop_markers(without_at, &opts.stop_markers).trim();

    if cleaned.is_empty()
        || opts.usernames.iter().any(|u| u == cleaned)
        || opts.stop_markers.iter().any(|m| m == cleaned)
    {
        return None;
    }
    Some(cleaned.to_string())
}

/// Convert one raw completion into zero or more replies.
///
/// The result never contains an empty string, a bare stop marker, or a bare
/// username, and keeps first-seen order when removing duplicates.
///
/// The pipeline is repeated on its own rejoined output until that output
/// stops changing, so sanitizing a clean reply list again is a no-op.
pub fn sanitize(raw: &str, opts: &SanitizeOptions) -> Vec<String> {
    let mut replies = sanitize_pass(raw, opts);
    loop {
        let joined = replies.join("\n");
        let next = sanitize_pass(&joined, opts);
        if next == replies {
            return replies;
        }
        replies = next;
    }
}

/// One run of the completion and candidate stages
fn sanitize_pass(raw: &str, opts: &SanitizeOptions) -> Vec<String> {
    let text = clean_completion(raw, &opts.bot_name);

    let candidates: Vec<&str> = if opts.split_lines {
        text.split('\n').collect()
    } else {
        vec![text.as_str()]
    };

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter_map(|c| clean_candidate(c, opts))
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Sanitize several completions into one deduplicated reply list
pub fn sanitize_all(raws: &[String], opts: &SanitizeOptions) -> Vec<String> {
    let mut seen = HashSet::new();
    raws.iter()
        .flat_map(|raw| sanitize(raw, opts))
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
