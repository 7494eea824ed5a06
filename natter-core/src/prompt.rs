// ABOUTME: Prompt text shared by generation backends
// ABOUTME: System instruction, stop markers, history rendering, and prompt cleanup

use crate::persona::Persona;
use crate::traits::ChatMessage;
use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Instruction placed ahead of the persona description
pub const SYSTEM_PROMPT: &str = "Write {{char}}'s next reply in a fictional chat. Write 1 reply only in internet RP style, and avoid quotation marks. Use markdown. Be proactive, creative, and drive the plot and conversation forward. Always stay in character and avoid repeating sentence and words.";

/// Markers that end a turn regardless of who is in the channel
pub const DEFAULT_STOP_MARKERS: [&str; 3] = ["You:", "Tu:", "Me:"];

/// Completion length requested from backends
pub const DEFAULT_MAX_TOKENS: u32 = 300;

/// Emoji, pictographs, and private-use symbols
static SYMBOLS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x{E000}-\x{F8FF}\x{1F000}-\x{1F7FF}\x{2011}-\x{26FF}\x{1F910}-\x{1F9FF}]")
        .expect("static regex")
});

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Default stop markers plus `name:` for every participant
pub fn stop_markers(participants: &[String]) -> Vec<String> {
    DEFAULT_STOP_MARKERS
        .iter()
        .map(|m| m.to_string())
        .chain(participants.iter().map(|p| format!("{}:", p)))
        .collect()
}

/// System prompt describing the persona, recalled memory, and current time.
///
/// The time is taken from the newest history message.
pub fn system_prompt(persona: &Persona, memory_prompt: &str, history: &[ChatMessage]) -> String {
    let now = history
        .last()
        .map(|m| m.timestamp)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    persona.substitute(&format!(
        "{}{}.{}\n\n{}\n\n{}.\nNow is {}.\n",
        SYSTEM_PROMPT,
        persona.description,
        persona.personality,
        memory_prompt,
        persona.scenario,
        now
    ))
}

/// Quoted reply context for a message, empty if it replies to nothing
pub fn reply_context(message: &ChatMessage) -> String {
    match &message.reply_to {
        Some(reply) => format!("> @{}: {}\n", reply.author, reply.content),
        None => String::new(),
    }
}

/// History as `@author: content` lines for completion-style backends
pub fn render_history(history: &[ChatMessage], include_replies: bool) -> String {
    history
        .iter()
        .map(|m| {
            let quote = if include_replies {
                reply_context(m)
            } else {
                String::new()
            };
            format!("{}@{}: {}\n", quote, m.author, m.content)
        })
        .collect()
}

/// Drop emoji and collapse whitespace runs into single spaces
pub fn clean_prompt(text: &str) -> String {
    let without_symbols = SYMBOLS.replace_all(text, "");
    WHITESPACE_RUN
        .replace_all(&without_symbols, " ")
        .into_owned()
}
