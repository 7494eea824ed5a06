// ABOUTME: Data model and collaborator traits consumed by the turn coordinator
// ABOUTME: Chat surface, typing probe, generation backend, and memory persistence seams

use crate::error::BackendError;
use crate::memory::MemoryEntry;
use crate::persona::Persona;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::pin::Pin;
use tokio_stream::Stream;

// =============================================================================
// Messages and Channels
// =============================================================================

/// The message a chat message is replying to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRef {
    pub author: String,
    pub content: String,
}

/// A message observed on a chat surface. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Channel/conversation the message was posted in
    pub channel_id: String,
    /// Display name of the author
    pub author: String,
    /// Text body, with platform mentions already resolved to names
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Whether this is a direct (1:1) conversation
    pub is_direct: bool,
    /// Quoted message, when this message replies to the bot
    pub reply_to: Option<ReplyRef>,
    /// Whether the bot was mentioned in the message
    pub mentions_bot: bool,
}

impl ChatMessage {
    pub fn new(
        channel_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            author: author.into(),
            content: content.into(),
            timestamp: Utc::now(),
            is_direct: false,
            reply_to: None,
            mentions_bot: false,
        }
    }

    pub fn direct(mut self) -> Self {
        self.is_direct = true;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn replying_to(mut self, author: impl Into<String>, content: impl Into<String>) -> Self {
        self.reply_to = Some(ReplyRef {
            author: author.into(),
            content: content.into(),
        });
        self
    }

    /// Whether this message is a reply to something
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    /// `author: content`, the form used for transcripts and memory recall
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.author, self.content)
    }
}

/// Render a history as newline separated `author: content` lines
pub fn render_transcript(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(ChatMessage::transcript_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// An active conversation as tracked by the chat surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub channel_id: String,
    pub is_direct: bool,
    pub participants: BTreeSet<String>,
}

impl Channel {
    pub fn new(channel_id: impl Into<String>, is_direct: bool) -> Self {
        Self {
            channel_id: channel_id.into(),
            is_direct,
            participants: BTreeSet::new(),
        }
    }
}

// =============================================================================
// Chat Surface
// =============================================================================

/// Boxed stream of inbound chat messages
pub type EventStream = Pin<Box<dyn Stream<Item = ChatMessage> + Send>>;

/// Reports whether a human is currently typing in a channel
#[async_trait]
pub trait TypingProbe: Send + Sync {
    async fn is_typing(&self, channel_id: &str) -> Result<bool>;
}

/// A chat platform adapter (Discord, Telegram, console, ...)
#[async_trait]
pub trait ChatSurface: TypingProbe {
    /// Inbound messages as they arrive
    async fn event_stream(&self) -> Result<EventStream>;

    /// Up to `limit` most recent messages, oldest first
    async fn history(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;

    /// Names of the users participating in a channel
    async fn participant_names(&self, channel_id: &str) -> Result<BTreeSet<String>>;

    /// Post a message to a channel
    async fn send(&self, channel_id: &str, text: &str) -> Result<()>;

    /// Show the "bot is typing" indicator, if the platform has one
    async fn set_typing(&self, channel_id: &str) -> Result<()>;

    /// Channels observed so far
    async fn channels(&self) -> Vec<Channel>;
}

// =============================================================================
// Generation Backend
// =============================================================================

/// Everything a backend needs to produce the persona's next reply
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub persona: &'a Persona,
    /// Recalled memory plus any channel context, injected into the prompt
    pub memory_prompt: &'a str,
    /// Conversation so far, oldest first
    pub history: &'a [ChatMessage],
    pub participants: &'a [String],
    /// Whether the triggering message replied to the bot
    pub is_reply: bool,
}

/// A text generation service producing raw completions
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logging and metrics
    fn name(&self) -> &'static str;

    /// Generate raw completions for the persona's next turn
    async fn generate_replies(
        &self,
        request: GenerationRequest<'_>,
    ) -> Result<Vec<String>, BackendError>;

    /// Free-form completion used for concept summaries
    async fn summarize(&self, _prompt: &str) -> Result<String, BackendError> {
        Err(BackendError::Unsupported(self.name()))
    }

    /// Whether completions should be split into one reply per line
    fn splits_lines(&self) -> bool {
        false
    }
}

// =============================================================================
// Memory Persistence
// =============================================================================

/// Storage for a persona's memory entries, loaded and saved as a unit
#[async_trait]
pub trait MemoryPersistence: Send + Sync {
    /// Load the entries for `identity`; an absent store yields no entries
    async fn load(&self, identity: &str) -> Result<Vec<MemoryEntry>>;

    /// Replace the stored entries for `identity`
    async fn save(&self, identity: &str, entries: &[MemoryEntry]) -> Result<()>;
}
