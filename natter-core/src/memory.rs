// ABOUTME: Keyword-triggered persona memory injected into generation prompts
// ABOUTME: Recall by case-insensitive key match, best-effort enrichment from model summaries

use crate::error::BackendError;
use crate::metrics;
use crate::persona::CHAR_PLACEHOLDER;
use crate::traits::{render_transcript, ChatMessage, GenerationBackend, MemoryPersistence};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Placeholder replaced by the key that triggered an entry
pub const KEY_PLACEHOLDER: &str = "{{key}}";

/// Appended to every recall result
pub const RECALL_TERMINATOR: &str = "\n";

/// Instruction sent to the backend when summarizing a conversation into concepts
pub const SUMMARY_PROMPT: &str = "Generate a JSON object where the key is the user name and the value is an array of 3 words summarizing this conversation";

/// A snippet of context recalled whenever one of its keys is mentioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Template text; may contain `{{key}}` and `{{char}}`
    pub content: String,
    pub keys: Vec<String>,
}

impl MemoryEntry {
    pub fn new<K, S>(content: impl Into<String>, keys: K) -> Self
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            content: content.into(),
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// First key found (case-insensitively) in the lowercased text
    fn matching_key(&self, lowered_text: &str) -> Option<&str> {
        self.keys
            .iter()
            .filter(|k| !k.trim().is_empty())
            .find(|k| lowered_text.contains(&k.to_lowercase()))
            .map(String::as_str)
    }
}

/// Memory entries for one persona, loaded and saved as a unit
pub struct MemoryStore {
    identity: String,
    entries: Vec<MemoryEntry>,
    persistence: Arc<dyn MemoryPersistence>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("identity", &self.identity)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store without touching persistence
    pub fn empty(identity: impl Into<String>, persistence: Arc<dyn MemoryPersistence>) -> Self {
        Self {
            identity: identity.into(),
            entries: Vec::new(),
            persistence,
        }
    }

    /// Load the stored entries for `identity`.
    ///
    /// Missing or unreadable storage starts an empty store; this never fails.
    pub async fn load(identity: impl Into<String>, persistence: Arc<dyn MemoryPersistence>) -> Self {
        let mut store = Self::empty(identity, persistence);
        match store.persistence.load(&store.identity).await {
            Ok(entries) => {
                tracing::info!(
                    identity = %store.identity,
                    entries = entries.len(),
                    "Memory loaded"
                );
                store.entries = entries;
            }
            Err(e) => {
                tracing::warn!(
                    identity = %store.identity,
                    error = %e,
                    "Failed to load memory, starting empty"
                );
            }
        }
        store
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry, replacing the content of an entry with exactly the same keys
    pub fn upsert(&mut self, entry: MemoryEntry) {
        match self.entries.iter_mut().find(|e| e.keys == entry.keys) {
            Some(existing) => existing.content = entry.content,
            None => self.entries.push(entry),
        }
    }

    /// Build the memory prompt for a conversation.
    ///
    /// Every entry with a key appearing (case-insensitively) in the text
    /// contributes its content once, with `{{key}}` replaced by the matching
    /// key. Results are joined with `.`, terminated with a newline, and have
    /// `{{char}}` replaced by the persona name.
    pub fn recall(&self, conversation: &str) -> String {
        let lowered = conversation.to_lowercase();
        let mut seen = HashSet::new();
        let mut recalled = Vec::new();

        for entry in &self.entries {
            let Some(key) = entry.matching_key(&lowered) else {
                continue;
            };
            let content = entry.content.replace(KEY_PLACEHOLDER, key);
            if seen.insert(content.clone()) {
                recalled.push(content);
            }
        }

        let prompt = recalled.join(".") + RECALL_TERMINATOR;
        prompt.replace(CHAR_PLACEHOLDER, &self.identity)
    }

    /// Persist the store, first dropping any key equal to the persona's own name
    pub async fn save(&mut self) -> Result<()> {
        let identity = self.identity.clone();
        for entry in &mut self.entries {
            entry.keys.retain(|k| *k != identity);
        }
        self.entries.retain(|e| !e.keys.is_empty());

        self.persistence
            .save(&self.identity, &self.entries)
            .await
            .with_context(|| format!("Failed to save memory for {}", self.identity))
    }

    /// Merge summarized concepts, overwriting entries with the same key, and save
    pub async fn merge_concepts(&mut self, concepts: Vec<MemoryEntry>) {
        let added = concepts.len();
        for entry in concepts {
            self.upsert(entry);
        }
        if let Err(e) = self.save().await {
            tracing::warn!(error = %e, "Failed to save integrated concepts");
        }
        metrics::record_concepts_integrated(added);
        tracing::debug!(added, "Concepts integrated into memory");
    }

    /// Summarize the conversation into new entries and merge them.
    ///
    /// Failures leave the store unchanged and are never returned.
    pub async fn integrate_concepts(
        &mut self,
        history: &[ChatMessage],
        backend: &dyn GenerationBackend,
        max_attempts: u32,
    ) -> &[MemoryEntry] {
        if let Some(concepts) = summarize_concepts(history, backend, max_attempts).await {
            self.merge_concepts(concepts).await;
        }
        &self.entries
    }
}

/// Ask the backend to summarize a conversation into concept entries.
///
/// Makes up to `max_attempts` summary requests until one yields a usable
/// JSON object. Touches no store.
pub async fn summarize_concepts(
    history: &[ChatMessage],
    backend: &dyn GenerationBackend,
    max_attempts: u32,
) -> Option<Vec<MemoryEntry>> {
    let prompt = format!("{}\n\n{}", SUMMARY_PROMPT, render_transcript(history));

    for attempt in 1..=max_attempts {
        let response = match backend.summarize(&prompt).await {
            Ok(response) => response,
            Err(BackendError::Unsupported(name)) => {
                tracing::debug!(backend = name, "Backend cannot summarize, skipping concepts");
                return None;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Concept summary request failed");
                continue;
            }
        };

        let concepts = extract_json_object(&response)
            .ok_or_else(|| anyhow::anyhow!("no JSON object in summary"))
            .and_then(parse_concepts);

        match concepts {
            Ok(concepts) => return Some(concepts),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "Unusable concept summary, retrying");
            }
        }
    }
    None
}

/// Find the first balanced `{...}` region in free-form text
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a `{"name": ["word", ...]}` summary into one entry per name
pub fn parse_concepts(json: &str) -> Result<Vec<MemoryEntry>> {
    let value: serde_json::Value = serde_json::from_str(json).context("Invalid summary JSON")?;
    let object = value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("Summary is not a JSON object"))?;

    let entries = object
        .iter()
        .filter(|(name, _)| !name.trim().is_empty())
        .filter_map(|(name, words)| {
            let summary = match words {
                serde_json::Value::Array(items) => items
                    .iter()
                    .filter_map(|w| w.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                serde_json::Value::String(s) => s.clone(),
                _ => return None,
            };
            if summary.trim().is_empty() {
                return None;
            }
            Some(MemoryEntry::new(
                format!("{}: {}", KEY_PLACEHOLDER, summary),
                [name.clone()],
            ))
        })
        .collect();

    Ok(entries)
}
