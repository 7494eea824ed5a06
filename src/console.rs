// ABOUTME: Line-oriented terminal chat surface for running the bot without a platform
// ABOUTME: Reads user lines from stdin, prints persona replies to stdout, keeps a history buffer

use anyhow::{Context, Result};
use async_trait::async_trait;
use natter_core::config::ConsoleConfig;
use natter_core::traits::{Channel, ChatMessage, ChatSurface, EventStream, TypingProbe};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

type Reader = Box<dyn AsyncBufRead + Unpin + Send>;
type Writer = Box<dyn AsyncWrite + Unpin + Send>;

/// Messages kept for history requests
const HISTORY_CAPACITY: usize = 200;

pub struct ConsoleSurface {
    channel_id: String,
    user_name: String,
    bot_name: String,
    history: Arc<Mutex<VecDeque<ChatMessage>>>,
    reader: Mutex<Option<Reader>>,
    writer: tokio::sync::Mutex<Writer>,
}

impl ConsoleSurface {
    /// Console bound to the process's stdin and stdout
    pub fn stdio(config: &ConsoleConfig, bot_name: &str) -> Self {
        Self::with_io(
            config,
            bot_name,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }

    pub fn with_io<R, W>(config: &ConsoleConfig, bot_name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            channel_id: config.channel_id.clone(),
            user_name: config.user_name.clone(),
            bot_name: bot_name.to_string(),
            history: Arc::new(Mutex::new(VecDeque::new())),
            reader: Mutex::new(Some(Box::new(reader))),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
        }
    }

    fn remember(history: &Mutex<VecDeque<ChatMessage>>, message: ChatMessage) {
        let mut history = history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(message);
        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .context("Failed to write to console")?;
        writer.flush().await.context("Failed to flush console")
    }
}

#[async_trait]
impl TypingProbe for ConsoleSurface {
    /// The terminal cannot tell whether the user is mid-line
    async fn is_typing(&self, _channel_id: &str) -> Result<bool> {
        Ok(false)
    }
}

#[async_trait]
impl ChatSurface for ConsoleSurface {
    async fn event_stream(&self) -> Result<EventStream> {
        let mut reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| anyhow::anyhow!("Console event stream already taken"))?;

        let (tx, rx) = mpsc::channel(32);
        let history = Arc::clone(&self.history);
        let channel_id = self.channel_id.clone();
        let user_name = self.user_name.clone();

        tokio::spawn(async move {
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read console input");
                        break;
                    }
                }
                let content = line.trim();
                if content.is_empty() {
                    continue;
                }

                let mut message = ChatMessage::new(&channel_id, &user_name, content).direct();
                message.mentions_bot = true;
                Self::remember(&history, message.clone());
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            tracing::debug!("Console input closed");
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn history(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let messages: Vec<ChatMessage> = history
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn participant_names(&self, _channel_id: &str) -> Result<BTreeSet<String>> {
        Ok(BTreeSet::from([self.user_name.clone()]))
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        self.write_line(&format!("{}: {}", self.bot_name, text))
            .await?;
        Self::remember(
            &self.history,
            ChatMessage::new(channel_id, &self.bot_name, text).direct(),
        );
        Ok(())
    }

    async fn set_typing(&self, channel_id: &str) -> Result<()> {
        tracing::trace!(channel_id = %channel_id, "Persona is typing");
        Ok(())
    }

    async fn channels(&self) -> Vec<Channel> {
        let mut channel = Channel::new(&self.channel_id, true);
        channel.participants.insert(self.user_name.clone());
        vec![channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn config() -> ConsoleConfig {
        ConsoleConfig {
            channel_id: "console".to_string(),
            user_name: "you".to_string(),
        }
    }

    #[tokio::test]
    async fn test_reads_lines_as_direct_messages() {
        let input = std::io::Cursor::new(b"hello\n\n  there  \n".to_vec());
        let console = ConsoleSurface::with_io(&config(), "Aiko", input, tokio::io::sink());

        let messages: Vec<ChatMessage> = console.event_stream().await.unwrap().collect().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].content, "there");
        assert!(messages.iter().all(|m| m.is_direct && m.author == "you"));

        let history = console.history("console", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(console.event_stream().await.is_err());
    }

    #[tokio::test]
    async fn test_send_prints_and_records_reply() {
        let (writer, output) = tokio::io::duplex(1024);
        let console = ConsoleSurface::with_io(&config(), "Aiko", tokio::io::empty(), writer);

        console.send("console", "konnichiwa").await.unwrap();
        let mut lines = BufReader::new(output).lines();
        assert_eq!(
            lines.next_line().await.unwrap(),
            Some("Aiko: konnichiwa".to_string())
        );

        let history = console.history("console", 10).await.unwrap();
        assert_eq!(history[0].author, "Aiko");
    }

    #[tokio::test]
    async fn test_history_limit_keeps_newest() {
        let console =
            ConsoleSurface::with_io(&config(), "Aiko", tokio::io::empty(), tokio::io::sink());
        for i in 0..5 {
            console.send("console", &format!("line {}", i)).await.unwrap();
        }
        let history = console.history("console", 2).await.unwrap();
        assert_eq!(
            history.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["line 3", "line 4"]
        );
    }

    #[tokio::test]
    async fn test_channel_metadata() {
        let console =
            ConsoleSurface::with_io(&config(), "Aiko", tokio::io::empty(), tokio::io::sink());
        let channels = console.channels().await;
        assert_eq!(channels.len(), 1);
        assert!(channels[0].is_direct);
        assert!(console.participant_names("console").await.unwrap().contains("you"));
        assert!(!console.is_typing("console").await.unwrap());
    }
}
