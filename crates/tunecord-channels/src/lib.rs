//! Chat channels and user-facing replies.
//!
//! A channel produces [`InboundMessage`]s on an [`InboundReceiver`] and is
//! stopped through its [`ChannelHandle`]. Replies go out through a
//! [`Reporter`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use tunecord_core::types::{ChannelId, InboundMessage};

pub mod command;
pub mod console;

pub use command::{Command, help_text, parse, usage_play};
pub use console::{ConsoleChannel, ConsoleReporter};

/// Longest message a text channel accepts.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Handle to stop a running channel.
pub struct ChannelHandle {
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl ChannelHandle {
    pub fn new(shutdown_tx: tokio::sync::oneshot::Sender<()>) -> Self {
        Self { shutdown_tx }
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Receiver for inbound messages from a channel.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// Sender for inbound messages (used by channel implementations).
pub type InboundSender = mpsc::UnboundedSender<InboundMessage>;

/// Delivers text back to a text channel.
#[async_trait]
pub trait Reporter: Send + Sync + 'static {
    async fn send(&self, channel: &ChannelId, text: &str) -> anyhow::Result<()>;
}

/// Split a message into chunks of at most [`MAX_MESSAGE_LEN`] bytes.
///
/// Prefers splitting at the last newline inside the limit and never splits
/// inside a UTF-8 character.
pub fn split_message(text: &str) -> Vec<String> {
    if text.len() <= MAX_MESSAGE_LEN {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= MAX_MESSAGE_LEN {
            chunks.push(remaining.to_string());
            break;
        }
        let mut limit = MAX_MESSAGE_LEN;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let split_at = match remaining[..limit].rfind('\n') {
            Some(0) | None => limit,
            Some(i) => i,
        };
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_message_short() {
        let chunks = split_message("Hello");
        assert_eq!(chunks, vec!["Hello".to_string()]);
    }

    #[test]
    fn test_split_message_long() {
        let text = "a".repeat(3000);
        let chunks = split_message(&text);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.len() <= MAX_MESSAGE_LEN);
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_message_prefers_newline() {
        let text = format!("{}\n{}", "a".repeat(1500), "b".repeat(1000));
        let chunks = split_message(&text);
        assert_eq!(chunks, vec!["a".repeat(1500), "b".repeat(1000)]);
    }

    #[test]
    fn test_split_message_multibyte() {
        let text = "é".repeat(1500);
        let chunks = split_message(&text);
        assert!(chunks.iter().all(|c| c.len() <= MAX_MESSAGE_LEN));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_channel_handle_shutdown() {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        ChannelHandle::new(tx).shutdown();
        assert!(rx.try_recv().is_ok());
    }
}
