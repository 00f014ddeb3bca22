//! Console channel: stdin lines in, stdout lines out.

use std::io::BufRead;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use tunecord_core::config::ConsoleConfig;
use tunecord_core::types::{Author, ChannelId, GuildId, InboundMessage, UserId};

use crate::{ChannelHandle, InboundReceiver, InboundSender, Reporter, split_message};

/// Treats each line typed on stdin as a chat message from the console user.
pub struct ConsoleChannel {
    config: ConsoleConfig,
}

impl ConsoleChannel {
    pub fn new(config: ConsoleConfig) -> Self {
        Self { config }
    }

    pub fn author(&self) -> Author {
        Author {
            id: UserId::new(self.config.user_id.as_str()),
            username: self.config.username.clone(),
            bot: false,
        }
    }

    fn message(&self, line: &str) -> InboundMessage {
        InboundMessage::new(
            GuildId::new(self.config.guild_id.as_str()),
            ChannelId::new(self.config.channel_id.as_str()),
            self.author(),
            line,
        )
    }

    /// Start reading from stdin.
    ///
    /// Lines are read on a dedicated thread, which is left behind at exit
    /// instead of holding up runtime shutdown on a blocking read.
    pub fn start(self) -> anyhow::Result<(InboundReceiver, ChannelHandle)> {
        let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
        std::thread::Builder::new()
            .name("console-stdin".into())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(self.forward(line_rx))
    }

    /// Start reading lines from `reader`. The receiver closes at EOF or on
    /// shutdown.
    pub fn start_with_reader<R>(self, reader: R) -> anyhow::Result<(InboundReceiver, ChannelHandle)>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%e, "Console read error");
                        break;
                    }
                }
            }
        });
        Ok(self.forward(line_rx))
    }

    fn forward(self, mut lines: mpsc::UnboundedReceiver<String>) -> (InboundReceiver, ChannelHandle) {
        let (inbound_tx, inbound_rx): (InboundSender, InboundReceiver) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            info!(
                guild = %self.config.guild_id,
                user = %self.config.username,
                "Console channel started"
            );

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Console channel stopped");
                        break;
                    }
                    line = lines.recv() => match line {
                        Some(line) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if inbound_tx.send(self.message(line)).is_err() {
                                debug!("Console receiver dropped");
                                break;
                            }
                        }
                        None => {
                            info!("Console input closed");
                            break;
                        }
                    }
                }
            }
        });

        (inbound_rx, ChannelHandle::new(shutdown_tx))
    }
}

/// Prints replies as `[channel] text`, one line per chunk.
pub struct ConsoleReporter<W = Stdout> {
    out: Mutex<W>,
}

impl ConsoleReporter<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> Reporter for ConsoleReporter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, channel: &ChannelId, text: &str) -> anyhow::Result<()> {
        let mut out = self.out.lock().await;
        for chunk in split_message(text) {
            out.write_all(format!("[{channel}] {chunk}\n").as_bytes())
                .await?;
        }
        out.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_lines_become_messages() {
        let channel = ConsoleChannel::new(ConsoleConfig::default());
        let input = Cursor::new(b"!ping\n\n  !play foo  \n".to_vec());
        let (mut rx, _handle) = channel.start_with_reader(input).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.content, "!ping");
        assert_eq!(first.guild_id.as_str(), "local");
        assert_eq!(first.channel_id.as_str(), "console");
        assert_eq!(first.author.id.as_str(), "local-user");
        assert!(!first.author.bot);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.content, "!play foo");

        // EOF closes the receiver.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_receiver() {
        let (_writer, reader) = tokio::io::duplex(64);
        let channel = ConsoleChannel::new(ConsoleConfig::default());
        let (mut rx, handle) = channel.start_with_reader(BufReader::new(reader)).unwrap();

        handle.shutdown();
        let closed = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_reporter_prefixes_channel() {
        let reporter = ConsoleReporter::new(Vec::<u8>::new());
        reporter.send(&"console".into(), "Pong!").await.unwrap();
        reporter.send(&"console".into(), "a\nb").await.unwrap();

        let out = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(out, "[console] Pong!\n[console] a\nb\n");
    }
}
