//! Routes inbound chat messages to commands and playback tasks.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use tunecord_channels::{Command, InboundReceiver, Reporter, help_text, parse, usage_play};
use tunecord_core::config::Config;
use tunecord_core::types::{ChannelId, InboundMessage, PlaybackRequest, UserId};

use crate::player::Player;

pub struct Dispatcher {
    player: Arc<Player>,
    reporter: Arc<dyn Reporter>,
    prefix: String,
    owner_id: Option<UserId>,
    bot_user_id: Option<UserId>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        player: Arc<Player>,
        reporter: Arc<dyn Reporter>,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            player,
            reporter,
            prefix: config.prefix().to_string(),
            owner_id: config.owner_id().map(UserId::from),
            bot_user_id: config.bot_user_id().map(UserId::from),
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Handle messages until the receiver closes or shutdown is requested,
    /// then wait for every playback task to finish its teardown.
    pub async fn run(self, mut rx: InboundReceiver) {
        info!(prefix = %self.prefix, "Dispatcher started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting commands");
                    break;
                }
                message = rx.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => {
                        info!("Inbound channel closed");
                        break;
                    }
                }
            }
        }

        self.tracker.close();
        if !self.tracker.is_empty() {
            info!(active = self.tracker.len(), "Waiting for playbacks to finish");
        }
        self.tracker.wait().await;
        info!("Dispatcher stopped");
    }

    /// Handle one message. Playback runs in its own tracked task.
    pub async fn handle(&self, message: InboundMessage) {
        if message.author.bot || self.bot_user_id.as_ref() == Some(&message.author.id) {
            return;
        }
        let Some(command) = parse(&self.prefix, &message.content) else {
            return;
        };

        match command {
            Command::Ping => self.reply(&message.channel_id, "Pong!").await,
            Command::Help => self.reply(&message.channel_id, &help_text(&self.prefix)).await,
            Command::Shutdown => {
                let is_owner = self
                    .owner_id
                    .as_ref()
                    .is_none_or(|owner| owner == &message.author.id);
                if !is_owner {
                    warn!(user = %message.author.id, "Shutdown refused for non-owner");
                    self.reply(&message.channel_id, "Only the bot owner can shut me down.")
                        .await;
                    return;
                }
                info!(user = %message.author.username, "Shutdown requested from chat");
                self.shutdown.cancel();
            }
            Command::Play(query) if query.is_empty() => {
                self.reply(&message.channel_id, &usage_play(&self.prefix))
                    .await;
            }
            Command::Play(query) => {
                let request = PlaybackRequest::from_message(&message, query);
                self.spawn_playback(request);
            }
        }
    }

    /// Playback tasks still running.
    pub fn active_playbacks(&self) -> usize {
        self.tracker.len()
    }

    fn spawn_playback(&self, request: PlaybackRequest) {
        let player = self.player.clone();
        let reporter = self.reporter.clone();
        let cancel = self.shutdown.clone();

        info!(
            request = %request.id,
            guild = %request.guild_id,
            user = %request.requester.username,
            query = %request.query,
            "Playback requested"
        );

        self.tracker.spawn(async move {
            let Err(e) = player.play(&request, &cancel).await else {
                return;
            };

            if e.is_user_error() {
                warn!(request = %request.id, %e, "Playback rejected");
            } else {
                error!(request = %request.id, %e, "Playback failed");
            }

            if let Some(text) = e.user_message() {
                send_reply(reporter.as_ref(), &request.text_channel, &text).await;
            }
        });
    }

    async fn reply(&self, channel: &ChannelId, text: &str) {
        send_reply(self.reporter.as_ref(), channel, text).await;
    }
}

async fn send_reply(reporter: &dyn Reporter, channel: &ChannelId, text: &str) {
    if let Err(e) = reporter.send(channel, text).await {
        error!(%channel, %e, "Failed to send reply");
    }
}
