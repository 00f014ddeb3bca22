//! Playback orchestrator.
//!
//! ```text
//! Idle -> Resolving -> Joined -> Streaming -> Leaving -> Idle
//! ```
//!
//! Once a voice channel has been joined, it is left exactly once on every
//! path: success, lookup or start failure, a broken frame stream, a closed
//! sink, and shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tunecord_core::config::{Config, PlaybackConfig, SourceProvider, TranscoderConfig};
use tunecord_core::types::PlaybackRequest;
use tunecord_media::{
    AudioSourceProvider, LocalFileProvider, ProcessStartError, ProcessTranscoder, Transcoder,
    YtDlpProvider,
};
use tunecord_voice::{DeliveryStats, VoiceConnection, VoiceDirectory, VoiceTransport, deliver};

use crate::error::PlaybackError;
use crate::guild_lock::GuildLocks;

/// Build the audio source provider selected in config.
pub fn source_provider(config: &Config) -> Arc<dyn AudioSourceProvider> {
    match config.source_provider() {
        SourceProvider::Ytdlp => Arc::new(YtDlpProvider::new(config.ytdlp_program())),
        SourceProvider::Local => Arc::new(LocalFileProvider::new(config.music_dir())),
    }
}

pub struct Player {
    transport: Arc<dyn VoiceTransport>,
    directory: Arc<dyn VoiceDirectory>,
    sources: Arc<dyn AudioSourceProvider>,
    transcoder: Arc<dyn Transcoder>,
    join_settle: Duration,
    leave_settle: Duration,
    locks: GuildLocks,
}

impl Player {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        directory: Arc<dyn VoiceDirectory>,
        sources: Arc<dyn AudioSourceProvider>,
        transcoder: TranscoderConfig,
        playback: &PlaybackConfig,
    ) -> Self {
        Self {
            transport,
            directory,
            sources,
            transcoder: Arc::new(ProcessTranscoder::new(transcoder)),
            join_settle: Duration::from_millis(playback.join_settle_ms),
            leave_settle: Duration::from_millis(playback.leave_settle_ms),
            locks: GuildLocks::new(),
        }
    }

    /// Replace the external-process transcoder.
    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn locks(&self) -> &GuildLocks {
        &self.locks
    }

    /// Play `request.query` in the requester's current voice channel.
    ///
    /// Cancelling `cancel` interrupts the settle delays and streaming; the
    /// channel is still left before this returns.
    pub async fn play(
        &self,
        request: &PlaybackRequest,
        cancel: &CancellationToken,
    ) -> Result<DeliveryStats, PlaybackError> {
        let guild = &request.guild_id;
        let _permit = self
            .locks
            .try_acquire(guild)
            .ok_or(PlaybackError::GuildBusy)?;

        let channel = self
            .directory
            .voice_channel_of(guild, &request.requester.id)
            .await
            .ok_or_else(|| PlaybackError::UserNotInVoice {
                username: request.requester.username.clone(),
            })?;

        let connection = tokio::select! {
            joined = self.transport.join(guild, &channel) => joined?,
            _ = cancel.cancelled() => return Err(PlaybackError::Cancelled),
        };
        info!(
            request = %request.id,
            %guild,
            channel = %channel,
            user = %request.requester.username,
            "Joined voice channel for playback"
        );

        let result = self.stream(request, connection.as_ref(), cancel).await;

        if !settle(self.leave_settle, cancel).await {
            debug!(request = %request.id, "Leave delay cut short by shutdown");
        }
        connection.disconnect().await;

        match &result {
            Ok(stats) => info!(
                request = %request.id,
                query = %request.query,
                frames = stats.frames,
                bytes = stats.bytes,
                "Playback finished"
            ),
            Err(e) => debug!(request = %request.id, %e, "Playback ended early"),
        }
        result
    }

    async fn stream(
        &self,
        request: &PlaybackRequest,
        connection: &dyn VoiceConnection,
        cancel: &CancellationToken,
    ) -> Result<DeliveryStats, PlaybackError> {
        if !settle(self.join_settle, cancel).await {
            return Err(PlaybackError::Cancelled);
        }

        let source = tokio::select! {
            source = self.sources.lookup(&request.query) => source?,
            _ = cancel.cancelled() => return Err(PlaybackError::Cancelled),
        };
        debug!(request = %request.id, provider = self.sources.name(), "Audio source opened");

        let mut process = self.transcoder.start(source)?;
        let Some(frames) = process.frames() else {
            process.shutdown().await;
            return Err(ProcessStartError::MissingPipe {
                program: "transcoder".into(),
                pipe: "stdout",
            }
            .into());
        };

        let delivered = tokio::select! {
            result = deliver(frames, connection) => result.map_err(PlaybackError::from),
            _ = cancel.cancelled() => Err(PlaybackError::Cancelled),
        };

        match delivered {
            Ok(stats) => {
                if let Err(e) = process.wait().await {
                    warn!(request = %request.id, %e, "Transcoder exited abnormally");
                }
                Ok(stats)
            }
            Err(e) => {
                process.shutdown().await;
                Err(e)
            }
        }
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` if cancelled.
async fn settle(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
