//! Voice transport abstraction and the frame delivery loop.
//!
//! A [`VoiceTransport`] joins a voice channel and hands back a
//! [`VoiceConnection`]: a speaking flag plus a bounded outbound packet sink.
//! [`delivery::deliver`] drains a frame sequence into that sink.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use tunecord_core::types::{ChannelId, GuildId};

pub mod delivery;
pub mod directory;
pub mod udp;

pub use delivery::{DeliveryError, DeliveryStats, deliver};
pub use directory::{StaticVoiceDirectory, VoiceDirectory};
pub use udp::UdpVoiceTransport;

/// Outbound voice packets. Sends wait while the transport's buffer is full.
pub type PacketSink = mpsc::Sender<Bytes>;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("failed to join voice channel {channel} in guild {guild}: {source}")]
    Connect {
        guild: GuildId,
        channel: ChannelId,
        #[source]
        source: io::Error,
    },

    #[error("voice join rejected: {0}")]
    Rejected(String),
}

/// Establishes voice connections.
#[async_trait]
pub trait VoiceTransport: Send + Sync + 'static {
    async fn join(
        &self,
        guild: &GuildId,
        channel: &ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, JoinError>;
}

/// A joined voice channel.
///
/// Only the task that joined it touches a connection, so implementations need
/// no cross-task coordination for the speaking flag.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn guild_id(&self) -> &GuildId;

    fn channel_id(&self) -> &ChannelId;

    fn set_speaking(&self, speaking: bool);

    fn is_speaking(&self) -> bool;

    fn packet_sink(&self) -> PacketSink;

    /// Leave the channel. Consumes the connection so it happens once.
    async fn disconnect(self: Box<Self>);
}
