use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Guild (server) identifier.
    GuildId
);
string_id!(
    /// Text or voice channel identifier.
    ChannelId
);
string_id!(
    /// User identifier.
    UserId
);

/// Author of an inbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

/// Inbound chat message from a text channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author: Author,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        author: Author,
        content: impl Into<String>,
    ) -> Self {
        Self {
            guild_id,
            channel_id,
            author,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One user-initiated request to play audio found by a search term.
///
/// Threads through the orchestrator, transcoder, and delivery loop; never
/// persisted. `id` only correlates log lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackRequest {
    pub id: Uuid,
    pub query: String,
    pub requester: Author,
    pub text_channel: ChannelId,
    pub guild_id: GuildId,
}

impl PlaybackRequest {
    pub fn new(
        query: impl Into<String>,
        requester: Author,
        text_channel: ChannelId,
        guild_id: GuildId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            requester,
            text_channel,
            guild_id,
        }
    }

    /// Build a request from the message that carried the `play` command.
    pub fn from_message(message: &InboundMessage, query: impl Into<String>) -> Self {
        Self::new(
            query,
            message.author.clone(),
            message.channel_id.clone(),
            message.guild_id.clone(),
        )
    }
}
