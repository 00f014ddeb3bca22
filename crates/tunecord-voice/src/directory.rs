//! Which voice channel a user is currently in.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use tunecord_core::types::{ChannelId, GuildId, UserId};

#[async_trait]
pub trait VoiceDirectory: Send + Sync + 'static {
    /// The voice channel `user` is connected to in `guild`, if any.
    async fn voice_channel_of(&self, guild: &GuildId, user: &UserId) -> Option<ChannelId>;
}

/// User-to-channel map, the same in every guild.
#[derive(Default)]
pub struct StaticVoiceDirectory {
    channels: RwLock<HashMap<UserId, ChannelId>>,
}

impl StaticVoiceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(channels: &HashMap<String, String>) -> Self {
        let channels = channels
            .iter()
            .map(|(user, channel)| (UserId::new(user.as_str()), ChannelId::new(channel.as_str())))
            .collect();
        Self {
            channels: RwLock::new(channels),
        }
    }

    pub fn with_channel(self, user: impl Into<UserId>, channel: impl Into<ChannelId>) -> Self {
        self.set(user.into(), channel.into());
        self
    }

    pub fn set(&self, user: UserId, channel: ChannelId) {
        self.channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user, channel);
    }

    pub fn remove(&self, user: &UserId) -> Option<ChannelId> {
        self.channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user)
    }
}

#[async_trait]
impl VoiceDirectory for StaticVoiceDirectory {
    async fn voice_channel_of(&self, _guild: &GuildId, user: &UserId) -> Option<ChannelId> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_mapped_user() {
        let mut map = HashMap::new();
        map.insert("u1".to_string(), "vc-1".to_string());
        let directory = StaticVoiceDirectory::from_map(&map);

        let guild = GuildId::new("g");
        assert_eq!(
            directory.voice_channel_of(&guild, &"u1".into()).await,
            Some(ChannelId::new("vc-1"))
        );
        assert_eq!(directory.voice_channel_of(&guild, &"u2".into()).await, None);
    }

    #[tokio::test]
    async fn test_set_and_remove() {
        let directory = StaticVoiceDirectory::new().with_channel("u1", "vc-1");
        let guild = GuildId::new("g");
        assert!(directory.voice_channel_of(&guild, &"u1".into()).await.is_some());

        assert_eq!(directory.remove(&"u1".into()), Some(ChannelId::new("vc-1")));
        assert!(directory.voice_channel_of(&guild, &"u1".into()).await.is_none());
    }
}
