//! One active playback per guild.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tunecord_core::types::GuildId;

#[derive(Clone, Default)]
pub struct GuildLocks {
    active: Arc<Mutex<HashSet<GuildId>>>,
}

impl GuildLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `guild`. `None` if another playback holds it.
    pub fn try_acquire(&self, guild: &GuildId) -> Option<GuildPermit> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(guild.clone()) {
            return None;
        }
        Some(GuildPermit {
            guild: guild.clone(),
            active: self.active.clone(),
        })
    }

    pub fn is_active(&self, guild: &GuildId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(guild)
    }
}

/// Releases the guild when dropped.
#[must_use]
pub struct GuildPermit {
    guild: GuildId,
    active: Arc<Mutex<HashSet<GuildId>>>,
}

impl Drop for GuildPermit {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.guild);
    }
}
