//! Playback orchestration and command dispatch.
//!
//! [`Player`] runs one playback request end to end: resolve the requester's
//! voice channel, join, stream through the transcoder, leave. [`Dispatcher`]
//! turns inbound chat messages into commands and runs each playback on its
//! own tracked task.

pub mod dispatcher;
pub mod error;
pub mod guild_lock;
pub mod player;

pub use dispatcher::Dispatcher;
pub use error::PlaybackError;
pub use guild_lock::{GuildLocks, GuildPermit};
pub use player::{Player, source_provider};
