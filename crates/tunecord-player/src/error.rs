use thiserror::Error;

use tunecord_media::{LookupError, ProcessStartError};
use tunecord_voice::{DeliveryError, JoinError};

/// Why a playback request did not complete.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("user {username} is not in a voice channel")]
    UserNotInVoice { username: String },

    #[error("a playback is already active in this guild")]
    GuildBusy,

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    ProcessStart(#[from] ProcessStartError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("playback cancelled by shutdown")]
    Cancelled,
}

impl PlaybackError {
    /// The chat reply for this failure. `None` when nothing should be said.
    pub fn user_message(&self) -> Option<String> {
        let message = match self {
            Self::UserNotInVoice { username } => {
                format!("User {username} is not in a voice channel.")
            }
            Self::GuildBusy => "Already playing in this guild.".into(),
            Self::Join(_) => "Failed to connect to the voice chat".into(),
            Self::Lookup(LookupError::EmptyQuery) => "Nothing to search for.".into(),
            Self::Lookup(LookupError::NotFound { query }) => {
                format!("No audio found for \"{query}\".")
            }
            Self::Lookup(_) => "Failed to look up that song".into(),
            Self::ProcessStart(_) | Self::Delivery(_) => {
                "Failed to send audio to the voice chat".into()
            }
            Self::Cancelled => return None,
        };
        Some(message)
    }

    /// Caused by what the user asked for rather than by the bot.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::UserNotInVoice { .. }
                | Self::GuildBusy
                | Self::Lookup(LookupError::EmptyQuery | LookupError::NotFound { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    use tunecord_media::FrameReadError;

    #[test]
    fn test_user_messages() {
        let err = PlaybackError::UserNotInVoice {
            username: "alice".into(),
        };
        assert_eq!(
            err.user_message().as_deref(),
            Some("User alice is not in a voice channel.")
        );
        assert!(err.is_user_error());

        let err = PlaybackError::from(JoinError::Rejected("nope".into()));
        assert_eq!(
            err.user_message().as_deref(),
            Some("Failed to connect to the voice chat")
        );
        assert!(!err.is_user_error());

        let err = PlaybackError::from(DeliveryError::from(FrameReadError::from(
            io::Error::other("boom"),
        )));
        assert_eq!(
            err.user_message().as_deref(),
            Some("Failed to send audio to the voice chat")
        );

        assert_eq!(
            PlaybackError::GuildBusy.user_message().as_deref(),
            Some("Already playing in this guild.")
        );
        assert!(PlaybackError::Cancelled.user_message().is_none());
    }

    #[test]
    fn test_not_found_is_user_error() {
        let err = PlaybackError::from(LookupError::NotFound {
            query: "zzz".into(),
        });
        assert!(err.is_user_error());
        assert_eq!(err.user_message().as_deref(), Some("No audio found for \"zzz\"."));
    }
}
