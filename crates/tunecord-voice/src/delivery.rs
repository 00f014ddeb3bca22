//! Voice delivery loop. Frames in, packets out, speaking set for the duration.

use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use tunecord_media::{Frame, FrameReadError};

use crate::VoiceConnection;

/// Totals for one completed delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub frames: u64,
    pub bytes: u64,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Frame(#[from] FrameReadError),

    #[error("voice packet sink closed after {frames_sent} frames")]
    Aborted { frames_sent: u64 },
}

/// Clears the speaking flag when dropped, so it is released even if the
/// delivery future is cancelled mid-stream.
struct SpeakingGuard<'a> {
    connection: &'a dyn VoiceConnection,
}

impl<'a> SpeakingGuard<'a> {
    fn engage(connection: &'a dyn VoiceConnection) -> Self {
        connection.set_speaking(true);
        Self { connection }
    }
}

impl Drop for SpeakingGuard<'_> {
    fn drop(&mut self) {
        self.connection.set_speaking(false);
    }
}

/// Forward every frame, in order, as one packet on the connection's sink.
///
/// Speaking is set before the first frame and cleared on every exit path. A
/// frame read error or a closed sink stops the loop; nothing is retried.
pub async fn deliver<S>(
    mut frames: S,
    connection: &dyn VoiceConnection,
) -> Result<DeliveryStats, DeliveryError>
where
    S: Stream<Item = Result<Frame, FrameReadError>> + Unpin,
{
    let sink = connection.packet_sink();
    let _speaking = SpeakingGuard::engage(connection);
    let mut stats = DeliveryStats::default();

    while let Some(frame) = frames.next().await {
        let frame = frame?;
        let len = frame.len() as u64;

        if sink.send(frame.into_payload()).await.is_err() {
            warn!(
                guild = %connection.guild_id(),
                frames_sent = stats.frames,
                "Voice sink closed, aborting delivery"
            );
            return Err(DeliveryError::Aborted {
                frames_sent: stats.frames,
            });
        }

        stats.frames += 1;
        stats.bytes += len;
    }

    debug!(
        guild = %connection.guild_id(),
        frames = stats.frames,
        bytes = stats.bytes,
        "Delivery complete"
    );
    Ok(stats)
}
