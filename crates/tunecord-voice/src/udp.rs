//! UDP voice transport sending one datagram per packet at a fixed cadence.
//!
//! ```text
//! deliver() --send--> mpsc (bounded) --> pump task --tick--> UdpSocket::send
//! ```
//!
//! The pump emits at most one packet per `frame_interval`, so a full channel
//! blocks the delivery loop and paces it to real time.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use tunecord_core::config::{PlaybackConfig, VoiceConfig};
use tunecord_core::types::{ChannelId, GuildId};

use crate::{JoinError, PacketSink, VoiceConnection, VoiceTransport};

/// Joins by opening a UDP socket towards a fixed endpoint.
#[derive(Debug, Clone)]
pub struct UdpVoiceTransport {
    endpoint: SocketAddr,
    frame_interval: Duration,
    buffer: usize,
}

impl UdpVoiceTransport {
    pub fn new(endpoint: SocketAddr, frame_interval: Duration, buffer: usize) -> Self {
        Self {
            endpoint,
            frame_interval,
            buffer: buffer.max(1),
        }
    }

    pub fn from_config(voice: &VoiceConfig, playback: &PlaybackConfig) -> Result<Self, JoinError> {
        let endpoint = voice.endpoint.parse().map_err(|_| {
            JoinError::Rejected(format!("invalid voice endpoint: {}", voice.endpoint))
        })?;
        Ok(Self::new(
            endpoint,
            Duration::from_millis(voice.frame_interval_ms.max(1)),
            playback.packet_buffer,
        ))
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    fn bind_addr(&self) -> SocketAddr {
        if self.endpoint.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        }
    }
}

#[async_trait]
impl VoiceTransport for UdpVoiceTransport {
    async fn join(
        &self,
        guild: &GuildId,
        channel: &ChannelId,
    ) -> Result<Box<dyn VoiceConnection>, JoinError> {
        let connect_err = |source| JoinError::Connect {
            guild: guild.clone(),
            channel: channel.clone(),
            source,
        };

        let socket = UdpSocket::bind(self.bind_addr()).await.map_err(connect_err)?;
        socket.connect(self.endpoint).await.map_err(connect_err)?;

        let (tx, rx) = mpsc::channel::<Bytes>(self.buffer);
        let pump = tokio::spawn(pump(socket, rx, self.frame_interval));

        info!(%guild, %channel, endpoint = %self.endpoint, "Joined voice channel");

        Ok(Box::new(UdpVoiceConnection {
            guild: guild.clone(),
            channel: channel.clone(),
            speaking: AtomicBool::new(false),
            tx,
            pump,
        }))
    }
}

async fn pump(socket: UdpSocket, mut rx: mpsc::Receiver<Bytes>, interval: Duration) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sent = 0u64;
    let mut failures = 0u64;
    while let Some(packet) = rx.recv().await {
        ticker.tick().await;
        match socket.send(&packet).await {
            Ok(n) => {
                sent += 1;
                trace!(bytes = n, "Voice packet sent");
            }
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    warn!(%e, "Voice packet send failed");
                } else {
                    debug!(%e, failures, "Voice packet send failed");
                }
            }
        }
    }
    sent
}

struct UdpVoiceConnection {
    guild: GuildId,
    channel: ChannelId,
    speaking: AtomicBool,
    tx: PacketSink,
    pump: JoinHandle<u64>,
}

#[async_trait]
impl VoiceConnection for UdpVoiceConnection {
    fn guild_id(&self) -> &GuildId {
        &self.guild
    }

    fn channel_id(&self) -> &ChannelId {
        &self.channel
    }

    fn set_speaking(&self, speaking: bool) {
        let was = self.speaking.swap(speaking, Ordering::SeqCst);
        if was != speaking {
            debug!(guild = %self.guild, channel = %self.channel, speaking, "Speaking changed");
        }
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn packet_sink(&self) -> PacketSink {
        self.tx.clone()
    }

    async fn disconnect(self: Box<Self>) {
        let UdpVoiceConnection {
            guild,
            channel,
            tx,
            pump,
            ..
        } = *self;

        // Closing the sink lets the pump flush what is queued and stop.
        drop(tx);
        match pump.await {
            Ok(sent) => info!(%guild, %channel, packets = sent, "Left voice channel"),
            Err(e) => warn!(%guild, %channel, %e, "Voice pump task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use bytes::BytesMut;
    use tokio_util::codec::Encoder;
    use tunecord_media::{FrameCodec, FrameReader};

    use crate::delivery::deliver;

    fn encode_frames(payloads: &[Vec<u8>]) -> BytesMut {
        let mut buf = BytesMut::new();
        for payload in payloads {
            FrameCodec
                .encode(Bytes::from(payload.clone()), &mut buf)
                .unwrap();
        }
        buf
    }

    async fn receiver() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    #[tokio::test]
    async fn test_join_deliver_disconnect() {
        let (rx_socket, addr) = receiver().await;
        let transport = UdpVoiceTransport::new(addr, Duration::from_millis(1), 2);

        let connection = transport
            .join(&"g1".into(), &"vc1".into())
            .await
            .unwrap();
        assert_eq!(connection.channel_id().as_str(), "vc1");
        assert!(!connection.is_speaking());

        let payloads: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i; 8]).collect();
        let frames = FrameReader::new(Cursor::new(encode_frames(&payloads).to_vec()));

        let stats = deliver(frames, connection.as_ref()).await.unwrap();
        assert_eq!(stats.frames, 5);
        assert!(!connection.is_speaking());
        connection.disconnect().await;

        let mut buf = [0u8; 64];
        for expected in &payloads {
            let n = tokio::time::timeout(Duration::from_secs(2), rx_socket.recv(&mut buf))
                .await
                .expect("datagram should arrive")
                .unwrap();
            assert_eq!(&buf[..n], expected.as_slice());
        }
    }

    #[tokio::test]
    async fn test_pump_paces_packets() {
        let (rx_socket, addr) = receiver().await;
        let transport = UdpVoiceTransport::new(addr, Duration::from_millis(20), 1);
        let connection = transport.join(&"g".into(), &"c".into()).await.unwrap();

        let sink = connection.packet_sink();
        let start = tokio::time::Instant::now();
        for i in 0..4u8 {
            sink.send(Bytes::from(vec![i])).await.unwrap();
        }
        drop(sink);
        connection.disconnect().await;

        // First tick is immediate, the remaining three wait one interval each.
        assert!(start.elapsed() >= Duration::from_millis(55));

        let mut buf = [0u8; 8];
        for i in 0..4u8 {
            let n = rx_socket.recv(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], &[i]);
        }
    }

    #[test]
    fn test_from_config_rejects_bad_endpoint() {
        let voice = VoiceConfig {
            endpoint: "nowhere".into(),
            ..VoiceConfig::default()
        };
        let err = UdpVoiceTransport::from_config(&voice, &PlaybackConfig::default()).unwrap_err();
        assert!(matches!(err, JoinError::Rejected(_)));
    }
}
