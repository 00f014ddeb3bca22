//! Length-prefixed frame protocol read from the transcoder's stdout.
//!
//! ```text
//! +--------+--------+----...----+
//! | length (u16 LE) | payload   |
//! +--------+--------+----...----+
//! ```
//!
//! The stream ends when a length field cannot be fully read. A payload cut
//! short by end of stream is a truncated final frame: it is dropped and the
//! sequence ends without an error.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::stream::{FusedStream, Stream, StreamExt};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, Encoder, FramedRead};
use tracing::{debug, trace};

/// Size of the length field in bytes.
pub const LENGTH_FIELD_SIZE: usize = 2;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// One chunk of transcoded audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// A read failure other than end of stream.
#[derive(Debug, Error)]
#[error("failed to read audio frame: {source}")]
pub struct FrameReadError {
    #[from]
    source: io::Error,
}

impl FrameReadError {
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

/// tokio-util codec for `[u16 LE length][payload]` frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let length = u16::from_le_bytes([src[0], src[1]]) as usize;

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length).freeze();

        Ok(Some(Frame { payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!(remaining = src.len(), "Dropping truncated final frame");
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame payload too large: {} bytes (max {MAX_PAYLOAD_SIZE})",
                    payload.len()
                ),
            ));
        }

        dst.reserve(LENGTH_FIELD_SIZE + payload.len());
        dst.put_u16_le(payload.len() as u16);
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<Bytes>>::encode(self, frame.payload, dst)
    }
}

/// Single forward pass over a one-shot byte stream, yielding frames in order.
///
/// Once the sequence has ended or failed, the reader yields nothing and does
/// not poll the underlying stream again.
pub struct FrameReader<R> {
    inner: FramedRead<R, FrameCodec>,
    finished: bool,
    frames_read: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, FrameCodec),
            finished: false,
            frames_read: 0,
        }
    }

    /// Next frame, `Ok(None)` at end of stream.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, FrameReadError> {
        self.next().await.transpose()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: AsyncRead + Unpin> Stream for FrameReader<R> {
    type Item = Result<Frame, FrameReadError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
            Some(Ok(frame)) => {
                this.frames_read += 1;
                trace!(len = frame.len(), "Read frame");
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                this.finished = true;
                debug!(frames = this.frames_read, "Frame stream ended early");
                Poll::Ready(None)
            }
            Some(Err(e)) => {
                this.finished = true;
                Poll::Ready(Some(Err(FrameReadError::from(e))))
            }
            None => {
                this.finished = true;
                debug!(frames = this.frames_read, "Frame stream ended");
                Poll::Ready(None)
            }
        }
    }
}

impl<R: AsyncRead + Unpin> FusedStream for FrameReader<R> {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{AsyncReadExt, ReadBuf};

    fn encode_all(payloads: &[Vec<u8>]) -> Vec<u8> {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for payload in payloads {
            codec
                .encode(Bytes::from(payload.clone()), &mut buf)
                .unwrap();
        }
        buf.to_vec()
    }

    async fn read_all<R: AsyncRead + Unpin>(
        reader: &mut FrameReader<R>,
    ) -> Result<Vec<Vec<u8>>, FrameReadError> {
        let mut out = Vec::new();
        while let Some(frame) = reader.next_frame().await? {
            out.push(frame.payload().to_vec());
        }
        Ok(out)
    }

    /// Fails every read with a non-EOF error.
    struct BrokenPipe;

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke")))
        }
    }

    /// Serves its data, reports EOF once, and panics if read again.
    struct OneShot {
        data: Option<Vec<u8>>,
        eof_reported: bool,
    }

    impl AsyncRead for OneShot {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            if let Some(data) = this.data.take() {
                buf.put_slice(&data);
                return Poll::Ready(Ok(()));
            }
            assert!(!this.eof_reported, "read past end of stream");
            this.eof_reported = true;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_ten_four_byte_frames() {
        let payloads: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i, i + 1, i + 2, i + 3]).collect();
        let mut reader = FrameReader::new(Cursor::new(encode_all(&payloads)));

        let decoded = read_all(&mut reader).await.unwrap();
        assert_eq!(decoded, payloads);
        assert_eq!(reader.frames_read(), 10);
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_varied_lengths() {
        let payloads = vec![
            vec![],
            vec![7u8],
            vec![1u8; 3840],
            vec![0xAB; MAX_PAYLOAD_SIZE],
            vec![2u8; 257],
        ];
        let mut reader = FrameReader::new(Cursor::new(encode_all(&payloads)));
        assert_eq!(read_all(&mut reader).await.unwrap(), payloads);
    }

    #[tokio::test]
    async fn test_length_is_little_endian() {
        let mut bytes = vec![0x03, 0x00];
        bytes.extend_from_slice(b"abc");
        bytes.extend_from_slice(&[0x00, 0x01]);
        bytes.extend_from_slice(&[9u8; 256]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let first = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(first.payload().as_ref(), b"abc");
        let second = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(second.len(), 256);
    }

    #[tokio::test]
    async fn test_empty_stream_ends_silently() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        assert!(reader.next_frame().await.unwrap().is_none());
        assert_eq!(reader.frames_read(), 0);
    }

    #[tokio::test]
    async fn test_truncated_payload_ends_at_last_full_frame() {
        let payloads = vec![vec![1u8; 4], vec![2u8; 4], vec![3u8; 4]];
        let mut bytes = encode_all(&payloads);
        bytes.truncate(bytes.len() - 2);

        let mut reader = FrameReader::new(OneShot {
            data: Some(bytes),
            eof_reported: false,
        });
        assert_eq!(read_all(&mut reader).await.unwrap(), payloads[..2].to_vec());
        // Further polls must not touch the exhausted stream.
        assert!(reader.next_frame().await.unwrap().is_none());
        assert!(reader.is_terminated());
    }

    #[tokio::test]
    async fn test_partial_length_field_ends_silently() {
        let mut bytes = encode_all(&[vec![5u8; 4]]);
        bytes.push(0x04);
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert_eq!(read_all(&mut reader).await.unwrap(), vec![vec![5u8; 4]]);
    }

    #[tokio::test]
    async fn test_read_failure_surfaces_error_and_stops() {
        let good = encode_all(&[vec![1u8; 4]]);
        let mut reader = FrameReader::new(AsyncReadExt::chain(Cursor::new(good), BrokenPipe));

        let first = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(first.payload().as_ref(), &[1u8; 4]);

        let err = reader.next_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        // Not restartable.
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let result = codec.encode(Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]), &mut buf);
        assert!(result.is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x04, 0x00, 1, 2][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[3, 4]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload().as_ref(), &[1, 2, 3, 4]);
        assert!(buf.is_empty());
    }
}
