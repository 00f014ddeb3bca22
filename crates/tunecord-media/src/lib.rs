//! Media pipeline: frame codec, transcoder process and audio sources.

pub mod frame;
pub mod source;
pub mod transcoder;

pub use frame::{Frame, FrameCodec, FrameReadError, FrameReader};
pub use source::{AudioSource, AudioSourceProvider, LocalFileProvider, LookupError, YtDlpProvider};
pub use transcoder::{
    FrameStream, ProcessExitError, ProcessStartError, ProcessTranscoder, Transcoder,
    TranscoderProcess, TranscoderRun,
};
