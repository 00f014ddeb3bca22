//! External transcoder process: spawn, pipe wiring, wait and cleanup.
//!
//! The audio source is pumped into the child's stdin by a dedicated task and
//! stdin is closed once the source is exhausted. stdout is handed out as a
//! [`FrameReader`]. stderr is drained into the log. The child is spawned with
//! `kill_on_drop`, so dropping a [`TranscoderProcess`] on any path reaps it.

use std::io;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tunecord_core::config::TranscoderConfig;

use crate::frame::{Frame, FrameReadError, FrameReader};
use crate::source::AudioSource;

#[derive(Debug, Error)]
pub enum ProcessStartError {
    #[error("failed to launch transcoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("transcoder `{program}` has no {pipe} pipe")]
    MissingPipe { program: String, pipe: &'static str },
}

#[derive(Debug, Error)]
pub enum ProcessExitError {
    #[error("transcoder `{program}` exited with {status}")]
    Status { program: String, status: ExitStatus },

    #[error("failed to wait for transcoder `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Frames produced by a running transcoder.
pub type FrameStream = BoxStream<'static, Result<Frame, FrameReadError>>;

/// Starts transcoders for audio sources.
pub trait Transcoder: Send + Sync + 'static {
    fn start(&self, source: AudioSource) -> Result<Box<dyn TranscoderRun>, ProcessStartError>;
}

/// One running transcoder.
#[async_trait]
pub trait TranscoderRun: Send {
    /// The output frames. `None` after the first call.
    fn frames(&mut self) -> Option<FrameStream>;

    /// Wait for exit after the frames have been drained.
    async fn wait(self: Box<Self>) -> Result<(), ProcessExitError>;

    /// Stop early and release everything.
    async fn shutdown(self: Box<Self>);
}

/// Runs the configured external program per source.
#[derive(Debug, Clone)]
pub struct ProcessTranscoder {
    config: TranscoderConfig,
}

impl ProcessTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }
}

impl Transcoder for ProcessTranscoder {
    fn start(&self, source: AudioSource) -> Result<Box<dyn TranscoderRun>, ProcessStartError> {
        Ok(Box::new(TranscoderProcess::start(&self.config, source)?))
    }
}

#[async_trait]
impl TranscoderRun for TranscoderProcess {
    fn frames(&mut self) -> Option<FrameStream> {
        TranscoderProcess::frames(self).map(StreamExt::boxed)
    }

    async fn wait(self: Box<Self>) -> Result<(), ProcessExitError> {
        TranscoderProcess::wait(*self).await
    }

    async fn shutdown(self: Box<Self>) {
        TranscoderProcess::shutdown(*self).await
    }
}

/// A running transcoder, owned by exactly one playback request.
pub struct TranscoderProcess {
    program: String,
    child: Child,
    stdout: Option<ChildStdout>,
    feeder: JoinHandle<io::Result<u64>>,
    stderr_drain: Option<JoinHandle<()>>,
}

impl TranscoderProcess {
    /// Spawn the configured transcoder with `source` wired to its stdin.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &TranscoderConfig,
        mut source: AudioSource,
    ) -> Result<Self, ProcessStartError> {
        let program = config.program.clone();

        let mut child = Command::new(&program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessStartError::Spawn {
                program: program.clone(),
                source,
            })?;

        let missing = |pipe| ProcessStartError::MissingPipe {
            program: program.clone(),
            pipe,
        };
        let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        let feeder = tokio::spawn(async move {
            let copied = tokio::io::copy(&mut source, &mut stdin).await;
            // Dropping stdin closes the pipe so the transcoder sees EOF.
            drop(stdin);
            copied
        });

        let stderr_drain = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(program.clone(), stderr)));

        info!(program = %program, pid = ?child.id(), "Transcoder started");

        Ok(Self {
            program,
            child,
            stdout: Some(stdout),
            feeder,
            stderr_drain,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The transcoder's output as a frame sequence. Yields `None` after the
    /// first call.
    pub fn frames(&mut self) -> Option<FrameReader<ChildStdout>> {
        self.stdout.take().map(FrameReader::new)
    }

    /// Wait for the process to exit once its output has been drained.
    pub async fn wait(mut self) -> Result<(), ProcessExitError> {
        // An undrained stdout would keep the child blocked on write.
        self.stdout.take();

        let status = self.child.wait().await;
        self.finish_tasks().await;

        let status = status.map_err(|source| ProcessExitError::Wait {
            program: self.program.clone(),
            source,
        })?;

        if status.success() {
            debug!(program = %self.program, "Transcoder exited cleanly");
            Ok(())
        } else {
            Err(ProcessExitError::Status {
                program: self.program,
                status,
            })
        }
    }

    /// Kill the process and release its pipes.
    pub async fn shutdown(mut self) {
        self.stdout.take();
        if let Some(drain) = self.stderr_drain.take() {
            drain.abort();
        }
        if let Err(e) = self.child.kill().await {
            // Already exited.
            debug!(program = %self.program, %e, "Transcoder kill failed");
        }
        self.finish_tasks().await;
        debug!(program = %self.program, "Transcoder shut down");
    }

    /// Reap the feeder once the child is gone. A source that stalls must not
    /// hold up teardown, so an unfinished feeder is aborted.
    async fn finish_tasks(&mut self) {
        self.feeder.abort();
        match (&mut self.feeder).await {
            Ok(Ok(bytes)) => debug!(program = %self.program, bytes, "Audio source fully fed"),
            Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(program = %self.program, "Transcoder closed stdin early")
            }
            Ok(Err(e)) => warn!(program = %self.program, %e, "Feeding audio source failed"),
            Err(e) if e.is_cancelled() => {
                debug!(program = %self.program, "Feeding stopped before the source ended")
            }
            Err(e) => warn!(program = %self.program, %e, "Feeder task failed"),
        }
    }
}

/// Log stderr until EOF. The pipe must stay open for as long as the child
/// runs: a closed read end kills it with SIGPIPE on its next write. Lines
/// need not be UTF-8.
async fn drain_stderr(program: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if !text.is_empty() {
                    debug!(program = %program, "{text}");
                }
            }
            Err(e) => {
                debug!(program = %program, %e, "Transcoder stderr read failed");
                break;
            }
        }
    }
}
