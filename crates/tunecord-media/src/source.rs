//! Audio sources: turn a free-text query into a readable byte stream.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

/// An opened, sequential stream of encoded audio. Readable once.
pub type AudioSource = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("empty search query")]
    EmptyQuery,

    #[error("no audio found for \"{query}\"")]
    NotFound { query: String },

    #[error("failed to run `{program}`: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Resolves a query to an audio stream.
#[async_trait]
pub trait AudioSourceProvider: Send + Sync + 'static {
    /// Provider name for logs.
    fn name(&self) -> &str;

    async fn lookup(&self, query: &str) -> Result<AudioSource, LookupError>;
}

/// Streams the best audio match from yt-dlp's stdout.
pub struct YtDlpProvider {
    program: String,
}

impl YtDlpProvider {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// URLs are passed through; anything else becomes a single-result search.
    fn target(query: &str) -> String {
        if query.starts_with("https://") || query.starts_with("http://") {
            query.to_string()
        } else {
            format!("ytsearch1:{query}")
        }
    }

    fn args(query: &str) -> Vec<String> {
        vec![
            "-f".into(),
            "bestaudio".into(),
            "--no-playlist".into(),
            "--quiet".into(),
            "-o".into(),
            "-".into(),
            Self::target(query),
        ]
    }
}

impl Default for YtDlpProvider {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl AudioSourceProvider for YtDlpProvider {
    fn name(&self) -> &str {
        "ytdlp"
    }

    async fn lookup(&self, query: &str) -> Result<AudioSource, LookupError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LookupError::EmptyQuery);
        }

        let mut child = Command::new(&self.program)
            .args(Self::args(query))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LookupError::Unavailable {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| LookupError::Unavailable {
            program: self.program.clone(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "no stdout pipe"),
        })?;

        // A search without results produces no bytes at all.
        let mut stdout = BufReader::new(stdout);
        if stdout.fill_buf().await?.is_empty() {
            let status = child.wait().await?;
            debug!(query, %status, "yt-dlp produced no audio");
            return Err(LookupError::NotFound {
                query: query.to_string(),
            });
        }

        info!(query, "Streaming audio from yt-dlp");
        Ok(Box::new(ChildStream {
            _child: child,
            stdout,
        }))
    }
}

/// Keeps the producing process alive for as long as its output is read.
struct ChildStream {
    _child: Child,
    stdout: BufReader<ChildStdout>,
}

impl AsyncRead for ChildStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

/// Plays files from a local music directory.
///
/// A query matches a file with exactly that name, or else the first file (by
/// name) whose stem contains the query, case-insensitively.
pub struct LocalFileProvider {
    dir: PathBuf,
}

impl LocalFileProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn resolve(&self, query: &str) -> Result<Option<PathBuf>, LookupError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        if let Some(exact) = files
            .iter()
            .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(query))
        {
            return Ok(Some(exact.clone()));
        }

        let needle = query.to_lowercase();
        Ok(files.into_iter().find(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.to_lowercase().contains(&needle))
        }))
    }
}

#[async_trait]
impl AudioSourceProvider for LocalFileProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn lookup(&self, query: &str) -> Result<AudioSource, LookupError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LookupError::EmptyQuery);
        }

        let path = self
            .resolve(query)
            .await?
            .ok_or_else(|| LookupError::NotFound {
                query: query.to_string(),
            })?;

        info!(query, path = %path.display(), "Streaming local file");
        let file = tokio::fs::File::open(&path).await?;
        Ok(Box::new(file))
    }
}
