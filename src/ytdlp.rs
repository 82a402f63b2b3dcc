#![forbid(unsafe_code)]

//! Wrapper around the `yt-dlp` binary.
//!
//! Two invocations are used: a metadata dump (`--dump-single-json`) that the
//! resolver parses, and a streaming run (`-o -`) whose stdout is relayed to
//! the client. Children are spawned with `kill_on_drop`, so a timeout or a
//! dropped response body terminates the process.

use crate::config::RuntimeConfig;
use crate::error::Error;
use axum::body::Bytes;
use futures::{
    Stream, StreamExt, future,
    stream::{self, BoxStream},
};
use serde::{Deserialize, Deserializer};
use std::{
    io,
    path::PathBuf,
    pin::Pin,
    process::{ExitStatus, Stdio},
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Phrases yt-dlp uses when a site wants a logged-in session or a CAPTCHA.
/// This is a wording heuristic; unmatched walls surface as generic failures.
const LOGIN_WALL_PHRASES: &[&str] = &["sign in", "captcha", "cookie", "login required", "log in"];

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("launching {binary}: {source}")]
    Launch {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("yt-dlp timed out after {0:?}")]
    Timeout(Duration),
    #[error("yt-dlp exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("parsing yt-dlp output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("yt-dlp stdout was not captured")]
    MissingStdout,
}

impl ToolError {
    /// Maps the failure onto the resolver taxonomy.
    pub fn classify(&self) -> Error {
        match self {
            Self::Failed { stderr, .. } if mentions_login_wall(stderr) => {
                Error::LoginRequired(stderr.lines().last().unwrap_or_default().to_string())
            }
            other => Error::upstream(other.to_string()),
        }
    }
}

/// True when tool output reads like a sign-in, CAPTCHA or cookie wall.
pub fn mentions_login_wall(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    LOGIN_WALL_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

/// Subset of the `--dump-single-json` document the resolver reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub thumbnails: Vec<ToolThumbnail>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub formats: Vec<ToolFormat>,
    /// Top-level fields describing the format yt-dlp would pick by itself.
    #[serde(flatten)]
    pub selected: ToolFormat,
}

impl ToolInfo {
    /// `thumbnail`, else the most preferred entry of `thumbnails` (yt-dlp
    /// sorts them by ascending preference).
    pub fn best_thumbnail(&self) -> Option<&str> {
        self.thumbnail
            .as_deref()
            .filter(|value| !value.is_empty())
            .or_else(|| {
                self.thumbnails
                    .iter()
                    .rev()
                    .find_map(|thumb| thumb.url.as_deref().filter(|url| !url.is_empty()))
            })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolThumbnail {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolFormat {
    pub url: Option<String>,
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u32>,
    pub resolution: Option<String>,
    pub format_note: Option<String>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
}

impl ToolFormat {
    pub fn byte_size(&self) -> Option<u64> {
        self.filesize
            .or(self.filesize_approx)
            .filter(|size| *size > 0.0)
            .map(|size| size as u64)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
    cookies: Option<PathBuf>,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            cookies: None,
            timeout,
        }
    }

    /// Cookie jar handed to yt-dlp. Only passed along when the file exists.
    pub fn with_cookies(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies = Some(path.into());
        self
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(&config.ytdlp_bin, config.tool_timeout).with_cookies(&config.cookies_path)
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.stdin(Stdio::null()).kill_on_drop(true);
        if let Some(cookies) = &self.cookies
            && cookies.is_file()
        {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    fn launch_error(&self, source: io::Error) -> ToolError {
        ToolError::Launch {
            binary: self.binary.display().to_string(),
            source,
        }
    }

    /// Runs yt-dlp in metadata mode and parses the single JSON document.
    pub async fn dump_info(&self, url: &str) -> Result<ToolInfo, ToolError> {
        let mut command = self.command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--")
            .arg(url);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|source| self.launch_error(source))?,
            Err(_) => return Err(ToolError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(ToolError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// Starts yt-dlp writing the selected rendition to stdout.
    pub fn stream(&self, url: &str, format: &str) -> Result<ToolStream, ToolError> {
        let mut command = self.command();
        command
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--quiet")
            .arg("-f")
            .arg(format)
            .arg("-o")
            .arg("-")
            .arg("--")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| self.launch_error(source))?;
        let pid = child.id();
        let stdout = child.stdout.take().ok_or(ToolError::MissingStdout)?;

        // An undrained stderr pipe would eventually block the child. The last
        // non-blank line is kept for the failure report.
        let stderr_tail = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut last = None;
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "vidgrab::ytdlp", "{line}");
                    if !line.trim().is_empty() {
                        last = Some(line);
                    }
                }
                last
            })
        });

        // Awaited once stdout hits EOF, so a failed run ends the body with an
        // error instead of a clean EOF.
        let exit = exit_failure(child, stderr_tail);
        let inner = ReaderStream::new(stdout)
            .chain(stream::once(exit).filter_map(future::ready))
            .boxed();
        Ok(ToolStream { pid, inner })
    }
}

/// Waits for the streaming child and turns a non-zero exit into one error
/// item carrying the last stderr line.
async fn exit_failure(
    mut child: Child,
    stderr_tail: Option<JoinHandle<Option<String>>>,
) -> Option<io::Result<Bytes>> {
    let status = match child.wait().await {
        Ok(status) => status,
        Err(err) => return Some(Err(err)),
    };
    if status.success() {
        return None;
    }
    let last_line = match stderr_tail {
        Some(handle) => handle.await.ok().flatten(),
        None => None,
    }
    .unwrap_or_default();
    warn!(%status, stderr = %last_line, "yt-dlp stream ended with failure");
    Some(Err(io::Error::other(format!(
        "yt-dlp exited with {status}: {last_line}"
    ))))
}

/// Media bytes read from a running yt-dlp. Ends with an error item when the
/// process exits unsuccessfully. Dropping the stream kills the process.
pub struct ToolStream {
    pid: Option<u32>,
    inner: BoxStream<'static, io::Result<Bytes>>,
}

impl ToolStream {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl Stream for ToolStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}
