#![forbid(unsafe_code)]

//! Direct YouTube extraction: URL validation, title lookup and a combined
//! audio+video stream, all backed by yt-dlp.

use crate::ytdlp::{ToolError, ToolStream, YtDlp};
use url::Url;

/// Hosts that carry the video id in the `v` query parameter.
const QUERY_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
];

/// Prefer a progressive mp4, then any progressive rendition.
const STREAM_FORMAT: &str =
    "best[ext=mp4][vcodec!=none][acodec!=none]/best[vcodec!=none][acodec!=none]/best";

const ID_LEN: usize = 11;

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == ID_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Extracts the 11-character video id from a watch, short, embed, live or
/// `youtu.be` link.
pub fn video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();

    let candidate = if QUERY_HOSTS.contains(&host.as_str())
        && let Some((_, value)) = parsed.query_pairs().find(|(key, _)| key == "v")
    {
        Some(value.into_owned())
    } else {
        let mut segments = parsed.path_segments()?;
        match host.as_str() {
            "youtu.be" | "www.youtu.be" => segments.next().map(str::to_owned),
            "youtube-nocookie.com" | "www.youtube-nocookie.com" => match segments.next() {
                Some("embed") => segments.next().map(str::to_owned),
                _ => None,
            },
            _ if QUERY_HOSTS.contains(&host.as_str()) => match segments.next() {
                Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_owned),
                _ => None,
            },
            _ => None,
        }
    }?;

    is_video_id(&candidate).then_some(candidate)
}

pub fn validate_url(url: &str) -> bool {
    video_id(url).is_some()
}

/// Keeps ASCII letters, digits, `_` and whitespace so the title is safe inside
/// a quoted `Content-Disposition` filename.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || c.is_whitespace())
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDetails {
    pub title: String,
    pub thumbnail: String,
}

#[derive(Debug, Clone)]
pub struct YoutubeExtractor {
    tool: YtDlp,
}

impl YoutubeExtractor {
    pub fn new(tool: YtDlp) -> Self {
        Self { tool }
    }

    pub async fn fetch_info(&self, url: &str) -> Result<VideoDetails, ToolError> {
        let info = self.tool.dump_info(url).await?;
        let thumbnail = info.best_thumbnail().unwrap_or_default().to_string();
        Ok(VideoDetails {
            title: info
                .title
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| "Video".to_string()),
            thumbnail,
        })
    }

    pub fn open_stream(&self, url: &str) -> Result<ToolStream, ToolError> {
        self.tool.stream(url, STREAM_FORMAT)
    }
}
