#![forbid(unsafe_code)]

use super::{Backend, DEFAULT_TITLE, FormatDescriptor, Resolution, format_size, quality_label};
use crate::error::{Error, Result};
use crate::ytdlp::{ToolFormat, ToolInfo, YtDlp};
use async_trait::async_trait;

/// Containers a browser can play straight from the CDN.
const PLAYABLE_CONTAINERS: &[&str] = &["mp4", "webm", "mov", "m4v"];

/// General-purpose extraction through yt-dlp. Serves Instagram, Facebook and
/// TikTok when the TikTok API is missing or failing.
pub struct ToolBackend {
    tool: YtDlp,
}

impl ToolBackend {
    pub fn new(tool: YtDlp) -> Self {
        Self { tool }
    }
}

/// A codec field counts as present unless yt-dlp explicitly says `none`.
fn has_codec(codec: Option<&str>) -> bool {
    codec.is_none_or(|codec| !codec.eq_ignore_ascii_case("none"))
}

fn is_playable(format: &ToolFormat) -> bool {
    let has_url = format.url.as_deref().is_some_and(|url| !url.is_empty());
    let known_container = format
        .ext
        .as_deref()
        .is_some_and(|ext| PLAYABLE_CONTAINERS.contains(&ext.to_ascii_lowercase().as_str()));
    has_url
        && known_container
        && has_codec(format.vcodec.as_deref())
        && has_codec(format.acodec.as_deref())
}

fn describe(format: &ToolFormat, fallback_id: &str, fallback_ext: &str) -> FormatDescriptor {
    FormatDescriptor {
        media_url: format.url.clone().unwrap_or_default(),
        format_id: format
            .format_id
            .clone()
            .unwrap_or_else(|| fallback_id.to_string()),
        extension: format
            .ext
            .clone()
            .unwrap_or_else(|| fallback_ext.to_string()),
        quality_label: quality_label(
            format.format_note.as_deref(),
            format.height,
            format.resolution.as_deref(),
        ),
        approximate_size: format_size(format.byte_size()),
        height: format.height.filter(|height| *height > 0),
    }
}

/// Turns a metadata dump into a resolution. Formats with audio and video in
/// a playable container are kept; when none survive, the rendition yt-dlp
/// selected itself is offered instead.
pub(crate) fn resolution_from_info(info: ToolInfo) -> Result<Resolution> {
    let mut formats: Vec<FormatDescriptor> = info
        .formats
        .iter()
        .filter(|format| is_playable(format))
        .map(|format| describe(format, "unknown", "mp4"))
        .collect();

    if formats.is_empty()
        && info
            .selected
            .url
            .as_deref()
            .is_some_and(|url| !url.is_empty())
    {
        formats.push(describe(&info.selected, "best", "mp4"));
    }
    if formats.is_empty() {
        return Err(Error::upstream("yt-dlp reported no playable formats"));
    }

    let thumbnail_url = info.best_thumbnail().unwrap_or_default().to_string();
    Ok(Resolution {
        title: info
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        thumbnail_url,
        formats,
    })
}

#[async_trait]
impl Backend for ToolBackend {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve(&self, url: &str) -> Result<Resolution> {
        let info = self.tool.dump_info(url).await.map_err(|err| err.classify())?;
        resolution_from_info(info)
    }
}
