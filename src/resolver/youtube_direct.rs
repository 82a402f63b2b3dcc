#![forbid(unsafe_code)]

use super::{Backend, FormatDescriptor, Resolution, UNKNOWN_SIZE};
use crate::error::{Error, Result};
use crate::youtube::{self, YoutubeExtractor};
use async_trait::async_trait;
use url::form_urlencoded;

pub const STREAM_PATH: &str = "/api/stream/mp4";

/// Looks up the title locally and points the client at this service's own
/// stream endpoint, which muxes audio and video on the fly.
pub struct YoutubeDirect {
    extractor: YoutubeExtractor,
    public_url: Option<String>,
}

impl YoutubeDirect {
    pub fn new(extractor: YoutubeExtractor, public_url: Option<String>) -> Self {
        Self {
            extractor,
            public_url,
        }
    }

    /// Relative when no public base URL is configured.
    fn stream_url(&self, source_url: &str) -> String {
        let encoded: String = form_urlencoded::byte_serialize(source_url.as_bytes()).collect();
        let base = self
            .public_url
            .as_deref()
            .map(|base| base.trim_end_matches('/'))
            .unwrap_or_default();
        format!("{base}{STREAM_PATH}?url={encoded}")
    }
}

#[async_trait]
impl Backend for YoutubeDirect {
    fn name(&self) -> &'static str {
        "youtube-direct"
    }

    async fn resolve(&self, url: &str) -> Result<Resolution> {
        if !youtube::validate_url(url) {
            return Err(Error::upstream("not a recognisable YouTube video URL"));
        }
        let details = self
            .extractor
            .fetch_info(url)
            .await
            .map_err(|err| Error::upstream(err.to_string()))?;

        Ok(Resolution {
            title: details.title,
            thumbnail_url: details.thumbnail,
            formats: vec![FormatDescriptor {
                media_url: self.stream_url(url),
                format_id: "stream".to_string(),
                extension: "mp4".to_string(),
                quality_label: "Best Available".to_string(),
                approximate_size: UNKNOWN_SIZE.to_string(),
                height: None,
            }],
        })
    }
}
