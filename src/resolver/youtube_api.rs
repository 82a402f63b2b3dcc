#![forbid(unsafe_code)]

use super::{Backend, DEFAULT_TITLE, FormatDescriptor, Resolution, UNKNOWN_SIZE, api_request, format_size};
use crate::config::ApiEndpoint;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Third-party YouTube lookup. Any failure, quota included, is reported as
/// unavailable so the chain moves on to direct extraction.
pub struct YoutubeApi {
    client: reqwest::Client,
    endpoint: Option<ApiEndpoint>,
    timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct YoutubeApiResponse {
    #[serde(default)]
    video_info: VideoInfo,
    #[serde(default)]
    available_formats: Vec<ApiFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    thumbnail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiFormat {
    url: Option<String>,
    #[serde(alias = "qualityLabel")]
    quality: Option<String>,
    #[serde(alias = "extension")]
    ext: Option<String>,
    #[serde(alias = "filesize")]
    size: Option<Value>,
    #[serde(alias = "itag")]
    format_id: Option<Value>,
    height: Option<u32>,
}

impl YoutubeApi {
    pub fn new(client: reqwest::Client, endpoint: Option<ApiEndpoint>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }
}

/// Numbers are byte counts; strings are already human readable.
fn size_label(size: Option<&Value>) -> String {
    match size {
        Some(Value::Number(bytes)) => format_size(bytes.as_f64().map(|bytes| bytes as u64)),
        Some(Value::String(label)) if !label.trim().is_empty() => label.clone(),
        _ => UNKNOWN_SIZE.to_string(),
    }
}

fn format_id_label(id: Option<&Value>, index: usize) -> String {
    match id {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => format!("api-{index}"),
    }
}

fn into_resolution(response: YoutubeApiResponse) -> Result<Resolution> {
    let formats: Vec<FormatDescriptor> = response
        .available_formats
        .into_iter()
        .enumerate()
        .filter_map(|(index, format)| {
            let media_url = format.url.filter(|url| !url.is_empty())?;
            let height = format.height.filter(|height| *height > 0);
            Some(FormatDescriptor {
                media_url,
                format_id: format_id_label(format.format_id.as_ref(), index),
                extension: format.ext.unwrap_or_else(|| "mp4".to_string()),
                quality_label: super::quality_label(format.quality.as_deref(), height, None),
                approximate_size: size_label(format.size.as_ref()),
                height,
            })
        })
        .collect();

    if formats.is_empty() {
        return Err(Error::upstream("YouTube API returned no formats"));
    }

    let info = response.video_info;
    Ok(Resolution {
        title: info
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        thumbnail_url: info.thumbnail.unwrap_or_default(),
        formats,
    })
}

#[async_trait]
impl Backend for YoutubeApi {
    fn name(&self) -> &'static str {
        "youtube-api"
    }

    fn is_available(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn resolve(&self, url: &str) -> Result<Resolution> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| Error::upstream("YouTube API is not configured"))?;

        let response = api_request(&self.client, endpoint, url, self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::upstream(format!("YouTube API responded {status}")));
        }

        let payload: YoutubeApiResponse = response.json().await?;
        into_resolution(payload)
    }
}
