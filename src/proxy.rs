#![forbid(unsafe_code)]

//! Server-side re-fetch of media URLs.
//!
//! CDNs behind TikTok, Instagram and Facebook refuse hot-linked requests that
//! lack the right `Referer`, so the bytes are pulled here with browser-like
//! headers and relayed to the client as an attachment.

use crate::error::{Error, Result};
use crate::platform::{Platform, classify_host};
use axum::body::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue, ORIGIN,
    REFERER, USER_AGENT,
};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const FALLBACK_EXTENSION: &str = "mp4";
const FALLBACK_STEM: &str = "Video";

/// Parses `media_url`, accepting only absolute `http`/`https` URLs.
pub fn parse_media_url(media_url: &str) -> Result<Url> {
    let trimmed = media_url.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("Missing 'url' parameter".into()));
    }
    let url = Url::parse(trimmed)
        .map_err(|err| Error::InvalidInput(format!("invalid media URL: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidInput(format!("unsupported scheme: {other}"))),
    }
}

/// Browser-like headers plus the `Referer`/`Origin` pair the media host's
/// platform expects. Unknown hosts get neither.
pub fn outbound_headers(media_url: &Url) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    let platform = media_url
        .host_str()
        .map(classify_host)
        .unwrap_or(Platform::Unknown);
    if let Some(origin) = platform.web_origin() {
        headers.insert(ORIGIN, HeaderValue::from_static(origin));
        if let Ok(referer) = HeaderValue::from_str(&format!("{origin}/")) {
            headers.insert(REFERER, referer);
        }
    }
    headers
}

/// Printable ASCII without quotes or backslashes, so the name can sit inside
/// a quoted `filename=` parameter.
fn sanitize_file_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && *c != '"' && *c != '\\')
        .collect();
    let trimmed = cleaned.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Caller's name when usable, else `Video.<ext>` with the extension taken
/// from the content type's subtype when that is a known extension for it.
pub fn attachment_name(requested: Option<&str>, content_type: &str) -> String {
    if let Some(name) = requested.and_then(sanitize_file_name) {
        return name;
    }

    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let extension = essence
        .split_once('/')
        .map(|(_, subtype)| subtype)
        .filter(|subtype| {
            mime_guess::get_mime_extensions_str(&essence)
                .is_some_and(|known| known.contains(subtype))
        })
        .unwrap_or(FALLBACK_EXTENSION);
    format!("{FALLBACK_STEM}.{extension}")
}

pub fn content_disposition(file_name: &str) -> String {
    format!("attachment; filename=\"{file_name}\"")
}

/// Upstream response ready to be relayed.
pub struct ProxiedMedia {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub file_name: String,
    pub body: BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>,
}

#[derive(Clone)]
pub struct MediaProxy {
    client: reqwest::Client,
    header_timeout: Duration,
}

impl MediaProxy {
    /// `header_timeout` bounds the wait for the upstream response headers;
    /// the body itself may take as long as the transfer needs.
    pub fn new(client: reqwest::Client, header_timeout: Duration) -> Self {
        Self {
            client,
            header_timeout,
        }
    }

    pub async fn stream_media(&self, media_url: &str, suggested: Option<&str>) -> Result<ProxiedMedia> {
        let url = parse_media_url(media_url)?;
        let headers = outbound_headers(&url);
        info!(host = url.host_str().unwrap_or_default(), "proxying media");

        let request = self.client.get(url.clone()).headers(headers).send();
        let response = tokio::time::timeout(self.header_timeout, request)
            .await
            .map_err(|_| {
                Error::upstream(format!(
                    "no response headers within {:?}",
                    self.header_timeout
                ))
            })??;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::upstream(format!("media host responded {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        let file_name = attachment_name(suggested, &content_type);

        let host = url.host_str().unwrap_or_default().to_string();
        let body = response
            .bytes_stream()
            .inspect_err(move |err| warn!(%host, error = %err, "media stream aborted"))
            .boxed();

        Ok(ProxiedMedia {
            content_type,
            content_length,
            file_name,
            body,
        })
    }
}
