#![forbid(unsafe_code)]

use super::{Backend, DEFAULT_TITLE, FormatDescriptor, Resolution, UNKNOWN_SIZE, api_request};
use crate::config::ApiEndpoint;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Third-party TikTok lookup returning watermarked and clean playback URLs.
pub struct TikTokApi {
    client: reqwest::Client,
    endpoint: Option<ApiEndpoint>,
    timeout: Duration,
}

/// Some providers nest the payload under `data` and call the watermarked
/// URL `wmplay`; both shapes are accepted.
#[derive(Debug, Default, Deserialize)]
struct TikTokResponse {
    #[serde(flatten)]
    video: TikTokVideo,
    data: Option<TikTokVideo>,
}

#[derive(Debug, Default, Deserialize)]
struct TikTokVideo {
    play: Option<String>,
    #[serde(alias = "wmplay")]
    play_watermark: Option<String>,
    title: Option<String>,
    #[serde(alias = "thumbnail")]
    cover: Option<String>,
}

impl TikTokApi {
    pub fn new(client: reqwest::Client, endpoint: Option<ApiEndpoint>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            timeout,
        }
    }
}

fn watermark_format(url: String, format_id: &str, quality: &str) -> FormatDescriptor {
    FormatDescriptor {
        media_url: url,
        format_id: format_id.to_string(),
        extension: "mp4".to_string(),
        quality_label: quality.to_string(),
        approximate_size: UNKNOWN_SIZE.to_string(),
        height: None,
    }
}

fn into_resolution(response: TikTokResponse) -> Result<Resolution> {
    let video = response.data.unwrap_or(response.video);
    let non_empty = |value: Option<String>| value.filter(|value| !value.trim().is_empty());

    let mut formats = Vec::with_capacity(2);
    if let Some(url) = non_empty(video.play) {
        formats.push(watermark_format(url, "no-watermark", "No Watermark"));
    }
    if let Some(url) = non_empty(video.play_watermark) {
        formats.push(watermark_format(url, "watermark", "With Watermark"));
    }
    if formats.is_empty() {
        return Err(Error::upstream("TikTok API returned no playback URLs"));
    }

    Ok(Resolution {
        title: non_empty(video.title).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        thumbnail_url: non_empty(video.cover).unwrap_or_default(),
        formats,
    })
}

#[async_trait]
impl Backend for TikTokApi {
    fn name(&self) -> &'static str {
        "tiktok-api"
    }

    fn is_available(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn resolve(&self, url: &str) -> Result<Resolution> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| Error::upstream("TikTok API is not configured"))?;

        let response = api_request(&self.client, endpoint, url, self.timeout)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited("TikTok API quota exhausted".into()));
        }
        if !status.is_success() {
            return Err(Error::upstream(format!("TikTok API responded {status}")));
        }

        let payload: TikTokResponse = response.json().await?;
        into_resolution(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use crate::resolver::{Resolver, test_support::spawn_upstream};
    use axum::{Json, Router, extract::Query, http::HeaderMap, routing::get};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn endpoint_for(addr: std::net::SocketAddr) -> ApiEndpoint {
        ApiEndpoint {
            url: format!("http://{addr}/lookup"),
            key: Some("test-key".into()),
            host: Some("tiktok.example".into()),
        }
    }

    fn api(endpoint: ApiEndpoint) -> TikTokApi {
        TikTokApi::new(reqwest::Client::new(), Some(endpoint), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn builds_both_watermark_variants() {
        let router = Router::new().route(
            "/lookup",
            get(
                |Query(query): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                    assert_eq!(query["url"], "https://www.tiktok.com/@a/video/1");
                    assert_eq!(headers["x-rapidapi-key"], "test-key");
                    assert_eq!(headers["x-rapidapi-host"], "tiktok.example");
                    Json(json!({"play": "A", "play_watermark": "B"}))
                },
            ),
        );
        let addr = spawn_upstream(router).await;

        let resolution = api(endpoint_for(addr))
            .resolve("https://www.tiktok.com/@a/video/1")
            .await
            .unwrap();
        assert_eq!(resolution.formats.len(), 2);
        assert_eq!(resolution.formats[0].media_url, "A");
        assert_eq!(resolution.formats[0].quality_label, "No Watermark");
        assert_eq!(resolution.formats[1].media_url, "B");
        assert_eq!(resolution.formats[1].quality_label, "With Watermark");
        assert!(resolution.formats.iter().all(|f| f.extension == "mp4"));
        assert!(resolution.formats.iter().all(|f| f.approximate_size == "Unknown"));
        assert_eq!(resolution.title, "Video");
    }

    #[tokio::test]
    async fn accepts_nested_payload() {
        let router = Router::new().route(
            "/lookup",
            get(|| async {
                Json(json!({"code": 0, "data": {"play": "A", "wmplay": "B", "title": "dance", "cover": "C"}}))
            }),
        );
        let addr = spawn_upstream(router).await;
        let resolution = api(endpoint_for(addr))
            .resolve("https://vm.tiktok.com/x/")
            .await
            .unwrap();
        assert_eq!(resolution.title, "dance");
        assert_eq!(resolution.thumbnail_url, "C");
        assert_eq!(resolution.formats[1].media_url, "B");
    }

    #[tokio::test]
    async fn single_url_yields_single_descriptor() {
        let router =
            Router::new().route("/lookup", get(|| async { Json(json!({"play": "A"})) }));
        let addr = spawn_upstream(router).await;
        let resolution = api(endpoint_for(addr))
            .resolve("https://www.tiktok.com/@a/video/1")
            .await
            .unwrap();
        assert_eq!(resolution.formats.len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_status_maps_to_rate_limited() {
        let router = Router::new().route(
            "/lookup",
            get(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let addr = spawn_upstream(router).await;
        let err = api(endpoint_for(addr))
            .resolve("https://www.tiktok.com/@a/video/1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
    }

    #[tokio::test]
    async fn other_failures_are_upstream_unavailable() {
        let router = Router::new()
            .route(
                "/lookup",
                get(|| async { (axum::http::StatusCode::FORBIDDEN, "no key") }),
            )
            .route("/empty", get(|| async { Json(Value::Null) }));
        let addr = spawn_upstream(router).await;

        let err = api(endpoint_for(addr))
            .resolve("https://www.tiktok.com/@a/video/1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));

        let mut empty = endpoint_for(addr);
        empty.url = format!("http://{addr}/empty");
        let err = api(empty)
            .resolve("https://www.tiktok.com/@a/video/1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }

    #[test]
    fn unconfigured_api_is_unavailable() {
        let backend = TikTokApi::new(reqwest::Client::new(), None, Duration::from_secs(1));
        assert!(!backend.is_available());
    }

    #[tokio::test]
    async fn resolver_surfaces_rate_limit_when_tool_also_fails() {
        let router = Router::new().route(
            "/lookup",
            get(|| async { axum::http::StatusCode::TOO_MANY_REQUESTS }),
        );
        let addr = spawn_upstream(router).await;
        let dir = tempfile::tempdir().unwrap();
        let tool = crate::ytdlp::YtDlp::new(dir.path().join("missing"), Duration::from_secs(1));

        let resolver = Resolver::empty().with_chain(
            Platform::TikTok,
            vec![
                Arc::new(api(endpoint_for(addr))) as Arc<dyn Backend>,
                Arc::new(crate::resolver::ToolBackend::new(tool)) as Arc<dyn Backend>,
            ],
        );
        let err = resolver
            .resolve("https://www.tiktok.com/@a/video/1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
    }
}
