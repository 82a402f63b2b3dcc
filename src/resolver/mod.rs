#![forbid(unsafe_code)]

//! Per-platform resolution with ordered fallback.
//!
//! Each platform owns a chain of [`Backend`]s. The chain is walked in order;
//! unavailable backends are skipped and failures are logged before the next
//! backend runs. Only when the whole chain fails does an error reach the
//! caller, and then it is the most specific one observed.

mod tiktok;
mod tool;
mod youtube_api;
mod youtube_direct;

pub use tiktok::TikTokApi;
pub use tool::ToolBackend;
pub use youtube_api::YoutubeApi;
pub use youtube_direct::YoutubeDirect;

use crate::config::{ApiEndpoint, RuntimeConfig};
use crate::error::{Error, Result};
use crate::platform::{Platform, classify};
use crate::youtube::YoutubeExtractor;
use crate::ytdlp::YtDlp;
use async_trait::async_trait;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

const BYTES_PER_MB: f64 = 1_048_576.0;
pub const UNKNOWN_SIZE: &str = "Unknown";
pub const DEFAULT_TITLE: &str = "Video";

/// One downloadable rendition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescriptor {
    #[serde(rename = "url")]
    pub media_url: String,
    pub format_id: String,
    #[serde(rename = "ext")]
    pub extension: String,
    #[serde(rename = "quality")]
    pub quality_label: String,
    #[serde(rename = "size")]
    pub approximate_size: String,
    /// Pixel height when the backend reported one; drives ordering.
    #[serde(skip)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub title: String,
    #[serde(rename = "thumbnail")]
    pub thumbnail_url: String,
    pub formats: Vec<FormatDescriptor>,
}

/// `"<MB, 2 decimals> MB"` for a known byte count, `"Unknown"` otherwise.
pub fn format_size(bytes: Option<u64>) -> String {
    match bytes {
        Some(bytes) => format!("{:.2} MB", bytes as f64 / BYTES_PER_MB),
        None => UNKNOWN_SIZE.to_string(),
    }
}

/// Quality note, else `<height>p`, else the resolution string, else `Default`.
pub fn quality_label(note: Option<&str>, height: Option<u32>, resolution: Option<&str>) -> String {
    fn non_empty(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|value| !value.is_empty())
    }
    if let Some(note) = non_empty(note) {
        return note.to_string();
    }
    if let Some(height) = height.filter(|height| *height > 0) {
        return format!("{height}p");
    }
    non_empty(resolution).unwrap_or("Default").to_string()
}

/// Highest known height first; formats without a height keep their relative
/// order behind the rest.
pub fn order_formats(formats: &mut [FormatDescriptor]) {
    formats.sort_by_key(|format| std::cmp::Reverse(format.height.unwrap_or(0)));
}

/// One resolution strategy in a platform chain.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Backends that lack configuration report themselves unavailable and
    /// are skipped.
    fn is_available(&self) -> bool {
        true
    }

    async fn resolve(&self, url: &str) -> Result<Resolution>;
}

pub struct Resolver {
    chains: Vec<(Platform, Vec<Arc<dyn Backend>>)>,
}

impl Resolver {
    /// A resolver with no chains; every supported platform fails as
    /// unavailable until chains are registered.
    pub fn empty() -> Self {
        Self { chains: Vec::new() }
    }

    /// Builds the production chains:
    /// TikTok API → yt-dlp, YouTube API → direct extraction, and yt-dlp
    /// alone for Instagram and Facebook.
    pub fn from_config(config: &RuntimeConfig, client: reqwest::Client) -> Self {
        let tool = YtDlp::from_config(config);
        let tool_backend: Arc<dyn Backend> = Arc::new(ToolBackend::new(tool.clone()));
        let api_timeout = config.upstream_timeout;

        let tiktok: Arc<dyn Backend> = Arc::new(TikTokApi::new(
            client.clone(),
            config.tiktok_api.clone(),
            api_timeout,
        ));
        let youtube_api: Arc<dyn Backend> = Arc::new(YoutubeApi::new(
            client,
            config.youtube_api.clone(),
            api_timeout,
        ));
        let youtube_direct: Arc<dyn Backend> = Arc::new(YoutubeDirect::new(
            YoutubeExtractor::new(tool),
            config.public_url.clone(),
        ));

        Self::empty()
            .with_chain(Platform::TikTok, vec![tiktok, tool_backend.clone()])
            .with_chain(Platform::YouTube, vec![youtube_api, youtube_direct])
            .with_chain(Platform::Instagram, vec![tool_backend.clone()])
            .with_chain(Platform::Facebook, vec![tool_backend])
    }

    /// Registers (or replaces) the chain for a platform.
    pub fn with_chain(mut self, platform: Platform, backends: Vec<Arc<dyn Backend>>) -> Self {
        self.chains.retain(|(existing, _)| *existing != platform);
        self.chains.push((platform, backends));
        self
    }

    fn chain(&self, platform: Platform) -> &[Arc<dyn Backend>] {
        self.chains
            .iter()
            .find(|(candidate, _)| *candidate == platform)
            .map(|(_, backends)| backends.as_slice())
            .unwrap_or(&[])
    }

    pub async fn resolve(&self, url: &str) -> Result<Resolution> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidInput("Missing 'url' parameter".into()));
        }

        let platform = classify(url);
        if platform == Platform::Unknown {
            return Err(Error::UnsupportedPlatform);
        }

        info!(%platform, url, "resolving");
        let mut worst: Option<Error> = None;
        for backend in self.chain(platform) {
            if !backend.is_available() {
                debug!(backend = backend.name(), "backend not configured, skipping");
                continue;
            }
            match backend.resolve(url).await {
                Ok(mut resolution) => {
                    order_formats(&mut resolution.formats);
                    info!(
                        backend = backend.name(),
                        formats = resolution.formats.len(),
                        "resolved"
                    );
                    return Ok(resolution);
                }
                Err(err) => {
                    warn!(backend = backend.name(), error = %err, "backend failed");
                    if worst
                        .as_ref()
                        .is_none_or(|seen| err.specificity() > seen.specificity())
                    {
                        worst = Some(err);
                    }
                }
            }
        }

        Err(worst.unwrap_or_else(|| {
            Error::upstream(format!("no backend available for {platform}"))
        }))
    }
}

/// Attaches RapidAPI-style credentials and the per-call timeout.
pub(crate) fn api_request(
    client: &reqwest::Client,
    endpoint: &ApiEndpoint,
    source_url: &str,
    timeout: Duration,
) -> reqwest::RequestBuilder {
    let mut request = client
        .get(&endpoint.url)
        .query(&[("url", source_url)])
        .timeout(timeout);
    if let Some(key) = &endpoint.key {
        request = request.header("x-rapidapi-key", key);
    }
    if let Some(host) = &endpoint.host {
        request = request.header("x-rapidapi-host", host);
    }
    request
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        name: &'static str,
        available: bool,
        outcome: fn() -> Result<Resolution>,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(name: &'static str, outcome: fn() -> Result<Resolution>) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: true,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }

        fn unavailable(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: false,
                outcome: || panic!("unavailable backend must not run"),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn resolve(&self, _url: &str) -> Result<Resolution> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn chain<const N: usize>(backends: [&Arc<FakeBackend>; N]) -> Vec<Arc<dyn Backend>> {
        backends
            .into_iter()
            .map(|backend| backend.clone() as Arc<dyn Backend>)
            .collect()
    }

    fn descriptor(quality: &str, height: Option<u32>) -> FormatDescriptor {
        FormatDescriptor {
            media_url: format!("https://cdn.example/{quality}.mp4"),
            format_id: quality.into(),
            extension: "mp4".into(),
            quality_label: quality.into(),
            approximate_size: UNKNOWN_SIZE.into(),
            height,
        }
    }

    fn sample() -> Result<Resolution> {
        Ok(Resolution {
            title: "clip".into(),
            thumbnail_url: String::new(),
            formats: vec![
                descriptor("360p", Some(360)),
                descriptor("audio", None),
                descriptor("1080p", Some(1080)),
            ],
        })
    }

    #[test]
    fn size_formatting() {
        assert_eq!(format_size(Some(5_242_880)), "5.00 MB");
        assert_eq!(format_size(Some(1_500_000)), "1.43 MB");
        assert_eq!(format_size(None), "Unknown");
    }

    #[test]
    fn quality_label_precedence() {
        assert_eq!(quality_label(Some("HD"), Some(720), Some("1280x720")), "HD");
        assert_eq!(quality_label(Some(" "), Some(720), Some("1280x720")), "720p");
        assert_eq!(quality_label(None, None, Some("1280x720")), "1280x720");
        assert_eq!(quality_label(None, Some(0), None), "Default");
    }

    #[test]
    fn ordering_puts_tallest_first_and_is_stable() {
        let mut formats = vec![
            descriptor("No Watermark", None),
            descriptor("480p", Some(480)),
            descriptor("With Watermark", None),
            descriptor("720p", Some(720)),
        ];
        order_formats(&mut formats);
        let labels: Vec<_> = formats.iter().map(|f| f.quality_label.as_str()).collect();
        assert_eq!(labels, ["720p", "480p", "No Watermark", "With Watermark"]);
    }

    #[tokio::test]
    async fn unsupported_platform_never_calls_backends() {
        let backend = FakeBackend::new("fake", sample);
        let resolver = Resolver::empty()
            .with_chain(Platform::YouTube, chain([&backend]))
            .with_chain(Platform::TikTok, chain([&backend]));
        let err = resolver
            .resolve("https://example.com/watch?v=1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn blank_url_is_invalid_input() {
        let err = Resolver::empty().resolve("   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn falls_back_after_failure_and_orders_result() {
        let first = FakeBackend::new("first", || Err(Error::upstream("down")));
        let second = FakeBackend::new("second", sample);
        let resolver = Resolver::empty()
            .with_chain(Platform::Instagram, chain([&first, &second]));

        let resolution = resolver
            .resolve("https://www.instagram.com/reel/abc/")
            .await
            .unwrap();
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(resolution.formats[0].quality_label, "1080p");
        assert_eq!(resolution.formats[2].quality_label, "audio");
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let first = FakeBackend::new("first", sample);
        let second = FakeBackend::new("second", sample);
        let resolver =
            Resolver::empty().with_chain(Platform::Facebook, chain([&first, &second]));
        resolver.resolve("https://fb.watch/abc/").await.unwrap();
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn skips_unavailable_backends() {
        let missing = FakeBackend::unavailable("missing");
        let present = FakeBackend::new("present", sample);
        let resolver =
            Resolver::empty().with_chain(Platform::TikTok, chain([&missing, &present]));
        resolver
            .resolve("https://www.tiktok.com/@a/video/1")
            .await
            .unwrap();
        assert_eq!(present.calls(), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_most_specific_failure() {
        let limited = FakeBackend::new("api", || Err(Error::RateLimited("429".into())));
        let broken = FakeBackend::new("tool", || Err(Error::upstream("exit 1")));
        let resolver = Resolver::empty().with_chain(Platform::TikTok, chain([&limited, &broken]));
        let err = resolver
            .resolve("https://www.tiktok.com/@a/video/1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
    }

    #[tokio::test]
    async fn empty_chain_is_upstream_unavailable() {
        let api = FakeBackend::unavailable("api");
        let resolver = Resolver::empty().with_chain(Platform::YouTube, chain([&api]));
        let err = resolver
            .resolve("https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }
}
