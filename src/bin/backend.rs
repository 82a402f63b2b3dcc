#![forbid(unsafe_code)]

//! Axum front end for VidGrab.
//!
//! Three endpoints: `/api/download` resolves a social-media link into a list
//! of renditions, `/api/stream/mp4` muxes a YouTube video on the fly, and
//! `/api/proxy` relays media bytes with the headers the origin CDN expects.
//! Nothing is stored; every request stands on its own.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use serde::Deserialize;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vidgrab::{
    Error,
    config::{RuntimeConfig, RuntimeOverrides, resolve_runtime_config},
    proxy::{BROWSER_USER_AGENT, DEFAULT_CONTENT_TYPE, MediaProxy, ProxiedMedia, content_disposition},
    resolver::{Resolution, Resolver},
    youtube::{self, YoutubeExtractor},
    ytdlp::YtDlp,
};

const LOGIN_REQUIRED_MESSAGE: &str = "This video requires login or CAPTCHA. Please try another one.";
const RATE_LIMITED_MESSAGE: &str = "Too many requests to the video provider. Please try again later.";
const UPSTREAM_MESSAGE: &str = "Failed to retrieve video info.";
const UNSUPPORTED_MESSAGE: &str =
    "Unsupported platform. Supported: YouTube, TikTok, Instagram, Facebook.";

/// Command-line flags. Each one overrides the matching environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "vidgrab", about = "Social video resolver and media proxy")]
struct BackendArgs {
    /// Listening port (`PORT`).
    #[arg(long)]
    port: Option<u16>,
    /// Listening address (`VIDGRAB_HOST`).
    #[arg(long)]
    host: Option<String>,
    /// Netscape cookie jar handed to yt-dlp (`VIDGRAB_COOKIES`).
    #[arg(long)]
    cookies: Option<PathBuf>,
    /// yt-dlp binary (`VIDGRAB_YTDLP_BIN`).
    #[arg(long = "yt-dlp")]
    ytdlp: Option<PathBuf>,
    /// Env file read before the process environment.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            port: self.port,
            host: self.host,
            cookies_path: self.cookies,
            ytdlp_bin: self.ytdlp,
            env_path: self.env_file,
        }
    }
}

/// Shared, immutable handles. Cloned into every request.
#[derive(Clone)]
struct AppState {
    resolver: Arc<Resolver>,
    proxy: MediaProxy,
    youtube: Arc<YoutubeExtractor>,
}

impl AppState {
    fn from_config(config: &RuntimeConfig, client: reqwest::Client) -> Self {
        Self {
            resolver: Arc::new(Resolver::from_config(config, client.clone())),
            proxy: MediaProxy::new(client, config.upstream_timeout),
            youtube: Arc::new(YoutubeExtractor::new(YtDlp::from_config(config))),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(message) => Self::new(StatusCode::BAD_REQUEST, message),
            Error::UnsupportedPlatform => Self::new(StatusCode::BAD_REQUEST, UNSUPPORTED_MESSAGE),
            Error::LoginRequired(detail) => {
                warn!(%detail, "login wall");
                Self::new(StatusCode::FORBIDDEN, LOGIN_REQUIRED_MESSAGE)
            }
            Error::RateLimited(detail) => {
                warn!(%detail, "rate limited");
                Self::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE)
            }
            Error::UpstreamUnavailable(detail) => {
                error!(%detail, "resolution failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, UPSTREAM_MESSAGE)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct MediaQuery {
    url: Option<String>,
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = resolve_runtime_config(BackendArgs::parse().into_overrides())
        .context("loading runtime configuration")?;
    let addr = config.listen_addr()?;

    if !config.cookies_path.is_file() {
        warn!(
            path = %config.cookies_path.display(),
            "cookie jar not found, yt-dlp will run anonymously"
        );
    }
    info!(
        tiktok_api = config.tiktok_api.is_some(),
        youtube_api = config.youtube_api.is_some(),
        ytdlp = %config.ytdlp_bin.display(),
        "backends configured"
    );

    let client = reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .connect_timeout(config.upstream_timeout)
        .build()
        .context("building HTTP client")?;
    let app = build_router(AppState::from_config(&config, client));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("VidGrab listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            header::CONTENT_DISPOSITION,
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
        ]);

    Router::new()
        .route("/api/download", get(download))
        .route("/api/stream/mp4", get(stream_mp4))
        .route("/api/proxy", get(proxy_media))
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {err}");
    }
}

async fn not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

fn plain_text(status: StatusCode, message: &'static str) -> Response {
    (status, message).into_response()
}

/// Sets the attachment headers shared by both streaming endpoints.
fn attachment_response(
    body: Body,
    content_type: &str,
    content_length: Option<u64>,
    file_name: &str,
) -> Response {
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if let Ok(value) = HeaderValue::from_str(&content_disposition(file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

async fn download(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> ApiResult<Json<Resolution>> {
    let url = query.url.unwrap_or_default();
    let resolution = state.resolver.resolve(&url).await?;
    Ok(Json(resolution))
}

/// YouTube passthrough. yt-dlp writes the muxed file to stdout and the bytes
/// go straight to the client; a disconnect drops the body and kills yt-dlp.
async fn stream_mp4(State(state): State<AppState>, Query(query): Query<MediaQuery>) -> Response {
    let url = query.url.unwrap_or_default();
    if !youtube::validate_url(&url) {
        return plain_text(StatusCode::BAD_REQUEST, "Invalid YouTube URL");
    }

    let details = match state.youtube.fetch_info(&url).await {
        Ok(details) => details,
        Err(err) => {
            error!(error = %err, url, "fetching YouTube info failed");
            return plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch video info");
        }
    };
    let stream = match state.youtube.open_stream(&url) {
        Ok(stream) => stream,
        Err(err) => {
            error!(error = %err, url, "starting YouTube stream failed");
            return plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to stream video");
        }
    };

    info!(url, pid = stream.pid(), title = %details.title, "streaming YouTube video");
    let file_name = format!("{}.mp4", youtube::sanitize_title(&details.title));
    attachment_response(Body::from_stream(stream), "video/mp4", None, &file_name)
}

async fn proxy_media(State(state): State<AppState>, Query(query): Query<MediaQuery>) -> Response {
    let Some(url) = query.url.filter(|url| !url.trim().is_empty()) else {
        return plain_text(StatusCode::BAD_REQUEST, "Missing media URL");
    };

    match state.proxy.stream_media(&url, query.name.as_deref()).await {
        Ok(ProxiedMedia {
            content_type,
            content_length,
            file_name,
            body,
        }) => attachment_response(
            Body::from_stream(body),
            &content_type,
            content_length,
            &file_name,
        ),
        Err(Error::InvalidInput(detail)) => {
            warn!(%detail, "rejected proxy URL");
            plain_text(StatusCode::BAD_REQUEST, "Invalid media URL")
        }
        Err(err) => {
            error!(error = %err, "proxy failed");
            plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Proxy failed")
        }
    }
}
