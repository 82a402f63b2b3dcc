#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_COOKIES_FILE: &str = "cookies.txt";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 90;

/// Third-party lookup API reached with RapidAPI-style key headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub url: String,
    pub key: Option<String>,
    pub host: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: u16,
    pub host: String,
    pub cookies_path: PathBuf,
    pub ytdlp_bin: PathBuf,
    /// Base prepended to synthesized `/api/stream/mp4` links. Links stay
    /// relative when unset.
    pub public_url: Option<String>,
    pub tiktok_api: Option<ApiEndpoint>,
    pub youtube_api: Option<ApiEndpoint>,
    pub upstream_timeout: Duration,
    pub tool_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            cookies_path: PathBuf::from(DEFAULT_COOKIES_FILE),
            ytdlp_bin: PathBuf::from(DEFAULT_YTDLP_BIN),
            public_url: None,
            tiktok_api: None,
            youtube_api: None,
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }
}

/// Values supplied on the command line. They win over the environment and the
/// env file.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub cookies_path: Option<PathBuf>,
    pub ytdlp_bin: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_runtime_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeConfig> {
    build_runtime_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let port = overrides
        .port
        .or_else(|| lookup("PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("VIDGRAB_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let cookies_path = overrides
        .cookies_path
        .or_else(|| lookup("VIDGRAB_COOKIES").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIES_FILE));
    let ytdlp_bin = overrides
        .ytdlp_bin
        .or_else(|| lookup("VIDGRAB_YTDLP_BIN").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));

    let public_url = match lookup("VIDGRAB_PUBLIC_URL") {
        Some(value) => {
            Url::parse(&value)
                .with_context(|| format!("VIDGRAB_PUBLIC_URL is not a valid URL: {value}"))?;
            Some(value.trim_end_matches('/').to_string())
        }
        None => None,
    };

    let upstream_timeout = lookup_secs(
        "VIDGRAB_UPSTREAM_TIMEOUT_SECS",
        &lookup,
        DEFAULT_UPSTREAM_TIMEOUT_SECS,
    );
    let tool_timeout = lookup_secs("VIDGRAB_TOOL_TIMEOUT_SECS", &lookup, DEFAULT_TOOL_TIMEOUT_SECS);

    Ok(RuntimeConfig {
        port,
        host,
        cookies_path,
        ytdlp_bin,
        public_url,
        tiktok_api: lookup_endpoint("VIDGRAB_TIKTOK_API", &lookup)?,
        youtube_api: lookup_endpoint("VIDGRAB_YOUTUBE_API", &lookup)?,
        upstream_timeout,
        tool_timeout,
    })
}

fn lookup_secs(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: u64) -> Duration {
    let secs = lookup(key)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}

/// Reads `<PREFIX>_URL`, `<PREFIX>_KEY` and `<PREFIX>_HOST`. The endpoint only
/// exists when the URL is set.
fn lookup_endpoint(
    prefix: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<ApiEndpoint>> {
    let Some(url) = lookup(&format!("{prefix}_URL")) else {
        return Ok(None);
    };
    Url::parse(&url).with_context(|| format!("{prefix}_URL is not a valid URL: {url}"))?;
    Ok(Some(ApiEndpoint {
        url,
        key: lookup(&format!("{prefix}_KEY")),
        host: lookup(&format!("{prefix}_HOST")),
    }))
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

impl RuntimeConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .host
            .parse::<IpAddr>()
            .map_err(|_| anyhow!("expected a valid IPv4 or IPv6 address, got {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
