#![forbid(unsafe_code)]

use thiserror::Error;

/// Failure taxonomy shared by the resolver and the proxy. The HTTP layer maps
/// each variant to exactly one status code.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported platform")]
    UnsupportedPlatform,
    #[error("login or captcha required: {0}")]
    LoginRequired(String),
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl Error {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(message.into())
    }

    /// How specific a failure is. When a fallback chain runs dry the most
    /// specific failure is the one reported to the caller.
    pub(crate) fn specificity(&self) -> u8 {
        match self {
            Self::LoginRequired(_) => 3,
            Self::RateLimited(_) => 2,
            Self::UpstreamUnavailable(_) => 1,
            Self::InvalidInput(_) | Self::UnsupportedPlatform => 0,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamUnavailable(format!("request timed out: {err}"))
        } else {
            Self::UpstreamUnavailable(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
