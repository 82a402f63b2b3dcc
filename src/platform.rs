#![forbid(unsafe_code)]

//! Maps URLs to the platform that serves them.
//!
//! Every substring check in the crate lives here so that resolution, proxy
//! header selection and tests agree on what counts as "TikTok" or "YouTube".

use serde::Serialize;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    TikTok,
    Instagram,
    Facebook,
    Unknown,
}

/// Domain fragments per platform, checked in this order. CDN hosts are listed
/// next to the public domains because proxied media URLs point at them.
const DOMAIN_TABLE: &[(Platform, &[&str])] = &[
    (
        Platform::YouTube,
        &[
            "youtube.com",
            "youtu.be",
            "youtube-nocookie.com",
            "googlevideo.com",
        ],
    ),
    (
        Platform::TikTok,
        &["tiktok.com", "tiktokcdn.com", "tiktokcdn-us.com", "tiktokv.com"],
    ),
    (Platform::Instagram, &["instagram.com", "cdninstagram.com"]),
    (Platform::Facebook, &["facebook.com", "fb.watch", "fbcdn.net"]),
];

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::YouTube => "youtube",
            Self::TikTok => "tiktok",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Unknown => "unknown",
        }
    }

    /// Web origin the platform's CDNs expect in `Referer`/`Origin`.
    pub fn web_origin(self) -> Option<&'static str> {
        match self {
            Self::YouTube => Some("https://www.youtube.com"),
            Self::TikTok => Some("https://www.tiktok.com"),
            Self::Instagram => Some("https://www.instagram.com"),
            Self::Facebook => Some("https://www.facebook.com"),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a URL. Absolute URLs are matched on their host; anything that
/// does not parse (for example `youtu.be/abc` without a scheme) is matched as
/// a whole.
pub fn classify(url: &str) -> Platform {
    let trimmed = url.trim();
    match Url::parse(trimmed)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_owned))
    {
        Some(host) => classify_host(&host),
        None => classify_host(trimmed),
    }
}

/// Substring match over a host (or any text) against the domain table.
pub fn classify_host(host: &str) -> Platform {
    let haystack = host.to_ascii_lowercase();
    DOMAIN_TABLE
        .iter()
        .find(|(_, fragments)| fragments.iter().any(|fragment| haystack.contains(fragment)))
        .map(|(platform, _)| *platform)
        .unwrap_or(Platform::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_table() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Platform::YouTube),
            ("https://youtu.be/dQw4w9WgXcQ", Platform::YouTube),
            ("https://m.youtube.com/shorts/dQw4w9WgXcQ", Platform::YouTube),
            (
                "https://rr3---sn-abc.googlevideo.com/videoplayback?id=1",
                Platform::YouTube,
            ),
            ("https://www.tiktok.com/@user/video/123", Platform::TikTok),
            ("https://vm.tiktok.com/ZMabc/", Platform::TikTok),
            ("https://v16-webapp.tiktokcdn.com/abc/video.mp4", Platform::TikTok),
            ("https://www.instagram.com/reel/Cabc/", Platform::Instagram),
            (
                "https://scontent-lhr8-1.cdninstagram.com/v/t50/abc.mp4",
                Platform::Instagram,
            ),
            ("https://www.facebook.com/watch/?v=1", Platform::Facebook),
            ("https://fb.watch/abc/", Platform::Facebook),
            ("https://video.xx.fbcdn.net/v/t42/abc.mp4", Platform::Facebook),
            ("https://example.com/video.mp4", Platform::Unknown),
            ("", Platform::Unknown),
            ("not a url at all", Platform::Unknown),
        ];
        for (url, expected) in cases {
            assert_eq!(classify(url), expected, "{url}");
        }
    }

    #[test]
    fn classify_ignores_casing() {
        assert_eq!(classify("HTTPS://WWW.TIKTOK.COM/@a/video/1"), Platform::TikTok);
        assert_eq!(classify("Https://YouTu.be/abc"), Platform::YouTube);
    }

    #[test]
    fn classify_matches_scheme_less_input() {
        assert_eq!(classify("youtu.be/dQw4w9WgXcQ"), Platform::YouTube);
        assert_eq!(classify("www.instagram.com/p/abc"), Platform::Instagram);
    }

    #[test]
    fn classify_uses_host_not_query() {
        let url = "https://example.com/redirect?to=https://www.tiktok.com/@a";
        assert_eq!(classify(url), Platform::Unknown);
    }

    #[test]
    fn classify_is_idempotent() {
        let url = "https://www.facebook.com/reel/42";
        assert_eq!(classify(url), classify(url));
    }

    #[test]
    fn unknown_platform_has_no_origin() {
        assert!(Platform::Unknown.web_origin().is_none());
        assert_eq!(Platform::TikTok.web_origin(), Some("https://www.tiktok.com"));
    }
}
