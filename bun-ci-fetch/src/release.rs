use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use url::Url;

static PATTERNS: LazyLock<Option<Patterns>> = LazyLock::new(|| Patterns::compile().ok());

/// Identifier shapes, in classification order.
struct Patterns {
    channel: Regex,
    version: Regex,
    http_url: Regex,
    commit: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            channel: Regex::new(r"(?i)^(stable|latest|canary)$")?,
            version: Regex::new(r"(?i)^(?:bun-v|v)?(\d+)\.(\d+)\.(\d+)$")?,
            http_url: Regex::new(r"(?i)^https?://")?,
            commit: Regex::new(r"(?i)^[0-9a-f]{40}$")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Latest,
    Canary,
}

impl Channel {
    /// CDN directory holding this channel's builds.
    pub fn path(self) -> &'static str {
        match self {
            Channel::Latest => "latest",
            Channel::Canary => "canary",
        }
    }
}

/// A release identifier, classified by shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseId {
    /// `stable`, `latest`, `canary`, or no identifier at all.
    Channel(Channel),
    /// `1.2.3`, `v1.2.3` or `bun-v1.2.3`.
    Version { major: u64, minor: u64, patch: u64 },
    Url(Url),
    /// A full 40 character commit SHA, lowercased.
    Commit(String),
    Unrecognized(String),
}

impl ReleaseId {
    /// Classify `release`; the first matching shape wins.
    pub fn classify(release: Option<&str>) -> Self {
        let release = release.map(str::trim).unwrap_or_default();

        if release.is_empty() {
            return ReleaseId::Channel(Channel::Latest);
        }

        let Some(patterns) = PATTERNS.as_ref() else {
            return ReleaseId::Unrecognized(release.to_string());
        };

        if patterns.channel.is_match(release) {
            let channel = if release.eq_ignore_ascii_case("canary") {
                Channel::Canary
            } else {
                Channel::Latest
            };
            return ReleaseId::Channel(channel);
        }

        if let Some(caps) = patterns.version.captures(release) {
            let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
            if let (Some(major), Some(minor), Some(patch)) = (part(1), part(2), part(3)) {
                return ReleaseId::Version {
                    major,
                    minor,
                    patch,
                };
            }
        }

        if patterns.http_url.is_match(release) {
            if let Ok(url) = Url::parse(release) {
                return ReleaseId::Url(url);
            }
        }

        if patterns.commit.is_match(release) {
            return ReleaseId::Commit(release.to_ascii_lowercase());
        }

        ReleaseId::Unrecognized(release.to_string())
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseId::Channel(channel) => f.write_str(channel.path()),
            ReleaseId::Version {
                major,
                minor,
                patch,
            } => write!(f, "bun-v{major}.{minor}.{patch}"),
            ReleaseId::Url(url) => f.write_str(url.as_str()),
            ReleaseId::Commit(sha) | ReleaseId::Unrecognized(sha) => f.write_str(sha),
        }
    }
}
