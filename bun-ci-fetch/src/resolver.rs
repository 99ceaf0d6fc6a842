//! Release resolution: turn a target and an ambiguous release identifier
//! into the URL of a `bun-{label}.zip` artifact.
//!
//! Strategies run in a fixed order and the first one to produce a URL wins:
//!
//! 1. [`ChannelStrategy`]: `latest`/`canary` directories on the CDN.
//! 2. [`VersionStrategy`]: `bun-vX.Y.Z` directories on the CDN.
//! 3. [`DirectUrlStrategy`]: the identifier is itself a URL.
//! 4. [`CommitStrategy`]: `{sha}` and `{sha}-canary` directories on the CDN,
//!    then a search of the Buildkite builds reported on the commit.
//!
//! CDN lookups are single HEAD requests, so they go first; the build graph
//! search needs a request per build and per job and goes last.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::buildkite::{self, Artifact, Build, CombinedStatus};
use crate::config::Config;
use crate::context::Context;
use crate::error::{CiFetchError, HttpError, Result};
use crate::http::{Body, HttpClient, RequestOptions, ResponseMode};
use crate::process::ProcessRunner;
use crate::release::ReleaseId;
use crate::target::Target;
use crate::token::TokenProvider;

/// Endpoints consulted during resolution.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// CDN releases root; always ends with `/`.
    pub cdn_url: Url,
    pub api_url: Url,
    pub repository: String,
    pub buildkite_host: String,
    pub buildkite_url: Url,
}

impl ResolverSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            cdn_url: parse_setting("cdn.base_url", &with_trailing_slash(&config.cdn.base_url))?,
            api_url: parse_setting("github.api_url", &config.github.api_url)?,
            repository: config.github.repository.clone(),
            buildkite_host: config.buildkite.host.clone(),
            buildkite_url: parse_setting(
                "buildkite.url",
                &with_trailing_slash(&config.buildkite.url),
            )?,
        })
    }

    fn cdn_candidate(&self, directory: &str, target: &Target) -> Option<Url> {
        self.cdn_url
            .join(&format!("{directory}/{}", target.archive_name()))
            .ok()
    }

    fn commit_status_url(&self, sha: &str) -> String {
        format!(
            "{}/repos/{}/commits/{}/status",
            self.api_url.as_str().trim_end_matches('/'),
            self.repository,
            sha
        )
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

fn parse_setting(name: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| CiFetchError::Config {
        path: name.to_string(),
        message: format!("invalid URL '{value}': {e}"),
    })
}

/// Everything a strategy needs for one resolution call.
pub struct Resolution<'a> {
    pub http: &'a HttpClient,
    pub settings: &'a ResolverSettings,
    pub target: &'a Target,
    pub release: &'a ReleaseId,
}

impl Resolution<'_> {
    /// `Some(url)` if the existence probe finds it.
    async fn probe(&self, url: Option<Url>) -> Option<Url> {
        let url = url?;
        if self.http.exists(url.as_str()).await {
            Some(url)
        } else {
            debug!("Not found: {}", url);
            None
        }
    }
}

/// One way of turning a release identifier into an artifact URL.
#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "not applicable or not found, try the next one".
    async fn attempt(&self, resolution: &Resolution<'_>) -> Result<Option<Url>>;
}

/// `{cdn}/{latest|canary}/bun-{label}.zip`
#[derive(Debug, Default)]
pub struct ChannelStrategy;

#[async_trait]
impl ResolveStrategy for ChannelStrategy {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn attempt(&self, r: &Resolution<'_>) -> Result<Option<Url>> {
        let ReleaseId::Channel(channel) = r.release else {
            return Ok(None);
        };
        let candidate = r.settings.cdn_candidate(channel.path(), r.target);
        Ok(r.probe(candidate).await)
    }
}

/// `{cdn}/bun-v{major}.{minor}.{patch}/bun-{label}.zip`
#[derive(Debug, Default)]
pub struct VersionStrategy;

#[async_trait]
impl ResolveStrategy for VersionStrategy {
    fn name(&self) -> &'static str {
        "version"
    }

    async fn attempt(&self, r: &Resolution<'_>) -> Result<Option<Url>> {
        if !matches!(r.release, ReleaseId::Version { .. }) {
            return Ok(None);
        }
        let candidate = r.settings.cdn_candidate(&r.release.to_string(), r.target);
        Ok(r.probe(candidate).await)
    }
}

/// The identifier is an absolute `http(s)` URL.
#[derive(Debug, Default)]
pub struct DirectUrlStrategy;

#[async_trait]
impl ResolveStrategy for DirectUrlStrategy {
    fn name(&self) -> &'static str {
        "url"
    }

    async fn attempt(&self, r: &Resolution<'_>) -> Result<Option<Url>> {
        let ReleaseId::Url(url) = r.release else {
            return Ok(None);
        };
        Ok(r.probe(Some(url.clone())).await)
    }
}

/// A 40 character commit SHA: CDN uploads first, then the build graph.
#[derive(Debug, Default)]
pub struct CommitStrategy;

#[async_trait]
impl ResolveStrategy for CommitStrategy {
    fn name(&self) -> &'static str {
        "commit"
    }

    async fn attempt(&self, r: &Resolution<'_>) -> Result<Option<Url>> {
        let ReleaseId::Commit(sha) = r.release else {
            return Ok(None);
        };

        for directory in [sha.clone(), format!("{sha}-canary")] {
            let candidate = r.settings.cdn_candidate(&directory, r.target);
            if let Some(url) = r.probe(candidate).await {
                return Ok(Some(url));
            }
        }

        search_build_graph(r, sha).await
    }
}

/// Walk commit status -> builds -> first matching job -> its artifacts.
async fn search_build_graph(r: &Resolution<'_>, sha: &str) -> Result<Option<Url>> {
    let status_url = r.settings.commit_status_url(sha);
    let combined: CombinedStatus =
        r.http
            .get_json(&status_url)
            .await
            .map_err(|source| CiFetchError::CommitStatus {
                sha: sha.to_string(),
                source,
            })?;

    let builds = buildkite::build_urls(&combined.statuses, &r.settings.buildkite_host);
    if builds.is_empty() {
        debug!("No {} builds reported for {}", r.settings.buildkite_host, sha);
    }

    let archive = r.target.archive_name();
    for build_url in builds {
        let result = r
            .http
            .request(build_url.as_str(), RequestOptions::new(ResponseMode::Json))
            .await;
        if result.status == Some(404) {
            debug!("Build not found: {}", build_url);
            continue;
        }
        if let Some(source) = result.error {
            return Err(CiFetchError::Build {
                url: build_url.to_string(),
                source,
            });
        }

        let value = result.body.and_then(Body::into_json).unwrap_or_default();
        let build: Build = serde_json::from_value(value).map_err(|source| CiFetchError::Build {
            url: build_url.to_string(),
            source: HttpError::Json {
                method: "GET".to_string(),
                url: build_url.to_string(),
                source,
            },
        })?;

        let Some(job) = buildkite::select_job(&build.jobs, r.target) else {
            debug!("No build-bun job for {} in {}", r.target, build_url);
            continue;
        };
        let candidates = buildkite::count_matching_jobs(&build.jobs, r.target);
        if candidates > 1 {
            warn!(
                "{} jobs in {} match {}; using the first, {}",
                candidates,
                build_url,
                r.target,
                job.step_key.as_deref().unwrap_or_default()
            );
        }

        let Some(artifacts_url) =
            buildkite::artifacts_url(job, &build_url, &r.settings.buildkite_url)
        else {
            continue;
        };
        let artifacts: Vec<Artifact> = match r.http.get_json(artifacts_url.as_str()).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!("Skipping job {}: {}", job.id, e);
                continue;
            }
        };

        let found = artifacts
            .iter()
            .find(|artifact| artifact.name() == Some(archive.as_str()))
            .and_then(|artifact| artifacts_url.join(&artifact.url).ok());
        if found.is_some() {
            return Ok(found);
        }
        debug!("Job {} has no {}", job.id, archive);
    }

    Ok(None)
}

/// The default strategy order, cheapest first.
pub fn default_strategies() -> Vec<Box<dyn ResolveStrategy>> {
    vec![
        Box::new(ChannelStrategy),
        Box::new(VersionStrategy),
        Box::new(DirectUrlStrategy),
        Box::new(CommitStrategy),
    ]
}

pub struct ReleaseResolver {
    http: HttpClient,
    settings: ResolverSettings,
    strategies: Vec<Box<dyn ResolveStrategy>>,
}

impl ReleaseResolver {
    pub fn new(http: HttpClient, settings: ResolverSettings) -> Self {
        Self {
            http,
            settings,
            strategies: default_strategies(),
        }
    }

    /// Build the HTTP client from `config`, with credentials for the API host.
    pub fn from_config(config: &Config, ctx: Arc<Context>, runner: ProcessRunner) -> Result<Self> {
        let settings = ResolverSettings::from_config(config)?;
        let http = HttpClient::new(&config.http.user_agent, config.http.retry_config()).map_err(
            |e| CiFetchError::Config {
                path: "http".to_string(),
                message: format!("cannot build HTTP client: {e}"),
            },
        )?;

        let http = match settings.api_url.host_str() {
            Some(host) => {
                let tokens = TokenProvider::new(
                    ctx,
                    runner,
                    config.github.token_secrets.clone(),
                    config.github.token_command.clone(),
                );
                http.with_credentials(host, tokens)
            }
            None => http,
        };

        Ok(Self::new(http, settings))
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ResolveStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Resolve `release` (default: latest) for `target` to an artifact URL.
    pub async fn resolve(&self, target: &str, release: Option<&str>) -> Result<Url> {
        let target = Target::parse(target)?;
        self.resolve_target(&target, release).await
    }

    pub async fn resolve_target(&self, target: &Target, release: Option<&str>) -> Result<Url> {
        let release_id = ReleaseId::classify(release);
        info!("Resolving bun-{} at {}", target, release_id);

        let resolution = Resolution {
            http: &self.http,
            settings: &self.settings,
            target,
            release: &release_id,
        };

        for strategy in &self.strategies {
            if let Some(url) = strategy.attempt(&resolution).await? {
                info!("Resolved {} via {} strategy: {}", target, strategy.name(), url);
                return Ok(url);
            }
        }

        Err(CiFetchError::ReleaseNotFound {
            release: release
                .filter(|r| !r.trim().is_empty())
                .unwrap_or("latest")
                .to_string(),
            target: target.label().to_string(),
        })
    }
}

impl std::fmt::Debug for ReleaseResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseResolver")
            .field("settings", &self.settings)
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
