use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};
use url::Url;

use crate::config::Config;
use crate::context::Context;
use crate::error::{CiFetchError, Result};
use crate::extract;
use crate::http::{RequestOptions, ResponseMode};
use crate::process::ProcessRunner;
use crate::resolver::ReleaseResolver;
use crate::target::Target;

/// A downloaded and unpacked artifact.
///
/// The files live in a temporary directory that is removed on drop; copy
/// the executable out before letting this go.
#[derive(Debug)]
pub struct FetchedArtifact {
    dir: TempDir,
    executable: PathBuf,
    url: Url,
    sha256: String,
}

impl FetchedArtifact {
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// SHA-256 of the downloaded archive, hex encoded.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Debug)]
pub struct ArtifactFetcher {
    resolver: ReleaseResolver,
    runner: ProcessRunner,
}

impl ArtifactFetcher {
    pub fn new(resolver: ReleaseResolver, runner: ProcessRunner) -> Self {
        Self { resolver, runner }
    }

    pub fn from_config(config: &Config, ctx: Arc<Context>) -> Result<Self> {
        let runner = ProcessRunner::from_config(ctx.clone(), &config.process);
        let resolver = ReleaseResolver::from_config(config, ctx, runner.clone())?;
        Ok(Self::new(resolver, runner))
    }

    pub fn resolver(&self) -> &ReleaseResolver {
        &self.resolver
    }

    /// Resolve, download and unpack `release` for `target`, and locate the
    /// `bun` executable inside it.
    pub async fn fetch(&self, target: &str, release: Option<&str>) -> Result<FetchedArtifact> {
        let target = Target::parse(target)?;
        let url = self.resolver.resolve_target(&target, release).await?;

        let dir = tempfile::Builder::new().prefix("bun-download-").tempdir()?;
        let archive = dir.path().join("bun.zip");

        info!("Downloading {}", url);
        self.resolver
            .http()
            .request_safe(
                url.as_str(),
                RequestOptions::new(ResponseMode::File(archive.clone())),
            )
            .await
            .map_err(|source| CiFetchError::Download {
                target: target.label().to_string(),
                release: release
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or("latest")
                    .to_string(),
                source,
            })?;

        let sha256 = extract::calculate_sha256(&archive)?;
        debug!("{} sha256:{}", archive.display(), sha256);

        let extracted =
            extract::extract_archive(&self.runner, &archive, &dir.path().join("extracted")).await?;
        let executable = extract::find_executable(&extracted)?;
        extract::make_executable(&executable)?;
        info!("Extracted {}", executable.display());

        Ok(FetchedArtifact {
            dir,
            executable,
            url,
            sha256,
        })
    }
}
