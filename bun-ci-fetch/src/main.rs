use anyhow::{Context as _, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use bun_ci_fetch::cli::{Cli, Command};
use bun_ci_fetch::config::Config;
use bun_ci_fetch::context::Context;
use bun_ci_fetch::process::ProcessRunner;
use bun_ci_fetch::{extract, ArtifactFetcher, ReleaseResolver, Target};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the result.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = if cli.config.exists() {
        cli.config.clone()
    } else {
        Config::default_path()
    };
    let config = Config::load(&config_path).with_context(|| {
        format!("Failed to load configuration from {}", config_path.display())
    })?;
    let ctx = Arc::new(Context::new());

    match cli.command {
        Command::Target { input } => {
            let target = match input {
                Some(input) => Target::parse(&input)?,
                None => Target::current()?,
            };
            println!("{target}");
        }
        Command::Resolve(args) => {
            let runner = ProcessRunner::from_config(ctx.clone(), &config.process);
            let resolver = ReleaseResolver::from_config(&config, ctx, runner)?;
            let url = resolver
                .resolve(&args.target()?, args.release.as_deref())
                .await?;
            println!("{url}");
        }
        Command::Fetch { release, out_dir } => {
            let fetcher = ArtifactFetcher::from_config(&config, ctx)?;
            let artifact = fetcher
                .fetch(&release.target()?, release.release.as_deref())
                .await?;
            tracing::info!("Archive sha256: {}", artifact.sha256());

            let installed = install_executable(artifact.executable(), &out_dir)?;
            println!("{}", installed.display());
        }
    }

    Ok(())
}

/// Copy the extracted executable into `out_dir`, keeping its file name.
fn install_executable(source: &Path, out_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let name = source
        .file_name()
        .with_context(|| format!("Invalid executable path: {}", source.display()))?;
    let dest_path = out_dir.join(name);

    tracing::info!("Installing {} to {}", name.to_string_lossy(), dest_path.display());
    fs::copy(source, &dest_path)
        .with_context(|| format!("Failed to copy {} to {}", source.display(), dest_path.display()))?;
    extract::make_executable(&dest_path)?;

    Ok(dest_path)
}
