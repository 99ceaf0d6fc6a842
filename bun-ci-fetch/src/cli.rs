use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "bun-ci-fetch",
    version,
    about = "Resolve and download Bun builds for CI",
    long_about = None
)]
pub struct Cli {
    /// Configuration file path
    #[clap(long, global = true, default_value = ".config/bun-ci-fetch.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[clap(long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the normalized label of a platform string
    Target {
        /// Platform string (e.g., linux-x64, aarch64-apple-darwin); defaults to this host
        input: Option<String>,
    },

    /// Print the artifact URL for a release
    Resolve(ReleaseArgs),

    /// Download a release and copy its bun executable into a directory
    Fetch {
        #[clap(flatten)]
        release: ReleaseArgs,

        /// Directory to copy the executable into
        #[clap(short = 'o', long, default_value = "bin")]
        out_dir: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct ReleaseArgs {
    /// latest, canary, a version (1.1.13, bun-v1.1.13), a URL or a commit SHA
    #[clap(value_name = "RELEASE")]
    pub release: Option<String>,

    /// Target platform (e.g., linux-x64-baseline); defaults to this host
    #[clap(short = 'T', long, env = "BUN_CI_TARGET")]
    pub target: Option<String>,
}

impl ReleaseArgs {
    /// The explicit target, or the label of the running host.
    pub fn target(&self) -> crate::error::Result<String> {
        match &self.target {
            Some(target) => Ok(target.clone()),
            None => Ok(crate::target::Target::current()?.label().to_string()),
        }
    }
}
