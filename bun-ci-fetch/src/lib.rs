//! # bun-ci-fetch
//!
//! Locate and download Bun builds from inside CI pipelines.
//!
//! ## Overview
//!
//! Given a platform string and a release identifier, `bun-ci-fetch` finds the
//! matching `bun-{os}-{arch}[...].zip` artifact, downloads it, unpacks it and
//! hands back the path of the `bun` executable inside.
//!
//! Release identifiers may be:
//!
//! - a channel: `latest` (or `stable`, or nothing) and `canary`
//! - a version: `1.1.13`, `v1.1.13` or `bun-v1.1.13`
//! - a direct `http(s)` URL to an archive
//! - a full commit SHA, found either on the CDN or by walking the
//!   Buildkite builds reported on that commit
//!
//! ## Usage
//!
//! ```bash
//! # Print the canonical label for this host or a loose platform string
//! bun-ci-fetch target x86_64-apple-darwin
//!
//! # Resolve a release to a URL
//! bun-ci-fetch resolve canary --target linux-x64-baseline
//!
//! # Download a commit build into ./bin
//! bun-ci-fetch fetch 0123456789abcdef0123456789abcdef01234567 --out-dir bin
//! ```
//!
//! ## Configuration
//!
//! Endpoints, retry policy and token sources can be overridden in
//! `.config/bun-ci-fetch.toml`; see [`config::Config`].

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Configuration file handling
pub mod config;

/// Shared per-session state: file contents and the resolved API token
pub mod context;

/// Error types and error handling utilities
pub mod error;

/// Archive extraction and executable lookup
pub mod extract;

/// Download and unpack a resolved release
pub mod fetcher;

/// HTTP client with linear retry and credential injection
pub mod http;

/// Symbolic names for Windows exit codes
pub mod ntstatus;

/// Subprocess execution with normalized outcomes
pub mod process;

/// Commit status and Buildkite build graph models
pub mod buildkite;

/// Release identifier classification
pub mod release;

/// Strategy chain turning a release into an artifact URL
pub mod resolver;

/// Network retry logic with linear backoff
pub mod retry;

/// Platform target parsing
pub mod target;

/// API token discovery
pub mod token;

pub use error::{CiFetchError, Result};
pub use fetcher::{ArtifactFetcher, FetchedArtifact};
pub use resolver::ReleaseResolver;
pub use target::Target;
