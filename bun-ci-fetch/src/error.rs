use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiFetchError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("Unrecognized {part} in target '{input}'. Expected something like linux-x64, darwin-aarch64 or windows-x64-baseline")]
    InvalidTarget { input: String, part: &'static str },

    #[error("Failed to find release: {release} (target: {target})")]
    ReleaseNotFound { release: String, target: String },

    #[error("Failed to fetch commit status: {sha}")]
    CommitStatus {
        sha: String,
        #[source]
        source: HttpError,
    },

    #[error("Failed to fetch build: {url}")]
    Build {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("Failed to download target: {target} at {release}")]
    Download {
        target: String,
        release: String,
        #[source]
        source: HttpError,
    },

    #[error("Archive extraction failed for {file}: {reason}")]
    ArchiveExtraction { file: String, reason: String },

    #[error("Failed to find bun executable in {dir}")]
    ExecutableNotFound { dir: String },

    #[error("Configuration error at {path}: {message}")]
    Config { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, CiFetchError>;

/// Failure of a single [`crate::http::HttpClient`] call, after retries.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Fetch failed: {method} {url}")]
    Transport {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Fetch failed: {method} {url}: {status} {status_text}")]
    Status {
        method: String,
        url: String,
        status: u16,
        status_text: String,
        explanation: String,
    },

    #[error("Fetch failed: {method} {url}: could not read response body")]
    Body {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Fetch failed: {method} {url}: invalid JSON")]
    Json {
        method: String,
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Fetch failed: {method} {url}: could not write {path}")]
    Write {
        method: String,
        url: String,
        path: String,
        #[source]
        source: io::Error,
    },
}

impl HttpError {
    /// HTTP status of the last response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure of a subprocess observed by [`crate::process::ProcessRunner`].
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Command killed with {signal}: {command}")]
    Killed {
        signal: String,
        command: String,
        #[source]
        cause: Option<SpawnCause>,
    },

    #[error("Command exited with code {code}: {command}")]
    Exited {
        code: String,
        command: String,
        #[source]
        cause: Option<SpawnCause>,
    },
}

impl SpawnError {
    pub fn cause(&self) -> Option<&SpawnCause> {
        match self {
            SpawnError::Killed { cause, .. } | SpawnError::Exited { cause, .. } => cause.as_ref(),
        }
    }

    /// True when the executable itself could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(self.cause(), Some(SpawnCause::Io(e)) if e.kind() == io::ErrorKind::NotFound)
    }
}

/// Most specific explanation available for a failed command.
#[derive(Error, Debug)]
pub enum SpawnCause {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Output(String),
}
