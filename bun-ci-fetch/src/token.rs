use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::Context;
use crate::process::{ProcessRunner, SpawnOptions};

/// Source of named secrets, such as a CI provider's secret store.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Secrets read from environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|value| !value.trim().is_empty())
    }
}

/// Resolves the bearer token for the trusted API host.
///
/// Named secrets are consulted first, then the token command (e.g.
/// `gh auth token`). The outcome, including "no token", is cached in the
/// [`Context`] for the rest of the session.
#[derive(Clone)]
pub struct TokenProvider {
    ctx: Arc<Context>,
    secrets: Arc<dyn SecretStore>,
    secret_names: Vec<String>,
    command: Vec<String>,
    runner: ProcessRunner,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("secret_names", &self.secret_names)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    pub fn new(
        ctx: Arc<Context>,
        runner: ProcessRunner,
        secret_names: Vec<String>,
        command: Vec<String>,
    ) -> Self {
        Self {
            ctx,
            secrets: Arc::new(EnvSecretStore),
            secret_names,
            command,
            runner,
        }
    }

    pub fn with_secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    pub async fn token(&self) -> Option<String> {
        self.ctx
            .token_cell()
            .get_or_init(|| self.resolve())
            .await
            .clone()
    }

    async fn resolve(&self) -> Option<String> {
        for name in &self.secret_names {
            if let Some(token) = self.secrets.get(name) {
                debug!("Using API token from secret {}", name);
                return Some(token.trim().to_string());
            }
        }

        if self.command.is_empty() {
            return None;
        }

        match self.runner.spawn_safe(&self.command, &SpawnOptions::new()).await {
            Ok(result) => {
                let token = result.stdout.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) => {
                warn!("No API token available: {}", e);
                None
            }
        }
    }
}
