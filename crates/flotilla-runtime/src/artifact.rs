//! Config artifacts: short-lived, credential-bearing runtime CLI config.
//!
//! An artifact is acquired right before a launch and released right after
//! it. When credentials resolve, the CLI writes its config into a fresh
//! temporary directory that the artifact owns; otherwise the artifact
//! points at the ambient default config and owns nothing.
//!
//! Key material reaches the config command through its environment only,
//! never through argv.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flotilla_registry::{CredentialStore, Secret};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::command::{CommandRunner, Invocation};
use crate::error::{ArtifactError, CleanupError};

/// Points the CLI at its config directory.
pub const CONFIG_ENV: &str = "HYPER_CONFIG";
pub const ACCESS_KEY_ENV: &str = "HYPER_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "HYPER_SECRET_KEY";

/// A config location scoped to one launch attempt.
///
/// Dropping an owned artifact without calling [`ConfigArtifact::release`]
/// still removes its directory, but swallows any error doing so.
#[derive(Debug)]
pub enum ConfigArtifact {
    /// Use the CLI's own configuration.
    Ambient { path: PathBuf },
    /// Config written into a directory this artifact deletes on release.
    Owned { dir: TempDir },
}

impl ConfigArtifact {
    /// The ambient artifact at the CLI's default location.
    pub fn ambient() -> Self {
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        ConfigArtifact::Ambient {
            path: home.join(".hyper").join("config.json"),
        }
    }

    /// Path to pass as `--config`.
    pub fn path(&self) -> &Path {
        match self {
            ConfigArtifact::Ambient { path } => path,
            ConfigArtifact::Owned { dir } => dir.path(),
        }
    }

    pub fn is_ambient(&self) -> bool {
        matches!(self, ConfigArtifact::Ambient { .. })
    }

    /// Delete the owned directory tree. A no-op for ambient artifacts.
    pub fn release(self) -> Result<(), CleanupError> {
        let ConfigArtifact::Owned { dir } = self else {
            return Ok(());
        };
        let path = dir.path().to_path_buf();
        dir.close().map_err(|source| CleanupError {
            path: path.clone(),
            source,
        })?;
        if path.exists() {
            return Err(CleanupError {
                path,
                source: std::io::Error::other("directory still present after removal"),
            });
        }
        debug!(?path, "config artifact released");
        Ok(())
    }
}

/// Everything needed to mint config artifacts for one cloud.
#[derive(Clone)]
pub struct ArtifactSource {
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn CredentialStore>,
    cli: String,
    server: String,
    credentials_id: Option<String>,
    /// Cloud name the credentials are looked up for.
    scope: String,
}

impl ArtifactSource {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn CredentialStore>,
        cli: impl Into<String>,
        server: impl Into<String>,
        credentials_id: Option<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            store,
            cli: cli.into(),
            server: server.into(),
            credentials_id,
            scope: scope.into(),
        }
    }

    /// Resolve credentials and write a fresh config, or fall back to the
    /// ambient config when there is nothing to resolve.
    pub async fn acquire(&self) -> Result<ConfigArtifact, ArtifactError> {
        let id = self.credentials_id.as_deref().unwrap_or_default();
        let Some(creds) = self.store.lookup(id, &self.scope) else {
            debug!(credentials_id = %id, "no credentials resolved, using ambient config");
            return Ok(ConfigArtifact::ambient());
        };

        let dir = tempfile::Builder::new()
            .prefix("flotilla-cfg")
            .tempdir()
            .map_err(ArtifactError::TempDir)?;

        let invocation = Invocation::new(&self.cli)
            .arg("config")
            .arg(&self.server)
            .env(CONFIG_ENV, Secret::new(dir.path().to_string_lossy()))
            .env(ACCESS_KEY_ENV, Secret::new(creds.access_key))
            .env(SECRET_KEY_ENV, creds.secret_key);

        let output = self
            .runner
            .run(&invocation)
            .await
            .map_err(ArtifactError::Spawn)?;

        if !output.is_success() {
            warn!(
                server = %self.server,
                status = ?output.status,
                stderr = %output.stderr.trim(),
                "config command failed"
            );
            return Err(ArtifactError::Write {
                status: output.status,
                stderr: output.stderr,
            });
        }

        debug!(path = ?dir.path(), server = %self.server, "config artifact written");
        Ok(ConfigArtifact::Owned { dir })
    }
}
