//! # Service Settings
//!
//! Settings are loaded once per process. Sources, later ones overriding
//! earlier ones:
//!
//! 1. `/etc/hook-deploy/settings.yaml` (optional)
//! 2. `./config/settings.yaml` (optional)
//! 3. the file given with `--config` (required when given)
//! 4. environment variables prefixed `HOOK_DEPLOY__`, e.g.
//!    `HOOK_DEPLOY__DEPLOY__PROGRAM=/usr/local/bin/deploy`
//!
//! Every field has a default, so no source is mandatory.

use hook_deploy_core::{
    secret::SecretError, ConfigResolver, DeployCommand, DeploymentExecutor, ProjectTable,
    ProjectTableError, ResolverDefaults, RuntimeSnapshot, WebhookSecret,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SYSTEM_SETTINGS: &str = "/etc/hook-deploy/settings";
const LOCAL_SETTINGS: &str = "config/settings";
const ENV_PREFIX: &str = "HOOK_DEPLOY";

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Installation directory; relative paths below are resolved against it.
    pub base_dir: PathBuf,

    /// File holding the shared webhook secret. Defaults to `<base_dir>/SECRET`.
    pub secret_file: Option<PathBuf>,

    /// Project table (YAML or JSON). No table means defaults for every project.
    pub projects_file: Option<PathBuf>,

    pub deploy: DeploySettings,

    /// Append request headers to error responses.
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            secret_file: None,
            projects_file: None,
            deploy: DeploySettings::default(),
            debug: false,
        }
    }
}

/// The deploy program and its leading arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Defaults to `<base_dir>/deploy`.
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
}

/// Errors while loading settings or building the runtime snapshot
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Cannot determine working directory: {0}")]
    WorkingDirectory(#[source] std::io::Error),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    ProjectTable(#[from] ProjectTableError),
}

impl Settings {
    /// Load settings from the standard sources plus an optional explicit file.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Load`] when a required file is missing or a
    /// source cannot be parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name(SYSTEM_SETTINGS)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name(LOCAL_SETTINGS)
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path).required(true));
            info!(path = %path.display(), "Loading settings from explicit path");
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// `base_dir` as an absolute path.
    pub fn absolute_base_dir(&self) -> Result<PathBuf, SettingsError> {
        if self.base_dir.is_absolute() {
            return Ok(self.base_dir.clone());
        }
        let cwd = std::env::current_dir().map_err(SettingsError::WorkingDirectory)?;
        Ok(cwd.join(&self.base_dir))
    }

    /// Read the secret and project table and assemble the shared state.
    ///
    /// # Errors
    ///
    /// Fails when the secret file is missing, unreadable or empty, or when a
    /// configured project table exists but cannot be parsed.
    pub fn build_snapshot(&self) -> Result<RuntimeSnapshot, SettingsError> {
        let base_dir = self.absolute_base_dir()?;

        let secret_path = match &self.secret_file {
            Some(path) => base_dir.join(path),
            None => base_dir.join("SECRET"),
        };
        let secret = WebhookSecret::load_from_file(&secret_path)?;

        let table = match &self.projects_file {
            Some(path) => load_table(&base_dir.join(path))?,
            None => None,
        };

        let program = match &self.deploy.program {
            Some(program) => base_dir.join(program),
            None => base_dir.join("deploy"),
        };
        let command = DeployCommand::new(program).with_args(self.deploy.args.iter().cloned());

        info!(
            base_dir = %base_dir.display(),
            program = %command.program.display(),
            projects = table.as_ref().map_or(0, ProjectTable::len),
            "Runtime snapshot ready"
        );

        Ok(RuntimeSnapshot {
            secret,
            resolver: ConfigResolver::new(ResolverDefaults::from_base_dir(&base_dir), table),
            executor: DeploymentExecutor::new(command),
        })
    }
}

fn load_table(path: &Path) -> Result<Option<ProjectTable>, SettingsError> {
    match ProjectTable::load_from_file(path) {
        Ok(table) => Ok(Some(table)),
        Err(ProjectTableError::FileNotFound { path }) => {
            warn!(path = %path, "Project table not found; using defaults for every project");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
