//! # Project Configuration
//!
//! Maps a project identifier to the directories and script environment used
//! for its deployments. The project table is loaded once at startup and is
//! immutable afterwards; projects without an entry fall back to the
//! process-wide defaults.
//!
//! ## Table format
//!
//! ```yaml
//! demo:
//!   paths:
//!     log: /var/log/hook-deploy
//!     errlog: /var/log/hook-deploy/failed
//!     hooks: /srv/hooks/demo
//!     deploy: /srv/www/demo
//!   scriptEnv:
//!     branch: main
//!     composer: false
//! ```

use crate::{DeliveryId, DeployError, ProjectId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix for every variable the deploy program receives from Hook-Deploy.
pub const SCRIPT_ENV_PREFIX: &str = "DEPLOY";

// ============================================================================
// Table Types
// ============================================================================

/// Project ID to settings mapping, as read from the project table file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectTable {
    projects: HashMap<String, ProjectEntry>,
}

/// Settings for one project. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    #[serde(default)]
    pub paths: ProjectPaths,

    /// Variables exposed to the deploy program as `DEPLOY_<NAME>`.
    #[serde(default, rename = "scriptEnv", alias = "script_env")]
    pub script_env: BTreeMap<String, EnvValue>,
}

/// Directory overrides. When set, each must be an absolute path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPaths {
    #[serde(default)]
    pub log: Option<PathBuf>,
    #[serde(default)]
    pub errlog: Option<PathBuf>,
    #[serde(default)]
    pub hooks: Option<PathBuf>,
    #[serde(default)]
    pub deploy: Option<PathBuf>,
}

/// Scalar value of a script environment entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

impl EnvValue {
    /// Render the value as an environment variable.
    ///
    /// `false` and null become `0`, `true` becomes `1`.
    pub fn to_env_string(&self) -> String {
        match self {
            Self::Bool(true) => "1".to_string(),
            Self::Bool(false) | Self::Null => "0".to_string(),
            Self::Integer(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::String(s) => s.clone(),
        }
    }
}

impl ProjectTable {
    /// Create a table from `(project id, entry)` pairs
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, ProjectEntry)>,
        K: Into<String>,
    {
        Self {
            projects: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Load the table from a YAML or JSON file.
    ///
    /// The format is chosen by extension (`.yaml`/`.yml` or `.json`); other
    /// extensions are tried as JSON first, then YAML.
    ///
    /// # Errors
    /// - `ProjectTableError::FileNotFound` - file missing
    /// - `ProjectTableError::Parse` - unreadable file or invalid syntax
    pub fn load_from_file(path: &Path) -> Result<Self, ProjectTableError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProjectTableError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => ProjectTableError::Parse {
                message: format!("Failed to read '{}': {e}", path.display()),
            },
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let parsed: Result<Self, (&str, String)> = match extension.as_deref() {
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&contents).map_err(|e| ("YAML", e.to_string()))
            }
            Some("json") => serde_json::from_str(&contents).map_err(|e| ("JSON", e.to_string())),
            _ => serde_json::from_str(&contents)
                .or_else(|_| serde_yaml::from_str(&contents))
                .map_err(|e| ("JSON or YAML", e.to_string())),
        };

        parsed.map_err(|(format, reason)| ProjectTableError::Parse {
            message: format!("'{}' is not valid {format}: {reason}", path.display()),
        })
    }

    /// Entry for a project, if configured
    pub fn get(&self, project_id: &str) -> Option<&ProjectEntry> {
        self.projects.get(project_id)
    }

    /// Configured project IDs, sorted
    pub fn project_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.projects.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of configured projects
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Whether no projects are configured
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Errors while loading the project table
#[derive(Debug, thiserror::Error)]
pub enum ProjectTableError {
    #[error("Project table not found: {path}")]
    FileNotFound { path: String },

    #[error("Project table parse error: {message}")]
    Parse { message: String },
}

// ============================================================================
// Resolution
// ============================================================================

/// Directories used when a project has no override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverDefaults {
    pub deploy_root: PathBuf,
    pub log_root: PathBuf,
    pub err_log_root: PathBuf,
    pub hooks_root: PathBuf,
}

impl ResolverDefaults {
    /// Standard layout under an installation directory: deploy in the
    /// directory itself, logs and error logs in `log/`, hooks in `hooks/`.
    pub fn from_base_dir(base_dir: &Path) -> Self {
        Self {
            deploy_root: base_dir.to_path_buf(),
            log_root: base_dir.join("log"),
            err_log_root: base_dir.join("log"),
            hooks_root: base_dir.join("hooks"),
        }
    }
}

/// Resolved, read-only execution settings for one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    pub project_id: ProjectId,
    pub deploy_root: PathBuf,
    pub log_root: PathBuf,
    pub err_log_root: PathBuf,
    pub hooks_root: PathBuf,
    pub script_env: BTreeMap<String, EnvValue>,
    /// `log_root/{project}-{delivery}.log`
    pub log_path: PathBuf,
    /// `err_log_root/{project}-{delivery}.err`
    pub err_log_path: PathBuf,
}

impl ProjectConfig {
    /// Variables added to the deploy program's environment.
    ///
    /// Always contains `DEPLOY_HOOKSROOT`; each script environment entry
    /// follows as `DEPLOY_<NAME>` with the name uppercased and any character
    /// outside `[A-Z0-9_]` replaced by `_`.
    pub fn script_environment(&self) -> Vec<(String, String)> {
        let mut vars = Vec::with_capacity(self.script_env.len() + 1);
        vars.push((
            format!("{SCRIPT_ENV_PREFIX}_HOOKSROOT"),
            self.hooks_root.display().to_string(),
        ));
        for (name, value) in &self.script_env {
            vars.push((
                format!("{SCRIPT_ENV_PREFIX}_{}", env_var_suffix(name)),
                value.to_env_string(),
            ));
        }
        vars
    }
}

fn env_var_suffix(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Resolves [`ProjectConfig`] values from defaults and the optional table.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    defaults: ResolverDefaults,
    table: Option<ProjectTable>,
}

impl ConfigResolver {
    /// Create a resolver; `table` is `None` when no table file is configured.
    pub fn new(defaults: ResolverDefaults, table: Option<ProjectTable>) -> Self {
        Self { defaults, table }
    }

    /// The defaults applied to projects without overrides
    pub fn defaults(&self) -> &ResolverDefaults {
        &self.defaults
    }

    /// The loaded project table, if any
    pub fn table(&self) -> Option<&ProjectTable> {
        self.table.as_ref()
    }

    /// Resolve the settings for a delivery to a project.
    ///
    /// A missing table or missing project entry is not an error: the
    /// defaults apply unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidConfig`] when an overriding path is not
    /// absolute.
    pub fn resolve(
        &self,
        project_id: &ProjectId,
        delivery_id: &DeliveryId,
    ) -> Result<ProjectConfig, DeployError> {
        let mut deploy_root = self.defaults.deploy_root.clone();
        let mut log_root = self.defaults.log_root.clone();
        let mut err_log_root = self.defaults.err_log_root.clone();
        let mut hooks_root = self.defaults.hooks_root.clone();
        let mut script_env = BTreeMap::new();

        match self.table.as_ref().and_then(|t| t.get(project_id.as_str())) {
            Some(entry) => {
                let paths = &entry.paths;
                override_path(project_id, "log", &paths.log, &mut log_root)?;
                override_path(project_id, "errlog", &paths.errlog, &mut err_log_root)?;
                override_path(project_id, "hooks", &paths.hooks, &mut hooks_root)?;
                override_path(project_id, "deploy", &paths.deploy, &mut deploy_root)?;
                script_env = entry.script_env.clone();
            }
            None => {
                debug!(project_id = %project_id, "No project entry; using defaults");
            }
        }

        let stem = project_id.log_file_stem(delivery_id);
        let log_path = log_root.join(format!("{stem}.log"));
        let err_log_path = err_log_root.join(format!("{stem}.err"));

        Ok(ProjectConfig {
            project_id: project_id.clone(),
            deploy_root,
            log_root,
            err_log_root,
            hooks_root,
            script_env,
            log_path,
            err_log_path,
        })
    }

    /// Check every table entry, returning one error per invalid project.
    pub fn validate_table(&self) -> Vec<DeployError> {
        let Some(table) = &self.table else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        for id in table.project_ids() {
            let result = ProjectId::new(id).and_then(|project_id| {
                // Any well-formed delivery ID works; only the paths are checked.
                let sample_delivery = DeliveryId::new("validation")?;
                self.resolve(&project_id, &sample_delivery)
            });
            if let Err(e) = result {
                errors.push(e);
            }
        }
        errors
    }
}

fn override_path(
    project_id: &ProjectId,
    key: &str,
    configured: &Option<PathBuf>,
    target: &mut PathBuf,
) -> Result<(), DeployError> {
    if let Some(path) = configured {
        if !path.is_absolute() {
            return Err(DeployError::InvalidConfig {
                project_id: project_id.to_string(),
                message: format!("paths.{key} '{}' must be absolute", path.display()),
            });
        }
        *target = path.clone();
    }
    Ok(())
}

#[cfg(test)]
#[path = "project_config_tests.rs"]
mod tests;
