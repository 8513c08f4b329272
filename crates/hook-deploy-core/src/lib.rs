//! # Hook-Deploy Core
//!
//! Core logic for the Hook-Deploy webhook receiver: authenticates deliveries
//! from GitHub, GitLab and Bitbucket and runs a deploy program exactly once per
//! delivery, keeping the captured output as a log file.
//!
//! ## Architecture
//!
//! The crate is organised leaf-first:
//! - [`request`] normalises inbound headers and query parameters
//! - [`provider`] holds the per-provider authentication and extraction rules
//!   plus the selector that picks a provider from request metadata
//! - [`project_config`] resolves per-project paths and script environment
//! - [`executor`] runs the deploy program and places its log
//! - [`dispatcher`] wires the pieces together for a single delivery
//!
//! The HTTP layer is not part of this crate. Callers hand an
//! [`InboundRequest`] to the [`Dispatcher`] and translate the returned
//! [`Outcome`] or [`DeployError`] into a response.
//!
//! ## Usage
//!
//! ```rust
//! use hook_deploy_core::{DeliveryId, ProjectId};
//!
//! let project = ProjectId::new("demo").unwrap();
//! let delivery = DeliveryId::new("72d3162e-cc78-11e3-81ab-4c9367dc0958").unwrap();
//! assert_eq!(project.log_file_stem(&delivery), "demo-72d3162e-cc78-11e3-81ab-4c9367dc0958");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub mod dispatcher;
pub mod executor;
pub mod project_config;
pub mod provider;
pub mod request;
pub mod secret;

/// Standard result type for hook-deploy operations
pub type DeployResult<T> = Result<T, DeployError>;

/// Longest identifier accepted as a log file name component.
const MAX_IDENTIFIER_LENGTH: usize = 128;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Identifier of a configured project, taken from the `projectid` query parameter.
///
/// The value becomes part of a log file name, so it must be a single safe
/// path component: printable ASCII, no path separators, no leading dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(String);

impl ProjectId {
    /// Create new project ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, DeployError> {
        let value = value.into();
        validate_path_component("projectid", &value)?;
        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name stem shared by the log and error log of a delivery.
    pub fn log_file_stem(&self, delivery_id: &DeliveryId) -> String {
        format!("{}-{}", self.0, delivery_id.as_str())
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider-supplied identifier of a single webhook delivery.
///
/// Together with the [`ProjectId`] it forms the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(String);

impl DeliveryId {
    /// Create new delivery ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, DeployError> {
        let value = value.into();
        validate_path_component("delivery_id", &value)?;
        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_path_component(field: &str, value: &str) -> Result<(), DeployError> {
    let invalid = |message: &str| DeployError::InvalidIdentifier {
        field: field.to_string(),
        message: message.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }

    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(invalid("exceeds 128 characters"));
    }

    if value.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_graphic() && c != '/' && c != '\\')
    {
        return Err(invalid(
            "must be printable ASCII without whitespace or path separators",
        ));
    }

    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Classification of errors for logging and response mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Malformed or incomplete request
    Validation,
    /// Authentication failures; never include secret material
    Security,
    /// Operator configuration is unusable
    Configuration,
    /// The deploy program could not run or reported failure
    Execution,
    /// Local filesystem or runtime failure
    Internal,
}

/// Every way handling a single delivery can fail.
///
/// All variants are terminal for the current request; nothing is retried
/// internally.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Missing HTTP '{name}' header")]
    MissingHeader { name: String },

    #[error("Missing '{name}' query parameter")]
    MissingParameter { name: String },

    #[error("Unsupported content type '{content_type}'")]
    UnsupportedContentType { content_type: String },

    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Unsupported User-Agent '{user_agent}'")]
    UnsupportedProvider { user_agent: String },

    #[error("Unsupported event '{event}'")]
    UnsupportedEvent { event: String },

    #[error("Invalid {field}: {message}")]
    InvalidIdentifier { field: String, message: String },

    #[error("Invalid configuration for project '{project_id}': {message}")]
    InvalidConfig { project_id: String, message: String },

    #[error("Failed to start deploy program '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Deployment failed with exit status {}", display_exit_code(.exit_code))]
    DeploymentFailed {
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Delivery is already being deployed (lock '{}')", .lock_path.display())]
    DeliveryInProgress { lock_path: PathBuf },

    #[error("Failed to write log '{}': {source}", .path.display())]
    LogCommit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn display_exit_code(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => code.to_string(),
        None => "unknown (terminated by signal)".to_string(),
    }
}

impl DeployError {
    /// Get error category for monitoring
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::MissingHeader { .. } => ErrorCategory::Validation,
            Self::MissingParameter { .. } => ErrorCategory::Validation,
            Self::UnsupportedContentType { .. } => ErrorCategory::Validation,
            Self::UnsupportedProvider { .. } => ErrorCategory::Validation,
            Self::UnsupportedEvent { .. } => ErrorCategory::Validation,
            Self::InvalidIdentifier { .. } => ErrorCategory::Validation,
            Self::Auth { .. } => ErrorCategory::Security,
            Self::InvalidConfig { .. } => ErrorCategory::Configuration,
            Self::Spawn { .. } => ErrorCategory::Execution,
            Self::DeploymentFailed { .. } => ErrorCategory::Execution,
            Self::DeliveryInProgress { .. } => ErrorCategory::Execution,
            Self::LogCommit { .. } => ErrorCategory::Internal,
        }
    }

    /// HTTP status code the calling layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MissingHeader { .. }
            | Self::MissingParameter { .. }
            | Self::UnsupportedProvider { .. }
            | Self::InvalidIdentifier { .. } => 400,
            Self::Auth { .. } => 403,
            Self::UnsupportedContentType { .. } => 415,
            Self::UnsupportedEvent { .. } => 422,
            Self::DeliveryInProgress { .. } => 409,
            Self::InvalidConfig { .. }
            | Self::Spawn { .. }
            | Self::DeploymentFailed { .. }
            | Self::LogCommit { .. } => 500,
        }
    }

    /// Captured deploy output, when the error carries any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::DeploymentFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

// Re-export commonly used types
pub use dispatcher::{Dispatcher, Outcome, RuntimeSnapshot};
pub use executor::{DeployCommand, DeploymentExecutor, DeploymentRun, RunStatus};
pub use project_config::{
    ConfigResolver, EnvValue, ProjectConfig, ProjectEntry, ProjectPaths, ProjectTable,
    ProjectTableError, ResolverDefaults, SCRIPT_ENV_PREFIX,
};
pub use provider::{EventKind, ProviderIdentity, WebhookEvent};
pub use request::{HeaderMap, InboundRequest, QueryParams};
pub use secret::WebhookSecret;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
