//! # Hook-Deploy CLI
//!
//! Front end for the Hook-Deploy core. Settings, the secret and the project
//! table are loaded once per invocation, then a single delivery is handled:
//!
//! - `cgi`: run as a CGI program behind a web server; the request comes from
//!   the CGI environment and stdin, the response goes to stdout
//! - `handle`: hand-craft a delivery from flags, for testing hooks locally
//! - `check-config`: validate settings, secret and every project entry

use clap::{Parser, Subcommand};
use hook_deploy_core::{
    DeployError, Dispatcher, HeaderMap, InboundRequest, Outcome, QueryParams,
};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod settings;

pub use settings::{DeploySettings, Settings, SettingsError};

const DEFAULT_LOG_FILTER: &str = "hook_deploy_core=info,hook_deploy_cli=info";

// ============================================================================
// CLI Structure
// ============================================================================

/// Hook-Deploy - run a deploy program for verified webhook deliveries
#[derive(Debug, Parser)]
#[command(name = "hook-deploy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a deploy program once per verified webhook delivery")]
pub struct Cli {
    /// Settings file path
    #[arg(short, long, env = "HOOK_DEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Handle one delivery from the CGI environment and stdin
    Cgi,

    /// Handle one delivery described on the command line
    Handle {
        /// Request header, repeatable
        #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
        headers: Vec<String>,

        /// Query parameter, repeatable
        #[arg(short, long = "query", value_name = "KEY=VALUE")]
        query: Vec<String>,

        /// Request body file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        body: String,
    },

    /// Validate settings, secret and project table
    CheckConfig,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] SettingsError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Deploy(#[from] DeployError),

    #[error("{count} project(s) have invalid configuration")]
    InvalidProjects { count: usize },
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Deploy(_) => 2,
            Self::InvalidProjects { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(cli.json_logs);

    match cli.command {
        Commands::Cgi => execute_cgi_command(cli.config.as_deref()).await,
        Commands::Handle {
            headers,
            query,
            body,
        } => {
            let settings = Settings::load(cli.config.as_deref())?;
            execute_handle_command(&settings, &headers, &query, &body).await
        }
        Commands::CheckConfig => {
            let settings = Settings::load(cli.config.as_deref())?;
            execute_check_config_command(&settings)
        }
    }
}

/// Install the global tracing subscriber, writing to stderr.
///
/// `RUST_LOG` overrides the default filter.
fn initialize_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn execute_cgi_command(config: Option<&Path>) -> Result<(), CliError> {
    let mut body = Vec::new();
    tokio::io::stdin().read_to_end(&mut body).await?;
    let request = InboundRequest::from_cgi_env(lossy_env(std::env::vars_os()), body);

    // Startup problems are reported to the web server as a 500, like any
    // other failure.
    let prepared = Settings::load(config).and_then(|settings| {
        let snapshot = settings.build_snapshot()?;
        Ok((settings, snapshot))
    });
    let (settings, snapshot) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            error!(error = %e, "Failed to prepare runtime");
            std::io::stdout().write_all(startup_error_response(&e).as_bytes())?;
            return Ok(());
        }
    };

    let result = Dispatcher::new(Arc::new(snapshot)).handle(&request).await;

    log_result(&result);
    let response = cgi_response(&result, &request.headers, settings.debug);
    std::io::stdout().write_all(response.as_bytes())?;
    Ok(())
}

async fn execute_handle_command(
    settings: &Settings,
    headers: &[String],
    query: &[String],
    body: &str,
) -> Result<(), CliError> {
    let headers = parse_headers(headers)?;
    let query = parse_query(query)?;
    let body = if body == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await?;
        buf
    } else {
        tokio::fs::read(body).await?
    };

    let snapshot = settings.build_snapshot()?;
    let dispatcher = Dispatcher::new(Arc::new(snapshot));
    let request = InboundRequest::new(headers, query, body);

    let result = dispatcher.handle(&request).await;
    log_result(&result);

    let mut stdout = std::io::stdout();
    match result {
        Ok(outcome) => {
            stdout.write_all(outcome.response_body().as_bytes())?;
            Ok(())
        }
        Err(e) => {
            stdout.write_all(error_body(&e, None).as_bytes())?;
            Err(e.into())
        }
    }
}

fn execute_check_config_command(settings: &Settings) -> Result<(), CliError> {
    let snapshot = settings.build_snapshot()?;

    let project_count = snapshot.resolver.table().map_or(0, |t| t.len());
    let problems = snapshot.resolver.validate_table();

    for problem in &problems {
        println!("{problem}");
    }

    if !problems.is_empty() {
        return Err(CliError::InvalidProjects {
            count: problems.len(),
        });
    }

    println!(
        "Configuration OK: {project_count} project(s), deploy program {}",
        snapshot.executor.command().program.display()
    );
    Ok(())
}

fn log_result(result: &Result<Outcome, DeployError>) {
    match result {
        Ok(Outcome::Pong { provider }) => info!(provider = %provider, "Answered ping"),
        Ok(Outcome::Deployed(run)) => info!(
            status = ?run.status,
            exit_code = ?run.exit_code,
            log_path = %run.final_log_path().display(),
            "Delivery handled"
        ),
        Err(e) => warn!(
            error = %e,
            category = ?e.error_category(),
            status = e.http_status(),
            "Delivery rejected"
        ),
    }
}

// ============================================================================
// Request and Response Helpers
// ============================================================================

/// Environment pairs as strings; bytes that are not UTF-8 become U+FFFD.
///
/// CGI header variables carry client-supplied bytes, so they cannot be
/// assumed to be valid UTF-8.
pub fn lossy_env<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter().map(|(name, value)| {
        (
            name.to_string_lossy().into_owned(),
            value.to_string_lossy().into_owned(),
        )
    })
}

/// CGI response for a failure before any delivery could be handled.
pub fn startup_error_response(err: &SettingsError) -> String {
    format!(
        "Status: 500 {}\r\nContent-Type: text/plain\r\n\r\n{err}\n",
        reason_phrase(500)
    )
}

/// Parse `NAME:VALUE` header flags.
pub fn parse_headers(raw: &[String]) -> Result<HeaderMap, CliError> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| CliError::InvalidArgument {
                arg: "--header".to_string(),
                message: format!("expected NAME:VALUE, got '{entry}'"),
            })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CliError::InvalidArgument {
                arg: "--header".to_string(),
                message: format!("empty header name in '{entry}'"),
            });
        }
        headers.insert(name, value.trim());
    }
    Ok(headers)
}

/// Parse `KEY=VALUE` query flags.
pub fn parse_query(raw: &[String]) -> Result<QueryParams, CliError> {
    let mut query = QueryParams::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| CliError::InvalidArgument {
                arg: "--query".to_string(),
                message: format!("expected KEY=VALUE, got '{entry}'"),
            })?;
        query.insert(key, value);
    }
    Ok(query)
}

/// Full CGI response (status line, headers, body) for a handled delivery.
///
/// With `debug` set, error responses also list the request headers.
pub fn cgi_response(
    result: &Result<Outcome, DeployError>,
    request_headers: &HeaderMap,
    debug: bool,
) -> String {
    let (status, body) = match result {
        Ok(outcome) => (200, outcome.response_body()),
        Err(e) => (
            e.http_status(),
            error_body(e, debug.then_some(request_headers)),
        ),
    };

    format!(
        "Status: {status} {}\r\nContent-Type: text/plain\r\n\r\n{body}",
        reason_phrase(status)
    )
}

fn error_body(err: &DeployError, request_headers: Option<&HeaderMap>) -> String {
    let mut body = match err {
        DeployError::DeploymentFailed { exit_code, output } => format!(
            "Exit status: {}\n{output}",
            exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
        ),
        other => format!("{other}\n"),
    };

    if let Some(headers) = request_headers {
        let mut entries: Vec<(&str, &str)> = headers.iter().collect();
        entries.sort_unstable();
        body.push_str("---\nRequest Headers:\n");
        for (name, value) in entries {
            body.push_str(&format!("{name}: {value}\n"));
        }
    }

    body
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        409 => "Conflict",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        _ => "Internal Server Error",
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
