//! # Deployment Executor
//!
//! Runs the deploy program at most once per (project, delivery) pair and
//! places its captured output as a log file.
//!
//! ## Idempotency
//!
//! A committed log at the log path marks the delivery as handled; a
//! redelivery finds it and gets the stored log back without spawning.
//!
//! While a run is in flight the delivery is held by a `<log>.lock` sibling,
//! created with create-new semantics and holding the owner's process ID.
//! Exclusive creation closes the window between "check" and "spawn" that a
//! plain existence test would leave open for concurrent redeliveries. A
//! second delivery that finds a live lock is told the delivery is in
//! progress; a lock left by a process that no longer exists is removed and
//! taken over. The lock is released when the run ends or its future is
//! dropped, and the child process is killed along with it.
//!
//! ## Log placement
//!
//! Captured output is written to a `.partial` sibling and renamed to the log
//! path only on exit status 0. On a nonzero exit it is moved to the error log
//! path instead, replacing an error log from an earlier attempt. Nothing is
//! ever left at the log path for a run that did not succeed, so failed and
//! interrupted deliveries are retried on redelivery.
//!
//! ## Output
//!
//! Standard output and standard error are captured separately and stored as
//! stdout followed by stderr.

use crate::{project_config::ProjectConfig, provider::WebhookEvent, DeployError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Program invoked for each deployment.
///
/// `args` come first on the command line; the project ID, event name and
/// provider name are appended after them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl DeployCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Terminal state of a deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The log already existed; nothing was spawned
    Cached,
    /// The program exited with status 0
    Completed,
    /// The program exited nonzero or was killed
    Failed,
}

/// Result of one [`DeploymentExecutor::execute`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRun {
    pub log_path: PathBuf,
    pub err_log_path: PathBuf,
    /// `None` for cache hits and for processes terminated by a signal.
    pub exit_code: Option<i32>,
    pub status: RunStatus,
    /// Captured program output, or the stored log on a cache hit.
    pub output: String,
}

impl DeploymentRun {
    /// Path where the log for this run now lives.
    pub fn final_log_path(&self) -> &Path {
        match self.status {
            RunStatus::Failed => &self.err_log_path,
            RunStatus::Cached | RunStatus::Completed => &self.log_path,
        }
    }

    /// Convert a failed run into [`DeployError::DeploymentFailed`].
    pub fn into_result(self) -> Result<Self, DeployError> {
        match self.status {
            RunStatus::Failed => Err(DeployError::DeploymentFailed {
                exit_code: self.exit_code,
                output: self.output,
            }),
            RunStatus::Cached | RunStatus::Completed => Ok(self),
        }
    }
}

/// Spawns the deploy program and commits its log.
#[derive(Debug, Clone)]
pub struct DeploymentExecutor {
    command: DeployCommand,
}

impl DeploymentExecutor {
    pub fn new(command: DeployCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &DeployCommand {
        &self.command
    }

    /// Run the deployment for `event`, or return the stored log if this
    /// delivery has already been handled.
    ///
    /// # Errors
    ///
    /// - [`DeployError::Spawn`] when the program cannot be started; no log
    ///   file is left behind
    /// - [`DeployError::DeploymentFailed`] when it exits nonzero; the log has
    ///   been moved to `config.err_log_path`
    /// - [`DeployError::DeliveryInProgress`] when another run holds this
    ///   delivery
    /// - [`DeployError::LogCommit`] when a log file cannot be created or
    ///   moved; the log path stays empty
    pub async fn execute(
        &self,
        config: &ProjectConfig,
        event: &WebhookEvent,
    ) -> Result<DeploymentRun, DeployError> {
        self.run(config, event).await?.into_result()
    }

    /// Like [`execute`](Self::execute), but reports a nonzero exit as a run
    /// with [`RunStatus::Failed`] instead of an error.
    #[instrument(
        skip(self, config, event),
        fields(
            project_id = %config.project_id,
            delivery_id = %event.delivery_id,
            provider = %event.provider,
        )
    )]
    pub async fn run(
        &self,
        config: &ProjectConfig,
        event: &WebhookEvent,
    ) -> Result<DeploymentRun, DeployError> {
        let log_path = &config.log_path;
        let err_log_path = &config.err_log_path;

        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| log_commit(parent, source))?;
        }

        if let Some(run) = cached_run(config).await? {
            return Ok(run);
        }

        let lock_file = lock_path(log_path);
        let _lock = match acquire_lock(&lock_file).await {
            Ok(lock) => lock,
            Err(e) => {
                // The holder may have committed while the lock was inspected.
                if let Some(run) = cached_run(config).await? {
                    return Ok(run);
                }
                return Err(e);
            }
        };

        // A holder may also have committed and released between the first
        // check and acquisition.
        if let Some(run) = cached_run(config).await? {
            return Ok(run);
        }

        let (exit_code, success, output) = self.spawn_and_wait(config, event).await?;

        let partial = partial_path(log_path);
        write_partial(&partial, output.as_bytes()).await?;

        let status = if success {
            fs::rename(&partial, log_path).await.map_err(|source| {
                warn!(partial_path = %partial.display(), "Log left at partial path");
                log_commit(log_path, source)
            })?;
            info!(exit_code = ?exit_code, log_path = %log_path.display(), "Deployment completed");
            RunStatus::Completed
        } else {
            move_to_err_log(&partial, err_log_path).await.inspect_err(|_| {
                warn!(partial_path = %partial.display(), "Log left at partial path");
            })?;
            warn!(
                exit_code = ?exit_code,
                log_path = %err_log_path.display(),
                "Deployment failed"
            );
            RunStatus::Failed
        };

        Ok(DeploymentRun {
            log_path: log_path.clone(),
            err_log_path: err_log_path.clone(),
            exit_code,
            status,
            output,
        })
    }

    async fn spawn_and_wait(
        &self,
        config: &ProjectConfig,
        event: &WebhookEvent,
    ) -> Result<(Option<i32>, bool, String), DeployError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .arg(config.project_id.as_str())
            .arg(&event.event_name)
            .arg(event.provider.name())
            .current_dir(&config.deploy_root)
            .envs(config.script_environment())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DeployError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        debug!(program = %self.command.program.display(), pid = ?child.id(), "Deploy program started");

        // Payload is written from its own task while output is drained.
        let stdin_task = child.stdin.take().map(|mut stdin| {
            let payload = event.payload.clone();
            tokio::spawn(async move {
                let result = stdin.write_all(&payload).await;
                drop(stdin);
                result
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| DeployError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        if let Some(task) = stdin_task {
            match task.await {
                Ok(Ok(())) => {}
                // The program is free to ignore its input.
                Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to write payload to deploy program"),
                Err(e) => warn!(error = %e, "Payload writer task failed"),
            }
        }

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok((output.status.code(), output.status.success(), captured))
    }
}

fn log_commit(path: &Path, source: std::io::Error) -> DeployError {
    DeployError::LogCommit {
        path: path.to_path_buf(),
        source,
    }
}

/// `path` with `.{suffix}` appended to its file name.
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn partial_path(log_path: &Path) -> PathBuf {
    sibling_path(log_path, "partial")
}

fn lock_path(log_path: &Path) -> PathBuf {
    sibling_path(log_path, "lock")
}

/// The stored run for this delivery, if its log has been committed.
async fn cached_run(config: &ProjectConfig) -> Result<Option<DeploymentRun>, DeployError> {
    let log_path = &config.log_path;
    let stored = match fs::read(log_path).await {
        Ok(stored) => stored,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(log_commit(log_path, source)),
    };

    info!(log_path = %log_path.display(), "Delivery already handled; returning stored log");
    Ok(Some(DeploymentRun {
        log_path: log_path.clone(),
        err_log_path: config.err_log_path.clone(),
        exit_code: None,
        status: RunStatus::Cached,
        output: String::from_utf8_lossy(&stored).into_owned(),
    }))
}

/// Exclusive hold on one delivery, released on drop.
#[derive(Debug)]
struct DeliveryLock {
    path: PathBuf,
}

impl Drop for DeliveryLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                lock_path = %self.path.display(),
                error = %e,
                "Failed to release delivery lock"
            ),
        }
    }
}

/// Take the delivery lock, reclaiming it from a dead owner if needed.
async fn acquire_lock(lock_path: &Path) -> Result<DeliveryLock, DeployError> {
    if let Some(lock) = try_lock(lock_path).await? {
        return Ok(lock);
    }

    let in_progress = || DeployError::DeliveryInProgress {
        lock_path: lock_path.to_path_buf(),
    };

    // An unreadable or empty lock is still being written by its owner.
    match lock_owner(lock_path).await {
        Some(pid) if !process_is_alive(pid) => {
            warn!(lock_path = %lock_path.display(), stale_pid = pid, "Removing stale delivery lock");
            match fs::remove_file(lock_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(log_commit(lock_path, source)),
            }
            try_lock(lock_path).await?.ok_or_else(in_progress)
        }
        owner => {
            info!(lock_path = %lock_path.display(), owner = ?owner, "Delivery is already in progress");
            Err(in_progress())
        }
    }
}

async fn try_lock(lock_path: &Path) -> Result<Option<DeliveryLock>, DeployError> {
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
        Err(source) => return Err(log_commit(lock_path, source)),
    };

    let lock = DeliveryLock {
        path: lock_path.to_path_buf(),
    };
    file.write_all(std::process::id().to_string().as_bytes())
        .await
        .map_err(|source| log_commit(lock_path, source))?;
    file.flush()
        .await
        .map_err(|source| log_commit(lock_path, source))?;

    Ok(Some(lock))
}

async fn lock_owner(lock_path: &Path) -> Option<u32> {
    fs::read_to_string(lock_path).await.ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn process_is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a portable liveness check every owner counts as alive.
#[cfg(not(target_os = "linux"))]
fn process_is_alive(_pid: u32) -> bool {
    true
}

/// Write the captured output next to its final name.
async fn write_partial(partial: &Path, contents: &[u8]) -> Result<(), DeployError> {
    let mut file = fs::File::create(partial)
        .await
        .map_err(|source| log_commit(partial, source))?;
    file.write_all(contents)
        .await
        .map_err(|source| log_commit(partial, source))?;
    file.flush()
        .await
        .map_err(|source| log_commit(partial, source))
}

/// Move a finished log to the error log location.
///
/// Falls back to copy and remove when the two roots are on different
/// filesystems.
async fn move_to_err_log(from: &Path, err_log_path: &Path) -> Result<(), DeployError> {
    if let Some(parent) = err_log_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| log_commit(parent, source))?;
    }

    if let Err(e) = fs::rename(from, err_log_path).await {
        debug!(error = %e, "Rename to error log failed; copying instead");
        fs::copy(from, err_log_path)
            .await
            .map_err(|source| log_commit(err_log_path, source))?;
        fs::remove_file(from)
            .await
            .map_err(|source| log_commit(from, source))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
