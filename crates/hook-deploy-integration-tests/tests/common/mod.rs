//! Common test utilities for hook-deploy integration tests
//!
//! This module provides:
//! - A deployment fixture: temp installation directory with secret and a
//!   `/bin/sh` deploy script that records its calls
//! - Signed request builders for every provider

use hmac::{Hmac, Mac};
use hook_deploy_core::{
    ConfigResolver, DeployCommand, DeploymentExecutor, Dispatcher, HeaderMap, InboundRequest,
    ProjectTable, QueryParams, ResolverDefaults, RuntimeSnapshot, WebhookSecret,
};
use sha1::Sha1;
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const SECRET: &str = "s3cret";
pub const PAYLOAD: &[u8] = br#"{"ref":"refs/heads/main"}"#;

/// Records its arguments and stdin, then prints `deployed`.
pub const RECORDING_SCRIPT: &str = r#"echo "$1 $2 $3" >> "$DEPLOY_HOOKSROOT/../calls.txt"
cat > "$DEPLOY_HOOKSROOT/../stdin-$1.txt"
printf 'deployed\n'
"#;

// ============================================================================
// Deployment Fixture
// ============================================================================

/// Temporary installation directory laid out like a real one.
pub struct DeployFixture {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl DeployFixture {
    /// Create the directory with `SECRET` and `deploy.sh` containing `script`.
    pub fn new(script: &str) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("SECRET"), format!("{SECRET}\n")).unwrap();
        std::fs::write(dir.path().join("deploy.sh"), script).unwrap();
        std::fs::create_dir_all(dir.path().join("hooks")).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn command(&self) -> DeployCommand {
        DeployCommand::new("/bin/sh").with_args([self.path().join("deploy.sh").display().to_string()])
    }

    pub fn dispatcher(&self, table: Option<ProjectTable>) -> Dispatcher {
        let snapshot = RuntimeSnapshot {
            secret: WebhookSecret::new(SECRET),
            resolver: ConfigResolver::new(ResolverDefaults::from_base_dir(self.path()), table),
            executor: DeploymentExecutor::new(self.command()),
        };
        Dispatcher::new(Arc::new(snapshot))
    }

    /// Lines written by the recording script, one per spawn.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.path().join("calls.txt"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Stdin captured by the recording script for `project`.
    pub fn stdin_of(&self, project: &str) -> Vec<u8> {
        std::fs::read(self.path().join(format!("stdin-{project}.txt"))).unwrap_or_default()
    }

    pub fn log_path(&self, file_name: &str) -> PathBuf {
        self.path().join("log").join(file_name)
    }
}

// ============================================================================
// Request Builders
// ============================================================================

pub fn sign_sha1(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

#[allow(dead_code)]
pub fn sign_sha256(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// GitHub delivery signed with HMAC-SHA1 over `body`.
#[allow(dead_code)]
pub fn github_request(event: &str, delivery: &str, project: &str, body: &[u8]) -> InboundRequest {
    let headers: HeaderMap = [
        ("User-Agent", "GitHub-Hookshot/044aadd".to_string()),
        ("X-GitHub-Event", event.to_string()),
        ("X-GitHub-Delivery", delivery.to_string()),
        ("Content-Type", "application/json".to_string()),
        ("X-Hub-Signature", sign_sha1(SECRET, body)),
    ]
    .into_iter()
    .collect();
    InboundRequest::new(
        headers,
        QueryParams::parse(&format!("projectid={project}")),
        body.to_vec(),
    )
}

#[allow(dead_code)]
pub fn gitlab_request(event: &str, delivery: &str, project: &str, token: &str) -> InboundRequest {
    let headers: HeaderMap = [
        ("User-Agent", "GitLab/16.0"),
        ("X-Gitlab-Event", event),
        ("X-Gitlab-Token", token),
        ("X-Gitlab-Event-UUID", delivery),
        ("Content-Type", "application/json"),
    ]
    .into_iter()
    .collect();
    InboundRequest::new(
        headers,
        QueryParams::parse(&format!("projectid={project}")),
        PAYLOAD,
    )
}

#[allow(dead_code)]
pub fn bitbucket_request(event: &str, delivery: &str, project: &str, token: &str) -> InboundRequest {
    let headers: HeaderMap = [
        ("User-Agent", "Bitbucket-Webhooks/2.0"),
        ("X-Event-Key", event),
        ("X-Request-UUID", delivery),
        ("Content-Type", "application/json"),
    ]
    .into_iter()
    .collect();
    InboundRequest::new(
        headers,
        QueryParams::parse(&format!("projectid={project}&token={token}")),
        PAYLOAD,
    )
}
