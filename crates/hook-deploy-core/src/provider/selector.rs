//! Provider selection from request metadata.

use super::{gitlab, ProviderIdentity};
use crate::{request::HeaderMap, DeployError};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn github_agent() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^GitHub-Hookshot/").expect("static pattern is valid"))
}

fn bitbucket_agent() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^Bitbucket-Webhooks/").expect("static pattern is valid"))
}

/// Pick the provider for a request.
///
/// Order matters: the two providers with a recognisable `User-Agent` are
/// checked first. GitLab hooks send no stable agent, so GitLab is chosen
/// only when a non-empty `X-Gitlab-Event` header is present.
pub(super) fn select(headers: &HeaderMap) -> Result<ProviderIdentity, DeployError> {
    let user_agent = headers.lookup("User-Agent", false)?;

    let provider = if github_agent().is_match(user_agent) {
        ProviderIdentity::GitHub
    } else if bitbucket_agent().is_match(user_agent) {
        ProviderIdentity::Bitbucket
    } else if !headers.lookup(gitlab::EVENT_HEADER, false)?.is_empty() {
        ProviderIdentity::GitLab
    } else {
        return Err(DeployError::UnsupportedProvider {
            user_agent: user_agent.to_string(),
        });
    };

    debug!(provider = %provider, user_agent = %user_agent, "Selected webhook provider");

    Ok(provider)
}
