//! GitLab webhook rules.
//!
//! GitLab does not sign the body; it echoes the configured secret token in
//! `X-Gitlab-Token`. Its hooks also send no distinguishing `User-Agent`,
//! which is why the selector falls back to the presence of
//! `X-Gitlab-Event`.

use super::{auth_error, token_matches};
use crate::{request::HeaderMap, secret::WebhookSecret, DeployError};

pub const TOKEN_HEADER: &str = "X-Gitlab-Token";
pub const EVENT_HEADER: &str = "X-Gitlab-Event";
pub const DELIVERY_HEADER: &str = "X-Gitlab-Event-UUID";
pub const PUSH_EVENT: &str = "push";

/// Header value GitLab itself sends for push events.
pub const PUSH_HOOK_EVENT: &str = "Push Hook";

/// Compare the token header against the shared secret in constant time.
///
/// # Errors
///
/// Returns [`DeployError::Auth`] when the token header is missing or does
/// not match.
pub fn authenticate(secret: &WebhookSecret, headers: &HeaderMap) -> Result<(), DeployError> {
    let token = headers
        .get(TOKEN_HEADER)
        .ok_or_else(|| auth_error(format!("Missing HTTP '{TOKEN_HEADER}' header")))?;

    if !token_matches(secret, token) {
        return Err(auth_error("Hook token does not match"));
    }
    Ok(())
}
