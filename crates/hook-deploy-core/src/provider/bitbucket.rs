//! Bitbucket webhook rules.
//!
//! Bitbucket webhooks carry no body signature. The shared secret is passed as
//! a `token` query parameter on the hook URL and compared directly; this is
//! weaker than an HMAC and is the strongest check Bitbucket supports.

use super::{auth_error, token_matches};
use crate::{request::QueryParams, secret::WebhookSecret, DeployError};

pub const TOKEN_PARAM: &str = "token";
pub const EVENT_HEADER: &str = "X-Event-Key";
pub const DELIVERY_HEADER: &str = "X-Request-UUID";
pub const PUSH_EVENT: &str = "repo:push";

/// Compare the `token` query parameter against the shared secret in
/// constant time.
///
/// # Errors
///
/// Returns [`DeployError::Auth`] when the parameter is missing or does not
/// match.
pub fn authenticate(secret: &WebhookSecret, query: &QueryParams) -> Result<(), DeployError> {
    let token = query
        .get(TOKEN_PARAM)
        .ok_or_else(|| auth_error(format!("Missing '{TOKEN_PARAM}' query parameter")))?;

    if !token_matches(secret, token) {
        return Err(auth_error("Hook token does not match"));
    }
    Ok(())
}
