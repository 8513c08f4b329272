//! # Provider Strategies
//!
//! Authentication and metadata extraction for each supported hosting
//! provider. The provider set is closed, so it is modelled as the
//! [`ProviderIdentity`] enum whose methods dispatch to the per-provider
//! modules:
//!
//! | Provider  | Authentication                      | Event header     | Delivery header        | Push event  |
//! |-----------|-------------------------------------|------------------|------------------------|-------------|
//! | GitHub    | HMAC of the body (`X-Hub-Signature`)| `X-Github-Event` | `X-Github-Delivery`    | `push`      |
//! | GitLab    | Token header (`X-Gitlab-Token`)     | `X-Gitlab-Event` | `X-Gitlab-Event-UUID`  | `push`      |
//! | Bitbucket | `token` query parameter             | `X-Event-Key`    | `X-Request-UUID`       | `repo:push` |
//!
//! Bitbucket does not sign payloads, so its check is a shared-token
//! comparison only.

use crate::{request::HeaderMap, secret::WebhookSecret, DeliveryId, DeployError, InboundRequest};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

pub mod bitbucket;
pub mod github;
pub mod gitlab;
mod selector;

/// Event name every provider uses for its connectivity check.
pub const PING_EVENT: &str = "ping";

/// Form field carrying the JSON document in form-encoded deliveries.
pub const PAYLOAD_FORM_FIELD: &str = "payload";

// ============================================================================
// ProviderIdentity
// ============================================================================

/// The hosting provider that sent a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderIdentity {
    GitHub,
    GitLab,
    Bitbucket,
}

/// How the dispatcher treats an event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Triggers a deployment
    Push,
    /// Connectivity check; answered without deploying
    Ping,
    /// Anything else; rejected
    Other,
}

impl ProviderIdentity {
    /// Variant name, passed to the deploy program as its third argument.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GitHub => "GitHub",
            Self::GitLab => "GitLab",
            Self::Bitbucket => "Bitbucket",
        }
    }

    /// Pick the provider that sent a request from its headers.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::UnsupportedProvider`] naming the offending
    /// `User-Agent` when no provider matches.
    pub fn select(headers: &HeaderMap) -> Result<Self, DeployError> {
        selector::select(headers)
    }

    /// Verify that the request was sent by a holder of `secret`.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Auth`] when the signature or token is missing,
    /// malformed, uses an unsupported algorithm, or does not match. The
    /// error message never contains the secret.
    pub fn authenticate(
        &self,
        secret: &WebhookSecret,
        request: &InboundRequest,
    ) -> Result<(), DeployError> {
        match self {
            Self::GitHub => github::authenticate(secret, &request.headers, &request.body),
            Self::GitLab => gitlab::authenticate(secret, &request.headers),
            Self::Bitbucket => bitbucket::authenticate(secret, &request.query),
        }
    }

    /// Read the provider's event name.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingHeader`] when the event header is absent.
    pub fn extract_event(&self, headers: &HeaderMap) -> Result<String, DeployError> {
        let header = match self {
            Self::GitHub => github::EVENT_HEADER,
            Self::GitLab => gitlab::EVENT_HEADER,
            Self::Bitbucket => bitbucket::EVENT_HEADER,
        };
        headers.require(header).map(str::to_string)
    }

    /// Read the provider-supplied delivery ID.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingHeader`] when the delivery header is
    /// absent and [`DeployError::InvalidIdentifier`] when its value cannot be
    /// used as a file name component.
    pub fn extract_delivery_id(&self, headers: &HeaderMap) -> Result<DeliveryId, DeployError> {
        let header = match self {
            Self::GitHub => github::DELIVERY_HEADER,
            Self::GitLab => gitlab::DELIVERY_HEADER,
            Self::Bitbucket => bitbucket::DELIVERY_HEADER,
        };
        DeliveryId::new(headers.require(header)?)
    }

    /// Extract the event document from the request body.
    ///
    /// All providers share the same content-type handling; see
    /// [`decode_payload`].
    pub fn decode_payload(
        &self,
        content_type: &str,
        body: &Bytes,
        form_field: &str,
    ) -> Result<Bytes, DeployError> {
        decode_payload(content_type, body, form_field)
    }

    /// The provider's literal name for a push event.
    pub fn push_event_name(&self) -> &'static str {
        match self {
            Self::GitHub => github::PUSH_EVENT,
            Self::GitLab => gitlab::PUSH_EVENT,
            Self::Bitbucket => bitbucket::PUSH_EVENT,
        }
    }

    /// Classify an event name for dispatch.
    pub fn classify(&self, event: &str) -> EventKind {
        if event == self.push_event_name() {
            return EventKind::Push;
        }
        if event == PING_EVENT {
            return EventKind::Ping;
        }
        match self {
            Self::GitLab if event == gitlab::PUSH_HOOK_EVENT => EventKind::Push,
            _ => EventKind::Other,
        }
    }
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// WebhookEvent
// ============================================================================

/// A verified delivery, ready for execution.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub provider: ProviderIdentity,
    pub event_name: String,
    pub delivery_id: DeliveryId,
    pub payload: Bytes,
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Extract the event document from a request body.
///
/// - `application/json`: the body is passed through unchanged
/// - `application/x-www-form-urlencoded`: the value of `form_field` is
///   returned (empty when the field is absent)
///
/// Media-type parameters such as `; charset=utf-8` are ignored and the
/// comparison is case-insensitive.
///
/// # Errors
///
/// Returns [`DeployError::UnsupportedContentType`] for any other content type.
pub fn decode_payload(
    content_type: &str,
    body: &Bytes,
    form_field: &str,
) -> Result<Bytes, DeployError> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match media_type.as_str() {
        "application/json" => Ok(body.clone()),
        "application/x-www-form-urlencoded" => {
            let value = url::form_urlencoded::parse(body)
                .find(|(name, _)| name == form_field)
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            Ok(Bytes::from(value))
        }
        _ => Err(DeployError::UnsupportedContentType {
            content_type: content_type.to_string(),
        }),
    }
}

/// Constant-time comparison of a presented token against the secret.
fn token_matches(secret: &WebhookSecret, presented: &str) -> bool {
    bool::from(secret.expose().ct_eq(presented.as_bytes()))
}

fn auth_error(message: impl Into<String>) -> DeployError {
    DeployError::Auth {
        message: message.into(),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
