//! GitHub webhook rules.
//!
//! GitHub signs the raw body with an HMAC keyed by the shared secret and
//! sends it as `X-Hub-Signature: <algo>=<hex digest>`. Newer deliveries also
//! carry `X-Hub-Signature-256`, which is used when the legacy header is
//! absent.

use super::auth_error;
use crate::{request::HeaderMap, secret::WebhookSecret, DeployError};
use hmac::{Hmac, Mac};
use std::str::FromStr;
use tracing::debug;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";
pub const SIGNATURE_256_HEADER: &str = "X-Hub-Signature-256";
pub const EVENT_HEADER: &str = "X-Github-Event";
pub const DELIVERY_HEADER: &str = "X-Github-Delivery";
pub const PUSH_EVENT: &str = "push";

/// HMAC digests accepted in the signature header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl FromStr for SignatureAlgorithm {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(auth_error(format!(
                "Hash algorithm '{other}' is not supported"
            ))),
        }
    }
}

/// Verify the body signature against the shared secret.
///
/// # Errors
///
/// Returns [`DeployError::Auth`] when no signature header is present, the
/// header is not `<algo>=<hex>`, the algorithm is unsupported, or the digest
/// does not match.
pub fn authenticate(
    secret: &WebhookSecret,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), DeployError> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .or_else(|| headers.get(SIGNATURE_256_HEADER))
        .ok_or_else(|| auth_error(format!("Missing HTTP '{SIGNATURE_HEADER}' header")))?;

    let (algo, digest) = header
        .split_once('=')
        .ok_or_else(|| auth_error("Signature header must have the form '<algo>=<digest>'"))?;

    let algorithm: SignatureAlgorithm = algo.parse()?;
    verify_hmac(algorithm, secret, body, digest)?;

    debug!(algorithm = ?algorithm, "GitHub signature verified");
    Ok(())
}

/// Recompute the HMAC of `body` and compare it to `hex_digest` in constant time.
pub fn verify_hmac(
    algorithm: SignatureAlgorithm,
    secret: &WebhookSecret,
    body: &[u8],
    hex_digest: &str,
) -> Result<(), DeployError> {
    let expected = hex::decode(hex_digest.trim())
        .map_err(|_| auth_error("Signature digest is not valid hex"))?;

    let verified = match algorithm {
        SignatureAlgorithm::Sha1 => verify_with::<Hmac<sha1::Sha1>>(secret, body, &expected),
        SignatureAlgorithm::Sha256 => verify_with::<Hmac<sha2::Sha256>>(secret, body, &expected),
        SignatureAlgorithm::Sha512 => verify_with::<Hmac<sha2::Sha512>>(secret, body, &expected),
    };

    if verified {
        Ok(())
    } else {
        Err(auth_error("Hook secret does not match"))
    }
}

fn verify_with<M: Mac + hmac::digest::KeyInit>(
    secret: &WebhookSecret,
    body: &[u8],
    expected: &[u8],
) -> bool {
    // HMAC accepts keys of any length, so construction cannot fail.
    let Ok(mut mac) = <M as hmac::digest::KeyInit>::new_from_slice(secret.expose()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(expected).is_ok()
}

#[cfg(test)]
#[path = "github_tests.rs"]
mod tests;
