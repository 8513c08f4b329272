//! # Inbound Request Accessors
//!
//! Read-only view of a webhook request as handed over by the HTTP layer:
//! case-insensitive headers, query parameters and the raw body.

use crate::DeployError;
use bytes::Bytes;
use std::collections::HashMap;

// ============================================================================
// HeaderMap
// ============================================================================

/// Case-insensitive HTTP header lookup.
///
/// Names are stored lowercased; the first spelling seen for each name is kept
/// for display purposes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    values: HashMap<String, (String, String)>,
}

impl HeaderMap {
    /// Create an empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any value stored under the same name
    /// regardless of case.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        let display = self
            .values
            .remove(&key)
            .map(|(display, _)| display)
            .unwrap_or(name);
        self.values.insert(key, (display, value.into()));
    }

    /// Get a header value, `None` when absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Look up a header with required/optional semantics.
    ///
    /// An absent optional header yields an empty string.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingHeader`] when `required` is set and the
    /// header is absent.
    pub fn lookup(&self, name: &str, required: bool) -> Result<&str, DeployError> {
        match self.get(name) {
            Some(value) => Ok(value),
            None if required => Err(DeployError::MissingHeader {
                name: name.to_string(),
            }),
            None => Ok(""),
        }
    }

    /// Shorthand for a required [`lookup`](Self::lookup).
    pub fn require(&self, name: &str) -> Result<&str, DeployError> {
        self.lookup(name, true)
    }

    /// Whether the header is present (an empty value still counts).
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of distinct headers
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no headers are stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(name, value)` pairs as first inserted.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

// ============================================================================
// QueryParams
// ============================================================================

/// Query string parameters.
///
/// Unlike headers, parameter names are case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    values: HashMap<String, String>,
}

impl QueryParams {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query string.
    ///
    /// A leading `?` is ignored. When a name repeats, the last value wins.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect()
    }

    /// Insert a parameter
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Get a parameter value, `None` when absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Look up a parameter with required/optional semantics.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingParameter`] when `required` is set and
    /// the parameter is absent.
    pub fn lookup(&self, name: &str, required: bool) -> Result<&str, DeployError> {
        match self.get(name) {
            Some(value) => Ok(value),
            None if required => Err(DeployError::MissingParameter {
                name: name.to_string(),
            }),
            None => Ok(""),
        }
    }

    /// Shorthand for a required [`lookup`](Self::lookup).
    pub fn require(&self, name: &str) -> Result<&str, DeployError> {
        self.lookup(name, true)
    }
}

impl<K, V> FromIterator<(K, V)> for QueryParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

// ============================================================================
// InboundRequest
// ============================================================================

/// Immutable view of one webhook delivery as received over HTTP.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub headers: HeaderMap,
    pub query: QueryParams,
    pub body: Bytes,
}

impl InboundRequest {
    /// Create new inbound request
    pub fn new(headers: HeaderMap, query: QueryParams, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            query,
            body: body.into(),
        }
    }

    /// Rebuild a request from CGI-style environment variables.
    ///
    /// `HTTP_*` variables become headers (`HTTP_X_GITHUB_EVENT` becomes
    /// `X-Github-Event`), `CONTENT_TYPE` becomes `Content-Type` and
    /// `QUERY_STRING` is parsed into query parameters.
    pub fn from_cgi_env<I, K, V>(vars: I, body: impl Into<Bytes>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut headers = HeaderMap::new();
        let mut query = QueryParams::new();

        for (name, value) in vars {
            let name = name.as_ref();
            let value: String = value.into();
            if let Some(header) = name.strip_prefix("HTTP_") {
                headers.insert(cgi_header_name(header), value);
            } else if name == "CONTENT_TYPE" {
                headers.insert("Content-Type", value);
            } else if name == "QUERY_STRING" {
                query = QueryParams::parse(&value);
            }
        }

        Self::new(headers, query, body)
    }

    /// The `Content-Type` header, empty when absent.
    pub fn content_type(&self) -> &str {
        self.headers.get("Content-Type").unwrap_or("")
    }
}

/// `X_GITHUB_EVENT` -> `X-Github-Event`
fn cgi_header_name(raw: &str) -> String {
    raw.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let lower = part.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
