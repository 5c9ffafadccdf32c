//! Captures bearer credentials from outbound requests into the secret store.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{HeaderMap, AUTHORIZATION};
use http::Uri;

use crate::control::protocol::SECRET_KEY;
use crate::store::SecretStore;

const BEARER_SCHEME: &str = "bearer";

/// Request headers as the caller happens to hold them
#[derive(Debug, Clone)]
pub enum RequestHeaders {
    Map(HashMap<String, String>),
    Pairs(Vec<(String, String)>),
    Typed(HeaderMap),
}

impl RequestHeaders {
    /// First value of header `name`, compared case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        match self {
            RequestHeaders::Map(map) => map
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            RequestHeaders::Pairs(pairs) => pairs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            RequestHeaders::Typed(headers) => headers.get(name).and_then(|v| v.to_str().ok()),
        }
    }
}

impl From<HashMap<String, String>> for RequestHeaders {
    fn from(map: HashMap<String, String>) -> Self {
        RequestHeaders::Map(map)
    }
}

impl From<Vec<(String, String)>> for RequestHeaders {
    fn from(pairs: Vec<(String, String)>) -> Self {
        RequestHeaders::Pairs(pairs)
    }
}

impl From<HeaderMap> for RequestHeaders {
    fn from(headers: HeaderMap) -> Self {
        RequestHeaders::Typed(headers)
    }
}

/// Watches outbound requests to one host and stores their bearer token
pub struct CredentialCapture {
    target_host: String,
    store: Arc<dyn SecretStore>,
}

impl CredentialCapture {
    pub fn new(target_host: impl Into<String>, store: Arc<dyn SecretStore>) -> Self {
        Self {
            target_host: target_host.into(),
            store,
        }
    }

    pub fn target_host(&self) -> &str {
        &self.target_host
    }

    /// Inspect one outbound request; returns whether a token was stored
    pub fn observe(&self, url: &str, headers: &RequestHeaders) -> bool {
        if !self.targets(url) {
            return false;
        }
        let Some(token) = headers.get(AUTHORIZATION.as_str()).and_then(bearer_token) else {
            return false;
        };

        match self.store.set(SECRET_KEY, token.to_string()) {
            Ok(()) => {
                log::debug!("Captured bearer token for {}", self.target_host);
                true
            }
            Err(e) => {
                log::warn!("Failed to store captured token: {}", e);
                false
            }
        }
    }

    fn targets(&self, url: &str) -> bool {
        match url.parse::<Uri>() {
            Ok(uri) => uri
                .host()
                .is_some_and(|host| host.eq_ignore_ascii_case(&self.target_host)),
            Err(e) => {
                log::trace!("Ignoring request with unparseable URL {}: {}", url, e);
                false
            }
        }
    }
}

/// Token of a `Bearer <token>` credential, scheme matched case-insensitively
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
