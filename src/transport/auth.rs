//! Authentication token acquisition and caching.
//!
//! Tokens are cached per (region, account) with a fixed TTL. A cached entry
//! is an immutable snapshot shared by concurrent readers; refresh replaces
//! the snapshot wholesale rather than mutating it in place. This is the only
//! cross-call shared mutable state in the client.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::error::ApiError;
use crate::json;

/// An issued token together with its acquisition time.
#[derive(Clone, Debug)]
pub struct TokenSnapshot {
    /// Opaque token presented on every API call.
    pub token: String,
    acquired: Instant,
}

impl TokenSnapshot {
    /// Wraps a freshly issued token.
    #[must_use]
    pub fn new(token: String) -> Self {
        Self {
            token,
            acquired: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.acquired.elapsed() < ttl
    }
}

/// Process-wide token cache keyed by (region, account).
#[derive(Debug, Default)]
pub struct AuthCache {
    entries: RwLock<HashMap<(String, String), Arc<TokenSnapshot>>>,
}

impl AuthCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached snapshot for the key when it is still fresh.
    #[must_use]
    pub fn lookup(&self, region: &str, account: &str, ttl: Duration) -> Option<Arc<TokenSnapshot>> {
        let entries = self.entries.read().ok()?;
        entries
            .get(&(region.to_owned(), account.to_owned()))
            .filter(|snapshot| snapshot.is_fresh(ttl))
            .cloned()
    }

    /// Replaces the snapshot for the key.
    pub fn store(&self, region: &str, account: &str, snapshot: TokenSnapshot) -> Arc<TokenSnapshot> {
        let snapshot = Arc::new(snapshot);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                (region.to_owned(), account.to_owned()),
                Arc::clone(&snapshot),
            );
        }
        snapshot
    }
}

/// Builds the identity request body for an API-key login.
#[must_use]
pub fn token_request(username: &str, api_key: &str, account_id: &str) -> Value {
    json!({
        "auth": {
            "apiKeyCredentials": {
                "username": username,
                "apiKey": api_key,
            },
            "tenantId": account_id,
        }
    })
}

/// Extracts the token id from an identity response.
///
/// # Errors
///
/// Returns [`ApiError::Protocol`] when the response lacks the
/// `access.token.id` structure.
pub fn token_from_response(value: &Value) -> Result<TokenSnapshot, ApiError> {
    let access = json::require_object(value, "access")?;
    let token = json::require_object(access, "token")?;
    let id = json::string_field(token, &["id"]).ok_or_else(|| ApiError::Protocol {
        message: "identity response missing token id".to_owned(),
    })?;
    Ok(TokenSnapshot::new(id))
}
