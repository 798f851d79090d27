//! HTTP transport to the cloud API.
//!
//! [`ApiCall`] is the narrow seam every controller talks through: four
//! verb-shaped methods returning parsed JSON. [`HttpTransport`] implements it
//! over reqwest, owning token acquisition and the per-(region, account)
//! token cache. Tests implement the same trait with a scripted double.

mod auth;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::CloudConfig;
use crate::error::ApiError;

pub use auth::{AuthCache, TokenSnapshot};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Future returned by transport operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Authenticated access to one cloud's REST services.
///
/// `service` selects the backend service (`compute`, `volume`, `network`,
/// `load-balancer`); `path` is the resource path within it, including the
/// resource id where one applies (`servers/srv-1`).
///
/// A 404 response and an empty 2xx body both surface as `Ok(None)`; callers
/// decide whether absence is routine or exceptional.
pub trait ApiCall: Send + Sync {
    /// Fetches a resource or collection.
    fn get<'a>(&'a self, service: &'a str, path: &'a str) -> ApiFuture<'a, Option<Value>>;

    /// Submits a create or action request.
    fn post<'a>(
        &'a self,
        service: &'a str,
        path: &'a str,
        body: Value,
    ) -> ApiFuture<'a, Option<Value>>;

    /// Replaces a resource or sub-resource.
    fn put<'a>(
        &'a self,
        service: &'a str,
        path: &'a str,
        body: Value,
    ) -> ApiFuture<'a, Option<Value>>;

    /// Deletes a resource.
    fn delete<'a>(&'a self, service: &'a str, path: &'a str) -> ApiFuture<'a, Option<Value>>;
}

/// Reqwest-backed [`ApiCall`] implementation.
pub struct HttpTransport {
    config: Arc<CloudConfig>,
    http: reqwest::Client,
    auth: AuthCache,
}

impl HttpTransport {
    /// Builds a transport for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: Arc<CloudConfig>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(ApiError::from)?;
        Ok(Self {
            config,
            http,
            auth: AuthCache::new(),
        })
    }

    /// Returns a fresh or cached token for this client's region and account.
    async fn token(&self) -> Result<Arc<TokenSnapshot>, ApiError> {
        let ttl = self.config.timeouts.auth_token_ttl;
        if let Some(snapshot) = self
            .auth
            .lookup(&self.config.region_id, &self.config.account_id, ttl)
        {
            return Ok(snapshot);
        }

        let url = format!("{}/identity/tokens", self.config.endpoint);
        let body = auth::token_request(
            &self.config.username,
            &self.config.api_key,
            &self.config.account_id,
        );
        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Authentication {
                message: format!("identity service returned {status}: {text}"),
            });
        }
        let value: Value = response.json().await.map_err(|err| ApiError::Protocol {
            message: format!("identity response unparseable: {err}"),
        })?;
        let snapshot = auth::token_from_response(&value)?;
        Ok(self
            .auth
            .store(&self.config.region_id, &self.config.account_id, snapshot))
    }

    fn url(&self, service: &str, path: &str) -> String {
        format!(
            "{}/{service}/{}/{path}",
            self.config.endpoint, self.config.account_id
        )
    }

    async fn execute(
        &self,
        method: reqwest::Method,
        service: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>, ApiError> {
        let token = self.token().await?;
        let mut request = self
            .http
            .request(method, self.url(service, path))
            .header("X-Auth-Token", token.token.as_str())
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if (200..300).contains(&status) {
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(None);
            }
            let value = serde_json::from_str(&text).map_err(|err| ApiError::Protocol {
                message: format!("unparseable response body: {err}"),
            })?;
            return Ok(Some(value));
        }

        let text = response.text().await.unwrap_or_default();
        Err(decode_error(status, path, &text))
    }
}

impl ApiCall for HttpTransport {
    fn get<'a>(&'a self, service: &'a str, path: &'a str) -> ApiFuture<'a, Option<Value>> {
        Box::pin(self.execute(reqwest::Method::GET, service, path, None))
    }

    fn post<'a>(
        &'a self,
        service: &'a str,
        path: &'a str,
        body: Value,
    ) -> ApiFuture<'a, Option<Value>> {
        Box::pin(self.execute(reqwest::Method::POST, service, path, Some(body)))
    }

    fn put<'a>(
        &'a self,
        service: &'a str,
        path: &'a str,
        body: Value,
    ) -> ApiFuture<'a, Option<Value>> {
        Box::pin(self.execute(reqwest::Method::PUT, service, path, Some(body)))
    }

    fn delete<'a>(&'a self, service: &'a str, path: &'a str) -> ApiFuture<'a, Option<Value>> {
        Box::pin(self.execute(reqwest::Method::DELETE, service, path, None))
    }
}

/// Splits a resource path into (kind, id) for error reporting.
///
/// `servers/srv-1` names server `srv-1`; a bare collection path names the
/// kind with an empty id.
fn resource_parts(path: &str) -> (String, String) {
    let mut segments = path.split('/');
    let kind = segments
        .next()
        .unwrap_or_default()
        .trim_end_matches('s')
        .to_owned();
    let id = segments.next().unwrap_or_default().to_owned();
    (kind, id)
}

/// Decodes a non-2xx body into the matching [`ApiError`] kind, preserving
/// the provider's own code and message.
///
/// Provider faults arrive as a single-key object wrapping `code` and
/// `message` (`{"computeFault": {"code": 500, "message": "..."}}`).
fn decode_error(status: u16, path: &str, body: &str) -> ApiError {
    let (resource, id) = resource_parts(path);
    let mut code = None;
    let mut message = body.trim().to_owned();

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let fault = value
            .as_object()
            .and_then(|entries| entries.values().find(|entry| entry.is_object()));
        if let Some(fault) = fault {
            code = crate::json::string_field(fault, &["code"]);
            if let Some(text) = crate::json::string_field(fault, &["message", "details"]) {
                message = text;
            }
        }
    }

    ApiError::from_status(status, &resource, &id, code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("servers/srv-1", "server", "srv-1")]
    #[case("servers", "server", "")]
    #[case("loadbalancers/lb-9/nodes", "loadbalancer", "lb-9")]
    fn resource_parts_names_kind_and_id(
        #[case] path: &str,
        #[case] kind: &str,
        #[case] id: &str,
    ) {
        assert_eq!(resource_parts(path), (kind.to_owned(), id.to_owned()));
    }

    #[rstest]
    fn decode_error_preserves_provider_code_and_message() {
        let body = r#"{"computeFault": {"code": 500, "message": "boom"}}"#;
        let err = decode_error(500, "servers/srv-1", body);
        assert_eq!(
            err,
            ApiError::Provider {
                status: 500,
                code: Some("500".to_owned()),
                message: "boom".to_owned(),
            }
        );
    }

    #[rstest]
    fn decode_error_maps_conflict_class() {
        let body = r#"{"conflictingRequest": {"code": 409, "message": "busy"}}"#;
        let err = decode_error(409, "volumes/vol-1", body);
        assert!(err.is_conflict());
    }

    #[rstest]
    fn decode_error_maps_authentication_class() {
        let err = decode_error(401, "servers", "denied");
        assert!(matches!(err, ApiError::Authentication { .. }));
    }

    #[rstest]
    fn decode_error_tolerates_non_json_bodies() {
        let err = decode_error(502, "servers/srv-1", "<html>bad gateway</html>");
        assert!(matches!(err, ApiError::Provider { status: 502, .. }));
    }
}
