//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::ApiError;
use crate::transport::{ApiCall, ApiFuture};

/// Scripted transport that returns pre-seeded responses in FIFO order.
///
/// Used to drive deterministic lifecycle outcomes without an HTTP server.
/// Every call is recorded for later assertions.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Option<Value>, ApiError>>>,
    invocations: Mutex<Vec<ApiInvocation>>,
}

/// Records a single call made through [`ScriptedTransport`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiInvocation {
    /// HTTP verb of the call.
    pub method: String,
    /// Service the call targeted.
    pub service: String,
    /// Resource path within the service.
    pub path: String,
    /// JSON body, when one was sent.
    pub body: Option<Value>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a JSON response body.
    pub fn push_json(&self, value: Value) {
        self.push(Ok(Some(value)));
    }

    /// Queues an empty (2xx without body, or 404) response.
    pub fn push_empty(&self) {
        self.push(Ok(None));
    }

    /// Queues an error outcome.
    pub fn push_error(&self, error: ApiError) {
        self.push(Err(error));
    }

    /// Returns a snapshot of all calls recorded so far.
    ///
    /// # Panics
    ///
    /// Panics when the invocation log mutex is poisoned.
    #[must_use]
    pub fn invocations(&self) -> Vec<ApiInvocation> {
        self.invocations
            .lock()
            .expect("invocation log poisoned")
            .clone()
    }

    /// Returns true once every queued response has been consumed.
    ///
    /// # Panics
    ///
    /// Panics when the response queue mutex is poisoned.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.responses
            .lock()
            .expect("response queue poisoned")
            .is_empty()
    }

    fn push(&self, response: Result<Option<Value>, ApiError>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    fn record(
        &self,
        method: &str,
        service: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>, ApiError> {
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(ApiInvocation {
                method: method.to_owned(),
                service: service.to_owned(),
                path: path.to_owned(),
                body,
            });
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front())
            .unwrap_or_else(|| {
                Err(ApiError::Transport {
                    message: format!("no scripted response for {method} {service}/{path}"),
                })
            })
    }
}

impl ApiCall for ScriptedTransport {
    fn get<'a>(&'a self, service: &'a str, path: &'a str) -> ApiFuture<'a, Option<Value>> {
        Box::pin(async move { self.record("GET", service, path, None) })
    }

    fn post<'a>(
        &'a self,
        service: &'a str,
        path: &'a str,
        body: Value,
    ) -> ApiFuture<'a, Option<Value>> {
        Box::pin(async move { self.record("POST", service, path, Some(body)) })
    }

    fn put<'a>(
        &'a self,
        service: &'a str,
        path: &'a str,
        body: Value,
    ) -> ApiFuture<'a, Option<Value>> {
        Box::pin(async move { self.record("PUT", service, path, Some(body)) })
    }

    fn delete<'a>(&'a self, service: &'a str, path: &'a str) -> ApiFuture<'a, Option<Value>> {
        Box::pin(async move { self.record("DELETE", service, path, None) })
    }
}
