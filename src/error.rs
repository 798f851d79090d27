//! Error taxonomy shared by every resource controller.
//!
//! The variants mirror the failure kinds a caller can meaningfully react to:
//! authentication rejection, malformed wire responses, absence, transient
//! conflicts, unsupported operations, convergence timeouts, and raw provider
//! errors carrying the backend's own code and message.

use thiserror::Error;

/// Errors raised by the provisioning client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// Raised when the client configuration is incomplete or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the backend rejects the supplied credentials. Fatal, never
    /// retried.
    #[error("authentication rejected: {message}")]
    Authentication {
        /// Message returned by the identity service.
        message: String,
    },
    /// Raised when a response is missing required structure or cannot be
    /// parsed. Always surfaced, never silently defaulted.
    #[error("malformed provider response: {message}")]
    Protocol {
        /// Description of the structural problem.
        message: String,
    },
    /// Raised when an operation requires a resource that does not exist.
    ///
    /// Routine absence checks (`get`, `remove`) do not produce this variant;
    /// they report absence through `Ok(None)` or idempotent success.
    #[error("no such {resource}: {id}")]
    NotFound {
        /// Resource kind, for example `server`.
        resource: String,
        /// Identifier that could not be resolved.
        id: String,
    },
    /// Raised when the backend reports the resource busy or mid-transition
    /// (HTTP 409 class). Retried by controllers up to a bounded budget.
    #[error("{resource} {id} is busy: {message}")]
    Conflict {
        /// Resource kind involved in the conflict.
        resource: String,
        /// Identifier of the busy resource.
        id: String,
        /// Message returned by the provider.
        message: String,
    },
    /// Raised before contacting the backend when the provider variant lacks
    /// the requested capability.
    #[error("operation not supported by this provider: {operation}")]
    Unsupported {
        /// Operation that was refused.
        operation: String,
    },
    /// Raised when an asynchronous operation fails to converge within its
    /// configured budget.
    #[error("timeout waiting for {action} on {resource_id}")]
    Timeout {
        /// Action being waited on.
        action: String,
        /// Identifier of the resource being polled.
        resource_id: String,
    },
    /// Raised when a caller cancels a wait through its [`CancelToken`].
    ///
    /// [`CancelToken`]: crate::poll::CancelToken
    #[error("cancelled while waiting for {action} on {resource_id}")]
    Cancelled {
        /// Action that was abandoned.
        action: String,
        /// Identifier of the resource being polled.
        resource_id: String,
    },
    /// Raised when a polled resource lands in its terminal error state.
    #[error("{resource} {id} entered an error state: {message}")]
    ErrorState {
        /// Resource kind that failed.
        resource: String,
        /// Identifier of the failed resource.
        id: String,
        /// Provider fault message when one was reported.
        message: String,
    },
    /// Raised when a resize converges to ACTIVE without the requested
    /// product applied. The confirmation step is not retried.
    #[error("server {id} reports ACTIVE but product {requested} was not applied (still {actual})")]
    ResizeNotApplied {
        /// Server that was resized.
        id: String,
        /// Product the caller asked for.
        requested: String,
        /// Product the backend reports after confirmation.
        actual: String,
    },
    /// Any other non-2xx response, with the provider code and message
    /// preserved for diagnostics.
    #[error("provider error (status {status}, code {code:?}): {message}")]
    Provider {
        /// HTTP status returned by the backend.
        status: u16,
        /// Provider-specific error code when present.
        code: Option<String>,
        /// Provider error message.
        message: String,
    },
    /// Raised when the HTTP layer fails before a response is available.
    #[error("transport error: {message}")]
    Transport {
        /// Underlying client error message.
        message: String,
    },
}

impl ApiError {
    /// Builds the error matching an HTTP failure status.
    ///
    /// 401/403 map to [`ApiError::Authentication`], 404 to
    /// [`ApiError::NotFound`], 409 and 423 to [`ApiError::Conflict`], and
    /// everything else to [`ApiError::Provider`].
    #[must_use]
    pub fn from_status(
        status: u16,
        resource: &str,
        id: &str,
        code: Option<String>,
        message: String,
    ) -> Self {
        match status {
            401 | 403 => Self::Authentication { message },
            404 => Self::NotFound {
                resource: resource.to_owned(),
                id: id.to_owned(),
            },
            409 | 423 => Self::Conflict {
                resource: resource.to_owned(),
                id: id.to_owned(),
                message,
            },
            _ => Self::Provider {
                status,
                code,
                message,
            },
        }
    }

    /// Returns true for absence outcomes.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for retryable 409-class conflicts.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true when the error should abort a polling loop immediately
    /// rather than being swallowed until the overall deadline.
    #[must_use]
    pub const fn is_fatal_while_polling(&self) -> bool {
        matches!(
            self,
            Self::Cancelled { .. } | Self::Timeout { .. } | Self::ErrorState { .. }
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport {
            message: value.to_string(),
        }
    }
}
