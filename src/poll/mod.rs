//! Convergence engine for asynchronous backend operations.
//!
//! Mutating calls against the backend acknowledge immediately and converge in
//! the background; the helpers here poll a resource's `get` endpoint on a
//! fixed interval until it reaches the expected terminal state, disappears,
//! or the overall budget elapses.
//!
//! Policy, per the backend contract: transient errors observed *inside* a
//! polling loop are logged and swallowed; only the overall deadline (or a
//! terminal error state on the resource itself) is fatal. A 404 is a normal
//! terminal outcome for delete-type waits.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::ApiError;

#[cfg(test)]
mod tests;

/// Interval and overall budget for one polling loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Sleep between polls.
    pub interval: Duration,
    /// Overall wall-clock budget.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Builds a policy from an interval and a budget.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Cooperative cancellation handle for long-running waits.
///
/// Cancellation is observed before every sleep; an in-flight HTTP call is
/// allowed to finish, after which the wait returns [`ApiError::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every wait sharing this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Classification of a polled resource against the wait's goal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// The resource reached the expected terminal state.
    Ready,
    /// Still transitioning; keep polling.
    Pending,
    /// The resource landed in its terminal error state. The wait stops and
    /// the message is surfaced to the caller.
    Failed(String),
}

/// Polls `fetch` until `classify` reports the resource ready.
///
/// A `fetch` returning `Ok(None)` (resource not visible yet, or 404 races
/// during creation) keeps polling. Transient `fetch` errors are swallowed
/// until the deadline.
///
/// # Errors
///
/// - [`ApiError::ErrorState`] when `classify` reports failure.
/// - [`ApiError::Cancelled`] when the token fires.
/// - [`ApiError::Timeout`] when the budget elapses first.
pub async fn await_state<T, F, Fut, C>(
    policy: PollPolicy,
    token: &CancelToken,
    resource: &str,
    resource_id: &str,
    action: &str,
    mut fetch: F,
    classify: C,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ApiError>>,
    C: Fn(&T) -> Verdict,
{
    let deadline = Instant::now() + policy.timeout;
    loop {
        if token.is_cancelled() {
            return Err(cancelled(action, resource_id));
        }

        match fetch().await {
            Ok(Some(item)) => match classify(&item) {
                Verdict::Ready => return Ok(item),
                Verdict::Failed(message) => {
                    return Err(ApiError::ErrorState {
                        resource: resource.to_owned(),
                        id: resource_id.to_owned(),
                        message,
                    });
                }
                Verdict::Pending => {
                    debug!(resource, resource_id, action, "still transitioning");
                }
            },
            Ok(None) => {
                debug!(resource, resource_id, action, "resource not visible yet");
            }
            Err(err) if err.is_fatal_while_polling() => return Err(err),
            Err(err) => {
                warn!(resource, resource_id, action, error = %err, "transient poll error");
            }
        }

        if Instant::now() + policy.interval > deadline {
            return Err(timeout(action, resource_id));
        }
        if token.is_cancelled() {
            return Err(cancelled(action, resource_id));
        }
        sleep(policy.interval).await;
    }
}

/// Polls `fetch` until the resource disappears or reports its deleted state.
///
/// Absence (`Ok(None)`, or a [`ApiError::NotFound`] from the fetch) is the
/// success outcome; delete semantics are idempotent.
///
/// # Errors
///
/// Returns [`ApiError::Timeout`] when the resource is still visible at the
/// deadline and [`ApiError::Cancelled`] when the token fires.
pub async fn await_gone<T, F, Fut, D>(
    policy: PollPolicy,
    token: &CancelToken,
    resource: &str,
    resource_id: &str,
    mut fetch: F,
    is_deleted: D,
) -> Result<(), ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ApiError>>,
    D: Fn(&T) -> bool,
{
    let action = format!("{resource} removal");
    let deadline = Instant::now() + policy.timeout;
    loop {
        if token.is_cancelled() {
            return Err(cancelled(&action, resource_id));
        }

        match fetch().await {
            Ok(None) => return Ok(()),
            Ok(Some(item)) if is_deleted(&item) => return Ok(()),
            Ok(Some(_)) => {
                debug!(resource, resource_id, "still present");
            }
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) if err.is_fatal_while_polling() => return Err(err),
            Err(err) => {
                warn!(resource, resource_id, error = %err, "transient poll error");
            }
        }

        if Instant::now() + policy.interval > deadline {
            return Err(timeout(&action, resource_id));
        }
        if token.is_cancelled() {
            return Err(cancelled(&action, resource_id));
        }
        sleep(policy.interval).await;
    }
}

/// Re-issues `op` while the backend reports a 409-class conflict.
///
/// Anything other than a conflict, success included, ends the loop at once.
///
/// # Errors
///
/// Returns [`ApiError::Timeout`] when the conflict persists past the budget
/// and [`ApiError::Cancelled`] when the token fires; any non-conflict error
/// from `op` propagates unchanged.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: PollPolicy,
    token: &CancelToken,
    resource_id: &str,
    action: &str,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let deadline = Instant::now() + policy.timeout;
    loop {
        if token.is_cancelled() {
            return Err(cancelled(action, resource_id));
        }

        match op().await {
            Err(err) if err.is_conflict() => {
                debug!(resource_id, action, "resource busy, will retry");
            }
            other => return other,
        }

        if Instant::now() + policy.interval > deadline {
            return Err(timeout(action, resource_id));
        }
        sleep(policy.interval).await;
    }
}

fn timeout(action: &str, resource_id: &str) -> ApiError {
    ApiError::Timeout {
        action: action.to_owned(),
        resource_id: resource_id.to_owned(),
    }
}

fn cancelled(action: &str, resource_id: &str) -> ApiError {
    ApiError::Cancelled {
        action: action.to_owned(),
        resource_id: resource_id.to_owned(),
    }
}
