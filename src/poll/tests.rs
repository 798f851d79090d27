//! Unit tests for the convergence engine.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use rstest::rstest;

use super::*;

fn fast_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(1), Duration::from_millis(20))
}

/// FIFO script of fetch outcomes; once drained, the last configured filler
/// answer repeats.
struct Script {
    responses: RefCell<VecDeque<Result<Option<&'static str>, ApiError>>>,
    filler: Result<Option<&'static str>, ApiError>,
}

impl Script {
    fn new(
        responses: Vec<Result<Option<&'static str>, ApiError>>,
        filler: Result<Option<&'static str>, ApiError>,
    ) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            filler,
        }
    }

    async fn fetch(&self) -> Result<Option<&'static str>, ApiError> {
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.filler.clone())
    }
}

fn transient() -> ApiError {
    ApiError::Transport {
        message: "connection reset".to_owned(),
    }
}

#[tokio::test]
async fn await_state_returns_once_ready() {
    let script = Script::new(
        vec![Ok(Some("building")), Ok(Some("building"))],
        Ok(Some("active")),
    );
    let result = await_state(
        fast_policy(),
        &CancelToken::new(),
        "server",
        "srv-1",
        "server launch",
        || script.fetch(),
        |status| {
            if *status == "active" {
                Verdict::Ready
            } else {
                Verdict::Pending
            }
        },
    )
    .await;
    assert_eq!(result, Ok("active"));
}

#[tokio::test]
async fn await_state_swallows_transient_errors() {
    let script = Script::new(
        vec![Err(transient()), Err(transient()), Ok(Some("active"))],
        Ok(Some("active")),
    );
    let result = await_state(
        fast_policy(),
        &CancelToken::new(),
        "server",
        "srv-1",
        "server launch",
        || script.fetch(),
        |_| Verdict::Ready,
    )
    .await;
    assert_eq!(result, Ok("active"));
}

#[tokio::test]
async fn await_state_times_out_when_never_terminal() {
    let script = Script::new(Vec::new(), Ok(Some("building")));
    let result = await_state(
        fast_policy(),
        &CancelToken::new(),
        "server",
        "srv-1",
        "server launch",
        || script.fetch(),
        |_| Verdict::Pending,
    )
    .await;
    assert!(matches!(result, Err(ApiError::Timeout { .. })));
}

#[tokio::test]
async fn await_state_surfaces_error_state() {
    let script = Script::new(vec![Ok(Some("error"))], Ok(Some("error")));
    let result = await_state(
        fast_policy(),
        &CancelToken::new(),
        "server",
        "srv-1",
        "server launch",
        || script.fetch(),
        |_| Verdict::Failed("provider fault".to_owned()),
    )
    .await;
    assert!(matches!(result, Err(ApiError::ErrorState { .. })));
}

#[tokio::test]
async fn await_state_observes_cancellation() {
    let token = CancelToken::new();
    token.cancel();
    let script = Script::new(Vec::new(), Ok(Some("building")));
    let result = await_state(
        fast_policy(),
        &token,
        "server",
        "srv-1",
        "server launch",
        || script.fetch(),
        |_| Verdict::Pending,
    )
    .await;
    assert!(matches!(result, Err(ApiError::Cancelled { .. })));
}

#[rstest]
#[case::vanishes(vec![Ok(Some("deleting")), Ok(None)])]
#[case::not_found_error(vec![Ok(Some("deleting")), Err(ApiError::NotFound { resource: "server".to_owned(), id: "srv-1".to_owned() })])]
#[case::deleted_status(vec![Ok(Some("deleted"))])]
#[tokio::test]
async fn await_gone_treats_absence_as_success(
    #[case] responses: Vec<Result<Option<&'static str>, ApiError>>,
) {
    let script = Script::new(responses, Ok(Some("deleting")));
    let result = await_gone(
        fast_policy(),
        &CancelToken::new(),
        "server",
        "srv-1",
        || script.fetch(),
        |status| *status == "deleted",
    )
    .await;
    assert_eq!(result, Ok(()));
}

#[tokio::test]
async fn await_gone_times_out_on_residual_resource() {
    let script = Script::new(Vec::new(), Ok(Some("active")));
    let result = await_gone(
        fast_policy(),
        &CancelToken::new(),
        "server",
        "srv-1",
        || script.fetch(),
        |_| false,
    )
    .await;
    assert!(matches!(result, Err(ApiError::Timeout { .. })));
}

fn conflict() -> ApiError {
    ApiError::Conflict {
        resource: "volume".to_owned(),
        id: "vol-1".to_owned(),
        message: "busy".to_owned(),
    }
}

#[tokio::test]
async fn retry_on_conflict_retries_until_accepted() {
    let script = Script::new(vec![Err(conflict()), Err(conflict())], Ok(None));
    let result = retry_on_conflict(fast_policy(), &CancelToken::new(), "vol-1", "volume removal", || {
        script.fetch()
    })
    .await;
    assert_eq!(result, Ok(None));
    assert!(script.responses.borrow().is_empty());
}

#[tokio::test]
async fn retry_on_conflict_gives_up_at_deadline() {
    let script = Script::new(Vec::new(), Err(conflict()));
    let result = retry_on_conflict(fast_policy(), &CancelToken::new(), "vol-1", "volume removal", || {
        script.fetch()
    })
    .await;
    assert!(matches!(result, Err(ApiError::Timeout { .. })));
}

#[tokio::test]
async fn retry_on_conflict_propagates_other_errors_unchanged() {
    let script = Script::new(
        vec![Err(ApiError::Authentication {
            message: "expired".to_owned(),
        })],
        Ok(None),
    );
    let result = retry_on_conflict(fast_policy(), &CancelToken::new(), "vol-1", "volume removal", || {
        script.fetch()
    })
    .await;
    assert!(matches!(result, Err(ApiError::Authentication { .. })));
}
