//! Shared fixtures for integration tests.

use std::sync::Arc;
use std::time::Duration;

use stratus::test_support::ScriptedTransport;
use stratus::{CloudConfig, ProviderVariant, Timeouts};

/// Budgets small enough to keep polling tests deterministic and quick.
#[must_use]
pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        poll_interval: Duration::from_millis(1),
        state_change: Duration::from_millis(25),
        conflict_retry_interval: Duration::from_millis(1),
        conflict_budget: Duration::from_millis(10),
        resize: Duration::from_millis(25),
        auth_token_ttl: Duration::from_secs(60),
    }
}

#[must_use]
pub fn config(variant: ProviderVariant) -> Arc<CloudConfig> {
    Arc::new(
        CloudConfig::builder()
            .endpoint("https://cloud.example/v2")
            .username("user")
            .api_key("key")
            .account_id("acct")
            .region_id("region-1")
            .variant(variant)
            .timeouts(fast_timeouts())
            .build()
            .expect("test config should build"),
    )
}

#[must_use]
pub fn transport() -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new())
}
