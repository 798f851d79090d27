//! Client configuration.
//!
//! Every timeout the controllers use is promoted to configuration rather than
//! being a call-site constant, and the provider variant is an explicit field
//! on the configuration object so concurrent sessions against different
//! clouds cannot leak state into one another.

use std::time::Duration;

use crate::error::ApiError;

/// Cloud variants this client understands.
///
/// All three speak the same OpenStack-derived wire protocol but differ in
/// which lifecycle verbs they allow and in a handful of JSON field spellings.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProviderVariant {
    /// A stock OpenStack deployment.
    #[default]
    OpenStack,
    /// Rackspace public cloud.
    Rackspace,
    /// HP public cloud.
    HpCloud,
}

/// Convergence and retry budgets used by the lifecycle controllers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Overall budget for a resource to reach its expected terminal state.
    pub state_change: Duration,
    /// Sleep between delete retries when the backend reports a conflict.
    pub conflict_retry_interval: Duration,
    /// Overall budget for conflict-retried deletes.
    pub conflict_budget: Duration,
    /// Overall budget for the two-phase resize flow.
    pub resize: Duration,
    /// Lifetime of a cached authentication token.
    pub auth_token_ttl: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            state_change: Duration::from_secs(600),
            conflict_retry_interval: Duration::from_secs(15),
            conflict_budget: Duration::from_secs(300),
            resize: Duration::from_secs(1200),
            auth_token_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Timeouts {
    /// Fast budgets for deterministic tests.
    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            state_change: Duration::from_millis(20),
            conflict_retry_interval: Duration::from_millis(1),
            conflict_budget: Duration::from_millis(10),
            resize: Duration::from_millis(20),
            auth_token_ttl: Duration::from_secs(60),
        }
    }
}

/// Connection settings for one cloud account in one region.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudConfig {
    /// Base URL of the cloud API, without a trailing slash.
    pub endpoint: String,
    /// Username presented to the identity service.
    pub username: String,
    /// API key or password presented to the identity service.
    pub api_key: String,
    /// Account (tenant/project) identifier owning the resources.
    pub account_id: String,
    /// Region the client operates in.
    pub region_id: String,
    /// Which wire dialect the target cloud speaks.
    pub variant: ProviderVariant,
    /// Convergence budgets applied by the controllers.
    pub timeouts: Timeouts,
}

impl CloudConfig {
    /// Starts a builder for a [`CloudConfig`].
    #[must_use]
    pub fn builder() -> CloudConfigBuilder {
        CloudConfigBuilder::default()
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when any required field is empty and
    /// [`ApiError::Config`] when the timeout block is inconsistent.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.endpoint.is_empty() {
            return Err(ApiError::Validation("endpoint".to_owned()));
        }
        if self.username.is_empty() {
            return Err(ApiError::Validation("username".to_owned()));
        }
        if self.api_key.is_empty() {
            return Err(ApiError::Validation("api_key".to_owned()));
        }
        if self.account_id.is_empty() {
            return Err(ApiError::Validation("account_id".to_owned()));
        }
        if self.region_id.is_empty() {
            return Err(ApiError::Validation("region_id".to_owned()));
        }
        if self.timeouts.poll_interval.is_zero() {
            return Err(ApiError::Config(
                "poll_interval must be greater than zero".to_owned(),
            ));
        }
        if self.timeouts.state_change < self.timeouts.poll_interval {
            return Err(ApiError::Config(
                "state_change budget must cover at least one poll interval".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`CloudConfig`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default)]
pub struct CloudConfigBuilder {
    endpoint: String,
    username: String,
    api_key: String,
    account_id: String,
    region_id: String,
    variant: ProviderVariant,
    timeouts: Option<Timeouts>,
}

impl CloudConfigBuilder {
    /// Sets the API endpoint.
    #[must_use]
    pub fn endpoint(mut self, value: impl Into<String>) -> Self {
        self.endpoint = value.into();
        self
    }

    /// Sets the identity username.
    #[must_use]
    pub fn username(mut self, value: impl Into<String>) -> Self {
        self.username = value.into();
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, value: impl Into<String>) -> Self {
        self.api_key = value.into();
        self
    }

    /// Sets the owning account identifier.
    #[must_use]
    pub fn account_id(mut self, value: impl Into<String>) -> Self {
        self.account_id = value.into();
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn region_id(mut self, value: impl Into<String>) -> Self {
        self.region_id = value.into();
        self
    }

    /// Sets the provider variant.
    #[must_use]
    pub const fn variant(mut self, value: ProviderVariant) -> Self {
        self.variant = value;
        self
    }

    /// Overrides the default timeout block.
    #[must_use]
    pub const fn timeouts(mut self, value: Timeouts) -> Self {
        self.timeouts = Some(value);
        self
    }

    /// Builds and validates the [`CloudConfig`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<CloudConfig, ApiError> {
        let config = CloudConfig {
            endpoint: self.endpoint.trim().trim_end_matches('/').to_owned(),
            username: self.username.trim().to_owned(),
            api_key: self.api_key.trim().to_owned(),
            account_id: self.account_id.trim().to_owned(),
            region_id: self.region_id.trim().to_owned(),
            variant: self.variant,
            timeouts: self.timeouts.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn full_builder() -> CloudConfigBuilder {
        CloudConfig::builder()
            .endpoint("https://cloud.example/v2/")
            .username("user")
            .api_key("key")
            .account_id("acct")
            .region_id("region-1")
    }

    #[rstest]
    fn build_trims_and_strips_trailing_slash() {
        let config = full_builder().build().expect("config should build");
        assert_eq!(config.endpoint, "https://cloud.example/v2");
        assert_eq!(config.variant, ProviderVariant::OpenStack);
    }

    #[rstest]
    #[case::endpoint("endpoint", "", "u", "k", "a", "r")]
    #[case::username("username", "e", " ", "k", "a", "r")]
    #[case::api_key("api_key", "e", "u", "", "a", "r")]
    #[case::account_id("account_id", "e", "u", "k", "  ", "r")]
    #[case::region_id("region_id", "e", "u", "k", "a", "")]
    fn build_rejects_missing_fields(
        #[case] field: &str,
        #[case] endpoint: &str,
        #[case] username: &str,
        #[case] api_key: &str,
        #[case] account_id: &str,
        #[case] region_id: &str,
    ) {
        let err = CloudConfig::builder()
            .endpoint(endpoint)
            .username(username)
            .api_key(api_key)
            .account_id(account_id)
            .region_id(region_id)
            .build()
            .expect_err("expected validation failure");
        assert_eq!(err, ApiError::Validation(field.to_owned()));
    }

    #[rstest]
    fn build_rejects_zero_poll_interval() {
        let timeouts = Timeouts {
            poll_interval: Duration::ZERO,
            ..Timeouts::default()
        };
        let err = full_builder()
            .timeouts(timeouts)
            .build()
            .expect_err("expected config failure");
        assert!(matches!(err, ApiError::Config(_)));
    }
}
