//! Load-balancer controller.
//!
//! Balancers briefly leave ACTIVE while the backend applies any mutation, so
//! endpoint changes wait for the balancer to settle back to ACTIVE before
//! returning. The set of supported balancing algorithms is the one capability
//! that needs a live backend lookup; it is fetched once per controller and
//! cached.


use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::sync::OnceCell;

use crate::capability::LbCapabilities;
use crate::config::CloudConfig;
use crate::error::ApiError;
use crate::json;
use crate::poll::{self, CancelToken, PollPolicy, Verdict};
use crate::state::{ResourceStatus, StatusTable};
use crate::transport::ApiCall;

const SERVICE: &str = "loadbalancer";

/// Algorithms assumed when the backend offers no discovery endpoint.
const DEFAULT_ALGORITHMS: &[&str] = &["ROUND_ROBIN", "LEAST_CONNECTIONS", "RANDOM"];

/// Canonical load-balancer states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LbState {
    /// Being built.
    Pending,
    /// Serving traffic.
    Active,
    /// A mutation is being applied.
    Updating,
    /// Being deleted.
    Deleting,
    /// Deleted. Terminal.
    Deleted,
    /// Failed. Terminal.
    Error,
}

/// Backend status strings for load balancers, folded to canonical states.
const LB_STATUS: StatusTable<LbState> = StatusTable::new(
    "load balancer",
    &[
        ("BUILD", LbState::Pending),
        ("ACTIVE", LbState::Active),
        ("PENDING_UPDATE", LbState::Updating),
        ("PENDING_DELETE", LbState::Deleting),
        ("DELETED", LbState::Deleted),
        ("ERROR", LbState::Error),
    ],
    LbState::Pending,
);

/// One backend endpoint (node) behind a balancer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LbEndpoint {
    /// Provider-assigned node identifier.
    pub id: String,
    /// Address traffic is forwarded to.
    pub address: String,
    /// Port traffic is forwarded to.
    pub port: u16,
    /// Whether the node is currently taking traffic.
    pub enabled: bool,
}

/// Canonical load-balancer record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadBalancer {
    /// Provider-assigned identifier.
    pub id: String,
    /// Region the balancer lives in.
    pub region_id: String,
    /// Display name; defaults to the id when the backend omits one.
    pub name: String,
    /// Canonical state.
    pub state: LbState,
    /// Raw status string as the backend reported it.
    pub provider_status: String,
    /// Balancing algorithm in use.
    pub algorithm: String,
    /// Listener protocol, for example `HTTP`.
    pub protocol: String,
    /// Listener port.
    pub listen_port: u16,
    /// Public address traffic arrives on, when assigned.
    pub public_address: Option<String>,
    /// Endpoints behind the balancer.
    pub endpoints: Vec<LbEndpoint>,
    /// Creation time in epoch milliseconds, -1 when unknown.
    pub created: i64,
}

/// Caller intent for a load-balancer creation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LbCreateOptions {
    /// Display name.
    pub name: String,
    /// Listener protocol.
    pub protocol: String,
    /// Listener port.
    pub listen_port: u16,
    /// Balancing algorithm; the backend default applies when empty.
    pub algorithm: String,
    /// Initial endpoints, as (address, port) pairs.
    pub endpoints: Vec<(String, u16)>,
}

impl LbCreateOptions {
    /// Options for a balancer listening on the given protocol and port.
    #[must_use]
    pub fn new(name: impl Into<String>, protocol: impl Into<String>, listen_port: u16) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into(),
            listen_port,
            ..Self::default()
        }
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when the name or protocol is empty
    /// or the listener port is zero.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.is_empty() {
            return Err(ApiError::Validation("name".to_owned()));
        }
        if self.protocol.is_empty() {
            return Err(ApiError::Validation("protocol".to_owned()));
        }
        if self.listen_port == 0 {
            return Err(ApiError::Validation("listen_port".to_owned()));
        }
        Ok(())
    }
}

/// Lifecycle controller for load balancers.
pub struct LbSupport<T: ApiCall> {
    transport: Arc<T>,
    config: Arc<CloudConfig>,
    capabilities: LbCapabilities,
    algorithms: OnceCell<Vec<String>>,
}

impl<T: ApiCall> LbSupport<T> {
    /// Creates a controller over the given transport and configuration.
    #[must_use]
    pub fn new(transport: Arc<T>, config: Arc<CloudConfig>) -> Self {
        let capabilities = LbCapabilities::for_variant(config.variant);
        Self {
            transport,
            config,
            capabilities,
            algorithms: OnceCell::new(),
        }
    }

    /// What the configured variant allows.
    #[must_use]
    pub const fn capabilities(&self) -> LbCapabilities {
        self.capabilities
    }

    /// Algorithms the backend supports, fetched once and cached.
    ///
    /// # Errors
    ///
    /// Transport and provider errors from the first lookup propagate;
    /// subsequent calls serve the cached set.
    pub async fn algorithms(&self) -> Result<&[String], ApiError> {
        let algorithms = self
            .algorithms
            .get_or_try_init(|| async {
                let Some(value) = self
                    .transport
                    .get(SERVICE, "loadbalancers/algorithms")
                    .await?
                else {
                    return Ok::<Vec<String>, ApiError>(
                        DEFAULT_ALGORITHMS
                            .iter()
                            .map(|name| (*name).to_owned())
                            .collect(),
                    );
                };
                let items = json::require_array(&value, "algorithms")?;
                Ok(items
                    .iter()
                    .filter_map(|raw| json::string_field(raw, &["name"]))
                    .collect())
            })
            .await?;
        Ok(algorithms)
    }

    /// Fetches one balancer. Absence is a normal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] on a malformed response; transport and
    /// provider errors propagate.
    pub async fn get(&self, id: &str) -> Result<Option<LoadBalancer>, ApiError> {
        match self
            .transport
            .get(SERVICE, &format!("loadbalancers/{id}"))
            .await?
        {
            None => Ok(None),
            Some(value) => {
                let raw = json::require_object(&value, "loadBalancer")?;
                Ok(self.balancer(raw))
            }
        }
    }

    /// Lists all balancers in the region, following offset pagination when
    /// the backend applies it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] when the collection wrapper is missing.
    pub async fn list(&self) -> Result<Vec<LoadBalancer>, ApiError> {
        let mut balancers = Vec::new();
        // The offset advances by raw entries consumed, not by translated
        // records: id-less entries are dropped from the result but still
        // occupy positions on the backend's pages.
        let mut consumed: i64 = 0;
        let mut path = "loadbalancers".to_owned();
        loop {
            let Some(value) = self.transport.get(SERVICE, &path).await? else {
                return Ok(balancers);
            };
            let items = json::require_array(&value, "loadBalancers")?;
            consumed = consumed.saturating_add(i64::try_from(items.len()).unwrap_or(i64::MAX));
            balancers.extend(items.iter().filter_map(|raw| self.balancer(raw)));

            let Some(page) = json::page_info(&value) else {
                return Ok(balancers);
            };
            if items.is_empty() || consumed >= page.total_entries {
                return Ok(balancers);
            }
            path = format!("loadbalancers?offset={consumed}");
        }
    }

    /// Lightweight id + state listing.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] when the collection wrapper is missing.
    pub async fn list_status(&self) -> Result<Vec<ResourceStatus<LbState>>, ApiError> {
        let Some(value) = self.transport.get(SERVICE, "loadbalancers").await? else {
            return Ok(Vec::new());
        };
        let items = json::require_array(&value, "loadBalancers")?;
        Ok(items
            .iter()
            .filter_map(|raw| {
                let id = json::string_field(raw, &["id"])?;
                let status = json::string_field(raw, &["status"]);
                Some(ResourceStatus {
                    id,
                    state: LB_STATUS.resolve(status.as_deref()),
                })
            })
            .collect())
    }

    /// Creates a balancer and waits for it to become ACTIVE.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when the initial endpoint count
    /// exceeds the variant's limit, [`ApiError::Protocol`] when a successful
    /// submission echoes no balancer, and [`ApiError::ErrorState`] when the
    /// balancer lands in ERROR.
    pub async fn create(
        &self,
        options: LbCreateOptions,
        token: &CancelToken,
    ) -> Result<LoadBalancer, ApiError> {
        options.validate()?;
        if options.endpoints.len() > self.capabilities.max_endpoints {
            return Err(ApiError::Validation(format!(
                "at most {} endpoints are supported, got {}",
                self.capabilities.max_endpoints,
                options.endpoints.len()
            )));
        }

        let mut body = Map::new();
        body.insert("name".to_owned(), json!(options.name));
        body.insert("protocol".to_owned(), json!(options.protocol));
        body.insert("port".to_owned(), json!(options.listen_port));
        if !options.algorithm.is_empty() {
            body.insert("algorithm".to_owned(), json!(options.algorithm));
        }
        if !options.endpoints.is_empty() {
            body.insert("nodes".to_owned(), node_bodies(&options.endpoints));
        }
        let body = json!({ "loadBalancer": Value::Object(body) });

        let Some(value) = self.transport.post(SERVICE, "loadbalancers", body).await? else {
            return Err(ApiError::Protocol {
                message: "no load balancer was created and no error was returned".to_owned(),
            });
        };
        let raw = json::require_object(&value, "loadBalancer")?;
        let created = self.balancer(raw).ok_or_else(|| ApiError::Protocol {
            message: "created load balancer is missing an id".to_owned(),
        })?;

        self.await_active(&created.id, "load balancer creation", token)
            .await
    }

    /// Adds endpoints to a balancer and waits for it to settle back to
    /// ACTIVE.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when the resulting endpoint count
    /// would exceed the variant's limit and [`ApiError::NotFound`] when the
    /// balancer does not exist.
    pub async fn add_endpoints(
        &self,
        id: &str,
        endpoints: &[(String, u16)],
        token: &CancelToken,
    ) -> Result<LoadBalancer, ApiError> {
        if endpoints.is_empty() {
            return self.require(id).await;
        }
        let balancer = self.require(id).await?;
        if balancer.endpoints.len() + endpoints.len() > self.capabilities.max_endpoints {
            return Err(ApiError::Validation(format!(
                "at most {} endpoints are supported",
                self.capabilities.max_endpoints
            )));
        }

        let body = json!({ "nodes": node_bodies(endpoints) });
        self.transport
            .post(SERVICE, &format!("loadbalancers/{id}/nodes"), body)
            .await?;
        self.await_active(id, "load balancer endpoint addition", token)
            .await
    }

    /// Removes the endpoints serving the given addresses and waits for the
    /// balancer to settle back to ACTIVE. Unknown addresses are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] when the balancer does not exist;
    /// transport and provider errors propagate.
    pub async fn remove_endpoints(
        &self,
        id: &str,
        addresses: &[&str],
        token: &CancelToken,
    ) -> Result<LoadBalancer, ApiError> {
        let balancer = self.require(id).await?;
        let doomed: Vec<&LbEndpoint> = balancer
            .endpoints
            .iter()
            .filter(|endpoint| addresses.contains(&endpoint.address.as_str()))
            .collect();
        if doomed.is_empty() {
            return Ok(balancer);
        }

        for endpoint in doomed {
            match self
                .transport
                .delete(SERVICE, &format!("loadbalancers/{id}/nodes/{}", endpoint.id))
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        self.await_active(id, "load balancer endpoint removal", token)
            .await
    }

    /// Deletes a balancer and waits until it is gone. Absence is success.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Timeout`] when the conflict budget or the removal
    /// wait elapses; transport and provider errors propagate.
    pub async fn remove(&self, id: &str, token: &CancelToken) -> Result<(), ApiError> {
        poll::retry_on_conflict(
            self.conflict_policy(),
            token,
            id,
            "load balancer removal",
            || async move {
                match self
                    .transport
                    .delete(SERVICE, &format!("loadbalancers/{id}"))
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(err) if err.is_not_found() => Ok(()),
                    Err(err) => Err(err),
                }
            },
        )
        .await?;

        poll::await_gone(
            self.state_change_policy(),
            token,
            "load balancer",
            id,
            || self.get(id),
            |balancer: &LoadBalancer| balancer.state == LbState::Deleted,
        )
        .await
    }

    async fn require(&self, id: &str) -> Result<LoadBalancer, ApiError> {
        self.get(id).await?.ok_or_else(|| ApiError::NotFound {
            resource: "load balancer".to_owned(),
            id: id.to_owned(),
        })
    }

    async fn await_active(
        &self,
        id: &str,
        action: &str,
        token: &CancelToken,
    ) -> Result<LoadBalancer, ApiError> {
        poll::await_state(
            self.state_change_policy(),
            token,
            "load balancer",
            id,
            action,
            || self.get(id),
            |balancer: &LoadBalancer| match balancer.state {
                LbState::Active => Verdict::Ready,
                LbState::Error => {
                    Verdict::Failed(format!("load balancer entered ERROR during {action}"))
                }
                _ => Verdict::Pending,
            },
        )
        .await
    }

    /// Maps a raw balancer object to the domain record; `None` when the id
    /// is absent.
    fn balancer(&self, raw: &Value) -> Option<LoadBalancer> {
        let id = json::string_field(raw, &["id"])?;
        let status = json::string_field(raw, &["status"]);
        let endpoints = json::array_field(raw, &["nodes"])
            .map(|entries| entries.iter().filter_map(endpoint).collect())
            .unwrap_or_default();
        let public_address = json::array_field(raw, &["virtualIps", "virtual_ips"])
            .and_then(|vips| {
                vips.iter()
                    .find_map(|vip| json::string_field(vip, &["address"]))
            })
            .or_else(|| json::string_field(raw, &["address"]));
        Some(LoadBalancer {
            name: json::string_field(raw, &["name"]).unwrap_or_else(|| id.clone()),
            region_id: self.config.region_id.clone(),
            state: LB_STATUS.resolve(status.as_deref()),
            provider_status: status.unwrap_or_default(),
            algorithm: json::string_field(raw, &["algorithm"]).unwrap_or_default(),
            protocol: json::string_field(raw, &["protocol"]).unwrap_or_default(),
            listen_port: port_field(raw, &["port"]),
            public_address,
            endpoints,
            created: json::timestamp_field(raw, &["created", "createdAt", "created_at"]),
            id,
        })
    }

    fn state_change_policy(&self) -> PollPolicy {
        PollPolicy::new(
            self.config.timeouts.poll_interval,
            self.config.timeouts.state_change,
        )
    }

    fn conflict_policy(&self) -> PollPolicy {
        PollPolicy::new(
            self.config.timeouts.conflict_retry_interval,
            self.config.timeouts.conflict_budget,
        )
    }
}

fn endpoint(raw: &Value) -> Option<LbEndpoint> {
    let id = json::string_field(raw, &["id"])?;
    let address = json::string_field(raw, &["address", "addr"])?;
    let condition = json::string_field(raw, &["condition", "status"]);
    Some(LbEndpoint {
        id,
        address,
        port: port_field(raw, &["port"]),
        enabled: condition.is_none_or(|value| value.eq_ignore_ascii_case("ENABLED")),
    })
}

fn node_bodies(endpoints: &[(String, u16)]) -> Value {
    let nodes: Vec<Value> = endpoints
        .iter()
        .map(|(address, port)| json!({"address": address, "port": port, "condition": "ENABLED"}))
        .collect();
    json!(nodes)
}

fn port_field(raw: &Value, aliases: &[&str]) -> u16 {
    json::int_field(raw, aliases)
        .and_then(|port| u16::try_from(port).ok())
        .unwrap_or_default()
}
