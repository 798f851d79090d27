//! Server (virtual machine) lifecycle controller.
//!
//! Launch is the one multi-step provisioning sequence in the crate: when the
//! caller asks for a subnet attachment, a network port is allocated first and
//! its id stashed in the create metadata under [`PORT_ID_METADATA_KEY`],
//! because the backend does not reliably echo the port back. The port belongs
//! to the server's lifecycle from that moment: it is removed when the server
//! is terminated, and cleaned up best-effort when the launch fails.

mod cleanup;
mod translate;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::capability::VmCapabilities;
use crate::config::CloudConfig;
use crate::error::ApiError;
use crate::json;
use crate::poll::{self, CancelToken, PollPolicy, Verdict};
use crate::port::PortSupport;
use crate::state::ResourceStatus;
use crate::tags::{self, TagMap};
use crate::transport::ApiCall;

const SERVICE: &str = "compute";

/// Metadata key carrying the id of the port allocated during launch.
pub const PORT_ID_METADATA_KEY: &str = "stratus:portId";

/// Canonical server states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VmState {
    /// Building, resizing, or otherwise transitioning.
    Pending,
    /// Active and reachable.
    Running,
    /// Rebooting (soft or hard).
    Rebooting,
    /// Being paused.
    Pausing,
    /// Paused in memory.
    Paused,
    /// Shutting down.
    Stopping,
    /// Shut off but still provisioned.
    Stopped,
    /// Being suspended to disk.
    Suspending,
    /// Suspended to disk.
    Suspended,
    /// Deleted. Terminal.
    Terminated,
    /// Provider-reported failure. Terminal; the controller never retries out
    /// of this state.
    Error,
}

impl VmState {
    /// True for states from which no further spontaneous transition is
    /// expected.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Error)
    }
}

/// Canonical server record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VirtualMachine {
    /// Provider-assigned identifier, immutable once created.
    pub id: String,
    /// Account owning the server.
    pub owner_account_id: String,
    /// Region the server lives in.
    pub region_id: String,
    /// Display name; defaults to the id when the backend omits one.
    pub name: String,
    /// Free-form description, empty when absent.
    pub description: String,
    /// Canonical state.
    pub state: VmState,
    /// Raw status string as the backend reported it.
    pub provider_status: String,
    /// Creation time in epoch milliseconds, -1 when unknown.
    pub created: i64,
    /// Product (flavor) identifier.
    pub product_id: String,
    /// Machine image identifier.
    pub image_id: String,
    /// Publicly routable addresses.
    pub public_addresses: Vec<String>,
    /// Private addresses.
    pub private_addresses: Vec<String>,
    /// Tags stored on the server.
    pub metadata: TagMap,
    /// Dependent port id recorded at launch, when one was allocated.
    pub port_id: Option<String>,
    /// Provider fault message, populated when the server is in ERROR.
    pub fault: Option<String>,
}

/// Caller intent for a launch. Consumed once.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VmLaunchOptions {
    /// Display name; a unique one is generated when empty.
    pub name: String,
    /// Machine image to boot from.
    pub image_id: String,
    /// Product (flavor) to provision.
    pub product_id: String,
    /// Subnet to attach to via a dedicated port.
    pub subnet_id: Option<String>,
    /// Firewall (security group) names to apply.
    pub firewall_ids: Vec<String>,
    /// SSH key pair name.
    pub key_name: Option<String>,
    /// Boot-time user data, already encoded the way the backend expects.
    pub user_data: Option<String>,
    /// Tags stored on the server at creation.
    pub metadata: TagMap,
}

impl VmLaunchOptions {
    /// Starts a builder for launch options.
    #[must_use]
    pub fn builder() -> VmLaunchOptionsBuilder {
        VmLaunchOptionsBuilder::default()
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when the image or product is missing.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.image_id.is_empty() {
            return Err(ApiError::Validation("image_id".to_owned()));
        }
        if self.product_id.is_empty() {
            return Err(ApiError::Validation("product_id".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`VmLaunchOptions`].
#[derive(Clone, Debug, Default)]
pub struct VmLaunchOptionsBuilder {
    options: VmLaunchOptions,
}

impl VmLaunchOptionsBuilder {
    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.options.name = value.into();
        self
    }

    /// Sets the machine image.
    #[must_use]
    pub fn image_id(mut self, value: impl Into<String>) -> Self {
        self.options.image_id = value.into();
        self
    }

    /// Sets the product (flavor).
    #[must_use]
    pub fn product_id(mut self, value: impl Into<String>) -> Self {
        self.options.product_id = value.into();
        self
    }

    /// Requests attachment to a subnet through a dedicated port.
    #[must_use]
    pub fn subnet_id(mut self, value: impl Into<String>) -> Self {
        self.options.subnet_id = Some(value.into());
        self
    }

    /// Adds a firewall by name.
    #[must_use]
    pub fn firewall_id(mut self, value: impl Into<String>) -> Self {
        self.options.firewall_ids.push(value.into());
        self
    }

    /// Sets the SSH key pair name.
    #[must_use]
    pub fn key_name(mut self, value: impl Into<String>) -> Self {
        self.options.key_name = Some(value.into());
        self
    }

    /// Sets pre-encoded boot-time user data.
    #[must_use]
    pub fn user_data(mut self, value: impl Into<String>) -> Self {
        self.options.user_data = Some(value.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.metadata.insert(key.into(), value.into());
        self
    }

    /// Builds and validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when a required field is missing.
    pub fn build(self) -> Result<VmLaunchOptions, ApiError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// Lifecycle controller for servers.
pub struct ServerSupport<T: ApiCall> {
    transport: Arc<T>,
    config: Arc<CloudConfig>,
    capabilities: VmCapabilities,
    ports: PortSupport<T>,
}

impl<T: ApiCall> ServerSupport<T> {
    /// Creates a controller over the given transport and configuration.
    #[must_use]
    pub fn new(transport: Arc<T>, config: Arc<CloudConfig>) -> Self {
        let capabilities = VmCapabilities::for_variant(config.variant);
        let ports = PortSupport::new(Arc::clone(&transport));
        Self {
            transport,
            config,
            capabilities,
            ports,
        }
    }

    /// What the configured variant allows.
    #[must_use]
    pub const fn capabilities(&self) -> VmCapabilities {
        self.capabilities
    }

    /// Fetches one server. Absence is a normal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] on a malformed response; transport and
    /// provider errors propagate.
    pub async fn get(&self, id: &str) -> Result<Option<VirtualMachine>, ApiError> {
        match self.transport.get(SERVICE, &format!("servers/{id}")).await? {
            None => Ok(None),
            Some(value) => {
                let raw = json::require_object(&value, "server")?;
                translate::virtual_machine(raw, &self.config.account_id, &self.config.region_id)
            }
        }
    }

    /// Lists all servers in the region.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] when the collection wrapper is missing.
    pub async fn list(&self) -> Result<Vec<VirtualMachine>, ApiError> {
        let Some(value) = self.transport.get(SERVICE, "servers/detail").await? else {
            return Ok(Vec::new());
        };
        let items = json::require_array(&value, "servers")?;
        let mut servers = Vec::with_capacity(items.len());
        for raw in items {
            if let Some(server) =
                translate::virtual_machine(raw, &self.config.account_id, &self.config.region_id)?
            {
                servers.push(server);
            }
        }
        Ok(servers)
    }

    /// Lightweight id + state listing.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] when the collection wrapper is missing.
    pub async fn list_status(&self) -> Result<Vec<ResourceStatus<VmState>>, ApiError> {
        let Some(value) = self.transport.get(SERVICE, "servers").await? else {
            return Ok(Vec::new());
        };
        let items = json::require_array(&value, "servers")?;
        Ok(items
            .iter()
            .filter_map(|raw| {
                let id = json::string_field(raw, &["id"])?;
                let status = json::string_field(raw, &["status"]);
                Some(ResourceStatus {
                    id,
                    state: translate::SERVER_STATUS.resolve(status.as_deref()),
                })
            })
            .collect())
    }

    /// Launches a server and waits for it to leave PENDING.
    ///
    /// When a subnet is requested, a port is allocated first and recorded in
    /// the create metadata. Any failure after that point (submission error,
    /// missing echo, or the server converging to ERROR) triggers best-effort
    /// cleanup of the port before the original error is surfaced. A
    /// convergence timeout does not trigger cleanup: the server may still
    /// complete, and its port must stay attached.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] when a successful submission echoes no
    /// server, [`ApiError::ErrorState`] when the server lands in ERROR, and
    /// [`ApiError::Timeout`]/[`ApiError::Cancelled`] from the wait.
    pub async fn launch(
        &self,
        options: VmLaunchOptions,
        token: &CancelToken,
    ) -> Result<VirtualMachine, ApiError> {
        options.validate()?;
        let mut options = options;

        if let Some(subnet_id) = options.subnet_id.clone() {
            let port_name = format!("stratus-port-{}", Uuid::new_v4().simple());
            let port = self.ports.create(&subnet_id, &port_name).await?;
            options.metadata = translate::merged_metadata(&options.metadata, Some(&port.id));
        }

        let name = if options.name.is_empty() {
            format!("stratus-{}", Uuid::new_v4().simple())
        } else {
            options.name.clone()
        };
        let body = translate::launch_request(&options, &name);

        let created = match self.submit_launch(body).await {
            Ok(server) => server,
            Err(err) => {
                cleanup::cleanup_on_failure(&self.ports, &options, None).await;
                return Err(err);
            }
        };

        let result = poll::await_state(
            self.state_change_policy(),
            token,
            "server",
            &created.id,
            "server launch",
            || self.get(&created.id),
            |server: &VirtualMachine| match server.state {
                VmState::Pending => Verdict::Pending,
                VmState::Error => Verdict::Failed(
                    server
                        .fault
                        .clone()
                        .unwrap_or_else(|| "server entered ERROR during launch".to_owned()),
                ),
                _ => Verdict::Ready,
            },
        )
        .await;

        match result {
            Ok(server) => Ok(server),
            Err(err) => {
                if matches!(err, ApiError::ErrorState { .. }) {
                    cleanup::cleanup_on_failure(&self.ports, &options, None).await;
                }
                Err(err)
            }
        }
    }

    async fn submit_launch(&self, body: Value) -> Result<VirtualMachine, ApiError> {
        let Some(value) = self.transport.post(SERVICE, "servers", body).await? else {
            return Err(ApiError::Protocol {
                message: "no server was created and no error was returned".to_owned(),
            });
        };
        let raw = json::require_object(&value, "server")?;
        translate::virtual_machine(raw, &self.config.account_id, &self.config.region_id)?.ok_or_else(
            || ApiError::Protocol {
                message: "no server was created and no error was returned".to_owned(),
            },
        )
    }

    /// Terminates a server and waits until it is gone.
    ///
    /// Idempotent: an absent id returns success. The delete call is retried
    /// on conflict (the backend refuses deletion mid-transition) up to the
    /// configured budget. A dependent port recorded at launch is removed
    /// best-effort afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Timeout`] when the conflict budget or the
    /// removal wait elapses; transport and provider errors propagate.
    pub async fn terminate(&self, id: &str, token: &CancelToken) -> Result<(), ApiError> {
        let Some(server) = self.get(id).await? else {
            return Ok(());
        };

        poll::retry_on_conflict(
            self.conflict_policy(),
            token,
            id,
            "server removal",
            || async move {
                match self.transport.delete(SERVICE, &format!("servers/{id}")).await {
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
            "server",
            id,
            || self.get(id),
            |server: &VirtualMachine| server.state == VmState::Terminated,
        )
        .await?;

        if let Some(port_id) = server.port_id.as_deref() {
            if let Err(err) = self.ports.remove(port_id).await {
                warn!(server = id, port = port_id, error = %err, "failed to delete dependent port");
            }
        }
        Ok(())
    }

    /// Starts a stopped server.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unsupported`] on variants without stop/start and
    /// [`ApiError::NotFound`] when the server does not exist.
    pub async fn start(&self, id: &str) -> Result<(), ApiError> {
        VmCapabilities::require("start server", self.capabilities.can_start)?;
        self.action(id, "os-start", None).await
    }

    /// Stops a running server in place.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unsupported`] on variants without stop/start and
    /// [`ApiError::NotFound`] when the server does not exist.
    pub async fn stop(&self, id: &str) -> Result<(), ApiError> {
        VmCapabilities::require("stop server", self.capabilities.can_stop)?;
        self.action(id, "os-stop", None).await
    }

    /// Reboots a server.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] when the server does not exist.
    pub async fn reboot(&self, id: &str) -> Result<(), ApiError> {
        self.action(id, "reboot", Some(json!({"type": "SOFT"}))).await
    }

    /// Pauses a server in memory.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unsupported`] on variants without pause.
    pub async fn pause(&self, id: &str) -> Result<(), ApiError> {
        VmCapabilities::require("pause server", self.capabilities.can_pause)?;
        self.action(id, "pause", None).await
    }

    /// Unpauses a paused server.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unsupported`] on variants without pause.
    pub async fn unpause(&self, id: &str) -> Result<(), ApiError> {
        VmCapabilities::require("unpause server", self.capabilities.can_pause)?;
        self.action(id, "unpause", None).await
    }

    /// Suspends a server to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unsupported`] on variants without suspend.
    pub async fn suspend(&self, id: &str) -> Result<(), ApiError> {
        VmCapabilities::require("suspend server", self.capabilities.can_suspend)?;
        self.action(id, "suspend", None).await
    }

    /// Resumes a suspended server.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unsupported`] on variants without suspend.
    pub async fn resume(&self, id: &str) -> Result<(), ApiError> {
        VmCapabilities::require("resume server", self.capabilities.can_suspend)?;
        self.action(id, "resume", None).await
    }

    /// Resizes a server to a new product, confirming when required.
    ///
    /// Two-phase: the resize call is issued, the server is polled out of its
    /// RESIZE transitional status, and, when it lands in VERIFY_RESIZE, a
    /// confirm call is issued and polled to ACTIVE. An ACTIVE server whose
    /// product does not match the request is a hard failure; the confirm
    /// step is deliberately not retried.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::ResizeNotApplied`] when the backend reports
    /// success without the product change, [`ApiError::Unsupported`] on
    /// variants without resize, and [`ApiError::NotFound`] when the server
    /// does not exist.
    pub async fn resize(
        &self,
        id: &str,
        product_id: &str,
        token: &CancelToken,
    ) -> Result<VirtualMachine, ApiError> {
        VmCapabilities::require("resize server", self.capabilities.can_resize)?;
        self.action(id, "resize", Some(json!({"flavorRef": product_id})))
            .await?;

        let policy = PollPolicy::new(
            self.config.timeouts.poll_interval,
            self.config.timeouts.resize,
        );
        let server = poll::await_state(
            policy,
            token,
            "server",
            id,
            "server resize",
            || self.get(id),
            |server: &VirtualMachine| classify_resize(server, false),
        )
        .await?;

        let server = if server.provider_status.eq_ignore_ascii_case("VERIFY_RESIZE") {
            self.transport
                .post(
                    SERVICE,
                    &format!("servers/{id}/action"),
                    translate::action_body("confirmResize", None),
                )
                .await?;
            poll::await_state(
                policy,
                token,
                "server",
                id,
                "server resize confirmation",
                || self.get(id),
                |server: &VirtualMachine| classify_resize(server, true),
            )
            .await?
        } else {
            server
        };

        if server.state == VmState::Running && server.product_id != product_id {
            return Err(ApiError::ResizeNotApplied {
                id: id.to_owned(),
                requested: product_id.to_owned(),
                actual: server.product_id,
            });
        }
        Ok(server)
    }

    /// Replaces the server's tags.
    ///
    /// # Errors
    ///
    /// Transport and provider errors propagate.
    pub async fn set_tags(&self, id: &str, tag_map: &TagMap) -> Result<(), ApiError> {
        self.transport
            .put(
                SERVICE,
                &format!("servers/{id}/metadata"),
                tags::metadata_body(tag_map),
            )
            .await?;
        Ok(())
    }

    /// Merges tags into the server's existing set.
    ///
    /// # Errors
    ///
    /// Transport and provider errors propagate.
    pub async fn update_tags(&self, id: &str, tag_map: &TagMap) -> Result<(), ApiError> {
        self.transport
            .post(
                SERVICE,
                &format!("servers/{id}/metadata"),
                tags::metadata_body(tag_map),
            )
            .await?;
        Ok(())
    }

    /// Removes tags by key. Missing keys are ignored.
    ///
    /// # Errors
    ///
    /// Transport and provider errors other than absence propagate.
    pub async fn remove_tags(&self, id: &str, keys: &[&str]) -> Result<(), ApiError> {
        for key in keys {
            match self
                .transport
                .delete(SERVICE, &format!("servers/{id}/metadata/{key}"))
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Posts an action body, requiring the server to pre-exist.
    async fn action(
        &self,
        id: &str,
        verb: &str,
        arguments: Option<Value>,
    ) -> Result<(), ApiError> {
        if self.get(id).await?.is_none() {
            return Err(ApiError::NotFound {
                resource: "server".to_owned(),
                id: id.to_owned(),
            });
        }
        self.transport
            .post(
                SERVICE,
                &format!("servers/{id}/action"),
                translate::action_body(verb, arguments),
            )
            .await?;
        Ok(())
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

/// Resize wait classification over the raw transitional statuses.
fn classify_resize(server: &VirtualMachine, confirming: bool) -> Verdict {
    let status = server.provider_status.as_str();
    if status.eq_ignore_ascii_case("RESIZE") || status.eq_ignore_ascii_case("REVERT_RESIZE") {
        return Verdict::Pending;
    }
    if confirming && status.eq_ignore_ascii_case("VERIFY_RESIZE") {
        return Verdict::Pending;
    }
    if server.state == VmState::Error {
        return Verdict::Failed(
            server
                .fault
                .clone()
                .unwrap_or_else(|| "server entered ERROR during resize".to_owned()),
        );
    }
    Verdict::Ready
}
