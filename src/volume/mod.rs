//! Block-storage volume controller.
//!
//! Attach and detach go through the compute service (`os-volume_attachments`
//! on the server) while everything else lives on the volume service; both
//! sides converge asynchronously and are polled through the volume's own
//! status field.


use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::capability::VolumeCapabilities;
use crate::config::CloudConfig;
use crate::error::ApiError;
use crate::json;
use crate::poll::{self, CancelToken, PollPolicy, Verdict};
use crate::state::{ResourceStatus, StatusTable};
use crate::transport::ApiCall;

const SERVICE: &str = "volume";
const COMPUTE: &str = "compute";

/// Canonical volume states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VolumeState {
    /// Being created.
    Pending,
    /// Ready to attach.
    Available,
    /// Attachment in progress.
    Attaching,
    /// Attached to a server.
    InUse,
    /// Detachment in progress.
    Detaching,
    /// Being deleted.
    Deleting,
    /// Deleted. Terminal.
    Deleted,
    /// Creation, attachment, or deletion failed. Terminal.
    Error,
}

/// Backend status strings for volumes, folded to canonical states.
const VOLUME_STATUS: StatusTable<VolumeState> = StatusTable::new(
    "volume",
    &[
        ("CREATING", VolumeState::Pending),
        ("DOWNLOADING", VolumeState::Pending),
        ("AVAILABLE", VolumeState::Available),
        ("ATTACHING", VolumeState::Attaching),
        ("IN-USE", VolumeState::InUse),
        ("IN_USE", VolumeState::InUse),
        ("DETACHING", VolumeState::Detaching),
        ("DELETING", VolumeState::Deleting),
        ("DELETED", VolumeState::Deleted),
        ("ERROR", VolumeState::Error),
        ("ERROR_DELETING", VolumeState::Error),
    ],
    VolumeState::Pending,
);

/// One attachment of a volume to a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeAttachment {
    /// Server the volume is attached to.
    pub server_id: String,
    /// Device node on the server, for example `/dev/vdb`.
    pub device: String,
}

/// Canonical volume record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Provider-assigned identifier.
    pub id: String,
    /// Region the volume lives in.
    pub region_id: String,
    /// Display name; defaults to the id when the backend omits one.
    pub name: String,
    /// Free-form description, empty when absent.
    pub description: String,
    /// Canonical state.
    pub state: VolumeState,
    /// Size in gigabytes, -1 when unknown.
    pub size_gb: i64,
    /// Snapshot the volume was created from, when any.
    pub snapshot_id: Option<String>,
    /// Current attachments.
    pub attachments: Vec<VolumeAttachment>,
    /// Creation time in epoch milliseconds, -1 when unknown.
    pub created: i64,
}

/// Caller intent for a volume creation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeCreateOptions {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Size in gigabytes.
    pub size_gb: i64,
    /// Snapshot to seed the volume from.
    pub snapshot_id: Option<String>,
}

impl VolumeCreateOptions {
    /// Options for an empty volume of the given size.
    #[must_use]
    pub fn new(name: impl Into<String>, size_gb: i64) -> Self {
        Self {
            name: name.into(),
            size_gb,
            ..Self::default()
        }
    }
}

/// Lifecycle controller for volumes.
pub struct VolumeSupport<T: ApiCall> {
    transport: Arc<T>,
    config: Arc<CloudConfig>,
    capabilities: VolumeCapabilities,
}

impl<T: ApiCall> VolumeSupport<T> {
    /// Creates a controller over the given transport and configuration.
    #[must_use]
    pub fn new(transport: Arc<T>, config: Arc<CloudConfig>) -> Self {
        let capabilities = VolumeCapabilities::for_variant(config.variant);
        Self {
            transport,
            config,
            capabilities,
        }
    }

    /// What the configured variant allows.
    #[must_use]
    pub const fn capabilities(&self) -> VolumeCapabilities {
        self.capabilities
    }

    /// Fetches one volume. Absence is a normal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] on a malformed response; transport and
    /// provider errors propagate.
    pub async fn get(&self, id: &str) -> Result<Option<Volume>, ApiError> {
        match self.transport.get(SERVICE, &format!("volumes/{id}")).await? {
            None => Ok(None),
            Some(value) => {
                let raw = json::require_object(&value, "volume")?;
                Ok(self.volume(raw))
            }
        }
    }

    /// Lists all volumes in the region.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] when the collection wrapper is missing.
    pub async fn list(&self) -> Result<Vec<Volume>, ApiError> {
        let Some(value) = self.transport.get(SERVICE, "volumes").await? else {
            return Ok(Vec::new());
        };
        let items = json::require_array(&value, "volumes")?;
        Ok(items.iter().filter_map(|raw| self.volume(raw)).collect())
    }

    /// Lightweight id + state listing.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] when the collection wrapper is missing.
    pub async fn list_status(&self) -> Result<Vec<ResourceStatus<VolumeState>>, ApiError> {
        let Some(value) = self.transport.get(SERVICE, "volumes").await? else {
            return Ok(Vec::new());
        };
        let items = json::require_array(&value, "volumes")?;
        Ok(items
            .iter()
            .filter_map(|raw| {
                let id = json::string_field(raw, &["id"])?;
                let status = json::string_field(raw, &["status"]);
                Some(ResourceStatus {
                    id,
                    state: VOLUME_STATUS.resolve(status.as_deref()),
                })
            })
            .collect())
    }

    /// Creates a volume and waits for it to become available.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when the size is outside the
    /// variant's limits, [`ApiError::Protocol`] when a successful submission
    /// echoes no volume, and [`ApiError::ErrorState`] when the volume lands
    /// in ERROR.
    pub async fn create(
        &self,
        options: VolumeCreateOptions,
        token: &CancelToken,
    ) -> Result<Volume, ApiError> {
        if options.size_gb < self.capabilities.min_volume_gb
            || options.size_gb > self.capabilities.max_volume_gb
        {
            return Err(ApiError::Validation(format!(
                "volume size must be between {} and {} GB, got {}",
                self.capabilities.min_volume_gb, self.capabilities.max_volume_gb, options.size_gb
            )));
        }

        let mut body = Map::new();
        body.insert("size".to_owned(), json!(options.size_gb));
        if !options.name.is_empty() {
            body.insert("display_name".to_owned(), json!(options.name));
        }
        if !options.description.is_empty() {
            body.insert("display_description".to_owned(), json!(options.description));
        }
        if let Some(snapshot_id) = &options.snapshot_id {
            body.insert("snapshot_id".to_owned(), json!(snapshot_id));
        }
        let body = json!({ "volume": Value::Object(body) });

        let Some(value) = self.transport.post(SERVICE, "volumes", body).await? else {
            return Err(ApiError::Protocol {
                message: "no volume was created and no error was returned".to_owned(),
            });
        };
        let raw = json::require_object(&value, "volume")?;
        let created = self.volume(raw).ok_or_else(|| ApiError::Protocol {
            message: "created volume is missing an id".to_owned(),
        })?;

        self.await_volume_state(&created.id, "volume creation", VolumeState::Available, token)
            .await
    }

    /// Attaches a volume to a server and waits until it is in use.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::ErrorState`] when the volume lands in ERROR and
    /// [`ApiError::Timeout`] when the attachment never converges.
    pub async fn attach(
        &self,
        volume_id: &str,
        server_id: &str,
        device: &str,
        token: &CancelToken,
    ) -> Result<Volume, ApiError> {
        let body = json!({"volumeAttachment": {"volumeId": volume_id, "device": device}});
        self.transport
            .post(
                COMPUTE,
                &format!("servers/{server_id}/os-volume_attachments"),
                body,
            )
            .await?;
        self.await_volume_state(volume_id, "volume attachment", VolumeState::InUse, token)
            .await
    }

    /// Detaches a volume from a server and waits until it is available
    /// again.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when the volume is not attached to
    /// the given server and [`ApiError::NotFound`] when the volume does not
    /// exist.
    pub async fn detach(
        &self,
        volume_id: &str,
        server_id: &str,
        token: &CancelToken,
    ) -> Result<Volume, ApiError> {
        let Some(volume) = self.get(volume_id).await? else {
            return Err(ApiError::NotFound {
                resource: "volume".to_owned(),
                id: volume_id.to_owned(),
            });
        };
        if !volume
            .attachments
            .iter()
            .any(|attachment| attachment.server_id == server_id)
        {
            return Err(ApiError::Validation(format!(
                "volume {volume_id} is not attached to server {server_id}"
            )));
        }

        match self
            .transport
            .delete(
                COMPUTE,
                &format!("servers/{server_id}/os-volume_attachments/{volume_id}"),
            )
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        self.await_volume_state(volume_id, "volume detachment", VolumeState::Available, token)
            .await
    }

    /// Deletes a volume and waits until it is gone. Absence is success.
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
            "volume removal",
            || async move {
                match self
                    .transport
                    .delete(SERVICE, &format!("volumes/{id}"))
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
            "volume",
            id,
            || self.get(id),
            |volume: &Volume| volume.state == VolumeState::Deleted,
        )
        .await
    }

    async fn await_volume_state(
        &self,
        id: &str,
        action: &str,
        goal: VolumeState,
        token: &CancelToken,
    ) -> Result<Volume, ApiError> {
        poll::await_state(
            self.state_change_policy(),
            token,
            "volume",
            id,
            action,
            || self.get(id),
            |volume: &Volume| {
                if volume.state == goal {
                    Verdict::Ready
                } else if volume.state == VolumeState::Error {
                    Verdict::Failed(format!("volume entered ERROR during {action}"))
                } else {
                    Verdict::Pending
                }
            },
        )
        .await
    }

    /// Maps a raw volume object to the domain record; `None` when the id is
    /// absent.
    fn volume(&self, raw: &Value) -> Option<Volume> {
        let id = json::string_field(raw, &["id"])?;
        let status = json::string_field(raw, &["status"]);
        let attachments = json::array_field(raw, &["attachments"])
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let server_id =
                            json::string_field(entry, &["serverId", "server_id", "instance_id"])?;
                        Some(VolumeAttachment {
                            server_id,
                            device: json::string_field(entry, &["device"]).unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Volume {
            name: json::string_field(raw, &["display_name", "displayName", "name"])
                .unwrap_or_else(|| id.clone()),
            description: json::string_field(
                raw,
                &["display_description", "displayDescription", "description"],
            )
            .unwrap_or_default(),
            region_id: self.config.region_id.clone(),
            state: VOLUME_STATUS.resolve(status.as_deref()),
            size_gb: json::int_field(raw, &["size"]).unwrap_or(-1),
            snapshot_id: json::string_field(raw, &["snapshot_id", "snapshotId"]),
            attachments,
            created: json::timestamp_field(raw, &["created_at", "createdAt", "created"]),
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
