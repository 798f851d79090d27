//! Volume snapshot controller.


use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::capability::SnapshotCapabilities;
use crate::config::CloudConfig;
use crate::error::ApiError;
use crate::json;
use crate::poll::{self, CancelToken, PollPolicy, Verdict};
use crate::state::{ResourceStatus, StatusTable};
use crate::transport::ApiCall;

const SERVICE: &str = "volume";

/// Canonical snapshot states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotState {
    /// Being created.
    Pending,
    /// Complete and usable as a volume source.
    Available,
    /// Being deleted.
    Deleting,
    /// Deleted. Terminal.
    Deleted,
    /// Creation or deletion failed. Terminal.
    Error,
}

/// Backend status strings for snapshots, folded to canonical states.
const SNAPSHOT_STATUS: StatusTable<SnapshotState> = StatusTable::new(
    "snapshot",
    &[
        ("CREATING", SnapshotState::Pending),
        ("AVAILABLE", SnapshotState::Available),
        ("DELETING", SnapshotState::Deleting),
        ("DELETED", SnapshotState::Deleted),
        ("ERROR", SnapshotState::Error),
        ("ERROR_DELETING", SnapshotState::Error),
    ],
    SnapshotState::Pending,
);

/// Canonical snapshot record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Provider-assigned identifier.
    pub id: String,
    /// Account owning the snapshot.
    pub owner_account_id: String,
    /// Region the snapshot lives in.
    pub region_id: String,
    /// Display name; defaults to the id when the backend omits one.
    pub name: String,
    /// Free-form description, empty when absent.
    pub description: String,
    /// Canonical state.
    pub state: SnapshotState,
    /// Source volume identifier.
    pub volume_id: String,
    /// Size in gigabytes, -1 when unknown.
    pub size_gb: i64,
    /// Completion percentage reported during creation, 0 when absent.
    pub progress: i64,
    /// Creation time in epoch milliseconds, -1 when unknown.
    pub created: i64,
}

/// Caller intent for a snapshot creation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SnapshotCreateOptions {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Source volume to snapshot.
    pub volume_id: String,
    /// Whether to snapshot a volume that is still attached to a server.
    pub from_attached_volume: bool,
}

impl SnapshotCreateOptions {
    /// Options for snapshotting a detached volume.
    #[must_use]
    pub fn new(volume_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            volume_id: volume_id.into(),
            ..Self::default()
        }
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] when the source volume is missing.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.volume_id.is_empty() {
            return Err(ApiError::Validation("volume_id".to_owned()));
        }
        Ok(())
    }
}

/// Lifecycle controller for snapshots.
pub struct SnapshotSupport<T: ApiCall> {
    transport: Arc<T>,
    config: Arc<CloudConfig>,
    capabilities: SnapshotCapabilities,
}

impl<T: ApiCall> SnapshotSupport<T> {
    /// Creates a controller over the given transport and configuration.
    #[must_use]
    pub fn new(transport: Arc<T>, config: Arc<CloudConfig>) -> Self {
        let capabilities = SnapshotCapabilities::for_variant(config.variant);
        Self {
            transport,
            config,
            capabilities,
        }
    }

    /// What the configured variant allows.
    #[must_use]
    pub const fn capabilities(&self) -> SnapshotCapabilities {
        self.capabilities
    }

    /// Fetches one snapshot. Absence is a normal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] on a malformed response; transport and
    /// provider errors propagate.
    pub async fn get(&self, id: &str) -> Result<Option<Snapshot>, ApiError> {
        match self
            .transport
            .get(SERVICE, &format!("snapshots/{id}"))
            .await?
        {
            None => Ok(None),
            Some(value) => {
                let raw = json::require_object(&value, "snapshot")?;
                Ok(self.snapshot(raw))
            }
        }
    }

    /// Lists all snapshots in the region.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] when the collection wrapper is missing.
    pub async fn list(&self) -> Result<Vec<Snapshot>, ApiError> {
        let Some(value) = self.transport.get(SERVICE, "snapshots").await? else {
            return Ok(Vec::new());
        };
        let items = json::require_array(&value, "snapshots")?;
        Ok(items.iter().filter_map(|raw| self.snapshot(raw)).collect())
    }

    /// Lightweight id + state listing.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] when the collection wrapper is missing.
    pub async fn list_status(&self) -> Result<Vec<ResourceStatus<SnapshotState>>, ApiError> {
        let Some(value) = self.transport.get(SERVICE, "snapshots").await? else {
            return Ok(Vec::new());
        };
        let items = json::require_array(&value, "snapshots")?;
        Ok(items
            .iter()
            .filter_map(|raw| {
                let id = json::string_field(raw, &["id"])?;
                let status = json::string_field(raw, &["status"]);
                Some(ResourceStatus {
                    id,
                    state: SNAPSHOT_STATUS.resolve(status.as_deref()),
                })
            })
            .collect())
    }

    /// Creates a snapshot and waits for it to become available.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unsupported`] when the variant refuses snapshots
    /// of attached volumes, [`ApiError::Protocol`] when a successful
    /// submission echoes no snapshot, and [`ApiError::ErrorState`] when the
    /// snapshot lands in ERROR.
    pub async fn create(
        &self,
        options: SnapshotCreateOptions,
        token: &CancelToken,
    ) -> Result<Snapshot, ApiError> {
        options.validate()?;
        if options.from_attached_volume && !self.capabilities.supports_attached_source {
            return Err(ApiError::Unsupported {
                operation: "snapshot an attached volume".to_owned(),
            });
        }

        let mut body = Map::new();
        body.insert("volume_id".to_owned(), json!(options.volume_id));
        if !options.name.is_empty() {
            body.insert("display_name".to_owned(), json!(options.name));
        }
        if !options.description.is_empty() {
            body.insert("display_description".to_owned(), json!(options.description));
        }
        if options.from_attached_volume {
            body.insert("force".to_owned(), json!(true));
        }
        let body = json!({ "snapshot": Value::Object(body) });

        let Some(value) = self.transport.post(SERVICE, "snapshots", body).await? else {
            return Err(ApiError::Protocol {
                message: "no snapshot was created and no error was returned".to_owned(),
            });
        };
        let raw = json::require_object(&value, "snapshot")?;
        let created = self.snapshot(raw).ok_or_else(|| ApiError::Protocol {
            message: "created snapshot is missing an id".to_owned(),
        })?;

        poll::await_state(
            self.state_change_policy(),
            token,
            "snapshot",
            &created.id,
            "snapshot creation",
            || self.get(&created.id),
            |snapshot: &Snapshot| match snapshot.state {
                SnapshotState::Available => Verdict::Ready,
                SnapshotState::Error => {
                    Verdict::Failed("snapshot entered ERROR during creation".to_owned())
                }
                _ => Verdict::Pending,
            },
        )
        .await
    }

    /// Deletes a snapshot and waits until it is gone. Absence is success.
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
            "snapshot removal",
            || async move {
                match self
                    .transport
                    .delete(SERVICE, &format!("snapshots/{id}"))
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
            "snapshot",
            id,
            || self.get(id),
            |snapshot: &Snapshot| snapshot.state == SnapshotState::Deleted,
        )
        .await
    }

    /// Maps a raw snapshot object to the domain record; `None` when the id
    /// is absent.
    fn snapshot(&self, raw: &Value) -> Option<Snapshot> {
        let id = json::string_field(raw, &["id"])?;
        let status = json::string_field(raw, &["status"]);
        Some(Snapshot {
            name: json::string_field(raw, &["display_name", "displayName", "name"])
                .unwrap_or_else(|| id.clone()),
            description: json::string_field(
                raw,
                &["display_description", "displayDescription", "description"],
            )
            .unwrap_or_default(),
            owner_account_id: json::string_field(raw, &["os-extended-snapshot-attributes:project_id"])
                .unwrap_or_else(|| self.config.account_id.clone()),
            region_id: self.config.region_id.clone(),
            state: SNAPSHOT_STATUS.resolve(status.as_deref()),
            volume_id: json::string_field(raw, &["volume_id", "volumeId"]).unwrap_or_default(),
            size_gb: json::int_field(raw, &["size"]).unwrap_or(-1),
            progress: progress(raw),
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

/// Completion percentage; arrives either as a number or as `"85%"`.
fn progress(raw: &Value) -> i64 {
    json::string_field(raw, &["progress"])
        .and_then(|text| text.trim().trim_end_matches('%').parse().ok())
        .unwrap_or(0)
}
