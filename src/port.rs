//! Network port controller.
//!
//! Ports are dependent resources: one is allocated implicitly when a server
//! launches into a subnet, and it belongs to that server's lifecycle. The
//! surface here is deliberately minimal: create and idempotent remove.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::ApiError;
use crate::json;
use crate::transport::ApiCall;

const SERVICE: &str = "network";

/// A network attachment point within a subnet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Port {
    /// Provider-assigned identifier.
    pub id: String,
    /// Subnet (network) the port attaches to.
    pub network_id: String,
    /// Display name.
    pub name: String,
}

/// Controller for network ports.
#[derive(Clone, Debug)]
pub struct PortSupport<T: ApiCall> {
    transport: Arc<T>,
}

impl<T: ApiCall> PortSupport<T> {
    /// Creates a controller over the given transport.
    #[must_use]
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Allocates a port in the given subnet.
    ///
    /// Port creation is synchronous on every supported variant; the response
    /// must echo the new port.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Protocol`] when a successful submission does not
    /// echo the created port.
    pub async fn create(&self, network_id: &str, name: &str) -> Result<Port, ApiError> {
        let body = json!({"port": {"network_id": network_id, "name": name}});
        let Some(value) = self.transport.post(SERVICE, "ports", body).await? else {
            return Err(ApiError::Protocol {
                message: "no port was created and no error was returned".to_owned(),
            });
        };
        let raw = json::require_object(&value, "port")?;
        port(raw)?.ok_or_else(|| ApiError::Protocol {
            message: "created port is missing an id".to_owned(),
        })
    }

    /// Deletes a port. Absence is success.
    ///
    /// # Errors
    ///
    /// Propagates transport and provider errors other than absence.
    pub async fn remove(&self, id: &str) -> Result<(), ApiError> {
        match self
            .transport
            .delete(SERVICE, &format!("ports/{id}"))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Maps a raw port object to the domain record; `None` when the id is
/// absent.
fn port(raw: &Value) -> Result<Option<Port>, ApiError> {
    let Some(id) = json::string_field(raw, &["id"]) else {
        return Ok(None);
    };
    let network_id = json::string_field(raw, &["networkId", "network_id"]).unwrap_or_default();
    let name = json::string_field(raw, &["name", "displayName", "display_name"])
        .unwrap_or_else(|| id.clone());
    Ok(Some(Port {
        id,
        network_id,
        name,
    }))
}
