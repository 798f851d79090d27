//! Wire translation for servers.

use serde_json::{Map, Value, json};

use crate::json;
use crate::state::StatusTable;
use crate::tags::TagMap;

use super::{PORT_ID_METADATA_KEY, VirtualMachine, VmLaunchOptions, VmState};
use crate::error::ApiError;

/// Backend status strings for servers, folded to canonical states.
pub(crate) const SERVER_STATUS: StatusTable<VmState> = StatusTable::new(
    "server",
    &[
        ("ACTIVE", VmState::Running),
        ("BUILD", VmState::Pending),
        ("REBUILD", VmState::Pending),
        ("DELETED", VmState::Terminated),
        ("ERROR", VmState::Error),
        ("HARD_REBOOT", VmState::Rebooting),
        ("REBOOT", VmState::Rebooting),
        ("MIGRATING", VmState::Pending),
        ("PASSWORD", VmState::Pending),
        ("PAUSED", VmState::Paused),
        ("RESIZE", VmState::Pending),
        ("REVERT_RESIZE", VmState::Pending),
        ("VERIFY_RESIZE", VmState::Pending),
        ("SHUTOFF", VmState::Stopped),
        ("STOPPED", VmState::Stopped),
        ("SUSPENDED", VmState::Suspended),
    ],
    VmState::Pending,
);

/// Maps a raw server object to the canonical record.
///
/// Returns `Ok(None)` when the identity field is absent: the caller reads
/// that as "no such resource", never as a parse failure.
///
/// # Errors
///
/// Returns [`ApiError::Protocol`] when a present `addresses` block is not an
/// object of address lists.
pub(crate) fn virtual_machine(
    raw: &Value,
    owner_account_id: &str,
    region_id: &str,
) -> Result<Option<VirtualMachine>, ApiError> {
    let Some(id) = json::string_field(raw, &["id"]) else {
        return Ok(None);
    };

    let provider_status = json::string_field(raw, &["status"]);
    let state = SERVER_STATUS.resolve(provider_status.as_deref());

    let product_id = json::string_field(raw, &["flavorId", "flavor_id"]).or_else(|| {
        json::object_field(raw, &["flavor"]).and_then(|flavor| json::string_field(flavor, &["id"]))
    });
    let image_id = json::string_field(raw, &["imageId", "image_id"]).or_else(|| {
        json::object_field(raw, &["image"]).and_then(|image| json::string_field(image, &["id"]))
    });

    let metadata = json::string_map_field(raw, &["metadata", "meta"]);
    let port_id = metadata.get(PORT_ID_METADATA_KEY).cloned();

    let (public_addresses, private_addresses) = addresses(raw)?;

    let fault = json::object_field(raw, &["fault"])
        .and_then(|fault| json::string_field(fault, &["message", "details"]));

    Ok(Some(VirtualMachine {
        name: json::string_field(raw, &["name", "displayName", "display_name"])
            .unwrap_or_else(|| id.clone()),
        description: json::string_field(raw, &["description"]).unwrap_or_default(),
        owner_account_id: json::string_field(raw, &["tenantId", "tenant_id"])
            .unwrap_or_else(|| owner_account_id.to_owned()),
        region_id: region_id.to_owned(),
        created: json::timestamp_field(raw, &["createdAt", "created_at", "created"]),
        provider_status: provider_status.unwrap_or_default(),
        state,
        product_id: product_id.unwrap_or_default(),
        image_id: image_id.unwrap_or_default(),
        public_addresses,
        private_addresses,
        metadata,
        port_id,
        fault,
        id,
    }))
}

/// Pulls public/private address lists out of the `addresses` block.
///
/// The block is optional, but when present it must be an object mapping
/// network labels to arrays of `{"addr": ...}` entries; anything else is a
/// protocol error rather than a silent default.
fn addresses(raw: &Value) -> Result<(Vec<String>, Vec<String>), ApiError> {
    let Some(block) = raw.get("addresses") else {
        return Ok((Vec::new(), Vec::new()));
    };
    let Some(networks) = block.as_object() else {
        return Err(ApiError::Protocol {
            message: "'addresses' is not an object".to_owned(),
        });
    };

    let mut public = Vec::new();
    let mut private = Vec::new();
    for (label, entries) in networks {
        let Some(entries) = entries.as_array() else {
            return Err(ApiError::Protocol {
                message: format!("addresses for network '{label}' are not a list"),
            });
        };
        let bucket = if label.eq_ignore_ascii_case("private") {
            &mut private
        } else {
            &mut public
        };
        for entry in entries {
            if let Some(addr) = json::string_field(entry, &["addr", "address", "ip"]) {
                bucket.push(addr);
            }
        }
    }
    Ok((public, private))
}

/// Builds the create request body for a launch.
///
/// The dependent port id, when one was allocated, is already present in the
/// options metadata and rides along under the well-known key.
pub(crate) fn launch_request(options: &VmLaunchOptions, name: &str) -> Value {
    let mut server = Map::new();
    server.insert("name".to_owned(), json!(name));
    server.insert("imageRef".to_owned(), json!(options.image_id));
    server.insert("flavorRef".to_owned(), json!(options.product_id));

    if !options.metadata.is_empty() {
        server.insert("metadata".to_owned(), json!(options.metadata));
    }
    if let Some(key_name) = &options.key_name {
        server.insert("key_name".to_owned(), json!(key_name));
    }
    if let Some(user_data) = &options.user_data {
        server.insert("user_data".to_owned(), json!(user_data));
    }
    if !options.firewall_ids.is_empty() {
        let groups: Vec<Value> = options
            .firewall_ids
            .iter()
            .map(|group| json!({"name": group}))
            .collect();
        server.insert("security_groups".to_owned(), json!(groups));
    }
    if let Some(port_id) = options.metadata.get(PORT_ID_METADATA_KEY) {
        server.insert("networks".to_owned(), json!([{"port": port_id}]));
    } else if let Some(subnet_id) = &options.subnet_id {
        server.insert("networks".to_owned(), json!([{"uuid": subnet_id}]));
    }

    json!({ "server": Value::Object(server) })
}

/// Builds an action body posted to `servers/{id}/action`.
pub(crate) fn action_body(verb: &str, arguments: Option<Value>) -> Value {
    let mut body = Map::new();
    body.insert(verb.to_owned(), arguments.unwrap_or(Value::Null));
    Value::Object(body)
}

/// Normalized tag map ready for a create body.
pub(crate) fn merged_metadata(metadata: &TagMap, port_id: Option<&str>) -> TagMap {
    let mut merged = metadata.clone();
    if let Some(port_id) = port_id {
        merged.insert(PORT_ID_METADATA_KEY.to_owned(), port_id.to_owned());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_request_carries_every_optional_field() {
        let options = VmLaunchOptions::builder()
            .name("web-1")
            .image_id("i1")
            .product_id("f1")
            .firewall_id("web")
            .key_name("deploy")
            .user_data("IyEvYmluL3No")
            .metadata("env", "prod")
            .build()
            .expect("options should build");

        let body = launch_request(&options, "web-1");
        let server = &body["server"];
        assert_eq!(server["imageRef"], json!("i1"));
        assert_eq!(server["flavorRef"], json!("f1"));
        assert_eq!(server["key_name"], json!("deploy"));
        assert_eq!(server["user_data"], json!("IyEvYmluL3No"));
        assert_eq!(server["security_groups"], json!([{"name": "web"}]));
        assert_eq!(server["metadata"]["env"], json!("prod"));
        assert_eq!(server.get("networks"), None);
    }

    #[test]
    fn launch_request_prefers_a_port_over_a_bare_subnet() {
        let mut options = VmLaunchOptions::builder()
            .image_id("i1")
            .product_id("f1")
            .subnet_id("net-1")
            .build()
            .expect("options should build");
        assert_eq!(
            launch_request(&options, "n")["server"]["networks"],
            json!([{"uuid": "net-1"}])
        );

        options.metadata = merged_metadata(&options.metadata, Some("port-1"));
        assert_eq!(
            launch_request(&options, "n")["server"]["networks"],
            json!([{"port": "port-1"}])
        );
    }

    #[test]
    fn mistyped_addresses_block_is_a_protocol_error() {
        let raw = json!({"id": "srv-1", "status": "ACTIVE", "addresses": "10.0.0.1"});
        let err = virtual_machine(&raw, "acct", "region-1").expect_err("must fail");
        assert!(matches!(err, ApiError::Protocol { .. }));
    }

    #[test]
    fn identity_less_payload_reads_as_absent() {
        let raw = json!({"status": "ACTIVE"});
        assert_eq!(virtual_machine(&raw, "acct", "region-1"), Ok(None));
    }
}
