use std::sync::Arc;

use serde_json::{Value, json};

use crate::config::{CloudConfig, ProviderVariant, Timeouts};
use crate::error::ApiError;
use crate::poll::CancelToken;
use crate::test_support::ScriptedTransport;

use super::{PORT_ID_METADATA_KEY, ServerSupport, VmLaunchOptions, VmState};

fn support(
    variant: ProviderVariant,
) -> (Arc<ScriptedTransport>, ServerSupport<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let config = CloudConfig::builder()
        .endpoint("https://cloud.example/v2")
        .username("user")
        .api_key("key")
        .account_id("acct")
        .region_id("region-1")
        .variant(variant)
        .timeouts(Timeouts::fast())
        .build()
        .expect("test config should build");
    let servers = ServerSupport::new(Arc::clone(&transport), Arc::new(config));
    (transport, servers)
}

fn server_json(id: &str, status: &str) -> Value {
    json!({"server": {"id": id, "status": status, "flavorId": "f1", "imageId": "i1"}})
}

fn options_with_subnet() -> VmLaunchOptions {
    VmLaunchOptions::builder()
        .name("web-1")
        .image_id("i1")
        .product_id("f1")
        .subnet_id("net-1")
        .build()
        .expect("options should build")
}

#[tokio::test]
async fn launch_creates_port_and_waits_for_active() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(json!({"port": {"id": "port-1", "network_id": "net-1"}}));
    transport.push_json(json!({"server": {
        "id": "srv-1",
        "status": "BUILD",
        "metadata": {PORT_ID_METADATA_KEY: "port-1"},
    }}));
    transport.push_json(json!({"server": {
        "id": "srv-1",
        "status": "BUILD",
        "metadata": {PORT_ID_METADATA_KEY: "port-1"},
    }}));
    transport.push_json(json!({"server": {
        "id": "srv-1",
        "status": "ACTIVE",
        "flavorId": "f1",
        "metadata": {PORT_ID_METADATA_KEY: "port-1"},
    }}));

    let server = servers
        .launch(options_with_subnet(), &CancelToken::new())
        .await
        .expect("launch should converge");

    assert_eq!(server.state, VmState::Running);
    assert_eq!(server.port_id.as_deref(), Some("port-1"));
    assert!(transport.is_drained());

    let invocations = transport.invocations();
    assert_eq!(invocations[0].method, "POST");
    assert_eq!(invocations[0].service, "network");
    assert_eq!(invocations[0].path, "ports");

    let create = &invocations[1];
    assert_eq!((create.service.as_str(), create.path.as_str()), ("compute", "servers"));
    let body = create.body.as_ref().expect("create body");
    assert_eq!(body["server"]["networks"], json!([{"port": "port-1"}]));
    assert_eq!(
        body["server"]["metadata"][PORT_ID_METADATA_KEY],
        json!("port-1")
    );
}

#[tokio::test]
async fn launch_without_subnet_skips_port_allocation() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(server_json("srv-1", "ACTIVE"));
    transport.push_json(server_json("srv-1", "ACTIVE"));

    let options = VmLaunchOptions::builder()
        .image_id("i1")
        .product_id("f1")
        .build()
        .expect("options should build");
    let server = servers
        .launch(options, &CancelToken::new())
        .await
        .expect("launch should converge");

    assert_eq!(server.port_id, None);
    let invocations = transport.invocations();
    assert!(invocations.iter().all(|call| call.service == "compute"));
    // A generated name is used when the caller supplies none.
    let body = invocations[0].body.as_ref().expect("create body");
    let name = body["server"]["name"].as_str().expect("generated name");
    assert!(name.starts_with("stratus-"));
}

#[tokio::test]
async fn launch_cleans_up_port_when_submission_fails() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(json!({"port": {"id": "port-1"}}));
    transport.push_error(ApiError::Provider {
        status: 500,
        code: None,
        message: "boom".to_owned(),
    });
    transport.push_empty(); // port delete

    let err = servers
        .launch(options_with_subnet(), &CancelToken::new())
        .await
        .expect_err("launch should fail");

    assert!(matches!(err, ApiError::Provider { .. }));
    let last = transport.invocations().pop().expect("calls recorded");
    assert_eq!(last.method, "DELETE");
    assert_eq!(last.path, "ports/port-1");
}

#[tokio::test]
async fn launch_cleans_up_port_when_server_enters_error() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(json!({"port": {"id": "port-1"}}));
    transport.push_json(server_json("srv-1", "BUILD"));
    transport.push_json(json!({"server": {
        "id": "srv-1",
        "status": "ERROR",
        "fault": {"message": "no valid host"},
    }}));
    transport.push_empty(); // port delete

    let err = servers
        .launch(options_with_subnet(), &CancelToken::new())
        .await
        .expect_err("launch should fail");

    assert_eq!(
        err,
        ApiError::ErrorState {
            resource: "server".to_owned(),
            id: "srv-1".to_owned(),
            message: "no valid host".to_owned(),
        }
    );
    let last = transport.invocations().pop().expect("calls recorded");
    assert_eq!((last.method.as_str(), last.path.as_str()), ("DELETE", "ports/port-1"));
}

#[tokio::test]
async fn launch_timeout_leaves_port_in_place() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(json!({"port": {"id": "port-1"}}));
    transport.push_json(server_json("srv-1", "BUILD"));
    // Queue drains here; subsequent polls see transient errors until the
    // budget elapses. The server may still complete, so its port stays.

    let err = servers
        .launch(options_with_subnet(), &CancelToken::new())
        .await
        .expect_err("launch should time out");

    assert!(matches!(err, ApiError::Timeout { .. }));
    assert!(
        transport
            .invocations()
            .iter()
            .all(|call| call.method != "DELETE")
    );
}

#[tokio::test]
async fn terminate_is_idempotent_for_absent_servers() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_empty();

    servers
        .terminate("srv-1", &CancelToken::new())
        .await
        .expect("absent server terminates cleanly");
    assert_eq!(transport.invocations().len(), 1);
}

#[tokio::test]
async fn terminate_retries_conflicts_and_removes_dependent_port() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(json!({"server": {
        "id": "srv-1",
        "status": "ACTIVE",
        "metadata": {PORT_ID_METADATA_KEY: "port-1"},
    }}));
    transport.push_error(ApiError::Conflict {
        resource: "server".to_owned(),
        id: "srv-1".to_owned(),
        message: "task in progress".to_owned(),
    });
    transport.push_empty(); // retried delete succeeds
    transport.push_empty(); // poll: server gone
    transport.push_empty(); // port delete

    servers
        .terminate("srv-1", &CancelToken::new())
        .await
        .expect("terminate should converge");

    assert!(transport.is_drained());
    let last = transport.invocations().pop().expect("calls recorded");
    assert_eq!((last.method.as_str(), last.service.as_str()), ("DELETE", "network"));
    assert_eq!(last.path, "ports/port-1");
}

#[tokio::test]
async fn terminate_treats_deleted_status_as_gone() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(server_json("srv-1", "ACTIVE"));
    transport.push_empty(); // delete accepted
    transport.push_json(server_json("srv-1", "DELETED"));

    servers
        .terminate("srv-1", &CancelToken::new())
        .await
        .expect("terminate should converge");
    assert!(transport.is_drained());
}

#[tokio::test]
async fn resize_confirms_when_verification_is_required() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(server_json("srv-1", "ACTIVE")); // existence check
    transport.push_empty(); // resize action accepted
    transport.push_json(server_json("srv-1", "RESIZE"));
    transport.push_json(json!({"server": {"id": "srv-1", "status": "VERIFY_RESIZE", "flavorId": "f2"}}));
    transport.push_empty(); // confirmResize accepted
    transport.push_json(json!({"server": {"id": "srv-1", "status": "ACTIVE", "flavorId": "f2"}}));

    let server = servers
        .resize("srv-1", "f2", &CancelToken::new())
        .await
        .expect("resize should converge");

    assert_eq!(server.product_id, "f2");
    let confirm = &transport.invocations()[4];
    assert_eq!(confirm.path, "servers/srv-1/action");
    assert_eq!(
        confirm.body.as_ref().expect("confirm body")["confirmResize"],
        Value::Null
    );
}

#[tokio::test]
async fn resize_rejects_silent_non_application() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(server_json("srv-1", "ACTIVE"));
    transport.push_empty();
    // Backend reports ACTIVE immediately but never applied the new flavor.
    transport.push_json(server_json("srv-1", "ACTIVE"));

    let err = servers
        .resize("srv-1", "f2", &CancelToken::new())
        .await
        .expect_err("resize must not report success");

    assert_eq!(
        err,
        ApiError::ResizeNotApplied {
            id: "srv-1".to_owned(),
            requested: "f2".to_owned(),
            actual: "f1".to_owned(),
        }
    );
}

#[tokio::test]
async fn unsupported_verbs_fail_before_any_call() {
    let (transport, servers) = support(ProviderVariant::Rackspace);

    let err = servers.pause("srv-1").await.expect_err("pause must be refused");
    assert!(matches!(err, ApiError::Unsupported { .. }));
    assert!(transport.invocations().is_empty());
}

#[tokio::test]
async fn actions_require_the_server_to_exist() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_empty();

    let err = servers.reboot("srv-1").await.expect_err("reboot must fail");
    assert_eq!(
        err,
        ApiError::NotFound {
            resource: "server".to_owned(),
            id: "srv-1".to_owned(),
        }
    );
    assert_eq!(transport.invocations().len(), 1);
}

#[tokio::test]
async fn stop_posts_the_action_body() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(server_json("srv-1", "ACTIVE"));
    transport.push_empty();

    servers.stop("srv-1").await.expect("stop should succeed");

    let action = transport.invocations().pop().expect("action recorded");
    assert_eq!(action.path, "servers/srv-1/action");
    assert_eq!(action.body.as_ref().expect("action body")["os-stop"], Value::Null);
}

#[tokio::test]
async fn list_status_folds_unknown_statuses_to_pending() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(json!({"servers": [
        {"id": "a", "status": "ACTIVE"},
        {"id": "b", "status": "SOMETHING_NEW"},
        {"status": "ACTIVE"},
    ]}));

    let statuses = servers.list_status().await.expect("listing should parse");
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].state, VmState::Running);
    assert_eq!(statuses[1].state, VmState::Pending);
}

#[tokio::test]
async fn list_translates_each_entry() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_json(json!({"servers": [
        {"id": "a", "status": "ACTIVE", "addresses": {
            "public": [{"addr": "203.0.113.7"}],
            "private": [{"addr": "10.0.0.7"}],
        }},
        {"id": "b", "status": "SHUTOFF"},
    ]}));

    let servers = servers.list().await.expect("listing should parse");
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].public_addresses, vec!["203.0.113.7".to_owned()]);
    assert_eq!(servers[0].private_addresses, vec!["10.0.0.7".to_owned()]);
    assert_eq!(servers[1].state, VmState::Stopped);
}

#[tokio::test]
async fn remove_tags_ignores_missing_keys() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_error(ApiError::NotFound {
        resource: "metadatum".to_owned(),
        id: "env".to_owned(),
    });
    transport.push_empty();

    servers
        .remove_tags("srv-1", &["env", "team"])
        .await
        .expect("missing keys are ignored");

    let invocations = transport.invocations();
    assert_eq!(invocations[0].path, "servers/srv-1/metadata/env");
    assert_eq!(invocations[1].path, "servers/srv-1/metadata/team");
}

#[tokio::test]
async fn set_tags_replaces_the_whole_map() {
    let (transport, servers) = support(ProviderVariant::OpenStack);
    transport.push_empty();

    let mut tag_map = crate::tags::TagMap::new();
    tag_map.insert("env".to_owned(), "prod".to_owned());
    servers.set_tags("srv-1", &tag_map).await.expect("tags should apply");

    let call = transport.invocations().pop().expect("call recorded");
    assert_eq!(call.method, "PUT");
    assert_eq!(call.path, "servers/srv-1/metadata");
    assert_eq!(
        call.body.expect("body")["metadata"],
        json!({"env": "prod"})
    );
}
