//! Best-effort teardown of dependent resources after a failed launch.

use tracing::warn;

use crate::port::PortSupport;
use crate::transport::ApiCall;

use super::{PORT_ID_METADATA_KEY, VirtualMachine, VmLaunchOptions, VmState};

/// Removes the port allocated for a launch that did not produce a usable
/// server.
///
/// Runs only when no server exists (`resulting` is `None`) or the server
/// converged to ERROR. In every other case, a timeout in particular, the
/// server may still complete, and tearing its port out from under it would
/// corrupt a healthy launch. Removal failures are logged and swallowed; the
/// caller's original error is the one that must surface.
pub(super) async fn cleanup_on_failure<T: ApiCall>(
    ports: &PortSupport<T>,
    options: &VmLaunchOptions,
    resulting: Option<&VirtualMachine>,
) {
    if let Some(server) = resulting {
        if server.state != VmState::Error {
            return;
        }
    }
    let Some(port_id) = options.metadata.get(PORT_ID_METADATA_KEY) else {
        return;
    };
    if let Err(err) = ports.remove(port_id).await {
        warn!(port = %port_id, error = %err, "failed to clean up port after failed launch");
    }
}
