//! Cloud-agnostic client for OpenStack-compatible compute clouds.
//!
//! The crate models provisioning as resource lifecycles: mutations are
//! submitted asynchronously and polled to a terminal state under bounded
//! budgets, wire responses are translated tolerantly across dialect
//! variations, and per-variant capability descriptors gate operations before
//! any call leaves the process.

pub mod capability;
pub mod config;
pub mod error;
pub mod json;
pub mod loadbalancer;
pub mod poll;
pub mod port;
pub mod server;
pub mod snapshot;
pub mod state;
pub mod tags;
pub mod test_support;
pub mod transport;
pub mod volume;

pub use capability::{LbCapabilities, SnapshotCapabilities, VmCapabilities, VolumeCapabilities};
pub use config::{CloudConfig, CloudConfigBuilder, ProviderVariant, Timeouts};
pub use error::ApiError;
pub use loadbalancer::{LbCreateOptions, LbEndpoint, LbState, LbSupport, LoadBalancer};
pub use poll::{CancelToken, PollPolicy, Verdict};
pub use port::{Port, PortSupport};
pub use server::{
    PORT_ID_METADATA_KEY, ServerSupport, VirtualMachine, VmLaunchOptions, VmLaunchOptionsBuilder,
    VmState,
};
pub use snapshot::{Snapshot, SnapshotCreateOptions, SnapshotState, SnapshotSupport};
pub use state::{ResourceStatus, StatusTable};
pub use tags::TagMap;
pub use transport::{ApiCall, ApiFuture, HttpTransport};
pub use volume::{Volume, VolumeAttachment, VolumeCreateOptions, VolumeState, VolumeSupport};
