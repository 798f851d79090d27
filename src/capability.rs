//! Capability descriptors.
//!
//! Small per-kind value objects answering "what does this backend variant
//! support". All of them are pure constants derived from the provider
//! variant; the one capability requiring a live backend lookup (supported
//! load-balancer algorithms) lives with the load-balancer controller.
//!
//! Controllers consult these before contacting the backend so an unsupported
//! verb fails immediately with [`ApiError::Unsupported`].

use crate::config::ProviderVariant;
use crate::error::ApiError;

/// Lifecycle verbs a variant's compute service accepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VmCapabilities {
    /// Whether stopped servers can be started again.
    pub can_start: bool,
    /// Whether running servers can be stopped in place.
    pub can_stop: bool,
    /// Whether servers can be paused and unpaused.
    pub can_pause: bool,
    /// Whether servers can be suspended and resumed.
    pub can_suspend: bool,
    /// Whether in-place flavor resizing is offered.
    pub can_resize: bool,
}

impl VmCapabilities {
    /// Capability set for the given variant.
    #[must_use]
    pub const fn for_variant(variant: ProviderVariant) -> Self {
        match variant {
            ProviderVariant::OpenStack => Self {
                can_start: true,
                can_stop: true,
                can_pause: true,
                can_suspend: true,
                can_resize: true,
            },
            // Rackspace first-generation servers accept reboot and resize
            // only; there is no stop/start or pause surface.
            ProviderVariant::Rackspace => Self {
                can_start: false,
                can_stop: false,
                can_pause: false,
                can_suspend: false,
                can_resize: true,
            },
            ProviderVariant::HpCloud => Self {
                can_start: true,
                can_stop: true,
                can_pause: false,
                can_suspend: true,
                can_resize: false,
            },
        }
    }

    /// Checks a verb against the capability set.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unsupported`] when `allowed` is false.
    pub fn require(operation: &str, allowed: bool) -> Result<(), ApiError> {
        if allowed {
            Ok(())
        } else {
            Err(ApiError::Unsupported {
                operation: operation.to_owned(),
            })
        }
    }
}

/// Static limits of a variant's block-storage service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VolumeCapabilities {
    /// Smallest volume the service will create, in gigabytes.
    pub min_volume_gb: i64,
    /// Largest volume the service will create, in gigabytes.
    pub max_volume_gb: i64,
}

impl VolumeCapabilities {
    /// Capability set for the given variant.
    #[must_use]
    pub const fn for_variant(variant: ProviderVariant) -> Self {
        match variant {
            ProviderVariant::OpenStack | ProviderVariant::HpCloud => Self {
                min_volume_gb: 1,
                max_volume_gb: 1024,
            },
            ProviderVariant::Rackspace => Self {
                min_volume_gb: 100,
                max_volume_gb: 1024,
            },
        }
    }
}

/// Static limits of a variant's snapshot service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SnapshotCapabilities {
    /// Whether a snapshot may be taken while the source volume is attached.
    pub supports_attached_source: bool,
}

impl SnapshotCapabilities {
    /// Capability set for the given variant.
    #[must_use]
    pub const fn for_variant(variant: ProviderVariant) -> Self {
        match variant {
            ProviderVariant::OpenStack | ProviderVariant::HpCloud => Self {
                supports_attached_source: true,
            },
            ProviderVariant::Rackspace => Self {
                supports_attached_source: false,
            },
        }
    }
}

/// Static limits of a variant's load-balancer service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LbCapabilities {
    /// Largest number of endpoints one balancer will accept.
    pub max_endpoints: usize,
}

impl LbCapabilities {
    /// Capability set for the given variant.
    #[must_use]
    pub const fn for_variant(variant: ProviderVariant) -> Self {
        match variant {
            ProviderVariant::OpenStack | ProviderVariant::HpCloud => Self { max_endpoints: 50 },
            ProviderVariant::Rackspace => Self { max_endpoints: 25 },
        }
    }
}
