//! Error types for the instancing engine.
//!
//! Nothing here is fatal: capacity and lookup errors go back to the caller, resource and
//! zone failures degrade visuals while the rest of the frame carries on.

use thiserror::Error;

use crate::spatial::ZoneCoord;
use crate::utils::allocator::InstanceId;

/// Errors surfaced by the registry, streaming, submission and configuration layers.
#[derive(Error, Debug)]
pub enum CanopyError {
    /// The registry already holds its configured maximum of instances.
    #[error("instance registry full: capacity {capacity}")]
    CapacityExceeded {
        /// Configured maximum instance count.
        capacity: usize,
    },

    /// Operation on an id that is not (or no longer) registered.
    #[error("instance not found: {0}")]
    NotFound(InstanceId),

    /// A GPU buffer or capability required for submission is missing.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The external asset group for a zone failed to load.
    #[error("zone {zone} failed to load: {reason}")]
    ZoneLoadFailed {
        /// Zone whose assets were requested.
        zone: ZoneCoord,
        /// Loader-supplied reason.
        reason: String,
    },

    /// Configuration values out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Convenient Result alias for engine operations.
pub type Result<T> = std::result::Result<T, CanopyError>;
