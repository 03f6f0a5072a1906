//! World zones: grid partition of instances and camera-driven streaming.

pub mod partition;
pub mod streaming;
pub mod zone;

pub use partition::{SpatialPartition, ZoneShape};
pub use streaming::{AssetGroupLoader, NullAssetLoader, StreamReport, ZoneStreamer};
pub use zone::{Zone, ZoneCoord, ZoneState};
