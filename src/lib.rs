//! Canopy – GPU-instance batching, zone streaming and visibility culling.
//!
//! The engine owns renderable plant instances, streams them in and out by world zone
//! around the camera, culls them with a data-parallel distance and frustum pass,
//! groups the survivors into capped draw batches, adapts a quality tier to frame-time
//! pressure, and hands batches to an injected render backend.

pub mod batching;
pub mod config;
pub mod core;
pub mod culling;
pub mod engine;
pub mod error;
pub mod events;
pub mod gpu;
pub mod metrics;
pub mod quality;
pub mod registry;
pub mod spatial;
pub mod submit;
pub mod utils;

pub use glam::{Mat4, Quat, Vec3};

pub use batching::{AssembledFrame, Batch, BatchAssembler, BatchKey, GroupingCriteria, InstanceData};
pub use config::EngineConfig;
pub use core::{
    Aabb, CameraProvider, CameraState, GrowthCategory, Instance, InstanceDescriptor, MaterialId, MeshId,
    SharedCamera, Transform,
};
pub use culling::{
    CullCamera, CullDispatch, CullInput, CullLatency, CullOutcome, CullScheduler, HiddenReason,
    SequentialDispatch, VisibilityCuller,
};
#[cfg(feature = "parallel")]
pub use culling::ParallelDispatch;
pub use engine::{CanopyEngine, EngineServices, FrameReport};
pub use error::{CanopyError, Result};
pub use events::{EngineEvent, EventBus};
pub use gpu::{GpuCapabilities, MeshInfo, NoopBackend, RenderBackend};
pub use metrics::MetricsSnapshot;
pub use quality::{PerformanceState, QualityController, QualityTier, TierSettings};
pub use registry::InstanceRegistry;
pub use spatial::{AssetGroupLoader, NullAssetLoader, SpatialPartition, ZoneCoord, ZoneShape, ZoneState};
pub use submit::{RenderSubmitter, SubmitMode, SubmitStats};
pub use utils::allocator::{Arena, InstanceId};
