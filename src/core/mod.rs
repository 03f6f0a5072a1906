//! Core types: transforms, bounds, growth categories, instances and camera state.

pub mod camera;
pub mod category;
pub mod instance;
pub mod types;

pub use camera::{CameraProvider, CameraState, Frustum, Plane, SharedCamera};
pub use category::{CategoryProfile, GrowthCategory};
pub use instance::{Instance, InstanceDescriptor};
pub use types::{Aabb, BoundingSphere, MaterialId, MeshId, Transform};
