use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::{
    category::GrowthCategory,
    types::{Aabb, BoundingSphere, MaterialId, MeshId, Transform},
};
use crate::spatial::ZoneCoord;
use crate::utils::allocator::InstanceId;

/// Everything the simulation supplies when registering a plant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub transform: Transform,
    pub mesh: MeshId,
    pub material: MaterialId,
    pub category: GrowthCategory,
    /// Mesh-local bounds.
    pub bounds: Aabb,
    /// Host-computed content hash (genetics variant, tint set, ...).
    pub variant: u64,
}

impl InstanceDescriptor {
    pub fn new(mesh: MeshId, material: MaterialId, category: GrowthCategory) -> Self {
        Self {
            transform: Transform::default(),
            mesh,
            material,
            category,
            bounds: Aabb::default(),
            variant: 0,
        }
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_bounds(mut self, bounds: Aabb) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_variant(mut self, variant: u64) -> Self {
        self.variant = variant;
        self
    }
}

/// A registered renderable plant.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    pub transform: Transform,
    pub mesh: MeshId,
    pub material: MaterialId,
    pub category: GrowthCategory,
    pub bounds: Aabb,
    pub variant: u64,
    /// Host-controlled visibility; switched-off instances cull as `Disabled`.
    pub visible: bool,
    pub zone: ZoneCoord,
}

impl Instance {
    pub(crate) fn from_descriptor(id: InstanceId, descriptor: InstanceDescriptor, zone: ZoneCoord) -> Self {
        Self {
            id,
            transform: descriptor.transform,
            mesh: descriptor.mesh,
            material: descriptor.material,
            category: descriptor.category,
            bounds: descriptor.bounds,
            variant: descriptor.variant,
            visible: true,
            zone,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    /// World bounding sphere, scaled by the category profile.
    pub fn world_bounds(&self) -> BoundingSphere {
        let mut sphere = self.bounds.bounding_sphere(&self.transform);
        sphere.radius *= self.category.profile().bounds_scale;
        sphere
    }
}
