use std::collections::BTreeSet;
use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::types::Aabb;
use crate::utils::allocator::InstanceId;

/// Integer grid coordinate of a zone on the ground (XZ) plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneCoord {
    pub x: i32,
    pub z: i32,
}

impl ZoneCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chebyshev ring index around `center` (square neighbourhoods).
    pub fn square_ring(&self, center: ZoneCoord) -> u32 {
        (self.x - center.x)
            .unsigned_abs()
            .max((self.z - center.z).unsigned_abs())
    }

    /// Manhattan ring index around `center` (diamond neighbourhoods).
    pub fn diamond_ring(&self, center: ZoneCoord) -> u32 {
        (self.x - center.x).unsigned_abs() + (self.z - center.z).unsigned_abs()
    }
}

impl fmt::Display for ZoneCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Streaming state of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneState {
    /// Known (holds instances or is queued) but its asset group is not resident.
    Unloaded,
    Loaded,
    /// Asset group failed to load; retried after the camera changes zone.
    Failed,
}

/// Fixed-size grid cell of world space.
#[derive(Debug, Clone)]
pub struct Zone {
    pub coord: ZoneCoord,
    pub bounds: Aabb,
    pub state: ZoneState,
    instances: BTreeSet<InstanceId>,
}

impl Zone {
    pub(crate) fn new(coord: ZoneCoord, size: f32) -> Self {
        let min = Vec3::new(coord.x as f32 * size, f32::MIN, coord.z as f32 * size);
        let max = Vec3::new(min.x + size, f32::MAX, min.z + size);
        Self {
            coord,
            bounds: Aabb::new(min, max),
            state: ZoneState::Unloaded,
            instances: BTreeSet::new(),
        }
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.contains(&id)
    }

    /// Member ids in ascending id order.
    pub fn instances(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.iter().copied()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ZoneState::Loaded
    }

    pub(crate) fn insert(&mut self, id: InstanceId) -> bool {
        self.instances.insert(id)
    }

    pub(crate) fn remove(&mut self, id: InstanceId) -> bool {
        self.instances.remove(&id)
    }

    pub(crate) fn take_instances(&mut self) -> Vec<InstanceId> {
        std::mem::take(&mut self.instances).into_iter().collect()
    }
}
