use glam::Vec3;

use crate::config::CullConfig;
use crate::core::{
    camera::{CameraState, Frustum},
    category::GrowthCategory,
    types::{BoundingSphere, MaterialId, MeshId, Transform},
};
use crate::utils::allocator::InstanceId;

/// Number of discrete LOD levels.
pub const MAX_LOD_LEVELS: usize = 4;

/// One immutable snapshot row: everything culling and batching read about an instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullInput {
    pub id: InstanceId,
    pub transform: Transform,
    /// World bounding sphere, already scaled by the category profile.
    pub sphere: BoundingSphere,
    pub mesh: MeshId,
    pub material: MaterialId,
    pub category: GrowthCategory,
    pub variant: u64,
    pub visible: bool,
}

impl CullInput {
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.transform.position
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HiddenReason {
    /// The host switched the instance off.
    Disabled,
    Distance,
    Frustum,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CullOutcome {
    Visible { lod: u8, distance_sq: f32 },
    Hidden(HiddenReason),
}

impl CullOutcome {
    #[inline]
    pub fn is_visible(&self) -> bool {
        matches!(self, CullOutcome::Visible { .. })
    }
}

impl Default for CullOutcome {
    fn default() -> Self {
        CullOutcome::Hidden(HiddenReason::Disabled)
    }
}

/// Camera data the culling pass needs, extracted once per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullCamera {
    pub position: Vec3,
    pub frustum: Frustum,
}

impl CullCamera {
    pub fn from_state(state: &CameraState) -> Self {
        Self {
            position: state.position,
            frustum: state.frustum(),
        }
    }
}

impl From<&CameraState> for CullCamera {
    fn from(state: &CameraState) -> Self {
        Self::from_state(state)
    }
}

/// Squared LOD switch distances plus the tier-dependent distance bias.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodSettings {
    distances_sq: [f32; MAX_LOD_LEVELS],
    /// Multiplies every switch distance; below 1 drops detail sooner.
    pub bias: f32,
}

impl LodSettings {
    pub fn new(distances: [f32; MAX_LOD_LEVELS], bias: f32) -> Self {
        Self {
            distances_sq: distances.map(|d| d * d),
            bias,
        }
    }

    /// LOD level for a squared camera distance.
    #[inline]
    pub fn select(&self, distance_sq: f32, category: GrowthCategory) -> u8 {
        let scale = category.profile().lod_distance_scale * self.bias;
        let scale_sq = scale * scale;
        self.distances_sq
            .iter()
            .position(|&threshold| distance_sq <= threshold * scale_sq)
            .unwrap_or(MAX_LOD_LEVELS - 1) as u8
    }
}

impl Default for LodSettings {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_LOD_DISTANCES, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullSettings {
    max_distance_sq: f32,
    pub frustum_culling: bool,
    pub distance_only_from_lod: Option<u8>,
    pub lod: LodSettings,
}

impl CullSettings {
    pub fn new(max_render_distance: f32) -> Self {
        Self {
            max_distance_sq: max_render_distance * max_render_distance,
            frustum_culling: true,
            distance_only_from_lod: None,
            lod: LodSettings::default(),
        }
    }

    pub fn from_config(config: &CullConfig) -> Self {
        Self {
            max_distance_sq: config.max_render_distance * config.max_render_distance,
            frustum_culling: config.frustum_culling,
            distance_only_from_lod: config.distance_only_from_lod,
            lod: LodSettings::new(config.lod_distances, 1.0),
        }
    }

    pub fn max_render_distance(&self) -> f32 {
        self.max_distance_sq.sqrt()
    }

    pub fn set_max_render_distance(&mut self, distance: f32) {
        self.max_distance_sq = distance * distance;
    }

    fn distance_only(&self, category: GrowthCategory, lod: u8) -> bool {
        [category.profile().distance_only_from_lod, self.distance_only_from_lod]
            .into_iter()
            .flatten()
            .any(|from| lod >= from)
    }
}

impl Default for CullSettings {
    fn default() -> Self {
        Self::from_config(&CullConfig::default())
    }
}

/// Pure distance + frustum classifier. Holds no per-frame state, so one instance can be
/// shared by every worker of a parallel dispatch.
#[derive(Debug, Clone, Default)]
pub struct VisibilityCuller {
    settings: CullSettings,
}

impl VisibilityCuller {
    pub fn new(settings: CullSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CullSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut CullSettings {
        &mut self.settings
    }

    #[inline]
    pub fn classify(&self, input: &CullInput, camera: &CullCamera) -> CullOutcome {
        if !input.visible {
            return CullOutcome::Hidden(HiddenReason::Disabled);
        }

        let distance_sq = input.position().distance_squared(camera.position);
        if distance_sq > self.settings.max_distance_sq {
            return CullOutcome::Hidden(HiddenReason::Distance);
        }

        let lod = self.settings.lod.select(distance_sq, input.category);
        if self.settings.frustum_culling
            && !self.settings.distance_only(input.category, lod)
            && !camera
                .frustum
                .intersects_sphere(input.sphere.center, input.sphere.radius)
        {
            return CullOutcome::Hidden(HiddenReason::Frustum);
        }

        CullOutcome::Visible { lod, distance_sq }
    }

    /// Writes one outcome per input, at the same index.
    pub fn classify_into(&self, inputs: &[CullInput], camera: &CullCamera, out: &mut [CullOutcome]) {
        debug_assert_eq!(inputs.len(), out.len());
        for (input, slot) in inputs.iter().zip(out.iter_mut()) {
            *slot = self.classify(input, camera);
        }
    }

    /// Ids of the visible inputs, in input order.
    pub fn cull(&self, inputs: &[CullInput], camera: &CullCamera) -> Vec<InstanceId> {
        inputs
            .iter()
            .filter(|input| self.classify(input, camera).is_visible())
            .map(|input| input.id)
            .collect()
    }
}
