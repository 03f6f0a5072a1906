//! Data-parallel culling dispatch.
//!
//! A dispatcher takes an immutable input span and fills an output span of the same
//! length. Hosts can plug in their own implementation (SIMD batches, GPU compute).

use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::culling::culler::{CullCamera, CullInput, CullOutcome, VisibilityCuller};

pub trait CullDispatch: Send + Sync {
    fn name(&self) -> &str;

    /// Classifies every input into `out[i]`. `inputs` and `out` have equal length.
    fn dispatch(
        &self,
        culler: &VisibilityCuller,
        inputs: &[CullInput],
        camera: &CullCamera,
        out: &mut [CullOutcome],
    );
}

/// Single-threaded dispatch on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialDispatch;

impl CullDispatch for SequentialDispatch {
    fn name(&self) -> &str {
        "sequential"
    }

    fn dispatch(
        &self,
        culler: &VisibilityCuller,
        inputs: &[CullInput],
        camera: &CullCamera,
        out: &mut [CullOutcome],
    ) {
        culler.classify_into(inputs, camera, out);
    }
}

/// Splits the snapshot into chunks across the rayon pool.
#[cfg(feature = "parallel")]
#[derive(Debug, Clone, Copy)]
pub struct ParallelDispatch {
    min_chunk: usize,
}

#[cfg(feature = "parallel")]
impl ParallelDispatch {
    pub fn new(min_chunk: usize) -> Self {
        Self {
            min_chunk: min_chunk.max(1),
        }
    }
}

#[cfg(feature = "parallel")]
impl Default for ParallelDispatch {
    fn default() -> Self {
        Self::new(crate::config::CullConfig::default().parallel_min_chunk)
    }
}

#[cfg(feature = "parallel")]
impl CullDispatch for ParallelDispatch {
    fn name(&self) -> &str {
        "rayon"
    }

    fn dispatch(
        &self,
        culler: &VisibilityCuller,
        inputs: &[CullInput],
        camera: &CullCamera,
        out: &mut [CullOutcome],
    ) {
        if inputs.len() <= self.min_chunk {
            culler.classify_into(inputs, camera, out);
            return;
        }

        inputs
            .par_chunks(self.min_chunk)
            .zip(out.par_chunks_mut(self.min_chunk))
            .for_each(|(input, output)| culler.classify_into(input, camera, output));
    }
}

/// Dispatcher matching the enabled cargo features.
pub fn default_dispatch(min_chunk: usize) -> Arc<dyn CullDispatch> {
    #[cfg(feature = "parallel")]
    {
        Arc::new(ParallelDispatch::new(min_chunk))
    }
    #[cfg(not(feature = "parallel"))]
    {
        let _ = min_chunk;
        Arc::new(SequentialDispatch)
    }
}

#[cfg(all(test, feature = "parallel"))]
mod tests {
    use super::*;
    use crate::core::{CameraState, GrowthCategory, MaterialId, MeshId, Transform};
    use crate::utils::allocator::InstanceId;
    use glam::Vec3;

    #[test]
    fn parallel_matches_sequential() {
        let inputs: Vec<CullInput> = (0..1000)
            .map(|i| {
                let position = Vec3::new((i % 40) as f32 * 5.0 - 100.0, 0.0, -((i / 40) as f32) * 5.0);
                let transform = Transform::from_position(position);
                CullInput {
                    id: InstanceId::new(i, 0),
                    transform,
                    sphere: crate::core::Aabb::default().bounding_sphere(&transform),
                    mesh: MeshId(0),
                    material: MaterialId(0),
                    category: GrowthCategory::Flowering,
                    variant: 0,
                    visible: true,
                }
            })
            .collect();
        let camera = CullCamera::from_state(&CameraState::default());
        let culler = VisibilityCuller::default();

        let mut sequential = vec![CullOutcome::default(); inputs.len()];
        let mut parallel = vec![CullOutcome::default(); inputs.len()];
        SequentialDispatch.dispatch(&culler, &inputs, &camera, &mut sequential);
        ParallelDispatch::new(64).dispatch(&culler, &inputs, &camera, &mut parallel);

        assert_eq!(sequential, parallel);
    }
}
