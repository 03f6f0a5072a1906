use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{
    category::GrowthCategory,
    types::{MaterialId, MeshId},
};
use crate::culling::CullInput;

/// Which attributes split instances into separate batches.
///
/// The mesh always takes part: one draw binds one mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingCriteria {
    pub material: bool,
    pub lod: bool,
    pub category: bool,
    pub content_hash: bool,
}

impl Default for GroupingCriteria {
    fn default() -> Self {
        Self {
            material: true,
            lod: true,
            category: false,
            content_hash: false,
        }
    }
}

impl GroupingCriteria {
    pub fn key_for(&self, input: &CullInput, lod: u8) -> BatchKey {
        BatchKey {
            mesh: input.mesh,
            material: self.material.then_some(input.material),
            lod: self.lod.then_some(lod),
            category: self.category.then_some(input.category),
            content_hash: self.content_hash.then_some(input.variant),
        }
    }
}

/// Ordered tuple of the enabled grouping attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub mesh: MeshId,
    pub material: Option<MaterialId>,
    pub lod: Option<u8>,
    pub category: Option<GrowthCategory>,
    pub content_hash: Option<u64>,
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh{}", self.mesh.0)?;
        if let Some(material) = self.material {
            write!(f, "/mat{}", material.0)?;
        }
        if let Some(lod) = self.lod {
            write!(f, "/lod{lod}")?;
        }
        if let Some(category) = self.category {
            write!(f, "/{category:?}")?;
        }
        if let Some(hash) = self.content_hash {
            write!(f, "/{hash:016x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Aabb, Transform};
    use crate::utils::allocator::InstanceId;

    #[test]
    fn default_key_uses_material_and_lod() {
        let transform = Transform::default();
        let input = CullInput {
            id: InstanceId::new(0, 0),
            transform,
            sphere: Aabb::default().bounding_sphere(&transform),
            mesh: MeshId(3),
            material: MaterialId(7),
            category: GrowthCategory::Ripening,
            variant: 0xabc,
            visible: true,
        };

        let key = GroupingCriteria::default().key_for(&input, 2);
        assert_eq!(key.material, Some(MaterialId(7)));
        assert_eq!(key.lod, Some(2));
        assert_eq!(key.category, None);
        assert_eq!(key.content_hash, None);
        assert_eq!(key.to_string(), "mesh3/mat7/lod2");
    }
}
