//! Growth categories supplied by the plant simulation and their rendering profiles.
//!
//! The set of categories is closed, so per-category behaviour is a lookup table of
//! plain data rather than a family of trait objects.

use serde::{Deserialize, Serialize};

/// Growth stage of a plant as reported by the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GrowthCategory {
    Seedling,
    Vegetative,
    Flowering,
    Ripening,
    Harvested,
}

impl GrowthCategory {
    pub const ALL: [GrowthCategory; 5] = [
        GrowthCategory::Seedling,
        GrowthCategory::Vegetative,
        GrowthCategory::Flowering,
        GrowthCategory::Ripening,
        GrowthCategory::Harvested,
    ];

    pub fn profile(self) -> CategoryProfile {
        match self {
            GrowthCategory::Seedling => CategoryProfile {
                bounds_scale: 0.35,
                lod_distance_scale: 0.5,
                distance_only_from_lod: Some(2),
            },
            GrowthCategory::Vegetative => CategoryProfile {
                bounds_scale: 0.8,
                lod_distance_scale: 0.85,
                distance_only_from_lod: None,
            },
            GrowthCategory::Flowering => CategoryProfile {
                bounds_scale: 1.0,
                lod_distance_scale: 1.0,
                distance_only_from_lod: None,
            },
            GrowthCategory::Ripening => CategoryProfile {
                bounds_scale: 1.1,
                lod_distance_scale: 1.15,
                distance_only_from_lod: None,
            },
            GrowthCategory::Harvested => CategoryProfile {
                bounds_scale: 0.6,
                lod_distance_scale: 0.75,
                distance_only_from_lod: Some(2),
            },
        }
    }

    /// Compact index written into per-instance GPU data.
    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Rendering parameters that vary by growth category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryProfile {
    /// Multiplier applied to the instance's bounding radius.
    pub bounds_scale: f32,
    /// Multiplier applied to LOD switch distances (small plants drop detail sooner).
    pub lod_distance_scale: f32,
    /// LOD level from which the frustum test is skipped and the distance test alone
    /// decides. Near, detailed LODs are always frustum tested.
    pub distance_only_from_lod: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_positive_scales() {
        for category in GrowthCategory::ALL {
            let profile = category.profile();
            assert!(profile.bounds_scale > 0.0);
            assert!(profile.lod_distance_scale > 0.0);
        }
    }
}
