//! Engine configuration: default constants and the serde-driven config tree.

use serde::{Deserialize, Serialize};

use crate::batching::GroupingCriteria;
use crate::culling::{CullLatency, MAX_LOD_LEVELS};
use crate::error::{CanopyError, Result};
use crate::quality::{QualityTier, TierTable};
use crate::spatial::ZoneShape;
use crate::submit::SubmitMode;

/// Default maximum number of registered instances.
pub const DEFAULT_MAX_INSTANCES: usize = 100_000;

/// Default edge length of a streaming zone (world units).
pub const DEFAULT_ZONE_SIZE: f32 = 32.0;

/// Default number of zone rings kept resident around the camera zone.
pub const DEFAULT_STREAM_RINGS: u32 = 3;

/// Default cap on the number of zones selected around the camera.
pub const DEFAULT_MAX_ZONES: usize = 64;

/// Default number of zone load/unload operations executed per streaming tick.
pub const DEFAULT_ZONE_OPS_PER_TICK: usize = 2;

/// Default distance beyond which instances are never drawn.
pub const DEFAULT_MAX_RENDER_DISTANCE: f32 = 150.0;

/// Default LOD switch distances (LOD 0..3).
pub const DEFAULT_LOD_DISTANCES: [f32; MAX_LOD_LEVELS] = [20.0, 45.0, 90.0, f32::MAX];

/// Hardware per-draw instance limit of the classic instanced-draw path.
pub const DEFAULT_HARDWARE_INSTANCE_LIMIT: usize = 1023;

/// Largest instance limit accepted for any backend.
pub const MAX_HARDWARE_INSTANCE_LIMIT: usize = 65536;

/// Default frame budget (60 Hz).
pub const DEFAULT_TARGET_FRAME_MS: f32 = 1000.0 / 60.0;

/// Default relative margin before quality reacts (20%).
pub const DEFAULT_QUALITY_MARGIN: f32 = 0.2;

/// Default number of consecutive comfortable samples before upgrading a tier.
pub const DEFAULT_UPGRADE_WINDOW: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub max_instances: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_instances: DEFAULT_MAX_INSTANCES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub zone_size: f32,
    pub shape: ZoneShape,
    pub ring_count: u32,
    pub max_zones: usize,
    pub ops_per_tick: usize,
    /// Frames between streaming ticks.
    pub stream_interval_frames: u32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            zone_size: DEFAULT_ZONE_SIZE,
            shape: ZoneShape::Square,
            ring_count: DEFAULT_STREAM_RINGS,
            max_zones: DEFAULT_MAX_ZONES,
            ops_per_tick: DEFAULT_ZONE_OPS_PER_TICK,
            stream_interval_frames: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullConfig {
    pub max_render_distance: f32,
    pub frustum_culling: bool,
    /// Whether visibility is consumed in the frame it was computed or one frame later.
    pub latency: CullLatency,
    /// LOD level from which instances use the distance test only.
    pub distance_only_from_lod: Option<u8>,
    pub lod_distances: [f32; MAX_LOD_LEVELS],
    /// Smallest chunk of instances handed to one worker.
    pub parallel_min_chunk: usize,
}

impl Default for CullConfig {
    fn default() -> Self {
        Self {
            max_render_distance: DEFAULT_MAX_RENDER_DISTANCE,
            frustum_culling: true,
            latency: CullLatency::Immediate,
            distance_only_from_lod: None,
            lod_distances: DEFAULT_LOD_DISTANCES,
            parallel_min_chunk: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub hardware_instance_limit: usize,
    pub grouping: GroupingCriteria,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            hardware_instance_limit: DEFAULT_HARDWARE_INSTANCE_LIMIT,
            grouping: GroupingCriteria::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub default_tier: QualityTier,
    pub target_frame_ms: f32,
    /// Degrade when a sample exceeds `target * (1 + degrade_margin)`.
    pub degrade_margin: f32,
    /// Count towards an upgrade when a sample is below `target * (1 - upgrade_margin)`.
    pub upgrade_margin: f32,
    pub upgrade_window: u32,
    /// Frames between quality samples.
    pub sample_interval_frames: u32,
    pub tiers: TierTable,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            default_tier: QualityTier::High,
            target_frame_ms: DEFAULT_TARGET_FRAME_MS,
            degrade_margin: DEFAULT_QUALITY_MARGIN,
            upgrade_margin: DEFAULT_QUALITY_MARGIN,
            upgrade_window: DEFAULT_UPGRADE_WINDOW,
            sample_interval_frames: 1,
            tiers: TierTable::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    pub mode: SubmitMode,
    /// Frames to wait before retrying a batch slot whose resources failed.
    pub resource_retry_frames: u64,
    /// Frames a GPU slot may stay unused before its buffers are released.
    pub release_after_frames: u64,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            mode: SubmitMode::Direct,
            resource_retry_frames: 120,
            release_after_frames: 300,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub registry: RegistryConfig,
    pub zones: ZoneConfig,
    pub culling: CullConfig,
    pub batching: BatchConfig,
    pub quality: QualityConfig,
    pub submit: SubmitConfig,
}

impl EngineConfig {
    /// Parses a TOML document; missing sections and keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CanopyError::InvalidConfig(msg.to_string()));

        if self.registry.max_instances == 0 {
            return invalid("registry.max_instances must be positive");
        }
        if !(self.zones.zone_size.is_finite() && self.zones.zone_size > 0.0) {
            return invalid("zones.zone_size must be a positive finite number");
        }
        if self.zones.max_zones == 0 || self.zones.ops_per_tick == 0 {
            return invalid("zones.max_zones and zones.ops_per_tick must be positive");
        }
        if !(self.culling.max_render_distance > 0.0) {
            return invalid("culling.max_render_distance must be positive");
        }
        if self
            .culling
            .lod_distances
            .windows(2)
            .any(|pair| pair[0] > pair[1])
        {
            return invalid("culling.lod_distances must be ascending");
        }
        let limit = self.batching.hardware_instance_limit;
        if limit == 0 || limit > MAX_HARDWARE_INSTANCE_LIMIT {
            return invalid("batching.hardware_instance_limit must be within 1..=65536");
        }

        let quality = &self.quality;
        if !(quality.target_frame_ms > 0.0) {
            return invalid("quality.target_frame_ms must be positive");
        }
        if !(0.0..1.0).contains(&quality.degrade_margin)
            || !(0.0..1.0).contains(&quality.upgrade_margin)
        {
            return invalid("quality margins must be within [0, 1)");
        }
        if quality.upgrade_window == 0 {
            return invalid("quality.upgrade_window must be at least one sample");
        }
        for tier in QualityTier::ALL {
            let settings = quality.tiers.get(tier);
            if settings.max_batch_size == 0 || settings.max_active_instances == 0 {
                return Err(CanopyError::InvalidConfig(format!(
                    "tier {tier:?} needs a positive batch size and instance cap"
                )));
            }
            if !(settings.lod_bias.is_finite() && settings.lod_bias > 0.0) {
                return Err(CanopyError::InvalidConfig(format!(
                    "tier {tier:?} lod_bias must be a positive finite number"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [registry]
            max_instances = 1000

            [culling]
            max_render_distance = 100.0
            latency = "OneFrame"

            [submit]
            mode = "Indirect"
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.max_instances, 1000);
        assert_eq!(config.culling.latency, CullLatency::OneFrame);
        assert_eq!(config.submit.mode, SubmitMode::Indirect);
        assert_eq!(config.zones, ZoneConfig::default());
        assert_eq!(
            config.batching.hardware_instance_limit,
            DEFAULT_HARDWARE_INSTANCE_LIMIT
        );
    }

    #[test]
    fn rejects_oversized_hardware_limit() {
        let err = EngineConfig::from_toml_str("[batching]\nhardware_instance_limit = 70000\n")
            .unwrap_err();
        assert!(matches!(err, CanopyError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_non_positive_lod_bias() {
        let err = EngineConfig::from_toml_str(
            r#"
            [quality.tiers.low]
            max_batch_size = 256
            update_interval_frames = 4
            max_active_instances = 10000
            lod_bias = 0.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CanopyError::InvalidConfig(_)));

        let mut config = EngineConfig::default();
        config.quality.tiers.ultra.lod_bias = -1.0;
        assert!(config.validate().is_err());
        config.quality.tiers.ultra.lod_bias = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_zone_size() {
        let mut config = EngineConfig::default();
        config.zones.zone_size = 0.0;
        assert!(config.validate().is_err());
    }
}
