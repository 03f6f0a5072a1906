use crate::quality::QualityTier;

/// Telemetry for HUD and logging consumers, refreshed every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub frame: u64,
    /// Registered instances.
    pub instance_count: usize,
    /// Instances in the current batches.
    pub active_instances: usize,
    pub batch_count: usize,
    pub culled_count: usize,
    pub draw_calls: u32,
    /// Batches skipped for missing resources since startup.
    pub skipped_batches: u64,
    pub quality_tier: QualityTier,
    pub loaded_zones: usize,
    pub superseded_cull_jobs: u64,
    pub frame_ms: f32,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            frame: 0,
            instance_count: 0,
            active_instances: 0,
            batch_count: 0,
            culled_count: 0,
            draw_calls: 0,
            skipped_batches: 0,
            quality_tier: QualityTier::High,
            loaded_zones: 0,
            superseded_cull_jobs: 0,
            frame_ms: 0.0,
        }
    }
}

impl MetricsSnapshot {
    /// One-line summary for overlays.
    pub fn format_compact(&self) -> String {
        format!(
            "{:?} | {:.1} ms | inst {}/{} | batches {} draws {} | culled {} | zones {}",
            self.quality_tier,
            self.frame_ms,
            self.active_instances,
            self.instance_count,
            self.batch_count,
            self.draw_calls,
            self.culled_count,
            self.loaded_zones,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_format_mentions_tier_and_counts() {
        let metrics = MetricsSnapshot {
            instance_count: 40,
            active_instances: 12,
            batch_count: 3,
            quality_tier: QualityTier::Medium,
            ..MetricsSnapshot::default()
        };
        let line = metrics.format_compact();
        assert!(line.starts_with("Medium"));
        assert!(line.contains("inst 12/40"));
        assert!(line.contains("batches 3"));
    }
}
