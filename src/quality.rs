//! Adaptive quality tiers driven by measured frame time.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::QualityConfig;
use crate::events::{EngineEvent, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityTier {
    Low,
    Medium,
    High,
    Ultra,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [
        QualityTier::Low,
        QualityTier::Medium,
        QualityTier::High,
        QualityTier::Ultra,
    ];

    /// One tier down, or `None` at `Low`.
    pub fn lower(self) -> Option<QualityTier> {
        match self {
            QualityTier::Low => None,
            QualityTier::Medium => Some(QualityTier::Low),
            QualityTier::High => Some(QualityTier::Medium),
            QualityTier::Ultra => Some(QualityTier::High),
        }
    }

    /// One tier up, or `None` at `Ultra`.
    pub fn higher(self) -> Option<QualityTier> {
        match self {
            QualityTier::Low => Some(QualityTier::Medium),
            QualityTier::Medium => Some(QualityTier::High),
            QualityTier::High => Some(QualityTier::Ultra),
            QualityTier::Ultra => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSettings {
    pub max_batch_size: usize,
    /// Frames between culling/assembly passes.
    pub update_interval_frames: u32,
    pub max_active_instances: usize,
    /// Multiplier on LOD switch distances.
    pub lod_bias: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTable {
    pub low: TierSettings,
    pub medium: TierSettings,
    pub high: TierSettings,
    pub ultra: TierSettings,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            low: TierSettings {
                max_batch_size: 256,
                update_interval_frames: 4,
                max_active_instances: 10_000,
                lod_bias: 0.6,
            },
            medium: TierSettings {
                max_batch_size: 512,
                update_interval_frames: 2,
                max_active_instances: 25_000,
                lod_bias: 0.8,
            },
            high: TierSettings {
                max_batch_size: 1023,
                update_interval_frames: 1,
                max_active_instances: 50_000,
                lod_bias: 1.0,
            },
            ultra: TierSettings {
                max_batch_size: 4096,
                update_interval_frames: 1,
                max_active_instances: 100_000,
                lod_bias: 1.25,
            },
        }
    }
}

impl TierTable {
    pub fn get(&self, tier: QualityTier) -> &TierSettings {
        match tier {
            QualityTier::Low => &self.low,
            QualityTier::Medium => &self.medium,
            QualityTier::High => &self.high,
            QualityTier::Ultra => &self.ultra,
        }
    }
}

/// Process-wide performance picture exposed to telemetry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceState {
    pub tier: QualityTier,
    pub target_frame_ms: f32,
    pub last_frame_ms: f32,
    /// Exponential moving average of sampled frame times.
    pub smoothed_frame_ms: f32,
    pub active_instance_cap: usize,
    pub instance_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityChange {
    pub from: QualityTier,
    pub to: QualityTier,
}

const SMOOTHING: f32 = 0.1;

/// One-step-at-a-time tier state machine with hysteresis.
pub struct QualityController {
    config: QualityConfig,
    state: PerformanceState,
    comfortable_streak: u32,
    events: EventBus,
}

impl QualityController {
    pub fn new(config: QualityConfig, events: EventBus) -> Self {
        let tier = config.default_tier;
        let state = PerformanceState {
            tier,
            target_frame_ms: config.target_frame_ms,
            last_frame_ms: 0.0,
            smoothed_frame_ms: config.target_frame_ms,
            active_instance_cap: config.tiers.get(tier).max_active_instances,
            instance_count: 0,
        };
        Self {
            config,
            state,
            comfortable_streak: 0,
            events,
        }
    }

    pub fn tier(&self) -> QualityTier {
        self.state.tier
    }

    pub fn settings(&self) -> &TierSettings {
        self.config.tiers.get(self.state.tier)
    }

    pub fn state(&self) -> &PerformanceState {
        &self.state
    }

    /// Feeds one frame-time sample; at most one tier step per call.
    pub fn sample(&mut self, frame_ms: f32) -> Option<QualityChange> {
        self.state.last_frame_ms = frame_ms;
        self.state.smoothed_frame_ms += (frame_ms - self.state.smoothed_frame_ms) * SMOOTHING;

        let target = self.config.target_frame_ms;
        if frame_ms > target * (1.0 + self.config.degrade_margin) {
            self.comfortable_streak = 0;
            let lower = self.state.tier.lower()?;
            return Some(self.change_to(lower, frame_ms));
        }

        if frame_ms < target * (1.0 - self.config.upgrade_margin) {
            self.comfortable_streak += 1;
            if self.comfortable_streak >= self.config.upgrade_window {
                self.comfortable_streak = 0;
                let higher = self.state.tier.higher()?;
                return Some(self.change_to(higher, frame_ms));
            }
        } else {
            self.comfortable_streak = 0;
        }

        None
    }

    /// Host override; resets the upgrade window.
    pub fn force_tier(&mut self, tier: QualityTier) -> Option<QualityChange> {
        self.comfortable_streak = 0;
        if tier == self.state.tier {
            return None;
        }
        Some(self.change_to(tier, self.state.last_frame_ms))
    }

    pub fn observe_instance_count(&mut self, count: usize) {
        self.state.instance_count = count;
    }

    fn change_to(&mut self, tier: QualityTier, frame_ms: f32) -> QualityChange {
        let change = QualityChange {
            from: self.state.tier,
            to: tier,
        };
        self.state.tier = tier;
        self.state.active_instance_cap = self.config.tiers.get(tier).max_active_instances;

        info!(
            "quality {:?} -> {:?} (frame {frame_ms:.2} ms, target {:.2} ms)",
            change.from, change.to, self.config.target_frame_ms
        );
        debug!("active instance cap now {}", self.state.active_instance_cap);
        self.events.publish(EngineEvent::QualityChanged {
            from: change.from,
            to: change.to,
        });
        change
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(window: u32) -> QualityController {
        QualityController::new(
            QualityConfig {
                target_frame_ms: 10.0,
                upgrade_window: window,
                ..QualityConfig::default()
            },
            EventBus::new(),
        )
    }

    #[test]
    fn within_margin_holds_tier() {
        let mut quality = controller(3);
        for _ in 0..10 {
            assert!(quality.sample(11.5).is_none());
            assert!(quality.sample(8.5).is_none());
        }
        assert_eq!(quality.tier(), QualityTier::High);
    }

    #[test]
    fn upgrade_needs_unbroken_window() {
        let mut quality = controller(3);
        quality.sample(5.0);
        quality.sample(5.0);
        quality.sample(10.0);
        quality.sample(5.0);
        assert_eq!(quality.tier(), QualityTier::High);
        quality.sample(5.0);
        let change = quality.sample(5.0).unwrap();
        assert_eq!(change.to, QualityTier::Ultra);
    }

    #[test]
    fn clamps_at_ultra() {
        let mut quality = controller(1);
        quality.sample(1.0);
        assert_eq!(quality.tier(), QualityTier::Ultra);
        assert!(quality.sample(1.0).is_none());
        assert_eq!(quality.tier(), QualityTier::Ultra);
    }

    #[test]
    fn tier_change_updates_cap_and_publishes() {
        let mut quality = controller(3);
        let events = quality.events.subscribe();

        quality.sample(30.0);

        assert_eq!(
            quality.state().active_instance_cap,
            TierTable::default().medium.max_active_instances
        );
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::QualityChanged {
                from: QualityTier::High,
                to: QualityTier::Medium
            }
        );
    }
}
