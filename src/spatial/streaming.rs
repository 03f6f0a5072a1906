//! Camera-driven zone streaming.
//!
//! Each tick diffs the loaded zones against the neighbourhood of the camera zone and
//! works through a queue of load/unload operations, at most `ops_per_tick` at a time.

use std::collections::{HashSet, VecDeque};

use log::{debug, warn};

use crate::config::ZoneConfig;
use crate::core::types::Aabb;
use crate::error::Result;
use crate::spatial::{
    partition::SpatialPartition,
    zone::{ZoneCoord, ZoneState},
};
use crate::utils::allocator::InstanceId;

/// Loads and releases the external asset group backing a zone.
pub trait AssetGroupLoader: Send {
    fn name(&self) -> &str {
        "asset-loader"
    }

    /// Makes the zone's assets resident. An error marks the zone failed.
    fn load_zone(&mut self, zone: ZoneCoord, bounds: &Aabb) -> Result<()>;

    fn unload_zone(&mut self, _zone: ZoneCoord) {}
}

/// Loader for hosts whose zones need no external assets.
#[derive(Debug, Default)]
pub struct NullAssetLoader;

impl AssetGroupLoader for NullAssetLoader {
    fn name(&self) -> &str {
        "null-loader"
    }

    fn load_zone(&mut self, _zone: ZoneCoord, _bounds: &Aabb) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZoneOp {
    Load(ZoneCoord),
    Unload(ZoneCoord),
}

impl ZoneOp {
    fn coord(&self) -> ZoneCoord {
        match self {
            ZoneOp::Load(coord) | ZoneOp::Unload(coord) => *coord,
        }
    }
}

/// Outcome of one streaming tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamReport {
    pub camera_zone: Option<ZoneCoord>,
    pub camera_zone_changed: bool,
    pub loaded: Vec<ZoneCoord>,
    /// Unloaded zones with the ids that were destroyed along with them.
    pub unloaded: Vec<(ZoneCoord, Vec<InstanceId>)>,
    pub failed: Vec<ZoneCoord>,
    /// Operations still queued after this tick.
    pub pending: usize,
}

impl StreamReport {
    pub fn is_idle(&self) -> bool {
        self.loaded.is_empty() && self.unloaded.is_empty() && self.failed.is_empty()
    }

    pub fn destroyed_instances(&self) -> usize {
        self.unloaded.iter().map(|(_, ids)| ids.len()).sum()
    }
}

/// Rate-limited load/unload queue driven by the camera zone.
pub struct ZoneStreamer {
    ring_count: u32,
    ops_per_tick: usize,
    queue: VecDeque<ZoneOp>,
    queued: HashSet<ZoneCoord>,
    camera_zone: Option<ZoneCoord>,
}

impl ZoneStreamer {
    pub fn new(config: &ZoneConfig) -> Self {
        Self {
            ring_count: config.ring_count,
            ops_per_tick: config.ops_per_tick.max(1),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            camera_zone: None,
        }
    }

    pub fn camera_zone(&self) -> Option<ZoneCoord> {
        self.camera_zone
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn tick(
        &mut self,
        partition: &mut SpatialPartition,
        camera_zone: ZoneCoord,
        loader: &mut dyn AssetGroupLoader,
    ) -> StreamReport {
        let mut report = StreamReport {
            camera_zone: Some(camera_zone),
            ..StreamReport::default()
        };

        if self.camera_zone != Some(camera_zone) {
            report.camera_zone_changed = true;
            self.camera_zone = Some(camera_zone);
            let retried = partition.clear_failed();
            if retried > 0 {
                debug!("camera entered zone {camera_zone}; retrying {retried} failed zone(s)");
            }
        }

        let desired = partition.visible_zones(camera_zone, self.ring_count);
        let desired_set: HashSet<ZoneCoord> = desired.iter().copied().collect();

        for coord in &desired {
            let resident = matches!(
                partition.state(*coord),
                Some(ZoneState::Loaded) | Some(ZoneState::Failed)
            );
            if !resident && self.queued.insert(*coord) {
                self.queue.push_back(ZoneOp::Load(*coord));
            }
        }
        // Every tracked zone outside the radius goes, loaded or not, so instances in
        // failed or never-loaded zones do not outlive it.
        let mut outside: Vec<ZoneCoord> = partition
            .zones()
            .map(|zone| zone.coord)
            .filter(|coord| !desired_set.contains(coord))
            .collect();
        outside.sort();
        for coord in outside {
            if self.queued.insert(coord) {
                self.queue.push_back(ZoneOp::Unload(coord));
            }
        }

        let mut executed = 0;
        while executed < self.ops_per_tick {
            let Some(op) = self.queue.pop_front() else {
                break;
            };
            self.queued.remove(&op.coord());

            match op {
                ZoneOp::Load(coord) => {
                    // Stale: the camera moved away or a previous op already resolved it.
                    let unresolved = partition
                        .state(coord)
                        .map_or(true, |state| state == ZoneState::Unloaded);
                    if !desired_set.contains(&coord) || !unresolved {
                        continue;
                    }
                    executed += 1;
                    let bounds = partition.zone_bounds(coord);
                    match loader.load_zone(coord, &bounds) {
                        Ok(()) => {
                            partition.set_state(coord, ZoneState::Loaded);
                            report.loaded.push(coord);
                        }
                        Err(err) => {
                            warn!("{}: {err}", loader.name());
                            partition.set_state(coord, ZoneState::Failed);
                            report.failed.push(coord);
                        }
                    }
                }
                ZoneOp::Unload(coord) => {
                    let Some(state) = partition.state(coord) else {
                        continue;
                    };
                    if desired_set.contains(&coord) {
                        continue;
                    }
                    executed += 1;
                    let destroyed = partition.destroy_zone(coord);
                    // Only loaded zones hold assets to release.
                    if state == ZoneState::Loaded {
                        loader.unload_zone(coord);
                    }
                    report.unloaded.push((coord, destroyed));
                }
            }
        }

        report.pending = self.queue.len();
        report
    }
}
