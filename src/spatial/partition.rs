use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::ZoneConfig;
use crate::core::types::Aabb;
use crate::spatial::zone::{Zone, ZoneCoord, ZoneState};
use crate::utils::allocator::InstanceId;

/// Neighbourhood shape used when selecting zones around the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ZoneShape {
    /// All zones within Chebyshev distance `rings`.
    #[default]
    Square,
    /// All zones within Manhattan distance `rings`.
    Diamond,
}

/// Uniform ground-plane grid mapping zones to the instances located in them.
///
/// Every registered instance is a member of exactly one zone. Mutation goes through
/// the owning [`InstanceRegistry`](crate::registry::InstanceRegistry).
pub struct SpatialPartition {
    zone_size: f32,
    shape: ZoneShape,
    max_zones: usize,
    zones: HashMap<ZoneCoord, Zone>,
}

impl SpatialPartition {
    pub fn new(config: &ZoneConfig) -> Self {
        Self {
            zone_size: config.zone_size,
            shape: config.shape,
            max_zones: config.max_zones,
            zones: HashMap::new(),
        }
    }

    pub fn zone_size(&self) -> f32 {
        self.zone_size
    }

    /// Grid coordinate containing `position`: `floor(position / zone_size)` on X and Z.
    pub fn zone_for(&self, position: Vec3) -> ZoneCoord {
        ZoneCoord::new(
            (position.x / self.zone_size).floor() as i32,
            (position.z / self.zone_size).floor() as i32,
        )
    }

    pub fn zone(&self, coord: ZoneCoord) -> Option<&Zone> {
        self.zones.get(&coord)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// World bounds of a zone, whether or not it currently exists.
    pub fn zone_bounds(&self, coord: ZoneCoord) -> Aabb {
        self.zones
            .get(&coord)
            .map(|zone| zone.bounds)
            .unwrap_or_else(|| Zone::new(coord, self.zone_size).bounds)
    }

    pub fn state(&self, coord: ZoneCoord) -> Option<ZoneState> {
        self.zones.get(&coord).map(|zone| zone.state)
    }

    /// Zones currently listing `id`. Always zero or one entry.
    pub fn zones_containing(&self, id: InstanceId) -> Vec<ZoneCoord> {
        let mut found: Vec<ZoneCoord> = self
            .zones
            .values()
            .filter(|zone| zone.contains(id))
            .map(|zone| zone.coord)
            .collect();
        found.sort();
        found
    }

    /// Loaded zones in coordinate order.
    pub fn loaded_zones(&self) -> Vec<ZoneCoord> {
        self.zones_in_state(ZoneState::Loaded)
    }

    pub fn zones_in_state(&self, state: ZoneState) -> Vec<ZoneCoord> {
        let mut coords: Vec<ZoneCoord> = self
            .zones
            .values()
            .filter(|zone| zone.state == state)
            .map(|zone| zone.coord)
            .collect();
        coords.sort();
        coords
    }

    pub(crate) fn insert(&mut self, id: InstanceId, position: Vec3) -> ZoneCoord {
        let coord = self.zone_for(position);
        self.zone_entry(coord).insert(id);
        coord
    }

    pub(crate) fn remove(&mut self, id: InstanceId, coord: ZoneCoord) -> bool {
        let removed = self
            .zones
            .get_mut(&coord)
            .map(|zone| zone.remove(id))
            .unwrap_or(false);
        self.prune(coord);
        removed
    }

    /// Moves `id` between zones when its position crosses a boundary.
    ///
    /// Returns `(old, new)` when the zone changed, `None` when both positions map to the
    /// same zone.
    pub fn on_instance_moved(
        &mut self,
        id: InstanceId,
        old_position: Vec3,
        new_position: Vec3,
    ) -> Option<(ZoneCoord, ZoneCoord)> {
        let old_zone = self.zone_for(old_position);
        let new_zone = self.zone_for(new_position);
        if old_zone == new_zone {
            return None;
        }

        self.remove(id, old_zone);
        self.zone_entry(new_zone).insert(id);
        Some((old_zone, new_zone))
    }

    /// Zones around `camera_zone` out to `ring_count` rings, nearest ring first and
    /// lexicographic inside a ring, truncated to the configured maximum.
    pub fn visible_zones(&self, camera_zone: ZoneCoord, ring_count: u32) -> Vec<ZoneCoord> {
        let mut zones = Vec::new();

        for ring in 0..=ring_count {
            let r = ring as i32;
            for dx in -r..=r {
                for dz in -r..=r {
                    let coord = ZoneCoord::new(camera_zone.x + dx, camera_zone.z + dz);
                    let coord_ring = match self.shape {
                        ZoneShape::Square => coord.square_ring(camera_zone),
                        ZoneShape::Diamond => coord.diamond_ring(camera_zone),
                    };
                    if coord_ring != ring {
                        continue;
                    }
                    if zones.len() == self.max_zones {
                        return zones;
                    }
                    zones.push(coord);
                }
            }
        }

        zones
    }

    pub(crate) fn set_state(&mut self, coord: ZoneCoord, state: ZoneState) {
        self.zone_entry(coord).state = state;
        self.prune(coord);
    }

    /// Removes the zone entirely and hands back the ids it held.
    pub(crate) fn destroy_zone(&mut self, coord: ZoneCoord) -> Vec<InstanceId> {
        self.zones
            .remove(&coord)
            .map(|mut zone| zone.take_instances())
            .unwrap_or_default()
    }

    pub(crate) fn clear_failed(&mut self) -> usize {
        let failed = self.zones_in_state(ZoneState::Failed);
        for coord in &failed {
            self.set_state(*coord, ZoneState::Unloaded);
        }
        failed.len()
    }

    fn zone_entry(&mut self, coord: ZoneCoord) -> &mut Zone {
        let size = self.zone_size;
        self.zones
            .entry(coord)
            .or_insert_with(|| Zone::new(coord, size))
    }

    // Unloaded zones without members carry no information.
    fn prune(&mut self, coord: ZoneCoord) {
        let empty_unloaded = self
            .zones
            .get(&coord)
            .map(|zone| zone.state == ZoneState::Unloaded && zone.instance_count() == 0)
            .unwrap_or(false);
        if empty_unloaded {
            self.zones.remove(&coord);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(shape: ZoneShape, max_zones: usize) -> SpatialPartition {
        SpatialPartition::new(&ZoneConfig {
            zone_size: 10.0,
            shape,
            max_zones,
            ..ZoneConfig::default()
        })
    }

    #[test]
    fn zone_for_floors_negative_coordinates() {
        let grid = partition(ZoneShape::Square, 64);
        assert_eq!(grid.zone_for(Vec3::new(-0.1, 0.0, 9.9)), ZoneCoord::new(-1, 0));
        assert_eq!(grid.zone_for(Vec3::new(10.0, 50.0, -10.0)), ZoneCoord::new(1, -1));
    }

    #[test]
    fn square_rings_are_ordered() {
        let grid = partition(ZoneShape::Square, 64);
        let zones = grid.visible_zones(ZoneCoord::new(0, 0), 1);

        assert_eq!(zones.len(), 9);
        assert_eq!(zones[0], ZoneCoord::new(0, 0));
        assert_eq!(zones[1], ZoneCoord::new(-1, -1));
        assert_eq!(zones[8], ZoneCoord::new(1, 1));
    }

    #[test]
    fn diamond_neighbourhood_excludes_corners() {
        let grid = partition(ZoneShape::Diamond, 64);
        let zones = grid.visible_zones(ZoneCoord::new(5, 5), 1);

        assert_eq!(
            zones,
            vec![
                ZoneCoord::new(5, 5),
                ZoneCoord::new(4, 5),
                ZoneCoord::new(5, 4),
                ZoneCoord::new(5, 6),
                ZoneCoord::new(6, 5),
            ]
        );
    }

    #[test]
    fn visible_zones_respect_cap() {
        let grid = partition(ZoneShape::Square, 4);
        assert_eq!(grid.visible_zones(ZoneCoord::new(0, 0), 3).len(), 4);
    }

    #[test]
    fn empty_unloaded_zone_is_pruned() {
        let mut grid = partition(ZoneShape::Square, 64);
        let id = InstanceId::new(0, 0);
        let coord = grid.insert(id, Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(grid.zone_count(), 1);

        grid.remove(id, coord);
        assert_eq!(grid.zone_count(), 0);
    }
}
