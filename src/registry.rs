//! Instance registry: the single owner of instance state.
//!
//! Every mutation that can move an instance goes through here, so the spatial
//! partition's zone membership always matches the stored positions.

use std::sync::Arc;

use glam::Vec3;
use log::{debug, warn};

use crate::config::{RegistryConfig, ZoneConfig};
use crate::core::{
    category::GrowthCategory,
    instance::{Instance, InstanceDescriptor},
    types::{MaterialId, Transform},
};
use crate::culling::CullInput;
use crate::error::{CanopyError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::spatial::{AssetGroupLoader, SpatialPartition, StreamReport, ZoneCoord, ZoneStreamer};
use crate::utils::allocator::{Arena, InstanceId};

pub struct InstanceRegistry {
    instances: Arena<Instance>,
    capacity: usize,
    partition: SpatialPartition,
    streamer: ZoneStreamer,
    events: EventBus,
    snapshot: Option<Arc<[CullInput]>>,
}

impl InstanceRegistry {
    pub fn new(registry: &RegistryConfig, zones: &ZoneConfig, events: EventBus) -> Self {
        Self {
            instances: Arena::with_capacity(registry.max_instances.min(4096)),
            capacity: registry.max_instances,
            partition: SpatialPartition::new(zones),
            streamer: ZoneStreamer::new(zones),
            events,
            snapshot: None,
        }
    }

    /// Registry with default zone settings and a private event bus.
    pub fn with_capacity(max_instances: usize) -> Self {
        Self::new(
            &RegistryConfig { max_instances },
            &ZoneConfig::default(),
            EventBus::new(),
        )
    }

    pub fn register(&mut self, descriptor: InstanceDescriptor) -> Result<InstanceId> {
        if self.instances.len() >= self.capacity {
            return Err(CanopyError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let position = descriptor.transform.position;
        let zone = self.partition.zone_for(position);
        let id = self
            .instances
            .insert(Instance::from_descriptor(InstanceId::NULL, descriptor, zone));
        if let Some(instance) = self.instances.get_mut(id) {
            instance.id = id;
        }
        self.partition.insert(id, position);

        self.mutated();
        self.publish_count();
        Ok(id)
    }

    /// Removes the instance. Unknown or stale ids are ignored.
    pub fn unregister(&mut self, id: InstanceId) -> bool {
        let Some(instance) = self.instances.remove(id) else {
            return false;
        };
        self.partition.remove(id, instance.zone);

        self.mutated();
        self.publish_count();
        true
    }

    /// Replaces transform and category, moving the instance between zones when needed.
    pub fn update(&mut self, id: InstanceId, transform: Transform, category: GrowthCategory) -> Result<()> {
        let instance = self.instances.get_mut(id).ok_or(CanopyError::NotFound(id))?;
        let old_position = instance.transform.position;

        instance.transform = transform;
        instance.category = category;

        if let Some((_, new_zone)) = self
            .partition
            .on_instance_moved(id, old_position, transform.position)
        {
            instance.zone = new_zone;
        }

        self.mutated();
        Ok(())
    }

    pub fn set_position(&mut self, id: InstanceId, position: Vec3) -> Result<()> {
        let instance = self.get(id).ok_or(CanopyError::NotFound(id))?;
        let transform = Transform {
            position,
            ..instance.transform
        };
        let category = instance.category;
        self.update(id, transform, category)
    }

    pub fn set_material(&mut self, id: InstanceId, material: MaterialId) -> Result<()> {
        let instance = self.instances.get_mut(id).ok_or(CanopyError::NotFound(id))?;
        instance.material = material;
        self.mutated();
        Ok(())
    }

    pub fn set_visible(&mut self, id: InstanceId, visible: bool) -> Result<()> {
        let instance = self.instances.get_mut(id).ok_or(CanopyError::NotFound(id))?;
        if instance.visible != visible {
            instance.visible = visible;
            self.mutated();
        }
        Ok(())
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id)
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.contains(id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ids(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.ids()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> + '_ {
        self.instances.iter()
    }

    pub fn zone_of(&self, id: InstanceId) -> Option<ZoneCoord> {
        self.instances.get(id).map(|instance| instance.zone)
    }

    pub fn partition(&self) -> &SpatialPartition {
        &self.partition
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Immutable per-instance rows for culling, sorted by id.
    ///
    /// Rebuilt only after a mutation; unchanged frames share the same allocation.
    pub fn snapshot(&mut self) -> Arc<[CullInput]> {
        if let Some(snapshot) = &self.snapshot {
            return Arc::clone(snapshot);
        }

        let mut rows: Vec<CullInput> = self
            .iter()
            .map(|instance| CullInput {
                id: instance.id,
                transform: instance.transform,
                sphere: instance.world_bounds(),
                mesh: instance.mesh,
                material: instance.material,
                category: instance.category,
                variant: instance.variant,
                visible: instance.visible,
            })
            .collect();
        rows.sort_by_key(|row| row.id);

        let snapshot: Arc<[CullInput]> = rows.into();
        self.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Runs one zone-streaming tick around `camera_position`.
    ///
    /// Instances of unloaded zones are destroyed along with the zone.
    pub fn stream_tick(&mut self, camera_position: Vec3, loader: &mut dyn AssetGroupLoader) -> StreamReport {
        let camera_zone = self.partition.zone_for(camera_position);
        let report = self.streamer.tick(&mut self.partition, camera_zone, loader);

        for zone in &report.loaded {
            self.events.publish(EngineEvent::ZoneLoaded(*zone));
        }
        for zone in &report.failed {
            self.events.publish(EngineEvent::ZoneLoadFailed(*zone));
        }

        let mut destroyed = 0;
        for (zone, ids) in &report.unloaded {
            let mut removed = 0;
            for id in ids {
                if self.instances.remove(*id).is_some() {
                    removed += 1;
                } else {
                    warn!("zone {zone} listed {id} which the registry no longer holds");
                }
            }
            destroyed += removed;
            self.events.publish(EngineEvent::ZoneUnloaded {
                zone: *zone,
                destroyed: removed,
            });
        }

        if destroyed > 0 {
            debug!("streaming destroyed {destroyed} instance(s)");
            self.mutated();
            self.publish_count();
        }

        report
    }

    fn mutated(&mut self) {
        self.snapshot = None;
    }

    fn publish_count(&self) {
        self.events.publish(EngineEvent::InstanceCountChanged {
            count: self.instances.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MeshId;

    fn plant(x: f32, z: f32) -> InstanceDescriptor {
        InstanceDescriptor::new(MeshId(1), MaterialId(1), GrowthCategory::Vegetative).at(Vec3::new(x, 0.0, z))
    }

    #[test]
    fn stale_id_is_not_found_after_unregister() {
        let mut registry = InstanceRegistry::with_capacity(8);
        let id = registry.register(plant(0.0, 0.0)).unwrap();
        assert!(registry.unregister(id));

        let err = registry
            .update(id, Transform::default(), GrowthCategory::Seedling)
            .unwrap_err();
        assert!(matches!(err, CanopyError::NotFound(stale) if stale == id));
        assert!(!registry.unregister(id));
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let mut registry = InstanceRegistry::with_capacity(8);
        let first = registry.register(plant(0.0, 0.0)).unwrap();
        registry.unregister(first);
        let second = registry.register(plant(1.0, 1.0)).unwrap();

        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
    }

    #[test]
    fn snapshot_is_cached_until_mutation() {
        let mut registry = InstanceRegistry::with_capacity(8);
        let id = registry.register(plant(0.0, 0.0)).unwrap();

        let a = registry.snapshot();
        let b = registry.snapshot();
        assert!(Arc::ptr_eq(&a, &b));

        registry.set_visible(id, false).unwrap();
        let c = registry.snapshot();
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(!c[0].visible);
    }

    #[test]
    fn count_changes_are_published() {
        let mut registry = InstanceRegistry::with_capacity(8);
        let events = registry.events().subscribe();

        let id = registry.register(plant(0.0, 0.0)).unwrap();
        registry.unregister(id);

        let counts: Vec<EngineEvent> = events.try_iter().collect();
        assert_eq!(
            counts,
            vec![
                EngineEvent::InstanceCountChanged { count: 1 },
                EngineEvent::InstanceCountChanged { count: 0 },
            ]
        );
    }
}
