//! Groups visible instances into draw batches under a per-draw instance cap.

use std::collections::HashMap;
use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::batching::key::{BatchKey, GroupingCriteria};
use crate::config::BatchConfig;
use crate::core::types::MaterialId;
use crate::culling::{CullInput, CullResult, HiddenReason};
use crate::quality::TierSettings;
use crate::utils::allocator::InstanceId;

/// Per-instance GPU record: column-major model matrix plus packed parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub model: [[f32; 4]; 4],
    /// `[lod, category, material, variant low bits]`
    pub params: [u32; 4],
}

impl InstanceData {
    pub fn new(input: &CullInput, lod: u8) -> Self {
        Self {
            model: input.transform.to_matrix().to_cols_array_2d(),
            params: [
                u32::from(lod),
                input.category.index(),
                input.material.0,
                input.variant as u32,
            ],
        }
    }
}

/// A visible instance with the LOD it was culled at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleInstance {
    pub input: CullInput,
    pub lod: u8,
    pub distance_sq: f32,
}

impl VisibleInstance {
    pub fn id(&self) -> InstanceId {
        self.input.id
    }
}

/// Instances sharing one key, ready for a single instanced draw.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub key: BatchKey,
    /// Overflow index within the key: 0 for the first batch, 1 for the next, ...
    pub sequence: u32,
    pub capacity: usize,
    /// Material bound for the draw. Without material grouping this is the material of
    /// the first instance; per-instance materials travel in `InstanceData::params`.
    pub material: MaterialId,
    pub ids: Vec<InstanceId>,
    pub instances: Vec<InstanceData>,
}

impl Batch {
    pub fn visible_count(&self) -> usize {
        self.instances.len()
    }

    pub fn is_full(&self) -> bool {
        self.instances.len() >= self.capacity
    }

    /// Raw instance buffer for upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.instances)
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.key, self.sequence)
    }
}

/// Batches of one frame plus the culling counters behind them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledFrame {
    /// Frame whose snapshot produced these batches.
    pub frame: u64,
    pub batches: Vec<Batch>,
    pub considered: usize,
    pub visible: usize,
    pub culled_distance: usize,
    pub culled_frustum: usize,
    pub culled_disabled: usize,
    /// Visible instances dropped by the active-instance cap.
    pub culled_budget: usize,
}

impl AssembledFrame {
    pub fn culled(&self) -> usize {
        self.culled_distance + self.culled_frustum + self.culled_disabled + self.culled_budget
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }
}

pub struct BatchAssembler {
    criteria: GroupingCriteria,
    hardware_limit: usize,
    max_batch_size: usize,
    max_active_instances: usize,
}

impl BatchAssembler {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            criteria: config.grouping,
            hardware_limit: config.hardware_instance_limit.max(1),
            max_batch_size: usize::MAX,
            max_active_instances: usize::MAX,
        }
    }

    pub fn criteria(&self) -> GroupingCriteria {
        self.criteria
    }

    pub fn set_criteria(&mut self, criteria: GroupingCriteria) {
        self.criteria = criteria;
    }

    /// Adopts the batch size and instance cap of a quality tier.
    pub fn apply_tier(&mut self, tier: &TierSettings) {
        self.max_batch_size = tier.max_batch_size.max(1);
        self.max_active_instances = tier.max_active_instances;
    }

    /// Effective per-batch capacity.
    pub fn capacity(&self) -> usize {
        self.max_batch_size.min(self.hardware_limit)
    }

    pub fn max_active_instances(&self) -> usize {
        self.max_active_instances
    }

    /// Groups `visible` into batches.
    ///
    /// Instances are taken in id order; keys appear in the order their first instance
    /// was seen, and a full batch continues in a new batch with the next sequence.
    pub fn assemble_visible(&self, visible: &[VisibleInstance]) -> Vec<Batch> {
        let mut ordered: Vec<&VisibleInstance> = visible.iter().collect();
        ordered.sort_by_key(|v| v.id());

        let mut groups: Vec<(BatchKey, Vec<&VisibleInstance>)> = Vec::new();
        let mut slots: HashMap<BatchKey, usize> = HashMap::new();
        for instance in ordered {
            let key = self.criteria.key_for(&instance.input, instance.lod);
            let slot = *slots.entry(key).or_insert_with(|| {
                groups.push((key, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(instance);
        }

        let capacity = self.capacity();
        let mut batches = Vec::new();
        for (key, members) in groups {
            for (sequence, chunk) in members.chunks(capacity).enumerate() {
                batches.push(Batch {
                    key,
                    sequence: sequence as u32,
                    capacity,
                    material: chunk[0].input.material,
                    ids: chunk.iter().map(|v| v.id()).collect(),
                    instances: chunk
                        .iter()
                        .map(|v| InstanceData::new(&v.input, v.lod))
                        .collect(),
                });
            }
        }
        batches
    }

    /// Keeps the nearest `max_active_instances` (ties broken by id).
    ///
    /// Returns how many were dropped.
    pub fn enforce_active_cap(&self, visible: &mut Vec<VisibleInstance>) -> usize {
        let cap = self.max_active_instances;
        if visible.len() <= cap {
            return 0;
        }

        let dropped = visible.len() - cap;
        if cap > 0 {
            visible.select_nth_unstable_by(cap - 1, |a, b| {
                a.distance_sq
                    .total_cmp(&b.distance_sq)
                    .then_with(|| a.id().cmp(&b.id()))
            });
        }
        visible.truncate(cap);
        dropped
    }

    /// Builds the frame's batches from a culling result.
    pub fn assemble(&self, result: &CullResult) -> AssembledFrame {
        let mut visible: Vec<VisibleInstance> = result
            .visible()
            .map(|(input, lod, distance_sq)| VisibleInstance {
                input: *input,
                lod,
                distance_sq,
            })
            .collect();
        let culled_budget = self.enforce_active_cap(&mut visible);

        AssembledFrame {
            frame: result.frame,
            batches: self.assemble_visible(&visible),
            considered: result.inputs.len(),
            visible: visible.len(),
            culled_distance: result.hidden_count(HiddenReason::Distance),
            culled_frustum: result.hidden_count(HiddenReason::Frustum),
            culled_disabled: result.hidden_count(HiddenReason::Disabled),
            culled_budget,
        }
    }
}
