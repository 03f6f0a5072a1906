//! Turns assembled batches into backend draw calls.

use std::collections::HashMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::batching::{Batch, BatchKey};
use crate::config::SubmitConfig;
use crate::core::types::MeshId;
use crate::error::{CanopyError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::gpu::{
    BufferHandle, BufferKind, DirectDraw, DrawIndexedIndirectArgs, IndirectDraw, MeshInfo, RenderBackend,
};

/// How batches reach the GPU. Chosen once by configuration, never per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubmitMode {
    /// Instance data is uploaded with every draw.
    #[default]
    Direct,
    /// Instance data and draw arguments live in reused GPU buffers.
    Indirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Drawn { draw_calls: u32 },
    Skipped,
}

/// Counters for one frame of submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitStats {
    pub draw_calls: u32,
    pub submitted_batches: u32,
    pub skipped_batches: u32,
    pub instances_submitted: usize,
}

#[derive(Debug, Clone, Copy)]
struct SizedBuffer {
    handle: BufferHandle,
    size: u64,
}

/// GPU state kept per (key, sequence) between frames.
#[derive(Debug, Default)]
struct Slot {
    instances: Option<SizedBuffer>,
    args: Option<BufferHandle>,
    last_used: u64,
    retry_at: Option<u64>,
    warned: bool,
}

pub struct RenderSubmitter {
    mode: SubmitMode,
    retry_frames: u64,
    release_after: u64,
    meshes: HashMap<MeshId, MeshInfo>,
    slots: HashMap<(BatchKey, u32), Slot>,
    skipped_total: u64,
    fallback_logged: bool,
    events: EventBus,
}

impl RenderSubmitter {
    pub fn new(config: &SubmitConfig, events: EventBus) -> Self {
        Self {
            mode: config.mode,
            retry_frames: config.resource_retry_frames.max(1),
            release_after: config.release_after_frames.max(1),
            meshes: HashMap::new(),
            slots: HashMap::new(),
            skipped_total: 0,
            fallback_logged: false,
            events,
        }
    }

    pub fn mode(&self) -> SubmitMode {
        self.mode
    }

    /// Mode actually used against `backend`.
    pub fn effective_mode(&self, backend: &dyn RenderBackend) -> SubmitMode {
        let caps = backend.capabilities();
        match self.mode {
            SubmitMode::Indirect if caps.instancing && caps.indirect_draw => SubmitMode::Indirect,
            _ => SubmitMode::Direct,
        }
    }

    pub fn register_mesh(&mut self, mesh: MeshId, info: MeshInfo) {
        self.meshes.insert(mesh, info);
    }

    pub fn unregister_mesh(&mut self, mesh: MeshId) -> Option<MeshInfo> {
        self.meshes.remove(&mesh)
    }

    /// Batches skipped since creation.
    pub fn skipped_batches(&self) -> u64 {
        self.skipped_total
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Submits every batch of a frame, then releases slots that went unused.
    pub fn submit_frame(&mut self, frame: u64, batches: &[Batch], backend: &dyn RenderBackend) -> SubmitStats {
        let mut stats = SubmitStats::default();
        for batch in batches {
            match self.submit(frame, batch, backend) {
                SubmitOutcome::Drawn { draw_calls } => {
                    stats.draw_calls += draw_calls;
                    stats.submitted_batches += 1;
                    stats.instances_submitted += batch.visible_count();
                }
                SubmitOutcome::Skipped => stats.skipped_batches += 1,
            }
        }
        self.reclaim(frame, backend);
        stats
    }

    /// Submits one batch. A batch whose resources are missing is skipped and counted;
    /// nothing here fails the frame.
    pub fn submit(&mut self, frame: u64, batch: &Batch, backend: &dyn RenderBackend) -> SubmitOutcome {
        if batch.instances.is_empty() {
            return SubmitOutcome::Drawn { draw_calls: 0 };
        }

        let slot_key = (batch.key, batch.sequence);
        let slot = self.slots.entry(slot_key).or_default();
        slot.last_used = frame;
        if slot.retry_at.is_some_and(|retry_at| frame < retry_at) {
            self.skipped_total += 1;
            return SubmitOutcome::Skipped;
        }

        let Some(mesh) = self.meshes.get(&batch.key.mesh).copied() else {
            let err = CanopyError::ResourceUnavailable(format!("mesh {} not registered", batch.key.mesh.0));
            return self.fail(frame, slot_key, batch, err);
        };

        let mode = self.effective_mode(backend);
        if mode != self.mode && !self.fallback_logged {
            self.fallback_logged = true;
            info!("{} lacks indirect draws; submitting directly", backend.name());
        }

        let caps = backend.capabilities();
        let result = if !caps.instancing {
            Self::draw_per_instance(batch, &mesh, backend)
        } else {
            match mode {
                SubmitMode::Direct => Self::draw_direct(batch, &mesh, caps.max_instances_per_draw, backend),
                SubmitMode::Indirect => self.draw_indirect(slot_key, batch, &mesh, backend),
            }
        };

        match result {
            Ok(draw_calls) => {
                if let Some(slot) = self.slots.get_mut(&slot_key) {
                    if slot.warned {
                        debug!("batch {batch} resources available again");
                    }
                    slot.retry_at = None;
                    slot.warned = false;
                }
                SubmitOutcome::Drawn { draw_calls }
            }
            Err(err) => self.fail(frame, slot_key, batch, err),
        }
    }

    /// Releases every GPU buffer held by the submitter.
    pub fn release_all(&mut self, backend: &dyn RenderBackend) {
        for (_, slot) in self.slots.drain() {
            Self::release_slot(slot, backend);
        }
    }

    fn fail(&mut self, frame: u64, slot_key: (BatchKey, u32), batch: &Batch, err: CanopyError) -> SubmitOutcome {
        self.skipped_total += 1;
        let slot = self.slots.entry(slot_key).or_default();
        slot.retry_at = Some(frame + self.retry_frames);
        if !slot.warned {
            slot.warned = true;
            warn!("skipping batch {batch}: {err}");
            self.events
                .publish(EngineEvent::ResourceUnavailable(format!("{batch}: {err}")));
        }
        SubmitOutcome::Skipped
    }

    fn draw_per_instance(batch: &Batch, mesh: &MeshInfo, backend: &dyn RenderBackend) -> Result<u32> {
        for instance in &batch.instances {
            backend.draw_direct(&DirectDraw {
                mesh_id: batch.key.mesh,
                mesh: *mesh,
                material: batch.material,
                instance_bytes: bytemuck::bytes_of(instance),
                instance_count: 1,
            })?;
        }
        Ok(batch.instances.len() as u32)
    }

    fn draw_direct(batch: &Batch, mesh: &MeshInfo, per_draw: usize, backend: &dyn RenderBackend) -> Result<u32> {
        let mut draw_calls = 0;
        for chunk in batch.instances.chunks(per_draw.max(1)) {
            backend.draw_direct(&DirectDraw {
                mesh_id: batch.key.mesh,
                mesh: *mesh,
                material: batch.material,
                instance_bytes: bytemuck::cast_slice(chunk),
                instance_count: chunk.len() as u32,
            })?;
            draw_calls += 1;
        }
        Ok(draw_calls)
    }

    fn draw_indirect(
        &mut self,
        slot_key: (BatchKey, u32),
        batch: &Batch,
        mesh: &MeshInfo,
        backend: &dyn RenderBackend,
    ) -> Result<u32> {
        let slot = self.slots.entry(slot_key).or_default();
        let bytes = batch.as_bytes();
        let needed = bytes.len() as u64;

        let instances = match slot.instances {
            Some(buf) if buf.size >= needed => buf,
            stale => {
                if let Some(old) = stale {
                    backend.release_buffer(old.handle);
                    slot.instances = None;
                }
                // Room for a full batch so the buffer survives growth within the key.
                let size = (batch.capacity * std::mem::size_of::<crate::batching::InstanceData>()) as u64;
                let size = size.max(needed);
                let handle = backend.allocate_buffer(BufferKind::Instance, size)?;
                let buf = SizedBuffer { handle, size };
                slot.instances = Some(buf);
                buf
            }
        };
        let args = match slot.args {
            Some(handle) => handle,
            None => {
                let size = std::mem::size_of::<DrawIndexedIndirectArgs>() as u64;
                let handle = backend.allocate_buffer(BufferKind::IndirectArgs, size)?;
                slot.args = Some(handle);
                handle
            }
        };

        let draw_args = DrawIndexedIndirectArgs::new(mesh, batch.visible_count() as u32);
        backend.write_buffer(instances.handle, bytes)?;
        backend.write_buffer(args, bytemuck::bytes_of(&draw_args))?;
        backend.draw_indirect(&IndirectDraw {
            mesh_id: batch.key.mesh,
            material: batch.material,
            instance_buffer: instances.handle,
            args_buffer: args,
        })?;
        Ok(1)
    }

    fn reclaim(&mut self, frame: u64, backend: &dyn RenderBackend) {
        let release_after = self.release_after;
        let expired: Vec<(BatchKey, u32)> = self
            .slots
            .iter()
            .filter(|(_, slot)| frame.saturating_sub(slot.last_used) >= release_after)
            .map(|(key, _)| *key)
            .collect();

        for key in expired {
            if let Some(slot) = self.slots.remove(&key) {
                Self::release_slot(slot, backend);
            }
        }
    }

    fn release_slot(slot: Slot, backend: &dyn RenderBackend) {
        if let Some(buf) = slot.instances {
            backend.release_buffer(buf.handle);
        }
        if let Some(args) = slot.args {
            backend.release_buffer(args);
        }
    }
}
