pub mod ash_backend;
pub use ash_backend::AshBackend;

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

use crate::core::types::{MaterialId, MeshId};
use crate::error::{CanopyError, Result};

/// What the graphics device can do; decides which submission path is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCapabilities {
    pub instancing: bool,
    pub indirect_draw: bool,
    pub compute: bool,
    pub max_instances_per_draw: usize,
}

impl Default for GpuCapabilities {
    fn default() -> Self {
        Self {
            instancing: true,
            indirect_draw: true,
            compute: false,
            max_instances_per_draw: crate::config::DEFAULT_HARDWARE_INSTANCE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Per-instance vertex data.
    Instance,
    /// `DrawIndexedIndirectArgs` records.
    IndirectArgs,
}

/// Index range of a mesh inside the host's shared geometry buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshInfo {
    pub index_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
}

/// Layout of `VkDrawIndexedIndirectCommand`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    pub fn new(mesh: &MeshInfo, instance_count: u32) -> Self {
        Self {
            index_count: mesh.index_count,
            instance_count,
            first_index: mesh.first_index,
            vertex_offset: mesh.vertex_offset,
            first_instance: 0,
        }
    }
}

/// Instanced draw whose instance data is uploaded with the call.
#[derive(Debug, Clone, Copy)]
pub struct DirectDraw<'a> {
    pub mesh_id: MeshId,
    pub mesh: MeshInfo,
    pub material: MaterialId,
    pub instance_bytes: &'a [u8],
    pub instance_count: u32,
}

/// Draw whose parameters live in GPU buffers owned by the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectDraw {
    pub mesh_id: MeshId,
    pub material: MaterialId,
    pub instance_buffer: BufferHandle,
    pub args_buffer: BufferHandle,
}

/// GPU resource provider and draw API injected into the engine.
pub trait RenderBackend: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> GpuCapabilities;

    fn allocate_buffer(&self, kind: BufferKind, size: u64) -> Result<BufferHandle>;

    /// Writes `bytes` at the start of the buffer.
    fn write_buffer(&self, handle: BufferHandle, bytes: &[u8]) -> Result<()>;

    fn release_buffer(&self, handle: BufferHandle);

    fn draw_direct(&self, draw: &DirectDraw<'_>) -> Result<()>;

    fn draw_indirect(&self, draw: &IndirectDraw) -> Result<()>;
}

/// Counters kept by [`NoopBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoopStats {
    pub direct_draws: u64,
    pub indirect_draws: u64,
    pub instances_drawn: u64,
    pub allocations: u64,
    pub releases: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Default)]
struct NoopState {
    stats: NoopStats,
    buffers: HashMap<u64, (BufferKind, u64)>,
    next_handle: u64,
    fail_allocations: bool,
}

/// Headless backend: validates buffer use and counts draws.
#[derive(Debug, Default)]
pub struct NoopBackend {
    capabilities: GpuCapabilities,
    state: Mutex<NoopState>,
}

impl NoopBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(capabilities: GpuCapabilities) -> Self {
        Self {
            capabilities,
            state: Mutex::default(),
        }
    }

    /// Makes every following allocation fail, as if device memory ran out.
    pub fn set_fail_allocations(&self, fail: bool) {
        self.state.lock().fail_allocations = fail;
    }

    pub fn stats(&self) -> NoopStats {
        self.state.lock().stats
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }
}

impl RenderBackend for NoopBackend {
    fn name(&self) -> &str {
        "noop"
    }

    fn capabilities(&self) -> GpuCapabilities {
        self.capabilities
    }

    fn allocate_buffer(&self, kind: BufferKind, size: u64) -> Result<BufferHandle> {
        let mut state = self.state.lock();
        if state.fail_allocations {
            return Err(CanopyError::ResourceUnavailable(format!(
                "{kind:?} buffer of {size} bytes"
            )));
        }
        state.next_handle += 1;
        let handle = state.next_handle;
        state.buffers.insert(handle, (kind, size));
        state.stats.allocations += 1;
        Ok(BufferHandle(handle))
    }

    fn write_buffer(&self, handle: BufferHandle, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let (_, size) = *state
            .buffers
            .get(&handle.0)
            .ok_or_else(|| CanopyError::ResourceUnavailable(format!("buffer {} not allocated", handle.0)))?;
        if bytes.len() as u64 > size {
            return Err(CanopyError::ResourceUnavailable(format!(
                "write of {} bytes into buffer {} of {size}",
                bytes.len(),
                handle.0
            )));
        }
        state.stats.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn release_buffer(&self, handle: BufferHandle) {
        let mut state = self.state.lock();
        if state.buffers.remove(&handle.0).is_some() {
            state.stats.releases += 1;
        }
    }

    fn draw_direct(&self, draw: &DirectDraw<'_>) -> Result<()> {
        let mut state = self.state.lock();
        state.stats.direct_draws += 1;
        state.stats.instances_drawn += u64::from(draw.instance_count);
        state.stats.bytes_written += draw.instance_bytes.len() as u64;
        Ok(())
    }

    fn draw_indirect(&self, draw: &IndirectDraw) -> Result<()> {
        let mut state = self.state.lock();
        for handle in [draw.instance_buffer, draw.args_buffer] {
            if !state.buffers.contains_key(&handle.0) {
                return Err(CanopyError::ResourceUnavailable(format!(
                    "buffer {} not allocated",
                    handle.0
                )));
            }
        }
        state.stats.indirect_draws += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_args_match_vulkan_layout() {
        assert_eq!(std::mem::size_of::<DrawIndexedIndirectArgs>(), 20);
    }

    #[test]
    fn noop_rejects_oversized_writes() {
        let backend = NoopBackend::new();
        let handle = backend.allocate_buffer(BufferKind::Instance, 8).unwrap();
        assert!(backend.write_buffer(handle, &[0u8; 8]).is_ok());
        assert!(backend.write_buffer(handle, &[0u8; 9]).is_err());

        backend.release_buffer(handle);
        assert!(backend.write_buffer(handle, &[0u8; 4]).is_err());
        assert_eq!(backend.live_buffers(), 0);
    }
}
