use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use ash_renderer::vulkan::{Allocator, VulkanDevice};
use log::info;
use parking_lot::Mutex;
use vk_mem::Alloc;

use crate::core::types::{MaterialId, MeshId};
use crate::error::{CanopyError, Result};
use crate::gpu::{
    BufferHandle, BufferKind, DirectDraw, DrawIndexedIndirectArgs, GpuCapabilities, IndirectDraw,
    RenderBackend,
};

/// Vertex binding the instance buffer is bound to; binding 0 is the mesh.
pub const INSTANCE_BINDING: u32 = 1;

const MIN_STREAM_BYTES: u64 = 64 * 1024;

pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: vk_mem::Allocation,
    pub size: u64,
}

/// Draw recorded during submission, replayed into the host's command buffer.
#[derive(Debug, Clone, Copy)]
pub enum RecordedDraw {
    Instanced {
        mesh: MeshId,
        material: MaterialId,
        instance_buffer: vk::Buffer,
        instance_offset: u64,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
        instance_count: u32,
    },
    Indirect {
        mesh: MeshId,
        material: MaterialId,
        instance_buffer: vk::Buffer,
        args_buffer: vk::Buffer,
    },
}

#[derive(Default)]
struct StreamState {
    current: Option<GpuBuffer>,
    offset: u64,
    // Outgrown within the frame; still referenced by recorded draws.
    retired: Vec<GpuBuffer>,
}

/// Vulkan backend on top of `ash_renderer`'s device and VMA allocator.
///
/// All buffers are host-visible. Direct draws append their instance data to a
/// per-frame stream buffer.
pub struct AshBackend {
    pub device: Arc<VulkanDevice>,
    pub allocator: Arc<Allocator>,
    buffers: Mutex<HashMap<u64, GpuBuffer>>,
    next_handle: AtomicU64,
    stream: Mutex<StreamState>,
    draws: Mutex<Vec<RecordedDraw>>,
}

impl AshBackend {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let allocator = unsafe { Allocator::new(&device) }
            .map_err(|e| CanopyError::ResourceUnavailable(format!("VMA allocator: {e}")))?;
        info!("instancing backend created on Vulkan device");
        Ok(Self {
            device,
            allocator: Arc::new(allocator),
            buffers: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            stream: Mutex::new(StreamState::default()),
            draws: Mutex::new(Vec::new()),
        })
    }

    /// Starts a new frame. Call once the previous frame's command buffer has finished
    /// executing so the stream buffer can be overwritten.
    pub fn begin_frame(&self) {
        let mut stream = self.stream.lock();
        stream.offset = 0;
        for mut buf in stream.retired.drain(..) {
            unsafe { self.allocator.destroy_buffer(buf.buffer, &mut buf.allocation) };
        }
        self.draws.lock().clear();
    }

    pub fn take_draws(&self) -> Vec<RecordedDraw> {
        std::mem::take(&mut *self.draws.lock())
    }

    /// Records the frame's draws into `cmd`. `bind_mesh` binds pipeline, material and
    /// mesh geometry for each draw before the instance buffer is bound.
    ///
    /// # Safety
    /// `cmd` must be a command buffer in the recording state inside a render pass
    /// compatible with the pipelines `bind_mesh` binds.
    pub unsafe fn replay(&self, cmd: vk::CommandBuffer, mut bind_mesh: impl FnMut(MeshId, MaterialId)) {
        let stride = std::mem::size_of::<DrawIndexedIndirectArgs>() as u32;
        for draw in self.take_draws() {
            match draw {
                RecordedDraw::Instanced {
                    mesh,
                    material,
                    instance_buffer,
                    instance_offset,
                    index_count,
                    first_index,
                    vertex_offset,
                    instance_count,
                } => {
                    bind_mesh(mesh, material);
                    self.device.device.cmd_bind_vertex_buffers(
                        cmd,
                        INSTANCE_BINDING,
                        &[instance_buffer],
                        &[instance_offset],
                    );
                    self.device.device.cmd_draw_indexed(
                        cmd,
                        index_count,
                        instance_count,
                        first_index,
                        vertex_offset,
                        0,
                    );
                }
                RecordedDraw::Indirect {
                    mesh,
                    material,
                    instance_buffer,
                    args_buffer,
                } => {
                    bind_mesh(mesh, material);
                    self.device
                        .device
                        .cmd_bind_vertex_buffers(cmd, INSTANCE_BINDING, &[instance_buffer], &[0]);
                    self.device
                        .device
                        .cmd_draw_indexed_indirect(cmd, args_buffer, 0, 1, stride);
                }
            }
        }
    }

    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> Result<GpuBuffer> {
        let (buffer, allocation) = unsafe {
            self.allocator
                .create_buffer(size.max(1), usage, vk_mem::MemoryUsage::AutoPreferHost)
        }
        .map_err(|e| CanopyError::ResourceUnavailable(format!("buffer of {size} bytes: {e}")))?;
        Ok(GpuBuffer {
            buffer,
            allocation,
            size,
        })
    }

    fn upload(&self, buf: &mut GpuBuffer, offset: u64, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() as u64 > buf.size {
            return Err(CanopyError::ResourceUnavailable(format!(
                "write of {} bytes at {offset} exceeds buffer of {}",
                bytes.len(),
                buf.size
            )));
        }
        unsafe {
            let ptr = self
                .allocator
                .vma
                .map_memory(&mut buf.allocation)
                .map_err(|e| CanopyError::ResourceUnavailable(format!("map failed: {e:?}")))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset as usize), bytes.len());
            self.allocator.vma.unmap_memory(&mut buf.allocation);
        }
        Ok(())
    }

    /// Appends `bytes` to the frame's stream buffer, growing it if needed.
    fn stream_upload(&self, bytes: &[u8]) -> Result<(vk::Buffer, u64)> {
        let mut stream = self.stream.lock();
        let needed = stream.offset + bytes.len() as u64;
        let fits = stream.current.as_ref().is_some_and(|buf| buf.size >= needed);

        if !fits {
            let size = (needed * 2).max(MIN_STREAM_BYTES);
            let fresh = self.create_buffer(size, vk::BufferUsageFlags::VERTEX_BUFFER)?;
            if let Some(old) = stream.current.replace(fresh) {
                stream.retired.push(old);
            }
            stream.offset = 0;
        }

        let offset = stream.offset;
        let StreamState { current, .. } = &mut *stream;
        let Some(buf) = current.as_mut() else {
            return Err(CanopyError::ResourceUnavailable("stream buffer".to_string()));
        };
        self.upload(buf, offset, bytes)?;
        let handle = buf.buffer;
        stream.offset = offset + bytes.len() as u64;
        Ok((handle, offset))
    }

    fn raw_buffer(&self, handle: BufferHandle) -> Result<vk::Buffer> {
        self.buffers
            .lock()
            .get(&handle.0)
            .map(|buf| buf.buffer)
            .ok_or_else(|| CanopyError::ResourceUnavailable(format!("buffer {} not allocated", handle.0)))
    }
}

impl RenderBackend for AshBackend {
    fn name(&self) -> &str {
        "vulkan-ash"
    }

    fn capabilities(&self) -> GpuCapabilities {
        GpuCapabilities {
            instancing: true,
            indirect_draw: true,
            compute: true,
            max_instances_per_draw: crate::config::MAX_HARDWARE_INSTANCE_LIMIT,
        }
    }

    fn allocate_buffer(&self, kind: BufferKind, size: u64) -> Result<BufferHandle> {
        let usage = match kind {
            BufferKind::Instance => vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
            BufferKind::IndirectArgs => vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER,
        };
        let buffer = self.create_buffer(size, usage)?;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.buffers.lock().insert(handle, buffer);
        Ok(BufferHandle(handle))
    }

    fn write_buffer(&self, handle: BufferHandle, bytes: &[u8]) -> Result<()> {
        let mut buffers = self.buffers.lock();
        let buf = buffers
            .get_mut(&handle.0)
            .ok_or_else(|| CanopyError::ResourceUnavailable(format!("buffer {} not allocated", handle.0)))?;
        self.upload(buf, 0, bytes)
    }

    fn release_buffer(&self, handle: BufferHandle) {
        if let Some(mut buf) = self.buffers.lock().remove(&handle.0) {
            unsafe { self.allocator.destroy_buffer(buf.buffer, &mut buf.allocation) };
        }
    }

    fn draw_direct(&self, draw: &DirectDraw<'_>) -> Result<()> {
        let (instance_buffer, instance_offset) = self.stream_upload(draw.instance_bytes)?;
        self.draws.lock().push(RecordedDraw::Instanced {
            mesh: draw.mesh_id,
            material: draw.material,
            instance_buffer,
            instance_offset,
            index_count: draw.mesh.index_count,
            first_index: draw.mesh.first_index,
            vertex_offset: draw.mesh.vertex_offset,
            instance_count: draw.instance_count,
        });
        Ok(())
    }

    fn draw_indirect(&self, draw: &IndirectDraw) -> Result<()> {
        let instance_buffer = self.raw_buffer(draw.instance_buffer)?;
        let args_buffer = self.raw_buffer(draw.args_buffer)?;
        self.draws.lock().push(RecordedDraw::Indirect {
            mesh: draw.mesh_id,
            material: draw.material,
            instance_buffer,
            args_buffer,
        });
        Ok(())
    }
}

impl Drop for AshBackend {
    fn drop(&mut self) {
        unsafe {
            for (_, mut buf) in self.buffers.lock().drain() {
                self.allocator.destroy_buffer(buf.buffer, &mut buf.allocation);
            }
            let mut stream = self.stream.lock();
            let current = stream.current.take();
            for mut buf in stream.retired.drain(..).chain(current) {
                self.allocator.destroy_buffer(buf.buffer, &mut buf.allocation);
            }
        }
    }
}
