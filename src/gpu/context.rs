use bytemuck::Pod;

use super::allocation::{validate_placement, validate_texture_desc, DescriptorAllocator};
use super::error::{GPUError, Result};
use super::render_pass::PipelineDesc;
use super::shader::ShaderContainer;
use super::state::{ResourceStateTracker, TrackedResource, Transition};
use super::structs::*;
use super::table::*;
use super::Backend;
use crate::utils::Handle;

/// Render-target and depth view slots available per context.
pub const RENDER_TARGET_VIEW_CAPACITY: u32 = 256;
pub const DEPTH_VIEW_CAPACITY: u32 = 64;

/// The logical device: every resource, queue and command list created
/// through one backend.
///
/// Handles returned by a context are only meaningful to that context.
/// Access must be serialized by the caller.
pub struct Context<B: Backend> {
    pub(crate) backend: B,
    pub(crate) table: ResourceTable<B>,
    pub(crate) states: ResourceStateTracker,
    pub(crate) resource_views: DescriptorAllocator,
    pub(crate) target_views: DescriptorAllocator,
    pub(crate) depth_views: DescriptorAllocator,
    pub(crate) info: ContextInfo,
    pub(crate) frame: u64,
}

/// State a freshly placed resource starts in. Upload and read-back resources
/// never leave it.
pub fn initial_state(kind: HeapKind) -> ResourceState {
    match kind {
        HeapKind::Upload => ResourceState::GenericRead,
        HeapKind::ReadBack | HeapKind::Gpu => ResourceState::CopyDestination,
    }
}

impl<B: Backend> Context<B> {
    pub fn new(backend: B, info: ContextInfo) -> Self {
        log::info!(
            "created {:?} context on `{}` ({} frames in flight)",
            backend.kind(),
            backend.adapter_name(),
            info.frames_in_flight
        );
        let capacity = backend.resource_descriptor_capacity();
        Self {
            backend,
            table: ResourceTable::default(),
            states: ResourceStateTracker::new(),
            resource_views: DescriptorAllocator::new("shader resource descriptor", capacity),
            target_views: DescriptorAllocator::new(
                "render target descriptor",
                RENDER_TARGET_VIEW_CAPACITY,
            ),
            depth_views: DescriptorAllocator::new("depth stencil descriptor", DEPTH_VIEW_CAPACITY),
            info,
            frame: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn info(&self) -> &ContextInfo {
        &self.info
    }

    ////////////////////////////////////////////////////////////////////////////
    // Heaps
    ////////////////////////////////////////////////////////////////////////////

    pub fn create_heap(&mut self, kind: HeapKind, size: u64) -> Result<Handle<GraphicsHeap>> {
        let raw = self.backend.create_heap(kind, size)?;
        let handle = self.table.heaps.insert(HeapRecord {
            kind,
            size,
            placed: 0,
            raw,
        })?;
        log::debug!("created {:?} heap {:?} of {} bytes", kind, handle, size);
        Ok(handle)
    }

    /// Destroys a heap. Every buffer and texture placed in it must have been
    /// deleted first.
    pub fn delete_heap(&mut self, heap: Handle<GraphicsHeap>) -> Result<()> {
        let placed = self.table.heaps.get(heap)?.placed;
        if placed != 0 {
            return Err(GPUError::HeapInUse(placed));
        }
        let record = self.table.heaps.remove(heap)?;
        self.backend.destroy_heap(record.raw);
        log::debug!("deleted heap {:?}", heap);
        Ok(())
    }

    pub fn heap_size(&self, heap: Handle<GraphicsHeap>) -> Result<u64> {
        Ok(self.table.heaps.get(heap)?.size)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Buffers and textures
    ////////////////////////////////////////////////////////////////////////////

    /// Size and placement alignment a buffer of `size` bytes needs. Never
    /// allocates.
    pub fn buffer_allocation_info(&self, size: u64) -> Result<AllocationInfo> {
        self.backend.buffer_allocation_info(size)
    }

    pub fn texture_allocation_info(&self, desc: &TextureDesc) -> Result<AllocationInfo> {
        validate_texture_desc(desc)?;
        self.backend.texture_allocation_info(desc)
    }

    pub fn create_buffer(
        &mut self,
        heap: Handle<GraphicsHeap>,
        offset: u64,
        size: u64,
    ) -> Result<Handle<GraphicsBuffer>> {
        let info = self.backend.buffer_allocation_info(size)?;
        let heap_record = self.table.heaps.get(heap)?;
        let kind = heap_record.kind;
        validate_placement(offset, info, heap_record.size)?;

        let index = self.resource_views.allocate()?;
        let raw = match self
            .backend
            .create_buffer(&heap_record.raw, kind, offset, size, index)
        {
            Ok(raw) => raw,
            Err(err) => {
                self.resource_views.release(index);
                return Err(err);
            }
        };

        let handle = self.table.buffers.insert(BufferRecord {
            heap,
            kind,
            offset,
            size,
            shader_resource_index: index,
            cpu_pointer: None,
            raw,
        })?;
        self.table.heaps.get_mut(heap)?.placed += 1;
        self.states.register(handle, initial_state(kind));

        log::debug!(
            "placed {} byte buffer {:?} at {} in heap {:?}",
            size,
            handle,
            offset,
            heap
        );
        Ok(handle)
    }

    /// Deletes a buffer, unmapping it first if it is mapped.
    pub fn delete_buffer(&mut self, buffer: Handle<GraphicsBuffer>) -> Result<()> {
        let mut record = self.table.buffers.remove(buffer)?;
        if record.cpu_pointer.take().is_some() {
            if let Ok(heap) = self.table.heaps.get(record.heap) {
                self.backend.unmap_buffer(&heap.raw, &mut record.raw);
            }
        }
        self.backend.destroy_buffer(record.raw);
        self.resource_views.release(record.shader_resource_index);
        self.states.forget(buffer);
        if let Ok(heap) = self.table.heaps.get_mut(record.heap) {
            heap.placed -= 1;
        }
        log::debug!("deleted buffer {:?}", buffer);
        Ok(())
    }

    pub fn buffer_size(&self, buffer: Handle<GraphicsBuffer>) -> Result<u64> {
        Ok(self.table.buffers.get(buffer)?.size)
    }

    pub fn buffer_shader_resource_index(&self, buffer: Handle<GraphicsBuffer>) -> Result<u32> {
        Ok(self.table.buffers.get(buffer)?.shader_resource_index)
    }

    /// Returns the persistent CPU pointer of a buffer in an upload or
    /// read-back heap, mapping it on first use.
    pub fn buffer_cpu_pointer(&mut self, buffer: Handle<GraphicsBuffer>) -> Result<*mut u8> {
        let record = self.table.buffers.get_mut(buffer)?;
        if !record.kind.is_cpu_visible() {
            return Err(GPUError::NotMappable(record.kind));
        }
        if let Some(ptr) = record.cpu_pointer {
            return Ok(ptr);
        }

        let heap = self.table.heaps.get(record.heap)?;
        let ptr = self.backend.map_buffer(&heap.raw, &mut record.raw)?;
        record.cpu_pointer = Some(ptr);
        Ok(ptr)
    }

    /// Views a mapped buffer as a slice of `T`. Trailing bytes that do not
    /// fill a whole `T` are left out.
    pub fn map_buffer_mut<T: Pod>(&mut self, buffer: Handle<GraphicsBuffer>) -> Result<&mut [T]> {
        let ptr = self.buffer_cpu_pointer(buffer)?;
        let size = self.table.buffers.get(buffer)?.size as usize;
        let usable = size - size % std::mem::size_of::<T>().max(1);

        // SAFETY: the mapping covers `size` bytes and stays valid until the
        // buffer is unmapped, which needs `&mut self`.
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr, usable) };
        bytemuck::try_cast_slice_mut(bytes).map_err(|_| GPUError::Unsupported("misaligned mapping"))
    }

    pub fn release_buffer_cpu_pointer(&mut self, buffer: Handle<GraphicsBuffer>) -> Result<()> {
        let record = self.table.buffers.get_mut(buffer)?;
        if record.cpu_pointer.take().is_some() {
            let heap = self.table.heaps.get(record.heap)?;
            self.backend.unmap_buffer(&heap.raw, &mut record.raw);
        }
        Ok(())
    }

    pub fn create_texture(
        &mut self,
        heap: Handle<GraphicsHeap>,
        offset: u64,
        desc: &TextureDesc,
    ) -> Result<Handle<Texture>> {
        validate_texture_desc(desc)?;
        let info = self.backend.texture_allocation_info(desc)?;
        let heap_record = self.table.heaps.get(heap)?;
        let kind = heap_record.kind;
        validate_placement(offset, info, heap_record.size)?;

        let shader_visible = desc
            .usage
            .intersects(TextureUsage::SHADER_READ | TextureUsage::SHADER_WRITE);
        let resource_index = match shader_visible {
            true => Some(self.resource_views.allocate()?),
            false => None,
        };
        let target_index = match self.allocate_target_view(desc) {
            Ok(index) => index,
            Err(err) => {
                if let Some(index) = resource_index {
                    self.resource_views.release(index);
                }
                return Err(err);
            }
        };

        let heap_record = self.table.heaps.get(heap)?;
        let created = self.backend.create_texture(
            &heap_record.raw,
            offset,
            desc,
            resource_index,
            target_index,
        );
        let raw = match created {
            Ok(raw) => raw,
            Err(err) => {
                if let Some(index) = resource_index {
                    self.resource_views.release(index);
                }
                self.release_target_view(desc, target_index);
                return Err(err);
            }
        };

        let handle = self.table.textures.insert(TextureRecord {
            heap: Some(heap),
            desc: *desc,
            shader_resource_index: resource_index,
            target_index,
            owned: true,
            raw,
        })?;
        self.table.heaps.get_mut(heap)?.placed += 1;
        self.states.register(handle, initial_state(kind));

        log::debug!(
            "placed {}x{} {:?} texture {:?} at {} in heap {:?}",
            desc.width,
            desc.height,
            desc.format,
            handle,
            offset,
            heap
        );
        Ok(handle)
    }

    pub(crate) fn allocate_target_view(&mut self, desc: &TextureDesc) -> Result<Option<u32>> {
        if !desc.is_render_target() {
            return Ok(None);
        }
        let views = match desc.format.is_depth() {
            true => &mut self.depth_views,
            false => &mut self.target_views,
        };
        views.allocate().map(Some)
    }

    pub(crate) fn release_target_view(&mut self, desc: &TextureDesc, index: Option<u32>) {
        if let Some(index) = index {
            match desc.format.is_depth() {
                true => self.depth_views.release(index),
                false => self.target_views.release(index),
            }
        }
    }

    /// Deletes a placed texture. Swap-chain back buffers are refused.
    pub fn delete_texture(&mut self, texture: Handle<Texture>) -> Result<()> {
        if !self.table.textures.get(texture)?.owned {
            return Err(GPUError::NotOwned);
        }
        let record = self.table.textures.remove(texture)?;
        self.backend.destroy_texture(record.raw);
        if let Some(index) = record.shader_resource_index {
            self.resource_views.release(index);
        }
        self.release_target_view(&record.desc, record.target_index);
        self.states.forget(texture);
        if let Some(heap) = record.heap.and_then(|h| self.table.heaps.get_mut(h).ok()) {
            heap.placed -= 1;
        }
        log::debug!("deleted texture {:?}", texture);
        Ok(())
    }

    pub fn texture_desc(&self, texture: Handle<Texture>) -> Result<TextureDesc> {
        Ok(self.table.textures.get(texture)?.desc)
    }

    pub fn texture_shader_resource_index(&self, texture: Handle<Texture>) -> Result<u32> {
        self.table
            .textures
            .get(texture)?
            .shader_resource_index
            .ok_or(GPUError::NoShaderResourceView)
    }

    ////////////////////////////////////////////////////////////////////////////
    // State tracking
    ////////////////////////////////////////////////////////////////////////////

    /// Tracked execution state of a buffer or texture.
    pub fn resource_state(&self, resource: impl Into<TrackedResource>) -> Option<ResourceState> {
        self.states.state(resource)
    }

    /// Starts recording every barrier the tracker emits.
    pub fn enable_barrier_log(&mut self) {
        self.states.enable_log();
    }

    pub fn take_barrier_log(&mut self) -> Vec<Transition> {
        self.states.take_log()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Shaders and pipelines
    ////////////////////////////////////////////////////////////////////////////

    /// Loads a shader from a packed container. `compute_entry_point` names
    /// the compute stage, if the container has one.
    pub fn create_shader(
        &mut self,
        bytes: &[u8],
        compute_entry_point: Option<&str>,
    ) -> Result<Handle<Shader>> {
        let container = ShaderContainer::parse(bytes, compute_entry_point)?;
        self.create_shader_from_container(&container)
    }

    pub fn create_shader_from_container(
        &mut self,
        container: &ShaderContainer,
    ) -> Result<Handle<Shader>> {
        let raw = self.backend.create_shader(container)?;
        let stages = container.stages();
        let handle = self.table.shaders.insert(ShaderRecord { stages, raw })?;
        log::debug!("created shader {:?} with {:?}", handle, stages);
        Ok(handle)
    }

    pub fn delete_shader(&mut self, shader: Handle<Shader>) -> Result<()> {
        let record = self.table.shaders.remove(shader)?;
        self.backend.destroy_shader(record.raw);
        Ok(())
    }

    /// Builds a pipeline for `shader`. Compute shaders ignore `pass`; graphics
    /// pipelines derive their fixed-function state from it.
    pub fn create_pipeline_state(
        &mut self,
        shader: Handle<Shader>,
        pass: &RenderPassDescriptor,
    ) -> Result<Handle<PipelineState>> {
        let desc = self.pipeline_desc(shader, pass)?;
        let shader_record = self.table.shaders.get(shader)?;
        let raw = self.backend.create_pipeline(&shader_record.raw, &desc)?;
        let handle = self
            .table
            .pipelines
            .insert(PipelineRecord { shader, desc, raw })?;
        log::debug!("created {:?} pipeline {:?}", desc.bind_point, handle);
        Ok(handle)
    }

    /// Pipeline description [`Self::create_pipeline_state`] would build.
    pub fn pipeline_desc(
        &self,
        shader: Handle<Shader>,
        pass: &RenderPassDescriptor,
    ) -> Result<PipelineDesc> {
        if self.table.shaders.get(shader)?.stages.is_compute() {
            return Ok(PipelineDesc::compute());
        }

        let color = match pass.color_target {
            Some(t) => Some(self.table.textures.get(t)?.desc),
            None => None,
        };
        let depth = match pass.depth_target {
            Some(t) => Some(self.table.textures.get(t)?.desc),
            None => None,
        };
        let sample_count = color.or(depth).map(|d| d.sample_count).unwrap_or(1);

        Ok(PipelineDesc::derive(
            pass,
            color.map(|d| d.format),
            depth.map(|d| d.format),
            sample_count,
        ))
    }

    pub fn delete_pipeline_state(&mut self, pipeline: Handle<PipelineState>) -> Result<()> {
        let record = self.table.pipelines.remove(pipeline)?;
        self.backend.destroy_pipeline(record.raw);
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Queries
    ////////////////////////////////////////////////////////////////////////////

    pub fn create_query_buffer(&mut self, ty: QueryType, count: u32) -> Result<Handle<QueryBuffer>> {
        let raw = self.backend.create_query_buffer(ty, count)?;
        self.table
            .query_buffers
            .insert(QueryBufferRecord { ty, count, raw })
    }

    pub fn delete_query_buffer(&mut self, query: Handle<QueryBuffer>) -> Result<()> {
        let record = self.table.query_buffers.remove(query)?;
        self.backend.destroy_query_buffer(record.raw);
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Frames
    ////////////////////////////////////////////////////////////////////////////

    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    pub(crate) fn frame_slot(&self) -> usize {
        (self.frame % self.info.frames_in_flight.max(1) as u64) as usize
    }

    /// Moves to the next frame. Command lists reset afterwards record into
    /// the next allocator slot of their queue.
    pub fn advance_frame(&mut self) {
        self.frame += 1;
    }

    /// Blocks until every queue is idle.
    pub fn wait_idle(&mut self) -> Result<()> {
        self.backend.wait_idle()
    }
}

impl<B: Backend> Drop for Context<B> {
    fn drop(&mut self) {
        if let Err(err) = self.backend.wait_idle() {
            log::error!("failed to idle device during teardown: {}", err);
        }

        for handle in self.table.swap_chains.handles() {
            let _ = self.delete_swap_chain(handle);
        }
        for handle in self.table.queues.handles() {
            let _ = self.delete_command_queue(handle);
        }
        for record in self.table.pipelines.drain() {
            self.backend.destroy_pipeline(record.raw);
        }
        for record in self.table.shaders.drain() {
            self.backend.destroy_shader(record.raw);
        }
        for record in self.table.query_buffers.drain() {
            self.backend.destroy_query_buffer(record.raw);
        }
        for handle in self.table.buffers.handles() {
            let _ = self.delete_buffer(handle);
        }
        for handle in self.table.textures.handles() {
            let _ = self.delete_texture(handle);
        }
        for record in self.table.heaps.drain() {
            self.backend.destroy_heap(record.raw);
        }
    }
}
