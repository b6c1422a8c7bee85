use std::time::Duration;

use smallvec::SmallVec;

use super::context::{initial_state, Context};
use super::error::{GPUError, Result};
use super::render_pass::{BindPoint, ColorLoad, RenderPassPlan};
use super::state::{ResourceStateTracker, TrackedResource};
use super::structs::*;
use super::table::*;
use super::{BarrierTarget, Backend, ColorAttachment, DepthAttachment, RenderTargets};
use crate::utils::{Handle, PerFrame};

/// Borrowed view of an open command list and the parts of the context
/// recording into it needs.
struct Recorder<'a, B: Backend> {
    backend: &'a mut B,
    states: &'a mut ResourceStateTracker,
    buffers: &'a ResourcePool<GraphicsBuffer, BufferRecord<B>>,
    textures: &'a ResourcePool<Texture, TextureRecord<B>>,
    pipelines: &'a ResourcePool<PipelineState, PipelineRecord<B>>,
    query_buffers: &'a ResourcePool<QueryBuffer, QueryBufferRecord<B>>,
    list: &'a mut CommandListRecord<B>,
}

impl<'a, B: Backend> Recorder<'a, B> {
    /// Records the barrier moving `resource` into `state`, if it is not
    /// there already. Buffers in upload and read-back heaps keep their
    /// initial state.
    fn transition(&mut self, resource: TrackedResource, state: ResourceState) -> Result<()> {
        let target = match resource {
            TrackedResource::Buffer(handle) => {
                let record = self.buffers.get(handle)?;
                if record.kind.is_cpu_visible() {
                    return Ok(());
                }
                BarrierTarget::Buffer(&record.raw)
            }
            TrackedResource::Texture(handle) => {
                let record = self.textures.get(handle)?;
                BarrierTarget::Texture(&record.raw, &record.desc)
            }
        };

        if let Some(transition) = self.states.request(resource, state) {
            self.backend
                .cmd_transition(&mut self.list.raw, target, transition.before, transition.after);
        }
        Ok(())
    }

    fn bound_pipeline(&self) -> Result<&'a PipelineRecord<B>> {
        let pipeline = self.list.pipeline.ok_or(GPUError::NoPipelineBound)?;
        let pipelines: &'a ResourcePool<PipelineState, PipelineRecord<B>> = self.pipelines;
        pipelines.get(pipeline)
    }

    fn expect_pipeline(&self, bind_point: BindPoint) -> Result<()> {
        if self.bound_pipeline()?.desc.bind_point != bind_point {
            return Err(GPUError::NoPipelineBound);
        }
        if bind_point == BindPoint::Graphics && !self.list.in_render_pass {
            return Err(GPUError::NoActiveRenderPass);
        }
        Ok(())
    }
}

impl<B: Backend> Context<B> {
    ////////////////////////////////////////////////////////////////////////////
    // Queues
    ////////////////////////////////////////////////////////////////////////////

    pub fn create_command_queue(&mut self, ty: QueueType) -> Result<Handle<CommandQueue>> {
        let frames = self.info.frames_in_flight.max(1);
        let raw = self.backend.create_queue(ty, frames)?;
        let handle = self.table.queues.insert(QueueRecord {
            ty,
            allocator_resets: PerFrame::new(frames),
            last_signaled: 0,
            raw,
        })?;
        log::debug!("created {:?} queue {:?}", ty, handle);
        Ok(handle)
    }

    /// Waits for the queue to go idle, then destroys it together with every
    /// command list recorded for it.
    pub fn delete_command_queue(&mut self, queue: Handle<CommandQueue>) -> Result<()> {
        let in_use = self
            .table
            .swap_chains
            .handles()
            .into_iter()
            .filter_map(|h| self.table.swap_chains.get(h).ok())
            .any(|sc| sc.queue == queue);
        if in_use {
            return Err(GPUError::Unsupported("queue still presents a swap chain"));
        }

        let record = self.table.queues.get(queue)?;
        let fence = self.backend.queue_fence(&record.raw);
        self.backend.wait_on_cpu(&fence, record.last_signaled, None)?;

        let mut record = self.table.queues.remove(queue)?;
        for handle in self.table.command_lists.handles() {
            let owned = self
                .table
                .command_lists
                .get(handle)
                .map(|l| l.queue == queue)
                .unwrap_or(false);
            if owned {
                let list = self.table.command_lists.remove(handle)?;
                self.backend.destroy_command_list(&mut record.raw, list.raw);
            }
        }
        self.backend.destroy_queue(record.raw);
        log::debug!("deleted queue {:?}", queue);
        Ok(())
    }

    pub fn command_queue_type(&self, queue: Handle<CommandQueue>) -> Result<QueueType> {
        Ok(self.table.queues.get(queue)?.ty)
    }

    /// Marks the allocator of the current frame slot as used this frame,
    /// resetting it first if it was last used on an earlier frame.
    fn claim_allocator(backend: &mut B, queue: &mut QueueRecord<B>, frame: u64, slot: usize) -> Result<()> {
        let last = *queue.allocator_resets.get(slot);
        if last == Some(frame) {
            return Ok(());
        }
        if last.is_some() {
            backend.reset_allocator(&mut queue.raw, slot)?;
        }
        *queue.allocator_resets.get_mut(slot) = Some(frame);
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Command lists
    ////////////////////////////////////////////////////////////////////////////

    /// Creates an open command list recording for `queue`.
    pub fn create_command_list(&mut self, queue: Handle<CommandQueue>) -> Result<Handle<CommandList>> {
        let slot = self.frame_slot();
        let frame = self.frame;
        let queue_record = self.table.queues.get_mut(queue)?;
        Self::claim_allocator(&mut self.backend, queue_record, frame, slot)?;
        let raw = self.backend.create_command_list(&mut queue_record.raw, slot)?;

        let handle = self.table.command_lists.insert(CommandListRecord {
            queue,
            state: ListState::Open,
            frame_slot: slot,
            render_pass: None,
            in_render_pass: false,
            pipeline: None,
            resource_heap_bound: false,
            marker_depth: 0,
            raw,
        })?;
        log::debug!("created command list {:?} for queue {:?}", handle, queue);
        Ok(handle)
    }

    /// Closes an open list so it can be executed.
    pub fn commit_command_list(&mut self, list: Handle<CommandList>) -> Result<()> {
        let record = self.table.command_lists.get_mut(list)?;
        record.expect_state(ListState::Open)?;
        if record.in_render_pass {
            return Err(GPUError::RenderPassOpen);
        }
        if record.marker_depth != 0 {
            log::warn!(
                "command list {:?} closed with {} open debug markers",
                list,
                record.marker_depth
            );
        }
        self.backend.close_command_list(&mut record.raw)?;
        record.state = ListState::Closed;
        Ok(())
    }

    /// Reopens a closed list on the current frame's allocator. All bindings
    /// recorded on the list are forgotten.
    pub fn reset_command_list(&mut self, list: Handle<CommandList>) -> Result<()> {
        let slot = self.frame_slot();
        let frame = self.frame;
        let record = self.table.command_lists.get_mut(list)?;
        record.expect_state(ListState::Closed)?;

        let queue = self.table.queues.get_mut(record.queue)?;
        Self::claim_allocator(&mut self.backend, queue, frame, slot)?;
        self.backend
            .reset_command_list(&mut queue.raw, &mut record.raw, slot)?;

        record.state = ListState::Open;
        record.frame_slot = slot;
        record.render_pass = None;
        record.in_render_pass = false;
        record.pipeline = None;
        record.resource_heap_bound = false;
        record.marker_depth = 0;
        Ok(())
    }

    pub fn command_list_state(&self, list: Handle<CommandList>) -> Result<ListState> {
        Ok(self.table.command_lists.get(list)?.state)
    }

    pub fn delete_command_list(&mut self, list: Handle<CommandList>) -> Result<()> {
        let record = self.table.command_lists.remove(list)?;
        let queue = self.table.queues.get_mut(record.queue)?;
        self.backend.destroy_command_list(&mut queue.raw, record.raw);
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Submission
    ////////////////////////////////////////////////////////////////////////////

    /// Submits closed lists to `queue`. The queue first waits, on the GPU,
    /// for every fence in `waits`; the returned fence value is reached once
    /// all `lists` have finished.
    pub fn execute_command_lists(
        &mut self,
        queue: Handle<CommandQueue>,
        lists: &[Handle<CommandList>],
        waits: &[FenceValue],
    ) -> Result<FenceValue> {
        let mut raw_lists: SmallVec<[&B::CommandList; 8]> = SmallVec::new();
        for &list in lists {
            let record = self.table.command_lists.get(list)?;
            record.expect_state(ListState::Closed)?;
            if record.queue != queue {
                return Err(GPUError::QueueMismatch);
            }
            raw_lists.push(&record.raw);
        }

        let mut raw_waits: SmallVec<[(B::Fence, u64); 4]> = SmallVec::new();
        for wait in waits {
            // Work on one queue already runs in submission order.
            if wait.queue == queue {
                continue;
            }
            let record = self.table.queues.get(wait.queue)?;
            if wait.value > record.last_signaled {
                return Err(GPUError::FenceNotSubmitted {
                    value: wait.value,
                    last_signaled: record.last_signaled,
                });
            }
            raw_waits.push((self.backend.queue_fence(&record.raw), wait.value));
        }

        let record = self.table.queues.get_mut(queue)?;
        let value = record.pending_fence_value();
        self.backend
            .execute_command_lists(&mut record.raw, &raw_lists, &raw_waits, value)?;
        record.last_signaled = value;

        Ok(FenceValue { queue, value })
    }

    /// Blocks the calling thread until `fence` is reached. Returns at once if
    /// it already has been.
    pub fn wait_for_command_queue_on_cpu(&mut self, fence: FenceValue) -> Result<()> {
        let record = self.table.queues.get(fence.queue)?;
        if fence.value > record.last_signaled {
            return Err(GPUError::FenceNotSubmitted {
                value: fence.value,
                last_signaled: record.last_signaled,
            });
        }
        let raw = self.backend.queue_fence(&record.raw);
        self.backend.wait_on_cpu(&raw, fence.value, None)
    }

    /// Like [`Self::wait_for_command_queue_on_cpu`] but gives up after
    /// `timeout`.
    pub fn wait_for_command_queue_on_cpu_timeout(
        &mut self,
        fence: FenceValue,
        timeout: Duration,
    ) -> Result<()> {
        let record = self.table.queues.get(fence.queue)?;
        let raw = self.backend.queue_fence(&record.raw);
        self.backend.wait_on_cpu(&raw, fence.value, Some(timeout))
    }

    /// Highest fence value the queue has reached. Never blocks.
    pub fn command_queue_completed_value(&mut self, queue: Handle<CommandQueue>) -> Result<u64> {
        let record = self.table.queues.get(queue)?;
        let raw = self.backend.queue_fence(&record.raw);
        self.backend.completed_value(&raw)
    }

    /// Last fence value submitted to the queue.
    pub fn command_queue_last_signaled(&self, queue: Handle<CommandQueue>) -> Result<u64> {
        Ok(self.table.queues.get(queue)?.last_signaled)
    }

    /// Ticks per second of timestamps resolved from queries on `queue`.
    pub fn timestamp_frequency(&self, queue: Handle<CommandQueue>) -> Result<u64> {
        let record = self.table.queues.get(queue)?;
        self.backend.timestamp_frequency(&record.raw)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Recording
    ////////////////////////////////////////////////////////////////////////////

    fn recorder(&mut self, list: Handle<CommandList>) -> Result<Recorder<'_, B>> {
        let Context {
            backend,
            table,
            states,
            ..
        } = self;
        let record = table.command_lists.get_mut(list)?;
        record.expect_state(ListState::Open)?;
        Ok(Recorder {
            backend,
            states,
            buffers: &table.buffers,
            textures: &table.textures,
            pipelines: &table.pipelines,
            query_buffers: &table.query_buffers,
            list: record,
        })
    }

    /// Moves a buffer or texture into `state`, recording one barrier if it
    /// is not already there. Repeating the call is a no-op.
    ///
    /// Buffers in upload and read-back heaps stay in their heap's state for
    /// their whole lifetime; asking for any other state is an error.
    pub fn transition_to_state(
        &mut self,
        list: Handle<CommandList>,
        resource: impl Into<TrackedResource>,
        state: ResourceState,
    ) -> Result<()> {
        let resource = resource.into();
        if let TrackedResource::Buffer(handle) = resource {
            let kind = self.table.buffers.get(handle)?.kind;
            let fixed = initial_state(kind);
            if kind.is_cpu_visible() && state != fixed {
                return Err(GPUError::InvalidResourceState {
                    expected: fixed,
                    actual: state,
                });
            }
        }
        self.recorder(list)?.transition(resource, state)
    }

    /// Transitions the pass targets, then begins rendering into them. Back
    /// buffers are moved back to `Present` by [`Self::end_render_pass`].
    pub fn begin_render_pass(
        &mut self,
        list: Handle<CommandList>,
        pass: &RenderPassDescriptor,
    ) -> Result<()> {
        let mut rec = self.recorder(list)?;
        if rec.list.in_render_pass {
            return Err(GPUError::RenderPassOpen);
        }

        let plan = RenderPassPlan::resolve(pass);
        for (texture, _) in plan.targets() {
            if rec.textures.get(texture)?.target_index.is_none() {
                return Err(GPUError::NotRenderTarget);
            }
        }
        for (texture, state) in plan.targets() {
            rec.transition(texture.into(), state)?;
        }

        let color = match plan.color {
            Some(c) => {
                let texture = rec.textures.get(c.texture)?;
                Some(ColorAttachment {
                    texture: &texture.raw,
                    desc: &texture.desc,
                    view: texture.target_index.unwrap_or_default(),
                    clear: match c.load {
                        ColorLoad::Clear(color) => Some(color),
                        ColorLoad::Load => None,
                    },
                })
            }
            None => None,
        };
        let depth = match plan.depth {
            Some(d) => {
                let texture = rec.textures.get(d.texture)?;
                Some(DepthAttachment {
                    texture: &texture.raw,
                    desc: &texture.desc,
                    view: texture.target_index.unwrap_or_default(),
                    clear: d.clear,
                    read_only: d.read_only,
                })
            }
            None => None,
        };
        let (width, height) = color
            .as_ref()
            .map(|c| (c.desc.width, c.desc.height))
            .or_else(|| depth.as_ref().map(|d| (d.desc.width, d.desc.height)))
            .unwrap_or((0, 0));

        let targets = RenderTargets {
            color,
            depth,
            width,
            height,
        };
        rec.backend.cmd_begin_render_pass(&mut rec.list.raw, &targets);

        rec.list.render_pass = Some(*pass);
        rec.list.in_render_pass = true;
        Ok(())
    }

    pub fn end_render_pass(&mut self, list: Handle<CommandList>) -> Result<()> {
        let mut rec = self.recorder(list)?;
        if !rec.list.in_render_pass {
            return Err(GPUError::NoActiveRenderPass);
        }
        rec.backend.cmd_end_render_pass(&mut rec.list.raw);
        rec.list.in_render_pass = false;

        if let Some(texture) = rec.list.render_pass.and_then(|p| p.color_target) {
            if !rec.textures.get(texture)?.owned {
                rec.transition(texture.into(), ResourceState::Present)?;
            }
        }
        Ok(())
    }

    pub fn set_pipeline_state(
        &mut self,
        list: Handle<CommandList>,
        pipeline: Handle<PipelineState>,
    ) -> Result<()> {
        let rec = self.recorder(list)?;
        let raw = &rec.pipelines.get(pipeline)?.raw;
        rec.backend.cmd_set_pipeline(&mut rec.list.raw, raw);
        if rec.list.resource_heap_bound {
            rec.backend.cmd_set_resource_heap(&mut rec.list.raw, raw);
        }
        rec.list.pipeline = Some(pipeline);
        Ok(())
    }

    /// Binds the shader-visible resource heap. Needs a pipeline bound first;
    /// the binding survives later pipeline changes.
    pub fn set_shader_resource_heap(&mut self, list: Handle<CommandList>) -> Result<()> {
        let rec = self.recorder(list)?;
        let pipeline = rec.bound_pipeline()?;
        rec.backend.cmd_set_resource_heap(&mut rec.list.raw, &pipeline.raw);
        rec.list.resource_heap_bound = true;
        Ok(())
    }

    /// Sets root/push constants of the bound pipeline.
    pub fn set_shader_constants(&mut self, list: Handle<CommandList>, values: &[u32]) -> Result<()> {
        let rec = self.recorder(list)?;
        let pipeline = rec.bound_pipeline()?;
        rec.backend
            .cmd_set_constants(&mut rec.list.raw, &pipeline.raw, values);
        Ok(())
    }

    pub fn dispatch_mesh(&mut self, list: Handle<CommandList>, x: u32, y: u32, z: u32) -> Result<()> {
        let rec = self.recorder(list)?;
        rec.expect_pipeline(BindPoint::Graphics)?;
        rec.backend.cmd_dispatch_mesh(&mut rec.list.raw, x, y, z);
        Ok(())
    }

    pub fn dispatch(&mut self, list: Handle<CommandList>, x: u32, y: u32, z: u32) -> Result<()> {
        let rec = self.recorder(list)?;
        rec.expect_pipeline(BindPoint::Compute)?;
        rec.backend.cmd_dispatch(&mut rec.list.raw, x, y, z);
        Ok(())
    }

    /// Draws without vertex buffers; shaders fetch geometry through the
    /// resource heap.
    pub fn draw(
        &mut self,
        list: Handle<CommandList>,
        vertex_count: u32,
        instance_count: u32,
    ) -> Result<()> {
        let rec = self.recorder(list)?;
        rec.expect_pipeline(BindPoint::Graphics)?;
        rec.backend
            .cmd_draw(&mut rec.list.raw, vertex_count, instance_count);
        Ok(())
    }

    pub fn copy_buffer_region(
        &mut self,
        list: Handle<CommandList>,
        src: Handle<GraphicsBuffer>,
        src_offset: u64,
        dst: Handle<GraphicsBuffer>,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        let mut rec = self.recorder(list)?;
        check_range(src_offset, size, rec.buffers.get(src)?.size)?;
        check_range(dst_offset, size, rec.buffers.get(dst)?.size)?;

        rec.transition(src.into(), ResourceState::CopySource)?;
        rec.transition(dst.into(), ResourceState::CopyDestination)?;

        let src = &rec.buffers.get(src)?.raw;
        let dst = &rec.buffers.get(dst)?.raw;
        rec.backend
            .cmd_copy_buffer(&mut rec.list.raw, src, src_offset, dst, dst_offset, size);
        Ok(())
    }

    /// Copies tightly packed texels (every mip of every face, in order) from
    /// `src` into `dst`.
    pub fn copy_buffer_to_texture(
        &mut self,
        list: Handle<CommandList>,
        src: Handle<GraphicsBuffer>,
        src_offset: u64,
        dst: Handle<Texture>,
    ) -> Result<()> {
        let mut rec = self.recorder(list)?;
        let packed = rec.textures.get(dst)?.desc.packed_size();
        check_range(src_offset, packed, rec.buffers.get(src)?.size)?;

        rec.transition(src.into(), ResourceState::CopySource)?;
        rec.transition(dst.into(), ResourceState::CopyDestination)?;

        let src = &rec.buffers.get(src)?.raw;
        let texture = rec.textures.get(dst)?;
        rec.backend.cmd_copy_buffer_to_texture(
            &mut rec.list.raw,
            src,
            src_offset,
            &texture.raw,
            &texture.desc,
        );
        Ok(())
    }

    fn write_timestamp(
        &mut self,
        list: Handle<CommandList>,
        query: Handle<QueryBuffer>,
        index: u32,
    ) -> Result<()> {
        let rec = self.recorder(list)?;
        let query = rec.query_buffers.get(query)?;
        check_range(index as u64, 1, query.count as u64)?;
        rec.backend
            .cmd_write_timestamp(&mut rec.list.raw, &query.raw, index);
        Ok(())
    }

    /// Writes the start timestamp of a timed region into slot `index`.
    pub fn begin_query(
        &mut self,
        list: Handle<CommandList>,
        query: Handle<QueryBuffer>,
        index: u32,
    ) -> Result<()> {
        self.write_timestamp(list, query, index)
    }

    /// Writes the end timestamp of a timed region into slot `index`.
    pub fn end_query(
        &mut self,
        list: Handle<CommandList>,
        query: Handle<QueryBuffer>,
        index: u32,
    ) -> Result<()> {
        self.write_timestamp(list, query, index)
    }

    /// Copies `count` query results starting at `start` into `dst` as
    /// little-endian `u64` ticks.
    pub fn resolve_query_data(
        &mut self,
        list: Handle<CommandList>,
        query: Handle<QueryBuffer>,
        start: u32,
        count: u32,
        dst: Handle<GraphicsBuffer>,
        dst_offset: u64,
    ) -> Result<()> {
        let mut rec = self.recorder(list)?;
        let query_count = rec.query_buffers.get(query)?.count;
        check_range(start as u64, count as u64, query_count as u64)?;
        check_range(dst_offset, count as u64 * 8, rec.buffers.get(dst)?.size)?;

        rec.transition(dst.into(), ResourceState::CopyDestination)?;

        let query = &rec.query_buffers.get(query)?.raw;
        let dst = &rec.buffers.get(dst)?.raw;
        rec.backend
            .cmd_resolve_queries(&mut rec.list.raw, query, start, count, dst, dst_offset);
        Ok(())
    }

    pub fn begin_debug_marker(&mut self, list: Handle<CommandList>, name: &str) -> Result<()> {
        let rec = self.recorder(list)?;
        rec.backend.cmd_begin_marker(&mut rec.list.raw, name);
        rec.list.marker_depth += 1;
        Ok(())
    }

    pub fn end_debug_marker(&mut self, list: Handle<CommandList>) -> Result<()> {
        let rec = self.recorder(list)?;
        if rec.list.marker_depth == 0 {
            return Err(GPUError::UnbalancedDebugMarker);
        }
        rec.backend.cmd_end_marker(&mut rec.list.raw);
        rec.list.marker_depth -= 1;
        Ok(())
    }

    /// Descriptor of the render pass most recently begun on `list`.
    pub fn last_render_pass(&self, list: Handle<CommandList>) -> Result<Option<RenderPassDescriptor>> {
        Ok(self.table.command_lists.get(list)?.render_pass)
    }
}

fn check_range(offset: u64, size: u64, len: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= len => Ok(()),
        _ => Err(GPUError::OutOfBounds { offset, size, len }),
    }
}
