//! CPU reference device.
//!
//! Heaps are plain byte arrays, queues run their submissions in order on the
//! calling thread and fences advance as work retires. Copies, buffer-to-texture
//! uploads and timestamp queries really move bytes, so readback through a
//! mapped buffer observes what the recorded commands did. Barriers are checked
//! against the state each resource is actually in and mismatches are counted.

use std::cell::Cell;
use std::collections::VecDeque;
use std::time::Duration;

use super::context::initial_state;
use super::error::{GPUError, Result};
use super::render_pass::PipelineDesc;
use super::shader::{ShaderContainer, ShaderStages};
use super::structs::*;
use super::{Backend, BarrierTarget, RenderTargets};
use crate::utils::{align_up, Handle, Pool};
use crate::window::NativeWindow;

/// Placement alignment of every buffer and texture.
pub const PLACEMENT_ALIGNMENT: u64 = 65536;
/// Timestamp ticks per second.
pub const TIMESTAMP_FREQUENCY: u64 = 1_000_000_000;
/// Ticks the clock advances per timestamp write.
const TIMESTAMP_STEP: u64 = 1000;

type Memory = Handle<Box<[u8]>>;

/// Counters describing what the device has executed so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NullStats {
    pub barriers: usize,
    /// Barriers whose before-state did not match the resource's real state.
    pub state_mismatches: usize,
    pub allocator_resets: usize,
    pub submissions: usize,
    pub copies: usize,
    pub render_passes: usize,
    pub draws: usize,
    pub dispatches: usize,
    pub mesh_dispatches: usize,
    pub presents: usize,
}

pub struct NullHeap {
    memory: Memory,
    kind: HeapKind,
}

pub struct NullBuffer {
    memory: Memory,
    offset: u64,
    size: u64,
    state: Cell<ResourceState>,
    mapped: bool,
}

impl NullBuffer {
    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

pub struct NullTexture {
    /// `None` for swap-chain images.
    memory: Option<Memory>,
    offset: u64,
    size: u64,
    state: Cell<ResourceState>,
}

impl NullTexture {
    pub fn state(&self) -> ResourceState {
        self.state.get()
    }
}

pub struct NullShader {
    stages: ShaderStages,
}

pub struct NullPipeline {
    desc: PipelineDesc,
}

pub struct NullQueryBuffer {
    memory: Memory,
    count: u32,
}

pub struct NullQueue {
    timeline: Handle<Timeline>,
}

pub struct NullCommandList {
    commands: Vec<Command>,
}

pub struct NullSwapChain {
    image_count: u32,
    next_image: u32,
}

#[derive(Clone, Debug)]
enum Command {
    Copy {
        src: Memory,
        src_offset: u64,
        dst: Memory,
        dst_offset: u64,
        size: u64,
    },
    Timestamp {
        memory: Memory,
        index: u32,
    },
    Draw,
    Dispatch,
    DispatchMesh,
}

struct Submission {
    waits: Vec<(Handle<Timeline>, u64)>,
    commands: Vec<Command>,
    signal: u64,
}

/// In-order execution timeline of one queue.
pub struct Timeline {
    ty: QueueType,
    pending: VecDeque<Submission>,
    completed: u64,
}

pub struct NullDevice {
    memory: Pool<Box<[u8]>>,
    timelines: Pool<Timeline>,
    clock: u64,
    paused: bool,
    present_stalled: bool,
    stats: NullStats,
}

impl NullDevice {
    pub fn new(info: &ContextInfo) -> Self {
        log::info!(
            "created null device ({} frames in flight)",
            info.frames_in_flight
        );
        Self {
            memory: Pool::default(),
            timelines: Pool::default(),
            clock: 0,
            paused: false,
            present_stalled: false,
            stats: NullStats::default(),
        }
    }

    pub fn stats(&self) -> NullStats {
        self.stats
    }

    /// Holds back all queue execution while `paused`, like a GPU that is
    /// still busy. Resuming runs everything that became ready.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if !paused {
            self.pump();
        }
    }

    /// Makes image acquisition time out, like a presentation engine that
    /// never releases a back buffer.
    pub fn set_present_stalled(&mut self, stalled: bool) {
        self.present_stalled = stalled;
    }

    fn allocate(&mut self, size: u64, what: &'static str) -> Result<Memory> {
        let len = usize::try_from(size).map_err(|_| GPUError::OutOfMemory(size))?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| GPUError::OutOfMemory(size))?;
        bytes.resize(len, 0u8);
        self.memory
            .insert(bytes.into_boxed_slice())
            .ok_or(GPUError::SlotError(what))
    }

    fn completed(&self, timeline: Handle<Timeline>) -> u64 {
        // A deleted queue has retired all of its work.
        self.timelines
            .get_ref(timeline)
            .map(|t| t.completed)
            .unwrap_or(u64::MAX)
    }

    fn enqueue(&mut self, timeline: Handle<Timeline>, submission: Submission) -> Result<()> {
        self.timelines
            .get_mut_ref(timeline)
            .ok_or(GPUError::InvalidHandle("null queue"))?
            .pending
            .push_back(submission);
        self.pump();
        Ok(())
    }

    /// Retires every submission whose waits are satisfied until no queue can
    /// make progress.
    fn pump(&mut self) {
        if self.paused {
            return;
        }
        loop {
            let mut progressed = false;
            for timeline in self.timelines.handles() {
                while let Some(submission) = self.pop_ready(timeline) {
                    for command in &submission.commands {
                        self.run(command);
                    }
                    if let Some(t) = self.timelines.get_mut_ref(timeline) {
                        t.completed = submission.signal;
                    }
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn pop_ready(&mut self, timeline: Handle<Timeline>) -> Option<Submission> {
        let ready = self
            .timelines
            .get_ref(timeline)?
            .pending
            .front()?
            .waits
            .iter()
            .all(|&(other, value)| self.completed(other) >= value);
        if !ready {
            return None;
        }
        self.timelines.get_mut_ref(timeline)?.pending.pop_front()
    }

    fn run(&mut self, command: &Command) {
        match *command {
            Command::Copy {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let (start, end) = (src_offset as usize, (src_offset + size) as usize);
                let bytes = match self.memory.get_ref(src).and_then(|m| m.get(start..end)) {
                    Some(bytes) => bytes.to_vec(),
                    None => {
                        log::error!("null device: copy source range {}..{} is invalid", start, end);
                        return;
                    }
                };
                let (start, end) = (dst_offset as usize, dst_offset as usize + bytes.len());
                match self.memory.get_mut_ref(dst).and_then(|m| m.get_mut(start..end)) {
                    Some(target) => target.copy_from_slice(&bytes),
                    None => {
                        log::error!("null device: copy destination range {}..{} is invalid", start, end)
                    }
                }
                self.stats.copies += 1;
            }
            Command::Timestamp { memory, index } => {
                self.clock += TIMESTAMP_STEP;
                let start = index as usize * 8;
                if let Some(slot) = self
                    .memory
                    .get_mut_ref(memory)
                    .and_then(|m| m.get_mut(start..start + 8))
                {
                    slot.copy_from_slice(&self.clock.to_le_bytes());
                }
            }
            Command::Draw => self.stats.draws += 1,
            Command::Dispatch => self.stats.dispatches += 1,
            Command::DispatchMesh => self.stats.mesh_dispatches += 1,
        }
    }

    fn check_state(&mut self, state: &Cell<ResourceState>, expected: ResourceState) {
        if state.get() != expected {
            self.stats.state_mismatches += 1;
            log::error!(
                "null device: resource is {:?}, barrier expected {:?}",
                state.get(),
                expected
            );
        }
    }
}

impl Backend for NullDevice {
    type Heap = NullHeap;
    type Buffer = NullBuffer;
    type Texture = NullTexture;
    type Shader = NullShader;
    type Pipeline = NullPipeline;
    type QueryBuffer = NullQueryBuffer;
    type Queue = NullQueue;
    type CommandList = NullCommandList;
    type SwapChain = NullSwapChain;
    type Fence = Handle<Timeline>;

    fn kind(&self) -> BackendKind {
        BackendKind::Null
    }

    fn adapter_name(&self) -> String {
        "hikari null device".to_string()
    }

    fn buffer_allocation_info(&self, size: u64) -> Result<AllocationInfo> {
        Ok(AllocationInfo {
            size,
            alignment: PLACEMENT_ALIGNMENT,
        })
    }

    fn texture_allocation_info(&self, desc: &TextureDesc) -> Result<AllocationInfo> {
        let size = desc.packed_size();
        if size > u64::MAX - PLACEMENT_ALIGNMENT {
            return Err(GPUError::InvalidTextureDesc("texture size overflows"));
        }
        Ok(AllocationInfo {
            size: align_up(size, PLACEMENT_ALIGNMENT),
            alignment: PLACEMENT_ALIGNMENT,
        })
    }

    fn create_heap(&mut self, kind: HeapKind, size: u64) -> Result<NullHeap> {
        let memory = self.allocate(size, "null heap")?;
        Ok(NullHeap { memory, kind })
    }

    fn destroy_heap(&mut self, heap: NullHeap) {
        self.memory.release(heap.memory);
    }

    fn create_buffer(
        &mut self,
        heap: &NullHeap,
        kind: HeapKind,
        offset: u64,
        size: u64,
        _shader_resource_index: u32,
    ) -> Result<NullBuffer> {
        Ok(NullBuffer {
            memory: heap.memory,
            offset,
            size,
            state: Cell::new(initial_state(kind)),
            mapped: false,
        })
    }

    fn destroy_buffer(&mut self, _buffer: NullBuffer) {}

    fn map_buffer(&mut self, heap: &NullHeap, buffer: &mut NullBuffer) -> Result<*mut u8> {
        if !heap.kind.is_cpu_visible() {
            return Err(GPUError::NotMappable(heap.kind));
        }
        let memory = self
            .memory
            .get_mut_ref(buffer.memory)
            .ok_or(GPUError::InvalidHandle("null heap"))?;
        let len = memory.len() as u64;
        let range = memory
            .get_mut(buffer.offset as usize..(buffer.offset + buffer.size) as usize)
            .ok_or(GPUError::OutOfBounds {
                offset: buffer.offset,
                size: buffer.size,
                len,
            })?;
        buffer.mapped = true;
        Ok(range.as_mut_ptr())
    }

    fn unmap_buffer(&mut self, _heap: &NullHeap, buffer: &mut NullBuffer) {
        buffer.mapped = false;
    }

    fn create_texture(
        &mut self,
        heap: &NullHeap,
        offset: u64,
        desc: &TextureDesc,
        _shader_resource_index: Option<u32>,
        _target_view: Option<u32>,
    ) -> Result<NullTexture> {
        Ok(NullTexture {
            memory: Some(heap.memory),
            offset,
            size: desc.packed_size(),
            state: Cell::new(initial_state(heap.kind)),
        })
    }

    fn destroy_texture(&mut self, _texture: NullTexture) {}

    fn create_shader(&mut self, container: &ShaderContainer) -> Result<NullShader> {
        Ok(NullShader {
            stages: container.stages(),
        })
    }

    fn destroy_shader(&mut self, _shader: NullShader) {}

    fn create_pipeline(&mut self, shader: &NullShader, desc: &PipelineDesc) -> Result<NullPipeline> {
        let compute = desc.bind_point == super::render_pass::BindPoint::Compute;
        if compute != shader.stages.is_compute() {
            return Err(GPUError::MalformedShaderContainer(
                "pipeline bind point does not match the shader stages".to_string(),
            ));
        }
        Ok(NullPipeline { desc: *desc })
    }

    fn destroy_pipeline(&mut self, _pipeline: NullPipeline) {}

    fn create_query_buffer(&mut self, _ty: QueryType, count: u32) -> Result<NullQueryBuffer> {
        let memory = self.allocate(count as u64 * 8, "null query buffer")?;
        Ok(NullQueryBuffer { memory, count })
    }

    fn destroy_query_buffer(&mut self, query: NullQueryBuffer) {
        self.memory.release(query.memory);
    }

    fn create_queue(&mut self, ty: QueueType, _frames_in_flight: usize) -> Result<NullQueue> {
        let timeline = self
            .timelines
            .insert(Timeline {
                ty,
                pending: VecDeque::new(),
                completed: 0,
            })
            .ok_or(GPUError::SlotError("null queue"))?;
        Ok(NullQueue { timeline })
    }

    fn destroy_queue(&mut self, queue: NullQueue) {
        if let Some(timeline) = self.timelines.release(queue.timeline) {
            if !timeline.pending.is_empty() {
                log::warn!(
                    "null device: {:?} queue destroyed with {} pending submissions",
                    timeline.ty,
                    timeline.pending.len()
                );
            }
        }
    }

    fn queue_fence(&self, queue: &NullQueue) -> Handle<Timeline> {
        queue.timeline
    }

    fn timestamp_frequency(&self, _queue: &NullQueue) -> Result<u64> {
        Ok(TIMESTAMP_FREQUENCY)
    }

    fn reset_allocator(&mut self, _queue: &mut NullQueue, _frame_slot: usize) -> Result<()> {
        self.stats.allocator_resets += 1;
        Ok(())
    }

    fn create_command_list(
        &mut self,
        _queue: &mut NullQueue,
        _frame_slot: usize,
    ) -> Result<NullCommandList> {
        Ok(NullCommandList {
            commands: Vec::new(),
        })
    }

    fn reset_command_list(
        &mut self,
        _queue: &mut NullQueue,
        list: &mut NullCommandList,
        _frame_slot: usize,
    ) -> Result<()> {
        list.commands.clear();
        Ok(())
    }

    fn close_command_list(&mut self, _list: &mut NullCommandList) -> Result<()> {
        Ok(())
    }

    fn destroy_command_list(&mut self, _queue: &mut NullQueue, _list: NullCommandList) {}

    fn execute_command_lists(
        &mut self,
        queue: &mut NullQueue,
        lists: &[&NullCommandList],
        waits: &[(Handle<Timeline>, u64)],
        signal_value: u64,
    ) -> Result<()> {
        let commands = lists
            .iter()
            .flat_map(|list| list.commands.iter().cloned())
            .collect();
        self.stats.submissions += 1;
        self.enqueue(
            queue.timeline,
            Submission {
                waits: waits.to_vec(),
                commands,
                signal: signal_value,
            },
        )
    }

    fn completed_value(&mut self, fence: &Handle<Timeline>) -> Result<u64> {
        self.timelines
            .get_ref(*fence)
            .map(|t| t.completed)
            .ok_or(GPUError::InvalidHandle("null queue"))
    }

    fn wait_on_cpu(
        &mut self,
        fence: &Handle<Timeline>,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.pump();
        if self.completed(*fence) >= value {
            return Ok(());
        }
        // Nothing else runs on this device, so blocked work stays blocked.
        let waited = timeout.map_or(u64::MAX, |t| t.as_millis() as u64);
        log::error!("null device: fence value {} can never be reached", value);
        Err(GPUError::Timeout(waited))
    }

    fn cmd_transition(
        &mut self,
        _list: &mut NullCommandList,
        target: BarrierTarget<'_, Self>,
        before: ResourceState,
        after: ResourceState,
    ) {
        let state = match target {
            BarrierTarget::Buffer(buffer) => &buffer.state,
            BarrierTarget::Texture(texture, _) => &texture.state,
        };
        self.check_state(state, before);
        state.set(after);
        self.stats.barriers += 1;
    }

    fn cmd_begin_render_pass(
        &mut self,
        _list: &mut NullCommandList,
        targets: &RenderTargets<'_, NullTexture>,
    ) {
        if let Some(color) = &targets.color {
            self.check_state(&color.texture.state, ResourceState::RenderTarget);
        }
        if let Some(depth) = &targets.depth {
            let expected = if depth.read_only {
                ResourceState::DepthRead
            } else {
                ResourceState::DepthWrite
            };
            self.check_state(&depth.texture.state, expected);
        }
        self.stats.render_passes += 1;
    }

    fn cmd_end_render_pass(&mut self, _list: &mut NullCommandList) {}

    fn cmd_set_pipeline(&mut self, _list: &mut NullCommandList, pipeline: &NullPipeline) {
        log::trace!("null device: bound {:?} pipeline", pipeline.desc.bind_point);
    }

    fn cmd_set_resource_heap(&mut self, _list: &mut NullCommandList, _pipeline: &NullPipeline) {}

    fn cmd_set_constants(&mut self, _list: &mut NullCommandList, _pipeline: &NullPipeline, _values: &[u32]) {}

    fn cmd_dispatch_mesh(&mut self, list: &mut NullCommandList, _x: u32, _y: u32, _z: u32) {
        list.commands.push(Command::DispatchMesh);
    }

    fn cmd_dispatch(&mut self, list: &mut NullCommandList, _x: u32, _y: u32, _z: u32) {
        list.commands.push(Command::Dispatch);
    }

    fn cmd_draw(&mut self, list: &mut NullCommandList, _vertex_count: u32, _instance_count: u32) {
        list.commands.push(Command::Draw);
    }

    fn cmd_copy_buffer(
        &mut self,
        list: &mut NullCommandList,
        src: &NullBuffer,
        src_offset: u64,
        dst: &NullBuffer,
        dst_offset: u64,
        size: u64,
    ) {
        list.commands.push(Command::Copy {
            src: src.memory,
            src_offset: src.offset + src_offset,
            dst: dst.memory,
            dst_offset: dst.offset + dst_offset,
            size,
        });
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        list: &mut NullCommandList,
        src: &NullBuffer,
        src_offset: u64,
        dst: &NullTexture,
        desc: &TextureDesc,
    ) {
        let Some(memory) = dst.memory else {
            log::error!("null device: swap-chain images cannot be copy targets");
            return;
        };
        list.commands.push(Command::Copy {
            src: src.memory,
            src_offset: src.offset + src_offset,
            dst: memory,
            dst_offset: dst.offset,
            size: desc.packed_size().min(dst.size),
        });
    }

    fn cmd_write_timestamp(&mut self, list: &mut NullCommandList, query: &NullQueryBuffer, index: u32) {
        if index >= query.count {
            log::error!("null device: timestamp index {} out of {}", index, query.count);
            return;
        }
        list.commands.push(Command::Timestamp {
            memory: query.memory,
            index,
        });
    }

    fn cmd_resolve_queries(
        &mut self,
        list: &mut NullCommandList,
        query: &NullQueryBuffer,
        start: u32,
        count: u32,
        dst: &NullBuffer,
        dst_offset: u64,
    ) {
        list.commands.push(Command::Copy {
            src: query.memory,
            src_offset: start as u64 * 8,
            dst: dst.memory,
            dst_offset: dst.offset + dst_offset,
            size: count as u64 * 8,
        });
    }

    fn cmd_begin_marker(&mut self, _list: &mut NullCommandList, name: &str) {
        log::trace!("null device: begin marker {}", name);
    }

    fn cmd_end_marker(&mut self, _list: &mut NullCommandList) {}

    fn create_swap_chain(
        &mut self,
        _window: &NativeWindow,
        _queue: &NullQueue,
        info: &SwapChainInfo,
        _target_views: &[u32],
    ) -> Result<(NullSwapChain, Vec<NullTexture>)> {
        let swap_chain = NullSwapChain {
            image_count: info.buffer_count.max(1),
            next_image: 0,
        };
        let images = back_buffers(info);
        Ok((swap_chain, images))
    }

    fn resize_swap_chain(
        &mut self,
        swap_chain: &mut NullSwapChain,
        _old_back_buffers: Vec<NullTexture>,
        info: &SwapChainInfo,
        _target_views: &[u32],
    ) -> Result<Vec<NullTexture>> {
        swap_chain.next_image = 0;
        Ok(back_buffers(info))
    }

    fn acquire_next_image(&mut self, swap_chain: &mut NullSwapChain, timeout: Duration) -> Result<u32> {
        if self.present_stalled {
            return Err(GPUError::Timeout(timeout.as_millis() as u64));
        }
        Ok(swap_chain.next_image)
    }

    fn present(
        &mut self,
        swap_chain: &mut NullSwapChain,
        queue: &mut NullQueue,
        image_index: u32,
        signal_value: u64,
    ) -> Result<()> {
        swap_chain.next_image = (image_index + 1) % swap_chain.image_count;
        self.stats.presents += 1;
        self.enqueue(
            queue.timeline,
            Submission {
                waits: Vec::new(),
                commands: Vec::new(),
                signal: signal_value,
            },
        )
    }

    fn destroy_swap_chain(&mut self, _swap_chain: NullSwapChain, _back_buffers: Vec<NullTexture>) {}

    fn wait_idle(&mut self) -> Result<()> {
        self.pump();
        let mut stuck = 0;
        self.timelines.for_each_occupied(|t| stuck += t.pending.len());
        if stuck > 0 {
            log::error!("null device: {} submissions can never run", stuck);
            return Err(GPUError::Timeout(0));
        }
        Ok(())
    }
}

fn back_buffers(info: &SwapChainInfo) -> Vec<NullTexture> {
    let desc = TextureDesc {
        format: info.format,
        width: info.width,
        height: info.height,
        ..Default::default()
    };
    (0..info.buffer_count.max(1))
        .map(|_| NullTexture {
            memory: None,
            offset: 0,
            size: desc.packed_size(),
            state: Cell::new(ResourceState::Present),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> NullDevice {
        NullDevice::new(&ContextInfo::default())
    }

    fn submit(device: &mut NullDevice, queue: &mut NullQueue, list: &NullCommandList, waits: &[(Handle<Timeline>, u64)], value: u64) {
        device
            .execute_command_lists(queue, &[list], waits, value)
            .unwrap();
    }

    #[test]
    fn mapping_addresses_the_placed_range() {
        let mut device = device();
        let upload = device.create_heap(HeapKind::Upload, 65536).unwrap();
        let mut whole = device
            .create_buffer(&upload, HeapKind::Upload, 0, 512, 0)
            .unwrap();
        let mut tail = device
            .create_buffer(&upload, HeapKind::Upload, 256, 16, 1)
            .unwrap();

        let ptr = device.map_buffer(&upload, &mut tail).unwrap();
        unsafe { std::ptr::write_bytes(ptr, 0x5A, 16) };

        let base = device.map_buffer(&upload, &mut whole).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(base, 512) };
        assert!(bytes[..256].iter().all(|&b| b == 0));
        assert!(bytes[256..272].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn copies_move_bytes_between_heaps() {
        let mut device = device();
        let upload = device.create_heap(HeapKind::Upload, 65536).unwrap();
        let readback = device.create_heap(HeapKind::ReadBack, 65536).unwrap();
        let mut src = device
            .create_buffer(&upload, HeapKind::Upload, 0, 16, 0)
            .unwrap();
        let mut dst = device
            .create_buffer(&readback, HeapKind::ReadBack, 0, 16, 1)
            .unwrap();

        let ptr = device.map_buffer(&upload, &mut src).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([7u8; 16].as_ptr(), ptr, 16) };

        let mut queue = device.create_queue(QueueType::Copy, 2).unwrap();
        let mut list = device.create_command_list(&mut queue, 0).unwrap();
        device.cmd_copy_buffer(&mut list, &src, 0, &dst, 0, 16);
        device.close_command_list(&mut list).unwrap();
        submit(&mut device, &mut queue, &list, &[], 1);

        let fence = device.queue_fence(&queue);
        device.wait_on_cpu(&fence, 1, None).unwrap();
        let out = device.map_buffer(&readback, &mut dst).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(out, 16) };
        assert_eq!(bytes, &[7u8; 16]);
        assert_eq!(device.stats().copies, 1);
    }

    #[test]
    fn gpu_heaps_cannot_be_mapped() {
        let mut device = device();
        let heap = device.create_heap(HeapKind::Gpu, 65536).unwrap();
        let mut buffer = device.create_buffer(&heap, HeapKind::Gpu, 0, 64, 0).unwrap();
        assert!(matches!(
            device.map_buffer(&heap, &mut buffer),
            Err(GPUError::NotMappable(HeapKind::Gpu))
        ));
        assert!(!buffer.is_mapped());

        let upload = device.create_heap(HeapKind::Upload, 65536).unwrap();
        let mut staging = device.create_buffer(&upload, HeapKind::Upload, 0, 64, 1).unwrap();
        device.map_buffer(&upload, &mut staging).unwrap();
        assert!(staging.is_mapped());
        device.unmap_buffer(&upload, &mut staging);
        assert!(!staging.is_mapped());
    }

    #[test]
    fn waits_hold_work_until_the_other_queue_catches_up() {
        let mut device = device();
        let mut a = device.create_queue(QueueType::Compute, 2).unwrap();
        let mut b = device.create_queue(QueueType::Direct, 2).unwrap();
        let list = NullCommandList {
            commands: vec![Command::Dispatch],
        };

        device.set_paused(true);
        submit(&mut device, &mut b, &list, &[(a.timeline, 1)], 1);
        submit(&mut device, &mut a, &list, &[], 1);
        assert_eq!(device.completed_value(&b.timeline).unwrap(), 0);

        device.set_paused(false);
        assert_eq!(device.completed_value(&a.timeline).unwrap(), 1);
        assert_eq!(device.completed_value(&b.timeline).unwrap(), 1);
        assert_eq!(device.stats().dispatches, 2);
    }

    #[test]
    fn unreachable_fence_times_out() {
        let mut device = device();
        let queue = device.create_queue(QueueType::Direct, 2).unwrap();
        let fence = device.queue_fence(&queue);
        assert!(matches!(
            device.wait_on_cpu(&fence, 3, Some(Duration::from_millis(5))),
            Err(GPUError::Timeout(5))
        ));
    }

    #[test]
    fn barrier_with_wrong_before_state_is_counted() {
        let mut device = device();
        let heap = device.create_heap(HeapKind::Gpu, 65536).unwrap();
        let buffer = device.create_buffer(&heap, HeapKind::Gpu, 0, 64, 0).unwrap();
        let mut queue = device.create_queue(QueueType::Direct, 2).unwrap();
        let mut list = device.create_command_list(&mut queue, 0).unwrap();

        device.cmd_transition(
            &mut list,
            BarrierTarget::Buffer(&buffer),
            ResourceState::CopyDestination,
            ResourceState::ShaderRead,
        );
        device.cmd_transition(
            &mut list,
            BarrierTarget::Buffer(&buffer),
            ResourceState::CopyDestination,
            ResourceState::CopySource,
        );
        assert_eq!(device.stats().barriers, 2);
        assert_eq!(device.stats().state_mismatches, 1);
        assert_eq!(buffer.state(), ResourceState::CopySource);
    }

    #[test]
    fn swap_chain_images_rotate() {
        let mut device = device();
        let mut queue = device.create_queue(QueueType::Direct, 2).unwrap();
        let window = NativeWindow::headless(1);
        let info = SwapChainInfo {
            buffer_count: 3,
            ..Default::default()
        };
        let (mut swap_chain, images) = device
            .create_swap_chain(&window, &queue, &info, &[0, 1, 2])
            .unwrap();
        assert_eq!(images.len(), 3);
        assert!(images.iter().all(|i| i.state() == ResourceState::Present));

        let timeout = Duration::from_millis(10);
        for (value, expected) in [(1, 0), (2, 1), (3, 2), (4, 0)] {
            let index = device.acquire_next_image(&mut swap_chain, timeout).unwrap();
            assert_eq!(index, expected);
            device.present(&mut swap_chain, &mut queue, index, value).unwrap();
        }

        device.set_present_stalled(true);
        assert!(matches!(
            device.acquire_next_image(&mut swap_chain, timeout),
            Err(GPUError::Timeout(10))
        ));
    }
}
