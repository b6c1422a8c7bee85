use std::time::Duration;

use crate::window::NativeWindow;

pub mod allocation;
pub mod commands;
pub mod context;
pub mod display;
pub mod error;
pub mod render_pass;
pub mod shader;
pub mod state;
pub mod structs;
pub mod table;

pub mod null;
#[cfg(feature = "hikari-vulkan")]
pub mod vulkan;
#[cfg(all(windows, feature = "hikari-dx12"))]
pub mod d3d12;

pub use context::Context;
pub use error::{GPUError, Result};
pub use render_pass::PipelineDesc;
pub use shader::{ShaderContainer, ShaderStage, ShaderStages};
pub use state::{ResourceStateTracker, TrackedResource, Transition};
pub use structs::*;

/// Color attachment handed to [`Backend::cmd_begin_render_pass`].
pub struct ColorAttachment<'a, T> {
    pub texture: &'a T,
    pub desc: &'a TextureDesc,
    /// Render-target view slot.
    pub view: u32,
    pub clear: Option<[f32; 4]>,
}

pub struct DepthAttachment<'a, T> {
    pub texture: &'a T,
    pub desc: &'a TextureDesc,
    /// Depth-stencil view slot.
    pub view: u32,
    pub clear: Option<f32>,
    pub read_only: bool,
}

pub struct RenderTargets<'a, T> {
    pub color: Option<ColorAttachment<'a, T>>,
    pub depth: Option<DepthAttachment<'a, T>>,
    pub width: u32,
    pub height: u32,
}

/// Resource a barrier applies to.
pub enum BarrierTarget<'a, B: Backend + ?Sized> {
    Buffer(&'a B::Buffer),
    Texture(&'a B::Texture, &'a TextureDesc),
}

/// Defines the interface that rendering backends must implement.
///
/// A backend wraps one native graphics API. It only creates, records and
/// submits native objects; handle bookkeeping, state tracking, placement
/// validation and the command-list state machine live in [`Context`], which
/// is shared by every backend.
///
/// # Examples
/// ```ignore
/// use hikari::gpu::{null::NullDevice, Context, ContextInfo};
/// let device = NullDevice::new(&ContextInfo::default());
/// let mut ctx = Context::new(device, ContextInfo::default());
/// ```
pub trait Backend {
    type Heap;
    type Buffer;
    type Texture;
    type Shader;
    type Pipeline;
    type QueryBuffer;
    type Queue;
    type CommandList;
    type SwapChain;
    /// Copyable reference to a queue's fence, used for cross-queue waits.
    type Fence: Clone;

    fn kind(&self) -> BackendKind;
    fn adapter_name(&self) -> String;

    /// Number of shader-visible resource descriptors.
    fn resource_descriptor_capacity(&self) -> u32 {
        4096
    }

    // Memory

    fn buffer_allocation_info(&self, size: u64) -> Result<AllocationInfo>;
    fn texture_allocation_info(&self, desc: &TextureDesc) -> Result<AllocationInfo>;
    fn create_heap(&mut self, kind: HeapKind, size: u64) -> Result<Self::Heap>;
    fn destroy_heap(&mut self, heap: Self::Heap);
    fn create_buffer(
        &mut self,
        heap: &Self::Heap,
        kind: HeapKind,
        offset: u64,
        size: u64,
        shader_resource_index: u32,
    ) -> Result<Self::Buffer>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);
    fn map_buffer(&mut self, heap: &Self::Heap, buffer: &mut Self::Buffer) -> Result<*mut u8>;
    fn unmap_buffer(&mut self, heap: &Self::Heap, buffer: &mut Self::Buffer);
    /// `shader_resource_index` is set for textures with a shader usage and
    /// `target_view` (render-target or depth view slot) for render targets.
    fn create_texture(
        &mut self,
        heap: &Self::Heap,
        offset: u64,
        desc: &TextureDesc,
        shader_resource_index: Option<u32>,
        target_view: Option<u32>,
    ) -> Result<Self::Texture>;
    fn destroy_texture(&mut self, texture: Self::Texture);

    // Shaders and pipelines

    fn create_shader(&mut self, container: &ShaderContainer) -> Result<Self::Shader>;
    fn destroy_shader(&mut self, shader: Self::Shader);
    fn create_pipeline(&mut self, shader: &Self::Shader, desc: &PipelineDesc)
        -> Result<Self::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);
    fn create_query_buffer(&mut self, ty: QueryType, count: u32) -> Result<Self::QueryBuffer>;
    fn destroy_query_buffer(&mut self, query: Self::QueryBuffer);

    // Queues and command lists

    fn create_queue(&mut self, ty: QueueType, frames_in_flight: usize) -> Result<Self::Queue>;
    fn destroy_queue(&mut self, queue: Self::Queue);
    fn queue_fence(&self, queue: &Self::Queue) -> Self::Fence;
    /// Ticks per second of timestamps written on `queue`.
    fn timestamp_frequency(&self, queue: &Self::Queue) -> Result<u64>;
    /// Returns the allocator of `frame_slot` to its initial state. Every list
    /// recorded from it must have finished executing.
    fn reset_allocator(&mut self, queue: &mut Self::Queue, frame_slot: usize) -> Result<()>;
    /// Creates a list recording from the allocator of `frame_slot`, open.
    fn create_command_list(
        &mut self,
        queue: &mut Self::Queue,
        frame_slot: usize,
    ) -> Result<Self::CommandList>;
    fn reset_command_list(
        &mut self,
        queue: &mut Self::Queue,
        list: &mut Self::CommandList,
        frame_slot: usize,
    ) -> Result<()>;
    fn close_command_list(&mut self, list: &mut Self::CommandList) -> Result<()>;
    fn destroy_command_list(&mut self, queue: &mut Self::Queue, list: Self::CommandList);
    /// Makes `queue` wait for every `(fence, value)`, runs `lists` in order,
    /// then signals the queue's fence to `signal_value`.
    fn execute_command_lists(
        &mut self,
        queue: &mut Self::Queue,
        lists: &[&Self::CommandList],
        waits: &[(Self::Fence, u64)],
        signal_value: u64,
    ) -> Result<()>;
    fn completed_value(&mut self, fence: &Self::Fence) -> Result<u64>;
    fn wait_on_cpu(&mut self, fence: &Self::Fence, value: u64, timeout: Option<Duration>)
        -> Result<()>;

    // Recording

    fn cmd_transition(
        &mut self,
        list: &mut Self::CommandList,
        target: BarrierTarget<'_, Self>,
        before: ResourceState,
        after: ResourceState,
    );
    fn cmd_begin_render_pass(
        &mut self,
        list: &mut Self::CommandList,
        targets: &RenderTargets<'_, Self::Texture>,
    );
    fn cmd_end_render_pass(&mut self, list: &mut Self::CommandList);
    fn cmd_set_pipeline(&mut self, list: &mut Self::CommandList, pipeline: &Self::Pipeline);
    fn cmd_set_resource_heap(&mut self, list: &mut Self::CommandList, pipeline: &Self::Pipeline);
    fn cmd_set_constants(
        &mut self,
        list: &mut Self::CommandList,
        pipeline: &Self::Pipeline,
        values: &[u32],
    );
    fn cmd_dispatch_mesh(&mut self, list: &mut Self::CommandList, x: u32, y: u32, z: u32);
    fn cmd_dispatch(&mut self, list: &mut Self::CommandList, x: u32, y: u32, z: u32);
    fn cmd_draw(&mut self, list: &mut Self::CommandList, vertex_count: u32, instance_count: u32);
    fn cmd_copy_buffer(
        &mut self,
        list: &mut Self::CommandList,
        src: &Self::Buffer,
        src_offset: u64,
        dst: &Self::Buffer,
        dst_offset: u64,
        size: u64,
    );
    fn cmd_copy_buffer_to_texture(
        &mut self,
        list: &mut Self::CommandList,
        src: &Self::Buffer,
        src_offset: u64,
        dst: &Self::Texture,
        desc: &TextureDesc,
    );
    fn cmd_write_timestamp(
        &mut self,
        list: &mut Self::CommandList,
        query: &Self::QueryBuffer,
        index: u32,
    );
    fn cmd_resolve_queries(
        &mut self,
        list: &mut Self::CommandList,
        query: &Self::QueryBuffer,
        start: u32,
        count: u32,
        dst: &Self::Buffer,
        dst_offset: u64,
    );
    fn cmd_begin_marker(&mut self, list: &mut Self::CommandList, name: &str);
    fn cmd_end_marker(&mut self, list: &mut Self::CommandList);

    // Presentation

    /// Creates a swap chain presenting from `queue`, returning it with its
    /// back buffers.
    fn create_swap_chain(
        &mut self,
        window: &NativeWindow,
        queue: &Self::Queue,
        info: &SwapChainInfo,
        target_views: &[u32],
    ) -> Result<(Self::SwapChain, Vec<Self::Texture>)>;
    /// Replaces the back buffers. The old ones are handed back for release
    /// before the native resize.
    fn resize_swap_chain(
        &mut self,
        swap_chain: &mut Self::SwapChain,
        old_back_buffers: Vec<Self::Texture>,
        info: &SwapChainInfo,
        target_views: &[u32],
    ) -> Result<Vec<Self::Texture>>;
    /// Blocks until the next back buffer may be rendered to and returns its
    /// index.
    fn acquire_next_image(
        &mut self,
        swap_chain: &mut Self::SwapChain,
        timeout: Duration,
    ) -> Result<u32>;
    /// Presents the current image after all prior work on `queue`, then
    /// signals the queue's fence to `signal_value`.
    fn present(
        &mut self,
        swap_chain: &mut Self::SwapChain,
        queue: &mut Self::Queue,
        image_index: u32,
        signal_value: u64,
    ) -> Result<()>;
    fn destroy_swap_chain(&mut self, swap_chain: Self::SwapChain, back_buffers: Vec<Self::Texture>);

    /// Blocks until every queue is idle.
    fn wait_idle(&mut self) -> Result<()>;
}
