use std::marker::PhantomData;

use super::error::{GPUError, Result};
use super::render_pass::PipelineDesc;
use super::shader::ShaderStages;
use super::structs::*;
use super::Backend;
use crate::utils::{Handle, PerFrame, Pool};
use crate::window::NativeWindow;

/// An entity kind stored in the [`ResourceTable`].
pub trait TableEntity {
    const NAME: &'static str;
    /// Type tag carried in the upper half of call-table handles.
    const TAG: u32;
}

macro_rules! table_entity {
    ($ty:ty, $name:literal, $tag:literal) => {
        impl TableEntity for $ty {
            const NAME: &'static str = $name;
            const TAG: u32 = $tag;
        }
    };
}

table_entity!(GraphicsHeap, "heap", 1);
table_entity!(GraphicsBuffer, "buffer", 2);
table_entity!(Texture, "texture", 3);
table_entity!(Shader, "shader", 4);
table_entity!(PipelineState, "pipeline state", 5);
table_entity!(QueryBuffer, "query buffer", 6);
table_entity!(CommandQueue, "command queue", 7);
table_entity!(CommandList, "command list", 8);
table_entity!(SwapChain, "swap chain", 9);

/// A [`Pool`] of records of type `R` addressed by handles of the marker type `M`.
pub struct ResourcePool<M, R> {
    pool: Pool<R>,
    _marker: PhantomData<M>,
}

impl<M: TableEntity, R> Default for ResourcePool<M, R> {
    fn default() -> Self {
        Self {
            pool: Pool::default(),
            _marker: PhantomData,
        }
    }
}

impl<M: TableEntity, R> ResourcePool<M, R> {
    pub fn insert(&mut self, record: R) -> Result<Handle<M>> {
        self.pool
            .insert(record)
            .map(Handle::cast)
            .ok_or(GPUError::SlotError(M::NAME))
    }

    pub fn get(&self, handle: Handle<M>) -> Result<&R> {
        self.pool
            .get_ref(handle.cast())
            .ok_or(GPUError::InvalidHandle(M::NAME))
    }

    pub fn get_mut(&mut self, handle: Handle<M>) -> Result<&mut R> {
        self.pool
            .get_mut_ref(handle.cast())
            .ok_or(GPUError::InvalidHandle(M::NAME))
    }

    pub fn remove(&mut self, handle: Handle<M>) -> Result<R> {
        self.pool
            .release(handle.cast())
            .ok_or(GPUError::InvalidHandle(M::NAME))
    }

    pub fn contains(&self, handle: Handle<M>) -> bool {
        self.pool.contains(handle.cast())
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn handles(&self) -> Vec<Handle<M>> {
        self.pool.handles().into_iter().map(Handle::cast).collect()
    }

    pub fn drain(&mut self) -> Vec<R> {
        self.pool.drain()
    }
}

pub struct HeapRecord<B: Backend> {
    pub kind: HeapKind,
    pub size: u64,
    /// Buffers and textures currently placed in this heap.
    pub placed: usize,
    pub raw: B::Heap,
}

pub struct BufferRecord<B: Backend> {
    pub heap: Handle<GraphicsHeap>,
    pub kind: HeapKind,
    pub offset: u64,
    pub size: u64,
    pub shader_resource_index: u32,
    pub cpu_pointer: Option<*mut u8>,
    pub raw: B::Buffer,
}

pub struct TextureRecord<B: Backend> {
    /// `None` for swap-chain back buffers.
    pub heap: Option<Handle<GraphicsHeap>>,
    pub desc: TextureDesc,
    pub shader_resource_index: Option<u32>,
    /// Render-target or depth-stencil view slot.
    pub target_index: Option<u32>,
    pub owned: bool,
    pub raw: B::Texture,
}

pub struct ShaderRecord<B: Backend> {
    pub stages: ShaderStages,
    pub raw: B::Shader,
}

pub struct PipelineRecord<B: Backend> {
    pub shader: Handle<Shader>,
    pub desc: PipelineDesc,
    pub raw: B::Pipeline,
}

pub struct QueryBufferRecord<B: Backend> {
    pub ty: QueryType,
    pub count: u32,
    pub raw: B::QueryBuffer,
}

pub struct QueueRecord<B: Backend> {
    pub ty: QueueType,
    /// Frame on which each allocator slot was last reset.
    pub allocator_resets: PerFrame<Option<u64>>,
    pub last_signaled: u64,
    pub raw: B::Queue,
}

impl<B: Backend> QueueRecord<B> {
    /// Value the next signal on this queue will carry. It becomes
    /// `last_signaled` only once the backend accepted the submission.
    pub fn pending_fence_value(&self) -> u64 {
        self.last_signaled + 1
    }
}

pub struct CommandListRecord<B: Backend> {
    pub queue: Handle<CommandQueue>,
    pub state: ListState,
    pub frame_slot: usize,
    /// Descriptor of the last render pass begun on the list.
    pub render_pass: Option<RenderPassDescriptor>,
    pub in_render_pass: bool,
    pub pipeline: Option<Handle<PipelineState>>,
    pub resource_heap_bound: bool,
    pub marker_depth: u32,
    pub raw: B::CommandList,
}

impl<B: Backend> CommandListRecord<B> {
    pub fn expect_state(&self, expected: ListState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(GPUError::InvalidCommandListState {
                expected,
                actual: self.state,
            })
        }
    }
}

pub struct SwapChainRecord<B: Backend> {
    pub queue: Handle<CommandQueue>,
    pub window: NativeWindow,
    pub info: SwapChainInfo,
    pub back_buffers: Vec<Handle<Texture>>,
    pub current_image: u32,
    pub raw: B::SwapChain,
}

/// Every live object of a context, keyed by typed handle.
pub struct ResourceTable<B: Backend> {
    pub heaps: ResourcePool<GraphicsHeap, HeapRecord<B>>,
    pub buffers: ResourcePool<GraphicsBuffer, BufferRecord<B>>,
    pub textures: ResourcePool<Texture, TextureRecord<B>>,
    pub shaders: ResourcePool<Shader, ShaderRecord<B>>,
    pub pipelines: ResourcePool<PipelineState, PipelineRecord<B>>,
    pub query_buffers: ResourcePool<QueryBuffer, QueryBufferRecord<B>>,
    pub queues: ResourcePool<CommandQueue, QueueRecord<B>>,
    pub command_lists: ResourcePool<CommandList, CommandListRecord<B>>,
    pub swap_chains: ResourcePool<SwapChain, SwapChainRecord<B>>,
}

impl<B: Backend> Default for ResourceTable<B> {
    fn default() -> Self {
        Self {
            heaps: Default::default(),
            buffers: Default::default(),
            textures: Default::default(),
            shaders: Default::default(),
            pipelines: Default::default(),
            query_buffers: Default::default(),
            queues: Default::default(),
            command_lists: Default::default(),
            swap_chains: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_pool_reports_entity_name() {
        let mut pool = ResourcePool::<GraphicsBuffer, u32>::default();
        let handle = pool.insert(3).unwrap();
        assert_eq!(*pool.get(handle).unwrap(), 3);
        assert_eq!(pool.remove(handle).unwrap(), 3);

        match pool.get(handle) {
            Err(GPUError::InvalidHandle(name)) => assert_eq!(name, "buffer"),
            _ => panic!("stale handle resolved"),
        }
    }

    #[test]
    fn tags_are_distinct() {
        let tags = [
            GraphicsHeap::TAG,
            GraphicsBuffer::TAG,
            Texture::TAG,
            Shader::TAG,
            PipelineState::TAG,
            QueryBuffer::TAG,
            CommandQueue::TAG,
            CommandList::TAG,
            SwapChain::TAG,
        ];
        for (i, a) in tags.iter().enumerate() {
            for b in &tags[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
