use thiserror::Error;

use super::structs::{HeapKind, ListState, ResourceState};

#[derive(Debug, Error)]
pub enum GPUError {
    #[error("invalid or stale {0} handle")]
    InvalidHandle(&'static str),
    #[error("ran out of {0} slots")]
    SlotError(&'static str),
    #[error("placement of {size} bytes at offset {offset} exceeds heap of {heap_size} bytes")]
    HeapOverflow {
        offset: u64,
        size: u64,
        heap_size: u64,
    },
    #[error("offset {offset} violates the {alignment}-byte placement alignment")]
    MisalignedPlacement { offset: u64, alignment: u64 },
    #[error("heap still holds {0} placed resources")]
    HeapInUse(usize),
    #[error("{0:?} heap resources are not CPU mappable")]
    NotMappable(HeapKind),
    #[error("malformed shader container: {0}")]
    MalformedShaderContainer(String),
    #[error("shader is missing its {0} stage")]
    MissingShaderStage(&'static str),
    #[error("command list is {actual:?}, expected {expected:?}")]
    InvalidCommandListState {
        expected: ListState,
        actual: ListState,
    },
    #[error("command list does not belong to the target queue")]
    QueueMismatch,
    #[error("no render pass is open on the command list")]
    NoActiveRenderPass,
    #[error("a render pass is still open on the command list")]
    RenderPassOpen,
    #[error("no pipeline state is bound on the command list")]
    NoPipelineBound,
    #[error("texture was not created with the render-target usage")]
    NotRenderTarget,
    #[error("texture has no shader resource view")]
    NoShaderResourceView,
    #[error("swap-chain back buffers are released with their swap chain")]
    NotOwned,
    #[error("range of {size} bytes at offset {offset} exceeds a resource of {len} bytes")]
    OutOfBounds { offset: u64, size: u64, len: u64 },
    #[error("fence value {value} was never submitted (last signaled {last_signaled})")]
    FenceNotSubmitted { value: u64, last_signaled: u64 },
    #[error("resource is in state {actual:?}, expected {expected:?}")]
    InvalidResourceState {
        expected: ResourceState,
        actual: ResourceState,
    },
    #[error("texture description is invalid: {0}")]
    InvalidTextureDesc(&'static str),
    #[error("debug marker ended without a matching begin")]
    UnbalancedDebugMarker,
    #[error("could not allocate {0} bytes of heap memory")]
    OutOfMemory(u64),
    #[error("{1} is not a valid {0}")]
    InvalidEnum(&'static str, u32),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("window service error: {0}")]
    Window(String),
    #[cfg(feature = "hikari-vulkan")]
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),
    #[cfg(feature = "hikari-vulkan")]
    #[error("failed to load the Vulkan library: {0}")]
    VulkanLoading(#[from] ash::LoadingError),
    #[cfg(all(windows, feature = "hikari-dx12"))]
    #[error("Direct3D error: {0}")]
    Direct3D(#[from] windows::core::Error),
}

impl GPUError {
    /// Precondition violations indicate a caller bug or corrupted data rather
    /// than a backend or driver failure.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            GPUError::InvalidHandle(_)
                | GPUError::HeapOverflow { .. }
                | GPUError::MisalignedPlacement { .. }
                | GPUError::HeapInUse(_)
                | GPUError::NotMappable(_)
                | GPUError::MalformedShaderContainer(_)
                | GPUError::MissingShaderStage(_)
                | GPUError::InvalidCommandListState { .. }
                | GPUError::QueueMismatch
                | GPUError::NoActiveRenderPass
                | GPUError::RenderPassOpen
                | GPUError::NoPipelineBound
                | GPUError::NotRenderTarget
                | GPUError::NoShaderResourceView
                | GPUError::NotOwned
                | GPUError::OutOfBounds { .. }
                | GPUError::FenceNotSubmitted { .. }
                | GPUError::InvalidResourceState { .. }
                | GPUError::InvalidEnum(..)
                | GPUError::InvalidTextureDesc(_)
                | GPUError::UnbalancedDebugMarker
        )
    }
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;
