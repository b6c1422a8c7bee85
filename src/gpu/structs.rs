use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::utils::Handle;

#[cfg(feature = "hikari-serde")]
use serde::{Deserialize, Serialize};

// Marker types naming the entities of the resource table. Handles are typed
// by these so a buffer handle can never be passed where a texture is expected.

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsHeap;
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsBuffer;
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Texture;
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Shader;
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PipelineState;
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct QueryBuffer;
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CommandQueue;
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CommandList;
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SwapChain;

#[repr(u32)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub enum BackendKind {
    /// Vulkan on every platform but Windows, Direct3D 12 on Windows.
    #[default]
    Auto = 0,
    Vulkan = 1,
    Direct3D12 = 2,
    /// CPU reference device; executes copies and fences in process.
    Null = 3,
}

impl BackendKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Auto),
            1 => Some(Self::Vulkan),
            2 => Some(Self::Direct3D12),
            3 => Some(Self::Null),
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub enum HeapKind {
    /// CPU-writable, GPU-readable.
    Upload = 0,
    /// GPU-writable, CPU-readable.
    ReadBack = 1,
    /// Device-local memory.
    Gpu = 2,
}

impl HeapKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Upload),
            1 => Some(Self::ReadBack),
            2 => Some(Self::Gpu),
            _ => None,
        }
    }

    pub fn is_cpu_visible(self) -> bool {
        !matches!(self, HeapKind::Gpu)
    }
}

#[repr(C)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct AllocationInfo {
    pub size: u64,
    pub alignment: u64,
}

#[repr(u32)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub enum Format {
    #[default]
    RGBA8 = 0,
    RGBA8Unorm = 1,
    BGRA8 = 2,
    BGRA8Unorm = 3,
    RGBA16F = 4,
    RGBA32F = 5,
    R16F = 6,
    R32F = 7,
    R32Uint = 8,
    D32F = 9,
    D24S8 = 10,
}

impl Format {
    pub fn from_u32(value: u32) -> Option<Self> {
        use Format::*;
        const ALL: [Format; 11] = [
            RGBA8, RGBA8Unorm, BGRA8, BGRA8Unorm, RGBA16F, RGBA32F, R16F, R32F, R32Uint, D32F,
            D24S8,
        ];
        ALL.get(value as usize).copied()
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::R16F => 2,
            Format::RGBA8
            | Format::RGBA8Unorm
            | Format::BGRA8
            | Format::BGRA8Unorm
            | Format::R32F
            | Format::R32Uint
            | Format::D32F
            | Format::D24S8 => 4,
            Format::RGBA16F => 8,
            Format::RGBA32F => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Format::D32F | Format::D24S8)
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SHADER_READ   = 0x1;
        const RENDER_TARGET = 0x2;
        const SHADER_WRITE  = 0x4;
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub struct TextureDesc {
    pub format: Format,
    #[cfg_attr(feature = "hikari-serde", serde(skip))]
    pub usage: TextureUsage,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            format: Format::RGBA8,
            usage: TextureUsage::SHADER_READ,
            width: 1,
            height: 1,
            face_count: 1,
            mip_levels: 1,
            sample_count: 1,
        }
    }
}

impl TextureDesc {
    pub fn is_render_target(&self) -> bool {
        self.usage.contains(TextureUsage::RENDER_TARGET)
    }

    /// Length of the full mip chain down to 1x1.
    pub fn max_mip_levels(&self) -> u32 {
        32 - self.width.max(self.height).max(1).leading_zeros()
    }

    /// Tightly packed byte size of every mip of every face, or `None` when it
    /// does not fit in a `u64`.
    pub fn checked_packed_size(&self) -> Option<u64> {
        let bpp = self.format.bytes_per_pixel() as u64;
        let mut total = 0u64;
        for mip in 0..self.mip_levels.max(1) {
            let w = self.width.checked_shr(mip).unwrap_or(0).max(1) as u64;
            let h = self.height.checked_shr(mip).unwrap_or(0).max(1) as u64;
            total = total.checked_add(w.checked_mul(h)?.checked_mul(bpp)?)?;
        }
        total
            .checked_mul(self.face_count.max(1) as u64)?
            .checked_mul(self.sample_count.max(1) as u64)
    }

    /// Tightly packed byte size of every mip of every face. Saturates for
    /// descriptions [`Self::checked_packed_size`] rejects.
    pub fn packed_size(&self) -> u64 {
        self.checked_packed_size().unwrap_or(u64::MAX)
    }
}

#[repr(u32)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub enum QueueType {
    Direct = 0,
    Compute = 1,
    Copy = 2,
}

impl QueueType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Direct),
            1 => Some(Self::Compute),
            2 => Some(Self::Copy),
            _ => None,
        }
    }
}

/// Execution-visibility mode a resource is in.
#[repr(u32)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub enum ResourceState {
    #[default]
    Common = 0,
    CopySource = 1,
    CopyDestination = 2,
    GenericRead = 3,
    ShaderRead = 4,
    ShaderWrite = 5,
    RenderTarget = 6,
    DepthWrite = 7,
    DepthRead = 8,
    Present = 9,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListState {
    Open,
    Closed,
}

#[repr(u32)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub enum BlendMode {
    #[default]
    Opaque = 0,
    AlphaBlending = 1,
    AddOne = 2,
    AddAlpha = 3,
    SubtractOne = 4,
    SubtractAlpha = 5,
}

impl BlendMode {
    pub fn from_u32(value: u32) -> Option<Self> {
        use BlendMode::*;
        [Opaque, AlphaBlending, AddOne, AddAlpha, SubtractOne, SubtractAlpha]
            .get(value as usize)
            .copied()
    }
}

#[repr(u32)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub enum DepthOperation {
    #[default]
    None = 0,
    ClearWrite = 1,
    Write = 2,
    CompareEqual = 3,
    CompareGreaterEqual = 4,
}

impl DepthOperation {
    pub fn from_u32(value: u32) -> Option<Self> {
        use DepthOperation::*;
        [None, ClearWrite, Write, CompareEqual, CompareGreaterEqual]
            .get(value as usize)
            .copied()
    }
}

#[repr(u32)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub enum PrimitiveTopology {
    #[default]
    Triangle = 0,
    Line = 1,
}

impl PrimitiveTopology {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Triangle),
            1 => Some(Self::Line),
            _ => None,
        }
    }
}

/// Render targets and fixed-function policy for a render pass. Every field
/// is optional; see [`crate::gpu::render_pass`] for how absent fields resolve.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct RenderPassDescriptor {
    pub color_target: Option<Handle<Texture>>,
    pub color_format: Option<Format>,
    pub clear_color: Option<[f32; 4]>,
    pub blend_mode: Option<BlendMode>,
    pub depth_target: Option<Handle<Texture>>,
    pub depth_operation: Option<DepthOperation>,
    pub primitive_topology: Option<PrimitiveTopology>,
}

/// Queue-relative completion marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FenceValue {
    pub queue: Handle<CommandQueue>,
    pub value: u64,
}

#[repr(u32)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryType {
    Timestamp = 0,
}

#[repr(u32)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub enum WindowState {
    #[default]
    Normal = 0,
    Maximized = 1,
    FullScreen = 2,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "hikari-serde", derive(Serialize, Deserialize))]
pub struct ContextInfo {
    pub backend: BackendKind,
    /// Index into the adapter/physical-device list.
    pub device_index: usize,
    /// Number of rotating command allocators per queue.
    pub frames_in_flight: usize,
    pub swap_chain_timeout_ms: u64,
    /// Enables API validation layers. Also switched on by `HIKARI_VALIDATION=1`.
    pub validation: bool,
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            device_index: 0,
            frames_in_flight: 2,
            swap_chain_timeout_ms: 1000,
            validation: false,
        }
    }
}

impl ContextInfo {
    pub fn validation_requested(&self) -> bool {
        self.validation
            || std::env::var("HIKARI_VALIDATION")
                .map(|v| v == "1")
                .unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapChainInfo {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub buffer_count: u32,
}

impl Default for SwapChainInfo {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            format: Format::BGRA8Unorm,
            buffer_count: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_size_covers_mips_and_faces() {
        let desc = TextureDesc {
            format: Format::RGBA8,
            width: 4,
            height: 4,
            mip_levels: 3,
            face_count: 6,
            ..Default::default()
        };
        // 4x4 + 2x2 + 1x1 texels, 4 bytes each, 6 faces.
        assert_eq!(desc.packed_size(), (16 + 4 + 1) * 4 * 6);
        assert_eq!(desc.max_mip_levels(), 3);
    }

    #[test]
    fn packed_size_saturates_instead_of_overflowing() {
        let desc = TextureDesc {
            width: 4,
            height: 4,
            mip_levels: 40,
            ..Default::default()
        };
        assert!(desc.checked_packed_size().is_some());

        let huge = TextureDesc {
            width: u32::MAX,
            height: u32::MAX,
            sample_count: u32::MAX,
            face_count: u32::MAX,
            ..Default::default()
        };
        assert_eq!(huge.checked_packed_size(), None);
        assert_eq!(huge.packed_size(), u64::MAX);
    }

    #[test]
    fn enums_decode_from_raw_values() {
        assert_eq!(Format::from_u32(9), Some(Format::D32F));
        assert_eq!(Format::from_u32(99), None);
        assert_eq!(HeapKind::from_u32(2), Some(HeapKind::Gpu));
        assert_eq!(
            DepthOperation::from_u32(4),
            Some(DepthOperation::CompareGreaterEqual)
        );
        assert_eq!(BlendMode::from_u32(1), Some(BlendMode::AlphaBlending));
        assert!(Format::D24S8.is_depth());
        assert!(!Format::RGBA16F.is_depth());
    }
}
