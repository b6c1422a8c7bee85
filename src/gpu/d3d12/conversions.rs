use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::gpu::render_pass::{BlendFactor, BlendOp, BlendState, CompareOp, DepthState};
use crate::gpu::structs::{Format, PrimitiveTopology, QueueType, ResourceState, TextureDesc, TextureUsage};

/// Format of views onto a texture.
pub(super) fn view_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::RGBA8 => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::RGBA8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::BGRA8 => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        Format::BGRA8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::RGBA16F => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::RGBA32F => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::R16F => DXGI_FORMAT_R16_FLOAT,
        Format::R32F => DXGI_FORMAT_R32_FLOAT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::D32F => DXGI_FORMAT_D32_FLOAT,
        Format::D24S8 => DXGI_FORMAT_D24_UNORM_S8_UINT,
    }
}

/// Format the resource itself is created with. Shader-readable depth
/// textures are typeless so they can carry both a depth and a shader view.
pub(super) fn resource_format(desc: &TextureDesc) -> DXGI_FORMAT {
    let shader_read = desc.usage.contains(TextureUsage::SHADER_READ);
    match desc.format {
        Format::D32F if shader_read => DXGI_FORMAT_R32_TYPELESS,
        Format::D24S8 if shader_read => DXGI_FORMAT_R24G8_TYPELESS,
        format => view_format(format),
    }
}

pub(super) fn shader_view_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::D32F => DXGI_FORMAT_R32_FLOAT,
        Format::D24S8 => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        format => view_format(format),
    }
}

/// Flip-model swap chains hold UNORM buffers; sRGB is applied by the view.
pub(super) fn swap_chain_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::RGBA8 | Format::RGBA8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::BGRA8 | Format::BGRA8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::RGBA16F => DXGI_FORMAT_R16G16B16A16_FLOAT,
        other => view_format(other),
    }
}

pub(super) fn texture_flags(desc: &TextureDesc) -> D3D12_RESOURCE_FLAGS {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if desc.usage.contains(TextureUsage::RENDER_TARGET) {
        flags |= match desc.format.is_depth() {
            true => D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
            false => D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
        };
    }
    if desc.usage.contains(TextureUsage::SHADER_WRITE) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    flags
}

pub(super) fn texture_desc(desc: &TextureDesc) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        Alignment: 0,
        Width: desc.width as u64,
        Height: desc.height,
        DepthOrArraySize: desc.face_count.max(1) as u16,
        MipLevels: desc.mip_levels.max(1) as u16,
        Format: resource_format(desc),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: desc.sample_count.max(1),
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: texture_flags(desc),
    }
}

pub(super) fn buffer_desc(size: u64, flags: D3D12_RESOURCE_FLAGS) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Alignment: 0,
        Width: size.max(1),
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        Flags: flags,
    }
}

pub(super) fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::CopyDestination => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::ShaderRead => {
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE
                | D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE
        }
        ResourceState::ShaderWrite => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
    }
}

pub(super) fn list_type(ty: QueueType) -> D3D12_COMMAND_LIST_TYPE {
    match ty {
        QueueType::Direct => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueType::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
        QueueType::Copy => D3D12_COMMAND_LIST_TYPE_COPY,
    }
}

fn compare_func(op: CompareOp) -> D3D12_COMPARISON_FUNC {
    match op {
        CompareOp::Always => D3D12_COMPARISON_FUNC_ALWAYS,
        CompareOp::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        CompareOp::Greater => D3D12_COMPARISON_FUNC_GREATER,
        CompareOp::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
    }
}

fn blend_factor(factor: BlendFactor) -> D3D12_BLEND {
    match factor {
        BlendFactor::Zero => D3D12_BLEND_ZERO,
        BlendFactor::One => D3D12_BLEND_ONE,
        BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        BlendFactor::InvSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
    }
}

fn blend_op(op: BlendOp) -> D3D12_BLEND_OP {
    match op {
        BlendOp::Add => D3D12_BLEND_OP_ADD,
        BlendOp::ReverseSubtract => D3D12_BLEND_OP_REV_SUBTRACT,
    }
}

pub(super) fn blend_desc(blend: &BlendState) -> D3D12_BLEND_DESC {
    let mut desc = D3D12_BLEND_DESC::default();
    desc.RenderTarget[0] = D3D12_RENDER_TARGET_BLEND_DESC {
        BlendEnable: blend.enable.into(),
        LogicOpEnable: false.into(),
        SrcBlend: blend_factor(blend.src_color),
        DestBlend: blend_factor(blend.dst_color),
        BlendOp: blend_op(blend.color_op),
        SrcBlendAlpha: blend_factor(blend.src_alpha),
        DestBlendAlpha: blend_factor(blend.dst_alpha),
        BlendOpAlpha: blend_op(blend.alpha_op),
        LogicOp: D3D12_LOGIC_OP_NOOP,
        RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
    };
    desc
}

pub(super) fn depth_stencil_desc(depth: &DepthState) -> D3D12_DEPTH_STENCIL_DESC {
    D3D12_DEPTH_STENCIL_DESC {
        DepthEnable: depth.test_enable.into(),
        DepthWriteMask: match depth.write_enable {
            true => D3D12_DEPTH_WRITE_MASK_ALL,
            false => D3D12_DEPTH_WRITE_MASK_ZERO,
        },
        DepthFunc: compare_func(depth.compare),
        StencilEnable: false.into(),
        ..Default::default()
    }
}

pub(super) fn rasterizer_desc() -> D3D12_RASTERIZER_DESC {
    D3D12_RASTERIZER_DESC {
        FillMode: D3D12_FILL_MODE_SOLID,
        CullMode: D3D12_CULL_MODE_NONE,
        FrontCounterClockwise: false.into(),
        DepthClipEnable: true.into(),
        ..Default::default()
    }
}

pub(super) fn topology(topology: PrimitiveTopology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::Triangle => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::Line => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
    }
}

pub(super) fn topology_type(topology: PrimitiveTopology) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match topology {
        PrimitiveTopology::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        PrimitiveTopology::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
    }
}
