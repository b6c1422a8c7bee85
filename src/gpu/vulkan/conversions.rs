use ash::vk;

use crate::gpu::render_pass::{BlendFactor, BlendOp, BlendState, CompareOp};
use crate::gpu::structs::{Format, PrimitiveTopology, ResourceState, TextureDesc, TextureUsage};

pub(super) fn lib_to_vk_format(format: Format) -> vk::Format {
    match format {
        Format::RGBA8 => vk::Format::R8G8B8A8_SRGB,
        Format::RGBA8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::BGRA8 => vk::Format::B8G8R8A8_SRGB,
        Format::BGRA8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::RGBA16F => vk::Format::R16G16B16A16_SFLOAT,
        Format::RGBA32F => vk::Format::R32G32B32A32_SFLOAT,
        Format::R16F => vk::Format::R16_SFLOAT,
        Format::R32F => vk::Format::R32_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::D32F => vk::Format::D32_SFLOAT,
        Format::D24S8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub(super) fn aspect_mask(format: Format) -> vk::ImageAspectFlags {
    match format {
        Format::D32F => vk::ImageAspectFlags::DEPTH,
        Format::D24S8 => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Aspect a buffer-to-image copy may write. Depth/stencil copies address one
/// aspect at a time.
pub(super) fn copy_aspect(format: Format) -> vk::ImageAspectFlags {
    match format {
        Format::D32F | Format::D24S8 => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub(super) fn image_usage(desc: &TextureDesc) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    if desc.usage.contains(TextureUsage::SHADER_READ) {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if desc.usage.contains(TextureUsage::SHADER_WRITE) {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    if desc.usage.contains(TextureUsage::RENDER_TARGET) {
        usage |= match desc.format.is_depth() {
            true => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            false => vk::ImageUsageFlags::COLOR_ATTACHMENT,
        };
    }
    usage
}

pub(super) fn image_create_info(desc: &TextureDesc) -> vk::ImageCreateInfo {
    let flags = match desc.face_count {
        6 => vk::ImageCreateFlags::CUBE_COMPATIBLE,
        _ => vk::ImageCreateFlags::empty(),
    };
    vk::ImageCreateInfo::builder()
        .flags(flags)
        .image_type(vk::ImageType::TYPE_2D)
        .format(lib_to_vk_format(desc.format))
        .extent(vk::Extent3D {
            width: desc.width.max(1),
            height: desc.height.max(1),
            depth: 1,
        })
        .mip_levels(desc.mip_levels.max(1))
        .array_layers(desc.face_count.max(1))
        .samples(sample_count(desc.sample_count))
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(image_usage(desc))
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .build()
}

pub(super) fn sample_count(count: u32) -> vk::SampleCountFlags {
    match count {
        0 | 1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        _ => vk::SampleCountFlags::TYPE_16,
    }
}

/// Layout, access and stages a resource in `state` is used with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct StateInfo {
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags2,
    pub stages: vk::PipelineStageFlags2,
}

pub(super) fn state_info(state: ResourceState) -> StateInfo {
    use vk::AccessFlags2 as A;
    use vk::PipelineStageFlags2 as S;

    let shaders = S::VERTEX_SHADER
        | S::FRAGMENT_SHADER
        | S::COMPUTE_SHADER
        | S::MESH_SHADER_EXT
        | S::TASK_SHADER_EXT;

    let (layout, access, stages) = match state {
        ResourceState::Common => (
            vk::ImageLayout::GENERAL,
            A::MEMORY_READ | A::MEMORY_WRITE,
            S::ALL_COMMANDS,
        ),
        ResourceState::CopySource => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            A::TRANSFER_READ,
            S::ALL_TRANSFER,
        ),
        ResourceState::CopyDestination => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            A::TRANSFER_WRITE,
            S::ALL_TRANSFER,
        ),
        ResourceState::GenericRead => (
            vk::ImageLayout::GENERAL,
            A::MEMORY_READ,
            S::ALL_COMMANDS,
        ),
        ResourceState::ShaderRead => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            A::SHADER_READ,
            shaders,
        ),
        ResourceState::ShaderWrite => (
            vk::ImageLayout::GENERAL,
            A::SHADER_READ | A::SHADER_WRITE,
            shaders,
        ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::DepthWrite => (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
        ),
        ResourceState::DepthRead => (
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::SHADER_READ,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS | shaders,
        ),
        ResourceState::Present => (
            vk::ImageLayout::PRESENT_SRC_KHR,
            A::NONE,
            S::BOTTOM_OF_PIPE,
        ),
    };
    StateInfo {
        layout,
        access,
        stages,
    }
}

/// Drops shader stages the device cannot run from a stage mask.
pub(super) fn supported_stages(
    stages: vk::PipelineStageFlags2,
    mesh_shading: bool,
) -> vk::PipelineStageFlags2 {
    if mesh_shading {
        stages
    } else {
        stages & !(vk::PipelineStageFlags2::MESH_SHADER_EXT | vk::PipelineStageFlags2::TASK_SHADER_EXT)
    }
}

impl From<CompareOp> for vk::CompareOp {
    fn from(op: CompareOp) -> Self {
        match op {
            CompareOp::Always => vk::CompareOp::ALWAYS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        }
    }
}

impl From<BlendFactor> for vk::BlendFactor {
    fn from(factor: BlendFactor) -> Self {
        match factor {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        }
    }
}

impl From<BlendOp> for vk::BlendOp {
    fn from(op: BlendOp) -> Self {
        match op {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        }
    }
}

impl From<BlendState> for vk::PipelineColorBlendAttachmentState {
    fn from(state: BlendState) -> Self {
        vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(state.enable)
            .src_color_blend_factor(state.src_color.into())
            .dst_color_blend_factor(state.dst_color.into())
            .color_blend_op(state.color_op.into())
            .src_alpha_blend_factor(state.src_alpha.into())
            .dst_alpha_blend_factor(state.dst_alpha.into())
            .alpha_blend_op(state.alpha_op.into())
            .color_write_mask(
                vk::ColorComponentFlags::R
                    | vk::ColorComponentFlags::G
                    | vk::ColorComponentFlags::B
                    | vk::ColorComponentFlags::A,
            )
            .build()
    }
}

impl From<PrimitiveTopology> for vk::PrimitiveTopology {
    fn from(topology: PrimitiveTopology) -> Self {
        match topology {
            PrimitiveTopology::Triangle => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::Line => vk::PrimitiveTopology::LINE_LIST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_use_depth_aspects() {
        assert_eq!(aspect_mask(Format::D32F), vk::ImageAspectFlags::DEPTH);
        assert!(aspect_mask(Format::D24S8).contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(copy_aspect(Format::D24S8), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_mask(Format::RGBA16F), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn render_target_usage_picks_attachment_kind() {
        let color = TextureDesc {
            usage: TextureUsage::RENDER_TARGET,
            ..Default::default()
        };
        let depth = TextureDesc {
            format: Format::D32F,
            ..color
        };
        assert!(image_usage(&color).contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(!image_usage(&color).contains(vk::ImageUsageFlags::SAMPLED));
        assert!(image_usage(&depth).contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
    }

    #[test]
    fn states_map_to_distinct_layouts() {
        assert_eq!(
            state_info(ResourceState::Present).layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            state_info(ResourceState::RenderTarget).layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        let read = state_info(ResourceState::ShaderRead).stages;
        assert!(!supported_stages(read, false).contains(vk::PipelineStageFlags2::MESH_SHADER_EXT));
        assert!(supported_stages(read, true).contains(vk::PipelineStageFlags2::MESH_SHADER_EXT));
    }
}
