use ash::vk;
use smallvec::SmallVec;

use super::conversions::{state_info, supported_stages, StateInfo};
use super::memory::{VulkanBuffer, VulkanTexture};
use crate::gpu::structs::ResourceState;

/// Collects memory barriers and records them as one dependency.
pub(super) struct BarrierBuilder {
    mesh_shading: bool,
    images: SmallVec<[vk::ImageMemoryBarrier2; 4]>,
    buffers: SmallVec<[vk::BufferMemoryBarrier2; 4]>,
}

impl BarrierBuilder {
    pub fn new(mesh_shading: bool) -> Self {
        Self {
            mesh_shading,
            images: SmallVec::new(),
            buffers: SmallVec::new(),
        }
    }

    fn states(&self, before: ResourceState, after: ResourceState) -> (StateInfo, StateInfo) {
        let mut src = state_info(before);
        let mut dst = state_info(after);
        src.stages = supported_stages(src.stages, self.mesh_shading);
        dst.stages = supported_stages(dst.stages, self.mesh_shading);
        (src, dst)
    }

    pub fn buffer(&mut self, buffer: &VulkanBuffer, before: ResourceState, after: ResourceState) {
        let (src, dst) = self.states(before, after);
        self.buffers.push(vk::BufferMemoryBarrier2 {
            src_stage_mask: src.stages,
            src_access_mask: src.access,
            dst_stage_mask: dst.stages,
            dst_access_mask: dst.access,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            buffer: buffer.raw,
            offset: 0,
            size: vk::WHOLE_SIZE,
            ..Default::default()
        });
    }

    /// The old layout is the one the image was last left in, so the first
    /// transition of a fresh image discards its undefined contents.
    pub fn texture(&mut self, texture: &VulkanTexture, before: ResourceState, after: ResourceState) {
        let (src, dst) = self.states(before, after);
        let old_layout = texture.layout.get();
        if old_layout == dst.layout && src.access == dst.access {
            return;
        }
        self.images.push(vk::ImageMemoryBarrier2 {
            src_stage_mask: src.stages,
            src_access_mask: src.access,
            dst_stage_mask: dst.stages,
            dst_access_mask: dst.access,
            old_layout,
            new_layout: dst.layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: texture.image,
            subresource_range: texture.subresources(),
            ..Default::default()
        });
        texture.layout.set(dst.layout);
    }

    /// Moves a texture into `layout` without knowing its logical state,
    /// waiting on all prior work.
    pub fn texture_to_layout(&mut self, texture: &VulkanTexture, layout: vk::ImageLayout, after: ResourceState) {
        let old_layout = texture.layout.get();
        if old_layout == layout {
            return;
        }
        let (_, dst) = self.states(after, after);
        self.images.push(vk::ImageMemoryBarrier2 {
            src_stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            src_access_mask: vk::AccessFlags2::MEMORY_WRITE,
            dst_stage_mask: dst.stages,
            dst_access_mask: dst.access,
            old_layout,
            new_layout: layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: texture.image,
            subresource_range: texture.subresources(),
            ..Default::default()
        });
        texture.layout.set(layout);
    }

    pub unsafe fn emit(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.images.is_empty() && self.buffers.is_empty() {
            return;
        }
        let deps = vk::DependencyInfo::builder()
            .image_memory_barriers(&self.images)
            .buffer_memory_barriers(&self.buffers)
            .build();
        device.cmd_pipeline_barrier2(cmd, &deps);
        self.images.clear();
        self.buffers.clear();
    }
}
