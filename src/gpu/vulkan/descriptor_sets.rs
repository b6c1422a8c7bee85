use ash::vk;

use super::memory::{VulkanBuffer, VulkanTexture};
use crate::gpu::error::Result;

pub(super) const BUFFER_BINDING: u32 = 0;
pub(super) const TEXTURE_BINDING: u32 = 1;

/// The shader-visible resource table: one update-after-bind descriptor set
/// with a storage-buffer array and a sampled-image array, both indexed by
/// shader resource index.
#[derive(Debug)]
pub(super) struct BindlessTable {
    pub(super) layout: vk::DescriptorSetLayout,
    pub(super) pool: vk::DescriptorPool,
    pub(super) set: vk::DescriptorSet,
    pub(super) capacity: u32,
}

impl BindlessTable {
    pub(super) fn new(device: &ash::Device, capacity: u32) -> Result<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(BUFFER_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(capacity)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(TEXTURE_BINDING)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(capacity)
                .stage_flags(vk::ShaderStageFlags::ALL)
                .build(),
        ];
        let binding_flags = [vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::PARTIALLY_BOUND; 2];
        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&binding_flags)
            .build();

        let layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder()
                    .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                    .bindings(&bindings)
                    .push_next(&mut flags_info)
                    .build(),
                None,
            )?
        };

        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: capacity,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: capacity,
            },
        ];
        let pool = unsafe {
            device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
                    .max_sets(1)
                    .pool_sizes(&sizes)
                    .build(),
                None,
            )
        };
        let pool = match pool {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(err.into());
            }
        };

        let layouts = [layout];
        let sets = unsafe {
            device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts)
                    .build(),
            )
        };
        let set = match sets {
            Ok(sets) => sets[0],
            Err(err) => {
                unsafe {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_descriptor_set_layout(layout, None);
                }
                return Err(err.into());
            }
        };

        log::debug!("bindless resource table holds {} descriptors per kind", capacity);
        Ok(Self {
            layout,
            pool,
            set,
            capacity,
        })
    }

    pub(super) fn write_buffer(&self, device: &ash::Device, index: u32, buffer: &VulkanBuffer) {
        let infos = [vk::DescriptorBufferInfo {
            buffer: buffer.raw,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(BUFFER_BINDING)
            .dst_array_element(index)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&infos)
            .build();
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    /// Sampled images are read in shader-read layout.
    pub(super) fn write_texture(&self, device: &ash::Device, index: u32, texture: &VulkanTexture) {
        let infos = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: texture.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(TEXTURE_BINDING)
            .dst_array_element(index)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&infos)
            .build();
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    pub(super) fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.layout, None);
        }
        self.pool = vk::DescriptorPool::null();
        self.layout = vk::DescriptorSetLayout::null();
    }
}
