use std::cell::Cell;

use ash::vk;
use vk_mem::Alloc;

use super::conversions::{aspect_mask, image_create_info, lib_to_vk_format};
use super::VulkanDevice;
use crate::gpu::error::{GPUError, Result};
use crate::gpu::structs::{AllocationInfo, Format, HeapKind, TextureDesc};
use crate::utils::Handle;

/// Usage every placed buffer is created with, so any buffer may be copied,
/// bound bindlessly or used for indirect arguments.
pub(super) const BUFFER_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::TRANSFER_SRC.as_raw()
        | vk::BufferUsageFlags::TRANSFER_DST.as_raw()
        | vk::BufferUsageFlags::STORAGE_BUFFER.as_raw()
        | vk::BufferUsageFlags::INDIRECT_BUFFER.as_raw(),
);

/// One dedicated device memory block.
pub(super) struct HeapMemory {
    pub(super) allocation: vk_mem::Allocation,
}

pub struct VulkanHeap {
    pub(super) memory: Handle<HeapMemory>,
    pub(super) kind: HeapKind,
    pub(super) size: u64,
}

#[derive(Debug)]
pub struct VulkanBuffer {
    pub(super) raw: vk::Buffer,
    pub(super) memory: Handle<HeapMemory>,
    pub(super) offset: u64,
    pub(super) size: u64,
}

#[derive(Debug)]
pub struct VulkanTexture {
    pub(super) image: vk::Image,
    pub(super) view: vk::ImageView,
    pub(super) format: Format,
    pub(super) extent: vk::Extent2D,
    /// Layout the image is left in by the last recorded barrier.
    pub(super) layout: Cell<vk::ImageLayout>,
    /// Swap-chain images belong to the swap chain.
    pub(super) owned: bool,
}

impl VulkanTexture {
    pub(super) fn subresources(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: aspect_mask(self.format),
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }
}

impl VulkanDevice {
    /// Resources are shared by every queue family in use, so a copy queue can
    /// fill what a graphics queue later reads.
    fn buffer_info(&self, size: u64) -> vk::BufferCreateInfo {
        let mut info = vk::BufferCreateInfo::builder()
            .size(size.max(1))
            .usage(BUFFER_USAGE)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        if self.family_indices.len() > 1 {
            info = info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&self.family_indices);
        }
        info.build()
    }

    fn image_info(&self, desc: &TextureDesc) -> vk::ImageCreateInfo {
        let mut info = image_create_info(desc);
        if self.family_indices.len() > 1 {
            info.sharing_mode = vk::SharingMode::CONCURRENT;
            info.queue_family_index_count = self.family_indices.len() as u32;
            info.p_queue_family_indices = self.family_indices.as_ptr();
        }
        info
    }

    pub(super) fn query_buffer_requirements(&self, size: u64) -> vk::MemoryRequirements {
        let info = self.buffer_info(size);
        let query = vk::DeviceBufferMemoryRequirements::builder()
            .create_info(&info)
            .build();
        let mut out = vk::MemoryRequirements2::default();
        unsafe {
            self.device
                .get_device_buffer_memory_requirements(&query, &mut out)
        };
        out.memory_requirements
    }

    pub(super) fn query_image_requirements(&self, desc: &TextureDesc) -> vk::MemoryRequirements {
        let info = self.image_info(desc);
        let query = vk::DeviceImageMemoryRequirements::builder()
            .create_info(&info)
            .build();
        let mut out = vk::MemoryRequirements2::default();
        unsafe {
            self.device
                .get_device_image_memory_requirements(&query, &mut out)
        };
        out.memory_requirements
    }

    pub(super) fn placement_info(&self, requirements: vk::MemoryRequirements) -> AllocationInfo {
        AllocationInfo {
            size: requirements.size,
            alignment: requirements.alignment.max(1),
        }
    }

    pub(super) fn allocate_heap(&mut self, kind: HeapKind, size: u64) -> Result<VulkanHeap> {
        let (required, preferred) = match kind {
            HeapKind::Upload => (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::empty(),
            ),
            HeapKind::ReadBack => (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::HOST_CACHED,
            ),
            HeapKind::Gpu => (
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::empty(),
            ),
        };
        let memory_type_bits = match kind {
            HeapKind::Gpu if self.type_bits.buffer & self.type_bits.image != 0 => {
                self.type_bits.buffer & self.type_bits.image
            }
            _ => self.type_bits.buffer,
        };

        let requirements = vk::MemoryRequirements {
            size,
            alignment: self.type_bits.alignment,
            memory_type_bits,
        };
        let create_info = vk_mem::AllocationCreateInfo {
            flags: vk_mem::AllocationCreateFlags::DEDICATED_MEMORY,
            usage: vk_mem::MemoryUsage::Unknown,
            required_flags: required,
            preferred_flags: preferred,
            ..Default::default()
        };

        let allocation = unsafe { self.allocator.allocate_memory(&requirements, &create_info)? };
        let memory = match self.heaps.insert(HeapMemory { allocation }) {
            Some(memory) => memory,
            None => {
                log::error!("vulkan heap table is full");
                return Err(GPUError::SlotError("vulkan heap"));
            }
        };
        Ok(VulkanHeap { memory, kind, size })
    }

    pub(super) fn free_heap(&mut self, heap: VulkanHeap) {
        if let Some(mut memory) = self.heaps.release(heap.memory) {
            unsafe { self.allocator.free_memory(&mut memory.allocation) };
        }
    }

    pub(super) fn place_buffer(&mut self, heap: &VulkanHeap, offset: u64, size: u64) -> Result<VulkanBuffer> {
        let info = self.buffer_info(size);
        let raw = unsafe { self.device.create_buffer(&info, None)? };

        let allocator = &self.allocator;
        let bound = match self.heaps.get_mut_ref(heap.memory) {
            Some(memory) => unsafe {
                allocator.bind_buffer_memory2(&mut memory.allocation, offset, raw, std::ptr::null())
            },
            None => Err(vk::Result::ERROR_UNKNOWN),
        };
        if let Err(err) = bound {
            unsafe { self.device.destroy_buffer(raw, None) };
            return Err(err.into());
        }

        Ok(VulkanBuffer {
            raw,
            memory: heap.memory,
            offset,
            size,
        })
    }

    pub(super) fn map(&mut self, buffer: &VulkanBuffer) -> Result<*mut u8> {
        let allocator = &self.allocator;
        let allocation = self
            .heaps
            .get_mut_ref(buffer.memory)
            .map(|m| &mut m.allocation)
            .ok_or(GPUError::InvalidHandle("vulkan heap"))?;
        let base = unsafe { allocator.map_memory(allocation)? };
        Ok(unsafe { base.add(buffer.offset as usize) })
    }

    pub(super) fn unmap(&mut self, buffer: &VulkanBuffer) {
        let allocator = &self.allocator;
        if let Some(memory) = self.heaps.get_mut_ref(buffer.memory) {
            unsafe { allocator.unmap_memory(&mut memory.allocation) };
        }
    }

    pub(super) fn place_texture(
        &mut self,
        heap: &VulkanHeap,
        offset: u64,
        desc: &TextureDesc,
    ) -> Result<VulkanTexture> {
        let info = self.image_info(desc);
        let image = unsafe { self.device.create_image(&info, None)? };

        let allocator = &self.allocator;
        let bound = match self.heaps.get_mut_ref(heap.memory) {
            Some(memory) => unsafe {
                allocator.bind_image_memory2(&mut memory.allocation, offset, image, std::ptr::null())
            },
            None => Err(vk::Result::ERROR_UNKNOWN),
        };
        if let Err(err) = bound {
            unsafe { self.device.destroy_image(image, None) };
            return Err(err.into());
        }

        let view = match self.create_view(image, desc) {
            Ok(view) => view,
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(err);
            }
        };

        Ok(VulkanTexture {
            image,
            view,
            format: desc.format,
            extent: vk::Extent2D {
                width: desc.width.max(1),
                height: desc.height.max(1),
            },
            layout: Cell::new(vk::ImageLayout::UNDEFINED),
            owned: true,
        })
    }

    pub(super) fn create_view(&self, image: vk::Image, desc: &TextureDesc) -> Result<vk::ImageView> {
        let view_type = match desc.face_count {
            6 => vk::ImageViewType::CUBE,
            1 | 0 => vk::ImageViewType::TYPE_2D,
            _ => vk::ImageViewType::TYPE_2D_ARRAY,
        };
        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(view_type)
            .format(lib_to_vk_format(desc.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(desc.format) & !vk::ImageAspectFlags::STENCIL,
                base_mip_level: 0,
                level_count: vk::REMAINING_MIP_LEVELS,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            })
            .build();
        Ok(unsafe { self.device.create_image_view(&info, None)? })
    }

    pub(super) fn release_texture(&mut self, texture: VulkanTexture) {
        unsafe {
            self.device.destroy_image_view(texture.view, None);
            if texture.owned {
                self.device.destroy_image(texture.image, None);
            }
        }
    }
}

/// Memory type bits placed buffers and optimal-tiling images accept, probed
/// once at device creation.
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct MemoryTypeBits {
    pub buffer: u32,
    pub image: u32,
    /// Largest placement alignment any probed resource asked for.
    pub alignment: u64,
}

impl MemoryTypeBits {
    pub(super) fn probe(device: &VulkanDevice) -> Self {
        let buffer = device.query_buffer_requirements(65536);
        let image = device.query_image_requirements(&TextureDesc {
            usage: crate::gpu::structs::TextureUsage::SHADER_READ
                | crate::gpu::structs::TextureUsage::RENDER_TARGET,
            width: 64,
            height: 64,
            ..Default::default()
        });
        Self {
            buffer: buffer.memory_type_bits,
            image: image.memory_type_bits,
            alignment: buffer.alignment.max(image.alignment),
        }
    }
}
