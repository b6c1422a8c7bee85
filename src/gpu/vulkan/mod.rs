//! Vulkan 1.3 device.
//!
//! Heaps are dedicated `vk-mem` allocations and buffers and images are bound
//! into them at caller-chosen offsets. Each queue signals a timeline
//! semaphore, rendering uses dynamic rendering and every pipeline shares one
//! update-after-bind descriptor set as its shader-visible resource table.

use std::ffi::{c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::os::raw::c_char;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ash::extensions::{ext, khr};
use ash::{vk, Entry};

mod barriers;
mod command_pool;
mod conversions;
mod descriptor_sets;
pub mod device_selector;
mod display;
mod memory;
mod pipelines;

pub use command_pool::{VulkanCommandList, VulkanQueue};
pub use display::VulkanSwapChain;
pub use memory::{VulkanBuffer, VulkanHeap, VulkanTexture};
pub use pipelines::{VulkanPipeline, VulkanShader};

use self::barriers::BarrierBuilder;
use self::conversions::copy_aspect;
use self::descriptor_sets::BindlessTable;
use self::device_selector::{DeviceInfo, QueueFamilies};
use self::memory::{HeapMemory, MemoryTypeBits};
use super::error::{GPUError, Result};
use super::render_pass::PipelineDesc;
use super::shader::ShaderContainer;
use super::structs::*;
use super::{Backend, BarrierTarget, RenderTargets};
use crate::utils::Pool;
use crate::window::NativeWindow;

pub const DEBUG_LAYER_NAMES: [*const c_char; 1] =
    [b"VK_LAYER_KHRONOS_validation\0".as_ptr() as *const c_char];

/// Upper bound on the shader-visible descriptors of each kind.
const MAX_BINDLESS_DESCRIPTORS: u32 = 4096;

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        if !p_user_data.is_null() {
            let errors = &*(p_user_data as *const AtomicUsize);
            errors.fetch_add(1, Ordering::SeqCst);
        }
        log::error!("[vulkan {:?}] {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan {:?}] {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::debug!("[vulkan {:?}] {}", message_type, message);
    } else {
        log::trace!("[vulkan {:?}] {}", message_type, message);
    }
    vk::FALSE
}

pub struct VulkanQueryBuffer {
    pool: vk::QueryPool,
}

pub struct VulkanDevice {
    pub(super) entry: Entry,
    pub(super) instance: ash::Instance,
    pub(super) pdevice: vk::PhysicalDevice,
    pub(super) device: ash::Device,
    pub(super) allocator: ManuallyDrop<vk_mem::Allocator>,
    pub(super) properties: vk::PhysicalDeviceProperties,
    pub(super) families: QueueFamilies,
    /// Distinct queue families in use, for concurrent resource sharing.
    pub(super) family_indices: Vec<u32>,
    timestamp_bits: Vec<u32>,
    adapter: DeviceInfo,
    pub(super) heaps: Pool<HeapMemory>,
    pub(super) type_bits: MemoryTypeBits,
    pub(super) bindless: BindlessTable,
    pub(super) mesh_shader: Option<ext::MeshShader>,
    pub(super) surface_loader: Option<khr::Surface>,
    pub(super) swapchain_loader: Option<khr::Swapchain>,
    debug_utils: Option<ext::DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    validation_errors: Box<AtomicUsize>,
}

fn extension_available(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
}

impl VulkanDevice {
    /// Creates a Vulkan 1.3 device on `info.device_index`, falling back to
    /// another adapter (and finally a CPU implementation) when that one is
    /// not usable.
    pub fn new(info: &ContextInfo) -> Result<Self> {
        let validation = info.validation_requested();
        let entry = unsafe { Entry::load()? };

        let available = entry.enumerate_instance_extension_properties(None)?;
        let mut inst_exts: Vec<*const c_char> = display::surface_extensions()
            .into_iter()
            .filter(|name| extension_available(&available, unsafe { CStr::from_ptr(*name) }))
            .collect();
        let has_surface = extension_available(&available, khr::Surface::name());
        let has_debug_utils = extension_available(&available, ext::DebugUtils::name());
        if has_debug_utils {
            inst_exts.push(ext::DebugUtils::name().as_ptr());
        }

        let mut inst_layers = Vec::new();
        if validation {
            let layers = entry.enumerate_instance_layer_properties()?;
            for &layer in &DEBUG_LAYER_NAMES {
                let name = unsafe { CStr::from_ptr(layer) };
                if layers
                    .iter()
                    .any(|prop| unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) } == name)
                {
                    inst_layers.push(layer);
                } else {
                    log::warn!("validation requested but {:?} is not installed", name);
                }
            }
        }

        let app_info = vk::ApplicationInfo {
            api_version: vk::API_VERSION_1_3,
            ..Default::default()
        };
        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&app_info)
                    .enabled_extension_names(&inst_exts)
                    .enabled_layer_names(&inst_layers)
                    .build(),
                None,
            )?
        };

        let validation_errors = Box::new(AtomicUsize::new(0));
        let debug_utils = has_debug_utils.then(|| ext::DebugUtils::new(&entry, &instance));
        let debug_messenger = match (&debug_utils, validation) {
            (Some(utils), true) => {
                let messenger_ci = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                    .message_severity(
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                    )
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(vulkan_debug_callback))
                    .user_data(&*validation_errors as *const AtomicUsize as *mut c_void)
                    .build();
                Some(unsafe { utils.create_debug_utils_messenger(&messenger_ci, None)? })
            }
            _ => None,
        };

        let (pdevice, adapter) = device_selector::select(&instance, info.device_index)?;
        let properties = unsafe { instance.get_physical_device_properties(pdevice) };
        let family_props =
            unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let families = QueueFamilies::find(&family_props)
            .ok_or(GPUError::Unsupported("device has no graphics queue"))?;
        let family_indices = families.unique();
        let timestamp_bits = family_props.iter().map(|f| f.timestamp_valid_bits).collect();

        let device_exts = unsafe { instance.enumerate_device_extension_properties(pdevice)? };
        let has_swapchain = has_surface && extension_available(&device_exts, khr::Swapchain::name());
        let has_mesh_ext = extension_available(&device_exts, ext::MeshShader::name());

        let mut supported12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut supported13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut supported_mesh = vk::PhysicalDeviceMeshShaderFeaturesEXT::default();
        {
            let mut query = vk::PhysicalDeviceFeatures2::builder()
                .push_next(&mut supported12)
                .push_next(&mut supported13);
            if has_mesh_ext {
                query = query.push_next(&mut supported_mesh);
            }
            let mut query = query.build();
            unsafe { instance.get_physical_device_features2(pdevice, &mut query) };
        }
        let required = [
            (supported12.timeline_semaphore, "timeline semaphores"),
            (supported12.descriptor_indexing, "descriptor indexing"),
            (supported12.descriptor_binding_partially_bound, "partially bound descriptors"),
            (supported12.runtime_descriptor_array, "runtime descriptor arrays"),
            (supported12.host_query_reset, "host query reset"),
            (supported13.dynamic_rendering, "dynamic rendering"),
            (supported13.synchronization2, "synchronization2"),
        ];
        for (supported, what) in required {
            if supported != vk::TRUE {
                log::error!("`{}` lacks {}", adapter.name, what);
                return Err(GPUError::Unsupported("device lacks a required Vulkan 1.3 feature"));
            }
        }
        let mesh_shading = has_mesh_ext && supported_mesh.mesh_shader == vk::TRUE;

        let mut wanted_exts = Vec::new();
        if has_swapchain {
            wanted_exts.push(khr::Swapchain::name().as_ptr());
        }
        if mesh_shading {
            wanted_exts.push(ext::MeshShader::name().as_ptr());
        }

        let priorities = [1.0];
        let queue_infos: Vec<_> = family_indices
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
            .timeline_semaphore(true)
            .descriptor_indexing(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_storage_buffer_update_after_bind(
                supported12.descriptor_binding_storage_buffer_update_after_bind == vk::TRUE,
            )
            .descriptor_binding_sampled_image_update_after_bind(
                supported12.descriptor_binding_sampled_image_update_after_bind == vk::TRUE,
            )
            .runtime_descriptor_array(true)
            .shader_storage_buffer_array_non_uniform_indexing(
                supported12.shader_storage_buffer_array_non_uniform_indexing == vk::TRUE,
            )
            .shader_sampled_image_array_non_uniform_indexing(
                supported12.shader_sampled_image_array_non_uniform_indexing == vk::TRUE,
            )
            .host_query_reset(true)
            .build();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
            .dynamic_rendering(true)
            .synchronization2(true)
            .maintenance4(supported13.maintenance4 == vk::TRUE)
            .build();
        let mut mesh_features = vk::PhysicalDeviceMeshShaderFeaturesEXT::builder()
            .mesh_shader(true)
            .task_shader(supported_mesh.task_shader == vk::TRUE)
            .build();

        let mut device_ci = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&wanted_exts)
            .push_next(&mut features12)
            .push_next(&mut features13);
        if mesh_shading {
            device_ci = device_ci.push_next(&mut mesh_features);
        }
        let device = unsafe { instance.create_device(pdevice, &device_ci.build(), None)? };

        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance, &device, pdevice,
        ))?;

        let mut properties12 = vk::PhysicalDeviceVulkan12Properties::default();
        {
            let mut query = vk::PhysicalDeviceProperties2::builder()
                .push_next(&mut properties12)
                .build();
            unsafe { instance.get_physical_device_properties2(pdevice, &mut query) };
        }
        let capacity = MAX_BINDLESS_DESCRIPTORS
            .min(properties12.max_descriptor_set_update_after_bind_storage_buffers)
            .min(properties12.max_descriptor_set_update_after_bind_sampled_images)
            .min(properties12.max_per_stage_descriptor_update_after_bind_storage_buffers)
            .min(properties12.max_per_stage_descriptor_update_after_bind_sampled_images)
            .max(1);
        let bindless = BindlessTable::new(&device, capacity)?;

        let surface_loader = has_swapchain.then(|| khr::Surface::new(&entry, &instance));
        let swapchain_loader = has_swapchain.then(|| khr::Swapchain::new(&instance, &device));
        let mesh_shader = mesh_shading.then(|| ext::MeshShader::new(&instance, &device));

        log::info!(
            "created Vulkan device `{}` ({:?}, mesh shading {}, presentation {}, validation {})",
            adapter.name,
            adapter.kind,
            mesh_shading,
            has_swapchain,
            debug_messenger.is_some()
        );

        let mut device = Self {
            entry,
            instance,
            pdevice,
            device,
            allocator: ManuallyDrop::new(allocator),
            properties,
            families,
            family_indices,
            timestamp_bits,
            adapter,
            heaps: Pool::default(),
            type_bits: MemoryTypeBits::default(),
            bindless,
            mesh_shader,
            surface_loader,
            swapchain_loader,
            debug_utils,
            debug_messenger,
            validation_errors,
        };
        device.type_bits = MemoryTypeBits::probe(&device);
        Ok(device)
    }

    /// Validation-layer errors reported since creation.
    pub fn validation_error_count(&self) -> usize {
        self.validation_errors.load(Ordering::SeqCst)
    }

    pub fn supports_mesh_shading(&self) -> bool {
        self.mesh_shader.is_some()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.adapter
    }

    fn barriers(&self) -> BarrierBuilder {
        BarrierBuilder::new(self.mesh_shader.is_some())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("device wait failed during teardown: {}", err);
            }
            self.bindless.destroy(&self.device);
            for mut memory in self.heaps.drain() {
                self.allocator.free_memory(&mut memory.allocation);
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl Backend for VulkanDevice {
    type Heap = VulkanHeap;
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type Shader = VulkanShader;
    type Pipeline = VulkanPipeline;
    type QueryBuffer = VulkanQueryBuffer;
    type Queue = VulkanQueue;
    type CommandList = VulkanCommandList;
    type SwapChain = VulkanSwapChain;
    type Fence = vk::Semaphore;

    fn kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn adapter_name(&self) -> String {
        self.adapter.name.clone()
    }

    fn resource_descriptor_capacity(&self) -> u32 {
        self.bindless.capacity
    }

    fn buffer_allocation_info(&self, size: u64) -> Result<AllocationInfo> {
        Ok(self.placement_info(self.query_buffer_requirements(size)))
    }

    fn texture_allocation_info(&self, desc: &TextureDesc) -> Result<AllocationInfo> {
        Ok(self.placement_info(self.query_image_requirements(desc)))
    }

    fn create_heap(&mut self, kind: HeapKind, size: u64) -> Result<VulkanHeap> {
        self.allocate_heap(kind, size)
    }

    fn destroy_heap(&mut self, heap: VulkanHeap) {
        self.free_heap(heap);
    }

    fn create_buffer(
        &mut self,
        heap: &VulkanHeap,
        _kind: HeapKind,
        offset: u64,
        size: u64,
        shader_resource_index: u32,
    ) -> Result<VulkanBuffer> {
        let buffer = self.place_buffer(heap, offset, size)?;
        if shader_resource_index < self.bindless.capacity {
            self.bindless
                .write_buffer(&self.device, shader_resource_index, &buffer);
        }
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: VulkanBuffer) {
        unsafe { self.device.destroy_buffer(buffer.raw, None) };
    }

    fn map_buffer(&mut self, heap: &VulkanHeap, buffer: &mut VulkanBuffer) -> Result<*mut u8> {
        if !heap.kind.is_cpu_visible() {
            return Err(GPUError::NotMappable(heap.kind));
        }
        self.map(buffer)
    }

    fn unmap_buffer(&mut self, _heap: &VulkanHeap, buffer: &mut VulkanBuffer) {
        self.unmap(buffer);
    }

    fn create_texture(
        &mut self,
        heap: &VulkanHeap,
        offset: u64,
        desc: &TextureDesc,
        shader_resource_index: Option<u32>,
        _target_view: Option<u32>,
    ) -> Result<VulkanTexture> {
        let texture = self.place_texture(heap, offset, desc)?;
        if let Some(index) = shader_resource_index.filter(|i| *i < self.bindless.capacity) {
            self.bindless.write_texture(&self.device, index, &texture);
        }
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: VulkanTexture) {
        self.release_texture(texture);
    }

    fn create_shader(&mut self, container: &ShaderContainer) -> Result<VulkanShader> {
        self.build_shader(container)
    }

    fn destroy_shader(&mut self, shader: VulkanShader) {
        self.release_shader(shader);
    }

    fn create_pipeline(&mut self, shader: &VulkanShader, desc: &PipelineDesc) -> Result<VulkanPipeline> {
        self.build_pipeline(shader, desc)
    }

    fn destroy_pipeline(&mut self, pipeline: VulkanPipeline) {
        self.release_pipeline(pipeline);
    }

    fn create_query_buffer(&mut self, ty: QueryType, count: u32) -> Result<VulkanQueryBuffer> {
        let query_type = match ty {
            QueryType::Timestamp => vk::QueryType::TIMESTAMP,
        };
        let pool = unsafe {
            self.device.create_query_pool(
                &vk::QueryPoolCreateInfo::builder()
                    .query_type(query_type)
                    .query_count(count.max(1))
                    .build(),
                None,
            )?
        };
        unsafe { self.device.reset_query_pool(pool, 0, count.max(1)) };
        Ok(VulkanQueryBuffer { pool })
    }

    fn destroy_query_buffer(&mut self, query: VulkanQueryBuffer) {
        unsafe { self.device.destroy_query_pool(query.pool, None) };
    }

    fn create_queue(&mut self, ty: QueueType, frames_in_flight: usize) -> Result<VulkanQueue> {
        self.open_queue(ty, frames_in_flight)
    }

    fn destroy_queue(&mut self, queue: VulkanQueue) {
        self.close_queue(queue);
    }

    fn queue_fence(&self, queue: &VulkanQueue) -> vk::Semaphore {
        queue.timeline
    }

    fn timestamp_frequency(&self, queue: &VulkanQueue) -> Result<u64> {
        let bits = self
            .timestamp_bits
            .get(queue.family as usize)
            .copied()
            .unwrap_or(0);
        if bits == 0 || self.properties.limits.timestamp_period <= 0.0 {
            return Err(GPUError::Unsupported("queue does not support timestamps"));
        }
        Ok((1.0e9 / self.properties.limits.timestamp_period as f64) as u64)
    }

    fn reset_allocator(&mut self, queue: &mut VulkanQueue, frame_slot: usize) -> Result<()> {
        self.reset_pool(queue, frame_slot)
    }

    fn create_command_list(&mut self, queue: &mut VulkanQueue, frame_slot: usize) -> Result<VulkanCommandList> {
        self.allocate_list(queue, frame_slot)
    }

    fn reset_command_list(
        &mut self,
        queue: &mut VulkanQueue,
        list: &mut VulkanCommandList,
        frame_slot: usize,
    ) -> Result<()> {
        self.reopen_list(queue, list, frame_slot)
    }

    fn close_command_list(&mut self, list: &mut VulkanCommandList) -> Result<()> {
        unsafe { self.device.end_command_buffer(list.raw)? };
        Ok(())
    }

    fn destroy_command_list(&mut self, _queue: &mut VulkanQueue, list: VulkanCommandList) {
        self.free_list(list);
    }

    fn execute_command_lists(
        &mut self,
        queue: &mut VulkanQueue,
        lists: &[&VulkanCommandList],
        waits: &[(vk::Semaphore, u64)],
        signal_value: u64,
    ) -> Result<()> {
        self.submit(queue, lists, waits, signal_value)
    }

    fn completed_value(&mut self, fence: &vk::Semaphore) -> Result<u64> {
        self.timeline_value(*fence)
    }

    fn wait_on_cpu(&mut self, fence: &vk::Semaphore, value: u64, timeout: Option<Duration>) -> Result<()> {
        self.wait_timeline(*fence, value, timeout)
    }

    fn cmd_transition(
        &mut self,
        list: &mut VulkanCommandList,
        target: BarrierTarget<'_, Self>,
        before: ResourceState,
        after: ResourceState,
    ) {
        let mut barriers = self.barriers();
        match target {
            BarrierTarget::Buffer(buffer) => barriers.buffer(buffer, before, after),
            BarrierTarget::Texture(texture, _) => barriers.texture(texture, before, after),
        }
        unsafe { barriers.emit(&self.device, list.raw) };
    }

    fn cmd_begin_render_pass(
        &mut self,
        list: &mut VulkanCommandList,
        targets: &RenderTargets<'_, VulkanTexture>,
    ) {
        let mut extent = vk::Extent2D {
            width: targets.width,
            height: targets.height,
        };

        let color: Vec<vk::RenderingAttachmentInfo> = targets
            .color
            .iter()
            .map(|c| {
                extent.width = extent.width.min(c.texture.extent.width);
                extent.height = extent.height.min(c.texture.extent.height);
                let (load_op, color) = match c.clear {
                    Some(color) => (vk::AttachmentLoadOp::CLEAR, color),
                    None => (vk::AttachmentLoadOp::LOAD, [0.0; 4]),
                };
                vk::RenderingAttachmentInfo::builder()
                    .image_view(c.texture.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue { float32: color },
                    })
                    .build()
            })
            .collect();

        let depth = targets.depth.as_ref().map(|d| {
            let layout = match d.read_only {
                true => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                false => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            };
            let load_op = match d.clear {
                Some(_) => vk::AttachmentLoadOp::CLEAR,
                None => vk::AttachmentLoadOp::LOAD,
            };
            let attachment = vk::RenderingAttachmentInfo::builder()
                .image_view(d.texture.view)
                .image_layout(layout)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: d.clear.unwrap_or_default(),
                        stencil: 0,
                    },
                })
                .build();
            (attachment, d.desc.format == Format::D24S8)
        });

        let mut info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color);
        if let Some((attachment, stencil)) = &depth {
            info = info.depth_attachment(attachment);
            if *stencil {
                info = info.stencil_attachment(attachment);
            }
        }

        // Flipped viewport so clip space points y up like Direct3D.
        let viewport = vk::Viewport {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device.cmd_begin_rendering(list.raw, &info.build());
            self.device.cmd_set_viewport(list.raw, 0, &[viewport]);
            self.device.cmd_set_scissor(list.raw, 0, &[scissor]);
        }
    }

    fn cmd_end_render_pass(&mut self, list: &mut VulkanCommandList) {
        unsafe { self.device.cmd_end_rendering(list.raw) };
    }

    fn cmd_set_pipeline(&mut self, list: &mut VulkanCommandList, pipeline: &VulkanPipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(list.raw, pipeline.bind_point, pipeline.raw)
        };
    }

    fn cmd_set_resource_heap(&mut self, list: &mut VulkanCommandList, pipeline: &VulkanPipeline) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                list.raw,
                pipeline.bind_point,
                pipeline.layout,
                0,
                &[self.bindless.set],
                &[],
            )
        };
    }

    fn cmd_set_constants(&mut self, list: &mut VulkanCommandList, pipeline: &VulkanPipeline, values: &[u32]) {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let len = bytes.len().min(pipeline.push_constant_size as usize);
        if len == 0 {
            return;
        }
        if len < bytes.len() {
            log::warn!(
                "{} bytes of shader constants exceed the {}-byte push range",
                bytes.len(),
                pipeline.push_constant_size
            );
        }
        unsafe {
            self.device.cmd_push_constants(
                list.raw,
                pipeline.layout,
                pipeline.push_stages,
                0,
                &bytes[..len],
            )
        };
    }

    fn cmd_dispatch_mesh(&mut self, list: &mut VulkanCommandList, x: u32, y: u32, z: u32) {
        match &self.mesh_shader {
            Some(mesh) => unsafe { mesh.cmd_draw_mesh_tasks(list.raw, x, y, z) },
            // The mesh stage runs as a vertex shader: x vertices, y instances.
            None => unsafe { self.device.cmd_draw(list.raw, x, y.max(1), 0, 0) },
        }
    }

    fn cmd_dispatch(&mut self, list: &mut VulkanCommandList, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(list.raw, x, y, z) };
    }

    fn cmd_draw(&mut self, list: &mut VulkanCommandList, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .cmd_draw(list.raw, vertex_count, instance_count, 0, 0)
        };
    }

    fn cmd_copy_buffer(
        &mut self,
        list: &mut VulkanCommandList,
        src: &VulkanBuffer,
        src_offset: u64,
        dst: &VulkanBuffer,
        dst_offset: u64,
        size: u64,
    ) {
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe { self.device.cmd_copy_buffer(list.raw, src.raw, dst.raw, &[region]) };
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        list: &mut VulkanCommandList,
        src: &VulkanBuffer,
        src_offset: u64,
        dst: &VulkanTexture,
        desc: &TextureDesc,
    ) {
        let mut barriers = self.barriers();
        barriers.texture_to_layout(
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ResourceState::CopyDestination,
        );
        unsafe { barriers.emit(&self.device, list.raw) };

        // Faces in order, each holding its mips from largest to smallest.
        let bpp = desc.format.bytes_per_pixel() as u64;
        let mut offset = src_offset;
        let mut regions = Vec::new();
        for face in 0..desc.face_count.max(1) {
            for mip in 0..desc.mip_levels.max(1) {
                let width = (desc.width >> mip).max(1);
                let height = (desc.height >> mip).max(1);
                regions.push(vk::BufferImageCopy {
                    buffer_offset: offset,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: copy_aspect(desc.format),
                        mip_level: mip,
                        base_array_layer: face,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D::default(),
                    image_extent: vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    },
                });
                offset += width as u64 * height as u64 * bpp;
            }
        }

        unsafe {
            self.device.cmd_copy_buffer_to_image(
                list.raw,
                src.raw,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            )
        };
    }

    fn cmd_write_timestamp(&mut self, list: &mut VulkanCommandList, query: &VulkanQueryBuffer, index: u32) {
        unsafe {
            self.device.cmd_write_timestamp2(
                list.raw,
                vk::PipelineStageFlags2::ALL_COMMANDS,
                query.pool,
                index,
            )
        };
    }

    /// Resolved queries are reset so the slots can be written again.
    fn cmd_resolve_queries(
        &mut self,
        list: &mut VulkanCommandList,
        query: &VulkanQueryBuffer,
        start: u32,
        count: u32,
        dst: &VulkanBuffer,
        dst_offset: u64,
    ) {
        unsafe {
            self.device.cmd_copy_query_pool_results(
                list.raw,
                query.pool,
                start,
                count,
                dst.raw,
                dst_offset,
                std::mem::size_of::<u64>() as u64,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            );
            self.device
                .cmd_reset_query_pool(list.raw, query.pool, start, count);
        }
    }

    fn cmd_begin_marker(&mut self, list: &mut VulkanCommandList, name: &str) {
        if let Some(utils) = &self.debug_utils {
            let name = CString::new(name.replace('\0', " ")).unwrap_or_default();
            let label = vk::DebugUtilsLabelEXT::builder().label_name(&name).build();
            unsafe { utils.cmd_begin_debug_utils_label(list.raw, &label) };
        }
    }

    fn cmd_end_marker(&mut self, list: &mut VulkanCommandList) {
        if let Some(utils) = &self.debug_utils {
            unsafe { utils.cmd_end_debug_utils_label(list.raw) };
        }
    }

    fn create_swap_chain(
        &mut self,
        window: &NativeWindow,
        queue: &VulkanQueue,
        info: &SwapChainInfo,
        _target_views: &[u32],
    ) -> Result<(VulkanSwapChain, Vec<VulkanTexture>)> {
        self.open_swap_chain(window, queue, info)
    }

    fn resize_swap_chain(
        &mut self,
        swap_chain: &mut VulkanSwapChain,
        old_back_buffers: Vec<VulkanTexture>,
        info: &SwapChainInfo,
        _target_views: &[u32],
    ) -> Result<Vec<VulkanTexture>> {
        self.rebuild_swap_chain(swap_chain, old_back_buffers, info)
    }

    fn acquire_next_image(&mut self, swap_chain: &mut VulkanSwapChain, timeout: Duration) -> Result<u32> {
        self.acquire(swap_chain, timeout)
    }

    fn present(
        &mut self,
        swap_chain: &mut VulkanSwapChain,
        queue: &mut VulkanQueue,
        image_index: u32,
        signal_value: u64,
    ) -> Result<()> {
        self.present_image(swap_chain, queue, image_index, signal_value)
    }

    fn destroy_swap_chain(&mut self, swap_chain: VulkanSwapChain, back_buffers: Vec<VulkanTexture>) {
        self.close_swap_chain(swap_chain, back_buffers);
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}
