//! Direct3D 12 device.
//!
//! Buffers and textures are placed resources inside caller-sized heaps. Each
//! queue signals its own fence, and every pipeline reads resources through
//! one shader-visible descriptor heap indexed directly from shaders.

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use windows::core::{ComInterface, PCSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, RECT};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::CreateEventA;

mod conversions;
mod descriptors;
mod display;
mod memory;
mod pipelines;
mod queues;

pub use display::D3D12SwapChain;
pub use memory::{D3D12Buffer, D3D12Heap, D3D12Texture};
pub use pipelines::{D3D12Pipeline, D3D12Shader};
pub use queues::{D3D12CommandList, D3D12Queue};

use self::conversions::{buffer_desc, resource_state};
use self::descriptors::DescriptorHeap;
use self::memory::READ_ONLY_DSV_OFFSET;
use super::context::{DEPTH_VIEW_CAPACITY, RENDER_TARGET_VIEW_CAPACITY};
use super::error::{GPUError, Result};
use super::render_pass::PipelineDesc;
use super::shader::ShaderContainer;
use super::structs::*;
use super::{Backend, BarrierTarget, RenderTargets};
use crate::window::NativeWindow;

/// Shader-visible resource descriptors.
const RESOURCE_DESCRIPTOR_CAPACITY: u32 = 4096;

unsafe extern "system" fn d3d12_debug_callback(
    category: D3D12_MESSAGE_CATEGORY,
    severity: D3D12_MESSAGE_SEVERITY,
    _id: D3D12_MESSAGE_ID,
    description: PCSTR,
    context: *mut c_void,
) {
    let message = match description.is_null() {
        true => String::new(),
        false => description.to_string().unwrap_or_default(),
    };

    match severity {
        D3D12_MESSAGE_SEVERITY_CORRUPTION | D3D12_MESSAGE_SEVERITY_ERROR => {
            if !context.is_null() {
                let errors = &*(context as *const AtomicUsize);
                errors.fetch_add(1, Ordering::SeqCst);
            }
            log::error!("[d3d12 {:?}] {}", category, message);
        }
        D3D12_MESSAGE_SEVERITY_WARNING => log::warn!("[d3d12 {:?}] {}", category, message),
        D3D12_MESSAGE_SEVERITY_INFO => log::debug!("[d3d12 {:?}] {}", category, message),
        _ => log::trace!("[d3d12 {:?}] {}", category, message),
    }
}

pub struct D3D12QueryBuffer {
    heap: ID3D12QueryHeap,
}

pub struct D3D12Device {
    factory: IDXGIFactory4,
    adapter_name: String,
    pub(super) device: ID3D12Device2,
    pub(super) resource_heap: DescriptorHeap,
    pub(super) rtv_heap: DescriptorHeap,
    /// Writable views first, read-only views `READ_ONLY_DSV_OFFSET` later.
    pub(super) dsv_heap: DescriptorHeap,
    pub(super) mesh_shading: bool,
    pub(super) live_queues: Vec<ID3D12CommandQueue>,
    pub(super) fence_event: HANDLE,
    pub(super) idle_fence: ID3D12Fence,
    pub(super) idle_value: u64,
    info_queue: Option<(ID3D12InfoQueue1, u32)>,
    validation_errors: Box<AtomicUsize>,
}

fn adapter_name(adapter: &IDXGIAdapter1) -> Result<(String, bool)> {
    let desc = unsafe { adapter.GetDesc1()? };
    let len = desc
        .Description
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(desc.Description.len());
    let software = (desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) != 0;
    Ok((String::from_utf16_lossy(&desc.Description[..len]), software))
}

fn open_device(adapter: &IDXGIAdapter1) -> Result<ID3D12Device2> {
    let mut device: Option<ID3D12Device2> = None;
    unsafe { D3D12CreateDevice(adapter, D3D_FEATURE_LEVEL_12_0, &mut device)? };
    device.ok_or(GPUError::Unsupported("device creation returned nothing"))
}

/// Opens the requested hardware adapter, then any other hardware adapter,
/// then WARP.
fn select_device(factory: &IDXGIFactory4, requested: usize) -> Result<(ID3D12Device2, String)> {
    let mut hardware = Vec::new();
    let mut index = 0;
    while let Ok(adapter) = unsafe { factory.EnumAdapters1(index) } {
        index += 1;
        let (name, software) = adapter_name(&adapter)?;
        if !software {
            hardware.push((adapter, name));
        }
    }

    let mut order: Vec<usize> = (0..hardware.len()).collect();
    if requested < hardware.len() {
        order.retain(|&i| i != requested);
        order.insert(0, requested);
    }

    for i in order {
        let (adapter, name) = &hardware[i];
        match open_device(adapter) {
            Ok(device) => {
                if i != requested {
                    log::info!("requested adapter {} unusable, using {}", requested, name);
                }
                return Ok((device, name.clone()));
            }
            Err(err) => log::debug!("adapter {} rejected: {}", name, err),
        }
    }

    log::warn!("no Direct3D 12 hardware adapter is usable, falling back to WARP");
    let warp: IDXGIAdapter1 = unsafe { factory.EnumWarpAdapter()? };
    let (name, _) = adapter_name(&warp)?;
    Ok((open_device(&warp)?, name))
}

/// Device layout of every subresource of an upload, and where each one
/// starts in the tightly packed source buffer.
struct UploadPlan {
    layouts: Vec<D3D12_PLACED_SUBRESOURCE_FOOTPRINT>,
    rows: Vec<u32>,
    row_sizes: Vec<u64>,
    packed: Vec<u64>,
    total: u64,
}

fn transition(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

fn copy_location(resource: &ID3D12Resource, subresource: u32) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            SubresourceIndex: subresource,
        },
    }
}

fn footprint_location(
    resource: &ID3D12Resource,
    footprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT,
) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            PlacedFootprint: footprint,
        },
    }
}

impl D3D12Device {
    /// Creates a device on adapter `info.device_index`, falling back to
    /// another adapter (and finally WARP) when that one is not usable.
    pub fn new(info: &ContextInfo) -> Result<Self> {
        let validation = info.validation_requested();
        if validation {
            let mut debug: Option<ID3D12Debug> = None;
            match unsafe { D3D12GetDebugInterface(&mut debug) } {
                Ok(()) => {
                    if let Some(debug) = debug {
                        unsafe { debug.EnableDebugLayer() };
                    }
                }
                Err(err) => log::warn!("Direct3D 12 debug layer is unavailable: {}", err),
            }
        }

        let flags = match validation {
            true => DXGI_CREATE_FACTORY_DEBUG,
            false => Default::default(),
        };
        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(flags)? };
        let (device, adapter_name) = select_device(&factory, info.device_index)?;

        let validation_errors = Box::new(AtomicUsize::new(0));
        let info_queue = match validation {
            true => device.cast::<ID3D12InfoQueue1>().ok(),
            false => None,
        };
        let info_queue = info_queue.and_then(|queue| {
            let mut cookie = 0;
            let registered = unsafe {
                queue.RegisterMessageCallback(
                    Some(d3d12_debug_callback),
                    D3D12_MESSAGE_CALLBACK_FLAG_NONE,
                    &*validation_errors as *const AtomicUsize as *const c_void,
                    &mut cookie,
                )
            };
            match registered {
                Ok(()) => Some((queue, cookie)),
                Err(err) => {
                    log::warn!("could not route debug messages to the log: {}", err);
                    None
                }
            }
        });

        let mut options = D3D12_FEATURE_DATA_D3D12_OPTIONS7::default();
        let mesh_shading = unsafe {
            device.CheckFeatureSupport(
                D3D12_FEATURE_D3D12_OPTIONS7,
                &mut options as *mut _ as *mut c_void,
                std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS7>() as u32,
            )
        }
        .is_ok()
            && options.MeshShaderTier != D3D12_MESH_SHADER_TIER_NOT_SUPPORTED;
        if !mesh_shading {
            log::info!("mesh shading unsupported, mesh stages run as vertex shaders");
        }

        let resource_heap = DescriptorHeap::new(
            &device,
            D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
            RESOURCE_DESCRIPTOR_CAPACITY,
        )?;
        let rtv_heap = DescriptorHeap::new(
            &device,
            D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
            RENDER_TARGET_VIEW_CAPACITY,
        )?;
        let dsv_heap = DescriptorHeap::new(
            &device,
            D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
            DEPTH_VIEW_CAPACITY + READ_ONLY_DSV_OFFSET,
        )?;

        let idle_fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE)? };
        let fence_event = unsafe { CreateEventA(None, false, false, None)? };

        log::info!("created Direct3D 12 device on {}", adapter_name);
        Ok(Self {
            factory,
            adapter_name,
            device,
            resource_heap,
            rtv_heap,
            dsv_heap,
            mesh_shading,
            live_queues: Vec::new(),
            fence_event,
            idle_fence,
            idle_value: 0,
            info_queue,
            validation_errors,
        })
    }

    /// Debug-layer errors reported since creation.
    pub fn validation_error_count(&self) -> usize {
        self.validation_errors.load(Ordering::SeqCst)
    }

    pub fn supports_mesh_shading(&self) -> bool {
        self.mesh_shading
    }

    fn upload_plan(&self, native: &D3D12_RESOURCE_DESC, desc: &TextureDesc, src_offset: u64) -> UploadPlan {
        let count = (desc.mip_levels.max(1) * desc.face_count.max(1)) as usize;
        let mut plan = UploadPlan {
            layouts: vec![D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default(); count],
            rows: vec![0; count],
            row_sizes: vec![0; count],
            packed: Vec::with_capacity(count),
            total: 0,
        };
        unsafe {
            self.device.GetCopyableFootprints(
                native,
                0,
                count as u32,
                0,
                Some(plan.layouts.as_mut_ptr()),
                Some(plan.rows.as_mut_ptr()),
                Some(plan.row_sizes.as_mut_ptr()),
                Some(&mut plan.total),
            )
        };

        // Source data is faces in order, each holding its mips largest first,
        // which is also the subresource order.
        let mut offset = src_offset;
        for (size, rows) in plan.row_sizes.iter().zip(&plan.rows) {
            plan.packed.push(offset);
            offset += size * *rows as u64;
        }
        plan
    }

    /// Records `copy_buffer_to_texture` through a staging buffer whose rows
    /// follow the device's pitch and placement rules.
    fn repack_upload(
        &self,
        list: &mut D3D12CommandList,
        src: &D3D12Buffer,
        plan: &UploadPlan,
        dst: &D3D12Texture,
    ) -> Result<()> {
        let properties = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let mut scratch: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &properties,
                D3D12_HEAP_FLAG_NONE,
                &buffer_desc(plan.total, D3D12_RESOURCE_FLAG_NONE),
                D3D12_RESOURCE_STATE_COMMON,
                None,
                &mut scratch,
            )?
        };
        let scratch = scratch.ok_or(GPUError::Unsupported("staging buffer creation returned nothing"))?;

        unsafe {
            for (i, layout) in plan.layouts.iter().enumerate() {
                let pitch = layout.Footprint.RowPitch as u64;
                let tight = plan.row_sizes[i];
                let rows = plan.rows[i] as u64;
                if pitch == tight {
                    list.raw.CopyBufferRegion(
                        &scratch,
                        layout.Offset,
                        &src.raw,
                        plan.packed[i],
                        tight * rows,
                    );
                    continue;
                }
                for row in 0..rows {
                    list.raw.CopyBufferRegion(
                        &scratch,
                        layout.Offset + row * pitch,
                        &src.raw,
                        plan.packed[i] + row * tight,
                        tight,
                    );
                }
            }

            list.raw.ResourceBarrier(&[transition(
                &scratch,
                D3D12_RESOURCE_STATE_COPY_DEST,
                D3D12_RESOURCE_STATE_COPY_SOURCE,
            )]);

            for (i, layout) in plan.layouts.iter().enumerate() {
                let dst_location = copy_location(&dst.raw, i as u32);
                let src_location = footprint_location(&scratch, *layout);
                list.raw
                    .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
            }
        }
        list.scratch.push(scratch);
        Ok(())
    }
}

impl Drop for D3D12Device {
    fn drop(&mut self) {
        if let Err(err) = self.drain_queues() {
            log::error!("queue drain failed during teardown: {}", err);
        }
        if let Some((queue, cookie)) = self.info_queue.take() {
            if let Err(err) = unsafe { queue.UnregisterMessageCallback(cookie) } {
                log::warn!("failed to unregister the debug callback: {}", err);
            }
        }
        if let Err(err) = unsafe { CloseHandle(self.fence_event) } {
            log::warn!("failed to close the fence event: {}", err);
        }
    }
}

impl Backend for D3D12Device {
    type Heap = D3D12Heap;
    type Buffer = D3D12Buffer;
    type Texture = D3D12Texture;
    type Shader = D3D12Shader;
    type Pipeline = D3D12Pipeline;
    type QueryBuffer = D3D12QueryBuffer;
    type Queue = D3D12Queue;
    type CommandList = D3D12CommandList;
    type SwapChain = D3D12SwapChain;
    type Fence = ID3D12Fence;

    fn kind(&self) -> BackendKind {
        BackendKind::Direct3D12
    }

    fn adapter_name(&self) -> String {
        self.adapter_name.clone()
    }

    fn resource_descriptor_capacity(&self) -> u32 {
        self.resource_heap.capacity
    }

    fn buffer_allocation_info(&self, size: u64) -> Result<AllocationInfo> {
        Ok(self.buffer_info(size))
    }

    fn texture_allocation_info(&self, desc: &TextureDesc) -> Result<AllocationInfo> {
        Ok(self.texture_info(desc))
    }

    fn create_heap(&mut self, kind: HeapKind, size: u64) -> Result<D3D12Heap> {
        self.allocate_heap(kind, size)
    }

    fn destroy_heap(&mut self, heap: D3D12Heap) {
        drop(heap);
    }

    fn create_buffer(
        &mut self,
        heap: &D3D12Heap,
        kind: HeapKind,
        offset: u64,
        size: u64,
        shader_resource_index: u32,
    ) -> Result<D3D12Buffer> {
        self.place_buffer(heap, kind, offset, size, shader_resource_index)
    }

    fn destroy_buffer(&mut self, buffer: D3D12Buffer) {
        drop(buffer);
    }

    fn map_buffer(&mut self, heap: &D3D12Heap, buffer: &mut D3D12Buffer) -> Result<*mut u8> {
        self.map(heap, buffer)
    }

    fn unmap_buffer(&mut self, _heap: &D3D12Heap, buffer: &mut D3D12Buffer) {
        self.unmap(buffer);
    }

    fn create_texture(
        &mut self,
        heap: &D3D12Heap,
        offset: u64,
        desc: &TextureDesc,
        shader_resource_index: Option<u32>,
        target_view: Option<u32>,
    ) -> Result<D3D12Texture> {
        self.place_texture(heap, offset, desc, shader_resource_index, target_view)
    }

    fn destroy_texture(&mut self, texture: D3D12Texture) {
        drop(texture);
    }

    fn create_shader(&mut self, container: &ShaderContainer) -> Result<D3D12Shader> {
        self.load_shader(container)
    }

    fn destroy_shader(&mut self, shader: D3D12Shader) {
        drop(shader);
    }

    fn create_pipeline(&mut self, shader: &D3D12Shader, desc: &PipelineDesc) -> Result<D3D12Pipeline> {
        self.build_pipeline(shader, desc)
    }

    fn destroy_pipeline(&mut self, pipeline: D3D12Pipeline) {
        drop(pipeline);
    }

    fn create_query_buffer(&mut self, ty: QueryType, count: u32) -> Result<D3D12QueryBuffer> {
        let desc = D3D12_QUERY_HEAP_DESC {
            Type: match ty {
                QueryType::Timestamp => D3D12_QUERY_HEAP_TYPE_TIMESTAMP,
            },
            Count: count.max(1),
            NodeMask: 0,
        };
        let mut heap: Option<ID3D12QueryHeap> = None;
        unsafe { self.device.CreateQueryHeap(&desc, &mut heap)? };
        let heap = heap.ok_or(GPUError::Unsupported("query heap creation returned nothing"))?;
        Ok(D3D12QueryBuffer { heap })
    }

    fn destroy_query_buffer(&mut self, query: D3D12QueryBuffer) {
        drop(query);
    }

    fn create_queue(&mut self, ty: QueueType, frames_in_flight: usize) -> Result<D3D12Queue> {
        self.open_queue(ty, frames_in_flight)
    }

    fn destroy_queue(&mut self, queue: D3D12Queue) {
        self.close_queue(queue);
    }

    fn queue_fence(&self, queue: &D3D12Queue) -> ID3D12Fence {
        queue.fence.clone()
    }

    fn timestamp_frequency(&self, queue: &D3D12Queue) -> Result<u64> {
        if queue.ty == QueueType::Copy {
            return Err(GPUError::Unsupported("copy queues do not report timestamps"));
        }
        Ok(unsafe { queue.raw.GetTimestampFrequency()? })
    }

    fn reset_allocator(&mut self, queue: &mut D3D12Queue, frame_slot: usize) -> Result<()> {
        self.reset_frame_allocator(queue, frame_slot)
    }

    fn create_command_list(&mut self, queue: &mut D3D12Queue, frame_slot: usize) -> Result<D3D12CommandList> {
        self.open_list(queue, frame_slot)
    }

    fn reset_command_list(
        &mut self,
        queue: &mut D3D12Queue,
        list: &mut D3D12CommandList,
        frame_slot: usize,
    ) -> Result<()> {
        self.reopen_list(queue, list, frame_slot)
    }

    fn close_command_list(&mut self, list: &mut D3D12CommandList) -> Result<()> {
        unsafe { list.raw.Close()? };
        Ok(())
    }

    fn destroy_command_list(&mut self, _queue: &mut D3D12Queue, list: D3D12CommandList) {
        drop(list);
    }

    fn execute_command_lists(
        &mut self,
        queue: &mut D3D12Queue,
        lists: &[&D3D12CommandList],
        waits: &[(ID3D12Fence, u64)],
        signal_value: u64,
    ) -> Result<()> {
        self.submit(queue, lists, waits, signal_value)
    }

    fn completed_value(&mut self, fence: &ID3D12Fence) -> Result<u64> {
        Ok(unsafe { fence.GetCompletedValue() })
    }

    fn wait_on_cpu(&mut self, fence: &ID3D12Fence, value: u64, timeout: Option<Duration>) -> Result<()> {
        self.wait_fence(fence, value, timeout)
    }

    fn cmd_transition(
        &mut self,
        list: &mut D3D12CommandList,
        target: BarrierTarget<'_, Self>,
        before: ResourceState,
        after: ResourceState,
    ) {
        let resource = match target {
            BarrierTarget::Buffer(buffer) => &buffer.raw,
            BarrierTarget::Texture(texture, _) => &texture.raw,
        };
        let (before, after) = (resource_state(before), resource_state(after));
        if before == after {
            return;
        }
        unsafe { list.raw.ResourceBarrier(&[transition(resource, before, after)]) };
    }

    fn cmd_begin_render_pass(
        &mut self,
        list: &mut D3D12CommandList,
        targets: &RenderTargets<'_, D3D12Texture>,
    ) {
        let rtv = targets.color.as_ref().map(|color| {
            let handle = self.rtv_heap.cpu(color.view);
            if let Some(clear) = color.clear {
                unsafe { list.raw.ClearRenderTargetView(handle, clear.as_ptr(), None) };
            }
            handle
        });

        let dsv = targets.depth.as_ref().map(|depth| {
            let slot = match depth.read_only {
                true => depth.view + READ_ONLY_DSV_OFFSET,
                false => depth.view,
            };
            let handle = self.dsv_heap.cpu(slot);
            if let (Some(value), false) = (depth.clear, depth.read_only) {
                let flags = match depth.desc.format {
                    Format::D24S8 => D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL,
                    _ => D3D12_CLEAR_FLAG_DEPTH,
                };
                unsafe { list.raw.ClearDepthStencilView(handle, flags, value, 0, None) };
            }
            handle
        });

        let viewport = D3D12_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: targets.width as f32,
            Height: targets.height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let scissor = RECT {
            left: 0,
            top: 0,
            right: targets.width as i32,
            bottom: targets.height as i32,
        };
        unsafe {
            list.raw.OMSetRenderTargets(
                rtv.is_some() as u32,
                rtv.as_ref().map(|h| h as *const _),
                false,
                dsv.as_ref().map(|h| h as *const _),
            );
            list.raw.RSSetViewports(&[viewport]);
            list.raw.RSSetScissorRects(&[scissor]);
        }
    }

    fn cmd_end_render_pass(&mut self, _list: &mut D3D12CommandList) {}

    fn cmd_set_pipeline(&mut self, list: &mut D3D12CommandList, pipeline: &D3D12Pipeline) {
        unsafe {
            // Directly indexed heaps must be bound before the root signature.
            list.raw
                .SetDescriptorHeaps(&[Some(self.resource_heap.raw.clone())]);
            list.raw.SetPipelineState(&pipeline.raw);
            if pipeline.compute {
                list.raw.SetComputeRootSignature(&pipeline.root.raw);
            } else {
                list.raw.SetGraphicsRootSignature(&pipeline.root.raw);
                list.raw.IASetPrimitiveTopology(pipeline.topology);
            }
        }
    }

    fn cmd_set_resource_heap(&mut self, list: &mut D3D12CommandList, pipeline: &D3D12Pipeline) {
        let Some(table) = pipeline.root.table else {
            return;
        };
        let start = self.resource_heap.gpu_start();
        unsafe {
            if pipeline.compute {
                list.raw.SetComputeRootDescriptorTable(table, start);
            } else {
                list.raw.SetGraphicsRootDescriptorTable(table, start);
            }
        }
    }

    fn cmd_set_constants(&mut self, list: &mut D3D12CommandList, pipeline: &D3D12Pipeline, values: &[u32]) {
        let Some((index, capacity)) = pipeline.root.constants else {
            log::warn!("pipeline root signature has no constants, ignoring {} values", values.len());
            return;
        };
        let count = (values.len() as u32).min(capacity);
        if count < values.len() as u32 {
            log::warn!("truncating {} constants to {}", values.len(), capacity);
        }
        let data = values.as_ptr() as *const c_void;
        unsafe {
            if pipeline.compute {
                list.raw.SetComputeRoot32BitConstants(index, count, data, 0);
            } else {
                list.raw.SetGraphicsRoot32BitConstants(index, count, data, 0);
            }
        }
    }

    fn cmd_dispatch_mesh(&mut self, list: &mut D3D12CommandList, x: u32, y: u32, z: u32) {
        unsafe {
            if self.mesh_shading {
                list.raw.DispatchMesh(x, y, z);
            } else {
                list.raw.DrawInstanced(x, y.max(1), 0, 0);
            }
        }
    }

    fn cmd_dispatch(&mut self, list: &mut D3D12CommandList, x: u32, y: u32, z: u32) {
        unsafe { list.raw.Dispatch(x, y, z) };
    }

    fn cmd_draw(&mut self, list: &mut D3D12CommandList, vertex_count: u32, instance_count: u32) {
        unsafe { list.raw.DrawInstanced(vertex_count, instance_count, 0, 0) };
    }

    fn cmd_copy_buffer(
        &mut self,
        list: &mut D3D12CommandList,
        src: &D3D12Buffer,
        src_offset: u64,
        dst: &D3D12Buffer,
        dst_offset: u64,
        size: u64,
    ) {
        unsafe {
            list.raw
                .CopyBufferRegion(&dst.raw, dst_offset, &src.raw, src_offset, size)
        };
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        list: &mut D3D12CommandList,
        src: &D3D12Buffer,
        src_offset: u64,
        dst: &D3D12Texture,
        desc: &TextureDesc,
    ) {
        let native = unsafe { dst.raw.GetDesc() };
        let plan = self.upload_plan(&native, desc, src_offset);

        let direct = plan.packed.iter().zip(&plan.row_sizes).all(|(offset, row)| {
            offset % D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT as u64 == 0
                && row % D3D12_TEXTURE_DATA_PITCH_ALIGNMENT as u64 == 0
        });
        if !direct {
            if let Err(err) = self.repack_upload(list, src, &plan, dst) {
                log::error!("texture upload failed: {}", err);
            }
            return;
        }

        for (i, layout) in plan.layouts.iter().enumerate() {
            let footprint = D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                Offset: plan.packed[i],
                Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                    RowPitch: plan.row_sizes[i] as u32,
                    ..layout.Footprint
                },
            };
            let dst_location = copy_location(&dst.raw, i as u32);
            let src_location = footprint_location(&src.raw, footprint);
            unsafe {
                list.raw
                    .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None)
            };
        }
    }

    fn cmd_write_timestamp(&mut self, list: &mut D3D12CommandList, query: &D3D12QueryBuffer, index: u32) {
        unsafe {
            list.raw
                .EndQuery(&query.heap, D3D12_QUERY_TYPE_TIMESTAMP, index)
        };
    }

    fn cmd_resolve_queries(
        &mut self,
        list: &mut D3D12CommandList,
        query: &D3D12QueryBuffer,
        start: u32,
        count: u32,
        dst: &D3D12Buffer,
        dst_offset: u64,
    ) {
        unsafe {
            list.raw.ResolveQueryData(
                &query.heap,
                D3D12_QUERY_TYPE_TIMESTAMP,
                start,
                count,
                &dst.raw,
                dst_offset,
            )
        };
    }

    fn cmd_begin_marker(&mut self, list: &mut D3D12CommandList, name: &str) {
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            list.raw.BeginEvent(
                0,
                Some(wide.as_ptr() as *const c_void),
                (wide.len() * std::mem::size_of::<u16>()) as u32,
            )
        };
    }

    fn cmd_end_marker(&mut self, list: &mut D3D12CommandList) {
        unsafe { list.raw.EndEvent() };
    }

    fn create_swap_chain(
        &mut self,
        window: &NativeWindow,
        queue: &D3D12Queue,
        info: &SwapChainInfo,
        target_views: &[u32],
    ) -> Result<(D3D12SwapChain, Vec<D3D12Texture>)> {
        self.open_swap_chain(window, queue, info, target_views)
    }

    fn resize_swap_chain(
        &mut self,
        swap_chain: &mut D3D12SwapChain,
        old_back_buffers: Vec<D3D12Texture>,
        info: &SwapChainInfo,
        target_views: &[u32],
    ) -> Result<Vec<D3D12Texture>> {
        self.resize(swap_chain, old_back_buffers, info, target_views)
    }

    fn acquire_next_image(&mut self, swap_chain: &mut D3D12SwapChain, timeout: Duration) -> Result<u32> {
        self.acquire(swap_chain, timeout)
    }

    fn present(
        &mut self,
        swap_chain: &mut D3D12SwapChain,
        queue: &mut D3D12Queue,
        _image_index: u32,
        signal_value: u64,
    ) -> Result<()> {
        self.present_image(swap_chain, queue, signal_value)
    }

    fn destroy_swap_chain(&mut self, swap_chain: D3D12SwapChain, back_buffers: Vec<D3D12Texture>) {
        self.close_swap_chain(swap_chain, back_buffers);
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.drain_queues()
    }
}
