//! Flat call table for hosts outside Rust.
//!
//! `hikari_create_call_table` builds a [`Context`] for the requested backend
//! and returns a `#[repr(C)]` table of `extern "C"` slots bound to it. Slots
//! take primitives and `u64` handles only. A handle packs its entity type tag
//! above the table's slot and generation bits, so passing a texture where a
//! buffer is expected is caught like any stale handle.
//!
//! No error crosses this boundary: a failing slot logs the error and aborts
//! the process.

use std::ffi::{c_char, c_void, CStr};

use crate::gpu::context::Context;
use crate::gpu::error::{GPUError, Result};
use crate::gpu::null::NullDevice;
use crate::gpu::structs::*;
use crate::gpu::table::TableEntity;
use crate::gpu::Backend;
use crate::utils::Handle;
use crate::window::NativeWindow;

/// Packs a typed handle with its entity tag.
pub fn pack<T: TableEntity>(handle: Handle<T>) -> u64 {
    ((T::TAG as u64) << 32) | handle.to_raw() as u64
}

/// Recovers a typed handle, rejecting handles of any other entity type.
pub fn unpack<T: TableEntity>(raw: u64) -> Result<Handle<T>> {
    if (raw >> 32) as u32 != T::TAG {
        return Err(GPUError::InvalidHandle(T::NAME));
    }
    Ok(Handle::from_raw(raw as u32))
}

fn decode<T>(value: Option<T>, what: &'static str, raw: u32) -> Result<T> {
    value.ok_or(GPUError::InvalidEnum(what, raw))
}

fn check<T>(op: &'static str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            log::error!("{} failed: {}", op, err);
            std::process::abort()
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TextureDescRaw {
    pub format: u32,
    /// `TextureUsage` bits.
    pub usage: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
}

impl TextureDescRaw {
    pub fn decode(&self) -> Result<TextureDesc> {
        Ok(TextureDesc {
            format: decode(Format::from_u32(self.format), "format", self.format)?,
            usage: TextureUsage::from_bits_truncate(self.usage),
            width: self.width,
            height: self.height,
            face_count: self.face_count.max(1),
            mip_levels: self.mip_levels.max(1),
            sample_count: self.sample_count.max(1),
        })
    }
}

impl From<&TextureDesc> for TextureDescRaw {
    fn from(desc: &TextureDesc) -> Self {
        Self {
            format: desc.format as u32,
            usage: desc.usage.bits(),
            width: desc.width,
            height: desc.height,
            face_count: desc.face_count,
            mip_levels: desc.mip_levels,
            sample_count: desc.sample_count,
        }
    }
}

/// [`RenderPassDescriptor`] with each optional field behind a `has_` flag.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderPassDescriptorRaw {
    pub has_color_target: bool,
    pub color_target: u64,
    pub has_color_format: bool,
    pub color_format: u32,
    pub has_clear_color: bool,
    pub clear_color: [f32; 4],
    pub has_blend_mode: bool,
    pub blend_mode: u32,
    pub has_depth_target: bool,
    pub depth_target: u64,
    pub has_depth_operation: bool,
    pub depth_operation: u32,
    pub has_primitive_topology: bool,
    pub primitive_topology: u32,
}

impl RenderPassDescriptorRaw {
    pub fn decode(&self) -> Result<RenderPassDescriptor> {
        let mut pass = RenderPassDescriptor::default();
        if self.has_color_target {
            pass.color_target = Some(unpack(self.color_target)?);
        }
        if self.has_color_format {
            let format = Format::from_u32(self.color_format);
            pass.color_format = Some(decode(format, "format", self.color_format)?);
        }
        if self.has_clear_color {
            pass.clear_color = Some(self.clear_color);
        }
        if self.has_blend_mode {
            let mode = BlendMode::from_u32(self.blend_mode);
            pass.blend_mode = Some(decode(mode, "blend mode", self.blend_mode)?);
        }
        if self.has_depth_target {
            pass.depth_target = Some(unpack(self.depth_target)?);
        }
        if self.has_depth_operation {
            let op = DepthOperation::from_u32(self.depth_operation);
            pass.depth_operation = Some(decode(op, "depth operation", self.depth_operation)?);
        }
        if self.has_primitive_topology {
            let topology = PrimitiveTopology::from_u32(self.primitive_topology);
            pass.primitive_topology =
                Some(decode(topology, "primitive topology", self.primitive_topology)?);
        }
        Ok(pass)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FenceValueRaw {
    pub queue: u64,
    pub value: u64,
}

impl FenceValueRaw {
    pub fn decode(&self) -> Result<FenceValue> {
        Ok(FenceValue {
            queue: unpack(self.queue)?,
            value: self.value,
        })
    }
}

impl From<FenceValue> for FenceValueRaw {
    fn from(fence: FenceValue) -> Self {
        Self {
            queue: pack(fence.queue),
            value: fence.value,
        }
    }
}

type Ctx = *mut c_void;

/// Operations of one context. Every slot takes [`CallTable::context`] first.
#[repr(C)]
pub struct CallTable {
    pub context: Ctx,
    pub backend: u32,
    destroy: unsafe extern "C" fn(Ctx),

    pub create_heap: unsafe extern "C" fn(Ctx, u32, u64) -> u64,
    pub delete_heap: unsafe extern "C" fn(Ctx, u64),
    pub buffer_allocation_info: unsafe extern "C" fn(Ctx, u64) -> AllocationInfo,
    pub texture_allocation_info: unsafe extern "C" fn(Ctx, *const TextureDescRaw) -> AllocationInfo,
    pub create_buffer: unsafe extern "C" fn(Ctx, u64, u64, u64) -> u64,
    pub delete_buffer: unsafe extern "C" fn(Ctx, u64),
    pub buffer_cpu_pointer: unsafe extern "C" fn(Ctx, u64) -> *mut u8,
    pub release_buffer_cpu_pointer: unsafe extern "C" fn(Ctx, u64),
    pub buffer_shader_resource_index: unsafe extern "C" fn(Ctx, u64) -> u32,
    pub create_texture: unsafe extern "C" fn(Ctx, u64, u64, *const TextureDescRaw) -> u64,
    pub delete_texture: unsafe extern "C" fn(Ctx, u64),
    pub texture_shader_resource_index: unsafe extern "C" fn(Ctx, u64) -> u32,

    /// Container bytes, length and an optional NUL-terminated compute entry point.
    pub create_shader: unsafe extern "C" fn(Ctx, *const u8, usize, *const c_char) -> u64,
    pub delete_shader: unsafe extern "C" fn(Ctx, u64),
    pub create_pipeline_state: unsafe extern "C" fn(Ctx, u64, *const RenderPassDescriptorRaw) -> u64,
    pub delete_pipeline_state: unsafe extern "C" fn(Ctx, u64),
    pub create_query_buffer: unsafe extern "C" fn(Ctx, u32, u32) -> u64,
    pub delete_query_buffer: unsafe extern "C" fn(Ctx, u64),

    pub create_command_queue: unsafe extern "C" fn(Ctx, u32) -> u64,
    pub delete_command_queue: unsafe extern "C" fn(Ctx, u64),
    pub create_command_list: unsafe extern "C" fn(Ctx, u64) -> u64,
    pub commit_command_list: unsafe extern "C" fn(Ctx, u64),
    pub reset_command_list: unsafe extern "C" fn(Ctx, u64),
    pub delete_command_list: unsafe extern "C" fn(Ctx, u64),
    /// Queue, list array, list count, wait array, wait count.
    pub execute_command_lists:
        unsafe extern "C" fn(Ctx, u64, *const u64, usize, *const FenceValueRaw, usize) -> FenceValueRaw,
    pub wait_for_command_queue_on_cpu: unsafe extern "C" fn(Ctx, FenceValueRaw),
    pub command_queue_completed_value: unsafe extern "C" fn(Ctx, u64) -> u64,
    pub timestamp_frequency: unsafe extern "C" fn(Ctx, u64) -> u64,
    pub advance_frame: unsafe extern "C" fn(Ctx),
    pub wait_idle: unsafe extern "C" fn(Ctx),

    /// List, buffer or texture handle, `ResourceState`.
    pub transition_to_state: unsafe extern "C" fn(Ctx, u64, u64, u32),
    pub begin_render_pass: unsafe extern "C" fn(Ctx, u64, *const RenderPassDescriptorRaw),
    pub end_render_pass: unsafe extern "C" fn(Ctx, u64),
    pub set_pipeline_state: unsafe extern "C" fn(Ctx, u64, u64),
    pub set_shader_resource_heap: unsafe extern "C" fn(Ctx, u64),
    pub set_shader_constants: unsafe extern "C" fn(Ctx, u64, *const u32, usize),
    pub dispatch_mesh: unsafe extern "C" fn(Ctx, u64, u32, u32, u32),
    pub dispatch: unsafe extern "C" fn(Ctx, u64, u32, u32, u32),
    pub draw: unsafe extern "C" fn(Ctx, u64, u32, u32),
    /// List, source, source offset, destination, destination offset, size.
    pub copy_buffer_region: unsafe extern "C" fn(Ctx, u64, u64, u64, u64, u64, u64),
    pub copy_buffer_to_texture: unsafe extern "C" fn(Ctx, u64, u64, u64, u64),
    pub begin_query: unsafe extern "C" fn(Ctx, u64, u64, u32),
    pub end_query: unsafe extern "C" fn(Ctx, u64, u64, u32),
    /// List, query buffer, first query, count, destination buffer, offset.
    pub resolve_query_data: unsafe extern "C" fn(Ctx, u64, u64, u32, u32, u64, u64),
    pub begin_debug_marker: unsafe extern "C" fn(Ctx, u64, *const c_char),
    pub end_debug_marker: unsafe extern "C" fn(Ctx, u64),

    /// `NativeWindow` from the window service, queue, width, height, format,
    /// buffer count.
    pub create_swap_chain: unsafe extern "C" fn(Ctx, *const c_void, u64, u32, u32, u32, u32) -> u64,
    pub resize_swap_chain: unsafe extern "C" fn(Ctx, u64, u32, u32),
    pub wait_for_swap_chain_on_cpu: unsafe extern "C" fn(Ctx, u64) -> u32,
    pub swap_chain_back_buffer: unsafe extern "C" fn(Ctx, u64) -> u64,
    pub present: unsafe extern "C" fn(Ctx, u64) -> FenceValueRaw,
    pub delete_swap_chain: unsafe extern "C" fn(Ctx, u64),
}

/// Creates a context on `backend` (a [`BackendKind`] value) and returns its
/// call table. Release it with [`hikari_destroy_call_table`].
#[no_mangle]
pub extern "C" fn hikari_create_call_table(
    backend: u32,
    frames_in_flight: u32,
    validation: bool,
) -> *mut CallTable {
    let table = decode(BackendKind::from_u32(backend), "backend", backend).and_then(|backend| {
        create_call_table(ContextInfo {
            backend,
            frames_in_flight: frames_in_flight.max(1) as usize,
            validation,
            ..Default::default()
        })
    });
    Box::into_raw(Box::new(check("hikari_create_call_table", table)))
}

/// Destroys the context behind `table`, then the table itself.
///
/// # Safety
/// `table` must come from [`hikari_create_call_table`] and not be used again.
#[no_mangle]
pub unsafe extern "C" fn hikari_destroy_call_table(table: *mut CallTable) {
    if table.is_null() {
        return;
    }
    let table = Box::from_raw(table);
    (table.destroy)(table.context);
}

/// Builds the call table for a context described by `info`.
pub fn create_call_table(info: ContextInfo) -> Result<CallTable> {
    match resolve_backend(info.backend) {
        BackendKind::Null => {
            let device = NullDevice::new(&info);
            Ok(CallTable::new(Context::new(device, info)))
        }
        #[cfg(feature = "hikari-vulkan")]
        BackendKind::Vulkan => {
            let device = crate::gpu::vulkan::VulkanDevice::new(&info)?;
            Ok(CallTable::new(Context::new(device, info)))
        }
        #[cfg(all(windows, feature = "hikari-dx12"))]
        BackendKind::Direct3D12 => {
            let device = crate::gpu::d3d12::D3D12Device::new(&info)?;
            Ok(CallTable::new(Context::new(device, info)))
        }
        _ => Err(GPUError::Unsupported("backend is not compiled in")),
    }
}

fn resolve_backend(kind: BackendKind) -> BackendKind {
    match kind {
        BackendKind::Auto if cfg!(all(windows, feature = "hikari-dx12")) => BackendKind::Direct3D12,
        BackendKind::Auto => BackendKind::Vulkan,
        other => other,
    }
}

impl CallTable {
    /// Binds every slot to `context`, which the table then owns.
    pub fn new<B: Backend + 'static>(context: Context<B>) -> Self {
        let backend = context.backend().kind() as u32;
        Self {
            context: Box::into_raw(Box::new(context)) as Ctx,
            backend,
            destroy: destroy::<B>,
            create_heap: create_heap::<B>,
            delete_heap: delete_heap::<B>,
            buffer_allocation_info: buffer_allocation_info::<B>,
            texture_allocation_info: texture_allocation_info::<B>,
            create_buffer: create_buffer::<B>,
            delete_buffer: delete_buffer::<B>,
            buffer_cpu_pointer: buffer_cpu_pointer::<B>,
            release_buffer_cpu_pointer: release_buffer_cpu_pointer::<B>,
            buffer_shader_resource_index: buffer_shader_resource_index::<B>,
            create_texture: create_texture::<B>,
            delete_texture: delete_texture::<B>,
            texture_shader_resource_index: texture_shader_resource_index::<B>,
            create_shader: create_shader::<B>,
            delete_shader: delete_shader::<B>,
            create_pipeline_state: create_pipeline_state::<B>,
            delete_pipeline_state: delete_pipeline_state::<B>,
            create_query_buffer: create_query_buffer::<B>,
            delete_query_buffer: delete_query_buffer::<B>,
            create_command_queue: create_command_queue::<B>,
            delete_command_queue: delete_command_queue::<B>,
            create_command_list: create_command_list::<B>,
            commit_command_list: commit_command_list::<B>,
            reset_command_list: reset_command_list::<B>,
            delete_command_list: delete_command_list::<B>,
            execute_command_lists: execute_command_lists::<B>,
            wait_for_command_queue_on_cpu: wait_for_command_queue_on_cpu::<B>,
            command_queue_completed_value: command_queue_completed_value::<B>,
            timestamp_frequency: timestamp_frequency::<B>,
            advance_frame: advance_frame::<B>,
            wait_idle: wait_idle::<B>,
            transition_to_state: transition_to_state::<B>,
            begin_render_pass: begin_render_pass::<B>,
            end_render_pass: end_render_pass::<B>,
            set_pipeline_state: set_pipeline_state::<B>,
            set_shader_resource_heap: set_shader_resource_heap::<B>,
            set_shader_constants: set_shader_constants::<B>,
            dispatch_mesh: dispatch_mesh::<B>,
            dispatch: dispatch::<B>,
            draw: draw::<B>,
            copy_buffer_region: copy_buffer_region::<B>,
            copy_buffer_to_texture: copy_buffer_to_texture::<B>,
            begin_query: begin_query::<B>,
            end_query: end_query::<B>,
            resolve_query_data: resolve_query_data::<B>,
            begin_debug_marker: begin_debug_marker::<B>,
            end_debug_marker: end_debug_marker::<B>,
            create_swap_chain: create_swap_chain::<B>,
            resize_swap_chain: resize_swap_chain::<B>,
            wait_for_swap_chain_on_cpu: wait_for_swap_chain_on_cpu::<B>,
            swap_chain_back_buffer: swap_chain_back_buffer::<B>,
            present: present::<B>,
            delete_swap_chain: delete_swap_chain::<B>,
        }
    }
}

unsafe fn context<'a, B: Backend>(ctx: Ctx) -> &'a mut Context<B> {
    match (ctx as *mut Context<B>).as_mut() {
        Some(context) => context,
        None => {
            log::error!("call table used without a context");
            std::process::abort()
        }
    }
}

unsafe fn slice<'a, T>(ptr: *const T, len: usize) -> &'a [T] {
    if len == 0 || ptr.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len)
    }
}

unsafe fn reference<'a, T>(ptr: *const T, what: &'static str) -> Result<&'a T> {
    ptr.as_ref().ok_or(GPUError::InvalidHandle(what))
}

unsafe extern "C" fn destroy<B: Backend>(ctx: Ctx) {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx as *mut Context<B>));
    }
}

// Memory

unsafe extern "C" fn create_heap<B: Backend>(ctx: Ctx, kind: u32, size: u64) -> u64 {
    let ctx = context::<B>(ctx);
    let heap = decode(HeapKind::from_u32(kind), "heap kind", kind)
        .and_then(|kind| ctx.create_heap(kind, size));
    pack(check("create_heap", heap))
}

unsafe extern "C" fn delete_heap<B: Backend>(ctx: Ctx, heap: u64) {
    let ctx = context::<B>(ctx);
    check("delete_heap", unpack(heap).and_then(|h| ctx.delete_heap(h)))
}

unsafe extern "C" fn buffer_allocation_info<B: Backend>(ctx: Ctx, size: u64) -> AllocationInfo {
    check("buffer_allocation_info", context::<B>(ctx).buffer_allocation_info(size))
}

unsafe extern "C" fn texture_allocation_info<B: Backend>(
    ctx: Ctx,
    desc: *const TextureDescRaw,
) -> AllocationInfo {
    let ctx = context::<B>(ctx);
    let info = reference(desc, "texture description")
        .and_then(|desc| desc.decode())
        .and_then(|desc| ctx.texture_allocation_info(&desc));
    check("texture_allocation_info", info)
}

unsafe extern "C" fn create_buffer<B: Backend>(ctx: Ctx, heap: u64, offset: u64, size: u64) -> u64 {
    let ctx = context::<B>(ctx);
    let buffer = unpack(heap).and_then(|heap| ctx.create_buffer(heap, offset, size));
    pack(check("create_buffer", buffer))
}

unsafe extern "C" fn delete_buffer<B: Backend>(ctx: Ctx, buffer: u64) {
    let ctx = context::<B>(ctx);
    check("delete_buffer", unpack(buffer).and_then(|b| ctx.delete_buffer(b)))
}

unsafe extern "C" fn buffer_cpu_pointer<B: Backend>(ctx: Ctx, buffer: u64) -> *mut u8 {
    let ctx = context::<B>(ctx);
    check("buffer_cpu_pointer", unpack(buffer).and_then(|b| ctx.buffer_cpu_pointer(b)))
}

unsafe extern "C" fn release_buffer_cpu_pointer<B: Backend>(ctx: Ctx, buffer: u64) {
    let ctx = context::<B>(ctx);
    let released = unpack(buffer).and_then(|b| ctx.release_buffer_cpu_pointer(b));
    check("release_buffer_cpu_pointer", released)
}

unsafe extern "C" fn buffer_shader_resource_index<B: Backend>(ctx: Ctx, buffer: u64) -> u32 {
    let ctx = context::<B>(ctx);
    let index = unpack(buffer).and_then(|b| ctx.buffer_shader_resource_index(b));
    check("buffer_shader_resource_index", index)
}

unsafe extern "C" fn create_texture<B: Backend>(
    ctx: Ctx,
    heap: u64,
    offset: u64,
    desc: *const TextureDescRaw,
) -> u64 {
    let ctx = context::<B>(ctx);
    let texture = reference(desc, "texture description")
        .and_then(|desc| desc.decode())
        .and_then(|desc| ctx.create_texture(unpack(heap)?, offset, &desc));
    pack(check("create_texture", texture))
}

unsafe extern "C" fn delete_texture<B: Backend>(ctx: Ctx, texture: u64) {
    let ctx = context::<B>(ctx);
    check("delete_texture", unpack(texture).and_then(|t| ctx.delete_texture(t)))
}

unsafe extern "C" fn texture_shader_resource_index<B: Backend>(ctx: Ctx, texture: u64) -> u32 {
    let ctx = context::<B>(ctx);
    let index = unpack(texture).and_then(|t| ctx.texture_shader_resource_index(t));
    check("texture_shader_resource_index", index)
}

// Shaders, pipelines and queries

unsafe extern "C" fn create_shader<B: Backend>(
    ctx: Ctx,
    bytes: *const u8,
    len: usize,
    compute_entry_point: *const c_char,
) -> u64 {
    let ctx = context::<B>(ctx);
    let entry = match compute_entry_point.is_null() {
        true => Ok(None),
        false => CStr::from_ptr(compute_entry_point)
            .to_str()
            .map(Some)
            .map_err(|_| GPUError::MalformedShaderContainer("entry point is not UTF-8".to_string())),
    };
    let shader = entry.and_then(|entry| ctx.create_shader(slice(bytes, len), entry));
    pack(check("create_shader", shader))
}

unsafe extern "C" fn delete_shader<B: Backend>(ctx: Ctx, shader: u64) {
    let ctx = context::<B>(ctx);
    check("delete_shader", unpack(shader).and_then(|s| ctx.delete_shader(s)))
}

unsafe extern "C" fn create_pipeline_state<B: Backend>(
    ctx: Ctx,
    shader: u64,
    pass: *const RenderPassDescriptorRaw,
) -> u64 {
    let ctx = context::<B>(ctx);
    let pipeline = reference(pass, "render pass descriptor")
        .and_then(|pass| pass.decode())
        .and_then(|pass| ctx.create_pipeline_state(unpack(shader)?, &pass));
    pack(check("create_pipeline_state", pipeline))
}

unsafe extern "C" fn delete_pipeline_state<B: Backend>(ctx: Ctx, pipeline: u64) {
    let ctx = context::<B>(ctx);
    let deleted = unpack(pipeline).and_then(|p| ctx.delete_pipeline_state(p));
    check("delete_pipeline_state", deleted)
}

unsafe extern "C" fn create_query_buffer<B: Backend>(ctx: Ctx, ty: u32, count: u32) -> u64 {
    let ctx = context::<B>(ctx);
    let ty = match ty {
        0 => Ok(QueryType::Timestamp),
        other => Err(GPUError::InvalidEnum("query type", other)),
    };
    let query = ty.and_then(|ty| ctx.create_query_buffer(ty, count));
    pack(check("create_query_buffer", query))
}

unsafe extern "C" fn delete_query_buffer<B: Backend>(ctx: Ctx, query: u64) {
    let ctx = context::<B>(ctx);
    check("delete_query_buffer", unpack(query).and_then(|q| ctx.delete_query_buffer(q)))
}

// Queues and submission

unsafe extern "C" fn create_command_queue<B: Backend>(ctx: Ctx, ty: u32) -> u64 {
    let ctx = context::<B>(ctx);
    let queue = decode(QueueType::from_u32(ty), "queue type", ty)
        .and_then(|ty| ctx.create_command_queue(ty));
    pack(check("create_command_queue", queue))
}

unsafe extern "C" fn delete_command_queue<B: Backend>(ctx: Ctx, queue: u64) {
    let ctx = context::<B>(ctx);
    check("delete_command_queue", unpack(queue).and_then(|q| ctx.delete_command_queue(q)))
}

unsafe extern "C" fn create_command_list<B: Backend>(ctx: Ctx, queue: u64) -> u64 {
    let ctx = context::<B>(ctx);
    let list = unpack(queue).and_then(|q| ctx.create_command_list(q));
    pack(check("create_command_list", list))
}

unsafe extern "C" fn commit_command_list<B: Backend>(ctx: Ctx, list: u64) {
    let ctx = context::<B>(ctx);
    check("commit_command_list", unpack(list).and_then(|l| ctx.commit_command_list(l)))
}

unsafe extern "C" fn reset_command_list<B: Backend>(ctx: Ctx, list: u64) {
    let ctx = context::<B>(ctx);
    check("reset_command_list", unpack(list).and_then(|l| ctx.reset_command_list(l)))
}

unsafe extern "C" fn delete_command_list<B: Backend>(ctx: Ctx, list: u64) {
    let ctx = context::<B>(ctx);
    check("delete_command_list", unpack(list).and_then(|l| ctx.delete_command_list(l)))
}

unsafe extern "C" fn execute_command_lists<B: Backend>(
    ctx: Ctx,
    queue: u64,
    lists: *const u64,
    list_count: usize,
    waits: *const FenceValueRaw,
    wait_count: usize,
) -> FenceValueRaw {
    let ctx = context::<B>(ctx);
    let mut submit = || -> Result<FenceValue> {
        let lists = slice(lists, list_count)
            .iter()
            .map(|&l| unpack(l))
            .collect::<Result<Vec<_>>>()?;
        let waits = slice(waits, wait_count)
            .iter()
            .map(FenceValueRaw::decode)
            .collect::<Result<Vec<_>>>()?;
        ctx.execute_command_lists(unpack(queue)?, &lists, &waits)
    };
    check("execute_command_lists", submit()).into()
}

unsafe extern "C" fn wait_for_command_queue_on_cpu<B: Backend>(ctx: Ctx, fence: FenceValueRaw) {
    let ctx = context::<B>(ctx);
    let waited = fence
        .decode()
        .and_then(|f| ctx.wait_for_command_queue_on_cpu(f));
    check("wait_for_command_queue_on_cpu", waited)
}

unsafe extern "C" fn command_queue_completed_value<B: Backend>(ctx: Ctx, queue: u64) -> u64 {
    let ctx = context::<B>(ctx);
    let value = unpack(queue).and_then(|q| ctx.command_queue_completed_value(q));
    check("command_queue_completed_value", value)
}

unsafe extern "C" fn timestamp_frequency<B: Backend>(ctx: Ctx, queue: u64) -> u64 {
    let ctx = context::<B>(ctx);
    check("timestamp_frequency", unpack(queue).and_then(|q| ctx.timestamp_frequency(q)))
}

unsafe extern "C" fn advance_frame<B: Backend>(ctx: Ctx) {
    context::<B>(ctx).advance_frame();
}

unsafe extern "C" fn wait_idle<B: Backend>(ctx: Ctx) {
    check("wait_idle", context::<B>(ctx).wait_idle())
}

// Recording

unsafe extern "C" fn transition_to_state<B: Backend>(ctx: Ctx, list: u64, resource: u64, state: u32) {
    let ctx = context::<B>(ctx);
    let mut transition = || -> Result<()> {
        let list = unpack(list)?;
        let state = decode(resource_state(state), "resource state", state)?;
        match (resource >> 32) as u32 {
            GraphicsBuffer::TAG => ctx.transition_to_state(list, unpack::<GraphicsBuffer>(resource)?, state),
            Texture::TAG => ctx.transition_to_state(list, unpack::<Texture>(resource)?, state),
            _ => Err(GPUError::InvalidHandle("buffer or texture")),
        }
    };
    check("transition_to_state", transition())
}

fn resource_state(raw: u32) -> Option<ResourceState> {
    use ResourceState::*;
    [
        Common,
        CopySource,
        CopyDestination,
        GenericRead,
        ShaderRead,
        ShaderWrite,
        RenderTarget,
        DepthWrite,
        DepthRead,
        Present,
    ]
    .get(raw as usize)
    .copied()
}

unsafe extern "C" fn begin_render_pass<B: Backend>(
    ctx: Ctx,
    list: u64,
    pass: *const RenderPassDescriptorRaw,
) {
    let ctx = context::<B>(ctx);
    let begun = reference(pass, "render pass descriptor")
        .and_then(|pass| pass.decode())
        .and_then(|pass| ctx.begin_render_pass(unpack(list)?, &pass));
    check("begin_render_pass", begun)
}

unsafe extern "C" fn end_render_pass<B: Backend>(ctx: Ctx, list: u64) {
    let ctx = context::<B>(ctx);
    check("end_render_pass", unpack(list).and_then(|l| ctx.end_render_pass(l)))
}

unsafe extern "C" fn set_pipeline_state<B: Backend>(ctx: Ctx, list: u64, pipeline: u64) {
    let ctx = context::<B>(ctx);
    let bound = unpack(list).and_then(|l| ctx.set_pipeline_state(l, unpack(pipeline)?));
    check("set_pipeline_state", bound)
}

unsafe extern "C" fn set_shader_resource_heap<B: Backend>(ctx: Ctx, list: u64) {
    let ctx = context::<B>(ctx);
    check("set_shader_resource_heap", unpack(list).and_then(|l| ctx.set_shader_resource_heap(l)))
}

unsafe extern "C" fn set_shader_constants<B: Backend>(ctx: Ctx, list: u64, values: *const u32, count: usize) {
    let ctx = context::<B>(ctx);
    let values = slice(values, count);
    check("set_shader_constants", unpack(list).and_then(|l| ctx.set_shader_constants(l, values)))
}

unsafe extern "C" fn dispatch_mesh<B: Backend>(ctx: Ctx, list: u64, x: u32, y: u32, z: u32) {
    let ctx = context::<B>(ctx);
    check("dispatch_mesh", unpack(list).and_then(|l| ctx.dispatch_mesh(l, x, y, z)))
}

unsafe extern "C" fn dispatch<B: Backend>(ctx: Ctx, list: u64, x: u32, y: u32, z: u32) {
    let ctx = context::<B>(ctx);
    check("dispatch", unpack(list).and_then(|l| ctx.dispatch(l, x, y, z)))
}

unsafe extern "C" fn draw<B: Backend>(ctx: Ctx, list: u64, vertex_count: u32, instance_count: u32) {
    let ctx = context::<B>(ctx);
    check("draw", unpack(list).and_then(|l| ctx.draw(l, vertex_count, instance_count)))
}

unsafe extern "C" fn copy_buffer_region<B: Backend>(
    ctx: Ctx,
    list: u64,
    src: u64,
    src_offset: u64,
    dst: u64,
    dst_offset: u64,
    size: u64,
) {
    let ctx = context::<B>(ctx);
    let copied = unpack(list).and_then(|l| {
        ctx.copy_buffer_region(l, unpack(src)?, src_offset, unpack(dst)?, dst_offset, size)
    });
    check("copy_buffer_region", copied)
}

unsafe extern "C" fn copy_buffer_to_texture<B: Backend>(
    ctx: Ctx,
    list: u64,
    src: u64,
    src_offset: u64,
    dst: u64,
) {
    let ctx = context::<B>(ctx);
    let copied = unpack(list)
        .and_then(|l| ctx.copy_buffer_to_texture(l, unpack(src)?, src_offset, unpack(dst)?));
    check("copy_buffer_to_texture", copied)
}

unsafe extern "C" fn begin_query<B: Backend>(ctx: Ctx, list: u64, query: u64, index: u32) {
    let ctx = context::<B>(ctx);
    let begun = unpack(list).and_then(|l| ctx.begin_query(l, unpack(query)?, index));
    check("begin_query", begun)
}

unsafe extern "C" fn end_query<B: Backend>(ctx: Ctx, list: u64, query: u64, index: u32) {
    let ctx = context::<B>(ctx);
    let ended = unpack(list).and_then(|l| ctx.end_query(l, unpack(query)?, index));
    check("end_query", ended)
}

unsafe extern "C" fn resolve_query_data<B: Backend>(
    ctx: Ctx,
    list: u64,
    query: u64,
    start: u32,
    count: u32,
    dst: u64,
    dst_offset: u64,
) {
    let ctx = context::<B>(ctx);
    let resolved = unpack(list).and_then(|l| {
        ctx.resolve_query_data(l, unpack(query)?, start, count, unpack(dst)?, dst_offset)
    });
    check("resolve_query_data", resolved)
}

unsafe extern "C" fn begin_debug_marker<B: Backend>(ctx: Ctx, list: u64, name: *const c_char) {
    let ctx = context::<B>(ctx);
    let name = match name.is_null() {
        true => std::borrow::Cow::Borrowed(""),
        false => CStr::from_ptr(name).to_string_lossy(),
    };
    check("begin_debug_marker", unpack(list).and_then(|l| ctx.begin_debug_marker(l, &name)))
}

unsafe extern "C" fn end_debug_marker<B: Backend>(ctx: Ctx, list: u64) {
    let ctx = context::<B>(ctx);
    check("end_debug_marker", unpack(list).and_then(|l| ctx.end_debug_marker(l)))
}

// Presentation

unsafe extern "C" fn create_swap_chain<B: Backend>(
    ctx: Ctx,
    window: *const c_void,
    queue: u64,
    width: u32,
    height: u32,
    format: u32,
    buffer_count: u32,
) -> u64 {
    let ctx = context::<B>(ctx);
    let mut create = || -> Result<Handle<SwapChain>> {
        let window = reference(window as *const NativeWindow, "window")?;
        let info = SwapChainInfo {
            width,
            height,
            format: decode(Format::from_u32(format), "format", format)?,
            buffer_count,
        };
        ctx.create_swap_chain(window, unpack(queue)?, &info)
    };
    pack(check("create_swap_chain", create()))
}

unsafe extern "C" fn resize_swap_chain<B: Backend>(ctx: Ctx, swap_chain: u64, width: u32, height: u32) {
    let ctx = context::<B>(ctx);
    let resized = unpack(swap_chain).and_then(|s| ctx.resize_swap_chain(s, width, height));
    check("resize_swap_chain", resized)
}

unsafe extern "C" fn wait_for_swap_chain_on_cpu<B: Backend>(ctx: Ctx, swap_chain: u64) -> u32 {
    let ctx = context::<B>(ctx);
    let index = unpack(swap_chain).and_then(|s| ctx.wait_for_swap_chain_on_cpu(s));
    check("wait_for_swap_chain_on_cpu", index)
}

unsafe extern "C" fn swap_chain_back_buffer<B: Backend>(ctx: Ctx, swap_chain: u64) -> u64 {
    let ctx = context::<B>(ctx);
    let texture = unpack(swap_chain).and_then(|s| ctx.swap_chain_back_buffer(s));
    pack(check("swap_chain_back_buffer", texture))
}

unsafe extern "C" fn present<B: Backend>(ctx: Ctx, swap_chain: u64) -> FenceValueRaw {
    let ctx = context::<B>(ctx);
    check("present", unpack(swap_chain).and_then(|s| ctx.present(s))).into()
}

unsafe extern "C" fn delete_swap_chain<B: Backend>(ctx: Ctx, swap_chain: u64) {
    let ctx = context::<B>(ctx);
    check("delete_swap_chain", unpack(swap_chain).and_then(|s| ctx.delete_swap_chain(s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_handles_carry_their_type() {
        let handle = Handle::<GraphicsBuffer>::new(7, 3);
        let raw = pack(handle);
        assert_eq!(raw >> 32, GraphicsBuffer::TAG as u64);
        assert_eq!(unpack::<GraphicsBuffer>(raw).unwrap(), handle);
        assert!(matches!(
            unpack::<Texture>(raw),
            Err(GPUError::InvalidHandle("texture"))
        ));
        assert!(unpack::<GraphicsBuffer>(0).is_err());
    }

    #[test]
    fn raw_render_pass_respects_presence_flags() {
        let texture = Handle::<Texture>::new(2, 0);
        let raw = RenderPassDescriptorRaw {
            has_color_target: true,
            color_target: pack(texture),
            has_clear_color: false,
            clear_color: [1.0; 4],
            has_depth_operation: true,
            depth_operation: DepthOperation::ClearWrite as u32,
            ..Default::default()
        };
        let pass = raw.decode().unwrap();
        assert_eq!(pass.color_target, Some(texture));
        assert_eq!(pass.clear_color, None);
        assert_eq!(pass.depth_operation, Some(DepthOperation::ClearWrite));
        assert_eq!(pass.blend_mode, None);
    }

    #[test]
    fn raw_enums_out_of_range_are_rejected() {
        let raw = RenderPassDescriptorRaw {
            has_blend_mode: true,
            blend_mode: 42,
            ..Default::default()
        };
        assert!(matches!(
            raw.decode(),
            Err(GPUError::InvalidEnum("blend mode", 42))
        ));
        assert_eq!(resource_state(9), Some(ResourceState::Present));
        assert_eq!(resource_state(10), None);
    }

    #[test]
    fn null_table_round_trips_a_copy() {
        let table = hikari_create_call_table(BackendKind::Null as u32, 2, false);
        assert!(!table.is_null());
        unsafe {
            let t = &*table;
            let ctx = t.context;
            assert_eq!(t.backend, BackendKind::Null as u32);

            let upload = (t.create_heap)(ctx, HeapKind::Upload as u32, 65536 * 2);
            let src = (t.create_buffer)(ctx, upload, 0, 64);
            let dst = (t.create_buffer)(ctx, upload, 65536, 64);
            let ptr = (t.buffer_cpu_pointer)(ctx, src);
            std::ptr::write_bytes(ptr, 0xAB, 64);

            let queue = (t.create_command_queue)(ctx, QueueType::Copy as u32);
            let list = (t.create_command_list)(ctx, queue);
            (t.copy_buffer_region)(ctx, list, src, 0, dst, 0, 64);
            (t.commit_command_list)(ctx, list);
            let fence = (t.execute_command_lists)(ctx, queue, &list, 1, std::ptr::null(), 0);
            assert_eq!(fence.value, 1);
            (t.wait_for_command_queue_on_cpu)(ctx, fence);

            let out = (t.buffer_cpu_pointer)(ctx, dst);
            assert_eq!(std::slice::from_raw_parts(out, 64), &[0xAB; 64]);
            hikari_destroy_call_table(table);
        }
    }
}
