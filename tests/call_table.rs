mod common;

use std::ffi::{c_void, CString};

use common::{compute_shader_bytes, init_logging};
use hikari::ffi::*;
use hikari::*;

struct Table(*mut CallTable);

impl Table {
    fn null() -> Self {
        init_logging();
        let table = hikari_create_call_table(BackendKind::Null as u32, 2, false);
        assert!(!table.is_null());
        Self(table)
    }

    fn get(&self) -> &CallTable {
        unsafe { &*self.0 }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        unsafe { hikari_destroy_call_table(self.0) };
    }
}

#[test]
fn handles_are_tagged_by_entity_type() {
    let table = Table::null();
    let t = table.get();
    unsafe {
        let heap = (t.create_heap)(t.context, HeapKind::Gpu as u32, 65536);
        let buffer = (t.create_buffer)(t.context, heap, 0, 256);
        let queue = (t.create_command_queue)(t.context, QueueType::Direct as u32);

        assert_ne!(heap >> 32, buffer >> 32);
        assert_ne!(buffer >> 32, queue >> 32);
        assert!(unpack::<GraphicsBuffer>(buffer).is_ok());
        assert!(unpack::<GraphicsHeap>(buffer).is_err());

        let info = (t.buffer_allocation_info)(t.context, 256);
        assert_eq!(info.size, 256);
        assert_eq!(info.alignment, 65536);
    }
}

#[test]
fn compute_dispatch_with_timestamps_through_the_table() {
    let table = Table::null();
    let t = table.get();
    let ctx = t.context;
    unsafe {
        let bytes = compute_shader_bytes();
        let entry = CString::new("CSMain").unwrap();
        let shader = (t.create_shader)(ctx, bytes.as_ptr(), bytes.len(), entry.as_ptr());
        let pass = RenderPassDescriptorRaw::default();
        let pipeline = (t.create_pipeline_state)(ctx, shader, &pass);

        let heap = (t.create_heap)(ctx, HeapKind::ReadBack as u32, 65536);
        let results = (t.create_buffer)(ctx, heap, 0, 16);
        let queries = (t.create_query_buffer)(ctx, QueryType::Timestamp as u32, 2);
        let queue = (t.create_command_queue)(ctx, QueueType::Compute as u32);
        let list = (t.create_command_list)(ctx, queue);

        let marker = CString::new("dispatch").unwrap();
        (t.begin_debug_marker)(ctx, list, marker.as_ptr());
        (t.begin_query)(ctx, list, queries, 0);
        (t.set_pipeline_state)(ctx, list, pipeline);
        (t.set_shader_resource_heap)(ctx, list);
        let constants = [7u32, 8];
        (t.set_shader_constants)(ctx, list, constants.as_ptr(), constants.len());
        (t.dispatch)(ctx, list, 4, 4, 1);
        (t.end_query)(ctx, list, queries, 1);
        (t.end_debug_marker)(ctx, list);
        (t.resolve_query_data)(ctx, list, queries, 0, 2, results, 0);
        (t.commit_command_list)(ctx, list);

        let fence = (t.execute_command_lists)(ctx, queue, &list, 1, std::ptr::null(), 0);
        assert_eq!(fence.queue, queue);
        assert_eq!(fence.value, 1);
        (t.wait_for_command_queue_on_cpu)(ctx, fence);
        assert_eq!((t.command_queue_completed_value)(ctx, queue), 1);

        let ticks = (t.buffer_cpu_pointer)(ctx, results) as *const u64;
        let (start, end) = (ticks.read_unaligned(), ticks.add(1).read_unaligned());
        assert!(end > start);
        assert_eq!((t.timestamp_frequency)(ctx, queue), 1_000_000_000);

        (t.reset_command_list)(ctx, list);
        (t.commit_command_list)(ctx, list);
        let waits = [fence];
        let second = (t.execute_command_lists)(ctx, queue, &list, 1, waits.as_ptr(), 1);
        assert_eq!(second.value, 2);
        (t.wait_idle)(ctx);
    }
}

#[test]
fn swap_chain_frame_through_the_table() {
    let table = Table::null();
    let t = table.get();
    let ctx = t.context;
    let window = NativeWindow::headless(0);
    unsafe {
        let queue = (t.create_command_queue)(ctx, QueueType::Direct as u32);
        let swap_chain = (t.create_swap_chain)(
            ctx,
            &window as *const NativeWindow as *const c_void,
            queue,
            320,
            200,
            Format::BGRA8Unorm as u32,
            3,
        );

        for frame in 0..4u64 {
            let index = (t.wait_for_swap_chain_on_cpu)(ctx, swap_chain);
            assert_eq!(index as u64, frame % 3);
            let back_buffer = (t.swap_chain_back_buffer)(ctx, swap_chain);

            let list = (t.create_command_list)(ctx, queue);
            let pass = RenderPassDescriptorRaw {
                has_color_target: true,
                color_target: back_buffer,
                has_clear_color: true,
                clear_color: [0.0, 0.0, 0.0, 1.0],
                ..Default::default()
            };
            (t.begin_render_pass)(ctx, list, &pass);
            (t.end_render_pass)(ctx, list);
            (t.commit_command_list)(ctx, list);
            (t.execute_command_lists)(ctx, queue, &list, 1, std::ptr::null(), 0);
            let presented = (t.present)(ctx, swap_chain);
            (t.wait_for_command_queue_on_cpu)(ctx, presented);
            (t.delete_command_list)(ctx, list);
        }

        (t.resize_swap_chain)(ctx, swap_chain, 640, 480);
        (t.delete_swap_chain)(ctx, swap_chain);
        (t.delete_command_queue)(ctx, queue);
    }
}

#[test]
fn texture_upload_through_the_table() {
    let table = Table::null();
    let t = table.get();
    let ctx = t.context;
    unsafe {
        let desc = TextureDescRaw::from(&TextureDesc {
            width: 4,
            height: 4,
            ..Default::default()
        });
        let info = (t.texture_allocation_info)(ctx, &desc);
        assert_eq!(info.alignment, 65536);

        let upload = (t.create_heap)(ctx, HeapKind::Upload as u32, 65536);
        let gpu = (t.create_heap)(ctx, HeapKind::Gpu as u32, info.size);
        let staging = (t.create_buffer)(ctx, upload, 0, 64);
        let texture = (t.create_texture)(ctx, gpu, 0, &desc);
        assert_eq!((t.texture_shader_resource_index)(ctx, texture), 1);
        assert_eq!((t.buffer_shader_resource_index)(ctx, staging), 0);

        let ptr = (t.buffer_cpu_pointer)(ctx, staging);
        std::ptr::write_bytes(ptr, 0x7F, 64);
        (t.release_buffer_cpu_pointer)(ctx, staging);

        let queue = (t.create_command_queue)(ctx, QueueType::Copy as u32);
        let list = (t.create_command_list)(ctx, queue);
        (t.copy_buffer_to_texture)(ctx, list, staging, 0, texture);
        (t.transition_to_state)(ctx, list, texture, ResourceState::ShaderRead as u32);
        (t.commit_command_list)(ctx, list);
        let fence = (t.execute_command_lists)(ctx, queue, &list, 1, std::ptr::null(), 0);
        (t.wait_for_command_queue_on_cpu)(ctx, fence);

        (t.delete_texture)(ctx, texture);
        (t.delete_buffer)(ctx, staging);
        (t.delete_heap)(ctx, gpu);
        (t.delete_heap)(ctx, upload);
    }
}
