#![cfg(all(feature = "hikari-vulkan", feature = "hikari-tests"))]

mod common;

use common::{submit_and_wait, ValidationContext};
use hikari::*;
use serial_test::serial;

fn context() -> Option<ValidationContext> {
    match ValidationContext::headless() {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("skipping: no usable Vulkan device ({err})");
            None
        }
    }
}

#[test]
#[serial]
fn buffer_round_trips_through_device_memory() {
    let Some(mut ctx) = context() else { return };
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();

    let upload_heap = ctx.create_heap(HeapKind::Upload, 65536).unwrap();
    let gpu_heap = ctx.create_heap(HeapKind::Gpu, 65536).unwrap();
    let readback_heap = ctx.create_heap(HeapKind::ReadBack, 65536).unwrap();
    let upload = ctx.create_buffer(upload_heap, 0, 256).unwrap();
    let device_local = ctx.create_buffer(gpu_heap, 0, 256).unwrap();
    let readback = ctx.create_buffer(readback_heap, 0, 256).unwrap();

    for (i, v) in ctx.map_buffer_mut::<u32>(upload).unwrap().iter_mut().enumerate() {
        *v = i as u32 * 3;
    }

    let list = ctx.create_command_list(queue).unwrap();
    ctx.begin_debug_marker(list, "round trip").unwrap();
    ctx.copy_buffer_region(list, upload, 0, device_local, 0, 256)
        .unwrap();
    ctx.copy_buffer_region(list, device_local, 0, readback, 0, 256)
        .unwrap();
    ctx.end_debug_marker(list).unwrap();
    submit_and_wait(&mut ctx, queue, list);

    let data = ctx.map_buffer_mut::<u32>(readback).unwrap();
    assert_eq!(data[0], 0);
    assert_eq!(data[63], 189);
}

#[test]
#[serial]
fn copy_queue_waits_for_compute_queue() {
    let Some(mut ctx) = context() else { return };
    let producer = ctx.create_command_queue(QueueType::Compute).unwrap();
    let consumer = ctx.create_command_queue(QueueType::Copy).unwrap();

    let upload_heap = ctx.create_heap(HeapKind::Upload, 65536).unwrap();
    let gpu_heap = ctx.create_heap(HeapKind::Gpu, 65536).unwrap();
    let readback_heap = ctx.create_heap(HeapKind::ReadBack, 65536).unwrap();
    let upload = ctx.create_buffer(upload_heap, 0, 4).unwrap();
    let device_local = ctx.create_buffer(gpu_heap, 0, 4).unwrap();
    let readback = ctx.create_buffer(readback_heap, 0, 4).unwrap();
    ctx.map_buffer_mut::<u32>(upload).unwrap()[0] = 7;

    let write = ctx.create_command_list(producer).unwrap();
    ctx.copy_buffer_region(write, upload, 0, device_local, 0, 4)
        .unwrap();
    ctx.commit_command_list(write).unwrap();
    let written = ctx.execute_command_lists(producer, &[write], &[]).unwrap();

    let read = ctx.create_command_list(consumer).unwrap();
    ctx.copy_buffer_region(read, device_local, 0, readback, 0, 4)
        .unwrap();
    ctx.commit_command_list(read).unwrap();
    let done = ctx
        .execute_command_lists(consumer, &[read], &[written])
        .unwrap();

    ctx.wait_for_command_queue_on_cpu(done).unwrap();
    assert!(ctx.command_queue_completed_value(consumer).unwrap() >= done.value);
    assert_eq!(ctx.map_buffer_mut::<u32>(readback).unwrap()[0], 7);
}

#[test]
#[serial]
fn placed_textures_accept_uploads() {
    let Some(mut ctx) = context() else { return };
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let desc = TextureDesc {
        width: 16,
        height: 16,
        mip_levels: 2,
        ..Default::default()
    };

    let info = ctx.texture_allocation_info(&desc).unwrap();
    assert!(info.size >= desc.packed_size());
    assert!(info.alignment.is_power_of_two());

    let heap = ctx.create_heap(HeapKind::Gpu, info.size * 2 + info.alignment).unwrap();
    let first = ctx.create_texture(heap, 0, &desc).unwrap();
    let second = ctx
        .create_texture(heap, hikari::utils::align_up(info.size, info.alignment), &desc)
        .unwrap();
    assert_ne!(
        ctx.texture_shader_resource_index(first).unwrap(),
        ctx.texture_shader_resource_index(second).unwrap()
    );

    let upload_heap = ctx.create_heap(HeapKind::Upload, 65536).unwrap();
    let staging = ctx.create_buffer(upload_heap, 0, desc.packed_size()).unwrap();
    ctx.map_buffer_mut::<u8>(staging).unwrap().fill(0x7f);

    let list = ctx.create_command_list(queue).unwrap();
    ctx.copy_buffer_to_texture(list, staging, 0, first).unwrap();
    ctx.transition_to_state(list, first, ResourceState::ShaderRead)
        .unwrap();
    submit_and_wait(&mut ctx, queue, list);
    assert_eq!(ctx.resource_state(first), Some(ResourceState::ShaderRead));
}

#[test]
#[serial]
fn timestamps_resolve_in_order() {
    let Some(mut ctx) = context() else { return };
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let frequency = match ctx.timestamp_frequency(queue) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("skipping: {err}");
            return;
        }
    };
    assert!(frequency > 0);

    let query = ctx.create_query_buffer(QueryType::Timestamp, 2).unwrap();
    let readback_heap = ctx.create_heap(HeapKind::ReadBack, 65536).unwrap();
    let results = ctx.create_buffer(readback_heap, 0, 16).unwrap();

    let list = ctx.create_command_list(queue).unwrap();
    ctx.begin_query(list, query, 0).unwrap();
    ctx.end_query(list, query, 1).unwrap();
    ctx.resolve_query_data(list, query, 0, 2, results, 0).unwrap();
    submit_and_wait(&mut ctx, queue, list);

    let ticks = ctx.map_buffer_mut::<u64>(results).unwrap();
    assert!(ticks[1] >= ticks[0]);
}

#[test]
#[serial]
fn headless_window_cannot_present() {
    let Some(mut ctx) = context() else { return };
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let err = ctx
        .create_swap_chain(&NativeWindow::headless(1), queue, &SwapChainInfo::default())
        .unwrap_err();
    assert!(matches!(err, GPUError::Unsupported(_)));
}
