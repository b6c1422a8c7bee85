#![cfg(all(windows, feature = "hikari-dx12", feature = "hikari-tests"))]

mod common;

use common::{init_logging, submit_and_wait};
use hikari::gpu::d3d12::D3D12Device;
use hikari::*;
use serial_test::serial;

fn context() -> Option<Context<D3D12Device>> {
    init_logging();
    let info = ContextInfo {
        backend: BackendKind::Direct3D12,
        validation: true,
        ..Default::default()
    };
    match D3D12Device::new(&info) {
        Ok(device) => Some(Context::new(device, info)),
        Err(err) => {
            eprintln!("skipping: no usable Direct3D 12 device ({err})");
            None
        }
    }
}

#[test]
#[serial]
fn buffer_round_trips_through_default_heap() {
    let Some(mut ctx) = context() else { return };
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();

    let upload_heap = ctx.create_heap(HeapKind::Upload, 65536).unwrap();
    let gpu_heap = ctx.create_heap(HeapKind::Gpu, 65536).unwrap();
    let readback_heap = ctx.create_heap(HeapKind::ReadBack, 65536).unwrap();
    let upload = ctx.create_buffer(upload_heap, 0, 256).unwrap();
    let device_local = ctx.create_buffer(gpu_heap, 0, 256).unwrap();
    let readback = ctx.create_buffer(readback_heap, 0, 256).unwrap();

    for (i, v) in ctx.map_buffer_mut::<u32>(upload).unwrap().iter_mut().enumerate() {
        *v = 1000 + i as u32;
    }

    let list = ctx.create_command_list(queue).unwrap();
    ctx.copy_buffer_region(list, upload, 0, device_local, 0, 256)
        .unwrap();
    ctx.copy_buffer_region(list, device_local, 0, readback, 0, 256)
        .unwrap();
    submit_and_wait(&mut ctx, queue, list);

    let data = ctx.map_buffer_mut::<u32>(readback).unwrap();
    assert_eq!(data[0], 1000);
    assert_eq!(data[63], 1063);
    assert_eq!(ctx.backend().validation_error_count(), 0);
}

#[test]
#[serial]
fn unaligned_rows_upload_through_staging() {
    let Some(mut ctx) = context() else { return };
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    // 5 texels of 4 bytes give a 20-byte row, short of the 256-byte pitch.
    let desc = TextureDesc {
        width: 5,
        height: 5,
        mip_levels: 3,
        ..Default::default()
    };

    let info = ctx.texture_allocation_info(&desc).unwrap();
    let heap = ctx.create_heap(HeapKind::Gpu, info.size).unwrap();
    let texture = ctx.create_texture(heap, 0, &desc).unwrap();

    let upload_heap = ctx.create_heap(HeapKind::Upload, 65536).unwrap();
    let staging = ctx.create_buffer(upload_heap, 0, desc.packed_size()).unwrap();
    ctx.map_buffer_mut::<u8>(staging).unwrap().fill(0x40);

    let list = ctx.create_command_list(queue).unwrap();
    ctx.copy_buffer_to_texture(list, staging, 0, texture).unwrap();
    ctx.transition_to_state(list, texture, ResourceState::ShaderRead)
        .unwrap();
    submit_and_wait(&mut ctx, queue, list);

    assert_eq!(ctx.resource_state(texture), Some(ResourceState::ShaderRead));
    assert_eq!(ctx.backend().validation_error_count(), 0);
}

#[test]
#[serial]
fn copy_queues_have_no_timestamp_frequency() {
    let Some(mut ctx) = context() else { return };
    let direct = ctx.create_command_queue(QueueType::Direct).unwrap();
    let copy = ctx.create_command_queue(QueueType::Copy).unwrap();

    assert!(ctx.timestamp_frequency(direct).unwrap() > 0);
    assert!(matches!(
        ctx.timestamp_frequency(copy),
        Err(GPUError::Unsupported(_))
    ));
}
