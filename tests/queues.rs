mod common;

use common::{compute_shader_bytes, null_context, null_context_with, submit_and_wait};
use hikari::*;
use proptest::prelude::*;

struct CounterScene {
    upload: Handle<GraphicsBuffer>,
    device_local: Handle<GraphicsBuffer>,
    readback: Handle<GraphicsBuffer>,
}

/// Queue A copies a counter from `upload` into `device_local`; queue B copies
/// `device_local` into `readback`.
fn counter_scene<B: Backend>(ctx: &mut Context<B>, counter: u32) -> CounterScene {
    let upload_heap = ctx.create_heap(HeapKind::Upload, 65536).unwrap();
    let gpu_heap = ctx.create_heap(HeapKind::Gpu, 65536).unwrap();
    let readback_heap = ctx.create_heap(HeapKind::ReadBack, 65536).unwrap();
    let scene = CounterScene {
        upload: ctx.create_buffer(upload_heap, 0, 4).unwrap(),
        device_local: ctx.create_buffer(gpu_heap, 0, 4).unwrap(),
        readback: ctx.create_buffer(readback_heap, 0, 4).unwrap(),
    };
    ctx.map_buffer_mut::<u32>(scene.upload).unwrap()[0] = counter;
    scene
}

#[test]
fn cross_queue_wait_orders_producer_before_consumer() {
    let mut ctx = null_context();
    // The consumer's queue is created first so the device would run it
    // first if nothing held it back.
    let consumer = ctx.create_command_queue(QueueType::Copy).unwrap();
    let producer = ctx.create_command_queue(QueueType::Compute).unwrap();
    let scene = counter_scene(&mut ctx, 42);

    let write = ctx.create_command_list(producer).unwrap();
    ctx.copy_buffer_region(write, scene.upload, 0, scene.device_local, 0, 4)
        .unwrap();
    ctx.commit_command_list(write).unwrap();

    let read = ctx.create_command_list(consumer).unwrap();
    ctx.copy_buffer_region(read, scene.device_local, 0, scene.readback, 0, 4)
        .unwrap();
    ctx.commit_command_list(read).unwrap();

    ctx.backend_mut().set_paused(true);
    let written = ctx.execute_command_lists(producer, &[write], &[]).unwrap();
    let done = ctx
        .execute_command_lists(consumer, &[read], &[written])
        .unwrap();
    assert_eq!(ctx.command_queue_completed_value(consumer).unwrap(), 0);
    ctx.backend_mut().set_paused(false);

    ctx.wait_for_command_queue_on_cpu(done).unwrap();
    assert_eq!(ctx.map_buffer_mut::<u32>(scene.readback).unwrap()[0], 42);
}

#[test]
fn without_a_wait_the_consumer_can_read_stale_data() {
    let mut ctx = null_context();
    let consumer = ctx.create_command_queue(QueueType::Copy).unwrap();
    let producer = ctx.create_command_queue(QueueType::Compute).unwrap();
    let scene = counter_scene(&mut ctx, 42);

    let write = ctx.create_command_list(producer).unwrap();
    ctx.copy_buffer_region(write, scene.upload, 0, scene.device_local, 0, 4)
        .unwrap();
    ctx.commit_command_list(write).unwrap();
    let read = ctx.create_command_list(consumer).unwrap();
    ctx.copy_buffer_region(read, scene.device_local, 0, scene.readback, 0, 4)
        .unwrap();
    ctx.commit_command_list(read).unwrap();

    ctx.backend_mut().set_paused(true);
    let written = ctx.execute_command_lists(producer, &[write], &[]).unwrap();
    let done = ctx.execute_command_lists(consumer, &[read], &[]).unwrap();
    ctx.backend_mut().set_paused(false);

    ctx.wait_for_command_queue_on_cpu(written).unwrap();
    ctx.wait_for_command_queue_on_cpu(done).unwrap();
    assert_eq!(ctx.map_buffer_mut::<u32>(scene.readback).unwrap()[0], 0);
}

#[test]
fn lists_follow_the_open_closed_state_machine() {
    let mut ctx = null_context();
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let other = ctx.create_command_queue(QueueType::Direct).unwrap();
    let list = ctx.create_command_list(queue).unwrap();
    assert_eq!(ctx.command_list_state(list).unwrap(), ListState::Open);

    assert!(matches!(
        ctx.execute_command_lists(queue, &[list], &[]),
        Err(GPUError::InvalidCommandListState {
            expected: ListState::Closed,
            actual: ListState::Open
        })
    ));
    ctx.commit_command_list(list).unwrap();
    assert!(matches!(
        ctx.commit_command_list(list),
        Err(GPUError::InvalidCommandListState { .. })
    ));
    assert!(matches!(
        ctx.begin_debug_marker(list, "closed"),
        Err(GPUError::InvalidCommandListState { .. })
    ));
    assert!(matches!(
        ctx.execute_command_lists(other, &[list], &[]),
        Err(GPUError::QueueMismatch)
    ));

    ctx.reset_command_list(list).unwrap();
    assert_eq!(ctx.command_list_state(list).unwrap(), ListState::Open);
}

#[test]
fn unbalanced_debug_marker_is_rejected() {
    let mut ctx = null_context();
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let list = ctx.create_command_list(queue).unwrap();

    let err = ctx.end_debug_marker(list).unwrap_err();
    assert!(matches!(err, GPUError::UnbalancedDebugMarker), "{err}");
    assert!(err.is_precondition_violation());

    ctx.begin_debug_marker(list, "pass").unwrap();
    ctx.end_debug_marker(list).unwrap();
    assert!(matches!(
        ctx.end_debug_marker(list),
        Err(GPUError::UnbalancedDebugMarker)
    ));
}

#[test]
fn cpu_wait_on_an_unsubmitted_value_is_rejected() {
    let mut ctx = null_context();
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let err = ctx
        .wait_for_command_queue_on_cpu(FenceValue { queue, value: 1 })
        .unwrap_err();
    assert!(matches!(
        err,
        GPUError::FenceNotSubmitted {
            value: 1,
            last_signaled: 0
        }
    ));
}

#[test]
fn allocators_reset_once_per_frame_slot_reuse() {
    let mut ctx = null_context_with(ContextInfo {
        backend: BackendKind::Null,
        frames_in_flight: 2,
        ..Default::default()
    });
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let a = ctx.create_command_list(queue).unwrap();
    let b = ctx.create_command_list(queue).unwrap();
    submit_and_wait(&mut ctx, queue, a);
    submit_and_wait(&mut ctx, queue, b);
    // Same frame: the allocator is already claimed.
    ctx.reset_command_list(a).unwrap();
    assert_eq!(ctx.backend().stats().allocator_resets, 0);

    // Frame 1 uses the second slot for the first time.
    ctx.advance_frame();
    ctx.reset_command_list(b).unwrap();
    assert_eq!(ctx.backend().stats().allocator_resets, 0);

    // Frame 2 comes back to slot 0, which is reset exactly once.
    ctx.advance_frame();
    submit_and_wait(&mut ctx, queue, a);
    submit_and_wait(&mut ctx, queue, b);
    ctx.reset_command_list(a).unwrap();
    ctx.reset_command_list(b).unwrap();
    assert_eq!(ctx.backend().stats().allocator_resets, 1);
}

#[test]
fn timestamps_resolve_in_submission_order() {
    let mut ctx = null_context();
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let heap = ctx.create_heap(HeapKind::ReadBack, 65536).unwrap();
    let results = ctx.create_buffer(heap, 0, 16).unwrap();
    let queries = ctx.create_query_buffer(QueryType::Timestamp, 2).unwrap();

    let shader = ctx
        .create_shader(&compute_shader_bytes(), Some("CSMain"))
        .unwrap();
    let pipeline = ctx
        .create_pipeline_state(shader, &RenderPassDescriptor::default())
        .unwrap();

    let list = ctx.create_command_list(queue).unwrap();
    ctx.begin_debug_marker(list, "timed dispatch").unwrap();
    ctx.begin_query(list, queries, 0).unwrap();
    ctx.set_pipeline_state(list, pipeline).unwrap();
    ctx.dispatch(list, 8, 8, 1).unwrap();
    ctx.end_query(list, queries, 1).unwrap();
    ctx.end_debug_marker(list).unwrap();
    ctx.resolve_query_data(list, queries, 0, 2, results, 0)
        .unwrap();
    assert!(matches!(
        ctx.resolve_query_data(list, queries, 1, 2, results, 0),
        Err(GPUError::OutOfBounds { .. })
    ));
    submit_and_wait(&mut ctx, queue, list);

    let ticks = ctx.map_buffer_mut::<u64>(results).unwrap().to_vec();
    assert!(ticks[1] > ticks[0]);
    let frequency = ctx.timestamp_frequency(queue).unwrap();
    assert_eq!(frequency, hikari::gpu::null::TIMESTAMP_FREQUENCY);
    assert_eq!(ctx.backend().stats().dispatches, 1);
}

#[test]
fn deleting_a_queue_releases_its_lists() {
    let mut ctx = null_context();
    let queue = ctx.create_command_queue(QueueType::Copy).unwrap();
    let list = ctx.create_command_list(queue).unwrap();
    submit_and_wait(&mut ctx, queue, list);

    ctx.delete_command_queue(queue).unwrap();
    assert!(ctx.command_list_state(list).is_err());
    assert!(ctx.command_queue_type(queue).is_err());
}

#[test]
fn queues_presenting_a_swap_chain_cannot_be_deleted() {
    let mut ctx = null_context();
    let compute = ctx.create_command_queue(QueueType::Compute).unwrap();
    let window = NativeWindow::headless(3);
    assert!(matches!(
        ctx.create_swap_chain(&window, compute, &SwapChainInfo::default()),
        Err(GPUError::QueueMismatch)
    ));

    let direct = ctx.create_command_queue(QueueType::Direct).unwrap();
    let swap_chain = ctx
        .create_swap_chain(&window, direct, &SwapChainInfo::default())
        .unwrap();
    assert!(matches!(
        ctx.delete_command_queue(direct),
        Err(GPUError::Unsupported(_))
    ));
    ctx.delete_swap_chain(swap_chain).unwrap();
    ctx.delete_command_queue(direct).unwrap();
}

#[test]
fn stalled_swap_chain_times_out() {
    let mut ctx = null_context_with(ContextInfo {
        backend: BackendKind::Null,
        swap_chain_timeout_ms: 25,
        ..Default::default()
    });
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let swap_chain = ctx
        .create_swap_chain(&NativeWindow::headless(0), queue, &SwapChainInfo::default())
        .unwrap();
    ctx.backend_mut().set_present_stalled(true);
    assert!(matches!(
        ctx.wait_for_swap_chain_on_cpu(swap_chain),
        Err(GPUError::Timeout(25))
    ));
}

#[test]
fn resize_replaces_back_buffers() {
    let mut ctx = null_context();
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let swap_chain = ctx
        .create_swap_chain(&NativeWindow::headless(0), queue, &SwapChainInfo::default())
        .unwrap();
    let before = ctx.swap_chain_back_buffers(swap_chain).unwrap();

    ctx.resize_swap_chain(swap_chain, 640, 480).unwrap();
    let after = ctx.swap_chain_back_buffers(swap_chain).unwrap();
    assert_eq!(after.len(), before.len());
    assert!(before.iter().all(|t| ctx.texture_desc(*t).is_err()));
    let desc = ctx.texture_desc(after[0]).unwrap();
    assert_eq!((desc.width, desc.height), (640, 480));
    assert_eq!(ctx.swap_chain_info(swap_chain).unwrap().width, 640);
}

proptest! {
    #[test]
    fn fence_values_increase_by_one_per_submission(batches in prop::collection::vec(0usize..4, 1..12)) {
        let mut ctx = null_context();
        let queue = ctx.create_command_queue(QueueType::Compute).unwrap();
        let mut expected = 1;
        for lists_in_batch in batches {
            let mut lists = Vec::new();
            for _ in 0..lists_in_batch {
                let list = ctx.create_command_list(queue).unwrap();
                ctx.commit_command_list(list).unwrap();
                lists.push(list);
            }
            let fence = ctx.execute_command_lists(queue, &lists, &[]).unwrap();
            prop_assert_eq!(fence.value, expected);
            prop_assert_eq!(fence.queue, queue);
            expected += 1;
        }
        prop_assert_eq!(ctx.command_queue_completed_value(queue).unwrap(), expected - 1);
    }
}
