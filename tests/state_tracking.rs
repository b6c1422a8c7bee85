mod common;

use common::{graphics_shader_bytes, null_context, submit_and_wait};
use hikari::*;

#[test]
fn repeated_transition_emits_one_barrier() {
    let mut ctx = null_context();
    let heap = ctx.create_heap(HeapKind::Gpu, 65536).unwrap();
    let buffer = ctx.create_buffer(heap, 0, 1024).unwrap();
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let list = ctx.create_command_list(queue).unwrap();
    ctx.enable_barrier_log();

    ctx.transition_to_state(list, buffer, ResourceState::ShaderRead)
        .unwrap();
    assert_eq!(ctx.resource_state(buffer), Some(ResourceState::ShaderRead));
    ctx.transition_to_state(list, buffer, ResourceState::ShaderRead)
        .unwrap();
    assert_eq!(ctx.resource_state(buffer), Some(ResourceState::ShaderRead));

    let log = ctx.take_barrier_log();
    assert_eq!(
        log,
        vec![Transition {
            resource: TrackedResource::Buffer(buffer),
            before: ResourceState::CopyDestination,
            after: ResourceState::ShaderRead,
        }]
    );
    assert_eq!(ctx.backend().stats().barriers, 1);
    assert_eq!(ctx.backend().stats().state_mismatches, 0);
}

#[test]
fn initial_states_follow_the_heap_kind() {
    let mut ctx = null_context();
    let upload = ctx.create_heap(HeapKind::Upload, 65536).unwrap();
    let readback = ctx.create_heap(HeapKind::ReadBack, 65536).unwrap();
    let gpu = ctx.create_heap(HeapKind::Gpu, 65536).unwrap();

    let a = ctx.create_buffer(upload, 0, 16).unwrap();
    let b = ctx.create_buffer(readback, 0, 16).unwrap();
    let c = ctx
        .create_texture(gpu, 0, &TextureDesc::default())
        .unwrap();

    assert_eq!(ctx.resource_state(a), Some(ResourceState::GenericRead));
    assert_eq!(ctx.resource_state(b), Some(ResourceState::CopyDestination));
    assert_eq!(ctx.resource_state(c), Some(ResourceState::CopyDestination));
}

#[test]
fn cpu_visible_buffers_keep_their_heap_state() {
    let mut ctx = null_context();
    let upload = ctx.create_heap(HeapKind::Upload, 65536).unwrap();
    let readback = ctx.create_heap(HeapKind::ReadBack, 65536).unwrap();
    let staging = ctx.create_buffer(upload, 0, 256).unwrap();
    let results = ctx.create_buffer(readback, 0, 256).unwrap();
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let list = ctx.create_command_list(queue).unwrap();
    ctx.enable_barrier_log();

    let err = ctx
        .transition_to_state(list, staging, ResourceState::ShaderRead)
        .unwrap_err();
    assert!(
        matches!(
            err,
            GPUError::InvalidResourceState {
                expected: ResourceState::GenericRead,
                actual: ResourceState::ShaderRead
            }
        ),
        "{err}"
    );
    assert!(matches!(
        ctx.transition_to_state(list, results, ResourceState::ShaderWrite),
        Err(GPUError::InvalidResourceState { .. })
    ));

    // Requesting the state the heap already fixes succeeds without a barrier.
    ctx.transition_to_state(list, staging, ResourceState::GenericRead)
        .unwrap();
    ctx.transition_to_state(list, results, ResourceState::CopyDestination)
        .unwrap();
    assert_eq!(ctx.resource_state(staging), Some(ResourceState::GenericRead));
    assert_eq!(ctx.resource_state(results), Some(ResourceState::CopyDestination));
    assert!(ctx.take_barrier_log().is_empty());
}

#[test]
fn copies_transition_device_local_buffers_only() {
    let mut ctx = null_context();
    let upload = ctx.create_heap(HeapKind::Upload, 65536).unwrap();
    let gpu = ctx.create_heap(HeapKind::Gpu, 65536).unwrap();
    let staging = ctx.create_buffer(upload, 0, 256).unwrap();
    let target = ctx.create_buffer(gpu, 0, 256).unwrap();
    let queue = ctx.create_command_queue(QueueType::Copy).unwrap();
    let list = ctx.create_command_list(queue).unwrap();
    ctx.enable_barrier_log();

    ctx.copy_buffer_region(list, staging, 0, target, 0, 256)
        .unwrap();
    // Already a copy destination: nothing to do.
    assert!(ctx.take_barrier_log().is_empty());

    ctx.transition_to_state(list, target, ResourceState::ShaderRead)
        .unwrap();
    ctx.copy_buffer_region(list, staging, 0, target, 0, 256)
        .unwrap();
    let log = ctx.take_barrier_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].after, ResourceState::CopyDestination);
    assert_eq!(ctx.resource_state(staging), Some(ResourceState::GenericRead));
}

#[test]
fn out_of_range_copy_is_rejected() {
    let mut ctx = null_context();
    let upload = ctx.create_heap(HeapKind::Upload, 65536).unwrap();
    let src = ctx.create_buffer(upload, 0, 64).unwrap();
    let queue = ctx.create_command_queue(QueueType::Copy).unwrap();
    let list = ctx.create_command_list(queue).unwrap();
    assert!(matches!(
        ctx.copy_buffer_region(list, src, 32, src, 0, 64),
        Err(GPUError::OutOfBounds {
            offset: 32,
            size: 64,
            len: 64
        })
    ));
}

#[test]
fn render_pass_on_back_buffer_transitions_once_each_way() {
    let mut ctx = null_context();
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let window = NativeWindow::headless(0);
    let swap_chain = ctx
        .create_swap_chain(&window, queue, &SwapChainInfo::default())
        .unwrap();

    ctx.wait_for_swap_chain_on_cpu(swap_chain).unwrap();
    let back_buffer = ctx.swap_chain_back_buffer(swap_chain).unwrap();
    assert_eq!(ctx.resource_state(back_buffer), Some(ResourceState::Present));

    let list = ctx.create_command_list(queue).unwrap();
    ctx.enable_barrier_log();
    let pass = RenderPassDescriptor {
        color_target: Some(back_buffer),
        clear_color: Some([0.1, 0.2, 0.3, 1.0]),
        ..Default::default()
    };
    ctx.begin_render_pass(list, &pass).unwrap();
    ctx.end_render_pass(list).unwrap();
    submit_and_wait(&mut ctx, queue, list);
    ctx.present(swap_chain).unwrap();

    let log = ctx.take_barrier_log();
    assert_eq!(
        log,
        vec![
            Transition {
                resource: TrackedResource::Texture(back_buffer),
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
            },
            Transition {
                resource: TrackedResource::Texture(back_buffer),
                before: ResourceState::RenderTarget,
                after: ResourceState::Present,
            },
        ]
    );
    let stats = ctx.backend().stats();
    assert_eq!(stats.render_passes, 1);
    assert_eq!(stats.presents, 1);
    assert_eq!(stats.state_mismatches, 0);
    assert_eq!(ctx.frame_index(), 1);
}

#[test]
fn present_requires_the_back_buffer_in_present_state() {
    let mut ctx = null_context();
    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let swap_chain = ctx
        .create_swap_chain(&NativeWindow::headless(0), queue, &SwapChainInfo::default())
        .unwrap();
    let back_buffer = ctx.swap_chain_back_buffer(swap_chain).unwrap();
    let list = ctx.create_command_list(queue).unwrap();
    ctx.transition_to_state(list, back_buffer, ResourceState::RenderTarget)
        .unwrap();

    assert!(matches!(
        ctx.present(swap_chain),
        Err(GPUError::InvalidResourceState {
            expected: ResourceState::Present,
            actual: ResourceState::RenderTarget,
        })
    ));
    assert!(matches!(
        ctx.delete_texture(back_buffer),
        Err(GPUError::NotOwned)
    ));
}

#[test]
fn graphics_pass_with_depth_uses_reverse_z_clear() {
    let mut ctx = null_context();
    let heap = ctx.create_heap(HeapKind::Gpu, 4 * 65536).unwrap();
    let color = ctx
        .create_texture(
            heap,
            0,
            &TextureDesc {
                format: Format::RGBA16F,
                usage: TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ,
                width: 64,
                height: 64,
                ..Default::default()
            },
        )
        .unwrap();
    let depth = ctx
        .create_texture(
            heap,
            2 * 65536,
            &TextureDesc {
                format: Format::D32F,
                usage: TextureUsage::RENDER_TARGET,
                width: 64,
                height: 64,
                ..Default::default()
            },
        )
        .unwrap();

    let shader = ctx.create_shader(&graphics_shader_bytes(), None).unwrap();
    let pass = RenderPassDescriptor {
        color_target: Some(color),
        depth_target: Some(depth),
        depth_operation: Some(DepthOperation::ClearWrite),
        blend_mode: Some(BlendMode::AlphaBlending),
        ..Default::default()
    };
    let pipeline = ctx.create_pipeline_state(shader, &pass).unwrap();
    let desc = ctx.pipeline_desc(shader, &pass).unwrap();
    assert_eq!(desc.color_format, Some(Format::RGBA16F));
    assert_eq!(desc.depth_format, Some(Format::D32F));
    assert!(desc.depth.write_enable);

    let queue = ctx.create_command_queue(QueueType::Direct).unwrap();
    let list = ctx.create_command_list(queue).unwrap();
    assert!(matches!(
        ctx.dispatch_mesh(list, 1, 1, 1),
        Err(GPUError::NoPipelineBound)
    ));
    ctx.set_pipeline_state(list, pipeline).unwrap();
    assert!(matches!(
        ctx.dispatch_mesh(list, 1, 1, 1),
        Err(GPUError::NoActiveRenderPass)
    ));

    ctx.begin_render_pass(list, &pass).unwrap();
    assert_eq!(ctx.resource_state(color), Some(ResourceState::RenderTarget));
    assert_eq!(ctx.resource_state(depth), Some(ResourceState::DepthWrite));
    ctx.set_shader_resource_heap(list).unwrap();
    ctx.set_shader_constants(list, &[1, 2, 3]).unwrap();
    ctx.dispatch_mesh(list, 4, 1, 1).unwrap();
    assert!(matches!(
        ctx.commit_command_list(list),
        Err(GPUError::RenderPassOpen)
    ));
    ctx.end_render_pass(list).unwrap();
    assert_eq!(ctx.last_render_pass(list).unwrap(), Some(pass));

    // Sampling the color target afterwards needs one barrier.
    ctx.transition_to_state(list, color, ResourceState::ShaderRead)
        .unwrap();
    submit_and_wait(&mut ctx, queue, list);

    let stats = ctx.backend().stats();
    assert_eq!(stats.mesh_dispatches, 1);
    assert_eq!(stats.state_mismatches, 0);
}
