mod common;

use common::null_context;
use hikari::*;
use proptest::prelude::*;

const KIB: u64 = 1024;

#[test]
fn second_buffer_past_a_64k_heap_is_rejected() {
    let mut ctx = null_context();
    let heap = ctx.create_heap(HeapKind::Gpu, 64 * KIB).unwrap();

    let first = ctx.create_buffer(heap, 0, 4 * KIB).unwrap();
    let info = ctx.buffer_allocation_info(4 * KIB).unwrap();
    assert_eq!(
        info,
        AllocationInfo {
            size: 4 * KIB,
            alignment: 65536
        }
    );

    let err = ctx.create_buffer(heap, 65536, 4 * KIB).unwrap_err();
    assert!(matches!(err, GPUError::HeapOverflow { .. }), "{err}");
    assert!(err.is_precondition_violation());

    // The failed placement left the heap and the first buffer untouched.
    assert_eq!(ctx.buffer_size(first).unwrap(), 4 * KIB);
    ctx.delete_buffer(first).unwrap();
    ctx.delete_heap(heap).unwrap();
}

#[test]
fn misaligned_offset_is_rejected() {
    let mut ctx = null_context();
    let heap = ctx.create_heap(HeapKind::Gpu, 256 * KIB).unwrap();
    assert!(matches!(
        ctx.create_buffer(heap, 4 * KIB, 4 * KIB),
        Err(GPUError::MisalignedPlacement {
            offset: 4096,
            alignment: 65536
        })
    ));
}

#[test]
fn heap_outlives_its_resources() {
    let mut ctx = null_context();
    let heap = ctx.create_heap(HeapKind::Gpu, 128 * KIB).unwrap();
    let desc = TextureDesc {
        width: 16,
        height: 16,
        ..Default::default()
    };
    let texture = ctx.create_texture(heap, 0, &desc).unwrap();
    assert!(matches!(ctx.delete_heap(heap), Err(GPUError::HeapInUse(1))));

    ctx.delete_texture(texture).unwrap();
    ctx.delete_heap(heap).unwrap();
    assert!(matches!(
        ctx.heap_size(heap),
        Err(GPUError::InvalidHandle("heap"))
    ));
}

#[test]
fn stale_buffer_handle_fails_lookup() {
    let mut ctx = null_context();
    let heap = ctx.create_heap(HeapKind::Upload, 64 * KIB).unwrap();
    let buffer = ctx.create_buffer(heap, 0, 256).unwrap();
    ctx.delete_buffer(buffer).unwrap();

    let reused = ctx.create_buffer(heap, 0, 256).unwrap();
    assert_eq!(reused.slot, buffer.slot);
    assert!(ctx.buffer_size(buffer).is_err());
    assert_eq!(ctx.buffer_size(reused).unwrap(), 256);
}

#[test]
fn only_cpu_visible_heaps_map() {
    let mut ctx = null_context();
    let gpu = ctx.create_heap(HeapKind::Gpu, 64 * KIB).unwrap();
    let upload = ctx.create_heap(HeapKind::Upload, 64 * KIB).unwrap();
    let device_local = ctx.create_buffer(gpu, 0, 64).unwrap();
    let staging = ctx.create_buffer(upload, 0, 64).unwrap();

    assert!(matches!(
        ctx.buffer_cpu_pointer(device_local),
        Err(GPUError::NotMappable(HeapKind::Gpu))
    ));

    let words = ctx.map_buffer_mut::<u32>(staging).unwrap();
    assert_eq!(words.len(), 16);
    words[3] = 0xDEAD_BEEF;
    ctx.release_buffer_cpu_pointer(staging).unwrap();

    let again = ctx.map_buffer_mut::<u32>(staging).unwrap();
    assert_eq!(again[3], 0xDEAD_BEEF);
}

#[test]
fn shader_visible_resources_get_distinct_indices() {
    let mut ctx = null_context();
    let heap = ctx.create_heap(HeapKind::Gpu, 4 * 64 * KIB).unwrap();
    let a = ctx.create_buffer(heap, 0, 64).unwrap();
    let b = ctx.create_buffer(heap, 65536, 64).unwrap();
    let texture = ctx
        .create_texture(heap, 2 * 65536, &TextureDesc::default())
        .unwrap();

    let mut indices = vec![
        ctx.buffer_shader_resource_index(a).unwrap(),
        ctx.buffer_shader_resource_index(b).unwrap(),
        ctx.texture_shader_resource_index(texture).unwrap(),
    ];
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len(), 3);

    // Freed indices are handed out again.
    let freed = ctx.buffer_shader_resource_index(a).unwrap();
    ctx.delete_buffer(a).unwrap();
    let c = ctx.create_buffer(heap, 0, 64).unwrap();
    assert_eq!(ctx.buffer_shader_resource_index(c).unwrap(), freed);
}

#[test]
fn render_target_only_texture_has_no_shader_view() {
    let mut ctx = null_context();
    let heap = ctx.create_heap(HeapKind::Gpu, 64 * KIB).unwrap();
    let desc = TextureDesc {
        usage: TextureUsage::RENDER_TARGET,
        width: 8,
        height: 8,
        ..Default::default()
    };
    let texture = ctx.create_texture(heap, 0, &desc).unwrap();
    assert!(matches!(
        ctx.texture_shader_resource_index(texture),
        Err(GPUError::NoShaderResourceView)
    ));
    assert_eq!(ctx.texture_desc(texture).unwrap(), desc);
}

#[test]
fn heap_larger_than_memory_fails_cleanly() {
    let mut ctx = null_context();
    let err = ctx.create_heap(HeapKind::Gpu, u64::MAX).unwrap_err();
    assert!(matches!(err, GPUError::OutOfMemory(u64::MAX)), "{err}");

    // The context stays usable after the failed allocation.
    assert!(ctx.create_heap(HeapKind::Gpu, 64 * KIB).is_ok());
}

#[test]
fn mip_chain_longer_than_the_extent_is_rejected() {
    let mut ctx = null_context();
    let heap = ctx.create_heap(HeapKind::Gpu, 64 * KIB).unwrap();
    let desc = TextureDesc {
        width: 4,
        height: 4,
        mip_levels: 40,
        ..Default::default()
    };

    let err = ctx.texture_allocation_info(&desc).unwrap_err();
    assert!(matches!(err, GPUError::InvalidTextureDesc(_)), "{err}");
    assert!(err.is_precondition_violation());
    assert!(matches!(
        ctx.create_texture(heap, 0, &desc),
        Err(GPUError::InvalidTextureDesc(_))
    ));

    let full_chain = TextureDesc {
        mip_levels: 3,
        ..desc
    };
    assert!(ctx.create_texture(heap, 0, &full_chain).is_ok());
}

proptest! {
    #[test]
    fn no_successful_placement_exceeds_its_heap(
        heap_blocks in 1u64..8,
        offset_blocks in 0u64..10,
        size in 1u64..(9 * 65536),
    ) {
        let mut ctx = null_context();
        let heap_size = heap_blocks * 65536;
        let offset = offset_blocks * 65536;
        let heap = ctx.create_heap(HeapKind::Gpu, heap_size).unwrap();

        match ctx.create_buffer(heap, offset, size) {
            Ok(buffer) => {
                prop_assert!(offset + size <= heap_size);
                prop_assert_eq!(ctx.buffer_size(buffer).unwrap(), size);
            }
            Err(err) => {
                prop_assert!(offset + size > heap_size, "unexpected failure: {}", err);
                let is_overflow = matches!(err, GPUError::HeapOverflow { .. });
                prop_assert!(is_overflow);
            }
        }
    }
}
