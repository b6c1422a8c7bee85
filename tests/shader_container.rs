mod common;

use common::{graphics_shader_bytes, null_context};
use hikari::gpu::shader::{ShaderContainer, MESH_ENTRY, PIXEL_ENTRY};
use hikari::*;

fn put(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Builds a container by hand, independent of the encoder.
fn container(layout: &[u8], stages: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = 5i32.to_le_bytes().to_vec();
    put(&mut out, layout);
    out.extend_from_slice(&(stages.len() as i32).to_le_bytes());
    for (name, blob) in stages {
        put(&mut out, name.as_bytes());
        put(&mut out, blob);
    }
    out
}

#[test]
fn mesh_and_pixel_blobs_round_trip() {
    let blob_m = [0x10u8, 0x20, 0x30, 0x40, 0x50];
    let blob_p = [0xF0u8; 9];
    let layout = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let bytes = container(&layout, &[(MESH_ENTRY, &blob_m), (PIXEL_ENTRY, &blob_p)]);

    let parsed = ShaderContainer::parse(&bytes, None).unwrap();
    assert_eq!(parsed.backend_discriminator, 5);
    assert_eq!(parsed.layout, layout);
    assert_eq!(parsed.stage(ShaderStage::Mesh), Some(&blob_m[..]));
    assert_eq!(parsed.stage(ShaderStage::Pixel), Some(&blob_p[..]));
    assert_eq!(parsed.stage(ShaderStage::Amplification), None);
    assert_eq!(parsed.encode(), bytes);

    let mut ctx = null_context();
    let shader = ctx.create_shader(&bytes, None).unwrap();
    ctx.delete_shader(shader).unwrap();
}

#[test]
fn unrecognized_stage_name_fails_the_load() {
    let bytes = container(
        &[],
        &[(MESH_ENTRY, &[1]), (PIXEL_ENTRY, &[2]), ("GeometryMain", &[3])],
    );
    let mut ctx = null_context();
    let err = ctx.create_shader(&bytes, None).unwrap_err();
    assert!(matches!(err, GPUError::MalformedShaderContainer(_)), "{err}");
    assert!(err.is_precondition_violation());
    assert!(err.to_string().contains("GeometryMain"));
}

#[test]
fn compute_stage_needs_its_entry_point_name() {
    let bytes = container(&[], &[("CSMain", &[9, 9])]);
    assert!(ShaderContainer::parse(&bytes, None).is_err());
    let parsed = ShaderContainer::parse(&bytes, Some("CSMain")).unwrap();
    assert!(parsed.stages().is_compute());
    assert_eq!(parsed.entry_point(ShaderStage::Compute), "CSMain");
}

#[test]
fn mixed_compute_and_graphics_is_rejected() {
    let bytes = container(
        &[],
        &[(MESH_ENTRY, &[1]), (PIXEL_ENTRY, &[2]), ("CSMain", &[3])],
    );
    assert!(matches!(
        ShaderContainer::parse(&bytes, Some("CSMain")),
        Err(GPUError::MalformedShaderContainer(_))
    ));
}

#[test]
fn graphics_shader_without_pixel_stage_is_rejected() {
    let bytes = container(&[], &[(MESH_ENTRY, &[1])]);
    assert!(matches!(
        ShaderContainer::parse(&bytes, None),
        Err(GPUError::MissingShaderStage(PIXEL_ENTRY))
    ));
}

#[test]
fn negative_lengths_and_truncation_are_rejected() {
    let mut bytes = graphics_shader_bytes();
    // Layout length becomes -1.
    bytes[4..8].copy_from_slice(&(-1i32).to_le_bytes());
    assert!(ShaderContainer::parse(&bytes, None).is_err());

    let bytes = graphics_shader_bytes();
    for len in [0, 3, 7, bytes.len() - 1] {
        assert!(
            ShaderContainer::parse(&bytes[..len], None).is_err(),
            "prefix of {len} bytes parsed"
        );
    }
}
