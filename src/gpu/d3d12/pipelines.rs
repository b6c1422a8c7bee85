use std::ffi::c_void;

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::conversions::{
    blend_desc, depth_stencil_desc, rasterizer_desc, topology, topology_type, view_format,
};
use super::D3D12Device;
use crate::gpu::error::{GPUError, Result};
use crate::gpu::render_pass::{BindPoint, PipelineDesc};
use crate::gpu::shader::ShaderContainer;

/// Root constants the default root signature exposes at `b0`.
pub(super) const DEFAULT_ROOT_CONSTANTS: u32 = 32;

/// A root signature and where its constants and resource table live.
#[derive(Clone)]
pub(super) struct RootSignature {
    pub(super) raw: ID3D12RootSignature,
    /// Root parameter index and size of the 32-bit constants.
    pub(super) constants: Option<(u32, u32)>,
    /// Root parameter index of the first descriptor table.
    pub(super) table: Option<u32>,
}

pub struct D3D12Shader {
    root: RootSignature,
    amplification: Option<Vec<u8>>,
    mesh: Option<Vec<u8>>,
    pixel: Option<Vec<u8>>,
    compute: Option<Vec<u8>>,
}

pub struct D3D12Pipeline {
    pub(super) raw: ID3D12PipelineState,
    pub(super) root: RootSignature,
    pub(super) compute: bool,
    pub(super) topology: D3D_PRIMITIVE_TOPOLOGY,
}

fn bytecode(blob: &[u8]) -> D3D12_SHADER_BYTECODE {
    D3D12_SHADER_BYTECODE {
        pShaderBytecode: blob.as_ptr() as *const c_void,
        BytecodeLength: blob.len(),
    }
}

fn optional_bytecode(blob: &Option<Vec<u8>>) -> D3D12_SHADER_BYTECODE {
    blob.as_deref().map(bytecode).unwrap_or_default()
}

/// One entry of a pipeline state stream.
#[repr(C, align(8))]
struct Subobject<T> {
    ty: D3D12_PIPELINE_STATE_SUBOBJECT_TYPE,
    inner: T,
}

impl<T> Subobject<T> {
    fn new(ty: D3D12_PIPELINE_STATE_SUBOBJECT_TYPE, inner: T) -> Self {
        Self { ty, inner }
    }
}

#[repr(C)]
struct MeshStream {
    root_signature: Subobject<*mut c_void>,
    amplification: Subobject<D3D12_SHADER_BYTECODE>,
    mesh: Subobject<D3D12_SHADER_BYTECODE>,
    pixel: Subobject<D3D12_SHADER_BYTECODE>,
    blend: Subobject<D3D12_BLEND_DESC>,
    sample_mask: Subobject<u32>,
    rasterizer: Subobject<D3D12_RASTERIZER_DESC>,
    depth_stencil: Subobject<D3D12_DEPTH_STENCIL_DESC>,
    topology: Subobject<D3D12_PRIMITIVE_TOPOLOGY_TYPE>,
    render_targets: Subobject<D3D12_RT_FORMAT_ARRAY>,
    depth_format: Subobject<DXGI_FORMAT>,
    samples: Subobject<DXGI_SAMPLE_DESC>,
}

fn render_target_formats(desc: &PipelineDesc) -> D3D12_RT_FORMAT_ARRAY {
    let mut formats = D3D12_RT_FORMAT_ARRAY::default();
    if let Some(format) = desc.color_format {
        formats.RTFormats[0] = view_format(format);
        formats.NumRenderTargets = 1;
    }
    formats
}

fn depth_format(desc: &PipelineDesc) -> DXGI_FORMAT {
    desc.depth_format
        .map(view_format)
        .unwrap_or(DXGI_FORMAT_UNKNOWN)
}

impl D3D12Device {
    fn default_root_signature(&self) -> Result<RootSignature> {
        let parameter = D3D12_ROOT_PARAMETER1 {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            Anonymous: D3D12_ROOT_PARAMETER1_0 {
                Constants: D3D12_ROOT_CONSTANTS {
                    ShaderRegister: 0,
                    RegisterSpace: 0,
                    Num32BitValues: DEFAULT_ROOT_CONSTANTS,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        };
        let desc = D3D12_VERSIONED_ROOT_SIGNATURE_DESC {
            Version: D3D_ROOT_SIGNATURE_VERSION_1_1,
            Anonymous: D3D12_VERSIONED_ROOT_SIGNATURE_DESC_0 {
                Desc_1_1: D3D12_ROOT_SIGNATURE_DESC1 {
                    NumParameters: 1,
                    pParameters: &parameter,
                    NumStaticSamplers: 0,
                    pStaticSamplers: std::ptr::null(),
                    Flags: D3D12_ROOT_SIGNATURE_FLAG_CBV_SRV_UAV_HEAP_DIRECTLY_INDEXED,
                },
            },
        };

        let mut blob: Option<ID3DBlob> = None;
        let mut errors: Option<ID3DBlob> = None;
        let serialized =
            unsafe { D3D12SerializeVersionedRootSignature(&desc, &mut blob, Some(&mut errors as *mut _)) };
        if let Err(err) = serialized {
            if let Some(errors) = errors {
                let message = unsafe {
                    std::slice::from_raw_parts(
                        errors.GetBufferPointer() as *const u8,
                        errors.GetBufferSize(),
                    )
                };
                log::error!(
                    "root signature serialization failed: {}",
                    String::from_utf8_lossy(message)
                );
            }
            return Err(err.into());
        }
        let blob = blob.ok_or(GPUError::Unsupported("root signature serialization returned nothing"))?;
        let bytes = unsafe {
            std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
        };
        let raw = unsafe { self.device.CreateRootSignature(0, bytes)? };
        Ok(RootSignature {
            raw,
            constants: Some((0, DEFAULT_ROOT_CONSTANTS)),
            table: None,
        })
    }

    /// Creates the root signature a container's layout blob serializes and
    /// finds its constants and descriptor table.
    fn root_signature(&self, layout: &[u8]) -> Result<RootSignature> {
        if layout.is_empty() {
            return self.default_root_signature();
        }

        let raw: ID3D12RootSignature = unsafe { self.device.CreateRootSignature(0, layout) }
            .map_err(|e| {
                GPUError::MalformedShaderContainer(format!("layout is not a root signature: {e}"))
            })?;

        let deserializer: ID3D12RootSignatureDeserializer = unsafe {
            D3D12CreateRootSignatureDeserializer(layout.as_ptr() as *const c_void, layout.len())?
        };
        let desc = unsafe { &*deserializer.GetRootSignatureDesc() };
        let parameters: &[D3D12_ROOT_PARAMETER] = match desc.NumParameters {
            0 => &[],
            n => unsafe { std::slice::from_raw_parts(desc.pParameters, n as usize) },
        };

        let mut constants = None;
        let mut table = None;
        for (index, parameter) in parameters.iter().enumerate() {
            match parameter.ParameterType {
                D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS if constants.is_none() => {
                    let count = unsafe { parameter.Anonymous.Constants.Num32BitValues };
                    constants = Some((index as u32, count));
                }
                D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE if table.is_none() => {
                    table = Some(index as u32);
                }
                _ => {}
            }
        }

        Ok(RootSignature {
            raw,
            constants,
            table,
        })
    }

    pub(super) fn load_shader(&mut self, container: &ShaderContainer) -> Result<D3D12Shader> {
        Ok(D3D12Shader {
            root: self.root_signature(&container.layout)?,
            amplification: container.amplification.clone(),
            mesh: container.mesh.clone(),
            pixel: container.pixel.clone(),
            compute: container.compute.clone(),
        })
    }

    pub(super) fn build_pipeline(
        &mut self,
        shader: &D3D12Shader,
        desc: &PipelineDesc,
    ) -> Result<D3D12Pipeline> {
        let root = shader.root.clone();
        let raw = match desc.bind_point {
            BindPoint::Compute => self.compute_pipeline(shader, &root)?,
            BindPoint::Graphics if self.mesh_shading => self.mesh_pipeline(shader, &root, desc)?,
            BindPoint::Graphics => self.vertex_pipeline(shader, &root, desc)?,
        };
        Ok(D3D12Pipeline {
            raw,
            root,
            compute: desc.bind_point == BindPoint::Compute,
            topology: topology(desc.topology),
        })
    }

    fn compute_pipeline(&self, shader: &D3D12Shader, root: &RootSignature) -> Result<ID3D12PipelineState> {
        let cs = shader
            .compute
            .as_deref()
            .ok_or(GPUError::MissingShaderStage("compute"))?;
        let desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(&root.raw) },
            CS: bytecode(cs),
            ..Default::default()
        };
        Ok(unsafe { self.device.CreateComputePipelineState(&desc)? })
    }

    fn mesh_pipeline(
        &self,
        shader: &D3D12Shader,
        root: &RootSignature,
        desc: &PipelineDesc,
    ) -> Result<ID3D12PipelineState> {
        if shader.mesh.is_none() {
            return Err(GPUError::MissingShaderStage("mesh"));
        }
        let mut stream = MeshStream {
            root_signature: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_ROOT_SIGNATURE,
                root.raw.as_raw(),
            ),
            amplification: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_AS,
                optional_bytecode(&shader.amplification),
            ),
            mesh: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_MS,
                optional_bytecode(&shader.mesh),
            ),
            pixel: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_PS,
                optional_bytecode(&shader.pixel),
            ),
            blend: Subobject::new(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_BLEND, blend_desc(&desc.blend)),
            sample_mask: Subobject::new(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_SAMPLE_MASK, u32::MAX),
            rasterizer: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_RASTERIZER,
                rasterizer_desc(),
            ),
            depth_stencil: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_DEPTH_STENCIL,
                depth_stencil_desc(&desc.depth),
            ),
            topology: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_PRIMITIVE_TOPOLOGY,
                topology_type(desc.topology),
            ),
            render_targets: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_RENDER_TARGET_FORMATS,
                render_target_formats(desc),
            ),
            depth_format: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_DEPTH_STENCIL_FORMAT,
                depth_format(desc),
            ),
            samples: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_SAMPLE_DESC,
                DXGI_SAMPLE_DESC {
                    Count: desc.sample_count.max(1),
                    Quality: 0,
                },
            ),
        };
        let stream_desc = D3D12_PIPELINE_STATE_STREAM_DESC {
            SizeInBytes: std::mem::size_of::<MeshStream>(),
            pPipelineStateSubobjectStream: &mut stream as *mut MeshStream as *mut c_void,
        };
        Ok(unsafe { self.device.CreatePipelineState(&stream_desc)? })
    }

    /// Classic pipeline for devices without mesh shading; the mesh blob is
    /// compiled as a vertex shader.
    fn vertex_pipeline(
        &self,
        shader: &D3D12Shader,
        root: &RootSignature,
        desc: &PipelineDesc,
    ) -> Result<ID3D12PipelineState> {
        let vs = shader
            .mesh
            .as_deref()
            .ok_or(GPUError::MissingShaderStage("mesh"))?;
        let formats = render_target_formats(desc);
        let native = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(&root.raw) },
            VS: bytecode(vs),
            PS: optional_bytecode(&shader.pixel),
            BlendState: blend_desc(&desc.blend),
            SampleMask: u32::MAX,
            RasterizerState: rasterizer_desc(),
            DepthStencilState: depth_stencil_desc(&desc.depth),
            PrimitiveTopologyType: topology_type(desc.topology),
            NumRenderTargets: formats.NumRenderTargets,
            RTVFormats: formats.RTFormats,
            DSVFormat: depth_format(desc),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: desc.sample_count.max(1),
                Quality: 0,
            },
            ..Default::default()
        };
        Ok(unsafe { self.device.CreateGraphicsPipelineState(&native)? })
    }
}
