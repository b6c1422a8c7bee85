use std::ffi::CString;
use std::io::Cursor;

use ash::vk;
use smallvec::SmallVec;

use super::conversions::{lib_to_vk_format, sample_count};
use super::VulkanDevice;
use crate::gpu::error::{GPUError, Result};
use crate::gpu::render_pass::{BindPoint, PipelineDesc};
use crate::gpu::shader::{ShaderContainer, AMPLIFICATION_ENTRY, MESH_ENTRY, PIXEL_ENTRY};
use crate::gpu::structs::Format;

/// Push-constant bytes a container without a layout blob gets.
pub(super) const DEFAULT_PUSH_CONSTANT_SIZE: u32 = 128;

pub(super) struct ShaderModule {
    stage: vk::ShaderStageFlags,
    module: vk::ShaderModule,
    entry: CString,
}

pub struct VulkanShader {
    modules: SmallVec<[ShaderModule; 3]>,
    push_constant_size: u32,
    compute: bool,
}

impl VulkanShader {
    fn stages(&self) -> vk::ShaderStageFlags {
        self.modules
            .iter()
            .fold(vk::ShaderStageFlags::empty(), |acc, m| acc | m.stage)
    }
}

pub struct VulkanPipeline {
    pub(super) raw: vk::Pipeline,
    pub(super) layout: vk::PipelineLayout,
    pub(super) bind_point: vk::PipelineBindPoint,
    pub(super) push_stages: vk::ShaderStageFlags,
    pub(super) push_constant_size: u32,
}

/// Reads the Vulkan layout blob: the little-endian push-constant byte size.
pub(super) fn push_constant_size(layout: &[u8], device_limit: u32) -> Result<u32> {
    let size = match layout.len() {
        0 => DEFAULT_PUSH_CONSTANT_SIZE,
        4 => u32::from_le_bytes([layout[0], layout[1], layout[2], layout[3]]),
        n => {
            return Err(GPUError::MalformedShaderContainer(format!(
                "Vulkan layout blob is {n} bytes, expected 4"
            )))
        }
    };
    if size % 4 != 0 {
        return Err(GPUError::MalformedShaderContainer(format!(
            "push-constant size {size} is not a multiple of 4"
        )));
    }
    Ok(size.min(device_limit))
}

impl VulkanDevice {
    fn shader_module(&self, stage: vk::ShaderStageFlags, name: &str, blob: &[u8]) -> Result<ShaderModule> {
        let words = ash::util::read_spv(&mut Cursor::new(blob)).map_err(|e| {
            GPUError::MalformedShaderContainer(format!("stage `{name}` is not SPIR-V: {e}"))
        })?;
        let module = unsafe {
            self.device.create_shader_module(
                &vk::ShaderModuleCreateInfo::builder().code(&words).build(),
                None,
            )?
        };
        let entry = CString::new(name).map_err(|_| {
            GPUError::MalformedShaderContainer(format!("stage name `{name}` contains a NUL"))
        })?;
        Ok(ShaderModule {
            stage,
            module,
            entry,
        })
    }

    pub(super) fn build_shader(&self, container: &ShaderContainer) -> Result<VulkanShader> {
        let push_constant_size =
            push_constant_size(&container.layout, self.properties.limits.max_push_constants_size)?;
        let mesh_stage = match self.mesh_shader.is_some() {
            true => vk::ShaderStageFlags::MESH_EXT,
            false => vk::ShaderStageFlags::VERTEX,
        };

        let mut stages: SmallVec<[(vk::ShaderStageFlags, &str, &[u8]); 3]> = SmallVec::new();
        if let Some(blob) = &container.compute {
            let name = container.compute_entry_point.as_deref().unwrap_or("main");
            stages.push((vk::ShaderStageFlags::COMPUTE, name, blob));
        }
        if let Some(blob) = &container.amplification {
            if self.mesh_shader.is_none() {
                return Err(GPUError::Unsupported(
                    "amplification shaders need mesh shading support",
                ));
            }
            stages.push((vk::ShaderStageFlags::TASK_EXT, AMPLIFICATION_ENTRY, blob));
        }
        if let Some(blob) = &container.mesh {
            stages.push((mesh_stage, MESH_ENTRY, blob));
        }
        if let Some(blob) = &container.pixel {
            stages.push((vk::ShaderStageFlags::FRAGMENT, PIXEL_ENTRY, blob));
        }

        let mut modules = SmallVec::new();
        for (stage, name, blob) in stages {
            match self.shader_module(stage, name, blob) {
                Ok(module) => modules.push(module),
                Err(err) => {
                    let partial = VulkanShader {
                        modules,
                        push_constant_size,
                        compute: false,
                    };
                    self.release_shader(partial);
                    return Err(err);
                }
            }
        }

        Ok(VulkanShader {
            modules,
            push_constant_size,
            compute: container.compute.is_some(),
        })
    }

    pub(super) fn release_shader(&self, shader: VulkanShader) {
        for module in shader.modules {
            unsafe { self.device.destroy_shader_module(module.module, None) };
        }
    }

    pub(super) fn build_pipeline(&self, shader: &VulkanShader, desc: &PipelineDesc) -> Result<VulkanPipeline> {
        let wants_compute = desc.bind_point == BindPoint::Compute;
        if wants_compute != shader.compute {
            return Err(GPUError::Unsupported(
                "pipeline bind point does not match the shader stages",
            ));
        }

        let push_stages = shader.stages();
        let ranges = [vk::PushConstantRange {
            stage_flags: push_stages,
            offset: 0,
            size: shader.push_constant_size,
        }];
        let set_layouts = [self.bindless.layout];
        let mut layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        if shader.push_constant_size > 0 {
            layout_info = layout_info.push_constant_ranges(&ranges);
        }
        let layout = unsafe { self.device.create_pipeline_layout(&layout_info.build(), None)? };

        let stages: SmallVec<[vk::PipelineShaderStageCreateInfo; 3]> = shader
            .modules
            .iter()
            .map(|m| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(m.stage)
                    .module(m.module)
                    .name(&m.entry)
                    .build()
            })
            .collect();

        let created = if wants_compute {
            self.compute_pipeline(layout, stages[0])
        } else {
            self.graphics_pipeline(layout, &stages, desc)
        };
        let raw = match created {
            Ok(raw) => raw,
            Err(err) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(err);
            }
        };

        Ok(VulkanPipeline {
            raw,
            layout,
            bind_point: match wants_compute {
                true => vk::PipelineBindPoint::COMPUTE,
                false => vk::PipelineBindPoint::GRAPHICS,
            },
            push_stages,
            push_constant_size: shader.push_constant_size,
        })
    }

    fn compute_pipeline(
        &self,
        layout: vk::PipelineLayout,
        stage: vk::PipelineShaderStageCreateInfo,
    ) -> Result<vk::Pipeline> {
        let info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout)
            .build();
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
                .map_err(|(_, err)| err)?
        };
        Ok(pipelines[0])
    }

    fn graphics_pipeline(
        &self,
        layout: vk::PipelineLayout,
        stages: &[vk::PipelineShaderStageCreateInfo],
        desc: &PipelineDesc,
    ) -> Result<vk::Pipeline> {
        let color_formats: SmallVec<[vk::Format; 1]> =
            desc.color_format.map(lib_to_vk_format).into_iter().collect();
        let depth_format = desc
            .depth_format
            .map(lib_to_vk_format)
            .unwrap_or(vk::Format::UNDEFINED);
        let stencil_format = match desc.depth_format {
            Some(Format::D24S8) => depth_format,
            _ => vk::Format::UNDEFINED,
        };
        let mut rendering = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format)
            .build();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.topology.into())
            .build();
        let viewport = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1)
            .build();
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0)
            .build();
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(sample_count(desc.sample_count))
            .build();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth.test_enable)
            .depth_write_enable(desc.depth.write_enable)
            .depth_compare_op(desc.depth.compare.into())
            .build();
        let attachments: SmallVec<[vk::PipelineColorBlendAttachmentState; 1]> = desc
            .color_format
            .map(|_| desc.blend.into())
            .into_iter()
            .collect();
        let blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&attachments)
            .build();
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states)
            .build();

        let mut info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(stages)
            .viewport_state(&viewport)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .push_next(&mut rendering);
        if self.mesh_shader.is_none() {
            info = info
                .vertex_input_state(&vertex_input)
                .input_assembly_state(&input_assembly);
        }

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info.build()], None)
                .map_err(|(_, err)| err)?
        };
        Ok(pipelines[0])
    }

    pub(super) fn release_pipeline(&self, pipeline: VulkanPipeline) {
        unsafe {
            self.device.destroy_pipeline(pipeline.raw, None);
            self.device.destroy_pipeline_layout(pipeline.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_layout_blob_gets_the_default_push_range() {
        assert_eq!(push_constant_size(&[], 256).unwrap(), DEFAULT_PUSH_CONSTANT_SIZE);
        assert_eq!(push_constant_size(&[], 64).unwrap(), 64);
    }

    #[test]
    fn layout_blob_is_a_little_endian_size() {
        assert_eq!(push_constant_size(&16u32.to_le_bytes(), 256).unwrap(), 16);
        assert!(push_constant_size(&[1, 2, 3], 256).is_err());
        assert!(push_constant_size(&6u32.to_le_bytes(), 256).is_err());
    }
}
