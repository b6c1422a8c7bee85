use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::conversions::{buffer_desc, shader_view_format, texture_desc, view_format};
use super::D3D12Device;
use crate::gpu::context::initial_state;
use crate::gpu::error::{GPUError, Result};
use crate::gpu::structs::{AllocationInfo, Format, HeapKind, TextureDesc, TextureUsage};

/// Heaps holding textures get the MSAA placement alignment.
const GPU_HEAP_ALIGNMENT: u64 = D3D12_DEFAULT_MSAA_RESOURCE_PLACEMENT_ALIGNMENT as u64;
const HEAP_ALIGNMENT: u64 = D3D12_DEFAULT_RESOURCE_PLACEMENT_ALIGNMENT as u64;

/// Offset of the read-only depth views inside the DSV heap.
pub(super) const READ_ONLY_DSV_OFFSET: u32 = crate::gpu::context::DEPTH_VIEW_CAPACITY;

pub struct D3D12Heap {
    pub(super) raw: ID3D12Heap,
    kind: HeapKind,
}

pub struct D3D12Buffer {
    pub(super) raw: ID3D12Resource,
    kind: HeapKind,
    size: u64,
}

pub struct D3D12Texture {
    pub(super) raw: ID3D12Resource,
}

fn heap_type(kind: HeapKind) -> D3D12_HEAP_TYPE {
    match kind {
        HeapKind::Upload => D3D12_HEAP_TYPE_UPLOAD,
        HeapKind::ReadBack => D3D12_HEAP_TYPE_READBACK,
        HeapKind::Gpu => D3D12_HEAP_TYPE_DEFAULT,
    }
}

impl D3D12Device {
    fn allocation_info(&self, desc: &D3D12_RESOURCE_DESC) -> AllocationInfo {
        let info = unsafe { self.device.GetResourceAllocationInfo(0, &[*desc]) };
        AllocationInfo {
            size: info.SizeInBytes,
            alignment: info.Alignment,
        }
    }

    pub(super) fn buffer_info(&self, size: u64) -> AllocationInfo {
        self.allocation_info(&buffer_desc(size, D3D12_RESOURCE_FLAG_NONE))
    }

    pub(super) fn texture_info(&self, desc: &TextureDesc) -> AllocationInfo {
        self.allocation_info(&texture_desc(desc))
    }

    pub(super) fn allocate_heap(&mut self, kind: HeapKind, size: u64) -> Result<D3D12Heap> {
        let alignment = match kind {
            HeapKind::Gpu => GPU_HEAP_ALIGNMENT,
            _ => HEAP_ALIGNMENT,
        };
        let desc = D3D12_HEAP_DESC {
            SizeInBytes: crate::utils::align_up(size, alignment),
            Properties: D3D12_HEAP_PROPERTIES {
                Type: heap_type(kind),
                ..Default::default()
            },
            Alignment: alignment,
            Flags: D3D12_HEAP_FLAG_NONE,
        };

        let mut raw: Option<ID3D12Heap> = None;
        unsafe { self.device.CreateHeap(&desc, &mut raw)? };
        let raw = raw.ok_or(GPUError::Unsupported("heap creation returned nothing"))?;
        log::debug!("allocated {:?} heap of {} bytes", kind, desc.SizeInBytes);
        Ok(D3D12Heap { raw, kind })
    }

    fn place(
        &self,
        heap: &D3D12Heap,
        offset: u64,
        desc: &D3D12_RESOURCE_DESC,
        initial: D3D12_RESOURCE_STATES,
        clear: Option<D3D12_CLEAR_VALUE>,
    ) -> Result<ID3D12Resource> {
        let mut raw: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreatePlacedResource(
                &heap.raw,
                offset,
                desc,
                initial,
                clear.as_ref().map(|c| c as *const D3D12_CLEAR_VALUE),
                &mut raw,
            )?
        };
        raw.ok_or(GPUError::Unsupported("placed resource creation returned nothing"))
    }

    pub(super) fn place_buffer(
        &mut self,
        heap: &D3D12Heap,
        kind: HeapKind,
        offset: u64,
        size: u64,
        shader_resource_index: u32,
    ) -> Result<D3D12Buffer> {
        let writable = kind == HeapKind::Gpu;
        let flags = match writable {
            true => D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
            false => D3D12_RESOURCE_FLAG_NONE,
        };
        let initial = super::conversions::resource_state(initial_state(kind));
        let raw = self.place(heap, offset, &buffer_desc(size, flags), initial, None)?;

        // Raw views address 32-bit words.
        let words = (size / 4) as u32;
        if words > 0 {
            let handle = self.resource_heap.cpu(shader_resource_index);
            unsafe {
                if writable {
                    let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                        Format: DXGI_FORMAT_R32_TYPELESS,
                        ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
                        Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                            Buffer: D3D12_BUFFER_UAV {
                                FirstElement: 0,
                                NumElements: words,
                                StructureByteStride: 0,
                                CounterOffsetInBytes: 0,
                                Flags: D3D12_BUFFER_UAV_FLAG_RAW,
                            },
                        },
                    };
                    self.device
                        .CreateUnorderedAccessView(&raw, None::<&ID3D12Resource>, Some(&desc as *const _), handle);
                } else {
                    let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: DXGI_FORMAT_R32_TYPELESS,
                        ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                            Buffer: D3D12_BUFFER_SRV {
                                FirstElement: 0,
                                NumElements: words,
                                StructureByteStride: 0,
                                Flags: D3D12_BUFFER_SRV_FLAG_RAW,
                            },
                        },
                    };
                    self.device
                        .CreateShaderResourceView(&raw, Some(&desc as *const _), handle);
                }
            }
        }

        Ok(D3D12Buffer { raw, kind, size })
    }

    pub(super) fn map(&self, heap: &D3D12Heap, buffer: &D3D12Buffer) -> Result<*mut u8> {
        if !heap.kind.is_cpu_visible() {
            return Err(GPUError::NotMappable(heap.kind));
        }
        let read = match buffer.kind {
            HeapKind::ReadBack => D3D12_RANGE {
                Begin: 0,
                End: buffer.size as usize,
            },
            _ => D3D12_RANGE::default(),
        };
        let mut data = std::ptr::null_mut();
        unsafe { buffer.raw.Map(0, Some(&read as *const _), Some(&mut data as *mut _))? };
        Ok(data as *mut u8)
    }

    pub(super) fn unmap(&self, buffer: &D3D12Buffer) {
        let written = match buffer.kind {
            HeapKind::Upload => D3D12_RANGE {
                Begin: 0,
                End: buffer.size as usize,
            },
            _ => D3D12_RANGE::default(),
        };
        unsafe { buffer.raw.Unmap(0, Some(&written as *const _)) };
    }

    pub(super) fn place_texture(
        &mut self,
        heap: &D3D12Heap,
        offset: u64,
        desc: &TextureDesc,
        shader_resource_index: Option<u32>,
        target_view: Option<u32>,
    ) -> Result<D3D12Texture> {
        let native = texture_desc(desc);
        let clear = target_view.map(|_| clear_value(desc.format));
        let initial = super::conversions::resource_state(initial_state(HeapKind::Gpu));
        let raw = self.place(heap, offset, &native, initial, clear)?;
        let texture = D3D12Texture { raw };

        if let Some(index) = shader_resource_index {
            self.write_texture_view(&texture, desc, index);
        }
        if let Some(view) = target_view {
            if desc.format.is_depth() {
                self.write_depth_views(&texture, desc, view);
            } else {
                self.write_render_target_view(&texture, desc.format, desc.sample_count, view);
            }
        }
        Ok(texture)
    }

    fn write_texture_view(&self, texture: &D3D12Texture, desc: &TextureDesc, index: u32) {
        let handle = self.resource_heap.cpu(index);
        let format = shader_view_format(desc.format);
        unsafe {
            if desc.usage.contains(TextureUsage::SHADER_WRITE) && desc.sample_count <= 1 {
                let uav = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                    Format: format,
                    ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2DARRAY,
                    Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                        Texture2DArray: D3D12_TEX2D_ARRAY_UAV {
                            MipSlice: 0,
                            FirstArraySlice: 0,
                            ArraySize: desc.face_count.max(1),
                            PlaneSlice: 0,
                        },
                    },
                };
                self.device
                    .CreateUnorderedAccessView(
                        &texture.raw,
                        None::<&ID3D12Resource>,
                        Some(&uav as *const _),
                        handle,
                    );
                return;
            }

            let mips = desc.mip_levels.max(1);
            let srv = match (desc.face_count, desc.sample_count > 1) {
                (_, true) => D3D12_SHADER_RESOURCE_VIEW_DESC {
                    Format: format,
                    ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2DMS,
                    Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                    Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture2DMS: D3D12_TEX2DMS_SRV::default(),
                    },
                },
                (6, false) => D3D12_SHADER_RESOURCE_VIEW_DESC {
                    Format: format,
                    ViewDimension: D3D12_SRV_DIMENSION_TEXTURECUBE,
                    Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                    Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        TextureCube: D3D12_TEXCUBE_SRV {
                            MostDetailedMip: 0,
                            MipLevels: mips,
                            ResourceMinLODClamp: 0.0,
                        },
                    },
                },
                _ => D3D12_SHADER_RESOURCE_VIEW_DESC {
                    Format: format,
                    ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2DARRAY,
                    Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                    Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture2DArray: D3D12_TEX2D_ARRAY_SRV {
                            MostDetailedMip: 0,
                            MipLevels: mips,
                            FirstArraySlice: 0,
                            ArraySize: desc.face_count.max(1),
                            PlaneSlice: 0,
                            ResourceMinLODClamp: 0.0,
                        },
                    },
                },
            };
            self.device
                .CreateShaderResourceView(&texture.raw, Some(&srv as *const _), handle);
        }
    }

    pub(super) fn write_render_target_view(
        &self,
        texture: &D3D12Texture,
        format: Format,
        sample_count: u32,
        view: u32,
    ) {
        let (dimension, anonymous) = match sample_count > 1 {
            true => (
                D3D12_RTV_DIMENSION_TEXTURE2DMS,
                D3D12_RENDER_TARGET_VIEW_DESC_0 {
                    Texture2DMS: D3D12_TEX2DMS_RTV::default(),
                },
            ),
            false => (
                D3D12_RTV_DIMENSION_TEXTURE2D,
                D3D12_RENDER_TARGET_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_RTV::default(),
                },
            ),
        };
        let desc = D3D12_RENDER_TARGET_VIEW_DESC {
            Format: view_format(format),
            ViewDimension: dimension,
            Anonymous: anonymous,
        };
        unsafe {
            self.device
                .CreateRenderTargetView(&texture.raw, Some(&desc as *const _), self.rtv_heap.cpu(view))
        };
    }

    /// Writes the writable view at `view` and the read-only one at
    /// `view + READ_ONLY_DSV_OFFSET`.
    fn write_depth_views(&self, texture: &D3D12Texture, desc: &TextureDesc, view: u32) {
        let multisampled = desc.sample_count > 1;
        let read_only_flags = match desc.format {
            Format::D24S8 => D3D12_DSV_FLAG_READ_ONLY_DEPTH | D3D12_DSV_FLAG_READ_ONLY_STENCIL,
            _ => D3D12_DSV_FLAG_READ_ONLY_DEPTH,
        };

        for (slot, flags) in [
            (view, D3D12_DSV_FLAG_NONE),
            (view + READ_ONLY_DSV_OFFSET, read_only_flags),
        ] {
            let dsv = D3D12_DEPTH_STENCIL_VIEW_DESC {
                Format: view_format(desc.format),
                ViewDimension: match multisampled {
                    true => D3D12_DSV_DIMENSION_TEXTURE2DMS,
                    false => D3D12_DSV_DIMENSION_TEXTURE2D,
                },
                Flags: flags,
                Anonymous: match multisampled {
                    true => D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                        Texture2DMS: D3D12_TEX2DMS_DSV::default(),
                    },
                    false => D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_DSV::default(),
                    },
                },
            };
            unsafe {
                self.device
                    .CreateDepthStencilView(&texture.raw, Some(&dsv as *const _), self.dsv_heap.cpu(slot))
            };
        }
    }
}

/// Optimized clear value matching what render passes clear targets to.
fn clear_value(format: Format) -> D3D12_CLEAR_VALUE {
    let mut value = D3D12_CLEAR_VALUE {
        Format: view_format(format),
        ..Default::default()
    };
    if format.is_depth() {
        value.Anonymous.DepthStencil = D3D12_DEPTH_STENCIL_VALUE {
            Depth: crate::gpu::render_pass::DEPTH_CLEAR_VALUE,
            Stencil: 0,
        };
    } else {
        value.Anonymous.Color = [0.0, 0.0, 0.0, 1.0];
    }
    value
}
