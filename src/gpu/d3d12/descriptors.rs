use windows::Win32::Graphics::Direct3D12::*;

use crate::gpu::error::Result;

/// A fixed-size descriptor heap addressed by the indices the context hands
/// out, so no free-list is kept here.
pub(super) struct DescriptorHeap {
    pub(super) raw: ID3D12DescriptorHeap,
    cpu_start: D3D12_CPU_DESCRIPTOR_HANDLE,
    gpu_start: D3D12_GPU_DESCRIPTOR_HANDLE,
    increment: usize,
    pub(super) capacity: u32,
}

impl DescriptorHeap {
    pub(super) fn new(device: &ID3D12Device, ty: D3D12_DESCRIPTOR_HEAP_TYPE, capacity: u32) -> Result<Self> {
        let shader_visible = ty == D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV;
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: ty,
            NumDescriptors: capacity.max(1),
            Flags: match shader_visible {
                true => D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
                false => D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
            },
            NodeMask: 0,
        };

        unsafe {
            let raw: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&desc)?;
            let cpu_start = raw.GetCPUDescriptorHandleForHeapStart();
            let gpu_start = match shader_visible {
                true => raw.GetGPUDescriptorHandleForHeapStart(),
                false => D3D12_GPU_DESCRIPTOR_HANDLE::default(),
            };
            let increment = device.GetDescriptorHandleIncrementSize(ty) as usize;
            Ok(Self {
                raw,
                cpu_start,
                gpu_start,
                increment,
                capacity,
            })
        }
    }

    pub(super) fn cpu(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.cpu_start.ptr + self.increment * index as usize,
        }
    }

    pub(super) fn gpu_start(&self) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        self.gpu_start
    }
}
