use std::time::Duration;

use windows::core::ComInterface;
use windows::Win32::Foundation::{HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{WaitForSingleObject, INFINITE};

use super::conversions::list_type;
use super::D3D12Device;
use crate::gpu::error::{GPUError, Result};
use crate::gpu::structs::QueueType;
use crate::utils::PerFrame;

pub struct D3D12Queue {
    pub(super) raw: ID3D12CommandQueue,
    pub(super) ty: QueueType,
    pub(super) fence: ID3D12Fence,
    allocators: PerFrame<ID3D12CommandAllocator>,
}

pub struct D3D12CommandList {
    pub(super) raw: ID3D12GraphicsCommandList6,
    pub(super) ty: QueueType,
    /// Staging resources the recorded commands read from; released once the
    /// list is reset.
    pub(super) scratch: Vec<ID3D12Resource>,
}

/// Blocks on `event` for up to `timeout`.
pub(super) fn wait_event(event: HANDLE, timeout: Option<Duration>) -> Result<()> {
    let millis = timeout
        .map(|t| t.as_millis().min(INFINITE as u128 - 1) as u32)
        .unwrap_or(INFINITE);
    match unsafe { WaitForSingleObject(event, millis) } {
        WAIT_OBJECT_0 => Ok(()),
        WAIT_TIMEOUT => Err(GPUError::Timeout(millis as u64)),
        _ => Err(windows::core::Error::from_win32().into()),
    }
}

impl D3D12Device {
    pub(super) fn open_queue(&mut self, ty: QueueType, frames_in_flight: usize) -> Result<D3D12Queue> {
        let kind = list_type(ty);
        let desc = D3D12_COMMAND_QUEUE_DESC {
            Type: kind,
            Priority: D3D12_COMMAND_QUEUE_PRIORITY_NORMAL.0,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            NodeMask: 0,
        };
        let raw: ID3D12CommandQueue = unsafe { self.device.CreateCommandQueue(&desc)? };
        let fence: ID3D12Fence = unsafe { self.device.CreateFence(0, D3D12_FENCE_FLAG_NONE)? };
        let allocators = PerFrame::try_from_fn(frames_in_flight.max(1), |_| unsafe {
            self.device.CreateCommandAllocator::<ID3D12CommandAllocator>(kind)
        })?;

        self.live_queues.push(raw.clone());
        log::debug!("opened {:?} queue with {} allocators", ty, allocators.len());
        Ok(D3D12Queue {
            raw,
            ty,
            fence,
            allocators,
        })
    }

    pub(super) fn close_queue(&mut self, queue: D3D12Queue) {
        self.live_queues.retain(|q| q != &queue.raw);
        log::debug!("closed {:?} queue", queue.ty);
    }

    pub(super) fn reset_frame_allocator(&mut self, queue: &mut D3D12Queue, frame_slot: usize) -> Result<()> {
        unsafe { queue.allocators.get(frame_slot).Reset()? };
        Ok(())
    }

    pub(super) fn open_list(&mut self, queue: &mut D3D12Queue, frame_slot: usize) -> Result<D3D12CommandList> {
        let raw: ID3D12GraphicsCommandList6 = unsafe {
            self.device.CreateCommandList(
                0,
                list_type(queue.ty),
                queue.allocators.get(frame_slot),
                None::<&ID3D12PipelineState>,
            )?
        };
        Ok(D3D12CommandList {
            raw,
            ty: queue.ty,
            scratch: Vec::new(),
        })
    }

    pub(super) fn reopen_list(
        &mut self,
        queue: &mut D3D12Queue,
        list: &mut D3D12CommandList,
        frame_slot: usize,
    ) -> Result<()> {
        list.scratch.clear();
        unsafe {
            list.raw
                .Reset(queue.allocators.get(frame_slot), None::<&ID3D12PipelineState>)?
        };
        Ok(())
    }

    pub(super) fn submit(
        &mut self,
        queue: &mut D3D12Queue,
        lists: &[&D3D12CommandList],
        waits: &[(ID3D12Fence, u64)],
        signal_value: u64,
    ) -> Result<()> {
        unsafe {
            for (fence, value) in waits {
                queue.raw.Wait(fence, *value)?;
            }
            let raw = lists
                .iter()
                .map(|list| list.raw.cast::<ID3D12CommandList>().map(Some))
                .collect::<windows::core::Result<Vec<_>>>()?;
            if !raw.is_empty() {
                queue.raw.ExecuteCommandLists(&raw);
            }
            queue.raw.Signal(&queue.fence, signal_value)?;
        }
        Ok(())
    }

    pub(super) fn wait_fence(&mut self, fence: &ID3D12Fence, value: u64, timeout: Option<Duration>) -> Result<()> {
        if unsafe { fence.GetCompletedValue() } >= value {
            return Ok(());
        }
        unsafe { fence.SetEventOnCompletion(value, self.fence_event)? };
        wait_event(self.fence_event, timeout)
    }

    /// Signals the idle fence on every live queue and waits for each.
    pub(super) fn drain_queues(&mut self) -> Result<()> {
        let queues = self.live_queues.clone();
        for queue in queues {
            self.idle_value += 1;
            let value = self.idle_value;
            unsafe { queue.Signal(&self.idle_fence, value)? };
            let fence = self.idle_fence.clone();
            self.wait_fence(&fence, value, None)?;
        }
        Ok(())
    }
}
