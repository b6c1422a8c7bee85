use std::time::Duration;

use raw_window_handle::RawWindowHandle;
use windows::core::ComInterface;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use super::conversions::swap_chain_format;
use super::memory::D3D12Texture;
use super::queues::{wait_event, D3D12Queue};
use super::D3D12Device;
use crate::gpu::error::{GPUError, Result};
use crate::gpu::structs::{Format, SwapChainInfo};
use crate::window::NativeWindow;

const SWAP_CHAIN_FLAGS: u32 = DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT.0 as u32;

pub struct D3D12SwapChain {
    raw: IDXGISwapChain3,
    /// Signaled when the compositor can accept another frame.
    waitable: HANDLE,
    queue: ID3D12CommandQueue,
    format: Format,
}

impl D3D12Device {
    fn back_buffers(&self, swap_chain: &D3D12SwapChain, target_views: &[u32]) -> Result<Vec<D3D12Texture>> {
        target_views
            .iter()
            .enumerate()
            .map(|(i, &view)| {
                let raw: ID3D12Resource = unsafe { swap_chain.raw.GetBuffer(i as u32)? };
                let texture = D3D12Texture { raw };
                self.write_render_target_view(&texture, swap_chain.format, 1, view);
                Ok(texture)
            })
            .collect()
    }

    pub(super) fn open_swap_chain(
        &mut self,
        window: &NativeWindow,
        queue: &D3D12Queue,
        info: &SwapChainInfo,
        target_views: &[u32],
    ) -> Result<(D3D12SwapChain, Vec<D3D12Texture>)> {
        let hwnd = match window.raw {
            RawWindowHandle::Win32(handle) => HWND(handle.hwnd as isize),
            _ => return Err(GPUError::Unsupported("window has no Win32 handle")),
        };

        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: info.width,
            Height: info.height,
            Format: swap_chain_format(info.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: target_views.len() as u32,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: SWAP_CHAIN_FLAGS,
            ..Default::default()
        };

        let raw: IDXGISwapChain3 = unsafe {
            self.factory
                .CreateSwapChainForHwnd(&queue.raw, hwnd, &desc, None, None::<&IDXGIOutput>)?
                .cast()?
        };
        let waitable = unsafe {
            raw.SetMaximumFrameLatency(target_views.len().saturating_sub(1).max(1) as u32)?;
            raw.GetFrameLatencyWaitableObject()
        };

        let swap_chain = D3D12SwapChain {
            raw,
            waitable,
            queue: queue.raw.clone(),
            format: info.format,
        };
        let back_buffers = self.back_buffers(&swap_chain, target_views)?;
        log::debug!(
            "created {}x{} swap chain with {} buffers",
            info.width,
            info.height,
            back_buffers.len()
        );
        Ok((swap_chain, back_buffers))
    }

    pub(super) fn resize(
        &mut self,
        swap_chain: &mut D3D12SwapChain,
        old_back_buffers: Vec<D3D12Texture>,
        info: &SwapChainInfo,
        target_views: &[u32],
    ) -> Result<Vec<D3D12Texture>> {
        // Every outstanding reference to a buffer must be gone before ResizeBuffers.
        drop(old_back_buffers);
        unsafe {
            swap_chain.raw.ResizeBuffers(
                target_views.len() as u32,
                info.width,
                info.height,
                swap_chain_format(info.format),
                SWAP_CHAIN_FLAGS,
            )?
        };
        swap_chain.format = info.format;
        self.back_buffers(swap_chain, target_views)
    }

    pub(super) fn acquire(&mut self, swap_chain: &mut D3D12SwapChain, timeout: Duration) -> Result<u32> {
        wait_event(swap_chain.waitable, Some(timeout))?;
        Ok(unsafe { swap_chain.raw.GetCurrentBackBufferIndex() })
    }

    pub(super) fn present_image(
        &mut self,
        swap_chain: &mut D3D12SwapChain,
        queue: &mut D3D12Queue,
        signal_value: u64,
    ) -> Result<()> {
        if swap_chain.queue != queue.raw {
            return Err(GPUError::QueueMismatch);
        }
        unsafe {
            swap_chain.raw.Present(1, Default::default()).ok()?;
            queue.raw.Signal(&queue.fence, signal_value)?;
        }
        Ok(())
    }

    pub(super) fn close_swap_chain(&mut self, swap_chain: D3D12SwapChain, back_buffers: Vec<D3D12Texture>) {
        drop(back_buffers);
        if let Err(err) = unsafe { CloseHandle(swap_chain.waitable) } {
            log::warn!("failed to close the frame latency handle: {err}");
        }
    }
}
