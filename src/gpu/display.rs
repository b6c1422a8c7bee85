use std::time::Duration;

use super::context::Context;
use super::error::{GPUError, Result};
use super::structs::*;
use super::table::*;
use super::Backend;
use crate::utils::Handle;
use crate::window::NativeWindow;

impl<B: Backend> Context<B> {
    /// Creates a swap chain for `window` presenting from `queue`, which must
    /// be a direct queue. Back buffers start in the `Present` state.
    pub fn create_swap_chain(
        &mut self,
        window: &NativeWindow,
        queue: Handle<CommandQueue>,
        info: &SwapChainInfo,
    ) -> Result<Handle<SwapChain>> {
        if self.table.queues.get(queue)?.ty != QueueType::Direct {
            return Err(GPUError::QueueMismatch);
        }

        let desc = back_buffer_desc(info);
        let views = self.allocate_back_buffer_views(&desc, info.buffer_count)?;
        let queue_record = self.table.queues.get(queue)?;
        let created = self
            .backend
            .create_swap_chain(window, &queue_record.raw, info, &views);
        let (raw, textures) = match created {
            Ok(created) => created,
            Err(err) => {
                for view in views {
                    self.target_views.release(view);
                }
                return Err(err);
            }
        };

        let back_buffers = self.register_back_buffers(&desc, textures, &views)?;
        let handle = self.table.swap_chains.insert(SwapChainRecord {
            queue,
            window: *window,
            info: *info,
            back_buffers,
            current_image: 0,
            raw,
        })?;
        log::info!(
            "created {}x{} swap chain {:?} with {} buffers",
            info.width,
            info.height,
            handle,
            info.buffer_count
        );
        Ok(handle)
    }

    fn allocate_back_buffer_views(&mut self, desc: &TextureDesc, count: u32) -> Result<Vec<u32>> {
        let mut views = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let view = self
                .allocate_target_view(desc)
                .and_then(|view| view.ok_or(GPUError::NotRenderTarget));
            match view {
                Ok(view) => views.push(view),
                Err(err) => {
                    for view in views {
                        self.target_views.release(view);
                    }
                    return Err(err);
                }
            }
        }
        Ok(views)
    }

    fn register_back_buffers(
        &mut self,
        desc: &TextureDesc,
        textures: Vec<B::Texture>,
        views: &[u32],
    ) -> Result<Vec<Handle<Texture>>> {
        let mut handles = Vec::with_capacity(textures.len());
        for (raw, view) in textures.into_iter().zip(views.iter().copied()) {
            let handle = self.table.textures.insert(TextureRecord {
                heap: None,
                desc: *desc,
                shader_resource_index: None,
                target_index: Some(view),
                owned: false,
                raw,
            })?;
            self.states.register(handle, ResourceState::Present);
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Removes the back-buffer records of a swap chain, returning the native
    /// textures and their view slots.
    fn unregister_back_buffers(&mut self, swap_chain: Handle<SwapChain>) -> Result<(Vec<B::Texture>, Vec<u32>)> {
        let handles = std::mem::take(&mut self.table.swap_chains.get_mut(swap_chain)?.back_buffers);
        let mut textures = Vec::with_capacity(handles.len());
        let mut views = Vec::with_capacity(handles.len());
        for handle in handles {
            let record = self.table.textures.remove(handle)?;
            self.states.forget(handle);
            views.extend(record.target_index);
            textures.push(record.raw);
        }
        Ok((textures, views))
    }

    fn wait_for_present_queue(&mut self, swap_chain: Handle<SwapChain>) -> Result<()> {
        let queue = self.table.swap_chains.get(swap_chain)?.queue;
        let record = self.table.queues.get(queue)?;
        let fence = self.backend.queue_fence(&record.raw);
        self.backend.wait_on_cpu(&fence, record.last_signaled, None)
    }

    /// Recreates the back buffers at a new size. Waits for the presenting
    /// queue to go idle first; previous back-buffer handles become invalid.
    pub fn resize_swap_chain(
        &mut self,
        swap_chain: Handle<SwapChain>,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.wait_for_present_queue(swap_chain)?;

        let (old, views) = self.unregister_back_buffers(swap_chain)?;
        let record = self.table.swap_chains.get_mut(swap_chain)?;
        record.info.width = width;
        record.info.height = height;
        let info = record.info;

        let textures = self
            .backend
            .resize_swap_chain(&mut record.raw, old, &info, &views)?;
        let desc = back_buffer_desc(&info);
        let back_buffers = self.register_back_buffers(&desc, textures, &views)?;

        let record = self.table.swap_chains.get_mut(swap_chain)?;
        record.back_buffers = back_buffers;
        record.current_image = 0;
        log::debug!("resized swap chain {:?} to {}x{}", swap_chain, width, height);
        Ok(())
    }

    /// Blocks until the next back buffer can be rendered to and returns its
    /// index. Fails with [`GPUError::Timeout`] once the configured swap-chain
    /// timeout elapses.
    pub fn wait_for_swap_chain_on_cpu(&mut self, swap_chain: Handle<SwapChain>) -> Result<u32> {
        let timeout = Duration::from_millis(self.info.swap_chain_timeout_ms);
        let record = self.table.swap_chains.get_mut(swap_chain)?;
        let index = self.backend.acquire_next_image(&mut record.raw, timeout)?;
        record.current_image = index;
        Ok(index)
    }

    /// Back buffer the next frame renders into.
    pub fn swap_chain_back_buffer(&self, swap_chain: Handle<SwapChain>) -> Result<Handle<Texture>> {
        let record = self.table.swap_chains.get(swap_chain)?;
        record
            .back_buffers
            .get(record.current_image as usize)
            .copied()
            .ok_or(GPUError::InvalidHandle("swap chain image"))
    }

    pub fn swap_chain_back_buffers(&self, swap_chain: Handle<SwapChain>) -> Result<Vec<Handle<Texture>>> {
        Ok(self.table.swap_chains.get(swap_chain)?.back_buffers.clone())
    }

    pub fn swap_chain_info(&self, swap_chain: Handle<SwapChain>) -> Result<SwapChainInfo> {
        Ok(self.table.swap_chains.get(swap_chain)?.info)
    }

    /// Presents the current back buffer after all work submitted so far to
    /// the swap chain's queue, and moves to the next frame. The back buffer
    /// must be back in the `Present` state.
    pub fn present(&mut self, swap_chain: Handle<SwapChain>) -> Result<FenceValue> {
        let back_buffer = self.swap_chain_back_buffer(swap_chain)?;
        let state = self.states.state(back_buffer).unwrap_or_default();
        if state != ResourceState::Present {
            return Err(GPUError::InvalidResourceState {
                expected: ResourceState::Present,
                actual: state,
            });
        }

        let record = self.table.swap_chains.get_mut(swap_chain)?;
        let queue = record.queue;
        let queue_record = self.table.queues.get_mut(queue)?;
        let value = queue_record.pending_fence_value();
        self.backend.present(
            &mut record.raw,
            &mut queue_record.raw,
            record.current_image,
            value,
        )?;
        queue_record.last_signaled = value;

        self.advance_frame();
        Ok(FenceValue { queue, value })
    }

    /// Waits for the presenting queue, then destroys the swap chain and its
    /// back buffers.
    pub fn delete_swap_chain(&mut self, swap_chain: Handle<SwapChain>) -> Result<()> {
        self.wait_for_present_queue(swap_chain)?;
        let (textures, views) = self.unregister_back_buffers(swap_chain)?;
        for view in views {
            self.target_views.release(view);
        }
        let record = self.table.swap_chains.remove(swap_chain)?;
        self.backend.destroy_swap_chain(record.raw, textures);
        log::debug!("deleted swap chain {:?}", swap_chain);
        Ok(())
    }
}

fn back_buffer_desc(info: &SwapChainInfo) -> TextureDesc {
    TextureDesc {
        format: info.format,
        usage: TextureUsage::RENDER_TARGET,
        width: info.width,
        height: info.height,
        ..Default::default()
    }
}
