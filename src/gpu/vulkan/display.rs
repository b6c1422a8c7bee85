use std::os::raw::c_char;
use std::time::Duration;

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::RawWindowHandle;

use super::command_pool::VulkanQueue;
use super::conversions::lib_to_vk_format;
use super::memory::VulkanTexture;
use super::VulkanDevice;
use crate::gpu::error::{GPUError, Result};
use crate::gpu::structs::{SwapChainInfo, TextureDesc, TextureUsage};
use crate::window::NativeWindow;

pub struct VulkanSwapChain {
    surface: vk::SurfaceKHR,
    raw: vk::SwapchainKHR,
    family: u32,
    /// Signalled by image acquisition.
    acquired: vk::Fence,
    /// One per image, signalled by the present submission.
    rendered: Vec<vk::Semaphore>,
}

/// Instance extensions needed to create a surface on this platform.
pub(super) fn surface_extensions() -> Vec<*const c_char> {
    let mut names = vec![khr::Surface::name().as_ptr()];
    #[cfg(all(unix, not(any(target_os = "macos", target_os = "ios", target_os = "android"))))]
    {
        names.push(khr::XlibSurface::name().as_ptr());
        names.push(khr::XcbSurface::name().as_ptr());
        names.push(khr::WaylandSurface::name().as_ptr());
    }
    #[cfg(windows)]
    names.push(khr::Win32Surface::name().as_ptr());
    names
}

impl VulkanDevice {
    fn create_surface(&self, window: &NativeWindow) -> Result<vk::SurfaceKHR> {
        let unsupported = GPUError::Unsupported("window has no Vulkan surface on this platform");
        let surface = match window.raw {
            #[cfg(all(unix, not(any(target_os = "macos", target_os = "ios", target_os = "android"))))]
            RawWindowHandle::Xlib(handle) => {
                let info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(handle.display as *mut _)
                    .window(handle.window as vk::Window)
                    .build();
                unsafe {
                    khr::XlibSurface::new(&self.entry, &self.instance)
                        .create_xlib_surface(&info, None)?
                }
            }
            #[cfg(all(unix, not(any(target_os = "macos", target_os = "ios", target_os = "android"))))]
            RawWindowHandle::Xcb(handle) => {
                let info = vk::XcbSurfaceCreateInfoKHR::builder()
                    .connection(handle.connection as *mut _)
                    .window(handle.window)
                    .build();
                unsafe {
                    khr::XcbSurface::new(&self.entry, &self.instance)
                        .create_xcb_surface(&info, None)?
                }
            }
            #[cfg(all(unix, not(any(target_os = "macos", target_os = "ios", target_os = "android"))))]
            RawWindowHandle::Wayland(handle) => {
                let info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(handle.display as *mut _)
                    .surface(handle.surface as *mut _)
                    .build();
                unsafe {
                    khr::WaylandSurface::new(&self.entry, &self.instance)
                        .create_wayland_surface(&info, None)?
                }
            }
            #[cfg(windows)]
            RawWindowHandle::Win32(handle) => {
                let info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(handle.hinstance as _)
                    .hwnd(handle.hwnd as _)
                    .build();
                unsafe {
                    khr::Win32Surface::new(&self.entry, &self.instance)
                        .create_win32_surface(&info, None)?
                }
            }
            _ => return Err(unsupported),
        };
        Ok(surface)
    }

    fn build_swap_chain(
        &self,
        surface: vk::SurfaceKHR,
        info: &SwapChainInfo,
        old: vk::SwapchainKHR,
    ) -> Result<(vk::SwapchainKHR, Vec<VulkanTexture>)> {
        let (surfaces, swapchains) = self.presentation()?;
        let format = lib_to_vk_format(info.format);
        let formats = unsafe {
            surfaces.get_physical_device_surface_formats(self.pdevice, surface)?
        };
        let chosen = formats
            .iter()
            .find(|f| f.format == format)
            .copied()
            .ok_or(GPUError::Unsupported("swap-chain format is not supported by the surface"))?;

        let capabilities = unsafe {
            surfaces.get_physical_device_surface_capabilities(self.pdevice, surface)?
        };
        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: info.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: info.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        let mut image_count = info.buffer_count.max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let raw = unsafe {
            swapchains.create_swapchain(
                &vk::SwapchainCreateInfoKHR::builder()
                    .surface(surface)
                    .min_image_count(image_count)
                    .image_format(chosen.format)
                    .image_color_space(chosen.color_space)
                    .image_extent(extent)
                    .image_array_layers(1)
                    .image_usage(
                        vk::ImageUsageFlags::COLOR_ATTACHMENT
                            | vk::ImageUsageFlags::TRANSFER_DST
                            | vk::ImageUsageFlags::TRANSFER_SRC,
                    )
                    .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .pre_transform(capabilities.current_transform)
                    .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                    .present_mode(vk::PresentModeKHR::FIFO)
                    .clipped(true)
                    .old_swapchain(old)
                    .build(),
                None,
            )?
        };

        let desc = TextureDesc {
            format: info.format,
            usage: TextureUsage::RENDER_TARGET,
            width: extent.width,
            height: extent.height,
            ..Default::default()
        };
        let images = unsafe { swapchains.get_swapchain_images(raw)? };
        let mut textures = Vec::with_capacity(images.len());
        for image in images {
            let view = self.create_view(image, &desc)?;
            textures.push(VulkanTexture {
                image,
                view,
                format: info.format,
                extent,
                layout: std::cell::Cell::new(vk::ImageLayout::UNDEFINED),
                owned: false,
            });
        }

        log::info!(
            "swap chain of {} {:?} images at {}x{}",
            textures.len(),
            info.format,
            extent.width,
            extent.height
        );
        Ok((raw, textures))
    }

    fn presentation(&self) -> Result<(&khr::Surface, &khr::Swapchain)> {
        match (&self.surface_loader, &self.swapchain_loader) {
            (Some(surfaces), Some(swapchains)) => Ok((surfaces, swapchains)),
            _ => Err(GPUError::Unsupported("device cannot present")),
        }
    }

    fn binary_semaphores(&self, count: usize) -> Result<Vec<vk::Semaphore>> {
        let mut semaphores = Vec::with_capacity(count);
        for _ in 0..count {
            let semaphore = unsafe {
                self.device
                    .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
            };
            semaphores.push(semaphore);
        }
        Ok(semaphores)
    }

    pub(super) fn open_swap_chain(
        &mut self,
        window: &NativeWindow,
        queue: &VulkanQueue,
        info: &SwapChainInfo,
    ) -> Result<(VulkanSwapChain, Vec<VulkanTexture>)> {
        let (surfaces, _) = self.presentation()?;
        let surfaces = surfaces.clone();
        let surface = self.create_surface(window)?;

        let supported = unsafe {
            surfaces.get_physical_device_surface_support(self.pdevice, queue.family, surface)
        };
        if !matches!(supported, Ok(true)) {
            unsafe { surfaces.destroy_surface(surface, None) };
            return Err(GPUError::Unsupported("queue cannot present to the window"));
        }

        let (raw, textures) = match self.build_swap_chain(surface, info, vk::SwapchainKHR::null()) {
            Ok(built) => built,
            Err(err) => {
                unsafe { surfaces.destroy_surface(surface, None) };
                return Err(err);
            }
        };
        let acquired = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default(), None)?
        };
        let rendered = self.binary_semaphores(textures.len())?;

        Ok((
            VulkanSwapChain {
                surface,
                raw,
                family: queue.family,
                acquired,
                rendered,
            },
            textures,
        ))
    }

    pub(super) fn rebuild_swap_chain(
        &mut self,
        swap_chain: &mut VulkanSwapChain,
        old_back_buffers: Vec<VulkanTexture>,
        info: &SwapChainInfo,
    ) -> Result<Vec<VulkanTexture>> {
        unsafe { self.device.device_wait_idle()? };
        for texture in old_back_buffers {
            self.release_texture(texture);
        }

        let (raw, textures) = self.build_swap_chain(swap_chain.surface, info, swap_chain.raw)?;
        let (_, swapchains) = self.presentation()?;
        unsafe { swapchains.destroy_swapchain(swap_chain.raw, None) };
        swap_chain.raw = raw;

        if textures.len() != swap_chain.rendered.len() {
            for semaphore in swap_chain.rendered.drain(..) {
                unsafe { self.device.destroy_semaphore(semaphore, None) };
            }
            swap_chain.rendered = self.binary_semaphores(textures.len())?;
        }
        Ok(textures)
    }

    pub(super) fn acquire(&mut self, swap_chain: &mut VulkanSwapChain, timeout: Duration) -> Result<u32> {
        let (_, swapchains) = self.presentation()?;
        let nanos = timeout.as_nanos().min(u64::MAX as u128) as u64;
        let timed_out = GPUError::Timeout(timeout.as_millis() as u64);

        unsafe { self.device.reset_fences(&[swap_chain.acquired])? };
        let acquired = unsafe {
            swapchains.acquire_next_image(
                swap_chain.raw,
                nanos,
                vk::Semaphore::null(),
                swap_chain.acquired,
            )
        };
        let index = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("swap chain is suboptimal for its surface");
                }
                index
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => return Err(timed_out),
            Err(err) => return Err(err.into()),
        };

        match unsafe {
            self.device
                .wait_for_fences(&[swap_chain.acquired], true, nanos)
        } {
            Ok(()) => Ok(index),
            Err(vk::Result::TIMEOUT) => Err(timed_out),
            Err(err) => Err(err.into()),
        }
    }

    pub(super) fn present_image(
        &mut self,
        swap_chain: &mut VulkanSwapChain,
        queue: &mut VulkanQueue,
        image_index: u32,
        signal_value: u64,
    ) -> Result<()> {
        if queue.family != swap_chain.family {
            return Err(GPUError::QueueMismatch);
        }
        let rendered = *swap_chain
            .rendered
            .get(image_index as usize)
            .ok_or(GPUError::InvalidHandle("swap-chain image"))?;

        let signals = [
            vk::SemaphoreSubmitInfo::builder()
                .semaphore(rendered)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .build(),
            vk::SemaphoreSubmitInfo::builder()
                .semaphore(queue.timeline)
                .value(signal_value)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .build(),
        ];
        let submit = vk::SubmitInfo2::builder()
            .signal_semaphore_infos(&signals)
            .build();
        unsafe {
            self.device
                .queue_submit2(queue.raw, &[submit], vk::Fence::null())?
        };

        let (_, swapchains) = self.presentation()?;
        let waits = [rendered];
        let chains = [swap_chain.raw];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&waits)
            .swapchains(&chains)
            .image_indices(&indices)
            .build();
        match unsafe { swapchains.queue_present(queue.raw, &info) } {
            Ok(_) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swap chain is out of date, resize it to keep presenting");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub(super) fn close_swap_chain(&mut self, swap_chain: VulkanSwapChain, back_buffers: Vec<VulkanTexture>) {
        for texture in back_buffers {
            self.release_texture(texture);
        }
        unsafe {
            for semaphore in swap_chain.rendered {
                self.device.destroy_semaphore(semaphore, None);
            }
            self.device.destroy_fence(swap_chain.acquired, None);
        }
        if let Ok((surfaces, swapchains)) = self.presentation() {
            unsafe {
                swapchains.destroy_swapchain(swap_chain.raw, None);
                surfaces.destroy_surface(swap_chain.surface, None);
            }
        }
    }
}
