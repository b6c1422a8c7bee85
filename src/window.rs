use raw_window_handle::{HasRawWindowHandle, RawWindowHandle, WebHandle};

use crate::gpu::error::Result;
use crate::gpu::structs::WindowState;

/// Native window supplied by the host's window service. Swap chains are
/// created against it; this crate never creates or owns OS windows itself
/// outside [`WindowService`] implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeWindow {
    pub raw: RawWindowHandle,
    /// Service-assigned identifier, used by [`WindowService::render_size`].
    pub id: u64,
}

impl NativeWindow {
    /// A window without a native surface, for devices that present nowhere.
    pub fn headless(id: u64) -> Self {
        let mut handle = WebHandle::empty();
        handle.id = id as u32;
        Self {
            raw: RawWindowHandle::Web(handle),
            id,
        }
    }
}

unsafe impl HasRawWindowHandle for NativeWindow {
    fn raw_window_handle(&self) -> RawWindowHandle {
        self.raw
    }
}

/// External collaborator that owns OS windows.
pub trait WindowService {
    fn create_window(
        &mut self,
        title: &str,
        width: u32,
        height: u32,
        state: WindowState,
    ) -> Result<NativeWindow>;

    /// Current drawable size in pixels.
    fn render_size(&self, window: &NativeWindow) -> Result<(u32, u32)>;
}

#[cfg(feature = "hikari-winit")]
pub use self::winit_service::WinitWindowService;

#[cfg(feature = "hikari-winit")]
mod winit_service {
    use super::*;
    use crate::gpu::error::GPUError;
    use winit::dpi::PhysicalSize;
    use winit::event_loop::EventLoop;
    use winit::window::{Fullscreen, Window, WindowBuilder};

    /// [`WindowService`] backed by a winit event loop. Must live on the main
    /// thread.
    pub struct WinitWindowService {
        event_loop: EventLoop<()>,
        windows: Vec<Window>,
    }

    impl WinitWindowService {
        pub fn new() -> Self {
            Self {
                event_loop: EventLoop::new(),
                windows: Vec::new(),
            }
        }

        pub fn event_loop(&mut self) -> &mut EventLoop<()> {
            &mut self.event_loop
        }

        fn find(&self, window: &NativeWindow) -> Result<&Window> {
            self.windows
                .get(window.id as usize)
                .ok_or_else(|| GPUError::Window(format!("unknown window {}", window.id)))
        }
    }

    impl Default for WinitWindowService {
        fn default() -> Self {
            Self::new()
        }
    }

    impl WindowService for WinitWindowService {
        fn create_window(
            &mut self,
            title: &str,
            width: u32,
            height: u32,
            state: WindowState,
        ) -> Result<NativeWindow> {
            let fullscreen = match state {
                WindowState::FullScreen => Some(Fullscreen::Borderless(None)),
                _ => None,
            };
            let window = WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .with_maximized(state == WindowState::Maximized)
                .with_fullscreen(fullscreen)
                .build(&self.event_loop)
                .map_err(|e| GPUError::Window(e.to_string()))?;

            let native = NativeWindow {
                raw: window.raw_window_handle(),
                id: self.windows.len() as u64,
            };
            log::debug!("created window {} ({}x{})", native.id, width, height);
            self.windows.push(window);
            Ok(native)
        }

        fn render_size(&self, window: &NativeWindow) -> Result<(u32, u32)> {
            let size = self.find(window)?.inner_size();
            Ok((size.width, size.height))
        }
    }
}
