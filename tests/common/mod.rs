#![allow(dead_code)]

use hikari::gpu::null::NullDevice;
use hikari::gpu::shader::ShaderContainer;
use hikari::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn null_context() -> Context<NullDevice> {
    null_context_with(ContextInfo {
        backend: BackendKind::Null,
        ..Default::default()
    })
}

pub fn null_context_with(info: ContextInfo) -> Context<NullDevice> {
    init_logging();
    let device = NullDevice::new(&info);
    Context::new(device, info)
}

pub fn graphics_shader_bytes() -> Vec<u8> {
    ShaderContainer {
        backend_discriminator: 0,
        layout: vec![4, 0, 0, 0],
        mesh: Some(vec![0x11; 32]),
        pixel: Some(vec![0x22; 16]),
        ..Default::default()
    }
    .encode()
}

pub fn compute_shader_bytes() -> Vec<u8> {
    ShaderContainer {
        backend_discriminator: 0,
        layout: vec![4, 0, 0, 0],
        compute: Some(vec![0x33; 24]),
        compute_entry_point: Some("CSMain".into()),
        ..Default::default()
    }
    .encode()
}

/// Closes `list`, runs it alone on `queue` and blocks until it finished.
pub fn submit_and_wait<B: Backend>(
    ctx: &mut Context<B>,
    queue: Handle<CommandQueue>,
    list: Handle<CommandList>,
) -> FenceValue {
    ctx.commit_command_list(list).unwrap();
    let fence = ctx.execute_command_lists(queue, &[list], &[]).unwrap();
    ctx.wait_for_command_queue_on_cpu(fence).unwrap();
    fence
}

/// Vulkan context with validation layers on. Dropping it fails the test if
/// the layers reported an API usage error.
#[cfg(all(feature = "hikari-vulkan", feature = "hikari-tests"))]
pub struct ValidationContext {
    ctx: Option<Context<hikari::gpu::vulkan::VulkanDevice>>,
}

#[cfg(all(feature = "hikari-vulkan", feature = "hikari-tests"))]
impl ValidationContext {
    pub fn headless() -> Result<Self, GPUError> {
        init_logging();
        let info = ContextInfo {
            backend: BackendKind::Vulkan,
            validation: true,
            ..Default::default()
        };
        let device = hikari::gpu::vulkan::VulkanDevice::new(&info)?;
        Ok(Self {
            ctx: Some(Context::new(device, info)),
        })
    }
}

#[cfg(all(feature = "hikari-vulkan", feature = "hikari-tests"))]
impl std::ops::Deref for ValidationContext {
    type Target = Context<hikari::gpu::vulkan::VulkanDevice>;

    fn deref(&self) -> &Self::Target {
        self.ctx.as_ref().expect("context should be present")
    }
}

#[cfg(all(feature = "hikari-vulkan", feature = "hikari-tests"))]
impl std::ops::DerefMut for ValidationContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx.as_mut().expect("context should be present")
    }
}

#[cfg(all(feature = "hikari-vulkan", feature = "hikari-tests"))]
impl Drop for ValidationContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            let errors = ctx.backend().validation_error_count();
            drop(ctx);
            if !std::thread::panicking() {
                assert_eq!(
                    errors, 0,
                    "Vulkan validation layers reported an API usage error"
                );
            }
        }
    }
}
