use std::time::Duration;

use ash::vk;
use smallvec::SmallVec;

use super::VulkanDevice;
use crate::gpu::error::{GPUError, Result};
use crate::gpu::structs::QueueType;
use crate::utils::PerFrame;

/// A submission queue with one command pool per frame slot and a timeline
/// semaphore that counts retired submissions.
pub struct VulkanQueue {
    pub(super) raw: vk::Queue,
    pub(super) family: u32,
    pub(super) ty: QueueType,
    pub(super) timeline: vk::Semaphore,
    pools: PerFrame<vk::CommandPool>,
}

pub struct VulkanCommandList {
    pub(super) raw: vk::CommandBuffer,
    /// Pool the buffer was allocated from.
    pool: vk::CommandPool,
}

impl VulkanDevice {
    fn command_pool(&self, family: u32) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .build();
        Ok(unsafe { self.device.create_command_pool(&info, None)? })
    }

    pub(super) fn open_queue(&mut self, ty: QueueType, frames_in_flight: usize) -> Result<VulkanQueue> {
        let family = self.families.family(ty);
        let raw = unsafe { self.device.get_device_queue(family, 0) };

        let mut timeline_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0)
            .build();
        let timeline = unsafe {
            self.device.create_semaphore(
                &vk::SemaphoreCreateInfo::builder()
                    .push_next(&mut timeline_info)
                    .build(),
                None,
            )?
        };

        let pools = PerFrame::try_from_fn(frames_in_flight.max(1), |_| self.command_pool(family));
        let pools = match pools {
            Ok(pools) => pools,
            Err(err) => {
                unsafe { self.device.destroy_semaphore(timeline, None) };
                return Err(err);
            }
        };

        log::debug!("opened {:?} queue on family {}", ty, family);
        Ok(VulkanQueue {
            raw,
            family,
            ty,
            timeline,
            pools,
        })
    }

    pub(super) fn close_queue(&mut self, queue: VulkanQueue) {
        unsafe {
            for pool in queue.pools.iter() {
                self.device.destroy_command_pool(*pool, None);
            }
            self.device.destroy_semaphore(queue.timeline, None);
        }
        log::debug!("closed {:?} queue", queue.ty);
    }

    pub(super) fn reset_pool(&mut self, queue: &mut VulkanQueue, slot: usize) -> Result<()> {
        let pool = *queue.pools.get(slot % queue.pools.len());
        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())?
        };
        Ok(())
    }

    fn begin(&self, raw: vk::CommandBuffer) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .build();
        unsafe { self.device.begin_command_buffer(raw, &info)? };
        Ok(())
    }

    pub(super) fn allocate_list(&mut self, queue: &mut VulkanQueue, slot: usize) -> Result<VulkanCommandList> {
        let pool = *queue.pools.get(slot % queue.pools.len());
        let raw = unsafe {
            self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1)
                    .build(),
            )?[0]
        };
        self.begin(raw)?;
        Ok(VulkanCommandList {
            raw,
            pool,
        })
    }

    /// Moves the list onto the pool of `slot` and reopens it.
    pub(super) fn reopen_list(
        &mut self,
        queue: &mut VulkanQueue,
        list: &mut VulkanCommandList,
        slot: usize,
    ) -> Result<()> {
        let pool = *queue.pools.get(slot % queue.pools.len());
        if pool != list.pool {
            let fresh = self.allocate_list(queue, slot)?;
            let old = std::mem::replace(list, fresh);
            unsafe { self.device.free_command_buffers(old.pool, &[old.raw]) };
            return Ok(());
        }
        unsafe {
            self.device
                .reset_command_buffer(list.raw, vk::CommandBufferResetFlags::empty())?
        };
        self.begin(list.raw)
    }

    pub(super) fn free_list(&mut self, list: VulkanCommandList) {
        unsafe { self.device.free_command_buffers(list.pool, &[list.raw]) };
    }

    pub(super) fn submit(
        &mut self,
        queue: &mut VulkanQueue,
        lists: &[&VulkanCommandList],
        waits: &[(vk::Semaphore, u64)],
        signal_value: u64,
    ) -> Result<()> {
        let buffers: SmallVec<[vk::CommandBufferSubmitInfo; 4]> = lists
            .iter()
            .map(|l| {
                vk::CommandBufferSubmitInfo::builder()
                    .command_buffer(l.raw)
                    .build()
            })
            .collect();
        let wait_infos: SmallVec<[vk::SemaphoreSubmitInfo; 4]> = waits
            .iter()
            .map(|(semaphore, value)| {
                vk::SemaphoreSubmitInfo::builder()
                    .semaphore(*semaphore)
                    .value(*value)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                    .build()
            })
            .collect();
        let signal = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(queue.timeline)
            .value(signal_value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .build()];

        let submit = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&buffers)
            .signal_semaphore_infos(&signal)
            .build();
        unsafe {
            self.device
                .queue_submit2(queue.raw, &[submit], vk::Fence::null())?
        };
        Ok(())
    }

    pub(super) fn timeline_value(&self, timeline: vk::Semaphore) -> Result<u64> {
        Ok(unsafe { self.device.get_semaphore_counter_value(timeline)? })
    }

    pub(super) fn wait_timeline(
        &self,
        timeline: vk::Semaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let semaphores = [timeline];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values)
            .build();
        let nanos = timeout.map_or(u64::MAX, |t| t.as_nanos().min(u64::MAX as u128) as u64);
        match unsafe { self.device.wait_semaphores(&info, nanos) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GPUError::Timeout(
                timeout.map_or(u64::MAX, |t| t.as_millis() as u64),
            )),
            Err(err) => Err(err.into()),
        }
    }
}
