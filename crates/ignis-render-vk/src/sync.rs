// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ignis_render::Result;

use crate::device::Device;
use crate::error::VkResultExt;

/// Per-slot objects. The fence starts signaled so the first wait on a slot
/// returns immediately.
pub(crate) struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub pool: vk::CommandPool,
    pub cmd: vk::CommandBuffer,
}

impl FrameSync {
    unsafe fn create(device: &Device) -> Result<Self> {
        let d = &device.raw;
        let diag = &device.diag;
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            pool: vk::CommandPool::null(),
            cmd: vk::CommandBuffer::null(),
        };

        let result = (|| -> Result<()> {
            unsafe {
                sync.image_available = d
                    .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                    .or_fatal(diag, "create_semaphore")?;
                let fence_ci = vk::FenceCreateInfo { flags: vk::FenceCreateFlags::SIGNALED, ..Default::default() };
                sync.in_flight = d.create_fence(&fence_ci, None).or_fatal(diag, "create_fence")?;

                let pool_info = vk::CommandPoolCreateInfo {
                    queue_family_index: device.graphics_family,
                    flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                    ..Default::default()
                };
                sync.pool = d.create_command_pool(&pool_info, None).or_fatal(diag, "create_command_pool")?;
                let alloc_info = vk::CommandBufferAllocateInfo {
                    command_pool: sync.pool,
                    level: vk::CommandBufferLevel::PRIMARY,
                    command_buffer_count: 1,
                    ..Default::default()
                };
                let bufs = d.allocate_command_buffers(&alloc_info).or_fatal(diag, "allocate_command_buffers")?;
                sync.cmd = bufs[0];
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(sync),
            Err(e) => {
                unsafe { sync.destroy(device) };
                Err(e)
            }
        }
    }

    /// Command buffers go with their pool.
    pub(crate) unsafe fn destroy(&self, device: &Device) {
        let d = &device.raw;
        unsafe {
            if self.pool != vk::CommandPool::null() {
                d.destroy_command_pool(self.pool, None);
            }
            if self.in_flight != vk::Fence::null() {
                d.destroy_fence(self.in_flight, None);
            }
            if self.image_available != vk::Semaphore::null() {
                d.destroy_semaphore(self.image_available, None);
            }
        }
    }
}

pub(crate) unsafe fn create_frame_syncs(device: &Device, count: usize) -> Result<Vec<FrameSync>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        match unsafe { FrameSync::create(device) } {
            Ok(sync) => out.push(sync),
            Err(e) => {
                for sync in &out {
                    unsafe { sync.destroy(device) };
                }
                return Err(e);
            }
        }
    }
    Ok(out)
}
