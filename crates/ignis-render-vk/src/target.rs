// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ignis_render::{Acquired, FrameBackend, RenderError, Result};

use crate::context::Context;
use crate::device::Device;
use crate::error::{check, VkResultExt};
use crate::framebuffer::FramebufferSet;
use crate::registry::{FramebufferSetId, SurfaceId};
use crate::surface::{Surface, Swapchain};
use crate::sync::FrameSync;

/// One surface and one framebuffer set, driven by a
/// [`FrameScheduler`](ignis_render::FrameScheduler).
pub struct FrameTarget<'a> {
    ctx: &'a mut Context,
    surface: SurfaceId,
    framebuffers: FramebufferSetId,
}

impl<'a> FrameTarget<'a> {
    pub(crate) fn new(ctx: &'a mut Context, surface: SurfaceId, framebuffers: FramebufferSetId) -> Self {
        Self { ctx, surface, framebuffers }
    }

    fn device(&self) -> Result<&Device> {
        self.ctx.device()
    }

    fn sync(&self, slot: usize) -> Result<&FrameSync> {
        self.ctx.sync.get(slot).ok_or_else(|| {
            self.ctx
                .diagnostics()
                .fail("frame", format!("slot {slot} exceeds {} frames in flight", self.ctx.sync.len()))
                .into()
        })
    }

    fn surface(&self) -> Result<&Surface> {
        self.ctx.surface(self.surface)
    }

    fn set(&self) -> Result<&FramebufferSet> {
        self.ctx.framebuffers(self.framebuffers)
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.surface()?.swapchain().ok_or(RenderError::OutOfDate)
    }
}

impl FrameBackend for FrameTarget<'_> {
    fn image_count(&self) -> usize {
        self.surface().map_or(0, Surface::image_count)
    }

    fn wait_slot(&mut self, slot: usize) -> Result<()> {
        let device = self.device()?;
        let fence = self.sync(slot)?.in_flight;
        unsafe { device.raw.wait_for_fences(&[fence], true, u64::MAX) }.or_fatal(&device.diag, "wait_for_fences")
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let device = self.device()?;
        let fence = self.sync(slot)?.in_flight;
        unsafe { device.raw.reset_fences(&[fence]) }.or_fatal(&device.diag, "reset_fences")
    }

    fn acquire(&mut self, slot: usize) -> Result<Acquired> {
        let device = self.device()?;
        let semaphore = self.sync(slot)?.image_available;
        let swapchain = self.swapchain()?;
        let result = unsafe {
            device
                .swapchain_loader
                .acquire_next_image(swapchain.handle, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => Ok(Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::OutOfDate),
            Err(code) => Err(device.diag.fail("acquire_next_image", format!("Vulkan error [{code}]")).into()),
        }
    }

    fn begin_pass(&mut self, slot: usize, image: u32) -> Result<()> {
        let device = self.device()?;
        let (d, diag) = (&device.raw, &device.diag);
        let cmd = self.sync(slot)?.cmd;
        let set = self.set()?;
        let pipeline = self.ctx.pipeline(set.pipeline)?;
        let Some(fb) = set.framebuffers.get(image as usize) else {
            return Err(diag.fail("begin_pass", format!("no framebuffer for image {image}")).into());
        };

        let render_area = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: fb.extent };
        let clears = [vk::ClearValue { color: vk::ClearColorValue { float32: pipeline.clear_color } }];
        let rp_begin = vk::RenderPassBeginInfo {
            render_pass: pipeline.render_pass,
            framebuffer: fb.handle,
            render_area,
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: fb.extent.width as f32,
            height: fb.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .or_fatal(diag, "reset_command_buffer")?;
            let begin = vk::CommandBufferBeginInfo {
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin).or_fatal(diag, "begin_command_buffer")?;
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle);
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[render_area]);
        }
        Ok(())
    }

    fn draw(&mut self, slot: usize, vertices: u32, instances: u32) -> Result<()> {
        let device = self.device()?;
        let cmd = self.sync(slot)?.cmd;
        unsafe { device.raw.cmd_draw(cmd, vertices, instances, 0, 0) };
        Ok(())
    }

    fn end_pass(&mut self, slot: usize) {
        if let (Ok(device), Ok(sync)) = (self.device(), self.sync(slot)) {
            unsafe { device.raw.cmd_end_render_pass(sync.cmd) };
        }
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<()> {
        let device = self.device()?;
        let (d, diag) = (&device.raw, &device.diag);
        let sync = self.sync(slot)?;
        let Some(&render_finished) = self.swapchain()?.render_finished.get(image as usize) else {
            return Err(diag.fail("queue_submit", format!("no semaphore for image {image}")).into());
        };

        let waits = [sync.image_available];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signals = [render_finished];
        let cmds = [sync.cmd];
        let submit = vk::SubmitInfo {
            wait_semaphore_count: 1,
            p_wait_semaphores: waits.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: cmds.as_ptr(),
            signal_semaphore_count: 1,
            p_signal_semaphores: signals.as_ptr(),
            ..Default::default()
        };
        unsafe {
            d.end_command_buffer(sync.cmd).or_fatal(diag, "end_command_buffer")?;
            d.queue_submit(device.graphics_queue, std::slice::from_ref(&submit), sync.in_flight)
                .or_fatal(diag, "queue_submit")
        }
    }

    fn abandon(&mut self, slot: usize) -> Result<()> {
        let device = self.device()?;
        let (d, diag) = (&device.raw, &device.diag);
        let sync = self.sync(slot)?;

        // Waits on the acquire semaphore and signals the fence, nothing else.
        let waits = [sync.image_available];
        let stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit = vk::SubmitInfo {
            wait_semaphore_count: 1,
            p_wait_semaphores: waits.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            ..Default::default()
        };
        unsafe {
            d.reset_fences(&[sync.in_flight]).or_fatal(diag, "reset_fences")?;
            d.queue_submit(device.graphics_queue, std::slice::from_ref(&submit), sync.in_flight)
                .or_fatal(diag, "queue_submit")
        }
    }

    fn present(&mut self, _slot: usize, image: u32) -> Result<bool> {
        let device = self.device()?;
        let diag = &device.diag;
        let swapchain = self.swapchain()?;
        let Some(&render_finished) = swapchain.render_finished.get(image as usize) else {
            return Err(diag.fail("queue_present", format!("no semaphore for image {image}")).into());
        };

        let mut results = [vk::Result::SUCCESS];
        let present = vk::PresentInfoKHR {
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_finished,
            swapchain_count: 1,
            p_swapchains: &swapchain.handle,
            p_image_indices: &image,
            p_results: results.as_mut_ptr(),
            ..Default::default()
        };
        match unsafe { device.swapchain_loader.queue_present(device.present_queue, &present) } {
            Ok(suboptimal) => {
                if results[0] != vk::Result::SUBOPTIMAL_KHR {
                    check(results[0], diag, "queue_present")?;
                }
                Ok(suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::OutOfDate),
            Err(code) => Err(diag.fail("queue_present", format!("Vulkan error [{code}]")).into()),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()
    }

    fn rebuild_swapchain(&mut self) -> Result<()> {
        self.ctx.recreate_swapchain(self.surface)
    }
}
