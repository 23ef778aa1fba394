// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ignis_render::{RenderError, Result};

use crate::device::Device;
use crate::error::VkResultExt;
use crate::image::Image;
use crate::pipeline::Pipeline;
use crate::registry::{PipelineId, SurfaceId};
use crate::surface::Surface;

/// Binds one swap image to a pipeline's render pass.
#[derive(Clone, Copy, Debug)]
pub struct Framebuffer {
    pub(crate) handle: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

impl Framebuffer {
    pub fn build(device: &Device, image: &Image, pipeline: &Pipeline) -> Result<Self> {
        let info = vk::FramebufferCreateInfo {
            render_pass: pipeline.render_pass,
            attachment_count: 1,
            p_attachments: &image.view,
            width: image.extent.width,
            height: image.extent.height,
            layers: 1,
            ..Default::default()
        };
        let handle =
            unsafe { device.raw.create_framebuffer(&info, None) }.or_fatal(&device.diag, "create_framebuffer")?;
        Ok(Self { handle, extent: image.extent })
    }

    pub(crate) unsafe fn destroy(&self, device: &Device) {
        unsafe { device.raw.destroy_framebuffer(self.handle, None) };
    }
}

/// One framebuffer per swap image of `surface`, built against `pipeline`.
/// Torn down and rebuilt with the swapchain; the set itself keeps its id.
pub struct FramebufferSet {
    pub(crate) surface: SurfaceId,
    pub(crate) pipeline: PipelineId,
    pub(crate) framebuffers: Vec<Framebuffer>,
}

impl FramebufferSet {
    pub fn build(
        device: &Device,
        surface: (SurfaceId, &Surface),
        pipeline: (PipelineId, &Pipeline),
    ) -> Result<Self> {
        let mut set = Self { surface: surface.0, pipeline: pipeline.0, framebuffers: Vec::new() };
        unsafe { set.create(device, surface.1, pipeline.1) }?;
        Ok(set)
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    /// Framebuffers for the surface's current swapchain, none while it has
    /// no swapchain. Fails with `Incompatible` when the pipeline targets
    /// another format.
    pub(crate) unsafe fn create(&mut self, device: &Device, surface: &Surface, pipeline: &Pipeline) -> Result<()> {
        let Some(swapchain) = surface.swapchain() else {
            return Ok(());
        };
        if !pipeline.is_compatible(surface) {
            return Err(RenderError::Incompatible {
                pipeline: format!("{:?}", pipeline.target_format()),
                surface: format!("{:?}", swapchain.plan.format.format),
            });
        }
        for image in &swapchain.images {
            match Framebuffer::build(device, image, pipeline) {
                Ok(fb) => self.framebuffers.push(fb),
                Err(e) => {
                    unsafe { self.destroy(device) };
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub(crate) unsafe fn destroy(&mut self, device: &Device) {
        for fb in self.framebuffers.drain(..) {
            unsafe { fb.destroy(device) };
        }
    }
}
