// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

use ash::vk;
use ignis_render::Result;
use tracing::debug;

use crate::device::Device;
use crate::error::{check, VkResultExt};
use crate::registry::ShaderId;
use crate::shader::{Shader, ShaderStage};
use crate::surface::{format_name, Surface};

const ENTRY: &CStr = c"main";

/// Graphics pipeline with its render pass. No vertex input and no
/// descriptors; viewport and scissor are dynamic.
pub struct Pipeline {
    pub(crate) vertex: ShaderId,
    pub(crate) fragment: ShaderId,
    pub(crate) target_format: vk::Format,
    pub(crate) clear_color: [f32; 4],
    pub(crate) render_pass: vk::RenderPass,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) handle: vk::Pipeline,
}

impl Pipeline {
    pub fn build(
        device: &Device,
        vertex: (ShaderId, &Shader),
        fragment: (ShaderId, &Shader),
        target_format: vk::Format,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let diag = &device.diag;
        if vertex.1.stage != ShaderStage::Vertex {
            return Err(diag.fail("create_pipeline", "vertex slot holds a non-vertex shader").into());
        }
        if fragment.1.stage != ShaderStage::Fragment {
            return Err(diag.fail("create_pipeline", "fragment slot holds a non-fragment shader").into());
        }

        let mut pipeline = Self {
            vertex: vertex.0,
            fragment: fragment.0,
            target_format,
            clear_color,
            render_pass: vk::RenderPass::null(),
            layout: vk::PipelineLayout::null(),
            handle: vk::Pipeline::null(),
        };
        unsafe { pipeline.create_objects(device, vertex.1, fragment.1) }?;
        Ok(pipeline)
    }

    pub fn target_format(&self) -> vk::Format {
        self.target_format
    }

    pub fn shaders(&self) -> (ShaderId, ShaderId) {
        (self.vertex, self.fragment)
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    /// Images of `format` can be drawn by this pipeline.
    pub fn accepts(&self, format: vk::Format) -> bool {
        self.target_format == format
    }

    pub fn is_compatible(&self, surface: &Surface) -> bool {
        surface.format().is_some_and(|f| self.accepts(f))
    }

    /// Render pass, layout and pipeline, in that order. On failure whatever
    /// was created is released again.
    pub(crate) unsafe fn create_objects(&mut self, device: &Device, vs: &Shader, fs: &Shader) -> Result<()> {
        let result = unsafe { self.try_create_objects(device, vs, fs) };
        if result.is_err() {
            unsafe { self.destroy(device) };
        }
        result
    }

    unsafe fn try_create_objects(&mut self, device: &Device, vs: &Shader, fs: &Shader) -> Result<()> {
        let d = &device.raw;
        let diag = &device.diag;

        // --- Render pass: one color attachment, cleared, handed to present ---
        let color_att = vk::AttachmentDescription {
            format: self.target_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        let att_ref = vk::AttachmentReference { attachment: 0, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &att_ref,
            ..Default::default()
        };
        // Layout transition waits for the acquire semaphore's stage.
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let rp_info = vk::RenderPassCreateInfo {
            attachment_count: 1,
            p_attachments: &color_att,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        self.render_pass = unsafe { d.create_render_pass(&rp_info, None) }.or_fatal(diag, "create_render_pass")?;

        // --- Layout (no descriptors, no push constants) ---
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        self.layout = unsafe { d.create_pipeline_layout(&layout_info, None) }.or_fatal(diag, "create_pipeline_layout")?;

        // --- Fixed-function state ---
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                stage: vs.stage.flags(),
                module: vs.module,
                p_name: ENTRY.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                stage: fs.stage.flags(),
                module: fs.module,
                p_name: ENTRY.as_ptr(),
                ..Default::default()
            },
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: 1.0,
            ..Default::default()
        };
        // Straight alpha for color; alpha accumulates toward opaque.
        let blend_att = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::TRUE,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            logic_op: vk::LogicOp::COPY,
            attachment_count: 1,
            p_attachments: &blend_att,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: self.layout,
            render_pass: self.render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = match unsafe {
            d.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        } {
            Ok(p) => p,
            Err((_, code)) => {
                check(code, diag, "create_graphics_pipelines")?;
                Vec::new()
            }
        };
        let Some(&handle) = pipelines.first() else {
            return Err(diag.fail("create_graphics_pipelines", "no pipeline returned").into());
        };
        self.handle = handle;
        debug!(format = format_name(self.target_format), "graphics pipeline created");
        Ok(())
    }

    pub(crate) unsafe fn destroy(&mut self, device: &Device) {
        let d = &device.raw;
        unsafe {
            if self.handle != vk::Pipeline::null() {
                d.destroy_pipeline(self.handle, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                d.destroy_pipeline_layout(self.layout, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                d.destroy_render_pass(self.render_pass, None);
            }
        }
        self.handle = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
        self.render_pass = vk::RenderPass::null();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ignis_render::RenderSize;
    use slotmap::KeyData;

    use crate::surface::{Swapchain, SwapchainPlan};

    pub(crate) fn detached(target_format: vk::Format) -> Pipeline {
        Pipeline {
            vertex: ShaderId::from(KeyData::from_ffi(1)),
            fragment: ShaderId::from(KeyData::from_ffi(2)),
            target_format,
            clear_color: [0.0; 4],
            render_pass: vk::RenderPass::null(),
            layout: vk::PipelineLayout::null(),
            handle: vk::Pipeline::null(),
        }
    }

    pub(crate) fn surface_with(format: Option<vk::Format>) -> Surface {
        let mut surface = Surface::new(vk::SurfaceKHR::null(), RenderSize::new(800, 600));
        surface.swapchain = format.map(|format| Swapchain {
            handle: vk::SwapchainKHR::null(),
            plan: SwapchainPlan {
                format: vk::SurfaceFormatKHR { format, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR },
                present_mode: vk::PresentModeKHR::FIFO,
                extent: vk::Extent2D { width: 800, height: 600 },
                image_count: 3,
                transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            },
            images: Vec::new(),
            render_finished: Vec::new(),
        });
        surface
    }

    #[test]
    fn compatible_only_with_matching_format() {
        let pipeline = detached(vk::Format::B8G8R8A8_SRGB);
        assert!(pipeline.is_compatible(&surface_with(Some(vk::Format::B8G8R8A8_SRGB))));
        assert!(!pipeline.is_compatible(&surface_with(Some(vk::Format::B8G8R8A8_UNORM))));
        assert!(!pipeline.is_compatible(&surface_with(None)));
    }
}
