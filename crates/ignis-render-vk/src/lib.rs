// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend: context, surfaces and swapchains, shaders, pipelines,
//! framebuffers, and a [`FrameTarget`] that plugs into
//! [`ignis_render::FrameScheduler`].

pub mod adapter;
pub mod builtin;
mod context;
mod device;
mod error;
mod framebuffer;
mod image;
mod instance;
mod pipeline;
pub mod registry;
mod shader;
mod surface;
mod sync;
mod target;

pub use ash::vk;

pub use adapter::{find_queue_families, AdapterProbe, QueueFamilyIndices};
pub use context::Context;
pub use device::Device;
pub use error::is_benign;
pub use framebuffer::{Framebuffer, FramebufferSet};
pub use image::Image;
pub use instance::{missing_extensions, select_layer_set, severity_from_flags};
pub use pipeline::Pipeline;
pub use registry::{FramebufferSetId, PipelineId, Registry, ShaderId, SurfaceId};
pub use shader::{compile_glsl, Shader, ShaderSource, ShaderStage};
pub use surface::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, surface_is_empty, Surface, SurfaceInfo,
    Swapchain, SwapchainPlan,
};
pub use target::FrameTarget;
