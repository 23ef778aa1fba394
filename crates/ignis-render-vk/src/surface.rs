// SPDX-License-Identifier: CEPL-1.0
//! Window surfaces and their swapchains.
//!
//! Selection is split into pure functions over the capability report so it
//! can be checked without a GPU; [`Surface`] applies the resulting
//! [`SwapchainPlan`].

use ash::khr::surface;
use ash::prelude::VkResult;
use ash::vk;
use ignis_render::{RenderError, RenderSize, Result};
use tracing::info;

use crate::device::Device;
use crate::error::VkResultExt;
use crate::image::Image;

/// Capabilities, formats and present modes reported for one adapter/surface.
#[derive(Clone, Debug, Default)]
pub struct SurfaceInfo {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceInfo {
    pub(crate) unsafe fn query(
        loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: loader.get_physical_device_surface_capabilities(phys, surface)?,
                formats: loader.get_physical_device_surface_formats(phys, surface)?,
                present_modes: loader.get_physical_device_surface_present_modes(phys, surface)?,
            })
        }
    }

    pub fn available(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// 8-bit BGRA with non-linear sRGB if offered, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = if vsync {
        &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]
    } else {
        &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]
    };
    // FIFO is the one mode every implementation must support.
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want.width.max(caps.min_image_extent.width).min(caps.max_image_extent.width),
            height: want.height.max(caps.min_image_extent.height).min(caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped unless the maximum is unbounded (0).
/// Whether there is nothing to present to. A defined current extent is the
/// platform's answer; otherwise the requested size decides, since
/// [`choose_extent`] would clamp a zero side up to the minimum.
pub fn surface_is_empty(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> bool {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent.width == 0 || caps.current_extent.height == 0
    } else {
        want.is_empty()
    }
}

pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// `None` when the surface offers no formats.
    pub fn new(info: &SurfaceInfo, want: RenderSize, vsync: bool) -> Option<Self> {
        let caps = &info.capabilities;
        Some(Self {
            format: choose_surface_format(&info.formats)?,
            present_mode: choose_present_mode(&info.present_modes, vsync),
            extent: choose_extent(caps, want),
            image_count: choose_image_count(caps),
            transform: caps.current_transform,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }
}

pub(crate) fn format_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}

pub(crate) fn present_mode_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// Swapchain, its image views, and one render-finished semaphore per image.
pub struct Swapchain {
    pub(crate) handle: vk::SwapchainKHR,
    pub plan: SwapchainPlan,
    pub(crate) images: Vec<Image>,
    pub(crate) render_finished: Vec<vk::Semaphore>,
}

impl Swapchain {
    unsafe fn create(handle: vk::SurfaceKHR, plan: SwapchainPlan, device: &Device) -> VkResult<Self> {
        let families = device.families();
        let unique = families.unique();
        let sharing = families.sharing_mode();
        let info = vk::SwapchainCreateInfoKHR {
            surface: handle,
            min_image_count: plan.image_count,
            image_format: plan.format.format,
            image_color_space: plan.format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: if sharing == vk::SharingMode::CONCURRENT { unique.len() as u32 } else { 0 },
            p_queue_family_indices: unique.as_ptr(),
            pre_transform: plan.transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&info, None) }?;
        let mut out = Self { handle: swapchain, plan, images: Vec::new(), render_finished: Vec::new() };

        // Partially built state is torn down on failure.
        match unsafe { out.create_images(device) } {
            Ok(()) => Ok(out),
            Err(code) => {
                unsafe { out.destroy(device) };
                Err(code)
            }
        }
    }

    unsafe fn create_images(&mut self, device: &Device) -> VkResult<()> {
        let format = self.plan.format.format;
        let extent = self.plan.extent;
        unsafe {
            for raw in device.swapchain_loader.get_swapchain_images(self.handle)? {
                self.images.push(Image::from_swapchain(&device.raw, raw, format, extent)?);
                self.render_finished
                    .push(device.raw.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?);
            }
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    unsafe fn destroy(&mut self, device: &Device) {
        unsafe {
            for image in self.images.drain(..) {
                image.destroy(&device.raw);
            }
            for sem in self.render_finished.drain(..) {
                device.raw.destroy_semaphore(sem, None);
            }
            device.swapchain_loader.destroy_swapchain(self.handle, None);
        }
    }
}

/// A presentation surface. The surface handle lives as long as the window;
/// the swapchain is rebuilt on resize and device changes.
pub struct Surface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) size: RenderSize,
    pub(crate) swapchain: Option<Swapchain>,
}

impl Surface {
    pub(crate) fn new(handle: vk::SurfaceKHR, size: RenderSize) -> Self {
        Self { handle, size, swapchain: None }
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    /// Desired size for the next rebuild.
    pub fn set_size(&mut self, size: RenderSize) {
        self.size = size;
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn format(&self) -> Option<vk::Format> {
        self.swapchain.as_ref().map(|s| s.plan.format.format)
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(|s| s.plan.extent)
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    /// Builds a swapchain from a fresh capability query. A zero-sized
    /// surface yields `OutOfDate` and no swapchain.
    pub(crate) unsafe fn create_swapchain(
        &mut self,
        loader: &surface::Instance,
        device: &Device,
        vsync: bool,
    ) -> Result<()> {
        let diag = &device.diag;
        let info = unsafe { SurfaceInfo::query(loader, device.adapter, self.handle) }
            .or_fatal(diag, "query_surface_info")?;
        let Some(plan) = SwapchainPlan::new(&info, self.size, vsync).filter(|_| info.available()) else {
            return Err(diag.fail("create_swapchain", "surface reports no formats or present modes").into());
        };
        if plan.is_empty() || surface_is_empty(&info.capabilities, self.size) {
            return Err(RenderError::OutOfDate);
        }

        let swapchain = unsafe { Swapchain::create(self.handle, plan, device) }.or_fatal(diag, "create_swapchain")?;
        // The platform's extent is authoritative.
        self.size = RenderSize::new(plan.extent.width, plan.extent.height);
        info!(
            "swapchain ready ({}x{}, {} images, {}, {})",
            plan.extent.width,
            plan.extent.height,
            swapchain.image_count(),
            format_name(plan.format.format),
            present_mode_name(plan.present_mode),
        );
        self.swapchain = Some(swapchain);
        Ok(())
    }

    pub(crate) unsafe fn destroy_swapchain(&mut self, device: &Device) {
        if let Some(mut swapchain) = self.swapchain.take() {
            unsafe { swapchain.destroy(device) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn fmt(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR }
    }

    #[test]
    fn present_mode_follows_vsync() {
        use vk::PresentModeKHR as P;
        let all = [P::FIFO, P::MAILBOX, P::IMMEDIATE];
        assert_eq!(choose_present_mode(&all, false), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&all, true), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO], true), P::FIFO);
        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX], false), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO], false), P::FIFO);
    }

    #[test]
    fn srgb_bgra_is_preferred() {
        let formats = [fmt(vk::Format::R8G8B8A8_UNORM), fmt(vk::Format::B8G8R8A8_SRGB)];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [fmt(vk::Format::R8G8B8A8_UNORM), fmt(vk::Format::B8G8R8A8_UNORM)];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn image_count_stays_in_bounds() {
        for min in 1..6 {
            for max in 0..8 {
                if max != 0 && max < min {
                    continue;
                }
                let n = choose_image_count(&caps(min, max, (800, 600)));
                if max == 0 {
                    assert_eq!(n, min + 1);
                } else {
                    assert!((min..=max).contains(&n), "min {min} max {max} got {n}");
                }
            }
        }
    }

    #[test]
    fn defined_current_extent_is_used_verbatim() {
        let e = choose_extent(&caps(2, 3, (1024, 768)), RenderSize::new(800, 600));
        assert_eq!((e.width, e.height), (1024, 768));
    }

    #[test]
    fn undefined_extent_clamps_the_window_size() {
        let c = caps(2, 3, (u32::MAX, u32::MAX));
        let e = choose_extent(&c, RenderSize::new(800, 600));
        assert_eq!((e.width, e.height), (800, 600));
        let e = choose_extent(&c, RenderSize::new(10_000, 0));
        assert_eq!((e.width, e.height), (4096, 1));
    }

    #[test]
    fn unchanged_inputs_plan_the_same_swapchain() {
        let info = SurfaceInfo {
            capabilities: caps(2, 0, (u32::MAX, u32::MAX)),
            formats: vec![fmt(vk::Format::B8G8R8A8_UNORM), fmt(vk::Format::B8G8R8A8_SRGB)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let size = RenderSize::new(800, 600);
        let first = SwapchainPlan::new(&info, size, true).unwrap();
        let again = SwapchainPlan::new(&info, size, true).unwrap();
        assert_eq!(first.image_count, again.image_count);
        assert_eq!(first.format.format, again.format.format);
        assert_eq!(first.image_count, 3);
        assert_eq!(first.format.format, vk::Format::B8G8R8A8_SRGB);
        assert!(!first.is_empty());
    }

    #[test]
    fn minimized_surface_plans_an_empty_swapchain() {
        let info = SurfaceInfo {
            capabilities: caps(2, 3, (0, 0)),
            formats: vec![fmt(vk::Format::B8G8R8A8_SRGB)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(SwapchainPlan::new(&info, RenderSize::new(800, 600), true).unwrap().is_empty());
        assert!(info.available());
        assert!(!SurfaceInfo::default().available());
    }

    #[test]
    fn defined_extent_overrides_a_stale_zero_size() {
        // resize to 0x0 recorded, but the window is back before the rebuild
        let c = caps(2, 3, (1024, 768));
        assert!(!surface_is_empty(&c, RenderSize::new(0, 0)));
        assert!(surface_is_empty(&caps(2, 3, (0, 768)), RenderSize::new(800, 600)));
    }

    #[test]
    fn undefined_extent_defers_to_the_requested_size() {
        let c = caps(2, 3, (u32::MAX, u32::MAX));
        assert!(surface_is_empty(&c, RenderSize::new(800, 0)));
        assert!(!surface_is_empty(&c, RenderSize::new(800, 600)));
    }
}
