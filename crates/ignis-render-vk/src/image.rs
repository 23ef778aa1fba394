// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

/// A swap image and its view. The image itself belongs to the swapchain;
/// only the view is ours to destroy.
#[derive(Clone, Copy, Debug)]
pub struct Image {
    pub(crate) view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Image {
    pub(crate) unsafe fn from_swapchain(
        device: &ash::Device,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> VkResult<Self> {
        let info = vk::ImageViewCreateInfo {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            components: vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            },
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = unsafe { device.create_image_view(&info, None) }?;
        Ok(Self { view, format, extent })
    }

    pub(crate) unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_image_view(self.view, None) };
    }
}
