// SPDX-License-Identifier: CEPL-1.0
use std::ffi::c_char;

use ash::khr::swapchain;
use ash::{vk, Instance};
use ignis_core::Diagnostics;
use ignis_render::Result;
use tracing::info;

use crate::adapter::{Adapter, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};
use crate::error::VkResultExt;

/// Logical device plus the queues and loaders created alongside it.
pub struct Device {
    pub(crate) raw: ash::Device,
    pub(crate) adapter: vk::PhysicalDevice,
    pub(crate) graphics_family: u32,
    pub(crate) present_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) swapchain_loader: swapchain::Device,
    pub(crate) diag: Diagnostics,
}

impl Device {
    pub(crate) unsafe fn create(instance: &Instance, adapter: &Adapter, diag: &Diagnostics) -> Result<Self> {
        let QueueFamilyIndices { graphics: Some(graphics_family), present: Some(present_family) } =
            adapter.families
        else {
            return Err(diag.fail("create_device", format!("{}: incomplete queue families", adapter.name)).into());
        };

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = adapter
            .families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let exts: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();
        let info = vk::DeviceCreateInfo {
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: exts.len() as u32,
            pp_enabled_extension_names: exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let raw = unsafe { instance.create_device(adapter.handle, &info, None) }.or_fatal(diag, "create_device")?;
        let graphics_queue = unsafe { raw.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { raw.get_device_queue(present_family, 0) };
        let swapchain_loader = swapchain::Device::new(instance, &raw);
        info!("Using GPU: {}", adapter.name);

        Ok(Self {
            raw,
            adapter: adapter.handle,
            graphics_family,
            present_family,
            graphics_queue,
            present_queue,
            swapchain_loader,
            diag: diag.clone(),
        })
    }

    pub fn families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices { graphics: Some(self.graphics_family), present: Some(self.present_family) }
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.raw.device_wait_idle() }.or_fatal(&self.diag, "device_wait_idle")
    }

    /// Caller guarantees every child object is already gone.
    pub(crate) unsafe fn destroy(&self) {
        unsafe { self.raw.destroy_device(None) };
    }
}
