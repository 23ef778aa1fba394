// SPDX-License-Identifier: CEPL-1.0
//! Physical device enumeration and suitability.

use std::ffi::CStr;

use ash::khr::{surface, swapchain};
use ash::{vk, Instance};
use ignis_core::Diagnostics;
use ignis_render::Result;
use tracing::debug;

use crate::error::VkResultExt;
use crate::instance::raw_name;
use crate::surface::SurfaceInfo;

/// Device extensions every adapter must offer.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn all_available(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct families, graphics first. One queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(2);
        for family in [self.graphics, self.present].into_iter().flatten() {
            if !out.contains(&family) {
                out.push(family);
            }
        }
        out
    }

    /// Images are shared between the two families when they differ.
    pub fn sharing_mode(&self) -> vk::SharingMode {
        if self.unique().len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        }
    }
}

/// Prefers a single family that does both; otherwise the first of each.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> QueueFamilyIndices {
    let graphics = |q: &vk::QueueFamilyProperties| {
        q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    };

    let mut out = QueueFamilyIndices::default();
    for (i, q) in families.iter().enumerate() {
        let i = i as u32;
        let present = q.queue_count > 0 && supports_present(i);
        if graphics(q) && present {
            return QueueFamilyIndices { graphics: Some(i), present: Some(i) };
        }
        if out.graphics.is_none() && graphics(q) {
            out.graphics = Some(i);
        }
        if out.present.is_none() && present {
            out.present = Some(i);
        }
    }
    out
}

/// What we learned about one adapter against one surface.
#[derive(Clone, Debug)]
pub struct AdapterProbe {
    pub name: String,
    pub extensions: Vec<String>,
    pub families: QueueFamilyIndices,
    pub surface_available: bool,
}

impl AdapterProbe {
    pub fn missing_extensions(&self) -> Vec<&'static CStr> {
        crate::instance::missing_extensions(&REQUIRED_DEVICE_EXTENSIONS, &self.extensions)
    }

    /// Candidate = required extensions + usable surface + both queue kinds.
    pub fn is_candidate(&self, diag: &Diagnostics) -> bool {
        let missing = self.missing_extensions();
        if !missing.is_empty() {
            diag.info(&format!("{}: missing extension {:?}", self.name, missing));
            return false;
        }
        if !self.surface_available {
            diag.info(&format!("{}: no surface formats or present modes", self.name));
            return false;
        }
        if !self.families.all_available() {
            diag.info(&format!("{}: no graphics/present queue family", self.name));
            return false;
        }
        true
    }
}

#[derive(Clone, Debug)]
pub struct Adapter {
    pub(crate) handle: vk::PhysicalDevice,
    pub name: String,
    pub families: QueueFamilyIndices,
}

pub(crate) unsafe fn probe_adapter(
    instance: &Instance,
    surface_loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    diag: &Diagnostics,
) -> Result<AdapterProbe> {
    let props = unsafe { instance.get_physical_device_properties(phys) };
    let name = raw_name(&props.device_name);

    let extensions = unsafe { instance.enumerate_device_extension_properties(phys) }
        .or_fatal(diag, "enumerate_device_extension_properties")?
        .iter()
        .map(|e| raw_name(&e.extension_name))
        .collect();

    let queue_props = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let mut support = Vec::with_capacity(queue_props.len());
    for i in 0..queue_props.len() as u32 {
        let ok = unsafe { surface_loader.get_physical_device_surface_support(phys, i, surface) }
            .or_fatal(diag, "get_physical_device_surface_support")?;
        support.push(ok);
    }
    let families = find_queue_families(&queue_props, |i| support[i as usize]);

    let surface_available = unsafe { SurfaceInfo::query(surface_loader, phys, surface) }
        .or_fatal(diag, "query_surface_info")?
        .available();

    Ok(AdapterProbe { name, extensions, families, surface_available })
}

/// Every suitable adapter, in enumeration order.
pub(crate) unsafe fn enumerate_adapters(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    diag: &Diagnostics,
) -> Result<Vec<Adapter>> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .or_fatal(diag, "enumerate_physical_devices")?;
    if devices.is_empty() {
        return Err(diag.fail("enumerate_physical_devices", "Failed to find GPU with Vulkan support").into());
    }

    let mut out = Vec::new();
    for phys in devices {
        let probe = unsafe { probe_adapter(instance, surface_loader, phys, surface, diag) }?;
        debug!(name = %probe.name, families = ?probe.families, "probed adapter");
        if probe.is_candidate(diag) {
            out.push(Adapter { handle: phys, name: probe.name, families: probe.families });
        }
    }
    if out.is_empty() {
        return Err(diag.fail("pick_physical_device", "Failed to find a suitable GPU").into());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties { queue_flags: flags, queue_count: 1, ..Default::default() }
    }

    fn suitable() -> AdapterProbe {
        AdapterProbe {
            name: "Test GPU".into(),
            extensions: vec!["VK_KHR_swapchain".into()],
            families: QueueFamilyIndices { graphics: Some(0), present: Some(0) },
            surface_available: true,
        }
    }

    #[test]
    fn combined_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // family 1 and 2 can present; 2 does both
        let found = find_queue_families(&families, |i| i != 0);
        assert_eq!(found, QueueFamilyIndices { graphics: Some(2), present: Some(2) });
        assert_eq!(found.unique(), vec![2]);
        assert_eq!(found.sharing_mode(), vk::SharingMode::EXCLUSIVE);
    }

    #[test]
    fn split_families_share_concurrently() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let found = find_queue_families(&families, |i| i == 1);
        assert_eq!(found, QueueFamilyIndices { graphics: Some(0), present: Some(1) });
        assert!(found.all_available());
        assert_eq!(found.unique(), vec![0, 1]);
        assert_eq!(found.sharing_mode(), vk::SharingMode::CONCURRENT);
    }

    #[test]
    fn no_present_support_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let found = find_queue_families(&families, |_| false);
        assert_eq!(found.graphics, Some(0));
        assert!(!found.all_available());
    }

    #[test]
    fn empty_families_are_ignored() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let found = find_queue_families(&[empty, family(vk::QueueFlags::GRAPHICS)], |_| true);
        assert_eq!(found.graphics, Some(1));
    }

    #[test]
    fn candidate_needs_every_requirement() {
        let diag = Diagnostics::new(|_, _| {});
        assert!(suitable().is_candidate(&diag));

        let mut no_ext = suitable();
        no_ext.extensions.clear();
        assert_eq!(no_ext.missing_extensions(), vec![swapchain::NAME]);
        assert!(!no_ext.is_candidate(&diag));

        let mut no_surface = suitable();
        no_surface.surface_available = false;
        assert!(!no_surface.is_candidate(&diag));

        let mut no_queue = suitable();
        no_queue.families.present = None;
        assert!(!no_queue.is_candidate(&diag));
    }
}
