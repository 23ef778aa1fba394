// SPDX-License-Identifier: CEPL-1.0
//! Instance creation: validation layer sets, required extensions and the
//! debug messenger that routes driver messages into [`Diagnostics`].

use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};

use ash::ext::debug_utils as ext_debug;
use ash::{vk, Entry, Instance};
use ignis_core::{Diagnostics, Settings, Severity, Version};
use ignis_render::Result;
use raw_window_handle::RawDisplayHandle;
use tracing::debug;

use crate::error::VkResultExt;

/// Reads a fixed-size, NUL-terminated name out of a Vulkan properties struct.
pub(crate) fn raw_name(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// First layer set whose every layer is installed. Missing layers are
/// reported as warnings before falling through to the next set.
pub fn select_layer_set<'a>(
    available: &[String],
    sets: &'a [Vec<String>],
    diag: &Diagnostics,
) -> Option<&'a [String]> {
    for set in sets {
        match set.iter().find(|layer| !available.contains(layer)) {
            Some(missing) => {
                diag.warn(&format!("Cannot find layer: {missing}"));
                diag.info("Trying alternative layer set...");
            }
            None => return Some(set),
        }
    }
    None
}

/// Required names that the implementation does not report.
pub fn missing_extensions<'a>(required: &[&'a CStr], available: &[String]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| {
            let name = name.to_string_lossy();
            !available.iter().any(|a| *a == name)
        })
        .collect()
}

/// Checked from least to most severe; anything else is `Misc`.
pub fn severity_from_flags(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Severity {
    use vk::DebugUtilsMessageSeverityFlagsEXT as F;
    if flags.contains(F::VERBOSE) {
        Severity::Verbose
    } else if flags.contains(F::INFO) {
        Severity::Info
    } else if flags.contains(F::WARNING) {
        Severity::Warning
    } else if flags.contains(F::ERROR) {
        Severity::Error
    } else {
        Severity::Misc
    }
}

fn pack_version(v: Version) -> u32 {
    vk::make_api_version(0, v.major, v.minor, v.patch)
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || user.is_null() {
        return vk::FALSE;
    }
    // SAFETY: `user` points at the boxed sink owned by `DebugMessenger`,
    // which outlives the instance.
    let diag = unsafe { &*(user as *const Diagnostics) };
    let msg = unsafe { (*data).p_message };
    if msg.is_null() {
        return vk::FALSE;
    }
    let text = unsafe { CStr::from_ptr(msg) }.to_string_lossy();
    // A panicking sink must not unwind into the driver.
    let _ = catch_unwind(AssertUnwindSafe(|| diag.log(severity_from_flags(severity), &text)));
    vk::FALSE
}

fn messenger_info<'a>(user: *mut c_void) -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        p_user_data: user,
        ..Default::default()
    }
}

pub(crate) struct DebugMessenger {
    loader: ext_debug::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub(crate) unsafe fn destroy(&self) {
        unsafe { self.loader.destroy_debug_utils_messenger(self.messenger, None) };
    }
}

/// Everything instance-scoped. `sink` backs the messenger's user data and
/// has to outlive `destroy_instance`.
pub(crate) struct InstanceBundle {
    pub instance: Instance,
    pub debug: Option<DebugMessenger>,
    pub sink: Box<Diagnostics>,
}

pub(crate) unsafe fn create_instance(
    entry: &Entry,
    settings: &Settings,
    display: RawDisplayHandle,
) -> Result<InstanceBundle> {
    let diag = &settings.diagnostics;
    let sink = Box::new(diag.clone());
    let user = &*sink as *const Diagnostics as *mut c_void;

    // --- Layers ---
    let layers: Vec<CString> = if settings.validation {
        let available: Vec<String> = unsafe { entry.enumerate_instance_layer_properties() }
            .or_fatal(diag, "enumerate_instance_layer_properties")?
            .iter()
            .map(|l| raw_name(&l.layer_name))
            .collect();
        let Some(set) = select_layer_set(&available, &settings.validation_layer_sets, diag) else {
            return Err(diag.fail("create_instance", "no required validation layers found").into());
        };
        set.iter()
            .map(|l| CString::new(l.as_str()))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| diag.fail("create_instance", format!("bad layer name: {e}")))?
    } else {
        Vec::new()
    };
    let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // --- Extensions: windowing system + debug utils when validating ---
    let wsi = ash_window::enumerate_required_extensions(display)
        .or_fatal(diag, "enumerate_required_extensions")?;
    let mut required: Vec<&CStr> = wsi.iter().map(|&p| unsafe { CStr::from_ptr(p) }).collect();
    if settings.validation {
        required.push(ext_debug::NAME);
    }
    let available: Vec<String> = unsafe { entry.enumerate_instance_extension_properties(None) }
        .or_fatal(diag, "enumerate_instance_extension_properties")?
        .iter()
        .map(|e| raw_name(&e.extension_name))
        .collect();
    let missing = missing_extensions(&required, &available);
    if !missing.is_empty() {
        let names: Vec<_> = missing.iter().map(|n| n.to_string_lossy()).collect();
        return Err(diag
            .fail("create_instance", format!("missing instance extensions: {}", names.join(", ")))
            .into());
    }
    let ext_ptrs: Vec<*const c_char> = required.iter().map(|n| n.as_ptr()).collect();

    // --- Application info ---
    let app_name = CString::new(settings.app_name.as_str())
        .map_err(|e| diag.fail("create_instance", format!("bad application name: {e}")))?;
    let engine_name = CString::new(settings.engine_name.as_str())
        .map_err(|e| diag.fail("create_instance", format!("bad engine name: {e}")))?;
    let api_version = unsafe { entry.try_enumerate_instance_version() }
        .or_fatal(diag, "enumerate_instance_version")?
        .unwrap_or(vk::API_VERSION_1_0);
    let app_info = vk::ApplicationInfo {
        p_application_name: app_name.as_ptr(),
        application_version: pack_version(settings.app_version),
        p_engine_name: engine_name.as_ptr(),
        engine_version: pack_version(settings.engine_version),
        api_version,
        ..Default::default()
    };

    // Chained so instance creation and destruction are covered too.
    let mut chained = messenger_info(user);
    let mut create_info = vk::InstanceCreateInfo {
        p_application_info: &app_info,
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        ..Default::default()
    };
    if settings.validation {
        create_info = create_info.push_next(&mut chained);
    }
    let instance = unsafe { entry.create_instance(&create_info, None) }.or_fatal(diag, "create_instance")?;
    debug!(layers = layers.len(), extensions = ext_ptrs.len(), "instance created");

    let debug = if settings.validation {
        let loader = ext_debug::Instance::new(entry, &instance);
        match unsafe { loader.create_debug_utils_messenger(&messenger_info(user), None) } {
            Ok(messenger) => Some(DebugMessenger { loader, messenger }),
            Err(code) => {
                unsafe { instance.destroy_instance(None) };
                return Err(diag.fail("create_debug_utils_messenger", format!("Vulkan error [{code}]")).into());
            }
        }
    } else {
        None
    };

    Ok(InstanceBundle { instance, debug, sink })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording() -> (Diagnostics, Arc<Mutex<Vec<(Severity, String)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let diag = Diagnostics::new(move |s, t| sink.lock().unwrap().push((s, t.to_string())));
        (diag, log)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_fully_available_layer_set_wins() {
        let (diag, log) = recording();
        let sets = vec![
            names(&["VK_LAYER_KHRONOS_validation"]),
            names(&["VK_LAYER_LUNARG_standard_validation"]),
            names(&["VK_LAYER_GOOGLE_threading", "VK_LAYER_LUNARG_core_validation"]),
        ];
        let available = names(&[
            "VK_LAYER_LUNARG_standard_validation",
            "VK_LAYER_GOOGLE_threading",
            "VK_LAYER_LUNARG_core_validation",
        ]);
        let chosen = select_layer_set(&available, &sets, &diag).unwrap();
        assert_eq!(chosen, &sets[1][..]);

        let log = log.lock().unwrap();
        assert_eq!(log[0], (Severity::Warning, "Cannot find layer: VK_LAYER_KHRONOS_validation".into()));
        assert_eq!(log[1].0, Severity::Info);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn partially_installed_set_is_skipped() {
        let (diag, _) = recording();
        let sets = vec![names(&["A", "B"]), names(&["C"])];
        let chosen = select_layer_set(&names(&["A", "C"]), &sets, &diag).unwrap();
        assert_eq!(chosen, &sets[1][..]);
    }

    #[test]
    fn no_layer_set_available() {
        let (diag, _) = recording();
        let sets = vec![names(&["A"]), names(&["B"])];
        assert!(select_layer_set(&[], &sets, &diag).is_none());
    }

    #[test]
    fn missing_extensions_are_reported_by_name() {
        let required = [c"VK_KHR_surface", c"VK_KHR_xcb_surface", c"VK_EXT_debug_utils"];
        let available = names(&["VK_KHR_surface", "VK_EXT_debug_utils"]);
        assert_eq!(missing_extensions(&required, &available), vec![c"VK_KHR_xcb_surface"]);
        assert!(missing_extensions(&required[..1], &available).is_empty());
    }

    #[test]
    fn severity_mapping_checks_lowest_bit_first() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as F;
        assert_eq!(severity_from_flags(F::VERBOSE), Severity::Verbose);
        assert_eq!(severity_from_flags(F::INFO), Severity::Info);
        assert_eq!(severity_from_flags(F::WARNING), Severity::Warning);
        assert_eq!(severity_from_flags(F::ERROR), Severity::Error);
        assert_eq!(severity_from_flags(F::WARNING | F::ERROR), Severity::Warning);
        assert_eq!(severity_from_flags(F::empty()), Severity::Misc);
    }

    #[test]
    fn callback_routes_into_sink_and_never_aborts() {
        let (diag, log) = recording();
        let msg = c"validation says hi";
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: msg.as_ptr(),
            ..Default::default()
        };
        let user = &diag as *const Diagnostics as *mut c_void;
        let ret = unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                user,
            )
        };
        assert_eq!(ret, vk::FALSE);
        assert_eq!(log.lock().unwrap()[0], (Severity::Error, "validation says hi".into()));
    }

    #[test]
    fn raw_names_stop_at_nul() {
        let mut raw = [0 as c_char; 16];
        for (dst, src) in raw.iter_mut().zip(b"VK_KHR_surface") {
            *dst = *src as c_char;
        }
        assert_eq!(raw_name(&raw), "VK_KHR_surface");
    }
}
