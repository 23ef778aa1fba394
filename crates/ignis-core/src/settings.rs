// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::diag::Diagnostics;

/// Upper bound on per-slot frame sync sets.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WindowSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_true")]
    pub resizable: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        WindowSettings {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: true,
        }
    }
}

/// Everything the Context needs at construction time.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub app_version: Version,
    #[serde(default = "default_engine_name")]
    pub engine_name: String,
    #[serde(default = "default_engine_version")]
    pub engine_version: Version,
    #[serde(default)]
    pub validation: bool,
    /// Alternative layer sets; the first one fully available is enabled.
    #[serde(default = "default_layer_sets")]
    pub validation_layer_sets: Vec<Vec<String>>,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default = "default_true")]
    pub vsync: bool,
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    #[serde(skip)]
    pub diagnostics: Diagnostics,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            app_name: default_app_name(),
            app_version: Version::default(),
            engine_name: default_engine_name(),
            engine_version: default_engine_version(),
            validation: false,
            validation_layer_sets: default_layer_sets(),
            window: WindowSettings::default(),
            vsync: true,
            clear_color: default_clear(),
            frames_in_flight: default_frames_in_flight(),
            diagnostics: Diagnostics::default(),
        }
    }
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reads `path`; a missing file gives defaults, a malformed one is
    /// reported and also gives defaults.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(s) => Self::from_toml(&s).unwrap_or_else(|e| {
                tracing::warn!("ignoring malformed config {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }
}

fn default_width() -> u32 {
    800
}
fn default_height() -> u32 {
    600
}
fn default_title() -> String {
    "ignis".to_owned()
}
fn default_true() -> bool {
    true
}
fn default_app_name() -> String {
    "App".to_owned()
}
fn default_engine_name() -> String {
    "ignis".to_owned()
}
fn default_engine_version() -> Version {
    Version::new(0, 1, 0)
}
fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}
fn default_frames_in_flight() -> usize {
    1
}
fn default_layer_sets() -> Vec<Vec<String>> {
    let set = |names: &[&str]| names.iter().map(|n| (*n).to_owned()).collect();
    vec![
        set(&["VK_LAYER_KHRONOS_validation"]),
        set(&["VK_LAYER_LUNARG_standard_validation"]),
        set(&[
            "VK_LAYER_GOOGLE_threading",
            "VK_LAYER_LUNARG_parameter_validation",
            "VK_LAYER_LUNARG_object_tracker",
            "VK_LAYER_LUNARG_core_validation",
            "VK_LAYER_GOOGLE_unique_objects",
        ]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let s = Settings::from_toml("").unwrap();
        assert!(!s.validation);
        assert!(s.vsync);
        assert_eq!(s.window, WindowSettings::default());
        assert_eq!(s.validation_layer_sets[0], vec!["VK_LAYER_KHRONOS_validation"]);
        assert_eq!(s.validation_layer_sets.len(), 3);
        assert_eq!(s.frames_in_flight(), 1);
    }

    #[test]
    fn partial_config_overrides_only_given_fields() {
        let s = Settings::from_toml(
            r#"
            app_name = "demo"
            validation = true
            vsync = false
            validation_layer_sets = [["A", "B"], ["C"]]

            [app_version]
            major = 2
            minor = 3
            patch = 4

            [window]
            width = 1280
            title = "hi"
            "#,
        )
        .unwrap();
        assert_eq!(s.app_name, "demo");
        assert_eq!(s.app_version, Version::new(2, 3, 4));
        assert!(s.validation);
        assert!(!s.vsync);
        assert_eq!(s.validation_layer_sets, vec![vec!["A", "B"], vec!["C"]]);
        assert_eq!(s.window.width, 1280);
        assert_eq!(s.window.height, 600);
        assert_eq!(s.window.title, "hi");
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let zero = Settings::from_toml("frames_in_flight = 0").unwrap();
        assert_eq!(zero.frames_in_flight(), 1);
        let many = Settings::from_toml("frames_in_flight = 9").unwrap();
        assert_eq!(many.frames_in_flight(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let s = Settings::load("/definitely/not/here/ignis.toml");
        assert_eq!(s.engine_name, "ignis");
    }
}
