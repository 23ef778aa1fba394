// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub mod diag;
pub mod settings;

pub use diag::{Diagnostics, Fatal, Severity};
pub use settings::{Settings, Version, WindowSettings, MAX_FRAMES_IN_FLIGHT};

/// Installs the global fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
