// SPDX-License-Identifier: CEPL-1.0
pub mod error;
pub mod frame;

pub use error::{RenderError, Result};
pub use frame::{Acquired, FrameBackend, FrameScheduler, FrameState, PresentStatus, Recorder};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}
