// SPDX-License-Identifier: CEPL-1.0
use ignis_core::Fatal;
use thiserror::Error;

use crate::frame::FrameState;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Unrecoverable; already reported through the Diagnostics sink.
    #[error(transparent)]
    Fatal(#[from] Fatal),

    /// The surface changed under the swapchain. Rebuild and retry.
    #[error("swapchain is out of date")]
    OutOfDate,

    #[error("{op} called in frame state {state:?}")]
    InvalidState { op: &'static str, state: FrameState },

    #[error("stale {0} handle")]
    StaleHandle(&'static str),

    #[error("{kind} is still used by {users} dependent object(s)")]
    InUse { kind: &'static str, users: usize },

    #[error("pipeline target format {pipeline} does not match surface format {surface}")]
    Incompatible { pipeline: String, surface: String },
}

impl RenderError {
    /// Per-frame conditions that a swapchain rebuild fixes.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::OutOfDate)
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
