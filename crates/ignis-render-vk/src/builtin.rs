// SPDX-License-Identifier: CEPL-1.0
//! SPIR-V compiled from `shaders/` at build time.

/// Draws one colored triangle from `gl_VertexIndex`; use 3 vertices.
pub const TRIANGLE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
pub const TRIANGLE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));
