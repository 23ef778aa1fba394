// SPDX-License-Identifier: CEPL-1.0
//! Generation-checked storage for every GPU object a context owns.
//!
//! Callers hold keys, never the objects; a key whose object was destroyed
//! stops resolving instead of aliasing a newer one.

use ignis_render::{RenderError, Result};
use slotmap::{new_key_type, SlotMap};

use crate::framebuffer::FramebufferSet;
use crate::pipeline::Pipeline;
use crate::shader::Shader;
use crate::surface::Surface;

new_key_type! {
    pub struct SurfaceId;
    pub struct ShaderId;
    pub struct PipelineId;
    pub struct FramebufferSetId;
}

/// Device-scoped object kinds, in the order they are released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ObjectClass {
    Framebuffers,
    Swapchains,
    Pipelines,
    Shaders,
}

/// Restoring on a new device walks this backwards.
pub(crate) const RELEASE_ORDER: [ObjectClass; 4] = [
    ObjectClass::Framebuffers,
    ObjectClass::Swapchains,
    ObjectClass::Pipelines,
    ObjectClass::Shaders,
];

impl ObjectClass {
    /// Classes whose objects this one's objects are built from.
    pub(crate) fn dependencies(self) -> &'static [ObjectClass] {
        match self {
            // image views of the swapchain, render pass of the pipeline
            ObjectClass::Framebuffers => &[ObjectClass::Swapchains, ObjectClass::Pipelines],
            ObjectClass::Pipelines => &[ObjectClass::Shaders],
            ObjectClass::Swapchains | ObjectClass::Shaders => &[],
        }
    }
}

#[derive(Default)]
pub struct Registry {
    pub(crate) surfaces: SlotMap<SurfaceId, Surface>,
    pub(crate) shaders: SlotMap<ShaderId, Shader>,
    pub(crate) pipelines: SlotMap<PipelineId, Pipeline>,
    pub(crate) framebuffers: SlotMap<FramebufferSetId, FramebufferSet>,
}

impl Registry {
    pub fn pipelines_using_shader(&self, shader: ShaderId) -> usize {
        self.pipelines
            .values()
            .filter(|p| p.vertex == shader || p.fragment == shader)
            .count()
    }

    pub fn sets_for_pipeline(&self, pipeline: PipelineId) -> Vec<FramebufferSetId> {
        self.framebuffers
            .iter()
            .filter(|(_, set)| set.pipeline == pipeline)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn sets_for_surface(&self, surface: SurfaceId) -> Vec<FramebufferSetId> {
        self.framebuffers
            .iter()
            .filter(|(_, set)| set.surface == surface)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn check_removable_shader(&self, id: ShaderId) -> Result<()> {
        if !self.shaders.contains_key(id) {
            return Err(RenderError::StaleHandle("shader"));
        }
        match self.pipelines_using_shader(id) {
            0 => Ok(()),
            users => Err(RenderError::InUse { kind: "shader", users }),
        }
    }

    pub fn check_removable_pipeline(&self, id: PipelineId) -> Result<()> {
        if !self.pipelines.contains_key(id) {
            return Err(RenderError::StaleHandle("pipeline"));
        }
        match self.sets_for_pipeline(id).len() {
            0 => Ok(()),
            users => Err(RenderError::InUse { kind: "pipeline", users }),
        }
    }

    pub fn check_removable_surface(&self, id: SurfaceId) -> Result<()> {
        if !self.surfaces.contains_key(id) {
            return Err(RenderError::StaleHandle("surface"));
        }
        match self.sets_for_surface(id).len() {
            0 => Ok(()),
            users => Err(RenderError::InUse { kind: "surface", users }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
            && self.shaders.is_empty()
            && self.pipelines.is_empty()
            && self.framebuffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    use crate::pipeline::tests::{detached, surface_with};
    use crate::shader::ShaderStage;

    fn shader(stage: ShaderStage) -> Shader {
        Shader { stage, code: Vec::new(), module: vk::ShaderModule::null() }
    }

    #[test]
    fn removed_keys_go_stale() {
        let mut reg = Registry::default();
        let a = reg.shaders.insert(shader(ShaderStage::Vertex));
        reg.shaders.remove(a);
        let b = reg.shaders.insert(shader(ShaderStage::Fragment));
        assert!(reg.shaders.get(a).is_none());
        assert_eq!(reg.shaders[b].stage, ShaderStage::Fragment);
        assert_ne!(a, b);
    }

    #[test]
    fn dependency_queries_follow_references() {
        let mut reg = Registry::default();
        let vs = reg.shaders.insert(shader(ShaderStage::Vertex));
        let fs = reg.shaders.insert(shader(ShaderStage::Fragment));
        let other = reg.shaders.insert(shader(ShaderStage::Fragment));

        let mut p = detached(vk::Format::B8G8R8A8_SRGB);
        p.vertex = vs;
        p.fragment = fs;
        let pid = reg.pipelines.insert(p);
        let sid = reg.surfaces.insert(surface_with(Some(vk::Format::B8G8R8A8_SRGB)));
        let second = reg.surfaces.insert(surface_with(None));
        let set = reg.framebuffers.insert(FramebufferSet { surface: sid, pipeline: pid, framebuffers: Vec::new() });

        assert_eq!(reg.pipelines_using_shader(vs), 1);
        assert_eq!(reg.pipelines_using_shader(fs), 1);
        assert_eq!(reg.pipelines_using_shader(other), 0);
        assert_eq!(reg.sets_for_pipeline(pid), vec![set]);
        assert_eq!(reg.sets_for_surface(sid), vec![set]);
        assert!(reg.sets_for_surface(second).is_empty());
        assert!(!reg.is_empty());
    }

    #[test]
    fn referenced_objects_are_not_removable() {
        let mut reg = Registry::default();
        let vs = reg.shaders.insert(shader(ShaderStage::Vertex));
        let fs = reg.shaders.insert(shader(ShaderStage::Fragment));
        let spare = reg.shaders.insert(shader(ShaderStage::Fragment));

        let mut p = detached(vk::Format::B8G8R8A8_SRGB);
        p.vertex = vs;
        p.fragment = fs;
        let pid = reg.pipelines.insert(p);
        let sid = reg.surfaces.insert(surface_with(Some(vk::Format::B8G8R8A8_SRGB)));
        let set = reg.framebuffers.insert(FramebufferSet { surface: sid, pipeline: pid, framebuffers: Vec::new() });

        assert!(matches!(
            reg.check_removable_shader(vs),
            Err(RenderError::InUse { kind: "shader", users: 1 })
        ));
        assert!(reg.check_removable_shader(spare).is_ok());
        assert!(matches!(
            reg.check_removable_pipeline(pid),
            Err(RenderError::InUse { kind: "pipeline", users: 1 })
        ));
        assert!(matches!(
            reg.check_removable_surface(sid),
            Err(RenderError::InUse { kind: "surface", users: 1 })
        ));

        // dropping the framebuffer set frees the pipeline and surface, but
        // the pipeline still pins its shaders
        reg.framebuffers.remove(set);
        assert!(reg.check_removable_pipeline(pid).is_ok());
        assert!(reg.check_removable_surface(sid).is_ok());
        assert!(reg.check_removable_shader(fs).is_err());
        reg.pipelines.remove(pid);
        assert!(reg.check_removable_shader(fs).is_ok());
    }

    #[test]
    fn removal_checks_reject_stale_keys() {
        let mut reg = Registry::default();
        let vs = reg.shaders.insert(shader(ShaderStage::Vertex));
        reg.shaders.remove(vs);
        let pid = reg.pipelines.insert(detached(vk::Format::B8G8R8A8_SRGB));
        reg.pipelines.remove(pid);
        let sid = reg.surfaces.insert(surface_with(None));
        reg.surfaces.remove(sid);

        assert!(matches!(reg.check_removable_shader(vs), Err(RenderError::StaleHandle("shader"))));
        assert!(matches!(reg.check_removable_pipeline(pid), Err(RenderError::StaleHandle("pipeline"))));
        assert!(matches!(reg.check_removable_surface(sid), Err(RenderError::StaleHandle("surface"))));
    }

    #[test]
    fn objects_are_released_before_what_they_are_built_from() {
        let position = |class: ObjectClass| RELEASE_ORDER.iter().position(|c| *c == class).unwrap();
        for (i, class) in RELEASE_ORDER.iter().enumerate() {
            for dep in class.dependencies() {
                assert!(position(*dep) > i, "{class:?} released after its dependency {dep:?}");
            }
        }

        // restore runs the same list backwards, so dependencies exist first
        let restore: Vec<_> = RELEASE_ORDER.iter().rev().copied().collect();
        assert_eq!(restore.first(), Some(&ObjectClass::Shaders));
        assert_eq!(restore.last(), Some(&ObjectClass::Framebuffers));
        for (i, class) in restore.iter().enumerate() {
            assert!(class.dependencies().iter().all(|dep| restore[..i].contains(dep)));
        }
    }
}
