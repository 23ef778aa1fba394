// SPDX-License-Identifier: CEPL-1.0
//! The [`Context`] owns the instance, the chosen device, per-slot sync
//! objects and the registry of every GPU object built on that device.

use ash::khr::surface;
use ash::{vk, Entry, Instance};
use ignis_core::{Diagnostics, Settings};
use ignis_render::{RenderError, RenderSize, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::adapter::{enumerate_adapters, probe_adapter, Adapter};
use crate::device::Device;
use crate::error::VkResultExt;
use crate::framebuffer::FramebufferSet;
use crate::instance::{create_instance, DebugMessenger, InstanceBundle};
use crate::pipeline::Pipeline;
use crate::registry::{FramebufferSetId, ObjectClass, PipelineId, Registry, ShaderId, SurfaceId, RELEASE_ORDER};
use crate::shader::{Shader, ShaderSource, ShaderStage};
use crate::surface::Surface;
use crate::sync::{create_frame_syncs, FrameSync};
use crate::target::FrameTarget;

pub struct Context {
    diag: Diagnostics,
    vsync: bool,
    clear_color: [f32; 4],
    frames_in_flight: usize,

    entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    // Backs the debug messenger's user data until the instance is gone.
    _sink: Box<Diagnostics>,
    surface_loader: surface::Instance,

    adapters: Vec<Adapter>,
    adapter: usize,
    pub(crate) device: Option<Device>,
    pub(crate) sync: Vec<FrameSync>,
    pub(crate) registry: Registry,
}

fn raw_handles<W>(window: &W, diag: &Diagnostics) -> Result<(RawDisplayHandle, RawWindowHandle)>
where
    W: HasWindowHandle + HasDisplayHandle + ?Sized,
{
    let dh = window
        .display_handle()
        .map_err(|e| diag.fail("create_surface", e.to_string()))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| diag.fail("create_surface", e.to_string()))?
        .as_raw();
    Ok((dh, wh))
}

impl Context {
    /// Instance, bootstrap surface for `window`, first suitable adapter,
    /// logical device and sync objects, in that order. Returns the context
    /// together with the bootstrap surface.
    pub fn new<W>(settings: &Settings, window: &W, size: RenderSize) -> Result<(Self, SurfaceId)>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let diag = settings.diagnostics.clone();
        let (dh, wh) = raw_handles(window, &diag)?;

        let entry = Entry::linked();
        let InstanceBundle { instance, debug, sink } = unsafe { create_instance(&entry, settings, dh) }?;
        let surface_loader = surface::Instance::new(&entry, &instance);

        // From here on, Drop releases whatever was created.
        let mut ctx = Context {
            diag: diag.clone(),
            vsync: settings.vsync,
            clear_color: settings.clear_color,
            frames_in_flight: settings.frames_in_flight(),
            entry,
            instance,
            debug,
            _sink: sink,
            surface_loader,
            adapters: Vec::new(),
            adapter: 0,
            device: None,
            sync: Vec::new(),
            registry: Registry::default(),
        };

        let handle = unsafe { ash_window::create_surface(&ctx.entry, &ctx.instance, dh, wh, None) }
            .or_fatal(&diag, "create_surface")?;
        let surface = ctx.registry.surfaces.insert(Surface::new(handle, size));

        ctx.adapters = unsafe { enumerate_adapters(&ctx.instance, &ctx.surface_loader, handle, &diag) }?;
        for (i, adapter) in ctx.adapters.iter().enumerate() {
            info!("GPU {i}: {}", adapter.name);
        }
        unsafe { ctx.open_device(0) }?;
        ctx.build_swapchain(surface)?;
        Ok((ctx, surface))
    }

    unsafe fn open_device(&mut self, index: usize) -> Result<()> {
        let adapter = self
            .adapters
            .get(index)
            .ok_or_else(|| self.diag.fail("set_device", format!("no adapter at index {index}")))?;
        let device = unsafe { Device::create(&self.instance, adapter, &self.diag) }?;
        match unsafe { create_frame_syncs(&device, self.frames_in_flight) } {
            Ok(sync) => self.sync = sync,
            Err(e) => {
                unsafe { device.destroy() };
                return Err(e);
            }
        }
        self.device = Some(device);
        self.adapter = index;
        Ok(())
    }

    /// A zero-sized window leaves the surface without a swapchain; the next
    /// frame retries.
    fn build_swapchain(&mut self, id: SurfaceId) -> Result<()> {
        let device = self.device.as_ref().ok_or_else(|| no_device(&self.diag))?;
        let surface = self.registry.surfaces.get_mut(id).ok_or(RenderError::StaleHandle("surface"))?;
        match unsafe { surface.create_swapchain(&self.surface_loader, device, self.vsync) } {
            Err(RenderError::OutOfDate) => {
                debug!("surface has zero extent, swapchain deferred");
                Ok(())
            }
            other => other,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Takes effect at the next swapchain rebuild.
    pub fn set_vsync(&mut self, on: bool) {
        self.vsync = on;
    }

    /// Names of the adapters that passed the suitability checks.
    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn adapter_index(&self) -> usize {
        self.adapter
    }

    pub fn device(&self) -> Result<&Device> {
        self.device.as_ref().ok_or_else(|| no_device(&self.diag))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device()?.wait_idle()
    }

    // --- Surfaces -------------------------------------------------------

    /// Additional window surface on the current device.
    pub fn create_surface<W>(&mut self, window: &W, size: RenderSize) -> Result<SurfaceId>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let (dh, wh) = raw_handles(window, &self.diag)?;
        let device = self.device()?;
        let handle = unsafe { ash_window::create_surface(&self.entry, &self.instance, dh, wh, None) }
            .or_fatal(&self.diag, "create_surface")?;

        let supported = unsafe {
            self.surface_loader
                .get_physical_device_surface_support(device.adapter, device.present_family, handle)
        };
        if !matches!(supported, Ok(true)) {
            unsafe { self.surface_loader.destroy_surface(handle, None) };
            return Err(self
                .diag
                .fail("create_surface", "Physical device does not support this window surface")
                .into());
        }

        let id = self.registry.surfaces.insert(Surface::new(handle, size));
        self.build_swapchain(id)?;
        Ok(id)
    }

    pub fn surface(&self, id: SurfaceId) -> Result<&Surface> {
        self.registry.surfaces.get(id).ok_or(RenderError::StaleHandle("surface"))
    }

    /// Records the window's new size; the swapchain follows on the next
    /// rebuild.
    pub fn resize_surface(&mut self, id: SurfaceId, size: RenderSize) -> Result<()> {
        let surface = self.registry.surfaces.get_mut(id).ok_or(RenderError::StaleHandle("surface"))?;
        surface.set_size(size);
        Ok(())
    }

    /// Destroys and rebuilds the surface's swapchain and every framebuffer
    /// set on it. Shaders and pipelines are untouched.
    pub fn recreate_swapchain(&mut self, id: SurfaceId) -> Result<()> {
        let device = self.device.as_ref().ok_or_else(|| no_device(&self.diag))?;
        let Registry { surfaces, pipelines, framebuffers, .. } = &mut self.registry;
        let surface = surfaces.get_mut(id).ok_or(RenderError::StaleHandle("surface"))?;
        device.wait_idle()?;

        let mut sets: Vec<&mut FramebufferSet> =
            framebuffers.values_mut().filter(|set| set.surface == id).collect();
        unsafe {
            for set in sets.iter_mut() {
                set.destroy(device);
            }
            surface.destroy_swapchain(device);
            surface.create_swapchain(&self.surface_loader, device, self.vsync)?;
            for set in sets {
                let pipeline = pipelines.get(set.pipeline).ok_or(RenderError::StaleHandle("pipeline"))?;
                set.create(device, surface, pipeline)?;
            }
        }
        Ok(())
    }

    /// Fails with `InUse` while framebuffer sets still target the surface.
    pub fn destroy_surface(&mut self, id: SurfaceId) -> Result<()> {
        self.registry.check_removable_surface(id)?;
        let device = self.device.as_ref().ok_or_else(|| no_device(&self.diag))?;
        device.wait_idle()?;
        let mut surface = self.registry.surfaces.remove(id).ok_or(RenderError::StaleHandle("surface"))?;
        unsafe {
            surface.destroy_swapchain(device);
            self.surface_loader.destroy_surface(surface.handle, None);
        }
        Ok(())
    }

    // --- Shaders --------------------------------------------------------

    pub fn register_shader(&mut self, shader: Shader) -> ShaderId {
        self.registry.shaders.insert(shader)
    }

    pub fn create_shader(&mut self, stage: ShaderStage, source: ShaderSource<'_>) -> Result<ShaderId> {
        let shader = Shader::from_source(self.device()?, stage, source)?;
        Ok(self.register_shader(shader))
    }

    pub fn shader(&self, id: ShaderId) -> Result<&Shader> {
        self.registry.shaders.get(id).ok_or(RenderError::StaleHandle("shader"))
    }

    /// Fails with `InUse` while pipelines reference the shader.
    pub fn destroy_shader(&mut self, id: ShaderId) -> Result<()> {
        self.registry.check_removable_shader(id)?;
        let device = self.device.as_ref().ok_or_else(|| no_device(&self.diag))?;
        let mut shader = self.registry.shaders.remove(id).ok_or(RenderError::StaleHandle("shader"))?;
        unsafe { shader.destroy(device) };
        Ok(())
    }

    // --- Pipelines ------------------------------------------------------

    /// Both referenced shaders must still be registered.
    pub fn register_pipeline(&mut self, mut pipeline: Pipeline) -> Result<PipelineId> {
        let (vs, fs) = pipeline.shaders();
        if !self.registry.shaders.contains_key(vs) || !self.registry.shaders.contains_key(fs) {
            if let Some(device) = &self.device {
                unsafe { pipeline.destroy(device) };
            }
            return Err(RenderError::StaleHandle("shader"));
        }
        Ok(self.registry.pipelines.insert(pipeline))
    }

    /// Pipeline drawing into images of `target_format`, cleared to the
    /// configured clear color.
    pub fn create_pipeline(&mut self, vertex: ShaderId, fragment: ShaderId, target_format: vk::Format) -> Result<PipelineId> {
        let pipeline = Pipeline::build(
            self.device()?,
            (vertex, self.shader(vertex)?),
            (fragment, self.shader(fragment)?),
            target_format,
            self.clear_color,
        )?;
        self.register_pipeline(pipeline)
    }

    /// Pipeline targeting the surface's current swapchain format.
    pub fn create_pipeline_for(&mut self, vertex: ShaderId, fragment: ShaderId, surface: SurfaceId) -> Result<PipelineId> {
        let Some(format) = self.surface(surface)?.format() else {
            return Err(RenderError::OutOfDate);
        };
        self.create_pipeline(vertex, fragment, format)
    }

    pub fn pipeline(&self, id: PipelineId) -> Result<&Pipeline> {
        self.registry.pipelines.get(id).ok_or(RenderError::StaleHandle("pipeline"))
    }

    pub fn pipeline_mut(&mut self, id: PipelineId) -> Result<&mut Pipeline> {
        self.registry.pipelines.get_mut(id).ok_or(RenderError::StaleHandle("pipeline"))
    }

    pub fn is_compatible(&self, pipeline: PipelineId, surface: SurfaceId) -> Result<bool> {
        Ok(self.pipeline(pipeline)?.is_compatible(self.surface(surface)?))
    }

    /// Fails with `InUse` while framebuffer sets were built against it.
    pub fn destroy_pipeline(&mut self, id: PipelineId) -> Result<()> {
        self.registry.check_removable_pipeline(id)?;
        let device = self.device.as_ref().ok_or_else(|| no_device(&self.diag))?;
        device.wait_idle()?;
        let mut pipeline = self.registry.pipelines.remove(id).ok_or(RenderError::StaleHandle("pipeline"))?;
        unsafe { pipeline.destroy(device) };
        Ok(())
    }

    // --- Framebuffers ---------------------------------------------------

    pub fn register_framebuffers(&mut self, mut set: FramebufferSet) -> Result<FramebufferSetId> {
        if !self.registry.surfaces.contains_key(set.surface) || !self.registry.pipelines.contains_key(set.pipeline) {
            if let Some(device) = &self.device {
                unsafe { set.destroy(device) };
            }
            return Err(RenderError::StaleHandle("framebuffer target"));
        }
        Ok(self.registry.framebuffers.insert(set))
    }

    /// One framebuffer per swap image of `surface`. Fails with
    /// `Incompatible` if the pipeline targets another format.
    pub fn create_framebuffers(&mut self, surface: SurfaceId, pipeline: PipelineId) -> Result<FramebufferSetId> {
        let set = FramebufferSet::build(
            self.device()?,
            (surface, self.surface(surface)?),
            (pipeline, self.pipeline(pipeline)?),
        )?;
        self.register_framebuffers(set)
    }

    pub fn framebuffers(&self, id: FramebufferSetId) -> Result<&FramebufferSet> {
        self.registry.framebuffers.get(id).ok_or(RenderError::StaleHandle("framebuffers"))
    }

    pub fn destroy_framebuffers(&mut self, id: FramebufferSetId) -> Result<()> {
        let device = self.device.as_ref().ok_or_else(|| no_device(&self.diag))?;
        if !self.registry.framebuffers.contains_key(id) {
            return Err(RenderError::StaleHandle("framebuffers"));
        }
        device.wait_idle()?;
        let mut set = self.registry.framebuffers.remove(id).ok_or(RenderError::StaleHandle("framebuffers"))?;
        unsafe { set.destroy(device) };
        Ok(())
    }

    // --- Frames ---------------------------------------------------------

    /// Backend for a [`ignis_render::FrameScheduler`] drawing `framebuffers`
    /// into `surface`.
    pub fn frame_target(&mut self, surface: SurfaceId, framebuffers: FramebufferSetId) -> Result<FrameTarget<'_>> {
        self.device()?;
        self.surface(surface)?;
        if self.framebuffers(framebuffers)?.surface != surface {
            return Err(self
                .diag
                .fail("frame_target", "framebuffer set belongs to another surface")
                .into());
        }
        Ok(FrameTarget::new(self, surface, framebuffers))
    }

    // --- Device switching -----------------------------------------------

    /// Moves every object onto adapter `index`, which must be able to
    /// present to `test_surface`. Drain all schedulers first.
    ///
    /// Teardown runs framebuffers, swapchains, pipelines, shaders, sync
    /// objects, device; the rebuild runs the reverse. Ids stay valid.
    pub fn set_device(&mut self, index: usize, test_surface: SurfaceId) -> Result<()> {
        let Some(adapter) = self.adapters.get(index) else {
            return Err(self.diag.fail("set_device", format!("no adapter at index {index}")).into());
        };
        let handle = self.surface(test_surface)?.handle;
        let probe = unsafe { probe_adapter(&self.instance, &self.surface_loader, adapter.handle, handle, &self.diag) }?;
        if !probe.is_candidate(&self.diag) {
            return Err(self
                .diag
                .fail("set_device", format!("{} cannot present to this surface", probe.name))
                .into());
        }
        self.adapters[index].families = probe.families;

        self.wait_idle()?;
        unsafe { self.release_device() };
        unsafe { self.open_device(index) }?;
        self.restore_objects()
    }

    /// Rebuilds every registered object on the current device.
    fn restore_objects(&mut self) -> Result<()> {
        let device = self.device.as_ref().ok_or_else(|| no_device(&self.diag))?;
        let Registry { surfaces, shaders, pipelines, framebuffers } = &mut self.registry;
        for class in RELEASE_ORDER.iter().rev() {
            match class {
                ObjectClass::Shaders => {
                    for shader in shaders.values_mut() {
                        unsafe { shader.create_module(device) }?;
                    }
                }
                ObjectClass::Pipelines => {
                    for pipeline in pipelines.values_mut() {
                        let (vs, fs) = pipeline.shaders();
                        let vs = shaders.get(vs).ok_or(RenderError::StaleHandle("shader"))?;
                        let fs = shaders.get(fs).ok_or(RenderError::StaleHandle("shader"))?;
                        unsafe { pipeline.create_objects(device, vs, fs) }?;
                    }
                }
                ObjectClass::Swapchains => {
                    for surface in surfaces.values_mut() {
                        match unsafe { surface.create_swapchain(&self.surface_loader, device, self.vsync) } {
                            Ok(()) | Err(RenderError::OutOfDate) => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
                ObjectClass::Framebuffers => {
                    for set in framebuffers.values_mut() {
                        let surface = surfaces.get(set.surface).ok_or(RenderError::StaleHandle("surface"))?;
                        let pipeline = pipelines.get(set.pipeline).ok_or(RenderError::StaleHandle("pipeline"))?;
                        unsafe { set.create(device, surface, pipeline) }?;
                    }
                }
            }
        }
        info!("switched to GPU {}: {}", self.adapter, self.adapters[self.adapter].name);
        Ok(())
    }

    // STRICT TEARDOWN ORDER:
    // - framebuffers before the swap image views they point at
    // - swapchains before the device (surfaces themselves persist)
    // - pipelines/render passes, then shader modules
    // - per-slot sync objects and command pools
    // - device last
    unsafe fn release_device(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        let registry = &mut self.registry;
        unsafe {
            for class in RELEASE_ORDER {
                match class {
                    ObjectClass::Framebuffers => {
                        for set in registry.framebuffers.values_mut() {
                            set.destroy(&device);
                        }
                    }
                    ObjectClass::Swapchains => {
                        for surface in registry.surfaces.values_mut() {
                            surface.destroy_swapchain(&device);
                        }
                    }
                    ObjectClass::Pipelines => {
                        for pipeline in registry.pipelines.values_mut() {
                            pipeline.destroy(&device);
                        }
                    }
                    ObjectClass::Shaders => {
                        for shader in registry.shaders.values_mut() {
                            shader.destroy(&device);
                        }
                    }
                }
            }
            for sync in self.sync.drain(..) {
                sync.destroy(&device);
            }
            device.destroy();
        }
    }
}

fn no_device(diag: &Diagnostics) -> RenderError {
    diag.fail("device", "no logical device").into()
}

// Device-scoped objects go first, then surfaces, the messenger, and the
// instance last.
impl Drop for Context {
    fn drop(&mut self) {
        if let Some(device) = &self.device {
            let _ = unsafe { device.raw.device_wait_idle() };
        }
        unsafe {
            self.release_device();
            for surface in self.registry.surfaces.values() {
                self.surface_loader.destroy_surface(surface.handle, None);
            }
            if let Some(debug) = &self.debug {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}
