// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use ignis_core::{init_tracing, Settings};
use ignis_platform::{PlatformWindow, WindowSignal};
use ignis_render::{FrameScheduler, RenderError, RenderSize};
use ignis_render_vk::{builtin, Context, FramebufferSetId, PipelineId, ShaderId, ShaderSource, ShaderStage, SurfaceId};
use tracing::{error, info};

use ignis_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::WindowId,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file
    #[arg(long, default_value = "ignis.toml")]
    config: PathBuf,
    /// Vertex shader (GLSL, or SPIR-V if it ends in .spv); built-in triangle otherwise
    #[arg(long)]
    vert: Option<PathBuf>,
    /// Fragment shader (GLSL, or SPIR-V if it ends in .spv)
    #[arg(long)]
    frag: Option<PathBuf>,
    /// Switch to this adapter once everything is built
    #[arg(long)]
    adapter: Option<usize>,
    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,
    /// Prefer immediate presentation
    #[arg(long)]
    no_vsync: bool,
}

/// Rejects `shader.frag` passed as `--vert` and the like. Unknown
/// extensions are taken at the caller's word.
fn check_stage(path: &Path, stage: ShaderStage) -> Result<()> {
    match ShaderStage::from_path(path) {
        Some(named) if named != stage => {
            bail!("{} looks like a {named:?} shader, expected {stage:?}", path.display())
        }
        _ => Ok(()),
    }
}

fn load_shader(ctx: &mut Context, stage: ShaderStage, path: Option<&Path>, fallback: &[u8]) -> Result<ShaderId> {
    let source = match path {
        Some(path) => {
            check_stage(path, stage)?;
            ShaderSource::file(path)
        }
        None => ShaderSource::Spirv(fallback),
    };
    ctx.create_shader(stage, source)
        .with_context(|| format!("{stage:?} shader"))
}

/// Everything needed to draw into the one window.
// Field order is drop order: the context goes last.
struct Renderer {
    scheduler: FrameScheduler,
    surface: SurfaceId,
    framebuffers: FramebufferSetId,
    pipeline: PipelineId,
    ctx: Context,
}

impl Renderer {
    fn new(settings: &Settings, window: &PlatformWindow, args: &Args) -> Result<Self> {
        let (width, height) = window.size();
        let (mut ctx, surface) =
            Context::new(settings, window.window(), RenderSize::new(width, height)).context("vulkan init")?;

        let vs = load_shader(&mut ctx, ShaderStage::Vertex, args.vert.as_deref(), builtin::TRIANGLE_VERT)?;
        let fs = load_shader(&mut ctx, ShaderStage::Fragment, args.frag.as_deref(), builtin::TRIANGLE_FRAG)?;
        let pipeline = ctx.create_pipeline_for(vs, fs, surface).context("create_pipeline")?;
        let framebuffers = ctx.create_framebuffers(surface, pipeline).context("create_framebuffers")?;

        let mut renderer = Self {
            scheduler: FrameScheduler::new(ctx.frames_in_flight()),
            surface,
            framebuffers,
            pipeline,
            ctx,
        };
        if let Some(index) = args.adapter {
            renderer.switch_adapter(index)?;
        }
        Ok(renderer)
    }

    fn switch_adapter(&mut self, index: usize) -> Result<()> {
        if index == self.ctx.adapter_index() {
            return Ok(());
        }
        info!("switching to adapter {index} of {:?}", self.ctx.adapter_names());
        self.drain()?;
        self.ctx.set_device(index, self.surface).context("set_device")?;
        self.scheduler = FrameScheduler::new(self.ctx.frames_in_flight());
        info!(
            "pipeline still targets {:?}",
            self.ctx.pipeline(self.pipeline)?.target_format()
        );
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.ctx.resize_surface(self.surface, RenderSize::new(width, height))?;
        self.scheduler.mark_stale();
        Ok(())
    }

    /// `Ok(false)` when the frame was dropped for a swapchain rebuild.
    fn render(&mut self) -> Result<bool, RenderError> {
        let mut target = self.ctx.frame_target(self.surface, self.framebuffers)?;
        match self.scheduler.render_frame(&mut target, |rec| rec.draw(3)) {
            Ok(_) => Ok(true),
            Err(RenderError::OutOfDate) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn drain(&mut self) -> Result<()> {
        let mut target = self.ctx.frame_target(self.surface, self.framebuffers)?;
        self.scheduler.drain(&mut target)?;
        Ok(())
    }
}

struct App {
    args: Args,
    settings: Settings,
    // Dropped before the window it renders into.
    renderer: Option<Renderer>,
    window: Option<PlatformWindow>,
    failure: Option<anyhow::Error>,

    exiting: bool,
    presented: u64,
    fps_frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(args: Args, settings: Settings) -> Self {
        Self {
            args,
            settings,
            renderer: None,
            window: None,
            failure: None,
            exiting: false,
            presented: 0,
            fps_frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = PlatformWindow::create(event_loop, &self.settings.window)?;
        let renderer = Renderer::new(&self.settings, &window, &self.args)?;
        window.set_visible(true);
        window.request_redraw();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        self.exiting = true;
        if let Some(renderer) = &mut self.renderer {
            if let Err(e) = renderer.drain() {
                error!("drain on exit: {e:#}");
            }
        }
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure.get_or_insert(e);
        self.shutdown(event_loop);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(renderer)) = (&mut self.window, &mut self.renderer) else {
            return;
        };
        if window.is_minimized() {
            return;
        }

        match renderer.render() {
            Ok(true) => {
                self.presented += 1;
                self.fps_frames += 1;
            }
            Ok(false) => {}
            Err(e) => return self.fail(event_loop, e.into()),
        }

        let elapsed = self.last_fps_instant.elapsed();
        if elapsed.as_secs_f32() >= 1.0 {
            let fps = self.fps_frames as f32 / elapsed.as_secs_f32();
            window.set_title(format!("{} - {fps:.0} fps", self.settings.window.title));
            self.fps_frames = 0;
            self.last_fps_instant = Instant::now();
        }

        if self.args.frames.is_some_and(|n| self.presented >= n) {
            info!("presented {} frames, exiting", self.presented);
            self.shutdown(event_loop);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.init(event_loop) {
                return self.fail(event_loop, e);
            }
        }
        event_loop.set_control_flow(if self.settings.vsync { ControlFlow::Wait } else { ControlFlow::Poll });
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(window) = &mut self.window else {
            return;
        };
        if window_id != window.id() {
            return;
        }

        match window.handle_event(&event) {
            Some(WindowSignal::CloseRequested) => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }
            Some(WindowSignal::Resized { width, height }) => {
                info!("Resized → {width}x{height} (paused={})", window.is_minimized());
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(width, height) {
                        return self.fail(event_loop, e);
                    }
                }
                if !window.is_minimized() {
                    window.request_redraw();
                }
            }
            Some(WindowSignal::Redraw) => {
                if !self.exiting {
                    self.redraw(event_loop);
                }
            }
            None => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if let Some(window) = &self.window {
            if !window.is_minimized() {
                window.request_redraw();
            }
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut settings = Settings::load(&args.config);
    if args.no_vsync {
        settings.vsync = false;
    }
    info!("vsync = {}, frames in flight = {}", settings.vsync, settings.frames_in_flight());

    let event_loop = EventLoop::new().context("create event loop")?;
    let mut app = App::new(args, settings);
    event_loop.run_app(&mut app).context("run event loop")?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_flags_reject_the_wrong_stage() {
        let err = check_stage(Path::new("shaders/tri.frag"), ShaderStage::Vertex).unwrap_err();
        assert!(err.to_string().contains("Fragment"));
        assert!(check_stage(Path::new("tri.vert.spv"), ShaderStage::Fragment).is_err());
    }

    #[test]
    fn shader_flags_accept_matching_or_unknown_extensions() {
        assert!(check_stage(Path::new("tri.vert"), ShaderStage::Vertex).is_ok());
        assert!(check_stage(Path::new("tri.fs.spv"), ShaderStage::Fragment).is_ok());
        assert!(check_stage(Path::new("tri.glsl"), ShaderStage::Vertex).is_ok());
        assert!(check_stage(Path::new("tri.spv"), ShaderStage::Fragment).is_ok());
    }
}
