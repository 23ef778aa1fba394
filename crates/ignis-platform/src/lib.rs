// SPDX-License-Identifier: CEPL-1.0
//! Window/event source for the engine. `winit` is re-exported so the app
//! crate never names it directly.
pub use winit;

use anyhow::{Context, Result};
use ignis_core::WindowSettings;
use tracing::info;
use winit::{
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    window::{Window, WindowId},
};

/// What the render loop has to react to after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowSignal {
    Resized { width: u32, height: u32 },
    CloseRequested,
    Redraw,
}

/// Window bookkeeping that does not need a live window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowState {
    pub width: u32,
    pub height: u32,
    close_requested: bool,
}

impl WindowState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            close_requested: false,
        }
    }

    pub fn apply(&mut self, event: &WindowEvent) -> Option<WindowSignal> {
        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
                Some(WindowSignal::CloseRequested)
            }
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                Some(WindowSignal::Resized {
                    width: size.width,
                    height: size.height,
                })
            }
            WindowEvent::RedrawRequested => Some(WindowSignal::Redraw),
            _ => None,
        }
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Nothing can be presented to a zero-sized surface.
    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub struct PlatformWindow {
    window: Window,
    state: WindowState,
    title: String,
}

impl PlatformWindow {
    /// Creates the window hidden; call [`PlatformWindow::set_visible`] once
    /// the renderer is ready for it.
    pub fn create(event_loop: &ActiveEventLoop, settings: &WindowSettings) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title(settings.title.clone())
            .with_inner_size(PhysicalSize::new(settings.width, settings.height))
            .with_resizable(settings.resizable)
            .with_visible(false);
        let window = event_loop
            .create_window(attrs)
            .context("create_window")?;

        let size = window.inner_size();
        info!("window {}x{} \"{}\"", size.width, size.height, settings.title);
        Ok(Self {
            window,
            state: WindowState::new(size.width, size.height),
            title: settings.title.clone(),
        })
    }

    pub fn handle_event(&mut self, event: &WindowEvent) -> Option<WindowSignal> {
        self.state.apply(event)
    }

    pub fn should_close(&self) -> bool {
        self.state.close_requested()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.state.width, self.state.height)
    }

    pub fn is_minimized(&self) -> bool {
        self.state.is_minimized()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.window.set_title(&self.title);
    }

    pub fn set_visible(&self, visible: bool) {
        self.window.set_visible(visible);
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_updates_tracked_extent() {
        let mut state = WindowState::new(800, 600);
        let signal = state.apply(&WindowEvent::Resized(PhysicalSize::new(1024, 768)));
        assert_eq!(
            signal,
            Some(WindowSignal::Resized {
                width: 1024,
                height: 768
            })
        );
        assert_eq!((state.width, state.height), (1024, 768));
        assert!(!state.is_minimized());
    }

    #[test]
    fn zero_sized_window_counts_as_minimized() {
        let mut state = WindowState::new(800, 600);
        state.apply(&WindowEvent::Resized(PhysicalSize::new(0, 600)));
        assert!(state.is_minimized());
    }

    #[test]
    fn close_request_is_sticky() {
        let mut state = WindowState::new(800, 600);
        assert!(!state.close_requested());
        assert_eq!(
            state.apply(&WindowEvent::CloseRequested),
            Some(WindowSignal::CloseRequested)
        );
        state.apply(&WindowEvent::Focused(true));
        assert!(state.close_requested());
    }
}
