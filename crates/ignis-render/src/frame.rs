// SPDX-License-Identifier: CEPL-1.0
//! Frame lifecycle: acquire -> record -> submit -> present.
//!
//! The scheduler owns the protocol state; every GPU-side effect goes through
//! a [`FrameBackend`]. A frame slot bundles one fence, an acquire semaphore
//! and one command buffer; render-finished semaphores belong to the swap
//! images. With one slot the cadence is fully serialized: frame N+1 cannot
//! start recording before the fence of frame N has signaled.

use tracing::{debug, trace};

use crate::error::{RenderError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acquired {
    pub index: u32,
    pub suboptimal: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Presented, but the swapchain will be rebuilt before the next frame.
    Suboptimal,
}

/// GPU-side operations the scheduler sequences.
pub trait FrameBackend {
    /// Images in the current swapchain.
    fn image_count(&self) -> usize;

    /// Blocks until the slot's fence is signaled.
    fn wait_slot(&mut self, slot: usize) -> Result<()>;

    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    /// Requests the next swap image, signaling the slot's acquire semaphore.
    fn acquire(&mut self, slot: usize) -> Result<Acquired>;

    /// Begins the slot's command buffer and the render pass on `image`'s
    /// framebuffer, binds the pipeline and sets viewport/scissor.
    fn begin_pass(&mut self, slot: usize, image: u32) -> Result<()>;

    fn draw(&mut self, slot: usize, vertices: u32, instances: u32) -> Result<()>;

    fn end_pass(&mut self, slot: usize);

    /// Ends the command buffer and submits it: waits on the acquire
    /// semaphore, signals render-finished and the slot fence.
    fn submit(&mut self, slot: usize, image: u32) -> Result<()>;

    /// Gives up a frame between acquire and submit: consumes the slot's
    /// signaled acquire semaphore with an empty submission that also
    /// signals the slot fence. The acquired image stays with the
    /// application until the swapchain is rebuilt.
    fn abandon(&mut self, slot: usize) -> Result<()>;

    /// Queues `image` for presentation. `Ok(true)` means suboptimal.
    fn present(&mut self, slot: usize, image: u32) -> Result<bool>;

    fn wait_idle(&mut self) -> Result<()>;

    /// Destroys and rebuilds the swapchain and its per-image framebuffers.
    fn rebuild_swapchain(&mut self) -> Result<()>;
}

#[derive(Debug)]
pub struct FrameScheduler {
    state: FrameState,
    frames_in_flight: usize,
    slot: usize,
    image: Option<u32>,
    /// Slot that last rendered into each swap image.
    image_owners: Vec<Option<usize>>,
    stale: bool,
    frames: u64,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            state: FrameState::Idle,
            frames_in_flight: frames_in_flight.max(1),
            slot: 0,
            image: None,
            image_owners: Vec::new(),
            stale: false,
            frames: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Frames handed to presentation so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn acquired_image(&self) -> Option<u32> {
        self.image
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Forces a swapchain rebuild before the next frame (e.g. on resize).
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Waits on the slot fence, then acquires the next swap image.
    ///
    /// An out-of-date acquire rebuilds the swapchain and retries once; if
    /// that still fails the frame is dropped with [`RenderError::OutOfDate`].
    pub fn begin_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<u32> {
        self.expect(FrameState::Idle, "begin_frame")?;
        let result = self.acquire_frame(backend);
        if let Err(e) = &result {
            if e.is_recoverable() {
                self.stale = true;
            }
            self.image = None;
            self.state = FrameState::Idle;
        }
        result
    }

    fn acquire_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<u32> {
        if self.stale {
            self.rebuild(backend)?;
        }
        self.state = FrameState::Acquiring;
        backend.wait_slot(self.slot)?;
        // The fence stays signaled until submit, so a frame dropped anywhere
        // before that never leaves the next wait hanging.
        self.next_image(backend)
    }

    /// Index of the swap image for the current frame. Repeated calls before
    /// the frame is presented return the same index without re-acquiring.
    pub fn next_image<B: FrameBackend>(&mut self, backend: &mut B) -> Result<u32> {
        if !matches!(self.state, FrameState::Acquiring | FrameState::Recording) {
            return Err(RenderError::InvalidState {
                op: "next_image",
                state: self.state,
            });
        }
        if let Some(index) = self.image {
            return Ok(index);
        }

        let acquired = match backend.acquire(self.slot) {
            Err(RenderError::OutOfDate) => {
                debug!("acquire: swapchain out of date, rebuilding");
                self.rebuild(backend)?;
                backend.acquire(self.slot)?
            }
            other => other?,
        };
        if acquired.suboptimal {
            self.stale = true;
        }

        let index = acquired.index as usize;
        if self.image_owners.len() < backend.image_count() {
            self.image_owners.resize(backend.image_count(), None);
        }
        if let Some(owner) = self.image_owners.get(index).copied().flatten() {
            if owner != self.slot {
                if let Err(e) = backend.wait_slot(owner) {
                    return Err(self.abandon(backend, e));
                }
            }
        }
        if let Some(entry) = self.image_owners.get_mut(index) {
            *entry = Some(self.slot);
        }

        trace!(slot = self.slot, image = acquired.index, "acquired");
        self.image = Some(acquired.index);
        Ok(acquired.index)
    }

    /// Opens the render pass for the acquired image. The pass is closed when
    /// the returned [`Recorder`] is dropped.
    pub fn record<'a, B: FrameBackend>(&mut self, backend: &'a mut B) -> Result<Recorder<'a, B>> {
        self.expect(FrameState::Acquiring, "record")?;
        let image = self.image.ok_or(RenderError::InvalidState {
            op: "record",
            state: self.state,
        })?;
        if let Err(e) = backend.begin_pass(self.slot, image) {
            return Err(self.abandon(backend, e));
        }
        self.state = FrameState::Recording;
        Ok(Recorder {
            backend,
            slot: self.slot,
            draws: 0,
        })
    }

    /// Scoped recording. The pass ends exactly once, even when `f` fails; the
    /// frame can then still be submitted and presented.
    pub fn record_with<B, F>(&mut self, backend: &mut B, f: F) -> Result<u32>
    where
        B: FrameBackend,
        F: FnOnce(&mut Recorder<'_, B>) -> Result<()>,
    {
        let mut recorder = self.record(backend)?;
        f(&mut recorder)?;
        Ok(recorder.draws())
    }

    pub fn end_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        self.expect(FrameState::Recording, "end_frame")?;
        let image = self.image.ok_or(RenderError::InvalidState {
            op: "end_frame",
            state: self.state,
        })?;
        let submitted = backend.reset_slot(self.slot).and_then(|()| backend.submit(self.slot, image));
        if let Err(e) = submitted {
            return Err(self.abandon(backend, e));
        }
        self.state = FrameState::Submitted;
        Ok(())
    }

    /// Presents the submitted image and advances to the next slot. An
    /// out-of-date result is returned to the caller and schedules a
    /// swapchain rebuild before the next frame.
    pub fn present<B: FrameBackend>(&mut self, backend: &mut B) -> Result<PresentStatus> {
        self.expect(FrameState::Submitted, "present")?;
        let image = self.image.ok_or(RenderError::InvalidState {
            op: "present",
            state: self.state,
        })?;

        self.state = FrameState::Presenting;
        let result = backend.present(self.slot, image);

        self.image = None;
        self.slot = (self.slot + 1) % self.frames_in_flight;
        self.frames += 1;
        self.state = FrameState::Idle;

        match result {
            Ok(false) => Ok(PresentStatus::Presented),
            Ok(true) => {
                self.stale = true;
                Ok(PresentStatus::Suboptimal)
            }
            Err(RenderError::OutOfDate) => {
                debug!("present: swapchain out of date");
                self.stale = true;
                Err(RenderError::OutOfDate)
            }
            Err(e) => Err(e),
        }
    }

    /// One full cycle: begin, record through `f`, submit, present.
    pub fn render_frame<B, F>(&mut self, backend: &mut B, f: F) -> Result<PresentStatus>
    where
        B: FrameBackend,
        F: FnOnce(&mut Recorder<'_, B>) -> Result<()>,
    {
        self.begin_frame(backend)?;
        let recorded = self.record_with(backend, f);
        if self.state == FrameState::Recording {
            // Submit even on a failed recording so the acquire semaphore is
            // consumed and the image goes back to the presentation engine.
            self.end_frame(backend)?;
            let status = self.present(backend)?;
            recorded?;
            return Ok(status);
        }
        recorded?;
        Err(RenderError::InvalidState {
            op: "render_frame",
            state: self.state,
        })
    }

    /// Waits for all submitted work. Required before tearing down or
    /// switching devices.
    pub fn drain<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        self.expect(FrameState::Idle, "drain")?;
        backend.wait_idle()
    }

    /// Drops the current frame after its image was acquired. The slot
    /// becomes usable again and the swapchain is rebuilt before the next
    /// frame, which returns the orphaned image.
    fn abandon<B: FrameBackend>(&mut self, backend: &mut B, cause: RenderError) -> RenderError {
        debug!(slot = self.slot, "abandoning frame: {cause}");
        if let Err(e) = backend.abandon(self.slot) {
            debug!(slot = self.slot, "abandon failed: {e}");
        }
        self.image = None;
        self.stale = true;
        self.state = FrameState::Idle;
        cause
    }

    fn rebuild<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        backend.wait_idle()?;
        backend.rebuild_swapchain()?;
        self.image_owners = vec![None; backend.image_count()];
        self.image = None;
        self.stale = false;
        Ok(())
    }

    fn expect(&self, state: FrameState, op: &'static str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(RenderError::InvalidState {
                op,
                state: self.state,
            })
        }
    }
}

/// Open render pass on the current frame's command buffer.
pub struct Recorder<'a, B: FrameBackend> {
    backend: &'a mut B,
    slot: usize,
    draws: u32,
}

impl<B: FrameBackend> Recorder<'_, B> {
    /// Draws `vertices` shader-generated vertices.
    pub fn draw(&mut self, vertices: u32) -> Result<()> {
        self.draw_instanced(vertices, 1)
    }

    pub fn draw_instanced(&mut self, vertices: u32, instances: u32) -> Result<()> {
        self.backend.draw(self.slot, vertices, instances)?;
        self.draws += 1;
        Ok(())
    }

    pub fn draws(&self) -> u32 {
        self.draws
    }
}

impl<B: FrameBackend> Drop for Recorder<'_, B> {
    fn drop(&mut self) {
        self.backend.end_pass(self.slot);
    }
}
