// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles shared by the integration tests

#![allow(dead_code)]

use camera_mux::gpu::{DisplaySurface, RenderContext, TextureHandle};
use camera_mux::render::{ConsumerId, RenderConsumer, RenderError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Counts draw sections running at the same time across consumers
#[derive(Debug, Default)]
pub struct OverlapProbe {
    active: AtomicUsize,
    overlaps: AtomicUsize,
}

impl OverlapProbe {
    pub fn enter(&self) {
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

/// Consumer recording every draw and error it sees
pub struct RecordingConsumer {
    id: ConsumerId,
    surface: DisplaySurface,
    sequences: Mutex<Vec<Option<u64>>>,
    errors: Mutex<Vec<RenderError>>,
    paused: AtomicBool,
    fail_draws: AtomicBool,
    resources_created: AtomicBool,
    resources_destroyed: AtomicBool,
    draw_delay: Duration,
    probe: Option<Arc<OverlapProbe>>,
}

impl RecordingConsumer {
    pub fn new(name: &str) -> Self {
        Self {
            id: ConsumerId::new(),
            surface: DisplaySurface::new(name, 64, 48),
            sequences: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
            fail_draws: AtomicBool::new(false),
            resources_created: AtomicBool::new(false),
            resources_destroyed: AtomicBool::new(false),
            draw_delay: Duration::ZERO,
            probe: None,
        }
    }

    /// Every draw sleeps this long while holding the texture
    pub fn with_draw_delay(mut self, delay: Duration) -> Self {
        self.draw_delay = delay;
        self
    }

    pub fn with_probe(mut self, probe: Arc<OverlapProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn set_fail_draws(&self, fail: bool) {
        self.fail_draws.store(fail, Ordering::SeqCst);
    }

    pub fn draw_count(&self) -> usize {
        self.sequences.lock().len()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.sequences.lock().iter().rev().find_map(|seq| *seq)
    }

    pub fn sequences(&self) -> Vec<Option<u64>> {
        self.sequences.lock().clone()
    }

    pub fn errors(&self) -> Vec<RenderError> {
        self.errors.lock().clone()
    }

    pub fn resources_created(&self) -> bool {
        self.resources_created.load(Ordering::SeqCst)
    }

    pub fn resources_destroyed(&self) -> bool {
        self.resources_destroyed.load(Ordering::SeqCst)
    }
}

impl RenderConsumer for RecordingConsumer {
    fn id(&self) -> ConsumerId {
        self.id
    }

    fn display_surface(&self) -> DisplaySurface {
        self.surface.clone()
    }

    fn create_resources(&self, _context: &mut dyn RenderContext) -> Result<(), RenderError> {
        self.resources_created.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn destroy_resources(&self, _context: &mut dyn RenderContext) {
        self.resources_destroyed.store(true, Ordering::SeqCst);
    }

    fn draw(&self, _context: &mut dyn RenderContext, texture: &TextureHandle) -> Result<(), RenderError> {
        if let Some(probe) = &self.probe {
            probe.enter();
        }
        if !self.draw_delay.is_zero() {
            std::thread::sleep(self.draw_delay);
        }
        let failed = self.fail_draws.load(Ordering::SeqCst);
        if !failed {
            self.sequences.lock().push(texture.sequence());
        }
        if let Some(probe) = &self.probe {
            probe.leave();
        }

        if failed {
            Err(RenderError::Draw("shader rejected".to_string()))
        } else {
            Ok(())
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn on_error(&self, error: &RenderError) {
        self.errors.lock().push(error.clone());
    }
}
