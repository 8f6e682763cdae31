// SPDX-License-Identifier: GPL-3.0-only

//! Shared texture fed directly by a capture device
//!
//! The capture thread stores each frame as "pending" and pokes the frame
//! listener. A render thread later attaches the texture to its own context,
//! latches the pending frame and samples it. Only the newest frame is kept;
//! frames that arrive faster than they are latched are overwritten.

use super::{ContextId, ExternalTexture, GpuError, GpuResult};
use crate::backends::camera::{CameraFrame, FrameSink};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

type FrameListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TextureState {
    pending: Option<CameraFrame>,
    latched: Option<CameraFrame>,
    attached: Option<ContextId>,
    released: bool,
}

/// External texture backed by camera frames
pub struct StreamTexture {
    name: u32,
    state: Mutex<TextureState>,
    listener: Mutex<Option<FrameListener>>,
    frames_received: AtomicU64,
}

impl StreamTexture {
    pub fn new(name: u32) -> Self {
        Self {
            name,
            state: Mutex::new(TextureState::default()),
            listener: Mutex::new(None),
            frames_received: AtomicU64::new(0),
        }
    }

    /// Frames delivered by the producer so far
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Context currently holding the texture
    pub fn attached_context(&self) -> Option<ContextId> {
        self.state.lock().attached
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Sequence number of the last latched frame
    pub fn latched_sequence(&self) -> Option<u64> {
        self.state.lock().latched.as_ref().map(|f| f.sequence)
    }
}

impl FrameSink for StreamTexture {
    fn on_frame(&self, frame: CameraFrame) {
        {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            state.pending = Some(frame);
        }

        let count = self.frames_received.fetch_add(1, Ordering::Relaxed) + 1;
        if count % crate::constants::capture::FRAME_LOG_INTERVAL == 0 {
            debug!(texture = self.name, frames = count, "Stream texture receiving frames");
        }

        // Listener runs outside the state lock so it may call back into the texture
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener();
        }
    }
}

impl ExternalTexture for StreamTexture {
    fn attach_to_context(&self, context: ContextId) -> GpuResult<u32> {
        let mut state = self.state.lock();
        if state.released {
            return Err(GpuError::TextureReleased);
        }
        match state.attached {
            Some(owner) if owner != context => Err(GpuError::TextureBusy { owner }),
            _ => {
                state.attached = Some(context);
                Ok(self.name)
            }
        }
    }

    fn update_tex_image(&self, context: ContextId) -> GpuResult<Option<CameraFrame>> {
        let mut state = self.state.lock();
        if state.released {
            return Err(GpuError::TextureReleased);
        }
        if state.attached != Some(context) {
            return Err(GpuError::TextureNotAttached);
        }
        if let Some(frame) = state.pending.take() {
            state.latched = Some(frame);
        }
        Ok(state.latched.clone())
    }

    fn detach_from_context(&self, context: ContextId) {
        let mut state = self.state.lock();
        match state.attached {
            Some(owner) if owner == context => state.attached = None,
            Some(owner) => {
                warn!(texture = self.name, owner = %owner, caller = %context, "Detach from a context that does not hold the texture");
            }
            None => {}
        }
    }

    fn set_frame_listener(&self, listener: Box<dyn Fn() + Send + Sync>) {
        *self.listener.lock() = Some(Arc::from(listener));
    }

    fn release(&self) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        state.released = true;
        state.pending = None;
        state.latched = None;
        state.attached = None;
        drop(state);

        *self.listener.lock() = None;
        debug!(texture = self.name, "Stream texture released");
    }
}
