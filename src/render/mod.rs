// SPDX-License-Identifier: GPL-3.0-only

//! Per-consumer render threads fed by a shared camera texture
//!
//! ```text
//! capture thread ──on_frame──► StreamTexture ──listener──► FrameTextureBroker
//!                                                              │ notify all
//!                                        ┌─────────────────────┼──────────────┐
//!                                        ▼                     ▼              ▼
//!                                  RenderWorker          RenderWorker       ...
//!                                  (own context)         (own context)
//!                                        │ draw_client_frame (bind/latch/draw/unbind)
//!                                        ▼
//!                                  swap_buffers
//! ```

pub mod broker;
pub mod worker;

pub use broker::FrameTextureBroker;
pub use worker::{RenderWorker, WorkerState, WorkerStats};

use crate::constants::render;
use crate::gpu::{DisplaySurface, GpuError, RenderContext, TextureHandle};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identity of one render consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    pub fn new() -> Self {
        ConsumerId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

/// A viewer that draws camera frames into its own surface
///
/// Every method is called from the consumer's render thread, with that
/// thread's context current.
pub trait RenderConsumer: Send + Sync {
    fn id(&self) -> ConsumerId;

    /// Surface the worker creates its context for
    fn display_surface(&self) -> DisplaySurface;

    /// Allocate GPU resources in the freshly created context
    fn create_resources(&self, context: &mut dyn RenderContext) -> Result<(), RenderError>;

    /// Free everything `create_resources` allocated
    fn destroy_resources(&self, context: &mut dyn RenderContext);

    /// Draw one frame sampling `texture`
    fn draw(&self, context: &mut dyn RenderContext, texture: &TextureHandle) -> Result<(), RenderError>;

    /// While paused the worker neither draws nor swaps
    fn is_paused(&self) -> bool {
        false
    }

    fn on_error(&self, error: &RenderError);
}

/// Failures of the render loop, reported to the affected consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The worker could not create its context
    ContextCreation(GpuError),
    /// The consumer failed to allocate its resources
    ResourceCreation(String),
    /// The consumer's draw call failed
    Draw(String),
    /// The shared texture could not be bound or latched
    TextureBind(GpuError),
    /// Presenting failed; the worker stops
    SwapFailed(GpuError),
    /// A consumer with this id is already attached
    AlreadyAttached(ConsumerId),
    /// The render thread could not be spawned
    ThreadSpawn(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::ContextCreation(e) => write!(f, "Failed to create render context: {}", e),
            RenderError::ResourceCreation(msg) => write!(f, "Failed to create render resources: {}", msg),
            RenderError::Draw(msg) => write!(f, "Draw failed: {}", msg),
            RenderError::TextureBind(e) => write!(f, "Failed to bind camera texture: {}", e),
            RenderError::SwapFailed(e) => write!(f, "Swap failed: {}", e),
            RenderError::AlreadyAttached(id) => write!(f, "Consumer {} is already attached", id),
            RenderError::ThreadSpawn(msg) => write!(f, "Failed to spawn render thread: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {}

/// Timing knobs of the render loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    /// Longest wait for a frame notification before re-checking state
    pub frame_wait_timeout: Duration,
    /// Sleep between pause checks
    pub pause_poll_interval: Duration,
    /// Longest a detach waits for the render thread to exit
    pub join_timeout: Duration,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frame_wait_timeout: render::FRAME_WAIT_TIMEOUT,
            pause_poll_interval: render::PAUSE_POLL_INTERVAL,
            join_timeout: render::JOIN_TIMEOUT,
        }
    }
}
