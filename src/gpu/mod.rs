// SPDX-License-Identifier: GPL-3.0-only

//! Render context and external texture abstraction
//!
//! A render context is thread-affine: it is created on the thread that uses
//! it and never leaves that thread. Only the factory that creates contexts and
//! the shared texture handle cross threads.

pub mod software;
pub mod stream_texture;

pub use software::{SoftwareContext, SoftwareContextFactory, SoftwareCounters};
pub use stream_texture::StreamTexture;

use crate::backends::camera::CameraFrame;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of one render context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Target a render context presents to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplaySurface {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl DisplaySurface {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
        }
    }
}

/// What a consumer's draw call samples from
///
/// Valid only for the duration of one draw; the texture is detached from the
/// context right after.
#[derive(Debug, Clone)]
pub struct TextureHandle {
    /// Texture name inside the bound context
    pub name: u32,
    pub context: ContextId,
    /// Latched frame, `None` until the producer delivered one
    pub frame: Option<CameraFrame>,
}

impl TextureHandle {
    pub fn sequence(&self) -> Option<u64> {
        self.frame.as_ref().map(|f| f.sequence)
    }
}

pub type GpuResult<T> = Result<T, GpuError>;

/// Render context and texture failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The platform refused to create a context for the surface
    ContextCreationFailed(String),
    /// The context became unusable (device lost, surface gone)
    ContextLost(String),
    /// Presenting the back buffer failed
    SwapFailed(String),
    /// The texture is attached to another context
    TextureBusy { owner: ContextId },
    /// The texture is not attached to the calling context
    TextureNotAttached,
    /// The texture was released
    TextureReleased,
    Other(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::ContextCreationFailed(msg) => write!(f, "Context creation failed: {}", msg),
            GpuError::ContextLost(msg) => write!(f, "Context lost: {}", msg),
            GpuError::SwapFailed(msg) => write!(f, "Swap failed: {}", msg),
            GpuError::TextureBusy { owner } => write!(f, "Texture is attached to {}", owner),
            GpuError::TextureNotAttached => write!(f, "Texture is not attached to this context"),
            GpuError::TextureReleased => write!(f, "Texture was released"),
            GpuError::Other(msg) => write!(f, "GPU error: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {}

/// A thread-affine rendering context bound to one display surface
///
/// Deliberately not `Send`: a context is only ever touched by the thread
/// that created it.
pub trait RenderContext {
    fn id(&self) -> ContextId;

    fn surface(&self) -> &DisplaySurface;

    /// Make this context current on the calling thread
    fn make_current(&mut self) -> GpuResult<()>;

    /// Present the back buffer
    fn swap_buffers(&mut self) -> GpuResult<()>;

    /// Destroy the context; further calls fail with `ContextLost`
    fn destroy(&mut self);
}

/// Creates render contexts on whichever thread calls it
pub trait RenderContextFactory: Send + Sync {
    fn create_context(&self, surface: &DisplaySurface) -> GpuResult<Box<dyn RenderContext>>;
}

/// A texture fed by a frame producer and sampled by render contexts
///
/// The texture is attached to at most one context at a time. The caller is
/// responsible for serializing attach/update/detach across threads.
pub trait ExternalTexture: Send + Sync {
    /// Attach to `context`, returning the texture name inside it
    fn attach_to_context(&self, context: ContextId) -> GpuResult<u32>;

    /// Latch the newest delivered frame into the attached context
    fn update_tex_image(&self, context: ContextId) -> GpuResult<Option<CameraFrame>>;

    /// Detach from `context`; a no-op if it is not the attached one
    fn detach_from_context(&self, context: ContextId);

    /// Called on the producer's thread whenever a frame arrives
    fn set_frame_listener(&self, listener: Box<dyn Fn() + Send + Sync>);

    /// Drop buffered frames and refuse further use
    fn release(&self);
}
