// SPDX-License-Identifier: GPL-3.0-only

//! camera-mux - share one camera between many viewers
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Capture backends and the camera resource registry
//! - [`gpu`]: Render contexts and external textures
//! - [`render`]: Frame texture broker and per-viewer render workers
//! - [`shaders`]: Filter pipeline on a single serializer thread
//! - [`config`]: User configuration handling
//!
//! A camera opened through the registry streams into one external texture.
//! The broker behind that texture runs one render thread per attached viewer
//! and lets exactly one of them bind the texture at a time.

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod render;
pub mod shaders;

// Re-export commonly used types
pub use backends::camera::{CameraIndex, CameraResourceRegistry, FrameSize};
pub use config::Config;
pub use errors::{AppError, AppResult, DeviceError, DeviceOperation, SubmitError};
pub use render::{ConsumerId, FrameTextureBroker, RenderConsumer, RenderSettings};
pub use shaders::{FilterPipeline, FilterType, GpuTaskSerializer, SerializerSettings};
