// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera capture
//!
//! Capture hardware sits behind the [`camera::CaptureBackend`] trait so the
//! registry and the render path never depend on a concrete OS API.

pub mod camera;
