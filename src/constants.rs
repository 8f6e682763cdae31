// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide constants
//!
//! Timeouts and capacities that the configuration layer falls back to when a
//! value is not set explicitly.

/// Default preview resolution hint handed to the size chooser
pub const DEFAULT_PREVIEW_WIDTH: u32 = 1280;
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 720;

/// Render worker timing
pub mod render {
    use std::time::Duration;

    /// Upper bound on a single wait for the next frame notification.
    ///
    /// A notify that slips past the condition is picked up after this long.
    pub const FRAME_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

    /// Re-check interval while the consumer reports itself paused
    pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// How long `detach` waits for a render thread to wind down
    pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

    /// Drawn frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 120;
}

/// GPU task serializer settings
pub mod serializer {
    use std::time::Duration;

    /// Maximum number of queued tasks before `submit` is rejected
    pub const QUEUE_CAPACITY: usize = 1000;

    /// Re-check interval for callers blocked in `submit_and_wait`
    pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// How long `quit` waits for the worker thread to exit
    pub const QUIT_TIMEOUT: Duration = Duration::from_secs(1);

    /// Delay before aborting on a failure outside the task boundary,
    /// so pending log output reaches its sink
    pub const FATAL_GRACE_PERIOD: Duration = Duration::from_millis(500);
}

/// Capture thread settings
pub mod capture {
    use std::time::Duration;

    /// How long to wait for a capture thread to report its init result
    pub const INIT_TIMEOUT: Duration = Duration::from_secs(5);

    /// How long `stop_capture` waits for the capture thread to exit
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

    /// Number of mmap buffers requested from V4L2
    pub const V4L2_BUFFER_COUNT: u32 = 4;

    /// Captured frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 300;
}

/// Synthetic camera defaults
pub mod virtual_camera {
    /// Frame rate of a default virtual camera
    pub const DEFAULT_FPS: u32 = 30;

    /// Sizes a default virtual camera advertises
    pub const DEFAULT_SIZES: &[(u32, u32)] = &[(320, 240), (640, 480), (1280, 720), (1920, 1080)];
}

/// Resolution label for a frame width, used by the CLI listing
pub fn get_resolution_label(width: u32) -> Option<&'static str> {
    match width {
        w if w >= 3840 => Some("4K"),
        w if w >= 2560 => Some("2K"),
        w if w >= 1920 => Some("FHD"),
        w if w >= 1280 => Some("HD"),
        w if w >= 640 => Some("SD"),
        _ => None,
    }
}
