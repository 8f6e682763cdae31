// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 focus controls
//!
//! The `v4l` crate does not wrap every control class, so focus is set with a
//! plain `VIDIOC_S_CTRL` ioctl on the device node.

use crate::backends::camera::types::{BackendError, BackendResult, FocusMode};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

/// Focus control (manual focus position)
pub const V4L2_CID_FOCUS_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 10;
/// Auto focus enable
pub const V4L2_CID_FOCUS_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 12;

/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

/// Set one control on `device_path`
pub fn set_control(device_path: &str, control_id: u32, value: i32) -> BackendResult<()> {
    let file = File::open(device_path)?;
    let fd = file.as_raw_fd();

    let mut ctrl = V4l2Control { id: control_id, value };

    let result = unsafe { libc::ioctl(fd, VIDIOC_S_CTRL as _, &mut ctrl as *mut V4l2Control) };

    if result < 0 {
        let errno = std::io::Error::last_os_error();
        debug!(device_path, control_id, value, ?errno, "Failed to set V4L2 control");
        return Err(BackendError::IoError(format!("Failed to set control {:#x}: {}", control_id, errno)));
    }

    if ctrl.value != value {
        debug!(
            device_path,
            control_id,
            requested = value,
            actual = ctrl.value,
            "V4L2 control value was clamped"
        );
    }

    Ok(())
}

/// Control writes that realise `mode`, in order
pub fn focus_controls(mode: FocusMode) -> &'static [(u32, i32)] {
    match mode {
        FocusMode::Continuous => &[(V4L2_CID_FOCUS_AUTO, 1)],
        FocusMode::Fixed => &[(V4L2_CID_FOCUS_AUTO, 0)],
        FocusMode::Infinity => &[(V4L2_CID_FOCUS_AUTO, 0), (V4L2_CID_FOCUS_ABSOLUTE, 0)],
    }
}

/// Apply a focus mode; cameras without focus controls are left alone
pub fn apply_focus(device_path: &str, mode: FocusMode) {
    for &(control_id, value) in focus_controls(mode) {
        if let Err(e) = set_control(device_path, control_id, value) {
            // Fixed-focus webcams simply lack these controls
            warn!(device_path, focus = ?mode, error = %e, "Focus control not applied");
            return;
        }
    }
    debug!(device_path, focus = ?mode, "Applied focus mode");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_ids() {
        assert_eq!(V4L2_CID_FOCUS_AUTO, 0x009a090c);
        assert_eq!(V4L2_CID_FOCUS_ABSOLUTE, 0x009a090a);
    }

    #[test]
    fn test_infinity_disables_autofocus_first() {
        let controls = focus_controls(FocusMode::Infinity);
        assert_eq!(controls[0], (V4L2_CID_FOCUS_AUTO, 0));
        assert_eq!(controls.len(), 2);
    }
}
