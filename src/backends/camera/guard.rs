// SPDX-License-Identifier: GPL-3.0-only

//! Per-camera concurrency guard
//!
//! Several logical owners share one physical camera. The guard decides, for
//! each open/startPreview/stopPreview/close call, whether the hardware work
//! actually happens:
//!
//! - With reference counting, every call registers or withdraws interest and
//!   the hardware is only released once nobody is interested any more.
//! - With state checking, a call is a no-op unless the device is in the state
//!   the operation expects (`Closed → Open → Previewing` and back).
//!
//! The state is tracked in every mode, but only enforced when state checking
//! is on. That way switching modes with [`GuardEntry::with_mode`] carries a
//! meaningful state forward.

/// Which checks the guard applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GuardMode {
    /// Every call goes straight through to the hardware
    #[default]
    Unguarded,
    /// Calls only proceed from the expected predecessor state
    StateOnly,
    /// Release only happens when the last owner leaves
    RefCountOnly,
    /// Both checks combined
    Both,
}

impl GuardMode {
    pub fn from_flags(state_check: bool, reference_count: bool) -> Self {
        match (state_check, reference_count) {
            (false, false) => GuardMode::Unguarded,
            (true, false) => GuardMode::StateOnly,
            (false, true) => GuardMode::RefCountOnly,
            (true, true) => GuardMode::Both,
        }
    }

    pub fn checks_state(self) -> bool {
        matches!(self, GuardMode::StateOnly | GuardMode::Both)
    }

    pub fn counts_references(self) -> bool {
        matches!(self, GuardMode::RefCountOnly | GuardMode::Both)
    }
}

impl std::fmt::Display for GuardMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardMode::Unguarded => write!(f, "unguarded"),
            GuardMode::StateOnly => write!(f, "state-check"),
            GuardMode::RefCountOnly => write!(f, "ref-count"),
            GuardMode::Both => write!(f, "state-check+ref-count"),
        }
    }
}

/// Lifecycle state of one camera index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceState {
    #[default]
    Closed,
    Open,
    Previewing,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Closed => write!(f, "closed"),
            DeviceState::Open => write!(f, "open"),
            DeviceState::Previewing => write!(f, "previewing"),
        }
    }
}

/// Guard decision for one call: the entry to commit and whether hardware work proceeds
///
/// The registry only commits `next` once the hardware work (if any) succeeded,
/// so a failing device leaves the guard untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: GuardEntry,
    pub proceed: bool,
}

/// Guard state for one camera index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuardEntry {
    pub mode: GuardMode,
    pub state: DeviceState,
    pub open_count: u32,
    pub preview_count: u32,
}

impl GuardEntry {
    /// Fresh entry: Closed with no registered owners
    pub fn new(mode: GuardMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Same state and counters under a different mode
    pub fn with_mode(self, mode: GuardMode) -> Self {
        Self { mode, ..self }
    }

    /// State as seen by callers; unknown when state checking is off
    pub fn visible_state(&self) -> Option<DeviceState> {
        self.mode.checks_state().then_some(self.state)
    }

    pub fn on_open(&self) -> Transition {
        let mut next = *self;
        if self.mode.counts_references() {
            next.open_count = next.open_count.saturating_add(1);
        }

        let proceed = !self.mode.checks_state() || self.state == DeviceState::Closed;
        if proceed && self.state == DeviceState::Closed {
            next.state = DeviceState::Open;
        }

        Transition { next, proceed }
    }

    pub fn on_start_preview(&self) -> Transition {
        let mut next = *self;
        if self.mode.counts_references() {
            next.preview_count = next.preview_count.saturating_add(1);
        }

        let proceed = !self.mode.checks_state() || self.state == DeviceState::Open;
        if proceed && self.state == DeviceState::Open {
            next.state = DeviceState::Previewing;
        }

        Transition { next, proceed }
    }

    pub fn on_stop_preview(&self) -> Transition {
        let mut next = *self;
        let last_owner = if self.mode.counts_references() {
            next.preview_count = next.preview_count.saturating_sub(1);
            next.preview_count == 0
        } else {
            true
        };

        let state_ok = !self.mode.checks_state() || self.state == DeviceState::Previewing;
        let proceed = last_owner && state_ok;
        if proceed && self.state == DeviceState::Previewing {
            next.state = DeviceState::Open;
        }

        Transition { next, proceed }
    }

    pub fn on_close(&self) -> Transition {
        let mut next = *self;
        let last_owner = if self.mode.counts_references() {
            next.open_count = next.open_count.saturating_sub(1);
            next.open_count == 0
        } else {
            true
        };

        let state_ok = !self.mode.checks_state() || self.state == DeviceState::Open;
        let proceed = last_owner && state_ok;
        if proceed {
            // Releasing the device also ends any stream still running
            next.state = DeviceState::Closed;
            next.preview_count = 0;
        }

        Transition { next, proceed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(GuardMode::from_flags(false, false), GuardMode::Unguarded);
        assert_eq!(GuardMode::from_flags(true, true), GuardMode::Both);
        assert!(GuardMode::RefCountOnly.counts_references());
        assert!(!GuardMode::RefCountOnly.checks_state());
    }

    #[test]
    fn test_state_check_blocks_out_of_order_calls() {
        let entry = GuardEntry::new(GuardMode::StateOnly);

        // Preview before open is refused
        assert!(!entry.on_start_preview().proceed);
        // Close before open is refused
        assert!(!entry.on_close().proceed);

        let open = entry.on_open();
        assert!(open.proceed);
        assert_eq!(open.next.state, DeviceState::Open);

        // Second open is a no-op
        let again = open.next.on_open();
        assert!(!again.proceed);
        assert_eq!(again.next, open.next);
    }

    #[test]
    fn test_ref_count_defers_close_until_last_owner() {
        let mut entry = GuardEntry::new(GuardMode::RefCountOnly);
        entry = entry.on_open().next;
        entry = entry.on_open().next;
        assert_eq!(entry.open_count, 2);

        let first = entry.on_close();
        assert!(!first.proceed);
        assert_eq!(first.next.open_count, 1);

        let second = first.next.on_close();
        assert!(second.proceed);
        assert_eq!(second.next.open_count, 0);
        assert_eq!(second.next.state, DeviceState::Closed);
    }

    #[test]
    fn test_counters_never_go_negative() {
        let entry = GuardEntry::new(GuardMode::Both);
        let closed = entry.on_close().next;
        let stopped = closed.on_stop_preview().next;
        assert_eq!(stopped.open_count, 0);
        assert_eq!(stopped.preview_count, 0);
    }

    #[test]
    fn test_close_requires_preview_stopped_under_state_check() {
        let mut entry = GuardEntry::new(GuardMode::Both);
        entry = entry.on_open().next;
        entry = entry.on_start_preview().next;
        assert_eq!(entry.state, DeviceState::Previewing);

        let close = entry.on_close();
        assert!(!close.proceed);
        assert_eq!(close.next.state, DeviceState::Previewing);
    }

    #[test]
    fn test_unguarded_close_ends_preview() {
        let mut entry = GuardEntry::new(GuardMode::Unguarded);
        entry = entry.on_open().next;
        entry = entry.on_start_preview().next;

        let close = entry.on_close();
        assert!(close.proceed);
        assert_eq!(close.next.state, DeviceState::Closed);
        assert_eq!(entry.visible_state(), None);
    }

    #[test]
    fn test_with_mode_keeps_counters() {
        let entry = GuardEntry::new(GuardMode::RefCountOnly).on_open().next;
        let migrated = entry.with_mode(GuardMode::Both);
        assert_eq!(migrated.open_count, 1);
        assert_eq!(migrated.visible_state(), Some(DeviceState::Open));
    }
}
