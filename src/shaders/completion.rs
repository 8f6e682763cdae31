// SPDX-License-Identifier: GPL-3.0-only

//! One-shot result slot shared by a task and the caller waiting on it

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

enum SlotState<T> {
    Pending,
    Done(Option<T>),
    Taken,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    done: Condvar,
}

impl<T> Slot<T> {
    fn complete(&self, value: Option<T>) {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Pending) {
            *state = SlotState::Done(value);
            self.done.notify_all();
        }
    }
}

/// Producer half; completing it wakes the waiter
///
/// Dropping an unfulfilled promise completes it with `None`, so a task that
/// panics or is discarded never leaves its caller hanging.
pub struct Promise<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Promise<T> {
    pub fn fulfill(mut self, value: Option<T>) {
        if let Some(slot) = self.slot.take() {
            slot.complete(value);
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.complete(None);
        }
    }
}

/// Consumer half of a task result
pub struct TaskFuture<T> {
    slot: Arc<Slot<T>>,
    poll_interval: Duration,
}

/// Create a linked promise and future
///
/// Waiters wake at least every `poll_interval` to re-check completion.
pub fn completion<T>(poll_interval: Duration) -> (Promise<T>, TaskFuture<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Pending),
        done: Condvar::new(),
    });
    (
        Promise {
            slot: Some(Arc::clone(&slot)),
        },
        TaskFuture { slot, poll_interval },
    )
}

impl<T> TaskFuture<T> {
    pub fn is_complete(&self) -> bool {
        !matches!(*self.slot.state.lock(), SlotState::Pending)
    }

    /// Block until the task completed; `None` if it failed
    pub fn wait(self) -> Option<T> {
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Done(value) => return value,
                SlotState::Taken => return None,
                SlotState::Pending => {
                    *state = SlotState::Pending;
                    self.slot.done.wait_for(&mut state, self.poll_interval);
                }
            }
        }
    }

    /// Block for at most `timeout`
    ///
    /// Returns `None` if the task has not completed yet; the future stays
    /// usable. `Some(None)` means the task completed without a result.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Option<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Done(value) => return Some(value),
                SlotState::Taken => return Some(None),
                SlotState::Pending => {
                    *state = SlotState::Pending;
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let step = (deadline - now).min(self.poll_interval);
                    self.slot.done.wait_for(&mut state, step);
                }
            }
        }
    }
}
