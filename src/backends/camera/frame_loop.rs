// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for capture loops
//!
//! Capture backends deliver frames from a thread of their own. This module
//! gives them one way to run that thread: an optional init step executed on
//! the thread (so non-`Send` device objects never cross threads), a loop
//! closure called until it asks to stop, and a stop that never waits longer
//! than the caller allows.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Action returned by the capture loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Sends on drop, so the waiting side learns about the exit even if the loop panics
struct ExitNotifier(mpsc::Sender<()>);

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Controller for a capture loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let controller = CaptureLoopController::start("pattern", move || {
///     sink.on_frame(next_frame());
///     LoopAction::Continue
/// })?;
///
/// controller.stop_timeout(Duration::from_secs(1));
/// ```
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Fires once the thread has left its loop
    exited: mpsc::Receiver<()>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a new capture loop in a separate thread
    ///
    /// The closure is called repeatedly until it returns `LoopAction::Stop`
    /// or the controller is stopped.
    pub fn start<F>(name: &str, mut loop_fn: F) -> std::io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::spawn(name, move |stop_signal: &AtomicBool| {
            run_loop(stop_signal, &mut loop_fn);
        })
    }

    /// Start a capture loop whose state is built on the capture thread
    ///
    /// Blocks until `init_fn` has run (or `init_timeout` elapsed) and returns
    /// its error, so callers can report a failed device start synchronously.
    /// The state never leaves the capture thread and does not need to be `Send`.
    pub fn try_start_with_init<S, I, F>(
        name: &str,
        init_timeout: Duration,
        init_fn: I,
        mut loop_fn: F,
    ) -> Result<Self, String>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let (init_tx, init_rx) = mpsc::sync_channel::<Result<(), String>>(1);
        let thread_name = name.to_string();

        let mut controller = Self::spawn(name, move |stop_signal: &AtomicBool| {
            let mut state = match init_fn() {
                Ok(s) => {
                    debug!(name = %thread_name, "Initialization successful");
                    let _ = init_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    warn!(name = %thread_name, error = %e, "Initialization failed");
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };
            run_loop(stop_signal, &mut || loop_fn(&mut state));
        })
        .map_err(|e| format!("Failed to spawn capture thread: {}", e))?;

        match init_rx.recv_timeout(init_timeout) {
            Ok(Ok(())) => Ok(controller),
            Ok(Err(e)) => {
                controller.join();
                Err(e)
            }
            Err(_) => {
                controller.stop_timeout(Duration::ZERO);
                Err(format!(
                    "Capture thread '{}' did not initialize within {:?}",
                    name, init_timeout
                ))
            }
        }
    }

    fn spawn<B>(name: &str, body: B) -> std::io::Result<Self>
    where
        B: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let (exit_tx, exited) = mpsc::channel();
        let name_clone = name.to_string();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _notify = ExitNotifier(exit_tx);
                debug!(name = %name_clone, "Capture loop thread started");
                body(&stop_signal_clone);
                info!(name = %name_clone, "Capture loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            exited,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop, waiting at most `timeout` for the thread to exit
    ///
    /// Returns `false` if the thread was still busy when the timeout elapsed;
    /// it is then left to finish on its own.
    pub fn stop_timeout(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        let Some(handle) = self.thread_handle.take() else {
            return true;
        };

        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Err(e) = handle.join() {
                    warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
                }
                debug!(name = %self.name, "Capture loop thread finished");
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    name = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Capture loop thread did not stop in time, detaching it"
                );
                false
            }
        }
    }

    /// Wait for the thread to finish without sending stop signal
    ///
    /// Useful if the loop stops itself via `LoopAction::Stop`.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for capture loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            }
        }
    }
}

fn run_loop(stop_signal: &AtomicBool, loop_fn: &mut dyn FnMut() -> LoopAction) {
    loop {
        if stop_signal.load(Ordering::SeqCst) {
            debug!("Stop signal received");
            break;
        }

        if loop_fn() == LoopAction::Stop {
            debug!("Loop requested stop");
            break;
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop_timeout(crate::constants::capture::STOP_TIMEOUT);
        }
    }
}
