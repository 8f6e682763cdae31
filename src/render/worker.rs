// SPDX-License-Identifier: GPL-3.0-only

//! Render thread owned by one consumer
//!
//! The worker creates its render context on its own thread, lets the consumer
//! allocate resources, then loops: wait for a frame notification, draw through
//! the broker, swap. Tearing down happens on the same thread in reverse order.

use super::{ConsumerId, FrameTextureBroker, RenderConsumer, RenderError, RenderSettings};
use crate::constants::render::FRAME_LOG_INTERVAL;
use crate::gpu::{RenderContext, RenderContextFactory};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lifecycle of a render worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Thread spawned, context and resources not yet ready
    Starting,
    /// Drawing frames
    Running,
    /// Leaving the loop, tearing down
    Stopping,
    /// Thread done; context destroyed
    Stopped,
}

/// Point-in-time view of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub state: WorkerState,
    pub frames_drawn: u64,
}

#[derive(Default)]
struct Signal {
    frame_pending: bool,
    stop: bool,
}

struct Shared {
    signal: Mutex<Signal>,
    wake: Condvar,
    state: Mutex<WorkerState>,
    state_changed: Condvar,
    frames_drawn: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
        self.state_changed.notify_all();
    }

    fn stop_requested(&self) -> bool {
        self.signal.lock().stop
    }

    /// Sleep until a frame is pending, stop is requested or `timeout` passes
    ///
    /// Consumes the pending flag; notifications are not counted.
    fn wait_for_frame(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut signal = self.signal.lock();
        while !signal.frame_pending && !signal.stop {
            if self.wake.wait_until(&mut signal, deadline).timed_out() {
                break;
            }
        }
        signal.frame_pending = false;
    }

    /// Sleep until stop is requested or `timeout` passes, ignoring frames
    fn wait_for_stop(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut signal = self.signal.lock();
        while !signal.stop {
            if self.wake.wait_until(&mut signal, deadline).timed_out() {
                break;
            }
        }
    }

    fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state != WorkerState::Stopped {
            if self.state_changed.wait_until(&mut state, deadline).timed_out() {
                return *state == WorkerState::Stopped;
            }
        }
        true
    }
}

/// Marks the worker stopped when the thread leaves, including by panic
struct StoppedOnExit(Arc<Shared>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.set_state(WorkerState::Stopped);
    }
}

/// Handle to one consumer's render thread
pub struct RenderWorker {
    consumer_id: ConsumerId,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    /// Spawn the render thread for `consumer`
    pub(crate) fn spawn(
        consumer: Arc<dyn RenderConsumer>,
        broker: Weak<FrameTextureBroker>,
        factory: Arc<dyn RenderContextFactory>,
        settings: RenderSettings,
    ) -> Result<Self, RenderError> {
        let consumer_id = consumer.id();
        let shared = Arc::new(Shared {
            signal: Mutex::new(Signal::default()),
            wake: Condvar::new(),
            state: Mutex::new(WorkerState::Starting),
            state_changed: Condvar::new(),
            frames_drawn: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("render-{}", consumer_id))
            .spawn(move || {
                let _exit = StoppedOnExit(Arc::clone(&thread_shared));
                run(consumer, broker, factory, settings, &thread_shared);
            })
            .map_err(|e| RenderError::ThreadSpawn(e.to_string()))?;

        info!(consumer = %consumer_id, "Render worker started");

        Ok(Self {
            consumer_id,
            shared,
            handle: Some(handle),
        })
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    /// Wake the worker for a new frame
    pub fn notify_frame(&self) {
        self.shared.signal.lock().frame_pending = true;
        self.shared.wake.notify_one();
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            state: self.state(),
            frames_drawn: self.shared.frames_drawn.load(Ordering::SeqCst),
        }
    }

    /// Ask the loop to exit without waiting for it
    pub fn request_stop(&self) {
        self.shared.signal.lock().stop = true;
        self.shared.wake.notify_all();
    }

    /// Stop the worker, waiting at most `timeout` for its thread
    ///
    /// Returns `false` if the thread did not finish in time; it is then
    /// detached and tears itself down whenever its current call returns.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        // A consumer detaching itself from one of its own callbacks
        if handle.thread().id() == thread::current().id() {
            debug!(consumer = %self.consumer_id, "Render worker stopping from its own thread");
            return false;
        }

        if self.shared.wait_stopped(timeout) {
            if handle.join().is_err() {
                warn!(consumer = %self.consumer_id, "Render thread panicked");
            }
            info!(consumer = %self.consumer_id, "Render worker stopped");
            true
        } else {
            warn!(
                consumer = %self.consumer_id,
                timeout_ms = timeout.as_millis() as u64,
                "Render worker did not stop in time, detaching thread"
            );
            false
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
        }
    }
}

fn run(
    consumer: Arc<dyn RenderConsumer>,
    broker: Weak<FrameTextureBroker>,
    factory: Arc<dyn RenderContextFactory>,
    settings: RenderSettings,
    shared: &Shared,
) {
    let id = consumer.id();
    let surface = consumer.display_surface();

    let mut context = match factory.create_context(&surface) {
        Ok(context) => context,
        Err(e) => {
            error!(consumer = %id, surface = %surface.name, error = %e, "Failed to create render context");
            consumer.on_error(&RenderError::ContextCreation(e));
            return;
        }
    };

    if let Err(e) = context.make_current() {
        error!(consumer = %id, error = %e, "Failed to make render context current");
        consumer.on_error(&RenderError::ContextCreation(e));
        context.destroy();
        return;
    }

    if let Err(e) = consumer.create_resources(context.as_mut()) {
        error!(consumer = %id, error = %e, "Consumer failed to create resources");
        consumer.on_error(&e);
        context.destroy();
        return;
    }

    shared.set_state(WorkerState::Running);
    debug!(consumer = %id, context = %context.id(), "Render loop running");

    render_loop(consumer.as_ref(), &broker, context.as_mut(), &settings, shared);

    shared.set_state(WorkerState::Stopping);
    consumer.destroy_resources(context.as_mut());
    context.destroy();
    debug!(consumer = %id, "Render context destroyed");
}

fn render_loop(
    consumer: &dyn RenderConsumer,
    broker: &Weak<FrameTextureBroker>,
    context: &mut dyn RenderContext,
    settings: &RenderSettings,
    shared: &Shared,
) {
    let id = consumer.id();

    loop {
        if shared.stop_requested() {
            break;
        }

        if consumer.is_paused() {
            shared.wait_for_stop(settings.pause_poll_interval);
            continue;
        }

        let Some(broker) = broker.upgrade() else {
            debug!(consumer = %id, "Broker gone, leaving render loop");
            break;
        };
        let drawn = broker.draw_client_frame(consumer, context);
        drop(broker);

        match drawn {
            Ok(sequence) => {
                if let Err(e) = context.swap_buffers() {
                    error!(consumer = %id, error = %e, "Swap failed, stopping render worker");
                    consumer.on_error(&RenderError::SwapFailed(e));
                    break;
                }
                let frames = shared.frames_drawn.fetch_add(1, Ordering::SeqCst) + 1;
                if frames % FRAME_LOG_INTERVAL == 0 {
                    debug!(consumer = %id, frames, sequence = ?sequence, "Render worker drawing");
                }
            }
            Err(e) => {
                warn!(consumer = %id, error = %e, "Draw failed");
                consumer.on_error(&e);
            }
        }

        shared.wait_for_frame(settings.frame_wait_timeout);
    }
}
