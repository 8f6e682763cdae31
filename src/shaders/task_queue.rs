// SPDX-License-Identifier: GPL-3.0-only

//! Single-thread task serializer for thread-affine GPU contexts
//!
//! One worker thread drains a bounded FIFO queue and runs each task against a
//! context it owns. The context is created lazily by the first task and
//! dropped on the worker thread when the worker exits, or after a task
//! panicked so the next task starts from a clean one.

use super::FilterError;
use super::completion::{TaskFuture, completion};
use crate::constants::serializer;
use crate::errors::SubmitError;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

type Job<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Queue and shutdown knobs of a serializer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializerSettings {
    /// Tasks that may wait in the queue before `submit` is rejected
    pub capacity: usize,
    /// Re-check interval for blocked callers
    pub wait_poll_interval: Duration,
    /// Longest `quit` waits for the worker thread
    pub quit_timeout: Duration,
}

impl Default for SerializerSettings {
    fn default() -> Self {
        Self {
            capacity: serializer::QUEUE_CAPACITY,
            wait_poll_interval: serializer::WAIT_POLL_INTERVAL,
            quit_timeout: serializer::QUIT_TIMEOUT,
        }
    }
}

struct ExitNotifier(mpsc::Sender<()>);

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Runs tasks one at a time on a dedicated thread owning a `C`
///
/// `C` never leaves the worker thread and does not need to be `Send`.
pub struct GpuTaskSerializer<C: 'static> {
    name: String,
    settings: SerializerSettings,
    sender: Mutex<Option<SyncSender<Job<C>>>>,
    quit: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    handle: Mutex<Option<JoinHandle<()>>>,
    exited: Mutex<Receiver<()>>,
}

impl<C: 'static> GpuTaskSerializer<C> {
    /// Spawn the worker thread; `factory` builds the context on that thread
    pub fn new<F>(name: &str, settings: SerializerSettings, factory: F) -> std::io::Result<Self>
    where
        F: FnMut() -> Result<C, FilterError> + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel::<Job<C>>(settings.capacity.max(1));
        let (exit_tx, exited) = mpsc::channel();
        let quit = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let thread_name = name.to_string();
        let thread_quit = Arc::clone(&quit);
        let thread_pending = Arc::clone(&pending);

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _notify = ExitNotifier(exit_tx);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                worker_loop(&thread_name, receiver, factory, &thread_quit, &thread_pending)
            }));
            if let Err(payload) = outcome {
                abort_after_grace(&thread_name, &panic_message(payload.as_ref()));
            }
        })?;

        info!(serializer = %name, capacity = settings.capacity, "Task serializer started");

        Ok(Self {
            name: name.to_string(),
            settings,
            sender: Mutex::new(Some(sender)),
            quit,
            pending,
            handle: Mutex::new(Some(handle)),
            exited: Mutex::new(exited),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> SerializerSettings {
        self.settings
    }

    /// Tasks queued but not yet picked up by the worker
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether the serializer still accepts tasks
    pub fn is_running(&self) -> bool {
        !self.quit.load(Ordering::SeqCst)
            && self
                .handle
                .lock()
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    fn enqueue(&self, job: Job<C>) -> Result<(), SubmitError> {
        if self.quit.load(Ordering::SeqCst) {
            return Err(SubmitError::ShutDown);
        }
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(SubmitError::ShutDown);
        };

        // Counted before sending so the worker's decrement never runs first
        self.pending.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                warn!(serializer = %self.name, capacity = self.settings.capacity, "Task queue full, rejecting task");
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Err(SubmitError::ShutDown)
            }
        }
    }

    /// Fire-and-forget; failures are logged on the worker thread
    pub fn submit<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: FnOnce(&mut C) -> Result<(), FilterError> + Send + 'static,
    {
        let name = self.name.clone();
        self.enqueue(Box::new(move |context| {
            if let Err(e) = task(context) {
                warn!(serializer = %name, error = %e, "Task failed");
            }
        }))
    }

    /// Queue a task and return a handle to its result
    pub fn submit_future<T, F>(&self, task: F) -> Result<TaskFuture<T>, SubmitError>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T, FilterError> + Send + 'static,
    {
        let (promise, future) = completion(self.settings.wait_poll_interval);
        let name = self.name.clone();
        self.enqueue(Box::new(move |context| match task(context) {
            Ok(value) => promise.fulfill(Some(value)),
            Err(e) => {
                warn!(serializer = %name, error = %e, "Task failed");
                promise.fulfill(None);
            }
        }))?;
        Ok(future)
    }

    /// Queue a task and block until it ran
    ///
    /// `Ok(None)` means the task failed, panicked or was abandoned by `quit`.
    pub fn submit_and_wait<T, F>(&self, task: F) -> Result<Option<T>, SubmitError>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T, FilterError> + Send + 'static,
    {
        Ok(self.submit_future(task)?.wait())
    }

    /// Like [`submit_and_wait`](Self::submit_and_wait), giving up after `timeout`
    ///
    /// On timeout the task stays queued and still runs; only its result is lost.
    pub fn submit_and_wait_timeout<T, F>(&self, task: F, timeout: Duration) -> Result<Option<T>, SubmitError>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T, FilterError> + Send + 'static,
    {
        let future = self.submit_future(task)?;
        match future.wait_timeout(timeout) {
            Some(result) => Ok(result),
            None => {
                warn!(serializer = %self.name, timeout_ms = timeout.as_millis() as u64, "Gave up waiting for task");
                Err(SubmitError::TimedOut)
            }
        }
    }

    /// Queue a task and await its result from async code
    pub fn submit_async<T, F>(&self, task: F) -> Result<impl Future<Output = Option<T>> + Send + use<C, T, F>, SubmitError>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T, FilterError> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let name = self.name.clone();
        self.enqueue(Box::new(move |context| {
            let result = match task(context) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(serializer = %name, error = %e, "Task failed");
                    None
                }
            };
            let _ = tx.send(result);
        }))?;
        Ok(async move { rx.await.ok().flatten() })
    }

    /// Stop accepting tasks and wait at most the quit timeout for the worker
    ///
    /// Queued tasks that have not started are abandoned; their waiters get
    /// `None`. Returns `false` if the worker was still busy when the timeout
    /// elapsed. A quit serializer cannot be restarted.
    pub fn quit(&self) -> bool {
        if !self.quit.swap(true, Ordering::SeqCst) {
            info!(serializer = %self.name, pending = self.pending(), "Quitting task serializer");
        }
        // Dropping the sender wakes a worker blocked on an empty queue
        self.sender.lock().take();

        let Some(handle) = self.handle.lock().take() else {
            return true;
        };
        if handle.thread().id() == thread::current().id() {
            debug!(serializer = %self.name, "Quit requested from a task, worker exits after it");
            return false;
        }

        match self.exited.lock().recv_timeout(self.settings.quit_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!(serializer = %self.name, "Serializer worker panicked");
                }
                info!(serializer = %self.name, "Task serializer stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    serializer = %self.name,
                    timeout_ms = self.settings.quit_timeout.as_millis() as u64,
                    "Serializer worker did not stop in time, detaching it"
                );
                false
            }
        }
    }
}

impl<C: 'static> Drop for GpuTaskSerializer<C> {
    fn drop(&mut self) {
        self.quit();
    }
}

fn worker_loop<C, F>(name: &str, receiver: Receiver<Job<C>>, mut factory: F, quit: &AtomicBool, pending: &AtomicUsize)
where
    F: FnMut() -> Result<C, FilterError>,
{
    let mut context: Option<C> = None;
    let mut executed: u64 = 0;

    while let Ok(job) = receiver.recv() {
        pending.fetch_sub(1, Ordering::SeqCst);
        if quit.load(Ordering::SeqCst) {
            debug!(serializer = %name, "Quit requested, abandoning queued tasks");
            break;
        }

        if context.is_none() {
            match panic::catch_unwind(AssertUnwindSafe(|| factory())) {
                Ok(Ok(created)) => {
                    info!(serializer = %name, "Filter context created");
                    context = Some(created);
                }
                Ok(Err(e)) => {
                    error!(serializer = %name, error = %e, "Failed to create filter context, dropping task");
                    continue;
                }
                Err(payload) => {
                    error!(
                        serializer = %name,
                        panic = %panic_message(payload.as_ref()),
                        "Filter context creation panicked, dropping task"
                    );
                    continue;
                }
            }
        }
        let Some(ctx) = context.as_mut() else {
            continue;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| job(ctx))) {
            Ok(()) => executed += 1,
            Err(payload) => {
                error!(
                    serializer = %name,
                    panic = %panic_message(payload.as_ref()),
                    "Task panicked, discarding filter context"
                );
                context = None;
            }
        }
    }

    // Unstarted tasks are dropped with the receiver
    drop(receiver);
    pending.store(0, Ordering::SeqCst);
    drop(context);
    info!(serializer = %name, executed, "Serializer worker exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Terminate after a failure the worker cannot contain
fn abort_after_grace(name: &str, reason: &str) -> ! {
    error!(serializer = %name, reason, "Fatal failure outside task boundary, aborting");
    thread::sleep(serializer::FATAL_GRACE_PERIOD);
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: u32,
    }

    fn counting_serializer(created: Arc<AtomicUsize>) -> GpuTaskSerializer<Counter> {
        GpuTaskSerializer::new("test-serializer", SerializerSettings::default(), move || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Counter { value: 0 })
        })
        .unwrap()
    }

    #[test]
    fn test_context_created_lazily_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let serializer = counting_serializer(Arc::clone(&created));
        assert_eq!(created.load(Ordering::SeqCst), 0);

        for expected in 1..=3 {
            let value = serializer
                .submit_and_wait(|ctx: &mut Counter| {
                    ctx.value += 1;
                    Ok(ctx.value)
                })
                .unwrap();
            assert_eq!(value, Some(expected));
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_discards_context() {
        let created = Arc::new(AtomicUsize::new(0));
        let serializer = counting_serializer(Arc::clone(&created));

        serializer.submit_and_wait(|ctx: &mut Counter| {
            ctx.value = 41;
            Ok(())
        })
        .unwrap();
        let panicked: Option<()> = serializer
            .submit_and_wait(|_: &mut Counter| -> Result<(), FilterError> { panic!("boom") })
            .unwrap();
        assert_eq!(panicked, None);

        // A fresh context starts from zero
        let value = serializer.submit_and_wait(|ctx: &mut Counter| Ok(ctx.value)).unwrap();
        assert_eq!(value, Some(0));
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_context_creation_failure_yields_none() {
        let serializer: GpuTaskSerializer<Counter> =
            GpuTaskSerializer::new("test-failing-factory", SerializerSettings::default(), || {
                Err(FilterError::ContextCreation("no device".to_string()))
            })
            .unwrap();
        let result = serializer.submit_and_wait(|ctx: &mut Counter| Ok(ctx.value)).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_submit_after_quit_is_rejected() {
        let serializer = counting_serializer(Arc::new(AtomicUsize::new(0)));
        assert!(serializer.quit());
        assert!(!serializer.is_running());
        assert_eq!(
            serializer.submit(|_: &mut Counter| Ok(())),
            Err(SubmitError::ShutDown)
        );
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
