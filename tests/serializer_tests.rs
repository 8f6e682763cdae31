// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the GPU task serializer and the filter pipeline

mod common;

use camera_mux::errors::SubmitError;
use camera_mux::shaders::{
    CpuFilterContext, FilterContext, FilterError, FilterPipeline, FilterType, GpuTaskSerializer, SerializerSettings,
};
use common::wait_until;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Journal {
    entries: Vec<(usize, usize)>,
    threads: Vec<ThreadId>,
}

fn settings(capacity: usize, quit_timeout: Duration) -> SerializerSettings {
    SerializerSettings {
        capacity,
        wait_poll_interval: Duration::from_millis(10),
        quit_timeout,
    }
}

fn journal_serializer(capacity: usize) -> GpuTaskSerializer<Journal> {
    GpuTaskSerializer::new("test-journal", settings(capacity, Duration::from_secs(2)), || {
        Ok(Journal::default())
    })
    .unwrap()
}

/// Queue a task that blocks the worker until the returned sender fires
fn block_worker(serializer: &GpuTaskSerializer<Journal>) -> mpsc::Sender<()> {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    serializer
        .submit(move |_: &mut Journal| {
            let _ = started_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            Ok(())
        })
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    release_tx
}

#[test]
fn test_concurrent_callers_get_their_own_results() {
    let serializer = Arc::new(journal_serializer(1000));

    let callers: Vec<_> = (0..8)
        .map(|caller| {
            let serializer = Arc::clone(&serializer);
            thread::spawn(move || {
                for i in 0..25 {
                    let result = serializer
                        .submit_and_wait(move |journal: &mut Journal| {
                            journal.entries.push((caller, i));
                            journal.threads.push(thread::current().id());
                            Ok(caller * 1000 + i)
                        })
                        .unwrap();
                    assert_eq!(result, Some(caller * 1000 + i));
                }
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    let (entries, threads) = serializer
        .submit_and_wait(|journal: &mut Journal| Ok((journal.entries.clone(), journal.threads.clone())))
        .unwrap()
        .unwrap();
    assert_eq!(entries.len(), 200);

    // Per caller, execution order equals submission order
    for caller in 0..8 {
        let order: Vec<usize> = entries.iter().filter(|(c, _)| *c == caller).map(|(_, i)| *i).collect();
        assert_eq!(order, (0..25).collect::<Vec<_>>());
    }

    // Every task ran on the same worker thread
    assert!(threads.iter().all(|id| *id == threads[0]));
    assert_ne!(threads[0], thread::current().id());
}

#[test]
fn test_tasks_never_run_concurrently() {
    let serializer = Arc::new(journal_serializer(1000));
    let active = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let mut futures = Vec::new();
    for _ in 0..50 {
        let active = Arc::clone(&active);
        let overlaps = Arc::clone(&overlaps);
        futures.push(
            serializer
                .submit_future(move |_: &mut Journal| {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(1));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap(),
        );
    }
    for future in futures {
        assert_eq!(future.wait(), Some(()));
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failing_task_yields_none() {
    let serializer = journal_serializer(10);
    let result: Option<u32> = serializer
        .submit_and_wait(|_: &mut Journal| Err(FilterError::Failed("bad input".to_string())))
        .unwrap();
    assert_eq!(result, None);

    let result = serializer.submit_and_wait(|_: &mut Journal| Ok(5)).unwrap();
    assert_eq!(result, Some(5));
}

#[test]
fn test_panicking_task_does_not_kill_worker() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    let serializer: GpuTaskSerializer<Journal> =
        GpuTaskSerializer::new("test-panics", settings(10, Duration::from_secs(2)), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Journal::default())
        })
        .unwrap();

    serializer
        .submit_and_wait(|journal: &mut Journal| {
            journal.entries.push((0, 0));
            Ok(())
        })
        .unwrap();
    let result: Option<()> = serializer
        .submit_and_wait(|_: &mut Journal| -> Result<(), FilterError> { panic!("shader compiler crashed") })
        .unwrap();
    assert_eq!(result, None);
    assert!(serializer.is_running());

    // The next task gets a fresh context
    let entries = serializer
        .submit_and_wait(|journal: &mut Journal| Ok(journal.entries.len()))
        .unwrap();
    assert_eq!(entries, Some(0));
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[test]
fn test_panicking_factory_does_not_end_process() {
    let serializer: GpuTaskSerializer<Journal> =
        GpuTaskSerializer::new("test-factory-panics", settings(10, Duration::from_secs(2)), || {
            panic!("context init crashed")
        })
        .unwrap();

    for _ in 0..3 {
        let result = serializer.submit_and_wait(|_: &mut Journal| Ok(1)).unwrap();
        assert_eq!(result, None);
        assert!(serializer.is_running());
    }
    assert!(serializer.quit());
}

#[test]
fn test_full_queue_rejects_submission() {
    let serializer = journal_serializer(2);
    let release = block_worker(&serializer);

    serializer.submit(|_: &mut Journal| Ok(())).unwrap();
    serializer.submit(|_: &mut Journal| Ok(())).unwrap();
    assert_eq!(serializer.pending(), 2);
    assert_eq!(serializer.submit(|_: &mut Journal| Ok(())), Err(SubmitError::QueueFull));
    assert!(matches!(
        serializer.submit_and_wait(|_: &mut Journal| Ok(1)),
        Err(SubmitError::QueueFull)
    ));

    release.send(()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || serializer.pending() == 0));
    assert_eq!(serializer.submit_and_wait(|_: &mut Journal| Ok(3)).unwrap(), Some(3));
}

#[test]
fn test_wait_timeout() {
    let serializer = journal_serializer(10);
    let release = block_worker(&serializer);

    let started = Instant::now();
    let result = serializer.submit_and_wait_timeout(|_: &mut Journal| Ok(1), Duration::from_millis(50));
    assert_eq!(result, Err(SubmitError::TimedOut));
    assert!(started.elapsed() < Duration::from_secs(1));

    release.send(()).unwrap();
    let result = serializer.submit_and_wait_timeout(|_: &mut Journal| Ok(2), Duration::from_secs(2));
    assert_eq!(result, Ok(Some(2)));
}

#[test]
fn test_quit_is_bounded_with_wedged_task() {
    let serializer: GpuTaskSerializer<Journal> =
        GpuTaskSerializer::new("test-wedged", settings(10, Duration::from_millis(100)), || {
            Ok(Journal::default())
        })
        .unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    serializer
        .submit(move |_: &mut Journal| {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(800));
            Ok(())
        })
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let started = Instant::now();
    assert!(!serializer.quit());
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(serializer.submit(|_: &mut Journal| Ok(())), Err(SubmitError::ShutDown));
}

#[test]
fn test_quit_abandons_queued_tasks() {
    let serializer = journal_serializer(10);
    let release = block_worker(&serializer);
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let queued = serializer
        .submit_future(move |_: &mut Journal| {
            flag.store(true, Ordering::SeqCst);
            Ok(1)
        })
        .unwrap();

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let _ = release.send(());
    });
    assert!(serializer.quit());
    releaser.join().unwrap();

    assert_eq!(queued.wait(), None);
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!serializer.is_running());
    assert!(serializer.quit());
}

struct ThreadTracked {
    dropped_on: Arc<Mutex<Option<ThreadId>>>,
}

impl Drop for ThreadTracked {
    fn drop(&mut self) {
        *self.dropped_on.lock() = Some(thread::current().id());
    }
}

#[test]
fn test_context_lives_and_dies_on_worker_thread() {
    let dropped_on = Arc::new(Mutex::new(None));
    let tracker = Arc::clone(&dropped_on);
    let serializer: GpuTaskSerializer<ThreadTracked> =
        GpuTaskSerializer::new("test-affinity", settings(10, Duration::from_secs(2)), move || {
            Ok(ThreadTracked {
                dropped_on: Arc::clone(&tracker),
            })
        })
        .unwrap();

    let worker = serializer
        .submit_and_wait(|_: &mut ThreadTracked| Ok(thread::current().id()))
        .unwrap()
        .unwrap();
    assert!(serializer.quit());
    assert_eq!(*dropped_on.lock(), Some(worker));
    assert_ne!(worker, thread::current().id());
}

#[tokio::test]
async fn test_submit_async() {
    let serializer = journal_serializer(10);
    let ok = serializer.submit_async(|_: &mut Journal| Ok(21 * 2)).unwrap();
    assert_eq!(ok.await, Some(42));

    let failed = serializer
        .submit_async(|_: &mut Journal| -> Result<u8, FilterError> { Err(FilterError::Failed("nope".to_string())) })
        .unwrap();
    assert_eq!(failed.await, None);
}

fn checkerboard() -> RgbaImage {
    RgbaImage::from_fn(4, 4, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([0, 0, 255, 255])
        }
    })
}

#[test]
fn test_filter_pipeline_from_many_threads() {
    let pipeline = Arc::new(FilterPipeline::new(settings(100, Duration::from_secs(2))).unwrap());

    let workers: Vec<_> = FilterType::ALL
        .into_iter()
        .map(|filter| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                let out = pipeline.apply_filter(checkerboard(), filter).unwrap().unwrap();
                (filter, out)
            })
        })
        .collect();

    for worker in workers {
        let (filter, out) = worker.join().unwrap();
        let [r, g, b, a] = out.get_pixel(0, 0).0;
        match filter {
            FilterType::Standard => assert_eq!([r, g, b, a], [255, 0, 0, 255]),
            FilterType::Mono => assert!(r == g && g == b),
            FilterType::Sepia => assert!(r >= g && g >= b),
            FilterType::Negative => assert_eq!([r, g, b, a], [0, 255, 255, 255]),
        }
    }
    assert!(pipeline.quit());
}

#[test]
fn test_filter_pipeline_custom_context_failure() {
    let pipeline = FilterPipeline::with_context_factory(settings(10, Duration::from_secs(2)), || {
        Err(FilterError::ContextCreation("no adapter".to_string()))
    })
    .unwrap();
    assert_eq!(pipeline.apply_filter(checkerboard(), FilterType::Mono), Ok(None));
}

#[test]
fn test_filter_pipeline_context_panic_is_contained() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let pipeline = FilterPipeline::with_context_factory(settings(10, Duration::from_secs(2)), move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("adapter lost during init");
        }
        Ok(Box::new(CpuFilterContext::new()) as Box<dyn FilterContext>)
    })
    .unwrap();

    assert_eq!(pipeline.apply_filter(checkerboard(), FilterType::Mono), Ok(None));
    assert!(pipeline.serializer().is_running());

    // The next call retries the context and succeeds
    let out = pipeline.apply_filter(checkerboard(), FilterType::Negative).unwrap().unwrap();
    assert_eq!(out.get_pixel(0, 0).0, [0, 255, 255, 255]);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(pipeline.quit());
}

#[tokio::test]
async fn test_filter_pipeline_async() {
    let pipeline = FilterPipeline::new(SerializerSettings::default()).unwrap();
    let out = pipeline
        .apply_filter_async(checkerboard(), FilterType::Negative)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(out.get_pixel(1, 0).0, [255, 255, 0, 255]);
}
