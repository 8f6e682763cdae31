// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the frame texture broker and its render workers

mod common;

use camera_mux::backends::camera::{CameraFrame, CameraIndex, FrameSink};
use camera_mux::gpu::{ExternalTexture, SoftwareContextFactory, StreamTexture};
use camera_mux::render::{ConsumerId, FrameTextureBroker, RenderConsumer, RenderError, RenderSettings, WorkerState};
use common::{OverlapProbe, RecordingConsumer, wait_until};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(3);

fn fast_settings() -> RenderSettings {
    RenderSettings {
        frame_wait_timeout: Duration::from_millis(20),
        pause_poll_interval: Duration::from_millis(10),
        join_timeout: Duration::from_millis(500),
    }
}

fn frame(sequence: u64) -> CameraFrame {
    CameraFrame::rgba(2, 2, sequence, vec![0u8; 16])
}

fn setup(settings: RenderSettings) -> (Arc<SoftwareContextFactory>, Arc<StreamTexture>, Arc<FrameTextureBroker>) {
    let factory = Arc::new(SoftwareContextFactory::new());
    let texture = Arc::new(StreamTexture::new(1));
    let broker = FrameTextureBroker::new(CameraIndex(0), texture.clone(), factory.clone(), settings);
    (factory, texture, broker)
}

fn state_of(broker: &FrameTextureBroker, id: ConsumerId) -> Option<WorkerState> {
    broker.worker_stats(id).map(|stats| stats.state)
}

#[test]
fn test_two_consumers_never_bind_concurrently() {
    let (factory, texture, broker) = setup(fast_settings());
    let probe = Arc::new(OverlapProbe::default());
    let first = Arc::new(
        RecordingConsumer::new("first")
            .with_draw_delay(Duration::from_millis(2))
            .with_probe(probe.clone()),
    );
    let second = Arc::new(
        RecordingConsumer::new("second")
            .with_draw_delay(Duration::from_millis(2))
            .with_probe(probe.clone()),
    );
    broker.attach(first.clone()).unwrap();
    broker.attach(second.clone()).unwrap();
    assert_eq!(broker.consumer_count(), 2);

    for sequence in 1..=20 {
        texture.on_frame(frame(sequence));
        std::thread::sleep(Duration::from_millis(3));
    }

    assert!(wait_until(WAIT, || first.last_sequence() == Some(20)));
    assert!(wait_until(WAIT, || second.last_sequence() == Some(20)));
    assert_eq!(probe.overlaps(), 0);

    broker.detach_all();
    assert_eq!(broker.consumer_count(), 0);
    assert_eq!(texture.attached_context(), None);
    assert_eq!(factory.counters().created.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(factory.counters().live(), 0);
}

#[test]
fn test_latest_frame_wins() {
    let (_, texture, broker) = setup(fast_settings());
    let consumer = Arc::new(RecordingConsumer::new("slow").with_draw_delay(Duration::from_millis(30)));
    broker.attach(consumer.clone()).unwrap();

    for sequence in 1..=10 {
        texture.on_frame(frame(sequence));
    }
    assert!(wait_until(WAIT, || consumer.last_sequence() == Some(10)));

    let seen: Vec<u64> = consumer.sequences().into_iter().flatten().collect();
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    broker.detach_all();
}

#[test]
fn test_duplicate_attach_is_rejected() {
    let (_, _, broker) = setup(fast_settings());
    let consumer = Arc::new(RecordingConsumer::new("viewer"));
    let id = consumer.id();
    broker.attach(consumer.clone()).unwrap();

    assert_eq!(broker.attach(consumer), Err(RenderError::AlreadyAttached(id)));
    assert_eq!(broker.consumers(), vec![id]);
    assert!(broker.detach(id));
    assert!(!broker.detach(id));
}

#[test]
fn test_paused_consumer_does_not_draw() {
    let (_, texture, broker) = setup(fast_settings());
    let consumer = Arc::new(RecordingConsumer::new("paused"));
    consumer.set_paused(true);
    let id = consumer.id();
    broker.attach(consumer.clone()).unwrap();

    assert!(wait_until(WAIT, || state_of(&broker, id) == Some(WorkerState::Running)));
    texture.on_frame(frame(1));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(consumer.draw_count(), 0);

    consumer.set_paused(false);
    assert!(wait_until(WAIT, || consumer.last_sequence() == Some(1)));
    broker.detach_all();
}

#[test]
fn test_swap_failure_stops_only_that_worker() {
    let (factory, texture, broker) = setup(fast_settings());
    factory.limit_swaps(2);
    let failing = Arc::new(RecordingConsumer::new("failing"));
    let failing_id = failing.id();
    broker.attach(failing.clone()).unwrap();

    assert!(wait_until(WAIT, || state_of(&broker, failing_id) == Some(WorkerState::Stopped)));
    assert!(matches!(failing.errors().as_slice(), [RenderError::SwapFailed(_)]));
    assert_eq!(broker.worker_stats(failing_id).unwrap().frames_drawn, 2);
    assert!(failing.resources_destroyed());

    factory.limit_swaps(u64::MAX);
    let healthy = Arc::new(RecordingConsumer::new("healthy"));
    broker.attach(healthy.clone()).unwrap();
    texture.on_frame(frame(7));
    assert!(wait_until(WAIT, || healthy.last_sequence() == Some(7)));
    assert!(healthy.errors().is_empty());

    broker.detach_all();
    assert_eq!(factory.counters().live(), 0);
}

#[test]
fn test_draw_errors_are_not_fatal() {
    let (_, texture, broker) = setup(fast_settings());
    let consumer = Arc::new(RecordingConsumer::new("flaky"));
    consumer.set_fail_draws(true);
    let id = consumer.id();
    broker.attach(consumer.clone()).unwrap();

    texture.on_frame(frame(1));
    assert!(wait_until(WAIT, || !consumer.errors().is_empty()));
    assert!(matches!(consumer.errors()[0], RenderError::Draw(_)));
    assert_eq!(state_of(&broker, id), Some(WorkerState::Running));
    // A failed draw is not presented
    assert_eq!(broker.worker_stats(id).unwrap().frames_drawn, 0);

    consumer.set_fail_draws(false);
    texture.on_frame(frame(2));
    assert!(wait_until(WAIT, || consumer.last_sequence() == Some(2)));
    broker.detach_all();
}

#[test]
fn test_context_creation_failure_reported() {
    let (factory, _, broker) = setup(fast_settings());
    factory.fail_next_creations(true);
    let consumer = Arc::new(RecordingConsumer::new("no-gpu"));
    let id = consumer.id();
    broker.attach(consumer.clone()).unwrap();

    assert!(wait_until(WAIT, || state_of(&broker, id) == Some(WorkerState::Stopped)));
    assert!(matches!(consumer.errors().as_slice(), [RenderError::ContextCreation(_)]));
    assert!(!consumer.resources_created());
    assert!(broker.detach(id));
}

#[test]
fn test_detach_wedged_worker_is_bounded() {
    let settings = RenderSettings {
        join_timeout: Duration::from_millis(100),
        ..fast_settings()
    };
    let (factory, _, broker) = setup(settings);
    let wedged = Arc::new(RecordingConsumer::new("wedged").with_draw_delay(Duration::from_millis(800)));
    let id = wedged.id();
    broker.attach(wedged.clone()).unwrap();
    assert!(wait_until(WAIT, || state_of(&broker, id) == Some(WorkerState::Running)));
    // First draw happens right away, without a frame
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    assert!(broker.detach(id));
    assert!(started.elapsed() < Duration::from_millis(600));
    assert!(!broker.is_attached(id));

    // The detached thread still cleans up once the draw returns
    assert!(wait_until(WAIT, || wedged.resources_destroyed()));
    assert!(wait_until(WAIT, || factory.counters().live() == 0));
}

#[test]
fn test_detach_all_shares_one_deadline() {
    let settings = RenderSettings {
        join_timeout: Duration::from_millis(150),
        ..fast_settings()
    };
    let (factory, _, broker) = setup(settings);
    let consumers: Vec<_> = (0..6)
        .map(|i| {
            Arc::new(RecordingConsumer::new(&format!("wedged-{}", i)).with_draw_delay(Duration::from_millis(400)))
        })
        .collect();
    for consumer in &consumers {
        broker.attach(consumer.clone()).unwrap();
    }
    assert!(wait_until(WAIT, || {
        consumers
            .iter()
            .all(|c| state_of(&broker, c.id()) == Some(WorkerState::Running))
    }));
    std::thread::sleep(Duration::from_millis(50));

    // Six wedged workers must not cost six join timeouts
    let started = Instant::now();
    broker.detach_all();
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(broker.consumer_count(), 0);

    assert!(wait_until(Duration::from_secs(8), || factory.counters().live() == 0));
}

#[test]
fn test_dropping_broker_stops_workers() {
    let (factory, texture, broker) = setup(fast_settings());
    let consumer = Arc::new(RecordingConsumer::new("viewer"));
    broker.attach(consumer.clone()).unwrap();
    texture.on_frame(frame(1));
    assert!(wait_until(WAIT, || consumer.last_sequence() == Some(1)));

    drop(broker);
    assert!(wait_until(WAIT, || consumer.resources_destroyed()));
    assert!(wait_until(WAIT, || factory.counters().live() == 0));
}

#[test]
fn test_released_texture_reports_bind_errors() {
    let (_, texture, broker) = setup(fast_settings());
    let consumer = Arc::new(RecordingConsumer::new("viewer"));
    broker.attach(consumer.clone()).unwrap();
    assert!(wait_until(WAIT, || consumer.draw_count() > 0));

    texture.release();
    assert!(wait_until(WAIT, || consumer
        .errors()
        .iter()
        .any(|e| matches!(e, RenderError::TextureBind(_)))));
    broker.detach_all();
}
