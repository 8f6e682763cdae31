// SPDX-License-Identifier: GPL-3.0-only

//! Fan-out of one camera texture to many render workers

use super::worker::{RenderWorker, WorkerStats};
use super::{ConsumerId, RenderConsumer, RenderError, RenderSettings};
use crate::backends::camera::CameraIndex;
use crate::gpu::{ExternalTexture, RenderContext, RenderContextFactory, TextureHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, info};

/// Owns the render workers attached to one camera
///
/// The shared texture can only be bound into one context at a time, so every
/// worker draws through [`FrameTextureBroker::draw_client_frame`], which holds
/// the bind lock for the whole bind/latch/draw/unbind sequence.
pub struct FrameTextureBroker {
    index: CameraIndex,
    texture: Arc<dyn ExternalTexture>,
    factory: Arc<dyn RenderContextFactory>,
    settings: RenderSettings,
    workers: Mutex<HashMap<ConsumerId, RenderWorker>>,
    bind_lock: Mutex<()>,
    self_ref: Weak<FrameTextureBroker>,
}

impl FrameTextureBroker {
    /// Create a broker and hook it up as the texture's frame listener
    pub fn new(
        index: CameraIndex,
        texture: Arc<dyn ExternalTexture>,
        factory: Arc<dyn RenderContextFactory>,
        settings: RenderSettings,
    ) -> Arc<Self> {
        let broker = Arc::new_cyclic(|self_ref| Self {
            index,
            texture: Arc::clone(&texture),
            factory,
            settings,
            workers: Mutex::new(HashMap::new()),
            bind_lock: Mutex::new(()),
            self_ref: self_ref.clone(),
        });

        let listener = Arc::downgrade(&broker);
        texture.set_frame_listener(Box::new(move || {
            if let Some(broker) = listener.upgrade() {
                broker.on_frame_available();
            }
        }));

        broker
    }

    pub fn index(&self) -> CameraIndex {
        self.index
    }

    /// Start a render worker for `consumer`
    pub fn attach(&self, consumer: Arc<dyn RenderConsumer>) -> Result<(), RenderError> {
        let id = consumer.id();
        let mut workers = self.workers.lock();
        if workers.contains_key(&id) {
            return Err(RenderError::AlreadyAttached(id));
        }

        let worker = RenderWorker::spawn(
            consumer,
            self.self_ref.clone(),
            Arc::clone(&self.factory),
            self.settings,
        )?;
        workers.insert(id, worker);
        info!(index = %self.index, consumer = %id, consumers = workers.len(), "Consumer attached");
        Ok(())
    }

    /// Stop and forget the worker of `id`
    ///
    /// Returns `false` if no such consumer was attached. Waits at most the
    /// configured join timeout for the render thread.
    pub fn detach(&self, id: ConsumerId) -> bool {
        // Removed under the lock, stopped outside it so frame fan-out is never blocked
        let worker = self.workers.lock().remove(&id);
        let Some(mut worker) = worker else {
            return false;
        };

        worker.stop(self.settings.join_timeout);
        info!(index = %self.index, consumer = %id, "Consumer detached");
        true
    }

    /// Stop every worker
    pub fn detach_all(&self) {
        let workers: Vec<RenderWorker> = self.workers.lock().drain().map(|(_, w)| w).collect();
        if workers.is_empty() {
            return;
        }

        // Signal all first so the bounded waits overlap
        for worker in &workers {
            worker.request_stop();
        }
        // One deadline shared by all joins
        let deadline = Instant::now() + self.settings.join_timeout;
        let count = workers.len();
        for mut worker in workers {
            worker.stop(deadline.saturating_duration_since(Instant::now()));
        }
        info!(index = %self.index, consumers = count, "All consumers detached");
    }

    /// Wake every worker; called on the producer's delivery thread
    pub fn on_frame_available(&self) {
        for worker in self.workers.lock().values() {
            worker.notify_frame();
        }
    }

    /// Bind the texture into `context`, latch the newest frame, draw, unbind
    ///
    /// Runs on the calling worker's thread. Returns the sequence number of the
    /// frame drawn, `None` if no frame has arrived yet.
    pub fn draw_client_frame(
        &self,
        consumer: &dyn RenderConsumer,
        context: &mut dyn RenderContext,
    ) -> Result<Option<u64>, RenderError> {
        let _bound = self.bind_lock.lock();
        let context_id = context.id();

        let name = self
            .texture
            .attach_to_context(context_id)
            .map_err(RenderError::TextureBind)?;

        let result = self
            .texture
            .update_tex_image(context_id)
            .map_err(RenderError::TextureBind)
            .and_then(|frame| {
                let handle = TextureHandle {
                    name,
                    context: context_id,
                    frame,
                };
                consumer.draw(context, &handle).map(|()| handle.sequence())
            });

        self.texture.detach_from_context(context_id);
        result
    }

    pub fn consumer_count(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_attached(&self, id: ConsumerId) -> bool {
        self.workers.lock().contains_key(&id)
    }

    pub fn worker_stats(&self, id: ConsumerId) -> Option<WorkerStats> {
        self.workers.lock().get(&id).map(RenderWorker::stats)
    }

    pub fn consumers(&self) -> Vec<ConsumerId> {
        self.workers.lock().keys().copied().collect()
    }
}

impl Drop for FrameTextureBroker {
    fn drop(&mut self) {
        if !self.workers.get_mut().is_empty() {
            debug!(index = %self.index, "Broker dropped with consumers attached");
            self.detach_all();
        }
    }
}
