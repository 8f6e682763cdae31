// SPDX-License-Identifier: GPL-3.0-only

//! Camera resource registry
//!
//! The registry provides:
//! - At most one opened device per camera index, shared by every viewer
//! - A per-index guard arbitrating open/startPreview/stopPreview/close
//! - The texture and broker that fan each device's frames out to viewers
//!
//! All operations run under one registry-wide lock. Guard changes are only
//! committed once the hardware work they trigger has succeeded.

use super::device::CaptureDeviceHandle;
use super::guard::{DeviceState, GuardEntry, GuardMode, Transition};
use super::size_chooser::SizeChooser;
use super::types::{BackendError, BackendResult, CameraDevice, CameraIndex, FocusMode, FrameSize};
use super::CaptureBackend;
use crate::errors::{AppResult, DeviceError, DeviceOperation};
use crate::gpu::{ExternalTexture, RenderContextFactory, StreamTexture};
use crate::render::{ConsumerId, FrameTextureBroker, RenderConsumer, RenderSettings};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything that exists while a device is open
struct CameraSlot {
    handle: CaptureDeviceHandle,
    texture: Arc<StreamTexture>,
    broker: Arc<FrameTextureBroker>,
}

impl CameraSlot {
    /// Release hardware first; consumers and texture only go once that worked
    fn teardown(&mut self) -> BackendResult<()> {
        self.handle.release()?;
        self.broker.detach_all();
        self.texture.release();
        Ok(())
    }
}

#[derive(Default)]
struct RegistryState {
    guards: HashMap<CameraIndex, GuardEntry>,
    slots: HashMap<CameraIndex, CameraSlot>,
}

impl RegistryState {
    fn entry(&self, index: CameraIndex) -> GuardEntry {
        self.guards.get(&index).copied().unwrap_or_default()
    }
}

/// Shared owner of every opened camera
///
/// Thread-safe and can be shared across threads.
#[derive(Clone)]
pub struct CameraResourceRegistry {
    backend: Arc<dyn CaptureBackend>,
    factory: Arc<dyn RenderContextFactory>,
    focus: FocusMode,
    render_settings: RenderSettings,
    state: Arc<Mutex<RegistryState>>,
}

impl CameraResourceRegistry {
    /// Create a registry over `backend`, rendering through contexts from `factory`
    pub fn new(backend: Arc<dyn CaptureBackend>, factory: Arc<dyn RenderContextFactory>) -> Self {
        info!(backend = %backend.backend_type(), "Creating camera resource registry");
        Self {
            backend,
            factory,
            focus: FocusMode::default(),
            render_settings: RenderSettings::default(),
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    /// Focus mode applied to devices opened from now on
    pub fn with_focus(mut self, focus: FocusMode) -> Self {
        self.focus = focus;
        self
    }

    /// Render timing for brokers created from now on
    pub fn with_render_settings(mut self, settings: RenderSettings) -> Self {
        self.render_settings = settings;
        self
    }

    pub fn backend(&self) -> &Arc<dyn CaptureBackend> {
        &self.backend
    }

    /// Enumerate cameras of the underlying backend
    pub fn enumerate_cameras(&self) -> BackendResult<Vec<CameraDevice>> {
        let cameras = self.backend.enumerate_cameras();
        if cameras.is_empty() {
            Err(BackendError::DeviceNotFound("No cameras found".to_string()))
        } else {
            Ok(cameras)
        }
    }

    /// Install or update the guard of `index`
    ///
    /// Without `force_recover` the state and counters carry over into the new
    /// mode. With it the entry restarts at Closed with zero counts, and a
    /// device still held for the index is released best-effort.
    pub fn flag(&self, index: CameraIndex, state_check: bool, reference_count: bool, force_recover: bool) {
        let mode = GuardMode::from_flags(state_check, reference_count);
        let mut state = self.state.lock();
        let previous = state.entry(index);

        let next = if force_recover {
            if let Some(mut slot) = state.slots.remove(&index) {
                warn!(index = %index, "Force recovery releasing a live device");
                if let Err(e) = slot.teardown() {
                    warn!(index = %index, error = %e, "Failed to release device during force recovery");
                }
            }
            GuardEntry::new(mode)
        } else {
            previous.with_mode(mode)
        };

        state.guards.insert(index, next);
        info!(
            index = %index,
            mode = %mode,
            force = force_recover,
            state = %next.state,
            open_count = next.open_count,
            preview_count = next.preview_count,
            "Camera guard flagged"
        );
    }

    /// Register interest in `index`, opening the hardware if nobody holds it yet
    pub fn open(&self, index: CameraIndex, chooser: &dyn SizeChooser) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let transition = state.entry(index).on_open();

        if transition.proceed && !state.slots.contains_key(&index) {
            let handle = CaptureDeviceHandle::open(self.backend.as_ref(), index, chooser, self.focus)
                .map_err(|e| DeviceError::new(index, DeviceOperation::Open, e))?;
            let texture = Arc::new(StreamTexture::new(index.0 + 1));
            let broker = FrameTextureBroker::new(
                index,
                texture.clone(),
                Arc::clone(&self.factory),
                self.render_settings,
            );
            state.slots.insert(index, CameraSlot { handle, texture, broker });
        }

        Self::commit(&mut state, index, "open", transition);
        Ok(())
    }

    /// Start the preview stream of `index`
    pub fn start_preview(&self, index: CameraIndex) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let transition = state.entry(index).on_start_preview();

        if transition.proceed {
            match state.slots.get_mut(&index) {
                Some(slot) => {
                    let sink = slot.texture.clone();
                    slot.handle
                        .start_capture(sink)
                        .map_err(|e| DeviceError::new(index, DeviceOperation::StartPreview, e))?;
                }
                None => warn!(index = %index, "Start preview requested without an open device"),
            }
        }

        Self::commit(&mut state, index, "start preview", transition);
        Ok(())
    }

    /// Withdraw preview interest; the stream stops once the last owner leaves
    pub fn stop_preview(&self, index: CameraIndex) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let transition = state.entry(index).on_stop_preview();

        if transition.proceed {
            if let Some(slot) = state.slots.get_mut(&index) {
                slot.handle
                    .stop_capture()
                    .map_err(|e| DeviceError::new(index, DeviceOperation::StopPreview, e))?;
            }
        }

        Self::commit(&mut state, index, "stop preview", transition);
        Ok(())
    }

    /// Withdraw interest in `index`; the device is released once the last owner leaves
    pub fn close(&self, index: CameraIndex) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let transition = state.entry(index).on_close();

        if transition.proceed {
            if let Some(slot) = state.slots.get_mut(&index) {
                slot.teardown()
                    .map_err(|e| DeviceError::new(index, DeviceOperation::Close, e))?;
            }
            state.slots.remove(&index);
        }

        Self::commit(&mut state, index, "close", transition);
        Ok(())
    }

    fn commit(state: &mut RegistryState, index: CameraIndex, operation: &str, transition: Transition) {
        let next = transition.next;
        debug!(
            index = %index,
            operation,
            proceed = transition.proceed,
            state = %next.state,
            open_count = next.open_count,
            preview_count = next.preview_count,
            "Guard transition"
        );
        state.guards.insert(index, next);
    }

    /// Lifecycle state of `index`; `None` without an entry or with state checking off
    pub fn get_state(&self, index: CameraIndex) -> Option<DeviceState> {
        self.state.lock().guards.get(&index).and_then(GuardEntry::visible_state)
    }

    /// Negotiated preview size; `None` without an open device or with state checking off
    pub fn get_frame_size(&self, index: CameraIndex) -> Option<FrameSize> {
        let state = self.state.lock();
        state.guards.get(&index).and_then(GuardEntry::visible_state)?;
        state.slots.get(&index).map(|slot| slot.handle.frame_size())
    }

    /// Snapshot of the guard entry of `index`
    pub fn guard(&self, index: CameraIndex) -> Option<GuardEntry> {
        self.state.lock().guards.get(&index).copied()
    }

    /// Whether a device is currently held for `index`
    pub fn is_device_open(&self, index: CameraIndex) -> bool {
        self.state.lock().slots.contains_key(&index)
    }

    /// Broker of the device open at `index`
    pub fn broker(&self, index: CameraIndex) -> Option<Arc<FrameTextureBroker>> {
        self.state.lock().slots.get(&index).map(|slot| Arc::clone(&slot.broker))
    }

    /// Attach a viewer to the frames of `index`
    pub fn attach(&self, index: CameraIndex, consumer: Arc<dyn RenderConsumer>) -> AppResult<ConsumerId> {
        let broker = self
            .broker(index)
            .ok_or_else(|| DeviceError::new(index, DeviceOperation::Attach, BackendError::NotOpen))?;
        let id = consumer.id();
        broker.attach(consumer)?;
        Ok(id)
    }

    /// Detach a viewer; `false` if it was not attached to `index`
    pub fn detach(&self, index: CameraIndex, id: ConsumerId) -> bool {
        // Joining the render thread happens outside the registry lock
        match self.broker(index) {
            Some(broker) => broker.detach(id),
            None => false,
        }
    }

    /// Release every device best-effort and reset all guards to Closed
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let slots: Vec<(CameraIndex, CameraSlot)> = state.slots.drain().collect();
        for (index, mut slot) in slots {
            if let Err(e) = slot.teardown() {
                warn!(index = %index, error = %e, "Failed to release device during shutdown");
            }
        }
        for entry in state.guards.values_mut() {
            *entry = GuardEntry::new(entry.mode);
        }
        info!("Camera resource registry shut down");
    }
}
