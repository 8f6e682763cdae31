// SPDX-License-Identifier: GPL-3.0-only

//! Headless render contexts
//!
//! Software contexts do no rasterization. They track the lifecycle calls a
//! real context would receive, which is enough to drive the render loop
//! without a display server.

use super::{ContextId, DisplaySurface, GpuError, GpuResult, RenderContext, RenderContextFactory};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// Lifecycle counters shared by every context of one factory
#[derive(Debug, Default)]
pub struct SoftwareCounters {
    pub created: AtomicU64,
    pub destroyed: AtomicU64,
    pub swaps: AtomicU64,
}

impl SoftwareCounters {
    /// Contexts created but not yet destroyed
    pub fn live(&self) -> u64 {
        self.created
            .load(Ordering::SeqCst)
            .saturating_sub(self.destroyed.load(Ordering::SeqCst))
    }
}

/// Factory for [`SoftwareContext`]s
#[derive(Debug)]
pub struct SoftwareContextFactory {
    counters: Arc<SoftwareCounters>,
    fail_creation: AtomicBool,
    /// Swaps allowed per context before it reports a lost surface
    swap_budget: AtomicU64,
}

impl Default for SoftwareContextFactory {
    fn default() -> Self {
        Self {
            counters: Arc::new(SoftwareCounters::default()),
            fail_creation: AtomicBool::new(false),
            swap_budget: AtomicU64::new(u64::MAX),
        }
    }
}

impl SoftwareContextFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> Arc<SoftwareCounters> {
        Arc::clone(&self.counters)
    }

    /// Make every following `create_context` call fail
    pub fn fail_next_creations(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }

    /// Contexts created from now on fail their swap after `swaps` successes
    pub fn limit_swaps(&self, swaps: u64) {
        self.swap_budget.store(swaps, Ordering::SeqCst);
    }
}

impl RenderContextFactory for SoftwareContextFactory {
    fn create_context(&self, surface: &DisplaySurface) -> GpuResult<Box<dyn RenderContext>> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(GpuError::ContextCreationFailed(format!(
                "software context refused for surface '{}'",
                surface.name
            )));
        }

        let context = SoftwareContext {
            id: ContextId::next(),
            surface: surface.clone(),
            counters: Arc::clone(&self.counters),
            swaps_left: self.swap_budget.load(Ordering::SeqCst),
            current: false,
            destroyed: false,
        };
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        debug!(context = %context.id, surface = %surface.name, "Created software context");
        Ok(Box::new(context))
    }
}

/// A context that only records what happened to it
#[derive(Debug)]
pub struct SoftwareContext {
    id: ContextId,
    surface: DisplaySurface,
    counters: Arc<SoftwareCounters>,
    swaps_left: u64,
    current: bool,
    destroyed: bool,
}

impl RenderContext for SoftwareContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn surface(&self) -> &DisplaySurface {
        &self.surface
    }

    fn make_current(&mut self) -> GpuResult<()> {
        if self.destroyed {
            return Err(GpuError::ContextLost(format!("{} was destroyed", self.id)));
        }
        self.current = true;
        Ok(())
    }

    fn swap_buffers(&mut self) -> GpuResult<()> {
        if self.destroyed || !self.current {
            return Err(GpuError::ContextLost(format!("{} is not current", self.id)));
        }
        if self.swaps_left == 0 {
            return Err(GpuError::SwapFailed(format!(
                "surface '{}' is gone",
                self.surface.name
            )));
        }
        self.swaps_left -= 1;
        self.counters.swaps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.current = false;
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        debug!(context = %self.id, "Destroyed software context");
    }
}

impl Drop for SoftwareContext {
    fn drop(&mut self) {
        self.destroy();
    }
}
