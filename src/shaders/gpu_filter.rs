// SPDX-License-Identifier: GPL-3.0-only
//! Filter pipeline for images
//!
//! Every filter call runs as a task on one serializer thread that owns the
//! filter context, so callers on any thread can share a single context.

use super::cpu_filter::CpuFilterContext;
use super::task_queue::{GpuTaskSerializer, SerializerSettings};
use super::{FilterContext, FilterError, FilterType};
use crate::errors::SubmitError;
use image::RgbaImage;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

type Context = Box<dyn FilterContext>;

/// Filter front end over a task serializer
pub struct FilterPipeline {
    serializer: GpuTaskSerializer<Context>,
}

impl FilterPipeline {
    /// Create a pipeline backed by the CPU filter context
    pub fn new(settings: SerializerSettings) -> std::io::Result<Self> {
        Self::with_context_factory(settings, || Ok(Box::new(CpuFilterContext::new()) as Context))
    }

    /// Create a pipeline whose context comes from `factory`
    ///
    /// The factory runs on the serializer thread before the first task and
    /// again after a task or the factory itself failed.
    pub fn with_context_factory<F>(settings: SerializerSettings, mut factory: F) -> std::io::Result<Self>
    where
        F: FnMut() -> Result<Context, FilterError> + Send + 'static,
    {
        let serializer = GpuTaskSerializer::new("filter-pipeline", settings, move || {
            let context = factory()?;
            debug!(context = context.name(), "Filter context ready");
            Ok(context)
        })?;
        info!("Filter pipeline initialized");
        Ok(Self { serializer })
    }

    pub fn serializer(&self) -> &GpuTaskSerializer<Context> {
        &self.serializer
    }

    /// Filter an image, blocking until the result is ready
    ///
    /// `Ok(None)` means the filter failed on the serializer thread.
    pub fn apply_filter(&self, image: RgbaImage, filter: FilterType) -> Result<Option<RgbaImage>, SubmitError> {
        self.serializer
            .submit_and_wait(move |ctx: &mut Context| ctx.apply(&image, filter))
    }

    /// Like [`apply_filter`](Self::apply_filter) with a bound on the wait
    pub fn apply_filter_timeout(
        &self,
        image: RgbaImage,
        filter: FilterType,
        timeout: Duration,
    ) -> Result<Option<RgbaImage>, SubmitError> {
        self.serializer
            .submit_and_wait_timeout(move |ctx: &mut Context| ctx.apply(&image, filter), timeout)
    }

    /// Apply a filter to RGBA data
    ///
    /// Takes RGBA pixel data (width * height * 4 bytes) and returns filtered
    /// RGBA data. A buffer that does not match the dimensions yields `Ok(None)`.
    pub fn apply_filter_rgba(
        &self,
        rgba_data: &[u8],
        width: u32,
        height: u32,
        filter: FilterType,
    ) -> Result<Option<Vec<u8>>, SubmitError> {
        let data = rgba_data.to_vec();
        self.serializer.submit_and_wait(move |ctx: &mut Context| {
            let image = rgba_image(data, width, height)?;
            Ok(ctx.apply(&image, filter)?.into_raw())
        })
    }

    /// Non-blocking variant for async callers
    pub fn apply_filter_async(
        &self,
        image: RgbaImage,
        filter: FilterType,
    ) -> Result<impl Future<Output = Option<RgbaImage>> + Send + use<>, SubmitError> {
        self.serializer
            .submit_async(move |ctx: &mut Context| ctx.apply(&image, filter))
    }

    /// Stop the serializer thread; see [`GpuTaskSerializer::quit`]
    pub fn quit(&self) -> bool {
        self.serializer.quit()
    }
}

fn rgba_image(data: Vec<u8>, width: u32, height: u32) -> Result<RgbaImage, FilterError> {
    let len = data.len();
    RgbaImage::from_raw(width, height, data).ok_or_else(|| {
        FilterError::InvalidInput(format!(
            "{} bytes do not hold a {}x{} RGBA image",
            len, width, height
        ))
    })
}

/// Shared filter pipeline instance
static FILTER_PIPELINE: OnceLock<Result<FilterPipeline, String>> = OnceLock::new();

/// Get or create the shared filter pipeline with default settings
pub fn get_filter_pipeline() -> Result<&'static FilterPipeline, String> {
    FILTER_PIPELINE
        .get_or_init(|| {
            FilterPipeline::new(SerializerSettings::default())
                .map_err(|e| format!("Failed to start filter pipeline: {}", e))
        })
        .as_ref()
        .map_err(Clone::clone)
}

/// Apply a filter to RGBA data using the shared pipeline
pub fn apply_filter_shared_rgba(
    rgba_data: &[u8],
    width: u32,
    height: u32,
    filter: FilterType,
) -> Result<Vec<u8>, String> {
    let pipeline = get_filter_pipeline()?;
    pipeline
        .apply_filter_rgba(rgba_data, width, height, filter)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "Filter task failed".to_string())
}
