// SPDX-License-Identifier: GPL-3.0-only
//! Filter pipeline running on a single dedicated GPU thread
//!
//! Filter contexts are thread-affine like render contexts. Every filter call
//! is therefore packaged as a task and executed by one serializer thread that
//! owns the context; callers block on (or await) the task's result.

mod completion;
mod cpu_filter;
mod gpu_filter;
mod task_queue;

pub use completion::{Promise, TaskFuture, completion};
pub use cpu_filter::CpuFilterContext;
pub use gpu_filter::{FilterPipeline, apply_filter_shared_rgba, get_filter_pipeline};
pub use task_queue::{GpuTaskSerializer, SerializerSettings};

use image::RgbaImage;
use std::fmt;

/// Colour filters the pipeline can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterType {
    /// No filter applied
    #[default]
    Standard,
    /// Black & white / monochrome filter
    Mono,
    /// Sepia tone filter (warm brownish tint)
    Sepia,
    /// Negative - inverted colors
    Negative,
}

impl FilterType {
    pub const ALL: [FilterType; 4] = [
        FilterType::Standard,
        FilterType::Mono,
        FilterType::Sepia,
        FilterType::Negative,
    ];
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterType::Standard => write!(f, "standard"),
            FilterType::Mono => write!(f, "mono"),
            FilterType::Sepia => write!(f, "sepia"),
            FilterType::Negative => write!(f, "negative"),
        }
    }
}

impl std::str::FromStr for FilterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "original" | "none" => Ok(FilterType::Standard),
            "mono" | "bw" => Ok(FilterType::Mono),
            "sepia" => Ok(FilterType::Sepia),
            "negative" | "invert" => Ok(FilterType::Negative),
            other => Err(format!("unknown filter '{}'", other)),
        }
    }
}

/// Stateful filter implementation living on the serializer thread
pub trait FilterContext {
    /// Short name for logs
    fn name(&self) -> &str;

    fn apply(&mut self, input: &RgbaImage, filter: FilterType) -> Result<RgbaImage, FilterError>;
}

/// Failures inside filter tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Pixel buffer does not match the stated dimensions
    InvalidInput(String),
    /// The filter context could not be created
    ContextCreation(String),
    /// The filter ran and failed
    Failed(String),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::InvalidInput(msg) => write!(f, "Invalid filter input: {}", msg),
            FilterError::ContextCreation(msg) => write!(f, "Failed to create filter context: {}", msg),
            FilterError::Failed(msg) => write!(f, "Filter failed: {}", msg),
        }
    }
}

impl std::error::Error for FilterError {}
