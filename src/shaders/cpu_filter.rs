// SPDX-License-Identifier: GPL-3.0-only

//! Reference filter context computing every filter on the CPU
//!
//! Produces the same colours as the compute shader path and stands in for it
//! when no GPU device is available.

use super::{FilterContext, FilterError, FilterType};
use image::{Rgba, RgbaImage};

/// Filter context that processes pixels in place on the serializer thread
#[derive(Debug, Default)]
pub struct CpuFilterContext {
    images_filtered: u64,
}

impl CpuFilterContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn images_filtered(&self) -> u64 {
        self.images_filtered
    }
}

#[inline]
fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

#[inline]
fn to_unit(c: u8) -> f32 {
    c as f32 / 255.0
}

#[inline]
fn from_unit(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn filter_pixel(pixel: &mut Rgba<u8>, filter: FilterType) {
    let [r, g, b, a] = pixel.0;
    let (r, g, b) = (to_unit(r), to_unit(g), to_unit(b));

    let (r, g, b) = match filter {
        FilterType::Standard => (r, g, b),
        FilterType::Mono => {
            let gray = luminance(r, g, b);
            (gray, gray, gray)
        }
        FilterType::Sepia => {
            let l = luminance(r, g, b);
            (l * 1.2 + 0.1, l * 0.9 + 0.05, l * 0.7)
        }
        FilterType::Negative => (1.0 - r, 1.0 - g, 1.0 - b),
    };

    pixel.0 = [from_unit(r), from_unit(g), from_unit(b), a];
}

impl FilterContext for CpuFilterContext {
    fn name(&self) -> &str {
        "cpu"
    }

    fn apply(&mut self, input: &RgbaImage, filter: FilterType) -> Result<RgbaImage, FilterError> {
        let mut output = input.clone();
        if filter != FilterType::Standard {
            for pixel in output.pixels_mut() {
                filter_pixel(pixel, filter);
            }
        }
        self.images_filtered += 1;
        Ok(output)
    }
}
