// SPDX-License-Identifier: GPL-3.0-only

//! Preview size negotiation policies
//!
//! When a device is opened the registry asks a [`SizeChooser`] to pick one of
//! the sizes the hardware supports.

use super::types::FrameSize;
use parking_lot::Mutex;
use tracing::debug;

/// Picks the preview size from the hardware-supported candidates
pub trait SizeChooser: Send + Sync {
    /// Choose one of `candidates`, or `None` if none is acceptable
    fn choose(&self, candidates: &[FrameSize]) -> Option<FrameSize>;
}

impl<F> SizeChooser for F
where
    F: Fn(&[FrameSize]) -> Option<FrameSize> + Send + Sync,
{
    fn choose(&self, candidates: &[FrameSize]) -> Option<FrameSize> {
        self(candidates)
    }
}

/// Chooses the candidate closest to a target size, penalising aspect mismatch
///
/// Each candidate is scored by
/// `(euclidean distance to target + 1) × (aspect ratio difference + 1)²`
/// and the lowest score wins. Ties keep the earlier candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestSizeChooser {
    target: FrameSize,
}

impl NearestSizeChooser {
    pub fn new(target: FrameSize) -> Self {
        Self { target }
    }

    pub fn target(&self) -> FrameSize {
        self.target
    }

    /// Score of one candidate; lower is better
    pub fn score(&self, candidate: FrameSize) -> f64 {
        let dw = candidate.width as f64 - self.target.width as f64;
        let dh = candidate.height as f64 - self.target.height as f64;
        let distance = (dw * dw + dh * dh).sqrt();
        let aspect = (candidate.aspect_ratio() - self.target.aspect_ratio()).abs();
        (distance + 1.0) * (aspect + 1.0) * (aspect + 1.0)
    }
}

impl SizeChooser for NearestSizeChooser {
    fn choose(&self, candidates: &[FrameSize]) -> Option<FrameSize> {
        let mut best: Option<(FrameSize, f64)> = None;
        for &candidate in candidates {
            let score = self.score(candidate);
            match best {
                Some((_, best_score)) if best_score <= score => {}
                _ => best = Some((candidate, score)),
            }
        }

        if let Some((size, score)) = best {
            debug!(target_size = %self.target, chosen = %size, score, "Chose preview size");
        }
        best.map(|(size, _)| size)
    }
}

/// Wraps another chooser and freezes its first successful choice
///
/// Useful when several logical owners must agree on one negotiated size:
/// later calls return the frozen size regardless of the candidates offered.
#[derive(Debug)]
pub struct CachedSizeChooser<C> {
    inner: C,
    chosen: Mutex<Option<FrameSize>>,
}

impl<C: SizeChooser> CachedSizeChooser<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            chosen: Mutex::new(None),
        }
    }

    /// The frozen choice, if one was made
    pub fn cached(&self) -> Option<FrameSize> {
        *self.chosen.lock()
    }

    /// Forget the frozen choice so the next call negotiates again
    pub fn reset(&self) {
        *self.chosen.lock() = None;
    }
}

impl<C: SizeChooser> SizeChooser for CachedSizeChooser<C> {
    fn choose(&self, candidates: &[FrameSize]) -> Option<FrameSize> {
        let mut chosen = self.chosen.lock();
        if let Some(size) = *chosen {
            return Some(size);
        }
        let size = self.inner.choose(candidates)?;
        *chosen = Some(size);
        Some(size)
    }
}
