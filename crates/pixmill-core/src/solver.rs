//! Size-targeting quality search.
//!
//! Finds the lossy-encoder quality whose output size lands nearest a target
//! byte budget. Assumes encoded size is non-decreasing in quality; standard
//! lossy encoders satisfy this, and the search is not hardened against
//! pathological inputs that violate it. Every probe is a full re-encode, so
//! probe results are cached per quality and the probe count is bounded: two
//! boundary probes, at most [`MAX_BISECTIONS`] bisection steps, and at most
//! 99 downward-scan steps.

use std::collections::HashMap;

use crate::{Codec, CoreError, OutputFormat, PixelBuffer, QualityResult};

/// Iteration cap for the bisection phase.
pub const MAX_BISECTIONS: u32 = 20;

/// A result within 0.5% of the target counts as exact.
pub const TOLERANCE_RATIO: f64 = 0.005;

pub fn find_quality_for_target(
    codec: &dyn Codec,
    buffer: &PixelBuffer,
    format: OutputFormat,
    target_bytes: u64,
) -> Result<QualityResult, CoreError> {
    if !format.is_lossy() {
        return Err(CoreError::Encode(format!(
            "quality search requires a lossy format, not {}",
            format.as_str()
        )));
    }

    let mut probes = ProbeCache::new(codec, buffer, format);
    let min_size = probes.size_at(1)?;
    let max_size = probes.size_at(100)?;

    // Targets outside the achievable range: the nearest boundary quality is
    // the best we can do, and it is never exact.
    if target_bytes >= max_size {
        return Ok(QualityResult {
            quality: 100,
            actual_size: max_size,
            is_exact: false,
        });
    }
    if target_bytes <= min_size {
        return Ok(QualityResult {
            quality: 1,
            actual_size: min_size,
            is_exact: false,
        });
    }

    let mut best = QualityResult {
        quality: 1,
        actual_size: min_size,
        is_exact: false,
    };
    let mut best_diff = min_size.abs_diff(target_bytes);
    if max_size.abs_diff(target_bytes) < best_diff {
        best = QualityResult {
            quality: 100,
            actual_size: max_size,
            is_exact: false,
        };
        best_diff = max_size.abs_diff(target_bytes);
    }

    let mut low = 1u8;
    let mut high = 100u8;
    let mut iterations = 0u32;
    while high - low > 1 && iterations < MAX_BISECTIONS {
        let mid = low + (high - low) / 2;
        let size = probes.size_at(mid)?;
        let diff = size.abs_diff(target_bytes);
        if diff < best_diff {
            best = QualityResult {
                quality: mid,
                actual_size: size,
                is_exact: false,
            };
            best_diff = diff;
        }
        if within_tolerance(diff, target_bytes) {
            return Ok(QualityResult {
                quality: mid,
                actual_size: size,
                is_exact: true,
            });
        }
        if size > target_bytes {
            high = mid;
        } else {
            low = mid;
        }
        iterations += 1;
    }

    // The best probe may still overshoot; walk quality down until the output
    // fits under the budget. Quality 1 is known to fit, so this terminates.
    if best.actual_size > target_bytes {
        let mut quality = best.quality.saturating_sub(1).max(1);
        loop {
            let size = probes.size_at(quality)?;
            if size <= target_bytes {
                return Ok(QualityResult {
                    quality,
                    actual_size: size,
                    is_exact: within_tolerance(size.abs_diff(target_bytes), target_bytes),
                });
            }
            if quality == 1 {
                break;
            }
            quality -= 1;
        }
    }

    best.is_exact = within_tolerance(best_diff, target_bytes);
    Ok(best)
}

fn within_tolerance(diff: u64, target_bytes: u64) -> bool {
    diff as f64 <= target_bytes as f64 * TOLERANCE_RATIO
}

/// Memoized quality -> encoded-size probes over one immutable source buffer.
struct ProbeCache<'a> {
    codec: &'a dyn Codec,
    buffer: &'a PixelBuffer,
    format: OutputFormat,
    sizes: HashMap<u8, u64>,
}

impl<'a> ProbeCache<'a> {
    fn new(codec: &'a dyn Codec, buffer: &'a PixelBuffer, format: OutputFormat) -> Self {
        Self {
            codec,
            buffer,
            format,
            sizes: HashMap::new(),
        }
    }

    fn size_at(&mut self, quality: u8) -> Result<u64, CoreError> {
        if let Some(&size) = self.sizes.get(&quality) {
            return Ok(size);
        }
        let encoded = self.codec.encode(self.buffer, self.format, Some(quality))?;
        let size = encoded.len();
        self.sizes.insert(quality, size);
        Ok(size)
    }
}
