//! Background removal by color-distance matting.
//!
//! The background color is estimated from the four corner pixels; every pixel
//! closer than `threshold` to that estimate (Euclidean RGB distance) becomes
//! fully transparent, with a linear alpha ramp up to `2 * threshold`. A
//! photographic corner produces a poor estimate; that is an accepted
//! limitation of the heuristic, not something this module tries to detect.

use crate::PixelBuffer;

/// Reference color-distance threshold.
pub const DEFAULT_THRESHOLD: u8 = 50;

/// Produce a fresh buffer with alpha faded out near the estimated background
/// color. Defined for every input; never fails.
pub fn remove_background(source: &PixelBuffer, threshold: u8) -> PixelBuffer {
    let mut data = source.data.clone();
    if data.is_empty() {
        return PixelBuffer {
            width: source.width,
            height: source.height,
            data,
        };
    }

    let background = estimate_background(source);
    let threshold = threshold as f32;
    for px in data.chunks_exact_mut(4) {
        let dr = px[0] as f32 - background[0];
        let dg = px[1] as f32 - background[1];
        let db = px[2] as f32 - background[2];
        let distance = (dr * dr + dg * dg + db * db).sqrt();

        if distance < threshold {
            px[3] = 0;
        } else if distance < threshold * 2.0 {
            let alpha = (distance - threshold) / threshold * 255.0;
            px[3] = alpha.clamp(0.0, 255.0) as u8;
        }
    }

    PixelBuffer {
        width: source.width,
        height: source.height,
        data,
    }
}

/// Arithmetic mean of the corner pixels' RGB. Corner coordinates are deduped
/// so 1-wide or 1-tall images do not double-count overlapping corners.
fn estimate_background(source: &PixelBuffer) -> [f32; 3] {
    let right = source.width.saturating_sub(1);
    let bottom = source.height.saturating_sub(1);
    let mut corners = vec![(0, 0), (right, 0), (0, bottom), (right, bottom)];
    corners.sort_unstable();
    corners.dedup();

    let mut sum = [0f32; 3];
    for &(x, y) in &corners {
        let px = source.pixel(x, y);
        sum[0] += px[0] as f32;
        sum[1] += px[1] as f32;
        sum[2] += px[2] as f32;
    }
    let count = corners.len() as f32;
    [sum[0] / count, sum[1] / count, sum[2] / count]
}

#[cfg(test)]
mod tests {
    use super::*;

    const BG: [u8; 4] = [200, 200, 200, 255];

    fn buffer_with_center(center: [u8; 4]) -> PixelBuffer {
        // 3x3 uniform background with one distinct center pixel.
        let mut data = Vec::new();
        for i in 0..9 {
            if i == 4 {
                data.extend_from_slice(&center);
            } else {
                data.extend_from_slice(&BG);
            }
        }
        PixelBuffer::new(3, 3, data).unwrap()
    }

    #[test]
    fn background_matching_pixels_become_transparent() {
        let out = remove_background(&buffer_with_center(BG), DEFAULT_THRESHOLD);
        for px in out.data().chunks_exact(4) {
            assert_eq!(px[3], 0);
        }
    }

    #[test]
    fn distant_pixels_keep_their_alpha() {
        // Distance 100 from the background mean, i.e. >= 2 * threshold.
        let out = remove_background(&buffer_with_center([100, 200, 200, 255]), DEFAULT_THRESHOLD);
        assert_eq!(out.pixel(1, 1)[3], 255);
        assert_eq!(out.pixel(1, 1)[..3], [100, 200, 200]);
    }

    #[test]
    fn midband_pixel_gets_half_alpha() {
        // Distance exactly 1.5 * threshold: alpha = 0.5 * 255 ~= 127.
        let out = remove_background(&buffer_with_center([125, 200, 200, 255]), DEFAULT_THRESHOLD);
        let alpha = out.pixel(1, 1)[3];
        assert!((126..=128).contains(&alpha), "alpha was {alpha}");
    }

    #[test]
    fn source_buffer_is_not_mutated() {
        let source = buffer_with_center(BG);
        let before = source.clone();
        let _ = remove_background(&source, DEFAULT_THRESHOLD);
        assert_eq!(source, before);
    }

    #[test]
    fn single_pixel_image_uses_one_corner_sample() {
        let source = PixelBuffer::new(1, 1, vec![10, 20, 30, 255]).unwrap();
        let out = remove_background(&source, DEFAULT_THRESHOLD);
        // The lone pixel is its own background estimate: distance 0.
        assert_eq!(out.pixel(0, 0), [10, 20, 30, 0]);
    }

    #[test]
    fn one_row_image_dedupes_corners() {
        // 3x1 row: corners are (0,0) and (2,0); mean is their average, not a
        // four-sample average that would double-count them.
        let source = PixelBuffer::new(3, 1, vec![0, 0, 0, 255, 90, 90, 90, 255, 100, 100, 100, 255]).unwrap();
        let out = remove_background(&source, DEFAULT_THRESHOLD);
        // Mean is (50,50,50); the middle pixel at distance ~69 lands in the ramp band.
        let alpha = out.pixel(1, 0)[3];
        assert!(alpha > 0 && alpha < 255, "alpha was {alpha}");
    }
}
