//! Average-lifetime images and instrument-response time-zero estimation.

use crate::accumulate::FrameImages;
use ndarray::{Array3, Zip};

/// Average lifetime per pixel and frame bin, in nanoseconds.
///
/// Each cell is `resolution_ns * lifetime_sum / intensity`, minus the
/// time-zero offset; cells with no photons stay at zero. This is a pure
/// function of the accumulated cubes, so re-running it is harmless.
#[must_use]
pub fn average_lifetime(
    images: &FrameImages,
    resolution_ns: f32,
    time_zero_ns: f32,
    clamp_negative: bool,
) -> Array3<f32> {
    let mut lifetime = Array3::zeros(images.intensity.raw_dim());
    Zip::from(&mut lifetime)
        .and(&images.intensity)
        .and(&images.lifetime_sum)
        .for_each(|out, &count, &sum| {
            if count > 0.0 {
                let mut value = resolution_ns * sum / count - time_zero_ns;
                if clamp_negative && value < 0.0 {
                    value = 0.0;
                }
                *out = value;
            }
        });
    lifetime
}

/// Sub-bin peak position of `values` by a three-point centroid around the
/// maximum. Returns the index itself when the curvature denominator vanishes
/// or the peak sits on an edge.
fn peak_centroid(values: &[f64]) -> Option<f64> {
    if values.len() < 3 {
        return None;
    }
    let (mut peak, mut peak_value) = (1usize, f64::NEG_INFINITY);
    for i in 1..values.len() - 1 {
        if values[i] > peak_value {
            peak = i;
            peak_value = values[i];
        }
    }
    let (prev, here, next) = (values[peak - 1], values[peak], values[peak + 1]);
    let denom = next + prev - 2.0 * here;
    #[allow(clippy::cast_precision_loss)]
    let base = peak as f64;
    if denom == 0.0 {
        Some(base)
    } else {
        Some(base - 0.5 * (next - prev) / denom)
    }
}

/// Estimates the instrument-response time zero from a whole-image
/// arrival-time histogram, in nanoseconds.
///
/// The IRF onset is where the histogram rises fastest, so the estimate is
/// the centroid-refined peak of the first discrete derivative. The +1 shift
/// maps the derivative index back onto histogram bins. Returns `None` for
/// histograms too short or too flat to carry a peak.
#[must_use]
pub fn estimate_irf_time_zero(histogram: &[u64], resolution_ns: f32) -> Option<f32> {
    #[allow(clippy::cast_precision_loss)]
    let derivative: Vec<f64> = histogram
        .windows(2)
        .map(|w| w[1] as f64 - w[0] as f64)
        .collect();
    if derivative.iter().all(|&d| d <= 0.0) {
        return None;
    }
    let centroid = peak_centroid(&derivative)?;
    #[allow(clippy::cast_possible_truncation)]
    Some(resolution_ns * (centroid as f32 + 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    #[test]
    fn test_average_lifetime_basic() {
        let images = FrameImages {
            intensity: Array3::from_shape_vec((1, 1, 2), vec![4.0, 0.0]).unwrap(),
            lifetime_sum: Array3::from_shape_vec((1, 1, 2), vec![20.0, 0.0]).unwrap(),
        };
        let lifetime = average_lifetime(&images, 0.5, 0.0, false);
        assert_relative_eq!(lifetime[[0, 0, 0]], 2.5);
        // No photons: stays zero, no division.
        assert_eq!(lifetime[[0, 0, 1]], 0.0);
    }

    #[test]
    fn test_average_lifetime_is_idempotent() {
        let images = FrameImages {
            intensity: Array3::from_shape_vec((1, 2, 2), vec![1.0, 2.0, 3.0, 0.0]).unwrap(),
            lifetime_sum: Array3::from_shape_vec((1, 2, 2), vec![5.0, 8.0, 9.0, 0.0]).unwrap(),
        };
        let first = average_lifetime(&images, 0.25, 0.1, true);
        let second = average_lifetime(&images, 0.25, 0.1, true);
        assert_eq!(first, second);
    }

    #[test]
    fn test_negative_lifetime_clamping() {
        let images = FrameImages {
            intensity: Array3::from_shape_vec((1, 1, 1), vec![2.0]).unwrap(),
            lifetime_sum: Array3::from_shape_vec((1, 1, 1), vec![4.0]).unwrap(),
        };
        // Average is 2 ns; subtracting 5 ns goes negative.
        let signed = average_lifetime(&images, 1.0, 5.0, false);
        assert_relative_eq!(signed[[0, 0, 0]], -3.0);
        let clamped = average_lifetime(&images, 1.0, 5.0, true);
        assert_eq!(clamped[[0, 0, 0]], 0.0);
    }

    #[test]
    fn test_symmetric_peak_centroid_is_exact() {
        // Derivative [0, 1, 3, 1, 0] is symmetric around index 2, so the
        // centroid lands on it exactly and the estimate is bin 3.
        let histogram = [0u64, 0, 1, 4, 5, 5, 5];
        let tzero = estimate_irf_time_zero(&histogram, 1.0).unwrap();
        assert_relative_eq!(tzero, 3.0);
    }

    #[test]
    fn test_asymmetric_peak_shifts_toward_heavier_side() {
        // Derivative [0, 1, 4, 2, 0]: peak at index 2, pulled toward the
        // heavier right neighbor.
        let histogram = [0u64, 0, 1, 5, 7, 7];
        let tzero = estimate_irf_time_zero(&histogram, 2.0).unwrap();
        // centroid = 2 - 0.5*(2-1)/(2+1-8) = 2.1; tzero = 2*(2.1+1).
        assert_relative_eq!(tzero, 6.2, max_relative = 1e-6);
    }

    #[test]
    fn test_flat_histogram_has_no_time_zero() {
        assert_eq!(estimate_irf_time_zero(&[5, 5, 5, 5, 5], 1.0), None);
        assert_eq!(estimate_irf_time_zero(&[], 1.0), None);
        assert_eq!(estimate_irf_time_zero(&[9, 3, 1], 1.0), None);
    }
}
