//! Sharpness fusion.
//!
//! Combines a Laplacian-of-Gaussian response and a local mean absolute
//! deviation, both divided by the local luminance, into one score that
//! says how strongly a pixel should resist smoothing. The score is
//! thresholded by the sensitivity, rescaled to `[0, 1]` and cleaned of
//! isolated weak spikes.

use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{NlmError, NlmResult};
use crate::filters::{box_mean, laplacian_of_gaussian, mean_abs_deviation, remove_isolated_bulbs};
use crate::float_trait::NlmFloat;
use crate::plane::ensure_non_empty;

// =============================================================================
// Constants
// =============================================================================

/// Radius of the box window estimating local luminance (5x5).
const LUMA_RADIUS: usize = 2;

/// Radius of the mean-absolute-deviation window (5x5).
const MAD_RADIUS: usize = 2;

/// Luminance floor used when normalizing, keeps dark regions from blowing up.
const LUMA_FLOOR: f64 = 32.0;

/// Width of the sensitivity band mapped onto `[0, 1]`.
const SENSITIVITY_BAND: f64 = 0.25;

/// Neighborhood radius of the isolated-spike cleanup (11x11).
pub const BULB_RADIUS: usize = 5;

/// Peak level below which an 11x11 neighborhood is treated as a stray spike.
pub const BULB_THRESHOLD: f64 = 0.25;

/// Compute the sharpness map of `src`.
///
/// # Arguments
/// * `src` - Unpadded source plane (8-bit reference units)
/// * `sensitivity` - Lower edge of the sensitivity band, in `[0, 1]`
/// * `log_sigma` - Gaussian scale of the LoG response, `> 0`
///
/// # Returns
/// Map of the source shape with values in `[0, 1]`.
pub fn fuse_sharpness<F: NlmFloat>(
    src: ArrayView2<F>,
    sensitivity: F,
    log_sigma: F,
) -> NlmResult<Array2<F>> {
    ensure_non_empty(src, "sharpness input")?;
    if !(sensitivity >= F::zero() && sensitivity <= F::one()) {
        return Err(NlmError::invalid(format!(
            "sensitivity must be in [0, 1], got {:?}",
            sensitivity
        )));
    }
    if !(log_sigma > F::zero()) || !log_sigma.is_finite() {
        return Err(NlmError::invalid(format!(
            "log_sigma must be > 0, got {:?}",
            log_sigma
        )));
    }

    let luma = box_mean(src, LUMA_RADIUS)?;
    let mut fused = laplacian_of_gaussian(src, log_sigma)?;
    let mad = mean_abs_deviation(src, MAD_RADIUS)?;

    let floor = F::from_f64_c(LUMA_FLOOR);
    Zip::from(&mut fused)
        .and(&mad)
        .and(&luma)
        .for_each(|out, &m, &l| {
            let inv_luma = F::one() / l.max(floor);
            let sharp = (*out * inv_luma).min(m * inv_luma);
            *out = apply_sensitivity(sharp, sensitivity);
        });

    let cleaned = remove_isolated_bulbs(fused.view(), BULB_RADIUS, F::from_f64_c(BULB_THRESHOLD))?;

    log::debug!(
        "sharpness map: {:?}, sensitivity {:?}, log_sigma {:?}",
        src.dim(),
        sensitivity,
        log_sigma
    );

    Ok(cleaned)
}

/// Clamp to `[s, s + 0.25]` and rescale that band to `[0, 1]`.
#[inline]
pub(crate) fn apply_sensitivity<F: NlmFloat>(value: F, sensitivity: F) -> F {
    let band = F::from_f64_c(SENSITIVITY_BAND);
    let clamped = value.max(sensitivity).min(sensitivity + band);
    (clamped - sensitivity) / band
}
