//! Sigma map synthesis.
//!
//! Maps the fused weight map (high = resist smoothing) to a per-pixel
//! filtering strength between the sensitivity-scaled floor and the base
//! strength.

use ndarray::{Array2, ArrayView2};

use crate::error::{NlmError, NlmResult};
use crate::filters::gaussian_blur;
use crate::float_trait::NlmFloat;
use crate::plane::ensure_non_empty;

/// Positive bias keeping every sigma away from zero.
pub const SIGMA_EPSILON: f64 = 1e-3;

/// Smoothing of the blended weight map (5x5 window, sigma 2).
const WEIGHT_SMOOTH_RADIUS: usize = 2;
const WEIGHT_SMOOTH_SIGMA: f64 = 2.0;

/// Build the sigma map from a fused weight map.
///
/// With `adapt_factor == 0` the weight is uniformly one and every pixel gets
/// the floor strength `sensitivity * sigma_base + eps`. Otherwise the weight
/// is blended towards one by `1 - adapt_factor`, smoothed, and mapped as
/// `(base - s*base) * (1 - w) + s*base + eps`.
pub fn synthesize_sigma<F: NlmFloat>(
    weight_map: ArrayView2<F>,
    sigma_base: F,
    sensitivity: F,
    adapt_factor: F,
) -> NlmResult<Array2<F>> {
    ensure_non_empty(weight_map, "weight map")?;
    check_sigma_params(sigma_base, sensitivity, adapt_factor)?;

    let eps = F::from_f64_c(SIGMA_EPSILON);
    let floor = sensitivity * sigma_base;
    let span = sigma_base - floor;

    let smoothed = if adapt_factor == F::zero() {
        Array2::from_elem(weight_map.raw_dim(), F::one())
    } else {
        let keep = F::one() - adapt_factor;
        let blended = weight_map.mapv(|w| {
            let w = w.max(F::zero()).min(F::one());
            adapt_factor * w + keep
        });
        gaussian_blur(
            blended.view(),
            F::from_f64_c(WEIGHT_SMOOTH_SIGMA),
            WEIGHT_SMOOTH_RADIUS,
        )?
    };

    Ok(smoothed.mapv(|w| {
        let w = w.max(F::zero()).min(F::one());
        span * (F::one() - w) + floor + eps
    }))
}

pub(crate) fn check_sigma_params<F: NlmFloat>(
    sigma_base: F,
    sensitivity: F,
    adapt_factor: F,
) -> NlmResult<()> {
    if !(sigma_base >= F::zero()) || !sigma_base.is_finite() {
        return Err(NlmError::invalid(format!(
            "sigma_base must be >= 0, got {:?}",
            sigma_base
        )));
    }
    if !(sensitivity >= F::zero() && sensitivity <= F::one()) {
        return Err(NlmError::invalid(format!(
            "sensitivity must be in [0, 1], got {:?}",
            sensitivity
        )));
    }
    if !(adapt_factor >= F::zero() && adapt_factor <= F::one()) {
        return Err(NlmError::invalid(format!(
            "adapt_factor must be in [0, 1], got {:?}",
            adapt_factor
        )));
    }
    Ok(())
}
