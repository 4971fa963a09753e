//! Structure tensor extraction.
//!
//! Builds the 2x2 gradient covariance of every pixel over a box window and
//! turns its eigenvalues into a bounded regularity score:
//! `1` for edge-like (anisotropic) or perfectly flat neighborhoods, values
//! near `0` for isotropic texture.
//!
//! ## Padding
//!
//! The input must already be padded by `window_radius + 1` samples per side
//! (one for the 3x3 Sobel stencil, the rest for the box window). The default
//! 5x5 window therefore needs [`STRUCTURE_PADDING`] = 3.

use ndarray::{s, Array2, ArrayView2, Zip};

use crate::error::NlmResult;
use crate::filters::{box_sum_valid, sobel_valid};
use crate::float_trait::NlmFloat;
use crate::plane::{interior_dim, try_zeros};

// =============================================================================
// Constants
// =============================================================================

/// Box window radius of the public 5x5 extractor.
pub const STRUCTURE_RADIUS: usize = 2;

/// Padding required by [`extract_structure_map`].
pub const STRUCTURE_PADDING: usize = STRUCTURE_RADIUS + 1;

/// Normalization of the Sobel products (`gx^2 / 16`, ...).
const TENSOR_SCALE: f64 = 16.0;

/// Normalization of the per-pixel gradient magnitude (`(|gx| + |gy|) / 8`).
const GRAD_MAG_SCALE: f64 = 8.0;

/// Smaller-eigenvalue scale of the corner term.
const CORNER_SCALE: f64 = 1024.0 * 128.0;

/// Window-averaged gradient magnitude at which regularity saturates to 1.
const GRAD_MAG_THRESHOLD: f64 = 4.0;

// =============================================================================
// Types
// =============================================================================

/// Outputs of the structure tensor stage, both sized to the unpadded
/// interior.
#[derive(Debug, Clone)]
pub struct StructureMaps<F: NlmFloat> {
    /// Regularity score in `[0, 1]`.
    pub regularity: Array2<F>,
    /// Per-pixel gradient magnitude `(|gx| + |gy|) / 8`.
    pub grad_mag: Array2<F>,
}

// =============================================================================
// Entry Points
// =============================================================================

/// Extract regularity and gradient magnitude with the 5x5 tensor window.
///
/// `src_padded` must be padded by [`STRUCTURE_PADDING`] samples per side.
pub fn extract_structure_map<F: NlmFloat>(src_padded: ArrayView2<F>) -> NlmResult<StructureMaps<F>> {
    extract_structure_map_with_radius(src_padded, STRUCTURE_RADIUS)
}

/// Extract regularity and gradient magnitude with a `(2r+1) x (2r+1)`
/// tensor window. `src_padded` must be padded by `r + 1` samples per side.
pub fn extract_structure_map_with_radius<F: NlmFloat>(
    src_padded: ArrayView2<F>,
    window_radius: usize,
) -> NlmResult<StructureMaps<F>> {
    let (rows, cols) = interior_dim(src_padded, window_radius + 1, "structure input")?;

    // Gradient field keeps `window_radius` samples of border.
    let (gx, gy) = sobel_valid(src_padded)?;
    let (grad_rows, grad_cols) = gx.dim();

    let tensor_scale = F::one() / F::from_f64_c(TENSOR_SCALE);
    let mag_scale = F::one() / F::from_f64_c(GRAD_MAG_SCALE);

    let mut gxx = try_zeros(grad_rows, grad_cols)?;
    let mut gyy = try_zeros(grad_rows, grad_cols)?;
    let mut gxy = try_zeros(grad_rows, grad_cols)?;
    let mut gm = try_zeros(grad_rows, grad_cols)?;
    Zip::from(&mut gxx)
        .and(&mut gyy)
        .and(&mut gxy)
        .and(&mut gm)
        .and(&gx)
        .and(&gy)
        .for_each(|xx, yy, xy, m, &dx, &dy| {
            *xx = dx * dx * tensor_scale;
            *yy = dy * dy * tensor_scale;
            *xy = dx * dy * tensor_scale;
            *m = (dx.abs() + dy.abs()) * mag_scale;
        });
    drop(gx);
    drop(gy);

    let pxx = box_sum_valid(gxx.view(), window_radius)?;
    let pyy = box_sum_valid(gyy.view(), window_radius)?;
    let pxy = box_sum_valid(gxy.view(), window_radius)?;
    let gm_sum = box_sum_valid(gm.view(), window_radius)?;
    let inv_area = F::one() / F::usize_as((2 * window_radius + 1) * (2 * window_radius + 1));

    let mut regularity = try_zeros(rows, cols)?;
    Zip::from(&mut regularity)
        .and(&pxx)
        .and(&pyy)
        .and(&pxy)
        .and(&gm_sum)
        .for_each(|out, &xx, &yy, &xy, &m| {
            *out = regularity_from_tensor(xx, yy, xy, m * inv_area);
        });

    let mut grad_mag = try_zeros(rows, cols)?;
    grad_mag.assign(&gm.slice(s![
        window_radius..window_radius + rows,
        window_radius..window_radius + cols
    ]));

    log::debug!(
        "structure map: {}x{} interior, window {}x{}",
        rows,
        cols,
        2 * window_radius + 1,
        2 * window_radius + 1
    );

    Ok(StructureMaps {
        regularity,
        grad_mag,
    })
}

/// Regularity score of one windowed tensor `[[pxx, pxy], [pxy, pyy]]`.
///
/// `eg1`/`eg2` are the doubled eigenvalues. A non-positive discriminant or a
/// vanishing smaller eigenvalue counts as fully regular.
pub(crate) fn regularity_from_tensor<F: NlmFloat>(pxx: F, pyy: F, pxy: F, grad_mean: F) -> F {
    let trace = pxx + pyy;
    let four = F::from_f64_c(4.0);
    let k = trace * trace - four * (pxx * pyy - pxy * pxy);
    if k <= F::zero() {
        return F::one();
    }

    let temp = k.max(F::zero()).sqrt();
    let eg1 = trace + temp;
    let eg2 = (trace - temp).abs();
    if eg2 == F::zero() {
        return F::one();
    }

    let ratio = (eg1 - eg2) / (eg1 + eg2);
    let anisotropy = ratio * ratio;
    let corner = (eg2 / F::from_f64_c(CORNER_SCALE))
        .max(F::zero())
        .min(F::one());

    let weight = (grad_mean / F::from_f64_c(GRAD_MAG_THRESHOLD))
        .max(F::zero())
        .min(F::one());

    (weight + (F::one() - weight) * (anisotropy + corner))
        .max(F::zero())
        .min(F::one())
}
