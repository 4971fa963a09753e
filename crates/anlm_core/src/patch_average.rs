//! Patch-similarity averaging (non-local means with a per-pixel sigma).
//!
//! For every pixel, each candidate center in the 11x11 search window is
//! weighted by `lut(SSD / sigma(p)^2)`, where SSD compares the 5x5 patches
//! around the pixel and the candidate. The pixel itself is excluded from
//! the search and re-added with the largest weight seen among candidates.
//!
//! ## Kernels
//!
//! - [`PatchKernel::Scalar`]: straightforward per-candidate loops, the
//!   reference used by the tests.
//! - [`PatchKernel::Lanes`]: for one search row, the SSDs of all eleven
//!   horizontal candidates are accumulated together. Each patch sample is
//!   subtracted from eleven contiguous source samples, which the compiler
//!   turns into vector lanes. Accumulation order per candidate matches the
//!   scalar kernel.
//!
//! Rows are independent and processed in parallel with rayon; the LUT and
//! sigma map are only read.

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::error::{NlmError, NlmResult};
use crate::float_trait::NlmFloat;
use crate::lut::WeightLut;
use crate::plane::{ensure_same_dim, interior_dim, try_zeros};

// =============================================================================
// Constants
// =============================================================================

/// Half-size of the compared patches (5x5).
pub const PATCH_RADIUS: usize = 2;

/// Half-size of the search window (11x11).
pub const SEARCH_RADIUS: usize = 5;

pub const PATCH_SIZE: usize = 2 * PATCH_RADIUS + 1;
pub const SEARCH_SIZE: usize = 2 * SEARCH_RADIUS + 1;

/// Padding the source plane must carry for [`patch_average`].
pub const PAE_PADDING: usize = PATCH_RADIUS + SEARCH_RADIUS;

/// Width of the source strip touched by one search row.
const STRIP_WIDTH: usize = SEARCH_SIZE + PATCH_SIZE - 1;

/// Inner-loop implementation used by [`patch_average`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchKernel {
    /// One candidate at a time.
    Scalar,
    /// All candidates of a search row at once.
    #[default]
    Lanes,
}

/// Denoise the interior of `src_padded`.
///
/// # Arguments
/// * `src_padded` - Source padded by [`PAE_PADDING`] samples per side
/// * `sigma_map` - Per-pixel strength, interior shape
/// * `lut` - Weight table, fully built before the call
/// * `kernel` - Inner-loop implementation
///
/// # Returns
/// Denoised plane of the interior shape. Pixels whose sigma is not positive
/// are copied unchanged.
pub fn patch_average<F: NlmFloat>(
    src_padded: ArrayView2<F>,
    sigma_map: ArrayView2<F>,
    lut: &WeightLut<F>,
    kernel: PatchKernel,
) -> NlmResult<Array2<F>> {
    let (rows, cols) = interior_dim(src_padded, PAE_PADDING, "patch average input")?;
    ensure_same_dim(sigma_map.dim(), (rows, cols), "sigma map", "source interior")?;

    let src = src_padded.as_standard_layout();
    let stride = src.ncols();
    let data = src
        .as_slice()
        .ok_or_else(|| NlmError::invalid("source plane is not contiguous"))?;

    let mut output = try_zeros(rows, cols)?;
    let output_rows: Vec<_> = output.axis_iter_mut(Axis(0)).collect();

    output_rows
        .into_par_iter()
        .enumerate()
        .for_each(|(r, mut out_row)| {
            for (c, out) in out_row.iter_mut().enumerate() {
                let sigma = sigma_map[[r, c]];
                *out = match kernel {
                    PatchKernel::Scalar => denoise_pixel_scalar(data, stride, r, c, sigma, lut),
                    PatchKernel::Lanes => denoise_pixel_lanes(data, stride, r, c, sigma, lut),
                };
            }
        });

    log::debug!(
        "patch average: {}x{} interior, {:?} kernel",
        rows,
        cols,
        kernel
    );

    Ok(output)
}

/// Running sums of one pixel's weighted average.
///
/// Values are accumulated relative to the center so that a window equal to
/// the center sums to exactly zero and returns the center unchanged.
struct Accumulator<F: NlmFloat> {
    center: F,
    w_max: F,
    sum_w: F,
    sum_wd: F,
}

impl<F: NlmFloat> Accumulator<F> {
    fn new(center: F) -> Self {
        Self {
            center,
            w_max: F::zero(),
            sum_w: F::zero(),
            sum_wd: F::zero(),
        }
    }

    #[inline(always)]
    fn add(&mut self, weight: F, value: F) {
        if weight > self.w_max {
            self.w_max = weight;
        }
        self.sum_w += weight;
        self.sum_wd += weight * (value - self.center);
    }

    /// Re-add the excluded center with the best candidate weight and
    /// normalize. Falls back to the center when nothing carried weight.
    #[inline(always)]
    fn finish(self) -> F {
        // The center contributes `w_max` to the weight and nothing to the
        // offset sum.
        let sum_w = self.sum_w + self.w_max;
        if sum_w > F::zero() {
            self.center + self.sum_wd / sum_w
        } else {
            self.center
        }
    }
}

#[inline(always)]
fn center_index(stride: usize, r: usize, c: usize) -> usize {
    (r + PAE_PADDING) * stride + c + PAE_PADDING
}

fn denoise_pixel_scalar<F: NlmFloat>(
    src: &[F],
    stride: usize,
    r: usize,
    c: usize,
    sigma: F,
    lut: &WeightLut<F>,
) -> F {
    let center = src[center_index(stride, r, c)];
    if !(sigma > F::zero()) {
        return center;
    }
    let inv_sigma2 = F::one() / (sigma * sigma);

    // Top-left corners of the query patch and of the search area
    let query_top = r + SEARCH_RADIUS;
    let query_left = c + SEARCH_RADIUS;

    let mut acc = Accumulator::new(center);
    for sy in 0..SEARCH_SIZE {
        for sx in 0..SEARCH_SIZE {
            if sy == SEARCH_RADIUS && sx == SEARCH_RADIUS {
                continue;
            }

            let mut ssd = F::zero();
            for py in 0..PATCH_SIZE {
                let q_base = (query_top + py) * stride + query_left;
                let c_base = (r + sy + py) * stride + c + sx;
                for px in 0..PATCH_SIZE {
                    let d = src[q_base + px] - src[c_base + px];
                    ssd += d * d;
                }
            }

            let value = src[(r + sy + PATCH_RADIUS) * stride + c + sx + PATCH_RADIUS];
            acc.add(lut.lookup(ssd * inv_sigma2), value);
        }
    }

    acc.finish()
}

fn denoise_pixel_lanes<F: NlmFloat>(
    src: &[F],
    stride: usize,
    r: usize,
    c: usize,
    sigma: F,
    lut: &WeightLut<F>,
) -> F {
    let center = src[center_index(stride, r, c)];
    if !(sigma > F::zero()) {
        return center;
    }
    let inv_sigma2 = F::one() / (sigma * sigma);

    let mut query = [[F::zero(); PATCH_SIZE]; PATCH_SIZE];
    for (py, q_row) in query.iter_mut().enumerate() {
        let base = (r + SEARCH_RADIUS + py) * stride + c + SEARCH_RADIUS;
        q_row.copy_from_slice(&src[base..base + PATCH_SIZE]);
    }

    let mut acc = Accumulator::new(center);
    for sy in 0..SEARCH_SIZE {
        let mut ssd = [F::zero(); SEARCH_SIZE];
        for (py, q_row) in query.iter().enumerate() {
            let base = (r + sy + py) * stride + c;
            let strip = &src[base..base + STRIP_WIDTH];
            for (px, &qv) in q_row.iter().enumerate() {
                for (lane, &b) in ssd.iter_mut().zip(&strip[px..px + SEARCH_SIZE]) {
                    let d = qv - b;
                    *lane += d * d;
                }
            }
        }

        let value_base = (r + sy + PATCH_RADIUS) * stride + c + PATCH_RADIUS;
        let values = &src[value_base..value_base + SEARCH_SIZE];
        for (sx, (&d, &value)) in ssd.iter().zip(values).enumerate() {
            if sy == SEARCH_RADIUS && sx == SEARCH_RADIUS {
                continue;
            }
            acc.add(lut.lookup(d * inv_sigma2), value);
        }
    }

    acc.finish()
}
