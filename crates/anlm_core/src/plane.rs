//! Plane allocation, border padding and shape checks.
//!
//! Planes are plain `ndarray` 2D arrays. Inputs are taken as views so a
//! caller may pass a window of a wider buffer (row stride larger than the
//! width); every stage reads through the view and writes into freshly
//! allocated contiguous planes.

use ndarray::{Array2, ArrayView2};

use crate::error::{NlmError, NlmResult};
use crate::float_trait::NlmFloat;

/// Allocate a zero-filled `rows x cols` plane, reporting allocation failure
/// instead of aborting.
pub fn try_zeros<F: NlmFloat>(rows: usize, cols: usize) -> NlmResult<Array2<F>> {
    let len = rows
        .checked_mul(cols)
        .ok_or(NlmError::AllocationFailure { rows, cols })?;
    let mut data: Vec<F> = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| NlmError::AllocationFailure { rows, cols })?;
    data.resize(len, F::zero());
    Array2::from_shape_vec((rows, cols), data)
        .map_err(|_| NlmError::AllocationFailure { rows, cols })
}

/// Pad a plane by `pad` samples on every side using nearest-edge
/// replication. Interior samples are copied exactly.
pub fn pad_replicate<F: NlmFloat>(input: ArrayView2<F>, pad: usize) -> NlmResult<Array2<F>> {
    let (rows, cols) = input.dim();
    ensure_non_empty(input, "pad input")?;

    let mut padded = try_zeros(rows + 2 * pad, cols + 2 * pad)?;
    let last_r = rows - 1;
    let last_c = cols - 1;

    for (pr, mut out_row) in padded.rows_mut().into_iter().enumerate() {
        let src_r = pr.saturating_sub(pad).min(last_r);
        let src_row = input.row(src_r);
        let first = src_row[0];
        let last = src_row[last_c];
        for (pc, out) in out_row.iter_mut().enumerate() {
            *out = if pc < pad {
                first
            } else if pc >= pad + cols {
                last
            } else {
                src_row[pc - pad]
            };
        }
    }

    Ok(padded)
}

pub(crate) fn ensure_non_empty<F: NlmFloat>(plane: ArrayView2<F>, name: &str) -> NlmResult<()> {
    let (rows, cols) = plane.dim();
    if rows == 0 || cols == 0 {
        return Err(NlmError::invalid(format!(
            "{} is empty (shape {:?})",
            name,
            (rows, cols)
        )));
    }
    Ok(())
}

pub(crate) fn ensure_same_dim(
    a: (usize, usize),
    b: (usize, usize),
    a_name: &str,
    b_name: &str,
) -> NlmResult<()> {
    if a != b {
        return Err(NlmError::invalid(format!(
            "Dimension mismatch: {} has shape {:?}, but {} has shape {:?}",
            a_name, a, b_name, b
        )));
    }
    Ok(())
}

/// Check that a pre-padded plane carries at least one interior sample after
/// removing `pad` samples per side. Returns the interior shape.
pub(crate) fn interior_dim<F: NlmFloat>(
    padded: ArrayView2<F>,
    pad: usize,
    name: &str,
) -> NlmResult<(usize, usize)> {
    let (rows, cols) = padded.dim();
    if rows <= 2 * pad || cols <= 2 * pad {
        return Err(NlmError::invalid(format!(
            "{} with shape {:?} is too small for padding {}",
            name,
            (rows, cols),
            pad
        )));
    }
    Ok((rows - 2 * pad, cols - 2 * pad))
}
