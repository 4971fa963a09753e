//! Convolution and morphology building blocks shared by the stages.
//!
//! Two flavours are provided:
//! - `*_valid` operators consume a pre-padded plane and return the region
//!   where the full window fits (each side shrinks by the window radius).
//! - "same" operators (`gaussian_blur`, `box_mean`, `max_filter`, ...) pad
//!   internally with nearest-edge replication and return a plane of the
//!   input shape.
//!
//! All operators write into freshly allocated planes; none work in place.
//! Separable passes run row-then-column with contiguous row buffers so the
//! inner loops stay auto-vectorizable.

use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{NlmError, NlmResult};
use crate::float_trait::NlmFloat;
use crate::plane::{pad_replicate, try_zeros};

/// Sobel smoothing taps (perpendicular to the derivative direction).
const SOBEL_SMOOTH: [f64; 3] = [1.0, 2.0, 1.0];

/// LoG window size factor: size = ceil(2.5 * sigma), forced odd.
const LOG_SIZE_FACTOR: f64 = 2.5;

/// Compute a normalized 1D Gaussian kernel of length `2 * radius + 1`.
pub fn gaussian_kernel_1d<F: NlmFloat>(sigma: F, radius: usize) -> Vec<F> {
    if sigma <= F::zero() {
        let mut kernel = vec![F::zero(); 2 * radius + 1];
        kernel[radius] = F::one();
        return kernel;
    }

    let size = 2 * radius + 1;
    let mut kernel = vec![F::zero(); size];

    let sigma2 = sigma * sigma;
    let mut sum = F::zero();
    let two = F::from_f64_c(2.0);

    for (i, k) in kernel.iter_mut().enumerate() {
        let x = F::usize_as(i) - F::usize_as(radius);
        let val = (-(x * x) / (two * sigma2)).exp();
        *k = val;
        sum += val;
    }

    let inv_sum = F::one() / sum;
    for val in kernel.iter_mut() {
        *val *= inv_sum;
    }

    kernel
}

/// Window radius used by the Laplacian-of-Gaussian for a given sigma.
pub fn log_window_radius<F: NlmFloat>(sigma: F) -> usize {
    let size = (sigma.as_f64() * LOG_SIZE_FACTOR).ceil().max(1.0) as usize;
    let size = if size % 2 == 0 { size + 1 } else { size };
    size / 2
}

fn ensure_window<F: NlmFloat>(input: ArrayView2<F>, window: usize) -> NlmResult<()> {
    let (rows, cols) = input.dim();
    if window == 0 || rows < window || cols < window {
        return Err(NlmError::invalid(format!(
            "Plane with shape {:?} cannot hold a {}x{} window",
            (rows, cols),
            window,
            window
        )));
    }
    Ok(())
}

/// Slide a `window`-wide operator along every row.
fn rows_valid<F, Op>(input: ArrayView2<F>, window: usize, op: Op) -> NlmResult<Array2<F>>
where
    F: NlmFloat,
    Op: Fn(&[F]) -> F,
{
    let (rows, cols) = input.dim();
    let mut output = try_zeros(rows, cols + 1 - window)?;

    let mut row_buf = Vec::with_capacity(cols);
    for (in_row, mut out_row) in input.rows().into_iter().zip(output.rows_mut()) {
        row_buf.clear();
        row_buf.extend(in_row.iter().copied());
        for (c, out) in out_row.iter_mut().enumerate() {
            *out = op(&row_buf[c..c + window]);
        }
    }

    Ok(output)
}

/// Fold `window` consecutive rows into each output row.
/// `op(acc, sample, tap)` is applied lane-wise across the whole row.
fn cols_valid<F, Op>(input: ArrayView2<F>, window: usize, init: F, op: Op) -> NlmResult<Array2<F>>
where
    F: NlmFloat,
    Op: Fn(&mut F, F, usize),
{
    let (rows, cols) = input.dim();
    let mut output = try_zeros(rows + 1 - window, cols)?;
    output.fill(init);

    for (r, mut out_row) in output.rows_mut().into_iter().enumerate() {
        for tap in 0..window {
            Zip::from(&mut out_row)
                .and(&input.row(r + tap))
                .for_each(|acc, &v| op(acc, v, tap));
        }
    }

    Ok(output)
}

/// Separable convolution over a pre-padded plane.
///
/// `row_kernel` runs along columns (x), `col_kernel` along rows (y). The
/// output shrinks by `row_kernel.len() - 1` columns and
/// `col_kernel.len() - 1` rows.
pub fn convolve_separable_valid<F: NlmFloat>(
    padded: ArrayView2<F>,
    row_kernel: &[F],
    col_kernel: &[F],
) -> NlmResult<Array2<F>> {
    ensure_window(padded, row_kernel.len().max(col_kernel.len()))?;

    let horizontal = rows_valid(padded, row_kernel.len(), |win| {
        win.iter()
            .zip(row_kernel.iter())
            .fold(F::zero(), |acc, (&v, &k)| acc + v * k)
    })?;

    cols_valid(horizontal.view(), col_kernel.len(), F::zero(), |acc, v, tap| {
        *acc += v * col_kernel[tap]
    })
}

/// Gaussian blur with an explicit window radius, same-size output.
pub fn gaussian_blur<F: NlmFloat>(
    input: ArrayView2<F>,
    sigma: F,
    radius: usize,
) -> NlmResult<Array2<F>> {
    let kernel = gaussian_kernel_1d(sigma, radius);
    let padded = pad_replicate(input, radius)?;
    convolve_separable_valid(padded.view(), &kernel, &kernel)
}

/// Sum over a `(2r+1) x (2r+1)` box on a pre-padded plane.
pub fn box_sum_valid<F: NlmFloat>(padded: ArrayView2<F>, radius: usize) -> NlmResult<Array2<F>> {
    let ones = vec![F::one(); 2 * radius + 1];
    convolve_separable_valid(padded, &ones, &ones)
}

/// Mean over a `(2r+1) x (2r+1)` box, same-size output.
pub fn box_mean<F: NlmFloat>(input: ArrayView2<F>, radius: usize) -> NlmResult<Array2<F>> {
    let padded = pad_replicate(input, radius)?;
    let mut sums = box_sum_valid(padded.view(), radius)?;
    let inv_area = F::one() / F::usize_as((2 * radius + 1) * (2 * radius + 1));
    sums.mapv_inplace(|v| v * inv_area);
    Ok(sums)
}

/// 3x3 Sobel gradients over a pre-padded plane, returned as `(gx, gy)`.
///
/// `gx` is positive where intensity grows with the column index, `gy` where
/// it grows with the row index. Both outputs shrink by one sample per side.
pub fn sobel_valid<F: NlmFloat>(padded: ArrayView2<F>) -> NlmResult<(Array2<F>, Array2<F>)> {
    ensure_window(padded, 3)?;
    let (rows, cols) = padded.dim();
    let (out_rows, out_cols) = (rows - 2, cols - 2);

    let smooth: [F; 3] = SOBEL_SMOOTH.map(F::from_f64_c);
    let mut gx = try_zeros(out_rows, out_cols)?;
    let mut gy = try_zeros(out_rows, out_cols)?;

    for r in 0..out_rows {
        for c in 0..out_cols {
            let mut sx = F::zero();
            let mut sy = F::zero();
            for (i, &w) in smooth.iter().enumerate() {
                sx += w * (padded[[r + i, c + 2]] - padded[[r + i, c]]);
                sy += w * (padded[[r + 2, c + i]] - padded[[r, c + i]]);
            }
            gx[[r, c]] = sx;
            gy[[r, c]] = sy;
        }
    }

    Ok((gx, gy))
}

/// Scale-normalized Laplacian-of-Gaussian response magnitude, same-size
/// output.
///
/// The window radius follows `log_window_radius`. Second-derivative taps are
/// forced to zero sum so constant regions give no response.
pub fn laplacian_of_gaussian<F: NlmFloat>(input: ArrayView2<F>, sigma: F) -> NlmResult<Array2<F>> {
    let radius = log_window_radius(sigma);
    let gauss = gaussian_kernel_1d(sigma, radius);

    let sigma2 = sigma * sigma;
    let mut d2: Vec<F> = gauss
        .iter()
        .enumerate()
        .map(|(i, &g)| {
            let x = F::usize_as(i) - F::usize_as(radius);
            (x * x / sigma2 - F::one()) * g
        })
        .collect();
    let mean = d2.iter().copied().sum::<F>() / F::usize_as(d2.len());
    for v in d2.iter_mut() {
        *v -= mean;
    }

    let padded = pad_replicate(input, radius)?;
    let dxx = convolve_separable_valid(padded.view(), &d2, &gauss)?;
    let mut response = convolve_separable_valid(padded.view(), &gauss, &d2)?;
    Zip::from(&mut response)
        .and(&dxx)
        .for_each(|out, &xx| *out = (*out + xx).abs());

    Ok(response)
}

/// Maximum over a `(2r+1) x (2r+1)` box, same-size output.
pub fn max_filter<F: NlmFloat>(input: ArrayView2<F>, radius: usize) -> NlmResult<Array2<F>> {
    let window = 2 * radius + 1;
    let padded = pad_replicate(input, radius)?;
    let horizontal = rows_valid(padded.view(), window, |win| {
        win.iter().copied().fold(F::neg_infinity(), |a, b| a.max(b))
    })?;
    cols_valid(horizontal.view(), window, F::neg_infinity(), |acc, v, _| {
        *acc = acc.max(v)
    })
}

/// Local mean absolute deviation: for each pixel, the average of
/// `|x_q - mean(p)|` over the `(2r+1) x (2r+1)` window centered on `p`.
pub fn mean_abs_deviation<F: NlmFloat>(
    input: ArrayView2<F>,
    radius: usize,
) -> NlmResult<Array2<F>> {
    let (rows, cols) = input.dim();
    let window = 2 * radius + 1;
    let mean = box_mean(input, radius)?;
    let padded = pad_replicate(input, radius)?;
    let inv_area = F::one() / F::usize_as(window * window);

    let mut output = try_zeros(rows, cols)?;
    for r in 0..rows {
        for c in 0..cols {
            let mu = mean[[r, c]];
            let mut acc = F::zero();
            for i in 0..window {
                let row = padded.row(r + i);
                for j in 0..window {
                    acc += (row[c + j] - mu).abs();
                }
            }
            output[[r, c]] = acc * inv_area;
        }
    }

    Ok(output)
}

/// Zero out isolated weak responses: a pixel is cleared when the largest
/// value within its `(2r+1) x (2r+1)` neighborhood stays below `threshold`.
pub fn remove_isolated_bulbs<F: NlmFloat>(
    map: ArrayView2<F>,
    radius: usize,
    threshold: F,
) -> NlmResult<Array2<F>> {
    let mut peaks = max_filter(map, radius)?;
    Zip::from(&mut peaks).and(&map).for_each(|out, &v| {
        *out = if *out < threshold { F::zero() } else { v };
    });
    Ok(peaks)
}
