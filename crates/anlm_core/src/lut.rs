//! Quantized `exp(-x)` lookup table for patch weights.

use crate::error::{NlmError, NlmResult};
use crate::float_trait::NlmFloat;

/// Default number of table entries per unit of `x`.
pub const DEFAULT_LUT_GRANULARITY: usize = 64;

/// Default upper end of the tabulated domain.
pub const DEFAULT_LUT_MAX_DOMAIN: f64 = 30.0;

/// Monotone-decreasing table of `exp(-i / granularity)`.
///
/// Built once per denoising call and shared read-only by every row worker.
/// Arguments beyond the tabulated domain saturate to the last (smallest,
/// still positive) entry.
#[derive(Debug, Clone)]
pub struct WeightLut<F: NlmFloat> {
    granularity: F,
    max_domain: F,
    values: Vec<F>,
}

impl<F: NlmFloat> WeightLut<F> {
    /// Tabulate `exp(-x)` for `x` in `[0, max_domain]` with `granularity`
    /// entries per unit.
    pub fn new(granularity: usize, max_domain: F) -> NlmResult<Self> {
        if granularity == 0 {
            return Err(NlmError::invalid("lut_granularity must be > 0"));
        }
        if !(max_domain > F::zero()) || !max_domain.is_finite() {
            return Err(NlmError::invalid(format!(
                "lut_max_domain must be > 0, got {:?}",
                max_domain
            )));
        }

        let g = F::usize_as(granularity);
        let len = (max_domain * g)
            .ceil()
            .to_usize()
            .ok_or_else(|| NlmError::invalid("lut_max_domain is too large"))?
            + 1;

        let mut values = Vec::new();
        values
            .try_reserve_exact(len)
            .map_err(|_| NlmError::AllocationFailure { rows: 1, cols: len })?;
        values.extend((0..len).map(|i| (-(F::usize_as(i) / g)).exp()));

        Ok(Self {
            granularity: g,
            max_domain,
            values,
        })
    }

    /// Weight for a non-negative argument `x`: entry `round(x * granularity)`,
    /// saturated at the last entry.
    #[inline(always)]
    pub fn lookup(&self, x: F) -> F {
        let last = self.values.len() - 1;
        let idx = (x * self.granularity).round().to_usize().unwrap_or(last).min(last);
        self.values[idx]
    }

    /// Entries per unit of the argument.
    pub fn granularity(&self) -> F {
        self.granularity
    }

    pub fn max_domain(&self) -> F {
        self.max_domain
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The smallest weight the table can return.
    pub fn floor_weight(&self) -> F {
        self.values[self.values.len() - 1]
    }
}
