//! Tuning parameters of the adaptive denoiser.

use crate::error::{NlmError, NlmResult};
use crate::float_trait::NlmFloat;
use crate::lut::{DEFAULT_LUT_GRANULARITY, DEFAULT_LUT_MAX_DOMAIN};
use crate::patch_average::PatchKernel;
use crate::sigma::check_sigma_params;
use crate::texture::check_hvs_impact;

// =============================================================================
// Constants
// =============================================================================

/// Default lower edge of the sharpness sensitivity band
const DEFAULT_SENSITIVITY: f64 = 0.25;

/// Default texture remap (identity, texture stage disabled)
const DEFAULT_HVS_IMPACT: f64 = 0.0;

/// Default adaptivity (fully driven by the weight map)
const DEFAULT_ADAPT_FACTOR: f64 = 1.0;

/// Default base filtering strength, in 8-bit units
const DEFAULT_SIGMA_BASE: f64 = 12.0;

/// Default Gaussian scale of the LoG sharpness response
const DEFAULT_LOG_SIGMA: f64 = 1.5;

// =============================================================================
// Types
// =============================================================================

/// Configuration for adaptive NLM denoising.
///
/// Use `Default::default()` for standard settings and the `with_*` setters
/// to adjust the tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveNlmConfig<F: NlmFloat> {
    /// Lower edge of the sharpness band, in `[0, 1]`. Also scales the sigma
    /// floor. Default: 0.25
    pub sensitivity: F,
    /// Texture remap in `[-1, 1]`; `0` skips the texture stage. Default: 0.0
    pub hvs_impact: F,
    /// How much the weight map modulates sigma, in `[0, 1]`. Default: 1.0
    pub adapt_factor: F,
    /// Base filtering strength, `>= 0`; `0` passes the source through.
    /// Default: 12.0
    pub sigma_base: F,
    /// Gaussian scale of the LoG response. Default: 1.5
    pub log_sigma: F,
    /// LUT entries per unit of `SSD / sigma^2`. Default: 64
    pub lut_granularity: usize,
    /// Upper end of the tabulated LUT domain. Default: 30.0
    pub lut_max_domain: F,
    /// Patch-distance kernel. Default: `PatchKernel::Lanes`
    pub kernel: PatchKernel,
}

impl<F: NlmFloat> Default for AdaptiveNlmConfig<F> {
    fn default() -> Self {
        Self {
            sensitivity: F::from_f64_c(DEFAULT_SENSITIVITY),
            hvs_impact: F::from_f64_c(DEFAULT_HVS_IMPACT),
            adapt_factor: F::from_f64_c(DEFAULT_ADAPT_FACTOR),
            sigma_base: F::from_f64_c(DEFAULT_SIGMA_BASE),
            log_sigma: F::from_f64_c(DEFAULT_LOG_SIGMA),
            lut_granularity: DEFAULT_LUT_GRANULARITY,
            lut_max_domain: F::from_f64_c(DEFAULT_LUT_MAX_DOMAIN),
            kernel: PatchKernel::default(),
        }
    }
}

impl<F: NlmFloat> AdaptiveNlmConfig<F> {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensitivity(mut self, sensitivity: F) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    pub fn with_hvs_impact(mut self, hvs_impact: F) -> Self {
        self.hvs_impact = hvs_impact;
        self
    }

    pub fn with_adapt_factor(mut self, adapt_factor: F) -> Self {
        self.adapt_factor = adapt_factor;
        self
    }

    pub fn with_sigma_base(mut self, sigma_base: F) -> Self {
        self.sigma_base = sigma_base;
        self
    }

    pub fn with_kernel(mut self, kernel: PatchKernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// True when `sigma_base` disables filtering altogether.
    pub fn is_pass_through(&self) -> bool {
        self.sigma_base == F::zero()
    }

    /// True when the texture stage participates in the weight map.
    pub fn texture_enabled(&self) -> bool {
        self.hvs_impact != F::zero()
    }

    /// Validate the configuration parameters, reporting the first bad field.
    pub fn validate(&self) -> NlmResult<()> {
        check_sigma_params(self.sigma_base, self.sensitivity, self.adapt_factor)?;
        check_hvs_impact(self.hvs_impact)?;
        if !(self.log_sigma > F::zero()) || !self.log_sigma.is_finite() {
            return Err(NlmError::invalid(format!(
                "log_sigma must be > 0, got {:?}",
                self.log_sigma
            )));
        }
        if self.lut_granularity == 0 {
            return Err(NlmError::invalid("lut_granularity must be > 0"));
        }
        if !(self.lut_max_domain > F::zero()) || !self.lut_max_domain.is_finite() {
            return Err(NlmError::invalid(format!(
                "lut_max_domain must be > 0, got {:?}",
                self.lut_max_domain
            )));
        }
        Ok(())
    }
}
