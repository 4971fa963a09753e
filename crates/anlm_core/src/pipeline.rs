//! Adaptive NLM entry points.
//!
//! Chains the stages for one plane:
//! structure (3x3, only with texture) -> sharpness -> texture -> sigma ->
//! patch average. The weight LUT and the sigma map are complete before the
//! row-parallel patch average starts.

use std::time::Instant;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut2, Axis};
use rayon::prelude::*;

use crate::config::AdaptiveNlmConfig;
use crate::error::{NlmError, NlmResult};
use crate::float_trait::NlmFloat;
use crate::lut::WeightLut;
use crate::patch_average::{patch_average, PAE_PADDING};
use crate::plane::{ensure_non_empty, ensure_same_dim, pad_replicate, try_zeros};
use crate::sharpness::fuse_sharpness;
use crate::sigma::synthesize_sigma;
use crate::structure::extract_structure_map_with_radius;
use crate::texture::{fuse_texture_weight, texture_weight, TEXTURE_TENSOR_RADIUS};

const PROFILE_TIMING_ENV: &str = "ANLM_PROFILE_TIMING";

fn resolve_profile_timing() -> bool {
    std::env::var(PROFILE_TIMING_ENV)
        .ok()
        .map(|value| parse_profile_flag(&value))
        .unwrap_or(false)
}

fn parse_profile_flag(value: &str) -> bool {
    let v = value.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

#[derive(Default, Clone, Copy)]
struct StageTimings {
    structure_ns: u128,
    sharpness_ns: u128,
    texture_ns: u128,
    sigma_ns: u128,
    nlm_ns: u128,
}

macro_rules! timed {
    ($enabled:expr, $acc:expr, $body:block) => {{
        if $enabled {
            let _t = Instant::now();
            let _ret = { $body };
            $acc += _t.elapsed().as_nanos();
            _ret
        } else {
            $body
        }
    }};
}

fn ms(ns: u128) -> f64 {
    ns as f64 / 1_000_000.0
}

fn profile_line(size: (usize, usize), timings: &StageTimings, total_ns: u128) -> String {
    format!(
        "anlm_profile size={}x{} structure_ms={:.3} sharpness_ms={:.3} texture_ms={:.3} sigma_ms={:.3} nlm_ms={:.3} total_ms={:.3}",
        size.0,
        size.1,
        ms(timings.structure_ns),
        ms(timings.sharpness_ns),
        ms(timings.texture_ns),
        ms(timings.sigma_ns),
        ms(timings.nlm_ns),
        ms(total_ns),
    )
}

/// Compute the per-pixel filtering strength the denoiser would use for `src`.
///
/// Runs the structure, sharpness, texture and sigma stages with the
/// parameters of `config`. Unlike [`adaptive_nlm_denoise`] this also runs
/// when `sigma_base == 0`, yielding a map of `SIGMA_EPSILON`.
pub fn compute_sigma_map<F: NlmFloat>(
    src: ArrayView2<F>,
    config: &AdaptiveNlmConfig<F>,
) -> NlmResult<Array2<F>> {
    config.validate()?;
    ensure_non_empty(src, "source")?;
    build_sigma_map(src, config, false, &mut StageTimings::default())
}

fn build_sigma_map<F: NlmFloat>(
    src: ArrayView2<F>,
    config: &AdaptiveNlmConfig<F>,
    profile: bool,
    timings: &mut StageTimings,
) -> NlmResult<Array2<F>> {
    let regularity = if config.texture_enabled() {
        Some(timed!(profile, timings.structure_ns, {
            let padded = pad_replicate(src, TEXTURE_TENSOR_RADIUS + 1)?;
            extract_structure_map_with_radius(padded.view(), TEXTURE_TENSOR_RADIUS)?.regularity
        }))
    } else {
        None
    };

    let mut weight = timed!(profile, timings.sharpness_ns, {
        fuse_sharpness(src, config.sensitivity, config.log_sigma)?
    });

    if let Some(regularity) = regularity {
        timed!(profile, timings.texture_ns, {
            let texture = texture_weight(regularity.view(), config.hvs_impact)?;
            fuse_texture_weight(&mut weight, texture.view())?;
        });
    }

    let sigma_map = timed!(profile, timings.sigma_ns, {
        synthesize_sigma(
            weight.view(),
            config.sigma_base,
            config.sensitivity,
            config.adapt_factor,
        )?
    });

    Ok(sigma_map)
}

/// Full chain for one validated, non-empty plane with `sigma_base > 0`.
fn denoise_plane<F: NlmFloat>(
    src: ArrayView2<F>,
    config: &AdaptiveNlmConfig<F>,
    profile: bool,
) -> NlmResult<Array2<F>> {
    let started = profile.then(Instant::now);
    let (denoised, timings) = run_stages(src, config, profile)?;
    if let Some(started) = started {
        log::info!(
            "{}",
            profile_line(src.dim(), &timings, started.elapsed().as_nanos())
        );
    }
    Ok(denoised)
}

/// Run every stage on one plane. Stage timings stay zero unless `profile`.
fn run_stages<F: NlmFloat>(
    src: ArrayView2<F>,
    config: &AdaptiveNlmConfig<F>,
    profile: bool,
) -> NlmResult<(Array2<F>, StageTimings)> {
    let mut timings = StageTimings::default();

    let sigma_map = build_sigma_map(src, config, profile, &mut timings)?;
    let lut = WeightLut::new(config.lut_granularity, config.lut_max_domain)?;
    log::debug!(
        "weight lut: {} entries, granularity {:?}, domain [0, {:?}], floor weight {:?}",
        lut.len(),
        lut.granularity(),
        lut.max_domain(),
        lut.floor_weight()
    );

    let denoised = timed!(profile, timings.nlm_ns, {
        let padded = pad_replicate(src, PAE_PADDING)?;
        patch_average(padded.view(), sigma_map.view(), &lut, config.kernel)?
    });

    Ok((denoised, timings))
}

/// Denoise a single-channel plane into `dst`.
///
/// # Arguments
/// * `src` - Source plane, 8-bit reference units; may be a strided view
/// * `dst` - Output plane of the same shape
/// * `config` - Tuning parameters
///
/// With `sigma_base == 0` the source is copied to `dst` unchanged.
pub fn adaptive_nlm_denoise<F: NlmFloat>(
    src: ArrayView2<F>,
    mut dst: ArrayViewMut2<F>,
    config: &AdaptiveNlmConfig<F>,
) -> NlmResult<()> {
    config.validate()?;
    ensure_non_empty(src, "source")?;
    ensure_same_dim(src.dim(), dst.dim(), "source", "destination")?;

    if config.is_pass_through() {
        dst.assign(&src);
        return Ok(());
    }

    log::debug!("adaptive nlm: {:?} plane, config {:?}", src.dim(), config);
    let denoised = denoise_plane(src, config, resolve_profile_timing())?;
    dst.assign(&denoised);
    Ok(())
}

/// Denoise a single-channel plane into a newly allocated one.
pub fn adaptive_nlm_denoise_owned<F: NlmFloat>(
    src: ArrayView2<F>,
    config: &AdaptiveNlmConfig<F>,
) -> NlmResult<Array2<F>> {
    let (rows, cols) = src.dim();
    let mut dst = try_zeros(rows, cols)?;
    adaptive_nlm_denoise(src, dst.view_mut(), config)?;
    Ok(dst)
}

/// Denoise a stack of independent single-channel frames (axis 0).
///
/// Frames are processed in parallel; each result equals a separate
/// [`adaptive_nlm_denoise`] call on that frame.
pub fn adaptive_nlm_denoise_stack<F: NlmFloat>(
    stack: ArrayView3<F>,
    config: &AdaptiveNlmConfig<F>,
) -> NlmResult<Array3<F>> {
    config.validate()?;
    let (frames, rows, cols) = stack.dim();
    if frames == 0 || rows == 0 || cols == 0 {
        return Err(NlmError::invalid(format!(
            "stack is empty (shape {:?})",
            (frames, rows, cols)
        )));
    }

    if config.is_pass_through() {
        return Ok(stack.to_owned());
    }

    log::debug!("adaptive nlm: stack of {} {}x{} frames", frames, rows, cols);
    let profile = resolve_profile_timing();
    let denoised = (0..frames)
        .into_par_iter()
        .map(|i| denoise_plane(stack.index_axis(Axis(0), i), config, profile))
        .collect::<NlmResult<Vec<_>>>()?;

    let views: Vec<_> = denoised.iter().map(|frame| frame.view()).collect();
    ndarray::stack(Axis(0), &views)
        .map_err(|e| NlmError::invalid(format!("failed to assemble stack: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch_average::PatchKernel;
    use crate::sigma::SIGMA_EPSILON;
    use crate::structure::{extract_structure_map, STRUCTURE_PADDING};
    use ndarray::s;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn random_image(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.gen::<f64>() * 255.0)
    }

    fn mse(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
        let diff = a - b;
        diff.mapv(|d| d * d).mean().unwrap()
    }

    #[test]
    fn test_zero_base_is_pass_through() {
        let src = random_image(20, 23, 1);
        let config = AdaptiveNlmConfig::new().with_sigma_base(0.0);
        let once = adaptive_nlm_denoise_owned(src.view(), &config).unwrap();
        assert_eq!(once, src);
        let twice = adaptive_nlm_denoise_owned(once.view(), &config).unwrap();
        assert_eq!(twice, src);
    }

    #[test]
    fn test_uniform_image_is_unchanged() {
        let src = Array2::from_elem((16, 20), 77.0f32);

        let padded = pad_replicate(src.view(), STRUCTURE_PADDING).unwrap();
        let maps = extract_structure_map(padded.view()).unwrap();
        assert!(maps.regularity.iter().all(|&v| v == 1.0));

        for hvs in [0.0f32, 0.5] {
            let config = AdaptiveNlmConfig::new().with_hvs_impact(hvs);
            let out = adaptive_nlm_denoise_owned(src.view(), &config).unwrap();
            assert_eq!(out, src);
        }
    }

    #[test]
    fn test_sigma_map_bounds() {
        let src = random_image(24, 30, 2);
        for (sens, hvs, adapt) in [(0.0, 0.0, 1.0), (0.25, 0.6, 0.5), (0.8, -0.4, 1.0)] {
            let config = AdaptiveNlmConfig::new()
                .with_sensitivity(sens)
                .with_hvs_impact(hvs)
                .with_adapt_factor(adapt)
                .with_sigma_base(20.0);
            let sigma = compute_sigma_map(src.view(), &config).unwrap();
            assert_eq!(sigma.dim(), src.dim());
            let lo = sens * 20.0 + SIGMA_EPSILON;
            let hi = 20.0 + SIGMA_EPSILON;
            assert!(sigma.iter().all(|&s| s >= lo - 1e-9 && s <= hi + 1e-9));
        }
    }

    #[test]
    fn test_sigma_map_monotone_in_sensitivity() {
        let src = random_image(18, 18, 3);
        for hvs in [0.0, 0.4] {
            let sweep = |sens: f64| {
                let config = AdaptiveNlmConfig::new()
                    .with_sigma_base(15.0)
                    .with_hvs_impact(hvs)
                    .with_sensitivity(sens);
                compute_sigma_map(src.view(), &config).unwrap()
            };
            let mut prev = sweep(0.0);
            for step in 1..=10 {
                let next = sweep((step as f64 * 0.1).min(1.0));
                for (a, b) in prev.iter().zip(next.iter()) {
                    assert!(*b >= *a - 1e-9, "hvs {} step {}: {} -> {}", hvs, step, a, b);
                }
                prev = next;
            }
        }
    }

    #[test]
    fn test_non_integer_uniform_image_is_unchanged() {
        for value in [0.1f64, 123.456, 1.0 / 3.0, 254.9, 17.3] {
            let src = Array2::from_elem((16, 16), value);
            for kernel in [PatchKernel::Scalar, PatchKernel::Lanes] {
                let config = AdaptiveNlmConfig::new().with_kernel(kernel);
                let out = adaptive_nlm_denoise_owned(src.view(), &config).unwrap();
                assert_eq!(out, src, "{} {:?}", value, kernel);

                let src32 = src.mapv(|v| v as f32);
                let config32 = AdaptiveNlmConfig::<f32>::new().with_kernel(kernel);
                let out32 = adaptive_nlm_denoise_owned(src32.view(), &config32).unwrap();
                assert_eq!(out32, src32, "{} {:?}", value, kernel);
            }
        }
    }

    #[test]
    fn test_outlier_pulled_towards_background() {
        let mut src = Array2::from_elem((11, 11), 100.0f64);
        src[[5, 5]] = 200.0;
        let config = AdaptiveNlmConfig::new()
            .with_sensitivity(0.0)
            .with_sigma_base(2.0);
        let out = adaptive_nlm_denoise_owned(src.view(), &config).unwrap();

        // Every patch distance saturates the table, so all 120 neighbors and
        // the re-added center share the floor weight.
        let expected = (120.0 * 100.0 + 200.0) / 121.0;
        assert!((out[[5, 5]] - expected).abs() < 1e-9, "{}", out[[5, 5]]);
        assert!(out[[5, 5]] < 110.0);
    }

    #[test]
    fn test_scalar_and_lanes_kernels_agree() {
        let mut rng = StdRng::seed_from_u64(4);
        let src = Array2::from_shape_fn((21, 26), |_| rng.gen::<f32>() * 255.0);
        let config = AdaptiveNlmConfig::new()
            .with_sigma_base(60.0f32)
            .with_hvs_impact(0.3);
        let scalar =
            adaptive_nlm_denoise_owned(src.view(), &config.clone().with_kernel(PatchKernel::Scalar))
                .unwrap();
        let lanes =
            adaptive_nlm_denoise_owned(src.view(), &config.with_kernel(PatchKernel::Lanes)).unwrap();
        for (a, b) in scalar.iter().zip(lanes.iter()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_reduces_gaussian_noise() {
        let clean = Array2::from_shape_fn((48, 48), |(r, c)| {
            if c < 24 {
                80.0 + r as f64 * 0.5
            } else {
                180.0
            }
        });
        let mut rng = StdRng::seed_from_u64(5);
        let normal = Normal::new(0.0, 5.0).unwrap();
        let noisy = clean.mapv(|v| v + normal.sample(&mut rng));

        let config = AdaptiveNlmConfig::new().with_sigma_base(40.0);
        let out = adaptive_nlm_denoise_owned(noisy.view(), &config).unwrap();

        let before = mse(&noisy, &clean);
        let after = mse(&out, &clean);
        assert!(after < 0.5 * before, "mse {} -> {}", before, after);
    }

    #[test]
    fn test_stack_matches_per_frame() {
        let frames: Vec<Array2<f64>> = (0..3).map(|i| random_image(14, 17, 10 + i)).collect();
        let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
        let stack = ndarray::stack(Axis(0), &views).unwrap();

        let config = AdaptiveNlmConfig::new()
            .with_sigma_base(25.0)
            .with_hvs_impact(-0.5);
        let out = adaptive_nlm_denoise_stack(stack.view(), &config).unwrap();
        assert_eq!(out.dim(), (3, 14, 17));
        for (i, frame) in frames.iter().enumerate() {
            let single = adaptive_nlm_denoise_owned(frame.view(), &config).unwrap();
            assert_eq!(out.index_axis(Axis(0), i), single);
        }

        let passthrough =
            adaptive_nlm_denoise_stack(stack.view(), &config.with_sigma_base(0.0)).unwrap();
        assert_eq!(passthrough, stack);
    }

    #[test]
    fn test_strided_source_matches_contiguous() {
        let wide = random_image(16, 24, 6);
        let view = wide.slice(s![.., 3..21]);
        let contiguous = view.to_owned();
        let config = AdaptiveNlmConfig::new()
            .with_sigma_base(30.0)
            .with_hvs_impact(0.5);
        let a = adaptive_nlm_denoise_owned(view, &config).unwrap();
        let b = adaptive_nlm_denoise_owned(contiguous.view(), &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_writes_into_destination_view() {
        let src = random_image(12, 12, 7);
        let config = AdaptiveNlmConfig::new().with_sigma_base(20.0);
        let expected = adaptive_nlm_denoise_owned(src.view(), &config).unwrap();

        let mut canvas = Array2::<f64>::zeros((14, 16));
        adaptive_nlm_denoise(src.view(), canvas.slice_mut(s![1..13, 2..14]), &config).unwrap();
        assert_eq!(canvas.slice(s![1..13, 2..14]), expected);
        assert_eq!(canvas[[0, 0]], 0.0);
    }

    fn stage_sum_ns(t: &StageTimings) -> u128 {
        t.structure_ns + t.sharpness_ns + t.texture_ns + t.sigma_ns + t.nlm_ns
    }

    #[test]
    fn test_parse_profile_flag() {
        for on in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(parse_profile_flag(on), "{:?}", on);
        }
        for off in ["", "0", "false", "off", "2"] {
            assert!(!parse_profile_flag(off), "{:?}", off);
        }
    }

    #[test]
    fn test_profile_line_format() {
        let timings = StageTimings {
            structure_ns: 1_500_000,
            sharpness_ns: 2_000_000,
            texture_ns: 250_000,
            sigma_ns: 1_000,
            nlm_ns: 40_000_000,
        };
        assert_eq!(
            profile_line((480, 640), &timings, 45_000_000),
            "anlm_profile size=480x640 structure_ms=1.500 sharpness_ms=2.000 texture_ms=0.250 sigma_ms=0.001 nlm_ms=40.000 total_ms=45.000"
        );
    }

    #[test]
    fn test_stage_timings_recorded_when_profiling() {
        let src = random_image(24, 24, 8);
        let config = AdaptiveNlmConfig::new().with_hvs_impact(0.2);

        let started = Instant::now();
        let (profiled, timings) = run_stages(src.view(), &config, true).unwrap();
        let total_ns = started.elapsed().as_nanos();
        assert!(timings.structure_ns > 0);
        assert!(timings.sharpness_ns > 0);
        assert!(timings.nlm_ns > 0);
        assert!(stage_sum_ns(&timings) <= total_ns);

        let (plain, idle) = run_stages(src.view(), &config, false).unwrap();
        assert_eq!(stage_sum_ns(&idle), 0);
        assert_eq!(plain, profiled);
    }

    #[test]
    fn test_invalid_arguments() {
        let src = random_image(12, 12, 9);
        let config = AdaptiveNlmConfig::new();

        let negative = config.clone().with_sigma_base(-1.0);
        assert!(matches!(
            adaptive_nlm_denoise_owned(src.view(), &negative),
            Err(NlmError::InvalidArgument(_))
        ));
        assert!(adaptive_nlm_denoise_owned(src.view(), &config.clone().with_sensitivity(1.5)).is_err());
        assert!(adaptive_nlm_denoise_owned(src.view(), &config.clone().with_hvs_impact(2.0)).is_err());
        assert!(
            adaptive_nlm_denoise_owned(src.view(), &config.clone().with_adapt_factor(-0.1)).is_err()
        );

        let mut dst = Array2::<f64>::zeros((12, 11));
        assert!(adaptive_nlm_denoise(src.view(), dst.view_mut(), &config).is_err());

        let empty = Array2::<f64>::zeros((0, 12));
        assert!(adaptive_nlm_denoise_owned(empty.view(), &config).is_err());
        assert!(compute_sigma_map(empty.view(), &config).is_err());

        let empty_stack = ndarray::Array3::<f64>::zeros((0, 4, 4));
        assert!(adaptive_nlm_denoise_stack(empty_stack.view(), &config).is_err());
    }
}
