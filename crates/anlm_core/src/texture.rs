//! Texture weighting.
//!
//! Turns a fine-scale regularity map (3x3 tensor window, see
//! [`TEXTURE_TENSOR_RADIUS`]) into a texture likelihood, remaps it according
//! to `hvs_impact` and folds it into the sharpness map by pointwise minimum.
//! Only active when `hvs_impact != 0`.

use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{NlmError, NlmResult};
use crate::filters::max_filter;
use crate::float_trait::NlmFloat;
use crate::plane::{ensure_non_empty, ensure_same_dim};

/// Tensor window radius used for the texture regularity (3x3).
pub const TEXTURE_TENSOR_RADIUS: usize = 1;

/// Radius of the local maximum filter applied to the regularity (5x5).
const TEXTURE_MAX_RADIUS: usize = 2;

/// Upper clamp of the inverted regularity before normalization.
const TEXTURE_CLAMP: f64 = 0.5;

/// Derive the remapped texture-likelihood map from a regularity map.
///
/// The regularity is dilated with a 5x5 maximum filter, inverted, clamped to
/// `[0, 0.5]` and stretched to `[0, 1]` before [`remap_texture`].
pub fn texture_weight<F: NlmFloat>(
    regularity: ArrayView2<F>,
    hvs_impact: F,
) -> NlmResult<Array2<F>> {
    ensure_non_empty(regularity, "regularity map")?;
    check_hvs_impact(hvs_impact)?;

    let mut texture = max_filter(regularity, TEXTURE_MAX_RADIUS)?;
    let clamp = F::from_f64_c(TEXTURE_CLAMP);
    texture.mapv_inplace(|reg| {
        let t = (F::one() - reg).max(F::zero()).min(clamp) / clamp;
        remap_texture(t, hvs_impact)
    });

    Ok(texture)
}

/// Fold a texture map into the sharpness map by pointwise minimum.
pub fn fuse_texture_weight<F: NlmFloat>(
    sharpness: &mut Array2<F>,
    texture: ArrayView2<F>,
) -> NlmResult<()> {
    ensure_same_dim(sharpness.dim(), texture.dim(), "sharpness", "texture")?;
    Zip::from(sharpness)
        .and(&texture)
        .for_each(|s, &t| *s = s.min(t));
    Ok(())
}

/// Piecewise-linear remap of a texture likelihood `t` in `[0, 1]`.
///
/// Anchor curves at `hvs_impact` = -1, -0.5, 0, 0.5, 1 are `0`,
/// `max(0, 2t - 1)`, `t`, `min(1, 2t)` and `1`; between anchors the result
/// is interpolated linearly in `hvs_impact`.
pub fn remap_texture<F: NlmFloat>(t: F, hvs_impact: F) -> F {
    let half = F::from_f64_c(0.5);
    let two = F::from_f64_c(2.0);
    let h = hvs_impact.max(-F::one()).min(F::one());

    let anchor = |index: usize| -> F {
        match index {
            0 => F::zero(),
            1 => (two * t - F::one()).max(F::zero()),
            2 => t,
            3 => (two * t).min(F::one()),
            _ => F::one(),
        }
    };

    // Position on the [-1, 1] axis in half-unit segments
    let pos = (h + F::one()) / half;
    let segment = pos.floor().to_usize().unwrap_or(0).min(3);
    let frac = pos - F::usize_as(segment);

    let lo = anchor(segment);
    let hi = anchor(segment + 1);
    (lo + (hi - lo) * frac).max(F::zero()).min(F::one())
}

pub(crate) fn check_hvs_impact<F: NlmFloat>(hvs_impact: F) -> NlmResult<()> {
    if !(hvs_impact >= -F::one() && hvs_impact <= F::one()) {
        return Err(NlmError::invalid(format!(
            "hvs_impact must be in [-1, 1], got {:?}",
            hvs_impact
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::pad_replicate;
    use crate::structure::extract_structure_map_with_radius;

    fn fine_regularity(src: &Array2<f64>) -> Array2<f64> {
        let padded = pad_replicate(src.view(), TEXTURE_TENSOR_RADIUS + 1).unwrap();
        extract_structure_map_with_radius(padded.view(), TEXTURE_TENSOR_RADIUS)
            .unwrap()
            .regularity
    }

    #[test]
    fn test_remap_identity_at_zero() {
        for t in [0.0f64, 0.1, 0.5, 0.77, 1.0] {
            assert!((remap_texture(t, 0.0) - t).abs() < 1e-12);
        }
    }

    #[test]
    fn test_remap_extremes() {
        for t in [0.0f64, 0.3, 1.0] {
            assert_eq!(remap_texture(t, -1.0), 0.0);
            assert_eq!(remap_texture(t, 1.0), 1.0);
        }
    }

    #[test]
    fn test_remap_anchor_curves() {
        assert!((remap_texture(0.75f64, -0.5) - 0.5).abs() < 1e-12);
        assert_eq!(remap_texture(0.25f64, -0.5), 0.0);
        assert!((remap_texture(0.25f64, 0.5) - 0.5).abs() < 1e-12);
        assert_eq!(remap_texture(0.75f64, 0.5), 1.0);
    }

    #[test]
    fn test_remap_interpolates_between_anchors() {
        // Midway between identity (0.6) and min(1, 2t) (1.0)
        assert!((remap_texture(0.6f64, 0.25) - 0.8).abs() < 1e-12);
        // Midway between 0 and max(0, 2t - 1) = 0.6
        assert!((remap_texture(0.8f64, -0.75) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_remap_monotone_in_hvs_impact() {
        for t in [0.0f64, 0.2, 0.5, 0.9, 1.0] {
            let mut prev = -1.0;
            for i in 0..=40 {
                let h = -1.0 + i as f64 * 0.05;
                let v = remap_texture(t, h);
                assert!(v >= prev - 1e-12, "t={} h={}", t, h);
                prev = v;
            }
        }
    }

    #[test]
    fn test_texture_weight_uniform_image() {
        // Flat neighborhoods are fully regular -> zero texture likelihood
        let src = Array2::from_elem((12, 12), 90.0f64);
        let regularity = fine_regularity(&src);
        let tex = texture_weight(regularity.view(), 0.5).unwrap();
        assert!(tex.iter().all(|&v| v == 0.0));
        let tex = texture_weight(regularity.view(), 1.0).unwrap();
        assert!(tex.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_texture_weight_range() {
        let src = Array2::from_shape_fn((15, 17), |(r, c)| ((r * 31 + c * 17) % 13) as f64 * 0.1);
        let regularity = fine_regularity(&src);
        for h in [-1.0, -0.3, 0.4, 1.0] {
            let tex = texture_weight(regularity.view(), h).unwrap();
            assert_eq!(tex.dim(), (15, 17));
            assert!(tex.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn test_texture_weight_dilates_regularity() {
        // One fully regular pixel suppresses texture in its 5x5 neighborhood
        let mut regularity = Array2::from_elem((9, 9), 0.0f64);
        regularity[[4, 4]] = 1.0;
        let tex = texture_weight(regularity.view(), 0.0).unwrap();
        assert_eq!(tex[[2, 2]], 0.0);
        assert_eq!(tex[[6, 6]], 0.0);
        assert_eq!(tex[[1, 4]], 1.0);
        assert_eq!(tex[[0, 0]], 1.0);
    }

    #[test]
    fn test_fuse_texture_weight_takes_minimum() {
        let mut sharp = Array2::from_shape_vec((1, 3), vec![0.2f32, 0.8, 0.5]).unwrap();
        let tex = Array2::from_shape_vec((1, 3), vec![0.5f32, 0.1, 0.5]).unwrap();
        fuse_texture_weight(&mut sharp, tex.view()).unwrap();
        assert_eq!(sharp.as_slice().unwrap(), &[0.2, 0.1, 0.5]);
    }

    #[test]
    fn test_fuse_texture_weight_shape_mismatch() {
        let mut sharp = Array2::<f32>::zeros((2, 3));
        let tex = Array2::<f32>::zeros((3, 2));
        assert!(fuse_texture_weight(&mut sharp, tex.view()).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_hvs_impact() {
        let regularity = Array2::from_elem((6, 6), 1.0f32);
        assert!(texture_weight(regularity.view(), 1.5).is_err());
        assert!(texture_weight(regularity.view(), f32::NAN).is_err());
    }
}
