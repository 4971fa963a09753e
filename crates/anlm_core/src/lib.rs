//! Adaptive NLM Core Library
//!
//! Structure-adaptive non-local means denoising for single-channel float
//! planes. A per-pixel filtering strength is derived from local structure
//! (structure-tensor anisotropy), sharpness (LoG and mean absolute deviation
//! normalized by luminance) and optionally texture, then drives a 5x5-patch,
//! 11x11-search NLM average with a quantized exponential weight table.
//!
//! Planes are `ndarray` 2D arrays in 8-bit reference units (`[0, 255]`).

pub mod config;
pub mod error;
pub mod filters;
pub mod float_trait;
pub mod lut;
pub mod patch_average;
pub mod pipeline;
pub mod plane;
pub mod sharpness;
pub mod sigma;
pub mod structure;
pub mod texture;

// Re-export commonly used types at the crate root
pub use config::AdaptiveNlmConfig;
pub use error::{NlmError, NlmResult};
pub use float_trait::NlmFloat;
pub use lut::WeightLut;
pub use patch_average::{patch_average, PatchKernel, PAE_PADDING};
pub use pipeline::{
    adaptive_nlm_denoise, adaptive_nlm_denoise_owned, adaptive_nlm_denoise_stack,
    compute_sigma_map,
};
pub use plane::pad_replicate;
pub use sharpness::fuse_sharpness;
pub use sigma::synthesize_sigma;
pub use structure::{
    extract_structure_map, extract_structure_map_with_radius, StructureMaps, STRUCTURE_PADDING,
};
pub use texture::{fuse_texture_weight, texture_weight};
