//! Core raster pipeline stages

pub mod reproject;
pub mod mosaic;
pub mod stack;
pub mod patches;
pub mod stitch;
pub mod inference;

// Re-export main types
pub use reproject::{Aligner, CoordinateTransformer, Resampling};
pub use mosaic::{covering_grid, MergeMethod, MosaicCanvas, MosaicCompositor, MosaicOptions};
pub use stack::BandStacker;
pub use patches::{PatchExtractor, PatchOptions, TilingPlan};
pub use stitch::{fallback_advice, StitchOptions, StitchReport, StitchStrategy, Stitcher};
pub use inference::{InferenceModel, InferenceRunner, LabelArray, PatchImage};
