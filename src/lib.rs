//! geopatch: raster alignment, mosaicking and patch tiling for tile-based inference
//!
//! Raw per-band scene granules are reprojected onto one grid, mosaicked per
//! band, stacked into a multispectral composite and cut into fixed-size
//! georeferenced patches. After inference the per-patch predictions are
//! stitched back into a single mosaic.

pub mod types;
pub mod io;
pub mod core;
pub mod config;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use crate::types::{
    BandWindow, BoundingBox, Crs, GeoError, GeoRaster, GeoResult, GeoTransform, PixelType,
    RasterGrid, RasterHeader,
};

pub use crate::io::{BuildOutcome, GeoTiffOptions, GranuleFinder, PatchManifest, RasterReader, RasterWriter};
pub use crate::core::{
    Aligner, BandStacker, InferenceModel, InferenceRunner, MergeMethod, MosaicCompositor,
    PatchExtractor, PatchOptions, Resampling, StitchOptions, Stitcher,
};
pub use crate::config::PipelineConfig;
pub use crate::pipeline::{ScenePipeline, StitchOutcome};
