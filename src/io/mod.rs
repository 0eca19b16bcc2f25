//! Raster and metadata I/O

pub mod raster_io;
pub mod discovery;
pub mod manifest;
pub mod build_stamp;

pub use raster_io::{GeoTiffOptions, RasterReader, RasterWriter};
pub use discovery::{raw_scene_dir, sentinel2_default_bands, BandSpec, Granule, GranuleFinder};
pub use manifest::{ManifestEntry, PatchManifest};
pub use build_stamp::{BuildOutcome, BuildStamp};
