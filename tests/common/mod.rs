#![allow(dead_code)]

use geopatch::io::raster_io::{GeoTiffOptions, RasterWriter};
use geopatch::types::{Crs, GeoRaster, GeoTransform, PixelType, RasterCube};
use std::path::Path;

pub const UTM_18N: u32 = 32618;

/// Multi-band raster whose samples encode (band, row, col)
pub fn ramp_raster(
    width: usize,
    height: usize,
    bands: usize,
    origin: (f64, f64),
    resolution: f64,
) -> GeoRaster {
    let data = RasterCube::from_shape_fn((bands, height, width), |(b, r, c)| {
        (b * 100_000 + r * width + c) as f64
    });
    GeoRaster::new(
        data,
        GeoTransform::north_up(origin.0, origin.1, resolution, resolution),
        Crs::Epsg(UTM_18N),
        None,
        PixelType::F32,
    )
    .unwrap()
}

/// Single-band raster filled with one value
pub fn constant_raster(
    width: usize,
    height: usize,
    value: f64,
    origin: (f64, f64),
    resolution: f64,
    nodata: Option<f64>,
) -> GeoRaster {
    GeoRaster::new(
        RasterCube::from_elem((1, height, width), value),
        GeoTransform::north_up(origin.0, origin.1, resolution, resolution),
        Crs::Epsg(UTM_18N),
        nodata,
        PixelType::F32,
    )
    .unwrap()
}

pub fn write(raster: &GeoRaster, path: &Path) {
    RasterWriter::write(raster, path, &GeoTiffOptions::default()).unwrap();
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
