use crate::io::build_stamp::{BuildOutcome, BuildStamp};
use crate::io::raster_io::{GeoTiffOptions, RasterReader, RasterWriter};
use crate::types::{
    BoundingBox, GeoError, GeoRaster, GeoResult, GeoTransform, PixelType, RasterCube, RasterGrid,
    RasterHeader, Sample,
};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Overlap resolution rule when several inputs cover one output pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// First non-nodata value in input order wins
    #[default]
    First,
    /// Last non-nodata value in input order wins
    Last,
    Min,
    Max,
}

/// Mosaic configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicOptions {
    pub method: MergeMethod,
    /// Max relative deviation of an input's resolution from the finest one
    pub resolution_tolerance: f64,
    /// Output nodata; defaults to the first input's
    pub nodata: Option<f64>,
    pub geotiff: GeoTiffOptions,
}

impl Default for MosaicOptions {
    fn default() -> Self {
        Self {
            method: MergeMethod::First,
            resolution_tolerance: 0.05,
            nodata: None,
            geotiff: GeoTiffOptions::default(),
        }
    }
}

/// North-up grid covering every input at the finest input resolution
pub fn covering_grid(headers: &[RasterHeader], tolerance: f64) -> GeoResult<RasterGrid> {
    let first = headers
        .first()
        .ok_or_else(|| GeoError::InputMismatch("no rasters to merge".to_string()))?;

    for (i, header) in headers.iter().enumerate() {
        if header.grid.crs != first.grid.crs {
            return Err(GeoError::InputMismatch(format!(
                "input {} has CRS {} but input 0 has {}",
                i, header.grid.crs, first.grid.crs
            )));
        }
        if header.band_count != first.band_count {
            return Err(GeoError::InputMismatch(format!(
                "input {} has {} bands but input 0 has {}",
                i, header.band_count, first.band_count
            )));
        }
        if !header.grid.transform.is_north_up() {
            return Err(GeoError::GridComputation(format!(
                "input {} has a rotated transform {:?}",
                i,
                header.grid.transform.to_gdal()
            )));
        }
    }

    let (mut res_x, mut res_y) = first.grid.transform.resolution();
    for header in headers {
        let (rx, ry) = header.grid.transform.resolution();
        res_x = res_x.min(rx);
        res_y = res_y.min(ry);
    }
    if !(res_x > 0.0 && res_y > 0.0) {
        return Err(GeoError::GridComputation(format!(
            "invalid input resolution ({}, {})",
            res_x, res_y
        )));
    }

    for (i, header) in headers.iter().enumerate() {
        let (rx, ry) = header.grid.transform.resolution();
        let deviation = ((rx - res_x) / res_x).max((ry - res_y) / res_y);
        if deviation > tolerance {
            return Err(GeoError::InputMismatch(format!(
                "input {} resolution ({}, {}) deviates {:.1}% from finest ({}, {})",
                i,
                rx,
                ry,
                deviation * 100.0,
                res_x,
                res_y
            )));
        }
    }

    let bounds = headers
        .iter()
        .skip(1)
        .fold(first.grid.bounds(), |acc: BoundingBox, h| acc.union(&h.grid.bounds()));
    if !bounds.is_valid() {
        return Err(GeoError::GridComputation(format!("degenerate mosaic bounds {:?}", bounds)));
    }

    let width = ((bounds.width() / res_x).round() as usize).max(1);
    let height = ((bounds.height() / res_y).round() as usize).max(1);
    Ok(RasterGrid {
        width,
        height,
        transform: GeoTransform::north_up(bounds.min_x, bounds.max_y, res_x, res_y),
        crs: first.grid.crs.clone(),
    })
}

/// Output buffer that inputs are pasted onto one at a time
pub struct MosaicCanvas {
    grid: RasterGrid,
    data: RasterCube,
    filled: Array3<bool>,
    method: MergeMethod,
    nodata: Option<f64>,
}

impl MosaicCanvas {
    pub fn new(grid: RasterGrid, bands: usize, method: MergeMethod, nodata: Option<f64>) -> Self {
        let fill = nodata.unwrap_or(0.0);
        let shape = (bands, grid.height, grid.width);
        Self {
            grid,
            data: RasterCube::from_elem(shape, fill),
            filled: Array3::from_elem(shape, false),
            method,
            nodata,
        }
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    /// Paste every valid pixel of `raster` that falls on the canvas
    pub fn paste(&mut self, raster: &GeoRaster) -> GeoResult<()> {
        let (bands, height, width) = self.data.dim();
        if raster.band_count() != bands {
            return Err(GeoError::InputMismatch(format!(
                "raster has {} bands, mosaic has {}",
                raster.band_count(),
                bands
            )));
        }
        if raster.crs() != &self.grid.crs {
            return Err(GeoError::InputMismatch(format!(
                "raster CRS {} differs from mosaic CRS {}",
                raster.crs(),
                self.grid.crs
            )));
        }

        let canvas_inverse = self.grid.transform.inverse()?;
        let input_inverse = raster.transform().inverse()?;

        // Canvas pixels touched by the input footprint
        let footprint = raster.bounds();
        let (c0, r0) = canvas_inverse.world_to_pixel(footprint.min_x, footprint.max_y);
        let (c1, r1) = canvas_inverse.world_to_pixel(footprint.max_x, footprint.min_y);
        let col_start = c0.min(c1).floor().max(0.0) as usize;
        let col_end = (c0.max(c1).ceil().max(0.0) as usize).min(width);
        let row_start = r0.min(r1).floor().max(0.0) as usize;
        let row_end = (r0.max(r1).ceil().max(0.0) as usize).min(height);

        let data = raster.data();
        for row in row_start..row_end {
            for col in col_start..col_end {
                let (x, y) = self
                    .grid
                    .transform
                    .pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
                let (src_col, src_row) = input_inverse.world_to_pixel(x, y);
                if src_col < 0.0 || src_row < 0.0 {
                    continue;
                }
                let (src_col, src_row) = (src_col as usize, src_row as usize);
                if src_col >= raster.width() || src_row >= raster.height() {
                    continue;
                }
                for band in 0..bands {
                    let value = data[[band, src_row, src_col]];
                    if !raster.is_nodata(value) {
                        self.apply(band, row, col, value);
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, band: usize, row: usize, col: usize, value: Sample) {
        let idx = [band, row, col];
        let current = self.data[idx];
        let take = if !self.filled[idx] {
            true
        } else {
            match self.method {
                MergeMethod::First => false,
                MergeMethod::Last => true,
                MergeMethod::Min => value < current,
                MergeMethod::Max => value > current,
            }
        };
        if take {
            self.data[idx] = value;
            self.filled[idx] = true;
        }
    }

    /// Number of output samples that received at least one value
    pub fn filled_count(&self) -> usize {
        self.filled.iter().filter(|f| **f).count()
    }

    pub fn into_raster(self, pixel_type: PixelType) -> GeoResult<GeoRaster> {
        GeoRaster::new(
            self.data,
            self.grid.transform,
            self.grid.crs,
            self.nodata,
            pixel_type,
        )
    }
}

#[derive(Serialize)]
struct MosaicParams<'a> {
    method: MergeMethod,
    resolution_tolerance: f64,
    nodata: Option<f64>,
    geotiff: &'a GeoTiffOptions,
}

/// Merges aligned rasters of one logical coverage into a single raster
#[derive(Debug, Clone, Default)]
pub struct MosaicCompositor {
    options: MosaicOptions,
}

impl MosaicCompositor {
    pub fn new(options: MosaicOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MosaicOptions {
        &self.options
    }

    /// Merge in the given order; precedence follows `MergeMethod`
    pub fn merge(&self, rasters: &[GeoRaster]) -> GeoResult<GeoRaster> {
        let headers: Vec<RasterHeader> = rasters.iter().map(|r| r.header()).collect();
        let grid = covering_grid(&headers, self.options.resolution_tolerance)?;
        let first = &headers[0];
        log::info!(
            "Merging {} rasters onto {}x{} grid ({:?})",
            rasters.len(),
            grid.width,
            grid.height,
            self.options.method
        );

        let nodata = self.options.nodata.or(first.nodata);
        let mut canvas = MosaicCanvas::new(grid, first.band_count, self.options.method, nodata);
        for raster in rasters {
            canvas.paste(raster)?;
        }
        canvas.into_raster(first.pixel_type)
    }

    /// Stable-sort by a caller key (acquisition date, cloud score, ...) then merge
    pub fn merge_by_key<K, F>(&self, mut rasters: Vec<GeoRaster>, key: F) -> GeoResult<GeoRaster>
    where
        K: Ord,
        F: Fn(&GeoRaster) -> K,
    {
        rasters.sort_by(|a, b| key(a).cmp(&key(b)));
        self.merge(&rasters)
    }

    /// Merge files into a GeoTIFF, holding one input in memory at a time
    pub fn create_mosaic<P: AsRef<Path>>(&self, inputs: &[P], output: &Path) -> GeoResult<BuildOutcome> {
        if inputs.is_empty() {
            return Err(GeoError::InputMismatch(format!(
                "no inputs for mosaic {}",
                output.display()
            )));
        }
        let params = MosaicParams {
            method: self.options.method,
            resolution_tolerance: self.options.resolution_tolerance,
            nodata: self.options.nodata,
            geotiff: &self.options.geotiff,
        };
        let stamp = BuildStamp::new("mosaic", inputs, &params)?;
        stamp.run(output, || {
            log::info!("🧩 Creating mosaic {} from {} inputs", output.display(), inputs.len());
            let headers = inputs
                .iter()
                .map(RasterReader::read_header)
                .collect::<GeoResult<Vec<_>>>()?;
            let grid = covering_grid(&headers, self.options.resolution_tolerance)?;
            let first = &headers[0];
            let nodata = self.options.nodata.or(first.nodata);
            let mut canvas =
                MosaicCanvas::new(grid, first.band_count, self.options.method, nodata);

            for input in inputs {
                let raster = RasterReader::read(input)?;
                canvas.paste(&raster)?;
            }

            let mosaic = canvas.into_raster(first.pixel_type)?;
            RasterWriter::write(&mosaic, output, &self.options.geotiff)?;
            log::info!(
                "✅ Mosaic written: {}x{} -> {}",
                mosaic.width(),
                mosaic.height(),
                output.display()
            );
            Ok(())
        })
    }
}
