use crate::io::build_stamp::{BuildOutcome, BuildStamp};
use crate::io::raster_io::{spatial_ref_for, GeoTiffOptions, RasterReader, RasterWriter};
use crate::types::{
    is_nodata, BoundingBox, Crs, GeoError, GeoRaster, GeoResult, GeoTransform, RasterCube,
    RasterGrid, Sample,
};
use gdal::spatial_ref::CoordTransform;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Resampling kernel used when warping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    /// Categorical data (labels, masks)
    Nearest,
    /// Continuous reflectance bands
    #[default]
    Bilinear,
    /// Keys cubic convolution, a = -0.5
    Cubic,
}

/// In-place coordinate conversion between two CRSs
pub trait CoordinateTransformer {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> GeoResult<()>;
}

/// Source and target CRS are the same
pub struct IdentityTransformer;

impl CoordinateTransformer for IdentityTransformer {
    fn transform(&self, _xs: &mut [f64], _ys: &mut [f64]) -> GeoResult<()> {
        Ok(())
    }
}

/// OGR coordinate transformation
pub struct GdalTransformer {
    inner: CoordTransform,
}

impl GdalTransformer {
    pub fn new(from: &Crs, to: &Crs) -> GeoResult<Self> {
        let unknown = |crs: &Crs, e: GeoError| {
            GeoError::GridComputation(format!("cannot interpret CRS {}: {}", crs, e))
        };
        let source = spatial_ref_for(from).map_err(|e| unknown(from, e))?;
        let target = spatial_ref_for(to).map_err(|e| unknown(to, e))?;
        let inner = CoordTransform::new(&source, &target).map_err(|e| {
            GeoError::GridComputation(format!("cannot transform {} -> {}: {}", from, to, e))
        })?;
        Ok(Self { inner })
    }
}

impl CoordinateTransformer for GdalTransformer {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> GeoResult<()> {
        let mut zs = vec![0.0_f64; xs.len()];
        self.inner
            .transform_coords(xs, ys, &mut zs)
            .map_err(|e| GeoError::GridComputation(format!("coordinate transform failed: {}", e)))
    }
}

/// Transformer for `from` -> `to`, identity when they are equal
pub fn transformer_between(from: &Crs, to: &Crs) -> GeoResult<Box<dyn CoordinateTransformer>> {
    if from == to {
        Ok(Box::new(IdentityTransformer))
    } else {
        Ok(Box::new(GdalTransformer::new(from, to)?))
    }
}

/// Reprojects rasters onto a canonical CRS or onto a reference grid
#[derive(Debug, Clone)]
pub struct Aligner {
    /// Fixed output pixel size in target CRS units; inferred when None
    target_resolution: Option<f64>,
    /// Points sampled along each source edge when projecting bounds
    edge_samples: usize,
    /// Nodata marker for pixels outside the source footprint when the source has none
    fill_nodata: f64,
    geotiff: GeoTiffOptions,
}

impl Default for Aligner {
    fn default() -> Self {
        Self {
            target_resolution: None,
            edge_samples: 21,
            fill_nodata: 0.0,
            geotiff: GeoTiffOptions::default(),
        }
    }
}

#[derive(Serialize)]
struct ReprojectParams<'a> {
    target: String,
    resampling: Resampling,
    target_resolution: Option<f64>,
    fill_nodata: f64,
    geotiff: &'a GeoTiffOptions,
}

impl Aligner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolution(mut self, resolution: Option<f64>) -> Self {
        self.target_resolution = resolution;
        self
    }

    pub fn with_fill_nodata(mut self, fill_nodata: f64) -> Self {
        self.fill_nodata = fill_nodata;
        self
    }

    pub fn with_geotiff_options(mut self, options: GeoTiffOptions) -> Self {
        self.geotiff = options;
        self
    }

    /// Reproject onto `target_crs`, inferring the output grid from the source footprint
    pub fn reproject(
        &self,
        source: &GeoRaster,
        target_crs: &Crs,
        resampling: Resampling,
    ) -> GeoResult<GeoRaster> {
        log::debug!("Reprojecting {} -> {} ({:?})", source.crs(), target_crs, resampling);
        let forward = transformer_between(source.crs(), target_crs)?;
        let grid = self.suggested_grid(source, target_crs, forward.as_ref())?;
        let inverse = transformer_between(target_crs, source.crs())?;
        self.warp(source, &grid, inverse.as_ref(), resampling)
    }

    /// Reproject onto exactly the reference grid (CRS, transform, size)
    pub fn reproject_to_match(
        &self,
        source: &GeoRaster,
        reference: &RasterGrid,
        resampling: Resampling,
    ) -> GeoResult<GeoRaster> {
        log::debug!(
            "Matching {}x{} raster to reference grid {}x{} in {}",
            source.width(),
            source.height(),
            reference.width,
            reference.height,
            reference.crs
        );
        let inverse = transformer_between(&reference.crs, source.crs())?;
        self.warp(source, reference, inverse.as_ref(), resampling)
    }

    /// Output grid covering the projected source footprint
    pub fn suggested_grid(
        &self,
        source: &GeoRaster,
        target_crs: &Crs,
        forward: &dyn CoordinateTransformer,
    ) -> GeoResult<RasterGrid> {
        let (width, height) = (source.width() as f64, source.height() as f64);
        let n = self.edge_samples.max(2);

        // Densified outline of the source in pixel space
        let mut xs = Vec::with_capacity(4 * n);
        let mut ys = Vec::with_capacity(4 * n);
        for i in 0..n {
            let t = i as f64 / (n - 1) as f64;
            for (col, row) in [
                (t * width, 0.0),
                (t * width, height),
                (0.0, t * height),
                (width, t * height),
            ] {
                let (x, y) = source.transform().pixel_to_world(col, row);
                xs.push(x);
                ys.push(y);
            }
        }
        forward.transform(&mut xs, &mut ys)?;

        let mut bounds = BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in xs.iter().zip(ys.iter()) {
            if x.is_finite() && y.is_finite() {
                bounds.min_x = bounds.min_x.min(*x);
                bounds.min_y = bounds.min_y.min(*y);
                bounds.max_x = bounds.max_x.max(*x);
                bounds.max_y = bounds.max_y.max(*y);
            }
        }
        if !bounds.is_valid() {
            return Err(GeoError::GridComputation(format!(
                "degenerate projected bounds {:?} for target {}",
                bounds, target_crs
            )));
        }

        let resolution = match self.target_resolution {
            Some(res) => res,
            None => {
                let extent_diagonal = bounds.width().hypot(bounds.height());
                let pixel_diagonal = width.hypot(height);
                extent_diagonal / pixel_diagonal
            }
        };
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(GeoError::GridComputation(format!(
                "invalid output resolution {}",
                resolution
            )));
        }

        let out_width = ((bounds.width() / resolution).round() as usize).max(1);
        let out_height = ((bounds.height() / resolution).round() as usize).max(1);
        let grid = RasterGrid {
            width: out_width,
            height: out_height,
            transform: GeoTransform::north_up(bounds.min_x, bounds.max_y, resolution, resolution),
            crs: target_crs.clone(),
        };
        log::debug!(
            "Suggested grid: {}x{} at {:.9} ({:?})",
            out_width,
            out_height,
            resolution,
            bounds
        );
        Ok(grid)
    }

    /// Resample every band of `source` onto `grid`.
    /// `inverse` maps target CRS coordinates back to the source CRS. Pixels
    /// outside the footprint hold the output nodata, which is the source's
    /// own marker or `fill_nodata` when the source has none.
    pub fn warp(
        &self,
        source: &GeoRaster,
        grid: &RasterGrid,
        inverse: &dyn CoordinateTransformer,
        resampling: Resampling,
    ) -> GeoResult<GeoRaster> {
        if grid.width == 0 || grid.height == 0 {
            return Err(GeoError::GridComputation("target grid is empty".to_string()));
        }
        let source_inverse = source.transform().inverse()?;
        grid.transform.inverse()?;

        let fill = source.nodata().unwrap_or(self.fill_nodata);
        let bands = source.band_count();
        let mut output = RasterCube::from_elem((bands, grid.height, grid.width), fill);

        let mut xs = vec![0.0; grid.width];
        let mut ys = vec![0.0; grid.width];
        for row in 0..grid.height {
            for col in 0..grid.width {
                let (x, y) = grid
                    .transform
                    .pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
                xs[col] = x;
                ys[col] = y;
            }
            inverse.transform(&mut xs, &mut ys)?;

            for col in 0..grid.width {
                if !xs[col].is_finite() || !ys[col].is_finite() {
                    continue;
                }
                let (src_col, src_row) = source_inverse.world_to_pixel(xs[col], ys[col]);
                for band in 0..bands {
                    if let Some(v) = sample(&source.band(band), source.nodata(), src_col, src_row, resampling) {
                        output[[band, row, col]] = v;
                    }
                }
            }
        }

        GeoRaster::new(
            output,
            grid.transform,
            grid.crs.clone(),
            Some(fill),
            source.pixel_type(),
        )
    }

    /// File variant of [`Aligner::reproject`], skipped when the output is current
    pub fn reproject_file(
        &self,
        input: &Path,
        output: &Path,
        target_crs: &Crs,
        resampling: Resampling,
    ) -> GeoResult<BuildOutcome> {
        let params = ReprojectParams {
            target: target_crs.to_string(),
            resampling,
            target_resolution: self.target_resolution,
            fill_nodata: self.fill_nodata,
            geotiff: &self.geotiff,
        };
        let stamp = BuildStamp::new("reproject", &[input], &params)?;
        stamp.run(output, || {
            log::info!("Reprojecting {} to {}", input.display(), target_crs);
            let source = RasterReader::read(input)?;
            let aligned = self.reproject(&source, target_crs, resampling)?;
            RasterWriter::write(&aligned, output, &self.geotiff)
        })
    }

    /// File variant of [`Aligner::reproject_to_match`]
    pub fn reproject_file_to_match(
        &self,
        input: &Path,
        reference: &Path,
        output: &Path,
        resampling: Resampling,
    ) -> GeoResult<BuildOutcome> {
        let reference_grid = RasterReader::read_header(reference)?.grid;
        let params = ReprojectParams {
            target: format!("match:{}", reference.display()),
            resampling,
            target_resolution: None,
            fill_nodata: self.fill_nodata,
            geotiff: &self.geotiff,
        };
        let stamp = BuildStamp::new("reproject_to_match", &[input, reference], &params)?;
        stamp.run(output, || {
            log::info!(
                "Aligning {} to reference {}",
                input.display(),
                reference.display()
            );
            let source = RasterReader::read(input)?;
            let aligned = self.reproject_to_match(&source, &reference_grid, resampling)?;
            RasterWriter::write(&aligned, output, &self.geotiff)
        })
    }
}

/// Sample a band at fractional pixel position (col, row); None outside the band
/// or when every contributing pixel is nodata.
fn sample(
    band: &ArrayView2<Sample>,
    nodata: Option<f64>,
    col: f64,
    row: f64,
    resampling: Resampling,
) -> Option<Sample> {
    let (height, width) = band.dim();
    if !(col >= 0.0 && row >= 0.0 && col < width as f64 && row < height as f64) {
        return None;
    }

    match resampling {
        Resampling::Nearest => {
            let v = band[[row as usize, col as usize]];
            if is_nodata(v, nodata) {
                None
            } else {
                Some(v)
            }
        }
        Resampling::Bilinear => {
            // Pixel-centre convention
            let fx = col - 0.5;
            let fy = row - 0.5;
            let x0 = fx.floor();
            let y0 = fy.floor();
            let dx = fx - x0;
            let dy = fy - y0;
            let taps = [
                (x0, y0, (1.0 - dx) * (1.0 - dy)),
                (x0 + 1.0, y0, dx * (1.0 - dy)),
                (x0, y0 + 1.0, (1.0 - dx) * dy),
                (x0 + 1.0, y0 + 1.0, dx * dy),
            ];
            weighted(band, nodata, &taps)
        }
        Resampling::Cubic => {
            let fx = col - 0.5;
            let fy = row - 0.5;
            let x0 = fx.floor();
            let y0 = fy.floor();
            let dx = fx - x0;
            let dy = fy - y0;
            let mut taps = Vec::with_capacity(16);
            for j in -1..=2 {
                let wy = cubic_weight(j as f64 - dy);
                for i in -1..=2 {
                    let wx = cubic_weight(i as f64 - dx);
                    taps.push((x0 + i as f64, y0 + j as f64, wx * wy));
                }
            }
            weighted(band, nodata, &taps)
        }
    }
}

/// Weighted sum over clamped taps, skipping nodata and renormalising
fn weighted(band: &ArrayView2<Sample>, nodata: Option<f64>, taps: &[(f64, f64, f64)]) -> Option<Sample> {
    let (height, width) = band.dim();
    let mut sum = 0.0;
    let mut total = 0.0;
    for &(x, y, w) in taps {
        if w == 0.0 {
            continue;
        }
        let xi = (x.max(0.0) as usize).min(width - 1);
        let yi = (y.max(0.0) as usize).min(height - 1);
        let v = band[[yi, xi]];
        if is_nodata(v, nodata) {
            continue;
        }
        sum += v * w;
        total += w;
    }
    if total.abs() < 1e-12 {
        None
    } else {
        Some(sum / total)
    }
}

fn cubic_weight(t: f64) -> f64 {
    const A: f64 = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        (A + 2.0) * t.powi(3) - (A + 3.0) * t.powi(2) + 1.0
    } else if t < 2.0 {
        A * t.powi(3) - 5.0 * A * t.powi(2) + 8.0 * A * t - 4.0 * A
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mosaic::MosaicCompositor;
    use crate::types::PixelType;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn ramp(rows: usize, cols: usize, gt: GeoTransform) -> GeoRaster {
        let band = Array2::from_shape_fn((rows, cols), |(r, c)| (r * 100 + c) as f64);
        GeoRaster::from_band(band, gt, Crs::Epsg(32618), Some(0.0), PixelType::F32).unwrap()
    }

    #[test]
    fn test_match_adopts_reference_grid() {
        let source = ramp(20, 20, GeoTransform::north_up(1000.0, 2000.0, 10.0, 10.0));
        let reference = RasterGrid {
            width: 9,
            height: 5,
            transform: GeoTransform::north_up(1040.0, 1960.0, 20.0, 20.0),
            crs: Crs::Epsg(32618),
        };
        let aligned = Aligner::new()
            .reproject_to_match(&source, &reference, Resampling::Nearest)
            .unwrap();
        assert_eq!(aligned.grid(), reference);

        // Output pixel (0,0) centre is (1050, 1950) -> source col 5, row 5
        assert_eq!(aligned.band(0)[[0, 0]], 505.0);
        // Beyond the source footprint (x >= 1200) the fill value is used
        assert_eq!(aligned.band(0)[[0, 8]], 0.0);
    }

    #[test]
    fn test_same_crs_reproject_preserves_square_grid() {
        let source = ramp(30, 40, GeoTransform::north_up(0.0, 300.0, 10.0, 10.0));
        let aligned = Aligner::new()
            .reproject(&source, &Crs::Epsg(32618), Resampling::Bilinear)
            .unwrap();
        assert_eq!((aligned.width(), aligned.height()), (40, 30));
        assert_relative_eq!(aligned.transform().pixel_width, 10.0, epsilon = 1e-9);
        assert_relative_eq!(aligned.band(0)[[10, 10]], 1010.0, epsilon = 1e-3);
    }

    #[test]
    fn test_explicit_resolution_changes_shape() {
        let source = ramp(30, 40, GeoTransform::north_up(0.0, 300.0, 10.0, 10.0));
        let aligned = Aligner::new()
            .with_resolution(Some(20.0))
            .reproject(&source, &Crs::Epsg(32618), Resampling::Nearest)
            .unwrap();
        assert_eq!((aligned.width(), aligned.height()), (20, 15));
    }

    #[test]
    fn test_bilinear_skips_nodata_neighbours() {
        let mut band = Array2::from_elem((4, 4), 8.0_f64);
        band[[1, 1]] = -1.0;
        let view = band.view();
        // Between four pixels, one of which is nodata
        let v = sample(&view, Some(-1.0), 2.0, 2.0, Resampling::Bilinear).unwrap();
        assert_relative_eq!(v, 8.0);
        assert!(sample(&view, Some(-1.0), 1.5, 1.5, Resampling::Nearest).is_none());
        assert!(sample(&view, Some(-1.0), 4.0, 0.5, Resampling::Nearest).is_none());
    }

    #[test]
    fn test_cubic_reproduces_linear_ramp() {
        let band = Array2::from_shape_fn((8, 8), |(_, c)| c as f64);
        let v = sample(&band.view(), None, 4.25, 4.0, Resampling::Cubic).unwrap();
        assert_relative_eq!(v, 3.75, epsilon = 1e-4);
    }

    #[test]
    fn test_footprint_fill_is_transparent_in_mosaics() {
        let crs = Crs::Epsg(32618);
        let left = GeoRaster::from_band(
            Array2::from_elem((10, 10), 3.0),
            GeoTransform::north_up(0.0, 100.0, 10.0, 10.0),
            crs.clone(),
            None,
            PixelType::U16,
        )
        .unwrap();
        let right = GeoRaster::from_band(
            Array2::from_elem((10, 10), 7.0),
            GeoTransform::north_up(100.0, 100.0, 10.0, 10.0),
            crs.clone(),
            None,
            PixelType::U16,
        )
        .unwrap();
        let grid = RasterGrid {
            width: 20,
            height: 10,
            transform: GeoTransform::north_up(0.0, 100.0, 10.0, 10.0),
            crs,
        };

        let warped = Aligner::new()
            .reproject_to_match(&left, &grid, Resampling::Nearest)
            .unwrap();
        assert_eq!(warped.nodata(), Some(0.0));
        assert_eq!(warped.band(0)[[0, 15]], 0.0);

        // First-wins merge must not let the warp fill cover the neighbour
        let mosaic = MosaicCompositor::default().merge(&[warped, right]).unwrap();
        assert_eq!(mosaic.band(0)[[0, 5]], 3.0);
        assert_eq!(mosaic.band(0)[[0, 15]], 7.0);

        let custom = Aligner::new()
            .with_fill_nodata(65535.0)
            .reproject_to_match(&left, &grid, Resampling::Nearest)
            .unwrap();
        assert_eq!(custom.nodata(), Some(65535.0));
        assert_eq!(custom.band(0)[[3, 12]], 65535.0);
    }

    #[test]
    fn test_unknown_crs_is_grid_computation_error() {
        let source = ramp(4, 4, GeoTransform::north_up(0.0, 40.0, 10.0, 10.0));
        let result = Aligner::new().reproject(&source, &Crs::Epsg(999_999), Resampling::Nearest);
        assert!(matches!(result, Err(GeoError::GridComputation(_))));

        let bogus = Crs::Definition("not a coordinate system".to_string());
        assert!(matches!(
            transformer_between(&bogus, &Crs::wgs84()),
            Err(GeoError::GridComputation(_))
        ));
    }

    #[test]
    fn test_degenerate_bounds_fail() {
        struct Collapse;
        impl CoordinateTransformer for Collapse {
            fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> GeoResult<()> {
                xs.iter_mut().for_each(|x| *x = 1.0);
                ys.iter_mut().for_each(|y| *y = f64::NAN);
                Ok(())
            }
        }
        let source = ramp(4, 4, GeoTransform::north_up(0.0, 40.0, 10.0, 10.0));
        let result = Aligner::new().suggested_grid(&source, &Crs::wgs84(), &Collapse);
        assert!(matches!(result, Err(GeoError::GridComputation(_))));
    }
}
