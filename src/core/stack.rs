use crate::io::build_stamp::{BuildOutcome, BuildStamp};
use crate::io::raster_io::{GeoTiffOptions, RasterReader, RasterWriter};
use crate::types::{GeoError, GeoRaster, GeoResult, RasterCube, RasterHeader};
use ndarray::s;
use std::path::Path;

/// Combines co-registered single-band rasters into one multi-band raster
pub struct BandStacker;

impl BandStacker {
    /// Stack in input order. Every input must be single-band and share one grid.
    pub fn stack(bands: &[GeoRaster]) -> GeoResult<GeoRaster> {
        let headers: Vec<RasterHeader> = bands.iter().map(|b| b.header()).collect();
        Self::verify(&headers)?;

        let first = &bands[0];
        let mut cube = RasterCube::zeros((bands.len(), first.height(), first.width()));
        for (i, band) in bands.iter().enumerate() {
            cube.slice_mut(s![i, .., ..]).assign(&band.band(0));
        }

        log::info!(
            "Stacked {} bands into {}x{} raster",
            bands.len(),
            first.width(),
            first.height()
        );
        GeoRaster::new(
            cube,
            *first.transform(),
            first.crs().clone(),
            first.nodata(),
            first.pixel_type(),
        )
    }

    fn verify(headers: &[RasterHeader]) -> GeoResult<()> {
        let first = headers
            .first()
            .ok_or_else(|| GeoError::InputMismatch("no bands to stack".to_string()))?;
        for (i, header) in headers.iter().enumerate() {
            if header.band_count != 1 {
                return Err(GeoError::InputMismatch(format!(
                    "stack input {} has {} bands, expected 1",
                    i, header.band_count
                )));
            }
            if let Some(diff) = first.grid.difference(&header.grid) {
                return Err(GeoError::GridMismatch(format!(
                    "stack input {} differs from input 0: {}",
                    i, diff
                )));
            }
        }
        Ok(())
    }

    /// Stack files into an N-band GeoTIFF, reading one input at a time
    pub fn stack_files<P: AsRef<Path>>(
        inputs: &[P],
        output: &Path,
        options: &GeoTiffOptions,
    ) -> GeoResult<BuildOutcome> {
        let stamp = BuildStamp::new("stack", inputs, options)?;
        stamp.run(output, || {
            let headers = inputs
                .iter()
                .map(RasterReader::read_header)
                .collect::<GeoResult<Vec<_>>>()?;
            Self::verify(&headers)?;

            log::info!(
                "📚 Stacking {} bands into {}",
                inputs.len(),
                output.display()
            );
            let mut header = headers[0].clone();
            header.band_count = headers.len();
            let mut dataset = RasterWriter::create(output, &header, options)?;
            for (i, input) in inputs.iter().enumerate() {
                let band = RasterReader::read(input)?;
                RasterWriter::write_band(
                    &mut dataset,
                    i + 1,
                    &band.band(0).to_owned(),
                    header.pixel_type,
                )?;
            }
            Ok(())
        })
    }
}
