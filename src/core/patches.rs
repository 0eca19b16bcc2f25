use crate::io::manifest::{ManifestEntry, PatchManifest, DEFAULT_MANIFEST_NAME};
use crate::io::raster_io::{GeoTiffOptions, RasterReader, RasterWriter};
use crate::types::{BandWindow, GeoError, GeoResult, RasterHeader};
use gdal::Dataset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Window layout of a tiling run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingPlan {
    width: usize,
    height: usize,
    patch_size: usize,
    overlap: usize,
    skip_partial: bool,
}

impl TilingPlan {
    pub fn new(
        width: usize,
        height: usize,
        patch_size: usize,
        overlap: usize,
        skip_partial: bool,
    ) -> GeoResult<Self> {
        if patch_size == 0 {
            return Err(GeoError::InvalidTilingParameters(
                "patch size must be positive".to_string(),
            ));
        }
        if overlap >= patch_size {
            return Err(GeoError::InvalidTilingParameters(format!(
                "overlap {} must be smaller than patch size {}",
                overlap, patch_size
            )));
        }
        Ok(Self {
            width,
            height,
            patch_size,
            overlap,
            skip_partial,
        })
    }

    pub fn step(&self) -> usize {
        self.patch_size - self.overlap
    }

    /// Origins along one axis of length `extent`
    pub fn axis_origins(&self, extent: usize) -> Vec<usize> {
        let last = if self.skip_partial {
            match extent.checked_sub(self.patch_size) {
                Some(last) => last,
                None => return Vec::new(),
            }
        } else {
            match extent.checked_sub(1) {
                Some(last) => last,
                None => return Vec::new(),
            }
        };
        (0..=last).step_by(self.step()).collect()
    }

    /// Clipped windows in row-major order; partial windows dropped when skipping
    pub fn windows(&self) -> Vec<BandWindow> {
        let rows = self.axis_origins(self.height);
        let cols = self.axis_origins(self.width);
        let mut windows = Vec::with_capacity(rows.len() * cols.len());
        for &row in &rows {
            for &col in &cols {
                let window = BandWindow::new(row, col, self.patch_size, self.patch_size);
                if let Some(clipped) = window.clip(self.width, self.height) {
                    if self.skip_partial && !clipped.is_full(self.patch_size) {
                        continue;
                    }
                    windows.push(clipped);
                }
            }
        }
        windows
    }
}

/// Patch extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchOptions {
    pub patch_size: usize,
    pub overlap: usize,
    pub skip_partial: bool,
    /// 1-based bands to keep; all bands when None
    pub bands: Option<Vec<usize>>,
    /// Worker threads for window reads; rayon's default when None
    pub workers: Option<usize>,
    pub manifest_name: String,
    pub prefix: String,
    pub geotiff: GeoTiffOptions,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            patch_size: 128,
            overlap: 10,
            skip_partial: true,
            bands: None,
            workers: None,
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
            prefix: "patch".to_string(),
            geotiff: GeoTiffOptions::default(),
        }
    }
}

impl PatchOptions {
    pub fn patch_name(&self, id: usize) -> String {
        format!("{}_{:05}.tif", self.prefix, id)
    }
}

/// Tiles a raster into fixed-size georeferenced patches
pub struct PatchExtractor {
    options: PatchOptions,
}

impl PatchExtractor {
    pub fn new(options: PatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PatchOptions {
        &self.options
    }

    /// Write every window of `source` into `output_dir` and persist the manifest
    pub fn extract(&self, source: &Path, output_dir: &Path) -> GeoResult<PatchManifest> {
        let header = RasterReader::read_header(source)?;
        let plan = TilingPlan::new(
            header.grid.width,
            header.grid.height,
            self.options.patch_size,
            self.options.overlap,
            self.options.skip_partial,
        )?;
        let windows = plan.windows();

        log::info!(
            "✂️  Extracting {} patches ({}px, overlap {}, step {}) from {}x{} raster {}",
            windows.len(),
            self.options.patch_size,
            self.options.overlap,
            plan.step(),
            header.grid.width,
            header.grid.height,
            source.display()
        );
        std::fs::create_dir_all(output_dir)?;

        let entries = Mutex::new(Vec::with_capacity(windows.len()));
        self.write_patches(source, &header, &windows, output_dir, &entries)?;

        let mut entries = entries
            .into_inner()
            .map_err(|_| GeoError::Processing("manifest lock poisoned".to_string()))?;
        entries.sort_by_key(|(id, _)| *id);
        let manifest = PatchManifest::new(entries.into_iter().map(|(_, e)| e).collect());
        manifest.write_csv(output_dir.join(&self.options.manifest_name))?;

        log::info!("✅ Wrote {} patches to {}", manifest.len(), output_dir.display());
        Ok(manifest)
    }

    #[cfg(feature = "parallel")]
    fn write_patches(
        &self,
        source: &Path,
        header: &RasterHeader,
        windows: &[BandWindow],
        output_dir: &Path,
        entries: &Mutex<Vec<(usize, ManifestEntry)>>,
    ) -> GeoResult<()> {
        use rayon::prelude::*;

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(workers) = self.options.workers {
            builder = builder.num_threads(workers.max(1));
        }
        let pool = builder
            .build()
            .map_err(|e| GeoError::Processing(format!("Failed to build worker pool: {}", e)))?;

        pool.install(|| {
            windows
                .par_iter()
                .enumerate()
                .map_init(
                    // One dataset handle per worker
                    || RasterReader::open(source),
                    |dataset, (id, window)| {
                        let dataset = dataset.as_ref().map_err(|e| {
                            GeoError::Processing(format!(
                                "Failed to open {} in worker: {}",
                                source.display(),
                                e
                            ))
                        })?;
                        let entry = self.write_patch(dataset, header, id, window, output_dir)?;
                        entries
                            .lock()
                            .map_err(|_| GeoError::Processing("manifest lock poisoned".to_string()))?
                            .push((id, entry));
                        Ok(())
                    },
                )
                .collect::<GeoResult<Vec<()>>>()
        })?;
        Ok(())
    }

    #[cfg(not(feature = "parallel"))]
    fn write_patches(
        &self,
        source: &Path,
        header: &RasterHeader,
        windows: &[BandWindow],
        output_dir: &Path,
        entries: &Mutex<Vec<(usize, ManifestEntry)>>,
    ) -> GeoResult<()> {
        let dataset = RasterReader::open(source)?;
        for (id, window) in windows.iter().enumerate() {
            let entry = self.write_patch(&dataset, header, id, window, output_dir)?;
            entries
                .lock()
                .map_err(|_| GeoError::Processing("manifest lock poisoned".to_string()))?
                .push((id, entry));
        }
        Ok(())
    }

    fn write_patch(
        &self,
        dataset: &Dataset,
        header: &RasterHeader,
        id: usize,
        window: &BandWindow,
        output_dir: &Path,
    ) -> GeoResult<ManifestEntry> {
        let patch = RasterReader::read_window(dataset, header, window, self.options.bands.as_deref())?;
        let patch_name = self.options.patch_name(id);
        let patch_path: PathBuf = output_dir.join(&patch_name);
        RasterWriter::write(&patch, &patch_path, &self.options.geotiff)?;
        log::debug!("Patch {} at row {} col {}", patch_name, window.row_off, window.col_off);

        Ok(ManifestEntry {
            patch_name,
            patch_path,
            row_off: window.row_off,
            col_off: window.col_off,
            width: patch.width(),
            height: patch.height(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiling_law_300_by_300() {
        let plan = TilingPlan::new(300, 300, 128, 10, true).unwrap();
        assert_eq!(plan.step(), 118);
        assert_eq!(plan.axis_origins(300), vec![0, 118]);
        let windows = plan.windows();
        assert_eq!(windows.len(), 4);
        assert!(windows.iter().all(|w| w.is_full(128)));
        assert_eq!(windows[1], BandWindow::new(0, 118, 128, 128));
        assert_eq!(windows[2], BandWindow::new(118, 0, 128, 128));
    }

    #[test]
    fn test_partial_windows_kept_without_skip() {
        let plan = TilingPlan::new(250, 230, 100, 0, false).unwrap();
        let windows = plan.windows();
        assert_eq!(windows.len(), 9);
        assert_eq!(windows[2].width, 50);
        assert_eq!(windows[8].height, 30);
        assert_eq!(windows[8].width, 50);

        // Non-overlap regions tile the raster exactly
        let area: usize = windows.iter().map(|w| w.width * w.height).sum();
        assert_eq!(area, 250 * 230);
    }

    #[test]
    fn test_raster_smaller_than_patch() {
        let skip = TilingPlan::new(50, 50, 128, 0, true).unwrap();
        assert!(skip.windows().is_empty());
        let keep = TilingPlan::new(50, 50, 128, 0, false).unwrap();
        assert_eq!(keep.windows(), vec![BandWindow::new(0, 0, 50, 50)]);
    }

    #[test]
    fn test_invalid_tiling_parameters() {
        assert!(matches!(
            TilingPlan::new(300, 300, 128, 128, true),
            Err(GeoError::InvalidTilingParameters(_))
        ));
        assert!(matches!(
            TilingPlan::new(300, 300, 0, 0, true),
            Err(GeoError::InvalidTilingParameters(_))
        ));
    }

    #[test]
    fn test_patch_names_are_zero_padded() {
        let options = PatchOptions::default();
        assert_eq!(options.patch_name(7), "patch_00007.tif");
    }
}
