use crate::io::manifest::PatchManifest;
use crate::io::raster_io::{GeoTiffOptions, RasterReader, RasterWriter};
use crate::types::{GeoError, GeoRaster, GeoResult, PixelType, RasterCube};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Per-patch class labels
pub type LabelArray = Array2<u8>;

/// One patch handed to a model
#[derive(Debug, Clone)]
pub struct PatchImage {
    pub name: String,
    pub path: PathBuf,
    /// (band, row, col)
    pub data: RasterCube,
}

/// Segmentation model consuming patches. Must return one label array per
/// input, in input order, with the patch's pixel dimensions.
pub trait InferenceModel {
    fn predict(&self, batch: &[PatchImage]) -> GeoResult<Vec<LabelArray>>;
}

/// Runs a model over every patch of a manifest and writes georeferenced predictions
#[derive(Debug, Clone)]
pub struct InferenceRunner {
    pub batch_size: usize,
    /// Prepended to the patch file name
    pub prefix: String,
    pub geotiff: GeoTiffOptions,
}

impl Default for InferenceRunner {
    fn default() -> Self {
        Self {
            batch_size: 32,
            prefix: "pred_".to_string(),
            geotiff: GeoTiffOptions::default(),
        }
    }
}

impl InferenceRunner {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    pub fn prediction_name(&self, patch_name: &str) -> String {
        format!("{}{}", self.prefix, patch_name)
    }

    pub fn run<M: InferenceModel + ?Sized>(
        &self,
        model: &M,
        manifest: &PatchManifest,
        output_dir: &Path,
    ) -> GeoResult<Vec<PathBuf>> {
        if self.batch_size == 0 {
            return Err(GeoError::Config("inference batch size must be positive".to_string()));
        }
        std::fs::create_dir_all(output_dir)?;
        self.clear_predictions(output_dir)?;

        let total_batches = (manifest.len() + self.batch_size - 1) / self.batch_size;
        log::info!("🤖 Starting inference over {} patches", manifest.len());

        let mut written = Vec::with_capacity(manifest.len());
        for (i, entries) in manifest.entries().chunks(self.batch_size).enumerate() {
            log::info!("Processing batch {}/{}", i + 1, total_batches);

            let rasters = entries
                .iter()
                .map(|e| RasterReader::read(&e.patch_path))
                .collect::<GeoResult<Vec<GeoRaster>>>()?;
            let batch: Vec<PatchImage> = entries
                .iter()
                .zip(&rasters)
                .map(|(entry, raster)| PatchImage {
                    name: entry.patch_name.clone(),
                    path: entry.patch_path.clone(),
                    data: raster.data().clone(),
                })
                .collect();

            let labels = model.predict(&batch)?;
            if labels.len() != batch.len() {
                return Err(GeoError::InputMismatch(format!(
                    "model returned {} predictions for a batch of {}",
                    labels.len(),
                    batch.len()
                )));
            }

            for ((image, raster), label) in batch.iter().zip(&rasters).zip(labels) {
                written.push(self.write_prediction(image, raster, label, output_dir)?);
            }
        }

        log::info!("✅ Inference complete: {} predictions in {}", written.len(), output_dir.display());
        Ok(written)
    }

    /// Remove prediction files of earlier runs from `output_dir`
    pub fn clear_predictions(&self, output_dir: &Path) -> GeoResult<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(output_dir)? {
            let path = entry?.path();
            let is_prediction = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| {
                    n.starts_with(&self.prefix) && (n.ends_with(".tif") || n.ends_with(".tiff"))
                });
            if is_prediction && path.is_file() {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            log::warn!(
                "Removed {} stale predictions from {}",
                removed,
                output_dir.display()
            );
        }
        Ok(removed)
    }

    /// Write one label array with the georeferencing of its source patch
    fn write_prediction(
        &self,
        image: &PatchImage,
        source: &GeoRaster,
        label: LabelArray,
        output_dir: &Path,
    ) -> GeoResult<PathBuf> {
        if label.dim() != (source.height(), source.width()) {
            return Err(GeoError::InputMismatch(format!(
                "prediction for {} is {:?}, patch is {}x{}",
                image.name,
                label.dim(),
                source.height(),
                source.width()
            )));
        }

        let prediction = GeoRaster::from_band(
            label.mapv(f64::from),
            *source.transform(),
            source.crs().clone(),
            None,
            PixelType::U8,
        )?;
        let path = output_dir.join(self.prediction_name(&image.name));
        RasterWriter::write(&prediction, &path, &self.geotiff)?;
        Ok(path)
    }
}
