//! Scene preparation and post-inference assembly.
//!
//! Stages run in order and hand over through files on disk:
//! discover -> align -> mosaic -> stack -> extract, then after inference
//! predict -> stitch. Each file-producing stage is stamped, so re-running a
//! prepared scene with unchanged inputs does no raster work.

use crate::config::PipelineConfig;
use crate::core::inference::{InferenceModel, InferenceRunner};
use crate::core::mosaic::MosaicCompositor;
use crate::core::patches::PatchExtractor;
use crate::core::reproject::Aligner;
use crate::core::stack::BandStacker;
use crate::core::stitch::{fallback_advice, StitchReport, Stitcher};
use crate::io::discovery::{Granule, GranuleFinder};
use crate::io::manifest::PatchManifest;
use crate::types::{GeoError, GeoResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Files produced by [`ScenePipeline::prepare`]
#[derive(Debug, Clone)]
pub struct PreparedScene {
    /// Aligned granules per band, in band order
    pub aligned: Vec<Vec<PathBuf>>,
    pub band_mosaics: Vec<PathBuf>,
    pub combined: PathBuf,
    pub manifest: PatchManifest,
}

/// Result of the final assembly; failure leaves patches and predictions usable
#[derive(Debug, Clone)]
pub enum StitchOutcome {
    Stitched(StitchReport),
    Failed { reason: String, advice: Vec<String> },
}

pub struct ScenePipeline {
    config: PipelineConfig,
    aligner: Aligner,
    compositor: MosaicCompositor,
}

impl ScenePipeline {
    pub fn new(config: PipelineConfig) -> GeoResult<Self> {
        config.validate()?;
        let aligner = Aligner::new()
            .with_resolution(config.target_resolution)
            .with_geotiff_options(config.mosaic.geotiff.clone());
        let compositor = MosaicCompositor::new(config.mosaic.clone());
        Ok(Self {
            config,
            aligner,
            compositor,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every preparation stage for the configured scene
    pub fn prepare(&self) -> GeoResult<PreparedScene> {
        log::info!(
            "🚀 Preparing scene {} {} from {}",
            self.config.aoi,
            self.config.year,
            self.config.raw_scene_dir().display()
        );
        let aligned = self.align_bands()?;
        let band_mosaics = self.mosaic_bands(&aligned)?;
        let combined = self.stack(&band_mosaics)?;
        let manifest = self.extract(&combined)?;
        Ok(PreparedScene {
            aligned,
            band_mosaics,
            combined,
            manifest,
        })
    }

    /// Reproject the anchor band to the target CRS, then match every other
    /// band to the anchor granule of the same scene
    pub fn align_bands(&self) -> GeoResult<Vec<Vec<PathBuf>>> {
        let finder = GranuleFinder::new(self.config.raw_scene_dir());
        let target_crs = self.config.target_crs()?;
        let out_dir = self.config.reprojection_dir();
        std::fs::create_dir_all(&out_dir)?;

        let mut anchors: HashMap<String, PathBuf> = HashMap::new();
        let mut aligned = Vec::with_capacity(self.config.bands.len());

        for (i, band) in self.config.bands.iter().enumerate() {
            log::info!("Working on band {}", band.code);
            let granules = finder.find_band_granules(band)?;
            if granules.is_empty() {
                return Err(GeoError::InputMismatch(format!(
                    "no granules found for band {} under {}",
                    band.suffix(),
                    finder.root().display()
                )));
            }

            let mut outputs = Vec::with_capacity(granules.len());
            let mut claimed: HashMap<PathBuf, &Path> = HashMap::new();
            for granule in &granules {
                let output = aligned_path(&out_dir, granule);
                // Same file name in two products, e.g. a reprocessed baseline
                if let Some(previous) = claimed.insert(output.clone(), &granule.path) {
                    return Err(GeoError::InputMismatch(format!(
                        "granules {} and {} both align to {}",
                        previous.display(),
                        granule.path.display(),
                        output.display()
                    )));
                }
                if i == 0 {
                    self.aligner.reproject_file(
                        &granule.path,
                        &output,
                        &target_crs,
                        self.config.resampling,
                    )?;
                    anchors.insert(granule.key.clone(), output.clone());
                } else {
                    let reference = anchors.get(&granule.key).ok_or_else(|| {
                        GeoError::InputMismatch(format!(
                            "granule {} of band {} has no anchor band counterpart",
                            granule.key, band.code
                        ))
                    })?;
                    self.aligner.reproject_file_to_match(
                        &granule.path,
                        reference,
                        &output,
                        self.config.resampling,
                    )?;
                }
                outputs.push(output);
            }
            aligned.push(outputs);
        }
        Ok(aligned)
    }

    /// One mosaic per band from its aligned granules
    pub fn mosaic_bands(&self, aligned: &[Vec<PathBuf>]) -> GeoResult<Vec<PathBuf>> {
        let mut mosaics = Vec::with_capacity(aligned.len());
        for (band, granules) in self.config.bands.iter().zip(aligned) {
            let output = self.config.band_mosaic_path(band);
            self.compositor.create_mosaic(granules, &output)?;
            mosaics.push(output);
        }
        Ok(mosaics)
    }

    pub fn stack(&self, band_mosaics: &[PathBuf]) -> GeoResult<PathBuf> {
        let output = self.config.combined_path();
        BandStacker::stack_files(band_mosaics, &output, &self.config.mosaic.geotiff)?;
        Ok(output)
    }

    pub fn extract(&self, combined: &Path) -> GeoResult<PatchManifest> {
        PatchExtractor::new(self.config.patches.clone()).extract(combined, &self.config.patch_dir())
    }

    /// Run the model over the patches and stitch its predictions
    pub fn predict_and_stitch<M: InferenceModel + ?Sized>(
        &self,
        model: &M,
        manifest: &PatchManifest,
    ) -> GeoResult<StitchOutcome> {
        let runner = InferenceRunner {
            batch_size: self.config.inference_batch_size,
            geotiff: self.config.stitch.geotiff.clone(),
            ..Default::default()
        };
        let predictions = runner.run(model, manifest, &self.config.prediction_dir())?;
        let output = self.config.stitched_path();
        let result =
            Stitcher::new(self.config.stitch.clone()).stitch_fragments(&predictions, &output);
        Ok(self.outcome(result))
    }

    /// Stitch the prediction directory; failures are reported, not propagated
    pub fn stitch_predictions(&self) -> StitchOutcome {
        let patch_dir = self.config.prediction_dir();
        let output = self.config.stitched_path();
        self.outcome(Stitcher::new(self.config.stitch.clone()).stitch(&patch_dir, &output))
    }

    fn outcome(&self, result: GeoResult<StitchReport>) -> StitchOutcome {
        let patch_dir = self.config.prediction_dir();
        let output = self.config.stitched_path();
        match result {
            Ok(report) => StitchOutcome::Stitched(report),
            Err(e) => {
                log::error!("Failed to stitch {}: {}", patch_dir.display(), e);
                let advice = fallback_advice(&patch_dir, &output);
                for hint in &advice {
                    log::warn!("Alternative: {}", hint);
                }
                StitchOutcome::Failed {
                    reason: e.to_string(),
                    advice,
                }
            }
        }
    }
}

fn aligned_path(out_dir: &Path, granule: &Granule) -> PathBuf {
    let stem = granule
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| granule.key.clone());
    out_dir.join(format!("{}_aligned.tif", stem))
}
