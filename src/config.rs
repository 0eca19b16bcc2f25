//! Pipeline configuration loaded from YAML.
//!
//! Every stage receives its settings from a [`PipelineConfig`]; the derived
//! directory layout for a scene lives here as well so the binary and library
//! agree on where intermediate products go.

use crate::core::mosaic::MosaicOptions;
use crate::core::patches::PatchOptions;
use crate::core::reproject::Resampling;
use crate::core::stitch::StitchOptions;
use crate::io::discovery::{raw_scene_dir, sentinel2_default_bands, BandSpec};
use crate::types::{Crs, GeoError, GeoResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub year: u32,
    /// Area-of-interest tag used in output names
    pub aoi: String,
    /// Root of the raw provider layout, e.g. dataset/raw/Sentinel-2
    pub raw_root: PathBuf,
    pub processed_root: PathBuf,
    pub predicted_root: PathBuf,
    /// Bands in stacking order; the first is the alignment anchor
    pub bands: Vec<BandSpec>,
    /// CRS the anchor band is reprojected to, e.g. "EPSG:4326"
    pub target_crs: String,
    /// Output pixel size in target CRS units; inferred when absent
    pub target_resolution: Option<f64>,
    pub resampling: Resampling,
    pub mosaic: MosaicOptions,
    pub patches: PatchOptions,
    pub stitch: StitchOptions,
    pub inference_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            year: 2024,
            aoi: "aoi".to_string(),
            raw_root: PathBuf::from("dataset/raw/Sentinel-2"),
            processed_root: PathBuf::from("dataset/processed"),
            predicted_root: PathBuf::from("dataset/predicted"),
            bands: sentinel2_default_bands(),
            target_crs: "EPSG:4326".to_string(),
            target_resolution: None,
            resampling: Resampling::Bilinear,
            mosaic: MosaicOptions::default(),
            patches: PatchOptions::default(),
            stitch: StitchOptions::default(),
            inference_batch_size: 32,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(content: &str) -> GeoResult<Self> {
        let config: PipelineConfig = serde_yaml::from_str(content)
            .map_err(|e| GeoError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> GeoResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GeoError::Config(format!(
                "Failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        log::info!("Loaded configuration from {}", path.as_ref().display());
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> GeoResult<()> {
        if self.aoi.trim().is_empty() {
            return Err(GeoError::Config("aoi must not be empty".to_string()));
        }
        if self.bands.is_empty() {
            return Err(GeoError::Config("at least one band is required".to_string()));
        }
        self.target_crs()?;
        if let Some(res) = self.target_resolution {
            if !(res.is_finite() && res > 0.0) {
                return Err(GeoError::Config(format!("invalid target_resolution {}", res)));
            }
        }
        if self.patches.patch_size == 0 || self.patches.overlap >= self.patches.patch_size {
            return Err(GeoError::Config(format!(
                "patch_size {} with overlap {} leaves no step",
                self.patches.patch_size, self.patches.overlap
            )));
        }
        if self.inference_batch_size == 0 {
            return Err(GeoError::Config("inference_batch_size must be positive".to_string()));
        }
        self.stitch.validate()
    }

    pub fn target_crs(&self) -> GeoResult<Crs> {
        self.target_crs.parse()
    }

    pub fn raw_scene_dir(&self) -> PathBuf {
        raw_scene_dir(&self.raw_root, self.year)
    }

    /// processed_root/sentinel_{aoi}_{year}
    pub fn scene_dir(&self) -> PathBuf {
        self.processed_root
            .join(format!("sentinel_{}_{}", self.aoi, self.year))
    }

    pub fn reprojection_dir(&self) -> PathBuf {
        self.scene_dir().join("reprojection")
    }

    pub fn band_mosaic_path(&self, band: &BandSpec) -> PathBuf {
        self.scene_dir()
            .join(format!("merge_B{}_{}.tif", band.code, self.year))
    }

    pub fn combined_path(&self) -> PathBuf {
        self.scene_dir()
            .join(format!("combined_{}_{}.tif", self.aoi, self.year))
    }

    pub fn patch_dir(&self) -> PathBuf {
        self.scene_dir().join("patches")
    }

    pub fn prediction_dir(&self) -> PathBuf {
        self.predicted_root
            .join(format!("inference_{}_{}", self.aoi, self.year))
    }

    pub fn stitched_path(&self) -> PathBuf {
        self.predicted_root
            .join(format!("merge_{}_{}.tif", self.aoi, self.year))
    }
}
