use crate::types::{GeoError, GeoResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One spectral band as named by the provider, e.g. B8A at 20 m
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BandSpec {
    /// Band code without the leading "B", e.g. "02" or "8A"
    pub code: String,
    /// Native resolution in metres as it appears in file names
    pub resolution_m: u32,
}

impl BandSpec {
    pub fn new(code: &str, resolution_m: u32) -> Self {
        Self {
            code: code.to_string(),
            resolution_m,
        }
    }

    /// File-name suffix, e.g. "B02_10m"
    pub fn suffix(&self) -> String {
        format!("B{}_{}m", self.code, self.resolution_m)
    }

    fn pattern(&self) -> GeoResult<Regex> {
        let pattern = format!(r"^(.*?)_?{}\.(jp2|tif|tiff)$", regex::escape(&self.suffix()));
        Regex::new(&pattern)
            .map_err(|e| GeoError::Config(format!("invalid band pattern for {}: {}", self.code, e)))
    }
}

/// Sentinel-2 L2A bands used for the marsh composite, in stacking order
pub fn sentinel2_default_bands() -> Vec<BandSpec> {
    [
        ("02", 10),
        ("03", 10),
        ("04", 10),
        ("05", 20),
        ("06", 20),
        ("07", 20),
        ("08", 10),
        ("8A", 20),
        ("11", 20),
        ("12", 20),
    ]
    .iter()
    .map(|(code, res)| BandSpec::new(code, *res))
    .collect()
}

/// A band file of one scene granule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Granule {
    /// File name with the band suffix and extension removed
    pub key: String,
    pub path: PathBuf,
}

/// Locates raw per-band scene files below a root directory
pub struct GranuleFinder {
    root: PathBuf,
}

impl GranuleFinder {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// IMG_DATA folders inside every *.SAFE product below the root
    pub fn find_img_data_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir() && e.file_name() == "IMG_DATA")
            .filter(|e| {
                e.path()
                    .ancestors()
                    .any(|a| a.extension().map_or(false, |ext| ext == "SAFE"))
            })
            .map(|e| e.into_path())
            .collect();
        dirs.sort();
        dirs
    }

    /// All files of one band, sorted by path so that precedence is stable
    pub fn find_band_granules(&self, band: &BandSpec) -> GeoResult<Vec<Granule>> {
        if !self.root.is_dir() {
            return Err(GeoError::Config(format!(
                "raw data directory {} does not exist",
                self.root.display()
            )));
        }
        let pattern = band.pattern()?;

        let mut granules = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| GeoError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if let Some(caps) = pattern.captures(&name) {
                let key = caps.get(1).map_or("", |m| m.as_str()).to_string();
                granules.push(Granule {
                    key,
                    path: entry.path().to_path_buf(),
                });
            }
        }
        granules.sort_by(|a, b| a.path.cmp(&b.path));

        log::info!(
            "Found {} granules for band {} under {}",
            granules.len(),
            band.suffix(),
            self.root.display()
        );
        Ok(granules)
    }
}

/// Raw scene directory for a year; the provider changed layout in 2022
pub fn raw_scene_dir(raw_root: &Path, year: u32) -> PathBuf {
    if year >= 2022 {
        raw_root.join("MSI").join("L2A").join(year.to_string())
    } else {
        raw_root.join("MSI").join("L2A_N0500").join(year.to_string())
    }
}
