use crate::types::{BandWindow, GeoResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default manifest file name inside a patch directory
pub const DEFAULT_MANIFEST_NAME: &str = "patch_index.csv";

/// One emitted patch and its placement in the parent raster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub patch_name: String,
    pub patch_path: PathBuf,
    pub row_off: usize,
    pub col_off: usize,
    pub width: usize,
    pub height: usize,
}

impl ManifestEntry {
    pub fn window(&self) -> BandWindow {
        BandWindow::new(self.row_off, self.col_off, self.width, self.height)
    }
}

/// Ordered patch index written once extraction completes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchManifest {
    entries: Vec<ManifestEntry>,
}

impl PatchManifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, patch_name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.patch_name == patch_name)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> GeoResult<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        log::info!(
            "Wrote manifest with {} patches to {}",
            self.entries.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn read_csv<P: AsRef<Path>>(path: P) -> GeoResult<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let entries = reader
            .deserialize()
            .collect::<Result<Vec<ManifestEntry>, csv::Error>>()?;
        Ok(Self { entries })
    }
}
