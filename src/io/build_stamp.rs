//! Idempotent-build contract for pipeline stages.
//!
//! Every stamped output gets a sidecar `<output>.stamp.json` describing the
//! stage, the declared inputs and the parameters that produced it. A stage is
//! skipped only when the output exists and its recorded stamp equals the one
//! computed for the current invocation.

use crate::types::{GeoError, GeoResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Result of a stamped stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Output was (re)computed
    Built,
    /// Output existed with a matching stamp; nothing was done
    UpToDate,
}

/// Identity of one declared input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFingerprint {
    pub path: PathBuf,
    pub len: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl InputFingerprint {
    pub fn of<P: AsRef<Path>>(path: P) -> GeoResult<Self> {
        let metadata = std::fs::metadata(path.as_ref())?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            len: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

/// Declared inputs and parameters of a stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStamp {
    pub stage: String,
    pub inputs: Vec<InputFingerprint>,
    pub parameters: serde_json::Value,
}

impl BuildStamp {
    pub fn new<P: AsRef<Path>, S: Serialize>(
        stage: &str,
        inputs: &[P],
        parameters: &S,
    ) -> GeoResult<Self> {
        let inputs = inputs
            .iter()
            .map(InputFingerprint::of)
            .collect::<GeoResult<Vec<_>>>()?;
        let parameters = serde_json::to_value(parameters)
            .map_err(|e| GeoError::Processing(format!("Failed to serialize parameters: {}", e)))?;
        Ok(Self {
            stage: stage.to_string(),
            inputs,
            parameters,
        })
    }

    pub fn sidecar_path(output: &Path) -> PathBuf {
        let mut name = output
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".stamp.json");
        output.with_file_name(name)
    }

    /// True if `output` exists and was produced from exactly this stamp
    pub fn is_current(&self, output: &Path) -> bool {
        if !output.is_file() {
            return false;
        }
        let sidecar = Self::sidecar_path(output);
        let recorded = match std::fs::read_to_string(&sidecar) {
            Ok(content) => content,
            Err(_) => {
                log::warn!(
                    "{} exists without a build stamp; rebuilding",
                    output.display()
                );
                return false;
            }
        };
        match serde_json::from_str::<BuildStamp>(&recorded) {
            Ok(stamp) => stamp == *self,
            Err(e) => {
                log::warn!("Unreadable build stamp {}: {}", sidecar.display(), e);
                false
            }
        }
    }

    pub fn record(&self, output: &Path) -> GeoResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| GeoError::Processing(format!("Failed to serialize build stamp: {}", e)))?;
        std::fs::write(Self::sidecar_path(output), content)?;
        Ok(())
    }

    /// Run `build` unless the output is current, then record the stamp
    pub fn run<F>(&self, output: &Path, build: F) -> GeoResult<BuildOutcome>
    where
        F: FnOnce() -> GeoResult<()>,
    {
        if self.is_current(output) {
            log::info!("⏭️  {} is up to date, skipping {}", output.display(), self.stage);
            return Ok(BuildOutcome::UpToDate);
        }
        build()?;
        self.record(output)?;
        Ok(BuildOutcome::Built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stamp_skips_unchanged_rebuilds_changed() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        std::fs::write(&input, "abc").unwrap();

        let stamp = BuildStamp::new("copy", &[&input], &("nearest", 10)).unwrap();
        let outcome = stamp
            .run(&output, || {
                std::fs::write(&output, "abc")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Built);

        let again = BuildStamp::new("copy", &[&input], &("nearest", 10)).unwrap();
        let outcome = again.run(&output, || panic!("must not rebuild")).unwrap();
        assert_eq!(outcome, BuildOutcome::UpToDate);

        let changed = BuildStamp::new("copy", &[&input], &("bilinear", 10)).unwrap();
        let mut rebuilt = false;
        let outcome = changed
            .run(&output, || {
                rebuilt = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(outcome, BuildOutcome::Built);
        assert!(rebuilt);
    }

    #[test]
    fn test_output_without_stamp_is_not_current() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("legacy.tif");
        std::fs::write(&output, "x").unwrap();
        let stamp = BuildStamp::new::<PathBuf, _>("mosaic", &[], &()).unwrap();
        assert!(!stamp.is_current(&output));
        assert_eq!(
            BuildStamp::sidecar_path(&output),
            dir.path().join("legacy.tif.stamp.json")
        );
    }
}
