//! Reassembly of predicted patches into one georeferenced mosaic.
//!
//! Fragments are placed by their own transforms and merged with the same
//! overlap rules as [`crate::core::mosaic`]. Open dataset handles are bounded
//! by `max_open_files`; above `chunk_threshold` fragments the merge runs in two
//! phases through intermediate mosaics so that no single pass touches more
//! than `chunk_size` files.

use crate::core::mosaic::{covering_grid, MergeMethod, MosaicCanvas};
use crate::io::raster_io::{GeoTiffOptions, RasterReader, RasterWriter};
use crate::types::{GeoError, GeoResult, PixelType, RasterHeader};
use gdal::Dataset;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Stitching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchOptions {
    pub method: MergeMethod,
    /// Datasets held open at the same time while reading pixels
    pub max_open_files: usize,
    /// Fragment count above which the chunked merge is used
    pub chunk_threshold: usize,
    /// Fragments per intermediate mosaic
    pub chunk_size: usize,
    pub resolution_tolerance: f64,
    pub geotiff: GeoTiffOptions,
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self {
            method: MergeMethod::First,
            max_open_files: 64,
            chunk_threshold: 512,
            chunk_size: 256,
            resolution_tolerance: 0.05,
            geotiff: GeoTiffOptions::default(),
        }
    }
}

impl StitchOptions {
    pub fn validate(&self) -> GeoResult<()> {
        if self.max_open_files == 0 {
            return Err(GeoError::Config("max_open_files must be at least 1".to_string()));
        }
        if self.chunk_size < 2 {
            return Err(GeoError::Config("chunk_size must be at least 2".to_string()));
        }
        if self.chunk_threshold == 0 {
            return Err(GeoError::Config("chunk_threshold must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchStrategy {
    Direct,
    Chunked,
}

/// Summary of a completed stitch
#[derive(Debug, Clone, PartialEq)]
pub struct StitchReport {
    pub fragments: usize,
    /// Intermediate mosaics written by the chunked path
    pub intermediates: usize,
    pub output: PathBuf,
    pub width: usize,
    pub height: usize,
    pub strategy: StitchStrategy,
    /// Most fragment datasets held open at the same time
    pub peak_open_files: usize,
}

/// Live and peak count of open fragment datasets
#[derive(Debug, Default)]
struct HandleTracker {
    open: Cell<usize>,
    peak: Cell<usize>,
}

impl HandleTracker {
    fn acquire(&self) {
        let open = self.open.get() + 1;
        self.open.set(open);
        self.peak.set(self.peak.get().max(open));
    }

    fn release(&self) {
        self.open.set(self.open.get().saturating_sub(1));
    }
}

/// Open fragment dataset, released from its tracker on drop
struct FragmentHandle<'a> {
    dataset: Dataset,
    tracker: &'a HandleTracker,
}

impl Deref for FragmentHandle<'_> {
    type Target = Dataset;

    fn deref(&self) -> &Dataset {
        &self.dataset
    }
}

impl Drop for FragmentHandle<'_> {
    fn drop(&mut self) {
        self.tracker.release();
    }
}

/// Pixel type and nodata of a merge target
#[derive(Debug, Clone, Copy)]
struct OutputSpec {
    pixel_type: PixelType,
    nodata: Option<f64>,
}

/// Intermediate mosaics keep full precision and mark gaps as NaN
const INTERMEDIATE: OutputSpec = OutputSpec {
    pixel_type: PixelType::F64,
    nodata: Some(f64::NAN),
};

pub struct Stitcher {
    options: StitchOptions,
}

impl Stitcher {
    pub fn new(options: StitchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &StitchOptions {
        &self.options
    }

    /// Raster fragments in a directory, ordered by file name
    pub fn list_fragments(patch_dir: &Path) -> GeoResult<Vec<PathBuf>> {
        let mut fragments = Vec::new();
        for entry in std::fs::read_dir(patch_dir)? {
            let path = entry?.path();
            let is_tiff = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
                .unwrap_or(false);
            if path.is_file() && is_tiff {
                fragments.push(path);
            }
        }
        fragments.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(fragments)
    }

    /// Stitch every fragment in `patch_dir` into `output`
    pub fn stitch(&self, patch_dir: &Path, output: &Path) -> GeoResult<StitchReport> {
        let fragments: Vec<PathBuf> = Self::list_fragments(patch_dir)?
            .into_iter()
            .filter(|p| p != output)
            .collect();
        log::info!(
            "🧵 Stitching {} fragments from {}",
            fragments.len(),
            patch_dir.display()
        );
        self.stitch_fragments(&fragments, output)
    }

    /// Stitch fragments in the given precedence order
    pub fn stitch_fragments(&self, fragments: &[PathBuf], output: &Path) -> GeoResult<StitchReport> {
        self.options.validate()?;
        let first = fragments
            .first()
            .ok_or_else(|| GeoError::InputMismatch("no fragments to stitch".to_string()))?;

        let handles = HandleTracker::default();
        let first_header = RasterReader::header(&*open_fragment(first, &handles)?)?;
        let spec = OutputSpec {
            pixel_type: first_header.pixel_type,
            nodata: first_header.nodata,
        };

        let strategy = if fragments.len() > self.options.chunk_threshold {
            log::warn!(
                "{} fragments exceed threshold {}; using chunked merge (chunks of {})",
                fragments.len(),
                self.options.chunk_threshold,
                self.options.chunk_size
            );
            StitchStrategy::Chunked
        } else {
            StitchStrategy::Direct
        };

        let mut intermediates = 0;
        let (width, height) = self.merge(fragments, output, spec, &handles, &mut intermediates)?;

        log::info!(
            "✅ Stitched {} fragments into {}x{} mosaic {}",
            fragments.len(),
            width,
            height,
            output.display()
        );
        Ok(StitchReport {
            fragments: fragments.len(),
            intermediates,
            output: output.to_path_buf(),
            width,
            height,
            strategy,
            peak_open_files: handles.peak.get(),
        })
    }

    fn merge(
        &self,
        fragments: &[PathBuf],
        output: &Path,
        spec: OutputSpec,
        handles: &HandleTracker,
        intermediates: &mut usize,
    ) -> GeoResult<(usize, usize)> {
        if fragments.len() > self.options.chunk_threshold {
            self.merge_chunked(fragments, output, spec, handles, intermediates)
        } else {
            self.merge_direct(fragments, output, spec, handles)
        }
    }

    /// Two-phase merge through intermediates in a scratch directory next to `output`
    fn merge_chunked(
        &self,
        fragments: &[PathBuf],
        output: &Path,
        spec: OutputSpec,
        handles: &HandleTracker,
        intermediates: &mut usize,
    ) -> GeoResult<(usize, usize)> {
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;
        let scratch = tempfile::Builder::new()
            .prefix(".stitch-")
            .tempdir_in(&parent)?;

        let mut chunk_paths = Vec::new();
        for (i, group) in fragments.chunks(self.options.chunk_size).enumerate() {
            let chunk_path = scratch.path().join(format!("chunk_{:05}.tif", i));
            log::debug!(
                "Merging chunk {} ({} fragments) -> {}",
                i,
                group.len(),
                chunk_path.display()
            );
            self.merge_direct(group, &chunk_path, INTERMEDIATE, handles)?;
            chunk_paths.push(chunk_path);
        }
        *intermediates += chunk_paths.len();
        log::info!("Merging {} intermediate mosaics", chunk_paths.len());

        // Scratch directory is removed when `scratch` drops
        self.merge(&chunk_paths, output, spec, handles, intermediates)
    }

    /// Single-pass merge reading at most `max_open_files` datasets at a time
    fn merge_direct(
        &self,
        fragments: &[PathBuf],
        output: &Path,
        spec: OutputSpec,
        handles: &HandleTracker,
    ) -> GeoResult<(usize, usize)> {
        let mut headers: Vec<RasterHeader> = Vec::with_capacity(fragments.len());
        for path in fragments {
            let dataset = open_fragment(path, handles)?;
            headers.push(RasterReader::header(&dataset)?);
        }
        let grid = covering_grid(&headers, self.options.resolution_tolerance)?;
        let bands = headers[0].band_count;
        let mut canvas = MosaicCanvas::new(grid, bands, self.options.method, spec.nodata);

        for group in fragments.chunks(self.options.max_open_files) {
            let datasets = group
                .iter()
                .map(|p| open_fragment(p, handles))
                .collect::<GeoResult<Vec<FragmentHandle>>>()?;
            for dataset in &datasets {
                canvas.paste(&RasterReader::read_dataset(dataset)?)?;
            }
            drop(datasets);
        }

        let mosaic = canvas.into_raster(spec.pixel_type)?;
        RasterWriter::write(&mosaic, output, &self.options.geotiff)?;
        Ok((mosaic.width(), mosaic.height()))
    }
}

fn open_fragment<'a>(path: &Path, tracker: &'a HandleTracker) -> GeoResult<FragmentHandle<'a>> {
    let dataset = RasterReader::open(path).map_err(|e| GeoError::ResourceExhausted {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    tracker.acquire();
    Ok(FragmentHandle { dataset, tracker })
}

/// Alternative ways to build the mosaic when stitching fails
pub fn fallback_advice(patch_dir: &Path, output: &Path) -> Vec<String> {
    let vrt = output.with_extension("vrt");
    let pattern = patch_dir.join("*.tif");
    vec![
        format!(
            "gdalbuildvrt {} {} && gdal_translate -co COMPRESS=LZW {} {}",
            vrt.display(),
            pattern.display(),
            vrt.display(),
            output.display()
        ),
        format!(
            "gdal_merge.py -co COMPRESS=LZW -o {} {}",
            output.display(),
            pattern.display()
        ),
        format!(
            "geopatch stitch {} {} --chunk-threshold 1 --chunk-size 64 --max-open-files 32",
            patch_dir.display(),
            output.display()
        ),
        "ulimit -n 4096  # raise the open-file limit, then retry".to_string(),
    ]
}
