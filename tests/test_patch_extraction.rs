mod common;

use common::{init_logging, ramp_raster, write};
use geopatch::core::patches::{PatchExtractor, PatchOptions};
use geopatch::io::manifest::PatchManifest;
use geopatch::io::raster_io::RasterReader;
use geopatch::types::GeoError;
use std::collections::HashSet;
use tempfile::TempDir;

const ORIGIN: (f64, f64) = (500_000.0, 4_100_000.0);

#[test]
fn test_tiling_law_emits_four_full_patches() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("combined.tif");
    let source = ramp_raster(300, 300, 2, ORIGIN, 10.0);
    write(&source, &source_path);

    let out = dir.path().join("patches");
    let manifest = PatchExtractor::new(PatchOptions {
        patch_size: 128,
        overlap: 10,
        skip_partial: true,
        ..Default::default()
    })
    .extract(&source_path, &out)
    .unwrap();

    assert_eq!(manifest.len(), 4);
    let names: HashSet<_> = manifest.entries().iter().map(|e| e.patch_name.clone()).collect();
    assert_eq!(names.len(), 4);

    let origins: Vec<_> = manifest
        .entries()
        .iter()
        .map(|e| (e.row_off, e.col_off))
        .collect();
    assert_eq!(origins, vec![(0, 0), (0, 118), (118, 0), (118, 118)]);

    for entry in manifest.entries() {
        let patch = RasterReader::read(&entry.patch_path).unwrap();
        assert_eq!((patch.width(), patch.height()), (128, 128));
        assert_eq!(patch.band_count(), 2);

        // Patch transform is the parent transform shifted by the window origin
        let expected = source.transform().window_transform(entry.col_off, entry.row_off);
        assert_eq!(*patch.transform(), expected);
        assert_eq!(
            patch.band(1)[[5, 7]],
            source.band(1)[[entry.row_off + 5, entry.col_off + 7]]
        );
    }

    let persisted = PatchManifest::read_csv(out.join("patch_index.csv")).unwrap();
    assert_eq!(persisted, manifest);
}

#[test]
fn test_partial_patches_without_skip() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("tile.tif");
    write(&ramp_raster(250, 230, 1, ORIGIN, 1.0), &source_path);

    let manifest = PatchExtractor::new(PatchOptions {
        patch_size: 100,
        overlap: 0,
        skip_partial: false,
        ..Default::default()
    })
    .extract(&source_path, &dir.path().join("patches"))
    .unwrap();

    assert_eq!(manifest.len(), 9);
    let last = &manifest.entries()[8];
    assert_eq!(last.patch_name, "patch_00008.tif");
    assert_eq!((last.width, last.height), (50, 30));

    let patch = RasterReader::read(&last.patch_path).unwrap();
    assert_eq!((patch.width(), patch.height()), (50, 30));
    assert!(manifest.entries()[..2].iter().all(|e| e.width == 100 && e.height == 100));
}

#[test]
fn test_band_selection() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("combined.tif");
    let source = ramp_raster(64, 64, 2, ORIGIN, 10.0);
    write(&source, &source_path);

    let manifest = PatchExtractor::new(PatchOptions {
        patch_size: 32,
        overlap: 0,
        bands: Some(vec![2]),
        ..Default::default()
    })
    .extract(&source_path, &dir.path().join("patches"))
    .unwrap();
    assert_eq!(manifest.len(), 4);

    let patch = RasterReader::read(&manifest.entries()[3].patch_path).unwrap();
    assert_eq!(patch.band_count(), 1);
    assert_eq!(patch.band(0)[[0, 0]], source.band(1)[[32, 32]]);

    let result = PatchExtractor::new(PatchOptions {
        patch_size: 32,
        overlap: 0,
        bands: Some(vec![3]),
        ..Default::default()
    })
    .extract(&source_path, &dir.path().join("bad"));
    assert!(matches!(result, Err(GeoError::InputMismatch(_))));
}

#[test]
fn test_overlap_not_smaller_than_patch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("combined.tif");
    write(&ramp_raster(64, 64, 1, ORIGIN, 10.0), &source_path);

    let result = PatchExtractor::new(PatchOptions {
        patch_size: 32,
        overlap: 32,
        ..Default::default()
    })
    .extract(&source_path, &dir.path().join("patches"));
    assert!(matches!(result, Err(GeoError::InvalidTilingParameters(_))));
}

#[test]
fn test_sequential_worker_gives_same_manifest() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("combined.tif");
    write(&ramp_raster(200, 150, 1, ORIGIN, 10.0), &source_path);

    let options = PatchOptions {
        patch_size: 50,
        overlap: 5,
        skip_partial: false,
        ..Default::default()
    };
    let parallel = PatchExtractor::new(options.clone())
        .extract(&source_path, &dir.path().join("a"))
        .unwrap();
    let single = PatchExtractor::new(PatchOptions {
        workers: Some(1),
        ..options
    })
    .extract(&source_path, &dir.path().join("b"))
    .unwrap();

    let windows = |m: &PatchManifest| {
        m.entries()
            .iter()
            .map(|e| (e.patch_name.clone(), e.window()))
            .collect::<Vec<_>>()
    };
    assert_eq!(windows(&parallel), windows(&single));
}
