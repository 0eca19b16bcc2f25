mod common;

use common::{constant_raster, init_logging, ramp_raster, write, UTM_18N};
use geopatch::core::mosaic::MergeMethod;
use geopatch::core::patches::{PatchExtractor, PatchOptions};
use geopatch::core::stitch::{fallback_advice, StitchOptions, StitchStrategy, Stitcher};
use geopatch::io::raster_io::RasterReader;
use geopatch::types::{Crs, GeoError, GeoRaster, GeoTransform, PixelType, RasterCube};
use std::path::Path;
use tempfile::TempDir;

const ORIGIN: (f64, f64) = (500_000.0, 4_100_000.0);

/// Extract non-overlapping patches (keeping partial ones) from a ramp raster
fn extract_patches(dir: &Path) -> geopatch::GeoRaster {
    let source_path = dir.join("source.tif");
    let source = ramp_raster(250, 230, 1, ORIGIN, 10.0);
    write(&source, &source_path);
    PatchExtractor::new(PatchOptions {
        patch_size: 100,
        overlap: 0,
        skip_partial: false,
        ..Default::default()
    })
    .extract(&source_path, &dir.join("patches"))
    .unwrap();
    source
}

#[test]
fn test_round_trip_reproduces_source() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let source = extract_patches(dir.path());

    let output = dir.path().join("out").join("stitched.tif");
    let report = Stitcher::new(StitchOptions::default())
        .stitch(&dir.path().join("patches"), &output)
        .unwrap();
    assert_eq!(report.fragments, 9);
    assert_eq!(report.strategy, StitchStrategy::Direct);
    assert_eq!(report.intermediates, 0);
    assert_eq!(report.peak_open_files, 9);

    let stitched = RasterReader::read(&output).unwrap();
    assert_eq!(stitched.grid(), source.grid());
    assert_eq!(stitched.data(), source.data());
}

#[test]
fn test_chunked_merge_matches_direct() {
    let dir = TempDir::new().unwrap();
    let source = extract_patches(dir.path());
    let out_dir = dir.path().join("out");

    let options = StitchOptions {
        max_open_files: 2,
        chunk_threshold: 3,
        chunk_size: 2,
        ..Default::default()
    };
    let output = out_dir.join("chunked.tif");
    let report = Stitcher::new(options)
        .stitch(&dir.path().join("patches"), &output)
        .unwrap();
    assert_eq!(report.strategy, StitchStrategy::Chunked);
    // 9 fragments -> 5 intermediates -> 3 intermediates -> final
    assert_eq!(report.intermediates, 8);
    // Fragments and intermediates alike are read two at a time
    assert_eq!(report.peak_open_files, 2);

    let stitched = RasterReader::read(&output).unwrap();
    assert_eq!(stitched.grid(), source.grid());
    assert_eq!(stitched.data(), source.data());

    // Scratch directories are cleaned up
    let leftovers: Vec<_> = std::fs::read_dir(&out_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".stitch-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_round_trip_is_exact_for_wide_sample_types() {
    for (pixel_type, base) in [(PixelType::I32, 16_777_217.0), (PixelType::F64, 0.1)] {
        let dir = TempDir::new().unwrap();
        let source = GeoRaster::new(
            RasterCube::from_shape_fn((1, 60, 70), |(_, r, c)| base + (r * 70 + c) as f64),
            GeoTransform::north_up(ORIGIN.0, ORIGIN.1, 10.0, 10.0),
            Crs::Epsg(UTM_18N),
            None,
            pixel_type,
        )
        .unwrap();
        let source_path = dir.path().join("source.tif");
        write(&source, &source_path);
        PatchExtractor::new(PatchOptions {
            patch_size: 25,
            overlap: 0,
            skip_partial: false,
            ..Default::default()
        })
        .extract(&source_path, &dir.path().join("patches"))
        .unwrap();

        // Chunked path goes through intermediate mosaics
        for (name, chunk_threshold) in [("direct.tif", 512), ("chunked.tif", 1)] {
            let output = dir.path().join(name);
            Stitcher::new(StitchOptions {
                chunk_threshold,
                chunk_size: 2,
                ..Default::default()
            })
            .stitch(&dir.path().join("patches"), &output)
            .unwrap();

            let stitched = RasterReader::read(&output).unwrap();
            assert_eq!(stitched.pixel_type(), pixel_type);
            assert_eq!(stitched.data(), source.data());
        }
    }
}

#[test]
fn test_overlap_precedence_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let patches = dir.path().join("pred");
    // b overlaps the right half of a
    write(
        &constant_raster(10, 10, 1.0, ORIGIN, 10.0, Some(255.0)),
        &patches.join("pred_patch_00000.tif"),
    );
    write(
        &constant_raster(10, 10, 2.0, (ORIGIN.0 + 50.0, ORIGIN.1), 10.0, Some(255.0)),
        &patches.join("pred_patch_00001.tif"),
    );

    for _ in 0..2 {
        let output = dir.path().join("first.tif");
        std::fs::remove_file(&output).ok();
        Stitcher::new(StitchOptions::default())
            .stitch(&patches, &output)
            .unwrap();
        let first = RasterReader::read(&output).unwrap();
        assert_eq!((first.width(), first.height()), (15, 10));
        assert_eq!(first.band(0)[[3, 7]], 1.0);
        assert_eq!(first.band(0)[[3, 12]], 2.0);
        assert_eq!(first.nodata(), Some(255.0));
    }

    let output = dir.path().join("last.tif");
    Stitcher::new(StitchOptions {
        method: MergeMethod::Last,
        ..Default::default()
    })
    .stitch(&patches, &output)
    .unwrap();
    let last = RasterReader::read(&output).unwrap();
    assert_eq!(last.band(0)[[3, 7]], 2.0);
    assert_eq!(last.band(0)[[3, 2]], 1.0);
}

#[test]
fn test_nodata_fragments_are_transparent() {
    let dir = TempDir::new().unwrap();
    let patches = dir.path().join("pred");
    write(
        &constant_raster(10, 10, 255.0, ORIGIN, 10.0, Some(255.0)),
        &patches.join("a.tif"),
    );
    write(
        &constant_raster(10, 10, 4.0, ORIGIN, 10.0, Some(255.0)),
        &patches.join("b.tif"),
    );

    let output = dir.path().join("merged.tif");
    Stitcher::new(StitchOptions::default())
        .stitch(&patches, &output)
        .unwrap();
    let merged = RasterReader::read(&output).unwrap();
    assert!(merged.band(0).iter().all(|v| *v == 4.0));
}

#[test]
fn test_unreadable_fragment_is_resource_exhausted() {
    let dir = TempDir::new().unwrap();
    extract_patches(dir.path());
    let bad = dir.path().join("patches").join("patch_99999.tif");
    std::fs::write(&bad, b"not a raster").unwrap();

    let output = dir.path().join("stitched.tif");
    let err = Stitcher::new(StitchOptions::default())
        .stitch(&dir.path().join("patches"), &output)
        .unwrap_err();
    match err {
        GeoError::ResourceExhausted { path, .. } => assert_eq!(path, bad),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());

    let advice = fallback_advice(&dir.path().join("patches"), &output);
    assert!(advice.iter().any(|a| a.contains("gdalbuildvrt")));
    assert!(advice.iter().any(|a| a.contains("--chunk-size")));
}
