mod common;

use approx::assert_relative_eq;
use common::{init_logging, ramp_raster, write};
use geopatch::core::reproject::{Aligner, Resampling};
use geopatch::io::build_stamp::BuildOutcome;
use geopatch::io::raster_io::RasterReader;
use geopatch::types::{Crs, GeoTransform, RasterGrid};
use tempfile::TempDir;

const ORIGIN: (f64, f64) = (500_000.0, 4_100_000.0);

#[test]
fn test_match_to_reference_grid_same_crs() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("B05_20m.tif");
    let reference_path = dir.path().join("B02_10m.tif");
    write(&ramp_raster(30, 30, 1, ORIGIN, 20.0), &source_path);
    write(&ramp_raster(60, 60, 1, ORIGIN, 10.0), &reference_path);

    let output = dir.path().join("B05_aligned.tif");
    let outcome = Aligner::new()
        .reproject_file_to_match(&source_path, &reference_path, &output, Resampling::Nearest)
        .unwrap();
    assert_eq!(outcome, BuildOutcome::Built);

    let reference = RasterReader::read_header(&reference_path).unwrap();
    let aligned = RasterReader::read(&output).unwrap();
    assert_eq!(aligned.grid(), reference.grid);

    // Each 20 m source pixel now covers 2x2 output pixels
    let source = RasterReader::read(&source_path).unwrap();
    assert_eq!(aligned.band(0)[[21, 41]], source.band(0)[[10, 20]]);
}

#[test]
fn test_reproject_to_geographic() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("utm.tif");
    write(&ramp_raster(64, 64, 1, ORIGIN, 10.0), &source_path);

    let output = dir.path().join("wgs84.tif");
    Aligner::new()
        .reproject_file(&source_path, &output, &Crs::wgs84(), Resampling::Bilinear)
        .unwrap();

    let aligned = RasterReader::read_header(&output).unwrap();
    assert_eq!(aligned.grid.crs, Crs::Epsg(4326));
    let bounds = aligned.grid.bounds();
    // Easting 500000 is the zone 18 central meridian
    assert_relative_eq!(bounds.min_x, -75.0, epsilon = 1e-3);
    assert!(bounds.max_y > 37.0 && bounds.max_y < 37.1);

    let (res_x, res_y) = aligned.grid.transform.resolution();
    assert_eq!(res_x, res_y);
    assert!(res_x > 5e-5 && res_x < 2e-4);
}

#[test]
fn test_cross_crs_match_adopts_reference_exactly() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("utm.tif");
    write(&ramp_raster(64, 64, 1, ORIGIN, 10.0), &source_path);

    let source = RasterReader::read(&source_path).unwrap();
    let reference = RasterGrid {
        width: 40,
        height: 30,
        transform: GeoTransform::north_up(-75.0, 37.04, 0.0001, 0.0001),
        crs: Crs::wgs84(),
    };
    let aligned = Aligner::new()
        .reproject_to_match(&source, &reference, Resampling::Bilinear)
        .unwrap();
    assert_eq!(aligned.grid(), reference);
    assert_eq!(aligned.band_count(), 1);
}

#[test]
fn test_reprojection_is_stamped() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("utm.tif");
    write(&ramp_raster(32, 32, 1, ORIGIN, 10.0), &source_path);
    let output = dir.path().join("aligned.tif");
    let target = Crs::Epsg(32618);

    let aligner = Aligner::new().with_resolution(Some(20.0));
    assert_eq!(
        aligner.reproject_file(&source_path, &output, &target, Resampling::Bilinear).unwrap(),
        BuildOutcome::Built
    );
    assert_eq!(
        aligner.reproject_file(&source_path, &output, &target, Resampling::Bilinear).unwrap(),
        BuildOutcome::UpToDate
    );
    assert_eq!(
        aligner.reproject_file(&source_path, &output, &target, Resampling::Nearest).unwrap(),
        BuildOutcome::Built
    );

    let aligned = RasterReader::read_header(&output).unwrap();
    assert_eq!((aligned.grid.width, aligned.grid.height), (16, 16));
}
