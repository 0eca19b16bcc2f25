use crate::types::{
    BandArray, BandWindow, Crs, GeoError, GeoRaster, GeoResult, GeoTransform, PixelType,
    RasterCube, RasterGrid, RasterHeader,
};
use gdal::raster::{Buffer, GdalDataType, GdalType, RasterCreationOption};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, Driver, DriverManager};
use ndarray::{s, Array2};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoTiffOptions {
    /// Compression type: "LZW", "DEFLATE", "ZSTD"; None writes uncompressed
    pub compression: Option<String>,
    /// Write internally tiled TIFFs
    pub tiled: bool,
    /// Block size when tiled
    pub block_size: usize,
    /// BigTIFF for files > 4GB
    pub bigtiff: bool,
}

impl Default for GeoTiffOptions {
    fn default() -> Self {
        Self {
            compression: Some("LZW".to_string()),
            tiled: false,
            block_size: 256,
            bigtiff: false,
        }
    }
}

impl GeoTiffOptions {
    fn creation_options(&self) -> Vec<(&'static str, String)> {
        let mut options = Vec::new();
        if let Some(compression) = &self.compression {
            options.push(("COMPRESS", compression.clone()));
        }
        if self.tiled {
            options.push(("TILED", "YES".to_string()));
            options.push(("BLOCKXSIZE", self.block_size.to_string()));
            options.push(("BLOCKYSIZE", self.block_size.to_string()));
        }
        if self.bigtiff {
            options.push(("BIGTIFF", "YES".to_string()));
        }
        options
    }
}

/// Build a GDAL spatial reference for a CRS, with x = easting/longitude
pub fn spatial_ref_for(crs: &Crs) -> GeoResult<SpatialRef> {
    let srs = match crs {
        Crs::Epsg(code) => SpatialRef::from_epsg(*code)?,
        Crs::Definition(def) => SpatialRef::from_definition(def)?,
    };
    srs.set_axis_mapping_strategy(
        gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
    );
    Ok(srs)
}

fn crs_from_dataset(dataset: &Dataset) -> GeoResult<Crs> {
    let srs = dataset
        .spatial_ref()
        .map_err(|e| GeoError::InvalidFormat(format!("raster has no spatial reference: {}", e)))?;
    if let Ok(code) = srs.auth_code() {
        if code > 0 {
            return Ok(Crs::Epsg(code as u32));
        }
    }
    let wkt = srs.to_wkt()?;
    Ok(Crs::Definition(wkt))
}

fn pixel_type_from_gdal(data_type: GdalDataType) -> GeoResult<PixelType> {
    match data_type {
        GdalDataType::UInt8 => Ok(PixelType::U8),
        GdalDataType::UInt16 => Ok(PixelType::U16),
        GdalDataType::Int16 => Ok(PixelType::I16),
        GdalDataType::UInt32 => Ok(PixelType::U32),
        GdalDataType::Int32 => Ok(PixelType::I32),
        GdalDataType::Float32 => Ok(PixelType::F32),
        GdalDataType::Float64 => Ok(PixelType::F64),
        other => Err(GeoError::InvalidFormat(format!(
            "unsupported band data type {:?}",
            other
        ))),
    }
}

/// GDAL-backed raster reader
pub struct RasterReader;

impl RasterReader {
    /// Open a raster dataset (GeoTIFF, JPEG2000, anything GDAL reads)
    pub fn open<P: AsRef<Path>>(path: P) -> GeoResult<Dataset> {
        log::debug!("Opening raster: {}", path.as_ref().display());
        Ok(Dataset::open(path.as_ref())?)
    }

    /// Grid, band count, pixel type and nodata of an open dataset
    pub fn header(dataset: &Dataset) -> GeoResult<RasterHeader> {
        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count() as usize;
        if band_count == 0 || width == 0 || height == 0 {
            return Err(GeoError::InvalidFormat(format!(
                "raster is empty ({} bands, {}x{})",
                band_count, width, height
            )));
        }

        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let crs = crs_from_dataset(dataset)?;

        let first_band = dataset.rasterband(1)?;
        let pixel_type = pixel_type_from_gdal(first_band.band_type())?;
        let nodata = first_band.no_data_value();

        Ok(RasterHeader {
            grid: RasterGrid {
                width,
                height,
                transform,
                crs,
            },
            band_count,
            pixel_type,
            nodata,
        })
    }

    /// Probe a file's header; the dataset is closed before returning
    pub fn read_header<P: AsRef<Path>>(path: P) -> GeoResult<RasterHeader> {
        let dataset = Self::open(path)?;
        Self::header(&dataset)
    }

    /// Read every band of a file into memory
    pub fn read<P: AsRef<Path>>(path: P) -> GeoResult<GeoRaster> {
        log::info!("Reading raster from: {}", path.as_ref().display());
        let dataset = Self::open(path)?;
        Self::read_dataset(&dataset)
    }

    pub fn read_dataset(dataset: &Dataset) -> GeoResult<GeoRaster> {
        let header = Self::header(dataset)?;
        let window = BandWindow::new(0, 0, header.grid.width, header.grid.height);
        Self::read_window(dataset, &header, &window, None)
    }

    /// Read one band (1-based) fully
    pub fn read_band(dataset: &Dataset, band_index: usize) -> GeoResult<BandArray> {
        let (width, height) = dataset.raster_size();
        Self::read_band_window(dataset, band_index, &BandWindow::new(0, 0, width, height))
    }

    fn read_band_window(
        dataset: &Dataset,
        band_index: usize,
        window: &BandWindow,
    ) -> GeoResult<BandArray> {
        let rasterband = dataset.rasterband(band_index as isize)?;
        let band_data = rasterband.read_as::<f64>(
            (window.col_off as isize, window.row_off as isize),
            (window.width, window.height),
            (window.width, window.height),
            None,
        )?;

        Array2::from_shape_vec((window.height, window.width), band_data.data)
            .map_err(|e| GeoError::Processing(format!("Failed to reshape band data: {}", e)))
    }

    /// Windowed read, optionally restricted to 1-based `bands`
    pub fn read_window(
        dataset: &Dataset,
        header: &RasterHeader,
        window: &BandWindow,
        bands: Option<&[usize]>,
    ) -> GeoResult<GeoRaster> {
        let window = window
            .clip(header.grid.width, header.grid.height)
            .ok_or_else(|| {
                GeoError::GridComputation(format!("window {:?} lies outside the raster", window))
            })?;

        let all_bands: Vec<usize> = (1..=header.band_count).collect();
        let selected = bands.unwrap_or(&all_bands);
        for &band in selected {
            if band == 0 || band > header.band_count {
                return Err(GeoError::InputMismatch(format!(
                    "band {} requested but raster has {} bands",
                    band, header.band_count
                )));
            }
        }

        let mut cube = RasterCube::zeros((selected.len(), window.height, window.width));
        for (i, &band) in selected.iter().enumerate() {
            let data = Self::read_band_window(dataset, band, &window)?;
            cube.slice_mut(s![i, .., ..]).assign(&data);
        }

        GeoRaster::new(
            cube,
            header.grid.transform.window_transform(window.col_off, window.row_off),
            header.grid.crs.clone(),
            header.nodata,
            header.pixel_type,
        )
    }
}

/// GeoTIFF writer
pub struct RasterWriter;

impl RasterWriter {
    /// Write an in-memory raster as GeoTIFF
    pub fn write<P: AsRef<Path>>(
        raster: &GeoRaster,
        output_path: P,
        options: &GeoTiffOptions,
    ) -> GeoResult<()> {
        log::debug!(
            "Writing {}x{}x{} {} raster to {}",
            raster.width(),
            raster.height(),
            raster.band_count(),
            raster.pixel_type(),
            output_path.as_ref().display()
        );

        let header = raster.header();
        let mut dataset = Self::create(output_path, &header, options)?;
        for band in 0..raster.band_count() {
            Self::write_band(
                &mut dataset,
                band + 1,
                &raster.band(band).to_owned(),
                header.pixel_type,
            )?;
        }
        Ok(())
    }

    /// Create an empty GeoTIFF with georeferencing and nodata set on every band
    pub fn create<P: AsRef<Path>>(
        output_path: P,
        header: &RasterHeader,
        options: &GeoTiffOptions,
    ) -> GeoResult<Dataset> {
        if let Some(parent) = output_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let owned = options.creation_options();
        let creation_options: Vec<RasterCreationOption> = owned
            .iter()
            .map(|(key, value)| RasterCreationOption {
                key: *key,
                value: value.as_str(),
            })
            .collect();

        let path = output_path.as_ref();
        let grid = &header.grid;
        let bands = header.band_count;
        let mut dataset = match header.pixel_type {
            PixelType::U8 => create_typed::<u8>(&driver, path, grid, bands, &creation_options)?,
            PixelType::U16 => create_typed::<u16>(&driver, path, grid, bands, &creation_options)?,
            PixelType::I16 => create_typed::<i16>(&driver, path, grid, bands, &creation_options)?,
            PixelType::U32 => create_typed::<u32>(&driver, path, grid, bands, &creation_options)?,
            PixelType::I32 => create_typed::<i32>(&driver, path, grid, bands, &creation_options)?,
            PixelType::F32 => create_typed::<f32>(&driver, path, grid, bands, &creation_options)?,
            PixelType::F64 => create_typed::<f64>(&driver, path, grid, bands, &creation_options)?,
        };

        dataset.set_geo_transform(&grid.transform.to_gdal())?;
        dataset.set_spatial_ref(&spatial_ref_for(&grid.crs)?)?;

        if let Some(nodata) = header.nodata {
            if !(nodata.is_nan() && header.pixel_type.is_integer()) {
                for band in 1..=bands {
                    let mut rasterband = dataset.rasterband(band as isize)?;
                    rasterband.set_no_data_value(Some(nodata))?;
                }
            }
        }

        Ok(dataset)
    }

    /// Write a full band (1-based), quantized to `pixel_type`
    pub fn write_band(
        dataset: &mut Dataset,
        band_index: usize,
        data: &BandArray,
        pixel_type: PixelType,
    ) -> GeoResult<()> {
        match pixel_type {
            PixelType::U8 => write_typed::<u8>(dataset, band_index, data, pixel_type),
            PixelType::U16 => write_typed::<u16>(dataset, band_index, data, pixel_type),
            PixelType::I16 => write_typed::<i16>(dataset, band_index, data, pixel_type),
            PixelType::U32 => write_typed::<u32>(dataset, band_index, data, pixel_type),
            PixelType::I32 => write_typed::<i32>(dataset, band_index, data, pixel_type),
            PixelType::F32 => write_typed::<f32>(dataset, band_index, data, pixel_type),
            PixelType::F64 => write_typed::<f64>(dataset, band_index, data, pixel_type),
        }
    }
}

fn create_typed<T: GdalType>(
    driver: &Driver,
    path: &Path,
    grid: &RasterGrid,
    bands: usize,
    options: &[RasterCreationOption],
) -> GeoResult<Dataset> {
    Ok(driver.create_with_band_type_with_options::<T, _>(
        path,
        grid.width as isize,
        grid.height as isize,
        bands as isize,
        options,
    )?)
}

fn write_typed<T: GdalType + NumCast + Copy + Default>(
    dataset: &mut Dataset,
    band_index: usize,
    data: &BandArray,
    pixel_type: PixelType,
) -> GeoResult<()> {
    let (height, width) = data.dim();
    let values: Vec<T> = data
        .iter()
        .map(|&v| <T as NumCast>::from(pixel_type.quantize(v)).unwrap_or_default())
        .collect();

    let mut rasterband = dataset.rasterband(band_index as isize)?;
    let buffer = Buffer::new((width, height), values);
    rasterband.write((0, 0), (width, height), &buffer)?;
    Ok(())
}
