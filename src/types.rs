use ndarray::{s, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// In-memory sample type for every raster band; exact for every [`PixelType`]
pub type Sample = f64;

/// 2D single-band array (row x col)
pub type BandArray = Array2<Sample>;

/// 3D multi-band array (band x row x col)
pub type RasterCube = Array3<Sample>;

/// Coordinate reference system of a raster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Crs {
    /// EPSG authority code, e.g. 4326
    Epsg(u32),
    /// Any other definition GDAL understands (WKT, PROJ string)
    Definition(String),
}

impl Crs {
    /// WGS-84 geographic coordinates
    pub fn wgs84() -> Self {
        Crs::Epsg(4326)
    }

    pub fn epsg(&self) -> Option<u32> {
        match self {
            Crs::Epsg(code) => Some(*code),
            Crs::Definition(_) => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Definition(def) => write!(f, "{}", def),
        }
    }
}

impl FromStr for Crs {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(GeoError::Config("empty CRS definition".to_string()));
        }
        if let Some(code) = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
        {
            let code = code
                .parse::<u32>()
                .map_err(|e| GeoError::Config(format!("invalid EPSG code '{}': {}", code, e)))?;
            return Ok(Crs::Epsg(code));
        }
        Ok(Crs::Definition(trimmed.to_string()))
    }
}

/// Persisted per-pixel numeric type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl PixelType {
    pub fn is_integer(&self) -> bool {
        !matches!(self, PixelType::F32 | PixelType::F64)
    }

    /// Representable range of the type
    pub fn range(&self) -> (f64, f64) {
        match self {
            PixelType::U8 => (u8::MIN as f64, u8::MAX as f64),
            PixelType::U16 => (u16::MIN as f64, u16::MAX as f64),
            PixelType::I16 => (i16::MIN as f64, i16::MAX as f64),
            PixelType::U32 => (u32::MIN as f64, u32::MAX as f64),
            PixelType::I32 => (i32::MIN as f64, i32::MAX as f64),
            PixelType::F32 => (f32::MIN as f64, f32::MAX as f64),
            PixelType::F64 => (f64::MIN, f64::MAX),
        }
    }

    /// Round and clamp a sample to what this type can hold.
    /// NaN is passed through; integer writers map it to zero.
    pub fn quantize(&self, value: f64) -> f64 {
        if value.is_nan() {
            return value;
        }
        let (lo, hi) = self.range();
        let v = if self.is_integer() { value.round() } else { value };
        v.clamp(lo, hi)
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelType::U8 => "UInt8",
            PixelType::U16 => "UInt16",
            PixelType::I16 => "Int16",
            PixelType::U32 => "UInt32",
            PixelType::I32 => "Int32",
            PixelType::F32 => "Float32",
            PixelType::F64 => "Float64",
        };
        write!(f, "{}", name)
    }
}

/// Geospatial bounding box in CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Finite and non-empty in both axes
    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.width() > 0.0
            && self.height() > 0.0
    }
}

/// Affine pixel -> world mapping, GDAL coefficient order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square or rectangular pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0
    }

    /// Absolute pixel size (x, y)
    pub fn resolution(&self) -> (f64, f64) {
        (self.pixel_width.abs(), self.pixel_height.abs())
    }

    fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y
    }

    /// Finite coefficients and an invertible linear part
    pub fn is_invertible(&self) -> bool {
        self.to_gdal().iter().all(|v| v.is_finite()) && self.determinant().abs() > f64::EPSILON
    }

    /// World coordinates of a (fractional) pixel position
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Inverse mapping, usable for many lookups against the same grid
    pub fn inverse(&self) -> GeoResult<InverseTransform> {
        if !self.is_invertible() {
            return Err(GeoError::GridComputation(format!(
                "transform is not invertible: {:?}",
                self.to_gdal()
            )));
        }
        let det = self.determinant();
        Ok(InverseTransform {
            origin_x: self.top_left_x,
            origin_y: self.top_left_y,
            a: self.pixel_height / det,
            b: -self.rotation_x / det,
            c: -self.rotation_y / det,
            d: self.pixel_width / det,
        })
    }

    /// Transform of a sub-window whose origin sits at (col_off, row_off)
    pub fn window_transform(&self, col_off: usize, row_off: usize) -> GeoTransform {
        let (x, y) = self.pixel_to_world(col_off as f64, row_off as f64);
        GeoTransform {
            top_left_x: x,
            top_left_y: y,
            ..*self
        }
    }

    /// Bounds of a width x height grid under this transform
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        let corners = [
            self.pixel_to_world(0.0, 0.0),
            self.pixel_to_world(width as f64, 0.0),
            self.pixel_to_world(0.0, height as f64),
            self.pixel_to_world(width as f64, height as f64),
        ];
        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }
}

/// Precomputed world -> pixel mapping
#[derive(Debug, Clone, Copy)]
pub struct InverseTransform {
    origin_x: f64,
    origin_y: f64,
    a: f64,
    b: f64,
    c: f64,
    d: f64,
}

impl InverseTransform {
    /// Fractional (col, row) of a world coordinate
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.origin_x;
        let dy = y - self.origin_y;
        (self.a * dx + self.b * dy, self.c * dx + self.d * dy)
    }
}

/// Pixel grid placed in a CRS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl RasterGrid {
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// Describe the first attribute that differs from `other`
    pub fn difference(&self, other: &RasterGrid) -> Option<String> {
        if self.width != other.width || self.height != other.height {
            return Some(format!(
                "size {}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            ));
        }
        if self.crs != other.crs {
            return Some(format!("CRS {} vs {}", self.crs, other.crs));
        }
        if self.transform != other.transform {
            return Some(format!(
                "transform {:?} vs {:?}",
                self.transform.to_gdal(),
                other.transform.to_gdal()
            ));
        }
        None
    }
}

/// Raster metadata probed without reading pixel data
#[derive(Debug, Clone, PartialEq)]
pub struct RasterHeader {
    pub grid: RasterGrid,
    pub band_count: usize,
    pub pixel_type: PixelType,
    pub nodata: Option<f64>,
}

/// Sub-rectangle of a raster's pixel grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BandWindow {
    pub row_off: usize,
    pub col_off: usize,
    pub width: usize,
    pub height: usize,
}

impl BandWindow {
    pub fn new(row_off: usize, col_off: usize, width: usize, height: usize) -> Self {
        Self {
            row_off,
            col_off,
            width,
            height,
        }
    }

    /// Clip to a width x height parent; None if nothing is left
    pub fn clip(&self, width: usize, height: usize) -> Option<BandWindow> {
        if self.col_off >= width || self.row_off >= height {
            return None;
        }
        let clipped = BandWindow {
            row_off: self.row_off,
            col_off: self.col_off,
            width: self.width.min(width - self.col_off),
            height: self.height.min(height - self.row_off),
        };
        if clipped.width == 0 || clipped.height == 0 {
            None
        } else {
            Some(clipped)
        }
    }

    pub fn is_full(&self, size: usize) -> bool {
        self.width == size && self.height == size
    }
}

/// Georeferenced raster held in memory
#[derive(Debug, Clone)]
pub struct GeoRaster {
    data: RasterCube,
    transform: GeoTransform,
    crs: Crs,
    nodata: Option<f64>,
    pixel_type: PixelType,
}

impl GeoRaster {
    /// Create a raster, rejecting empty grids and non-invertible transforms
    pub fn new(
        data: RasterCube,
        transform: GeoTransform,
        crs: Crs,
        nodata: Option<f64>,
        pixel_type: PixelType,
    ) -> GeoResult<Self> {
        let (bands, height, width) = data.dim();
        if bands == 0 || height == 0 || width == 0 {
            return Err(GeoError::GridComputation(format!(
                "raster must not be empty (bands={}, {}x{})",
                bands, width, height
            )));
        }
        if !transform.is_invertible() {
            return Err(GeoError::GridComputation(format!(
                "degenerate transform {:?}",
                transform.to_gdal()
            )));
        }
        Ok(Self {
            data,
            transform,
            crs,
            nodata,
            pixel_type,
        })
    }

    /// Single-band convenience constructor
    pub fn from_band(
        band: BandArray,
        transform: GeoTransform,
        crs: Crs,
        nodata: Option<f64>,
        pixel_type: PixelType,
    ) -> GeoResult<Self> {
        let (rows, cols) = band.dim();
        let data = band
            .into_shape((1, rows, cols))
            .map_err(|e| GeoError::Processing(format!("Failed to reshape band: {}", e)))?;
        Self::new(data, transform, crs, nodata, pixel_type)
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn data(&self) -> &RasterCube {
        &self.data
    }

    pub fn into_data(self) -> RasterCube {
        self.data
    }

    /// Band view, 0-based
    pub fn band(&self, index: usize) -> ArrayView2<'_, Sample> {
        self.data.slice(s![index, .., ..])
    }

    pub fn grid(&self) -> RasterGrid {
        RasterGrid {
            width: self.width(),
            height: self.height(),
            transform: self.transform,
            crs: self.crs.clone(),
        }
    }

    pub fn header(&self) -> RasterHeader {
        RasterHeader {
            grid: self.grid(),
            band_count: self.band_count(),
            pixel_type: self.pixel_type,
            nodata: self.nodata,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width(), self.height())
    }

    /// True if `value` is this raster's nodata marker (NaN always counts)
    pub fn is_nodata(&self, value: Sample) -> bool {
        is_nodata(value, self.nodata)
    }

    /// Copy of a window with a correspondingly shifted transform
    pub fn window(&self, window: &BandWindow) -> GeoResult<GeoRaster> {
        let clipped = window.clip(self.width(), self.height()).ok_or_else(|| {
            GeoError::GridComputation(format!("window {:?} lies outside the raster", window))
        })?;
        let data = self
            .data
            .slice(s![
                ..,
                clipped.row_off..clipped.row_off + clipped.height,
                clipped.col_off..clipped.col_off + clipped.width
            ])
            .to_owned();
        GeoRaster::new(
            data,
            self.transform.window_transform(clipped.col_off, clipped.row_off),
            self.crs.clone(),
            self.nodata,
            self.pixel_type,
        )
    }
}

/// Shared nodata test; NaN samples are never valid
pub fn is_nodata(value: Sample, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) if nd.is_nan() => false,
        Some(nd) => value == nd,
        None => false,
    }
}

/// Error types for raster pipeline stages
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Grid computation error: {0}")]
    GridComputation(String),

    #[error("Input mismatch: {0}")]
    InputMismatch(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Invalid tiling parameters: {0}")]
    InvalidTilingParameters(String),

    #[error("Resource exhausted while opening {}: {reason}", path.display())]
    ResourceExhausted { path: PathBuf, reason: String },

    #[error("Manifest error: {0}")]
    Manifest(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for raster operations
pub type GeoResult<T> = Result<T, GeoError>;
