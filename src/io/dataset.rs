use crate::io::tiepoint::TiePointGrid;
use crate::types::{FlagGrid, OlciError, OlciResult, RasterGrid, Rectangle};
use chrono::{DateTime, Utc};
use ndarray::s;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Named bit within a flag band's sample coding
#[derive(Debug, Clone)]
pub struct FlagEntry {
    pub name: String,
    pub mask: i8,
    pub description: String,
}

/// Bit-coding table attached to a flag band
#[derive(Debug, Clone)]
pub struct FlagCoding {
    name: String,
    flags: Vec<FlagEntry>,
}

impl FlagCoding {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flags: Vec::new(),
        }
    }

    pub fn add_flag(&mut self, name: &str, mask: i8, description: &str) {
        self.flags.push(FlagEntry {
            name: name.to_string(),
            mask,
            description: description.to_string(),
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> &[FlagEntry] {
        &self.flags
    }

    /// Bit mask registered under a flag name
    pub fn mask_for(&self, flag_name: &str) -> Option<i8> {
        self.flags
            .iter()
            .find(|f| f.name == flag_name)
            .map(|f| f.mask)
    }
}

/// Affine geocoding transform (pixel to map coordinates)
#[derive(Debug, Clone, Copy)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

/// Typed band samples; shared by reference so copying a band into an output
/// product does not duplicate the pixel data
#[derive(Debug, Clone)]
pub enum BandData {
    Float64(Arc<RasterGrid>),
    Int8(Arc<FlagGrid>),
}

impl BandData {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            BandData::Float64(grid) => grid.dim(),
            BandData::Int8(grid) => grid.dim(),
        }
    }
}

/// Named 2D grid of per-pixel samples within a raster dataset.
///
/// Source bands carry their samples; target bands start as declarations
/// (shape only) and are materialized tile by tile.
#[derive(Debug, Clone)]
pub struct Band {
    name: String,
    unit: Option<String>,
    description: Option<String>,
    no_data: Option<f64>,
    no_data_used: bool,
    flag_coding: Option<Arc<FlagCoding>>,
    data: Option<BandData>,
}

impl Band {
    pub fn float64(name: &str, data: RasterGrid) -> Self {
        Self {
            name: name.to_string(),
            unit: None,
            description: None,
            no_data: None,
            no_data_used: false,
            flag_coding: None,
            data: Some(BandData::Float64(Arc::new(data))),
        }
    }

    pub fn int8(name: &str, data: FlagGrid) -> Self {
        Self {
            name: name.to_string(),
            unit: None,
            description: None,
            no_data: None,
            no_data_used: false,
            flag_coding: None,
            data: Some(BandData::Int8(Arc::new(data))),
        }
    }

    /// Declare a float band whose samples are produced later
    pub fn declared_float64(name: &str) -> Self {
        Self {
            name: name.to_string(),
            unit: None,
            description: None,
            no_data: None,
            no_data_used: false,
            flag_coding: None,
            data: None,
        }
    }

    /// Declare an 8-bit integer band whose samples are produced later
    pub fn declared_int8(name: &str) -> Self {
        Self {
            name: name.to_string(),
            unit: None,
            description: None,
            no_data: None,
            no_data_used: false,
            flag_coding: None,
            data: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.no_data = Some(no_data);
        self.no_data_used = true;
        self
    }

    pub fn with_flag_coding(mut self, coding: FlagCoding) -> Self {
        self.flag_coding = Some(Arc::new(coding));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn no_data(&self) -> Option<f64> {
        self.no_data
    }

    pub fn no_data_used(&self) -> bool {
        self.no_data_used
    }

    pub fn flag_coding(&self) -> Option<&FlagCoding> {
        self.flag_coding.as_deref()
    }

    pub fn data(&self) -> Option<&BandData> {
        self.data.as_ref()
    }

    /// Whether the band's samples have been materialized
    pub fn is_materialized(&self) -> bool {
        self.data.is_some()
    }
}

/// Rectangular window access to named bands and tie-point grids, plus the
/// cooperative cancellation check polled by the engine at row granularity
pub trait TileSource: Sync {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Samples of a band over a rectangle, converted to f64
    fn band_tile(&self, band_name: &str, rect: &Rectangle) -> OlciResult<RasterGrid>;

    /// Interpolated samples of a tie-point grid over a rectangle
    fn grid_tile(&self, grid_name: &str, rect: &Rectangle) -> OlciResult<RasterGrid>;

    fn is_cancelled(&self) -> bool;
}

/// Named collection of bands and tie-point grids sharing one spatial extent,
/// plus metadata, geocoding and acquisition time range.
///
/// Mirrors the data model of OLCI L1b products: full-resolution measurement
/// bands plus coarse angle grids. Also serves as the output container, where
/// target bands are declared first and materialized tile by tile.
#[derive(Debug)]
pub struct RasterDataset {
    name: String,
    product_type: String,
    description: Option<String>,
    width: usize,
    height: usize,
    start_time: Option<DateTime<Utc>>,
    stop_time: Option<DateTime<Utc>>,
    bands: Vec<Band>,
    tie_point_grids: Vec<TiePointGrid>,
    geo_transform: Option<GeoTransform>,
    metadata: HashMap<String, String>,
    cancelled: Arc<AtomicBool>,
    finalized: bool,
}

impl RasterDataset {
    pub fn new(name: &str, product_type: &str, width: usize, height: usize) -> Self {
        Self {
            name: name.to_string(),
            product_type: product_type.to_string(),
            description: None,
            width,
            height,
            start_time: None,
            stop_time: None,
            bands: Vec::new(),
            tie_point_grids: Vec::new(),
            geo_transform: None,
            metadata: HashMap::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            finalized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn product_type(&self) -> &str {
        &self.product_type
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = Some(description.to_string());
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }

    pub fn set_time_range(
        &mut self,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
    ) {
        self.start_time = start;
        self.stop_time = stop;
    }

    pub fn geo_transform(&self) -> Option<&GeoTransform> {
        self.geo_transform.as_ref()
    }

    pub fn set_geo_transform(&mut self, transform: GeoTransform) {
        self.geo_transform = Some(transform);
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn set_metadata_entry(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    pub fn copy_metadata_from(&mut self, other: &RasterDataset) {
        for (key, value) in &other.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
    }

    /// Add a band; its shape (when materialized) must match the scene extent
    pub fn add_band(&mut self, band: Band) -> OlciResult<()> {
        self.ensure_mutable()?;
        if self.contains_band(band.name()) {
            return Err(OlciError::Processing(format!(
                "Band '{}' already present in dataset '{}'",
                band.name(),
                self.name
            )));
        }
        if let Some(data) = band.data() {
            let (rows, cols) = data.dim();
            if rows != self.height || cols != self.width {
                return Err(OlciError::Processing(format!(
                    "Band '{}' shape {}x{} does not match scene extent {}x{}",
                    band.name(),
                    cols,
                    rows,
                    self.width,
                    self.height
                )));
            }
        }
        self.bands.push(band);
        Ok(())
    }

    /// Convenience: add a float band from a sample grid
    pub fn add_float_band(&mut self, name: &str, data: RasterGrid) -> OlciResult<()> {
        self.add_band(Band::float64(name, data))
    }

    pub fn add_tie_point_grid(&mut self, grid: TiePointGrid) -> OlciResult<()> {
        self.ensure_mutable()?;
        if self.contains_tie_point_grid(grid.name()) {
            return Err(OlciError::Processing(format!(
                "Tie point grid '{}' already present in dataset '{}'",
                grid.name(),
                self.name
            )));
        }
        self.tie_point_grids.push(grid);
        Ok(())
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn tie_point_grids(&self) -> &[TiePointGrid] {
        &self.tie_point_grids
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.name() == name)
    }

    pub fn tie_point_grid(&self, name: &str) -> Option<&TiePointGrid> {
        self.tie_point_grids.iter().find(|g| g.name() == name)
    }

    pub fn contains_band(&self, name: &str) -> bool {
        self.band(name).is_some()
    }

    pub fn contains_tie_point_grid(&self, name: &str) -> bool {
        self.tie_point_grid(name).is_some()
    }

    /// Materialize a declared band's samples
    pub fn set_band_data(&mut self, name: &str, data: BandData) -> OlciResult<()> {
        self.ensure_mutable()?;
        let (rows, cols) = data.dim();
        if rows != self.height || cols != self.width {
            return Err(OlciError::Processing(format!(
                "Samples for band '{}' have shape {}x{}, scene extent is {}x{}",
                name, cols, rows, self.width, self.height
            )));
        }
        let band = self
            .bands
            .iter_mut()
            .find(|b| b.name() == name)
            .ok_or_else(|| OlciError::MissingInput(name.to_string()))?;
        band.data = Some(data);
        Ok(())
    }

    /// Mark the dataset read-only; further structural changes are rejected
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn ensure_mutable(&self) -> OlciResult<()> {
        if self.finalized {
            return Err(OlciError::Processing(format!(
                "Dataset '{}' is finalized",
                self.name
            )));
        }
        Ok(())
    }

    /// Token checked by `is_cancelled`; shared so a controlling thread can
    /// request an abort while tiles are being computed
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn check_rect(&self, rect: &Rectangle) -> OlciResult<()> {
        if rect.width == 0 || rect.height == 0 {
            return Err(OlciError::Processing(format!(
                "Empty tile rectangle {}",
                rect
            )));
        }
        if rect.right() > self.width || rect.bottom() > self.height {
            return Err(OlciError::Processing(format!(
                "Tile rectangle {} exceeds scene extent {}x{}",
                rect, self.width, self.height
            )));
        }
        Ok(())
    }
}

impl TileSource for RasterDataset {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn band_tile(&self, band_name: &str, rect: &Rectangle) -> OlciResult<RasterGrid> {
        self.check_rect(rect)?;
        let band = self
            .band(band_name)
            .ok_or_else(|| OlciError::MissingInput(band_name.to_string()))?;
        let data = band
            .data()
            .ok_or_else(|| OlciError::MissingInput(band_name.to_string()))?;

        let window = s![rect.y..rect.bottom(), rect.x..rect.right()];
        match data {
            BandData::Float64(grid) => Ok(grid.slice(window).to_owned()),
            BandData::Int8(grid) => Ok(grid.slice(window).mapv(|v| v as f64)),
        }
    }

    fn grid_tile(&self, grid_name: &str, rect: &Rectangle) -> OlciResult<RasterGrid> {
        self.check_rect(rect)?;
        let grid = self
            .tie_point_grid(grid_name)
            .ok_or_else(|| OlciError::MissingInput(grid_name.to_string()))?;
        Ok(grid.tile(rect))
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
