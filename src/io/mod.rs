//! Raster data access: dataset container, bands and tie-point grids

pub mod dataset;
pub mod tiepoint;

pub use dataset::{Band, BandData, FlagCoding, GeoTransform, RasterDataset, TileSource};
pub use tiepoint::TiePointGrid;
