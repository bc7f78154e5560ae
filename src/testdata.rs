//! Test data generation utilities.
//!
//! Builds small synthetic OLCI-style scenes with known sample values for unit
//! and integration tests. Scenes are fully populated by default (all radiance,
//! solar flux and lambda0 bands, altitude and the SZA tie-point grid) so tests
//! start from a valid input and remove or perturb what they need.

use crate::io::{Band, RasterDataset, TiePointGrid};
use crate::types::{RasterGrid, SpectralBandSet, ALTITUDE_BAND_NAME, SZA_GRID_NAME};
use ndarray::Array2;

/// Nominal OLCI center wavelength in nm for a spectral band index
pub fn olci_center_wavelength(index: u32) -> f64 {
    match index {
        1 => 400.0,
        2 => 412.5,
        3 => 442.5,
        4 => 490.0,
        5 => 510.0,
        6 => 560.0,
        7 => 620.0,
        8 => 665.0,
        9 => 673.75,
        10 => 681.25,
        11 => 708.75,
        12 => 753.75,
        13 => 761.25,
        14 => 764.375,
        15 => 767.5,
        16 => 778.75,
        17 => 865.0,
        18 => 885.0,
        19 => 900.0,
        20 => 940.0,
        21 => 1020.0,
        _ => 400.0 + 30.0 * index as f64,
    }
}

/// Builder for synthetic test scenes.
///
/// Defaults: radiance 10.0 everywhere, solar flux 100.0, lambda0 at the
/// nominal OLCI center wavelengths, altitude 0.0, SZA 0 degrees on a coarse
/// tie-point grid. With those values every pixel converts to a flat
/// reflectance of 0.1 * PI and no anomaly is flagged.
pub struct SceneBuilder {
    width: usize,
    height: usize,
    bands: SpectralBandSet,
    radiance: Vec<RasterGrid>,
    solar_flux: f64,
    sza_degrees: f64,
    altitude: RasterGrid,
}

impl SceneBuilder {
    pub fn new(width: usize, height: usize) -> Self {
        let bands = SpectralBandSet::olci_anomaly_bands();
        let radiance = bands
            .indices()
            .iter()
            .map(|_| Array2::from_elem((height, width), 10.0))
            .collect();
        Self {
            width,
            height,
            bands,
            radiance,
            solar_flux: 100.0,
            sza_degrees: 0.0,
            altitude: Array2::zeros((height, width)),
        }
    }

    /// Overwrite one radiance sample; `index` is the true spectral index
    pub fn radiance_sample(mut self, index: u32, x: usize, y: usize, value: f64) -> Self {
        let position = self
            .bands
            .indices()
            .iter()
            .position(|&i| i == index)
            .unwrap_or_else(|| panic!("band {} not in test band set", index));
        self.radiance[position][[y, x]] = value;
        self
    }

    /// Overwrite one altitude sample
    pub fn altitude_sample(mut self, x: usize, y: usize, value: f64) -> Self {
        self.altitude[[y, x]] = value;
        self
    }

    /// Set the uniform solar zenith angle in degrees
    pub fn sza_degrees(mut self, degrees: f64) -> Self {
        self.sza_degrees = degrees;
        self
    }

    /// Set the uniform solar flux
    pub fn solar_flux(mut self, flux: f64) -> Self {
        self.solar_flux = flux;
        self
    }

    pub fn build(self) -> RasterDataset {
        self.build_inner(true)
    }

    /// Build a scene lacking the SZA tie-point grid (for validator tests)
    pub fn build_without_sza(self) -> RasterDataset {
        self.build_inner(false)
    }

    fn build_inner(self, with_sza: bool) -> RasterDataset {
        let mut dataset = RasterDataset::new("test_scene", "OL_1_EFR", self.width, self.height);

        for (position, &index) in self.bands.indices().iter().enumerate() {
            dataset
                .add_float_band(
                    &SpectralBandSet::radiance_band_name(index),
                    self.radiance[position].clone(),
                )
                .unwrap();
            dataset
                .add_float_band(
                    &SpectralBandSet::solar_flux_band_name(index),
                    Array2::from_elem((self.height, self.width), self.solar_flux),
                )
                .unwrap();
            dataset
                .add_float_band(
                    &SpectralBandSet::lambda0_band_name(index),
                    Array2::from_elem((self.height, self.width), olci_center_wavelength(index)),
                )
                .unwrap();
        }

        dataset
            .add_float_band(ALTITUDE_BAND_NAME, self.altitude)
            .unwrap();

        if with_sza {
            // Coarse 2x2 tie-point grid spanning the scene
            let sza = Array2::from_elem((2, 2), self.sza_degrees);
            let subsampling_x = (self.width.max(2) - 1) as f64;
            let subsampling_y = (self.height.max(2) - 1) as f64;
            dataset
                .add_tie_point_grid(
                    TiePointGrid::new(SZA_GRID_NAME, 0.0, 0.0, subsampling_x, subsampling_y, sza)
                        .unwrap(),
                )
                .unwrap();
        }

        dataset
    }
}

/// Fully populated input scene with flat default samples
pub fn complete_input(width: usize, height: usize) -> RasterDataset {
    SceneBuilder::new(width, height).build()
}

/// Fully populated input scene minus the SZA tie-point grid
pub fn complete_input_without_sza(width: usize, height: usize) -> RasterDataset {
    SceneBuilder::new(width, height).build_without_sza()
}

/// Copy a dataset, leaving out the named band. Band samples are shared, not
/// duplicated.
pub fn rebuild_without_band(input: &RasterDataset, skip: &str) -> RasterDataset {
    let mut dataset = RasterDataset::new(
        input.name(),
        input.product_type(),
        input.width(),
        input.height(),
    );
    dataset.set_time_range(input.start_time(), input.stop_time());
    for band in input.bands() {
        if band.name() != skip {
            dataset.add_band(Band::clone(band)).unwrap();
        }
    }
    for grid in input.tie_point_grids() {
        dataset.add_tie_point_grid(grid.clone()).unwrap();
    }
    dataset.copy_metadata_from(input);
    dataset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::TileSource;
    use crate::types::Rectangle;

    #[test]
    fn test_complete_input_has_all_bands() {
        let input = complete_input(6, 4);
        assert!(input.contains_band("Oa01_radiance"));
        assert!(input.contains_band("Oa21_radiance"));
        assert!(input.contains_band("solar_flux_band_16"));
        assert!(input.contains_band("lambda0_band_21"));
        assert!(input.contains_band("altitude"));
        assert!(input.contains_tie_point_grid("SZA"));
        // 16 bands x 3 variables + altitude
        assert_eq!(input.bands().len(), 49);
    }

    #[test]
    fn test_sza_interpolates_to_uniform_value() {
        let input = SceneBuilder::new(6, 4).sza_degrees(60.0).build();
        let tile = input
            .grid_tile("SZA", &Rectangle::new(0, 0, 6, 4))
            .unwrap();
        for value in tile.iter() {
            assert!((value - 60.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rebuild_without_band_drops_only_target() {
        let input = complete_input(4, 4);
        let rebuilt = rebuild_without_band(&input, "Oa05_radiance");
        assert!(!rebuilt.contains_band("Oa05_radiance"));
        assert!(rebuilt.contains_band("Oa04_radiance"));
        assert_eq!(rebuilt.bands().len(), input.bands().len() - 1);
    }
}
