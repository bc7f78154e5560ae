use crate::io::RasterDataset;
use crate::types::{
    OlciError, OlciResult, SpectralBandSet, ALTITUDE_BAND_NAME, SZA_GRID_NAME,
};

/// Check that an input dataset carries everything the anomaly engine reads:
/// radiance, solar flux and center wavelength bands for every spectral index
/// of the band set, the altitude band, and the SZA tie-point grid.
///
/// Fails on the first missing variable with an error naming it; performs no
/// other work, so it is safe to call before any tile is requested.
pub fn validate_input(input: &RasterDataset, bands: &SpectralBandSet) -> OlciResult<()> {
    log::debug!(
        "Validating input dataset '{}' against {} spectral bands",
        input.name(),
        bands.len()
    );

    for &index in bands.indices() {
        check_band(input, &SpectralBandSet::radiance_band_name(index))?;
    }
    for &index in bands.indices() {
        check_band(input, &SpectralBandSet::solar_flux_band_name(index))?;
    }
    for &index in bands.indices() {
        check_band(input, &SpectralBandSet::lambda0_band_name(index))?;
    }

    check_band(input, ALTITUDE_BAND_NAME)?;

    if !input.contains_tie_point_grid(SZA_GRID_NAME) {
        return Err(OlciError::MissingInput(SZA_GRID_NAME.to_string()));
    }

    Ok(())
}

fn check_band(input: &RasterDataset, name: &str) -> OlciResult<()> {
    if !input.contains_band(name) {
        return Err(OlciError::MissingInput(name.to_string()));
    }
    Ok(())
}
