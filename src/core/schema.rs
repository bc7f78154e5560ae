use crate::io::{Band, FlagCoding, RasterDataset};
use crate::types::{
    OlciResult, ALT_OUT_OF_RANGE, ANOMALY_FLAGS_BAND_NAME, ANOM_SPECTRAL_MEASURE,
    MAX_SLOPE_BAND_NAME, MAX_SLOPE_INDEX_BAND_NAME, SLOPE_INDEX_NO_DATA,
};

/// Suffix appended to the input product name and type
const SUFFIX: &str = "_ANOM_FLAG";

/// Declare the output dataset: the input's bands, tie-point grids, geocoding,
/// metadata and time range, plus the anomaly bitmask band and, on request,
/// the two spectral slope diagnostic bands.
///
/// Band samples are copied by reference; target bands are declared with shape
/// only and materialized tile by tile by the engine. No pixel is computed
/// here.
pub fn build_output_schema(
    input: &RasterDataset,
    emit_diagnostics: bool,
) -> OlciResult<RasterDataset> {
    let mut output = RasterDataset::new(
        &format!("{}{}", input.name(), SUFFIX),
        &format!("{}{}", input.product_type(), SUFFIX),
        input.width(),
        input.height(),
    );
    output.set_description("OLCI anomaly flagged L1b");
    output.set_time_range(input.start_time(), input.stop_time());

    for band in input.bands() {
        output.add_band(band.clone())?;
    }
    for grid in input.tie_point_grids() {
        output.add_tie_point_grid(grid.clone())?;
    }
    if let Some(transform) = input.geo_transform() {
        output.set_geo_transform(*transform);
    }
    output.copy_metadata_from(input);

    let mut coding = FlagCoding::new(ANOMALY_FLAGS_BAND_NAME);
    coding.add_flag(
        "ANOM_SPECTRAL_MEASURE",
        ANOM_SPECTRAL_MEASURE,
        "Anomalous spectral sample due to saturation of single microbands",
    );
    coding.add_flag(
        "ALT_OUT_OF_RANGE",
        ALT_OUT_OF_RANGE,
        "Altitude values are out of nominal data range",
    );
    output.add_band(
        Band::declared_int8(ANOMALY_FLAGS_BAND_NAME)
            .with_description("Flags indicating OLCI data anomalies")
            .with_flag_coding(coding),
    )?;

    if emit_diagnostics {
        output.add_band(
            Band::declared_float64(MAX_SLOPE_BAND_NAME)
                .with_no_data(f64::NAN)
                .with_unit("1/nm")
                .with_description(
                    "Absolute value of maximal spectral slope for bands 1-12, 16-18, 21",
                ),
        )?;
        output.add_band(
            Band::declared_int8(MAX_SLOPE_INDEX_BAND_NAME)
                .with_no_data(SLOPE_INDEX_NO_DATA as f64)
                .with_description("Band index where the maximal slope is detected"),
        )?;
    }

    log::debug!(
        "Declared output dataset '{}' with {} bands",
        output.name(),
        output.bands().len()
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::complete_input;

    #[test]
    fn test_output_mirrors_input() {
        let mut input = complete_input(6, 4);
        input.set_metadata_entry("cycle", "068");
        input.set_geo_transform(crate::io::GeoTransform {
            top_left_x: 4.3,
            pixel_width: 0.003,
            rotation_x: 0.0,
            top_left_y: 52.1,
            rotation_y: 0.0,
            pixel_height: -0.003,
        });
        let output = build_output_schema(&input, false).unwrap();

        assert_eq!(output.name(), "test_scene_ANOM_FLAG");
        assert_eq!(output.product_type(), "OL_1_EFR_ANOM_FLAG");
        assert_eq!(output.width(), 6);
        assert_eq!(output.height(), 4);
        assert_eq!(output.metadata().get("cycle").map(String::as_str), Some("068"));
        assert!(output.contains_tie_point_grid("SZA"));
        let transform = output.geo_transform().expect("geocoding copied");
        assert_eq!(transform.top_left_x, 4.3);

        // All input bands present plus the bitmask band
        assert_eq!(output.bands().len(), input.bands().len() + 1);
        for band in input.bands() {
            assert!(output.contains_band(band.name()));
        }
    }

    #[test]
    fn test_bitmask_band_coding() {
        let input = complete_input(4, 4);
        let output = build_output_schema(&input, false).unwrap();

        let band = output.band("anomaly_flags").expect("bitmask band declared");
        assert!(!band.is_materialized());
        let coding = band.flag_coding().expect("bit coding attached");
        assert_eq!(coding.mask_for("ANOM_SPECTRAL_MEASURE"), Some(1));
        assert_eq!(coding.mask_for("ALT_OUT_OF_RANGE"), Some(2));
    }

    #[test]
    fn test_diagnostic_bands_on_request() {
        let input = complete_input(4, 4);

        let without = build_output_schema(&input, false).unwrap();
        assert!(!without.contains_band("max_spectral_slope"));
        assert!(!without.contains_band("max_slope_band_index"));

        let with = build_output_schema(&input, true).unwrap();
        let slope = with.band("max_spectral_slope").unwrap();
        assert_eq!(slope.unit(), Some("1/nm"));
        assert!(slope.no_data_used());
        assert!(slope.no_data().unwrap().is_nan());

        let index = with.band("max_slope_band_index").unwrap();
        assert_eq!(index.no_data(), Some(-1.0));
    }

    #[test]
    fn test_band_samples_shared_not_duplicated() {
        let input = complete_input(4, 4);
        let output = build_output_schema(&input, false).unwrap();

        // Copied bands are materialized views of the same samples
        let band = output.band("Oa01_radiance").unwrap();
        assert!(band.is_materialized());
    }
}
