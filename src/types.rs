use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Real-valued raster samples (radiance, reflectance, flux, wavelength)
pub type RasterSample = f64;

/// 2D grid of real-valued samples (rows x columns)
pub type RasterGrid = Array2<RasterSample>;

/// 2D grid of per-pixel flag values
pub type FlagGrid = Array2<i8>;

/// Flag mask bit marking an anomalous spectral sample (microband saturation)
pub const ANOM_SPECTRAL_MEASURE: i8 = 1;

/// Flag mask bit marking altitude samples outside the nominal data range
pub const ALT_OUT_OF_RANGE: i8 = 2;

/// Name of the altitude band in OLCI L1b products
pub const ALTITUDE_BAND_NAME: &str = "altitude";

/// Name of the solar zenith angle tie-point grid
pub const SZA_GRID_NAME: &str = "SZA";

/// Name of the output bitmask band
pub const ANOMALY_FLAGS_BAND_NAME: &str = "anomaly_flags";

/// Name of the optional maximum-slope diagnostic band
pub const MAX_SLOPE_BAND_NAME: &str = "max_spectral_slope";

/// Name of the optional slope band-index diagnostic band
pub const MAX_SLOPE_INDEX_BAND_NAME: &str = "max_slope_band_index";

/// No-data value for the slope band-index diagnostic
pub const SLOPE_INDEX_NO_DATA: i8 = -1;

/// Rectangular window into a band's samples, the unit of work for the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rectangle {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// First column beyond the right edge
    pub fn right(&self) -> usize {
        self.x + self.width
    }

    /// First row beyond the bottom edge
    pub fn bottom(&self) -> usize {
        self.y + self.height
    }

    /// Number of pixels covered by this rectangle
    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }
}

impl std::fmt::Display for Rectangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {}x{}]",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Output bands the engine can be asked to materialize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetBand {
    AnomalyFlags,
    MaxSpectralSlope,
    MaxSlopeBandIndex,
}

impl TargetBand {
    /// Band name under which this target is persisted in the output product
    pub fn band_name(&self) -> &'static str {
        match self {
            TargetBand::AnomalyFlags => ANOMALY_FLAGS_BAND_NAME,
            TargetBand::MaxSpectralSlope => MAX_SLOPE_BAND_NAME,
            TargetBand::MaxSlopeBandIndex => MAX_SLOPE_INDEX_BAND_NAME,
        }
    }
}

impl std::fmt::Display for TargetBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.band_name())
    }
}

/// The fixed set of OLCI spectral bands evaluated for saturation anomalies,
/// in canonical order (ascending center wavelength).
///
/// The set is passed to the engine at construction; band naming follows the
/// OLCI L1b conventions (`Oa01_radiance`, `solar_flux_band_1`, ...), with the
/// auxiliary bands addressed by true spectral index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectralBandSet {
    indices: Vec<u32>,
}

impl SpectralBandSet {
    /// Band set used for OLCI anomaly detection: bands 1-12, 16-18 and 21.
    /// Bands 13-15 (O2 absorption) and 19-20 (H2O absorption) are excluded.
    pub fn olci_anomaly_bands() -> Self {
        Self {
            indices: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 16, 17, 18, 21],
        }
    }

    /// Create a band set from explicit spectral indices (canonical order)
    pub fn from_indices(indices: Vec<u32>) -> Self {
        Self { indices }
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Radiance band name for a spectral index, e.g. `Oa05_radiance`
    pub fn radiance_band_name(index: u32) -> String {
        format!("Oa{:02}_radiance", index)
    }

    /// Solar flux band name for a spectral index, e.g. `solar_flux_band_5`
    pub fn solar_flux_band_name(index: u32) -> String {
        format!("solar_flux_band_{}", index)
    }

    /// Center wavelength band name for a spectral index, e.g. `lambda0_band_5`
    pub fn lambda0_band_name(index: u32) -> String {
        format!("lambda0_band_{}", index)
    }
}

/// Engine configuration, validated at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Saturation slope threshold in 1/nm; a pixel whose maximum absolute
    /// inter-band reflectance slope exceeds this value is flagged
    pub spectral_anomaly_threshold: f64,

    /// If true, the output product carries the two spectral slope
    /// diagnostic bands
    #[serde(default)]
    pub emit_diagnostics: bool,

    /// Upper bound of the nominal altitude data range in meters
    #[serde(default = "default_altitude_max")]
    pub altitude_max: f64,

    /// Lower bound of the nominal altitude data range in meters
    #[serde(default = "default_altitude_min")]
    pub altitude_min: f64,
}

fn default_altitude_max() -> f64 {
    8850.0
}

fn default_altitude_min() -> f64 {
    -11050.0
}

impl AnomalyConfig {
    /// Create a configuration with the default altitude bounds and no
    /// diagnostic output
    pub fn new(spectral_anomaly_threshold: f64) -> Self {
        Self {
            spectral_anomaly_threshold,
            emit_diagnostics: false,
            altitude_max: default_altitude_max(),
            altitude_min: default_altitude_min(),
        }
    }

    /// Parse a configuration from the flat key/value parameter map used by
    /// processing-graph hosts
    pub fn from_params(params: &HashMap<String, String>) -> OlciResult<Self> {
        let threshold = params
            .get("spectralAnomalyThreshold")
            .ok_or_else(|| {
                OlciError::InvalidConfig(
                    "Parameter 'spectralAnomalyThreshold' missing".to_string(),
                )
            })?
            .parse::<f64>()
            .map_err(|e| {
                OlciError::InvalidConfig(format!(
                    "Parameter 'spectralAnomalyThreshold' not a number: {}",
                    e
                ))
            })?;

        let mut config = Self::new(threshold);

        if let Some(value) = params.get("emitDiagnostics") {
            config.emit_diagnostics = value.parse::<bool>().map_err(|e| {
                OlciError::InvalidConfig(format!("Parameter 'emitDiagnostics' not a boolean: {}", e))
            })?;
        }
        if let Some(value) = params.get("altitudeMax") {
            config.altitude_max = value.parse::<f64>().map_err(|e| {
                OlciError::InvalidConfig(format!("Parameter 'altitudeMax' not a number: {}", e))
            })?;
        }
        if let Some(value) = params.get("altitudeMin") {
            config.altitude_min = value.parse::<f64>().map_err(|e| {
                OlciError::InvalidConfig(format!("Parameter 'altitudeMin' not a number: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check parameter consistency; called by the engine at construction
    pub fn validate(&self) -> OlciResult<()> {
        if !self.spectral_anomaly_threshold.is_finite() || self.spectral_anomaly_threshold <= 0.0 {
            return Err(OlciError::InvalidConfig(format!(
                "Spectral anomaly threshold must be finite and positive, got {}",
                self.spectral_anomaly_threshold
            )));
        }
        if !self.altitude_max.is_finite() || !self.altitude_min.is_finite() {
            return Err(OlciError::InvalidConfig(
                "Altitude bounds must be finite".to_string(),
            ));
        }
        if self.altitude_max <= self.altitude_min {
            return Err(OlciError::InvalidConfig(format!(
                "Altitude bounds inverted: max {} <= min {}",
                self.altitude_max, self.altitude_min
            )));
        }
        Ok(())
    }
}

/// Error types for OLCI anomaly processing
#[derive(Debug, thiserror::Error)]
pub enum OlciError {
    #[error("Input variable '{0}' missing.")]
    MissingInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Processing cancelled")]
    Cancelled,
}

/// Result type for OLCI anomaly processing operations
pub type OlciResult<T> = Result<T, OlciError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_set_canonical_order() {
        let bands = SpectralBandSet::olci_anomaly_bands();
        assert_eq!(bands.len(), 16);
        assert_eq!(bands.indices()[0], 1);
        assert_eq!(bands.indices()[11], 12);
        assert_eq!(bands.indices()[12], 16);
        assert_eq!(bands.indices()[15], 21);
    }

    #[test]
    fn test_band_names() {
        assert_eq!(SpectralBandSet::radiance_band_name(5), "Oa05_radiance");
        assert_eq!(SpectralBandSet::radiance_band_name(21), "Oa21_radiance");
        assert_eq!(SpectralBandSet::solar_flux_band_name(16), "solar_flux_band_16");
        assert_eq!(SpectralBandSet::lambda0_band_name(1), "lambda0_band_1");
    }

    #[test]
    fn test_config_defaults() {
        let config = AnomalyConfig::new(0.15);
        assert!(config.validate().is_ok());
        assert_eq!(config.altitude_max, 8850.0);
        assert_eq!(config.altitude_min, -11050.0);
        assert!(!config.emit_diagnostics);
    }

    #[test]
    fn test_config_rejects_bad_threshold() {
        assert!(AnomalyConfig::new(0.0).validate().is_err());
        assert!(AnomalyConfig::new(-1.0).validate().is_err());
        assert!(AnomalyConfig::new(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_config_rejects_inverted_altitude_bounds() {
        let mut config = AnomalyConfig::new(0.15);
        config.altitude_max = -12000.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_params() {
        let mut params = HashMap::new();
        params.insert("spectralAnomalyThreshold".to_string(), "0.2".to_string());
        params.insert("emitDiagnostics".to_string(), "true".to_string());

        let config = AnomalyConfig::from_params(&params).expect("valid parameters");
        assert_eq!(config.spectral_anomaly_threshold, 0.2);
        assert!(config.emit_diagnostics);
        assert_eq!(config.altitude_max, 8850.0);
    }

    #[test]
    fn test_config_from_params_requires_threshold() {
        let params = HashMap::new();
        let result = AnomalyConfig::from_params(&params);
        assert!(result.is_err());
    }

    #[test]
    fn test_rectangle_edges() {
        let rect = Rectangle::new(10, 20, 30, 40);
        assert_eq!(rect.right(), 40);
        assert_eq!(rect.bottom(), 60);
        assert_eq!(rect.num_pixels(), 1200);
    }
}
