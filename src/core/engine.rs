use crate::core::cache::{CacheStats, TileResult, TileResultCache};
use crate::io::TileSource;
use crate::types::{
    AnomalyConfig, FlagGrid, OlciError, OlciResult, RasterGrid, Rectangle, SpectralBandSet,
    TargetBand, ALTITUDE_BAND_NAME, ALT_OUT_OF_RANGE, ANOM_SPECTRAL_MEASURE, SLOPE_INDEX_NO_DATA,
    SZA_GRID_NAME,
};
use ndarray::Array2;
use std::f64::consts::PI;
use std::sync::Arc;

/// Default number of tile results kept for reuse across target bands
const DEFAULT_CACHE_CAPACITY: usize = 16;

/// Caller-supplied output tile buffer for one target band over one rectangle
pub enum TileBuffer<'a> {
    Int8(&'a mut FlagGrid),
    Float64(&'a mut RasterGrid),
}

/// The tiled anomaly detection engine.
///
/// For each requested rectangle the engine converts radiance to reflectance,
/// scans the spectral slope between adjacent bands against the saturation
/// threshold, checks the altitude samples against the nominal data range, and
/// composes the per-pixel bitmask (plus optional slope diagnostics).
///
/// Requests for different target bands over the same rectangle are one
/// logical computation: the full result is computed once and reused through a
/// rectangle-keyed cache, so the bitmask a caller observes always reflects
/// both anomaly passes regardless of request order.
pub struct AnomalyEngine {
    config: AnomalyConfig,
    bands: SpectralBandSet,
    cache: TileResultCache,
}

impl AnomalyEngine {
    pub fn new(config: AnomalyConfig, bands: SpectralBandSet) -> OlciResult<Self> {
        config.validate()?;
        if bands.len() < 2 {
            return Err(OlciError::InvalidConfig(format!(
                "Spectral band set needs at least two bands, got {}",
                bands.len()
            )));
        }
        Ok(Self {
            config,
            bands,
            cache: TileResultCache::new(DEFAULT_CACHE_CAPACITY),
        })
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    pub fn band_set(&self) -> &SpectralBandSet {
        &self.bands
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Radiance to top-of-atmosphere reflectance conversion.
    ///
    /// The solar zenith angle enters through the reciprocal of its cosine;
    /// `inv_cos_sza` must be derived from the angle in radians.
    pub fn to_reflectance(radiance: f64, inv_solar_flux: f64, inv_cos_sza: f64) -> f64 {
        radiance * PI * inv_solar_flux * inv_cos_sza
    }

    /// Materialize one target band over a rectangle into a caller-supplied
    /// buffer whose shape must match the rectangle.
    pub fn compute_tile<S: TileSource + ?Sized>(
        &self,
        source: &S,
        target: TargetBand,
        rect: &Rectangle,
        out: &mut TileBuffer<'_>,
    ) -> OlciResult<()> {
        if !self.config.emit_diagnostics && target != TargetBand::AnomalyFlags {
            return Err(OlciError::Processing(format!(
                "Target band '{}' requested but diagnostics are not enabled",
                target
            )));
        }

        let expected = (rect.height, rect.width);
        let actual = match out {
            TileBuffer::Int8(buffer) => buffer.dim(),
            TileBuffer::Float64(buffer) => buffer.dim(),
        };
        if actual != expected {
            return Err(OlciError::Processing(format!(
                "Output buffer shape {}x{} does not match tile rectangle {}",
                actual.1, actual.0, rect
            )));
        }

        let result = self.tile_result(source, rect)?;
        match (target, out) {
            (TargetBand::AnomalyFlags, TileBuffer::Int8(buffer)) => {
                buffer.assign(&result.flags);
            }
            (TargetBand::MaxSpectralSlope, TileBuffer::Float64(buffer)) => {
                let plane = result.max_slope.as_ref().ok_or_else(|| {
                    OlciError::Processing("Slope diagnostic plane not computed".to_string())
                })?;
                buffer.assign(plane);
            }
            (TargetBand::MaxSlopeBandIndex, TileBuffer::Int8(buffer)) => {
                let plane = result.max_slope_band_index.as_ref().ok_or_else(|| {
                    OlciError::Processing("Slope index diagnostic plane not computed".to_string())
                })?;
                buffer.assign(plane);
            }
            (target, _) => {
                return Err(OlciError::Processing(format!(
                    "Output buffer element type does not match target band '{}'",
                    target
                )));
            }
        }
        Ok(())
    }

    /// The one logical computation per rectangle, served from the cache when
    /// a different target band already triggered it.
    pub fn tile_result<S: TileSource + ?Sized>(
        &self,
        source: &S,
        rect: &Rectangle,
    ) -> OlciResult<Arc<TileResult>> {
        if let Some(hit) = self.cache.get(rect) {
            return Ok(hit);
        }
        let computed = Arc::new(self.compute_rect(source, rect)?);
        Ok(self.cache.insert(*rect, computed))
    }

    fn compute_rect<S: TileSource + ?Sized>(
        &self,
        source: &S,
        rect: &Rectangle,
    ) -> OlciResult<TileResult> {
        let band_count = self.bands.len();
        let dims = (rect.height, rect.width);

        log::debug!(
            "Computing anomaly tile {} over {} spectral bands",
            rect,
            band_count
        );

        let mut radiance_tiles = Vec::with_capacity(band_count);
        let mut flux_tiles = Vec::with_capacity(band_count);
        let mut lambda_tiles = Vec::with_capacity(band_count);
        for &index in self.bands.indices() {
            radiance_tiles.push(source.band_tile(&SpectralBandSet::radiance_band_name(index), rect)?);
            flux_tiles.push(source.band_tile(&SpectralBandSet::solar_flux_band_name(index), rect)?);
            lambda_tiles.push(source.band_tile(&SpectralBandSet::lambda0_band_name(index), rect)?);
        }
        let sza_tile = source.grid_tile(SZA_GRID_NAME, rect)?;
        let altitude_tile = source.band_tile(ALTITUDE_BAND_NAME, rect)?;

        let mut flags: FlagGrid = Array2::zeros(dims);
        let mut slope_plane = self
            .config
            .emit_diagnostics
            .then(|| Array2::from_elem(dims, f64::NAN));
        let mut index_plane = self
            .config
            .emit_diagnostics
            .then(|| Array2::from_elem(dims, SLOPE_INDEX_NO_DATA));

        let mut reflectances = vec![0.0f64; band_count];
        let mut wavelengths = vec![0.0f64; band_count];

        for row in 0..rect.height {
            if source.is_cancelled() {
                return Err(OlciError::Cancelled);
            }
            for col in 0..rect.width {
                let sza = sza_tile[[row, col]];
                let inv_cos_sza = 1.0 / sza.to_radians().cos();

                for i in 0..band_count {
                    let inv_flux = 1.0 / flux_tiles[i][[row, col]];
                    reflectances[i] =
                        Self::to_reflectance(radiance_tiles[i][[row, col]], inv_flux, inv_cos_sza);
                    wavelengths[i] = lambda_tiles[i][[row, col]];
                }

                if let Some(peak) = scan_slope_peak(&reflectances, &wavelengths) {
                    if peak.value > self.config.spectral_anomaly_threshold {
                        flags[[row, col]] |= ANOM_SPECTRAL_MEASURE;
                    }
                    if let Some(plane) = slope_plane.as_mut() {
                        plane[[row, col]] = peak.value;
                    }
                    if let Some(plane) = index_plane.as_mut() {
                        plane[[row, col]] = self.bands.indices()[peak.pair_start] as i8;
                    }
                }
            }
        }

        self.process_altitude_outliers(source, &altitude_tile, &mut flags, rect)?;

        Ok(TileResult {
            flags,
            max_slope: slope_plane,
            max_slope_band_index: index_plane,
        })
    }

    /// Independent pass over the rectangle; OR-merges into the bitmask so a
    /// spectral flag already set for the pixel is preserved.
    fn process_altitude_outliers<S: TileSource + ?Sized>(
        &self,
        source: &S,
        altitude_tile: &RasterGrid,
        flags: &mut FlagGrid,
        rect: &Rectangle,
    ) -> OlciResult<()> {
        for row in 0..rect.height {
            if source.is_cancelled() {
                return Err(OlciError::Cancelled);
            }
            for col in 0..rect.width {
                let altitude = altitude_tile[[row, col]];
                if altitude >= self.config.altitude_max || altitude <= self.config.altitude_min {
                    flags[[row, col]] |= ALT_OUT_OF_RANGE;
                }
            }
        }
        Ok(())
    }
}

struct SlopePeak {
    value: f64,
    pair_start: usize,
}

/// Largest absolute reflectance slope between spectrally adjacent bands.
/// Pairs with non-finite reflectance at either end or a degenerate wavelength
/// separation are skipped; returns None when no pair could be evaluated.
fn scan_slope_peak(reflectances: &[f64], wavelengths: &[f64]) -> Option<SlopePeak> {
    let mut peak: Option<SlopePeak> = None;
    for i in 0..reflectances.len() - 1 {
        let delta_lambda = wavelengths[i + 1] - wavelengths[i];
        if !delta_lambda.is_finite() || delta_lambda <= 0.0 {
            continue;
        }
        let r0 = reflectances[i];
        let r1 = reflectances[i + 1];
        if !r0.is_finite() || !r1.is_finite() {
            continue;
        }
        let slope = ((r1 - r0) / delta_lambda).abs();
        if peak.as_ref().map_or(true, |p| slope > p.value) {
            peak = Some(SlopePeak {
                value: slope,
                pair_start: i,
            });
        }
    }
    peak
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::RasterDataset;
    use crate::testdata::SceneBuilder;
    use crate::types::AnomalyConfig;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn engine(threshold: f64, diagnostics: bool) -> AnomalyEngine {
        let mut config = AnomalyConfig::new(threshold);
        config.emit_diagnostics = diagnostics;
        AnomalyEngine::new(config, SpectralBandSet::olci_anomaly_bands()).unwrap()
    }

    fn full_rect(dataset: &RasterDataset) -> Rectangle {
        Rectangle::new(0, 0, dataset.width(), dataset.height())
    }

    #[test]
    fn test_reflectance_conversion() {
        // radiance 10, flux 100, SZA 0: reflectance = 10 * PI * 0.01 * 1
        let reflectance = AnomalyEngine::to_reflectance(10.0, 1.0 / 100.0, 1.0);
        assert_abs_diff_eq!(reflectance, 0.1 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_reflectance_monotonic_in_radiance() {
        let single = AnomalyEngine::to_reflectance(10.0, 1.0 / 100.0, 1.0);
        let doubled = AnomalyEngine::to_reflectance(20.0, 1.0 / 100.0, 1.0);
        assert_abs_diff_eq!(doubled, 2.0 * single, epsilon = 1e-12);
    }

    #[test]
    fn test_sza_enters_through_cosine() {
        // At SZA 60 degrees, 1/cos = 2, reflectance doubles
        let scene = SceneBuilder::new(2, 2).sza_degrees(60.0).build();
        let engine = engine(1000.0, true);
        let result = engine.tile_result(&scene, &full_rect(&scene)).unwrap();

        // Flat spectrum: slope stays 0 regardless of the angle scaling
        assert_eq!(result.flags[[0, 0]], 0);
        assert_abs_diff_eq!(
            result.max_slope.as_ref().unwrap()[[0, 0]],
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_flat_spectrum_not_flagged() {
        let scene = SceneBuilder::new(4, 3).build();
        let engine = engine(0.001, false);
        let result = engine.tile_result(&scene, &full_rect(&scene)).unwrap();
        assert!(result.flags.iter().all(|&f| f == 0));
    }

    #[test]
    fn test_spectral_spike_sets_bit_one() {
        // Band 17 radiance spike: reflectance drops from PI back to 0.1 PI
        // between bands 17 and 18, only 20 nm apart, which is the steepest
        // pair around the spike
        let scene = SceneBuilder::new(4, 3)
            .radiance_sample(17, 2, 1, 100.0)
            .build();
        let expected_slope = (PI - 0.1 * PI) / (885.0 - 865.0);

        let engine = engine(expected_slope * 0.5, true);
        let result = engine.tile_result(&scene, &full_rect(&scene)).unwrap();

        assert_eq!(result.flags[[1, 2]], ANOM_SPECTRAL_MEASURE);
        assert_eq!(result.flags[[0, 0]], 0);
        assert_abs_diff_eq!(
            result.max_slope.as_ref().unwrap()[[1, 2]],
            expected_slope,
            epsilon = 1e-9
        );
        // Peak detected at the pair starting at band 17
        assert_eq!(result.max_slope_band_index.as_ref().unwrap()[[1, 2]], 17);
    }

    #[test]
    fn test_slope_below_threshold_not_flagged() {
        let scene = SceneBuilder::new(4, 3)
            .radiance_sample(17, 2, 1, 100.0)
            .build();
        let expected_slope = (PI - 0.1 * PI) / (885.0 - 865.0);

        let engine = engine(expected_slope * 2.0, true);
        let result = engine.tile_result(&scene, &full_rect(&scene)).unwrap();

        assert_eq!(result.flags[[1, 2]], 0);
        // Diagnostics still report the observed peak
        assert_abs_diff_eq!(
            result.max_slope.as_ref().unwrap()[[1, 2]],
            expected_slope,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_altitude_bounds() {
        let scene = SceneBuilder::new(4, 3)
            .altitude_sample(0, 0, 9000.0)
            .altitude_sample(1, 0, 8850.0)
            .altitude_sample(2, 0, 8849.0)
            .altitude_sample(0, 1, -11051.0)
            .altitude_sample(1, 1, -11050.0)
            .altitude_sample(2, 1, -11049.0)
            .build();
        let engine = engine(1000.0, false);
        let result = engine.tile_result(&scene, &full_rect(&scene)).unwrap();

        assert_eq!(result.flags[[0, 0]], ALT_OUT_OF_RANGE);
        assert_eq!(result.flags[[0, 1]], ALT_OUT_OF_RANGE); // >= max
        assert_eq!(result.flags[[0, 2]], 0);
        assert_eq!(result.flags[[1, 0]], ALT_OUT_OF_RANGE);
        assert_eq!(result.flags[[1, 1]], ALT_OUT_OF_RANGE); // <= min
        assert_eq!(result.flags[[1, 2]], 0);
        assert_eq!(result.flags[[2, 2]], 0);
    }

    #[test]
    fn test_flags_or_merged_per_pixel() {
        // Same pixel carries a spectral spike and an impossible altitude
        let scene = SceneBuilder::new(3, 3)
            .radiance_sample(17, 1, 1, 100.0)
            .altitude_sample(1, 1, 9000.0)
            .build();
        let engine = engine(0.001, false);
        let result = engine.tile_result(&scene, &full_rect(&scene)).unwrap();

        assert_eq!(
            result.flags[[1, 1]],
            ANOM_SPECTRAL_MEASURE | ALT_OUT_OF_RANGE
        );
    }

    #[test]
    fn test_compute_tile_writes_buffer() {
        let scene = SceneBuilder::new(4, 3).altitude_sample(3, 2, 9000.0).build();
        let engine = engine(1000.0, false);
        let rect = full_rect(&scene);

        let mut buffer: FlagGrid = Array2::zeros((3, 4));
        engine
            .compute_tile(&scene, TargetBand::AnomalyFlags, &rect, &mut TileBuffer::Int8(&mut buffer))
            .unwrap();
        assert_eq!(buffer[[2, 3]], ALT_OUT_OF_RANGE);
        assert_eq!(buffer[[0, 0]], 0);
    }

    #[test]
    fn test_compute_tile_rejects_wrong_buffer_shape() {
        let scene = SceneBuilder::new(4, 3).build();
        let engine = engine(1000.0, false);
        let rect = full_rect(&scene);

        let mut buffer: FlagGrid = Array2::zeros((2, 2));
        let result = engine.compute_tile(
            &scene,
            TargetBand::AnomalyFlags,
            &rect,
            &mut TileBuffer::Int8(&mut buffer),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_diagnostic_target_requires_diagnostics_enabled() {
        let scene = SceneBuilder::new(4, 3).build();
        let engine = engine(1000.0, false);
        let rect = full_rect(&scene);

        let mut buffer: RasterGrid = Array2::zeros((3, 4));
        let result = engine.compute_tile(
            &scene,
            TargetBand::MaxSpectralSlope,
            &rect,
            &mut TileBuffer::Float64(&mut buffer),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_repeated_request_served_from_cache() {
        let scene = SceneBuilder::new(4, 3).build();
        let engine = engine(1000.0, true);
        let rect = full_rect(&scene);

        let first = engine.tile_result(&scene, &rect).unwrap();
        let second = engine.tile_result(&scene, &rect).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = engine.cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_missing_band_at_compute_time_is_fatal() {
        let scene = SceneBuilder::new(4, 3).build();
        let broken = crate::testdata::rebuild_without_band(&scene, "Oa09_radiance");
        let engine = engine(1000.0, false);

        let err = engine.tile_result(&broken, &full_rect(&broken)).unwrap_err();
        assert!(matches!(err, OlciError::MissingInput(name) if name == "Oa09_radiance"));
    }

    #[test]
    fn test_cancellation_aborts_tile() {
        let scene = SceneBuilder::new(4, 3).build();
        scene.request_cancel();
        let engine = engine(1000.0, false);

        let err = engine.tile_result(&scene, &full_rect(&scene)).unwrap_err();
        assert!(matches!(err, OlciError::Cancelled));
    }

    #[test]
    fn test_adjacent_pair_slope_magnitude() {
        // Reflectances 0.10 and 0.90 over 5 nm: slope 0.16/nm
        let reflectances = [0.10, 0.90];
        let wavelengths = [500.0, 505.0];
        let peak = scan_slope_peak(&reflectances, &wavelengths).unwrap();
        assert_abs_diff_eq!(peak.value, 0.16, epsilon = 1e-12);
        assert_eq!(peak.pair_start, 0);
    }

    #[test]
    fn test_non_finite_pairs_skipped() {
        let reflectances = [f64::NAN, 0.5, 0.6];
        let wavelengths = [400.0, 410.0, 420.0];
        let peak = scan_slope_peak(&reflectances, &wavelengths).unwrap();
        // Only the second pair is evaluable
        assert_eq!(peak.pair_start, 1);

        let no_peak = scan_slope_peak(&[f64::NAN, f64::NAN], &[400.0, 410.0]);
        assert!(no_peak.is_none());
    }
}
