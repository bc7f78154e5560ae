use crate::core::cache::TileResult;
use crate::core::engine::AnomalyEngine;
use crate::core::schema::build_output_schema;
use crate::core::validate::validate_input;
use crate::io::{BandData, RasterDataset};
use crate::types::{
    AnomalyConfig, FlagGrid, OlciResult, RasterGrid, Rectangle, SpectralBandSet,
    ANOMALY_FLAGS_BAND_NAME, MAX_SLOPE_BAND_NAME, MAX_SLOPE_INDEX_BAND_NAME, SLOPE_INDEX_NO_DATA,
};
use ndarray::{s, Array2};
use std::sync::Arc;

/// Default tile edge length in pixels
const DEFAULT_TILE_SIZE: usize = 512;

/// Whole-scene anomaly flagging: validate, declare the output schema,
/// partition the scene into tiles and materialize every declared target band.
///
/// The per-tile work is the engine's; this driver only schedules it (with a
/// rayon worker pool when the `parallel` feature is enabled) and assembles
/// the computed tile planes into the output dataset, which is finalized
/// before being returned.
pub struct AnomalyOperator {
    engine: AnomalyEngine,
    tile_size: usize,
}

impl AnomalyOperator {
    pub fn new(config: AnomalyConfig) -> OlciResult<Self> {
        Self::with_band_set(config, SpectralBandSet::olci_anomaly_bands())
    }

    pub fn with_band_set(config: AnomalyConfig, bands: SpectralBandSet) -> OlciResult<Self> {
        Ok(Self {
            engine: AnomalyEngine::new(config, bands)?,
            tile_size: DEFAULT_TILE_SIZE,
        })
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> OlciResult<Self> {
        if tile_size == 0 {
            return Err(crate::types::OlciError::InvalidConfig(
                "Tile size must be positive".to_string(),
            ));
        }
        self.tile_size = tile_size;
        Ok(self)
    }

    pub fn engine(&self) -> &AnomalyEngine {
        &self.engine
    }

    /// Run the full operator over an input scene
    pub fn run(&self, input: &RasterDataset) -> OlciResult<RasterDataset> {
        let config = self.engine.config();
        validate_input(input, self.engine.band_set())?;
        let mut output = build_output_schema(input, config.emit_diagnostics)?;

        let rects = tile_rectangles(input.width(), input.height(), self.tile_size);
        log::info!(
            "Flagging scene '{}' ({}x{}) in {} tiles",
            input.name(),
            input.width(),
            input.height(),
            rects.len()
        );

        let results = self.compute_tiles(input, &rects)?;

        let dims = (input.height(), input.width());
        let mut flags: FlagGrid = Array2::zeros(dims);
        let mut slope: Option<RasterGrid> = config
            .emit_diagnostics
            .then(|| Array2::from_elem(dims, f64::NAN));
        let mut slope_index: Option<FlagGrid> = config
            .emit_diagnostics
            .then(|| Array2::from_elem(dims, SLOPE_INDEX_NO_DATA));

        for (rect, result) in &results {
            let window = s![rect.y..rect.bottom(), rect.x..rect.right()];
            flags.slice_mut(window).assign(&result.flags);
            if let (Some(plane), Some(tile)) = (slope.as_mut(), result.max_slope.as_ref()) {
                plane.slice_mut(window).assign(tile);
            }
            if let (Some(plane), Some(tile)) =
                (slope_index.as_mut(), result.max_slope_band_index.as_ref())
            {
                plane.slice_mut(window).assign(tile);
            }
        }

        output.set_band_data(ANOMALY_FLAGS_BAND_NAME, BandData::Int8(Arc::new(flags)))?;
        if let Some(plane) = slope {
            output.set_band_data(MAX_SLOPE_BAND_NAME, BandData::Float64(Arc::new(plane)))?;
        }
        if let Some(plane) = slope_index {
            output.set_band_data(MAX_SLOPE_INDEX_BAND_NAME, BandData::Int8(Arc::new(plane)))?;
        }

        output.finalize();
        log::info!("Scene '{}' flagged", input.name());
        Ok(output)
    }

    #[cfg(feature = "parallel")]
    fn compute_tiles(
        &self,
        input: &RasterDataset,
        rects: &[Rectangle],
    ) -> OlciResult<Vec<(Rectangle, Arc<TileResult>)>> {
        use rayon::prelude::*;

        rects
            .par_iter()
            .map(|rect| self.engine.tile_result(input, rect).map(|r| (*rect, r)))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn compute_tiles(
        &self,
        input: &RasterDataset,
        rects: &[Rectangle],
    ) -> OlciResult<Vec<(Rectangle, Arc<TileResult>)>> {
        rects
            .iter()
            .map(|rect| self.engine.tile_result(input, rect).map(|r| (*rect, r)))
            .collect()
    }
}

/// Partition a scene extent into row-major tiles of at most `tile_size`
/// pixels per edge; border tiles are clipped to the extent
pub fn tile_rectangles(width: usize, height: usize, tile_size: usize) -> Vec<Rectangle> {
    let mut rects = Vec::new();
    let mut y = 0;
    while y < height {
        let tile_height = tile_size.min(height - y);
        let mut x = 0;
        while x < width {
            let tile_width = tile_size.min(width - x);
            rects.push(Rectangle::new(x, y, tile_width, tile_height));
            x += tile_width;
        }
        y += tile_height;
    }
    rects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::SceneBuilder;
    use crate::types::{ALT_OUT_OF_RANGE, ANOM_SPECTRAL_MEASURE};

    #[test]
    fn test_tile_rectangles_cover_extent() {
        let rects = tile_rectangles(10, 6, 4);
        assert_eq!(rects.len(), 6);
        let covered: usize = rects.iter().map(|r| r.num_pixels()).sum();
        assert_eq!(covered, 60);
        // Border tiles clipped
        assert_eq!(rects[2], Rectangle::new(8, 0, 2, 4));
        assert_eq!(rects[5], Rectangle::new(8, 4, 2, 2));
    }

    #[test]
    fn test_run_produces_finalized_output() {
        let scene = SceneBuilder::new(10, 6)
            .altitude_sample(9, 5, 9000.0)
            .radiance_sample(17, 0, 0, 100.0)
            .build();

        let mut config = AnomalyConfig::new(0.01);
        config.emit_diagnostics = true;
        let operator = AnomalyOperator::new(config)
            .unwrap()
            .with_tile_size(4)
            .unwrap();

        let output = operator.run(&scene).unwrap();
        assert!(output.is_finalized());

        let band = output.band(ANOMALY_FLAGS_BAND_NAME).unwrap();
        let data = band.data().expect("bitmask materialized");
        match data {
            BandData::Int8(grid) => {
                assert_eq!(grid[[5, 9]], ALT_OUT_OF_RANGE);
                assert_eq!(grid[[0, 0]], ANOM_SPECTRAL_MEASURE);
                assert_eq!(grid[[3, 3]], 0);
            }
            _ => panic!("bitmask band must be int8"),
        }

        assert!(output.band(MAX_SLOPE_BAND_NAME).unwrap().is_materialized());
        assert!(output
            .band(MAX_SLOPE_INDEX_BAND_NAME)
            .unwrap()
            .is_materialized());
    }

    #[test]
    fn test_run_rejects_incomplete_input() {
        let scene = SceneBuilder::new(4, 4).build();
        let broken = crate::testdata::rebuild_without_band(&scene, "altitude");

        let operator = AnomalyOperator::new(AnomalyConfig::new(0.1)).unwrap();
        assert!(operator.run(&broken).is_err());
    }

    #[test]
    fn test_run_matches_single_tile_engine_output() {
        let scene = SceneBuilder::new(7, 5)
            .altitude_sample(2, 3, -12000.0)
            .build();

        let config = AnomalyConfig::new(0.1);
        let tiled = AnomalyOperator::new(config.clone())
            .unwrap()
            .with_tile_size(3)
            .unwrap();
        let whole = AnomalyOperator::new(config).unwrap();

        let tiled_out = tiled.run(&scene).unwrap();
        let whole_out = whole.run(&scene).unwrap();

        let tiled_flags = match tiled_out.band(ANOMALY_FLAGS_BAND_NAME).unwrap().data() {
            Some(BandData::Int8(grid)) => grid.clone(),
            _ => panic!("bitmask band must be int8"),
        };
        let whole_flags = match whole_out.band(ANOMALY_FLAGS_BAND_NAME).unwrap().data() {
            Some(BandData::Int8(grid)) => grid.clone(),
            _ => panic!("bitmask band must be int8"),
        };
        assert_eq!(tiled_flags.as_ref(), whole_flags.as_ref());
    }
}
