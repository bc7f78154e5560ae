//! olciflag: A Fast, Modular Anomaly Flagging Processor for Sentinel-3 OLCI L1b
//!
//! This library detects data anomalies in OLCI L1b optical imagery: spectral
//! samples saturated at the microband level (found through abnormal
//! reflectance slopes between adjacent bands) and surface altitude samples
//! outside the physically possible range. Results are written as a per-pixel
//! bitmask band on an output product that otherwise mirrors the input.

use numpy::{IntoPyArray, PyReadonlyArray2};
use pyo3::prelude::*;
use std::collections::HashMap;

pub mod core;
pub mod io;
pub mod testdata;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    AnomalyConfig, FlagGrid, OlciError, OlciResult, RasterGrid, Rectangle, SpectralBandSet,
    TargetBand, ALT_OUT_OF_RANGE, ANOM_SPECTRAL_MEASURE,
};

pub use io::{Band, BandData, FlagCoding, GeoTransform, RasterDataset, TiePointGrid, TileSource};

pub use crate::core::{
    build_output_schema, tile_rectangles, validate_input, AnomalyEngine, AnomalyOperator,
    TileBuffer, TileResult,
};

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyAnomalyConfig>()?;
    m.add_class::<PyAnomalyOperator>()?;
    Ok(())
}

fn to_py_err(e: OlciError) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
}

/// Python wrapper for AnomalyConfig
#[pyclass(name = "AnomalyConfig")]
#[derive(Clone)]
struct PyAnomalyConfig {
    inner: AnomalyConfig,
}

#[pymethods]
impl PyAnomalyConfig {
    #[new]
    #[pyo3(signature = (spectral_anomaly_threshold, emit_diagnostics = false, altitude_max = None, altitude_min = None))]
    fn new(
        spectral_anomaly_threshold: f64,
        emit_diagnostics: bool,
        altitude_max: Option<f64>,
        altitude_min: Option<f64>,
    ) -> PyResult<Self> {
        let mut config = AnomalyConfig::new(spectral_anomaly_threshold);
        config.emit_diagnostics = emit_diagnostics;
        if let Some(value) = altitude_max {
            config.altitude_max = value;
        }
        if let Some(value) = altitude_min {
            config.altitude_min = value;
        }
        config.validate().map_err(to_py_err)?;

        Ok(PyAnomalyConfig { inner: config })
    }

    #[getter]
    fn spectral_anomaly_threshold(&self) -> f64 {
        self.inner.spectral_anomaly_threshold
    }

    #[getter]
    fn emit_diagnostics(&self) -> bool {
        self.inner.emit_diagnostics
    }

    #[getter]
    fn altitude_max(&self) -> f64 {
        self.inner.altitude_max
    }

    #[getter]
    fn altitude_min(&self) -> f64 {
        self.inner.altitude_min
    }

    fn __repr__(&self) -> String {
        format!(
            "AnomalyConfig(threshold={}, diagnostics={}, altitude=[{}, {}])",
            self.inner.spectral_anomaly_threshold,
            self.inner.emit_diagnostics,
            self.inner.altitude_min,
            self.inner.altitude_max
        )
    }
}

/// Python wrapper for AnomalyOperator
#[pyclass(name = "AnomalyOperator")]
struct PyAnomalyOperator {
    inner: AnomalyOperator,
}

#[pymethods]
impl PyAnomalyOperator {
    #[new]
    fn new(config: PyAnomalyConfig) -> PyResult<Self> {
        let operator = AnomalyOperator::new(config.inner).map_err(to_py_err)?;

        Ok(PyAnomalyOperator { inner: operator })
    }

    /// Flag a scene given as a dict of full-resolution band arrays plus the
    /// coarse SZA tie-point grid with its x/y subsampling factors.
    ///
    /// Returns a dict with the `anomaly_flags` array and, when diagnostics
    /// are enabled, the `max_spectral_slope` and `max_slope_band_index`
    /// arrays.
    fn flag_scene(
        &self,
        py: Python<'_>,
        bands: HashMap<String, PyReadonlyArray2<'_, f64>>,
        sza: PyReadonlyArray2<'_, f64>,
        sza_subsampling: (f64, f64),
    ) -> PyResult<HashMap<String, PyObject>> {
        let (width, height) = scene_extent(&bands)?;

        let mut dataset = RasterDataset::new("scene", "OL_1_EFR", width, height);
        for (name, array) in &bands {
            dataset
                .add_float_band(name, array.as_array().to_owned())
                .map_err(to_py_err)?;
        }
        dataset
            .add_tie_point_grid(
                TiePointGrid::new(
                    types::SZA_GRID_NAME,
                    0.0,
                    0.0,
                    sza_subsampling.0,
                    sza_subsampling.1,
                    sza.as_array().to_owned(),
                )
                .map_err(to_py_err)?,
            )
            .map_err(to_py_err)?;

        let output = self.inner.run(&dataset).map_err(to_py_err)?;

        let mut result: HashMap<String, PyObject> = HashMap::new();
        for name in [
            types::ANOMALY_FLAGS_BAND_NAME,
            types::MAX_SLOPE_BAND_NAME,
            types::MAX_SLOPE_INDEX_BAND_NAME,
        ] {
            if let Some(band) = output.band(name) {
                match band.data() {
                    Some(BandData::Int8(grid)) => {
                        result.insert(
                            name.to_string(),
                            grid.as_ref().clone().into_pyarray(py).into_py(py),
                        );
                    }
                    Some(BandData::Float64(grid)) => {
                        result.insert(
                            name.to_string(),
                            grid.as_ref().clone().into_pyarray(py).into_py(py),
                        );
                    }
                    None => {}
                }
            }
        }
        Ok(result)
    }
}

fn scene_extent(bands: &HashMap<String, PyReadonlyArray2<'_, f64>>) -> PyResult<(usize, usize)> {
    let first = bands.values().next().ok_or_else(|| {
        PyErr::new::<pyo3::exceptions::PyValueError, _>("No band arrays supplied".to_string())
    })?;
    let shape = first.shape();
    Ok((shape[1], shape[0]))
}
