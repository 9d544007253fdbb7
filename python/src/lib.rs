//! Python bindings for ifts via PyO3.
//!
//! Exposes the interferogram transform and the camera registration to Python
//! as the `pyifts` module.

use numpy::{PyArray1, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use ifts::{
    register, Apodization, Interferogram, InterferogramTransformer, RegistrationConfig,
    RegistrationError, TransformConfig,
};

mod geometry;
mod registration;

use geometry::PyCalibrationGeometry;
use registration::{parse_sources, PyAlignmentTransform};

// ═══════════════════════════════════════════════════════════════════════════
// transform_interferogram: one pixel through the transform
// ═══════════════════════════════════════════════════════════════════════════

/// Transform a single interferogram into a calibrated spectrum.
///
/// Args:
///     geometry: CalibrationGeometry of the instrument.
///     samples: 1D numpy array of interferogram samples.
///     apodization: Window name or broadening factor. Default "nb-medium".
///     zpd_index: ZPD sample index. None = peak of |s - mean|.
///     coeff: Calibration coefficient 1/cos(θ) of the pixel. Default 1.
///
/// Returns:
///     dict with keys:
///         'spectrum': numpy array of spectral values.
///         'wavenumber_cm1': numpy array of channel wavenumbers.
///         'flags': int quality bits (1 saturated, 2 phase fallback, 4 no data).
#[pyfunction]
#[pyo3(signature = (geometry, samples, apodization = "nb-medium", zpd_index = None, coeff = 1.0))]
fn transform_interferogram<'py>(
    py: Python<'py>,
    geometry: &PyCalibrationGeometry,
    samples: PyReadonlyArray1<f64>,
    apodization: &str,
    zpd_index: Option<usize>,
    coeff: f64,
) -> PyResult<Bound<'py, PyDict>> {
    let apodization = apodization
        .parse::<Apodization>()
        .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))?;
    let samples: Vec<f64> = samples.as_array().iter().copied().collect();

    let config = TransformConfig {
        apodization,
        zpd_index,
        ..Default::default()
    };
    let transformer = InterferogramTransformer::new(&geometry.inner, samples.len(), config)
        .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))?;
    let spectrum = transformer
        .transform(&Interferogram::from_slice(&samples, 0, 0).with_calibration_coeff(coeff))
        .map_err(|e| pyo3::exceptions::PyRuntimeError::new_err(e.to_string()))?;

    let dict = PyDict::new(py);
    dict.set_item(
        "wavenumber_cm1",
        PyArray1::from_vec(py, spectrum.wavenumber_axis(&geometry.inner)),
    )?;
    dict.set_item("flags", spectrum.flags.bits())?;
    dict.set_item("spectrum", PyArray1::from_vec(py, spectrum.values))?;
    Ok(dict)
}

// ═══════════════════════════════════════════════════════════════════════════
// register_cameras: camera-2 → camera-1 alignment
// ═══════════════════════════════════════════════════════════════════════════

/// Find the transform mapping camera-2 sources onto camera 1.
///
/// Args:
///     cam1: Nx2 or Nx3 numpy array of (x, y[, flux]) camera-1 sources.
///     cam2: Nx2 or Nx3 numpy array of camera-2 sources.
///     init_angle_deg: Rough rotation seed in degrees. Default 0.
///     init_dx: Rough x offset seed in pixels. Default 0.
///     init_dy: Rough y offset seed in pixels. Default 0.
///     range_coeff: Search range as a fraction of the detector size. Default 0.01.
///     detector_size: (width, height) of camera 1. Default (2048, 2064).
///     fit_scale: Also fit an isotropic scale. Default False.
///
/// Returns:
///     dict with keys 'transform', 'residual_px', 'matches' (Mx2 array of
///     camera-2, camera-1 indices), 'iterations' and 'elapsed_ms', or None when
///     too few sources match.
#[pyfunction]
#[pyo3(signature = (
    cam1,
    cam2,
    init_angle_deg = 0.0,
    init_dx = 0.0,
    init_dy = 0.0,
    range_coeff = 0.01,
    detector_size = (2048, 2064),
    fit_scale = false,
))]
fn register_cameras<'py>(
    py: Python<'py>,
    cam1: PyReadonlyArray2<f64>,
    cam2: PyReadonlyArray2<f64>,
    init_angle_deg: f64,
    init_dx: f64,
    init_dy: f64,
    range_coeff: f64,
    detector_size: (usize, usize),
    fit_scale: bool,
) -> PyResult<Option<Bound<'py, PyDict>>> {
    let cam1 = parse_sources("cam1", &cam1)?;
    let cam2 = parse_sources("cam2", &cam2)?;
    let size = ifts::DetectorSize::new(detector_size.0, detector_size.1);
    let config = RegistrationConfig {
        init_angle_deg,
        init_dx,
        init_dy,
        range_coeff,
        reference_size: size,
        rotation_center: size.center(),
        fit_scale,
        ..Default::default()
    };

    let result = match register(&cam1, &cam2, &config) {
        Ok(result) => result,
        Err(RegistrationError::TooFewMatches { .. }) => return Ok(None),
        Err(e) => return Err(pyo3::exceptions::PyRuntimeError::new_err(e.to_string())),
    };

    let mut matches = numpy::ndarray::Array2::<u64>::zeros((result.matches.len(), 2));
    for (i, &(i2, i1)) in result.matches.iter().enumerate() {
        matches[[i, 0]] = i2 as u64;
        matches[[i, 1]] = i1 as u64;
    }

    let dict = PyDict::new(py);
    dict.set_item(
        "transform",
        PyAlignmentTransform {
            inner: result.transform,
        },
    )?;
    dict.set_item("residual_px", result.residual_px)?;
    dict.set_item("matches", numpy::PyArray2::from_owned_array(py, matches))?;
    dict.set_item("iterations", result.iterations)?;
    dict.set_item("elapsed_ms", result.elapsed_ms)?;
    Ok(Some(dict))
}

// ═══════════════════════════════════════════════════════════════════════════
// Module definition
// ═══════════════════════════════════════════════════════════════════════════

/// pyifts: interferogram-to-spectrum reduction core
///
/// Rust implementation of the imaging FTS transform and camera registration,
/// exposed to Python via PyO3.
#[pymodule]
fn pyifts(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyCalibrationGeometry>()?;
    m.add_class::<PyAlignmentTransform>()?;
    m.add_function(wrap_pyfunction!(transform_interferogram, m)?)?;
    m.add_function(wrap_pyfunction!(register_cameras, m)?)?;
    Ok(())
}
