use numpy::PyArray1;
use pyo3::prelude::*;

use ifts::{CalibrationGeometry, DetectorSize};

/// Calibration geometry of the interferometer.
///
/// Attributes:
///     laser_wavelength_nm: Calibration laser wavelength in nm.
///     folding_order: Folding order of the spectrum.
///     step_size_nm: OPD step between frames in nm.
#[pyclass(name = "CalibrationGeometry", frozen)]
#[derive(Clone)]
pub(crate) struct PyCalibrationGeometry {
    pub(crate) inner: CalibrationGeometry,
}

#[pymethods]
impl PyCalibrationGeometry {
    /// Create an on-axis geometry.
    ///
    /// Args:
    ///     laser_wavelength_nm: Calibration laser wavelength in nm.
    ///     folding_order: Folding order.
    ///     step_size_nm: OPD step in nm.
    ///     detector_size: (width, height) of both cameras. Default (2048, 2064).
    #[new]
    #[pyo3(signature = (laser_wavelength_nm, folding_order, step_size_nm, detector_size = (2048, 2064)))]
    fn new(
        laser_wavelength_nm: f64,
        folding_order: u32,
        step_size_nm: f64,
        detector_size: (usize, usize),
    ) -> PyResult<Self> {
        let size = DetectorSize::new(detector_size.0, detector_size.1);
        let inner =
            CalibrationGeometry::new(laser_wavelength_nm, folding_order, step_size_nm, size, size)
                .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))?;
        Ok(Self { inner })
    }

    #[getter]
    fn laser_wavelength_nm(&self) -> f64 {
        self.inner.laser_wavelength_nm()
    }

    #[getter]
    fn folding_order(&self) -> u32 {
        self.inner.folding_order()
    }

    #[getter]
    fn step_size_nm(&self) -> f64 {
        self.inner.step_size_nm()
    }

    /// Free spectral range (min, max) in cm⁻¹.
    #[getter]
    fn free_spectral_range_cm1(&self) -> (f64, f64) {
        self.inner.free_spectral_range_cm1()
    }

    /// Wavenumber of every channel in cm⁻¹.
    ///
    /// Args:
    ///     n_channels: Number of spectral channels.
    ///     coeff: Calibration coefficient 1/cos(θ). Default 1.
    #[pyo3(signature = (n_channels, coeff = 1.0))]
    fn wavenumber_axis<'py>(
        &self,
        py: Python<'py>,
        n_channels: usize,
        coeff: f64,
    ) -> Bound<'py, PyArray1<f64>> {
        PyArray1::from_vec(py, self.inner.wavenumber_axis(n_channels, coeff))
    }

    fn __repr__(&self) -> String {
        let (lo, hi) = self.inner.free_spectral_range_cm1();
        format!(
            "CalibrationGeometry(laser={} nm, order={}, step={} nm, fsr={:.1}–{:.1} cm-1)",
            self.inner.laser_wavelength_nm(),
            self.inner.folding_order(),
            self.inner.step_size_nm(),
            lo,
            hi,
        )
    }
}
