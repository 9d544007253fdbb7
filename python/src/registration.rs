use numpy::ndarray;
use numpy::{PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;

use ifts::{AlignmentTransform, DetectedSource};

/// Camera-2 → camera-1 transform: rotation about a center, then a shift.
#[pyclass(name = "AlignmentTransform", frozen)]
#[derive(Clone)]
pub(crate) struct PyAlignmentTransform {
    pub(crate) inner: AlignmentTransform,
}

#[pymethods]
impl PyAlignmentTransform {
    #[new]
    #[pyo3(signature = (angle_deg, dx, dy, rotation_center = (1024.0, 1032.0)))]
    fn new(angle_deg: f64, dx: f64, dy: f64, rotation_center: (f64, f64)) -> Self {
        Self {
            inner: AlignmentTransform::new(angle_deg, dx, dy, rotation_center),
        }
    }

    #[getter]
    fn angle_deg(&self) -> f64 {
        self.inner.angle_deg
    }

    #[getter]
    fn dx(&self) -> f64 {
        self.inner.dx
    }

    #[getter]
    fn dy(&self) -> f64 {
        self.inner.dy
    }

    #[getter]
    fn scale(&self) -> f64 {
        self.inner.scale
    }

    #[getter]
    fn rotation_center(&self) -> (f64, f64) {
        self.inner.rotation_center
    }

    /// Map camera-2 positions onto camera 1.
    ///
    /// Args:
    ///     points: Nx2 numpy array of (x, y) camera-2 pixel positions.
    ///
    /// Returns:
    ///     Nx2 numpy array of camera-1 positions.
    fn apply<'py>(
        &self,
        py: Python<'py>,
        points: PyReadonlyArray2<f64>,
    ) -> PyResult<Bound<'py, PyArray2<f64>>> {
        let pts = points.as_array();
        if pts.shape()[1] < 2 {
            return Err(pyo3::exceptions::PyValueError::new_err(
                "points array must have at least 2 columns (x, y)",
            ));
        }
        let n = pts.shape()[0];
        let mut out = ndarray::Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            let (x, y) = self.inner.apply(pts[[i, 0]], pts[[i, 1]]);
            out[[i, 0]] = x;
            out[[i, 1]] = y;
        }
        Ok(PyArray2::from_owned_array(py, out))
    }

    fn __repr__(&self) -> String {
        format!("AlignmentTransform({})", self.inner)
    }
}

/// Parse an Nx2 or Nx3 array of (x, y[, flux]) into sources.
pub(crate) fn parse_sources(
    name: &str,
    array: &PyReadonlyArray2<f64>,
) -> PyResult<Vec<DetectedSource>> {
    let a = array.as_array();
    let ncols = a.shape()[1];
    if ncols < 2 {
        return Err(pyo3::exceptions::PyValueError::new_err(format!(
            "{name} array must have at least 2 columns (x, y)"
        )));
    }
    Ok((0..a.shape()[0])
        .map(|i| {
            let flux = if ncols >= 3 { a[[i, 2]] } else { 0.0 };
            DetectedSource::new(a[[i, 0]], a[[i, 1]], flux)
        })
        .collect())
}
