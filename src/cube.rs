//! Data cubes exchanged with the ingestion and writer collaborators.
//!
//! Interferogram cubes are indexed `[x, y, z]` where `z` is the OPD step.
//! Spectral cubes are indexed `[x, y, channel]` on the output wavenumber grid
//! and carry one [`QualityFlags`] byte per pixel.

use std::fmt;

use bitflags::bitflags;
use ndarray::{s, Array2, Array3, ArrayView1, ArrayView3, Axis};

use crate::quadrant::Quadrant;

/// Detector channel of the two-camera instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Camera {
    One,
    Two,
}

impl Camera {
    /// 1-based camera number as used in configuration keys.
    pub fn number(self) -> u8 {
        match self {
            Camera::One => 1,
            Camera::Two => 2,
        }
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Exposure metadata supplied by the preprocessing collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureMetadata {
    /// Detector temperature during the exposure, °C, when recorded.
    pub temperature_c: Option<f64>,
    /// Integration time of one frame, seconds.
    pub integration_time_s: f64,
}

impl Default for ExposureMetadata {
    fn default() -> Self {
        Self {
            temperature_c: None,
            integration_time_s: 1.0,
        }
    }
}

/// Anything that can hand out rectangular regions of an interferogram cube.
///
/// The in-memory [`InterferogramCube`] implements it; file readers living
/// outside this crate implement it to stream quadrants in BIG_DATA mode.
/// Implementations are shared across worker threads.
pub trait CubeSource: Sync {
    /// `(width, height, n_samples)`.
    fn dimensions(&self) -> (usize, usize, usize);

    fn metadata(&self) -> ExposureMetadata;

    /// Load the `[x, y, z]` samples covered by `quadrant`.
    fn load_region(&self, quadrant: &Quadrant) -> anyhow::Result<Array3<f64>>;
}

/// Bias/dark/flat corrected interferogram cube held in memory.
#[derive(Debug, Clone)]
pub struct InterferogramCube {
    data: Array3<f64>,
    metadata: ExposureMetadata,
}

impl InterferogramCube {
    pub fn new(data: Array3<f64>, metadata: ExposureMetadata) -> Self {
        Self { data, metadata }
    }

    pub fn width(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn n_samples(&self) -> usize {
        self.data.dim().2
    }

    pub fn data(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    /// Interferogram of one pixel.
    pub fn pixel(&self, x: usize, y: usize) -> ArrayView1<'_, f64> {
        self.data.slice(s![x, y, ..])
    }

    /// Deep frame: mean over the OPD axis, NaN samples counted as zero.
    pub fn mean_image(&self) -> Array2<f64> {
        mean_image(self.data.view())
    }
}

impl CubeSource for InterferogramCube {
    fn dimensions(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    fn metadata(&self) -> ExposureMetadata {
        self.metadata
    }

    fn load_region(&self, quadrant: &Quadrant) -> anyhow::Result<Array3<f64>> {
        let (w, h, _) = self.data.dim();
        if quadrant.x_max > w || quadrant.y_max > h {
            anyhow::bail!(
                "quadrant {} [{}..{}, {}..{}] exceeds cube of {}x{} pixels",
                quadrant.index,
                quadrant.x_min,
                quadrant.x_max,
                quadrant.y_min,
                quadrant.y_max,
                w,
                h
            );
        }
        Ok(self
            .data
            .slice(s![quadrant.x_min..quadrant.x_max, quadrant.y_min..quadrant.y_max, ..])
            .to_owned())
    }
}

/// Mean over the last axis of an `[x, y, z]` cube. NaN samples count as zero.
pub fn mean_image(data: ArrayView3<'_, f64>) -> Array2<f64> {
    let n = data.dim().2.max(1) as f64;
    data.map_axis(Axis(2), |lane| {
        lane.iter().filter(|v| !v.is_nan()).sum::<f64>() / n
    })
}

// ── Quality flags ───────────────────────────────────────────────────────────

bitflags! {
    /// Per-pixel quality bits on the spectral cube.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct QualityFlags: u8 {
        /// At least one interferogram sample exceeded the saturation threshold.
        const SATURATED = 1 << 0;
        /// The phase model was inherited from a neighbouring bin.
        const PHASE_FALLBACK = 1 << 1;
        /// The interferogram carried no finite sample.
        const NO_DATA = 1 << 2;
    }
}

/// Saturated pixels found in one quadrant. Advisory: the pixels are still
/// transformed and carry [`QualityFlags::SATURATED`].
#[derive(Debug, Clone, PartialEq)]
pub struct SaturationWarning {
    pub camera: Camera,
    pub quadrant: usize,
    /// Number of saturated pixels in the quadrant.
    pub pixels: usize,
    /// Largest sample value seen among them.
    pub max_value: f64,
}

// ── Spectral output ─────────────────────────────────────────────────────────

/// Transformed spectra for one rectangular tile, in tile-local coordinates.
#[derive(Debug, Clone)]
pub struct SpectralBlock {
    /// `[x, y, channel]`.
    pub data: Array3<f64>,
    /// `[x, y]`.
    pub flags: Array2<QualityFlags>,
}

/// Calibrated spectral cube `[x, y, channel]` for one camera.
#[derive(Debug, Clone)]
pub struct SpectralCube {
    data: Array3<f64>,
    flags: Array2<QualityFlags>,
    wavenumber_cm1: Vec<f64>,
    calibration: Array2<f64>,
}

impl SpectralCube {
    /// Empty cube. `wavenumber_cm1` is the on-axis channel grid; pixel `(x, y)`
    /// is scaled by `calibration[[x, y]]`.
    pub fn new(
        width: usize,
        height: usize,
        wavenumber_cm1: Vec<f64>,
        calibration: Array2<f64>,
    ) -> Self {
        let n_channels = wavenumber_cm1.len();
        Self {
            data: Array3::zeros((width, height, n_channels)),
            flags: Array2::from_elem((width, height), QualityFlags::empty()),
            wavenumber_cm1,
            calibration,
        }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn n_channels(&self) -> usize {
        self.wavenumber_cm1.len()
    }

    pub fn data(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    pub fn flags(&self) -> &Array2<QualityFlags> {
        &self.flags
    }

    /// On-axis wavenumber grid, cm⁻¹.
    pub fn wavenumber_axis(&self) -> &[f64] {
        &self.wavenumber_cm1
    }

    /// Wavenumber grid of one pixel, cm⁻¹.
    pub fn pixel_wavenumber_axis(&self, x: usize, y: usize) -> Vec<f64> {
        let c = self.calibration[[x, y]];
        self.wavenumber_cm1.iter().map(|s| s * c).collect()
    }

    pub fn spectrum(&self, x: usize, y: usize) -> ArrayView1<'_, f64> {
        self.data.slice(s![x, y, ..])
    }

    pub fn flag(&self, x: usize, y: usize) -> QualityFlags {
        self.flags[[x, y]]
    }

    /// Number of pixels carrying `flag`.
    pub fn count_flagged(&self, flag: QualityFlags) -> usize {
        self.flags.iter().filter(|f| f.contains(flag)).count()
    }

    /// Copy a tile into place. Positional, no blending.
    pub(crate) fn write_block(&mut self, quadrant: &Quadrant, block: &SpectralBlock) {
        let region = s![quadrant.x_min..quadrant.x_max, quadrant.y_min..quadrant.y_max, ..];
        self.data.slice_mut(region).assign(&block.data);
        self.flags
            .slice_mut(s![quadrant.x_min..quadrant.x_max, quadrant.y_min..quadrant.y_max])
            .assign(&block.flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_image_ignores_nan() {
        let mut data = Array3::<f64>::ones((2, 2, 4));
        data[[0, 0, 1]] = f64::NAN;
        let mean = mean_image(data.view());
        assert!((mean[[0, 0]] - 0.75).abs() < 1e-12);
        assert!((mean[[1, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_quality_flags() {
        let mut f = QualityFlags::empty();
        assert!(f.is_empty());
        f.insert(QualityFlags::SATURATED);
        f |= QualityFlags::PHASE_FALLBACK;
        assert!(f.contains(QualityFlags::SATURATED));
        assert!(f.contains(QualityFlags::SATURATED | QualityFlags::PHASE_FALLBACK));
        assert!(!f.contains(QualityFlags::NO_DATA));
        assert_eq!(f.bits(), 0b011);
        assert_eq!(QualityFlags::from_bits(0b011), Some(f));
        assert!(QualityFlags::from_bits(1 << 3).is_none());
        assert!(QualityFlags::default().is_empty());
    }

    #[test]
    fn test_load_region_bounds() {
        let cube = InterferogramCube::new(
            Array3::from_shape_fn((4, 3, 2), |(x, y, z)| (x * 100 + y * 10 + z) as f64),
            ExposureMetadata::default(),
        );
        let q = Quadrant {
            index: 0,
            x_min: 1,
            x_max: 3,
            y_min: 1,
            y_max: 3,
        };
        let region = cube.load_region(&q).unwrap();
        assert_eq!(region.dim(), (2, 2, 2));
        assert_eq!(region[[0, 0, 1]], 111.0);

        let bad = Quadrant { x_max: 5, ..q };
        assert!(cube.load_region(&bad).is_err());
    }

    #[test]
    fn test_camera_display() {
        assert_eq!(Camera::One.to_string(), "1");
        assert_eq!(Camera::Two.to_string(), "2");
    }
}
