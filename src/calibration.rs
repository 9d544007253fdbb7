//! Calibration geometry: OPD sampling, folding order and wavenumber axes.
//!
//! An interferogram sampled every `step` nm of OPD only resolves wavenumbers
//! modulo `1/step`. With folding order `n`, the physical band that maps onto
//! the sampled frequencies without ambiguity is the free spectral range
//!
//! ```text
//! σ ∈ [ n / (2·step), (n + 1) / (2·step) ]        (cm⁻¹, step converted to cm)
//! ```
//!
//! whose upper edge is the Nyquist bound of the folded spectrum. Off-axis
//! pixels see an OPD shortened by `cos θ`, which stretches their wavenumber
//! axis by the calibration coefficient `c = 1 / cos θ`.

use ndarray::Array2;

use crate::config::{DetectorSize, InstrumentConfig, OffAxisAngles};
use crate::cube::Camera;
use crate::error::ConfigError;

/// Convert a wavelength in nm to a wavenumber in cm⁻¹.
#[inline]
pub fn nm_to_cm1(nm: f64) -> f64 {
    1e7 / nm
}

/// Convert a wavenumber in cm⁻¹ to a wavelength in nm.
#[inline]
pub fn cm1_to_nm(cm1: f64) -> f64 {
    1e7 / cm1
}

/// Calibration coefficient `1 / cos θ` for an incidence angle in degrees.
#[inline]
pub fn theta_to_coeff(theta_deg: f64) -> f64 {
    1.0 / theta_deg.to_radians().cos()
}

/// Immutable instrument geometry. Construct once from the configuration and
/// share by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationGeometry {
    laser_wavelength_nm: f64,
    folding_order: u32,
    step_size_nm: f64,
    cam1_size: DetectorSize,
    cam2_size: DetectorSize,
    off_axis: Option<OffAxisAngles>,
    band_nm: (f64, f64),
}

impl CalibrationGeometry {
    /// Default sensitive band of the detectors, nm.
    pub const DEFAULT_BAND_NM: (f64, f64) = (300.0, 1100.0);

    /// Build an on-axis geometry with the default detector band.
    pub fn new(
        laser_wavelength_nm: f64,
        folding_order: u32,
        step_size_nm: f64,
        cam1_size: DetectorSize,
        cam2_size: DetectorSize,
    ) -> Result<Self, ConfigError> {
        Self::build(
            laser_wavelength_nm,
            folding_order,
            step_size_nm,
            cam1_size,
            cam2_size,
            None,
            Self::DEFAULT_BAND_NM,
        )
    }

    /// Build from the parsed instrument configuration.
    pub fn from_config(config: &InstrumentConfig) -> Result<Self, ConfigError> {
        Self::build(
            config.laser_wavelength_nm,
            config.folding_order,
            config.step_size_nm,
            config.cam1_size,
            config.cam2_size,
            config.off_axis,
            config.band_nm,
        )
    }

    /// Return a copy using the given off-axis angle model.
    pub fn with_off_axis(self, off_axis: OffAxisAngles) -> Result<Self, ConfigError> {
        Self::build(
            self.laser_wavelength_nm,
            self.folding_order,
            self.step_size_nm,
            self.cam1_size,
            self.cam2_size,
            Some(off_axis),
            self.band_nm,
        )
    }

    fn build(
        laser_wavelength_nm: f64,
        folding_order: u32,
        step_size_nm: f64,
        cam1_size: DetectorSize,
        cam2_size: DetectorSize,
        off_axis: Option<OffAxisAngles>,
        band_nm: (f64, f64),
    ) -> Result<Self, ConfigError> {
        if !(laser_wavelength_nm.is_finite() && laser_wavelength_nm > 0.0) {
            return Err(ConfigError::invalid(
                "CALIB_NM_LASER",
                laser_wavelength_nm,
                "must be a positive wavelength",
            ));
        }
        if folding_order == 0 {
            return Err(ConfigError::invalid(
                "CALIB_ORDER",
                folding_order,
                "order 0 includes the zero wavenumber and cannot be calibrated",
            ));
        }
        if !(step_size_nm.is_finite() && step_size_nm > 0.0) {
            return Err(ConfigError::invalid(
                "CALIB_STEP_SIZE",
                step_size_nm,
                "must be a positive step",
            ));
        }
        if !(band_nm.0 > 0.0 && band_nm.1 > band_nm.0) {
            return Err(ConfigError::invalid(
                "DETECTOR_MIN_NM",
                band_nm.0,
                format!("detector band [{}, {}] nm is empty", band_nm.0, band_nm.1),
            ));
        }
        if let Some(angles) = off_axis {
            if !(angles.max_deg < 90.0 && angles.min_deg >= 0.0) {
                return Err(ConfigError::invalid(
                    "OFF_AXIS_ANGLE_MAX",
                    angles.max_deg,
                    "off-axis angles must lie in [0, 90) degrees",
                ));
            }
        }

        let geometry = Self {
            laser_wavelength_nm,
            folding_order,
            step_size_nm,
            cam1_size,
            cam2_size,
            off_axis,
            band_nm,
        };

        let (fsr_min, fsr_max) = geometry.free_spectral_range_cm1();
        let laser_cm1 = geometry.laser_wavenumber_cm1();
        if laser_cm1 < fsr_min || laser_cm1 >= fsr_max {
            return Err(ConfigError::Aliasing {
                laser_cm1,
                order: folding_order,
                step_nm: step_size_nm,
                fsr_min_cm1: fsr_min,
                fsr_max_cm1: fsr_max,
            });
        }

        // The FSR must be observable: its wavelength span has to sit inside the
        // detector's sensitive band.
        let fsr_min_nm = cm1_to_nm(fsr_max);
        let fsr_max_nm = cm1_to_nm(fsr_min);
        if fsr_min_nm < band_nm.0 || fsr_max_nm > band_nm.1 {
            return Err(ConfigError::OutOfBand {
                fsr_min_nm,
                fsr_max_nm,
                band_min_nm: band_nm.0,
                band_max_nm: band_nm.1,
                order: folding_order,
                step_nm: step_size_nm,
            });
        }

        Ok(geometry)
    }

    pub fn laser_wavelength_nm(&self) -> f64 {
        self.laser_wavelength_nm
    }

    pub fn folding_order(&self) -> u32 {
        self.folding_order
    }

    pub fn step_size_nm(&self) -> f64 {
        self.step_size_nm
    }

    pub fn off_axis(&self) -> Option<&OffAxisAngles> {
        self.off_axis.as_ref()
    }

    /// Detector size of the given camera.
    pub fn detector_size(&self, camera: Camera) -> DetectorSize {
        match camera {
            Camera::One => self.cam1_size,
            Camera::Two => self.cam2_size,
        }
    }

    /// Laser wavenumber in cm⁻¹.
    pub fn laser_wavenumber_cm1(&self) -> f64 {
        nm_to_cm1(self.laser_wavelength_nm)
    }

    /// Free spectral range `[order/(2·step), (order+1)/(2·step)]` in cm⁻¹, on axis.
    pub fn free_spectral_range_cm1(&self) -> (f64, f64) {
        let half_sampling = 1.0 / (2.0 * self.step_size_nm * 1e-7);
        (
            self.folding_order as f64 * half_sampling,
            (self.folding_order + 1) as f64 * half_sampling,
        )
    }

    /// Largest unambiguous wavenumber for a pixel with coefficient `coeff`.
    pub fn nyquist_wavenumber_cm1(&self, coeff: f64) -> f64 {
        self.free_spectral_range_cm1().1 * coeff
    }

    /// Width of one output channel when the FSR is split into `n_channels`.
    pub fn channel_width_cm1(&self, n_channels: usize, coeff: f64) -> f64 {
        let (lo, hi) = self.free_spectral_range_cm1();
        coeff * (hi - lo) / n_channels.max(1) as f64
    }

    /// OPD of each sample, `i · step`, in nm.
    pub fn opd_axis(&self, n_samples: usize) -> Vec<f64> {
        (0..n_samples)
            .map(|i| i as f64 * self.step_size_nm)
            .collect()
    }

    /// Wavenumber of each of `n_channels` output channels, in cm⁻¹.
    ///
    /// `σ_j = coeff · (order + j / n_channels) / (2·step)`. Strictly
    /// increasing; the last channel sits one channel width below the Nyquist
    /// bound. Use `coeff = 1.0` on axis or
    /// [`calibration_coeff`](Self::calibration_coeff) for a given pixel.
    pub fn wavenumber_axis(&self, n_channels: usize, coeff: f64) -> Vec<f64> {
        let (lo, _) = self.free_spectral_range_cm1();
        let width = self.channel_width_cm1(n_channels, coeff);
        (0..n_channels)
            .map(|j| coeff * lo + j as f64 * width)
            .collect()
    }

    /// Same axis as [`wavenumber_axis`](Self::wavenumber_axis), in nm (decreasing).
    pub fn wavelength_axis_nm(&self, n_channels: usize, coeff: f64) -> Vec<f64> {
        self.wavenumber_axis(n_channels, coeff)
            .into_iter()
            .map(cm1_to_nm)
            .collect()
    }

    /// Fractional channel index of `sigma_cm1`, or `None` when it lies outside
    /// the folded band (it would alias).
    pub fn channel_of(&self, sigma_cm1: f64, n_channels: usize, coeff: f64) -> Option<f64> {
        let lo = self.free_spectral_range_cm1().0 * coeff;
        let hi = self.nyquist_wavenumber_cm1(coeff);
        if sigma_cm1 < lo || sigma_cm1 >= hi {
            return None;
        }
        Some((sigma_cm1 - lo) / self.channel_width_cm1(n_channels, coeff))
    }

    /// Incidence angle at a pixel, degrees.
    ///
    /// Grows linearly with the radial distance from the detector center, from
    /// the center angle to the maximum angle at the corners, clamped to the
    /// configured [min, max]. Zero without an off-axis model.
    pub fn off_axis_angle_deg(&self, camera: Camera, x: f64, y: f64) -> f64 {
        let Some(angles) = self.off_axis else {
            return 0.0;
        };
        let size = self.detector_size(camera);
        let (cx, cy) = size.center();
        let r = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
        let r_corner = (cx * cx + cy * cy).sqrt();
        let theta = angles.center_deg + (angles.max_deg - angles.center_deg) * r / r_corner;
        theta.clamp(angles.min_deg, angles.max_deg)
    }

    /// Calibration coefficient `1 / cos θ` at a pixel.
    pub fn calibration_coeff(&self, camera: Camera, x: f64, y: f64) -> f64 {
        theta_to_coeff(self.off_axis_angle_deg(camera, x, y))
    }

    /// Calibration coefficient implied by a laser line measured at `measured_nm`.
    pub fn coeff_from_laser(&self, measured_nm: f64) -> f64 {
        measured_nm / self.laser_wavelength_nm
    }

    /// Per-pixel calibration coefficients for a whole detector, indexed `[x, y]`.
    pub fn calibration_map(&self, camera: Camera) -> Array2<f64> {
        let size = self.detector_size(camera);
        Array2::from_shape_fn((size.width, size.height), |(x, y)| {
            self.calibration_coeff(camera, x as f64, y as f64)
        })
    }
}
