//! Photometric model of the instrument.
//!
//! Converts a flux density (erg/cm²/s/Å) into detector counts per second in
//! each spectral channel, and back. The throughput is the product of the
//! atmosphere, the telescope (mirror transmission squared), the instrument
//! optics, the filter and the camera quantum efficiency. The modulated
//! throughput additionally includes the interferometer modulation efficiency.
//!
//! All curves are measured artifacts handed in as [`TransmissionCurve`]s and
//! projected onto the spectral cube's wavenumber axis.

use std::f64::consts::PI;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::calibration::cm1_to_nm;
use crate::config::PhotometryConfig;
use crate::cube::Camera;
use crate::error::ConfigError;

/// Planck constant, erg·s.
const PLANCK_ERG_S: f64 = 6.626_070_15e-27;
/// Speed of light, cm/s.
const LIGHT_SPEED_CM_S: f64 = 2.997_924_58e10;
/// Wavelength the wavefront error is expressed against, nm.
const WF_REFERENCE_NM: f64 = 632.8;

/// Atmospheric extinction (magnitudes per airmass) → transmission.
pub fn ext2trans(extinction: f64, airmass: f64) -> f64 {
    10f64.powf(-0.4 * extinction * airmass)
}

/// Energy of one photon at `wavelength_nm`, erg.
pub fn photon_energy_erg(wavelength_nm: f64) -> f64 {
    PLANCK_ERG_S * LIGHT_SPEED_CM_S / (wavelength_nm * 1e-7)
}

/// Fringe contrast loss from a Gaussian OPD jitter of RMS `jitter_nm`.
pub fn modulation_efficiency_opd_jitter(sigma_cm1: f64, jitter_nm: f64) -> f64 {
    let phase = 2.0 * PI * sigma_cm1 * jitter_nm * 1e-7;
    (-0.5 * phase * phase).exp()
}

/// Fringe contrast loss from an RMS wavefront error given as a fraction of
/// 632.8 nm.
pub fn modulation_efficiency_wavefront_error(sigma_cm1: f64, wf_error: f64) -> f64 {
    let phase = 2.0 * PI * sigma_cm1 * wf_error * WF_REFERENCE_NM * 1e-7;
    (-0.5 * phase * phase).exp()
}

/// Channel width in nm for a channel of width `delta_cm1` at `sigma_cm1`.
pub fn channel_width_nm(delta_cm1: f64, sigma_cm1: f64) -> f64 {
    1e7 * delta_cm1 / (sigma_cm1 * sigma_cm1)
}

/// Transmission (or efficiency) as a function of wavelength, linearly
/// interpolated and zero outside its sampled range.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionCurve {
    wavelength_nm: Vec<f64>,
    values: Vec<f64>,
}

impl TransmissionCurve {
    /// Samples are sorted by wavelength. Fails on length mismatch, fewer than
    /// two samples or non-finite values.
    pub fn new(wavelength_nm: Vec<f64>, values: Vec<f64>) -> Result<Self, ConfigError> {
        if wavelength_nm.len() != values.len() {
            return Err(ConfigError::invalid(
                "transmission curve",
                format!("{} wavelengths, {} values", wavelength_nm.len(), values.len()),
                "lengths differ",
            ));
        }
        if wavelength_nm.len() < 2 {
            return Err(ConfigError::invalid(
                "transmission curve",
                wavelength_nm.len(),
                "need at least two samples",
            ));
        }
        if wavelength_nm.iter().chain(&values).any(|v| !v.is_finite()) {
            return Err(ConfigError::invalid(
                "transmission curve",
                "NaN/inf",
                "samples must be finite",
            ));
        }
        let mut pairs: Vec<(f64, f64)> = wavelength_nm.into_iter().zip(values).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (wavelength_nm, values) = pairs.into_iter().unzip();
        Ok(Self {
            wavelength_nm,
            values,
        })
    }

    /// A flat curve over all wavelengths.
    pub fn constant(value: f64) -> Self {
        Self {
            wavelength_nm: vec![0.0, f64::MAX],
            values: vec![value, value],
        }
    }

    /// Read a two-column `wavelength_nm, value` CSV with a header row.
    pub fn from_csv<P: AsRef<Path>>(file: P) -> anyhow::Result<Self> {
        let path = file.as_ref();
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_path(path)
            .with_context(|| format!("Failed to open transmission curve {}", path.display()))?;
        let mut wavelength_nm = Vec::new();
        let mut values = Vec::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let field = |i: usize| -> anyhow::Result<f64> {
                record
                    .get(i)
                    .unwrap_or("")
                    .parse::<f64>()
                    .with_context(|| format!("{}: row {}, column {}", path.display(), row + 2, i + 1))
            };
            wavelength_nm.push(field(0)?);
            values.push(field(1)?);
        }
        Self::new(wavelength_nm, values)
            .with_context(|| format!("Invalid transmission curve {}", path.display()))
    }

    pub fn at_nm(&self, nm: f64) -> f64 {
        let wl = &self.wavelength_nm;
        if !(nm >= wl[0] && nm <= wl[wl.len() - 1]) {
            return 0.0;
        }
        let i = wl.partition_point(|&w| w <= nm).clamp(1, wl.len() - 1);
        let (w0, w1) = (wl[i - 1], wl[i]);
        let (v0, v1) = (self.values[i - 1], self.values[i]);
        if w1 == w0 {
            return v1;
        }
        v0 + (v1 - v0) * (nm - w0) / (w1 - w0)
    }

    /// Values on a wavenumber axis (cm⁻¹).
    pub fn project(&self, cm1_axis: &[f64]) -> Vec<f64> {
        cm1_axis.iter().map(|&s| self.at_nm(cm1_to_nm(s))).collect()
    }
}

/// Cameras whose combined output a flux refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraSet {
    /// Both cameras combined (index 0).
    Both,
    Single(Camera),
}

impl CameraSet {
    /// 0 = both cameras, 1 or 2 = that camera.
    pub fn from_index(index: u8) -> Result<Self, ConfigError> {
        match index {
            0 => Ok(CameraSet::Both),
            1 => Ok(CameraSet::Single(Camera::One)),
            2 => Ok(CameraSet::Single(Camera::Two)),
            other => Err(ConfigError::invalid(
                "camera index",
                other,
                "must be 0 (both), 1 or 2",
            )),
        }
    }

    pub fn index(self) -> u8 {
        match self {
            CameraSet::Both => 0,
            CameraSet::Single(camera) => camera.number(),
        }
    }
}

/// Transmission terms of the throughput chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionTerm {
    Atmosphere,
    Mirror,
    Optics,
    Filter,
    /// Mirror transmission squared.
    Telescope,
}

/// Instrument throughput on a fixed wavenumber axis.
#[derive(Debug, Clone)]
pub struct PhotometricModel {
    cm1_axis: Vec<f64>,
    cameras: CameraSet,
    filter: Vec<f64>,
    atmosphere: Vec<f64>,
    mirror: Vec<f64>,
    optics: Vec<f64>,
    qe1: Vec<f64>,
    qe2: Vec<f64>,
    /// Interferometer four-reflection/transmission efficiency.
    modulation: Vec<f64>,
    config: PhotometryConfig,
}

impl PhotometricModel {
    /// Model with every optional term flat at 1. `cm1_axis` must be a
    /// uniform, increasing grid of at least two channels.
    pub fn new(
        cm1_axis: Vec<f64>,
        filter: &TransmissionCurve,
        cameras: CameraSet,
        config: PhotometryConfig,
    ) -> Result<Self, ConfigError> {
        if cm1_axis.len() < 2 || cm1_axis.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ConfigError::invalid(
                "wavenumber axis",
                cm1_axis.len(),
                "need at least two increasing channels",
            ));
        }
        let ones = vec![1.0; cm1_axis.len()];
        Ok(Self {
            filter: filter.project(&cm1_axis),
            atmosphere: ones.clone(),
            mirror: ones.clone(),
            optics: ones.clone(),
            qe1: ones.clone(),
            qe2: ones.clone(),
            modulation: ones,
            cm1_axis,
            cameras,
            config,
        })
    }

    /// Atmospheric extinction curve (magnitudes per airmass).
    pub fn with_atmosphere(mut self, extinction: &TransmissionCurve, airmass: f64) -> Self {
        self.atmosphere = extinction
            .project(&self.cm1_axis)
            .into_iter()
            .map(|ext| ext2trans(ext, airmass))
            .collect();
        self
    }

    pub fn with_mirror(mut self, curve: &TransmissionCurve) -> Self {
        self.mirror = curve.project(&self.cm1_axis);
        self
    }

    pub fn with_optics(mut self, curve: &TransmissionCurve) -> Self {
        self.optics = curve.project(&self.cm1_axis);
        self
    }

    pub fn with_quantum_efficiency(mut self, camera: Camera, curve: &TransmissionCurve) -> Self {
        let qe = curve.project(&self.cm1_axis);
        match camera {
            Camera::One => self.qe1 = qe,
            Camera::Two => self.qe2 = qe,
        }
        self
    }

    pub fn with_modulation_curve(mut self, curve: &TransmissionCurve) -> Self {
        self.modulation = curve.project(&self.cm1_axis);
        self
    }

    pub fn cm1_axis(&self) -> &[f64] {
        &self.cm1_axis
    }

    pub fn cameras(&self) -> CameraSet {
        self.cameras
    }

    pub fn transmission(&self, term: TransmissionTerm) -> Vec<f64> {
        match term {
            TransmissionTerm::Atmosphere => self.atmosphere.clone(),
            TransmissionTerm::Mirror => self.mirror.clone(),
            TransmissionTerm::Optics => self.optics.clone(),
            TransmissionTerm::Filter => self.filter.clone(),
            TransmissionTerm::Telescope => self.mirror.iter().map(|m| m * m).collect(),
        }
    }

    /// Quantum efficiency; the mean of both cameras for [`CameraSet::Both`].
    pub fn quantum_efficiency(&self) -> Vec<f64> {
        match self.cameras {
            CameraSet::Both => self
                .qe1
                .iter()
                .zip(&self.qe2)
                .map(|(a, b)| 0.5 * (a + b))
                .collect(),
            CameraSet::Single(Camera::One) => self.qe1.clone(),
            CameraSet::Single(Camera::Two) => self.qe2.clone(),
        }
    }

    /// Gain in counts per electron; the mean of both cameras for
    /// [`CameraSet::Both`].
    pub fn gain(&self) -> Result<f64, ConfigError> {
        let gain = |value: Option<f64>, key: &str| {
            value.ok_or_else(|| ConfigError::Missing {
                key: key.to_string(),
            })
        };
        match self.cameras {
            CameraSet::Both => Ok(0.5
                * (gain(self.config.cam1_gain, "CAM1_GAIN")?
                    + gain(self.config.cam2_gain, "CAM2_GAIN")?)),
            CameraSet::Single(Camera::One) => gain(self.config.cam1_gain, "CAM1_GAIN"),
            CameraSet::Single(Camera::Two) => gain(self.config.cam2_gain, "CAM2_GAIN"),
        }
    }

    /// Throughput without the interferometer modulation. A single camera
    /// receives half of the light. `eps` divides the result when given.
    pub fn unmodulated_transmission(&self, eps: Option<f64>) -> Vec<f64> {
        let split = match self.cameras {
            CameraSet::Both => 1.0,
            CameraSet::Single(_) => 0.5,
        };
        let eps = eps.unwrap_or(1.0);
        let qe = self.quantum_efficiency();
        (0..self.cm1_axis.len())
            .map(|i| {
                self.atmosphere[i]
                    * self.mirror[i]
                    * self.mirror[i]
                    * self.optics[i]
                    * self.filter[i]
                    * qe[i]
                    * split
                    / eps
            })
            .collect()
    }

    /// Modulation efficiency per channel. The OPD jitter term enters squared
    /// since tip-tilt jitter costs the same contrast.
    pub fn modulation_efficiency(&self) -> Vec<f64> {
        self.cm1_axis
            .iter()
            .zip(&self.modulation)
            .map(|(&s, &m)| {
                let jitter = modulation_efficiency_opd_jitter(s, self.config.opd_jitter_nm);
                m * jitter * jitter * modulation_efficiency_wavefront_error(s, self.config.wf_error)
            })
            .collect()
    }

    pub fn modulated_transmission(&self, eps: Option<f64>) -> Vec<f64> {
        self.unmodulated_transmission(eps)
            .into_iter()
            .zip(self.modulation_efficiency())
            .map(|(t, m)| t * m)
            .collect()
    }

    /// Flux density per channel (erg/cm²/s/Å) → counts/s per channel.
    pub fn flux_to_counts(
        &self,
        flux: &[f64],
        modulated: bool,
        eps: Option<f64>,
    ) -> Result<Vec<f64>, ConfigError> {
        if flux.len() != self.cm1_axis.len() {
            return Err(ConfigError::invalid(
                "flux",
                flux.len(),
                format!("expected {} channels", self.cm1_axis.len()),
            ));
        }
        let surface = self
            .config
            .mirror_surface_cm2
            .ok_or_else(|| ConfigError::Missing {
                key: "MIR_SURFACE".to_string(),
            })?;
        let gain = self.gain()?;
        let transmission = if modulated {
            self.modulated_transmission(eps)
        } else {
            self.unmodulated_transmission(eps)
        };
        let delta_cm1 = self.cm1_axis[1] - self.cm1_axis[0];
        Ok(self
            .cm1_axis
            .iter()
            .zip(flux)
            .zip(&transmission)
            .map(|((&sigma, &f), &t)| {
                let photons = f / photon_energy_erg(cm1_to_nm(sigma));
                // counts/s/Å times the channel width in Å
                photons * surface * t * gain * channel_width_nm(delta_cm1, sigma) * 10.0
            })
            .collect())
    }

    /// Counts/s per channel → flux density: the inverse of the counts a unit
    /// flux produces. Values outside the filter band (where the filter is
    /// below half its peak) are held at the band edge values.
    pub fn flux_calibration(&self, modulated: bool, eps: Option<f64>) -> Result<Vec<f64>, ConfigError> {
        let unit = vec![1.0; self.cm1_axis.len()];
        let mut calib: Vec<f64> = self
            .flux_to_counts(&unit, modulated, eps)?
            .into_iter()
            .map(|c| 1.0 / c)
            .collect();
        if let Some((lo, hi)) = self.filter_band() {
            let (first, last) = (calib[lo], calib[hi]);
            calib[..lo].fill(first);
            calib[hi + 1..].fill(last);
            debug!("Flux calibration clamped outside channels {lo}..={hi}");
        }
        Ok(calib)
    }

    /// First and last channel where the filter reaches half its peak.
    pub fn filter_band(&self) -> Option<(usize, usize)> {
        let peak = self.filter.iter().copied().fold(0.0, f64::max);
        if peak <= 0.0 {
            return None;
        }
        let inside = |v: &f64| *v >= 0.5 * peak;
        let lo = self.filter.iter().position(inside)?;
        let hi = self.filter.iter().rposition(inside)?;
        Some((lo, hi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::nm_to_cm1;

    fn axis() -> Vec<f64> {
        (0..100).map(|i| 14000.0 + 50.0 * i as f64).collect()
    }

    fn filter() -> TransmissionCurve {
        // Top hat between 550 and 650 nm with short ramps.
        TransmissionCurve::new(
            vec![540.0, 550.0, 650.0, 660.0],
            vec![0.0, 0.9, 0.9, 0.0],
        )
        .unwrap()
    }

    fn config() -> PhotometryConfig {
        PhotometryConfig {
            mirror_surface_cm2: Some(80000.0),
            cam1_gain: Some(0.5),
            cam2_gain: Some(0.7),
            opd_jitter_nm: 0.0,
            wf_error: 0.0,
        }
    }

    #[test]
    fn test_ext2trans() {
        assert!((ext2trans(0.0, 1.5) - 1.0).abs() < 1e-15);
        assert!((ext2trans(1.0, 1.0) - 10f64.powf(-0.4)).abs() < 1e-15);
        assert!((ext2trans(0.5, 2.0) - ext2trans(1.0, 1.0)).abs() < 1e-15);
    }

    #[test]
    fn test_curve_interpolation() {
        let c = TransmissionCurve::new(vec![500.0, 400.0], vec![1.0, 0.0]).unwrap();
        assert!((c.at_nm(450.0) - 0.5).abs() < 1e-12);
        assert_eq!(c.at_nm(399.0), 0.0);
        assert_eq!(c.at_nm(500.0), 1.0);
        let projected = c.project(&[nm_to_cm1(425.0)]);
        assert!((projected[0] - 0.25).abs() < 1e-9);
        assert!(TransmissionCurve::new(vec![1.0], vec![1.0]).is_err());
    }

    #[test]
    fn test_modulation_efficiency_limits() {
        assert_eq!(modulation_efficiency_opd_jitter(15000.0, 0.0), 1.0);
        let me = modulation_efficiency_opd_jitter(15000.0, 10.0);
        assert!(me < 1.0 && me > 0.9);
        assert!(modulation_efficiency_wavefront_error(15000.0, 1.0 / 30.0) < 1.0);
    }

    #[test]
    fn test_camera_combination() {
        let both = PhotometricModel::new(axis(), &filter(), CameraSet::Both, config()).unwrap();
        let one = PhotometricModel::new(
            axis(),
            &filter(),
            CameraSet::from_index(1).unwrap(),
            config(),
        )
        .unwrap();
        assert!((both.gain().unwrap() - 0.6).abs() < 1e-12);
        assert_eq!(one.gain().unwrap(), 0.5);
        let tb = both.unmodulated_transmission(None);
        let t1 = one.unmodulated_transmission(None);
        assert!(tb.iter().zip(&t1).all(|(b, o)| (o - 0.5 * b).abs() < 1e-15));
        assert!(CameraSet::from_index(3).is_err());
        assert_eq!(CameraSet::Single(Camera::Two).index(), 2);
    }

    #[test]
    fn test_flux_calibration_inverts_counts() {
        let model = PhotometricModel::new(axis(), &filter(), CameraSet::Both, config()).unwrap();
        let calib = model.flux_calibration(true, None).unwrap();
        let (lo, hi) = model.filter_band().unwrap();
        assert!(lo > 0 && hi < 99);
        let counts = model.flux_to_counts(&vec![2.0; 100], true, None).unwrap();
        for i in lo..=hi {
            assert!((counts[i] * calib[i] - 2.0).abs() < 1e-9);
        }
        assert_eq!(calib[0], calib[lo]);
        assert_eq!(calib[99], calib[hi]);
    }

    #[test]
    fn test_missing_surface_is_reported() {
        let model = PhotometricModel::new(
            axis(),
            &filter(),
            CameraSet::Both,
            PhotometryConfig::default(),
        )
        .unwrap();
        let err = model.flux_to_counts(&vec![1.0; 100], false, None).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "MIR_SURFACE".to_string()
            }
        );
    }
}
