//! Pipeline configuration.
//!
//! The instrument is described by a flat key→value manifest (one `KEY value`
//! pair per line in the on-disk option files). [`PipelineConfig::from_map`]
//! parses it once into an immutable, typed struct that components borrow; no
//! component looks keys up at run time.
//!
//! Calibration-critical keys (laser, folding order, step size, detector
//! sizes, phase fit settings, registration seed) are required and fail fast
//! with [`ConfigError::Missing`]. Everything else has a documented default.
//! Unknown keys are ignored.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use ifts::PipelineConfig;
//!
//! let manifest: HashMap<String, String> = [
//!     ("CALIB_NM_LASER", "543.5"),
//!     ("CALIB_ORDER", "11"),
//!     ("CALIB_STEP_SIZE", "3255.231"),
//!     ("CAM1_DETECTOR_SIZE_X", "2048"),
//!     ("CAM1_DETECTOR_SIZE_Y", "2064"),
//!     ("CAM2_DETECTOR_SIZE_X", "2048"),
//!     ("CAM2_DETECTOR_SIZE_Y", "2064"),
//!     ("PHASE_FIT_DEG", "1"),
//!     ("PHASE_BINNING", "6"),
//!     ("INIT_ANGLE", "-2.09"),
//!     ("INIT_DX", "29.8"),
//!     ("INIT_DY", "23.6"),
//!     ("ALIGNER_RANGE_COEFF", "0.01"),
//! ]
//! .into_iter()
//! .map(|(k, v)| (k.to_string(), v.to_string()))
//! .collect();
//!
//! let config = PipelineConfig::from_map(&manifest).unwrap();
//! assert_eq!(config.instrument.folding_order, 11);
//! assert_eq!(config.processing.div_nb, 3);
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use thiserror::Error;
use tracing::debug;

use crate::error::ConfigError;
use crate::transform::Apodization;

// ── Sub-configurations ──────────────────────────────────────────────────────

/// Detector dimensions in unbinned pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorSize {
    pub width: usize,
    pub height: usize,
}

impl DetectorSize {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Geometric center in pixel coordinates.
    pub fn center(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }
}

/// Range of incidence angles through the interferometer across the field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffAxisAngles {
    /// Smallest angle reached anywhere on the detector, degrees.
    pub min_deg: f64,
    /// Largest angle, reached in the detector corners, degrees.
    pub max_deg: f64,
    /// Angle at the detector center, degrees.
    pub center_deg: f64,
}

/// Instrument geometry (CALIB_* keys and detector layout).
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentConfig {
    /// CALIB_NM_LASER: calibration laser wavelength in nm.
    pub laser_wavelength_nm: f64,
    /// CALIB_ORDER: folding order of the calibration cube.
    pub folding_order: u32,
    /// CALIB_STEP_SIZE: OPD step in nm.
    pub step_size_nm: f64,
    /// CAM1_DETECTOR_SIZE_X / _Y.
    pub cam1_size: DetectorSize,
    /// CAM2_DETECTOR_SIZE_X / _Y.
    pub cam2_size: DetectorSize,
    /// OFF_AXIS_ANGLE_MIN / _MAX / _CENTER. `None` for an on-axis model.
    pub off_axis: Option<OffAxisAngles>,
    /// DETECTOR_MIN_NM / DETECTOR_MAX_NM: sensitive band. Default 300–1100 nm.
    pub band_nm: (f64, f64),
}

/// Phase fitting settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseConfig {
    /// PHASE_FIT_DEG: polynomial degree of the phase model.
    pub fit_degree: usize,
    /// PHASE_BINNING: side of the square super-pixel, in pixels.
    pub binning: usize,
    /// PHASE_SNR_THRESHOLD: minimum bin SNR for an independent fit. Default 5.
    pub snr_threshold: f64,
}

/// Processing layout and resources.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingConfig {
    /// NCPUS: worker threads, 0 = all available. Default 0.
    pub ncpus: usize,
    /// BIG_DATA: stream quadrants instead of holding the cube in memory. Default false.
    pub big_data: bool,
    /// DIV_NB: quadrants per axis. Default 3.
    pub div_nb: usize,
    /// APODIZATION: window applied before the transform. Default Norton-Beer medium.
    pub apodization: Apodization,
    /// OPTIM_DARK_CAM2: use the temperature-scaled dark model for camera 2. Default false.
    pub optim_dark_cam2: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            ncpus: 0,
            big_data: false,
            div_nb: 3,
            apodization: Apodization::default(),
            optim_dark_cam2: false,
        }
    }
}

/// Point-spread function model used by the detection collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsfProfile {
    Gaussian,
    Moffat,
}

/// Unrecognised PSF_PROFILE value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown PSF profile {0:?} (expected gaussian or moffat)")]
pub struct ParsePsfProfileError(String);

impl FromStr for PsfProfile {
    type Err = ParsePsfProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gaussian" => Ok(PsfProfile::Gaussian),
            "moffat" => Ok(PsfProfile::Moffat),
            _ => Err(ParsePsfProfileError(s.trim().to_string())),
        }
    }
}

/// Star detection settings. Passed through unchanged to the external
/// detection collaborator; nothing in this crate interprets them.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    /// BOX_SIZE_COEFF. Default 7.
    pub box_size_coeff: f64,
    /// DETECT_STAR_NB. Default 15.
    pub star_nb: usize,
    /// INIT_FWHM in arcseconds. Default 3.5.
    pub init_fwhm_arcsec: f64,
    /// PSF_PROFILE. Default gaussian.
    pub psf_profile: PsfProfile,
    /// MOFFAT_BETA. Default 2.1.
    pub moffat_beta: f64,
    /// DETECT_STACK: frames combined for detection. Default 5.
    pub stack: usize,
}

/// Rough camera-2 → camera-1 disalignment and search range.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentConfig {
    /// ALIGNER_RANGE_COEFF: half search range as a fraction of the detector size.
    pub range_coeff: f64,
    /// INIT_ANGLE in degrees.
    pub init_angle_deg: f64,
    /// INIT_DX in unbinned pixels.
    pub init_dx: f64,
    /// INIT_DY in unbinned pixels.
    pub init_dy: f64,
}

/// Detector limits.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorLimits {
    /// SATURATION_THRESHOLD in ADU. Default 65535.
    pub saturation_threshold: f64,
}

/// Photometric calibration artifacts. All optional; only required when a
/// flux calibration is requested.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhotometryConfig {
    /// MIR_SURFACE: primary mirror collecting area, cm².
    pub mirror_surface_cm2: Option<f64>,
    /// CAM1_GAIN in counts per electron.
    pub cam1_gain: Option<f64>,
    /// CAM2_GAIN in counts per electron.
    pub cam2_gain: Option<f64>,
    /// OPD_JITTER: RMS OPD jitter in nm. Default 0.
    pub opd_jitter_nm: f64,
    /// WF_ERROR: RMS wavefront error as a fraction of 632.8 nm. Default 0.
    pub wf_error: f64,
}

// ── Top-level configuration ─────────────────────────────────────────────────

/// Immutable configuration for one reduction run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub instrument: InstrumentConfig,
    pub phase: PhaseConfig,
    pub processing: ProcessingConfig,
    pub detection: DetectionConfig,
    pub alignment: AlignmentConfig,
    pub detector: DetectorLimits,
    pub photometry: PhotometryConfig,
}

impl PipelineConfig {
    /// Parse a key→value manifest.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let m = Manifest { map };

        let off_axis = match (
            m.optional::<f64>("OFF_AXIS_ANGLE_MIN")?,
            m.optional::<f64>("OFF_AXIS_ANGLE_MAX")?,
            m.optional::<f64>("OFF_AXIS_ANGLE_CENTER")?,
        ) {
            (None, None, None) => None,
            (Some(min_deg), Some(max_deg), Some(center_deg)) => {
                if !(min_deg <= center_deg && center_deg <= max_deg) {
                    return Err(ConfigError::invalid(
                        "OFF_AXIS_ANGLE_CENTER",
                        center_deg,
                        format!("must lie within [{min_deg}, {max_deg}]"),
                    ));
                }
                Some(OffAxisAngles {
                    min_deg,
                    max_deg,
                    center_deg,
                })
            }
            // A partial off-axis model is a calibration error, not a default.
            (min, max, _) => {
                let key = if min.is_none() {
                    "OFF_AXIS_ANGLE_MIN"
                } else if max.is_none() {
                    "OFF_AXIS_ANGLE_MAX"
                } else {
                    "OFF_AXIS_ANGLE_CENTER"
                };
                return Err(ConfigError::Missing {
                    key: key.to_string(),
                });
            }
        };

        let instrument = InstrumentConfig {
            laser_wavelength_nm: m.required_positive("CALIB_NM_LASER")?,
            folding_order: m.required("CALIB_ORDER")?,
            step_size_nm: m.required_positive("CALIB_STEP_SIZE")?,
            cam1_size: DetectorSize::new(
                m.required_nonzero("CAM1_DETECTOR_SIZE_X")?,
                m.required_nonzero("CAM1_DETECTOR_SIZE_Y")?,
            ),
            cam2_size: DetectorSize::new(
                m.required_nonzero("CAM2_DETECTOR_SIZE_X")?,
                m.required_nonzero("CAM2_DETECTOR_SIZE_Y")?,
            ),
            off_axis,
            band_nm: (
                m.optional("DETECTOR_MIN_NM")?.unwrap_or(300.0),
                m.optional("DETECTOR_MAX_NM")?.unwrap_or(1100.0),
            ),
        };

        let phase = PhaseConfig {
            fit_degree: m.required("PHASE_FIT_DEG")?,
            binning: m.required_nonzero("PHASE_BINNING")?,
            snr_threshold: m.optional("PHASE_SNR_THRESHOLD")?.unwrap_or(5.0),
        };

        let processing = ProcessingConfig {
            ncpus: m.optional("NCPUS")?.unwrap_or(0),
            big_data: m.optional_bool("BIG_DATA")?.unwrap_or(false),
            div_nb: match m.optional::<usize>("DIV_NB")? {
                Some(0) => return Err(ConfigError::invalid("DIV_NB", 0, "must be at least 1")),
                Some(n) => n,
                None => 3,
            },
            apodization: m.optional("APODIZATION")?.unwrap_or_default(),
            optim_dark_cam2: m.optional_bool("OPTIM_DARK_CAM2")?.unwrap_or(false),
        };

        let detection = DetectionConfig {
            box_size_coeff: m.optional("BOX_SIZE_COEFF")?.unwrap_or(7.0),
            star_nb: m.optional("DETECT_STAR_NB")?.unwrap_or(15),
            init_fwhm_arcsec: m.optional("INIT_FWHM")?.unwrap_or(3.5),
            psf_profile: m.optional("PSF_PROFILE")?.unwrap_or(PsfProfile::Gaussian),
            moffat_beta: m.optional("MOFFAT_BETA")?.unwrap_or(2.1),
            stack: m.optional("DETECT_STACK")?.unwrap_or(5),
        };

        let alignment = AlignmentConfig {
            range_coeff: m.required_non_negative("ALIGNER_RANGE_COEFF")?,
            init_angle_deg: m.required("INIT_ANGLE")?,
            init_dx: m.required("INIT_DX")?,
            init_dy: m.required("INIT_DY")?,
        };

        let detector = DetectorLimits {
            saturation_threshold: m.optional("SATURATION_THRESHOLD")?.unwrap_or(65535.0),
        };

        let photometry = PhotometryConfig {
            mirror_surface_cm2: m.optional("MIR_SURFACE")?,
            cam1_gain: m.optional("CAM1_GAIN")?,
            cam2_gain: m.optional("CAM2_GAIN")?,
            opd_jitter_nm: m.optional("OPD_JITTER")?.unwrap_or(0.0),
            wf_error: m.optional("WF_ERROR")?.unwrap_or(0.0),
        };

        let mut recognised = 0usize;
        for key in map.keys() {
            if KNOWN_KEYS.contains(&key.as_str()) {
                recognised += 1;
            } else {
                debug!("Ignoring unknown configuration key {key}");
            }
        }
        debug!("Parsed configuration ({} keys, {recognised} recognised)", map.len());

        Ok(Self {
            instrument,
            phase,
            processing,
            detection,
            alignment,
            detector,
            photometry,
        })
    }

    /// Parse an option file: one `KEY value` pair per line, `#` starts a comment.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let map = parse_manifest(&text);
        let config = Self::from_map(&map)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }
}

/// Split option-file text into a key→value map. Later duplicates win.
pub fn parse_manifest(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                return None;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next()?.trim();
            let value = parts.next().unwrap_or("").trim();
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

const KNOWN_KEYS: &[&str] = &[
    "CALIB_NM_LASER",
    "CALIB_ORDER",
    "CALIB_STEP_SIZE",
    "CAM1_DETECTOR_SIZE_X",
    "CAM1_DETECTOR_SIZE_Y",
    "CAM2_DETECTOR_SIZE_X",
    "CAM2_DETECTOR_SIZE_Y",
    "OFF_AXIS_ANGLE_MIN",
    "OFF_AXIS_ANGLE_MAX",
    "OFF_AXIS_ANGLE_CENTER",
    "DETECTOR_MIN_NM",
    "DETECTOR_MAX_NM",
    "PHASE_FIT_DEG",
    "PHASE_BINNING",
    "PHASE_SNR_THRESHOLD",
    "NCPUS",
    "BIG_DATA",
    "DIV_NB",
    "APODIZATION",
    "OPTIM_DARK_CAM2",
    "BOX_SIZE_COEFF",
    "DETECT_STAR_NB",
    "INIT_FWHM",
    "PSF_PROFILE",
    "MOFFAT_BETA",
    "DETECT_STACK",
    "ALIGNER_RANGE_COEFF",
    "INIT_ANGLE",
    "INIT_DX",
    "INIT_DY",
    "SATURATION_THRESHOLD",
    "MIR_SURFACE",
    "CAM1_GAIN",
    "CAM2_GAIN",
    "OPD_JITTER",
    "WF_ERROR",
];

// ── Typed lookups ───────────────────────────────────────────────────────────

struct Manifest<'a> {
    map: &'a HashMap<String, String>,
}

impl Manifest<'_> {
    fn optional<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.map.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::invalid(key, raw, e.to_string())),
        }
    }

    fn required<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key)?.ok_or_else(|| ConfigError::Missing {
            key: key.to_string(),
        })
    }

    fn required_positive(&self, key: &str) -> Result<f64, ConfigError> {
        let v: f64 = self.required(key)?;
        if !(v.is_finite() && v > 0.0) {
            return Err(ConfigError::invalid(key, v, "must be a positive number"));
        }
        Ok(v)
    }

    fn required_non_negative(&self, key: &str) -> Result<f64, ConfigError> {
        let v: f64 = self.required(key)?;
        if !(v.is_finite() && v >= 0.0) {
            return Err(ConfigError::invalid(key, v, "must be zero or a positive number"));
        }
        Ok(v)
    }

    fn required_nonzero(&self, key: &str) -> Result<usize, ConfigError> {
        let v: usize = self.required(key)?;
        if v == 0 {
            return Err(ConfigError::invalid(key, v, "must be at least 1"));
        }
        Ok(v)
    }

    fn optional_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.map.get(key) {
            None => Ok(None),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::invalid(key, raw, "expected a boolean (0/1, true/false)")),
            },
        }
    }
}
