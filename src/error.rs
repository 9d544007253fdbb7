//! Error taxonomy for the reduction core.
//!
//! Configuration, phase-fit and registration failures each have their own
//! enum so that callers can match on the stage that failed. [`PipelineError`]
//! wraps them and adds the camera / quadrant context a failed run must report.
//!
//! Degraded-but-usable results (saturation, low-SNR phase fallback) are not
//! errors; they are carried as [`QualityFlags`](crate::cube::QualityFlags) on
//! the output data.

use thiserror::Error;

use crate::cube::Camera;
use crate::registration::AlignmentTransform;

/// Invalid or missing calibration / processing parameters. Always fatal and
/// raised before any data is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A required key is absent from the configuration manifest.
    #[error("missing required configuration key {key}")]
    Missing { key: String },

    /// A key is present but its value cannot be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    /// The laser line does not fall inside the free spectral range implied by
    /// the folding order and step size.
    #[error(
        "laser line at {laser_cm1:.3} cm-1 aliases: free spectral range for order {order} \
         and step {step_nm} nm is [{fsr_min_cm1:.3}, {fsr_max_cm1:.3}] cm-1"
    )]
    Aliasing {
        laser_cm1: f64,
        order: u32,
        step_nm: f64,
        fsr_min_cm1: f64,
        fsr_max_cm1: f64,
    },

    /// The free spectral range maps outside the detector's sensitive band.
    #[error(
        "free spectral range [{fsr_min_nm:.1}, {fsr_max_nm:.1}] nm lies outside the detector band \
         [{band_min_nm:.1}, {band_max_nm:.1}] nm (order {order}, step {step_nm} nm)"
    )]
    OutOfBand {
        fsr_min_nm: f64,
        fsr_max_nm: f64,
        band_min_nm: f64,
        band_max_nm: f64,
        order: u32,
        step_nm: f64,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Phase model fitting failures. Fatal for the run: spectra cannot be
/// trusted without a phase model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhaseFitError {
    /// No spatial bin reached the SNR threshold.
    #[error(
        "no phase bin reaches SNR threshold {threshold} ({bins} bins, best SNR {best_snr:.2} in region {best_region})"
    )]
    NoValidBin {
        bins: usize,
        threshold: f64,
        best_snr: f64,
        best_region: usize,
    },

    /// The ZPD sits too close to the cube edge to extract a symmetric window.
    #[error("ZPD at sample {zpd} leaves a half window of {half_width} samples (minimum {minimum}) for {n_samples} samples")]
    WindowTooSmall {
        zpd: usize,
        half_width: usize,
        minimum: usize,
        n_samples: usize,
    },

    /// The reference cube cannot be used for fitting.
    #[error("reference cube of shape {shape:?} is unusable: {reason}")]
    BadReference { shape: [usize; 3], reason: String },
}

/// Registration did not produce a trustworthy transform. The best transform
/// found is always reported so the caller can decide whether to proceed with
/// a flagged alignment or abort.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    /// Refinement hit the iteration limit without the parameter updates
    /// dropping below epsilon.
    #[error(
        "registration did not converge after {iterations} iterations; best {best} with residual {residual_px:.4} px over {matches} matches"
    )]
    NotConverged {
        best: AlignmentTransform,
        residual_px: f64,
        matches: usize,
        iterations: usize,
    },

    /// Too few sources could be paired to constrain the transform.
    #[error(
        "only {matches} matched sources (need {required}); best {best} with residual {residual_px:.4} px"
    )]
    TooFewMatches {
        best: AlignmentTransform,
        residual_px: f64,
        matches: usize,
        required: usize,
    },

    /// One of the input lists is empty.
    #[error("camera {camera} source list is empty")]
    NoSources { camera: Camera },

    /// The search settings cannot be used.
    #[error("invalid registration settings: {0}")]
    Settings(String),
}

/// Per-interferogram transform failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("interferogram has {n_samples} samples, need at least {minimum}")]
    TooFewSamples { n_samples: usize, minimum: usize },

    #[error("OPD drift vector has {got} entries for {expected} samples")]
    DriftLength { expected: usize, got: usize },

    #[error("ZPD index {zpd} is outside the {n_samples}-sample interferogram")]
    ZpdOutOfRange { zpd: usize, n_samples: usize },

    #[error("quadrant data has {got} samples per pixel, transformer expects {expected}")]
    DepthMismatch { expected: usize, got: usize },

    #[error("FFT failed: {0}")]
    Fft(String),
}

/// Run-level error carrying the context needed to reproduce a failure.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("camera {camera}: phase fit failed: {source}")]
    PhaseFit {
        camera: Camera,
        #[source]
        source: PhaseFitError,
    },

    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("camera {camera}: cannot set up transform: {source}")]
    TransformSetup {
        camera: Camera,
        #[source]
        source: TransformError,
    },

    #[error("camera {camera}, quadrant {quadrant}: {source}")]
    Transform {
        camera: Camera,
        quadrant: usize,
        #[source]
        source: TransformError,
    },

    #[error("camera {camera}, quadrant {quadrant}: failed to load data: {message}")]
    Source {
        camera: Camera,
        quadrant: usize,
        message: String,
    },

    #[error("run cancelled after {completed} of {total} quadrants")]
    Cancelled { completed: usize, total: usize },
}
