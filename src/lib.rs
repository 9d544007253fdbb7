//! # ifts
//!
//! Interferogram-to-spectrum **reduction core** for two-camera imaging
//! Fourier-transform spectrometers, written in Rust.
//!
//! Given bias/dark/flat corrected interferogram cubes from both output ports
//! of the interferometer, `ifts` turns every pixel's OPD samples into a
//! wavenumber-calibrated, phase-corrected spectrum and finds the geometric
//! transform that brings camera 2 onto camera 1.
//!
//! ## Features
//!
//! - **Calibration geometry**: laser wavelength, folding order and step size
//!   give the free spectral range and the per-pixel wavenumber axis, with an
//!   optional off-axis angle model
//! - **Phase maps**: low-order polynomial phase per spatial bin, fitted from a
//!   reference cube; low-SNR bins inherit their nearest valid neighbour
//! - **Transform**: apodization, zero padding, real FFT, folding onto the FSR
//!   and phase correction, per pixel or per tile, in parallel or streaming
//! - **Registration**: coarse grid search plus iterative closest-point
//!   refinement on detected point sources
//! - **Quadrant scheduling**: DIV_NB × DIV_NB tiles on a bounded worker pool,
//!   optionally loaded batch by batch to bound memory (BIG_DATA)
//! - **Photometry**: instrument throughput, flux calibration and predicted
//!   counts for Oke and Massey spectrophotometric standards
//! - **Persistence**: phase maps serialize with [rkyv](https://docs.rs/rkyv)
//!
//! ## Example
//!
//! ```no_run
//! use ifts::{CameraInput, ExposureMetadata, InterferogramCube, PipelineConfig, Reduction};
//! # fn cube() -> ndarray::Array3<f64> { unimplemented!() }
//!
//! let config = PipelineConfig::from_file("sitelle.orc").unwrap();
//! let cam1 = InterferogramCube::new(cube(), ExposureMetadata::default());
//! let cam2 = InterferogramCube::new(cube(), ExposureMetadata::default());
//!
//! let reduction = Reduction::new(&config).unwrap();
//! let report = reduction
//!     .run(
//!         CameraInput::new(&cam1).with_phase_reference(cam1.data()),
//!         CameraInput::new(&cam2).with_phase_reference(cam2.data()),
//!     )
//!     .unwrap();
//! println!(
//!     "{} channels from {:.1} to {:.1} cm-1",
//!     report.cam1.cube.n_channels(),
//!     report.cam1.cube.wavenumber_axis()[0],
//!     report.cam1.cube.wavenumber_axis().last().unwrap(),
//! );
//! ```
//!
//! ## Processing overview
//!
//! 1. **Geometry**: validate the laser line against the free spectral range
//!    `[order/(2·step), (order+1)/(2·step)]` and the detector band
//! 2. **Phase fit**: bin the reference cube, locate the ZPD, fit the phase of
//!    a symmetric window around it
//! 3. **Transform**: each quadrant is loaded, optionally dark corrected and
//!    transformed; tiles are merged positionally into the spectral cube
//! 4. **Registration**: camera-2 sources are mapped onto camera 1

pub mod calibration;
pub mod config;
pub mod cube;
pub mod dark;
pub mod error;
pub mod phase;
pub mod photometry;
pub mod pipeline;
pub mod quadrant;
pub mod registration;
pub mod source;
pub mod standard;
pub mod transform;

pub use calibration::CalibrationGeometry;
pub use config::{DetectorSize, PipelineConfig};
pub use cube::{
    mean_image, Camera, CubeSource, ExposureMetadata, InterferogramCube, QualityFlags,
    SaturationWarning, SpectralCube,
};
pub use dark::{ActivationEnergyDarkCorrector, DarkCorrector, NullDarkCorrector};
pub use error::{
    ConfigError, PhaseFitError, PipelineError, RegistrationError, TransformError,
};
pub use phase::{PhaseFitConfig, PhaseFitter, PhaseMap, PhaseModel};
pub use pipeline::{CameraInput, CameraReduction, Reduction, ReductionReport};
pub use quadrant::{CancellationToken, Quadrant, QuadrantGrid, QuadrantScheduler};
pub use registration::{register, AlignmentTransform, RegistrationConfig, RegistrationResult};
pub use source::{read_sources_csv, DetectedSource};
pub use standard::{StandardFormat, StandardStar};
pub use transform::{
    Apodization, Interferogram, InterferogramTransformer, SpectrumPixel, TransformConfig,
};
