//! Reduction assembly.
//!
//! [`Reduction`] wires the configuration into one run: geometry, dark
//! strategy, phase fit, quadrant-scheduled transform and camera registration.
//! Every failure comes back as a [`PipelineError`] naming the camera and,
//! where relevant, the quadrant.

use std::time::Instant;

use ndarray::{Array2, ArrayView3};
use tracing::{info, warn};

use crate::calibration::CalibrationGeometry;
use crate::config::PipelineConfig;
use crate::cube::{Camera, CubeSource, QualityFlags, SaturationWarning, SpectralCube};
use crate::dark::{
    select_dark_corrector, ActivationEnergyDarkCorrector, DarkCorrector, NullDarkCorrector,
};
use crate::error::{PipelineError, TransformError};
use crate::phase::{PhaseFitConfig, PhaseFitter, PhaseMap};
use crate::quadrant::{CancellationToken, QuadrantGrid, QuadrantScheduler, ScheduleSummary};
use crate::registration::{register, RegistrationConfig, RegistrationResult};
use crate::source::DetectedSource;
use crate::transform::{BlockOutput, InterferogramTransformer, TransformConfig};

/// Inputs for one camera.
pub struct CameraInput<'a, S: ?Sized> {
    /// Corrected interferogram cube.
    pub source: &'a S,
    /// Reference cube for the phase fit. Without one the spectra are moduli.
    pub phase_reference: Option<ArrayView3<'a, f64>>,
    /// Sources detected on this camera's deep frame, for registration.
    pub detected: Option<&'a [DetectedSource]>,
}

impl<'a, S: ?Sized> CameraInput<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            phase_reference: None,
            detected: None,
        }
    }

    pub fn with_phase_reference(mut self, reference: ArrayView3<'a, f64>) -> Self {
        self.phase_reference = Some(reference);
        self
    }

    pub fn with_detected(mut self, detected: &'a [DetectedSource]) -> Self {
        self.detected = Some(detected);
        self
    }
}

/// Output of one camera.
#[derive(Debug, Clone)]
pub struct CameraReduction {
    pub camera: Camera,
    pub cube: SpectralCube,
    pub phase_map: Option<PhaseMap>,
    pub saturation: Vec<SaturationWarning>,
    pub schedule: ScheduleSummary,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct ReductionReport {
    pub cam1: CameraReduction,
    pub cam2: CameraReduction,
    /// Camera-2 → camera-1 alignment, when both source lists were given.
    pub alignment: Option<RegistrationResult>,
    pub elapsed_ms: f64,
}

impl ReductionReport {
    pub fn saturation_warnings(&self) -> impl Iterator<Item = &SaturationWarning> {
        self.cam1.saturation.iter().chain(&self.cam2.saturation)
    }
}

/// A configured reduction run.
pub struct Reduction<'a> {
    config: &'a PipelineConfig,
    geometry: CalibrationGeometry,
    dark: Box<dyn DarkCorrector>,
    cancel: CancellationToken,
}

impl<'a> Reduction<'a> {
    /// Validate the instrument geometry. No dark optimisation by default.
    pub fn new(config: &'a PipelineConfig) -> Result<Self, PipelineError> {
        let geometry = CalibrationGeometry::from_config(&config.instrument)?;
        Ok(Self {
            config,
            geometry,
            dark: Box::new(NullDarkCorrector),
            cancel: CancellationToken::new(),
        })
    }

    /// Pick the dark strategy from OPTIM_DARK_CAM2 and the available model.
    pub fn with_dark_model(mut self, model: Option<ActivationEnergyDarkCorrector>) -> Self {
        self.dark = select_dark_corrector(&self.config.processing, model);
        self
    }

    pub fn with_dark_corrector(mut self, dark: Box<dyn DarkCorrector>) -> Self {
        self.dark = dark;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        self.config
    }

    pub fn geometry(&self) -> &CalibrationGeometry {
        &self.geometry
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fit the phase map of one camera from its reference cube.
    pub fn fit_phase(
        &self,
        camera: Camera,
        reference: ArrayView3<'_, f64>,
    ) -> Result<PhaseMap, PipelineError> {
        let fitter = PhaseFitter::new(&self.geometry, PhaseFitConfig::from(self.config));
        let map = fitter
            .fit(reference)
            .map_err(|source| PipelineError::PhaseFit { camera, source })?;
        if map.fallback_count() > 0 {
            warn!(
                "Camera {camera}: {} of {} phase regions below SNR {} use a neighbour's fit",
                map.fallback_count(),
                map.n_regions(),
                self.config.phase.snr_threshold
            );
        }
        Ok(map)
    }

    /// Transform every quadrant of `source` into a spectral cube.
    pub fn reduce_camera<S>(
        &self,
        camera: Camera,
        source: &S,
        phase_map: Option<PhaseMap>,
    ) -> Result<CameraReduction, PipelineError>
    where
        S: CubeSource + ?Sized,
    {
        let (w, h, n) = source.dimensions();
        let metadata = source.metadata();
        let setup = |source: TransformError| PipelineError::TransformSetup { camera, source };

        let mut transformer =
            InterferogramTransformer::new(&self.geometry, n, TransformConfig::from(self.config))
                .map_err(setup)?;
        if let Some(map) = phase_map.as_ref() {
            if map.n_samples() != n {
                return Err(setup(TransformError::DepthMismatch {
                    expected: n,
                    got: map.n_samples(),
                }));
            }
            transformer = transformer.with_phase_map(map).map_err(setup)?;
        }

        let calibration = Array2::from_shape_fn((w, h), |(x, y)| {
            self.geometry.calibration_coeff(camera, x as f64, y as f64)
        });
        let mut cube = SpectralCube::new(w, h, transformer.wavenumber_axis(1.0), calibration);
        let mut saturation = Vec::new();

        let grid = QuadrantGrid::new(w, h, self.config.processing.div_nb)?;
        let scheduler = QuadrantScheduler::new(grid, &self.config.processing)?
            .with_cancellation(self.cancel.clone());
        let dark = self.dark.as_ref();

        let schedule = scheduler.run(
            camera,
            source,
            |quadrant, mut data| {
                dark.correct(camera, quadrant, &mut data, &metadata);
                transformer
                    .transform_block(data.view(), (quadrant.x_min, quadrant.y_min))
                    .map_err(|source| PipelineError::Transform {
                        camera,
                        quadrant: quadrant.index,
                        source,
                    })
            },
            |quadrant, output: BlockOutput| {
                cube.write_block(quadrant, &output.block);
                if output.saturated_pixels > 0 {
                    warn!(
                        "Camera {camera}: {} saturated pixels in quadrant {} (max {:.0})",
                        output.saturated_pixels, quadrant.index, output.saturation_peak
                    );
                    saturation.push(SaturationWarning {
                        camera,
                        quadrant: quadrant.index,
                        pixels: output.saturated_pixels,
                        max_value: output.saturation_peak,
                    });
                }
            },
        )?;

        info!(
            "Camera {camera}: {w}x{h} px, {} channels, {} flagged saturated, {} phase fallback",
            cube.n_channels(),
            cube.count_flagged(QualityFlags::SATURATED),
            cube.count_flagged(QualityFlags::PHASE_FALLBACK)
        );
        Ok(CameraReduction {
            camera,
            cube,
            phase_map,
            saturation,
            schedule,
        })
    }

    /// Align camera 2 onto camera 1.
    pub fn register(
        &self,
        cam1: &[DetectedSource],
        cam2: &[DetectedSource],
    ) -> Result<RegistrationResult, PipelineError> {
        Ok(register(cam1, cam2, &RegistrationConfig::from(self.config))?)
    }

    /// Full run: phase fit, transform of both cameras, then registration
    /// when both source lists are available.
    pub fn run<S1, S2>(
        &self,
        cam1: CameraInput<'_, S1>,
        cam2: CameraInput<'_, S2>,
    ) -> Result<ReductionReport, PipelineError>
    where
        S1: CubeSource + ?Sized,
        S2: CubeSource + ?Sized,
    {
        let t0 = Instant::now();
        info!(
            "Reduction: order {}, step {} nm, dark strategy {}",
            self.geometry.folding_order(),
            self.geometry.step_size_nm(),
            self.dark.name()
        );

        let map1 = cam1
            .phase_reference
            .map(|r| self.fit_phase(Camera::One, r))
            .transpose()?;
        let map2 = cam2
            .phase_reference
            .map(|r| self.fit_phase(Camera::Two, r))
            .transpose()?;

        let reduced1 = self.reduce_camera(Camera::One, cam1.source, map1)?;
        let reduced2 = self.reduce_camera(Camera::Two, cam2.source, map2)?;

        let alignment = match (cam1.detected, cam2.detected) {
            (Some(s1), Some(s2)) => Some(self.register(s1, s2)?),
            _ => {
                info!("Registration skipped: source lists not provided for both cameras");
                None
            }
        };

        let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
        info!("Reduction finished in {elapsed_ms:.1} ms");
        Ok(ReductionReport {
            cam1: reduced1,
            cam2: reduced2,
            alignment,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sitelle_manifest;
    use crate::cube::{ExposureMetadata, InterferogramCube};
    use crate::error::ConfigError;
    use ndarray::Array3;

    fn small_config(div_nb: &str) -> PipelineConfig {
        let mut map = sitelle_manifest();
        map.insert("CAM1_DETECTOR_SIZE_X".into(), "7".into());
        map.insert("CAM1_DETECTOR_SIZE_Y".into(), "5".into());
        map.insert("CAM2_DETECTOR_SIZE_X".into(), "7".into());
        map.insert("CAM2_DETECTOR_SIZE_Y".into(), "5".into());
        map.insert("DIV_NB".into(), div_nb.into());
        map.insert("NCPUS".into(), "2".into());
        PipelineConfig::from_map(&map).unwrap()
    }

    fn cube(saturate: bool) -> InterferogramCube {
        let n = 64;
        let data = Array3::from_shape_fn((7, 5, n), |(x, y, z)| {
            let d = z as f64 - 20.0;
            let v = 1000.0 + 300.0 * (-d * d / 8.0).exp() * (0.9 * d).cos() + (x + y) as f64;
            if saturate && x == 6 && y == 4 && z == 20 {
                70000.0
            } else {
                v
            }
        });
        InterferogramCube::new(data, ExposureMetadata::default())
    }

    #[test]
    fn test_reduce_camera_fills_cube() {
        let config = small_config("3");
        let reduction = Reduction::new(&config).unwrap();
        let out = reduction.reduce_camera(Camera::One, &cube(true), None).unwrap();
        assert_eq!(out.cube.dim(), (7, 5, 64));
        assert_eq!(out.schedule.quadrants, 9);
        assert_eq!(out.saturation.len(), 1);
        assert_eq!(out.saturation[0].quadrant, 8);
        assert!(out.cube.flag(6, 4).contains(QualityFlags::SATURATED));
        assert!(out.cube.spectrum(3, 2).iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_quadrant_layout_does_not_change_output() {
        let c = cube(false);
        let config3 = small_config("3");
        let config1 = small_config("1");
        let a = Reduction::new(&config3)
            .unwrap()
            .reduce_camera(Camera::Two, &c, None)
            .unwrap();
        let b = Reduction::new(&config1)
            .unwrap()
            .reduce_camera(Camera::Two, &c, None)
            .unwrap();
        assert_eq!(a.cube.data(), b.cube.data());
    }

    #[test]
    fn test_phase_map_depth_mismatch() {
        let config = small_config("1");
        let reduction = Reduction::new(&config).unwrap();
        let map = PhaseMap::uniform(crate::phase::PhaseModel::zero(1), 10, 32);
        let err = reduction
            .reduce_camera(Camera::One, &cube(false), Some(map))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TransformSetup {
                camera: Camera::One,
                source: TransformError::DepthMismatch { expected: 64, got: 32 }
            }
        ));
    }

    #[test]
    fn test_cancelled_run_reports_progress() {
        let config = small_config("3");
        let token = CancellationToken::new();
        token.cancel();
        let reduction = Reduction::new(&config).unwrap().with_cancellation(token);
        let err = reduction
            .reduce_camera(Camera::One, &cube(false), None)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Cancelled {
                completed: 0,
                total: 9
            }
        ));
    }

    #[test]
    fn test_aliasing_geometry_rejected() {
        let mut map = sitelle_manifest();
        map.insert("CALIB_NM_LASER".into(), "700".into());
        let config = PipelineConfig::from_map(&map).unwrap();
        assert!(matches!(
            Reduction::new(&config),
            Err(PipelineError::Config(ConfigError::Aliasing { .. }))
        ));
    }
}
