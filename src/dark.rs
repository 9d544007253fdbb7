//! Residual dark-current correction strategies.
//!
//! Interferogram cubes arrive bias/dark/flat corrected. Camera 2 can
//! optionally get a second pass that rescales a master dark-rate frame to the
//! exposure's detector temperature with an Arrhenius law (OPTIM_DARK_CAM2).
//! The strategy is picked once when the reduction is assembled; the transform
//! path only sees a [`DarkCorrector`].

use ndarray::{s, Array2, Array3};
use tracing::{debug, warn};

use crate::config::ProcessingConfig;
use crate::cube::{Camera, ExposureMetadata};
use crate::quadrant::Quadrant;

/// Boltzmann constant, eV/K.
const BOLTZMANN_EV: f64 = 8.617_333_262e-5;

/// Zero Celsius in kelvin.
const ZERO_CELSIUS_K: f64 = 273.15;

/// Correction applied to each quadrant's samples before the transform.
pub trait DarkCorrector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Correct `block`, the `[x, y, z]` samples of `quadrant` from `camera`.
    fn correct(
        &self,
        camera: Camera,
        quadrant: &Quadrant,
        block: &mut Array3<f64>,
        metadata: &ExposureMetadata,
    );
}

/// Leaves the data untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDarkCorrector;

impl DarkCorrector for NullDarkCorrector {
    fn name(&self) -> &'static str {
        "none"
    }

    fn correct(&self, _: Camera, _: &Quadrant, _: &mut Array3<f64>, _: &ExposureMetadata) {}
}

/// Subtracts a master dark-rate frame scaled to the exposure temperature:
///
/// ```text
/// dark(T) = rate(T_ref) · exp(-Ea/k · (1/T - 1/T_ref)) · t_int
/// ```
#[derive(Debug, Clone)]
pub struct ActivationEnergyDarkCorrector {
    /// Dark rate per pixel at the reference temperature, counts/s, `[x, y]`.
    rate: Array2<f64>,
    reference_temperature_c: f64,
    activation_energy_ev: f64,
    camera: Camera,
}

impl ActivationEnergyDarkCorrector {
    /// Silicon dark current activation energy, eV.
    pub const DEFAULT_ACTIVATION_ENERGY_EV: f64 = 0.6;

    pub fn new(rate: Array2<f64>, reference_temperature_c: f64, camera: Camera) -> Self {
        Self {
            rate,
            reference_temperature_c,
            activation_energy_ev: Self::DEFAULT_ACTIVATION_ENERGY_EV,
            camera,
        }
    }

    pub fn with_activation_energy(mut self, activation_energy_ev: f64) -> Self {
        self.activation_energy_ev = activation_energy_ev;
        self
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    /// Dark rate multiplier at `temperature_c` relative to the reference.
    pub fn temperature_scale(&self, temperature_c: f64) -> f64 {
        let t = temperature_c + ZERO_CELSIUS_K;
        let t_ref = self.reference_temperature_c + ZERO_CELSIUS_K;
        (-self.activation_energy_ev / BOLTZMANN_EV * (1.0 / t - 1.0 / t_ref)).exp()
    }
}

impl DarkCorrector for ActivationEnergyDarkCorrector {
    fn name(&self) -> &'static str {
        "activation-energy"
    }

    fn correct(
        &self,
        camera: Camera,
        quadrant: &Quadrant,
        block: &mut Array3<f64>,
        metadata: &ExposureMetadata,
    ) {
        if camera != self.camera {
            return;
        }
        let scale = match metadata.temperature_c {
            Some(t) => self.temperature_scale(t),
            None => {
                warn!(
                    "Camera {camera}: no detector temperature recorded, using dark rate at {} C",
                    self.reference_temperature_c
                );
                1.0
            }
        };
        let (rw, rh) = self.rate.dim();
        if quadrant.x_max > rw || quadrant.y_max > rh {
            warn!(
                "Camera {camera}: quadrant {} outside the {rw}x{rh} dark frame, left uncorrected",
                quadrant.index
            );
            return;
        }
        let factor = scale * metadata.integration_time_s;
        let rate = self
            .rate
            .slice(s![quadrant.x_min..quadrant.x_max, quadrant.y_min..quadrant.y_max]);
        for ((x, y), &r) in rate.indexed_iter() {
            let dark = r * factor;
            block.slice_mut(s![x, y, ..]).mapv_inplace(|v| v - dark);
        }
        debug!(
            "Camera {camera}: quadrant {} dark corrected (scale {scale:.4})",
            quadrant.index
        );
    }
}

/// Strategy for a run: the activation-energy pass on camera 2 when
/// OPTIM_DARK_CAM2 is set and a dark model is available, otherwise none.
pub fn select_dark_corrector(
    processing: &ProcessingConfig,
    model: Option<ActivationEnergyDarkCorrector>,
) -> Box<dyn DarkCorrector> {
    match (processing.optim_dark_cam2, model) {
        (true, Some(model)) => Box::new(ActivationEnergyDarkCorrector {
            camera: Camera::Two,
            ..model
        }),
        (true, None) => {
            warn!("OPTIM_DARK_CAM2 set but no dark rate model supplied; dark optimisation skipped");
            Box::new(NullDarkCorrector)
        }
        (false, _) => Box::new(NullDarkCorrector),
    }
}
