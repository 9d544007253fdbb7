//! Camera-2 → camera-1 geometric registration from detected point sources.
//!
//! The alignment is a rotation about the camera-2 detector center, a
//! translation and an optional isotropic scale:
//!
//! ```text
//! x₁ = s·( cos a·(x₂ - cx) - sin a·(y₂ - cy)) + cx + dx
//! y₁ = s·( sin a·(x₂ - cx) + cos a·(y₂ - cy)) + cy + dy
//! ```
//!
//! Estimation is two-staged:
//! 1. a coarse grid over `(angle, dx, dy)` around the instrument's rough
//!    disalignment, scored with a truncated quadratic nearest-neighbour cost
//!    so that unmatched sources neither dominate nor reward the fit
//! 2. iterative closest-point refinement with MAD clipping and a closed-form
//!    least-squares rigid (or similarity) fit
//!
//! Both stages are deterministic: grid cells are reduced by (cost, index) and
//! match ties go to the brighter camera-1 source, then the lower index.

mod index;
mod refine;

use std::fmt;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{DetectorSize, PipelineConfig};
use crate::cube::Camera;
use crate::error::RegistrationError;
use crate::source::DetectedSource;

pub use index::SourceIndex;

/// Rigid (+ optional scale) map from camera-2 pixels to camera-1 pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentTransform {
    /// Rotation angle, degrees, counter-clockwise in `(x, y)`.
    pub angle_deg: f64,
    /// Translation along x, unbinned pixels.
    pub dx: f64,
    /// Translation along y, unbinned pixels.
    pub dy: f64,
    /// Isotropic scale; 1 when not fitted.
    pub scale: f64,
    /// Rotation center in camera-2 pixels (the detector center).
    pub rotation_center: (f64, f64),
}

impl AlignmentTransform {
    pub fn new(angle_deg: f64, dx: f64, dy: f64, rotation_center: (f64, f64)) -> Self {
        Self {
            angle_deg,
            dx,
            dy,
            scale: 1.0,
            rotation_center,
        }
    }

    pub fn identity(rotation_center: (f64, f64)) -> Self {
        Self::new(0.0, 0.0, 0.0, rotation_center)
    }

    /// Map a camera-2 position into the camera-1 frame.
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.angle_deg.to_radians().sin_cos();
        let (cx, cy) = self.rotation_center;
        let (xr, yr) = (x - cx, y - cy);
        (
            self.scale * (cos * xr - sin * yr) + cx + self.dx,
            self.scale * (sin * xr + cos * yr) + cy + self.dy,
        )
    }

    /// Map a camera-1 position back into the camera-2 frame.
    pub fn inverse_apply(&self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.angle_deg.to_radians().sin_cos();
        let (cx, cy) = self.rotation_center;
        let (u, v) = ((x - cx - self.dx) / self.scale, (y - cy - self.dy) / self.scale);
        (cos * u + sin * v + cx, -sin * u + cos * v + cy)
    }
}

impl fmt::Display for AlignmentTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "angle {:.4}° dx {:.3} dy {:.3} scale {:.6}",
            self.angle_deg, self.dx, self.dy, self.scale
        )
    }
}

/// Configuration for registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationConfig {
    /// Rough rotation between the cameras, degrees (INIT_ANGLE). Default 0.
    pub init_angle_deg: f64,
    /// Rough x offset, pixels (INIT_DX). Default 0.
    pub init_dx: f64,
    /// Rough y offset, pixels (INIT_DY). Default 0.
    pub init_dy: f64,
    /// Search range as a fraction of the largest camera-1 dimension
    /// (ALIGNER_RANGE_COEFF). Default 0.01.
    pub range_coeff: f64,
    /// Camera-1 detector size; sets the search ranges. Default 2048x2064.
    pub reference_size: DetectorSize,
    /// Rotation center in camera-2 pixels. Default (1024, 1032).
    pub rotation_center: (f64, f64),
    /// Grid points per translation axis. Default 21.
    pub xy_steps: usize,
    /// Grid points on the angle axis. Default 11.
    pub angle_steps: usize,
    /// Match radius during refinement, pixels. Default 1.5.
    pub match_tolerance_px: f64,
    /// Refinement iteration limit. Default 50.
    pub max_iterations: usize,
    /// Convergence threshold on the parameter update (degrees and pixels).
    /// Default 1e-6.
    pub epsilon: f64,
    /// MAD clip level on match residuals. Default 3.0.
    pub sigma_clip: f64,
    /// Fewest matched inliers accepted. Default 4.
    pub min_matches: usize,
    /// Also fit an isotropic scale. Default false.
    pub fit_scale: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            init_angle_deg: 0.0,
            init_dx: 0.0,
            init_dy: 0.0,
            range_coeff: 0.01,
            reference_size: DetectorSize::new(2048, 2064),
            rotation_center: (1024.0, 1032.0),
            xy_steps: 21,
            angle_steps: 11,
            match_tolerance_px: 1.5,
            max_iterations: 50,
            epsilon: 1e-6,
            sigma_clip: 3.0,
            min_matches: 4,
            fit_scale: false,
        }
    }
}

impl From<&PipelineConfig> for RegistrationConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            init_angle_deg: config.alignment.init_angle_deg,
            init_dx: config.alignment.init_dx,
            init_dy: config.alignment.init_dy,
            range_coeff: config.alignment.range_coeff,
            reference_size: config.instrument.cam1_size,
            rotation_center: config.instrument.cam2_size.center(),
            ..Default::default()
        }
    }
}

impl RegistrationConfig {
    /// Translation half range, pixels.
    pub fn xy_range(&self) -> f64 {
        self.range_coeff * self.reference_size.width.max(self.reference_size.height) as f64
    }

    /// Angle half range, degrees: the rotation that moves the detector edge
    /// by the translation half range.
    pub fn angle_range_deg(&self) -> f64 {
        let half = self.reference_size.width.max(self.reference_size.height) as f64 / 2.0;
        (self.xy_range() / half).to_degrees()
    }

    fn initial_transform(&self) -> AlignmentTransform {
        AlignmentTransform::new(
            self.init_angle_deg,
            self.init_dx,
            self.init_dy,
            self.rotation_center,
        )
    }
}

/// Accepted alignment.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub transform: AlignmentTransform,
    /// RMS distance over matched inliers, pixels.
    pub residual_px: f64,
    /// `(camera-2 index, camera-1 index)` of the inlier matches.
    pub matches: Vec<(usize, usize)>,
    /// Refinement iterations performed.
    pub iterations: usize,
    /// Best coarse-grid transform and its mean cost.
    pub coarse: AlignmentTransform,
    pub coarse_cost: f64,
    pub elapsed_ms: f64,
}

/// Estimate the camera-2 → camera-1 alignment.
pub fn register(
    cam1: &[DetectedSource],
    cam2: &[DetectedSource],
    config: &RegistrationConfig,
) -> Result<RegistrationResult, RegistrationError> {
    let t0 = Instant::now();
    if !(config.match_tolerance_px.is_finite() && config.match_tolerance_px > 0.0) {
        return Err(RegistrationError::Settings(format!(
            "match tolerance must be positive, got {}",
            config.match_tolerance_px
        )));
    }
    if !(config.range_coeff.is_finite() && config.range_coeff >= 0.0) {
        return Err(RegistrationError::Settings(format!(
            "range coefficient must be non-negative, got {}",
            config.range_coeff
        )));
    }
    if cam1.is_empty() {
        return Err(RegistrationError::NoSources {
            camera: Camera::One,
        });
    }
    if cam2.is_empty() {
        return Err(RegistrationError::NoSources {
            camera: Camera::Two,
        });
    }

    let xy_step = grid_step(config.xy_range(), config.xy_steps);
    let coarse_tolerance = config.match_tolerance_px.max(1.5 * xy_step);
    let index = SourceIndex::new(cam1, coarse_tolerance.max(config.match_tolerance_px));

    let (coarse, coarse_cost) = coarse_search(&index, cam2, config, coarse_tolerance);
    debug!(
        "Coarse registration: {coarse} (cost {coarse_cost:.3}, tolerance {coarse_tolerance:.2} px)"
    );

    let refined = refine::refine(cam1, &index, cam2, coarse, config)?;
    let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
    info!(
        "Registration: {} with residual {:.4} px over {} matches ({} iterations, {:.1} ms)",
        refined.transform,
        refined.residual_px,
        refined.matches.len(),
        refined.iterations,
        elapsed_ms
    );

    Ok(RegistrationResult {
        transform: refined.transform,
        residual_px: refined.residual_px,
        matches: refined.matches,
        iterations: refined.iterations,
        coarse,
        coarse_cost,
        elapsed_ms,
    })
}

fn grid_step(half_range: f64, steps: usize) -> f64 {
    if steps > 1 {
        2.0 * half_range / (steps - 1) as f64
    } else {
        0.0
    }
}

/// Offsets `-half..=half` in `steps` points (just 0 for one point).
fn grid_axis(half_range: f64, steps: usize) -> Vec<f64> {
    let step = grid_step(half_range, steps);
    (0..steps.max(1))
        .map(|i| {
            if steps > 1 {
                -half_range + i as f64 * step
            } else {
                0.0
            }
        })
        .collect()
}

/// Mean truncated quadratic cost of camera-2 sources mapped through `t`.
fn truncated_cost(
    index: &SourceIndex,
    cam2: &[DetectedSource],
    t: &AlignmentTransform,
    tolerance: f64,
) -> f64 {
    let cap = tolerance * tolerance;
    let total: f64 = cam2
        .iter()
        .map(|s| {
            let (x, y) = t.apply(s.x, s.y);
            index.nearest_d2(x, y, tolerance).unwrap_or(cap).min(cap)
        })
        .sum();
    total / cam2.len() as f64
}

/// Evaluate the grid in parallel; lowest cost wins, ties to the lowest
/// grid index.
fn coarse_search(
    index: &SourceIndex,
    cam2: &[DetectedSource],
    config: &RegistrationConfig,
    tolerance: f64,
) -> (AlignmentTransform, f64) {
    let init = config.initial_transform();
    let angles = grid_axis(config.angle_range_deg(), config.angle_steps);
    let offsets = grid_axis(config.xy_range(), config.xy_steps);
    let n_xy = offsets.len();
    let n_cells = angles.len() * n_xy * n_xy;

    let cell_transform = |cell: usize| {
        let ia = cell / (n_xy * n_xy);
        let ix = (cell / n_xy) % n_xy;
        let iy = cell % n_xy;
        AlignmentTransform {
            angle_deg: init.angle_deg + angles[ia],
            dx: init.dx + offsets[ix],
            dy: init.dy + offsets[iy],
            ..init
        }
    };

    let (cost, best) = (0..n_cells)
        .into_par_iter()
        .map(|cell| (truncated_cost(index, cam2, &cell_transform(cell), tolerance), cell))
        .reduce(
            || (f64::INFINITY, usize::MAX),
            |a, b| {
                if a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).is_le() {
                    a
                } else {
                    b
                }
            },
        );
    debug!("Coarse grid: {n_cells} cells, best {best} cost {cost:.4}");
    (cell_transform(best), cost)
}
