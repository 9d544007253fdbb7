//! Phase map fitting from a reference interferogram cube.
//!
//! The reference cube (typically a flat or a high-SNR calibration cube) is
//! binned into super-pixels. Each bin's ZPD burst is located and scored, a
//! symmetric window around the common ZPD is transformed with the same
//! kernel as the science data, and the unwrapped phase is fitted with an
//! amplitude-weighted polynomial. Bins below the SNR threshold inherit the
//! fit of the nearest valid bin.

use std::f64::consts::TAU;
use std::ops::Range;
use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use ndarray::ArrayView3;
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationGeometry;
use crate::config::PipelineConfig;
use crate::error::PhaseFitError;
use crate::transform::{
    locate_zpd, Apodization, Interferogram, InterferogramTransformer, TransformConfig,
};

use super::{PhaseEntry, PhaseMap, PhaseModel};

/// Smallest usable half width of the phase window, samples.
const MIN_HALF_WINDOW: usize = 8;
/// Shortest reference interferogram accepted.
const MIN_REFERENCE_SAMPLES: usize = 2 * MIN_HALF_WINDOW + 1;
/// MAD → Gaussian sigma.
const MAD_TO_SIGMA: f64 = 1.4826;

/// Configuration for phase map fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseFitConfig {
    /// Polynomial degree of the phase model. Default 1.
    pub degree: usize,
    /// Super-pixel size in pixels. Default 6.
    pub binning: usize,
    /// Minimum ZPD SNR for a bin to be fitted on its own. Default 5.0.
    pub snr_threshold: f64,
    /// Half width of the transform window around the ZPD, samples. Also the
    /// guard excluded from the noise estimate. Default 64.
    pub window_half_width: usize,
    /// Channels below this fraction of the peak amplitude are ignored by the
    /// fit. Default 0.2.
    pub amplitude_fraction: f64,
    /// Window applied before the transform. Default Norton–Beer medium.
    pub apodization: Apodization,
}

impl Default for PhaseFitConfig {
    fn default() -> Self {
        Self {
            degree: 1,
            binning: 6,
            snr_threshold: 5.0,
            window_half_width: 64,
            amplitude_fraction: 0.2,
            apodization: Apodization::default(),
        }
    }
}

impl From<&PipelineConfig> for PhaseFitConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            degree: config.phase.fit_degree,
            binning: config.phase.binning,
            snr_threshold: config.phase.snr_threshold,
            apodization: config.processing.apodization,
            ..Default::default()
        }
    }
}

/// Averaged interferogram of one bin and its ZPD statistics.
struct BinProfile {
    samples: Vec<f64>,
    zpd: usize,
    snr: f64,
}

/// Fits [`PhaseMap`]s for one instrument geometry.
pub struct PhaseFitter<'a> {
    geometry: &'a CalibrationGeometry,
    config: PhaseFitConfig,
}

impl<'a> PhaseFitter<'a> {
    pub fn new(geometry: &'a CalibrationGeometry, config: PhaseFitConfig) -> Self {
        Self { geometry, config }
    }

    pub fn config(&self) -> &PhaseFitConfig {
        &self.config
    }

    /// Fit a phase map from an `[x, y, z]` reference cube.
    pub fn fit(&self, reference: ArrayView3<'_, f64>) -> Result<PhaseMap, PhaseFitError> {
        let t0 = Instant::now();
        let (w, h, n) = reference.dim();
        let shape = [w, h, n];
        if w == 0 || h == 0 {
            return Err(PhaseFitError::BadReference {
                shape,
                reason: "no pixels".to_string(),
            });
        }
        if n < MIN_REFERENCE_SAMPLES {
            return Err(PhaseFitError::BadReference {
                shape,
                reason: format!("need at least {MIN_REFERENCE_SAMPLES} samples per pixel"),
            });
        }

        let b = self.config.binning.max(1);
        let (nbx, nby) = (w.div_ceil(b), h.div_ceil(b));
        let n_bins = nbx * nby;
        let guard = self.config.window_half_width.min(n / 4);

        let profiles: Vec<BinProfile> = (0..n_bins)
            .into_par_iter()
            .map(|region| {
                let (bx, by) = (region % nbx, region / nbx);
                let samples = bin_mean(
                    reference,
                    bx * b..((bx + 1) * b).min(w),
                    by * b..((by + 1) * b).min(h),
                );
                let (zpd, snr) = zpd_snr(&samples, guard);
                BinProfile { samples, zpd, snr }
            })
            .collect();

        let threshold = self.config.snr_threshold;
        let above: Vec<usize> = (0..n_bins)
            .filter(|&r| profiles[r].snr >= threshold)
            .collect();
        if above.is_empty() {
            return Err(no_valid_bin(&profiles, threshold));
        }

        let mut zpds: Vec<usize> = above.iter().map(|&r| profiles[r].zpd).collect();
        zpds.sort_unstable();
        let zpd = zpds[(zpds.len() - 1) / 2];
        let half = self.config.window_half_width.min(zpd).min(n - 1 - zpd);
        if half < MIN_HALF_WINDOW {
            return Err(PhaseFitError::WindowTooSmall {
                zpd,
                half_width: half,
                minimum: MIN_HALF_WINDOW,
                n_samples: n,
            });
        }
        debug!(
            "Phase fit: {}/{} bins above SNR {threshold}, ZPD {zpd}, window ±{half}",
            above.len(),
            n_bins
        );

        let transformer = InterferogramTransformer::new(
            self.geometry,
            2 * half + 1,
            TransformConfig {
                apodization: self.config.apodization,
                zpd_index: Some(half),
                streaming: false,
                saturation_threshold: f64::INFINITY,
            },
        )
        .map_err(|e| PhaseFitError::BadReference {
            shape,
            reason: e.to_string(),
        })?;

        let fits: Vec<Option<PhaseModel>> = profiles
            .par_iter()
            .map(|profile| {
                if profile.snr < threshold {
                    return Ok(None);
                }
                let window = &profile.samples[zpd - half..=zpd + half];
                let spectrum = transformer
                    .complex_spectrum(&Interferogram::from_slice(window, 0, 0))
                    .map_err(|e| PhaseFitError::BadReference {
                        shape,
                        reason: e.to_string(),
                    })?;
                Ok(fit_phase(
                    &spectrum,
                    self.config.degree,
                    self.config.amplitude_fraction,
                ))
            })
            .collect::<Result<_, PhaseFitError>>()?;

        let valid: Vec<usize> = (0..n_bins).filter(|&r| fits[r].is_some()).collect();
        if valid.is_empty() {
            return Err(no_valid_bin(&profiles, threshold));
        }

        let mut entries = Vec::with_capacity(n_bins);
        let mut inherited = 0usize;
        for region in 0..n_bins {
            let donor = match fits[region] {
                Some(_) => region,
                None => {
                    inherited += 1;
                    nearest_valid(region, nbx, &valid)
                }
            };
            let model = fits[donor]
                .clone()
                .unwrap_or_else(|| PhaseModel::zero(self.config.degree));
            entries.push(PhaseEntry {
                model,
                snr: profiles[region].snr,
                source_region: donor as u32,
            });
        }

        if inherited > 0 {
            warn!(
                "Phase fit: {inherited} of {n_bins} bins below SNR {threshold} inherit a neighbour's model"
            );
        }
        info!(
            "Phase map: {nbx}x{nby} bins of {b} px, degree {}, ZPD {zpd}, {} fitted, {:.1} ms",
            self.config.degree,
            valid.len(),
            t0.elapsed().as_secs_f64() * 1000.0
        );

        Ok(PhaseMap::from_entries(
            b,
            (nbx, nby),
            self.config.degree,
            zpd,
            n,
            entries,
        ))
    }
}

// ── Internal helpers ────────────────────────────────────────────────────────

/// Mean interferogram over a pixel rectangle. NaN samples count as zero.
fn bin_mean(cube: ArrayView3<'_, f64>, xs: Range<usize>, ys: Range<usize>) -> Vec<f64> {
    let n = cube.dim().2;
    let count = (xs.len() * ys.len()).max(1) as f64;
    let mut out = vec![0.0; n];
    for x in xs {
        for y in ys.clone() {
            for (acc, &v) in out.iter_mut().zip(cube.slice(ndarray::s![x, y, ..]).iter()) {
                if !v.is_nan() {
                    *acc += v;
                }
            }
        }
    }
    out.iter_mut().for_each(|v| *v /= count);
    out
}

/// ZPD index (peak of `|s - mean|`) and its SNR against the robust noise of
/// the samples farther than `guard` from it.
fn zpd_snr(samples: &[f64], guard: usize) -> (usize, f64) {
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let centered: Vec<f64> = samples.iter().map(|v| v - mean).collect();
    let zpd = locate_zpd(&centered);
    let peak = centered[zpd].abs();

    let mut wings: Vec<f64> = centered
        .iter()
        .enumerate()
        .filter(|(i, _)| i.abs_diff(zpd) > guard)
        .map(|(_, &v)| v)
        .collect();
    if wings.is_empty() {
        wings = centered.clone();
    }
    let noise = MAD_TO_SIGMA * median_abs_deviation(&mut wings);
    let snr = if noise > 0.0 {
        peak / noise
    } else if peak > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    (zpd, snr)
}

fn median_abs_deviation(values: &mut [f64]) -> f64 {
    let med = median(values);
    for v in values.iter_mut() {
        *v = (*v - med).abs();
    }
    median(values)
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Amplitude-weighted least-squares polynomial fit of the unwrapped phase
/// against `t = j / n_channels`. `None` when too few channels carry signal.
fn fit_phase(
    spectrum: &[Complex<f64>],
    degree: usize,
    amplitude_fraction: f64,
) -> Option<PhaseModel> {
    let m = spectrum.len() as f64;
    let amax = spectrum.iter().map(|c| c.norm()).fold(0.0, f64::max);
    if !(amax > 0.0) {
        return None;
    }
    let threshold = amplitude_fraction * amax;

    let mut points: Vec<(f64, f64, f64)> = Vec::new();
    let mut prev: Option<f64> = None;
    for (j, c) in spectrum.iter().enumerate() {
        let a = c.norm();
        if a < threshold {
            continue;
        }
        let mut phi = c.arg();
        if let Some(p) = prev {
            phi = p + wrap_pi(phi - p);
        }
        prev = Some(phi);
        points.push((j as f64 / m, phi, a / amax));
    }
    if points.len() < degree + 1 {
        return None;
    }

    let mut a_mat = DMatrix::<f64>::zeros(points.len(), degree + 1);
    let mut b_vec = DVector::<f64>::zeros(points.len());
    for (row, &(t, phi, weight)) in points.iter().enumerate() {
        let mut tk = 1.0;
        for k in 0..=degree {
            a_mat[(row, k)] = weight * tk;
            tk *= t;
        }
        b_vec[row] = weight * phi;
    }

    let svd = a_mat.svd(true, true);
    let coeffs = svd.solve(&b_vec, 1e-12).ok()?;
    Some(PhaseModel::new(coeffs.iter().copied().collect()))
}

/// Wrap an angle difference into `[-π, π]`. Odd multiples of π may land on
/// either end.
fn wrap_pi(d: f64) -> f64 {
    d - TAU * (d / TAU).round()
}

/// Closest valid bin in grid units; ties go to the lowest region id.
fn nearest_valid(region: usize, nbx: usize, valid: &[usize]) -> usize {
    let (bx, by) = ((region % nbx) as i64, (region / nbx) as i64);
    let mut best = valid[0];
    let mut best_d2 = i64::MAX;
    for &candidate in valid {
        let (cx, cy) = ((candidate % nbx) as i64, (candidate / nbx) as i64);
        let d2 = (cx - bx).pow(2) + (cy - by).pow(2);
        if d2 < best_d2 || (d2 == best_d2 && candidate < best) {
            best_d2 = d2;
            best = candidate;
        }
    }
    best
}

fn no_valid_bin(profiles: &[BinProfile], threshold: f64) -> PhaseFitError {
    let mut best_region = 0;
    let mut best_snr = f64::NEG_INFINITY;
    for (r, p) in profiles.iter().enumerate() {
        if p.snr > best_snr {
            best_snr = p.snr;
            best_region = r;
        }
    }
    PhaseFitError::NoValidBin {
        bins: profiles.len(),
        threshold,
        best_snr,
        best_region,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorSize;
    use ndarray::Array3;

    fn geometry() -> CalibrationGeometry {
        CalibrationGeometry::new(
            543.5,
            11,
            3255.231,
            DetectorSize::new(16, 16),
            DetectorSize::new(16, 16),
        )
        .unwrap()
    }

    /// Broadband burst centered on `zpd` with a constant phase `phi0`.
    fn burst(n: usize, zpd: f64, phi0: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let u = i as f64 - zpd;
                1000.0 + 400.0 * (-u * u / 18.0).exp() * (0.9 * u + phi0).cos()
            })
            .collect()
    }

    #[test]
    fn test_median_and_mad() {
        let mut v = vec![3.0, 1.0, 2.0, 10.0];
        assert_eq!(median(&mut v.clone()), 2.5);
        assert_eq!(median_abs_deviation(&mut v), 1.0);
    }

    #[test]
    fn test_wrap_pi() {
        use std::f64::consts::PI;
        assert!((wrap_pi(3.0 * PI).abs() - PI).abs() < 1e-12);
        assert!((wrap_pi(-0.5) + 0.5).abs() < 1e-15);
        assert!((wrap_pi(2.5 * PI) - 0.5 * PI).abs() < 1e-12);
        assert!((wrap_pi(-2.5 * PI) + 0.5 * PI).abs() < 1e-12);
        for k in -50..50 {
            let d = 0.37 * k as f64;
            let w = wrap_pi(d);
            assert!(w.abs() <= PI + 1e-12);
            assert!((((d - w) / TAU).round() * TAU - (d - w)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_nearest_valid_ties_to_lowest_id() {
        // 3x3 grid; region 4 (center) is equidistant from 1, 3, 5, 7.
        assert_eq!(nearest_valid(4, 3, &[7, 5, 3, 1]), 1);
        assert_eq!(nearest_valid(0, 3, &[8, 2]), 2);
    }

    #[test]
    fn test_zpd_snr() {
        let s = burst(256, 100.0, 0.0);
        let (zpd, snr) = zpd_snr(&s, 32);
        assert_eq!(zpd, 100);
        assert!(snr > 1e3, "noise-free burst SNR {snr}");
        let flat = vec![5.0; 64];
        assert_eq!(zpd_snr(&flat, 8), (0, 0.0));
    }

    #[test]
    fn test_flat_reference_has_no_valid_bin() {
        let cube = Array3::<f64>::from_elem((8, 8, 64), 3.0);
        let geom = geometry();
        let fitter = PhaseFitter::new(&geom, PhaseFitConfig::default());
        let err = fitter.fit(cube.view()).unwrap_err();
        assert!(matches!(err, PhaseFitError::NoValidBin { bins: 4, .. }), "{err}");
    }

    #[test]
    fn test_zpd_at_edge_rejected() {
        let n = 64;
        let cube = Array3::from_shape_fn((4, 4, n), |(_, _, z)| burst(n, 2.0, 0.0)[z]);
        let geom = geometry();
        let fitter = PhaseFitter::new(&geom, PhaseFitConfig::default());
        let err = fitter.fit(cube.view()).unwrap_err();
        assert!(matches!(err, PhaseFitError::WindowTooSmall { zpd: 2, .. }), "{err}");
    }

    #[test]
    fn test_short_reference_rejected() {
        let cube = Array3::<f64>::zeros((4, 4, 10));
        let geom = geometry();
        let fitter = PhaseFitter::new(&geom, PhaseFitConfig::default());
        assert!(matches!(
            fitter.fit(cube.view()),
            Err(PhaseFitError::BadReference { .. })
        ));
    }

    #[test]
    fn test_low_snr_bins_inherit() {
        let n = 200;
        let good = burst(n, 80.0, 0.3);
        // Left half carries the burst, right half is flat.
        let cube =
            Array3::from_shape_fn((12, 6, n), |(x, _, z)| if x < 6 { good[z] } else { 1000.0 });
        let config = PhaseFitConfig {
            binning: 3,
            ..Default::default()
        };
        let map = PhaseFitter::new(&geometry(), config).fit(cube.view()).unwrap();
        assert_eq!(map.grid(), (4, 2));
        assert_eq!(map.zpd_index(), 80);
        // bins 2, 3, 6, 7 are flat
        assert_eq!(map.fallback_count(), 4);
        assert_eq!(map.entry(2).source_region, 1);
        assert_eq!(map.entry(3).source_region, 1);
        assert_eq!(map.entry(7).source_region, 5);
        assert_eq!(map.entry(2).model, map.entry(1).model);
        assert!(!map.is_fallback(0));
    }
}
