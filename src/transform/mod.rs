//! Interferogram → spectrum transform.
//!
//! Per pixel:
//! 1. optional OPD drift correction (linear resampling onto the nominal grid)
//! 2. DC removal, NaN → 0, apodization around the ZPD
//! 3. zero-padding to [`padded_length`], pre-ZPD samples wrapped to the end
//! 4. forward real FFT
//! 5. fold onto the free spectral range: channel `j` is FFT bin `j` for even
//!    folding orders and bin `M - j` for odd ones (`M` = padded length / 2)
//! 6. phase correction `Re(S · e^{-iφ(t)})`, or the modulus without a phase model
//!
//! The in-core and streaming block variants run the same per-pixel kernel and
//! produce bit-identical output.

pub mod apodization;
mod fft;

use ndarray::{Array2, Array3, ArrayView1, ArrayView3};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use tracing::debug;

use crate::calibration::CalibrationGeometry;
use crate::config::PipelineConfig;
use crate::cube::{QualityFlags, SpectralBlock};
use crate::error::TransformError;
use crate::phase::{PhaseMap, PhaseModel};

pub use apodization::{Apodization, ParseApodizationError};
pub use fft::padded_length;
use fft::{FftPlan, FftScratch};

/// Shortest interferogram the transformer accepts.
pub const MIN_SAMPLES: usize = 4;

/// Transform settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformConfig {
    /// Apodization window. Default Norton–Beer medium.
    pub apodization: Apodization,
    /// ZPD sample index. `None` locates it per pixel as the peak of
    /// `|s - mean|`. Replaced by the phase map's ZPD when one is attached.
    /// Default `None`.
    pub zpd_index: Option<usize>,
    /// Process blocks sequentially with a single scratch buffer (BIG_DATA)
    /// instead of in parallel over pixels. Default false.
    pub streaming: bool,
    /// Samples above this value flag the pixel as saturated. Default 65535.
    pub saturation_threshold: f64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            apodization: Apodization::default(),
            zpd_index: None,
            streaming: false,
            saturation_threshold: 65535.0,
        }
    }
}

impl From<&PipelineConfig> for TransformConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            apodization: config.processing.apodization,
            zpd_index: None,
            streaming: config.processing.big_data,
            saturation_threshold: config.detector.saturation_threshold,
        }
    }
}

/// One pixel's interferogram, borrowed from its cube.
#[derive(Debug, Clone)]
pub struct Interferogram<'a> {
    samples: ArrayView1<'a, f64>,
    pub x: usize,
    pub y: usize,
    /// `1 / cos θ` of the pixel. Scales the wavenumber axis only.
    pub calibration_coeff: f64,
    opd_positions: Option<&'a [f64]>,
}

impl<'a> Interferogram<'a> {
    pub fn new(samples: ArrayView1<'a, f64>, x: usize, y: usize) -> Self {
        Self {
            samples,
            x,
            y,
            calibration_coeff: 1.0,
            opd_positions: None,
        }
    }

    pub fn from_slice(samples: &'a [f64], x: usize, y: usize) -> Self {
        Self::new(ArrayView1::from(samples), x, y)
    }

    pub fn with_calibration_coeff(mut self, coeff: f64) -> Self {
        self.calibration_coeff = coeff;
        self
    }

    /// Measured OPD of each sample in units of the nominal step. Enables
    /// drift correction.
    pub fn with_opd_positions(mut self, positions: &'a [f64]) -> Self {
        self.opd_positions = Some(positions);
        self
    }

    pub fn samples(&self) -> ArrayView1<'a, f64> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Calibrated spectrum of one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumPixel {
    pub x: usize,
    pub y: usize,
    /// Phase-corrected real spectrum, or the modulus without a phase model.
    pub values: Vec<f64>,
    pub calibration_coeff: f64,
    pub flags: QualityFlags,
}

impl SpectrumPixel {
    /// Wavenumber of each value, cm⁻¹.
    pub fn wavenumber_axis(&self, geometry: &CalibrationGeometry) -> Vec<f64> {
        geometry.wavenumber_axis(self.values.len(), self.calibration_coeff)
    }
}

/// Transformed tile plus its saturation tally.
#[derive(Debug, Clone)]
pub struct BlockOutput {
    pub block: SpectralBlock,
    pub saturated_pixels: usize,
    /// Largest sample among saturated pixels (0 when none).
    pub saturation_peak: f64,
}

/// Per-worker buffers.
struct Scratch {
    fft: FftScratch,
    resampled: Vec<f64>,
    window: Vec<f64>,
    folded: Vec<Complex<f64>>,
}

/// Outcome of the shared kernel for one pixel.
struct KernelStatus {
    flags: QualityFlags,
    max_sample: f64,
}

/// Transforms interferograms of a fixed length.
#[derive(Debug)]
pub struct InterferogramTransformer<'a> {
    geometry: &'a CalibrationGeometry,
    phase_map: Option<&'a PhaseMap>,
    config: TransformConfig,
    n_samples: usize,
    plan: FftPlan,
    /// Precomputed window when the ZPD is fixed.
    window: Option<Vec<f64>>,
}

impl<'a> InterferogramTransformer<'a> {
    pub fn new(
        geometry: &'a CalibrationGeometry,
        n_samples: usize,
        config: TransformConfig,
    ) -> Result<Self, TransformError> {
        if n_samples < MIN_SAMPLES {
            return Err(TransformError::TooFewSamples {
                n_samples,
                minimum: MIN_SAMPLES,
            });
        }
        let plan = FftPlan::new(padded_length(n_samples));
        let mut transformer = Self {
            geometry,
            phase_map: None,
            config,
            n_samples,
            plan,
            window: None,
        };
        transformer.set_zpd(transformer.config.zpd_index)?;
        Ok(transformer)
    }

    /// Attach a phase map. Its ZPD index becomes the transform's ZPD.
    pub fn with_phase_map(mut self, phase_map: &'a PhaseMap) -> Result<Self, TransformError> {
        self.set_zpd(Some(phase_map.zpd_index()))?;
        self.phase_map = Some(phase_map);
        Ok(self)
    }

    fn set_zpd(&mut self, zpd: Option<usize>) -> Result<(), TransformError> {
        if let Some(zpd) = zpd {
            if zpd >= self.n_samples {
                return Err(TransformError::ZpdOutOfRange {
                    zpd,
                    n_samples: self.n_samples,
                });
            }
            self.window = Some(self.config.apodization.window(self.n_samples, zpd));
        } else {
            self.window = None;
        }
        self.config.zpd_index = zpd;
        Ok(())
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Number of output channels: half the padded length.
    pub fn n_channels(&self) -> usize {
        self.plan.len() / 2
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn geometry(&self) -> &CalibrationGeometry {
        self.geometry
    }

    /// Output wavenumber grid for a pixel with coefficient `coeff`, cm⁻¹.
    pub fn wavenumber_axis(&self, coeff: f64) -> Vec<f64> {
        self.geometry.wavenumber_axis(self.n_channels(), coeff)
    }

    /// Folded complex spectrum before phase correction.
    pub fn complex_spectrum(
        &self,
        interferogram: &Interferogram<'_>,
    ) -> Result<Vec<Complex<f64>>, TransformError> {
        let mut scratch = self.scratch();
        self.kernel(
            interferogram.samples,
            interferogram.opd_positions,
            &mut scratch,
        )?;
        Ok(scratch.folded)
    }

    /// Calibrated spectrum of one pixel.
    pub fn transform(
        &self,
        interferogram: &Interferogram<'_>,
    ) -> Result<SpectrumPixel, TransformError> {
        let mut scratch = self.scratch();
        let mut values = vec![0.0; self.n_channels()];
        let status = self.transform_into(
            interferogram.samples,
            interferogram.opd_positions,
            interferogram.x,
            interferogram.y,
            &mut scratch,
            &mut values,
        )?;
        Ok(SpectrumPixel {
            x: interferogram.x,
            y: interferogram.y,
            values,
            calibration_coeff: interferogram.calibration_coeff,
            flags: status.flags,
        })
    }

    /// Transform an `[x, y, z]` tile whose first pixel sits at `origin` on the
    /// detector. Runs in parallel over pixels unless the config asks for the
    /// streaming variant.
    pub fn transform_block(
        &self,
        data: ArrayView3<'_, f64>,
        origin: (usize, usize),
    ) -> Result<BlockOutput, TransformError> {
        let (w, h, n) = data.dim();
        if n != self.n_samples {
            return Err(TransformError::DepthMismatch {
                expected: self.n_samples,
                got: n,
            });
        }
        let n_channels = self.n_channels();
        let mut out = Array3::<f64>::zeros((w, h, n_channels));
        let mut flags = Array2::from_elem((w, h), QualityFlags::empty());
        let mut saturated_pixels = 0usize;
        let mut saturation_peak = 0.0f64;
        let mut tally = |flag: QualityFlags, max_sample: f64| {
            if flag.contains(QualityFlags::SATURATED) {
                saturated_pixels += 1;
                saturation_peak = saturation_peak.max(max_sample);
            }
        };

        if self.config.streaming {
            let mut scratch = self.scratch();
            let mut values = vec![0.0; n_channels];
            for x in 0..w {
                for y in 0..h {
                    let samples = data.slice(ndarray::s![x, y, ..]);
                    let status = self.transform_into(
                        samples,
                        None,
                        origin.0 + x,
                        origin.1 + y,
                        &mut scratch,
                        &mut values,
                    )?;
                    out.slice_mut(ndarray::s![x, y, ..])
                        .assign(&ArrayView1::from(&values[..]));
                    flags[[x, y]] = status.flags;
                    tally(status.flags, status.max_sample);
                }
            }
        } else {
            let pixels: Vec<Result<(Vec<f64>, KernelStatus), TransformError>> = (0..w * h)
                .into_par_iter()
                .map_init(
                    || self.scratch(),
                    |scratch, p| {
                        let (x, y) = (p / h, p % h);
                        let samples = data.slice(ndarray::s![x, y, ..]);
                        let mut values = vec![0.0; n_channels];
                        let status = self.transform_into(
                            samples,
                            None,
                            origin.0 + x,
                            origin.1 + y,
                            scratch,
                            &mut values,
                        )?;
                        Ok((values, status))
                    },
                )
                .collect();
            for (p, pixel) in pixels.into_iter().enumerate() {
                let (values, status) = pixel?;
                let (x, y) = (p / h, p % h);
                out.slice_mut(ndarray::s![x, y, ..])
                    .assign(&ArrayView1::from(&values[..]));
                flags[[x, y]] = status.flags;
                tally(status.flags, status.max_sample);
            }
        }

        debug!(
            "Transformed {}x{} block at ({}, {}): {} channels, {} saturated",
            w, h, origin.0, origin.1, n_channels, saturated_pixels
        );
        Ok(BlockOutput {
            block: SpectralBlock { data: out, flags },
            saturated_pixels,
            saturation_peak,
        })
    }

    fn scratch(&self) -> Scratch {
        Scratch {
            fft: self.plan.scratch(),
            resampled: vec![0.0; self.n_samples],
            window: Vec::new(),
            folded: vec![Complex::new(0.0, 0.0); self.n_channels()],
        }
    }

    /// Kernel plus phase correction into `values`.
    fn transform_into(
        &self,
        samples: ArrayView1<'_, f64>,
        opd_positions: Option<&[f64]>,
        x: usize,
        y: usize,
        scratch: &mut Scratch,
        values: &mut [f64],
    ) -> Result<KernelStatus, TransformError> {
        let mut status = self.kernel(samples, opd_positions, scratch)?;
        if status.flags.contains(QualityFlags::NO_DATA) {
            values.fill(0.0);
            return Ok(status);
        }

        let model = self.phase_map.map(|map| {
            let region = map.region_of(x, y);
            if map.is_fallback(region) {
                status.flags.insert(QualityFlags::PHASE_FALLBACK);
            }
            &map.entry(region).model
        });
        apply_phase(&scratch.folded, model, values);
        Ok(status)
    }

    /// Shared per-pixel kernel: leaves the folded complex spectrum in
    /// `scratch.folded`.
    fn kernel(
        &self,
        samples: ArrayView1<'_, f64>,
        opd_positions: Option<&[f64]>,
        scratch: &mut Scratch,
    ) -> Result<KernelStatus, TransformError> {
        let n = self.n_samples;
        if samples.len() != n {
            return Err(TransformError::DepthMismatch {
                expected: n,
                got: samples.len(),
            });
        }

        match opd_positions {
            Some(positions) => {
                if positions.len() != n {
                    return Err(TransformError::DriftLength {
                        expected: n,
                        got: positions.len(),
                    });
                }
                resample_linear(samples, positions, &mut scratch.resampled);
            }
            None => {
                for (dst, &src) in scratch.resampled.iter_mut().zip(samples.iter()) {
                    *dst = src;
                }
            }
        }

        let mut flags = QualityFlags::empty();
        let mut sum = 0.0;
        let mut finite = 0usize;
        let mut max_sample = f64::NEG_INFINITY;
        for &v in &scratch.resampled {
            if v.is_finite() {
                sum += v;
                finite += 1;
                max_sample = max_sample.max(v);
            }
        }
        if finite == 0 {
            scratch.folded.fill(Complex::new(0.0, 0.0));
            return Ok(KernelStatus {
                flags: QualityFlags::NO_DATA,
                max_sample: 0.0,
            });
        }
        if max_sample > self.config.saturation_threshold {
            flags.insert(QualityFlags::SATURATED);
        }
        let mean = sum / finite as f64;
        for v in scratch.resampled.iter_mut() {
            *v = if v.is_finite() { *v - mean } else { 0.0 };
        }

        let zpd = match self.config.zpd_index {
            Some(zpd) => zpd,
            None => locate_zpd(&scratch.resampled),
        };
        let window: &[f64] = match &self.window {
            Some(w) => w,
            None => {
                scratch.window = self.config.apodization.window(n, zpd);
                &scratch.window
            }
        };

        // Samples from the ZPD onwards start the buffer, earlier ones wrap
        // to its end.
        let len = self.plan.len();
        let input = &mut scratch.fft.input;
        input.fill(0.0);
        for (i, (&v, &w)) in scratch.resampled.iter().zip(window).enumerate() {
            let dst = if i >= zpd { i - zpd } else { len - (zpd - i) };
            input[dst] = v * w;
        }
        self.plan.forward(&mut scratch.fft)?;

        let m = len / 2;
        let odd = self.geometry.folding_order() % 2 == 1;
        for (j, out) in scratch.folded.iter_mut().enumerate() {
            let bin = if odd { m - j } else { j };
            *out = scratch.fft.output[bin];
        }

        Ok(KernelStatus { flags, max_sample })
    }
}

/// `Re(S · e^{-iφ(t)})` per channel, or `|S|` without a model.
fn apply_phase(folded: &[Complex<f64>], model: Option<&PhaseModel>, values: &mut [f64]) {
    let m = folded.len() as f64;
    match model {
        Some(model) => {
            for (j, (v, s)) in values.iter_mut().zip(folded).enumerate() {
                let phi = model.eval(j as f64 / m);
                *v = (s * Complex::from_polar(1.0, -phi)).re;
            }
        }
        None => {
            for (v, s) in values.iter_mut().zip(folded) {
                *v = s.norm();
            }
        }
    }
}

/// Index of the largest `|v|`; first one on ties.
pub(crate) fn locate_zpd(centered: &[f64]) -> usize {
    let mut best = 0;
    let mut best_abs = f64::NEG_INFINITY;
    for (i, v) in centered.iter().enumerate() {
        if v.abs() > best_abs {
            best_abs = v.abs();
            best = i;
        }
    }
    best
}

/// Resample samples taken at `positions` (in step units, increasing) onto
/// the nominal grid `0, 1, …, n-1`. Outside the measured span the end
/// samples are held.
fn resample_linear(samples: ArrayView1<'_, f64>, positions: &[f64], out: &mut [f64]) {
    let n = samples.len();
    let mut k = 0usize;
    for (i, dst) in out.iter_mut().enumerate() {
        let target = i as f64;
        if target <= positions[0] {
            *dst = samples[0];
            continue;
        }
        if target >= positions[n - 1] {
            *dst = samples[n - 1];
            continue;
        }
        while k + 1 < n && positions[k + 1] <= target {
            k += 1;
        }
        let (p0, p1) = (positions[k], positions[k + 1]);
        let frac = if p1 > p0 { (target - p0) / (p1 - p0) } else { 0.0 };
        *dst = samples[k] + frac * (samples[k + 1] - samples[k]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorSize;
    use crate::phase::PhaseModel;

    fn geometry(order: u32) -> CalibrationGeometry {
        // Laser placed at the middle of the free spectral range for `order`.
        let step = 3000.0;
        let sigma = (order as f64 + 0.5) / (2.0 * step * 1e-7);
        CalibrationGeometry::new(
            1e7 / sigma,
            order,
            step,
            DetectorSize::new(8, 8),
            DetectorSize::new(8, 8),
        )
        .unwrap()
    }

    /// Cosine interferogram of a line sitting exactly on output channel
    /// `channel`, ZPD at `zpd`.
    fn tone(geom: &CalibrationGeometry, n: usize, zpd: usize, channel: usize) -> Vec<f64> {
        let m = padded_length(n) / 2;
        let sigma = geom.wavenumber_axis(m, 1.0)[channel];
        let step_cm = geom.step_size_nm() * 1e-7;
        (0..n)
            .map(|i| {
                let opd = (i as f64 - zpd as f64) * step_cm;
                100.0 + (2.0 * std::f64::consts::PI * sigma * opd).cos()
            })
            .collect()
    }

    fn argmax(v: &[f64]) -> usize {
        v.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0
    }

    #[test]
    fn test_tone_lands_on_its_channel_even_and_odd_orders() {
        for order in [10u32, 11] {
            let geom = geometry(order);
            let n = 200;
            let zpd = 40;
            let t = InterferogramTransformer::new(
                &geom,
                n,
                TransformConfig {
                    zpd_index: Some(zpd),
                    ..Default::default()
                },
            )
            .unwrap();
            assert_eq!(t.n_channels(), 256);
            for channel in [30, 128, 200] {
                let igm = tone(&geom, n, zpd, channel);
                let spectrum = t.transform(&Interferogram::from_slice(&igm, 0, 0)).unwrap();
                assert_eq!(argmax(&spectrum.values), channel, "order {order}");
            }
        }
    }

    #[test]
    fn test_symmetric_interferogram_has_real_spectrum() {
        let geom = geometry(8);
        let n = 129;
        let zpd = 64;
        let igm = tone(&geom, n, zpd, 77);
        let t = InterferogramTransformer::new(
            &geom,
            n,
            TransformConfig {
                zpd_index: Some(zpd),
                ..Default::default()
            },
        )
        .unwrap();
        let spec = t
            .complex_spectrum(&Interferogram::from_slice(&igm, 0, 0))
            .unwrap();
        let peak = spec[77];
        assert!(peak.re > 0.0);
        assert!(peak.im.abs() < 1e-9 * peak.re);
    }

    #[test]
    fn test_phase_correction_recovers_modulus() {
        let geom = geometry(8);
        let n = 160;
        let zpd = 60;
        let igm = tone(&geom, n, zpd, 90);
        let base = InterferogramTransformer::new(
            &geom,
            n,
            TransformConfig {
                zpd_index: Some(zpd),
                ..Default::default()
            },
        )
        .unwrap();
        let complex = base
            .complex_spectrum(&Interferogram::from_slice(&igm, 0, 0))
            .unwrap();
        let phi = complex[90].arg();
        let map = PhaseMap::uniform(PhaseModel::new(vec![phi]), zpd, n);
        let corrected = InterferogramTransformer::new(&geom, n, TransformConfig::default())
            .unwrap()
            .with_phase_map(&map)
            .unwrap()
            .transform(&Interferogram::from_slice(&igm, 0, 0))
            .unwrap();
        assert!((corrected.values[90] - complex[90].norm()).abs() < 1e-9 * complex[90].norm());
    }

    #[test]
    fn test_nan_and_empty_pixels() {
        let geom = geometry(8);
        let n = 64;
        let t = InterferogramTransformer::new(&geom, n, TransformConfig::default()).unwrap();
        let nan = vec![f64::NAN; n];
        let s = t.transform(&Interferogram::from_slice(&nan, 3, 4)).unwrap();
        assert!(s.flags.contains(QualityFlags::NO_DATA));
        assert!(s.values.iter().all(|&v| v == 0.0));

        let mut partial = tone(&geom, n, 20, 10);
        partial[5] = f64::NAN;
        let s = t.transform(&Interferogram::from_slice(&partial, 0, 0)).unwrap();
        assert!(s.flags.is_empty());
        assert!(s.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_saturation_flag() {
        let geom = geometry(8);
        let n = 64;
        let t = InterferogramTransformer::new(
            &geom,
            n,
            TransformConfig {
                saturation_threshold: 100.5,
                ..Default::default()
            },
        )
        .unwrap();
        let igm = tone(&geom, n, 20, 10);
        let s = t.transform(&Interferogram::from_slice(&igm, 0, 0)).unwrap();
        assert!(s.flags.contains(QualityFlags::SATURATED));
    }

    #[test]
    fn test_streaming_matches_in_core() {
        let geom = geometry(11);
        let n = 48;
        let data = Array3::from_shape_fn((5, 4, n), |(x, y, z)| {
            let phase = (x * 7 + y * 3) as f64 * 0.1;
            50.0 + ((z as f64 - 12.0) * 0.9 + phase).cos() * (1.0 + x as f64)
        });
        let mut outputs = Vec::new();
        for streaming in [false, true] {
            let t = InterferogramTransformer::new(
                &geom,
                n,
                TransformConfig {
                    streaming,
                    ..Default::default()
                },
            )
            .unwrap();
            outputs.push(t.transform_block(data.view(), (0, 0)).unwrap());
        }
        assert_eq!(outputs[0].block.data, outputs[1].block.data);
        assert_eq!(outputs[0].block.flags, outputs[1].block.flags);
    }

    #[test]
    fn test_depth_and_zpd_validation() {
        let geom = geometry(8);
        assert!(matches!(
            InterferogramTransformer::new(&geom, 2, TransformConfig::default()),
            Err(TransformError::TooFewSamples { .. })
        ));
        assert!(matches!(
            InterferogramTransformer::new(
                &geom,
                16,
                TransformConfig {
                    zpd_index: Some(16),
                    ..Default::default()
                }
            ),
            Err(TransformError::ZpdOutOfRange { zpd: 16, .. })
        ));
        let t = InterferogramTransformer::new(&geom, 16, TransformConfig::default()).unwrap();
        let data = Array3::<f64>::zeros((2, 2, 15));
        assert!(matches!(
            t.transform_block(data.view(), (0, 0)),
            Err(TransformError::DepthMismatch { expected: 16, got: 15 })
        ));
    }

    #[test]
    fn test_drift_correction() {
        let geom = geometry(8);
        let n = 64;
        let t = InterferogramTransformer::new(
            &geom,
            n,
            TransformConfig {
                zpd_index: Some(20),
                ..Default::default()
            },
        )
        .unwrap();
        // Identity positions leave the spectrum unchanged.
        let igm = tone(&geom, n, 20, 12);
        let positions: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let plain = t.transform(&Interferogram::from_slice(&igm, 0, 0)).unwrap();
        let drifted = t
            .transform(&Interferogram::from_slice(&igm, 0, 0).with_opd_positions(&positions))
            .unwrap();
        assert_eq!(plain.values, drifted.values);

        let short = vec![0.0; n - 1];
        assert!(matches!(
            t.transform(&Interferogram::from_slice(&igm, 0, 0).with_opd_positions(&short)),
            Err(TransformError::DriftLength { .. })
        ));
    }

    #[test]
    fn test_resample_linear() {
        let samples = [0.0, 10.0, 20.0, 30.0];
        let positions = [0.0, 0.5, 2.0, 3.5];
        let mut out = [0.0; 4];
        resample_linear(ArrayView1::from(&samples[..]), &positions, &mut out);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - (10.0 + 10.0 / 3.0)).abs() < 1e-12);
        assert_eq!(out[2], 20.0);
        assert!((out[3] - (20.0 + 10.0 / 1.5)).abs() < 1e-12);
    }
}
