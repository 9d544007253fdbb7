use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::error::TransformError;

/// Padded transform length for `n` samples: the next power of two ≥ `2n`.
pub fn padded_length(n_samples: usize) -> usize {
    (2 * n_samples.max(1)).next_power_of_two()
}

/// Forward real-to-complex plan of a fixed length, shareable across threads.
#[derive(Clone)]
pub(crate) struct FftPlan {
    len: usize,
    forward: Arc<dyn RealToComplex<f64>>,
}

/// Per-worker buffers for one plan. Reused across pixels.
pub(crate) struct FftScratch {
    pub input: Vec<f64>,
    pub output: Vec<Complex<f64>>,
    work: Vec<Complex<f64>>,
}

impl FftPlan {
    pub fn new(len: usize) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(len);
        Self { len, forward }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn scratch(&self) -> FftScratch {
        FftScratch {
            input: self.forward.make_input_vec(),
            output: self.forward.make_output_vec(),
            work: self.forward.make_scratch_vec(),
        }
    }

    /// Transform `scratch.input` into `scratch.output` (`len/2 + 1` bins).
    /// The input buffer is used as workspace and left undefined.
    pub fn forward(&self, scratch: &mut FftScratch) -> Result<(), TransformError> {
        self.forward
            .process_with_scratch(&mut scratch.input, &mut scratch.output, &mut scratch.work)
            .map_err(|e| TransformError::Fft(e.to_string()))
    }
}

impl std::fmt::Debug for FftPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftPlan").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_length() {
        assert_eq!(padded_length(100), 256);
        assert_eq!(padded_length(128), 256);
        assert_eq!(padded_length(129), 512);
        assert_eq!(padded_length(1), 2);
    }

    #[test]
    fn test_forward_cosine() {
        let plan = FftPlan::new(64);
        let mut scratch = plan.scratch();
        for (i, v) in scratch.input.iter_mut().enumerate() {
            *v = (2.0 * std::f64::consts::PI * 5.0 * i as f64 / 64.0).cos();
        }
        plan.forward(&mut scratch).unwrap();
        assert_eq!(scratch.output.len(), 33);
        let peak = scratch
            .output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .unwrap()
            .0;
        assert_eq!(peak, 5);
        assert!((scratch.output[5].re - 32.0).abs() < 1e-9);
    }
}
