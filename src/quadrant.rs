//! Detector tiling and the per-quadrant job runner.
//!
//! The detector is split into `DIV_NB × DIV_NB` quadrants. Along each axis the
//! quadrant size is `dim / DIV_NB` (floor) and the last quadrant absorbs the
//! remainder. Quadrant `q` sits at column `q % DIV_NB`, row `q / DIV_NB`.
//!
//! Each quadrant is loaded, processed and merged independently; the only data
//! shared across jobs is borrowed read-only. In-core mode processes every
//! quadrant and then merges; BIG_DATA mode works in batches of one quadrant
//! per worker thread and drops each batch as soon as it is merged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array3;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::ProcessingConfig;
use crate::cube::{Camera, CubeSource};
use crate::error::{ConfigError, PipelineError};

/// Half-open rectangular detector region `[x_min, x_max) × [y_min, y_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quadrant {
    pub index: usize,
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl Quadrant {
    pub fn width(&self) -> usize {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> usize {
        self.y_max - self.y_min
    }

    pub fn n_pixels(&self) -> usize {
        self.width() * self.height()
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        (self.x_min..self.x_max).contains(&x) && (self.y_min..self.y_max).contains(&y)
    }
}

/// `DIV_NB × DIV_NB` tiling of a `width × height` detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadrantGrid {
    width: usize,
    height: usize,
    div_nb: usize,
}

impl QuadrantGrid {
    /// Fails when `div_nb` is zero or exceeds either detector dimension.
    pub fn new(width: usize, height: usize, div_nb: usize) -> Result<Self, ConfigError> {
        if div_nb == 0 || div_nb > width || div_nb > height {
            return Err(ConfigError::invalid(
                "DIV_NB",
                div_nb,
                format!("cannot split a {width}x{height} detector into {div_nb}x{div_nb} quadrants"),
            ));
        }
        Ok(Self {
            width,
            height,
            div_nb,
        })
    }

    pub fn div_nb(&self) -> usize {
        self.div_nb
    }

    pub fn len(&self) -> usize {
        self.div_nb * self.div_nb
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bounds of quadrant `index`. Panics if `index >= len()`.
    pub fn quadrant(&self, index: usize) -> Quadrant {
        assert!(index < self.len(), "quadrant index {index} out of range");
        let ix = index % self.div_nb;
        let iy = index / self.div_nb;
        let (x_min, x_max) = axis_bounds(self.width, self.div_nb, ix);
        let (y_min, y_max) = axis_bounds(self.height, self.div_nb, iy);
        Quadrant {
            index,
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    pub fn quadrants(&self) -> impl Iterator<Item = Quadrant> + '_ {
        (0..self.len()).map(|i| self.quadrant(i))
    }

    /// Quadrant covering pixel `(x, y)`.
    pub fn quadrant_of(&self, x: usize, y: usize) -> Option<Quadrant> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let axis_index = |v: usize, dim: usize| (v / (dim / self.div_nb)).min(self.div_nb - 1);
        let ix = axis_index(x, self.width);
        let iy = axis_index(y, self.height);
        Some(self.quadrant(iy * self.div_nb + ix))
    }
}

fn axis_bounds(dim: usize, div_nb: usize, i: usize) -> (usize, usize) {
    let size = dim / div_nb;
    let min = i * size;
    let max = if i + 1 == div_nb { dim } else { min + size };
    (min, max)
}

// ── Cancellation ────────────────────────────────────────────────────────────

/// Cooperative run abort. Checked before each quadrant starts and between
/// BIG_DATA batches; quadrants already running finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Scheduler ───────────────────────────────────────────────────────────────

/// Outcome of a completed scheduler run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSummary {
    pub quadrants: usize,
    /// Number of load/process/merge batches (1 in in-core mode).
    pub batches: usize,
    pub elapsed_ms: f64,
}

/// Runs one job per quadrant on a bounded worker pool.
pub struct QuadrantScheduler {
    grid: QuadrantGrid,
    pool: rayon::ThreadPool,
    big_data: bool,
    cancel: CancellationToken,
}

impl QuadrantScheduler {
    /// `NCPUS = 0` lets rayon pick the number of threads.
    pub fn new(grid: QuadrantGrid, processing: &ProcessingConfig) -> Result<Self, ConfigError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(processing.ncpus)
            .thread_name(|i| format!("ifts-quadrant-{i}"))
            .build()
            .map_err(|e| ConfigError::invalid("NCPUS", processing.ncpus, e.to_string()))?;
        Ok(Self {
            grid,
            pool,
            big_data: processing.big_data,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned token so the caller can abort the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn grid(&self) -> &QuadrantGrid {
        &self.grid
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Load, process and merge every quadrant of `source`.
    ///
    /// `job` runs on the worker pool and receives the quadrant bounds with its
    /// `[x, y, z]` samples. `merge` runs on the calling thread in quadrant
    /// order. When several quadrants fail, the lowest quadrant index is
    /// reported.
    pub fn run<S, T, J, M>(
        &self,
        camera: Camera,
        source: &S,
        job: J,
        mut merge: M,
    ) -> Result<ScheduleSummary, PipelineError>
    where
        S: CubeSource + ?Sized,
        T: Send,
        J: Fn(&Quadrant, Array3<f64>) -> Result<T, PipelineError> + Sync,
        M: FnMut(&Quadrant, T),
    {
        let t0 = Instant::now();
        let quadrants: Vec<Quadrant> = self.grid.quadrants().collect();
        let total = quadrants.len();
        let batch_size = if self.big_data {
            self.num_threads().max(1)
        } else {
            total
        };

        info!(
            "Camera {camera}: {total} quadrants on {} threads ({} mode)",
            self.num_threads(),
            if self.big_data { "BIG_DATA" } else { "in-core" }
        );

        let mut completed = 0usize;
        let mut batches = 0usize;
        for batch in quadrants.chunks(batch_size) {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { completed, total });
            }

            let outputs: Vec<Option<Result<T, PipelineError>>> = self.pool.install(|| {
                batch
                    .par_iter()
                    .map(|quadrant| {
                        if self.cancel.is_cancelled() {
                            return None;
                        }
                        Some(self.process_one(camera, source, quadrant, &job))
                    })
                    .collect()
            });

            // Barrier: the whole batch is back before anything is merged.
            let mut results = Vec::with_capacity(outputs.len());
            for output in outputs {
                match output {
                    Some(result) => results.push(result?),
                    None => return Err(PipelineError::Cancelled { completed, total }),
                }
            }
            for (quadrant, result) in batch.iter().zip(results) {
                merge(quadrant, result);
                completed += 1;
            }
            batches += 1;
            debug!("Camera {camera}: merged batch {batches} ({completed}/{total} quadrants)");
        }

        let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
        info!("Camera {camera}: {total} quadrants done in {elapsed_ms:.1} ms");
        Ok(ScheduleSummary {
            quadrants: total,
            batches,
            elapsed_ms,
        })
    }

    fn process_one<S, T, J>(
        &self,
        camera: Camera,
        source: &S,
        quadrant: &Quadrant,
        job: &J,
    ) -> Result<T, PipelineError>
    where
        S: CubeSource + ?Sized,
        J: Fn(&Quadrant, Array3<f64>) -> Result<T, PipelineError> + Sync,
    {
        let data = source
            .load_region(quadrant)
            .map_err(|e| PipelineError::Source {
                camera,
                quadrant: quadrant.index,
                message: format!("{e:#}"),
            })?;
        debug!(
            "Camera {camera}: quadrant {} loaded ({}x{} px)",
            quadrant.index,
            quadrant.width(),
            quadrant.height()
        );
        job(quadrant, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{ExposureMetadata, InterferogramCube};

    #[test]
    fn test_grid_covers_detector_once() {
        let grid = QuadrantGrid::new(2048, 2064, 3).unwrap();
        let mut hits = vec![0u8; 2048 * 2064];
        for q in grid.quadrants() {
            for x in q.x_min..q.x_max {
                for y in q.y_min..q.y_max {
                    hits[x * 2064 + y] += 1;
                }
            }
        }
        assert!(hits.iter().all(|&h| h == 1));
    }

    #[test]
    fn test_remainder_goes_to_last_quadrant() {
        let grid = QuadrantGrid::new(10, 11, 3).unwrap();
        let q0 = grid.quadrant(0);
        assert_eq!((q0.x_min, q0.x_max, q0.y_min, q0.y_max), (0, 3, 0, 3));
        let q2 = grid.quadrant(2);
        assert_eq!((q2.x_min, q2.x_max), (6, 10));
        let q8 = grid.quadrant(8);
        assert_eq!((q8.x_min, q8.x_max, q8.y_min, q8.y_max), (6, 10, 6, 11));
        // index = row * div_nb + column
        let q5 = grid.quadrant(5);
        assert_eq!((q5.x_min, q5.y_min), (6, 3));
    }

    #[test]
    fn test_quadrant_of() {
        let grid = QuadrantGrid::new(10, 11, 3).unwrap();
        for q in grid.quadrants() {
            for x in q.x_min..q.x_max {
                for y in q.y_min..q.y_max {
                    assert_eq!(grid.quadrant_of(x, y), Some(q));
                }
            }
        }
        assert_eq!(grid.quadrant_of(10, 0), None);
    }

    #[test]
    fn test_invalid_div_nb() {
        assert!(QuadrantGrid::new(10, 10, 0).is_err());
        assert!(QuadrantGrid::new(2, 10, 3).is_err());
    }

    fn processing(big_data: bool, ncpus: usize) -> ProcessingConfig {
        ProcessingConfig {
            ncpus,
            big_data,
            div_nb: 3,
            apodization: Default::default(),
            optim_dark_cam2: false,
        }
    }

    fn cube() -> InterferogramCube {
        InterferogramCube::new(
            Array3::from_shape_fn((7, 5, 3), |(x, y, z)| (x * 100 + y * 10 + z) as f64),
            ExposureMetadata::default(),
        )
    }

    #[test]
    fn test_run_merges_in_order_both_modes() {
        let cube = cube();
        for big_data in [false, true] {
            let grid = QuadrantGrid::new(7, 5, 2).unwrap();
            let scheduler = QuadrantScheduler::new(grid, &processing(big_data, 2)).unwrap();
            let mut merged = Vec::new();
            let summary = scheduler
                .run(
                    Camera::One,
                    &cube,
                    |q, data| Ok((q.index, data.sum())),
                    |q, (index, _sum)| {
                        assert_eq!(q.index, index);
                        merged.push(index);
                    },
                )
                .unwrap();
            assert_eq!(merged, vec![0, 1, 2, 3]);
            assert_eq!(summary.quadrants, 4);
            if big_data {
                assert_eq!(summary.batches, 2);
            } else {
                assert_eq!(summary.batches, 1);
            }
        }
    }

    #[test]
    fn test_lowest_failing_quadrant_reported() {
        let cube = cube();
        let grid = QuadrantGrid::new(7, 5, 2).unwrap();
        let scheduler = QuadrantScheduler::new(grid, &processing(false, 4)).unwrap();
        let err = scheduler
            .run(
                Camera::Two,
                &cube,
                |q, _| {
                    if q.index >= 1 {
                        Err(PipelineError::Cancelled {
                            completed: q.index,
                            total: 0,
                        })
                    } else {
                        Ok(())
                    }
                },
                |_, _| {},
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { completed: 1, .. }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cube = cube();
        let grid = QuadrantGrid::new(7, 5, 2).unwrap();
        let token = CancellationToken::new();
        let scheduler = QuadrantScheduler::new(grid, &processing(true, 1))
            .unwrap()
            .with_cancellation(token.clone());
        token.cancel();
        let err = scheduler
            .run(Camera::One, &cube, |_, _| Ok(()), |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Cancelled {
                completed: 0,
                total: 4
            }
        ));
    }

    #[test]
    fn test_cancel_between_batches() {
        let cube = cube();
        let grid = QuadrantGrid::new(7, 5, 2).unwrap();
        let token = CancellationToken::new();
        let scheduler = QuadrantScheduler::new(grid, &processing(true, 1))
            .unwrap()
            .with_cancellation(token.clone());
        let err = scheduler
            .run(Camera::One, &cube, |_, _| Ok(()), |q, _| {
                if q.index == 1 {
                    token.cancel();
                }
            })
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Cancelled {
                completed: 2,
                total: 4
            }
        ));
    }
}
