//! Uniform-grid spatial index over a source list.
//!
//! Sources are bucketed into square cells; each cell maps to a compact slice
//! of source indices (`cell_offsets[c]..cell_offsets[c + 1]` into
//! `source_indices`). A radius query scans only the cells overlapping the
//! query disk, which keeps nearest-neighbour matching close to linear in the
//! number of sources.

use crate::source::DetectedSource;

#[derive(Debug, Clone)]
pub struct SourceIndex {
    cell_size: f64,
    x0: f64,
    y0: f64,
    nx: usize,
    ny: usize,
    xs: Vec<f64>,
    ys: Vec<f64>,
    cell_offsets: Vec<u32>,
    source_indices: Vec<u32>,
}

impl SourceIndex {
    /// Build the index. `cell_size` should be of the order of the query
    /// radius and must be positive.
    pub fn new(sources: &[DetectedSource], cell_size: f64) -> Self {
        assert!(cell_size > 0.0, "cell_size must be > 0");
        let xs: Vec<f64> = sources.iter().map(|s| s.x).collect();
        let ys: Vec<f64> = sources.iter().map(|s| s.y).collect();
        let (x0, x1) = bounds(&xs);
        let (y0, y1) = bounds(&ys);
        let nx = (((x1 - x0) / cell_size).floor() as usize + 1).max(1);
        let ny = (((y1 - y0) / cell_size).floor() as usize + 1).max(1);

        let mut bins: Vec<Vec<u32>> = vec![Vec::new(); nx * ny];
        for (i, (&x, &y)) in xs.iter().zip(&ys).enumerate() {
            let cx = cell_coord(x, x0, cell_size, nx);
            let cy = cell_coord(y, y0, cell_size, ny);
            bins[cy * nx + cx].push(i as u32);
        }

        let mut cell_offsets = Vec::with_capacity(nx * ny + 1);
        let mut source_indices = Vec::with_capacity(xs.len());
        cell_offsets.push(0);
        for bin in bins {
            source_indices.extend(bin);
            cell_offsets.push(source_indices.len() as u32);
        }

        Self {
            cell_size,
            x0,
            y0,
            nx,
            ny,
            xs,
            ys,
            cell_offsets,
            source_indices,
        }
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Indices of the sources within `radius` of `(x, y)` with their squared
    /// distances, in increasing index order.
    pub fn within(&self, x: f64, y: f64, radius: f64) -> Vec<(usize, f64)> {
        let mut out = Vec::new();
        self.for_each_within(x, y, radius, |i, d2| out.push((i, d2)));
        out.sort_unstable_by_key(|&(i, _)| i);
        out
    }

    /// Smallest squared distance to any source within `radius`, if any.
    pub fn nearest_d2(&self, x: f64, y: f64, radius: f64) -> Option<f64> {
        let mut best: Option<f64> = None;
        self.for_each_within(x, y, radius, |_, d2| {
            if best.map_or(true, |b| d2 < b) {
                best = Some(d2);
            }
        });
        best
    }

    fn for_each_within<F>(&self, x: f64, y: f64, radius: f64, mut f: F)
    where
        F: FnMut(usize, f64),
    {
        if self.is_empty() || !(x.is_finite() && y.is_finite()) {
            return;
        }
        let r2 = radius * radius;
        let Some((cx0, cx1)) = self.cell_span(x, radius, self.x0, self.nx) else {
            return;
        };
        let Some((cy0, cy1)) = self.cell_span(y, radius, self.y0, self.ny) else {
            return;
        };
        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                let cell = cy * self.nx + cx;
                let start = self.cell_offsets[cell] as usize;
                let end = self.cell_offsets[cell + 1] as usize;
                for &idx in &self.source_indices[start..end] {
                    let i = idx as usize;
                    let d2 = (self.xs[i] - x).powi(2) + (self.ys[i] - y).powi(2);
                    if d2 <= r2 {
                        f(i, d2);
                    }
                }
            }
        }
    }

    /// Cell range overlapping `[v - radius, v + radius]`, or `None` when the
    /// interval misses the grid entirely.
    fn cell_span(&self, v: f64, radius: f64, origin: f64, n: usize) -> Option<(usize, usize)> {
        let lo = ((v - radius - origin) / self.cell_size).floor();
        let hi = ((v + radius - origin) / self.cell_size).floor();
        if hi < 0.0 || lo >= n as f64 {
            return None;
        }
        Some((lo.max(0.0) as usize, (hi as usize).min(n - 1)))
    }
}

fn bounds(values: &[f64]) -> (f64, f64) {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if lo > hi {
        (0.0, 0.0)
    } else {
        (lo, hi)
    }
}

fn cell_coord(v: f64, origin: f64, cell_size: f64, n: usize) -> usize {
    if !v.is_finite() {
        return 0;
    }
    (((v - origin) / cell_size).floor().max(0.0) as usize).min(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_within_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let sources: Vec<DetectedSource> = (0..300)
            .map(|_| {
                DetectedSource::new(
                    rng.random_range(-50.0..500.0),
                    rng.random_range(0.0..300.0),
                    1.0,
                )
            })
            .collect();
        let index = SourceIndex::new(&sources, 4.0);
        for _ in 0..200 {
            let (x, y) = (rng.random_range(-60.0..520.0), rng.random_range(-10.0..310.0));
            let radius = rng.random_range(0.5..12.0);
            let expected: Vec<usize> = sources
                .iter()
                .enumerate()
                .filter(|(_, s)| (s.x - x).powi(2) + (s.y - y).powi(2) <= radius * radius)
                .map(|(i, _)| i)
                .collect();
            let got: Vec<usize> = index.within(x, y, radius).into_iter().map(|(i, _)| i).collect();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_nearest_and_empty() {
        let sources = vec![DetectedSource::new(0.0, 0.0, 1.0), DetectedSource::new(3.0, 4.0, 1.0)];
        let index = SourceIndex::new(&sources, 2.0);
        assert_eq!(index.nearest_d2(3.0, 3.0, 2.0), Some(1.0));
        assert_eq!(index.nearest_d2(100.0, 100.0, 2.0), None);

        let empty = SourceIndex::new(&[], 2.0);
        assert!(empty.is_empty());
        assert!(empty.within(0.0, 0.0, 10.0).is_empty());
    }
}
