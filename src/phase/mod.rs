//! Instrumental phase model.
//!
//! The phase of a folded spectrum is modelled per spatial bin as a polynomial
//! in the normalized channel coordinate `t = j / n_channels ∈ [0, 1)`, which
//! keeps the same coefficients valid for any zero-padding length. A
//! [`PhaseMap`] holds one model per `binning × binning` super-pixel, together
//! with the ZPD index the models were fitted for.

mod fit;

use anyhow::Context;
use rkyv::{Archive, Deserialize, Serialize};
use tracing::info;

pub use fit::{PhaseFitConfig, PhaseFitter};

/// Polynomial phase `φ(t) = Σ cₖ tᵏ`, radians.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct PhaseModel {
    pub coeffs: Vec<f64>,
}

impl PhaseModel {
    pub fn new(coeffs: Vec<f64>) -> Self {
        Self { coeffs }
    }

    /// Null phase of the given degree.
    pub fn zero(degree: usize) -> Self {
        Self {
            coeffs: vec![0.0; degree + 1],
        }
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Evaluate at normalized channel coordinate `t`.
    #[inline]
    pub fn eval(&self, t: f64) -> f64 {
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * t + c)
    }
}

/// Phase model of one spatial bin.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub model: PhaseModel,
    /// ZPD SNR measured in this bin.
    pub snr: f64,
    /// Region the model was fitted in; differs from the entry's own region
    /// when the bin was below the SNR threshold and inherited a neighbour's fit.
    pub source_region: u32,
}

/// Immutable region → phase polynomial map, shared read-only by all
/// transform jobs of a run.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct PhaseMap {
    binning: u32,
    nbx: u32,
    nby: u32,
    degree: u32,
    zpd_index: u32,
    n_samples: u32,
    entries: Vec<PhaseEntry>,
}

impl PhaseMap {
    pub(crate) fn from_entries(
        binning: usize,
        grid: (usize, usize),
        degree: usize,
        zpd_index: usize,
        n_samples: usize,
        entries: Vec<PhaseEntry>,
    ) -> Self {
        debug_assert_eq!(entries.len(), grid.0 * grid.1);
        Self {
            binning: binning as u32,
            nbx: grid.0 as u32,
            nby: grid.1 as u32,
            degree: degree as u32,
            zpd_index: zpd_index as u32,
            n_samples: n_samples as u32,
            entries,
        }
    }

    /// Single-region map applying `model` to every pixel.
    pub fn uniform(model: PhaseModel, zpd_index: usize, n_samples: usize) -> Self {
        let degree = model.degree();
        Self::from_entries(
            1,
            (1, 1),
            degree,
            zpd_index,
            n_samples,
            vec![PhaseEntry {
                model,
                snr: f64::INFINITY,
                source_region: 0,
            }],
        )
    }

    pub fn binning(&self) -> usize {
        self.binning as usize
    }

    /// Number of bins along x and y.
    pub fn grid(&self) -> (usize, usize) {
        (self.nbx as usize, self.nby as usize)
    }

    pub fn degree(&self) -> usize {
        self.degree as usize
    }

    /// ZPD sample index of the reference interferograms.
    pub fn zpd_index(&self) -> usize {
        self.zpd_index as usize
    }

    /// Interferogram length the map was fitted on.
    pub fn n_samples(&self) -> usize {
        self.n_samples as usize
    }

    pub fn n_regions(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[PhaseEntry] {
        &self.entries
    }

    /// Region id `by · nbx + bx` of a pixel. Pixels beyond the fitted area
    /// map to the nearest edge bin.
    pub fn region_of(&self, x: usize, y: usize) -> usize {
        let b = self.binning.max(1) as usize;
        let bx = (x / b).min(self.nbx as usize - 1);
        let by = (y / b).min(self.nby as usize - 1);
        by * self.nbx as usize + bx
    }

    pub fn entry(&self, region: usize) -> &PhaseEntry {
        &self.entries[region]
    }

    pub fn entry_at(&self, x: usize, y: usize) -> &PhaseEntry {
        self.entry(self.region_of(x, y))
    }

    /// `true` when `region` inherited its model from another bin.
    pub fn is_fallback(&self, region: usize) -> bool {
        self.entries[region].source_region as usize != region
    }

    pub fn fallback_count(&self) -> usize {
        (0..self.entries.len()).filter(|&r| self.is_fallback(r)).count()
    }

    /// Serialize the map to bytes using rkyv.
    pub fn to_rkyv_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| anyhow::anyhow!("rkyv serialization failed: {}", e))?;
        Ok(bytes.to_vec())
    }

    /// Save the map for reuse by later runs.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let bytes = self.to_rkyv_bytes()?;
        std::fs::write(path, &bytes)?;
        info!("Saved phase map to {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    /// Grid and entry table agree, so every pixel lookup lands on an entry.
    fn validate(&self) -> anyhow::Result<()> {
        if self.nbx == 0 || self.nby == 0 {
            anyhow::bail!("empty {}x{} bin grid", self.nbx, self.nby);
        }
        if self.binning == 0 {
            anyhow::bail!("zero binning");
        }
        let expected = self.nbx as usize * self.nby as usize;
        if self.entries.len() != expected {
            anyhow::bail!(
                "{} entries for a {}x{} grid",
                self.entries.len(),
                self.nbx,
                self.nby
            );
        }
        if let Some(r) = self
            .entries
            .iter()
            .position(|e| e.source_region as usize >= expected)
        {
            anyhow::bail!(
                "region {r} inherits from missing region {}",
                self.entries[r].source_region
            );
        }
        Ok(())
    }

    /// Load a map written by [`save_to_file`](Self::save_to_file).
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(&bytes);
        let map = rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))?;
        map.validate()
            .with_context(|| format!("Phase map {path} is inconsistent"))?;
        info!(
            "Loaded phase map: {}x{} bins of {} px, degree {}, ZPD {}",
            map.nbx, map.nby, map.binning, map.degree, map.zpd_index
        );
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_3x2() -> PhaseMap {
        let entries = (0..6)
            .map(|r| PhaseEntry {
                model: PhaseModel::new(vec![r as f64, 0.5]),
                snr: 10.0,
                source_region: if r == 4 { 1 } else { r },
            })
            .collect();
        PhaseMap::from_entries(10, (3, 2), 1, 40, 128, entries)
    }

    #[test]
    fn test_eval() {
        let m = PhaseModel::new(vec![1.0, -2.0, 3.0]);
        assert_eq!(m.degree(), 2);
        assert!((m.eval(0.5) - (1.0 - 1.0 + 0.75)).abs() < 1e-15);
        assert_eq!(PhaseModel::zero(3).eval(0.7), 0.0);
    }

    #[test]
    fn test_region_lookup() {
        let map = map_3x2();
        assert_eq!(map.region_of(0, 0), 0);
        assert_eq!(map.region_of(25, 0), 2);
        assert_eq!(map.region_of(12, 15), 4);
        // beyond the fitted area: clamp to the edge bins
        assert_eq!(map.region_of(99, 99), 5);
        assert!(map.is_fallback(4));
        assert_eq!(map.fallback_count(), 1);
        assert_eq!(map.entry_at(12, 15).model.coeffs[0], 4.0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let map = map_3x2();
        let path = std::env::temp_dir().join(format!("ifts_phase_map_{}.rkyv", std::process::id()));
        let path = path.to_str().unwrap();
        map.save_to_file(path).unwrap();
        let loaded = PhaseMap::load_from_file(path).unwrap();
        std::fs::remove_file(path).ok();
        assert_eq!(loaded, map);
    }

    #[test]
    fn test_load_rejects_empty_grid() {
        let dir = std::env::temp_dir();
        for (name, map) in [
            ("empty", PhaseMap::from_entries(10, (0, 0), 1, 40, 128, Vec::new())),
            (
                "short",
                PhaseMap {
                    nby: 3,
                    ..map_3x2()
                },
            ),
        ] {
            let path = dir.join(format!("ifts_phase_map_{name}_{}.rkyv", std::process::id()));
            let path = path.to_str().unwrap();
            map.save_to_file(path).unwrap();
            let err = PhaseMap::load_from_file(path).unwrap_err();
            std::fs::remove_file(path).ok();
            assert!(format!("{err:#}").contains("inconsistent"), "{err:#}");
        }
    }
}
