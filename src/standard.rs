//! Spectrophotometric standard stars.
//!
//! Tabulated standard spectra come in two plain-text formats:
//!
//! - **Oke (1990)** `fXX.dat`: `wavelength_Å flux` per line, flux in units of
//!   1e-16 erg/cm²/s/Å. Resolution is 1 Å below 4700 Å and 2 Å above.
//! - **Massey et al. (1988)** `spXX.dat`: `wavelength_Å AB_magnitude` per
//!   line. `#` lines are comments; a comment naming `IIDS` or `BOTH` selects
//!   the spectrograph the table was measured with (IRS otherwise), which sets
//!   the resolution.
//!
//! A [`StandardStar`] is projected on a wavenumber axis and pushed through a
//! [`PhotometricModel`] to predict the counts a calibration exposure should
//! record.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use thiserror::Error;
use tracing::{debug, warn};

use crate::calibration::cm1_to_nm;
use crate::error::ConfigError;
use crate::photometry::{PhotometricModel, TransmissionCurve};

/// Speed of light, Å/s.
const LIGHT_SPEED_A_S: f64 = 2.997_924_58e18;
/// AB magnitude zero point for f_ν in erg/cm²/s/Hz.
const AB_ZERO_POINT: f64 = 48.60;
/// Oke tables store flux in units of 1e-16 erg/cm²/s/Å.
const OKE_FLUX_UNIT: f64 = 1e-16;

/// AB magnitude at `wavelength_a` → flux density in erg/cm²/s/Å.
pub fn abmag_to_flambda(mag: f64, wavelength_a: f64) -> f64 {
    let fnu = 10f64.powf(-0.4 * (mag + AB_ZERO_POINT));
    fnu * LIGHT_SPEED_A_S / (wavelength_a * wavelength_a)
}

/// Table layout of a standard star file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardFormat {
    Oke,
    Massey,
}

/// Unrecognised standard file format name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown standard format {0:?} (expected oke or massey)")]
pub struct ParseStandardFormatError(String);

impl FromStr for StandardFormat {
    type Err = ParseStandardFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oke" => Ok(StandardFormat::Oke),
            "massey" | "misc" => Ok(StandardFormat::Massey),
            _ => Err(ParseStandardFormatError(s.trim().to_string())),
        }
    }
}

impl fmt::Display for StandardFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StandardFormat::Oke => "Oke (1990)",
            StandardFormat::Massey => "Massey (1988)",
        })
    }
}

/// Spectrograph a Massey table was measured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MasseySpectrograph {
    Irs,
    Iids,
    Both,
}

impl MasseySpectrograph {
    /// Resolution element in Å at `wavelength_a`.
    fn resolution_a(self, wavelength_a: f64) -> f64 {
        match self {
            MasseySpectrograph::Irs => 10.0,
            MasseySpectrograph::Iids if wavelength_a > 5000.0 => 14.0,
            MasseySpectrograph::Iids => 7.0,
            MasseySpectrograph::Both if wavelength_a > 5000.0 => 14.0,
            MasseySpectrograph::Both => 10.0,
        }
    }
}

/// Tabulated spectrum of a standard star.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardStar {
    name: String,
    format: StandardFormat,
    /// Sorted by increasing wavelength.
    wavelength_a: Vec<f64>,
    /// erg/cm²/s/Å.
    flux: Vec<f64>,
    /// Resolving power λ/Δλ.
    resolution: Vec<f64>,
}

impl StandardStar {
    /// Parse a table held in memory. `name` only labels log output.
    pub fn parse(name: &str, format: StandardFormat, data: &str) -> anyhow::Result<Self> {
        let mut spectrograph = MasseySpectrograph::Irs;
        let mut rows = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            if format == StandardFormat::Massey && line.contains('#') {
                if line.contains("IIDS") {
                    spectrograph = MasseySpectrograph::Iids;
                } else if line.contains("BOTH") {
                    spectrograph = MasseySpectrograph::Both;
                }
                continue;
            }
            let mut cols = line.split_whitespace();
            let Some(first) = cols.next() else {
                continue;
            };
            let number = |s: Option<&str>, column: usize| -> anyhow::Result<f64> {
                s.unwrap_or("")
                    .parse::<f64>()
                    .with_context(|| format!("{name}: line {}, column {column}", lineno + 1))
            };
            let wavelength = number(Some(first), 1)?;
            let value = number(cols.next(), 2)?;
            rows.push((wavelength, value));
        }
        if rows.len() < 2 {
            anyhow::bail!("{name}: {} usable rows, need at least two", rows.len());
        }
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut wavelength_a = Vec::with_capacity(rows.len());
        let mut flux = Vec::with_capacity(rows.len());
        let mut resolution = Vec::with_capacity(rows.len());
        for (w, value) in rows {
            let (f, dw) = match format {
                StandardFormat::Oke => (value * OKE_FLUX_UNIT, if w > 4700.0 { 2.0 } else { 1.0 }),
                StandardFormat::Massey => (abmag_to_flambda(value, w), spectrograph.resolution_a(w)),
            };
            wavelength_a.push(w);
            flux.push(f);
            resolution.push(w / dw);
        }
        debug!(
            "Standard {name}: {} samples from {:.0} to {:.0} Å ({format})",
            wavelength_a.len(),
            wavelength_a[0],
            wavelength_a[wavelength_a.len() - 1]
        );
        Ok(Self {
            name: name.to_string(),
            format,
            wavelength_a,
            flux,
            resolution,
        })
    }

    /// Read a standard file; the file stem names the star.
    pub fn from_file<P: AsRef<Path>>(file: P, format: StandardFormat) -> anyhow::Result<Self> {
        let path = file.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to open standard file {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(&name, format, &data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> StandardFormat {
        self.format
    }

    pub fn wavelength_a(&self) -> &[f64] {
        &self.wavelength_a
    }

    /// Flux density in erg/cm²/s/Å at each tabulated wavelength.
    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    fn curve(&self, values: &[f64]) -> Result<TransmissionCurve, ConfigError> {
        TransmissionCurve::new(
            self.wavelength_a.iter().map(|w| w / 10.0).collect(),
            values.to_vec(),
        )
    }

    /// Flux density (erg/cm²/s/Å) on a wavenumber axis. Channels outside the
    /// tabulated range are zero.
    pub fn spectrum(&self, cm1_axis: &[f64]) -> Result<Vec<f64>, ConfigError> {
        let (lo, hi) = (self.wavelength_a[0] / 10.0, self.wavelength_a[self.wavelength_a.len() - 1] / 10.0);
        let uncovered = cm1_axis
            .iter()
            .filter(|&&s| !(lo..=hi).contains(&cm1_to_nm(s)))
            .count();
        if uncovered > 0 {
            warn!(
                "Standard {}: {uncovered} of {} channels outside [{lo:.1}, {hi:.1}] nm set to zero",
                self.name,
                cm1_axis.len()
            );
        }
        Ok(self.curve(&self.flux)?.project(cm1_axis))
    }

    /// Resolving power of the table on a wavenumber axis.
    pub fn resolution(&self, cm1_axis: &[f64]) -> Result<Vec<f64>, ConfigError> {
        Ok(self.curve(&self.resolution)?.project(cm1_axis))
    }

    /// Counts/s per channel the standard should produce through `model`,
    /// which carries the filter, camera selection, atmosphere and
    /// modulation losses of the observation.
    pub fn simulate_measured_flux(
        &self,
        model: &PhotometricModel,
        modulated: bool,
        eps: Option<f64>,
    ) -> Result<Vec<f64>, ConfigError> {
        let spectrum = self.spectrum(model.cm1_axis())?;
        model.flux_to_counts(&spectrum, modulated, eps)
    }
}
