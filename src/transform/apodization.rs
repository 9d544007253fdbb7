//! Apodization windows applied around the zero path difference.
//!
//! Windows are evaluated on the normalized distance `u = (i - zpd) / L`,
//! where `L` is one sample beyond the farthest sample from the ZPD, so that
//! `|u| < 1` over the whole interferogram.
//!
//! The Norton–Beer functions are `Σ cᵢ (1 - u²)ⁱ` with the published
//! weak / medium / strong coefficient sets (FWHM broadening 1.2 / 1.4 / 1.6).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Norton–Beer weak coefficients, powers 0..=2.
const NB_WEAK: [f64; 3] = [0.384093, -0.087577, 0.703484];
/// Norton–Beer medium coefficients, powers 0..=2.
const NB_MEDIUM: [f64; 3] = [0.152442, -0.136176, 0.983734];
/// Norton–Beer strong coefficients, powers 0..=4.
const NB_STRONG: [f64; 5] = [0.045335, 0.0, 0.554883, 0.0, 0.399782];

/// Apodization function. The default is Norton–Beer medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Apodization {
    /// No apodization (unit window).
    Boxcar,
    Hann,
    NortonBeerWeak,
    #[default]
    NortonBeerMedium,
    NortonBeerStrong,
}

impl Apodization {
    /// Window value at normalized distance `u` from the ZPD. Zero for `|u| ≥ 1`.
    pub fn value(self, u: f64) -> f64 {
        let u = u.abs();
        if u >= 1.0 {
            return match self {
                Apodization::Boxcar => 1.0,
                _ => 0.0,
            };
        }
        match self {
            Apodization::Boxcar => 1.0,
            Apodization::Hann => 0.5 * (1.0 + (std::f64::consts::PI * u).cos()),
            Apodization::NortonBeerWeak => norton_beer(&NB_WEAK, u),
            Apodization::NortonBeerMedium => norton_beer(&NB_MEDIUM, u),
            Apodization::NortonBeerStrong => norton_beer(&NB_STRONG, u),
        }
    }

    /// Window for `n` samples centered on `zpd`.
    pub fn window(self, n: usize, zpd: usize) -> Vec<f64> {
        let half = zpd.max(n.saturating_sub(1).saturating_sub(zpd)) as f64 + 1.0;
        (0..n)
            .map(|i| self.value((i as f64 - zpd as f64) / half))
            .collect()
    }

    /// Nominal FWHM broadening of the instrument line shape relative to boxcar.
    pub fn broadening(self) -> f64 {
        match self {
            Apodization::Boxcar => 1.0,
            Apodization::Hann => 1.5,
            Apodization::NortonBeerWeak => 1.2,
            Apodization::NortonBeerMedium => 1.4,
            Apodization::NortonBeerStrong => 1.6,
        }
    }
}

fn norton_beer(coeffs: &[f64], u: f64) -> f64 {
    let q = 1.0 - u * u;
    // Horner on powers of q
    coeffs.iter().rev().fold(0.0, |acc, c| acc * q + c)
}

/// Unrecognised apodization name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "unknown apodization {0:?} (expected boxcar, hann, nb-weak, nb-medium, nb-strong or 1.0/1.2/1.4/1.6)"
)]
pub struct ParseApodizationError(String);

impl FromStr for Apodization {
    type Err = ParseApodizationError;

    /// Accepts names or broadening factors.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        match key.as_str() {
            "boxcar" | "none" | "1.0" | "1" => Ok(Apodization::Boxcar),
            "hann" | "hanning" => Ok(Apodization::Hann),
            "nb-weak" | "norton-beer-weak" | "1.2" => Ok(Apodization::NortonBeerWeak),
            "nb-medium" | "norton-beer-medium" | "1.4" => Ok(Apodization::NortonBeerMedium),
            "nb-strong" | "norton-beer-strong" | "1.6" => Ok(Apodization::NortonBeerStrong),
            _ => Err(ParseApodizationError(s.to_string())),
        }
    }
}

impl fmt::Display for Apodization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Apodization::Boxcar => "boxcar",
            Apodization::Hann => "hann",
            Apodization::NortonBeerWeak => "nb-weak",
            Apodization::NortonBeerMedium => "nb-medium",
            Apodization::NortonBeerStrong => "nb-strong",
        };
        f.write_str(name)
    }
}
