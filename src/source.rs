//! Point sources detected on a camera's deep frame.
//!
//! Detection and PSF fitting happen outside this crate; the registration
//! engine only consumes the resulting source lists.

use std::path::Path;

use anyhow::Context;

/// One detected point source, in unbinned detector pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedSource {
    /// Centroid along the detector x axis (first cube axis), pixels.
    pub x: f64,
    /// Centroid along the detector y axis (second cube axis), pixels.
    pub y: f64,
    /// Integrated flux, arbitrary units. Brighter = higher.
    pub flux: f64,
    /// PSF full width at half maximum, pixels.
    pub fwhm: f64,
    /// Residual of the PSF fit.
    pub fit_residual: f64,
}

impl DetectedSource {
    /// Source with only a position and flux known.
    pub fn new(x: f64, y: f64, flux: f64) -> Self {
        Self {
            x,
            y,
            flux,
            fwhm: f64::NAN,
            fit_residual: f64::NAN,
        }
    }
}

/// Read a source list written by the detection step.
///
/// Columns: `x, y, flux[, fwhm[, fit_residual]]` with a header row. Missing
/// or empty optional cells read as NaN. Any other cell that does not parse
/// rejects the list with its line number.
pub fn read_sources_csv<P: AsRef<Path>>(file: P) -> anyhow::Result<Vec<DetectedSource>> {
    let path = file.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open source list {}", path.display()))?;
    rdr.records()
        .enumerate()
        .map(|(row, result)| -> anyhow::Result<DetectedSource> {
            let record = result?;
            let field = |i: usize| -> anyhow::Result<f64> {
                record
                    .get(i)
                    .unwrap_or("")
                    .parse::<f64>()
                    .with_context(|| format!("{}: row {}, column {}", path.display(), row + 2, i + 1))
            };
            let optional = |i: usize| -> anyhow::Result<f64> {
                match record.get(i) {
                    Some(s) if !s.is_empty() => field(i),
                    _ => Ok(f64::NAN),
                }
            };
            Ok(DetectedSource {
                x: field(0)?,
                y: field(1)?,
                flux: field(2)?,
                fwhm: optional(3)?,
                fit_residual: optional(4)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_sources_csv() {
        let path = std::env::temp_dir().join(format!("ifts_sources_{}.csv", std::process::id()));
        std::fs::write(
            &path,
            "x,y,flux,fwhm,fit_residual\n10.5, 20.25, 1000, 3.1, 0.02\n100,200,50\n",
        )
        .unwrap();
        let sources = read_sources_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].x, 10.5);
        assert_eq!(sources[0].fwhm, 3.1);
        assert_eq!(sources[1].flux, 50.0);
        assert!(sources[1].fwhm.is_nan());
    }

    #[test]
    fn test_bad_row_reports_location() {
        let path = std::env::temp_dir().join(format!("ifts_sources_bad_{}.csv", std::process::id()));
        std::fs::write(&path, "x,y,flux\n1,2,3\n4,oops,6\n").unwrap();
        let err = read_sources_csv(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(format!("{err:#}").contains("row 3"), "{err:#}");
    }

    #[test]
    fn test_bad_optional_cell_rejected() {
        let path = std::env::temp_dir().join(format!("ifts_sources_fwhm_{}.csv", std::process::id()));
        std::fs::write(&path, "x,y,flux,fwhm\n1,2,3,\n4,5,6,wide\n").unwrap();
        let err = read_sources_csv(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        let msg = format!("{err:#}");
        assert!(msg.contains("row 3") && msg.contains("column 4"), "{msg}");
    }
}
