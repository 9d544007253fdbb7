//! Iterative closest-point refinement of a coarse alignment.

use nalgebra::{Matrix2, Vector2};
use tracing::{debug, warn};

use super::{AlignmentTransform, RegistrationConfig, SourceIndex};
use crate::error::RegistrationError;
use crate::source::DetectedSource;

/// Scale factor from median absolute deviation to a Gaussian sigma.
const MAD_TO_SIGMA: f64 = 1.4826;

#[derive(Debug, Clone)]
pub(super) struct Refined {
    pub transform: AlignmentTransform,
    pub residual_px: f64,
    pub matches: Vec<(usize, usize)>,
    pub iterations: usize,
}

/// A tentative pairing of a camera-2 source with a camera-1 source.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Pair {
    cam2: usize,
    cam1: usize,
    d2: f64,
}

pub(super) fn refine(
    cam1: &[DetectedSource],
    index: &SourceIndex,
    cam2: &[DetectedSource],
    initial: AlignmentTransform,
    config: &RegistrationConfig,
) -> Result<Refined, RegistrationError> {
    let mut current = initial;
    let mut last_residual = f64::NAN;
    let mut last_matches = 0;

    for iteration in 1..=config.max_iterations {
        let pairs = match_sources(cam1, index, cam2, &current, config.match_tolerance_px);
        let inliers = clip_outliers(pairs, config.sigma_clip, config.min_matches);
        last_residual = rms(&inliers);
        last_matches = inliers.len();
        if inliers.len() < config.min_matches {
            return Err(RegistrationError::TooFewMatches {
                best: current,
                residual_px: last_residual,
                matches: inliers.len(),
                required: config.min_matches,
            });
        }

        let Some(next) = fit_transform(cam1, cam2, &inliers, &current, config.fit_scale) else {
            return Err(RegistrationError::TooFewMatches {
                best: current,
                residual_px: last_residual,
                matches: inliers.len(),
                required: config.min_matches.max(2),
            });
        };

        let delta = parameter_change(&current, &next);
        debug!(
            "ICP iteration {iteration}: {} inliers, rms {last_residual:.4} px, update {delta:.3e}",
            inliers.len()
        );
        current = next;

        if delta < config.epsilon {
            let residual_px = rms_under(cam1, cam2, &inliers, &current);
            return Ok(Refined {
                transform: current,
                residual_px,
                matches: inliers.iter().map(|p| (p.cam2, p.cam1)).collect(),
                iterations: iteration,
            });
        }
    }

    warn!(
        "ICP stopped after {} iterations without converging: {current}",
        config.max_iterations
    );
    Err(RegistrationError::NotConverged {
        best: current,
        residual_px: last_residual,
        matches: last_matches,
        iterations: config.max_iterations,
    })
}

/// Pair every camera-2 source with its closest camera-1 source within
/// `tolerance`, then keep at most one pair per camera-1 source.
///
/// Distance ties go to the brighter camera-1 source, then the lower index.
/// When several camera-2 sources claim the same camera-1 source the closest
/// wins, ties to the lower camera-2 index.
fn match_sources(
    cam1: &[DetectedSource],
    index: &SourceIndex,
    cam2: &[DetectedSource],
    t: &AlignmentTransform,
    tolerance: f64,
) -> Vec<Pair> {
    let mut pairs: Vec<Pair> = cam2
        .iter()
        .enumerate()
        .filter_map(|(i, s)| {
            let (x, y) = t.apply(s.x, s.y);
            index
                .within(x, y, tolerance)
                .into_iter()
                .min_by(|&(ja, da), &(jb, db)| {
                    da.total_cmp(&db)
                        .then(cam1[jb].flux.total_cmp(&cam1[ja].flux))
                        .then(ja.cmp(&jb))
                })
                .map(|(j, d2)| Pair {
                    cam2: i,
                    cam1: j,
                    d2,
                })
        })
        .collect();

    pairs.sort_by(|a, b| {
        a.cam1
            .cmp(&b.cam1)
            .then(a.d2.total_cmp(&b.d2))
            .then(a.cam2.cmp(&b.cam2))
    });
    pairs.dedup_by_key(|p| p.cam1);
    pairs.sort_by_key(|p| p.cam2);
    pairs
}

/// Drop pairs whose distance exceeds `median + k·σ_MAD`. The clip is skipped
/// for noiseless residuals and when it would leave fewer than `min_keep` pairs.
fn clip_outliers(pairs: Vec<Pair>, sigma_clip: f64, min_keep: usize) -> Vec<Pair> {
    if pairs.len() < 3 {
        return pairs;
    }
    let mut d: Vec<f64> = pairs.iter().map(|p| p.d2.sqrt()).collect();
    let med = median(&mut d);
    let mut dev: Vec<f64> = d.iter().map(|v| (v - med).abs()).collect();
    let sigma = MAD_TO_SIGMA * median(&mut dev);
    if sigma < 1e-12 {
        return pairs;
    }
    let limit = med + sigma_clip * sigma;
    let kept: Vec<Pair> = pairs.iter().copied().filter(|p| p.d2.sqrt() <= limit).collect();
    if kept.len() < min_keep {
        pairs
    } else {
        kept
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

fn rms(pairs: &[Pair]) -> f64 {
    if pairs.is_empty() {
        return f64::NAN;
    }
    (pairs.iter().map(|p| p.d2).sum::<f64>() / pairs.len() as f64).sqrt()
}

fn rms_under(
    cam1: &[DetectedSource],
    cam2: &[DetectedSource],
    pairs: &[Pair],
    t: &AlignmentTransform,
) -> f64 {
    if pairs.is_empty() {
        return f64::NAN;
    }
    let sum: f64 = pairs
        .iter()
        .map(|p| {
            let (x, y) = t.apply(cam2[p.cam2].x, cam2[p.cam2].y);
            (x - cam1[p.cam1].x).powi(2) + (y - cam1[p.cam1].y).powi(2)
        })
        .sum();
    (sum / pairs.len() as f64).sqrt()
}

/// Least-squares rotation (+ scale) and translation taking the matched
/// camera-2 positions onto camera 1, about `current.rotation_center`.
///
/// Returns `None` for degenerate configurations (fewer than two distinct
/// points).
fn fit_transform(
    cam1: &[DetectedSource],
    cam2: &[DetectedSource],
    pairs: &[Pair],
    current: &AlignmentTransform,
    fit_scale: bool,
) -> Option<AlignmentTransform> {
    if pairs.len() < 2 {
        return None;
    }
    let c = Vector2::new(current.rotation_center.0, current.rotation_center.1);
    let src: Vec<Vector2<f64>> = pairs
        .iter()
        .map(|p| Vector2::new(cam2[p.cam2].x, cam2[p.cam2].y) - c)
        .collect();
    let tgt: Vec<Vector2<f64>> = pairs
        .iter()
        .map(|p| Vector2::new(cam1[p.cam1].x, cam1[p.cam1].y) - c)
        .collect();
    let n = pairs.len() as f64;
    let src_mean = src.iter().sum::<Vector2<f64>>() / n;
    let tgt_mean = tgt.iter().sum::<Vector2<f64>>() / n;

    let mut h = Matrix2::zeros();
    let mut spread = 0.0;
    for (p, q) in src.iter().zip(&tgt) {
        let (pc, qc) = (p - src_mean, q - tgt_mean);
        h += pc * qc.transpose();
        spread += pc.norm_squared();
    }
    if spread <= f64::EPSILON {
        return None;
    }

    let svd = h.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r = v_t.transpose() * u.transpose();
    if r.determinant() < 0.0 {
        let flip = Matrix2::new(1.0, 0.0, 0.0, -1.0);
        r = v_t.transpose() * flip * u.transpose();
    }

    let scale = if fit_scale {
        let num: f64 = src
            .iter()
            .zip(&tgt)
            .map(|(p, q)| (q - tgt_mean).dot(&(r * (p - src_mean))))
            .sum();
        num / spread
    } else {
        1.0
    };
    let d = tgt_mean - scale * (r * src_mean);

    Some(AlignmentTransform {
        angle_deg: r[(1, 0)].atan2(r[(0, 0)]).to_degrees(),
        dx: d.x,
        dy: d.y,
        scale,
        rotation_center: current.rotation_center,
    })
}

/// Largest absolute change across the transform parameters.
fn parameter_change(a: &AlignmentTransform, b: &AlignmentTransform) -> f64 {
    (a.angle_deg - b.angle_deg)
        .abs()
        .max((a.dx - b.dx).abs())
        .max((a.dy - b.dy).abs())
        .max((a.scale - b.scale).abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_sources() -> Vec<DetectedSource> {
        (0..25)
            .map(|i| {
                DetectedSource::new(
                    100.0 + 180.0 * (i % 5) as f64 + 7.0 * (i / 5) as f64,
                    120.0 + 170.0 * (i / 5) as f64,
                    1000.0 - i as f64,
                )
            })
            .collect()
    }

    fn mapped(t: &AlignmentTransform, sources: &[DetectedSource]) -> Vec<DetectedSource> {
        sources
            .iter()
            .map(|s| {
                let (x, y) = t.apply(s.x, s.y);
                DetectedSource::new(x, y, s.flux)
            })
            .collect()
    }

    #[test]
    fn test_fit_recovers_known_transform() {
        let cam2 = grid_sources();
        let truth = AlignmentTransform::new(1.3, -4.0, 2.5, (512.0, 512.0));
        let cam1 = mapped(&truth, &cam2);
        let pairs: Vec<Pair> = (0..cam2.len())
            .map(|i| Pair {
                cam2: i,
                cam1: i,
                d2: 0.0,
            })
            .collect();
        let start = AlignmentTransform::identity((512.0, 512.0));
        let fit = fit_transform(&cam1, &cam2, &pairs, &start, false).unwrap();
        assert!((fit.angle_deg - 1.3).abs() < 1e-9);
        assert!((fit.dx + 4.0).abs() < 1e-9);
        assert!((fit.dy - 2.5).abs() < 1e-9);
        assert_eq!(fit.scale, 1.0);

        let scaled = AlignmentTransform {
            scale: 1.002,
            ..truth
        };
        let cam1 = mapped(&scaled, &cam2);
        let fit = fit_transform(&cam1, &cam2, &pairs, &start, true).unwrap();
        assert!((fit.scale - 1.002).abs() < 1e-9);
        assert!((fit.angle_deg - 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_fit() {
        let cam2 = vec![DetectedSource::new(1.0, 1.0, 1.0); 3];
        let pairs: Vec<Pair> = (0..3)
            .map(|i| Pair {
                cam2: i,
                cam1: i,
                d2: 0.0,
            })
            .collect();
        let start = AlignmentTransform::identity((0.0, 0.0));
        assert!(fit_transform(&cam2, &cam2, &pairs, &start, false).is_none());
    }

    #[test]
    fn test_match_ties_prefer_brighter_then_lower_index() {
        // Two camera-1 sources equidistant from the camera-2 source.
        let cam1 = vec![
            DetectedSource::new(9.0, 10.0, 5.0),
            DetectedSource::new(11.0, 10.0, 8.0),
            DetectedSource::new(10.0, 9.0, 8.0),
        ];
        let cam2 = vec![DetectedSource::new(10.0, 10.0, 1.0)];
        let index = SourceIndex::new(&cam1, 2.0);
        let t = AlignmentTransform::identity((0.0, 0.0));
        let pairs = match_sources(&cam1, &index, &cam2, &t, 1.5);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].cam1, 1);
    }

    #[test]
    fn test_matching_is_one_to_one() {
        let cam1 = vec![DetectedSource::new(10.0, 10.0, 1.0)];
        let cam2 = vec![
            DetectedSource::new(10.5, 10.0, 1.0),
            DetectedSource::new(10.25, 10.0, 1.0),
            DetectedSource::new(9.75, 10.0, 1.0),
        ];
        let index = SourceIndex::new(&cam1, 2.0);
        let t = AlignmentTransform::identity((0.0, 0.0));
        let pairs = match_sources(&cam1, &index, &cam2, &t, 1.5);
        // 1 and 2 tie at 0.25 px; the lower camera-2 index wins.
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].cam2, 1);
    }

    #[test]
    fn test_clip_drops_outlier() {
        let mut pairs: Vec<Pair> = (0..20)
            .map(|i| Pair {
                cam2: i,
                cam1: i,
                d2: (0.05 + 0.001 * i as f64).powi(2),
            })
            .collect();
        pairs.push(Pair {
            cam2: 20,
            cam1: 20,
            d2: 1.2f64.powi(2),
        });
        let kept = clip_outliers(pairs, 3.0, 4);
        assert_eq!(kept.len(), 20);
        assert!(kept.iter().all(|p| p.cam2 != 20));
    }

    #[test]
    fn test_refine_converges_from_nearby_start() {
        let cam2 = grid_sources();
        let truth = AlignmentTransform::new(-0.4, 3.0, -1.0, (512.0, 512.0));
        let cam1 = mapped(&truth, &cam2);
        let index = SourceIndex::new(&cam1, 1.5);
        let start = AlignmentTransform::new(-0.38, 2.7, -0.8, (512.0, 512.0));
        let config = RegistrationConfig::default();
        let refined = refine(&cam1, &index, &cam2, start, &config).unwrap();
        assert_eq!(refined.matches.len(), 25);
        assert!((refined.transform.angle_deg + 0.4).abs() < 1e-8);
        assert!((refined.transform.dx - 3.0).abs() < 1e-6);
        assert!(refined.residual_px < 1e-6);
    }

    #[test]
    fn test_too_few_matches_reports_best() {
        let cam2 = grid_sources();
        let cam1 = mapped(&AlignmentTransform::new(0.0, 50.0, 50.0, (0.0, 0.0)), &cam2);
        let index = SourceIndex::new(&cam1, 1.5);
        let start = AlignmentTransform::identity((0.0, 0.0));
        let err = refine(&cam1, &index, &cam2, start, &RegistrationConfig::default()).unwrap_err();
        match err {
            RegistrationError::TooFewMatches { best, required, .. } => {
                assert_eq!(best, start);
                assert_eq!(required, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
