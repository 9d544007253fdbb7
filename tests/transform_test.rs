//! Integration tests: synthetic SITELLE-like interferograms through the
//! transform, checking the wavenumber calibration and the kernel's
//! determinism across block variants.

use std::f64::consts::TAU;

use ifts::{
    CalibrationGeometry, DetectorSize, Interferogram, InterferogramTransformer, QualityFlags,
    TransformConfig,
};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

fn sitelle() -> CalibrationGeometry {
    CalibrationGeometry::new(
        543.5,
        11,
        3255.231,
        DetectorSize::new(2048, 2064),
        DetectorSize::new(2048, 2064),
    )
    .unwrap()
}

/// Monochromatic line at `sigma_cm1`, ZPD at `zpd`.
fn line(geom: &CalibrationGeometry, sigma_cm1: f64, n: usize, zpd: usize) -> Vec<f64> {
    let step_cm = geom.step_size_nm() * 1e-7;
    (0..n)
        .map(|i| 500.0 + 200.0 * (TAU * sigma_cm1 * (i as f64 - zpd as f64) * step_cm).cos())
        .collect()
}

fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap()
}

#[test]
fn test_axis_is_monotonic_below_nyquist() {
    let geom = sitelle();
    let t = InterferogramTransformer::new(&geom, 300, TransformConfig::default()).unwrap();
    for coeff in [1.0, 1.0 / (15.5f64).to_radians().cos()] {
        let axis = t.wavenumber_axis(coeff);
        assert_eq!(axis.len(), t.n_channels());
        assert!(axis.windows(2).all(|w| w[1] > w[0]));
        assert!(*axis.last().unwrap() < geom.nyquist_wavenumber_cm1(coeff));
        let (fsr_min, _) = geom.free_spectral_range_cm1();
        assert!((axis[0] - fsr_min * coeff).abs() < 1e-9);
    }
}

/// A line anywhere in the free spectral range peaks within one channel of
/// its wavenumber.
#[test]
fn test_single_line_recovered_within_one_channel() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let geom = sitelle();
    let n = 347;
    let zpd = 61;
    let t = InterferogramTransformer::new(
        &geom,
        n,
        TransformConfig {
            zpd_index: Some(zpd),
            ..Default::default()
        },
    )
    .unwrap();

    let mut rng = StdRng::seed_from_u64(20);
    let (fsr_min, fsr_max) = geom.free_spectral_range_cm1();
    let margin = 0.02 * (fsr_max - fsr_min);
    for _ in 0..25 {
        let sigma = rng.random_range(fsr_min + margin..fsr_max - margin);
        let igm = line(&geom, sigma, n, zpd);
        let spectrum = t.transform(&Interferogram::from_slice(&igm, 0, 0)).unwrap();
        let expected = geom.channel_of(sigma, t.n_channels(), 1.0).unwrap();
        let peak = argmax(&spectrum.values) as f64;
        assert!(
            (peak - expected).abs() <= 1.0,
            "line at {sigma:.2} cm-1: peak channel {peak}, expected {expected:.2}"
        );
    }
}

/// The laser line itself lands on its own wavenumber.
#[test]
fn test_laser_line_calibration() {
    let geom = sitelle();
    let n = 512;
    let t = InterferogramTransformer::new(
        &geom,
        n,
        TransformConfig {
            zpd_index: Some(0),
            ..Default::default()
        },
    )
    .unwrap();
    let laser = geom.laser_wavenumber_cm1();
    let igm = line(&geom, laser, n, 0);
    let spectrum = t.transform(&Interferogram::from_slice(&igm, 0, 0)).unwrap();
    let axis = spectrum.wavenumber_axis(&geom);
    let peak = argmax(&spectrum.values);
    let width = axis[1] - axis[0];
    assert!((axis[peak] - laser).abs() <= width);
}

#[test]
fn test_transform_is_idempotent() {
    let geom = sitelle();
    let n = 200;
    let mut rng = StdRng::seed_from_u64(3);
    let noise = Normal::new(0.0, 5.0).unwrap();
    let igm: Vec<f64> = line(&geom, 17650.0, n, 40)
        .into_iter()
        .map(|v| v + noise.sample(&mut rng))
        .collect();

    let t = InterferogramTransformer::new(&geom, n, TransformConfig::default()).unwrap();
    let input = Interferogram::from_slice(&igm, 3, 4);
    let first = t.transform(&input).unwrap();
    let second = t.transform(&input).unwrap();
    for (a, b) in first.values.iter().zip(&second.values) {
        assert!((a - b).abs() <= 1e-12);
    }
    // The input is untouched.
    assert_eq!(input.samples().to_vec(), igm);
}

#[test]
fn test_streaming_matches_in_core() {
    let geom = sitelle();
    let (w, h, n) = (9, 7, 150);
    let mut rng = StdRng::seed_from_u64(11);
    let noise = Normal::new(0.0, 2.0).unwrap();
    let mut data = Array3::<f64>::zeros((w, h, n));
    for x in 0..w {
        for y in 0..h {
            let sigma = 17000.0 + 30.0 * (x * h + y) as f64;
            for (z, v) in line(&geom, sigma, n, 30).into_iter().enumerate() {
                data[[x, y, z]] = v + noise.sample(&mut rng);
            }
        }
    }
    data[[2, 2, 10]] = f64::NAN;
    data.slice_mut(ndarray::s![4, 4, ..]).fill(f64::NAN);
    data[[8, 6, 30]] = 70000.0;

    let in_core = InterferogramTransformer::new(&geom, n, TransformConfig::default())
        .unwrap()
        .transform_block(data.view(), (100, 200))
        .unwrap();
    let streaming = InterferogramTransformer::new(
        &geom,
        n,
        TransformConfig {
            streaming: true,
            ..Default::default()
        },
    )
    .unwrap()
    .transform_block(data.view(), (100, 200))
    .unwrap();

    assert_eq!(in_core.block.data, streaming.block.data);
    assert_eq!(in_core.block.flags, streaming.block.flags);
    assert_eq!(in_core.saturated_pixels, 1);
    assert!(in_core.block.flags[[8, 6]].contains(QualityFlags::SATURATED));
    assert!(in_core.block.flags[[4, 4]].contains(QualityFlags::NO_DATA));
    assert!(in_core.block.flags[[2, 2]].is_empty());
}
