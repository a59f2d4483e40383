use std::f64::consts::PI;

use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::*;
use crate::error::ErrorKind;

fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
    (a - b).abs() < eps
}

fn grid(n: usize, spacing: f64, origin: f64) -> Vec<DVec2> {
    (0..n * n)
        .map(|i| DVec2::new(origin + (i % n) as f64 * spacing, origin + (i / n) as f64 * spacing))
        .collect()
}

fn mapped(points: &[DVec2], t: &Transform) -> Vec<DVec2> {
    points.iter().map(|&p| t.apply(p)).collect()
}

fn assert_maps(estimated: &Transform, src: &[DVec2], dst: &[DVec2], eps: f64) {
    for (s, d) in src.iter().zip(dst) {
        let p = estimated.apply(*s);
        assert!((p - *d).length() < eps, "{p:?} vs {d:?}");
    }
}

#[test]
fn test_fit_translation() {
    let src = grid(2, 10.0, 0.0);
    let dst = mapped(&src, &Transform::translation(DVec2::new(5.0, -3.0)));
    let t = estimate_transform(&src, &dst, TransformType::Translation).unwrap();
    let shift = t.translation_components();
    assert!(approx_eq(shift.x, 5.0, 1e-9));
    assert!(approx_eq(shift.y, -3.0, 1e-9));
}

#[test]
fn test_fit_similarity() {
    let src = grid(3, 10.0, 0.0);
    let known = Transform::similarity(DVec2::new(20.0, -10.0), PI / 6.0, 1.5);
    let dst = mapped(&src, &known);

    let t = estimate_transform(&src, &dst, TransformType::Similarity).unwrap();
    assert!(approx_eq(t.rotation_angle(), PI / 6.0, 1e-9));
    assert!(approx_eq(t.scale_factor(), 1.5, 1e-9));
    assert_maps(&t, &src, &dst, 1e-8);
}

#[test]
fn test_fit_euclidean_keeps_unit_scale() {
    let src = grid(3, 10.0, 0.0);
    let known = Transform::similarity(DVec2::new(2.0, 1.0), 0.1, 1.2);
    let dst = mapped(&src, &known);
    let t = estimate_transform(&src, &dst, TransformType::Euclidean).unwrap();
    assert_eq!(t.transform_type, TransformType::Euclidean);
    assert!(approx_eq(t.scale_factor(), 1.0, 1e-9));
    assert!(approx_eq(t.rotation_angle(), 0.1, 1e-9));
}

#[test]
fn test_fit_affine_with_shear() {
    let src = grid(3, 10.0, 0.0);
    let known = Transform::affine([1.2, 0.3, 5.0, -0.1, 0.9, -3.0]);
    let dst = mapped(&src, &known);
    let t = estimate_transform(&src, &dst, TransformType::Affine).unwrap();
    assert_maps(&t, &src, &dst, 1e-8);
}

#[test]
fn test_fit_homography() {
    let src = grid(4, 30.0, 0.0);
    let known = Transform::homography([1.02, 0.05, 4.0, -0.03, 0.98, 7.0, 2e-4, -1e-4]);
    let dst = mapped(&src, &known);
    let t = estimate_transform(&src, &dst, TransformType::Homography).unwrap();
    assert_eq!(t.transform_type, TransformType::Homography);
    assert_maps(&t, &src, &dst, 1e-6);
    assert!(approx_eq(t.at(2, 2), 1.0, 1e-12));
}

#[test]
fn test_fit_rejects_collinear_points() {
    let src: Vec<DVec2> = (0..5).map(|i| DVec2::new(i as f64, 2.0 * i as f64)).collect();
    let dst = src.clone();
    assert!(estimate_transform(&src, &dst, TransformType::Affine).is_none());
    assert!(estimate_transform(&src[..2], &dst[..2], TransformType::Homography).is_none());
}

#[test]
fn test_degenerate_sample_detection() {
    let collinear = [DVec2::ZERO, DVec2::new(5.0, 5.0), DVec2::new(10.0, 10.0)];
    let spread = [DVec2::ZERO, DVec2::new(10.0, 0.0), DVec2::new(0.0, 10.0)];
    let coincident = [DVec2::ZERO, DVec2::new(0.2, 0.1)];
    assert!(fit::is_degenerate_sample(&collinear, TransformType::Affine));
    assert!(!fit::is_degenerate_sample(&collinear, TransformType::Similarity));
    assert!(!fit::is_degenerate_sample(&spread, TransformType::Affine));
    assert!(fit::is_degenerate_sample(&coincident, TransformType::Euclidean));
}

#[test]
fn test_recovers_affine_with_outliers() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let known = Transform::affine([1.03, 0.02, 6.0, -0.01, 0.98, -4.0]);
    let mut src = grid(8, 20.0, 10.0);
    let mut dst = mapped(&src, &known);
    for _ in 0..30 {
        src.push(DVec2::new(rng.random_range(0.0..160.0), rng.random_range(0.0..160.0)));
        dst.push(DVec2::new(rng.random_range(0.0..160.0), rng.random_range(0.0..160.0)));
    }

    let estimate = RansacEstimator::default()
        .estimate_points(&src, &dst, TransformType::Affine, None)
        .unwrap();
    assert!(estimate.inlier_count() >= 64);
    assert!((0..64).all(|i| estimate.inliers.contains(&i)));
    assert!(estimate.rms_error < 1e-6);
    assert_maps(&estimate.transform, &src[..64], &dst[..64], 1e-6);
}

#[test]
fn test_recovers_noisy_translation() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let src = grid(6, 15.0, 5.0);
    let dst: Vec<DVec2> = src
        .iter()
        .map(|&p| {
            p + DVec2::new(
                12.0 + rng.random_range(-0.3..0.3),
                -7.0 + rng.random_range(-0.3..0.3),
            )
        })
        .collect();

    let estimate = RansacEstimator::default()
        .estimate_points(&src, &dst, TransformType::Translation, None)
        .unwrap();
    assert_eq!(estimate.inlier_count(), src.len());
    let shift = estimate.transform.translation_components();
    assert!(approx_eq(shift.x, 12.0, 0.15));
    assert!(approx_eq(shift.y, -7.0, 0.15));
    assert!(estimate.rms_error < 0.5);
}

#[test]
fn test_insufficient_correspondences() {
    let src = [DVec2::ZERO, DVec2::new(10.0, 0.0)];
    let err = RansacEstimator::default()
        .estimate_points(&src, &src, TransformType::Affine, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientCorrespondences);
    assert!(matches!(
        err,
        Error::InsufficientCorrespondences { found: 2, required: 3 }
    ));
}

#[test]
fn test_low_inlier_ratio_rejected() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let known = Transform::translation(DVec2::new(3.0, 4.0));
    let mut src = grid(3, 25.0, 20.0);
    let mut dst = mapped(&src, &known);
    for _ in 0..40 {
        src.push(DVec2::new(rng.random_range(0.0..200.0), rng.random_range(0.0..200.0)));
        dst.push(DVec2::new(rng.random_range(0.0..200.0), rng.random_range(0.0..200.0)));
    }

    let err = RansacEstimator::default()
        .estimate_points(&src, &dst, TransformType::Similarity, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlignmentRejected);
    assert!(
        matches!(err, Error::AlignmentRejected(RejectionReason::LowInlierRatio { .. })),
        "{err}"
    );
}

#[test]
fn test_affine_needs_two_inliers_per_degree_of_freedom() {
    // 9 exact correspondences would satisfy `min_inliers` alone.
    let src = grid(3, 40.0, 20.0);
    let dst = mapped(&src, &Transform::affine([1.01, 0.02, 3.0, -0.01, 0.99, 2.0]));
    let err = RansacEstimator::default()
        .estimate_points(&src, &dst, TransformType::Affine, None)
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::AlignmentRejected(RejectionReason::TooFewInliers { inliers: 9, required: 12 })
        ),
        "{err}"
    );
}

#[test]
fn test_clustered_inliers_rejected() {
    let known = Transform::translation(DVec2::new(6.0, -2.0));
    let dims = ImageDimensions::new(200, 200, 1);
    let clustered = grid(4, 3.0, 90.0);
    let err = RansacEstimator::default()
        .estimate_points(
            &clustered,
            &mapped(&clustered, &known),
            TransformType::Translation,
            Some(dims),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlignmentRejected);
    assert!(
        matches!(err, Error::AlignmentRejected(RejectionReason::ClusteredInliers { .. })),
        "{err}"
    );

    // The same count spread over the frame is accepted.
    let spread = grid(4, 50.0, 20.0);
    let estimate = RansacEstimator::default()
        .estimate_points(
            &spread,
            &mapped(&spread, &known),
            TransformType::Translation,
            Some(dims),
        )
        .unwrap();
    assert_eq!(estimate.inlier_count(), 16);
}

#[test]
fn test_mirrored_points_have_no_plausible_model() {
    let src = grid(4, 20.0, 10.0);
    let dst: Vec<DVec2> = src.iter().map(|p| DVec2::new(200.0 - p.x, p.y)).collect();
    let err = RansacEstimator::default()
        .estimate_points(&src, &dst, TransformType::Affine, None)
        .unwrap_err();
    assert!(
        matches!(err, Error::AlignmentRejected(RejectionReason::NoPlausibleModel { .. })),
        "{err}"
    );
}

#[test]
fn test_seeded_estimation_is_deterministic() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let known = Transform::similarity(DVec2::new(4.0, 2.0), 0.05, 1.01);
    let mut src = grid(6, 20.0, 10.0);
    let mut dst: Vec<DVec2> = mapped(&src, &known)
        .into_iter()
        .map(|p| p + DVec2::new(rng.random_range(-0.5..0.5), rng.random_range(-0.5..0.5)))
        .collect();
    for _ in 0..15 {
        src.push(DVec2::new(rng.random_range(0.0..120.0), rng.random_range(0.0..120.0)));
        dst.push(DVec2::new(rng.random_range(0.0..120.0), rng.random_range(0.0..120.0)));
    }

    let estimator = RansacEstimator::new(RansacConfig::default());
    let a = estimator.estimate_points(&src, &dst, TransformType::Affine, None).unwrap();
    let b = estimator.estimate_points(&src, &dst, TransformType::Affine, None).unwrap();
    assert_eq!(a.transform, b.transform);
    assert_eq!(a.inliers, b.inliers);
    assert_eq!(a.iterations, b.iterations);
}

#[test]
fn test_adaptive_iterations() {
    assert_eq!(adaptive_iterations(1.0, 3, 0.999), 1);
    assert_eq!(adaptive_iterations(0.0, 3, 0.999), usize::MAX);
    let half = adaptive_iterations(0.5, 3, 0.99);
    // ln(0.01) / ln(1 - 0.125) = 34.5
    assert_eq!(half, 35);
    assert!(adaptive_iterations(0.3, 4, 0.99) > half);
}

#[test]
fn test_random_sample_is_distinct() {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut buffer = Vec::new();
    for _ in 0..200 {
        random_sample_into(&mut rng, 6, 4, &mut buffer);
        assert_eq!(buffer.len(), 4);
        let mut sorted = buffer.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 4);
        assert!(buffer.iter().all(|&i| i < 6));
    }
}
