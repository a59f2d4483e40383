use super::*;
use crate::error::ErrorKind;
use crate::testing::{block_positions, gray, noise, reference_scene, shifted, textured_scene};

fn extractor() -> FeatureExtractor {
    FeatureExtractor::new(FeatureConfig::default()).unwrap()
}

#[test]
fn test_uniform_image_has_no_features() {
    let img = gray(Buffer2::new_filled(64, 48, 0.5));
    let set = extractor().extract(&img).unwrap();
    assert!(set.is_empty());
    assert_eq!(set.dimensions(), ImageDimensions::new(64, 48, 1));
}

#[test]
fn test_tiny_image_yields_empty_set() {
    let img = gray(noise(12, 12, 3));
    assert!(extractor().extract(&img).unwrap().is_empty());
}

#[test]
fn test_positions_within_bounds() {
    for (w, h, seed) in [(100, 100, 1), (73, 41, 2), (160, 90, 3)] {
        let img = gray(noise(w, h, seed));
        let set = extractor().extract(&img).unwrap();
        assert!(!set.is_empty());
        for f in set.features() {
            assert!(f.position.x >= 0.0 && f.position.x < w as f64, "{:?}", f.position);
            assert!(f.position.y >= 0.0 && f.position.y < h as f64, "{:?}", f.position);
        }
    }
}

#[test]
fn test_descriptors_are_unit_norm_and_fixed_length() {
    let set = extractor().extract(&gray(reference_scene())).unwrap();
    assert!(set.len() >= 10);
    for i in 0..set.len() {
        let d = set.descriptor(i);
        assert_eq!(d.len(), 81);
        let norm: f32 = d.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!(d.iter().sum::<f32>().abs() < 1e-3);
    }
}

#[test]
fn test_min_distance_and_max_features() {
    let config = FeatureConfig {
        max_features: 25,
        min_distance: 8.0,
        ..FeatureConfig::default()
    };
    let set = FeatureExtractor::new(config).unwrap().extract(&gray(noise(120, 120, 9))).unwrap();
    assert!(set.len() <= 25);
    let pts = set.positions();
    for i in 0..pts.len() {
        for j in i + 1..pts.len() {
            // Integer positions were at least 8 apart; refinement moves each by <= 0.5 px per axis.
            assert!((pts[i] - pts[j]).length() > 8.0 - 1.5);
        }
    }
    // Strongest first.
    assert!(set.features().windows(2).all(|w| w[0].strength >= w[1].strength));
}

#[test]
fn test_features_follow_integer_shift() {
    let scene = reference_scene();
    let moved = shifted(&scene, 5, 0, 0.5);
    let a = extractor().extract(&gray(scene)).unwrap();
    let b = extractor().extract(&gray(moved)).unwrap();

    let mut found = 0;
    for (i, fa) in a.features().iter().enumerate() {
        let target = fa.position + DVec2::new(5.0, 0.0);
        if let Some(j) = b.features().iter().position(|fb| (fb.position - target).length() < 1e-6) {
            assert!(descriptor_distance(a.descriptor(i), b.descriptor(j)) < 1e-5);
            found += 1;
        }
    }
    assert!(found >= 10, "only {found} features reproduced");
}

#[test]
fn test_descriptor_invariant_to_gain_and_offset() {
    let positions = block_positions(80, 80, 4, 7, 20);
    let scene = textured_scene(80, 80, 0.5, &positions, 7, 11);
    let darker = scene.map(|&v| 0.4 * v + 0.05);

    let config = FeatureConfig {
        min_response: 0.0,
        ..FeatureConfig::default()
    };
    let extractor = FeatureExtractor::new(config).unwrap();
    let a = extractor.extract(&gray(scene)).unwrap();
    let b = extractor.extract(&gray(darker)).unwrap();
    assert!(!b.is_empty());

    let mut matched = 0;
    for (j, fb) in b.features().iter().enumerate() {
        let found = a
            .features()
            .iter()
            .position(|fa| (fa.position - fb.position).length() < 1e-3);
        if let Some(i) = found {
            assert!(descriptor_distance(a.descriptor(i), b.descriptor(j)) < 1e-3);
            matched += 1;
        }
    }
    assert!(matched * 10 >= b.len() * 9, "{matched} of {}", b.len());
}

#[test]
fn test_rgb_uses_luminance() {
    let scene = reference_scene();
    let rgb = crate::testing::rgb(&scene, [1.0, 1.0, 1.0]);
    let a = extractor().extract(&gray(scene)).unwrap();
    let b = extractor().extract(&rgb).unwrap();
    assert!(b.len() >= 10);
    let strongest = b.features()[0].position;
    assert!(a.features().iter().any(|f| (f.position - strongest).length() < 1e-3));
}

#[test]
fn test_extraction_is_deterministic() {
    let img = gray(noise(90, 70, 5));
    let a = extractor().extract(&img).unwrap();
    let b = extractor().extract(&img).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_invalid_config_rejected() {
    let err = FeatureExtractor::new(FeatureConfig {
        max_features: 0,
        ..FeatureConfig::default()
    })
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstructionFailure);
}
