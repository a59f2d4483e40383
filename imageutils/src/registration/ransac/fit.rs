//! Closed-form least-squares fits from point correspondences.
//!
//! Every fit maps `src` points onto `dst` points and returns `None` when the
//! configuration is degenerate for the requested model.

use glam::DVec2;
use nalgebra::{DMatrix, SVD};

use crate::registration::transform::{Transform, TransformType};

pub fn estimate_transform(src: &[DVec2], dst: &[DVec2], model: TransformType) -> Option<Transform> {
    if src.len() != dst.len() || src.len() < model.min_points() {
        return None;
    }
    let transform = match model {
        TransformType::Translation => fit_translation(src, dst),
        TransformType::Euclidean => fit_rotation(src, dst, false),
        TransformType::Similarity => fit_rotation(src, dst, true),
        TransformType::Affine => fit_affine(src, dst),
        TransformType::Homography => fit_homography(src, dst),
    }?;
    transform.is_valid().then_some(transform)
}

pub(crate) fn centroid(points: &[DVec2]) -> DVec2 {
    if points.is_empty() {
        return DVec2::ZERO;
    }
    points.iter().copied().sum::<DVec2>() / points.len() as f64
}

fn fit_translation(src: &[DVec2], dst: &[DVec2]) -> Option<Transform> {
    Some(Transform::translation(centroid(dst) - centroid(src)))
}

/// Procrustes fit of rotation (and uniform scale when `with_scale`).
fn fit_rotation(src: &[DVec2], dst: &[DVec2], with_scale: bool) -> Option<Transform> {
    let cs = centroid(src);
    let cd = centroid(dst);

    let (mut sxx, mut sxy, mut syx, mut syy, mut var) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (s, d) in src.iter().zip(dst) {
        let s = *s - cs;
        let d = *d - cd;
        sxx += s.x * d.x;
        sxy += s.x * d.y;
        syx += s.y * d.x;
        syy += s.y * d.y;
        var += s.length_squared();
    }
    if var < 1e-10 {
        return None;
    }

    let angle = (sxy - syx).atan2(sxx + syy);
    let (sin, cos) = angle.sin_cos();
    let scale = if with_scale {
        ((sxx + syy) * cos + (sxy - syx) * sin) / var
    } else {
        1.0
    };
    if scale <= 0.0 {
        return None;
    }

    let t = cd - scale * DVec2::new(cos * cs.x - sin * cs.y, sin * cs.x + cos * cs.y);
    Some(if with_scale {
        Transform::similarity(t, angle, scale)
    } else {
        Transform::euclidean(t, angle)
    })
}

/// Normal equations on centred coordinates; the 2x2 system is shared by both
/// output rows.
fn fit_affine(src: &[DVec2], dst: &[DVec2]) -> Option<Transform> {
    let cs = centroid(src);
    let cd = centroid(dst);

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    let (mut ux, mut uy, mut vx, mut vy) = (0.0, 0.0, 0.0, 0.0);
    for (s, d) in src.iter().zip(dst) {
        let s = *s - cs;
        let d = *d - cd;
        sxx += s.x * s.x;
        sxy += s.x * s.y;
        syy += s.y * s.y;
        ux += s.x * d.x;
        uy += s.y * d.x;
        vx += s.x * d.y;
        vy += s.y * d.y;
    }

    let det = sxx * syy - sxy * sxy;
    let scale = (sxx + syy).max(1e-300);
    if det.abs() < 1e-10 * scale * scale {
        return None;
    }
    let inv = 1.0 / det;
    let a = (syy * ux - sxy * uy) * inv;
    let b = (sxx * uy - sxy * ux) * inv;
    let c = (syy * vx - sxy * vy) * inv;
    let d = (sxx * vy - sxy * vx) * inv;

    let tx = cd.x - a * cs.x - b * cs.y;
    let ty = cd.y - c * cs.x - d * cs.y;
    Some(Transform::affine([a, b, tx, c, d, ty]))
}

/// Normalized direct linear transform.
fn fit_homography(src: &[DVec2], dst: &[DVec2]) -> Option<Transform> {
    let (src_n, src_t) = normalize_points(src)?;
    let (dst_n, dst_t) = normalize_points(dst)?;

    let n = src_n.len();
    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (s, d)) in src_n.iter().zip(&dst_n).enumerate() {
        let r = 2 * i;
        let row0 = [-s.x, -s.y, -1.0, 0.0, 0.0, 0.0, s.x * d.x, s.y * d.x, d.x];
        let row1 = [0.0, 0.0, 0.0, -s.x, -s.y, -1.0, s.x * d.y, s.y * d.y, d.y];
        for c in 0..9 {
            a[(r, c)] = row0[c];
            a[(r + 1, c)] = row1[c];
        }
    }

    let svd = SVD::new(a, false, true);
    let v_t = svd.v_t?;
    // Null-space direction: right singular vector of the smallest singular value.
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))?;
    let h: Vec<f64> = v_t.row(min_idx).iter().copied().collect();
    let h_norm = Transform::from_rows(
        [h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]],
        TransformType::Homography,
    );

    let denorm = dst_t.inverse()?.compose(&h_norm).compose(&src_t);
    let rows = denorm.to_rows();
    let w = rows[8];
    if w.abs() < 1e-12 {
        return None;
    }
    Some(Transform::homography([
        rows[0] / w,
        rows[1] / w,
        rows[2] / w,
        rows[3] / w,
        rows[4] / w,
        rows[5] / w,
        rows[6] / w,
        rows[7] / w,
    ]))
}

/// Centres points and scales them to mean distance sqrt(2).
fn normalize_points(points: &[DVec2]) -> Option<(Vec<DVec2>, Transform)> {
    let c = centroid(points);
    let mean_dist = points.iter().map(|p| (*p - c).length()).sum::<f64>() / points.len() as f64;
    if mean_dist < 1e-10 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let normalized = points.iter().map(|p| (*p - c) * s).collect();
    let t = Transform::from_rows(
        [s, 0.0, -c.x * s, 0.0, s, -c.y * s, 0.0, 0.0, 1.0],
        TransformType::Similarity,
    );
    Some((normalized, t))
}

/// True when some three points of a minimal sample are (nearly) collinear,
/// or two coincide, for models that need spatial spread.
pub(crate) fn is_degenerate_sample(points: &[DVec2], model: TransformType) -> bool {
    const MIN_AREA: f64 = 1.0;
    const MIN_SEPARATION_SQ: f64 = 1.0;

    for i in 0..points.len() {
        for j in i + 1..points.len() {
            if (points[i] - points[j]).length_squared() < MIN_SEPARATION_SQ {
                return true;
            }
        }
    }
    if matches!(model, TransformType::Affine | TransformType::Homography) {
        for i in 0..points.len() {
            for j in i + 1..points.len() {
                for k in j + 1..points.len() {
                    let area = (points[j] - points[i]).perp_dot(points[k] - points[i]).abs();
                    if area < MIN_AREA {
                        return true;
                    }
                }
            }
        }
    }
    false
}
