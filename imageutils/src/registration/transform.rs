//! Parametric 2D transforms from candidate to reference coordinates.

use std::fmt;

use glam::{DMat3, DVec2, DVec3};
use serde::{Deserialize, Serialize};

use super::config::PlausibilityLimits;
use crate::image::ImageDimensions;

/// Transform model, in increasing degrees of freedom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransformType {
    /// Shift only (2 DOF).
    Translation,
    /// Shift and rotation (3 DOF).
    Euclidean,
    /// Shift, rotation and uniform scale (4 DOF).
    Similarity,
    /// General linear map plus shift (6 DOF).
    #[default]
    Affine,
    /// Full projective map (8 DOF).
    Homography,
}

impl TransformType {
    /// Correspondences needed for a closed-form fit.
    pub fn min_points(&self) -> usize {
        match self {
            Self::Translation => 1,
            Self::Euclidean | Self::Similarity => 2,
            Self::Affine => 3,
            Self::Homography => 4,
        }
    }

    pub fn degrees_of_freedom(&self) -> usize {
        match self {
            Self::Translation => 2,
            Self::Euclidean => 3,
            Self::Similarity => 4,
            Self::Affine => 6,
            Self::Homography => 8,
        }
    }
}

/// A 3x3 homogeneous matrix tagged with the model it was fitted as.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    matrix: DMat3,
    pub transform_type: TransformType,
}

impl Transform {
    /// Builds a transform from a row-major 3x3 array.
    pub fn from_rows(rows: [f64; 9], transform_type: TransformType) -> Self {
        Self {
            matrix: DMat3::from_cols_array(&rows).transpose(),
            transform_type,
        }
    }

    pub fn from_matrix(matrix: DMat3, transform_type: TransformType) -> Self {
        Self {
            matrix,
            transform_type,
        }
    }

    pub fn identity() -> Self {
        Self::from_matrix(DMat3::IDENTITY, TransformType::Translation)
    }

    pub fn translation(t: DVec2) -> Self {
        Self::from_rows(
            [1.0, 0.0, t.x, 0.0, 1.0, t.y, 0.0, 0.0, 1.0],
            TransformType::Translation,
        )
    }

    pub fn euclidean(t: DVec2, angle: f64) -> Self {
        let mut out = Self::similarity(t, angle, 1.0);
        out.transform_type = TransformType::Euclidean;
        out
    }

    pub fn similarity(t: DVec2, angle: f64, scale: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::from_rows(
            [
                scale * cos,
                -scale * sin,
                t.x,
                scale * sin,
                scale * cos,
                t.y,
                0.0,
                0.0,
                1.0,
            ],
            TransformType::Similarity,
        )
    }

    /// `[a, b, tx, c, d, ty]` maps `(x, y)` to `(a x + b y + tx, c x + d y + ty)`.
    pub fn affine(p: [f64; 6]) -> Self {
        Self::from_rows(
            [p[0], p[1], p[2], p[3], p[4], p[5], 0.0, 0.0, 1.0],
            TransformType::Affine,
        )
    }

    /// First eight row-major entries; the last is fixed at 1.
    pub fn homography(h: [f64; 8]) -> Self {
        Self::from_rows(
            [h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0],
            TransformType::Homography,
        )
    }

    #[inline]
    pub fn matrix(&self) -> &DMat3 {
        &self.matrix
    }

    /// Entry at `row`, `col`.
    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.matrix.col(col)[row]
    }

    pub fn to_rows(&self) -> [f64; 9] {
        self.matrix.transpose().to_cols_array()
    }

    /// Maps a point, dividing by the homogeneous coordinate.
    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        let v = self.matrix * DVec3::new(p.x, p.y, 1.0);
        DVec2::new(v.x / v.z, v.y / v.z)
    }

    /// Homogeneous scale `w` of a mapped point; non-positive means the point
    /// crossed the horizon of a homography.
    #[inline]
    pub fn homogeneous_w(&self, p: DVec2) -> f64 {
        self.at(2, 0) * p.x + self.at(2, 1) * p.y + self.at(2, 2)
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.matrix.determinant();
        if !det.is_finite() || det.abs() < 1e-12 {
            return None;
        }
        Some(Self::from_matrix(self.matrix.inverse(), self.transform_type))
    }

    /// `self.compose(other)` applies `other` first, then `self`.
    pub fn compose(&self, other: &Self) -> Self {
        let transform_type = self.transform_type.max_by_dof(other.transform_type);
        Self::from_matrix(self.matrix * other.matrix, transform_type)
    }

    pub fn translation_components(&self) -> DVec2 {
        DVec2::new(self.at(0, 2), self.at(1, 2))
    }

    /// Rotation of the closest similarity to the linear part.
    pub fn rotation_angle(&self) -> f64 {
        let (a, b, c, d) = self.linear();
        (c - b).atan2(a + d)
    }

    /// Geometric mean of the linear part's singular values.
    pub fn scale_factor(&self) -> f64 {
        let (s_max, s_min) = self.singular_values();
        (s_max * s_min).sqrt()
    }

    fn linear(&self) -> (f64, f64, f64, f64) {
        (self.at(0, 0), self.at(0, 1), self.at(1, 0), self.at(1, 1))
    }

    /// Singular values `(max, min)` of the upper-left 2x2 block.
    pub fn singular_values(&self) -> (f64, f64) {
        let (a, b, c, d) = self.linear();
        let frob = a * a + b * b + c * c + d * d;
        let det = a * d - b * c;
        let disc = (frob * frob - 4.0 * det * det).max(0.0).sqrt();
        let s_max = ((frob + disc) * 0.5).sqrt();
        let s_min = ((frob - disc) * 0.5).max(0.0).sqrt();
        (s_max, s_min)
    }

    /// Finite and invertible.
    pub fn is_valid(&self) -> bool {
        let (a, b, c, d) = self.linear();
        self.to_rows().iter().all(|v| v.is_finite()) && (a * d - b * c).abs() > 1e-10
    }

    /// Rejects transforms no handheld or tripod sequence could produce:
    /// mirroring, extreme scale or shear, excessive rotation, strong
    /// perspective, or a homography that folds the candidate frame.
    pub fn is_plausible(
        &self,
        limits: &PlausibilityLimits,
        candidate: Option<ImageDimensions>,
    ) -> bool {
        if !self.is_valid() || self.inverse().is_none() {
            return false;
        }
        let (a, b, c, d) = self.linear();
        if a * d - b * c <= 0.0 {
            return false;
        }

        let (s_max, s_min) = self.singular_values();
        if s_min <= 0.0
            || s_max > limits.max_scale
            || s_min < 1.0 / limits.max_scale
            || s_max / s_min > limits.max_anisotropy
        {
            return false;
        }

        if let Some(max_rot) = limits.max_rotation {
            if self.rotation_angle().abs() > max_rot {
                return false;
            }
        }

        if self.transform_type == TransformType::Homography {
            let scale = self.at(2, 2);
            if scale.abs() < 1e-12
                || (self.at(2, 0) / scale).abs() > limits.max_perspective
                || (self.at(2, 1) / scale).abs() > limits.max_perspective
            {
                return false;
            }
            if let Some(dims) = candidate {
                let (w, h) = (dims.width as f64, dims.height as f64);
                let corners = [
                    DVec2::ZERO,
                    DVec2::new(w, 0.0),
                    DVec2::new(0.0, h),
                    DVec2::new(w, h),
                ];
                let sign = scale.signum();
                if corners.iter().any(|&p| self.homogeneous_w(p) * sign <= 0.0) {
                    return false;
                }
            }
        }

        true
    }
}

impl TransformType {
    fn max_by_dof(self, other: Self) -> Self {
        if other.degrees_of_freedom() > self.degrees_of_freedom() {
            other
        } else {
            self
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.translation_components();
        let rot = self.rotation_angle().to_degrees();
        match self.transform_type {
            TransformType::Translation => write!(f, "Translation(dx={:.2}, dy={:.2})", t.x, t.y),
            TransformType::Euclidean => {
                write!(f, "Euclidean(dx={:.2}, dy={:.2}, rot={rot:.3}°)", t.x, t.y)
            }
            TransformType::Similarity => write!(
                f,
                "Similarity(dx={:.2}, dy={:.2}, rot={rot:.3}°, scale={:.4})",
                t.x,
                t.y,
                self.scale_factor()
            ),
            TransformType::Affine | TransformType::Homography => {
                let r = self.to_rows();
                let name = if self.transform_type == TransformType::Affine {
                    "Affine"
                } else {
                    "Homography"
                };
                write!(
                    f,
                    "{name}([{:.4}, {:.4}, {:.2}], [{:.4}, {:.4}, {:.2}], [{:.2e}, {:.2e}, {:.4}])",
                    r[0], r[1], r[2], r[3], r[4], r[5], r[6], r[7], r[8]
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const EPSILON: f64 = 1e-10;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < EPSILON
    }

    fn approx_point(a: DVec2, b: DVec2) -> bool {
        approx_eq(a.x, b.x) && approx_eq(a.y, b.y)
    }

    #[test]
    fn test_transform_type_min_points() {
        assert_eq!(TransformType::Translation.min_points(), 1);
        assert_eq!(TransformType::Similarity.min_points(), 2);
        assert_eq!(TransformType::Affine.min_points(), 3);
        assert_eq!(TransformType::Homography.min_points(), 4);
        assert_eq!(TransformType::Homography.degrees_of_freedom(), 8);
    }

    #[test]
    fn test_identity_and_translation() {
        let p = DVec2::new(3.5, -7.25);
        assert_eq!(Transform::identity().apply(p), p);
        let t = Transform::translation(DVec2::new(5.0, -2.0));
        assert!(approx_point(t.apply(p), DVec2::new(8.5, -9.25)));
        assert!(approx_point(t.translation_components(), DVec2::new(5.0, -2.0)));
    }

    #[test]
    fn test_rotation_90_degrees() {
        let t = Transform::euclidean(DVec2::ZERO, PI / 2.0);
        assert!(approx_point(t.apply(DVec2::new(1.0, 0.0)), DVec2::new(0.0, 1.0)));
        assert!(approx_eq(t.rotation_angle(), PI / 2.0));
        assert!(approx_eq(t.scale_factor(), 1.0));
    }

    #[test]
    fn test_similarity_parameters() {
        let t = Transform::similarity(DVec2::new(10.0, 20.0), 0.3, 1.5);
        assert!(approx_eq(t.rotation_angle(), 0.3));
        assert!(approx_eq(t.scale_factor(), 1.5));
        let (s_max, s_min) = t.singular_values();
        assert!(approx_eq(s_max, 1.5) && approx_eq(s_min, 1.5));
    }

    #[test]
    fn test_row_major_layout() {
        let t = Transform::affine([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(t.at(0, 1), 2.0);
        assert_eq!(t.at(1, 2), 6.0);
        assert_eq!(t.to_rows(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.0, 0.0, 1.0]);
        assert!(approx_point(t.apply(DVec2::new(1.0, 1.0)), DVec2::new(6.0, 15.0)));
    }

    #[test]
    fn test_inverse_roundtrip_and_singular() {
        let t = Transform::homography([1.01, 0.02, 4.0, -0.01, 0.99, -3.0, 1e-4, -2e-4]);
        let inv = t.inverse().unwrap();
        let p = DVec2::new(123.0, 45.0);
        let back = inv.apply(t.apply(p));
        assert!((back - p).length() < 1e-9);

        let singular = Transform::affine([1.0, 2.0, 0.0, 2.0, 4.0, 0.0]);
        assert!(singular.inverse().is_none());
        assert!(!singular.is_valid());
    }

    #[test]
    fn test_compose_applies_right_first() {
        let shift = Transform::translation(DVec2::new(1.0, 0.0));
        let rot = Transform::euclidean(DVec2::ZERO, PI / 2.0);
        let combined = rot.compose(&shift);
        assert!(approx_point(combined.apply(DVec2::ZERO), DVec2::new(0.0, 1.0)));
        assert_eq!(combined.transform_type, TransformType::Euclidean);
    }

    #[test]
    fn test_plausibility_limits() {
        let limits = PlausibilityLimits::default();
        assert!(Transform::identity().is_plausible(&limits, None));
        let mild = Transform::similarity(DVec2::new(30.0, -5.0), 0.1, 1.05);
        assert!(mild.is_plausible(&limits, None));

        // Mirroring
        let mirror = Transform::affine([-1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert!(!mirror.is_plausible(&limits, None));
        // Extreme scale
        assert!(!Transform::similarity(DVec2::ZERO, 0.0, 3.0).is_plausible(&limits, None));
        // Strong shear
        let shear = Transform::affine([1.0, 1.2, 0.0, 0.0, 1.0, 0.0]);
        assert!(!shear.is_plausible(&limits, None));
        // Rotation bound
        let rotated = Transform::euclidean(DVec2::ZERO, 0.5);
        let strict = PlausibilityLimits {
            max_rotation: Some(0.2),
            ..PlausibilityLimits::default()
        };
        assert!(rotated.is_plausible(&limits, None));
        assert!(!rotated.is_plausible(&strict, None));
        // Perspective
        let persp = Transform::homography([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.01, 0.0]);
        assert!(!persp.is_plausible(&limits, None));
    }

    #[test]
    fn test_homography_folding_frame_is_implausible() {
        let limits = PlausibilityLimits {
            max_perspective: 1.0,
            ..PlausibilityLimits::default()
        };
        // w = 1 - 0.002 x turns negative past x = 500.
        let h = Transform::homography([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -0.002, 0.0]);
        assert!(h.is_plausible(&limits, Some(ImageDimensions::new(400, 300, 3))));
        assert!(!h.is_plausible(&limits, Some(ImageDimensions::new(800, 300, 3))));
    }

    #[test]
    fn test_display() {
        let t = Transform::translation(DVec2::new(5.0, -3.0));
        assert_eq!(t.to_string(), "Translation(dx=5.00, dy=-3.00)");
        let s = Transform::similarity(DVec2::ZERO, 0.0, 2.0).to_string();
        assert!(s.starts_with("Similarity("));
        assert!(s.contains("scale=2.0000"));
    }
}
