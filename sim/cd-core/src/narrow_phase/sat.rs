//! Separating axis tests for polyhedral pairs.
//!
//! Boxes and triangles are compared by projecting their corners onto every
//! candidate axis (face normals and edge cross products). An axis on which
//! the intervals do not overlap, or only touch, separates the shapes.

use cd_types::Pose;
use nalgebra::{Point3, Vector3};

use crate::shape::cuboid_corners;

/// Axes shorter than this (before normalizing) are skipped.
const AXIS_EPSILON: f64 = 1e-12;

fn interval(points: &[Point3<f64>], axis: &Vector3<f64>) -> (f64, f64) {
    points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
        let d = p.coords.dot(axis);
        (lo.min(d), hi.max(d))
    })
}

fn separates(a: &[Point3<f64>], b: &[Point3<f64>], axis: &Vector3<f64>) -> bool {
    let Some(axis) = axis.try_normalize(AXIS_EPSILON) else {
        return false;
    };
    let (min_a, max_a) = interval(a, &axis);
    let (min_b, max_b) = interval(b, &axis);
    max_a <= min_b || max_b <= min_a
}

/// True if no candidate axis separates the two point sets.
fn overlap(
    a: &[Point3<f64>],
    b: &[Point3<f64>],
    faces: &[Vector3<f64>],
    edges_a: &[Vector3<f64>],
    edges_b: &[Vector3<f64>],
) -> bool {
    if faces.iter().any(|axis| separates(a, b, axis)) {
        return false;
    }
    !edges_a
        .iter()
        .any(|ea| edges_b.iter().any(|eb| separates(a, b, &ea.cross(eb))))
}

fn box_corners(half_extents: &Vector3<f64>, pose: &Pose) -> [Point3<f64>; 8] {
    cuboid_corners(half_extents).map(|p| pose.transform_point(&p))
}

fn box_axes(pose: &Pose) -> [Vector3<f64>; 3] {
    [pose.axis(0), pose.axis(1), pose.axis(2)]
}

fn triangle_edges(t: &[Point3<f64>; 3]) -> [Vector3<f64>; 3] {
    [t[1] - t[0], t[2] - t[1], t[0] - t[2]]
}

/// Box–box overlap (15 axes).
#[must_use]
pub fn box_box(he_a: &Vector3<f64>, pose_a: &Pose, he_b: &Vector3<f64>, pose_b: &Pose) -> bool {
    let (axes_a, axes_b) = (box_axes(pose_a), box_axes(pose_b));
    let faces = [axes_a[0], axes_a[1], axes_a[2], axes_b[0], axes_b[1], axes_b[2]];
    overlap(
        &box_corners(he_a, pose_a),
        &box_corners(he_b, pose_b),
        &faces,
        &axes_a,
        &axes_b,
    )
}

/// Box–triangle overlap (13 axes); the triangle is given in world space.
#[must_use]
pub fn box_triangle(he: &Vector3<f64>, pose: &Pose, tri: &[Point3<f64>; 3]) -> bool {
    let axes = box_axes(pose);
    let edges = triangle_edges(tri);
    let faces = [axes[0], axes[1], axes[2], edges[0].cross(&edges[1])];
    overlap(&box_corners(he, pose), tri, &faces, &axes, &edges)
}

/// Triangle–triangle overlap (11 axes); both given in world space.
///
/// Coplanar triangles only touch and never overlap.
#[must_use]
pub fn triangle_triangle(a: &[Point3<f64>; 3], b: &[Point3<f64>; 3]) -> bool {
    let (ea, eb) = (triangle_edges(a), triangle_edges(b));
    let faces = [ea[0].cross(&ea[1]), eb[0].cross(&eb[1])];
    overlap(a, b, &faces, &ea, &eb)
}

/// True if a face normal of either triangle separates them or the
/// triangles only touch along it. Coplanar triangles always qualify.
#[must_use]
pub fn separated_by_faces(a: &[Point3<f64>; 3], b: &[Point3<f64>; 3]) -> bool {
    let (ea, eb) = (triangle_edges(a), triangle_edges(b));
    [ea[0].cross(&ea[1]), eb[0].cross(&eb[1])]
        .iter()
        .any(|axis| separates(a, b, axis))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    fn at(x: f64, y: f64, z: f64) -> Pose {
        Pose::from_position(Point3::new(x, y, z))
    }

    #[test]
    fn test_box_box() {
        let he = Vector3::repeat(0.5);
        assert!(box_box(&he, &Pose::identity(), &he, &at(0.9, 0.0, 0.0)));
        assert!(!box_box(&he, &Pose::identity(), &he, &at(1.0, 0.0, 0.0)));

        let rotated = Pose::from_euler(Point3::new(1.1, 0.0, 0.0), 0.0, FRAC_PI_4, 0.0);
        assert!(box_box(&he, &Pose::identity(), &he, &rotated));

        let a = Pose::from_euler(Point3::origin(), FRAC_PI_4, 0.0, 0.0);
        let b = Pose::from_euler(Point3::new(0.6, 0.6, 0.0), 0.0, FRAC_PI_4, 0.0);
        assert_eq!(box_box(&he, &a, &he, &b), box_box(&he, &b, &he, &a));
    }

    #[test]
    fn test_box_triangle() {
        let he = Vector3::new(0.5, 0.5, 0.5);
        let tri = [
            Point3::new(-1.0, -1.0, 0.4),
            Point3::new(1.0, -1.0, 0.4),
            Point3::new(0.0, 1.0, 0.4),
        ];
        assert!(box_triangle(&he, &Pose::identity(), &tri));
        assert!(!box_triangle(&he, &at(0.0, 0.0, -0.2), &tri));

        // triangle lying in the box's top face plane only touches
        let flush = tri.map(|p| Point3::new(p.x, p.y, 0.5));
        assert!(!box_triangle(&he, &Pose::identity(), &flush));

        // corner poking through a tilted triangle
        let corner = Pose::from_euler(Point3::new(0.0, 0.0, -0.2), FRAC_PI_4, FRAC_PI_4, 0.0);
        assert!(box_triangle(&he, &corner, &tri));
    }

    #[test]
    fn test_triangle_triangle() {
        let a = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let crossing = [
            Point3::new(0.2, 0.2, -0.5),
            Point3::new(0.2, 0.2, 0.5),
            Point3::new(0.3, -0.5, 0.0),
        ];
        assert!(triangle_triangle(&a, &crossing));
        assert!(triangle_triangle(&crossing, &a));

        let above = crossing.map(|p| Point3::new(p.x, p.y, p.z + 0.6));
        assert!(!triangle_triangle(&a, &above));

        let coplanar = a.map(|p| Point3::new(p.x + 0.2, p.y + 0.2, 0.0));
        assert!(!triangle_triangle(&a, &coplanar));
        assert!(separated_by_faces(&a, &coplanar));
        assert!(separated_by_faces(&a, &above));
        assert!(!separated_by_faces(&a, &crossing));
    }
}
