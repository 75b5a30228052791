//! OBB axis fitting.
//!
//! Each [`FitMethod`] picks three orthonormal axes for a set of shapes;
//! the box extents then come from projecting the shapes onto those axes
//! (see [`Obb::enclosing`]).

use std::f64::consts::{FRAC_PI_2, PI};

use cd_types::{FitMethod, Pose};
use nalgebra::{Matrix3, Point3, Rotation3, SymmetricEigen, Unit, Vector3};
use tracing::trace;

use crate::obb::Obb;
use crate::shape::Shape;

/// Area-weighted first and second moments of a surface.
///
/// Triangles contribute their exact surface moments; round primitives
/// contribute their surface area concentrated at their center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMoments {
    area: f64,
    weighted_center: Vector3<f64>,
    second: Matrix3<f64>,
}

impl Default for SurfaceMoments {
    fn default() -> Self {
        Self {
            area: 0.0,
            weighted_center: Vector3::zeros(),
            second: Matrix3::zeros(),
        }
    }
}

impl SurfaceMoments {
    /// Empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moments of all `shapes` (given in one frame).
    #[must_use]
    pub fn of_shapes(shapes: &[&Shape]) -> Self {
        let mut moments = Self::new();
        let identity = Pose::identity();
        for shape in shapes {
            shape.accumulate_surface(&identity, &mut moments);
        }
        moments
    }

    /// Add a point mass `weight` at `p`.
    pub fn add_point(&mut self, p: &Point3<f64>, weight: f64) {
        self.area += weight;
        self.weighted_center += p.coords * weight;
        self.second += p.coords * p.coords.transpose() * weight;
    }

    /// Add the surface of triangle `p, q, r`.
    pub fn add_triangle(&mut self, p: &Point3<f64>, q: &Point3<f64>, r: &Point3<f64>) {
        let area = 0.5 * (q - p).cross(&(r - p)).norm();
        let c = (p.coords + q.coords + r.coords) / 3.0;

        let outer = 9.0 * c * c.transpose()
            + p.coords * p.coords.transpose()
            + q.coords * q.coords.transpose()
            + r.coords * r.coords.transpose();

        self.second += outer * (area / 12.0);
        self.weighted_center += c * area;
        self.area += area;
    }

    /// Accumulated weight.
    #[must_use]
    pub const fn area(&self) -> f64 {
        self.area
    }

    /// Weighted centroid, if anything was accumulated.
    #[must_use]
    pub fn centroid(&self) -> Option<Point3<f64>> {
        (self.area > 0.0).then(|| Point3::from(self.weighted_center / self.area))
    }

    /// Covariance about the centroid.
    #[must_use]
    pub fn covariance(&self) -> Option<Matrix3<f64>> {
        let mean = self.centroid()?.coords;
        Some(self.second / self.area - mean * mean.transpose())
    }
}

/// Covariance of a point cloud.
#[must_use]
pub fn point_covariance(points: &[Point3<f64>]) -> Matrix3<f64> {
    if points.is_empty() {
        return Matrix3::zeros();
    }
    let n = points.len() as f64;
    let mean: Vector3<f64> = points.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;
    points
        .iter()
        .map(|p| {
            let d = p.coords - mean;
            d * d.transpose()
        })
        .sum::<Matrix3<f64>>()
        / n
}

/// Eigenvectors of a symmetric matrix, sorted by decreasing eigenvalue and
/// made into a right-handed frame.
#[must_use]
pub fn principal_axes(m: &Matrix3<f64>) -> Matrix3<f64> {
    if !m.iter().all(|v| v.is_finite()) {
        return Matrix3::identity();
    }
    let eigen = SymmetricEigen::new(*m);
    let mut order = [0, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let first = eigen.eigenvectors.column(order[0]).into_owned();
    let second = eigen.eigenvectors.column(order[1]).into_owned();
    orthonormal_frame(&first, &second)
}

/// Right-handed orthonormal frame whose first axis is `a` and whose second
/// lies in the plane of `a, b`.
fn orthonormal_frame(a: &Vector3<f64>, b: &Vector3<f64>) -> Matrix3<f64> {
    let Some(x) = a.try_normalize(1e-12) else {
        return Matrix3::identity();
    };
    let y = (b - x * x.dot(b))
        .try_normalize(1e-12)
        .unwrap_or_else(|| any_perpendicular(&x));
    Matrix3::from_columns(&[x, y, x.cross(&y)])
}

fn any_perpendicular(v: &Vector3<f64>) -> Vector3<f64> {
    let other = if v.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    v.cross(&other).normalize()
}

/// Covariance-fitted box around points.
///
/// Used for the local bounds of point-based shapes.
#[must_use]
pub fn fit_points(points: &[Point3<f64>]) -> Obb {
    Obb::from_axes_and_points(principal_axes(&point_covariance(points)), points)
}

/// Fit a box around `shapes` (all given in the owner's frame).
#[must_use]
pub fn fit_shapes(method: FitMethod, shapes: &[&Shape]) -> Obb {
    let mut points = Vec::new();
    let identity = Pose::identity();
    for shape in shapes {
        shape.collect_hull_points(&identity, &mut points);
    }
    let point_axes = || principal_axes(&point_covariance(&points));

    let axes = match method {
        FitMethod::Covariance => point_axes(),
        FitMethod::CovarianceFast => SurfaceMoments::of_shapes(shapes)
            .covariance()
            .map_or_else(point_axes, |c| principal_axes(&c)),
        FitMethod::PolyhedralMass => SurfaceMoments::of_shapes(shapes).covariance().map_or_else(
            point_axes,
            |c| principal_axes(&(Matrix3::identity() * c.trace() - c)),
        ),
        FitMethod::Calipers { rotations } => {
            return calipers(&point_axes(), rotations, shapes);
        }
        FitMethod::Naive { rotations } => return naive(rotations, shapes),
    };

    Obb::enclosing(axes, shapes)
}

/// Spin the two minor axes about the major one over half a turn and keep
/// the smallest box.
fn calipers(base: &Matrix3<f64>, rotations: u8, shapes: &[&Shape]) -> Obb {
    let major = Unit::new_normalize(base.column(0).into_owned());
    let steps = u32::from(rotations.max(1));
    let mut best = Obb::enclosing(*base, shapes);

    for k in 1..steps {
        let angle = PI * f64::from(k) / f64::from(steps);
        let spin = Rotation3::from_axis_angle(&major, angle);
        let candidate = Obb::enclosing(spin.matrix() * base, shapes);
        if candidate.volume() < best.volume() {
            best = candidate;
        }
    }
    trace!(rotations, volume = best.volume(), "calipers fit");
    best
}

/// Try every Euler rotation on a grid of `2n + 1` angles per axis in
/// `[-π/2, π/2]` and keep the smallest box.
fn naive(rotations: u8, shapes: &[&Shape]) -> Obb {
    let n = i32::from(rotations.max(1));
    let step = FRAC_PI_2 / f64::from(n);
    let angle = |i: i32| f64::from(i) * step;
    let mut best = Obb::enclosing(Matrix3::identity(), shapes);

    for i in -n..=n {
        for j in -n..=n {
            for k in -n..=n {
                let rot = Rotation3::from_euler_angles(angle(i), angle(j), angle(k));
                let candidate = Obb::enclosing(rot.into_inner(), shapes);
                if candidate.volume() < best.volume() {
                    best = candidate;
                }
            }
        }
    }
    trace!(rotations, volume = best.volume(), "naive fit");
    best
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_precision_loss
)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tilted_box() -> Vec<Shape> {
        let pose = Pose::from_euler(Point3::new(0.5, -0.2, 0.1), 0.3, 0.5, 0.7);
        vec![Shape::offset(Shape::cuboid(4.0, 1.0, 0.5).unwrap(), pose).unwrap()]
    }

    #[test]
    fn test_point_covariance_of_line() {
        let points = [Point3::new(-1.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
        let cov = point_covariance(&points);
        assert_relative_eq!(cov[(0, 0)], 1.0);
        assert_relative_eq!(cov[(1, 1)], 0.0);

        let axes = principal_axes(&cov);
        assert_relative_eq!(axes.column(0).x.abs(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(axes.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_triangle_moments() {
        let mut moments = SurfaceMoments::new();
        moments.add_triangle(
            &Point3::new(0.0, 0.0, 0.0),
            &Point3::new(3.0, 0.0, 0.0),
            &Point3::new(0.0, 3.0, 0.0),
        );
        assert_relative_eq!(moments.area(), 4.5);
        assert_relative_eq!(moments.centroid().unwrap(), Point3::new(1.0, 1.0, 0.0));

        // second moment of the right triangle about x: ∫x² dA = a⁴/12
        let cov = moments.covariance().unwrap();
        assert_relative_eq!(cov[(0, 0)], 81.0 / 12.0 / 4.5 - 1.0, epsilon = 1e-12);
        assert_relative_eq!(cov[(2, 2)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_moments() {
        assert!(SurfaceMoments::new().covariance().is_none());
    }

    #[test]
    fn test_every_method_bounds_the_box() {
        let shapes = tilted_box();
        let mut corners = Vec::new();
        shapes[0].collect_hull_points(&Pose::identity(), &mut corners);

        for method in [
            FitMethod::Covariance,
            FitMethod::CovarianceFast,
            FitMethod::PolyhedralMass,
            FitMethod::calipers(),
            FitMethod::naive(),
        ] {
            let obb = fit_shapes(method, &[&shapes[0]]);
            for p in &corners {
                assert!(obb.contains(p, 1e-9), "{} misses {p}", method.name());
            }
            assert_relative_eq!(obb.axes.determinant(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_covariance_fit_is_tight_for_a_box() {
        let shapes = tilted_box();
        let obb = fit_shapes(FitMethod::Covariance, &[&shapes[0]]);
        assert_relative_eq!(obb.volume(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_calipers_never_worse_than_covariance() {
        let shapes = vec![
            Shape::sphere(0.3).unwrap(),
            Shape::offset(
                Shape::capsule(0.2, 1.5).unwrap(),
                Pose::from_euler(Point3::new(1.0, 0.5, 0.0), 0.2, 1.0, 0.0),
            )
            .unwrap(),
        ];
        let refs: Vec<&Shape> = shapes.iter().collect();
        let base = fit_shapes(FitMethod::Covariance, &refs);
        let spun = fit_shapes(FitMethod::Calipers { rotations: 12 }, &refs);
        assert!(spun.volume() <= base.volume() + 1e-12);
    }

    #[test]
    fn test_fit_points_empty() {
        let obb = fit_points(&[]);
        assert_relative_eq!(obb.volume(), 0.0);
    }
}
