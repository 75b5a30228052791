//! Oriented bounding boxes.
//!
//! An [`Obb`] is expressed in the local frame of the geom that owns it and
//! is tested against another geom's boxes with the separating axis theorem
//! (15 candidate axes), after a cheap bounding-sphere rejection.

use cd_types::Pose;
use nalgebra::{Matrix3, Point3, Vector3};

use crate::shape::{cuboid_corners, Shape};

/// Padding added to `|R|` entries so near-parallel edge axes never report
/// a false separation.
const SAT_EPSILON: f64 = 1e-9;

/// Oriented bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obb {
    /// Center in the owner's frame.
    pub center: Point3<f64>,
    /// Orthonormal box axes as matrix columns.
    pub axes: Matrix3<f64>,
    /// Half-lengths along each axis.
    pub half_extents: Vector3<f64>,
    /// Radius of the bounding sphere around `center`.
    pub radius: f64,
}

impl Obb {
    /// Create a box from center, axes (columns) and half-extents.
    #[must_use]
    pub fn new(center: Point3<f64>, axes: Matrix3<f64>, half_extents: Vector3<f64>) -> Self {
        Self {
            center,
            axes,
            half_extents,
            radius: half_extents.norm(),
        }
    }

    /// Box aligned with the owner's axes.
    #[must_use]
    pub fn axis_aligned(center: Point3<f64>, half_extents: Vector3<f64>) -> Self {
        Self::new(center, Matrix3::identity(), half_extents)
    }

    /// Tight box around points, given its axes.
    #[must_use]
    pub fn from_axes_and_points(axes: Matrix3<f64>, points: &[Point3<f64>]) -> Self {
        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        for p in points {
            let local = axes.transpose() * p.coords;
            min = min.inf(&local);
            max = max.sup(&local);
        }
        if points.is_empty() {
            return Self::new(Point3::origin(), axes, Vector3::zeros());
        }
        Self::new(
            Point3::from(axes * ((min + max) * 0.5)),
            axes,
            (max - min) * 0.5,
        )
    }

    /// Tight box around shapes (in the owner's frame), given its axes.
    #[must_use]
    pub fn enclosing(axes: Matrix3<f64>, shapes: &[&Shape]) -> Self {
        let identity = Pose::identity();
        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        for shape in shapes {
            for i in 0..3 {
                let (lo, hi) = shape.project(&axes.column(i).into_owned(), &identity);
                min[i] = min[i].min(lo);
                max[i] = max[i].max(hi);
            }
        }
        if shapes.is_empty() {
            return Self::new(Point3::origin(), axes, Vector3::zeros());
        }
        Self::new(
            Point3::from(axes * ((min + max) * 0.5)),
            axes,
            (max - min) * 0.5,
        )
    }

    /// Box around a triangle: first axis along the longest edge, third
    /// along the normal.
    #[must_use]
    pub fn fit_triangle(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Self {
        let points = [*a, *b, *c];
        let edges = [b - a, c - b, a - c];
        let longest = edges
            .iter()
            .max_by(|x, y| x.norm_squared().total_cmp(&y.norm_squared()))
            .copied()
            .unwrap_or_else(Vector3::zeros);

        let normal = edges[0].cross(&edges[1]).try_normalize(1e-12);
        let axes = match (longest.try_normalize(1e-12), normal) {
            (Some(e), Some(n)) => Matrix3::from_columns(&[e, n.cross(&e), n]),
            _ => Matrix3::identity(),
        };
        Self::from_axes_and_points(axes, &points)
    }

    /// Box moved into the parent frame of `pose`.
    #[must_use]
    pub fn transformed(&self, pose: &Pose) -> Self {
        Self {
            center: pose.transform_point(&self.center),
            axes: pose.rotation_matrix() * self.axes,
            half_extents: self.half_extents,
            radius: self.radius,
        }
    }

    /// Interval covered by the box on `axis`.
    #[must_use]
    pub fn project(&self, axis: &Vector3<f64>) -> (f64, f64) {
        let c = self.center.coords.dot(axis);
        let r = (self.axes.transpose() * axis).abs().dot(&self.half_extents);
        (c - r, c + r)
    }

    /// Whether `point` lies inside the box, up to `tolerance`.
    #[must_use]
    pub fn contains(&self, point: &Point3<f64>, tolerance: f64) -> bool {
        let local = self.axes.transpose() * (point - self.center);
        (0..3).all(|i| local[i].abs() <= self.half_extents[i] + tolerance)
    }

    /// The 8 corners in the owner's frame.
    #[must_use]
    pub fn corners(&self) -> [Point3<f64>; 8] {
        cuboid_corners(&self.half_extents).map(|p| self.center + self.axes * p.coords)
    }

    /// Box volume.
    #[must_use]
    pub fn volume(&self) -> f64 {
        8.0 * self.half_extents.x * self.half_extents.y * self.half_extents.z
    }

    /// True if a separating plane provably exists between this box (owned
    /// by a geom at `pose`) and `other` (owned by a geom at `other_pose`).
    ///
    /// A `false` answer only means the boxes may overlap.
    #[must_use]
    pub fn disjoint(&self, pose: &Pose, other: &Self, other_pose: &Pose) -> bool {
        let ca = pose.transform_point(&self.center);
        let cb = other_pose.transform_point(&other.center);
        let d = cb - ca;

        let reach = self.radius + other.radius;
        if d.norm_squared() > reach * reach {
            return true;
        }

        let ra = pose.rotation_matrix() * self.axes;
        let rb = other_pose.rotation_matrix() * other.axes;
        sat_disjoint(
            &self.half_extents,
            &other.half_extents,
            &(ra.transpose() * rb),
            &(ra.transpose() * d),
        )
    }
}

/// Separating axis test for two boxes, the second given in the frame of
/// the first by rotation `r` and translation `t`.
fn sat_disjoint(a: &Vector3<f64>, b: &Vector3<f64>, r: &Matrix3<f64>, t: &Vector3<f64>) -> bool {
    let abs_r = r.abs().add_scalar(SAT_EPSILON);

    // face axes of the first box
    for i in 0..3 {
        let rb = b.dot(&abs_r.row(i).transpose());
        if t[i].abs() > a[i] + rb {
            return true;
        }
    }

    // face axes of the second box
    for j in 0..3 {
        let ra = a.dot(&abs_r.column(j));
        let tl = t.dot(&r.column(j)).abs();
        if tl > ra + b[j] {
            return true;
        }
    }

    // edge cross products
    for i in 0..3 {
        let (i1, i2) = ((i + 1) % 3, (i + 2) % 3);
        for j in 0..3 {
            let (j1, j2) = ((j + 1) % 3, (j + 2) % 3);
            let tl = (t[i2] * r[(i1, j)] - t[i1] * r[(i2, j)]).abs();
            let ra = a[i1] * abs_r[(i2, j)] + a[i2] * abs_r[(i1, j)];
            let rb = b[j1] * abs_r[(i, j2)] + b[j2] * abs_r[(i, j1)];
            if tl > ra + rb {
                return true;
            }
        }
    }

    false
}
