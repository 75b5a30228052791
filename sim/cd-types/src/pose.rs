//! Rigid placement of shapes and geoms.
//!
//! A [`Pose`] is a rotation followed by a translation. Shapes are defined
//! in their own local frame and placed in the world (or in a parent frame)
//! by a pose; composing poses re-bases a shape without touching its
//! parameters.

use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Position and orientation of a shape or geom.
///
/// # Example
///
/// ```
/// use cd_types::Pose;
/// use nalgebra::Point3;
///
/// let pose = Pose::from_position(Point3::new(1.0, 2.0, 3.0));
/// let world = pose.transform_point(&Point3::new(1.0, 0.0, 0.0));
/// assert_eq!(world, Point3::new(2.0, 2.0, 3.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Translation (origin of the local frame in the parent frame).
    pub position: Point3<f64>,
    /// Orientation of the local frame.
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Create an identity pose (origin, no rotation).
    #[must_use]
    pub fn identity() -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position only (identity rotation).
    #[must_use]
    pub fn from_position(position: Point3<f64>) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position and rotation.
    #[must_use]
    pub const fn from_position_rotation(
        position: Point3<f64>,
        rotation: UnitQuaternion<f64>,
    ) -> Self {
        Self { position, rotation }
    }

    /// Create a pose at `position` rotated by Euler angles (roll about x,
    /// pitch about y, yaw about z).
    #[must_use]
    pub fn from_euler(position: Point3<f64>, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        }
    }

    /// Translation as a vector.
    #[must_use]
    pub fn translation(&self) -> Vector3<f64> {
        self.position.coords
    }

    /// Rotation as a 3x3 matrix whose columns are the local axes.
    #[must_use]
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Local axis `i` (0 = x, 1 = y, 2 = z) expressed in the parent frame.
    #[must_use]
    pub fn axis(&self, i: usize) -> Vector3<f64> {
        let mut local = Vector3::zeros();
        local[i.min(2)] = 1.0;
        self.rotation * local
    }

    /// Transform a point from local to parent coordinates.
    #[must_use]
    pub fn transform_point(&self, local: &Point3<f64>) -> Point3<f64> {
        self.position + self.rotation * local.coords
    }

    /// Transform a vector from local to parent coordinates (rotation only).
    #[must_use]
    pub fn transform_vector(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * local
    }

    /// Transform a point from parent to local coordinates.
    #[must_use]
    pub fn inverse_transform_point(&self, world: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation.inverse() * (world - self.position))
    }

    /// Transform a vector from parent to local coordinates.
    #[must_use]
    pub fn inverse_transform_vector(&self, world: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse() * world
    }

    /// Place a pose given in this pose's local frame into the parent frame.
    ///
    /// `outer.compose(&offset)` has rotation `R·R_off` and translation
    /// `R·t_off + T`.
    #[must_use]
    pub fn compose(&self, local: &Self) -> Self {
        Self {
            position: self.transform_point(&local.position),
            rotation: self.rotation * local.rotation,
        }
    }

    /// Inverse placement.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            position: Point3::from(-(rotation * self.position.coords)),
            rotation,
        }
    }

    /// Pose of `other` expressed in this pose's local frame.
    ///
    /// Rotation is `R1ᵀ·R2`, translation `R1ᵀ·(T2 − T1)`.
    #[must_use]
    pub fn relative(&self, other: &Self) -> Self {
        Self {
            position: self.inverse_transform_point(&other.position),
            rotation: self.rotation.inverse() * other.rotation,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_transform_roundtrip() {
        let pose = Pose::from_euler(Point3::new(1.0, -2.0, 0.5), 0.3, -0.7, 1.1);
        let p = Point3::new(0.25, 4.0, -1.0);

        let world = pose.transform_point(&p);
        let back = pose.inverse_transform_point(&world);
        assert_relative_eq!(back, p, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_matches_sequential_transform() {
        let outer = Pose::from_euler(Point3::new(0.0, 1.0, 0.0), 0.0, 0.0, FRAC_PI_2);
        let offset = Pose::from_position(Point3::new(1.0, 0.0, 0.0));
        let composed = outer.compose(&offset);

        // offset origin (1,0,0) rotated 90° about z -> (0,1,0), plus (0,1,0)
        assert_relative_eq!(composed.position, Point3::new(0.0, 2.0, 0.0), epsilon = 1e-12);

        let p = Point3::new(0.5, 0.5, 0.5);
        assert_relative_eq!(
            composed.transform_point(&p),
            outer.transform_point(&offset.transform_point(&p)),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_relative_pose() {
        let a = Pose::from_euler(Point3::new(1.0, 2.0, 3.0), 0.2, 0.4, 0.6);
        let b = Pose::from_euler(Point3::new(-1.0, 0.0, 2.0), -0.5, 0.1, 1.3);
        let rel = a.relative(&b);

        // a ∘ rel == b
        let recomposed = a.compose(&rel);
        assert_relative_eq!(recomposed.position, b.position, epsilon = 1e-12);
        assert_relative_eq!(
            recomposed.rotation_matrix(),
            b.rotation_matrix(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_inverse() {
        let pose = Pose::from_euler(Point3::new(3.0, 0.0, -1.0), 1.0, 0.0, 0.5);
        let id = pose.compose(&pose.inverse());
        assert_relative_eq!(id.position, Point3::origin(), epsilon = 1e-12);
        assert_relative_eq!(id.rotation.angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_axis_columns() {
        let pose = Pose::from_euler(Point3::origin(), FRAC_PI_2, 0.0, 0.0);
        // 90° about x maps local z to -y
        assert_relative_eq!(pose.axis(2), Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(pose.axis(2), pose.rotation_matrix().column(2).into_owned());
    }
}
