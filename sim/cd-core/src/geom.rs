//! Geoms: rigid groups of shapes sharing one pose.

use std::ops::ControlFlow;
use std::sync::Arc;

use cd_types::{BuildConfig, ContactSet, Pose, Result};
use nalgebra::{Point3, UnitQuaternion};
use tracing::trace;

use crate::broad_phase::Aabb;
use crate::narrow_phase::NarrowPhase;
use crate::obb_tree::ObbTree;
use crate::shape::{Shape, TriMeshData};

/// A rigid collection of shapes placed in the world by a single pose.
///
/// Shapes are added in the geom's local frame; [`build`](Self::build)
/// wraps them in an [`ObbTree`]. The tree must be rebuilt after the shape
/// set changes, while the pose may change freely between queries.
///
/// # Example
///
/// ```
/// use cd_core::{Geom, NarrowPhase};
/// use cd_types::BuildConfig;
/// use nalgebra::Point3;
///
/// let mut a = Geom::new();
/// a.add_sphere(0.5)?;
/// a.build(&BuildConfig::default());
///
/// let mut b = Geom::new();
/// b.add_cuboid(1.0, 1.0, 1.0)?;
/// b.set_position(Point3::new(0.9, 0.0, 0.0));
/// b.build(&BuildConfig::default());
///
/// assert!(a.collide(&b, &NarrowPhase::default()));
/// # Ok::<(), cd_types::CdError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Geom {
    pose: Pose,
    shapes: Vec<Shape>,
    tree: ObbTree,
    dirty: bool,
    persistence: usize,
}

impl Geom {
    /// Empty geom at the origin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty geom at `pose`.
    #[must_use]
    pub fn at(pose: Pose) -> Self {
        Self {
            pose,
            ..Self::default()
        }
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Current world pose.
    #[must_use]
    pub const fn pose(&self) -> &Pose {
        &self.pose
    }

    /// Replace the world pose.
    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    /// Move the geom to `position`, keeping its rotation.
    pub fn set_position(&mut self, position: Point3<f64>) {
        self.pose.position = position;
    }

    /// Rotate the geom, keeping its position.
    pub fn set_rotation(&mut self, rotation: UnitQuaternion<f64>) {
        self.pose.rotation = rotation;
    }

    /// Rotate the geom by roll, pitch and yaw angles, keeping its position.
    pub fn set_euler(&mut self, roll: f64, pitch: f64, yaw: f64) {
        self.pose.rotation = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
    }

    // =========================================================================
    // Shapes
    // =========================================================================

    /// Add an already constructed shape in the geom's frame.
    pub fn add_shape(&mut self, shape: Shape) -> &mut Self {
        self.shapes.push(shape);
        self.dirty = true;
        self
    }

    /// Add a shape placed at `offset` in the geom's frame.
    ///
    /// Primitives are wrapped in an offset shape; meshes and height fields
    /// get their vertices transformed instead.
    pub fn add_shape_at(&mut self, shape: Shape, offset: Pose) -> Result<&mut Self> {
        let placed = match shape {
            Shape::TriMesh(mesh) => transform_mesh(&mesh, &offset)?,
            Shape::HeightField(field) => transform_mesh(field.mesh(), &offset)?,
            primitive => Shape::offset(primitive, offset)?,
        };
        Ok(self.add_shape(placed))
    }

    /// Add a sphere centered at the geom origin.
    pub fn add_sphere(&mut self, radius: f64) -> Result<&mut Self> {
        Ok(self.add_shape(Shape::sphere(radius)?))
    }

    /// Add a box with full edge lengths `lx, ly, lz`.
    pub fn add_cuboid(&mut self, lx: f64, ly: f64, lz: f64) -> Result<&mut Self> {
        Ok(self.add_shape(Shape::cuboid(lx, ly, lz)?))
    }

    /// Add a cylinder along the local z axis.
    pub fn add_cylinder(&mut self, radius: f64, height: f64) -> Result<&mut Self> {
        Ok(self.add_shape(Shape::cylinder(radius, height)?))
    }

    /// Add a capsule along the local z axis.
    pub fn add_capsule(&mut self, radius: f64, height: f64) -> Result<&mut Self> {
        Ok(self.add_shape(Shape::capsule(radius, height)?))
    }

    /// Add the half-space below the local xy plane.
    pub fn add_plane(&mut self) -> &mut Self {
        self.add_shape(Shape::plane())
    }

    /// Add a single triangle.
    pub fn add_triangle(
        &mut self,
        p0: Point3<f64>,
        p1: Point3<f64>,
        p2: Point3<f64>,
    ) -> Result<&mut Self> {
        Ok(self.add_shape(Shape::triangle(p0, p1, p2)?))
    }

    /// Add a triangle mesh.
    pub fn add_trimesh(
        &mut self,
        points: &[Point3<f64>],
        triangles: &[[u32; 3]],
    ) -> Result<&mut Self> {
        Ok(self.add_shape(Shape::trimesh(points, triangles)?))
    }

    /// Add the convex hull of a point set.
    pub fn add_convex_hull(&mut self, points: &[Point3<f64>]) -> Result<&mut Self> {
        Ok(self.add_shape(Shape::convex_hull(points)?))
    }

    /// Add a height field of `nx × ny` samples.
    pub fn add_height_field(
        &mut self,
        nx: usize,
        ny: usize,
        dx: f64,
        dy: f64,
        heights: &[f64],
    ) -> Result<&mut Self> {
        Ok(self.add_shape(Shape::height_field(nx, ny, dx, dy, heights)?))
    }

    /// Shapes in insertion order.
    #[must_use]
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    // =========================================================================
    // Tree
    // =========================================================================

    /// Build the OBB tree around the current shapes.
    pub fn build(&mut self, config: &BuildConfig) {
        self.tree = ObbTree::build(&self.shapes, config);
        self.dirty = false;
    }

    /// True if shapes were added since the last build.
    #[must_use]
    pub const fn needs_rebuild(&self) -> bool {
        self.dirty
    }

    /// The tree of the last build.
    #[must_use]
    pub const fn tree(&self) -> &ObbTree {
        &self.tree
    }

    /// World bounding box of the built tree, `None` when it is empty.
    #[must_use]
    pub fn aabb(&self) -> Option<Aabb> {
        self.tree.root_obb().map(|obb| Aabb::from_obb(obb, &self.pose))
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Ask contact persistence to remember up to `capacity` contacts for
    /// every pair involving this geom (0 disables).
    pub fn set_contact_persistence(&mut self, capacity: usize) {
        self.persistence = capacity;
    }

    /// Requested persistent contacts per pair.
    #[must_use]
    pub const fn contact_persistence(&self) -> usize {
        self.persistence
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// True if any leaf of this geom collides with a leaf of `other`.
    ///
    /// Uses the trees of the last build; an unbuilt geom never collides.
    #[must_use]
    pub fn collide(&self, other: &Self, narrow: &NarrowPhase) -> bool {
        self.tree
            .overlap_pairs(&self.pose, &other.tree, &other.pose, |a, b| {
                if narrow.collide(a, &self.pose, b, &other.pose) {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .is_break()
    }

    /// Contacts between this geom and `other`, normals pointing toward
    /// `other`, at most [`NarrowPhase::max_contacts`] of them.
    #[must_use]
    pub fn separate(&self, other: &Self, narrow: &NarrowPhase) -> ContactSet {
        let mut contacts = ContactSet::new();
        let mut pairs = 0_usize;
        let _ = self
            .tree
            .overlap_pairs(&self.pose, &other.tree, &other.pose, |a, b| {
                pairs += 1;
                contacts.extend(narrow.separate(a, &self.pose, b, &other.pose));
                ControlFlow::Continue(())
            });
        trace!(pairs, contacts = contacts.len(), "geom separation");
        contacts.limit(narrow.max_contacts());
        contacts
    }
}

fn transform_mesh(mesh: &TriMeshData, offset: &Pose) -> Result<Shape> {
    let vertices = mesh
        .vertices()
        .iter()
        .map(|v| offset.transform_point(v))
        .collect();
    Ok(Shape::TriMesh(Arc::new(TriMeshData::new(
        vertices,
        mesh.triangles().to_vec(),
    )?)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::shape::ShapeKind;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    fn built(mut geom: Geom) -> Geom {
        geom.build(&BuildConfig::default());
        geom
    }

    #[test]
    fn test_empty_geom_never_collides() {
        let empty = built(Geom::new());
        let mut sphere = Geom::new();
        sphere.add_sphere(1.0).unwrap();
        let sphere = built(sphere);

        assert!(empty.tree().is_empty());
        assert!(empty.aabb().is_none());
        assert!(!empty.collide(&sphere, &NarrowPhase::default()));
        assert!(!sphere.collide(&empty, &NarrowPhase::default()));
        assert!(sphere.separate(&empty, &NarrowPhase::default()).is_empty());
    }

    #[test]
    fn test_dirty_until_built() {
        let mut geom = Geom::new();
        assert!(!geom.needs_rebuild());
        geom.add_sphere(0.5).unwrap().add_cuboid(1.0, 1.0, 1.0).unwrap();
        assert!(geom.needs_rebuild());
        assert!(geom.tree().is_empty());

        geom.build(&BuildConfig::default());
        assert!(!geom.needs_rebuild());
        assert_eq!(geom.tree().stats().leaf_count, 2);
    }

    #[test]
    fn test_invalid_shape_rejected() {
        let mut geom = Geom::new();
        assert!(geom.add_sphere(-1.0).unwrap_err().is_shape_error());
        assert!(geom.add_cuboid(1.0, 0.0, 1.0).is_err());
        assert!(geom.shapes().is_empty());
    }

    #[test]
    fn test_offset_primitive_is_wrapped() {
        let mut geom = Geom::new();
        geom.add_shape_at(
            Shape::sphere(0.1).unwrap(),
            Pose::from_position(Point3::new(1.0, 0.0, 0.0)),
        )
        .unwrap();
        assert_eq!(geom.shapes()[0].kind(), ShapeKind::Offset);

        let geom = built(geom);
        let aabb = geom.aabb().unwrap();
        assert_relative_eq!(aabb.center(), Point3::new(1.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_offset_mesh_moves_vertices() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let mesh = Shape::trimesh(&points, &[[0, 1, 2]]).unwrap();

        let mut geom = Geom::new();
        geom.add_shape_at(mesh, Pose::from_position(Point3::new(0.0, 0.0, 2.0)))
            .unwrap();
        match &geom.shapes()[0] {
            Shape::TriMesh(data) => assert_relative_eq!(data.vertices()[1].z, 2.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_aabb_follows_pose() {
        let mut geom = Geom::new();
        geom.add_cuboid(2.0, 2.0, 2.0).unwrap();
        let mut geom = built(geom);
        geom.set_position(Point3::new(5.0, 0.0, 0.0));

        let aabb = geom.aabb().unwrap();
        assert_relative_eq!(aabb.min, Point3::new(4.0, -1.0, -1.0), epsilon = 1e-9);
        assert_relative_eq!(aabb.max, Point3::new(6.0, 1.0, 1.0), epsilon = 1e-9);
    }

    #[test]
    fn test_compound_collision_follows_pose() {
        let mut compound = Geom::new();
        compound
            .add_cuboid(0.5, 1.0, 2.0)
            .unwrap()
            .add_sphere(0.5)
            .unwrap();
        let mut compound = built(compound);

        let mut cylinder = Geom::new();
        cylinder.add_cylinder(0.3, 1.0).unwrap();
        cylinder.set_position(Point3::new(1.0, 1.0, -1.0));
        let cylinder = built(cylinder);

        let narrow = NarrowPhase::default();
        assert!(!compound.collide(&cylinder, &narrow));

        compound.set_position(Point3::new(0.0, 0.5, -0.3));
        compound.set_euler(FRAC_PI_4, -FRAC_PI_4, 0.0);
        assert!(compound.collide(&cylinder, &narrow));
        assert!(cylinder.collide(&compound, &narrow));
    }

    #[test]
    fn test_separate_limits_contacts() {
        let mut ground = Geom::new();
        ground.add_plane();
        let ground = built(ground);

        let mut boxes = Geom::new();
        for x in [-2.0, 0.0, 2.0] {
            boxes
                .add_shape_at(
                    Shape::cuboid(1.0, 1.0, 1.0).unwrap(),
                    Pose::from_position(Point3::new(x, 0.0, 0.0)),
                )
                .unwrap();
        }
        let mut boxes = built(boxes);
        boxes.set_position(Point3::new(0.0, 0.0, 0.4));

        let all = ground.separate(&boxes, &NarrowPhase::default());
        assert!(all.len() >= 3);
        assert!(all.iter().all(|c| c.normal.z > 0.99));

        let limited = ground.separate(&boxes, &NarrowPhase::new(Default::default(), 2));
        assert_eq!(limited.len(), 2);
    }
}
