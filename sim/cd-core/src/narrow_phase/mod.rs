//! Shape-pair collision tests and contact generation.
//!
//! [`NarrowPhase`] dispatches on the pair of shape kinds. Offsets are
//! re-based first; then pair overrides installed with
//! [`NarrowPhase::set_collider`] and [`NarrowPhase::set_separator`] take
//! precedence, composites are expanded, pairs with a closed-form routine
//! use it, and everything else falls back to minkowski portal refinement on
//! the shapes' support mappings.
//!
//! | Pair | `collide` | `separate` |
//! |------|-----------|------------|
//! | sphere–sphere / box / capsule / triangle | closed form | closed form |
//! | capsule–capsule | closed form | closed form |
//! | box–box | 15-axis SAT | MPR |
//! | box–triangle | 13-axis SAT | MPR |
//! | triangle–triangle | 11-axis SAT | MPR |
//! | plane–sphere / box / capsule / triangle | support depth | closed form |
//! | plane–other | support depth | deepest support point |
//! | plane–plane | analytic | none |
//! | anything else | MPR | MPR |
//!
//! Touching shapes (zero penetration) never collide. Flat shapes follow the
//! same rule: two triangles whose planes only touch, coplanar triangles
//! included, do not collide on either the SAT or the MPR path.

mod mpr;
mod sat;
mod separate;

pub use mpr::{closest_point_on_triangle, mpr_intersect, mpr_penetration};

use cd_types::{CollisionConfig, ContactSet, MprConfig, Pose};
use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use tracing::{debug, warn};

use crate::shape::{Shape, ShapeKind};

/// Replacement collision test for a pair of shape kinds.
///
/// Receives the narrow phase so it can fall back to the built-in routines.
pub type CollideFn = fn(&NarrowPhase, &Shape, &Pose, &Shape, &Pose) -> bool;

/// Replacement contact generator for a pair of shape kinds. Normals must
/// point from the first shape toward the second.
pub type SeparateFn = fn(&NarrowPhase, &Shape, &Pose, &Shape, &Pose) -> ContactSet;

/// A shape placed in the world.
#[derive(Debug, Clone, Copy)]
pub struct Placed<'a> {
    /// The shape.
    pub shape: &'a Shape,
    /// Its world placement.
    pub pose: Pose,
}

impl<'a> Placed<'a> {
    /// Place `shape` at `pose`.
    #[must_use]
    pub const fn new(shape: &'a Shape, pose: Pose) -> Self {
        Self { shape, pose }
    }

    /// World support point; shapes without a support mapping answer with
    /// their origin.
    #[must_use]
    pub fn support(&self, dir: &Vector3<f64>) -> Point3<f64> {
        self.shape
            .support_at(&self.pose, dir)
            .unwrap_or(self.pose.position)
    }

    /// World interior point.
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        self.shape.center(&self.pose)
    }
}

/// Pairwise collision tests.
#[derive(Debug, Clone)]
pub struct NarrowPhase {
    mpr: MprConfig,
    max_contacts: usize,
    colliders: HashMap<(ShapeKind, ShapeKind), CollideFn>,
    separators: HashMap<(ShapeKind, ShapeKind), SeparateFn>,
}

impl Default for NarrowPhase {
    fn default() -> Self {
        Self::from_config(&CollisionConfig::default())
    }
}

impl NarrowPhase {
    /// Create a narrow phase with explicit settings.
    #[must_use]
    pub fn new(mpr: MprConfig, max_contacts: usize) -> Self {
        Self {
            mpr,
            max_contacts,
            colliders: HashMap::new(),
            separators: HashMap::new(),
        }
    }

    /// Narrow-phase settings of an engine configuration.
    #[must_use]
    pub fn from_config(config: &CollisionConfig) -> Self {
        Self::new(config.mpr, config.max_contacts)
    }

    /// Maximum number of contacts reported per shape pair.
    #[must_use]
    pub const fn max_contacts(&self) -> usize {
        self.max_contacts
    }

    // =========================================================================
    // Pair overrides
    // =========================================================================

    /// Replace the collision test of shapes of kind `a` against kind `b`.
    ///
    /// The override also serves the reversed pair with its arguments
    /// swapped, unless that pair has an override of its own. Offsets are
    /// re-based before overrides are consulted, so `Offset` is never seen.
    /// Returns the replaced override.
    pub fn set_collider(&mut self, a: ShapeKind, b: ShapeKind, collide: CollideFn) -> Option<CollideFn> {
        debug!(a = a.name(), b = b.name(), "collider override");
        self.colliders.insert((a, b), collide)
    }

    /// Replace the contact generator of shapes of kind `a` against kind `b`.
    ///
    /// The reversed pair is served with swapped arguments and flipped
    /// normals, unless it has an override of its own. Returns the replaced
    /// override.
    pub fn set_separator(&mut self, a: ShapeKind, b: ShapeKind, separate: SeparateFn) -> Option<SeparateFn> {
        debug!(a = a.name(), b = b.name(), "separator override");
        self.separators.insert((a, b), separate)
    }

    /// Restore the built-in collision test of a pair.
    pub fn remove_collider(&mut self, a: ShapeKind, b: ShapeKind) -> Option<CollideFn> {
        self.colliders.remove(&(a, b))
    }

    /// Restore the built-in contact generator of a pair.
    pub fn remove_separator(&mut self, a: ShapeKind, b: ShapeKind) -> Option<SeparateFn> {
        self.separators.remove(&(a, b))
    }

    fn overridden_collide(&self, a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> Option<bool> {
        if self.colliders.is_empty() {
            return None;
        }
        let (ka, kb) = (a.kind(), b.kind());
        if let Some(collide) = self.colliders.get(&(ka, kb)) {
            Some(collide(self, a, pose_a, b, pose_b))
        } else {
            self.colliders
                .get(&(kb, ka))
                .map(|collide| collide(self, b, pose_b, a, pose_a))
        }
    }

    fn overridden_separate(&self, a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> Option<ContactSet> {
        if self.separators.is_empty() {
            return None;
        }
        let (ka, kb) = (a.kind(), b.kind());
        if let Some(separate) = self.separators.get(&(ka, kb)) {
            Some(separate(self, a, pose_a, b, pose_b))
        } else {
            self.separators
                .get(&(kb, ka))
                .map(|separate| separate(self, b, pose_b, a, pose_a).flipped())
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// True if the shapes overlap with non-zero penetration.
    #[must_use]
    pub fn collide(&self, a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> bool {
        match (a, b) {
            (Shape::Offset { shape, pose }, _) => self.collide(shape, &pose_a.compose(pose), b, pose_b),
            (_, Shape::Offset { shape, pose }) => self.collide(a, pose_a, shape, &pose_b.compose(pose)),
            _ => self
                .overridden_collide(a, pose_a, b, pose_b)
                .unwrap_or_else(|| self.collide_builtin(a, pose_a, b, pose_b)),
        }
    }

    fn collide_builtin(&self, a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> bool {
        match (a, b) {
            _ if a.is_composite() => a
                .leaves()
                .iter()
                .any(|leaf| self.collide(leaf, pose_a, b, pose_b)),
            _ if b.is_composite() => b
                .leaves()
                .iter()
                .any(|leaf| self.collide(a, pose_a, leaf, pose_b)),

            (Shape::Plane, Shape::Plane) => separate::plane_plane_overlap(pose_a, pose_b),
            (Shape::Plane, _) => !separate::plane_support(pose_a, &Placed::new(b, *pose_b)).is_empty(),
            (_, Shape::Plane) => !separate::plane_support(pose_b, &Placed::new(a, *pose_a)).is_empty(),

            (Shape::Sphere { radius: r1 }, Shape::Sphere { radius: r2 }) => {
                (pose_b.position - pose_a.position).norm() < r1 + r2
            }
            (Shape::Cuboid { half_extents: ha }, Shape::Cuboid { half_extents: hb }) => {
                sat::box_box(ha, pose_a, hb, pose_b)
            }
            (Shape::Cuboid { half_extents }, _) if b.triangle_vertices().is_some() => {
                world_triangle(b, pose_b)
                    .is_some_and(|t| sat::box_triangle(half_extents, pose_a, &t))
            }
            (_, Shape::Cuboid { half_extents }) if a.triangle_vertices().is_some() => {
                world_triangle(a, pose_a)
                    .is_some_and(|t| sat::box_triangle(half_extents, pose_b, &t))
            }
            _ => {
                if let Some(contacts) = separate::round_pair(a, pose_a, b, pose_b) {
                    return !contacts.is_empty();
                }
                match (world_triangle(a, pose_a), world_triangle(b, pose_b)) {
                    (Some(ta), Some(tb)) => sat::triangle_triangle(&ta, &tb),
                    _ => self.collide_generic(a, pose_a, b, pose_b),
                }
            }
        }
    }

    /// Contacts between the shapes, at most `max_contacts` of them.
    ///
    /// Normals point from `a` towards `b`. Empty when the shapes do not
    /// collide.
    #[must_use]
    pub fn separate(&self, a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> ContactSet {
        let mut contacts = self.separate_unlimited(a, pose_a, b, pose_b);
        contacts.limit(self.max_contacts);
        contacts
    }

    fn separate_unlimited(&self, a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> ContactSet {
        match (a, b) {
            (Shape::Offset { shape, pose }, _) => {
                self.separate_unlimited(shape, &pose_a.compose(pose), b, pose_b)
            }
            (_, Shape::Offset { shape, pose }) => {
                self.separate_unlimited(a, pose_a, shape, &pose_b.compose(pose))
            }
            _ => self
                .overridden_separate(a, pose_a, b, pose_b)
                .unwrap_or_else(|| self.separate_builtin(a, pose_a, b, pose_b)),
        }
    }

    fn separate_builtin(&self, a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> ContactSet {
        match (a, b) {
            _ if a.is_composite() => a
                .leaves()
                .iter()
                .flat_map(|leaf| self.separate_unlimited(leaf, pose_a, b, pose_b))
                .collect(),
            _ if b.is_composite() => b
                .leaves()
                .iter()
                .flat_map(|leaf| self.separate_unlimited(a, pose_a, leaf, pose_b))
                .collect(),

            (Shape::Plane, Shape::Plane) => {
                warn!("plane-plane pair has no contact routine");
                ContactSet::new()
            }
            (Shape::Plane, Shape::Sphere { radius }) => separate::plane_sphere(pose_a, *radius, pose_b),
            (Shape::Plane, Shape::Cuboid { half_extents }) => {
                separate::plane_box(pose_a, half_extents, pose_b, self.max_contacts)
            }
            (
                Shape::Plane,
                Shape::Capsule {
                    radius,
                    half_height,
                },
            ) => separate::plane_capsule(pose_a, *radius, *half_height, pose_b, self.max_contacts),
            (Shape::Plane, _) => match world_triangle(b, pose_b) {
                Some(t) => separate::plane_triangle(pose_a, &t),
                None => separate::plane_support(pose_a, &Placed::new(b, *pose_b)),
            },
            (_, Shape::Plane) => self.separate_builtin(b, pose_b, a, pose_a).flipped(),

            _ => separate::round_pair(a, pose_a, b, pose_b)
                .unwrap_or_else(|| self.separate_generic(a, pose_a, b, pose_b)),
        }
    }

    /// Portal refinement verdict, bypassing the closed-form routines.
    ///
    /// Triangle pairs separated or only touching along a face normal are
    /// rejected up front, matching the separating-axis routine.
    #[must_use]
    pub fn collide_generic(&self, a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> bool {
        if let (Some(ta), Some(tb)) = (world_triangle(a, pose_a), world_triangle(b, pose_b)) {
            if sat::separated_by_faces(&ta, &tb) {
                return false;
            }
        }
        mpr_intersect(&Placed::new(a, *pose_a), &Placed::new(b, *pose_b), &self.mpr)
    }

    /// Portal refinement contact, bypassing the closed-form routines.
    #[must_use]
    pub fn separate_generic(&self, a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> ContactSet {
        mpr_penetration(&Placed::new(a, *pose_a), &Placed::new(b, *pose_b), &self.mpr)
            .map_or_else(ContactSet::new, ContactSet::single)
    }
}

fn world_triangle(shape: &Shape, pose: &Pose) -> Option<[Point3<f64>; 3]> {
    shape
        .triangle_vertices()
        .map(|t| t.map(|p| pose.transform_point(&p)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    fn at(x: f64, y: f64, z: f64) -> Pose {
        Pose::from_position(Point3::new(x, y, z))
    }

    #[test]
    fn test_sphere_pairs() {
        let np = NarrowPhase::default();
        let s = Shape::sphere(0.5).unwrap();
        assert!(np.collide(&s, &Pose::identity(), &s, &at(0.9, 0.0, 0.0)));
        assert!(!np.collide(&s, &Pose::identity(), &s, &at(1.1, 0.0, 0.0)));
        assert!(!np.collide(&s, &Pose::identity(), &s, &at(1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_box_sphere() {
        let np = NarrowPhase::default();
        let cuboid = Shape::cuboid(0.5, 1.0, 2.0).unwrap();
        let sphere = Shape::sphere(0.5).unwrap();
        assert!(np.collide(&cuboid, &Pose::identity(), &sphere, &at(0.7, 0.0, 0.0)));
        assert!(np.collide(&sphere, &at(0.7, 0.0, 0.0), &cuboid, &Pose::identity()));
        assert!(!np.collide(&cuboid, &Pose::identity(), &sphere, &at(0.8, 0.0, 0.0)));
    }

    #[test]
    fn test_offset_rebasing() {
        let np = NarrowPhase::default();
        let off = Shape::offset(Shape::sphere(0.5).unwrap(), at(2.0, 0.0, 0.0)).unwrap();
        let s = Shape::sphere(0.5).unwrap();
        assert!(np.collide(&off, &Pose::identity(), &s, &at(2.5, 0.0, 0.0)));
        assert!(!np.collide(&off, &Pose::identity(), &s, &at(0.5, 0.0, 0.0)));

        let rotated = Pose::from_euler(Point3::origin(), 0.0, 0.0, std::f64::consts::FRAC_PI_2);
        assert!(np.collide(&off, &rotated, &s, &at(0.0, 2.5, 0.0)));
        assert!(np.collide(&s, &at(0.0, 2.5, 0.0), &off, &rotated));
    }

    #[test]
    fn test_plane_pairs() {
        let np = NarrowPhase::default();
        let plane = Shape::plane();
        let cuboid = Shape::cuboid(1.0, 1.0, 1.0).unwrap();

        assert!(np.collide(&plane, &Pose::identity(), &cuboid, &at(3.0, -2.0, 0.4)));
        assert!(np.collide(&cuboid, &at(3.0, -2.0, 0.4), &plane, &Pose::identity()));
        assert!(!np.collide(&plane, &Pose::identity(), &cuboid, &at(0.0, 0.0, 0.6)));

        let contacts = np.separate(&plane, &Pose::identity(), &cuboid, &at(0.0, 0.0, 0.4));
        assert_eq!(contacts.len(), 4);
        let swapped = np.separate(&cuboid, &at(0.0, 0.0, 0.4), &plane, &Pose::identity());
        assert_eq!(swapped.len(), 4);
        for c in &swapped {
            assert_relative_eq!(c.normal, -Vector3::z());
        }

        assert!(np.separate(&plane, &Pose::identity(), &plane, &at(0.0, 0.0, 1.0)).is_empty());
    }

    #[test]
    fn test_triangle_pairs() {
        let np = NarrowPhase::default();
        let tri = Shape::triangle(
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        let cuboid = Shape::cuboid(0.4, 0.4, 0.4).unwrap();
        let tilted = Pose::from_euler(Point3::new(0.0, 0.0, 0.25), FRAC_PI_4, FRAC_PI_4, 0.0);

        assert!(np.collide(&tri, &Pose::identity(), &cuboid, &tilted));
        assert!(np.collide_generic(&tri, &Pose::identity(), &cuboid, &tilted));
        assert!(!np.collide(&tri, &Pose::identity(), &cuboid, &at(0.0, 0.0, 0.3)));
        assert!(!np.collide_generic(&tri, &Pose::identity(), &cuboid, &at(0.0, 0.0, 0.3)));

        let standing = Pose::from_euler(Point3::new(0.0, 0.0, 0.0), FRAC_PI_4 * 2.0, 0.0, 0.0);
        assert!(np.collide(&tri, &Pose::identity(), &tri, &standing));
    }

    #[test]
    fn test_closed_forms_agree_with_generic() {
        let np = NarrowPhase::default();
        let sphere = Shape::sphere(0.4).unwrap();
        let capsule = Shape::capsule(0.2, 1.0).unwrap();
        let cuboid = Shape::cuboid(1.0, 0.6, 0.8).unwrap();

        // Expected verdicts for b at x = 0.3, 0.5, 0.8, 1.4.
        let cases = [
            (&sphere, &capsule, [true, true, false, false]),
            (&capsule, &capsule, [true, false, false, false]),
            (&sphere, &cuboid, [true, true, true, false]),
            (&cuboid, &sphere, [true, true, true, false]),
        ];
        for (a, b, expected) in cases {
            for (x, hit) in [0.3, 0.5, 0.8, 1.4].into_iter().zip(expected) {
                let pose = at(x, 0.0, 0.1);
                assert_eq!(np.collide(a, &Pose::identity(), b, &pose), hit, "{:?} at {x}", a.kind());
                assert_eq!(np.collide_generic(a, &Pose::identity(), b, &pose), hit);
                assert_eq!(!np.separate(a, &Pose::identity(), b, &pose).is_empty(), hit);
            }
        }
    }

    #[test]
    fn test_coplanar_triangles_never_collide() {
        let np = NarrowPhase::default();
        let tri = Shape::triangle(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        )
        .unwrap();

        assert!(!np.collide(&tri, &Pose::identity(), &tri, &Pose::identity()));
        assert!(!np.collide_generic(&tri, &Pose::identity(), &tri, &Pose::identity()));

        let shifted = at(0.2, 0.2, 0.0);
        assert!(!np.collide(&tri, &Pose::identity(), &tri, &shifted));
        assert!(!np.collide_generic(&tri, &Pose::identity(), &tri, &shifted));
    }

    fn never(_: &NarrowPhase, _: &Shape, _: &Pose, _: &Shape, _: &Pose) -> bool {
        false
    }

    fn marker(_: &NarrowPhase, _: &Shape, a: &Pose, _: &Shape, _: &Pose) -> ContactSet {
        ContactSet::single(cd_types::Contact::new(a.position, Vector3::z(), 1.0))
    }

    #[test]
    fn test_pair_overrides() {
        let mut np = NarrowPhase::default();
        let sphere = Shape::sphere(0.5).unwrap();
        let cuboid = Shape::cuboid(1.0, 1.0, 1.0).unwrap();
        let near = at(0.5, 0.0, 0.0);

        assert!(np.collide(&sphere, &near, &cuboid, &Pose::identity()));
        assert!(np.set_collider(ShapeKind::Sphere, ShapeKind::Cuboid, never).is_none());
        assert!(!np.collide(&sphere, &near, &cuboid, &Pose::identity()));
        assert!(!np.collide(&cuboid, &Pose::identity(), &sphere, &near));
        assert!(np.collide(&sphere, &near, &sphere, &Pose::identity()));

        // Offsets are re-based before overrides apply.
        let offset = Shape::offset(sphere.clone(), near).unwrap();
        assert!(!np.collide(&offset, &Pose::identity(), &cuboid, &Pose::identity()));

        np.set_separator(ShapeKind::Sphere, ShapeKind::Cuboid, marker);
        let forward = np.separate(&sphere, &near, &cuboid, &Pose::identity());
        assert_relative_eq!(forward.deepest().unwrap().normal, Vector3::z());
        let reversed = np.separate(&cuboid, &Pose::identity(), &sphere, &near);
        assert_relative_eq!(reversed.deepest().unwrap().normal, -Vector3::z());
        assert_relative_eq!(reversed.deepest().unwrap().position, near.position);

        assert!(np.remove_collider(ShapeKind::Sphere, ShapeKind::Cuboid).is_some());
        assert!(np.remove_separator(ShapeKind::Sphere, ShapeKind::Cuboid).is_some());
        assert!(np.collide(&sphere, &near, &cuboid, &Pose::identity()));
        assert_relative_eq!(
            np.separate(&sphere, &near, &cuboid, &Pose::identity())
                .deepest()
                .unwrap()
                .depth,
            0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_trimesh_expands() {
        let np = NarrowPhase::default();
        let mesh = Shape::trimesh(
            &[
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(4.0, 0.0, 0.0),
                Point3::new(0.0, 4.0, 0.0),
                Point3::new(4.0, 4.0, 0.0),
            ],
            &[[0, 1, 2], [1, 3, 2]],
        )
        .unwrap();
        let s = Shape::sphere(0.2).unwrap();
        assert!(np.collide(&mesh, &Pose::identity(), &s, &at(3.5, 3.5, 0.1)));
        assert!(!np.collide(&mesh, &Pose::identity(), &s, &at(3.5, 3.5, 0.3)));

        let contacts = np.separate(&s, &at(3.5, 3.5, 0.1), &mesh, &Pose::identity());
        assert_eq!(contacts.len(), 1);
        assert!(contacts.deepest().unwrap().depth > 0.0);
    }

    #[test]
    fn test_contacts_limited() {
        let np = NarrowPhase::new(MprConfig::default(), 2);
        let cuboid = Shape::cuboid(1.0, 1.0, 1.0).unwrap();
        let tilted = Pose::from_euler(Point3::new(0.0, 0.0, 0.3), 0.1, 0.05, 0.0);
        let contacts = np.separate(&Shape::plane(), &Pose::identity(), &cuboid, &tilted);
        assert!(contacts.len() <= 2);
        assert!(!contacts.is_empty());
    }
}
