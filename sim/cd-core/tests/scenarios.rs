//! Reference collision scenarios exercised through the public API.
//!
//! Run with: cargo test -p cd-core --test scenarios

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::f64::consts::{FRAC_PI_4, PI};

use approx::assert_relative_eq;
use cd_core::{BuildConfig, BuildStrategy, FitMethod, Geom, NarrowPhase, Obb, ObbTree, Pose, Shape};
use nalgebra::{Matrix3, Point3, Vector3};

/// Tolerance for OBB containment of fitted geometry.
const CONTAINMENT_TOL: f64 = 1e-9;

/// Tolerance for contact depths computed in closed form.
const DEPTH_TOL: f64 = 1e-9;

fn at(x: f64, y: f64, z: f64) -> Pose {
    Pose::from_position(Point3::new(x, y, z))
}

fn built(mut geom: Geom) -> Geom {
    geom.build(&BuildConfig::default());
    geom
}

fn sphere_geom(radius: f64, pose: Pose) -> Geom {
    let mut geom = Geom::at(pose);
    geom.add_sphere(radius).unwrap();
    built(geom)
}

/// A bumpy grid of `n × n` quads, triangulated.
fn wavy_grid(n: u32, scale: f64) -> (Vec<Point3<f64>>, Vec<[u32; 3]>) {
    let mut points = Vec::new();
    for j in 0..=n {
        for i in 0..=n {
            let (x, y) = (f64::from(i) * scale, f64::from(j) * scale);
            points.push(Point3::new(x, y, 0.1 * (x * 1.7).sin() * (y * 1.3).cos()));
        }
    }
    let mut triangles = Vec::new();
    for j in 0..n {
        for i in 0..n {
            let a = j * (n + 1) + i;
            triangles.push([a, a + 1, a + n + 2]);
            triangles.push([a, a + n + 2, a + n + 1]);
        }
    }
    (points, triangles)
}

// =============================================================================
// Primitive pairs
// =============================================================================

#[test]
fn spheres_collide_below_radius_sum() {
    let np = NarrowPhase::default();
    let s = Shape::sphere(0.5).unwrap();

    assert!(np.collide(&s, &Pose::identity(), &s, &at(0.9, 0.0, 0.0)));
    assert!(!np.collide(&s, &Pose::identity(), &s, &at(1.1, 0.0, 0.0)));

    let contacts = np.separate(&s, &Pose::identity(), &s, &at(0.9, 0.0, 0.0));
    let c = contacts.deepest().unwrap();
    assert_relative_eq!(c.depth, 0.1, epsilon = DEPTH_TOL);
    assert_relative_eq!(c.normal, Vector3::x(), epsilon = DEPTH_TOL);
}

#[test]
fn box_and_sphere_collide_on_face() {
    let np = NarrowPhase::default();
    let cuboid = Shape::cuboid(0.5, 1.0, 2.0).unwrap();
    let sphere = Shape::sphere(0.5).unwrap();

    // Half-width 0.25 along x: 0.7 < 0.25 + 0.5.
    assert!(np.collide(&cuboid, &Pose::identity(), &sphere, &at(0.7, 0.0, 0.0)));
    assert!(np.collide(&sphere, &at(0.7, 0.0, 0.0), &cuboid, &Pose::identity()));
    assert!(!np.collide(&cuboid, &Pose::identity(), &sphere, &at(0.8, 0.0, 0.0)));
}

#[test]
fn small_sphere_and_flipped_box() {
    let np = NarrowPhase::default();
    let sphere = Shape::sphere(0.2).unwrap();
    let cuboid = Shape::cuboid(0.3, 0.2, 0.1).unwrap();

    assert!(np.collide(&sphere, &Pose::identity(), &cuboid, &Pose::identity()));

    let flipped = Pose::from_euler(Point3::new(0.0, 0.0, 1.0), PI, 0.0, 0.0);
    assert!(!np.collide(&sphere, &Pose::identity(), &cuboid, &flipped));
}

#[test]
fn box_resting_on_plane() {
    let np = NarrowPhase::default();
    let cuboid = Shape::cuboid(1.0, 1.0, 1.0).unwrap();

    let contacts = np.separate(&Shape::plane(), &Pose::identity(), &cuboid, &at(0.0, 0.0, 0.4));
    assert!(!contacts.is_empty());
    for c in &contacts {
        assert_relative_eq!(c.normal, Vector3::z(), epsilon = DEPTH_TOL);
        assert_relative_eq!(c.depth, 0.1, epsilon = DEPTH_TOL);
    }

    // Resting exactly on the plane is touching, not colliding.
    assert!(!np.collide(&Shape::plane(), &Pose::identity(), &cuboid, &at(0.0, 0.0, 0.5)));
}

// =============================================================================
// Compound geoms
// =============================================================================

#[test]
fn compound_geom_regression() {
    let mut compound = Geom::new();
    compound
        .add_cuboid(0.5, 1.0, 2.0)
        .unwrap()
        .add_sphere(0.5)
        .unwrap();
    let mut compound = built(compound);

    let mut cylinder = Geom::at(at(1.0, 1.0, -1.0));
    cylinder.add_cylinder(0.3, 1.0).unwrap();
    let cylinder = built(cylinder);

    let np = NarrowPhase::default();
    assert!(!compound.collide(&cylinder, &np));

    compound.set_position(Point3::new(0.0, 0.5, -0.3));
    compound.set_euler(FRAC_PI_4, -FRAC_PI_4, 0.0);
    assert!(compound.collide(&cylinder, &np));

    let contacts = compound.separate(&cylinder, &np);
    assert!(!contacts.is_empty());
    assert!(contacts.iter().all(|c| c.depth > 0.0));
}

#[test]
fn offset_shapes_in_one_geom() {
    let mut dumbbell = Geom::new();
    for x in [-1.0, 1.0] {
        dumbbell
            .add_shape_at(Shape::sphere(0.3).unwrap(), at(x, 0.0, 0.0))
            .unwrap();
    }
    dumbbell
        .add_shape_at(
            Shape::capsule(0.05, 2.0).unwrap(),
            Pose::from_euler(Point3::origin(), 0.0, PI / 2.0, 0.0),
        )
        .unwrap();
    let dumbbell = built(dumbbell);
    let np = NarrowPhase::default();

    // Gap between the end spheres is only spanned by the thin bar.
    assert!(!dumbbell.collide(&sphere_geom(0.1, at(0.0, 0.3, 0.0)), &np));
    assert!(dumbbell.collide(&sphere_geom(0.1, at(0.0, 0.1, 0.0)), &np));
    assert!(dumbbell.collide(&sphere_geom(0.1, at(1.2, 0.3, 0.0)), &np));
}

// =============================================================================
// Meshes
// =============================================================================

#[test]
fn sphere_against_trimesh_geom() {
    let (points, triangles) = wavy_grid(8, 0.5);
    let mut terrain = Geom::new();
    terrain.add_trimesh(&points, &triangles).unwrap();
    let terrain = built(terrain);
    assert_eq!(terrain.tree().stats().leaf_count, triangles.len());

    let np = NarrowPhase::default();
    assert!(terrain.collide(&sphere_geom(0.3, at(2.0, 2.0, 0.2)), &np));
    assert!(!terrain.collide(&sphere_geom(0.3, at(2.0, 2.0, 0.6)), &np));
    assert!(!terrain.collide(&sphere_geom(0.3, at(10.0, 2.0, 0.0)), &np));
}

#[test]
fn height_field_against_box() {
    let heights: Vec<f64> = (0..25).map(|i| if i == 12 { 1.0 } else { 0.0 }).collect();
    let mut field = Geom::new();
    field.add_height_field(5, 5, 1.0, 1.0, &heights).unwrap();
    let field = built(field);

    let mut query = Geom::new();
    query.add_cuboid(0.2, 0.2, 0.2).unwrap();
    let mut query = built(query);

    let np = NarrowPhase::default();
    query.set_position(Point3::new(2.0, 2.0, 0.95));
    assert!(field.collide(&query, &np));
    query.set_position(Point3::new(0.5, 0.5, 0.5));
    assert!(!field.collide(&query, &np));
}

#[test]
fn crossing_triangles() {
    let np = NarrowPhase::default();
    let flat = Shape::triangle(
        Point3::new(-1.0, -1.0, 0.0),
        Point3::new(1.0, -1.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
    )
    .unwrap();
    let upright = Shape::triangle(
        Point3::new(0.0, 0.0, -1.0),
        Point3::new(0.0, 0.0, 1.0),
        Point3::new(0.0, 2.0, 0.0),
    )
    .unwrap();

    assert!(np.collide(&flat, &Pose::identity(), &upright, &Pose::identity()));
    assert!(!np.collide(&flat, &Pose::identity(), &upright, &at(0.0, 0.0, 1.5)));
}

// =============================================================================
// Bounding volumes
// =============================================================================

#[test]
fn fitted_obb_contains_mesh_vertices() {
    let (points, triangles) = wavy_grid(6, 0.3);
    let mesh = Shape::trimesh(&points, &triangles).unwrap();

    for fit in [FitMethod::calipers(), FitMethod::naive()] {
        for strategy in [BuildStrategy::TopDown, BuildStrategy::BottomUp] {
            let config = BuildConfig::default().fit(fit).strategy(strategy);
            let tree = ObbTree::build(std::slice::from_ref(&mesh), &config);
            let root = tree.root_obb().unwrap();
            for p in &points {
                assert!(
                    root.contains(p, CONTAINMENT_TOL),
                    "{} / {strategy:?} misses {p}",
                    fit.name()
                );
            }
        }
    }
}

#[test]
fn rotated_obbs_separate_on_face_axis() {
    let half = Vector3::new(0.5, 0.5, 0.5);
    let a = Obb::axis_aligned(Point3::origin(), half);
    let b = Obb::new(Point3::origin(), Matrix3::identity(), half);

    // The rotated box's own x axis separates them; bounding spheres overlap.
    let diagonal = Pose::from_euler(Point3::new(1.2, 1.2, 0.0), 0.0, 0.0, FRAC_PI_4);
    assert!(a.disjoint(&Pose::identity(), &b, &diagonal));

    let close = Pose::from_euler(Point3::new(0.8, 0.8, 0.0), 0.0, 0.0, FRAC_PI_4);
    assert!(!a.disjoint(&Pose::identity(), &b, &close));
}
