//! Closed-form contact generation.
//!
//! Planes are the half-space below their local xy plane; their outward
//! normal is the third column of their rotation. Contact normals point
//! from the first shape towards the second.
//!
//! Spheres and capsules are treated as a core (point or segment) inflated
//! by a radius, so their pairs reduce to the closest points of the cores.

use cd_types::{Contact, ContactSet, Pose};
use nalgebra::{Point3, Vector3};

use super::mpr::closest_point_on_triangle;
use super::Placed;
use crate::shape::{cuboid_corners, Shape, CUBOID_EDGES};

/// Squared lengths below this are treated as zero.
const EPSILON: f64 = 1e-18;

/// Contact between a point core `pa` inflated by `ra` and a point core `pb`
/// inflated by `rb`, at the middle of the overlap.
///
/// `fallback` is the normal used when the cores coincide.
fn round_contact(
    pa: &Point3<f64>,
    ra: f64,
    pb: &Point3<f64>,
    rb: f64,
    fallback: Vector3<f64>,
) -> ContactSet {
    let sep = pb - pa;
    let len = sep.norm();
    if len >= ra + rb {
        return ContactSet::new();
    }

    let depth = ra + rb - len;
    let dir = if len > 0.0 { sep / len } else { fallback };
    ContactSet::single(Contact::new(pa + dir * (ra - depth * 0.5), dir, depth))
}

/// Closest points of segments `p1 q1` and `p2 q2`.
fn closest_segment_points(
    p1: &Point3<f64>,
    q1: &Point3<f64>,
    p2: &Point3<f64>,
    q2: &Point3<f64>,
) -> (Point3<f64>, Point3<f64>) {
    let (d1, d2, r) = (q1 - p1, q2 - p2, p1 - p2);
    let (a, e, f) = (d1.norm_squared(), d2.norm_squared(), d2.dot(&r));

    let (s, t) = if a <= EPSILON && e <= EPSILON {
        (0.0, 0.0)
    } else if a <= EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(&r);
        if e <= EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(&d2);
            let denom = a * e - b * b;
            let s = if denom > EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let t = (b * s + f) / e;
            if t < 0.0 {
                ((-c / a).clamp(0.0, 1.0), 0.0)
            } else if t > 1.0 {
                (((b - c) / a).clamp(0.0, 1.0), 1.0)
            } else {
                (s, t)
            }
        }
    };
    (p1 + d1 * s, p2 + d2 * t)
}

/// End points of a capsule's core segment.
fn capsule_segment(half_height: f64, pose: &Pose) -> (Point3<f64>, Point3<f64>) {
    let axis = pose.axis(2) * half_height;
    (pose.position - axis, pose.position + axis)
}

/// Sphere–sphere contact at the middle of the overlap.
#[must_use]
pub fn sphere_sphere(r1: f64, pose1: &Pose, r2: f64, pose2: &Pose) -> ContactSet {
    round_contact(&pose1.position, r1, &pose2.position, r2, Vector3::x())
}

/// Sphere–box contact.
///
/// Outside the box the contact joins the sphere center and the closest box
/// point. A center inside the box is pushed out through the nearest face.
#[must_use]
pub fn sphere_box(radius: f64, sphere: &Pose, half_extents: &Vector3<f64>, cuboid: &Pose) -> ContactSet {
    let center = cuboid.inverse_transform_point(&sphere.position);
    let clamped = center.coords.zip_map(half_extents, |c, h| c.clamp(-h, h));

    if clamped != center.coords {
        let closest = cuboid.transform_point(&Point3::from(clamped));
        return round_contact(&sphere.position, radius, &closest, 0.0, -cuboid.axis(0));
    }

    let (axis, gap) = (0..3)
        .map(|i| (i, half_extents[i] - center[i].abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, half_extents[0]));
    let side = if center[axis] >= 0.0 { 1.0 } else { -1.0 };
    let outward = cuboid.axis(axis) * side;
    let depth = radius + gap;
    ContactSet::single(Contact::new(
        sphere.position + outward * ((gap - radius) * 0.5),
        -outward,
        depth,
    ))
}

/// Sphere–capsule contact against the closest point of the capsule core.
#[must_use]
pub fn sphere_capsule(
    radius: f64,
    sphere: &Pose,
    capsule_radius: f64,
    half_height: f64,
    capsule: &Pose,
) -> ContactSet {
    let (p, q) = capsule_segment(half_height, capsule);
    let (_, closest) = closest_segment_points(&sphere.position, &sphere.position, &p, &q);
    round_contact(&sphere.position, radius, &closest, capsule_radius, capsule.axis(0))
}

/// Capsule–capsule contact between the closest points of the two cores.
#[must_use]
pub fn capsule_capsule(
    r1: f64,
    half_height1: f64,
    pose1: &Pose,
    r2: f64,
    half_height2: f64,
    pose2: &Pose,
) -> ContactSet {
    let (p1, q1) = capsule_segment(half_height1, pose1);
    let (p2, q2) = capsule_segment(half_height2, pose2);
    let (c1, c2) = closest_segment_points(&p1, &q1, &p2, &q2);
    let fallback = pose1
        .axis(2)
        .cross(&pose2.axis(2))
        .try_normalize(EPSILON)
        .unwrap_or_else(|| pose1.axis(0));
    round_contact(&c1, r1, &c2, r2, fallback)
}

/// Sphere–triangle contact; the triangle is given in world space.
#[must_use]
pub fn sphere_triangle(radius: f64, sphere: &Pose, tri: &[Point3<f64>; 3]) -> ContactSet {
    let closest = closest_point_on_triangle(
        &sphere.position.coords,
        &tri[0].coords,
        &tri[1].coords,
        &tri[2].coords,
    );
    let fallback = (tri[1] - tri[0])
        .cross(&(tri[2] - tri[0]))
        .try_normalize(EPSILON)
        .unwrap_or_else(Vector3::x);
    round_contact(&sphere.position, radius, &Point3::from(closest), 0.0, fallback)
}

/// Closed-form contacts of pairs built from spheres, capsules, boxes and
/// triangles, or `None` when the pair has no such routine.
#[must_use]
pub fn round_pair(a: &Shape, pose_a: &Pose, b: &Shape, pose_b: &Pose) -> Option<ContactSet> {
    match (a, b) {
        (Shape::Sphere { radius: r1 }, Shape::Sphere { radius: r2 }) => {
            Some(sphere_sphere(*r1, pose_a, *r2, pose_b))
        }
        (Shape::Sphere { radius }, Shape::Cuboid { half_extents }) => {
            Some(sphere_box(*radius, pose_a, half_extents, pose_b))
        }
        (
            Shape::Sphere { radius },
            Shape::Capsule {
                radius: capsule_radius,
                half_height,
            },
        ) => Some(sphere_capsule(*radius, pose_a, *capsule_radius, *half_height, pose_b)),
        (
            Shape::Capsule {
                radius: r1,
                half_height: h1,
            },
            Shape::Capsule {
                radius: r2,
                half_height: h2,
            },
        ) => Some(capsule_capsule(*r1, *h1, pose_a, *r2, *h2, pose_b)),
        (Shape::Sphere { radius }, _) => b
            .triangle_vertices()
            .map(|t| sphere_triangle(*radius, pose_a, &t.map(|p| pose_b.transform_point(&p)))),
        (_, Shape::Sphere { .. }) => round_pair(b, pose_b, a, pose_a).map(ContactSet::flipped),
        _ => None,
    }
}

/// Plane–sphere contact halfway between the deepest point and the plane.
#[must_use]
pub fn plane_sphere(plane: &Pose, radius: f64, sphere: &Pose) -> ContactSet {
    let n = plane.axis(2);
    let height = n.dot(&(sphere.position - plane.position));
    if height >= radius {
        return ContactSet::new();
    }

    let depth = radius - height;
    let position = sphere.position - n * (radius - depth * 0.5);
    ContactSet::single(Contact::new(position, n, depth))
}

/// Plane–box contacts where the box edges cross the plane, all carrying
/// the depth of the deepest corner.
///
/// A fully submerged box reports its corners instead; more points than
/// `max_contacts` collapse into their average.
#[must_use]
pub fn plane_box(
    plane: &Pose,
    half_extents: &Vector3<f64>,
    cuboid: &Pose,
    max_contacts: usize,
) -> ContactSet {
    let n = plane.axis(2);
    let corners = cuboid_corners(half_extents).map(|p| cuboid.transform_point(&p));
    let heights = corners.map(|c| n.dot(&(c - plane.position)));

    let deepest = heights.iter().copied().fold(f64::INFINITY, f64::min);
    if deepest >= 0.0 {
        return ContactSet::new();
    }
    let depth = -deepest;

    let submerged: Vec<Point3<f64>> = corners
        .iter()
        .zip(&heights)
        .filter(|(_, &h)| h < 0.0)
        .map(|(c, _)| *c)
        .collect();

    let crossings: Vec<Point3<f64>> = CUBOID_EDGES
        .iter()
        .filter_map(|&[i, j]| {
            let (hi, hj) = (heights[i], heights[j]);
            ((hi < 0.0) != (hj < 0.0)).then(|| {
                let t = hi / (hi - hj);
                corners[i] + (corners[j] - corners[i]) * t
            })
        })
        .collect();

    let points = if crossings.is_empty() {
        &submerged
    } else {
        &crossings
    };

    if points.len() <= max_contacts {
        return points
            .iter()
            .map(|p| Contact::new(*p, n, depth))
            .collect();
    }

    let all = submerged.len() + crossings.len();
    let sum: Vector3<f64> = submerged
        .iter()
        .chain(&crossings)
        .map(|p| p.coords)
        .sum();
    ContactSet::single(Contact::new(
        Point3::from(sum / all as f64),
        n,
        depth,
    ))
}

/// Plane–capsule contacts at the submerged cap centers, pushed down by
/// the radius.
#[must_use]
pub fn plane_capsule(
    plane: &Pose,
    radius: f64,
    half_height: f64,
    capsule: &Pose,
    max_contacts: usize,
) -> ContactSet {
    let pn = plane.axis(2);
    let cn = capsule.axis(2);
    let sign = if pn.dot(&cn) > 0.0 { -1.0 } else { 1.0 };

    let endpoint_depth = |p: &Point3<f64>| radius - pn.dot(&(p - plane.position));
    let low = capsule.position + cn * (half_height * sign);
    let depth = endpoint_depth(&low);
    if depth <= 0.0 {
        return ContactSet::new();
    }

    let mut contacts = ContactSet::single(Contact::new(low - pn * radius, pn, depth));
    if max_contacts > 1 {
        let high = capsule.position - cn * (half_height * sign);
        let depth = endpoint_depth(&high);
        if depth > 0.0 {
            contacts.push(Contact::new(high - pn * radius, pn, depth));
        }
    }
    contacts
}

/// Plane–triangle contacts at every vertex below the plane, each with its
/// own depth; the triangle is given in world space.
#[must_use]
pub fn plane_triangle(plane: &Pose, tri: &[Point3<f64>; 3]) -> ContactSet {
    let n = plane.axis(2);
    tri.iter()
        .filter_map(|p| {
            let depth = -n.dot(&(p - plane.position));
            (depth > 0.0).then(|| Contact::new(*p, n, depth))
        })
        .collect()
}

/// Plane against any shape with a support mapping: one contact at the
/// deepest point.
#[must_use]
pub fn plane_support(plane: &Pose, other: &Placed<'_>) -> ContactSet {
    let n = plane.axis(2);
    let p = other.support(&-n);
    let depth = -n.dot(&(p - plane.position));
    if depth <= 0.0 {
        return ContactSet::new();
    }
    ContactSet::single(Contact::new(p, n, depth))
}

/// Two half-spaces overlap unless they face away from each other.
#[must_use]
pub fn plane_plane_overlap(a: &Pose, b: &Pose) -> bool {
    let (na, nb) = (a.axis(2), b.axis(2));
    let opposed = (na + nb).norm_squared() < 1e-18;
    !opposed || na.dot(&(a.position - b.position)) > 0.0
}
