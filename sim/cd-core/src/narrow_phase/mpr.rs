//! Minkowski portal refinement (MPR).
//!
//! Generic intersection and penetration test for any two shapes with a
//! support mapping. Works on the Minkowski difference `A − B`, which
//! contains the origin iff the shapes overlap:
//!
//! 1. **Portal discovery** casts a ray from an interior point `v0` of
//!    `A − B` towards the origin and finds a triangle (the portal) that
//!    the ray passes through.
//! 2. **Refinement** pushes the portal outwards along its normal until it
//!    either lies beyond the origin (overlap) or can provably not reach it.
//! 3. **Penetration** keeps refining until the portal is within tolerance
//!    of the boundary, then reads depth and direction off the point of the
//!    portal closest to the origin.
//!
//! Reaching the iteration cap reports no collision.
//!
//! # References
//!
//! - Snethen: "XenoCollide: Complex Collision Made Simple", Game Programming
//!   Gems 7 (2008)

use cd_types::{Contact, MprConfig};
use nalgebra::{Point3, Vector3};
use tracing::trace;

use super::Placed;

/// Zero test for dot and cross products.
const EPSILON: f64 = f64::EPSILON;

fn is_zero(value: f64) -> bool {
    value.abs() < EPSILON
}

/// A point of `A − B` together with the support points it came from.
#[derive(Debug, Clone, Copy)]
struct MinkowskiPoint {
    v: Vector3<f64>,
    on_a: Point3<f64>,
    on_b: Point3<f64>,
}

impl MinkowskiPoint {
    fn support(a: &Placed<'_>, b: &Placed<'_>, dir: &Vector3<f64>) -> Self {
        let on_a = a.support(dir);
        let on_b = b.support(&-dir);
        Self {
            v: on_a - on_b,
            on_a,
            on_b,
        }
    }

    fn midpoint(&self) -> Point3<f64> {
        Point3::from((self.on_a.coords + self.on_b.coords) * 0.5)
    }
}

/// Outcome of portal discovery.
enum Discovery {
    /// `A − B` provably misses the origin.
    Separated,
    /// The origin sits on the support point `v1`.
    Touching,
    /// The origin lies on the segment `v0 v1`.
    Segment,
    /// `v0` plus the triangle `v1 v2 v3` form a valid portal.
    Portal,
}

/// `v[0]` is the interior point; `v[1..4]` the portal triangle.
struct Portal {
    v: [MinkowskiPoint; 4],
}

impl Portal {
    /// Outward unit normal of the portal triangle.
    fn direction(&self) -> Vector3<f64> {
        let [_, v1, v2, v3] = &self.v;
        (v2.v - v1.v)
            .cross(&(v3.v - v1.v))
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::zeros)
    }

    /// The origin lies behind the portal plane.
    fn encloses_origin(&self, dir: &Vector3<f64>) -> bool {
        let dot = dir.dot(&self.v[1].v);
        is_zero(dot) || dot > 0.0
    }

    /// Replace one portal vertex with `v4` so the ray from `v0` to the
    /// origin still passes through the portal.
    fn expand(&mut self, v4: MinkowskiPoint) {
        let v4v0 = v4.v.cross(&self.v[0].v);
        let dot = self.v[1].v.dot(&v4v0);
        let slot = if dot > 0.0 {
            if self.v[2].v.dot(&v4v0) > 0.0 {
                1
            } else {
                3
            }
        } else if self.v[3].v.dot(&v4v0) > 0.0 {
            2
        } else {
            1
        };
        self.v[slot] = v4;
    }

    /// Contact point as the barycentric combination of the support points.
    fn contact_position(&self, dir: &Vector3<f64>) -> Point3<f64> {
        let [v0, v1, v2, v3] = &self.v;
        let mut b = [
            v1.v.cross(&v2.v).dot(&v3.v),
            v3.v.cross(&v2.v).dot(&v0.v),
            v0.v.cross(&v1.v).dot(&v3.v),
            v2.v.cross(&v1.v).dot(&v0.v),
        ];
        let mut sum: f64 = b.iter().sum();

        if is_zero(sum) || sum < 0.0 {
            b = [
                0.0,
                v2.v.cross(&v3.v).dot(dir),
                v3.v.cross(&v1.v).dot(dir),
                v1.v.cross(&v2.v).dot(dir),
            ];
            sum = b.iter().sum();
        }
        if is_zero(sum) {
            return v1.midpoint();
        }

        let weighted = |pick: fn(&MinkowskiPoint) -> Vector3<f64>| {
            self.v
                .iter()
                .zip(b)
                .map(|(p, w)| pick(p) * w)
                .sum::<Vector3<f64>>()
                / sum
        };
        let on_a = weighted(|p| p.on_a.coords);
        let on_b = weighted(|p| p.on_b.coords);
        Point3::from((on_a + on_b) * 0.5)
    }
}

/// Closest point to `p` on triangle `a b c`.
#[must_use]
pub fn closest_point_on_triangle(
    p: &Vector3<f64>,
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    c: &Vector3<f64>,
) -> Vector3<f64> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

fn reaches_tolerance(portal: &Portal, v4: &MinkowskiPoint, dir: &Vector3<f64>, tol: f64) -> bool {
    let dv4 = v4.v.dot(dir);
    let gap = portal.v[1..]
        .iter()
        .map(|p| dv4 - p.v.dot(dir))
        .fold(f64::INFINITY, f64::min);
    gap <= tol
}

fn discover_portal(a: &Placed<'_>, b: &Placed<'_>, config: &MprConfig) -> (Discovery, Portal) {
    let ca = a.center();
    let cb = b.center();
    let mut v0 = MinkowskiPoint {
        v: ca - cb,
        on_a: ca,
        on_b: cb,
    };
    if v0.v.iter().all(|c| is_zero(*c)) {
        v0.v.x += 10.0 * EPSILON;
    }

    let dir = -v0.v.normalize();
    let v1 = MinkowskiPoint::support(a, b, &dir);
    let mut portal = Portal { v: [v0, v1, v1, v1] };

    let dot = v1.v.dot(&dir);
    if is_zero(dot) || dot < 0.0 {
        return (Discovery::Separated, portal);
    }

    let dir = v0.v.cross(&v1.v);
    if is_zero(dir.norm_squared()) {
        let discovery = if v1.v.iter().all(|c| is_zero(*c)) {
            Discovery::Touching
        } else {
            Discovery::Segment
        };
        return (discovery, portal);
    }

    let dir = dir.normalize();
    let v2 = MinkowskiPoint::support(a, b, &dir);
    let dot = v2.v.dot(&dir);
    if is_zero(dot) || dot < 0.0 {
        return (Discovery::Separated, portal);
    }
    portal.v[2] = v2;

    let face_normal = |p: &Portal| {
        (p.v[1].v - p.v[0].v)
            .cross(&(p.v[2].v - p.v[0].v))
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::zeros)
    };

    let mut dir = face_normal(&portal);
    if dir.dot(&v0.v) > 0.0 {
        portal.v.swap(1, 2);
        dir = -dir;
    }

    for _ in 0..config.max_iterations {
        let v3 = MinkowskiPoint::support(a, b, &dir);
        let dot = v3.v.dot(&dir);
        if is_zero(dot) || dot < 0.0 {
            return (Discovery::Separated, portal);
        }
        portal.v[3] = v3;

        let side1 = portal.v[1].v.cross(&v3.v).dot(&v0.v);
        if side1 < 0.0 && !is_zero(side1) {
            portal.v[2] = v3;
            dir = face_normal(&portal);
            continue;
        }

        let side2 = v3.v.cross(&portal.v[2].v).dot(&v0.v);
        if side2 < 0.0 && !is_zero(side2) {
            portal.v[1] = v3;
            dir = face_normal(&portal);
            continue;
        }

        return (Discovery::Portal, portal);
    }

    trace!(max_iterations = config.max_iterations, "portal discovery hit iteration cap");
    (Discovery::Separated, portal)
}

fn refine_portal(a: &Placed<'_>, b: &Placed<'_>, config: &MprConfig, portal: &mut Portal) -> bool {
    for _ in 0..config.max_iterations {
        let dir = portal.direction();
        if portal.encloses_origin(&dir) {
            return true;
        }

        let v4 = MinkowskiPoint::support(a, b, &dir);
        let dot = v4.v.dot(&dir);
        let can_reach = is_zero(dot) || dot > 0.0;
        if !can_reach || reaches_tolerance(portal, &v4, &dir, config.tolerance) {
            return false;
        }

        portal.expand(v4);
    }

    trace!(max_iterations = config.max_iterations, "portal refinement hit iteration cap");
    false
}

fn find_penetration(
    a: &Placed<'_>,
    b: &Placed<'_>,
    config: &MprConfig,
    portal: &mut Portal,
) -> Option<Contact> {
    let mut iterations = 0;
    loop {
        let dir = portal.direction();
        let v4 = MinkowskiPoint::support(a, b, &dir);

        if reaches_tolerance(portal, &v4, &dir, config.tolerance)
            || iterations >= config.max_iterations
        {
            let closest = closest_point_on_triangle(
                &Vector3::zeros(),
                &portal.v[1].v,
                &portal.v[2].v,
                &portal.v[3].v,
            );
            let depth = closest.norm();
            let normal = closest.try_normalize(EPSILON)?;
            let position = portal.contact_position(&dir);
            return Some(Contact::new(position, normal, depth));
        }

        portal.expand(v4);
        iterations += 1;
    }
}

/// True if the shapes overlap.
#[must_use]
pub fn mpr_intersect(a: &Placed<'_>, b: &Placed<'_>, config: &MprConfig) -> bool {
    let (discovery, mut portal) = discover_portal(a, b, config);
    match discovery {
        Discovery::Separated | Discovery::Touching => false,
        Discovery::Segment => true,
        Discovery::Portal => refine_portal(a, b, config, &mut portal),
    }
}

/// Penetration contact of overlapping shapes.
///
/// The normal points from `a` towards `b`; translating `b` by
/// `normal * depth` separates the shapes. Touching shapes yield `None`.
#[must_use]
pub fn mpr_penetration(a: &Placed<'_>, b: &Placed<'_>, config: &MprConfig) -> Option<Contact> {
    let (discovery, mut portal) = discover_portal(a, b, config);
    match discovery {
        Discovery::Separated | Discovery::Touching => None,
        Discovery::Segment => {
            let v1 = &portal.v[1];
            let normal = v1.v.try_normalize(EPSILON)?;
            Some(Contact::new(v1.midpoint(), normal, v1.v.norm()))
        }
        Discovery::Portal => {
            if !refine_portal(a, b, config, &mut portal) {
                return None;
            }
            find_penetration(a, b, config, &mut portal)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::Shape;
    use approx::assert_relative_eq;
    use cd_types::Pose;

    fn placed(shape: &Shape, x: f64, y: f64, z: f64) -> Placed<'_> {
        Placed::new(shape, Pose::from_position(Point3::new(x, y, z)))
    }

    #[test]
    fn test_spheres() {
        let s = Shape::sphere(0.5).unwrap();
        let config = MprConfig::default();
        assert!(mpr_intersect(&placed(&s, 0.0, 0.0, 0.0), &placed(&s, 0.9, 0.0, 0.0), &config));
        assert!(!mpr_intersect(&placed(&s, 0.0, 0.0, 0.0), &placed(&s, 1.1, 0.0, 0.0), &config));
    }

    #[test]
    fn test_concentric_shapes() {
        let a = Shape::cuboid(1.0, 1.0, 1.0).unwrap();
        let b = Shape::capsule(0.2, 0.5).unwrap();
        let config = MprConfig::default();
        assert!(mpr_intersect(&placed(&a, 0.0, 0.0, 0.0), &placed(&b, 0.0, 0.0, 0.0), &config));
    }

    #[test]
    fn test_box_sphere_penetration() {
        let cuboid = Shape::cuboid(2.0, 2.0, 2.0).unwrap();
        let sphere = Shape::sphere(0.5).unwrap();
        let config = MprConfig {
            tolerance: 1e-8,
            ..MprConfig::default()
        };

        let contact = mpr_penetration(
            &placed(&cuboid, 0.0, 0.0, 0.0),
            &placed(&sphere, 1.3, 0.0, 0.0),
            &config,
        )
        .unwrap();
        assert_relative_eq!(contact.depth, 0.2, epsilon = 1e-4);
        assert_relative_eq!(contact.normal, Vector3::x(), epsilon = 1e-3);
        assert!(contact.position.x > 0.7 && contact.position.x < 1.1);
    }

    #[test]
    fn test_separated_penetration() {
        let cuboid = Shape::cuboid(1.0, 1.0, 1.0).unwrap();
        let config = MprConfig::default();
        assert!(mpr_penetration(
            &placed(&cuboid, 0.0, 0.0, 0.0),
            &placed(&cuboid, 0.0, 1.5, 0.0),
            &config
        )
        .is_none());
    }

    #[test]
    fn test_iteration_cap_only_loses_hits() {
        let a = Shape::sphere(1.0).unwrap();
        let b = Shape::cylinder(0.5, 1.0).unwrap();
        let capped = MprConfig {
            max_iterations: 1,
            ..MprConfig::default()
        };
        let full = MprConfig::default();

        for i in 0..20 {
            let t = f64::from(i) * 0.1;
            let pose = Pose::from_euler(Point3::new(1.0 + t * 0.05, 0.3 * t, 0.1), t, 0.3, 0.2);
            let (pa, pb) = (placed(&a, 0.0, 0.0, 0.0), Placed::new(&b, pose));
            if mpr_intersect(&pa, &pb, &capped) {
                assert!(mpr_intersect(&pa, &pb, &full), "step {i}");
            }
        }
    }

    #[test]
    fn test_closest_point_on_triangle() {
        let a = Vector3::new(0.0, 0.0, 1.0);
        let b = Vector3::new(1.0, 0.0, 1.0);
        let c = Vector3::new(0.0, 1.0, 1.0);
        assert_relative_eq!(
            closest_point_on_triangle(&Vector3::zeros(), &a, &b, &c),
            a
        );
        assert_relative_eq!(
            closest_point_on_triangle(&Vector3::new(0.2, 0.2, 0.0), &a, &b, &c),
            Vector3::new(0.2, 0.2, 1.0)
        );
        assert_relative_eq!(
            closest_point_on_triangle(&Vector3::new(1.0, 1.0, 1.0), &a, &b, &c),
            Vector3::new(0.5, 0.5, 1.0)
        );
    }
}
