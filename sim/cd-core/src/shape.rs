//! Primitive and composite collision shapes.
//!
//! Every shape is defined in its own local frame and placed by a [`Pose`].
//! Convex primitives expose a support mapping used by the generic
//! minkowski portal refinement test; the plane is a half-space handled by
//! specialized routines only.
//!
//! Composite shapes ([`Shape::TriMesh`], [`Shape::HeightField`]) are never
//! leaves of an OBB tree: they expand into [`Shape::MeshTriangle`] leaves
//! that share one read-only vertex buffer.
//!
//! # Local frames
//!
//! | Shape | Frame |
//! |-------|-------|
//! | Sphere | centered at origin |
//! | Cuboid | centered at origin, edges along x/y/z |
//! | Cylinder, Capsule | centered at origin, axis along z |
//! | Plane | half-space `z <= 0`, outward normal +z |
//! | Triangle, ConvexHull | vertices as given |

use std::sync::Arc;

use cd_types::{CdError, Pose, Result};
use nalgebra::{Point3, Vector3};

use crate::fit::{self, SurfaceMoments};
use crate::obb::Obb;

/// Tolerance for degenerate directions.
const EPSILON: f64 = 1e-10;

/// Half-size of the finite box standing in for a plane's half-space.
pub const PLANE_EXTENT: f64 = 1e6;

/// Discriminant of a [`Shape`], used for dispatch and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    /// Sphere.
    Sphere,
    /// Box.
    Cuboid,
    /// Cylinder.
    Cylinder,
    /// Capsule.
    Capsule,
    /// Half-space.
    Plane,
    /// Free-standing triangle.
    Triangle,
    /// Triangle of a shared mesh.
    MeshTriangle,
    /// Convex point set.
    ConvexHull,
    /// Height-field grid.
    HeightField,
    /// Rigidly offset shape.
    Offset,
    /// Triangle mesh.
    TriMesh,
}

impl ShapeKind {
    /// Lowercase name used in errors and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sphere => "sphere",
            Self::Cuboid => "box",
            Self::Cylinder => "cylinder",
            Self::Capsule => "capsule",
            Self::Plane => "plane",
            Self::Triangle => "triangle",
            Self::MeshTriangle => "mesh triangle",
            Self::ConvexHull => "convex hull",
            Self::HeightField => "height field",
            Self::Offset => "offset",
            Self::TriMesh => "trimesh",
        }
    }
}

/// Read-only vertex and index buffers shared by mesh triangles.
#[derive(Debug, Clone, PartialEq)]
pub struct TriMeshData {
    vertices: Vec<Point3<f64>>,
    triangles: Vec<[u32; 3]>,
}

impl TriMeshData {
    /// Create mesh data, checking that every index is in range.
    pub fn new(vertices: Vec<Point3<f64>>, triangles: Vec<[u32; 3]>) -> Result<Self> {
        if triangles.is_empty() {
            return Err(CdError::invalid_mesh("mesh has no triangles"));
        }
        if let Some(p) = vertices.iter().find(|p| !p.coords.iter().all(|c| c.is_finite())) {
            return Err(CdError::invalid_mesh(format!("non-finite vertex {p}")));
        }
        let n = vertices.len();
        if let Some(t) = triangles.iter().find(|t| t.iter().any(|&i| i as usize >= n)) {
            return Err(CdError::invalid_mesh(format!(
                "triangle {t:?} references a vertex outside 0..{n}"
            )));
        }
        Ok(Self {
            vertices,
            triangles,
        })
    }

    /// Vertex buffer.
    #[must_use]
    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    /// Index buffer.
    #[must_use]
    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    /// Corners of triangle `index`.
    #[must_use]
    pub fn triangle(&self, index: usize) -> [Point3<f64>; 3] {
        let [a, b, c] = self.triangles[index];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }
}

/// Regular grid of heights over the local xy plane.
///
/// Sample `(i, j)` sits at `(i·dx, j·dy, heights[j·nx + i])`; each grid
/// cell becomes two triangles.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightFieldData {
    nx: usize,
    ny: usize,
    spacing: (f64, f64),
    mesh: Arc<TriMeshData>,
}

impl HeightFieldData {
    /// Create a height field from `nx × ny` samples in row-major order.
    pub fn new(nx: usize, ny: usize, dx: f64, dy: f64, heights: &[f64]) -> Result<Self> {
        if nx < 2 || ny < 2 {
            return Err(CdError::invalid_mesh(format!(
                "height field needs at least 2x2 samples, got {nx}x{ny}"
            )));
        }
        let samples = nx.checked_mul(ny).ok_or_else(|| {
            CdError::invalid_mesh(format!("height field of {nx}x{ny} samples is too large"))
        })?;
        if heights.len() != samples {
            return Err(CdError::invalid_mesh(format!(
                "height field expects {samples} samples, got {}",
                heights.len()
            )));
        }
        if !(dx.is_finite() && dy.is_finite() && dx > 0.0 && dy > 0.0) {
            return Err(CdError::invalid_mesh(format!(
                "height field spacing must be positive, got ({dx}, {dy})"
            )));
        }

        let vertices = (0..ny)
            .flat_map(|j| (0..nx).map(move |i| (i, j)))
            .map(|(i, j)| Point3::new(i as f64 * dx, j as f64 * dy, heights[j * nx + i]))
            .collect();

        let mut triangles = Vec::with_capacity((nx - 1) * (ny - 1) * 2);
        for j in 0..ny - 1 {
            for i in 0..nx - 1 {
                let a = u32::try_from(j * nx + i)
                    .map_err(|_| CdError::invalid_mesh("height field too large"))?;
                let nx32 = u32::try_from(nx)
                    .map_err(|_| CdError::invalid_mesh("height field too large"))?;
                triangles.push([a, a + 1, a + nx32 + 1]);
                triangles.push([a, a + nx32 + 1, a + nx32]);
            }
        }

        Ok(Self {
            nx,
            ny,
            spacing: (dx, dy),
            mesh: Arc::new(TriMeshData::new(vertices, triangles)?),
        })
    }

    /// Samples along x and y.
    #[must_use]
    pub const fn resolution(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    /// Sample spacing along x and y.
    #[must_use]
    pub const fn spacing(&self) -> (f64, f64) {
        self.spacing
    }

    /// Triangulated grid.
    #[must_use]
    pub fn mesh(&self) -> &Arc<TriMeshData> {
        &self.mesh
    }
}

/// A collision shape in its local frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Sphere centered at the origin.
    Sphere {
        /// Radius.
        radius: f64,
    },
    /// Box centered at the origin.
    Cuboid {
        /// Half edge lengths.
        half_extents: Vector3<f64>,
    },
    /// Cylinder along z.
    Cylinder {
        /// Radius.
        radius: f64,
        /// Half of the height.
        half_height: f64,
    },
    /// Capsule along z (cylinder with hemispherical caps).
    Capsule {
        /// Radius.
        radius: f64,
        /// Half of the height of the cylindrical part.
        half_height: f64,
    },
    /// Half-space `z <= 0`.
    Plane,
    /// Free-standing triangle.
    Triangle {
        /// Corners.
        vertices: [Point3<f64>; 3],
    },
    /// One triangle of a shared mesh.
    MeshTriangle {
        /// Shared buffers.
        mesh: Arc<TriMeshData>,
        /// Index into the mesh's triangle list.
        index: usize,
    },
    /// Convex hull of a point set (hull construction is not performed; the
    /// support mapping is the maximum over the points).
    ConvexHull {
        /// Points spanning the hull.
        vertices: Arc<[Point3<f64>]>,
    },
    /// Height field expanded into mesh triangles.
    HeightField(Arc<HeightFieldData>),
    /// Shape rigidly re-based inside its owner.
    Offset {
        /// Wrapped primitive.
        shape: Box<Shape>,
        /// Placement of the wrapped shape in this shape's frame.
        pose: Pose,
    },
    /// Triangle mesh.
    TriMesh(Arc<TriMeshData>),
}

fn check_positive(kind: ShapeKind, name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(CdError::invalid_shape(
            kind.name(),
            format!("{name} must be positive and finite, got {value}"),
        ))
    }
}

fn check_points(kind: ShapeKind, points: &[Point3<f64>]) -> Result<()> {
    if let Some(p) = points.iter().find(|p| !p.coords.iter().all(|c| c.is_finite())) {
        return Err(CdError::invalid_shape(
            kind.name(),
            format!("non-finite vertex {p}"),
        ));
    }
    Ok(())
}

fn max_dot(points: impl Iterator<Item = Point3<f64>>, dir: &Vector3<f64>) -> Option<Point3<f64>> {
    points.max_by(|a, b| a.coords.dot(dir).total_cmp(&b.coords.dot(dir)))
}

impl Shape {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Sphere of the given radius.
    pub fn sphere(radius: f64) -> Result<Self> {
        Ok(Self::Sphere {
            radius: check_positive(ShapeKind::Sphere, "radius", radius)?,
        })
    }

    /// Box with the given full edge lengths.
    pub fn cuboid(lx: f64, ly: f64, lz: f64) -> Result<Self> {
        Self::cuboid_half_extents(Vector3::new(lx, ly, lz) * 0.5)
    }

    /// Box with the given half edge lengths.
    pub fn cuboid_half_extents(half_extents: Vector3<f64>) -> Result<Self> {
        for (i, name) in ["x", "y", "z"].iter().enumerate() {
            check_positive(ShapeKind::Cuboid, name, half_extents[i])?;
        }
        Ok(Self::Cuboid { half_extents })
    }

    /// Cylinder of the given radius and full height.
    pub fn cylinder(radius: f64, height: f64) -> Result<Self> {
        Ok(Self::Cylinder {
            radius: check_positive(ShapeKind::Cylinder, "radius", radius)?,
            half_height: check_positive(ShapeKind::Cylinder, "height", height)? * 0.5,
        })
    }

    /// Capsule of the given radius and full height of its cylindrical part.
    pub fn capsule(radius: f64, height: f64) -> Result<Self> {
        Ok(Self::Capsule {
            radius: check_positive(ShapeKind::Capsule, "radius", radius)?,
            half_height: check_positive(ShapeKind::Capsule, "height", height)? * 0.5,
        })
    }

    /// Half-space below the local xy plane.
    #[must_use]
    pub const fn plane() -> Self {
        Self::Plane
    }

    /// Triangle with the given corners.
    pub fn triangle(p0: Point3<f64>, p1: Point3<f64>, p2: Point3<f64>) -> Result<Self> {
        let vertices = [p0, p1, p2];
        check_points(ShapeKind::Triangle, &vertices)?;
        Ok(Self::Triangle { vertices })
    }

    /// Convex hull of a point set.
    pub fn convex_hull(points: &[Point3<f64>]) -> Result<Self> {
        if points.is_empty() {
            return Err(CdError::invalid_shape(
                ShapeKind::ConvexHull.name(),
                "needs at least one point",
            ));
        }
        check_points(ShapeKind::ConvexHull, points)?;
        Ok(Self::ConvexHull {
            vertices: Arc::from(points),
        })
    }

    /// Triangle mesh over a vertex buffer and triangle index list.
    pub fn trimesh(points: &[Point3<f64>], triangles: &[[u32; 3]]) -> Result<Self> {
        Ok(Self::TriMesh(Arc::new(TriMeshData::new(
            points.to_vec(),
            triangles.to_vec(),
        )?)))
    }

    /// Height field of `nx × ny` samples (row-major) with spacing `dx, dy`.
    pub fn height_field(nx: usize, ny: usize, dx: f64, dy: f64, heights: &[f64]) -> Result<Self> {
        Ok(Self::HeightField(Arc::new(HeightFieldData::new(
            nx, ny, dx, dy, heights,
        )?)))
    }

    /// Wrap a primitive so it sits at `pose` inside its owner.
    ///
    /// Nested offsets collapse into one.
    pub fn offset(shape: Self, pose: Pose) -> Result<Self> {
        match shape {
            Self::Offset {
                shape: inner,
                pose: inner_pose,
            } => Ok(Self::Offset {
                shape: inner,
                pose: pose.compose(&inner_pose),
            }),
            s if s.is_composite() => Err(CdError::invalid_shape(
                ShapeKind::Offset.name(),
                format!(
                    "{} cannot be offset; transform its vertices instead",
                    s.kind().name()
                ),
            )),
            s => Ok(Self::Offset {
                shape: Box::new(s),
                pose,
            }),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Discriminant of this shape.
    #[must_use]
    pub const fn kind(&self) -> ShapeKind {
        match self {
            Self::Sphere { .. } => ShapeKind::Sphere,
            Self::Cuboid { .. } => ShapeKind::Cuboid,
            Self::Cylinder { .. } => ShapeKind::Cylinder,
            Self::Capsule { .. } => ShapeKind::Capsule,
            Self::Plane => ShapeKind::Plane,
            Self::Triangle { .. } => ShapeKind::Triangle,
            Self::MeshTriangle { .. } => ShapeKind::MeshTriangle,
            Self::ConvexHull { .. } => ShapeKind::ConvexHull,
            Self::HeightField(_) => ShapeKind::HeightField,
            Self::Offset { .. } => ShapeKind::Offset,
            Self::TriMesh(_) => ShapeKind::TriMesh,
        }
    }

    /// True for shapes made of many triangles.
    #[must_use]
    pub const fn is_composite(&self) -> bool {
        matches!(self, Self::TriMesh(_) | Self::HeightField(_))
    }

    /// Leaf shapes this shape contributes to an OBB tree.
    #[must_use]
    pub fn leaves(&self) -> Vec<Self> {
        let mesh = match self {
            Self::TriMesh(mesh) => mesh,
            Self::HeightField(field) => field.mesh(),
            _ => return vec![self.clone()],
        };
        (0..mesh.triangles().len())
            .map(|index| Self::MeshTriangle {
                mesh: Arc::clone(mesh),
                index,
            })
            .collect()
    }

    /// Corners of a triangle shape.
    #[must_use]
    pub fn triangle_vertices(&self) -> Option<[Point3<f64>; 3]> {
        match self {
            Self::Triangle { vertices } => Some(*vertices),
            Self::MeshTriangle { mesh, index } => Some(mesh.triangle(*index)),
            _ => None,
        }
    }

    /// Points spanning this shape's geometry (used for composites).
    fn mesh_vertices(&self) -> Option<&[Point3<f64>]> {
        match self {
            Self::TriMesh(mesh) => Some(mesh.vertices()),
            Self::HeightField(field) => Some(field.mesh().vertices()),
            Self::ConvexHull { vertices } => Some(vertices),
            _ => None,
        }
    }

    /// Farthest point of the shape along `dir`, in the local frame.
    ///
    /// Returns `None` for the plane, which has no support mapping.
    #[must_use]
    pub fn support(&self, dir: &Vector3<f64>) -> Option<Point3<f64>> {
        match self {
            Self::Sphere { radius } => {
                let unit = dir.try_normalize(EPSILON).unwrap_or_else(Vector3::x);
                Some(Point3::from(unit * *radius))
            }
            Self::Cuboid { half_extents } => Some(Point3::new(
                half_extents.x * dir.x.signum(),
                half_extents.y * dir.y.signum(),
                half_extents.z * dir.z.signum(),
            )),
            Self::Cylinder {
                radius,
                half_height,
            } => {
                let radial = Vector3::new(dir.x, dir.y, 0.0);
                let radial = radial
                    .try_normalize(EPSILON)
                    .map_or_else(Vector3::zeros, |r| r * *radius);
                Some(Point3::new(
                    radial.x,
                    radial.y,
                    half_height.copysign(dir.z),
                ))
            }
            Self::Capsule {
                radius,
                half_height,
            } => {
                let unit = dir.try_normalize(EPSILON).unwrap_or_else(Vector3::z);
                Some(Point3::from(
                    unit * *radius + Vector3::new(0.0, 0.0, half_height.copysign(dir.z)),
                ))
            }
            Self::Plane => None,
            Self::Triangle { vertices } => max_dot(vertices.iter().copied(), dir),
            Self::MeshTriangle { mesh, index } => max_dot(mesh.triangle(*index).into_iter(), dir),
            Self::ConvexHull { .. } | Self::TriMesh(_) | Self::HeightField(_) => self
                .mesh_vertices()
                .and_then(|v| max_dot(v.iter().copied(), dir)),
            Self::Offset { shape, pose } => {
                let local = shape.support(&pose.inverse_transform_vector(dir))?;
                Some(pose.transform_point(&local))
            }
        }
    }

    /// Support point along a world direction for the shape placed at `pose`.
    #[must_use]
    pub fn support_at(&self, pose: &Pose, dir: &Vector3<f64>) -> Option<Point3<f64>> {
        let local = self.support(&pose.inverse_transform_vector(dir))?;
        Some(pose.transform_point(&local))
    }

    /// Interior reference point of the shape placed at `pose`.
    #[must_use]
    pub fn center(&self, pose: &Pose) -> Point3<f64> {
        match self {
            Self::Triangle { .. } | Self::MeshTriangle { .. } => {
                let [a, b, c] = self.triangle_vertices().unwrap_or([Point3::origin(); 3]);
                pose.transform_point(&Point3::from((a.coords + b.coords + c.coords) / 3.0))
            }
            Self::ConvexHull { .. } | Self::TriMesh(_) | Self::HeightField(_) => {
                let vertices = self.mesh_vertices().unwrap_or(&[]);
                let sum: Vector3<f64> = vertices.iter().map(|p| p.coords).sum();
                let n = vertices.len().max(1) as f64;
                pose.transform_point(&Point3::from(sum / n))
            }
            Self::Offset { shape, pose: off } => shape.center(&pose.compose(off)),
            _ => pose.position,
        }
    }

    /// Box bounding this shape in its local frame.
    #[must_use]
    pub fn local_obb(&self) -> Obb {
        match self {
            Self::Sphere { radius } => Obb::axis_aligned(Point3::origin(), Vector3::repeat(*radius)),
            Self::Cuboid { half_extents } => Obb::axis_aligned(Point3::origin(), *half_extents),
            Self::Cylinder {
                radius,
                half_height,
            } => Obb::axis_aligned(
                Point3::origin(),
                Vector3::new(*radius, *radius, *half_height),
            ),
            Self::Capsule {
                radius,
                half_height,
            } => Obb::axis_aligned(
                Point3::origin(),
                Vector3::new(*radius, *radius, half_height + radius),
            ),
            Self::Plane => Obb::axis_aligned(
                Point3::new(0.0, 0.0, -PLANE_EXTENT),
                Vector3::repeat(PLANE_EXTENT),
            ),
            Self::Triangle { .. } | Self::MeshTriangle { .. } => {
                let [a, b, c] = self.triangle_vertices().unwrap_or([Point3::origin(); 3]);
                Obb::fit_triangle(&a, &b, &c)
            }
            Self::ConvexHull { .. } | Self::TriMesh(_) | Self::HeightField(_) => {
                fit::fit_points(self.mesh_vertices().unwrap_or(&[]))
            }
            Self::Offset { shape, pose } => shape.local_obb().transformed(pose),
        }
    }

    /// Interval covered by the shape placed at `pose` when projected onto
    /// `axis` (which need not be unit length).
    #[must_use]
    pub fn project(&self, axis: &Vector3<f64>, pose: &Pose) -> (f64, f64) {
        let c = pose.position.coords.dot(axis);
        match self {
            Self::Sphere { radius } => {
                let r = radius * axis.norm();
                (c - r, c + r)
            }
            Self::Cuboid { half_extents } => {
                let local = pose.inverse_transform_vector(axis);
                let r = local.abs().dot(half_extents);
                (c - r, c + r)
            }
            Self::Cylinder {
                radius,
                half_height,
            } => {
                let local = pose.inverse_transform_vector(axis);
                let radial = (local.x * local.x + local.y * local.y).sqrt();
                let r = half_height * local.z.abs() + radius * radial;
                (c - r, c + r)
            }
            Self::Capsule {
                radius,
                half_height,
            } => {
                let local = pose.inverse_transform_vector(axis);
                let r = half_height * local.z.abs() + radius * axis.norm();
                (c - r, c + r)
            }
            Self::Plane => self.local_obb().transformed(pose).project(axis),
            Self::Triangle { .. } | Self::MeshTriangle { .. } => {
                let corners = self.triangle_vertices().unwrap_or([Point3::origin(); 3]);
                project_points(corners.iter(), axis, pose)
            }
            Self::ConvexHull { .. } | Self::TriMesh(_) | Self::HeightField(_) => {
                project_points(self.mesh_vertices().unwrap_or(&[]).iter(), axis, pose)
            }
            Self::Offset { shape, pose: off } => shape.project(axis, &pose.compose(off)),
        }
    }

    /// Push the points that span this shape (placed at `pose`) into `out`.
    ///
    /// Sphere → center, box → 8 corners, capsule and cylinder → axis
    /// endpoints, triangles → corners, hulls and meshes → vertices, plane →
    /// nothing.
    pub fn collect_hull_points(&self, pose: &Pose, out: &mut Vec<Point3<f64>>) {
        match self {
            Self::Sphere { .. } => out.push(pose.position),
            Self::Cuboid { half_extents } => {
                out.extend(cuboid_corners(half_extents).iter().map(|p| pose.transform_point(p)));
            }
            Self::Cylinder { half_height, .. } | Self::Capsule { half_height, .. } => {
                out.push(pose.transform_point(&Point3::new(0.0, 0.0, *half_height)));
                out.push(pose.transform_point(&Point3::new(0.0, 0.0, -half_height)));
            }
            Self::Plane => {}
            Self::Triangle { .. } | Self::MeshTriangle { .. } => {
                if let Some(corners) = self.triangle_vertices() {
                    out.extend(corners.iter().map(|p| pose.transform_point(p)));
                }
            }
            Self::ConvexHull { .. } | Self::TriMesh(_) | Self::HeightField(_) => {
                if let Some(vertices) = self.mesh_vertices() {
                    out.extend(vertices.iter().map(|p| pose.transform_point(p)));
                }
            }
            Self::Offset { shape, pose: off } => {
                shape.collect_hull_points(&pose.compose(off), out);
            }
        }
    }

    /// Add this shape's surface distribution (placed at `pose`) to `moments`.
    pub fn accumulate_surface(&self, pose: &Pose, moments: &mut SurfaceMoments) {
        use std::f64::consts::PI;

        match self {
            Self::Sphere { radius } => {
                moments.add_point(&pose.position, 4.0 * PI * radius * radius);
            }
            Self::Cuboid { half_extents } => {
                let corners = cuboid_corners(half_extents).map(|p| pose.transform_point(&p));
                for [a, b, c] in CUBOID_FACES {
                    moments.add_triangle(&corners[a], &corners[b], &corners[c]);
                }
            }
            Self::Cylinder {
                radius,
                half_height,
            } => {
                let area = 2.0 * PI * radius * (2.0 * half_height + radius);
                moments.add_point(&pose.position, area);
            }
            Self::Capsule {
                radius,
                half_height,
            } => {
                let area = 2.0 * PI * radius * (2.0 * half_height + 2.0 * radius);
                moments.add_point(&pose.position, area);
            }
            Self::Plane => {}
            Self::Triangle { .. } | Self::MeshTriangle { .. } => {
                if let Some([a, b, c]) = self.triangle_vertices() {
                    moments.add_triangle(
                        &pose.transform_point(&a),
                        &pose.transform_point(&b),
                        &pose.transform_point(&c),
                    );
                }
            }
            Self::ConvexHull { vertices } => {
                for p in vertices.iter() {
                    moments.add_point(&pose.transform_point(p), 1.0);
                }
            }
            Self::TriMesh(_) | Self::HeightField(_) => {
                for leaf in self.leaves() {
                    leaf.accumulate_surface(pose, moments);
                }
            }
            Self::Offset { shape, pose: off } => {
                shape.accumulate_surface(&pose.compose(off), moments);
            }
        }
    }
}

fn project_points<'a>(
    points: impl Iterator<Item = &'a Point3<f64>>,
    axis: &Vector3<f64>,
    pose: &Pose,
) -> (f64, f64) {
    let local = pose.inverse_transform_vector(axis);
    let offset = pose.position.coords.dot(axis);
    let (min, max) = points.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
        let d = p.coords.dot(&local);
        (lo.min(d), hi.max(d))
    });
    if min > max {
        (offset, offset)
    } else {
        (min + offset, max + offset)
    }
}

/// The 8 corners of a box centered at the origin; corner `i` takes the
/// negative half-extent along axis `k` when bit `k` of `i` is set.
#[must_use]
pub fn cuboid_corners(half_extents: &Vector3<f64>) -> [Point3<f64>; 8] {
    std::array::from_fn(|i| {
        let sign = |bit: usize| if i & (1 << bit) == 0 { 1.0 } else { -1.0 };
        Point3::new(
            sign(0) * half_extents.x,
            sign(1) * half_extents.y,
            sign(2) * half_extents.z,
        )
    })
}

/// Corner index pairs forming the 12 edges of a box.
pub const CUBOID_EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [2, 3],
    [4, 5],
    [6, 7],
    [0, 2],
    [1, 3],
    [4, 6],
    [5, 7],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// Corner index triples forming the 12 surface triangles of a box.
const CUBOID_FACES: [[usize; 3]; 12] = [
    [0, 2, 6],
    [0, 6, 4],
    [1, 5, 7],
    [1, 7, 3],
    [0, 4, 5],
    [0, 5, 1],
    [2, 3, 7],
    [2, 7, 6],
    [0, 1, 3],
    [0, 3, 2],
    [4, 6, 7],
    [4, 7, 5],
];

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
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_construction_errors() {
        assert!(Shape::sphere(-1.0).unwrap_err().is_shape_error());
        assert!(Shape::sphere(f64::NAN).is_err());
        assert!(Shape::cuboid(1.0, 0.0, 1.0).is_err());
        assert!(Shape::cylinder(0.3, -1.0).is_err());
        assert!(Shape::capsule(0.0, 1.0).is_err());
        assert!(Shape::convex_hull(&[]).is_err());
        assert!(Shape::trimesh(&[Point3::origin()], &[[0, 1, 2]]).is_err());
        assert!(Shape::height_field(1, 3, 1.0, 1.0, &[0.0; 3]).is_err());
        assert!(Shape::height_field(2, 2, 1.0, 1.0, &[0.0; 3]).is_err());
        assert!(Shape::height_field(usize::MAX, 2, 1.0, 1.0, &[0.0; 4])
            .unwrap_err()
            .is_shape_error());

        let mesh = Shape::trimesh(
            &[Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            &[[0, 1, 2]],
        )
        .unwrap();
        assert!(Shape::offset(mesh, Pose::identity()).is_err());
    }

    #[test]
    fn test_cuboid_from_lengths() {
        let b = Shape::cuboid(0.5, 1.0, 2.0).unwrap();
        match b {
            Shape::Cuboid { half_extents } => {
                assert_relative_eq!(half_extents, Vector3::new(0.25, 0.5, 1.0));
            }
            _ => panic!("expected cuboid"),
        }
    }

    #[test]
    fn test_support_points() {
        let sphere = Shape::sphere(2.0).unwrap();
        assert_relative_eq!(
            sphere.support(&Vector3::new(0.0, 3.0, 0.0)).unwrap(),
            Point3::new(0.0, 2.0, 0.0)
        );

        let cuboid = Shape::cuboid(2.0, 4.0, 6.0).unwrap();
        assert_relative_eq!(
            cuboid.support(&Vector3::new(1.0, -1.0, 1.0)).unwrap(),
            Point3::new(1.0, -2.0, 3.0)
        );

        let cylinder = Shape::cylinder(1.0, 2.0).unwrap();
        assert_relative_eq!(
            cylinder.support(&Vector3::new(1.0, 0.0, -1.0)).unwrap(),
            Point3::new(1.0, 0.0, -1.0)
        );

        let capsule = Shape::capsule(0.5, 2.0).unwrap();
        assert_relative_eq!(
            capsule.support(&Vector3::new(0.0, 0.0, 1.0)).unwrap(),
            Point3::new(0.0, 0.0, 1.5)
        );

        assert!(Shape::plane().support(&Vector3::z()).is_none());
    }

    #[test]
    fn test_offset_support_and_center() {
        let pose = Pose::from_euler(Point3::new(1.0, 0.0, 0.0), 0.0, 0.0, FRAC_PI_2);
        let shape = Shape::offset(Shape::cuboid(2.0, 0.2, 0.2).unwrap(), pose).unwrap();

        // box long axis x rotated onto y, then shifted by +1 in x
        let p = shape.support(&Vector3::y()).unwrap();
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(shape.center(&Pose::identity()), Point3::new(1.0, 0.0, 0.0));

        let nested = Shape::offset(shape, Pose::from_position(Point3::new(0.0, 0.0, 2.0))).unwrap();
        match &nested {
            Shape::Offset { shape, pose } => {
                assert_eq!(shape.kind(), ShapeKind::Cuboid);
                assert_relative_eq!(pose.position, Point3::new(1.0, 0.0, 2.0), epsilon = 1e-12);
            }
            _ => panic!("expected offset"),
        }
    }

    #[test]
    fn test_project_matches_support() {
        let pose = Pose::from_euler(Point3::new(0.3, -0.2, 1.0), 0.4, 1.1, -0.3);
        let axis = Vector3::new(0.3, -1.2, 0.8);
        let shapes = [
            Shape::sphere(0.7).unwrap(),
            Shape::cuboid(0.5, 1.0, 2.0).unwrap(),
            Shape::cylinder(0.3, 1.0).unwrap(),
            Shape::capsule(0.2, 0.8).unwrap(),
            Shape::triangle(
                Point3::origin(),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.5),
            )
            .unwrap(),
        ];

        for shape in &shapes {
            let (min, max) = shape.project(&axis, &pose);
            let hi = shape.support_at(&pose, &axis).unwrap().coords.dot(&axis);
            let lo = shape.support_at(&pose, &-axis).unwrap().coords.dot(&axis);
            assert_relative_eq!(max, hi, epsilon = 1e-9);
            assert_relative_eq!(min, lo, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_local_obb_contains_hull_points() {
        let shapes = [
            Shape::cuboid(0.5, 1.0, 2.0).unwrap(),
            Shape::capsule(0.2, 0.8).unwrap(),
            Shape::convex_hull(&[
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(2.0, 0.1, 0.0),
                Point3::new(0.3, 1.0, 0.2),
                Point3::new(0.5, 0.4, 1.5),
            ])
            .unwrap(),
        ];
        for shape in &shapes {
            let obb = shape.local_obb();
            let mut points = Vec::new();
            shape.collect_hull_points(&Pose::identity(), &mut points);
            for p in &points {
                assert!(obb.contains(p, 1e-9), "{:?} outside {obb:?}", shape.kind());
            }
        }
    }

    #[test]
    fn test_height_field_leaves_share_vertices() {
        let hf = Shape::height_field(3, 3, 0.5, 0.5, &[0.0, 0.1, 0.0, 0.2, 0.3, 0.2, 0.0, 0.1, 0.0])
            .unwrap();
        let leaves = hf.leaves();
        assert_eq!(leaves.len(), 8);

        let first = match (&leaves[0], &leaves[7]) {
            (Shape::MeshTriangle { mesh: a, .. }, Shape::MeshTriangle { mesh: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        };
        assert!(first);

        let [a, _, _] = leaves[0].triangle_vertices().unwrap();
        assert_relative_eq!(a, Point3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_cuboid_corners() {
        let corners = cuboid_corners(&Vector3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(corners[0], Point3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(corners[7], Point3::new(-1.0, -2.0, -3.0));
        for [a, b] in CUBOID_EDGES {
            let diff = corners[a] - corners[b];
            let nonzero = diff.iter().filter(|c| c.abs() > 0.0).count();
            assert_eq!(nonzero, 1);
        }
    }
}
