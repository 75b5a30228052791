//! Uniform grid for scenes made of many spheres.
//!
//! Spheres are registered in every cell their bounding box touches. A query
//! sphere visits the cells its own bounding box touches (its cell and, for
//! radii up to the cell edge, the 26 neighbours), so any two overlapping
//! spheres always share a visited cell.

use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;
use tracing::{debug, warn};

/// Cells allowed per registered sphere before the edge is coarsened.
const CELLS_PER_SPHERE: usize = 64;

/// Cell budget of small scenes.
const MIN_CELL_BUDGET: usize = 1 << 12;

/// A registered sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSphere {
    /// Sphere center.
    pub center: Point3<f64>,
    /// Sphere radius.
    pub radius: f64,
}

impl GridSphere {
    fn overlaps(&self, radius: f64, center: &Point3<f64>) -> bool {
        (self.center - center).norm() < self.radius + radius
    }
}

/// Inclusive cell index range covered by a box.
type CellRange = ([usize; 3], [usize; 3]);

/// Sphere set indexed by a uniform grid.
#[derive(Debug, Clone, Default)]
pub struct SphereGrid {
    spheres: Vec<GridSphere>,
    origin: Point3<f64>,
    edge: f64,
    dim: [usize; 3],
    cells: Vec<SmallVec<[usize; 4]>>,
}

impl SphereGrid {
    /// Create an empty grid.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sphere; returns its index. Takes effect at the next
    /// [`build`](Self::build).
    pub fn add(&mut self, radius: f64, center: Point3<f64>) -> usize {
        self.spheres.push(GridSphere { center, radius });
        self.spheres.len() - 1
    }

    /// Number of registered spheres.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spheres.len()
    }

    /// True if no sphere is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spheres.is_empty()
    }

    /// Registered spheres in insertion order.
    #[must_use]
    pub fn spheres(&self) -> &[GridSphere] {
        &self.spheres
    }

    /// Number of cells of the last build.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Cell edge length of the last build.
    #[must_use]
    pub const fn edge(&self) -> f64 {
        self.edge
    }

    /// Lay out the grid and assign every sphere to its cells.
    ///
    /// A non-positive `edge` selects twice the average radius. An edge that
    /// would need more than `64` cells per sphere (at least `4096` cells)
    /// is grown until the layout fits.
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn build(&mut self, edge: f64) {
        self.cells.clear();
        if self.spheres.is_empty() {
            return;
        }

        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        let mut radius_sum = 0.0;
        for s in &self.spheres {
            min = min.inf(&(s.center.coords - Vector3::repeat(s.radius)));
            max = max.sup(&(s.center.coords + Vector3::repeat(s.radius)));
            radius_sum += s.radius;
        }

        self.edge = if edge > 0.0 {
            edge
        } else {
            2.0 * radius_sum / self.spheres.len() as f64
        };
        if !(self.edge.is_finite() && self.edge > 0.0) {
            self.edge = 1.0;
        }

        self.origin = Point3::from(min);
        let extent = max - min;
        let budget = self
            .spheres
            .len()
            .saturating_mul(CELLS_PER_SPHERE)
            .max(MIN_CELL_BUDGET);
        let requested = self.edge;
        let mut count = layout(&extent, self.edge);
        while count > budget as f64 {
            self.edge *= (count / budget as f64).cbrt().max(1.01);
            count = layout(&extent, self.edge);
        }
        if self.edge > requested {
            warn!(
                requested,
                edge = self.edge,
                budget,
                "sphere grid too fine, coarsened cell edge"
            );
        }

        for i in 0..3 {
            self.dim[i] = ((extent[i] / self.edge).floor() + 1.0).max(1.0) as usize;
        }
        self.cells = vec![SmallVec::new(); self.dim.iter().product()];

        for index in 0..self.spheres.len() {
            let s = self.spheres[index];
            if let Some(range) = self.incident_cells(s.radius, &s.center) {
                for cell in cell_indices(self.dim, range) {
                    self.cells[cell].push(index);
                }
            }
        }

        debug!(
            spheres = self.spheres.len(),
            cells = self.cells.len(),
            edge = self.edge,
            "built sphere grid"
        );
    }

    /// True if the query sphere overlaps a registered sphere.
    ///
    /// Always false before the first [`build`](Self::build).
    #[must_use]
    pub fn collide(&self, radius: f64, center: &Point3<f64>) -> bool {
        let Some(range) = self.incident_cells(radius, center) else {
            return false;
        };
        cell_indices(self.dim, range).any(|cell| {
            self.cells[cell]
                .iter()
                .any(|&i| self.spheres[i].overlaps(radius, center))
        })
    }

    /// Reference answer testing every registered sphere.
    #[must_use]
    pub fn collide_brute_force(&self, radius: f64, center: &Point3<f64>) -> bool {
        self.spheres.iter().any(|s| s.overlaps(radius, center))
    }

    /// Cells touched by the bounding box of a sphere, clamped to the grid.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation
    )]
    fn incident_cells(&self, radius: f64, center: &Point3<f64>) -> Option<CellRange> {
        if self.cells.is_empty() {
            return None;
        }

        let rel = center - self.origin;
        let mut lo = [0; 3];
        let mut hi = [0; 3];
        for i in 0..3 {
            let a = ((rel[i] - radius) / self.edge).floor();
            let b = ((rel[i] + radius) / self.edge).floor();
            let last = (self.dim[i] - 1) as f64;
            if b < 0.0 || a > last {
                return None;
            }
            lo[i] = a.max(0.0) as usize;
            hi[i] = b.min(last) as usize;
        }
        Some((lo, hi))
    }
}

/// Number of cells covering `extent` at cell edge `edge`, in floating point
/// so huge layouts cannot overflow.
fn layout(extent: &Vector3<f64>, edge: f64) -> f64 {
    extent
        .iter()
        .map(|e| ((e / edge).floor() + 1.0).max(1.0))
        .product()
}

fn cell_indices(dim: [usize; 3], (lo, hi): CellRange) -> impl Iterator<Item = usize> {
    (lo[2]..=hi[2]).flat_map(move |k| {
        (lo[1]..=hi[1]).flat_map(move |j| {
            (lo[0]..=hi[0]).map(move |i| (k * dim[1] + j) * dim[0] + i)
        })
    })
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

    fn lattice() -> SphereGrid {
        let mut grid = SphereGrid::new();
        for i in 0..5 {
            for j in 0..5 {
                grid.add(0.25, Point3::new(f64::from(i), f64::from(j), 0.0));
            }
        }
        grid
    }

    #[test]
    fn test_empty_grid() {
        let mut grid = SphereGrid::new();
        grid.build(0.0);
        assert_eq!(grid.cell_count(), 0);
        assert!(!grid.collide(1.0, &Point3::origin()));
    }

    #[test]
    fn test_unbuilt_grid_reports_nothing() {
        let grid = lattice();
        assert!(!grid.collide(0.5, &Point3::origin()));
        assert!(grid.collide_brute_force(0.5, &Point3::origin()));
    }

    #[test]
    fn test_default_edge_is_twice_average_radius() {
        let mut grid = SphereGrid::new();
        grid.add(1.0, Point3::origin());
        grid.add(3.0, Point3::new(10.0, 0.0, 0.0));
        grid.build(0.0);
        assert_eq!(grid.edge(), 4.0);
        assert_eq!(grid.len(), 2);
        assert!(grid.cell_count() > 0);
    }

    #[test]
    fn test_lattice_queries() {
        let mut grid = lattice();
        grid.build(0.0);

        // Cell centers of the lattice lie 0.707 from the nearest spheres.
        assert!(!grid.collide(0.2, &Point3::new(0.5, 0.5, 0.0)));
        assert!(grid.collide(0.5, &Point3::new(0.5, 0.5, 0.0)));
        assert!(grid.collide(0.1, &Point3::new(4.0, 4.0, 0.2)));

        // Exactly touching is not a collision.
        assert!(!grid.collide(0.25, &Point3::new(0.5, 0.0, 0.0)));

        // Outside the grid.
        assert!(!grid.collide(0.5, &Point3::new(20.0, 0.0, 0.0)));
        assert!(grid.collide(1.0, &Point3::new(-1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_large_query_spans_many_cells() {
        let mut grid = lattice();
        grid.build(0.1);
        assert!(grid.collide(3.0, &Point3::new(2.0, 2.0, 2.5)));
        assert!(!grid.collide(2.0, &Point3::new(2.0, 2.0, 2.5)));
    }

    #[test]
    fn test_tiny_edge_over_huge_extent_is_coarsened() {
        let mut grid = SphereGrid::new();
        grid.add(0.5, Point3::origin());
        grid.add(0.5, Point3::new(1e7, 0.0, 0.0));
        grid.build(1e-3);

        assert!(grid.edge() > 1e-3);
        assert!(grid.cell_count() <= MIN_CELL_BUDGET);
        assert!(grid.collide(0.1, &Point3::new(0.3, 0.0, 0.0)));
        assert!(grid.collide(0.1, &Point3::new(1e7 - 0.3, 0.0, 0.0)));
        assert!(!grid.collide(0.1, &Point3::new(5e6, 0.0, 0.0)));
    }

    #[test]
    fn test_grid_matches_brute_force() {
        let mut grid = SphereGrid::new();
        for i in 0..60 {
            let t = f64::from(i);
            grid.add(
                0.1 + 0.05 * (t * 0.7).sin().abs(),
                Point3::new((t * 1.3).sin() * 3.0, (t * 0.5).cos() * 3.0, (t * 0.2).sin()),
            );
        }

        for edge in [0.0, 0.2, 0.7, 5.0] {
            grid.build(edge);
            for q in 0..200 {
                let s = f64::from(q);
                let center = Point3::new((s * 0.31).cos() * 4.0, (s * 0.17).sin() * 4.0, (s * 0.05).cos());
                let radius = 0.05 + 0.3 * (s * 0.11).sin().abs();
                assert_eq!(
                    grid.collide(radius, &center),
                    grid.collide_brute_force(radius, &center),
                    "edge {edge}, query {q}"
                );
            }
        }
    }
}
