//! Broad-phase pruning of geom pairs.
//!
//! The broad phase turns a set of geoms into candidate pairs whose world
//! bounding boxes overlap. It must never miss a colliding pair; false
//! positives are resolved by OBB tree traversal and the narrow phase.
//!
//! # Algorithm
//!
//! Sweep-and-Prune works by:
//! 1. Computing a world AABB for every geom from its root OBB
//! 2. Projecting the boxes onto the axis with the largest spread of centers
//! 3. Keeping the intervals sorted across calls (insertion sort is close to
//!    O(n) on the nearly sorted lists of coherent motion)
//! 4. Sweeping the sorted intervals and confirming overlaps on all three axes
//!
//! # Example
//!
//! ```
//! use cd_core::broad_phase::{Aabb, BroadPhase, GeomEntry, SweepAndPrune};
//! use cd_core::GeomId;
//! use nalgebra::{Point3, Vector3};
//!
//! let entries = vec![
//!     GeomEntry::new(GeomId(0), Aabb::from_center(Point3::origin(), Vector3::repeat(1.0))),
//!     GeomEntry::new(GeomId(1), Aabb::from_center(Point3::new(1.5, 0.0, 0.0), Vector3::repeat(1.0))),
//! ];
//!
//! let mut sap = SweepAndPrune::new();
//! let pairs = sap.find_potential_pairs(&entries);
//! assert_eq!(pairs, vec![(GeomId(0), GeomId(1))]);
//! ```

use std::sync::Arc;

use cd_types::{BroadPhaseAlgorithm, CollisionConfig, GeomId, Pose};
use hashbrown::HashSet;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::obb::Obb;

/// An axis-aligned bounding box in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box.
    pub min: Point3<f64>,
    /// Maximum corner of the bounding box.
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create a new AABB from minimum and maximum corners.
    #[must_use]
    pub const fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with the given half-extents.
    #[must_use]
    pub fn from_center(center: Point3<f64>, half_extents: Vector3<f64>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// World AABB of `obb` placed at `pose`.
    #[must_use]
    pub fn from_obb(obb: &Obb, pose: &Pose) -> Self {
        let world = obb.transformed(pose);
        let half = world.axes.abs() * world.half_extents;
        Self::from_center(world.center, half)
    }

    /// Check if this AABB overlaps with another AABB.
    ///
    /// Touching boxes overlap; the broad phase errs on the side of
    /// candidates.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Expand this AABB by a margin on all sides.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        let m = Vector3::repeat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Center of the box.
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Get the extent (size) along a specific axis.
    #[must_use]
    pub fn extent(&self, axis: Axis) -> f64 {
        self.max_on_axis(axis) - self.min_on_axis(axis)
    }

    /// Get the minimum value along a specific axis.
    #[must_use]
    pub fn min_on_axis(&self, axis: Axis) -> f64 {
        self.min[axis.index()]
    }

    /// Get the maximum value along a specific axis.
    #[must_use]
    pub fn max_on_axis(&self, axis: Axis) -> f64 {
        self.max[axis.index()]
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Point3::origin(), Point3::origin())
    }
}

/// Coordinate axis for sweep direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// X-axis.
    X,
    /// Y-axis.
    Y,
    /// Z-axis.
    Z,
}

impl Axis {
    /// Get all three axes.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::X, Self::Y, Self::Z]
    }

    /// Component index of the axis.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

/// A geom as seen by the broad phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeomEntry {
    /// Geom handle reported in pairs.
    pub id: GeomId,
    /// World bounding box under the geom's current pose.
    pub aabb: Aabb,
}

impl GeomEntry {
    /// Create an entry.
    #[must_use]
    pub const fn new(id: GeomId, aabb: Aabb) -> Self {
        Self { id, aabb }
    }
}

/// Trait for broad-phase collision detection algorithms.
pub trait BroadPhase {
    /// Find all pairs of geoms that potentially collide.
    ///
    /// Pairs are ordered `(lower id, higher id)`, unique and sorted.
    fn find_potential_pairs(&mut self, geoms: &[GeomEntry]) -> Vec<(GeomId, GeomId)>;
}

fn ordered(a: GeomId, b: GeomId) -> (GeomId, GeomId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn sorted_pairs(set: HashSet<(GeomId, GeomId)>) -> Vec<(GeomId, GeomId)> {
    let mut pairs: Vec<_> = set.into_iter().collect();
    pairs.sort_unstable();
    pairs
}

// =============================================================================
// Sweep-and-prune
// =============================================================================

/// Sweep-and-Prune (Sort-and-Sweep) broad-phase algorithm.
///
/// Intervals are cached between calls and re-sorted by insertion sort, so
/// scenes with coherent motion pay close to linear time per call.
#[derive(Debug, Clone)]
pub struct SweepAndPrune {
    /// Cached intervals, sorted by minimum endpoint on the sweep axis.
    intervals: Vec<Interval>,
    /// The axis to sweep along (auto-selected based on scene spread).
    sweep_axis: Axis,
    /// Margin to add to AABBs.
    margin: f64,
    /// Initial capacity of the pair set.
    pair_capacity: usize,
    /// Workers for the confirmation step; sequential without one.
    pool: Option<Arc<ThreadPool>>,
}

/// An interval on the sweep axis.
#[derive(Debug, Clone, Copy)]
struct Interval {
    /// Index into the entry slice.
    entry: usize,
    /// Minimum endpoint on the sweep axis.
    min: f64,
    /// Maximum endpoint on the sweep axis.
    max: f64,
}

impl Default for SweepAndPrune {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepAndPrune {
    /// Create a new sequential sweep-and-prune broad phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            intervals: Vec::new(),
            sweep_axis: Axis::X,
            margin: 0.0,
            pair_capacity: 0,
            pool: None,
        }
    }

    /// Expand every box by `margin`.
    #[must_use]
    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    /// Reserve room for `capacity` pairs.
    #[must_use]
    pub fn with_pair_capacity(mut self, capacity: usize) -> Self {
        self.pair_capacity = capacity;
        self
    }

    /// Confirm overlaps on a private pool of `threads` rayon workers.
    ///
    /// Falls back to sequential confirmation if the pool cannot be built.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.pool = if threads > 1 {
            match ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => Some(Arc::new(pool)),
                Err(e) => {
                    warn!(threads, error = %e, "sweep-and-prune runs sequentially");
                    None
                }
            }
        } else {
            None
        };
        self
    }

    /// Confirm overlaps on a shared pool.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = (pool.current_num_threads() > 1).then_some(pool);
        self
    }

    /// Number of workers confirming overlaps.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |pool| pool.current_num_threads())
    }

    /// Current sweep axis.
    #[must_use]
    pub const fn sweep_axis(&self) -> Axis {
        self.sweep_axis
    }

    /// Choose the axis with the largest spread of box centers.
    fn choose_sweep_axis(geoms: &[GeomEntry]) -> Axis {
        if geoms.is_empty() {
            return Axis::X;
        }

        let mut min_pos = Vector3::repeat(f64::INFINITY);
        let mut max_pos = Vector3::repeat(f64::NEG_INFINITY);
        for entry in geoms {
            let c = entry.aabb.center().coords;
            min_pos = min_pos.inf(&c);
            max_pos = max_pos.sup(&c);
        }

        let spread = max_pos - min_pos;
        if spread.x >= spread.y && spread.x >= spread.z {
            Axis::X
        } else if spread.y >= spread.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }

    fn aabb(&self, entry: &GeomEntry) -> Aabb {
        if self.margin > 0.0 {
            entry.aabb.expanded(self.margin)
        } else {
            entry.aabb
        }
    }

    /// Refresh cached intervals from `geoms`, rebuilding them when the
    /// entry set or the sweep axis changed.
    fn update_intervals(&mut self, geoms: &[GeomEntry]) {
        let axis = Self::choose_sweep_axis(geoms);
        let reuse = axis == self.sweep_axis && self.intervals.len() == geoms.len();
        self.sweep_axis = axis;

        if reuse {
            for interval in &mut self.intervals {
                let aabb = if self.margin > 0.0 {
                    geoms[interval.entry].aabb.expanded(self.margin)
                } else {
                    geoms[interval.entry].aabb
                };
                interval.min = aabb.min_on_axis(axis);
                interval.max = aabb.max_on_axis(axis);
            }
            insertion_sort(&mut self.intervals);
        } else {
            self.intervals = geoms
                .iter()
                .enumerate()
                .map(|(entry, g)| {
                    let aabb = self.aabb(g);
                    Interval {
                        entry,
                        min: aabb.min_on_axis(axis),
                        max: aabb.max_on_axis(axis),
                    }
                })
                .collect();
            self.intervals.sort_by(|a, b| a.min.total_cmp(&b.min));
        }
    }

    /// Candidates overlapping the interval at sorted position `i`.
    fn sweep_from(&self, geoms: &[GeomEntry], i: usize) -> Vec<(GeomId, GeomId)> {
        let a = &self.intervals[i];
        let aabb_a = self.aabb(&geoms[a.entry]);
        self.intervals[i + 1..]
            .iter()
            .take_while(|b| b.min <= a.max)
            .filter(|b| aabb_a.overlaps(&self.aabb(&geoms[b.entry])))
            .map(|b| ordered(geoms[a.entry].id, geoms[b.entry].id))
            .collect()
    }
}

fn insertion_sort(intervals: &mut [Interval]) {
    for i in 1..intervals.len() {
        let mut j = i;
        while j > 0 && intervals[j - 1].min > intervals[j].min {
            intervals.swap(j - 1, j);
            j -= 1;
        }
    }
}

impl BroadPhase for SweepAndPrune {
    fn find_potential_pairs(&mut self, geoms: &[GeomEntry]) -> Vec<(GeomId, GeomId)> {
        self.update_intervals(geoms);

        let mut set = HashSet::with_capacity(self.pair_capacity);
        if let Some(pool) = &self.pool {
            let found: Vec<Vec<(GeomId, GeomId)>> = pool.install(|| {
                (0..self.intervals.len())
                    .into_par_iter()
                    .map(|i| self.sweep_from(geoms, i))
                    .collect()
            });
            set.extend(found.into_iter().flatten());
        } else {
            for i in 0..self.intervals.len() {
                set.extend(self.sweep_from(geoms, i));
            }
        }

        debug!(
            geoms = geoms.len(),
            pairs = set.len(),
            axis = ?self.sweep_axis,
            threads = self.threads(),
            "sweep-and-prune"
        );
        sorted_pairs(set)
    }
}

// =============================================================================
// Brute force
// =============================================================================

/// O(n²) broad phase testing every pair of boxes.
///
/// The reference for sweep-and-prune, and the right choice for scenes of a
/// handful of geoms.
#[derive(Debug, Clone, Default)]
pub struct BruteForce {
    /// Margin for AABB expansion.
    margin: f64,
}

impl BruteForce {
    /// Create a new brute-force broad phase.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand every box by `margin`.
    #[must_use]
    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }
}

impl BroadPhase for BruteForce {
    fn find_potential_pairs(&mut self, geoms: &[GeomEntry]) -> Vec<(GeomId, GeomId)> {
        let mut set = HashSet::new();
        for (i, a) in geoms.iter().enumerate() {
            let aabb_a = a.aabb.expanded(self.margin);
            for b in &geoms[i + 1..] {
                if aabb_a.overlaps(&b.aabb.expanded(self.margin)) {
                    set.insert(ordered(a.id, b.id));
                }
            }
        }
        debug!(geoms = geoms.len(), pairs = set.len(), "brute-force broad phase");
        sorted_pairs(set)
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Broad phase selected by [`BroadPhaseAlgorithm`].
#[derive(Debug, Clone)]
pub struct BroadPhaseDetector {
    algorithm: BroadPhaseAlgorithm,
    sap: SweepAndPrune,
    brute: BruteForce,
}

impl Default for BroadPhaseDetector {
    fn default() -> Self {
        Self::new(&CollisionConfig::default())
    }
}

impl BroadPhaseDetector {
    /// Create the broad phase of an engine configuration.
    ///
    /// Sweep-and-prune confirms sequentially until a pool is attached with
    /// [`with_pool`](Self::with_pool).
    #[must_use]
    pub fn new(config: &CollisionConfig) -> Self {
        Self {
            algorithm: config.broad_phase,
            sap: SweepAndPrune::new().with_pair_capacity(config.pair_capacity),
            brute: BruteForce::new(),
        }
    }

    /// Run sweep-and-prune confirmation on `pool`.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.sap = self.sap.with_pool(pool);
        self
    }

    /// Number of workers the sweep-and-prune confirmation uses.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.sap.threads()
    }

    /// The selected algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> BroadPhaseAlgorithm {
        self.algorithm
    }

    /// Find all potentially colliding pairs.
    pub fn find_potential_pairs(&mut self, geoms: &[GeomEntry]) -> Vec<(GeomId, GeomId)> {
        match self.algorithm {
            BroadPhaseAlgorithm::SweepAndPrune => self.sap.find_potential_pairs(geoms),
            BroadPhaseAlgorithm::BruteForce => self.brute.find_potential_pairs(geoms),
        }
    }
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
    use nalgebra::Matrix3;

    fn cube(id: usize, x: f64, y: f64, z: f64, half: f64) -> GeomEntry {
        GeomEntry::new(
            GeomId(id),
            Aabb::from_center(Point3::new(x, y, z), Vector3::repeat(half)),
        )
    }

    #[test]
    fn test_aabb_overlaps() {
        let a = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let b = Aabb::new(Point3::new(0.5, 0.5, 0.5), Point3::new(1.5, 1.5, 1.5));
        let c = Aabb::new(Point3::new(2.0, 2.0, 2.0), Point3::new(3.0, 3.0, 3.0));
        let d = Aabb::new(Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0));

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(a.overlaps(&d));
    }

    #[test]
    fn test_aabb_expanded() {
        let a = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let e = a.expanded(0.5);
        assert_eq!(e.min, Point3::new(-0.5, -0.5, -0.5));
        assert_eq!(e.max, Point3::new(1.5, 1.5, 1.5));
        assert_eq!(e.extent(Axis::Y), 2.0);
    }

    #[test]
    fn test_aabb_from_rotated_obb() {
        let obb = Obb::new(
            Point3::origin(),
            Matrix3::identity(),
            Vector3::new(1.0, 0.5, 0.5),
        );
        let pose = Pose::from_euler(Point3::new(5.0, 0.0, 0.0), 0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let aabb = Aabb::from_obb(&obb, &pose);

        assert_relative_eq!(aabb.min, Point3::new(4.5, -1.0, -0.5), epsilon = 1e-12);
        assert_relative_eq!(aabb.max, Point3::new(5.5, 1.0, 0.5), epsilon = 1e-12);
    }

    #[test]
    fn test_sweep_and_prune_finds_overlapping() {
        let geoms = vec![cube(0, 0.0, 0.0, 0.0, 1.0), cube(1, 1.5, 0.0, 0.0, 1.0)];
        let mut sap = SweepAndPrune::new();
        assert_eq!(sap.find_potential_pairs(&geoms), vec![(GeomId(0), GeomId(1))]);
    }

    #[test]
    fn test_sweep_and_prune_no_overlap() {
        let geoms = vec![cube(0, 0.0, 0.0, 0.0, 1.0), cube(1, 5.0, 0.0, 0.0, 1.0)];
        let mut sap = SweepAndPrune::new();
        assert!(sap.find_potential_pairs(&geoms).is_empty());
    }

    #[test]
    fn test_overlap_confirmed_on_all_axes() {
        // Overlap on x only.
        let geoms = vec![cube(0, 0.0, 0.0, 0.0, 1.0), cube(1, 0.5, 5.0, 0.0, 1.0)];
        let mut sap = SweepAndPrune::new();
        assert!(sap.find_potential_pairs(&geoms).is_empty());
    }

    #[test]
    fn test_sweep_axis_follows_spread() {
        let geoms: Vec<_> = (0..5).map(|i| cube(i, 0.0, 0.0, 3.0 * i as f64, 1.0)).collect();
        let mut sap = SweepAndPrune::new();
        sap.find_potential_pairs(&geoms);
        assert_eq!(sap.sweep_axis(), Axis::Z);
    }

    #[test]
    fn test_cached_intervals_follow_motion() {
        let mut geoms = vec![
            cube(0, 0.0, 0.0, 0.0, 0.5),
            cube(1, 3.0, 0.0, 0.0, 0.5),
            cube(2, 6.0, 0.0, 0.0, 0.5),
        ];
        let mut sap = SweepAndPrune::new();
        assert!(sap.find_potential_pairs(&geoms).is_empty());

        // Geom 2 overtakes geom 1 and lands on geom 0.
        geoms[2] = cube(2, 0.5, 0.0, 0.0, 0.5);
        assert_eq!(sap.find_potential_pairs(&geoms), vec![(GeomId(0), GeomId(2))]);

        geoms[2] = cube(2, 9.0, 0.0, 0.0, 0.5);
        assert!(sap.find_potential_pairs(&geoms).is_empty());
    }

    #[test]
    fn test_brute_force_matches_sap() {
        let geoms: Vec<_> = (0..40)
            .map(|i| {
                let t = i as f64;
                cube(i, (t * 0.37).sin() * 4.0, (t * 0.91).cos() * 4.0, (t * 0.13).sin(), 0.6)
            })
            .collect();

        let mut sap = SweepAndPrune::new();
        let mut parallel = SweepAndPrune::new().with_threads(3);
        let mut brute = BruteForce::new();

        let expected = brute.find_potential_pairs(&geoms);
        assert!(!expected.is_empty());
        assert_eq!(sap.find_potential_pairs(&geoms), expected);
        assert_eq!(parallel.find_potential_pairs(&geoms), expected);
    }

    #[test]
    fn test_confirmation_uses_shared_pool() {
        let geoms: Vec<_> = (0..25)
            .map(|i| {
                let t = i as f64;
                cube(i, (t * 0.5).cos() * 3.0, (t * 0.8).sin() * 3.0, 0.0, 0.7)
            })
            .collect();
        let pool = Arc::new(ThreadPoolBuilder::new().num_threads(2).build().unwrap());

        let mut shared = BroadPhaseDetector::default().with_pool(Arc::clone(&pool));
        assert_eq!(shared.threads(), 2);
        assert_eq!(
            shared.find_potential_pairs(&geoms),
            BruteForce::new().find_potential_pairs(&geoms)
        );

        let single = Arc::new(ThreadPoolBuilder::new().num_threads(1).build().unwrap());
        assert_eq!(SweepAndPrune::new().with_pool(single).threads(), 1);
        assert_eq!(BroadPhaseDetector::default().threads(), 1);
    }

    #[test]
    fn test_margin_expands_detection() {
        let geoms = vec![cube(0, 0.0, 0.0, 0.0, 1.0), cube(1, 2.2, 0.0, 0.0, 1.0)];
        assert!(SweepAndPrune::new().find_potential_pairs(&geoms).is_empty());
        assert_eq!(
            SweepAndPrune::new()
                .with_margin(0.2)
                .find_potential_pairs(&geoms)
                .len(),
            1
        );
        assert_eq!(
            BruteForce::new().with_margin(0.2).find_potential_pairs(&geoms).len(),
            1
        );
    }

    #[test]
    fn test_detector_selects_algorithm() {
        let geoms = vec![cube(3, 0.0, 0.0, 0.0, 1.0), cube(1, 0.5, 0.0, 0.0, 1.0)];

        let mut sap = BroadPhaseDetector::default();
        assert_eq!(sap.algorithm(), BroadPhaseAlgorithm::SweepAndPrune);
        assert_eq!(sap.find_potential_pairs(&geoms), vec![(GeomId(1), GeomId(3))]);

        let mut brute = BroadPhaseDetector::new(&CollisionConfig::default().without_sap());
        assert_eq!(brute.algorithm(), BroadPhaseAlgorithm::BruteForce);
        assert_eq!(brute.find_potential_pairs(&geoms), vec![(GeomId(1), GeomId(3))]);
    }
}
