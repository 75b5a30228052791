//! Hierarchies of oriented bounding boxes.
//!
//! An [`ObbTree`] is an arena of [`ObbNode`]s built once from a geom's
//! shapes. Leaves hold exactly one primitive shape (composites are expanded
//! into their triangles); internal nodes hold child indices and a box fitted
//! around every leaf below them.
//!
//! Construction is top-down (recursive split) or bottom-up (nearest-pair
//! merging). With more than one build thread the leaf list is statically
//! partitioned, each worker builds its chunk in a private arena, and the
//! subtrees are merged pairwise over `ceil(log2 K)` fan-in levels, every
//! level ending at a shared [`Barrier`].

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::{Barrier, Mutex, MutexGuard, PoisonError};
use std::thread;

use cd_types::{BuildConfig, BuildStrategy, Pose};
use nalgebra::Point3;
use smallvec::{smallvec, SmallVec};
use tracing::debug;

use crate::fit::fit_shapes;
use crate::obb::Obb;
use crate::shape::Shape;

/// Contents of a tree node.
#[derive(Debug, Clone)]
pub enum ObbNodeKind {
    /// Exactly one primitive shape.
    Leaf(Shape),
    /// Indices of child nodes in the same arena.
    Internal(SmallVec<[usize; 2]>),
}

/// A box plus either a shape or children.
#[derive(Debug, Clone)]
pub struct ObbNode {
    /// Box in the owning geom's frame.
    pub obb: Obb,
    /// Leaf shape or child indices.
    pub kind: ObbNodeKind,
}

impl ObbNode {
    /// True for leaf nodes.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self.kind, ObbNodeKind::Leaf(_))
    }

    /// The leaf's shape.
    #[must_use]
    pub const fn shape(&self) -> Option<&Shape> {
        match &self.kind {
            ObbNodeKind::Leaf(shape) => Some(shape),
            ObbNodeKind::Internal(_) => None,
        }
    }

    /// Child indices (empty for leaves).
    #[must_use]
    pub fn children(&self) -> &[usize] {
        match &self.kind {
            ObbNodeKind::Leaf(_) => &[],
            ObbNodeKind::Internal(children) => children,
        }
    }
}

/// Statistics about tree structure.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObbTreeStats {
    /// Number of internal nodes.
    pub internal_count: usize,
    /// Number of leaves.
    pub leaf_count: usize,
    /// Depth of the deepest leaf (root = 0).
    pub max_depth: usize,
}

/// Arena-allocated OBB hierarchy.
#[derive(Debug, Clone, Default)]
pub struct ObbTree {
    nodes: Vec<ObbNode>,
    root: Option<usize>,
}

impl ObbTree {
    /// Build a tree around `shapes`, all given in the owning geom's frame.
    ///
    /// No shapes yields an empty tree, which never overlaps anything.
    #[must_use]
    pub fn build(shapes: &[Shape], config: &BuildConfig) -> Self {
        let leaves: Vec<Shape> = shapes.iter().flat_map(Shape::leaves).collect();
        if leaves.is_empty() {
            debug!("building OBB tree without shapes");
            return Self::default();
        }

        let leaf_total = leaves.len();
        let workers = config.threads.clamp(1, leaf_total);
        if workers < config.threads {
            debug!(
                requested = config.threads,
                workers, "fewer leaves than build threads"
            );
        }

        let subtree = if workers > 1 {
            build_parallel(leaves, config, workers)
        } else {
            Some(Subtree::build(leaves, config))
        };

        let tree = subtree.map_or_else(Self::default, |s| Self {
            nodes: s.nodes,
            root: Some(s.root),
        });

        let stats = tree.stats();
        debug!(
            leaves = leaf_total,
            nodes = tree.nodes.len(),
            depth = stats.max_depth,
            strategy = ?config.strategy,
            fit = config.fit.name(),
            workers,
            "built OBB tree"
        );
        tree
    }

    /// True if the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Index of the root node.
    #[must_use]
    pub const fn root(&self) -> Option<usize> {
        self.root
    }

    /// Box of the root node.
    #[must_use]
    pub fn root_obb(&self) -> Option<&Obb> {
        self.root.map(|r| &self.nodes[r].obb)
    }

    /// Node at `index`.
    #[must_use]
    pub fn node(&self, index: usize) -> Option<&ObbNode> {
        self.nodes.get(index)
    }

    /// All nodes in arena order.
    #[must_use]
    pub fn nodes(&self) -> &[ObbNode] {
        &self.nodes
    }

    /// Leaf shapes in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = &Shape> {
        self.nodes.iter().filter_map(ObbNode::shape)
    }

    /// Get statistics about the tree structure.
    #[must_use]
    pub fn stats(&self) -> ObbTreeStats {
        let mut stats = ObbTreeStats::default();
        let mut stack: Vec<(usize, usize)> = self.root.map(|r| (r, 0)).into_iter().collect();

        while let Some((index, depth)) = stack.pop() {
            stats.max_depth = stats.max_depth.max(depth);
            match &self.nodes[index].kind {
                ObbNodeKind::Leaf(_) => stats.leaf_count += 1,
                ObbNodeKind::Internal(children) => {
                    stats.internal_count += 1;
                    stack.extend(children.iter().map(|&c| (c, depth + 1)));
                }
            }
        }
        stats
    }

    /// Walk this tree (placed at `pose`) and `other` (placed at
    /// `other_pose`) in lock-step, pruning node pairs whose boxes are
    /// disjoint, and hand every overlapping leaf pair to `visit`.
    ///
    /// Returns `Break` as soon as `visit` does.
    pub fn overlap_pairs<F>(
        &self,
        pose: &Pose,
        other: &Self,
        other_pose: &Pose,
        mut visit: F,
    ) -> ControlFlow<()>
    where
        F: FnMut(&Shape, &Shape) -> ControlFlow<()>,
    {
        let (Some(ra), Some(rb)) = (self.root, other.root) else {
            return ControlFlow::Continue(());
        };

        let mut queue = VecDeque::from([(ra, rb)]);
        while let Some((a, b)) = queue.pop_front() {
            let (na, nb) = (&self.nodes[a], &other.nodes[b]);
            if na.obb.disjoint(pose, &nb.obb, other_pose) {
                continue;
            }

            match (&na.kind, &nb.kind) {
                (ObbNodeKind::Leaf(sa), ObbNodeKind::Leaf(sb)) => visit(sa, sb)?,
                (ObbNodeKind::Internal(ca), ObbNodeKind::Internal(_))
                    if na.obb.radius >= nb.obb.radius =>
                {
                    queue.extend(ca.iter().map(|&c| (c, b)));
                }
                (ObbNodeKind::Internal(ca), ObbNodeKind::Leaf(_)) => {
                    queue.extend(ca.iter().map(|&c| (c, b)));
                }
                (_, ObbNodeKind::Internal(cb)) => {
                    queue.extend(cb.iter().map(|&c| (a, c)));
                }
            }
        }
        ControlFlow::Continue(())
    }
}

// =============================================================================
// Construction
// =============================================================================

/// A tree under construction: its arena, root and leaf indices.
struct Subtree {
    nodes: Vec<ObbNode>,
    root: usize,
    leaves: Vec<usize>,
}

impl Subtree {
    fn build(shapes: Vec<Shape>, config: &BuildConfig) -> Self {
        let mut builder = Builder {
            config,
            nodes: Vec::with_capacity(shapes.len() * 2),
        };
        let leaves: Vec<usize> = shapes.into_iter().map(|s| builder.push_leaf(s)).collect();
        let root = match config.strategy {
            BuildStrategy::TopDown => builder.top_down(leaves.clone()),
            BuildStrategy::BottomUp => builder.bottom_up(&leaves),
        };
        Self {
            nodes: builder.nodes,
            root,
            leaves,
        }
    }

    /// Join two subtrees under a freshly fitted parent.
    fn merge(self, other: Self, config: &BuildConfig) -> Self {
        let offset = self.nodes.len();
        let mut nodes = self.nodes;
        nodes.extend(other.nodes.into_iter().map(|mut node| {
            if let ObbNodeKind::Internal(children) = &mut node.kind {
                for c in children.iter_mut() {
                    *c += offset;
                }
            }
            node
        }));

        let mut leaves = self.leaves;
        leaves.extend(other.leaves.iter().map(|&l| l + offset));

        let mut builder = Builder { config, nodes };
        let obb = builder.fit(&leaves);
        let root = builder.push_internal(obb, smallvec![self.root, other.root + offset]);
        Self {
            nodes: builder.nodes,
            root,
            leaves,
        }
    }
}

struct Builder<'a> {
    config: &'a BuildConfig,
    nodes: Vec<ObbNode>,
}

impl Builder<'_> {
    fn push_leaf(&mut self, shape: Shape) -> usize {
        self.nodes.push(ObbNode {
            obb: shape.local_obb(),
            kind: ObbNodeKind::Leaf(shape),
        });
        self.nodes.len() - 1
    }

    fn push_internal(&mut self, obb: Obb, children: SmallVec<[usize; 2]>) -> usize {
        self.nodes.push(ObbNode {
            obb,
            kind: ObbNodeKind::Internal(children),
        });
        self.nodes.len() - 1
    }

    fn fit(&self, leaves: &[usize]) -> Obb {
        let shapes: Vec<&Shape> = leaves
            .iter()
            .filter_map(|&l| self.nodes[l].shape())
            .collect();
        fit_shapes(self.config.fit, &shapes)
    }

    fn leaf_center(&self, leaf: usize) -> Point3<f64> {
        self.nodes[leaf]
            .shape()
            .map_or(self.nodes[leaf].obb.center, |s| s.center(&Pose::identity()))
    }

    /// Split along the longest box axis at the mean of the leaf centers;
    /// a degenerate split falls back to the median.
    fn top_down(&mut self, leaves: Vec<usize>) -> usize {
        if leaves.len() == 1 {
            return leaves[0];
        }

        let obb = self.fit(&leaves);
        let axis_index = obb.half_extents.imax();
        let axis = obb.axes.column(axis_index).into_owned();

        let mut keyed: Vec<(f64, usize)> = leaves
            .iter()
            .map(|&l| (self.leaf_center(l).coords.dot(&axis), l))
            .collect();
        let mean = keyed.iter().map(|(k, _)| k).sum::<f64>() / keyed.len() as f64;

        let (mut left, mut right): (Vec<_>, Vec<_>) =
            keyed.iter().copied().partition(|&(k, _)| k < mean);
        if left.is_empty() || right.is_empty() {
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
            right = keyed.split_off(keyed.len() / 2);
            left = keyed;
        }

        let left = self.top_down(left.into_iter().map(|(_, l)| l).collect());
        let right = self.top_down(right.into_iter().map(|(_, l)| l).collect());
        self.push_internal(obb, smallvec![left, right])
    }

    /// Repeatedly merge the two items with the nearest centers.
    fn bottom_up(&mut self, leaves: &[usize]) -> usize {
        struct Item {
            node: usize,
            leaves: Vec<usize>,
            center: Point3<f64>,
        }

        let mut items: Vec<Item> = leaves
            .iter()
            .map(|&l| Item {
                node: l,
                leaves: vec![l],
                center: self.leaf_center(l),
            })
            .collect();

        while items.len() > 1 {
            let mut best = (0, 1, f64::INFINITY);
            for i in 0..items.len() {
                for j in i + 1..items.len() {
                    let d = (items[i].center - items[j].center).norm_squared();
                    if d < best.2 {
                        best = (i, j, d);
                    }
                }
            }

            let (i, j, _) = best;
            let second = items.swap_remove(j);
            let first = items.swap_remove(i);

            let mut merged = first.leaves;
            merged.extend(second.leaves);
            let obb = self.fit(&merged);
            let node = self.push_internal(obb, smallvec![first.node, second.node]);
            items.push(Item {
                node,
                leaves: merged,
                center: obb.center,
            });
        }

        items.first().map_or(0, |item| item.node)
    }
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build with `workers` threads over a static partition of `leaves`.
fn build_parallel(leaves: Vec<Shape>, config: &BuildConfig, workers: usize) -> Option<Subtree> {
    let chunk = leaves.len().div_ceil(workers);
    let mut chunks = Vec::with_capacity(workers);
    let mut rest = leaves;
    while !rest.is_empty() {
        let tail = rest.split_off(chunk.min(rest.len()));
        chunks.push(rest);
        rest = tail;
    }

    let workers = chunks.len();
    let levels = workers.next_power_of_two().trailing_zeros();
    let slots: Vec<Mutex<Option<Subtree>>> = (0..workers).map(|_| Mutex::new(None)).collect();
    let barrier = Barrier::new(workers);

    thread::scope(|scope| {
        for (worker, shapes) in chunks.into_iter().enumerate() {
            let (slots, barrier) = (&slots, &barrier);
            scope.spawn(move || {
                *lock(&slots[worker]) = Some(Subtree::build(shapes, config));

                for level in 0..levels {
                    barrier.wait();
                    let stride = 1 << level;
                    if worker % (stride * 2) != 0 || worker + stride >= workers {
                        continue;
                    }
                    let right = lock(&slots[worker + stride]).take();
                    let mut own = lock(&slots[worker]);
                    *own = match (own.take(), right) {
                        (Some(left), Some(right)) => Some(left.merge(right, config)),
                        (left, right) => left.or(right),
                    };
                }
            });
        }
    });

    slots
        .into_iter()
        .next()
        .and_then(|slot| slot.into_inner().unwrap_or_else(PoisonError::into_inner))
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
    use cd_types::FitMethod;

    fn sphere_row(n: usize) -> Vec<Shape> {
        (0..n)
            .map(|i| {
                let pose = Pose::from_position(Point3::new(i as f64, 0.0, 0.0));
                Shape::offset(Shape::sphere(0.4).unwrap(), pose).unwrap()
            })
            .collect()
    }

    fn grid_mesh(n: usize) -> Shape {
        let heights: Vec<f64> = (0..n * n).map(|i| (i as f64 * 0.37).sin() * 0.2).collect();
        Shape::height_field(n, n, 0.25, 0.25, &heights).unwrap()
    }

    fn assert_bounds_leaves(tree: &ObbTree) {
        for node in tree.nodes() {
            for &child in node.children() {
                let child = tree.node(child).unwrap();
                let mut points = Vec::new();
                child
                    .shape()
                    .into_iter()
                    .for_each(|s| s.collect_hull_points(&Pose::identity(), &mut points));
                for p in points {
                    assert!(node.obb.contains(&p, 1e-9));
                }
            }
        }
    }

    #[test]
    fn test_empty_build() {
        let tree = ObbTree::build(&[], &BuildConfig::default());
        assert!(tree.is_empty());
        assert!(tree.root_obb().is_none());
        assert_eq!(tree.stats(), ObbTreeStats::default());

        let other = ObbTree::build(&sphere_row(2), &BuildConfig::default());
        let flow = tree.overlap_pairs(&Pose::identity(), &other, &Pose::identity(), |_, _| {
            panic!("empty tree has no leaves")
        });
        assert!(flow.is_continue());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let tree = ObbTree::build(&sphere_row(1), &BuildConfig::default());
        let stats = tree.stats();
        assert_eq!(stats.leaf_count, 1);
        assert_eq!(stats.internal_count, 0);
        assert!(tree.node(tree.root().unwrap()).unwrap().is_leaf());
    }

    #[test]
    fn test_top_down_binary() {
        let tree = ObbTree::build(&sphere_row(16), &BuildConfig::default());
        let stats = tree.stats();
        assert_eq!(stats.leaf_count, 16);
        assert_eq!(stats.internal_count, 15);
        assert_eq!(stats.max_depth, 4);
        assert_bounds_leaves(&tree);
    }

    #[test]
    fn test_bottom_up() {
        let config = BuildConfig::default().strategy(BuildStrategy::BottomUp);
        let tree = ObbTree::build(&[grid_mesh(5)], &config);
        let stats = tree.stats();
        assert_eq!(stats.leaf_count, 32);
        assert_eq!(stats.internal_count, 31);
        assert_bounds_leaves(&tree);
    }

    #[test]
    fn test_identical_centers_split() {
        let shapes: Vec<Shape> = (0..5).map(|_| Shape::sphere(1.0).unwrap()).collect();
        let tree = ObbTree::build(&shapes, &BuildConfig::default());
        assert_eq!(tree.stats().leaf_count, 5);
        assert_eq!(tree.stats().internal_count, 4);
    }

    #[test]
    fn test_parallel_matches_leaf_count() {
        for threads in [2, 3, 4, 7] {
            let config = BuildConfig::parallel(threads).fit(FitMethod::CovarianceFast);
            let tree = ObbTree::build(&[grid_mesh(6)], &config);
            let stats = tree.stats();
            assert_eq!(stats.leaf_count, 50, "threads = {threads}");
            assert_eq!(stats.internal_count, 49, "threads = {threads}");
            assert_bounds_leaves(&tree);
        }
    }

    #[test]
    fn test_more_threads_than_leaves() {
        let tree = ObbTree::build(&sphere_row(3), &BuildConfig::parallel(8));
        assert_eq!(tree.stats().leaf_count, 3);
    }

    #[test]
    fn test_overlap_pairs_prunes() {
        let row = ObbTree::build(&sphere_row(8), &BuildConfig::default());
        let query = ObbTree::build(&[Shape::sphere(0.2).unwrap()], &BuildConfig::default());

        let mut hits = 0;
        let at = Pose::from_position(Point3::new(3.0, 0.5, 0.0));
        let flow = row.overlap_pairs(&Pose::identity(), &query, &at, |a, b| {
            assert_eq!(b.kind(), crate::ShapeKind::Sphere);
            assert!((a.center(&Pose::identity()).x - 3.0).abs() < 1e-12);
            hits += 1;
            ControlFlow::Continue(())
        });
        assert!(flow.is_continue());
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_overlap_pairs_break() {
        let a = ObbTree::build(&sphere_row(8), &BuildConfig::default());
        let b = ObbTree::build(&sphere_row(8), &BuildConfig::default());
        let mut visits = 0;
        let flow = a.overlap_pairs(&Pose::identity(), &b, &Pose::identity(), |_, _| {
            visits += 1;
            ControlFlow::Break(())
        });
        assert!(flow.is_break());
        assert_eq!(visits, 1);
    }

    #[test]
    fn test_rotated_traversal_uses_pose() {
        let a = ObbTree::build(&sphere_row(4), &BuildConfig::default());
        let b = ObbTree::build(&[Shape::cuboid(0.2, 0.2, 0.2).unwrap()], &BuildConfig::default());

        // row along +x rotated onto +y
        let rot = Pose::from_euler(Point3::origin(), 0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let query = Pose::from_position(Point3::new(0.0, 2.0, 0.0));
        let mut hits = 0;
        let _ = a.overlap_pairs(&rot, &b, &query, |_, _| {
            hits += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(hits, 1);
    }
}
