//! The collision engine: geom registry, query cycles and callbacks.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cd_types::{CdError, CollisionConfig, ContactSet, GeomId, Pose, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::broad_phase::{BroadPhaseDetector, GeomEntry};
use crate::geom::Geom;
use crate::narrow_phase::NarrowPhase;
use crate::persistence::{ContactPersistence, MaintenanceStats, PersistentGeom};

/// Collision detection over a set of geoms.
///
/// A query cycle runs the broad phase over the world boxes of every geom,
/// walks the OBB trees of each candidate pair in lock-step, confirms leaf
/// pairs with the narrow phase and hands colliding geom pairs to a
/// callback. With more than one thread, sweep-and-prune and candidate
/// pairs are evaluated on one private rayon pool and callbacks are
/// serialized behind one lock.
///
/// Geom handles are never reused: after
/// [`remove_geom`](Self::remove_geom) the handle stays invalid.
///
/// # Example
///
/// ```
/// use cd_core::{CollisionEngine, Geom};
/// use cd_types::CollisionConfig;
/// use nalgebra::Point3;
/// use std::ops::ControlFlow;
///
/// let mut engine = CollisionEngine::new(CollisionConfig::default())?;
///
/// let mut a = Geom::new();
/// a.add_sphere(0.5)?;
/// let a = engine.add_geom(a);
///
/// let mut b = Geom::new();
/// b.add_sphere(0.5)?;
/// b.set_position(Point3::new(0.9, 0.0, 0.0));
/// let b = engine.add_geom(b);
///
/// let mut hits = Vec::new();
/// assert!(engine.collide(|_, g1, g2| {
///     hits.push((g1, g2));
///     ControlFlow::Continue(())
/// }));
/// assert_eq!(hits, vec![(a, b)]);
/// # Ok::<(), cd_types::CdError>(())
/// ```
#[derive(Debug)]
pub struct CollisionEngine {
    config: CollisionConfig,
    narrow: NarrowPhase,
    geoms: Vec<Option<Geom>>,
    live: usize,
    broad_phase: BroadPhaseDetector,
    persistence: Option<ContactPersistence>,
    pool: Option<Arc<ThreadPool>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CollisionEngine {
    /// Create an engine after validating `config`.
    pub fn new(config: CollisionConfig) -> Result<Self> {
        config.validate()?;

        let pool = if config.num_threads > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(config.num_threads)
                .build()
                .map_err(|e| CdError::invalid_config(format!("thread pool: {e}")))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        let persistence = config
            .persistence
            .enabled
            .then(|| ContactPersistence::new(config.persistence, config.persistence_capacity()));

        debug!(
            threads = config.num_threads,
            broad_phase = ?config.broad_phase,
            persistence = persistence.is_some(),
            "created collision engine"
        );

        let broad_phase = match &pool {
            Some(pool) => BroadPhaseDetector::new(&config).with_pool(Arc::clone(pool)),
            None => BroadPhaseDetector::new(&config),
        };

        Ok(Self {
            narrow: NarrowPhase::from_config(&config),
            broad_phase,
            geoms: Vec::new(),
            live: 0,
            persistence,
            pool,
            config,
        })
    }

    /// The configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &CollisionConfig {
        &self.config
    }

    /// The narrow phase used for leaf pairs.
    #[must_use]
    pub const fn narrow_phase(&self) -> &NarrowPhase {
        &self.narrow
    }

    /// Mutable narrow phase, for installing pair overrides.
    pub fn narrow_phase_mut(&mut self) -> &mut NarrowPhase {
        &mut self.narrow
    }

    /// The broad phase producing candidate pairs.
    #[must_use]
    pub const fn broad_phase(&self) -> &BroadPhaseDetector {
        &self.broad_phase
    }

    // =========================================================================
    // Geoms
    // =========================================================================

    /// Register a geom, building its tree with the engine's build settings.
    pub fn add_geom(&mut self, mut geom: Geom) -> GeomId {
        geom.build(&self.config.build);
        self.geoms.push(Some(geom));
        self.live += 1;
        GeomId(self.geoms.len() - 1)
    }

    /// Unregister a geom and forget its persistent contacts.
    pub fn remove_geom(&mut self, id: GeomId) -> Result<Geom> {
        let geom = self
            .geoms
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(CdError::InvalidGeomId(id.0))?;
        self.live -= 1;

        let forgotten = self
            .persistence
            .as_ref()
            .map_or(0, |cp| cp.remove_geom(id));
        debug!(geom = id.0, forgotten, "removed geom");
        Ok(geom)
    }

    /// Number of registered geoms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// True if no geom is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Registered geoms with their handles.
    pub fn geoms(&self) -> impl Iterator<Item = (GeomId, &Geom)> {
        self.geoms
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.as_ref().map(|g| (GeomId(i), g)))
    }

    /// Geom behind `id`.
    pub fn geom(&self, id: GeomId) -> Result<&Geom> {
        self.geoms
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(CdError::InvalidGeomId(id.0))
    }

    /// Mutable geom behind `id`.
    ///
    /// Pose changes take effect at the next query. Shapes added through
    /// this handle are picked up by the next cycle, or by
    /// [`rebuild`](Self::rebuild).
    pub fn geom_mut(&mut self, id: GeomId) -> Result<&mut Geom> {
        self.geoms
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(CdError::InvalidGeomId(id.0))
    }

    /// Move a geom.
    pub fn set_pose(&mut self, id: GeomId, pose: Pose) -> Result<()> {
        self.geom_mut(id)?.set_pose(pose);
        Ok(())
    }

    /// Rebuild the tree of one geom.
    pub fn rebuild(&mut self, id: GeomId) -> Result<()> {
        let build = self.config.build;
        self.geom_mut(id)?.build(&build);
        Ok(())
    }

    fn rebuild_dirty(&mut self) {
        let build = self.config.build;
        for geom in self.geoms.iter_mut().flatten().filter(|g| g.needs_rebuild()) {
            geom.build(&build);
        }
    }

    fn candidate_pairs(&mut self) -> Vec<(GeomId, GeomId)> {
        self.rebuild_dirty();
        let entries: Vec<GeomEntry> = self
            .geoms()
            .filter_map(|(id, g)| g.aabb().map(|aabb| GeomEntry::new(id, aabb)))
            .collect();
        self.broad_phase.find_potential_pairs(&entries)
    }

    /// Run `visit` over `pairs`, on the pool when there is one, until it
    /// breaks.
    fn for_each_pair<F>(&self, pairs: &[(GeomId, GeomId)], visit: F)
    where
        F: Fn(GeomId, GeomId) -> ControlFlow<()> + Sync,
    {
        match &self.pool {
            Some(pool) => {
                let stop = AtomicBool::new(false);
                pool.install(|| {
                    pairs.par_iter().for_each(|&(a, b)| {
                        if !stop.load(Ordering::Relaxed) && visit(a, b).is_break() {
                            stop.store(true, Ordering::Relaxed);
                        }
                    });
                });
            }
            None => {
                for &(a, b) in pairs {
                    if visit(a, b).is_break() {
                        break;
                    }
                }
            }
        }
    }

    // =========================================================================
    // Collision queries
    // =========================================================================

    /// True if the two geoms collide, using their last built trees.
    pub fn collide_pair(&self, a: GeomId, b: GeomId) -> Result<bool> {
        Ok(self.geom(a)?.collide(self.geom(b)?, &self.narrow))
    }

    /// Find colliding geom pairs and call `callback` once for each.
    ///
    /// Returns true if any pair collides. Returning `Break` from the
    /// callback ends the enumeration; the callback is not invoked again.
    pub fn collide<F>(&mut self, callback: F) -> bool
    where
        F: FnMut(&Self, GeomId, GeomId) -> ControlFlow<()> + Send,
    {
        let pairs = self.candidate_pairs();
        let this = &*self;
        let callback = Mutex::new(callback);
        let hits = AtomicUsize::new(0);
        let stopped = AtomicBool::new(false);

        this.for_each_pair(&pairs, |a, b| {
            let (Ok(ga), Ok(gb)) = (this.geom(a), this.geom(b)) else {
                return ControlFlow::Continue(());
            };
            if !ga.collide(gb, &this.narrow) {
                return ControlFlow::Continue(());
            }
            hits.fetch_add(1, Ordering::Relaxed);
            let mut callback = lock(&callback);
            if stopped.load(Ordering::Relaxed) {
                return ControlFlow::Break(());
            }
            let flow = (*callback)(this, a, b);
            stopped.store(flow.is_break(), Ordering::Relaxed);
            flow
        });

        let hits = hits.into_inner();
        debug!(
            geoms = this.live,
            candidates = pairs.len(),
            hits,
            "collision cycle"
        );
        hits > 0
    }

    /// True if any pair of geoms collides. Stops at the first hit.
    pub fn any_collision(&mut self) -> bool {
        self.collide(|_, _, _| ControlFlow::Break(()))
    }

    // =========================================================================
    // Contacts
    // =========================================================================

    /// Contacts between two geoms, normals pointing from `a` toward `b`.
    ///
    /// Bypasses contact persistence.
    pub fn separate_pair(&self, a: GeomId, b: GeomId) -> Result<ContactSet> {
        Ok(self.geom(a)?.separate(self.geom(b)?, &self.narrow))
    }

    /// Compute contacts of every colliding geom pair, pass them through
    /// contact persistence, and call `callback` once per pair.
    ///
    /// Returns true if any pair produced contacts.
    pub fn separate<F>(&mut self, callback: F) -> bool
    where
        F: FnMut(&Self, GeomId, GeomId, &ContactSet) -> ControlFlow<()> + Send,
    {
        let pairs = self.candidate_pairs();
        let this = &*self;
        let callback = Mutex::new(callback);
        let hits = AtomicUsize::new(0);
        let stopped = AtomicBool::new(false);

        this.for_each_pair(&pairs, |a, b| {
            let (Ok(ga), Ok(gb)) = (this.geom(a), this.geom(b)) else {
                return ControlFlow::Continue(());
            };
            let contacts = ga.separate(gb, &this.narrow);
            if contacts.is_empty() {
                return ControlFlow::Continue(());
            }

            let contacts = match &this.persistence {
                Some(cp) => cp.update(
                    PersistentGeom {
                        id: a,
                        pose: ga.pose(),
                        capacity: ga.contact_persistence(),
                    },
                    PersistentGeom {
                        id: b,
                        pose: gb.pose(),
                        capacity: gb.contact_persistence(),
                    },
                    &contacts,
                ),
                None => contacts,
            };

            hits.fetch_add(1, Ordering::Relaxed);
            let mut callback = lock(&callback);
            if stopped.load(Ordering::Relaxed) {
                return ControlFlow::Break(());
            }
            let flow = (*callback)(this, a, b, &contacts);
            stopped.store(flow.is_break(), Ordering::Relaxed);
            flow
        });

        let hits = hits.into_inner();
        debug!(
            geoms = this.live,
            candidates = pairs.len(),
            hits,
            "separation cycle"
        );
        hits > 0
    }

    /// Contact persistence maintenance; run once per cycle after
    /// [`separate`](Self::separate).
    pub fn maintain_contacts(&self) -> MaintenanceStats {
        self.persistence
            .as_ref()
            .map(ContactPersistence::maintain)
            .unwrap_or_default()
    }

    /// The contact persistence table, if enabled.
    #[must_use]
    pub const fn contact_persistence(&self) -> Option<&ContactPersistence> {
        self.persistence.as_ref()
    }
}
