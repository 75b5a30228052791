//! Contact persistence across collision cycles.
//!
//! Contacts between a pair of geoms are remembered from one cycle to the
//! next. A stored contact keeps its [`ContactId`] while it stays within
//! `max_dist` of where the geoms carry it; new contacts close to a stored
//! one take over its identity, others get a fresh identity.
//!
//! Pairs move through three states:
//!
//! ```text
//!   unseen ──update──► active ──maintain──► unactive ──maintain × max_age──► removed
//!                        ▲                      │
//!                        └──────update──────────┘
//! ```
//!
//! [`ContactPersistence::maintain`] must run exactly once per cycle.

use std::sync::{Mutex, MutexGuard, PoisonError};

use cd_types::{Contact, ContactId, ContactSet, GeomId, PersistenceConfig, Pose};
use hashbrown::HashMap;
use nalgebra::Point3;
use tracing::debug;

/// A geom taking part in a persistence update.
#[derive(Debug, Clone, Copy)]
pub struct PersistentGeom<'a> {
    /// Geom handle.
    pub id: GeomId,
    /// Current world pose.
    pub pose: &'a Pose,
    /// Contacts the geom wants remembered per pair (0 = no opinion).
    pub capacity: usize,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceStats {
    /// Pairs updated during the cycle, now unactive.
    pub demoted: usize,
    /// Unactive pairs that aged out.
    pub removed: usize,
}

/// A remembered contact with its position in both geom frames.
#[derive(Debug, Clone, Copy)]
struct Tracked {
    contact: Contact,
    local: [Point3<f64>; 2],
}

/// Stored contacts of one geom pair, oriented from the lower id.
#[derive(Debug, Clone)]
struct PairContacts {
    capacity: usize,
    tracked: Vec<Tracked>,
    active: bool,
    idle: u32,
}

#[derive(Debug)]
struct State {
    pairs: HashMap<(GeomId, GeomId), PairContacts>,
    next_id: u64,
}

/// Table of persistent contacts, guarded by its own lock.
#[derive(Debug)]
pub struct ContactPersistence {
    config: PersistenceConfig,
    state: Mutex<State>,
}

impl ContactPersistence {
    /// Create a table with room for `capacity` pairs.
    #[must_use]
    pub fn new(config: PersistenceConfig, capacity: usize) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                pairs: HashMap::with_capacity(capacity),
                next_id: 0,
            }),
        }
    }

    /// The settings in effect.
    #[must_use]
    pub const fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of tracked pairs, active or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pairs.len()
    }

    /// True if no pair is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pairs.is_empty()
    }

    /// Number of pairs updated since the last maintenance.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.lock().pairs.values().filter(|p| p.active).count()
    }

    /// Stored contacts of a pair, oriented from `g1` toward `g2`.
    #[must_use]
    pub fn contacts(&self, g1: GeomId, g2: GeomId) -> Option<ContactSet> {
        let state = self.lock();
        let (key, swap) = pair_key(g1, g2);
        state.pairs.get(&key).map(|p| p.output(swap))
    }

    /// Forget every pair.
    pub fn clear(&self) {
        self.lock().pairs.clear();
    }

    /// Forget every pair involving `geom`; returns how many were dropped.
    pub fn remove_geom(&self, geom: GeomId) -> usize {
        let mut state = self.lock();
        let before = state.pairs.len();
        state.pairs.retain(|&(a, b), _| a != geom && b != geom);
        before - state.pairs.len()
    }

    /// Merge this cycle's `contacts` between two geoms into the table and
    /// return the persistent contacts of the pair.
    ///
    /// When persistence is disabled or neither geom asks for it the input is
    /// returned unchanged.
    #[must_use]
    pub fn update(
        &self,
        g1: PersistentGeom<'_>,
        g2: PersistentGeom<'_>,
        contacts: &ContactSet,
    ) -> ContactSet {
        if !self.config.enabled || (g1.capacity == 0 && g2.capacity == 0) {
            return contacts.clone();
        }

        let capacity = match (g1.capacity, g2.capacity) {
            (0, c) | (c, 0) => c,
            (a, b) => a.min(b),
        };
        let (key, swap) = pair_key(g1.id, g2.id);
        let poses = if swap {
            [g2.pose, g1.pose]
        } else {
            [g1.pose, g2.pose]
        };
        let max_dist = self.config.max_dist;

        let mut guard = self.lock();
        let state = &mut *guard;
        let pair = state.pairs.entry(key).or_insert_with(|| PairContacts {
            capacity,
            tracked: Vec::with_capacity(capacity),
            active: false,
            idle: 0,
        });
        let mut fresh_id = || {
            let id = ContactId(state.next_id);
            state.next_id += 1;
            Some(id)
        };

        // Drop contacts the geoms carried too far from where they were found.
        pair.tracked.retain(|t| {
            (0..2).all(|i| {
                (poses[i].transform_point(&t.local[i]) - t.contact.position).norm() <= max_dist
            })
        });
        let deepest = pair
            .tracked
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.contact.depth.total_cmp(&b.1.contact.depth))
            .map(|(i, _)| i);

        let mut matched = vec![false; pair.tracked.len()];
        for c in contacts {
            let c = if swap { c.flipped() } else { *c };
            let local = [
                poses[0].inverse_transform_point(&c.position),
                poses[1].inverse_transform_point(&c.position),
            ];

            let nearest = pair
                .tracked
                .iter()
                .enumerate()
                .filter(|(i, _)| !matched[*i])
                .map(|(i, t)| (i, (t.contact.position - c.position).norm()))
                .min_by(|a, b| a.1.total_cmp(&b.1));

            match nearest {
                Some((i, dist)) if dist < max_dist => {
                    let id = pair.tracked[i].contact.id;
                    pair.tracked[i] = Tracked {
                        contact: Contact { id, ..c },
                        local,
                    };
                    matched[i] = true;
                }
                _ if pair.tracked.len() < pair.capacity => {
                    let contact = Contact { id: fresh_id(), ..c };
                    pair.tracked.push(Tracked { contact, local });
                    matched.push(true);
                }
                _ => {
                    // Full: replace the closest contact other than the deepest.
                    let victim = pair
                        .tracked
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| Some(*i) != deepest || pair.tracked.len() == 1)
                        .map(|(i, t)| (i, (t.contact.position - c.position).norm()))
                        .min_by(|a, b| a.1.total_cmp(&b.1))
                        .map(|(i, _)| i);
                    if let Some(i) = victim {
                        let contact = Contact { id: fresh_id(), ..c };
                        pair.tracked[i] = Tracked { contact, local };
                        matched[i] = true;
                    }
                }
            }
        }
        pair.active = true;
        pair.idle = 0;
        pair.output(swap)
    }

    /// Demote this cycle's pairs to unactive and remove unactive pairs not
    /// refreshed for more than `max_age` cycles.
    pub fn maintain(&self) -> MaintenanceStats {
        let max_age = self.config.max_age;
        let mut stats = MaintenanceStats::default();

        self.lock().pairs.retain(|_, pair| {
            if pair.active {
                pair.active = false;
                pair.idle = 0;
                stats.demoted += 1;
                true
            } else {
                pair.idle += 1;
                let keep = pair.idle <= max_age;
                if !keep {
                    stats.removed += 1;
                }
                keep
            }
        });

        debug!(
            demoted = stats.demoted,
            removed = stats.removed,
            "contact persistence maintenance"
        );
        stats
    }
}

impl PairContacts {
    fn output(&self, swap: bool) -> ContactSet {
        self.tracked
            .iter()
            .map(|t| if swap { t.contact.flipped() } else { t.contact })
            .collect()
    }
}

/// Table key of an unordered pair and whether `(g1, g2)` is reversed.
fn pair_key(g1: GeomId, g2: GeomId) -> ((GeomId, GeomId), bool) {
    if g1 <= g2 {
        ((g1, g2), false)
    } else {
        ((g2, g1), true)
    }
}
