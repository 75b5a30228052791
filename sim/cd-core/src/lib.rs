//! Collision detection engine.
//!
//! This crate provides shapes, oriented bounding box trees, pairwise
//! narrow-phase tests, broad-phase pruning, contact persistence and the
//! engine tying them together. It builds on [`cd_types`] for poses,
//! contacts and configuration.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CollisionEngine                          │
//! │  Owns: geoms, broad phase, contact persistence, worker pool  │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │ candidate geom pairs
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Broad phase (SAP / brute force)              │
//! │  World AABBs of geoms → overlapping pairs                    │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │ lock-step OBB tree traversal
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Narrow phase                           │
//! │  Closed-form pairs, SAT, minkowski portal refinement        │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │ contacts
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Contact persistence                        │
//! │  Stable contact identities across cycles                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`SphereGrid`] is a separate uniform grid for scenes made of spheres.
//!
//! # Quick Start
//!
//! ```
//! use cd_core::{CollisionEngine, Geom};
//! use cd_types::CollisionConfig;
//! use nalgebra::Point3;
//!
//! let mut engine = CollisionEngine::new(CollisionConfig::default())?;
//!
//! let mut ground = Geom::new();
//! ground.add_plane();
//! engine.add_geom(ground);
//!
//! let mut crate_ = Geom::new();
//! crate_.add_cuboid(1.0, 1.0, 1.0)?;
//! crate_.set_position(Point3::new(0.0, 0.0, 0.45));
//! engine.add_geom(crate_);
//!
//! assert!(engine.any_collision());
//! # Ok::<(), cd_types::CdError>(())
//! ```

#![doc(html_root_url = "https://docs.rs/cd-core/0.3.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Errors are construction failures, documented on CdError
    clippy::module_name_repetitions,   // ObbTree in obb_tree, SphereGrid in sphere_grid
)]

pub mod broad_phase;
mod engine;
pub mod fit;
mod geom;
pub mod narrow_phase;
pub mod obb;
pub mod obb_tree;
pub mod persistence;
pub mod shape;
pub mod sphere_grid;

pub use broad_phase::{
    Aabb, Axis, BroadPhase, BroadPhaseDetector, BruteForce, GeomEntry, SweepAndPrune,
};
pub use engine::CollisionEngine;
pub use fit::SurfaceMoments;
pub use geom::Geom;
pub use narrow_phase::{CollideFn, NarrowPhase, Placed, SeparateFn};
pub use obb::Obb;
pub use obb_tree::{ObbNode, ObbNodeKind, ObbTree, ObbTreeStats};
pub use persistence::{ContactPersistence, MaintenanceStats, PersistentGeom};
pub use shape::{HeightFieldData, Shape, ShapeKind, TriMeshData, PLANE_EXTENT};
pub use sphere_grid::SphereGrid;

// Re-export key types from cd-types for convenience
pub use cd_types::{
    BroadPhaseAlgorithm, BuildConfig, BuildStrategy, CdError, CollisionConfig, Contact,
    ContactId, ContactSet, FitMethod, GeomId, MprConfig, PersistenceConfig, Pose, Result,
};
