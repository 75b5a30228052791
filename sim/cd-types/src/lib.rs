//! Core types for collision detection.
//!
//! This crate provides the data shared by every layer of the collision
//! pipeline:
//!
//! - [`Pose`] - Rotation + translation placing shapes and geoms
//! - [`Contact`] / [`ContactSet`] - Narrow-phase results
//! - [`GeomId`] / [`ContactId`] - Handles and persistent identities
//! - [`CollisionConfig`] - Tree building, broad phase, contacts, persistence
//! - [`CdError`] - Construction and configuration errors
//!
//! These types are **pure data**. Shapes, trees and the engine live in
//! `cd-core`.
//!
//! # Example
//!
//! ```
//! use cd_types::{CollisionConfig, Pose};
//! use nalgebra::Point3;
//!
//! let config = CollisionConfig::default().with_threads(4);
//! assert!(config.validate().is_ok());
//!
//! let pose = Pose::from_euler(Point3::new(0.0, 0.0, 1.0), 0.0, 0.0, 0.0);
//! assert_eq!(pose.translation().z, 1.0);
//! ```

#![doc(html_root_url = "https://docs.rs/cd-types/0.3.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod config;
mod contact;
mod error;
mod pose;

pub use config::{
    BroadPhaseAlgorithm, BuildConfig, BuildStrategy, CollisionConfig, FitMethod, MprConfig,
    PersistenceConfig, MAX_BUILD_THREADS,
};
pub use contact::{Contact, ContactId, ContactSet, GeomId};
pub use error::CdError;
pub use pose::Pose;

// Re-export math types for convenience
pub use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};

/// Result type for collision construction operations.
pub type Result<T> = std::result::Result<T, CdError>;
