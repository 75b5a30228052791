//! Configuration types for collision detection.
//!
//! [`CollisionConfig`] is handed to the engine at construction; it selects
//! how OBB trees are built, which broad phase runs, how many contacts are
//! produced and how contact persistence behaves.

use crate::{CdError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum number of worker threads for parallel tree construction.
pub const MAX_BUILD_THREADS: usize = 255;

/// Main configuration for a collision engine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionConfig {
    /// OBB tree construction settings.
    pub build: BuildConfig,
    /// Broad-phase algorithm.
    pub broad_phase: BroadPhaseAlgorithm,
    /// Initial capacity of the broad-phase pair set.
    pub pair_capacity: usize,
    /// Maximum number of contacts reported for one geom pair.
    pub max_contacts: usize,
    /// Worker threads used for broad phase and pair traversal.
    pub num_threads: usize,
    /// Portal refinement settings for the generic convex test.
    pub mpr: MprConfig,
    /// Contact persistence settings.
    pub persistence: PersistenceConfig,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            build: BuildConfig::default(),
            broad_phase: BroadPhaseAlgorithm::default(),
            pair_capacity: 1023,
            max_contacts: 20,
            num_threads: 1,
            mpr: MprConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl CollisionConfig {
    /// Set the number of worker threads for traversal and tree building.
    #[must_use]
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self.build.threads = num_threads.clamp(1, MAX_BUILD_THREADS);
        self
    }

    /// Set the tree construction settings.
    #[must_use]
    pub fn with_build(mut self, build: BuildConfig) -> Self {
        self.build = build;
        self
    }

    /// Set the maximum number of contacts per pair.
    #[must_use]
    pub fn with_max_contacts(mut self, max_contacts: usize) -> Self {
        self.max_contacts = max_contacts;
        self
    }

    /// Test every geom pair instead of running sweep-and-prune.
    #[must_use]
    pub fn without_sap(mut self) -> Self {
        self.broad_phase = BroadPhaseAlgorithm::BruteForce;
        self
    }

    /// Disable contact persistence entirely.
    #[must_use]
    pub fn without_persistence(mut self) -> Self {
        self.persistence.enabled = false;
        self
    }

    /// Set the portal refinement settings.
    #[must_use]
    pub fn with_mpr(mut self, mpr: MprConfig) -> Self {
        self.mpr = mpr;
        self
    }

    /// Capacity of the persistence table, falling back to the pair capacity.
    #[must_use]
    pub fn persistence_capacity(&self) -> usize {
        if self.persistence.capacity == 0 {
            self.pair_capacity
        } else {
            self.persistence.capacity
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_contacts == 0 {
            return Err(CdError::invalid_config("max_contacts must be at least 1"));
        }
        if self.num_threads == 0 {
            return Err(CdError::invalid_config("num_threads must be at least 1"));
        }

        self.build.validate()?;
        self.mpr.validate()?;
        self.persistence.validate()?;

        Ok(())
    }
}

/// OBB tree construction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BuildStrategy {
    /// Recursively split the item set along the longest box axis.
    #[default]
    TopDown,
    /// Repeatedly merge the two items with the nearest centers.
    BottomUp,
}

/// How the axes of an OBB are chosen when it is fitted to its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FitMethod {
    /// Eigenvectors of the covariance of the content's hull points.
    #[default]
    Covariance,
    /// Eigenvectors of the area-weighted surface covariance.
    CovarianceFast,
    /// Rotate the two minor covariance axes about the major one and keep
    /// the smallest box.
    Calipers {
        /// Number of rotations tried over a half turn.
        rotations: u8,
    },
    /// Eigenvectors of the inertia tensor of the weighted surface.
    PolyhedralMass,
    /// Try `(2n + 1)^3` Euler rotations of the world frame and keep the
    /// smallest box.
    Naive {
        /// Rotation steps per quarter turn.
        rotations: u8,
    },
}

impl FitMethod {
    /// Rotating calipers with the default five rotations.
    #[must_use]
    pub const fn calipers() -> Self {
        Self::Calipers { rotations: 5 }
    }

    /// Naive search with the default three steps.
    #[must_use]
    pub const fn naive() -> Self {
        Self::Naive { rotations: 3 }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Covariance => "covariance",
            Self::CovarianceFast => "covariance-fast",
            Self::Calipers { .. } => "calipers",
            Self::PolyhedralMass => "polyhedral-mass",
            Self::Naive { .. } => "naive",
        }
    }
}

/// OBB tree construction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BuildConfig {
    /// Top-down or bottom-up construction.
    pub strategy: BuildStrategy,
    /// OBB fitting heuristic.
    pub fit: FitMethod,
    /// Worker threads building disjoint subtrees (1 = sequential).
    pub threads: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            strategy: BuildStrategy::TopDown,
            fit: FitMethod::Covariance,
            threads: 1,
        }
    }
}

impl BuildConfig {
    /// Tighter boxes at higher build cost.
    #[must_use]
    pub fn precise() -> Self {
        Self {
            fit: FitMethod::Calipers { rotations: 20 },
            ..Default::default()
        }
    }

    /// Cheapest fitting.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            fit: FitMethod::CovarianceFast,
            ..Default::default()
        }
    }

    /// Default fitting built by `threads` workers.
    #[must_use]
    pub fn parallel(threads: usize) -> Self {
        Self {
            threads,
            ..Default::default()
        }
    }

    /// Set the construction strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: BuildStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the fitting heuristic.
    #[must_use]
    pub fn fit(mut self, fit: FitMethod) -> Self {
        self.fit = fit;
        self
    }

    /// Validate the build settings.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(CdError::invalid_config("build threads must be at least 1"));
        }
        if self.threads > MAX_BUILD_THREADS {
            return Err(CdError::invalid_config(format!(
                "build threads must be at most {MAX_BUILD_THREADS}, got {}",
                self.threads
            )));
        }

        match self.fit {
            FitMethod::Calipers { rotations: 0 } | FitMethod::Naive { rotations: 0 } => Err(
                CdError::invalid_config("fitting rotations must be at least 1"),
            ),
            _ => Ok(()),
        }
    }
}

/// Broad-phase algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BroadPhaseAlgorithm {
    /// Sweep-and-prune over cached, incrementally sorted intervals.
    #[default]
    SweepAndPrune,
    /// Test every pair of geoms.
    BruteForce,
}

/// Settings of the minkowski portal refinement test.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MprConfig {
    /// Iteration cap; reaching it reports no collision.
    pub max_iterations: usize,
    /// Boundary tolerance for portal expansion.
    pub tolerance: f64,
}

impl Default for MprConfig {
    fn default() -> Self {
        Self {
            max_iterations: usize::MAX,
            tolerance: 1e-4,
        }
    }
}

impl MprConfig {
    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(CdError::invalid_config("mpr max_iterations must be at least 1"));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(CdError::invalid_config(format!(
                "mpr tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Contact persistence settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PersistenceConfig {
    /// Whether persistence runs at all. Geoms still have to opt in.
    pub enabled: bool,
    /// Initial table capacity (0 = use the engine's pair capacity).
    pub capacity: usize,
    /// Distance a contact may drift and keep its identity.
    pub max_dist: f64,
    /// Maintenance cycles an unrefreshed pair survives.
    pub max_age: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 0,
            max_dist: 0.01,
            max_age: 0,
        }
    }
}

impl PersistenceConfig {
    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        if !self.max_dist.is_finite() || self.max_dist < 0.0 {
            return Err(CdError::invalid_config(format!(
                "persistence max_dist must be finite and non-negative, got {}",
                self.max_dist
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CollisionConfig::default();
        assert_eq!(config.build.strategy, BuildStrategy::TopDown);
        assert_eq!(config.build.fit, FitMethod::Covariance);
        assert_eq!(config.broad_phase, BroadPhaseAlgorithm::SweepAndPrune);
        assert_eq!(config.pair_capacity, 1023);
        assert_eq!(config.max_contacts, 20);
        assert_eq!(config.num_threads, 1);
        assert_eq!(config.mpr.max_iterations, usize::MAX);
        assert_eq!(config.mpr.tolerance, 1e-4);
        assert!(config.persistence.enabled);
        assert_eq!(config.persistence_capacity(), 1023);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = CollisionConfig::default()
            .with_threads(4)
            .without_sap()
            .without_persistence()
            .with_max_contacts(4);

        assert_eq!(config.num_threads, 4);
        assert_eq!(config.build.threads, 4);
        assert_eq!(config.broad_phase, BroadPhaseAlgorithm::BruteForce);
        assert!(!config.persistence.enabled);
        assert_eq!(config.max_contacts, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert_eq!(
            BuildConfig::precise().fit,
            FitMethod::Calipers { rotations: 20 }
        );
        assert_eq!(BuildConfig::fast().fit, FitMethod::CovarianceFast);
        assert_eq!(BuildConfig::parallel(3).threads, 3);
        assert_eq!(FitMethod::calipers(), FitMethod::Calipers { rotations: 5 });
        assert_eq!(FitMethod::naive().name(), "naive");
    }

    #[test]
    fn test_validation_failures() {
        let bad = CollisionConfig::default().with_max_contacts(0);
        assert!(bad.validate().unwrap_err().is_config_error());

        let mut bad = CollisionConfig::default();
        bad.num_threads = 0;
        assert!(bad.validate().is_err());

        let bad = CollisionConfig::default().with_build(BuildConfig::parallel(0));
        assert!(bad.validate().is_err());

        let bad = CollisionConfig::default().with_build(BuildConfig::parallel(300));
        assert!(bad.validate().is_err());

        let bad = CollisionConfig::default()
            .with_build(BuildConfig::default().fit(FitMethod::Naive { rotations: 0 }));
        assert!(bad.validate().is_err());

        let bad = CollisionConfig::default().with_mpr(MprConfig {
            max_iterations: 10,
            tolerance: f64::NAN,
        });
        assert!(bad.validate().is_err());

        let mut bad = CollisionConfig::default();
        bad.persistence.max_dist = -1.0;
        assert!(bad.validate().is_err());
    }
}
