//! Error types for collision detection.

use thiserror::Error;

/// Errors raised while constructing shapes, geoms or an engine.
///
/// Collision queries themselves never fail; they report "no collision"
/// for degenerate input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CdError {
    /// Shape parameters are out of range (negative radius, zero length, `NaN`).
    #[error("invalid {kind} shape: {reason}")]
    InvalidShape {
        /// Kind of shape being constructed.
        kind: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// Triangle mesh or height-field data is malformed.
    #[error("invalid mesh: {reason}")]
    InvalidMesh {
        /// Description of what's wrong.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Geom ID not registered with the engine.
    #[error("invalid geom ID: {0}")]
    InvalidGeomId(usize),
}

impl CdError {
    /// Create an invalid shape error.
    #[must_use]
    pub fn invalid_shape(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            kind,
            reason: reason.into(),
        }
    }

    /// Create an invalid mesh error.
    #[must_use]
    pub fn invalid_mesh(reason: impl Into<String>) -> Self {
        Self::InvalidMesh {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Check if this is a shape construction error.
    #[must_use]
    pub fn is_shape_error(&self) -> bool {
        matches!(self, Self::InvalidShape { .. } | Self::InvalidMesh { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }
}
