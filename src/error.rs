//! Error types for construction-time failures.
//!
//! Everywhere else in the crate, lookups that miss return sentinels
//! (`None`, `ModelKey::null()`), invariant violations panic, and "no
//! collision"/"no hit" are ordinary `Option` results, not errors. This
//! type covers the one place a caller hands in parameters that can be
//! checked and rejected up front.

use thiserror::Error;

/// Failure constructing a [`crate::spatial_index::SpatialIndex`].
#[derive(Debug, Error, PartialEq)]
pub enum SpatialIndexError {
    #[error("world extent must be positive, got {0}x{1}")]
    NonPositiveExtent(f64, f64),

    #[error("pixels-per-meter must be positive, got {0}")]
    NonPositivePpm(f64),

    #[error("world extent {extent} at {ppm} pixels/meter exceeds the maximum supported raster size of {max} pixels per side")]
    ExtentTooLarge { extent: f64, ppm: f64, max: u32 },
}
