//! Hierarchical model tree, block-based body representation, a
//! multi-resolution raster spatial index, and the raytracer and
//! kinematic update loop built on top of it.
//!
//! This crate is the core of a 2D multi-robot simulator: it owns the
//! scene tree ([`model`], [`world`]), the per-body footprint
//! ([`block`]) and its mapping into the index ([`spatial_index`]), and
//! the collision-aware tick loop that advances bodies each step.
//! Sensor-specific logic, world-file parsing and rendering are left to
//! host applications built on top of [`World`]'s public API.

pub mod block;
pub mod callback;
pub mod color;
pub mod error;
pub mod math;
pub mod model;
pub mod spatial_index;
pub mod trail;
pub mod world;

pub use block::Block;
pub use color::Color;
pub use math::{Geom, Pose, Size3, Velocity};
pub use model::{Model, ModelKey, ModelKind, VisibilityReturn};
pub use spatial_index::{RaySample, SpatialIndex, SpatialIndexParams};
pub use world::World;
