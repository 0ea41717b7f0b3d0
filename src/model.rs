//! Model: a node in the scene tree.
//!
//! A `Model` owns its blocks and caches its own global pose, but it does
//! not hold pointers to its parent or children beyond [`ModelKey`]
//! handles — the tree itself, and every operation that needs to walk it
//! (pose composition, mapping, collision testing), lives on
//! [`crate::world::World`], which owns the [`slotmap::SlotMap`] all
//! models live in. See `DESIGN.md` for why pose lookup isn't a method
//! on `Model` itself.

use crate::block::Block;
use crate::callback::CallbackRegistry;
use crate::color::Color;
use crate::math::{Geom, Pose, Velocity};
use crate::trail::Trail;

slotmap::new_key_type! {
    /// Stable handle to a [`Model`] inside a [`crate::world::World`].
    pub struct ModelKey;
}

/// Three-valued visibility strength used by the ranger/blob/laser
/// sensor-return attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum VisibilityReturn {
    Invisible,
    Visible,
    Bright,
}

impl Default for VisibilityReturn {
    fn default() -> Self {
        VisibilityReturn::Visible
    }
}

/// Identifies which specialized sensor/controller built on top of this
/// model's data a host application should dispatch to. The core never
/// branches on this itself; it exists so `Update`/`Startup`/`Shutdown`
/// callbacks registered by a host can tell models of different
/// subtypes apart, in place of virtual-method dispatch on the model
/// type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Generic,
    Position,
    Laser,
    Ranger,
    Blob,
    Fiducial,
    Gripper,
}

/// A node in the hierarchical scene tree.
///
/// `mapped` tracks, at the whole-model level, whether every owned
/// block currently has index entries — it is kept in lockstep by
/// [`crate::world::World`]'s unmap/map helpers and is always true or
/// false for every block in `blocks` at once.
pub struct Model<Params> {
    pub(crate) key: ModelKey,
    pub token: String,
    pub kind: ModelKind,

    pub(crate) parent: Option<ModelKey>,
    pub(crate) children: Vec<ModelKey>,

    pub pose: Pose,
    pub(crate) global_pose: Pose,
    pub(crate) gpose_dirty: bool,
    pub velocity: Velocity,
    pub stall: bool,

    pub geom: Geom,
    pub blocks: Vec<Block>,
    pub(crate) mapped: bool,
    pub needs_redraw: bool,

    pub obstacle_return: bool,
    pub ranger_return: VisibilityReturn,
    pub blob_return: VisibilityReturn,
    pub laser_return: VisibilityReturn,
    pub gripper_return: bool,
    pub fiducial_return: i32,
    pub fiducial_key: i32,

    pub color: Color,
    pub map_resolution: f64,

    pub(crate) subscriptions: u32,
    pub(crate) last_update: u64,
    pub interval: u64,

    pub(crate) callbacks: CallbackRegistry<Params>,
    pub(crate) trail: Option<Trail>,
}

/// Default per-model update interval: 10 ms.
pub const DEFAULT_UPDATE_INTERVAL_US: u64 = 10_000;

impl<Params> Model<Params> {
    pub(crate) fn new(key: ModelKey, parent: Option<ModelKey>, kind: ModelKind, token: String) -> Self {
        Model {
            key,
            token,
            kind,
            parent,
            children: Vec::new(),
            pose: Pose::ZERO,
            global_pose: Pose::ZERO,
            gpose_dirty: true,
            velocity: Velocity::ZERO,
            stall: false,
            geom: Geom::default(),
            blocks: Vec::new(),
            mapped: false,
            needs_redraw: false,
            obstacle_return: false,
            ranger_return: VisibilityReturn::default(),
            blob_return: VisibilityReturn::default(),
            laser_return: VisibilityReturn::default(),
            gripper_return: false,
            fiducial_return: 0,
            fiducial_key: 0,
            color: Color::default(),
            map_resolution: 0.02,
            subscriptions: 0,
            last_update: 0,
            interval: DEFAULT_UPDATE_INTERVAL_US,
            callbacks: CallbackRegistry::new(),
            trail: None,
        }
    }

    pub fn key(&self) -> ModelKey {
        self.key
    }

    pub fn parent(&self) -> Option<ModelKey> {
        self.parent
    }

    pub fn children(&self) -> &[ModelKey] {
        &self.children
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriptions > 0
    }

    pub fn subscription_count(&self) -> u32 {
        self.subscriptions
    }

    /// Cached global pose. Valid only when `gpose_dirty` is false;
    /// callers that need a fresh value
    /// should go through [`crate::world::World::global_pose`] instead,
    /// which recomputes and clears the dirty flag as needed.
    pub fn global_pose(&self) -> Pose {
        self.global_pose
    }

    pub fn gpose_dirty(&self) -> bool {
        self.gpose_dirty
    }

    pub fn trail(&self) -> Option<&Trail> {
        self.trail.as_ref()
    }

    pub fn enable_trail(&mut self) {
        if self.trail.is_none() {
            self.trail = Some(Trail::new());
        }
    }
}
