//! Typed change-callback registry.
//!
//! Callbacks are keyed by an enumerated attribute tag rather than by
//! the address of the changing field. The shape (single shared
//! `Params` context threaded through every callback, plain fn
//! pointers) avoids per-registration heap-allocated user data.

use slotmap::SlotMap;

use crate::model::ModelKey;

/// The attribute whose change a callback is registered against.
/// Power-draw and GUI-nickname keys are omitted: no corresponding
/// field exists in this crate's data model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Pose,
    Velocity,
    Color,
    Geom,
    Stall,
    Startup,
    Shutdown,
    Update,
    ObstacleReturn,
    RangerReturn,
    BlobReturn,
    LaserReturn,
    GripperReturn,
    FiducialReturn,
    FiducialKey,
    Parent,
    MapResolution,
}

/// A callback invoked with the model whose attribute changed and a
/// shared context of type `Params`. Registration takes the callback and
/// implicitly shares `Params`; deregistration is by the returned key,
/// never by comparing function pointers.
pub type Callback<Params> = fn(&mut Params, ModelKey, ChangeKind);

slotmap::new_key_type! {
    /// Handle returned by [`CallbackRegistry::register`], used only to
    /// deregister later.
    pub struct CallbackKey;
}

pub struct CallbackRegistry<Params> {
    entries: SlotMap<CallbackKey, (ChangeKind, Callback<Params>)>,
}

impl<Params> CallbackRegistry<Params> {
    pub fn new() -> Self {
        CallbackRegistry {
            entries: SlotMap::with_key(),
        }
    }

    pub fn register(&mut self, kind: ChangeKind, callback: Callback<Params>) -> CallbackKey {
        self.entries.insert((kind, callback))
    }

    /// No-op if `key` was already deregistered or never valid.
    pub fn deregister(&mut self, key: CallbackKey) {
        self.entries.remove(key);
    }

    /// Invoke every callback registered for `kind`. Dispatch order is
    /// not guaranteed (slotmap iteration order).
    pub fn fire(&self, kind: ChangeKind, model: ModelKey, params: &mut Params) {
        for (registered_kind, cb) in self.entries.values() {
            if *registered_kind == kind {
                cb(params, model, kind);
            }
        }
    }
}

impl<Params> Default for CallbackRegistry<Params> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        pose_fires: u32,
        stall_fires: u32,
    }

    fn on_pose(p: &mut Counter, _m: ModelKey, _k: ChangeKind) {
        p.pose_fires += 1;
    }

    fn on_stall(p: &mut Counter, _m: ModelKey, _k: ChangeKind) {
        p.stall_fires += 1;
    }

    #[test]
    fn fires_only_matching_kind() {
        let mut registry = CallbackRegistry::new();
        registry.register(ChangeKind::Pose, on_pose);
        registry.register(ChangeKind::Stall, on_stall);

        let mut counter = Counter {
            pose_fires: 0,
            stall_fires: 0,
        };
        let key = slotmap::SlotMap::<ModelKey, ()>::with_key().insert(());
        registry.fire(ChangeKind::Pose, key, &mut counter);
        assert_eq!(counter.pose_fires, 1);
        assert_eq!(counter.stall_fires, 0);
    }

    #[test]
    fn deregister_stops_future_fires() {
        let mut registry = CallbackRegistry::new();
        let key = registry.register(ChangeKind::Pose, on_pose);
        registry.deregister(key);

        let mut counter = Counter {
            pose_fires: 0,
            stall_fires: 0,
        };
        let model_key = slotmap::SlotMap::<ModelKey, ()>::with_key().insert(());
        registry.fire(ChangeKind::Pose, model_key, &mut counter);
        assert_eq!(counter.pose_fires, 0);
    }
}
