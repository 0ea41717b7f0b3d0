//! World: owns every model, drives the tick loop, and hosts the
//! spatial index.
//!
//! Most tree-walking model operations live here rather than on `Model`
//! itself: a `Model` is plain data owned by a `slotmap::SlotMap`, and
//! anything that needs to walk the tree (pose composition, map/unmap of
//! a subtree, collision testing against other models) necessarily needs
//! access to that whole arena, not just to `self`. This is recorded as
//! a resolved design choice in `DESIGN.md`.
//!
//! `World<Params>` is generic over the same `Params` context threaded
//! through every [`crate::callback::Callback`]: callbacks close over a
//! single shared, caller-chosen state type instead of each carrying its
//! own heap-allocated user data.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::block::{to_world, Block};
use crate::callback::ChangeKind;
use crate::color::Color;
use crate::error::SpatialIndexError;
use crate::math::{pose_sum, Geom, Pose, Velocity};
use crate::model::{Model, ModelKey, ModelKind, VisibilityReturn};
use crate::spatial_index::{RaySample, SpatialIndex, SpatialIndexParams};
use crate::trail::TRAIL_SAMPLE_PERIOD;

/// Owns every [`Model`] in a scene, the spatial index they rasterize
/// into, and the simulation clock that drives the tick loop.
pub struct World<Params> {
    models: slotmap::SlotMap<ModelKey, Model<Params>>,
    by_token: HashMap<String, ModelKey>,
    root_children: Vec<ModelKey>,

    /// Models with a nonzero velocity.
    velocity_list: Vec<ModelKey>,
    /// Models with `subscriptions >= 1`.
    update_list: Vec<ModelKey>,

    index: SpatialIndex,

    /// Monotonic simulation clock, in microseconds.
    pub sim_time: u64,
    /// Tick duration, in microseconds.
    pub interval_sim: u64,
}

impl<Params> World<Params> {
    pub fn new(index_params: SpatialIndexParams, interval_sim_us: u64) -> Result<Self, SpatialIndexError> {
        Ok(World {
            models: slotmap::SlotMap::with_key(),
            by_token: HashMap::new(),
            root_children: Vec::new(),
            velocity_list: Vec::new(),
            update_list: Vec::new(),
            index: SpatialIndex::new(index_params)?,
            sim_time: 0,
            interval_sim: interval_sim_us,
        })
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn model(&self, key: ModelKey) -> Option<&Model<Params>> {
        self.models.get(key)
    }

    pub fn model_mut(&mut self, key: ModelKey) -> Option<&mut Model<Params>> {
        self.models.get_mut(key)
    }

    /// Lookup by stable token string. A miss is a normal sentinel
    /// result, not an error.
    pub fn get_model(&self, token: &str) -> Option<ModelKey> {
        self.by_token.get(token).copied()
    }

    pub fn root_children(&self) -> &[ModelKey] {
        &self.root_children
    }

    // -- tree construction / teardown ----------------------------------

    /// Construct a model under `parent` (or at the world root when
    /// `None`) and register it in the world's by-id/by-token maps and
    /// its parent's child list, all at construction time. `type_name`
    /// feeds the stable token scheme
    /// `"{parent_token}.{type_name}:{sibling_index}"` (root models drop
    /// the parent-token prefix) recorded as a resolved Open Question in
    /// `DESIGN.md`.
    pub fn add_model(&mut self, parent: Option<ModelKey>, kind: ModelKind, type_name: &str) -> ModelKey {
        let sibling_index = match parent {
            Some(p) => self.models.get(p).map(|m| m.children().len()).unwrap_or(0),
            None => self.root_children.len(),
        };
        let token = match parent.and_then(|p| self.models.get(p)) {
            Some(p) => format!("{}.{}:{}", p.token, type_name, sibling_index),
            None => format!("{}:{}", type_name, sibling_index),
        };

        let key = self
            .models
            .insert_with_key(|key| Model::new(key, parent, kind, token.clone()));
        self.by_token.insert(token, key);
        match parent {
            Some(p) => {
                if let Some(pm) = self.models.get_mut(p) {
                    pm.children.push(key);
                }
            }
            None => self.root_children.push(key),
        }
        debug!(token = %self.models[key].token, "model added");
        key
    }

    /// Destroy `key` and every descendant: unmaps their blocks, fires
    /// `Shutdown` for any that were still subscribed, and removes them
    /// from every world index. Destruction cascades to descendants — an
    /// orphaned child with a dangling parent pointer would violate the
    /// tree invariant — recorded as a resolved design choice in
    /// `DESIGN.md`.
    pub fn remove_model(&mut self, key: ModelKey, params: &mut Params) {
        let children = match self.models.get(key) {
            Some(m) => m.children().to_vec(),
            None => return,
        };
        for child in children {
            self.remove_model(child, params);
        }

        self.unmap_self(key);
        if self.models.get(key).map(|m| m.is_subscribed()).unwrap_or(false) {
            self.fire(key, ChangeKind::Shutdown, params);
        }
        self.velocity_list.retain(|&k| k != key);
        self.update_list.retain(|&k| k != key);

        if let Some(model) = self.models.remove(key) {
            self.by_token.remove(&model.token);
            match model.parent {
                Some(p) => {
                    if let Some(pm) = self.models.get_mut(p) {
                        pm.children.retain(|&c| c != key);
                    }
                }
                None => self.root_children.retain(|&c| c != key),
            }
        }
    }

    // -- tree relationships --------------------------------------------

    /// True iff `maybe_ancestor` is `key` itself or any ancestor of it.
    pub fn is_antecedent(&self, key: ModelKey, maybe_ancestor: ModelKey) -> bool {
        let mut cur = Some(key);
        while let Some(k) = cur {
            if k == maybe_ancestor {
                return true;
            }
            cur = self.models.get(k).and_then(|m| m.parent);
        }
        false
    }

    pub fn is_descendent(&self, key: ModelKey, maybe_descendant: ModelKey) -> bool {
        self.is_antecedent(maybe_descendant, key)
    }

    pub fn is_related(&self, a: ModelKey, b: ModelKey) -> bool {
        self.root_of(a) == self.root_of(b)
    }

    fn root_of(&self, key: ModelKey) -> ModelKey {
        let mut cur = key;
        while let Some(p) = self.models.get(cur).and_then(|m| m.parent) {
            cur = p;
        }
        cur
    }

    // -- pose ------------------------------------------------------------

    /// Recompute and cache `key`'s global pose if dirty, walking only
    /// as far up the ancestor chain as necessary. Children sit on top
    /// of their parent: each step adds the parent's `geom.size.z`.
    pub fn global_pose(&mut self, key: ModelKey) -> Pose {
        if !self.models[key].gpose_dirty {
            return self.models[key].global_pose;
        }

        let mut chain = vec![key];
        let mut cur = key;
        loop {
            match self.models[cur].parent {
                Some(parent) => {
                    chain.push(parent);
                    if !self.models[parent].gpose_dirty {
                        break;
                    }
                    cur = parent;
                }
                None => break,
            }
        }

        for &k in chain.iter().rev() {
            if !self.models[k].gpose_dirty {
                continue;
            }
            let (parent_global, parent_size_z) = match self.models[k].parent {
                Some(p) => (self.models[p].global_pose, self.models[p].geom.size.z),
                None => (Pose::ZERO, 0.0),
            };
            let local = self.models[k].pose;
            let mut global = pose_sum(parent_global, local);
            global.z += parent_size_z;
            let model = &mut self.models[k];
            model.global_pose = global;
            model.gpose_dirty = false;
        }

        self.models[key].global_pose
    }

    /// `global_pose ⊕ geom.pose ⊕ p`.
    pub fn local_to_global(&mut self, key: ModelKey, p: Pose) -> Pose {
        let global = self.global_pose(key);
        let geom_offset = self.models[key].geom.pose;
        pose_sum(pose_sum(global, geom_offset), p)
    }

    /// Unmap this model and all descendants, normalize and set the new
    /// local pose, mark the subtree gpose-dirty, remap, and fire the
    /// `Pose` callback. The unmap/set/remap sequence only runs when the
    /// pose actually changes; the callback fires unconditionally.
    pub fn set_pose(&mut self, key: ModelKey, new_pose: Pose, params: &mut Params) {
        let normalized = Pose::new(new_pose.x, new_pose.y, new_pose.z, new_pose.a);
        let changed = self.models.get(key).map(|m| m.pose != normalized).unwrap_or(false);
        if changed {
            self.unmap_subtree(key);
            if let Some(model) = self.models.get_mut(key) {
                model.pose = normalized;
            }
            self.mark_subtree_dirty(key);
            self.map_subtree(key);
        }
        self.fire(key, ChangeKind::Pose, params);
    }

    /// If `key` has no parent, identical to [`World::set_pose`].
    /// Otherwise converts `p` into the parent's frame first. `global_pose`
    /// adds the parent's `geom.size.z` on top of `pose_sum`'s composition
    /// (children sit atop their parent's stack height), so that
    /// contribution is subtracted back out here before inverting the
    /// rest of the composition, or the round trip would leave `z` off by
    /// the parent's `size.z`.
    pub fn set_global_pose(&mut self, key: ModelKey, p: Pose, params: &mut Params) {
        let parent = self.models.get(key).and_then(|m| m.parent);
        match parent {
            None => self.set_pose(key, p, params),
            Some(parent) => {
                let parent_global = self.global_pose(parent);
                let parent_size_z = self.models.get(parent).map(|m| m.geom.size.z).unwrap_or(0.0);
                let mut target = p;
                target.z -= parent_size_z;
                let local = crate::math::global_to_local(parent_global, target);
                self.set_pose(key, local, params);
            }
        }
    }

    pub fn set_velocity(&mut self, key: ModelKey, v: Velocity, params: &mut Params) {
        let was_nonzero = self
            .models
            .get(key)
            .map(|m| m.velocity.is_nonzero())
            .unwrap_or(false);
        if let Some(model) = self.models.get_mut(key) {
            model.velocity = v;
        }
        let now_nonzero = v.is_nonzero();
        match (was_nonzero, now_nonzero) {
            (false, true) => self.velocity_list.push(key),
            (true, false) => self.velocity_list.retain(|&k| k != key),
            _ => {}
        }
        self.fire(key, ChangeKind::Velocity, params);
    }

    pub fn set_geom(&mut self, key: ModelKey, geom: Geom, params: &mut Params) {
        self.unmap_subtree(key);
        if let Some(model) = self.models.get_mut(key) {
            model.geom = geom;
            Block::scale_list(&mut model.blocks, geom.size);
        }
        // Z-stacking on children depends on this model's size.
        self.mark_subtree_dirty(key);
        self.map_subtree(key);
        self.fire(key, ChangeKind::Geom, params);
    }

    pub fn add_block(&mut self, key: ModelKey, block: Block) {
        let was_mapped = self.models.get(key).map(|m| m.mapped).unwrap_or(false);
        if let Some(model) = self.models.get_mut(key) {
            model.blocks.push(block);
            model.needs_redraw = true;
        }
        if was_mapped {
            let idx = match self.models.get(key) {
                Some(m) => m.blocks.len() - 1,
                None => return,
            };
            let global = self.global_pose(key);
            let geom_offset = self.models[key].geom.pose;
            let World { models, index, .. } = self;
            if let Some(model) = models.get_mut(key) {
                model.blocks[idx].map(key, idx, global, geom_offset, index);
            }
        }
    }

    pub fn clear_blocks(&mut self, key: ModelKey) {
        let World { models, index, .. } = self;
        if let Some(model) = models.get_mut(key) {
            for block in model.blocks.iter_mut() {
                if block.is_mapped() {
                    block.unmap(index);
                }
            }
            model.blocks.clear();
            model.mapped = false;
            model.needs_redraw = true;
        }
    }

    // -- mapping helpers --------------------------------------------------

    fn unmap_self(&mut self, key: ModelKey) {
        let World { models, index, .. } = self;
        if let Some(model) = models.get_mut(key) {
            if model.mapped {
                for block in model.blocks.iter_mut() {
                    if block.is_mapped() {
                        block.unmap(index);
                    }
                }
                model.mapped = false;
            }
        }
    }

    fn map_self(&mut self, key: ModelKey) {
        let global = self.global_pose(key);
        let geom_offset = match self.models.get(key) {
            Some(m) => m.geom.pose,
            None => return,
        };
        let World { models, index, .. } = self;
        if let Some(model) = models.get_mut(key) {
            if !model.mapped {
                for (i, block) in model.blocks.iter_mut().enumerate() {
                    if !block.is_mapped() {
                        block.map(key, i, global, geom_offset, index);
                    }
                }
                model.mapped = true;
            }
        }
    }

    fn unmap_subtree(&mut self, key: ModelKey) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            let children = match self.models.get(k) {
                Some(m) => m.children().to_vec(),
                None => continue,
            };
            stack.extend(children);
            self.unmap_self(k);
        }
    }

    fn map_subtree(&mut self, key: ModelKey) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            let children = match self.models.get(k) {
                Some(m) => m.children().to_vec(),
                None => continue,
            };
            stack.extend(children);
            self.map_self(k);
        }
    }

    fn mark_subtree_dirty(&mut self, key: ModelKey) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if let Some(model) = self.models.get_mut(k) {
                model.gpose_dirty = true;
                stack.extend(model.children().to_vec());
            }
        }
    }

    // -- callbacks ---------------------------------------------------------

    pub fn register_callback(
        &mut self,
        key: ModelKey,
        kind: ChangeKind,
        callback: crate::callback::Callback<Params>,
    ) -> Option<crate::callback::CallbackKey> {
        self.models.get_mut(key).map(|m| m.callbacks.register(kind, callback))
    }

    pub fn deregister_callback(&mut self, key: ModelKey, callback_key: crate::callback::CallbackKey) {
        if let Some(model) = self.models.get_mut(key) {
            model.callbacks.deregister(callback_key);
        }
    }

    fn fire(&self, key: ModelKey, kind: ChangeKind, params: &mut Params) {
        if let Some(model) = self.models.get(key) {
            model.callbacks.fire(kind, key, params);
        }
    }

    // -- lifecycle -----------------------------------------------------------

    /// Reference-counted subscription: the first 0→1 transition fires
    /// `Startup` and places the model on the update list; later calls
    /// only bump the count.
    pub fn subscribe(&mut self, key: ModelKey, params: &mut Params) {
        let count = match self.models.get_mut(key) {
            Some(model) => {
                model.subscriptions += 1;
                model.subscriptions
            }
            None => return,
        };
        if count == 1 {
            if let Some(model) = self.models.get_mut(key) {
                model.last_update = self.sim_time;
            }
            self.update_list.push(key);
            self.fire(key, ChangeKind::Startup, params);
        }
    }

    /// The mirror of [`World::subscribe`]: the 1→0 transition fires
    /// `Shutdown` and removes the model from the update list.
    pub fn unsubscribe(&mut self, key: ModelKey, params: &mut Params) {
        let count = match self.models.get_mut(key) {
            Some(model) if model.subscriptions > 0 => {
                model.subscriptions -= 1;
                Some(model.subscriptions)
            }
            _ => None,
        };
        if count == Some(0) {
            self.update_list.retain(|&k| k != key);
            self.fire(key, ChangeKind::Shutdown, params);
        }
    }

    fn update_if_due(&mut self, key: ModelKey, params: &mut Params) {
        let due = match self.models.get(key) {
            Some(model) => self.sim_time >= model.last_update + model.interval,
            None => return,
        };
        if due {
            self.fire(key, ChangeKind::Update, params);
            if let Some(model) = self.models.get_mut(key) {
                model.last_update = self.sim_time;
            }
        }
    }

    // -- tick loop -----------------------------------------------------------

    /// Advance `sim_time` by one `interval_sim`, move every
    /// velocity-listed model (testing collisions along the way) and
    /// update every subscribed model that is due.
    pub fn tick(&mut self, params: &mut Params) {
        let _span = tracing::trace_span!("world_tick", sim_time = self.sim_time).entered();
        #[cfg(feature = "tracy")]
        let _tracy_span = tracy_client::Span::new("world_tick", "tick", file!(), line!(), 0);

        self.sim_time += self.interval_sim;

        let movers: Vec<ModelKey> = self.velocity_list.clone();
        for key in movers {
            self.update_pose(key, params);
        }

        let updaters: Vec<ModelKey> = self.update_list.clone();
        for key in updaters {
            self.update_if_due(key, params);
        }

        trace!(sim_time = self.sim_time, "tick complete");
    }

    fn maybe_trail_checkpoint(&mut self, key: ModelKey) {
        let tick_count = self.sim_time / self.interval_sim.max(1);
        if tick_count % TRAIL_SAMPLE_PERIOD != 0 {
            return;
        }
        if let Some(model) = self.models.get_mut(key) {
            if model.trail.is_some() {
                let pose = model.pose;
                let color = model.color;
                let sim_time = self.sim_time;
                model.trail.as_mut().unwrap().push(pose, color, sim_time);
            }
        }
    }

    /// Per-tick update for a single velocity-listed model: unmap, test
    /// collision at the prospective new pose, stall or commit, then
    /// remap unconditionally.
    fn update_pose(&mut self, key: ModelKey, params: &mut Params) {
        self.maybe_trail_checkpoint(key);

        let velocity = match self.models.get(key) {
            Some(m) => m.velocity,
            None => return,
        };
        let dt = self.interval_sim as f64 * 1e-6;
        let delta = velocity.scaled(dt);

        self.unmap_subtree(key);

        let hit = self.test_collision(key, delta);
        let stalled = hit.is_some();
        self.set_stall(key, stalled, params);

        if !stalled {
            if let Some(model) = self.models.get_mut(key) {
                model.pose = pose_sum(model.pose, delta);
            }
            self.mark_subtree_dirty(key);
            self.fire(key, ChangeKind::Pose, params);
        }

        self.map_subtree(key);
    }

    /// Sweep every vertex of every block `key` owns from its current
    /// world position along the direction of travel, for the distance
    /// `delta` would cover, against every other obstacle-returning
    /// model. `key`'s own blocks must already be unmapped so it cannot
    /// self-hit. A ray per edge evaluated only at the destination pose
    /// would miss an obstacle that lies strictly between the current
    /// and destination pose; sweeping each vertex forward catches it.
    /// The first block hit, if any, is returned; `None` means the move
    /// is clear (including a pure-rotation delta, which has no
    /// translation to sweep).
    fn test_collision(&mut self, key: ModelKey, delta: Pose) -> Option<ModelKey> {
        let parent = self.models.get(key).and_then(|m| m.parent);
        let parent_global = match parent {
            Some(p) => self.global_pose(p),
            None => Pose::ZERO,
        };
        let parent_size_z = match parent {
            Some(p) => self.models.get(p).map(|m| m.geom.size.z).unwrap_or(0.0),
            None => 0.0,
        };

        let (local_pose, geom_offset, blocks) = match self.models.get(key) {
            Some(m) => (m.pose, m.geom.pose, m.blocks.clone()),
            None => return None,
        };

        let mut current_global = pose_sum(parent_global, local_pose);
        current_global.z += parent_size_z;
        let prospective_local = pose_sum(local_pose, delta);
        let mut prospective_global = pose_sum(parent_global, prospective_local);
        prospective_global.z += parent_size_z;

        let travel = prospective_global.point() - current_global.point();
        let travel_len = travel.mag();
        if travel_len < 1e-12 {
            return None;
        }
        let bearing = travel.y.atan2(travel.x);

        let World { models, index, .. } = self;

        for block in &blocks {
            for local_pt in block.points.iter().copied() {
                let a_world = to_world(current_global, geom_offset, local_pt);
                let sample = index.raytrace(
                    a_world,
                    current_global.z,
                    bearing,
                    travel_len,
                    Some(key),
                    false,
                    &|m: ModelKey| models.get(m).map(|mm| mm.obstacle_return).unwrap_or(false),
                );
                if let Some(hit_model) = sample.model {
                    return Some(hit_model);
                }
            }
        }
        None
    }

    // -- raytracing API consumed by sensors ------------------------------

    /// Raytrace from `origin_in_model_frame` (expressed in `requester`'s
    /// own frame) out to `range`, excluding `requester` itself.
    pub fn raytrace_pose(
        &mut self,
        requester: ModelKey,
        origin_in_model_frame: Pose,
        range: f64,
        ztest: bool,
        accept: &dyn Fn(ModelKey) -> bool,
    ) -> RaySample {
        let origin = self.local_to_global(requester, origin_in_model_frame);
        self.index
            .raytrace(origin.point(), origin.z, origin.a, range, Some(requester), ztest, accept)
    }

    /// Raytrace from `requester`'s own global pose along `bearing`.
    pub fn raytrace_bearing(
        &mut self,
        requester: ModelKey,
        bearing: f64,
        range: f64,
        ztest: bool,
        accept: &dyn Fn(ModelKey) -> bool,
    ) -> RaySample {
        let origin = self.global_pose(requester);
        self.index
            .raytrace(origin.point(), origin.z, bearing, range, Some(requester), ztest, accept)
    }

    /// Dispatch a fan of `n_samples` rays spanning `fov` centered on
    /// `bearing`, from `requester`'s own global pose.
    #[allow(clippy::too_many_arguments)]
    pub fn raytrace_fan(
        &mut self,
        requester: ModelKey,
        bearing: f64,
        range: f64,
        fov: f64,
        n_samples: usize,
        ztest: bool,
        accept: &dyn Fn(ModelKey) -> bool,
    ) -> Vec<RaySample> {
        let origin = self.global_pose(requester);
        self.index.raytrace_fan(
            origin.point(),
            origin.z,
            bearing,
            range,
            fov,
            n_samples,
            Some(requester),
            ztest,
            accept,
        )
    }
}

macro_rules! simple_setter {
    ($name:ident, $field:ident, $kind:expr, $ty:ty) => {
        impl<Params> World<Params> {
            pub fn $name(&mut self, key: ModelKey, value: $ty, params: &mut Params) {
                if let Some(model) = self.models.get_mut(key) {
                    model.$field = value;
                }
                self.fire(key, $kind, params);
            }
        }
    };
}

simple_setter!(set_stall, stall, ChangeKind::Stall, bool);
simple_setter!(set_color, color, ChangeKind::Color, Color);
simple_setter!(set_map_resolution, map_resolution, ChangeKind::MapResolution, f64);
simple_setter!(set_obstacle_return, obstacle_return, ChangeKind::ObstacleReturn, bool);
simple_setter!(set_ranger_return, ranger_return, ChangeKind::RangerReturn, VisibilityReturn);
simple_setter!(set_blob_return, blob_return, ChangeKind::BlobReturn, VisibilityReturn);
simple_setter!(set_laser_return, laser_return, ChangeKind::LaserReturn, VisibilityReturn);
simple_setter!(set_gripper_return, gripper_return, ChangeKind::GripperReturn, bool);
simple_setter!(set_fiducial_return, fiducial_return, ChangeKind::FiducialReturn, i32);
simple_setter!(set_fiducial_key, fiducial_key, ChangeKind::FiducialKey, i32);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::color::Color;
    use crate::math::Size3;
    use std::f64::consts::PI;

    struct NoParams;

    fn index_params() -> SpatialIndexParams {
        SpatialIndexParams {
            width_m: 1000.0,
            height_m: 1000.0,
            ppm: 20.0,
        }
    }

    fn world() -> World<NoParams> {
        World::new(index_params(), 1_000_000).unwrap()
    }

    fn obstacle(world: &mut World<NoParams>, parent: Option<ModelKey>, pose: Pose, params: &mut NoParams) -> ModelKey {
        let key = world.add_model(parent, ModelKind::Generic, "obstacle");
        world.add_block(key, Block::rect(1.0, 1.0, 0.0, 1.0, Color::default()));
        world.set_obstacle_return(key, true, params);
        world.set_pose(key, pose, params);
        key
    }

    /// Hierarchical pose composition.
    #[test]
    fn s1_hierarchical_pose_composition() {
        let mut w = world();
        let mut params = NoParams;
        let parent = w.add_model(None, ModelKind::Generic, "parent");
        w.set_geom(
            parent,
            Geom {
                size: Size3::new(1.0, 1.0, 0.2),
                pose: Pose::ZERO,
            },
            &mut params,
        );
        w.set_pose(parent, Pose::from_xya(1.0, 0.0, PI / 2.0), &mut params);

        let child = w.add_model(Some(parent), ModelKind::Generic, "child");
        w.set_pose(child, Pose::from_xya(1.0, 0.0, 0.0), &mut params);

        let gp = w.global_pose(child);
        assert!((gp.x - 1.0).abs() < 1e-9);
        assert!((gp.y - 1.0).abs() < 1e-9);
        assert!((gp.z - 0.2).abs() < 1e-9);
        assert!((gp.a - PI / 2.0).abs() < 1e-9);
    }

    /// Stall on collision, then succeed at a slower speed.
    #[test]
    fn s2_stall_on_collision() {
        let mut w = world();
        let mut params = NoParams;
        let a = obstacle(&mut w, None, Pose::ZERO, &mut params);
        let _b = obstacle(&mut w, None, Pose::from_xya(2.0, 0.0, 0.0), &mut params);

        w.interval_sim = 1_000_000;
        w.set_velocity(a, Velocity { x: 10.0, ..Velocity::ZERO }, &mut params);
        w.tick(&mut params);

        assert!(w.model(a).unwrap().stall);
        assert!((w.model(a).unwrap().pose.x - 0.0).abs() < 1e-9);

        w.set_velocity(a, Velocity { x: 0.5, ..Velocity::ZERO }, &mut params);
        w.tick(&mut params);

        assert!(!w.model(a).unwrap().stall);
        assert!((w.model(a).unwrap().pose.x - 0.5).abs() < 1e-6);
    }

    /// Invariant 4 — velocity list membership tracks nonzero velocity.
    #[test]
    fn velocity_list_membership() {
        let mut w = world();
        let mut params = NoParams;
        let m = w.add_model(None, ModelKind::Generic, "mover");
        assert!(!w.velocity_list.contains(&m));
        w.set_velocity(m, Velocity { x: 1.0, ..Velocity::ZERO }, &mut params);
        assert!(w.velocity_list.contains(&m));
        w.set_velocity(m, Velocity::ZERO, &mut params);
        assert!(!w.velocity_list.contains(&m));
    }

    /// Subscription counting.
    #[test]
    fn s5_subscription_counting() {
        let mut w = world();
        let mut params = NoParams;
        let m = w.add_model(None, ModelKind::Generic, "sensor");

        w.subscribe(m, &mut params);
        w.subscribe(m, &mut params);
        w.subscribe(m, &mut params);
        assert_eq!(w.model(m).unwrap().subscription_count(), 3);
        assert!(w.update_list.contains(&m));

        w.unsubscribe(m, &mut params);
        w.unsubscribe(m, &mut params);
        assert_eq!(w.model(m).unwrap().subscription_count(), 1);
        assert!(w.update_list.contains(&m));

        w.unsubscribe(m, &mut params);
        assert_eq!(w.model(m).unwrap().subscription_count(), 0);
        assert!(!w.update_list.contains(&m));
    }

    /// Antecedent relationships are consistent across a multi-level tree.
    #[test]
    fn antecedent_relationships() {
        let mut w = world();
        let parent = w.add_model(None, ModelKind::Generic, "p");
        let child = w.add_model(Some(parent), ModelKind::Generic, "c");
        let grandchild = w.add_model(Some(child), ModelKind::Generic, "gc");

        assert!(w.is_antecedent(grandchild, parent));
        assert!(w.is_antecedent(grandchild, child));
        assert!(w.is_antecedent(grandchild, grandchild));
        assert!(!w.is_antecedent(parent, grandchild));
        assert!(w.is_related(grandchild, parent));
    }

    /// Global pose cache correctness across repeated identical
    /// `set_pose` calls.
    #[test]
    fn global_pose_cache_stable() {
        let mut w = world();
        let mut params = NoParams;
        let m = w.add_model(None, ModelKind::Generic, "m");
        let p = Pose::from_xya(2.0, 3.0, 0.5);
        w.set_pose(m, p, &mut params);
        let first = w.global_pose(m);
        w.set_pose(m, p, &mut params);
        let second = w.global_pose(m);
        assert_eq!(first, second);
    }

    /// `set_global_pose` round-trips through `global_pose` even when the
    /// parent has nonzero `geom.size.z`, instead of leaving the child's
    /// cached global Z off by the parent's stack height.
    #[test]
    fn set_global_pose_round_trips_through_parent_stack_height() {
        let mut w = world();
        let mut params = NoParams;
        let parent = w.add_model(None, ModelKind::Generic, "parent");
        w.set_geom(
            parent,
            Geom {
                size: Size3::new(1.0, 1.0, 0.3),
                pose: Pose::ZERO,
            },
            &mut params,
        );
        w.set_pose(parent, Pose::from_xya(1.0, 1.0, 0.0), &mut params);

        let child = w.add_model(Some(parent), ModelKind::Generic, "child");
        let target = Pose::new(2.0, 3.0, 0.8, 0.0);
        w.set_global_pose(child, target, &mut params);

        let gp = w.global_pose(child);
        assert!((gp.x - target.x).abs() < 1e-9);
        assert!((gp.y - target.y).abs() < 1e-9);
        assert!((gp.z - target.z).abs() < 1e-9);
    }
}
