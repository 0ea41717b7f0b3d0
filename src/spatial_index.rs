//! Multi-resolution raster spatial index.
//!
//! The world is tiled into **superregions**, each containing a
//! `SUPERREGION_SIZE`×`SUPERREGION_SIZE` grid of **regions**, each
//! containing `REGION_SIZE`×`REGION_SIZE` individual pixels. Every
//! region and superregion carries a non-zero-entry counter so that
//! [`SpatialIndex::raytrace`] can skip whole empty tiers in one step
//! instead of walking them pixel by pixel.
//!
//! Pixel occupancy is a doubly linked list of [`Entry`] nodes living in
//! a `thunderdome` arena; the [`BlockHandle`] returned by
//! [`SpatialIndex::add_block_pixel`] is the arena index of that node,
//! giving O(1) insertion and O(1) removal by handle.

use std::cell::Cell;

use thunderdome::{Arena, Index};
use ultraviolet::DVec2;

use crate::color::Color;
use crate::error::SpatialIndexError;
use crate::model::ModelKey;

/// Pixels per region, along one axis.
pub const REGION_SIZE: i64 = 32;
/// Regions per superregion, along one axis (so a superregion spans
/// `REGION_SIZE * SUPERREGION_SIZE` pixels per side).
pub const SUPERREGION_SIZE: i64 = 32;

const MAX_RASTER_SIDE: i64 = 1 << 20;

/// Construction-time parameters for a [`SpatialIndex`].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct SpatialIndexParams {
    pub width_m: f64,
    pub height_m: f64,
    pub ppm: f64,
}

/// Opaque handle to one (pixel, block) entry, returned by
/// [`SpatialIndex::add_block_pixel`] and consumed by
/// [`SpatialIndex::remove`]. Stored by the owning [`crate::block::Block`]
/// so it can un-map itself in O(1) per pixel without searching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHandle(Index);

struct Entry {
    model: ModelKey,
    block_idx: usize,
    global_zmin: f64,
    global_zmax: f64,
    color: Color,
    pixel: usize,
    prev: Option<Index>,
    next: Option<Index>,
}

#[derive(Default, Clone, Copy, Debug)]
struct Pixel {
    head: Option<Index>,
}

/// Result of a single ray query.
#[derive(Clone, Copy, Debug)]
pub struct RaySample {
    /// Point the ray terminated at, in world meters.
    pub point: DVec2,
    /// Distance travelled from the ray's origin, in meters.
    pub range: f64,
    /// Color of the block hit, for visualization; a neutral default if
    /// nothing was hit.
    pub color: Color,
    /// The model owning the hit block, or `None` if the ray found
    /// nothing within range.
    pub model: Option<ModelKey>,
}

/// Counters an instrumented caller can inspect to confirm the raytracer
/// is actually skipping empty tiers rather than walking every pixel.
#[derive(Default, Debug)]
pub struct RaytraceStats {
    pub pixels_visited: Cell<u64>,
    pub regions_visited: Cell<u64>,
    pub superregions_visited: Cell<u64>,
    pub regions_skipped: Cell<u64>,
    pub superregions_skipped: Cell<u64>,
}

impl RaytraceStats {
    fn reset(&self) {
        self.pixels_visited.set(0);
        self.regions_visited.set(0);
        self.superregions_visited.set(0);
        self.regions_skipped.set(0);
        self.superregions_skipped.set(0);
    }
}

pub struct SpatialIndex {
    params: SpatialIndexParams,
    width_px: i64,
    height_px: i64,
    width_regions: i64,
    height_regions: i64,
    width_superregions: i64,
    height_superregions: i64,
    pixels: Vec<Pixel>,
    region_counts: Vec<u32>,
    superregion_counts: Vec<u32>,
    entries: Arena<Entry>,
    pub stats: RaytraceStats,
}

fn div_ceil(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

impl SpatialIndex {
    pub fn new(params: SpatialIndexParams) -> Result<Self, SpatialIndexError> {
        if params.width_m <= 0.0 || params.height_m <= 0.0 {
            return Err(SpatialIndexError::NonPositiveExtent(
                params.width_m,
                params.height_m,
            ));
        }
        if params.ppm <= 0.0 {
            return Err(SpatialIndexError::NonPositivePpm(params.ppm));
        }
        let width_px = (params.width_m * params.ppm).ceil() as i64;
        let height_px = (params.height_m * params.ppm).ceil() as i64;
        if width_px > MAX_RASTER_SIDE || height_px > MAX_RASTER_SIDE {
            return Err(SpatialIndexError::ExtentTooLarge {
                extent: params.width_m.max(params.height_m),
                ppm: params.ppm,
                max: MAX_RASTER_SIDE as u32,
            });
        }

        let width_regions = div_ceil(width_px, REGION_SIZE);
        let height_regions = div_ceil(height_px, REGION_SIZE);
        let width_superregions = div_ceil(width_regions, SUPERREGION_SIZE);
        let height_superregions = div_ceil(height_regions, SUPERREGION_SIZE);

        Ok(SpatialIndex {
            params,
            width_px,
            height_px,
            width_regions,
            height_regions,
            width_superregions,
            height_superregions,
            pixels: vec![Pixel::default(); (width_px * height_px) as usize],
            region_counts: vec![0; (width_regions * height_regions) as usize],
            superregion_counts: vec![0; (width_superregions * height_superregions) as usize],
            entries: Arena::new(),
            stats: RaytraceStats::default(),
        })
    }

    pub fn ppm(&self) -> f64 {
        self.params.ppm
    }

    /// Convert a world-meter point to integer pixel coordinates, or
    /// `None` if it falls outside the raster.
    pub fn world_to_pixel(&self, p: DVec2) -> Option<(i64, i64)> {
        let (u, v) = self.to_local(p);
        let px = (u * self.params.ppm).floor() as i64;
        let py = (v * self.params.ppm).floor() as i64;
        if px >= 0 && px < self.width_px && py >= 0 && py < self.height_px {
            Some((px, py))
        } else {
            None
        }
    }

    /// World-meter coordinates map straight onto raster coordinates:
    /// the world's own origin `(0, 0)` sits at the raster's corner, and
    /// valid points span `[0, width_m) x [0, height_m)`. There is no
    /// centering offset.
    fn to_local(&self, p: DVec2) -> (f64, f64) {
        (p.x, p.y)
    }

    /// Convert a world-meter point to pixel coordinates without bounds
    /// checking, for callers (the line rasterizer in `block.rs`) that
    /// will feed every point through `add_block_pixel`, which does its
    /// own bounds check and simply drops out-of-range pixels.
    pub fn to_pixel_unchecked(&self, p: DVec2) -> (i64, i64) {
        let (u, v) = self.to_local(p);
        ((u * self.params.ppm).floor() as i64, (v * self.params.ppm).floor() as i64)
    }

    fn pixel_idx(&self, px: i64, py: i64) -> usize {
        (py * self.width_px + px) as usize
    }

    fn region_of(&self, px: i64, py: i64) -> (i64, i64) {
        (px.div_euclid(REGION_SIZE), py.div_euclid(REGION_SIZE))
    }

    fn superregion_of(&self, rx: i64, ry: i64) -> (i64, i64) {
        (
            rx.div_euclid(SUPERREGION_SIZE),
            ry.div_euclid(SUPERREGION_SIZE),
        )
    }

    fn region_idx(&self, rx: i64, ry: i64) -> usize {
        (ry * self.width_regions + rx) as usize
    }

    fn superregion_idx(&self, sx: i64, sy: i64) -> usize {
        (sy * self.width_superregions + sx) as usize
    }

    /// Insert `model`'s block (identified by its index within the
    /// model's block list) at pixel `(px, py)`. Returns `None` if the
    /// pixel lies outside the raster (the caller should skip it, the
    /// same way a polygon edge that exits the world is simply clipped).
    pub fn add_block_pixel(
        &mut self,
        px: i64,
        py: i64,
        model: ModelKey,
        block_idx: usize,
        global_zmin: f64,
        global_zmax: f64,
        color: Color,
    ) -> Option<BlockHandle> {
        if px < 0 || px >= self.width_px || py < 0 || py >= self.height_px {
            return None;
        }
        let pixel = self.pixel_idx(px, py);
        let (rx, ry) = self.region_of(px, py);
        let (sx, sy) = self.superregion_of(rx, ry);
        let region_idx = self.region_idx(rx, ry);
        let superregion_idx = self.superregion_idx(sx, sy);

        let old_head = self.pixels[pixel].head;
        let idx = self.entries.insert(Entry {
            model,
            block_idx,
            global_zmin,
            global_zmax,
            color,
            pixel,
            prev: None,
            next: old_head,
        });
        if let Some(old) = old_head {
            self.entries[old].prev = Some(idx);
        }
        self.pixels[pixel].head = Some(idx);
        self.region_counts[region_idx] += 1;
        self.superregion_counts[superregion_idx] += 1;

        Some(BlockHandle(idx))
    }

    /// Remove a previously inserted entry in O(1). Panics if the handle
    /// does not refer to a live entry — unmapping an already-unmapped
    /// block is a programming error.
    pub fn remove(&mut self, handle: BlockHandle) {
        let entry = self
            .entries
            .remove(handle.0)
            .expect("attempted to unmap a block entry that is not mapped");

        match entry.prev {
            Some(p) => self.entries[p].next = entry.next,
            None => self.pixels[entry.pixel].head = entry.next,
        }
        if let Some(n) = entry.next {
            self.entries[n].prev = entry.prev;
        }

        let py = entry.pixel as i64 / self.width_px;
        let px = entry.pixel as i64 % self.width_px;
        let (rx, ry) = self.region_of(px, py);
        let (sx, sy) = self.superregion_of(rx, ry);
        let region_idx = self.region_idx(rx, ry);
        let superregion_idx = self.superregion_idx(sx, sy);
        self.region_counts[region_idx] -= 1;
        self.superregion_counts[superregion_idx] -= 1;
    }

    /// Distance the caller must travel from `(u, v)` along `dir` before
    /// leaving the `cell_size`-sided cell it currently occupies.
    fn dist_to_cell_exit(u: f64, v: f64, dir: DVec2, cell_size: f64) -> f64 {
        let exit_axis = |coord: f64, d: f64| -> f64 {
            if d > 1e-12 {
                let boundary = ((coord / cell_size).floor() + 1.0) * cell_size;
                (boundary - coord) / d
            } else if d < -1e-12 {
                let boundary = (coord / cell_size).floor() * cell_size;
                (boundary - coord) / d
            } else {
                f64::INFINITY
            }
        };
        exit_axis(u, dir.x).min(exit_axis(v, dir.y)).max(1e-9)
    }

    /// Walk an integer DDA from `origin` along `bearing` up to `range`
    /// meters, calling `accept` for every candidate block whose owning
    /// model passes the caller's predicate. Z filtering, when `ztest`
    /// is set, rejects blocks whose `[global_zmin, global_zmax]` band
    /// does not contain `origin_z`.
    #[allow(clippy::too_many_arguments)]
    pub fn raytrace(
        &self,
        origin: DVec2,
        origin_z: f64,
        bearing: f64,
        range: f64,
        requester: Option<ModelKey>,
        ztest: bool,
        accept: &dyn Fn(ModelKey) -> bool,
    ) -> RaySample {
        self.stats.reset();
        let dir = DVec2::new(bearing.cos(), bearing.sin());
        let region_m = REGION_SIZE as f64 / self.params.ppm;
        let superregion_m = (REGION_SIZE * SUPERREGION_SIZE) as f64 / self.params.ppm;
        let pixel_m = 1.0 / self.params.ppm;

        let mut t = 0.0_f64;
        while t < range {
            let p = origin + dir * t;
            let (u, v) = self.to_local(p);
            if u < 0.0 || v < 0.0 || u >= self.params.width_m || v >= self.params.height_m {
                break;
            }

            let px = (u * self.params.ppm).floor() as i64;
            let py = (v * self.params.ppm).floor() as i64;
            let (rx, ry) = self.region_of(px, py);
            let (sx, sy) = self.superregion_of(rx, ry);

            if self.superregion_counts[self.superregion_idx(sx, sy)] == 0 {
                self.stats
                    .superregions_skipped
                    .set(self.stats.superregions_skipped.get() + 1);
                t += Self::dist_to_cell_exit(u, v, dir, superregion_m);
                continue;
            }
            self.stats
                .superregions_visited
                .set(self.stats.superregions_visited.get() + 1);

            if self.region_counts[self.region_idx(rx, ry)] == 0 {
                self.stats
                    .regions_skipped
                    .set(self.stats.regions_skipped.get() + 1);
                t += Self::dist_to_cell_exit(u, v, dir, region_m);
                continue;
            }
            self.stats
                .regions_visited
                .set(self.stats.regions_visited.get() + 1);
            self.stats.pixels_visited.set(self.stats.pixels_visited.get() + 1);

            let mut cursor = self.pixels[self.pixel_idx(px, py)].head;
            while let Some(idx) = cursor {
                let entry = &self.entries[idx];
                cursor = entry.next;

                if Some(entry.model) == requester {
                    continue;
                }
                if ztest && !(origin_z >= entry.global_zmin && origin_z <= entry.global_zmax) {
                    continue;
                }
                if accept(entry.model) {
                    return RaySample {
                        point: p,
                        range: t,
                        color: entry.color,
                        model: Some(entry.model),
                    };
                }
            }

            t += Self::dist_to_cell_exit(u, v, dir, pixel_m);
        }

        RaySample {
            point: origin + dir * range.min(t.max(0.0)),
            range: range.min(t),
            color: Color::default(),
            model: None,
        }
    }

    /// Dispatch `n_samples` evenly spaced rays spanning `fov` centered
    /// on `bearing`, ordered from `bearing - fov/2` to `bearing + fov/2`.
    #[allow(clippy::too_many_arguments)]
    pub fn raytrace_fan(
        &self,
        origin: DVec2,
        origin_z: f64,
        bearing: f64,
        range: f64,
        fov: f64,
        n_samples: usize,
        requester: Option<ModelKey>,
        ztest: bool,
        accept: &dyn Fn(ModelKey) -> bool,
    ) -> Vec<RaySample> {
        if n_samples == 0 {
            return Vec::new();
        }
        let start = bearing - fov / 2.0;
        let step = if n_samples > 1 {
            fov / (n_samples - 1) as f64
        } else {
            0.0
        };
        (0..n_samples)
            .map(|i| {
                let b = start + step * i as f64;
                self.raytrace(origin, origin_z, b, range, requester, ztest, accept)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::color::Color;
    use crate::math::{Geom, Pose, Size3};
    use rand::Rng;

    fn small_world() -> (SpatialIndex, slotmap::SlotMap<ModelKey, ()>) {
        let index = SpatialIndex::new(SpatialIndexParams {
            width_m: 1000.0,
            height_m: 1000.0,
            ppm: 20.0,
        })
        .unwrap();
        (index, slotmap::SlotMap::with_key())
    }

    /// Raytrace skips empty regions rather than walking every
    /// pixel between the origin and a distant block.
    #[test]
    fn s3_raytrace_skips_empty_regions() {
        let (mut index, mut keys) = small_world();
        let model = keys.insert(());

        let (px, py) = index.to_pixel_unchecked(DVec2::new(900.0, 0.0));
        index.add_block_pixel(px, py, model, 0, 0.0, 1.0, Color::default());

        let sample = index.raytrace(
            DVec2::new(0.0, 0.0),
            0.0,
            0.0,
            1000.0,
            None,
            false,
            &|m| m == model,
        );

        assert_eq!(sample.model, Some(model));
        assert!((sample.range - 900.0).abs() < 1.0);

        let total_px_on_path = (900.0 * index.ppm()) as u64;
        assert!(index.stats.pixels_visited.get() < total_px_on_path);
        assert!(index.stats.regions_skipped.get() > 0);
    }

    /// No hit: a ray that exits the world without crossing any block
    /// returns a null-block sample, a normal result rather than an error.
    #[test]
    fn raytrace_with_no_hit_returns_null_block() {
        let (index, _keys) = small_world();
        let sample = index.raytrace(DVec2::new(0.0, 0.0), 0.0, 0.0, 1000.0, None, false, &|_| true);
        assert!(sample.model.is_none());
    }

    /// Map/UnMap inverse: mapping a random polygon, unmapping it,
    /// and mapping it again yields the same set of (pixel, block)
    /// entries as the original map, and the index returns to its
    /// pre-map state in between.
    #[test]
    fn s4_map_unmap_is_an_exact_inverse() {
        let (mut index, mut keys) = small_world();
        let model = keys.insert(());

        let mut rng = rand::thread_rng();
        let points: Vec<DVec2> = (0..8)
            .map(|i| {
                let angle = i as f64 / 8.0 * std::f64::consts::TAU;
                let r = rng.gen_range(2.0..5.0);
                DVec2::new(r * angle.cos(), r * angle.sin())
            })
            .collect();

        let pose = Pose::from_xya(
            rng.gen_range(100.0..900.0),
            rng.gen_range(100.0..900.0),
            rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI),
        );
        let geom = Geom {
            size: Size3::new(1.0, 1.0, 1.0),
            pose: Pose::ZERO,
        };

        let mut block = Block::construct(points, 0.0, 1.0, Color::default(), false);

        let pre_map_occupancy = occupied_pixel_count(&index);

        block.map(model, 0, pose, geom.pose, &mut index);
        let after_first_map = occupied_pixel_count(&index);
        assert!(after_first_map > pre_map_occupancy);

        block.unmap(&mut index);
        assert_eq!(occupied_pixel_count(&index), pre_map_occupancy);

        block.map(model, 0, pose, geom.pose, &mut index);
        assert_eq!(occupied_pixel_count(&index), after_first_map);
    }

    fn occupied_pixel_count(index: &SpatialIndex) -> usize {
        index.pixels.iter().filter(|p| p.head.is_some()).count()
    }

    #[test]
    #[should_panic]
    fn unmapping_an_unmapped_block_panics() {
        let (mut index, keys) = small_world();
        let mut block = Block::rect(1.0, 1.0, 0.0, 1.0, Color::default());
        let _ = keys; // no entries ever inserted for this block
        block.unmap(&mut index);
    }
}
