//! Block: a polygonal prism attached to a model, and its mapping into
//! the spatial index.

use itertools::Itertools;
use ultraviolet::DVec2;

use crate::color::Color;
use crate::math::{Pose, Size3};
use crate::model::ModelKey;
use crate::spatial_index::{BlockHandle, SpatialIndex};

/// A polygonal prism: an ordered, simple (but not necessarily convex)
/// polygon outline plus a `[zmin, zmax]` height band.
///
/// The cached pixel footprint (`mapped`) is only meaningful while the
/// block is mapped; it is empty before the first `map` call and after
/// `unmap`.
#[derive(Clone, Debug)]
pub struct Block {
    pub points: Vec<DVec2>,
    pub zmin: f64,
    pub zmax: f64,
    pub color: Color,
    pub inherit_color: bool,
    mapped: Vec<BlockHandle>,
    global_zmin: f64,
    global_zmax: f64,
}

impl Block {
    /// Copies `points`; the cached pixel footprint is allocated but
    /// undefined until [`Block::map`]. Panics on a degenerate (fewer
    /// than 3 vertex) polygon; a degenerate outline is a programming error.
    pub fn construct(
        points: Vec<DVec2>,
        zmin: f64,
        zmax: f64,
        color: Color,
        inherit_color: bool,
    ) -> Self {
        assert!(points.len() >= 3, "a block needs at least 3 points");
        Block {
            points,
            zmin,
            zmax,
            color,
            inherit_color,
            mapped: Vec::new(),
            global_zmin: zmin,
            global_zmax: zmax,
        }
    }

    /// Alias for [`Block::construct`], named after the polygon-outline
    /// argument it takes.
    pub fn from_points(
        points: Vec<DVec2>,
        zmin: f64,
        zmax: f64,
        color: Color,
        inherit_color: bool,
    ) -> Self {
        Block::construct(points, zmin, zmax, color, inherit_color)
    }

    /// Axis-aligned rectangle of size `w` x `h` centered on the origin.
    pub fn rect(w: f64, h: f64, zmin: f64, zmax: f64, color: Color) -> Self {
        let hw = w / 2.0;
        let hh = h / 2.0;
        Block::construct(
            vec![
                DVec2::new(-hw, -hh),
                DVec2::new(hw, -hh),
                DVec2::new(hw, hh),
                DVec2::new(-hw, hh),
            ],
            zmin,
            zmax,
            color,
            false,
        )
    }

    pub fn is_mapped(&self) -> bool {
        !self.mapped.is_empty()
    }

    pub fn global_z_band(&self) -> (f64, f64) {
        (self.global_zmin, self.global_zmax)
    }

    /// Transform every vertex into world coordinates via `owner_global`
    /// and `geom_offset` (the model's geometry offset), rasterize each
    /// polygon edge, and record `(pixel, block)` entries in `index` for
    /// every pixel an edge crosses. Idempotent only when called once
    /// per map cycle; calling twice without an intervening `unmap`
    /// duplicates entries and is an invariant violation.
    pub fn map(
        &mut self,
        owner: ModelKey,
        block_idx: usize,
        owner_global: Pose,
        geom_offset: Pose,
        index: &mut SpatialIndex,
    ) {
        assert!(!self.is_mapped(), "block is already mapped");

        self.global_zmin = owner_global.z + geom_offset.z + self.zmin;
        self.global_zmax = owner_global.z + geom_offset.z + self.zmax;

        let world_points: Vec<DVec2> = self
            .points
            .iter()
            .map(|p| to_world(owner_global, geom_offset, *p))
            .collect();

        for (a, b) in world_points.iter().copied().circular_tuple_windows() {
            let a = index.to_pixel_unchecked(a);
            let b = index.to_pixel_unchecked(b);
            for (px, py) in rasterize_segment_px(a, b) {
                if let Some(h) = index.add_block_pixel(
                    px,
                    py,
                    owner,
                    block_idx,
                    self.global_zmin,
                    self.global_zmax,
                    self.color,
                ) {
                    self.mapped.push(h);
                }
            }
        }
    }

    /// Remove every entry this block previously inserted. Idempotent in
    /// effect (after returning, no entry referencing this block exists)
    /// but panics if called on a block that was never mapped, matching
    /// the fail-fast policy for invariant violations.
    pub fn unmap(&mut self, index: &mut SpatialIndex) {
        assert!(self.is_mapped(), "attempted to unmap a block that is not mapped");
        for handle in self.mapped.drain(..) {
            index.remove(handle);
        }
    }

    /// Rescale every point in `blocks` to fit inside `±target_size/2`
    /// on x and y, centered at the origin; z bounds scale by
    /// `target_size.z / max_zmax` across the group. Every block must be
    /// unmapped first (an invariant violation otherwise).
    pub fn scale_list(blocks: &mut [Block], target_size: Size3) {
        assert!(
            blocks.iter().all(|b| !b.is_mapped()),
            "cannot rescale mapped blocks"
        );
        if blocks.is_empty() {
            return;
        }

        let mut min = DVec2::new(f64::INFINITY, f64::INFINITY);
        let mut max = DVec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        let mut max_zmax = f64::MIN_POSITIVE;
        for b in blocks.iter() {
            for p in &b.points {
                min.x = min.x.min(p.x);
                min.y = min.y.min(p.y);
                max.x = max.x.max(p.x);
                max.y = max.y.max(p.y);
            }
            max_zmax = max_zmax.max(b.zmax.abs()).max(b.zmin.abs());
        }

        let span = max - min;
        let scale_x = if span.x > 0.0 { target_size.x / span.x } else { 1.0 };
        let scale_y = if span.y > 0.0 { target_size.y / span.y } else { 1.0 };
        let center = (min + max) / 2.0;
        let z_scale = if max_zmax > 0.0 { target_size.z / max_zmax } else { 1.0 };

        for b in blocks.iter_mut() {
            for p in b.points.iter_mut() {
                p.x = (p.x - center.x) * scale_x;
                p.y = (p.y - center.y) * scale_y;
            }
            b.zmin *= z_scale;
            b.zmax *= z_scale;
        }
    }
}

/// Transform a local polygon vertex through the geometry offset and
/// then the model's global pose, using the same two `pose_sum`
/// applications as `Model::local_to_global`.
pub(crate) fn to_world(owner_global: Pose, geom_offset: Pose, local: DVec2) -> DVec2 {
    use crate::math::pose_sum;
    let with_offset = pose_sum(geom_offset, Pose::from_xya(local.x, local.y, 0.0));
    let world = pose_sum(owner_global, with_offset);
    world.point()
}

/// Walk an integer Bresenham line between two pixel coordinates,
/// returning every 8-connected pixel crossed.
fn rasterize_segment_px(a: (i64, i64), b: (i64, i64)) -> Vec<(i64, i64)> {
    let (mut x0, mut y0) = a;
    let (x1, y1) = b;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut out = Vec::new();
    loop {
        out.push((x0, y0));
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
    out
}

/// Marker trait for the external renderer interface. The core never
/// calls into implementors; it exists only so host applications have a
/// stable seam to hang `DrawFootprint`/`DrawSides`/`DrawTop`-style
/// visitors off of.
pub trait FootprintVisitor {
    fn visit_footprint(&mut self, block: &Block, world_points: &[DVec2]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn degenerate_block_panics() {
        Block::construct(vec![DVec2::new(0.0, 0.0)], 0.0, 1.0, Color::default(), false);
    }

    #[test]
    fn rect_has_four_points() {
        let b = Block::rect(2.0, 1.0, 0.0, 1.0, Color::default());
        assert_eq!(b.points.len(), 4);
    }

    #[test]
    fn rasterize_segment_is_connected() {
        let pts = rasterize_segment_px((0, 0), (2, 1));
        assert!(!pts.is_empty());
        for w in pts.windows(2) {
            let (x0, y0) = w[0];
            let (x1, y1) = w[1];
            assert!((x0 - x1).abs() <= 1 && (y0 - y1).abs() <= 1);
        }
    }

    #[test]
    fn scale_list_fits_target_bounds() {
        let mut blocks = vec![Block::rect(4.0, 2.0, 0.0, 2.0, Color::default())];
        Block::scale_list(&mut blocks, Size3::new(1.0, 1.0, 1.0));
        for p in &blocks[0].points {
            assert!(p.x.abs() <= 0.5 + 1e-9);
            assert!(p.y.abs() <= 0.5 + 1e-9);
        }
    }
}
