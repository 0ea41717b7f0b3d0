//! Geometry primitives: poses, velocities and the handful of operations
//! everything else in the crate is built out of.
//!
//! All pose composition elsewhere in the crate goes through [`pose_sum`]
//! and [`global_to_local`]; nothing else should reach into a `Pose`'s
//! fields to do its own trigonometry.

use std::f64::consts::PI;
use ultraviolet::DVec2;

/// A 2D position, height and heading.
///
/// `a` (heading) is always normalized to `(-PI, PI]`; use [`normalize`]
/// rather than assigning to the field directly.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
}

impl Pose {
    pub const ZERO: Pose = Pose {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        a: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64, a: f64) -> Self {
        Pose {
            x,
            y,
            z,
            a: normalize(a),
        }
    }

    pub fn from_xya(x: f64, y: f64, a: f64) -> Self {
        Pose::new(x, y, 0.0, a)
    }

    pub fn point(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Pose::ZERO
    }
}

/// Linear and angular velocity, expressed in the owning body's frame.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
}

impl Velocity {
    pub const ZERO: Velocity = Velocity {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        a: 0.0,
    };

    /// True if any component is nonzero; determines membership in the
    /// world's velocity list.
    pub fn is_nonzero(&self) -> bool {
        self.x != 0.0 || self.y != 0.0 || self.z != 0.0 || self.a != 0.0
    }

    /// Scale every component by `dt`, yielding a pose delta expressed in
    /// the same frame as the velocity.
    pub fn scaled(&self, dt: f64) -> Pose {
        Pose::new(self.x * dt, self.y * dt, self.z * dt, self.a * dt)
    }
}

impl Default for Velocity {
    fn default() -> Self {
        Velocity::ZERO
    }
}

/// A 3-component size vector (x, y, z extents of a body's bounding box).
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Size3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Size3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Size3 { x, y, z }
    }
}

/// Compose `b`, expressed in `a`'s frame, into the world frame.
///
/// This is the one place the rotation matrix for pose composition is
/// written down; `global_to_local` is its exact inverse.
pub fn pose_sum(a: Pose, b: Pose) -> Pose {
    let (sin_a, cos_a) = a.a.sin_cos();
    Pose::new(
        a.x + b.x * cos_a - b.y * sin_a,
        a.y + b.x * sin_a + b.y * cos_a,
        a.z + b.z,
        a.a + b.a,
    )
}

/// Invert `pose_sum`: given a point `p` in world coordinates and the
/// `frame` it should be expressed relative to, return `p` in `frame`'s
/// local coordinates.
///
/// Satisfies `global_to_local(f, pose_sum(f, p)) == p` up to floating
/// point tolerance and heading re-normalization.
pub fn global_to_local(frame: Pose, p: Pose) -> Pose {
    let (sin_a, cos_a) = frame.a.sin_cos();
    let dx = p.x - frame.x;
    let dy = p.y - frame.y;
    Pose::new(
        dx * cos_a + dy * sin_a,
        -dx * sin_a + dy * cos_a,
        p.z - frame.z,
        p.a - frame.a,
    )
}

/// Normalize an angle in radians into `(-PI, PI]`.
pub fn normalize(a: f64) -> f64 {
    let two_pi = 2.0 * PI;
    let mut a = a % two_pi;
    if a <= -PI {
        a += two_pi;
    } else if a > PI {
        a -= two_pi;
    }
    a
}

/// A size plus the pose of a body's geometric center relative to its
/// owning model's pose origin.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Geom {
    pub size: Size3,
    /// Offset of the body center from the model's pose origin.
    pub pose: Pose,
}

impl Geom {
    /// Axis-aligned footprint of this geometry at the identity pose,
    /// as `(min, max)` corners in the geometry's own frame.
    pub fn bounds(&self) -> (DVec2, DVec2) {
        let hx = self.size.x / 2.0;
        let hy = self.size.y / 2.0;
        (
            DVec2::new(self.pose.x - hx, self.pose.y - hy),
            DVec2::new(self.pose.x + hx, self.pose.y + hy),
        )
    }
}

impl Default for Geom {
    fn default() -> Self {
        Geom {
            size: Size3::new(1.0, 1.0, 1.0),
            pose: Pose::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn poses_approx_eq(a: Pose, b: Pose) -> bool {
        approx_eq(a.x, b.x) && approx_eq(a.y, b.y) && approx_eq(a.z, b.z) && approx_eq(a.a, b.a)
    }

    #[test]
    fn normalize_wraps_into_range() {
        assert!(approx_eq(normalize(0.0), 0.0));
        assert!(approx_eq(normalize(PI), PI));
        assert!(approx_eq(normalize(-PI), PI));
        assert!(approx_eq(normalize(PI + 0.1), -PI + 0.1));
        assert!(approx_eq(normalize(-PI - 0.1), PI - 0.1));
        assert!(approx_eq(normalize(3.0 * PI), PI));
    }

    /// Hierarchical pose composition.
    #[test]
    fn pose_sum_composes_parent_and_child() {
        let parent = Pose::from_xya(1.0, 0.0, PI / 2.0);
        let child_local = Pose::from_xya(1.0, 0.0, 0.0);
        let global = pose_sum(parent, child_local);
        assert!(approx_eq(global.x, 1.0));
        assert!(approx_eq(global.y, 1.0));
        assert!(approx_eq(global.a, PI / 2.0));
    }

    /// Property 5: global_to_local inverts pose_sum.
    #[test]
    fn global_to_local_inverts_pose_sum() {
        let frame = Pose::from_xya(3.0, -2.0, 0.7);
        let local = Pose::from_xya(-1.5, 4.2, 1.1);
        let global = pose_sum(frame, local);
        let recovered = global_to_local(frame, global);
        assert!(poses_approx_eq(recovered, local));
    }

    #[test]
    fn velocity_nonzero_detection() {
        assert!(!Velocity::ZERO.is_nonzero());
        assert!(Velocity {
            x: 1.0,
            ..Velocity::ZERO
        }
        .is_nonzero());
        assert!(Velocity {
            a: 0.1,
            ..Velocity::ZERO
        }
        .is_nonzero());
    }
}
