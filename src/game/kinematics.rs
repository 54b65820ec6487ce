//! Vector math and snapshot-based motion extrapolation
//!
//! Everything here is pure and shared by the motion validator and the
//! creature controller, so both sides agree on where an entity is.

use serde::{Deserialize, Serialize};

/// Lengths below this are treated as a zero vector
pub const NORMALIZE_EPSILON: f32 = 1e-4;

/// World-space position or direction. `z` is the vertical axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction, or zero for degenerate input
    pub fn normalize(&self) -> Vector3 {
        let len = self.length();
        if len < NORMALIZE_EPSILON {
            return Vector3::ZERO;
        }
        Vector3::new(self.x / len, self.y / len, self.z / len)
    }

    pub fn add(&self, other: Vector3) -> Vector3 {
        Vector3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(&self, other: Vector3) -> Vector3 {
        Vector3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(&self, factor: f32) -> Vector3 {
        Vector3::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// Heading in the horizontal plane, radians
    pub fn heading(&self) -> f32 {
        self.y.atan2(self.x)
    }
}

pub fn distance_3d(a: Vector3, b: Vector3) -> f32 {
    b.sub(a).length()
}

/// Horizontal distance, ignoring the vertical axis
pub fn distance_2d(a: Vector3, b: Vector3) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    (dx * dx + dy * dy).sqrt()
}

/// Unit direction pointing from `from` to `to`
pub fn direction_between(from: Vector3, to: Vector3) -> Vector3 {
    to.sub(from).normalize()
}

/// Continuous movement description.
///
/// Produced once when movement begins; "position now" is reconstructed from
/// it on demand instead of being retransmitted every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSnapshot {
    pub start_position: Vector3,
    pub destination: Vector3,
    /// Unit direction of travel
    pub direction: Vector3,
    /// Initial speed, units per second
    pub velocity: f32,
    /// Units per second squared
    pub acceleration: f32,
    pub heading_radians: f32,
    /// Server time in milliseconds when movement began
    pub start_tick: u64,
}

impl MotionSnapshot {
    /// Begin constant-acceleration movement from `start` towards `destination`
    pub fn towards(
        start: Vector3,
        destination: Vector3,
        velocity: f32,
        acceleration: f32,
        start_tick: u64,
    ) -> Self {
        let direction = direction_between(start, destination);
        Self {
            start_position: start,
            destination,
            direction,
            velocity,
            acceleration,
            heading_radians: direction.heading(),
            start_tick,
        }
    }

    /// Total path length of this movement
    pub fn path_length(&self) -> f32 {
        distance_3d(self.start_position, self.destination)
    }
}

/// Extrapolate where a snapshot puts its entity at `now` (milliseconds).
///
/// Travel is `v·t + ½·a·t²`, floored at zero and capped at the destination.
/// Returns `None` when no time has elapsed since the snapshot began; callers
/// fall back to the last discrete position in that case.
pub fn current_position(snapshot: &MotionSnapshot, now: u64) -> Option<Vector3> {
    if now <= snapshot.start_tick {
        return None;
    }

    let elapsed = (now - snapshot.start_tick) as f32 / 1000.0;
    let traveled = (snapshot.velocity * elapsed
        + 0.5 * snapshot.acceleration * elapsed * elapsed)
        .max(0.0);

    let total = snapshot.path_length();
    if traveled >= total {
        return Some(snapshot.destination);
    }

    Some(
        snapshot
            .start_position
            .add(snapshot.direction.scale(traveled)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_distances() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(3.0, 4.0, 12.0);
        assert!(approx(distance_3d(a, b), 13.0));
        assert!(approx(distance_2d(a, b), 5.0));
    }

    #[test]
    fn test_normalize_unit_length() {
        let v = Vector3::new(3.0, -7.0, 2.5).normalize();
        assert!(approx(v.length(), 1.0));
    }

    #[test]
    fn test_normalize_degenerate_is_zero() {
        let v = Vector3::new(0.00001, 0.00002, 0.0).normalize();
        assert_eq!(v, Vector3::ZERO);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = Vector3::new(10.0, 0.5, -3.0).normalize();
        let twice = once.normalize();
        assert!(approx(once.x, twice.x));
        assert!(approx(once.y, twice.y));
        assert!(approx(once.z, twice.z));
    }

    #[test]
    fn test_direction_between() {
        let dir = direction_between(Vector3::new(1.0, 1.0, 0.0), Vector3::new(1.0, 5.0, 0.0));
        assert!(approx(dir.x, 0.0));
        assert!(approx(dir.y, 1.0));
    }

    #[test]
    fn test_current_position_constant_velocity() {
        let snap = MotionSnapshot::towards(
            Vector3::ZERO,
            Vector3::new(100.0, 0.0, 0.0),
            10.0,
            0.0,
            1_000,
        );
        let pos = current_position(&snap, 3_000).unwrap();
        assert!(approx(pos.x, 20.0));
        assert!(approx(pos.y, 0.0));
    }

    #[test]
    fn test_current_position_with_acceleration() {
        let snap = MotionSnapshot::towards(
            Vector3::ZERO,
            Vector3::new(0.0, 100.0, 0.0),
            0.0,
            4.0,
            0,
        );
        // 0.5 * 4 * 3^2 = 18
        let pos = current_position(&snap, 3_000).unwrap();
        assert!(approx(pos.y, 18.0));
    }

    #[test]
    fn test_current_position_clamps_to_destination() {
        let dest = Vector3::new(5.0, 5.0, 0.0);
        let snap = MotionSnapshot::towards(Vector3::ZERO, dest, 10.0, 0.0, 0);
        assert_eq!(current_position(&snap, 60_000), Some(dest));
    }

    #[test]
    fn test_current_position_negative_travel_floors_at_start() {
        let snap = MotionSnapshot::towards(
            Vector3::ZERO,
            Vector3::new(10.0, 0.0, 0.0),
            1.0,
            -10.0,
            0,
        );
        let pos = current_position(&snap, 5_000).unwrap();
        assert_eq!(pos, Vector3::ZERO);
    }

    #[test]
    fn test_current_position_degenerate_elapsed() {
        let snap = MotionSnapshot::towards(
            Vector3::ZERO,
            Vector3::new(10.0, 0.0, 0.0),
            1.0,
            0.0,
            500,
        );
        assert!(current_position(&snap, 500).is_none());
        assert!(current_position(&snap, 100).is_none());
    }
}
