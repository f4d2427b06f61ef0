//! Movement, bounds and distance helpers shared by every entity kind

use crate::util::time::dt_secs;

/// Player walking speed in units per second
pub const PLAYER_SPEED: f32 = 80.0;

/// Carrying a sample halves movement speed
pub const CARRY_SPEED_FACTOR: f32 = 0.5;

/// Players are kept this far inside the map edge
pub const PLAYER_EDGE_INSET: f32 = 10.0;

/// Bullets and projectiles are discarded this far outside the map
pub const OFFSCREEN_MARGIN: f32 = 50.0;

/// Rectangular play area, origin at the top-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldBounds {
    pub width: f32,
    pub height: f32,
}

impl WorldBounds {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.width / 2.0, self.height / 2.0)
    }

    /// Clamp a point to `inset` units inside the bounds
    pub fn clamp(&self, x: f32, y: f32, inset: f32) -> (f32, f32) {
        (
            x.clamp(inset, (self.width - inset).max(inset)),
            y.clamp(inset, (self.height - inset).max(inset)),
        )
    }

    /// True once a point is more than `margin` units outside the bounds
    pub fn is_outside(&self, x: f32, y: f32, margin: f32) -> bool {
        x < -margin || x > self.width + margin || y < -margin || y > self.height + margin
    }
}

/// Directional movement keys held for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

/// Physics system for positions and velocities
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Velocity for held movement keys. Diagonals are normalized so they are
    /// no faster than straight lines.
    pub fn input_velocity(input: MoveInput, carrying: bool) -> (f32, f32) {
        let mut dx = 0.0;
        let mut dy = 0.0;
        if input.up {
            dy -= 1.0;
        }
        if input.down {
            dy += 1.0;
        }
        if input.left {
            dx -= 1.0;
        }
        if input.right {
            dx += 1.0;
        }

        let speed = if carrying {
            PLAYER_SPEED * CARRY_SPEED_FACTOR
        } else {
            PLAYER_SPEED
        };

        let (nx, ny) = Self::normalize(dx, dy);
        (nx * speed, ny * speed)
    }

    /// Advance a position by velocity over one tick of `dt_ms`
    pub fn integrate(x: f32, y: f32, vx: f32, vy: f32, dt_ms: u64) -> (f32, f32) {
        let dt = dt_secs(dt_ms);
        (x + vx * dt, y + vy * dt)
    }

    /// Move from `(x, y)` toward `(tx, ty)` at `speed` for one tick.
    /// Never overshoots the target point.
    pub fn step_toward(x: f32, y: f32, tx: f32, ty: f32, speed: f32, dt_ms: u64) -> (f32, f32) {
        let dist = Self::distance(x, y, tx, ty);
        let step = speed * dt_secs(dt_ms);
        if dist <= step || dist <= f32::EPSILON {
            return (tx, ty);
        }
        (x + (tx - x) / dist * step, y + (ty - y) / dist * step)
    }

    /// Unit vector from one point to another, zero if they coincide
    pub fn direction(x: f32, y: f32, tx: f32, ty: f32) -> (f32, f32) {
        Self::normalize(tx - x, ty - y)
    }

    pub fn distance(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
        let dx = x2 - x1;
        let dy = y2 - y1;
        (dx * dx + dy * dy).sqrt()
    }

    /// Strictly-inside radius check used by every collision test
    pub fn within(x1: f32, y1: f32, x2: f32, y2: f32, radius: f32) -> bool {
        let dx = x2 - x1;
        let dy = y2 - y1;
        dx * dx + dy * dy < radius * radius
    }

    fn normalize(dx: f32, dy: f32) -> (f32, f32) {
        let len = (dx * dx + dy * dy).sqrt();
        if len <= f32::EPSILON {
            (0.0, 0.0)
        } else {
            (dx / len, dy / len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_input_is_normalized() {
        let input = MoveInput {
            up: true,
            right: true,
            ..Default::default()
        };
        let (vx, vy) = PhysicsSystem::input_velocity(input, false);
        let speed = (vx * vx + vy * vy).sqrt();
        assert!((speed - PLAYER_SPEED).abs() < 1e-3);
        assert!(vx > 0.0 && vy < 0.0);
    }

    #[test]
    fn carrying_halves_speed() {
        let input = MoveInput {
            left: true,
            ..Default::default()
        };
        let (vx, _) = PhysicsSystem::input_velocity(input, true);
        assert!((vx + PLAYER_SPEED / 2.0).abs() < 1e-3);
    }

    #[test]
    fn opposite_keys_cancel() {
        let input = MoveInput {
            up: true,
            down: true,
            ..Default::default()
        };
        assert_eq!(PhysicsSystem::input_velocity(input, false), (0.0, 0.0));
    }

    #[test]
    fn clamp_keeps_players_inside_inset() {
        let bounds = WorldBounds::new(500.0, 700.0);
        assert_eq!(bounds.clamp(-40.0, 900.0, PLAYER_EDGE_INSET), (10.0, 690.0));
        assert_eq!(bounds.clamp(250.0, 350.0, PLAYER_EDGE_INSET), (250.0, 350.0));
    }

    #[test]
    fn offscreen_uses_margin() {
        let bounds = WorldBounds::new(500.0, 700.0);
        assert!(!bounds.is_outside(-49.0, 10.0, OFFSCREEN_MARGIN));
        assert!(bounds.is_outside(-51.0, 10.0, OFFSCREEN_MARGIN));
        assert!(bounds.is_outside(10.0, 751.0, OFFSCREEN_MARGIN));
    }

    #[test]
    fn step_toward_does_not_overshoot() {
        let (x, y) = PhysicsSystem::step_toward(0.0, 0.0, 1.0, 0.0, 100.0, 50);
        assert_eq!((x, y), (1.0, 0.0));
        let (x, _) = PhysicsSystem::step_toward(0.0, 0.0, 100.0, 0.0, 100.0, 50);
        assert!((x - 5.0).abs() < 1e-4);
    }

    #[test]
    fn within_is_strict() {
        assert!(PhysicsSystem::within(0.0, 0.0, 9.9, 0.0, 10.0));
        assert!(!PhysicsSystem::within(0.0, 0.0, 10.0, 0.0, 10.0));
    }
}
