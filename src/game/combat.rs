//! Combat system - bullets, enemy projectiles, damage and target selection

use crate::util::time::dt_secs;
use crate::ws::protocol::{EnemyKind, EntityId, Identity, TargetPriority};

use super::physics::PhysicsSystem;

/// Ticks between two auto-fire shots from one player
pub const FIRE_COOLDOWN_TICKS: u64 = 4;

/// Damage immunity after a player is hit
pub const IFRAME_TICKS: u64 = 10;

/// Players only auto-acquire enemies closer than this
pub const AUTO_FIRE_RANGE: f32 = 150.0;

pub const BULLET_SPEED: f32 = 220.0;
pub const BULLET_TTL_TICKS: u32 = 60;
pub const BULLET_DAMAGE: f32 = 1.0;

pub const PROJECTILE_TTL_TICKS: u32 = 60;

/// Bullet vs enemy
pub const ENEMY_HIT_RADIUS: f32 = 8.0;
/// Bullet vs nest
pub const NEST_HIT_RADIUS: f32 = 20.0;
/// Projectile vs player
pub const PLAYER_HIT_RADIUS: f32 = 10.0;
/// Enemy body vs player
pub const CONTACT_RADIUS: f32 = 10.0;

/// Chance that a bullet hitting a nest wakes a defender swarmer
pub const NEST_DEFENDER_CHANCE: f32 = 0.3;

/// Player-fired bullet
#[derive(Debug, Clone)]
pub struct Bullet {
    pub id: EntityId,
    pub owner: Identity,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub ttl: u32,
}

impl Bullet {
    /// Create a bullet at `(x, y)` aimed at `(tx, ty)`
    pub fn aimed(id: EntityId, owner: Identity, x: f32, y: f32, tx: f32, ty: f32) -> Self {
        let (dx, dy) = PhysicsSystem::direction(x, y, tx, ty);
        Self {
            id,
            owner,
            x,
            y,
            vx: dx * BULLET_SPEED,
            vy: dy * BULLET_SPEED,
            ttl: BULLET_TTL_TICKS,
        }
    }

    /// Move one tick and burn one tick of lifetime. Returns false once the
    /// bullet has expired; an expired bullet is removed without a hit test.
    pub fn advance(&mut self, dt_ms: u64) -> bool {
        advance_body(&mut self.x, &mut self.y, self.vx, self.vy, &mut self.ttl, dt_ms)
    }
}

/// Enemy-fired projectile
#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: EntityId,
    /// Firing enemy, remembered as the victim's aggressor
    pub source: Option<EntityId>,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub damage: f32,
    pub ttl: u32,
}

impl Projectile {
    pub fn aimed(
        id: EntityId,
        source: Option<EntityId>,
        (x, y): (f32, f32),
        (tx, ty): (f32, f32),
        speed: f32,
        damage: f32,
    ) -> Self {
        let (dx, dy) = PhysicsSystem::direction(x, y, tx, ty);
        Self {
            id,
            source,
            x,
            y,
            vx: dx * speed,
            vy: dy * speed,
            damage,
            ttl: PROJECTILE_TTL_TICKS,
        }
    }

    /// Same lifetime rules as [`Bullet::advance`]
    pub fn advance(&mut self, dt_ms: u64) -> bool {
        advance_body(&mut self.x, &mut self.y, self.vx, self.vy, &mut self.ttl, dt_ms)
    }
}

fn advance_body(x: &mut f32, y: &mut f32, vx: f32, vy: f32, ttl: &mut u32, dt_ms: u64) -> bool {
    let dt = dt_secs(dt_ms);
    *x += vx * dt;
    *y += vy * dt;
    *ttl = ttl.saturating_sub(1);
    *ttl > 0
}

/// Result of damaging a player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Dead or inside the invulnerability window; nothing changed
    Ignored,
    Wounded,
    Killed,
}

/// An enemy that auto-fire may consider
#[derive(Debug, Clone, Copy)]
pub struct TargetCandidate {
    pub id: EntityId,
    pub kind: EnemyKind,
    pub x: f32,
    pub y: f32,
    pub hp: f32,
}

/// Combat system for damage and targeting rules
pub struct CombatSystem;

impl CombatSystem {
    /// Check if a player can fire this tick
    pub fn can_fire(last_fire_tick: Option<u64>, tick: u64) -> bool {
        match last_fire_tick {
            Some(last) => tick.saturating_sub(last) >= FIRE_COOLDOWN_TICKS,
            None => true,
        }
    }

    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage).max(0.0);
        (new_health, new_health <= 0.0)
    }

    /// Threat weighting used by [`TargetPriority::HighestThreat`]
    pub fn threat_level(kind: EnemyKind) -> u8 {
        match kind {
            EnemyKind::Swarmer => 1,
            EnemyKind::Spitter => 3,
            EnemyKind::Burrower => 4,
            EnemyKind::Charger => 5,
            EnemyKind::BroodMother => 6,
        }
    }

    /// Pick an auto-fire target among `candidates` within [`AUTO_FIRE_RANGE`].
    ///
    /// Candidates must already exclude dead and burrowed enemies. Ties keep
    /// the first candidate in iteration order, so results are deterministic
    /// for an ordered candidate list.
    pub fn select_target(
        x: f32,
        y: f32,
        priority: TargetPriority,
        last_aggressor: Option<EntityId>,
        candidates: &[TargetCandidate],
    ) -> Option<EntityId> {
        let in_range: Vec<(f32, &TargetCandidate)> = candidates
            .iter()
            .map(|c| (PhysicsSystem::distance(x, y, c.x, c.y), c))
            .filter(|(dist, _)| *dist < AUTO_FIRE_RANGE)
            .collect();

        let closest = |list: &[(f32, &TargetCandidate)]| {
            list.iter()
                .fold(None::<(f32, EntityId)>, |best, (dist, c)| match best {
                    Some((d, _)) if d <= *dist => best,
                    _ => Some((*dist, c.id)),
                })
                .map(|(_, id)| id)
        };

        match priority {
            TargetPriority::Closest => closest(&in_range),
            TargetPriority::LowestHp => in_range
                .iter()
                .fold(None::<(f32, f32, EntityId)>, |best, (dist, c)| match best {
                    Some((hp, d, _)) if hp < c.hp || (hp == c.hp && d <= *dist) => best,
                    _ => Some((c.hp, *dist, c.id)),
                })
                .map(|(_, _, id)| id),
            TargetPriority::HighestThreat => in_range
                .iter()
                .fold(None::<(u8, f32, EntityId)>, |best, (dist, c)| {
                    let threat = Self::threat_level(c.kind);
                    match best {
                        Some((t, d, _)) if t > threat || (t == threat && d <= *dist) => best,
                        _ => Some((threat, *dist, c.id)),
                    }
                })
                .map(|(_, _, id)| id),
            TargetPriority::CurrentAggressor => last_aggressor
                .filter(|id| in_range.iter().any(|(_, c)| c.id == *id))
                .or_else(|| closest(&in_range)),
        }
    }
}
