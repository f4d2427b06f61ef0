//! Enemy stats and behaviour state machines
//!
//! Each enemy owns a [`Behavior`] holding its scratch state. A behaviour step
//! only touches its own enemy; anything that affects the rest of the world
//! (new projectiles, new swarmers) is returned as an [`AiEffect`] and applied
//! by the room after all enemies have moved.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::ws::protocol::{EnemyKind, EntityId};

use super::combat::CombatSystem;
use super::physics::PhysicsSystem;

/// Combat stats per enemy kind
#[derive(Debug, Clone, Copy)]
pub struct EnemyStats {
    pub max_hp: f32,
    /// Movement speed in units per second
    pub speed: f32,
    /// Contact (and projectile) damage
    pub damage: f32,
    /// Score awarded to the killer before the difficulty multiplier
    pub score: u32,
}

impl EnemyStats {
    pub fn for_kind(kind: EnemyKind) -> Self {
        match kind {
            EnemyKind::Swarmer => Self {
                max_hp: 1.0,
                speed: 45.0,
                damage: 1.0,
                score: 1,
            },
            EnemyKind::Spitter => Self {
                max_hp: 3.0,
                speed: 25.0,
                damage: 2.0,
                score: 3,
            },
            EnemyKind::Charger => Self {
                max_hp: 8.0,
                speed: 35.0,
                damage: 4.0,
                score: 5,
            },
            EnemyKind::BroodMother => Self {
                max_hp: 20.0,
                speed: 15.0,
                damage: 2.0,
                score: 10,
            },
            EnemyKind::Burrower => Self {
                max_hp: 5.0,
                speed: 40.0,
                damage: 3.0,
                score: 4,
            },
        }
    }
}

pub const SPITTER_RANGE: f32 = 150.0;
pub const SPITTER_PROJECTILE_SPEED: f32 = 120.0;
pub const SPITTER_FIRE_INTERVAL_MS: f32 = 2000.0;

pub const CHARGER_TRIGGER_DISTANCE: f32 = 80.0;
pub const CHARGER_CHARGE_SPEED: f32 = 150.0;
pub const CHARGER_TELEGRAPH_MS: f32 = 500.0;
pub const CHARGER_CHARGE_MS: f32 = 600.0;
pub const CHARGER_RECOVER_MS: f32 = 800.0;

pub const BROOD_SPAWN_INTERVAL_MS: f32 = 3000.0;
pub const BROOD_SPAWN_COUNT: usize = 3;

pub const BURROW_TIME_MS: f32 = 2000.0;
pub const BURROW_MIN_DISTANCE: f32 = 150.0;
pub const BURROW_CHANCE_PER_TICK: f32 = 0.01;
/// Resurface within this many units of the target on each axis
pub const BURROW_SURFACE_SPREAD: f32 = 20.0;

/// Charger attack cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChargerPhase {
    Chase,
    /// Winding up; the charge point is captured when this phase starts
    Telegraph { remaining_ms: f32, target: (f32, f32) },
    Charge { remaining_ms: f32, vx: f32, vy: f32 },
    Recover { remaining_ms: f32 },
}

/// Behaviour variant plus its private scratch state
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    Swarmer,
    Spitter { since_shot_ms: f32 },
    Charger { phase: ChargerPhase },
    BroodMother { since_spawn_ms: f32 },
    Burrower { burrow_remaining_ms: f32 },
}

impl Behavior {
    pub fn for_kind(kind: EnemyKind) -> Self {
        match kind {
            EnemyKind::Swarmer => Behavior::Swarmer,
            EnemyKind::Spitter => Behavior::Spitter { since_shot_ms: 0.0 },
            EnemyKind::Charger => Behavior::Charger {
                phase: ChargerPhase::Chase,
            },
            EnemyKind::BroodMother => Behavior::BroodMother {
                since_spawn_ms: 0.0,
            },
            EnemyKind::Burrower => Behavior::Burrower {
                burrow_remaining_ms: 0.0,
            },
        }
    }
}

/// World changes requested by a behaviour step
#[derive(Debug, Clone, PartialEq)]
pub enum AiEffect {
    FireProjectile {
        source: EntityId,
        from: (f32, f32),
        toward: (f32, f32),
        speed: f32,
        damage: f32,
    },
    SpawnSwarmers {
        near: (f32, f32),
        count: usize,
    },
}

/// Live enemy
#[derive(Debug, Clone)]
pub struct Enemy {
    pub id: EntityId,
    pub kind: EnemyKind,
    pub x: f32,
    pub y: f32,
    pub hp: f32,
    pub max_hp: f32,
    pub alive: bool,
    pub burrowed: bool,
    pub behavior: Behavior,
    /// Tick on which the enemy died; the record is kept until a snapshot
    /// carrying the death has gone out
    pub died_at_tick: Option<u64>,
}

impl Enemy {
    pub fn new(id: EntityId, kind: EnemyKind, x: f32, y: f32) -> Self {
        let stats = EnemyStats::for_kind(kind);
        Self {
            id,
            kind,
            x,
            y,
            hp: stats.max_hp,
            max_hp: stats.max_hp,
            alive: true,
            burrowed: false,
            behavior: Behavior::for_kind(kind),
            died_at_tick: None,
        }
    }

    pub fn stats(&self) -> EnemyStats {
        EnemyStats::for_kind(self.kind)
    }

    /// Label sent to clients for animation
    pub fn state_label(&self) -> &'static str {
        match &self.behavior {
            Behavior::Charger { phase } => match phase {
                ChargerPhase::Chase => "chase",
                ChargerPhase::Telegraph { .. } => "telegraph",
                ChargerPhase::Charge { .. } => "charge",
                ChargerPhase::Recover { .. } => "recover",
            },
            Behavior::Burrower { .. } if self.burrowed => "burrowed",
            _ if !self.alive => "dead",
            _ => "chase",
        }
    }

    /// Take `damage`, returns true if this killed the enemy
    pub fn hit(&mut self, damage: f32, tick: u64) -> bool {
        if !self.alive {
            return false;
        }
        let (hp, dead) = CombatSystem::apply_damage(self.hp, damage);
        self.hp = hp;
        if dead {
            self.alive = false;
            self.died_at_tick = Some(tick);
        }
        dead
    }

    /// Run one behaviour step against `target` (the nearest living player)
    pub fn think(
        &mut self,
        target: (f32, f32),
        dt_ms: u64,
        rng: &mut ChaCha8Rng,
    ) -> Option<AiEffect> {
        if !self.alive {
            return None;
        }

        let stats = self.stats();
        let (tx, ty) = target;
        let dist = PhysicsSystem::distance(self.x, self.y, tx, ty);
        let elapsed = dt_ms as f32;

        match &mut self.behavior {
            Behavior::Swarmer => {
                (self.x, self.y) =
                    PhysicsSystem::step_toward(self.x, self.y, tx, ty, stats.speed, dt_ms);
                None
            }

            Behavior::Spitter { since_shot_ms } => {
                if dist > SPITTER_RANGE {
                    (self.x, self.y) =
                        PhysicsSystem::step_toward(self.x, self.y, tx, ty, stats.speed, dt_ms);
                } else if dist < SPITTER_RANGE * 0.5 {
                    let (dx, dy) = PhysicsSystem::direction(self.x, self.y, tx, ty);
                    (self.x, self.y) = PhysicsSystem::integrate(
                        self.x,
                        self.y,
                        -dx * stats.speed * 0.5,
                        -dy * stats.speed * 0.5,
                        dt_ms,
                    );
                }

                *since_shot_ms += elapsed;
                if *since_shot_ms > SPITTER_FIRE_INTERVAL_MS && dist <= SPITTER_RANGE {
                    *since_shot_ms = 0.0;
                    return Some(AiEffect::FireProjectile {
                        source: self.id,
                        from: (self.x, self.y),
                        toward: target,
                        speed: SPITTER_PROJECTILE_SPEED,
                        damage: stats.damage,
                    });
                }
                None
            }

            Behavior::Charger { phase } => {
                *phase = match *phase {
                    ChargerPhase::Chase => {
                        (self.x, self.y) =
                            PhysicsSystem::step_toward(self.x, self.y, tx, ty, stats.speed, dt_ms);
                        if dist < CHARGER_TRIGGER_DISTANCE {
                            ChargerPhase::Telegraph {
                                remaining_ms: CHARGER_TELEGRAPH_MS,
                                target,
                            }
                        } else {
                            ChargerPhase::Chase
                        }
                    }
                    ChargerPhase::Telegraph {
                        remaining_ms,
                        target: (cx, cy),
                    } => {
                        let remaining_ms = remaining_ms - elapsed;
                        if remaining_ms <= 0.0 {
                            let (dx, dy) = PhysicsSystem::direction(self.x, self.y, cx, cy);
                            ChargerPhase::Charge {
                                remaining_ms: CHARGER_CHARGE_MS,
                                vx: dx * CHARGER_CHARGE_SPEED,
                                vy: dy * CHARGER_CHARGE_SPEED,
                            }
                        } else {
                            ChargerPhase::Telegraph {
                                remaining_ms,
                                target: (cx, cy),
                            }
                        }
                    }
                    ChargerPhase::Charge {
                        remaining_ms,
                        vx,
                        vy,
                    } => {
                        (self.x, self.y) = PhysicsSystem::integrate(self.x, self.y, vx, vy, dt_ms);
                        let remaining_ms = remaining_ms - elapsed;
                        if remaining_ms <= 0.0 {
                            ChargerPhase::Recover {
                                remaining_ms: CHARGER_RECOVER_MS,
                            }
                        } else {
                            ChargerPhase::Charge {
                                remaining_ms,
                                vx,
                                vy,
                            }
                        }
                    }
                    ChargerPhase::Recover { remaining_ms } => {
                        let remaining_ms = remaining_ms - elapsed;
                        if remaining_ms <= 0.0 {
                            ChargerPhase::Chase
                        } else {
                            ChargerPhase::Recover { remaining_ms }
                        }
                    }
                };
                None
            }

            Behavior::BroodMother { since_spawn_ms } => {
                (self.x, self.y) =
                    PhysicsSystem::step_toward(self.x, self.y, tx, ty, stats.speed, dt_ms);
                *since_spawn_ms += elapsed;
                if *since_spawn_ms > BROOD_SPAWN_INTERVAL_MS {
                    *since_spawn_ms = 0.0;
                    return Some(AiEffect::SpawnSwarmers {
                        near: (self.x, self.y),
                        count: BROOD_SPAWN_COUNT,
                    });
                }
                None
            }

            Behavior::Burrower {
                burrow_remaining_ms,
            } => {
                if self.burrowed {
                    *burrow_remaining_ms -= elapsed;
                    if *burrow_remaining_ms <= 0.0 {
                        self.burrowed = false;
                        self.x = tx + rng.gen_range(-BURROW_SURFACE_SPREAD..=BURROW_SURFACE_SPREAD);
                        self.y = ty + rng.gen_range(-BURROW_SURFACE_SPREAD..=BURROW_SURFACE_SPREAD);
                    }
                } else {
                    (self.x, self.y) =
                        PhysicsSystem::step_toward(self.x, self.y, tx, ty, stats.speed, dt_ms);
                    if dist > BURROW_MIN_DISTANCE && rng.gen::<f32>() < BURROW_CHANCE_PER_TICK {
                        self.burrowed = true;
                        *burrow_remaining_ms = BURROW_TIME_MS;
                    }
                }
                None
            }
        }
    }
}
