//! Room world state: every entity collection plus the mission record

use std::collections::BTreeMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::ws::protocol::{
    EnemyKind, EntityId, Identity, MissionStatus, ObjectiveKind, TargetPriority,
};

use super::ai::Enemy;
use super::combat::{Bullet, CombatSystem, DamageOutcome, Projectile, IFRAME_TICKS};
use super::content::{self, MissionConfig, ObjectiveConfig};
use super::mission::{MissionState, Nest, Objective};
use super::physics::{MoveInput, PhysicsSystem, WorldBounds};

pub const PLAYER_MAX_HP: f32 = 20.0;

/// Swarmers spawned near a point land this far away
const SWARMER_SPAWN_MIN_DIST: f32 = 20.0;
const SWARMER_SPAWN_MAX_DIST: f32 = 40.0;

/// Player state within a room
#[derive(Debug, Clone)]
pub struct Player {
    pub identity: Identity,
    pub display_name: String,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub hp: f32,
    pub max_hp: f32,
    pub alive: bool,
    /// False after the socket left; the record stays for scoring
    pub connected: bool,
    pub score: u32,
    /// Sample objective being carried
    pub carrying: Option<EntityId>,
    pub target_priority: TargetPriority,
    pub focus_target: Option<EntityId>,
    pub input: MoveInput,
    pub last_input_seq: u32,
    pub last_fire_tick: Option<u64>,
    /// Damage is ignored while `tick < invulnerable_until`
    pub invulnerable_until: u64,
    pub last_aggressor: Option<EntityId>,
    pub kills: u32,
}

impl Player {
    pub fn new(identity: Identity, display_name: String, x: f32, y: f32) -> Self {
        Self {
            identity,
            display_name,
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            hp: PLAYER_MAX_HP,
            max_hp: PLAYER_MAX_HP,
            alive: true,
            connected: true,
            score: 0,
            carrying: None,
            target_priority: TargetPriority::default(),
            focus_target: None,
            input: MoveInput::default(),
            last_input_seq: 0,
            last_fire_tick: None,
            invulnerable_until: 0,
            last_aggressor: None,
            kills: 0,
        }
    }

    /// Apply damage subject to the invulnerability window
    pub fn take_damage(&mut self, damage: f32, source: Option<EntityId>, tick: u64) -> DamageOutcome {
        if !self.alive || tick < self.invulnerable_until {
            return DamageOutcome::Ignored;
        }

        let (hp, dead) = CombatSystem::apply_damage(self.hp, damage);
        self.hp = hp.min(self.max_hp);
        self.invulnerable_until = tick + IFRAME_TICKS;
        if source.is_some() {
            self.last_aggressor = source;
        }

        if dead {
            self.alive = false;
            self.vx = 0.0;
            self.vy = 0.0;
            DamageOutcome::Killed
        } else {
            DamageOutcome::Wounded
        }
    }

    /// Disconnect: dead for every rule, kept for scoring
    pub fn mark_left(&mut self) {
        self.hp = 0.0;
        self.alive = false;
        self.connected = false;
        self.vx = 0.0;
        self.vy = 0.0;
        self.input = MoveInput::default();
    }
}

/// All mutable state of one room
#[derive(Debug, Clone)]
pub struct World {
    pub tick: u64,
    pub bounds: WorldBounds,
    pub players: BTreeMap<Identity, Player>,
    pub enemies: BTreeMap<EntityId, Enemy>,
    pub bullets: BTreeMap<EntityId, Bullet>,
    pub projectiles: BTreeMap<EntityId, Projectile>,
    pub objectives: BTreeMap<EntityId, Objective>,
    pub nests: BTreeMap<EntityId, Nest>,
    pub mission: MissionState,
    /// `None` for survival rooms
    pub config: Option<MissionConfig>,
    next_id: u32,
}

impl World {
    /// Mission-less room
    pub fn survival() -> Self {
        Self {
            tick: 0,
            bounds: content::SURVIVAL_BOUNDS,
            players: BTreeMap::new(),
            enemies: BTreeMap::new(),
            bullets: BTreeMap::new(),
            projectiles: BTreeMap::new(),
            objectives: BTreeMap::new(),
            nests: BTreeMap::new(),
            mission: MissionState::survival(),
            config: None,
            next_id: 1,
        }
    }

    /// Room running `config`, starting in drop-in
    pub fn for_mission(config: MissionConfig) -> Self {
        let mut world = Self {
            bounds: config.bounds,
            mission: MissionState::for_mission(&config),
            ..Self::survival()
        };

        let placements = config
            .primary
            .iter()
            .map(|p| (p, true))
            .chain(config.optional.iter().map(|p| (p, false)));
        for (placement, is_primary) in placements {
            let objective_id = world.alloc_id();
            let mut objective =
                Objective::new(objective_id, placement.kind, placement.x, placement.y, is_primary);

            if placement.kind == ObjectiveKind::DestroyNest {
                let nest_id = world.alloc_id();
                let hp = ObjectiveConfig::for_kind(placement.kind).nest_hp;
                world.nests.insert(
                    nest_id,
                    Nest::new(nest_id, objective_id, placement.x, placement.y, hp),
                );
                objective.nest_id = Some(nest_id);
            }
            world.objectives.insert(objective_id, objective);
        }

        world.config = Some(config);
        world
    }

    pub fn alloc_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    pub fn difficulty(&self) -> u8 {
        self.config.as_ref().map(|c| c.difficulty).unwrap_or(1)
    }

    pub fn spawn_enemy(&mut self, kind: EnemyKind, x: f32, y: f32) -> EntityId {
        let id = self.alloc_id();
        self.enemies.insert(id, Enemy::new(id, kind, x, y));
        id
    }

    /// Swarmer 20-40 units from `(x, y)` in a random direction
    pub fn spawn_swarmer_near(&mut self, x: f32, y: f32, rng: &mut ChaCha8Rng) -> EntityId {
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let dist = rng.gen_range(SWARMER_SPAWN_MIN_DIST..=SWARMER_SPAWN_MAX_DIST);
        self.spawn_enemy(
            EnemyKind::Swarmer,
            x + angle.cos() * dist,
            y + angle.sin() * dist,
        )
    }

    pub fn any_player_alive(&self) -> bool {
        self.players.values().any(|p| p.alive)
    }

    pub fn alive_enemy_count(&self) -> usize {
        self.enemies.values().filter(|e| e.alive).count()
    }

    pub fn scores(&self) -> BTreeMap<Identity, u32> {
        self.players
            .iter()
            .map(|(id, p)| (id.clone(), p.score))
            .collect()
    }

    pub fn is_input_locked(&self) -> bool {
        self.mission.status == MissionStatus::DropIn
    }
}

/// Position of the living player closest to `(x, y)`. Takes the player map
/// alone so callers can hold other collections mutably.
pub fn nearest_alive_player(
    players: &BTreeMap<Identity, Player>,
    x: f32,
    y: f32,
) -> Option<(f32, f32)> {
    players
        .values()
        .filter(|p| p.alive)
        .map(|p| (PhysicsSystem::distance(x, y, p.x, p.y), (p.x, p.y)))
        .fold(None, |best: Option<(f32, (f32, f32))>, cand| match best {
            Some(b) if b.0 <= cand.0 => Some(b),
            _ => Some(cand),
        })
        .map(|(_, pos)| pos)
}

/// Small fixed mission used by room tests
#[cfg(test)]
pub(crate) fn test_mission_config() -> MissionConfig {
    MissionConfig {
        id: "test_mission".into(),
        name: "Test".into(),
        difficulty: 1,
        bounds: WorldBounds::new(500.0, 700.0),
        primary: vec![content::ObjectivePlacement {
            kind: ObjectiveKind::DestroyNest,
            x: 250.0,
            y: 300.0,
        }],
        optional: vec![content::ObjectivePlacement {
            kind: ObjectiveKind::ActivateTerminal,
            x: 100.0,
            y: 500.0,
        }],
        drop_zone: (250.0, 650.0),
        extract_zone: (250.0, 50.0),
        base_alert: 0.015,
        alert_growth: 0.0008,
        extraction_timer_ms: 90_000.0,
        max_enemies: 15,
        spawn_multiplier: 0.8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn mission_world_links_nests_and_objectives() {
        let world = World::for_mission(test_mission_config());
        assert_eq!(world.objectives.len(), 2);
        assert_eq!(world.nests.len(), 1);

        let (nest_id, nest) = world.nests.iter().next().unwrap();
        let objective = &world.objectives[&nest.objective_id];
        assert_eq!(objective.nest_id, Some(*nest_id));
        assert!(objective.is_primary);
        assert_eq!(nest.hp, 15.0);
        assert_eq!(world.mission.status, MissionStatus::DropIn);
    }

    #[test]
    fn iframes_drop_damage_inside_window() {
        let mut p = Player::new(Identity::new("a"), "A".into(), 0.0, 0.0);
        assert_eq!(p.take_damage(4.0, Some(EntityId(9)), 100), DamageOutcome::Wounded);
        assert_eq!(p.take_damage(4.0, None, 105), DamageOutcome::Ignored);
        assert_eq!(p.hp, 16.0);
        assert_eq!(p.take_damage(4.0, None, 110), DamageOutcome::Wounded);
        assert_eq!(p.last_aggressor, Some(EntityId(9)));
    }

    #[test]
    fn lethal_damage_keeps_alive_consistent() {
        let mut p = Player::new(Identity::new("a"), "A".into(), 0.0, 0.0);
        assert_eq!(p.take_damage(50.0, None, 1), DamageOutcome::Killed);
        assert_eq!(p.hp, 0.0);
        assert!(!p.alive);
        assert_eq!(p.take_damage(1.0, None, 100), DamageOutcome::Ignored);
    }

    #[test]
    fn leaving_zeroes_health() {
        let mut p = Player::new(Identity::new("a"), "A".into(), 0.0, 0.0);
        p.mark_left();
        assert_eq!(p.hp, 0.0);
        assert!(!p.alive && !p.connected);
    }

    #[test]
    fn swarmers_spawn_in_ring() {
        let mut world = World::survival();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..20 {
            let id = world.spawn_swarmer_near(100.0, 100.0, &mut rng);
            let e = &world.enemies[&id];
            let d = PhysicsSystem::distance(100.0, 100.0, e.x, e.y);
            assert!((19.9..=40.1).contains(&d));
        }
    }
}
