//! Synchronous room simulation: join, input, leave and the fixed-order tick
//!
//! Nothing here awaits. The room actor in `room.rs` owns one `Simulation`,
//! feeds it commands between ticks and broadcasts what it reports.

use std::collections::{BTreeMap, HashSet};

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::util::time::ticks_for_ms;
use crate::ws::protocol::{
    EnemyKind, Identity, MissionStatus, RoomClientMsg, RoomServerMsg, WorldSnapshot,
};

use super::ai::AiEffect;
use super::combat::{
    Bullet, CombatSystem, DamageOutcome, Projectile, TargetCandidate, BULLET_DAMAGE,
    CONTACT_RADIUS, ENEMY_HIT_RADIUS, NEST_DEFENDER_CHANCE, NEST_HIT_RADIUS, PLAYER_HIT_RADIUS,
};
use super::content::{
    self, difficulty_multiplier, edge_spawn_point, pick_enemy_kind, spawn_weights,
    EXTRACTION_CAP_FACTOR, EXTRACTION_SPAWN_ALERT, SPAWN_CHANCE_FACTOR, SPAWN_MARGIN,
    SURVIVAL_SPAWN_CHANCE, SURVIVAL_SPAWN_MARGIN,
};
use super::mission::{FailReason, MissionEvent, MissionSystem};
use super::physics::{MoveInput, PhysicsSystem, OFFSCREEN_MARGIN, PLAYER_EDGE_INSET};
use super::snapshot::SnapshotBuilder;
use super::world::{nearest_alive_player, Player, World};

/// Delay between a mission result broadcast and room disposal
pub const MISSION_END_GRACE_MS: u64 = 3000;
/// Delay between a survival game over and room disposal
pub const GAMEOVER_GRACE_MS: u64 = 2000;

/// Players spawn within this distance of the drop zone on each axis
const DROP_SCATTER: f32 = 30.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinRejection {
    #[error("Identity is not allowed in this room")]
    NotAllowed,

    #[error("Room is full")]
    RoomFull,

    #[error("Room has already finished")]
    RoomClosed,
}

/// Successful join
#[derive(Debug, Clone, PartialEq)]
pub struct JoinAck {
    pub tick: u64,
    /// True when an existing record was re-attached
    pub rejoined: bool,
}

/// How a room ended
#[derive(Debug, Clone, PartialEq)]
pub enum RoomResult {
    Completed,
    Failed(FailReason),
    Gameover,
    /// No connected player for the empty-room timeout
    Abandoned,
}

impl RoomResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomResult::Completed => "completed",
            RoomResult::Failed(reason) => reason.as_str(),
            RoomResult::Gameover => "gameover",
            RoomResult::Abandoned => "abandoned",
        }
    }
}

/// Messages produced by one tick, in the order they must be broadcast
#[derive(Debug, Default)]
pub struct TickReport {
    pub broadcasts: Vec<RoomServerMsg>,
}

/// Authoritative simulation state for one room
pub struct Simulation {
    room_id: Uuid,
    world: World,
    rng: ChaCha8Rng,
    allow_list: Option<HashSet<Identity>>,
    max_players: usize,
    result: Option<RoomResult>,
    dispose_at_tick: Option<u64>,
    snapshots: SnapshotBuilder,
}

impl Simulation {
    pub fn new(
        room_id: Uuid,
        world: World,
        rng: ChaCha8Rng,
        allow_list: Option<HashSet<Identity>>,
        max_players: usize,
    ) -> Self {
        Self {
            room_id,
            world,
            rng,
            allow_list,
            max_players,
            result: None,
            dispose_at_tick: None,
            snapshots: SnapshotBuilder::new(1),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    #[cfg(test)]
    pub(crate) fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn tick_count(&self) -> u64 {
        self.world.tick
    }

    pub fn result(&self) -> Option<&RoomResult> {
        self.result.as_ref()
    }

    pub fn scores(&self) -> BTreeMap<Identity, u32> {
        self.world.scores()
    }

    pub fn player_count(&self) -> usize {
        self.world.players.len()
    }

    pub fn connected_count(&self) -> usize {
        self.world.players.values().filter(|p| p.connected).count()
    }

    /// Result broadcast and grace period elapsed
    pub fn should_dispose(&self) -> bool {
        self.dispose_at_tick
            .is_some_and(|at| self.world.tick >= at)
    }

    /// Admit a player, or re-attach a returning one
    pub fn on_join(
        &mut self,
        identity: &Identity,
        display_name: &str,
    ) -> Result<JoinAck, JoinRejection> {
        if let Some(allowed) = &self.allow_list {
            if !allowed.contains(identity) {
                return Err(JoinRejection::NotAllowed);
            }
        }

        if let Some(player) = self.world.players.get_mut(identity) {
            player.connected = true;
            info!(room_id = %self.room_id, identity = %identity, "Player re-attached");
            return Ok(JoinAck {
                tick: self.world.tick,
                rejoined: true,
            });
        }

        if self.result.is_some() {
            return Err(JoinRejection::RoomClosed);
        }
        if self.world.players.len() >= self.max_players {
            return Err(JoinRejection::RoomFull);
        }

        let (x, y) = match &self.world.config {
            Some(config) => {
                let (dx, dy) = config.drop_zone;
                (
                    dx + self.rng.gen_range(-DROP_SCATTER..=DROP_SCATTER),
                    dy + self.rng.gen_range(-DROP_SCATTER..=DROP_SCATTER),
                )
            }
            None => (self.world.bounds.width / 2.0, self.world.bounds.height - 50.0),
        };
        let (x, y) = self.world.bounds.clamp(x, y, PLAYER_EDGE_INSET);

        let name = if display_name.trim().is_empty() {
            identity.short()
        } else {
            display_name.trim().to_string()
        };
        self.world
            .players
            .insert(identity.clone(), Player::new(identity.clone(), name, x, y));
        self.world
            .mission
            .extraction_progress
            .insert(identity.clone(), 0.0);

        info!(
            room_id = %self.room_id,
            identity = %identity,
            players = self.world.players.len(),
            "Player joined room"
        );
        Ok(JoinAck {
            tick: self.world.tick,
            rejoined: false,
        })
    }

    /// Validate and store one client frame. Returns a direct reply for the
    /// sender when the frame asks for one.
    pub fn on_input(&mut self, identity: &Identity, msg: RoomClientMsg) -> Option<RoomServerMsg> {
        let locked = self.world.is_input_locked();
        let Some(player) = self.world.players.get_mut(identity) else {
            debug!(room_id = %self.room_id, identity = %identity, "Dropping input from non-member");
            return None;
        };

        match msg {
            RoomClientMsg::Input {
                up,
                down,
                left,
                right,
                seq,
            } => {
                if !player.alive || locked || seq <= player.last_input_seq {
                    return None;
                }
                player.last_input_seq = seq;
                player.input = MoveInput {
                    up,
                    down,
                    left,
                    right,
                };
                None
            }
            RoomClientMsg::SetTargetPriority { priority } => {
                player.target_priority = priority;
                None
            }
            RoomClientMsg::SetFocusTarget { target_id } => {
                player.focus_target = target_id;
                None
            }
            RoomClientMsg::Ping { t } => Some(RoomServerMsg::Pong { t }),
        }
    }

    /// Disconnect: the record stays, marked dead
    pub fn on_leave(&mut self, identity: &Identity) {
        if let Some(player) = self.world.players.get_mut(identity) {
            player.mark_left();
            info!(room_id = %self.room_id, identity = %identity, "Player left room");
        }
    }

    /// Advance exactly one step
    pub fn tick(&mut self, dt_ms: u64) -> TickReport {
        self.world.tick += 1;
        let mut report = TickReport::default();

        if self.result.is_some() {
            return report;
        }

        self.move_players(dt_ms);
        self.auto_fire();
        self.spawn_enemies();
        self.update_enemies(dt_ms);

        let mut events = self.update_bullets(dt_ms);
        self.update_projectiles(dt_ms);
        events.extend(MissionSystem::update(&mut self.world, dt_ms));
        self.check_end_conditions(&mut events);

        for event in events {
            report.broadcasts.push(self.announce(event));
        }
        if let Some(msg) = self.gameover_message() {
            report.broadcasts.push(msg);
        }
        report
    }

    /// Snapshot of the current tick. Dead enemies included in it are dropped
    /// from state afterwards, so every death reaches clients once.
    pub fn snapshot(&mut self) -> Option<WorldSnapshot> {
        if !self.snapshots.should_send() {
            return None;
        }
        let snapshot = self.snapshots.build(&self.world);
        let tick = self.world.tick;
        self.world
            .enemies
            .retain(|_, e| e.died_at_tick.map_or(true, |died| died > tick));
        Some(snapshot)
    }

    // ------------------------------------------------------------------
    // Tick steps
    // ------------------------------------------------------------------

    fn move_players(&mut self, dt_ms: u64) {
        let bounds = self.world.bounds;
        let locked = self.world.is_input_locked();
        for player in self.world.players.values_mut() {
            if !player.alive || locked {
                player.vx = 0.0;
                player.vy = 0.0;
                continue;
            }
            let (vx, vy) = PhysicsSystem::input_velocity(player.input, player.carrying.is_some());
            player.vx = vx;
            player.vy = vy;
            let (x, y) = PhysicsSystem::integrate(player.x, player.y, vx, vy, dt_ms);
            (player.x, player.y) = bounds.clamp(x, y, PLAYER_EDGE_INSET);
        }
    }

    fn auto_fire(&mut self) {
        let tick = self.world.tick;
        let candidates: Vec<TargetCandidate> = self
            .world
            .enemies
            .values()
            .filter(|e| e.alive && !e.burrowed)
            .map(|e| TargetCandidate {
                id: e.id,
                kind: e.kind,
                x: e.x,
                y: e.y,
                hp: e.hp,
            })
            .collect();

        // focus on an enemy that can no longer be targeted is dropped
        for player in self.world.players.values_mut() {
            if let Some(id) = player.focus_target {
                if !candidates.iter().any(|c| c.id == id) {
                    player.focus_target = None;
                }
            }
        }
        if candidates.is_empty() {
            return;
        }

        let mut shots = Vec::new();
        for player in self.world.players.values_mut() {
            if !player.alive || !CombatSystem::can_fire(player.last_fire_tick, tick) {
                continue;
            }

            let focused = player
                .focus_target
                .and_then(|id| candidates.iter().find(|c| c.id == id));

            let target = focused.copied().or_else(|| {
                CombatSystem::select_target(
                    player.x,
                    player.y,
                    player.target_priority,
                    player.last_aggressor,
                    &candidates,
                )
                .and_then(|id| candidates.iter().find(|c| c.id == id).copied())
            });

            if let Some(target) = target {
                player.last_fire_tick = Some(tick);
                shots.push((player.identity.clone(), player.x, player.y, target.x, target.y));
            }
        }

        for (owner, x, y, tx, ty) in shots {
            let id = self.world.alloc_id();
            self.world
                .bullets
                .insert(id, Bullet::aimed(id, owner, x, y, tx, ty));
        }
    }

    fn spawn_enemies(&mut self) {
        let Some((spawn_multiplier, max_enemies, difficulty)) = self
            .world
            .config
            .as_ref()
            .map(|c| (c.spawn_multiplier, c.max_enemies, c.difficulty))
        else {
            if self.rng.gen::<f32>() < SURVIVAL_SPAWN_CHANCE {
                let (x, y) =
                    edge_spawn_point(self.world.bounds, SURVIVAL_SPAWN_MARGIN, &mut self.rng);
                self.world.spawn_enemy(EnemyKind::Swarmer, x, y);
            }
            return;
        };

        let mission = &self.world.mission;
        if !matches!(mission.status, MissionStatus::Active | MissionStatus::Extraction) {
            return;
        }

        let chance = mission.alert_level * SPAWN_CHANCE_FACTOR * spawn_multiplier;
        if self.rng.gen::<f32>() >= chance {
            return;
        }

        let cap = if mission.extraction_open {
            (max_enemies as f32 * EXTRACTION_CAP_FACTOR).floor() as usize
        } else {
            max_enemies
        };
        if self.world.alive_enemy_count() >= cap {
            return;
        }

        if self.world.mission.extraction_open {
            self.world.mission.raise_alert(EXTRACTION_SPAWN_ALERT);
        }
        let weights = spawn_weights(self.world.mission.alert_level, difficulty);
        let kind = pick_enemy_kind(&weights, &mut self.rng);
        let (x, y) = edge_spawn_point(self.world.bounds, SPAWN_MARGIN, &mut self.rng);
        self.world.spawn_enemy(kind, x, y);
    }

    fn update_enemies(&mut self, dt_ms: u64) {
        if !self.world.any_player_alive() {
            return;
        }

        let tick = self.world.tick;
        let world = &mut self.world;
        let mut effects = Vec::new();

        for enemy in world.enemies.values_mut() {
            if !enemy.alive {
                continue;
            }
            let Some(target) = nearest_alive_player(&world.players, enemy.x, enemy.y) else {
                break;
            };
            if let Some(effect) = enemy.think(target, dt_ms, &mut self.rng) {
                effects.push(effect);
            }

            if enemy.burrowed {
                continue;
            }
            let damage = enemy.stats().damage;
            for player in world.players.values_mut() {
                if player.alive
                    && PhysicsSystem::within(enemy.x, enemy.y, player.x, player.y, CONTACT_RADIUS)
                {
                    let outcome = player.take_damage(damage, Some(enemy.id), tick);
                    if outcome == DamageOutcome::Killed {
                        info!(room_id = %self.room_id, identity = %player.identity, "Player killed");
                    }
                }
            }
        }

        for effect in effects {
            match effect {
                AiEffect::FireProjectile {
                    source,
                    from,
                    toward,
                    speed,
                    damage,
                } => {
                    let id = self.world.alloc_id();
                    self.world.projectiles.insert(
                        id,
                        Projectile::aimed(id, Some(source), from, toward, speed, damage),
                    );
                }
                AiEffect::SpawnSwarmers { near, count } => {
                    for _ in 0..count {
                        self.world.spawn_swarmer_near(near.0, near.1, &mut self.rng);
                    }
                }
            }
        }
    }

    fn update_bullets(&mut self, dt_ms: u64) -> Vec<MissionEvent> {
        let tick = self.world.tick;
        let bounds = self.world.bounds;
        let score_mult = difficulty_multiplier(self.world.difficulty());
        let mut events = Vec::new();
        let mut spent = Vec::new();
        let mut defenders = Vec::new();
        let mut destroyed = Vec::new();

        let world = &mut self.world;
        for bullet in world.bullets.values_mut() {
            if !bullet.advance(dt_ms) || bounds.is_outside(bullet.x, bullet.y, OFFSCREEN_MARGIN) {
                spent.push(bullet.id);
                continue;
            }

            let victim = world.enemies.values_mut().find(|e| {
                e.alive
                    && !e.burrowed
                    && PhysicsSystem::within(bullet.x, bullet.y, e.x, e.y, ENEMY_HIT_RADIUS)
            });
            if let Some(enemy) = victim {
                spent.push(bullet.id);
                if enemy.hit(BULLET_DAMAGE, tick) {
                    let points = (enemy.stats().score as f32 * score_mult).floor() as u32;
                    if let Some(owner) = world.players.get_mut(&bullet.owner) {
                        owner.score += points;
                        owner.kills += 1;
                    }
                }
                continue;
            }

            let nest = world.nests.values_mut().find(|n| {
                n.alive && PhysicsSystem::within(bullet.x, bullet.y, n.x, n.y, NEST_HIT_RADIUS)
            });
            if let Some(nest) = nest {
                spent.push(bullet.id);
                let (hp, dead) = CombatSystem::apply_damage(nest.hp, BULLET_DAMAGE);
                nest.hp = hp;
                if self.rng.gen::<f32>() < NEST_DEFENDER_CHANCE {
                    defenders.push((nest.x, nest.y));
                }
                if dead {
                    nest.alive = false;
                    destroyed.push((nest.objective_id, bullet.owner.clone()));
                }
            }
        }

        for id in spent {
            world.bullets.remove(&id);
        }
        for (x, y) in defenders {
            world.spawn_swarmer_near(x, y, &mut self.rng);
        }
        for (objective_id, owner) in destroyed {
            info!(room_id = %self.room_id, objective_id = %objective_id, "Nest destroyed");
            events.extend(MissionSystem::complete_objective(world, objective_id, &[owner]));
        }
        events
    }

    fn update_projectiles(&mut self, dt_ms: u64) {
        let tick = self.world.tick;
        let bounds = self.world.bounds;
        let mut spent = Vec::new();

        let world = &mut self.world;
        for projectile in world.projectiles.values_mut() {
            if !projectile.advance(dt_ms)
                || bounds.is_outside(projectile.x, projectile.y, OFFSCREEN_MARGIN)
            {
                spent.push(projectile.id);
                continue;
            }

            let victim = world.players.values_mut().find(|p| {
                p.alive
                    && PhysicsSystem::within(projectile.x, projectile.y, p.x, p.y, PLAYER_HIT_RADIUS)
            });
            if let Some(player) = victim {
                player.take_damage(projectile.damage, projectile.source, tick);
                spent.push(projectile.id);
            }
        }

        for id in spent {
            world.projectiles.remove(&id);
        }
    }

    fn check_end_conditions(&mut self, events: &mut Vec<MissionEvent>) {
        if self.result.is_some() {
            return;
        }

        let everyone_dead = !self.world.players.is_empty() && !self.world.any_player_alive();
        if everyone_dead {
            if self.world.config.is_some() {
                events.extend(MissionSystem::fail(&mut self.world, FailReason::AllDead));
            } else {
                self.finish(RoomResult::Gameover, GAMEOVER_GRACE_MS);
                return;
            }
        }

        let terminal = events.iter().find_map(|e| match e {
            MissionEvent::Completed => Some(RoomResult::Completed),
            MissionEvent::Failed(reason) => Some(RoomResult::Failed(*reason)),
            MissionEvent::ExtractionOpened { .. } => None,
        });
        if let Some(result) = terminal {
            self.finish(result, MISSION_END_GRACE_MS);
        }
    }

    fn finish(&mut self, result: RoomResult, grace_ms: u64) {
        info!(room_id = %self.room_id, result = result.as_str(), tick = self.world.tick, "Room finished");
        self.dispose_at_tick = Some(self.world.tick + ticks_for_ms(grace_ms));
        self.result = Some(result);
        self.snapshots.force_next();
    }

    /// End a room nobody is connected to
    pub fn abandon(&mut self) {
        if self.result.is_none() {
            self.result = Some(RoomResult::Abandoned);
            self.dispose_at_tick = Some(self.world.tick);
        }
    }

    /// Turn a mission event (or a game over) into its broadcast message
    fn announce(&self, event: MissionEvent) -> RoomServerMsg {
        match event {
            MissionEvent::ExtractionOpened { timer_ms } => RoomServerMsg::ExtractionOpen {
                timer_ms: timer_ms.max(0.0) as u64,
            },
            MissionEvent::Completed => RoomServerMsg::MissionComplete {
                scores: self.world.scores(),
                mission_id: self.world.mission.mission_id.clone(),
                objectives: MissionSystem::objective_results(&self.world),
            },
            MissionEvent::Failed(reason) => RoomServerMsg::MissionFailed {
                reason: reason.as_str().to_string(),
                scores: self.world.scores(),
            },
        }
    }

    /// Game over message for survival rooms, once finished
    fn gameover_message(&self) -> Option<RoomServerMsg> {
        matches!(self.result, Some(RoomResult::Gameover)).then(|| RoomServerMsg::Gameover {
            scores: self.world.scores(),
            tick: self.world.tick,
        })
    }
}

/// Build the world for a room: a procedural mission or survival
pub fn build_world(
    difficulty: Option<u8>,
    rng: &mut ChaCha8Rng,
) -> Result<World, content::ContentError> {
    match difficulty {
        Some(level) => Ok(World::for_mission(content::MissionConfig::generate(level, rng)?)),
        None => Ok(World::survival()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ai::Enemy;
    use crate::game::combat::Bullet;
    use crate::game::world::test_mission_config;
    use crate::ws::protocol::{EntityId, ObjectiveStatus, TargetPriority};
    use rand::SeedableRng;

    fn mission_sim(allow: Option<&[&str]>) -> Simulation {
        let allow_list =
            allow.map(|ids| ids.iter().map(|id| Identity::new(*id)).collect::<HashSet<_>>());
        Simulation::new(
            Uuid::new_v4(),
            World::for_mission(test_mission_config()),
            ChaCha8Rng::seed_from_u64(11),
            allow_list,
            3,
        )
    }

    fn activate(sim: &mut Simulation) {
        sim.world_mut().mission.status = MissionStatus::Active;
        sim.world_mut().mission.drop_in_remaining_ms = 0.0;
        // no random spawns in deterministic scenarios
        sim.world_mut().mission.alert_level = 0.0;
        if let Some(config) = sim.world_mut().config.as_mut() {
            config.alert_growth = 0.0;
        }
    }

    fn place(sim: &mut Simulation, who: &Identity, x: f32, y: f32) {
        let p = sim.world_mut().players.get_mut(who).unwrap();
        p.x = x;
        p.y = y;
    }

    #[test]
    fn allow_list_rejects_strangers() {
        let mut sim = mission_sim(Some(&["a", "b"]));
        assert!(sim.on_join(&Identity::new("A"), "").is_ok());
        assert_eq!(
            sim.on_join(&Identity::new("mallory"), ""),
            Err(JoinRejection::NotAllowed)
        );
        assert_eq!(sim.player_count(), 1);
    }

    #[test]
    fn room_capacity_and_rejoin() {
        let mut sim = mission_sim(None);
        for name in ["a", "b", "c"] {
            assert!(sim.on_join(&Identity::new(name), name).is_ok());
        }
        assert_eq!(sim.on_join(&Identity::new("d"), ""), Err(JoinRejection::RoomFull));

        let a = Identity::new("a");
        sim.on_leave(&a);
        assert_eq!(sim.connected_count(), 2);
        let ack = sim.on_join(&a, "a").unwrap();
        assert!(ack.rejoined);
        // re-attaching does not revive
        assert!(!sim.world().players[&a].alive);
        assert_eq!(sim.world().players[&a].hp, 0.0);
    }

    #[test]
    fn input_is_locked_during_drop_in() {
        let mut sim = mission_sim(None);
        let a = Identity::new("a");
        sim.on_join(&a, "").unwrap();
        let start = (sim.world().players[&a].x, sim.world().players[&a].y);

        let input = RoomClientMsg::Input {
            up: true,
            down: false,
            left: false,
            right: false,
            seq: 1,
        };
        sim.on_input(&a, input.clone());
        sim.tick(50);
        assert_eq!((sim.world().players[&a].x, sim.world().players[&a].y), start);
        assert_eq!(sim.world().players[&a].last_input_seq, 0);

        for _ in 0..30 {
            sim.tick(50);
        }
        assert_eq!(sim.world().mission.status, MissionStatus::Active);
        sim.on_input(&a, input);
        sim.tick(50);
        assert!(sim.world().players[&a].y < start.1);
    }

    #[test]
    fn stale_and_foreign_input_is_dropped() {
        let mut sim = mission_sim(None);
        activate(&mut sim);
        let a = Identity::new("a");
        sim.on_join(&a, "").unwrap();

        let frame = |seq, right| RoomClientMsg::Input {
            up: false,
            down: false,
            left: false,
            right,
            seq,
        };
        sim.on_input(&a, frame(5, true));
        sim.on_input(&a, frame(5, false));
        sim.on_input(&a, frame(3, false));
        assert_eq!(sim.world().players[&a].last_input_seq, 5);
        assert!(sim.world().players[&a].input.right);

        assert!(sim.on_input(&Identity::new("ghost"), frame(9, true)).is_none());
        assert_eq!(sim.player_count(), 1);
    }

    #[test]
    fn ping_gets_pong() {
        let mut sim = mission_sim(None);
        let a = Identity::new("a");
        sim.on_join(&a, "").unwrap();
        match sim.on_input(&a, RoomClientMsg::Ping { t: 42 }) {
            Some(RoomServerMsg::Pong { t }) => assert_eq!(t, 42),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn bullet_ttl_counts_down_per_tick() {
        let mut sim = mission_sim(None);
        activate(&mut sim);
        let owner = Identity::new("a");
        let world = sim.world_mut();
        let mut one = Bullet::aimed(EntityId(900), owner.clone(), 10.0, 10.0, 20.0, 10.0);
        one.ttl = 1;
        let mut two = Bullet::aimed(EntityId(901), owner, 10.0, 600.0, 20.0, 600.0);
        two.ttl = 2;
        world.bullets.insert(one.id, one);
        world.bullets.insert(two.id, two);

        sim.tick(50);
        assert!(!sim.world().bullets.contains_key(&EntityId(900)));
        assert_eq!(sim.world().bullets[&EntityId(901)].ttl, 1);
    }

    #[test]
    fn burrowed_enemies_are_never_hit_or_targeted() {
        let mut sim = mission_sim(None);
        activate(&mut sim);
        let a = Identity::new("a");
        sim.on_join(&a, "").unwrap();
        place(&mut sim, &a, 100.0, 650.0);

        let world = sim.world_mut();
        let id = world.alloc_id();
        let mut burrower = Enemy::new(id, EnemyKind::Burrower, 160.0, 650.0);
        burrower.burrowed = true;
        burrower.behavior = crate::game::ai::Behavior::Burrower {
            burrow_remaining_ms: 100_000.0,
        };
        world.enemies.insert(id, burrower);
        world.bullets.insert(
            EntityId(950),
            Bullet::aimed(EntityId(950), a.clone(), 150.0, 650.0, 170.0, 650.0),
        );

        for _ in 0..20 {
            sim.tick(50);
            let e = &sim.world().enemies[&id];
            assert!(e.burrowed);
            assert_eq!(e.hp, e.max_hp);
        }
        // auto-fire never spent a shot on it
        assert_eq!(sim.world().players[&a].last_fire_tick, None);
    }

    #[test]
    fn invalid_focus_is_cleared_and_priority_applies() {
        let mut sim = mission_sim(None);
        activate(&mut sim);
        let a = Identity::new("a");
        sim.on_join(&a, "").unwrap();
        place(&mut sim, &a, 100.0, 650.0);
        sim.on_input(
            &a,
            RoomClientMsg::SetTargetPriority {
                priority: TargetPriority::LowestHp,
            },
        );
        sim.on_input(
            &a,
            RoomClientMsg::SetFocusTarget {
                target_id: Some(EntityId(4242)),
            },
        );

        let world = sim.world_mut();
        world.spawn_enemy(EnemyKind::BroodMother, 140.0, 650.0);
        sim.tick(50);

        let p = &sim.world().players[&a];
        assert_eq!(p.focus_target, None);
        assert_eq!(p.target_priority, TargetPriority::LowestHp);
        assert_eq!(p.last_fire_tick, Some(sim.tick_count()));
        assert_eq!(sim.world().bullets.len(), 1);
    }

    #[test]
    fn focus_on_dead_enemy_clears_with_no_other_targets() {
        let mut sim = mission_sim(None);
        activate(&mut sim);
        let a = Identity::new("a");
        sim.on_join(&a, "").unwrap();
        place(&mut sim, &a, 100.0, 650.0);

        let target = sim.world_mut().spawn_enemy(EnemyKind::Swarmer, 900.0, 650.0);
        sim.on_input(
            &a,
            RoomClientMsg::SetFocusTarget {
                target_id: Some(target),
            },
        );
        sim.world_mut().enemies.get_mut(&target).unwrap().alive = false;
        sim.tick(50);

        let p = &sim.world().players[&a];
        assert_eq!(p.focus_target, None);
        assert_eq!(p.last_fire_tick, None);
        assert!(sim.world().bullets.is_empty());
    }

    #[test]
    fn health_invariant_holds_under_pressure() {
        let mut sim = mission_sim(None);
        activate(&mut sim);
        for name in ["a", "b", "c"] {
            sim.on_join(&Identity::new(name), "").unwrap();
        }
        for i in 0..12 {
            let kind = EnemyKind::ALL[i % EnemyKind::ALL.len()];
            let (x, y) = (200.0 + i as f32 * 5.0, 600.0);
            sim.world_mut().spawn_enemy(kind, x, y);
        }

        for _ in 0..600 {
            sim.tick(50);
            sim.snapshot();
            for p in sim.world().players.values() {
                assert!(p.hp >= 0.0 && p.hp <= p.max_hp);
                assert_eq!(p.alive, p.hp > 0.0);
            }
            if sim.should_dispose() {
                break;
            }
        }
    }

    #[test]
    fn nest_kill_opens_extraction_on_the_same_tick() {
        let mut sim = mission_sim(None);
        activate(&mut sim);
        let a = Identity::new("a");
        sim.on_join(&a, "").unwrap();
        place(&mut sim, &a, 450.0, 650.0);

        let (nest_id, nest_x, nest_y) = {
            let (id, n) = sim.world().nests.iter().next().unwrap();
            (*id, n.x, n.y)
        };
        let world = sim.world_mut();
        world.nests.get_mut(&nest_id).unwrap().hp = 1.0;
        world.bullets.insert(
            EntityId(990),
            Bullet::aimed(EntityId(990), a.clone(), nest_x - 5.0, nest_y, nest_x, nest_y),
        );

        let report = sim.tick(50);
        assert!(matches!(
            report.broadcasts.as_slice(),
            [RoomServerMsg::ExtractionOpen { .. }]
        ));
        assert!(sim.world().mission.extraction_open);
        assert_eq!(sim.world().mission.status, MissionStatus::Extraction);
        assert_eq!(sim.world().players[&a].score, 50);

        let report = sim.tick(50);
        assert!(report
            .broadcasts
            .iter()
            .all(|m| !matches!(m, RoomServerMsg::ExtractionOpen { .. })));
    }

    #[test]
    fn dead_enemies_survive_until_snapshotted() {
        let mut sim = mission_sim(None);
        activate(&mut sim);
        let a = Identity::new("a");
        sim.on_join(&a, "").unwrap();
        place(&mut sim, &a, 450.0, 650.0);

        let world = sim.world_mut();
        let id = world.spawn_enemy(EnemyKind::Swarmer, 100.0, 100.0);
        world.enemies.get_mut(&id).unwrap().hit(5.0, 0);

        sim.tick(50);
        assert!(sim.world().enemies.contains_key(&id));
        let snap = sim.snapshot().unwrap();
        assert!(!snap.enemies[&id].alive);
        assert!(!sim.world().enemies.contains_key(&id));
    }

    #[test]
    fn everyone_leaving_fails_the_mission_then_disposes() {
        let mut sim = mission_sim(None);
        activate(&mut sim);
        let a = Identity::new("a");
        let b = Identity::new("b");
        sim.on_join(&a, "").unwrap();
        sim.on_join(&b, "").unwrap();
        sim.on_leave(&a);
        sim.on_leave(&b);

        let report = sim.tick(50);
        match report.broadcasts.as_slice() {
            [RoomServerMsg::MissionFailed { reason, scores }] => {
                assert_eq!(reason, "all_dead");
                assert_eq!(scores.len(), 2);
            }
            other => panic!("unexpected broadcasts {other:?}"),
        }
        assert_eq!(sim.result(), Some(&RoomResult::Failed(FailReason::AllDead)));
        assert!(sim
            .world()
            .objectives
            .values()
            .all(|o| o.status == ObjectiveStatus::Failed));

        let grace = ticks_for_ms(MISSION_END_GRACE_MS);
        for _ in 1..grace {
            assert!(sim.tick(50).broadcasts.is_empty());
            assert!(!sim.should_dispose());
        }
        sim.tick(50);
        assert!(sim.should_dispose());
    }

    #[test]
    fn survival_room_ends_with_gameover() {
        let mut sim = Simulation::new(
            Uuid::new_v4(),
            World::survival(),
            ChaCha8Rng::seed_from_u64(5),
            None,
            4,
        );
        let a = Identity::new("solo");
        sim.on_join(&a, "").unwrap();
        assert_eq!(sim.world().mission.status, MissionStatus::Active);
        sim.on_leave(&a);

        let report = sim.tick(50);
        assert!(matches!(
            report.broadcasts.as_slice(),
            [RoomServerMsg::Gameover { tick: 1, .. }]
        ));
        assert_eq!(sim.result(), Some(&RoomResult::Gameover));
    }

    #[test]
    fn build_world_picks_mode() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(build_world(None, &mut rng).unwrap().config.is_none());
        assert!(build_world(Some(2), &mut rng).unwrap().config.is_some());
        assert!(build_world(Some(9), &mut rng).is_err());
    }
}
