//! Mission and objective state machine
//!
//! BRIEFING -> DROP_IN -> ACTIVE -> EXTRACTION -> COMPLETED | FAILED.
//! Objective status only ever moves forward.

use std::collections::BTreeMap;

use tracing::info;

use crate::ws::protocol::{
    EntityId, Identity, MissionStatus, ObjectiveKind, ObjectiveResult, ObjectiveStatus,
};

use super::content::{
    MissionConfig, ObjectiveConfig, DROP_IN_MS, EXTRACTION_ALERT_BUMP, EXTRACT_HOLD_MS,
    EXTRACT_RADIUS, EXTRACT_REWARD, MAX_ALERT, OPTIONAL_BONUS,
};
use super::physics::PhysicsSystem;
use super::world::World;

/// Mission objective
#[derive(Debug, Clone)]
pub struct Objective {
    pub id: EntityId,
    pub kind: ObjectiveKind,
    pub x: f32,
    pub y: f32,
    pub status: ObjectiveStatus,
    /// Hold time accumulated in milliseconds
    pub progress_ms: f32,
    pub is_primary: bool,
    pub nest_id: Option<EntityId>,
    /// Player currently holding a sample
    pub carrier: Option<Identity>,
}

impl Objective {
    pub fn new(id: EntityId, kind: ObjectiveKind, x: f32, y: f32, is_primary: bool) -> Self {
        Self {
            id,
            kind,
            x,
            y,
            status: ObjectiveStatus::Pending,
            progress_ms: 0.0,
            is_primary,
            nest_id: None,
            carrier: None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            ObjectiveStatus::Pending | ObjectiveStatus::InProgress
        )
    }

    /// Move to `next` if that is a forward step. Returns whether it changed.
    pub fn advance(&mut self, next: ObjectiveStatus) -> bool {
        if self.is_open() && next > self.status {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Progress in `[0, 1]` reported to clients
    pub fn progress_fraction(&self) -> f32 {
        let hold = ObjectiveConfig::for_kind(self.kind).hold_ms;
        match self.status {
            ObjectiveStatus::Completed => 1.0,
            _ if hold > 0.0 => (self.progress_ms / hold).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

/// Destructible nest backing a DESTROY_NEST objective
#[derive(Debug, Clone)]
pub struct Nest {
    pub id: EntityId,
    pub objective_id: EntityId,
    pub x: f32,
    pub y: f32,
    pub hp: f32,
    pub alive: bool,
}

impl Nest {
    pub fn new(id: EntityId, objective_id: EntityId, x: f32, y: f32, hp: f32) -> Self {
        Self {
            id,
            objective_id,
            x,
            y,
            hp,
            alive: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    AllDead,
    ExtractionTimeout,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::AllDead => "all_dead",
            FailReason::ExtractionTimeout => "extraction_timeout",
        }
    }
}

/// State transitions the room must announce
#[derive(Debug, Clone, PartialEq)]
pub enum MissionEvent {
    ExtractionOpened { timer_ms: f32 },
    Completed,
    Failed(FailReason),
}

#[derive(Debug, Clone)]
pub struct MissionState {
    pub mission_id: String,
    pub status: MissionStatus,
    pub alert_level: f32,
    pub extraction_open: bool,
    pub extraction_timer_ms: f32,
    pub extract_zone: (f32, f32),
    pub drop_in_remaining_ms: f32,
    /// Per-player dwell inside the extraction zone
    pub extraction_progress: BTreeMap<Identity, f32>,
}

impl MissionState {
    /// Rooms without a mission are live from the first tick
    pub fn survival() -> Self {
        Self {
            mission_id: String::new(),
            status: MissionStatus::Active,
            alert_level: 0.0,
            extraction_open: false,
            extraction_timer_ms: 0.0,
            extract_zone: (0.0, 0.0),
            drop_in_remaining_ms: 0.0,
            extraction_progress: BTreeMap::new(),
        }
    }

    pub fn for_mission(config: &MissionConfig) -> Self {
        Self {
            mission_id: config.id.clone(),
            status: MissionStatus::DropIn,
            alert_level: config.base_alert,
            extraction_open: false,
            extraction_timer_ms: config.extraction_timer_ms,
            extract_zone: config.extract_zone,
            drop_in_remaining_ms: DROP_IN_MS,
            extraction_progress: BTreeMap::new(),
        }
    }

    pub fn raise_alert(&mut self, amount: f32) {
        self.alert_level = (self.alert_level + amount).min(MAX_ALERT);
    }
}

/// Mission rules applied once per tick
pub struct MissionSystem;

impl MissionSystem {
    /// Mission step of the tick: drop-in timer, alert growth, objectives and
    /// extraction
    pub fn update(world: &mut World, dt_ms: u64) -> Vec<MissionEvent> {
        let mut events = Vec::new();
        let Some(growth) = world.config.as_ref().map(|c| c.alert_growth) else {
            return events;
        };
        let dt = dt_ms as f32;

        match world.mission.status {
            MissionStatus::Briefing => {
                world.mission.status = MissionStatus::DropIn;
                return events;
            }
            MissionStatus::DropIn => {
                world.mission.drop_in_remaining_ms -= dt;
                if world.mission.drop_in_remaining_ms <= 0.0 {
                    world.mission.drop_in_remaining_ms = 0.0;
                    world.mission.status = MissionStatus::Active;
                    info!(mission_id = %world.mission.mission_id, "Mission active");
                }
                return events;
            }
            MissionStatus::Active => world.mission.raise_alert(growth),
            MissionStatus::Extraction => {}
            MissionStatus::Completed | MissionStatus::Failed => return events,
        }

        Self::update_terminals(world, dt, &mut events);
        Self::update_samples(world, &mut events);

        if world.mission.extraction_open {
            if let Some(event) = Self::update_extraction(world, dt) {
                events.push(event);
            }
        }

        events
    }

    /// Mark an objective completed and pay its reward to `credited`.
    /// Opens extraction when this was the last primary.
    pub fn complete_objective(
        world: &mut World,
        objective_id: EntityId,
        credited: &[Identity],
    ) -> Vec<MissionEvent> {
        let Some(objective) = world.objectives.get_mut(&objective_id) else {
            return Vec::new();
        };
        if !objective.advance(ObjectiveStatus::Completed) {
            return Vec::new();
        }
        objective.carrier = None;

        let reward = ObjectiveConfig::for_kind(objective.kind).reward;
        info!(
            objective_id = %objective_id,
            kind = ?objective.kind,
            primary = objective.is_primary,
            "Objective completed"
        );

        for identity in credited {
            if let Some(player) = world.players.get_mut(identity) {
                player.score += reward;
            }
        }

        Self::open_extraction_if_ready(world).into_iter().collect()
    }

    /// Open extraction exactly once, when every primary is completed
    pub fn open_extraction_if_ready(world: &mut World) -> Option<MissionEvent> {
        if world.mission.extraction_open || world.mission.status.is_terminal() {
            return None;
        }
        let all_done = world
            .objectives
            .values()
            .filter(|o| o.is_primary)
            .all(|o| o.status == ObjectiveStatus::Completed);
        if !all_done {
            return None;
        }

        let mission = &mut world.mission;
        mission.extraction_open = true;
        mission.status = MissionStatus::Extraction;
        mission.raise_alert(EXTRACTION_ALERT_BUMP);
        info!(
            mission_id = %mission.mission_id,
            timer_ms = mission.extraction_timer_ms,
            "Extraction open"
        );
        Some(MissionEvent::ExtractionOpened {
            timer_ms: mission.extraction_timer_ms,
        })
    }

    /// Fail the mission unless it already ended
    pub fn fail(world: &mut World, reason: FailReason) -> Option<MissionEvent> {
        if world.config.is_none() || world.mission.status.is_terminal() {
            return None;
        }
        world.mission.status = MissionStatus::Failed;
        for objective in world.objectives.values_mut() {
            objective.advance(ObjectiveStatus::Failed);
        }
        info!(mission_id = %world.mission.mission_id, reason = reason.as_str(), "Mission failed");
        Some(MissionEvent::Failed(reason))
    }

    pub fn objective_results(world: &World) -> Vec<ObjectiveResult> {
        world
            .objectives
            .values()
            .map(|o| ObjectiveResult {
                id: o.id,
                status: o.status,
            })
            .collect()
    }

    fn update_terminals(world: &mut World, dt: f32, events: &mut Vec<MissionEvent>) {
        let config = ObjectiveConfig::for_kind(ObjectiveKind::ActivateTerminal);
        let mut finished = Vec::new();

        for objective in world.objectives.values_mut() {
            if objective.kind != ObjectiveKind::ActivateTerminal || !objective.is_open() {
                continue;
            }
            let occupants: Vec<Identity> = world
                .players
                .values()
                .filter(|p| {
                    p.alive && PhysicsSystem::within(p.x, p.y, objective.x, objective.y, config.radius)
                })
                .map(|p| p.identity.clone())
                .collect();

            // frozen, not decayed, while nobody is on the terminal
            if occupants.is_empty() {
                continue;
            }
            objective.advance(ObjectiveStatus::InProgress);
            objective.progress_ms += dt;
            if objective.progress_ms >= config.hold_ms {
                finished.push((objective.id, occupants));
            }
        }

        for (id, occupants) in finished {
            events.extend(Self::complete_objective(world, id, &occupants));
        }
    }

    fn update_samples(world: &mut World, events: &mut Vec<MissionEvent>) {
        let radius = ObjectiveConfig::for_kind(ObjectiveKind::RetrieveSample).radius;
        let (ex, ey) = world.mission.extract_zone;
        let mut delivered = Vec::new();

        for objective in world.objectives.values_mut() {
            if objective.kind != ObjectiveKind::RetrieveSample || !objective.is_open() {
                continue;
            }

            match objective.carrier.clone() {
                Some(carrier) => {
                    let holder = world.players.get_mut(&carrier).filter(|p| p.alive);
                    match holder {
                        Some(player) => {
                            objective.x = player.x;
                            objective.y = player.y;
                            if PhysicsSystem::within(player.x, player.y, ex, ey, EXTRACT_RADIUS) {
                                player.carrying = None;
                                delivered.push((objective.id, carrier));
                            }
                        }
                        None => {
                            // sample falls where the carrier died and stays in progress
                            if let Some(player) = world.players.get_mut(&carrier) {
                                objective.x = player.x;
                                objective.y = player.y;
                                player.carrying = None;
                            }
                            objective.carrier = None;
                        }
                    }
                }
                None => {
                    let picker = world.players.values_mut().find(|p| {
                        p.alive
                            && p.carrying.is_none()
                            && PhysicsSystem::within(p.x, p.y, objective.x, objective.y, radius)
                    });
                    if let Some(player) = picker {
                        player.carrying = Some(objective.id);
                        objective.carrier = Some(player.identity.clone());
                        objective.advance(ObjectiveStatus::InProgress);
                    }
                }
            }
        }

        for (id, carrier) in delivered {
            events.extend(Self::complete_objective(world, id, &[carrier]));
        }
    }

    fn update_extraction(world: &mut World, dt: f32) -> Option<MissionEvent> {
        let (ex, ey) = world.mission.extract_zone;
        world.mission.extraction_timer_ms = (world.mission.extraction_timer_ms - dt).max(0.0);

        let mut alive = 0usize;
        let mut all_extracted = true;
        for player in world.players.values().filter(|p| p.alive) {
            alive += 1;
            let dwell = world
                .mission
                .extraction_progress
                .entry(player.identity.clone())
                .or_insert(0.0);
            if PhysicsSystem::within(player.x, player.y, ex, ey, EXTRACT_RADIUS) {
                *dwell += dt;
            } else {
                *dwell = (*dwell - dt * 0.5).max(0.0);
            }
            if *dwell < EXTRACT_HOLD_MS {
                all_extracted = false;
            }
        }

        if alive > 0 && all_extracted {
            return Some(Self::complete_mission(world));
        }
        if world.mission.extraction_timer_ms <= 0.0 {
            return Self::fail(world, FailReason::ExtractionTimeout);
        }
        None
    }

    /// Optional bonuses and the extraction reward go in full to every player
    fn complete_mission(world: &mut World) -> MissionEvent {
        let optional_done = world
            .objectives
            .values()
            .filter(|o| !o.is_primary && o.status == ObjectiveStatus::Completed)
            .count() as u32;
        let bonus = optional_done * OPTIONAL_BONUS + EXTRACT_REWARD;
        for player in world.players.values_mut() {
            player.score += bonus;
        }
        world.mission.status = MissionStatus::Completed;
        info!(mission_id = %world.mission.mission_id, bonus, "Mission completed");
        MissionEvent::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::{test_mission_config, Player};

    fn active_world() -> World {
        let mut world = World::for_mission(test_mission_config());
        world.mission.status = MissionStatus::Active;
        world
    }

    fn add_player(world: &mut World, name: &str, x: f32, y: f32) -> Identity {
        let id = Identity::new(name);
        world
            .players
            .insert(id.clone(), Player::new(id.clone(), name.into(), x, y));
        id
    }

    fn primary_id(world: &World) -> EntityId {
        *world
            .objectives
            .iter()
            .find(|(_, o)| o.is_primary)
            .map(|(id, _)| id)
            .unwrap()
    }

    fn terminal_id(world: &World) -> EntityId {
        *world
            .objectives
            .iter()
            .find(|(_, o)| o.kind == ObjectiveKind::ActivateTerminal)
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn drop_in_locks_then_activates() {
        let mut world = World::for_mission(test_mission_config());
        for _ in 0..29 {
            MissionSystem::update(&mut world, 50);
            assert_eq!(world.mission.status, MissionStatus::DropIn);
        }
        MissionSystem::update(&mut world, 50);
        assert_eq!(world.mission.status, MissionStatus::Active);
    }

    #[test]
    fn extraction_opens_exactly_once() {
        let mut world = active_world();
        let a = add_player(&mut world, "a", 0.0, 0.0);
        let alert_before = world.mission.alert_level;

        let primary = primary_id(&world);
        let events = MissionSystem::complete_objective(&mut world, primary, &[a.clone()]);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], MissionEvent::ExtractionOpened { .. }));
        assert!(world.mission.extraction_open);
        assert_eq!(world.mission.status, MissionStatus::Extraction);
        assert!((world.mission.alert_level - (alert_before + 0.3)).abs() < 1e-6);
        assert_eq!(world.players[&a].score, 50);

        assert!(MissionSystem::open_extraction_if_ready(&mut world).is_none());
        let primary = primary_id(&world);
        assert!(MissionSystem::complete_objective(&mut world, primary, &[a]).is_empty());
    }

    #[test]
    fn terminal_progress_freezes_when_empty() {
        let mut world = active_world();
        let a = add_player(&mut world, "a", 100.0, 500.0);
        let tid = terminal_id(&world);

        for _ in 0..10 {
            MissionSystem::update(&mut world, 50);
        }
        assert_eq!(world.objectives[&tid].progress_ms, 500.0);
        assert_eq!(world.objectives[&tid].status, ObjectiveStatus::InProgress);

        world.players.get_mut(&a).unwrap().x = 400.0;
        for _ in 0..10 {
            MissionSystem::update(&mut world, 50);
        }
        assert_eq!(world.objectives[&tid].progress_ms, 500.0);
    }

    #[test]
    fn terminal_reward_is_paid_in_full_to_each_occupant() {
        let mut world = active_world();
        let a = add_player(&mut world, "a", 100.0, 500.0);
        let b = add_player(&mut world, "b", 105.0, 505.0);
        let c = add_player(&mut world, "c", 400.0, 100.0);
        let tid = terminal_id(&world);

        for _ in 0..160 {
            MissionSystem::update(&mut world, 50);
        }
        assert_eq!(world.objectives[&tid].status, ObjectiveStatus::Completed);
        assert_eq!(world.players[&a].score, 40);
        assert_eq!(world.players[&b].score, 40);
        assert_eq!(world.players[&c].score, 0);
    }

    #[test]
    fn extraction_completes_when_everyone_dwells() {
        let mut world = active_world();
        let a = add_player(&mut world, "a", 250.0, 50.0);
        let primary = primary_id(&world);
        MissionSystem::complete_objective(&mut world, primary, &[a.clone()]);

        let mut outcome = None;
        for _ in 0..100 {
            let events = MissionSystem::update(&mut world, 50);
            if let Some(e) = events.into_iter().find(|e| *e == MissionEvent::Completed) {
                outcome = Some(e);
                break;
            }
        }
        assert_eq!(outcome, Some(MissionEvent::Completed));
        assert_eq!(world.mission.status, MissionStatus::Completed);
        // nest 50 + extraction 100, optional terminal untouched
        assert_eq!(world.players[&a].score, 150);
    }

    #[test]
    fn extraction_dwell_decays_at_half_rate() {
        let mut world = active_world();
        let a = add_player(&mut world, "a", 250.0, 50.0);
        let primary = primary_id(&world);
        MissionSystem::complete_objective(&mut world, primary, &[a.clone()]);

        for _ in 0..20 {
            MissionSystem::update(&mut world, 50);
        }
        assert_eq!(world.mission.extraction_progress[&a], 1000.0);

        world.players.get_mut(&a).unwrap().y = 400.0;
        for _ in 0..10 {
            MissionSystem::update(&mut world, 50);
        }
        assert_eq!(world.mission.extraction_progress[&a], 750.0);
        for _ in 0..100 {
            MissionSystem::update(&mut world, 50);
        }
        assert_eq!(world.mission.extraction_progress[&a], 0.0);
    }

    #[test]
    fn extraction_timeout_fails_mission() {
        let mut world = active_world();
        let a = add_player(&mut world, "a", 400.0, 600.0);
        let primary = primary_id(&world);
        MissionSystem::complete_objective(&mut world, primary, &[a]);
        world.mission.extraction_timer_ms = 100.0;

        MissionSystem::update(&mut world, 50);
        let events = MissionSystem::update(&mut world, 50);
        assert_eq!(events, vec![MissionEvent::Failed(FailReason::ExtractionTimeout)]);
        assert_eq!(world.mission.status, MissionStatus::Failed);
    }

    #[test]
    fn objective_status_never_moves_backward() {
        let mut o = Objective::new(EntityId(1), ObjectiveKind::ActivateTerminal, 0.0, 0.0, true);
        assert!(o.advance(ObjectiveStatus::InProgress));
        assert!(!o.advance(ObjectiveStatus::Pending));
        assert!(o.advance(ObjectiveStatus::Completed));
        assert!(!o.advance(ObjectiveStatus::Failed));
        assert!(!o.advance(ObjectiveStatus::InProgress));
        assert_eq!(o.status, ObjectiveStatus::Completed);
    }

    #[test]
    fn sample_drops_where_carrier_dies() {
        let mut world = active_world();
        let a = add_player(&mut world, "a", 300.0, 300.0);
        let sid = world.alloc_id();
        world.objectives.insert(
            sid,
            Objective::new(sid, ObjectiveKind::RetrieveSample, 300.0, 300.0, false),
        );

        MissionSystem::update(&mut world, 50);
        assert_eq!(world.players[&a].carrying, Some(sid));
        assert_eq!(world.objectives[&sid].status, ObjectiveStatus::InProgress);

        {
            let p = world.players.get_mut(&a).unwrap();
            p.x = 320.0;
            p.y = 200.0;
        }
        MissionSystem::update(&mut world, 50);
        assert_eq!(world.objectives[&sid].x, 320.0);

        world.players.get_mut(&a).unwrap().take_damage(100.0, None, 1);
        MissionSystem::update(&mut world, 50);
        let sample = &world.objectives[&sid];
        assert_eq!((sample.x, sample.y), (320.0, 200.0));
        assert_eq!(sample.carrier, None);
        assert_eq!(sample.status, ObjectiveStatus::InProgress);
        assert_eq!(world.players[&a].carrying, None);
    }

    #[test]
    fn sample_delivery_completes_and_rewards_carrier() {
        let mut world = active_world();
        let a = add_player(&mut world, "a", 250.0, 200.0);
        let sid = world.alloc_id();
        world.objectives.insert(
            sid,
            Objective::new(sid, ObjectiveKind::RetrieveSample, 250.0, 200.0, false),
        );
        MissionSystem::update(&mut world, 50);
        world.players.get_mut(&a).unwrap().y = 60.0;
        MissionSystem::update(&mut world, 50);

        assert_eq!(world.objectives[&sid].status, ObjectiveStatus::Completed);
        assert_eq!(world.players[&a].score, 60);
        assert_eq!(world.players[&a].carrying, None);
    }
}
