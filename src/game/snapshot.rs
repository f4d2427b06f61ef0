//! Snapshot building for network transmission

use crate::ws::protocol::{
    BulletSnapshot, EnemySnapshot, MissionSnapshot, NestSnapshot, ObjectiveSnapshot,
    PlayerSnapshot, ProjectileSnapshot, WorldSnapshot,
};

use super::world::World;

/// Decides when to send and turns world state into wire snapshots
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for important events)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Full snapshot of the world
    pub fn build(&self, world: &World) -> WorldSnapshot {
        let players = world
            .players
            .iter()
            .map(|(id, p)| {
                (
                    id.clone(),
                    PlayerSnapshot {
                        x: p.x,
                        y: p.y,
                        hp: p.hp,
                        alive: p.alive,
                        score: p.score,
                        carrying: p.carrying,
                        target_priority: p.target_priority,
                        focus_target_id: p.focus_target,
                        last_input_seq: p.last_input_seq,
                    },
                )
            })
            .collect();

        let enemies = world
            .enemies
            .iter()
            .map(|(id, e)| {
                (
                    *id,
                    EnemySnapshot {
                        kind: e.kind,
                        x: e.x,
                        y: e.y,
                        hp: e.hp,
                        max_hp: e.max_hp,
                        alive: e.alive,
                        state: e.state_label().to_string(),
                        burrowed: e.burrowed,
                    },
                )
            })
            .collect();

        let bullets = world
            .bullets
            .iter()
            .map(|(id, b)| {
                (
                    *id,
                    BulletSnapshot {
                        x: b.x,
                        y: b.y,
                        vx: b.vx,
                        vy: b.vy,
                        owner: b.owner.clone(),
                    },
                )
            })
            .collect();

        let projectiles = world
            .projectiles
            .iter()
            .map(|(id, p)| {
                (
                    *id,
                    ProjectileSnapshot {
                        x: p.x,
                        y: p.y,
                        vx: p.vx,
                        vy: p.vy,
                        damage: p.damage,
                    },
                )
            })
            .collect();

        let objectives = world
            .objectives
            .iter()
            .map(|(id, o)| {
                (
                    *id,
                    ObjectiveSnapshot {
                        kind: o.kind,
                        x: o.x,
                        y: o.y,
                        status: o.status,
                        progress: o.progress_fraction(),
                        is_primary: o.is_primary,
                        nest_id: o.nest_id,
                    },
                )
            })
            .collect();

        let nests = world
            .nests
            .iter()
            .map(|(id, n)| {
                (
                    *id,
                    NestSnapshot {
                        objective_id: n.objective_id,
                        x: n.x,
                        y: n.y,
                        hp: n.hp,
                        alive: n.alive,
                    },
                )
            })
            .collect();

        let m = &world.mission;
        let mission = MissionSnapshot {
            mission_id: m.mission_id.clone(),
            status: m.status,
            alert_level: m.alert_level,
            extraction_open: m.extraction_open,
            extraction_timer_ms: m.extraction_timer_ms,
            extract_zone_x: m.extract_zone.0,
            extract_zone_y: m.extract_zone.1,
            map_width: world.bounds.width,
            map_height: world.bounds.height,
        };

        WorldSnapshot {
            tick: world.tick,
            players,
            enemies,
            bullets,
            projectiles,
            objectives,
            nests,
            mission,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::{test_mission_config, World};
    use crate::ws::protocol::EnemyKind;

    #[test]
    fn interval_gates_sending() {
        let mut builder = SnapshotBuilder::new(3);
        let sent: Vec<bool> = (0..6).map(|_| builder.should_send()).collect();
        assert_eq!(sent, vec![false, false, true, false, false, true]);

        builder.should_send();
        builder.force_next();
        assert!(builder.should_send());
    }

    #[test]
    fn snapshot_mirrors_world() {
        let mut world = World::for_mission(test_mission_config());
        world.tick = 12;
        let id = world.spawn_enemy(EnemyKind::Charger, 5.0, 6.0);

        let snap = SnapshotBuilder::new(1).build(&world);
        assert_eq!(snap.tick, 12);
        assert_eq!(snap.enemies[&id].kind, EnemyKind::Charger);
        assert_eq!(snap.enemies[&id].state, "chase");
        assert_eq!(snap.objectives.len(), 2);
        assert_eq!(snap.nests.len(), 1);
        assert_eq!(snap.mission.mission_id, "test_mission");
        assert_eq!(snap.mission.map_width, 500.0);
    }
}
