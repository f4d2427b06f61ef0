//! Snapshot buffering and interpolation for rendering clients
//!
//! Snapshots are stored with their local arrival time. Rendering happens a
//! fixed delay in the past so there is usually a snapshot on each side of
//! the render time to blend between.

use std::collections::{BTreeMap, VecDeque};

use crate::ws::protocol::{
    BulletSnapshot, EnemySnapshot, MissionSnapshot, NestSnapshot, ObjectiveSnapshot,
    PlayerSnapshot, ProjectileSnapshot, WorldSnapshot,
};

pub const DEFAULT_BUFFER_CAPACITY: usize = 60;
pub const DEFAULT_INTERPOLATION_DELAY_MS: u64 = 180;

/// Blend two samples of the same entity. `t` is in `[0, 1]`.
pub trait Interpolate: Clone {
    fn interpolate(older: &Self, newer: &Self, t: f32) -> Self;
}

/// Written as `a(1-t) + bt` so `t = 0` and `t = 1` return the endpoints
/// exactly
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// Discrete values switch halfway
fn pick<T: Clone>(older: &T, newer: &T, t: f32) -> T {
    if t < 0.5 {
        older.clone()
    } else {
        newer.clone()
    }
}

/// Union of both maps; entities present on one side only keep that side
fn blend_map<K: Ord + Clone, V: Interpolate>(
    older: &BTreeMap<K, V>,
    newer: &BTreeMap<K, V>,
    t: f32,
) -> BTreeMap<K, V> {
    let mut out: BTreeMap<K, V> = older.clone();
    for (key, new) in newer {
        let value = match older.get(key) {
            Some(old) => V::interpolate(old, new, t),
            None => new.clone(),
        };
        out.insert(key.clone(), value);
    }
    out
}

impl Interpolate for PlayerSnapshot {
    fn interpolate(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            x: lerp(a.x, b.x, t),
            y: lerp(a.y, b.y, t),
            hp: lerp(a.hp, b.hp, t),
            alive: pick(&a.alive, &b.alive, t),
            score: pick(&a.score, &b.score, t),
            carrying: pick(&a.carrying, &b.carrying, t),
            target_priority: pick(&a.target_priority, &b.target_priority, t),
            focus_target_id: pick(&a.focus_target_id, &b.focus_target_id, t),
            last_input_seq: pick(&a.last_input_seq, &b.last_input_seq, t),
        }
    }
}

impl Interpolate for EnemySnapshot {
    fn interpolate(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            kind: b.kind,
            x: lerp(a.x, b.x, t),
            y: lerp(a.y, b.y, t),
            hp: lerp(a.hp, b.hp, t),
            max_hp: b.max_hp,
            alive: pick(&a.alive, &b.alive, t),
            state: pick(&a.state, &b.state, t),
            burrowed: pick(&a.burrowed, &b.burrowed, t),
        }
    }
}

impl Interpolate for BulletSnapshot {
    fn interpolate(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            x: lerp(a.x, b.x, t),
            y: lerp(a.y, b.y, t),
            vx: lerp(a.vx, b.vx, t),
            vy: lerp(a.vy, b.vy, t),
            owner: b.owner.clone(),
        }
    }
}

impl Interpolate for ProjectileSnapshot {
    fn interpolate(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            x: lerp(a.x, b.x, t),
            y: lerp(a.y, b.y, t),
            vx: lerp(a.vx, b.vx, t),
            vy: lerp(a.vy, b.vy, t),
            damage: b.damage,
        }
    }
}

impl Interpolate for ObjectiveSnapshot {
    fn interpolate(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            kind: b.kind,
            x: lerp(a.x, b.x, t),
            y: lerp(a.y, b.y, t),
            status: pick(&a.status, &b.status, t),
            progress: lerp(a.progress, b.progress, t),
            is_primary: b.is_primary,
            nest_id: b.nest_id,
        }
    }
}

impl Interpolate for NestSnapshot {
    fn interpolate(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            objective_id: b.objective_id,
            x: b.x,
            y: b.y,
            hp: lerp(a.hp, b.hp, t),
            alive: pick(&a.alive, &b.alive, t),
        }
    }
}

impl Interpolate for MissionSnapshot {
    fn interpolate(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            mission_id: b.mission_id.clone(),
            status: pick(&a.status, &b.status, t),
            alert_level: lerp(a.alert_level, b.alert_level, t),
            extraction_open: pick(&a.extraction_open, &b.extraction_open, t),
            extraction_timer_ms: lerp(a.extraction_timer_ms, b.extraction_timer_ms, t),
            extract_zone_x: b.extract_zone_x,
            extract_zone_y: b.extract_zone_y,
            map_width: b.map_width,
            map_height: b.map_height,
        }
    }
}

impl Interpolate for WorldSnapshot {
    fn interpolate(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            tick: pick(&a.tick, &b.tick, t),
            players: blend_map(&a.players, &b.players, t),
            enemies: blend_map(&a.enemies, &b.enemies, t),
            bullets: blend_map(&a.bullets, &b.bullets, t),
            projectiles: blend_map(&a.projectiles, &b.projectiles, t),
            objectives: blend_map(&a.objectives, &b.objectives, t),
            nests: blend_map(&a.nests, &b.nests, t),
            mission: MissionSnapshot::interpolate(&a.mission, &b.mission, t),
        }
    }
}

/// Bounded buffer of `(arrival_ms, snapshot)` pairs, oldest first
#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    entries: VecDeque<(u64, WorldSnapshot)>,
    capacity: usize,
    delay_ms: u64,
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, DEFAULT_INTERPOLATION_DELAY_MS)
    }
}

impl SnapshotBuffer {
    pub fn new(capacity: usize, delay_ms: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            delay_ms,
        }
    }

    /// Store a snapshot received at `arrival_ms`, evicting the oldest when full
    pub fn push(&mut self, arrival_ms: u64, snapshot: WorldSnapshot) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((arrival_ms, snapshot));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&WorldSnapshot> {
        self.entries.back().map(|(_, s)| s)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Interpolation factor between two arrival times for `render_ms`
    pub fn factor(older_ms: u64, newer_ms: u64, render_ms: u64) -> f32 {
        let span = newer_ms.saturating_sub(older_ms).max(1) as f32;
        let elapsed = render_ms as f32 - older_ms as f32;
        (elapsed / span).clamp(0.0, 1.0)
    }

    /// World to draw at local time `now_ms`
    pub fn render_at(&self, now_ms: u64) -> Option<WorldSnapshot> {
        let (oldest_ms, oldest) = self.entries.front()?;
        let (newest_ms, newest) = self.entries.back()?;
        if self.entries.len() < 2 {
            return Some(newest.clone());
        }

        let render_ms = now_ms.saturating_sub(self.delay_ms);
        if render_ms <= *oldest_ms {
            return Some(oldest.clone());
        }
        if render_ms >= *newest_ms {
            return Some(newest.clone());
        }

        let newer_idx = self
            .entries
            .iter()
            .position(|(t, _)| *t > render_ms)?;
        let (older_ms, older) = &self.entries[newer_idx - 1];
        let (newer_ms, newer) = &self.entries[newer_idx];

        let t = Self::factor(*older_ms, *newer_ms, render_ms);
        Some(WorldSnapshot::interpolate(older, newer, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{EnemyKind, EntityId, Identity, TargetPriority};

    fn player(x: f32, hp: f32, alive: bool) -> PlayerSnapshot {
        PlayerSnapshot {
            x,
            y: 0.0,
            hp,
            alive,
            score: 0,
            carrying: None,
            target_priority: TargetPriority::Closest,
            focus_target_id: None,
            last_input_seq: 0,
        }
    }

    fn enemy(x: f32) -> EnemySnapshot {
        EnemySnapshot {
            kind: EnemyKind::Swarmer,
            x,
            y: 0.0,
            hp: 3.0,
            max_hp: 3.0,
            alive: true,
            state: "chase".into(),
            burrowed: false,
        }
    }

    fn world(tick: u64, px: f32) -> WorldSnapshot {
        let mut w = WorldSnapshot {
            tick,
            ..Default::default()
        };
        w.players.insert(Identity::new("a"), player(px, 20.0, true));
        w
    }

    #[test]
    fn factor_endpoints_reproduce_samples_exactly() {
        let a = player(0.1, 20.0, true);
        let b = player(37.3, 7.0, false);
        assert_eq!(PlayerSnapshot::interpolate(&a, &b, 0.0), a);
        assert_eq!(PlayerSnapshot::interpolate(&a, &b, 1.0), b);
    }

    #[test]
    fn discrete_fields_snap_at_half() {
        let a = player(0.0, 20.0, true);
        let b = player(10.0, 0.0, false);
        assert!(PlayerSnapshot::interpolate(&a, &b, 0.49).alive);
        assert!(!PlayerSnapshot::interpolate(&a, &b, 0.5).alive);
    }

    #[test]
    fn factor_is_clamped_and_span_floored() {
        assert_eq!(SnapshotBuffer::factor(100, 200, 150), 0.5);
        assert_eq!(SnapshotBuffer::factor(100, 200, 50), 0.0);
        assert_eq!(SnapshotBuffer::factor(100, 200, 400), 1.0);
        assert_eq!(SnapshotBuffer::factor(100, 100, 100), 0.0);
    }

    #[test]
    fn render_blends_bracketing_pair() {
        let mut buffer = SnapshotBuffer::new(60, 100);
        buffer.push(1_000, world(1, 0.0));
        buffer.push(1_050, world(2, 10.0));
        buffer.push(1_100, world(3, 20.0));

        let frame = buffer.render_at(1_175).unwrap();
        assert_eq!(frame.players[&Identity::new("a")].x, 15.0);
        assert_eq!(frame.tick, 3);
    }

    #[test]
    fn render_outside_buffer_uses_edge_snapshots() {
        let mut buffer = SnapshotBuffer::new(60, 100);
        assert!(buffer.render_at(0).is_none());

        buffer.push(1_000, world(1, 0.0));
        assert_eq!(buffer.render_at(0).unwrap().tick, 1);

        buffer.push(1_050, world(2, 10.0));
        assert_eq!(buffer.render_at(500).unwrap().tick, 1);
        assert_eq!(buffer.render_at(9_000).unwrap().tick, 2);
    }

    #[test]
    fn entity_union_keeps_one_sided_entries() {
        let mut older = world(1, 0.0);
        let mut newer = world(2, 10.0);
        older.enemies.insert(EntityId(1), enemy(5.0));
        newer.enemies.insert(EntityId(2), enemy(50.0));

        let mid = WorldSnapshot::interpolate(&older, &newer, 0.5);
        assert_eq!(mid.enemies[&EntityId(1)].x, 5.0);
        assert_eq!(mid.enemies[&EntityId(2)].x, 50.0);
        assert_eq!(mid.players[&Identity::new("a")].x, 5.0);
    }

    #[test]
    fn buffer_is_bounded() {
        let mut buffer = SnapshotBuffer::new(3, 0);
        for tick in 0..5 {
            buffer.push(tick * 10, world(tick, 0.0));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.render_at(0).unwrap().tick, 2);
        assert_eq!(buffer.latest().unwrap().tick, 4);
    }
}
