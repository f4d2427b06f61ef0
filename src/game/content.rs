//! Static game content: objective tuning, difficulty tiers, spawn tables and
//! the procedural mission generator

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use crate::ws::protocol::{EnemyKind, ObjectiveKind};

use super::physics::{PhysicsSystem, WorldBounds};

/// Per-kind objective tuning
#[derive(Debug, Clone, Copy)]
pub struct ObjectiveConfig {
    /// Interaction radius (nest hit radius is handled by combat)
    pub radius: f32,
    /// Time a player must spend inside the radius, 0 if not a hold objective
    pub hold_ms: f32,
    /// Nest health for DESTROY_NEST
    pub nest_hp: f32,
    pub reward: u32,
}

impl ObjectiveConfig {
    pub fn for_kind(kind: ObjectiveKind) -> Self {
        match kind {
            ObjectiveKind::DestroyNest => Self {
                radius: 20.0,
                hold_ms: 0.0,
                nest_hp: 15.0,
                reward: 50,
            },
            ObjectiveKind::ActivateTerminal => Self {
                radius: 30.0,
                hold_ms: 8000.0,
                nest_hp: 0.0,
                reward: 40,
            },
            ObjectiveKind::RetrieveSample => Self {
                radius: 20.0,
                hold_ms: 0.0,
                nest_hp: 0.0,
                reward: 60,
            },
        }
    }
}

/// Extraction zone radius
pub const EXTRACT_RADIUS: f32 = 40.0;
/// Dwell time inside the extraction zone
pub const EXTRACT_HOLD_MS: f32 = 5000.0;
pub const EXTRACT_REWARD: u32 = 100;
/// Bonus per completed optional objective, paid at mission completion
pub const OPTIONAL_BONUS: u32 = 50;

/// Input lock at mission start
pub const DROP_IN_MS: f32 = 1500.0;
/// One-time alert increase when extraction opens
pub const EXTRACTION_ALERT_BUMP: f32 = 0.3;
/// Alert added by each spawn while extraction is open
pub const EXTRACTION_SPAWN_ALERT: f32 = 0.001;
pub const MAX_ALERT: f32 = 1.0;
pub const SPAWN_CHANCE_FACTOR: f32 = 0.15;
/// Enemy cap multiplier while extraction is open
pub const EXTRACTION_CAP_FACTOR: f32 = 1.5;
/// Enemies appear this far outside the map edge
pub const SPAWN_MARGIN: f32 = 50.0;

/// Survival rooms (no mission) spawn one swarmer with this chance per tick
pub const SURVIVAL_SPAWN_CHANCE: f32 = 0.03;
pub const SURVIVAL_SPAWN_MARGIN: f32 = 10.0;
pub const SURVIVAL_BOUNDS: WorldBounds = WorldBounds {
    width: 320.0,
    height: 480.0,
};

const PLACEMENT_MIN_DISTANCE: f32 = 150.0;
const PLACEMENT_EDGE_PADDING: f32 = 100.0;
const PLACEMENT_ATTEMPTS: usize = 20;
const EXTRACTION_TIME_PER_OBJECTIVE_MS: f32 = 15_000.0;

/// Difficulty tier parameters
#[derive(Debug, Clone)]
pub struct DifficultyTier {
    pub level: u8,
    pub name: &'static str,
    pub map_width: f32,
    pub map_height: f32,
    pub primary_count: (usize, usize),
    pub optional_count: (usize, usize),
    pub primary_kinds: &'static [ObjectiveKind],
    pub optional_kinds: &'static [ObjectiveKind],
    pub base_alert: f32,
    pub alert_growth: f32,
    pub extraction_timer_ms: f32,
    pub max_enemies: usize,
    pub spawn_multiplier: f32,
    pub mission_names: &'static [&'static str],
}

impl DifficultyTier {
    pub fn for_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self {
                level,
                name: "Easy",
                map_width: 500.0,
                map_height: 700.0,
                primary_count: (1, 1),
                optional_count: (0, 1),
                primary_kinds: &[ObjectiveKind::DestroyNest],
                optional_kinds: &[ObjectiveKind::DestroyNest],
                base_alert: 0.015,
                alert_growth: 0.0008,
                extraction_timer_ms: 90_000.0,
                max_enemies: 15,
                spawn_multiplier: 0.8,
                mission_names: &["Bug Hunt", "Recon", "Sweep", "Patrol"],
            }),
            2 => Some(Self {
                level,
                name: "Medium",
                map_width: 600.0,
                map_height: 800.0,
                primary_count: (1, 2),
                optional_count: (0, 2),
                primary_kinds: &[ObjectiveKind::DestroyNest, ObjectiveKind::ActivateTerminal],
                optional_kinds: &[ObjectiveKind::DestroyNest, ObjectiveKind::ActivateTerminal],
                base_alert: 0.025,
                alert_growth: 0.0015,
                extraction_timer_ms: 60_000.0,
                max_enemies: 20,
                spawn_multiplier: 1.0,
                mission_names: &["Assault", "Breach", "Strike", "Raid"],
            }),
            3 => Some(Self {
                level,
                name: "Hard",
                map_width: 700.0,
                map_height: 900.0,
                primary_count: (2, 3),
                optional_count: (1, 2),
                primary_kinds: &[
                    ObjectiveKind::DestroyNest,
                    ObjectiveKind::ActivateTerminal,
                    ObjectiveKind::DestroyNest,
                ],
                optional_kinds: &[
                    ObjectiveKind::DestroyNest,
                    ObjectiveKind::ActivateTerminal,
                    ObjectiveKind::RetrieveSample,
                ],
                base_alert: 0.035,
                alert_growth: 0.002,
                extraction_timer_ms: 45_000.0,
                max_enemies: 30,
                spawn_multiplier: 1.2,
                mission_names: &["Extermination", "Decimation", "Annihilation", "Purge"],
            }),
            _ => None,
        }
    }
}

/// Score multiplier for a difficulty level
pub fn difficulty_multiplier(difficulty: u8) -> f32 {
    1.0 + (difficulty.max(1) as f32 - 1.0) * 0.5
}

/// Enemy weights for the current alert level, in [`EnemyKind::ALL`] order
pub fn spawn_weights(alert: f32, difficulty: u8) -> [(EnemyKind, u32); 5] {
    let d = difficulty.max(1) as u32;
    let mut spitter = 0;
    let mut charger = 0;
    let mut brood = 0;
    let mut burrower = 0;

    if alert > 0.2 {
        spitter = 20 * d;
        burrower = 10 * d;
    }
    if alert > 0.4 {
        charger = 15 * d;
        spitter = 30 * d;
    }
    if alert > 0.6 {
        brood = 5 * d;
        charger = 25 * d;
    }
    if alert > 0.8 {
        brood = 10 * d;
    }

    [
        (EnemyKind::Swarmer, 100),
        (EnemyKind::Spitter, spitter),
        (EnemyKind::Charger, charger),
        (EnemyKind::BroodMother, brood),
        (EnemyKind::Burrower, burrower),
    ]
}

/// Weighted draw from a spawn table
pub fn pick_enemy_kind(weights: &[(EnemyKind, u32)], rng: &mut ChaCha8Rng) -> EnemyKind {
    let total: u32 = weights.iter().map(|(_, w)| w).sum();
    if total == 0 {
        return EnemyKind::Swarmer;
    }
    let mut roll = rng.gen_range(0..total);
    for (kind, weight) in weights {
        if roll < *weight {
            return *kind;
        }
        roll -= weight;
    }
    EnemyKind::Swarmer
}

/// Random point `margin` units outside one of the four map edges
pub fn edge_spawn_point(bounds: WorldBounds, margin: f32, rng: &mut ChaCha8Rng) -> (f32, f32) {
    match rng.gen_range(0..4) {
        0 => (rng.gen_range(0.0..bounds.width), -margin),
        1 => (bounds.width + margin, rng.gen_range(0.0..bounds.height)),
        2 => (rng.gen_range(0.0..bounds.width), bounds.height + margin),
        _ => (-margin, rng.gen_range(0.0..bounds.height)),
    }
}

/// One objective placement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectivePlacement {
    pub kind: ObjectiveKind,
    pub x: f32,
    pub y: f32,
}

/// Everything a room needs to run a mission
#[derive(Debug, Clone)]
pub struct MissionConfig {
    pub id: String,
    pub name: String,
    pub difficulty: u8,
    pub bounds: WorldBounds,
    pub primary: Vec<ObjectivePlacement>,
    pub optional: Vec<ObjectivePlacement>,
    pub drop_zone: (f32, f32),
    pub extract_zone: (f32, f32),
    pub base_alert: f32,
    pub alert_growth: f32,
    pub extraction_timer_ms: f32,
    pub max_enemies: usize,
    pub spawn_multiplier: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Invalid difficulty {0}, expected 1, 2 or 3")]
    InvalidDifficulty(u8),
}

impl MissionConfig {
    /// Procedurally generate a mission for a difficulty tier
    pub fn generate(difficulty: u8, rng: &mut ChaCha8Rng) -> Result<Self, ContentError> {
        let tier =
            DifficultyTier::for_level(difficulty).ok_or(ContentError::InvalidDifficulty(difficulty))?;
        let bounds = WorldBounds::new(tier.map_width, tier.map_height);

        let drop_zone = ((bounds.width / 2.0).floor(), bounds.height - 50.0);
        let extract_zone = ((bounds.width / 2.0).floor(), 50.0);
        let mut taken = vec![drop_zone, extract_zone];

        let mut place = |count: (usize, usize), kinds: &[ObjectiveKind], rng: &mut ChaCha8Rng| {
            let n = rng.gen_range(count.0..=count.1);
            (0..n)
                .filter_map(|_| {
                    let kind = *kinds.choose(rng)?;
                    let (x, y) = pick_unclustered_pos(bounds, &taken, rng);
                    taken.push((x, y));
                    Some(ObjectivePlacement { kind, x, y })
                })
                .collect::<Vec<_>>()
        };

        let primary = place(tier.primary_count, tier.primary_kinds, rng);
        let optional = place(tier.optional_count, tier.optional_kinds, rng);

        let objective_count = (primary.len() + optional.len()) as f32;
        let name = tier.mission_names.choose(rng).copied().unwrap_or(tier.name);

        Ok(Self {
            id: format!("procedural_{}_{:08x}", difficulty, rng.gen::<u32>()),
            name: format!("{} {}-{}", name, (b'A' + rng.gen_range(0..26u8)) as char, rng.gen_range(1..100)),
            difficulty,
            bounds,
            primary,
            optional,
            drop_zone,
            extract_zone,
            base_alert: tier.base_alert,
            alert_growth: tier.alert_growth,
            extraction_timer_ms: tier.extraction_timer_ms
                + objective_count * EXTRACTION_TIME_PER_OBJECTIVE_MS,
            max_enemies: tier.max_enemies,
            spawn_multiplier: tier.spawn_multiplier,
        })
    }
}

/// Random point inside the padded map that keeps its distance from `taken`,
/// falling back to the map centre when no attempt succeeds
pub fn pick_unclustered_pos(
    bounds: WorldBounds,
    taken: &[(f32, f32)],
    rng: &mut ChaCha8Rng,
) -> (f32, f32) {
    let max_x = (bounds.width - PLACEMENT_EDGE_PADDING).max(PLACEMENT_EDGE_PADDING);
    let max_y = (bounds.height - PLACEMENT_EDGE_PADDING).max(PLACEMENT_EDGE_PADDING);

    for _ in 0..PLACEMENT_ATTEMPTS {
        let x = rng.gen_range(PLACEMENT_EDGE_PADDING..=max_x).floor();
        let y = rng.gen_range(PLACEMENT_EDGE_PADDING..=max_y).floor();
        let clear = taken
            .iter()
            .all(|&(px, py)| PhysicsSystem::distance(x, y, px, py) >= PLACEMENT_MIN_DISTANCE);
        if clear {
            return (x, y);
        }
    }

    warn!("Could not find unclustered objective position, using map centre");
    let (cx, cy) = bounds.center();
    (cx.floor(), cy.floor())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn weights_unlock_with_alert() {
        let calm = spawn_weights(0.1, 2);
        assert!(calm.iter().skip(1).all(|(_, w)| *w == 0));

        let hot = spawn_weights(0.9, 2);
        assert_eq!(hot[0], (EnemyKind::Swarmer, 100));
        assert_eq!(hot[1], (EnemyKind::Spitter, 60));
        assert_eq!(hot[2], (EnemyKind::Charger, 50));
        assert_eq!(hot[3], (EnemyKind::BroodMother, 20));
        assert_eq!(hot[4], (EnemyKind::Burrower, 20));
    }

    #[test]
    fn swarmer_only_table_always_picks_swarmer() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let weights = spawn_weights(0.0, 3);
        for _ in 0..50 {
            assert_eq!(pick_enemy_kind(&weights, &mut rng), EnemyKind::Swarmer);
        }
    }

    #[test]
    fn difficulty_multiplier_steps_by_half() {
        assert_eq!(difficulty_multiplier(1), 1.0);
        assert_eq!(difficulty_multiplier(2), 1.5);
        assert_eq!(difficulty_multiplier(3), 2.0);
    }

    #[test]
    fn generated_missions_respect_tier() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for level in 1..=3u8 {
            let tier = DifficultyTier::for_level(level).unwrap();
            for _ in 0..20 {
                let m = MissionConfig::generate(level, &mut rng).unwrap();
                assert!((tier.primary_count.0..=tier.primary_count.1).contains(&m.primary.len()));
                assert!((tier.optional_count.0..=tier.optional_count.1).contains(&m.optional.len()));
                assert_eq!(m.drop_zone, (tier.map_width / 2.0, tier.map_height - 50.0));
                assert_eq!(m.extract_zone, (tier.map_width / 2.0, 50.0));
                let expected_timer = tier.extraction_timer_ms
                    + (m.primary.len() + m.optional.len()) as f32 * 15_000.0;
                assert_eq!(m.extraction_timer_ms, expected_timer);
                for o in m.primary.iter().chain(&m.optional) {
                    assert!(o.x >= 100.0 && o.x <= tier.map_width - 100.0);
                    assert!(o.y >= 100.0 && o.y <= tier.map_height - 100.0);
                }
            }
        }
    }

    #[test]
    fn invalid_difficulty_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            MissionConfig::generate(4, &mut rng),
            Err(ContentError::InvalidDifficulty(4))
        ));
    }

    #[test]
    fn edge_spawns_sit_outside_the_map() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let bounds = WorldBounds::new(500.0, 700.0);
        for _ in 0..100 {
            let (x, y) = edge_spawn_point(bounds, SPAWN_MARGIN, &mut rng);
            let inside = x > 0.0 && x < 500.0 && y > 0.0 && y < 700.0;
            assert!(!inside);
        }
    }
}
