//! Battle system constants - fixed tuning values that are not per-battle config
//!
//! Per-battle tunables live in [`SimulationConfig`](crate::core::config::SimulationConfig).
//! Everything here is a MULTIPLIER on hit chance or damage unless noted.

use crate::core::types::Posture;

// Shooter posture (steadier when lower)
pub const SHOOTER_STANDING_MODIFIER: f32 = 0.8;
pub const SHOOTER_CROUCHING_MODIFIER: f32 = 1.0;
pub const SHOOTER_PRONE_MODIFIER: f32 = 1.15;

// Target posture (smaller silhouette when lower)
pub const TARGET_STANDING_MODIFIER: f32 = 1.0;
pub const TARGET_CROUCHING_MODIFIER: f32 = 0.75;
pub const TARGET_PRONE_MODIFIER: f32 = 0.5;

// Hit chance is never a guaranteed hit or miss
pub const MIN_HIT_CHANCE: f32 = 0.01;
pub const MAX_HIT_CHANCE: f32 = 0.99;

// Hit location multipliers (critical multiplier is in config)
pub const LIMB_HIT_CHANCE: f32 = 0.35;
pub const LIMB_DAMAGE_MULTIPLIER: f32 = 0.6;
pub const TORSO_DAMAGE_MULTIPLIER: f32 = 1.0;

// Misses land within this fraction of the near-miss radius from the target
pub const MISS_SCATTER_FRACTION: f32 = 0.8;

/// Posture a unit must leave prone for before it can reload
///
/// Kneeling is the "ready" position: low enough to keep some cover,
/// high enough to work the weapon.
pub const READY_POSTURE: Posture = Posture::Crouching;

// Movement
/// Units within this distance of their destination have arrived (world units)
pub const ARRIVAL_RADIUS: f32 = 0.5;
/// Suppression slows movement by up to this fraction
pub const SUPPRESSION_MOVE_PENALTY: f32 = 0.5;
/// Soldiers below this health fraction cannot sprint
pub const SPRINT_HEALTH_FRACTION: f32 = 0.5;

// Pathfinding
/// Hard cap on A* node expansions so a search is always bounded
pub const MAX_PATH_EXPANSIONS: usize = 20_000;

// Survival
/// How far (in tiles) a unit under fire looks for better cover
pub const COVER_SEARCH_RADIUS: i32 = 4;
/// Cover improvement required before running for it instead of hiding in place
pub const COVER_IMPROVEMENT_THRESHOLD: f32 = 0.2;

// Squads
/// Distance between neighbouring formation slots on a squad move order
pub const FORMATION_SPACING: f32 = 3.0;

// Morale band thresholds, as a fraction of morale_max
pub const STEADY_THRESHOLD: f32 = 0.7;
pub const CAUTIOUS_THRESHOLD: f32 = 0.5;
pub const SHAKEN_THRESHOLD: f32 = 0.3;
pub const BROKEN_THRESHOLD: f32 = 0.15;

pub fn shooter_posture_modifier(posture: Posture) -> f32 {
    match posture {
        Posture::Standing => SHOOTER_STANDING_MODIFIER,
        Posture::Crouching => SHOOTER_CROUCHING_MODIFIER,
        Posture::Prone => SHOOTER_PRONE_MODIFIER,
    }
}

pub fn target_posture_modifier(posture: Posture) -> f32 {
    match posture {
        Posture::Standing => TARGET_STANDING_MODIFIER,
        Posture::Crouching => TARGET_CROUCHING_MODIFIER,
        Posture::Prone => TARGET_PRONE_MODIFIER,
    }
}
