//! Simulation configuration with documented constants
//!
//! All tunable numbers are collected here with explanations of their purpose
//! and how they interact with each other. The config is owned by the
//! [`Battle`](crate::battle::execution::Battle) context and passed explicitly;
//! there is no global instance.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::{Result, SimError};

/// Configuration for the simulation systems
///
/// These values have been tuned for infantry skirmishes at 50-400 meters.
/// Changing them will affect pacing and lethality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    // === TIME ===
    /// Fixed simulation ticks per simulated second
    pub ticks_per_second: u32,

    /// Decision System runs once every this many ticks per unit
    ///
    /// Units whose under-fire intensity is at or above the danger
    /// threshold are also evaluated off-cadence so survival is never late.
    pub decision_interval: u64,

    /// Hard battle length limit in ticks (ends as a draw)
    pub max_ticks: u64,

    // === SPATIAL ===
    /// Size of each cell in the spatial hash (world units)
    ///
    /// Should be well below sensor_radius; a radius query visits
    /// roughly pi * (r / cell)^2 cells.
    pub grid_cell_size: f32,

    // === PERCEPTION ===
    /// How far units can see (world units)
    pub sensor_radius: f32,

    /// Accumulated opacity at which line of sight is blocked
    pub los_opacity_threshold: f32,

    /// Distance between LOS samples, as a fraction of a terrain tile
    pub los_sample_step: f32,

    /// How long a last-known enemy position is remembered (ticks)
    pub contact_memory_ticks: u64,

    /// Under-fire intensity lost per tick
    pub under_fire_decay_per_tick: f32,

    /// Under-fire intensity at which survival overrides everything
    pub under_fire_danger_threshold: f32,

    /// Radius around a shot's impact point that counts as a near miss
    pub near_miss_radius: f32,

    /// Under-fire intensity added by one near miss
    pub near_miss_intensity: f32,

    // === SUPPRESSION ===
    /// Suppression lost per simulated second (0..1 scale)
    pub suppression_decay_per_second: f32,

    /// Suppression at which the shooter accuracy penalty applies
    pub suppressed_threshold: f32,

    /// Accuracy lost per point of suppression once suppressed
    ///
    /// Multiplier is 1 - weight * suppression, so a fully suppressed
    /// shooter at weight 0.6 fires at 40% of normal accuracy.
    pub suppression_accuracy_weight: f32,

    /// Radius around a SuppressArea point that receives suppression
    pub suppress_area_radius: f32,

    // === COMBAT ===
    /// How strongly terrain cover reduces hit chance
    pub cover_weight: f32,

    /// Fraction of max range where accuracy begins to fall off
    pub range_falloff_start: f32,

    /// Accuracy multiplier remaining at max range
    pub range_falloff_floor: f32,

    /// Ticks spent aiming before the first shot of an engagement
    pub aim_ticks: u64,

    /// Damage variation bounds (multiplier drawn uniformly in this range)
    pub damage_variation_min: f32,
    pub damage_variation_max: f32,

    /// Chance of a critical location hit, and its multiplier
    pub critical_chance: f32,
    pub critical_multiplier: f32,

    /// Soldiers left below this fraction of max health fall unconscious
    pub unconscious_health_fraction: f32,

    // === MORALE ===
    /// Morale ceiling and the value units deploy with
    pub morale_max: f32,

    /// Morale lost by each living squad member per squad casualty
    pub casualty_morale_loss: f32,

    /// Extra one-off morale loss when the squad leader falls
    pub leader_loss_morale_loss: f32,

    /// Morale lost per second while the squad's leader is down
    pub leaderless_drain_per_second: f32,

    /// Morale regained per second while not suppressed
    pub morale_recovery_per_second: f32,

    /// Chance per decision that a Broken unit refuses its orders
    pub broken_override_chance: f32,

    /// Chance per decision that a Panicked unit flees instead of obeying
    pub panicked_override_chance: f32,

    // === MOVEMENT ===
    /// Walking speed (world units per second)
    pub walk_speed: f32,
    /// Running speed, requires CAN_SPRINT
    pub run_speed: f32,
    /// Sneaking / crouched speed
    pub sneak_speed: f32,
    /// Vehicle road speed
    pub vehicle_speed: f32,

    /// Cached paths older than this are recomputed
    pub path_max_age_ticks: u64,

    /// How far a fleeing unit runs from the nearest threat (world units)
    pub flee_distance: f32,

    // === HOUSEKEEPING ===
    /// Dead units are swap-removed this many ticks after death (None = never)
    pub corpse_cleanup_ticks: Option<u64>,

    /// Minimum living unit count before perception/decision run on rayon
    ///
    /// Below this threshold, thread overhead exceeds benefits.
    pub parallel_threshold: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: 60,
            decision_interval: 6,
            max_ticks: 60 * 60 * 30,

            grid_cell_size: 25.0,

            sensor_radius: 300.0,
            los_opacity_threshold: 0.5,
            los_sample_step: 0.5,
            contact_memory_ticks: 600,
            under_fire_decay_per_tick: 0.005,
            under_fire_danger_threshold: 0.6,
            near_miss_radius: 3.0,
            near_miss_intensity: 0.25,

            suppression_decay_per_second: 0.15,
            suppressed_threshold: 0.3,
            suppression_accuracy_weight: 0.6,
            suppress_area_radius: 5.0,

            cover_weight: 0.8,
            range_falloff_start: 0.5,
            range_falloff_floor: 0.2,
            aim_ticks: 20,
            damage_variation_min: 0.8,
            damage_variation_max: 1.2,
            critical_chance: 0.05,
            critical_multiplier: 2.5,
            unconscious_health_fraction: 0.15,

            morale_max: 100.0,
            casualty_morale_loss: 10.0,
            leader_loss_morale_loss: 15.0,
            leaderless_drain_per_second: 0.5,
            morale_recovery_per_second: 0.5,
            broken_override_chance: 0.25,
            panicked_override_chance: 0.6,

            walk_speed: 1.4,
            run_speed: 3.5,
            sneak_speed: 0.6,
            vehicle_speed: 6.0,
            path_max_age_ticks: 600,
            flee_distance: 40.0,

            corpse_cleanup_ticks: Some(600),
            parallel_threshold: 512,
        }
    }
}

impl SimulationConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a (possibly partial) TOML document; missing keys keep defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Simulated seconds per tick
    pub fn dt(&self) -> f32 {
        1.0 / self.ticks_per_second as f32
    }

    /// Every float field by name, for checks that apply to all of them
    fn float_fields(&self) -> [(&'static str, f32); 32] {
        [
            ("grid_cell_size", self.grid_cell_size),
            ("sensor_radius", self.sensor_radius),
            ("los_opacity_threshold", self.los_opacity_threshold),
            ("los_sample_step", self.los_sample_step),
            ("under_fire_decay_per_tick", self.under_fire_decay_per_tick),
            ("under_fire_danger_threshold", self.under_fire_danger_threshold),
            ("near_miss_radius", self.near_miss_radius),
            ("near_miss_intensity", self.near_miss_intensity),
            ("suppression_decay_per_second", self.suppression_decay_per_second),
            ("suppressed_threshold", self.suppressed_threshold),
            ("suppression_accuracy_weight", self.suppression_accuracy_weight),
            ("suppress_area_radius", self.suppress_area_radius),
            ("cover_weight", self.cover_weight),
            ("range_falloff_start", self.range_falloff_start),
            ("range_falloff_floor", self.range_falloff_floor),
            ("damage_variation_min", self.damage_variation_min),
            ("damage_variation_max", self.damage_variation_max),
            ("critical_chance", self.critical_chance),
            ("critical_multiplier", self.critical_multiplier),
            ("unconscious_health_fraction", self.unconscious_health_fraction),
            ("morale_max", self.morale_max),
            ("casualty_morale_loss", self.casualty_morale_loss),
            ("leader_loss_morale_loss", self.leader_loss_morale_loss),
            ("leaderless_drain_per_second", self.leaderless_drain_per_second),
            ("morale_recovery_per_second", self.morale_recovery_per_second),
            ("broken_override_chance", self.broken_override_chance),
            ("panicked_override_chance", self.panicked_override_chance),
            ("walk_speed", self.walk_speed),
            ("run_speed", self.run_speed),
            ("sneak_speed", self.sneak_speed),
            ("vehicle_speed", self.vehicle_speed),
            ("flee_distance", self.flee_distance),
        ]
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        // NaN and infinity slip past every range comparison below
        for (name, value) in self.float_fields() {
            if !value.is_finite() {
                return Err(SimError::InvalidConfig(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }

        if self.ticks_per_second == 0 {
            return Err(SimError::InvalidConfig("ticks_per_second must be > 0".into()));
        }
        if self.decision_interval == 0 {
            return Err(SimError::InvalidConfig("decision_interval must be > 0".into()));
        }

        if self.grid_cell_size <= 0.0 || self.grid_cell_size > self.sensor_radius {
            return Err(SimError::InvalidConfig(format!(
                "grid_cell_size ({}) must be in (0, sensor_radius ({})]",
                self.grid_cell_size, self.sensor_radius
            )));
        }

        if !(0.0..=1.0).contains(&self.range_falloff_start)
            || !(0.0..=1.0).contains(&self.range_falloff_floor)
        {
            return Err(SimError::InvalidConfig("range falloff values must be in [0, 1]".into()));
        }

        if self.damage_variation_min <= 0.0
            || self.damage_variation_min > self.damage_variation_max
        {
            return Err(SimError::InvalidConfig(format!(
                "damage variation range [{}, {}] is invalid",
                self.damage_variation_min, self.damage_variation_max
            )));
        }

        if self.los_sample_step <= 0.0 || self.los_opacity_threshold <= 0.0 {
            return Err(SimError::InvalidConfig("LOS step and threshold must be positive".into()));
        }

        if !(0.0..=1.0).contains(&self.broken_override_chance)
            || !(0.0..=1.0).contains(&self.panicked_override_chance)
            || !(0.0..=1.0).contains(&self.critical_chance)
        {
            return Err(SimError::InvalidConfig("probabilities must be in [0, 1]".into()));
        }

        if self.morale_max <= 0.0 {
            return Err(SimError::InvalidConfig("morale_max must be positive".into()));
        }

        Ok(())
    }
}
