//! Fire resolution: hit chance, damage and suppression
//!
//! Resolution is pure. It reads a snapshot of the world plus a keyed
//! random stream and returns the messages that carry out the result.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::battle::constants::{
    shooter_posture_modifier, target_posture_modifier, LIMB_DAMAGE_MULTIPLIER, LIMB_HIT_CHANCE,
    MAX_HIT_CHANCE, MIN_HIT_CHANCE, MISS_SCATTER_FRACTION, TORSO_DAMAGE_MULTIPLIER,
};
use crate::battle::messages::{Message, ProjectileEvent};
use crate::battle::state::FireTarget;
use crate::battle::store::{EntityStore, IndexRemap};
use crate::battle::units::Unit;
use crate::battle::weapons::{WeaponCatalog, WeaponDefinition, WeaponId};
use crate::core::config::SimulationConfig;
use crate::core::rng::{roll_rng, RngStream};
use crate::core::types::{Posture, Tick, UnitKind, UnitRef, Vec2};
use crate::spatial::sparse_hash::SpatialIndex;
use crate::spatial::terrain::TerrainQuery;

/// A round that left the barrel this tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShotReport {
    pub shooter: UnitRef,
    pub target: FireTarget,
    pub weapon: WeaponId,
}

impl ShotReport {
    /// Follow a swap-removal; a removed shooter or target drops the shot
    pub(crate) fn remapped(self, remap: &IndexRemap) -> Option<ShotReport> {
        let shooter = remap.remap(self.shooter)?;
        let target = match self.target {
            FireTarget::Unit(unit) => FireTarget::Unit(remap.remap(unit)?),
            point => point,
        };
        Some(ShotReport {
            shooter,
            target,
            weapon: self.weapon,
        })
    }
}

/// Every factor that went into a hit chance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitChance {
    pub accuracy: f32,
    pub range: f32,
    pub shooter_posture: f32,
    pub target_posture: f32,
    pub cover: f32,
    pub suppression: f32,
    pub morale: f32,
    /// Product of all factors, clamped
    pub value: f32,
}

/// Linear falloff past `range_falloff_start` of max range, down to the floor
pub fn range_factor(distance: f32, max_range: f32, config: &SimulationConfig) -> f32 {
    if max_range <= 0.0 {
        return config.range_falloff_floor;
    }
    let fraction = (distance / max_range).clamp(0.0, 1.0);
    let start = config.range_falloff_start;
    if fraction <= start || start >= 1.0 {
        return 1.0;
    }
    let t = (fraction - start) / (1.0 - start);
    1.0 - t * (1.0 - config.range_falloff_floor)
}

/// Compute the chance a shot hits
///
/// `target_cover` is the terrain cover value at the target's tile for the
/// target's posture.
pub fn hit_chance(
    shooter: &Unit,
    target_posture: Posture,
    distance: f32,
    target_cover: f32,
    weapon: &WeaponDefinition,
    config: &SimulationConfig,
) -> HitChance {
    let accuracy = weapon.accuracy;
    let range = range_factor(distance, weapon.range, config);
    let shooter_posture = match shooter.kind {
        UnitKind::Soldier => shooter_posture_modifier(shooter.posture),
        UnitKind::Vehicle => 1.0,
    };
    let target_posture = target_posture_modifier(target_posture);
    let cover = 1.0 - target_cover.clamp(0.0, 1.0) * config.cover_weight;
    let suppression = if shooter.is_suppressed(config.suppressed_threshold) {
        1.0 - config.suppression_accuracy_weight * shooter.suppression
    } else {
        1.0
    };
    let morale = if config.morale_max > 0.0 {
        (shooter.morale / config.morale_max).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let raw = accuracy * range * shooter_posture * target_posture * cover * suppression * morale;
    let value = if raw.is_nan() {
        MIN_HIT_CHANCE
    } else {
        raw.clamp(MIN_HIT_CHANCE, MAX_HIT_CHANCE)
    };

    HitChance {
        accuracy,
        range,
        shooter_posture,
        target_posture,
        cover,
        suppression,
        morale,
        value,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitLocation {
    Torso,
    Limb,
    /// Critical hit
    Head,
}

/// Result of resolving one shot
#[derive(Debug, Clone, PartialEq)]
pub struct FireOutcome {
    pub shooter: UnitRef,
    pub target: FireTarget,
    pub origin: Vec2,
    pub impact: Vec2,
    /// `None` for area fire, which has no single aimed target
    pub chance: Option<HitChance>,
    pub hit: Option<UnitRef>,
    pub location: Option<HitLocation>,
    pub damage: f32,
}

/// Read-only inputs for fire resolution
pub struct CombatContext<'a> {
    pub store: &'a EntityStore,
    pub spatial: &'a SpatialIndex,
    pub terrain: &'a dyn TerrainQuery,
    pub weapons: &'a WeaponCatalog,
    pub config: &'a SimulationConfig,
    pub seed: u64,
    pub tick: Tick,
}

impl CombatContext<'_> {
    fn cover_at(&self, unit: &Unit) -> f32 {
        let posture = match unit.kind {
            UnitKind::Soldier => unit.posture,
            UnitKind::Vehicle => Posture::Standing,
        };
        self.terrain.cover_value(self.terrain.tile_at(unit.position), posture)
    }
}

fn scatter(rng: &mut impl Rng, center: Vec2, radius: f32) -> Vec2 {
    let angle: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
    let distance: f32 = if radius > 0.0 { rng.gen_range(0.0..=radius) } else { 0.0 };
    center + Vec2::new(angle.cos(), angle.sin()) * distance
}

/// Roll one shot
///
/// Returns `None` if the shooter or an aimed-at target no longer exists, or
/// the aimed-at target is already dead.
pub fn resolve_fire(ctx: &CombatContext<'_>, shot: &ShotReport) -> Option<FireOutcome> {
    let shooter = ctx.store.get(shot.shooter).ok()?;
    let weapon = ctx.weapons.get(shot.weapon).ok()?;
    let mut rng = roll_rng(ctx.seed, ctx.tick, shot.shooter.stream_key(), RngStream::Fire);
    let config = ctx.config;

    match shot.target {
        FireTarget::Point(point) => Some(FireOutcome {
            shooter: shot.shooter,
            target: shot.target,
            origin: shooter.position,
            impact: scatter(&mut rng, point, config.suppress_area_radius * MISS_SCATTER_FRACTION),
            chance: None,
            hit: None,
            location: None,
            damage: 0.0,
        }),
        FireTarget::Unit(target_ref) => {
            let target = ctx.store.get(target_ref).ok()?;
            if target.is_dead() {
                return None;
            }
            let distance = shooter.position.distance(&target.position);
            let target_posture = match target.kind {
                UnitKind::Soldier => target.posture,
                UnitKind::Vehicle => Posture::Standing,
            };
            let chance = hit_chance(
                shooter,
                target_posture,
                distance,
                ctx.cover_at(target),
                weapon,
                config,
            );

            let roll: f32 = rng.gen();
            if roll < chance.value {
                let variation =
                    rng.gen_range(config.damage_variation_min..=config.damage_variation_max);
                let location_roll: f32 = rng.gen();
                let (location, multiplier) = if location_roll < config.critical_chance {
                    (HitLocation::Head, config.critical_multiplier)
                } else if location_roll < config.critical_chance + LIMB_HIT_CHANCE {
                    (HitLocation::Limb, LIMB_DAMAGE_MULTIPLIER)
                } else {
                    (HitLocation::Torso, TORSO_DAMAGE_MULTIPLIER)
                };
                Some(FireOutcome {
                    shooter: shot.shooter,
                    target: shot.target,
                    origin: shooter.position,
                    impact: target.position,
                    chance: Some(chance),
                    hit: Some(target_ref),
                    location: Some(location),
                    damage: weapon.damage * variation * multiplier,
                })
            } else {
                let radius = config.near_miss_radius * MISS_SCATTER_FRACTION;
                Some(FireOutcome {
                    shooter: shot.shooter,
                    target: shot.target,
                    origin: shooter.position,
                    impact: scatter(&mut rng, target.position, radius),
                    chance: Some(chance),
                    hit: None,
                    location: None,
                    damage: 0.0,
                })
            }
        }
    }
}

/// Turn an outcome into damage, suppression, near-miss and render messages
pub fn outcome_messages(ctx: &CombatContext<'_>, outcome: &FireOutcome) -> Vec<Message> {
    let config = ctx.config;
    let mut messages = vec![Message::SpawnProjectile(ProjectileEvent {
        from: outcome.origin,
        to: outcome.impact,
        hit: outcome.hit.is_some(),
        tick: ctx.tick,
    })];

    if let Some(hit) = outcome.hit {
        messages.push(Message::ApplyDamage {
            unit: hit,
            amount: outcome.damage,
            source: Some(outcome.shooter),
        });
    }

    let suppression = ctx
        .store
        .get(outcome.shooter)
        .ok()
        .and_then(|s| s.loadout)
        .and_then(|l| ctx.weapons.get(l.weapon).ok())
        .map(|w| w.suppression_per_shot)
        .unwrap_or(0.0);

    let (radius, mut affected) = match outcome.target {
        FireTarget::Unit(target) => (config.near_miss_radius, vec![target]),
        FireTarget::Point(_) => (config.suppress_area_radius, Vec::new()),
    };
    affected.extend(ctx.spatial.query_radius(outcome.impact, radius));
    affected.sort_unstable();
    affected.dedup();

    let shooter_side = ctx.store.get(outcome.shooter).ok().map(|s| s.side);
    for unit_ref in affected {
        if unit_ref == outcome.shooter {
            continue;
        }
        let Ok(unit) = ctx.store.get(unit_ref) else {
            continue;
        };
        if !unit.is_active() {
            continue;
        }
        messages.push(Message::NearMiss {
            unit: unit_ref,
            intensity: config.near_miss_intensity,
        });
        let is_enemy = shooter_side.is_some_and(|side| side != unit.side);
        if is_enemy && suppression > 0.0 {
            messages.push(Message::AdjustSuppression {
                unit: unit_ref,
                delta: suppression,
            });
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Side;
    use crate::spatial::terrain::GridTerrain;

    fn rifle() -> WeaponDefinition {
        WeaponCatalog::standard().get(WeaponId(0)).unwrap().clone()
    }

    fn shooter() -> Unit {
        Unit::new("shooter", UnitKind::Soldier, Side::Attacker, Vec2::new(0.0, 0.0))
    }

    #[test]
    fn test_open_ground_standing_at_short_range() {
        let config = SimulationConfig::default();
        let chance = hit_chance(&shooter(), Posture::Standing, 50.0, 0.0, &rifle(), &config);
        // accuracy 0.85 x standing shooter 0.8, no other penalties
        assert!((chance.value - 0.68).abs() < 1e-5);
        assert_eq!(chance.range, 1.0);
    }

    #[test]
    fn test_range_falloff() {
        let config = SimulationConfig::default();
        assert_eq!(range_factor(100.0, 400.0, &config), 1.0);
        assert_eq!(range_factor(200.0, 400.0, &config), 1.0);
        assert!((range_factor(400.0, 400.0, &config) - 0.2).abs() < 1e-6);
        assert!((range_factor(300.0, 400.0, &config) - 0.6).abs() < 1e-6);
        // Beyond max range stays at the floor
        assert!((range_factor(900.0, 400.0, &config) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_cover_and_posture_reduce_chance() {
        let config = SimulationConfig::default();
        let open = hit_chance(&shooter(), Posture::Standing, 50.0, 0.0, &rifle(), &config);
        let covered = hit_chance(&shooter(), Posture::Prone, 50.0, 0.5, &rifle(), &config);
        assert!(covered.value < open.value);
    }

    #[test]
    fn test_suppression_penalty_only_above_threshold() {
        let config = SimulationConfig::default();
        let mut s = shooter();
        s.suppression = 0.2;
        let light = hit_chance(&s, Posture::Standing, 50.0, 0.0, &rifle(), &config);
        assert_eq!(light.suppression, 1.0);
        s.suppression = 0.5;
        let heavy = hit_chance(&s, Posture::Standing, 50.0, 0.0, &rifle(), &config);
        assert!((heavy.suppression - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_chance_is_clamped() {
        let config = SimulationConfig::default();
        let mut s = shooter();
        s.morale = 0.0;
        let low = hit_chance(&s, Posture::Prone, 1000.0, 0.95, &rifle(), &config);
        assert_eq!(low.value, MIN_HIT_CHANCE);

        let mut sharp = rifle();
        sharp.accuracy = 1.0;
        let mut prone = shooter();
        prone.posture = Posture::Prone;
        let high = hit_chance(&prone, Posture::Standing, 1.0, 0.0, &sharp, &config);
        assert_eq!(high.value, MAX_HIT_CHANCE);
    }

    fn setup() -> (EntityStore, SpatialIndex, GridTerrain, WeaponCatalog, SimulationConfig) {
        let config = SimulationConfig::default();
        let weapons = WeaponCatalog::standard();
        let terrain = GridTerrain::new(100, 100, 1.0);
        let mut store = EntityStore::new();
        let mut a = shooter();
        a.loadout = Some(crate::battle::units::Loadout {
            weapon: WeaponId(0),
            rounds: 10,
            magazine_size: 10,
            spare_magazines: 1,
        });
        store.create(UnitKind::Soldier, a);
        store.create(
            UnitKind::Soldier,
            Unit::new("target", UnitKind::Soldier, Side::Defender, Vec2::new(50.0, 0.0)),
        );
        let mut spatial = SpatialIndex::new(config.grid_cell_size);
        spatial.rebuild(store.iter().map(|(r, u)| (r, u.position)));
        (store, spatial, terrain, weapons, config)
    }

    #[test]
    fn test_resolve_fire_is_deterministic() {
        let (store, spatial, terrain, weapons, config) = setup();
        let ctx = CombatContext {
            store: &store,
            spatial: &spatial,
            terrain: &terrain,
            weapons: &weapons,
            config: &config,
            seed: 12345,
            tick: 10,
        };
        let shot = ShotReport {
            shooter: UnitRef::soldier(0),
            target: FireTarget::Unit(UnitRef::soldier(1)),
            weapon: WeaponId(0),
        };
        let a = resolve_fire(&ctx, &shot).unwrap();
        let b = resolve_fire(&ctx, &shot).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.chance.map(|c| c.value.to_bits()), b.chance.map(|c| c.value.to_bits()));
    }

    #[test]
    fn test_outcome_always_suppresses_target() {
        let (store, spatial, terrain, weapons, config) = setup();
        let ctx = CombatContext {
            store: &store,
            spatial: &spatial,
            terrain: &terrain,
            weapons: &weapons,
            config: &config,
            seed: 1,
            tick: 1,
        };
        for tick in 1..20 {
            let ctx = CombatContext { tick, ..ctx };
            let shot = ShotReport {
                shooter: UnitRef::soldier(0),
                target: FireTarget::Unit(UnitRef::soldier(1)),
                weapon: WeaponId(0),
            };
            let outcome = resolve_fire(&ctx, &shot).unwrap();
            let messages = outcome_messages(&ctx, &outcome);
            assert!(messages.iter().any(|m| matches!(
                m,
                Message::AdjustSuppression { unit, .. } if *unit == UnitRef::soldier(1)
            )));
            assert!(messages.iter().any(|m| matches!(m, Message::SpawnProjectile(_))));
            let damaged = messages.iter().any(|m| matches!(m, Message::ApplyDamage { .. }));
            assert_eq!(damaged, outcome.hit.is_some());
        }
    }

    #[test]
    fn test_dead_target_not_resolved() {
        let (mut store, spatial, terrain, weapons, config) = setup();
        if let Ok(target) = store.get_mut(UnitRef::soldier(1)) {
            target.state.behavior = crate::battle::state::Behavior::Dead;
        }
        let ctx = CombatContext {
            store: &store,
            spatial: &spatial,
            terrain: &terrain,
            weapons: &weapons,
            config: &config,
            seed: 1,
            tick: 1,
        };
        let shot = ShotReport {
            shooter: UnitRef::soldier(0),
            target: FireTarget::Unit(UnitRef::soldier(1)),
            weapon: WeaponId(0),
        };
        assert!(resolve_fire(&ctx, &shot).is_none());
    }
}
