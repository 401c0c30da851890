//! Per-unit perception: visible enemies, remembered contacts, under-fire level
//!
//! Line of sight accumulates terrain opacity tile by tile along the sight
//! line and fails once the total reaches the configured threshold.

use serde::{Deserialize, Serialize};

use crate::battle::store::{EntityStore, IndexRemap};
use crate::battle::units::Unit;
use crate::core::config::SimulationConfig;
use crate::core::types::{Tick, UnitRef, Vec2};
use crate::spatial::sparse_hash::SpatialIndex;
use crate::spatial::terrain::TerrainQuery;

/// Last known whereabouts of an enemy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub unit: UnitRef,
    pub last_known: Vec2,
    pub seen_at: Tick,
}

/// What a unit carries between ticks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensoryMemory {
    /// Sorted by unit reference
    pub contacts: Vec<Contact>,
    /// Scalar in `0..=1`; raised by near misses, decays each tick
    pub under_fire: f32,
}

impl SensoryMemory {
    pub fn contact(&self, unit: UnitRef) -> Option<&Contact> {
        self.contacts
            .binary_search_by_key(&unit, |c| c.unit)
            .ok()
            .map(|i| &self.contacts[i])
    }

    pub fn apply_remap(&mut self, remap: &IndexRemap) {
        self.contacts.retain_mut(|contact| match remap.remap(contact.unit) {
            Some(moved) => {
                contact.unit = moved;
                true
            }
            None => false,
        });
        self.contacts.sort_by_key(|c| c.unit);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisibleEnemy {
    pub unit: UnitRef,
    pub position: Vec2,
    pub distance: f32,
}

/// Output of one perception pass for one unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensoryData {
    /// Sorted by unit reference
    pub visible: Vec<VisibleEnemy>,
    pub memory: SensoryMemory,
}

impl SensoryData {
    /// Closest visible enemy; lowest reference wins ties
    pub fn nearest_enemy(&self) -> Option<&VisibleEnemy> {
        self.visible.iter().min_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.unit.cmp(&b.unit))
        })
    }

    /// Closest visible enemy within `range`
    pub fn nearest_enemy_within(&self, range: f32) -> Option<&VisibleEnemy> {
        self.nearest_enemy().filter(|e| e.distance <= range)
    }

    pub fn can_see(&self, unit: UnitRef) -> bool {
        self.visible
            .binary_search_by_key(&unit, |e| e.unit)
            .is_ok()
    }

    pub fn is_under_fire(&self, threshold: f32) -> bool {
        self.memory.under_fire >= threshold
    }

    /// Direction of the most pressing threat: nearest visible enemy, else
    /// the most recent contact
    pub fn threat_position(&self) -> Option<Vec2> {
        if let Some(enemy) = self.nearest_enemy() {
            return Some(enemy.position);
        }
        self.memory
            .contacts
            .iter()
            .max_by(|a, b| a.seen_at.cmp(&b.seen_at).then_with(|| b.unit.cmp(&a.unit)))
            .map(|c| c.last_known)
    }
}

/// Total opacity between two points
///
/// Each distinct tile crossed contributes once; the endpoints' own tiles do
/// not count. Endpoints are put in a canonical order first so the result is
/// the same whichever side looks.
pub fn sight_opacity(terrain: &dyn TerrainQuery, a: Vec2, b: Vec2, sample_step: f32) -> f32 {
    let (from, to) = if (a.x, a.y) <= (b.x, b.y) { (a, b) } else { (b, a) };
    let start_tile = terrain.tile_at(from);
    let end_tile = terrain.tile_at(to);
    if start_tile == end_tile {
        return 0.0;
    }

    let step = (sample_step * terrain.tile_size()).max(f32::EPSILON);
    let distance = from.distance(&to);
    let samples = (distance / step).ceil().max(1.0) as u32;

    let mut total = 0.0;
    let mut last_tile = start_tile;
    for i in 1..samples {
        let t = i as f32 / samples as f32;
        let tile = terrain.tile_at(from + (to - from) * t);
        if tile == last_tile {
            continue;
        }
        last_tile = tile;
        if tile == end_tile || tile == start_tile {
            continue;
        }
        total += terrain.opacity(tile);
    }
    total
}

pub fn line_of_sight(
    terrain: &dyn TerrainQuery,
    a: Vec2,
    b: Vec2,
    config: &SimulationConfig,
) -> bool {
    sight_opacity(terrain, a, b, config.los_sample_step) < config.los_opacity_threshold
}

/// Read-only inputs for a perception pass
pub struct PerceptionContext<'a> {
    pub store: &'a EntityStore,
    pub spatial: &'a SpatialIndex,
    pub terrain: &'a dyn TerrainQuery,
    pub config: &'a SimulationConfig,
    pub tick: Tick,
}

/// Compute a unit's sensory data for this tick
///
/// Pure: reads the unit's previous memory and the world, returns the new
/// data. The caller turns `memory` into an `UpdateSensory` message.
pub fn update(ctx: &PerceptionContext<'_>, observer: &Unit) -> SensoryData {
    let config = ctx.config;
    let mut visible = Vec::new();

    if observer.is_active() {
        for other_ref in ctx.spatial.query_radius(observer.position, config.sensor_radius) {
            let Ok(other) = ctx.store.get(other_ref) else {
                continue;
            };
            if other.side == observer.side || !other.is_active() {
                continue;
            }
            if !line_of_sight(ctx.terrain, observer.position, other.position, config) {
                continue;
            }
            visible.push(VisibleEnemy {
                unit: other_ref,
                position: other.position,
                distance: observer.position.distance(&other.position),
            });
        }
    }

    // query_radius already returns sorted references
    let mut contacts: Vec<Contact> = visible
        .iter()
        .map(|e| Contact {
            unit: e.unit,
            last_known: e.position,
            seen_at: ctx.tick,
        })
        .collect();
    for old in &observer.memory.contacts {
        let expired = ctx.tick.saturating_sub(old.seen_at) > config.contact_memory_ticks;
        let still_threat = ctx.store.get(old.unit).map(|u| u.is_active()).unwrap_or(false);
        let seen_now = visible.binary_search_by_key(&old.unit, |e| e.unit).is_ok();
        if !expired && still_threat && !seen_now {
            contacts.push(*old);
        }
    }
    contacts.sort_by_key(|c| c.unit);

    let under_fire = (observer.memory.under_fire - config.under_fire_decay_per_tick).max(0.0);

    SensoryData {
        visible,
        memory: SensoryMemory {
            contacts,
            under_fire,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Side, UnitKind};
    use crate::spatial::terrain::{GridTerrain, TerrainKind, TileCoord};

    #[test]
    fn test_clear_line_of_sight() {
        let terrain = GridTerrain::new(20, 20, 1.0);
        let config = SimulationConfig::default();
        assert!(line_of_sight(&terrain, Vec2::new(0.5, 0.5), Vec2::new(15.5, 10.5), &config));
    }

    #[test]
    fn test_building_blocks_sight() {
        let mut terrain = GridTerrain::new(20, 3, 1.0);
        terrain.set(TileCoord::new(10, 1), TerrainKind::Building);
        let config = SimulationConfig::default();
        assert!(!line_of_sight(&terrain, Vec2::new(0.5, 1.5), Vec2::new(19.5, 1.5), &config));
    }

    #[test]
    fn test_woods_accumulate() {
        let mut terrain = GridTerrain::new(20, 3, 1.0);
        let config = SimulationConfig::default();
        let a = Vec2::new(0.5, 1.5);
        let b = Vec2::new(19.5, 1.5);

        terrain.fill(TileCoord::new(5, 1), TileCoord::new(6, 1), TerrainKind::Woods);
        assert!(line_of_sight(&terrain, a, b, &config));

        terrain.fill(TileCoord::new(5, 1), TileCoord::new(8, 1), TerrainKind::Woods);
        assert!(!line_of_sight(&terrain, a, b, &config));
    }

    #[test]
    fn test_own_tile_does_not_block() {
        let mut terrain = GridTerrain::new(10, 3, 1.0);
        terrain.set(TileCoord::new(0, 1), TerrainKind::Building);
        let config = SimulationConfig::default();
        assert!(line_of_sight(&terrain, Vec2::new(0.5, 1.5), Vec2::new(9.5, 1.5), &config));
    }

    #[test]
    fn test_sight_is_symmetric() {
        let mut terrain = GridTerrain::new(30, 30, 1.0);
        terrain.fill(TileCoord::new(10, 5), TileCoord::new(12, 20), TerrainKind::Woods);
        terrain.set(TileCoord::new(17, 14), TerrainKind::Hedge);
        let a = Vec2::new(2.3, 4.1);
        let b = Vec2::new(27.9, 22.6);
        assert_eq!(
            sight_opacity(&terrain, a, b, 0.5),
            sight_opacity(&terrain, b, a, 0.5)
        );
    }

    fn soldier(id: &str, side: Side, pos: Vec2) -> Unit {
        Unit::new(id, UnitKind::Soldier, side, pos)
    }

    #[test]
    fn test_update_sees_enemies_not_friends() {
        let terrain = GridTerrain::new(100, 100, 1.0);
        let config = SimulationConfig::default();
        let mut store = EntityStore::new();
        let me = store.create(
            UnitKind::Soldier,
            soldier("me", Side::Attacker, Vec2::new(10.0, 10.0)),
        );
        store.create(UnitKind::Soldier, soldier("friend", Side::Attacker, Vec2::new(12.0, 10.0)));
        let foe = store.create(
            UnitKind::Soldier,
            soldier("foe", Side::Defender, Vec2::new(40.0, 10.0)),
        );

        let mut spatial = SpatialIndex::new(config.grid_cell_size);
        spatial.rebuild(store.iter().map(|(r, u)| (r, u.position)));

        let ctx = PerceptionContext {
            store: &store,
            spatial: &spatial,
            terrain: &terrain,
            config: &config,
            tick: 7,
        };
        let data = update(&ctx, store.get(me).unwrap());
        assert_eq!(data.visible.len(), 1);
        assert_eq!(data.visible[0].unit, foe);
        assert_eq!(data.memory.contacts[0].seen_at, 7);
    }

    #[test]
    fn test_contacts_expire() {
        let terrain = GridTerrain::new(100, 100, 1.0);
        let config = SimulationConfig::default();
        let mut store = EntityStore::new();
        let foe = store.create(
            UnitKind::Soldier,
            soldier("foe", Side::Defender, Vec2::new(90.0, 90.0)),
        );
        let mut observer = soldier("me", Side::Attacker, Vec2::new(1.0, 1.0));
        observer.memory.contacts.push(Contact {
            unit: foe,
            last_known: Vec2::new(30.0, 30.0),
            seen_at: 0,
        });
        store.create(UnitKind::Soldier, observer.clone());

        // Sensor radius keeps the foe out of sight
        let mut config_short = config.clone();
        config_short.sensor_radius = 10.0;
        let spatial = SpatialIndex::new(config.grid_cell_size);

        let recent = PerceptionContext {
            store: &store,
            spatial: &spatial,
            terrain: &terrain,
            config: &config_short,
            tick: 100,
        };
        assert_eq!(update(&recent, &observer).memory.contacts.len(), 1);

        let late = PerceptionContext {
            tick: config.contact_memory_ticks + 1,
            ..recent
        };
        assert!(update(&late, &observer).memory.contacts.is_empty());
    }

    #[test]
    fn test_under_fire_decays() {
        let terrain = GridTerrain::new(10, 10, 1.0);
        let config = SimulationConfig::default();
        let store = EntityStore::new();
        let spatial = SpatialIndex::new(config.grid_cell_size);
        let mut observer = soldier("me", Side::Attacker, Vec2::new(1.0, 1.0));
        observer.memory.under_fire = 0.5;

        let ctx = PerceptionContext {
            store: &store,
            spatial: &spatial,
            terrain: &terrain,
            config: &config,
            tick: 1,
        };
        let data = update(&ctx, &observer);
        assert!(data.memory.under_fire < 0.5);
        assert!(data.memory.under_fire >= 0.0);
    }

    #[test]
    fn test_nearest_enemy_tie_breaks_on_index() {
        let data = SensoryData {
            visible: vec![
                VisibleEnemy {
                    unit: UnitRef::soldier(2),
                    position: Vec2::default(),
                    distance: 10.0,
                },
                VisibleEnemy {
                    unit: UnitRef::soldier(5),
                    position: Vec2::default(),
                    distance: 10.0,
                },
            ],
            memory: SensoryMemory::default(),
        };
        assert_eq!(data.nearest_enemy().map(|e| e.unit), Some(UnitRef::soldier(2)));
    }
}
