//! The decision system's read-only view of the battle
//!
//! Everything a decision needs is borrowed here; nothing is mutated.

use crate::battle::constants::{COVER_IMPROVEMENT_THRESHOLD, COVER_SEARCH_RADIUS};
use crate::battle::perception::SensoryData;
use crate::battle::store::EntityStore;
use crate::battle::units::Unit;
use crate::battle::weapons::{WeaponCatalog, WeaponDefinition};
use crate::core::config::SimulationConfig;
use crate::core::types::{Posture, Tick, UnitRef, Vec2};
use crate::spatial::terrain::{TerrainQuery, TileCoord};

/// AI's decision-making context
pub struct DecisionContext<'a> {
    pub store: &'a EntityStore,
    pub terrain: &'a dyn TerrainQuery,
    pub weapons: &'a WeaponCatalog,
    pub config: &'a SimulationConfig,
    pub seed: u64,
    pub tick: Tick,
}

impl<'a> DecisionContext<'a> {
    /// Weapon definition for the unit's loadout, if any
    pub fn weapon_of(&self, unit: &Unit) -> Option<&'a WeaponDefinition> {
        let loadout = unit.loadout.as_ref()?;
        self.weapons.get(loadout.weapon).ok()
    }

    /// Target still exists and is still fighting
    pub fn is_live_target(&self, target: UnitRef) -> bool {
        self.store.get(target).is_ok_and(|u| u.is_active())
    }

    /// Units decide on a staggered cadence, or at once when in danger
    pub fn is_decision_tick(&self, unit_ref: UnitRef, sensory: &SensoryData) -> bool {
        let interval = self.config.decision_interval.max(1);
        let slot = unit_ref.slot() as u64;
        (self.tick + slot) % interval == 0
            || sensory.is_under_fire(self.config.under_fire_danger_threshold)
    }

    /// Best nearby tile whose prone cover clearly beats the current tile
    ///
    /// Tiles are scanned row by row; ties keep the nearest, then the first
    /// scanned, so the choice is deterministic.
    pub fn find_cover(&self, unit: &Unit) -> Option<Vec2> {
        let terrain = self.terrain;
        let here = terrain.tile_at(unit.position);
        let current = terrain.cover_value(here, Posture::Prone);

        let mut best: Option<(f32, f32, TileCoord)> = None;
        for dy in -COVER_SEARCH_RADIUS..=COVER_SEARCH_RADIUS {
            for dx in -COVER_SEARCH_RADIUS..=COVER_SEARCH_RADIUS {
                let tile = TileCoord::new(here.x + dx, here.y + dy);
                if tile == here
                    || !terrain.in_bounds(tile)
                    || !terrain.is_passable_for(tile, unit.kind)
                {
                    continue;
                }
                let cover = terrain.cover_value(tile, Posture::Prone);
                if cover < current + COVER_IMPROVEMENT_THRESHOLD {
                    continue;
                }
                let distance = here.octile_distance(&tile);
                let better = match best {
                    None => true,
                    Some((best_cover, best_distance, _)) => {
                        cover > best_cover || (cover == best_cover && distance < best_distance)
                    }
                };
                if better {
                    best = Some((cover, distance, tile));
                }
            }
        }

        best.map(|(_, _, tile)| terrain.tile_center(tile))
    }

    /// Point `flee_distance` away from the threat, kept inside the map
    pub fn flee_point(&self, unit: &Unit, threat: Vec2) -> Vec2 {
        let away = (unit.position - threat).normalize();
        let away = if away == Vec2::default() {
            Vec2::new(-unit.heading.cos(), -unit.heading.sin())
        } else {
            away
        };
        let target = unit.position + away * self.config.flee_distance;

        let size = self.terrain.tile_size();
        let max_x = self.terrain.width() as f32 * size - size * 0.5;
        let max_y = self.terrain.height() as f32 * size - size * 0.5;
        Vec2::new(
            target.x.clamp(size * 0.5, max_x.max(size * 0.5)),
            target.y.clamp(size * 0.5, max_y.max(size * 0.5)),
        )
    }
}
