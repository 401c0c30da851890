//! Deployment input: per-unit records supplied at battle start
//!
//! Records are validated as a whole before anything is built; the first
//! malformed record fails the load and the battle does not start.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::battle::state::{derive_capabilities, implied_posture, Behavior, Gesture, Phase};
use crate::battle::units::{Health, Loadout, Unit};
use crate::battle::weapons::{WeaponCatalog, WeaponId};
use crate::battle::world::BattleWorld;
use crate::core::config::SimulationConfig;
use crate::core::error::{Result, SimError};
use crate::core::types::{Posture, Side, SoldierIndex, UnitKind, UnitRef, Vec2};
use crate::spatial::terrain::TerrainQuery;

/// Initial behavior a unit may be deployed with
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployBehavior {
    #[default]
    Idle,
    Defend { facing: f32 },
    Hide { facing: f32 },
}

/// Initial gesture a unit may be deployed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployGesture {
    #[default]
    Idle,
    /// Start the battle mid-reload
    Reloading,
}

fn default_kind() -> UnitKind {
    UnitKind::Soldier
}

fn default_max_health() -> f32 {
    100.0
}

/// One unit as supplied by the scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    #[serde(default = "default_kind")]
    pub kind: UnitKind,
    pub side: Side,
    pub position: Vec2,
    #[serde(default)]
    pub heading: f32,
    /// Scenario squad number; records sharing a number form one squad
    #[serde(default)]
    pub squad: Option<u32>,
    /// Weapon name in the catalog
    #[serde(default)]
    pub weapon: Option<String>,
    /// Rounds in the weapon; a full magazine when absent
    #[serde(default)]
    pub loaded_ammo: Option<u32>,
    /// Spare magazines carried
    #[serde(default)]
    pub magazines: u32,
    #[serde(default = "default_max_health")]
    pub max_health: f32,
    #[serde(default)]
    pub posture: Posture,
    #[serde(default)]
    pub behavior: DeployBehavior,
    #[serde(default)]
    pub gesture: DeployGesture,
}

impl DeploymentRecord {
    pub fn new(id: impl Into<String>, side: Side, position: Vec2) -> Self {
        Self {
            id: id.into(),
            kind: UnitKind::Soldier,
            side,
            position,
            heading: 0.0,
            squad: None,
            weapon: None,
            loaded_ammo: None,
            magazines: 0,
            max_health: default_max_health(),
            posture: Posture::Standing,
            behavior: DeployBehavior::Idle,
            gesture: DeployGesture::Idle,
        }
    }

    pub fn with_weapon(mut self, weapon: impl Into<String>, magazines: u32) -> Self {
        self.weapon = Some(weapon.into());
        self.magazines = magazines;
        self
    }

    pub fn in_squad(mut self, squad: u32) -> Self {
        self.squad = Some(squad);
        self
    }
}

/// Parse a JSON array of deployment records
pub fn records_from_json_str(content: &str) -> Result<Vec<DeploymentRecord>> {
    Ok(serde_json::from_str(content)?)
}

pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<DeploymentRecord>> {
    let content = fs::read_to_string(path.as_ref())?;
    records_from_json_str(&content)
}

fn invalid(record: &DeploymentRecord, reason: impl Into<String>) -> SimError {
    let reason = reason.into();
    warn!(record = %record.id, %reason, "deployment rejected");
    SimError::InvalidDeployment {
        record: record.id.clone(),
        reason,
    }
}

/// Check one record against the catalog and terrain; returns its weapon
fn validate(
    record: &DeploymentRecord,
    weapons: &WeaponCatalog,
    terrain: &dyn TerrainQuery,
) -> Result<Option<WeaponId>> {
    if record.id.trim().is_empty() {
        return Err(invalid(record, "empty identifier"));
    }
    if !record.position.is_finite() || !record.heading.is_finite() {
        return Err(invalid(record, "non-finite position or heading"));
    }
    let tile = terrain.tile_at(record.position);
    if !terrain.in_bounds(tile) {
        return Err(invalid(record, format!("position {:?} is off the map", record.position)));
    }
    if !terrain.is_passable_for(tile, record.kind) {
        return Err(invalid(record, format!("position {:?} is impassable", record.position)));
    }
    if !record.max_health.is_finite() || record.max_health <= 0.0 {
        return Err(invalid(record, format!("max_health {} must be positive", record.max_health)));
    }
    if record.kind == UnitKind::Vehicle {
        if record.posture != Posture::Standing {
            return Err(invalid(record, "vehicles have no posture"));
        }
        if record.squad.is_some() {
            return Err(invalid(record, "vehicles cannot join squads"));
        }
    }
    match record.behavior {
        DeployBehavior::Defend { facing } | DeployBehavior::Hide { facing }
            if !facing.is_finite() =>
        {
            return Err(invalid(record, "non-finite facing"));
        }
        _ => {}
    }

    let Some(name) = &record.weapon else {
        if record.loaded_ammo.is_some() || record.magazines > 0 {
            return Err(invalid(record, "ammunition without a weapon"));
        }
        if record.gesture == DeployGesture::Reloading {
            return Err(invalid(record, "cannot reload without a weapon"));
        }
        return Ok(None);
    };

    let id = weapons
        .lookup(name)
        .map_err(|_| invalid(record, format!("unknown weapon '{}'", name)))?;
    let definition = weapons.get(id)?;
    let loaded = record.loaded_ammo.unwrap_or(definition.magazine_size);
    if loaded > definition.magazine_size {
        return Err(invalid(
            record,
            format!(
                "loaded_ammo {} exceeds magazine size {}",
                loaded, definition.magazine_size
            ),
        ));
    }
    if record.gesture == DeployGesture::Reloading
        && (record.magazines == 0 || loaded >= definition.magazine_size)
    {
        return Err(invalid(record, "reload needs a spare magazine and room in the weapon"));
    }
    Ok(Some(id))
}

fn build_unit(
    record: &DeploymentRecord,
    weapon: Option<WeaponId>,
    weapons: &WeaponCatalog,
    config: &SimulationConfig,
) -> Result<Unit> {
    let mut unit = Unit::new(record.id.clone(), record.kind, record.side, record.position);
    unit.heading = record.heading;
    unit.health = Health::new(record.max_health);
    unit.morale = config.morale_max;
    unit.posture = record.posture;

    let behavior = match record.behavior {
        DeployBehavior::Idle => Behavior::Idle(record.posture),
        DeployBehavior::Defend { facing } => Behavior::Defend(facing),
        DeployBehavior::Hide { facing } => Behavior::Hide(facing),
    };
    if record.kind == UnitKind::Soldier {
        if let Some(posture) = implied_posture(&behavior) {
            unit.posture = posture;
        }
    }
    unit.state.behavior = behavior;
    unit.state.phase = Phase::Deployment;

    if let Some(id) = weapon {
        let definition = weapons.get(id)?;
        unit.loadout = Some(Loadout {
            weapon: id,
            rounds: record.loaded_ammo.unwrap_or(definition.magazine_size),
            magazine_size: definition.magazine_size,
            spare_magazines: record.magazines,
        });
        if record.gesture == DeployGesture::Reloading {
            unit.state.gesture = Gesture::Reloading {
                end_tick: definition.reload_ticks(config.ticks_per_second),
            };
        }
    }

    unit.state.capabilities = derive_capabilities(&unit);
    Ok(unit)
}

fn first_soldier(members: &[UnitRef]) -> Option<SoldierIndex> {
    members.iter().find_map(|r| match r {
        UnitRef::Soldier(index) => Some(*index),
        UnitRef::Vehicle(_) => None,
    })
}

/// Validate every record and build the initial world
///
/// Squads are created in ascending squad-number order; members keep record
/// order and the first member leads.
pub fn deploy(
    records: &[DeploymentRecord],
    weapons: &WeaponCatalog,
    terrain: &dyn TerrainQuery,
    config: &SimulationConfig,
) -> Result<BattleWorld> {
    let mut seen: AHashSet<&str> = AHashSet::with_capacity(records.len());
    let mut loadouts = Vec::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.id.as_str()) {
            return Err(invalid(record, "duplicate identifier"));
        }
        loadouts.push(validate(record, weapons, terrain)?);
    }

    let mut squad_members: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        if let Some(number) = record.squad {
            squad_members.entry(number).or_default().push(i);
        }
    }
    for members in squad_members.values() {
        let side = records[members[0]].side;
        if let Some(&other) = members.iter().find(|&&i| records[i].side != side) {
            return Err(invalid(&records[other], "squad mixes sides"));
        }
    }

    let mut world = BattleWorld::new();
    world.phase = Phase::Deployment;
    let mut refs: Vec<UnitRef> = Vec::with_capacity(records.len());
    for (record, weapon) in records.iter().zip(loadouts) {
        let unit = build_unit(record, weapon, weapons, config)?;
        refs.push(world.store.create(record.kind, unit));
    }

    for members in squad_members.values() {
        let side = records[members[0]].side;
        let id = world.squads.create(side);
        let member_refs: Vec<UnitRef> = members.iter().map(|&i| refs[i]).collect();
        for member in &member_refs {
            if let Ok(unit) = world.store.get_mut(*member) {
                unit.squad = Some(id);
            }
        }
        if let Some(squad) = world.squads.get_mut(id) {
            squad.leader = first_soldier(&member_refs);
            squad.members = member_refs;
        }
    }

    info!(
        units = world.store.len(),
        squads = world.squads.len(),
        "deployment accepted"
    );
    Ok(world)
}
