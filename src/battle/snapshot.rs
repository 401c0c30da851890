//! Read-only projection of the battle for presentation layers

use serde::{Deserialize, Serialize};

use crate::battle::messages::ProjectileEvent;
use crate::battle::morale::MoraleBand;
use crate::battle::state::{BehaviorTag, GestureTag, Phase};
use crate::battle::world::BattleWorld;
use crate::core::config::SimulationConfig;
use crate::core::error::Result;
use crate::core::types::{Posture, Side, SquadId, Tick, UnitKind, UnitRef, Vec2};

/// What a renderer needs to draw one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitView {
    pub unit: UnitRef,
    pub id: String,
    pub side: Side,
    pub kind: UnitKind,
    pub position: Vec2,
    pub heading: f32,
    pub posture: Posture,
    pub behavior: BehaviorTag,
    pub gesture: GestureTag,
    pub health: f32,
    pub max_health: f32,
    pub morale: MoraleBand,
    pub suppressed: bool,
    pub squad: Option<SquadId>,
    pub is_leader: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSnapshot {
    pub tick: Tick,
    pub phase: Phase,
    /// Store order: soldiers, then vehicles
    pub units: Vec<UnitView>,
    pub projectiles: Vec<ProjectileEvent>,
}

impl RenderSnapshot {
    pub fn capture(world: &BattleWorld, config: &SimulationConfig) -> Self {
        let units = world
            .store
            .iter()
            .map(|(unit_ref, unit)| {
                let is_leader = world
                    .squad_of(unit)
                    .is_some_and(|squad| squad.leader_ref() == Some(unit_ref));
                UnitView {
                    unit: unit_ref,
                    id: unit.id.clone(),
                    side: unit.side,
                    kind: unit.kind,
                    position: unit.position,
                    heading: unit.heading,
                    posture: unit.posture,
                    behavior: unit.state.behavior.tag(),
                    gesture: unit.state.gesture.tag(),
                    health: unit.health.current(),
                    max_health: unit.health.max(),
                    morale: MoraleBand::of(unit, config),
                    suppressed: unit.is_suppressed(config.suppressed_threshold),
                    squad: unit.squad,
                    is_leader,
                }
            })
            .collect();

        Self {
            tick: world.tick,
            phase: world.phase,
            units,
            projectiles: world.projectiles.clone(),
        }
    }

    pub fn unit(&self, id: &str) -> Option<&UnitView> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::units::Unit;
    use crate::core::types::SoldierIndex;

    #[test]
    fn test_capture_marks_leader() {
        let mut world = BattleWorld::new();
        let squad = world.squads.create(Side::Attacker);
        for id in ["lead", "rifle"] {
            let mut unit = Unit::new(id, UnitKind::Soldier, Side::Attacker, Vec2::new(1.0, 2.0));
            unit.squad = Some(squad);
            let r = world.store.create(UnitKind::Soldier, unit);
            if let Some(s) = world.squads.get_mut(squad) {
                s.members.push(r);
            }
        }
        if let Some(s) = world.squads.get_mut(squad) {
            s.leader = Some(SoldierIndex(0));
        }

        let snapshot = RenderSnapshot::capture(&world, &SimulationConfig::default());
        assert_eq!(snapshot.units.len(), 2);
        assert!(snapshot.unit("lead").unwrap().is_leader);
        assert!(!snapshot.unit("rifle").unwrap().is_leader);
        assert_eq!(snapshot.unit("rifle").unwrap().behavior, BehaviorTag::Idle);
        assert_eq!(snapshot.unit("rifle").unwrap().morale, MoraleBand::Steady);
    }

    #[test]
    fn test_snapshot_serializes() {
        let world = BattleWorld::new();
        let json = RenderSnapshot::capture(&world, &SimulationConfig::default())
            .to_json()
            .unwrap();
        assert!(json.contains("\"tick\":0"));
    }
}
