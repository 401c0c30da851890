//! Unit records: soldiers and vehicles share one shape
//!
//! A unit is plain data owned by the entity store. All mutation goes
//! through the message engine; systems only ever read units.

use serde::{Deserialize, Serialize};

use crate::battle::orders::OrderQueue;
use crate::battle::perception::SensoryMemory;
use crate::battle::state::{Capabilities, FireTarget, UnitState};
use crate::battle::store::IndexRemap;
use crate::battle::weapons::WeaponId;
use crate::core::types::{Posture, Side, SquadId, Tick, UnitKind, UnitRef, Vec2};

/// Health pool; `current` is always within `0..=max`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Health {
    current: f32,
    max: f32,
}

impl Health {
    pub fn new(max: f32) -> Self {
        let max = if max.is_finite() { max.max(0.0) } else { 0.0 };
        Self { current: max, max }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn is_alive(&self) -> bool {
        self.current > 0.0
    }

    pub fn fraction(&self) -> f32 {
        if self.max > 0.0 {
            self.current / self.max
        } else {
            0.0
        }
    }

    /// Subtract damage, clamping at zero. Negative or NaN damage is ignored.
    pub fn apply_damage(&mut self, amount: f32) {
        if amount > 0.0 {
            self.current = (self.current - amount).clamp(0.0, self.max);
        }
    }

    /// Set health directly, clamped into `0..=max`
    pub fn set(&mut self, value: f32) {
        if value.is_nan() {
            return;
        }
        self.current = value.clamp(0.0, self.max);
    }
}

/// Weapon carried by a unit and its ammunition state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loadout {
    pub weapon: WeaponId,
    /// Rounds in the loaded magazine
    pub rounds: u32,
    pub magazine_size: u32,
    pub spare_magazines: u32,
}

impl Loadout {
    pub fn is_empty(&self) -> bool {
        self.rounds == 0
    }
}

/// A soldier or vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// External identifier from the deployment record
    pub id: String,
    pub kind: UnitKind,
    pub side: Side,
    pub position: Vec2,
    /// Facing in radians
    pub heading: f32,
    pub posture: Posture,
    pub health: Health,
    pub state: UnitState,
    pub loadout: Option<Loadout>,
    pub squad: Option<SquadId>,
    pub morale: f32,
    /// Suppression in `0..=1`
    pub suppression: f32,
    pub memory: SensoryMemory,
    pub orders: OrderQueue,
    /// Target a completed aim is locked on; cleared when the behavior changes
    pub aim: Option<FireTarget>,
    pub died_at: Option<Tick>,
}

impl Unit {
    pub fn new(id: impl Into<String>, kind: UnitKind, side: Side, position: Vec2) -> Self {
        Self {
            id: id.into(),
            kind,
            side,
            position,
            heading: 0.0,
            posture: Posture::Standing,
            health: Health::new(100.0),
            state: UnitState::default(),
            loadout: None,
            squad: None,
            morale: 100.0,
            suppression: 0.0,
            memory: SensoryMemory::default(),
            orders: OrderQueue::default(),
            aim: None,
            died_at: None,
        }
    }

    /// Alive and conscious
    pub fn is_active(&self) -> bool {
        self.health.is_alive() && !self.state.behavior.is_incapacitated()
    }

    pub fn is_dead(&self) -> bool {
        self.state.behavior.is_dead()
    }

    pub fn can(&self, capability: Capabilities) -> bool {
        self.state.capabilities.contains(capability)
    }

    pub fn is_suppressed(&self, threshold: f32) -> bool {
        self.suppression >= threshold
    }

    /// Rewrite every unit reference held by this unit after a swap-removal
    pub fn apply_remap(&mut self, remap: &IndexRemap) {
        use crate::battle::state::Behavior;

        if let Behavior::EngageTarget(target) = self.state.behavior {
            match remap.remap(target) {
                Some(moved) => self.state.behavior = Behavior::EngageTarget(moved),
                None => self.state.behavior = Behavior::Idle(self.posture),
            }
        }
        if let Some(FireTarget::Unit(target)) = self.aim {
            self.aim = remap.remap(target).map(FireTarget::Unit);
        }
        self.memory.apply_remap(remap);
        self.orders.apply_remap(remap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_clamps_at_zero() {
        let mut health = Health::new(100.0);
        health.apply_damage(250.0);
        assert_eq!(health.current(), 0.0);
        assert!(!health.is_alive());
    }

    #[test]
    fn test_health_ignores_negative_damage() {
        let mut health = Health::new(100.0);
        health.apply_damage(-30.0);
        health.apply_damage(f32::NAN);
        assert_eq!(health.current(), 100.0);
    }

    #[test]
    fn test_health_set_clamps_to_max() {
        let mut health = Health::new(80.0);
        health.set(500.0);
        assert_eq!(health.current(), 80.0);
        health.set(-1.0);
        assert_eq!(health.current(), 0.0);
    }

    #[test]
    fn test_fraction() {
        let mut health = Health::new(200.0);
        health.apply_damage(50.0);
        assert!((health.fraction() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_new_unit_is_active() {
        let unit = Unit::new("a", UnitKind::Soldier, Side::Defender, Vec2::new(1.0, 2.0));
        assert!(unit.is_active());
        assert!(!unit.is_dead());
        assert_eq!(unit.posture, Posture::Standing);
    }

    #[test]
    fn test_remap_drops_engage_on_removed_target() {
        use crate::battle::state::Behavior;

        let mut unit = Unit::new("a", UnitKind::Soldier, Side::Defender, Vec2::default());
        unit.state.behavior = Behavior::EngageTarget(UnitRef::soldier(3));
        unit.apply_remap(&IndexRemap {
            removed: UnitRef::soldier(3),
            moved_from: Some(UnitRef::soldier(7)),
        });
        assert_eq!(unit.state.behavior, Behavior::Idle(Posture::Standing));
    }

    #[test]
    fn test_remap_follows_moved_target() {
        use crate::battle::state::Behavior;

        let mut unit = Unit::new("a", UnitKind::Soldier, Side::Defender, Vec2::default());
        unit.state.behavior = Behavior::EngageTarget(UnitRef::soldier(7));
        unit.aim = Some(FireTarget::Unit(UnitRef::soldier(7)));
        unit.apply_remap(&IndexRemap {
            removed: UnitRef::soldier(3),
            moved_from: Some(UnitRef::soldier(7)),
        });
        assert_eq!(unit.state.behavior, Behavior::EngageTarget(UnitRef::soldier(3)));
        assert_eq!(unit.aim, Some(FireTarget::Unit(UnitRef::soldier(3))));
    }
}
