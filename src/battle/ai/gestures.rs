//! Fire cycle: aim, fire, reload
//!
//! Runs every tick for units whose behavior has a fire target and whose
//! hands are free. Timing lives in the gesture's end tick; the effect is
//! applied by the message engine when the gesture completes.

use crate::battle::ai::context::DecisionContext;
use crate::battle::messages::Message;
use crate::battle::state::{Capabilities, FireTarget, Gesture};
use crate::battle::units::Unit;
use crate::core::types::UnitRef;

/// Next gesture in the fire cycle, if one should start now
pub fn gesture_step(ctx: &DecisionContext<'_>, unit_ref: UnitRef, unit: &Unit) -> Option<Message> {
    if !unit.is_active() || !unit.state.gesture.is_idle() {
        return None;
    }
    let target = unit.state.behavior.fire_target()?;
    if let FireTarget::Unit(target) = target {
        if !ctx.is_live_target(target) {
            return None;
        }
    }
    let loadout = unit.loadout.as_ref()?;
    let weapon = ctx.weapon_of(unit)?;
    let tps = ctx.config.ticks_per_second;

    let gesture = if loadout.rounds == 0 {
        if !unit.can(Capabilities::CAN_RELOAD) {
            return None;
        }
        Gesture::Reloading {
            end_tick: ctx.tick + weapon.reload_ticks(tps),
        }
    } else if !unit.can(Capabilities::CAN_FIRE) {
        return None;
    } else if unit.aim == Some(target) {
        Gesture::Firing {
            end_tick: ctx.tick + weapon.fire_interval_ticks(tps),
        }
    } else {
        Gesture::Aiming {
            end_tick: ctx.tick + ctx.config.aim_ticks.max(1),
        }
    };

    Some(Message::SetGesture {
        unit: unit_ref,
        gesture,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::state::{derive_capabilities, Behavior, Phase};
    use crate::battle::store::EntityStore;
    use crate::battle::units::Loadout;
    use crate::battle::weapons::{WeaponCatalog, WeaponId};
    use crate::core::config::SimulationConfig;
    use crate::core::types::{Side, UnitKind, Vec2};
    use crate::spatial::terrain::GridTerrain;

    fn setup(rounds: u32) -> EntityStore {
        let mut store = EntityStore::new();
        let mut shooter = Unit::new("a", UnitKind::Soldier, Side::Attacker, Vec2::new(1.0, 1.0));
        shooter.loadout = Some(Loadout {
            weapon: WeaponId(0),
            rounds,
            magazine_size: 10,
            spare_magazines: 1,
        });
        shooter.state.phase = Phase::Battle;
        shooter.state.behavior = Behavior::EngageTarget(UnitRef::soldier(1));
        shooter.state.capabilities = derive_capabilities(&shooter);
        store.create(UnitKind::Soldier, shooter);
        store.create(
            UnitKind::Soldier,
            Unit::new("b", UnitKind::Soldier, Side::Defender, Vec2::new(30.0, 1.0)),
        );
        store
    }

    fn step(store: &EntityStore, tick: u64) -> Option<Message> {
        let terrain = GridTerrain::new(40, 4, 1.0);
        let weapons = WeaponCatalog::standard();
        let config = SimulationConfig::default();
        let ctx = DecisionContext {
            store,
            terrain: &terrain,
            weapons: &weapons,
            config: &config,
            seed: 1,
            tick,
        };
        let unit = store.get(UnitRef::soldier(0)).unwrap();
        gesture_step(&ctx, UnitRef::soldier(0), unit)
    }

    #[test]
    fn test_aims_before_first_shot() {
        let store = setup(10);
        assert_eq!(
            step(&store, 100),
            Some(Message::SetGesture {
                unit: UnitRef::soldier(0),
                gesture: Gesture::Aiming { end_tick: 120 },
            })
        );
    }

    #[test]
    fn test_fires_once_aimed() {
        let mut store = setup(10);
        if let Ok(u) = store.get_mut(UnitRef::soldier(0)) {
            u.aim = Some(FireTarget::Unit(UnitRef::soldier(1)));
        }
        // Rifle: 60 rpm at 60 ticks per second
        assert_eq!(
            step(&store, 100),
            Some(Message::SetGesture {
                unit: UnitRef::soldier(0),
                gesture: Gesture::Firing { end_tick: 160 },
            })
        );
    }

    #[test]
    fn test_reloads_when_empty() {
        let store = setup(0);
        assert_eq!(
            step(&store, 100),
            Some(Message::SetGesture {
                unit: UnitRef::soldier(0),
                gesture: Gesture::Reloading { end_tick: 280 },
            })
        );
    }

    #[test]
    fn test_busy_hands_wait() {
        let mut store = setup(10);
        if let Ok(u) = store.get_mut(UnitRef::soldier(0)) {
            u.state.gesture = Gesture::Aiming { end_tick: 200 };
        }
        assert_eq!(step(&store, 100), None);
    }

    #[test]
    fn test_dead_target_not_engaged() {
        let mut store = setup(10);
        if let Ok(u) = store.get_mut(UnitRef::soldier(1)) {
            u.state.behavior = Behavior::Dead;
        }
        assert_eq!(step(&store, 100), None);
    }
}
