//! Authoritative battle state: units, squads, phase and tick
//!
//! Systems get `&BattleWorld`; only the message engine gets `&mut`.

use serde::{Deserialize, Serialize};

use crate::battle::messages::ProjectileEvent;
use crate::battle::orders::Order;
use crate::battle::pathfinding::PathPlan;
use crate::battle::squads::{Squad, SquadRegistry};
use crate::battle::state::{Behavior, FireTarget, Gesture, Phase};
use crate::battle::store::{EntityStore, IndexRemap};
use crate::battle::units::Unit;
use crate::core::hash::StateHasher;
use crate::core::types::{Posture, Side, Tick, UnitKind, UnitRef, Vec2};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BattleWorld {
    pub tick: Tick,
    pub phase: Phase,
    pub store: EntityStore,
    pub squads: SquadRegistry,
    /// Shots fired during the current tick, for presentation only
    pub projectiles: Vec<ProjectileEvent>,
}

impl BattleWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit(&self, unit: UnitRef) -> Option<&Unit> {
        self.store.get(unit).ok()
    }

    pub fn squad_of(&self, unit: &Unit) -> Option<&Squad> {
        unit.squad.and_then(|id| self.squads.get(id))
    }

    /// Units able to fight, per side
    pub fn active_count(&self, side: Side) -> usize {
        self.store
            .iter()
            .filter(|(_, u)| u.side == side && u.is_active())
            .count()
    }

    /// Rewrite every stored unit reference after a swap-removal
    pub(crate) fn apply_remap(&mut self, remap: &IndexRemap) {
        for unit in self.store.iter_mut() {
            unit.apply_remap(remap);
        }
        self.squads.apply_remap(remap);
    }

    /// Order-independent fingerprint of the simulation state
    ///
    /// Units are hashed by content, not slot, and combined with a wrapping
    /// sum, so the value survives swap-removal reordering.
    pub fn state_hash(&self) -> u64 {
        let mut header = StateHasher::new();
        header.write_u64(self.tick);
        hash_phase(&mut header, &self.phase);
        header.write_u32(self.store.len() as u32);

        let mut units: u64 = 0;
        for (_, unit) in self.store.iter() {
            units = units.wrapping_add(hash_unit(unit, &self.store));
        }

        let mut squads: u64 = 0;
        for squad in self.squads.iter() {
            squads = squads.wrapping_add(hash_squad(squad, &self.store));
        }

        header.write_u64(units);
        header.write_u64(squads);
        header.finish()
    }
}

fn hash_phase(h: &mut StateHasher, phase: &Phase) {
    match phase {
        Phase::Deployment => h.write_u8(0),
        Phase::Battle => h.write_u8(1),
        Phase::Ended(None) => h.write_u8(2),
        Phase::Ended(Some(Side::Attacker)) => h.write_u8(3),
        Phase::Ended(Some(Side::Defender)) => h.write_u8(4),
    }
}

fn hash_vec2(h: &mut StateHasher, v: Vec2) {
    h.write_f32(v.x);
    h.write_f32(v.y);
}

fn hash_posture(h: &mut StateHasher, posture: Posture) {
    h.write_u8(match posture {
        Posture::Standing => 0,
        Posture::Crouching => 1,
        Posture::Prone => 2,
    });
}

/// References hash as the referenced unit's external id so the value does
/// not depend on slot numbers
fn hash_ref(h: &mut StateHasher, unit: UnitRef, store: &EntityStore) {
    match store.get(unit) {
        Ok(u) => h.write_str(&u.id),
        Err(_) => h.write_str(""),
    }
}

fn hash_path(h: &mut StateHasher, path: &PathPlan) {
    h.write_u32(path.waypoints.len() as u32);
    for p in &path.waypoints {
        hash_vec2(h, *p);
    }
    h.write_u64(path.cursor as u64);
    h.write_u64(path.computed_at);
}

fn hash_fire_target(h: &mut StateHasher, target: &FireTarget, store: &EntityStore) {
    match target {
        FireTarget::Unit(u) => {
            h.write_u8(0);
            hash_ref(h, *u, store);
        }
        FireTarget::Point(p) => {
            h.write_u8(1);
            hash_vec2(h, *p);
        }
    }
}

fn hash_order(h: &mut StateHasher, order: &Order, store: &EntityStore) {
    match order {
        Order::MoveTo(dest) => {
            h.write_u8(0);
            hash_vec2(h, *dest);
        }
        Order::MoveFastTo(dest) => {
            h.write_u8(1);
            hash_vec2(h, *dest);
        }
        Order::SneakTo(dest) => {
            h.write_u8(2);
            hash_vec2(h, *dest);
        }
        Order::Defend(facing) => {
            h.write_u8(3);
            h.write_f32(*facing);
        }
        Order::Hide(facing) => {
            h.write_u8(4);
            h.write_f32(*facing);
        }
        Order::Engage(target) => {
            h.write_u8(5);
            hash_ref(h, *target, store);
        }
        Order::SuppressArea(point) => {
            h.write_u8(6);
            hash_vec2(h, *point);
        }
        Order::Stop => h.write_u8(7),
    }
}

fn hash_unit(unit: &Unit, store: &EntityStore) -> u64 {
    let mut h = StateHasher::new();
    h.write_str(&unit.id);
    h.write_u8(match unit.kind {
        UnitKind::Soldier => 0,
        UnitKind::Vehicle => 1,
    });
    h.write_u8(match unit.side {
        Side::Attacker => 0,
        Side::Defender => 1,
    });
    hash_vec2(&mut h, unit.position);
    h.write_f32(unit.heading);
    hash_posture(&mut h, unit.posture);
    h.write_f32(unit.health.current());
    h.write_f32(unit.health.max());

    hash_phase(&mut h, &unit.state.phase);
    match &unit.state.behavior {
        Behavior::Idle(p) => {
            h.write_u8(0);
            hash_posture(&mut h, *p);
        }
        Behavior::MoveTo(plan) => {
            h.write_u8(1);
            hash_vec2(&mut h, plan.destination);
            h.write_u8(plan.pace as u8);
            hash_path(&mut h, &plan.path);
        }
        Behavior::Defend(angle) => {
            h.write_u8(2);
            h.write_f32(*angle);
        }
        Behavior::Hide(angle) => {
            h.write_u8(3);
            h.write_f32(*angle);
        }
        Behavior::EngageTarget(target) => {
            h.write_u8(4);
            hash_ref(&mut h, *target, store);
        }
        Behavior::SuppressArea(point) => {
            h.write_u8(5);
            hash_vec2(&mut h, *point);
        }
        Behavior::Unconscious => h.write_u8(6),
        Behavior::Dead => h.write_u8(7),
    }
    match unit.state.gesture {
        Gesture::Idle => h.write_u8(0),
        Gesture::Reloading { end_tick } => {
            h.write_u8(1);
            h.write_u64(end_tick);
        }
        Gesture::Aiming { end_tick } => {
            h.write_u8(2);
            h.write_u64(end_tick);
        }
        Gesture::Firing { end_tick } => {
            h.write_u8(3);
            h.write_u64(end_tick);
        }
    }
    h.write_u32(unit.state.capabilities.bits());

    match &unit.loadout {
        Some(l) => {
            h.write_u8(1);
            h.write_u32(u32::from(l.weapon.0));
            h.write_u32(l.rounds);
            h.write_u32(l.magazine_size);
            h.write_u32(l.spare_magazines);
        }
        None => h.write_u8(0),
    }
    h.write_u32(unit.squad.map(|s| s.0 + 1).unwrap_or(0));
    h.write_f32(unit.morale);
    h.write_f32(unit.suppression);
    h.write_f32(unit.memory.under_fire);
    h.write_u32(unit.memory.contacts.len() as u32);
    for contact in &unit.memory.contacts {
        hash_ref(&mut h, contact.unit, store);
        hash_vec2(&mut h, contact.last_known);
        h.write_u64(contact.seen_at);
    }
    h.write_u32(unit.orders.len() as u32);
    for order in unit.orders.iter() {
        hash_order(&mut h, order, store);
    }
    match &unit.aim {
        Some(target) => {
            h.write_u8(1);
            hash_fire_target(&mut h, target, store);
        }
        None => h.write_u8(0),
    }
    h.write_u64(unit.died_at.map(|t| t + 1).unwrap_or(0));
    h.finish()
}

fn hash_squad(squad: &Squad, store: &EntityStore) -> u64 {
    let mut h = StateHasher::new();
    h.write_u32(squad.id.0);
    h.write_bool(squad.leader_alive);
    match squad.leader_ref() {
        Some(leader) => hash_ref(&mut h, leader, store),
        None => h.write_str(""),
    }
    h.write_u32(squad.members.len() as u32);
    for member in &squad.members {
        hash_ref(&mut h, *member, store);
    }
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::orders::OrderMode;

    fn world_with(ids: &[&str]) -> BattleWorld {
        let mut world = BattleWorld::new();
        for (i, id) in ids.iter().enumerate() {
            let unit = Unit::new(*id, UnitKind::Soldier, Side::Attacker, Vec2::new(i as f32, 0.0));
            world.store.create(UnitKind::Soldier, unit);
        }
        world
    }

    #[test]
    fn test_hash_is_stable() {
        let a = world_with(&["a", "b", "c"]);
        let b = world_with(&["a", "b", "c"]);
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn test_hash_ignores_slot_order() {
        let mut a = BattleWorld::new();
        let mut b = BattleWorld::new();
        let u1 = Unit::new("x", UnitKind::Soldier, Side::Attacker, Vec2::new(1.0, 0.0));
        let u2 = Unit::new("y", UnitKind::Soldier, Side::Defender, Vec2::new(2.0, 0.0));
        a.store.create(UnitKind::Soldier, u1.clone());
        a.store.create(UnitKind::Soldier, u2.clone());
        b.store.create(UnitKind::Soldier, u2);
        b.store.create(UnitKind::Soldier, u1);
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn test_hash_changes_with_state() {
        let a = world_with(&["a", "b"]);
        let mut b = a.clone();
        if let Ok(unit) = b.store.get_mut(UnitRef::soldier(1)) {
            unit.suppression = 0.1;
        }
        assert_ne!(a.state_hash(), b.state_hash());

        let mut c = a.clone();
        c.tick = 1;
        assert_ne!(a.state_hash(), c.state_hash());
    }

    #[test]
    fn test_hash_covers_queued_order_contents() {
        let mut a = world_with(&["a", "b"]);
        let mut b = a.clone();
        for (world, dest) in [(&mut a, Vec2::new(10.0, 0.0)), (&mut b, Vec2::new(10.0, 5.0))] {
            if let Ok(unit) = world.store.get_mut(UnitRef::soldier(0)) {
                unit.orders.issue(Order::MoveTo(dest), OrderMode::Append);
            }
        }
        assert_ne!(a.state_hash(), b.state_hash());

        let mut c = a.clone();
        if let Ok(unit) = c.store.get_mut(UnitRef::soldier(0)) {
            unit.orders.issue(Order::SneakTo(Vec2::new(10.0, 0.0)), OrderMode::Replace);
        }
        assert_ne!(a.state_hash(), c.state_hash());
    }

    #[test]
    fn test_active_count() {
        let mut world = world_with(&["a", "b"]);
        if let Ok(unit) = world.store.get_mut(UnitRef::soldier(0)) {
            unit.state.behavior = Behavior::Dead;
        }
        assert_eq!(world.active_count(Side::Attacker), 1);
        assert_eq!(world.active_count(Side::Defender), 0);
    }
}
