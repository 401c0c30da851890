//! Entity store: dense per-kind unit pools addressed by typed indices
//!
//! Removal is swap-remove: the last unit of the pool moves into the freed
//! slot. Every removal returns an [`IndexRemap`] that holders of unit
//! references must apply before the end of the tick.

use serde::{Deserialize, Serialize};

use crate::battle::units::Unit;
use crate::core::error::{Result, SimError};
use crate::core::types::{SoldierIndex, UnitKind, UnitRef, VehicleIndex};

/// Published on swap-removal
///
/// `removed` no longer refers to the unit it used to. If `moved_from` is
/// set, the unit formerly at `moved_from` now lives at `removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRemap {
    pub removed: UnitRef,
    pub moved_from: Option<UnitRef>,
}

impl IndexRemap {
    /// Translate a reference taken before the removal
    ///
    /// Returns `None` if the reference pointed at the removed unit.
    pub fn remap(&self, unit: UnitRef) -> Option<UnitRef> {
        if unit == self.removed {
            None
        } else if Some(unit) == self.moved_from {
            Some(self.removed)
        } else {
            Some(unit)
        }
    }
}

/// Dense storage for all units in a battle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStore {
    soldiers: Vec<Unit>,
    vehicles: Vec<Unit>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self, kind: UnitKind) -> &Vec<Unit> {
        match kind {
            UnitKind::Soldier => &self.soldiers,
            UnitKind::Vehicle => &self.vehicles,
        }
    }

    fn pool_mut(&mut self, kind: UnitKind) -> &mut Vec<Unit> {
        match kind {
            UnitKind::Soldier => &mut self.soldiers,
            UnitKind::Vehicle => &mut self.vehicles,
        }
    }

    fn make_ref(kind: UnitKind, slot: usize) -> UnitRef {
        match kind {
            UnitKind::Soldier => UnitRef::Soldier(SoldierIndex(slot as u32)),
            UnitKind::Vehicle => UnitRef::Vehicle(VehicleIndex(slot as u32)),
        }
    }

    /// Append a unit to its kind's pool
    pub fn create(&mut self, kind: UnitKind, mut unit: Unit) -> UnitRef {
        unit.kind = kind;
        let pool = self.pool_mut(kind);
        pool.push(unit);
        Self::make_ref(kind, pool.len() - 1)
    }

    pub fn get(&self, unit: UnitRef) -> Result<&Unit> {
        self.pool(unit.kind())
            .get(unit.slot())
            .ok_or(SimError::InvalidIndex(unit))
    }

    pub(crate) fn get_mut(&mut self, unit: UnitRef) -> Result<&mut Unit> {
        self.pool_mut(unit.kind())
            .get_mut(unit.slot())
            .ok_or(SimError::InvalidIndex(unit))
    }

    pub fn soldier(&self, index: SoldierIndex) -> Result<&Unit> {
        self.get(UnitRef::Soldier(index))
    }

    pub fn vehicle(&self, index: VehicleIndex) -> Result<&Unit> {
        self.get(UnitRef::Vehicle(index))
    }

    pub fn contains(&self, unit: UnitRef) -> bool {
        unit.slot() < self.pool(unit.kind()).len()
    }

    /// Swap-remove a unit, returning the remap every holder must apply
    pub fn remove(&mut self, unit: UnitRef) -> Result<IndexRemap> {
        let kind = unit.kind();
        let slot = unit.slot();
        let pool = self.pool_mut(kind);
        if slot >= pool.len() {
            return Err(SimError::InvalidIndex(unit));
        }
        let last = pool.len() - 1;
        pool.swap_remove(slot);
        let moved_from = (slot != last).then(|| Self::make_ref(kind, last));
        Ok(IndexRemap {
            removed: unit,
            moved_from,
        })
    }

    pub fn soldier_count(&self) -> usize {
        self.soldiers.len()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn len(&self) -> usize {
        self.soldiers.len() + self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All units in index order: soldiers, then vehicles
    pub fn iter(&self) -> impl Iterator<Item = (UnitRef, &Unit)> {
        let soldiers = self
            .soldiers
            .iter()
            .enumerate()
            .map(|(i, u)| (Self::make_ref(UnitKind::Soldier, i), u));
        let vehicles = self
            .vehicles
            .iter()
            .enumerate()
            .map(|(i, u)| (Self::make_ref(UnitKind::Vehicle, i), u));
        soldiers.chain(vehicles)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Unit> {
        self.soldiers.iter_mut().chain(self.vehicles.iter_mut())
    }

    /// Snapshot of all live references, in index order
    pub fn refs(&self) -> Vec<UnitRef> {
        self.iter().map(|(r, _)| r).collect()
    }

    /// Look up a unit by its external identifier
    pub fn find_by_id(&self, id: &str) -> Option<UnitRef> {
        self.iter().find(|(_, u)| u.id == id).map(|(r, _)| r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Side, Vec2};

    fn store_with(n: usize) -> EntityStore {
        let mut store = EntityStore::new();
        for i in 0..n {
            let unit =
                Unit::new(format!("s{}", i), UnitKind::Soldier, Side::Attacker, Vec2::default());
            store.create(UnitKind::Soldier, unit);
        }
        store
    }

    #[test]
    fn test_create_returns_dense_indices() {
        let mut store = store_with(3);
        assert_eq!(store.refs(), vec![
            UnitRef::soldier(0),
            UnitRef::soldier(1),
            UnitRef::soldier(2),
        ]);
        let v = store.create(
            UnitKind::Vehicle,
            Unit::new("v0", UnitKind::Vehicle, Side::Defender, Vec2::default()),
        );
        assert_eq!(v, UnitRef::vehicle(0));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_create_forces_kind() {
        let mut store = EntityStore::new();
        let r = store.create(
            UnitKind::Vehicle,
            Unit::new("x", UnitKind::Soldier, Side::Attacker, Vec2::default()),
        );
        assert_eq!(store.get(r).map(|u| u.kind).ok(), Some(UnitKind::Vehicle));
    }

    #[test]
    fn test_get_invalid_index() {
        let store = store_with(2);
        assert!(matches!(
            store.get(UnitRef::soldier(5)),
            Err(SimError::InvalidIndex(r)) if r == UnitRef::soldier(5)
        ));
        assert!(store.get(UnitRef::vehicle(0)).is_err());
    }

    #[test]
    fn test_swap_remove_moves_last_into_slot() {
        let mut store = store_with(4);
        let remap = store.remove(UnitRef::soldier(1)).unwrap();
        assert_eq!(remap.removed, UnitRef::soldier(1));
        assert_eq!(remap.moved_from, Some(UnitRef::soldier(3)));
        assert_eq!(store.soldier_count(), 3);
        assert_eq!(store.get(UnitRef::soldier(1)).unwrap().id, "s3");
        assert!(store.get(UnitRef::soldier(3)).is_err());
    }

    #[test]
    fn test_remove_last_has_no_move() {
        let mut store = store_with(2);
        let remap = store.remove(UnitRef::soldier(1)).unwrap();
        assert_eq!(remap.moved_from, None);
        assert_eq!(store.soldier_count(), 1);
    }

    #[test]
    fn test_remap_translation() {
        let remap = IndexRemap {
            removed: UnitRef::soldier(1),
            moved_from: Some(UnitRef::soldier(3)),
        };
        assert_eq!(remap.remap(UnitRef::soldier(1)), None);
        assert_eq!(remap.remap(UnitRef::soldier(3)), Some(UnitRef::soldier(1)));
        assert_eq!(remap.remap(UnitRef::soldier(0)), Some(UnitRef::soldier(0)));
        assert_eq!(remap.remap(UnitRef::vehicle(1)), Some(UnitRef::vehicle(1)));
    }

    #[test]
    fn test_find_by_id() {
        let store = store_with(3);
        assert_eq!(store.find_by_id("s2"), Some(UnitRef::soldier(2)));
        assert_eq!(store.find_by_id("nobody"), None);
    }
}
