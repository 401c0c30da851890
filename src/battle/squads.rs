//! Squads: leader, members, formation
//!
//! Squad ids are stable and never reused. Members are stored in
//! deployment order; leader promotion walks that order.

use serde::{Deserialize, Serialize};

use crate::battle::store::IndexRemap;
use crate::core::types::{Side, SoldierIndex, SquadId, UnitRef, Vec2};

/// Formation shape used to spread squad move orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Formation {
    #[default]
    Line,
    Column,
    Wedge,
    Staggered,
}

impl Formation {
    /// Offset of member slot `slot` relative to the squad anchor
    ///
    /// `heading` is the direction of travel (radians). Slot 0 sits on the
    /// anchor; others fan out at `spacing`.
    pub fn slot_offset(&self, slot: usize, heading: f32, spacing: f32) -> Vec2 {
        if slot == 0 {
            return Vec2::default();
        }
        // Alternate left/right: 1 -> +1, 2 -> -1, 3 -> +2, 4 -> -2 ...
        let rank = slot.div_ceil(2) as f32;
        let lateral_sign = if slot % 2 == 1 { 1.0 } else { -1.0 };

        let (lateral, back) = match self {
            Formation::Line => (lateral_sign * rank * spacing, 0.0),
            Formation::Column => (0.0, slot as f32 * spacing),
            Formation::Wedge => (lateral_sign * rank * spacing, rank * spacing),
            Formation::Staggered => (
                lateral_sign * rank * spacing,
                if slot % 2 == 1 { spacing * 0.5 } else { 0.0 },
            ),
        };

        // forward = (cos, sin), left = (-sin, cos)
        let (sin, cos) = heading.sin_cos();
        Vec2::new(
            -back * cos - lateral * sin,
            -back * sin + lateral * cos,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Squad {
    pub id: SquadId,
    pub side: Side,
    pub leader: Option<SoldierIndex>,
    pub members: Vec<UnitRef>,
    pub formation: Formation,
    pub cohesion_radius: f32,
    /// Cleared when the leader goes down; restored by promotion
    pub leader_alive: bool,
}

impl Squad {
    pub fn new(id: SquadId, side: Side) -> Self {
        Self {
            id,
            side,
            leader: None,
            members: Vec::new(),
            formation: Formation::default(),
            cohesion_radius: 30.0,
            leader_alive: true,
        }
    }

    pub fn leader_ref(&self) -> Option<UnitRef> {
        self.leader.map(UnitRef::Soldier)
    }

    pub fn is_member(&self, unit: UnitRef) -> bool {
        self.members.contains(&unit)
    }

    pub fn apply_remap(&mut self, remap: &IndexRemap) {
        self.members.retain_mut(|member| match remap.remap(*member) {
            Some(moved) => {
                *member = moved;
                true
            }
            None => false,
        });
        if let Some(leader) = self.leader {
            match remap.remap(UnitRef::Soldier(leader)) {
                Some(UnitRef::Soldier(moved)) => self.leader = Some(moved),
                _ => {
                    self.leader = None;
                    self.leader_alive = false;
                }
            }
        }
    }
}

/// All squads in a battle, kept sorted by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SquadRegistry {
    squads: Vec<Squad>,
    next_id: u32,
}

impl SquadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty squad with a fresh id
    pub fn create(&mut self, side: Side) -> SquadId {
        let id = SquadId(self.next_id);
        self.next_id += 1;
        self.squads.push(Squad::new(id, side));
        id
    }

    pub fn get(&self, id: SquadId) -> Option<&Squad> {
        self.squads
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|i| &self.squads[i])
    }

    pub(crate) fn get_mut(&mut self, id: SquadId) -> Option<&mut Squad> {
        self.squads
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(move |i| &mut self.squads[i])
    }

    pub(crate) fn remove(&mut self, id: SquadId) -> Option<Squad> {
        self.squads
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|i| self.squads.remove(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Squad> {
        self.squads.iter()
    }

    pub fn len(&self) -> usize {
        self.squads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.squads.is_empty()
    }

    pub fn apply_remap(&mut self, remap: &IndexRemap) {
        for squad in &mut self.squads {
            squad.apply_remap(remap);
        }
    }
}
