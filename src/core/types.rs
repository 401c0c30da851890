//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulation tick counter (fixed timestep)
pub type Tick = u64;

/// Handle to a soldier slot in the entity store
///
/// Valid only while the referenced slot is live. Swap-removal publishes
/// an [`IndexRemap`](crate::battle::store::IndexRemap) that every holder
/// must honor in the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SoldierIndex(pub u32);

/// Handle to a vehicle slot in the entity store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleIndex(pub u32);

/// Squad identifier (stable for the squad's lifetime, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SquadId(pub u32);

/// Reference to any unit in the store
///
/// Ordering is soldiers first, then vehicles, each by slot index.
/// The message engine relies on this ordering for its sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnitRef {
    Soldier(SoldierIndex),
    Vehicle(VehicleIndex),
}

impl UnitRef {
    pub fn soldier(index: u32) -> Self {
        UnitRef::Soldier(SoldierIndex(index))
    }

    pub fn vehicle(index: u32) -> Self {
        UnitRef::Vehicle(VehicleIndex(index))
    }

    /// Raw slot index inside the unit's pool
    pub fn slot(&self) -> usize {
        match self {
            UnitRef::Soldier(SoldierIndex(i)) => *i as usize,
            UnitRef::Vehicle(VehicleIndex(i)) => *i as usize,
        }
    }

    pub fn kind(&self) -> UnitKind {
        match self {
            UnitRef::Soldier(_) => UnitKind::Soldier,
            UnitRef::Vehicle(_) => UnitKind::Vehicle,
        }
    }

    /// Stable integer used when keying random streams
    pub fn stream_key(&self) -> u64 {
        match self {
            UnitRef::Soldier(SoldierIndex(i)) => *i as u64,
            UnitRef::Vehicle(VehicleIndex(i)) => (1u64 << 32) | *i as u64,
        }
    }
}

impl From<SoldierIndex> for UnitRef {
    fn from(index: SoldierIndex) -> Self {
        UnitRef::Soldier(index)
    }
}

impl From<VehicleIndex> for UnitRef {
    fn from(index: VehicleIndex) -> Self {
        UnitRef::Vehicle(index)
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitRef::Soldier(SoldierIndex(i)) => write!(f, "soldier#{}", i),
            UnitRef::Vehicle(VehicleIndex(i)) => write!(f, "vehicle#{}", i),
        }
    }
}

/// Kind of unit stored in the entity store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Soldier,
    Vehicle,
}

/// Side a unit fights for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    Attacker,
    Defender,
}

impl Side {
    pub fn opponent(&self) -> Side {
        match self {
            Side::Attacker => Side::Defender,
            Side::Defender => Side::Attacker,
        }
    }
}

/// Body posture; drives movement speed, cover and accuracy modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Posture {
    #[default]
    Standing,
    Crouching,
    Prone,
}

/// 2D position in world units (meters)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn distance_squared(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len > 0.0001 {
            Self { x: self.x / len, y: self.y / len }
        } else {
            Self::default()
        }
    }

    /// Heading in radians, 0 = +x axis, counter-clockwise
    pub fn heading_to(&self, other: &Self) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self { x: self.x + rhs.x, y: self.y + rhs.y }
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self { x: self.x - rhs.x, y: self.y - rhs.y }
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self { x: self.x * rhs, y: self.y * rhs }
    }
}
