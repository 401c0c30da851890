//! Layered unit state: Phase / Behavior / Gesture plus derived Capabilities
//!
//! Every legal transition is checked here and nowhere else. The message
//! engine calls the `check_*` guards before mutating a unit, and
//! [`derive_capabilities`] is the single place capability bits are computed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::battle::constants::SPRINT_HEALTH_FRACTION;
use crate::battle::pathfinding::PathPlan;
use crate::battle::units::Unit;
use crate::core::types::{Posture, Side, Tick, UnitKind, UnitRef, Vec2};

/// Battle-wide phase, mirrored onto every unit for gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Deployment,
    Battle,
    /// Battle over; `None` is a draw
    Ended(Option<Side>),
}

impl Phase {
    pub fn is_ended(&self) -> bool {
        matches!(self, Phase::Ended(_))
    }

    /// Phases only move forward: Deployment -> Battle -> Ended
    pub fn can_advance_to(&self, next: &Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Deployment, Phase::Battle)
                | (Phase::Deployment, Phase::Ended(_))
                | (Phase::Battle, Phase::Ended(_))
        )
    }
}

/// How fast a unit moves along its path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MovePace {
    #[default]
    Walk,
    Run,
    Sneak,
}

/// Destination plus the path being followed to reach it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovePlan {
    pub destination: Vec2,
    pub pace: MovePace,
    pub path: PathPlan,
}

/// What a unit is shooting at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FireTarget {
    Unit(UnitRef),
    Point(Vec2),
}

/// Medium-duration intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Behavior {
    Idle(Posture),
    MoveTo(MovePlan),
    /// Hold position facing an angle (radians)
    Defend(f32),
    /// Go to ground facing an angle (radians)
    Hide(f32),
    EngageTarget(UnitRef),
    SuppressArea(Vec2),
    Unconscious,
    Dead,
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior::Idle(Posture::Standing)
    }
}

/// Payload-free behavior discriminant for snapshots and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BehaviorTag {
    Idle,
    MoveTo,
    Defend,
    Hide,
    EngageTarget,
    SuppressArea,
    Unconscious,
    Dead,
}

impl Behavior {
    pub fn tag(&self) -> BehaviorTag {
        match self {
            Behavior::Idle(_) => BehaviorTag::Idle,
            Behavior::MoveTo(_) => BehaviorTag::MoveTo,
            Behavior::Defend(_) => BehaviorTag::Defend,
            Behavior::Hide(_) => BehaviorTag::Hide,
            Behavior::EngageTarget(_) => BehaviorTag::EngageTarget,
            Behavior::SuppressArea(_) => BehaviorTag::SuppressArea,
            Behavior::Unconscious => BehaviorTag::Unconscious,
            Behavior::Dead => BehaviorTag::Dead,
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, Behavior::Dead)
    }

    /// Dead or unconscious
    pub fn is_incapacitated(&self) -> bool {
        matches!(self, Behavior::Dead | Behavior::Unconscious)
    }

    pub fn fire_target(&self) -> Option<FireTarget> {
        match self {
            Behavior::EngageTarget(unit) => Some(FireTarget::Unit(*unit)),
            Behavior::SuppressArea(point) => Some(FireTarget::Point(*point)),
            _ => None,
        }
    }

    pub fn move_plan(&self) -> Option<&MovePlan> {
        match self {
            Behavior::MoveTo(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn move_plan_mut(&mut self) -> Option<&mut MovePlan> {
        match self {
            Behavior::MoveTo(plan) => Some(plan),
            _ => None,
        }
    }
}

/// Posture a soldier adopts as a side effect of entering a behavior
pub fn implied_posture(behavior: &Behavior) -> Option<Posture> {
    match behavior {
        Behavior::Idle(posture) => Some(*posture),
        Behavior::Hide(_) => Some(Posture::Prone),
        Behavior::Defend(_) => Some(Posture::Crouching),
        Behavior::MoveTo(plan) => match plan.pace {
            MovePace::Sneak => Some(Posture::Crouching),
            MovePace::Walk | MovePace::Run => Some(Posture::Standing),
        },
        Behavior::Unconscious | Behavior::Dead => Some(Posture::Prone),
        Behavior::EngageTarget(_) | Behavior::SuppressArea(_) => None,
    }
}

/// Short timed action; ends by a `CompleteGesture` message once `end_tick` passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gesture {
    #[default]
    Idle,
    Reloading { end_tick: Tick },
    Aiming { end_tick: Tick },
    Firing { end_tick: Tick },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GestureTag {
    Idle,
    Reloading,
    Aiming,
    Firing,
}

impl Gesture {
    pub fn tag(&self) -> GestureTag {
        match self {
            Gesture::Idle => GestureTag::Idle,
            Gesture::Reloading { .. } => GestureTag::Reloading,
            Gesture::Aiming { .. } => GestureTag::Aiming,
            Gesture::Firing { .. } => GestureTag::Firing,
        }
    }

    pub fn end_tick(&self) -> Option<Tick> {
        match self {
            Gesture::Idle => None,
            Gesture::Reloading { end_tick }
            | Gesture::Aiming { end_tick }
            | Gesture::Firing { end_tick } => Some(*end_tick),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Gesture::Idle)
    }

    /// True once the gesture's end tick has been reached
    pub fn is_expired(&self, now: Tick) -> bool {
        self.end_tick().is_some_and(|end| end <= now)
    }
}

/// Capability bitset derived from unit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    pub const CAN_SEE: Capabilities = Capabilities(1 << 0);
    pub const CAN_MOVE: Capabilities = Capabilities(1 << 1);
    pub const CAN_SPRINT: Capabilities = Capabilities(1 << 2);
    pub const CAN_FIRE: Capabilities = Capabilities(1 << 3);
    pub const CAN_RELOAD: Capabilities = Capabilities(1 << 4);
    pub const CAN_CHANGE_POSTURE: Capabilities = Capabilities(1 << 5);

    const NAMES: [(Capabilities, &'static str); 6] = [
        (Capabilities::CAN_SEE, "CAN_SEE"),
        (Capabilities::CAN_MOVE, "CAN_MOVE"),
        (Capabilities::CAN_SPRINT, "CAN_SPRINT"),
        (Capabilities::CAN_FIRE, "CAN_FIRE"),
        (Capabilities::CAN_RELOAD, "CAN_RELOAD"),
        (Capabilities::CAN_CHANGE_POSTURE, "CAN_CHANGE_POSTURE"),
    ];

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn set(&mut self, other: Capabilities, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Capabilities(self.0 | rhs.0)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// The full layered state of one unit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnitState {
    pub phase: Phase,
    pub behavior: Behavior,
    pub gesture: Gesture,
    pub capabilities: Capabilities,
}

/// Compute the capability set implied by a unit's current state
///
/// The only function that decides capability bits. The message engine
/// stores its result on every unit at the end of each apply batch.
pub fn derive_capabilities(unit: &Unit) -> Capabilities {
    let mut caps = Capabilities::NONE;
    let behavior = &unit.state.behavior;
    let active = unit.health.is_alive() && !behavior.is_incapacitated();
    if !active || unit.state.phase.is_ended() {
        return caps;
    }

    let in_battle = unit.state.phase == Phase::Battle;
    let is_soldier = unit.kind == UnitKind::Soldier;
    let prone = is_soldier && unit.posture == Posture::Prone;

    caps.set(Capabilities::CAN_SEE, true);
    caps.set(Capabilities::CAN_CHANGE_POSTURE, is_soldier);
    caps.set(Capabilities::CAN_MOVE, !prone);
    caps.set(
        Capabilities::CAN_SPRINT,
        !is_soldier
            || (unit.posture == Posture::Standing
                && unit.health.fraction() >= SPRINT_HEALTH_FRACTION),
    );

    if let Some(loadout) = &unit.loadout {
        caps.set(Capabilities::CAN_FIRE, in_battle && loadout.rounds > 0);
        caps.set(
            Capabilities::CAN_RELOAD,
            !prone && loadout.spare_magazines > 0 && loadout.rounds < loadout.magazine_size,
        );
    }

    caps
}

/// Why a state transition was refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardError {
    #[error("unit is dead")]
    Dead,

    #[error("unit is incapacitated")]
    Incapacitated,

    #[error("missing capability {0}")]
    MissingCapability(Capabilities),

    #[error("gesture {0:?} still in progress")]
    GestureBusy(GestureTag),

    #[error("gesture has not reached its end tick")]
    GestureNotExpired,

    #[error("no gesture to complete")]
    NoGesture,

    #[error("behavior {0:?} does not allow this")]
    WrongBehavior(BehaviorTag),

    #[error("not valid for a {0:?}")]
    WrongKind(UnitKind),

    #[error("cannot go from phase {from:?} to {to:?}")]
    PhaseOrder { from: Phase, to: Phase },

    #[error("end tick {0} is not in the future")]
    StaleEndTick(Tick),

    #[error("value out of range: {0}")]
    OutOfRange(String),
}

fn require(caps: Capabilities, needed: Capabilities) -> Result<(), GuardError> {
    if caps.contains(needed) {
        Ok(())
    } else {
        Err(GuardError::MissingCapability(needed))
    }
}

/// Guard for any state change on a unit that is not a death transition
pub fn check_alive(unit: &Unit) -> Result<(), GuardError> {
    match unit.state.behavior {
        Behavior::Dead => Err(GuardError::Dead),
        Behavior::Unconscious => Err(GuardError::Incapacitated),
        _ => Ok(()),
    }
}

/// Behavior transition table
///
/// Dead is terminal. Unconscious may only become Dead. Death and
/// unconsciousness are normally reached through damage, not this guard.
pub fn check_behavior(unit: &Unit, next: &Behavior) -> Result<(), GuardError> {
    let caps = unit.state.capabilities;
    match (&unit.state.behavior, next) {
        (Behavior::Dead, _) => Err(GuardError::Dead),
        (_, Behavior::Dead) => Ok(()),
        (Behavior::Unconscious, _) => Err(GuardError::Incapacitated),
        (_, Behavior::Unconscious) => match unit.kind {
            UnitKind::Soldier => Ok(()),
            kind => Err(GuardError::WrongKind(kind)),
        },
        (_, Behavior::MoveTo(plan)) => {
            require(caps, Capabilities::CAN_MOVE)?;
            if plan.pace == MovePace::Run {
                require(caps, Capabilities::CAN_SPRINT)?;
            }
            Ok(())
        }
        (_, Behavior::EngageTarget(_)) | (_, Behavior::SuppressArea(_)) => {
            require(caps, Capabilities::CAN_FIRE)
        }
        (_, Behavior::Idle(_)) | (_, Behavior::Defend(_)) | (_, Behavior::Hide(_)) => Ok(()),
    }
}

/// Gesture transition table
///
/// A new timed gesture starts only from Idle; Idle itself cancels anything.
pub fn check_gesture(unit: &Unit, next: &Gesture, now: Tick) -> Result<(), GuardError> {
    check_alive(unit)?;
    let current = unit.state.gesture;
    if let Some(end) = next.end_tick() {
        if end <= now {
            return Err(GuardError::StaleEndTick(end));
        }
    }
    if !next.is_idle() && !current.is_idle() {
        return Err(GuardError::GestureBusy(current.tag()));
    }

    let caps = unit.state.capabilities;
    match next {
        Gesture::Idle => Ok(()),
        Gesture::Reloading { .. } => require(caps, Capabilities::CAN_RELOAD),
        Gesture::Aiming { .. } | Gesture::Firing { .. } => {
            require(caps, Capabilities::CAN_FIRE)?;
            if unit.state.behavior.fire_target().is_none() {
                return Err(GuardError::WrongBehavior(unit.state.behavior.tag()));
            }
            Ok(())
        }
    }
}

/// A gesture may be completed once its end tick has been reached
pub fn check_complete_gesture(unit: &Unit, now: Tick) -> Result<(), GuardError> {
    check_alive(unit)?;
    match unit.state.gesture.end_tick() {
        None => Err(GuardError::NoGesture),
        Some(end) if end > now => Err(GuardError::GestureNotExpired),
        Some(_) => Ok(()),
    }
}

pub fn check_posture(unit: &Unit, _next: Posture) -> Result<(), GuardError> {
    check_alive(unit)?;
    require(unit.state.capabilities, Capabilities::CAN_CHANGE_POSTURE)
}

/// Moving along an existing plan needs CAN_MOVE and a MoveTo behavior
pub fn check_move(unit: &Unit) -> Result<(), GuardError> {
    check_alive(unit)?;
    require(unit.state.capabilities, Capabilities::CAN_MOVE)?;
    match unit.state.behavior {
        Behavior::MoveTo(_) => Ok(()),
        ref other => Err(GuardError::WrongBehavior(other.tag())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::units::{Health, Loadout};
    use crate::battle::weapons::WeaponId;
    use crate::core::types::Vec2;

    fn soldier() -> Unit {
        let mut unit = Unit::new("s1", UnitKind::Soldier, Side::Attacker, Vec2::new(0.0, 0.0));
        unit.loadout = Some(Loadout {
            weapon: WeaponId(0),
            rounds: 30,
            magazine_size: 30,
            spare_magazines: 2,
        });
        unit.state.phase = Phase::Battle;
        unit.state.capabilities = derive_capabilities(&unit);
        unit
    }

    #[test]
    fn test_phase_only_advances() {
        assert!(Phase::Deployment.can_advance_to(&Phase::Battle));
        assert!(Phase::Battle.can_advance_to(&Phase::Ended(Some(Side::Attacker))));
        assert!(!Phase::Battle.can_advance_to(&Phase::Deployment));
        assert!(!Phase::Ended(None).can_advance_to(&Phase::Battle));
    }

    #[test]
    fn test_capabilities_healthy_soldier() {
        let unit = soldier();
        let caps = derive_capabilities(&unit);
        assert!(caps.contains(Capabilities::CAN_SEE | Capabilities::CAN_MOVE));
        assert!(caps.contains(Capabilities::CAN_SPRINT));
        assert!(caps.contains(Capabilities::CAN_FIRE));
        // Full magazine: nothing to reload
        assert!(!caps.contains(Capabilities::CAN_RELOAD));
    }

    #[test]
    fn test_prone_cannot_move_or_reload() {
        let mut unit = soldier();
        unit.posture = Posture::Prone;
        if let Some(loadout) = unit.loadout.as_mut() {
            loadout.rounds = 0;
        }
        let caps = derive_capabilities(&unit);
        assert!(!caps.contains(Capabilities::CAN_MOVE));
        assert!(!caps.contains(Capabilities::CAN_RELOAD));
        assert!(!caps.contains(Capabilities::CAN_FIRE));
    }

    #[test]
    fn test_no_fire_during_deployment() {
        let mut unit = soldier();
        unit.state.phase = Phase::Deployment;
        assert!(!derive_capabilities(&unit).contains(Capabilities::CAN_FIRE));
    }

    #[test]
    fn test_dead_has_no_capabilities() {
        let mut unit = soldier();
        unit.health = Health::new(100.0);
        unit.health.apply_damage(500.0);
        unit.state.behavior = Behavior::Dead;
        assert!(derive_capabilities(&unit).is_empty());
    }

    #[test]
    fn test_wounded_cannot_sprint() {
        let mut unit = soldier();
        unit.health.apply_damage(60.0);
        assert!(!derive_capabilities(&unit).contains(Capabilities::CAN_SPRINT));
    }

    #[test]
    fn test_dead_is_terminal() {
        let mut unit = soldier();
        unit.state.behavior = Behavior::Dead;
        assert_eq!(
            check_behavior(&unit, &Behavior::Idle(Posture::Standing)),
            Err(GuardError::Dead)
        );
        assert_eq!(check_behavior(&unit, &Behavior::Dead), Err(GuardError::Dead));
    }

    #[test]
    fn test_unconscious_only_to_dead() {
        let mut unit = soldier();
        unit.state.behavior = Behavior::Unconscious;
        assert!(check_behavior(&unit, &Behavior::Dead).is_ok());
        assert_eq!(
            check_behavior(&unit, &Behavior::Hide(0.0)),
            Err(GuardError::Incapacitated)
        );
    }

    #[test]
    fn test_engage_requires_fire_capability() {
        let mut unit = soldier();
        unit.state.capabilities = Capabilities::CAN_SEE;
        assert_eq!(
            check_behavior(&unit, &Behavior::EngageTarget(UnitRef::soldier(1))),
            Err(GuardError::MissingCapability(Capabilities::CAN_FIRE))
        );
    }

    #[test]
    fn test_gesture_busy_blocks_new_gesture() {
        let mut unit = soldier();
        unit.state.behavior = Behavior::EngageTarget(UnitRef::soldier(1));
        unit.state.gesture = Gesture::Aiming { end_tick: 20 };
        assert_eq!(
            check_gesture(&unit, &Gesture::Firing { end_tick: 30 }, 10),
            Err(GuardError::GestureBusy(GestureTag::Aiming))
        );
        assert!(check_gesture(&unit, &Gesture::Idle, 10).is_ok());
    }

    #[test]
    fn test_firing_requires_fire_behavior() {
        let unit = soldier();
        assert_eq!(
            check_gesture(&unit, &Gesture::Firing { end_tick: 30 }, 10),
            Err(GuardError::WrongBehavior(BehaviorTag::Idle))
        );
    }

    #[test]
    fn test_complete_gesture_waits_for_end_tick() {
        let mut unit = soldier();
        unit.state.gesture = Gesture::Reloading { end_tick: 50 };
        assert_eq!(check_complete_gesture(&unit, 49), Err(GuardError::GestureNotExpired));
        assert!(check_complete_gesture(&unit, 50).is_ok());
    }

    #[test]
    fn test_capabilities_display() {
        let caps = Capabilities::CAN_SEE | Capabilities::CAN_FIRE;
        assert_eq!(caps.to_string(), "CAN_SEE|CAN_FIRE");
        assert_eq!(Capabilities::NONE.to_string(), "NONE");
    }
}
