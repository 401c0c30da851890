//! Unit decision system
//!
//! Each decision is a pure function of the unit, its fresh sensory data and
//! the read-only battle view. Tiers are evaluated in a fixed order:
//! survival, engagement, orders, idle. The first tier that applies wins,
//! either with a message or by holding the current behavior.
//!
//! Capability gates are met by chaining: a tier whose target behavior is
//! not yet allowed proposes the prerequisite (stand up, reload) instead and
//! tries again on a later decision.

pub mod context;
pub mod gestures;

pub use context::DecisionContext;
pub use gestures::gesture_step;

use tracing::debug;

use crate::battle::constants::{ARRIVAL_RADIUS, READY_POSTURE};
use crate::battle::messages::Message;
use crate::battle::morale::{self, MoraleOverride};
use crate::battle::orders::Order;
use crate::battle::pathfinding::plan_path;
use crate::battle::perception::SensoryData;
use crate::battle::state::{Behavior, Capabilities, Gesture, MovePace, MovePlan, Phase};
use crate::battle::units::Unit;
use crate::core::types::{Posture, UnitKind, UnitRef, Vec2};

/// Outcome of a tier that applies
enum Verdict {
    Propose(Message),
    /// The tier is satisfied with what the unit is already doing
    Hold,
}

impl Verdict {
    fn into_message(self) -> Option<Message> {
        match self {
            Verdict::Propose(message) => Some(message),
            Verdict::Hold => None,
        }
    }
}

/// Decide this unit's next state change, if any
pub fn decide(
    ctx: &DecisionContext<'_>,
    unit_ref: UnitRef,
    unit: &Unit,
    sensory: &SensoryData,
) -> Option<Message> {
    if !unit.is_active() || unit.state.phase != Phase::Battle {
        return None;
    }

    if let Some(verdict) = survival(ctx, unit_ref, unit, sensory) {
        return verdict.into_message();
    }

    let mut refuse_orders = false;
    match morale::override_roll(unit_ref, unit, ctx.seed, ctx.tick, ctx.config) {
        Some(MoraleOverride::Flee) => {
            if let Some(verdict) = flee(ctx, unit_ref, unit, sensory) {
                return verdict.into_message();
            }
        }
        Some(MoraleOverride::RefuseOrders) => refuse_orders = true,
        None => {}
    }

    if let Some(verdict) = engagement(ctx, unit_ref, unit, sensory) {
        return verdict.into_message();
    }

    if !refuse_orders {
        if let Some(verdict) = follow_order(ctx, unit_ref, unit, sensory) {
            return verdict.into_message();
        }
    }

    idle(unit_ref, unit, refuse_orders)
}

fn set_behavior(unit: UnitRef, behavior: Behavior) -> Verdict {
    Verdict::Propose(Message::SetBehavior { unit, behavior })
}

fn set_posture(unit: UnitRef, posture: Posture) -> Verdict {
    Verdict::Propose(Message::SetPosture { unit, posture })
}

/// Propose a MoveTo along a fresh path, or `None` if there is no route
fn move_to(
    ctx: &DecisionContext<'_>,
    unit_ref: UnitRef,
    unit: &Unit,
    destination: Vec2,
    pace: MovePace,
) -> Option<Verdict> {
    let path = plan_path(ctx.terrain, unit.kind, unit.position, destination, ctx.tick).ok()?;
    Some(set_behavior(
        unit_ref,
        Behavior::MoveTo(MovePlan {
            destination,
            pace,
            path,
        }),
    ))
}

fn is_moving_to(unit: &Unit, destination: Vec2) -> bool {
    unit.state
        .behavior
        .move_plan()
        .is_some_and(|plan| plan.destination == destination)
}

fn fastest_pace(unit: &Unit) -> MovePace {
    if unit.can(Capabilities::CAN_SPRINT) {
        MovePace::Run
    } else {
        MovePace::Walk
    }
}

/// Tier 1: get out of the line of fire
fn survival(
    ctx: &DecisionContext<'_>,
    unit_ref: UnitRef,
    unit: &Unit,
    sensory: &SensoryData,
) -> Option<Verdict> {
    if !sensory.is_under_fire(ctx.config.under_fire_danger_threshold) {
        return None;
    }
    if matches!(unit.state.behavior, Behavior::Hide(_)) {
        return Some(Verdict::Hold);
    }

    if unit.can(Capabilities::CAN_MOVE) {
        if let Some(cover) = ctx.find_cover(unit) {
            if is_moving_to(unit, cover) {
                return Some(Verdict::Hold);
            }
            if let Some(verdict) = move_to(ctx, unit_ref, unit, cover, fastest_pace(unit)) {
                debug!(unit = %unit_ref, x = cover.x, y = cover.y, "running for cover");
                return Some(verdict);
            }
        }
    }

    let facing = sensory
        .threat_position()
        .map(|threat| unit.position.heading_to(&threat))
        .unwrap_or(unit.heading);
    Some(set_behavior(unit_ref, Behavior::Hide(facing)))
}

/// Panic: run from the nearest threat, or go to ground if that is impossible
fn flee(
    ctx: &DecisionContext<'_>,
    unit_ref: UnitRef,
    unit: &Unit,
    sensory: &SensoryData,
) -> Option<Verdict> {
    let threat = sensory.threat_position()?;
    if let Some(plan) = unit.state.behavior.move_plan() {
        if !plan.path.is_finished() {
            return Some(Verdict::Hold);
        }
    }

    if unit.kind == UnitKind::Soldier && unit.posture == Posture::Prone {
        return Some(set_posture(unit_ref, Posture::Standing));
    }
    if unit.can(Capabilities::CAN_MOVE) {
        let destination = ctx.flee_point(unit, threat);
        if let Some(verdict) = move_to(ctx, unit_ref, unit, destination, fastest_pace(unit)) {
            debug!(unit = %unit_ref, "panicked, fleeing");
            return Some(verdict);
        }
    }

    if matches!(unit.state.behavior, Behavior::Hide(_)) {
        return Some(Verdict::Hold);
    }
    Some(set_behavior(
        unit_ref,
        Behavior::Hide(unit.position.heading_to(&threat)),
    ))
}

fn has_ammunition(unit: &Unit) -> bool {
    unit.loadout
        .as_ref()
        .is_some_and(|l| l.rounds > 0 || l.spare_magazines > 0)
}

/// Steps toward CAN_FIRE: get off the ground, then reload
///
/// `None` once the unit can fire.
fn fire_prerequisite(ctx: &DecisionContext<'_>, unit_ref: UnitRef, unit: &Unit) -> Option<Verdict> {
    if unit.can(Capabilities::CAN_FIRE) {
        return None;
    }
    if unit.kind == UnitKind::Soldier
        && unit.posture == Posture::Prone
        && unit.can(Capabilities::CAN_CHANGE_POSTURE)
    {
        return Some(set_posture(unit_ref, READY_POSTURE));
    }
    if unit.state.gesture.is_idle() && unit.can(Capabilities::CAN_RELOAD) {
        let weapon = ctx.weapon_of(unit)?;
        let end_tick = ctx.tick + weapon.reload_ticks(ctx.config.ticks_per_second);
        return Some(Verdict::Propose(Message::SetGesture {
            unit: unit_ref,
            gesture: Gesture::Reloading { end_tick },
        }));
    }
    Some(Verdict::Hold)
}

/// Engage `target`, chaining prerequisites first
fn engage(
    ctx: &DecisionContext<'_>,
    unit_ref: UnitRef,
    unit: &Unit,
    target: UnitRef,
) -> Option<Verdict> {
    if !has_ammunition(unit) {
        return None;
    }
    if let Some(verdict) = fire_prerequisite(ctx, unit_ref, unit) {
        return Some(verdict);
    }
    if unit.state.behavior == Behavior::EngageTarget(target) {
        return Some(Verdict::Hold);
    }
    Some(set_behavior(unit_ref, Behavior::EngageTarget(target)))
}

/// Tier 2: shoot the nearest visible enemy in range
fn engagement(
    ctx: &DecisionContext<'_>,
    unit_ref: UnitRef,
    unit: &Unit,
    sensory: &SensoryData,
) -> Option<Verdict> {
    let weapon = ctx.weapon_of(unit)?;
    let enemy = sensory.nearest_enemy_within(weapon.range)?;
    engage(ctx, unit_ref, unit, enemy.unit)
}

/// Posture needed before setting off at `pace`, if the current one will not do
fn movement_posture(unit: &Unit, pace: MovePace) -> Option<Posture> {
    if unit.kind != UnitKind::Soldier {
        return None;
    }
    match pace {
        MovePace::Sneak if unit.posture == Posture::Prone => Some(Posture::Crouching),
        MovePace::Walk if unit.posture == Posture::Prone => Some(Posture::Standing),
        MovePace::Run if unit.posture != Posture::Standing => Some(Posture::Standing),
        _ => None,
    }
}

/// Tier 3: carry out the current order
fn follow_order(
    ctx: &DecisionContext<'_>,
    unit_ref: UnitRef,
    unit: &Unit,
    sensory: &SensoryData,
) -> Option<Verdict> {
    let order = *unit.orders.current()?;
    let complete = Verdict::Propose(Message::CompleteOrder { unit: unit_ref });

    if let Some((destination, pace)) = order.movement() {
        if unit.position.distance(&destination) <= ARRIVAL_RADIUS {
            return Some(complete);
        }
        if is_moving_to(unit, destination) {
            return Some(Verdict::Hold);
        }
        if let Some(posture) = movement_posture(unit, pace) {
            if unit.can(Capabilities::CAN_CHANGE_POSTURE) {
                return Some(set_posture(unit_ref, posture));
            }
        }
        let pace = if pace == MovePace::Run && !unit.can(Capabilities::CAN_SPRINT) {
            MovePace::Walk
        } else {
            pace
        };
        return match move_to(ctx, unit_ref, unit, destination, pace) {
            Some(verdict) => Some(verdict),
            None => {
                debug!(
                    unit = %unit_ref,
                    x = destination.x,
                    y = destination.y,
                    "no path, dropping order"
                );
                Some(complete)
            }
        };
    }

    match order {
        Order::Defend(angle) => Some(if unit.state.behavior == Behavior::Defend(angle) {
            Verdict::Hold
        } else {
            set_behavior(unit_ref, Behavior::Defend(angle))
        }),
        Order::Hide(angle) => Some(if unit.state.behavior == Behavior::Hide(angle) {
            Verdict::Hold
        } else {
            set_behavior(unit_ref, Behavior::Hide(angle))
        }),
        Order::Engage(target) => {
            if !ctx.is_live_target(target) {
                return Some(complete);
            }
            if sensory.can_see(target) {
                engage(ctx, unit_ref, unit, target).or(Some(Verdict::Hold))
            } else {
                Some(Verdict::Hold)
            }
        }
        Order::SuppressArea(point) => {
            if !has_ammunition(unit) {
                return Some(complete);
            }
            if let Some(verdict) = fire_prerequisite(ctx, unit_ref, unit) {
                return Some(verdict);
            }
            Some(if unit.state.behavior == Behavior::SuppressArea(point) {
                Verdict::Hold
            } else {
                set_behavior(unit_ref, Behavior::SuppressArea(point))
            })
        }
        // Stop never stays queued, and movement orders were handled above
        Order::Stop | Order::MoveTo(_) | Order::MoveFastTo(_) | Order::SneakTo(_) => Some(complete),
    }
}

/// Tier 4: drop any behavior nothing is sustaining
///
/// A unit refusing orders keeps a behavior its orders would sustain until
/// the refusal passes.
fn idle(unit_ref: UnitRef, unit: &Unit, refuse_orders: bool) -> Option<Message> {
    if matches!(unit.state.behavior, Behavior::Idle(_)) {
        return None;
    }
    if refuse_orders && !unit.orders.is_empty() {
        return None;
    }
    Some(Message::SetBehavior {
        unit: unit_ref,
        behavior: Behavior::Idle(unit.posture),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::orders::OrderMode;
    use crate::battle::perception::VisibleEnemy;
    use crate::battle::state::derive_capabilities;
    use crate::battle::store::EntityStore;
    use crate::battle::units::Loadout;
    use crate::battle::weapons::{WeaponCatalog, WeaponId};
    use crate::core::config::SimulationConfig;
    use crate::core::types::Side;
    use crate::spatial::terrain::{GridTerrain, TerrainKind, TileCoord};

    struct Fixture {
        store: EntityStore,
        terrain: GridTerrain,
        weapons: WeaponCatalog,
        config: SimulationConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let mut store = EntityStore::new();
            let mut a = Unit::new("a", UnitKind::Soldier, Side::Attacker, Vec2::new(5.5, 5.5));
            a.loadout = Some(Loadout {
                weapon: WeaponId(0),
                rounds: 10,
                magazine_size: 10,
                spare_magazines: 2,
            });
            let b = Unit::new("b", UnitKind::Soldier, Side::Defender, Vec2::new(35.5, 5.5));
            store.create(UnitKind::Soldier, a);
            store.create(UnitKind::Soldier, b);
            let mut fixture = Self {
                store,
                terrain: GridTerrain::new(60, 20, 1.0),
                weapons: WeaponCatalog::standard(),
                config: SimulationConfig::default(),
            };
            fixture.edit(|_| {});
            fixture
        }

        /// Mutate the shooter and re-derive its capabilities
        fn edit(&mut self, f: impl FnOnce(&mut Unit)) {
            if let Ok(u) = self.store.get_mut(UnitRef::soldier(0)) {
                u.state.phase = Phase::Battle;
                f(u);
                u.state.capabilities = derive_capabilities(u);
            }
        }

        fn decide(&self, sensory: &SensoryData) -> Option<Message> {
            let ctx = DecisionContext {
                store: &self.store,
                terrain: &self.terrain,
                weapons: &self.weapons,
                config: &self.config,
                seed: 12345,
                tick: 60,
            };
            let unit = self.store.get(UnitRef::soldier(0)).unwrap();
            decide(&ctx, UnitRef::soldier(0), unit, sensory)
        }
    }

    fn sees_enemy() -> SensoryData {
        SensoryData {
            visible: vec![VisibleEnemy {
                unit: UnitRef::soldier(1),
                position: Vec2::new(35.5, 5.5),
                distance: 30.0,
            }],
            ..SensoryData::default()
        }
    }

    fn under_fire(mut sensory: SensoryData) -> SensoryData {
        sensory.memory.under_fire = 0.8;
        sensory
    }

    const A: UnitRef = UnitRef::Soldier(crate::core::types::SoldierIndex(0));

    #[test]
    fn test_engages_visible_enemy() {
        let fixture = Fixture::new();
        assert_eq!(
            fixture.decide(&sees_enemy()),
            Some(Message::SetBehavior {
                unit: A,
                behavior: Behavior::EngageTarget(UnitRef::soldier(1)),
            })
        );
    }

    #[test]
    fn test_already_engaging_holds() {
        let mut fixture = Fixture::new();
        fixture.edit(|u| u.state.behavior = Behavior::EngageTarget(UnitRef::soldier(1)));
        assert_eq!(fixture.decide(&sees_enemy()), None);
    }

    #[test]
    fn test_hides_in_the_open_when_under_fire() {
        let fixture = Fixture::new();
        match fixture.decide(&under_fire(sees_enemy())) {
            Some(Message::SetBehavior {
                behavior: Behavior::Hide(angle),
                ..
            }) => assert!(angle.abs() < 1e-6),
            other => panic!("expected hide, got {:?}", other),
        }
    }

    #[test]
    fn test_runs_for_cover_when_under_fire() {
        let mut fixture = Fixture::new();
        fixture.terrain.set(TileCoord::new(4, 5), TerrainKind::Crater);
        match fixture.decide(&under_fire(sees_enemy())) {
            Some(Message::SetBehavior {
                behavior: Behavior::MoveTo(plan),
                ..
            }) => {
                assert_eq!(plan.destination, Vec2::new(4.5, 5.5));
                assert_eq!(plan.pace, MovePace::Run);
            }
            other => panic!("expected move to cover, got {:?}", other),
        }
    }

    #[test]
    fn test_survival_overrides_orders() {
        let mut fixture = Fixture::new();
        fixture.edit(|u| u.orders.issue(Order::MoveTo(Vec2::new(50.5, 5.5)), OrderMode::Replace));
        assert!(matches!(
            fixture.decide(&under_fire(SensoryData::default())),
            Some(Message::SetBehavior { behavior: Behavior::Hide(_), .. })
        ));
    }

    #[test]
    fn test_prone_empty_rifle_chain_starts_with_posture() {
        let mut fixture = Fixture::new();
        fixture.edit(|u| {
            u.posture = Posture::Prone;
            if let Some(l) = u.loadout.as_mut() {
                l.rounds = 0;
            }
        });
        assert_eq!(
            fixture.decide(&sees_enemy()),
            Some(Message::SetPosture { unit: A, posture: READY_POSTURE })
        );

        fixture.edit(|u| u.posture = READY_POSTURE);
        assert_eq!(
            fixture.decide(&sees_enemy()),
            Some(Message::SetGesture {
                unit: A,
                gesture: Gesture::Reloading { end_tick: 240 },
            })
        );

        fixture.edit(|u| u.state.gesture = Gesture::Reloading { end_tick: 240 });
        assert_eq!(fixture.decide(&sees_enemy()), None);
    }

    #[test]
    fn test_move_order_plans_path() {
        let mut fixture = Fixture::new();
        let destination = Vec2::new(20.5, 5.5);
        fixture.edit(|u| u.orders.issue(Order::MoveTo(destination), OrderMode::Replace));
        match fixture.decide(&SensoryData::default()) {
            Some(Message::SetBehavior {
                behavior: Behavior::MoveTo(plan),
                ..
            }) => {
                assert_eq!(plan.destination, destination);
                assert_eq!(plan.pace, MovePace::Walk);
                assert_eq!(plan.path.waypoints.last(), Some(&destination));
            }
            other => panic!("expected move, got {:?}", other),
        }
    }

    #[test]
    fn test_prone_unit_stands_before_walking() {
        let mut fixture = Fixture::new();
        fixture.edit(|u| {
            u.posture = Posture::Prone;
            u.orders.issue(Order::MoveTo(Vec2::new(20.5, 5.5)), OrderMode::Replace);
        });
        assert_eq!(
            fixture.decide(&SensoryData::default()),
            Some(Message::SetPosture { unit: A, posture: Posture::Standing })
        );
    }

    #[test]
    fn test_arrival_completes_order() {
        let mut fixture = Fixture::new();
        fixture.edit(|u| u.orders.issue(Order::MoveTo(Vec2::new(5.7, 5.5)), OrderMode::Replace));
        assert_eq!(
            fixture.decide(&SensoryData::default()),
            Some(Message::CompleteOrder { unit: A })
        );
    }

    #[test]
    fn test_unreachable_destination_drops_order() {
        let mut fixture = Fixture::new();
        fixture.terrain.fill(TileCoord::new(30, 0), TileCoord::new(30, 19), TerrainKind::DeepWater);
        fixture.edit(|u| u.orders.issue(Order::MoveTo(Vec2::new(50.5, 5.5)), OrderMode::Replace));
        assert_eq!(
            fixture.decide(&SensoryData::default()),
            Some(Message::CompleteOrder { unit: A })
        );
    }

    #[test]
    fn test_engage_order_on_dead_target_completes() {
        let mut fixture = Fixture::new();
        if let Ok(b) = fixture.store.get_mut(UnitRef::soldier(1)) {
            b.state.behavior = Behavior::Dead;
        }
        fixture.edit(|u| u.orders.issue(Order::Engage(UnitRef::soldier(1)), OrderMode::Replace));
        assert_eq!(
            fixture.decide(&SensoryData::default()),
            Some(Message::CompleteOrder { unit: A })
        );
    }

    #[test]
    fn test_unsustained_behavior_returns_to_idle() {
        let mut fixture = Fixture::new();
        fixture.edit(|u| u.state.behavior = Behavior::Defend(0.0));
        assert_eq!(
            fixture.decide(&SensoryData::default()),
            Some(Message::SetBehavior {
                unit: A,
                behavior: Behavior::Idle(Posture::Standing),
            })
        );
    }

    #[test]
    fn test_dead_units_do_not_decide() {
        let mut fixture = Fixture::new();
        fixture.edit(|u| u.state.behavior = Behavior::Dead);
        assert_eq!(fixture.decide(&under_fire(sees_enemy())), None);
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let mut fixture = Fixture::new();
        fixture.edit(|u| u.morale = 5.0);
        let sensory = sees_enemy();
        assert_eq!(fixture.decide(&sensory), fixture.decide(&sensory));
    }
}
