//! Unit movement along cached paths
//!
//! Units in a MoveTo behavior follow their `PathPlan`, respecting pace,
//! terrain cost and suppression. Paths are only re-planned when stale.

use crate::battle::constants::SUPPRESSION_MOVE_PENALTY;
use crate::battle::messages::Message;
use crate::battle::orders::Order;
use crate::battle::pathfinding::plan_path;
use crate::battle::state::{Behavior, Capabilities, MovePace, MovePlan};
use crate::battle::units::Unit;
use crate::core::config::SimulationConfig;
use crate::core::types::{Tick, UnitKind, UnitRef, Vec2};
use crate::spatial::terrain::TerrainQuery;

/// Read-only inputs for a movement pass
pub struct MovementContext<'a> {
    pub terrain: &'a dyn TerrainQuery,
    pub config: &'a SimulationConfig,
    pub tick: Tick,
}

/// Get base speed for a unit kind and pace
fn base_speed(kind: UnitKind, pace: MovePace, config: &SimulationConfig) -> f32 {
    match kind {
        UnitKind::Vehicle => config.vehicle_speed,
        UnitKind::Soldier => match pace {
            MovePace::Walk => config.walk_speed,
            MovePace::Run => config.run_speed,
            MovePace::Sneak => config.sneak_speed,
        },
    }
}

/// Current speed in world units per second
///
/// Running without CAN_SPRINT drops to walking pace.
pub fn speed(
    unit: &Unit,
    pace: MovePace,
    terrain: &dyn TerrainQuery,
    config: &SimulationConfig,
) -> f32 {
    let pace = if pace == MovePace::Run && !unit.can(Capabilities::CAN_SPRINT) {
        MovePace::Walk
    } else {
        pace
    };
    let cost = terrain.movement_cost(terrain.tile_at(unit.position));
    if !cost.is_finite() || cost <= 0.0 {
        return 0.0;
    }
    let suppression = 1.0 - SUPPRESSION_MOVE_PENALTY * unit.suppression.clamp(0.0, 1.0);
    base_speed(unit.kind, pace, config) / cost * suppression
}

/// Advance along waypoints by up to `budget` world units
///
/// Returns the new position, heading and cursor.
fn advance(
    from: Vec2,
    heading: f32,
    waypoints: &[Vec2],
    cursor: usize,
    budget: f32,
) -> (Vec2, f32, usize) {
    let mut position = from;
    let mut heading = heading;
    let mut cursor = cursor;
    let mut budget = budget;

    while budget > 0.0 {
        let Some(&waypoint) = waypoints.get(cursor) else {
            break;
        };
        let distance = position.distance(&waypoint);
        if distance > 0.0001 {
            heading = position.heading_to(&waypoint);
        }
        if distance <= budget {
            position = waypoint;
            budget -= distance;
            cursor += 1;
        } else {
            position = position + (waypoint - position).normalize() * budget;
            budget = 0.0;
        }
    }

    (position, heading, cursor)
}

/// Is the unit's current order the move that produced this plan
fn order_drives(unit: &Unit, plan: &MovePlan) -> bool {
    unit.orders
        .current()
        .and_then(Order::movement)
        .is_some_and(|(destination, _)| destination == plan.destination)
}

/// Propose this tick's movement for one unit
pub fn step(ctx: &MovementContext<'_>, unit_ref: UnitRef, unit: &Unit) -> Vec<Message> {
    let mut messages = Vec::new();
    let Behavior::MoveTo(plan) = &unit.state.behavior else {
        return messages;
    };
    if !unit.can(Capabilities::CAN_MOVE) {
        return messages;
    }

    let config = ctx.config;
    if plan
        .path
        .is_stale(ctx.terrain, unit.kind, ctx.tick, config.path_max_age_ticks)
    {
        match plan_path(ctx.terrain, unit.kind, unit.position, plan.destination, ctx.tick) {
            Ok(path) => messages.push(Message::SetPath { unit: unit_ref, path }),
            Err(err) => {
                tracing::debug!(unit = %unit_ref, %err, "re-plan failed, holding");
                messages.push(Message::SetBehavior {
                    unit: unit_ref,
                    behavior: Behavior::Idle(unit.posture),
                });
                if order_drives(unit, plan) {
                    messages.push(Message::CompleteOrder { unit: unit_ref });
                }
            }
        }
        return messages;
    }

    if plan.path.is_finished() {
        return messages;
    }

    let budget = speed(unit, plan.pace, ctx.terrain, config) * config.dt();
    if budget <= 0.0 {
        return messages;
    }
    let (position, heading, cursor) = advance(
        unit.position,
        unit.heading,
        &plan.path.waypoints,
        plan.path.cursor,
        budget,
    );
    messages.push(Message::Move {
        unit: unit_ref,
        position,
        heading,
        cursor,
    });
    messages
}
