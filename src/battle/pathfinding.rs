//! A* pathfinding over the terrain grid
//!
//! Respects terrain costs and per-kind passability. Ties between equal
//! f-costs are broken by insertion order, so the same query always yields
//! the same path.

use ahash::AHashMap;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::battle::constants::MAX_PATH_EXPANSIONS;
use crate::core::error::{Result, SimError};
use crate::core::types::{Tick, UnitKind, Vec2};
use crate::spatial::terrain::{TerrainQuery, TileCoord};

/// Node in the A* open set
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathNode {
    coord: TileCoord,
    f_cost: OrderedFloat<f32>,
    seq: u64,
}

impl Ord for PathNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap; earlier insertion wins ties
        other
            .f_cost
            .cmp(&self.f_cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PathNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn step_cost(terrain: &dyn TerrainQuery, from: TileCoord, to: TileCoord) -> f32 {
    let diagonal = from.x != to.x && from.y != to.y;
    let length = if diagonal { std::f32::consts::SQRT_2 } else { 1.0 };
    length * terrain.movement_cost(to)
}

/// Find a tile path using A*
///
/// Returns `None` if no path exists or the search exceeds its expansion
/// budget. Diagonal steps may not cut the corner of an impassable tile.
pub fn find_path(
    terrain: &dyn TerrainQuery,
    start: TileCoord,
    goal: TileCoord,
    kind: UnitKind,
) -> Option<Vec<TileCoord>> {
    if start == goal {
        return Some(vec![start]);
    }
    if !terrain.is_passable_for(goal, kind) {
        return None;
    }

    let heuristic_scale = terrain.min_movement_cost();
    let heuristic = |tile: TileCoord| tile.octile_distance(&goal) * heuristic_scale;

    let mut open_set = BinaryHeap::new();
    let mut came_from: AHashMap<TileCoord, TileCoord> = AHashMap::new();
    let mut g_scores: AHashMap<TileCoord, f32> = AHashMap::new();
    let mut seq = 0u64;

    g_scores.insert(start, 0.0);
    open_set.push(PathNode {
        coord: start,
        f_cost: OrderedFloat(heuristic(start)),
        seq,
    });

    let mut expansions = 0usize;
    while let Some(current) = open_set.pop() {
        if current.coord == goal {
            return Some(reconstruct_path(&came_from, current.coord));
        }

        expansions += 1;
        if expansions > MAX_PATH_EXPANSIONS {
            return None;
        }

        let current_g = g_scores.get(&current.coord).copied().unwrap_or(f32::INFINITY);
        // Skip stale heap entries
        if current.f_cost.0 > current_g + heuristic(current.coord) + f32::EPSILON {
            continue;
        }

        for neighbor in current.coord.neighbors8() {
            if !terrain.is_passable_for(neighbor, kind) {
                continue;
            }
            let diagonal = neighbor.x != current.coord.x && neighbor.y != current.coord.y;
            if diagonal {
                let side_a = TileCoord::new(neighbor.x, current.coord.y);
                let side_b = TileCoord::new(current.coord.x, neighbor.y);
                if !terrain.is_passable_for(side_a, kind)
                    || !terrain.is_passable_for(side_b, kind)
                {
                    continue;
                }
            }

            let cost = step_cost(terrain, current.coord, neighbor);
            if !cost.is_finite() {
                continue;
            }

            let tentative_g = current_g + cost;
            let neighbor_g = g_scores.get(&neighbor).copied().unwrap_or(f32::INFINITY);
            if tentative_g < neighbor_g {
                came_from.insert(neighbor, current.coord);
                g_scores.insert(neighbor, tentative_g);
                seq += 1;
                open_set.push(PathNode {
                    coord: neighbor,
                    f_cost: OrderedFloat(tentative_g + heuristic(neighbor)),
                    seq,
                });
            }
        }
    }

    None // No path found
}

/// Reconstruct path from came_from map
fn reconstruct_path(
    came_from: &AHashMap<TileCoord, TileCoord>,
    mut current: TileCoord,
) -> Vec<TileCoord> {
    let mut path = vec![current];
    while let Some(&prev) = came_from.get(&current) {
        path.push(prev);
        current = prev;
    }
    path.reverse();
    path
}

/// A computed route a unit is following
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPlan {
    pub goal: TileCoord,
    /// World-space points to walk through; the last is the exact destination
    pub waypoints: Vec<Vec2>,
    /// Index of the next waypoint to reach
    pub cursor: usize,
    pub computed_at: Tick,
}

impl PathPlan {
    pub fn next_waypoint(&self) -> Option<Vec2> {
        self.waypoints.get(self.cursor).copied()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.waypoints.len()
    }

    pub fn remaining(&self) -> &[Vec2] {
        self.waypoints.get(self.cursor..).unwrap_or(&[])
    }

    /// Too old, or a remaining waypoint has become impassable
    pub fn is_stale(
        &self,
        terrain: &dyn TerrainQuery,
        kind: UnitKind,
        now: Tick,
        max_age: Tick,
    ) -> bool {
        if now.saturating_sub(self.computed_at) > max_age {
            return true;
        }
        self.remaining()
            .iter()
            .any(|point| !terrain.is_passable_for(terrain.tile_at(*point), kind))
    }
}

/// Plan a route between two world positions
///
/// Fails with [`SimError::NoPath`] when the goal is off the map or
/// unreachable for this kind of unit.
pub fn plan_path(
    terrain: &dyn TerrainQuery,
    kind: UnitKind,
    from: Vec2,
    to: Vec2,
    now: Tick,
) -> Result<PathPlan> {
    let start = terrain.tile_at(from);
    let goal = terrain.tile_at(to);
    let no_path = || SimError::NoPath { from: start, to: goal };
    if !terrain.in_bounds(goal) {
        return Err(no_path());
    }
    let tiles = find_path(terrain, start, goal, kind).ok_or_else(no_path)?;

    let mut waypoints: Vec<Vec2> = tiles
        .iter()
        .skip(1)
        .map(|tile| terrain.tile_center(*tile))
        .collect();
    match waypoints.last_mut() {
        Some(last) => *last = to,
        None => waypoints.push(to),
    }

    Ok(PathPlan {
        goal,
        waypoints,
        cursor: 0,
        computed_at: now,
    })
}
