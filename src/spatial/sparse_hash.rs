//! Sparse hash grid for radius and line queries over unit positions

use ahash::AHashMap;

use crate::battle::store::IndexRemap;
use crate::core::types::{UnitRef, Vec2};

type CellCoord = (i32, i32);

/// Sparse hash grid with O(1) amortized insert/update/remove
///
/// Query results are always returned sorted by [`UnitRef`] so callers never
/// observe hash-map iteration order.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f32,
    cells: AHashMap<CellCoord, Vec<(UnitRef, Vec2)>>,
    locations: AHashMap<UnitRef, (CellCoord, Vec2)>,
}

impl SpatialIndex {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: AHashMap::new(),
            locations: AHashMap::new(),
        }
    }

    #[inline]
    fn cell_coord(&self, pos: Vec2) -> CellCoord {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
        )
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.locations.clear();
    }

    pub fn contains(&self, unit: UnitRef) -> bool {
        self.locations.contains_key(&unit)
    }

    pub fn position_of(&self, unit: UnitRef) -> Option<Vec2> {
        self.locations.get(&unit).map(|(_, pos)| *pos)
    }

    /// Insert or move a unit
    pub fn update(&mut self, unit: UnitRef, pos: Vec2) {
        let coord = self.cell_coord(pos);
        if let Some((old_coord, old_pos)) = self.locations.get_mut(&unit) {
            if *old_coord == coord {
                *old_pos = pos;
                if let Some(cell) = self.cells.get_mut(&coord) {
                    if let Some(entry) = cell.iter_mut().find(|(u, _)| *u == unit) {
                        entry.1 = pos;
                    }
                }
                return;
            }
        }
        self.remove(unit);
        self.cells.entry(coord).or_default().push((unit, pos));
        self.locations.insert(unit, (coord, pos));
    }

    pub fn insert(&mut self, unit: UnitRef, pos: Vec2) {
        self.update(unit, pos);
    }

    pub fn remove(&mut self, unit: UnitRef) {
        if let Some((coord, _)) = self.locations.remove(&unit) {
            if let Some(cell) = self.cells.get_mut(&coord) {
                if let Some(i) = cell.iter().position(|(u, _)| *u == unit) {
                    cell.swap_remove(i);
                }
                if cell.is_empty() {
                    self.cells.remove(&coord);
                }
            }
        }
    }

    /// Re-key entries after an entity-store swap-removal
    pub fn apply_remap(&mut self, remap: &IndexRemap) {
        self.remove(remap.removed);
        if let Some(moved_from) = remap.moved_from {
            if let Some((_, pos)) = self.locations.get(&moved_from).copied() {
                self.remove(moved_from);
                self.update(remap.removed, pos);
            }
        }
    }

    /// Cells whose square overlaps the circle, in row-major order
    fn cells_overlapping(&self, center: Vec2, radius: f32) -> Vec<CellCoord> {
        let radius_sq = radius * radius;
        let (min_x, min_y) = self.cell_coord(Vec2::new(center.x - radius, center.y - radius));
        let (max_x, max_y) = self.cell_coord(Vec2::new(center.x + radius, center.y + radius));

        let mut cells = Vec::new();
        for cx in min_x..=max_x {
            let x0 = cx as f32 * self.cell_size;
            let dx = center.x.clamp(x0, x0 + self.cell_size) - center.x;
            for cy in min_y..=max_y {
                let y0 = cy as f32 * self.cell_size;
                let dy = center.y.clamp(y0, y0 + self.cell_size) - center.y;
                if dx * dx + dy * dy <= radius_sq {
                    cells.push((cx, cy));
                }
            }
        }
        cells
    }

    /// All units within `radius` of `center`, sorted by reference
    ///
    /// Visits only cells overlapping the query circle.
    pub fn query_radius(&self, center: Vec2, radius: f32) -> Vec<UnitRef> {
        let radius_sq = radius * radius;
        let mut found = Vec::new();
        for coord in self.cells_overlapping(center, radius) {
            if let Some(cell) = self.cells.get(&coord) {
                found.extend(
                    cell.iter()
                        .filter(|(_, pos)| center.distance_squared(pos) <= radius_sq)
                        .map(|(unit, _)| *unit),
                );
            }
        }
        found.sort_unstable();
        found
    }

    /// All units within `half_width` of the segment `from`..`to`, sorted
    pub fn query_segment(&self, from: Vec2, to: Vec2, half_width: f32) -> Vec<UnitRef> {
        let (min_x, min_y) = self.cell_coord(Vec2::new(
            from.x.min(to.x) - half_width,
            from.y.min(to.y) - half_width,
        ));
        let (max_x, max_y) = self.cell_coord(Vec2::new(
            from.x.max(to.x) + half_width,
            from.y.max(to.y) + half_width,
        ));

        let mut found = Vec::new();
        for cx in min_x..=max_x {
            for cy in min_y..=max_y {
                if let Some(cell) = self.cells.get(&(cx, cy)) {
                    found.extend(
                        cell.iter()
                            .filter(|(_, pos)| point_segment_distance(*pos, from, to) <= half_width)
                            .map(|(unit, _)| *unit),
                    );
                }
            }
        }
        found.sort_unstable();
        found
    }

    /// Rebuild grid from positions
    pub fn rebuild(&mut self, entries: impl Iterator<Item = (UnitRef, Vec2)>) {
        self.clear();
        for (unit, pos) in entries {
            self.insert(unit, pos);
        }
    }
}

fn point_segment_distance(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.x * ab.x + ab.y * ab.y;
    if len_sq <= f32::EPSILON {
        return p.distance(&a);
    }
    let ap = p - a;
    let t = ((ap.x * ab.x + ap.y * ab.y) / len_sq).clamp(0.0, 1.0);
    p.distance(&(a + ab * t))
}
