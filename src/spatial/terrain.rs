//! Terrain query surface and a reference tile-grid implementation
//!
//! The map subsystem owns terrain data; the core only calls through
//! [`TerrainQuery`]. [`GridTerrain`] is the in-crate implementation used by
//! the headless runner and the tests.

use serde::{Deserialize, Serialize};

use crate::core::error::{Result, SimError};
use crate::core::types::{Posture, UnitKind, Vec2};

/// Integer tile coordinate on the terrain grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// 8-connected neighbors in fixed enumeration order
    ///
    /// Orthogonal neighbors first (E, N, W, S), then diagonals. The
    /// pathfinder's tie-breaking depends on this order never changing.
    pub fn neighbors8(&self) -> [TileCoord; 8] {
        [
            TileCoord::new(self.x + 1, self.y),
            TileCoord::new(self.x, self.y - 1),
            TileCoord::new(self.x - 1, self.y),
            TileCoord::new(self.x, self.y + 1),
            TileCoord::new(self.x + 1, self.y - 1),
            TileCoord::new(self.x - 1, self.y - 1),
            TileCoord::new(self.x - 1, self.y + 1),
            TileCoord::new(self.x + 1, self.y + 1),
        ]
    }

    /// Octile distance (consistent heuristic for 8-connected grids)
    pub fn octile_distance(&self, other: &Self) -> f32 {
        let dx = (self.x - other.x).unsigned_abs() as f32;
        let dy = (self.y - other.y).unsigned_abs() as f32;
        let (min, max) = if dx < dy { (dx, dy) } else { (dy, dx) };
        max + (std::f32::consts::SQRT_2 - 1.0) * min
    }
}

/// Terrain data the core consumes but never owns
pub trait TerrainQuery: Send + Sync {
    /// Edge length of one tile in world units
    fn tile_size(&self) -> f32;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Movement cost multiplier for entering the tile (1.0 = open ground)
    fn movement_cost(&self, tile: TileCoord) -> f32;

    /// Opacity contributed per tile crossed by a sight line
    fn opacity(&self, tile: TileCoord) -> f32;

    /// Cover (0.0 = none, 1.0 = full) for a unit in this tile and posture
    fn cover_value(&self, tile: TileCoord, posture: Posture) -> f32;

    fn is_passable(&self, tile: TileCoord) -> bool;

    /// Passability for a specific unit kind; vehicles may be more restricted
    fn is_passable_for(&self, tile: TileCoord, kind: UnitKind) -> bool {
        let _ = kind;
        self.is_passable(tile)
    }

    /// Lowest movement cost any tile can have; scales the A* heuristic
    fn min_movement_cost(&self) -> f32 {
        1.0
    }

    fn in_bounds(&self, tile: TileCoord) -> bool {
        tile.x >= 0 && tile.y >= 0 && tile.x < self.width() as i32 && tile.y < self.height() as i32
    }

    fn tile_at(&self, pos: Vec2) -> TileCoord {
        let size = self.tile_size();
        TileCoord::new((pos.x / size).floor() as i32, (pos.y / size).floor() as i32)
    }

    fn tile_center(&self, tile: TileCoord) -> Vec2 {
        let size = self.tile_size();
        Vec2::new((tile.x as f32 + 0.5) * size, (tile.y as f32 + 0.5) * size)
    }
}

/// Primary terrain type for a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TerrainKind {
    #[default]
    Open,         // No movement penalty, no cover
    Rough,        // Slight penalty, light cover
    Woods,        // Heavy penalty, partial concealment
    Hedge,        // Blocks sight quickly, little hard cover
    Wall,         // Hard cover, must climb
    Building,     // Cover, opaque
    ShallowWater, // Fordable
    DeepWater,    // Impassable
    Road,         // Movement bonus
    Crater,       // Excellent prone cover
}

impl TerrainKind {
    /// Movement cost multiplier (1.0 = normal)
    pub fn movement_cost(&self) -> f32 {
        match self {
            TerrainKind::Open => 1.0,
            TerrainKind::Rough => 1.5,
            TerrainKind::Woods => 2.0,
            TerrainKind::Hedge => 3.0,
            TerrainKind::Wall => 4.0,
            TerrainKind::Building => 2.5,
            TerrainKind::ShallowWater => 2.5,
            TerrainKind::DeepWater => f32::INFINITY,
            TerrainKind::Road => 0.8,
            TerrainKind::Crater => 1.8,
        }
    }

    /// Opacity added per tile crossed
    pub fn opacity(&self) -> f32 {
        match self {
            TerrainKind::Open => 0.0,
            TerrainKind::Rough => 0.02,
            TerrainKind::Woods => 0.15,
            TerrainKind::Hedge => 0.35,
            TerrainKind::Wall => 0.1,
            TerrainKind::Building => 1.0,
            TerrainKind::ShallowWater => 0.0,
            TerrainKind::DeepWater => 0.0,
            TerrainKind::Road => 0.0,
            TerrainKind::Crater => 0.0,
        }
    }

    /// Cover value for a standing unit (0.0 = none, 1.0 = full)
    pub fn base_cover(&self) -> f32 {
        match self {
            TerrainKind::Open => 0.0,
            TerrainKind::Rough => 0.1,
            TerrainKind::Woods => 0.3,
            TerrainKind::Hedge => 0.15,
            TerrainKind::Wall => 0.5,
            TerrainKind::Building => 0.7,
            TerrainKind::ShallowWater => 0.0,
            TerrainKind::DeepWater => 0.0,
            TerrainKind::Road => 0.0,
            TerrainKind::Crater => 0.3,
        }
    }

    /// Additional cover from getting low in this terrain
    pub fn posture_cover_bonus(&self, posture: Posture) -> f32 {
        match (self, posture) {
            (_, Posture::Standing) => 0.0,
            (TerrainKind::Crater, Posture::Prone) => 0.5,
            (TerrainKind::Wall, Posture::Crouching | Posture::Prone) => 0.3,
            (TerrainKind::Open | TerrainKind::Road, Posture::Crouching) => 0.0,
            (_, Posture::Crouching) => 0.05,
            (_, Posture::Prone) => 0.1,
        }
    }

    pub fn is_passable(&self) -> bool {
        !matches!(self, TerrainKind::DeepWater)
    }

    /// Vehicles cannot push through woods, hedges, walls or buildings
    pub fn is_passable_for_vehicle(&self) -> bool {
        self.is_passable()
            && !matches!(
                self,
                TerrainKind::Woods | TerrainKind::Hedge | TerrainKind::Wall | TerrainKind::Building
            )
    }

    /// Character used by [`GridTerrain::from_rows`]
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '.' => Some(TerrainKind::Open),
            ',' => Some(TerrainKind::Rough),
            'T' => Some(TerrainKind::Woods),
            'h' => Some(TerrainKind::Hedge),
            'w' => Some(TerrainKind::Wall),
            '#' => Some(TerrainKind::Building),
            '~' => Some(TerrainKind::ShallowWater),
            'W' => Some(TerrainKind::DeepWater),
            '=' => Some(TerrainKind::Road),
            'o' => Some(TerrainKind::Crater),
            _ => None,
        }
    }
}

/// Dense tile grid terrain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridTerrain {
    pub width: u32,
    pub height: u32,
    pub tile_size: f32,
    tiles: Vec<TerrainKind>,
}

impl GridTerrain {
    /// Create open terrain
    pub fn new(width: u32, height: u32, tile_size: f32) -> Self {
        Self {
            width,
            height,
            tile_size,
            tiles: vec![TerrainKind::Open; (width * height) as usize],
        }
    }

    /// Build from ASCII rows (row 0 is y = 0); see [`TerrainKind::from_char`]
    pub fn from_rows(rows: &[&str], tile_size: f32) -> Result<Self> {
        let height = rows.len() as u32;
        let width = rows.first().map(|r| r.chars().count()).unwrap_or(0) as u32;
        let mut tiles = Vec::with_capacity((width * height) as usize);

        for (y, row) in rows.iter().enumerate() {
            if row.chars().count() as u32 != width {
                return Err(SimError::InvalidDefinition {
                    id: format!("terrain row {}", y),
                    reason: format!("expected {} columns", width),
                });
            }
            for (x, c) in row.chars().enumerate() {
                let kind = TerrainKind::from_char(c).ok_or_else(|| SimError::InvalidDefinition {
                    id: format!("terrain tile ({}, {})", x, y),
                    reason: format!("unknown terrain character '{}'", c),
                })?;
                tiles.push(kind);
            }
        }

        Ok(Self { width, height, tile_size, tiles })
    }

    fn index(&self, tile: TileCoord) -> Option<usize> {
        if self.in_bounds(tile) {
            Some(tile.y as usize * self.width as usize + tile.x as usize)
        } else {
            None
        }
    }

    pub fn kind(&self, tile: TileCoord) -> Option<TerrainKind> {
        self.index(tile).map(|i| self.tiles[i])
    }

    pub fn set(&mut self, tile: TileCoord, kind: TerrainKind) {
        if let Some(i) = self.index(tile) {
            self.tiles[i] = kind;
        }
    }

    /// Fill a rectangle of tiles (inclusive bounds)
    pub fn fill(&mut self, from: TileCoord, to: TileCoord, kind: TerrainKind) {
        for y in from.y.min(to.y)..=from.y.max(to.y) {
            for x in from.x.min(to.x)..=from.x.max(to.x) {
                self.set(TileCoord::new(x, y), kind);
            }
        }
    }

    /// World-space extent (width, height)
    pub fn extent(&self) -> Vec2 {
        Vec2::new(self.width as f32 * self.tile_size, self.height as f32 * self.tile_size)
    }
}

impl TerrainQuery for GridTerrain {
    fn tile_size(&self) -> f32 {
        self.tile_size
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn movement_cost(&self, tile: TileCoord) -> f32 {
        self.kind(tile).map(|k| k.movement_cost()).unwrap_or(f32::INFINITY)
    }

    fn opacity(&self, tile: TileCoord) -> f32 {
        self.kind(tile).map(|k| k.opacity()).unwrap_or(0.0)
    }

    fn cover_value(&self, tile: TileCoord, posture: Posture) -> f32 {
        self.kind(tile)
            .map(|k| (k.base_cover() + k.posture_cover_bonus(posture)).min(0.95))
            .unwrap_or(0.0)
    }

    fn is_passable(&self, tile: TileCoord) -> bool {
        self.kind(tile).map(|k| k.is_passable()).unwrap_or(false)
    }

    fn is_passable_for(&self, tile: TileCoord, kind: UnitKind) -> bool {
        match kind {
            UnitKind::Soldier => self.is_passable(tile),
            UnitKind::Vehicle => self
                .kind(tile)
                .map(|k| k.is_passable_for_vehicle())
                .unwrap_or(false),
        }
    }

    fn min_movement_cost(&self) -> f32 {
        TerrainKind::Road.movement_cost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_grid_defaults() {
        let grid = GridTerrain::new(10, 10, 2.0);
        let tile = TileCoord::new(3, 3);
        assert_eq!(grid.movement_cost(tile), 1.0);
        assert_eq!(grid.opacity(tile), 0.0);
        assert_eq!(grid.cover_value(tile, Posture::Standing), 0.0);
        assert!(grid.is_passable(tile));
    }

    #[test]
    fn test_out_of_bounds_is_impassable() {
        let grid = GridTerrain::new(10, 10, 1.0);
        assert!(!grid.is_passable(TileCoord::new(-1, 0)));
        assert!(!grid.is_passable(TileCoord::new(10, 0)));
        assert!(grid.movement_cost(TileCoord::new(0, 10)).is_infinite());
    }

    #[test]
    fn test_from_rows() {
        let grid = GridTerrain::from_rows(&["..#", "TW="], 1.0).unwrap();
        assert_eq!(grid.width, 3);
        assert_eq!(grid.height, 2);
        assert_eq!(grid.kind(TileCoord::new(2, 0)), Some(TerrainKind::Building));
        assert_eq!(grid.kind(TileCoord::new(1, 1)), Some(TerrainKind::DeepWater));
        assert!(!grid.is_passable(TileCoord::new(1, 1)));
    }

    #[test]
    fn test_from_rows_rejects_unknown_char() {
        let result = GridTerrain::from_rows(&["..?"], 1.0);
        assert!(matches!(result, Err(SimError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        assert!(GridTerrain::from_rows(&["...", ".."], 1.0).is_err());
    }

    #[test]
    fn test_prone_in_crater_is_good_cover() {
        let mut grid = GridTerrain::new(4, 4, 1.0);
        let tile = TileCoord::new(1, 1);
        grid.set(tile, TerrainKind::Crater);
        assert!(grid.cover_value(tile, Posture::Prone) > grid.cover_value(tile, Posture::Standing));
        assert!(grid.cover_value(tile, Posture::Prone) <= 0.95);
    }

    #[test]
    fn test_tile_at_and_center() {
        let grid = GridTerrain::new(10, 10, 2.0);
        let tile = grid.tile_at(Vec2::new(5.1, 0.2));
        assert_eq!(tile, TileCoord::new(2, 0));
        assert_eq!(grid.tile_center(tile), Vec2::new(5.0, 1.0));
    }

    #[test]
    fn test_vehicles_blocked_by_woods() {
        let grid = GridTerrain::from_rows(&[".T"], 1.0).unwrap();
        assert!(grid.is_passable_for(TileCoord::new(1, 0), UnitKind::Soldier));
        assert!(!grid.is_passable_for(TileCoord::new(1, 0), UnitKind::Vehicle));
        assert!(grid.is_passable_for(TileCoord::new(0, 0), UnitKind::Vehicle));
    }

    #[test]
    fn test_octile_distance() {
        let a = TileCoord::new(0, 0);
        assert_eq!(a.octile_distance(&TileCoord::new(3, 0)), 3.0);
        let diag = a.octile_distance(&TileCoord::new(2, 2));
        assert!((diag - 2.0 * std::f32::consts::SQRT_2).abs() < 1e-5);
    }
}
