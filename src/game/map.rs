//! Tile Map
//!
//! The map is an external collaborator: the engine only needs tile
//! occupancy, walkability, per-team spawn points and the objective-zone
//! predicate, expressed by [`MapView`]. [`TileMap`] is the grid
//! implementation used by the demo and the tests, parsed from ASCII rows.
//!
//! ```text
//! #  wall            .  floor
//! B  bombsite floor  a  team A spawn floor   b  team B spawn floor
//! ```

use std::collections::BTreeMap;

use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vec2;
use crate::game::state::Team;

/// Default tile edge in pixels.
pub const TILE_SIZE: f32 = 32.0;

/// Spawn points jitter by up to this many tiles from the spawn tile.
const SPAWN_JITTER_TILES: i32 = 2;

/// Attempts at finding a walkable jittered spawn before using the tile center.
const SPAWN_ATTEMPTS: u32 = 10;

/// Map parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// No rows.
    #[error("map has no rows")]
    Empty,

    /// Row length differs from the first row.
    #[error("row {row} has {found} tiles, expected {expected}")]
    Ragged {
        /// Offending row.
        row: usize,
        /// Width of the first row.
        expected: usize,
        /// Width of this row.
        found: usize,
    },

    /// Character outside the legend.
    #[error("unknown tile {ch:?} at row {row}, column {col}")]
    UnknownTile {
        /// Offending character.
        ch: char,
        /// Row index.
        row: usize,
        /// Column index.
        col: usize,
    },

    /// A team has nowhere to spawn.
    #[error("no spawn tiles for team {0}")]
    MissingSpawn(Team),
}

/// What the engine needs from a map.
pub trait MapView: Send + Sync {
    /// Edge length of one tile in pixels.
    fn tile_size(&self) -> f32;

    /// Tile occupancy. Out-of-bounds coordinates are solid.
    fn is_solid(&self, tx: i32, ty: i32) -> bool;

    /// Named spawn point for a team.
    fn spawn_point(&self, team: Team, rng: &mut DeterministicRng) -> Vec2;

    /// True when `pos` is inside the bombsite.
    fn in_objective_zone(&self, pos: Vec2) -> bool;

    /// Tile containing a world position.
    fn tile_at(&self, pos: Vec2) -> (i32, i32) {
        let size = self.tile_size();
        ((pos.x / size).floor() as i32, (pos.y / size).floor() as i32)
    }

    /// Walkability test for an arbitrary coordinate.
    fn is_walkable(&self, pos: Vec2) -> bool {
        if !pos.is_finite() {
            return false;
        }
        let (tx, ty) = self.tile_at(pos);
        !self.is_solid(tx, ty)
    }
}

/// One grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tile {
    /// Open floor.
    Floor,
    /// Solid wall.
    Wall,
    /// Floor inside the bombsite.
    BombSite,
    /// Floor where a team spawns.
    Spawn(Team),
}

impl Tile {
    fn from_char(ch: char) -> Option<Self> {
        match ch {
            '.' | ' ' => Some(Tile::Floor),
            '#' => Some(Tile::Wall),
            'B' => Some(Tile::BombSite),
            'a' => Some(Tile::Spawn(Team::A)),
            'b' => Some(Tile::Spawn(Team::B)),
            _ => None,
        }
    }

    /// Tile blocks movement and bullets.
    #[inline]
    pub fn is_solid(self) -> bool {
        matches!(self, Tile::Wall)
    }
}

/// Grid map.
#[derive(Clone, Debug)]
pub struct TileMap {
    width: usize,
    height: usize,
    tile_size: f32,
    tiles: Vec<Tile>,
    spawns: BTreeMap<Team, Vec<(i32, i32)>>,
}

impl TileMap {
    /// Parse ASCII rows using the legend in the module docs.
    pub fn parse(rows: &str, tile_size: f32) -> Result<Self, MapError> {
        let lines: Vec<&str> = rows
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .collect();

        let width = lines.first().map(|l| l.chars().count()).ok_or(MapError::Empty)?;
        let height = lines.len();
        let mut tiles = Vec::with_capacity(width * height);
        let mut spawns: BTreeMap<Team, Vec<(i32, i32)>> = BTreeMap::new();

        for (row, line) in lines.iter().enumerate() {
            let found = line.chars().count();
            if found != width {
                return Err(MapError::Ragged { row, expected: width, found });
            }
            for (col, ch) in line.chars().enumerate() {
                let tile = Tile::from_char(ch).ok_or(MapError::UnknownTile { ch, row, col })?;
                if let Tile::Spawn(team) = tile {
                    spawns.entry(team).or_default().push((col as i32, row as i32));
                }
                tiles.push(tile);
            }
        }

        for team in [Team::A, Team::B] {
            if !spawns.contains_key(&team) {
                return Err(MapError::MissingSpawn(team));
            }
        }

        Ok(Self {
            width,
            height,
            tile_size,
            tiles,
            spawns,
        })
    }

    /// Width in tiles.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in tiles.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Tile at grid coordinates. Out-of-bounds reads as wall.
    pub fn tile(&self, tx: i32, ty: i32) -> Tile {
        if tx < 0 || ty < 0 || tx as usize >= self.width || ty as usize >= self.height {
            return Tile::Wall;
        }
        self.tiles[ty as usize * self.width + tx as usize]
    }

    /// World position of a tile's center.
    pub fn tile_center(&self, tx: i32, ty: i32) -> Vec2 {
        Vec2::new(
            (tx as f32 + 0.5) * self.tile_size,
            (ty as f32 + 0.5) * self.tile_size,
        )
    }

    /// Centroid of the bombsite tiles.
    pub fn objective_center(&self) -> Option<Vec2> {
        let mut sum = Vec2::ZERO;
        let mut count = 0u32;
        for ty in 0..self.height as i32 {
            for tx in 0..self.width as i32 {
                if self.tile(tx, ty) == Tile::BombSite {
                    sum = sum.add(self.tile_center(tx, ty));
                    count += 1;
                }
            }
        }
        (count > 0).then(|| Vec2::new(sum.x / count as f32, sum.y / count as f32))
    }

    /// A small two-site practice map: spawns at either end, one bombsite in
    /// the middle with cover.
    pub fn training_ground() -> Result<Self, MapError> {
        const ROWS: &str = "\
####################
#aaa.......#......b#
#aaa..##...#..##..b#
#.....##......##..b#
#........BBB.......#
#...#....BBB....#..#
#...#....BBB....#..#
#..................#
#aaa..##......##..b#
####################";
        Self::parse(ROWS, TILE_SIZE)
    }
}

impl MapView for TileMap {
    fn tile_size(&self) -> f32 {
        self.tile_size
    }

    fn is_solid(&self, tx: i32, ty: i32) -> bool {
        self.tile(tx, ty).is_solid()
    }

    fn spawn_point(&self, team: Team, rng: &mut DeterministicRng) -> Vec2 {
        let Some(&(sx, sy)) = self.spawns.get(&team).and_then(|tiles| rng.choose(tiles)) else {
            return Vec2::ZERO;
        };

        for _ in 0..SPAWN_ATTEMPTS {
            let tx = sx + rng.next_int_range(-SPAWN_JITTER_TILES, SPAWN_JITTER_TILES);
            let ty = sy + rng.next_int_range(-SPAWN_JITTER_TILES, SPAWN_JITTER_TILES);
            if !self.is_solid(tx, ty) {
                return self.tile_center(tx, ty);
            }
        }
        self.tile_center(sx, sy)
    }

    fn in_objective_zone(&self, pos: Vec2) -> bool {
        let (tx, ty) = self.tile_at(pos);
        matches!(self.tile(tx, ty), Tile::BombSite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_lookup() {
        let map = TileMap::parse("#####\n#a.b#\n#.B.#\n#####", 32.0).unwrap();
        assert_eq!((map.width(), map.height()), (5, 4));
        assert_eq!(map.tile(0, 0), Tile::Wall);
        assert_eq!(map.tile(1, 1), Tile::Spawn(Team::A));
        assert_eq!(map.tile(2, 2), Tile::BombSite);
        assert_eq!(map.tile(-1, 2), Tile::Wall);
        assert_eq!(map.tile(9, 9), Tile::Wall);
        assert_eq!(map.objective_center(), Some(Vec2::new(80.0, 80.0)));
    }

    #[test]
    fn test_training_ground_site_center() {
        let map = TileMap::training_ground().unwrap();
        let center = map.objective_center().unwrap();
        assert_eq!(center, Vec2::new(336.0, 176.0));
        assert!(map.in_objective_zone(center));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(TileMap::parse("", 32.0).unwrap_err(), MapError::Empty);
        assert!(matches!(
            TileMap::parse("###\n##\n", 32.0),
            Err(MapError::Ragged { row: 1, expected: 3, found: 2 })
        ));
        assert!(matches!(
            TileMap::parse("#x#", 32.0),
            Err(MapError::UnknownTile { ch: 'x', .. })
        ));
        assert_eq!(TileMap::parse("#a#", 32.0).unwrap_err(), MapError::MissingSpawn(Team::B));
    }

    #[test]
    fn test_walkability_and_zone() {
        let map = TileMap::training_ground().unwrap();
        assert!(!map.is_walkable(Vec2::new(5.0, 5.0)));
        assert!(map.is_walkable(map.tile_center(1, 1)));
        assert!(!map.is_walkable(Vec2::new(-10.0, 40.0)));
        assert!(map.in_objective_zone(map.tile_center(10, 5)));
        assert!(!map.in_objective_zone(map.tile_center(1, 1)));
    }

    #[test]
    fn test_spawn_points_are_walkable_and_deterministic() {
        let map = TileMap::training_ground().unwrap();
        let mut rng1 = DeterministicRng::new(7);
        let mut rng2 = DeterministicRng::new(7);
        for team in [Team::A, Team::B] {
            for _ in 0..50 {
                let p = map.spawn_point(team, &mut rng1);
                assert_eq!(p, map.spawn_point(team, &mut rng2));
                assert!(map.is_walkable(p));
            }
        }
    }
}
