//! Grid Raycasting
//!
//! One grid traversal (DDA) serves both combat hit-scan and the visibility
//! scan. The walk visits tiles in ray order with the exact entry and exit
//! distance of each, and a caller-supplied stop predicate decides where the
//! ray ends: walls only for visibility, walls or players for hit-scan.

use crate::core::vec2::Vec2;
use crate::game::map::MapView;
use crate::game::state::PlayerId;

// =============================================================================
// GRID WALK
// =============================================================================

/// A ray with a unit direction and a length limit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// Start point.
    pub origin: Vec2,
    /// Unit direction.
    pub dir: Vec2,
    /// Length limit.
    pub max_distance: f32,
}

impl Ray {
    /// Ray from `origin` at `angle` radians.
    pub fn from_angle(origin: Vec2, angle: f32, max_distance: f32) -> Self {
        Self {
            origin,
            dir: Vec2::from_angle(angle),
            max_distance,
        }
    }

    /// Point at distance `t`.
    #[inline]
    pub fn at(&self, t: f32) -> Vec2 {
        self.origin.along(self.dir, t)
    }
}

/// One tile crossed by the walk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellStep {
    /// Tile column.
    pub tx: i32,
    /// Tile row.
    pub ty: i32,
    /// Distance at which the ray enters the tile.
    pub entry: f32,
    /// Distance at which the ray leaves the tile (or the length limit).
    pub exit: f32,
}

/// Where a walk stopped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WalkOutcome<T> {
    /// Stop point.
    pub point: Vec2,
    /// Distance along the ray.
    pub distance: f32,
    /// What stopped it, or `None` at the length limit.
    pub hit: Option<T>,
}

/// Walk the grid along `ray`, calling `visit` for each tile in order.
///
/// `visit` returns `Some((distance, hit))` to stop the walk. The walk also
/// stops at `max_distance`.
pub fn walk_grid<M, T, F>(map: &M, ray: &Ray, mut visit: F) -> WalkOutcome<T>
where
    M: MapView + ?Sized,
    F: FnMut(&CellStep) -> Option<(f32, T)>,
{
    let max = ray.max_distance.max(0.0);
    if !ray.origin.is_finite() || !ray.dir.is_finite() {
        return WalkOutcome { point: ray.origin, distance: 0.0, hit: None };
    }

    let size = map.tile_size();
    let (mut tx, mut ty) = map.tile_at(ray.origin);

    let (step_x, mut t_max_x, t_delta_x) = axis_setup(ray.origin.x, ray.dir.x, tx, size);
    let (step_y, mut t_max_y, t_delta_y) = axis_setup(ray.origin.y, ray.dir.y, ty, size);

    let mut entry = 0.0f32;
    loop {
        let exit = t_max_x.min(t_max_y).min(max);
        let cell = CellStep { tx, ty, entry, exit };

        if let Some((distance, hit)) = visit(&cell) {
            let distance = distance.clamp(0.0, max);
            return WalkOutcome {
                point: ray.at(distance),
                distance,
                hit: Some(hit),
            };
        }
        if exit >= max {
            return WalkOutcome {
                point: ray.at(max),
                distance: max,
                hit: None,
            };
        }

        if t_max_x < t_max_y {
            tx += step_x;
            entry = t_max_x;
            t_max_x += t_delta_x;
        } else {
            ty += step_y;
            entry = t_max_y;
            t_max_y += t_delta_y;
        }
    }
}

/// Per-axis DDA setup: step sign, distance to the first boundary, distance
/// between boundaries.
fn axis_setup(origin: f32, dir: f32, tile: i32, size: f32) -> (i32, f32, f32) {
    if dir > 0.0 {
        let boundary = (tile + 1) as f32 * size;
        (1, (boundary - origin) / dir, size / dir)
    } else if dir < 0.0 {
        let boundary = tile as f32 * size;
        (-1, (boundary - origin) / dir, size / -dir)
    } else {
        (0, f32::INFINITY, f32::INFINITY)
    }
}

/// Stop at the first wall tile. A ray starting inside a wall stops at 0.
pub fn cast_wall<M: MapView + ?Sized>(map: &M, ray: &Ray) -> WalkOutcome<(i32, i32)> {
    walk_grid(map, ray, |cell| {
        map.is_solid(cell.tx, cell.ty)
            .then_some((cell.entry, (cell.tx, cell.ty)))
    })
}

// =============================================================================
// PLAYER INTERSECTION
// =============================================================================

/// Distance along a unit-direction ray to a circle, measured as the
/// projection of the center onto the ray. `None` if the circle is behind
/// the origin or the ray passes outside it.
pub fn ray_circle(origin: Vec2, dir: Vec2, center: Vec2, radius: f32) -> Option<f32> {
    let to_center = center - origin;
    let t = to_center.dot(dir);
    if t < 0.0 {
        return None;
    }
    let perp_sq = to_center.length_squared() - t * t;
    (perp_sq <= radius * radius).then_some(t)
}

/// A player hitbox eligible to be hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Target {
    /// Player.
    pub id: PlayerId,
    /// Hitbox center.
    pub position: Vec2,
    /// Hitbox radius.
    pub radius: f32,
}

/// What stopped a hit-scan ray.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RayHit {
    /// Wall tile.
    Wall {
        /// Tile column.
        tx: i32,
        /// Tile row.
        ty: i32,
    },
    /// Player hitbox.
    Player(PlayerId),
}

/// Walk the grid stopping at walls or players, whichever is closest.
///
/// A player exactly at the wall's entry distance wins the tie.
pub fn cast_hitscan<M: MapView + ?Sized>(map: &M, ray: &Ray, targets: &[Target]) -> WalkOutcome<RayHit> {
    let mut candidates: Vec<(f32, PlayerId)> = targets
        .iter()
        .filter_map(|t| {
            ray_circle(ray.origin, ray.dir, t.position, t.radius)
                .filter(|d| *d <= ray.max_distance)
                .map(|d| (d, t.id))
        })
        .collect();
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    let nearest = candidates.first().copied();

    walk_grid(map, ray, |cell| {
        if let Some((d, id)) = nearest {
            if d <= cell.exit && (d <= cell.entry || !map.is_solid(cell.tx, cell.ty)) {
                return Some((d, RayHit::Player(id)));
            }
        }
        map.is_solid(cell.tx, cell.ty)
            .then_some((cell.entry, RayHit::Wall { tx: cell.tx, ty: cell.ty }))
    })
}

// =============================================================================
// VISIBILITY
// =============================================================================

/// Fog-of-war ray fan with adaptive density.
#[derive(Clone, Debug)]
pub struct VisibilityScanner {
    /// Field of view in radians.
    pub fov: f32,
    /// View distance.
    pub range: f32,
    rays: usize,
    min_rays: usize,
    max_rays: usize,
    target_ms: f32,
}

impl Default for VisibilityScanner {
    fn default() -> Self {
        Self {
            fov: 80f32.to_radians(),
            range: 700.0,
            rays: 120,
            min_rays: 60,
            max_rays: 360,
            target_ms: 8.0,
        }
    }
}

impl VisibilityScanner {
    /// Current ray count.
    pub fn rays(&self) -> usize {
        self.rays
    }

    /// Endpoints of the ray fan centered on `facing`.
    pub fn scan<M: MapView + ?Sized>(&self, map: &M, origin: Vec2, facing: f32) -> Vec<Vec2> {
        let start = facing - self.fov / 2.0;
        let step = self.fov / (self.rays.max(2) - 1) as f32;

        (0..self.rays)
            .map(|i| {
                let ray = Ray::from_angle(origin, start + step * i as f32, self.range);
                cast_wall(map, &ray).point
            })
            .collect()
    }

    /// Line of sight from `from` (facing `facing`) to `to`.
    pub fn can_see<M: MapView + ?Sized>(&self, map: &M, from: Vec2, facing: f32, to: Vec2) -> bool {
        let offset = to - from;
        let distance = offset.length();
        if distance > self.range {
            return false;
        }
        if distance > 0.0 {
            let off_axis = (offset.angle() - facing + std::f32::consts::PI)
                .rem_euclid(std::f32::consts::TAU)
                - std::f32::consts::PI;
            if off_axis.abs() > self.fov / 2.0 {
                return false;
            }
        }
        let ray = Ray {
            origin: from,
            dir: offset.normalize(),
            max_distance: distance,
        };
        cast_wall(map, &ray).hit.is_none()
    }

    /// Adjust ray density after a scan that took `elapsed_ms`.
    pub fn record_cost(&mut self, elapsed_ms: f32) {
        if elapsed_ms > self.target_ms {
            self.rays = (self.rays * 3 / 4).max(self.min_rays);
        } else if elapsed_ms < self.target_ms / 2.0 {
            self.rays = (self.rays * 5 / 4 + 1).min(self.max_rays);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::DeterministicRng;
    use crate::game::map::TileMap;
    use crate::game::state::Team;

    /// Infinite open floor.
    struct Open;

    impl MapView for Open {
        fn tile_size(&self) -> f32 {
            32.0
        }
        fn is_solid(&self, _tx: i32, _ty: i32) -> bool {
            false
        }
        fn spawn_point(&self, _team: Team, _rng: &mut DeterministicRng) -> Vec2 {
            Vec2::ZERO
        }
        fn in_objective_zone(&self, _pos: Vec2) -> bool {
            false
        }
    }

    fn corridor() -> TileMap {
        TileMap::parse("##########\n#a......b#\n##########", 32.0).unwrap()
    }

    #[test]
    fn test_hit_player_in_open_corridor() {
        let target = PlayerId::new([7; 16]);
        let ray = Ray::from_angle(Vec2::ZERO, 0.0, 500.0);
        let hit = cast_hitscan(
            &Open,
            &ray,
            &[Target { id: target, position: Vec2::new(100.0, 0.0), radius: 10.0 }],
        );
        assert_eq!(hit.hit, Some(RayHit::Player(target)));
        assert!((hit.distance - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_wall_hit_at_boundary() {
        let map = corridor();
        let ray = Ray::from_angle(map.tile_center(1, 1), 0.0, 1_000.0);
        let out = cast_wall(&map, &ray);
        assert_eq!(out.hit, Some((9, 1)));
        assert!((out.distance - (9.0 * 32.0 - 48.0)).abs() < 1e-3);
        assert!((out.point.x - 288.0).abs() < 1e-3);

        let left = Ray::from_angle(map.tile_center(3, 1), std::f32::consts::PI, 1_000.0);
        let out = cast_wall(&map, &left);
        assert_eq!(out.hit, Some((0, 1)));
        assert!((out.distance - (112.0 - 32.0)).abs() < 1e-3);
    }

    #[test]
    fn test_range_limit() {
        let map = corridor();
        let ray = Ray::from_angle(map.tile_center(1, 1), 0.0, 50.0);
        let out = cast_wall(&map, &ray);
        assert_eq!(out.hit, None);
        assert_eq!(out.distance, 50.0);
    }

    #[test]
    fn test_start_inside_wall() {
        let map = corridor();
        let ray = Ray::from_angle(Vec2::new(5.0, 5.0), 0.3, 100.0);
        let out = cast_wall(&map, &ray);
        assert_eq!(out.distance, 0.0);
        assert_eq!(out.hit, Some((0, 0)));
    }

    #[test]
    fn test_wall_shields_player() {
        let map = TileMap::parse("##########\n#a..#...b#\n##########", 32.0).unwrap();
        let origin = map.tile_center(1, 1);
        let behind = Target { id: PlayerId::new([1; 16]), position: map.tile_center(6, 1), radius: 10.0 };
        let ray = Ray::from_angle(origin, 0.0, 1_000.0);

        let out = cast_hitscan(&map, &ray, &[behind]);
        assert_eq!(out.hit, Some(RayHit::Wall { tx: 4, ty: 1 }));

        let front = Target { id: PlayerId::new([2; 16]), position: map.tile_center(3, 1), radius: 10.0 };
        let out = cast_hitscan(&map, &ray, &[behind, front]);
        assert_eq!(out.hit, Some(RayHit::Player(front.id)));
        assert!((out.distance - 64.0).abs() < 1e-3);
    }

    #[test]
    fn test_closest_player_wins() {
        let near = Target { id: PlayerId::new([9; 16]), position: Vec2::new(60.0, 3.0), radius: 10.0 };
        let far = Target { id: PlayerId::new([1; 16]), position: Vec2::new(90.0, 0.0), radius: 10.0 };
        let ray = Ray::from_angle(Vec2::ZERO, 0.0, 500.0);
        let out = cast_hitscan(&Open, &ray, &[far, near]);
        assert_eq!(out.hit, Some(RayHit::Player(near.id)));
    }

    #[test]
    fn test_ray_circle_misses() {
        assert_eq!(ray_circle(Vec2::ZERO, Vec2::RIGHT, Vec2::new(-50.0, 0.0), 10.0), None);
        assert_eq!(ray_circle(Vec2::ZERO, Vec2::RIGHT, Vec2::new(50.0, 11.0), 10.0), None);
        assert_eq!(ray_circle(Vec2::ZERO, Vec2::RIGHT, Vec2::new(50.0, 10.0), 10.0), Some(50.0));
    }

    #[test]
    fn test_visibility_fan_and_adaptation() {
        let map = TileMap::training_ground().unwrap();
        let mut scanner = VisibilityScanner::default();
        let points = scanner.scan(&map, map.tile_center(2, 4), 0.0);
        assert_eq!(points.len(), 120);
        assert!(points.iter().all(|p| p.is_finite()));

        scanner.record_cost(20.0);
        assert_eq!(scanner.rays(), 90);
        for _ in 0..10 {
            scanner.record_cost(20.0);
        }
        assert_eq!(scanner.rays(), 60);
        for _ in 0..20 {
            scanner.record_cost(1.0);
        }
        assert_eq!(scanner.rays(), 360);
    }

    #[test]
    fn test_line_of_sight() {
        let map = TileMap::parse("##########\n#a..#...b#\n##########", 32.0).unwrap();
        let scanner = VisibilityScanner::default();
        let from = map.tile_center(1, 1);
        assert!(scanner.can_see(&map, from, 0.0, map.tile_center(3, 1)));
        assert!(!scanner.can_see(&map, from, 0.0, map.tile_center(6, 1)));
        // Behind the viewer
        assert!(!scanner.can_see(&map, map.tile_center(3, 1), 0.0, from));
    }
}
