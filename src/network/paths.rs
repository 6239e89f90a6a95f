//! Store Paths
//!
//! Per-room layout of the replicated store:
//!
//! ```text
//! rooms/{room}/meta              { host, created_at, closed }     creator
//! rooms/{room}/players/{id}      player snapshot                  owner
//! rooms/{room}/round             round record                     host
//! rooms/{room}/bomb              bomb record                      any (freshness-checked)
//! rooms/{room}/damage/{key}      damage event                     shooter, deleted by target
//! rooms/{room}/shots/{key}       shot trail                       shooter, deleted by shooter
//! ```

use crate::game::state::PlayerId;

/// Root of every room.
pub const ROOMS: &str = "rooms";

/// Paths for one room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomPaths {
    root: String,
}

impl RoomPaths {
    /// Paths for `room_id`.
    pub fn new(room_id: &str) -> Self {
        Self {
            root: format!("{ROOMS}/{room_id}"),
        }
    }

    /// The whole room.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Room meta record.
    pub fn meta(&self) -> String {
        format!("{}/meta", self.root)
    }

    /// Host-on-disconnect flag inside the meta record.
    pub fn closed_flag(&self) -> String {
        format!("{}/meta/closed", self.root)
    }

    /// All player records.
    pub fn players(&self) -> String {
        format!("{}/players", self.root)
    }

    /// One player's record.
    pub fn player(&self, id: PlayerId) -> String {
        format!("{}/players/{}", self.root, id)
    }

    /// Round record.
    pub fn round(&self) -> String {
        format!("{}/round", self.root)
    }

    /// Bomb record.
    pub fn bomb(&self) -> String {
        format!("{}/bomb", self.root)
    }

    /// Damage event queue.
    pub fn damage(&self) -> String {
        format!("{}/damage", self.root)
    }

    /// One damage event.
    pub fn damage_event(&self, key: &str) -> String {
        format!("{}/damage/{}", self.root, key)
    }

    /// Shot trails.
    pub fn shots(&self) -> String {
        format!("{}/shots", self.root)
    }

    /// One shot trail.
    pub fn shot(&self, key: &str) -> String {
        format!("{}/shots/{}", self.root, key)
    }
}

/// Split a path into its segments, rejecting empty ones.
pub fn segments(path: &str) -> Option<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(parts)
}

/// `ancestor` is `path` itself or one of its parents.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    path == ancestor
        || (path.len() > ancestor.len() && path.starts_with(ancestor) && path.as_bytes()[ancestor.len()] == b'/')
}

/// Last segment of a path.
pub fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_layout() {
        let paths = RoomPaths::new("r1");
        let id = PlayerId::new([0xab; 16]);
        assert_eq!(paths.round(), "rooms/r1/round");
        assert_eq!(
            paths.player(id),
            "rooms/r1/players/abababab-abab-abab-abab-abababababab"
        );
        assert_eq!(leaf(&paths.damage_event("k9")), "k9");
    }

    #[test]
    fn test_path_relations() {
        assert!(is_within("rooms/r1/players/x", "rooms/r1"));
        assert!(is_within("rooms/r1", "rooms/r1"));
        assert!(!is_within("rooms/r10", "rooms/r1"));
        assert!(!is_within("rooms", "rooms/r1"));

        assert_eq!(segments("a/b/c"), Some(vec!["a", "b", "c"]));
        assert_eq!(segments("a//c"), None);
        assert_eq!(segments(""), None);
    }
}
